use std::{fs, path::Path};

use adagrid_cli::{
    io,
    transform::{discretize, undo_discretize, Schema},
    run, IoSection, RunConfig, SolverSection,
};
use adagrid_core::{score, Dataset, Domain, MechanismConfig, SplitStrategy, SynthesisInput, Table};
use pretty_assertions::assert_eq;

fn write_inputs(dir: &Path) -> (Domain, Table) {
    let domain = Domain::new([("age", 6), ("sex", 2), ("income", 3)]).unwrap();
    let rows = (0..600)
        .map(|i| vec![(i * 7) % 6, i % 2, if i % 5 == 0 { 2 } else { (i / 3) % 2 }])
        .collect();
    let table = Table {
        columns: vec!["age".into(), "sex".into(), "income".into()],
        rows,
    };
    io::write_domain(&dir.join("domain.json"), &domain).unwrap();
    io::write_table(&dir.join("data.csv"), &table).unwrap();
    (domain, table)
}

fn config(dir: &Path) -> RunConfig {
    RunConfig {
        io: IoSection {
            dataset: Some(dir.join("data.csv")),
            domain: Some(dir.join("domain.json")),
            save: dir.join("out.csv"),
            measurements: Some(dir.join("measurements.json")),
        },
        mechanism: MechanismConfig {
            epsilon: 2.0,
            targets: vec!["income".into()],
            split_strategy: SplitStrategy([0.2, 0.2, 0.6]),
            seed: Some(17),
            ..MechanismConfig::default()
        },
        ..RunConfig::default()
    }
}

#[test]
fn end_to_end_with_builtin_estimator() {
    let dir = tempfile::tempdir().unwrap();
    let (domain, table) = write_inputs(dir.path());
    let mut config = config(dir.path());
    config.estimator.records = Some(400);

    let summary = run(&config).unwrap();
    assert_eq!(summary.records, 600);
    assert_eq!(summary.synthetic_rows, 400);
    assert!(summary.rho_spent <= summary.rho_total);
    assert_eq!(summary.seed, 17);

    let synthetic = io::read_table(&dir.path().join("out.csv")).unwrap();
    let synth = Dataset::new(domain.clone(), &synthetic).unwrap();
    let data = Dataset::new(domain, &table).unwrap();
    let report = score(&data, &synth, &["income".into()]).unwrap();
    assert_eq!(report.errors.len(), 1);
    assert!((0.0..=1.0).contains(&report.average));

    let logged: SynthesisInput =
        serde_json::from_str(&fs::read_to_string(dir.path().join("measurements.json")).unwrap()).unwrap();
    assert_eq!(logged.digest, summary.digest);
    assert_eq!(logged.measurements.len(), summary.measurements);
    assert_eq!(logged.measurements.digest(), summary.digest);
}

#[test]
fn same_seed_writes_identical_logs() {
    let dir = tempfile::tempdir().unwrap();
    write_inputs(dir.path());
    let config = config(dir.path());
    let first = run(&config).unwrap();
    let first_log = fs::read_to_string(dir.path().join("measurements.json")).unwrap();
    let second = run(&config).unwrap();
    let second_log = fs::read_to_string(dir.path().join("measurements.json")).unwrap();
    assert_eq!(first.digest, second.digest);
    assert_eq!(first_log, second_log);
}

#[cfg(unix)]
#[test]
fn external_solver_output_is_passed_through() {
    let dir = tempfile::tempdir().unwrap();
    write_inputs(dir.path());
    let mut config = config(dir.path());
    config.solver = Some(SolverSection {
        command: "sh".into(),
        args: vec![
            "-c".into(),
            "cat > /dev/null; printf 'age,sex,income\\n5,1,2\\n0,0,0\\n'".into(),
        ],
    });
    let summary = run(&config).unwrap();
    assert_eq!(summary.synthetic_rows, 2);
    let synthetic = io::read_table(&dir.path().join("out.csv")).unwrap();
    assert_eq!(synthetic.rows, vec![vec![5, 1, 2], vec![0, 0, 0]]);
}

#[cfg(unix)]
#[test]
fn failing_solver_keeps_the_measurement_log() {
    let dir = tempfile::tempdir().unwrap();
    write_inputs(dir.path());
    let mut config = config(dir.path());
    config.solver = Some(SolverSection {
        command: "sh".into(),
        args: vec!["-c".into(), "cat > /dev/null; exit 1".into()],
    });
    let err = run(&config).unwrap_err();
    assert!(err.to_string().contains("estimation failed"), "{err}");
    assert!(dir.path().join("measurements.json").exists());
    assert!(!dir.path().join("out.csv").exists());
}

#[test]
fn out_of_range_dataset_is_rejected_before_measuring() {
    let dir = tempfile::tempdir().unwrap();
    write_inputs(dir.path());
    fs::write(dir.path().join("data.csv"), "age,sex,income\n6,0,0\n").unwrap();
    let config = config(dir.path());
    assert!(run(&config).is_err());
    assert!(!dir.path().join("measurements.json").exists());
}

#[test]
fn discretize_then_restore() {
    let schema = Schema::from_json(
        r#"{"temp": {"bins": 2, "min": 0.0, "max": 10.0}, "city": {"values": ["oslo", "rome"]}}"#,
    )
    .unwrap();
    let raw = io::raw_from_reader("temp,city,note\n1.5,rome,x\n9.9,oslo,y\n".as_bytes(), "inline").unwrap();
    let (table, domain) = discretize(&raw, &schema).unwrap();
    assert_eq!(table.rows, vec![vec![0, 1], vec![1, 0]]);
    assert_eq!(domain.cardinality("temp").unwrap(), 2);

    let restored = undo_discretize(&table, &schema).unwrap();
    assert_eq!(restored.columns, vec!["temp".to_string(), "city".to_string()]);
    assert_eq!(
        restored.rows,
        vec![
            vec!["4".to_string(), "rome".to_string()],
            vec!["6".to_string(), "oslo".to_string()],
        ]
    );
}
