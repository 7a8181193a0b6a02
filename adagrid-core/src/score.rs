//! Utility evaluation of a synthetic table against the data it was built
//! from. Reads the raw data, so it is an offline tool and never part of a
//! private release.

use serde::{Deserialize, Serialize};

use crate::domain::{Dataset, Marginal, SchemaError};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarginalError {
    pub marginal: Marginal,
    pub error: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    /// Sorted by error, smallest first.
    pub errors: Vec<MarginalError>,
    pub average: f64,
}

/// Pairs of non-target attributes, each extended with every target. With
/// no targets this is every 2-way marginal.
pub fn score_workload(data: &Dataset, targets: &[String]) -> Vec<Marginal> {
    let others: Vec<&str> = data
        .domain()
        .names()
        .filter(|name| !targets.iter().any(|target| target == *name))
        .collect();
    let mut workload = Vec::new();
    for (i, first) in others.iter().enumerate() {
        for second in &others[i + 1..] {
            workload.push(Marginal::new(
                [*first, *second]
                    .into_iter()
                    .chain(targets.iter().map(String::as_str)),
            ));
        }
    }
    workload
}

/// Half the L1 distance between raw counts, divided by the true record
/// count. Synthetic counts are not renormalized, so a table of the wrong size
/// is penalized and the error can exceed one.
pub fn total_variation(truth: &[f64], synth: &[f64]) -> f64 {
    let records: f64 = truth.iter().sum();
    if records <= 0.0 {
        return 0.0;
    }
    0.5 * truth.iter().zip(synth).map(|(a, b)| (a - b).abs()).sum::<f64>() / records
}

pub fn score(data: &Dataset, synth: &Dataset, targets: &[String]) -> Result<ScoreReport, SchemaError> {
    data.domain().check_targets(targets)?;
    let fine = data.domain();
    let mut errors = score_workload(data, targets)
        .into_iter()
        .map(|marginal| {
            let truth = data.project(&marginal, fine)?;
            let estimate = synth.project(&marginal, fine)?;
            Ok(MarginalError {
                error: total_variation(&truth, &estimate),
                marginal,
            })
        })
        .collect::<Result<Vec<_>, SchemaError>>()?;
    errors.sort_by(|a, b| a.error.total_cmp(&b.error));
    let average = if errors.is_empty() {
        0.0
    } else {
        errors.iter().map(|e| e.error).sum::<f64>() / errors.len() as f64
    };
    Ok(ScoreReport { errors, average })
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::domain::{Domain, Table};

    fn dataset(rows: Vec<Vec<usize>>) -> Dataset {
        let domain = Domain::new([("a", 2), ("b", 2), ("t", 2)]).unwrap();
        Dataset::new(
            domain,
            &Table {
                columns: vec!["a".into(), "b".into(), "t".into()],
                rows,
            },
        )
        .unwrap()
    }

    #[test]
    fn workload_extends_pairs_with_targets() {
        let data = dataset(vec![vec![0, 0, 0]]);
        let plain: Vec<String> = score_workload(&data, &[]).iter().map(ToString::to_string).collect();
        assert_eq!(plain, vec!["(a,b)", "(a,t)", "(b,t)"]);
        let targeted: Vec<String> = score_workload(&data, &["t".into()])
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(targeted, vec!["(a,b,t)"]);
    }

    #[test]
    fn identical_tables_score_zero() {
        let data = dataset(vec![vec![0, 1, 1], vec![1, 0, 0], vec![1, 1, 1]]);
        let report = score(&data, &data, &[]).unwrap();
        assert_eq!(report.errors.len(), 3);
        assert_relative_eq!(report.average, 0.0);
    }

    #[test]
    fn size_mismatch_is_penalized() {
        let truth = dataset(vec![vec![0, 0, 0]; 4]);
        let synth = dataset(vec![vec![1, 1, 1]; 9]);
        let report = score(&truth, &synth, &["t".into()]).unwrap();
        assert_relative_eq!(report.average, 1.625);
        assert_relative_eq!(total_variation(&[1.0, 1.0], &[2.0, 2.0]), 0.5);
        assert_relative_eq!(total_variation(&[3.0, 1.0], &[1.0, 1.0]), 0.25);
        assert_relative_eq!(total_variation(&[3.0, 1.0], &[1.0, 3.0]), 0.5);
    }

    #[test]
    fn errors_are_sorted_ascending() {
        let truth = dataset(vec![vec![0, 0, 0], vec![1, 1, 1]]);
        let synth = dataset(vec![vec![0, 0, 1], vec![1, 1, 1]]);
        let report = score(&truth, &synth, &[]).unwrap();
        let errors: Vec<f64> = report.errors.iter().map(|e| e.error).collect();
        assert!(errors.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(report.errors[0].marginal.to_string(), "(a,b)");
        assert_relative_eq!(report.errors[2].error, 0.5);
    }
}
