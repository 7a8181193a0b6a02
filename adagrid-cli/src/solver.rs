use std::{
    io::Write,
    process::{Command, Stdio},
    thread,
};

use adagrid_core::{EstimationError, Estimator, SynthesisInput, Table};
use tracing::{debug, info};

use crate::io::table_from_reader;

/// Runs an external graphical-model solver as a child process. The
/// synthesis input goes to its stdin as JSON; an integer-coded CSV table is
/// expected on its stdout.
#[derive(Clone, Debug)]
pub struct SolverProcess {
    command: String,
    args: Vec<String>,
}

impl SolverProcess {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

impl Estimator for SolverProcess {
    fn estimate(&self, input: &SynthesisInput) -> Result<Table, EstimationError> {
        let payload =
            serde_json::to_vec(input).map_err(|err| EstimationError::Solver(format!("encoding input: {err}")))?;
        info!(
            command = %self.command,
            measurements = input.measurements.len(),
            pgm_iters = input.pgm_iters,
            "starting solver"
        );
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| EstimationError::Solver("solver stdin unavailable".into()))?;
        // The solver may fill stdout before it drains stdin.
        let writer = thread::spawn(move || stdin.write_all(&payload));
        let output = child.wait_with_output()?;
        match writer.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(error = %err, "solver closed stdin early"),
            Err(_) => return Err(EstimationError::Solver("stdin writer panicked".into())),
        }
        if !output.status.success() {
            return Err(EstimationError::Solver(format!(
                "{} exited with {}",
                self.command, output.status
            )));
        }
        table_from_reader(output.stdout.as_slice(), "solver output")
            .map_err(|err| EstimationError::InvalidOutput(err.to_string()))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use adagrid_core::{Domain, EstimatorConfig, MeasurementLog, Metric};

    use super::*;

    fn input() -> SynthesisInput {
        SynthesisInput {
            domain: Domain::new([("a", 2)]).unwrap(),
            measurements: MeasurementLog::new(),
            metric: Metric::L2,
            warm_start: EstimatorConfig::default().warm_start,
            pgm_iters: 10,
            digest: MeasurementLog::new().digest(),
            seed: 1,
        }
    }

    fn shell(script: &str) -> SolverProcess {
        SolverProcess::new("sh", vec!["-c".into(), script.into()])
    }

    #[test]
    fn reads_table_from_stdout() {
        let table = shell("cat > /dev/null; printf 'a\\n1\\n0\\n'")
            .estimate(&input())
            .unwrap();
        assert_eq!(table.rows, vec![vec![1], vec![0]]);
    }

    #[test]
    fn solver_sees_json_input() {
        let table = shell("grep -q pgm-iters && printf 'a\\n1\\n'")
            .estimate(&input())
            .unwrap();
        assert_eq!(table.rows.len(), 1);
    }

    #[test]
    fn non_zero_exit_is_a_solver_error() {
        let err = shell("cat > /dev/null; exit 3").estimate(&input()).unwrap_err();
        assert!(matches!(err, EstimationError::Solver(_)));
    }

    #[test]
    fn garbage_output_is_invalid() {
        let err = shell("cat > /dev/null; printf 'a\\nnope\\n'")
            .estimate(&input())
            .unwrap_err();
        assert!(matches!(err, EstimationError::InvalidOutput(_)));
    }

    #[test]
    fn missing_program_is_an_io_error() {
        let err = SolverProcess::new("/nonexistent/adagrid-solver", Vec::new())
            .estimate(&input())
            .unwrap_err();
        assert!(matches!(err, EstimationError::Io(_)));
    }
}
