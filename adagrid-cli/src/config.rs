use std::{
    fs,
    path::{Path, PathBuf},
};

use adagrid_core::{AdagridConfig, EstimatorConfig, MechanismConfig};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ConfigFormat {
    Auto,
    Toml,
    Yaml,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {format:?} config: {details}")]
    Parse {
        format: ConfigFormat,
        details: String,
    },
    #[error("configuration invalid: {0}")]
    Validation(String),
    #[error(transparent)]
    Mechanism(#[from] adagrid_core::ConfigError),
}

/// A full run as read from a config file and then adjusted by flags.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RunConfig {
    pub io: IoSection,
    pub mechanism: MechanismConfig,
    pub estimator: EstimatorConfig,
    /// External solver; the built-in independent estimator is used without one.
    pub solver: Option<SolverSection>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct IoSection {
    pub dataset: Option<PathBuf>,
    pub domain: Option<PathBuf>,
    pub save: PathBuf,
    /// Where to write the assembled measurement log, if anywhere.
    pub measurements: Option<PathBuf>,
}

impl Default for IoSection {
    fn default() -> Self {
        Self {
            dataset: None,
            domain: None,
            save: PathBuf::from("out.csv"),
            measurements: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SolverSection {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.io.dataset.is_none() {
            return Err(ConfigError::Validation("no dataset given".into()));
        }
        if self.io.domain.is_none() {
            return Err(ConfigError::Validation("no domain given".into()));
        }
        if let Some(solver) = &self.solver {
            if solver.command.trim().is_empty() {
                return Err(ConfigError::Validation("solver command is empty".into()));
            }
        }
        self.adagrid().validate()?;
        Ok(())
    }

    pub fn adagrid(&self) -> AdagridConfig {
        AdagridConfig {
            mechanism: self.mechanism.clone(),
            estimator: self.estimator.clone(),
        }
    }
}

pub fn load_config(path: &Path, format: ConfigFormat) -> Result<RunConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let format = resolve_format(path, format);
    match format {
        ConfigFormat::Yaml => serde_yaml::from_str(&contents).map_err(|err| ConfigError::Parse {
            format,
            details: err.to_string(),
        }),
        _ => toml::from_str(&contents).map_err(|err| ConfigError::Parse {
            format,
            details: err.to_string(),
        }),
    }
}

fn resolve_format(path: &Path, format: ConfigFormat) -> ConfigFormat {
    match format {
        ConfigFormat::Auto => match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => ConfigFormat::Yaml,
            _ => ConfigFormat::Toml,
        },
        _ => format,
    }
}
