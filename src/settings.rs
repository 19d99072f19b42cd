use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::experiments::config::{Experiment, ExperimentError};
use crate::experiments::store::RejectedExperiment;

/// Cookie lifetime used when an experiment declares no `maxAge`: one week.
pub const DEFAULT_MAX_AGE: u64 = 60 * 60 * 24 * 7;
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:7800";
pub const EXPERIMENTS_FILE_NAME: &str = "experiments.json";

/// On-disk shape of `experiments.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentsFile {
    /// Kept untyped so one malformed record cannot take down its siblings.
    #[serde(default)]
    pub experiments: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub experiments_file: PathBuf,
    pub default_max_age: u64,
    /// Analytics property id. Reporting is disabled when absent.
    pub tracking_id: Option<String>,
    pub bind_addr: String,
    /// Parsed, not yet validated experiment definitions.
    pub experiments: Vec<Experiment>,
    /// Records that could not be parsed into an [`Experiment`] at all.
    pub rejected: Vec<RejectedExperiment>,
}

impl Settings {
    /// Load `{data_dir}/experiments.json` (or `ABCOOKIE_EXPERIMENTS_FILE`) and
    /// apply environment overrides. Never fails: problems are logged and the
    /// defaults are used.
    pub fn load_or_default(data_dir: &Path) -> Self {
        let experiments_file = std::env::var("ABCOOKIE_EXPERIMENTS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join(EXPERIMENTS_FILE_NAME));

        let file = Self::read_experiments_file(&experiments_file);
        let (experiments, rejected) = parse_experiment_records(file.experiments);

        let default_max_age = match std::env::var("ABCOOKIE_MAX_AGE") {
            Ok(raw) => raw.trim().parse::<u64>().unwrap_or_else(|e| {
                tracing::warn!("Ignoring ABCOOKIE_MAX_AGE={:?}: {}", raw, e);
                file.max_age.unwrap_or(DEFAULT_MAX_AGE)
            }),
            Err(_) => file.max_age.unwrap_or(DEFAULT_MAX_AGE),
        };

        let tracking_id = std::env::var("ABCOOKIE_TRACKING_ID")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .or(file.tracking_id);

        let bind_addr =
            std::env::var("ABCOOKIE_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());

        tracing::info!(
            "Loaded {} experiment definition(s) from {} ({} unparsable), default_max_age={}s, reporting={}",
            experiments.len(),
            experiments_file.display(),
            rejected.len(),
            default_max_age,
            if tracking_id.is_some() { "enabled" } else { "disabled" }
        );

        Settings {
            experiments_file,
            default_max_age,
            tracking_id,
            bind_addr,
            experiments,
            rejected,
        }
    }

    fn read_experiments_file(path: &Path) -> ExperimentsFile {
        if !path.exists() {
            tracing::info!(
                "No experiments file at {}, running without experiments",
                path.display()
            );
            return ExperimentsFile::default();
        }
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<ExperimentsFile>(&content) {
                Ok(file) => file,
                Err(e) => {
                    tracing::error!(
                        "Failed to parse {}: {}, using defaults",
                        path.display(),
                        e
                    );
                    ExperimentsFile::default()
                }
            },
            Err(e) => {
                tracing::error!("Failed to read {}: {}, using defaults", path.display(), e);
                ExperimentsFile::default()
            }
        }
    }
}

/// Deserialize each record on its own. A record with the wrong shape is
/// rejected under its `name` if it has one, else under its position.
fn parse_experiment_records(
    records: Vec<serde_json::Value>,
) -> (Vec<Experiment>, Vec<RejectedExperiment>) {
    let mut experiments = Vec::with_capacity(records.len());
    let mut rejected = Vec::new();

    for (index, record) in records.into_iter().enumerate() {
        let name = record
            .get("name")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("#{}", index));
        match serde_json::from_value::<Experiment>(record) {
            Ok(experiment) => experiments.push(experiment),
            Err(e) => {
                let error = ExperimentError::InvalidConfig(format!(
                    "experiment record {} is malformed: {}",
                    index, e
                ));
                tracing::error!(
                    experiment = %name,
                    error = %error,
                    "rejecting experiment configuration"
                );
                rejected.push(RejectedExperiment { name, error });
            }
        }
    }

    (experiments, rejected)
}
