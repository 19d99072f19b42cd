use thiserror::Error;

use crate::experiments::config::ExperimentError;

#[derive(Error, Debug)]
pub enum AbcookieError {
    #[error("Experiment error: {0}")]
    Experiment(#[from] ExperimentError),

    #[error("Rejected {count} experiment(s): {names}")]
    RejectedExperiments { count: usize, names: String },
}

pub type Result<T> = std::result::Result<T, AbcookieError>;
