use indexmap::IndexMap;

use super::config::{Experiment, ExperimentError};
use super::eligibility::Eligibility;

/// An experiment that failed validation and will not run.
#[derive(Debug, Clone)]
pub struct RejectedExperiment {
    pub name: String,
    pub error: ExperimentError,
}

/// Immutable, validated experiment configuration keyed by name, in load order.
#[derive(Debug, Clone, Default)]
pub struct ExperimentSet {
    experiments: IndexMap<String, Experiment>,
}

impl ExperimentSet {
    /// Validate each experiment on its own. Invalid ones are rejected and logged;
    /// the rest are kept.
    pub fn from_configs(configs: Vec<Experiment>) -> (Self, Vec<RejectedExperiment>) {
        let mut experiments = IndexMap::with_capacity(configs.len());
        let mut rejected = Vec::new();

        for experiment in configs {
            let outcome = experiment.validate().and_then(|()| {
                if experiments.contains_key(&experiment.name) {
                    Err(ExperimentError::DuplicateName(experiment.name.clone()))
                } else {
                    Ok(())
                }
            });
            match outcome {
                Ok(()) => {
                    experiments.insert(experiment.name.clone(), experiment);
                }
                Err(error) => {
                    tracing::error!(
                        experiment = %experiment.name,
                        error = %error,
                        "rejecting experiment configuration"
                    );
                    rejected.push(RejectedExperiment {
                        name: experiment.name,
                        error,
                    });
                }
            }
        }

        (Self { experiments }, rejected)
    }

    /// Attach an eligibility predicate to a loaded experiment.
    pub fn with_eligibility(
        mut self,
        name: &str,
        eligibility: Eligibility,
    ) -> Result<Self, ExperimentError> {
        let experiment = self
            .experiments
            .get_mut(name)
            .ok_or_else(|| ExperimentError::NotFound(name.to_string()))?;
        experiment.eligibility = eligibility;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Experiment> {
        self.experiments.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Experiment> {
        self.experiments.values()
    }

    pub fn len(&self) -> usize {
        self.experiments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }
}
