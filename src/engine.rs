//! Per-request assignment pipeline: eligibility, resolution, persistence,
//! reporting, for every configured experiment.

use indexmap::IndexMap;
use rand::Rng;
use serde::Serialize;

use crate::context::RequestContext;
use crate::error::{AbcookieError, Result};
use crate::experiments::assignment::{self, Assignment};
use crate::experiments::config::Experiment;
use crate::experiments::eligibility::is_eligible;
use crate::experiments::store::{ExperimentSet, RejectedExperiment};
use crate::persistence::{CookieOptions, PersistencePort};
use crate::reporting::{ExposureReport, Reporter};
use crate::settings::{Settings, DEFAULT_MAX_AGE};

/// One experiment's outcome for the current visitor, with the experiment
/// metadata alongside for rendering.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedExperiment {
    #[serde(flatten)]
    pub assignment: Assignment,
    pub experiment: Experiment,
}

/// Resolved experiments keyed by name, in configuration order. Experiments the
/// visitor is not eligible for are absent.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Assignments(IndexMap<String, ResolvedExperiment>);

impl Assignments {
    pub fn get(&self, name: &str) -> Option<&ResolvedExperiment> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResolvedExperiment)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Every display class across all experiments, for a page-level class list.
    pub fn classes(&self) -> Vec<&str> {
        self.0
            .values()
            .flat_map(|r| r.assignment.classes.iter().map(String::as_str))
            .collect()
    }
}

pub struct AssignmentEngine {
    experiments: ExperimentSet,
    default_max_age: u64,
    tracking_id: Option<String>,
}

impl AssignmentEngine {
    pub fn new(experiments: ExperimentSet) -> Self {
        Self {
            experiments,
            default_max_age: DEFAULT_MAX_AGE,
            tracking_id: None,
        }
    }

    /// Build from loaded settings. Invalid experiments are returned so the
    /// caller can surface them; the engine runs the valid ones.
    pub fn from_settings(settings: &Settings) -> (Self, Vec<RejectedExperiment>) {
        let (experiments, invalid) = ExperimentSet::from_configs(settings.experiments.clone());
        let mut rejected = settings.rejected.clone();
        rejected.extend(invalid);
        let engine = Self::new(experiments)
            .with_default_max_age(settings.default_max_age)
            .with_tracking_id(settings.tracking_id.clone());
        (engine, rejected)
    }

    /// Like [`from_settings`](Self::from_settings) but refuses to start when any
    /// experiment is invalid.
    pub fn from_settings_strict(settings: &Settings) -> Result<Self> {
        let (engine, rejected) = Self::from_settings(settings);
        if rejected.is_empty() {
            return Ok(engine);
        }
        let names = rejected
            .iter()
            .map(|r| r.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        Err(AbcookieError::RejectedExperiments {
            count: rejected.len(),
            names,
        })
    }

    pub fn with_default_max_age(mut self, max_age: u64) -> Self {
        self.default_max_age = max_age;
        self
    }

    pub fn with_tracking_id(mut self, tracking_id: Option<String>) -> Self {
        self.tracking_id = tracking_id;
        self
    }

    pub fn experiments(&self) -> &ExperimentSet {
        &self.experiments
    }

    pub fn assign<P>(
        &self,
        ctx: &RequestContext,
        port: &mut P,
        reporter: Option<&dyn Reporter>,
    ) -> Assignments
    where
        P: PersistencePort + ?Sized,
    {
        self.assign_with_rng(ctx, port, reporter, &mut rand::thread_rng())
    }

    pub fn assign_with_rng<P, R>(
        &self,
        ctx: &RequestContext,
        port: &mut P,
        reporter: Option<&dyn Reporter>,
        rng: &mut R,
    ) -> Assignments
    where
        P: PersistencePort + ?Sized,
        R: Rng + ?Sized,
    {
        let mut resolved = IndexMap::with_capacity(self.experiments.len());

        for experiment in self.experiments.iter() {
            if !is_eligible(experiment, ctx) {
                tracing::debug!(experiment = %experiment.name, "visitor not eligible");
                continue;
            }

            let cookie_name = experiment.cookie_name();
            let prior = port.read(&cookie_name);

            let resolution = match assignment::resolve(experiment, prior.as_deref(), rng) {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!(experiment = %experiment.name, error = %e, "skipping experiment");
                    continue;
                }
            };

            if resolution.changed {
                let max_age = experiment.max_age.unwrap_or(self.default_max_age);
                port.write(&cookie_name, &resolution.token, &CookieOptions::new(max_age));
            }

            if let Some(reporter) = reporter {
                self.report(reporter, experiment, &resolution.assignment.variant_indexes);
            }

            resolved.insert(
                experiment.name.clone(),
                ResolvedExperiment {
                    assignment: resolution.assignment,
                    experiment: experiment.clone(),
                },
            );
        }

        Assignments(resolved)
    }

    fn report(&self, reporter: &dyn Reporter, experiment: &Experiment, indexes: &[usize]) {
        let (Some(tracking_id), Some(external_id)) = (
            self.tracking_id.as_deref(),
            experiment.external_tracking_id.as_deref(),
        ) else {
            tracing::debug!(experiment = %experiment.name, "reporting not configured, skipping");
            return;
        };
        reporter.report(ExposureReport::new(
            tracking_id,
            external_id,
            experiment.name.as_str(),
            indexes.to_vec(),
        ));
    }
}
