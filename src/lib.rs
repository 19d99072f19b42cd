//! Sticky weighted A/B variant assignment.
//!
//! For each configured [`Experiment`], [`AssignmentEngine::assign`] checks the
//! visitor's eligibility, recovers any prior assignment from a compact token
//! (`{id}.{i-j-...}`), samples missing slots by weight without replacement,
//! persists the token when it changed and reports the exposure.

pub mod context;
pub mod engine;
pub mod error;
pub mod experiments;
pub mod persistence;
pub mod reporting;
pub mod settings;

pub use context::RequestContext;
pub use engine::{AssignmentEngine, Assignments, ResolvedExperiment};
pub use error::{AbcookieError, Result};
pub use experiments::assignment::{resolve, Assignment, Resolution};
pub use experiments::config::{Experiment, ExperimentError, Variant};
pub use experiments::eligibility::{is_eligible, Eligibility, Predicate, PredicateError};
pub use experiments::store::{ExperimentSet, RejectedExperiment};
pub use persistence::{CookieOptions, DocumentCookieJar, HeaderCookieJar, PersistencePort};
pub use reporting::{ChannelReporter, DeferredReporter, ExposureReport, Reporter};
pub use settings::Settings;
