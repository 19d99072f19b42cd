use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::config::Experiment;
use crate::context::RequestContext;

#[derive(Debug, Clone, thiserror::Error)]
#[error("eligibility predicate failed: {0}")]
pub struct PredicateError(pub String);

/// Decides whether an experiment applies to the visitor behind a request.
pub trait Predicate: Send + Sync {
    fn evaluate(&self, ctx: &RequestContext) -> Result<bool, PredicateError>;
}

impl<F> Predicate for F
where
    F: Fn(&RequestContext) -> Result<bool, PredicateError> + Send + Sync,
{
    fn evaluate(&self, ctx: &RequestContext) -> Result<bool, PredicateError> {
        self(ctx)
    }
}

#[derive(Clone, Default)]
pub enum Eligibility {
    #[default]
    Always,
    Custom(Arc<dyn Predicate>),
}

impl Eligibility {
    pub fn custom<P: Predicate + 'static>(predicate: P) -> Self {
        Eligibility::Custom(Arc::new(predicate))
    }

    /// Wrap an infallible closure.
    pub fn when<F>(f: F) -> Self
    where
        F: Fn(&RequestContext) -> bool + Send + Sync + 'static,
    {
        Self::custom(move |ctx: &RequestContext| -> Result<bool, PredicateError> { Ok(f(ctx)) })
    }
}

impl fmt::Debug for Eligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Eligibility::Always => f.write_str("Always"),
            Eligibility::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Evaluate the experiment's predicate. Errors and panics count as ineligible so
/// one broken predicate cannot take down the other experiments.
pub fn is_eligible(experiment: &Experiment, ctx: &RequestContext) -> bool {
    let predicate = match &experiment.eligibility {
        Eligibility::Always => return true,
        Eligibility::Custom(p) => p,
    };

    match catch_unwind(AssertUnwindSafe(|| predicate.evaluate(ctx))) {
        Ok(Ok(eligible)) => eligible,
        Ok(Err(e)) => {
            tracing::warn!(experiment = %experiment.name, error = %e, "eligibility predicate failed");
            false
        }
        Err(_) => {
            tracing::warn!(experiment = %experiment.name, "eligibility predicate panicked");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiments::config::Variant;

    fn experiment(eligibility: Eligibility) -> Experiment {
        Experiment::new("e1", "banner", vec![Variant::default()]).with_eligibility(eligibility)
    }

    #[test]
    fn no_predicate_is_eligible() {
        assert!(is_eligible(&experiment(Eligibility::Always), &RequestContext::default()));
    }

    #[test]
    fn custom_predicate_result_is_used() {
        let ctx = RequestContext::default().with_attribute("beta", serde_json::json!(true));
        let only_beta = Eligibility::when(|ctx| ctx.attribute("beta").is_some());
        assert!(is_eligible(&experiment(only_beta.clone()), &ctx));
        assert!(!is_eligible(&experiment(only_beta), &RequestContext::default()));
    }

    #[test]
    fn predicate_can_gate_on_user_agent() {
        let mut headers = http::HeaderMap::new();
        headers.insert(
            http::header::USER_AGENT,
            http::HeaderValue::from_static("Mozilla/5.0 (iPhone)"),
        );
        let mobile_only = experiment(Eligibility::when(|ctx| {
            ctx.user_agent().is_some_and(|ua| ua.contains("iPhone"))
        }));
        assert!(is_eligible(&mobile_only, &RequestContext::new(headers, "/")));
        assert!(!is_eligible(&mobile_only, &RequestContext::default()));
    }

    #[test]
    fn predicate_error_is_ineligible() {
        let failing = Eligibility::custom(|_: &RequestContext| -> Result<bool, PredicateError> {
            Err(PredicateError("upstream lookup failed".to_string()))
        });
        assert!(!is_eligible(&experiment(failing), &RequestContext::default()));
    }

    #[test]
    fn predicate_panic_is_ineligible() {
        let panicking = Eligibility::when(|_| panic!("predicate blew up"));
        assert!(!is_eligible(&experiment(panicking), &RequestContext::default()));
    }

    #[test]
    fn debug_does_not_expose_predicate() {
        assert_eq!(format!("{:?}", Eligibility::when(|_| true)), "Custom(..)");
    }
}
