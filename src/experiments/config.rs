use serde::{Deserialize, Serialize};

use super::eligibility::Eligibility;

/// Weight applied to a variant that does not declare one.
pub const DEFAULT_WEIGHT: f64 = 1.0;

fn default_sections() -> usize {
    1
}

/// One treatment option. Its position in [`Experiment::variants`] is its identity.
///
/// Everything other than `weight` is opaque payload for the rendering side and is
/// kept verbatim.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Variant {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(flatten)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl Variant {
    pub fn weighted(weight: f64) -> Self {
        Self {
            weight: Some(weight),
            payload: serde_json::Map::new(),
        }
    }

    pub fn effective_weight(&self) -> f64 {
        self.weight.unwrap_or(DEFAULT_WEIGHT)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub id: String,
    pub name: String,
    pub variants: Vec<Variant>,
    /// Number of distinct variant slots assigned to one visitor.
    #[serde(default = "default_sections")]
    pub sections: usize,
    /// Cookie lifetime in seconds. Falls back to the engine default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<u64>,
    /// Identifier reported to analytics. Reporting is skipped when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_tracking_id: Option<String>,
    #[serde(skip)]
    pub eligibility: Eligibility,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ExperimentError {
    #[error("experiment not found: {0}")]
    NotFound(String),
    #[error("duplicate experiment name: {0}")]
    DuplicateName(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Characters allowed in an experiment name. The name becomes part of the
/// cookie key and of the display classes, so it must stay a cookie token.
fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

impl Experiment {
    pub fn new(id: impl Into<String>, name: impl Into<String>, variants: Vec<Variant>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            variants,
            sections: default_sections(),
            max_age: None,
            external_tracking_id: None,
            eligibility: Eligibility::Always,
        }
    }

    pub fn with_sections(mut self, sections: usize) -> Self {
        self.sections = sections;
        self
    }

    pub fn with_max_age(mut self, max_age: u64) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn with_external_tracking_id(mut self, id: impl Into<String>) -> Self {
        self.external_tracking_id = Some(id.into());
        self
    }

    pub fn with_eligibility(mut self, eligibility: Eligibility) -> Self {
        self.eligibility = eligibility;
        self
    }

    /// Persistence key holding this experiment's token.
    pub fn cookie_name(&self) -> String {
        format!("exp-{}", self.name)
    }

    /// Display class for the variant at `index`.
    pub fn display_class(&self, index: usize) -> String {
        format!("exp-{}-{}", self.name, index)
    }

    pub fn validate(&self) -> Result<(), ExperimentError> {
        let invalid = |reason: String| {
            Err(ExperimentError::InvalidConfig(format!(
                "experiment '{}': {}",
                self.name, reason
            )))
        };

        if self.id.is_empty() {
            return invalid("id must not be empty".to_string());
        }
        if self.id.contains('.') {
            return invalid(format!("id '{}' must not contain '.'", self.id));
        }
        if self.name.is_empty() || !self.name.chars().all(is_name_char) {
            return invalid(
                "name must be non-empty and use only ASCII letters, digits, '_' or '-'"
                    .to_string(),
            );
        }
        if self.variants.is_empty() {
            return invalid("at least one variant is required".to_string());
        }
        if self.sections == 0 {
            return invalid("sections must be at least 1".to_string());
        }
        if self.sections > self.variants.len() {
            return invalid(format!(
                "sections ({}) exceeds variant count ({})",
                self.sections,
                self.variants.len()
            ));
        }
        for (index, variant) in self.variants.iter().enumerate() {
            let weight = variant.effective_weight();
            if !weight.is_finite() || weight < 0.0 {
                return invalid(format!(
                    "variant {} has weight {}, weights must be finite and non-negative",
                    index, weight
                ));
            }
        }
        let total: f64 = self.variants.iter().map(Variant::effective_weight).sum();
        if !total.is_finite() {
            return invalid("sum of variant weights must be finite".to_string());
        }
        Ok(())
    }
}
