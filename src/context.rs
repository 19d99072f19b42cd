//! Per-request data handed to eligibility predicates.

use std::collections::HashMap;

use http::HeaderMap;

/// Built fresh for every request and never shared between requests.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub headers: HeaderMap,
    pub path: String,
    /// Host-supplied facts about the visitor (locale, account tier, ...).
    pub attributes: HashMap<String, serde_json::Value>,
}

impl RequestContext {
    pub fn new(headers: HeaderMap, path: impl Into<String>) -> Self {
        Self {
            headers,
            path: path.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Shorthand for predicates that target devices or clients.
    pub fn user_agent(&self) -> Option<&str> {
        self.header(http::header::USER_AGENT.as_str())
    }

    pub fn attribute(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes.get(key)
    }
}
