//! Compact token persisted per experiment: `{experimentId}.{idx1}-{idx2}-...`.
//!
//! Neither part is escaped. Experiment ids must not contain `.`, which
//! [`Experiment::validate`](super::config::Experiment::validate) enforces.

const ID_SEPARATOR: char = '.';
const INDEX_SEPARATOR: char = '-';

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedToken {
    pub experiment_id: Option<String>,
    /// Raw indexes in token order. Not checked against any experiment.
    pub indexes: Vec<usize>,
}

pub fn encode(experiment_id: &str, indexes: &[usize]) -> String {
    let joined = indexes
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(&INDEX_SEPARATOR.to_string());
    format!("{}{}{}", experiment_id, ID_SEPARATOR, joined)
}

/// Decode a token. Malformed input yields an empty [`DecodedToken`], never an error.
pub fn decode(token: &str) -> DecodedToken {
    match try_decode(token) {
        Some(decoded) => decoded,
        None => {
            if !token.is_empty() {
                tracing::debug!(token, "ignoring malformed experiment token");
            }
            DecodedToken::default()
        }
    }
}

fn try_decode(token: &str) -> Option<DecodedToken> {
    let (id, rest) = token.split_once(ID_SEPARATOR)?;
    if id.is_empty() {
        return None;
    }
    let indexes = if rest.is_empty() {
        Vec::new()
    } else {
        rest.split(INDEX_SEPARATOR)
            .map(parse_index)
            .collect::<Option<Vec<_>>>()?
    };
    Some(DecodedToken {
        experiment_id: Some(id.to_string()),
        indexes,
    })
}

fn parse_index(segment: &str) -> Option<usize> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}
