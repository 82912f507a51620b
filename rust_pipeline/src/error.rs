//! Error taxonomy for the recommendation pipeline.
//!
//! Fatal variants carry the concrete observed values (shapes, keys, missing
//! variables) so a bad upstream export can be diagnosed from the message alone.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Which side of the factorization an array belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Item,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Item => "item",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum RecoError {
    #[error("artifact has no {role} factor array (tried {tried:?}); found keys: {available:?}")]
    MissingFactors {
        role: Role,
        tried: Vec<&'static str>,
        available: Vec<String>,
    },

    #[error("array `{key}` must be 2D, got shape {shape:?}")]
    NotAMatrix { key: String, shape: Vec<usize> },

    #[error(
        "{role}_factors shape {shape:?} does not match {role} id count {expected} (artifact keys: {available:?})"
    )]
    ShapeMismatch {
        role: Role,
        shape: (usize, usize),
        expected: usize,
        available: Vec<String>,
    },

    #[error(
        "factor dimension mismatch: user_factors {user_shape:?}, item_factors {item_shape:?} (artifact keys: {available:?})"
    )]
    FactorWidthMismatch {
        user_shape: (usize, usize),
        item_shape: (usize, usize),
        available: Vec<String>,
    },

    #[error("{role} id `{id}` appears more than once (artifact keys: {available:?})")]
    DuplicateIds {
        role: Role,
        id: String,
        available: Vec<String>,
    },

    #[error("malformed array `{key}`: {reason}")]
    MalformedArray { key: String, reason: String },

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no events read from {}", path.display())]
    EmptyEventLog { path: PathBuf },

    #[error("no positive events found; cannot build a training matrix")]
    NoPositiveEvents,

    #[error("missing required configuration: {}", vars.join(", "))]
    MissingConfig { vars: Vec<&'static str> },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("upsert rejected (HTTP {status}): {body}")]
    UpsertRejected { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] Box<ureq::Error>),

    #[error("publish aborted at chunk {chunk} after {committed} committed rows: {source}")]
    PublishAborted {
        chunk: usize,
        committed: usize,
        #[source]
        source: Box<RecoError>,
    },
}

impl RecoError {
    pub(crate) fn malformed(key: &str, reason: impl Into<String>) -> Self {
        RecoError::MalformedArray {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RecoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_mismatch_names_observed_values() {
        let err = RecoError::ShapeMismatch {
            role: Role::Item,
            shape: (4, 8),
            expected: 5,
            available: vec!["U".into(), "V".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("item_factors shape (4, 8)"));
        assert!(msg.contains("item id count 5"));
        assert!(msg.contains("\"U\""));
    }

    #[test]
    fn missing_config_lists_every_variable() {
        let err = RecoError::MissingConfig {
            vars: vec!["SUPABASE_URL", "SUPABASE_SERVICE_ROLE_KEY"],
        };
        assert_eq!(
            err.to_string(),
            "missing required configuration: SUPABASE_URL, SUPABASE_SERVICE_ROLE_KEY"
        );
    }
}
