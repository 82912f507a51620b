//! Runtime configuration.
//!
//! Nothing below the binary reads the environment: the publisher and the
//! recommender receive these values explicitly.

use std::time::Duration;

use crate::error::{RecoError, Result};
use crate::recommend::Similarity;
use crate::seen::SeenPolicy;

pub const ENV_URL: &str = "SUPABASE_URL";
pub const ENV_URL_FALLBACK: &str = "SUPABASE_PROJECT_URL";
pub const ENV_SERVICE_KEY: &str = "SUPABASE_SERVICE_ROLE_KEY";

pub const DEFAULT_TABLE: &str = "cf_recos";
pub const DEFAULT_CONFLICT_COLUMNS: &str = "user_id,media_item_id,model_version";
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_K: usize = 200;

/// Where and how recommendation rows are upserted.
#[derive(Clone)]
pub struct PublisherConfig {
    pub endpoint: String,
    pub credential: String,
    pub table: String,
    /// Comma-separated key columns used for conflict resolution.
    pub conflict_columns: String,
    pub chunk_size: usize,
    pub timeout: Duration,
}

impl std::fmt::Debug for PublisherConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublisherConfig")
            .field("endpoint", &self.endpoint)
            .field("credential", &"<redacted>")
            .field("table", &self.table)
            .field("conflict_columns", &self.conflict_columns)
            .field("chunk_size", &self.chunk_size)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl PublisherConfig {
    pub fn new(endpoint: impl Into<String>, credential: impl Into<String>) -> Self {
        PublisherConfig {
            endpoint: endpoint.into(),
            credential: credential.into(),
            table: DEFAULT_TABLE.to_string(),
            conflict_columns: DEFAULT_CONFLICT_COLUMNS.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Build from a variable lookup. Blank values count as missing, and every
    /// missing variable is reported at once.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let endpoint = get(ENV_URL).or_else(|| get(ENV_URL_FALLBACK));
        let credential = get(ENV_SERVICE_KEY);

        match (endpoint, credential) {
            (Some(endpoint), Some(credential)) => Ok(PublisherConfig::new(endpoint, credential)),
            (endpoint, credential) => {
                let mut vars = Vec::new();
                if endpoint.is_none() {
                    vars.push(ENV_URL);
                }
                if credential.is_none() {
                    vars.push(ENV_SERVICE_KEY);
                }
                Err(RecoError::MissingConfig { vars })
            }
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Validate values that came from outside.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RecoError::InvalidArgument("chunk size must be at least 1".into()));
        }
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(RecoError::InvalidArgument(format!(
                "store endpoint must be an http(s) URL, got `{}`",
                self.endpoint
            )));
        }
        Ok(())
    }
}

/// Knobs for one recommendation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecommendConfig {
    pub k: usize,
    pub similarity: Similarity,
    pub seen_policy: SeenPolicy,
}

impl Default for RecommendConfig {
    fn default() -> Self {
        RecommendConfig {
            k: DEFAULT_K,
            similarity: Similarity::Dot,
            seen_policy: SeenPolicy::AllInteractions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn reads_primary_and_fallback_url() {
        let cfg = PublisherConfig::from_lookup(lookup(&[
            (ENV_URL_FALLBACK, "https://proj.example.co"),
            (ENV_SERVICE_KEY, "secret"),
        ]))
        .unwrap();
        assert_eq!(cfg.endpoint, "https://proj.example.co");
        assert_eq!(cfg.chunk_size, DEFAULT_CHUNK_SIZE);

        let cfg = PublisherConfig::from_lookup(lookup(&[
            (ENV_URL, "https://a.example.co"),
            (ENV_URL_FALLBACK, "https://b.example.co"),
            (ENV_SERVICE_KEY, "secret"),
        ]))
        .unwrap();
        assert_eq!(cfg.endpoint, "https://a.example.co");
    }

    #[test]
    fn reports_every_missing_variable() {
        match PublisherConfig::from_lookup(lookup(&[(ENV_SERVICE_KEY, "  ")])) {
            Err(RecoError::MissingConfig { vars }) => assert_eq!(vars, vec![ENV_URL, ENV_SERVICE_KEY]),
            other => panic!("expected MissingConfig, got {other:?}"),
        }
    }

    #[test]
    fn debug_output_hides_credential() {
        let cfg = PublisherConfig::new("https://x.example.co", "topsecret");
        assert!(!format!("{cfg:?}").contains("topsecret"));
    }

    #[test]
    fn validate_rejects_zero_chunks_and_bad_urls() {
        assert!(PublisherConfig::new("https://x", "k").validate().is_ok());
        assert!(PublisherConfig::new("https://x", "k").with_chunk_size(0).validate().is_err());
        assert!(PublisherConfig::new("ftp://x", "k").validate().is_err());
    }
}
