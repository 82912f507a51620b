//! Batched, idempotent upsert of recommendation rows.
//!
//! Rows are keyed by `(user_id, item_id, model_version)`. Re-publishing the
//! same rows overwrites them. A failed chunk stops the run; chunks already
//! sent stay committed.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::PublisherConfig;
use crate::error::{RecoError, Result};
use crate::recommend::RecoRow;

/// Wire shape of one row for the `cf_recos` table.
#[derive(Debug, Serialize)]
pub struct UpsertRow<'a> {
    pub user_id: &'a str,
    pub media_item_id: &'a str,
    pub model_version: &'a str,
    pub rank: u32,
    pub score: f32,
}

/// A keyed store that accepts one chunk of rows per call.
pub trait UpsertStore {
    fn upsert(&self, rows: &[UpsertRow<'_>]) -> Result<()>;
}

/// PostgREST-style HTTP upsert (`POST /rest/v1/<table>?on_conflict=...`).
pub struct RestStore {
    agent: ureq::Agent,
    url: String,
    credential: String,
}

impl RestStore {
    pub fn new(config: &PublisherConfig) -> Result<Self> {
        config.validate()?;
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        let url = format!(
            "{}/rest/v1/{}?on_conflict={}",
            config.endpoint.trim_end_matches('/'),
            config.table,
            config.conflict_columns
        );
        Ok(RestStore {
            agent,
            url,
            credential: config.credential.clone(),
        })
    }
}

impl UpsertStore for RestStore {
    fn upsert(&self, rows: &[UpsertRow<'_>]) -> Result<()> {
        let response = self
            .agent
            .post(&self.url)
            .set("apikey", &self.credential)
            .set("Authorization", &format!("Bearer {}", self.credential))
            .set("Content-Type", "application/json")
            .set("Prefer", "resolution=merge-duplicates,return=minimal")
            .send_json(rows);

        match response {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(status, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                Err(RecoError::UpsertRejected { status, body })
            }
            Err(e) => Err(RecoError::Transport(Box::new(e))),
        }
    }
}

/// Row payload held by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub rank: u32,
    pub score: f32,
}

type RowKey = (String, String, String);

/// In-process keyed store. Used for dry runs and as a stand-in for the
/// remote table.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    rows: Arc<DashMap<RowKey, StoredRow>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, user_id: &str, item_id: &str, model_version: &str) -> Option<StoredRow> {
        let key = (user_id.to_string(), item_id.to_string(), model_version.to_string());
        self.rows.get(&key).map(|entry| entry.value().clone())
    }

    /// Number of stored rows for one model version.
    pub fn count_version(&self, model_version: &str) -> usize {
        self.rows.iter().filter(|e| e.key().2 == model_version).count()
    }
}

impl UpsertStore for MemoryStore {
    fn upsert(&self, rows: &[UpsertRow<'_>]) -> Result<()> {
        for row in rows {
            self.rows.insert(
                (
                    row.user_id.to_string(),
                    row.media_item_id.to_string(),
                    row.model_version.to_string(),
                ),
                StoredRow {
                    rank: row.rank,
                    score: row.score,
                },
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishReport {
    pub rows: usize,
    pub chunks: usize,
}

/// Upsert `rows` under `model_version` in chunks of `chunk_size`.
///
/// Each row is written with `model_version` as part of its key, whatever
/// version (if any) it already carried.
///
/// Args:
///     store: destination; called once per chunk, in order
///     rows: ranked rows, at most one per `(user_id, item_id)`
///     model_version: non-blank version label
///     chunk_size: rows per `upsert` call, at least 1
///
/// Returns:
///     Rows and chunks sent. A failing chunk stops the run with
///     `PublishAborted`, which records how many rows were already committed.
pub fn publish<S: UpsertStore + ?Sized>(
    store: &S,
    rows: &[RecoRow],
    model_version: &str,
    chunk_size: usize,
) -> Result<PublishReport> {
    if chunk_size == 0 {
        return Err(RecoError::InvalidArgument("chunk size must be at least 1".into()));
    }
    if model_version.trim().is_empty() {
        return Err(RecoError::InvalidArgument("model version must not be empty".into()));
    }

    let total_chunks = rows.len().div_ceil(chunk_size);
    let mut report = PublishReport::default();

    for (idx, chunk) in rows.chunks(chunk_size).enumerate() {
        let wire: Vec<UpsertRow<'_>> = chunk
            .iter()
            .map(|r| UpsertRow {
                user_id: &r.user_id,
                media_item_id: &r.item_id,
                model_version,
                rank: r.rank,
                score: r.score,
            })
            .collect();

        if let Err(e) = store.upsert(&wire) {
            error!(chunk = idx, committed = report.rows, error = %e, "upsert failed; aborting publish");
            return Err(RecoError::PublishAborted {
                chunk: idx,
                committed: report.rows,
                source: Box::new(e),
            });
        }
        report.rows += chunk.len();
        report.chunks += 1;
        debug!(chunk = idx + 1, of = total_chunks, rows = report.rows, "upserted chunk");
    }

    info!(rows = report.rows, chunks = report.chunks, model_version, "published recommendations");
    Ok(report)
}
