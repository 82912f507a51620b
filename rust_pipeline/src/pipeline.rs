//! End-to-end runs: events + factor artifact -> ranked rows -> store.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use ahash::AHashSet;
use tracing::info;

use crate::artifact::FactorArtifact;
use crate::config::{PublisherConfig, RecommendConfig};
use crate::error::{RecoError, Result};
use crate::events::{read_events_jsonl, Event, SignalPolicy};
use crate::loader::{load_factor_model, load_from_artifact, FactorModel, LoadReport};
use crate::publish::{publish, MemoryStore, PublishReport, RestStore};
use crate::recommend::{stamp_model_version, target_users, RecoRow, Recommender};
use crate::seen::SeenMap;

/// Rows for every model user active in `events`, seen items excluded
/// according to `config.seen_policy`.
pub fn generate_rows(
    events: &[Event],
    model: &FactorModel,
    config: &RecommendConfig,
    signal: &SignalPolicy,
) -> Vec<RecoRow> {
    let seen = SeenMap::build(events, config.seen_policy, signal);
    info!(
        policy = ?config.seen_policy,
        users = seen.n_users(),
        pairs = seen.n_pairs(),
        "built seen-item index"
    );

    let active: AHashSet<&str> = events.iter().map(|e| e.user_id.as_str()).collect();
    let users = target_users(model, |u| active.contains(u));

    Recommender::new(model, config.similarity).recommend(&users, &seen, config.k)
}

pub fn write_rows_jsonl(path: &Path, rows: &[RecoRow]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for row in rows {
        serde_json::to_writer(&mut out, row)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PublishRun {
    pub events: PathBuf,
    pub model: PathBuf,
    pub model_version: String,
    pub recommend: RecommendConfig,
    pub signal: SignalPolicy,
    pub output: Option<PathBuf>,
}

/// Where rows go at the end of a run.
#[derive(Debug, Clone)]
pub enum Destination {
    /// Upsert into the in-process store only.
    DryRun { chunk_size: usize },
    Remote(PublisherConfig),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub users: usize,
    pub items: usize,
    pub rows: usize,
    pub published: PublishReport,
    /// Distinct `(user, item, version)` keys after the upsert; only known for
    /// dry runs.
    pub distinct_keys: Option<usize>,
}

/// Load the log and the model, rank, optionally write JSONL, then publish.
///
/// Args:
///     run: input paths, model version and ranking knobs
///     destination: in-memory dry run or the remote store
///
/// Returns:
///     Counts for the run. Fails before reading any input when the remote
///     configuration is invalid, and with `EmptyEventLog` when the log holds
///     no usable events.
pub fn run_publish(run: &PublishRun, destination: &Destination) -> Result<RunSummary> {
    if let Destination::Remote(config) = destination {
        config.validate()?;
    }

    let ingest = read_events_jsonl(&run.events)?;
    if ingest.events.is_empty() {
        return Err(RecoError::EmptyEventLog {
            path: run.events.clone(),
        });
    }

    let model = load_factor_model(&run.model)?;
    let mut rows = generate_rows(&ingest.events, &model, &run.recommend, &run.signal);
    stamp_model_version(&mut rows, &run.model_version);

    let users = rows
        .iter()
        .map(|r| r.user_id.as_str())
        .collect::<AHashSet<_>>()
        .len();
    info!(
        rows = rows.len(),
        users,
        items = model.n_items(),
        "prepared recommendation rows"
    );

    if let Some(path) = &run.output {
        write_rows_jsonl(path, &rows)?;
        info!(path = %path.display(), "wrote rows");
    }

    let (published, distinct_keys) = match destination {
        Destination::DryRun { chunk_size } => {
            let store = MemoryStore::new();
            let report = publish(&store, &rows, &run.model_version, *chunk_size)?;
            (report, Some(store.len()))
        }
        Destination::Remote(config) => {
            let store = RestStore::new(config)?;
            (publish(&store, &rows, &run.model_version, config.chunk_size)?, None)
        }
    };

    Ok(RunSummary {
        users,
        items: model.n_items(),
        rows: rows.len(),
        published,
        distinct_keys,
    })
}

/// One stored array as seen by `inspect`.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayInfo {
    pub key: String,
    /// `Err` carries the decode failure for that member.
    pub layout: std::result::Result<(String, Vec<usize>), String>,
}

#[derive(Debug)]
pub struct ArtifactDescription {
    pub arrays: Vec<ArrayInfo>,
    /// Outcome of a full load, including which heuristics fired.
    pub load: Result<(LoadReport, (usize, usize), (usize, usize))>,
}

pub fn describe_artifact(path: &Path) -> Result<ArtifactDescription> {
    let artifact = FactorArtifact::open(path)?;
    let arrays = artifact
        .keys()
        .into_iter()
        .map(|key| {
            let layout = match artifact.array(&key) {
                Some(Ok(arr)) => Ok((arr.descr, arr.shape)),
                Some(Err(e)) => Err(e.to_string()),
                None => Err("missing".to_string()),
            };
            ArrayInfo { key, layout }
        })
        .collect();

    let load = load_from_artifact(&artifact).map(|model| {
        (
            model.report.clone(),
            model.user_factors.shape(),
            model.item_factors.shape(),
        )
    });

    Ok(ArtifactDescription { arrays, load })
}
