//! Collaborative-filtering recommendation publishing.
//!
//! Turns an interaction log plus an ALS factor artifact into a ranked Top-K
//! list per user and upserts it to a keyed store:
//!   - events: tolerant JSONL ingestion, positive-signal classification
//!   - loader: `.npz` factor loading with transpose/swap reconciliation
//!   - seen: per-user seen-item index
//!   - recommend: dot/cosine Top-K with seen-item exclusion (rayon)
//!   - publish: chunked idempotent upsert (HTTP or in-memory)
//!   - training: confidence matrix for the external ALS trainer
//!
//! Build the Python extension with `maturin develop --release --features extension-module`.

pub mod artifact;
pub mod config;
pub mod error;
pub mod events;
pub mod loader;
pub mod matrix;
pub mod npy;
pub mod pickle;
pub mod pipeline;
pub mod publish;
pub mod recommend;
pub mod seen;
pub mod training;

#[cfg(feature = "python")]
mod python;

pub use config::{PublisherConfig, RecommendConfig};
pub use error::{RecoError, Result, Role};
pub use events::{Event, SignalPolicy};
pub use loader::{load_factor_model, FactorModel, LoadReport};
pub use publish::{publish, MemoryStore, PublishReport, RestStore, UpsertStore};
pub use recommend::{RecoRow, Recommender, Similarity};
pub use seen::{SeenMap, SeenPolicy};
