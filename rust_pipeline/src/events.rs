//! Interaction log ingestion.
//!
//! The log is newline-delimited JSON written by several generations of
//! exporters, so each logical field is looked up through an ordered alias
//! list. Lines that cannot be parsed, or that lack a user, item or event type,
//! are dropped and counted rather than failing the run.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use ahash::AHashSet;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::Result;

pub const USER_ID_ALIASES: &[&str] = &["user_id", "user", "uid"];
pub const ITEM_ID_ALIASES: &[&str] = &["media_item_id", "item_id", "mediaId"];
pub const EVENT_TYPE_ALIASES: &[&str] = &["event_type", "type"];
pub const RATING_ALIASES: &[&str] = &["rating_0_10", "rating"];

/// Event types that are positive on their own. `rating_set` is not listed:
/// a rating counts only when it reaches [`DEFAULT_RATING_THRESHOLD`].
pub const DEFAULT_POSITIVE_EVENTS: &[&str] = &["like", "more_like_this", "watchlist", "watchlist_add"];
pub const DEFAULT_RATING_THRESHOLD: f64 = 7.0;

/// One parsed interaction. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub user_id: String,
    pub item_id: String,
    pub event_type: String,
    /// Rating on a 0-10 scale, when present and numeric.
    pub rating: Option<f64>,
}

impl Event {
    pub fn new(user_id: impl Into<String>, item_id: impl Into<String>, event_type: impl Into<String>) -> Self {
        Event {
            user_id: user_id.into(),
            item_id: item_id.into(),
            event_type: event_type.into(),
            rating: None,
        }
    }

    pub fn with_rating(mut self, rating: f64) -> Self {
        self.rating = Some(rating);
        self
    }
}

/// Decides whether an event counts as a positive signal.
#[derive(Debug, Clone)]
pub struct SignalPolicy {
    positive_types: AHashSet<String>,
    rating_threshold: f64,
}

impl Default for SignalPolicy {
    fn default() -> Self {
        SignalPolicy::new(DEFAULT_POSITIVE_EVENTS.iter().copied(), DEFAULT_RATING_THRESHOLD)
    }
}

impl SignalPolicy {
    pub fn new<'a>(positive_types: impl IntoIterator<Item = &'a str>, rating_threshold: f64) -> Self {
        SignalPolicy {
            positive_types: positive_types.into_iter().map(str::to_string).collect(),
            rating_threshold,
        }
    }

    /// Positive when the event type is in the positive set, or the rating
    /// reaches the threshold.
    pub fn is_positive(&self, event: &Event) -> bool {
        if self.positive_types.contains(event.event_type.as_str()) {
            return true;
        }
        matches!(event.rating, Some(r) if r.is_finite() && r >= self.rating_threshold)
    }
}

/// Outcome of reading a whole log.
#[derive(Debug, Default)]
pub struct IngestSummary {
    pub events: Vec<Event>,
    /// Non-blank lines that were unparsable or missing a required field.
    pub skipped: usize,
}

/// Text form of a scalar JSON value. Objects, arrays, null and booleans do not
/// count as identifiers.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First alias whose value is a non-empty scalar after trimming.
fn first_present(obj: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    aliases
        .iter()
        .filter_map(|key| obj.get(*key))
        .filter_map(scalar_text)
        .find(|s| !s.is_empty())
}

fn parse_rating(obj: &Map<String, Value>) -> Option<f64> {
    RATING_ALIASES.iter().filter_map(|key| obj.get(*key)).find_map(|v| {
        let n = match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }?;
        n.is_finite().then_some(n)
    })
}

/// Parse a single log line. `None` for blank, malformed or incomplete records.
pub fn parse_event_line(line: &str) -> Option<Event> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let value: Value = serde_json::from_str(line).ok()?;
    let obj = value.as_object()?;

    Some(Event {
        user_id: first_present(obj, USER_ID_ALIASES)?,
        item_id: first_present(obj, ITEM_ID_ALIASES)?,
        event_type: first_present(obj, EVENT_TYPE_ALIASES)?,
        rating: parse_rating(obj),
    })
}

pub fn read_events<R: BufRead>(reader: R) -> Result<IngestSummary> {
    let mut summary = IngestSummary::default();

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_event_line(&line) {
            Some(event) => summary.events.push(event),
            None => {
                debug!(line = lineno + 1, "skipping malformed interaction record");
                summary.skipped += 1;
            }
        }
    }

    if summary.skipped > 0 {
        warn!(
            skipped = summary.skipped,
            kept = summary.events.len(),
            "dropped malformed interaction records"
        );
    }
    Ok(summary)
}

pub fn read_events_jsonl(path: &Path) -> Result<IngestSummary> {
    let file = File::open(path)?;
    read_events(BufReader::new(file))
}
