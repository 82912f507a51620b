//! Input preparation for the external ALS trainer.
//!
//! The trainer consumes a sparse user x item confidence matrix. Confidence is
//! binary (positive signal or not) scaled by a constant `alpha`; repeated
//! positives for the same pair do not accumulate.

use ahash::{AHashMap, AHashSet};
use tracing::info;

use crate::error::{RecoError, Result};
use crate::events::{Event, SignalPolicy};

pub const DEFAULT_ALPHA: f32 = 20.0;

/// COO triplets plus the id order that defines row and column indices.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceMatrix {
    /// Row `i` belongs to `user_ids[i]`; ids are in first-seen order.
    pub user_ids: Vec<String>,
    pub item_ids: Vec<String>,
    pub rows: Vec<u32>,
    pub cols: Vec<u32>,
    pub values: Vec<f32>,
}

impl ConfidenceMatrix {
    pub fn shape(&self) -> (usize, usize) {
        (self.user_ids.len(), self.item_ids.len())
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }
}

/// Dense index assignment in first-seen order.
#[derive(Default)]
struct Interner {
    index: AHashMap<String, u32>,
    order: Vec<String>,
}

impl Interner {
    fn intern(&mut self, id: &str) -> u32 {
        if let Some(&i) = self.index.get(id) {
            return i;
        }
        let i = self.order.len() as u32;
        self.index.insert(id.to_string(), i);
        self.order.push(id.to_string());
        i
    }
}

/// Build the confidence matrix from the positive events of `events`.
///
/// Args:
///     events: parsed interaction log
///     signal: decides which events are positive
///     alpha: confidence given to every positive pair, finite and > 0
///
/// Returns:
///     COO triplets sorted by `(row, col)`, or `NoPositiveEvents`.
pub fn build_confidence_matrix(events: &[Event], signal: &SignalPolicy, alpha: f32) -> Result<ConfidenceMatrix> {
    if !alpha.is_finite() || alpha <= 0.0 {
        return Err(RecoError::InvalidArgument(format!("alpha must be positive, got {alpha}")));
    }

    let mut users = Interner::default();
    let mut items = Interner::default();
    let mut pairs: AHashSet<(u32, u32)> = AHashSet::new();

    for event in events.iter().filter(|e| signal.is_positive(e)) {
        let u = users.intern(&event.user_id);
        let i = items.intern(&event.item_id);
        pairs.insert((u, i));
    }

    if pairs.is_empty() {
        return Err(RecoError::NoPositiveEvents);
    }

    let mut coords: Vec<(u32, u32)> = pairs.into_iter().collect();
    coords.sort_unstable();

    let matrix = ConfidenceMatrix {
        user_ids: users.order,
        item_ids: items.order,
        rows: coords.iter().map(|&(u, _)| u).collect(),
        cols: coords.iter().map(|&(_, i)| i).collect(),
        values: vec![alpha; coords.len()],
    };
    info!(
        users = matrix.user_ids.len(),
        items = matrix.item_ids.len(),
        nnz = matrix.nnz(),
        "built confidence matrix"
    );
    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_positive_pairs_once() {
        let events = vec![
            Event::new("u1", "a", "like"),
            Event::new("u1", "a", "more_like_this"),
            Event::new("u2", "b", "view"),
            Event::new("u2", "c", "rate").with_rating(8.0),
            Event::new("u1", "c", "watchlist"),
        ];
        let m = build_confidence_matrix(&events, &SignalPolicy::default(), 20.0).unwrap();
        assert_eq!(m.user_ids, vec!["u1", "u2"]);
        assert_eq!(m.item_ids, vec!["a", "c"]);
        assert_eq!(m.shape(), (2, 2));
        assert_eq!(m.rows, vec![0, 0, 1]);
        assert_eq!(m.cols, vec![0, 1, 1]);
        assert_eq!(m.values, vec![20.0; 3]);
    }

    #[test]
    fn no_positive_events_is_an_error() {
        let events = vec![Event::new("u1", "a", "view")];
        assert!(matches!(
            build_confidence_matrix(&events, &SignalPolicy::default(), DEFAULT_ALPHA),
            Err(RecoError::NoPositiveEvents)
        ));
    }

    #[test]
    fn alpha_must_be_positive() {
        let events = vec![Event::new("u1", "a", "like")];
        assert!(build_confidence_matrix(&events, &SignalPolicy::default(), 0.0).is_err());
        assert!(build_confidence_matrix(&events, &SignalPolicy::default(), f32::NAN).is_err());
    }
}
