//! Per-user Top-K generation over factor embeddings.
//!
//! For each user: score every item against the user vector, mask the items
//! the user has already seen, keep the `k` best and emit them with dense
//! 1-based ranks. Users are independent, so blocks are computed in parallel
//! with rayon; output order still follows the input user order.

use std::cmp::Ordering;
use std::str::FromStr;

use ahash::AHashMap;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::loader::FactorModel;
use crate::matrix::Matrix;
use crate::seen::SeenMap;

/// Score assigned to masked items. Masked items are also dropped from the
/// candidate set, so the value only matters to code inspecting raw scores.
pub const MASKED_SCORE: f32 = -1e9;

/// Added to vector norms in the cosine variant.
pub const COSINE_EPS: f32 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Similarity {
    #[default]
    Dot,
    Cosine,
}

impl FromStr for Similarity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dot" => Ok(Similarity::Dot),
            "cosine" => Ok(Similarity::Cosine),
            other => Err(format!("unknown similarity `{other}` (expected `dot` or `cosine`)")),
        }
    }
}

/// One ranked recommendation. `model_version` is stamped by the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoRow {
    pub user_id: String,
    pub item_id: String,
    pub rank: u32,
    pub score: f32,
    pub model_version: Option<String>,
}

/// Set `model_version` on every row.
pub fn stamp_model_version(rows: &mut [RecoRow], model_version: &str) {
    for row in rows {
        row.model_version = Some(model_version.to_string());
    }
}

#[inline]
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Descending score, then ascending item index. NaN sorts last.
#[inline]
fn by_score_desc(a: &(usize, f32), b: &(usize, f32)) -> Ordering {
    let sa = if a.1.is_nan() { f32::NEG_INFINITY } else { a.1 };
    let sb = if b.1.is_nan() { f32::NEG_INFINITY } else { b.1 };
    sb.total_cmp(&sa).then_with(|| a.0.cmp(&b.0))
}

/// Indices and scores of the `k` best eligible entries, best first.
///
/// Ties resolve to the lower item index, so the result is identical across
/// runs.
///
/// Args:
///     scores: one score per item, indexed like the item factor rows
///     masked: `masked[j] == true` removes item `j` from the candidates;
///         shorter than `scores` means the tail is unmasked
///     k: maximum number of entries to return
///
/// Returns:
///     `(item_index, score)` pairs, at most `min(k, unmasked items)` long.
pub fn select_top_k(scores: &[f32], masked: &[bool], k: usize) -> Vec<(usize, f32)> {
    if k == 0 {
        return Vec::new();
    }
    let mut candidates: Vec<(usize, f32)> = scores
        .iter()
        .copied()
        .enumerate()
        .filter(|(j, _)| !masked.get(*j).copied().unwrap_or(false))
        .collect();

    let take = k.min(candidates.len());
    if take == 0 {
        return Vec::new();
    }
    if take < candidates.len() {
        candidates.select_nth_unstable_by(take - 1, by_score_desc);
        candidates.truncate(take);
    }
    candidates.sort_unstable_by(by_score_desc);
    candidates
}

/// Scores one user against all items and ranks the result.
pub struct Recommender<'m> {
    model: &'m FactorModel,
    similarity: Similarity,
    /// Unit-normalized item factors, only for the cosine variant.
    item_unit: Option<Matrix<f32>>,
    user_index: AHashMap<&'m str, usize>,
    item_index: AHashMap<&'m str, usize>,
}

impl<'m> Recommender<'m> {
    pub fn new(model: &'m FactorModel, similarity: Similarity) -> Self {
        let item_unit = match similarity {
            Similarity::Dot => None,
            Similarity::Cosine => Some(model.item_factors.normalize_rows(COSINE_EPS)),
        };
        Recommender {
            model,
            similarity,
            item_unit,
            user_index: index_of(&model.user_ids),
            item_index: index_of(&model.item_ids),
        }
    }

    /// Raw affinity of user row `u` with every item.
    pub fn scores(&self, u: usize) -> Vec<f32> {
        let user_vec = self.model.user_factors.row(u);
        match (&self.item_unit, self.similarity) {
            (Some(items), Similarity::Cosine) => {
                let norm = user_vec.iter().map(|x| x * x).sum::<f32>().sqrt() + COSINE_EPS;
                let unit: Vec<f32> = user_vec.iter().map(|x| x / norm).collect();
                items.rows().map(|item| dot(&unit, item)).collect()
            }
            _ => self.model.item_factors.rows().map(|item| dot(user_vec, item)).collect(),
        }
    }

    /// Seen items of `user_id` as an item-aligned mask. Items absent from
    /// the model are ignored.
    fn seen_mask(&self, user_id: &str, seen: &SeenMap) -> Vec<bool> {
        let mut mask = vec![false; self.model.n_items()];
        if let Some(items) = seen.items(user_id) {
            for item_id in items {
                if let Some(&j) = self.item_index.get(item_id.as_str()) {
                    mask[j] = true;
                }
            }
        }
        mask
    }

    /// Ranked rows for one user.
    ///
    /// Args:
    ///     user_id: model user id
    ///     seen: items to exclude, looked up under `user_id`
    ///     k: rows wanted
    ///
    /// Returns:
    ///     Rows with ranks `1..=n`, `n <= k`, without `model_version`. Empty
    ///     if the user has no factor row or `k == 0`.
    pub fn recommend_user(&self, user_id: &str, seen: &SeenMap, k: usize) -> Vec<RecoRow> {
        if k == 0 {
            return Vec::new();
        }
        let Some(&u) = self.user_index.get(user_id) else {
            warn!(user_id, "user has no factor row; skipping");
            return Vec::new();
        };

        let mut scores = self.scores(u);
        let mask = self.seen_mask(user_id, seen);
        for (score, &is_seen) in scores.iter_mut().zip(&mask) {
            if is_seen {
                *score = MASKED_SCORE;
            }
        }

        select_top_k(&scores, &mask, k)
            .into_iter()
            .enumerate()
            .map(|(pos, (j, score))| RecoRow {
                user_id: user_id.to_string(),
                item_id: self.model.item_ids[j].clone(),
                rank: pos as u32 + 1,
                score,
                model_version: None,
            })
            .collect()
    }

    /// Rows for every user in `users`, one contiguous block per user in
    /// input order.
    pub fn recommend<S: AsRef<str> + Sync>(&self, users: &[S], seen: &SeenMap, k: usize) -> Vec<RecoRow> {
        let rows: Vec<RecoRow> = users
            .par_iter()
            .flat_map_iter(|user| self.recommend_user(user.as_ref(), seen, k))
            .collect();
        info!(
            users = users.len(),
            rows = rows.len(),
            k,
            similarity = ?self.similarity,
            "generated recommendations"
        );
        rows
    }
}

fn index_of(ids: &[String]) -> AHashMap<&str, usize> {
    let mut index = AHashMap::with_capacity(ids.len());
    for (i, id) in ids.iter().enumerate() {
        index.entry(id.as_str()).or_insert(i);
    }
    index
}

/// Model users that also appear in the interaction log, in model order. When
/// none overlap, every model user is returned.
pub fn target_users<'m>(model: &'m FactorModel, active: impl Fn(&str) -> bool) -> Vec<&'m str> {
    let active_users: Vec<&str> = model
        .user_ids
        .iter()
        .map(String::as_str)
        .filter(|u| active(*u))
        .collect();
    if active_users.is_empty() {
        info!("no model user appears in the event log; recommending for all model users");
        model.user_ids.iter().map(String::as_str).collect()
    } else {
        active_users
    }
}
