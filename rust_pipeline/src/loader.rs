//! Factor model loading and layout reconciliation.
//!
//! Exported ALS artifacts are not trustworthy about their layout: factors may
//! be stored transposed, user and item roles may be swapped, and ids may live
//! under any of several historical keys or be missing entirely. Loading runs a
//! fixed sequence of small steps, each a pure function over the previous
//! step's output:
//!
//! 1. locate the user and item factor arrays by alias
//! 2. locate the id lists by alias, synthesizing positional ids if absent
//! 3. transpose each matrix whose columns, not rows, match its id count
//! 4. swap the two matrices if that (and only that) makes both match
//! 5. validate row counts and factor width
//! 6. cast to `f32`

use std::path::Path;

use ahash::AHashSet;
use tracing::{info, warn};

use crate::artifact::FactorArtifact;
use crate::error::{RecoError, Result, Role};
use crate::matrix::Matrix;
use crate::npy::NdArray;

pub const USER_FACTOR_ALIASES: &[&str] = &["user_factors", "U", "user_emb", "user_embeddings"];
pub const ITEM_FACTOR_ALIASES: &[&str] = &["item_factors", "V", "item_emb", "item_embeddings"];
pub const USER_ID_ALIASES: &[&str] = &["users", "user_ids", "uids"];
pub const ITEM_ID_ALIASES: &[&str] = &["items", "item_ids", "iids"];

fn factor_aliases(role: Role) -> &'static [&'static str] {
    match role {
        Role::User => USER_FACTOR_ALIASES,
        Role::Item => ITEM_FACTOR_ALIASES,
    }
}

fn id_aliases(role: Role) -> &'static [&'static str] {
    match role {
        Role::User => USER_ID_ALIASES,
        Role::Item => ITEM_ID_ALIASES,
    }
}

/// Ordered entity ids for one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdList {
    pub ids: Vec<String>,
    /// Artifact key the ids came from; `None` when they were synthesized.
    pub source: Option<&'static str>,
}

impl IdList {
    pub fn is_synthesized(&self) -> bool {
        self.source.is_none()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// `"0".."n-1"`. Results published with these ids are tied to this
    /// artifact's row order.
    pub fn positional(n: usize) -> Self {
        IdList {
            ids: (0..n).map(|i| i.to_string()).collect(),
            source: None,
        }
    }
}

/// Which reconciliation heuristics changed the stored layout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub user_factor_key: &'static str,
    pub item_factor_key: &'static str,
    pub user_transposed: bool,
    pub item_transposed: bool,
    pub swapped: bool,
    pub user_ids_synthesized: bool,
    pub item_ids_synthesized: bool,
}

/// Canonical factor model: `user_factors[i]` is the vector of `user_ids[i]`,
/// likewise for items, and both matrices share the factor width.
#[derive(Debug, Clone)]
pub struct FactorModel {
    pub user_factors: Matrix<f32>,
    pub item_factors: Matrix<f32>,
    pub user_ids: Vec<String>,
    pub item_ids: Vec<String>,
    pub report: LoadReport,
}

impl FactorModel {
    pub fn n_users(&self) -> usize {
        self.user_ids.len()
    }

    pub fn n_items(&self) -> usize {
        self.item_ids.len()
    }

    pub fn n_factors(&self) -> usize {
        self.user_factors.n_cols()
    }
}

/// Step 1.
pub fn locate_factors(artifact: &FactorArtifact, role: Role) -> Result<(&'static str, Matrix<f64>)> {
    let aliases = factor_aliases(role);
    let (key, array) = artifact
        .pick_first(aliases)
        .ok_or_else(|| RecoError::MissingFactors {
            role,
            tried: aliases.to_vec(),
            available: artifact.keys(),
        })?;
    Ok((key, as_matrix(key, &array?)?))
}

fn as_matrix(key: &str, array: &NdArray) -> Result<Matrix<f64>> {
    if array.ndim() != 2 {
        return Err(RecoError::NotAMatrix {
            key: key.to_string(),
            shape: array.shape.clone(),
        });
    }
    let values = array
        .as_f64()
        .ok_or_else(|| RecoError::malformed(key, format!("factor array has non-numeric dtype `{}`", array.descr)))?;
    Matrix::from_vec(array.shape[0], array.shape[1], values)
        .ok_or_else(|| RecoError::malformed(key, "element count does not match shape"))
}

/// Step 2. `stored_rows` is the factor matrix's first dimension as stored,
/// used to size positional ids when the artifact carries none.
pub fn locate_ids(artifact: &FactorArtifact, role: Role, stored_rows: usize) -> Result<IdList> {
    if let Some((key, array)) = artifact.pick_first(id_aliases(role)) {
        let ids = array?.to_text();
        if !ids.is_empty() {
            ensure_unique(artifact, role, &ids)?;
            return Ok(IdList {
                ids,
                source: Some(key),
            });
        }
    }

    warn!(
        role = %role,
        count = stored_rows,
        "artifact has no {role} ids; using positional ids, published rows will not be portable across exports"
    );
    Ok(IdList::positional(stored_rows))
}

/// Ids within a role must be unique; reports the first repeat.
fn ensure_unique(artifact: &FactorArtifact, role: Role, ids: &[String]) -> Result<()> {
    let mut seen = AHashSet::with_capacity(ids.len());
    match ids.iter().find(|id| !seen.insert(id.as_str())) {
        Some(id) => Err(RecoError::DuplicateIds {
            role,
            id: id.clone(),
            available: artifact.keys(),
        }),
        None => Ok(()),
    }
}

/// Step 3. Returns the matrix with `n_expected` rows when either axis allows
/// it, plus whether a transpose happened. Otherwise unchanged.
pub fn ensure_rows_first(mat: Matrix<f64>, n_expected: usize) -> (Matrix<f64>, bool) {
    let (rows, cols) = mat.shape();
    if rows == n_expected {
        (mat, false)
    } else if cols == n_expected {
        (mat.transpose(), true)
    } else {
        (mat, false)
    }
}

/// Step 4. Swaps roles only when neither matrix matches its own ids and both
/// would match the other side's.
pub fn reconcile_roles(
    user: Matrix<f64>,
    item: Matrix<f64>,
    n_users: usize,
    n_items: usize,
) -> (Matrix<f64>, Matrix<f64>, bool) {
    let user_rows = user.n_rows();
    let item_rows = item.n_rows();
    if user_rows != n_users && item_rows != n_items && user_rows == n_items && item_rows == n_users {
        (item, user, true)
    } else {
        (user, item, false)
    }
}

/// Step 5.
pub fn validate_shapes(
    user: &Matrix<f64>,
    item: &Matrix<f64>,
    n_users: usize,
    n_items: usize,
    available: &[String],
) -> Result<()> {
    if user.n_rows() != n_users {
        return Err(RecoError::ShapeMismatch {
            role: Role::User,
            shape: user.shape(),
            expected: n_users,
            available: available.to_vec(),
        });
    }
    if item.n_rows() != n_items {
        return Err(RecoError::ShapeMismatch {
            role: Role::Item,
            shape: item.shape(),
            expected: n_items,
            available: available.to_vec(),
        });
    }
    if user.n_cols() != item.n_cols() {
        return Err(RecoError::FactorWidthMismatch {
            user_shape: user.shape(),
            item_shape: item.shape(),
            available: available.to_vec(),
        });
    }
    Ok(())
}

/// Run every reconciliation step over an opened artifact.
///
/// Args:
///     artifact: archive holding factor arrays and, optionally, id arrays
///
/// Returns:
///     A model whose id lists are unique and index-aligned with the factor
///     rows, or the first step's error (`MissingFactors`, `DuplicateIds`,
///     `ShapeMismatch`, `FactorWidthMismatch`, `MalformedArray`, ...).
pub fn load_from_artifact(artifact: &FactorArtifact) -> Result<FactorModel> {
    let available = artifact.keys();

    let (user_key, user_raw) = locate_factors(artifact, Role::User)?;
    let (item_key, item_raw) = locate_factors(artifact, Role::Item)?;

    let user_ids = locate_ids(artifact, Role::User, user_raw.n_rows())?;
    let item_ids = locate_ids(artifact, Role::Item, item_raw.n_rows())?;

    let (user_mat, user_transposed) = ensure_rows_first(user_raw, user_ids.len());
    let (item_mat, item_transposed) = ensure_rows_first(item_raw, item_ids.len());
    if user_transposed {
        warn!(key = user_key, shape = ?user_mat.shape(), "user factors were stored transposed");
    }
    if item_transposed {
        warn!(key = item_key, shape = ?item_mat.shape(), "item factors were stored transposed");
    }

    let (user_mat, item_mat, swapped) = reconcile_roles(user_mat, item_mat, user_ids.len(), item_ids.len());
    if swapped {
        warn!(
            user_key,
            item_key, "user and item factors were stored under each other's names; swapped"
        );
    }

    validate_shapes(&user_mat, &item_mat, user_ids.len(), item_ids.len(), &available)?;

    let report = LoadReport {
        user_factor_key: user_key,
        item_factor_key: item_key,
        user_transposed,
        item_transposed,
        swapped,
        user_ids_synthesized: user_ids.is_synthesized(),
        item_ids_synthesized: item_ids.is_synthesized(),
    };

    let model = FactorModel {
        user_factors: user_mat.to_f32(),
        item_factors: item_mat.to_f32(),
        user_ids: user_ids.ids,
        item_ids: item_ids.ids,
        report,
    };
    info!(
        users = model.n_users(),
        items = model.n_items(),
        factors = model.n_factors(),
        "loaded factor model"
    );
    Ok(model)
}

pub fn load_factor_model(path: &Path) -> Result<FactorModel> {
    let artifact = FactorArtifact::open(path)?;
    load_from_artifact(&artifact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::npy::tests::npy_bytes;

    fn f32_matrix(rows: usize, cols: usize, seed: f32) -> Vec<u8> {
        let body: Vec<u8> = (0..rows * cols)
            .flat_map(|i| (seed + i as f32).to_le_bytes())
            .collect();
        npy_bytes("<f4", false, &[rows, cols], &body)
    }

    fn ids(prefix: &str, n: usize) -> Vec<u8> {
        let width = prefix.len() + 2;
        let mut body = Vec::new();
        for i in 0..n {
            let mut s = format!("{prefix}{i}").into_bytes();
            s.resize(width, 0);
            body.extend(s);
        }
        npy_bytes(&format!("|S{width}"), false, &[n], &body)
    }

    fn artifact(entries: Vec<(&str, Vec<u8>)>) -> FactorArtifact {
        FactorArtifact::from_entries(entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    #[test]
    fn canonical_layout_loads_unchanged() {
        let art = artifact(vec![
            ("user_factors", f32_matrix(3, 2, 0.0)),
            ("item_factors", f32_matrix(4, 2, 10.0)),
            ("users", ids("u", 3)),
            ("items", ids("i", 4)),
        ]);
        let model = load_from_artifact(&art).unwrap();
        assert_eq!(model.user_factors.shape(), (3, 2));
        assert_eq!(model.item_factors.shape(), (4, 2));
        assert_eq!(model.user_ids, vec!["u0", "u1", "u2"]);
        assert_eq!(model.item_factors.row(1), &[12.0, 13.0]);
        assert_eq!(model.report, LoadReport {
            user_factor_key: "user_factors",
            item_factor_key: "item_factors",
            ..LoadReport::default()
        });
    }

    #[test]
    fn transposed_matrix_is_fixed() {
        let art = artifact(vec![
            ("U", f32_matrix(2, 3, 0.0)),
            ("V", f32_matrix(4, 2, 0.0)),
            ("user_ids", ids("u", 3)),
            ("item_ids", ids("i", 4)),
        ]);
        let model = load_from_artifact(&art).unwrap();
        assert_eq!(model.user_factors.shape(), (3, 2));
        // stored row 0 was [0, 1, 2]; column 0 becomes user 0's vector
        assert_eq!(model.user_factors.row(0), &[0.0, 3.0]);
        assert!(model.report.user_transposed);
        assert!(!model.report.item_transposed);
    }

    #[test]
    fn swapped_roles_are_recovered() {
        let art = artifact(vec![
            ("user_factors", f32_matrix(5, 2, 100.0)),
            ("item_factors", f32_matrix(3, 2, 0.0)),
            ("users", ids("u", 3)),
            ("items", ids("i", 5)),
        ]);
        let model = load_from_artifact(&art).unwrap();
        assert!(model.report.swapped);
        assert_eq!(model.user_factors.shape(), (3, 2));
        assert_eq!(model.item_factors.shape(), (5, 2));
        assert_eq!(model.item_factors.row(0), &[100.0, 101.0]);
    }

    #[test]
    fn swap_requires_both_sides_to_mismatch() {
        let user = Matrix::from_vec(3, 1, vec![0.0; 3]).unwrap();
        let item = Matrix::from_vec(3, 1, vec![0.0; 3]).unwrap();
        let (_, _, swapped) = reconcile_roles(user, item, 3, 2);
        assert!(!swapped);
    }

    #[test]
    fn each_matrix_is_oriented_independently() {
        let art = artifact(vec![
            ("user_emb", f32_matrix(4, 2, 0.0)),
            ("item_emb", f32_matrix(4, 3, 0.0)),
            ("uids", ids("u", 2)),
            ("iids", ids("i", 3)),
        ]);
        let model = load_from_artifact(&art).unwrap();
        assert_eq!(model.user_factors.shape(), (2, 4));
        assert_eq!(model.item_factors.shape(), (3, 4));
        assert!(model.report.user_transposed);
        assert!(model.report.item_transposed);
        assert!(!model.report.swapped);
    }

    #[test]
    fn missing_ids_are_synthesized_from_stored_rows() {
        let art = artifact(vec![("U", f32_matrix(3, 2, 0.0)), ("V", f32_matrix(2, 2, 0.0))]);
        let model = load_from_artifact(&art).unwrap();
        assert_eq!(model.user_ids, vec!["0", "1", "2"]);
        assert_eq!(model.item_ids, vec!["0", "1"]);
        assert!(model.report.user_ids_synthesized);
        assert!(model.report.item_ids_synthesized);
    }

    #[test]
    fn missing_factor_array_is_fatal() {
        let art = artifact(vec![("U", f32_matrix(3, 2, 0.0)), ("meta", Vec::new())]);
        match load_from_artifact(&art) {
            Err(RecoError::MissingFactors { role, available, .. }) => {
                assert_eq!(role, Role::Item);
                assert_eq!(available, vec!["U", "meta"]);
            }
            other => panic!("expected MissingFactors, got {other:?}"),
        }
    }

    #[test]
    fn unmatched_dimensions_are_fatal() {
        let art = artifact(vec![
            ("U", f32_matrix(4, 5, 0.0)),
            ("V", f32_matrix(2, 5, 0.0)),
            ("users", ids("u", 3)),
            ("items", ids("i", 2)),
        ]);
        match load_from_artifact(&art) {
            Err(RecoError::ShapeMismatch {
                role,
                shape,
                expected,
                ..
            }) => {
                assert_eq!(role, Role::User);
                assert_eq!(shape, (4, 5));
                assert_eq!(expected, 3);
            }
            other => panic!("expected ShapeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn repeated_ids_are_fatal() {
        let mut body = Vec::new();
        for id in ["a", "b", "b"] {
            body.extend_from_slice(id.as_bytes());
        }
        let art = artifact(vec![
            ("U", f32_matrix(1, 2, 0.0)),
            ("V", f32_matrix(3, 2, 0.0)),
            ("users", ids("u", 1)),
            ("items", npy_bytes("|S1", false, &[3], &body)),
        ]);
        match load_from_artifact(&art) {
            Err(RecoError::DuplicateIds { role, id, available }) => {
                assert_eq!(role, Role::Item);
                assert_eq!(id, "b");
                assert_eq!(available, vec!["U", "V", "users", "items"]);
            }
            other => panic!("expected DuplicateIds, got {other:?}"),
        }
    }

    #[test]
    fn factor_width_must_agree() {
        let art = artifact(vec![
            ("U", f32_matrix(3, 4, 0.0)),
            ("V", f32_matrix(2, 5, 0.0)),
            ("users", ids("u", 3)),
            ("items", ids("i", 2)),
        ]);
        assert!(matches!(
            load_from_artifact(&art),
            Err(RecoError::FactorWidthMismatch { .. })
        ));
    }

    #[test]
    fn one_dimensional_factors_are_rejected() {
        let body: Vec<u8> = [1.0f32, 2.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        let art = artifact(vec![
            ("U", npy_bytes("<f4", false, &[2], &body)),
            ("V", f32_matrix(2, 2, 0.0)),
        ]);
        assert!(matches!(
            load_from_artifact(&art),
            Err(RecoError::NotAMatrix { .. })
        ));
    }
}
