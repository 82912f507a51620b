//! Python bindings (`import cf_recos`).
//!
//! Python usage:
//!   model = cf_recos.load_factor_model("als_model.npz")
//!   seen = cf_recos.build_seen_map("media_events.jsonl", "all")
//!   rows = model.recommend(["u1", "u2"], "media_events.jsonl", k=200)

use std::collections::HashMap;
use std::path::PathBuf;

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::error::RecoError;
use crate::events::{read_events_jsonl, SignalPolicy};
use crate::loader::{self, FactorModel};
use crate::recommend::{Recommender, Similarity};
use crate::seen::{SeenMap, SeenPolicy};

fn to_py_err(e: RecoError) -> PyErr {
    PyValueError::new_err(e.to_string())
}

fn parse<T: std::str::FromStr<Err = String>>(value: &str) -> PyResult<T> {
    value.parse::<T>().map_err(PyValueError::new_err)
}

fn seen_from_file(path: PathBuf, policy: SeenPolicy) -> PyResult<SeenMap> {
    let ingest = read_events_jsonl(&path).map_err(to_py_err)?;
    Ok(SeenMap::build(&ingest.events, policy, &SignalPolicy::default()))
}

/// A loaded, reconciled factor model.
#[pyclass(name = "FactorModel")]
pub struct PyFactorModel {
    inner: FactorModel,
}

#[pymethods]
impl PyFactorModel {
    #[getter]
    fn user_ids(&self) -> Vec<String> {
        self.inner.user_ids.clone()
    }

    #[getter]
    fn item_ids(&self) -> Vec<String> {
        self.inner.item_ids.clone()
    }

    #[getter]
    fn n_factors(&self) -> usize {
        self.inner.n_factors()
    }

    /// Which layout fixes the loader applied.
    fn load_report(&self) -> HashMap<&'static str, bool> {
        let r = &self.inner.report;
        HashMap::from([
            ("user_transposed", r.user_transposed),
            ("item_transposed", r.item_transposed),
            ("swapped", r.swapped),
            ("user_ids_synthesized", r.user_ids_synthesized),
            ("item_ids_synthesized", r.item_ids_synthesized),
        ])
    }

    /// Top-K rows as `(user_id, item_id, rank, score)` tuples.
    ///
    /// Args:
    ///     user_ids: users to score; ids unknown to the model are skipped
    ///     events_path: JSONL log used for seen-item exclusion
    ///     k: recommendations per user
    ///     similarity: "dot" or "cosine"
    ///     seen_policy: "all" or "positive"
    #[pyo3(signature = (user_ids, events_path, k=200, similarity="dot", seen_policy="all"))]
    fn recommend(
        &self,
        py: Python<'_>,
        user_ids: Vec<String>,
        events_path: PathBuf,
        k: usize,
        similarity: &str,
        seen_policy: &str,
    ) -> PyResult<Vec<(String, String, u32, f32)>> {
        let similarity: Similarity = parse(similarity)?;
        let seen = seen_from_file(events_path, parse(seen_policy)?)?;
        let rows = py.allow_threads(|| Recommender::new(&self.inner, similarity).recommend(&user_ids, &seen, k));
        Ok(rows
            .into_iter()
            .map(|r| (r.user_id, r.item_id, r.rank, r.score))
            .collect())
    }

    fn __repr__(&self) -> String {
        format!(
            "FactorModel(users={}, items={}, factors={})",
            self.inner.n_users(),
            self.inner.n_items(),
            self.inner.n_factors()
        )
    }
}

#[pyfunction]
pub fn load_factor_model(path: PathBuf) -> PyResult<PyFactorModel> {
    let inner = loader::load_factor_model(&path).map_err(to_py_err)?;
    Ok(PyFactorModel { inner })
}

/// user_id -> sorted list of items the user must not be recommended.
#[pyfunction]
#[pyo3(signature = (events_path, seen_policy="all"))]
pub fn build_seen_map(events_path: PathBuf, seen_policy: &str) -> PyResult<HashMap<String, Vec<String>>> {
    let seen = seen_from_file(events_path, parse(seen_policy)?)?;
    let mut out = HashMap::with_capacity(seen.n_users());
    for (user, items) in seen.iter() {
        let mut items: Vec<String> = items.iter().cloned().collect();
        items.sort_unstable();
        out.insert(user.to_string(), items);
    }
    Ok(out)
}

#[pymodule]
fn cf_recos(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyFactorModel>()?;
    m.add_function(wrap_pyfunction!(load_factor_model, m)?)?;
    m.add_function(wrap_pyfunction!(build_seen_map, m)?)?;
    Ok(())
}
