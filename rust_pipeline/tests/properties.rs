//! Ranking and publishing properties over random models.

use cf_recos::events::Event;
use cf_recos::matrix::Matrix;
use cf_recos::{publish, FactorModel, LoadReport, MemoryStore, Recommender, SeenMap, Similarity};
use proptest::prelude::*;

#[derive(Debug, Clone)]
struct Case {
    model: FactorModel,
    events: Vec<Event>,
    k: usize,
}

fn case_strategy() -> impl Strategy<Value = Case> {
    (1usize..5, 1usize..12, 1usize..4, 0usize..15)
        .prop_flat_map(|(n_users, n_items, f, k)| {
            (
                prop::collection::vec(-10.0f32..10.0, n_users * f),
                prop::collection::vec(-10.0f32..10.0, n_items * f),
                prop::collection::vec(any::<bool>(), n_users * n_items),
                Just((n_users, n_items, f, k)),
            )
        })
        .prop_map(|(uf, itf, seen, (n_users, n_items, f, k))| {
            let user_ids: Vec<String> = (0..n_users).map(|u| format!("u{u}")).collect();
            let item_ids: Vec<String> = (0..n_items).map(|i| format!("i{i}")).collect();
            let events = seen
                .iter()
                .enumerate()
                .filter(|(_, s)| **s)
                .map(|(idx, _)| Event::new(user_ids[idx / n_items].clone(), item_ids[idx % n_items].clone(), "view"))
                .collect();
            let model = FactorModel {
                user_factors: Matrix::from_vec(n_users, f, uf).unwrap(),
                item_factors: Matrix::from_vec(n_items, f, itf).unwrap(),
                user_ids,
                item_ids,
                report: LoadReport::default(),
            };
            Case { model, events, k }
        })
}

fn similarity_strategy() -> impl Strategy<Value = Similarity> {
    prop_oneof![Just(Similarity::Dot), Just(Similarity::Cosine)]
}

proptest! {
    #[test]
    fn rankings_exclude_seen_and_are_dense(case in case_strategy(), sim in similarity_strategy()) {
        let seen = SeenMap::build_with(&case.events, |_| true);
        let rec = Recommender::new(&case.model, sim);

        for user in &case.model.user_ids {
            let rows = rec.recommend_user(user, &seen, case.k);
            let unseen = case
                .model
                .item_ids
                .iter()
                .filter(|i| !seen.has_seen(user, i))
                .count();
            prop_assert_eq!(rows.len(), case.k.min(unseen));

            for (pos, row) in rows.iter().enumerate() {
                prop_assert_eq!(row.rank as usize, pos + 1);
                prop_assert!(!seen.has_seen(user, &row.item_id));
            }
            for pair in rows.windows(2) {
                prop_assert!(pair[0].score >= pair[1].score);
            }
        }
    }

    #[test]
    fn batch_output_is_deterministic_and_grouped(case in case_strategy()) {
        let seen = SeenMap::build_with(&case.events, |_| true);
        let rec = Recommender::new(&case.model, Similarity::Dot);

        let first = rec.recommend(&case.model.user_ids, &seen, case.k);
        let second = rec.recommend(&case.model.user_ids, &seen, case.k);
        prop_assert_eq!(&first, &second);

        let expected: Vec<_> = case
            .model
            .user_ids
            .iter()
            .flat_map(|u| rec.recommend_user(u, &seen, case.k))
            .collect();
        prop_assert_eq!(first, expected);
    }

    #[test]
    fn republishing_never_duplicates(case in case_strategy(), chunk in 1usize..7) {
        let seen = SeenMap::build_with(&case.events, |_| true);
        let rows = Recommender::new(&case.model, Similarity::Dot).recommend(&case.model.user_ids, &seen, case.k);

        let store = MemoryStore::new();
        publish(&store, &rows, "als_v1", chunk).unwrap();
        publish(&store, &rows, "als_v1", chunk).unwrap();
        prop_assert_eq!(store.len(), rows.len());
        prop_assert_eq!(store.count_version("als_v1"), rows.len());
    }
}
