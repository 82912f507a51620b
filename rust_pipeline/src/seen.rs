//! Per-user index of already-interacted items.
//!
//! Built once from the interaction log and read-only afterwards. Which events
//! count as "seen" is decided by the caller through [`SeenPolicy`]; the index
//! itself only applies the predicate it is given.

use std::str::FromStr;

use ahash::{AHashMap, AHashSet};

use crate::events::{Event, SignalPolicy};

/// Which interactions suppress a later recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeenPolicy {
    /// Every interaction, positive or not: nothing the user touched is
    /// recommended again.
    #[default]
    AllInteractions,
    /// Only positive-signal interactions.
    PositiveOnly,
}

impl FromStr for SeenPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(SeenPolicy::AllInteractions),
            "positive" => Ok(SeenPolicy::PositiveOnly),
            other => Err(format!("unknown seen policy `{other}` (expected `all` or `positive`)")),
        }
    }
}

/// `user_id -> {item_id}`.
#[derive(Debug, Clone, Default)]
pub struct SeenMap {
    by_user: AHashMap<String, AHashSet<String>>,
}

impl SeenMap {
    /// Index every event accepted by `include`.
    pub fn build_with<'a>(events: impl IntoIterator<Item = &'a Event>, include: impl Fn(&Event) -> bool) -> Self {
        let mut by_user: AHashMap<String, AHashSet<String>> = AHashMap::new();
        for event in events.into_iter().filter(|e| include(*e)) {
            by_user
                .entry(event.user_id.clone())
                .or_default()
                .insert(event.item_id.clone());
        }
        SeenMap { by_user }
    }

    pub fn build(events: &[Event], policy: SeenPolicy, signal: &SignalPolicy) -> Self {
        match policy {
            SeenPolicy::AllInteractions => Self::build_with(events, |_| true),
            SeenPolicy::PositiveOnly => Self::build_with(events, |e| signal.is_positive(e)),
        }
    }

    pub fn items(&self, user_id: &str) -> Option<&AHashSet<String>> {
        self.by_user.get(user_id)
    }

    pub fn has_seen(&self, user_id: &str, item_id: &str) -> bool {
        self.by_user
            .get(user_id)
            .is_some_and(|items| items.contains(item_id))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AHashSet<String>)> {
        self.by_user.iter().map(|(u, items)| (u.as_str(), items))
    }

    pub fn contains_user(&self, user_id: &str) -> bool {
        self.by_user.contains_key(user_id)
    }

    pub fn n_users(&self) -> usize {
        self.by_user.len()
    }

    pub fn n_pairs(&self) -> usize {
        self.by_user.values().map(|items| items.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_user.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> Vec<Event> {
        vec![
            Event::new("u1", "a", "like"),
            Event::new("u1", "b", "view"),
            Event::new("u1", "a", "watchlist_add"),
            Event::new("u2", "c", "view").with_rating(9.0),
            Event::new("u3", "d", "skip"),
        ]
    }

    #[test]
    fn all_interactions_policy_indexes_everything() {
        let seen = SeenMap::build(&log(), SeenPolicy::AllInteractions, &SignalPolicy::default());
        assert_eq!(seen.n_users(), 3);
        assert_eq!(seen.n_pairs(), 4);
        assert!(seen.has_seen("u1", "b"));
        assert!(seen.has_seen("u3", "d"));
    }

    #[test]
    fn positive_policy_drops_negative_signals() {
        let seen = SeenMap::build(&log(), SeenPolicy::PositiveOnly, &SignalPolicy::default());
        assert!(seen.has_seen("u1", "a"));
        assert!(!seen.has_seen("u1", "b"));
        assert!(seen.has_seen("u2", "c"));
        assert!(!seen.contains_user("u3"));
    }

    #[test]
    fn empty_log_gives_empty_map() {
        let seen = SeenMap::build(&[], SeenPolicy::AllInteractions, &SignalPolicy::default());
        assert!(seen.is_empty());
        assert!(seen.items("u1").is_none());
    }

    #[test]
    fn policy_parses_from_cli_names() {
        assert_eq!("all".parse::<SeenPolicy>().unwrap(), SeenPolicy::AllInteractions);
        assert_eq!("positive".parse::<SeenPolicy>().unwrap(), SeenPolicy::PositiveOnly);
        assert!("none".parse::<SeenPolicy>().is_err());
    }
}
