//! Observed application states.
//!
//! A `StateSnapshot` is what a worker reads back from the browser after an
//! event: url, raw markup and the normalized markup used as the dedup key.
//! Once the exploration graph admits a snapshot it becomes a `State` with an
//! id and a name reflecting its insertion order.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::fingerprint::simhash;

pub type StateId = u32;

/// Id of the first state admitted into a graph (the index page).
pub const INDEX_ID: StateId = 0;

/// A browser observation that has not been admitted into a graph yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub url: String,
    pub markup: String,
    /// Markup after equivalence rules were applied. This is the dedup key.
    pub normalized: String,
}

impl StateSnapshot {
    pub fn new(
        url: impl Into<String>,
        markup: impl Into<String>,
        normalized: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            markup: markup.into(),
            normalized: normalized.into(),
        }
    }

    /// Snapshot whose markup needs no normalization.
    pub fn raw(url: impl Into<String>, markup: impl Into<String>) -> Self {
        let markup = markup.into();
        Self {
            url: url.into(),
            normalized: markup.clone(),
            markup,
        }
    }

    pub fn fingerprint(&self) -> u64 {
        simhash(&self.normalized)
    }
}

/// A canonical vertex of the exploration graph.
///
/// Equality and hashing follow the normalized markup, so two states are the
/// same entity iff their dedup keys match. The id is assigned by the graph at
/// insertion and never changes afterwards.
#[derive(Debug, Serialize)]
pub struct State {
    id: StateId,
    name: String,
    url: String,
    #[serde(skip)]
    markup: String,
    #[serde(skip)]
    normalized: String,
    #[serde(skip)]
    fingerprint: OnceLock<u64>,
    /// Latched the first time a worker extracts candidate actions here.
    #[serde(skip)]
    extracted: AtomicBool,
}

impl State {
    pub fn from_snapshot(id: StateId, snapshot: StateSnapshot) -> Self {
        let name = if id == INDEX_ID {
            "index".to_string()
        } else {
            format!("state{id}")
        };
        Self {
            id,
            name,
            url: snapshot.url,
            markup: snapshot.markup,
            normalized: snapshot.normalized,
            fingerprint: OnceLock::new(),
            extracted: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> StateId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn markup(&self) -> &str {
        &self.markup
    }

    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    pub fn is_index(&self) -> bool {
        self.id == INDEX_ID
    }

    pub fn fingerprint(&self) -> u64 {
        *self.fingerprint.get_or_init(|| simhash(&self.normalized))
    }

    /// Claim the right to extract candidate actions for this state.
    ///
    /// Returns true for exactly one caller over the lifetime of the state.
    pub fn claim_extraction(&self) -> bool {
        !self.extracted.swap(true, Ordering::AcqRel)
    }

    pub fn is_extracted(&self) -> bool {
        self.extracted.load(Ordering::Acquire)
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.normalized == other.normalized
    }
}

impl Eq for State {}

impl Hash for State {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized.hash(state);
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_index_state_is_named_index() {
        let state = State::from_snapshot(INDEX_ID, StateSnapshot::raw("http://app/", "<p/>"));
        assert_eq!(state.name(), "index");
        assert!(state.is_index());
    }

    #[test]
    fn test_names_follow_id() {
        let state = State::from_snapshot(7, StateSnapshot::raw("http://app/", "<p/>"));
        assert_eq!(state.name(), "state7");
        assert!(!state.is_index());
    }

    #[test]
    fn test_equality_uses_normalized_markup() {
        let a = State::from_snapshot(1, StateSnapshot::new("http://a", "<p>1</p>", "<p/>"));
        let b = State::from_snapshot(2, StateSnapshot::new("http://b", "<p>2</p>", "<p/>"));
        let c = State::from_snapshot(3, StateSnapshot::new("http://a", "<p>1</p>", "<div/>"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_fingerprint_matches_snapshot() {
        let snapshot = StateSnapshot::raw("http://app/", "<ul><li>one</li></ul>");
        let expected = snapshot.fingerprint();
        let state = State::from_snapshot(1, snapshot);
        assert_eq!(state.fingerprint(), expected);
    }

    #[test]
    fn test_extraction_claimed_once_across_threads() {
        let state = Arc::new(State::from_snapshot(1, StateSnapshot::raw("u", "m")));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                thread::spawn(move || state.claim_extraction())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert!(state.is_extracted());
    }
}
