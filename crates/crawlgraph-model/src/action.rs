use serde::{Deserialize, Serialize};

use crate::event::Event;

/// An event extracted for a state but not fired yet.
///
/// `influence` and `explored` are hints supplied by the extractor. The
/// default FIFO scheduler ignores them; the influence policy ranks on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateAction {
    pub event: Event,
    #[serde(default)]
    pub influence: f64,
    /// How many times an equivalent element was already exercised elsewhere.
    #[serde(default)]
    pub explored: u32,
}

impl CandidateAction {
    pub fn new(event: Event) -> Self {
        Self {
            event,
            influence: 0.0,
            explored: 0,
        }
    }

    pub fn with_influence(mut self, influence: f64) -> Self {
        self.influence = influence;
        self
    }

    pub fn with_explored(mut self, explored: u32) -> Self {
        self.explored = explored;
        self
    }

    pub fn was_explored(&self) -> bool {
        self.explored > 0
    }
}

impl From<Event> for CandidateAction {
    fn from(event: Event) -> Self {
        Self::new(event)
    }
}

impl std::fmt::Display for CandidateAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.event.fmt(f)
    }
}
