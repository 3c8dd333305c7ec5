use std::sync::Arc;

use serde::Serialize;

use crate::event::Transition;
use crate::state::StateId;

/// The ordered transitions a worker followed from the index state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CrawlPath {
    transitions: Vec<Arc<Transition>>,
}

impl CrawlPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_transitions(transitions: Vec<Arc<Transition>>) -> Self {
        Self { transitions }
    }

    pub fn push(&mut self, transition: Arc<Transition>) {
        self.transitions.push(transition);
    }

    pub fn last(&self) -> Option<&Arc<Transition>> {
        self.transitions.last()
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Transition>> {
        self.transitions.iter()
    }

    /// State the path ends in, if it has any transitions.
    pub fn end(&self) -> Option<StateId> {
        self.last().map(|t| t.target())
    }
}

impl std::fmt::Display for CrawlPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for t in &self.transitions {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{}", t.event())?;
            first = false;
        }
        Ok(())
    }
}
