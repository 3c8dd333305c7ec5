//! A worker's position in the exploration graph.

use std::sync::Arc;

use crawlgraph_graph::{ExplorationGraph, GraphError, InsertOutcome};
use crawlgraph_model::{Event, State, StateSnapshot, Transition};

use crate::plugins::{HookContext, Plugins};

/// What `StateCursor::advance` found.
#[derive(Debug, Clone)]
pub enum Advance {
    /// The observation became a new canonical state.
    NewState {
        state: Arc<State>,
        transition: Arc<Transition>,
    },
    /// The observation matched a known state; the edge points at it.
    Clone {
        state: Arc<State>,
        transition: Arc<Transition>,
    },
    /// Nothing was observed. The cursor did not move.
    NoObservation,
}

impl Advance {
    pub fn transition(&self) -> Option<&Arc<Transition>> {
        match self {
            Self::NewState { transition, .. } | Self::Clone { transition, .. } => Some(transition),
            Self::NoObservation => None,
        }
    }
}

/// Tracks where one worker is and reconciles what it observes with the
/// shared graph.
pub struct StateCursor {
    graph: Arc<dyn ExplorationGraph>,
    plugins: Arc<Plugins>,
    initial: Arc<State>,
    current: Arc<State>,
}

impl StateCursor {
    pub fn new(graph: Arc<dyn ExplorationGraph>, plugins: Arc<Plugins>, initial: Arc<State>) -> Self {
        Self {
            graph,
            plugins,
            current: Arc::clone(&initial),
            initial,
        }
    }

    pub fn current(&self) -> &Arc<State> {
        &self.current
    }

    /// Move to `next` along an existing edge. Refused, leaving the cursor
    /// where it is, when no edge joins the two states.
    pub fn change_state(&mut self, next: &Arc<State>) -> bool {
        if self.current.id() == next.id() {
            return true;
        }
        if !self.graph.can_reach(self.current.id(), next.id()) {
            tracing::debug!(from = %self.current.name(), to = %next.name(), "cannot change state");
            return false;
        }
        tracing::trace!(from = %self.current.name(), to = %next.name(), "state changed");
        self.current = Arc::clone(next);
        true
    }

    /// Record that firing `event` in the current state produced `observed`.
    ///
    /// Only the worker whose insertion wins sees `NewState` and fires the
    /// new-state notification; everyone else is redirected to the canonical
    /// state and told `Clone`.
    pub fn advance(
        &mut self,
        event: Event,
        observed: Option<StateSnapshot>,
        ctx: &HookContext<'_>,
    ) -> Result<Advance, GraphError> {
        let Some(snapshot) = observed else {
            return Ok(Advance::NoObservation);
        };

        let source = self.current.id();
        let outcome = self.graph.insert_state_if_absent(snapshot);
        let is_new = outcome.is_new();
        let state = match outcome {
            InsertOutcome::Inserted(s) | InsertOutcome::Existing(s) => s,
        };
        let transition = Arc::clone(
            self.graph
                .insert_transition(source, state.id(), event)?
                .transition(),
        );
        self.current = Arc::clone(&state);

        if is_new {
            self.plugins.run_on_new_state(ctx, &state);
            Ok(Advance::NewState { state, transition })
        } else {
            Ok(Advance::Clone { state, transition })
        }
    }

    /// Back to the initial state, after the worker lost its position.
    pub fn rewind(&mut self) {
        self.current = Arc::clone(&self.initial);
    }
}
