//! Per-state queues of candidate actions not fired yet.
//!
//! Each action is handed to exactly one worker. Queues live in a sharded map,
//! so adding to or polling one state never blocks another state. A separate
//! `consumers` lock tracks which states have pending work and how many
//! workers are busy; it is what idle detection and `await_work` rely on.
//!
//! Lock order is `consumers` then a queue shard. No code path holds a shard
//! while waiting for `consumers`.

pub mod policy;

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};

use crawlgraph_graph::ExplorationGraph;
use crawlgraph_model::{CandidateAction, StateId};
use dashmap::DashMap;
use serde::Serialize;

use crate::rules::{CrawlRules, DispatchOrder};
use policy::{FifoSelection, SelectionPolicy};

/// What `await_work` hands a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Work {
    /// Crawl this state. The caller now counts as a running consumer and
    /// must call `task_done` when finished.
    State(StateId),
    /// Nothing is pending and nobody is running; nothing will ever be.
    Exhausted,
    /// The scheduler was closed.
    Shutdown,
}

#[derive(Default)]
struct Consumers {
    pending: VecDeque<StateId>,
    pending_set: HashSet<StateId>,
    running: usize,
}

impl Consumers {
    fn mark_pending(&mut self, state: StateId, front: bool) -> bool {
        if !self.pending_set.insert(state) {
            return false;
        }
        if front {
            self.pending.push_front(state);
        } else {
            self.pending.push_back(state);
        }
        true
    }

    fn unmark_pending(&mut self, state: StateId) {
        if self.pending_set.remove(&state) {
            self.pending.retain(|id| *id != state);
        }
    }
}

#[derive(Default)]
struct Counters {
    added: AtomicU64,
    fired: AtomicU64,
    skipped: AtomicU64,
    parked: AtomicU64,
    unreachable: AtomicU64,
    restored: AtomicU64,
    crawlers_lost: AtomicU64,
}

/// Point-in-time scheduler counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub actions_added: u64,
    pub actions_handed_out: u64,
    pub actions_skipped: u64,
    pub actions_parked: u64,
    pub actions_unreachable: u64,
    pub actions_restored: u64,
    pub crawlers_lost: u64,
    pub pending_states: usize,
    pub queued_actions: usize,
    pub running_consumers: usize,
}

pub struct ActionScheduler {
    queues: DashMap<StateId, VecDeque<CandidateAction>>,
    /// Purged while a worker tries to get back to the state.
    parked: DashMap<StateId, Vec<CandidateAction>>,
    /// Given up on; restored only if the state is reached again.
    unreachable: DashMap<StateId, Vec<CandidateAction>>,
    consumers: Mutex<Consumers>,
    work_ready: Condvar,
    closed: AtomicBool,
    policy: Box<dyn SelectionPolicy>,
    dispatch: DispatchOrder,
    restore_connected: bool,
    counters: Counters,
}

impl Default for ActionScheduler {
    fn default() -> Self {
        Self::new(Box::new(FifoSelection), DispatchOrder::DepthFirst)
    }
}

impl ActionScheduler {
    pub fn new(policy: Box<dyn SelectionPolicy>, dispatch: DispatchOrder) -> Self {
        Self {
            queues: DashMap::new(),
            parked: DashMap::new(),
            unreachable: DashMap::new(),
            consumers: Mutex::new(Consumers::default()),
            work_ready: Condvar::new(),
            closed: AtomicBool::new(false),
            policy,
            dispatch,
            restore_connected: false,
            counters: Counters::default(),
        }
    }

    pub fn from_rules(rules: &CrawlRules) -> Self {
        let mut scheduler = Self::new(rules.selection.build(), rules.dispatch);
        scheduler.restore_connected = rules.restore_connected_states;
        scheduler
    }

    /// Append `actions` to `state`'s queue and make the state visible to
    /// `await_work`. No-op for an empty list.
    pub fn add_actions(&self, state: StateId, actions: Vec<CandidateAction>) {
        if actions.is_empty() {
            tracing::debug!(state, "received empty action list");
            return;
        }
        let count = actions.len();
        let front = self.dispatch == DispatchOrder::DepthFirst;
        // Append and mark under `consumers` so idle checks never see queued
        // actions on a state that is not pending.
        let mut consumers = self.consumers.lock().unwrap();
        self.queues.entry(state).or_default().extend(actions);
        self.counters.added.fetch_add(count as u64, Ordering::Relaxed);
        if consumers.mark_pending(state, front) {
            tracing::trace!(state, pending = consumers.pending.len(), "state pending");
        }
        drop(consumers);
        tracing::debug!(state, count, "actions added");
        self.work_ready.notify_one();
    }

    /// Remove and return the next action for `state`, or `None` once its
    /// queue is empty. No two callers ever receive the same action.
    pub fn poll_action(&self, state: StateId) -> Option<CandidateAction> {
        let (action, drained) = match self.queues.get_mut(&state) {
            None => (None, true),
            Some(mut queue) => {
                let before = queue.len();
                let action = self.policy.select(&mut queue);
                let skipped = before - queue.len() - usize::from(action.is_some());
                if skipped > 0 {
                    self.counters.skipped.fetch_add(skipped as u64, Ordering::Relaxed);
                }
                (action, queue.is_empty())
            }
        };

        if action.is_some() {
            self.counters.fired.fetch_add(1, Ordering::Relaxed);
        }

        if drained {
            self.queues.remove_if(&state, |_, q| q.is_empty());
            let mut consumers = self.consumers.lock().unwrap();
            if !self.queues.contains_key(&state) {
                consumers.unmark_pending(state);
                tracing::debug!(state, pending = consumers.pending.len(), "all actions polled");
            }
        }
        action
    }

    /// Block until some state has pending work, then hand it out.
    ///
    /// The state stays in the pending queue (moved to the back) while it
    /// still has actions, so several workers can drain one state and no
    /// pending state is starved.
    pub fn await_work(&self) -> Work {
        let mut consumers = self.consumers.lock().unwrap();
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Work::Shutdown;
            }
            if let Some(state) = consumers.pending.pop_front() {
                consumers.pending.push_back(state);
                consumers.running += 1;
                tracing::debug!(state, running = consumers.running, "task handed out");
                return Work::State(state);
            }
            if consumers.running == 0 && self.parked.is_empty() {
                self.work_ready.notify_all();
                return Work::Exhausted;
            }
            consumers = self.work_ready.wait(consumers).unwrap();
        }
    }

    /// Report that the caller finished the task it got from `await_work`.
    pub fn task_done(&self, state: StateId) {
        let mut consumers = self.consumers.lock().unwrap();
        consumers.running = consumers.running.saturating_sub(1);
        if self.queues.contains_key(&state) {
            consumers.mark_pending(state, false);
        }
        tracing::debug!(state, running = consumers.running, "task done");
        drop(consumers);
        self.work_ready.notify_all();
    }

    /// Ask for another worker to pick up `state`'s remaining actions.
    pub fn requeue(&self, state: StateId) {
        let front = self.dispatch == DispatchOrder::DepthFirst;
        let mut consumers = self.consumers.lock().unwrap();
        if self.queues.contains_key(&state) {
            consumers.mark_pending(state, front);
            drop(consumers);
            self.work_ready.notify_one();
        }
    }

    /// Move `state`'s outstanding actions aside while a worker that lost its
    /// way tries to get back. Returns how many were parked.
    pub fn purge_actions_for_state(&self, state: StateId) -> usize {
        let removed = self.queues.remove(&state).map(|(_, q)| q).unwrap_or_default();
        let count = removed.len();
        if count > 0 {
            self.parked.entry(state).or_default().extend(removed);
            self.counters.parked.fetch_add(count as u64, Ordering::Relaxed);
        }
        self.consumers.lock().unwrap().unmark_pending(state);
        self.counters.crawlers_lost.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(state, count, "actions parked");
        count
    }

    /// The worker could not get back. Parked actions become unreachable and
    /// return only if the state is reached again some other way.
    pub fn give_up(&self, state: StateId) -> usize {
        let Some((_, actions)) = self.parked.remove(&state) else {
            return 0;
        };
        let count = actions.len();
        self.unreachable.entry(state).or_default().extend(actions);
        self.counters.unreachable.fetch_add(count as u64, Ordering::Relaxed);
        tracing::info!(state, count, "state marked unreachable");

        // Parked actions no longer hold off exhaustion. Notify under the lock
        // so a waiter cannot check `parked` and then miss the wakeup.
        let _consumers = self.consumers.lock().unwrap();
        self.work_ready.notify_all();
        count
    }

    /// Put parked or unreachable actions for `state` back in the live queue.
    /// With connected-state restoring on, the states `state` links to are
    /// restored too. Returns the number of actions restored.
    pub fn restore_actions_for_state(
        &self,
        state: StateId,
        graph: &dyn ExplorationGraph,
    ) -> usize {
        let mut restored = self.restore_one(state);
        if self.restore_connected {
            for connected in graph.outgoing_states(state) {
                if connected.id() != state {
                    restored += self.restore_one(connected.id());
                }
            }
        }
        restored
    }

    fn restore_one(&self, state: StateId) -> usize {
        let mut actions = Vec::new();
        if let Some((_, parked)) = self.unreachable.remove(&state) {
            actions.extend(parked);
        }
        if let Some((_, parked)) = self.parked.remove(&state) {
            actions.extend(parked);
        }
        let count = actions.len();
        if count > 0 {
            tracing::info!(state, count, "restoring actions of rediscovered state");
            self.counters.restored.fetch_add(count as u64, Ordering::Relaxed);
            self.add_actions(state, actions);
        }
        count
    }

    pub fn has_unreachable(&self, state: StateId) -> bool {
        self.unreachable.contains_key(&state)
    }

    pub fn queued_actions(&self, state: StateId) -> usize {
        self.queues.get(&state).map(|q| q.len()).unwrap_or(0)
    }

    pub fn parked_actions(&self, state: StateId) -> usize {
        self.parked.get(&state).map(|q| q.len()).unwrap_or(0)
    }

    /// No running consumers, no pending state, no parked actions.
    pub fn is_idle(&self) -> bool {
        let consumers = self.consumers.lock().unwrap();
        consumers.running == 0 && consumers.pending.is_empty() && self.parked.is_empty()
    }

    /// Release every blocked `await_work` caller with `Work::Shutdown`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _consumers = self.consumers.lock().unwrap();
        self.work_ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    pub fn stats(&self) -> SchedulerStats {
        let consumers = self.consumers.lock().unwrap();
        let c = &self.counters;
        SchedulerStats {
            actions_added: c.added.load(Ordering::Relaxed),
            actions_handed_out: c.fired.load(Ordering::Relaxed),
            actions_skipped: c.skipped.load(Ordering::Relaxed),
            actions_parked: c.parked.load(Ordering::Relaxed),
            actions_unreachable: c.unreachable.load(Ordering::Relaxed),
            actions_restored: c.restored.load(Ordering::Relaxed),
            crawlers_lost: c.crawlers_lost.load(Ordering::Relaxed),
            pending_states: consumers.pending.len(),
            queued_actions: self.queues.iter().map(|q| q.len()).sum(),
            running_consumers: consumers.running,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawlgraph_graph::InMemoryGraph;
    use crawlgraph_model::{Event, ExitNotifier, Identification, StateSnapshot};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn actions(n: usize) -> Vec<CandidateAction> {
        (0..n)
            .map(|i| CandidateAction::new(Event::click(Identification::xpath(format!("/A[{i}]")))))
            .collect()
    }

    #[test]
    fn test_empty_add_is_noop() {
        let s = ActionScheduler::default();
        s.add_actions(3, Vec::new());
        assert!(s.is_idle());
        assert_eq!(s.stats().pending_states, 0);
    }

    #[test]
    fn test_poll_until_empty_unmarks_pending() {
        let s = ActionScheduler::default();
        s.add_actions(0, actions(2));
        assert!(!s.is_idle());
        assert!(s.poll_action(0).is_some());
        assert!(s.poll_action(0).is_some());
        assert!(s.poll_action(0).is_none());
        assert!(s.is_idle());
    }

    #[test]
    fn test_await_work_counts_consumer() {
        let s = ActionScheduler::default();
        s.add_actions(4, actions(1));
        assert_eq!(s.await_work(), Work::State(4));
        assert_eq!(s.stats().running_consumers, 1);
        assert!(s.poll_action(4).is_some());
        assert!(!s.is_idle());
        s.task_done(4);
        assert!(s.is_idle());
        assert_eq!(s.await_work(), Work::Exhausted);
    }

    #[test]
    fn test_depth_first_serves_newest_state() {
        let s = ActionScheduler::default();
        s.add_actions(1, actions(1));
        s.add_actions(2, actions(1));
        assert_eq!(s.await_work(), Work::State(2));
    }

    #[test]
    fn test_fifo_dispatch_serves_oldest_state() {
        let s = ActionScheduler::new(Box::new(FifoSelection), DispatchOrder::Fifo);
        s.add_actions(1, actions(1));
        s.add_actions(2, actions(1));
        assert_eq!(s.await_work(), Work::State(1));
    }

    #[test]
    fn test_served_state_rotates_to_back() {
        let s = ActionScheduler::new(Box::new(FifoSelection), DispatchOrder::Fifo);
        s.add_actions(1, actions(3));
        s.add_actions(2, actions(3));
        assert_eq!(s.await_work(), Work::State(1));
        assert_eq!(s.await_work(), Work::State(2));
        assert_eq!(s.await_work(), Work::State(1));
    }

    #[test]
    fn test_close_releases_waiters() {
        let s = Arc::new(ActionScheduler::default());
        s.add_actions(0, actions(1));
        assert_eq!(s.await_work(), Work::State(0));
        s.poll_action(0);

        // One consumer is still running, so the waiter blocks.
        let waiter = {
            let s = Arc::clone(&s);
            thread::spawn(move || s.await_work())
        };
        thread::sleep(Duration::from_millis(20));
        s.close();
        assert_eq!(waiter.join().unwrap(), Work::Shutdown);
    }

    #[test]
    fn test_waiter_sees_exhaustion_after_last_task() {
        let s = Arc::new(ActionScheduler::default());
        s.add_actions(0, actions(1));
        assert_eq!(s.await_work(), Work::State(0));

        let waiter = {
            let s = Arc::clone(&s);
            thread::spawn(move || s.await_work())
        };
        thread::sleep(Duration::from_millis(20));
        s.poll_action(0);
        s.task_done(0);
        assert_eq!(waiter.join().unwrap(), Work::Exhausted);
    }

    #[test]
    fn test_purge_and_restore() {
        let graph = InMemoryGraph::new(Arc::new(ExitNotifier::unlimited()));
        graph.insert_state_if_absent(StateSnapshot::raw("u", "<a/>"));

        let s = ActionScheduler::default();
        s.add_actions(0, actions(3));
        assert_eq!(s.purge_actions_for_state(0), 3);
        assert_eq!(s.queued_actions(0), 0);
        assert_eq!(s.parked_actions(0), 3);
        assert!(!s.is_idle());

        assert_eq!(s.restore_actions_for_state(0, &graph), 3);
        assert_eq!(s.queued_actions(0), 3);
        assert_eq!(s.parked_actions(0), 0);
        assert_eq!(s.stats().actions_restored, 3);
    }

    #[test]
    fn test_give_up_moves_to_unreachable() {
        let graph = InMemoryGraph::new(Arc::new(ExitNotifier::unlimited()));
        graph.insert_state_if_absent(StateSnapshot::raw("u", "<a/>"));

        let s = ActionScheduler::default();
        s.add_actions(0, actions(2));
        s.purge_actions_for_state(0);
        assert_eq!(s.give_up(0), 2);
        assert!(s.is_idle());
        assert!(s.has_unreachable(0));

        assert_eq!(s.restore_actions_for_state(0, &graph), 2);
        assert!(!s.has_unreachable(0));
        assert_eq!(s.queued_actions(0), 2);
    }

    #[test]
    fn test_restore_cascades_to_connected_states() {
        let graph = InMemoryGraph::new(Arc::new(ExitNotifier::unlimited()));
        graph.insert_state_if_absent(StateSnapshot::raw("u", "<a/>"));
        graph.insert_state_if_absent(StateSnapshot::raw("u", "<b/>"));
        graph
            .insert_transition(0, 1, Event::click(Identification::xpath("/A")))
            .unwrap();

        let rules = CrawlRules {
            restore_connected_states: true,
            ..Default::default()
        };
        let s = ActionScheduler::from_rules(&rules);
        s.add_actions(0, actions(1));
        s.add_actions(1, actions(2));
        s.purge_actions_for_state(0);
        s.give_up(0);
        s.purge_actions_for_state(1);
        s.give_up(1);

        assert_eq!(s.restore_actions_for_state(0, &graph), 3);
        assert_eq!(s.queued_actions(1), 2);
    }

    #[test]
    fn test_stats_track_handed_out() {
        let s = ActionScheduler::default();
        s.add_actions(0, actions(3));
        s.poll_action(0);
        s.poll_action(0);
        let stats = s.stats();
        assert_eq!(stats.actions_added, 3);
        assert_eq!(stats.actions_handed_out, 2);
        assert_eq!(stats.queued_actions, 1);
    }
}
