//! The per-worker crawl loop.
//!
//! A task is a target state. The crawler reloads the start url, replays the
//! shortest known path to the target, then fires the target's pending
//! actions one by one. A new state is explored further in the same task
//! (depth first); landing on a known state ends the task.

use std::sync::{Arc, Mutex};

use crawlgraph_graph::{ExplorationGraph, GraphError};
use crawlgraph_model::{
    CrawlPath, Event, ExitNotifier, State, StateId, StateSnapshot, Transition, INDEX_ID,
};

use crate::browser::{Browser, BrowserError, PoolError};
use crate::cursor::{Advance, StateCursor};
use crate::extract::{CandidateExtractor, MarkupNormalizer};
use crate::limits::RunLimits;
use crate::plugins::{HookContext, Plugins};
use crate::rules::CrawlRules;
use crate::scheduler::ActionScheduler;

#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    #[error("graph invariant violated: {0}")]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("no initial state; the index page was never crawled")]
    NoInitialState,
}

/// Everything the workers of one run share.
pub struct CrawlEnv {
    pub url: String,
    pub graph: Arc<dyn ExplorationGraph>,
    pub scheduler: Arc<ActionScheduler>,
    pub notifier: Arc<ExitNotifier>,
    pub plugins: Arc<Plugins>,
    pub extractor: Arc<dyn CandidateExtractor>,
    pub normalizer: Arc<dyn MarkupNormalizer>,
    pub limits: RunLimits,
    pub rules: CrawlRules,
    /// Paths workers finished following, in completion order.
    pub paths: Mutex<Vec<CrawlPath>>,
}

impl CrawlEnv {
    /// Whether `current_url` is outside the start url's host. Subdomains of
    /// the start host count as inside; an unparseable url counts as outside.
    pub fn left_domain(&self, current_url: &str) -> bool {
        let Some(home) = url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase))
        else {
            return false;
        };
        let Some(host) = url::Url::parse(current_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase))
        else {
            tracing::warn!(url = current_url, "could not parse current url");
            return true;
        };
        host != home && !host.ends_with(&format!(".{home}"))
    }

    pub fn take_paths(&self) -> Vec<CrawlPath> {
        std::mem::take(&mut *self.paths.lock().unwrap())
    }
}

pub struct Crawler {
    worker: Option<usize>,
    env: Arc<CrawlEnv>,
    browser: Box<dyn Browser>,
    cursor: Option<StateCursor>,
    path: CrawlPath,
}

impl Crawler {
    pub fn new(worker: Option<usize>, env: Arc<CrawlEnv>, browser: Box<dyn Browser>) -> Self {
        Self {
            worker,
            env,
            browser,
            cursor: None,
            path: CrawlPath::new(),
        }
    }

    pub fn env(&self) -> &Arc<CrawlEnv> {
        &self.env
    }

    pub fn worker(&self) -> Option<usize> {
        self.worker
    }

    /// Hand the browser back, recording the path in progress.
    pub fn finish(mut self) -> Box<dyn Browser> {
        self.finish_path();
        self.browser
    }

    fn ctx(&self) -> HookContext<'_> {
        HookContext {
            worker: self.worker,
            path: &self.path,
        }
    }

    fn cursor_mut(&mut self) -> Result<&mut StateCursor, CrawlError> {
        if self.cursor.is_none() {
            let initial = self
                .env
                .graph
                .initial_state()
                .ok_or(CrawlError::NoInitialState)?;
            self.cursor = Some(StateCursor::new(
                Arc::clone(&self.env.graph),
                Arc::clone(&self.env.plugins),
                initial,
            ));
        }
        self.cursor.as_mut().ok_or(CrawlError::NoInitialState)
    }

    /// Load the start url and admit the index state. Called once per run,
    /// before any worker starts.
    pub fn crawl_index(&mut self) -> Result<Arc<State>, CrawlError> {
        tracing::debug!(url = %self.env.url, "crawling index page");
        self.browser.navigate(&self.env.url)?;
        self.env.plugins.run_on_url_load(self.worker);

        let snapshot = self.snapshot()?;
        let outcome = self.env.graph.insert_state_if_absent(snapshot);
        let index = Arc::clone(outcome.state());
        if outcome.is_new() {
            self.env.plugins.run_on_new_state(&self.ctx(), &index);
        }
        if index.id() != INDEX_ID {
            tracing::warn!(state = %index.name(), "index page matched a later state");
        }

        self.cursor = Some(StateCursor::new(
            Arc::clone(&self.env.graph),
            Arc::clone(&self.env.plugins),
            Arc::clone(&index),
        ));
        self.extract_actions(&index);
        Ok(index)
    }

    /// Crawl the pending actions of `target`.
    pub fn execute(&mut self, target: StateId) -> Result<(), CrawlError> {
        if self.env.notifier.is_exit_called() {
            return Ok(());
        }
        let state = self
            .env
            .graph
            .state(target)
            .ok_or(GraphError::UnknownState(target))?;
        tracing::debug!(worker = ?self.worker, state = %state.name(), "starting task");

        self.reset()?;
        let Some(route) = self.env.graph.shortest_path(INDEX_ID, target) else {
            tracing::warn!(state = %state.name(), "no known path to state");
            self.env.scheduler.purge_actions_for_state(target);
            self.env.scheduler.give_up(target);
            return Ok(());
        };

        if !self.follow(&route)? {
            tracing::info!(worker = ?self.worker, state = %state.name(), "could not reach state");
            self.env.scheduler.purge_actions_for_state(target);
            self.env.scheduler.give_up(target);
            return Ok(());
        }

        self.arrive(&state);
        self.crawl_through_actions()
    }

    fn reset(&mut self) -> Result<(), CrawlError> {
        self.finish_path();
        self.browser.close_extra_windows()?;
        self.browser.navigate(&self.env.url)?;
        self.env.plugins.run_on_url_load(self.worker);
        self.cursor_mut()?.rewind();
        Ok(())
    }

    fn finish_path(&mut self) {
        if !self.path.is_empty() {
            let path = std::mem::take(&mut self.path);
            self.env.paths.lock().unwrap().push(path);
        }
    }

    fn snapshot(&mut self) -> Result<StateSnapshot, BrowserError> {
        let url = self.browser.current_url()?;
        let markup = self.browser.current_markup()?;
        let normalized = self.env.normalizer.normalize(&markup);
        Ok(StateSnapshot::new(url, markup, normalized))
    }

    fn off_domain(&mut self) -> Result<bool, BrowserError> {
        if !self.env.rules.stay_on_domain {
            return Ok(false);
        }
        let url = self.browser.current_url()?;
        Ok(self.env.left_domain(&url))
    }

    /// Extract `state`'s candidate actions unless some worker already did.
    fn extract_actions(&self, state: &Arc<State>) {
        if !state.claim_extraction() {
            return;
        }
        let actions = self.env.extractor.extract(state);
        tracing::debug!(state = %state.name(), count = actions.len(), "candidate actions extracted");
        self.env
            .plugins
            .run_pre_state_crawling(&self.ctx(), state, &actions);
        self.env.scheduler.add_actions(state.id(), actions);
    }

    /// Reached `state`: bring back actions given up on earlier and make sure
    /// its own actions were extracted.
    fn arrive(&self, state: &Arc<State>) {
        if self.env.scheduler.has_unreachable(state.id()) {
            self.env
                .scheduler
                .restore_actions_for_state(state.id(), self.env.graph.as_ref());
        }
        self.extract_actions(state);
    }

    /// Fire `event`. `Ok(false)` is a per-action failure the crawl moves past.
    fn fire(&mut self, event: &Event) -> Result<bool, CrawlError> {
        match self.browser.fire_event(event) {
            Ok(true) => {
                self.browser.close_extra_windows()?;
                Ok(true)
            }
            Ok(false) => {
                tracing::debug!(event = %event, "event not fired");
                self.env.plugins.run_on_fire_event_failed(&self.ctx(), event);
                Ok(false)
            }
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                tracing::warn!(event = %event, error = %e, "firing event failed");
                self.env.plugins.run_on_fire_event_failed(&self.ctx(), event);
                Ok(false)
            }
        }
    }

    /// Replay `route` from the index state. `Ok(false)` when the browser
    /// could not follow it.
    fn follow(&mut self, route: &[Arc<Transition>]) -> Result<bool, CrawlError> {
        for transition in route {
            if self.env.notifier.is_exit_called() {
                return Ok(false);
            }
            let target = self
                .env
                .graph
                .state(transition.target())
                .ok_or(GraphError::UnknownState(transition.target()))?;

            tracing::trace!(event = %transition.event(), "backtracking");
            if !self.fire(transition.event())? || self.off_domain()? {
                return Ok(false);
            }
            if !self.cursor_mut()?.change_state(&target) {
                return Ok(false);
            }
            self.path.push(Arc::clone(transition));
            self.env.plugins.run_on_revisit_state(&self.ctx(), &target);
        }
        Ok(true)
    }

    fn crawl_through_actions(&mut self) -> Result<(), CrawlError> {
        loop {
            if self.env.notifier.is_exit_called() {
                return Ok(());
            }
            let current = Arc::clone(self.cursor_mut()?.current());
            let Some(action) = self.env.scheduler.poll_action(current.id()) else {
                return Ok(());
            };

            let event = action.event;
            if !self.fire(&event)? {
                continue;
            }

            if self.off_domain()? {
                tracing::info!(worker = ?self.worker, state = %current.name(), "browser left the domain");
                if self.go_back_one_state(&current)? {
                    continue;
                }
                return Ok(());
            }

            let snapshot = self.snapshot()?;
            if snapshot.normalized == current.normalized() {
                tracing::trace!(event = %event, "markup unchanged");
                continue;
            }

            let cursor = self.cursor.as_mut().ok_or(CrawlError::NoInitialState)?;
            let ctx = HookContext {
                worker: self.worker,
                path: &self.path,
            };
            match cursor.advance(event, Some(snapshot), &ctx)? {
                Advance::NewState { state, transition } => {
                    self.path.push(transition);
                    let depth = self.path.len();
                    // Someone else can take over the siblings we leave behind.
                    self.env.scheduler.requeue(current.id());
                    if self.env.limits.depth_reached(depth) {
                        tracing::info!(state = %state.name(), depth, "depth limit reached");
                        return Ok(());
                    }
                    self.extract_actions(&state);
                }
                Advance::Clone { state, transition } => {
                    self.path.push(transition);
                    tracing::debug!(worker = ?self.worker, state = %state.name(), "clone, ending path");
                    self.arrive_as_clone(&state);
                    self.env.scheduler.requeue(current.id());
                    return Ok(());
                }
                Advance::NoObservation => {}
            }
        }
    }

    fn arrive_as_clone(&self, state: &Arc<State>) {
        if self.env.scheduler.has_unreachable(state.id()) {
            self.env
                .scheduler
                .restore_actions_for_state(state.id(), self.env.graph.as_ref());
        }
        if !self.env.limits.depth_reached(self.path.len()) {
            self.extract_actions(state);
        }
    }

    /// The browser left the app while crawling `state`. Park its actions,
    /// reload and replay the path back. Returns whether the crawler made it.
    fn go_back_one_state(&mut self, state: &Arc<State>) -> Result<bool, CrawlError> {
        let parked = self.env.scheduler.purge_actions_for_state(state.id());
        let route: Vec<Arc<Transition>> = self.path.iter().cloned().collect();

        let replayed = match self.reset().and_then(|()| self.follow(&route)) {
            Ok(replayed) => replayed,
            Err(e) => {
                // Parked actions must not outlive the attempt to get back.
                let lost = self.env.scheduler.give_up(state.id());
                tracing::warn!(state = %state.name(), lost, error = %e, "replay back to state failed");
                return Err(e);
            }
        };
        if replayed {
            let restored = self
                .env
                .scheduler
                .restore_actions_for_state(state.id(), self.env.graph.as_ref());
            tracing::info!(state = %state.name(), parked, restored, "back in state");
            Ok(true)
        } else {
            let lost = self.env.scheduler.give_up(state.id());
            tracing::warn!(state = %state.name(), lost, "could not get back to state");
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::IdentityNormalizer;
    use crate::sim::{SimulatedExtractor, SimulatedSite};
    use crawlgraph_graph::InMemoryGraph;

    fn env(url: &str) -> CrawlEnv {
        let notifier = Arc::new(ExitNotifier::new(0));
        CrawlEnv {
            url: url.to_string(),
            graph: Arc::new(InMemoryGraph::new(Arc::clone(&notifier))),
            scheduler: Arc::new(ActionScheduler::default()),
            notifier,
            plugins: Arc::new(Plugins::new()),
            extractor: Arc::new(SimulatedExtractor::new(Arc::new(SimulatedSite::new(url, "<i/>")))),
            normalizer: Arc::new(IdentityNormalizer),
            limits: RunLimits::default(),
            rules: CrawlRules::default(),
            paths: Mutex::new(Vec::new()),
        }
    }

    #[test]
    fn test_same_host_stays_on_domain() {
        let env = env("http://app.test/");
        assert!(!env.left_domain("http://app.test/a/b?x=1"));
        assert!(!env.left_domain("https://APP.test:8080/"));
        assert!(!env.left_domain("http://www.app.test/"));
    }

    #[test]
    fn test_host_mentioned_elsewhere_is_off_domain() {
        let env = env("http://app.test/");
        assert!(env.left_domain("http://evil.example/?next=app.test"));
        assert!(env.left_domain("http://app.test.evil.example/"));
        assert!(env.left_domain("http://notapp.test/"));
    }

    #[test]
    fn test_unparseable_url_is_off_domain() {
        let env = env("http://app.test/");
        assert!(env.left_domain("not a url"));
        assert!(env.left_domain("about:blank"));
    }
}
