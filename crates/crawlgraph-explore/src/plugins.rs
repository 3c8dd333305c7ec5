//! Lifecycle notifications.
//!
//! Listeners are fire-and-forget: nothing they return flows back into the
//! engine, and a panicking listener is caught and logged so it cannot take a
//! worker down. Hooks are always invoked with no engine lock held.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crawlgraph_graph::ExplorationGraph;
use crawlgraph_model::{CandidateAction, CrawlPath, Event, ExitStatus, State};

/// Where a hook fired from.
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    /// Index of the worker, or `None` for the controller thread.
    pub worker: Option<usize>,
    /// Transitions followed since the worker last loaded the start url.
    pub path: &'a CrawlPath,
}

#[allow(unused_variables)]
pub trait CrawlListener: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Once, before the index page is loaded.
    fn pre_crawling(&self, url: &str) {}

    /// Each time a worker (re)loads the start url.
    fn on_url_load(&self, worker: Option<usize>) {}

    /// Once per distinct state, by the worker whose insertion won.
    fn on_new_state(&self, ctx: &HookContext<'_>, state: &State) {}

    /// A worker replaying a path arrived in `state` again.
    fn on_revisit_state(&self, ctx: &HookContext<'_>, state: &State) {}

    /// Candidate actions were extracted for `state`.
    fn pre_state_crawling(&self, ctx: &HookContext<'_>, state: &State, candidates: &[CandidateAction]) {}

    /// `event` could not be fired. `ctx.path` leads up to the failing event.
    fn on_fire_event_failed(&self, ctx: &HookContext<'_>, event: &Event) {}

    /// Once, after the run ended, unless it was aborted.
    fn post_crawling(&self, graph: &dyn ExplorationGraph, status: &ExitStatus) {}
}

/// The registered listeners of a run.
#[derive(Default)]
pub struct Plugins {
    listeners: Vec<Box<dyn CrawlListener>>,
}

impl Plugins {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, listener: impl CrawlListener + 'static) -> Self {
        self.listeners.push(Box::new(listener));
        self
    }

    pub fn register(&mut self, listener: Box<dyn CrawlListener>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    fn each(&self, hook: &'static str, f: impl Fn(&dyn CrawlListener)) {
        for listener in &self.listeners {
            let listener = listener.as_ref();
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| f(listener))) {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(listener = listener.name(), hook, panic = %message, "listener panicked");
            }
        }
    }

    pub fn run_pre_crawling(&self, url: &str) {
        self.each("pre_crawling", |l| l.pre_crawling(url));
    }

    pub fn run_on_url_load(&self, worker: Option<usize>) {
        self.each("on_url_load", |l| l.on_url_load(worker));
    }

    pub fn run_on_new_state(&self, ctx: &HookContext<'_>, state: &State) {
        self.each("on_new_state", |l| l.on_new_state(ctx, state));
    }

    pub fn run_on_revisit_state(&self, ctx: &HookContext<'_>, state: &State) {
        self.each("on_revisit_state", |l| l.on_revisit_state(ctx, state));
    }

    pub fn run_pre_state_crawling(
        &self,
        ctx: &HookContext<'_>,
        state: &State,
        candidates: &[CandidateAction],
    ) {
        self.each("pre_state_crawling", |l| {
            l.pre_state_crawling(ctx, state, candidates)
        });
    }

    pub fn run_on_fire_event_failed(&self, ctx: &HookContext<'_>, event: &Event) {
        self.each("on_fire_event_failed", |l| l.on_fire_event_failed(ctx, event));
    }

    pub fn run_post_crawling(&self, graph: &dyn ExplorationGraph, status: &ExitStatus) {
        self.each("post_crawling", |l| l.post_crawling(graph, status));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawlgraph_model::StateSnapshot;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting(Arc<AtomicUsize>);

    impl CrawlListener for Counting {
        fn on_new_state(&self, _ctx: &HookContext<'_>, _state: &State) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Panicking;

    impl CrawlListener for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn on_new_state(&self, _ctx: &HookContext<'_>, _state: &State) {
            panic!("listener bug");
        }
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let count = Arc::new(AtomicUsize::new(0));
        let plugins = Plugins::new()
            .with(Panicking)
            .with(Counting(Arc::clone(&count)));

        let state = State::from_snapshot(0, StateSnapshot::raw("u", "<a/>"));
        let path = CrawlPath::new();
        let ctx = HookContext {
            worker: Some(0),
            path: &path,
        };
        plugins.run_on_new_state(&ctx, &state);
        plugins.run_on_new_state(&ctx, &state);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_default_hooks_are_noops() {
        struct Silent;
        impl CrawlListener for Silent {}

        let plugins = Plugins::new().with(Silent);
        assert_eq!(plugins.len(), 1);
        plugins.run_pre_crawling("http://app/");
        plugins.run_on_url_load(None);
    }
}
