//! Runs one exploration: owns the graph, scheduler, notifier and browser
//! pool for the run's lifetime, starts the workers and the wall-clock
//! timer, waits for termination and shuts everything down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use crossbeam::channel;
use crawlgraph_explore::{
    ActionScheduler, BrowserFactory, BrowserPool, CandidateExtractor, ConsumerExit, CrawlEnv,
    CrawlError, CrawlListener, Crawler, IdentityNormalizer, MarkupNormalizer, Plugins, RunClock,
    TaskConsumer,
};
use crawlgraph_graph::{ExplorationGraph, InMemoryGraph};
use crawlgraph_model::ExitNotifier;

use crate::config::{ConfigError, CrawlConfig};
use crate::session::CrawlSession;

/// Lets another thread end a run started with `CrawlController::run`.
#[derive(Clone)]
pub struct CrawlHandle {
    notifier: Arc<ExitNotifier>,
    scheduler: Arc<ActionScheduler>,
    aborted: Arc<AtomicBool>,
}

impl CrawlHandle {
    /// Graceful stop: in-flight actions finish, post-crawl hooks run.
    pub fn stop(&self) {
        self.notifier.stop();
    }

    /// Stop without waiting for workers and without post-crawl hooks.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.notifier.stop();
        self.scheduler.close();
    }

    pub fn is_finished(&self) -> bool {
        self.notifier.is_exit_called()
    }
}

pub struct CrawlController {
    config: CrawlConfig,
    factory: Arc<dyn BrowserFactory>,
    extractor: Arc<dyn CandidateExtractor>,
    normalizer: Arc<dyn MarkupNormalizer>,
    plugins: Plugins,
    notifier: Arc<ExitNotifier>,
    graph: Arc<InMemoryGraph>,
    scheduler: Arc<ActionScheduler>,
    aborted: Arc<AtomicBool>,
}

impl CrawlController {
    pub fn new(
        config: CrawlConfig,
        factory: Arc<dyn BrowserFactory>,
        extractor: Arc<dyn CandidateExtractor>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let notifier = Arc::new(ExitNotifier::new(config.limits.max_states));
        let graph = Arc::new(InMemoryGraph::with_equivalence(
            Arc::clone(&notifier),
            config.rules.equivalence.build(),
        ));
        let scheduler = Arc::new(ActionScheduler::from_rules(&config.rules));
        Ok(Self {
            config,
            factory,
            extractor,
            normalizer: Arc::new(IdentityNormalizer),
            plugins: Plugins::new(),
            notifier,
            graph,
            scheduler,
            aborted: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_normalizer(mut self, normalizer: Arc<dyn MarkupNormalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_listener(mut self, listener: impl CrawlListener + 'static) -> Self {
        self.plugins.register(Box::new(listener));
        self
    }

    pub fn handle(&self) -> CrawlHandle {
        CrawlHandle {
            notifier: Arc::clone(&self.notifier),
            scheduler: Arc::clone(&self.scheduler),
            aborted: Arc::clone(&self.aborted),
        }
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    /// Explore until a limit is hit, the state space is exhausted, the run
    /// is stopped or a fatal error occurs. Fails only when the index page
    /// cannot be crawled.
    pub fn run(self) -> Result<CrawlSession, CrawlError> {
        let limits = self.config.limits.clone();
        let env = Arc::new(CrawlEnv {
            url: self.config.url.clone(),
            graph: self.graph.clone(),
            scheduler: Arc::clone(&self.scheduler),
            notifier: Arc::clone(&self.notifier),
            plugins: Arc::new(self.plugins),
            extractor: self.extractor,
            normalizer: self.normalizer,
            limits: limits.clone(),
            rules: self.config.rules.clone(),
            paths: Mutex::new(Vec::new()),
        });
        let pool = Arc::new(BrowserPool::new(self.factory, limits.browsers));

        tracing::info!(
            url = %env.url,
            browsers = limits.browsers,
            max_states = limits.max_states,
            max_depth = limits.max_depth,
            policy = env.scheduler.policy_name(),
            "starting crawl"
        );
        env.plugins.run_pre_crawling(&env.url);
        let clock = RunClock::start(&limits);

        if let Err(e) = crawl_index(&env, &pool) {
            tracing::error!(error = %e, "could not crawl the index page");
            env.notifier.signal_error(e.to_string());
            pool.close();
            return Err(e);
        }

        // Dropping `cancel_tx` releases the timer early.
        let (cancel_tx, cancel_rx) = channel::bounded::<()>(0);
        let timer = clock.remaining().map(|remaining| {
            let notifier = Arc::clone(&env.notifier);
            thread::spawn(move || {
                channel::select! {
                    recv(channel::after(remaining)) -> _ => {
                        tracing::info!("maximum run time reached");
                        notifier.signal_time_is_up();
                    }
                    recv(cancel_rx) -> _ => {}
                }
            })
        });

        let (done_tx, done_rx) = channel::unbounded::<(usize, ConsumerExit)>();
        let mut workers = HashMap::new();
        for worker in 0..limits.browsers {
            let browser = match pool.request() {
                Ok(browser) => browser,
                Err(e) => {
                    tracing::warn!(worker, error = %e, "could not start worker");
                    continue;
                }
            };
            let consumer =
                TaskConsumer::new(Crawler::new(Some(worker), Arc::clone(&env), browser), Arc::clone(&pool));
            let done = done_tx.clone();
            let handle = thread::spawn(move || {
                let exit = consumer.run();
                let _ = done.send((worker, exit));
            });
            workers.insert(worker, handle);
        }
        drop(done_tx);
        if workers.is_empty() {
            env.notifier.signal_error("no browser could be started");
        }

        let status = env.notifier.await_termination();
        tracing::info!(%status, states = env.graph.state_count(), "crawl terminated");
        env.scheduler.close();
        drop(cancel_tx);

        let aborted = self.aborted.load(Ordering::SeqCst);
        if !aborted {
            let deadline = Instant::now() + limits.shutdown_timeout;
            while !workers.is_empty() {
                let wait = deadline.saturating_duration_since(Instant::now());
                match done_rx.recv_timeout(wait) {
                    Ok((worker, exit)) => {
                        tracing::debug!(worker, ?exit, "worker stopped");
                        if let Some(handle) = workers.remove(&worker) {
                            let _ = handle.join();
                        }
                    }
                    Err(_) => {
                        tracing::warn!(stuck = workers.len(), "workers did not stop in time");
                        break;
                    }
                }
            }
        }
        if let Some(timer) = timer {
            let _ = timer.join();
        }
        pool.close();

        if aborted {
            tracing::info!("crawl aborted, skipping post-crawl notifications");
        } else {
            env.plugins.run_post_crawling(env.graph.as_ref(), &status);
        }

        Ok(CrawlSession::new(
            self.graph,
            status,
            env.take_paths(),
            env.scheduler.stats(),
            clock.elapsed_secs(),
        ))
    }
}

fn crawl_index(env: &Arc<CrawlEnv>, pool: &BrowserPool) -> Result<(), CrawlError> {
    let mut crawler = Crawler::new(None, Arc::clone(env), pool.request()?);
    let result = crawler.crawl_index();
    let browser = crawler.finish();
    match &result {
        Err(CrawlError::Browser(e)) if e.is_fatal() => {
            let _ = pool.remove(browser);
        }
        _ => pool.release(browser),
    }
    let index = result?;
    tracing::info!(state = %index.name(), actions = env.scheduler.queued_actions(index.id()), "index crawled");
    Ok(())
}
