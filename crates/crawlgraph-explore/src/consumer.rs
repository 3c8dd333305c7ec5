//! One worker: takes tasks from the scheduler until the run ends.

use std::sync::Arc;

use crate::browser::{BrowserPool, PoolError};
use crate::crawler::{CrawlError, Crawler};
use crate::scheduler::Work;

/// Why a consumer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerExit {
    /// The scheduler was closed or the run was asked to stop.
    Shutdown,
    /// This consumer saw that no work is left anywhere.
    Exhausted,
    /// Its browser crashed and was taken out of the pool.
    BrowserLost,
    /// A fatal error was signalled to the run.
    Failed,
}

pub struct TaskConsumer {
    crawler: Crawler,
    pool: Arc<BrowserPool>,
}

impl TaskConsumer {
    pub fn new(crawler: Crawler, pool: Arc<BrowserPool>) -> Self {
        Self { crawler, pool }
    }

    pub fn run(mut self) -> ConsumerExit {
        let env = Arc::clone(self.crawler.env());
        let worker = self.crawler.worker();
        tracing::debug!(worker = ?worker, "consumer started");

        let exit = loop {
            if env.notifier.is_exit_called() {
                break ConsumerExit::Shutdown;
            }
            let state = match env.scheduler.await_work() {
                Work::Shutdown => break ConsumerExit::Shutdown,
                Work::Exhausted => {
                    tracing::info!(worker = ?worker, "no work left, crawl exhausted");
                    env.notifier.signal_crawl_exhausted();
                    break ConsumerExit::Exhausted;
                }
                Work::State(state) => state,
            };

            let result = self.crawler.execute(state);
            env.scheduler.task_done(state);

            match result {
                Ok(()) => {}
                Err(CrawlError::Browser(e)) if e.is_fatal() => {
                    tracing::warn!(worker = ?worker, error = %e, "browser crashed, removing it");
                    let browser = self.crawler.finish();
                    if let Err(PoolError::LastBrowserLost) = self.pool.remove(browser) {
                        tracing::error!("all browsers lost");
                        env.notifier.signal_error(PoolError::LastBrowserLost.to_string());
                    }
                    return ConsumerExit::BrowserLost;
                }
                Err(CrawlError::Browser(e)) => {
                    tracing::warn!(worker = ?worker, state, error = %e, "task abandoned");
                }
                Err(e) => {
                    tracing::error!(worker = ?worker, state, error = %e, "crawl failed");
                    env.notifier.signal_error(e.to_string());
                    break ConsumerExit::Failed;
                }
            }
        };

        self.pool.release(self.crawler.finish());
        tracing::debug!(worker = ?worker, ?exit, "consumer stopped");
        exit
    }
}
