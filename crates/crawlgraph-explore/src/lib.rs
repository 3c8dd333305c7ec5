//! Concurrent exploration: the action scheduler, the per-worker crawl loop,
//! browser pooling and the run limits and rules that steer them.

pub mod browser;
pub mod consumer;
pub mod crawler;
pub mod cursor;
pub mod extract;
pub mod limits;
pub mod plugins;
pub mod rules;
pub mod scheduler;
pub mod sim;

pub use browser::{Browser, BrowserError, BrowserFactory, BrowserPool, PoolError};
pub use consumer::{ConsumerExit, TaskConsumer};
pub use crawler::{CrawlEnv, CrawlError, Crawler};
pub use cursor::{Advance, StateCursor};
pub use extract::{CandidateExtractor, IdentityNormalizer, MarkupNormalizer, WhitespaceNormalizer};
pub use limits::{LimitViolation, RunClock, RunLimits};
pub use plugins::{CrawlListener, HookContext, Plugins};
pub use rules::{CrawlRules, DispatchOrder, EquivalenceRule, SelectionRule};
pub use scheduler::policy::{FifoSelection, InfluenceSelection, RandomSelection, SelectionPolicy};
pub use scheduler::{ActionScheduler, SchedulerStats, Work};
