//! Run limits and their validation.
//!
//! Limits bound a run that could otherwise go on forever on an infinite state
//! space. Hitting one is not an error: the run stops cooperatively and keeps
//! everything explored so far.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Read-only limits for one exploration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunLimits {
    /// Maximum distance from the index state. 0 means unlimited.
    pub max_depth: usize,
    /// Wall-clock budget. Zero means unlimited.
    #[serde(with = "duration_secs")]
    pub max_run_time: Duration,
    /// Maximum distinct states. 0 means unlimited.
    pub max_states: usize,
    /// Number of workers, each driving its own browser.
    pub browsers: usize,
    /// How long shutdown waits for in-flight workers before giving up on them.
    #[serde(with = "duration_secs")]
    pub shutdown_timeout: Duration,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_depth: 2,
            max_run_time: Duration::from_secs(60 * 60),
            max_states: 0,
            browsers: 1,
            shutdown_timeout: Duration::from_secs(15),
        }
    }
}

impl RunLimits {
    pub fn unlimited() -> Self {
        Self {
            max_depth: 0,
            max_run_time: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Whether a path of `depth` transitions is as deep as the run may go.
    pub fn depth_reached(&self, depth: usize) -> bool {
        self.max_depth > 0 && depth >= self.max_depth
    }

    pub fn run_time_limited(&self) -> bool {
        !self.max_run_time.is_zero()
    }

    pub fn validate(&self) -> Result<(), LimitViolation> {
        if self.browsers == 0 {
            return Err(LimitViolation::NoBrowsers);
        }
        if self.shutdown_timeout.is_zero() {
            return Err(LimitViolation::ZeroShutdownTimeout);
        }
        Ok(())
    }
}

/// A limit configuration the engine refuses to run with.
#[derive(Debug, Clone, PartialEq)]
pub enum LimitViolation {
    NoBrowsers,
    ZeroShutdownTimeout,
}

impl std::fmt::Display for LimitViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoBrowsers => write!(f, "at least one browser is required"),
            Self::ZeroShutdownTimeout => write!(f, "shutdown timeout must be positive"),
        }
    }
}

impl std::error::Error for LimitViolation {}

/// Measures elapsed run time against `RunLimits::max_run_time`.
pub struct RunClock {
    max_run_time: Option<Duration>,
    start_time: Instant,
}

impl RunClock {
    pub fn start(limits: &RunLimits) -> Self {
        Self {
            max_run_time: limits.run_time_limited().then_some(limits.max_run_time),
            start_time: Instant::now(),
        }
    }

    /// Time left before the limit, `None` when unlimited.
    pub fn remaining(&self) -> Option<Duration> {
        self.max_run_time
            .map(|max| max.saturating_sub(self.start_time.elapsed()))
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }
}

/// Durations as fractional seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}
