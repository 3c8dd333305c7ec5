//! Browser collaborator and the pool that hands browsers to workers.
//!
//! A browser is owned by exactly one worker between `request` and
//! `release`/`remove`. The pool never shares a browser.

use std::sync::{Arc, Mutex};

use crawlgraph_model::Event;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrowserError {
    /// The browser process died; the browser is unusable.
    #[error("browser crashed")]
    Crashed,
    #[error("browser unavailable")]
    Unavailable,
    #[error("browser error: {0}")]
    Other(String),
}

impl BrowserError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Crashed)
    }
}

/// An automated browser.
///
/// A plain failure to fire an event is `Ok(false)`. `Err` means the browser
/// itself is in trouble.
pub trait Browser: Send {
    fn navigate(&mut self, url: &str) -> Result<(), BrowserError>;

    fn current_markup(&mut self) -> Result<String, BrowserError>;

    fn current_url(&mut self) -> Result<String, BrowserError>;

    /// Fill the event's form inputs, then fire it.
    fn fire_event(&mut self, event: &Event) -> Result<bool, BrowserError>;

    fn close_extra_windows(&mut self) -> Result<(), BrowserError> {
        Ok(())
    }

    fn close(&mut self) {}
}

pub trait BrowserFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn Browser>, BrowserError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("the last browser was lost")]
    LastBrowserLost,
    #[error("browser pool is closed")]
    Closed,
    #[error("browser pool exhausted ({0} browsers checked out)")]
    Exhausted(usize),
    #[error(transparent)]
    Browser(#[from] BrowserError),
}

struct PoolInner {
    idle: Vec<Box<dyn Browser>>,
    /// Browsers created and not removed, checked out or idle.
    live: usize,
    checked_out: usize,
    closed: bool,
}

/// Bounded set of browsers, created lazily through a `BrowserFactory`.
pub struct BrowserPool {
    factory: Arc<dyn BrowserFactory>,
    capacity: usize,
    inner: Mutex<PoolInner>,
}

impl BrowserPool {
    pub fn new(factory: Arc<dyn BrowserFactory>, capacity: usize) -> Self {
        Self {
            factory,
            capacity,
            inner: Mutex::new(PoolInner {
                idle: Vec::new(),
                live: 0,
                checked_out: 0,
                closed: false,
            }),
        }
    }

    /// Check out a browser, reusing an idle one or creating a new one while
    /// under capacity.
    pub fn request(&self) -> Result<Box<dyn Browser>, PoolError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(PoolError::Closed);
        }
        if let Some(browser) = inner.idle.pop() {
            inner.checked_out += 1;
            return Ok(browser);
        }
        if inner.live >= self.capacity {
            return Err(PoolError::Exhausted(inner.checked_out));
        }
        // Reserve the slot, then create outside the lock: startup can be slow.
        inner.live += 1;
        inner.checked_out += 1;
        drop(inner);

        match self.factory.create() {
            Ok(browser) => {
                tracing::debug!("browser created");
                Ok(browser)
            }
            Err(e) => {
                let mut inner = self.inner.lock().unwrap();
                inner.live -= 1;
                inner.checked_out -= 1;
                Err(e.into())
            }
        }
    }

    /// Return a healthy browser. Browsers returned after `close` are closed.
    pub fn release(&self, mut browser: Box<dyn Browser>) {
        let mut inner = self.inner.lock().unwrap();
        inner.checked_out = inner.checked_out.saturating_sub(1);
        if inner.closed {
            inner.live = inner.live.saturating_sub(1);
            drop(inner);
            browser.close();
        } else {
            inner.idle.push(browser);
        }
    }

    /// Destroy a crashed browser. Fails with `LastBrowserLost` when no live
    /// browser remains.
    pub fn remove(&self, mut browser: Box<dyn Browser>) -> Result<(), PoolError> {
        browser.close();
        let mut inner = self.inner.lock().unwrap();
        inner.checked_out = inner.checked_out.saturating_sub(1);
        inner.live = inner.live.saturating_sub(1);
        tracing::warn!(live = inner.live, "browser removed from pool");
        if inner.live == 0 && !inner.closed {
            return Err(PoolError::LastBrowserLost);
        }
        Ok(())
    }

    /// Close idle browsers and refuse further requests. Checked-out browsers
    /// are closed as they come back.
    pub fn close(&self) {
        let idle = {
            let mut inner = self.inner.lock().unwrap();
            inner.closed = true;
            inner.live = inner.live.saturating_sub(inner.idle.len());
            std::mem::take(&mut inner.idle)
        };
        let count = idle.len();
        for mut browser in idle {
            browser.close();
        }
        tracing::debug!(closed = count, "browser pool closed");
    }

    pub fn live(&self) -> usize {
        self.inner.lock().unwrap().live
    }

    pub fn checked_out(&self) -> usize {
        self.inner.lock().unwrap().checked_out
    }
}
