//! In-process stand-ins for a real browser.
//!
//! A `SimulatedSite` is a set of named pages joined by links. Links are
//! addressed by xpath, which is what the simulated browser matches an
//! event's identification value against. Used by the engine's own tests and
//! handy for exercising listeners without a browser.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crawlgraph_model::{CandidateAction, Event, Identification, State};

use crate::browser::{Browser, BrowserError, BrowserFactory};
use crate::extract::CandidateExtractor;

pub const INDEX_PAGE: &str = "index";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    Page(String),
    /// Navigates off the site.
    External(String),
    /// The event cannot be fired.
    Broken,
    /// Firing the event kills the browser.
    Crash,
}

#[derive(Debug, Clone)]
struct Link {
    xpath: String,
    target: LinkTarget,
}

#[derive(Debug, Clone)]
struct Page {
    url: String,
    markup: String,
    links: Vec<Link>,
}

#[derive(Debug, Clone)]
pub struct SimulatedSite {
    base_url: String,
    pages: BTreeMap<String, Page>,
}

impl SimulatedSite {
    pub fn new(base_url: impl Into<String>, index_markup: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let mut pages = BTreeMap::new();
        pages.insert(
            INDEX_PAGE.to_string(),
            Page {
                url: base_url.clone(),
                markup: index_markup.into(),
                links: Vec::new(),
            },
        );
        Self { base_url, pages }
    }

    /// Add a page served at the base url, like a client-side view change.
    pub fn page(self, name: &str, markup: impl Into<String>) -> Self {
        let url = self.base_url.clone();
        self.page_at(name, url, markup)
    }

    pub fn page_at(mut self, name: &str, url: impl Into<String>, markup: impl Into<String>) -> Self {
        self.pages.insert(
            name.to_string(),
            Page {
                url: url.into(),
                markup: markup.into(),
                links: Vec::new(),
            },
        );
        self
    }

    pub fn link(self, from: &str, xpath: &str, to: &str) -> Self {
        self.add_link(from, xpath, LinkTarget::Page(to.to_string()))
    }

    pub fn external_link(self, from: &str, xpath: &str, url: &str) -> Self {
        self.add_link(from, xpath, LinkTarget::External(url.to_string()))
    }

    pub fn broken_link(self, from: &str, xpath: &str) -> Self {
        self.add_link(from, xpath, LinkTarget::Broken)
    }

    pub fn crash_link(self, from: &str, xpath: &str) -> Self {
        self.add_link(from, xpath, LinkTarget::Crash)
    }

    fn add_link(mut self, from: &str, xpath: &str, target: LinkTarget) -> Self {
        match self.pages.get_mut(from) {
            Some(page) => page.links.push(Link {
                xpath: xpath.to_string(),
                target,
            }),
            None => tracing::warn!(page = from, xpath, "link on unknown page ignored"),
        }
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_by_markup(&self, markup: &str) -> Option<&Page> {
        self.pages.values().find(|p| p.markup == markup)
    }

    fn page_by_url(&self, url: &str) -> Option<&str> {
        if url == self.base_url {
            return Some(INDEX_PAGE);
        }
        self.pages
            .iter()
            .find(|(_, p)| p.url == url)
            .map(|(name, _)| name.as_str())
    }
}

/// Shared counters across every browser a factory created.
#[derive(Debug, Default)]
pub struct BrowserStats {
    pub created: AtomicUsize,
    pub navigations: AtomicUsize,
    pub events_fired: AtomicUsize,
    pub closed: AtomicUsize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    Blank,
    Page(String),
    External(String),
}

pub struct SimulatedBrowser {
    site: Arc<SimulatedSite>,
    location: Location,
    fire_delay: Duration,
    crashed: bool,
    stats: Arc<BrowserStats>,
}

impl SimulatedBrowser {
    pub fn new(site: Arc<SimulatedSite>) -> Self {
        Self {
            site,
            location: Location::Blank,
            fire_delay: Duration::ZERO,
            crashed: false,
            stats: Arc::new(BrowserStats::default()),
        }
    }

    fn check_alive(&self) -> Result<(), BrowserError> {
        if self.crashed {
            Err(BrowserError::Crashed)
        } else {
            Ok(())
        }
    }
}

impl Browser for SimulatedBrowser {
    fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        self.check_alive()?;
        self.stats.navigations.fetch_add(1, Ordering::Relaxed);
        self.location = match self.site.page_by_url(url) {
            Some(name) => Location::Page(name.to_string()),
            None => Location::External(url.to_string()),
        };
        Ok(())
    }

    fn current_markup(&mut self) -> Result<String, BrowserError> {
        self.check_alive()?;
        Ok(match &self.location {
            Location::Blank => String::new(),
            Location::Page(name) => self
                .site
                .pages
                .get(name)
                .map(|p| p.markup.clone())
                .unwrap_or_default(),
            Location::External(url) => format!("<html><body>{url}</body></html>"),
        })
    }

    fn current_url(&mut self) -> Result<String, BrowserError> {
        self.check_alive()?;
        Ok(match &self.location {
            Location::Blank => "about:blank".to_string(),
            Location::Page(name) => self
                .site
                .pages
                .get(name)
                .map(|p| p.url.clone())
                .unwrap_or_default(),
            Location::External(url) => url.clone(),
        })
    }

    fn fire_event(&mut self, event: &Event) -> Result<bool, BrowserError> {
        self.check_alive()?;
        let Location::Page(name) = &self.location else {
            return Ok(false);
        };
        let target = self.site.pages.get(name).and_then(|page| {
            page.links
                .iter()
                .find(|l| l.xpath == event.identification.value)
                .map(|l| l.target.clone())
        });
        let Some(target) = target else {
            return Ok(false);
        };

        if !self.fire_delay.is_zero() {
            std::thread::sleep(self.fire_delay);
        }
        self.stats.events_fired.fetch_add(1, Ordering::Relaxed);

        match target {
            LinkTarget::Page(to) if self.site.pages.contains_key(&to) => {
                self.location = Location::Page(to);
                Ok(true)
            }
            LinkTarget::Page(_) | LinkTarget::Broken => Ok(false),
            LinkTarget::External(url) => {
                self.location = Location::External(url);
                Ok(true)
            }
            LinkTarget::Crash => {
                self.crashed = true;
                Err(BrowserError::Crashed)
            }
        }
    }

    fn close(&mut self) {
        self.stats.closed.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct SimulatedBrowserFactory {
    site: Arc<SimulatedSite>,
    fire_delay: Duration,
    stats: Arc<BrowserStats>,
}

impl SimulatedBrowserFactory {
    pub fn new(site: Arc<SimulatedSite>) -> Self {
        Self {
            site,
            fire_delay: Duration::ZERO,
            stats: Arc::new(BrowserStats::default()),
        }
    }

    /// Make every fired event take at least `delay`.
    pub fn with_fire_delay(mut self, delay: Duration) -> Self {
        self.fire_delay = delay;
        self
    }

    pub fn stats(&self) -> Arc<BrowserStats> {
        Arc::clone(&self.stats)
    }
}

impl BrowserFactory for SimulatedBrowserFactory {
    fn create(&self) -> Result<Box<dyn Browser>, BrowserError> {
        self.stats.created.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(SimulatedBrowser {
            site: Arc::clone(&self.site),
            location: Location::Blank,
            fire_delay: self.fire_delay,
            crashed: false,
            stats: Arc::clone(&self.stats),
        }))
    }
}

/// Offers a click on every link of the page a state was taken from, in the
/// order the links were added.
pub struct SimulatedExtractor {
    site: Arc<SimulatedSite>,
}

impl SimulatedExtractor {
    pub fn new(site: Arc<SimulatedSite>) -> Self {
        Self { site }
    }
}

impl CandidateExtractor for SimulatedExtractor {
    fn extract(&self, state: &State) -> Vec<CandidateAction> {
        let Some(page) = self.site.page_by_markup(state.markup()) else {
            return Vec::new();
        };
        page.links
            .iter()
            .map(|l| CandidateAction::new(Event::click(Identification::xpath(&l.xpath))))
            .collect()
    }
}
