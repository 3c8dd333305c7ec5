use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crawlgraph_core::{CrawlConfig, CrawlController, CrawlSession};
use crawlgraph_explore::sim::{SimulatedBrowserFactory, SimulatedExtractor, SimulatedSite};
use crawlgraph_explore::{CrawlListener, DispatchOrder, SelectionRule};
use crawlgraph_graph::ExplorationGraph;
use crawlgraph_model::{ExitStatus, INDEX_ID};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const BASE: &str = "http://app.test/";

fn config() -> CrawlConfig {
    CrawlConfig::new(BASE)
        .with_max_depth(0)
        .with_max_run_time(Duration::ZERO)
        .with_shutdown_timeout(Duration::from_secs(5))
}

fn controller(site: SimulatedSite, config: CrawlConfig) -> CrawlController {
    let site = Arc::new(site);
    CrawlController::new(
        config,
        Arc::new(SimulatedBrowserFactory::new(Arc::clone(&site))),
        Arc::new(SimulatedExtractor::new(site)),
    )
    .unwrap()
}

fn run(site: SimulatedSite, config: CrawlConfig) -> CrawlSession {
    controller(site, config).run().unwrap()
}

/// A site whose index offers `links` slow links to distinct pages.
fn slow_site(links: usize) -> SimulatedSite {
    let mut site = SimulatedSite::new(BASE, "<index/>");
    for i in 0..links {
        let name = format!("p{i}");
        site = site
            .page(&name, format!("<page id={i}/>"))
            .link("index", &format!("/L{i}"), &name);
    }
    site
}

#[derive(Default)]
struct Lifecycle {
    pre: AtomicUsize,
    post: AtomicUsize,
    post_states: AtomicUsize,
}

struct LifecycleListener(Arc<Lifecycle>);

impl CrawlListener for LifecycleListener {
    fn pre_crawling(&self, _url: &str) {
        self.0.pre.fetch_add(1, Ordering::SeqCst);
    }

    fn post_crawling(&self, graph: &dyn ExplorationGraph, _status: &ExitStatus) {
        self.0.post.fetch_add(1, Ordering::SeqCst);
        self.0.post_states.store(graph.state_count(), Ordering::SeqCst);
    }
}

#[test]
fn test_equal_outcomes_collapse_to_one_state() {
    let site = SimulatedSite::new(BASE, "<s0/>")
        .page("s1", "<s1/>")
        .link("index", "/A1", "s1")
        .link("index", "/A2", "s1");
    let session = run(site, config().with_browsers(2));

    assert_eq!(session.exit_status(), &ExitStatus::Exhausted);
    assert_eq!(session.state_count(), 2);
    assert_eq!(session.transition_count(), 2);
    assert!(session
        .transitions()
        .iter()
        .all(|t| t.source() == INDEX_ID && t.target() == 1));
}

#[test]
fn test_max_states_one_terminates_immediately() {
    let site = slow_site(3);
    let session = run(site, config().with_max_states(1));

    assert_eq!(session.exit_status(), &ExitStatus::MaxStates);
    assert_eq!(session.state_count(), 1);
    assert_eq!(session.transition_count(), 0);
}

#[test]
fn test_left_domain_parks_and_restores_remaining_actions() {
    let site = SimulatedSite::new(BASE, "<index/>")
        .page("a", "<a/>")
        .page("b", "<b/>")
        .page("c", "<c/>")
        .external_link("index", "/OUT", "http://elsewhere.test/")
        .link("index", "/A", "a")
        .link("index", "/B", "b")
        .link("index", "/C", "c");
    let session = run(site, config().with_browsers(1));

    assert_eq!(session.exit_status(), &ExitStatus::Exhausted);
    assert_eq!(session.state_count(), 4);
    let stats = session.scheduler_stats();
    assert_eq!(stats.actions_parked, 3);
    assert_eq!(stats.actions_restored, 3);
    assert_eq!(stats.crawlers_lost, 1);
    assert_eq!(stats.queued_actions, 0);
}

#[test]
fn test_max_run_time() {
    let site = Arc::new(slow_site(50));
    let controller = CrawlController::new(
        config().with_max_run_time(Duration::from_millis(150)),
        Arc::new(
            SimulatedBrowserFactory::new(Arc::clone(&site))
                .with_fire_delay(Duration::from_millis(20)),
        ),
        Arc::new(SimulatedExtractor::new(site)),
    )
    .unwrap();

    let session = controller.run().unwrap();
    assert_eq!(session.exit_status(), &ExitStatus::MaxTime);
    assert!(session.state_count() < 51);
}

#[test]
fn test_stop_runs_post_crawling() {
    let site = Arc::new(slow_site(50));
    let lifecycle = Arc::new(Lifecycle::default());
    let controller = CrawlController::new(
        config(),
        Arc::new(
            SimulatedBrowserFactory::new(Arc::clone(&site))
                .with_fire_delay(Duration::from_millis(20)),
        ),
        Arc::new(SimulatedExtractor::new(site)),
    )
    .unwrap()
    .with_listener(LifecycleListener(Arc::clone(&lifecycle)));

    let handle = controller.handle();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        handle.stop();
    });
    let session = controller.run().unwrap();
    stopper.join().unwrap();

    assert_eq!(session.exit_status(), &ExitStatus::Stopped);
    assert_eq!(lifecycle.pre.load(Ordering::SeqCst), 1);
    assert_eq!(lifecycle.post.load(Ordering::SeqCst), 1);
    assert_eq!(
        lifecycle.post_states.load(Ordering::SeqCst),
        session.state_count()
    );
}

#[test]
fn test_abort_skips_post_crawling() {
    let site = Arc::new(slow_site(50));
    let lifecycle = Arc::new(Lifecycle::default());
    let controller = CrawlController::new(
        config(),
        Arc::new(
            SimulatedBrowserFactory::new(Arc::clone(&site))
                .with_fire_delay(Duration::from_millis(20)),
        ),
        Arc::new(SimulatedExtractor::new(site)),
    )
    .unwrap()
    .with_listener(LifecycleListener(Arc::clone(&lifecycle)));

    let handle = controller.handle();
    let aborter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        handle.abort();
    });
    let session = controller.run().unwrap();
    aborter.join().unwrap();

    assert_eq!(session.exit_status(), &ExitStatus::Stopped);
    assert_eq!(lifecycle.post.load(Ordering::SeqCst), 0);
}

#[test]
fn test_crashed_browser_does_not_stop_others() {
    let site = SimulatedSite::new(BASE, "<index/>")
        .page("a", "<a/>")
        .page("b", "<b/>")
        .link("index", "/A", "a")
        .crash_link("index", "/BOOM")
        .link("index", "/B", "b");
    let session = run(site, config().with_browsers(2));

    assert_eq!(session.exit_status(), &ExitStatus::Exhausted);
    assert_eq!(session.state_count(), 3);
}

#[test]
fn test_last_browser_lost_is_an_error() {
    let site = SimulatedSite::new(BASE, "<index/>")
        .page("a", "<a/>")
        .crash_link("index", "/BOOM")
        .link("index", "/A", "a");
    let session = run(site, config().with_browsers(1));

    assert!(matches!(session.exit_status(), ExitStatus::Error(_)));
}

#[test]
fn test_index_without_actions_is_exhausted() {
    let session = run(SimulatedSite::new(BASE, "<index/>"), config().with_browsers(3));
    assert_eq!(session.exit_status(), &ExitStatus::Exhausted);
    assert_eq!(session.state_count(), 1);
    assert!(session.all_possible_paths().is_empty());
}

#[test]
fn test_session_queries_on_diamond() {
    let site = SimulatedSite::new(BASE, "<index/>")
        .page("l", "<l/>")
        .page("r", "<r/>")
        .page("end", "<end/>")
        .link("index", "/L", "l")
        .link("index", "/R", "r")
        .link("l", "/E", "end")
        .link("r", "/E", "end");
    let session = run(site, config());

    assert_eq!(session.state_count(), 4);
    assert_eq!(session.transition_count(), 4);

    let end = session
        .states()
        .into_iter()
        .find(|s| s.markup() == "<end/>")
        .unwrap();
    let path = session.shortest_path(INDEX_ID, end.id()).unwrap();
    assert_eq!(path.len(), 2);

    let paths = session.all_possible_paths();
    assert!(!paths.is_empty());
    assert!(paths.iter().any(|p| p.end() == Some(end.id())));
    assert!(session.mean_markup_size() > 0.0);
    assert!(!session.crawl_paths().is_empty());

    let report: serde_json::Value = serde_json::from_str(&session.report_json().unwrap()).unwrap();
    assert_eq!(report["graph"]["state_count"], 4);
    assert_eq!(report["status"], "Exhausted");
}

/// Random sites crawled by several workers: every page reachable from the
/// index is found exactly once and every link between distinct reachable
/// pages becomes exactly one transition.
#[test]
fn test_random_sites_fully_explored() {
    for seed in 0..4u64 {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let pages = 20;
        let mut links: Vec<Vec<usize>> = vec![Vec::new(); pages];
        let mut site = SimulatedSite::new(BASE, "<page id=0/>");
        let name = |i: usize| if i == 0 { "index".to_string() } else { format!("p{i}") };
        for i in 1..pages {
            site = site.page(&name(i), format!("<page id={i}/>"));
        }
        for from in 0..pages {
            for k in 0..rng.gen_range(0..4) {
                let to = rng.gen_range(0..pages);
                links[from].push(to);
                site = site.link(&name(from), &format!("/a{k}"), &name(to));
            }
        }

        let mut reachable = HashSet::from([0usize]);
        let mut queue = VecDeque::from([0usize]);
        while let Some(p) = queue.pop_front() {
            for &to in &links[p] {
                if reachable.insert(to) {
                    queue.push_back(to);
                }
            }
        }
        let expected_edges: usize = reachable
            .iter()
            .map(|&p| links[p].iter().filter(|&&to| to != p).count())
            .sum();

        let config = config()
            .with_browsers(4)
            .with_dispatch(if seed % 2 == 0 {
                DispatchOrder::DepthFirst
            } else {
                DispatchOrder::Fifo
            })
            .with_selection(SelectionRule::Random { seed });
        let session = run(site, config);

        assert_eq!(session.exit_status(), &ExitStatus::Exhausted, "seed {seed}");
        assert_eq!(session.state_count(), reachable.len(), "seed {seed}");
        assert_eq!(session.transition_count(), expected_edges, "seed {seed}");

        let markups: HashSet<_> = session.states().iter().map(|s| s.markup().to_string()).collect();
        assert_eq!(markups.len(), session.state_count());
        for state in session.states() {
            assert!(session.shortest_path(INDEX_ID, state.id()).is_some());
        }
    }
}

#[test]
fn test_handle_reports_finished() {
    let controller = controller(SimulatedSite::new(BASE, "<index/>"), config());
    let handle = controller.handle();
    assert!(!handle.is_finished());
    controller.run().unwrap();
    assert!(handle.is_finished());
}
