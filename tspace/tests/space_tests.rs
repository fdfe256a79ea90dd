//! Contract tests run against every engine

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tspace::{CancelToken, GlobalLockSpace, LocalSpace, Space, SpaceConfig, Template};

type Engine = Arc<dyn Space<String, String>>;

fn config() -> SpaceConfig {
    SpaceConfig {
        poll_ms: 20,
        ..SpaceConfig::default()
    }
}

fn engines() -> Vec<Engine> {
    let per_key: Engine = Arc::new(LocalSpace::new("per-key", config()).unwrap());
    let global: Engine = Arc::new(GlobalLockSpace::new("global", config()).unwrap());
    vec![per_key, global]
}

fn k(s: &str) -> String {
    s.to_string()
}

fn v(s: &str) -> String {
    s.to_string()
}

#[test]
fn test_fifo_within_key() {
    for space in engines() {
        space.out(k("k"), v("a")).unwrap();
        space.out(k("k"), v("b")).unwrap();
        assert_eq!(space.in_(&k("k")).unwrap(), "a", "{}", space.name());
        assert_eq!(space.in_(&k("k")).unwrap(), "b", "{}", space.name());
        space.close().unwrap();
    }
}

#[test]
fn test_push_to_head() {
    for space in engines() {
        space.out(k("k"), v("b")).unwrap();
        space.push(k("k"), v("a")).unwrap();
        assert_eq!(space.in_(&k("k")).unwrap(), "a");
        assert_eq!(space.in_(&k("k")).unwrap(), "b");
        space.close().unwrap();
    }
}

#[test]
fn test_put_replaces() {
    for space in engines() {
        space.out(k("k"), v("a")).unwrap();
        space.out(k("k"), v("b")).unwrap();
        space.put(k("k"), v("c")).unwrap();
        assert_eq!(space.size(&k("k")), 1);
        assert_eq!(space.rd(&k("k")).unwrap(), "c");
        space.close().unwrap();
    }
}

#[test]
fn test_expiry_is_eventually_invisible() {
    for space in engines() {
        space
            .out_timeout(k("k"), v("x"), Duration::from_millis(100))
            .unwrap();
        assert_eq!(space.rdp(&k("k")).unwrap().as_deref(), Some("x"));
        thread::sleep(Duration::from_millis(200));
        assert_eq!(space.rdp(&k("k")).unwrap(), None, "{}", space.name());
        assert!(space.metrics().expired >= 1);
        space.close().unwrap();
    }
}

#[test]
fn test_expiring_push_is_skipped_once_stale() {
    for space in engines() {
        space.out(k("k"), v("tail")).unwrap();
        space
            .push_timeout(k("k"), v("urgent"), Duration::from_millis(50))
            .unwrap();
        assert_eq!(space.rdp(&k("k")).unwrap().as_deref(), Some("urgent"));

        thread::sleep(Duration::from_millis(120));
        assert_eq!(space.rdp(&k("k")).unwrap().as_deref(), Some("tail"), "{}", space.name());
        assert_eq!(space.inp(&k("k")).unwrap().as_deref(), Some("tail"));
        assert_eq!(space.inp(&k("k")).unwrap(), None);
        space.close().unwrap();
    }
}

#[test]
fn test_expiring_put_replaces_then_lapses() {
    for space in engines() {
        space.out(k("k"), v("a")).unwrap();
        space.out(k("k"), v("b")).unwrap();
        space
            .put_timeout(k("k"), v("c"), Duration::from_millis(50))
            .unwrap();
        assert_eq!(space.size(&k("k")), 1);
        assert_eq!(space.rdp(&k("k")).unwrap().as_deref(), Some("c"));

        thread::sleep(Duration::from_millis(120));
        assert_eq!(space.rdp(&k("k")).unwrap(), None, "{}", space.name());
        assert_eq!(space.size(&k("k")), 0);
        space.close().unwrap();
    }
}

#[test]
fn test_expirable_wrapper_is_transparent() {
    for space in engines() {
        space
            .out_timeout(k("k"), v("v"), Duration::from_secs(10))
            .unwrap();
        let value: Option<String> = space.rdp(&k("k")).unwrap();
        assert_eq!(value.as_deref(), Some("v"));
        space.close().unwrap();
    }
}

#[test]
fn test_unbounded_wait_never_returns_early() {
    for space in engines() {
        let produced = Arc::new(AtomicBool::new(false));
        let producer = {
            let space = space.clone();
            let produced = produced.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                produced.store(true, Ordering::SeqCst);
                space.out(k("k"), v("v")).unwrap();
            })
        };

        let value = space.in_(&k("k")).unwrap();
        assert!(produced.load(Ordering::SeqCst));
        assert_eq!(value, "v");
        producer.join().unwrap();
        space.close().unwrap();
    }
}

#[test]
fn test_nrd_blocks_while_present() {
    for space in engines() {
        space.out(k("k"), v("v")).unwrap();
        let taken = Arc::new(AtomicBool::new(false));
        let watcher = {
            let space = space.clone();
            let taken = taken.clone();
            thread::spawn(move || {
                space.nrd(&k("k")).unwrap();
                assert!(taken.load(Ordering::SeqCst));
                Instant::now()
            })
        };

        thread::sleep(Duration::from_millis(60));
        assert!(!watcher.is_finished());
        taken.store(true, Ordering::SeqCst);
        let consumed_at = Instant::now();
        space.in_(&k("k")).unwrap();

        let returned_at = watcher.join().unwrap();
        assert!(returned_at.duration_since(consumed_at) < Duration::from_secs(1));
        space.close().unwrap();
    }
}

#[test]
fn test_nrd_on_absent_key_returns_immediately() {
    for space in engines() {
        space.nrd(&k("nothing")).unwrap();
        assert_eq!(space.nrd_timeout(&k("nothing"), Duration::from_secs(5)).unwrap(), None);
        space.close().unwrap();
    }
}

#[test]
fn test_no_loss_or_duplication_under_concurrency() {
    const N: usize = 32;
    for space in engines() {
        let producers: Vec<_> = (0..N)
            .map(|i| {
                let space = space.clone();
                thread::spawn(move || space.out(k("k"), i.to_string()).unwrap())
            })
            .collect();
        let consumers: Vec<_> = (0..N)
            .map(|_| {
                let space = space.clone();
                thread::spawn(move || space.in_(&k("k")).unwrap())
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }
        let received: Vec<String> = consumers.into_iter().map(|c| c.join().unwrap()).collect();
        let unique: HashSet<_> = received.iter().cloned().collect();
        let expected: HashSet<_> = (0..N).map(|i| i.to_string()).collect();

        assert_eq!(received.len(), N);
        assert_eq!(unique, expected, "{}", space.name());
        assert_eq!(space.size(&k("k")), 0);
        space.close().unwrap();
    }
}

#[test]
fn test_template_skips_non_matches() {
    for space in engines() {
        space.out(k("k"), v("x")).unwrap();
        space.out(k("k"), v("y")).unwrap();

        let template = Template::new(k("k"), |value: &String| value == "y");
        assert_eq!(space.in_match(&template).unwrap(), "y");
        assert_eq!(space.rd(&k("k")).unwrap(), "x");
        space.close().unwrap();
    }
}

#[test]
fn test_template_forms() {
    for space in engines() {
        space.out(k("k"), v("x")).unwrap();
        space.out(k("k"), v("y")).unwrap();

        let equals = Template::equals(k("k"), v("y"));
        let digest = Template::digest(k("k"), &v("x")).unwrap();
        let absent = Template::equals(k("k"), v("z"));

        assert_eq!(space.rdp_match(&equals).unwrap().as_deref(), Some("y"));
        assert_eq!(space.inp_match(&absent).unwrap(), None);
        assert_eq!(
            space
                .rd_match_timeout(&absent, Duration::from_millis(20))
                .unwrap(),
            None
        );
        assert_eq!(space.inp_match(&digest).unwrap().as_deref(), Some("x"));
        assert_eq!(
            space
                .in_match_timeout(&equals, Duration::from_millis(20))
                .unwrap()
                .as_deref(),
            Some("y")
        );
        assert_eq!(space.size(&k("k")), 0);
        space.close().unwrap();
    }
}

#[test]
fn test_exist_any_is_disjunctive() {
    for space in engines() {
        let keys = [k("k1"), k("k2")];
        assert!(!space.exist_any(&keys).unwrap());

        space.out(k("k2"), v("v")).unwrap();
        assert!(space.exist_any(&keys).unwrap());
        assert!(!space.exist_any(&[k("k1")]).unwrap());

        space.out(k("k1"), v("v")).unwrap();
        space.inp(&k("k1")).unwrap();
        space.inp(&k("k2")).unwrap();
        assert!(!space.exist_any(&keys).unwrap());
        space.close().unwrap();
    }
}

#[test]
fn test_exist_any_timeout_waits_for_insert() {
    for space in engines() {
        let producer = {
            let space = space.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(40));
                space.out(k("late"), v("v")).unwrap();
            })
        };
        assert!(space
            .exist_any_timeout(&[k("early"), k("late")], Duration::from_secs(5))
            .unwrap());
        assert!(!space
            .exist_any_timeout(&[k("never")], Duration::from_millis(30))
            .unwrap());
        producer.join().unwrap();
        space.close().unwrap();
    }
}

#[test]
fn test_timeouts_return_none() {
    for space in engines() {
        let started = Instant::now();
        assert_eq!(space.in_timeout(&k("k"), Duration::from_millis(30)).unwrap(), None);
        assert_eq!(space.rd_timeout(&k("k"), Duration::from_millis(30)).unwrap(), None);
        assert!(started.elapsed() >= Duration::from_millis(60));
        assert!(space.keys().is_empty(), "{}", space.name());
        assert_eq!(space.metrics().timeouts, 2);
        space.close().unwrap();
    }
}

#[test]
fn test_cancelled_wait_leaves_later_values_alone() {
    for space in engines() {
        let token = CancelToken::new();
        let waiter = {
            let space = Arc::clone(&space);
            let token = token.clone();
            thread::spawn(move || space.in_cancellable(&k("k"), None, &token))
        };
        thread::sleep(Duration::from_millis(30));
        token.cancel();
        assert_eq!(waiter.join().unwrap().unwrap(), None, "{}", space.name());

        space.out(k("k"), v("kept")).unwrap();
        assert_eq!(space.rdp(&k("k")).unwrap().as_deref(), Some("kept"));

        let only_b = Template::new(k("k"), |value: &String| value == "b");
        let patience = Some(Duration::from_millis(10));
        let found = space
            .in_match_cancellable(&only_b, patience, &CancelToken::new())
            .unwrap();
        assert_eq!(found, None);
        space.close().unwrap();
    }
}

#[test]
fn test_listener_fires_once_per_registration() {
    for space in engines() {
        let hits = Arc::new(support::Counter::default());
        let counter = hits.clone();
        space
            .add_listener(
                k("k"),
                Arc::new(move |_: &String, value: &String| counter.add(value.len())),
            )
            .unwrap();

        space.out(k("k"), v("abc")).unwrap();
        space.out(k("k"), v("abcdef")).unwrap();
        assert_eq!(hits.get(), 3, "{}", space.name());
        space.close().unwrap();
    }
}

#[test]
fn test_timed_listener_registration_lapses() {
    for space in engines() {
        let hits = Arc::new(support::Counter::default());
        let counter = hits.clone();
        space
            .add_listener_timeout(
                k("k"),
                Arc::new(move |_: &String, _: &String| counter.add(1)),
                Duration::from_millis(20),
            )
            .unwrap();

        thread::sleep(Duration::from_millis(50));
        space.out(k("k"), v("v")).unwrap();
        assert_eq!(hits.get(), 0);
        space.close().unwrap();
    }
}

#[test]
fn test_closed_space_rejects_everything() {
    for space in engines() {
        space.out(k("k"), v("v")).unwrap();
        space.close().unwrap();
        assert!(space.is_closed());
        assert!(space.close().is_ok());

        assert!(space.out(k("k"), v("v")).unwrap_err().is_closed());
        assert!(space.inp(&k("k")).unwrap_err().is_closed());
        assert!(space.rd_timeout(&k("k"), Duration::from_millis(5)).unwrap_err().is_closed());
        assert!(space.exist_any(&[k("k")]).unwrap_err().is_closed());
        assert_eq!(space.size(&k("k")), 0);
    }
}

/// Small shared counter so listener closures stay `Fn`
mod support {
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    pub struct Counter(AtomicUsize);

    impl Counter {
        pub fn add(&self, n: usize) {
            self.0.fetch_add(n, Ordering::SeqCst);
        }

        pub fn get(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }
}
