//! Wake-up, close and cancellation behaviour under contention

use std::collections::HashMap;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use tspace::{CancelToken, LocalSpace, Space, SpaceConfig};

fn space(name: &str) -> LocalSpace<u32, u64> {
    let config = SpaceConfig {
        poll_ms: 20,
        short_sweep_ms: 10,
        long_sweep_ms: 50,
        ..SpaceConfig::default()
    };
    LocalSpace::new(name, config).unwrap()
}

#[test]
fn test_many_keys_many_threads() {
    const KEYS: u32 = 16;
    const PER_KEY: u64 = 200;
    let space = space("many");

    let consumers: Vec<_> = (0..KEYS)
        .map(|key| {
            let space = space.clone();
            thread::spawn(move || {
                let mut sum = 0;
                for _ in 0..PER_KEY {
                    sum += space.in_(&key).unwrap();
                }
                (key, sum)
            })
        })
        .collect();
    let producers: Vec<_> = (0..KEYS)
        .map(|key| {
            let space = space.clone();
            thread::spawn(move || {
                for i in 0..PER_KEY {
                    space.out(key, i).unwrap();
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }
    let sums: HashMap<u32, u64> = consumers.into_iter().map(|c| c.join().unwrap()).collect();
    let expected: u64 = (0..PER_KEY).sum();
    assert_eq!(sums.len(), KEYS as usize);
    assert!(sums.values().all(|sum| *sum == expected));

    // Drained keys leave nothing behind
    assert!(space.keys().is_empty());
    let metrics = space.metrics();
    assert_eq!(metrics.inserts, u64::from(KEYS) * PER_KEY);
    assert_eq!(metrics.takes, u64::from(KEYS) * PER_KEY);
    space.close().unwrap();
}

#[test]
fn test_insert_only_wakes_its_own_key() {
    let space = space("isolation");
    let start = Arc::new(Barrier::new(3));

    let waiters: Vec<_> = [1u32, 2]
        .into_iter()
        .map(|key| {
            let space = space.clone();
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                space.in_timeout(&key, Duration::from_millis(300)).unwrap()
            })
        })
        .collect();

    start.wait();
    thread::sleep(Duration::from_millis(30));
    space.out(1, 10).unwrap();

    let results: Vec<_> = waiters.into_iter().map(|w| w.join().unwrap()).collect();
    assert_eq!(results, vec![Some(10), None]);
    space.close().unwrap();
}

#[test]
fn test_readers_and_takers_share_a_key() {
    let space = space("mixed");
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let space = space.clone();
            thread::spawn(move || space.rd(&7).unwrap())
        })
        .collect();
    let taker = {
        let space = space.clone();
        thread::spawn(move || space.in_(&7).unwrap())
    };

    thread::sleep(Duration::from_millis(30));
    // One value for the taker, one that stays for the readers
    space.out(7, 1).unwrap();
    space.out(7, 1).unwrap();

    assert_eq!(taker.join().unwrap(), 1);
    for reader in readers {
        assert_eq!(reader.join().unwrap(), 1);
    }
    assert_eq!(space.size(&7), 1);
    space.close().unwrap();
}

#[test]
fn test_close_wakes_every_kind_of_waiter() {
    let space = space("closing");
    space.out(99, 1).unwrap();

    let take = {
        let space = space.clone();
        thread::spawn(move || space.in_(&1).map(|_| ()))
    };
    let read = {
        let space = space.clone();
        thread::spawn(move || space.rd_timeout(&2, Duration::from_secs(30)).map(|_| ()))
    };
    let nrd = {
        let space = space.clone();
        thread::spawn(move || space.nrd(&99))
    };
    let exist = {
        let space = space.clone();
        thread::spawn(move || space.exist_any_timeout(&[3, 4], Duration::from_secs(30)).map(|_| ()))
    };

    thread::sleep(Duration::from_millis(50));
    let closed_at = Instant::now();
    space.close().unwrap();

    for waiter in [take, read, nrd, exist] {
        let err = waiter.join().unwrap().unwrap_err();
        assert!(err.is_closed(), "{err}");
    }
    assert!(closed_at.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_cancel_one_waiter_leaves_others_blocked() {
    let space = space("cancel");
    let token = CancelToken::new();

    let cancelled = {
        let space = space.clone();
        let token = token.clone();
        thread::spawn(move || space.in_cancellable(&5, None, &token))
    };
    let patient = {
        let space = space.clone();
        thread::spawn(move || space.in_cancellable(&5, None, &CancelToken::new()))
    };

    thread::sleep(Duration::from_millis(30));
    token.cancel();
    assert_eq!(cancelled.join().unwrap().unwrap(), None);

    // The other waiter still holds the key record open
    assert_eq!(space.keys(), vec![5]);
    space.out(5, 50).unwrap();
    assert_eq!(patient.join().unwrap().unwrap(), Some(50));
    space.close().unwrap();
}

#[test]
fn test_background_sweeper_reclaims_expired_keys() {
    let space = space("sweeping");
    for key in 0..20 {
        space.out_timeout(key, 0, Duration::from_millis(5)).unwrap();
    }
    space.out_timeout(100, 1, Duration::from_secs(600)).unwrap();
    assert_eq!(space.keys().len(), 21);

    let deadline = Instant::now() + Duration::from_secs(5);
    while space.keys().len() > 1 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }

    assert_eq!(space.keys(), vec![100]);
    let metrics = space.metrics();
    assert_eq!(metrics.expired, 20);
    assert!(metrics.sweeps >= 1);
    space.close().unwrap();
}
