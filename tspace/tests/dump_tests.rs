//! Diagnostic dump format

use std::sync::Arc;
use std::time::Duration;

use tspace::{GlobalLockSpace, LocalSpace, Space, SpaceConfig};

fn quiet() -> SpaceConfig {
    SpaceConfig {
        sweeper: false,
        ..SpaceConfig::default()
    }
}

fn render(space: &dyn Space<String, String>) -> String {
    let mut out = Vec::new();
    space.dump(&mut out, "").unwrap();
    String::from_utf8(out).unwrap()
}

fn fill(space: &dyn Space<String, String>) {
    space.out("alpha".into(), "one".into()).unwrap();
    space.out("alpha".into(), "two".into()).unwrap();
    space
        .out_timeout("beta".into(), "three".into(), Duration::from_secs(600))
        .unwrap();
}

#[test]
fn test_dump_lists_keys_sizes_and_heads() {
    let space: LocalSpace<String, String> = LocalSpace::new("dump", quiet()).unwrap();
    fill(&space);

    let text = render(&space);
    insta::assert_snapshot!(text.trim_end(), @r###"
    space dump (2 keys)
      "alpha" size=2 head="one"
      "beta" size=1 head="three"
      gc short=0 long=1
      metrics inserts=3 takes=0 reads=0 misses=0 timeouts=0 expired=0 sweeps=0 removed=0 fired=0 panics=0 sweep_panics=0
    "###);
    space.close().unwrap();
}

#[test]
fn test_engines_share_the_format() {
    let local: LocalSpace<String, String> = LocalSpace::new("same", quiet()).unwrap();
    let global: GlobalLockSpace<String, String> = GlobalLockSpace::new("same", quiet()).unwrap();
    fill(&local);
    fill(&global);

    assert_eq!(render(&local), render(&global));
    local.close().unwrap();
    global.close().unwrap();
}

#[test]
fn test_dump_limit_truncates() {
    let config = SpaceConfig {
        dump_limit: 2,
        ..quiet()
    };
    let space: LocalSpace<String, String> = LocalSpace::new("limited", config).unwrap();
    for i in 0..5 {
        space.out(format!("k{i}"), "v".into()).unwrap();
    }

    let text = render(&space);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "space limited (5 keys)");
    assert_eq!(lines[1], "  \"k0\" size=1 head=\"v\"");
    assert_eq!(lines[2], "  \"k1\" size=1 head=\"v\"");
    assert_eq!(lines[3], "  ... 3 more");
    assert!(lines[4].starts_with("  gc "));
    space.close().unwrap();
}

#[test]
fn test_indent_and_listener_section() {
    let space: LocalSpace<String, String> = LocalSpace::new("nested", quiet()).unwrap();
    space
        .add_listener("k".into(), Arc::new(|_: &String, _: &String| {}))
        .unwrap();

    let mut out = Vec::new();
    space.dump(&mut out, "> ").unwrap();
    let text = String::from_utf8(out).unwrap();

    assert!(text.starts_with("> space nested (0 keys)\n"));
    assert!(text.contains("\n>   space nested.listeners (1 keys)\n"));
    assert!(text.lines().all(|line| line.starts_with("> ")));
    space.close().unwrap();
}

#[test]
fn test_closed_space_is_marked() {
    let space: LocalSpace<String, String> = LocalSpace::new("gone", quiet()).unwrap();
    fill(&space);
    space.close().unwrap();

    let text = render(&space);
    assert!(text.starts_with("space gone (0 keys) closed\n"));
}

#[test]
fn test_expired_head_is_skipped() {
    let space: LocalSpace<String, String> = LocalSpace::new("stale", quiet()).unwrap();
    space
        .out_timeout("k".into(), "old".into(), Duration::from_millis(5))
        .unwrap();
    space.out("k".into(), "fresh".into()).unwrap();
    std::thread::sleep(Duration::from_millis(20));

    // Expired entries still count until something reclaims them
    let text = render(&space);
    assert!(text.contains("  \"k\" size=2 head=\"fresh\"\n"), "{text}");
    space.close().unwrap();
}
