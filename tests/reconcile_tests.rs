//! End-to-end reconciliation tests: eviction behavior across run modes,
//! multi-edit order independence, lookup diagnostics, and concurrent
//! updates.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use std::thread;

use regilt::format::Passthrough;
use regilt::locate::{locate, Disambiguator};
use regilt::store::GoldenStore;
use regilt::{Expected, Outcome, RunFlags, Session};

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

fn session(flags: RunFlags, dir: &Path) -> Session {
    Session::with_flags(flags)
        .golden_dir(dir)
        .formatter(Passthrough)
}

fn update_flags() -> RunFlags {
    RunFlags {
        update: true,
        ..RunFlags::default()
    }
}

// ============================================================================
// Golden store round trip
// ============================================================================

#[test]
fn store_round_trip_is_byte_exact() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = GoldenStore::new();
    let content = b"first line\nsecond line\n";

    store.store(dir.path(), "suite/case", content).unwrap();
    let loaded = store.load(dir.path(), "suite/case").unwrap();
    assert_eq!(loaded.as_deref(), Some(&content[..]));
}

// ============================================================================
// Idempotence
// ============================================================================

#[test]
fn repeated_comparisons_without_update_mutate_nothing() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let golden = dir.path().join("case.golden");
    let source = dir.path().join("case.rs");
    fs::write(&golden, "recorded\n").unwrap();
    fs::write(
        &source,
        "fn sample_case() {\n    check.assert_inline(file!(), \"sample_case\", expected!(\"old\"), &got);\n}\n",
    )
    .unwrap();

    let check = session(RunFlags::default(), dir.path());
    for _ in 0..2 {
        let outcome = check.check_golden("case", &"changed").unwrap();
        assert!(matches!(outcome, Outcome::Mismatch { .. }));
        let outcome = check
            .check_inline(&source, "sample_case", Expected::on_line(2, "old"), &"new")
            .unwrap();
        assert!(matches!(outcome, Outcome::Mismatch { .. }));
    }

    assert_eq!(fs::read_to_string(&golden).unwrap(), "recorded\n");
    assert!(fs::read_to_string(&source).unwrap().contains("expected!(\"old\")"));
}

// ============================================================================
// Eviction across run modes
// ============================================================================

fn seed_artifacts(dir: &Path) {
    for name in ["a", "b", "c"] {
        fs::write(dir.join(format!("{name}.golden")), format!("{name}\n")).unwrap();
    }
}

#[test]
fn full_update_run_prunes_unreferenced_artifacts() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    seed_artifacts(dir.path());

    let check = session(update_flags(), dir.path());
    // This run only produces a and b.
    assert_eq!(check.check_golden("a", &"a").unwrap(), Outcome::Passed);
    assert_eq!(check.check_golden("b", &"b").unwrap(), Outcome::Passed);

    assert!(dir.path().join("a.golden").is_file());
    assert!(dir.path().join("b.golden").is_file());
    assert!(!dir.path().join("c.golden").exists());
}

#[test]
fn update_only_run_preserves_unreferenced_artifacts() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    seed_artifacts(dir.path());

    let flags = RunFlags {
        update_only: true,
        ..RunFlags::default()
    };
    let check = session(flags, dir.path());
    assert_eq!(check.check_golden("a", &"a").unwrap(), Outcome::Passed);
    assert_eq!(check.check_golden("b", &"b").unwrap(), Outcome::Passed);

    assert!(dir.path().join("c.golden").is_file());
}

#[test]
fn filtered_update_run_preserves_unreferenced_artifacts() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    seed_artifacts(dir.path());

    let flags = RunFlags {
        update: true,
        filtered: true,
        ..RunFlags::default()
    };
    let check = session(flags, dir.path());
    assert_eq!(check.check_golden("a", &"a").unwrap(), Outcome::Passed);

    assert!(dir.path().join("b.golden").is_file());
    assert!(dir.path().join("c.golden").is_file());
}

// ============================================================================
// Multi-edit order independence
// ============================================================================

const MULTI_SITE: &str = "fn checks_three_things() {\n    check.assert_inline(file!(), \"checks_three_things\", expected!(\"one\"), &a);\n    check.assert_inline(file!(), \"checks_three_things\", expected!(\"two\"), &b);\n    check.assert_inline(file!(), \"checks_three_things\", expected!(\"three\"), &c);\n}\n";

/// Rewrite the three sites of `MULTI_SITE` in the given line order and
/// return the final file bytes.
fn patch_in_order(order: [u32; 3]) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("multi.rs");
    fs::write(&path, MULTI_SITE).unwrap();

    let old = |line: u32| match line {
        2 => "one",
        3 => "two",
        4 => "three",
        _ => unreachable!(),
    };
    let new = |line: u32| match line {
        2 => "ONE rewritten",
        // The middle site grows by two lines, shifting everything below.
        3 => "TWO\nspans\nlines",
        4 => "THREE rewritten",
        _ => unreachable!(),
    };

    let check = session(update_flags(), dir.path());
    for line in order {
        let outcome = check
            .check_inline(
                &path,
                "checks_three_things",
                Expected::on_line(line, old(line)),
                &new(line),
            )
            .unwrap();
        assert!(matches!(outcome, Outcome::Updated { .. }));
    }
    fs::read(&path).unwrap()
}

#[test]
fn edits_produce_identical_files_in_any_order() {
    init_tracing();
    let ascending = patch_in_order([2, 3, 4]);
    let descending = patch_in_order([4, 3, 2]);
    let mixed = patch_in_order([3, 2, 4]);

    assert_eq!(ascending, descending);
    assert_eq!(ascending, mixed);

    let text = String::from_utf8(ascending).unwrap();
    assert!(text.contains("expected!(\"ONE rewritten\")"));
    assert!(text.contains("expected!(r\"TWO\nspans\nlines\")"));
    assert!(text.contains("expected!(\"THREE rewritten\")"));
}

#[test]
fn same_site_can_be_rewritten_repeatedly() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("multi.rs");
    fs::write(&path, MULTI_SITE).unwrap();

    let check = session(update_flags(), dir.path());
    let replacements = ["grew\nacross\nlines", "short", "final form"];
    let mut want = "two";
    for new in replacements {
        check
            .check_inline(
                &path,
                "checks_three_things",
                Expected::on_line(3, want),
                &new,
            )
            .unwrap();
        want = new;
    }

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.contains("expected!(\"final form\")"));
    assert!(!text.contains("short"));
    // Sites around the re-edited one are untouched.
    assert!(text.contains("expected!(\"one\")"));
    assert!(text.contains("expected!(\"three\")"));
}

// ============================================================================
// Lookup diagnostics
// ============================================================================

#[test]
fn label_miss_lists_two_candidates_then_ellipsis() {
    init_tracing();
    let source = "fn labeled_cases() {\n    check.assert_inline(file!(), \"labeled_cases\", expected!(\"red\", \"1\"), &a);\n    check.assert_inline(file!(), \"labeled_cases\", expected!(\"green\", \"2\"), &b);\n    check.assert_inline(file!(), \"labeled_cases\", expected!(\"blue\", \"3\"), &c);\n}\n";
    let err = locate(
        source,
        Path::new("tests/labeled.rs"),
        "labeled_cases",
        &Disambiguator::Label("magenta".to_string()),
    )
    .unwrap_err();

    let message = err.to_string();
    assert!(
        message.ends_with("(did find \"red\", \"green\", …)"),
        "unexpected hint: {message}"
    );
}

#[test]
fn label_miss_with_one_candidate_has_no_ellipsis() {
    init_tracing();
    let source = "fn labeled_case() {\n    check.assert_inline(file!(), \"labeled_case\", expected!(\"red\", \"1\"), &a);\n}\n";
    let err = locate(
        source,
        Path::new("tests/labeled.rs"),
        "labeled_case",
        &Disambiguator::Label("magenta".to_string()),
    )
    .unwrap_err();

    let message = err.to_string();
    assert!(message.ends_with("(did find \"red\")"), "unexpected hint: {message}");
    // The hint itself carries no ellipsis when nothing was truncated.
    assert!(!message.ends_with("…)"));
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn concurrent_updates_to_one_directory_stay_consistent() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    // Stale artifact no case references; every case's previous value is
    // stale too and gets rewritten.
    fs::write(dir.path().join("stale.golden"), "stale\n").unwrap();
    let cases: Vec<String> = (0..8).map(|i| format!("case-{i}")).collect();
    for case in &cases {
        fs::write(dir.path().join(format!("{case}.golden")), "old\n").unwrap();
    }

    let check = Arc::new(session(update_flags(), dir.path()));
    let handles: Vec<_> = cases
        .iter()
        .cloned()
        .map(|case| {
            let check = Arc::clone(&check);
            thread::spawn(move || {
                let outcome = check.check_golden(&case, &format!("fresh {case}")).unwrap();
                assert!(matches!(outcome, Outcome::Updated { .. }));
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for case in &cases {
        let path = dir.path().join(format!("{case}.golden"));
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            format!("fresh {case}\n")
        );
    }
    assert!(!dir.path().join("stale.golden").exists());
}

#[test]
fn concurrent_patches_to_one_file_serialize() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("multi.rs");
    fs::write(&path, MULTI_SITE).unwrap();
    let path = Arc::new(path);

    let check = Arc::new(session(update_flags(), dir.path()));
    let sites: [(u32, &str, &str); 3] = [
        (2, "one", "ONE"),
        (3, "two", "TWO\nacross\nlines"),
        (4, "three", "THREE"),
    ];

    let handles: Vec<_> = sites
        .into_iter()
        .map(|(line, old, new)| {
            let check = Arc::clone(&check);
            let path: Arc<PathBuf> = Arc::clone(&path);
            thread::spawn(move || {
                let outcome = check
                    .check_inline(
                        path.as_path(),
                        "checks_three_things",
                        Expected::on_line(line, old),
                        &new,
                    )
                    .unwrap();
                assert!(matches!(outcome, Outcome::Updated { .. }));
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let text = fs::read_to_string(path.as_path()).unwrap();
    assert!(text.contains("expected!(\"ONE\")"));
    assert!(text.contains("expected!(r\"TWO\nacross\nlines\")"));
    assert!(text.contains("expected!(\"THREE\")"));
}
