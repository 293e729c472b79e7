use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use fsearch_core::{
    ChannelSink, Error, Field, Index, IndexOptions, SearchEngine, SearchHit, SearchOptions,
    SearchResult,
};
use parking_lot::Mutex;
use tempfile::TempDir;
use unicode_segmentation::UnicodeSegmentation;

/// Create a file inside a temp dir, creating parent directories.
fn create_file(base: &Path, relative: &str, contents: &str) {
    let full_path = base.join(relative);
    if let Some(parent) = full_path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&full_path, contents).unwrap();
}

/// Tree used by most tests:
/// docs/report.pdf, docs/REPORT-2024.txt, src/main.rs, src/lib.rs, notes.txt
fn fixture() -> (TempDir, Arc<Index>) {
    let dir = TempDir::new().unwrap();
    create_file(dir.path(), "docs/report.pdf", "%PDF");
    create_file(dir.path(), "docs/REPORT-2024.txt", "q4");
    create_file(dir.path(), "src/main.rs", "fn main() {}");
    create_file(dir.path(), "src/lib.rs", "");
    create_file(dir.path(), "notes.txt", "remember the milk");

    let build = Index::build(&[dir.path()], &IndexOptions::default()).unwrap();
    assert!(build.failures.is_empty());
    (dir, Arc::new(build.index))
}

fn run(
    engine: &SearchEngine,
    index: &Arc<Index>,
    query: &str,
    options: SearchOptions,
) -> Vec<SearchResult> {
    let (sink, rx) = ChannelSink::new();
    let id = engine
        .start_search(index, query, &options, Arc::new(sink))
        .unwrap();
    engine.join_search(id).unwrap();
    rx.try_iter().collect()
}

fn names(results: &[SearchResult]) -> BTreeSet<String> {
    results.iter().map(|r| r.entry.name.clone()).collect()
}

#[test]
fn plain_term_matches_names_case_insensitively() {
    let (_dir, index) = fixture();
    let engine = SearchEngine::new();

    let results = run(&engine, &index, "report", SearchOptions::default());
    assert_eq!(
        names(&results),
        BTreeSet::from(["report.pdf".to_string(), "REPORT-2024.txt".to_string()])
    );

    for result in &results {
        let name = &result.highlights[0];
        assert_eq!(name.field, Field::Name);
        assert_eq!(name.ranges.len(), 1);
        assert_eq!((name.ranges[0].start, name.ranges[0].end), (0, 6));
    }
}

#[test]
fn case_sensitive_option_narrows_results() {
    let (_dir, index) = fixture();
    let engine = SearchEngine::new();

    let options = SearchOptions {
        case_sensitive: true,
        ..Default::default()
    };
    let results = run(&engine, &index, "REPORT", options);
    assert_eq!(names(&results), BTreeSet::from(["REPORT-2024.txt".to_string()]));
}

#[test]
fn cap_of_one_delivers_exactly_one_result() {
    let (_dir, index) = fixture();
    let engine = SearchEngine::new();

    let options = SearchOptions {
        max_results: 1,
        ..Default::default()
    };
    let results = run(&engine, &index, "path:src", options);
    assert_eq!(results.len(), 1);
    assert!(results[0].entry.path.contains("src"));
}

#[test]
fn empty_field_qualifier_is_rejected_without_a_search() {
    let (_dir, index) = fixture();
    let engine = SearchEngine::new();
    let (sink, rx) = ChannelSink::new();

    let err = engine
        .start_search(&index, "path:", &SearchOptions::default(), Arc::new(sink))
        .unwrap_err();
    assert!(matches!(err, Error::QuerySyntax(_)));
    assert_eq!(engine.active_searches(), 0);
    assert!(rx.try_recv().is_err());
}

#[test]
fn repeated_searches_return_the_same_set() {
    let (_dir, index) = fixture();
    let engine = SearchEngine::new();

    let query = "(rs OR txt) !main";
    let first = names(&run(&engine, &index, query, SearchOptions::default()));
    let second = names(&run(&engine, &index, query, SearchOptions::default()));
    assert_eq!(first, second);
    assert_eq!(
        first,
        BTreeSet::from([
            "lib.rs".to_string(),
            "notes.txt".to_string(),
            "REPORT-2024.txt".to_string()
        ])
    );
}

#[test]
fn numeric_and_regex_terms_combine() {
    let (_dir, index) = fixture();
    let engine = SearchEngine::new();

    let results = run(&engine, &index, r"re:\.rs$ size:0", SearchOptions::default());
    assert_eq!(names(&results), BTreeSet::from(["lib.rs".to_string()]));

    let size = results[0]
        .highlights
        .iter()
        .find(|h| h.field == Field::Size)
        .unwrap();
    assert!(size.ranges.is_empty());
}

#[test]
fn callback_sink_sees_borrowed_hits() {
    let (_dir, index) = fixture();
    let engine = SearchEngine::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = {
        let seen = Arc::clone(&seen);
        move |hit: &SearchHit<'_>| seen.lock().push((hit.entry.id, hit.highlights_json()))
    };
    let id = engine
        .start_search(&index, "notes", &SearchOptions::default(), Arc::new(sink))
        .unwrap();
    engine.join_search(id).unwrap();

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    let (entry_id, json) = &seen[0];
    assert_eq!(index.get(*entry_id).unwrap().name, "notes.txt");
    assert_eq!(json, r#"[{"field":"name","ranges":[[0,5]]}]"#);
}

#[test]
fn cap_never_exceeded_on_large_synthetic_index() {
    let index = Arc::new(Index::from_records(
        (0..50_000).map(|n| (format!("/data/dir{}/file{n}.log", n % 97), n as u64, 0)),
    ));
    let engine = SearchEngine::new();

    for cap in [1u32, 7, 100, 4096] {
        let options = SearchOptions {
            max_results: cap,
            max_threads: 8,
            ..Default::default()
        };
        let results = run(&engine, &index, "file", options);
        assert_eq!(results.len(), cap as usize);

        let ids: BTreeSet<u64> = results.iter().map(|r| r.entry.id).collect();
        assert_eq!(ids.len(), results.len());
    }
}

#[test]
fn unbounded_search_scans_every_entry() {
    let index = Arc::new(Index::from_records((0..20_000).map(|n| {
        let ext = if n % 2 == 0 { "a" } else { "b" };
        (format!("/data/file{n}.{ext}"), 0, 0)
    })));
    let engine = SearchEngine::new();

    let results = run(&engine, &index, r"re:\.a$", SearchOptions::default());
    assert_eq!(results.len(), 10_000);
}

#[test]
fn highlights_respect_graphemes_and_utf16() {
    let index = Arc::new(Index::from_records([
        ("/photos/\u{1F468}\u{200D}\u{1F4BB}-cafe\u{301}.jpg", 0, 0),
        ("/photos/\u{1F600}report.png", 0, 0),
    ]));
    let engine = SearchEngine::new();

    // case-sensitive terms see the stored bytes, so the bare "e" matches
    let results = run(&engine, &index, "case:e", SearchOptions::default());
    let emoji_name = results
        .iter()
        .find(|r| r.entry.name.starts_with('\u{1F468}'))
        .unwrap();
    // "man technologist" is 5 UTF-16 units, "-caf" follows, then "e" + U+0301
    let ranges = &emoji_name.highlights[0].ranges;
    assert_eq!((ranges[0].start, ranges[0].end), (9, 11));

    // a precomposed query finds the decomposed name
    let results = run(&engine, &index, "caf\u{E9}", SearchOptions::default());
    assert_eq!(results.len(), 1);
    let ranges = &results[0].highlights[0].ranges;
    assert_eq!((ranges[0].start, ranges[0].end), (6, 11));

    let results = run(&engine, &index, "report", SearchOptions::default());
    let ranges = &results[0].highlights[0].ranges;
    assert_eq!((ranges[0].start, ranges[0].end), (2, 8));

    let results = run(&engine, &index, "re:.", SearchOptions::default());
    assert_eq!(results.len(), 2);
    for result in &results {
        let mut units = 0;
        let mut boundaries = vec![0u32];
        for grapheme in result.entry.name.graphemes(true) {
            units += grapheme.encode_utf16().count() as u32;
            boundaries.push(units);
        }

        for highlight in &result.highlights {
            for range in &highlight.ranges {
                assert!(range.start < range.end);
                assert!(boundaries.contains(&range.start));
                assert!(boundaries.contains(&range.end));
            }
            for pair in highlight.ranges.windows(2) {
                assert!(pair[0].end < pair[1].start);
            }
        }
    }
}

#[test]
fn missing_roots_are_reported() {
    let (dir, _) = fixture();
    let missing = dir.path().join("does-not-exist");

    let build = Index::build(&[dir.path(), missing.as_path()], &IndexOptions::default()).unwrap();
    assert_eq!(build.index.len(), 5);
    assert_eq!(build.failures.len(), 1);
    assert_eq!(build.failures[0].root, missing);

    let err = Index::build(&[missing.as_path()], &IndexOptions::default()).unwrap_err();
    assert!(matches!(err, Error::IndexBuild { failures } if failures.len() == 1));
}

#[test]
fn index_cannot_be_freed_while_a_search_holds_it() {
    let index = Arc::new(Index::from_records(
        (0..10_000).map(|n| (format!("/bulk/item{n}"), 0, 0)),
    ));
    let engine = SearchEngine::new();

    // workers park in the sink until the gate opens
    let gate = Arc::new(Mutex::new(()));
    let closed = gate.lock();
    let sink = {
        let gate = Arc::clone(&gate);
        move |_: &SearchHit<'_>| drop(gate.lock())
    };
    let id = engine
        .start_search(&index, "item", &SearchOptions::default(), Arc::new(sink))
        .unwrap();

    let index = match Index::free(index) {
        Ok(()) => panic!("index freed while a search holds it"),
        Err(in_use) => {
            assert!(in_use.holders >= 1);
            in_use.index
        }
    };

    engine.cancel_search(id, false).unwrap();
    drop(closed);
    let summary = engine.join_search(id).unwrap().unwrap();
    assert!(summary.cancelled);

    assert!(Index::free(index).is_ok());
}

#[test]
fn shutdown_rejects_new_work() {
    let (_dir, index) = fixture();
    let engine = SearchEngine::new();
    engine.shutdown();

    let (sink, _rx) = ChannelSink::new();
    let err = engine
        .start_search(&index, "report", &SearchOptions::default(), Arc::new(sink))
        .unwrap_err();
    assert!(matches!(err, Error::ShutDown));
}

#[test]
fn report_query_over_three_files() {
    let dir = TempDir::new().unwrap();
    for name in ["report.txt", "report_final.txt", "notes.md"] {
        create_file(dir.path(), name, "");
    }
    let index = Arc::new(
        Index::build(&[dir.path()], &IndexOptions::default())
            .unwrap()
            .index,
    );
    let engine = SearchEngine::new();

    let results = run(&engine, &index, "report", SearchOptions::default());
    assert_eq!(
        names(&results),
        BTreeSet::from(["report.txt".to_string(), "report_final.txt".to_string()])
    );
    for result in &results {
        assert_eq!(
            serde_json::to_string(&result.highlights).unwrap(),
            r#"[{"field":"name","ranges":[[0,6]]}]"#
        );
    }
}

#[test]
fn capped_path_search_cancels_after_first_delivery() {
    let dir = TempDir::new().unwrap();
    for n in 0..10 {
        create_file(dir.path(), &format!("src/file{n}.rs"), "");
    }
    let index = Arc::new(
        Index::build(&[dir.path()], &IndexOptions::default())
            .unwrap()
            .index,
    );
    assert_eq!(index.len(), 10);

    let engine = SearchEngine::new();
    let (sink, rx) = ChannelSink::new();
    let options = SearchOptions {
        max_results: 1,
        ..Default::default()
    };
    let id = engine
        .start_search(&index, "path:src", &options, Arc::new(sink))
        .unwrap();
    let summary = engine.join_search(id).unwrap().unwrap();

    assert_eq!(rx.try_iter().count(), 1);
    assert_eq!(summary.delivered, 1);
    assert!(summary.cancelled);
    assert!(summary.scanned <= 10);
}

#[test]
fn extension_and_compatibility_forms() {
    let index = Arc::new(Index::from_records([
        ("/books/\u{FB01}nance.xlsx", 0, 0),
        ("/books/report.pdf", 0, 0),
        ("/books/README", 0, 0),
    ]));
    let engine = SearchEngine::new();

    let results = run(&engine, &index, "ext:pdf", SearchOptions::default());
    assert_eq!(names(&results), BTreeSet::from(["report.pdf".to_string()]));
    assert_eq!(
        serde_json::to_string(&results[0].highlights).unwrap(),
        r#"[{"field":"name","ranges":[[7,10]]},{"field":"extension","ranges":[]}]"#
    );

    let results = run(&engine, &index, "fin", SearchOptions::default());
    assert_eq!(names(&results).len(), 1);
    assert_eq!(
        serde_json::to_string(&results[0].highlights).unwrap(),
        r#"[{"field":"name","ranges":[[0,2]]}]"#
    );

    let results = run(&engine, &index, "name:/^re/", SearchOptions::default());
    assert_eq!(
        names(&results),
        BTreeSet::from(["report.pdf".to_string(), "README".to_string()])
    );
}
