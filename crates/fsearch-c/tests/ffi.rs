use std::ffi::{CStr, CString, c_char, c_void};
use std::fs;
use std::path::Path;
use std::ptr;

use fsearch_c::*;
use parking_lot::Mutex;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq)]
struct Received {
    id: u64,
    name: String,
    path: String,
    size: u64,
    highlights: String,
}

#[derive(Default)]
struct Collector {
    results: Mutex<Vec<Received>>,
    failures: Mutex<Vec<(String, String)>>,
}

unsafe fn lossy(s: *const c_char) -> String {
    unsafe { CStr::from_ptr(s) }.to_string_lossy().into_owned()
}

unsafe extern "C" fn on_result(
    id: u64,
    name: *const c_char,
    path: *const c_char,
    size: u64,
    _mtime: u64,
    highlights_json: *const c_char,
    userdata: *mut c_void,
) {
    let collector = unsafe { &*userdata.cast::<Collector>() };
    collector.results.lock().push(Received {
        id,
        name: unsafe { lossy(name) },
        path: unsafe { lossy(path) },
        size,
        highlights: unsafe { lossy(highlights_json) },
    });
}

unsafe extern "C" fn on_failure(
    root: *const c_char,
    message: *const c_char,
    userdata: *mut c_void,
) {
    let collector = unsafe { &*userdata.cast::<Collector>() };
    collector
        .failures
        .lock()
        .push((unsafe { lossy(root) }, unsafe { lossy(message) }));
}

fn userdata(collector: &Collector) -> *mut c_void {
    ptr::from_ref(collector).cast_mut().cast()
}

fn last_error() -> Option<String> {
    let message = fsearch_last_error();
    (!message.is_null()).then(|| unsafe { lossy(message) })
}

fn fixture() -> TempDir {
    let dir = TempDir::new().unwrap();
    for (relative, contents) in [
        ("docs/report.pdf", "%PDF"),
        ("docs/Report-final.txt", "done"),
        ("src/main.rs", "fn main() {}"),
        ("src/util.rs", ""),
    ] {
        let full = dir.path().join(relative);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, contents).unwrap();
    }
    dir
}

fn build(roots: &[&Path], collector: &Collector) -> *mut c_void {
    let roots: Vec<CString> = roots
        .iter()
        .map(|p| CString::new(p.to_str().unwrap()).unwrap())
        .collect();
    let pointers: Vec<*const c_char> = roots.iter().map(|s| s.as_ptr()).collect();
    unsafe {
        fsearch_build_index(
            pointers.as_ptr(),
            pointers.len(),
            ptr::null(),
            Some(on_failure),
            userdata(collector),
        )
    }
}

fn search(index: *const c_void, query: &str, opts: Option<&str>, collector: &Collector) -> u64 {
    let query = CString::new(query).unwrap();
    let opts = opts.map(|o| CString::new(o).unwrap());
    unsafe {
        fsearch_start_search(
            index,
            query.as_ptr(),
            opts.as_ref().map_or(ptr::null(), |o| o.as_ptr()),
            Some(on_result),
            userdata(collector),
        )
    }
}

fn wait_for(handle: u64) {
    while !fsearch_search_finished(handle) {
        std::thread::yield_now();
    }
}

#[test]
fn search_streams_matches_with_highlights() {
    assert!(fsearch_init());
    let dir = fixture();
    let collector = Collector::default();
    let index = build(&[dir.path()], &collector);
    assert!(!index.is_null());
    assert_eq!(unsafe { fsearch_index_len(index) }, 4);

    let handle = search(index, "report", None, &collector);
    assert_ne!(handle, 0);
    wait_for(handle);

    let mut results = collector.results.lock().clone();
    results.sort_by(|a, b| a.name.cmp(&b.name));
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].name, "Report-final.txt");
    assert_eq!(results[1].name, "report.pdf");
    assert_eq!(results[1].size, 4);
    for result in &results {
        assert_eq!(result.highlights, r#"[{"field":"name","ranges":[[0,6]]}]"#);
        assert!(result.path.ends_with(&result.name));
        assert_ne!(result.id, 0);
    }

    fsearch_cancel_search_blocking(handle);
    assert!(unsafe { fsearch_free_index(index) });
}

#[test]
fn cap_of_one_delivers_one_callback() {
    let dir = fixture();
    let collector = Collector::default();
    let index = build(&[dir.path()], &collector);

    let handle = search(index, "path:src", Some(r#"{"max_results":1}"#), &collector);
    assert_ne!(handle, 0);
    wait_for(handle);

    let results = collector.results.lock();
    assert_eq!(results.len(), 1);
    assert!(results[0].path.contains("src"));
    drop(results);

    fsearch_cancel_search_blocking(handle);
    assert!(unsafe { fsearch_free_index(index) });
}

#[test]
fn invalid_query_returns_zero_and_sets_last_error() {
    let dir = fixture();
    let collector = Collector::default();
    let index = build(&[dir.path()], &collector);

    assert_eq!(search(index, "path:", None, &collector), 0);
    let message = last_error().unwrap();
    assert!(message.contains("path:"), "unexpected message: {message}");
    assert!(collector.results.lock().is_empty());

    assert_eq!(search(index, "report", Some("{not json"), &collector), 0);
    assert!(last_error().unwrap().starts_with("Failed to parse options"));

    assert!(unsafe { fsearch_free_index(index) });
}

#[test]
fn missing_roots_are_reported_through_the_callback() {
    let dir = fixture();
    let missing = dir.path().join("missing");
    let collector = Collector::default();

    let index = build(&[dir.path(), missing.as_path()], &collector);
    assert!(!index.is_null());
    {
        let failures = collector.failures.lock();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, missing.to_string_lossy());
    }
    assert!(unsafe { fsearch_free_index(index) });

    let collector = Collector::default();
    let index = build(&[missing.as_path()], &collector);
    assert!(index.is_null());
    assert_eq!(collector.failures.lock().len(), 1);
    assert!(last_error().is_some());
}

#[test]
fn list_entries_is_synchronous_without_highlights() {
    let dir = fixture();
    let collector = Collector::default();
    let index = build(&[dir.path()], &collector);

    unsafe { fsearch_list_entries(index, Some(on_result), userdata(&collector)) };
    let results = collector.results.lock();
    assert_eq!(results.len(), 4);
    assert!(results.iter().all(|r| r.highlights.is_empty()));
    let ids: Vec<u64> = results.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
    drop(results);

    assert!(unsafe { fsearch_free_index(index) });
}

#[test]
fn polled_results_are_delivered_on_the_calling_thread() {
    let dir = fixture();
    let collector = Collector::default();
    let index = build(&[dir.path()], &collector);

    let query = CString::new(r"re:\.rs$").unwrap();
    let handle = unsafe { fsearch_start_search_polled(index, query.as_ptr(), ptr::null()) };
    assert_ne!(handle, 0);

    let mut delivered = 0;
    loop {
        let finished = fsearch_search_finished(handle);
        delivered +=
            unsafe { fsearch_poll_results(handle, Some(on_result), userdata(&collector)) };
        if finished {
            break;
        }
        std::thread::yield_now();
    }
    delivered += unsafe { fsearch_poll_results(handle, Some(on_result), userdata(&collector)) };

    assert_eq!(delivered, 2);
    assert_eq!(collector.results.lock().len(), 2);

    fsearch_cancel_search_blocking(handle);
    assert!(unsafe { fsearch_free_index(index) });
}

#[test]
fn index_in_use_cannot_be_freed() {
    let collector = Collector::default();
    let dir = TempDir::new().unwrap();
    for n in 0..2_000 {
        fs::write(dir.path().join(format!("item{n}.txt")), "").unwrap();
    }
    let index = build(&[dir.path()], &collector);

    let query = CString::new("item").unwrap();
    let handle = unsafe {
        fsearch_start_search(
            index,
            query.as_ptr(),
            ptr::null(),
            Some(blocking_result),
            ptr::null_mut(),
        )
    };
    assert_ne!(handle, 0);

    // the first callback parks until the gate opens, so the search holds the index
    assert!(!unsafe { fsearch_free_index(index) });
    assert!(last_error().unwrap().contains("still referenced"));
    assert_eq!(unsafe { fsearch_index_len(index) }, 2_000);

    fsearch_cancel_search(handle);
    GATE_OPEN.store(true, std::sync::atomic::Ordering::Release);
    fsearch_cancel_search_blocking(handle);
    assert!(unsafe { fsearch_free_index(index) });
}

static GATE_OPEN: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(false);

unsafe extern "C" fn blocking_result(
    _id: u64,
    _name: *const c_char,
    _path: *const c_char,
    _size: u64,
    _mtime: u64,
    _highlights_json: *const c_char,
    _userdata: *mut c_void,
) {
    while !GATE_OPEN.load(std::sync::atomic::Ordering::Acquire) {
        std::thread::yield_now();
    }
}

#[test]
fn null_arguments_are_rejected() {
    assert_eq!(unsafe { fsearch_index_len(ptr::null()) }, 0);
    assert!(unsafe { fsearch_free_index(ptr::null_mut()) });

    let query = CString::new("x").unwrap();
    let handle = unsafe {
        fsearch_start_search(
            ptr::null(),
            query.as_ptr(),
            ptr::null(),
            Some(on_result),
            ptr::null_mut(),
        )
    };
    assert_eq!(handle, 0);
    assert_eq!(last_error().as_deref(), Some("Index handle is null"));

    let handle = unsafe { fsearch_start_search_polled(ptr::null(), ptr::null(), ptr::null()) };
    assert_eq!(handle, 0);

    // unknown handles are ignored
    fsearch_cancel_search(u64::MAX);
    fsearch_cancel_search_blocking(u64::MAX);
    assert!(fsearch_search_finished(u64::MAX));
}
