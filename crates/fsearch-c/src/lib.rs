//! C FFI bindings for fsearch-core
//!
//! This crate exports a C ABI over a single process-wide [`SearchEngine`],
//! usable from any language with C FFI support. The matching declarations
//! live in `include/fsearch.h`.
//!
//! Functions never panic across the boundary. Failures are reported through
//! the return value (NULL, 0 or false) and the message is available from
//! `fsearch_last_error` on the same thread.

use std::cell::RefCell;
use std::ffi::{CStr, CString, c_char, c_void};
use std::ptr;
use std::sync::Arc;

pub mod ffi_types;

use ffi_types::{CallbackSink, EntryStrings, FailureCallback, ResultCallback, UserData};
use fsearch_core::{Error, Index, IndexOptions, RootFailure, SearchEngine, SearchOptions};
use mimalloc::MiMalloc;
use once_cell::sync::Lazy;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

static ENGINE: Lazy<SearchEngine> = Lazy::new(SearchEngine::new);

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(message: impl Into<String>) {
    let message = message.into();
    tracing::warn!("FFI: {}", message);
    LAST_ERROR.with(|last| *last.borrow_mut() = Some(ffi_types::to_cstring(&message)));
}

fn clear_last_error() {
    LAST_ERROR.with(|last| *last.borrow_mut() = None);
}

/// Helper to convert C string to Rust &str.
///
/// Returns `None` if the pointer is null or the string is not valid UTF-8.
unsafe fn cstr_to_str<'a>(s: *const c_char) -> Option<&'a str> {
    if s.is_null() {
        None
    } else {
        unsafe { CStr::from_ptr(s).to_str().ok() }
    }
}

/// Reads an optional options argument: NULL means defaults, anything else
/// must be valid UTF-8 JSON.
unsafe fn read_options<T>(opts_json: *const c_char) -> Option<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    let json = if opts_json.is_null() {
        None
    } else {
        match unsafe { cstr_to_str(opts_json) } {
            Some(s) => Some(s),
            None => {
                set_last_error("Options JSON is not valid UTF-8");
                return None;
            }
        }
    };

    match ffi_types::parse_options(json) {
        Ok(options) => Some(options),
        Err(message) => {
            set_last_error(message);
            None
        }
    }
}

/// Clones the `Arc` behind an index handle without consuming the handle.
unsafe fn index_from_handle(index: *const c_void) -> Option<Arc<Index>> {
    if index.is_null() {
        set_last_error("Index handle is null");
        return None;
    }

    let index = index.cast::<Index>();
    unsafe {
        Arc::increment_strong_count(index);
        Some(Arc::from_raw(index))
    }
}

fn report_failures(
    failures: &[RootFailure],
    on_failure: Option<FailureCallback>,
    userdata: UserData,
) {
    let Some(on_failure) = on_failure else {
        return;
    };

    for failure in failures {
        let root = ffi_types::to_cstring(&failure.root.to_string_lossy());
        let message = ffi_types::to_cstring(&failure.message);
        unsafe { on_failure(root.as_ptr(), message.as_ptr(), userdata.0) };
    }
}

/// Verifies the engine runtime. Safe to call more than once.
#[unsafe(no_mangle)]
pub extern "C" fn fsearch_init() -> bool {
    match ENGINE.init() {
        Ok(_) => {
            clear_last_error();
            true
        }
        Err(e) => {
            set_last_error(format!("Failed to initialize engine: {}", e));
            false
        }
    }
}

/// Install a file logger. Returns false if the file or level is invalid.
///
/// # Safety
/// `log_file` must be a valid null-terminated UTF-8 string; `level` may be null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fsearch_init_tracing(
    log_file: *const c_char,
    level: *const c_char,
) -> bool {
    let Some(log_file) = (unsafe { cstr_to_str(log_file) }) else {
        set_last_error("Log file path is null or invalid UTF-8");
        return false;
    };
    let level = unsafe { cstr_to_str(level) };

    match fsearch_core::log::init_tracing(log_file, level) {
        Ok(_) => true,
        Err(e) => {
            set_last_error(e.to_string());
            false
        }
    }
}

// ============================================================================
// Index Functions
// ============================================================================

/// Build an index over `count` root paths.
///
/// Returns an opaque handle, or NULL when no root could be indexed.
/// `on_failure` (may be null) is called synchronously for each root that
/// could not be read.
///
/// # Safety
/// `paths` must point to `count` valid null-terminated strings, `opts_json`
/// must be null or a valid null-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fsearch_build_index(
    paths: *const *const c_char,
    count: usize,
    opts_json: *const c_char,
    on_failure: Option<FailureCallback>,
    userdata: *mut c_void,
) -> *mut c_void {
    let userdata = UserData(userdata);
    if paths.is_null() && count > 0 {
        set_last_error("Paths array is null");
        return ptr::null_mut();
    }

    let Some(options) = (unsafe { read_options::<IndexOptions>(opts_json) }) else {
        return ptr::null_mut();
    };

    let raw_paths: &[*const c_char] = if count == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(paths, count) }
    };

    let mut roots = Vec::with_capacity(count);
    let mut rejected = Vec::new();
    for (position, &raw) in raw_paths.iter().enumerate() {
        match unsafe { cstr_to_str(raw) } {
            Some(root) => roots.push(root),
            None => rejected.push(RootFailure {
                root: format!("#{position}").into(),
                message: "Path is null or invalid UTF-8".to_string(),
            }),
        }
    }
    report_failures(&rejected, on_failure, userdata);

    match ENGINE.build_index(&roots, &options) {
        Ok(build) => {
            report_failures(&build.failures, on_failure, userdata);
            clear_last_error();
            Arc::into_raw(Arc::new(build.index)) as *mut c_void
        }
        Err(Error::IndexBuild { failures }) => {
            report_failures(&failures, on_failure, userdata);
            set_last_error(Error::IndexBuild { failures }.to_string());
            ptr::null_mut()
        }
        Err(e) => {
            set_last_error(e.to_string());
            ptr::null_mut()
        }
    }
}

/// Release an index handle.
///
/// Returns false, leaving the handle valid, while a search still uses it.
///
/// # Safety
/// `index` must be a handle returned by `fsearch_build_index` that has not
/// been freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fsearch_free_index(index: *mut c_void) -> bool {
    if index.is_null() {
        return true;
    }

    let index = unsafe { Arc::from_raw(index.cast::<Index>().cast_const()) };
    match Index::free(index) {
        Ok(()) => true,
        Err(in_use) => {
            let message = format!(
                "Index is still referenced by {} running search(es)",
                in_use.holders
            );
            // hand ownership back to the caller's handle
            let _ = Arc::into_raw(in_use.index);
            set_last_error(message);
            false
        }
    }
}

/// Number of entries in an index. 0 for a null handle.
///
/// # Safety
/// `index` must be null or a live index handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fsearch_index_len(index: *const c_void) -> usize {
    if index.is_null() {
        return 0;
    }
    unsafe { &*index.cast::<Index>() }.len()
}

/// Call `cb` for every entry in build order on the calling thread.
/// The highlights argument is an empty string.
///
/// # Safety
/// `index` must be a live index handle and `cb` safe to call with `userdata`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fsearch_list_entries(
    index: *const c_void,
    cb: Option<ResultCallback>,
    userdata: *mut c_void,
) {
    let Some(cb) = cb else {
        set_last_error("Callback is null");
        return;
    };
    let Some(index) = (unsafe { index_from_handle(index) }) else {
        return;
    };

    let userdata = UserData(userdata);
    ENGINE.list_entries(&index, |entry| {
        let strings = EntryStrings::new(entry, "");
        unsafe { strings.deliver(entry, cb, userdata) };
    });
}

// ============================================================================
// Search Functions
// ============================================================================

/// Start a search, streaming results to `cb` from worker threads.
///
/// Returns a non-zero search handle, or 0 when the query is invalid, the
/// arguments are bad or the engine is shut down.
///
/// # Safety
/// `index` must be a live index handle, `query` a valid null-terminated
/// UTF-8 string, `opts_json` null or a valid string. `cb` must be callable
/// from any thread with `userdata` until the search has finished.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fsearch_start_search(
    index: *const c_void,
    query: *const c_char,
    opts_json: *const c_char,
    cb: Option<ResultCallback>,
    userdata: *mut c_void,
) -> u64 {
    let Some(callback) = cb else {
        set_last_error("Callback is null");
        return 0;
    };
    let sink = Arc::new(CallbackSink {
        callback,
        userdata: UserData(userdata),
    });

    unsafe {
        start_with(index, query, opts_json, |index, query, options| {
            ENGINE.start_search(index, query, options, sink)
        })
    }
}

/// Start a search whose results are queued for `fsearch_poll_results`.
///
/// # Safety
/// Same as `fsearch_start_search`, without the callback.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fsearch_start_search_polled(
    index: *const c_void,
    query: *const c_char,
    opts_json: *const c_char,
) -> u64 {
    unsafe {
        start_with(index, query, opts_json, |index, query, options| {
            ENGINE.start_polled_search(index, query, options)
        })
    }
}

unsafe fn start_with(
    index: *const c_void,
    query: *const c_char,
    opts_json: *const c_char,
    start: impl FnOnce(&Arc<Index>, &str, &SearchOptions) -> fsearch_core::Result<u64>,
) -> u64 {
    let Some(query) = (unsafe { cstr_to_str(query) }) else {
        set_last_error("Query is null or invalid UTF-8");
        return 0;
    };
    let Some(options) = (unsafe { read_options::<SearchOptions>(opts_json) }) else {
        return 0;
    };
    let Some(index) = (unsafe { index_from_handle(index) }) else {
        return 0;
    };

    match start(&index, query, &options) {
        Ok(id) => {
            clear_last_error();
            id
        }
        Err(e) => {
            set_last_error(e.to_string());
            0
        }
    }
}

/// Deliver queued results of a polled search to `cb` on the calling thread.
/// Returns the number delivered.
///
/// # Safety
/// `cb` must be safe to call with `userdata`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fsearch_poll_results(
    handle: u64,
    cb: Option<ResultCallback>,
    userdata: *mut c_void,
) -> usize {
    let Some(cb) = cb else {
        set_last_error("Callback is null");
        return 0;
    };

    let userdata = UserData(userdata);
    ENGINE.poll_results(handle, |result| {
        let highlights = fsearch_core::highlight::to_json(&result.highlights);
        let strings = EntryStrings::new(&result.entry, &highlights);
        unsafe { strings.deliver(&result.entry, cb, userdata) };
    })
}

/// Whether every worker of a search has exited. Unknown handles count as
/// finished.
#[unsafe(no_mangle)]
pub extern "C" fn fsearch_search_finished(handle: u64) -> bool {
    ENGINE.is_finished(handle)
}

/// Request cancellation and return immediately.
#[unsafe(no_mangle)]
pub extern "C" fn fsearch_cancel_search(handle: u64) {
    if let Err(e) = ENGINE.cancel_search(handle, false) {
        set_last_error(e.to_string());
    }
}

/// Cancel a search and wait until no further callbacks can happen.
#[unsafe(no_mangle)]
pub extern "C" fn fsearch_cancel_search_blocking(handle: u64) {
    if let Err(e) = ENGINE.cancel_search(handle, true) {
        set_last_error(e.to_string());
    }
}

/// Cancel and join every search. Later starts fail.
#[unsafe(no_mangle)]
pub extern "C" fn fsearch_shutdown() {
    ENGINE.shutdown();
}

/// Message of the last failure on the calling thread, or null.
/// Valid until the next fsearch call on this thread.
#[unsafe(no_mangle)]
pub extern "C" fn fsearch_last_error() -> *const c_char {
    LAST_ERROR.with(|last| {
        last.borrow()
            .as_ref()
            .map_or(ptr::null(), |message| message.as_ptr())
    })
}
