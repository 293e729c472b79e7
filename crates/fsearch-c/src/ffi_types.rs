//! FFI-compatible type definitions
//!
//! Callback signatures, the sink that forwards results to C, and JSON
//! option parsing for the exported functions.

use std::ffi::{CString, c_char, c_void};

use fsearch_core::{Entry, ResultSink, SearchHit};
use serde::de::DeserializeOwned;

/// `(id, name, path, size, mtime, highlights_json, userdata)`.
/// Strings are only valid for the duration of the call.
pub type ResultCallback = unsafe extern "C" fn(
    id: u64,
    name: *const c_char,
    path: *const c_char,
    size: u64,
    mtime: u64,
    highlights_json: *const c_char,
    userdata: *mut c_void,
);

/// `(root, message, userdata)` for a root that could not be indexed
pub type FailureCallback =
    unsafe extern "C" fn(root: *const c_char, message: *const c_char, userdata: *mut c_void);

/// Opaque caller pointer handed back to every callback.
#[derive(Debug, Clone, Copy)]
pub struct UserData(pub *mut c_void);

// The pointer is never dereferenced on the Rust side. Callers that pass a
// userdata to a search accept that the callback runs on worker threads.
unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

/// NUL-terminated copies of the strings passed to a [`ResultCallback`]
pub struct EntryStrings {
    pub name: CString,
    pub path: CString,
    pub highlights: CString,
}

impl EntryStrings {
    pub fn new(entry: &Entry, highlights_json: &str) -> Self {
        EntryStrings {
            name: to_cstring(&entry.name),
            path: to_cstring(&entry.path),
            highlights: to_cstring(highlights_json),
        }
    }

    /// Invokes `callback` with borrowed pointers into these strings
    ///
    /// # Safety
    /// `callback` must be safe to call with `userdata`.
    pub unsafe fn deliver(&self, entry: &Entry, callback: ResultCallback, userdata: UserData) {
        unsafe {
            callback(
                entry.id,
                self.name.as_ptr(),
                self.path.as_ptr(),
                entry.size,
                entry.mtime,
                self.highlights.as_ptr(),
                userdata.0,
            )
        }
    }
}

/// Strings with interior NULs are truncated at the first NUL
pub fn to_cstring(s: &str) -> CString {
    match CString::new(s) {
        Ok(s) => s,
        Err(err) => {
            let nul = err.nul_position();
            let mut bytes = err.into_vec();
            bytes.truncate(nul);
            CString::new(bytes).unwrap_or_default()
        }
    }
}

/// Forwards every search hit to a C callback on the worker thread that
/// found it.
pub struct CallbackSink {
    pub callback: ResultCallback,
    pub userdata: UserData,
}

impl ResultSink for CallbackSink {
    fn on_result(&self, hit: &SearchHit<'_>) {
        let strings = EntryStrings::new(hit.entry, &hit.highlights_json());
        unsafe { strings.deliver(hit.entry, self.callback, self.userdata) }
    }
}

/// Parses an options object. `None` (a null pointer) yields the defaults,
/// malformed JSON is an error.
pub fn parse_options<T>(json: Option<&str>) -> Result<T, String>
where
    T: DeserializeOwned + Default,
{
    match json {
        None => Ok(T::default()),
        Some(s) if s.trim().is_empty() => Ok(T::default()),
        Some(s) => serde_json::from_str(s).map_err(|e| format!("Failed to parse options: {}", e)),
    }
}
