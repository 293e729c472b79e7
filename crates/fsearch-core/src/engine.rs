//! Process-level search context.
//!
//! [`SearchEngine`] owns the registry of running searches. It is created
//! explicitly and passed to whoever needs it; the C layer keeps one instance
//! in a static.

use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::index::{Index, IndexBuild, IndexOptions};
use crate::matcher::{CompileOptions, compile};
use crate::search::{
    self, ChannelSink, ResultSink, SearchHandle, SearchOptions, SearchResult, SearchSummary,
};
use ahash::AHashMap;
use crossbeam_channel::Receiver;
use fsearch_query_parser::QueryParser;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

/// Capabilities detected by [`SearchEngine::init`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineInfo {
    pub pcre2_jit: bool,
}

struct ActiveSearch {
    handle: SearchHandle,
    /// Present for searches started with [`SearchEngine::start_polled_search`]
    results: Option<Receiver<SearchResult>>,
}

impl ActiveSearch {
    fn is_reapable(&self) -> bool {
        self.handle.is_finished() && self.results.as_ref().is_none_or(Receiver::is_empty)
    }
}

#[derive(Default)]
struct Registry {
    searches: AHashMap<u64, ActiveSearch>,
    shut_down: bool,
}

pub struct SearchEngine {
    info: OnceCell<EngineInfo>,
    next_id: AtomicU64,
    registry: Mutex<Registry>,
    parser: QueryParser,
}

impl Default for SearchEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchEngine {
    pub fn new() -> Self {
        Self {
            info: OnceCell::new(),
            next_id: AtomicU64::new(1),
            registry: Mutex::new(Registry::default()),
            parser: QueryParser::default(),
        }
    }

    /// Verifies that the regex backend works. Safe to call repeatedly.
    pub fn init(&self) -> Result<EngineInfo> {
        self.info
            .get_or_try_init(|| {
                let self_check = pcre2::bytes::RegexBuilder::new()
                    .utf(true)
                    .ucp(true)
                    .jit_if_available(true)
                    .build(r"\w+")
                    .map_err(|e| Error::PatternCompile {
                        pattern: r"\w+".to_string(),
                        message: e.to_string(),
                    })?;

                if !self_check.is_match(b"fsearch").unwrap_or(false) {
                    return Err(Error::InvariantViolation(
                        "PCRE2 failed its self check".to_string(),
                    ));
                }

                let info = EngineInfo {
                    pcre2_jit: pcre2::is_jit_available(),
                };
                info!(
                    "ENGINE: Initialized (pcre2 jit {})",
                    if info.pcre2_jit { "available" } else { "unavailable" }
                );
                Ok(info)
            })
            .copied()
    }

    pub fn info(&self) -> Option<EngineInfo> {
        self.info.get().copied()
    }

    pub fn is_shut_down(&self) -> bool {
        self.registry.lock().shut_down
    }

    pub fn build_index<P: AsRef<Path>>(
        &self,
        roots: &[P],
        options: &IndexOptions,
    ) -> Result<IndexBuild> {
        if self.is_shut_down() {
            return Err(Error::ShutDown);
        }
        Index::build(roots, options)
    }

    /// Calls `f` for every entry in build order, on the calling thread
    pub fn list_entries(&self, index: &Index, mut f: impl FnMut(&Entry)) {
        for entry in index.entries() {
            f(entry);
        }
    }

    /// Parses, compiles and starts a search. Returns its id, never 0.
    pub fn start_search(
        &self,
        index: &Arc<Index>,
        query: &str,
        options: &SearchOptions,
        sink: Arc<dyn ResultSink>,
    ) -> Result<u64> {
        self.spawn_search(index, query, options, sink, None)
    }

    /// Like [`start_search`](Self::start_search) but queues results for
    /// [`poll_results`](Self::poll_results).
    pub fn start_polled_search(
        &self,
        index: &Arc<Index>,
        query: &str,
        options: &SearchOptions,
    ) -> Result<u64> {
        let (sink, rx) = ChannelSink::new();
        self.spawn_search(index, query, options, Arc::new(sink), Some(rx))
    }

    fn spawn_search(
        &self,
        index: &Arc<Index>,
        query: &str,
        options: &SearchOptions,
        sink: Arc<dyn ResultSink>,
        results: Option<Receiver<SearchResult>>,
    ) -> Result<u64> {
        if self.is_shut_down() {
            return Err(Error::ShutDown);
        }

        let node = self.parser.parse(query).inspect_err(|err| {
            debug!(query, error = %err, "SEARCH: Rejected query");
        })?;
        let matcher = Arc::new(compile(&node, &CompileOptions::from(options))?);

        let reaped = {
            let mut registry = self.registry.lock();
            if registry.shut_down {
                return Err(Error::ShutDown);
            }
            take_reapable(&mut registry)
        };
        join_all(reaped);

        // no lock held here: sinks may re-enter the engine
        let handle = search::start(Arc::clone(index), matcher, options, sink)?;

        let mut registry = self.registry.lock();
        if registry.shut_down {
            drop(registry);
            handle.cancel();
            join_all(vec![ActiveSearch { handle, results }]);
            return Err(Error::ShutDown);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        registry
            .searches
            .insert(id, ActiveSearch { handle, results });
        debug!(id, query, "SEARCH: Started");
        Ok(id)
    }

    /// Requests cancellation. With `wait`, blocks until the search's
    /// workers have exited and returns its summary. Unknown ids are ignored.
    pub fn cancel_search(&self, id: u64, wait: bool) -> Result<Option<SearchSummary>> {
        if !wait {
            if let Some(active) = self.registry.lock().searches.get(&id) {
                active.handle.cancel();
            }
            return Ok(None);
        }

        let Some(active) = self.registry.lock().searches.remove(&id) else {
            return Ok(None);
        };
        active.handle.cancel();
        active.handle.join().map(Some)
    }

    /// Waits for a search to finish on its own and forgets it
    pub fn join_search(&self, id: u64) -> Result<Option<SearchSummary>> {
        let Some(active) = self.registry.lock().searches.remove(&id) else {
            return Ok(None);
        };
        active.handle.join().map(Some)
    }

    /// Drains queued results of a polled search into `f`. Returns how many
    /// were drained; 0 for unknown ids or callback searches.
    pub fn poll_results(&self, id: u64, mut f: impl FnMut(&SearchResult)) -> usize {
        let results = {
            let registry = self.registry.lock();
            match registry.searches.get(&id).and_then(|a| a.results.clone()) {
                Some(rx) => rx,
                None => return 0,
            }
        };

        let mut drained = 0;
        for result in results.try_iter() {
            f(&result);
            drained += 1;
        }
        drained
    }

    /// Whether every worker of `id` has exited. Unknown ids count as finished.
    pub fn is_finished(&self, id: u64) -> bool {
        self.registry
            .lock()
            .searches
            .get(&id)
            .is_none_or(|a| a.handle.is_finished())
    }

    /// Searches whose workers are still running
    pub fn active_searches(&self) -> usize {
        self.registry
            .lock()
            .searches
            .values()
            .filter(|a| !a.handle.is_finished())
            .count()
    }

    /// Cancels and joins every outstanding search. Later starts fail with
    /// [`Error::ShutDown`]. Idempotent.
    pub fn shutdown(&self) {
        let outstanding: Vec<ActiveSearch> = {
            let mut registry = self.registry.lock();
            if registry.shut_down {
                return;
            }
            registry.shut_down = true;
            registry.searches.drain().map(|(_, active)| active).collect()
        };

        for active in &outstanding {
            active.handle.cancel();
        }
        let count = outstanding.len();
        join_all(outstanding);
        info!("ENGINE: Shut down, joined {} search(es)", count);
    }
}

impl Drop for SearchEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn take_reapable(registry: &mut Registry) -> Vec<ActiveSearch> {
    let finished: Vec<u64> = registry
        .searches
        .iter()
        .filter(|(_, active)| active.is_reapable())
        .map(|(id, _)| *id)
        .collect();

    finished
        .into_iter()
        .filter_map(|id| registry.searches.remove(&id))
        .collect()
}

fn join_all(searches: Vec<ActiveSearch>) {
    for active in searches {
        if let Err(err) = active.handle.join() {
            match err {
                Error::ThreadPanic => error!("SEARCH: Worker panicked"),
                other => warn!(error = %other, "SEARCH: Join failed"),
            }
        }
    }
}
