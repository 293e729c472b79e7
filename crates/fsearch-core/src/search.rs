//! Concurrent, cancellable scan of an index.
//!
//! A search splits the index into contiguous chunks and scans each chunk on
//! its own named worker thread. Matches are pushed to a [`ResultSink`]
//! straight from the worker that found them, so sink calls may run
//! concurrently. Delivery slots are reserved from a shared atomic counter
//! before the sink is called, which keeps the total under `max_results`.

use crate::cancel::CancellationToken;
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::highlight::{self, FieldHighlight, HighlightCollector};
use crate::index::Index;
use crate::matcher::{BoundMatcher, CompiledMatcher};
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, error};

/// Smallest number of entries worth a dedicated worker
pub const MIN_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    /// Maximum number of results delivered, 0 means unbounded
    pub max_results: u32,
    pub case_sensitive: bool,
    pub regex_default: bool,
    pub match_path: bool,
    /// Upper bound on worker threads, 0 means one per available core
    pub max_threads: usize,
}

/// A match as seen by a sink. Borrowed data is only valid during the call.
#[derive(Debug)]
pub struct SearchHit<'a> {
    pub entry: &'a Entry,
    pub highlights: Vec<FieldHighlight>,
}

impl SearchHit<'_> {
    pub fn highlights_json(&self) -> String {
        highlight::to_json(&self.highlights)
    }

    pub fn to_result(&self) -> SearchResult {
        SearchResult {
            entry: self.entry.clone(),
            highlights: self.highlights.clone(),
        }
    }
}

/// Owned copy of a [`SearchHit`], for sinks that queue results
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    pub entry: Entry,
    pub highlights: Vec<FieldHighlight>,
}

/// Receives results. Called from worker threads, possibly concurrently.
pub trait ResultSink: Send + Sync {
    fn on_result(&self, hit: &SearchHit<'_>);
}

impl<F> ResultSink for F
where
    F: Fn(&SearchHit<'_>) + Send + Sync,
{
    fn on_result(&self, hit: &SearchHit<'_>) {
        self(hit)
    }
}

/// Queues results on a channel so the caller can poll them
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<SearchResult>,
}

impl ChannelSink {
    pub fn new() -> (Self, Receiver<SearchResult>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }
}

impl ResultSink for ChannelSink {
    fn on_result(&self, hit: &SearchHit<'_>) {
        // receiver gone means nobody polls anymore
        let _ = self.tx.send(hit.to_result());
    }
}

/// Totals reported once every worker has exited
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SearchSummary {
    pub delivered: u64,
    pub scanned: u64,
    pub cancelled: bool,
    pub workers: usize,
}

/// A running search. Dropping it detaches the workers after cancelling them.
#[derive(Debug)]
pub struct SearchHandle {
    token: CancellationToken,
    delivered: Arc<AtomicU64>,
    scanned: Arc<AtomicU64>,
    workers: Vec<JoinHandle<()>>,
    worker_count: usize,
    started: Instant,
}

impl SearchHandle {
    /// Requests cancellation, workers stop before their next entry
    pub fn cancel(&self) {
        if self.token.cancel() {
            debug!("SEARCH: Cancellation requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.workers.iter().all(JoinHandle::is_finished)
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Acquire)
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Waits for every worker. No sink call happens after this returns.
    pub fn join(mut self) -> Result<SearchSummary> {
        let mut panicked = false;
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("SEARCH: Worker panicked");
                panicked = true;
            }
        }

        let summary = SearchSummary {
            delivered: self.delivered.load(Ordering::Acquire),
            scanned: self.scanned.load(Ordering::Acquire),
            cancelled: self.token.is_cancelled(),
            workers: self.worker_count,
        };

        debug!(
            "SEARCH: Finished in {:?}: {} delivered, {} scanned, cancelled={}",
            self.started.elapsed(),
            summary.delivered,
            summary.scanned,
            summary.cancelled
        );

        if panicked {
            return Err(Error::ThreadPanic);
        }
        Ok(summary)
    }
}

impl Drop for SearchHandle {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.token.cancel();
        }
    }
}

struct WorkerContext {
    index: Arc<Index>,
    matcher: Arc<CompiledMatcher>,
    sink: Arc<dyn ResultSink>,
    token: CancellationToken,
    delivered: Arc<AtomicU64>,
    scanned: Arc<AtomicU64>,
    max_results: u64,
}

impl WorkerContext {
    /// Claims one delivery slot. `None` once the cap is exhausted,
    /// otherwise the 1-based slot number.
    #[inline]
    fn reserve_slot(&self) -> Option<u64> {
        if self.max_results == 0 {
            return Some(self.delivered.fetch_add(1, Ordering::AcqRel) + 1);
        }

        let mut current = self.delivered.load(Ordering::Acquire);
        loop {
            if current >= self.max_results {
                return None;
            }
            match self.delivered.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(current + 1),
                Err(observed) => current = observed,
            }
        }
    }

    fn run(&self, range: Range<usize>) {
        let bound = BoundMatcher::bind(&self.matcher);
        let mut scanned = 0u64;

        // None means the worker stopped early
        let _ = self.scan(&bound, range, &mut scanned);

        self.scanned.fetch_add(scanned, Ordering::AcqRel);
    }

    fn scan(
        &self,
        bound: &BoundMatcher<'_>,
        range: Range<usize>,
        scanned: &mut u64,
    ) -> Option<()> {
        for entry in &self.index.as_slice()[range] {
            self.token.check()?;
            *scanned += 1;

            if !bound.is_match(entry) {
                continue;
            }

            let Some(slot) = self.reserve_slot() else {
                self.token.cancel();
                return None;
            };

            let hit = SearchHit {
                entry,
                highlights: HighlightCollector::new(bound).collect(entry),
            };
            self.sink.on_result(&hit);

            if self.max_results != 0 && slot >= self.max_results {
                self.token.cancel();
                return None;
            }
        }

        Some(())
    }
}

/// Number of workers for an index of `len` entries
pub fn worker_count(len: usize, max_threads: usize) -> usize {
    if len == 0 {
        return 0;
    }

    let available = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
    let cap = if max_threads == 0 {
        available
    } else {
        max_threads.min(available)
    };

    cap.min(len.div_ceil(MIN_CHUNK)).max(1)
}

/// Starts scanning `index` and returns immediately.
pub fn start(
    index: Arc<Index>,
    matcher: Arc<CompiledMatcher>,
    options: &SearchOptions,
    sink: Arc<dyn ResultSink>,
) -> Result<SearchHandle> {
    let len = index.len();
    let worker_count = worker_count(len, options.max_threads);
    let chunk = if worker_count == 0 {
        0
    } else {
        len.div_ceil(worker_count)
    };

    let token = CancellationToken::new();
    let delivered = Arc::new(AtomicU64::new(0));
    let scanned = Arc::new(AtomicU64::new(0));
    let context = Arc::new(WorkerContext {
        index,
        matcher,
        sink,
        token: token.clone(),
        delivered: Arc::clone(&delivered),
        scanned: Arc::clone(&scanned),
        max_results: u64::from(options.max_results),
    });

    let mut handle = SearchHandle {
        token,
        delivered,
        scanned,
        workers: Vec::with_capacity(worker_count),
        worker_count,
        started: Instant::now(),
    };

    for n in 0..worker_count {
        let range = (n * chunk).min(len)..((n + 1) * chunk).min(len);
        let context = Arc::clone(&context);
        let spawned = std::thread::Builder::new()
            .name(format!("fsearch-worker-{n}"))
            .spawn(move || context.run(range));

        match spawned {
            Ok(worker) => handle.workers.push(worker),
            Err(err) => {
                error!(error = %err, "SEARCH: Failed to spawn worker {}", n);
                handle.cancel();
                // already running workers observe the token and exit
                let _ = handle.join();
                return Err(Error::ThreadSpawn(err));
            }
        }
    }

    debug!(
        "SEARCH: Started {} worker(s) over {} entries (chunk {})",
        worker_count, len, chunk
    );
    Ok(handle)
}
