use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::path_utils;
use ahash::AHashSet;
use ignore::{WalkBuilder, WalkState};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Traversal settings for [`Index::build`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexOptions {
    pub follow_links: bool,
    pub include_hidden: bool,
    pub max_depth: Option<usize>,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            follow_links: false,
            include_hidden: true,
            max_depth: None,
        }
    }
}

/// A root that could not be indexed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RootFailure {
    pub root: PathBuf,
    pub message: String,
}

#[derive(Debug)]
pub struct IndexBuild {
    pub index: Index,
    /// Roots that were skipped, the build still succeeded for the others
    pub failures: Vec<RootFailure>,
    /// Directories inside readable roots that could not be listed
    pub skipped_subtrees: usize,
}

/// Returned by [`Index::free`] while searches still hold the index
#[derive(Debug)]
pub struct IndexInUse {
    pub index: Arc<Index>,
    pub holders: usize,
}

impl From<IndexInUse> for Error {
    fn from(in_use: IndexInUse) -> Self {
        Error::InvariantViolation(format!(
            "index is still referenced by {} other holder(s)",
            in_use.holders
        ))
    }
}

/// Immutable, ordered collection of entries.
///
/// Entry ids are assigned in build order starting from 1, so the entry with
/// id `n` lives at position `n - 1`.
#[derive(Debug, Default)]
pub struct Index {
    entries: Vec<Entry>,
    roots: Vec<PathBuf>,
}

impl Index {
    /// Walks every root and records each non-directory item found.
    ///
    /// Missing or unreadable roots are reported in [`IndexBuild::failures`];
    /// the build only fails when no root could be read at all.
    pub fn build<P: AsRef<Path>>(roots: &[P], options: &IndexOptions) -> Result<IndexBuild> {
        let started = Instant::now();
        let mut failures = Vec::new();
        let mut resolved = Vec::with_capacity(roots.len());

        for root in roots {
            let root = root.as_ref();
            match path_utils::resolve_root(root) {
                Ok(path) => resolved.push(path),
                Err(err) => {
                    warn!(root = %root.display(), error = %err, "INDEX: Skipping unreadable root");
                    failures.push(RootFailure {
                        root: root.to_path_buf(),
                        message: err.to_string(),
                    });
                }
            }
        }

        if resolved.is_empty() {
            error!(failed = failures.len(), "INDEX: No readable roots");
            return Err(Error::IndexBuild { failures });
        }

        let skipped = AtomicUsize::new(0);
        let mut seen = AHashSet::new();
        let mut paths = Vec::new();
        for root in &resolved {
            for path in walk_root(root, options, &skipped) {
                // overlapping roots yield the same path twice
                if seen.insert(path.clone()) {
                    paths.push(path);
                }
            }
        }
        let walk_time = started.elapsed();

        let items: Vec<(PathBuf, std::fs::Metadata)> = paths
            .into_par_iter()
            .filter_map(|path| {
                let metadata = if options.follow_links {
                    std::fs::metadata(&path)
                } else {
                    std::fs::symlink_metadata(&path)
                };

                match metadata {
                    Ok(metadata) => Some((path, metadata)),
                    Err(err) => {
                        debug!(path = %path.display(), error = %err, "INDEX: Entry vanished during build");
                        None
                    }
                }
            })
            .collect();

        let entries: Vec<Entry> = items
            .par_iter()
            .enumerate()
            .map(|(position, (path, metadata))| {
                Entry::from_metadata(position as u64 + 1, path, metadata)
            })
            .collect();

        let skipped_subtrees = skipped.into_inner();
        info!(
            "INDEX: Indexed {} entries from {} root(s) in {:?} (walk {:?}, {} skipped subtrees)",
            entries.len(),
            resolved.len(),
            started.elapsed(),
            walk_time,
            skipped_subtrees
        );

        Ok(IndexBuild {
            index: Index {
                entries,
                roots: resolved,
            },
            failures,
            skipped_subtrees,
        })
    }

    /// Builds an index from `(path, size, mtime)` records without touching
    /// the filesystem.
    pub fn from_records<I, P>(records: I) -> Self
    where
        I: IntoIterator<Item = (P, u64, u64)>,
        P: AsRef<Path>,
    {
        let entries = records
            .into_iter()
            .enumerate()
            .map(|(position, (path, size, mtime))| {
                Entry::new(position as u64 + 1, path.as_ref(), size, mtime)
            })
            .collect();

        Self {
            entries,
            roots: Vec::new(),
        }
    }

    /// Entries in build order. Call again to restart.
    pub fn entries(&self) -> std::slice::Iter<'_, Entry> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[Entry] {
        &self.entries
    }

    pub fn get(&self, id: u64) -> Option<&Entry> {
        let position = usize::try_from(id.checked_sub(1)?).ok()?;
        self.entries.get(position).filter(|entry| entry.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Canonical roots the index was built from
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Releases the index. Fails and hands the index back while any other
    /// holder (typically a running search) still references it.
    pub fn free(index: Arc<Index>) -> std::result::Result<(), IndexInUse> {
        match Arc::try_unwrap(index) {
            Ok(index) => {
                debug!(entries = index.len(), "INDEX: Freed");
                Ok(())
            }
            Err(index) => {
                let holders = Arc::strong_count(&index) - 1;
                Err(IndexInUse { index, holders })
            }
        }
    }
}

fn walk_root(root: &Path, options: &IndexOptions, skipped: &AtomicUsize) -> Vec<PathBuf> {
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .hidden(!options.include_hidden)
        .follow_links(options.follow_links)
        .max_depth(options.max_depth)
        .build_parallel();

    let found = Arc::new(Mutex::new(Vec::new()));
    walker.run(|| {
        let found = Arc::clone(&found);
        Box::new(move |result| {
            match result {
                Ok(entry) => {
                    if !entry.file_type().is_some_and(|ft| ft.is_dir())
                        && let Ok(mut found) = found.lock()
                    {
                        found.push(entry.into_path());
                    }
                }
                Err(err) => {
                    skipped.fetch_add(1, Ordering::Relaxed);
                    debug!(error = %err, "INDEX: Skipping unreadable subtree");
                }
            }
            WalkState::Continue
        })
    });

    let mut found = match Arc::try_unwrap(found) {
        Ok(mutex) => mutex.into_inner().unwrap_or_else(|poison| poison.into_inner()),
        Err(shared) => shared
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default(),
    };

    found.par_sort_unstable_by(|a, b| a.as_os_str().cmp(b.as_os_str()));
    found
}
