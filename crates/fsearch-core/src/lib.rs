//! fsearch-core - file and metadata search engine
//!
//! Builds an in-memory [`Index`] of files under a set of roots, compiles
//! parsed queries into [`CompiledMatcher`] trees and scans the index on
//! worker threads, streaming each match with grapheme-aligned UTF-16
//! highlight ranges to a [`ResultSink`].
//!
//! ```
//! use fsearch_core::{ChannelSink, Index, SearchEngine, SearchOptions};
//! use std::sync::Arc;
//!
//! let index = Arc::new(Index::from_records([
//!     ("/home/me/report.pdf", 1024, 0),
//!     ("/home/me/notes.txt", 12, 0),
//! ]));
//!
//! let engine = SearchEngine::new();
//! let (sink, results) = ChannelSink::new();
//! let id = engine
//!     .start_search(&index, "report", &SearchOptions::default(), Arc::new(sink))
//!     .unwrap();
//! engine.join_search(id).unwrap();
//!
//! let hit = results.try_recv().unwrap();
//! assert_eq!(hit.entry.name, "report.pdf");
//! ```

pub mod cancel;
pub mod engine;
pub mod entry;
mod error;
pub mod fold;
pub mod highlight;
pub mod index;
pub mod log;
pub mod matcher;
pub mod path_utils;
pub mod pattern_cache;
pub mod search;

pub use cancel::CancellationToken;
pub use engine::{EngineInfo, SearchEngine};
pub use entry::Entry;
pub use error::{Error, Result};
pub use highlight::{FieldHighlight, HighlightCollector, HighlightRange};
pub use index::{Index, IndexBuild, IndexInUse, IndexOptions, RootFailure};
pub use matcher::{BoundMatcher, CompileOptions, CompiledMatcher, compile};
pub use pattern_cache::{CacheStats, Engine, PatternCache, PatternKey};
pub use search::{
    ChannelSink, ResultSink, SearchHandle, SearchHit, SearchOptions, SearchResult, SearchSummary,
};

// Re-export query parser types
pub use fsearch_query_parser::{
    Field, Modifier, Node, NumericPredicate, ParserConfig, QueryParser, QuerySyntaxError,
};
