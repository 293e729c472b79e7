//! Compiled pattern engines and the per-thread cache that owns them.
//!
//! Engines carry mutable match state (PCRE2 match data, regex caches), so each
//! worker thread compiles and keeps its own copy. [`EngineRef`] is `!Send`,
//! which keeps an engine from escaping the thread that built it.

use ahash::AHashMap;
use memchr::memmem;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{trace, warn};

/// Identity of a compiled pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PatternKey {
    /// Literal text or regex source as written in the query
    pub pattern: String,
    pub case_sensitive: bool,
    pub regex: bool,
    /// The match must cover the whole field text
    pub whole_field: bool,
}

impl PatternKey {
    pub fn literal(pattern: impl Into<String>, case_sensitive: bool) -> Self {
        Self {
            pattern: pattern.into(),
            case_sensitive,
            regex: false,
            whole_field: false,
        }
    }

    pub fn regex(pattern: impl Into<String>, case_sensitive: bool) -> Self {
        Self {
            pattern: pattern.into(),
            case_sensitive,
            regex: true,
            whole_field: false,
        }
    }

    pub fn whole_field(mut self) -> Self {
        self.whole_field = true;
        self
    }
}

/// Executable matcher for one pattern
pub enum Engine {
    /// Empty substring, matches any text without producing spans
    Any,
    /// Case-sensitive substring search
    Substring(memmem::Finder<'static>),
    /// Escaped literal through the regex engine, for case folding and anchoring
    Literal(regex::bytes::Regex),
    Pcre(pcre2::bytes::Regex),
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Engine::Any => f.write_str("Engine::Any"),
            Engine::Substring(finder) => f
                .debug_tuple("Engine::Substring")
                .field(&String::from_utf8_lossy(finder.needle()))
                .finish(),
            Engine::Literal(re) => f.debug_tuple("Engine::Literal").field(&re.as_str()).finish(),
            Engine::Pcre(re) => f.debug_tuple("Engine::Pcre").field(&re.as_str()).finish(),
        }
    }
}

impl Engine {
    /// Builds the engine for `key`. The error is the engine's message.
    pub fn compile(key: &PatternKey) -> std::result::Result<Engine, String> {
        if key.regex {
            let source = if key.whole_field {
                format!(r"\A(?:{})\z", key.pattern)
            } else {
                key.pattern.clone()
            };

            return pcre2::bytes::RegexBuilder::new()
                .caseless(!key.case_sensitive)
                .utf(true)
                .ucp(true)
                .jit_if_available(true)
                .build(&source)
                .map(Engine::Pcre)
                .map_err(|e| e.to_string());
        }

        if key.pattern.is_empty() && !key.whole_field {
            return Ok(Engine::Any);
        }

        if key.case_sensitive && !key.whole_field {
            let finder = memmem::Finder::new(key.pattern.as_bytes()).into_owned();
            return Ok(Engine::Substring(finder));
        }

        let escaped = regex::escape(&key.pattern);
        let source = if key.whole_field {
            format!(r"\A(?:{escaped})\z")
        } else {
            escaped
        };

        regex::bytes::RegexBuilder::new(&source)
            .case_insensitive(!key.case_sensitive)
            .unicode(true)
            .build()
            .map(Engine::Literal)
            .map_err(|e| e.to_string())
    }

    /// Engine failures at match time count as no match.
    pub fn is_match(&self, haystack: &[u8]) -> bool {
        match self {
            Engine::Any => true,
            Engine::Substring(finder) => finder.find(haystack).is_some(),
            Engine::Literal(re) => re.is_match(haystack),
            Engine::Pcre(re) => match re.is_match(haystack) {
                Ok(matched) => matched,
                Err(err) => {
                    trace!(error = %err, "PCRE2 match failed, treating as no match");
                    false
                }
            },
        }
    }

    /// Appends every non-overlapping match as a byte span
    pub fn find_spans(&self, haystack: &[u8], out: &mut Vec<(usize, usize)>) {
        match self {
            Engine::Any => {}
            Engine::Substring(finder) => {
                let len = finder.needle().len();
                out.extend(finder.find_iter(haystack).map(|start| (start, start + len)));
            }
            Engine::Literal(re) => {
                out.extend(re.find_iter(haystack).map(|m| (m.start(), m.end())));
            }
            Engine::Pcre(re) => {
                for found in re.find_iter(haystack) {
                    match found {
                        Ok(m) => out.push((m.start(), m.end())),
                        Err(err) => {
                            trace!(error = %err, "PCRE2 match failed while collecting spans");
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Shared handle to an engine owned by the current thread's cache
pub type EngineRef = Rc<Engine>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Per-thread map from [`PatternKey`] to compiled engine.
///
/// Populated lazily on first use and kept for the lifetime of the thread.
/// A key that fails to compile is remembered as `None`.
#[derive(Default)]
pub struct PatternCache {
    engines: AHashMap<PatternKey, Option<EngineRef>>,
    hits: u64,
    misses: u64,
}

thread_local! {
    static THREAD_CACHE: RefCell<PatternCache> = RefCell::new(PatternCache::default());
}

impl PatternCache {
    /// Fetches the calling thread's engine for `key`, compiling it on a miss.
    pub fn engine(key: &PatternKey) -> Option<EngineRef> {
        THREAD_CACHE.with_borrow_mut(|cache| cache.lookup(key))
    }

    /// Runs `f` with the calling thread's engine for `key`.
    pub fn with_engine<R>(key: &PatternKey, f: impl FnOnce(&Engine) -> R) -> Option<R> {
        Self::engine(key).map(|engine| f(&engine))
    }

    /// Counters of the calling thread's cache
    pub fn stats() -> CacheStats {
        THREAD_CACHE.with_borrow(|cache| CacheStats {
            hits: cache.hits,
            misses: cache.misses,
            entries: cache.engines.len(),
        })
    }

    /// Drops every engine cached by the calling thread
    pub fn clear() {
        THREAD_CACHE.with_borrow_mut(|cache| {
            cache.engines.clear();
            cache.hits = 0;
            cache.misses = 0;
        });
    }

    fn lookup(&mut self, key: &PatternKey) -> Option<EngineRef> {
        if let Some(cached) = self.engines.get(key) {
            self.hits += 1;
            return cached.clone();
        }

        self.misses += 1;
        let engine = match Engine::compile(key) {
            Ok(engine) => Some(Rc::new(engine)),
            Err(message) => {
                warn!(pattern = %key.pattern, %message, "Pattern failed to compile on worker thread");
                None
            }
        };
        self.engines.insert(key.clone(), engine.clone());
        engine
    }
}
