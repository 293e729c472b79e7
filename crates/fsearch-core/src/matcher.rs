//! Compiles a query tree into an executable matcher.
//!
//! [`CompiledMatcher`] has the same shape as the query tree it came from.
//! Text leaves hold a shared [`Pattern`]; the engine behind a pattern is
//! fetched from the evaluating thread's [`PatternCache`] when a worker binds
//! the matcher, so compiled engines never cross threads.

use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::fold::fold_pattern;
use crate::pattern_cache::{Engine, EngineRef, PatternCache, PatternKey};
use crate::search::SearchOptions;
use ahash::AHashMap;
use fsearch_query_parser::{Field, Modifier, Node, NumericPredicate};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// Default case sensitivity when no `case:`/`nocase:` modifier applies
    pub case_sensitive: bool,
    /// Treat plain terms as regular expressions
    pub regex_default: bool,
    /// Unqualified terms search the full path instead of the name
    pub match_path: bool,
}

impl From<&SearchOptions> for CompileOptions {
    fn from(options: &SearchOptions) -> Self {
        Self {
            case_sensitive: options.case_sensitive,
            regex_default: options.regex_default,
            match_path: options.match_path,
        }
    }
}

/// A validated pattern, shared by every worker of a search
#[derive(Debug, PartialEq, Eq)]
pub struct Pattern {
    pub key: PatternKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leaf {
    pub field: Field,
    pub pattern: Arc<Pattern>,
    /// Position of this leaf's engine in a [`BoundMatcher`]
    pub slot: usize,
    /// Runs against the NFKC form of the field text
    pub fold: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompiledMatcher {
    Literal(Leaf),
    Regex(Leaf),
    Field {
        field: Field,
        term: Box<CompiledMatcher>,
    },
    Range {
        field: Field,
        predicate: NumericPredicate,
    },
    Modified {
        modifier: Modifier,
        term: Box<CompiledMatcher>,
    },
    And(Vec<CompiledMatcher>),
    Or(Vec<CompiledMatcher>),
    Not(Box<CompiledMatcher>),
}

impl CompiledMatcher {
    /// Number of text leaves, and so the number of engine slots
    pub fn slot_count(&self) -> usize {
        let mut max = 0;
        self.visit_leaves(&mut |leaf| max = max.max(leaf.slot + 1));
        max
    }

    pub fn visit_leaves<'a>(&'a self, f: &mut impl FnMut(&'a Leaf)) {
        match self {
            CompiledMatcher::Literal(leaf) | CompiledMatcher::Regex(leaf) => f(leaf),
            CompiledMatcher::Range { .. } => {}
            CompiledMatcher::Field { term, .. }
            | CompiledMatcher::Modified { term, .. }
            | CompiledMatcher::Not(term) => term.visit_leaves(f),
            CompiledMatcher::And(children) | CompiledMatcher::Or(children) => {
                for child in children {
                    child.visit_leaves(f);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Scope {
    field: Option<Field>,
    case_sensitive: Option<bool>,
    whole_field: bool,
}

struct Compiler<'o> {
    options: &'o CompileOptions,
    patterns: AHashMap<PatternKey, (Arc<Pattern>, usize)>,
}

/// Compiles `node` into a matcher. Every pattern is compiled once to
/// validate it; no thread cache is touched.
pub fn compile(node: &Node, options: &CompileOptions) -> Result<CompiledMatcher> {
    let mut compiler = Compiler {
        options,
        patterns: AHashMap::new(),
    };
    compiler.compile(node, Scope::default())
}

/// Field an unqualified term applies to
pub fn default_field(text: &str, match_path: bool) -> Field {
    if match_path || text.contains('/') || text.contains(std::path::MAIN_SEPARATOR) {
        Field::Path
    } else {
        Field::Name
    }
}

impl Compiler<'_> {
    fn compile(&mut self, node: &Node, scope: Scope) -> Result<CompiledMatcher> {
        Ok(match node {
            Node::Literal(text) => {
                CompiledMatcher::Literal(self.leaf(text, self.options.regex_default, scope)?)
            }
            Node::Regex(source) => CompiledMatcher::Regex(self.leaf(source, true, scope)?),
            Node::Field { field, term } if field.is_numeric() => match term.as_ref() {
                Node::Range(predicate) => CompiledMatcher::Field {
                    field: *field,
                    term: Box::new(CompiledMatcher::Range {
                        field: *field,
                        predicate: *predicate,
                    }),
                },
                _ => {
                    return Err(Error::PatternCompile {
                        pattern: field.to_string(),
                        message: format!("field '{field}' only accepts numeric comparisons"),
                    });
                }
            },
            Node::Field { field, term } => CompiledMatcher::Field {
                field: *field,
                term: Box::new(self.compile(
                    term,
                    Scope {
                        field: Some(*field),
                        ..scope
                    },
                )?),
            },
            Node::Range(_) => {
                return Err(Error::PatternCompile {
                    pattern: "range".to_string(),
                    message: "numeric comparison outside a size or mtime field".to_string(),
                });
            }
            Node::Modified { modifier, term } => {
                let inner = match modifier {
                    Modifier::CaseSensitive => Scope {
                        case_sensitive: Some(true),
                        ..scope
                    },
                    Modifier::CaseInsensitive => Scope {
                        case_sensitive: Some(false),
                        ..scope
                    },
                    Modifier::Exact => Scope {
                        whole_field: true,
                        ..scope
                    },
                };
                CompiledMatcher::Modified {
                    modifier: *modifier,
                    term: Box::new(self.compile(term, inner)?),
                }
            }
            Node::And(children) => CompiledMatcher::And(self.compile_all(children, scope)?),
            Node::Or(children) => CompiledMatcher::Or(self.compile_all(children, scope)?),
            Node::Not(term) => CompiledMatcher::Not(Box::new(self.compile(term, scope)?)),
        })
    }

    fn compile_all(&mut self, children: &[Node], scope: Scope) -> Result<Vec<CompiledMatcher>> {
        children
            .iter()
            .map(|child| self.compile(child, scope))
            .collect()
    }

    fn leaf(&mut self, text: &str, regex: bool, scope: Scope) -> Result<Leaf> {
        let field = scope
            .field
            .unwrap_or_else(|| default_field(text, self.options.match_path));

        let case_sensitive = scope.case_sensitive.unwrap_or(self.options.case_sensitive);
        let fold = !regex && !case_sensitive;
        let key = PatternKey {
            pattern: if fold {
                fold_pattern(text)
            } else {
                text.to_string()
            },
            case_sensitive,
            regex,
            whole_field: scope.whole_field,
        };

        if let Some((pattern, slot)) = self.patterns.get(&key) {
            return Ok(Leaf {
                field,
                pattern: Arc::clone(pattern),
                slot: *slot,
                fold,
            });
        }

        Engine::compile(&key).map_err(|message| Error::PatternCompile {
            pattern: text.to_string(),
            message,
        })?;

        let slot = self.patterns.len();
        let pattern = Arc::new(Pattern { key: key.clone() });
        self.patterns.insert(key, (Arc::clone(&pattern), slot));

        Ok(Leaf {
            field,
            pattern,
            slot,
            fold,
        })
    }
}

/// A matcher bound to the calling thread's engines.
///
/// Created once per worker; evaluation never touches the cache again.
pub struct BoundMatcher<'m> {
    matcher: &'m CompiledMatcher,
    engines: Vec<Option<EngineRef>>,
}

impl<'m> BoundMatcher<'m> {
    pub fn bind(matcher: &'m CompiledMatcher) -> Self {
        let mut engines = vec![None; matcher.slot_count()];
        matcher.visit_leaves(&mut |leaf| {
            if engines[leaf.slot].is_none() {
                engines[leaf.slot] = PatternCache::engine(&leaf.pattern.key);
            }
        });

        Self { matcher, engines }
    }

    pub fn matcher(&self) -> &'m CompiledMatcher {
        self.matcher
    }

    pub fn is_match(&self, entry: &Entry) -> bool {
        self.eval(self.matcher, entry)
    }

    pub(crate) fn eval(&self, node: &CompiledMatcher, entry: &Entry) -> bool {
        match node {
            CompiledMatcher::Literal(leaf) | CompiledMatcher::Regex(leaf) => {
                self.leaf_matches(leaf, entry)
            }
            CompiledMatcher::Range { field, predicate } => {
                entry.number(*field).is_some_and(|value| predicate.matches(value))
            }
            CompiledMatcher::Field { term, .. } | CompiledMatcher::Modified { term, .. } => {
                self.eval(term, entry)
            }
            CompiledMatcher::And(children) => children.iter().all(|c| self.eval(c, entry)),
            CompiledMatcher::Or(children) => children.iter().any(|c| self.eval(c, entry)),
            CompiledMatcher::Not(term) => !self.eval(term, entry),
        }
    }

    #[inline]
    fn leaf_matches(&self, leaf: &Leaf, entry: &Entry) -> bool {
        match (self.engine(leaf), haystack(leaf, entry)) {
            (Some(engine), Some(text)) => engine.is_match(text.as_bytes()),
            _ => false,
        }
    }

    #[inline]
    pub(crate) fn engine(&self, leaf: &Leaf) -> Option<&Engine> {
        self.engines.get(leaf.slot)?.as_deref()
    }
}

/// Text a leaf runs against: the folded copy for folding leaves when the
/// entry has one, the field text otherwise
#[inline]
pub(crate) fn haystack<'e>(leaf: &Leaf, entry: &'e Entry) -> Option<&'e str> {
    if leaf.fold
        && let Some(folded) = entry.folded(leaf.field)
    {
        return Some(folded.as_str());
    }
    entry.text(leaf.field)
}
