use std::fmt;

/// Entry attribute a term is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Name,
    Path,
    /// Part of the name after its last `.`
    Extension,
    Size,
    Mtime,
}

impl Field {
    pub const ALL: [Field; 5] = [
        Field::Name,
        Field::Path,
        Field::Extension,
        Field::Size,
        Field::Mtime,
    ];

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "name" => Some(Field::Name),
            "path" => Some(Field::Path),
            "ext" | "extension" => Some(Field::Extension),
            "size" => Some(Field::Size),
            "mtime" => Some(Field::Mtime),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Path => "path",
            Field::Extension => "extension",
            Field::Size => "size",
            Field::Mtime => "mtime",
        }
    }

    /// Numeric fields take comparison values instead of text patterns
    #[inline]
    pub fn is_numeric(self) -> bool {
        matches!(self, Field::Size | Field::Mtime)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Prefix that changes how a text term is matched.
///
/// `re:` is not represented here: it turns the term itself into [`Node::Regex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modifier {
    /// `case:` forces case-sensitive matching
    CaseSensitive,
    /// `nocase:` forces case-insensitive matching
    CaseInsensitive,
    /// `exact:` requires the pattern to cover the whole field text
    Exact,
}

impl Modifier {
    pub fn as_str(self) -> &'static str {
        match self {
            Modifier::CaseSensitive => "case",
            Modifier::CaseInsensitive => "nocase",
            Modifier::Exact => "exact",
        }
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive `[min, max]` interval over a numeric field.
///
/// `min > max` is a valid, empty predicate (e.g. `size:<0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NumericPredicate {
    pub min: u64,
    pub max: u64,
}

impl NumericPredicate {
    pub const ANY: NumericPredicate = NumericPredicate {
        min: 0,
        max: u64::MAX,
    };

    pub fn between(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn matches(&self, value: u64) -> bool {
        self.min <= value && value <= self.max
    }
}

/// Query syntax tree. Produced once per query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Plain substring
    Literal(String),
    /// Regular expression source, validated at compile time
    Regex(String),
    /// Restricts `term` to one entry attribute
    Field { field: Field, term: Box<Node> },
    /// Numeric comparison, only valid directly under a `size`/`mtime` field
    Range(NumericPredicate),
    Modified { modifier: Modifier, term: Box<Node> },
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
}

impl Node {
    /// Query that matches every entry
    pub fn match_all() -> Self {
        Node::And(Vec::new())
    }

    pub fn is_match_all(&self) -> bool {
        matches!(self, Node::And(children) if children.is_empty())
    }

    pub fn field(field: Field, term: Node) -> Self {
        Node::Field {
            field,
            term: Box::new(term),
        }
    }

    pub fn modified(modifier: Modifier, term: Node) -> Self {
        Node::Modified {
            modifier,
            term: Box::new(term),
        }
    }

    pub fn not(term: Node) -> Self {
        Node::Not(Box::new(term))
    }

    /// Number of literal, regex and range leaves in the tree
    pub fn leaf_count(&self) -> usize {
        match self {
            Node::Literal(_) | Node::Regex(_) | Node::Range(_) => 1,
            Node::Field { term, .. } | Node::Modified { term, .. } | Node::Not(term) => {
                term.leaf_count()
            }
            Node::And(children) | Node::Or(children) => {
                children.iter().map(Node::leaf_count).sum()
            }
        }
    }
}
