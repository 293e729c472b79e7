use crate::ast::{Field, Modifier};
use crate::error::QuerySyntaxError;
use smallvec::SmallVec;

/// What a `keyword:` prefix selects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PrefixKind {
    Field(Field),
    Regex,
    Modifier(Modifier),
}

impl PrefixKind {
    /// Only these keywords split a word on `:`. Anything else stays part of
    /// the pattern, so `C:\Users` and `http://host` are plain terms.
    fn from_keyword(keyword: &str) -> Option<Self> {
        if let Some(field) = Field::from_keyword(keyword) {
            return Some(PrefixKind::Field(field));
        }

        match keyword {
            "re" | "regex" => Some(PrefixKind::Regex),
            "case" => Some(PrefixKind::Modifier(Modifier::CaseSensitive)),
            "nocase" => Some(PrefixKind::Modifier(Modifier::CaseInsensitive)),
            "exact" => Some(PrefixKind::Modifier(Modifier::Exact)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Prefix {
    /// Lowercased keyword without the trailing colon
    pub keyword: String,
    pub kind: PrefixKind,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct RawTerm {
    pub prefixes: SmallVec<[Prefix; 2]>,
    pub value: String,
    pub value_position: usize,
    /// Part of the value was quoted or escaped, so it can never be an operator
    pub literal: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Term(RawTerm),
    And,
    Or,
    Not,
    OpenParen,
    CloseParen,
}

impl TokenKind {
    /// Whether a token of this kind can begin an operand
    #[inline]
    pub fn starts_operand(&self) -> bool {
        matches!(
            self,
            TokenKind::Term(_) | TokenKind::Not | TokenKind::OpenParen
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub position: usize,
}

pub(crate) type TokenVec = SmallVec<[Token; 16]>;

pub(crate) struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    pub fn tokenize(mut self) -> Result<TokenVec, QuerySyntaxError> {
        let mut tokens = TokenVec::new();

        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
                continue;
            }

            let position = self.pos;
            let kind = match c {
                '(' => {
                    self.bump();
                    TokenKind::OpenParen
                }
                ')' => {
                    self.bump();
                    TokenKind::CloseParen
                }
                '!' => {
                    self.bump();
                    TokenKind::Not
                }
                _ => self.read_word(position)?,
            };

            tokens.push(Token { kind, position });
        }

        Ok(tokens)
    }

    #[inline]
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    #[inline]
    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn read_word(&mut self, start: usize) -> Result<TokenKind, QuerySyntaxError> {
        let mut term = RawTerm {
            value_position: start,
            ..RawTerm::default()
        };
        let mut segment = String::new();
        let mut segment_start = start;
        let mut segment_plain = true;
        let mut peeling = true;
        let mut depth = 0usize;

        while let Some(c) = self.peek() {
            if c == ':'
                && peeling
                && segment_plain
                && let Some(kind) = prefix_kind(&segment)
            {
                if matches!(kind, PrefixKind::Field(field) if field.is_numeric()) {
                    peeling = false;
                }
                term.prefixes.push(Prefix {
                    keyword: segment.to_ascii_lowercase(),
                    kind,
                    position: segment_start,
                });
                segment.clear();
                self.bump();
                segment_start = self.pos;
                term.value_position = self.pos;
                continue;
            }

            match c {
                c if c.is_whitespace() => break,
                ')' if depth == 0 => break,
                // `NOT(a)` is an operator followed by a group
                '(' if depth == 0
                    && term.prefixes.is_empty()
                    && !term.literal
                    && is_operator_keyword(&segment) =>
                {
                    break;
                }
                '(' => {
                    depth += 1;
                    segment.push(c);
                    self.bump();
                }
                ')' => {
                    depth -= 1;
                    segment.push(c);
                    self.bump();
                }
                '\\' => {
                    let escape_at = self.pos;
                    self.bump();
                    let escaped = self.bump().ok_or_else(|| {
                        QuerySyntaxError::new(escape_at, "dangling escape at end of query")
                    })?;
                    if is_regex(&term) || !is_escapable(escaped) {
                        segment.push('\\');
                    }
                    segment.push(escaped);
                    segment_plain = false;
                    term.literal |= is_escapable(escaped);
                }
                '"' if segment.is_empty() => {
                    self.read_quoted(&mut segment, is_regex(&term))?;
                    segment_plain = false;
                    term.literal = true;
                }
                _ => {
                    segment.push(c);
                    self.bump();
                }
            }
        }

        term.value = segment;

        if term.prefixes.is_empty() && !term.literal {
            match term.value.as_str() {
                "AND" | "&&" => return Ok(TokenKind::And),
                "OR" | "||" => return Ok(TokenKind::Or),
                "NOT" => return Ok(TokenKind::Not),
                _ => {}
            }
        }

        Ok(TokenKind::Term(term))
    }

    /// Reads a `"..."` section. Only `\"` and, outside regex values, `\\`
    /// are unescaped; every other backslash reaches the pattern as written.
    fn read_quoted(&mut self, out: &mut String, keep_escapes: bool) -> Result<(), QuerySyntaxError> {
        let open_at = self.pos;
        self.bump();

        loop {
            match self.bump() {
                Some('"') => return Ok(()),
                Some('\\') => match self.bump() {
                    Some(escaped) => {
                        if escaped != '"' && (keep_escapes || escaped != '\\') {
                            out.push('\\');
                        }
                        out.push(escaped);
                    }
                    None => break,
                },
                Some(c) => out.push(c),
                None => break,
            }
        }

        Err(QuerySyntaxError::new(open_at, "unterminated quoted string"))
    }
}

fn is_regex(term: &RawTerm) -> bool {
    term.prefixes.iter().any(|p| p.kind == PrefixKind::Regex)
}

fn prefix_kind(segment: &str) -> Option<PrefixKind> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_alphabetic()) {
        return None;
    }
    PrefixKind::from_keyword(&segment.to_ascii_lowercase())
}

fn is_operator_keyword(segment: &str) -> bool {
    matches!(segment, "AND" | "OR" | "NOT" | "&&" | "||")
}

/// Characters a backslash makes literal outside regex values. Before any
/// other character the backslash itself is kept, as in `C:\Users`.
fn is_escapable(c: char) -> bool {
    c.is_whitespace() || matches!(c, '\\' | '"' | ':' | '(' | ')' | '!' | '&' | '|')
}
