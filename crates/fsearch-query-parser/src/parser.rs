use crate::ast::{Field, Modifier, Node};
use crate::error::QuerySyntaxError;
use crate::lexer::{Lexer, PrefixKind, RawTerm, Token, TokenKind};
use crate::numeric;
use smallvec::SmallVec;

/// Parser limits
#[derive(Debug, Clone, Copy)]
pub struct ParserConfig {
    /// Maximum nesting of groups and `NOT`s before the query is rejected
    pub max_depth: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self { max_depth: 64 }
    }
}

#[derive(Debug, Default, Clone)]
pub struct QueryParser {
    config: ParserConfig,
}

impl QueryParser {
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    /// Parses `query` into a syntax tree.
    ///
    /// Unqualified terms are left without a [`Node::Field`] wrapper; the
    /// matcher compiler decides which attribute they apply to. The empty
    /// query parses to an empty `And`, which matches everything.
    pub fn parse(&self, query: &str) -> Result<Node, QuerySyntaxError> {
        let tokens = Lexer::new(query).tokenize()?;
        if tokens.is_empty() {
            return Ok(Node::match_all());
        }

        let mut state = ParseState {
            tokens: &tokens,
            cursor: 0,
            depth: 0,
            end: query.len(),
            config: &self.config,
        };

        let node = state.parse_or()?;
        if let Some(token) = state.peek() {
            return Err(QuerySyntaxError::new(token.position, "unbalanced ')'"));
        }

        Ok(node)
    }
}

struct ParseState<'t> {
    tokens: &'t [Token],
    cursor: usize,
    depth: usize,
    end: usize,
    config: &'t ParserConfig,
}

impl<'t> ParseState<'t> {
    #[inline]
    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.cursor)
    }

    #[inline]
    fn next(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.cursor)?;
        self.cursor += 1;
        Some(token)
    }

    fn at_operand(&self) -> bool {
        self.peek().is_some_and(|t| t.kind.starts_operand())
    }

    fn expect_operand(&self, operator: &str, position: usize) -> Result<(), QuerySyntaxError> {
        if self.at_operand() {
            Ok(())
        } else {
            Err(QuerySyntaxError::new(
                position,
                format!("dangling operator '{operator}'"),
            ))
        }
    }

    fn enter(&mut self, position: usize) -> Result<(), QuerySyntaxError> {
        self.depth += 1;
        if self.depth > self.config.max_depth {
            return Err(QuerySyntaxError::new(position, "query nested too deeply"));
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Node, QuerySyntaxError> {
        let mut branches: SmallVec<[Node; 4]> = SmallVec::new();
        branches.push(self.parse_and()?);

        while let Some(token) = self.peek() {
            if token.kind != TokenKind::Or {
                break;
            }
            self.cursor += 1;
            self.expect_operand("OR", token.position)?;
            branches.push(self.parse_and()?);
        }

        Ok(collapse(branches, Node::Or))
    }

    fn parse_and(&mut self) -> Result<Node, QuerySyntaxError> {
        let mut parts: SmallVec<[Node; 4]> = SmallVec::new();
        parts.push(self.parse_unary()?);

        while let Some(token) = self.peek() {
            match &token.kind {
                TokenKind::And => {
                    self.cursor += 1;
                    self.expect_operand("AND", token.position)?;
                    parts.push(self.parse_unary()?);
                }
                kind if kind.starts_operand() => parts.push(self.parse_unary()?),
                _ => break,
            }
        }

        Ok(collapse(parts, Node::And))
    }

    fn parse_unary(&mut self) -> Result<Node, QuerySyntaxError> {
        match self.peek() {
            Some(token) if token.kind == TokenKind::Not => {
                self.cursor += 1;
                self.expect_operand("NOT", token.position)?;
                self.enter(token.position)?;
                let inner = self.parse_unary()?;
                self.depth -= 1;
                Ok(Node::not(inner))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Node, QuerySyntaxError> {
        let Some(token) = self.next() else {
            return Err(QuerySyntaxError::new(self.end, "expected a search term"));
        };

        match &token.kind {
            TokenKind::Term(raw) => build_term(raw, token.position),
            TokenKind::OpenParen => {
                match self.peek() {
                    None => {
                        return Err(QuerySyntaxError::new(token.position, "unbalanced '('"));
                    }
                    Some(next) if next.kind == TokenKind::CloseParen => {
                        return Err(QuerySyntaxError::new(token.position, "empty group"));
                    }
                    Some(_) => {}
                }

                self.enter(token.position)?;
                let inner = self.parse_or()?;
                self.depth -= 1;

                match self.next() {
                    Some(close) if close.kind == TokenKind::CloseParen => Ok(inner),
                    _ => Err(QuerySyntaxError::new(token.position, "unbalanced '('")),
                }
            }
            TokenKind::CloseParen => Err(QuerySyntaxError::new(token.position, "unbalanced ')'")),
            TokenKind::And => Err(QuerySyntaxError::new(
                token.position,
                "dangling operator 'AND'",
            )),
            TokenKind::Or => Err(QuerySyntaxError::new(
                token.position,
                "dangling operator 'OR'",
            )),
            TokenKind::Not => {
                self.cursor -= 1;
                self.parse_unary()
            }
        }
    }
}

fn collapse(mut nodes: SmallVec<[Node; 4]>, join: fn(Vec<Node>) -> Node) -> Node {
    if nodes.len() == 1 {
        if let Some(node) = nodes.pop() {
            return node;
        }
    }
    join(nodes.into_vec())
}

/// Characters that only make sense as operators when they form a whole word
fn is_operator_word(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| matches!(c, '&' | '|' | '<' | '>' | '='))
}

/// `name:/^foo/` is a regex; quoting the value keeps it literal
fn slash_delimited(raw: &RawTerm) -> Option<&str> {
    if raw.literal {
        return None;
    }
    raw.value
        .strip_prefix('/')?
        .strip_suffix('/')
        .filter(|source| !source.is_empty())
}

fn build_term(raw: &RawTerm, position: usize) -> Result<Node, QuerySyntaxError> {
    let mut field: Option<Field> = None;
    let mut regex = false;
    let mut modifiers: SmallVec<[Modifier; 3]> = SmallVec::new();
    let mut first_text_prefix: Option<(&str, usize)> = None;

    for prefix in &raw.prefixes {
        let modifier = match prefix.kind {
            PrefixKind::Field(parsed) => {
                if let Some(existing) = field {
                    return Err(QuerySyntaxError::new(
                        prefix.position,
                        format!("field '{parsed}' conflicts with field '{existing}'"),
                    ));
                }
                field = Some(parsed);
                continue;
            }
            PrefixKind::Regex => None,
            PrefixKind::Modifier(modifier) => Some(modifier),
        };

        first_text_prefix.get_or_insert((prefix.keyword.as_str(), prefix.position));
        match modifier {
            None => regex = true,
            Some(modifier) if !modifiers.contains(&modifier) => modifiers.push(modifier),
            Some(_) => {}
        }
    }

    if modifiers.contains(&Modifier::CaseSensitive) && modifiers.contains(&Modifier::CaseInsensitive)
    {
        let at = raw
            .prefixes
            .iter()
            .find(|p| p.keyword == "case" || p.keyword == "nocase")
            .map_or(position, |p| p.position);
        return Err(QuerySyntaxError::new(
            at,
            "conflicting modifiers 'case' and 'nocase'",
        ));
    }

    if let Some(last) = raw.prefixes.last() {
        if raw.value.is_empty() && !raw.literal {
            return Err(QuerySyntaxError::new(
                last.position,
                format!("unterminated field qualifier '{}:'", last.keyword),
            ));
        }
    } else if !raw.literal && is_operator_word(&raw.value) {
        return Err(QuerySyntaxError::new(
            position,
            format!("unsupported operator '{}'", raw.value),
        ));
    }

    if let Some(numeric_field) = field.filter(|f| f.is_numeric()) {
        if let Some((keyword, at)) = first_text_prefix {
            return Err(QuerySyntaxError::new(
                at,
                format!("invalid modifier '{keyword}' for field '{numeric_field}'"),
            ));
        }

        let predicate = numeric::parse_predicate(numeric_field, &raw.value)
            .map_err(|message| QuerySyntaxError::new(raw.value_position, message))?;
        return Ok(Node::field(numeric_field, Node::Range(predicate)));
    }

    let mut node = match slash_delimited(raw) {
        Some(source) if field.is_some() && !regex => Node::Regex(source.to_string()),
        _ if regex => Node::Regex(raw.value.clone()),
        _ => Node::Literal(raw.value.clone()),
    };

    for modifier in modifiers.into_iter().rev() {
        node = Node::modified(modifier, node);
    }

    Ok(match field {
        Some(field) => Node::field(field, node),
        None => node,
    })
}
