//! Query language for fsearch.
//!
//! A query is a sequence of terms. Adjacent terms are ANDed, `OR`/`||`
//! and `AND`/`&&` combine explicitly, `NOT`/`!` negates and parentheses
//! group. A term may carry `prefix:` qualifiers selecting a field
//! (`name`, `path`, `ext`/`extension`, `size`, `mtime`) or a modifier
//! (`re`/`regex`, `case`, `nocase`, `exact`). A field value written as
//! `/.../` is a regular expression.
//!
//! # Examples
//!
//! ```
//! use fsearch_query_parser::{Field, Node, parse};
//!
//! let node = parse("report OR path:src").unwrap();
//! match node {
//!     Node::Or(branches) => {
//!         assert_eq!(branches[0], Node::Literal("report".into()));
//!         assert!(matches!(&branches[1], Node::Field { field: Field::Path, .. }));
//!     }
//!     other => panic!("unexpected {other:?}"),
//! }
//!
//! let err = parse("path:").unwrap_err();
//! assert_eq!(err.position, 0);
//! ```

mod ast;
mod error;
mod lexer;
mod numeric;
mod parser;

pub use ast::{Field, Modifier, Node, NumericPredicate};
pub use error::QuerySyntaxError;
pub use parser::{ParserConfig, QueryParser};

/// Parses `query` with the default [`ParserConfig`]
pub fn parse(query: &str) -> Result<Node, QuerySyntaxError> {
    QueryParser::default().parse(query)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_position() {
        let err = parse("(a").unwrap_err();
        assert_eq!(err.to_string(), "unbalanced '(' (at byte 0)");
    }

    #[test]
    fn mixed_query() {
        let node = parse(r#"name:"annual report" !path:tmp size:1k..1m"#).unwrap();
        let Node::And(parts) = node else {
            panic!("expected And");
        };
        assert_eq!(parts.len(), 3);
        assert!(matches!(parts[1], Node::Not(_)));
        assert_eq!(
            parts[2],
            Node::field(
                Field::Size,
                Node::Range(NumericPredicate::between(1024, 1024 * 1024))
            )
        );
    }

    #[test]
    fn parsing_is_deterministic() {
        let query = "(a OR re:b+) !case:C mtime:>=2020-02-02";
        assert_eq!(parse(query).unwrap(), parse(query).unwrap());
    }
}
