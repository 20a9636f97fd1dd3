//! Query-string parsing for list requests
//!
//! Recognized parameters:
//!
//! - `q=<field>:<value>`: case-insensitive regular-expression match of
//!   `value` against `field`. The first `:` not preceded by a backslash splits
//!   the two halves; `\:` and `\\` in the field name are unescaped.
//! - `offset=<n>`: documents to skip, default 0
//! - `limit=<n>`: documents to return, default 0 meaning unlimited
//!
//! Other parameters are ignored.
//!
//! # Example
//!
//! ```rust
//! use docgate::query::{Matcher, QuerySpec};
//!
//! let parsed = QuerySpec::parse("q=name:ann&limit=2").unwrap();
//! assert_eq!(parsed.limit, 2);
//! assert_eq!(parsed.offset, 0);
//! assert_eq!(
//!     parsed.filter.get("name"),
//!     Some(&Matcher::regex("ann", "i"))
//! );
//! ```

use bson::{Bson, Document, Regex};
use std::collections::BTreeMap;

use crate::error::ErrorRecord;

/// Query parameter carrying the filter expression
pub const QUERY_PARAM: &str = "q";

/// Query parameter carrying the number of documents to skip
pub const OFFSET_PARAM: &str = "offset";

/// Query parameter carrying the maximum number of documents to return
pub const LIMIT_PARAM: &str = "limit";

/// Options applied to every `q` match
pub const QUERY_REGEX_OPTIONS: &str = "i";

/// A predicate on one field
#[derive(Debug, Clone, PartialEq)]
pub enum Matcher {
    /// Field equals the value
    Exact(Bson),
    /// Field is a string matching the pattern
    Regex { pattern: String, options: String },
}

impl Matcher {
    pub fn regex(pattern: impl Into<String>, options: impl Into<String>) -> Self {
        Self::Regex {
            pattern: pattern.into(),
            options: options.into(),
        }
    }

    /// The store-native form of this predicate
    pub fn to_bson(&self) -> Bson {
        match self {
            Self::Exact(value) => value.clone(),
            Self::Regex { pattern, options } => Bson::RegularExpression(Regex {
                pattern: pattern.clone(),
                options: options.clone(),
            }),
        }
    }
}

/// Structured form of a list request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySpec {
    /// Field predicates, all of which must hold
    pub filter: BTreeMap<String, Matcher>,

    /// Number of matching documents to skip
    pub offset: u64,

    /// Maximum number of documents to return, 0 for no limit
    pub limit: u64,
}

impl QuerySpec {
    /// Parse a raw (still percent-encoded) query string
    pub fn parse(query: &str) -> Result<Self, ErrorRecord> {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query)
            .map_err(|e| ErrorRecord::bad_query(format!("Malformed query string: {}", e)))?;

        let mut parsed = QuerySpec::default();
        for (key, value) in pairs {
            match key.as_str() {
                QUERY_PARAM => {
                    let (field, pattern) = split_filter(&value)?;
                    parsed.filter
                        .insert(field, Matcher::regex(pattern, QUERY_REGEX_OPTIONS));
                }
                OFFSET_PARAM => parsed.offset = parse_count(&value),
                LIMIT_PARAM => parsed.limit = parse_count(&value),
                _ => {}
            }
        }

        Ok(parsed)
    }

    /// Whether a limit applies
    pub fn is_limited(&self) -> bool {
        self.limit > 0
    }

    /// Filter document handed to the store
    pub fn filter_document(&self) -> Document {
        self.filter
            .iter()
            .map(|(field, matcher)| (field.clone(), matcher.to_bson()))
            .collect()
    }
}

/// Decimal non-negative integer; anything else counts as absent
fn parse_count(value: &str) -> u64 {
    value.trim().parse().unwrap_or(0)
}

/// Split `field:value` at the first unescaped colon
fn split_filter(expression: &str) -> Result<(String, String), ErrorRecord> {
    let mut field = String::new();
    let mut chars = expression.char_indices();

    while let Some((idx, ch)) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some((_, escaped)) => field.push(escaped),
                None => field.push('\\'),
            },
            ':' => {
                if field.is_empty() {
                    return Err(ErrorRecord::bad_query(format!(
                        "Query {:?} has an empty field name",
                        expression
                    )));
                }
                let value = &expression[idx + ch.len_utf8()..];
                return Ok((field, value.to_string()));
            }
            _ => field.push(ch),
        }
    }

    Err(ErrorRecord::bad_query(format!(
        "Query {:?} must have the form field:value",
        expression
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use bson::doc;

    #[test]
    fn test_full_query() {
        let parsed = QuerySpec::parse("q=name:ann&offset=0&limit=2").unwrap();
        assert_eq!(parsed.offset, 0);
        assert_eq!(parsed.limit, 2);
        assert_eq!(parsed.filter.len(), 1);
        assert_eq!(parsed.filter["name"], Matcher::regex("ann", "i"));
    }

    #[test]
    fn test_defaults() {
        let parsed = QuerySpec::parse("").unwrap();
        assert!(parsed.filter.is_empty());
        assert_eq!(parsed.offset, 0);
        assert_eq!(parsed.limit, 0);
        assert!(!parsed.is_limited());
    }

    #[test]
    fn test_unparsable_counts_default_to_zero() {
        let parsed = QuerySpec::parse("offset=-3&limit=ten").unwrap();
        assert_eq!(parsed.offset, 0);
        assert_eq!(parsed.limit, 0);
    }

    #[test]
    fn test_value_is_always_regex() {
        let parsed = QuerySpec::parse("q=age:31").unwrap();
        assert_eq!(parsed.filter["age"], Matcher::regex("31", "i"));
    }

    #[test]
    fn test_first_colon_splits() {
        let parsed = QuerySpec::parse("q=time:12:30").unwrap();
        assert_eq!(parsed.filter["time"], Matcher::regex("12:30", "i"));
    }

    #[test]
    fn test_escaped_colon_in_field() {
        let parsed = QuerySpec::parse("q=a%5C:b:c").unwrap();
        assert_eq!(parsed.filter["a:b"], Matcher::regex("c", "i"));
    }

    #[test]
    fn test_percent_decoding() {
        let parsed = QuerySpec::parse("q=name%3A%5Ean+n").unwrap();
        assert_eq!(parsed.filter["name"], Matcher::regex("^an n", "i"));
    }

    #[test]
    fn test_missing_colon_is_bad_query() {
        let err = QuerySpec::parse("q=nameann").unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadQuery);
        assert_eq!(err.status, http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_empty_field_is_bad_query() {
        let err = QuerySpec::parse("q=:ann").unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadQuery);
    }

    #[test]
    fn test_empty_value_allowed() {
        let parsed = QuerySpec::parse("q=name:").unwrap();
        assert_eq!(parsed.filter["name"], Matcher::regex("", "i"));
    }

    #[test]
    fn test_unknown_params_ignored() {
        let parsed = QuerySpec::parse("sort=name&limit=5").unwrap();
        assert!(parsed.filter.is_empty());
        assert_eq!(parsed.limit, 5);
    }

    #[test]
    fn test_filter_document() {
        let parsed = QuerySpec::parse("q=name:ann").unwrap();
        assert_eq!(
            parsed.filter_document(),
            doc! { "name": Bson::RegularExpression(Regex { pattern: "ann".into(), options: "i".into() }) }
        );
        assert_eq!(QuerySpec::default().filter_document(), Document::new());
    }

    #[test]
    fn test_exact_matcher_is_plain_value() {
        let mut parsed = QuerySpec::default();
        parsed.filter.insert("age".to_string(), Matcher::Exact(Bson::Int32(31)));
        assert_eq!(parsed.filter_document(), doc! { "age": 31 });
    }
}
