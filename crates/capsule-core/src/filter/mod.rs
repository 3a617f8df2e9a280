//! LDAP-style filter expressions over [`Properties`].
//!
//! # Grammar
//!
//! ```text
//! filter     := '(' filtercomp ')'
//! filtercomp := '&' filter+ | '|' filter+ | '!' filter | item
//! item       := attr '=' value       equality, or substring when value has '*'
//!             | attr '~=' value      approximate (case and whitespace ignored)
//!             | attr '>=' value
//!             | attr '<=' value
//!             | attr '=*'            presence
//! ```
//!
//! `\` escapes `(`, `)`, `*` and `\` inside values.  Attribute names are
//! case-insensitive.
//!
//! # Evaluation
//!
//! Comparison is type-aware: numeric when the property is numeric (or both
//! sides parse as numbers), boolean for boolean properties, lexical
//! otherwise.  A list-valued property matches when any element matches.
//! A missing attribute never matches (except under `!`).
//!
//! ```
//! use capsule_core::{Filter, Properties};
//!
//! let filter: Filter = "(&(name=foo)(age>=3))".parse()?;
//! assert!(filter.matches(&Properties::new().with("name", "foo").with("age", 5)));
//! assert!(!filter.matches(&Properties::new().with("name", "foo").with("age", 2)));
//! assert!("(bad".parse::<Filter>().is_err());
//! # Ok::<(), capsule_core::FilterError>(())
//! ```

mod parser;

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::FilterError;
use crate::properties::{Properties, PropertyValue};

/// Comparison operator of a simple filter item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `=`
    Equal,
    /// `~=`
    Approx,
    /// `>=`
    GreaterEq,
    /// `<=`
    LessEq,
}

impl CompareOp {
    fn as_str(self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::Approx => "~=",
            Self::GreaterEq => ">=",
            Self::LessEq => "<=",
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Equal | Self::Approx => ordering == Ordering::Equal,
            Self::GreaterEq => ordering != Ordering::Less,
            Self::LessEq => ordering != Ordering::Greater,
        }
    }
}

/// A parsed, immutable filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// All nested filters match.
    And(Vec<Filter>),
    /// At least one nested filter matches.
    Or(Vec<Filter>),
    /// The nested filter does not match.
    Not(Box<Filter>),
    /// The attribute is present.
    Present(String),
    /// `attr op value`.
    Compare {
        /// Attribute name as written.
        attr: String,
        /// Operator.
        op: CompareOp,
        /// Unescaped right-hand side.
        value: String,
    },
    /// `attr=a*b*c`: `parts` are the literal segments between wildcards;
    /// an empty first/last part means the pattern is open at that end.
    Substring {
        /// Attribute name as written.
        attr: String,
        /// Literal segments, at least two.
        parts: Vec<String>,
    },
}

impl Filter {
    /// Parses a filter expression.
    pub fn parse(src: &str) -> Result<Self, FilterError> {
        parser::parse(src)
    }

    /// Parses an optional filter: an empty or all-whitespace string means
    /// "match everything" and yields `None`.
    pub fn parse_optional(src: &str) -> Result<Option<Self>, FilterError> {
        if src.trim().is_empty() {
            Ok(None)
        } else {
            parser::parse(src).map(Some)
        }
    }

    /// Evaluates the filter against a property map.
    pub fn matches(&self, props: &Properties) -> bool {
        match self {
            Self::And(filters) => filters.iter().all(|f| f.matches(props)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(props)),
            Self::Not(filter) => !filter.matches(props),
            Self::Present(attr) => props.contains_key(attr),
            Self::Compare { attr, op, value } => props
                .get(attr)
                .is_some_and(|actual| compare(actual, *op, value)),
            Self::Substring { attr, parts } => props
                .get(attr)
                .is_some_and(|actual| substring(actual, parts)),
        }
    }
}

impl FromStr for Filter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ─── Evaluation helpers ───────────────────────────────────────────────────────

fn compare(actual: &PropertyValue, op: CompareOp, expected: &str) -> bool {
    match actual {
        PropertyValue::List(items) => items.iter().any(|item| compare(item, op, expected)),
        PropertyValue::Int(n) => {
            let expected = expected.trim();
            if let Ok(rhs) = expected.parse::<i64>() {
                op.accepts(n.cmp(&rhs))
            } else {
                compare_f64(*n as f64, op, expected)
            }
        }
        PropertyValue::Float(x) => compare_f64(*x, op, expected.trim()),
        PropertyValue::Bool(b) => match op {
            CompareOp::Equal | CompareOp::Approx => expected
                .trim()
                .parse::<bool>()
                .or_else(|_| expected.trim().to_ascii_lowercase().parse::<bool>())
                .is_ok_and(|rhs| rhs == *b),
            CompareOp::GreaterEq | CompareOp::LessEq => false,
        },
        PropertyValue::String(s) => {
            if let (Some(lhs), Some(rhs)) = (parse_finite(s), parse_finite(expected)) {
                return lhs.partial_cmp(&rhs).is_some_and(|o| op.accepts(o));
            }
            match op {
                CompareOp::Approx => normalize(s) == normalize(expected),
                _ => op.accepts(s.as_str().cmp(expected)),
            }
        }
    }
}

fn compare_f64(lhs: f64, op: CompareOp, expected: &str) -> bool {
    expected
        .parse::<f64>()
        .ok()
        .and_then(|rhs| lhs.partial_cmp(&rhs))
        .is_some_and(|o| op.accepts(o))
}

/// Numeric reading of a string value.  `NaN` and the infinities stay text.
fn parse_finite(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|x| x.is_finite())
}

/// Lowercases and strips whitespace for `~=`.
fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn substring(actual: &PropertyValue, parts: &[String]) -> bool {
    match actual {
        PropertyValue::List(items) => items.iter().any(|item| substring(item, parts)),
        PropertyValue::String(s) => substring_str(s, parts),
        other => substring_str(&other.to_string(), parts),
    }
}

fn substring_str(s: &str, parts: &[String]) -> bool {
    let Some((first, rest)) = parts.split_first() else {
        return false;
    };
    let Some((last, middle)) = rest.split_last() else {
        return s == first;
    };

    let Some(mut remaining) = s.strip_prefix(first.as_str()) else {
        return false;
    };
    for part in middle {
        match remaining.find(part.as_str()) {
            Some(idx) => remaining = &remaining[idx + part.len()..],
            None => return false,
        }
    }
    remaining.ends_with(last.as_str())
}

// ─── Canonical rendering ──────────────────────────────────────────────────────

fn write_escaped(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    for c in value.chars() {
        if matches!(c, '(' | ')' | '*' | '\\') {
            f.write_str("\\")?;
        }
        write!(f, "{c}")?;
    }
    Ok(())
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And(filters) | Self::Or(filters) => {
                f.write_str(if matches!(self, Self::And(_)) { "(&" } else { "(|" })?;
                for filter in filters {
                    write!(f, "{filter}")?;
                }
                f.write_str(")")
            }
            Self::Not(filter) => write!(f, "(!{filter})"),
            Self::Present(attr) => write!(f, "({attr}=*)"),
            Self::Compare { attr, op, value } => {
                write!(f, "({attr}{}", op.as_str())?;
                write_escaped(f, value)?;
                f.write_str(")")
            }
            Self::Substring { attr, parts } => {
                write!(f, "({attr}=")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str("*")?;
                    }
                    write_escaped(f, part)?;
                }
                f.write_str(")")
            }
        }
    }
}
