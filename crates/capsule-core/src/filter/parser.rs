//! Recursive-descent parser for filter expressions.

use super::{CompareOp, Filter};
use crate::error::FilterError;

/// Parses a complete filter expression.
///
/// Leading and trailing whitespace is allowed; anything else after the
/// closing parenthesis is an error.
pub(super) fn parse(src: &str) -> Result<Filter, FilterError> {
    let mut parser = Parser { src, pos: 0 };
    parser.skip_ws();
    let filter = parser.filter()?;
    parser.skip_ws();
    if parser.peek().is_some() {
        return Err(parser.error("unexpected characters after filter"));
    }
    Ok(filter)
}

struct Parser<'a> {
    src: &'a str,
    /// Byte offset into `src`.
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.src[self.pos..].chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn error(&self, message: impl Into<String>) -> FilterError {
        FilterError {
            filter: self.src.to_string(),
            position: self.pos,
            message: message.into(),
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), FilterError> {
        match self.peek() {
            Some(c) if c == expected => {
                self.bump();
                Ok(())
            }
            Some(c) => Err(self.error(format!("expected '{expected}', found '{c}'"))),
            None => Err(self.error(format!("expected '{expected}', found end of filter"))),
        }
    }

    /// `filter := '(' ( '&' list | '|' list | '!' filter | item ) ')'`
    fn filter(&mut self) -> Result<Filter, FilterError> {
        self.expect('(')?;
        self.skip_ws();
        let filter = match self.peek() {
            Some('&') => {
                self.bump();
                Filter::And(self.filter_list()?)
            }
            Some('|') => {
                self.bump();
                Filter::Or(self.filter_list()?)
            }
            Some('!') => {
                self.bump();
                self.skip_ws();
                Filter::Not(Box::new(self.filter()?))
            }
            Some(_) => self.item()?,
            None => return Err(self.error("unexpected end of filter")),
        };
        self.skip_ws();
        self.expect(')')?;
        Ok(filter)
    }

    fn filter_list(&mut self) -> Result<Vec<Filter>, FilterError> {
        let mut list = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() != Some('(') {
                break;
            }
            list.push(self.filter()?);
        }
        if list.is_empty() {
            return Err(self.error("expected at least one nested filter"));
        }
        Ok(list)
    }

    /// `item := attr op value`
    fn item(&mut self) -> Result<Filter, FilterError> {
        let attr = self.attribute()?;
        let op = match (self.peek(), self.peek_second()) {
            (Some('='), _) => {
                self.bump();
                CompareOp::Equal
            }
            (Some('~'), Some('=')) => {
                self.bump();
                self.bump();
                CompareOp::Approx
            }
            (Some('>'), Some('=')) => {
                self.bump();
                self.bump();
                CompareOp::GreaterEq
            }
            (Some('<'), Some('=')) => {
                self.bump();
                self.bump();
                CompareOp::LessEq
            }
            _ => return Err(self.error("expected one of '=', '~=', '>=', '<='")),
        };

        let parts = self.value()?;
        if op == CompareOp::Equal && parts.len() > 1 {
            if parts.len() == 2 && parts.iter().all(String::is_empty) {
                return Ok(Filter::Present(attr));
            }
            return Ok(Filter::Substring { attr, parts });
        }
        Ok(Filter::Compare {
            attr,
            op,
            value: parts.join("*"),
        })
    }

    fn attribute(&mut self) -> Result<String, FilterError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, '=' | '<' | '>' | '~' | '(' | ')') {
                break;
            }
            self.bump();
        }
        let attr = self.src[start..self.pos].trim();
        if attr.is_empty() {
            return Err(FilterError {
                filter: self.src.to_string(),
                position: start,
                message: "missing attribute name".to_string(),
            });
        }
        if matches!(self.peek(), Some('(') | Some(')') | None) {
            return Err(self.error("expected comparison operator after attribute"));
        }
        Ok(attr.to_string())
    }

    /// Reads a value up to the closing parenthesis.
    ///
    /// Unescaped `*` split the value into parts; a value without wildcards
    /// yields exactly one part.
    fn value(&mut self) -> Result<Vec<String>, FilterError> {
        let mut parts = Vec::new();
        let mut current = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unexpected end of filter inside value")),
                Some(')') => break,
                Some('(') => return Err(self.error("unescaped '(' in value")),
                Some('\\') => {
                    self.bump();
                    match self.bump() {
                        Some(c) => current.push(c),
                        None => return Err(self.error("dangling escape at end of filter")),
                    }
                }
                Some('*') => {
                    self.bump();
                    parts.push(std::mem::take(&mut current));
                }
                Some(c) => {
                    self.bump();
                    current.push(c);
                }
            }
        }
        parts.push(current);
        Ok(parts)
    }
}
