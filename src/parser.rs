//! Low-level character scanner shared by the expression parser.

use serde_json::Value;

use crate::errors::CalcError;

pub type ScanResult<T> = std::result::Result<T, CalcError>;

fn syntax(msg: impl Into<String>) -> CalcError {
    CalcError::Parse(msg.into())
}

pub struct Scanner<'a> {
    s: &'a str,
    i: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(s: &'a str) -> Self {
        Self { s, i: 0 }
    }

    /// An identifier: `[A-Za-z_][A-Za-z0-9_]*`, with `.` allowed between
    /// segments so flattened bind keys like `x.y` read as one name.
    pub fn parse_identifier(&mut self) -> ScanResult<String> {
        let start = self.i;
        let mut last_was_dot = true;
        while let Some(c) = self.peek_char() {
            if c == '_' || c.is_ascii_alphabetic() || (!last_was_dot && c.is_ascii_digit()) {
                last_was_dot = false;
                self.i += c.len_utf8();
            } else if c == '.' && !last_was_dot && self.identifier_continues_after_dot() {
                last_was_dot = true;
                self.i += 1;
            } else {
                break;
            }
        }
        if self.i == start {
            return Err(syntax("identifier expected"));
        }
        Ok(self.s[start..self.i].to_string())
    }

    fn identifier_continues_after_dot(&self) -> bool {
        self.s[self.i + 1..]
            .chars()
            .next()
            .map(|c| c == '_' || c.is_ascii_alphabetic())
            .unwrap_or(false)
    }

    /// A number literal; integers stay integers, a fractional part makes a
    /// float.
    pub fn parse_number_literal(&mut self) -> ScanResult<Value> {
        let start = self.i;
        while self.peek_char().map(|c| c.is_ascii_digit()).unwrap_or(false) {
            self.i += 1;
        }
        let mut is_float = false;
        if self.peek_char() == Some('.')
            && self.s[self.i + 1..]
                .chars()
                .next()
                .map(|c| c.is_ascii_digit())
                .unwrap_or(false)
        {
            is_float = true;
            self.i += 1;
            while self.peek_char().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                self.i += 1;
            }
        }
        let text = &self.s[start..self.i];
        if text.is_empty() {
            return Err(syntax("number expected"));
        }
        if is_float {
            let f: f64 = text.parse().map_err(|_| syntax(format!("bad float `{text}`")))?;
            Ok(Value::from(f))
        } else {
            let n: i64 = text.parse().map_err(|_| syntax(format!("bad integer `{text}`")))?;
            Ok(Value::from(n))
        }
    }

    pub fn parse_quoted_string(&mut self) -> ScanResult<String> {
        let quote = self.peek_char().ok_or_else(|| syntax("string expected"))?;
        if quote != '\'' && quote != '"' {
            return Err(syntax("expected quoted string"));
        }
        self.i += 1;
        let mut out = String::new();
        while let Some(c) = self.peek_char() {
            self.i += c.len_utf8();
            if c == quote {
                return Ok(out);
            }
            if c == '\\' {
                let escaped = self.peek_char().ok_or_else(|| syntax("unterminated string"))?;
                self.i += escaped.len_utf8();
                match escaped {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    other => out.push(other),
                }
            } else {
                out.push(c);
            }
        }
        Err(syntax("unterminated string"))
    }

    pub fn expect(&mut self, c: char) -> ScanResult<()> {
        if self.consume_char(c) {
            Ok(())
        } else {
            Err(syntax(format!("expected `{c}`")))
        }
    }

    pub fn consume_char(&mut self, c: char) -> bool {
        if self.peek_char() == Some(c) {
            self.i += c.len_utf8();
            true
        } else {
            false
        }
    }

    pub fn consume_str(&mut self, lit: &str) -> bool {
        if self.s[self.i..].starts_with(lit) {
            self.i += lit.len();
            true
        } else {
            false
        }
    }

    pub fn peek_char(&self) -> Option<char> {
        self.s[self.i..].chars().next()
    }

    pub fn skip_ws(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.i += c.len_utf8();
            } else {
                break;
            }
        }
    }

    pub fn eof(&self) -> bool {
        self.i >= self.s.len()
    }

    pub fn rest(&self) -> &'a str {
        &self.s[self.i..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn identifiers_may_contain_dotted_segments() {
        let mut s = Scanner::new("x.y + 1");
        assert_eq!(s.parse_identifier().unwrap(), "x.y");
        assert_eq!(s.rest(), " + 1");
    }

    #[test]
    fn trailing_dot_is_not_part_of_an_identifier() {
        let mut s = Scanner::new("x.");
        assert_eq!(s.parse_identifier().unwrap(), "x");
        assert_eq!(s.rest(), ".");
    }

    #[test]
    fn integer_and_float_literals_are_distinct() {
        let mut s = Scanner::new("42");
        assert_eq!(s.parse_number_literal().unwrap(), json!(42));
        let mut s = Scanner::new("2.5");
        assert_eq!(s.parse_number_literal().unwrap(), json!(2.5));
    }

    #[test]
    fn quoted_strings_unescape() {
        let mut s = Scanner::new(r#""a\"b\n""#);
        assert_eq!(s.parse_quoted_string().unwrap(), "a\"b\n");
    }

    #[test]
    fn unterminated_string_is_a_parse_error() {
        let mut s = Scanner::new("'abc");
        assert!(matches!(
            s.parse_quoted_string(),
            Err(CalcError::Parse(_))
        ));
    }
}
