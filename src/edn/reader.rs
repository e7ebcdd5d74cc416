//! Text reader for the symbolic value subset.

use super::Value;
use thiserror::Error;

/// Reader error with a byte position into the input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parse error at byte {pos}: {message}")]
pub struct ParseError {
    /// Byte offset of the error.
    pub pos: usize,
    /// Human-readable description.
    pub message: String,
}

/// Parse a single value from `input`.
///
/// Trailing whitespace and comments are permitted; any other trailing
/// content is an error.
pub fn parse(input: &str) -> Result<Value, ParseError> {
    let mut reader = Reader::new(input);
    let value = reader.read_value()?;
    reader.skip_whitespace();
    if !reader.at_end() {
        return Err(reader.error("trailing content after value"));
    }
    Ok(value)
}

/// Cursor over the input text.
struct Reader<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            bytes: input.as_bytes(),
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            pos: self.pos,
            message: message.into(),
        }
    }

    /// Skip whitespace (including commas) and `;` line comments.
    fn skip_whitespace(&mut self) {
        while let Some(b) = self.peek() {
            match b {
                b' ' | b'\t' | b'\n' | b'\r' | b',' => {
                    self.pos += 1;
                }
                b';' => {
                    while let Some(b) = self.peek() {
                        self.pos += 1;
                        if b == b'\n' {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
    }

    fn read_value(&mut self) -> Result<Value, ParseError> {
        self.skip_whitespace();
        match self.peek() {
            None => Err(self.error("unexpected end of input")),
            Some(b'(') => {
                self.pos += 1;
                self.read_seq(b')').map(Value::List)
            }
            Some(b'[') => {
                self.pos += 1;
                self.read_seq(b']').map(Value::Vector)
            }
            Some(b'{') => {
                self.pos += 1;
                self.read_map()
            }
            Some(b'#') => {
                self.pos += 1;
                self.read_dispatch()
            }
            Some(b'"') => {
                self.pos += 1;
                self.read_string().map(Value::String)
            }
            Some(b':') => {
                self.pos += 1;
                let start = self.pos;
                let name = self.read_symbol_chars();
                if name.is_empty() {
                    self.pos = start;
                    return Err(self.error("empty keyword"));
                }
                Ok(Value::Keyword(name.to_string()))
            }
            Some(b')') | Some(b']') | Some(b'}') => Err(self.error("unmatched closing delimiter")),
            Some(_) => self.read_atom(),
        }
    }

    /// Read elements until `close`, which has already had its opener consumed.
    fn read_seq(&mut self, close: u8) -> Result<Vec<Value>, ParseError> {
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                None => return Err(self.error("unterminated collection")),
                Some(b) if b == close => {
                    self.pos += 1;
                    return Ok(items);
                }
                Some(_) => items.push(self.read_value()?),
            }
        }
    }

    fn read_map(&mut self) -> Result<Value, ParseError> {
        let items = self.read_seq(b'}')?;
        if items.len() % 2 != 0 {
            return Err(self.error("map literal with an odd number of forms"));
        }
        let mut pairs = Vec::with_capacity(items.len() / 2);
        let mut iter = items.into_iter();
        while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
            pairs.push((k, v));
        }
        Ok(Value::Map(pairs))
    }

    /// Read a `#`-dispatched form: a set or a tagged literal.
    fn read_dispatch(&mut self) -> Result<Value, ParseError> {
        match self.peek() {
            Some(b'{') => {
                self.pos += 1;
                self.read_seq(b'}').map(Value::Set)
            }
            Some(b) if is_symbol_start(b) => {
                let tag = self.read_symbol_chars().to_string();
                let value = self.read_value()?;
                Ok(Value::Tagged {
                    tag,
                    value: Box::new(value),
                })
            }
            _ => Err(self.error("expected set or tag after '#'")),
        }
    }

    fn read_string(&mut self) -> Result<String, ParseError> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some(b'"') => return Ok(out),
                Some(b'\\') => match self.bump() {
                    Some(b'"') => out.push('"'),
                    Some(b'\\') => out.push('\\'),
                    Some(b'n') => out.push('\n'),
                    Some(b't') => out.push('\t'),
                    Some(b'r') => out.push('\r'),
                    _ => return Err(self.error("unsupported string escape")),
                },
                Some(b) if b < 0x80 => out.push(b as char),
                Some(_) => {
                    // Multi-byte UTF-8: re-read the full char from the str.
                    self.pos -= 1;
                    let c = self.input[self.pos..]
                        .chars()
                        .next()
                        .ok_or_else(|| self.error("invalid UTF-8"))?;
                    out.push(c);
                    self.pos += c.len_utf8();
                }
            }
        }
    }

    /// Read an unprefixed atom: nil, booleans, integers, or a symbol.
    fn read_atom(&mut self) -> Result<Value, ParseError> {
        let start = self.pos;
        let text = self.read_symbol_chars();
        if text.is_empty() {
            return Err(self.error("unexpected character"));
        }
        match text {
            "nil" => Ok(Value::Nil),
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => {
                let first = text.as_bytes()[0];
                let numeric = first.is_ascii_digit()
                    || (first == b'-' && text.len() > 1 && text.as_bytes()[1].is_ascii_digit());
                if numeric {
                    text.parse::<i64>().map(Value::Int).map_err(|_| ParseError {
                        pos: start,
                        message: format!("invalid integer literal {text:?}"),
                    })
                } else {
                    Ok(Value::Symbol(text.to_string()))
                }
            }
        }
    }

    /// Consume a run of symbol-constituent characters.
    fn read_symbol_chars(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if is_symbol_char(b) {
                self.pos += 1;
            } else {
                break;
            }
        }
        &self.input[start..self.pos]
    }
}

fn is_symbol_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || matches!(b, b'.' | b'*' | b'+' | b'!' | b'-' | b'_' | b'?' | b'=' | b'<' | b'>' | b'&' | b'$' | b'%')
}

fn is_symbol_char(b: u8) -> bool {
    is_symbol_start(b) || b.is_ascii_digit() || b == b'/' || b == b'\''
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_atoms() {
        assert_eq!(parse("nil").unwrap(), Value::Nil);
        assert_eq!(parse("true").unwrap(), Value::Bool(true));
        assert_eq!(parse("false").unwrap(), Value::Bool(false));
        assert_eq!(parse("42").unwrap(), Value::Int(42));
        assert_eq!(parse("-7").unwrap(), Value::Int(-7));
        assert_eq!(parse(":dc").unwrap(), Value::Keyword("dc".into()));
        assert_eq!(parse(":ns/name").unwrap(), Value::Keyword("ns/name".into()));
        assert_eq!(parse("eq").unwrap(), Value::Symbol("eq".into()));
        assert_eq!(parse("\"hi\"").unwrap(), Value::String("hi".into()));
    }

    #[test]
    fn parse_string_escapes() {
        assert_eq!(
            parse(r#""a\"b\\c\nd""#).unwrap(),
            Value::String("a\"b\\c\nd".into())
        );
    }

    #[test]
    fn parse_collections() {
        assert_eq!(
            parse("(and :a \"b\")").unwrap(),
            Value::List(vec![
                Value::Symbol("and".into()),
                Value::Keyword("a".into()),
                Value::String("b".into()),
            ])
        );
        assert_eq!(
            parse("[1 2 3]").unwrap(),
            Value::Vector(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
        assert_eq!(
            parse("#{:a :b}").unwrap(),
            Value::Set(vec![Value::Keyword("a".into()), Value::Keyword("b".into())])
        );
    }

    #[test]
    fn parse_map_preserves_order() {
        let v = parse("{:b 1 :a 2}").unwrap();
        assert_eq!(
            v,
            Value::Map(vec![
                (Value::Keyword("b".into()), Value::Int(1)),
                (Value::Keyword("a".into()), Value::Int(2)),
            ])
        );
    }

    #[test]
    fn parse_commas_and_comments() {
        let v = parse("{:a 1, :b 2} ; trailing\n").unwrap();
        assert_eq!(
            v.get("a").unwrap(),
            &Value::Int(1),
        );
        assert_eq!(v.get("b").unwrap(), &Value::Int(2));
    }

    #[test]
    fn parse_tagged_literal() {
        assert_eq!(
            parse("#condo/watcher \"cfg\"").unwrap(),
            Value::tagged("condo/watcher", Value::string("cfg"))
        );
    }

    #[test]
    fn parse_nested() {
        let v = parse("{:matcher (eq :dc \"eu\") :services {:app {:image \"web:1\"}}}").unwrap();
        assert!(v.get("matcher").is_some());
        assert!(v.get("services").unwrap().get("app").is_some());
    }

    #[test]
    fn parse_errors_carry_positions() {
        let err = parse("{:a}").unwrap_err();
        assert!(err.message.contains("odd number"));

        let err = parse("(1 2").unwrap_err();
        assert!(err.message.contains("unterminated"));

        let err = parse("").unwrap_err();
        assert_eq!(err.pos, 0);

        let err = parse("1 2").unwrap_err();
        assert!(err.message.contains("trailing"));
    }

    #[test]
    fn parse_odd_map_rejected() {
        assert!(parse("{:a 1 :b}").is_err());
    }

    #[test]
    fn printer_round_trips() {
        for text in [
            "nil",
            "true",
            "42",
            ":dc",
            "\"a b\"",
            "(and (eq :dc \"eu\") (not (eq :role \"db\")))",
            "{:a [1 2] :b #{:x}}",
            "#condo/watcher \"cfg\"",
        ] {
            let v = parse(text).unwrap();
            assert_eq!(parse(&v.to_string()).unwrap(), v, "round trip of {text}");
        }
    }
}
