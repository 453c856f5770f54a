//! Parser for the schema grammar.
//!
//! ```text
//! mn      := vt '?'?
//! vt      := scalar | '(' mn (';' mn)+ ')' | '{' field (';' field)* '}' | user
//!            | mn '[' nat ']'            -- vector
//!            | mn '[' ']'                -- list
//!            | mn '[' mn ']'             -- map
//! field   := ident ':' mn
//! ```
//!
//! The `[…]` postfixes bind tighter than the trailing `?`, so `u8?[3]` is a
//! vector of nullable bytes and `u8[3]?` a nullable vector of bytes.

use crate::literal;
use crate::reporting::{Message, ParseMessage, SchemaMessage};
use crate::schema::lexer::{self, Token};
use crate::schema::{user, Mac, Mn, ValueType};
use crate::source::{FileId, Range};

/// Parse a schema string into a maybe-nullable type.
pub fn parse(file_id: FileId, source: &str) -> Result<Mn, Message> {
    let tokens = lexer::tokens(file_id, source).collect::<Result<Vec<_>, _>>()?;
    let mut parser = Parser {
        file_id,
        tokens,
        pos: 0,
        eof: Range {
            start: source.len(),
            end: source.len(),
        },
    };
    let mn = parser.parse_mn()?;
    match parser.tokens.get(parser.pos) {
        None => Ok(mn),
        Some((token, range)) => Err(ParseMessage::ExtraToken {
            file_id,
            range: *range,
            found: token.description(),
        }
        .into()),
    }
}

struct Parser<'source> {
    file_id: FileId,
    tokens: Vec<(Token<'source>, Range)>,
    pos: usize,
    eof: Range,
}

impl<'source> Parser<'source> {
    fn peek(&self) -> Option<&Token<'source>> {
        self.tokens.get(self.pos).map(|(token, _)| token)
    }

    fn next(&mut self, expected: &'static str) -> Result<(Token<'source>, Range), Message> {
        match self.tokens.get(self.pos) {
            Some((token, range)) => {
                self.pos += 1;
                Ok((token.clone(), *range))
            }
            None => Err(ParseMessage::UnexpectedEof {
                file_id: self.file_id,
                range: self.eof,
                expected,
            }
            .into()),
        }
    }

    fn expect(&mut self, token: Token<'static>, expected: &'static str) -> Result<Range, Message> {
        let (found, range) = self.next(expected)?;
        if found == token {
            Ok(range)
        } else {
            Err(self.unexpected(found, range, expected))
        }
    }

    fn unexpected(&self, found: Token<'_>, range: Range, expected: &'static str) -> Message {
        ParseMessage::UnexpectedToken {
            file_id: self.file_id,
            range,
            found: found.description(),
            expected,
        }
        .into()
    }

    fn parse_mn(&mut self) -> Result<Mn, Message> {
        let mut mn = Mn::NotNullable(self.parse_vtype_atom()?);
        loop {
            match self.peek() {
                Some(Token::Question) => {
                    let (_, range) = self.next("`?`")?;
                    if mn.is_nullable() {
                        return Err(self.unexpected(Token::Question, range, "a postfix or the end"));
                    }
                    mn = Mn::Nullable(mn.into_vtype());
                }
                Some(Token::OpenBracket) => {
                    self.next("`[`")?;
                    let vtype = self.parse_postfix(mn)?;
                    mn = Mn::NotNullable(vtype);
                }
                _ => return Ok(mn),
            }
        }
    }

    /// The bracketed part of a vector, list or map postfix. The opening
    /// bracket has been consumed; `item` is the type it applies to.
    fn parse_postfix(&mut self, item: Mn) -> Result<ValueType, Message> {
        match self.peek() {
            Some(Token::CloseBracket) => {
                self.next("`]`")?;
                Ok(ValueType::List(Box::new(item)))
            }
            Some(Token::Number(_)) => {
                let (token, range) = self.next("a dimension")?;
                let digits = match token {
                    Token::Number(digits) => digits,
                    _ => unreachable!("peeked a number"),
                };
                let dim = literal::parse_uint(digits, 32).ok_or(SchemaMessage::NumberOutOfRange {
                    file_id: self.file_id,
                    range,
                })?;
                if dim == 0 {
                    return Err(SchemaMessage::ZeroVectorDimension {
                        file_id: self.file_id,
                        range,
                    }
                    .into());
                }
                self.expect(Token::CloseBracket, "`]`")?;
                Ok(ValueType::Vec(dim as u32, Box::new(item)))
            }
            _ => {
                let key = self.parse_mn()?;
                self.expect(Token::CloseBracket, "`]`")?;
                Ok(ValueType::Map(Box::new(key), Box::new(item)))
            }
        }
    }

    fn parse_vtype_atom(&mut self) -> Result<ValueType, Message> {
        let (token, range) = self.next("a type")?;
        match token {
            Token::Name(name) => self.named_type(name, range),
            Token::OpenParen => {
                let mut items = vec![self.parse_mn()?];
                loop {
                    let (token, range) = self.next("`;` or `)`")?;
                    match token {
                        Token::Semicolon => items.push(self.parse_mn()?),
                        Token::CloseParen => return Ok(ValueType::Tup(items)),
                        token => return Err(self.unexpected(token, range, "`;` or `)`")),
                    }
                }
            }
            Token::OpenBrace => {
                let mut fields = vec![self.parse_field()?];
                loop {
                    let (token, range) = self.next("`;` or `}`")?;
                    match token {
                        Token::Semicolon => {
                            let (name, mn, range) = self.parse_field()?;
                            if fields.iter().any(|(other, _, _)| *other == name) {
                                return Err(SchemaMessage::DuplicateField {
                                    file_id: self.file_id,
                                    range,
                                    name,
                                }
                                .into());
                            }
                            fields.push((name, mn, range));
                        }
                        Token::CloseBrace => {
                            let fields =
                                fields.into_iter().map(|(name, mn, _)| (name, mn)).collect();
                            return Ok(ValueType::Rec(fields));
                        }
                        token => return Err(self.unexpected(token, range, "`;` or `}`")),
                    }
                }
            }
            token => Err(self.unexpected(token, range, "a type")),
        }
    }

    fn parse_field(&mut self) -> Result<(String, Mn, Range), Message> {
        let (token, range) = self.next("a field name")?;
        let name = match token {
            Token::Name(name) => name.to_owned(),
            token => return Err(self.unexpected(token, range, "a field name")),
        };
        self.expect(Token::Colon, "`:`")?;
        let mn = self.parse_mn()?;
        Ok((name, mn, range))
    }

    /// Scalar keywords (case-insensitive) or a registered user type
    /// (case-sensitive).
    fn named_type(&mut self, name: &str, range: Range) -> Result<ValueType, Message> {
        let mac = match name.to_ascii_lowercase().as_str() {
            "bool" | "boolean" => Some(Mac::Bool),
            "char" => Some(Mac::Char),
            "float" => Some(Mac::Float),
            "string" => Some(Mac::String),
            "u8" => Some(Mac::U8),
            "u16" => Some(Mac::U16),
            "u24" => Some(Mac::U24),
            "u32" => Some(Mac::U32),
            "u40" => Some(Mac::U40),
            "u48" => Some(Mac::U48),
            "u56" => Some(Mac::U56),
            "u64" => Some(Mac::U64),
            "u128" => Some(Mac::U128),
            "i8" => Some(Mac::I8),
            "i16" => Some(Mac::I16),
            "i24" => Some(Mac::I24),
            "i32" => Some(Mac::I32),
            "i40" => Some(Mac::I40),
            "i48" => Some(Mac::I48),
            "i56" => Some(Mac::I56),
            "i64" => Some(Mac::I64),
            "i128" => Some(Mac::I128),
            _ => None,
        };
        match mac {
            Some(mac) => Ok(ValueType::Mac(mac)),
            None => match user::lookup(name) {
                Some(user) => Ok(ValueType::Usr(user)),
                None => Err(SchemaMessage::UnknownUserType {
                    file_id: self.file_id,
                    range,
                    name: name.to_owned(),
                }
                .into()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Mn {
        parse(0, source).unwrap_or_else(|err| panic!("parse of {:?} failed: {:?}", source, err))
    }

    #[test]
    fn scalars() {
        assert_eq!(parse_ok("u8"), Mn::mac(Mac::U8));
        assert_eq!(parse_ok("BOOLEAN"), Mn::mac(Mac::Bool));
        assert_eq!(parse_ok("I128"), Mn::mac(Mac::I128));
        assert_eq!(
            parse_ok("string?"),
            Mn::Nullable(ValueType::Mac(Mac::String))
        );
    }

    #[test]
    fn postfix_binds_tighter_than_question() {
        assert_eq!(
            parse_ok("u8[3]?"),
            Mn::Nullable(ValueType::Vec(3, Box::new(Mn::mac(Mac::U8))))
        );
        assert_eq!(
            parse_ok("u8?[3]"),
            Mn::NotNullable(ValueType::Vec(
                3,
                Box::new(Mn::Nullable(ValueType::Mac(Mac::U8)))
            ))
        );
    }

    #[test]
    fn lists_and_maps() {
        assert_eq!(
            parse_ok("u8[]"),
            Mn::NotNullable(ValueType::List(Box::new(Mn::mac(Mac::U8))))
        );
        assert_eq!(
            parse_ok("bool[string]"),
            Mn::NotNullable(ValueType::Map(
                Box::new(Mn::mac(Mac::String)),
                Box::new(Mn::mac(Mac::Bool))
            ))
        );
    }

    #[test]
    fn tuples_and_records() {
        assert_eq!(
            parse_ok("(u8; bool)"),
            Mn::NotNullable(ValueType::Tup(vec![Mn::mac(Mac::U8), Mn::mac(Mac::Bool)]))
        );
        assert_eq!(
            parse_ok("{a: u8; b: string?}"),
            Mn::NotNullable(ValueType::Rec(vec![
                ("a".to_owned(), Mn::mac(Mac::U8)),
                ("b".to_owned(), Mn::Nullable(ValueType::Mac(Mac::String))),
            ]))
        );
    }

    #[test]
    fn field_names_are_unique() {
        assert!(matches!(
            parse(0, "{a: u8; a: u16}"),
            Err(Message::Schema(SchemaMessage::DuplicateField { .. }))
        ));
    }

    #[test]
    fn zero_dimension_is_rejected() {
        assert!(matches!(
            parse(0, "u8[0]"),
            Err(Message::Schema(SchemaMessage::ZeroVectorDimension { .. }))
        ));
    }

    #[test]
    fn double_question_is_rejected() {
        assert!(parse(0, "u8??").is_err());
    }

    #[test]
    fn deeply_nested() {
        // One of everything, nested; must parse and round-trip (see pretty).
        let source = "(u8; bool[string])[]?[string?[u8?]]";
        let mn = parse_ok(source);
        assert!(matches!(mn.vtype(), ValueType::Map(_, _)));
    }
}
