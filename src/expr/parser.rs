//! Parser for the textual form of the expression IR.
//!
//! Accepts everything the printer emits: `parse(print(e)) == e` for
//! well-typed expressions.

use logos::Logos;

use crate::expr::{Binary, Endianness, Expr, Nullary, Quaternary, Ternary, Type, Unary};
use crate::literal;
use crate::reporting::{LexerMessage, Message, ParseMessage};
use crate::schema;
use crate::source::{FileId, Range};

#[derive(Clone, Debug, PartialEq, Logos)]
enum Token<'source> {
    #[token("(")]
    OpenParen,
    #[token(")")]
    CloseParen,
    /// Tags, numbers, endianness markers and booleans.
    #[regex(r"[a-zA-Z0-9_.+\-]+")]
    Atom(&'source str),
    #[regex(r#""([^"\\]|\\.)*""#, |lex| &lex.slice()[1..(lex.slice().len() - 1)])]
    String(&'source str),

    #[error]
    #[regex(r"[ \t\r\n]+", logos::skip)]
    Error,
}

impl<'source> Token<'source> {
    fn description(&self) -> String {
        match self {
            Token::OpenParen => "(".to_owned(),
            Token::CloseParen => ")".to_owned(),
            Token::Atom(atom) => (*atom).to_owned(),
            Token::String(string) => format!("\"{}\"", string),
            Token::Error => "<error>".to_owned(),
        }
    }
}

/// Undo the printer's escaping.
fn unescape(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let mut chars = src.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(c) => out.push(c),
            None => out.push('\\'),
        }
    }
    out
}

/// Parse the textual form of an IR type: either one of the low-level
/// keywords or a schema type.
pub fn parse_type(file_id: FileId, src: &str) -> Result<Type, Message> {
    let src = src.trim();
    match src {
        "void" => return Ok(Type::Void),
        "dataptr" => return Ok(Type::DataPtr),
        "size" => return Ok(Type::Size),
        "bit" => return Ok(Type::Bit),
        "byte" => return Ok(Type::Byte),
        "word" => return Ok(Type::Word),
        "dword" => return Ok(Type::DWord),
        "qword" => return Ok(Type::QWord),
        "oword" => return Ok(Type::OWord),
        "bytes" => return Ok(Type::Bytes),
        _ => {}
    }
    if let Some(inner) = delimited(src, "valueptr(", ")") {
        return Ok(Type::ValuePtr(schema::parser::parse(file_id, inner)?));
    }
    if let Some(inner) = delimited(src, "pair(", ")") {
        let (first, second) = split_top_level(inner).ok_or_else(|| bad_type(file_id, src))?;
        return Ok(Type::pair(
            parse_type(file_id, first)?,
            parse_type(file_id, second)?,
        ));
    }
    if let Some(rest) = src.strip_prefix("fun(") {
        let close = matching_paren(rest).ok_or_else(|| bad_type(file_id, src))?;
        let params = &rest[..close];
        let result = rest[close + 1..]
            .trim()
            .strip_prefix("->")
            .ok_or_else(|| bad_type(file_id, src))?;
        let params = split_all_top_level(params)
            .into_iter()
            .map(|param| parse_type(file_id, param))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Type::function(params, parse_type(file_id, result)?));
    }
    Ok(Type::Value(schema::parser::parse(file_id, src)?))
}

fn bad_type(file_id: FileId, src: &str) -> Message {
    ParseMessage::UnexpectedToken {
        file_id,
        range: Range {
            start: 0,
            end: src.len(),
        },
        found: src.to_owned(),
        expected: "an IR type",
    }
    .into()
}

fn delimited<'a>(src: &'a str, prefix: &str, suffix: &str) -> Option<&'a str> {
    src.strip_prefix(prefix)?.strip_suffix(suffix)
}

/// Offset of the `)` matching the start of `src` (which follows a `(`).
fn matching_paren(src: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, byte) in src.bytes().enumerate() {
        match byte {
            b'(' | b'{' | b'[' => depth += 1,
            b')' if depth == 0 => return Some(offset),
            b')' | b'}' | b']' => depth -= 1,
            _ => {}
        }
    }
    None
}

/// Split `first; second` at the single top-level semicolon.
fn split_top_level(src: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    for (offset, byte) in src.bytes().enumerate() {
        match byte {
            b'(' | b'{' | b'[' => depth += 1,
            b')' | b'}' | b']' => depth -= 1,
            b';' if depth == 0 => return Some((&src[..offset], &src[offset + 1..])),
            _ => {}
        }
    }
    None
}

fn split_all_top_level(src: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = src;
    while let Some((first, second)) = split_top_level(rest) {
        parts.push(first);
        rest = second;
    }
    if !rest.trim().is_empty() {
        parts.push(rest);
    }
    parts
}

/// Parse the textual form of an expression.
pub fn parse(file_id: FileId, source: &str) -> Result<Expr, Message> {
    let tokens = Token::lexer(source)
        .spanned()
        .map(|(token, range)| match token {
            Token::Error => Err(LexerMessage::UnexpectedCharacter {
                file_id,
                range: range.into(),
            }),
            token => Ok((token, Range::from(range))),
        })
        .collect::<Result<Vec<_>, _>>()?;
    let mut parser = Parser {
        file_id,
        tokens,
        pos: 0,
        eof: Range {
            start: source.len(),
            end: source.len(),
        },
    };
    let expr = parser.parse_expr()?;
    match parser.tokens.get(parser.pos) {
        None => Ok(expr),
        Some((token, range)) => Err(ParseMessage::ExtraToken {
            file_id,
            range: *range,
            found: token.description(),
        }
        .into()),
    }
}

/// Payload-less unary operators, for tag lookup.
const SIMPLE_UNARY: &[Unary] = {
    use Unary::*;
    &[
        Dump,
        Ignore,
        IsNull,
        ToNullable,
        ToNotNullable,
        Fst,
        Snd,
        StringLength,
        ListLength,
        RemSize,
        Not,
        LogNot,
        StringOfInt,
        StringOfFloat,
        StringOfChar,
        FloatOfString,
        U8OfString,
        U16OfString,
        U24OfString,
        U32OfString,
        U40OfString,
        U48OfString,
        U56OfString,
        U64OfString,
        U128OfString,
        I8OfString,
        I16OfString,
        I24OfString,
        I32OfString,
        I40OfString,
        I48OfString,
        I56OfString,
        I64OfString,
        I128OfString,
        CharOfU8,
        U8OfChar,
        BoolOfBit,
        BitOfBool,
        SizeOfU32,
        U32OfSize,
        ByteOfU8,
        U8OfByte,
        WordOfU16,
        U16OfWord,
        DWordOfU32,
        U32OfDWord,
        QWordOfU64,
        U64OfQWord,
        OWordOfU128,
        U128OfOWord,
        FloatOfQWord,
        QWordOfFloat,
        BytesOfString,
        StringOfBytes,
        ToU8,
        ToU16,
        ToU24,
        ToU32,
        ToU40,
        ToU48,
        ToU56,
        ToU64,
        ToU128,
        ToI8,
        ToI16,
        ToI24,
        ToI32,
        ToI40,
        ToI48,
        ToI56,
        ToI64,
        ToI128,
        ReadByte,
        DataPtrPush,
        DataPtrPop,
        DerefValuePtr,
    ]
};

/// Payload-less binary operators, for tag lookup.
const SIMPLE_BINARY: &[Binary] = {
    use Binary::*;
    &[
        Gt,
        Ge,
        Eq,
        Ne,
        Add,
        Sub,
        Mul,
        Div,
        Rem,
        LogAnd,
        LogOr,
        LogXor,
        LeftShift,
        RightShift,
        And,
        Or,
        AppendBytes,
        AppendString,
        TestBit,
        ReadBytes,
        PeekByte,
        WriteByte,
        WriteBytes,
        PokeByte,
        DataPtrAdd,
        DataPtrSub,
        Coalesce,
        Pair,
        MapPair,
    ]
};

const TERNARY: &[Ternary] = &[
    Ternary::SetBit,
    Ternary::BlitByte,
    Ternary::Choose,
    Ternary::LoopWhile,
    Ternary::LoopUntil,
];

const QUATERNARY: &[Quaternary] = &[Quaternary::ReadWhile, Quaternary::Repeat];

struct Parser<'source> {
    file_id: FileId,
    tokens: Vec<(Token<'source>, Range)>,
    pos: usize,
    eof: Range,
}

impl<'source> Parser<'source> {
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

    fn unexpected(&self, found: Token<'_>, range: Range, expected: &'static str) -> Message {
        ParseMessage::UnexpectedToken {
            file_id: self.file_id,
            range,
            found: found.description(),
            expected,
        }
        .into()
    }

    fn open(&mut self) -> Result<(), Message> {
        match self.next("`(`")? {
            (Token::OpenParen, _) => Ok(()),
            (token, range) => Err(self.unexpected(token, range, "`(`")),
        }
    }

    fn close(&mut self) -> Result<(), Message> {
        match self.next("`)`")? {
            (Token::CloseParen, _) => Ok(()),
            (token, range) => Err(self.unexpected(token, range, "`)`")),
        }
    }

    fn at_close(&self) -> bool {
        matches!(self.tokens.get(self.pos), Some((Token::CloseParen, _)))
    }

    fn atom(&mut self, expected: &'static str) -> Result<(&'source str, Range), Message> {
        match self.next(expected)? {
            (Token::Atom(atom), range) => Ok((atom, range)),
            (token, range) => Err(self.unexpected(token, range, expected)),
        }
    }

    fn string(&mut self, expected: &'static str) -> Result<(String, Range), Message> {
        match self.next(expected)? {
            (Token::String(string), range) => Ok((unescape(string), range)),
            (token, range) => Err(self.unexpected(token, range, expected)),
        }
    }

    fn uint(&mut self, bits: u32) -> Result<u128, Message> {
        let (atom, range) = self.atom("an unsigned integer")?;
        literal::parse_uint(atom, bits).ok_or_else(|| {
            ParseMessage::UnexpectedToken {
                file_id: self.file_id,
                range,
                found: atom.to_owned(),
                expected: "an unsigned integer",
            }
            .into()
        })
    }

    fn int(&mut self, bits: u32) -> Result<i128, Message> {
        let (atom, range) = self.atom("a signed integer")?;
        literal::parse_int(atom, bits).ok_or_else(|| {
            ParseMessage::UnexpectedToken {
                file_id: self.file_id,
                range,
                found: atom.to_owned(),
                expected: "a signed integer",
            }
            .into()
        })
    }

    fn boolean(&mut self) -> Result<bool, Message> {
        let (atom, range) = self.atom("`true` or `false`")?;
        match atom {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(self.unexpected(Token::Atom(atom), range, "`true` or `false`")),
        }
    }

    fn endianness(&mut self) -> Result<Endianness, Message> {
        let (atom, range) = self.atom("`le` or `be`")?;
        match atom {
            "le" => Ok(Endianness::Little),
            "be" => Ok(Endianness::Big),
            _ => Err(self.unexpected(Token::Atom(atom), range, "`le` or `be`")),
        }
    }

    fn path(&mut self) -> Result<schema::Path, Message> {
        let (string, range) = self.string("a quoted path")?;
        string.parse().map_err(|_| {
            ParseMessage::UnexpectedToken {
                file_id: self.file_id,
                range,
                found: string.clone(),
                expected: "a path of `/`-separated indices",
            }
            .into()
        })
    }

    fn vtype(&mut self) -> Result<schema::ValueType, Message> {
        let (string, _) = self.string("a quoted value type")?;
        Ok(schema::parser::parse(self.file_id, &string)?.into_vtype())
    }

    fn mn(&mut self) -> Result<schema::Mn, Message> {
        let (string, _) = self.string("a quoted schema type")?;
        schema::parser::parse(self.file_id, &string)
    }

    fn ir_type(&mut self) -> Result<Type, Message> {
        let (string, _) = self.string("a quoted IR type")?;
        parse_type(self.file_id, &string)
    }

    fn parse_expr(&mut self) -> Result<Expr, Message> {
        self.open()?;
        let (tag, range) = self.atom("a constructor tag")?;
        let expr = self.dispatch(tag, range)?;
        self.close()?;
        Ok(expr)
    }

    fn dispatch(&mut self, tag: &'source str, range: Range) -> Result<Expr, Message> {
        use Nullary::*;

        // Constants and other leaves.
        match tag {
            "param" => {
                let fid = self.uint(32)? as u32;
                let index = self.uint(32)? as usize;
                return Ok(Expr::Nullary(Param(fid, index)));
            }
            "identifier" => return Ok(Expr::ident(self.string("a quoted name")?.0)),
            "null" => return Ok(Expr::Nullary(Null(self.vtype()?))),
            "bool" => return Ok(Expr::Nullary(Bool(self.boolean()?))),
            "char" => {
                let (string, range) = self.string("a quoted character")?;
                let mut chars = string.chars();
                return match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(Expr::Nullary(Char(c))),
                    _ => Err(self.unexpected(
                        Token::String(""),
                        range,
                        "a single-character string",
                    )),
                };
            }
            "float" => {
                let (atom, range) = self.atom("a float literal")?;
                return atom
                    .parse()
                    .map(|value| Expr::Nullary(Float(value)))
                    .map_err(|_| self.unexpected(Token::Atom(atom), range, "a float literal"));
            }
            "string" => return Ok(Expr::string(self.string("a quoted string")?.0)),
            "u8" => return Ok(Expr::Nullary(U8(self.uint(8)? as u8))),
            "u16" => return Ok(Expr::Nullary(U16(self.uint(16)? as u16))),
            "u24" => return Ok(Expr::Nullary(U24(self.uint(24)? as u32))),
            "u32" => return Ok(Expr::Nullary(U32(self.uint(32)? as u32))),
            "u40" => return Ok(Expr::Nullary(U40(self.uint(40)? as u64))),
            "u48" => return Ok(Expr::Nullary(U48(self.uint(48)? as u64))),
            "u56" => return Ok(Expr::Nullary(U56(self.uint(56)? as u64))),
            "u64" => return Ok(Expr::Nullary(U64(self.uint(64)? as u64))),
            "u128" => return Ok(Expr::Nullary(U128(self.uint(128)?))),
            "i8" => return Ok(Expr::Nullary(I8(self.int(8)? as i8))),
            "i16" => return Ok(Expr::Nullary(I16(self.int(16)? as i16))),
            "i24" => return Ok(Expr::Nullary(I24(self.int(24)? as i32))),
            "i32" => return Ok(Expr::Nullary(I32(self.int(32)? as i32))),
            "i40" => return Ok(Expr::Nullary(I40(self.int(40)? as i64))),
            "i48" => return Ok(Expr::Nullary(I48(self.int(48)? as i64))),
            "i56" => return Ok(Expr::Nullary(I56(self.int(56)? as i64))),
            "i64" => return Ok(Expr::Nullary(I64(self.int(64)? as i64))),
            "i128" => return Ok(Expr::Nullary(I128(self.int(128)?))),
            "bit" => return Ok(Expr::Nullary(Bit(self.boolean()?))),
            "byte" => return Ok(Expr::Nullary(Byte(self.uint(8)? as u8))),
            "word" => return Ok(Expr::Nullary(Word(self.uint(16)? as u16))),
            "dword" => return Ok(Expr::Nullary(DWord(self.uint(32)? as u32))),
            "qword" => return Ok(Expr::Nullary(QWord(self.uint(64)? as u64))),
            "oword" => return Ok(Expr::Nullary(OWord(self.uint(128)?))),
            "size" => return Ok(Expr::Nullary(Size(self.uint(64)? as usize))),
            "alloc-value" => return Ok(Expr::alloc_value(self.mn()?)),
            "seq" => {
                let mut exprs = Vec::new();
                while !self.at_close() {
                    exprs.push(self.parse_expr()?);
                }
                return Ok(Expr::Seq(exprs));
            }
            "fun" => {
                let fid = self.uint(32)? as u32;
                self.open()?;
                let mut params = Vec::new();
                while !self.at_close() {
                    params.push(self.ir_type()?);
                }
                self.close()?;
                let body = self.parse_expr()?;
                return Ok(Expr::func(fid, params, body));
            }
            _ => {}
        }

        // Unary operators with payloads.
        let unary = match tag {
            "read-word" => Some(Unary::ReadWord(self.endianness()?)),
            "read-dword" => Some(Unary::ReadDWord(self.endianness()?)),
            "read-qword" => Some(Unary::ReadQWord(self.endianness()?)),
            "read-oword" => Some(Unary::ReadOWord(self.endianness()?)),
            "peek-word" => Some(Unary::PeekWord(self.endianness()?)),
            "peek-dword" => Some(Unary::PeekDWord(self.endianness()?)),
            "peek-qword" => Some(Unary::PeekQWord(self.endianness()?)),
            "peek-oword" => Some(Unary::PeekOWord(self.endianness()?)),
            "get-field" => Some(Unary::GetField(self.path()?)),
            "field-is-null" => Some(Unary::FieldIsNull(self.path()?)),
            "set-field-null" => Some(Unary::SetFieldNull(self.path()?)),
            "list-begin" => Some(Unary::ListBegin(self.path()?)),
            "list-next" => Some(Unary::ListNext(self.path()?)),
            "list-end" => Some(Unary::ListEnd(self.path()?)),
            _ => SIMPLE_UNARY.iter().find(|op| op.tag() == tag).cloned(),
        };
        if let Some(op) = unary {
            return Ok(Expr::unary(op, self.parse_expr()?));
        }

        // Binary operators with payloads.
        let binary = match tag {
            "write-word" => Some(Binary::WriteWord(self.endianness()?)),
            "write-dword" => Some(Binary::WriteDWord(self.endianness()?)),
            "write-qword" => Some(Binary::WriteQWord(self.endianness()?)),
            "write-oword" => Some(Binary::WriteOWord(self.endianness()?)),
            "let" => Some(Binary::Let(self.string("a quoted name")?.0)),
            "set-field" => Some(Binary::SetField(self.path()?)),
            _ => SIMPLE_BINARY.iter().find(|op| op.tag() == tag).cloned(),
        };
        if let Some(op) = binary {
            let first = self.parse_expr()?;
            let second = self.parse_expr()?;
            return Ok(Expr::binary(op, first, second));
        }

        if let Some(op) = TERNARY.iter().find(|op| op.tag() == tag) {
            let e0 = self.parse_expr()?;
            let e1 = self.parse_expr()?;
            let e2 = self.parse_expr()?;
            return Ok(Expr::ternary(op.clone(), e0, e1, e2));
        }

        if let Some(op) = QUATERNARY.iter().find(|op| op.tag() == tag) {
            let e0 = self.parse_expr()?;
            let e1 = self.parse_expr()?;
            let e2 = self.parse_expr()?;
            let e3 = self.parse_expr()?;
            return Ok(Expr::quaternary(op.clone(), e0, e1, e2, e3));
        }

        Err(self.unexpected(Token::Atom(tag), range, "a constructor tag"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::pretty::expr_to_string;
    use crate::expr::{GenCtx, Ternary};

    fn round_trip(e: &Expr) {
        let printed = expr_to_string(e);
        let reparsed = parse(0, &printed)
            .unwrap_or_else(|err| panic!("reparse of {:?} failed: {:?}", printed, err));
        assert_eq!(*e, reparsed, "round trip via {:?}", printed);
    }

    #[test]
    fn constants_round_trip() {
        round_trip(&Expr::u8(0));
        round_trip(&Expr::Nullary(Nullary::U128(1u128 << 126)));
        round_trip(&Expr::Nullary(Nullary::I128(-(1i128 << 126))));
        round_trip(&Expr::float(1.5));
        round_trip(&Expr::float(f64::INFINITY));
        round_trip(&Expr::string("quote \" and \\ and newline\n"));
        round_trip(&Expr::char('('));
        round_trip(&Expr::null(schema::ValueType::Mac(schema::Mac::U32)));
    }

    #[test]
    fn compound_expressions_round_trip() {
        let mut ctx = GenCtx::new();
        let fid = ctx.fresh_fid();
        round_trip(&Expr::let_(
            "x",
            Expr::read_byte(Expr::ident("src")),
            Expr::pair(Expr::fst(Expr::ident("x")), Expr::snd(Expr::ident("x"))),
        ));
        round_trip(&Expr::unary(
            Unary::ReadWord(Endianness::Big),
            Expr::ident("p"),
        ));
        round_trip(&Expr::binary(
            Binary::SetField(schema::Path(vec![0, 1])),
            Expr::u8(1),
            Expr::alloc_value(schema::parser::parse(0, "(u8; u8)").unwrap()),
        ));
        round_trip(&Expr::ternary(
            Ternary::Choose,
            Expr::bool(true),
            Expr::u8(1),
            Expr::u8(2),
        ));
        round_trip(&Expr::func(
            fid,
            vec![Type::DataPtr, Type::pair(Type::u32(), Type::Byte)],
            Expr::param(fid, 1),
        ));
        round_trip(&Expr::seq(vec![
            Expr::unary(Unary::Dump, Expr::string("x")),
            Expr::u8(3),
        ]));
    }

    #[test]
    fn types_round_trip_through_their_display_form() {
        for r#type in [
            Type::Void,
            Type::DataPtr,
            Type::Bytes,
            Type::ValuePtr(schema::parser::parse(0, "{a: u8; b: string?}").unwrap()),
            Type::pair(Type::u32(), Type::pair(Type::Byte, Type::Size)),
            Type::function(vec![Type::Byte], Type::bool()),
            Type::function(
                vec![Type::pair(Type::u8(), Type::DataPtr), Type::Byte],
                Type::pair(Type::u8(), Type::DataPtr),
            ),
        ] {
            let printed = r#type.to_string();
            let reparsed = parse_type(0, &printed)
                .unwrap_or_else(|err| panic!("reparse of {:?} failed: {:?}", printed, err));
            assert_eq!(r#type, reparsed, "round trip via {:?}", printed);
        }
    }
}
