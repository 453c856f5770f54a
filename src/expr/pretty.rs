//! Pretty printer for the expression IR.
//!
//! One constructor tag per parenthesised form, operands following. The
//! output re-parses to the same expression; it is a debugging format, not a
//! stable wire format.

use pretty::RcDoc;

use crate::expr::{Binary, Expr, Nullary, Unary};

/// Render width used by the `Display` impl.
pub const WIDTH: usize = 100;

const INDENT: isize = 2;

/// Escape a string for the quoted form.
pub fn escape(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    for c in src.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

fn quoted(src: &str) -> RcDoc<'static> {
    RcDoc::text(format!("\"{}\"", escape(src)))
}

fn form<'a>(tag: &'a str, operands: Vec<RcDoc<'a>>) -> RcDoc<'a> {
    let mut doc = RcDoc::text("(").append(tag);
    for operand in operands {
        doc = doc.append(RcDoc::line()).append(operand);
    }
    doc.append(")").nest(INDENT).group()
}

pub fn expr(e: &Expr) -> RcDoc<'static> {
    match e {
        Expr::Nullary(n) => nullary(n),
        Expr::Unary(op, operand) => {
            let mut operands = unary_payload(op);
            operands.push(expr(operand));
            form(op.tag(), operands)
        }
        Expr::Binary(op, first, second) => {
            let mut operands = binary_payload(op);
            operands.push(expr(first));
            operands.push(expr(second));
            form(op.tag(), operands)
        }
        Expr::Ternary(op, e0, e1, e2) => form(op.tag(), vec![expr(e0), expr(e1), expr(e2)]),
        Expr::Quaternary(op, e0, e1, e2, e3) => {
            form(op.tag(), vec![expr(e0), expr(e1), expr(e2), expr(e3)])
        }
        Expr::Seq(exprs) => form("seq", exprs.iter().map(expr).collect()),
        Expr::Function(fid, params, body) => {
            let params = RcDoc::text("(")
                .append(RcDoc::intersperse(
                    params.iter().map(|param| quoted(&param.to_string())),
                    RcDoc::line(),
                ))
                .append(")")
                .group();
            form("fun", vec![RcDoc::text(fid.to_string()), params, expr(body)])
        }
    }
}

/// Extra atoms carried by a unary operator, before its operand.
fn unary_payload(op: &Unary) -> Vec<RcDoc<'static>> {
    use Unary::*;
    match op {
        ReadWord(endianness) | ReadDWord(endianness) | ReadQWord(endianness)
        | ReadOWord(endianness) | PeekWord(endianness) | PeekDWord(endianness)
        | PeekQWord(endianness) | PeekOWord(endianness) => {
            vec![RcDoc::text(endianness.tag())]
        }
        GetField(path) | FieldIsNull(path) | SetFieldNull(path) | ListBegin(path)
        | ListNext(path) | ListEnd(path) => vec![quoted(&path.to_string())],
        _ => Vec::new(),
    }
}

/// Extra atoms carried by a binary operator, before its operands.
fn binary_payload(op: &Binary) -> Vec<RcDoc<'static>> {
    use Binary::*;
    match op {
        WriteWord(endianness) | WriteDWord(endianness) | WriteQWord(endianness)
        | WriteOWord(endianness) => vec![RcDoc::text(endianness.tag())],
        Let(name) => vec![quoted(name)],
        SetField(path) => vec![quoted(&path.to_string())],
        _ => Vec::new(),
    }
}

fn nullary(n: &Nullary) -> RcDoc<'static> {
    use Nullary::*;
    match n {
        Param(fid, index) => form(
            "param",
            vec![
                RcDoc::text(fid.to_string()),
                RcDoc::text(index.to_string()),
            ],
        ),
        Identifier(name) => form("identifier", vec![quoted(name)]),
        Null(vtype) => form("null", vec![quoted(&vtype.to_string())]),
        Bool(value) => form("bool", vec![RcDoc::text(value.to_string())]),
        Char(value) => form("char", vec![quoted(&value.to_string())]),
        Float(value) => form("float", vec![RcDoc::text(format!("{:?}", value))]),
        String(value) => form("string", vec![quoted(value)]),
        U8(value) => form("u8", vec![RcDoc::text(value.to_string())]),
        U16(value) => form("u16", vec![RcDoc::text(value.to_string())]),
        U24(value) => form("u24", vec![RcDoc::text(value.to_string())]),
        U32(value) => form("u32", vec![RcDoc::text(value.to_string())]),
        U40(value) => form("u40", vec![RcDoc::text(value.to_string())]),
        U48(value) => form("u48", vec![RcDoc::text(value.to_string())]),
        U56(value) => form("u56", vec![RcDoc::text(value.to_string())]),
        U64(value) => form("u64", vec![RcDoc::text(value.to_string())]),
        U128(value) => form("u128", vec![RcDoc::text(value.to_string())]),
        I8(value) => form("i8", vec![RcDoc::text(value.to_string())]),
        I16(value) => form("i16", vec![RcDoc::text(value.to_string())]),
        I24(value) => form("i24", vec![RcDoc::text(value.to_string())]),
        I32(value) => form("i32", vec![RcDoc::text(value.to_string())]),
        I40(value) => form("i40", vec![RcDoc::text(value.to_string())]),
        I48(value) => form("i48", vec![RcDoc::text(value.to_string())]),
        I56(value) => form("i56", vec![RcDoc::text(value.to_string())]),
        I64(value) => form("i64", vec![RcDoc::text(value.to_string())]),
        I128(value) => form("i128", vec![RcDoc::text(value.to_string())]),
        Bit(value) => form("bit", vec![RcDoc::text(value.to_string())]),
        Byte(value) => form("byte", vec![RcDoc::text(value.to_string())]),
        Word(value) => form("word", vec![RcDoc::text(value.to_string())]),
        DWord(value) => form("dword", vec![RcDoc::text(value.to_string())]),
        QWord(value) => form("qword", vec![RcDoc::text(value.to_string())]),
        OWord(value) => form("oword", vec![RcDoc::text(value.to_string())]),
        Size(value) => form("size", vec![RcDoc::text(value.to_string())]),
        AllocValue(mn) => form("alloc-value", vec![quoted(&mn.to_string())]),
    }
}

/// Render an expression to a string.
pub fn expr_to_string(e: &Expr) -> String {
    expr(e).pretty(WIDTH).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;

    #[test]
    fn constants_print_flat() {
        assert_eq!(expr_to_string(&Expr::u8(42)), "(u8 42)");
        assert_eq!(expr_to_string(&Expr::string("a\"b")), "(string \"a\\\"b\")");
    }

    #[test]
    fn nested_forms() {
        let e = Expr::pair(Expr::u8(1), Expr::fst(Expr::ident("p")));
        assert_eq!(
            expr_to_string(&e),
            "(pair (u8 1) (fst (identifier \"p\")))"
        );
    }

    #[test]
    fn payload_atoms_come_first() {
        use crate::expr::{Endianness, Unary};
        let e = Expr::unary(Unary::ReadWord(Endianness::Little), Expr::ident("p"));
        assert_eq!(expr_to_string(&e), "(read-word le (identifier \"p\"))");
    }
}
