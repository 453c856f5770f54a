//! The S-expression reference codec.
//!
//! Compounds are parenthesised and space-separated. Booleans are the
//! single bytes `T`/`F`, strings and chars are double-quoted (embedded
//! double quotes are not escaped: a value that needs them should travel
//! through a binary format instead). `null` is the literal four bytes,
//! probed by peeking them plus the byte at offset 4. With
//! `list_prefix_length` (the default) lists are prefixed by a decimal
//! element count and a separator byte; without it they are terminated by
//! the closing parenthesis.

use crate::codec::{Des, ListOpener, Ser};
use crate::desser::Error;
use crate::expr::{Binary, Expr, GenCtx, Quaternary, Type, Unary};
use crate::schema::{Mn, Path, ValueType};

/// Configuration shared by the serializer and the deserializer.
#[derive(Debug, Clone)]
pub struct Config {
    /// Prefix lists with a decimal element count and a separator byte.
    pub list_prefix_length: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            list_prefix_length: true,
        }
    }
}

const OPTIONS: &[(&str, &str)] = &[(
    "list_prefix_length",
    "prefix lists with a decimal element count and a separator byte (default: on)",
)];

/// Advance one byte without looking at it.
fn skip(src: Expr, count: usize) -> Expr {
    Expr::data_ptr_add(src, Expr::size(count))
}

fn write_ascii(dst: Expr, byte: u8) -> Expr {
    Expr::write_byte(dst, Expr::byte(byte))
}

/// Write the decimal form of an integer value.
fn write_int(dst: Expr, value: Expr) -> Expr {
    Expr::write_bytes(
        dst,
        Expr::unary(Unary::BytesOfString, Expr::unary(Unary::StringOfInt, value)),
    )
}

/// Collect bytes up to the next space or closing parenthesis (or the end
/// of input) into a string, then parse it with `parse`. Yields
/// `Pair(value, ptr)`.
fn read_token(parse: Unary, src: Expr, ctx: &mut GenCtx) -> Expr {
    let cond_fid = ctx.fresh_fid();
    let byte = Expr::param(cond_fid, 0);
    let cond = Expr::func(
        cond_fid,
        vec![Type::Byte],
        Expr::and(
            Expr::binary(Binary::Ne, byte.clone(), Expr::byte(b' ')),
            Expr::binary(Binary::Ne, byte, Expr::byte(b')')),
        ),
    );
    let reduce_fid = ctx.fresh_fid();
    let reduce = Expr::func(
        reduce_fid,
        vec![Type::string(), Type::Byte],
        Expr::binary(
            Binary::AppendString,
            Expr::param(reduce_fid, 0),
            Expr::unary(
                Unary::StringOfChar,
                Expr::unary(
                    Unary::CharOfU8,
                    Expr::unary(Unary::U8OfByte, Expr::param(reduce_fid, 1)),
                ),
            ),
        ),
    );
    let token = Expr::quaternary(Quaternary::ReadWhile, cond, reduce, Expr::string(""), src);
    let name = ctx.gensym("tok");
    let id = Expr::ident(name.clone());
    Expr::let_(
        name,
        token,
        Expr::pair(
            Expr::unary(parse, Expr::fst(id.clone())),
            Expr::snd(id),
        ),
    )
}

/// The serializer half.
#[derive(Debug, Default)]
pub struct SExprSer {
    conf: Config,
}

impl SExprSer {
    pub fn new(conf: Config) -> SExprSer {
        SExprSer { conf }
    }

    fn int_writer(&self, value: Expr, dst: Expr) -> Expr {
        write_int(dst, value)
    }
}

macro_rules! sexpr_int_writers {
    ($($method:ident),+ $(,)?) => {
        $(fn $method(
            &mut self,
            _mn: &Mn,
            _path: &Path,
            value: Expr,
            dst: Expr,
            _ctx: &mut GenCtx,
        ) -> Expr {
            self.int_writer(value, dst)
        })+
    };
}

impl Ser for SExprSer {
    fn name(&self) -> &'static str {
        "s-expression"
    }

    fn ptr(&self, _mn: &Mn) -> Type {
        Type::DataPtr
    }

    fn options(&self) -> &'static [(&'static str, &'static str)] {
        OPTIONS
    }

    fn start(&mut self, _mn: &Mn, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        dst
    }

    fn stop(&mut self, _mn: &Mn, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        dst
    }

    sexpr_int_writers!(
        su8, su16, su24, su32, su40, su48, su56, su64, su128, si8, si16, si24, si32, si40,
        si48, si56, si64, si128,
    );

    fn sfloat(&mut self, _mn: &Mn, _path: &Path, value: Expr, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        Expr::write_bytes(
            dst,
            Expr::unary(
                Unary::BytesOfString,
                Expr::unary(Unary::StringOfFloat, value),
            ),
        )
    }

    fn sstring(&mut self, _mn: &Mn, _path: &Path, value: Expr, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        let dst = write_ascii(dst, b'"');
        let dst = Expr::write_bytes(dst, Expr::unary(Unary::BytesOfString, value));
        write_ascii(dst, b'"')
    }

    fn sbool(&mut self, _mn: &Mn, _path: &Path, value: Expr, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        Expr::write_byte(
            dst,
            Expr::choose(value, Expr::byte(b'T'), Expr::byte(b'F')),
        )
    }

    fn schar(&mut self, _mn: &Mn, _path: &Path, value: Expr, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        let dst = write_ascii(dst, b'"');
        let dst = Expr::write_byte(
            dst,
            Expr::unary(Unary::ByteOfU8, Expr::unary(Unary::U8OfChar, value)),
        );
        write_ascii(dst, b'"')
    }

    fn tup_opn(&mut self, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        write_ascii(dst, b'(')
    }

    fn tup_cls(&mut self, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        write_ascii(dst, b')')
    }

    fn tup_sep(&mut self, _index: usize, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        write_ascii(dst, b' ')
    }

    fn rec_opn(&mut self, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        write_ascii(dst, b'(')
    }

    fn rec_cls(&mut self, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        write_ascii(dst, b')')
    }

    fn rec_sep(&mut self, _name: &str, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        write_ascii(dst, b' ')
    }

    fn vec_opn(&mut self, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        write_ascii(dst, b'(')
    }

    fn vec_cls(&mut self, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        write_ascii(dst, b')')
    }

    fn vec_sep(&mut self, _index: usize, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        write_ascii(dst, b' ')
    }

    fn list_opn(
        &mut self,
        _mn: &Mn,
        _path: &Path,
        _item: &Mn,
        count: Option<Expr>,
        dst: Expr,
        _ctx: &mut GenCtx,
    ) -> Result<Expr, Error> {
        if !self.conf.list_prefix_length {
            return Ok(write_ascii(dst, b'('));
        }
        match count {
            Some(count) => {
                let dst = write_int(dst, count);
                let dst = write_ascii(dst, b' ');
                Ok(write_ascii(dst, b'('))
            }
            None => Err(Error::CountRequired(self.name())),
        }
    }

    fn list_cls(&mut self, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        write_ascii(dst, b')')
    }

    fn list_sep(&mut self, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        write_ascii(dst, b' ')
    }

    fn sum_opn(&mut self, label: Expr, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        let dst = write_ascii(dst, b'(');
        let dst = write_int(dst, label);
        write_ascii(dst, b' ')
    }

    fn sum_cls(&mut self, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        write_ascii(dst, b')')
    }

    fn nullable(&mut self, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        dst
    }

    fn snull(&mut self, _vtype: &ValueType, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        Expr::write_bytes(
            dst,
            Expr::unary(Unary::BytesOfString, Expr::string("null")),
        )
    }

    fn snotnull(&mut self, _vtype: &ValueType, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        dst
    }

    // No `ssize_of`: the textual form of a value is not predictable
    // without rendering it, so pre-sizing is left unsupported.
}

/// The deserializer half.
#[derive(Debug, Default)]
pub struct SExprDes {
    conf: Config,
}

impl SExprDes {
    pub fn new(conf: Config) -> SExprDes {
        SExprDes { conf }
    }
}

macro_rules! sexpr_int_readers {
    ($($method:ident: $parse:ident),+ $(,)?) => {
        $(fn $method(&mut self, _mn: &Mn, _path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr {
            read_token(Unary::$parse, src, ctx)
        })+
    };
}

impl Des for SExprDes {
    fn name(&self) -> &'static str {
        "s-expression"
    }

    fn ptr(&self, _mn: &Mn) -> Type {
        Type::DataPtr
    }

    fn options(&self) -> &'static [(&'static str, &'static str)] {
        OPTIONS
    }

    fn start(&mut self, _mn: &Mn, src: Expr, _ctx: &mut GenCtx) -> Expr {
        src
    }

    fn stop(&mut self, _mn: &Mn, src: Expr, _ctx: &mut GenCtx) -> Expr {
        src
    }

    sexpr_int_readers!(
        du8: U8OfString,
        du16: U16OfString,
        du24: U24OfString,
        du32: U32OfString,
        du40: U40OfString,
        du48: U48OfString,
        du56: U56OfString,
        du64: U64OfString,
        du128: U128OfString,
        di8: I8OfString,
        di16: I16OfString,
        di24: I24OfString,
        di32: I32OfString,
        di40: I40OfString,
        di48: I48OfString,
        di56: I56OfString,
        di64: I64OfString,
        di128: I128OfString,
    );

    fn dfloat(&mut self, _mn: &Mn, _path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr {
        read_token(Unary::FloatOfString, src, ctx)
    }

    fn dstring(&mut self, _mn: &Mn, _path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr {
        let cond_fid = ctx.fresh_fid();
        let cond = Expr::func(
            cond_fid,
            vec![Type::Byte],
            Expr::binary(Binary::Ne, Expr::param(cond_fid, 0), Expr::byte(b'"')),
        );
        let reduce_fid = ctx.fresh_fid();
        let reduce = Expr::func(
            reduce_fid,
            vec![Type::string(), Type::Byte],
            Expr::binary(
                Binary::AppendString,
                Expr::param(reduce_fid, 0),
                Expr::unary(
                    Unary::StringOfChar,
                    Expr::unary(
                        Unary::CharOfU8,
                        Expr::unary(Unary::U8OfByte, Expr::param(reduce_fid, 1)),
                    ),
                ),
            ),
        );
        let body = Expr::quaternary(
            Quaternary::ReadWhile,
            cond,
            reduce,
            Expr::string(""),
            skip(src, 1),
        );
        let name = ctx.gensym("str");
        let id = Expr::ident(name.clone());
        Expr::let_(
            name,
            body,
            Expr::pair(Expr::fst(id.clone()), skip(Expr::snd(id), 1)),
        )
    }

    fn dbool(&mut self, _mn: &Mn, _path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr {
        let name = ctx.gensym("b");
        let id = Expr::ident(name.clone());
        Expr::let_(
            name,
            Expr::read_byte(src),
            Expr::pair(
                Expr::eq(Expr::fst(id.clone()), Expr::byte(b'T')),
                Expr::snd(id),
            ),
        )
    }

    fn dchar(&mut self, _mn: &Mn, _path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr {
        let name = ctx.gensym("c");
        let id = Expr::ident(name.clone());
        Expr::let_(
            name,
            Expr::read_byte(skip(src, 1)),
            Expr::pair(
                Expr::unary(
                    Unary::CharOfU8,
                    Expr::unary(Unary::U8OfByte, Expr::fst(id.clone())),
                ),
                skip(Expr::snd(id), 1),
            ),
        )
    }

    fn tup_opn(&mut self, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        skip(src, 1)
    }

    fn tup_cls(&mut self, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        skip(src, 1)
    }

    fn tup_sep(&mut self, _index: usize, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        skip(src, 1)
    }

    fn rec_opn(&mut self, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        skip(src, 1)
    }

    fn rec_cls(&mut self, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        skip(src, 1)
    }

    fn rec_sep(&mut self, _name: &str, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        skip(src, 1)
    }

    fn vec_opn(&mut self, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        skip(src, 1)
    }

    fn vec_cls(&mut self, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        skip(src, 1)
    }

    fn vec_sep(&mut self, _index: usize, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        skip(src, 1)
    }

    fn list_opn(&self) -> ListOpener {
        if self.conf.list_prefix_length {
            ListOpener::KnownSize
        } else {
            ListOpener::UnknownSize
        }
    }

    fn list_opn_known(
        &mut self,
        _mn: &Mn,
        _path: &Path,
        _item: &Mn,
        src: Expr,
        ctx: &mut GenCtx,
    ) -> Expr {
        // Count, separator byte, opening parenthesis.
        let name = ctx.gensym("n");
        let id = Expr::ident(name.clone());
        Expr::let_(
            name,
            read_token(Unary::U32OfString, src, ctx),
            Expr::pair(Expr::fst(id.clone()), skip(Expr::snd(id), 2)),
        )
    }

    fn list_opn_unknown(
        &mut self,
        _mn: &Mn,
        _path: &Path,
        _item: &Mn,
        src: Expr,
        _ctx: &mut GenCtx,
    ) -> Expr {
        skip(src, 1)
    }

    fn is_end_of_list(&mut self, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        Expr::eq(Expr::peek_byte(src, Expr::size(0)), Expr::byte(b')'))
    }

    fn list_cls(&mut self, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        skip(src, 1)
    }

    fn list_sep(&mut self, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        skip(src, 1)
    }

    fn sum_opn(&mut self, _mn: &Mn, _path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr {
        let name = ctx.gensym("lbl");
        let id = Expr::ident(name.clone());
        Expr::let_(
            name,
            read_token(Unary::U16OfString, skip(src, 1), ctx),
            Expr::pair(Expr::fst(id.clone()), skip(Expr::snd(id), 1)),
        )
    }

    fn sum_cls(&mut self, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        skip(src, 1)
    }

    fn is_null(&mut self, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        // Peek the four bytes of `null`, then require the byte at offset 4
        // to be absent, a space, or a closing parenthesis.
        let head = Expr::and(
            Expr::ge(Expr::unary(Unary::RemSize, src.clone()), Expr::size(4)),
            Expr::and(
                Expr::eq(Expr::peek_byte(src.clone(), Expr::size(0)), Expr::byte(b'n')),
                Expr::and(
                    Expr::eq(Expr::peek_byte(src.clone(), Expr::size(1)), Expr::byte(b'u')),
                    Expr::and(
                        Expr::eq(Expr::peek_byte(src.clone(), Expr::size(2)), Expr::byte(b'l')),
                        Expr::eq(Expr::peek_byte(src.clone(), Expr::size(3)), Expr::byte(b'l')),
                    ),
                ),
            ),
        );
        let tail = Expr::or(
            Expr::eq(Expr::unary(Unary::RemSize, src.clone()), Expr::size(4)),
            Expr::or(
                Expr::eq(Expr::peek_byte(src.clone(), Expr::size(4)), Expr::byte(b' ')),
                Expr::eq(Expr::peek_byte(src, Expr::size(4)), Expr::byte(b')')),
            ),
        );
        Expr::and(head, tail)
    }

    fn dnull(&mut self, _vtype: &ValueType, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        skip(src, 4)
    }

    fn dnotnull(&mut self, _vtype: &ValueType, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        src
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desser::desser;
    use crate::expr::eval::{self, DataPtr, Env, RtVal};
    use crate::schema::parser::parse;

    /// Run an S-expression to S-expression copy and return the output
    /// bytes.
    fn transcode(schema: &str, input: &[u8]) -> Vec<u8> {
        let mn = parse(0, schema).unwrap();
        let mut ctx = GenCtx::new();
        let mut des = SExprDes::default();
        let mut ser = SExprSer::default();
        let expr = desser(
            &mut des,
            &mut ser,
            &mn,
            Expr::ident("src"),
            Expr::ident("dst"),
            &mut ctx,
        )
        .unwrap();

        let mut env = Env::new();
        env.bind("src", RtVal::DataPtr(DataPtr::of_bytes(input.to_vec())));
        env.bind("dst", RtVal::DataPtr(DataPtr::of_bytes(Vec::new())));
        let result = eval::eval(&mut env, &expr)
            .unwrap_or_else(|err| panic!("eval failed for {}: {}", schema, err));
        let (_, dst) = result.into_pair().unwrap();
        dst.into_data_ptr().unwrap().bytes()
    }

    #[test]
    fn smallest_schema() {
        assert_eq!(transcode("u8", b"0"), b"0");
        assert_eq!(transcode("u8", b"255"), b"255");
    }

    #[test]
    fn empty_prefixed_list() {
        assert_eq!(transcode("u8[]", b"0 ()"), b"0 ()");
        assert_eq!(transcode("u8[]", b"3 (1 2 3)"), b"3 (1 2 3)");
    }

    #[test]
    fn null_record_field() {
        assert_eq!(transcode("{a: u8; b: string?}", b"(42 null)"), b"(42 null)");
        assert_eq!(
            transcode("{a: u8; b: string?}", b"(42 \"hi\")"),
            b"(42 \"hi\")"
        );
    }

    #[test]
    fn char_vector() {
        assert_eq!(transcode("char[2]", b"(\"a\" \"b\")"), b"(\"a\" \"b\")");
    }

    #[test]
    fn booleans_and_floats() {
        assert_eq!(transcode("(bool; float)", b"(T 1.5)"), b"(T 1.5)");
        assert_eq!(transcode("bool", b"F"), b"F");
    }

    #[test]
    fn wide_integers() {
        let huge = b"85070591730234615865843651857942052864";
        assert_eq!(transcode("u128", huge), huge.to_vec());
        assert_eq!(
            transcode("i128", b"-85070591730234615865843651857942052864"),
            b"-85070591730234615865843651857942052864".to_vec()
        );
    }

    #[test]
    fn unprefixed_lists_are_terminated() {
        let conf = Config {
            list_prefix_length: false,
        };
        let mn = parse(0, "u8[]").unwrap();
        let mut ctx = GenCtx::new();
        let mut des = SExprDes::new(conf.clone());
        let mut ser = SExprSer::new(conf);
        let expr = desser(
            &mut des,
            &mut ser,
            &mn,
            Expr::ident("src"),
            Expr::ident("dst"),
            &mut ctx,
        )
        .unwrap();
        let mut env = Env::new();
        env.bind("src", RtVal::DataPtr(DataPtr::of_bytes(b"(1 2)".to_vec())));
        env.bind("dst", RtVal::DataPtr(DataPtr::of_bytes(Vec::new())));
        let result = eval::eval(&mut env, &expr).unwrap();
        let (_, dst) = result.into_pair().unwrap();
        assert_eq!(dst.into_data_ptr().unwrap().bytes(), b"(1 2)");
    }

    #[test]
    fn prefixed_serializer_requires_a_count() {
        // An unknown-size reader paired with a count-demanding writer must
        // fail fast at generation time.
        let mn = parse(0, "u8[]").unwrap();
        let mut ctx = GenCtx::new();
        let mut des = SExprDes::new(Config {
            list_prefix_length: false,
        });
        let mut ser = SExprSer::default();
        let result = desser(
            &mut des,
            &mut ser,
            &mn,
            Expr::ident("src"),
            Expr::ident("dst"),
            &mut ctx,
        );
        assert_eq!(result, Err(Error::CountRequired("s-expression")));
    }
}
