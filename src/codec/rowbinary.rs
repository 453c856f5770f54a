//! The RowBinary codec.
//!
//! Fixed-width scalars are little-endian; the odd widths are packed to
//! their byte count. String and list lengths travel as LEB128 varints.
//! Nullables carry a marker byte (1 for null, 0 for a present value).
//! Compounds have no framing at all. This codec implements `ssize_of`, so
//! pre-sized buffers can be used with it.

use crate::codec::{Des, ListOpener, Ser, SSize};
use crate::desser::Error;
use crate::expr::{Binary, Endianness, Expr, GenCtx, Quaternary, Ternary, Type, Unary};
use crate::schema::path::type_of_path;
use crate::schema::{Mac, Mn, Path, ValueType};

const LE: Endianness = Endianness::Little;

/// Widening conversion into the given integer width.
const fn widen(mac: Mac) -> Unary {
    match mac {
        Mac::U8 => Unary::ToU8,
        Mac::U16 => Unary::ToU16,
        Mac::U24 => Unary::ToU24,
        Mac::U32 => Unary::ToU32,
        Mac::U40 => Unary::ToU40,
        Mac::U48 => Unary::ToU48,
        Mac::U56 => Unary::ToU56,
        Mac::U64 => Unary::ToU64,
        Mac::U128 => Unary::ToU128,
        Mac::I8 => Unary::ToI8,
        Mac::I16 => Unary::ToI16,
        Mac::I24 => Unary::ToI24,
        Mac::I32 => Unary::ToI32,
        Mac::I40 => Unary::ToI40,
        Mac::I48 => Unary::ToI48,
        Mac::I56 => Unary::ToI56,
        Mac::I64 => Unary::ToI64,
        Mac::I128 => Unary::ToI128,
        _ => unreachable!(),
    }
}

/// The unsigned width sharing a bit count with `mac`.
const fn unsigned_of(mac: Mac) -> Mac {
    match mac {
        Mac::U8 | Mac::I8 => Mac::U8,
        Mac::U16 | Mac::I16 => Mac::U16,
        Mac::U24 | Mac::I24 => Mac::U24,
        Mac::U32 | Mac::I32 => Mac::U32,
        Mac::U40 | Mac::I40 => Mac::U40,
        Mac::U48 | Mac::I48 => Mac::U48,
        Mac::U56 | Mac::I56 => Mac::U56,
        Mac::U64 | Mac::I64 => Mac::U64,
        Mac::U128 | Mac::I128 => Mac::U128,
        _ => unreachable!(),
    }
}

/// Read a little-endian integer of `mac`'s width, one byte at a time,
/// yielding `Pair(value, ptr)`.
fn read_int(mac: Mac, src: Expr, ctx: &mut GenCtx) -> Expr {
    let bytes = mac.bits().expect("an integer width") / 8;
    let unsigned = unsigned_of(mac);
    let mut lets = Vec::new();
    let mut ids = Vec::new();
    let mut ptr = src;
    for _ in 0..bytes {
        let name = ctx.gensym("rb");
        let id = Expr::ident(name.clone());
        lets.push((name, Expr::read_byte(ptr)));
        ptr = Expr::snd(id.clone());
        ids.push(id);
    }
    let mut value = None;
    for (shift, id) in ids.iter().enumerate() {
        let byte = Expr::unary(
            widen(unsigned),
            Expr::unary(Unary::U8OfByte, Expr::fst(id.clone())),
        );
        let term = if shift == 0 {
            byte
        } else {
            Expr::binary(Binary::LeftShift, byte, Expr::u8(8 * shift as u8))
        };
        value = Some(match value {
            None => term,
            Some(acc) => Expr::binary(Binary::LogOr, acc, term),
        });
    }
    let value = value.expect("widths have at least one byte");
    let value = if mac.is_signed() {
        Expr::unary(widen(mac), value)
    } else {
        value
    };
    let mut body = Expr::pair(value, ptr);
    for (name, bound) in lets.into_iter().rev() {
        body = Expr::let_(name, bound, body);
    }
    body
}

/// Write a little-endian integer of `mac`'s width, one byte at a time.
fn write_int(mac: Mac, value: Expr, dst: Expr, ctx: &mut GenCtx) -> Expr {
    let bytes = mac.bits().expect("an integer width") / 8;
    let unsigned = unsigned_of(mac);
    let name = ctx.gensym("wv");
    let id = Expr::ident(name.clone());
    let mut out = dst;
    for shift in 0..bytes {
        let shifted = if shift == 0 {
            id.clone()
        } else {
            Expr::binary(
                Binary::RightShift,
                id.clone(),
                Expr::u8(8 * shift as u8),
            )
        };
        out = Expr::write_byte(
            out,
            Expr::unary(
                Unary::ByteOfU8,
                Expr::unary(Unary::ToU8, shifted),
            ),
        );
    }
    Expr::let_(name, Expr::unary(widen(unsigned), value), out)
}

/// Write an u32 as a LEB128 varint.
fn leb128_write(value: Expr, dst: Expr, ctx: &mut GenCtx) -> Expr {
    let accum_type = Type::pair(Type::u32(), Type::DataPtr);

    let cond_fid = ctx.fresh_fid();
    let cond = Expr::func(
        cond_fid,
        vec![accum_type.clone()],
        Expr::ge(Expr::fst(Expr::param(cond_fid, 0)), Expr::u32(0x80)),
    );

    let body_fid = ctx.fresh_fid();
    let rest = Expr::fst(Expr::param(body_fid, 0));
    let out = Expr::snd(Expr::param(body_fid, 0));
    let low = Expr::unary(
        Unary::ByteOfU8,
        Expr::unary(
            Unary::ToU8,
            Expr::binary(
                Binary::LogOr,
                Expr::binary(Binary::LogAnd, rest.clone(), Expr::u32(0x7f)),
                Expr::u32(0x80),
            ),
        ),
    );
    let body = Expr::func(
        body_fid,
        vec![accum_type],
        Expr::pair(
            Expr::binary(Binary::RightShift, rest, Expr::u8(7)),
            Expr::write_byte(out, low),
        ),
    );

    let looped = Expr::ternary(
        Ternary::LoopWhile,
        cond,
        body,
        Expr::pair(value, dst),
    );
    let name = ctx.gensym("leb");
    let id = Expr::ident(name.clone());
    Expr::let_(
        name,
        looped,
        Expr::write_byte(
            Expr::snd(id.clone()),
            Expr::unary(Unary::ByteOfU8, Expr::unary(Unary::ToU8, Expr::fst(id))),
        ),
    )
}

/// Read a LEB128 varint into an u32, yielding `Pair(value, ptr)`.
fn leb128_read(src: Expr, ctx: &mut GenCtx) -> Expr {
    let accum_type = Type::pair(Type::u32(), Type::u32());

    // Continuation bytes have their high bit set.
    let cond_fid = ctx.fresh_fid();
    let cond = Expr::func(
        cond_fid,
        vec![Type::Byte],
        Expr::ge(Expr::param(cond_fid, 0), Expr::byte(0x80)),
    );

    let reduce_fid = ctx.fresh_fid();
    let acc = Expr::fst(Expr::param(reduce_fid, 0));
    let shift = Expr::snd(Expr::param(reduce_fid, 0));
    let low = Expr::unary(
        Unary::ToU32,
        Expr::binary(
            Binary::LogAnd,
            Expr::unary(Unary::U8OfByte, Expr::param(reduce_fid, 1)),
            Expr::u8(0x7f),
        ),
    );
    let reduce = Expr::func(
        reduce_fid,
        vec![accum_type, Type::Byte],
        Expr::pair(
            Expr::binary(
                Binary::LogOr,
                acc,
                Expr::binary(
                    Binary::LeftShift,
                    low,
                    Expr::unary(Unary::ToU8, shift.clone()),
                ),
            ),
            Expr::add(shift, Expr::u32(7)),
        ),
    );

    let scanned = Expr::quaternary(
        Quaternary::ReadWhile,
        cond,
        reduce,
        Expr::pair(Expr::u32(0), Expr::u32(0)),
        src,
    );
    // The final byte has its high bit clear and was left unconsumed.
    let scan = ctx.gensym("leb");
    let scan_id = Expr::ident(scan.clone());
    let last = ctx.gensym("lst");
    let last_id = Expr::ident(last.clone());
    Expr::let_(
        scan,
        scanned,
        Expr::let_(
            last,
            Expr::read_byte(Expr::snd(scan_id.clone())),
            Expr::pair(
                Expr::binary(
                    Binary::LogOr,
                    Expr::fst(Expr::fst(scan_id.clone())),
                    Expr::binary(
                        Binary::LeftShift,
                        Expr::unary(
                            Unary::ToU32,
                            Expr::unary(Unary::U8OfByte, Expr::fst(last_id.clone())),
                        ),
                        Expr::unary(Unary::ToU8, Expr::snd(Expr::fst(scan_id))),
                    ),
                ),
                Expr::snd(last_id),
            ),
        ),
    )
}

/// `Size` expression for the LEB128 length of an u32 count.
fn leb128_size(count: Expr) -> Expr {
    let step = |threshold: u32, size: usize, otherwise: Expr| {
        Expr::choose(
            Expr::ge(count.clone(), Expr::u32(threshold)),
            Expr::size(size),
            otherwise,
        )
    };
    step(
        1 << 28,
        5,
        step(1 << 21, 4, step(1 << 14, 3, step(1 << 7, 2, Expr::size(1)))),
    )
}

/// The serializer half.
#[derive(Debug, Default)]
pub struct RowBinarySer;

macro_rules! rowbinary_int_writers {
    ($($method:ident: $mac:ident),+ $(,)?) => {
        $(fn $method(
            &mut self,
            _mn: &Mn,
            _path: &Path,
            value: Expr,
            dst: Expr,
            ctx: &mut GenCtx,
        ) -> Expr {
            write_int(Mac::$mac, value, dst, ctx)
        })+
    };
}

macro_rules! rowbinary_int_readers {
    ($($method:ident: $mac:ident),+ $(,)?) => {
        $(fn $method(&mut self, _mn: &Mn, _path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr {
            read_int(Mac::$mac, src, ctx)
        })+
    };
}

impl Ser for RowBinarySer {
    fn name(&self) -> &'static str {
        "row-binary"
    }

    fn ptr(&self, _mn: &Mn) -> Type {
        Type::DataPtr
    }

    fn start(&mut self, _mn: &Mn, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        dst
    }

    fn stop(&mut self, _mn: &Mn, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        dst
    }

    rowbinary_int_writers!(
        su8: U8,
        su16: U16,
        su24: U24,
        su32: U32,
        su40: U40,
        su48: U48,
        su56: U56,
        su64: U64,
        su128: U128,
        si8: I8,
        si16: I16,
        si24: I24,
        si32: I32,
        si40: I40,
        si48: I48,
        si56: I56,
        si64: I64,
        si128: I128,
    );

    fn sfloat(&mut self, _mn: &Mn, _path: &Path, value: Expr, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        Expr::binary(
            Binary::WriteQWord(LE),
            dst,
            Expr::unary(Unary::QWordOfFloat, value),
        )
    }

    fn sstring(&mut self, _mn: &Mn, _path: &Path, value: Expr, dst: Expr, ctx: &mut GenCtx) -> Expr {
        let name = ctx.gensym("s");
        let id = Expr::ident(name.clone());
        let dst = leb128_write(
            Expr::unary(Unary::StringLength, id.clone()),
            dst,
            ctx,
        );
        Expr::let_(
            name,
            value,
            Expr::write_bytes(dst, Expr::unary(Unary::BytesOfString, id)),
        )
    }

    fn sbool(&mut self, _mn: &Mn, _path: &Path, value: Expr, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        Expr::write_byte(dst, Expr::choose(value, Expr::byte(1), Expr::byte(0)))
    }

    fn schar(&mut self, _mn: &Mn, _path: &Path, value: Expr, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        Expr::write_byte(
            dst,
            Expr::unary(Unary::ByteOfU8, Expr::unary(Unary::U8OfChar, value)),
        )
    }

    fn tup_opn(&mut self, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        dst
    }

    fn tup_cls(&mut self, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        dst
    }

    fn tup_sep(&mut self, _index: usize, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        dst
    }

    fn rec_opn(&mut self, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        dst
    }

    fn rec_cls(&mut self, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        dst
    }

    fn rec_sep(&mut self, _name: &str, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        dst
    }

    fn vec_opn(&mut self, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        dst
    }

    fn vec_cls(&mut self, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        dst
    }

    fn vec_sep(&mut self, _index: usize, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        dst
    }

    fn list_opn(
        &mut self,
        _mn: &Mn,
        _path: &Path,
        _item: &Mn,
        count: Option<Expr>,
        dst: Expr,
        ctx: &mut GenCtx,
    ) -> Result<Expr, Error> {
        match count {
            Some(count) => Ok(leb128_write(count, dst, ctx)),
            None => Err(Error::CountRequired(self.name())),
        }
    }

    fn list_cls(&mut self, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        dst
    }

    fn list_sep(&mut self, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        dst
    }

    fn sum_opn(&mut self, label: Expr, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        Expr::binary(
            Binary::WriteWord(LE),
            dst,
            Expr::unary(Unary::WordOfU16, label),
        )
    }

    fn sum_cls(&mut self, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        dst
    }

    fn nullable(&mut self, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        dst
    }

    fn snull(&mut self, _vtype: &ValueType, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        Expr::write_byte(dst, Expr::byte(1))
    }

    fn snotnull(&mut self, _vtype: &ValueType, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        Expr::write_byte(dst, Expr::byte(0))
    }

    fn ssize_of(&self, mn: &Mn, path: &Path, value: Expr) -> Option<SSize> {
        let slot = type_of_path(mn, path).ok()?;
        if slot.is_nullable() {
            // Marker byte plus the value when present.
            let present = match slot.vtype().resolved() {
                ValueType::Mac(Mac::String) => {
                    Expr::add(Expr::size(1), string_size(path, &value, true))
                }
                vtype => Expr::size(1 + fixed_scalar_size(vtype)?),
            };
            return Some(SSize::Dyn(Expr::choose(
                Expr::unary(Unary::FieldIsNull(path.clone()), value),
                Expr::size(1),
                present,
            )));
        }
        match slot.vtype().resolved() {
            ValueType::Tup(_) | ValueType::Rec(_) | ValueType::Vec(_, _) => {
                Some(SSize::Const(0))
            }
            ValueType::List(_) => {
                let count = Expr::unary(
                    Unary::ListLength,
                    Expr::unary(Unary::GetField(path.clone()), value),
                );
                Some(SSize::Dyn(leb128_size(count)))
            }
            ValueType::Mac(Mac::String) => Some(SSize::Dyn(string_size(path, &value, false))),
            vtype => Some(SSize::Const(fixed_scalar_size(vtype)?)),
        }
    }
}

/// The byte count of a fixed-width scalar, `None` for anything else.
fn fixed_scalar_size(vtype: &ValueType) -> Option<usize> {
    match vtype {
        ValueType::Mac(Mac::Bool) | ValueType::Mac(Mac::Char) => Some(1),
        ValueType::Mac(Mac::Float) => Some(8),
        ValueType::Mac(Mac::String) => None,
        ValueType::Mac(mac) => Some((mac.bits()? / 8) as usize),
        _ => None,
    }
}

/// Length plus varint overhead for the string in the slot at `path`.
fn string_size(path: &Path, value: &Expr, nullable: bool) -> Expr {
    let slot = Expr::unary(Unary::GetField(path.clone()), value.clone());
    let slot = if nullable {
        Expr::unary(Unary::ToNotNullable, slot)
    } else {
        slot
    };
    let len = Expr::unary(Unary::StringLength, slot);
    Expr::add(
        leb128_size(len.clone()),
        Expr::unary(Unary::SizeOfU32, len),
    )
}

/// The deserializer half.
#[derive(Debug, Default)]
pub struct RowBinaryDes;

impl Des for RowBinaryDes {
    fn name(&self) -> &'static str {
        "row-binary"
    }

    fn ptr(&self, _mn: &Mn) -> Type {
        Type::DataPtr
    }

    fn start(&mut self, _mn: &Mn, src: Expr, _ctx: &mut GenCtx) -> Expr {
        src
    }

    fn stop(&mut self, _mn: &Mn, src: Expr, _ctx: &mut GenCtx) -> Expr {
        src
    }

    rowbinary_int_readers!(
        du8: U8,
        du16: U16,
        du24: U24,
        du32: U32,
        du40: U40,
        du48: U48,
        du56: U56,
        du64: U64,
        du128: U128,
        di8: I8,
        di16: I16,
        di24: I24,
        di32: I32,
        di40: I40,
        di48: I48,
        di56: I56,
        di64: I64,
        di128: I128,
    );

    fn dfloat(&mut self, _mn: &Mn, _path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr {
        let name = ctx.gensym("f");
        let id = Expr::ident(name.clone());
        Expr::let_(
            name,
            Expr::unary(Unary::ReadQWord(LE), src),
            Expr::pair(
                Expr::unary(Unary::FloatOfQWord, Expr::fst(id.clone())),
                Expr::snd(id),
            ),
        )
    }

    fn dstring(&mut self, _mn: &Mn, _path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr {
        let len = ctx.gensym("len");
        let len_id = Expr::ident(len.clone());
        let bytes = ctx.gensym("bs");
        let bytes_id = Expr::ident(bytes.clone());
        Expr::let_(
            len,
            leb128_read(src, ctx),
            Expr::let_(
                bytes,
                Expr::binary(
                    Binary::ReadBytes,
                    Expr::snd(len_id.clone()),
                    Expr::unary(Unary::SizeOfU32, Expr::fst(len_id)),
                ),
                Expr::pair(
                    Expr::unary(Unary::StringOfBytes, Expr::fst(bytes_id.clone())),
                    Expr::snd(bytes_id),
                ),
            ),
        )
    }

    fn dbool(&mut self, _mn: &Mn, _path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr {
        let name = ctx.gensym("b");
        let id = Expr::ident(name.clone());
        Expr::let_(
            name,
            Expr::read_byte(src),
            Expr::pair(
                Expr::binary(Binary::Ne, Expr::fst(id.clone()), Expr::byte(0)),
                Expr::snd(id),
            ),
        )
    }

    fn dchar(&mut self, _mn: &Mn, _path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr {
        let name = ctx.gensym("c");
        let id = Expr::ident(name.clone());
        Expr::let_(
            name,
            Expr::read_byte(src),
            Expr::pair(
                Expr::unary(
                    Unary::CharOfU8,
                    Expr::unary(Unary::U8OfByte, Expr::fst(id.clone())),
                ),
                Expr::snd(id),
            ),
        )
    }

    fn tup_opn(&mut self, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        src
    }

    fn tup_cls(&mut self, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        src
    }

    fn tup_sep(&mut self, _index: usize, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        src
    }

    fn rec_opn(&mut self, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        src
    }

    fn rec_cls(&mut self, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        src
    }

    fn rec_sep(&mut self, _name: &str, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        src
    }

    fn vec_opn(&mut self, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        src
    }

    fn vec_cls(&mut self, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        src
    }

    fn vec_sep(&mut self, _index: usize, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        src
    }

    fn list_opn(&self) -> ListOpener {
        ListOpener::KnownSize
    }

    fn list_opn_known(
        &mut self,
        _mn: &Mn,
        _path: &Path,
        _item: &Mn,
        src: Expr,
        ctx: &mut GenCtx,
    ) -> Expr {
        leb128_read(src, ctx)
    }

    fn list_opn_unknown(
        &mut self,
        _mn: &Mn,
        _path: &Path,
        _item: &Mn,
        src: Expr,
        _ctx: &mut GenCtx,
    ) -> Expr {
        src
    }

    fn is_end_of_list(&mut self, _mn: &Mn, _path: &Path, _src: Expr, _ctx: &mut GenCtx) -> Expr {
        Expr::bool(true)
    }

    fn list_cls(&mut self, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        src
    }

    fn list_sep(&mut self, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        src
    }

    fn sum_opn(&mut self, _mn: &Mn, _path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr {
        let name = ctx.gensym("lbl");
        let id = Expr::ident(name.clone());
        Expr::let_(
            name,
            Expr::unary(Unary::ReadWord(LE), src),
            Expr::pair(
                Expr::unary(Unary::U16OfWord, Expr::fst(id.clone())),
                Expr::snd(id),
            ),
        )
    }

    fn sum_cls(&mut self, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        src
    }

    fn is_null(&mut self, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        Expr::eq(Expr::peek_byte(src, Expr::size(0)), Expr::byte(1))
    }

    fn dnull(&mut self, _vtype: &ValueType, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        Expr::data_ptr_add(src, Expr::size(1))
    }

    fn dnotnull(&mut self, _vtype: &ValueType, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        Expr::data_ptr_add(src, Expr::size(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desser::desser;
    use crate::expr::eval::{self, DataPtr, Env, HeapVal, RtVal, ValuePtr};
    use crate::heap::{sersize, HeapDes, HeapSer, Mask};
    use crate::schema::parser::parse;

    fn encode(schema: &str, value: HeapVal) -> Vec<u8> {
        let mn = parse(0, schema).unwrap();
        let mut ctx = GenCtx::new();
        let expr = desser(
            &mut HeapDes,
            &mut RowBinarySer,
            &mn,
            Expr::ident("src"),
            Expr::ident("dst"),
            &mut ctx,
        )
        .unwrap();
        let mut env = Env::new();
        env.bind("src", RtVal::ValuePtr(ValuePtr::of_value(&mn, value)));
        env.bind("dst", RtVal::DataPtr(DataPtr::of_bytes(Vec::new())));
        let result = eval::eval(&mut env, &expr)
            .unwrap_or_else(|err| panic!("encode failed for {}: {}", schema, err));
        let (_, dst) = result.into_pair().unwrap();
        dst.into_data_ptr().unwrap().bytes()
    }

    fn decode(schema: &str, bytes: Vec<u8>) -> HeapVal {
        let mn = parse(0, schema).unwrap();
        let mut ctx = GenCtx::new();
        let expr = desser(
            &mut RowBinaryDes,
            &mut HeapSer,
            &mn,
            Expr::ident("src"),
            Expr::ident("heap"),
            &mut ctx,
        )
        .unwrap();
        let heap = ValuePtr::alloc(&mn).unwrap();
        let mut env = Env::new();
        env.bind("src", RtVal::DataPtr(DataPtr::of_bytes(bytes)));
        env.bind("heap", RtVal::ValuePtr(heap.clone()));
        eval::eval(&mut env, &expr)
            .unwrap_or_else(|err| panic!("decode failed for {}: {}", schema, err));
        heap.value()
    }

    fn round_trip(schema: &str, value: HeapVal) {
        let bytes = encode(schema, value.clone());
        assert_eq!(decode(schema, bytes), value, "round trip for {}", schema);
    }

    #[test]
    fn fixed_widths_are_little_endian() {
        assert_eq!(
            encode("u16", HeapVal::Int(Mac::U16, 0x1234)),
            vec![0x34, 0x12]
        );
        assert_eq!(
            encode("u24", HeapVal::Int(Mac::U24, 0x010203)),
            vec![0x03, 0x02, 0x01]
        );
    }

    #[test]
    fn scalars_round_trip() {
        round_trip("u8", HeapVal::Int(Mac::U8, 0));
        round_trip("u40", HeapVal::Int(Mac::U40, 0xff_0000_0001));
        round_trip("i24", HeapVal::Int(Mac::I24, (-2i32 as u32 as u128) & 0xff_ffff));
        round_trip("i64", HeapVal::Int(Mac::I64, (-5i64) as u64 as u128));
        round_trip("float", HeapVal::Float(-2.75));
        round_trip("bool", HeapVal::Bool(true));
        round_trip("char", HeapVal::Char('x'));
        round_trip("u128", HeapVal::Int(Mac::U128, 1u128 << 126));
    }

    #[test]
    fn strings_use_varint_lengths() {
        let bytes = encode("string", HeapVal::Str("hello".to_owned()));
        assert_eq!(bytes, b"\x05hello");
        round_trip("string", HeapVal::Str("x".repeat(200)));
    }

    #[test]
    fn nullables_carry_a_marker_byte() {
        assert_eq!(encode("u8?", HeapVal::Null), vec![1]);
        assert_eq!(encode("u8?", HeapVal::Int(Mac::U8, 7)), vec![0, 7]);
        round_trip("u8?", HeapVal::Null);
        round_trip("string?", HeapVal::Str("maybe".to_owned()));
    }

    #[test]
    fn lists_round_trip() {
        round_trip("u16[]", HeapVal::List(Vec::new()));
        round_trip(
            "{a: u16; b: u8[]}",
            HeapVal::Rec(vec![
                ("a".to_owned(), HeapVal::Int(Mac::U16, 515)),
                (
                    "b".to_owned(),
                    HeapVal::List(vec![HeapVal::Int(Mac::U8, 1), HeapVal::Int(Mac::U8, 2)]),
                ),
            ]),
        );
    }

    #[test]
    fn sersize_matches_serialized_length() {
        let schema = "{a: u16; b: string; c: u32[3]; d: u8?; e: u16[]}";
        let value = HeapVal::Rec(vec![
            ("a".to_owned(), HeapVal::Int(Mac::U16, 7)),
            ("b".to_owned(), HeapVal::Str("sizing".to_owned())),
            (
                "c".to_owned(),
                HeapVal::Vec(vec![
                    HeapVal::Int(Mac::U32, 1),
                    HeapVal::Int(Mac::U32, 2),
                    HeapVal::Int(Mac::U32, 3),
                ]),
            ),
            ("d".to_owned(), HeapVal::Null),
            (
                "e".to_owned(),
                HeapVal::List(vec![HeapVal::Int(Mac::U16, 5), HeapVal::Int(Mac::U16, 6)]),
            ),
        ]);
        let bytes = encode(schema, value.clone());

        let mn = parse(0, schema).unwrap();
        let (constant, dynamic) =
            sersize(&RowBinarySer, &mn, &Mask::Copy, &Expr::ident("v")).unwrap();
        let mut env = Env::new();
        env.bind("v", RtVal::ValuePtr(ValuePtr::of_value(&mn, value)));
        let dynamic = match eval::eval(&mut env, &dynamic).unwrap() {
            RtVal::Size(size) => size,
            other => panic!("expected a size, got {:?}", other),
        };
        assert_eq!(constant + dynamic, bytes.len());
    }

    #[test]
    fn skipped_fields_shrink_the_size() {
        let schema = "(u16; u32)";
        let mn = parse(0, schema).unwrap();
        let mask = Mask::Fields(vec![Mask::Copy, Mask::Skip]);
        let (constant, _) = sersize(&RowBinarySer, &mn, &mask, &Expr::ident("v")).unwrap();
        assert_eq!(constant, 2);
    }
}
