//! The heap-value bridge.
//!
//! [`HeapSer`] and [`HeapDes`] are the canonical in-memory codec: their
//! pointer type is `ValuePtr(root)` and their scalar accessors are the
//! value-slot operators. Instantiating the generic driver with them yields
//! [`materialize`] (wire to heap) and [`serialize`] (heap to wire).

use crate::codec::{Des, ListOpener, Ser, SSize};
use crate::desser::{self, Error};
use crate::expr::{Binary, Expr, GenCtx, Type, Unary};
use crate::schema::path::type_of_path;
use crate::schema::{Mn, Path, ValueType};

/// Writes values into a freshly allocated heap value.
#[derive(Debug, Default)]
pub struct HeapSer;

/// Reads values back out of a heap value.
#[derive(Debug, Default)]
pub struct HeapDes;

fn slot_is_nullable(root: &Mn, path: &Path) -> bool {
    type_of_path(root, path)
        .map(|mn| mn.is_nullable())
        .unwrap_or(false)
}

macro_rules! heap_writers {
    ($($method:ident),+ $(,)?) => {
        $(fn $method(
            &mut self,
            mn: &Mn,
            path: &Path,
            value: Expr,
            dst: Expr,
            _ctx: &mut GenCtx,
        ) -> Expr {
            self.set_slot(mn, path, value, dst)
        })+
    };
}

macro_rules! heap_readers {
    ($($method:ident),+ $(,)?) => {
        $(fn $method(&mut self, mn: &Mn, path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
            self.get_slot(mn, path, src)
        })+
    };
}

impl HeapSer {
    fn set_slot(&self, root: &Mn, path: &Path, value: Expr, dst: Expr) -> Expr {
        // The driver hands over not-nullable values; promote them when the
        // slot itself is nullable.
        let value = if slot_is_nullable(root, path) {
            Expr::unary(Unary::ToNullable, value)
        } else {
            value
        };
        Expr::binary(Binary::SetField(path.clone()), value, dst)
    }
}

impl Ser for HeapSer {
    fn name(&self) -> &'static str {
        "heap"
    }

    fn ptr(&self, mn: &Mn) -> Type {
        Type::ValuePtr(mn.clone())
    }

    fn start(&mut self, _mn: &Mn, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        dst
    }

    fn stop(&mut self, _mn: &Mn, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        dst
    }

    heap_writers!(
        sfloat, sstring, sbool, schar, su8, su16, su24, su32, su40, su48, su56, su64, su128,
        si8, si16, si24, si32, si40, si48, si56, si64, si128,
    );

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
        path: &Path,
        _item: &Mn,
        _count: Option<Expr>,
        dst: Expr,
        _ctx: &mut GenCtx,
    ) -> Result<Expr, Error> {
        Ok(Expr::unary(Unary::ListBegin(path.clone()), dst))
    }

    fn list_cls(&mut self, _mn: &Mn, path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        Expr::unary(Unary::ListEnd(path.clone()), dst)
    }

    fn list_sep(&mut self, _mn: &Mn, path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        Expr::unary(Unary::ListNext(path.clone()), dst)
    }

    fn sum_opn(&mut self, _label: Expr, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        dst
    }

    fn sum_cls(&mut self, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        dst
    }

    fn nullable(&mut self, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        dst
    }

    fn snull(&mut self, _vtype: &ValueType, _mn: &Mn, path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        Expr::unary(Unary::SetFieldNull(path.clone()), dst)
    }

    fn snotnull(&mut self, _vtype: &ValueType, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        dst
    }
}

impl HeapDes {
    fn get_slot(&self, root: &Mn, path: &Path, src: Expr) -> Expr {
        let value = Expr::unary(Unary::GetField(path.clone()), src.clone());
        // The driver only reads the slot after probing the null marker, so
        // the value is statically known to be present.
        let value = if slot_is_nullable(root, path) {
            Expr::unary(Unary::ToNotNullable, value)
        } else {
            value
        };
        Expr::pair(value, src)
    }
}

impl Des for HeapDes {
    fn name(&self) -> &'static str {
        "heap"
    }

    fn ptr(&self, mn: &Mn) -> Type {
        Type::ValuePtr(mn.clone())
    }

    fn start(&mut self, _mn: &Mn, src: Expr, _ctx: &mut GenCtx) -> Expr {
        src
    }

    fn stop(&mut self, _mn: &Mn, src: Expr, _ctx: &mut GenCtx) -> Expr {
        src
    }

    heap_readers!(
        dfloat, dstring, dbool, dchar, du8, du16, du24, du32, du40, du48, du56, du64, du128,
        di8, di16, di24, di32, di40, di48, di56, di64, di128,
    );

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
        path: &Path,
        _item: &Mn,
        src: Expr,
        _ctx: &mut GenCtx,
    ) -> Expr {
        let count = Expr::unary(
            Unary::ListLength,
            Expr::unary(Unary::GetField(path.clone()), src.clone()),
        );
        Expr::pair(count, Expr::unary(Unary::ListBegin(path.clone()), src))
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

    fn list_cls(&mut self, _mn: &Mn, path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        Expr::unary(Unary::ListEnd(path.clone()), src)
    }

    fn list_sep(&mut self, _mn: &Mn, path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        Expr::unary(Unary::ListNext(path.clone()), src)
    }

    fn sum_opn(&mut self, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        Expr::pair(Expr::u16(0), src)
    }

    fn sum_cls(&mut self, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        src
    }

    fn is_null(&mut self, _mn: &Mn, path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        Expr::unary(Unary::FieldIsNull(path.clone()), src)
    }

    fn dnull(&mut self, _vtype: &ValueType, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        src
    }

    fn dnotnull(&mut self, _vtype: &ValueType, _mn: &Mn, _path: &Path, src: Expr, _ctx: &mut GenCtx) -> Expr {
        src
    }
}

/// An expression that reads one value with `des` and materialises it:
/// a function from the codec's pointer to `Pair(ValuePtr(root), ptr')`.
pub fn materialize(des: &mut dyn Des, mn: &Mn, ctx: &mut GenCtx) -> Result<Expr, Error> {
    let fid = ctx.fresh_fid();
    let heap = ctx.gensym("heap");
    let pair = desser::desser(
        des,
        &mut HeapSer,
        mn,
        Expr::param(fid, 0),
        Expr::ident(heap.clone()),
        ctx,
    )?;
    let out = ctx.gensym("mat");
    let body = Expr::let_(
        heap,
        Expr::alloc_value(mn.clone()),
        Expr::let_(
            out.clone(),
            pair,
            Expr::pair(
                Expr::snd(Expr::ident(out.clone())),
                Expr::fst(Expr::ident(out)),
            ),
        ),
    );
    Ok(Expr::func(fid, vec![des.ptr(mn)], body))
}

/// The dual of [`materialize`]: a function from `(ValuePtr(root), ptr)` to
/// `Pair(ValuePtr(root), ptr')`, writing the heap value with `ser`.
pub fn serialize(ser: &mut dyn Ser, mn: &Mn, ctx: &mut GenCtx) -> Result<Expr, Error> {
    let fid = ctx.fresh_fid();
    let body = desser::desser(
        &mut HeapDes,
        ser,
        mn,
        Expr::param(fid, 0),
        Expr::param(fid, 1),
        ctx,
    )?;
    Ok(Expr::func(
        fid,
        vec![Type::ValuePtr(mn.clone()), ser.ptr(mn)],
        body,
    ))
}

/// A tree-shaped field mask for [`sersize`], aligned with schema children.
///
/// `Fields` entries line up with tuple items, record fields or vector
/// indices (a single entry applies to every vector or list element).
#[derive(Debug, Clone, PartialEq)]
pub enum Mask {
    Copy,
    Skip,
    Fields(Vec<Mask>),
}

static COPY: Mask = Mask::Copy;
static SKIP: Mask = Mask::Skip;

impl Mask {
    fn child(&self, index: usize) -> &Mask {
        match self {
            Mask::Copy => &COPY,
            Mask::Skip => &SKIP,
            Mask::Fields(children) if children.len() == 1 => &children[0],
            Mask::Fields(children) => children.get(index).unwrap_or(&COPY),
        }
    }
}

/// The serialised byte size of the masked parts of the heap value behind
/// `value` (a `ValuePtr(root)` expression): a generation-time constant
/// plus a `Size`-typed expression to evaluate on the value. The total is
/// their sum.
pub fn sersize(
    ser: &dyn Ser,
    mn: &Mn,
    mask: &Mask,
    value: &Expr,
) -> Result<(usize, Expr), Error> {
    let (constant, terms) = size_walk(ser, mn, mn, &Path::root(), mask, value)?;
    let dynamic = terms
        .into_iter()
        .reduce(|a, b| Expr::binary(Binary::Add, a, b))
        .unwrap_or(Expr::size(0));
    Ok((constant, dynamic))
}

fn size_walk(
    ser: &dyn Ser,
    root: &Mn,
    mn: &Mn,
    path: &Path,
    mask: &Mask,
    value: &Expr,
) -> Result<(usize, Vec<Expr>), Error> {
    if *mask == Mask::Skip {
        return Ok((0, Vec::new()));
    }
    // Nullable slots are entirely the codec's business: only it knows the
    // size of its null marker.
    if mn.is_nullable() || matches!(mn.vtype(), ValueType::Mac(_)) {
        if mn.is_nullable() && !matches!(mn.vtype().resolved(), ValueType::Mac(_)) {
            return Err(Error::SizeNotStatic(path.clone()));
        }
        return match ser.ssize_of(root, path, value.clone()) {
            Some(SSize::Const(size)) => Ok((size, Vec::new())),
            Some(SSize::Dyn(term)) => Ok((0, vec![term])),
            None => Err(Error::SizeNotSupported(ser.name())),
        };
    }
    // For compounds the codec's hint covers framing only; children are
    // summed here.
    let mut framing = |terms: &mut Vec<Expr>| match ser.ssize_of(root, path, value.clone()) {
        Some(SSize::Const(size)) => Ok(size),
        Some(SSize::Dyn(term)) => {
            terms.push(term);
            Ok(0)
        }
        None => Err(Error::SizeNotSupported(ser.name())),
    };
    let mut constant = 0;
    let mut terms = Vec::new();
    match mn.vtype() {
        ValueType::Mac(_) => unreachable!("handled above"),
        ValueType::Usr(user) => {
            let (inner_const, inner_terms) =
                size_walk(ser, root, &user.def, path, mask, value)?;
            constant += inner_const;
            terms.extend(inner_terms);
        }
        ValueType::Tup(items) => {
            constant += framing(&mut terms)?;
            for (index, item) in items.iter().enumerate() {
                let (inner_const, inner_terms) =
                    size_walk(ser, root, item, &path.child(index), mask.child(index), value)?;
                constant += inner_const;
                terms.extend(inner_terms);
            }
        }
        ValueType::Rec(fields) => {
            constant += framing(&mut terms)?;
            for (index, (_, item)) in fields.iter().enumerate() {
                let (inner_const, inner_terms) =
                    size_walk(ser, root, item, &path.child(index), mask.child(index), value)?;
                constant += inner_const;
                terms.extend(inner_terms);
            }
        }
        ValueType::Vec(dim, item) => {
            constant += framing(&mut terms)?;
            for index in 0..*dim as usize {
                let (inner_const, inner_terms) =
                    size_walk(ser, root, item, &path.child(index), mask.child(index), value)?;
                constant += inner_const;
                terms.extend(inner_terms);
            }
        }
        ValueType::List(item) => {
            constant += framing(&mut terms)?;
            let (elem_const, elem_terms) =
                size_walk(ser, root, item, &path.child(0), mask.child(0), value)?;
            if !elem_terms.is_empty() {
                return Err(Error::SizeNotStatic(path.clone()));
            }
            let count = Expr::unary(
                Unary::ListLength,
                Expr::unary(Unary::GetField(path.clone()), value.clone()),
            );
            terms.push(Expr::unary(
                Unary::SizeOfU32,
                Expr::binary(Binary::Mul, count, Expr::u32(elem_const as u32)),
            ));
        }
        ValueType::Map(_, _) => return Err(Error::MapNotSerializable(path.clone())),
    }
    Ok((constant, terms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desser::desser;
    use crate::expr::eval::{Env, EvalError, HeapVal, RtVal, ValuePtr};
    use crate::expr::{eval, typing};
    use crate::schema::parser::parse;
    use crate::schema::Mac;

    /// Copy a heap value through the generic driver and compare.
    fn heap_copy(schema: &str, value: HeapVal) {
        let mn = parse(0, schema).unwrap();
        let mut ctx = GenCtx::new();
        let expr = desser(
            &mut HeapDes,
            &mut HeapSer,
            &mn,
            Expr::ident("src"),
            Expr::ident("dst"),
            &mut ctx,
        )
        .unwrap();

        let mut types = typing::Context::new();
        types.declare_ident("src", Type::ValuePtr(mn.clone()));
        types.declare_ident("dst", Type::ValuePtr(mn.clone()));
        let r#type = types.type_of(&expr).unwrap();
        assert_eq!(
            r#type,
            Type::pair(Type::ValuePtr(mn.clone()), Type::ValuePtr(mn.clone()))
        );

        let src = ValuePtr::of_value(&mn, value.clone());
        let dst = ValuePtr::alloc(&mn).unwrap();
        let mut env = Env::new();
        env.bind("src", RtVal::ValuePtr(src.clone()));
        env.bind("dst", RtVal::ValuePtr(dst.clone()));
        let result = eval::eval(&mut env, &expr)
            .unwrap_or_else(|err| panic!("eval failed for {}: {}", schema, err));

        // The driver returns the root pointers it was given.
        let (src_out, dst_out) = result.into_pair().unwrap();
        assert!(src_out.into_value_ptr().unwrap().same_root(&src));
        assert!(dst_out.into_value_ptr().unwrap().same_root(&dst));
        assert_eq!(dst.value(), value, "copy of {} through the heap codec", schema);
    }

    #[test]
    fn scalars_copy() {
        heap_copy("u8", HeapVal::Int(Mac::U8, 42));
        heap_copy("string", HeapVal::Str("hello".to_owned()));
        heap_copy("float", HeapVal::Float(1.5));
    }

    #[test]
    fn compounds_copy() {
        heap_copy(
            "{a: u8; b: string?}",
            HeapVal::Rec(vec![
                ("a".to_owned(), HeapVal::Int(Mac::U8, 42)),
                ("b".to_owned(), HeapVal::Null),
            ]),
        );
        heap_copy(
            "(bool; char[2])",
            HeapVal::Tup(vec![
                HeapVal::Bool(true),
                HeapVal::Vec(vec![HeapVal::Char('a'), HeapVal::Char('b')]),
            ]),
        );
    }

    #[test]
    fn lists_copy() {
        heap_copy("u8[]", HeapVal::List(Vec::new()));
        heap_copy(
            "u16[]",
            HeapVal::List(vec![
                HeapVal::Int(Mac::U16, 10),
                HeapVal::Int(Mac::U16, 20),
                HeapVal::Int(Mac::U16, 30),
            ]),
        );
        heap_copy(
            "u8[][]",
            HeapVal::List(vec![
                HeapVal::List(vec![HeapVal::Int(Mac::U8, 1)]),
                HeapVal::List(Vec::new()),
                HeapVal::List(vec![HeapVal::Int(Mac::U8, 2), HeapVal::Int(Mac::U8, 3)]),
            ]),
        );
    }

    #[test]
    fn maps_are_rejected() {
        let mn = parse(0, "bool[string]").unwrap();
        let mut ctx = GenCtx::new();
        let result = desser(
            &mut HeapDes,
            &mut HeapSer,
            &mn,
            Expr::ident("src"),
            Expr::ident("dst"),
            &mut ctx,
        );
        assert_eq!(result, Err(Error::MapNotSerializable(Path::root())));
    }

    #[test]
    fn alloc_value_rejects_maps() {
        let mn = parse(0, "bool[string]").unwrap();
        assert!(matches!(
            ValuePtr::alloc(&mn),
            Err(EvalError::Internal(_))
        ));
    }
}
