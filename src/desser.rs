//! The generic deserializer–serializer driver.
//!
//! Given any [`Des`] and any [`Ser`], [`desser`] builds one IR expression
//! that reads a value of the given schema from the source pointer and
//! writes it to the destination pointer, preserving compound structure.
//! The traversal is purely schema-directed: both codecs see the same
//! number of opener, separator and closer calls in the same tree order, so
//! a stateful codec can keep its internal bookkeeping consistent.

use std::fmt;

use crate::codec::{Des, ListOpener, Ser};
use crate::expr::{Expr, GenCtx, Nullary, Quaternary, Ternary, Type, Unary};
use crate::schema::{Mn, Path, ValueType};

/// Failures while generating a converter.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Maps exist in type expressions only; no value can be walked.
    MapNotSerializable(Path),
    /// The serializer's format needs an element count the deserializer
    /// cannot provide.
    CountRequired(&'static str),
    /// The codec declares no size hints, so pre-sizing is unavailable.
    SizeNotSupported(&'static str),
    /// The serialised size at this path depends on per-element state a
    /// static walk cannot fold (dynamic list elements, nullable compounds).
    SizeNotStatic(Path),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MapNotSerializable(path) => {
                write!(f, "cannot serialise a map (at path `{}`)", path)
            }
            Error::CountRequired(codec) => {
                write!(f, "{} needs an element count before list items", codec)
            }
            Error::SizeNotSupported(codec) => {
                write!(f, "{} declares no size hints", codec)
            }
            Error::SizeNotStatic(path) => {
                write!(f, "size at path `{}` cannot be folded statically", path)
            }
        }
    }
}

impl std::error::Error for Error {}

/// Read one value of schema `mn` from `src` with `des` and write it to
/// `dst` with `ser`. Yields `Pair(src', dst')`, the pointers past the
/// consumed and emitted value.
pub fn desser(
    des: &mut dyn Des,
    ser: &mut dyn Ser,
    mn: &Mn,
    src: Expr,
    dst: Expr,
    ctx: &mut GenCtx,
) -> Result<Expr, Error> {
    let src = des.start(mn, src, ctx);
    let dst = ser.start(mn, dst, ctx);
    let pair = walk(des, ser, mn, mn, &Path::root(), src, dst, ctx)?;
    bind(ctx, "desser", pair, |ctx, pair| {
        let src = des.stop(mn, Expr::fst(pair.clone()), ctx);
        let dst = ser.stop(mn, Expr::snd(pair), ctx);
        Ok(Expr::pair(src, dst))
    })
}

/// [`desser`] wrapped in a two-parameter function from source pointer to
/// destination pointer.
pub fn converter(
    des: &mut dyn Des,
    ser: &mut dyn Ser,
    mn: &Mn,
    ctx: &mut GenCtx,
) -> Result<Expr, Error> {
    let fid = ctx.fresh_fid();
    let body = desser(des, ser, mn, Expr::param(fid, 0), Expr::param(fid, 1), ctx)?;
    Ok(Expr::func(fid, vec![des.ptr(mn), ser.ptr(mn)], body))
}

/// Bind an expression to a fresh name so it can be used more than once
/// without re-evaluating its effects. Identifiers and parameters pass
/// through unbound.
fn bind(
    ctx: &mut GenCtx,
    prefix: &str,
    expr: Expr,
    body: impl FnOnce(&mut GenCtx, Expr) -> Result<Expr, Error>,
) -> Result<Expr, Error> {
    match expr {
        Expr::Nullary(Nullary::Identifier(_)) | Expr::Nullary(Nullary::Param(_, _)) => {
            body(ctx, expr)
        }
        expr => {
            let name = ctx.gensym(prefix);
            let id = Expr::ident(name.clone());
            Ok(Expr::let_(name, expr, body(ctx, id)?))
        }
    }
}

/// Which compound the separator belongs to.
enum Group {
    Tup,
    Rec(Vec<String>),
    Vec,
}

#[allow(clippy::too_many_arguments)]
fn walk(
    des: &mut dyn Des,
    ser: &mut dyn Ser,
    root: &Mn,
    mn: &Mn,
    path: &Path,
    src: Expr,
    dst: Expr,
    ctx: &mut GenCtx,
) -> Result<Expr, Error> {
    match mn {
        Mn::Nullable(vtype) => {
            walk_nullable(des, ser, root, vtype, path, src, dst, ctx)
        }
        Mn::NotNullable(vtype) => walk_vtype(des, ser, root, vtype, path, src, dst, ctx),
    }
}

/// Probe the null marker, emit the serializer's common framing, then
/// branch. Both arms yield an identically-typed `Pair(src, dst)`, which is
/// why [`Ser::nullable`] must run before the branch.
#[allow(clippy::too_many_arguments)]
fn walk_nullable(
    des: &mut dyn Des,
    ser: &mut dyn Ser,
    root: &Mn,
    vtype: &ValueType,
    path: &Path,
    src: Expr,
    dst: Expr,
    ctx: &mut GenCtx,
) -> Result<Expr, Error> {
    bind(ctx, "src", src, |ctx, src| {
        let framed = ser.nullable(root, path, dst, ctx);
        bind(ctx, "dst", framed, |ctx, dst| {
            let cond = des.is_null(root, path, src.clone(), ctx);
            let when_null = Expr::pair(
                des.dnull(vtype, root, path, src.clone(), ctx),
                ser.snull(vtype, root, path, dst.clone(), ctx),
            );
            let src = des.dnotnull(vtype, root, path, src, ctx);
            let dst = ser.snotnull(vtype, root, path, dst, ctx);
            let when_value = bind(ctx, "src", src, |ctx, src| {
                bind(ctx, "dst", dst, |ctx, dst| {
                    walk_vtype(des, ser, root, vtype, path, src, dst, ctx)
                })
            })?;
            Ok(Expr::choose(cond, when_null, when_value))
        })
    })
}

#[allow(clippy::too_many_arguments)]
fn walk_vtype(
    des: &mut dyn Des,
    ser: &mut dyn Ser,
    root: &Mn,
    vtype: &ValueType,
    path: &Path,
    src: Expr,
    dst: Expr,
    ctx: &mut GenCtx,
) -> Result<Expr, Error> {
    match vtype {
        ValueType::Mac(mac) => {
            let read = des.dmac(*mac, root, path, src, ctx);
            bind(ctx, "read", read, |ctx, read| {
                let dst = ser.smac(*mac, root, path, Expr::fst(read.clone()), dst, ctx);
                Ok(Expr::pair(Expr::snd(read), dst))
            })
        }
        ValueType::Usr(user) => {
            // User types serialise as their definition.
            walk(des, ser, root, &user.def, path, src, dst, ctx)
        }
        ValueType::Tup(items) => {
            let src = des.tup_opn(root, path, src, ctx);
            let dst = ser.tup_opn(root, path, dst, ctx);
            let items = items.clone();
            let pair = fold(des, ser, root, path, &Group::Tup, &items, 0, src, dst, ctx)?;
            bind(ctx, "tup", pair, |ctx, pair| {
                Ok(Expr::pair(
                    des.tup_cls(root, path, Expr::fst(pair.clone()), ctx),
                    ser.tup_cls(root, path, Expr::snd(pair), ctx),
                ))
            })
        }
        ValueType::Rec(fields) => {
            let src = des.rec_opn(root, path, src, ctx);
            let dst = ser.rec_opn(root, path, dst, ctx);
            let names = fields.iter().map(|(name, _)| name.clone()).collect();
            let items: Vec<Mn> = fields.iter().map(|(_, mn)| mn.clone()).collect();
            let pair = fold(
                des,
                ser,
                root,
                path,
                &Group::Rec(names),
                &items,
                0,
                src,
                dst,
                ctx,
            )?;
            bind(ctx, "rec", pair, |ctx, pair| {
                Ok(Expr::pair(
                    des.rec_cls(root, path, Expr::fst(pair.clone()), ctx),
                    ser.rec_cls(root, path, Expr::snd(pair), ctx),
                ))
            })
        }
        ValueType::Vec(dim, item) => {
            // Straight-line code, one iteration per index.
            let src = des.vec_opn(root, path, src, ctx);
            let dst = ser.vec_opn(root, path, dst, ctx);
            let items = vec![(**item).clone(); *dim as usize];
            let pair = fold(des, ser, root, path, &Group::Vec, &items, 0, src, dst, ctx)?;
            bind(ctx, "vec", pair, |ctx, pair| {
                Ok(Expr::pair(
                    des.vec_cls(root, path, Expr::fst(pair.clone()), ctx),
                    ser.vec_cls(root, path, Expr::snd(pair), ctx),
                ))
            })
        }
        ValueType::List(item) => match des.list_opn() {
            ListOpener::KnownSize => {
                walk_list_known(des, ser, root, item, path, src, dst, ctx)
            }
            ListOpener::UnknownSize => {
                walk_list_unknown(des, ser, root, item, path, src, dst, ctx)
            }
        },
        ValueType::Map(_, _) => Err(Error::MapNotSerializable(path.clone())),
    }
}

/// Children of a tuple, record or vector, separators between them.
#[allow(clippy::too_many_arguments)]
fn fold(
    des: &mut dyn Des,
    ser: &mut dyn Ser,
    root: &Mn,
    path: &Path,
    group: &Group,
    items: &[Mn],
    index: usize,
    src: Expr,
    dst: Expr,
    ctx: &mut GenCtx,
) -> Result<Expr, Error> {
    if index == items.len() {
        return Ok(Expr::pair(src, dst));
    }
    let (src, dst) = if index == 0 {
        (src, dst)
    } else {
        match group {
            Group::Tup => (
                des.tup_sep(index, root, path, src, ctx),
                ser.tup_sep(index, root, path, dst, ctx),
            ),
            Group::Rec(names) => (
                des.rec_sep(&names[index], root, path, src, ctx),
                ser.rec_sep(&names[index], root, path, dst, ctx),
            ),
            Group::Vec => (
                des.vec_sep(index, root, path, src, ctx),
                ser.vec_sep(index, root, path, dst, ctx),
            ),
        }
    };
    let child_path = path.child(index);
    let pair = walk(des, ser, root, &items[index], &child_path, src, dst, ctx)?;
    bind(ctx, "fld", pair, |ctx, pair| {
        fold(
            des,
            ser,
            root,
            path,
            group,
            items,
            index + 1,
            Expr::fst(pair.clone()),
            Expr::snd(pair),
            ctx,
        )
    })
}

/// A count-prefixed list: read the count, announce it to the serializer,
/// then a bounded loop with separators everywhere but before index 0.
#[allow(clippy::too_many_arguments)]
fn walk_list_known(
    des: &mut dyn Des,
    ser: &mut dyn Ser,
    root: &Mn,
    item: &Mn,
    path: &Path,
    src: Expr,
    dst: Expr,
    ctx: &mut GenCtx,
) -> Result<Expr, Error> {
    let opened = des.list_opn_known(root, path, item, src, ctx);
    bind(ctx, "lst", opened, |ctx, opened| {
        bind(ctx, "n", Expr::fst(opened.clone()), |ctx, count| {
            let src = Expr::snd(opened);
            let dst = ser.list_opn(root, path, item, Some(count.clone()), dst, ctx)?;

            let accum_type = Type::pair(des.ptr(root), ser.ptr(root));
            let fid = ctx.fresh_fid();
            let index = Expr::param(fid, 0);
            let accum = Expr::param(fid, 1);
            let seped = Expr::choose(
                Expr::eq(index, Expr::i32(0)),
                accum.clone(),
                Expr::pair(
                    des.list_sep(root, path, Expr::fst(accum.clone()), ctx),
                    ser.list_sep(root, path, Expr::snd(accum), ctx),
                ),
            );
            let item_path = path.child(0);
            let body = bind(ctx, "it", seped, |ctx, seped| {
                walk(
                    des,
                    ser,
                    root,
                    item,
                    &item_path,
                    Expr::fst(seped.clone()),
                    Expr::snd(seped),
                    ctx,
                )
            })?;
            let body = Expr::func(fid, vec![Type::i32(), accum_type], body);

            let looped = Expr::quaternary(
                Quaternary::Repeat,
                Expr::i32(0),
                Expr::unary(Unary::ToI32, count),
                body,
                Expr::pair(src, dst),
            );
            bind(ctx, "end", looped, |ctx, looped| {
                Ok(Expr::pair(
                    des.list_cls(root, path, Expr::fst(looped.clone()), ctx),
                    ser.list_cls(root, path, Expr::snd(looped), ctx),
                ))
            })
        })
    })
}

/// A terminated list: a `LoopWhile` guarded by the end-of-list probe,
/// carrying a first-element flag that suppresses the leading separator.
#[allow(clippy::too_many_arguments)]
fn walk_list_unknown(
    des: &mut dyn Des,
    ser: &mut dyn Ser,
    root: &Mn,
    item: &Mn,
    path: &Path,
    src: Expr,
    dst: Expr,
    ctx: &mut GenCtx,
) -> Result<Expr, Error> {
    let dst = ser.list_opn(root, path, item, None, dst, ctx)?;
    let src = des.list_opn_unknown(root, path, item, src, ctx);

    let accum_type = Type::pair(
        Type::bool(),
        Type::pair(des.ptr(root), ser.ptr(root)),
    );

    let cond_fid = ctx.fresh_fid();
    let cond_src = Expr::fst(Expr::snd(Expr::param(cond_fid, 0)));
    let cond = Expr::func(
        cond_fid,
        vec![accum_type.clone()],
        Expr::not(des.is_end_of_list(root, path, cond_src, ctx)),
    );

    let body_fid = ctx.fresh_fid();
    let first = Expr::fst(Expr::param(body_fid, 0));
    let ptrs = Expr::snd(Expr::param(body_fid, 0));
    let seped = Expr::choose(
        first,
        ptrs.clone(),
        Expr::pair(
            des.list_sep(root, path, Expr::fst(ptrs.clone()), ctx),
            ser.list_sep(root, path, Expr::snd(ptrs), ctx),
        ),
    );
    let item_path = path.child(0);
    let walked = bind(ctx, "it", seped, |ctx, seped| {
        walk(
            des,
            ser,
            root,
            item,
            &item_path,
            Expr::fst(seped.clone()),
            Expr::snd(seped),
            ctx,
        )
    })?;
    let body = Expr::func(
        body_fid,
        vec![accum_type],
        Expr::pair(Expr::bool(false), walked),
    );

    let looped = Expr::ternary(
        Ternary::LoopWhile,
        cond,
        body,
        Expr::pair(Expr::bool(true), Expr::pair(src, dst)),
    );
    bind(ctx, "end", looped, |ctx, looped| {
        let ptrs = Expr::snd(looped);
        Ok(Expr::pair(
            des.list_cls(root, path, Expr::fst(ptrs.clone()), ctx),
            ser.list_cls(root, path, Expr::snd(ptrs), ctx),
        ))
    })
}
