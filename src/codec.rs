//! The contract every wire-format codec satisfies.
//!
//! A codec is a pair of modules, a [`Des`]erializer and a [`Ser`]ializer.
//! Every method is a pure function from IR expressions to IR expressions:
//! the codec does not touch bytes itself, it builds the program that will.
//! The generic driver in [`crate::desser`] weaves one `Des` and one `Ser`
//! into a single expression, calling openers, separators and closers in the
//! same tree order on both sides.

pub mod devnull;
pub mod rowbinary;
pub mod sexpr;

use crate::desser::Error;
use crate::expr::{Expr, GenCtx, Type};
use crate::schema::{Mac, Mn, Path, ValueType};

/// How a deserializer frames lists.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ListOpener {
    /// The format carries an explicit element count:
    /// [`Des::list_opn_known`] yields `Pair(count, ptr)`.
    KnownSize,
    /// The format is terminated instead: [`Des::list_opn_unknown`] yields
    /// the advanced pointer and [`Des::is_end_of_list`] is probed before
    /// every element, including the first.
    UnknownSize,
}

/// A static size hint for the serialised form of a value.
#[derive(Debug, Clone, PartialEq)]
pub enum SSize {
    /// Known at generation time.
    Const(usize),
    /// An expression over the already-materialised heap value, of type
    /// `Size`.
    Dyn(Expr),
}

/// A deserializer for one wire format.
///
/// Scalar methods yield `Pair(value, ptr)`; compound and nullability
/// methods yield the advanced pointer.
pub trait Des {
    /// The name used in diagnostics and configuration tables.
    fn name(&self) -> &'static str;

    /// The pointer type this codec reads from.
    fn ptr(&self, mn: &Mn) -> Type;

    /// The configuration options this codec understands, in order, with
    /// their effects.
    fn options(&self) -> &'static [(&'static str, &'static str)] {
        &[]
    }

    fn start(&mut self, mn: &Mn, src: Expr, ctx: &mut GenCtx) -> Expr;
    fn stop(&mut self, mn: &Mn, src: Expr, ctx: &mut GenCtx) -> Expr;

    fn dfloat(&mut self, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;
    fn dstring(&mut self, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;
    fn dbool(&mut self, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;
    fn dchar(&mut self, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;
    fn du8(&mut self, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;
    fn du16(&mut self, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;
    fn du24(&mut self, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;
    fn du32(&mut self, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;
    fn du40(&mut self, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;
    fn du48(&mut self, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;
    fn du56(&mut self, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;
    fn du64(&mut self, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;
    fn du128(&mut self, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;
    fn di8(&mut self, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;
    fn di16(&mut self, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;
    fn di24(&mut self, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;
    fn di32(&mut self, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;
    fn di40(&mut self, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;
    fn di48(&mut self, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;
    fn di56(&mut self, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;
    fn di64(&mut self, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;
    fn di128(&mut self, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;

    /// Dispatch to the scalar reader for `mac`.
    fn dmac(&mut self, mac: Mac, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr {
        match mac {
            Mac::Float => self.dfloat(mn, path, src, ctx),
            Mac::String => self.dstring(mn, path, src, ctx),
            Mac::Bool => self.dbool(mn, path, src, ctx),
            Mac::Char => self.dchar(mn, path, src, ctx),
            Mac::U8 => self.du8(mn, path, src, ctx),
            Mac::U16 => self.du16(mn, path, src, ctx),
            Mac::U24 => self.du24(mn, path, src, ctx),
            Mac::U32 => self.du32(mn, path, src, ctx),
            Mac::U40 => self.du40(mn, path, src, ctx),
            Mac::U48 => self.du48(mn, path, src, ctx),
            Mac::U56 => self.du56(mn, path, src, ctx),
            Mac::U64 => self.du64(mn, path, src, ctx),
            Mac::U128 => self.du128(mn, path, src, ctx),
            Mac::I8 => self.di8(mn, path, src, ctx),
            Mac::I16 => self.di16(mn, path, src, ctx),
            Mac::I24 => self.di24(mn, path, src, ctx),
            Mac::I32 => self.di32(mn, path, src, ctx),
            Mac::I40 => self.di40(mn, path, src, ctx),
            Mac::I48 => self.di48(mn, path, src, ctx),
            Mac::I56 => self.di56(mn, path, src, ctx),
            Mac::I64 => self.di64(mn, path, src, ctx),
            Mac::I128 => self.di128(mn, path, src, ctx),
        }
    }

    fn tup_opn(&mut self, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;
    fn tup_cls(&mut self, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;
    fn tup_sep(&mut self, index: usize, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx)
        -> Expr;
    fn rec_opn(&mut self, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;
    fn rec_cls(&mut self, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;
    fn rec_sep(&mut self, name: &str, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;
    fn vec_opn(&mut self, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;
    fn vec_cls(&mut self, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;
    fn vec_sep(&mut self, index: usize, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx)
        -> Expr;

    /// Which list-framing discipline this format uses.
    fn list_opn(&self) -> ListOpener;

    /// Open a list whose element count is explicit in the stream; yields
    /// `Pair(count, ptr)`. Only called when [`Des::list_opn`] is
    /// [`ListOpener::KnownSize`].
    fn list_opn_known(
        &mut self,
        mn: &Mn,
        path: &Path,
        item: &Mn,
        src: Expr,
        ctx: &mut GenCtx,
    ) -> Expr;

    /// Open a terminated list; yields the advanced pointer. Only called
    /// when [`Des::list_opn`] is [`ListOpener::UnknownSize`].
    fn list_opn_unknown(
        &mut self,
        mn: &Mn,
        path: &Path,
        item: &Mn,
        src: Expr,
        ctx: &mut GenCtx,
    ) -> Expr;

    /// Probe for the end of a terminated list; yields a boolean and does
    /// not advance the pointer.
    fn is_end_of_list(&mut self, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;

    fn list_cls(&mut self, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;
    fn list_sep(&mut self, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;

    /// Open a sum; yields `Pair(label, ptr)` with an u16 label.
    fn sum_opn(&mut self, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;
    fn sum_cls(&mut self, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;

    /// Probe the null marker; yields a boolean and does not advance.
    fn is_null(&mut self, mn: &Mn, path: &Path, src: Expr, ctx: &mut GenCtx) -> Expr;

    /// Consume the null marker.
    fn dnull(
        &mut self,
        vtype: &ValueType,
        mn: &Mn,
        path: &Path,
        src: Expr,
        ctx: &mut GenCtx,
    ) -> Expr;

    /// Consume (or skip) the not-null marker.
    fn dnotnull(
        &mut self,
        vtype: &ValueType,
        mn: &Mn,
        path: &Path,
        src: Expr,
        ctx: &mut GenCtx,
    ) -> Expr;
}

/// A serializer for one wire format.
///
/// Scalar methods take the value to write and yield the advanced pointer.
pub trait Ser {
    fn name(&self) -> &'static str;

    /// The pointer type this codec writes to.
    fn ptr(&self, mn: &Mn) -> Type;

    fn options(&self) -> &'static [(&'static str, &'static str)] {
        &[]
    }

    fn start(&mut self, mn: &Mn, dst: Expr, ctx: &mut GenCtx) -> Expr;
    fn stop(&mut self, mn: &Mn, dst: Expr, ctx: &mut GenCtx) -> Expr;

    fn sfloat(&mut self, mn: &Mn, path: &Path, value: Expr, dst: Expr, ctx: &mut GenCtx) -> Expr;
    fn sstring(&mut self, mn: &Mn, path: &Path, value: Expr, dst: Expr, ctx: &mut GenCtx)
        -> Expr;
    fn sbool(&mut self, mn: &Mn, path: &Path, value: Expr, dst: Expr, ctx: &mut GenCtx) -> Expr;
    fn schar(&mut self, mn: &Mn, path: &Path, value: Expr, dst: Expr, ctx: &mut GenCtx) -> Expr;
    fn su8(&mut self, mn: &Mn, path: &Path, value: Expr, dst: Expr, ctx: &mut GenCtx) -> Expr;
    fn su16(&mut self, mn: &Mn, path: &Path, value: Expr, dst: Expr, ctx: &mut GenCtx) -> Expr;
    fn su24(&mut self, mn: &Mn, path: &Path, value: Expr, dst: Expr, ctx: &mut GenCtx) -> Expr;
    fn su32(&mut self, mn: &Mn, path: &Path, value: Expr, dst: Expr, ctx: &mut GenCtx) -> Expr;
    fn su40(&mut self, mn: &Mn, path: &Path, value: Expr, dst: Expr, ctx: &mut GenCtx) -> Expr;
    fn su48(&mut self, mn: &Mn, path: &Path, value: Expr, dst: Expr, ctx: &mut GenCtx) -> Expr;
    fn su56(&mut self, mn: &Mn, path: &Path, value: Expr, dst: Expr, ctx: &mut GenCtx) -> Expr;
    fn su64(&mut self, mn: &Mn, path: &Path, value: Expr, dst: Expr, ctx: &mut GenCtx) -> Expr;
    fn su128(&mut self, mn: &Mn, path: &Path, value: Expr, dst: Expr, ctx: &mut GenCtx) -> Expr;
    fn si8(&mut self, mn: &Mn, path: &Path, value: Expr, dst: Expr, ctx: &mut GenCtx) -> Expr;
    fn si16(&mut self, mn: &Mn, path: &Path, value: Expr, dst: Expr, ctx: &mut GenCtx) -> Expr;
    fn si24(&mut self, mn: &Mn, path: &Path, value: Expr, dst: Expr, ctx: &mut GenCtx) -> Expr;
    fn si32(&mut self, mn: &Mn, path: &Path, value: Expr, dst: Expr, ctx: &mut GenCtx) -> Expr;
    fn si40(&mut self, mn: &Mn, path: &Path, value: Expr, dst: Expr, ctx: &mut GenCtx) -> Expr;
    fn si48(&mut self, mn: &Mn, path: &Path, value: Expr, dst: Expr, ctx: &mut GenCtx) -> Expr;
    fn si56(&mut self, mn: &Mn, path: &Path, value: Expr, dst: Expr, ctx: &mut GenCtx) -> Expr;
    fn si64(&mut self, mn: &Mn, path: &Path, value: Expr, dst: Expr, ctx: &mut GenCtx) -> Expr;
    fn si128(&mut self, mn: &Mn, path: &Path, value: Expr, dst: Expr, ctx: &mut GenCtx) -> Expr;

    /// Dispatch to the scalar writer for `mac`.
    fn smac(
        &mut self,
        mac: Mac,
        mn: &Mn,
        path: &Path,
        value: Expr,
        dst: Expr,
        ctx: &mut GenCtx,
    ) -> Expr {
        match mac {
            Mac::Float => self.sfloat(mn, path, value, dst, ctx),
            Mac::String => self.sstring(mn, path, value, dst, ctx),
            Mac::Bool => self.sbool(mn, path, value, dst, ctx),
            Mac::Char => self.schar(mn, path, value, dst, ctx),
            Mac::U8 => self.su8(mn, path, value, dst, ctx),
            Mac::U16 => self.su16(mn, path, value, dst, ctx),
            Mac::U24 => self.su24(mn, path, value, dst, ctx),
            Mac::U32 => self.su32(mn, path, value, dst, ctx),
            Mac::U40 => self.su40(mn, path, value, dst, ctx),
            Mac::U48 => self.su48(mn, path, value, dst, ctx),
            Mac::U56 => self.su56(mn, path, value, dst, ctx),
            Mac::U64 => self.su64(mn, path, value, dst, ctx),
            Mac::U128 => self.su128(mn, path, value, dst, ctx),
            Mac::I8 => self.si8(mn, path, value, dst, ctx),
            Mac::I16 => self.si16(mn, path, value, dst, ctx),
            Mac::I24 => self.si24(mn, path, value, dst, ctx),
            Mac::I32 => self.si32(mn, path, value, dst, ctx),
            Mac::I40 => self.si40(mn, path, value, dst, ctx),
            Mac::I48 => self.si48(mn, path, value, dst, ctx),
            Mac::I56 => self.si56(mn, path, value, dst, ctx),
            Mac::I64 => self.si64(mn, path, value, dst, ctx),
            Mac::I128 => self.si128(mn, path, value, dst, ctx),
        }
    }

    fn tup_opn(&mut self, mn: &Mn, path: &Path, dst: Expr, ctx: &mut GenCtx) -> Expr;
    fn tup_cls(&mut self, mn: &Mn, path: &Path, dst: Expr, ctx: &mut GenCtx) -> Expr;
    fn tup_sep(&mut self, index: usize, mn: &Mn, path: &Path, dst: Expr, ctx: &mut GenCtx)
        -> Expr;
    fn rec_opn(&mut self, mn: &Mn, path: &Path, dst: Expr, ctx: &mut GenCtx) -> Expr;
    fn rec_cls(&mut self, mn: &Mn, path: &Path, dst: Expr, ctx: &mut GenCtx) -> Expr;
    fn rec_sep(&mut self, name: &str, mn: &Mn, path: &Path, dst: Expr, ctx: &mut GenCtx) -> Expr;
    fn vec_opn(&mut self, mn: &Mn, path: &Path, dst: Expr, ctx: &mut GenCtx) -> Expr;
    fn vec_cls(&mut self, mn: &Mn, path: &Path, dst: Expr, ctx: &mut GenCtx) -> Expr;
    fn vec_sep(&mut self, index: usize, mn: &Mn, path: &Path, dst: Expr, ctx: &mut GenCtx)
        -> Expr;

    /// Open a list. `count` is the element count when the deserializer
    /// knows it; formats that require a count fail fast on `None`.
    fn list_opn(
        &mut self,
        mn: &Mn,
        path: &Path,
        item: &Mn,
        count: Option<Expr>,
        dst: Expr,
        ctx: &mut GenCtx,
    ) -> Result<Expr, Error>;

    fn list_cls(&mut self, mn: &Mn, path: &Path, dst: Expr, ctx: &mut GenCtx) -> Expr;
    fn list_sep(&mut self, mn: &Mn, path: &Path, dst: Expr, ctx: &mut GenCtx) -> Expr;

    /// Open a sum with the given u16 label expression.
    fn sum_opn(&mut self, label: Expr, mn: &Mn, path: &Path, dst: Expr, ctx: &mut GenCtx)
        -> Expr;
    fn sum_cls(&mut self, mn: &Mn, path: &Path, dst: Expr, ctx: &mut GenCtx) -> Expr;

    /// Emit framing common to both the null and not-null cases. Called
    /// unconditionally before the branch so that both arms leave the
    /// pointers identically typed.
    fn nullable(&mut self, mn: &Mn, path: &Path, dst: Expr, ctx: &mut GenCtx) -> Expr;

    /// Write the null marker.
    fn snull(
        &mut self,
        vtype: &ValueType,
        mn: &Mn,
        path: &Path,
        dst: Expr,
        ctx: &mut GenCtx,
    ) -> Expr;

    /// Write the not-null marker, if the format has one.
    fn snotnull(
        &mut self,
        vtype: &ValueType,
        mn: &Mn,
        path: &Path,
        dst: Expr,
        ctx: &mut GenCtx,
    ) -> Expr;

    /// A static size hint for the serialised form of the value at `path`,
    /// or `None` when this codec cannot predict sizes.
    fn ssize_of(&self, mn: &Mn, path: &Path, value: Expr) -> Option<SSize> {
        let _ = (mn, path, value);
        None
    }
}
