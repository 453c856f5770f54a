//! A serializer that discards everything it is asked to write.
//!
//! Useful to skip over a value (the deserializer still advances through
//! the input) and as the cheapest possible `Ser` in benchmarks and tests.

use crate::codec::{Ser, SSize};
use crate::desser::Error;
use crate::expr::{Expr, GenCtx, Type, Unary};
use crate::schema::{Mn, Path, ValueType};

#[derive(Debug, Default)]
pub struct DevNullSer;

macro_rules! devnull_writers {
    ($($method:ident),+ $(,)?) => {
        $(fn $method(
            &mut self,
            _mn: &Mn,
            _path: &Path,
            value: Expr,
            dst: Expr,
            _ctx: &mut GenCtx,
        ) -> Expr {
            // Evaluate the value for its effects, then drop it.
            Expr::seq(vec![Expr::unary(Unary::Ignore, value), dst])
        })+
    };
}

impl Ser for DevNullSer {
    fn name(&self) -> &'static str {
        "dev-null"
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

    devnull_writers!(
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
        _path: &Path,
        _item: &Mn,
        _count: Option<Expr>,
        dst: Expr,
        _ctx: &mut GenCtx,
    ) -> Result<Expr, Error> {
        Ok(dst)
    }

    fn list_cls(&mut self, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        dst
    }

    fn list_sep(&mut self, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        dst
    }

    fn sum_opn(&mut self, label: Expr, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        Expr::seq(vec![Expr::unary(Unary::Ignore, label), dst])
    }

    fn sum_cls(&mut self, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        dst
    }

    fn nullable(&mut self, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        dst
    }

    fn snull(&mut self, _vtype: &ValueType, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        dst
    }

    fn snotnull(&mut self, _vtype: &ValueType, _mn: &Mn, _path: &Path, dst: Expr, _ctx: &mut GenCtx) -> Expr {
        dst
    }

    fn ssize_of(&self, _mn: &Mn, _path: &Path, _value: Expr) -> Option<SSize> {
        Some(SSize::Const(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::sexpr::SExprDes;
    use crate::desser::desser;
    use crate::expr::eval::{self, DataPtr, Env, RtVal};
    use crate::schema::parser::parse;

    #[test]
    fn skips_input_without_output() {
        let mn = parse(0, "{a: u8; b: string}").unwrap();
        let mut ctx = GenCtx::new();
        let expr = desser(
            &mut SExprDes::default(),
            &mut DevNullSer,
            &mn,
            Expr::ident("src"),
            Expr::ident("dst"),
            &mut ctx,
        )
        .unwrap();
        let mut env = Env::new();
        env.bind(
            "src",
            RtVal::DataPtr(DataPtr::of_bytes(b"(7 \"gone\")".to_vec())),
        );
        env.bind("dst", RtVal::DataPtr(DataPtr::of_bytes(Vec::new())));
        let result = eval::eval(&mut env, &expr).unwrap();
        let (src, dst) = result.into_pair().unwrap();
        // All input consumed, nothing produced.
        assert_eq!(src.into_data_ptr().unwrap().offset(), 10);
        assert!(dst.into_data_ptr().unwrap().bytes().is_empty());
    }
}
