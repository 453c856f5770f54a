//! Type checking of IR expressions.
//!
//! `type_of` is total over well-typed expressions and deterministic: two
//! calls on equal inputs return equal outputs. Errors carry the offending
//! subterm together with the expected and found types.

use contracts::debug_ensures;
use std::fmt;

use fxhash::FxHashMap;

use crate::expr::{Binary, Expr, FunId, Nullary, Quaternary, Ternary, Type, Unary};
use crate::schema::path::{type_of_path, PathError};
use crate::schema::{Mac, Mn, Path, ValueType};

/// A failed type check. Fatal for the generator run that produced the
/// expression.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeError {
    UndefinedIdentifier {
        name: String,
    },
    UndefinedParameter {
        fid: FunId,
        index: usize,
    },
    Mismatch {
        expr: Expr,
        expected: String,
        found: Type,
    },
    BadPath {
        expr: Expr,
        path: Path,
        error: PathError,
    },
}

impl TypeError {
    fn mismatch(expr: &Expr, expected: impl Into<String>, found: Type) -> TypeError {
        TypeError::Mismatch {
            expr: expr.clone(),
            expected: expected.into(),
            found,
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeError::UndefinedIdentifier { name } => {
                write!(f, "undeclared identifier `{}`", name)
            }
            TypeError::UndefinedParameter { fid, index } => {
                write!(f, "parameter {} of function {} is not in scope", index, fid)
            }
            TypeError::Mismatch {
                expr,
                expected,
                found,
            } => write!(
                f,
                "in `{}`: expected {}, found `{}`",
                expr, expected, found
            ),
            TypeError::BadPath { expr, path, error } => {
                write!(f, "in `{}`: path `{}` is invalid: {}", expr, path, error)
            }
        }
    }
}

impl std::error::Error for TypeError {}

/// Typing environment: identifier names and `(fid, index)` parameter pairs.
#[derive(Debug, Default)]
pub struct Context {
    idents: FxHashMap<String, Type>,
    params: FxHashMap<(FunId, usize), Type>,
}

/// Infer the type of a closed expression.
pub fn type_of(expr: &Expr) -> Result<Type, TypeError> {
    Context::new().type_of(expr)
}

impl Context {
    pub fn new() -> Context {
        Context::default()
    }

    /// Pre-declare an external identifier, e.g. a backend declaration.
    pub fn declare_ident(&mut self, name: &str, r#type: Type) {
        self.idents.insert(name.to_owned(), r#type);
    }

    /// Pre-declare a function parameter. Emitters walking under a binder
    /// need the parameter in scope to query operand types.
    pub fn declare_param(&mut self, fid: FunId, index: usize, r#type: Type) {
        self.params.insert((fid, index), r#type);
    }

    /// Infer the type of `expr` in this environment.
    #[debug_ensures(self.idents.len() == old(self.idents.len()))]
    #[debug_ensures(self.params.len() == old(self.params.len()))]
    pub fn type_of(&mut self, expr: &Expr) -> Result<Type, TypeError> {
        match expr {
            Expr::Nullary(nullary) => self.nullary(nullary),
            Expr::Unary(op, operand) => self.unary(expr, op, operand),
            Expr::Binary(op, first, second) => self.binary(expr, op, first, second),
            Expr::Ternary(op, e0, e1, e2) => self.ternary(expr, op, e0, e1, e2),
            Expr::Quaternary(op, e0, e1, e2, e3) => self.quaternary(expr, op, e0, e1, e2, e3),
            Expr::Seq(exprs) => {
                let mut result = Type::Void;
                for expr in exprs {
                    result = self.type_of(expr)?;
                }
                Ok(result)
            }
            Expr::Function(fid, params, body) => {
                let shadowed = params
                    .iter()
                    .enumerate()
                    .map(|(index, param)| {
                        self.params.insert((*fid, index), param.clone())
                    })
                    .collect::<Vec<_>>();
                let result = self.type_of(body);
                for (index, old) in shadowed.into_iter().enumerate() {
                    match old {
                        Some(old) => self.params.insert((*fid, index), old),
                        None => self.params.remove(&(*fid, index)),
                    };
                }
                Ok(Type::function(params.clone(), result?))
            }
        }
    }

    fn nullary(&mut self, nullary: &Nullary) -> Result<Type, TypeError> {
        Ok(match nullary {
            Nullary::Param(fid, index) => match self.params.get(&(*fid, *index)) {
                Some(r#type) => r#type.clone(),
                None => {
                    return Err(TypeError::UndefinedParameter {
                        fid: *fid,
                        index: *index,
                    })
                }
            },
            Nullary::Identifier(name) => match self.idents.get(name) {
                Some(r#type) => r#type.clone(),
                None => {
                    return Err(TypeError::UndefinedIdentifier { name: name.clone() })
                }
            },
            Nullary::Null(vtype) => Type::Value(Mn::Nullable(vtype.clone())),
            Nullary::Bool(_) => Type::bool(),
            Nullary::Char(_) => Type::char(),
            Nullary::Float(_) => Type::float(),
            Nullary::String(_) => Type::string(),
            Nullary::U8(_) => Type::mac(Mac::U8),
            Nullary::U16(_) => Type::mac(Mac::U16),
            Nullary::U24(_) => Type::mac(Mac::U24),
            Nullary::U32(_) => Type::mac(Mac::U32),
            Nullary::U40(_) => Type::mac(Mac::U40),
            Nullary::U48(_) => Type::mac(Mac::U48),
            Nullary::U56(_) => Type::mac(Mac::U56),
            Nullary::U64(_) => Type::mac(Mac::U64),
            Nullary::U128(_) => Type::mac(Mac::U128),
            Nullary::I8(_) => Type::mac(Mac::I8),
            Nullary::I16(_) => Type::mac(Mac::I16),
            Nullary::I24(_) => Type::mac(Mac::I24),
            Nullary::I32(_) => Type::mac(Mac::I32),
            Nullary::I40(_) => Type::mac(Mac::I40),
            Nullary::I48(_) => Type::mac(Mac::I48),
            Nullary::I56(_) => Type::mac(Mac::I56),
            Nullary::I64(_) => Type::mac(Mac::I64),
            Nullary::I128(_) => Type::mac(Mac::I128),
            Nullary::Bit(_) => Type::Bit,
            Nullary::Byte(_) => Type::Byte,
            Nullary::Word(_) => Type::Word,
            Nullary::DWord(_) => Type::DWord,
            Nullary::QWord(_) => Type::QWord,
            Nullary::OWord(_) => Type::OWord,
            Nullary::Size(_) => Type::Size,
            Nullary::AllocValue(mn) => Type::ValuePtr(mn.clone()),
        })
    }

    fn unary(&mut self, expr: &Expr, op: &Unary, operand: &Expr) -> Result<Type, TypeError> {
        use Unary::*;

        let found = self.type_of(operand)?;
        match op {
            Dump | Ignore => Ok(Type::Void),
            IsNull => match found {
                Type::Value(Mn::Nullable(_)) => Ok(Type::bool()),
                found => Err(TypeError::mismatch(expr, "a nullable value", found)),
            },
            ToNullable => match found {
                Type::Value(Mn::NotNullable(vtype)) => Ok(Type::Value(Mn::Nullable(vtype))),
                found => Err(TypeError::mismatch(expr, "a not-nullable value", found)),
            },
            ToNotNullable => match found {
                Type::Value(Mn::Nullable(vtype)) => Ok(Type::Value(Mn::NotNullable(vtype))),
                found => Err(TypeError::mismatch(expr, "a nullable value", found)),
            },
            Fst => match found {
                Type::Pair(first, _) => Ok(*first),
                found => Err(TypeError::mismatch(expr, "a pair", found)),
            },
            Snd => match found {
                Type::Pair(_, second) => Ok(*second),
                found => Err(TypeError::mismatch(expr, "a pair", found)),
            },
            StringLength => self.expect(expr, found, Type::string(), Type::u32()),
            ListLength => match &found {
                Type::Value(Mn::NotNullable(ValueType::List(_)))
                | Type::Value(Mn::NotNullable(ValueType::Vec(_, _))) => Ok(Type::u32()),
                _ => Err(TypeError::mismatch(expr, "a list or vector value", found)),
            },
            RemSize => self.expect(expr, found, Type::DataPtr, Type::Size),
            Not => self.expect(expr, found, Type::bool(), Type::bool()),
            LogNot => {
                if found.is_integer() {
                    Ok(found)
                } else {
                    Err(TypeError::mismatch(expr, "an integer value", found))
                }
            }
            StringOfInt => {
                if found.is_integer() {
                    Ok(Type::string())
                } else {
                    Err(TypeError::mismatch(expr, "an integer value", found))
                }
            }
            StringOfFloat => self.expect(expr, found, Type::float(), Type::string()),
            StringOfChar => self.expect(expr, found, Type::char(), Type::string()),
            FloatOfString => self.expect(expr, found, Type::string(), Type::float()),
            U8OfString => self.expect(expr, found, Type::string(), Type::mac(Mac::U8)),
            U16OfString => self.expect(expr, found, Type::string(), Type::mac(Mac::U16)),
            U24OfString => self.expect(expr, found, Type::string(), Type::mac(Mac::U24)),
            U32OfString => self.expect(expr, found, Type::string(), Type::mac(Mac::U32)),
            U40OfString => self.expect(expr, found, Type::string(), Type::mac(Mac::U40)),
            U48OfString => self.expect(expr, found, Type::string(), Type::mac(Mac::U48)),
            U56OfString => self.expect(expr, found, Type::string(), Type::mac(Mac::U56)),
            U64OfString => self.expect(expr, found, Type::string(), Type::mac(Mac::U64)),
            U128OfString => self.expect(expr, found, Type::string(), Type::mac(Mac::U128)),
            I8OfString => self.expect(expr, found, Type::string(), Type::mac(Mac::I8)),
            I16OfString => self.expect(expr, found, Type::string(), Type::mac(Mac::I16)),
            I24OfString => self.expect(expr, found, Type::string(), Type::mac(Mac::I24)),
            I32OfString => self.expect(expr, found, Type::string(), Type::mac(Mac::I32)),
            I40OfString => self.expect(expr, found, Type::string(), Type::mac(Mac::I40)),
            I48OfString => self.expect(expr, found, Type::string(), Type::mac(Mac::I48)),
            I56OfString => self.expect(expr, found, Type::string(), Type::mac(Mac::I56)),
            I64OfString => self.expect(expr, found, Type::string(), Type::mac(Mac::I64)),
            I128OfString => self.expect(expr, found, Type::string(), Type::mac(Mac::I128)),
            CharOfU8 => self.expect(expr, found, Type::u8(), Type::char()),
            U8OfChar => self.expect(expr, found, Type::char(), Type::u8()),
            BoolOfBit => self.expect(expr, found, Type::Bit, Type::bool()),
            BitOfBool => self.expect(expr, found, Type::bool(), Type::Bit),
            SizeOfU32 => self.expect(expr, found, Type::u32(), Type::Size),
            U32OfSize => self.expect(expr, found, Type::Size, Type::u32()),
            ByteOfU8 => self.expect(expr, found, Type::u8(), Type::Byte),
            U8OfByte => self.expect(expr, found, Type::Byte, Type::u8()),
            WordOfU16 => self.expect(expr, found, Type::u16(), Type::Word),
            U16OfWord => self.expect(expr, found, Type::Word, Type::u16()),
            DWordOfU32 => self.expect(expr, found, Type::u32(), Type::DWord),
            U32OfDWord => self.expect(expr, found, Type::DWord, Type::u32()),
            QWordOfU64 => self.expect(expr, found, Type::u64(), Type::QWord),
            U64OfQWord => self.expect(expr, found, Type::QWord, Type::u64()),
            OWordOfU128 => self.expect(expr, found, Type::mac(Mac::U128), Type::OWord),
            U128OfOWord => self.expect(expr, found, Type::OWord, Type::mac(Mac::U128)),
            FloatOfQWord => self.expect(expr, found, Type::QWord, Type::float()),
            QWordOfFloat => self.expect(expr, found, Type::float(), Type::QWord),
            BytesOfString => self.expect(expr, found, Type::string(), Type::Bytes),
            StringOfBytes => self.expect(expr, found, Type::Bytes, Type::string()),
            ToU8 | ToU16 | ToU24 | ToU32 | ToU40 | ToU48 | ToU56 | ToU64 | ToU128 | ToI8
            | ToI16 | ToI24 | ToI32 | ToI40 | ToI48 | ToI56 | ToI64 | ToI128 => {
                if found.is_integer() {
                    Ok(Type::mac(to_width(op)))
                } else {
                    Err(TypeError::mismatch(expr, "an integer value", found))
                }
            }
            ReadByte => self.expect(
                expr,
                found,
                Type::DataPtr,
                Type::pair(Type::Byte, Type::DataPtr),
            ),
            ReadWord(_) => self.expect(
                expr,
                found,
                Type::DataPtr,
                Type::pair(Type::Word, Type::DataPtr),
            ),
            ReadDWord(_) => self.expect(
                expr,
                found,
                Type::DataPtr,
                Type::pair(Type::DWord, Type::DataPtr),
            ),
            ReadQWord(_) => self.expect(
                expr,
                found,
                Type::DataPtr,
                Type::pair(Type::QWord, Type::DataPtr),
            ),
            ReadOWord(_) => self.expect(
                expr,
                found,
                Type::DataPtr,
                Type::pair(Type::OWord, Type::DataPtr),
            ),
            PeekWord(_) => self.expect(expr, found, Type::DataPtr, Type::Word),
            PeekDWord(_) => self.expect(expr, found, Type::DataPtr, Type::DWord),
            PeekQWord(_) => self.expect(expr, found, Type::DataPtr, Type::QWord),
            PeekOWord(_) => self.expect(expr, found, Type::DataPtr, Type::OWord),
            DataPtrPush | DataPtrPop => self.expect(expr, found, Type::DataPtr, Type::DataPtr),
            DerefValuePtr => match found {
                Type::ValuePtr(mn) => Ok(Type::Value(mn)),
                found => Err(TypeError::mismatch(expr, "a value pointer", found)),
            },
            GetField(path) => {
                let mn = self.value_ptr_schema(expr, found)?;
                let target = self.at_path(expr, &mn, path)?;
                Ok(Type::Value(target))
            }
            FieldIsNull(path) => {
                let mn = self.value_ptr_schema(expr, found.clone())?;
                let target = self.at_path(expr, &mn, path)?;
                if target.is_nullable() {
                    Ok(Type::bool())
                } else {
                    Err(TypeError::mismatch(expr, "a path to a nullable slot", found))
                }
            }
            SetFieldNull(path) => {
                let mn = self.value_ptr_schema(expr, found.clone())?;
                let target = self.at_path(expr, &mn, path)?;
                if target.is_nullable() {
                    Ok(Type::ValuePtr(mn))
                } else {
                    Err(TypeError::mismatch(expr, "a path to a nullable slot", found))
                }
            }
            ListBegin(path) | ListNext(path) | ListEnd(path) => {
                let mn = self.value_ptr_schema(expr, found.clone())?;
                let target = self.at_path(expr, &mn, path)?;
                match target.vtype().resolved() {
                    ValueType::List(_) => Ok(Type::ValuePtr(mn)),
                    _ => Err(TypeError::mismatch(expr, "a path to a list slot", found)),
                }
            }
        }
    }

    fn binary(
        &mut self,
        expr: &Expr,
        op: &Binary,
        first: &Expr,
        second: &Expr,
    ) -> Result<Type, TypeError> {
        use Binary::*;

        // `Let` types its body under an extended environment.
        if let Let(name) = op {
            let value = self.type_of(first)?;
            let shadowed = self.idents.insert(name.clone(), value);
            let result = self.type_of(second);
            match shadowed {
                Some(old) => self.idents.insert(name.clone(), old),
                None => self.idents.remove(name),
            };
            return result;
        }

        let t0 = self.type_of(first)?;
        let t1 = self.type_of(second)?;
        match op {
            Gt | Ge | Eq | Ne => {
                if t0 != t1 {
                    Err(TypeError::mismatch(expr, format!("`{}`", t0), t1))
                } else if !t0.is_comparable() {
                    Err(TypeError::mismatch(expr, "a comparable type", t0))
                } else {
                    Ok(Type::bool())
                }
            }
            Add | Sub | Mul | Div | Rem => {
                if t0 != t1 {
                    Err(TypeError::mismatch(expr, format!("`{}`", t0), t1))
                } else if !t0.is_numeric() && t0 != Type::Size {
                    Err(TypeError::mismatch(expr, "a numeric value", t0))
                } else {
                    Ok(t0)
                }
            }
            LogAnd | LogOr | LogXor => {
                if t0 != t1 {
                    Err(TypeError::mismatch(expr, format!("`{}`", t0), t1))
                } else if !t0.is_integer() {
                    Err(TypeError::mismatch(expr, "an integer value", t0))
                } else {
                    Ok(t0)
                }
            }
            LeftShift | RightShift => {
                if !t0.is_integer() {
                    Err(TypeError::mismatch(expr, "an integer value", t0))
                } else if t1 != Type::u8() {
                    Err(TypeError::mismatch(expr, "an u8 shift count", t1))
                } else {
                    Ok(t0)
                }
            }
            And | Or => {
                self.expect(expr, t0, Type::bool(), Type::Void)?;
                self.expect(expr, t1, Type::bool(), Type::bool())
            }
            AppendBytes => {
                self.expect(expr, t0, Type::Bytes, Type::Void)?;
                self.expect(expr, t1, Type::Bytes, Type::Bytes)
            }
            AppendString => {
                self.expect(expr, t0, Type::string(), Type::Void)?;
                self.expect(expr, t1, Type::string(), Type::string())
            }
            TestBit => {
                self.expect(expr, t0, Type::DataPtr, Type::Void)?;
                self.expect(expr, t1, Type::u32(), Type::Bit)
            }
            ReadBytes => {
                self.expect(expr, t0, Type::DataPtr, Type::Void)?;
                self.expect(expr, t1, Type::Size, Type::pair(Type::Bytes, Type::DataPtr))
            }
            PeekByte => {
                self.expect(expr, t0, Type::DataPtr, Type::Void)?;
                self.expect(expr, t1, Type::Size, Type::Byte)
            }
            WriteByte | PokeByte => {
                self.expect(expr, t0, Type::DataPtr, Type::Void)?;
                self.expect(expr, t1, Type::Byte, Type::DataPtr)
            }
            WriteBytes => {
                self.expect(expr, t0, Type::DataPtr, Type::Void)?;
                self.expect(expr, t1, Type::Bytes, Type::DataPtr)
            }
            WriteWord(_) => {
                self.expect(expr, t0, Type::DataPtr, Type::Void)?;
                self.expect(expr, t1, Type::Word, Type::DataPtr)
            }
            WriteDWord(_) => {
                self.expect(expr, t0, Type::DataPtr, Type::Void)?;
                self.expect(expr, t1, Type::DWord, Type::DataPtr)
            }
            WriteQWord(_) => {
                self.expect(expr, t0, Type::DataPtr, Type::Void)?;
                self.expect(expr, t1, Type::QWord, Type::DataPtr)
            }
            WriteOWord(_) => {
                self.expect(expr, t0, Type::DataPtr, Type::Void)?;
                self.expect(expr, t1, Type::OWord, Type::DataPtr)
            }
            DataPtrAdd => {
                self.expect(expr, t0, Type::DataPtr, Type::Void)?;
                self.expect(expr, t1, Type::Size, Type::DataPtr)
            }
            DataPtrSub => {
                self.expect(expr, t0, Type::DataPtr, Type::Void)?;
                self.expect(expr, t1, Type::DataPtr, Type::Size)
            }
            Coalesce => match t0 {
                Type::Value(Mn::Nullable(vtype)) => {
                    let not_null = Type::Value(Mn::NotNullable(vtype));
                    self.expect(expr, t1, not_null.clone(), not_null)
                }
                t0 => Err(TypeError::mismatch(expr, "a nullable value", t0)),
            },
            Pair => Ok(Type::pair(t0, t1)),
            MapPair => match (t0, t1) {
                (Type::Pair(first, second), Type::Function(params, result))
                    if params.len() == 2 && params[0] == *first && params[1] == *second =>
                {
                    Ok(*result)
                }
                (t0, _) => Err(TypeError::mismatch(
                    expr,
                    "a pair and a matching binary function",
                    t0,
                )),
            },
            SetField(path) => {
                let mn = self.value_ptr_schema(expr, t1)?;
                let target = self.at_path(expr, &mn, path)?;
                if t0 == Type::Value(target) {
                    Ok(Type::ValuePtr(mn))
                } else {
                    Err(TypeError::mismatch(
                        expr,
                        format!("a value for slot `{}`", path),
                        t0,
                    ))
                }
            }
            Let(_) => unreachable!("handled above"),
        }
    }

    fn ternary(
        &mut self,
        expr: &Expr,
        op: &Ternary,
        e0: &Expr,
        e1: &Expr,
        e2: &Expr,
    ) -> Result<Type, TypeError> {
        use Ternary::*;

        let t0 = self.type_of(e0)?;
        let t1 = self.type_of(e1)?;
        let t2 = self.type_of(e2)?;
        match op {
            SetBit => {
                self.expect(expr, t0, Type::DataPtr, Type::Void)?;
                self.expect(expr, t1, Type::u32(), Type::Void)?;
                self.expect(expr, t2, Type::Bit, Type::DataPtr)
            }
            BlitByte => {
                self.expect(expr, t0, Type::DataPtr, Type::Void)?;
                self.expect(expr, t1, Type::Byte, Type::Void)?;
                self.expect(expr, t2, Type::Size, Type::DataPtr)
            }
            Choose => {
                self.expect(expr, t0, Type::bool(), Type::Void)?;
                if t1 == t2 {
                    Ok(t1)
                } else {
                    Err(TypeError::mismatch(expr, format!("`{}`", t1), t2))
                }
            }
            LoopWhile => {
                // cond: accum -> bool, body: accum -> accum, init: accum
                let accum = t2;
                self.expect_function(expr, &t0, &[accum.clone()], &Type::bool())?;
                self.expect_function(expr, &t1, &[accum.clone()], &accum)?;
                Ok(accum)
            }
            LoopUntil => {
                // body: accum -> accum, cond: accum -> bool, init: accum
                let accum = t2;
                self.expect_function(expr, &t0, &[accum.clone()], &accum)?;
                self.expect_function(expr, &t1, &[accum.clone()], &Type::bool())?;
                Ok(accum)
            }
        }
    }

    fn quaternary(
        &mut self,
        expr: &Expr,
        op: &Quaternary,
        e0: &Expr,
        e1: &Expr,
        e2: &Expr,
        e3: &Expr,
    ) -> Result<Type, TypeError> {
        let t0 = self.type_of(e0)?;
        let t1 = self.type_of(e1)?;
        let t2 = self.type_of(e2)?;
        let t3 = self.type_of(e3)?;
        match op {
            // cond: byte -> bool, reduce: (accum, byte) -> accum
            Quaternary::ReadWhile => {
                let accum = t2;
                self.expect_function(expr, &t0, &[Type::Byte], &Type::bool())?;
                self.expect_function(expr, &t1, &[accum.clone(), Type::Byte], &accum)?;
                self.expect(
                    expr,
                    t3,
                    Type::DataPtr,
                    Type::pair(accum, Type::DataPtr),
                )
            }
            // from, to: i32; body: (i32, accum) -> accum
            Quaternary::Repeat => {
                let accum = t3;
                self.expect(expr, t0, Type::i32(), Type::Void)?;
                self.expect(expr, t1, Type::i32(), Type::Void)?;
                self.expect_function(expr, &t2, &[Type::i32(), accum.clone()], &accum)?;
                Ok(accum)
            }
        }
    }

    fn expect(
        &self,
        expr: &Expr,
        found: Type,
        expected: Type,
        result: Type,
    ) -> Result<Type, TypeError> {
        if found == expected {
            Ok(result)
        } else {
            Err(TypeError::mismatch(expr, format!("`{}`", expected), found))
        }
    }

    fn expect_function(
        &self,
        expr: &Expr,
        found: &Type,
        params: &[Type],
        result: &Type,
    ) -> Result<(), TypeError> {
        let expected = Type::function(params.to_vec(), result.clone());
        if *found == expected {
            Ok(())
        } else {
            Err(TypeError::mismatch(
                expr,
                format!("`{}`", expected),
                found.clone(),
            ))
        }
    }

    fn value_ptr_schema(&self, expr: &Expr, found: Type) -> Result<Mn, TypeError> {
        match found {
            Type::ValuePtr(mn) => Ok(mn),
            found => Err(TypeError::mismatch(expr, "a value pointer", found)),
        }
    }

    fn at_path(&self, expr: &Expr, mn: &Mn, path: &Path) -> Result<Mn, TypeError> {
        type_of_path(mn, path).map_err(|error| TypeError::BadPath {
            expr: expr.clone(),
            path: path.clone(),
            error,
        })
    }
}

const fn to_width(op: &Unary) -> Mac {
    match op {
        Unary::ToU8 => Mac::U8,
        Unary::ToU16 => Mac::U16,
        Unary::ToU24 => Mac::U24,
        Unary::ToU32 => Mac::U32,
        Unary::ToU40 => Mac::U40,
        Unary::ToU48 => Mac::U48,
        Unary::ToU56 => Mac::U56,
        Unary::ToU64 => Mac::U64,
        Unary::ToU128 => Mac::U128,
        Unary::ToI8 => Mac::I8,
        Unary::ToI16 => Mac::I16,
        Unary::ToI24 => Mac::I24,
        Unary::ToI32 => Mac::I32,
        Unary::ToI40 => Mac::I40,
        Unary::ToI48 => Mac::I48,
        Unary::ToI56 => Mac::I56,
        Unary::ToI64 => Mac::I64,
        Unary::ToI128 => Mac::I128,
        _ => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::GenCtx;

    #[test]
    fn constants() {
        assert_eq!(type_of(&Expr::u8(7)), Ok(Type::u8()));
        assert_eq!(
            type_of(&Expr::null(ValueType::Mac(Mac::U8))),
            Ok(Type::Value(Mn::Nullable(ValueType::Mac(Mac::U8))))
        );
    }

    #[test]
    fn arithmetic_requires_identical_operands() {
        assert_eq!(
            type_of(&Expr::add(Expr::u8(1), Expr::u8(2))),
            Ok(Type::u8())
        );
        assert!(type_of(&Expr::add(Expr::u8(1), Expr::u16(2))).is_err());
    }

    #[test]
    fn undeclared_identifiers_are_fatal() {
        assert_eq!(
            type_of(&Expr::ident("ghost")),
            Err(TypeError::UndefinedIdentifier {
                name: "ghost".to_owned()
            })
        );
    }

    #[test]
    fn let_binds_and_shadows() {
        let expr = Expr::let_(
            "x",
            Expr::u8(1),
            Expr::let_("x", Expr::bool(true), Expr::ident("x")),
        );
        assert_eq!(type_of(&expr), Ok(Type::bool()));
    }

    #[test]
    fn choose_branches_must_agree() {
        let good = Expr::choose(Expr::bool(true), Expr::u8(1), Expr::u8(2));
        assert_eq!(type_of(&good), Ok(Type::u8()));
        let bad = Expr::choose(Expr::bool(true), Expr::u8(1), Expr::u16(2));
        assert!(type_of(&bad).is_err());
    }

    #[test]
    fn functions_and_params() {
        let mut ctx = GenCtx::new();
        let fid = ctx.fresh_fid();
        let func = Expr::func(
            fid,
            vec![Type::u32()],
            Expr::add(Expr::param(fid, 0), Expr::u32(1)),
        );
        assert_eq!(
            type_of(&func),
            Ok(Type::function(vec![Type::u32()], Type::u32()))
        );
    }

    #[test]
    fn loops_check_their_function_shapes() {
        let mut ctx = GenCtx::new();
        let cond_fid = ctx.fresh_fid();
        let body_fid = ctx.fresh_fid();
        let cond = Expr::func(
            cond_fid,
            vec![Type::u32()],
            Expr::gt(Expr::u32(10), Expr::param(cond_fid, 0)),
        );
        let body = Expr::func(
            body_fid,
            vec![Type::u32()],
            Expr::add(Expr::param(body_fid, 0), Expr::u32(1)),
        );
        let good = Expr::ternary(Ternary::LoopWhile, cond.clone(), body, Expr::u32(0));
        assert_eq!(type_of(&good), Ok(Type::u32()));
        let bad = Expr::ternary(Ternary::LoopWhile, cond.clone(), cond, Expr::u32(0));
        assert!(type_of(&bad).is_err());
    }

    #[test]
    fn heap_ops_follow_paths() {
        let root = crate::schema::parser::parse(0, "{a: u8; b: string?}").unwrap();
        let vptr = Expr::alloc_value(root);
        let get = Expr::unary(Unary::GetField(Path(vec![0])), vptr.clone());
        assert_eq!(type_of(&get), Ok(Type::u8()));
        let bad = Expr::unary(Unary::GetField(Path(vec![2])), vptr.clone());
        assert!(matches!(type_of(&bad), Err(TypeError::BadPath { .. })));
        let is_null = Expr::unary(Unary::FieldIsNull(Path(vec![1])), vptr);
        assert_eq!(type_of(&is_null), Ok(Type::bool()));
    }

    #[test]
    fn type_of_is_deterministic() {
        let expr = Expr::pair(Expr::u8(1), Expr::string("x"));
        assert_eq!(type_of(&expr), type_of(&expr));
    }
}
