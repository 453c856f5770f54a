//! An interpreter for closed, well-typed IR expressions.
//!
//! The test suite uses it to validate codec round trips in-process, without
//! going through a backend and an external compiler. Runtime errors here
//! mirror the aborts a generated converter performs: buffer exhaustion,
//! malformed encodings and out-of-range numeric parses.

use fxhash::FxHashMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::expr::{Binary, Endianness, Expr, FunId, Nullary, Quaternary, Ternary, Unary};
use crate::literal;
use crate::schema::{Mac, Mn, Path, ValueType};

/// Runtime failure of an interpreted expression.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    BufferExhausted,
    MalformedInput(String),
    DivisionByZero,
    /// Shape violations that a prior type check would have caught.
    Internal(&'static str),
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::BufferExhausted => write!(f, "input exhausted"),
            EvalError::MalformedInput(what) => write!(f, "malformed input: {}", what),
            EvalError::DivisionByZero => write!(f, "division by zero"),
            EvalError::Internal(what) => write!(f, "internal evaluation error: {}", what),
        }
    }
}

impl std::error::Error for EvalError {}

type Result<T> = std::result::Result<T, EvalError>;

/// A schema-shaped heap value. Integers of every width share one variant
/// carrying their two's complement bit pattern truncated to the width.
#[derive(Debug, Clone, PartialEq)]
pub enum HeapVal {
    Null,
    Bool(bool),
    Char(char),
    Float(f64),
    Str(String),
    Int(Mac, u128),
    Vec(Vec<HeapVal>),
    List(Vec<HeapVal>),
    Tup(Vec<HeapVal>),
    Rec(Vec<(String, HeapVal)>),
}

impl HeapVal {
    /// The default skeleton for a schema: zeroes, empty strings and lists,
    /// `Null` for nullable slots.
    pub fn default_of(mn: &Mn) -> Result<HeapVal> {
        if mn.is_nullable() {
            return Ok(HeapVal::Null);
        }
        HeapVal::default_of_vtype(mn.vtype())
    }

    fn default_of_vtype(vtype: &ValueType) -> Result<HeapVal> {
        Ok(match vtype {
            ValueType::Mac(Mac::Bool) => HeapVal::Bool(false),
            ValueType::Mac(Mac::Char) => HeapVal::Char('\0'),
            ValueType::Mac(Mac::Float) => HeapVal::Float(0.0),
            ValueType::Mac(Mac::String) => HeapVal::Str(String::new()),
            ValueType::Mac(mac) => HeapVal::Int(*mac, 0),
            ValueType::Usr(user) => HeapVal::default_of(&user.def)?,
            ValueType::Vec(dim, item) => {
                let item = HeapVal::default_of(item)?;
                HeapVal::Vec(vec![item; *dim as usize])
            }
            ValueType::List(_) => HeapVal::List(Vec::new()),
            ValueType::Tup(items) => HeapVal::Tup(
                items
                    .iter()
                    .map(HeapVal::default_of)
                    .collect::<Result<_>>()?,
            ),
            ValueType::Rec(fields) => HeapVal::Rec(
                fields
                    .iter()
                    .map(|(name, mn)| Ok((name.clone(), HeapVal::default_of(mn)?)))
                    .collect::<Result<_>>()?,
            ),
            ValueType::Map(_, _) => {
                return Err(EvalError::Internal("no runtime value exists for maps"))
            }
        })
    }
}

/// A cursor into a byte stream. The buffer is shared; the offset is a
/// value, so pointer arithmetic stays functional.
#[derive(Debug, Clone)]
pub struct DataPtr {
    buf: Rc<RefCell<Vec<u8>>>,
    off: usize,
    saved: Vec<usize>,
}

impl DataPtr {
    pub fn of_bytes(bytes: Vec<u8>) -> DataPtr {
        DataPtr {
            buf: Rc::new(RefCell::new(bytes)),
            off: 0,
            saved: Vec::new(),
        }
    }

    pub fn offset(&self) -> usize {
        self.off
    }

    /// A copy of the whole underlying buffer.
    pub fn bytes(&self) -> Vec<u8> {
        self.buf.borrow().clone()
    }

    fn rem(&self) -> usize {
        self.buf.borrow().len().saturating_sub(self.off)
    }

    fn peek(&self, delta: usize) -> Result<u8> {
        self.buf
            .borrow()
            .get(self.off + delta)
            .copied()
            .ok_or(EvalError::BufferExhausted)
    }

    fn advanced(&self, delta: usize) -> DataPtr {
        DataPtr {
            buf: self.buf.clone(),
            off: self.off + delta,
            saved: self.saved.clone(),
        }
    }

    fn read(&self, len: usize) -> Result<(Vec<u8>, DataPtr)> {
        let buf = self.buf.borrow();
        let end = self.off + len;
        if end > buf.len() {
            return Err(EvalError::BufferExhausted);
        }
        let bytes = buf[self.off..end].to_vec();
        drop(buf);
        Ok((bytes, self.advanced(len)))
    }

    /// Write at the cursor, growing the buffer if the cursor sits at its
    /// end, and advance.
    fn write(&self, bytes: &[u8]) -> DataPtr {
        let mut buf = self.buf.borrow_mut();
        for (delta, byte) in bytes.iter().enumerate() {
            let at = self.off + delta;
            if at < buf.len() {
                buf[at] = *byte;
            } else {
                buf.resize(at, 0);
                buf.push(*byte);
            }
        }
        drop(buf);
        self.advanced(bytes.len())
    }

    /// Write at the cursor without advancing.
    fn poke(&self, byte: u8) -> DataPtr {
        self.write(&[byte]);
        self.clone()
    }

    fn push(&self) -> DataPtr {
        let mut ptr = self.clone();
        ptr.saved.push(ptr.off);
        ptr
    }

    fn pop(&self) -> Result<DataPtr> {
        let mut ptr = self.clone();
        ptr.off = ptr
            .saved
            .pop()
            .ok_or(EvalError::Internal("pop on an unsaved pointer"))?;
        Ok(ptr)
    }
}

/// Per-list-instance traversal state, keyed by the resolved dynamic path
/// of the list.
#[derive(Debug, Default, Clone)]
struct ListState {
    cursor: usize,
    elem_open: bool,
}

/// Whether a value pointer was freshly allocated (writes build the value)
/// or wraps an existing value (reads walk it).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum PtrMode {
    Read,
    Write,
}

/// A cursor into an in-memory value of a given schema. The root is shared;
/// list traversal state lives beside it so that element reads and writes
/// advance instance by instance.
#[derive(Debug, Clone)]
pub struct ValuePtr {
    pub mn: Mn,
    mode: PtrMode,
    root: Rc<RefCell<HeapVal>>,
    lists: Rc<RefCell<FxHashMap<Vec<usize>, ListState>>>,
}

impl ValuePtr {
    /// A fresh default-initialised value; writes through it build it up.
    pub fn alloc(mn: &Mn) -> Result<ValuePtr> {
        Ok(ValuePtr {
            mn: mn.clone(),
            mode: PtrMode::Write,
            root: Rc::new(RefCell::new(HeapVal::default_of(mn)?)),
            lists: Rc::new(RefCell::new(FxHashMap::default())),
        })
    }

    /// Wrap an existing value for reading.
    pub fn of_value(mn: &Mn, value: HeapVal) -> ValuePtr {
        ValuePtr {
            mn: mn.clone(),
            mode: PtrMode::Read,
            root: Rc::new(RefCell::new(value)),
            lists: Rc::new(RefCell::new(FxHashMap::default())),
        }
    }

    /// A copy of the value behind the pointer.
    pub fn value(&self) -> HeapVal {
        self.root.borrow().clone()
    }

    pub fn same_root(&self, other: &ValuePtr) -> bool {
        Rc::ptr_eq(&self.root, &other.root)
    }

    /// Navigate to the slot at `path` and hand it to `with`. List crossings
    /// resolve through the instance's element cursor (read mode) or its
    /// open element, appending a fresh one if needed (write mode). In write
    /// mode, compounds that are still `Null` are materialised on the way
    /// down.
    fn slot<T>(
        &self,
        path: &Path,
        with: impl FnOnce(&mut HeapVal) -> Result<T>,
    ) -> Result<T> {
        let mut lists = self.lists.borrow_mut();
        let mut root = self.root.borrow_mut();
        let mut value: &mut HeapVal = &mut root;
        let mut mn = self.mn.clone();
        let mut dynamic = Vec::new();
        for &index in &path.0 {
            if self.mode == PtrMode::Write && matches!(value, HeapVal::Null) {
                *value = HeapVal::default_of(&mn.forced_not_nullable())?;
            }
            let item_mn = match mn.vtype().resolved() {
                ValueType::Vec(_, item) | ValueType::List(item) => (**item).clone(),
                ValueType::Tup(items) => items
                    .get(index)
                    .cloned()
                    .ok_or(EvalError::Internal("index out of bounds"))?,
                ValueType::Rec(fields) => fields
                    .get(index)
                    .map(|(_, mn)| mn.clone())
                    .ok_or(EvalError::Internal("field out of bounds"))?,
                _ => return Err(EvalError::Internal("navigation through a leaf slot")),
            };
            value = match value {
                HeapVal::Vec(items) | HeapVal::Tup(items) => {
                    dynamic.push(index);
                    items
                        .get_mut(index)
                        .ok_or(EvalError::Internal("index out of bounds"))?
                }
                HeapVal::Rec(fields) => {
                    dynamic.push(index);
                    fields
                        .get_mut(index)
                        .map(|(_, value)| value)
                        .ok_or(EvalError::Internal("field out of bounds"))?
                }
                HeapVal::List(items) => {
                    let cursor = match self.mode {
                        PtrMode::Write => {
                            let state = lists.entry(dynamic.clone()).or_default();
                            if !state.elem_open {
                                items.push(HeapVal::default_of(&item_mn)?);
                                state.elem_open = true;
                            }
                            items.len() - 1
                        }
                        PtrMode::Read => {
                            lists.get(&dynamic).map_or(0, |state| state.cursor)
                        }
                    };
                    dynamic.push(cursor);
                    items
                        .get_mut(cursor)
                        .ok_or(EvalError::Internal("list cursor out of bounds"))?
                }
                _ => return Err(EvalError::Internal("navigation through a leaf slot")),
            };
            mn = item_mn;
        }
        with(value)
    }

    fn read_slot(&self, path: &Path) -> Result<HeapVal> {
        self.slot(path, |slot| Ok(slot.clone()))
    }

    fn write_slot(&self, path: &Path, value: HeapVal) -> Result<()> {
        if self.mode != PtrMode::Write {
            return Err(EvalError::Internal("write through a read pointer"));
        }
        self.slot(path, |slot| {
            *slot = value;
            Ok(())
        })
    }

    /// Enter the list at `path`: reset its slot and register fresh
    /// traversal state (write mode), or rewind its element cursor (read
    /// mode).
    fn list_begin(&self, path: &Path) -> Result<()> {
        let key = self.slot(path, |slot| {
            if self.mode == PtrMode::Write {
                *slot = HeapVal::List(Vec::new());
            }
            Ok(())
        })
        .map(|_| self.resolved_key(path))??;
        self.lists.borrow_mut().insert(key, ListState::default());
        Ok(())
    }

    /// Seal the open element (write mode) or advance the cursor (read
    /// mode).
    fn list_next(&self, path: &Path) -> Result<()> {
        let key = self.resolved_key(path)?;
        let mut lists = self.lists.borrow_mut();
        let state = lists.entry(key).or_default();
        if state.elem_open {
            state.elem_open = false;
        } else {
            state.cursor += 1;
        }
        Ok(())
    }

    fn list_end(&self, path: &Path) -> Result<()> {
        let key = self.resolved_key(path)?;
        self.lists.borrow_mut().remove(&key);
        Ok(())
    }

    /// The dynamic path of the node addressed by `path`, resolving list
    /// crossings without touching slot contents.
    fn resolved_key(&self, path: &Path) -> Result<Vec<usize>> {
        let lists = self.lists.borrow();
        let root = self.root.borrow();
        let mut value: &HeapVal = &root;
        let mut dynamic = Vec::new();
        for &index in &path.0 {
            value = match value {
                HeapVal::Vec(items) | HeapVal::Tup(items) => {
                    dynamic.push(index);
                    items
                        .get(index)
                        .ok_or(EvalError::Internal("index out of bounds"))?
                }
                HeapVal::Rec(fields) => {
                    dynamic.push(index);
                    fields
                        .get(index)
                        .map(|(_, value)| value)
                        .ok_or(EvalError::Internal("field out of bounds"))?
                }
                HeapVal::List(items) => {
                    let cursor = match self.mode {
                        PtrMode::Write => items.len().saturating_sub(1),
                        PtrMode::Read => {
                            lists.get(&dynamic).map_or(0, |state| state.cursor)
                        }
                    };
                    dynamic.push(cursor);
                    items
                        .get(cursor)
                        .ok_or(EvalError::Internal("list cursor out of bounds"))?
                }
                _ => return Err(EvalError::Internal("navigation through a leaf slot")),
            };
        }
        Ok(dynamic)
    }
}

/// A runtime value of any IR type.
#[derive(Debug, Clone)]
pub enum RtVal {
    Void,
    Value(HeapVal),
    Bit(bool),
    Byte(u8),
    Word(u16),
    DWord(u32),
    QWord(u64),
    OWord(u128),
    Size(usize),
    Bytes(Vec<u8>),
    DataPtr(DataPtr),
    ValuePtr(ValuePtr),
    Pair(Box<RtVal>, Box<RtVal>),
    Func(Expr),
}

impl RtVal {
    pub fn pair(first: RtVal, second: RtVal) -> RtVal {
        RtVal::Pair(Box::new(first), Box::new(second))
    }

    pub fn into_pair(self) -> Result<(RtVal, RtVal)> {
        match self {
            RtVal::Pair(first, second) => Ok((*first, *second)),
            _ => Err(EvalError::Internal("expected a pair")),
        }
    }

    pub fn into_data_ptr(self) -> Result<DataPtr> {
        match self {
            RtVal::DataPtr(ptr) => Ok(ptr),
            _ => Err(EvalError::Internal("expected a data pointer")),
        }
    }

    pub fn into_value_ptr(self) -> Result<ValuePtr> {
        match self {
            RtVal::ValuePtr(ptr) => Ok(ptr),
            _ => Err(EvalError::Internal("expected a value pointer")),
        }
    }

    pub fn into_heap(self) -> Result<HeapVal> {
        match self {
            RtVal::Value(value) => Ok(value),
            _ => Err(EvalError::Internal("expected a value")),
        }
    }

    fn into_bool(self) -> Result<bool> {
        match self {
            RtVal::Value(HeapVal::Bool(value)) => Ok(value),
            _ => Err(EvalError::Internal("expected a boolean")),
        }
    }

    fn into_byte(self) -> Result<u8> {
        match self {
            RtVal::Byte(value) => Ok(value),
            _ => Err(EvalError::Internal("expected a byte")),
        }
    }

    fn into_size(self) -> Result<usize> {
        match self {
            RtVal::Size(value) => Ok(value),
            _ => Err(EvalError::Internal("expected a size")),
        }
    }

    fn into_str(self) -> Result<String> {
        match self {
            RtVal::Value(HeapVal::Str(value)) => Ok(value),
            _ => Err(EvalError::Internal("expected a string")),
        }
    }

    fn into_int(self) -> Result<(Mac, u128)> {
        match self {
            RtVal::Value(HeapVal::Int(mac, raw)) => Ok((mac, raw)),
            _ => Err(EvalError::Internal("expected an integer")),
        }
    }

    fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            RtVal::Bytes(bytes) => Ok(bytes),
            _ => Err(EvalError::Internal("expected bytes")),
        }
    }
}

fn width_mask(bits: u32) -> u128 {
    if bits >= 128 {
        u128::MAX
    } else {
        (1u128 << bits) - 1
    }
}

fn int_bits(mac: Mac) -> u32 {
    mac.bits().unwrap_or(0)
}

/// Sign-extend a bit pattern into an `i128`.
fn as_signed(mac: Mac, raw: u128) -> i128 {
    let bits = int_bits(mac);
    if bits >= 128 {
        return raw as i128;
    }
    let sign = 1u128 << (bits - 1);
    if mac.is_signed() && raw & sign != 0 {
        (raw | !width_mask(bits)) as i128
    } else {
        raw as i128
    }
}

fn int(mac: Mac, raw: u128) -> RtVal {
    RtVal::Value(HeapVal::Int(mac, raw & width_mask(int_bits(mac))))
}

/// Variable bindings: let-bound names and function parameters.
#[derive(Debug, Default)]
pub struct Env {
    idents: FxHashMap<String, RtVal>,
    params: FxHashMap<(FunId, usize), RtVal>,
}

impl Env {
    pub fn new() -> Env {
        Env::default()
    }

    pub fn bind(&mut self, name: &str, value: RtVal) {
        self.idents.insert(name.to_owned(), value);
    }
}

/// Evaluate a closed expression in an empty environment.
pub fn eval_closed(expr: &Expr) -> Result<RtVal> {
    eval(&mut Env::new(), expr)
}

/// Evaluate an expression.
pub fn eval(env: &mut Env, expr: &Expr) -> Result<RtVal> {
    match expr {
        Expr::Nullary(nullary) => eval_nullary(env, nullary),
        Expr::Unary(op, operand) => {
            let operand = eval(env, operand)?;
            eval_unary(env, op, operand)
        }
        Expr::Binary(Binary::Let(name), value, body) => {
            let value = eval(env, value)?;
            let shadowed = env.idents.insert(name.clone(), value);
            let result = eval(env, body);
            match shadowed {
                Some(old) => env.idents.insert(name.clone(), old),
                None => env.idents.remove(name),
            };
            result
        }
        // Short-circuiting: the right operand of a boolean connective may
        // probe bytes the left operand just ruled out.
        Expr::Binary(Binary::And, first, second) => {
            if eval(env, first)?.into_bool()? {
                eval(env, second)
            } else {
                Ok(RtVal::Value(HeapVal::Bool(false)))
            }
        }
        Expr::Binary(Binary::Or, first, second) => {
            if eval(env, first)?.into_bool()? {
                Ok(RtVal::Value(HeapVal::Bool(true)))
            } else {
                eval(env, second)
            }
        }
        Expr::Binary(op, first, second) => {
            let first = eval(env, first)?;
            let second = eval(env, second)?;
            eval_binary(env, op, first, second)
        }
        Expr::Ternary(Ternary::Choose, cond, then, otherwise) => {
            if eval(env, cond)?.into_bool()? {
                eval(env, then)
            } else {
                eval(env, otherwise)
            }
        }
        Expr::Ternary(op, e0, e1, e2) => {
            let v0 = eval(env, e0)?;
            let v1 = eval(env, e1)?;
            let v2 = eval(env, e2)?;
            eval_ternary(env, op, v0, v1, v2)
        }
        Expr::Quaternary(op, e0, e1, e2, e3) => {
            let v0 = eval(env, e0)?;
            let v1 = eval(env, e1)?;
            let v2 = eval(env, e2)?;
            let v3 = eval(env, e3)?;
            eval_quaternary(env, op, v0, v1, v2, v3)
        }
        Expr::Seq(exprs) => {
            let mut result = RtVal::Void;
            for expr in exprs {
                result = eval(env, expr)?;
            }
            Ok(result)
        }
        Expr::Function(_, _, _) => Ok(RtVal::Func(expr.clone())),
    }
}

/// Apply a function value to arguments.
fn apply(env: &mut Env, func: &RtVal, args: Vec<RtVal>) -> Result<RtVal> {
    let (fid, params, body) = match func {
        RtVal::Func(Expr::Function(fid, params, body)) => (*fid, params, body),
        _ => return Err(EvalError::Internal("expected a function")),
    };
    if params.len() != args.len() {
        return Err(EvalError::Internal("arity mismatch"));
    }
    let shadowed = args
        .into_iter()
        .enumerate()
        .map(|(index, arg)| env.params.insert((fid, index), arg))
        .collect::<Vec<_>>();
    let result = eval(env, body);
    for (index, old) in shadowed.into_iter().enumerate() {
        match old {
            Some(old) => env.params.insert((fid, index), old),
            None => env.params.remove(&(fid, index)),
        };
    }
    result
}

fn eval_nullary(env: &mut Env, nullary: &Nullary) -> Result<RtVal> {
    Ok(match nullary {
        Nullary::Param(fid, index) => env
            .params
            .get(&(*fid, *index))
            .cloned()
            .ok_or(EvalError::Internal("unbound parameter"))?,
        Nullary::Identifier(name) => env
            .idents
            .get(name)
            .cloned()
            .ok_or(EvalError::Internal("unbound identifier"))?,
        Nullary::Null(_) => RtVal::Value(HeapVal::Null),
        Nullary::Bool(value) => RtVal::Value(HeapVal::Bool(*value)),
        Nullary::Char(value) => RtVal::Value(HeapVal::Char(*value)),
        Nullary::Float(value) => RtVal::Value(HeapVal::Float(*value)),
        Nullary::String(value) => RtVal::Value(HeapVal::Str(value.clone())),
        Nullary::U8(value) => int(Mac::U8, *value as u128),
        Nullary::U16(value) => int(Mac::U16, *value as u128),
        Nullary::U24(value) => int(Mac::U24, *value as u128),
        Nullary::U32(value) => int(Mac::U32, *value as u128),
        Nullary::U40(value) => int(Mac::U40, *value as u128),
        Nullary::U48(value) => int(Mac::U48, *value as u128),
        Nullary::U56(value) => int(Mac::U56, *value as u128),
        Nullary::U64(value) => int(Mac::U64, *value as u128),
        Nullary::U128(value) => int(Mac::U128, *value),
        Nullary::I8(value) => int(Mac::I8, *value as u128),
        Nullary::I16(value) => int(Mac::I16, *value as u128),
        Nullary::I24(value) => int(Mac::I24, *value as u128),
        Nullary::I32(value) => int(Mac::I32, *value as u128),
        Nullary::I40(value) => int(Mac::I40, *value as u128),
        Nullary::I48(value) => int(Mac::I48, *value as u128),
        Nullary::I56(value) => int(Mac::I56, *value as u128),
        Nullary::I64(value) => int(Mac::I64, *value as u128),
        Nullary::I128(value) => int(Mac::I128, *value as u128),
        Nullary::Bit(value) => RtVal::Bit(*value),
        Nullary::Byte(value) => RtVal::Byte(*value),
        Nullary::Word(value) => RtVal::Word(*value),
        Nullary::DWord(value) => RtVal::DWord(*value),
        Nullary::QWord(value) => RtVal::QWord(*value),
        Nullary::OWord(value) => RtVal::OWord(*value),
        Nullary::Size(value) => RtVal::Size(*value),
        Nullary::AllocValue(mn) => RtVal::ValuePtr(ValuePtr::alloc(mn)?),
    })
}

fn eval_unary(env: &mut Env, op: &Unary, operand: RtVal) -> Result<RtVal> {
    use Unary::*;

    let _ = env;
    Ok(match op {
        Dump => {
            eprintln!("{:?}", operand);
            RtVal::Void
        }
        Ignore => RtVal::Void,
        IsNull => RtVal::Value(HeapVal::Bool(matches!(
            operand,
            RtVal::Value(HeapVal::Null)
        ))),
        // Nullability is type-level: the heap representation is unchanged.
        ToNullable => operand,
        ToNotNullable => match operand {
            RtVal::Value(HeapVal::Null) => {
                return Err(EvalError::MalformedInput(
                    "null where a value was required".to_owned(),
                ))
            }
            operand => operand,
        },
        Fst => operand.into_pair()?.0,
        Snd => operand.into_pair()?.1,
        StringLength => int(Mac::U32, operand.into_str()?.len() as u128),
        ListLength => match operand {
            RtVal::Value(HeapVal::List(items)) | RtVal::Value(HeapVal::Vec(items)) => {
                int(Mac::U32, items.len() as u128)
            }
            _ => return Err(EvalError::Internal("expected a list value")),
        },
        RemSize => RtVal::Size(operand.into_data_ptr()?.rem()),
        Not => RtVal::Value(HeapVal::Bool(!operand.into_bool()?)),
        LogNot => {
            let (mac, raw) = operand.into_int()?;
            int(mac, !raw)
        }
        StringOfInt => {
            let (mac, raw) = operand.into_int()?;
            let text = if mac.is_signed() {
                as_signed(mac, raw).to_string()
            } else {
                raw.to_string()
            };
            RtVal::Value(HeapVal::Str(text))
        }
        StringOfFloat => match operand {
            RtVal::Value(HeapVal::Float(value)) => {
                RtVal::Value(HeapVal::Str(format!("{:?}", value)))
            }
            _ => return Err(EvalError::Internal("expected a float")),
        },
        StringOfChar => match operand {
            RtVal::Value(HeapVal::Char(value)) => RtVal::Value(HeapVal::Str(value.to_string())),
            _ => return Err(EvalError::Internal("expected a char")),
        },
        FloatOfString => {
            let text = operand.into_str()?;
            let value = text
                .parse()
                .map_err(|_| EvalError::MalformedInput(format!("not a float: {:?}", text)))?;
            RtVal::Value(HeapVal::Float(value))
        }
        U8OfString | U16OfString | U24OfString | U32OfString | U40OfString | U48OfString
        | U56OfString | U64OfString | U128OfString => {
            let mac = parse_target(op);
            let text = operand.into_str()?;
            // 128-bit decimals go through the limb splitter in `literal`.
            let value = literal::parse_uint(&text, int_bits(mac)).ok_or_else(|| {
                EvalError::MalformedInput(format!("not an unsigned integer: {:?}", text))
            })?;
            int(mac, value)
        }
        I8OfString | I16OfString | I24OfString | I32OfString | I40OfString | I48OfString
        | I56OfString | I64OfString | I128OfString => {
            let mac = parse_target(op);
            let text = operand.into_str()?;
            let value = literal::parse_int(&text, int_bits(mac)).ok_or_else(|| {
                EvalError::MalformedInput(format!("not a signed integer: {:?}", text))
            })?;
            int(mac, value as u128)
        }
        CharOfU8 => {
            let (_, raw) = operand.into_int()?;
            RtVal::Value(HeapVal::Char(raw as u8 as char))
        }
        U8OfChar => match operand {
            RtVal::Value(HeapVal::Char(value)) => int(Mac::U8, value as u128),
            _ => return Err(EvalError::Internal("expected a char")),
        },
        BoolOfBit => match operand {
            RtVal::Bit(value) => RtVal::Value(HeapVal::Bool(value)),
            _ => return Err(EvalError::Internal("expected a bit")),
        },
        BitOfBool => RtVal::Bit(operand.into_bool()?),
        SizeOfU32 => RtVal::Size(operand.into_int()?.1 as usize),
        U32OfSize => int(Mac::U32, operand.into_size()? as u128),
        ByteOfU8 => RtVal::Byte(operand.into_int()?.1 as u8),
        U8OfByte => int(Mac::U8, operand.into_byte()? as u128),
        WordOfU16 => RtVal::Word(operand.into_int()?.1 as u16),
        U16OfWord => match operand {
            RtVal::Word(value) => int(Mac::U16, value as u128),
            _ => return Err(EvalError::Internal("expected a word")),
        },
        DWordOfU32 => RtVal::DWord(operand.into_int()?.1 as u32),
        U32OfDWord => match operand {
            RtVal::DWord(value) => int(Mac::U32, value as u128),
            _ => return Err(EvalError::Internal("expected a dword")),
        },
        QWordOfU64 => RtVal::QWord(operand.into_int()?.1 as u64),
        U64OfQWord => match operand {
            RtVal::QWord(value) => int(Mac::U64, value as u128),
            _ => return Err(EvalError::Internal("expected a qword")),
        },
        OWordOfU128 => RtVal::OWord(operand.into_int()?.1),
        U128OfOWord => match operand {
            RtVal::OWord(value) => int(Mac::U128, value),
            _ => return Err(EvalError::Internal("expected an oword")),
        },
        FloatOfQWord => match operand {
            RtVal::QWord(value) => RtVal::Value(HeapVal::Float(f64::from_bits(value))),
            _ => return Err(EvalError::Internal("expected a qword")),
        },
        QWordOfFloat => match operand {
            RtVal::Value(HeapVal::Float(value)) => RtVal::QWord(value.to_bits()),
            _ => return Err(EvalError::Internal("expected a float")),
        },
        BytesOfString => RtVal::Bytes(operand.into_str()?.into_bytes()),
        StringOfBytes => {
            let bytes = operand.into_bytes()?;
            let text = String::from_utf8(bytes)
                .map_err(|_| EvalError::MalformedInput("invalid utf-8".to_owned()))?;
            RtVal::Value(HeapVal::Str(text))
        }
        ToU8 | ToU16 | ToU24 | ToU32 | ToU40 | ToU48 | ToU56 | ToU64 | ToU128 | ToI8 | ToI16
        | ToI24 | ToI32 | ToI40 | ToI48 | ToI56 | ToI64 | ToI128 => {
            let (mac, raw) = operand.into_int()?;
            let target = convert_target(op);
            // Sign-extend from the source width, then truncate to the
            // target width, like an `as` cast chain.
            let wide = if mac.is_signed() {
                as_signed(mac, raw) as u128
            } else {
                raw
            };
            int(target, wide)
        }
        ReadByte => {
            let ptr = operand.into_data_ptr()?;
            let byte = ptr.peek(0)?;
            RtVal::pair(RtVal::Byte(byte), RtVal::DataPtr(ptr.advanced(1)))
        }
        ReadWord(endianness) => {
            let ptr = operand.into_data_ptr()?;
            let (bytes, ptr) = ptr.read(2)?;
            let value = u16_from(&bytes, *endianness);
            RtVal::pair(RtVal::Word(value), RtVal::DataPtr(ptr))
        }
        ReadDWord(endianness) => {
            let ptr = operand.into_data_ptr()?;
            let (bytes, ptr) = ptr.read(4)?;
            let value = u32_from(&bytes, *endianness);
            RtVal::pair(RtVal::DWord(value), RtVal::DataPtr(ptr))
        }
        ReadQWord(endianness) => {
            let ptr = operand.into_data_ptr()?;
            let (bytes, ptr) = ptr.read(8)?;
            let value = u64_from(&bytes, *endianness);
            RtVal::pair(RtVal::QWord(value), RtVal::DataPtr(ptr))
        }
        ReadOWord(endianness) => {
            let ptr = operand.into_data_ptr()?;
            let (bytes, ptr) = ptr.read(16)?;
            let value = u128_from(&bytes, *endianness);
            RtVal::pair(RtVal::OWord(value), RtVal::DataPtr(ptr))
        }
        PeekWord(endianness) => {
            let ptr = operand.into_data_ptr()?;
            let (bytes, _) = ptr.read(2)?;
            RtVal::Word(u16_from(&bytes, *endianness))
        }
        PeekDWord(endianness) => {
            let ptr = operand.into_data_ptr()?;
            let (bytes, _) = ptr.read(4)?;
            RtVal::DWord(u32_from(&bytes, *endianness))
        }
        PeekQWord(endianness) => {
            let ptr = operand.into_data_ptr()?;
            let (bytes, _) = ptr.read(8)?;
            RtVal::QWord(u64_from(&bytes, *endianness))
        }
        PeekOWord(endianness) => {
            let ptr = operand.into_data_ptr()?;
            let (bytes, _) = ptr.read(16)?;
            RtVal::OWord(u128_from(&bytes, *endianness))
        }
        DataPtrPush => RtVal::DataPtr(operand.into_data_ptr()?.push()),
        DataPtrPop => RtVal::DataPtr(operand.into_data_ptr()?.pop()?),
        DerefValuePtr => RtVal::Value(operand.into_value_ptr()?.value()),
        GetField(path) => {
            let ptr = operand.into_value_ptr()?;
            RtVal::Value(ptr.read_slot(path)?)
        }
        FieldIsNull(path) => {
            let ptr = operand.into_value_ptr()?;
            let value = ptr.read_slot(path)?;
            RtVal::Value(HeapVal::Bool(matches!(value, HeapVal::Null)))
        }
        SetFieldNull(path) => {
            let ptr = operand.into_value_ptr()?;
            ptr.write_slot(path, HeapVal::Null)?;
            RtVal::ValuePtr(ptr)
        }
        ListBegin(path) => {
            let ptr = operand.into_value_ptr()?;
            ptr.list_begin(path)?;
            RtVal::ValuePtr(ptr)
        }
        ListNext(path) => {
            let ptr = operand.into_value_ptr()?;
            ptr.list_next(path)?;
            RtVal::ValuePtr(ptr)
        }
        ListEnd(path) => {
            let ptr = operand.into_value_ptr()?;
            ptr.list_end(path)?;
            RtVal::ValuePtr(ptr)
        }
    })
}

fn u16_from(bytes: &[u8], endianness: Endianness) -> u16 {
    let array: [u8; 2] = bytes.try_into().expect("length checked by the reader");
    match endianness {
        Endianness::Little => u16::from_le_bytes(array),
        Endianness::Big => u16::from_be_bytes(array),
    }
}

fn u32_from(bytes: &[u8], endianness: Endianness) -> u32 {
    let array: [u8; 4] = bytes.try_into().expect("length checked by the reader");
    match endianness {
        Endianness::Little => u32::from_le_bytes(array),
        Endianness::Big => u32::from_be_bytes(array),
    }
}

fn u64_from(bytes: &[u8], endianness: Endianness) -> u64 {
    let array: [u8; 8] = bytes.try_into().expect("length checked by the reader");
    match endianness {
        Endianness::Little => u64::from_le_bytes(array),
        Endianness::Big => u64::from_be_bytes(array),
    }
}

fn u128_from(bytes: &[u8], endianness: Endianness) -> u128 {
    let array: [u8; 16] = bytes.try_into().expect("length checked by the reader");
    match endianness {
        Endianness::Little => u128::from_le_bytes(array),
        Endianness::Big => u128::from_be_bytes(array),
    }
}

const fn parse_target(op: &Unary) -> Mac {
    match op {
        Unary::U8OfString => Mac::U8,
        Unary::U16OfString => Mac::U16,
        Unary::U24OfString => Mac::U24,
        Unary::U32OfString => Mac::U32,
        Unary::U40OfString => Mac::U40,
        Unary::U48OfString => Mac::U48,
        Unary::U56OfString => Mac::U56,
        Unary::U64OfString => Mac::U64,
        Unary::U128OfString => Mac::U128,
        Unary::I8OfString => Mac::I8,
        Unary::I16OfString => Mac::I16,
        Unary::I24OfString => Mac::I24,
        Unary::I32OfString => Mac::I32,
        Unary::I40OfString => Mac::I40,
        Unary::I48OfString => Mac::I48,
        Unary::I56OfString => Mac::I56,
        Unary::I64OfString => Mac::I64,
        Unary::I128OfString => Mac::I128,
        _ => unreachable!(),
    }
}

const fn convert_target(op: &Unary) -> Mac {
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

fn eval_binary(env: &mut Env, op: &Binary, first: RtVal, second: RtVal) -> Result<RtVal> {
    use Binary::*;

    Ok(match op {
        Gt => RtVal::Value(HeapVal::Bool(compare(&first, &second)?.is_gt())),
        Ge => RtVal::Value(HeapVal::Bool(compare(&first, &second)?.is_ge())),
        Eq => RtVal::Value(HeapVal::Bool(compare(&first, &second)?.is_eq())),
        Ne => RtVal::Value(HeapVal::Bool(compare(&first, &second)?.is_ne())),
        Add | Sub | Mul | Div | Rem => arith(op, first, second)?,
        LogAnd => {
            let (mac, a) = first.into_int()?;
            let (_, b) = second.into_int()?;
            int(mac, a & b)
        }
        LogOr => {
            let (mac, a) = first.into_int()?;
            let (_, b) = second.into_int()?;
            int(mac, a | b)
        }
        LogXor => {
            let (mac, a) = first.into_int()?;
            let (_, b) = second.into_int()?;
            int(mac, a ^ b)
        }
        LeftShift => {
            let (mac, a) = first.into_int()?;
            let (_, shift) = second.into_int()?;
            int(mac, a.wrapping_shl(shift as u32))
        }
        RightShift => {
            let (mac, a) = first.into_int()?;
            let (_, shift) = second.into_int()?;
            // Arithmetic shift for signed widths.
            if mac.is_signed() {
                int(mac, (as_signed(mac, a) >> (shift as u32)) as u128)
            } else {
                int(mac, a.wrapping_shr(shift as u32))
            }
        }
        And | Or => unreachable!("short-circuited by eval"),
        AppendBytes => {
            let mut bytes = first.into_bytes()?;
            bytes.extend(second.into_bytes()?);
            RtVal::Bytes(bytes)
        }
        AppendString => {
            let mut text = first.into_str()?;
            text.push_str(&second.into_str()?);
            RtVal::Value(HeapVal::Str(text))
        }
        TestBit => {
            let ptr = first.into_data_ptr()?;
            let index = second.into_int()?.1 as usize;
            let byte = ptr.peek(index / 8)?;
            RtVal::Bit(byte & (1 << (index % 8)) != 0)
        }
        ReadBytes => {
            let ptr = first.into_data_ptr()?;
            let len = second.into_size()?;
            let (bytes, ptr) = ptr.read(len)?;
            RtVal::pair(RtVal::Bytes(bytes), RtVal::DataPtr(ptr))
        }
        PeekByte => {
            let ptr = first.into_data_ptr()?;
            let delta = second.into_size()?;
            RtVal::Byte(ptr.peek(delta)?)
        }
        WriteByte => {
            let ptr = first.into_data_ptr()?;
            RtVal::DataPtr(ptr.write(&[second.into_byte()?]))
        }
        WriteBytes => {
            let ptr = first.into_data_ptr()?;
            RtVal::DataPtr(ptr.write(&second.into_bytes()?))
        }
        PokeByte => {
            let ptr = first.into_data_ptr()?;
            RtVal::DataPtr(ptr.poke(second.into_byte()?))
        }
        WriteWord(endianness) => {
            let ptr = first.into_data_ptr()?;
            let value = match second {
                RtVal::Word(value) => value,
                _ => return Err(EvalError::Internal("expected a word")),
            };
            let bytes = match endianness {
                Endianness::Little => value.to_le_bytes(),
                Endianness::Big => value.to_be_bytes(),
            };
            RtVal::DataPtr(ptr.write(&bytes))
        }
        WriteDWord(endianness) => {
            let ptr = first.into_data_ptr()?;
            let value = match second {
                RtVal::DWord(value) => value,
                _ => return Err(EvalError::Internal("expected a dword")),
            };
            let bytes = match endianness {
                Endianness::Little => value.to_le_bytes(),
                Endianness::Big => value.to_be_bytes(),
            };
            RtVal::DataPtr(ptr.write(&bytes))
        }
        WriteQWord(endianness) => {
            let ptr = first.into_data_ptr()?;
            let value = match second {
                RtVal::QWord(value) => value,
                _ => return Err(EvalError::Internal("expected a qword")),
            };
            let bytes = match endianness {
                Endianness::Little => value.to_le_bytes(),
                Endianness::Big => value.to_be_bytes(),
            };
            RtVal::DataPtr(ptr.write(&bytes))
        }
        WriteOWord(endianness) => {
            let ptr = first.into_data_ptr()?;
            let value = match second {
                RtVal::OWord(value) => value,
                _ => return Err(EvalError::Internal("expected an oword")),
            };
            let bytes = match endianness {
                Endianness::Little => value.to_le_bytes(),
                Endianness::Big => value.to_be_bytes(),
            };
            RtVal::DataPtr(ptr.write(&bytes))
        }
        DataPtrAdd => {
            let ptr = first.into_data_ptr()?;
            RtVal::DataPtr(ptr.advanced(second.into_size()?))
        }
        DataPtrSub => {
            let a = first.into_data_ptr()?;
            let b = second.into_data_ptr()?;
            RtVal::Size(a.offset().saturating_sub(b.offset()))
        }
        Coalesce => match first {
            RtVal::Value(HeapVal::Null) => second,
            first => first,
        },
        Pair => RtVal::pair(first, second),
        MapPair => {
            let (a, b) = first.into_pair()?;
            apply(env, &second, vec![a, b])?
        }
        SetField(path) => {
            let value = first.into_heap()?;
            let ptr = second.into_value_ptr()?;
            ptr.write_slot(path, value)?;
            RtVal::ValuePtr(ptr)
        }
        Let(_) => unreachable!("handled by eval"),
    })
}

fn compare(first: &RtVal, second: &RtVal) -> Result<std::cmp::Ordering> {
    use std::cmp::Ordering;

    Ok(match (first, second) {
        (RtVal::Value(HeapVal::Int(mac, a)), RtVal::Value(HeapVal::Int(_, b))) => {
            if mac.is_signed() {
                as_signed(*mac, *a).cmp(&as_signed(*mac, *b))
            } else {
                a.cmp(b)
            }
        }
        (RtVal::Value(HeapVal::Float(a)), RtVal::Value(HeapVal::Float(b))) => a
            .partial_cmp(b)
            .unwrap_or(Ordering::Less),
        (RtVal::Value(HeapVal::Bool(a)), RtVal::Value(HeapVal::Bool(b))) => a.cmp(b),
        (RtVal::Value(HeapVal::Char(a)), RtVal::Value(HeapVal::Char(b))) => a.cmp(b),
        (RtVal::Value(HeapVal::Str(a)), RtVal::Value(HeapVal::Str(b))) => a.cmp(b),
        (RtVal::Bit(a), RtVal::Bit(b)) => a.cmp(b),
        (RtVal::Byte(a), RtVal::Byte(b)) => a.cmp(b),
        (RtVal::Word(a), RtVal::Word(b)) => a.cmp(b),
        (RtVal::DWord(a), RtVal::DWord(b)) => a.cmp(b),
        (RtVal::QWord(a), RtVal::QWord(b)) => a.cmp(b),
        (RtVal::OWord(a), RtVal::OWord(b)) => a.cmp(b),
        (RtVal::Size(a), RtVal::Size(b)) => a.cmp(b),
        _ => return Err(EvalError::Internal("incomparable values")),
    })
}

fn arith(op: &Binary, first: RtVal, second: RtVal) -> Result<RtVal> {
    match (first, second) {
        (RtVal::Size(a), RtVal::Size(b)) => {
            if matches!(op, Binary::Div | Binary::Rem) && b == 0 {
                return Err(EvalError::DivisionByZero);
            }
            let value = match op {
                Binary::Add => a.wrapping_add(b),
                Binary::Sub => a.wrapping_sub(b),
                Binary::Mul => a.wrapping_mul(b),
                Binary::Div => a / b,
                Binary::Rem => a % b,
                _ => unreachable!(),
            };
            Ok(RtVal::Size(value))
        }
        (RtVal::Value(HeapVal::Float(a)), RtVal::Value(HeapVal::Float(b))) => {
            let value = match op {
                Binary::Add => a + b,
                Binary::Sub => a - b,
                Binary::Mul => a * b,
                Binary::Div => a / b,
                Binary::Rem => a % b,
                _ => unreachable!(),
            };
            Ok(RtVal::Value(HeapVal::Float(value)))
        }
        (RtVal::Value(HeapVal::Int(mac, a)), RtVal::Value(HeapVal::Int(_, b))) => {
            if matches!(op, Binary::Div | Binary::Rem) && b == 0 {
                return Err(EvalError::DivisionByZero);
            }
            let raw = if mac.is_signed() {
                let (a, b) = (as_signed(mac, a), as_signed(mac, b));
                let value = match op {
                    Binary::Add => a.wrapping_add(b),
                    Binary::Sub => a.wrapping_sub(b),
                    Binary::Mul => a.wrapping_mul(b),
                    Binary::Div => a.wrapping_div(b),
                    Binary::Rem => a.wrapping_rem(b),
                    _ => unreachable!(),
                };
                value as u128
            } else {
                match op {
                    Binary::Add => a.wrapping_add(b),
                    Binary::Sub => a.wrapping_sub(b),
                    Binary::Mul => a.wrapping_mul(b),
                    Binary::Div => a / b,
                    Binary::Rem => a % b,
                    _ => unreachable!(),
                }
            };
            Ok(int(mac, raw))
        }
        _ => Err(EvalError::Internal("arithmetic on non-numbers")),
    }
}

fn eval_ternary(env: &mut Env, op: &Ternary, v0: RtVal, v1: RtVal, v2: RtVal) -> Result<RtVal> {
    Ok(match op {
        Ternary::SetBit => {
            let ptr = v0.into_data_ptr()?;
            let index = v1.into_int()?.1 as usize;
            let bit = match v2 {
                RtVal::Bit(bit) => bit,
                _ => return Err(EvalError::Internal("expected a bit")),
            };
            let byte = ptr.peek(index / 8)?;
            let byte = if bit {
                byte | (1 << (index % 8))
            } else {
                byte & !(1 << (index % 8))
            };
            ptr.advanced(index / 8).poke(byte);
            RtVal::DataPtr(ptr)
        }
        Ternary::BlitByte => {
            let ptr = v0.into_data_ptr()?;
            let byte = v1.into_byte()?;
            let len = v2.into_size()?;
            RtVal::DataPtr(ptr.write(&vec![byte; len]))
        }
        Ternary::Choose => unreachable!("short-circuited by eval"),
        Ternary::LoopWhile => {
            let (cond, body) = (v0, v1);
            let mut accum = v2;
            while apply(env, &cond, vec![accum.clone()])?.into_bool()? {
                accum = apply(env, &body, vec![accum])?;
            }
            accum
        }
        Ternary::LoopUntil => {
            let (body, cond) = (v0, v1);
            let mut accum = v2;
            loop {
                accum = apply(env, &body, vec![accum])?;
                if apply(env, &cond, vec![accum.clone()])?.into_bool()? {
                    break accum;
                }
            }
        }
    })
}

fn eval_quaternary(
    env: &mut Env,
    op: &Quaternary,
    v0: RtVal,
    v1: RtVal,
    v2: RtVal,
    v3: RtVal,
) -> Result<RtVal> {
    Ok(match op {
        Quaternary::ReadWhile => {
            let (cond, reduce, mut accum) = (v0, v1, v2);
            let mut ptr = v3.into_data_ptr()?;
            // Stops without error at the end of input: the final byte of a
            // stream may legitimately terminate a literal.
            while ptr.rem() > 0 {
                let byte = ptr.peek(0)?;
                if !apply(env, &cond, vec![RtVal::Byte(byte)])?.into_bool()? {
                    break;
                }
                accum = apply(env, &reduce, vec![accum, RtVal::Byte(byte)])?;
                ptr = ptr.advanced(1);
            }
            RtVal::pair(accum, RtVal::DataPtr(ptr))
        }
        Quaternary::Repeat => {
            let from = as_signed(Mac::I32, v0.into_int()?.1);
            let to = as_signed(Mac::I32, v1.into_int()?.1);
            let body = v2;
            let mut accum = v3;
            for index in from..to {
                accum = apply(
                    env,
                    &body,
                    vec![int(Mac::I32, index as u128), accum],
                )?;
            }
            accum
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::GenCtx;

    fn eval_ok(expr: &Expr) -> RtVal {
        eval_closed(expr).unwrap_or_else(|err| panic!("eval failed: {}", err))
    }

    #[test]
    fn arithmetic_wraps_at_width() {
        let sum = Expr::add(Expr::u8(200), Expr::u8(100));
        assert!(matches!(
            eval_ok(&sum),
            RtVal::Value(HeapVal::Int(Mac::U8, 44))
        ));
    }

    #[test]
    fn odd_widths_mask() {
        let e = Expr::unary(
            Unary::ToU24,
            Expr::Nullary(Nullary::U32(0x01ff_ffff)),
        );
        assert!(matches!(
            eval_ok(&e),
            RtVal::Value(HeapVal::Int(Mac::U24, 0x00ff_ffff))
        ));
    }

    #[test]
    fn streams_read_back_what_they_wrote() {
        let ptr = DataPtr::of_bytes(Vec::new());
        let written = Expr::write_byte(Expr::ident("dst"), Expr::byte(0xab));
        let mut env = Env::new();
        env.bind("dst", RtVal::DataPtr(ptr));
        let out = eval(&mut env, &written).unwrap().into_data_ptr().unwrap();
        assert_eq!(out.bytes(), vec![0xab]);
    }

    #[test]
    fn read_while_stops_at_end_of_input() {
        let mut ctx = GenCtx::new();
        let cond_fid = ctx.fresh_fid();
        let reduce_fid = ctx.fresh_fid();
        let cond = Expr::func(
            cond_fid,
            vec![crate::expr::Type::Byte],
            Expr::ge(Expr::param(cond_fid, 0), Expr::byte(b'0')),
        );
        let reduce = Expr::func(
            reduce_fid,
            vec![crate::expr::Type::string(), crate::expr::Type::Byte],
            Expr::binary(
                Binary::AppendString,
                Expr::param(reduce_fid, 0),
                Expr::unary(
                    Unary::StringOfChar,
                    Expr::unary(Unary::CharOfU8, Expr::unary(Unary::U8OfByte, Expr::param(reduce_fid, 1))),
                ),
            ),
        );
        let read = Expr::quaternary(
            Quaternary::ReadWhile,
            cond,
            reduce,
            Expr::string(""),
            Expr::ident("src"),
        );
        let mut env = Env::new();
        env.bind("src", RtVal::DataPtr(DataPtr::of_bytes(b"42".to_vec())));
        let (text, _) = eval(&mut env, &read).unwrap().into_pair().unwrap();
        assert_eq!(text.into_str().unwrap(), "42");
    }

    #[test]
    fn heap_round_trip_with_lists() {
        let mn = crate::schema::parser::parse(0, "u8[]").unwrap();
        let ptr = ValuePtr::alloc(&mn).unwrap();
        let list = Path::root();
        let elem = Path(vec![0]);
        ptr.list_begin(&list).unwrap();
        ptr.write_slot(&elem, HeapVal::Int(Mac::U8, 1)).unwrap();
        ptr.list_next(&list).unwrap();
        ptr.write_slot(&elem, HeapVal::Int(Mac::U8, 2)).unwrap();
        ptr.list_end(&list).unwrap();
        assert_eq!(
            ptr.value(),
            HeapVal::List(vec![HeapVal::Int(Mac::U8, 1), HeapVal::Int(Mac::U8, 2)])
        );

        // Reading walks the same elements through the cursor.
        let reader = ValuePtr::of_value(&mn, ptr.value());
        reader.list_begin(&list).unwrap();
        assert_eq!(reader.read_slot(&elem).unwrap(), HeapVal::Int(Mac::U8, 1));
        reader.list_next(&list).unwrap();
        assert_eq!(reader.read_slot(&elem).unwrap(), HeapVal::Int(Mac::U8, 2));
        reader.list_end(&list).unwrap();
    }

    #[test]
    fn u128_of_string_uses_the_limb_splitter() {
        let e = Expr::unary(
            Unary::U128OfString,
            Expr::string("85070591730234615865843651857942052864"),
        );
        assert!(matches!(
            eval_ok(&e),
            RtVal::Value(HeapVal::Int(Mac::U128, raw)) if raw == 1u128 << 126
        ));
    }
}
