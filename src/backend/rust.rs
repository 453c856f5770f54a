//! Rust source emission.
//!
//! Declarations become `pub fn` items over a small self-contained runtime
//! module carried in the declarations file. Heap values use a dynamic
//! representation there, so no per-schema types need generating; scalars
//! map to native Rust integers, floats, `bool`, `char` and `String`, with
//! the odd widths stored in the next machine width up.

use std::fmt::{self, Write as _};

use itertools::Itertools;

use crate::backend::{Backend, BackendState, Link};
use crate::expr::typing::{self, TypeError};
use crate::expr::{Binary, Endianness, Expr, Nullary, Quaternary, Ternary, Type, Unary};
use crate::schema::path::type_of_path;
use crate::schema::{Mac, Mn, Path, ValueType};

/// The Rust backend. `decl_file_name` is spliced into the definitions
/// file's `include!`, and `main_entry` optionally names a generated
/// converter to wrap in the conventional command-line `main`.
#[derive(Debug, Clone)]
pub struct RustBackend {
    pub decl_file_name: String,
    pub main_entry: Option<String>,
}

impl Default for RustBackend {
    fn default() -> RustBackend {
        RustBackend {
            decl_file_name: "dessser_decls.rs".to_owned(),
            main_entry: None,
        }
    }
}

impl Backend for RustBackend {
    fn preferred_def_extension(&self) -> &'static str {
        "rs"
    }

    fn preferred_decl_extension(&self) -> &'static str {
        "rs"
    }

    fn compile_cmd(&self, optim: u8, link: Link, src: &str, out: &str) -> String {
        let emit = match link {
            Link::Object => " --emit=obj",
            Link::Executable => "",
        };
        format!(
            "rustc --edition 2021 -C opt-level={}{} {} -o {}",
            optim.min(3),
            emit,
            src,
            out
        )
    }

    fn print_declarations(&self, state: &BackendState, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "// Declarations. Compiled as part of the definitions file.")?;
        writeln!(out)?;
        for decl in state.declarations() {
            writeln!(out, "// {}: {}", decl.name, decl.r#type)?;
        }
        writeln!(out)?;
        out.write_str(RUNTIME)
    }

    fn print_definitions(&self, state: &BackendState, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "// Definitions.")?;
        writeln!(out, "include!(\"{}\");", self.decl_file_name)?;
        writeln!(out)?;
        let mut emitter = Emitter::new();
        for decl in state.declarations() {
            let item = emitter.declaration(decl).map_err(|_| fmt::Error)?;
            writeln!(out, "{}", item)?;
        }
        if let Some(entry) = &self.main_entry {
            out.write_str(&MAIN.replace("__ENTRY__", entry))?;
        }
        Ok(())
    }
}

struct Emitter {
    types: typing::Context,
    /// Declared item names, with whether they are function items.
    items: Vec<(String, bool)>,
}

impl Emitter {
    fn new() -> Emitter {
        Emitter {
            types: typing::Context::new(),
            items: Vec::new(),
        }
    }

    fn declaration(&mut self, decl: &crate::backend::Declaration) -> Result<String, TypeError> {
        let mut out = String::new();
        match (&decl.expr, &decl.r#type) {
            (Expr::Function(fid, params, body), Type::Function(_, result)) => {
                let args = params
                    .iter()
                    .enumerate()
                    .map(|(index, param)| {
                        self.types.declare_param(*fid, index, param.clone());
                        format!("p{}_{}: {}", fid, index, rust_type(param))
                    })
                    .join(", ");
                let _ = write!(
                    out,
                    "pub fn {}({}) -> {} {{\n    {}\n}}\n",
                    decl.name,
                    args,
                    rust_type(result),
                    self.emit(body)?
                );
            }
            (expr, r#type) => {
                let _ = write!(
                    out,
                    "pub fn {}() -> {} {{\n    {}\n}}\n",
                    decl.name,
                    rust_type(r#type),
                    self.emit(expr)?
                );
            }
        }
        self.types.declare_ident(&decl.name, decl.r#type.clone());
        let is_function = matches!(decl.r#type, Type::Function(_, _));
        self.items.push((decl.name.clone(), is_function));
        Ok(out)
    }

    fn emit(&mut self, expr: &Expr) -> Result<String, TypeError> {
        Ok(match expr {
            Expr::Nullary(n) => self.nullary(n),
            Expr::Unary(op, operand) => self.unary(expr, op, operand)?,
            Expr::Binary(op, first, second) => self.binary(expr, op, first, second)?,
            Expr::Ternary(op, e0, e1, e2) => self.ternary(op, e0, e1, e2)?,
            Expr::Quaternary(op, e0, e1, e2, e3) => self.quaternary(op, e0, e1, e2, e3)?,
            Expr::Seq(exprs) => {
                let mut out = String::from("{ ");
                for (index, item) in exprs.iter().enumerate() {
                    let last = index + 1 == exprs.len();
                    let _ = write!(out, "{}{} ", self.emit(item)?, if last { "" } else { ";" });
                }
                out.push('}');
                out
            }
            Expr::Function(fid, params, body) => {
                for (index, param) in params.iter().enumerate() {
                    self.types.declare_param(*fid, index, param.clone());
                }
                let args = params
                    .iter()
                    .enumerate()
                    .map(|(index, param)| format!("p{}_{}: {}", fid, index, rust_type(param)))
                    .join(", ");
                format!("move |{}| {{ {} }}", args, self.emit(body)?)
            }
        })
    }

    fn nullary(&mut self, n: &Nullary) -> String {
        match n {
            Nullary::Param(fid, index) => format!("p{}_{}", fid, index),
            Nullary::Identifier(name) => {
                match self.items.iter().find(|(item, _)| item == name) {
                    // Function items are referenced, other items called.
                    Some((_, true)) => name.clone(),
                    Some((_, false)) => format!("{}()", name),
                    None => var(name),
                }
            }
            Nullary::Null(_) => "None".to_owned(),
            Nullary::Bool(value) | Nullary::Bit(value) => value.to_string(),
            Nullary::Char(value) => format!("{:?}", value),
            Nullary::Float(value) => format!("f64::from_bits(0x{:016x})", value.to_bits()),
            Nullary::String(value) => format!("{:?}.to_string()", value),
            Nullary::U8(value) => format!("{}u8", value),
            Nullary::U16(value) => format!("{}u16", value),
            Nullary::U24(value) | Nullary::U32(value) => format!("{}u32", value),
            Nullary::U40(value)
            | Nullary::U48(value)
            | Nullary::U56(value)
            | Nullary::U64(value) => format!("{}u64", value),
            Nullary::U128(value) => format!("{}u128", value),
            Nullary::I8(value) => format!("{}i8", value),
            Nullary::I16(value) => format!("{}i16", value),
            Nullary::I24(value) | Nullary::I32(value) => format!("{}i32", value),
            Nullary::I40(value)
            | Nullary::I48(value)
            | Nullary::I56(value)
            | Nullary::I64(value) => format!("{}i64", value),
            Nullary::I128(value) => format!("{}i128", value),
            Nullary::Byte(value) => format!("{}u8", value),
            Nullary::Word(value) => format!("{}u16", value),
            Nullary::DWord(value) => format!("{}u32", value),
            Nullary::QWord(value) => format!("{}u64", value),
            Nullary::OWord(value) => format!("{}u128", value),
            Nullary::Size(value) => format!("{}usize", value),
            Nullary::AllocValue(_) => "runtime::VPtr::alloc()".to_owned(),
        }
    }

    fn unary(&mut self, whole: &Expr, op: &Unary, operand: &Expr) -> Result<String, TypeError> {
        use Unary::*;

        let inner_type = self.types.type_of(operand)?;
        let a = self.emit(operand)?;
        Ok(match op {
            Dump => format!("{{ eprintln!(\"{{:?}}\", {}); }}", a),
            Ignore => format!("{{ let _ = {}; }}", a),
            IsNull => format!("({}).is_none()", a),
            ToNullable => format!("Some({})", a),
            ToNotNullable => format!("({}).expect(\"unexpected null\")", a),
            Fst => format!("({}).0", a),
            Snd => format!("({}).1", a),
            StringLength => format!("(({}).len() as u32)", a),
            ListLength => format!("({}).seq_len()", a),
            RemSize => format!("({}).rem()", a),
            Not | LogNot => format!("!({})", a),
            StringOfInt | StringOfChar => format!("({}).to_string()", a),
            StringOfFloat => format!("format!(\"{{:?}}\", {})", a),
            FloatOfString => format!("({}).parse::<f64>().expect(\"invalid float\")", a),
            U8OfString => parse_int(&a, Mac::U8),
            U16OfString => parse_int(&a, Mac::U16),
            U24OfString => parse_int(&a, Mac::U24),
            U32OfString => parse_int(&a, Mac::U32),
            U40OfString => parse_int(&a, Mac::U40),
            U48OfString => parse_int(&a, Mac::U48),
            U56OfString => parse_int(&a, Mac::U56),
            U64OfString => parse_int(&a, Mac::U64),
            U128OfString => parse_int(&a, Mac::U128),
            I8OfString => parse_int(&a, Mac::I8),
            I16OfString => parse_int(&a, Mac::I16),
            I24OfString => parse_int(&a, Mac::I24),
            I32OfString => parse_int(&a, Mac::I32),
            I40OfString => parse_int(&a, Mac::I40),
            I48OfString => parse_int(&a, Mac::I48),
            I56OfString => parse_int(&a, Mac::I56),
            I64OfString => parse_int(&a, Mac::I64),
            I128OfString => parse_int(&a, Mac::I128),
            CharOfU8 => format!("(({}) as char)", a),
            U8OfChar => format!("(({}) as u8)", a),
            BoolOfBit | BitOfBool | ByteOfU8 | U8OfByte | WordOfU16 | U16OfWord | DWordOfU32
            | U32OfDWord | QWordOfU64 | U64OfQWord | OWordOfU128 | U128OfOWord => {
                format!("({})", a)
            }
            SizeOfU32 => format!("(({}) as usize)", a),
            U32OfSize => format!("(({}) as u32)", a),
            FloatOfQWord => format!("f64::from_bits({})", a),
            QWordOfFloat => format!("({}).to_bits()", a),
            BytesOfString => format!("({}).into_bytes()", a),
            StringOfBytes => {
                format!("String::from_utf8({}).expect(\"invalid utf-8\")", a)
            }
            ToU8 => format!("(({}) as u8)", a),
            ToU16 => format!("(({}) as u16)", a),
            ToU24 => format!("((({}) as u32) & 0xff_ffff)", a),
            ToU32 => format!("(({}) as u32)", a),
            ToU40 => format!("((({}) as u64) & 0xff_ffff_ffff)", a),
            ToU48 => format!("((({}) as u64) & 0xffff_ffff_ffff)", a),
            ToU56 => format!("((({}) as u64) & 0xff_ffff_ffff_ffff)", a),
            ToU64 => format!("(({}) as u64)", a),
            ToU128 => format!("(({}) as u128)", a),
            ToI8 => format!("(({}) as i8)", a),
            ToI16 => format!("(({}) as i16)", a),
            ToI24 => format!("(((({}) as i32) << 8) >> 8)", a),
            ToI32 => format!("(({}) as i32)", a),
            ToI40 => format!("(((({}) as i64) << 24) >> 24)", a),
            ToI48 => format!("(((({}) as i64) << 16) >> 16)", a),
            ToI56 => format!("(((({}) as i64) << 8) >> 8)", a),
            ToI64 => format!("(({}) as i64)", a),
            ToI128 => format!("(({}) as i128)", a),
            ReadByte => format!("({}).read_byte()", a),
            ReadWord(endianness) => format!("({}).read_u16_{}()", a, endianness.tag()),
            ReadDWord(endianness) => format!("({}).read_u32_{}()", a, endianness.tag()),
            ReadQWord(endianness) => format!("({}).read_u64_{}()", a, endianness.tag()),
            ReadOWord(endianness) => format!("({}).read_u128_{}()", a, endianness.tag()),
            PeekWord(endianness) => format!("({}).peek_u16_{}()", a, endianness.tag()),
            PeekDWord(endianness) => format!("({}).peek_u32_{}()", a, endianness.tag()),
            PeekQWord(endianness) => format!("({}).peek_u64_{}()", a, endianness.tag()),
            PeekOWord(endianness) => format!("({}).peek_u128_{}()", a, endianness.tag()),
            DataPtrPush => format!("({}).push()", a),
            DataPtrPop => format!("({}).pop()", a),
            DerefValuePtr => {
                let root = value_ptr_schema(whole, &inner_type)?;
                self.read_slot(&a, &root, &Path::root(), whole)?
            }
            GetField(path) => {
                let root = value_ptr_schema(whole, &inner_type)?;
                self.read_slot(&a, &root, path, whole)?
            }
            FieldIsNull(path) => format!("({}).is_null({})", a, path_literal(path)),
            SetFieldNull(path) => {
                format!(
                    "{{ let vp = {}; vp.set({}, runtime::Value::Null); vp }}",
                    a,
                    path_literal(path)
                )
            }
            ListBegin(path) => {
                format!("{{ let vp = {}; vp.list_begin({}); vp }}", a, path_literal(path))
            }
            ListNext(path) => {
                format!("{{ let vp = {}; vp.list_next({}); vp }}", a, path_literal(path))
            }
            ListEnd(path) => {
                format!("{{ let vp = {}; vp.list_end({}); vp }}", a, path_literal(path))
            }
        })
    }

    /// Read the slot at `path` and convert it to the native representation
    /// of its schema type.
    fn read_slot(
        &mut self,
        vp: &str,
        root: &Mn,
        path: &Path,
        whole: &Expr,
    ) -> Result<String, TypeError> {
        let slot = type_of_path(root, path).map_err(|error| TypeError::BadPath {
            expr: whole.clone(),
            path: path.clone(),
            error,
        })?;
        let get = format!("({}).get({})", vp, path_literal(path));
        Ok(match (slot.is_nullable(), slot.vtype().resolved()) {
            (false, ValueType::Mac(mac)) => format!("{}.{}()", get, accessor(*mac)),
            (true, ValueType::Mac(mac)) => format!("{}.opt_{}()", get, accessor_suffix(*mac)),
            (false, _) => get,
            (true, _) => format!("{}.opt_value()", get),
        })
    }

    /// Convert a native value back into the dynamic representation of the
    /// slot at `path`.
    fn write_slot(
        &mut self,
        value: &str,
        root: &Mn,
        path: &Path,
        whole: &Expr,
    ) -> Result<String, TypeError> {
        let slot = type_of_path(root, path).map_err(|error| TypeError::BadPath {
            expr: whole.clone(),
            path: path.clone(),
            error,
        })?;
        Ok(match (slot.is_nullable(), slot.vtype().resolved()) {
            (false, ValueType::Mac(mac)) => {
                format!("runtime::Value::{}({})", variant(*mac), value)
            }
            (true, ValueType::Mac(mac)) => format!(
                "match {} {{ Some(v) => runtime::Value::{}(v), None => runtime::Value::Null }}",
                value,
                variant(*mac)
            ),
            (false, _) => format!("({})", value),
            (true, _) => format!(
                "match {} {{ Some(v) => v, None => runtime::Value::Null }}",
                value
            ),
        })
    }

    fn binary(
        &mut self,
        whole: &Expr,
        op: &Binary,
        first: &Expr,
        second: &Expr,
    ) -> Result<String, TypeError> {
        use Binary::*;

        if let Let(name) = op {
            let bound = self.emit(first)?;
            let r#type = self.types.type_of(first)?;
            self.types.declare_ident(name, r#type);
            let body = self.emit(second)?;
            return Ok(format!("{{ let {} = {}; {} }}", var(name), bound, body));
        }

        let first_type = self.types.type_of(first)?;
        let a = self.emit(first)?;
        let b = self.emit(second)?;
        Ok(match op {
            Gt => format!("(({}) > ({}))", a, b),
            Ge => format!("(({}) >= ({}))", a, b),
            Eq => format!("(({}) == ({}))", a, b),
            Ne => format!("(({}) != ({}))", a, b),
            Add | Sub | Mul => {
                let method = match op {
                    Add => "wrapping_add",
                    Sub => "wrapping_sub",
                    _ => "wrapping_mul",
                };
                if first_type == Type::float() {
                    let symbol = match op {
                        Add => "+",
                        Sub => "-",
                        _ => "*",
                    };
                    format!("(({}) {} ({}))", a, symbol, b)
                } else {
                    format!("({}).{}({})", a, method, b)
                }
            }
            Div => format!("(({}) / ({}))", a, b),
            Rem => format!("(({}) % ({}))", a, b),
            LogAnd => format!("(({}) & ({}))", a, b),
            LogOr => format!("(({}) | ({}))", a, b),
            LogXor => format!("(({}) ^ ({}))", a, b),
            LeftShift => format!("({}).wrapping_shl(({}) as u32)", a, b),
            RightShift => format!("({}).wrapping_shr(({}) as u32)", a, b),
            And => format!("(({}) && ({}))", a, b),
            Or => format!("(({}) || ({}))", a, b),
            AppendBytes => format!("{{ let mut bs = {}; bs.extend({}); bs }}", a, b),
            AppendString => format!("format!(\"{{}}{{}}\", {}, {})", a, b),
            TestBit => format!("({}).test_bit(({}) as usize)", a, b),
            ReadBytes => format!("({}).read_bytes({})", a, b),
            PeekByte => format!("({}).peek_byte({})", a, b),
            WriteByte => format!("({}).write_byte({})", a, b),
            WriteBytes => format!("({}).write_bytes(&{})", a, b),
            PokeByte => format!("({}).poke_byte({})", a, b),
            WriteWord(endianness) => write_scaled(&a, &b, "u16", *endianness),
            WriteDWord(endianness) => write_scaled(&a, &b, "u32", *endianness),
            WriteQWord(endianness) => write_scaled(&a, &b, "u64", *endianness),
            WriteOWord(endianness) => write_scaled(&a, &b, "u128", *endianness),
            DataPtrAdd => format!("({}).skip({})", a, b),
            DataPtrSub => format!("({}).distance(&{})", a, b),
            Coalesce => format!("({}).unwrap_or({})", a, b),
            Pair => format!("({}, {})", a, b),
            MapPair => format!("{{ let p = {}; ({})(p.0, p.1) }}", a, b),
            SetField(path) => {
                let root = value_ptr_schema(whole, &self.types.type_of(second)?)?;
                let converted = self.write_slot(&a, &root, path, whole)?;
                format!(
                    "{{ let vp = {}; vp.set({}, {}); vp }}",
                    b,
                    path_literal(path),
                    converted
                )
            }
            Let(_) => unreachable!("handled above"),
        })
    }

    fn ternary(&mut self, op: &Ternary, e0: &Expr, e1: &Expr, e2: &Expr) -> Result<String, TypeError> {
        let a = self.emit(e0)?;
        let b = self.emit(e1)?;
        let c = self.emit(e2)?;
        Ok(match op {
            Ternary::SetBit => format!("({}).set_bit(({}) as usize, {})", a, b, c),
            Ternary::BlitByte => format!("({}).blit({}, {})", a, b, c),
            Ternary::Choose => format!("if {} {{ {} }} else {{ {} }}", a, b, c),
            Ternary::LoopWhile => format!(
                "{{ let cond = {}; let body = {}; let mut acc = {}; \
                 while cond(acc.clone()) {{ acc = body(acc); }} acc }}",
                a, b, c
            ),
            Ternary::LoopUntil => format!(
                "{{ let body = {}; let cond = {}; let mut acc = {}; \
                 loop {{ acc = body(acc); if cond(acc.clone()) {{ break; }} }} acc }}",
                a, b, c
            ),
        })
    }

    fn quaternary(
        &mut self,
        op: &Quaternary,
        e0: &Expr,
        e1: &Expr,
        e2: &Expr,
        e3: &Expr,
    ) -> Result<String, TypeError> {
        let a = self.emit(e0)?;
        let b = self.emit(e1)?;
        let c = self.emit(e2)?;
        let d = self.emit(e3)?;
        Ok(match op {
            Quaternary::ReadWhile => {
                format!("runtime::read_while({}, {}, {}, {})", a, b, c, d)
            }
            Quaternary::Repeat => format!(
                "{{ let body = {}; let mut acc = {}; for i in ({})..({}) {{ acc = body(i, acc); }} acc }}",
                c, d, a, b
            ),
        })
    }
}

fn value_ptr_schema(expr: &Expr, r#type: &Type) -> Result<Mn, TypeError> {
    match r#type {
        Type::ValuePtr(mn) => Ok(mn.clone()),
        other => Err(TypeError::Mismatch {
            expr: expr.clone(),
            expected: "a value pointer".to_owned(),
            found: other.clone(),
        }),
    }
}

fn write_scaled(ptr: &str, value: &str, width: &str, endianness: Endianness) -> String {
    format!("({}).write_{}_{}({})", ptr, width, endianness.tag(), value)
}

fn var(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("v_{}", safe)
}

fn path_literal(path: &Path) -> String {
    format!("&[{}]", path.0.iter().join(", "))
}

/// The native Rust type of an IR type.
fn rust_type(r#type: &Type) -> String {
    match r#type {
        Type::Value(mn) => rust_value_type(mn),
        Type::Void => "()".to_owned(),
        Type::DataPtr => "runtime::Pointer".to_owned(),
        Type::ValuePtr(_) => "runtime::VPtr".to_owned(),
        Type::Size => "usize".to_owned(),
        Type::Bit => "bool".to_owned(),
        Type::Byte => "u8".to_owned(),
        Type::Word => "u16".to_owned(),
        Type::DWord => "u32".to_owned(),
        Type::QWord => "u64".to_owned(),
        Type::OWord => "u128".to_owned(),
        Type::Bytes => "runtime::Bytes".to_owned(),
        Type::Pair(first, second) => format!("({}, {})", rust_type(first), rust_type(second)),
        Type::Function(params, result) => format!(
            "Box<dyn Fn({}) -> {}>",
            params.iter().map(rust_type).join(", "),
            rust_type(result)
        ),
    }
}

fn rust_value_type(mn: &Mn) -> String {
    match mn {
        Mn::Nullable(vtype) => format!("Option<{}>", rust_vtype(vtype)),
        Mn::NotNullable(vtype) => rust_vtype(vtype),
    }
}

fn rust_vtype(vtype: &ValueType) -> String {
    match vtype {
        ValueType::Mac(mac) => native(*mac).to_owned(),
        ValueType::Usr(user) => rust_value_type(&user.def),
        _ => "runtime::Value".to_owned(),
    }
}

/// The native machine type a scalar maps to; odd widths take the next
/// machine width up.
const fn native(mac: Mac) -> &'static str {
    match mac {
        Mac::Bool => "bool",
        Mac::Char => "char",
        Mac::Float => "f64",
        Mac::String => "String",
        Mac::U8 => "u8",
        Mac::U16 => "u16",
        Mac::U24 | Mac::U32 => "u32",
        Mac::U40 | Mac::U48 | Mac::U56 | Mac::U64 => "u64",
        Mac::U128 => "u128",
        Mac::I8 => "i8",
        Mac::I16 => "i16",
        Mac::I24 | Mac::I32 => "i32",
        Mac::I40 | Mac::I48 | Mac::I56 | Mac::I64 => "i64",
        Mac::I128 => "i128",
    }
}

/// The `runtime::Value` variant a scalar travels in.
const fn variant(mac: Mac) -> &'static str {
    match mac {
        Mac::Bool => "Bool",
        Mac::Char => "Char",
        Mac::Float => "F64",
        Mac::String => "Str",
        Mac::U8 => "U8",
        Mac::U16 => "U16",
        Mac::U24 | Mac::U32 => "U32",
        Mac::U40 | Mac::U48 | Mac::U56 | Mac::U64 => "U64",
        Mac::U128 => "U128",
        Mac::I8 => "I8",
        Mac::I16 => "I16",
        Mac::I24 | Mac::I32 => "I32",
        Mac::I40 | Mac::I48 | Mac::I56 | Mac::I64 => "I64",
        Mac::I128 => "I128",
    }
}

const fn accessor_suffix(mac: Mac) -> &'static str {
    match mac {
        Mac::Bool => "bool",
        Mac::Char => "char",
        Mac::Float => "f64",
        Mac::String => "str",
        Mac::U8 => "u8",
        Mac::U16 => "u16",
        Mac::U24 | Mac::U32 => "u32",
        Mac::U40 | Mac::U48 | Mac::U56 | Mac::U64 => "u64",
        Mac::U128 => "u128",
        Mac::I8 => "i8",
        Mac::I16 => "i16",
        Mac::I24 | Mac::I32 => "i32",
        Mac::I40 | Mac::I48 | Mac::I56 | Mac::I64 => "i64",
        Mac::I128 => "i128",
    }
}

fn accessor(mac: Mac) -> String {
    format!("as_{}", accessor_suffix(mac))
}

fn parse_int(a: &str, mac: Mac) -> String {
    match mac {
        Mac::U128 => format!("runtime::parse_u128(&{})", a),
        Mac::I128 => format!("runtime::parse_i128(&{})", a),
        Mac::U24 | Mac::U40 | Mac::U48 | Mac::U56 => format!(
            "(runtime::parse_uint(&{}, {}) as {})",
            a,
            bits_of(mac),
            native(mac)
        ),
        Mac::I24 | Mac::I40 | Mac::I48 | Mac::I56 => format!(
            "runtime::parse_sint(&{}, {}) as {}",
            a,
            bits_of(mac),
            native(mac)
        ),
        mac => format!(
            "({}).parse::<{}>().expect(\"invalid integer\")",
            a,
            native(mac)
        ),
    }
}

const fn bits_of(mac: Mac) -> u32 {
    match mac.bits() {
        Some(bits) => bits,
        None => 0,
    }
}

/// The runtime support module emitted into every declarations file.
const RUNTIME: &str = r#"
pub mod runtime {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    pub type Bytes = Vec<u8>;

    /// A cursor into a byte stream. The buffer is shared, the offset is a
    /// value.
    #[derive(Debug, Clone)]
    pub struct Pointer {
        buf: Rc<RefCell<Vec<u8>>>,
        off: usize,
        saved: Vec<usize>,
    }

    macro_rules! scaled_io {
        ($read:ident, $peek:ident, $write:ident, $ty:ty, $from:ident, $to:ident) => {
            pub fn $read(&self) -> ($ty, Pointer) {
                const N: usize = std::mem::size_of::<$ty>();
                let mut bytes = [0u8; N];
                bytes.copy_from_slice(&self.view(N));
                (<$ty>::$from(bytes), self.skip(N))
            }

            pub fn $peek(&self) -> $ty {
                const N: usize = std::mem::size_of::<$ty>();
                let mut bytes = [0u8; N];
                bytes.copy_from_slice(&self.view(N));
                <$ty>::$from(bytes)
            }

            pub fn $write(&self, value: $ty) -> Pointer {
                self.write_bytes(&value.$to())
            }
        };
    }

    impl Pointer {
        pub fn of_bytes(bytes: Vec<u8>) -> Pointer {
            Pointer {
                buf: Rc::new(RefCell::new(bytes)),
                off: 0,
                saved: Vec::new(),
            }
        }

        pub fn bytes(&self) -> Vec<u8> {
            self.buf.borrow().clone()
        }

        pub fn offset(&self) -> usize {
            self.off
        }

        pub fn rem(&self) -> usize {
            self.buf.borrow().len().saturating_sub(self.off)
        }

        fn view(&self, len: usize) -> Vec<u8> {
            let buf = self.buf.borrow();
            if self.off + len > buf.len() {
                panic!("input exhausted at offset {}", self.off);
            }
            buf[self.off..self.off + len].to_vec()
        }

        pub fn skip(&self, len: usize) -> Pointer {
            Pointer {
                buf: self.buf.clone(),
                off: self.off + len,
                saved: self.saved.clone(),
            }
        }

        pub fn distance(&self, other: &Pointer) -> usize {
            self.off.saturating_sub(other.off)
        }

        pub fn read_byte(&self) -> (u8, Pointer) {
            (self.view(1)[0], self.skip(1))
        }

        pub fn peek_byte(&self, delta: usize) -> u8 {
            let buf = self.buf.borrow();
            match buf.get(self.off + delta) {
                Some(byte) => *byte,
                None => panic!("input exhausted at offset {}", self.off + delta),
            }
        }

        pub fn read_bytes(&self, len: usize) -> (Bytes, Pointer) {
            (self.view(len), self.skip(len))
        }

        pub fn write_byte(&self, byte: u8) -> Pointer {
            self.write_bytes(&[byte])
        }

        pub fn write_bytes(&self, bytes: &[u8]) -> Pointer {
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
            self.skip(bytes.len())
        }

        pub fn poke_byte(&self, byte: u8) -> Pointer {
            self.write_bytes(&[byte]);
            self.clone()
        }

        pub fn test_bit(&self, index: usize) -> bool {
            self.peek_byte(index / 8) & (1 << (index % 8)) != 0
        }

        pub fn set_bit(&self, index: usize, bit: bool) -> Pointer {
            let byte = self.peek_byte(index / 8);
            let byte = if bit {
                byte | (1 << (index % 8))
            } else {
                byte & !(1 << (index % 8))
            };
            self.skip(index / 8).poke_byte(byte);
            self.clone()
        }

        pub fn blit(&self, byte: u8, len: usize) -> Pointer {
            self.write_bytes(&vec![byte; len])
        }

        pub fn push(&self) -> Pointer {
            let mut ptr = self.clone();
            ptr.saved.push(ptr.off);
            ptr
        }

        pub fn pop(&self) -> Pointer {
            let mut ptr = self.clone();
            ptr.off = ptr.saved.pop().expect("pop on an unsaved pointer");
            ptr
        }

        scaled_io!(read_u16_le, peek_u16_le, write_u16_le, u16, from_le_bytes, to_le_bytes);
        scaled_io!(read_u16_be, peek_u16_be, write_u16_be, u16, from_be_bytes, to_be_bytes);
        scaled_io!(read_u32_le, peek_u32_le, write_u32_le, u32, from_le_bytes, to_le_bytes);
        scaled_io!(read_u32_be, peek_u32_be, write_u32_be, u32, from_be_bytes, to_be_bytes);
        scaled_io!(read_u64_le, peek_u64_le, write_u64_le, u64, from_le_bytes, to_le_bytes);
        scaled_io!(read_u64_be, peek_u64_be, write_u64_be, u64, from_be_bytes, to_be_bytes);
        scaled_io!(read_u128_le, peek_u128_le, write_u128_le, u128, from_le_bytes, to_le_bytes);
        scaled_io!(read_u128_be, peek_u128_be, write_u128_be, u128, from_be_bytes, to_be_bytes);
    }

    pub fn read_while<T>(
        cond: impl Fn(u8) -> bool,
        reduce: impl Fn(T, u8) -> T,
        init: T,
        ptr: Pointer,
    ) -> (T, Pointer) {
        let mut accum = init;
        let mut ptr = ptr;
        while ptr.rem() > 0 {
            let byte = ptr.peek_byte(0);
            if !cond(byte) {
                break;
            }
            accum = reduce(accum, byte);
            ptr = ptr.skip(1);
        }
        (accum, ptr)
    }

    /// A dynamic heap value. Compounds all share the `Seq` shape; the
    /// schema is only known to the generated code addressing it.
    #[derive(Debug, Clone, PartialEq)]
    pub enum Value {
        Null,
        Bool(bool),
        Char(char),
        F64(f64),
        Str(String),
        U8(u8),
        U16(u16),
        U32(u32),
        U64(u64),
        U128(u128),
        I8(i8),
        I16(i16),
        I32(i32),
        I64(i64),
        I128(i128),
        Seq(Vec<Value>),
    }

    macro_rules! accessors {
        ($as:ident, $opt:ident, $variant:ident, $ty:ty) => {
            pub fn $as(&self) -> $ty {
                match self {
                    Value::$variant(value) => value.clone(),
                    other => panic!("expected {}, found {:?}", stringify!($variant), other),
                }
            }

            pub fn $opt(&self) -> Option<$ty> {
                match self {
                    Value::Null => None,
                    Value::$variant(value) => Some(value.clone()),
                    other => panic!("expected {}, found {:?}", stringify!($variant), other),
                }
            }
        };
    }

    impl Value {
        accessors!(as_bool, opt_bool, Bool, bool);
        accessors!(as_char, opt_char, Char, char);
        accessors!(as_f64, opt_f64, F64, f64);
        accessors!(as_str, opt_str, Str, String);
        accessors!(as_u8, opt_u8, U8, u8);
        accessors!(as_u16, opt_u16, U16, u16);
        accessors!(as_u32, opt_u32, U32, u32);
        accessors!(as_u64, opt_u64, U64, u64);
        accessors!(as_u128, opt_u128, U128, u128);
        accessors!(as_i8, opt_i8, I8, i8);
        accessors!(as_i16, opt_i16, I16, i16);
        accessors!(as_i32, opt_i32, I32, i32);
        accessors!(as_i64, opt_i64, I64, i64);
        accessors!(as_i128, opt_i128, I128, i128);

        pub fn is_null(&self) -> bool {
            matches!(self, Value::Null)
        }

        pub fn seq_len(&self) -> u32 {
            match self {
                Value::Seq(items) => items.len() as u32,
                other => panic!("expected a sequence, found {:?}", other),
            }
        }

        pub fn opt_value(&self) -> Option<Value> {
            match self {
                Value::Null => None,
                value => Some(value.clone()),
            }
        }
    }

    #[derive(Debug, Default, Clone)]
    struct ListState {
        cursor: usize,
        elem_open: bool,
    }

    #[derive(Debug, Copy, Clone, PartialEq)]
    enum Mode {
        Read,
        Write,
    }

    /// A cursor into a heap value. Writes build the tree up in traversal
    /// order; per-list element cursors keep reads and writes aligned.
    #[derive(Debug, Clone)]
    pub struct VPtr {
        mode: Mode,
        root: Rc<RefCell<Value>>,
        lists: Rc<RefCell<HashMap<Vec<usize>, ListState>>>,
    }

    impl VPtr {
        pub fn alloc() -> VPtr {
            VPtr {
                mode: Mode::Write,
                root: Rc::new(RefCell::new(Value::Null)),
                lists: Rc::new(RefCell::new(HashMap::new())),
            }
        }

        pub fn of_value(value: Value) -> VPtr {
            VPtr {
                mode: Mode::Read,
                root: Rc::new(RefCell::new(value)),
                lists: Rc::new(RefCell::new(HashMap::new())),
            }
        }

        pub fn value(&self) -> Value {
            self.root.borrow().clone()
        }

        fn with_slot<T>(&self, path: &[usize], with: impl FnOnce(&mut Value) -> T) -> T {
            let mut lists = self.lists.borrow_mut();
            let mut root = self.root.borrow_mut();
            let mut node: &mut Value = &mut root;
            let mut dynamic = Vec::new();
            for &index in path {
                if self.mode == Mode::Write && node.is_null() {
                    *node = Value::Seq(Vec::new());
                }
                let is_list = lists.contains_key(&dynamic);
                let items = match node {
                    Value::Seq(items) => items,
                    other => panic!("navigation through a leaf: {:?}", other),
                };
                let at = if is_list {
                    match self.mode {
                        Mode::Write => {
                            let state = lists.get_mut(&dynamic).expect("list state");
                            if !state.elem_open {
                                items.push(Value::Null);
                                state.elem_open = true;
                            }
                            items.len() - 1
                        }
                        Mode::Read => lists.get(&dynamic).map_or(0, |state| state.cursor),
                    }
                } else {
                    if self.mode == Mode::Write {
                        while items.len() <= index {
                            items.push(Value::Null);
                        }
                    }
                    index
                };
                dynamic.push(at);
                node = match items.get_mut(at) {
                    Some(node) => node,
                    None => panic!("index {} out of bounds", at),
                };
            }
            with(node)
        }

        fn resolve(&self, path: &[usize]) -> Vec<usize> {
            let lists = self.lists.borrow();
            let root = self.root.borrow();
            let mut node: &Value = &root;
            let mut dynamic = Vec::new();
            for &index in path {
                let is_list = lists.contains_key(&dynamic);
                let items = match node {
                    Value::Seq(items) => items,
                    other => panic!("navigation through a leaf: {:?}", other),
                };
                let at = if is_list {
                    match self.mode {
                        Mode::Write => items.len().saturating_sub(1),
                        Mode::Read => lists.get(&dynamic).map_or(0, |state| state.cursor),
                    }
                } else {
                    index
                };
                dynamic.push(at);
                node = match items.get(at) {
                    Some(node) => node,
                    None => panic!("index {} out of bounds", at),
                };
            }
            dynamic
        }

        pub fn get(&self, path: &[usize]) -> Value {
            self.with_slot(path, |slot| slot.clone())
        }

        pub fn set(&self, path: &[usize], value: Value) {
            self.with_slot(path, |slot| *slot = value)
        }

        pub fn is_null(&self, path: &[usize]) -> bool {
            self.with_slot(path, |slot| slot.is_null())
        }

        pub fn list_begin(&self, path: &[usize]) {
            if self.mode == Mode::Write {
                self.with_slot(path, |slot| *slot = Value::Seq(Vec::new()));
            }
            let key = self.resolve(path);
            self.lists.borrow_mut().insert(key, ListState::default());
        }

        pub fn list_next(&self, path: &[usize]) {
            let key = self.resolve(path);
            let mut lists = self.lists.borrow_mut();
            let state = lists.entry(key).or_default();
            if state.elem_open {
                state.elem_open = false;
            } else {
                state.cursor += 1;
            }
        }

        pub fn list_end(&self, path: &[usize]) {
            let key = self.resolve(path);
            self.lists.borrow_mut().remove(&key);
        }
    }

    const LIMB_DIGITS: usize = 19;
    const LIMB_RADIX: u128 = 10_000_000_000_000_000_000;

    /// Fold decimal digits in 19-digit limbs; the sign must already be
    /// stripped so the limb boundary stays aligned.
    fn split_u128(digits: &str) -> Option<u128> {
        if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
            return None;
        }
        if digits.len() <= LIMB_DIGITS {
            return digits.parse().ok();
        }
        let (high, low) = digits.split_at(digits.len() - LIMB_DIGITS);
        let high = split_u128(high)?;
        let low: u128 = low.parse().ok()?;
        high.checked_mul(LIMB_RADIX)?.checked_add(low)
    }

    pub fn parse_u128(src: &str) -> u128 {
        split_u128(src).expect("invalid u128")
    }

    pub fn parse_i128(src: &str) -> i128 {
        let (negative, digits) = match src.strip_prefix('-') {
            Some(digits) => (true, digits),
            None => (false, src),
        };
        let magnitude = split_u128(digits).expect("invalid i128");
        if negative {
            (magnitude as i128).wrapping_neg()
        } else {
            magnitude as i128
        }
    }

    pub fn parse_uint(src: &str, bits: u32) -> u64 {
        let value: u64 = src.parse().expect("invalid integer");
        if value >> bits != 0 {
            panic!("integer out of range for {} bits", bits);
        }
        value
    }

    pub fn parse_sint(src: &str, bits: u32) -> i64 {
        let value: i64 = src.parse().expect("invalid integer");
        let bound = 1i64 << (bits - 1);
        if value >= bound || value < -bound {
            panic!("integer out of range for {} bits", bits);
        }
        value
    }
}
"#;

/// The conventional converter entry point, wrapping a generated function
/// `__ENTRY__(src, dst) -> (src, dst)`.
const MAIN: &str = r#"
fn main() {
    let mut input_path: Option<String> = None;
    let mut delim = b'\n';
    let mut literal: Option<String> = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--input" | "-i" => {
                input_path = Some(args.next().unwrap_or_else(|| {
                    eprintln!("--input needs a path");
                    std::process::exit(2);
                }));
            }
            "--delim" => {
                let value = args.next().unwrap_or_else(|| {
                    eprintln!("--delim needs a character");
                    std::process::exit(2);
                });
                delim = *value.as_bytes().first().unwrap_or(&b'\n');
            }
            _ => literal = Some(arg),
        }
    }

    let single = literal.is_some();
    let input = match (literal, input_path) {
        (Some(literal), _) => literal.into_bytes(),
        (None, Some(path)) => std::fs::read(&path).unwrap_or_else(|err| {
            eprintln!("cannot read {}: {}", path, err);
            std::process::exit(2);
        }),
        (None, None) => {
            use std::io::Read;
            let mut bytes = Vec::new();
            std::io::stdin().read_to_end(&mut bytes).unwrap_or_else(|err| {
                eprintln!("cannot read stdin: {}", err);
                std::process::exit(2);
            });
            bytes
        }
    };

    let src = runtime::Pointer::of_bytes(input);
    let dst = runtime::Pointer::of_bytes(Vec::new());
    let (src, dst) = __ENTRY__(src, dst);

    use std::io::Write;
    let stdout = std::io::stdout();
    let mut stdout = stdout.lock();
    stdout.write_all(&dst.bytes()).expect("cannot write output");
    stdout.write_all(&[delim]).expect("cannot write output");
    drop(stdout);

    if single && src.rem() > 0 {
        eprintln!("{} input bytes left after the record", src.rem());
        std::process::exit(1);
    }
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendState;
    use crate::codec::rowbinary::RowBinarySer;
    use crate::codec::sexpr::SExprDes;
    use crate::desser;
    use crate::expr::GenCtx;
    use crate::schema::parser::parse;

    #[test]
    fn emits_a_converter_function() {
        let mn = parse(0, "{a: u8; b: string?}").unwrap();
        let mut ctx = GenCtx::new();
        let expr = desser::converter(
            &mut SExprDes::default(),
            &mut RowBinarySer,
            &mn,
            &mut ctx,
        )
        .unwrap();
        let mut state = BackendState::new();
        state
            .identifier_of_expression(Some("convert"), expr)
            .unwrap();

        let backend = RustBackend::default();
        let mut decls = String::new();
        backend.print_declarations(&state, &mut decls).unwrap();
        assert!(decls.contains("pub mod runtime"));
        assert!(decls.contains("// convert:"));

        let mut defs = String::new();
        backend.print_definitions(&state, &mut defs).unwrap();
        assert!(defs.contains("include!(\"dessser_decls.rs\");"));
        assert!(defs.contains("pub fn convert(p0_0: runtime::Pointer, p0_1: runtime::Pointer)"));
    }

    #[test]
    fn emits_the_conventional_main() {
        let mut state = BackendState::new();
        let mut ctx = GenCtx::new();
        let fid = ctx.fresh_fid();
        let identity = Expr::func(
            fid,
            vec![Type::DataPtr, Type::DataPtr],
            Expr::pair(Expr::param(fid, 0), Expr::param(fid, 1)),
        );
        state
            .identifier_of_expression(Some("convert"), identity)
            .unwrap();
        let backend = RustBackend {
            main_entry: Some("convert".to_owned()),
            ..RustBackend::default()
        };
        let mut defs = String::new();
        backend.print_definitions(&state, &mut defs).unwrap();
        assert!(defs.contains("fn main()"));
        assert!(defs.contains("convert(src, dst)"));
        assert!(defs.contains("--delim"));
    }

    #[test]
    fn compile_cmd_names_the_toolchain() {
        let backend = RustBackend::default();
        let cmd = backend.compile_cmd(2, Link::Executable, "out.rs", "converter");
        assert_eq!(cmd, "rustc --edition 2021 -C opt-level=2 out.rs -o converter");
    }
}
