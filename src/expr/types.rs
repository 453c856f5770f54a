//! Types of the expression IR.

use std::fmt;

use crate::schema::{Mac, Mn, ValueType};

/// The type of an IR expression. Equality is structural.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    /// A schema value.
    Value(Mn),
    Void,
    /// A cursor into a byte stream.
    DataPtr,
    /// A cursor into an in-memory value of the given schema.
    ValuePtr(Mn),
    /// A byte count.
    Size,
    Bit,
    Byte,
    /// 16 bits.
    Word,
    /// 32 bits.
    DWord,
    /// 64 bits.
    QWord,
    /// 128 bits.
    OWord,
    /// A shared byte range.
    Bytes,
    Pair(Box<Type>, Box<Type>),
    Function(Vec<Type>, Box<Type>),
}

impl Type {
    pub fn pair(first: Type, second: Type) -> Type {
        Type::Pair(Box::new(first), Box::new(second))
    }

    pub fn function(params: Vec<Type>, result: Type) -> Type {
        Type::Function(params, Box::new(result))
    }

    /// A non-nullable machine scalar value.
    pub fn mac(mac: Mac) -> Type {
        Type::Value(Mn::mac(mac))
    }

    pub fn bool() -> Type {
        Type::mac(Mac::Bool)
    }

    pub fn u8() -> Type {
        Type::mac(Mac::U8)
    }

    pub fn u16() -> Type {
        Type::mac(Mac::U16)
    }

    pub fn u32() -> Type {
        Type::mac(Mac::U32)
    }

    pub fn u64() -> Type {
        Type::mac(Mac::U64)
    }

    pub fn i32() -> Type {
        Type::mac(Mac::I32)
    }

    pub fn string() -> Type {
        Type::mac(Mac::String)
    }

    pub fn float() -> Type {
        Type::mac(Mac::Float)
    }

    pub fn char() -> Type {
        Type::mac(Mac::Char)
    }

    /// The machine scalar under a non-nullable `Value`, if this is one.
    pub fn as_mac(&self) -> Option<Mac> {
        match self {
            Type::Value(Mn::NotNullable(ValueType::Mac(mac))) => Some(*mac),
            _ => None,
        }
    }

    /// Non-nullable integer or float value.
    pub fn is_numeric(&self) -> bool {
        matches!(self.as_mac(), Some(mac) if mac.is_integer() || mac == Mac::Float)
    }

    /// Non-nullable integer value of any width.
    pub fn is_integer(&self) -> bool {
        matches!(self.as_mac(), Some(mac) if mac.is_integer())
    }

    /// Types with a total order the comparison operators accept.
    pub fn is_comparable(&self) -> bool {
        match self {
            Type::Size
            | Type::Bit
            | Type::Byte
            | Type::Word
            | Type::DWord
            | Type::QWord
            | Type::OWord => true,
            _ => matches!(
                self.as_mac(),
                Some(mac) if mac.is_integer() || matches!(mac, Mac::Float | Mac::Char | Mac::String | Mac::Bool)
            ),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Value(mn) => write!(f, "{}", mn),
            Type::Void => write!(f, "void"),
            Type::DataPtr => write!(f, "dataptr"),
            Type::ValuePtr(mn) => write!(f, "valueptr({})", mn),
            Type::Size => write!(f, "size"),
            Type::Bit => write!(f, "bit"),
            Type::Byte => write!(f, "byte"),
            Type::Word => write!(f, "word"),
            Type::DWord => write!(f, "dword"),
            Type::QWord => write!(f, "qword"),
            Type::OWord => write!(f, "oword"),
            Type::Bytes => write!(f, "bytes"),
            Type::Pair(first, second) => write!(f, "pair({}; {})", first, second),
            Type::Function(params, result) => {
                write!(f, "fun(")?;
                for (index, param) in params.iter().enumerate() {
                    if index > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{}", param)?;
                }
                write!(f, ") -> {}", result)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(Type::u32().is_numeric());
        assert!(Type::float().is_numeric());
        assert!(!Type::float().is_integer());
        assert!(Type::mac(Mac::I40).is_integer());
        assert!(!Type::Value(Mn::Nullable(ValueType::Mac(Mac::U8))).is_numeric());
        assert!(Type::Byte.is_comparable());
        assert!(!Type::DataPtr.is_comparable());
    }

    #[test]
    fn display() {
        assert_eq!(Type::pair(Type::u8(), Type::DataPtr).to_string(), "pair(u8; dataptr)");
        assert_eq!(
            Type::function(vec![Type::Byte], Type::bool()).to_string(),
            "fun(byte) -> bool"
        );
    }
}
