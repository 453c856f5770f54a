#![doc = include_str!("../README.md")]

// Supporting modules
pub mod literal;
pub mod reporting;
pub mod source;

// The schema algebra and the expression IR
pub mod expr;
pub mod schema;

// Codecs and the generic driver
pub mod codec;
pub mod desser;
pub mod heap;

// Source emission
pub mod backend;

// Public exports
pub use crate::expr::{Expr, GenCtx, Type};
pub use crate::schema::{Mac, Mn, Path, ValueType};
