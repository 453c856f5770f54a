//! The backend interface: turning checked IR expressions into source code
//! for a target language.
//!
//! A [`BackendState`] is an ordered table of named declarations. Because a
//! declaration can only refer to identifiers declared before it, creation
//! order is already topological: printing in order puts leaves first.

pub mod rust;

use std::fmt;

use fxhash::FxHashSet;

use crate::expr::typing::{self, TypeError};
use crate::expr::{Expr, Type};
use crate::schema::Mn;

/// A named, typed, checked definition.
#[derive(Debug, Clone)]
pub struct Declaration {
    pub name: String,
    pub r#type: Type,
    pub expr: Expr,
}

#[derive(Debug)]
pub enum BackendError {
    Type(TypeError),
    /// Top-level nullable values have no sensible printed form.
    NullableTopLevel { name: String },
    DuplicateName { name: String },
}

impl From<TypeError> for BackendError {
    fn from(error: TypeError) -> BackendError {
        BackendError::Type(error)
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Type(error) => error.fmt(f),
            BackendError::NullableTopLevel { name } => {
                write!(f, "declaration `{}` would be nullable at top level", name)
            }
            BackendError::DuplicateName { name } => {
                write!(f, "declaration `{}` already exists", name)
            }
        }
    }
}

impl std::error::Error for BackendError {}

/// The mutable state a backend accumulates declarations into.
#[derive(Default)]
pub struct BackendState {
    decls: Vec<Declaration>,
    names: FxHashSet<String>,
    types: typing::Context,
    next_name: u32,
}

impl BackendState {
    pub fn new() -> BackendState {
        BackendState::default()
    }

    /// Type-check `expr`, record it under `name` (or a fresh one), and
    /// return an identifier expression standing for it together with the
    /// printed name.
    pub fn identifier_of_expression(
        &mut self,
        name: Option<&str>,
        expr: Expr,
    ) -> Result<(Expr, String), BackendError> {
        let r#type = self.types.type_of(&expr)?;
        let name = match name {
            Some(name) => name.to_owned(),
            None => {
                let name = format!("def_{}", self.next_name);
                self.next_name += 1;
                name
            }
        };
        if let Type::Value(Mn::Nullable(_)) = r#type {
            return Err(BackendError::NullableTopLevel { name });
        }
        if !self.names.insert(name.clone()) {
            return Err(BackendError::DuplicateName { name });
        }
        self.types.declare_ident(&name, r#type.clone());
        self.decls.push(Declaration {
            name: name.clone(),
            r#type,
            expr,
        });
        Ok((Expr::ident(name.clone()), name))
    }

    /// Declarations in creation (hence topological) order.
    pub fn declarations(&self) -> &[Declaration] {
        &self.decls
    }
}

/// Whether [`Backend::compile_cmd`] should produce an object file or a
/// linked executable.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Link {
    Object,
    Executable,
}

/// A target language.
///
/// A backend must preserve IR semantics: the emitted code evaluates every
/// well-typed expression to a value of the mapped target type, numerically
/// identical for scalars and structurally identical for compounds.
pub trait Backend {
    fn preferred_def_extension(&self) -> &'static str;
    fn preferred_decl_extension(&self) -> &'static str;

    /// The shell command that compiles the emitted definitions file.
    fn compile_cmd(&self, optim: u8, link: Link, src: &str, out: &str) -> String;

    /// Emit the declarations file: the runtime support and the identifier
    /// table.
    fn print_declarations(&self, state: &BackendState, out: &mut dyn fmt::Write) -> fmt::Result;

    /// Emit the definitions file. Together with the declarations it forms
    /// a single translation unit.
    fn print_definitions(&self, state: &BackendState, out: &mut dyn fmt::Write) -> fmt::Result;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Mac, ValueType};

    #[test]
    fn declarations_are_ordered_and_typed() {
        let mut state = BackendState::new();
        let (first, name) = state
            .identifier_of_expression(None, Expr::u8(7))
            .unwrap();
        // Later declarations may use earlier ones.
        let (_, _) = state
            .identifier_of_expression(Some("twice"), Expr::add(first.clone(), first))
            .unwrap();
        assert_eq!(state.declarations().len(), 2);
        assert_eq!(state.declarations()[0].name, name);
        assert_eq!(state.declarations()[1].r#type, Type::u8());
    }

    #[test]
    fn nullable_top_level_is_rejected() {
        let mut state = BackendState::new();
        let result =
            state.identifier_of_expression(Some("bad"), Expr::null(ValueType::Mac(Mac::U8)));
        assert!(matches!(
            result,
            Err(BackendError::NullableTopLevel { .. })
        ));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut state = BackendState::new();
        state
            .identifier_of_expression(Some("x"), Expr::u8(1))
            .unwrap();
        assert!(matches!(
            state.identifier_of_expression(Some("x"), Expr::u8(2)),
            Err(BackendError::DuplicateName { .. })
        ));
    }

    #[test]
    fn undeclared_references_fail() {
        let mut state = BackendState::new();
        assert!(matches!(
            state.identifier_of_expression(None, Expr::ident("missing")),
            Err(BackendError::Type(TypeError::UndefinedIdentifier { .. }))
        ));
    }
}
