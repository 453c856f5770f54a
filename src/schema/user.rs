//! The process-wide user-type catalogue.
//!
//! User types are registered once, before any generator run, and looked up
//! by name afterwards. Writes are quiescent by then, so readers contend on
//! nothing in practice.

use fxhash::FxHashMap;
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::schema::Mn;

/// A named refinement of a value type, with its own textual syntax (the
/// name itself). The generic machinery sees through it to `def` whenever it
/// needs the underlying shape.
#[derive(Debug)]
pub struct UserType {
    pub name: String,
    pub def: Mn,
}

static CATALOGUE: Lazy<RwLock<FxHashMap<String, Arc<UserType>>>> =
    Lazy::new(|| RwLock::new(FxHashMap::default()));

/// Register a new user type. Registration is one-shot: a second
/// registration under the same name fails.
pub fn register(name: &str, def: Mn) -> Result<Arc<UserType>, RegistrationError> {
    let mut catalogue = CATALOGUE.write().unwrap_or_else(|err| err.into_inner());
    if catalogue.contains_key(name) {
        return Err(RegistrationError {
            name: name.to_owned(),
        });
    }
    let user = Arc::new(UserType {
        name: name.to_owned(),
        def,
    });
    catalogue.insert(name.to_owned(), user.clone());
    Ok(user)
}

/// Look up a registered user type by name.
pub fn lookup(name: &str) -> Option<Arc<UserType>> {
    let catalogue = CATALOGUE.read().unwrap_or_else(|err| err.into_inner());
    catalogue.get(name).cloned()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationError {
    pub name: String,
}

impl fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user type `{}` is already registered", self.name)
    }
}

impl std::error::Error for RegistrationError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Mac, ValueType};

    #[test]
    fn registration_is_one_shot() {
        register("Reg4", Mn::mac(Mac::U32)).unwrap();
        assert!(register("Reg4", Mn::mac(Mac::U32)).is_err());
        let user = lookup("Reg4").unwrap();
        assert_eq!(user.def, Mn::NotNullable(ValueType::Mac(Mac::U32)));
    }

    #[test]
    fn lookup_misses_are_none() {
        assert!(lookup("NeverRegistered").is_none());
    }
}
