//! Paths address a subtree of a schema.
//!
//! A path is a sequence of child indices. Crossing a `Nullable` or a user
//! type is transparent; `Map` and scalars are terminal.

use std::fmt;

use crate::schema::{Mn, ValueType};

/// A finite ordered sequence of child indices. `[]` denotes the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Path(pub Vec<usize>);

impl Path {
    pub fn root() -> Path {
        Path(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// This path extended by one child index.
    pub fn child(&self, index: usize) -> Path {
        let mut indices = self.0.clone();
        indices.push(index);
        Path(indices)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for index in &self.0 {
            if !first {
                write!(f, "/")?;
            }
            write!(f, "{}", index)?;
            first = false;
        }
        Ok(())
    }
}

impl std::str::FromStr for Path {
    type Err = std::num::ParseIntError;

    fn from_str(src: &str) -> Result<Path, Self::Err> {
        if src.is_empty() {
            return Ok(Path::root());
        }
        src.split('/')
            .map(|index| index.parse())
            .collect::<Result<_, _>>()
            .map(Path)
    }
}

/// Navigation errors, with the offending depth into the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// Index into a vector or compound is out of bounds.
    OutOfBounds { depth: usize, index: usize },
    /// The type at this depth has no children.
    Terminal { depth: usize },
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathError::OutOfBounds { depth, index } => {
                write!(f, "index {} out of bounds at depth {}", index, depth)
            }
            PathError::Terminal { depth } => {
                write!(f, "type at depth {} has no children", depth)
            }
        }
    }
}

impl std::error::Error for PathError {}

/// The type of the subtree addressed by `path` within `root`.
pub fn type_of_path(root: &Mn, path: &Path) -> Result<Mn, PathError> {
    let mut current = root.clone();
    for (depth, &index) in path.0.iter().enumerate() {
        // The nullable bit is transparent to navigation.
        current = match current.vtype().resolved() {
            ValueType::Vec(dim, item) => {
                if index >= *dim as usize {
                    return Err(PathError::OutOfBounds { depth, index });
                }
                (**item).clone()
            }
            ValueType::List(item) => (**item).clone(),
            ValueType::Tup(items) => items
                .get(index)
                .cloned()
                .ok_or(PathError::OutOfBounds { depth, index })?,
            ValueType::Rec(fields) => fields
                .get(index)
                .map(|(_, mn)| mn.clone())
                .ok_or(PathError::OutOfBounds { depth, index })?,
            ValueType::Mac(_) | ValueType::Map(_, _) => {
                return Err(PathError::Terminal { depth })
            }
            ValueType::Usr(_) => unreachable!("resolved() saw through user types"),
        };
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parser::parse;
    use crate::schema::{user, Mac};

    fn mn(source: &str) -> Mn {
        parse(0, source).unwrap()
    }

    #[test]
    fn root_path_is_identity() {
        let root = mn("{a: u8; b: string?}");
        assert_eq!(type_of_path(&root, &Path::root()), Ok(root));
    }

    #[test]
    fn record_and_tuple_children() {
        let root = mn("{a: u8; b: (bool; float)?}");
        assert_eq!(type_of_path(&root, &Path(vec![0])), Ok(mn("u8")));
        // The nullable marker on `b` is not consumed by the path.
        assert_eq!(type_of_path(&root, &Path(vec![1, 1])), Ok(mn("float")));
    }

    #[test]
    fn vector_bounds_are_checked() {
        let root = mn("u8[4]");
        assert_eq!(type_of_path(&root, &Path(vec![3])), Ok(mn("u8")));
        assert_eq!(
            type_of_path(&root, &Path(vec![4])),
            Err(PathError::OutOfBounds { depth: 0, index: 4 })
        );
    }

    #[test]
    fn scalars_and_maps_are_terminal() {
        assert_eq!(
            type_of_path(&mn("u8"), &Path(vec![0])),
            Err(PathError::Terminal { depth: 0 })
        );
        assert_eq!(
            type_of_path(&mn("bool[string]"), &Path(vec![0])),
            Err(PathError::Terminal { depth: 0 })
        );
    }

    #[test]
    fn user_types_are_transparent() {
        user::register("Pair16", mn("(u16; u16)")).unwrap();
        let root = parse(0, "Pair16[2]").unwrap();
        assert_eq!(type_of_path(&root, &Path(vec![0, 1])), Ok(mn("u16")));
    }

    #[test]
    fn display_round_trips() {
        let path = Path(vec![0, 2, 1]);
        assert_eq!(path.to_string(), "0/2/1");
        assert_eq!("0/2/1".parse::<Path>().unwrap(), path);
        assert_eq!("".parse::<Path>().unwrap(), Path::root());
    }
}
