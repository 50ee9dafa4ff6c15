//! Object addressing.

use std::fmt;

/// Handle to a script object.
///
/// Registry objects are addressed by their position in the object registry,
/// which is also the index used by save-file back-references. The player is
/// not part of the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectRef {
    /// The distinguished player object.
    Player,
    /// A registry object at the given index.
    Registry(usize),
}

impl ObjectRef {
    /// Registry index, or `None` for the player.
    #[must_use]
    pub fn index(self) -> Option<usize> {
        match self {
            Self::Player => None,
            Self::Registry(index) => Some(index),
        }
    }

    /// Whether this handle addresses the player.
    #[must_use]
    pub fn is_player(self) -> bool {
        matches!(self, Self::Player)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Player => f.write_str("player"),
            Self::Registry(index) => write!(f, "object#{index}"),
        }
    }
}
