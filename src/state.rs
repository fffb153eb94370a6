//! Game states and moves
//!
//! A [`MachineState`] is the set of base propositions that are true. It is created by the state machine and never
//! changes afterwards. Moves are plain action terms scoped to a [`Role`].

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::circuit::ComponentId;

/// Index of a player role in the circuit's role list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Role(pub usize);

impl Role {
    /// Returns the position of the role in the role list.
    pub fn index(self) -> usize {
        self.0
    }
}

/// An action term, e.g. `(mark 1 1)`. Which role plays it is given by the context it is used in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Move(Arc<str>);

impl Move {
    pub fn new(term: impl AsRef<str>) -> Self {
        Self(Arc::from(term.as_ref()))
    }

    pub fn term(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Move {
    fn from(term: &str) -> Self {
        Self::new(term)
    }
}

/// One move per role, in role order.
pub type JointMove = Vec<Move>;

/// The set of base propositions that are true in a state.
///
/// The facts are kept sorted and free of duplicates, so equality and hashing do not depend on the order in which the
/// set was built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct MachineState {
    facts: Arc<[ComponentId]>,
}

impl MachineState {
    /// Creates a state from the base propositions that are true, in any order.
    pub fn new(facts: impl IntoIterator<Item = ComponentId>) -> Self {
        let mut facts: Vec<ComponentId> = facts.into_iter().collect();
        facts.sort_unstable();
        facts.dedup();
        Self { facts: facts.into() }
    }

    /// Returns true if the base proposition is true in this state.
    pub fn contains(&self, proposition: ComponentId) -> bool {
        self.facts.binary_search(&proposition).is_ok()
    }

    /// Returns the true base propositions in ascending id order.
    pub fn facts(&self) -> &[ComponentId] {
        &self.facts
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Returns a 64-bit hash of the state.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.facts.hash(&mut hasher);
        hasher.finish()
    }
}
