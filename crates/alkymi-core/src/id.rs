//! Stable ID newtype for graph entities.
//!
//! [`RecipeId`] is a distinct newtype wrapper over `u32`, providing type
//! safety and a stable identity that maps to a petgraph `NodeIndex<u32>`.

use std::fmt;

use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};

/// Stable recipe identifier. Maps to a petgraph `NodeIndex<u32>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecipeId(pub u32);

impl fmt::Display for RecipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Bridge between RecipeId and petgraph's NodeIndex<u32>.

impl From<NodeIndex<u32>> for RecipeId {
    fn from(idx: NodeIndex<u32>) -> Self {
        RecipeId(idx.index() as u32)
    }
}

impl From<RecipeId> for NodeIndex<u32> {
    fn from(id: RecipeId) -> Self {
        NodeIndex::new(id.0 as usize)
    }
}
