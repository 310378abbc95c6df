//! Core error types for alkymi-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering all
//! anticipated failure modes in the graph model and the checksum scheme.

use std::path::PathBuf;

use thiserror::Error;

use crate::id::RecipeId;

/// Core errors produced by the alkymi-core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Attempting to register a recipe name that already exists in the graph.
    #[error("duplicate recipe name: '{name}'")]
    DuplicateRecipeName { name: String },

    /// A recipe lists an ingredient that is not part of the graph.
    #[error("unknown ingredient {id} for recipe '{recipe}'")]
    UnknownIngredient { recipe: String, id: RecipeId },

    /// A recipe ID was not found in the graph.
    #[error("recipe not found: RecipeId({id})", id = id.0)]
    RecipeNotFound { id: RecipeId },

    /// A recipe was built without a bound function.
    #[error("recipe '{name}' has no bound function")]
    MissingBoundFunction { name: String },

    /// The mapped input of a foreach recipe is not among its ingredients.
    #[error("mapped ingredient of foreach recipe '{name}' is not among its ingredients")]
    MappedNotAnIngredient { name: String },

    /// An argument operation was applied to a recipe that is not an
    /// argument holder.
    #[error("recipe '{name}' is not an argument recipe")]
    NotAnArgument { name: String },

    /// An opaque value was checksummed or serialized while opaque support
    /// is disabled in the configuration.
    #[error("opaque value (codec '{codec}') refused: opaque values are disabled")]
    OpaqueDisabled { codec: String },

    /// A file referenced by a `Value::Path` could not be read while hashing.
    #[error("cannot read '{path}' while checksumming: {source}")]
    FileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A checksum literal did not parse as 32 hex digits.
    #[error("invalid checksum literal: '{text}'")]
    InvalidChecksum { text: String },

    /// A graph invariant was violated.
    #[error("graph inconsistency: {reason}")]
    GraphInconsistency { reason: String },
}
