//! Brew error types.
//!
//! The scheduler surfaces exactly one error per brew: the first one
//! observed. Secondary worker errors are logged and swallowed.

use thiserror::Error;

use alkymi_core::recipe::DynError;
use alkymi_core::CoreError;
use alkymi_store::StoreError;

/// Errors produced while evaluating or scheduling recipes.
#[derive(Debug, Error)]
pub enum BrewError {
    /// A bound function returned an error (or panicked).
    #[error("recipe '{recipe}' failed: {source}")]
    UserCode {
        recipe: String,
        #[source]
        source: DynError,
    },

    /// A cleanliness predicate returned an error.
    #[error("cleanliness predicate of '{recipe}' failed: {source}")]
    Cleanliness {
        recipe: String,
        #[source]
        source: DynError,
    },

    /// A recipe name did not resolve against the graph.
    #[error("unknown recipe: '{name}'")]
    UnknownRecipe { name: String },

    /// A foreach recipe's mapped ingredient produced a value that is not an
    /// ordered sequence or keyed mapping.
    #[error("mapped ingredient of '{recipe}' must be a sequence or mapping, got {kind}")]
    MappedKind { recipe: String, kind: &'static str },

    /// A foreach recipe's mapped ingredient did not produce exactly one
    /// output value.
    #[error("mapped ingredient of '{recipe}' must have exactly one output, got {got}")]
    MappedArity { recipe: String, got: usize },

    /// A foreach bound function did not return exactly one value for an
    /// element.
    #[error("foreach recipe '{recipe}' must return exactly one value per element, got {got}")]
    ElementArity { recipe: String, got: usize },

    /// The brew was interrupted.
    #[error("brew cancelled")]
    Cancelled,

    /// The worker pool went away while tasks were still in flight.
    #[error("worker pool terminated unexpectedly")]
    WorkerLost,

    /// A persistence operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A checksum or graph operation failed.
    #[error(transparent)]
    Core(#[from] CoreError),
}
