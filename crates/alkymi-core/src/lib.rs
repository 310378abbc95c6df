//! Core data model for the alkymi incremental computation engine.
//!
//! Provides the tagged [`Value`] representation, the checksum and
//! bound-function fingerprint scheme, the [`Recipe`] / [`Graph`] node model
//! with its dirtiness [`Status`] taxonomy, and the engine [`Config`].
//! Evaluation and persistence live in the companion crates.

pub mod checksum;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod graph;
pub mod id;
pub mod recipe;
pub mod status;
pub mod value;

// Re-export commonly used types
pub use checksum::{checksum_outputs, checksum_path, checksum_tuple, checksum_value};
pub use checksum::{Checksum, ChecksumOptions};
pub use config::{Config, FileChecksumMethod, DEFAULT_CACHE_DIR};
pub use error::CoreError;
pub use fingerprint::FnFingerprint;
pub use graph::Graph;
pub use id::RecipeId;
pub use recipe::{
    BoundFn, CleanlinessFn, DynError, ElementRecord, EvalRecord, ForeachRecord, Ingredients,
    IngredientSource, Outputs, Recipe, RecipeBuilder, RecipeKind,
};
pub use status::Status;
pub use value::Value;
