//! Dirtiness evaluation: classifies every recipe in a target's closure
//! against its cached state and its ingredients' current outputs.
//!
//! The walk is a pure, memoized post-order traversal. It loads evaluation
//! records and output documents but never deserializes blob payloads and
//! never invokes bound functions. The one exception to laziness is an
//! installed cleanliness predicate, which receives the cached output values
//! and therefore forces their load; it only runs when every cheaper check
//! already passed, since every other dirtiness cause outranks it.

use std::collections::HashMap;

use indexmap::IndexMap;

use alkymi_core::checksum::{self, ChecksumOptions};
use alkymi_core::{
    checksum_value, CoreError, EvalRecord, Graph, Recipe, RecipeId, Status, Value,
};
use alkymi_store::{CacheStore, StoreError};

use crate::error::BrewError;

/// Read-only view of the session state needed to classify recipes.
pub(crate) struct StatusContext<'a> {
    pub graph: &'a Graph,
    pub store: &'a CacheStore,
    /// Records established earlier in this session (including transient and
    /// cache-disabled recipes, which never reach the disk store).
    pub session_records: &'a HashMap<RecipeId, EvalRecord>,
    /// Outputs materialized earlier in this session.
    pub session_outputs: &'a HashMap<RecipeId, Vec<Value>>,
}

impl<'a> StatusContext<'a> {
    /// Whether a recipe's results are ever written to disk.
    pub(crate) fn persists(&self, recipe: &Recipe) -> bool {
        self.store.is_enabled() && recipe.cache_enabled() && !recipe.is_transient()
    }

    /// The recipe's current evaluation record: this session's if present,
    /// otherwise the persisted one.
    pub(crate) fn record_of(&self, id: RecipeId, recipe: &Recipe) -> Option<EvalRecord> {
        if let Some(record) = self.session_records.get(&id) {
            return Some(record.clone());
        }
        if self.persists(recipe) {
            self.store.load_record(recipe.name())
        } else {
            None
        }
    }

    /// The recipe's current output values, forcing deserialization.
    pub(crate) fn outputs_of(&self, id: RecipeId, recipe: &Recipe) -> Result<Vec<Value>, BrewError> {
        if let Some(values) = self.session_outputs.get(&id) {
            return Ok(values.clone());
        }
        let handles = self
            .store
            .load_output_handles(recipe.name())
            .ok_or_else(|| BrewError::Store(StoreError::InvalidDocument {
                reason: format!("no cached outputs for recipe '{}'", recipe.name()),
            }))?;
        let values = handles
            .iter()
            .map(|h| h.load())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(values)
    }
}

/// Computes the status of every recipe in `target`'s transitive closure.
///
/// Returned in post-order (ingredients before consumers, target last).
pub(crate) fn evaluate_statuses(
    ctx: &StatusContext<'_>,
    target: RecipeId,
) -> Result<IndexMap<RecipeId, Status>, BrewError> {
    let order = ctx.graph.closure(target)?;
    let mut statuses: IndexMap<RecipeId, Status> = IndexMap::with_capacity(order.len());
    for id in order {
        let status = node_status(ctx, id, |ingredient| {
            statuses.get(&ingredient).copied().unwrap_or(Status::Ok)
        })?;
        statuses.insert(id, status);
    }
    Ok(statuses)
}

/// Classifies a single recipe, given its ingredients' statuses.
///
/// The executor reuses this after a recipe's ingredients have completed
/// (passing `|_| Status::Ok`) to decide whether an invocation can still be
/// skipped; a node marked dirty only because an ingredient was dirty comes
/// out clean here when the ingredient's fresh outputs match the record.
pub(crate) fn node_status<F>(
    ctx: &StatusContext<'_>,
    id: RecipeId,
    ingredient_status: F,
) -> Result<Status, BrewError>
where
    F: Fn(RecipeId) -> Status,
{
    let recipe = ctx.graph.recipe(id)?;
    let opts = ctx.graph.config().checksum_options();

    let Some(record) = ctx.record_of(id, recipe) else {
        return Ok(Status::NotEvaluatedYet);
    };

    // Argument recipes: dirty iff the stored value no longer matches the
    // recorded output.
    if let Some(value) = recipe.arg_value() {
        let current = checksum_value(value, &opts)?;
        if record.output_checksums != [current] {
            return Ok(Status::InputsChanged);
        }
        return Ok(Status::Ok);
    }

    let mut causes = Vec::new();

    // Ingredient phase: a dirty ingredient, or an ingredient whose outputs
    // changed since the record was written, both surface as InputsChanged.
    let ingredients = recipe.ingredients();
    if ingredients.iter().any(|&i| ingredient_status(i).is_dirty()) {
        causes.push(Status::InputsChanged);
    } else if record.ingredient_checksums.len() != ingredients.len() {
        causes.push(Status::InputsChanged);
    } else {
        for (pos, &ingredient) in ingredients.iter().enumerate() {
            let ing_recipe = ctx.graph.recipe(ingredient)?;
            let Some(ing_record) = ctx.record_of(ingredient, ing_recipe) else {
                causes.push(Status::InputsChanged);
                break;
            };
            let current = checksum::checksum_tuple(&ing_record.output_checksums);
            if current != record.ingredient_checksums[pos] {
                causes.push(Status::InputsChanged);
                break;
            }
        }
    }

    // Foreach phase: compare the aggregate mapped-input checksum. Any
    // difference reports InputsChanged, even when partial results exist.
    if let Some(mapped) = recipe.mapped_index() {
        match &record.foreach {
            None => {
                // A foreach record without its foreach part is a schema
                // violation; treat as never evaluated.
                return Ok(Status::NotEvaluatedYet);
            }
            Some(foreach) => {
                let mapped_id = ingredients[mapped];
                if !ingredient_status(mapped_id).is_dirty() {
                    let ing_recipe = ctx.graph.recipe(mapped_id)?;
                    match ctx.record_of(mapped_id, ing_recipe) {
                        Some(ing_record) if ing_record.output_checksums.len() == 1 => {
                            if ing_record.output_checksums[0] != foreach.mapped_checksum {
                                causes.push(Status::InputsChanged);
                            }
                        }
                        _ => causes.push(Status::InputsChanged),
                    }
                }
            }
        }
    }

    // Bound-function phase.
    let function_checksum = match recipe.bound() {
        Some(bound) => bound.checksum(),
        None => {
            return Err(BrewError::Core(CoreError::GraphInconsistency {
                reason: format!("recipe '{}' has no bound function", recipe.name()),
            }))
        }
    };
    if function_checksum != record.function_checksum {
        causes.push(Status::BoundFunctionChanged);
    }

    // Output phase: re-derive output checksums. This is where external
    // files referenced by cached outputs are re-hashed.
    match verify_outputs(ctx, id, recipe, &record, &opts)? {
        OutputState::Valid => {}
        OutputState::Invalid => causes.push(Status::OutputsInvalid),
        OutputState::Corrupt => return Ok(Status::NotEvaluatedYet),
    }

    // Cleanliness phase: every other cause outranks CustomDirty, so the
    // predicate only runs when nothing else is wrong.
    if causes.is_empty() {
        if let Some(predicate) = recipe.cleanliness() {
            let outputs = ctx.outputs_of(id, recipe)?;
            let clean = predicate(&outputs).map_err(|source| BrewError::Cleanliness {
                recipe: recipe.name().to_owned(),
                source,
            })?;
            if !clean {
                causes.push(Status::CustomDirty);
            }
        }
    }

    Ok(Status::combine(causes))
}

enum OutputState {
    Valid,
    Invalid,
    Corrupt,
}

/// Compares the recorded output checksums against what is materialized:
/// in-memory session outputs when present, otherwise the persisted
/// documents (without touching blob payloads).
fn verify_outputs(
    ctx: &StatusContext<'_>,
    id: RecipeId,
    recipe: &Recipe,
    record: &EvalRecord,
    opts: &ChecksumOptions,
) -> Result<OutputState, BrewError> {
    if let Some(values) = ctx.session_outputs.get(&id) {
        if values.len() != record.output_checksums.len() {
            return Ok(OutputState::Invalid);
        }
        for (value, recorded) in values.iter().zip(&record.output_checksums) {
            match checksum_value(value, opts) {
                Ok(current) if current == *recorded => {}
                Ok(_) => return Ok(OutputState::Invalid),
                Err(CoreError::FileUnreadable { .. }) => return Ok(OutputState::Invalid),
                Err(e) => return Err(e.into()),
            }
        }
        return Ok(OutputState::Valid);
    }

    let Some(handles) = ctx.store.load_output_handles(recipe.name()) else {
        return Ok(OutputState::Corrupt);
    };
    if handles.len() != record.output_checksums.len() {
        return Ok(OutputState::Corrupt);
    }
    for (handle, recorded) in handles.iter().zip(&record.output_checksums) {
        match handle.checksum(opts) {
            Ok(current) if current == *recorded => {}
            Ok(_) => return Ok(OutputState::Invalid),
            Err(StoreError::BlobMissing { .. }) => return Ok(OutputState::Invalid),
            Err(StoreError::Checksum(CoreError::FileUnreadable { .. })) => {
                return Ok(OutputState::Invalid)
            }
            Err(StoreError::InvalidDocument { .. })
            | Err(StoreError::Checksum(CoreError::InvalidChecksum { .. })) => {
                return Ok(OutputState::Corrupt)
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(OutputState::Valid)
}
