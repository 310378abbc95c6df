//! Recipe nodes: bound functions, ingredient access, evaluation records.
//!
//! A [`Recipe`] wraps a pure-ish function together with its ordered
//! ingredient references and caching flags. The decorator surface of the
//! source system becomes a [`RecipeBuilder`]; the engine itself only ever
//! sees the constructed node.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::checksum::{checksum_value, Checksum, ChecksumOptions};
use crate::error::CoreError;
use crate::fingerprint::FnFingerprint;
use crate::id::RecipeId;
use crate::value::Value;

/// Boxed error type returned from user code.
pub type DynError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A fixed-arity output tuple. Arity 0 denotes a unit result which is still
/// recorded as evaluated.
pub type Outputs = SmallVec<[Value; 1]>;

/// Cleanliness predicate called with the cached outputs; returning false
/// marks the recipe dirty even when all checksums match.
pub type CleanlinessFn = Arc<dyn Fn(&[Value]) -> Result<bool, DynError> + Send + Sync>;

/// Source of one ingredient's output tuple, loaded on first access.
///
/// The store crate implements this for its lazy output handles; the
/// executor uses it so a bound function only forces deserialization of the
/// inputs it actually consumes.
pub trait IngredientSource: Send {
    fn load(&self) -> Result<Vec<Value>, DynError>;
}

enum Slot {
    Ready(Vec<Value>),
    Lazy(Box<dyn IngredientSource>),
}

/// The inputs handed to a bound function: one slot per ingredient, each
/// holding that ingredient's output tuple.
pub struct Ingredients {
    slots: Vec<Slot>,
}

impl Ingredients {
    pub fn new() -> Self {
        Ingredients { slots: Vec::new() }
    }

    /// Appends an already-materialized output tuple.
    pub fn push_values(&mut self, values: Vec<Value>) {
        self.slots.push(Slot::Ready(values));
    }

    /// Appends a lazily-loaded output tuple.
    pub fn push_lazy(&mut self, source: Box<dyn IngredientSource>) {
        self.slots.push(Slot::Lazy(source));
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns ingredient `index`'s output tuple, loading it on first access.
    pub fn get(&mut self, index: usize) -> Result<&[Value], DynError> {
        let len = self.slots.len();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or_else(|| format!("ingredient index {} out of range ({} slots)", index, len))?;
        if let Slot::Lazy(source) = slot {
            let values = source.load()?;
            *slot = Slot::Ready(values);
        }
        match slot {
            Slot::Ready(values) => Ok(values.as_slice()),
            Slot::Lazy(_) => Err("ingredient failed to materialize".into()),
        }
    }

    /// Returns ingredient `index`'s single output, erroring on other arities.
    pub fn one(&mut self, index: usize) -> Result<&Value, DynError> {
        let values = self.get(index)?;
        match values {
            [single] => Ok(single),
            _ => Err(format!(
                "ingredient {} has {} outputs, expected exactly 1",
                index,
                values.len()
            )
            .into()),
        }
    }
}

impl Default for Ingredients {
    fn default() -> Self {
        Ingredients::new()
    }
}

type RecipeFn = dyn Fn(&mut Ingredients) -> Result<Outputs, DynError> + Send + Sync;

/// A user function bound into a recipe, together with its fingerprint.
///
/// Construct with the [`bound_fn!`](crate::bound_fn) macro so the closure's
/// token text enters the fingerprint; register captured constants with
/// [`BoundFn::capture`] and referenced bound functions with [`BoundFn::uses`].
#[derive(Clone)]
pub struct BoundFn {
    func: Arc<RecipeFn>,
    fingerprint: FnFingerprint,
}

impl BoundFn {
    /// Builds a bound function from a closure and its token text.
    ///
    /// Prefer the `bound_fn!` macro, which supplies the text automatically.
    pub fn from_parts<F>(func: F, body: &str) -> Self
    where
        F: Fn(&mut Ingredients) -> Result<Outputs, DynError> + Send + Sync + 'static,
    {
        BoundFn {
            func: Arc::new(func),
            fingerprint: FnFingerprint::from_body(body),
        }
    }

    /// Registers a captured constant so its content enters the fingerprint.
    pub fn capture(mut self, value: &Value) -> Result<Self, CoreError> {
        let checksum = checksum_value(value, &ChecksumOptions::default())?;
        self.fingerprint.push_capture(checksum);
        Ok(self)
    }

    /// Registers another bound function this closure calls into, so changes
    /// to it propagate into this fingerprint.
    pub fn uses(mut self, other: &BoundFn) -> Self {
        self.fingerprint.push_use(&other.fingerprint);
        self
    }

    /// The combined fingerprint checksum.
    pub fn checksum(&self) -> Checksum {
        self.fingerprint.checksum()
    }

    /// Invokes the wrapped closure.
    pub fn call(&self, inputs: &mut Ingredients) -> Result<Outputs, DynError> {
        (self.func)(inputs)
    }
}

impl fmt::Debug for BoundFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundFn")
            .field("checksum", &self.checksum())
            .finish()
    }
}

/// Wraps a closure into a [`BoundFn`], capturing its token text for the
/// function fingerprint.
#[macro_export]
macro_rules! bound_fn {
    ($func:expr) => {
        $crate::recipe::BoundFn::from_parts($func, stringify!($func))
    };
}

/// What kind of node a recipe is.
#[derive(Debug, Clone)]
pub enum RecipeKind {
    /// Plain recipe: one invocation per evaluation.
    Simple,
    /// Mapping recipe: one invocation per element of the mapped ingredient,
    /// identified by its position in the ingredient list.
    Foreach { mapped: usize },
    /// Argument holder: stores a mutable value; setting it invalidates
    /// downstream records by changing this node's output checksum.
    Arg { value: Value },
}

/// A DAG node wrapping a pure-ish function plus its dependency list.
pub struct Recipe {
    name: String,
    doc: Option<String>,
    ingredients: Vec<RecipeId>,
    kind: RecipeKind,
    bound: Option<BoundFn>,
    cleanliness: Option<CleanlinessFn>,
    transient: bool,
    cache: bool,
}

impl Recipe {
    /// Starts building a plain recipe.
    pub fn builder(name: impl Into<String>) -> RecipeBuilder {
        RecipeBuilder {
            name: name.into(),
            doc: None,
            ingredients: Vec::new(),
            mapped: None,
            bound: None,
            cleanliness: None,
            transient: false,
            cache: true,
        }
    }

    /// Builds an argument-holder recipe with an initial value.
    pub fn arg(name: impl Into<String>, initial: Value) -> Recipe {
        Recipe {
            name: name.into(),
            doc: None,
            ingredients: Vec::new(),
            kind: RecipeKind::Arg { value: initial },
            bound: None,
            cleanliness: None,
            transient: false,
            cache: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    pub fn ingredients(&self) -> &[RecipeId] {
        &self.ingredients
    }

    pub fn kind(&self) -> &RecipeKind {
        &self.kind
    }

    pub fn bound(&self) -> Option<&BoundFn> {
        self.bound.as_ref()
    }

    pub fn cleanliness(&self) -> Option<&CleanlinessFn> {
        self.cleanliness.as_ref()
    }

    /// Transient recipes are never persisted and are dirty in every new
    /// session.
    pub fn is_transient(&self) -> bool {
        self.transient
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache
    }

    /// For a foreach recipe, the position of the mapped ingredient.
    pub fn mapped_index(&self) -> Option<usize> {
        match self.kind {
            RecipeKind::Foreach { mapped } => Some(mapped),
            _ => None,
        }
    }

    /// The stored value of an argument recipe.
    pub fn arg_value(&self) -> Option<&Value> {
        match &self.kind {
            RecipeKind::Arg { value } => Some(value),
            _ => None,
        }
    }

    /// Replaces the stored value of an argument recipe.
    pub fn set_arg_value(&mut self, value: Value) -> Result<(), CoreError> {
        match &mut self.kind {
            RecipeKind::Arg { value: stored } => {
                *stored = value;
                Ok(())
            }
            _ => Err(CoreError::NotAnArgument {
                name: self.name.clone(),
            }),
        }
    }
}

impl fmt::Debug for Recipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recipe")
            .field("name", &self.name)
            .field("ingredients", &self.ingredients)
            .field("kind", &self.kind)
            .field("transient", &self.transient)
            .field("cache", &self.cache)
            .finish()
    }
}

/// Builder for [`Recipe`] nodes.
pub struct RecipeBuilder {
    name: String,
    doc: Option<String>,
    ingredients: Vec<RecipeId>,
    mapped: Option<RecipeId>,
    bound: Option<BoundFn>,
    cleanliness: Option<CleanlinessFn>,
    transient: bool,
    cache: bool,
}

impl RecipeBuilder {
    /// Appends an ingredient reference; order is significant.
    pub fn ingredient(mut self, id: RecipeId) -> Self {
        self.ingredients.push(id);
        self
    }

    /// Appends several ingredient references.
    pub fn ingredients<I: IntoIterator<Item = RecipeId>>(mut self, ids: I) -> Self {
        self.ingredients.extend(ids);
        self
    }

    /// Turns the recipe into a foreach recipe mapped over the given
    /// ingredient, which must appear in the ingredient list.
    pub fn map_over(mut self, id: RecipeId) -> Self {
        self.mapped = Some(id);
        self
    }

    /// Installs the bound function.
    pub fn bound(mut self, func: BoundFn) -> Self {
        self.bound = Some(func);
        self
    }

    /// Installs a cleanliness predicate called with the cached outputs.
    pub fn cleanliness<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&[Value]) -> Result<bool, DynError> + Send + Sync + 'static,
    {
        self.cleanliness = Some(Arc::new(predicate));
        self
    }

    /// Marks the recipe transient: outputs are never persisted and the node
    /// is dirty in every new session.
    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    /// Disables persistence for this recipe only.
    pub fn no_cache(mut self) -> Self {
        self.cache = false;
        self
    }

    /// Attaches a doc string.
    pub fn doc(mut self, text: impl Into<String>) -> Self {
        self.doc = Some(text.into());
        self
    }

    /// Finishes the build, validating the node's own invariants. Ingredient
    /// existence is validated by [`Graph::add`](crate::graph::Graph::add).
    pub fn build(self) -> Result<Recipe, CoreError> {
        let bound = self.bound.ok_or_else(|| CoreError::MissingBoundFunction {
            name: self.name.clone(),
        })?;

        let kind = match self.mapped {
            None => RecipeKind::Simple,
            Some(id) => {
                let mapped = self
                    .ingredients
                    .iter()
                    .position(|&ing| ing == id)
                    .ok_or_else(|| CoreError::MappedNotAnIngredient {
                        name: self.name.clone(),
                    })?;
                RecipeKind::Foreach { mapped }
            }
        };

        Ok(Recipe {
            name: self.name,
            doc: self.doc,
            ingredients: self.ingredients,
            kind,
            bound: Some(bound),
            cleanliness: self.cleanliness,
            transient: self.transient,
            cache: self.cache,
        })
    }
}

/// Per-element record of a foreach evaluation: the element's input checksum
/// and the checksum of the corresponding output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementRecord {
    pub input: Checksum,
    pub output: Checksum,
}

/// Foreach-specific part of an evaluation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeachRecord {
    /// Aggregate checksum over the whole mapped ingredient, order-preserving.
    pub mapped_checksum: Checksum,
    /// Per-element records in the evaluation's input order.
    pub elements: Vec<ElementRecord>,
}

impl ForeachRecord {
    /// Looks up the recorded output checksum for an element input checksum.
    pub fn output_for(&self, input: Checksum) -> Option<(usize, Checksum)> {
        self.elements
            .iter()
            .position(|e| e.input == input)
            .map(|i| (i, self.elements[i].output))
    }
}

/// The per-recipe evaluation record persisted alongside outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalRecord {
    /// One checksum per ingredient: the tuple checksum of its outputs at
    /// evaluation time.
    pub ingredient_checksums: Vec<Checksum>,
    /// One checksum per output value.
    pub output_checksums: Vec<Checksum>,
    /// The bound function's fingerprint checksum.
    pub function_checksum: Checksum,
    /// Present only for foreach recipes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreach: Option<ForeachRecord>,
}
