//! Session entry points: `status` and `brew` over a recipe graph.
//!
//! A [`Session`] owns the graph, the cache store derived from the graph's
//! configuration, and the outputs materialized so far in this process. The
//! engine assumes exclusive ownership of the cache root during a brew;
//! multiple brews in one process are serialized by `&mut self`.

use std::collections::HashMap;

use indexmap::IndexMap;

use alkymi_core::{EvalRecord, Graph, RecipeId, Status, Value};
use alkymi_store::CacheStore;

use crate::dirty::{self, StatusContext};
use crate::error::BrewError;
use crate::executor::{self, CancelToken};

/// An evaluation session over a recipe graph.
pub struct Session {
    graph: Graph,
    store: CacheStore,
    records: HashMap<RecipeId, EvalRecord>,
    outputs: HashMap<RecipeId, Vec<Value>>,
}

impl Session {
    /// Opens a session, creating the cache root named by the graph's
    /// configuration.
    pub fn new(graph: Graph) -> Result<Self, BrewError> {
        let store = CacheStore::new(graph.config())?;
        Ok(Session {
            graph,
            store,
            records: HashMap::new(),
            outputs: HashMap::new(),
        })
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Resolves a recipe name, for callers addressing recipes textually.
    pub fn resolve(&self, name: &str) -> Result<RecipeId, BrewError> {
        self.graph
            .by_name(name)
            .ok_or_else(|| BrewError::UnknownRecipe {
                name: name.to_owned(),
            })
    }

    /// Replaces the stored value of an argument recipe. Downstream records
    /// are invalidated through the changed output checksum.
    pub fn set_arg(&mut self, id: RecipeId, value: Value) -> Result<(), BrewError> {
        self.graph.set_arg(id, value)?;
        Ok(())
    }

    fn context(&self) -> StatusContext<'_> {
        StatusContext {
            graph: &self.graph,
            store: &self.store,
            session_records: &self.records,
            session_outputs: &self.outputs,
        }
    }

    /// Classifies every recipe in `target`'s closure, in dependency order.
    pub fn status(&self, target: RecipeId) -> Result<IndexMap<String, Status>, BrewError> {
        let statuses = dirty::evaluate_statuses(&self.context(), target)?;
        let mut named = IndexMap::with_capacity(statuses.len());
        for (id, status) in statuses {
            named.insert(self.graph.recipe(id)?.name().to_owned(), status);
        }
        Ok(named)
    }

    /// Classifies every recipe in the graph, in topological order.
    pub fn status_report(&self) -> Result<IndexMap<String, Status>, BrewError> {
        let ctx = self.context();
        let mut statuses: IndexMap<RecipeId, Status> = IndexMap::new();
        for id in self.graph.topo_order()? {
            let status = dirty::node_status(&ctx, id, |ingredient| {
                statuses.get(&ingredient).copied().unwrap_or(Status::Ok)
            })?;
            statuses.insert(id, status);
        }
        let mut named = IndexMap::with_capacity(statuses.len());
        for (id, status) in statuses {
            named.insert(self.graph.recipe(id)?.name().to_owned(), status);
        }
        Ok(named)
    }

    /// Evaluates `target` with a worker pool of size `jobs`, reusing cached
    /// outputs wherever possible, and returns its output tuple.
    pub fn brew(&mut self, target: RecipeId, jobs: usize) -> Result<Vec<Value>, BrewError> {
        self.brew_with_cancel(target, jobs, &CancelToken::new())
    }

    /// As [`Session::brew`], with cooperative cancellation.
    pub fn brew_with_cancel(
        &mut self,
        target: RecipeId,
        jobs: usize,
        cancel: &CancelToken,
    ) -> Result<Vec<Value>, BrewError> {
        executor::run_brew(
            &self.graph,
            &self.store,
            &mut self.records,
            &mut self.outputs,
            target,
            jobs,
            cancel,
        )
    }

    /// The recipe's current outputs: this session's if it ran, otherwise
    /// loaded from the cache. `None` when nothing is materialized.
    pub fn cached_outputs(&self, id: RecipeId) -> Option<Vec<Value>> {
        if let Some(values) = self.outputs.get(&id) {
            return Some(values.clone());
        }
        let recipe = self.graph.recipe(id).ok()?;
        let handles = self.store.load_output_handles(recipe.name())?;
        handles.iter().map(|h| h.load().ok()).collect()
    }
}
