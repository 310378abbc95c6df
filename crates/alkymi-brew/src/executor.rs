//! The scheduler/executor: a single-threaded cooperative controller that
//! owns all graph state, plus a bounded pool of OS worker threads that run
//! only bound functions.
//!
//! The controller walks the dirty subgraph in dependency order, keeping a
//! ready queue and a set of in-flight tasks. Workers receive input values by
//! move and return output values the same way; every disk write happens on
//! the controller. Foreach recipes expand dynamically once their mapped
//! ingredient's value is known: one subtask per new-or-dirty element plus a
//! gather step, with reusable elements fed from the cache.
//!
//! Failure semantics: the first error aborts the brew; in-flight tasks are
//! awaited and their errors logged and discarded. Completed foreach elements
//! are folded and persisted by an abort-time gather so a later brew resumes
//! mid-sequence. With `jobs = 1` evaluation order is a deterministic
//! topological order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use indexmap::IndexMap;

use alkymi_core::checksum::{self, tag, ChecksumOptions};
use alkymi_core::recipe::DynError;
use alkymi_core::{
    checksum_outputs, checksum_value, BoundFn, Checksum, CoreError, ElementRecord, EvalRecord,
    ForeachRecord, Graph, Ingredients, Outputs, Recipe, RecipeId, Status, Value,
};
use alkymi_store::{CacheStore, HandleSource};

use crate::dirty::{self, StatusContext};
use crate::error::BrewError;

/// Cooperative cancellation flag, shared between the brew entry point and
/// the controller. A running bound function is never interrupted
/// mid-execution; it runs to completion before cancellation is observed.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskKey {
    Node(RecipeId),
    Element { node: RecipeId, index: usize },
}

/// A unit of bound-function work dispatched to the pool.
struct Job {
    key: TaskKey,
    bound: BoundFn,
    inputs: Ingredients,
}

struct JobDone {
    key: TaskKey,
    result: Result<Outputs, DynError>,
}

/// One element of an expanded foreach node.
struct ElementSlot {
    /// Mapping key (None when mapped over a sequence).
    key: Option<Value>,
    key_checksum: Option<Checksum>,
    /// Element checksum: the item's for sequences, the entry's (key and
    /// value combined) for mappings.
    input_checksum: Checksum,
    /// The value handed to the bound function.
    input: Value,
    result: Option<Value>,
}

struct ForeachProgress {
    is_map: bool,
    /// Checksum of the full current mapped input.
    aggregate: Checksum,
    elements: Vec<ElementSlot>,
    remaining: usize,
    /// Elements completed by invocation (not reuse) during this brew.
    fresh_done: usize,
}

enum NodeState {
    Waiting,
    Running,
    Expanded(ForeachProgress),
    Done,
}

struct NodeEntry {
    waiting: usize,
    dependents: Vec<RecipeId>,
    state: NodeState,
}

/// Evaluates `target`, invoking bound functions for every dirty node in its
/// closure, and returns the target's output tuple.
pub(crate) fn run_brew(
    graph: &Graph,
    store: &CacheStore,
    session_records: &mut HashMap<RecipeId, EvalRecord>,
    session_outputs: &mut HashMap<RecipeId, Vec<Value>>,
    target: RecipeId,
    jobs: usize,
    cancel: &CancelToken,
) -> Result<Vec<Value>, BrewError> {
    let jobs = jobs.max(1);

    let statuses = {
        let ctx = StatusContext {
            graph,
            store,
            session_records: &*session_records,
            session_outputs: &*session_outputs,
        };
        dirty::evaluate_statuses(&ctx, target)?
    };
    let dirty_ids: Vec<RecipeId> = statuses
        .iter()
        .filter(|(_, status)| status.is_dirty())
        .map(|(id, _)| *id)
        .collect();

    if dirty_ids.is_empty() {
        return load_outputs(graph, store, session_outputs, target);
    }
    tracing::debug!(dirty = dirty_ids.len(), jobs, "starting brew");

    let dirty_set: HashSet<RecipeId> = dirty_ids.iter().copied().collect();
    let mut entries: HashMap<RecipeId, NodeEntry> = HashMap::with_capacity(dirty_ids.len());
    for &id in &dirty_ids {
        let recipe = graph.recipe(id)?;
        let waiting = recipe
            .ingredients()
            .iter()
            .filter(|i| dirty_set.contains(i))
            .count();
        entries.insert(
            id,
            NodeEntry {
                waiting,
                dependents: Vec::new(),
                state: NodeState::Waiting,
            },
        );
    }
    for &id in &dirty_ids {
        let recipe = graph.recipe(id)?;
        for ingredient in recipe.ingredients() {
            if dirty_set.contains(ingredient) {
                if let Some(entry) = entries.get_mut(ingredient) {
                    entry.dependents.push(id);
                }
            }
        }
    }
    // Seed the ready queue in closure order so jobs = 1 evaluates in a
    // deterministic topological order.
    let ready: VecDeque<RecipeId> = dirty_ids
        .iter()
        .copied()
        .filter(|id| entries[id].waiting == 0)
        .collect();

    let (first_error, cancelled) = {
        let mut exec = Executor {
            graph,
            store,
            session_records: &mut *session_records,
            session_outputs: &mut *session_outputs,
            opts: graph.config().checksum_options(),
            entries,
            ready,
            pending_jobs: VecDeque::new(),
            done: 0,
            total: dirty_ids.len(),
            first_error: None,
        };

        std::thread::scope(|scope| {
            let (job_tx, job_rx) = unbounded::<Job>();
            let (res_tx, res_rx) = unbounded::<JobDone>();
            for _ in 0..jobs {
                let rx = job_rx.clone();
                let tx = res_tx.clone();
                scope.spawn(move || worker_loop(rx, tx));
            }
            drop(job_rx);
            drop(res_tx);

            exec.controller_loop(&job_tx, &res_rx, jobs, cancel);

            // Closing the job channel lets idle workers exit before the
            // scope joins them.
            drop(job_tx);
        });

        (exec.first_error.take(), cancel.is_cancelled())
    };

    if let Some(error) = first_error {
        return Err(error);
    }
    if cancelled {
        return Err(BrewError::Cancelled);
    }
    load_outputs(graph, store, session_outputs, target)
}

/// Returns a recipe's output tuple from session memory or the cache.
fn load_outputs(
    graph: &Graph,
    store: &CacheStore,
    session_outputs: &HashMap<RecipeId, Vec<Value>>,
    target: RecipeId,
) -> Result<Vec<Value>, BrewError> {
    if let Some(values) = session_outputs.get(&target) {
        return Ok(values.clone());
    }
    let recipe = graph.recipe(target)?;
    let handles = store.load_output_handles(recipe.name()).ok_or_else(|| {
        BrewError::Core(CoreError::GraphInconsistency {
            reason: format!("no outputs available for recipe '{}'", recipe.name()),
        })
    })?;
    let values = handles
        .iter()
        .map(|h| h.load())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(values)
}

fn worker_loop(rx: Receiver<Job>, tx: Sender<JobDone>) {
    while let Ok(mut job) = rx.recv() {
        let result =
            std::panic::catch_unwind(AssertUnwindSafe(|| job.bound.call(&mut job.inputs)))
                .unwrap_or_else(|panic| Err(panic_to_error(panic)));
        if tx.send(JobDone {
            key: job.key,
            result,
        })
        .is_err()
        {
            break;
        }
    }
}

fn panic_to_error(panic: Box<dyn std::any::Any + Send>) -> DynError {
    let message = if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "bound function panicked".to_owned()
    };
    format!("panic: {}", message).into()
}

struct Executor<'a> {
    graph: &'a Graph,
    store: &'a CacheStore,
    session_records: &'a mut HashMap<RecipeId, EvalRecord>,
    session_outputs: &'a mut HashMap<RecipeId, Vec<Value>>,
    opts: ChecksumOptions,
    entries: HashMap<RecipeId, NodeEntry>,
    ready: VecDeque<RecipeId>,
    pending_jobs: VecDeque<Job>,
    done: usize,
    total: usize,
    first_error: Option<BrewError>,
}

impl<'a> Executor<'a> {
    fn controller_loop(
        &mut self,
        job_tx: &Sender<Job>,
        res_rx: &Receiver<JobDone>,
        jobs: usize,
        cancel: &CancelToken,
    ) {
        let mut inflight = 0usize;
        loop {
            if self.first_error.is_none() && !cancel.is_cancelled() {
                // Turn ready nodes into jobs or instant completions.
                while let Some(id) = self.ready.pop_front() {
                    if let Err(e) = self.activate(id) {
                        self.record_error(e);
                        break;
                    }
                }
            }
            if self.first_error.is_none() && !cancel.is_cancelled() {
                // Dispatch up to the concurrency budget.
                while inflight < jobs {
                    let Some(job) = self.pending_jobs.pop_front() else {
                        break;
                    };
                    tracing::debug!(key = ?job.key, "dispatching");
                    if job_tx.send(job).is_err() {
                        self.record_error(BrewError::WorkerLost);
                        break;
                    }
                    inflight += 1;
                }
            }

            let aborting = self.first_error.is_some() || cancel.is_cancelled();
            if inflight == 0 {
                if aborting || self.done == self.total {
                    break;
                }
                if self.ready.is_empty() && self.pending_jobs.is_empty() {
                    self.record_error(BrewError::Core(CoreError::GraphInconsistency {
                        reason: "scheduler stalled with unfinished recipes".into(),
                    }));
                    break;
                }
                continue;
            }

            // Await one completion; in abort mode this drains in-flight
            // work so workers are never abandoned mid-task.
            match res_rx.recv() {
                Ok(done) => {
                    inflight -= 1;
                    self.handle_result(done);
                }
                Err(_) => {
                    self.record_error(BrewError::WorkerLost);
                    break;
                }
            }
        }

        if self.first_error.is_some() || cancel.is_cancelled() {
            self.persist_partial_foreach();
        }
    }

    fn record_error(&mut self, error: BrewError) {
        if self.first_error.is_none() {
            self.first_error = Some(error);
        } else {
            tracing::warn!(error = %error, "secondary brew error discarded");
        }
    }

    fn name_of(&self, id: RecipeId) -> String {
        self.graph
            .recipe(id)
            .map(|r| r.name().to_owned())
            .unwrap_or_else(|_| format!("RecipeId({})", id))
    }

    /// Whether a recipe's results are ever written to disk.
    fn persists(&self, recipe: &Recipe) -> bool {
        self.store.is_enabled() && recipe.cache_enabled() && !recipe.is_transient()
    }

    /// This session's record for a recipe, falling back to the disk store.
    fn record_lookup(&self, id: RecipeId, recipe: &Recipe) -> Option<EvalRecord> {
        if let Some(record) = self.session_records.get(&id) {
            return Some(record.clone());
        }
        if self.persists(recipe) {
            self.store.load_record(recipe.name())
        } else {
            None
        }
    }

    /// Pops a ready node into work: an inline completion for argument
    /// recipes and reusable nodes, a job for plain recipes, an expansion
    /// for foreach recipes.
    fn activate(&mut self, id: RecipeId) -> Result<(), BrewError> {
        let graph = self.graph;
        let recipe = graph.recipe(id)?;

        if let Some(value) = recipe.arg_value() {
            let value = value.clone();
            return self.complete_node(id, vec![value], None);
        }

        // A node marked dirty only because an ingredient was dirty may be
        // reusable now that the ingredient's fresh outputs are recorded.
        let status = {
            let ctx = StatusContext {
                graph: self.graph,
                store: self.store,
                session_records: &*self.session_records,
                session_outputs: &*self.session_outputs,
            };
            dirty::node_status(&ctx, id, |_| Status::Ok)?
        };
        if !status.is_dirty() {
            return self.reuse_node(id);
        }

        match recipe.mapped_index() {
            None => {
                let bound = require_bound(recipe)?;
                let inputs = self.build_ingredients(recipe, None)?;
                self.pending_jobs.push_back(Job {
                    key: TaskKey::Node(id),
                    bound: bound.clone(),
                    inputs,
                });
                if let Some(entry) = self.entries.get_mut(&id) {
                    entry.state = NodeState::Running;
                }
                Ok(())
            }
            Some(mapped) => self.expand_foreach(id, mapped),
        }
    }

    /// Adopts the existing cache record without invoking the bound function.
    fn reuse_node(&mut self, id: RecipeId) -> Result<(), BrewError> {
        let graph = self.graph;
        let recipe = graph.recipe(id)?;
        let record = self.record_lookup(id, recipe).ok_or_else(|| {
            BrewError::Core(CoreError::GraphInconsistency {
                reason: format!("clean recipe '{}' has no record", recipe.name()),
            })
        })?;
        tracing::debug!(recipe = recipe.name(), "reusing cached outputs");
        self.session_records.insert(id, record);
        self.finish(id);
        Ok(())
    }

    /// Builds the input slots for a bound-function invocation. Fresh outputs
    /// are passed by value; cached ingredients are passed as lazy handles so
    /// only consumed inputs are deserialized. For foreach elements,
    /// `replace` substitutes the mapped slot with a single element.
    fn build_ingredients(
        &self,
        recipe: &Recipe,
        replace: Option<(usize, &Value)>,
    ) -> Result<Ingredients, BrewError> {
        let mut inputs = Ingredients::new();
        for (pos, &ingredient) in recipe.ingredients().iter().enumerate() {
            if let Some((mapped, element)) = replace {
                if pos == mapped {
                    inputs.push_values(vec![element.clone()]);
                    continue;
                }
            }
            if let Some(values) = self.session_outputs.get(&ingredient) {
                inputs.push_values(values.clone());
                continue;
            }
            let ing_recipe = self.graph.recipe(ingredient)?;
            let handles = self
                .store
                .load_output_handles(ing_recipe.name())
                .ok_or_else(|| {
                    BrewError::Core(CoreError::GraphInconsistency {
                        reason: format!(
                            "missing cached outputs for ingredient '{}'",
                            ing_recipe.name()
                        ),
                    })
                })?;
            inputs.push_lazy(Box::new(HandleSource::new(handles)));
        }
        Ok(inputs)
    }

    /// Materializes an ingredient's output tuple (for the foreach
    /// controller, which needs the mapped collection itself).
    fn ingredient_values(&self, id: RecipeId) -> Result<Vec<Value>, BrewError> {
        if let Some(values) = self.session_outputs.get(&id) {
            return Ok(values.clone());
        }
        let recipe = self.graph.recipe(id)?;
        let handles = self.store.load_output_handles(recipe.name()).ok_or_else(|| {
            BrewError::Core(CoreError::GraphInconsistency {
                reason: format!("missing cached outputs for ingredient '{}'", recipe.name()),
            })
        })?;
        let values = handles
            .iter()
            .map(|h| h.load())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(values)
    }

    /// Splits a foreach node into per-element subtasks, reusing every
    /// element whose input checksum matches the prior record.
    fn expand_foreach(&mut self, id: RecipeId, mapped: usize) -> Result<(), BrewError> {
        let graph = self.graph;
        let recipe = graph.recipe(id)?;
        let name = recipe.name().to_owned();
        let mapped_id = recipe.ingredients()[mapped];

        let mut mapped_values = self.ingredient_values(mapped_id)?;
        if mapped_values.len() != 1 {
            return Err(BrewError::MappedArity {
                recipe: name,
                got: mapped_values.len(),
            });
        }
        let mapped_value = match mapped_values.pop() {
            Some(value) => value,
            None => {
                return Err(BrewError::MappedArity {
                    recipe: name,
                    got: 0,
                })
            }
        };

        let aggregate = checksum_value(&mapped_value, &self.opts)?;
        let (is_map, mut slots) = self.split_elements(&name, &mapped_value)?;

        let bound = require_bound(recipe)?;
        let function_checksum = bound.checksum();

        // Reuse recorded elements, but only under the same bound function
        // and only when the cached gathered output is still readable.
        if let Some(prior) = self.record_lookup(id, recipe) {
            if prior.function_checksum == function_checksum {
                if let Some(foreach) = &prior.foreach {
                    if let Some(cached) = self.load_cached_gather(id, recipe) {
                        for slot in &mut slots {
                            if let Some((index, _)) = foreach.output_for(slot.input_checksum) {
                                if let Some(value) = cached.get(index) {
                                    slot.result = Some(value.clone());
                                }
                            }
                        }
                    }
                }
            }
        }

        let remaining = slots.iter().filter(|s| s.result.is_none()).count();
        let reused = slots.len() - remaining;
        tracing::debug!(
            recipe = %name,
            elements = slots.len(),
            reused,
            "expanding foreach"
        );

        let progress = ForeachProgress {
            is_map,
            aggregate,
            elements: slots,
            remaining,
            fresh_done: 0,
        };

        if progress.remaining == 0 {
            // Reorders and removals reach here: the gather rewrites the
            // record without any invocation.
            return self.gather_foreach(id, progress, true);
        }

        // Issue element subtasks in input order.
        for (index, slot) in progress.elements.iter().enumerate() {
            if slot.result.is_some() {
                continue;
            }
            let inputs = self.build_ingredients(recipe, Some((mapped, &slot.input)))?;
            self.pending_jobs.push_back(Job {
                key: TaskKey::Element { node: id, index },
                bound: bound.clone(),
                inputs,
            });
        }
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.state = NodeState::Expanded(progress);
        }
        Ok(())
    }

    /// Builds element slots from a mapped collection. Sequence elements are
    /// the items; mapping elements are the entries, keyed so that renaming
    /// a key re-evaluates the element.
    fn split_elements(
        &self,
        recipe_name: &str,
        mapped_value: &Value,
    ) -> Result<(bool, Vec<ElementSlot>), BrewError> {
        match mapped_value {
            Value::Seq(items) => {
                let mut slots = Vec::with_capacity(items.len());
                for item in items {
                    slots.push(ElementSlot {
                        key: None,
                        key_checksum: None,
                        input_checksum: checksum_value(item, &self.opts)?,
                        input: item.clone(),
                        result: None,
                    });
                }
                Ok((false, slots))
            }
            Value::Map(entries) => {
                let mut slots = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    let key_checksum = checksum_value(key, &self.opts)?;
                    let value_checksum = checksum_value(value, &self.opts)?;
                    slots.push(ElementSlot {
                        key: Some(key.clone()),
                        key_checksum: Some(key_checksum),
                        input_checksum: checksum::map_entry(key_checksum, value_checksum),
                        input: value.clone(),
                        result: None,
                    });
                }
                Ok((true, slots))
            }
            other => Err(BrewError::MappedKind {
                recipe: recipe_name.to_owned(),
                kind: other.kind_name(),
            }),
        }
    }

    /// Loads the previously gathered collection as per-element outputs, in
    /// recorded element order. `None` disables reuse.
    fn load_cached_gather(&self, id: RecipeId, recipe: &Recipe) -> Option<Vec<Value>> {
        let gathered = if let Some(values) = self.session_outputs.get(&id) {
            values.first().cloned()
        } else {
            let handles = self.store.load_output_handles(recipe.name())?;
            let handle = handles.first()?;
            match handle.load() {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::debug!(
                        recipe = recipe.name(),
                        error = %e,
                        "cached foreach outputs unreadable, re-running all elements"
                    );
                    None
                }
            }
        }?;
        match gathered {
            Value::Seq(items) => Some(items),
            Value::Map(entries) => Some(entries.into_iter().map(|(_, v)| v).collect()),
            _ => None,
        }
    }

    /// Records one finished element; gathers when the node is complete.
    fn complete_element(
        &mut self,
        node: RecipeId,
        index: usize,
        outputs: Outputs,
    ) -> Result<(), BrewError> {
        if outputs.len() != 1 {
            return Err(BrewError::ElementArity {
                recipe: self.name_of(node),
                got: outputs.len(),
            });
        }
        let mut outputs = outputs;
        let value = outputs.remove(0);

        let finished = {
            let entry = self.entries.get_mut(&node).ok_or_else(|| {
                BrewError::Core(CoreError::GraphInconsistency {
                    reason: format!("unknown foreach node RecipeId({})", node),
                })
            })?;
            let NodeState::Expanded(progress) = &mut entry.state else {
                return Err(BrewError::Core(CoreError::GraphInconsistency {
                    reason: format!("element completion for unexpanded RecipeId({})", node),
                }));
            };
            let slot = progress.elements.get_mut(index).ok_or_else(|| {
                BrewError::Core(CoreError::GraphInconsistency {
                    reason: format!("element index {} out of range", index),
                })
            })?;
            slot.result = Some(value);
            progress.remaining -= 1;
            progress.fresh_done += 1;
            progress.remaining == 0
        };

        if finished {
            if let Some(entry) = self.entries.get_mut(&node) {
                if let NodeState::Expanded(progress) =
                    std::mem::replace(&mut entry.state, NodeState::Running)
                {
                    return self.gather_foreach(node, progress, true);
                }
            }
        }
        Ok(())
    }

    /// Folds completed elements into the gathered collection and its
    /// record. A complete gather finishes the node; a partial gather (on
    /// abort) only persists, so the next brew resumes mid-sequence.
    fn gather_foreach(
        &mut self,
        id: RecipeId,
        progress: ForeachProgress,
        complete: bool,
    ) -> Result<(), BrewError> {
        let mut element_records = Vec::new();
        let mut completed: Vec<(Option<Checksum>, Checksum)> = Vec::new();
        let mut seq_items = Vec::new();
        let mut map_entries: IndexMap<Value, Value> = IndexMap::new();

        for slot in &progress.elements {
            let Some(result) = &slot.result else { continue };
            let output_checksum = checksum_value(result, &self.opts)?;
            element_records.push(ElementRecord {
                input: slot.input_checksum,
                output: output_checksum,
            });
            completed.push((slot.key_checksum, slot.input_checksum));
            if progress.is_map {
                if let Some(key) = &slot.key {
                    map_entries.insert(key.clone(), result.clone());
                }
            } else {
                seq_items.push(result.clone());
            }
        }

        let gathered = if progress.is_map {
            Value::Map(map_entries)
        } else {
            Value::Seq(seq_items)
        };
        // A partial gather records the aggregate of the completed subset,
        // which can never equal the full input's aggregate, so the node
        // stays dirty until every element is in.
        let mapped_checksum = if complete {
            progress.aggregate
        } else {
            partial_aggregate(progress.is_map, &completed)
        };
        let foreach = ForeachRecord {
            mapped_checksum,
            elements: element_records,
        };

        if complete {
            self.complete_node(id, vec![gathered], Some(foreach))
        } else {
            let graph = self.graph;
            let recipe = graph.recipe(id)?;
            if self.persists(recipe) {
                let outputs = vec![gathered];
                let record = self.make_record(recipe, &outputs, Some(foreach))?;
                self.store
                    .store(recipe.name(), &record, &outputs, &self.opts)?;
                tracing::debug!(
                    recipe = recipe.name(),
                    elements = record
                        .foreach
                        .as_ref()
                        .map(|f| f.elements.len())
                        .unwrap_or(0),
                    "persisted partial foreach progress"
                );
            }
            Ok(())
        }
    }

    /// Builds the evaluation record for a finished (or partially gathered)
    /// recipe from the current session state.
    fn make_record(
        &self,
        recipe: &Recipe,
        outputs: &[Value],
        foreach: Option<ForeachRecord>,
    ) -> Result<EvalRecord, BrewError> {
        let (output_checksums, _) = checksum_outputs(outputs, &self.opts)?;
        let mut ingredient_checksums = Vec::with_capacity(recipe.ingredients().len());
        for &ingredient in recipe.ingredients() {
            let ing_recipe = self.graph.recipe(ingredient)?;
            let record = self.record_lookup(ingredient, ing_recipe).ok_or_else(|| {
                BrewError::Core(CoreError::GraphInconsistency {
                    reason: format!("ingredient '{}' has no record", ing_recipe.name()),
                })
            })?;
            ingredient_checksums.push(checksum::checksum_tuple(&record.output_checksums));
        }
        let function_checksum = match recipe.bound() {
            Some(bound) => bound.checksum(),
            // Argument recipes have no bound function; their fingerprint is
            // the stored value itself.
            None => match recipe.arg_value() {
                Some(value) => checksum_value(value, &self.opts)?,
                None => {
                    return Err(BrewError::Core(CoreError::GraphInconsistency {
                        reason: format!("recipe '{}' has no bound function", recipe.name()),
                    }))
                }
            },
        };
        Ok(EvalRecord {
            ingredient_checksums,
            output_checksums,
            function_checksum,
            foreach,
        })
    }

    /// Checksums, persists and records a finished node, then unblocks its
    /// dependents.
    fn complete_node(
        &mut self,
        id: RecipeId,
        outputs: Vec<Value>,
        foreach: Option<ForeachRecord>,
    ) -> Result<(), BrewError> {
        let graph = self.graph;
        let recipe = graph.recipe(id)?;
        let record = self.make_record(recipe, &outputs, foreach)?;
        if self.persists(recipe) {
            self.store
                .store(recipe.name(), &record, &outputs, &self.opts)?;
        }
        tracing::debug!(recipe = recipe.name(), "recipe evaluated");
        self.session_records.insert(id, record);
        self.session_outputs.insert(id, outputs);
        self.finish(id);
        Ok(())
    }

    /// Marks a node done and moves newly unblocked dependents to the ready
    /// queue.
    fn finish(&mut self, id: RecipeId) {
        let dependents = match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.state = NodeState::Done;
                std::mem::take(&mut entry.dependents)
            }
            None => return,
        };
        self.done += 1;
        for dependent in dependents {
            if let Some(entry) = self.entries.get_mut(&dependent) {
                entry.waiting -= 1;
                if entry.waiting == 0 {
                    self.ready.push_back(dependent);
                }
            }
        }
    }

    fn handle_result(&mut self, done: JobDone) {
        match done.key {
            TaskKey::Node(id) => match done.result {
                Ok(outputs) => {
                    if let Err(e) = self.complete_node(id, outputs.into_vec(), None) {
                        self.record_error(e);
                    }
                }
                Err(source) => self.record_error(BrewError::UserCode {
                    recipe: self.name_of(id),
                    source,
                }),
            },
            TaskKey::Element { node, index } => match done.result {
                Ok(outputs) => {
                    if let Err(e) = self.complete_element(node, index, outputs) {
                        self.record_error(e);
                    }
                }
                Err(source) => self.record_error(BrewError::UserCode {
                    recipe: self.name_of(node),
                    source,
                }),
            },
        }
    }

    /// On abort, folds every expanded foreach node with fresh results into
    /// a partial record so completed elements survive the failed brew.
    fn persist_partial_foreach(&mut self) {
        let expanded: Vec<RecipeId> = self
            .entries
            .iter()
            .filter(|(_, entry)| matches!(entry.state, NodeState::Expanded(_)))
            .map(|(id, _)| *id)
            .collect();
        for id in expanded {
            let progress = match self.entries.get_mut(&id) {
                Some(entry) => {
                    match std::mem::replace(&mut entry.state, NodeState::Waiting) {
                        NodeState::Expanded(progress) => progress,
                        other => {
                            entry.state = other;
                            continue;
                        }
                    }
                }
                None => continue,
            };
            if progress.fresh_done == 0 {
                continue;
            }
            if let Err(e) = self.gather_foreach(id, progress, false) {
                tracing::warn!(
                    recipe = %self.name_of(id),
                    error = %e,
                    "failed to persist partial foreach progress"
                );
            }
        }
    }
}

fn require_bound(recipe: &Recipe) -> Result<&BoundFn, BrewError> {
    recipe.bound().ok_or_else(|| {
        BrewError::Core(CoreError::GraphInconsistency {
            reason: format!("recipe '{}' has no bound function", recipe.name()),
        })
    })
}

/// Aggregate checksum of the completed subset of a mapped input, matching
/// `checksum_value` over the same subset collection.
fn partial_aggregate(is_map: bool, completed: &[(Option<Checksum>, Checksum)]) -> Checksum {
    if is_map {
        let mut entries: Vec<(Checksum, Checksum)> = completed
            .iter()
            .filter_map(|(key, entry)| key.map(|k| (k, *entry)))
            .collect();
        entries.sort();
        checksum::fold(tag::MAP, entries.len(), entries.into_iter().map(|(_, e)| e))
    } else {
        checksum::fold(
            tag::SEQ,
            completed.len(),
            completed.iter().map(|(_, entry)| *entry),
        )
    }
}
