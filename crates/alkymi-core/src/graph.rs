//! The recipe DAG.
//!
//! [`Graph`] owns every recipe node for the program's lifetime. Ingredient
//! references are petgraph edges (ingredient -> consumer), which gives
//! dependents lookup and topological ordering; the declared ingredient order
//! on each recipe stays the source of truth for argument positions.
//!
//! Cycles cannot form: a recipe can only reference ingredients that already
//! exist in the graph.

use std::collections::{HashMap, HashSet};

use petgraph::graph::DiGraph;
use petgraph::Direction;

use crate::config::Config;
use crate::error::CoreError;
use crate::id::RecipeId;
use crate::recipe::Recipe;
use crate::value::Value;

/// The recipe DAG plus the engine configuration it was built under.
pub struct Graph {
    graph: DiGraph<Recipe, ()>,
    names: HashMap<String, RecipeId>,
    config: Config,
}

impl Graph {
    /// Creates an empty graph with the default configuration.
    pub fn new() -> Self {
        Graph::with_config(Config::default())
    }

    /// Creates an empty graph with an explicit configuration.
    pub fn with_config(config: Config) -> Self {
        Graph {
            graph: DiGraph::new(),
            names: HashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Adds a recipe, validating its name and ingredient references.
    pub fn add(&mut self, recipe: Recipe) -> Result<RecipeId, CoreError> {
        if self.names.contains_key(recipe.name()) {
            return Err(CoreError::DuplicateRecipeName {
                name: recipe.name().to_owned(),
            });
        }
        for &ingredient in recipe.ingredients() {
            if self.graph.node_weight(ingredient.into()).is_none() {
                return Err(CoreError::UnknownIngredient {
                    recipe: recipe.name().to_owned(),
                    id: ingredient,
                });
            }
        }

        let name = recipe.name().to_owned();
        let ingredients = recipe.ingredients().to_vec();
        let id: RecipeId = self.graph.add_node(recipe).into();
        for ingredient in ingredients {
            self.graph.add_edge(ingredient.into(), id.into(), ());
        }
        self.names.insert(name, id);
        Ok(id)
    }

    /// Adds an argument-holder recipe with an initial value.
    pub fn arg(&mut self, name: impl Into<String>, initial: Value) -> Result<RecipeId, CoreError> {
        self.add(Recipe::arg(name, initial))
    }

    /// Replaces the stored value of an argument recipe.
    pub fn set_arg(&mut self, id: RecipeId, value: Value) -> Result<(), CoreError> {
        let recipe = self
            .graph
            .node_weight_mut(id.into())
            .ok_or(CoreError::RecipeNotFound { id })?;
        recipe.set_arg_value(value)
    }

    pub fn recipe(&self, id: RecipeId) -> Result<&Recipe, CoreError> {
        self.graph
            .node_weight(id.into())
            .ok_or(CoreError::RecipeNotFound { id })
    }

    pub fn by_name(&self, name: &str) -> Option<RecipeId> {
        self.names.get(name).copied()
    }

    /// All recipes in insertion order.
    pub fn recipes(&self) -> impl Iterator<Item = (RecipeId, &Recipe)> {
        self.graph
            .node_indices()
            .map(|idx| (idx.into(), &self.graph[idx]))
    }

    /// Direct consumers of a recipe's outputs.
    pub fn dependents(&self, id: RecipeId) -> Vec<RecipeId> {
        self.graph
            .neighbors_directed(id.into(), Direction::Outgoing)
            .map(RecipeId::from)
            .collect()
    }

    /// The transitive ingredient closure of `target`, in post-order
    /// (every ingredient before its consumers, `target` last).
    pub fn closure(&self, target: RecipeId) -> Result<Vec<RecipeId>, CoreError> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        self.visit(target, &mut seen, &mut order)?;
        Ok(order)
    }

    fn visit(
        &self,
        id: RecipeId,
        seen: &mut HashSet<RecipeId>,
        order: &mut Vec<RecipeId>,
    ) -> Result<(), CoreError> {
        if !seen.insert(id) {
            return Ok(());
        }
        let recipe = self.recipe(id)?;
        for &ingredient in recipe.ingredients() {
            self.visit(ingredient, seen, order)?;
        }
        order.push(id);
        Ok(())
    }

    /// A topological order over the whole graph.
    pub fn topo_order(&self) -> Result<Vec<RecipeId>, CoreError> {
        petgraph::algo::toposort(&self.graph, None)
            .map(|order| order.into_iter().map(RecipeId::from).collect())
            .map_err(|cycle| CoreError::GraphInconsistency {
                reason: format!(
                    "dependency cycle involving RecipeId({})",
                    cycle.node_id().index()
                ),
            })
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}

impl Default for Graph {
    fn default() -> Self {
        Graph::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bound_fn;
    use crate::recipe::Ingredients;
    use smallvec::smallvec;

    fn constant(n: i64) -> Recipe {
        Recipe::builder(format!("const_{}", n))
            .bound(bound_fn!(move |_i: &mut Ingredients| Ok(smallvec![
                Value::from(0i64)
            ])))
            .build()
            .unwrap()
    }

    #[test]
    fn add_and_lookup() {
        let mut graph = Graph::new();
        let id = graph.add(constant(1)).unwrap();
        assert_eq!(graph.by_name("const_1"), Some(id));
        assert_eq!(graph.recipe(id).unwrap().name(), "const_1");
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut graph = Graph::new();
        graph.add(constant(1)).unwrap();
        let err = graph.add(constant(1)).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateRecipeName { .. }));
    }

    #[test]
    fn unknown_ingredient_rejected() {
        let mut graph = Graph::new();
        let recipe = Recipe::builder("consumer")
            .ingredient(RecipeId(99))
            .bound(bound_fn!(|_i: &mut Ingredients| Ok(smallvec![Value::Null])))
            .build()
            .unwrap();
        let err = graph.add(recipe).unwrap_err();
        assert!(matches!(err, CoreError::UnknownIngredient { .. }));
    }

    #[test]
    fn closure_is_post_order() {
        let mut graph = Graph::new();
        let a = graph.add(constant(1)).unwrap();
        let b = graph.add(constant(2)).unwrap();
        let c = graph
            .add(
                Recipe::builder("sum")
                    .ingredient(a)
                    .ingredient(b)
                    .bound(bound_fn!(|_i: &mut Ingredients| Ok(smallvec![Value::Null])))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let order = graph.closure(c).unwrap();
        assert_eq!(order, vec![a, b, c]);
    }

    #[test]
    fn closure_visits_shared_ingredient_once() {
        let mut graph = Graph::new();
        let base = graph.add(constant(1)).unwrap();
        let left = graph
            .add(
                Recipe::builder("left")
                    .ingredient(base)
                    .bound(bound_fn!(|_i: &mut Ingredients| Ok(smallvec![Value::Null])))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let right = graph
            .add(
                Recipe::builder("right")
                    .ingredient(base)
                    .bound(bound_fn!(|_i: &mut Ingredients| Ok(smallvec![Value::Null])))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let top = graph
            .add(
                Recipe::builder("top")
                    .ingredient(left)
                    .ingredient(right)
                    .bound(bound_fn!(|_i: &mut Ingredients| Ok(smallvec![Value::Null])))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let order = graph.closure(top).unwrap();
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], base);
        assert_eq!(*order.last().unwrap(), top);
    }

    #[test]
    fn dependents_reflect_edges() {
        let mut graph = Graph::new();
        let base = graph.add(constant(1)).unwrap();
        let consumer = graph
            .add(
                Recipe::builder("consumer")
                    .ingredient(base)
                    .bound(bound_fn!(|_i: &mut Ingredients| Ok(smallvec![Value::Null])))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        assert_eq!(graph.dependents(base), vec![consumer]);
        assert!(graph.dependents(consumer).is_empty());
    }

    #[test]
    fn arg_recipes_are_settable() {
        let mut graph = Graph::new();
        let id = graph.arg("threshold", Value::from(1i64)).unwrap();
        graph.set_arg(id, Value::from(2i64)).unwrap();
        assert_eq!(
            graph.recipe(id).unwrap().arg_value(),
            Some(&Value::from(2i64))
        );
    }
}
