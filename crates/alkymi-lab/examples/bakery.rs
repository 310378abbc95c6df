//! A small lab: try `cargo run --example bakery -- status`, then
//! `cargo run --example bakery -- brew loaves --flour-bags 3`.

use std::process;

use smallvec::smallvec;

use alkymi_brew::Session;
use alkymi_core::recipe::Ingredients;
use alkymi_core::{bound_fn, Graph, Recipe, Value};
use alkymi_lab::Lab;

fn main() {
    let mut graph = Graph::new();

    let flour = graph
        .arg("flour-bags", Value::from(1i64))
        .expect("register flour-bags");

    let dough = graph
        .add(
            Recipe::builder("dough")
                .doc("mixes dough, two batches per bag of flour")
                .ingredient(flour)
                .bound(bound_fn!(|inputs: &mut Ingredients| {
                    let bags = inputs.one(0)?.as_int().ok_or("expected a bag count")?;
                    Ok(smallvec![Value::Seq(
                        (0..bags * 2).map(Value::from).collect()
                    )])
                }))
                .build()
                .expect("build dough"),
        )
        .expect("add dough");

    graph
        .add(
            Recipe::builder("loaves")
                .doc("bakes one loaf per batch of dough")
                .ingredient(dough)
                .map_over(dough)
                .bound(bound_fn!(|inputs: &mut Ingredients| {
                    let batch = inputs.one(0)?.as_int().ok_or("expected a batch id")?;
                    Ok(smallvec![Value::from(format!("loaf #{}", batch))])
                }))
                .build()
                .expect("build loaves"),
        )
        .expect("add loaves");

    let session = Session::new(graph).expect("open session");
    process::exit(Lab::new("bakery", session).run());
}
