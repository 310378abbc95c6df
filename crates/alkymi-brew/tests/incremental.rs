//! End-to-end incremental evaluation: cache hits across sessions, dirtiness
//! propagation, external file tracking, and failure surfacing.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use smallvec::smallvec;

use alkymi_brew::{BrewError, CancelToken, Session};
use alkymi_core::recipe::Ingredients;
use alkymi_core::{bound_fn, Config, Graph, Recipe, RecipeId, Status, Value};

type Counter = Arc<AtomicUsize>;

fn config_at(dir: &Path) -> Config {
    Config {
        cache_path: dir.join("cache"),
        ..Config::default()
    }
}

/// answer -> double pipeline; the counters observe bound-function calls.
fn answer_graph(dir: &Path, calls: &Counter) -> (Graph, RecipeId) {
    let mut graph = Graph::with_config(config_at(dir));
    let calls = calls.clone();
    let answer = graph
        .add(
            Recipe::builder("answer")
                .bound(bound_fn!(move |_inputs: &mut Ingredients| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(smallvec![Value::from(42i64)])
                }))
                .build()
                .unwrap(),
        )
        .unwrap();
    (graph, answer)
}

/// Same shape as [`answer_graph`] but with a different function body.
fn answer_graph_v2(dir: &Path, calls: &Counter) -> (Graph, RecipeId) {
    let mut graph = Graph::with_config(config_at(dir));
    let calls = calls.clone();
    let answer = graph
        .add(
            Recipe::builder("answer")
                .bound(bound_fn!(move |_inputs: &mut Ingredients| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(smallvec![Value::from(7i64)])
                }))
                .build()
                .unwrap(),
        )
        .unwrap();
    (graph, answer)
}

fn add_double(graph: &mut Graph, answer: RecipeId, calls: &Counter) -> RecipeId {
    let calls = calls.clone();
    graph
        .add(
            Recipe::builder("double")
                .ingredient(answer)
                .bound(bound_fn!(move |inputs: &mut Ingredients| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let n = inputs.one(0)?.as_int().ok_or("expected an int")?;
                    Ok(smallvec![Value::from(n * 2)])
                }))
                .build()
                .unwrap(),
        )
        .unwrap()
}

#[test]
fn trivial_cache_hit() {
    let tmp = tempfile::tempdir().unwrap();
    let calls = Counter::default();

    // First brew evaluates once.
    let (graph, answer) = answer_graph(tmp.path(), &calls);
    let mut session = Session::new(graph).unwrap();
    assert_eq!(session.brew(answer, 1).unwrap(), vec![Value::from(42i64)]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(session.status(answer).unwrap()["answer"], Status::Ok);

    // Second brew in the same session: zero invocations.
    assert_eq!(session.brew(answer, 1).unwrap(), vec![Value::from(42i64)]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // A fresh session over the same cache: still zero invocations.
    let (graph, answer) = answer_graph(tmp.path(), &calls);
    let mut session = Session::new(graph).unwrap();
    assert_eq!(session.status(answer).unwrap()["answer"], Status::Ok);
    assert_eq!(session.brew(answer, 1).unwrap(), vec![Value::from(42i64)]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn ingredient_change_reruns_consumer() {
    let tmp = tempfile::tempdir().unwrap();
    let calls = Counter::default();

    let (mut graph, answer) = answer_graph(tmp.path(), &calls);
    let double = add_double(&mut graph, answer, &calls);
    let mut session = Session::new(graph).unwrap();
    assert_eq!(session.brew(double, 1).unwrap(), vec![Value::from(84i64)]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // "Edit" the answer body; both recipes re-run and the result follows.
    let (mut graph, answer) = answer_graph_v2(tmp.path(), &calls);
    let double = add_double(&mut graph, answer, &calls);
    let mut session = Session::new(graph).unwrap();
    let statuses = session.status(double).unwrap();
    assert_eq!(statuses["answer"], Status::BoundFunctionChanged);
    assert_eq!(statuses["double"], Status::InputsChanged);

    assert_eq!(session.brew(double, 1).unwrap(), vec![Value::from(14i64)]);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[test]
fn runtime_global_change_does_not_invalidate() {
    // A module-level value read by the body contributes only its name to
    // the fingerprint, so changing it between runs re-evaluates nothing.
    static GLOBAL: AtomicI64 = AtomicI64::new(42);

    let tmp = tempfile::tempdir().unwrap();
    let calls = Counter::default();

    let build = |calls: &Counter| {
        let mut graph = Graph::with_config(config_at(tmp.path()));
        let calls = calls.clone();
        let id = graph
            .add(
                Recipe::builder("reads_global")
                    .bound(bound_fn!(move |_inputs: &mut Ingredients| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(smallvec![Value::from(GLOBAL.load(Ordering::SeqCst))])
                    }))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        (graph, id)
    };

    let (graph, id) = build(&calls);
    let mut session = Session::new(graph).unwrap();
    assert_eq!(session.brew(id, 1).unwrap(), vec![Value::from(42i64)]);

    GLOBAL.store(7, Ordering::SeqCst);

    let (graph, id) = build(&calls);
    let session = Session::new(graph).unwrap();
    assert_eq!(session.status(id).unwrap()["reads_global"], Status::Ok);
    assert_eq!(
        session.cached_outputs(id),
        Some(vec![Value::from(42i64)]),
        "the stale-but-clean cached output is served"
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn external_file_mutation_invalidates_outputs() {
    let tmp = tempfile::tempdir().unwrap();
    let data = tmp.path().join("data.bin");
    std::fs::write(&data, b"v1").unwrap();

    let calls = Counter::default();
    let build = |calls: &Counter| {
        let mut graph = Graph::with_config(config_at(tmp.path()));
        let calls = calls.clone();
        let data = data.clone();
        let id = graph
            .add(
                Recipe::builder("exports_file")
                    .bound(bound_fn!(move |_inputs: &mut Ingredients| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(smallvec![Value::Path(data.clone())])
                    }))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        (graph, id)
    };

    let (graph, id) = build(&calls);
    let mut session = Session::new(graph).unwrap();
    session.brew(id, 1).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Mutate the file behind the engine's back.
    std::fs::write(&data, b"v2").unwrap();

    let (graph, id) = build(&calls);
    let mut session = Session::new(graph).unwrap();
    assert_eq!(
        session.status(id).unwrap()["exports_file"],
        Status::OutputsInvalid
    );
    session.brew(id, 1).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn argument_change_invalidates_downstream() {
    let tmp = tempfile::tempdir().unwrap();
    let calls = Counter::default();

    let mut graph = Graph::with_config(config_at(tmp.path()));
    let base = graph.arg("base", Value::from(1i64)).unwrap();
    let double = add_double(&mut graph, base, &calls);

    let mut session = Session::new(graph).unwrap();
    assert_eq!(session.brew(double, 1).unwrap(), vec![Value::from(2i64)]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    session.set_arg(base, Value::from(21i64)).unwrap();
    let statuses = session.status(double).unwrap();
    assert_eq!(statuses["base"], Status::InputsChanged);
    assert_eq!(statuses["double"], Status::InputsChanged);

    assert_eq!(session.brew(double, 1).unwrap(), vec![Value::from(42i64)]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn transient_reruns_but_downstream_stays_clean() {
    let tmp = tempfile::tempdir().unwrap();
    let source_calls = Counter::default();
    let consumer_calls = Counter::default();

    let build = |source_calls: &Counter, consumer_calls: &Counter| {
        let mut graph = Graph::with_config(config_at(tmp.path()));
        let sc = source_calls.clone();
        let source = graph
            .add(
                Recipe::builder("source")
                    .transient()
                    .bound(bound_fn!(move |_inputs: &mut Ingredients| {
                        sc.fetch_add(1, Ordering::SeqCst);
                        Ok(smallvec![Value::from("stable")])
                    }))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let cc = consumer_calls.clone();
        let consumer = graph
            .add(
                Recipe::builder("consumer")
                    .ingredient(source)
                    .bound(bound_fn!(move |inputs: &mut Ingredients| {
                        cc.fetch_add(1, Ordering::SeqCst);
                        let text = inputs.one(0)?.as_str().ok_or("expected a string")?;
                        Ok(smallvec![Value::from(text.to_uppercase())])
                    }))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        (graph, source, consumer)
    };

    let (graph, _, consumer) = build(&source_calls, &consumer_calls);
    let mut session = Session::new(graph).unwrap();
    assert_eq!(
        session.brew(consumer, 1).unwrap(),
        vec![Value::from("STABLE")]
    );
    assert_eq!(source_calls.load(Ordering::SeqCst), 1);
    assert_eq!(consumer_calls.load(Ordering::SeqCst), 1);

    // New session: the transient source must run again, but its outputs are
    // unchanged, so the consumer is served from cache.
    let (graph, source, consumer) = build(&source_calls, &consumer_calls);
    let mut session = Session::new(graph).unwrap();
    let statuses = session.status(consumer).unwrap();
    assert_eq!(statuses["source"], Status::NotEvaluatedYet);
    assert_eq!(statuses["consumer"], Status::InputsChanged);

    assert_eq!(
        session.brew(consumer, 1).unwrap(),
        vec![Value::from("STABLE")]
    );
    assert_eq!(source_calls.load(Ordering::SeqCst), 2);
    assert_eq!(consumer_calls.load(Ordering::SeqCst), 1);
    assert_eq!(session.status(source).unwrap()["source"], Status::Ok);
}

#[test]
fn cleanliness_predicate_marks_dirty() {
    let tmp = tempfile::tempdir().unwrap();
    let calls = Counter::default();
    let clean = Arc::new(AtomicBool::new(true));

    let mut graph = Graph::with_config(config_at(tmp.path()));
    let calls_in = calls.clone();
    let clean_in = clean.clone();
    let id = graph
        .add(
            Recipe::builder("checked")
                .cleanliness(move |_outputs| Ok(clean_in.load(Ordering::SeqCst)))
                .bound(bound_fn!(move |_inputs: &mut Ingredients| {
                    calls_in.fetch_add(1, Ordering::SeqCst);
                    Ok(smallvec![Value::from(1i64)])
                }))
                .build()
                .unwrap(),
        )
        .unwrap();

    let mut session = Session::new(graph).unwrap();
    session.brew(id, 1).unwrap();
    assert_eq!(session.status(id).unwrap()["checked"], Status::Ok);

    clean.store(false, Ordering::SeqCst);
    assert_eq!(session.status(id).unwrap()["checked"], Status::CustomDirty);
    session.brew(id, 1).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn chain_is_clean_after_brew() {
    let tmp = tempfile::tempdir().unwrap();
    let calls = Counter::default();

    let (mut graph, answer) = answer_graph(tmp.path(), &calls);
    let double = add_double(&mut graph, answer, &calls);
    let calls_q = calls.clone();
    let quad = graph
        .add(
            Recipe::builder("quad")
                .ingredient(double)
                .bound(bound_fn!(move |inputs: &mut Ingredients| {
                    calls_q.fetch_add(1, Ordering::SeqCst);
                    let n = inputs.one(0)?.as_int().ok_or("expected an int")?;
                    Ok(smallvec![Value::from(n * 2)])
                }))
                .build()
                .unwrap(),
        )
        .unwrap();

    let mut session = Session::new(graph).unwrap();
    assert_eq!(session.brew(quad, 2).unwrap(), vec![Value::from(168i64)]);
    for (_, status) in session.status(quad).unwrap() {
        assert_eq!(status, Status::Ok);
    }
}

#[test]
fn disabled_cache_keeps_everything_in_memory() {
    let tmp = tempfile::tempdir().unwrap();
    let calls = Counter::default();

    let build = |calls: &Counter| {
        let config = Config {
            cache: false,
            cache_path: tmp.path().join("cache"),
            ..Config::default()
        };
        let mut graph = Graph::with_config(config);
        let calls = calls.clone();
        let id = graph
            .add(
                Recipe::builder("answer")
                    .bound(bound_fn!(move |_inputs: &mut Ingredients| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(smallvec![Value::from(42i64)])
                    }))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        (graph, id)
    };

    let (graph, id) = build(&calls);
    let mut session = Session::new(graph).unwrap();
    session.brew(id, 1).unwrap();
    // In-session reuse still works without the disk store.
    session.brew(id, 1).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!tmp.path().join("cache").exists());

    // Nothing persisted: a new session starts from scratch.
    let (graph, id) = build(&calls);
    let session = Session::new(graph).unwrap();
    assert_eq!(
        session.status(id).unwrap()["answer"],
        Status::NotEvaluatedYet
    );
}

#[test]
fn user_error_surfaces_with_recipe_name() {
    let tmp = tempfile::tempdir().unwrap();
    let mut graph = Graph::with_config(config_at(tmp.path()));
    let id = graph
        .add(
            Recipe::builder("broken")
                .bound(bound_fn!(|_inputs: &mut Ingredients| {
                    Err("the cauldron boiled over".into())
                }))
                .build()
                .unwrap(),
        )
        .unwrap();

    let mut session = Session::new(graph).unwrap();
    let err = session.brew(id, 1).unwrap_err();
    match err {
        BrewError::UserCode { recipe, source } => {
            assert_eq!(recipe, "broken");
            assert_eq!(source.to_string(), "the cauldron boiled over");
        }
        other => panic!("expected UserCode, got {:?}", other),
    }
    // A failed brew records nothing.
    assert_eq!(
        session.status(id).unwrap()["broken"],
        Status::NotEvaluatedYet
    );
}

#[test]
fn panicking_bound_function_is_an_error_not_a_crash() {
    let tmp = tempfile::tempdir().unwrap();
    let mut graph = Graph::with_config(config_at(tmp.path()));
    let id = graph
        .add(
            Recipe::builder("panicky")
                .bound(bound_fn!(|_inputs: &mut Ingredients| {
                    panic!("unexpected ingredient");
                }))
                .build()
                .unwrap(),
        )
        .unwrap();

    let mut session = Session::new(graph).unwrap();
    let err = session.brew(id, 1).unwrap_err();
    assert!(err.to_string().contains("unexpected ingredient"));
}

#[test]
fn pre_cancelled_brew_invokes_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let calls = Counter::default();
    let (graph, id) = answer_graph(tmp.path(), &calls);
    let mut session = Session::new(graph).unwrap();

    let token = CancelToken::new();
    token.cancel();
    let err = session.brew_with_cancel(id, 1, &token).unwrap_err();
    assert!(matches!(err, BrewError::Cancelled));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn status_report_covers_the_whole_graph() {
    let tmp = tempfile::tempdir().unwrap();
    let calls = Counter::default();
    let (mut graph, answer) = answer_graph(tmp.path(), &calls);
    let _double = add_double(&mut graph, answer, &calls);

    let mut session = Session::new(graph).unwrap();
    let report = session.status_report().unwrap();
    assert_eq!(report.len(), 2);
    assert!(report.values().all(|s| *s == Status::NotEvaluatedYet));

    session.brew(answer, 1).unwrap();
    let report = session.status_report().unwrap();
    assert_eq!(report["answer"], Status::Ok);
    assert_eq!(report["double"], Status::NotEvaluatedYet);
}
