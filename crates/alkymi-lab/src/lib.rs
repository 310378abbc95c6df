//! The lab: a command-line front-end over a recipe [`Session`].
//!
//! A program embeds a [`Lab`] in its `main`, handing it the graph it built;
//! the lab parses the command line and dispatches:
//!
//! - `status` prints the status of every recipe
//! - `brew <recipe> [--jobs N] [--<arg-name> <json>]` evaluates a recipe
//!   and prints its outputs
//!
//! Argument recipes in the graph appear as `brew` flags named from the
//! argument's declared name (hyphens preserved); their values are given as
//! JSON. Exit codes: 0 on success, 1 on any recipe failure, 2 on usage
//! errors.

use clap::{Arg, ArgAction, Command};
use serde_json::Value as Json;

use alkymi_brew::{BrewError, Session};
use alkymi_core::{RecipeId, RecipeKind, Value};

/// Command-line front-end over a [`Session`].
pub struct Lab {
    name: String,
    session: Session,
    /// Argument recipes, surfaced as `brew` flags.
    args: Vec<(String, RecipeId)>,
}

impl Lab {
    /// Wraps a session, discovering its argument recipes.
    pub fn new(name: impl Into<String>, session: Session) -> Self {
        let args = session
            .graph()
            .recipes()
            .filter(|(_, recipe)| matches!(recipe.kind(), RecipeKind::Arg { .. }))
            .map(|(id, recipe)| (recipe.name().to_owned(), id))
            .collect();
        Lab {
            name: name.into(),
            session,
            args,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Parses the process arguments and runs; returns the exit code.
    pub fn run(self) -> i32 {
        let argv: Vec<String> = std::env::args().collect();
        self.run_from(argv)
    }

    /// As [`Lab::run`], over explicit arguments (first element is the
    /// program name).
    pub fn run_from<I>(mut self, argv: I) -> i32
    where
        I: IntoIterator<Item = String>,
    {
        let _ = tracing_subscriber::fmt::try_init();

        let matches = match self.command().try_get_matches_from(argv) {
            Ok(matches) => matches,
            Err(e) => {
                // clap renders its own help/usage text.
                let _ = e.print();
                return match e.kind() {
                    clap::error::ErrorKind::DisplayHelp
                    | clap::error::ErrorKind::DisplayVersion => 0,
                    _ => 2,
                };
            }
        };

        match matches.subcommand() {
            Some(("status", _)) => self.run_status(),
            Some(("brew", sub)) => {
                let recipe = sub
                    .get_one::<String>("recipe")
                    .cloned()
                    .unwrap_or_default();
                let jobs = sub.get_one::<usize>("jobs").copied().unwrap_or(1);
                let mut arg_values = Vec::new();
                for (name, id) in &self.args {
                    if let Some(text) = sub.get_one::<String>(name.as_str()) {
                        arg_values.push((*id, text.clone()));
                    }
                }
                self.run_brew(&recipe, jobs, &arg_values)
            }
            _ => 2,
        }
    }

    fn command(&self) -> Command {
        let mut brew = Command::new("brew")
            .about("Evaluate a recipe and print its outputs")
            .arg(
                Arg::new("recipe")
                    .required(true)
                    .help("Name of the recipe to evaluate"),
            )
            .arg(
                Arg::new("jobs")
                    .short('j')
                    .long("jobs")
                    .value_parser(clap::value_parser!(usize))
                    .default_value("1")
                    .help("Worker pool size"),
            );
        for (name, _) in &self.args {
            brew = brew.arg(
                Arg::new(name.clone())
                    .long(name.clone())
                    .action(ArgAction::Set)
                    .value_name("JSON")
                    .help(format!("Set the '{}' argument", name)),
            );
        }

        Command::new(self.name.clone())
            .about("Incremental recipe lab")
            .subcommand_required(true)
            .arg_required_else_help(true)
            .subcommand(Command::new("status").about("Print the status of every recipe"))
            .subcommand(brew)
    }

    fn run_status(&self) -> i32 {
        let report = match self.session.status_report() {
            Ok(report) => report,
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        };
        let width = report.keys().map(|name| name.len()).max().unwrap_or(0);
        for (name, status) in &report {
            match self
                .session
                .resolve(name)
                .ok()
                .and_then(|id| self.session.graph().recipe(id).ok())
                .and_then(|recipe| recipe.doc())
            {
                Some(doc) => println!("{:width$}  {} ({})", name, status, doc),
                None => println!("{:width$}  {}", name, status),
            }
        }
        0
    }

    fn run_brew(&mut self, recipe: &str, jobs: usize, args: &[(RecipeId, String)]) -> i32 {
        if jobs == 0 {
            eprintln!("Error: --jobs must be at least 1");
            return 2;
        }
        let target = match self.session.resolve(recipe) {
            Ok(target) => target,
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        };
        for (id, text) in args {
            let json: Json = match serde_json::from_str(text) {
                Ok(json) => json,
                Err(e) => {
                    eprintln!("Error: invalid argument value '{}': {}", text, e);
                    return 2;
                }
            };
            if let Err(e) = self.session.set_arg(*id, json_to_value(json)) {
                eprintln!("Error: {}", e);
                return 1;
            }
        }

        match self.session.brew(target, jobs) {
            Ok(outputs) => {
                for output in &outputs {
                    println!("{}", output);
                }
                0
            }
            Err(e) => {
                // Keep engine internals out of the user-facing message: the
                // failing recipe and the original error are what matter.
                match e {
                    BrewError::UserCode { recipe, source } => {
                        eprintln!("Error: recipe '{}' failed: {}", recipe, source)
                    }
                    other => eprintln!("Error: {}", other),
                }
                1
            }
        }
    }
}

/// Converts a JSON argument value into an engine value. Object keys stay
/// strings; arrays become sequences.
fn json_to_value(json: Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Json::String(s) => Value::Str(s),
        Json::Array(items) => Value::Seq(items.into_iter().map(json_to_value).collect()),
        Json::Object(entries) => Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (Value::Str(k), json_to_value(v)))
                .collect(),
        ),
    }
}
