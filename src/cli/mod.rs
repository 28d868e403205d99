//! MK-024: CLI subcommands: run, validate, init, actions, completions.

use crate::actions::ActionRegistry;
use crate::core::parser;
use crate::core::types::Value;
use crate::progress::{ConsoleReporter, EventBus};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "markten",
    version,
    about = "Recipe runner for repetitive chores: every permutation of the parameters, teardown in reverse"
)]
pub struct Cli {
    /// Log filter (overridden by RUST_LOG), e.g. `info` or `markten=debug`
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a recipe once per parameter permutation
    Run {
        /// Path to the recipe file
        file: PathBuf,

        /// Set a parameter to literal values (repeat for several values)
        #[arg(short, long = "param", value_name = "NAME=VALUE")]
        param: Vec<String>,
    },

    /// Validate a recipe without running anything
    Validate {
        /// Path to the recipe file
        file: PathBuf,
    },

    /// Write a starter recipe.yaml
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// List the built-in actions
    Actions,

    /// Print shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

const STARTER: &str = r##"version: "1.0"
name: my-recipe
description: "Run with: markten run recipe.yaml -p student=alice"

parameters:
  student: [alice, bob]

policy:
  log_lines: 10

steps:
  - name: workspace
    actions:
      dir:
        uses: fs.temp_dir

  - name: notes
    actions:
      - uses: fs.write_file
        with:
          path: "{{dir}}/{{student}}.md"
          text: "# Notes for {{student}}\n"
"##;

/// Dispatch a CLI command.
pub async fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Run { file, param } => cmd_run(&file, &param).await,
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Init { path } => cmd_init(&path),
        Commands::Actions => {
            cmd_actions();
            Ok(())
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "markten", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn cmd_init(path: &Path) -> Result<(), String> {
    let recipe_path = path.join("recipe.yaml");
    if recipe_path.exists() {
        return Err(format!("{} already exists", recipe_path.display()));
    }
    std::fs::create_dir_all(path)
        .map_err(|e| format!("cannot create {}: {}", path.display(), e))?;
    std::fs::write(&recipe_path, STARTER)
        .map_err(|e| format!("cannot write {}: {}", recipe_path.display(), e))?;

    println!("Initialized markten recipe at {}", path.display());
    println!("  Created: {}", recipe_path.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let recipe = parse_and_validate(file, &ActionRegistry::builtin(), &IndexMap::new())?;
    println!(
        "OK: {} ({} parameters, {} steps)",
        recipe.name,
        recipe.parameters.len(),
        recipe.steps.len()
    );
    Ok(())
}

/// Parse and validate a recipe file with `overrides` applied, returning
/// errors if invalid.
fn parse_and_validate(
    file: &Path,
    registry: &ActionRegistry,
    overrides: &IndexMap<String, Vec<Value>>,
) -> Result<parser::RecipeFile, String> {
    let recipe = parser::parse_recipe_file(file)?;
    let errors = parser::validate_recipe_with(&recipe, registry, overrides);
    if errors.is_empty() {
        Ok(recipe)
    } else {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        Err(format!("{} validation error(s)", errors.len()))
    }
}

async fn cmd_run(file: &Path, params: &[String]) -> Result<(), String> {
    let registry = ActionRegistry::builtin();
    let overrides = parser::parse_overrides(params)?;
    let declared = parse_and_validate(file, &registry, &overrides)?;
    let mut recipe = parser::build_recipe(&declared, &registry, &overrides)?;

    let bus = EventBus::default();
    let reporter = ConsoleReporter::stdout()
        .with_log_lines(declared.policy.log_lines)
        .spawn(&bus);

    let summary = match recipe.run(&bus).await {
        Ok(summary) => summary,
        Err(e) => {
            reporter.abort();
            return Err(e.to_string());
        }
    };
    if let Err(e) = reporter.await {
        tracing::warn!(error = %e, "progress reporter stopped early");
    }

    if summary.is_success() {
        Ok(())
    } else {
        Err(format!(
            "{} of {} permutation(s) failed",
            summary.failed, summary.permutations
        ))
    }
}

fn cmd_actions() {
    let registry = ActionRegistry::builtin();
    let width = registry.iter().map(|b| b.name.len()).max().unwrap_or(0);
    for builtin in registry.iter() {
        println!("{:width$}  {}", builtin.name, builtin.summary, width = width);
    }
}
