//! Household agent CLI.
//!
//! Inspection and setup commands for the agent: list the action catalog,
//! parse action strings, check a worked-example corpus and write a default
//! config. Episodes themselves are driven by the `eval` binary.

use std::path::{Path, PathBuf};

use agent::core::catalog::{ActionSet, Catalog};
use agent::core::error::ContractError;
use agent::core::history::Transcript;
use agent::exit_codes;
use agent::io::config::{AgentConfig, DEFAULT_CONFIG_PATH, load_config, write_config};
use agent::io::corpus::Corpus;
use agent::logging;
use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde_json::json;

#[derive(Parser)]
#[command(
    name = "agent",
    version,
    about = "Subtask-decomposing household agent"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone, Copy)]
struct Extensions {
    /// Include the `think` action.
    #[arg(long)]
    think: bool,
    /// Include `finish_subtask` and `replace_subtask`.
    #[arg(long)]
    subtask_control: bool,
}

impl Extensions {
    fn catalog(self) -> Catalog {
        Catalog::new(ActionSet {
            think: self.think,
            subtask_control: self.subtask_control,
        })
    }
}

#[derive(Subcommand)]
enum Command {
    /// List the actions of a catalog.
    Actions {
        #[command(flatten)]
        extensions: Extensions,
        /// Print function specifications as JSON instead.
        #[arg(long)]
        json: bool,
    },
    /// Parse an action string and print its name and arguments as JSON.
    Parse {
        /// Rendered action, e.g. "go to cabinet 1".
        action: String,
        #[command(flatten)]
        extensions: Extensions,
    },
    /// Load the configured corpus and summarize its examples.
    CheckCorpus {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Write a config file with default values.
    InitConfig {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Actions { extensions, json } => cmd_actions(extensions, json),
        Command::Parse { action, extensions } => cmd_parse(&action, extensions),
        Command::CheckCorpus { config } => cmd_check_corpus(&config),
        Command::InitConfig { config, force } => cmd_init_config(&config, force),
    }
}

fn cmd_actions(extensions: Extensions, as_json: bool) -> Result<i32> {
    let catalog = extensions.catalog();
    if as_json {
        let specs = serde_json::to_string_pretty(&catalog.specs()).context("serialize specs")?;
        println!("{specs}");
        return Ok(exit_codes::OK);
    }
    for def in catalog.entries() {
        println!("{:<16} {:<56} {}", def.name, def.template, def.description);
    }
    Ok(exit_codes::OK)
}

fn cmd_parse(input: &str, extensions: Extensions) -> Result<i32> {
    let catalog = extensions.catalog();
    match catalog.parse(input) {
        Ok(action) => {
            let value = json!({ "name": action.name, "args": action.args });
            println!("{value}");
            Ok(exit_codes::OK)
        }
        Err(err @ ContractError::NoMatchingAction { .. }) => {
            eprintln!("{err}");
            Ok(exit_codes::NO_MATCH)
        }
        Err(err) => Err(err.into()),
    }
}

fn cmd_check_corpus(config_path: &Path) -> Result<i32> {
    let cfg = load_config(config_path)?;
    let corpus = Corpus::load(&cfg.corpus.descriptions, &cfg.corpus.transcripts_dir)?;
    if corpus.is_empty() {
        bail!("corpus {} has no examples", cfg.corpus.descriptions.display());
    }
    for name in corpus.names() {
        let Some(example) = corpus.get(name) else {
            continue;
        };
        let steps: usize = example.subtasks().iter().map(|s| s.steps.len()).sum();
        println!(
            "{name}: {} subtasks, {steps} steps",
            example.subtasks().len()
        );
    }
    Ok(exit_codes::OK)
}

fn cmd_init_config(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &AgentConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}
