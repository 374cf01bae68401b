//! Skillbot CLI
//!
//! Checks and dry-runs skill documents against headless collaborators.
//!
//! Usage from workspace root:
//!   cargo run --bin skillbot -- check skills/checkout.psk --library skills
//!   cargo run --bin skillbot -- run skills/checkout.psk --library skills --set qty=2
//!   cargo run --bin skillbot -- list skills/checkout.psk --library skills

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use serde_json::Value;
use skillbot::platforms::DryRunOp;
use skillbot::steps::BUILTIN_STEP_TYPES;
use skillbot::{
    resolve, Collaborators, Interpreter, MissionStatus, Op, Program, RunConfig, SkillDocument,
    SkillLibrary,
};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

mod summary;

#[derive(Parser)]
#[command(name = "skillbot")]
#[command(about = "Skill interpreter for scripted desktop and web automation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser, Debug)]
struct CheckArgs {
    /// Skill document to resolve (.psk or .json)
    skill: PathBuf,

    /// Directory holding the skills it uses
    #[clap(long, short = 'l', env = "SKILLBOT_LIBRARY")]
    library: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Skill document to run (.psk or .json)
    skill: PathBuf,

    /// Directory holding the skills it uses
    #[clap(long, short = 'l', env = "SKILLBOT_LIBRARY")]
    library: Option<PathBuf>,

    /// Run configuration (YAML or JSON)
    #[clap(long, short = 'c', env = "SKILLBOT_CONFIG")]
    config: Option<PathBuf>,

    /// Seed for back-off and jitter
    #[clap(long)]
    seed: Option<u64>,

    /// Abort after this many steps
    #[clap(long)]
    max_steps: Option<u64>,

    /// Pre-declare a variable, as name=<json> (plain text if not JSON)
    #[clap(long = "set", value_name = "NAME=VALUE")]
    vars: Vec<String>,

    /// Treat unknown step types as dry-run no-ops instead of rejecting the skill
    #[clap(long)]
    allow_unknown: bool,

    /// Print the report as JSON instead of a summary
    #[clap(long)]
    json: bool,

    /// Print the final symbol table
    #[clap(long)]
    dump_symbols: bool,
}

#[derive(Parser, Debug)]
struct ListArgs {
    /// Skill document to resolve (.psk or .json)
    skill: PathBuf,

    /// Directory holding the skills it uses
    #[clap(long, short = 'l', env = "SKILLBOT_LIBRARY")]
    library: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and resolve a skill without running it
    Check(CheckArgs),
    /// Run a skill against headless collaborators
    Run(RunArgs),
    /// Print the resolved program of a skill
    List(ListArgs),
}

fn init_logging() {
    let log_level = env::var("LOG_LEVEL")
        .map(|level| match level.to_lowercase().as_str() {
            "error" => Level::ERROR,
            "warn" => Level::WARN,
            "info" => Level::INFO,
            "debug" => Level::DEBUG,
            "trace" => Level::TRACE,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

/// Split `name=value`; the value is parsed as JSON and kept as text otherwise.
fn parse_assignment(raw: &str) -> Result<(String, Value)> {
    let Some((name, value)) = raw.split_once('=') else {
        bail!("expected NAME=VALUE, got '{raw}'");
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("empty variable name in '{raw}'");
    }
    let value = serde_json::from_str(value.trim()).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

fn load_library(dir: Option<&Path>) -> Result<SkillLibrary> {
    match dir {
        Some(dir) => SkillLibrary::load_dir(dir)
            .with_context(|| format!("Failed to load skill library from {}", dir.display())),
        None => Ok(SkillLibrary::new()),
    }
}

fn load_skill(path: &Path) -> Result<SkillDocument> {
    SkillDocument::load(path).with_context(|| format!("Failed to load skill {}", path.display()))
}

/// Step types in `program` that the interpreter does not run itself.
fn unknown_step_types(program: &Program) -> Vec<String> {
    let mut kinds: Vec<String> = program
        .instructions
        .iter()
        .filter_map(|i| match &i.op {
            Op::Action { kind, .. } if !BUILTIN_STEP_TYPES.contains(&kind.as_str()) => {
                Some(kind.clone())
            }
            _ => None,
        })
        .collect();
    kinds.sort();
    kinds.dedup();
    kinds
}

fn check(args: CheckArgs) -> Result<()> {
    let main = load_skill(&args.skill)?;
    let library = load_library(args.library.as_deref())?;
    let program = resolve(&main, &library)
        .with_context(|| format!("Failed to resolve {}", args.skill.display()))?;

    println!(
        "{} '{}' resolves to {} instructions across {} document(s)",
        "OK".green().bold(),
        program.name,
        program.len(),
        program.documents.len()
    );
    if !program.functions.is_empty() {
        let names: Vec<&str> = program.functions.keys().map(String::as_str).collect();
        println!("   Functions: {}", names.join(", "));
    }
    let unknown = unknown_step_types(&program);
    if !unknown.is_empty() {
        println!(
            "{} step types without a built-in handler: {}",
            "Note:".yellow(),
            unknown.join(", ")
        );
    }
    Ok(())
}

async fn run(args: RunArgs) -> Result<MissionStatus> {
    let main = load_skill(&args.skill)?;
    let library = load_library(args.library.as_deref())?;

    let mut config = match &args.config {
        Some(path) => RunConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => RunConfig::default(),
    };
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }
    if args.max_steps.is_some() {
        config.max_steps = args.max_steps;
    }

    let program = resolve(&main, &library)
        .with_context(|| format!("Failed to resolve {}", args.skill.display()))?;

    let mut collaborators = Collaborators::headless();
    if args.allow_unknown {
        for kind in unknown_step_types(&program) {
            warn!("Step type '{}' will run as a dry-run no-op", kind);
            collaborators = collaborators.with_external(&kind, Arc::new(DryRunOp));
        }
    }

    let mut interp = Interpreter::new(program, collaborators, config)
        .context("Skill uses step types with no handler (try --allow-unknown)")?;
    for raw in &args.vars {
        let (name, value) = parse_assignment(raw)?;
        info!("Pre-declaring '{}' = {}", name, value);
        interp.symbols_mut().declare(&name, value);
    }

    let handle = interp.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted; stopping after the current step".yellow());
            handle.cancel();
        }
    });

    let report = interp.run().await.context("Mission aborted")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        summary::print_report(&report);
    }
    if args.dump_symbols {
        println!("{}", serde_json::to_string_pretty(&interp.symbols().to_value())?);
    }
    Ok(report.status)
}

fn list(args: ListArgs) -> Result<()> {
    let main = load_skill(&args.skill)?;
    let library = load_library(args.library.as_deref())?;
    let program = resolve(&main, &library)
        .with_context(|| format!("Failed to resolve {}", args.skill.display()))?;

    println!("{} ({} instructions)", program.name.bold(), program.len());
    for (index, instruction) in program.instructions.iter().enumerate() {
        println!(
            "{:>5}  {:<28} {}",
            index,
            instruction.address.to_string(),
            summary::describe(&instruction.op)
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Check(args) => check(args)?,
        Commands::Run(args) => {
            let status = run(args).await?;
            if status != MissionStatus::Completed {
                std::process::exit(1);
            }
        }
        Commands::List(args) => list(args)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn assignments_parse_json_then_fall_back_to_text() {
        assert_eq!(parse_assignment("qty=2").unwrap(), ("qty".into(), json!(2)));
        assert_eq!(
            parse_assignment("skus=[\"a\", \"b\"]").unwrap(),
            ("skus".into(), json!(["a", "b"]))
        );
        assert_eq!(
            parse_assignment("name=Ada Lovelace").unwrap(),
            ("name".into(), json!("Ada Lovelace"))
        );
        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("=3").is_err());
    }

    #[test]
    fn unknown_types_are_collected_once() {
        let doc = SkillDocument::from_value(
            "main",
            json!({
                "step 1": {"type": "Print Label"},
                "step 2": {"type": "Halt"},
                "step 3": {"type": "Print Label"},
                "step 4": {"type": "AMZ Scrape"}
            }),
        )
        .unwrap();
        let program = resolve(&doc, &SkillLibrary::new()).unwrap();
        assert_eq!(unknown_step_types(&program), vec!["AMZ Scrape", "Print Label"]);
    }

    #[test]
    fn library_loads_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("greet.psk")).unwrap();
        writeln!(
            file,
            "{{\"header\": {{\"name\": \"greet\"}}, \"step 1\": {{\"type\": \"Halt\"}}}}"
        )
        .unwrap();

        let library = load_library(Some(dir.path())).unwrap();
        assert!(library.get("greet").is_some());
        assert!(load_library(None).unwrap().is_empty());
    }

    #[test]
    fn list_takes_a_skill_and_resolves_it() {
        let cli = Cli::try_parse_from(["skillbot", "list", "main.psk", "--library", "skills"]).unwrap();
        let Commands::List(args) = cli.command else {
            panic!("expected the list command");
        };
        assert_eq!(args.skill, PathBuf::from("main.psk"));
        assert_eq!(args.library, Some(PathBuf::from("skills")));

        let dir = tempfile::tempdir().unwrap();
        let skill = dir.path().join("main.psk");
        std::fs::write(
            &skill,
            r#"{"step 1": {"type": "Create Data", "data_name": "n", "key_value": 1}}"#,
        )
        .unwrap();
        list(ListArgs {
            skill,
            library: None,
        })
        .unwrap();
        assert!(list(ListArgs {
            skill: dir.path().join("missing.psk"),
            library: None,
        })
        .is_err());
    }
}
