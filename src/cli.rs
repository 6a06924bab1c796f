//! Command line front-end used by hook scripts

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use base64::Engine as _;
use clap::{Parser, Subcommand};
use serde_json::json;
use uuid::Uuid;

use trellis::checkpoint::{run_checkpoint, CheckpointOutcome, CheckpointRequest};
use trellis::data::{SqliteStateStore, StateStore, StateValue, ValueType};
use trellis::git::{ProjectRepository, RepoError, ScopedRepository, ToolingRepository};
use trellis::Config;

#[derive(Debug, Parser)]
#[command(
    name = "trellis",
    version,
    about = "Workflow state and checkpoint commits for agent tooling"
)]
pub struct Cli {
    /// Project directory (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// State database file (overrides config)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// State table name (overrides config)
    #[arg(long, global = true)]
    pub table: Option<String>,

    /// Data directory for logs and default state files
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Read and write workflow state
    State {
        #[command(subcommand)]
        command: StateCommand,
    },
    /// Commit pending tooling changes for a workflow phase
    Checkpoint {
        workflow: String,
        /// Defaults to the workflow's recorded phase
        action: Option<String>,
        #[arg(long, conflicts_with = "new_session")]
        session_id: Option<String>,
        /// Tag the commit with a freshly generated session id
        #[arg(long)]
        new_session: bool,
    },
    /// Show uncommitted changes in the tooling and project repositories
    Status,
}

#[derive(Debug, Subcommand)]
pub enum StateCommand {
    Get {
        key: String,
    },
    Set {
        key: String,
        /// Value text; base64 for `bytes`, omitted for `null`
        value: Option<String>,
        #[arg(long = "type", default_value = "text", value_parser = parse_value_type)]
        value_type: ValueType,
        #[arg(long)]
        author: Option<String>,
    },
    /// Atomically add to an integer value
    Incr {
        key: String,
        #[arg(long, default_value_t = 1, allow_hyphen_values = true)]
        by: i64,
        #[arg(long)]
        author: Option<String>,
    },
    Delete {
        key: String,
    },
    /// List keys
    List,
    /// Print an entry with provenance as JSON
    Entry {
        key: String,
    },
    Clear,
}

fn parse_value_type(s: &str) -> Result<ValueType, String> {
    ValueType::parse(s)
        .ok_or_else(|| format!("unknown type {s:?} (null, bool, int, float, text, bytes)"))
}

pub fn run(cli: Cli) -> Result<()> {
    let project_dir = match cli.project_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    let mut config = Config::load(&project_dir)?;
    if let Some(db) = cli.db {
        config.state_db = Some(db);
    }
    if let Some(table) = cli.table {
        config.state_table = table;
    }

    match cli.command {
        Command::State { command } => run_state(&config, &project_dir, command),
        Command::Checkpoint {
            workflow,
            action,
            session_id,
            new_session,
        } => {
            let session_id = session_id.or_else(|| new_session.then(|| Uuid::new_v4().to_string()));
            run_checkpoint_command(
                &config,
                &project_dir,
                &workflow,
                action.as_deref(),
                session_id.as_deref(),
            )
        }
        Command::Status => run_status(&project_dir),
    }
}

fn open_store(config: &Config, project_dir: &Path) -> Result<SqliteStateStore> {
    let path = config.state_db_path(project_dir);
    SqliteStateStore::open_with_options(&path, config.store_options())
        .with_context(|| format!("Failed to open state store {}", path.display()))
}

fn run_state(config: &Config, project_dir: &Path, command: StateCommand) -> Result<()> {
    let store = open_store(config, project_dir)?;

    match command {
        StateCommand::Get { key } => match store.get_entry(&key)? {
            Some(entry) => println!("{}", entry.value),
            None => bail!("Key not found: {key}"),
        },
        StateCommand::Set {
            key,
            value,
            value_type,
            author,
        } => {
            let value = parse_value(value_type, value.as_deref())?;
            store.set(&key, value, author.as_deref())?;
        }
        StateCommand::Incr { key, by, author } => {
            println!("{}", store.atomic_increment(&key, by, author.as_deref())?);
        }
        StateCommand::Delete { key } => {
            if !store.delete(&key)? {
                eprintln!("Key not found: {key}");
            }
        }
        StateCommand::List => {
            for key in store.keys() {
                println!("{}", key?);
            }
        }
        StateCommand::Entry { key } => match store.get_entry(&key)? {
            Some(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
            None => bail!("Key not found: {key}"),
        },
        StateCommand::Clear => store.clear()?,
    }
    Ok(())
}

fn parse_value(value_type: ValueType, raw: Option<&str>) -> Result<StateValue> {
    if value_type == ValueType::Null {
        return Ok(StateValue::Null);
    }
    let raw = raw.ok_or_else(|| anyhow!("A value is required for type {value_type}"))?;
    let value = match value_type {
        ValueType::Null => StateValue::Null,
        ValueType::Bool => StateValue::Bool(
            raw.parse()
                .with_context(|| format!("Not a bool: {raw:?}"))?,
        ),
        ValueType::Int => StateValue::Int(
            raw.parse()
                .with_context(|| format!("Not an integer: {raw:?}"))?,
        ),
        ValueType::Float => StateValue::Float(
            raw.parse()
                .with_context(|| format!("Not a float: {raw:?}"))?,
        ),
        ValueType::Text => StateValue::Text(raw.to_string()),
        ValueType::Bytes => StateValue::Bytes(
            base64::engine::general_purpose::STANDARD
                .decode(raw)
                .context("Bytes values must be base64")?,
        ),
    };
    Ok(value)
}

fn run_checkpoint_command(
    config: &Config,
    project_dir: &Path,
    workflow: &str,
    action: Option<&str>,
    session_id: Option<&str>,
) -> Result<()> {
    let store = open_store(config, project_dir)?;
    let request = CheckpointRequest {
        workflow,
        action,
        session_id,
    };

    match run_checkpoint(&store, project_dir, request, &config.commit)? {
        CheckpointOutcome::Committed(result) => {
            println!("committed {}", result.sha.unwrap_or_default());
        }
        CheckpointOutcome::NoChanges => println!("no changes"),
        CheckpointOutcome::Skipped { reason } => println!("skipped: {reason}"),
    }
    Ok(())
}

fn run_status(project_dir: &Path) -> Result<()> {
    let tooling = match ToolingRepository::open(project_dir) {
        Ok(repo) => Some(repo.status()?),
        Err(RepoError::NotInitialized(_)) => None,
        Err(e) => return Err(e.into()),
    };
    let project = match ProjectRepository::open(project_dir) {
        Ok(repo) => Some(repo.status()?),
        Err(RepoError::NotInitialized(_)) => None,
        Err(e) => return Err(e.into()),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "tooling": tooling, "project": project }))?
    );
    Ok(())
}
