use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use recordplan::schema::{fetch_field_master, sync_template};
use recordplan::{EngineConfig, EngineContext, MemoryStore, ProposedSet, SchemaStore};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "recordplan")]
#[command(about = "Reconcile proposed rows against stored records and plan the changes")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stage a run and print the annotated tree and the change script
    Plan {
        #[arg(long)]
        schema: PathBuf,
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        proposed: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Apply the script to the in-memory store and print the outcome log
        #[arg(long)]
        execute: bool,
    },
    /// Print the kind hierarchy
    Kinds {
        #[arg(long)]
        schema: PathBuf,
    },
    /// Rebuild a kind's field template from the store's field master
    SyncTemplate {
        #[arg(long)]
        schema: PathBuf,
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        kind: String,
        /// Save the updated schema back to its file
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Plan {
            schema,
            store,
            proposed,
            config,
            execute,
        } => plan(&schema, &store, &proposed, config.as_deref(), execute).await,
        Command::Kinds { schema } => kinds(&schema),
        Command::SyncTemplate {
            schema,
            store,
            kind,
            write,
        } => sync(&schema, &store, &kind, write).await,
    }
}

fn load_schema(path: &Path) -> Result<SchemaStore> {
    SchemaStore::load(path).with_context(|| format!("failed to load schema {}", path.display()))
}

fn load_store(path: &Path) -> Result<MemoryStore> {
    let text = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    MemoryStore::from_json(&text).with_context(|| format!("failed to parse store tables in {}", path.display()))
}

async fn plan(
    schema: &Path,
    store: &Path,
    proposed: &Path,
    config: Option<&Path>,
    execute: bool,
) -> Result<()> {
    let schema = load_schema(schema)?;
    let store = Arc::new(load_store(store)?);
    let config = match config {
        Some(path) => EngineConfig::load(path).with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let text = fs::read_to_string(proposed).with_context(|| format!("failed to read {}", proposed.display()))?;
    let proposed = ProposedSet::from_json(&text).context("failed to parse proposed rows")?;

    let context = EngineContext::new(schema, store).with_config(config);
    let mut run = context.stage(&proposed).await.context("run failed")?;

    println!("== Records ==");
    print!("{}", run.outline());
    if !run.diagnostics().is_empty() {
        println!("\n== Diagnostics ==");
        for diagnostic in run.diagnostics() {
            println!("{}", diagnostic);
        }
    }

    let plan = run.render()?;
    println!("\n== Plan ==");
    if plan.is_empty() {
        println!("-- no changes");
    } else {
        println!("{}", plan.sql_preview());
    }

    if execute {
        if !run.has_pending_changes() {
            return Err(anyhow!("nothing to execute"));
        }
        let log = run.execute().await?;
        println!("\n== Execution ==");
        log.print();
    }
    Ok(())
}

fn kinds(schema: &Path) -> Result<()> {
    let schema = load_schema(schema)?;
    for kind in schema.kinds().filter(|kind| kind.is_progenitor()) {
        print_kind(&schema, &kind.name, 0)?;
    }
    Ok(())
}

fn print_kind(schema: &SchemaStore, name: &str, depth: usize) -> Result<()> {
    let kind = schema.get(name)?;
    let mut notes = Vec::new();
    if kind.keeps_order() {
        notes.push("ordered".to_string());
    }
    if !kind.remap_fields.is_empty() {
        notes.push(format!("remap {}", recordplan::schema::format_remap(&kind.remap_fields)));
    }
    if !kind.has_template() {
        notes.push("no template".to_string());
    }
    println!(
        "{}{} [{}]{}",
        "  ".repeat(depth),
        kind.name,
        kind.key_fields.join(", "),
        if notes.is_empty() {
            String::new()
        } else {
            format!(" ({})", notes.join("; "))
        }
    );
    for child in schema.children_of(name) {
        print_kind(schema, &child.name, depth + 1)?;
    }
    Ok(())
}

async fn sync(schema_path: &Path, store: &Path, kind: &str, write: bool) -> Result<()> {
    let schema = load_schema(schema_path)?;
    let store = load_store(store)?;

    let definitions = fetch_field_master(&store, kind)
        .await
        .with_context(|| format!("failed to read field master for {}", kind))?;
    let (schema, report) = sync_template(schema, kind, &definitions)?;

    if report.is_unchanged() {
        println!("{}: template up to date", kind);
    } else {
        for field in &report.added {
            println!("+ {}", field);
        }
        for field in &report.retyped {
            println!("~ {}", field);
        }
        for field in &report.removed {
            println!("- {}", field);
        }
    }

    if write {
        schema
            .save(schema_path)
            .with_context(|| format!("failed to write {}", schema_path.display()))?;
        println!("Wrote {}", schema_path.display());
    }
    Ok(())
}
