use anyhow::Context;
use bson::Document;
use clap::{Parser, Subcommand};
use docpipe::{ExecutorConfig, Query, QueryAction, SchemaChange};
use docpipe_core::{compile_insert_with, compile_read_with, compile_write_with, BsonEncoder};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "docpipe")]
#[command(about = "Compile relational queries into document-store pipelines", long_about = None)]
struct Args {
    /// Directory holding docpipe.toml and .env
    #[arg(long, default_value = ".")]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the native command a query compiles to
    Explain {
        /// Query model as JSON
        query: PathBuf,
    },
    /// Print the native command a schema change compiles to
    Schema {
        /// Schema change as JSON
        change: PathBuf,

        /// Validator currently attached to the collection, as JSON
        #[arg(long)]
        existing: Option<PathBuf>,
    },
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

fn print<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn explain(query: &Query, encoder: &BsonEncoder) -> anyhow::Result<()> {
    match query.action {
        QueryAction::Find => print(&compile_read_with(query, encoder)?),
        QueryAction::Insert => print(&compile_insert_with(query, encoder)?),
        QueryAction::Update | QueryAction::Delete => print(&compile_write_with(query, encoder)?),
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docpipe=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = ExecutorConfig::load(&args.config_dir)?;
    let encoder = BsonEncoder::new().human_readable(config.human_readable_binds);

    match args.command {
        Command::Explain { query } => {
            let query: Query = read_json(&query)?;
            tracing::info!(collection = %query.schema, action = query.action.as_str(), "Explaining query");
            explain(&query, &encoder)
        }
        Command::Schema { change, existing } => {
            let change: SchemaChange = read_json(&change)?;
            let existing: Option<Document> = existing.as_deref().map(read_json::<Document>).transpose()?;
            let command = docpipe::compile_schema(&change, existing.as_ref())?;
            print(&command)
        }
    }
}
