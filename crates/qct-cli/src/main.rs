//! QCT CLI - Command-line interface
//!
//! Usage:
//!   qct add <collection> <content> [--metadata '{"tag":"x"}']
//!   qct update <collection> <point_id> <content>
//!   qct list <collection> [--limit N]
//!   qct delete <collection> <point_id>
//!   qct search <collection> <query> [--filter-by key --filter-value v]
//!   qct invoke '<json arguments>'
//!   qct batch [file]
//!   qct schema

use anyhow::Context;
use clap::{Parser, Subcommand};
use qct_core::{AppConfig, LoggingConfig};
use qct_tool::{ContentTool, ToolResponse};
use serde_json::{json, Value};
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "qct")]
#[command(about = "Store and search text content in Qdrant")]
#[command(version)]
struct Cli {
    /// TOML configuration file; environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print responses as JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add content to a collection
    Add {
        collection: String,
        content: String,
        /// Metadata as a JSON object
        #[arg(short, long)]
        metadata: Option<String>,
    },
    /// Replace the content of a point
    Update {
        collection: String,
        point_id: String,
        content: String,
        /// Metadata as a JSON object
        #[arg(short, long)]
        metadata: Option<String>,
    },
    /// List stored content
    List {
        collection: String,
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(long, requires = "filter_value")]
        filter_by: Option<String>,
        #[arg(long, requires = "filter_by")]
        filter_value: Option<String>,
    },
    /// Delete a point
    Delete { collection: String, point_id: String },
    /// Search for similar content
    Search {
        collection: String,
        query: String,
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(long, requires = "filter_value")]
        filter_by: Option<String>,
        #[arg(long, requires = "filter_by")]
        filter_value: Option<String>,
    },
    /// Run raw tool arguments given as JSON
    Invoke { args: String },
    /// Run newline-delimited JSON requests from a file or stdin
    Batch {
        path: Option<PathBuf>,
        /// Texts to pre-embed, one per line
        #[arg(long)]
        warm: Option<PathBuf>,
        /// Print cache statistics when done
        #[arg(long)]
        stats: bool,
    },
    /// Print the tool descriptor
    Schema,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    Ok(config)
}

/// Directives used when `RUST_LOG` is unset
fn default_filter(level: &str) -> String {
    ["qct", "qct_cli", "qct_core", "qct_tool", "qct_vector"]
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(&logging.level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(logging.include_location)
        .with_line_number(logging.include_location);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn parse_metadata(metadata: Option<String>) -> anyhow::Result<Value> {
    match metadata {
        Some(raw) => serde_json::from_str(&raw).context("--metadata must be a JSON object"),
        None => Ok(json!({})),
    }
}

fn to_args(command: Commands) -> anyhow::Result<Value> {
    let args = match command {
        Commands::Add {
            collection,
            content,
            metadata,
        } => json!({
            "action": "add",
            "collection_name": collection,
            "content": content,
            "metadata": parse_metadata(metadata)?,
        }),
        Commands::Update {
            collection,
            point_id,
            content,
            metadata,
        } => json!({
            "action": "update",
            "collection_name": collection,
            "point_id": point_id,
            "content": content,
            "metadata": parse_metadata(metadata)?,
        }),
        Commands::List {
            collection,
            limit,
            filter_by,
            filter_value,
        } => json!({
            "action": "list",
            "collection_name": collection,
            "limit": limit,
            "filter_by": filter_by,
            "filter_value": filter_value,
        }),
        Commands::Delete {
            collection,
            point_id,
        } => json!({
            "action": "delete",
            "collection_name": collection,
            "point_id": point_id,
        }),
        Commands::Search {
            collection,
            query,
            limit,
            filter_by,
            filter_value,
        } => json!({
            "action": "search",
            "collection_name": collection,
            "query": query,
            "limit": limit,
            "filter_by": filter_by,
            "filter_value": filter_value,
        }),
        Commands::Invoke { args } => {
            serde_json::from_str(&args).context("invoke arguments must be JSON")?
        }
        Commands::Batch { .. } | Commands::Schema => {
            anyhow::bail!("command does not map to a single tool invocation")
        }
    };
    Ok(args)
}

fn print_response(response: &ToolResponse, as_json: bool) -> anyhow::Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(&response.to_json())?);
    } else {
        println!("{}", response.to_text());
    }
    Ok(())
}

fn read_lines(path: Option<&PathBuf>) -> anyhow::Result<Vec<String>> {
    let reader: Box<dyn BufRead> = match path {
        Some(path) => Box::new(BufReader::new(
            std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(std::io::stdin())),
    };

    let mut lines = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if !line.trim().is_empty() {
            lines.push(line);
        }
    }
    Ok(lines)
}

async fn run_batch(
    tool: &ContentTool,
    path: Option<PathBuf>,
    warm: Option<PathBuf>,
    stats: bool,
    as_json: bool,
) -> anyhow::Result<bool> {
    if let Some(warm) = warm {
        let texts = read_lines(Some(&warm))?;
        tool.cache()
            .warm_embedding_cache(texts, tool.embedder().as_ref())
            .await?;
    }

    let lines = read_lines(path.as_ref())?;
    tracing::info!(requests = lines.len(), "Running batch");

    let mut all_succeeded = true;
    for (index, line) in lines.into_iter().enumerate() {
        let args: Value = serde_json::from_str(&line)
            .with_context(|| format!("line {} is not valid JSON", index + 1))?;
        let response = tool.invoke(args).await;
        all_succeeded &= response.is_success();
        print_response(&response, as_json)?;
    }

    if stats {
        for report in tool.cache().all_stats() {
            eprintln!("{}", serde_json::to_string(&report)?);
        }
    }

    Ok(all_succeeded)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    if let Commands::Schema = cli.command {
        println!("{}", serde_json::to_string_pretty(&ContentTool::descriptor())?);
        return Ok(ExitCode::SUCCESS);
    }

    let config = load_config(cli.config.as_ref())?;
    init_tracing(&config.logging);

    let tool = ContentTool::from_config(&config)?;

    let succeeded = match cli.command {
        Commands::Batch { path, warm, stats } => {
            run_batch(&tool, path, warm, stats, cli.json).await?
        }
        command => {
            let response = tool.invoke(to_args(command)?).await;
            print_response(&response, cli.json)?;
            response.is_success()
        }
    };

    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_covers_binary() {
        let filter = default_filter("debug");
        assert!(filter.split(',').any(|d| d == "qct_cli=debug"));
        assert!(filter.split(',').any(|d| d == "qct_tool=debug"));
    }

    #[test]
    fn test_schema_needs_no_config() {
        let cli = Cli::try_parse_from(["qct", "schema"]).unwrap();
        assert!(matches!(cli.command, Commands::Schema));
        assert_eq!(ContentTool::descriptor()["name"], qct_tool::TOOL_NAME);
    }

    #[test]
    fn test_search_args() {
        let args = to_args(Commands::Search {
            collection: "docs".into(),
            query: "rust".into(),
            limit: Some(3),
            filter_by: None,
            filter_value: None,
        })
        .unwrap();
        assert_eq!(args["action"], "search");
        assert_eq!(args["limit"], 3);
        assert!(to_args(Commands::Schema).is_err());
    }
}
