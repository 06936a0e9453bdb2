//! Schema Contracts CLI
//!
//! Diffs schema documents and inspects the effective configuration.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use schema_contracts::{classify, compare, CompatibilityMode, CoreConfig, SchemaDocument};
use tracing_subscriber::EnvFilter;

/// Exit code used when the diff contains breaking changes
const EXIT_BREAKING: i32 = 2;

#[derive(Parser)]
#[command(name = "schema-contracts")]
#[command(about = "Schema contract negotiation tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Diff two JSON Schema files and classify the changes
    Diff {
        /// Currently published schema
        old: PathBuf,
        /// Proposed schema
        new: PathBuf,
        /// Compatibility mode (backward, forward, full, none)
        #[arg(short, long, default_value = "backward")]
        mode: String,
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Explicit config file, loaded on top of the default locations
        #[arg(short, long)]
        path: Option<String>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn load_schema(path: &PathBuf) -> Result<SchemaDocument, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    Ok(SchemaDocument::parse_str(&content)?)
}

fn run(cli: Cli) -> Result<i32, Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Diff { old, new, mode, format } => {
            let mode: CompatibilityMode = mode.parse()?;
            let old_schema = load_schema(&old)?;
            let new_schema = load_schema(&new)?;

            let result = classify(&compare(&old_schema, &new_schema), mode);

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                }
                OutputFormat::Text => {
                    println!("🔍 {} -> {} ({} compatibility)", old.display(), new.display(), mode);
                    println!();
                    if result.changes.is_empty() {
                        println!("✅ No changes detected");
                    }
                    for change in &result.changes {
                        let marker = if change.breaking { "❌" } else { "  " };
                        println!("{} {} at {}", marker, change.kind, change.path);
                        println!("   └─ {}", change.message);
                    }
                    println!();
                    if result.breaking {
                        println!("❌ {}", result.summary());
                    } else {
                        println!("✅ {}", result.summary());
                    }
                }
            }

            Ok(if result.breaking { EXIT_BREAKING } else { 0 })
        }

        Commands::Config { path } => {
            let config = CoreConfig::load_from(path.as_deref())?;
            print!("{}", config.to_toml()?);
            Ok(0)
        }
    }
}
