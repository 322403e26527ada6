/*!
Conduit CLI - command-line access to any connector contract.

Every command takes a contract URI (`mem://`, `file://` or a bare path,
`s3://`, `gs://`, `mc://`) plus optional `-k key=value` options and runs one
connector verb against it.
*/

use anyhow::Context;
use clap::{Parser, Subcommand};
use conduit_core::{
    init_observability, Connector, ConnectorConfig, ContractParser, Options, Record,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use tabled::builder::Builder;
use tabled::{Table, Tabled};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "conduit")]
#[command(about = "Load, persist and inspect data through connector contracts")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// JSON configuration file
    #[arg(short, long, global = true, env = "CONDUIT_CONFIG")]
    config: Option<PathBuf>,

    /// Base directory for relative local paths
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show how a contract resolves
    Inspect {
        uri: String,
        /// Contract option as key=value
        #[arg(short = 'k', long = "option", value_parser = parse_key_val)]
        options: Vec<(String, String)>,
    },
    /// Check whether the resource exists
    Exists {
        uri: String,
        #[arg(short = 'k', long = "option", value_parser = parse_key_val)]
        options: Vec<(String, String)>,
    },
    /// Load the resource and print it
    Load {
        uri: String,
        #[arg(short = 'k', long = "option", value_parser = parse_key_val)]
        options: Vec<(String, String)>,
        /// Print at most this many rows
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Load one contract and persist it to another
    Copy {
        source: String,
        destination: String,
        #[arg(short = 'k', long = "option", value_parser = parse_key_val)]
        options: Vec<(String, String)>,
    },
    /// Delete the resource
    Remove {
        uri: String,
        #[arg(short = 'k', long = "option", value_parser = parse_key_val)]
        options: Vec<(String, String)>,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Probe the resource for changes
    Changed {
        uri: String,
        #[arg(short = 'k', long = "option", value_parser = parse_key_val)]
        options: Vec<(String, String)>,
        /// Number of probes
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
        /// Seconds between probes
        #[arg(short, long, default_value_t = 5)]
        interval: u64,
    },
    /// Copy the resource into the next free backup slot
    Rotate {
        uri: String,
        #[arg(short = 'k', long = "option", value_parser = parse_key_val)]
        options: Vec<(String, String)>,
        /// Number of slots (defaults to the contract's max_backups)
        #[arg(short, long)]
        max: Option<usize>,
    },
}

#[derive(Tabled)]
struct ContractField {
    #[tabled(rename = "Field")]
    field: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "conduit=debug" } else { "conduit=info" };
    init_observability(cli.json_logs, Some(filter))?;

    let config = load_config(&cli)?;

    match &cli.command {
        Commands::Inspect { uri, options } => inspect(&config, uri, options),
        Commands::Exists { uri, options } => {
            let connector = open(&config, uri, options)?;
            println!("{}", connector.exists()?);
            Ok(())
        }
        Commands::Load { uri, options, limit } => load(&config, uri, options, *limit),
        Commands::Copy {
            source,
            destination,
            options,
        } => copy(&config, source, destination, options),
        Commands::Remove { uri, options, force } => remove(&config, uri, options, *force),
        Commands::Changed {
            uri,
            options,
            count,
            interval,
        } => changed(&config, uri, options, *count, *interval),
        Commands::Rotate { uri, options, max } => rotate(&config, uri, options, *max),
    }
}

fn load_config(cli: &Cli) -> Result<ConnectorConfig, anyhow::Error> {
    let mut config = match &cli.config {
        Some(path) => ConnectorConfig::from_json_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => ConnectorConfig::default(),
    };
    if let Some(base) = &cli.base_dir {
        config.local.base_path = Some(base.clone());
    }
    Ok(config)
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    if key.is_empty() {
        return Err(format!("empty option name in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn to_options(pairs: &[(String, String)]) -> Options {
    pairs.iter().cloned().collect()
}

fn open(config: &ConnectorConfig, uri: &str, options: &[(String, String)]) -> Result<Connector, anyhow::Error> {
    Connector::open(uri, &to_options(options), &Options::new(), config)
        .with_context(|| format!("failed to open connector for '{uri}'"))
}

fn inspect(config: &ConnectorConfig, uri: &str, options: &[(String, String)]) -> Result<(), anyhow::Error> {
    let contract = ContractParser::new().parse(uri, &to_options(options), &Options::new())?;
    let format_options = |map: &Options| {
        map.iter()
            .map(|(k, v)| match k.as_str() {
                "token" | "password" => format!("{k}=***"),
                _ => format!("{k}={v}"),
            })
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut fields = vec![
        ContractField {
            field: "contract",
            value: contract.to_string(),
        },
        ContractField {
            field: "scheme",
            value: contract.scheme.clone(),
        },
        ContractField {
            field: "path",
            value: contract.path.clone(),
        },
        ContractField {
            field: "kwargs",
            value: format_options(&contract.kwargs),
        },
        ContractField {
            field: "query",
            value: format_options(&contract.query),
        },
        ContractField {
            field: "file type hint",
            value: contract.file_type_hint(),
        },
    ];

    match Connector::from_contract(contract, config) {
        Ok(connector) => {
            fields.push(ContractField {
                field: "backend",
                value: connector.kind().to_string(),
            });
            fields.push(ContractField {
                field: "key",
                value: connector.key().to_string(),
            });
            fields.push(ContractField {
                field: "format",
                value: match connector.format() {
                    Ok(format) => format.to_string(),
                    Err(e) => format!("error: {e}"),
                },
            });
            fields.push(ContractField {
                field: "retries",
                value: connector.retry_policy().max_retries.to_string(),
            });
            if let Some(credential) = connector.credential() {
                fields.push(ContractField {
                    field: "credential",
                    value: format!("{credential:?}"),
                });
            }
        }
        Err(e) => fields.push(ContractField {
            field: "backend",
            value: format!("error: {e}"),
        }),
    }

    println!("{}", Table::new(fields));
    Ok(())
}

fn load(
    config: &ConnectorConfig,
    uri: &str,
    options: &[(String, String)],
    limit: Option<usize>,
) -> Result<(), anyhow::Error> {
    let connector = open(config, uri, options)?;
    let record = connector.load()?;
    println!("{}", render(&record, limit)?);
    Ok(())
}

fn render(record: &Record, limit: Option<usize>) -> Result<String, anyhow::Error> {
    let rendered = match record {
        Record::Table(frame) if frame.columns.is_empty() => "(empty)".to_string(),
        Record::Table(frame) => {
            let shown = limit.unwrap_or(frame.rows.len()).min(frame.rows.len());
            let mut builder = Builder::default();
            builder.push_record(frame.columns.iter().cloned());
            for row in frame.rows.iter().take(shown) {
                builder.push_record(row.iter().map(|value| value.to_string()));
            }
            let mut out = builder.build().to_string();
            if shown < frame.rows.len() {
                out.push_str(&format!("\n... {} more rows", frame.rows.len() - shown));
            }
            out
        }
        Record::Document(doc) => serde_json::to_string_pretty(doc)?,
        Record::Raw(bytes) => format!("{} bytes of raw data", bytes.len()),
    };
    Ok(rendered)
}

fn copy(
    config: &ConnectorConfig,
    source: &str,
    destination: &str,
    options: &[(String, String)],
) -> Result<(), anyhow::Error> {
    let record = open(config, source, options)?.load()?;
    let ack = Connector::open(destination, &Options::new(), &Options::new(), config)?.persist(&record)?;
    info!(source = %source, destination = %destination, bytes = ack.bytes, "Copy complete");
    println!("✓ Wrote {} bytes to {} ({})", ack.bytes, ack.key, ack.content_type);
    Ok(())
}

fn remove(config: &ConnectorConfig, uri: &str, options: &[(String, String)], force: bool) -> Result<(), anyhow::Error> {
    if !force {
        print!("Are you sure you want to delete '{uri}'? (y/N): ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().to_lowercase().starts_with('y') {
            println!("Deletion cancelled");
            return Ok(());
        }
    }

    let connector = open(config, uri, options)?;
    match connector.remove() {
        Ok(true) => println!("✓ Resource deleted"),
        Ok(false) => println!("Nothing to delete"),
        Err(e) => {
            error!("✗ Failed to delete resource: {}", e);
            return Err(e.into());
        }
    }
    Ok(())
}

fn changed(
    config: &ConnectorConfig,
    uri: &str,
    options: &[(String, String)],
    count: usize,
    interval: u64,
) -> Result<(), anyhow::Error> {
    let connector = open(config, uri, options)?;
    for probe in 0..count {
        if probe > 0 {
            std::thread::sleep(Duration::from_secs(interval));
        }
        let state = if connector.has_changed()? { "changed" } else { "unchanged" };
        println!("{state}");
    }
    Ok(())
}

fn rotate(
    config: &ConnectorConfig,
    uri: &str,
    options: &[(String, String)],
    max: Option<usize>,
) -> Result<(), anyhow::Error> {
    let connector = open(config, uri, options)?;
    let max = match max {
        Some(max) => max,
        None => connector.max_backups()?,
    };
    match connector.rotate_backups(max)? {
        Some(key) => println!("✓ Backup written to {key}"),
        None => println!("No backup written"),
    }
    Ok(())
}
