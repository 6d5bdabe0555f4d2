//! # Drillstore CLI
//!
//! Operator tool over a snapshot directory. Every command opens the store from
//! `--data-dir`, runs, and saves the snapshot back when it changed anything.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use drillstore_core::{
    config::LogFormat, utils::format_bytes, Config, ContainerStatus, DataQuery, EtpUri,
    IndexRange, ObjectHeader, ReturnElements,
};
use drillstore_storage::codec::{rows_to_delimited, rows_to_json};
use drillstore_storage::{ChannelDataReader, LogDataStore};

#[derive(Parser)]
#[command(name = "drillstore")]
#[command(about = "Drillstore - chunked channel data store with growing-object tracking")]
#[command(version)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Snapshot directory
    #[arg(long, global = true, default_value = "drillstore-data")]
    data_dir: PathBuf,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a container (wellbore)
    InitContainer {
        #[arg(long)]
        uri: EtpUri,
        #[arg(long, default_value = "")]
        name: String,
    },
    /// Register a growing object (log, trajectory, ...)
    InitObject {
        #[arg(long)]
        uri: EtpUri,
        #[arg(long, default_value = "")]
        name: String,
    },
    /// Write rows read from a file or stdin
    Append {
        #[arg(long)]
        uri: EtpUri,
        /// Input file; stdin when omitted
        #[arg(long)]
        file: Option<PathBuf>,
        /// Input is a JSON array of rows instead of delimited lines
        #[arg(long)]
        json: bool,
        /// Leading index fields per delimited line
        #[arg(long, default_value_t = 1)]
        index_count: usize,
        /// Channel mnemonics, comma separated
        #[arg(long, value_delimiter = ',')]
        mnemonics: Vec<String>,
        /// Channel units, comma separated
        #[arg(long, value_delimiter = ',')]
        units: Vec<String>,
        /// Update semantics (merge with existing rows) instead of add
        #[arg(long)]
        update: bool,
    },
    /// Print rows in an index range
    Read {
        #[arg(long)]
        uri: EtpUri,
        /// Range start: a depth or an RFC 3339 time
        #[arg(long, value_parser = parse_bound)]
        start: Option<f64>,
        #[arg(long, value_parser = parse_bound)]
        end: Option<f64>,
        #[arg(long, value_delimiter = ',')]
        mnemonics: Vec<String>,
        /// Print a JSON array instead of delimited lines
        #[arg(long)]
        json: bool,
    },
    /// Delete rows in a range, or the whole object with --object
    Delete {
        #[arg(long)]
        uri: EtpUri,
        #[arg(long, value_parser = parse_bound)]
        start: Option<f64>,
        #[arg(long, value_parser = parse_bound)]
        end: Option<f64>,
        /// Only remove these channels
        #[arg(long, value_delimiter = ',')]
        mnemonics: Vec<String>,
        #[arg(long, conflicts_with_all = ["start", "end", "mnemonics"])]
        object: bool,
    },
    /// Set or clear the growing flag
    Growing {
        #[arg(long)]
        uri: EtpUri,
        #[arg(long, action = clap::ArgAction::Set)]
        value: bool,
    },
    /// Expire objects whose timeout has passed
    Sweep {
        /// Keep sweeping on the configured interval until Ctrl-C
        #[arg(long)]
        watch: bool,
    },
    /// Print the change history of an object, or of everything
    History {
        #[arg(long)]
        uri: Option<EtpUri>,
    },
    /// Print header, growing status and container activity
    Status {
        #[arg(long)]
        uri: EtpUri,
    },
}

/// Depth as a plain number, time as RFC 3339, both mapped to index keys
fn parse_bound(raw: &str) -> std::result::Result<f64, String> {
    if let Ok(depth) = raw.parse::<f64>() {
        return Ok(depth);
    }
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|t| t.timestamp_micros() as f64)
        .map_err(|_| format!("'{}' is neither a number nor an RFC 3339 time", raw))
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(Config::default()),
    }
}

fn init_logging(config: &Config, verbose: bool) {
    let level = if verbose { "debug" } else { config.logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    match config.logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display())),
        None => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text).context("reading stdin")?;
            Ok(text)
        }
    }
}

fn parse_rows(text: &str, json: bool, index_count: usize, mnemonics: &[String]) -> Result<ChannelDataReader> {
    let mnemonics = (!mnemonics.is_empty()).then_some(mnemonics);
    let reader = if json {
        ChannelDataReader::parse_json(text, mnemonics)?
    } else {
        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        ChannelDataReader::parse_delimited(&lines, index_count, mnemonics)?
    };
    Ok(reader)
}

/// Run one command against `store`; returns true if the snapshot must be saved
async fn execute(store: &LogDataStore, command: Commands) -> Result<bool> {
    match command {
        Commands::InitContainer { uri, name } => {
            let name = if name.is_empty() { uri.object_id().unwrap_or_default().to_string() } else { name };
            store.add_container(ContainerStatus::new(uri.clone(), name))?;
            println!("registered container {}", uri);
            Ok(true)
        }
        Commands::InitObject { uri, name } => {
            let name = if name.is_empty() { uri.object_id().unwrap_or_default().to_string() } else { name };
            if uri.parent().is_none() {
                bail!("{} has no container segment", uri);
            }
            store.add_object(ObjectHeader::new(uri.clone(), name))?;
            println!("registered {}", uri);
            Ok(true)
        }
        Commands::Append {
            uri,
            file,
            json,
            index_count,
            mnemonics,
            units,
            update,
        } => {
            let text = read_input(file.as_deref())?;
            let mut reader = parse_rows(&text, json, index_count, &mnemonics)?;
            if !units.is_empty() {
                reader = reader.with_units(units)?;
            }
            let summary = if update {
                store.update_data(&uri, reader)?
            } else {
                store.add_data(&uri, reader)?
            };
            println!(
                "{} rows: {} chunks inserted, {} replaced, {} unchanged",
                summary.rows, summary.chunks_inserted, summary.chunks_replaced, summary.chunks_unchanged
            );
            if summary.races > 0 {
                println!("warning: {} chunks were changed concurrently", summary.races);
            }
            Ok(true)
        }
        Commands::Read {
            uri,
            start,
            end,
            mnemonics,
            json,
        } => {
            let query = DataQuery {
                range: IndexRange::new(start, end),
                return_elements: ReturnElements::DataOnly,
                mnemonics,
            };
            let page = store.read_data(&uri, &query)?;
            if json {
                println!("{}", rows_to_json(&page.rows));
            } else {
                let columns: Vec<&str> = page
                    .index_mnemonics
                    .iter()
                    .chain(page.mnemonics.iter())
                    .map(String::as_str)
                    .collect();
                println!("# {}", columns.join(","));
                for line in rows_to_delimited(&page.rows) {
                    println!("{}", line);
                }
            }
            if page.truncated {
                eprintln!("output truncated to {} rows", page.rows.len());
            }
            Ok(false)
        }
        Commands::Delete {
            uri,
            start,
            end,
            mnemonics,
            object,
        } => {
            if object {
                store.delete_object(&uri)?;
                println!("deleted {}", uri);
            } else {
                let channels = (!mnemonics.is_empty()).then_some(mnemonics.as_slice());
                let summary = store.delete_data(&uri, IndexRange::new(start, end), channels)?;
                println!(
                    "{} rows removed: {} chunks deleted, {} updated",
                    summary.rows_removed, summary.chunks_deleted, summary.chunks_updated
                );
            }
            Ok(true)
        }
        Commands::Growing { uri, value } => {
            let changed = store.update_object_growing(&uri, value)?;
            println!("{} growing={} ({})", uri, value, if changed { "changed" } else { "unchanged" });
            Ok(changed)
        }
        Commands::Sweep { watch: false } => {
            let report = store.sweep_once()?;
            println!(
                "{} containers touched, {} deactivated",
                report.containers.len(),
                report.containers_deactivated
            );
            Ok(!report.containers.is_empty())
        }
        Commands::Sweep { watch: true } => {
            let handle = Arc::new(store.sweeper()).start();
            info!(
                interval_secs = store.config().growing.sweep_interval().as_secs(),
                "Sweeping until Ctrl-C"
            );
            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
            handle.shutdown().await;
            Ok(true)
        }
        Commands::History { uri } => {
            let entries = match uri {
                Some(uri) => store.history().entries_for(&uri)?,
                None => store.history().all()?,
            };
            for entry in entries {
                let growing = entry.object_growing_state.map(|g| format!(" growing={}", g)).unwrap_or_default();
                println!(
                    "{} {} {} {}{}",
                    entry.timestamp.to_rfc3339(),
                    entry.change_type,
                    entry.uri,
                    entry.change_info,
                    growing
                );
            }
            Ok(false)
        }
        Commands::Status { uri } => {
            let header = store
                .growing()
                .get_header(&uri)?
                .with_context(|| format!("{} is not registered", uri))?;
            let status = store.object_status(&uri)?;
            let container = match &header.container_uri {
                Some(container_uri) => store.container_status(container_uri)?,
                None => None,
            };
            let chunks = store.chunk_store().get_chunks(&uri)?;
            let report = serde_json::json!({
                "header": header,
                "status": status,
                "container": container,
                "chunks": chunks.len(),
                "rows": chunks.iter().map(|c| c.record_count).sum::<usize>(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(false)
        }
    }
}

async fn run(cli: Cli, config: Config) -> Result<()> {
    let store = LogDataStore::open(config, &cli.data_dir)
        .with_context(|| format!("opening {}", cli.data_dir.display()))?;

    if execute(&store, cli.command).await? {
        let manifest = store
            .save(&cli.data_dir)
            .with_context(|| format!("saving {}", cli.data_dir.display()))?;
        let size: u64 = manifest.collections.iter().map(|c| c.size).sum();
        info!(
            dir = %cli.data_dir.display(),
            size = %format_bytes(size),
            "Snapshot written"
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_logging(&config, cli.verbose);
    run(cli, config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn run_args(dir: &Path, args: &[&str]) -> Result<()> {
        let mut argv = vec!["drillstore", "--data-dir", dir.to_str().unwrap()];
        argv.extend_from_slice(args);
        run(Cli::try_parse_from(argv).unwrap(), Config::default()).await
    }

    const LOG: &str = "eml://witsml14/well(w1)/wellbore(b1)/log(l1)";

    #[test]
    fn test_parse_bound() {
        assert_eq!(parse_bound("1500.5").unwrap(), 1500.5);
        assert_eq!(parse_bound("1970-01-01T00:00:01Z").unwrap(), 1_000_000.0);
        assert!(parse_bound("yesterday").is_err());
    }

    #[test]
    fn test_delete_object_conflicts_with_range() {
        let args = ["drillstore", "delete", "--uri", LOG, "--object", "--start", "1"];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_parse_rows_skips_blank_lines() {
        let reader = parse_rows("1,10\n\n2,20\n", false, 1, &["GR".to_string()]).unwrap();
        assert_eq!(reader.row_count(), 2);
        assert_eq!(reader.mnemonics(), ["GR".to_string()]);
    }

    #[tokio::test]
    async fn test_commands_persist_between_runs() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("rows.csv");
        std::fs::write(&input, "100,1\n200,2\n1500,3\n").unwrap();
        let data = dir.path().join("data");

        run_args(&data, &["init-object", "--uri", LOG]).await.unwrap();
        run_args(
            &data,
            &["append", "--uri", LOG, "--file", input.to_str().unwrap(), "--mnemonics", "GR"],
        )
        .await
        .unwrap();
        run_args(&data, &["delete", "--uri", LOG, "--start", "1500"]).await.unwrap();

        let store = LogDataStore::open(Config::default(), &data).unwrap();
        let uri = EtpUri::parse(LOG).unwrap();
        let page = store.read_data(&uri, &DataQuery::default()).unwrap();
        assert_eq!(rows_to_delimited(&page.rows), vec!["100,1", "200,2"]);
        assert!(store.object_status(&uri).unwrap().unwrap().is_growing);
        assert_eq!(store.history().entries_for(&uri).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_append_to_unknown_object_fails() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("rows.csv");
        std::fs::write(&input, "1,1\n").unwrap();

        let result = run_args(dir.path(), &["append", "--uri", LOG, "--file", input.to_str().unwrap()]).await;
        assert!(result.is_err());
    }
}
