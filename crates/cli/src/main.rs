//! filecache command-line entry point.
//!
//! Inspects and maintains a cache directory. Logging goes to stderr so
//! payloads written to stdout stay clean.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use filecache_core::{CacheStore, StoreConfig};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "filecache", version, about = "Inspect and maintain a filecache directory")]
struct Cli {
    /// Cache root directory (overrides FILECACHE_ROOT_PATH).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Ownership prefix (overrides FILECACHE_KEY_PREFIX).
    #[arg(long, global = true)]
    prefix: Option<String>,

    /// Size budget in bytes; negative disables eviction.
    #[arg(long, global = true, allow_negative_numbers = true)]
    limit: Option<i64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Store a file's contents under KEY.
    Put {
        key: String,
        file: PathBuf,
        #[arg(short, long)]
        namespace: Option<String>,
    },
    /// Write an entry's payload to stdout or a file.
    Get {
        key: String,
        #[arg(short, long)]
        namespace: Option<String>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show path, size and age of an entry.
    Stat {
        key: String,
        #[arg(short, long)]
        namespace: Option<String>,
    },
    /// List entries in the root or a namespace.
    Ls {
        #[arg(short, long)]
        namespace: Option<String>,
    },
    /// Print the total size of owned files in bytes.
    Size,
    /// Run an eviction pass against the size budget.
    Evict,
    /// Delete one entry.
    Rm {
        key: String,
        #[arg(short, long)]
        namespace: Option<String>,
    },
    /// Delete a namespace and its entries.
    RmNs { namespace: String },
    /// Delete every owned entry.
    Clear,
    /// Print the content-addressed key for INPUT.
    Hash { input: String },
}

#[derive(Debug, Serialize)]
struct EntryStat {
    path: PathBuf,
    exists: bool,
    bytes: Option<u64>,
    modified_at: Option<String>,
    age_secs: Option<i64>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let store = open_store(&cli)?;
    run(&store, cli.command)
}

fn open_store(cli: &Cli) -> Result<CacheStore> {
    let mut config = StoreConfig::load().context("failed to load configuration")?;
    if let Some(root) = &cli.root {
        config.root_path = root.clone();
    }
    if let Some(prefix) = &cli.prefix {
        config.key_prefix = prefix.clone();
    }
    if let Some(limit) = cli.limit {
        config.size_limit_bytes = Some(limit);
    }

    tracing::debug!(root = %config.root_path.display(), prefix = %config.key_prefix, "opening cache");
    Ok(CacheStore::new(config)?)
}

fn run(store: &CacheStore, command: Command) -> Result<()> {
    match command {
        Command::Put { key, file, namespace } => {
            let payload = std::fs::read(&file).with_context(|| format!("failed to read {}", file.display()))?;
            store.put(namespace.as_deref(), &key, &payload)?;
            println!("{}", store.path_for(namespace.as_deref(), &key).display());
        }
        Command::Get { key, namespace, output } => {
            let payload = store.get(namespace.as_deref(), &key)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &payload).with_context(|| format!("failed to write {}", path.display()))?
                }
                None => std::io::stdout().write_all(&payload)?,
            }
        }
        Command::Stat { key, namespace } => {
            let ns = namespace.as_deref();
            let path = store.path_for(ns, &key);
            let stat = EntryStat {
                bytes: std::fs::metadata(&path).ok().map(|meta| meta.len()),
                exists: store.exists(ns, &key),
                modified_at: store.modified_at(ns, &key).map(|at| at.to_rfc3339()),
                age_secs: store.age(ns, &key).map(|age| age.num_seconds()),
                path,
            };
            println!("{}", serde_json::to_string_pretty(&stat)?);
        }
        Command::Ls { namespace } => {
            for path in store.list(namespace.as_deref()) {
                println!("{}", path.display());
            }
        }
        Command::Size => println!("{}", store.total_size()),
        Command::Evict => match store.enforce_limit() {
            Some(report) => {
                tracing::info!(evicted = report.evicted.len(), total = report.total_after, "eviction finished");
                for path in &report.evicted {
                    println!("{}", path.display());
                }
            }
            None => tracing::info!("no size limit configured; nothing to evict"),
        },
        Command::Rm { key, namespace } => {
            if !store.delete(namespace.as_deref(), &key) {
                anyhow::bail!("no entry named {key}");
            }
        }
        Command::RmNs { namespace } => {
            if !store.delete_namespace(&namespace) {
                anyhow::bail!("namespace {namespace} was not fully removed");
            }
        }
        Command::Clear => {
            let removed = store.clear();
            tracing::info!(removed, "cache cleared");
        }
        Command::Hash { input } => println!("{}", store.hash(&input)),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> CacheStore {
        CacheStore::open(dir.path()).unwrap()
    }

    #[test]
    fn test_cli_parses_namespaced_put() {
        let cli = Cli::parse_from(["filecache", "--root", "/tmp/c", "put", "logo", "logo.png", "-n", "images"]);
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/c")));
        assert!(matches!(
            cli.command,
            Command::Put { ref key, ref namespace, .. } if key == "logo" && namespace.as_deref() == Some("images")
        ));
    }

    #[test]
    fn test_cli_accepts_negative_limit() {
        let cli = Cli::parse_from(["filecache", "--limit", "-1", "evict"]);
        assert_eq!(cli.limit, Some(-1));
        assert!(matches!(cli.command, Command::Evict));
    }

    #[test]
    fn test_run_put_then_rm() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let source = dir.path().join("source.bin");
        std::fs::write(&source, b"payload").unwrap();

        run(&store, Command::Put { key: "k".into(), file: source, namespace: None }).unwrap();
        assert_eq!(store.get(None, "k").unwrap(), b"payload");

        run(&store, Command::Rm { key: "k".into(), namespace: None }).unwrap();
        assert!(!store.exists(None, "k"));
        assert!(run(&store, Command::Rm { key: "k".into(), namespace: None }).is_err());
    }

    #[test]
    fn test_run_get_to_file() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.put(Some("ns"), "k", b"hello").unwrap();
        let out = dir.path().join("out.bin");

        run(&store, Command::Get { key: "k".into(), namespace: Some("ns".into()), output: Some(out.clone()) })
            .unwrap();

        assert_eq!(std::fs::read(out).unwrap(), b"hello");
    }

    #[test]
    fn test_run_get_missing_fails() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(run(&store, Command::Get { key: "nope".into(), namespace: None, output: None }).is_err());
    }
}
