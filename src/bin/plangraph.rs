//! Plangraph CLI: index plan folders and check them for conflicts.
//!
//! Usage:
//!   plangraph index <plans_dir> [--force] [--db path]
//!   plangraph stats [--db path]
//!   plangraph conflicts [--warning-days N] [--error-days N] [--overlap F] [--json]
//!   plangraph search <query> [--limit N]
//!   plangraph path <from> <to> [--depth N] [--max-paths N]

use clap::{Parser, Subcommand};
use plangraph::query::{DEFAULT_MAX_PATHS, MAX_PATH_DEPTH};
use plangraph::{
    extract_plan, ingest_batch, needs_ingest, prune_missing_sources, ConflictConfig,
    ConflictDetector, Entity, GraphStore, OpenStore, SqliteStore,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(
    name = "plangraph",
    version,
    about = "Planning knowledge graph engine"
)]
struct Cli {
    /// Path to SQLite database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract every plan folder under a directory into the graph
    Index {
        /// Directory containing NNNN-prefixed plan folders
        plans_dir: PathBuf,
        /// Re-ingest plans even when their files are unchanged
        #[arg(long)]
        force: bool,
    },
    /// Show entity and relationship counts
    Stats,
    /// Report workflow conflicts; exits 1 if any is an error
    Conflicts {
        /// Days before a WIP agent is reported as stale
        #[arg(long)]
        warning_days: Option<i64>,
        /// Days before a stale WIP agent becomes an error
        #[arg(long)]
        error_days: Option<i64>,
        /// Minimum similarity reported as feature overlap
        #[arg(long)]
        overlap: Option<f64>,
        /// Print reports as JSON
        #[arg(long)]
        json: bool,
    },
    /// Full-text search over entities
    Search {
        query: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// List dependency paths between two canonical IDs
    Path {
        /// Canonical ID of the start entity, e.g. plan:0042
        from: String,
        /// Canonical ID of the end entity
        to: String,
        #[arg(long, default_value_t = MAX_PATH_DEPTH)]
        depth: usize,
        #[arg(long, default_value_t = DEFAULT_MAX_PATHS)]
        max_paths: usize,
    },
}

/// Get the default database path (~/.local/share/plangraph/plangraph.db)
fn default_db_path() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    data_dir.join("plangraph").join("plangraph.db")
}

fn open_store(db: Option<PathBuf>) -> Result<SqliteStore, String> {
    let db_path = db.unwrap_or_else(default_db_path);
    SqliteStore::open(&db_path).map_err(|e| format!("Failed to open database: {}", e))
}

fn is_plan_folder(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.len() >= 4 && n.as_bytes()[..4].iter().all(u8::is_ascii_digit))
        .unwrap_or(false)
}

/// Plan folders directly under `root`, or `root` itself if it is one
fn plan_folders(root: &Path) -> Vec<PathBuf> {
    if is_plan_folder(root) {
        return vec![root.to_path_buf()];
    }
    WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir() && is_plan_folder(e.path()))
        .map(|e| e.into_path())
        .collect()
}

fn cmd_index(store: &SqliteStore, plans_dir: &Path, force: bool) -> i32 {
    let root = match plans_dir.canonicalize() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: cannot resolve '{}': {}", plans_dir.display(), e);
            return 1;
        }
    };

    let folders = plan_folders(&root);
    if folders.is_empty() {
        println!("No plan folders found in {}", root.display());
    }

    let mut batch = Vec::new();
    let mut unchanged = 0;
    for folder in folders {
        let result = extract_plan(&folder);
        for warning in &result.warnings {
            eprintln!("warning: {}", warning);
        }
        match needs_ingest(store, &result) {
            Ok(true) => batch.push(result),
            Ok(false) if force => batch.push(result),
            Ok(false) => unchanged += 1,
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        }
    }

    let summary = match ingest_batch(store, &batch) {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("Error: ingestion failed: {}", e);
            return 1;
        }
    };
    for warning in &summary.warnings {
        eprintln!("warning: {}", warning);
    }

    let pruned = match prune_missing_sources(store, &root) {
        Ok(n) => n,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    println!(
        "Indexed {} plan(s), {} unchanged: {} entities changed, {} removed; {} relationships changed, {} removed",
        batch.len(),
        unchanged,
        summary.entities_changed,
        summary.entities_removed + pruned,
        summary.relationships_changed,
        summary.relationships_removed
    );
    if summary.pending_edges > 0 {
        println!(
            "{} edge(s) wait for entities that are not indexed yet",
            summary.pending_edges
        );
    }
    0
}

fn cmd_stats(store: &SqliteStore) -> i32 {
    let stats = match store.stats() {
        Ok(stats) => stats,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    println!("{:<16}  {:>8}", "ENTITY TYPE", "COUNT");
    println!("{}", "-".repeat(26));
    for (entity_type, count) in &stats.entity_counts {
        println!("{:<16}  {:>8}", entity_type, count);
    }
    println!("{:<16}  {:>8}", "total", stats.total_entities);
    println!();
    println!("{:<16}  {:>8}", "RELATION TYPE", "COUNT");
    println!("{}", "-".repeat(26));
    for (relation_type, count) in &stats.relation_counts {
        println!("{:<16}  {:>8}", relation_type, count);
    }
    println!("{:<16}  {:>8}", "total", stats.total_relationships);
    println!();
    if stats.last_indexed.is_empty() {
        println!("Never indexed.");
    } else {
        println!("Last indexed: {}", stats.last_indexed);
    }
    0
}

fn cmd_conflicts(store: &SqliteStore, config: ConflictConfig, json: bool) -> i32 {
    let reports = match ConflictDetector::with_config(store, config).detect_all() {
        Ok(reports) => reports,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    if json {
        match serde_json::to_string_pretty(&reports) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        }
    } else if reports.is_empty() {
        println!("No conflicts found.");
    } else {
        for report in &reports {
            println!("{}", report);
            for entity in &report.entities {
                println!("    {}", entity);
            }
        }
    }

    if reports.iter().any(|r| r.is_error()) {
        1
    } else {
        0
    }
}

fn cmd_search(store: &SqliteStore, query: &str, limit: usize) -> i32 {
    match store.search_entities(query, limit) {
        Ok(results) if results.is_empty() => {
            println!("No matches.");
            0
        }
        Ok(results) => {
            println!("{:<28}  {:<8}  {}", "CANONICAL ID", "TYPE", "NAME");
            println!("{}", "-".repeat(72));
            for entity in results {
                println!(
                    "{:<28}  {:<8}  {}",
                    entity.canonical_id, entity.entity_type, entity.name
                );
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn find_entity(store: &SqliteStore, canonical_id: &str) -> Result<Entity, String> {
    match store.get_entity(canonical_id, None) {
        Ok(Some(entity)) => Ok(entity),
        Ok(None) => Err(format!("entity '{}' not found", canonical_id)),
        Err(e) => Err(e.to_string()),
    }
}

fn cmd_path(store: &SqliteStore, from: &str, to: &str, depth: usize, max_paths: usize) -> i32 {
    let (from, to) = match (find_entity(store, from), find_entity(store, to)) {
        (Ok(from), Ok(to)) => (from, to),
        (Err(e), _) | (_, Err(e)) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    match store.get_path(from.id, to.id, depth, max_paths) {
        Ok(Some(paths)) => {
            for path in paths {
                let ids: Vec<&str> = path.iter().map(|e| e.canonical_id.as_str()).collect();
                println!("{}", ids.join(" -> "));
            }
            0
        }
        Ok(None) => {
            println!("No path from {} to {} within depth {}", from.canonical_id, to.canonical_id, depth);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("plangraph=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = match open_store(cli.db) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let code = match cli.command {
        Commands::Index { plans_dir, force } => cmd_index(&store, &plans_dir, force),
        Commands::Stats => cmd_stats(&store),
        Commands::Conflicts {
            warning_days,
            error_days,
            overlap,
            json,
        } => {
            let defaults = ConflictConfig::default();
            let config = ConflictConfig {
                stale_warning_days: warning_days.unwrap_or(defaults.stale_warning_days),
                stale_error_days: error_days.unwrap_or(defaults.stale_error_days),
                overlap_threshold: overlap.unwrap_or(defaults.overlap_threshold),
            };
            cmd_conflicts(&store, config, json)
        }
        Commands::Search { query, limit } => cmd_search(&store, &query, limit),
        Commands::Path {
            from,
            to,
            depth,
            max_paths,
        } => cmd_path(&store, &from, &to, depth, max_paths),
    };
    std::process::exit(code);
}
