//! Binary entrypoint for the mapdb CLI.
//!
//! Commands:
//! - `init` - write a starter `config.toml` and create the per-game map directory
//! - `info` - load the newest map and print a summary
//! - `show <query>` - print the room matching an id, `u<uid>` or text
//! - `path <from> <to>` - shortest route between two rooms with its commands and estimated time
//! - `nearest <from> <tag> [--all]` - closest room(s) carrying a tag
//! - `convert [--output <file>]` - load any format and save it as current JSON
//!
//! See the library crate docs for module-level details: `mapdb::`.
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};

use mapdb::config::Config;
use mapdb::map::{MapDatabase, NoEvaluator, Pathfinder, RoomId};

#[derive(Parser)]
#[command(name = "mapdb")]
#[command(about = "Room graph and pathfinding tools for text game maps")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Load this map file instead of the newest one in the data directory
    #[arg(short, long, global = true)]
    file: Option<PathBuf>,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init,
    /// Summarise the loaded map
    Info,
    /// Show one room by id, u<uid> or text
    Show { query: String },
    /// Shortest path between two rooms
    Path { from: String, to: String },
    /// Nearest room with a tag
    Nearest {
        from: String,
        tag: String,
        /// List every reachable tagged room, nearest first
        #[arg(long)]
        all: bool,
    },
    /// Re-save the loaded map in the current JSON format
    Convert {
        /// Output file (defaults to a new map-<epoch>.json in the data directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        init_logging(&None, cli.verbose);
        if std::path::Path::new(&cli.config).exists() {
            return Err(anyhow!("{} already exists; not overwriting", cli.config));
        }
        Config::create_default(&cli.config).await?;
        let config = Config::load(&cli.config).await?;
        std::fs::create_dir_all(config.map_dir())?;
        println!("Wrote {}", cli.config);
        println!("Map files go in {}", config.map_dir().display());
        return Ok(());
    }

    let config = match Config::load(&cli.config).await {
        Ok(config) => {
            init_logging(&Some(config.clone()), cli.verbose);
            config
        }
        Err(e) => {
            init_logging(&None, cli.verbose);
            warn!("{}; using built-in defaults", e);
            Config::default()
        }
    };

    let mut store = config.file_store();
    if let Some(file) = &cli.file {
        store = store.with_file(file);
    }
    let db = MapDatabase::new(store);
    db.load()?;

    match cli.command {
        // Handled before any map is loaded.
        Commands::Init => {}
        Commands::Info => {
            let summary = db.summary();
            let source = summary
                .source
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("file:   {}", source);
            println!("format: {:?}", summary.format);
            println!("rooms:  {} (max id {:?})", summary.rooms, summary.max_id);
            println!("tags:   {}", summary.tags);
            println!("uids:   {}", summary.uids);
        }
        Commands::Show { query } => {
            let room = db
                .lookup(&query)
                .ok_or_else(|| anyhow!("No room matches '{}'", query))?;
            println!("{}", room);
            if !room.tags.is_empty() {
                println!("tags: {}", room.tags.join(", "));
            }
        }
        Commands::Path { from, to } => {
            let from = resolve(&db, &from)?;
            let to = resolve(&db, &to)?;
            let graph = db.read();
            let finder = pathfinder(&graph, &config);
            match finder.path_to(from, to) {
                Some(path) => {
                    let mut walk = vec![from];
                    walk.extend(&path);
                    let ids: Vec<String> = path.iter().map(RoomId::to_string).collect();
                    println!("{} -> {}: [{}]", from, to, ids.join(", "));
                    println!("estimated time: {:.1}s", finder.estimate_time(&walk));
                    match finder.commands_for(&walk) {
                        Some(commands) => println!("commands: {}", commands.join("; ")),
                        None => println!("commands: (some steps need a script evaluator)"),
                    }
                }
                None => println!("No path from {} to {}", from, to),
            }
        }
        Commands::Nearest { from, tag, all } => {
            let from = resolve(&db, &from)?;
            let graph = db.read();
            let finder = pathfinder(&graph, &config);
            if all {
                let found = finder.find_all_nearest_by_tag(from, &tag);
                if found.is_empty() {
                    println!("No reachable room tagged '{}'", tag);
                }
                for id in found {
                    println!("{}", id);
                }
            } else {
                match finder.find_nearest_by_tag(from, &tag) {
                    Some(id) => println!("{}", id),
                    None => println!("No reachable room tagged '{}'", tag),
                }
            }
        }
        Commands::Convert { output } => {
            let saved = match output {
                Some(path) => db.save_to(&path)?,
                None => db.save()?,
            };
            let path = saved
                .path
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            info!("Converted {} rooms", saved.rooms);
            println!("Saved {} rooms to {}", saved.rooms, path);
        }
    }

    Ok(())
}

fn resolve(db: &MapDatabase, query: &str) -> Result<RoomId> {
    db.lookup(query)
        .map(|r| r.id)
        .ok_or_else(|| anyhow!("No room matches '{}'", query))
}

fn pathfinder<'a>(graph: &'a mapdb::map::RoomGraph, config: &Config) -> Pathfinder<'a> {
    Pathfinder::new(graph, &NoEvaluator)
        .with_nearest_cutoff(config.pathfinding.nearest_cutoff)
        .with_missing_edge_cost(config.pathfinding.missing_edge_cost)
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity sets the floor; the config may ask for more
    let mut level = match verbosity {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    if let Some(cfg) = config {
        if let Ok(configured) = cfg.logging.level.parse::<log::LevelFilter>() {
            level = level.max(configured);
        }
    }
    builder.filter_level(level);

    let log_file = config
        .as_ref()
        .and_then(|cfg| cfg.logging.file.as_ref())
        .and_then(|file| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .ok()
        });
    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Echo to the console only when someone is watching it
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}
