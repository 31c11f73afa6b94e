//! # mapdb - room graph and pathfinding for text game clients
//!
//! mapdb keeps a persistent graph of game-world rooms, works out which room
//! the player is standing in from ambiguous live signals, and computes
//! shortest routes between rooms.
//!
//! ## Features
//!
//! - **Room graph**: sparse id-keyed rooms with a server UID index and tag queries.
//! - **Persistence**: current JSON maps plus read support for legacy XML and binary snapshots,
//!   newest-file discovery, `.bak` backups and atomic locked writes.
//! - **Room matching**: UID, exact and fuzzy text matching, with `peer` and `location`
//!   probes issued through a host-supplied [`map::GamePort`].
//! - **Pathfinding**: Dijkstra over `timeto` costs, deferred costs resolved by a
//!   host-supplied [`map::ExpressionEvaluator`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mapdb::config::Config;
//! use mapdb::map::{MapDatabase, NoEvaluator, Pathfinder};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let db = MapDatabase::new(config.file_store());
//!     db.load()?;
//!
//!     let graph = db.read();
//!     let finder = Pathfinder::new(&graph, &NoEvaluator);
//!     if let Some(path) = finder.path_to(1, 228) {
//!         // estimate_time and commands_for walk from the starting room
//!         let mut walk = vec![1];
//!         walk.extend(&path);
//!         println!("{:?} in {:.1}s", path, finder.estimate_time(&walk));
//!         println!("{:?}", finder.commands_for(&walk));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`map`] - graph, storage, matching and pathfinding
//! - [`config`] - TOML configuration
//! - [`logutil`] - helpers for logging live game text

pub mod config;
pub mod logutil;
pub mod map;
