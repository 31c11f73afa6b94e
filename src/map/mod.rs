//! Room graph, room matching and pathfinding.
//!
//! [`MapDatabase`] owns a [`RoomGraph`] and the [`MapStorage`] it is loaded
//! from and saved to. [`RoomMatcher`] resolves the caller's current room
//! from live [`GamePort`] signals, and [`Pathfinder`] answers route and
//! nearest-room queries over a borrowed graph.

pub mod database;
pub mod errors;
pub mod evaluator;
pub mod graph;
pub mod heap;
pub mod matcher;
pub mod pathfinder;
pub mod policy;
pub mod port;
pub mod probe;
pub mod storage;
pub mod text;
pub mod types;

pub use database::{MapDatabase, MapSummary, Position};
pub use errors::MapError;
pub use evaluator::{ExpressionEvaluator, NoEvaluator, StaticEvaluator};
pub use graph::RoomGraph;
pub use heap::MinHeap;
pub use matcher::{MatchSettings, RoomMatcher};
pub use pathfinder::{Destination, Pathfinder, ShortestPaths};
pub use policy::{policy_for_game, DragonRealms, GameMatchingPolicy, GemStone};
pub use port::{GamePort, RoomSignals};
pub use probe::{PeerDirective, ProbeSettings};
pub use storage::{FileStore, LoadedMap, MapFormat, MapStorage, MemoryStore, SavedMap};
pub use types::*;
