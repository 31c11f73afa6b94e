//! The room graph together with its storage backend and the caller's position.
//!
//! A [`MapDatabase`] loads lazily: the first access that needs rooms runs the
//! storage backend's load under a mutex, so concurrent first readers block
//! until one of them has finished. A failed load leaves the database
//! unloaded and the next access tries again.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, error, info, warn};

use crate::map::errors::MapError;
use crate::map::graph::RoomGraph;
use crate::map::storage::{MapFormat, MapStorage, MemoryStore, SavedMap};
use crate::map::types::{Room, RoomId};

/// Where the caller was last resolved to, and at which transition counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Position {
    pub current: Option<RoomId>,
    pub previous: Option<RoomId>,
    /// Transition counter at which `current` was resolved.
    pub current_count: Option<u64>,
    /// Last passive resolution; `None` with a count means "tried, nothing".
    pub fuzzy: Option<RoomId>,
    pub fuzzy_count: Option<u64>,
}

/// Summary of what is loaded, for diagnostics and the CLI.
#[derive(Debug, Clone, PartialEq)]
pub struct MapSummary {
    pub source: Option<PathBuf>,
    pub format: Option<MapFormat>,
    pub rooms: usize,
    pub max_id: Option<RoomId>,
    pub tags: usize,
    pub uids: usize,
}

pub struct MapDatabase {
    storage: Box<dyn MapStorage>,
    graph: RwLock<RoomGraph>,
    loaded: AtomicBool,
    load_lock: Mutex<()>,
    position: Mutex<Position>,
    source: Mutex<Option<(Option<PathBuf>, MapFormat)>>,
}

impl std::fmt::Debug for MapDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapDatabase")
            .field("storage", &self.storage.describe())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MapDatabase {
    /// An unloaded database over `storage`.
    pub fn new(storage: impl MapStorage + 'static) -> Self {
        Self::from_boxed(Box::new(storage))
    }

    pub fn from_boxed(storage: Box<dyn MapStorage>) -> Self {
        Self {
            storage,
            graph: RwLock::new(RoomGraph::new()),
            loaded: AtomicBool::new(false),
            load_lock: Mutex::new(()),
            position: Mutex::new(Position::default()),
            source: Mutex::new(None),
        }
    }

    /// A database that starts out loaded with `graph`, saving into memory.
    pub fn with_graph(graph: RoomGraph) -> Self {
        Self::preloaded(MemoryStore::new(), graph)
    }

    /// A database over `storage` that starts out loaded with `graph`
    /// instead of reading from the backend.
    pub fn preloaded(storage: impl MapStorage + 'static, graph: RoomGraph) -> Self {
        let db = Self::new(storage);
        *db.graph.write().unwrap_or_else(PoisonError::into_inner) = graph;
        *lock(&db.source) = Some((None, MapFormat::Memory));
        db.loaded.store(true, Ordering::Release);
        db
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Load from storage unless already loaded. Returns the room count.
    pub fn load(&self) -> Result<usize, MapError> {
        let _guard = lock(&self.load_lock);
        if self.is_loaded() {
            return Ok(self.read_graph().len());
        }
        let loaded = self.storage.load()?;
        let graph = RoomGraph::from_rooms(loaded.rooms);
        let count = graph.len();
        info!(
            "Map loaded from {}: {} rooms, {} uids",
            loaded
                .source
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| self.storage.describe()),
            count,
            graph.uid_count()
        );
        *self.graph.write().unwrap_or_else(PoisonError::into_inner) = graph;
        *lock(&self.source) = Some((loaded.source, loaded.format));
        self.loaded.store(true, Ordering::Release);
        Ok(count)
    }

    /// Load on first use. Failures are logged and leave the graph empty.
    pub fn ensure_loaded(&self) -> bool {
        if self.is_loaded() {
            return true;
        }
        match self.load() {
            Ok(_) => true,
            Err(e) => {
                warn!("map not loaded from {}: {}", self.storage.describe(), e);
                false
            }
        }
    }

    fn read_graph(&self) -> RwLockReadGuard<'_, RoomGraph> {
        self.graph.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Shared access to the graph, loading it first if needed.
    pub fn read(&self) -> RwLockReadGuard<'_, RoomGraph> {
        self.ensure_loaded();
        self.read_graph()
    }

    /// Exclusive access to the graph, loading it first if needed.
    pub fn write(&self) -> RwLockWriteGuard<'_, RoomGraph> {
        self.ensure_loaded();
        self.graph.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, id: RoomId) -> Option<Room> {
        self.read().get(id).cloned()
    }

    pub fn lookup(&self, query: &str) -> Option<Room> {
        self.read().lookup(query).cloned()
    }

    pub fn tags(&self) -> BTreeSet<String> {
        self.read().tags().clone()
    }

    /// File the rooms were loaded from, if any.
    pub fn source(&self) -> Option<PathBuf> {
        lock(&self.source).as_ref().and_then(|(path, _)| path.clone())
    }

    pub fn summary(&self) -> MapSummary {
        let graph = self.read();
        let source = lock(&self.source).clone();
        MapSummary {
            format: source.as_ref().map(|(_, format)| *format),
            source: source.and_then(|(path, _)| path),
            rooms: graph.len(),
            max_id: graph.max_id(),
            tags: graph.tags().len(),
            uids: graph.uid_count(),
        }
    }

    /// Save to the backend's default location.
    pub fn save(&self) -> Result<SavedMap, MapError> {
        self.save_inner(None)
    }

    pub fn save_to(&self, path: &Path) -> Result<SavedMap, MapError> {
        self.save_inner(Some(path))
    }

    fn save_inner(&self, target: Option<&Path>) -> Result<SavedMap, MapError> {
        let rooms = self.read().to_rooms();
        let saved = self.storage.save(&rooms, target)?;
        let expected = rooms.last().map(|r| r.id);
        if let Err(e) = self.verify_save(&saved, expected) {
            error!("{}; reloading map from storage", e);
            let position = self.position();
            self.reload()?;
            *lock(&self.position) = position;
        }
        Ok(saved)
    }

    /// Re-read the written file and check its final record still resolves
    /// to the same room in memory.
    fn verify_save(&self, saved: &SavedMap, expected: Option<RoomId>) -> Result<(), MapError> {
        let last = match self.storage.last_saved_id(saved) {
            Ok(last) => last,
            Err(e) => {
                warn!("could not re-read saved map: {}", e);
                return Err(MapError::IndexCorruption {
                    id: expected.unwrap_or_default(),
                });
            }
        };
        if last != expected {
            return Err(MapError::IndexCorruption {
                id: last.or(expected).unwrap_or_default(),
            });
        }
        if let Some(id) = last {
            let found = self.read_graph().get(id).map(|r| r.id);
            if found != Some(id) {
                return Err(MapError::IndexCorruption { id });
            }
        }
        debug!("save verified ({} rooms)", saved.rooms);
        Ok(())
    }

    /// Drop all rooms and position state; the next access reloads.
    pub fn clear(&self) {
        let _guard = lock(&self.load_lock);
        self.graph
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        *lock(&self.position) = Position::default();
        *lock(&self.source) = None;
        self.loaded.store(false, Ordering::Release);
    }

    pub fn reload(&self) -> Result<usize, MapError> {
        self.clear();
        self.load()
    }

    pub fn position(&self) -> Position {
        *lock(&self.position)
    }

    /// Record a foreground resolution. `previous` moves only when the room changes.
    pub fn set_current(&self, id: RoomId, count: u64) {
        let mut pos = lock(&self.position);
        if pos.current != Some(id) {
            pos.previous = pos.current;
        }
        pos.current = Some(id);
        pos.current_count = Some(count);
    }

    pub fn set_fuzzy(&self, id: Option<RoomId>, count: u64) {
        let mut pos = lock(&self.position);
        pos.fuzzy = id;
        pos.fuzzy_count = Some(count);
    }

    pub fn current_room(&self) -> Option<Room> {
        let id = self.position().current?;
        self.get(id)
    }

    pub fn previous_room(&self) -> Option<Room> {
        let id = self.position().previous?;
        self.get(id)
    }
}
