//! Map persistence: discovery, the three on-disk formats, and saving.
//!
//! Files live in a per-game data directory and are named
//! `map-<unix epoch>.<ext>`:
//!
//! - `.json` - current format, the only one ever written
//! - `.xml`  - legacy, read only, deprecated
//! - `.dat`  - legacy binary snapshot, read only, deprecated
//!
//! Without an explicit file, candidates are tried newest epoch first (JSON
//! before XML before snapshot within one epoch). A candidate that fails to
//! parse is logged and skipped.

pub mod json;
pub mod snapshot;
pub mod xml;

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use fs2::FileExt;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::RegexBuilder;

use crate::map::errors::MapError;
use crate::map::types::{Room, RoomId};

/// Upper bound for a single map file read.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 256 * 1024 * 1024;

static MAP_FILE: Lazy<regex::Regex> = Lazy::new(|| {
    RegexBuilder::new(r"^map-([0-9]+)\.(json|xml|dat)$")
        .case_insensitive(true)
        .build()
        .expect("static regex")
});

/// On-disk encoding of a map file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MapFormat {
    Json,
    Xml,
    Snapshot,
    /// Held in memory only.
    Memory,
}

impl MapFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(MapFormat::Json),
            "xml" => Some(MapFormat::Xml),
            "dat" => Some(MapFormat::Snapshot),
            _ => None,
        }
    }

    /// Legacy formats are read but never written.
    pub fn is_deprecated(self) -> bool {
        matches!(self, MapFormat::Xml | MapFormat::Snapshot)
    }

    pub fn label(self) -> &'static str {
        match self {
            MapFormat::Json => "JSON",
            MapFormat::Xml => "XML",
            MapFormat::Snapshot => "binary snapshot",
            MapFormat::Memory => "in-memory",
        }
    }
}

/// Rooms read from a backend, with where they came from.
#[derive(Debug)]
pub struct LoadedMap {
    pub rooms: Vec<Room>,
    pub source: Option<PathBuf>,
    pub format: MapFormat,
}

/// Result of a save.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedMap {
    pub path: Option<PathBuf>,
    pub backup: Option<PathBuf>,
    pub rooms: usize,
}

/// Pluggable persistence for a [`MapDatabase`](crate::map::MapDatabase).
pub trait MapStorage: Send + Sync {
    fn load(&self) -> Result<LoadedMap, MapError>;

    /// Persist `rooms` in the current format, to `target` when given.
    fn save(&self, rooms: &[Room], target: Option<&Path>) -> Result<SavedMap, MapError>;

    /// Read back a save and report the id of its final record.
    fn last_saved_id(&self, saved: &SavedMap) -> Result<Option<RoomId>, MapError>;

    fn describe(&self) -> String;
}

/// A candidate found during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapFile {
    pub path: PathBuf,
    pub epoch: u64,
    pub format: MapFormat,
}

/// File-backed storage rooted at one per-game data directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    file: Option<PathBuf>,
    max_file_bytes: u64,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            file: None,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }

    /// Load exactly this file instead of discovering one.
    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_max_file_bytes(mut self, limit: u64) -> Self {
        self.max_file_bytes = limit;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Map files in the data directory, in the order they should be tried.
    pub fn discover(&self) -> Result<Vec<MapFile>, MapError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(caps) = MAP_FILE.captures(name) else {
                continue;
            };
            let Ok(epoch) = caps[1].parse::<u64>() else {
                continue;
            };
            let path = entry.path();
            if let Some(format) = MapFormat::from_path(&path) {
                files.push(MapFile {
                    path,
                    epoch,
                    format,
                });
            }
        }
        files.sort_by(|a, b| b.epoch.cmp(&a.epoch).then(a.format.cmp(&b.format)));
        Ok(files)
    }

    /// Path a save without an explicit target writes to.
    pub fn default_save_path(&self) -> PathBuf {
        self.dir.join(format!("map-{}.json", Utc::now().timestamp()))
    }

    fn read_bounded(&self, path: &Path) -> Result<Vec<u8>, MapError> {
        let size = fs::metadata(path)?.len();
        if size > self.max_file_bytes {
            return Err(MapError::FileTooLarge {
                path: path.to_path_buf(),
                limit: self.max_file_bytes,
            });
        }
        Ok(fs::read(path)?)
    }

    /// Parse one file according to its extension.
    pub fn load_file(&self, path: &Path) -> Result<Vec<Room>, MapError> {
        let format = MapFormat::from_path(path)
            .ok_or_else(|| MapError::load_failed(path, "unrecognised map file extension"))?;
        let bytes = self.read_bounded(path)?;
        if format.is_deprecated() {
            warn!(
                "{} uses the deprecated {} map format; save to convert it to JSON",
                path.display(),
                format.label()
            );
        }
        let rooms = match format {
            MapFormat::Json => {
                let text = String::from_utf8(bytes).map_err(|e| MapError::load_failed(path, e))?;
                json::decode(&text)?
            }
            MapFormat::Xml => {
                let text = String::from_utf8(bytes).map_err(|e| MapError::load_failed(path, e))?;
                xml::decode(&text)?
            }
            MapFormat::Snapshot => snapshot::decode(&bytes)?,
            MapFormat::Memory => {
                return Err(MapError::load_failed(path, "not a file format"));
            }
        };
        Ok(rooms)
    }
}

impl MapStorage for FileStore {
    fn load(&self) -> Result<LoadedMap, MapError> {
        let candidates = match &self.file {
            Some(path) => {
                let format = MapFormat::from_path(path)
                    .ok_or_else(|| MapError::load_failed(path, "unrecognised map file extension"))?;
                if !path.exists() {
                    return Err(MapError::NoDatabaseFound { dir: path.clone() });
                }
                vec![MapFile {
                    path: path.clone(),
                    epoch: 0,
                    format,
                }]
            }
            None => self.discover()?,
        };
        if candidates.is_empty() {
            return Err(MapError::NoDatabaseFound {
                dir: self.dir.clone(),
            });
        }

        let mut last_error = None;
        for candidate in candidates {
            debug!("trying map file {}", candidate.path.display());
            match self.load_file(&candidate.path) {
                Ok(rooms) => {
                    info!(
                        "Loaded {} rooms from {}",
                        rooms.len(),
                        candidate.path.display()
                    );
                    return Ok(LoadedMap {
                        rooms,
                        source: Some(candidate.path),
                        format: candidate.format,
                    });
                }
                Err(e) => {
                    warn!("Failed to load {}: {}", candidate.path.display(), e);
                    last_error = Some(MapError::load_failed(&candidate.path, e));
                }
            }
        }
        Err(last_error.unwrap_or(MapError::NoDatabaseFound {
            dir: self.dir.clone(),
        }))
    }

    fn save(&self, rooms: &[Room], target: Option<&Path>) -> Result<SavedMap, MapError> {
        let path = target
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.default_save_path());
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let backup = if path.exists() {
            let mut name = path.as_os_str().to_os_string();
            name.push(".bak");
            let backup = PathBuf::from(name);
            info!("{} exists, backing it up to {}", path.display(), backup.display());
            fs::copy(&path, &backup)?;
            Some(backup)
        } else {
            None
        };
        let content = json::encode(rooms)?;
        write_file_locked(&path, content.as_bytes())?;
        info!("Saved {} rooms to {}", rooms.len(), path.display());
        Ok(SavedMap {
            path: Some(path),
            backup,
            rooms: rooms.len(),
        })
    }

    fn last_saved_id(&self, saved: &SavedMap) -> Result<Option<RoomId>, MapError> {
        let Some(path) = &saved.path else {
            return Ok(None);
        };
        let bytes = self.read_bounded(path)?;
        let text = String::from_utf8(bytes).map_err(|e| MapError::load_failed(path, e))?;
        json::last_id(&text)
    }

    fn describe(&self) -> String {
        match &self.file {
            Some(file) => file.display().to_string(),
            None => self.dir.display().to_string(),
        }
    }
}

/// Write `content` to `path` under an exclusive lock via a temp file and rename.
fn write_file_locked(path: &Path, content: &[u8]) -> Result<(), MapError> {
    let lock_file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)?;
    lock_file.lock_exclusive()?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let base = path.file_name().and_then(|s| s.to_str()).unwrap_or("map.json");
    let mut counter = 0u32;
    let tmp_path = loop {
        let candidate = dir.join(format!(".{}.tmp-{}-{}", base, std::process::id(), counter));
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(mut tmp) => {
                tmp.write_all(content)?;
                tmp.flush()?;
                let _ = tmp.sync_all();
                break candidate;
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                counter = counter.saturating_add(1);
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    };

    fs::rename(&tmp_path, path)?;
    if let Ok(dir_file) = File::open(dir) {
        let _ = dir_file.sync_all();
    }
    drop(lock_file);
    Ok(())
}

/// In-memory backend for tests and embedders that manage files themselves.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rooms: Mutex<Option<Vec<Room>>>,
}

impl MemoryStore {
    /// A store with nothing saved; loading reports no database.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rooms(rooms: Vec<Room>) -> Self {
        Self {
            rooms: Mutex::new(Some(rooms)),
        }
    }

    pub fn saved_rooms(&self) -> Option<Vec<Room>> {
        self.rooms
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl MapStorage for MemoryStore {
    fn load(&self) -> Result<LoadedMap, MapError> {
        let rooms = self.saved_rooms().ok_or_else(|| MapError::NoDatabaseFound {
            dir: PathBuf::from("<memory>"),
        })?;
        Ok(LoadedMap {
            rooms,
            source: None,
            format: MapFormat::Memory,
        })
    }

    fn save(&self, rooms: &[Room], _target: Option<&Path>) -> Result<SavedMap, MapError> {
        *self
            .rooms
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(rooms.to_vec());
        Ok(SavedMap {
            path: None,
            backup: None,
            rooms: rooms.len(),
        })
    }

    fn last_saved_id(&self, _saved: &SavedMap) -> Result<Option<RoomId>, MapError> {
        Ok(self
            .saved_rooms()
            .and_then(|rooms| rooms.last().map(|r| r.id)))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
