use std::path::PathBuf;

use thiserror::Error;

/// Errors that can arise while loading, saving or querying the room graph.
///
/// Matching failures, unreachable destinations and probe timeouts are normal
/// outcomes and are reported as `None`, not through this type.
#[derive(Debug, Error)]
pub enum MapError {
    /// No candidate map file exists in the data directory.
    #[error("no map database found in {}", dir.display())]
    NoDatabaseFound { dir: PathBuf },

    /// A candidate file existed but could not be read or parsed.
    #[error("failed to load {}: {reason}", path.display())]
    LoadFailed { path: PathBuf, reason: String },

    /// The post-save integrity check did not find the last written room.
    #[error("map index corrupted at room {id}")]
    IndexCorruption { id: u32 },

    /// `allocate_next_id` was called on a graph with no rooms.
    #[error("cannot allocate a room id on an empty graph")]
    EmptyGraph,

    /// The highest room id is already the largest representable id.
    #[error("no room id left after {max}")]
    IdsExhausted { max: u32 },

    /// Malformed legacy XML.
    #[error("xml error at line {line}: {message}")]
    Xml { line: usize, message: String },

    /// A map file exceeded the configured read limit.
    #[error("{} exceeds {limit} bytes", path.display())]
    FileTooLarge { path: PathBuf, limit: u64 },

    /// Wrapper around IO errors (directory scans, reads, writes).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapper around JSON encoding and decoding errors.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Wrapper around legacy snapshot encoding and decoding errors.
    #[error("snapshot error: {0}")]
    Bincode(#[from] bincode::Error),
}

impl MapError {
    pub(crate) fn load_failed(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        MapError::LoadFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
