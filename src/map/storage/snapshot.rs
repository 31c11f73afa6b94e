//! Legacy binary snapshot format (`.dat`).
//!
//! A snapshot is the whole room table serialized in one bincode blob,
//! prefixed by a magic tag and a schema version. Only reading is part of
//! normal operation; [`encode`] exists for fixtures and conversion tools.

use std::collections::BTreeMap;

use bincode::Options;
use log::info;
use serde::{Deserialize, Serialize};

use crate::map::errors::MapError;
use crate::map::types::{EdgeValue, ImageCoords, Room, RoomId};

const MAGIC: [u8; 4] = *b"RMAP";
pub const SNAPSHOT_SCHEMA_VERSION: u8 = 2;
/// Snapshots store one slot per id; refuse to write more empty slots than this.
const MAX_EMPTY_SLOTS: u64 = 1 << 20;

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    magic: [u8; 4],
    version: u8,
    rooms: Vec<Option<SnapshotRoom>>,
}

#[derive(Debug, Serialize, Deserialize)]
enum SnapshotCommand {
    Literal(String),
    Deferred(String),
}

#[derive(Debug, Serialize, Deserialize)]
enum SnapshotCost {
    Literal(f64),
    Deferred(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRoom {
    id: RoomId,
    title: Vec<String>,
    description: Vec<String>,
    paths: Vec<String>,
    location: Option<String>,
    climate: Option<String>,
    terrain: Option<String>,
    wayto: Vec<(String, SnapshotCommand)>,
    timeto: Vec<(String, Option<SnapshotCost>)>,
    image: Option<String>,
    image_coords: Option<ImageCoords>,
    tags: Vec<String>,
    check_location: bool,
    unique_loot: Option<Vec<String>>,
    /// Added in schema v2.
    uid: Vec<u64>,
}

/// v1 snapshots predate server UIDs.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRoomV1 {
    id: RoomId,
    title: Vec<String>,
    description: Vec<String>,
    paths: Vec<String>,
    location: Option<String>,
    climate: Option<String>,
    terrain: Option<String>,
    wayto: Vec<(String, SnapshotCommand)>,
    timeto: Vec<(String, Option<SnapshotCost>)>,
    image: Option<String>,
    image_coords: Option<ImageCoords>,
    tags: Vec<String>,
    check_location: bool,
    unique_loot: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct Header {
    magic: [u8; 4],
    version: u8,
}

#[derive(Debug, Deserialize)]
struct SnapshotV1 {
    #[allow(dead_code)]
    magic: [u8; 4],
    #[allow(dead_code)]
    version: u8,
    rooms: Vec<Option<SnapshotRoomV1>>,
}

fn options(limit: u64) -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(limit)
        .allow_trailing_bytes()
}

impl From<SnapshotRoomV1> for SnapshotRoom {
    fn from(old: SnapshotRoomV1) -> Self {
        Self {
            id: old.id,
            title: old.title,
            description: old.description,
            paths: old.paths,
            location: old.location,
            climate: old.climate,
            terrain: old.terrain,
            wayto: old.wayto,
            timeto: old.timeto,
            image: old.image,
            image_coords: old.image_coords,
            tags: old.tags,
            check_location: old.check_location,
            unique_loot: old.unique_loot,
            uid: Vec::new(),
        }
    }
}

impl From<SnapshotRoom> for Room {
    fn from(s: SnapshotRoom) -> Self {
        let wayto = s
            .wayto
            .into_iter()
            .map(|(k, v)| {
                let value = match v {
                    SnapshotCommand::Literal(c) => EdgeValue::Literal(c),
                    SnapshotCommand::Deferred(e) => EdgeValue::Expression(e),
                };
                (k, value)
            })
            .collect();
        let timeto = s
            .timeto
            .into_iter()
            .map(|(k, v)| {
                let value = v.map(|cost| match cost {
                    SnapshotCost::Literal(c) => EdgeValue::Literal(c),
                    SnapshotCost::Deferred(e) => EdgeValue::Expression(e),
                });
                (k, value)
            })
            .collect();
        Room {
            id: s.id,
            title: s.title,
            description: s.description,
            paths: s.paths,
            location: s.location,
            climate: s.climate,
            terrain: s.terrain,
            wayto,
            timeto,
            image: s.image,
            image_coords: s.image_coords,
            tags: s.tags,
            check_location: s.check_location,
            unique_loot: s.unique_loot,
            uid: s.uid,
            extra: BTreeMap::new(),
        }
    }
}

impl From<&Room> for SnapshotRoom {
    fn from(r: &Room) -> Self {
        Self {
            id: r.id,
            title: r.title.clone(),
            description: r.description.clone(),
            paths: r.paths.clone(),
            location: r.location.clone(),
            climate: r.climate.clone(),
            terrain: r.terrain.clone(),
            wayto: r
                .wayto
                .iter()
                .map(|(k, v)| {
                    let value = match v {
                        EdgeValue::Literal(c) => SnapshotCommand::Literal(c.clone()),
                        EdgeValue::Expression(e) => SnapshotCommand::Deferred(e.clone()),
                    };
                    (k.clone(), value)
                })
                .collect(),
            timeto: r
                .timeto
                .iter()
                .map(|(k, v)| {
                    let value = v.as_ref().map(|cost| match cost {
                        EdgeValue::Literal(c) => SnapshotCost::Literal(*c),
                        EdgeValue::Expression(e) => SnapshotCost::Deferred(e.clone()),
                    });
                    (k.clone(), value)
                })
                .collect(),
            image: r.image.clone(),
            image_coords: r.image_coords,
            tags: r.tags.clone(),
            check_location: r.check_location,
            unique_loot: r.unique_loot.clone(),
            uid: r.uid.clone(),
        }
    }
}

/// Decode a snapshot, migrating older schema versions.
pub fn decode(bytes: &[u8]) -> Result<Vec<Room>, MapError> {
    let limit = bytes.len() as u64 + 1024;
    let header: Header = options(limit).deserialize(bytes)?;
    if header.magic != MAGIC {
        return Err(MapError::load_failed("<snapshot>", "not a map snapshot"));
    }
    let rooms: Vec<SnapshotRoom> = match header.version {
        1 => {
            let old: SnapshotV1 = options(limit).deserialize(bytes)?;
            info!(
                "Migrating map snapshot from schema v1 to v{} ({} slots)",
                SNAPSHOT_SCHEMA_VERSION,
                old.rooms.len()
            );
            old.rooms.into_iter().flatten().map(SnapshotRoom::from).collect()
        }
        SNAPSHOT_SCHEMA_VERSION => {
            let snap: Snapshot = options(limit).deserialize(bytes)?;
            snap.rooms.into_iter().flatten().collect()
        }
        other => {
            return Err(MapError::load_failed(
                "<snapshot>",
                format!("unsupported snapshot schema v{}", other),
            ))
        }
    };
    Ok(rooms.into_iter().map(Room::from).collect())
}

/// Encode rooms as a current-version snapshot, slot per id.
pub fn encode(rooms: &[Room]) -> Result<Vec<u8>, MapError> {
    let len = rooms.iter().map(|r| u64::from(r.id) + 1).max().unwrap_or(0);
    if len.saturating_sub(rooms.len() as u64) > MAX_EMPTY_SLOTS {
        let reason = format!(
            "room id {} would need {} empty snapshot slots",
            len - 1,
            len - rooms.len() as u64
        );
        return Err(Box::new(bincode::ErrorKind::Custom(reason)).into());
    }
    let len = len as usize;
    let mut slots: Vec<Option<SnapshotRoom>> = (0..len).map(|_| None).collect();
    for room in rooms {
        slots[room.id as usize] = Some(SnapshotRoom::from(room));
    }
    let snap = Snapshot {
        magic: MAGIC,
        version: SNAPSHOT_SCHEMA_VERSION,
        rooms: slots,
    };
    Ok(options(u64::MAX).serialize(&snap)?)
}
