//! In-memory room collection with its UID index and tag cache.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use once_cell::sync::OnceCell;

use crate::map::errors::MapError;
use crate::map::text;
use crate::map::types::{Room, RoomId};

/// Authoritative set of rooms, keyed by id. Ids may be sparse.
#[derive(Debug, Default)]
pub struct RoomGraph {
    rooms: BTreeMap<RoomId, Room>,
    uid_index: HashMap<u64, Vec<RoomId>>,
    tags_cache: OnceCell<BTreeSet<String>>,
}

impl RoomGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from loaded records. Later duplicates of an id win.
    pub fn from_rooms(rooms: impl IntoIterator<Item = Room>) -> Self {
        let mut graph = Self::new();
        for room in rooms {
            graph.place(room);
        }
        graph.rebuild_uid_index();
        graph
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Highest id present, if any.
    pub fn max_id(&self) -> Option<RoomId> {
        self.rooms.keys().next_back().copied()
    }

    pub fn get(&self, id: RoomId) -> Option<&Room> {
        self.rooms.get(&id)
    }

    pub fn get_mut(&mut self, id: RoomId) -> Option<&mut Room> {
        self.tags_cache.take();
        self.rooms.get_mut(&id)
    }

    pub fn contains(&self, id: RoomId) -> bool {
        self.rooms.contains_key(&id)
    }

    /// Rooms in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Room> + '_ {
        self.rooms.values()
    }

    pub fn find<P>(&self, mut predicate: P) -> Option<&Room>
    where
        P: FnMut(&Room) -> bool,
    {
        self.iter().find(|r| predicate(r))
    }

    /// Insert or replace a room and index its UIDs.
    pub fn insert(&mut self, room: Room) {
        let id = room.id;
        let uids = room.uid.clone();
        self.place(room);
        for uid in uids {
            self.add_uid(uid, id);
        }
    }

    fn place(&mut self, room: Room) {
        self.rooms.insert(room.id, room);
        self.tags_cache.take();
    }

    /// `max(existing ids) + 1`. An empty graph has no safe answer.
    pub fn allocate_next_id(&self) -> Result<RoomId, MapError> {
        let max = self.max_id().ok_or(MapError::EmptyGraph)?;
        max.checked_add(1).ok_or(MapError::IdsExhausted { max })
    }

    /// Record that `uid` resolves to `id`. Repeated calls are no-ops.
    pub fn add_uid(&mut self, uid: u64, id: RoomId) {
        let ids = self.uid_index.entry(uid).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    pub fn ids_from_uid(&self, uid: u64) -> &[RoomId] {
        self.uid_index.get(&uid).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn uid_count(&self) -> usize {
        self.uid_index.len()
    }

    pub fn rebuild_uid_index(&mut self) {
        let mut index: HashMap<u64, Vec<RoomId>> = HashMap::new();
        for room in self.rooms.values() {
            for uid in &room.uid {
                let ids = index.entry(*uid).or_default();
                if !ids.contains(&room.id) {
                    ids.push(room.id);
                }
            }
        }
        self.uid_index = index;
    }

    /// Resolve a free-form query.
    ///
    /// All digits is a room id, `u<digits>` a server UID. Anything else is
    /// matched case-insensitively against titles, then descriptions, then
    /// any single sentence of the query against descriptions.
    pub fn lookup(&self, query: &str) -> Option<&Room> {
        let query = query.trim();
        if query.is_empty() {
            return None;
        }
        if query.chars().all(|c| c.is_ascii_digit()) {
            return query.parse::<RoomId>().ok().and_then(|id| self.get(id));
        }
        if let Some(digits) = query.strip_prefix('u') {
            if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                let uid = digits.parse::<u64>().ok()?;
                return self.ids_from_uid(uid).first().and_then(|id| self.get(*id));
            }
        }

        if let Some(room) = self.find(|r| r.title.iter().any(|t| text::contains_ignore_case(t, query))) {
            return Some(room);
        }
        if let Some(room) =
            self.find(|r| r.description.iter().any(|d| text::contains_ignore_case(d, query)))
        {
            return Some(room);
        }
        let loose = text::any_sentence(query)?;
        self.find(|r| r.description.iter().any(|d| loose.is_match(d)))
    }

    /// Union of every room's tags, computed once until the graph changes.
    pub fn tags(&self) -> &BTreeSet<String> {
        self.tags_cache
            .get_or_init(|| self.iter().flat_map(|r| r.tags.iter().cloned()).collect())
    }

    pub fn ids_with_tag(&self, tag: &str) -> Vec<RoomId> {
        self.iter().filter(|r| r.has_tag(tag)).map(|r| r.id).collect()
    }

    pub fn clear(&mut self) {
        self.rooms.clear();
        self.uid_index.clear();
        self.tags_cache.take();
    }

    /// Clone out every room in id order, e.g. for saving.
    pub fn to_rooms(&self) -> Vec<Room> {
        self.iter().cloned().collect()
    }
}
