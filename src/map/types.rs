//! Room records and edge values shared by every layer of the map engine.
//!
//! A [`Room`] mirrors one record of the current JSON map format. Edges are
//! stored as two maps keyed by the target room id rendered as a string:
//! `wayto` holds the movement command and `timeto` the traversal cost.
//! Either value may be deferred, in which case it carries an opaque
//! expression that an [`ExpressionEvaluator`](crate::map::ExpressionEvaluator)
//! resolves when the edge is actually used.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::map::probe::PeerDirective;

/// Dense, non-negative room identifier. Stable only within one loaded graph.
pub type RoomId = u32;

/// Marker that prefixes a deferred wayto/timeto value in the JSON format.
pub const DEFERRED_PREFIX: &str = ";e ";

/// Exits vary between visits; the exits line is ignored when matching.
pub const TAG_RANDOM_PATHS: &str = "random-paths";
/// The room may accrue more than one server UID.
pub const TAG_MULTI_UID: &str = "meta:map:multi-uid";
/// Only the most recently observed UID is kept.
pub const TAG_LATEST_ONLY: &str = "meta:map:latest-only";
/// Player shop: description text is owner-edited and ignored when matching.
pub const TAG_PLAYERSHOP: &str = "meta:playershop";

/// Bounding box for an external map renderer: `[min_x, min_y, max_x, max_y]`.
pub type ImageCoords = [i32; 4];

/// An edge attribute that is either known up front or resolved later.
#[derive(Debug, Clone, PartialEq)]
pub enum EdgeValue<T> {
    Literal(T),
    /// Opaque payload handed to the host's evaluator at traversal time.
    Expression(String),
}

/// Movement command for an edge.
pub type Command = EdgeValue<String>;
/// Traversal cost in seconds for an edge.
pub type Cost = EdgeValue<f64>;

impl<T> EdgeValue<T> {
    pub fn expression(payload: impl Into<String>) -> Self {
        EdgeValue::Expression(payload.into())
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, EdgeValue::Expression(_))
    }

    /// Wire form of a deferred value (`";e <payload>"`), if this is one.
    pub fn encoded_expression(&self) -> Option<String> {
        match self {
            EdgeValue::Literal(_) => None,
            EdgeValue::Expression(payload) => Some(format!("{}{}", DEFERRED_PREFIX, payload)),
        }
    }
}

impl From<&str> for Command {
    fn from(value: &str) -> Self {
        match value.strip_prefix(DEFERRED_PREFIX) {
            Some(payload) => EdgeValue::Expression(payload.to_string()),
            None => EdgeValue::Literal(value.to_string()),
        }
    }
}

impl From<f64> for Cost {
    fn from(value: f64) -> Self {
        EdgeValue::Literal(value)
    }
}

impl<T: Serialize> Serialize for EdgeValue<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            EdgeValue::Literal(value) => value.serialize(serializer),
            EdgeValue::Expression(payload) => {
                serializer.serialize_str(&format!("{}{}", DEFERRED_PREFIX, payload))
            }
        }
    }
}

impl<'de> Deserialize<'de> for EdgeValue<String> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Command::from(raw.as_str()))
    }
}

impl<'de> Deserialize<'de> for EdgeValue<f64> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(EdgeValue::Literal(n)),
            Raw::Text(text) => match text.strip_prefix(DEFERRED_PREFIX) {
                Some(payload) => Ok(EdgeValue::Expression(payload.to_string())),
                None => text
                    .trim()
                    .parse::<f64>()
                    .map(EdgeValue::Literal)
                    .map_err(|_| D::Error::custom(format!("invalid edge cost: {:?}", text))),
            },
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// One world location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    /// Every observed title, newest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub title: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub description: Vec<String>,
    /// Raw "Obvious exits/paths" lines.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub climate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terrain: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub wayto: BTreeMap<String, Command>,
    /// A `None` cost marks an edge that pathfinding must not use.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub timeto: BTreeMap<String, Option<Cost>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_coords: Option<ImageCoords>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub check_location: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_loot: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uid: Vec<u64>,
    /// Game-variant fields this engine does not interpret; kept for round trips.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Room {
    pub fn new(id: RoomId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// Build a room from one set of live observations.
    pub fn observed(id: RoomId, title: &str, description: &str, paths: &str) -> Self {
        let mut room = Self::new(id);
        room.title.push(title.to_string());
        room.description.push(description.trim().to_string());
        room.paths.push(paths.trim().to_string());
        room
    }

    /// Add an edge with a literal command and cost.
    pub fn connect(&mut self, target: RoomId, command: &str, cost: f64) -> &mut Self {
        self.wayto.insert(target.to_string(), Command::from(command));
        self.timeto.insert(target.to_string(), Some(Cost::from(cost)));
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn add_tag(&mut self, tag: &str) {
        if !self.has_tag(tag) {
            self.tags.push(tag.to_string());
        }
    }

    /// True when the latest exits line is of the outdoor "Obvious paths:" form.
    pub fn outside(&self) -> bool {
        self.paths
            .last()
            .map(|p| p.starts_with("Obvious paths:"))
            .unwrap_or(false)
    }

    /// Ids of rooms reachable in one step. Keys that are not numeric are skipped.
    pub fn neighbors(&self) -> impl Iterator<Item = RoomId> + '_ {
        self.wayto.keys().filter_map(|k| k.parse::<RoomId>().ok())
    }

    pub fn is_neighbor(&self, id: RoomId) -> bool {
        self.wayto.contains_key(&id.to_string())
    }

    /// The first well-formed `peer` directive among this room's tags.
    pub fn peer_directive(&self) -> Option<PeerDirective> {
        self.tags.iter().find_map(|t| PeerDirective::parse(t))
    }

    pub fn has_peer_directive(&self) -> bool {
        self.peer_directive().is_some()
    }

    /// Record observed text, newest first, without duplicating known values.
    pub fn observe(&mut self, title: &str, description: &str, paths: &str) {
        prepend_unique(&mut self.title, title);
        prepend_unique(&mut self.description, description.trim());
        prepend_unique(&mut self.paths, paths.trim());
    }

    /// Returns true if `uid` was newly attached.
    pub fn attach_uid(&mut self, uid: u64) -> bool {
        if self.uid.contains(&uid) {
            return false;
        }
        if self.has_tag(TAG_LATEST_ONLY) {
            self.uid.clear();
        }
        self.uid.push(uid);
        true
    }
}

fn prepend_unique(list: &mut Vec<String>, value: &str) {
    if value.is_empty() || list.iter().any(|v| v == value) {
        return;
    }
    list.insert(0, value.to_string());
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.id)?;
        if let Some(uid) = self.uid.last() {
            write!(f, " (u{})", uid)?;
        }
        writeln!(f, ":")?;
        writeln!(f, "{}", self.title.first().map(String::as_str).unwrap_or(""))?;
        writeln!(f, "{}", self.description.first().map(String::as_str).unwrap_or(""))?;
        write!(f, "{}", self.paths.first().map(String::as_str).unwrap_or(""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deferred_strings_decode_to_expressions() {
        let json = r#"{"id":7,"wayto":{"8":";e go_gate","9":"north"},"timeto":{"8":";e gate_cost","9":0.2}}"#;
        let room: Room = serde_json::from_str(json).unwrap();
        assert_eq!(room.wayto["8"], EdgeValue::expression("go_gate"));
        assert_eq!(room.wayto["9"], EdgeValue::Literal("north".to_string()));
        assert_eq!(room.timeto["8"], Some(EdgeValue::expression("gate_cost")));
        assert_eq!(room.timeto["9"], Some(EdgeValue::Literal(0.2)));
    }

    #[test]
    fn integer_and_null_costs_are_accepted() {
        let json = r#"{"id":1,"wayto":{"2":"out","3":"in"},"timeto":{"2":5,"3":null}}"#;
        let room: Room = serde_json::from_str(json).unwrap();
        assert_eq!(room.timeto["2"], Some(EdgeValue::Literal(5.0)));
        assert_eq!(room.timeto["3"], None);
    }

    #[test]
    fn empty_fields_are_omitted_and_extras_survive() {
        let json = r#"{"id":3,"title":["[Somewhere]"],"dr_region":"Crossing"}"#;
        let room: Room = serde_json::from_str(json).unwrap();
        assert_eq!(room.extra["dr_region"], "Crossing");
        let out = serde_json::to_string(&room).unwrap();
        assert!(!out.contains("description"));
        assert!(!out.contains("check_location"));
        assert!(out.contains("\"dr_region\":\"Crossing\""));
    }

    #[test]
    fn expression_serializes_with_prefix() {
        let value = Cost::expression("Map.swim_cost");
        assert_eq!(serde_json::to_string(&value).unwrap(), "\";e Map.swim_cost\"");
        assert_eq!(value.encoded_expression().unwrap(), ";e Map.swim_cost");
    }

    #[test]
    fn outside_follows_last_paths_entry() {
        let mut room = Room::observed(1, "[Road]", "Dusty.", "Obvious exits: north");
        assert!(!room.outside());
        room.paths.push("Obvious paths: north, south".to_string());
        assert!(room.outside());
    }

    #[test]
    fn observe_prepends_new_text_once() {
        let mut room = Room::observed(1, "[Hall]", "Old text.", "Obvious exits: out");
        room.observe("[Hall]", "New text.  ", "Obvious exits: out");
        room.observe("[Hall]", "New text.", "Obvious exits: out");
        assert_eq!(room.title, vec!["[Hall]"]);
        assert_eq!(room.description, vec!["New text.", "Old text."]);
    }

    #[test]
    fn latest_only_replaces_uid() {
        let mut room = Room::new(4);
        room.attach_uid(10);
        room.attach_uid(11);
        assert_eq!(room.uid, vec![10, 11]);
        room.add_tag(TAG_LATEST_ONLY);
        assert!(room.attach_uid(12));
        assert_eq!(room.uid, vec![12]);
        assert!(!room.attach_uid(12));
    }
}
