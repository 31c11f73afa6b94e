//! Current map format: a JSON array of room records.

use crate::map::errors::MapError;
use crate::map::types::{Room, RoomId};

pub fn decode(content: &str) -> Result<Vec<Room>, MapError> {
    // Interrupted writes have been seen to leave leading NULs.
    let normalized = content.trim_start_matches('\0');
    Ok(serde_json::from_str(normalized)?)
}

pub fn encode(rooms: &[Room]) -> Result<String, MapError> {
    Ok(serde_json::to_string_pretty(rooms)?)
}

/// Id of the final record in a saved file, without building rooms.
pub fn last_id(content: &str) -> Result<Option<RoomId>, MapError> {
    let records: Vec<serde_json::Value> = serde_json::from_str(content.trim_start_matches('\0'))?;
    Ok(records
        .last()
        .and_then(|r| r.get("id"))
        .and_then(serde_json::Value::as_u64)
        .and_then(|id| RoomId::try_from(id).ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::types::{Cost, EdgeValue};

    #[test]
    fn decodes_lich_style_records() {
        let text = r#"[
          {"id": 0, "title": ["[Town Square]"], "description": ["Busy."], "paths": ["Obvious paths: north"],
           "wayto": {"1": "north", "2": ";e go2_helper"}, "timeto": {"1": 0.2, "2": ";e 15.0"},
           "uid": [7120], "image": "town.png", "image_coords": [1, 2, 30, 40]},
          {"id": 1, "title": ["[Gate]"]}
        ]"#;
        let rooms = decode(text).unwrap();
        assert_eq!(rooms.len(), 2);
        assert_eq!(rooms[0].wayto["2"], EdgeValue::expression("go2_helper"));
        assert_eq!(rooms[0].timeto["2"], Some(Cost::expression("15.0")));
        assert_eq!(rooms[0].image_coords, Some([1, 2, 30, 40]));
        assert_eq!(last_id(text).unwrap(), Some(1));
    }

    #[test]
    fn leading_nuls_are_ignored() {
        let rooms = decode("\0\0[{\"id\":4}]").unwrap();
        assert_eq!(rooms[0].id, 4);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(decode("{not json").is_err());
        assert_eq!(last_id("[]").unwrap(), None);
    }
}
