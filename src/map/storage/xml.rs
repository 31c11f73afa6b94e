//! Legacy XML map format (read only).
//!
//! ```text
//! <map>
//!   <room id="12" location="Landing" climate="temperate" terrain="urban">
//!     <title>[Town Square]</title>
//!     <description>...</description>
//!     <paths>Obvious paths: north</paths>
//!     <tag>town</tag>
//!     <unique_loot>a statue</unique_loot>
//!     <image name="town.png" coords="1,2,30,40" />
//!     <exit target="13" type="String" cost="0.2">north</exit>
//!     <exit target="14" type="Proc" cost="go_helper_cost">go_helper</exit>
//!   </room>
//! </map>
//! ```
//!
//! The reader is a small pull parser over the document text; it handles
//! the subset of XML these files use (elements, quoted attributes, entity
//! references, comments and processing instructions).

use crate::map::errors::MapError;
use crate::map::types::{Command, Cost, EdgeValue, Room, RoomId, DEFERRED_PREFIX};

/// Cost given to an exit saved without one.
const DEFAULT_EXIT_COST: f64 = 0.2;

#[derive(Debug, PartialEq)]
enum Event {
    Start {
        name: String,
        attrs: Vec<(String, String)>,
        empty: bool,
    },
    End(String),
    Text(String),
}

struct Reader<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
}

impl<'a> Reader<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0, line: 1 }
    }

    fn error(&self, message: impl Into<String>) -> MapError {
        MapError::Xml {
            line: self.line,
            message: message.into(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn advance(&mut self, bytes: usize) {
        let consumed = &self.src[self.pos..self.pos + bytes];
        self.line += consumed.matches('\n').count();
        self.pos += bytes;
    }

    fn skip_past(&mut self, terminator: &str) -> Result<(), MapError> {
        match self.rest().find(terminator) {
            Some(i) => {
                self.advance(i + terminator.len());
                Ok(())
            }
            None => Err(self.error(format!("unterminated markup, expected {:?}", terminator))),
        }
    }

    fn skip_whitespace(&mut self) {
        let n = self.rest().len() - self.rest().trim_start().len();
        self.advance(n);
    }

    fn read_name(&mut self) -> Result<String, MapError> {
        let rest = self.rest();
        let end = rest
            .find(|c: char| c.is_whitespace() || matches!(c, '/' | '>' | '='))
            .unwrap_or(rest.len());
        if end == 0 {
            return Err(self.error("expected a name"));
        }
        let name = rest[..end].to_string();
        self.advance(end);
        Ok(name)
    }

    fn next_event(&mut self) -> Result<Option<Event>, MapError> {
        loop {
            let rest = self.rest();
            if rest.is_empty() {
                return Ok(None);
            }
            if !rest.starts_with('<') {
                let end = rest.find('<').unwrap_or(rest.len());
                let raw = &rest[..end];
                let text = decode_entities(raw).map_err(|m| self.error(m))?;
                self.advance(end);
                return Ok(Some(Event::Text(text)));
            }
            if rest.starts_with("<?") {
                self.skip_past("?>")?;
            } else if rest.starts_with("<!--") {
                self.skip_past("-->")?;
            } else if rest.starts_with("<!") {
                self.skip_past(">")?;
            } else if rest.starts_with("</") {
                self.advance(2);
                let name = self.read_name()?;
                self.skip_whitespace();
                if !self.rest().starts_with('>') {
                    return Err(self.error(format!("malformed closing tag </{}", name)));
                }
                self.advance(1);
                return Ok(Some(Event::End(name)));
            } else {
                self.advance(1);
                return self.read_start_tag().map(Some);
            }
        }
    }

    fn read_start_tag(&mut self) -> Result<Event, MapError> {
        let name = self.read_name()?;
        let mut attrs = Vec::new();
        loop {
            self.skip_whitespace();
            let rest = self.rest();
            if rest.starts_with("/>") {
                self.advance(2);
                return Ok(Event::Start {
                    name,
                    attrs,
                    empty: true,
                });
            }
            if rest.starts_with('>') {
                self.advance(1);
                return Ok(Event::Start {
                    name,
                    attrs,
                    empty: false,
                });
            }
            if rest.is_empty() {
                return Err(self.error(format!("unterminated tag <{}", name)));
            }
            let key = self.read_name()?;
            self.skip_whitespace();
            if !self.rest().starts_with('=') {
                return Err(self.error(format!("attribute {} has no value", key)));
            }
            self.advance(1);
            self.skip_whitespace();
            let quote = match self.rest().chars().next() {
                Some(q @ ('"' | '\'')) => q,
                _ => return Err(self.error(format!("attribute {} is not quoted", key))),
            };
            self.advance(1);
            let Some(end) = self.rest().find(quote) else {
                return Err(self.error(format!("unterminated value for {}", key)));
            };
            let raw = &self.rest()[..end];
            let value = decode_entities(raw).map_err(|m| self.error(m))?;
            self.advance(end + 1);
            attrs.push((key, value));
        }
    }
}

fn decode_entities(raw: &str) -> Result<String, String> {
    if !raw.contains('&') {
        return Ok(raw.to_string());
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(i) = rest.find('&') {
        out.push_str(&rest[..i]);
        rest = &rest[i..];
        let Some(end) = rest.find(';') else {
            return Err(format!("unterminated entity in {:?}", raw));
        };
        let entity = &rest[1..end];
        let decoded = match entity {
            "amp" => '&',
            "lt" => '<',
            "gt" => '>',
            "quot" => '"',
            "apos" => '\'',
            _ => {
                let code = if let Some(hex) = entity.strip_prefix("#x") {
                    u32::from_str_radix(hex, 16).ok()
                } else if let Some(dec) = entity.strip_prefix('#') {
                    dec.parse::<u32>().ok()
                } else {
                    None
                };
                code.and_then(char::from_u32)
                    .ok_or_else(|| format!("unknown entity &{};", entity))?
            }
        };
        out.push(decoded);
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn attr<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

struct PendingExit {
    target: String,
    deferred: bool,
    cost: Option<String>,
}

fn exit_cost(raw: Option<&str>) -> Option<Cost> {
    match raw.map(str::trim) {
        None | Some("") => Some(EdgeValue::Literal(DEFAULT_EXIT_COST)),
        Some(text) => {
            if let Ok(value) = text.parse::<f64>() {
                return Some(EdgeValue::Literal(value));
            }
            let payload = text.strip_prefix(DEFERRED_PREFIX).unwrap_or(text);
            Some(EdgeValue::Expression(payload.to_string()))
        }
    }
}

/// Parse a whole legacy XML map.
pub fn decode(content: &str) -> Result<Vec<Room>, MapError> {
    let mut reader = Reader::new(content);
    let mut rooms = Vec::new();
    let mut room: Option<Room> = None;
    let mut exit: Option<PendingExit> = None;
    let mut text = String::new();

    while let Some(event) = reader.next_event()? {
        match event {
            Event::Start { name, attrs, empty } => match name.as_str() {
                "room" => {
                    let id = attr(&attrs, "id")
                        .and_then(|v| v.trim().parse::<RoomId>().ok())
                        .ok_or_else(|| reader.error("room without a numeric id"))?;
                    let mut r = Room::new(id);
                    r.location = attr(&attrs, "location").map(str::to_string);
                    r.climate = attr(&attrs, "climate").map(str::to_string);
                    r.terrain = attr(&attrs, "terrain").map(str::to_string);
                    room = Some(r);
                }
                "image" => {
                    if let Some(r) = room.as_mut() {
                        r.image = attr(&attrs, "name").map(str::to_string);
                        r.image_coords = attr(&attrs, "coords").and_then(parse_coords);
                    }
                }
                "exit" => {
                    let target = attr(&attrs, "target")
                        .ok_or_else(|| reader.error("exit without a target"))?
                        .trim()
                        .to_string();
                    exit = Some(PendingExit {
                        target,
                        deferred: attr(&attrs, "type") == Some("Proc"),
                        cost: attr(&attrs, "cost").map(str::to_string),
                    });
                    text.clear();
                    if empty {
                        finish_exit(room.as_mut(), exit.take(), "");
                    }
                }
                _ => text.clear(),
            },
            Event::Text(t) => text.push_str(&t),
            Event::End(name) => {
                let Some(r) = room.as_mut() else {
                    continue;
                };
                match name.as_str() {
                    "title" => r.title.push(text.clone()),
                    "description" => r.description.push(text.clone()),
                    "paths" => r.paths.push(text.clone()),
                    "tag" => r.tags.push(text.clone()),
                    "unique_loot" => r.unique_loot.get_or_insert_with(Vec::new).push(text.clone()),
                    "exit" => finish_exit(Some(r), exit.take(), &text),
                    "room" => {
                        if let Some(done) = room.take() {
                            rooms.push(done);
                        }
                    }
                    _ => {}
                }
                text.clear();
            }
        }
    }

    if room.is_some() {
        return Err(reader.error("document ended inside a room"));
    }
    Ok(rooms)
}

fn finish_exit(room: Option<&mut Room>, exit: Option<PendingExit>, body: &str) {
    let (Some(room), Some(exit)) = (room, exit) else {
        return;
    };
    let command = if exit.deferred {
        Command::Expression(body.strip_prefix(DEFERRED_PREFIX).unwrap_or(body).to_string())
    } else {
        Command::from(body)
    };
    room.timeto
        .insert(exit.target.clone(), exit_cost(exit.cost.as_deref()));
    room.wayto.insert(exit.target, command);
}

fn parse_coords(raw: &str) -> Option<[i32; 4]> {
    let values: Vec<i32> = raw
        .split(',')
        .map(|v| v.trim().parse::<i32>())
        .collect::<Result<_, _>>()
        .ok()?;
    values.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<!-- exported map -->
<map>
   <room id="12" location="Wehnimer's Landing" terrain="urban">
      <title>[Town Square, Central]</title>
      <description>This is the heart of town &amp; its market.</description>
      <paths>Obvious paths: north, east</paths>
      <tag>town</tag>
      <tag>peer north =~ /a &lt;bright&gt; well/</tag>
      <unique_loot>a marble statue</unique_loot>
      <image name="wl-town.png" coords="10, 20, 30, 40" />
      <exit target="13" type="String" cost="0.5">north</exit>
      <exit target="14" type="Proc" cost="climb_cost">climb_wall</exit>
      <exit target="15" type="String">east</exit>
   </room>
   <room id='13'>
      <title>[North Road]</title>
   </room>
</map>
"#;

    #[test]
    fn reads_rooms_and_exits() {
        let rooms = decode(SAMPLE).unwrap();
        assert_eq!(rooms.len(), 2);
        let square = &rooms[0];
        assert_eq!(square.id, 12);
        assert_eq!(square.location.as_deref(), Some("Wehnimer's Landing"));
        assert_eq!(square.climate, None);
        assert_eq!(square.description[0], "This is the heart of town & its market.");
        assert_eq!(square.tags[1], "peer north =~ /a <bright> well/");
        assert_eq!(square.unique_loot, Some(vec!["a marble statue".to_string()]));
        assert_eq!(square.image.as_deref(), Some("wl-town.png"));
        assert_eq!(square.image_coords, Some([10, 20, 30, 40]));
        assert_eq!(square.wayto["13"], Command::from("north"));
        assert_eq!(square.timeto["13"], Some(Cost::from(0.5)));
        assert_eq!(square.wayto["14"], Command::expression("climb_wall"));
        assert_eq!(square.timeto["14"], Some(Cost::expression("climb_cost")));
        assert_eq!(square.timeto["15"], Some(Cost::from(DEFAULT_EXIT_COST)));
        assert_eq!(rooms[1].title, vec!["[North Road]"]);
    }

    #[test]
    fn numeric_character_references() {
        assert_eq!(decode_entities("caf&#233; &#x41;").unwrap(), "café A");
        assert!(decode_entities("broken &amp").is_err());
        assert!(decode_entities("&bogus;").is_err());
    }

    #[test]
    fn reports_line_of_malformed_markup() {
        let err = decode("<map>\n<room id=\"1\">\n<title>x</title\n").unwrap_err();
        match err {
            MapError::Xml { line, .. } => assert!(line >= 3),
            other => panic!("unexpected {:?}", other),
        }
        assert!(decode("<map><room><title>x</title></room></map>").is_err());
        assert!(decode("<map><room id=\"2\">").is_err());
    }
}
