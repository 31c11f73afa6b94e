//! Per-game differences in how rooms are identified.
//!
//! GemStone supplies server UIDs, a `location` survey command and visible
//! loot; DragonRealms has none of these and matches on text alone. The
//! matching algorithm is shared and asks the policy only the questions
//! below.

use std::time::Instant;

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::map::port::GamePort;
use crate::map::probe::{wait_for, ProbeSettings};
use crate::map::types::Room;

/// Capability set that differs between game variants.
pub trait GameMatchingPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// UIDs at or above this value are transient and never used.
    /// `None` means the game does not provide UIDs at all.
    fn uid_threshold(&self) -> Option<u64>;

    /// Whether [`location_probe`](Self::location_probe) can produce anything.
    fn supports_location(&self) -> bool;

    /// Ask the server which named area the character is in.
    fn location_probe(&self, port: &dyn GamePort, settings: &ProbeSettings) -> Option<String>;

    /// True if the visible loot rules this room out.
    fn loot_conflict(&self, room: &Room, visible_loot: &[String]) -> bool;

    /// The live UID, if it is one this game lets the matcher trust.
    fn usable_uid(&self, uid: Option<u64>) -> Option<u64> {
        let threshold = self.uid_threshold()?;
        uid.filter(|u| *u != 0 && *u < threshold)
    }
}

/// Room UIDs of 2^32 and above are synthesised by the client for
/// instanced areas and do not identify a persistent room.
pub const GEMSTONE_UID_THRESHOLD: u64 = 1 << 32;

static LOCATION_RESPONSE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^You carefully survey your surroundings and guess that your current location is .*? or somewhere close to it\.$",
        r"|^You can't do that while submerged under water\.$",
        r"|^You can't do that\.$",
        r"|^It would be rude not to give your full attention to the performance\.$",
        r"|^You can't do that while hanging around up here!$",
        r"|^You are too distracted by the difficulty of staying alive in these treacherous waters to do that\.$",
        r"|^You carefully survey your surroundings but are unable to guess your current location\.$",
        r"|^Not in pitch darkness you don't\.$",
        r"|^That is too difficult to consider here\.$",
    ))
    .expect("static regex")
});

static LOCATION_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^You carefully survey your surroundings and guess that your current location is (.*?) or somewhere close to it\.$",
    )
    .expect("static regex")
});

#[derive(Debug, Default, Clone, Copy)]
pub struct GemStone;

impl GameMatchingPolicy for GemStone {
    fn name(&self) -> &'static str {
        "GS"
    }

    fn uid_threshold(&self) -> Option<u64> {
        Some(GEMSTONE_UID_THRESHOLD)
    }

    fn supports_location(&self) -> bool {
        true
    }

    fn location_probe(&self, port: &dyn GamePort, settings: &ProbeSettings) -> Option<String> {
        port.send_command("location");
        let deadline = Instant::now() + settings.location_timeout;
        let Some(line) = wait_for(port, &LOCATION_RESPONSE, deadline) else {
            debug!("location survey timed out");
            return None;
        };
        let location = LOCATION_NAME
            .captures(&line)
            .map(|caps| caps[1].to_string());
        debug!("location survey -> {:?}", location);
        location
    }

    fn loot_conflict(&self, room: &Room, visible_loot: &[String]) -> bool {
        room.unique_loot
            .as_ref()
            .map(|items| items.iter().any(|item| visible_loot.contains(item)))
            .unwrap_or(false)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DragonRealms;

impl GameMatchingPolicy for DragonRealms {
    fn name(&self) -> &'static str {
        "DR"
    }

    fn uid_threshold(&self) -> Option<u64> {
        None
    }

    fn supports_location(&self) -> bool {
        false
    }

    fn location_probe(&self, _port: &dyn GamePort, _settings: &ProbeSettings) -> Option<String> {
        None
    }

    fn loot_conflict(&self, _room: &Room, _visible_loot: &[String]) -> bool {
        false
    }
}

/// Policy for a game code such as `GS3`, `GSX` or `DR`.
pub fn policy_for_game(game: &str) -> Option<Box<dyn GameMatchingPolicy>> {
    let code = game.trim().to_ascii_uppercase();
    if code.starts_with("GS") {
        Some(Box::new(GemStone))
    } else if code.starts_with("DR") {
        Some(Box::new(DragonRealms))
    } else {
        None
    }
}
