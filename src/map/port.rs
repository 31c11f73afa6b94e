//! Boundary to the live game connection.
//!
//! The engine never talks to the server directly; the host passes a
//! [`GamePort`] into every operation that may need fresh signals or a
//! probe command. Tests supply scripted fakes.

use std::time::Duration;

/// Snapshot of what the client currently knows about the room it is in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomSignals {
    pub title: String,
    pub description: String,
    /// Raw "Obvious exits: ..." / "Obvious paths: ..." line.
    pub exits: String,
    /// Server room-transition counter; increases on every room change.
    pub transition_count: u64,
    /// Server-assigned room UID, when the game provides one.
    pub uid: Option<u64>,
    pub room_window_disabled: bool,
    /// Names of loot items visible in the room.
    pub visible_loot: Vec<String>,
}

impl RoomSignals {
    pub fn new(title: &str, description: &str, exits: &str, transition_count: u64) -> Self {
        Self {
            title: title.to_string(),
            description: description.to_string(),
            exits: exits.to_string(),
            transition_count,
            ..Self::default()
        }
    }

    pub fn with_uid(mut self, uid: u64) -> Self {
        self.uid = Some(uid);
        self
    }

    pub fn with_loot(mut self, loot: &[&str]) -> Self {
        self.visible_loot = loot.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// Command/response access to the single live game connection.
pub trait GamePort {
    /// Send one command line to the server.
    fn send_command(&self, text: &str);

    /// Next line of server output, or `None` if nothing arrives in time.
    fn read_next_line(&self, timeout: Duration) -> Option<String>;

    /// Current room signals.
    fn signals(&self) -> RoomSignals;

    /// Cheap read of the transition counter, used for staleness checks.
    fn room_transition_count(&self) -> u64 {
        self.signals().transition_count
    }
}
