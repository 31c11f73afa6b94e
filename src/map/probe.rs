//! Live probes used to tell textually identical rooms apart.
//!
//! A room tagged `peer <direction> =~ /<regex>/` is only accepted after the
//! engine peers in that direction and the regex matches one of the lines
//! that come back. An optional `set desc on; ` prefix asks the server for
//! full descriptions while peering.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::logutil::escape_log;
use crate::map::port::GamePort;

static PEER_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(set desc on; )?peer ([a-z]+) =~ /(.+)/$").expect("static regex")
});

static PEER_RESPONSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"You peer|\[Usage: PEER").expect("static regex"));

/// Timing bounds for live probes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeSettings {
    /// How long to wait for the server to acknowledge a peer.
    pub peer_timeout: Duration,
    /// Lines read after the acknowledgement.
    pub peer_max_lines: usize,
    /// How long to wait for a `location` survey.
    pub location_timeout: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            peer_timeout: Duration::from_secs(3),
            peer_max_lines: 5,
            location_timeout: Duration::from_secs(15),
        }
    }
}

/// Parsed `peer` tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerDirective {
    pub set_desc: bool,
    pub direction: String,
    pub requirement: String,
}

impl PeerDirective {
    pub fn parse(tag: &str) -> Option<Self> {
        let caps = PEER_TAG.captures(tag)?;
        Some(Self {
            set_desc: caps.get(1).is_some(),
            direction: caps[2].to_string(),
            requirement: caps[3].to_string(),
        })
    }

    pub fn pattern(&self) -> Option<Regex> {
        match Regex::new(&self.requirement) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!("unusable peer requirement /{}/: {}", self.requirement, e);
                None
            }
        }
    }
}

/// Result of one peer command.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerOutcome {
    Lines(Vec<String>),
    /// The server rejected the direction.
    Refused,
    /// No acknowledgement within the bound.
    Timeout,
}

/// Wait until `deadline` for a line matching `pattern`.
pub fn wait_for(port: &dyn GamePort, pattern: &Regex, deadline: Instant) -> Option<String> {
    loop {
        let remaining = deadline.checked_duration_since(Instant::now())?;
        if remaining.is_zero() {
            return None;
        }
        let line = port.read_next_line(remaining)?;
        if pattern.is_match(&line) {
            return Some(line);
        }
    }
}

/// Issue `peer <direction>` and collect what the server shows.
pub fn peer(port: &dyn GamePort, directive: &PeerDirective, settings: &ProbeSettings) -> PeerOutcome {
    if directive.set_desc {
        port.send_command("set description on");
    }
    port.send_command(&format!("peer {}", directive.direction));
    let deadline = Instant::now() + settings.peer_timeout;
    let outcome = match wait_for(port, &PEER_RESPONSE, deadline) {
        None => PeerOutcome::Timeout,
        Some(ack) if !ack.contains("You peer") => PeerOutcome::Refused,
        Some(_) => {
            let mut lines = Vec::with_capacity(settings.peer_max_lines);
            for _ in 0..settings.peer_max_lines {
                let Some(line) = port.read_next_line(settings.peer_timeout) else {
                    break;
                };
                let done = line.starts_with("Obvious");
                lines.push(line);
                if done {
                    break;
                }
            }
            PeerOutcome::Lines(lines)
        }
    };
    if directive.set_desc {
        port.send_command("set description off");
    }
    debug!("peer {} -> {:?}", directive.direction, outcome);
    outcome
}

/// Peer results for one resolution, keyed by transition counter,
/// direction and whether full descriptions were requested.
#[derive(Debug, Default)]
pub struct PeerHistory {
    results: HashMap<(u64, String, bool), Vec<String>>,
}

impl PeerHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the live peer satisfies `directive`. Probes at most once
    /// per (counter, direction, set_desc).
    pub fn satisfied(
        &mut self,
        port: &dyn GamePort,
        count: u64,
        directive: &PeerDirective,
        settings: &ProbeSettings,
    ) -> bool {
        let Some(pattern) = directive.pattern() else {
            return false;
        };
        let key = (count, directive.direction.clone(), directive.set_desc);
        let lines = self.results.entry(key).or_insert_with(|| {
            match peer(port, directive, settings) {
                PeerOutcome::Lines(lines) => lines,
                PeerOutcome::Refused | PeerOutcome::Timeout => Vec::new(),
            }
        });
        let good = lines.iter().any(|line| pattern.is_match(line));
        if !good {
            debug!(
                "peer {} did not match /{}/ ({} lines, first: {})",
                directive.direction,
                directive.requirement,
                lines.len(),
                escape_log(lines.first().map(String::as_str).unwrap_or(""))
            );
        }
        good
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::port::RoomSignals;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedPort {
        sent: Mutex<Vec<String>>,
        lines: Mutex<VecDeque<String>>,
    }

    impl ScriptedPort {
        fn new(lines: &[&str]) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                lines: Mutex::new(lines.iter().map(|s| s.to_string()).collect()),
            }
        }
    }

    impl GamePort for ScriptedPort {
        fn send_command(&self, text: &str) {
            self.sent.lock().unwrap().push(text.to_string());
        }
        fn read_next_line(&self, _timeout: Duration) -> Option<String> {
            self.lines.lock().unwrap().pop_front()
        }
        fn signals(&self) -> RoomSignals {
            RoomSignals::default()
        }
    }

    fn quick() -> ProbeSettings {
        ProbeSettings {
            peer_timeout: Duration::from_millis(50),
            peer_max_lines: 5,
            location_timeout: Duration::from_millis(50),
        }
    }

    #[test]
    fn parses_peer_tags() {
        let d = PeerDirective::parse("peer north =~ /a stone well/").unwrap();
        assert!(!d.set_desc);
        assert_eq!(d.direction, "north");
        assert_eq!(d.requirement, "a stone well");

        let d = PeerDirective::parse("set desc on; peer up =~ /Treetop/").unwrap();
        assert!(d.set_desc);
        assert_eq!(d.direction, "up");

        assert!(PeerDirective::parse("peer North =~ /x/").is_none());
        assert!(PeerDirective::parse("no-magic").is_none());
    }

    #[test]
    fn peer_reads_until_obvious_line() {
        let port = ScriptedPort::new(&[
            "Someone waves.",
            "You peer north.",
            "[Town Well]",
            "A stone well stands here.",
            "Obvious paths: south",
            "never read",
        ]);
        let d = PeerDirective::parse("peer north =~ /stone well/").unwrap();
        match peer(&port, &d, &quick()) {
            PeerOutcome::Lines(lines) => {
                assert_eq!(lines.len(), 3);
                assert_eq!(lines[2], "Obvious paths: south");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(*port.sent.lock().unwrap(), vec!["peer north"]);
    }

    #[test]
    fn refusal_and_timeout_are_not_matches() {
        let d = PeerDirective::parse("peer west =~ /x/").unwrap();
        let refused = ScriptedPort::new(&["[Usage: PEER <direction>]"]);
        assert_eq!(peer(&refused, &d, &quick()), PeerOutcome::Refused);
        let silent = ScriptedPort::new(&[]);
        assert_eq!(peer(&silent, &d, &quick()), PeerOutcome::Timeout);
    }

    #[test]
    fn history_probes_once_per_direction() {
        let port = ScriptedPort::new(&["You peer east.", "A garden.", "Obvious paths: west"]);
        let mut history = PeerHistory::new();
        let garden = PeerDirective::parse("peer east =~ /garden/").unwrap();
        let fountain = PeerDirective::parse("peer east =~ /fountain/").unwrap();
        assert!(history.satisfied(&port, 7, &garden, &quick()));
        assert!(!history.satisfied(&port, 7, &fountain, &quick()));
        assert_eq!(port.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn set_desc_prefix_toggles_descriptions() {
        let port = ScriptedPort::new(&["You peer up.", "Obvious exits: down"]);
        let d = PeerDirective::parse("set desc on; peer up =~ /down/").unwrap();
        assert!(matches!(peer(&port, &d, &quick()), PeerOutcome::Lines(_)));
        assert_eq!(
            *port.sent.lock().unwrap(),
            vec!["set description on", "peer up", "set description off"]
        );
    }
}
