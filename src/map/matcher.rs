//! Resolving "which room am I in" from live game signals.
//!
//! Resolution tries, in order: the cached answer for the current transition
//! counter, the server UID, an exact text match (with location and peer
//! probes where a room asks for them), and for passive callers a fuzzy
//! description match. Every attempt re-reads the transition counter when it
//! finishes; if the game moved on meanwhile the attempt is discarded and
//! retried, up to `max_restarts` times.
//!
//! Foreground resolution may send probe commands and is serialised by its
//! own lock. Passive resolution never touches the network and uses a
//! separate lock, so the two never interleave probe traffic.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};

use crate::logutil::{describe_signals, escape_log};
use crate::map::database::MapDatabase;
use crate::map::errors::MapError;
use crate::map::graph::RoomGraph;
use crate::map::policy::GameMatchingPolicy;
use crate::map::port::{GamePort, RoomSignals};
use crate::map::probe::{PeerDirective, PeerHistory, ProbeSettings};
use crate::map::text;
use crate::map::types::{Room, RoomId, TAG_LATEST_ONLY, TAG_MULTI_UID, TAG_PLAYERSHOP, TAG_RANDOM_PATHS};

pub const DEFAULT_MAX_RESTARTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchSettings {
    /// Attempts allowed before a resolution racing the game gives up.
    pub max_restarts: u32,
    pub probe: ProbeSettings,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            max_restarts: DEFAULT_MAX_RESTARTS,
            probe: ProbeSettings::default(),
        }
    }
}

/// How far a resolution may go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Explicit request: probes allowed, no fuzzy fallback.
    Foreground,
    /// Explicit request that creates a room when nothing matches.
    Create,
    /// Background check: no probes, fuzzy fallback allowed.
    Passive,
}

/// A textual match collected under the read lock and checked after it is released.
#[derive(Debug, Clone)]
struct Candidate {
    id: RoomId,
    location: Option<String>,
    check_location: bool,
    peer: Option<PeerDirective>,
}

impl Candidate {
    fn of(room: &Room) -> Self {
        Self {
            id: room.id,
            location: room.location.clone(),
            check_location: room.check_location,
            peer: room.peer_directive(),
        }
    }
}

pub struct RoomMatcher {
    db: Arc<MapDatabase>,
    policy: Arc<dyn GameMatchingPolicy>,
    settings: MatchSettings,
    foreground: Mutex<()>,
    background: Mutex<()>,
    /// Location survey result and the transition counter it belongs to.
    location: Mutex<Option<(u64, Option<String>)>>,
    window_warned: Mutex<Option<u64>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RoomMatcher {
    pub fn new(db: Arc<MapDatabase>, policy: Arc<dyn GameMatchingPolicy>) -> Self {
        Self {
            db,
            policy,
            settings: MatchSettings::default(),
            foreground: Mutex::new(()),
            background: Mutex::new(()),
            location: Mutex::new(None),
            window_warned: Mutex::new(None),
        }
    }

    pub fn with_settings(mut self, settings: MatchSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn database(&self) -> &Arc<MapDatabase> {
        &self.db
    }

    pub fn policy(&self) -> &dyn GameMatchingPolicy {
        self.policy.as_ref()
    }

    /// Foreground resolution. May send probe commands through `port`.
    pub fn current(&self, port: &dyn GamePort) -> Option<RoomId> {
        let _guard = lock(&self.foreground);
        self.resolve(port, Mode::Foreground).unwrap_or_else(|e| {
            warn!("room resolution failed: {}", e);
            None
        })
    }

    /// Background resolution: never probes, falls back to fuzzy descriptions.
    pub fn current_passive(&self, port: &dyn GamePort) -> Option<RoomId> {
        let _guard = lock(&self.background);
        self.resolve(port, Mode::Passive).unwrap_or_else(|e| {
            warn!("passive room resolution failed: {}", e);
            None
        })
    }

    /// Foreground resolution that records what it sees, creating a room
    /// when nothing matches. Errors only if a new id cannot be allocated.
    pub fn current_or_new(&self, port: &dyn GamePort) -> Result<Option<RoomId>, MapError> {
        let _guard = lock(&self.foreground);
        self.resolve(port, Mode::Create)
    }

    fn resolve(&self, port: &dyn GamePort, mode: Mode) -> Result<Option<RoomId>, MapError> {
        self.db.ensure_loaded();
        let mut peers = PeerHistory::new();

        for attempt in 1..=self.settings.max_restarts {
            let signals = port.signals();
            let count = signals.transition_count;
            if signals.room_window_disabled {
                self.warn_window_disabled(count);
                return Ok(None);
            }

            let position = self.db.position();
            if position.current_count == Some(count) && position.current.is_some() {
                return Ok(position.current);
            }
            if mode == Mode::Passive && position.fuzzy_count == Some(count) {
                return Ok(position.fuzzy);
            }

            debug!("resolving {} (attempt {})", describe_signals(&signals), attempt);
            let found = match mode {
                Mode::Passive => self.identify_passive(&signals, position.current),
                _ => self.identify(port, &signals, position.current, mode, &mut peers),
            };
            if self.stale(port, count) {
                continue;
            }

            let id = match (found, mode) {
                (Some(id), Mode::Create) => {
                    self.record_observation(id, &signals);
                    id
                }
                (Some(id), _) => id,
                (None, Mode::Create) => {
                    let location = self.location_for(port, count);
                    if self.stale(port, count) {
                        continue;
                    }
                    self.create_room(&signals, location)?
                }
                (None, Mode::Passive) => {
                    self.db.set_fuzzy(None, count);
                    return Ok(None);
                }
                (None, Mode::Foreground) => return Ok(None),
            };

            if mode == Mode::Passive {
                self.db.set_fuzzy(Some(id), count);
            } else {
                self.db.set_current(id, count);
            }
            return Ok(Some(id));
        }

        warn!(
            "room kept changing; gave up after {} attempts",
            self.settings.max_restarts
        );
        Ok(None)
    }

    fn stale(&self, port: &dyn GamePort, count: u64) -> bool {
        let now = port.room_transition_count();
        if now != count {
            debug!("room changed during resolution ({} -> {}), restarting", count, now);
            return true;
        }
        false
    }

    fn warn_window_disabled(&self, count: u64) {
        let mut warned = lock(&self.window_warned);
        if *warned != Some(count) {
            warn!("room window is disabled; rooms cannot be identified until it is turned back on");
            *warned = Some(count);
        }
    }

    /// Location for this transition counter, surveying at most once per counter.
    fn location_for(&self, port: &dyn GamePort, count: u64) -> Option<String> {
        if !self.policy.supports_location() {
            return None;
        }
        if let Some(known) = self.cached_location(count) {
            return known;
        }
        let surveyed = self.policy.location_probe(port, &self.settings.probe);
        *lock(&self.location) = Some((count, surveyed.clone()));
        surveyed
    }

    /// `Some(answer)` if a survey already ran for `count`.
    fn cached_location(&self, count: u64) -> Option<Option<String>> {
        match lock(&self.location).as_ref() {
            Some((seen, location)) if *seen == count => Some(location.clone()),
            _ => None,
        }
    }

    /// Unique room for a trusted UID, using the previous room's exits to
    /// break ties between rooms sharing it.
    fn by_uid(&self, graph: &RoomGraph, signals: &RoomSignals, previous: Option<RoomId>) -> Option<RoomId> {
        let uid = self.policy.usable_uid(signals.uid)?;
        match graph.ids_from_uid(uid) {
            [] => None,
            [only] => Some(*only),
            ids => {
                let prev = previous.and_then(|p| graph.get(p))?;
                let mut adjacent = ids.iter().copied().filter(|id| prev.is_neighbor(*id));
                match (adjacent.next(), adjacent.next()) {
                    (Some(id), None) => Some(id),
                    _ => {
                        debug!("u{} is shared by {:?}; falling back to text", uid, ids);
                        None
                    }
                }
            }
        }
    }

    fn text_candidates<F>(&self, graph: &RoomGraph, signals: &RoomSignals, description_ok: F) -> Vec<Candidate>
    where
        F: Fn(&Room) -> bool,
    {
        let title = signals.title.trim();
        let exits = signals.exits.trim();
        let foggy = text::exits_obscured(exits);
        graph
            .iter()
            .filter(|r| r.title.iter().any(|t| t == title))
            .filter(|r| r.has_tag(TAG_PLAYERSHOP) || description_ok(*r))
            .filter(|r| foggy || r.has_tag(TAG_RANDOM_PATHS) || r.paths.iter().any(|p| p == exits))
            .filter(|r| !self.policy.loot_conflict(*r, &signals.visible_loot))
            .map(Candidate::of)
            .collect()
    }

    fn exact_candidates(&self, graph: &RoomGraph, signals: &RoomSignals) -> Vec<Candidate> {
        let description = signals.description.trim();
        self.text_candidates(graph, signals, |r| r.description.iter().any(|d| d == description))
    }

    fn identify(
        &self,
        port: &dyn GamePort,
        signals: &RoomSignals,
        previous: Option<RoomId>,
        mode: Mode,
        peers: &mut PeerHistory,
    ) -> Option<RoomId> {
        let candidates = {
            let graph = self.db.read();
            if let Some(id) = self.by_uid(&graph, signals, previous) {
                return Some(id);
            }
            self.exact_candidates(&graph, signals)
        };
        let count = signals.transition_count;

        for candidate in candidates {
            // A resolve-or-create must not settle for a twin recorded elsewhere.
            let location_matters = candidate.check_location
                || (mode == Mode::Create && candidate.location.is_some() && self.policy.supports_location());
            if location_matters && self.location_for(port, count) != candidate.location {
                continue;
            }
            if let Some(directive) = &candidate.peer {
                if !peers.satisfied(port, count, directive, &self.settings.probe) {
                    continue;
                }
            }
            return Some(candidate.id);
        }
        None
    }

    fn identify_passive(&self, signals: &RoomSignals, previous: Option<RoomId>) -> Option<RoomId> {
        let graph = self.db.read();
        if let Some(id) = self.by_uid(&graph, signals, previous) {
            return Some(id);
        }
        let count = signals.transition_count;

        let exact = self.exact_candidates(&graph, signals);
        let fuzzy = || {
            let pattern = text::fuzzy_description(&signals.description)?;
            let found = self.text_candidates(&graph, signals, |r| {
                r.description.iter().any(|d| pattern.is_match(d))
            });
            Some(found)
        };
        let candidates = if exact.is_empty() {
            fuzzy().unwrap_or_default()
        } else {
            exact
        };

        for candidate in candidates {
            if candidate.peer.is_some() {
                debug!("#{} needs a peer probe; not resolving passively", candidate.id);
                return None;
            }
            if candidate.check_location {
                match self.cached_location(count) {
                    Some(location) if location == candidate.location => {}
                    _ => continue,
                }
            }
            return Some(candidate.id);
        }
        None
    }

    /// Fold what the game shows into the matched room.
    fn record_observation(&self, id: RoomId, signals: &RoomSignals) {
        let uid = self.policy.usable_uid(signals.uid);
        let location = self.cached_location(signals.transition_count).flatten();
        let mut graph = self.db.write();
        let Some(room) = graph.get_mut(id) else {
            return;
        };

        let mut reindex = false;
        if let Some(uid) = uid {
            if room.uid.contains(&uid) {
                // already known
            } else if room.uid.is_empty() || room.has_tag(TAG_MULTI_UID) || room.has_tag(TAG_LATEST_ONLY) {
                reindex = room.has_tag(TAG_LATEST_ONLY) && !room.uid.is_empty();
                room.attach_uid(uid);
                info!("#{} now answers to u{}", id, uid);
            } else {
                warn!(
                    "#{} already has uid {:?}; not recording u{} (tag it {} if this is expected)",
                    id, room.uid, uid, TAG_MULTI_UID
                );
            }
        }
        if room.has_tag(TAG_PLAYERSHOP) {
            room.observe(&signals.title, "", &signals.exits);
        } else {
            room.observe(&signals.title, &signals.description, &signals.exits);
        }
        if room.location.is_none() {
            room.location = location;
        }

        if reindex {
            graph.rebuild_uid_index();
        } else if let Some(uid) = uid {
            if graph.get(id).map_or(false, |r| r.uid.contains(&uid)) {
                graph.add_uid(uid, id);
            }
        }
    }

    fn create_room(&self, signals: &RoomSignals, location: Option<String>) -> Result<RoomId, MapError> {
        let mut graph = self.db.write();
        let id = graph.allocate_next_id()?;
        let mut room = Room::observed(id, &signals.title, &signals.description, &signals.exits);
        if let Some(uid) = self.policy.usable_uid(signals.uid) {
            room.attach_uid(uid);
        }
        room.location = location;

        if room.location.is_some() {
            let twins: Vec<RoomId> = graph
                .iter()
                .filter(|r| r.location != room.location && same_text(r, &room))
                .map(|r| r.id)
                .collect();
            if !twins.is_empty() {
                debug!("#{} has textual twins {:?} in other locations", id, twins);
                for twin in twins {
                    if let Some(r) = graph.get_mut(twin) {
                        r.check_location = true;
                    }
                }
                room.check_location = true;
            }
        }

        info!(
            "mapped new room #{}: {} ({})",
            id,
            escape_log(&signals.title),
            room.location.as_deref().unwrap_or("unknown location")
        );
        graph.insert(room);
        Ok(id)
    }
}

/// Whether `other` shows the same title, description and exits as `new`.
fn same_text(other: &Room, new: &Room) -> bool {
    let has = |list: &[String], value: Option<&String>| value.map_or(false, |v| list.contains(v));
    has(&other.title, new.title.first())
        && has(&other.description, new.description.first())
        && has(&other.paths, new.paths.first())
}
