mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use common::FakePort;
use mapdb::map::{
    DragonRealms, FileStore, GamePort, GemStone, MapDatabase, MatchSettings, ProbeSettings, Room,
    RoomGraph, RoomMatcher, RoomSignals, TAG_LATEST_ONLY, TAG_PLAYERSHOP, TAG_RANDOM_PATHS,
};
use tempfile::TempDir;

const SURVEY: &str = "You carefully survey your surroundings and guess that your current location is {} or somewhere close to it.";

fn survey(location: &str) -> String {
    SURVEY.replace("{}", location)
}

fn gs(rooms: Vec<Room>) -> RoomMatcher {
    RoomMatcher::new(
        Arc::new(MapDatabase::with_graph(RoomGraph::from_rooms(rooms))),
        Arc::new(GemStone),
    )
}

fn dr(rooms: Vec<Room>) -> RoomMatcher {
    RoomMatcher::new(
        Arc::new(MapDatabase::with_graph(RoomGraph::from_rooms(rooms))),
        Arc::new(DragonRealms),
    )
}

#[test]
fn dark_cave_exact_match() {
    let cave = Room::observed(0, "A dark cave", "It is dark.", "Obvious paths: north.");
    let matcher = dr(vec![cave]);
    let port = FakePort::showing(RoomSignals::new("A dark cave", "It is dark.", "Obvious paths: north.", 1));
    assert_eq!(matcher.current(&port), Some(0));
}

#[test]
fn shared_uid_follows_the_previous_room() {
    let mut rooms = common::town();
    let mut twin_a = Room::observed(6, "[Alley]", "Narrow.", "Obvious paths: west");
    twin_a.uid = vec![42];
    let mut twin_b = Room::observed(7, "[Alley]", "Narrow.", "Obvious paths: west");
    twin_b.uid = vec![42];
    rooms[2].connect(7, "east", 1.0);
    rooms.push(twin_a);
    rooms.push(twin_b);
    let matcher = gs(rooms);

    let port = FakePort::new(vec![
        RoomSignals::new("[Old Road]", "A dusty road.", "Obvious paths: south", 1),
    ]);
    assert_eq!(matcher.current(&port), Some(3));
    let port = FakePort::showing(RoomSignals::new("[Alley]", "Narrow.", "Obvious paths: west", 2).with_uid(42));
    assert_eq!(matcher.current(&port), Some(7));
}

#[test]
fn single_uid_hit_beats_text() {
    let matcher = gs(common::town());
    // Text says Bank, but the server UID is the gate's.
    let port = FakePort::showing(RoomSignals::new("[Bank]", "Marble floors.", "Obvious exits: out", 3).with_uid(7002));
    assert_eq!(matcher.current(&port), Some(2));
}

#[test]
fn transient_uids_are_ignored() {
    let matcher = gs(common::town());
    let port = FakePort::showing(
        RoomSignals::new("[Bank]", "Marble floors.", "Obvious exits: out", 3).with_uid(1 << 40),
    );
    assert_eq!(matcher.current(&port), Some(5));
}

#[test]
fn result_reflects_signals_after_a_move() {
    let matcher = dr(common::town());
    let port = FakePort::new(vec![
        RoomSignals::new("[Town Square]", "A busy square. Vendors shout.", "Obvious paths: north, east", 10),
        RoomSignals::new("[North Gate]", "A heavy gate.", "Obvious paths: south, north", 11),
    ]);
    assert_eq!(matcher.current(&port), Some(2));
    assert_eq!(matcher.database().position().current_count, Some(11));
}

#[test]
fn peer_probe_with_description_toggle() {
    let mut upper = Room::observed(1, "[Tunnel]", "A tunnel.", "Obvious exits: north");
    upper.tags.push("set desc on; peer north =~ /^\\[Chasm\\]/".into());
    let mut lower = Room::observed(2, "[Tunnel]", "A tunnel.", "Obvious exits: north");
    lower.tags.push("set desc on; peer north =~ /^\\[Grotto\\]/".into());
    let matcher = dr(vec![Room::new(0), upper, lower]);

    let port = FakePort::showing(RoomSignals::new("[Tunnel]", "A tunnel.", "Obvious exits: north", 5))
        .reply(&["You peer north.", "[Grotto]", "Glowing moss.", "Obvious exits: south"]);
    assert_eq!(matcher.current(&port), Some(2));
    assert_eq!(
        port.sent(),
        vec!["set description on", "peer north", "set description off"]
    );
}

#[test]
fn peer_timeout_is_no_match() {
    let mut room = Room::observed(1, "[Tunnel]", "A tunnel.", "Obvious exits: north");
    room.tags.push("peer north =~ /Chasm/".into());
    let matcher = dr(vec![Room::new(0), room]);
    let port = FakePort::showing(RoomSignals::new("[Tunnel]", "A tunnel.", "Obvious exits: north", 5));
    assert_eq!(matcher.current(&port), None);
    assert_eq!(port.sent(), vec!["peer north"]);
}

/// Connection whose server output is held back until the test releases it.
struct HeldPort {
    inner: FakePort,
    reading: Mutex<Sender<()>>,
    released: Mutex<Receiver<String>>,
}

impl GamePort for HeldPort {
    fn send_command(&self, text: &str) {
        self.inner.send_command(text);
    }

    fn read_next_line(&self, timeout: Duration) -> Option<String> {
        let _ = self.reading.lock().unwrap().send(());
        self.released.lock().unwrap().recv_timeout(timeout).ok()
    }

    fn signals(&self) -> RoomSignals {
        self.inner.signals()
    }
}

#[test]
fn passive_resolution_runs_while_a_peer_is_waiting() {
    let mut tunnel = Room::observed(1, "[Tunnel]", "A tunnel.", "Obvious exits: north");
    tunnel.tags.push("peer north =~ /Chasm/".into());
    let hall = Room::observed(2, "[Hall]", "A long hall.", "Obvious exits: south");
    let settings = MatchSettings {
        probe: ProbeSettings {
            peer_timeout: Duration::from_secs(30),
            ..ProbeSettings::default()
        },
        ..MatchSettings::default()
    };
    let matcher = dr(vec![Room::new(0), tunnel, hall]).with_settings(settings);

    let (reading_tx, reading_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let held = HeldPort {
        inner: FakePort::showing(RoomSignals::new("[Tunnel]", "A tunnel.", "Obvious exits: north", 8)),
        reading: Mutex::new(reading_tx),
        released: Mutex::new(release_rx),
    };
    let hall_view = FakePort::showing(RoomSignals::new("[Hall]", "A long hall.", "Obvious exits: south", 9));
    let foreground_done = AtomicBool::new(false);

    thread::scope(|s| {
        let foreground = s.spawn(|| {
            let found = matcher.current(&held);
            foreground_done.store(true, Ordering::SeqCst);
            found
        });

        // The foreground call is now blocked inside its peer.
        reading_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(matcher.current_passive(&hall_view), Some(2));
        assert!(!foreground_done.load(Ordering::SeqCst));
        assert!(hall_view.sent().is_empty());

        for line in ["You peer north.", "[Chasm]", "Obvious exits: south"] {
            release_tx.send(line.to_string()).unwrap();
        }
        assert_eq!(foreground.join().unwrap(), Some(1));
    });
    assert_eq!(held.inner.sent(), vec!["peer north"]);
}

#[test]
fn special_tags_relax_matching() {
    let mut maze = Room::observed(1, "[Maze]", "Hedges.", "Obvious paths: north");
    maze.add_tag(TAG_RANDOM_PATHS);
    let mut shop = Room::observed(2, "[Sally's Shop]", "Owner text v1.", "Obvious exits: out");
    shop.add_tag(TAG_PLAYERSHOP);
    let matcher = dr(vec![maze, shop]);

    let port = FakePort::showing(RoomSignals::new("[Maze]", "Hedges.", "Obvious paths: east, west", 1));
    assert_eq!(matcher.current(&port), Some(1));
    let port = FakePort::showing(RoomSignals::new("[Sally's Shop]", "Owner text v2!", "Obvious exits: out", 2));
    assert_eq!(matcher.current(&port), Some(2));
}

#[test]
fn check_location_uses_the_survey() {
    let mut north = Room::observed(1, "[Forest]", "Trees.", "Obvious paths: north");
    north.location = Some("Wehnimer's Landing".into());
    north.check_location = true;
    let mut south = Room::observed(2, "[Forest]", "Trees.", "Obvious paths: north");
    south.location = Some("Solhaven".into());
    south.check_location = true;
    let matcher = gs(vec![north, south]);

    let port = FakePort::showing(RoomSignals::new("[Forest]", "Trees.", "Obvious paths: north", 8))
        .reply(&[&survey("Solhaven")]);
    assert_eq!(matcher.current(&port), Some(2));
    assert_eq!(port.sent(), vec!["location"]);
}

#[test]
fn new_twin_in_another_location_flags_both() {
    let mut known = Room::observed(1, "[Forest]", "Trees.", "Obvious paths: north");
    known.location = Some("Wehnimer's Landing".into());
    let matcher = gs(vec![Room::new(0), known]);

    let port = FakePort::showing(RoomSignals::new("[Forest]", "Trees.", "Obvious paths: north", 4))
        .reply(&[&survey("Icemule Trace")]);
    let id = matcher.current_or_new(&port).unwrap().unwrap();
    assert_eq!(id, 2);
    let db = matcher.database();
    assert!(db.get(1).unwrap().check_location);
    let created = db.get(2).unwrap();
    assert!(created.check_location);
    assert_eq!(created.location.as_deref(), Some("Icemule Trace"));
    // One survey for the whole resolution.
    assert_eq!(port.sent(), vec!["location"]);
}

#[test]
fn observations_are_recorded_and_saved() {
    let dir = TempDir::new().unwrap();
    let mut rooms = common::town();
    rooms[4].add_tag(TAG_LATEST_ONLY);
    rooms[4].uid = vec![8000];
    let db = Arc::new(MapDatabase::preloaded(FileStore::new(dir.path()), RoomGraph::from_rooms(rooms)));
    let matcher = RoomMatcher::new(db.clone(), Arc::new(GemStone));

    let port = FakePort::showing(
        RoomSignals::new("[Bank]", "Marble floors, freshly polished.", "Obvious exits: out", 20).with_uid(8001),
    );
    // Description differs, so nothing matches and a room is created.
    assert_eq!(matcher.current_or_new(&port).unwrap(), Some(6));

    let port = FakePort::showing(RoomSignals::new("[Bank]", "Marble floors.", "Obvious exits: out", 21).with_uid(8002));
    assert_eq!(matcher.current_or_new(&port).unwrap(), Some(5));
    let bank = db.get(5).unwrap();
    assert_eq!(bank.uid, vec![8002]);
    assert!(db.read().ids_from_uid(8000).is_empty());
    assert_eq!(db.read().ids_from_uid(8002), &[5]);

    db.save().unwrap();
    let reopened = MapDatabase::new(FileStore::new(dir.path()));
    assert_eq!(reopened.load().unwrap(), 6);
    assert_eq!(reopened.read().ids_from_uid(8001), &[6]);
}
