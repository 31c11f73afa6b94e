#![allow(dead_code)]

//! Test utilities & fixtures shared by the integration tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use mapdb::map::{GamePort, Room, RoomSignals};

/// Scripted game connection. Each `signals()` call consumes the next
/// snapshot; the last one repeats forever. Lines queued with `reply` are
/// handed out by `read_next_line` in order.
pub struct FakePort {
    signals: Mutex<VecDeque<RoomSignals>>,
    lines: Mutex<VecDeque<String>>,
    sent: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl FakePort {
    pub fn new(signals: Vec<RoomSignals>) -> Self {
        Self {
            signals: Mutex::new(signals.into()),
            lines: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn showing(signals: RoomSignals) -> Self {
        Self::new(vec![signals])
    }

    pub fn reply(self, lines: &[&str]) -> Self {
        self.lines
            .lock()
            .unwrap()
            .extend(lines.iter().map(|s| s.to_string()));
        self
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

impl GamePort for FakePort {
    fn send_command(&self, text: &str) {
        self.sent.lock().unwrap().push(text.to_string());
    }

    fn read_next_line(&self, _timeout: Duration) -> Option<String> {
        self.lines.lock().unwrap().pop_front()
    }

    fn signals(&self) -> RoomSignals {
        let mut queue = self.signals.lock().unwrap();
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap_or_default()
        }
    }
}

/// A small town: square (1) <-> gate (2) <-> road (3), plus a shop (4) off
/// the square and a bank (5) reachable only through the shop.
#[allow(dead_code)]
pub fn town() -> Vec<Room> {
    let mut square = Room::observed(1, "[Town Square]", "A busy square. Vendors shout.", "Obvious paths: north, east");
    square.connect(2, "north", 1.0).connect(4, "go shop", 0.5);
    square.uid = vec![7001];
    square.tags = vec!["town".into()];

    let mut gate = Room::observed(2, "[North Gate]", "A heavy gate.", "Obvious paths: south, north");
    gate.connect(1, "south", 1.0).connect(3, "north", 2.0);
    gate.uid = vec![7002];

    let mut road = Room::observed(3, "[Old Road]", "A dusty road.", "Obvious paths: south");
    road.connect(2, "south", 2.0);
    road.tags = vec!["road".into()];

    let mut shop = Room::observed(4, "[Pawnshop]", "Dusty shelves.", "Obvious exits: out, back");
    shop.connect(1, "out", 0.5).connect(5, "go back", 3.0);
    shop.tags = vec!["pawnshop".into()];

    let mut bank = Room::observed(5, "[Bank]", "Marble floors.", "Obvious exits: out");
    bank.connect(4, "out", 3.0);
    bank.tags = vec!["bank".into(), "town".into()];

    vec![square, gate, road, shop, bank]
}
