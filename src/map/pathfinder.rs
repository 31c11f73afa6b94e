//! Weighted shortest paths over the room graph.
//!
//! Edge weights come from `timeto`; deferred weights are resolved through
//! the host's [`ExpressionEvaluator`]. An edge whose weight is missing, null
//! or unresolvable is not traversed. Weights are assumed non-negative.

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::map::evaluator::{resolve_command, resolve_cost, ExpressionEvaluator};
use crate::map::graph::RoomGraph;
use crate::map::heap::MinHeap;
use crate::map::types::{EdgeValue, RoomId};

/// Multi-candidate searches stop at the first candidate popped under this distance.
pub const DEFAULT_NEAREST_CUTOFF: f64 = 20.0;
/// Cost assumed by [`Pathfinder::estimate_time`] for an edge with no weight.
pub const DEFAULT_MISSING_EDGE_COST: f64 = 0.2;

/// What a search is looking for.
#[derive(Debug, Clone)]
pub enum Destination {
    /// Full single-source shortest-path tree.
    All,
    /// Stop as soon as this room is settled.
    Room(RoomId),
    /// Nearest member of a set.
    AnyOf(HashSet<RoomId>),
}

/// Output of one Dijkstra run: predecessor and distance per room id.
#[derive(Debug, Clone)]
pub struct ShortestPaths {
    source: RoomId,
    previous: HashMap<RoomId, RoomId>,
    distance: HashMap<RoomId, f64>,
}

impl ShortestPaths {
    fn new(source: RoomId) -> Self {
        let mut paths = Self {
            source,
            previous: HashMap::new(),
            distance: HashMap::new(),
        };
        paths.set(source, 0.0, None);
        paths
    }

    fn set(&mut self, id: RoomId, distance: f64, previous: Option<RoomId>) {
        self.distance.insert(id, distance);
        match previous {
            Some(prev) => self.previous.insert(id, prev),
            None => self.previous.remove(&id),
        };
    }

    pub fn source(&self) -> RoomId {
        self.source
    }

    pub fn distance(&self, id: RoomId) -> Option<f64> {
        self.distance.get(&id).copied()
    }

    pub fn previous(&self, id: RoomId) -> Option<RoomId> {
        self.previous.get(&id).copied()
    }

    /// Room ids from the step after the source up to and including `destination`.
    pub fn path_to(&self, destination: RoomId) -> Option<Vec<RoomId>> {
        if destination == self.source {
            return Some(Vec::new());
        }
        let mut path = vec![destination];
        let mut current = destination;
        loop {
            let prev = self.previous(current)?;
            if prev == self.source {
                break;
            }
            path.push(prev);
            current = prev;
        }
        path.reverse();
        Some(path)
    }
}

/// Dijkstra and the queries built on it, over one borrowed graph.
pub struct Pathfinder<'a> {
    graph: &'a RoomGraph,
    evaluator: &'a dyn ExpressionEvaluator,
    nearest_cutoff: f64,
    missing_edge_cost: f64,
}

impl<'a> Pathfinder<'a> {
    pub fn new(graph: &'a RoomGraph, evaluator: &'a dyn ExpressionEvaluator) -> Self {
        Self {
            graph,
            evaluator,
            nearest_cutoff: DEFAULT_NEAREST_CUTOFF,
            missing_edge_cost: DEFAULT_MISSING_EDGE_COST,
        }
    }

    pub fn with_nearest_cutoff(mut self, cutoff: f64) -> Self {
        self.nearest_cutoff = cutoff;
        self
    }

    pub fn with_missing_edge_cost(mut self, cost: f64) -> Self {
        self.missing_edge_cost = cost;
        self
    }

    fn edge_weight(&self, from: RoomId, key: &str) -> Option<f64> {
        let room = self.graph.get(from)?;
        let cost = room.timeto.get(key)?.as_ref()?;
        resolve_cost(cost, self.evaluator)
    }

    pub fn dijkstra(&self, source: RoomId, destination: &Destination) -> ShortestPaths {
        let mut paths = ShortestPaths::new(source);
        let mut visited: HashSet<RoomId> = HashSet::new();
        let mut heap = MinHeap::with_capacity(64);
        heap.push(0.0, source);

        while let Some((dist, v)) = heap.pop() {
            if !visited.insert(v) {
                continue;
            }
            match destination {
                Destination::Room(target) if *target == v => break,
                Destination::AnyOf(targets)
                    if targets.contains(&v) && dist < self.nearest_cutoff =>
                {
                    break
                }
                _ => {}
            }
            let Some(room) = self.graph.get(v) else {
                continue;
            };
            for key in room.wayto.keys() {
                let Ok(w) = key.parse::<RoomId>() else {
                    continue;
                };
                if visited.contains(&w) {
                    continue;
                }
                let Some(weight) = self.edge_weight(v, key) else {
                    continue;
                };
                let candidate = dist + weight;
                if paths.distance(w).map_or(true, |known| candidate < known) {
                    paths.set(w, candidate, Some(v));
                    heap.push(candidate, w);
                }
            }
        }
        paths
    }

    /// Rooms to walk through from `source` to `destination`, excluding the
    /// source. `None` when unreachable.
    pub fn path_to(&self, source: RoomId, destination: RoomId) -> Option<Vec<RoomId>> {
        let path = self
            .dijkstra(source, &Destination::Room(destination))
            .path_to(destination);
        if path.is_none() {
            debug!("no path from {} to {}", source, destination);
        }
        path
    }

    /// Sum of edge weights along `path`, with a default for missing edges.
    pub fn estimate_time(&self, path: &[RoomId]) -> f64 {
        path.windows(2)
            .map(|pair| {
                let key = pair[1].to_string();
                match self.graph.get(pair[0]).and_then(|r| r.timeto.get(&key)) {
                    Some(Some(EdgeValue::Literal(cost))) => *cost,
                    Some(Some(EdgeValue::Expression(expr))) => {
                        self.evaluator.cost(expr).unwrap_or(0.0)
                    }
                    _ => self.missing_edge_cost,
                }
            })
            .sum()
    }

    /// Movement command for each step of `path`, which starts at the room
    /// the walker is standing in. `None` if any step has no usable command.
    pub fn commands_for(&self, path: &[RoomId]) -> Option<Vec<String>> {
        path.windows(2)
            .map(|pair| {
                let command = self.graph.get(pair[0])?.wayto.get(&pair[1].to_string())?;
                let resolved = resolve_command(command, self.evaluator);
                if resolved.is_none() {
                    debug!("no command from {} to {}", pair[0], pair[1]);
                }
                resolved
            })
            .collect()
    }

    /// Closest of `candidates`; the source itself wins if listed.
    pub fn find_nearest(&self, source: RoomId, candidates: &[RoomId]) -> Option<RoomId> {
        if candidates.contains(&source) {
            return Some(source);
        }
        let set: HashSet<RoomId> = candidates.iter().copied().collect();
        let paths = self.dijkstra(source, &Destination::AnyOf(set));
        Self::by_distance(&paths, candidates).into_iter().next()
    }

    pub fn find_nearest_by_tag(&self, source: RoomId, tag: &str) -> Option<RoomId> {
        let candidates = self.graph.ids_with_tag(tag);
        self.find_nearest(source, &candidates)
    }

    /// Every reachable room with `tag`, nearest first.
    pub fn find_all_nearest_by_tag(&self, source: RoomId, tag: &str) -> Vec<RoomId> {
        let candidates = self.graph.ids_with_tag(tag);
        let paths = self.dijkstra(source, &Destination::All);
        Self::by_distance(&paths, &candidates)
    }

    fn by_distance(paths: &ShortestPaths, candidates: &[RoomId]) -> Vec<RoomId> {
        let mut reachable: Vec<(RoomId, f64)> = candidates
            .iter()
            .filter_map(|id| paths.distance(*id).map(|d| (*id, d)))
            .collect();
        reachable.sort_by(|a, b| a.1.total_cmp(&b.1));
        reachable.into_iter().map(|(id, _)| id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::evaluator::{NoEvaluator, StaticEvaluator};
    use crate::map::types::{Command, Cost, Room};

    fn line_graph() -> RoomGraph {
        // 1 -> 2 -> 3 -> 4, plus a costly shortcut 1 -> 4
        let mut r1 = Room::new(1);
        r1.connect(2, "east", 1.0).connect(4, "go portal", 10.0);
        let mut r2 = Room::new(2);
        r2.connect(3, "east", 1.0);
        let mut r3 = Room::new(3);
        r3.connect(4, "east", 1.0);
        let r4 = Room::new(4);
        RoomGraph::from_rooms(vec![r1, r2, r3, r4])
    }

    #[test]
    fn prefers_cheaper_longer_route() {
        let graph = line_graph();
        let finder = Pathfinder::new(&graph, &NoEvaluator);
        assert_eq!(finder.path_to(1, 4), Some(vec![2, 3, 4]));
        let paths = finder.dijkstra(1, &Destination::All);
        assert_eq!(paths.distance(4), Some(3.0));
        assert_eq!(paths.previous(4), Some(3));
        assert_eq!(finder.estimate_time(&[1, 2, 3, 4]), 3.0);
    }

    #[test]
    fn same_room_is_an_empty_path() {
        let graph = line_graph();
        let finder = Pathfinder::new(&graph, &NoEvaluator);
        assert_eq!(finder.path_to(2, 2), Some(vec![]));
        assert_eq!(finder.path_to(4, 1), None);
    }

    #[test]
    fn deferred_weights_need_an_evaluator() {
        let mut r1 = Room::new(1);
        r1.connect(2, "north", 1.0);
        r1.wayto.insert("3".into(), "climb".into());
        r1.timeto.insert("3".into(), Some(Cost::expression("climb_cost")));
        let graph = RoomGraph::from_rooms(vec![r1, Room::new(2), Room::new(3)]);

        let blind = Pathfinder::new(&graph, &NoEvaluator);
        assert_eq!(blind.path_to(1, 3), None);

        let eval = StaticEvaluator::new().with_cost("climb_cost", 4.0);
        let finder = Pathfinder::new(&graph, &eval);
        assert_eq!(finder.path_to(1, 3), Some(vec![3]));
        assert_eq!(finder.estimate_time(&[1, 3]), 4.0);
    }

    #[test]
    fn commands_follow_the_walk() {
        let mut r1 = Room::new(1);
        r1.connect(2, "north", 1.0);
        let mut r2 = Room::new(2);
        r2.wayto.insert("3".into(), Command::expression("ferry_route"));
        r2.timeto.insert("3".into(), Some(Cost::from(5.0)));
        let graph = RoomGraph::from_rooms(vec![r1, r2, Room::new(3)]);

        let blind = Pathfinder::new(&graph, &NoEvaluator);
        assert_eq!(blind.commands_for(&[1, 2]), Some(vec!["north".to_string()]));
        assert_eq!(blind.commands_for(&[1, 2, 3]), None);

        let eval = StaticEvaluator::new().with_command("ferry_route", "board ferry");
        let finder = Pathfinder::new(&graph, &eval);
        let mut walk = vec![1];
        walk.extend(finder.path_to(1, 3).unwrap());
        assert_eq!(
            finder.commands_for(&walk),
            Some(vec!["north".to_string(), "board ferry".to_string()])
        );
        assert_eq!(finder.commands_for(&[1]), Some(vec![]));
        assert_eq!(finder.commands_for(&[1, 3]), None);
    }

    #[test]
    fn huge_ids_do_not_grow_the_tables() {
        let mut r1 = Room::new(1);
        r1.connect(RoomId::MAX, "jump", 2.0);
        let graph = RoomGraph::from_rooms(vec![r1, Room::new(RoomId::MAX)]);
        let finder = Pathfinder::new(&graph, &NoEvaluator);
        let paths = finder.dijkstra(1, &Destination::All);
        assert_eq!(paths.distance(RoomId::MAX), Some(2.0));
        assert_eq!(paths.previous(RoomId::MAX), Some(1));
        assert_eq!(finder.path_to(1, RoomId::MAX), Some(vec![RoomId::MAX]));
    }

    #[test]
    fn null_costs_are_not_traversed_but_estimate_uses_default() {
        let mut r1 = Room::new(1);
        r1.wayto.insert("2".into(), "go door".into());
        r1.timeto.insert("2".into(), None);
        let graph = RoomGraph::from_rooms(vec![r1, Room::new(2)]);
        let finder = Pathfinder::new(&graph, &NoEvaluator);
        assert_eq!(finder.path_to(1, 2), None);
        assert!((finder.estimate_time(&[1, 2]) - 0.2).abs() < 1e-9);
        assert_eq!(finder.estimate_time(&[1]), 0.0);
    }

    #[test]
    fn nearest_by_tag() {
        let mut graph = line_graph();
        graph.get_mut(3).unwrap().add_tag("bank");
        graph.get_mut(4).unwrap().add_tag("bank");
        let finder = Pathfinder::new(&graph, &NoEvaluator);
        assert_eq!(finder.find_nearest_by_tag(1, "bank"), Some(3));
        assert_eq!(finder.find_nearest_by_tag(4, "bank"), Some(4));
        assert_eq!(finder.find_all_nearest_by_tag(1, "bank"), vec![3, 4]);
        assert_eq!(finder.find_nearest_by_tag(1, "inn"), None);
        assert_eq!(finder.find_nearest(1, &[4, 2]), Some(2));
    }

    #[test]
    fn far_candidates_are_still_found() {
        let mut r1 = Room::new(1);
        r1.connect(2, "long walk", 45.0);
        let graph = RoomGraph::from_rooms(vec![r1, Room::new(2)]);
        let finder = Pathfinder::new(&graph, &NoEvaluator);
        assert_eq!(finder.find_nearest(1, &[2]), Some(2));
    }
}
