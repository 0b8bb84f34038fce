//! The station graph: a circular main list of serial stations with parallel
//! siblings hanging off each node; GrandCentral is the sentinel at
//! position zero.

use crate::error::{EtError, EtResult};
use crate::ids::{GRANDCENTRAL, StationId};
use crate::station::{DistributionPolicy, Station};
use hashbrown::HashMap;
use indexmap::IndexMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A single position in the main ring: one or more parallel siblings
/// sharing that spot.
struct RingPosition {
    members: Vec<StationId>,
    was_last: AtomicUsize,
}

pub struct StationGraph {
    stations: HashMap<StationId, Arc<Station>>,
    /// Ring order, keyed by the position's first member so insertion/removal
    /// keeps a stable iteration order.
    ring: IndexMap<StationId, RingPosition>,
    next_id: StationId,
}

impl StationGraph {
    pub fn new(grandcentral: Arc<Station>) -> StationGraph {
        let mut stations = HashMap::new();
        stations.insert(GRANDCENTRAL, grandcentral);

        let mut ring = IndexMap::new();
        ring.insert(
            GRANDCENTRAL,
            RingPosition {
                members: vec![GRANDCENTRAL],
                was_last: AtomicUsize::new(0),
            },
        );

        StationGraph {
            stations,
            ring,
            next_id: StationId(1),
        }
    }

    pub fn allocate_id(&mut self) -> StationId {
        let id = self.next_id;
        self.next_id = StationId(id.0 + 1);
        id
    }

    pub fn get(&self, id: StationId) -> Option<&Arc<Station>> {
        self.stations.get(&id)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.stations.values().any(|s| s.name == name)
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    /// Inserts `station` as a new serial ring position immediately after
    /// `after`.
    pub fn insert_serial_after(&mut self, after: StationId, station: Arc<Station>) -> EtResult<()> {
        let position = self
            .ring
            .get_index_of(&after)
            .ok_or(EtError::BadArgument)?;

        self.stations.insert(station.id, station.clone());
        self.ring.shift_insert(
            position + 1,
            station.id,
            RingPosition {
                members: vec![station.id],
                was_last: AtomicUsize::new(0),
            },
        );
        Ok(())
    }

    /// Adds `station` as a parallel sibling sharing `existing`'s ring
    /// position.
    pub fn insert_parallel_sibling(&mut self, existing: StationId, station: Arc<Station>) -> EtResult<()> {
        let position = self
            .ring
            .get_index_of(&existing)
            .ok_or(EtError::BadArgument)?;

        self.stations.insert(station.id, station.clone());
        let (_, ring_position) = self
            .ring
            .get_index_mut(position)
            .expect("position index just resolved");
        ring_position.members.push(station.id);
        Ok(())
    }

    /// Removes a station. Only the graph topology is touched here; callers
    /// (the system layer) are responsible for having drained/killed the
    /// station's conductor first.
    pub fn remove(&mut self, id: StationId) -> EtResult<()> {
        if id == GRANDCENTRAL {
            return Err(EtError::BadArgument);
        }

        let position = self
            .ring
            .iter()
            .position(|(_, pos)| pos.members.contains(&id))
            .ok_or(EtError::BadArgument)?;

        let key_at_position = *self.ring.get_index(position).unwrap().0;
        let ring_position = self.ring.get_mut(&key_at_position).unwrap();
        ring_position.members.retain(|&m| m != id);

        if ring_position.members.is_empty() {
            self.ring.shift_remove(&key_at_position);
        } else if key_at_position == id {
            // The removed station was the group's keyed representative;
            // re-key the position under its new first member.
            let new_key = ring_position.members[0];
            let moved = self.ring.shift_remove(&key_at_position).unwrap();
            self.ring.insert(new_key, moved);
        }

        self.stations.remove(&id);
        Ok(())
    }

    /// The sibling group occupying the ring position immediately downstream
    /// of `from`'s position. Wraps around to GrandCentral's position after
    /// the last station in the ring.
    pub fn downstream_group(&self, from: StationId) -> EtResult<Vec<StationId>> {
        let position = self
            .ring
            .iter()
            .position(|(_, pos)| pos.members.contains(&from))
            .ok_or(EtError::BadArgument)?;

        let next_position = (position + 1) % self.ring.len();
        Ok(self.ring[next_position].members.clone())
    }

    /// Picks a single downstream target from the sibling group using the
    /// position's distribution policy. Returns `None` if every sibling's
    /// input is currently at capacity (the caller decides whether that
    /// means "drop" or "block").
    pub fn pick_target(&self, from: StationId, policy: DistributionPolicy) -> EtResult<Option<StationId>> {
        let group = self.downstream_group(from)?;
        if group.len() == 1 {
            return Ok(Some(group[0]));
        }

        let position = self
            .ring
            .iter()
            .position(|(_, pos)| pos.members.contains(&from))
            .expect("resolved above");
        let next_position = (position + 1) % self.ring.len();
        let ring_position = &self.ring[next_position];

        match policy {
            DistributionPolicy::RoundRobin => {
                let len = group.len();
                let start = ring_position.was_last.load(Ordering::SeqCst);
                for step in 0..len {
                    let idx = (start + step) % len;
                    let candidate = group[idx];
                    let station = &self.stations[&candidate];
                    if !Self::input_is_full(station) {
                        ring_position.was_last.store((idx + 1) % len, Ordering::SeqCst);
                        return Ok(Some(candidate));
                    }
                }
                Ok(None)
            }
            DistributionPolicy::EqualCue => {
                let chosen = group
                    .iter()
                    .filter(|&&id| !Self::input_is_full(&self.stations[&id]))
                    .min_by_key(|&&id| self.stations[&id].input.len());
                Ok(chosen.copied())
            }
        }
    }

    fn input_is_full(station: &Station) -> bool {
        match station.config.blocking_mode {
            crate::station::BlockingMode::Blocking => false,
            crate::station::BlockingMode::Nonblocking => {
                station.input.len() >= station.config.cue.max(1)
            }
        }
    }

    pub fn station_ids(&self) -> Vec<StationId> {
        self.stations.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::station::{SelectMode, StationConfig};

    fn station(id: StationId, name: &str) -> Arc<Station> {
        Arc::new(Station::new(id, name, StationConfig::default(), SelectMode::All))
    }

    #[test]
    fn ring_starts_with_grandcentral_only() {
        let graph = StationGraph::new(station(GRANDCENTRAL, "GRAND_CENTRAL"));
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.downstream_group(GRANDCENTRAL).unwrap(), vec![GRANDCENTRAL]);
    }

    #[test]
    fn serial_insertion_forms_a_ring() {
        let mut graph = StationGraph::new(station(GRANDCENTRAL, "GRAND_CENTRAL"));
        graph.insert_serial_after(GRANDCENTRAL, station(StationId(1), "s1")).unwrap();
        graph.insert_serial_after(StationId(1), station(StationId(2), "s2")).unwrap();

        assert_eq!(graph.downstream_group(GRANDCENTRAL).unwrap(), vec![StationId(1)]);
        assert_eq!(graph.downstream_group(StationId(1)).unwrap(), vec![StationId(2)]);
        assert_eq!(graph.downstream_group(StationId(2)).unwrap(), vec![GRANDCENTRAL]);
    }

    #[test]
    fn parallel_siblings_share_a_position() {
        let mut graph = StationGraph::new(station(GRANDCENTRAL, "GRAND_CENTRAL"));
        graph.insert_serial_after(GRANDCENTRAL, station(StationId(1), "s1")).unwrap();
        graph.insert_parallel_sibling(StationId(1), station(StationId(2), "s2")).unwrap();

        let mut group = graph.downstream_group(GRANDCENTRAL).unwrap();
        group.sort_by_key(|id| id.0);
        assert_eq!(group, vec![StationId(1), StationId(2)]);
    }

    #[test]
    fn round_robin_distributes_evenly() {
        let mut graph = StationGraph::new(station(GRANDCENTRAL, "GRAND_CENTRAL"));
        graph.insert_serial_after(GRANDCENTRAL, station(StationId(1), "s1")).unwrap();
        graph.insert_parallel_sibling(StationId(1), station(StationId(2), "s2")).unwrap();
        graph.insert_parallel_sibling(StationId(1), station(StationId(3), "s3")).unwrap();

        let mut picks = Vec::new();
        for _ in 0..6 {
            picks.push(
                graph
                    .pick_target(GRANDCENTRAL, DistributionPolicy::RoundRobin)
                    .unwrap()
                    .unwrap(),
            );
        }
        assert_eq!(
            picks,
            vec![
                StationId(1),
                StationId(2),
                StationId(3),
                StationId(1),
                StationId(2),
                StationId(3)
            ]
        );
    }

    #[test]
    fn removing_keyed_sibling_rekeys_position() {
        let mut graph = StationGraph::new(station(GRANDCENTRAL, "GRAND_CENTRAL"));
        graph.insert_serial_after(GRANDCENTRAL, station(StationId(1), "s1")).unwrap();
        graph.insert_parallel_sibling(StationId(1), station(StationId(2), "s2")).unwrap();

        graph.remove(StationId(1)).unwrap();
        assert_eq!(graph.downstream_group(GRANDCENTRAL).unwrap(), vec![StationId(2)]);
    }
}
