//! The FIFO facade: reinterprets the pool as `E = events / K` entries of
//! width `K`, where `K` is the uniform group size. An entry's identity is
//! the immutable `group` tag shared by its `K` events; per-buffer identity
//! within an entry is a caller-chosen label carried in `control[0]`, with
//! `control[1]` as a has-data flag.

use crate::attachment::Attachment;
use crate::config::SystemConfig;
use crate::error::{EtError, EtResult};
use crate::event::Priority;
use crate::ids::{GroupId, PlaceIndex, StationId, GRANDCENTRAL};
use crate::list::WaitMode;
use crate::station::{BlockingMode, DistributionPolicy, FlowMode, RestoreMode, StationConfig, UserMode};
use crate::system::EtSystem;
use hashbrown::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Control-int slot holding a buffer's caller-assigned label; `-1` marks an
/// unused (unclaimed) slot.
const UNUSED_ID: i32 = -1;

/// NONBLOCKING with a cue capped below the pool size so a stalled consumer
/// can never starve producers of fresh events to build new entries:
/// `E - max(2, E/20)`.
pub fn users_station_config(config: &SystemConfig) -> StationConfig {
    let reserve = std::cmp::max(2, config.num_events / 20);
    let cue = config.num_events.saturating_sub(reserve);
    StationConfig {
        flow_mode: FlowMode::Serial,
        user_mode: UserMode::Multi,
        restore_mode: RestoreMode::ToGrandCentral,
        blocking_mode: BlockingMode::Nonblocking,
        cue: cue as usize,
        prescale: 1,
        distribution: DistributionPolicy::RoundRobin,
    }
}

/// A `K`-tuple of events sharing one immutable group.
#[derive(Debug, Clone)]
pub struct FifoEntry {
    pub group: GroupId,
    pub places: Vec<PlaceIndex>,
}

/// Opens the producer side of a FIFO: pulls fresh, same-group event tuples
/// from GrandCentral and pre-labels the first `ids.len()` buffers of each
/// with the caller's ids, leaving the rest `-1`.
pub struct FifoProducer {
    attachment: Arc<Attachment>,
    width: usize,
    ids: Vec<i32>,
    group_count: u32,
    next_group: AtomicU32,
}

impl FifoProducer {
    pub fn open(system: &EtSystem, width: usize, ids: Vec<i32>) -> EtResult<FifoProducer> {
        if ids.len() > width {
            return Err(EtError::BadArgument);
        }
        let process = system.allocate_process();
        let attachment = system.attach(GRANDCENTRAL, process)?;
        Ok(FifoProducer {
            attachment,
            width,
            ids,
            group_count: system.config.group_count.max(1),
            next_group: AtomicU32::new(1),
        })
    }

    /// Claims `width` fresh buffers all drawn from the next group in
    /// round-robin rotation across the pool's `E` groups. Lengths are zero;
    /// the first `ids.len()` buffers carry their assigned id in
    /// `control[0]`, the rest `-1`.
    pub fn new_entry(&self, system: &EtSystem, buffer_size: u32, mode: WaitMode) -> EtResult<FifoEntry> {
        let grandcentral = system.station(GRANDCENTRAL)?;
        let slot = self.next_group.fetch_add(1, Ordering::SeqCst);
        let group = GroupId(((slot - 1) % self.group_count) + 1);

        let places = self.attachment.new_group(
            &grandcentral,
            system.pool(),
            self.width,
            buffer_size,
            Some(group),
            Priority::Low,
            mode,
        )?;

        for (i, &place) in places.iter().enumerate() {
            let id = self.ids.get(i).copied().unwrap_or(UNUSED_ID);
            system.pool().with_descriptor_mut(place, |desc| {
                desc.control[0] = id;
                desc.control[1] = 0;
            });
        }

        Ok(FifoEntry { group, places })
    }

    /// Locates the buffer labelled `id` within an entry the caller already
    /// holds, claiming the first unused (`-1`) slot if none is labelled yet.
    /// Not thread-safe: the caller must serialize calls against the same
    /// `entry`.
    pub fn get_buf(&self, system: &EtSystem, entry: &FifoEntry, id: i32) -> EtResult<PlaceIndex> {
        get_buf(system, entry, id)
    }

    /// Marks `place` as carrying a real payload.
    pub fn mark_has_data(&self, system: &EtSystem, place: PlaceIndex) {
        system.pool().with_descriptor_mut(place, |desc| desc.control[1] = 1);
    }

    /// Hands the entry's buffers to GrandCentral's output, which the
    /// conductor forwards into whichever station sits downstream (normally
    /// the Users station).
    pub fn put_entry(&self, system: &EtSystem, entry: FifoEntry) -> EtResult<()> {
        let grandcentral = system.station(GRANDCENTRAL)?;
        self.attachment.put(&grandcentral, system.pool(), &entry.places, WaitMode::Sleep)
    }
}

/// Shared implementation of `get-buf`, usable from either side of the FIFO
/// once a caller holds an entry.
fn get_buf(system: &EtSystem, entry: &FifoEntry, id: i32) -> EtResult<PlaceIndex> {
    for &place in &entry.places {
        if system.pool().snapshot(place).control[0] == id {
            return Ok(place);
        }
    }
    for &place in &entry.places {
        if system.pool().snapshot(place).control[0] == UNUSED_ID {
            system.pool().with_descriptor_mut(place, |desc| desc.control[0] = id);
            return Ok(place);
        }
    }
    Err(EtError::OutOfRange)
}

/// Opens the consumer side of a FIFO, attached to the Users station.
pub struct FifoConsumer {
    attachment: Arc<Attachment>,
    station: StationId,
    width: usize,
    /// Buffers claimed so far, keyed by entry group, waiting for the rest
    /// of their siblings to arrive: buffers from different entries can
    /// interleave in the Users station's input, so a buffer that doesn't
    /// complete an entry yet is held rather than returned or dropped.
    pending: Mutex<HashMap<GroupId, Vec<PlaceIndex>>>,
}

impl FifoConsumer {
    pub fn open(system: &EtSystem, station: StationId, width: usize) -> EtResult<FifoConsumer> {
        let process = system.allocate_process();
        let attachment = system.attach(station, process)?;
        Ok(FifoConsumer {
            attachment,
            station,
            width,
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Assembles one complete entry, claiming buffers one at a time from the
    /// Users station until `width` buffers share a group. A caller using
    /// `WaitMode::Async` may see `Empty` with buffers from a partial entry
    /// already claimed internally; the next call resumes from where this
    /// one left off.
    pub fn get_entry(&self, system: &EtSystem, mode: WaitMode) -> EtResult<FifoEntry> {
        loop {
            {
                let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(&group) = pending
                    .iter()
                    .find(|(_, places)| places.len() >= self.width)
                    .map(|(group, _)| group)
                {
                    let places = pending.remove(&group).expect("group found above");
                    return Ok(FifoEntry { group, places });
                }
            }

            let station = system.station(self.station)?;
            let places = self.attachment.get(&station, system.pool(), 1, mode)?;
            let place = places[0];
            let group = system.pool().snapshot(place).group;

            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.entry(group).or_default().push(place);
        }
    }

    /// Locates (or claims) the buffer labelled `id` within a held entry,
    /// consumer side.
    pub fn get_buf(&self, system: &EtSystem, entry: &FifoEntry, id: i32) -> EtResult<PlaceIndex> {
        get_buf(system, entry, id)
    }

    /// Whether every buffer in `entry` has its has-data flag set, and how
    /// many don't. Unused (`-1`) slots that were never written count as
    /// missing, the same as a labelled slot the producer never filled in.
    pub fn all_have_data(&self, system: &EtSystem, entry: &FifoEntry) -> (bool, usize) {
        let incomplete = entry
            .places
            .iter()
            .filter(|&&place| system.pool().snapshot(place).control[1] == 0)
            .count();
        (incomplete == 0, incomplete)
    }

    pub fn has_data(&self, system: &EtSystem, place: PlaceIndex) -> bool {
        system.pool().snapshot(place).control[1] != 0
    }

    /// Returns the entry's buffers to GrandCentral once the consumer is
    /// done with them.
    pub fn put_entry(&self, system: &EtSystem, entry: FifoEntry) -> EtResult<()> {
        let grandcentral = system.station(GRANDCENTRAL)?;
        self.attachment.dump(system.pool(), &grandcentral, &entry.places)
    }
}

/// The Users station's current fill level, read straight from its input
/// queue's length.
pub fn fill_level(system: &EtSystem, station: StationId) -> EtResult<usize> {
    Ok(system.station(station)?.input.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_system(num_events: u32, group_width: u32) -> EtSystem {
        let dir = tempfile::tempdir().unwrap();
        let group_count = num_events / group_width;
        let config = SystemConfig {
            num_events,
            event_size: 32,
            group_sizes: vec![group_width; group_count as usize],
            group_count,
            ..SystemConfig::default()
        };
        EtSystem::create(dir.path().join("et.map"), config, crate::logging::discard()).unwrap()
    }

    #[test]
    fn users_station_reserves_headroom() {
        let config = SystemConfig {
            num_events: 100,
            ..SystemConfig::default()
        };
        let station_config = users_station_config(&config);
        assert_eq!(station_config.cue, 98);
        assert_eq!(station_config.blocking_mode, BlockingMode::Nonblocking);
    }

    #[test]
    fn open_producer_prelabels_ids_and_leaves_rest_unused() {
        let system = test_system(5, 5);
        let producer = FifoProducer::open(&system, 5, vec![10, 11, 12]).unwrap();
        let entry = producer.new_entry(&system, 8, WaitMode::Async).unwrap();

        let labels: Vec<i32> = entry
            .places
            .iter()
            .map(|&p| system.pool().snapshot(p).control[0])
            .collect();
        assert_eq!(labels, vec![10, 11, 12, -1, -1]);
        assert!(entry.places.iter().all(|&p| system.pool().snapshot(p).length == 0));
    }

    #[test]
    fn get_buf_finds_labelled_then_claims_unused() {
        let system = test_system(5, 5);
        let producer = FifoProducer::open(&system, 5, vec![10, 11, 12]).unwrap();
        let entry = producer.new_entry(&system, 8, WaitMode::Async).unwrap();

        let found = producer.get_buf(&system, &entry, 11).unwrap();
        assert_eq!(system.pool().snapshot(found).control[0], 11);

        let claimed = producer.get_buf(&system, &entry, 99).unwrap();
        assert_eq!(system.pool().snapshot(claimed).control[0], 99);

        assert_eq!(producer.get_buf(&system, &entry, 99).unwrap(), claimed);
    }

    #[test]
    fn get_buf_errors_when_entry_is_full() {
        let system = test_system(3, 3);
        let producer = FifoProducer::open(&system, 3, vec![1, 2, 3]).unwrap();
        let entry = producer.new_entry(&system, 8, WaitMode::Async).unwrap();
        assert_eq!(producer.get_buf(&system, &entry, 4).unwrap_err(), EtError::OutOfRange);
    }

    #[test]
    fn producer_consumer_round_trip_leaves_unfilled_buffers_incomplete() {
        let system = test_system(5, 5);
        let users_config = users_station_config(&system.config);
        let users = system
            .create_station("USERS", GRANDCENTRAL, users_config, crate::station::SelectMode::All)
            .unwrap();

        let producer = FifoProducer::open(&system, 5, vec![10, 11, 12]).unwrap();
        let entry = producer.new_entry(&system, 8, WaitMode::Async).unwrap();
        for &id in &[10, 11, 12] {
            let place = producer.get_buf(&system, &entry, id).unwrap();
            producer.mark_has_data(&system, place);
        }
        producer.put_entry(&system, entry.clone()).unwrap();

        let consumer = FifoConsumer::open(&system, users, 5).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        let received = consumer
            .get_entry(&system, WaitMode::Timed(std::time::Duration::from_millis(200)))
            .unwrap();
        assert_eq!(received.group, entry.group);

        let (complete, incomplete) = consumer.all_have_data(&system, &received);
        assert!(!complete);
        assert_eq!(incomplete, 2);

        consumer.put_entry(&system, received).unwrap();
    }
}
