//! The backing map: a single memory-mapped file laid out as `{header, data
//! region}`. The station table, histogram, and event table are kept
//! in-process (see `station.rs`/`pool.rs`) under the "noshare" locality:
//! this host's OS cannot share `std::sync::Mutex`/`Condvar` across process
//! boundaries without platform-specific robust-mutex plumbing, so
//! contended station-queue mutation always goes through the creator
//! process, in-process. What *is* genuinely shared through the mapped file
//! is the header (so a second process opening the same file observes the
//! same sizes, magic, and heartbeat counter) and the event data region,
//! for zero-copy payload access.
//!
//! Unsafe is confined to this module: every other module reaches the data
//! region only through `slot`/`slot_mut`, whose safety is upheld by the
//! single-owner invariant enforced by the pool and station layers (a given
//! slot is mutated by at most one caller at a time, so handing out a
//! `&mut [u8]` into shared mmap bytes from `&self` is sound in practice
//! even though the borrow checker can't see it).

use crate::config::SystemConfig;
use crate::error::{EtError, EtResult};
use crate::header::{SystemHeader, HEADER_SIZE};
use crate::ids::PlaceIndex;
use memmap2::MmapMut;
use std::cell::UnsafeCell;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub struct BackingMap {
    mmap: UnsafeCell<MmapMut>,
    /// Serializes header reads/writes; the data region bytes are not
    /// touched while this is held.
    header_lock: Mutex<()>,
    event_size: usize,
    num_events: usize,
    /// `my_base - creator_base`, recomputed on every open and on every
    /// observed system restart.
    offset: AtomicU64,
}

// SAFETY: every caller reaches the mmap only through `slot`/`slot_mut`
// (disjoint per-slot regions, upheld by the pool's single-owner invariant)
// or through the header accessors, which serialize on `header_lock`.
unsafe impl Sync for BackingMap {}

impl BackingMap {
    pub fn create(path: impl AsRef<Path>, config: &SystemConfig) -> EtResult<BackingMap> {
        config.validate()?;

        let data_len = config.num_events as usize * config.event_size as usize;
        let total_len = HEADER_SIZE + data_len;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        file.set_len(total_len as u64)?;

        let mut mmap = unsafe { MmapMut::map_mut(&file)? };

        let header = SystemHeader::from_config(config);
        header.write(&mut mmap[..HEADER_SIZE])?;
        mmap.flush()?;

        Ok(BackingMap {
            mmap: UnsafeCell::new(mmap),
            header_lock: Mutex::new(()),
            event_size: config.event_size as usize,
            num_events: config.num_events as usize,
            offset: AtomicU64::new(0),
        })
    }

    pub fn open(path: impl AsRef<Path>) -> EtResult<BackingMap> {
        let file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        if mmap.len() < HEADER_SIZE {
            return Err(EtError::BadFormat);
        }
        let header = SystemHeader::read(&mmap[..HEADER_SIZE])?;
        if header.is_64_bit() != cfg!(target_pointer_width = "64") {
            // Cross-width open: reject with no observable map mutation.
            return Err(EtError::Error);
        }

        let event_size = header.event_size as usize;
        let num_events = header.num_events as usize;
        let expected_len = HEADER_SIZE + event_size * num_events;
        if mmap.len() < expected_len {
            return Err(EtError::BadFormat);
        }

        Ok(BackingMap {
            mmap: UnsafeCell::new(mmap),
            header_lock: Mutex::new(()),
            event_size,
            num_events,
            offset: AtomicU64::new(0),
        })
    }

    fn mmap(&self) -> &MmapMut {
        unsafe { &*self.mmap.get() }
    }

    #[allow(clippy::mut_from_ref)]
    fn mmap_mut(&self) -> &mut MmapMut {
        unsafe { &mut *self.mmap.get() }
    }

    pub fn header(&self) -> EtResult<SystemHeader> {
        let _guard = self.header_lock.lock().unwrap_or_else(|e| e.into_inner());
        SystemHeader::read(&self.mmap()[..HEADER_SIZE])
    }

    pub fn write_header(&self, header: &SystemHeader) -> EtResult<()> {
        let _guard = self.header_lock.lock().unwrap_or_else(|e| e.into_inner());
        header.write(&mut self.mmap_mut()[..HEADER_SIZE])
    }

    pub fn flush(&self) -> EtResult<()> {
        let _guard = self.header_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.mmap().flush().map_err(Into::into)
    }

    /// Atomically increments the header's heartbeat counter.
    pub fn bump_heartbeat(&self) -> u64 {
        let _guard = self.header_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut header =
            SystemHeader::read(&self.mmap()[..HEADER_SIZE]).expect("header was valid at open");
        header.heartbeat = header.heartbeat.wrapping_add(1);
        header
            .write(&mut self.mmap_mut()[..HEADER_SIZE])
            .expect("header region is always large enough");
        header.heartbeat
    }

    pub fn set_killed(&self) -> EtResult<()> {
        let mut header = self.header()?;
        header.flags |= SystemHeader::FLAG_KILLED;
        self.write_header(&header)
    }

    pub fn event_size(&self) -> usize {
        self.event_size
    }

    pub fn num_events(&self) -> usize {
        self.num_events
    }

    pub fn set_offset(&self, offset: u64) {
        self.offset.store(offset, Ordering::SeqCst);
    }

    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::SeqCst)
    }

    /// Borrow a slot's bytes read-only. Panics if `place` is out of range;
    /// callers only ever index slots the pool already validated.
    pub fn slot(&self, place: PlaceIndex) -> &[u8] {
        let start = HEADER_SIZE + place.index() * self.event_size;
        &self.mmap()[start..start + self.event_size]
    }

    /// Mutable access to a slot's bytes. Safe to call concurrently with
    /// `slot`/`slot_mut` calls on *other* slots: the pool guarantees a slot
    /// has at most one owner at a time.
    pub fn slot_mut(&self, place: PlaceIndex) -> &mut [u8] {
        let start = HEADER_SIZE + place.index() * self.event_size;
        &mut self.mmap_mut()[start..start + self.event_size]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_open_round_trips_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("et.map");
        let config = SystemConfig {
            num_events: 4,
            event_size: 16,
            ..SystemConfig::default()
        };

        {
            let map = BackingMap::create(&path, &config).unwrap();
            let header = map.header().unwrap();
            assert_eq!(header.num_events, 4);
            assert_eq!(header.event_size, 16);
        }

        let map = BackingMap::open(&path).unwrap();
        assert_eq!(map.num_events(), 4);
        assert_eq!(map.event_size(), 16);
    }

    #[test]
    fn slot_bytes_are_isolated_per_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("et.map");
        let config = SystemConfig {
            num_events: 2,
            event_size: 8,
            ..SystemConfig::default()
        };
        let map = BackingMap::create(&path, &config).unwrap();

        map.slot_mut(PlaceIndex(0))[0] = 0xAB;
        map.slot_mut(PlaceIndex(1))[0] = 0xCD;

        assert_eq!(map.slot(PlaceIndex(0))[0], 0xAB);
        assert_eq!(map.slot(PlaceIndex(1))[0], 0xCD);
    }

    #[test]
    fn heartbeat_increments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("et.map");
        let config = SystemConfig {
            num_events: 1,
            event_size: 8,
            ..SystemConfig::default()
        };
        let map = BackingMap::create(&path, &config).unwrap();
        assert_eq!(map.bump_heartbeat(), 1);
        assert_eq!(map.bump_heartbeat(), 2);
    }
}
