//! The event pool and ownership registry: a fixed array of descriptors
//! plus the TEMP-file machinery for oversized events.

use crate::config::SystemConfig;
use crate::error::{EtError, EtResult};
use crate::event::EventDescriptor;
use crate::ids::{AttachmentId, GroupId, PlaceIndex, StationId};
use crate::map::BackingMap;
use std::cell::UnsafeCell;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Per-slot temp-file backing, present only for events whose requested size
/// exceeded the map's per-event capacity.
struct TempSlot {
    mmap: UnsafeCell<Option<(memmap2::MmapMut, tempfile::NamedTempFile)>>,
}

impl TempSlot {
    fn empty() -> TempSlot {
        TempSlot {
            mmap: UnsafeCell::new(None),
        }
    }

    // SAFETY: see `EventPool`'s safety note. A slot has exactly one owner
    // at a time, so concurrent calls never alias the same `TempSlot`.
    #[allow(clippy::mut_from_ref)]
    unsafe fn get(&self) -> &mut Option<(memmap2::MmapMut, tempfile::NamedTempFile)> {
        &mut *self.mmap.get()
    }
}

/// The fixed-size array of event descriptors. Events are created once at
/// pool construction and never freed; they cycle between the queues owned
/// by `station.rs`/`graph.rs`.
pub struct EventPool {
    descriptors: Vec<Mutex<EventDescriptor>>,
    temps: Vec<TempSlot>,
    map: Arc<BackingMap>,
    temp_dir: PathBuf,
}

// SAFETY: `TempSlot` access is upheld by the same single-owner invariant as
// `BackingMap`'s data region.
unsafe impl Sync for EventPool {}

impl EventPool {
    pub fn new(map: Arc<BackingMap>, config: &SystemConfig, temp_dir: impl Into<PathBuf>) -> EventPool {
        let mut descriptors = Vec::with_capacity(config.num_events as usize);
        let mut temps = Vec::with_capacity(config.num_events as usize);

        let group_sizes = if config.group_sizes.is_empty() {
            vec![config.num_events]
        } else {
            config.group_sizes.clone()
        };

        let mut place = 0u32;
        for (group_idx, &size) in group_sizes.iter().enumerate() {
            for _ in 0..size {
                let descriptor =
                    EventDescriptor::new(PlaceIndex(place), config.event_size, GroupId(group_idx as u32 + 1));
                descriptors.push(Mutex::new(descriptor));
                temps.push(TempSlot::empty());
                place += 1;
            }
        }

        EventPool {
            descriptors,
            temps,
            map,
            temp_dir: temp_dir.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn capacity(&self) -> u32 {
        self.map.event_size() as u32
    }

    /// All place indices in ascending order, used once at startup to seed
    /// GrandCentral's input queue.
    pub fn all_places(&self) -> Vec<PlaceIndex> {
        (0..self.descriptors.len() as u32).map(PlaceIndex).collect()
    }

    pub fn snapshot(&self, place: PlaceIndex) -> EventDescriptor {
        self.descriptors[place.index()]
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn with_descriptor_mut<R>(
        &self,
        place: PlaceIndex,
        f: impl FnOnce(&mut EventDescriptor) -> R,
    ) -> R {
        let mut guard = self.descriptors[place.index()]
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    /// Assigns ownership for an event that was just pulled off GrandCentral's
    /// input by `new`/`new_group`. If `size` exceeds the pool's fixed
    /// capacity, mints a TEMP file sized to `size` instead.
    pub fn acquire(
        &self,
        place: PlaceIndex,
        size: u32,
        owner: AttachmentId,
    ) -> EtResult<()> {
        let capacity = self.capacity();

        if size > capacity {
            self.mint_temp(place, size)?;
        }

        self.with_descriptor_mut(place, |desc| {
            desc.owner = crate::event::Owner::Attachment(owner);
            desc.length = 0;
            desc.capacity = size.max(capacity);
            desc.modify.clear();
            desc.age = crate::event::Age::Used;
        });
        Ok(())
    }

    fn mint_temp(&self, place: PlaceIndex, size: u32) -> EtResult<()> {
        std::fs::create_dir_all(&self.temp_dir)?;
        let file = tempfile::NamedTempFile::new_in(&self.temp_dir)?;
        file.as_file().set_len(size as u64)?;
        let mmap = unsafe { memmap2::MmapMut::map_mut(file.as_file())? };

        let path = file.path().to_string_lossy().into_owned();

        // SAFETY: single-owner invariant, see module doc.
        unsafe { *self.temps[place.index()].get() = Some((mmap, file)) };

        self.with_descriptor_mut(place, |desc| {
            desc.temp_path = Some(path);
        });

        Ok(())
    }

    /// Releases a TEMP event's backing file; called when the event returns
    /// to GrandCentral.
    pub fn release_temp_if_any(&self, place: PlaceIndex) {
        let had_temp = self.with_descriptor_mut(place, |desc| desc.temp_path.take().is_some());
        if had_temp {
            // SAFETY: single-owner invariant, see module doc.
            unsafe { *self.temps[place.index()].get() = None };
        }
    }

    pub fn data(&self, place: PlaceIndex) -> &[u8] {
        // SAFETY: single-owner invariant, see module doc.
        let temp = unsafe { self.temps[place.index()].get() };
        match temp {
            Some((mmap, _)) => &mmap[..],
            None => self.map.slot(place),
        }
    }

    #[allow(clippy::mut_from_ref)]
    pub fn data_mut(&self, place: PlaceIndex) -> &mut [u8] {
        // SAFETY: single-owner invariant, see module doc.
        let temp = unsafe { self.temps[place.index()].get() };
        match temp {
            Some((mmap, _)) => &mut mmap[..],
            None => self.map.slot_mut(place),
        }
    }

    pub fn validate_owner(&self, place: PlaceIndex, expected: AttachmentId) -> EtResult<()> {
        let snapshot = self.snapshot(place);
        match snapshot.owner {
            crate::event::Owner::Attachment(id) if id == expected => Ok(()),
            _ => Err(EtError::BadArgument),
        }
    }

    pub fn set_station_owner(&self, place: PlaceIndex, station: StationId) {
        self.with_descriptor_mut(place, |desc| {
            desc.owner = crate::event::Owner::Station(station);
        });
    }

    pub fn set_system_owner(&self, place: PlaceIndex) {
        self.with_descriptor_mut(place, |desc| {
            desc.owner = crate::event::Owner::System;
            desc.modify.clear();
        });
        self.release_temp_if_any(place);
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }
}
