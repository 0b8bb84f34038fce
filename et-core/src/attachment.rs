//! Attachments: a client's handle onto one station, carrying the quit/sleep
//! flags that the wait protocol and the heartbeat monitor both reach into.

use crate::error::{EtError, EtResult};
use crate::event::Priority;
use crate::ids::{AttachmentId, GroupId, PlaceIndex, ProcessId, StationId};
use crate::list::WaitMode;
use crate::pool::EventPool;
use crate::station::Station;
use std::sync::atomic::{AtomicBool, Ordering};

pub struct Attachment {
    pub id: AttachmentId,
    pub station: StationId,
    pub process: ProcessId,
    quit: AtomicBool,
    sleeping: AtomicBool,
}

impl Attachment {
    pub fn new(id: AttachmentId, station: StationId, process: ProcessId) -> Attachment {
        Attachment {
            id,
            station,
            process,
            quit: AtomicBool::new(false),
            sleeping: AtomicBool::new(false),
        }
    }

    pub fn quit_flag(&self) -> &AtomicBool {
        &self.quit
    }

    pub fn is_quitting(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }

    pub fn mark_sleeping(&self) {
        self.sleeping.store(true, Ordering::SeqCst);
    }

    pub fn clear_sleeping(&self) {
        self.sleeping.store(false, Ordering::SeqCst);
    }

    pub fn is_sleeping(&self) -> bool {
        self.sleeping.load(Ordering::SeqCst)
    }

    /// Asks a blocked call on this attachment to return `Wakeup` and wakes
    /// it if it's parked on a condvar.
    pub fn wakeup(&self, station: &Station) {
        self.quit.store(true, Ordering::SeqCst);
        station.input.broadcast_wakeup();
        station.output.broadcast_wakeup();
    }

    /// Clears the quit flag so the attachment can issue further calls after
    /// a wakeup: a woken attachment isn't dead, just interrupted.
    pub fn reset_after_wakeup(&self) {
        self.quit.store(false, Ordering::SeqCst);
    }

    /// Draws up to `count` events out of `station`'s input, assigning this
    /// attachment as owner.
    pub fn get(
        &self,
        station: &Station,
        pool: &EventPool,
        count: usize,
        mode: WaitMode,
    ) -> EtResult<Vec<PlaceIndex>> {
        self.mark_sleeping();
        let places = station.input.pop_blocking(count, self.quit_flag(), mode);
        self.clear_sleeping();
        let places = places?;

        for &place in &places {
            pool.with_descriptor_mut(place, |desc| {
                desc.owner = crate::event::Owner::Attachment(self.id);
            });
        }
        Ok(places)
    }

    /// Hands processed events to `station`'s output for the conductor to
    /// forward downstream.
    pub fn put(
        &self,
        station: &Station,
        pool: &EventPool,
        places: &[PlaceIndex],
        mode: WaitMode,
    ) -> EtResult<()> {
        for &place in places {
            pool.validate_owner(place, self.id)?;
        }

        for &place in places {
            let high = matches!(pool.snapshot(place).priority, Priority::High);
            let accepted = if station.is_blocking() {
                station
                    .output
                    .push_blocking(place, high, self.quit_flag(), mode)
                    .is_ok()
            } else {
                station.output.try_insert(place, high)
            };
            if !accepted {
                return Err(EtError::Busy);
            }
        }
        Ok(())
    }

    /// Discards events without forwarding them downstream, releasing any
    /// TEMP backing and handing them straight back to GrandCentral.
    pub fn dump(
        &self,
        pool: &EventPool,
        grandcentral: &Station,
        places: &[PlaceIndex],
    ) -> EtResult<()> {
        for &place in places {
            pool.validate_owner(place, self.id)?;
        }
        for &place in places {
            pool.set_system_owner(place);
            grandcentral.input.try_insert(place, false);
        }
        Ok(())
    }

    /// Draws one fresh event from GrandCentral's pool.
    pub fn new_event(
        &self,
        grandcentral: &Station,
        pool: &EventPool,
        size: u32,
        priority: Priority,
        mode: WaitMode,
    ) -> EtResult<PlaceIndex> {
        let places = self.new_group(grandcentral, pool, 1, size, None, priority, mode)?;
        Ok(places[0])
    }

    /// Draws `count` fresh events atomically from GrandCentral's pool. When
    /// `group` is `Some`, only events already tagged with that immutable
    /// group are eligible; `None` draws from any group, in GrandCentral's
    /// FIFO order.
    pub fn new_group(
        &self,
        grandcentral: &Station,
        pool: &EventPool,
        count: usize,
        size: u32,
        group: Option<GroupId>,
        priority: Priority,
        mode: WaitMode,
    ) -> EtResult<Vec<PlaceIndex>> {
        let places = match group {
            Some(wanted) => grandcentral.input.pop_matching_blocking(
                count,
                |place| pool.snapshot(place).group == wanted,
                self.quit_flag(),
                mode,
            )?,
            None => grandcentral.input.pop_blocking(count, self.quit_flag(), mode)?,
        };
        for &place in &places {
            pool.acquire(place, size, self.id)?;
            pool.with_descriptor_mut(place, |desc| desc.priority = priority);
        }
        Ok(places)
    }
}
