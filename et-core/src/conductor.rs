//! The conductor: one thread per station, draining that station's output
//! list and handing each event to the next station(s) in the graph,
//! applying the downstream filter, prescale gate, and restore policy along
//! the way.

use crate::event::Priority;
use crate::graph::StationGraph;
use crate::ids::{PlaceIndex, StationId, GRANDCENTRAL};
use crate::list::WaitMode;
use crate::pool::EventPool;
use crate::station::{RestoreMode, Station};
use slog::Logger;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};

pub struct Conductor {
    station_id: StationId,
    graph: Arc<RwLock<StationGraph>>,
    pool: Arc<EventPool>,
    quit: Arc<AtomicBool>,
    logger: Logger,
}

impl Conductor {
    pub fn new(
        station_id: StationId,
        graph: Arc<RwLock<StationGraph>>,
        pool: Arc<EventPool>,
        logger: Logger,
    ) -> Conductor {
        Conductor {
            station_id,
            graph,
            pool,
            quit: Arc::new(AtomicBool::new(false)),
            logger,
        }
    }

    /// Spawns the draining thread. The returned handle's `JoinHandle` is
    /// for the caller to join at shutdown; `stop()` is how to ask the loop
    /// to exit.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        thread::Builder::new()
            .name(format!("et-conductor-{}", self.station_id))
            .spawn(move || self.run())
            .expect("spawning a conductor thread")
    }

    /// Signals the loop to exit and wakes it if it's parked waiting for
    /// output.
    pub fn stop(&self) {
        self.quit.store(true, Ordering::SeqCst);
        if let Ok(graph) = self.graph.read() {
            if let Some(station) = graph.get(self.station_id) {
                station.output.broadcast_wakeup();
            }
        }
    }

    fn run(&self) {
        loop {
            if self.quit.load(Ordering::SeqCst) {
                return;
            }

            let station = match self.graph.read().ok().and_then(|g| g.get(self.station_id).cloned()) {
                Some(s) => s,
                None => return,
            };

            let batch = match station.output.pop_blocking(1, &self.quit, WaitMode::Sleep) {
                Ok(places) => places,
                Err(_) => {
                    if self.quit.load(Ordering::SeqCst) {
                        return;
                    }
                    continue;
                }
            };

            for place in batch {
                self.forward(&station, place);
            }
        }
    }

    /// Routes one event downstream of `from`. Exposed at crate visibility
    /// so it can be driven directly in tests without spinning up a thread.
    pub(crate) fn forward(&self, from: &Station, place: PlaceIndex) {
        let event = self.pool.snapshot(place);

        let target = {
            let graph = self.graph.read().unwrap_or_else(|e| e.into_inner());
            match graph.pick_target(from.id, from.config.distribution) {
                Ok(Some(target_id)) => graph.get(target_id).cloned(),
                _ => None,
            }
        };

        let target = match target {
            Some(t) => t,
            None => {
                self.restore(from, place);
                return;
            }
        };

        if !target.accepts(&event) {
            self.restore(from, place);
            return;
        }

        if target.is_blocking() && !target.prescale_admit() {
            slog::debug!(self.logger, "prescale dropped event"; "station" => target.id.0, "place" => place.0);
            self.pool.set_system_owner(place);
            self.pool.release_temp_if_any(place);
            self.dump_to_grandcentral(place);
            return;
        }

        self.pool.set_station_owner(place, target.id);
        let high = matches!(event.priority, Priority::High);

        let accepted = if target.is_blocking() {
            target
                .input
                .push_blocking(place, high, &self.quit, WaitMode::Sleep)
                .is_ok()
        } else {
            target.input.try_insert(place, high)
        };

        if !accepted {
            self.restore(from, place);
        }
    }

    /// Applies `from`'s restore policy to an event that couldn't be
    /// delivered downstream (filtered out, prescaled away with a
    /// nonblocking target, or bounced off a full nonblocking input).
    fn restore(&self, from: &Station, place: PlaceIndex) {
        match from.config.restore_mode {
            RestoreMode::ToInput => {
                from.input.try_insert(place, false);
            }
            RestoreMode::ToOutput | RestoreMode::Redistribute => {
                from.output.try_insert(place, false);
            }
            RestoreMode::ToGrandCentral => self.dump_to_grandcentral(place),
        }
    }

    fn dump_to_grandcentral(&self, place: PlaceIndex) {
        self.pool.set_system_owner(place);
        if let Ok(graph) = self.graph.read() {
            if let Some(grandcentral) = graph.get(GRANDCENTRAL) {
                grandcentral.input.try_insert(place, false);
            }
        }
    }
}
