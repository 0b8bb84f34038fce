//! Liveness tracking: a per-process heartbeat thread, a system-wide monitor
//! thread that notices processes which stopped beating, and the
//! event-restoration that follows a declared-dead process.

use crate::error::{EtError, EtResult};
use crate::event::Owner;
use crate::ids::{AttachmentId, ProcessId, GRANDCENTRAL};
use crate::station::RestoreMode;
use crate::system::EtSystem;
use hashbrown::HashMap;
use slog::Logger;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Tracks the last time each live process reported in.
pub struct HeartbeatRegistry {
    last_beat: RwLock<HashMap<ProcessId, Instant>>,
    tick_hz: u32,
    timeout_ticks: u32,
}

impl HeartbeatRegistry {
    pub fn new(tick_hz: u32, timeout_ticks: u32) -> HeartbeatRegistry {
        HeartbeatRegistry {
            last_beat: RwLock::new(HashMap::new()),
            tick_hz: tick_hz.max(1),
            timeout_ticks: timeout_ticks.max(1),
        }
    }

    pub fn beat(&self, process: ProcessId) {
        self.last_beat
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(process, Instant::now());
    }

    pub fn forget(&self, process: ProcessId) {
        self.last_beat.write().unwrap_or_else(|e| e.into_inner()).remove(&process);
    }

    fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_hz as f64)
    }

    fn timeout(&self) -> Duration {
        self.tick_period() * self.timeout_ticks
    }

    pub fn is_alive(&self, process: ProcessId) -> bool {
        let guard = self.last_beat.read().unwrap_or_else(|e| e.into_inner());
        match guard.get(&process) {
            Some(last) => last.elapsed() < self.timeout(),
            None => false,
        }
    }

    /// Every tracked process whose last beat is older than the configured
    /// timeout.
    pub fn dead_processes(&self) -> Vec<ProcessId> {
        let guard = self.last_beat.read().unwrap_or_else(|e| e.into_inner());
        let timeout = self.timeout();
        guard
            .iter()
            .filter(|(_, last)| last.elapsed() >= timeout)
            .map(|(&process, _)| process)
            .collect()
    }
}

/// Spawns the thread a client process runs to keep its heartbeat current.
/// `quit` is checked once per tick so `stop()` callers get a bounded
/// shutdown latency of one tick period.
pub fn spawn_heartbeat(
    process: ProcessId,
    registry: Arc<HeartbeatRegistry>,
    quit: Arc<AtomicBool>,
) -> JoinHandle<()> {
    let period = registry.tick_period();
    thread::Builder::new()
        .name(format!("et-heartbeat-{}", process.0))
        .spawn(move || {
            registry.beat(process);
            while !quit.load(Ordering::SeqCst) {
                thread::sleep(period);
                if quit.load(Ordering::SeqCst) {
                    break;
                }
                registry.beat(process);
            }
            registry.forget(process);
        })
        .expect("spawning a heartbeat thread")
}

/// Spawns the system-wide monitor that notices dead processes and restores
/// the events their attachments were holding. Also bumps the backing map's
/// own heartbeat counter every tick so other processes opening the map can
/// see this system is alive.
pub fn spawn_monitor(
    system: Arc<EtSystem>,
    registry: Arc<HeartbeatRegistry>,
    quit: Arc<AtomicBool>,
    logger: Logger,
) -> JoinHandle<()> {
    let period = registry.tick_period();
    thread::Builder::new()
        .name("et-heartmonitor".to_string())
        .spawn(move || {
            while !quit.load(Ordering::SeqCst) {
                thread::sleep(period);
                if quit.load(Ordering::SeqCst) {
                    break;
                }

                system.bump_heartbeat();

                for process in registry.dead_processes() {
                    slog::warn!(logger, "process missed heartbeat deadline"; "process" => process.0);
                    let dead_attachments: Vec<AttachmentId> = system
                        .attachments_on_process(process)
                        .iter()
                        .map(|a| a.id)
                        .collect();
                    for attachment_id in dead_attachments {
                        if let Err(err) = restore_events_of(&system, attachment_id) {
                            slog::error!(logger, "failed to restore events for dead attachment";
                                "attachment" => attachment_id.0, "error" => %err);
                        }
                    }
                    registry.forget(process);
                }
            }
        })
        .expect("spawning the heartbeat monitor thread")
}

/// Returns every event a (presumed dead) attachment was holding to its
/// station according to that station's restore mode, then detaches it.
pub fn restore_events_of(system: &EtSystem, attachment_id: AttachmentId) -> EtResult<()> {
    let attachment = system.attachment(attachment_id).ok_or(EtError::BadArgument)?;
    let station = system.station(attachment.station)?;
    let pool = system.pool();

    for place in pool.all_places() {
        if pool.snapshot(place).owner != Owner::Attachment(attachment_id) {
            continue;
        }

        match station.config.restore_mode {
            RestoreMode::ToInput => {
                pool.set_station_owner(place, station.id);
                station.input.try_insert(place, false);
            }
            RestoreMode::ToOutput | RestoreMode::Redistribute => {
                pool.set_station_owner(place, station.id);
                station.output.try_insert(place, false);
            }
            RestoreMode::ToGrandCentral => {
                pool.set_system_owner(place);
                if let Ok(graph) = system.graph().read() {
                    if let Some(grandcentral) = graph.get(GRANDCENTRAL) {
                        grandcentral.input.try_insert(place, false);
                    }
                }
            }
        }
    }

    // A crashed process can't unblock its own attachment first, so the
    // monitor clears the flag itself before detaching rather than going
    // through the normal "must be unblocked" path.
    attachment.clear_sleeping();
    system.detach(attachment_id)
}
