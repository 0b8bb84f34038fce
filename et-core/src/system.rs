//! The top-level system handle: ties the backing map, event pool, station
//! graph, attachment registry, and conductor threads together behind one
//! `EtSystem`.

use crate::attachment::Attachment;
use crate::conductor::Conductor;
use crate::config::SystemConfig;
use crate::error::{EtError, EtResult};
use crate::graph::StationGraph;
use crate::ids::{AttachmentId, ProcessId, StationId, GRANDCENTRAL};
use crate::map::BackingMap;
use crate::pool::EventPool;
use crate::station::{SelectMode, Station, StationConfig};
use hashbrown::HashMap;
use slog::Logger;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;

/// How station-queue mutexes are realized. Every backing map is genuinely
/// mmap-shared for its header and data bytes;
/// `ServerMediated` additionally means remote attachments reach the queues
/// only through `et-server`, never by mapping the file directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locality {
    Shared,
    ServerMediated,
}

struct ConductorHandle {
    conductor: Arc<Conductor>,
    join: Option<JoinHandle<()>>,
}

pub struct EtSystem {
    pub config: SystemConfig,
    pub locality: Locality,
    map: Arc<BackingMap>,
    pool: Arc<EventPool>,
    graph: Arc<RwLock<StationGraph>>,
    conductors: RwLock<HashMap<StationId, ConductorHandle>>,
    attachments: RwLock<HashMap<AttachmentId, Arc<Attachment>>>,
    next_attachment: AtomicU32,
    next_process: AtomicU32,
    logger: Logger,
}

impl EtSystem {
    /// Creates a fresh backing file and a system with only GrandCentral
    /// present.
    pub fn create(path: impl AsRef<Path>, config: SystemConfig, logger: Logger) -> EtResult<EtSystem> {
        config.validate()?;
        let map = Arc::new(BackingMap::create(path.as_ref(), &config)?);
        Self::from_map(map, config, logger, true)
    }

    /// Opens an existing backing file. The pool's in-process bookkeeping
    /// (owners, ages, priorities) starts fresh
    /// in this process; only the header and the raw data bytes are shared
    /// across processes under the "noshare" locality this host provides
    /// (see `map.rs`).
    pub fn open(path: impl AsRef<Path>, logger: Logger) -> EtResult<EtSystem> {
        let map = Arc::new(BackingMap::open(path.as_ref())?);
        let header = map.header()?;
        if header.is_killed() {
            return Err(EtError::Dead);
        }
        let config = SystemConfig {
            num_events: header.num_events,
            event_size: header.event_size,
            max_stations: header.max_stations,
            max_temps: 4,
            max_attachments: header.max_attachments,
            max_processes: header.max_processes,
            select_ints: header.select_ints,
            group_count: header.group_count,
            group_sizes: vec![],
            heartbeat_hz: header.tick_hz,
            heartbeat_timeout_ticks: 5,
            server_port: if header.server_port == 0 { None } else { Some(header.server_port) },
            is_64_bit: header.is_64_bit(),
        };
        Self::from_map(map, config, logger, false)
    }

    fn from_map(map: Arc<BackingMap>, config: SystemConfig, logger: Logger, seed_pool: bool) -> EtResult<EtSystem> {
        let pool = Arc::new(EventPool::new(map.clone(), &config, std::env::temp_dir().join("et-temps")));

        let grandcentral_config = StationConfig {
            restore_mode: crate::station::RestoreMode::ToGrandCentral,
            ..StationConfig::default()
        };
        let grandcentral = Arc::new(Station::new(GRANDCENTRAL, "GRAND_CENTRAL", grandcentral_config, SelectMode::All));

        if seed_pool {
            for place in pool.all_places() {
                grandcentral.input.try_insert(place, false);
            }
        }

        let graph = Arc::new(RwLock::new(StationGraph::new(grandcentral)));

        let locality = if config.server_port.is_some() {
            Locality::ServerMediated
        } else {
            Locality::Shared
        };

        let system = EtSystem {
            config,
            locality,
            map,
            pool,
            graph,
            conductors: RwLock::new(HashMap::new()),
            attachments: RwLock::new(HashMap::new()),
            next_attachment: AtomicU32::new(1),
            next_process: AtomicU32::new(1),
            logger,
        };
        // GrandCentral routes new events into the ring exactly like any
        // other station: events placed on its output queue move to the
        // next station via the conductor.
        system.start_conductor(GRANDCENTRAL);
        Ok(system)
    }

    pub fn pool(&self) -> &Arc<EventPool> {
        &self.pool
    }

    pub fn graph(&self) -> &Arc<RwLock<StationGraph>> {
        &self.graph
    }

    pub fn station(&self, id: StationId) -> EtResult<Arc<Station>> {
        self.graph
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .ok_or(EtError::BadArgument)
    }

    /// Creates a new serial station immediately after `after` in the main
    /// ring and starts its conductor.
    pub fn create_station(
        &self,
        name: impl Into<String>,
        after: StationId,
        config: StationConfig,
        select: SelectMode,
    ) -> EtResult<StationId> {
        let name = name.into();
        let mut graph = self.graph.write().unwrap_or_else(|e| e.into_inner());
        if graph.contains_name(&name) {
            return Err(EtError::AlreadyExists);
        }
        if graph.len() as u32 >= self.config.max_stations {
            return Err(EtError::TooMany);
        }

        let id = graph.allocate_id();
        let station = Arc::new(Station::new(id, name, config, select));
        graph.insert_serial_after(after, station)?;
        drop(graph);

        self.start_conductor(id);
        Ok(id)
    }

    /// Adds a station as a parallel sibling of `existing`, sharing its ring
    /// position.
    pub fn create_parallel_station(
        &self,
        name: impl Into<String>,
        existing: StationId,
        config: StationConfig,
        select: SelectMode,
    ) -> EtResult<StationId> {
        let name = name.into();
        let mut graph = self.graph.write().unwrap_or_else(|e| e.into_inner());
        if graph.contains_name(&name) {
            return Err(EtError::AlreadyExists);
        }

        let id = graph.allocate_id();
        let station = Arc::new(Station::new(id, name, config, select));
        graph.insert_parallel_sibling(existing, station)?;
        drop(graph);

        self.start_conductor(id);
        Ok(id)
    }

    fn start_conductor(&self, station_id: StationId) {
        let conductor = Arc::new(Conductor::new(
            station_id,
            self.graph.clone(),
            self.pool.clone(),
            self.logger.new(slog::o!("station" => station_id.0)),
        ));
        let join = conductor.clone().spawn();
        self.conductors.write().unwrap_or_else(|e| e.into_inner()).insert(
            station_id,
            ConductorHandle {
                conductor,
                join: Some(join),
            },
        );
    }

    /// Stops a station's conductor and removes it from the graph. Callers
    /// must have already drained or are willing to drop any events still
    /// sitting in its input/output.
    pub fn remove_station(&self, id: StationId) -> EtResult<()> {
        if id == GRANDCENTRAL {
            return Err(EtError::BadArgument);
        }

        if let Some(handle) = self.conductors.write().unwrap_or_else(|e| e.into_inner()).remove(&id) {
            handle.conductor.stop();
            if let Some(join) = handle.join {
                let _ = join.join();
            }
        }

        self.graph.write().unwrap_or_else(|e| e.into_inner()).remove(id)
    }

    /// Attaches a process to a station.
    pub fn attach(&self, station: StationId, process: ProcessId) -> EtResult<Arc<Attachment>> {
        if self.station(station).is_err() {
            return Err(EtError::BadArgument);
        }

        let mut attachments = self.attachments.write().unwrap_or_else(|e| e.into_inner());
        if attachments.len() as u32 >= self.config.max_attachments {
            return Err(EtError::TooMany);
        }

        let id = AttachmentId(self.next_attachment.fetch_add(1, Ordering::SeqCst));
        let attachment = Arc::new(Attachment::new(id, station, process));
        attachments.insert(id, attachment.clone());
        Ok(attachment)
    }

    /// Removes an attachment. A call currently parked in `get`/`new`/`put`
    /// must be woken up first, so `detach` refuses a sleeping attachment
    /// rather than yanking it out from under a blocked caller.
    pub fn detach(&self, attachment_id: AttachmentId) -> EtResult<()> {
        let attachments = self.attachments.read().unwrap_or_else(|e| e.into_inner());
        let attachment = attachments.get(&attachment_id).cloned().ok_or(EtError::BadArgument)?;
        drop(attachments);

        if attachment.is_sleeping() {
            return Err(EtError::Busy);
        }

        self.attachments.write().unwrap_or_else(|e| e.into_inner()).remove(&attachment_id);
        Ok(())
    }

    pub fn allocate_process(&self) -> ProcessId {
        ProcessId(self.next_process.fetch_add(1, Ordering::SeqCst))
    }

    pub fn attachment(&self, id: AttachmentId) -> Option<Arc<Attachment>> {
        self.attachments.read().unwrap_or_else(|e| e.into_inner()).get(&id).cloned()
    }

    pub fn attachments_on(&self, station: StationId) -> Vec<Arc<Attachment>> {
        self.attachments
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|a| a.station == station)
            .cloned()
            .collect()
    }

    pub fn attachments_on_process(&self, process: ProcessId) -> Vec<Arc<Attachment>> {
        self.attachments
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|a| a.process == process)
            .cloned()
            .collect()
    }

    /// Bumps the backing map's heartbeat counter; called by the system
    /// monitor thread once per tick.
    pub fn bump_heartbeat(&self) -> u64 {
        self.map.bump_heartbeat()
    }

    /// Sets the kill bit in the header and wakes every attachment and
    /// conductor so they unblock with `Dead`/`Wakeup`.
    pub fn kill(&self) -> EtResult<()> {
        self.map.set_killed()?;

        for handle in self.conductors.read().unwrap_or_else(|e| e.into_inner()).values() {
            handle.conductor.stop();
        }
        let graph = self.graph.read().unwrap_or_else(|e| e.into_inner());
        for attachment in self.attachments.read().unwrap_or_else(|e| e.into_inner()).values() {
            if let Some(station) = graph.get(attachment.station) {
                attachment.wakeup(station);
            }
        }
        Ok(())
    }

    pub fn is_dead(&self) -> EtResult<bool> {
        Ok(self.map.header()?.is_killed())
    }

    pub fn close(&self) -> EtResult<()> {
        for (_, mut handle) in self.conductors.write().unwrap_or_else(|e| e.into_inner()).drain() {
            handle.conductor.stop();
            if let Some(join) = handle.join.take() {
                let _ = join.join();
            }
        }
        self.map.flush()
    }
}

impl Drop for EtSystem {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::station::{BlockingMode, DistributionPolicy, FlowMode, RestoreMode, UserMode};

    fn test_config() -> SystemConfig {
        SystemConfig {
            num_events: 8,
            event_size: 32,
            group_sizes: vec![8],
            group_count: 1,
            max_stations: 4,
            max_attachments: 4,
            ..SystemConfig::default()
        }
    }

    fn station_config() -> StationConfig {
        StationConfig {
            flow_mode: FlowMode::Serial,
            user_mode: UserMode::Multi,
            restore_mode: RestoreMode::ToGrandCentral,
            blocking_mode: BlockingMode::Blocking,
            cue: 0,
            prescale: 1,
            distribution: DistributionPolicy::RoundRobin,
        }
    }

    #[test]
    fn create_seeds_grandcentral_with_every_place() {
        let dir = tempfile::tempdir().unwrap();
        let system = EtSystem::create(dir.path().join("et.map"), test_config(), crate::logging::discard()).unwrap();
        let gc = system.station(GRANDCENTRAL).unwrap();
        assert_eq!(gc.input.len(), 8);
    }

    #[test]
    fn create_station_rejects_duplicate_names() {
        let dir = tempfile::tempdir().unwrap();
        let system = EtSystem::create(dir.path().join("et.map"), test_config(), crate::logging::discard()).unwrap();
        system
            .create_station("s1", GRANDCENTRAL, station_config(), SelectMode::All)
            .unwrap();
        let err = system
            .create_station("s1", GRANDCENTRAL, station_config(), SelectMode::All)
            .unwrap_err();
        assert_eq!(err, EtError::AlreadyExists);
    }

    #[test]
    fn attach_and_detach_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let system = EtSystem::create(dir.path().join("et.map"), test_config(), crate::logging::discard()).unwrap();
        let process = system.allocate_process();
        let attachment = system.attach(GRANDCENTRAL, process).unwrap();
        assert_eq!(system.attachments_on(GRANDCENTRAL).len(), 1);

        system.detach(attachment.id).unwrap();
        assert_eq!(system.attachments_on(GRANDCENTRAL).len(), 0);
    }

    #[test]
    fn kill_sets_header_flag() {
        let dir = tempfile::tempdir().unwrap();
        let system = EtSystem::create(dir.path().join("et.map"), test_config(), crate::logging::discard()).unwrap();
        assert!(!system.is_dead().unwrap());
        system.kill().unwrap();
        assert!(system.is_dead().unwrap());
    }
}
