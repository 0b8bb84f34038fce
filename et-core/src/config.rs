//! System sizing configuration, loadable from TOML via `serdeconv`, the way
//! `flux::logging` loads a `LoggerConfig`.

use crate::error::{EtError, EtResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Sizes and policy fixed at system creation and baked into the header.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SystemConfig {
    /// Total number of event slots in the pool.
    pub num_events: u32,
    /// Per-event payload capacity in bytes.
    pub event_size: u32,
    /// Maximum number of stations (including GrandCentral).
    pub max_stations: u32,
    /// Maximum number of simultaneous TEMP (oversized) events.
    pub max_temps: u32,
    /// Maximum number of simultaneous attachments.
    pub max_attachments: u32,
    /// Maximum number of simultaneous client processes.
    pub max_processes: u32,
    /// Width of the select-int control array carried by events and stations.
    pub select_ints: u32,
    /// Number of immutable event groups (FIFO facade's `K`-tuple grouping).
    pub group_count: u32,
    /// Per-group event counts; `sum(group_sizes) == num_events` when set.
    pub group_sizes: Vec<u32>,
    /// Heartbeat tick rate in Hz.
    pub heartbeat_hz: u32,
    /// Consecutive missed ticks before a peer is declared dead.
    pub heartbeat_timeout_ticks: u32,
    /// TCP port the optional network server listens on, if enabled.
    pub server_port: Option<u16>,
    /// Whether this build targets the 64-bit layout.
    pub is_64_bit: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        SystemConfig {
            num_events: 100,
            event_size: 1024,
            max_stations: 32,
            max_temps: 4,
            max_attachments: 64,
            max_processes: 32,
            select_ints: 6,
            group_count: 1,
            group_sizes: vec![100],
            heartbeat_hz: 2,
            heartbeat_timeout_ticks: 5,
            server_port: None,
            is_64_bit: cfg!(target_pointer_width = "64"),
        }
    }
}

impl SystemConfig {
    pub fn validate(&self) -> EtResult<()> {
        if self.num_events == 0 || self.event_size == 0 {
            return Err(EtError::BadArgument);
        }
        if self.group_count == 0 {
            return Err(EtError::BadArgument);
        }
        if !self.group_sizes.is_empty() {
            if self.group_sizes.len() as u32 != self.group_count {
                return Err(EtError::BadArgument);
            }
            if self.group_sizes.iter().sum::<u32>() != self.num_events {
                return Err(EtError::BadArgument);
            }
        }
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> EtResult<SystemConfig> {
        serdeconv::from_toml_file(path.as_ref()).map_err(|_| EtError::BadFormat)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> EtResult<()> {
        serdeconv::to_toml_file(self, path.as_ref()).map_err(|_| EtError::Write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(SystemConfig::default().validate().is_ok());
    }

    #[test]
    fn mismatched_group_sizes_rejected() {
        let mut config = SystemConfig::default();
        config.group_sizes = vec![1, 2, 3];
        assert_eq!(config.validate(), Err(EtError::BadArgument));
    }

    #[test]
    fn round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("et.toml");
        let config = SystemConfig::default();
        config.save(&path).unwrap();
        let loaded = SystemConfig::load(&path).unwrap();
        assert_eq!(config, loaded);
    }
}
