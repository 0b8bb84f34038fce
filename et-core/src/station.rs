//! A station: a named filter plus bounded input/output queues.

use crate::event::{EventDescriptor, SELECT_INTS, SELECT_WILDCARD};
use crate::ids::StationId;
use crate::list::GuardedList;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowMode {
    Serial,
    Parallel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserMode {
    Single,
    Multi,
}

/// Where a dying attachment's (or a rejected/prescaled event's) events are
/// returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreMode {
    ToInput,
    ToOutput,
    ToGrandCentral,
    Redistribute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockingMode {
    Blocking,
    Nonblocking,
}

/// How a parallel group picks the sibling to receive the next event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributionPolicy {
    RoundRobin,
    EqualCue,
}

/// A tagged capability object rather than raw dynamic dispatch: the core
/// only ever holds one of these three shapes, with `UserFunction` wrapping
/// a host-loaded predicate.
#[derive(Clone)]
pub enum SelectMode {
    All,
    Match { select: [i32; SELECT_INTS] },
    UserFunction(Arc<dyn Fn(StationId, &EventDescriptor) -> bool + Send + Sync>),
}

impl fmt::Debug for SelectMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectMode::All => write!(f, "SelectMode::All"),
            SelectMode::Match { select } => write!(f, "SelectMode::Match({select:?})"),
            SelectMode::UserFunction(_) => write!(f, "SelectMode::UserFunction(..)"),
        }
    }
}

impl SelectMode {
    /// Evaluates the filter at ingress into this station's input. Filtering
    /// happens on the way in, performed by the upstream conductor.
    pub fn accept(&self, station: StationId, event: &EventDescriptor) -> bool {
        match self {
            SelectMode::All => true,
            SelectMode::Match { select } => select
                .iter()
                .zip(event.control.iter())
                .all(|(&want, &have)| want == SELECT_WILDCARD || want == have),
            SelectMode::UserFunction(f) => f(station, event),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StationConfig {
    pub flow_mode: FlowMode,
    pub user_mode: UserMode,
    pub restore_mode: RestoreMode,
    pub blocking_mode: BlockingMode,
    pub cue: usize,
    pub prescale: u32,
    pub distribution: DistributionPolicy,
}

impl Default for StationConfig {
    fn default() -> Self {
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
}

pub struct Station {
    pub id: StationId,
    pub name: String,
    pub config: StationConfig,
    pub select: SelectMode,
    pub input: GuardedList,
    pub output: GuardedList,
    /// 1-in-`prescale` gate counter applied to matching events at a
    /// BLOCKING station.
    prescale_counter: AtomicU32,
}

impl Station {
    pub fn new(id: StationId, name: impl Into<String>, config: StationConfig, select: SelectMode) -> Station {
        let input_capacity = match config.blocking_mode {
            BlockingMode::Nonblocking if config.cue > 0 => Some(config.cue),
            BlockingMode::Nonblocking => Some(0),
            BlockingMode::Blocking => None,
        };

        Station {
            id,
            name: name.into(),
            config,
            select,
            input: GuardedList::new(input_capacity),
            output: GuardedList::new(None),
            prescale_counter: AtomicU32::new(0),
        }
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self.config.blocking_mode, BlockingMode::Blocking)
    }

    /// Applies the filter for this station (called by the upstream
    /// conductor).
    pub fn accepts(&self, event: &EventDescriptor) -> bool {
        self.select.accept(self.id, event)
    }

    /// Advances the prescale counter and reports whether this event should
    /// be kept (1-in-N). Only meaningful for BLOCKING stations; callers
    /// only consult this when `is_blocking()`.
    pub fn prescale_admit(&self) -> bool {
        if self.config.prescale <= 1 {
            return true;
        }
        let prev = self.prescale_counter.fetch_add(1, Ordering::SeqCst);
        prev % self.config.prescale == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{GroupId, PlaceIndex};

    fn event_with_control(c0: i32) -> EventDescriptor {
        let mut event = EventDescriptor::new(PlaceIndex(0), 32, GroupId(1));
        event.control[0] = c0;
        event
    }

    #[test]
    fn match_mode_respects_wildcards() {
        let mut select = [SELECT_WILDCARD; SELECT_INTS];
        select[0] = 1;
        let mode = SelectMode::Match { select };

        assert!(mode.accept(StationId(1), &event_with_control(1)));
        assert!(!mode.accept(StationId(1), &event_with_control(2)));
    }

    #[test]
    fn all_mode_accepts_everything() {
        assert!(SelectMode::All.accept(StationId(1), &event_with_control(99)));
    }

    #[test]
    fn prescale_keeps_one_in_n() {
        let station = Station::new(
            StationId(1),
            "s1",
            StationConfig {
                prescale: 2,
                ..StationConfig::default()
            },
            SelectMode::All,
        );

        let admits: Vec<bool> = (0..4).map(|_| station.prescale_admit()).collect();
        assert_eq!(admits, vec![true, false, true, false]);
    }
}
