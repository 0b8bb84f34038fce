//! A station's input or output list: an intrusive FIFO-within-priority-class
//! queue guarded by its own mutex and a pair of condvars (non-empty,
//! non-full). A station's two list mutexes are never held at the same time.

use crate::error::{EtError, EtResult};
use crate::ids::PlaceIndex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// How a blocking call should behave when its predicate isn't immediately
/// satisfied.
#[derive(Debug, Clone, Copy)]
pub enum WaitMode {
    Sleep,
    Timed(Duration),
    Async,
}

#[derive(Debug, Default)]
struct ListState {
    items: VecDeque<PlaceIndex>,
    /// Number of HIGH-priority items currently occupying the front of `items`.
    high_count: usize,
    tries: u64,
    in_count: u64,
    out_count: u64,
}

/// A guarded FIFO-within-priority queue. `capacity` is the nonblocking cue
/// bound; `None` means unbounded (used for GrandCentral's lists and any
/// list whose station runs BLOCKING input).
pub struct GuardedList {
    state: Mutex<ListState>,
    non_empty: Condvar,
    non_full: Condvar,
    capacity: Option<usize>,
}

impl GuardedList {
    pub fn new(capacity: Option<usize>) -> GuardedList {
        GuardedList {
            state: Mutex::new(ListState::default()),
            non_empty: Condvar::new(),
            non_full: Condvar::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn counters(&self) -> (u64, u64, u64) {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        (state.tries, state.in_count, state.out_count)
    }

    /// Insert honoring priority order: HIGH goes immediately after the
    /// current run of HIGH events, LOW is appended.
    fn insert_locked(state: &mut ListState, id: PlaceIndex, high: bool) {
        if high {
            state.items.insert(state.high_count, id);
            state.high_count += 1;
        } else {
            state.items.push_back(id);
        }
        state.in_count += 1;
    }

    fn remove_front_locked(state: &mut ListState) -> PlaceIndex {
        let id = state.items.pop_front().expect("predicate checked non-empty");
        if state.high_count > 0 {
            state.high_count -= 1;
        }
        state.out_count += 1;
        id
    }

    /// Drop-without-blocking insert, used by NONBLOCKING stations once the
    /// cue bound is hit: the caller decides the restore policy; this just
    /// reports whether the slot was accepted.
    pub fn try_insert(&self, id: PlaceIndex, high: bool) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.tries += 1;
        if let Some(cap) = self.capacity {
            if state.items.len() >= cap {
                return false;
            }
        }
        Self::insert_locked(&mut state, id, high);
        drop(state);
        self.non_empty.notify_all();
        true
    }

    /// Blocking insert used by BLOCKING stations: waits for the non-full
    /// condition, subject to `mode` and the attachment's `quit` flag.
    pub fn push_blocking(
        &self,
        id: PlaceIndex,
        high: bool,
        quit: &AtomicBool,
        mode: WaitMode,
    ) -> EtResult<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.tries += 1;

        let deadline = match mode {
            WaitMode::Timed(d) => Some(Instant::now() + d),
            _ => None,
        };

        loop {
            let full = self
                .capacity
                .is_some_and(|cap| state.items.len() >= cap);

            if !full {
                break;
            }
            if quit.load(Ordering::SeqCst) {
                return Err(EtError::Wakeup);
            }

            match mode {
                WaitMode::Async => return Err(EtError::Busy),
                WaitMode::Sleep => {
                    state = self.non_full.wait(state).unwrap_or_else(|e| e.into_inner());
                }
                WaitMode::Timed(_) => {
                    let remaining = deadline
                        .unwrap()
                        .saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(EtError::Timeout);
                    }
                    let (guard, result) = self
                        .non_full
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(|e| e.into_inner());
                    state = guard;
                    if result.timed_out() && quit.load(Ordering::SeqCst) {
                        return Err(EtError::Wakeup);
                    }
                    if result.timed_out() && Instant::now() >= deadline.unwrap() {
                        return Err(EtError::Timeout);
                    }
                }
            }
        }

        if quit.load(Ordering::SeqCst) {
            return Err(EtError::Wakeup);
        }

        Self::insert_locked(&mut state, id, high);
        drop(state);
        self.non_empty.notify_all();
        Ok(())
    }

    /// Blocking remove of up to `count` items, HIGH before LOW, FIFO within
    /// class. Returns either exactly `count` items or an error, never a
    /// partial array.
    pub fn pop_blocking(
        &self,
        count: usize,
        quit: &AtomicBool,
        mode: WaitMode,
    ) -> EtResult<Vec<PlaceIndex>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let deadline = match mode {
            WaitMode::Timed(d) => Some(Instant::now() + d),
            _ => None,
        };

        // Wait until `count` items are available so the removal below can be
        // all-or-nothing: a caller must never observe a partial array.
        loop {
            if state.items.len() >= count {
                break;
            }
            if quit.load(Ordering::SeqCst) {
                return Err(EtError::Wakeup);
            }
            match mode {
                WaitMode::Async => return Err(EtError::Empty),
                WaitMode::Sleep => {
                    state = self.non_empty.wait(state).unwrap_or_else(|e| e.into_inner());
                }
                WaitMode::Timed(_) => {
                    let remaining = deadline
                        .unwrap()
                        .saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(EtError::Timeout);
                    }
                    let (guard, result) = self
                        .non_empty
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(|e| e.into_inner());
                    state = guard;
                    if result.timed_out() && quit.load(Ordering::SeqCst) {
                        return Err(EtError::Wakeup);
                    }
                    if result.timed_out() && Instant::now() >= deadline.unwrap() {
                        return Err(EtError::Timeout);
                    }
                }
            }
        }

        if quit.load(Ordering::SeqCst) {
            return Err(EtError::Wakeup);
        }

        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(Self::remove_front_locked(&mut state));
        }

        drop(state);
        self.non_full.notify_all();
        Ok(out)
    }

    /// Blocking remove of up to `count` items satisfying `matches`, used by
    /// `new`/`new-group` when the caller names a nonzero group: every
    /// removed item is drawn from that group. Items that don't match are
    /// left in place, in their original relative order; HIGH/LOW ordering
    /// among the *matching* items is preserved the same way `pop_blocking`
    /// preserves it among all items.
    pub fn pop_matching_blocking(
        &self,
        count: usize,
        matches: impl Fn(PlaceIndex) -> bool,
        quit: &AtomicBool,
        mode: WaitMode,
    ) -> EtResult<Vec<PlaceIndex>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let deadline = match mode {
            WaitMode::Timed(d) => Some(Instant::now() + d),
            _ => None,
        };

        loop {
            let available = state.items.iter().filter(|&&id| matches(id)).count();
            if available >= count {
                break;
            }
            if quit.load(Ordering::SeqCst) {
                return Err(EtError::Wakeup);
            }
            match mode {
                WaitMode::Async => return Err(EtError::Empty),
                WaitMode::Sleep => {
                    state = self.non_empty.wait(state).unwrap_or_else(|e| e.into_inner());
                }
                WaitMode::Timed(_) => {
                    let remaining = deadline
                        .unwrap()
                        .saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(EtError::Timeout);
                    }
                    let (guard, result) = self
                        .non_empty
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(|e| e.into_inner());
                    state = guard;
                    if result.timed_out() && quit.load(Ordering::SeqCst) {
                        return Err(EtError::Wakeup);
                    }
                    if result.timed_out() && Instant::now() >= deadline.unwrap() {
                        return Err(EtError::Timeout);
                    }
                }
            }
        }

        if quit.load(Ordering::SeqCst) {
            return Err(EtError::Wakeup);
        }

        let mut kept = VecDeque::with_capacity(state.items.len());
        let mut removed = Vec::with_capacity(count);
        let mut new_high_count = 0usize;

        for (idx, id) in state.items.iter().copied().enumerate() {
            let was_high = idx < state.high_count;
            if removed.len() < count && matches(id) {
                removed.push(id);
            } else {
                if was_high {
                    new_high_count += 1;
                }
                kept.push_back(id);
            }
        }

        state.items = kept;
        state.high_count = new_high_count;
        state.out_count += removed.len() as u64;

        drop(state);
        self.non_full.notify_all();
        Ok(removed)
    }

    /// Wake every waiter on this list without performing a mutation.
    pub fn broadcast_wakeup(&self) {
        self.non_empty.notify_all();
        self.non_full.notify_all();
    }
}
