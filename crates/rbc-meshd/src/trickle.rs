//! Trickle broadcast scheduling
//!
//! Every handle owns one [`TrickleTimer`]. While neighbours keep echoing
//! the value we hold, the timer's interval doubles up to `interval_max` and
//! redundant transmissions are suppressed. As soon as anyone disagrees,
//! the interval drops back to `interval_min` so the newer value spreads
//! quickly.
//!
//! Timers run on caller-supplied milliseconds, which keeps the scheduler
//! deterministic under simulated time.

use crate::observer::{MeshObserver, MeshSignal};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rbc_mesh_core::types::ValueHandle;

/// Consistent observations per interval that suppress our own transmission.
pub const DEFAULT_REDUNDANCY: u8 = 3;

/// `interval_max = interval_min << MAX_DOUBLINGS`
pub const MAX_DOUBLINGS: u32 = 8;

/// Interval bounds and suppression threshold shared by all timers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrickleConfig {
    pub interval_min_ms: u64,
    pub interval_max_ms: u64,
    /// Redundancy threshold `k`; 0 disables suppression
    pub redundancy: u8,
}

impl TrickleConfig {
    /// Derive interval bounds from the mesh advertise interval.
    pub fn from_adv_int(adv_int_ms: u32) -> Self {
        let interval_min_ms = u64::from(adv_int_ms);
        Self {
            interval_min_ms,
            interval_max_ms: interval_min_ms << MAX_DOUBLINGS,
            redundancy: DEFAULT_REDUNDANCY,
        }
    }

    pub fn with_redundancy(mut self, redundancy: u8) -> Self {
        self.redundancy = redundancy;
        self
    }
}

/// Per-handle timer state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrickleState {
    /// Nothing to advertise yet
    Idle,
    /// Counting consistent observations until the transmit point
    Listening,
    /// Transmit point reached with too few observations
    TransmitDue,
    /// Transmission skipped for the rest of this interval
    Suppressed,
    /// Transmitted for this interval
    Sent,
}

/// Trickle timer for one handle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrickleTimer {
    state: TrickleState,
    current_interval: u64,
    interval_start: u64,
    transmit_point: u64,
    redundancy_counter: u8,
    requesting: bool,
    inconsistent: bool,
}

impl TrickleTimer {
    fn idle(interval_min_ms: u64) -> Self {
        Self {
            state: TrickleState::Idle,
            current_interval: interval_min_ms,
            interval_start: 0,
            transmit_point: 0,
            redundancy_counter: 0,
            requesting: false,
            inconsistent: false,
        }
    }

    pub fn state(&self) -> TrickleState {
        self.state
    }

    pub fn current_interval(&self) -> u64 {
        self.current_interval
    }

    pub fn interval_start(&self) -> u64 {
        self.interval_start
    }

    pub fn interval_end(&self) -> u64 {
        self.interval_start + self.current_interval
    }

    pub fn transmit_point(&self) -> u64 {
        self.transmit_point
    }

    pub fn redundancy_counter(&self) -> u8 {
        self.redundancy_counter
    }

    /// Whether this timer advertises a request rather than a value
    pub fn is_requesting(&self) -> bool {
        self.requesting
    }

    /// Whether an inconsistency was seen during the current interval
    pub fn is_inconsistent(&self) -> bool {
        self.inconsistent
    }

    fn set_state(&mut self, handle: ValueHandle, to: TrickleState, observer: &dyn MeshObserver) {
        if self.state != to {
            observer.signal(MeshSignal::Transition {
                handle,
                from: self.state,
                to,
            });
            self.state = to;
        }
    }

    /// Start a fresh interval: transmit point uniform in `[I/2, I)`.
    fn begin_interval(
        &mut self,
        handle: ValueHandle,
        start: u64,
        interval: u64,
        rng: &mut StdRng,
        observer: &dyn MeshObserver,
    ) {
        self.current_interval = interval;
        self.interval_start = start;
        self.transmit_point = start + rng.gen_range(interval / 2..interval);
        self.redundancy_counter = 0;
        self.inconsistent = false;
        self.set_state(handle, TrickleState::Listening, observer);
    }
}

/// All Trickle timers of a node
pub struct TrickleScheduler {
    config: TrickleConfig,
    timers: Vec<TrickleTimer>,
    rng: StdRng,
}

impl TrickleScheduler {
    /// Preallocate one idle timer per handle.
    pub fn new(handle_count: u8, config: TrickleConfig, seed: u64) -> Self {
        Self {
            config,
            timers: vec![TrickleTimer::idle(config.interval_min_ms); usize::from(handle_count)],
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn config(&self) -> &TrickleConfig {
        &self.config
    }

    pub fn timer(&self, handle: ValueHandle) -> Option<&TrickleTimer> {
        handle.index().and_then(|i| self.timers.get(i))
    }

    fn index(&self, handle: ValueHandle) -> Option<usize> {
        handle.index().filter(|i| *i < self.timers.len())
    }

    /// The handle now holds a value: leave Idle, or treat as fresh news.
    pub fn start(&mut self, handle: ValueHandle, now: u64, observer: &dyn MeshObserver) {
        let Some(i) = self.index(handle) else {
            return;
        };
        let timer = &mut self.timers[i];
        timer.requesting = false;
        if timer.state == TrickleState::Idle {
            timer.begin_interval(handle, now, self.config.interval_min_ms, &mut self.rng, observer);
        } else {
            self.on_inconsistent(handle, now, observer);
        }
    }

    /// A neighbour advertised exactly what we hold.
    pub fn on_consistent(&mut self, handle: ValueHandle) {
        if let Some(i) = self.index(handle) {
            let timer = &mut self.timers[i];
            if timer.state != TrickleState::Idle {
                timer.redundancy_counter = timer.redundancy_counter.saturating_add(1);
            }
        }
    }

    /// A neighbour disagrees with us: shrink the interval to `interval_min`.
    ///
    /// A timer already at `interval_min` that has not reached its transmit
    /// point keeps its transmit point, so a burst of inconsistencies cannot
    /// keep pushing the pending transmission back. Its redundancy counter is
    /// cleared and the next interval starts at `interval_min` again.
    pub fn on_inconsistent(&mut self, handle: ValueHandle, now: u64, observer: &dyn MeshObserver) {
        let Some(i) = self.index(handle) else {
            return;
        };
        let timer = &mut self.timers[i];
        if timer.state == TrickleState::Idle {
            return;
        }
        let pending = timer.state == TrickleState::Listening;
        if timer.current_interval > self.config.interval_min_ms || !pending {
            timer.begin_interval(handle, now, self.config.interval_min_ms, &mut self.rng, observer);
        } else {
            timer.redundancy_counter = 0;
            timer.inconsistent = true;
        }
    }

    /// Ask the neighbourhood for a handle. Idle timers start advertising a
    /// request; active timers are reset like on an inconsistency.
    pub fn request(&mut self, handle: ValueHandle, now: u64, observer: &dyn MeshObserver) {
        let Some(i) = self.index(handle) else {
            return;
        };
        let timer = &mut self.timers[i];
        if timer.state == TrickleState::Idle {
            timer.requesting = true;
            timer.begin_interval(handle, now, self.config.interval_min_ms, &mut self.rng, observer);
        } else {
            self.on_inconsistent(handle, now, observer);
        }
    }

    /// Run every timer up to `now`.
    ///
    /// `transmit(handle, requesting)` is called for each handle whose
    /// transmit point passed without enough consistent observations and
    /// returns whether something was actually sent. Returns the number of
    /// transmissions.
    pub fn advance<F>(&mut self, now: u64, observer: &dyn MeshObserver, mut transmit: F) -> usize
    where
        F: FnMut(ValueHandle, bool) -> bool,
    {
        let config = self.config;
        let mut sent = 0;

        for (i, timer) in self.timers.iter_mut().enumerate() {
            if timer.state == TrickleState::Idle {
                continue;
            }
            let handle = ValueHandle(i as u16 + 1);

            loop {
                if timer.state == TrickleState::Listening && now >= timer.transmit_point {
                    if config.redundancy == 0 || timer.redundancy_counter < config.redundancy {
                        timer.set_state(handle, TrickleState::TransmitDue, observer);
                        if transmit(handle, timer.requesting) {
                            sent += 1;
                            timer.set_state(handle, TrickleState::Sent, observer);
                        } else {
                            timer.set_state(handle, TrickleState::Suppressed, observer);
                        }
                    } else {
                        timer.set_state(handle, TrickleState::Suppressed, observer);
                    }
                }

                let end = timer.interval_end();
                if now < end {
                    break;
                }

                // Back off unless something disagreed with us during the
                // interval. After a long stall, restart at `now` instead of
                // replaying old intervals.
                let next = if timer.inconsistent {
                    config.interval_min_ms
                } else {
                    (timer.current_interval * 2).min(config.interval_max_ms)
                };
                let start = if now - end >= next { now } else { end };
                timer.begin_interval(handle, start, next, &mut self.rng, observer);
            }
        }

        sent
    }
}
