//! Cooperative task loop for the main context.
//!
//! Tasks come in three shapes: `Recurrent` fires on a fixed period, `Once`
//! fires when armed and its time arrives (the body may re-arm itself), and
//! `Micro` runs after every other tick so latency-sensitive work, above
//! all draining the serial link, interleaves with slower housekeeping.
//!
//! Each pass batches every task whose deadline falls inside a short
//! lookahead window, then runs them earliest-deadline-first. The window
//! stops the loop from ping-ponging between two tasks whose deadlines are
//! microseconds apart.

use crate::clock::{elapsed, Clock, Micros};

/// Upper bound on registered tasks.
pub const MAX_TASKS: usize = 64;

/// Deadline batching window, µs.
pub const LOOKAHEAD: Micros = 10;

/// Recurrent tasks first fire this long after registration.
const STARTUP_DELAY: Micros = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Recurrent { period: Micros },
    Once { pending: bool },
    Micro,
}

/// Per-task bookkeeping, handed to the body so it can reschedule itself.
pub struct Control {
    kind: Kind,
    next_tick: Micros,
    tick_pending: bool,
}

impl Control {
    /// Re-arm a `Once` task `delay` µs after `now`.
    pub fn sleep(&mut self, now: Micros, delay: Micros) {
        self.schedule(now.wrapping_add(delay));
    }

    /// Re-arm a `Once` task at an absolute time.
    pub fn schedule(&mut self, at: Micros) {
        match &mut self.kind {
            Kind::Once { pending } => {
                *pending = true;
                self.next_tick = at;
            }
            _ => panic!("only Once tasks reschedule themselves"),
        }
    }
}

/// Task body: context, own control block, pass timestamp.
pub type TaskFn<C> = fn(&mut C, &mut Control, Micros);

struct Slot<C> {
    ctl: Control,
    run: TaskFn<C>,
}

/// Scheduler load counters over the current reporting window.
#[derive(Debug, Clone, Copy)]
pub struct Perf {
    /// Window start.
    pub since: Micros,
    /// µs spent inside task bodies.
    pub busy: u64,
    /// Completed passes.
    pub loops: u64,
}

impl Perf {
    pub fn new(now: Micros) -> Self {
        Perf {
            since: now,
            busy: 0,
            loops: 0,
        }
    }

    /// Fraction of the window spent in task bodies.
    pub fn utilization(&self, duration: Micros) -> f64 {
        if duration == 0 {
            return 1.0;
        }
        self.busy as f64 / duration as f64
    }

    /// Pass rate over the window, in kHz.
    pub fn frequency_khz(&self, duration: Micros) -> f64 {
        if duration == 0 {
            return 0.0;
        }
        1_000.0 * self.loops as f64 / duration as f64
    }

    pub fn reset(&mut self, now: Micros) {
        self.since = now;
        self.busy = 0;
        self.loops = 0;
    }
}

/// Where the scheduler publishes its load counters.
pub trait PerfSink {
    fn perf(&mut self) -> &mut Perf;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskListFull;

#[cfg(test)]
pub(crate) fn test_control() -> Control {
    Control {
        kind: Kind::Micro,
        next_tick: 0,
        tick_pending: false,
    }
}

pub struct Scheduler<K: Clock, C, const N: usize = MAX_TASKS> {
    clock: K,
    tasks: heapless::Vec<Slot<C>, N>,
}

impl<K: Clock, C: PerfSink, const N: usize> Scheduler<K, C, N> {
    pub fn new(clock: K) -> Self {
        Scheduler {
            clock,
            tasks: heapless::Vec::new(),
        }
    }

    pub fn add_recurrent(&mut self, period: Micros, run: TaskFn<C>) -> Result<(), TaskListFull> {
        let next_tick = self.clock.monotonic_micros().wrapping_add(STARTUP_DELAY);
        self.add(Kind::Recurrent { period }, next_tick, run)
    }

    /// Register a `Once` task, initially disarmed; arm it from another
    /// task's body via [`Control::schedule`].
    pub fn add_once(&mut self, run: TaskFn<C>) -> Result<(), TaskListFull> {
        let next_tick = self.clock.monotonic_micros();
        self.add(Kind::Once { pending: false }, next_tick, run)
    }

    /// Register a `Once` task already armed for `at`.
    pub fn add_once_at(&mut self, at: Micros, run: TaskFn<C>) -> Result<(), TaskListFull> {
        self.add(Kind::Once { pending: true }, at, run)
    }

    pub fn add_micro(&mut self, run: TaskFn<C>) -> Result<(), TaskListFull> {
        self.add(Kind::Micro, 0, run)
    }

    fn add(&mut self, kind: Kind, next_tick: Micros, run: TaskFn<C>) -> Result<(), TaskListFull> {
        self.tasks
            .push(Slot {
                ctl: Control {
                    kind,
                    next_tick,
                    tick_pending: false,
                },
                run,
            })
            .map_err(|_| TaskListFull)
    }

    /// Run forever.
    pub fn run(&mut self, ctx: &mut C) -> ! {
        loop {
            self.pass(ctx);
        }
    }

    /// One scheduling pass: mark everything due inside the lookahead
    /// window, drain it earliest-first (ties broken by registration order),
    /// running every Micro task after each tick and at least once even on
    /// an idle pass.
    pub fn pass(&mut self, ctx: &mut C) {
        let now = self.clock.monotonic_micros();
        let deadline = now.wrapping_add(LOOKAHEAD);

        for slot in &mut self.tasks {
            let due = elapsed(deadline, slot.ctl.next_tick) as i64 > 0;
            slot.ctl.tick_pending = match slot.ctl.kind {
                Kind::Recurrent { .. } => due,
                Kind::Once { pending } => pending && due,
                Kind::Micro => false,
            };
        }

        loop {
            let mut selected: Option<usize> = None;
            for (i, slot) in self.tasks.iter().enumerate() {
                if !slot.ctl.tick_pending {
                    continue;
                }
                match selected {
                    None => selected = Some(i),
                    Some(j) => {
                        let best = self.tasks[j].ctl.next_tick;
                        if elapsed(best, slot.ctl.next_tick) as i64 > 0 {
                            selected = Some(i);
                        }
                    }
                }
            }

            if let Some(i) = selected {
                let slot = &mut self.tasks[i];
                // Advance before the body runs, so the body may override.
                match &mut slot.ctl.kind {
                    Kind::Recurrent { period } => {
                        slot.ctl.next_tick = slot.ctl.next_tick.wrapping_add(*period);
                    }
                    Kind::Once { pending } => *pending = false,
                    Kind::Micro => unreachable!("micro tasks are never marked pending"),
                }
                let begin = self.clock.monotonic_micros();
                (slot.run)(ctx, &mut slot.ctl, now);
                slot.ctl.tick_pending = false;
                ctx.perf().busy += elapsed(self.clock.monotonic_micros(), begin);
            }

            for i in 0..self.tasks.len() {
                let slot = &mut self.tasks[i];
                if !matches!(slot.ctl.kind, Kind::Micro) {
                    continue;
                }
                let begin = self.clock.monotonic_micros();
                (slot.run)(ctx, &mut slot.ctl, begin);
                ctx.perf().busy += elapsed(self.clock.monotonic_micros(), begin);
            }
            ctx.perf().loops += 1;

            if selected.is_none() {
                break;
            }
        }
    }
}
