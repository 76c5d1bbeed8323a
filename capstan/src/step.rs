//! The step-pulse generator, run from a fixed-rate timer interrupt.
//!
//! One pass over every axis per tick: skip anything not armed, honor the
//! per-axis interval gate, emit at most one step-pin toggle, and when a
//! move drains publish its sequence number and pull the next command from
//! the queue. The routine never allocates, never blocks and takes no locks;
//! everything it touches is either interrupt-owned or crosses through an
//! SPSC ring.
//!
//! The driver is configured for double-edge stepping, so each toggle is one
//! microstep and `interval` is the time per microstep.

use crate::clock::Micros;
use crate::motor::{MotorBank, MotorChannel};
use crate::pin::Pin;

/// Advance every axis by at most one toggle. `now` is the timestamp of
/// this timer tick.
pub fn step_tick<P: Pin, const M: usize>(bank: &MotorBank<P, M>, now: Micros) {
    for ch in bank {
        if !ch.armed() {
            continue;
        }
        tick_axis(ch, now);
    }
}

fn tick_axis<P: Pin>(ch: &MotorChannel<P>, now: Micros) {
    use core::sync::atomic::Ordering::Relaxed;

    let interval = ch.interval.load(Relaxed) as Micros;
    if now.wrapping_sub(ch.last_step.load(Relaxed)) < interval {
        return;
    }
    ch.last_step.store(now, Relaxed);

    let mut steps = ch.steps.load(Relaxed);
    if steps > 0 {
        ch.step.toggle();
        steps -= 1;
        ch.steps.store(steps, Relaxed);
        ch.position.fetch_add(1, Relaxed);
    } else if steps < 0 {
        ch.step.toggle();
        steps += 1;
        ch.steps.store(steps, Relaxed);
        ch.position.fetch_sub(1, Relaxed);
    }
    if steps != 0 {
        return;
    }

    // The move that just drained owes the host its completion.
    if let Some(seq) = ch.take_active() {
        let pushed = ch.done.push(seq);
        debug_assert!(pushed, "done ring sized to never fill");
    }

    let Some(cmd) = ch.pending.peek() else {
        return;
    };
    ch.set_active(cmd.seq);
    ch.steps.store(cmd.steps, Relaxed);
    ch.interval.store(cmd.interval, Relaxed);
    ch.pending.pop();

    let forward = cmd.steps > 0;
    if ch.dir.read() != forward {
        ch.dir.write(forward);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::{Command, Motor, MotorChannel};
    use crate::sim::{ManualClock, SimDriver, SimPin};

    fn arm(ch: &MotorChannel<SimPin>) {
        let mut motor = Motor::new(0, SimDriver::new(true), SimPin::new(), ch);
        motor.enable(&ManualClock::new());
    }

    fn bank() -> MotorBank<SimPin, 1> {
        MotorBank::new([MotorChannel::new(SimPin::new(), SimPin::new())])
    }

    fn armed_bank() -> MotorBank<SimPin, 1> {
        let bank = bank();
        arm(&bank[0]);
        bank
    }

    fn run(bank: &MotorBank<SimPin, 1>, ticks: u64, period: u64) -> u64 {
        let mut now = 0;
        for _ in 0..ticks {
            now += period;
            step_tick(bank, now);
        }
        now
    }

    #[test]
    fn exact_toggle_count_per_command() {
        let bank = armed_bank();
        let ch = &bank[0];
        ch.pending.push(Command {
            seq: 1,
            steps: 1000,
            interval: 200,
        });
        run(&bank, 2000, 200);
        assert_eq!(ch.step.toggles(), 1000);
        assert_eq!(ch.steps_remaining(), 0);
        assert_eq!(ch.position(), 1000);
        assert!(ch.dir.read());
        assert_eq!(ch.done.pop(), Some(1));
        assert_eq!(ch.done.pop(), None);
    }

    #[test]
    fn reverse_moves_count_down() {
        let bank = armed_bank();
        let ch = &bank[0];
        ch.pending.push(Command {
            seq: 2,
            steps: -250,
            interval: 100,
        });
        run(&bank, 400, 100);
        assert_eq!(ch.step.toggles(), 250);
        assert_eq!(ch.position(), -250);
        assert!(!ch.dir.read());
        assert_eq!(ch.done.pop(), Some(2));
    }

    #[test]
    fn completions_preserve_queue_order() {
        let bank = armed_bank();
        let ch = &bank[0];
        for seq in 1..=4u16 {
            ch.pending.push(Command {
                seq,
                steps: 10,
                interval: 1,
            });
        }
        run(&bank, 100, 10);
        let drained: Vec<u16> = core::iter::from_fn(|| ch.done.pop()).collect();
        assert_eq!(drained, [1, 2, 3, 4]);
        assert_eq!(ch.step.toggles(), 40);
    }

    #[test]
    fn interval_gates_the_step_rate() {
        let bank = armed_bank();
        let ch = &bank[0];
        ch.pending.push(Command {
            seq: 1,
            steps: 100,
            interval: 1000,
        });
        // Ticks arrive every 100 µs; only every tenth may toggle.
        run(&bank, 200, 100);
        assert!(ch.step.toggles() <= 20);
        assert!(ch.steps_remaining() >= 80);
    }

    #[test]
    fn locked_or_disabled_axis_untouched() {
        let bank = bank();
        let ch = &bank[0];
        ch.pending.push(Command {
            seq: 1,
            steps: 10,
            interval: 1,
        });
        run(&bank, 50, 10); // disabled
        assert_eq!(ch.step.toggles(), 0);
        assert_eq!(ch.pending.len(), 1);

        arm(ch);
        ch.set_lock(true);
        run(&bank, 50, 10); // locked
        assert_eq!(ch.step.toggles(), 0);
        assert_eq!(ch.pending.len(), 1);

        ch.set_lock(false);
        run(&bank, 50, 10);
        assert_eq!(ch.step.toggles(), 10);
    }
}
