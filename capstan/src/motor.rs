//! Per-axis motor state.
//!
//! Each axis is split in two, so the two execution contexts never share
//! mutable state outside the queues and a few atomics:
//!
//!   * [`MotorChannel`] is the block the step interrupt works on: the
//!     enable/lock gates, the live step countdown, the step/dir pins, and
//!     the two SPSC rings. Channels live in a [`MotorBank`], an array that
//!     stays put for the lifetime of the firmware so the interrupt can
//!     hold a reference.
//!   * [`Motor`] is the main-context entity: configuration snapshot, the
//!     TMC driver handle, the DIAG line, and a reference to its channel.
//!
//! Command lifecycle: accepted into `pending` by the agent, executed by the
//! interrupt, sequence number surfaced through `done`, acknowledged by the
//! agent. `disable()` converts everything still in flight into rejects.

use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};

use crate::clock::{Clock, Micros};
use crate::fmt::{debug, info};
use crate::pin::Pin;
use crate::protocol::{Method, MotorParams, Property, Sequence};
use crate::ring::Ring;
use crate::tmc::Tmc2209;
use crate::transport::{Transport, Tx};

/// Queue depth for host move commands, per axis.
pub const PENDING_CAPACITY: usize = 256;
/// Completion queue depth: twice `PENDING_CAPACITY`, so the interrupt can
/// always publish a completion even with a full command backlog plus the
/// one in flight.
pub const DONE_CAPACITY: usize = 512;

pub const MOTOR_DISABLED: &str = "Motor Disabled";

/// One queued move, as handed from the agent to the interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub seq: Sequence,
    pub steps: i32,
    pub interval: u32,
}

// `active` packs Option<Sequence> into one atomic: bit 16 = occupied.
const ACTIVE: u32 = 1 << 16;

/// The interrupt-facing half of a motor.
pub struct MotorChannel<P: Pin> {
    /// Set last by `enable()`, cleared first by `disable()`; the interrupt
    /// skips the axis while clear.
    enabled: AtomicBool,
    /// Cooperative pause: the interrupt skips the axis while set, without
    /// touching any of its state.
    lock: AtomicBool,

    // Interrupt-owned while enabled; the main context touches these only
    // after clearing `enabled`.
    pub(crate) steps: AtomicI32,
    pub(crate) interval: AtomicU32,
    pub(crate) last_step: AtomicU64,
    pub(crate) active: AtomicU32,
    pub(crate) position: AtomicI32,

    pub step: P,
    pub dir: P,

    /// Moves awaiting execution. Producer: agent. Consumer: interrupt.
    pub pending: Ring<Command, PENDING_CAPACITY>,
    /// Completed sequence numbers. Producer: interrupt. Consumer: agent.
    pub done: Ring<Sequence, DONE_CAPACITY>,
}

impl<P: Pin> MotorChannel<P> {
    pub const fn new(step: P, dir: P) -> Self {
        MotorChannel {
            enabled: AtomicBool::new(false),
            lock: AtomicBool::new(false),
            steps: AtomicI32::new(0),
            interval: AtomicU32::new(0),
            last_step: AtomicU64::new(0),
            active: AtomicU32::new(0),
            position: AtomicI32::new(0),
            step,
            dir,
            pending: Ring::new(),
            done: Ring::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_lock(&self, locked: bool) {
        self.lock.store(locked, Ordering::Release);
    }

    /// Gate checked by the interrupt on every tick.
    pub fn armed(&self) -> bool {
        self.enabled.load(Ordering::Acquire) && !self.lock.load(Ordering::Acquire)
    }

    /// Signed step position accumulated by the interrupt.
    pub fn position(&self) -> i32 {
        self.position.load(Ordering::Relaxed)
    }

    /// Steps remaining in the move being executed.
    pub fn steps_remaining(&self) -> i32 {
        self.steps.load(Ordering::Relaxed)
    }

    pub(crate) fn set_active(&self, seq: Sequence) {
        self.active.store(ACTIVE | seq as u32, Ordering::Relaxed);
    }

    pub(crate) fn take_active(&self) -> Option<Sequence> {
        let value = self.active.swap(0, Ordering::Relaxed);
        if value & ACTIVE != 0 {
            Some(value as u16)
        } else {
            None
        }
    }
}

/// The stable home of every axis' interrupt-facing half.
///
/// Built once at startup and handed to the step interrupt, which walks it
/// on every timer tick; the main context reaches individual channels
/// through indexing. Must outlive both contexts, so it normally lives in a
/// `static` (or is leaked on a host).
pub struct MotorBank<P: Pin, const M: usize> {
    channels: [MotorChannel<P>; M],
}

impl<P: Pin, const M: usize> MotorBank<P, M> {
    pub const fn new(channels: [MotorChannel<P>; M]) -> Self {
        MotorBank { channels }
    }

    pub fn iter(&self) -> core::slice::Iter<'_, MotorChannel<P>> {
        self.channels.iter()
    }
}

impl<P: Pin, const M: usize> core::ops::Index<usize> for MotorBank<P, M> {
    type Output = MotorChannel<P>;

    fn index(&self, axis: usize) -> &MotorChannel<P> {
        &self.channels[axis]
    }
}

impl<'a, P: Pin, const M: usize> IntoIterator for &'a MotorBank<P, M> {
    type Item = &'a MotorChannel<P>;
    type IntoIter = core::slice::Iter<'a, MotorChannel<P>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// The main-context side of an axis.
pub struct Motor<'a, D, P: Pin> {
    /// Driver bus address, doubling as the motor id on the wire.
    pub addr: u8,
    pub config: MotorParams,
    pub driver: D,
    /// Stall output from the driver; unused until homing lands.
    pub diag: P,
    pub channel: &'a MotorChannel<P>,
}

impl<'a, D: Tmc2209, P: Pin> Motor<'a, D, P> {
    pub fn new(addr: u8, driver: D, diag: P, channel: &'a MotorChannel<P>) -> Self {
        Motor {
            addr,
            config: MotorParams::default(),
            driver,
            diag,
            channel,
        }
    }

    /// Bring the axis to a known, disabled state. Idempotent.
    pub fn init(&mut self) {
        self.channel.enabled.store(false, Ordering::Release);
        self.channel.step.write(false);
        self.channel.dir.write(false);
        self.driver.toff(0);
        self.channel.steps.store(0, Ordering::Relaxed);
        self.channel.interval.store(0, Ordering::Relaxed);
        self.channel.active.store(0, Ordering::Relaxed);
    }

    /// True when the driver answers on the UART bus.
    pub fn online(&mut self) -> bool {
        self.driver.test_connection() == 0
    }

    pub fn enabled(&self) -> bool {
        self.channel.is_enabled()
    }

    /// Arm the axis: push the configuration to the driver, power the output
    /// stage, then publish the enable flag. The flag comes last so the
    /// interrupt only ever sees a fully configured channel.
    pub fn enable<C: Clock>(&mut self, clock: &C) {
        if self.enabled() {
            return;
        }
        self.push_config();
        self.driver.toff(5);
        self.channel
            .last_step
            .store(clock.monotonic_micros(), Ordering::Relaxed);
        self.channel.enabled.store(true, Ordering::Release);
        info!("motor {} enabled", self.addr);
    }

    /// Disarm the axis and settle every command the host is still owed a
    /// reply for: completed moves are acknowledged, the in-flight move and
    /// everything queued behind it are rejected.
    pub fn disable<T: Transport>(&mut self, tx: &mut Tx, link: &mut T) {
        self.channel.enabled.store(false, Ordering::Release);
        self.driver.toff(0);
        while let Some(seq) = self.channel.done.pop() {
            tx.send_empty(link, seq, Method::Ack, Property::MotMov);
        }
        if let Some(seq) = self.channel.take_active() {
            tx.print(link, seq, Method::Rej, Property::MotMov, MOTOR_DISABLED);
        }
        while let Some(cmd) = self.channel.pending.pop() {
            tx.print(link, cmd.seq, Method::Rej, Property::MotMov, MOTOR_DISABLED);
        }
        self.channel.steps.store(0, Ordering::Relaxed);
        self.channel.interval.store(0, Ordering::Relaxed);
        info!("motor {} disabled", self.addr);
    }

    /// Replace the configuration snapshot, pushing it to the driver
    /// immediately when the axis is live.
    pub fn update_config(&mut self, params: MotorParams) {
        self.config = params;
        if self.enabled() {
            // Hold the interrupt off the axis while the UART transactions
            // run; step timing through a reconfigure is meaningless anyway.
            self.channel.set_lock(true);
            self.push_config();
            self.channel.set_lock(false);
        }
        debug!(
            "motor {} config: {} usteps, {} mA, sg {}",
            self.addr, self.config.micro_steps, self.config.rms_current, self.config.stall_sensitivity
        );
    }

    fn push_config(&mut self) {
        let micro_steps = match self.config.micro_steps {
            0 => 256u16,
            ms => ms as u16,
        };
        self.driver.blank_time(2);
        self.driver.rms_current(self.config.rms_current);
        self.driver.microsteps(micro_steps);
        self.driver.en_spread_cycle(false);
        self.driver.pwm_autoscale(true);
        // DIAG pulses on stall only while TCOOLTHRS >= TSTEP > TPWMTHRS.
        self.driver.tcoolthrs(0xFFFFF);
        self.driver.tpwmthrs(0);
        self.driver.sgthrs(self.config.stall_sensitivity);
    }
}

/// The shared enable rail feeding every driver's EN input.
pub struct DriverPower<P: Pin> {
    en: P,
    enabled: bool,
}

impl<P: Pin> DriverPower<P> {
    pub fn new(en: P) -> Self {
        en.write(false);
        DriverPower { en, enabled: false }
    }

    pub fn enable(&mut self) {
        self.en.write(true);
        self.enabled = true;
        info!("driver rail on");
    }

    pub fn disable(&mut self) {
        self.en.write(false);
        self.enabled = false;
        info!("driver rail off");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Loopback, ManualClock, SimDriver, SimPin};

    fn channel() -> MotorChannel<SimPin> {
        MotorChannel::new(SimPin::new(), SimPin::new())
    }

    #[test]
    fn enable_pushes_configuration_in_order() {
        let ch = channel();
        let clock = ManualClock::new();
        let mut motor = Motor::new(0, SimDriver::new(true), SimPin::new(), &ch);
        motor.init();
        motor.enable(&clock);

        assert!(motor.enabled());
        let writes = motor.driver.writes.clone();
        let names: Vec<&str> = writes.iter().map(|(name, _)| *name).collect();
        assert_eq!(
            names,
            [
                "toff", // init resets the output stage
                "blank_time",
                "rms_current",
                "microsteps",
                "en_spread_cycle",
                "pwm_autoscale",
                "tcoolthrs",
                "tpwmthrs",
                "sgthrs",
                "toff",
            ]
        );
        assert_eq!(*writes.last().unwrap(), ("toff", 5));
        assert_eq!(writes[2], ("rms_current", 1000));
        assert_eq!(writes[3], ("microsteps", 32));
    }

    #[test]
    fn enable_is_idempotent() {
        let ch = channel();
        let clock = ManualClock::new();
        let mut motor = Motor::new(1, SimDriver::new(true), SimPin::new(), &ch);
        motor.enable(&clock);
        let count = motor.driver.writes.len();
        motor.enable(&clock);
        assert_eq!(motor.driver.writes.len(), count);
    }

    #[test]
    fn disable_settles_every_outstanding_command() {
        let ch = channel();
        let clock = ManualClock::new();
        let mut motor = Motor::new(0, SimDriver::new(true), SimPin::new(), &ch);
        let mut tx = Tx::new();
        let mut link = Loopback::new();
        motor.enable(&clock);

        ch.done.push(7);
        ch.set_active(8);
        ch.pending.push(Command {
            seq: 9,
            steps: 100,
            interval: 50,
        });
        ch.steps.store(55, core::sync::atomic::Ordering::Relaxed);

        motor.disable(&mut tx, &mut link);

        assert!(!motor.enabled());
        assert_eq!(ch.steps_remaining(), 0);
        assert!(ch.pending.is_empty());
        assert!(ch.done.is_empty());

        let frames = crate::sim::decode_stream(&link.take_written());
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].header.sequence, 7);
        assert_eq!(frames[0].header.method(), Method::Ack as u8);
        assert_eq!(frames[1].header.sequence, 8);
        assert_eq!(frames[1].header.method(), Method::Rej as u8);
        assert_eq!(frames[1].payload(), MOTOR_DISABLED.as_bytes());
        assert_eq!(frames[2].header.sequence, 9);
        assert_eq!(frames[2].header.method(), Method::Rej as u8);
    }

    #[test]
    fn update_config_repushes_only_when_enabled() {
        let ch = channel();
        let clock = ManualClock::new();
        let mut motor = Motor::new(0, SimDriver::new(true), SimPin::new(), &ch);
        let params = MotorParams {
            micro_steps: 16,
            stall_sensitivity: 10,
            rms_current: 600,
        };
        motor.update_config(params);
        assert_eq!(motor.config, params);
        assert!(motor.driver.writes.is_empty());

        motor.enable(&clock);
        motor.driver.writes.clear();
        motor.update_config(MotorParams::default());
        assert!(motor
            .driver
            .writes
            .iter()
            .any(|w| *w == ("rms_current", 1000)));
    }
}
