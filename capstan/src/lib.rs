//! Capstan is the firmware core of a three-axis stepper controller built
//! around TMC2209 stall-guard drivers and a byte-serial host link.
//!
//! The crate is the portable middle of the firmware: it owns the wire
//! protocol, the command agent, the cooperative scheduler and the step
//! generator, and leaves every hardware touchpoint to a trait the board
//! crate implements. The same core runs unchanged on an MCU and inside the
//! host-side emulator used for development and tests.
//!
//! # Architecture
//!
//! Two execution contexts share one processor:
//!
//!   * the **main context** runs the [`Scheduler`] loop, which multiplexes
//!     the command agent (a `Micro` task that pumps the serial link) and
//!     the periodic telemetry reporters;
//!   * a **fixed-rate timer interrupt** runs [`step_tick`], which turns
//!     queued moves into precisely timed step-pin toggles.
//!
//! The two meet only at the per-axis [`MotorChannel`]: move commands cross
//! from the agent to the interrupt through a lock-free SPSC [`Ring`], and
//! completed sequence numbers cross back through a second one. The agent
//! answers the host with a single `ACK` carrying the original sequence
//! number once the interrupt has finished the move.
//!
//! # Hooking up a board
//!
//! Implement [`Transport`] over your serial device, [`Clock`] over a
//! monotonic µs timer, [`Pin`] over the step/dir/diag GPIOs and
//! [`Tmc2209`] over your UART register driver, then:
//!
//! ```no_run
//! use capstan::sim::{Loopback, SimDriver, SimPin, WallClock};
//! use capstan::{telemetry, DriverPower, Motor, MotorBank, MotorChannel, Scheduler, System};
//!
//! static BANK: MotorBank<SimPin, 1> =
//!     MotorBank::new([MotorChannel::new(SimPin::new(), SimPin::new())]);
//!
//! let motors = [Motor::new(0, SimDriver::new(true), SimPin::new(), &BANK[0])];
//! let clock = WallClock::new();
//! let mut system = System::new(Loopback::new(), clock, motors, DriverPower::new(SimPin::new()));
//! system.init();
//!
//! // Timer interrupt (or a thread, on a host): capstan::step_tick(&BANK, now)
//!
//! let mut scheduler: Scheduler<_, _, 8> = Scheduler::new(clock);
//! scheduler.add_micro(System::agent_task).unwrap();
//! scheduler.add_recurrent(telemetry::PERF_PERIOD, telemetry::perf_task).unwrap();
//! scheduler.add_recurrent(telemetry::POS_PERIOD, telemetry::pos_task).unwrap();
//! scheduler.run(&mut system);
//! ```
//!
//! # Wire format
//!
//! Frames are zero-delimited COBS-stuffed byte strings. Unstuffed, a frame
//! is a 4-byte header (XOR checksum, 16-bit little-endian sequence, packed
//! method/property code byte) followed by up to 250 payload bytes. See
//! [`protocol`] for the opcode tables and payload layouts.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(all(not(feature = "std"), test))]
extern crate std;

mod fmt;

pub mod agent;
pub mod clock;
pub mod cobs;
pub mod motor;
pub mod pin;
pub mod protocol;
pub mod ring;
pub mod scheduler;
pub mod step;
pub mod telemetry;
pub mod tmc;
pub mod transport;

#[cfg(feature = "std")]
pub mod sim;

pub use agent::{System, IDENTITY};
pub use clock::{Clock, Micros};
pub use motor::{Command, DriverPower, Motor, MotorBank, MotorChannel};
pub use pin::Pin;
pub use protocol::{Frame, Header, Method, Property, Sequence};
pub use ring::Ring;
pub use scheduler::{Control, Kind, Perf, PerfSink, Scheduler};
pub use step::step_tick;
pub use tmc::Tmc2209;
pub use transport::{Rx, Transport, Tx};
