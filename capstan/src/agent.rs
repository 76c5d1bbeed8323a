//! The command agent: frame dispatch and reply generation.
//!
//! [`System`] owns everything the main context touches (the serial link,
//! the frame codecs, the motor entities, the shared driver rail, the
//! scheduler's load counters) and threads it all explicitly instead of
//! reaching for globals. The step interrupt sees none of this; it works
//! the motor channels only.
//!
//! Replies are synchronous except for `SET MOT_MOV`: an accepted move is
//! acknowledged later, with the same sequence number, once the interrupt
//! reports it through the axis' `done` ring.

use core::fmt::Write as _;

use heapless::String;

use crate::clock::{Clock, Micros};
use crate::fmt::{debug, info};
use crate::motor::{Command, DriverPower, Motor, MOTOR_DISABLED};
use crate::pin::Pin;
use crate::protocol::{
    parse_exact, Frame, Method, MotorConfig, MotorEnable, MotorHeader, MotorMove, MotorStatus,
    Property, SystemEnable,
};
use crate::scheduler::{Control, Perf, PerfSink};
use crate::tmc::Tmc2209;
use crate::transport::{Rx, Transport, Tx};

/// Reported to the host by `GET FW_INFO`.
pub const IDENTITY: &str = concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"));

const BAD_PAYLOAD: &str = "Invalid payload";
const NO_SUCH_MOTOR: &str = "No such motor";
const MOTOR_OFFLINE: &str = "Motor Offline";
const MOTOR_QUEUE_FULL: &str = "Motor Queue Full";

/// The firmware's main-context state, wired together at startup.
pub struct System<'a, T, K, D, P: Pin, const M: usize> {
    pub link: T,
    pub clock: K,
    pub rx: Rx,
    pub tx: Tx,
    pub motors: [Motor<'a, D, P>; M],
    pub drv: DriverPower<P>,
    pub perf: Perf,
    connected: bool,
}

impl<'a, T, K, D, P, const M: usize> System<'a, T, K, D, P, M>
where
    T: Transport,
    K: Clock,
    D: Tmc2209,
    P: Pin,
{
    pub fn new(link: T, clock: K, motors: [Motor<'a, D, P>; M], drv: DriverPower<P>) -> Self {
        let now = clock.monotonic_micros();
        System {
            link,
            clock,
            rx: Rx::new(),
            tx: Tx::new(),
            motors,
            drv,
            perf: Perf::new(now),
            connected: false,
        }
    }

    /// Bring every axis to its power-on state.
    pub fn init(&mut self) {
        for motor in &mut self.motors {
            motor.init();
        }
        info!("{} up, {} axes", IDENTITY, M);
    }

    /// Scheduler entry point (Micro task).
    pub fn agent_task(ctx: &mut Self, _ctl: &mut Control, now: Micros) {
        ctx.tick(now);
    }

    /// One agent pass: link supervision, completion drain, frame pump.
    pub fn tick(&mut self, _now: Micros) {
        if !self.link.connected() {
            if self.connected {
                self.connected = false;
                info!("host disconnected");
            }
            // A vanished host must not leave motors running.
            if self.drv.is_enabled() {
                self.disable_all();
            }
            return;
        }
        if !self.connected {
            self.connected = true;
            info!("host connected");
        }

        self.drain_done();

        loop {
            self.rx.recv(&mut self.link);
            if let Some(frame) = self.rx.take() {
                self.process(&frame);
                continue;
            }
            // Nothing completed: either the link is dry or a frame was
            // dropped; keep pumping while bytes remain.
            if !self.link.available() {
                break;
            }
        }
    }

    /// Emit the deferred `ACK MOT_MOV` for every move the interrupt has
    /// finished, per axis, in completion order.
    fn drain_done(&mut self) {
        for motor in &self.motors {
            while let Some(seq) = motor.channel.done.pop() {
                self.tx
                    .send_empty(&mut self.link, seq, Method::Ack, Property::MotMov);
            }
        }
    }

    fn disable_all(&mut self) {
        for motor in &mut self.motors {
            // The rail switch must always win, online or not.
            motor.disable(&mut self.tx, &mut self.link);
        }
        self.drv.disable();
    }

    fn motor_index(&self, id: u8) -> Option<usize> {
        self.motors.iter().position(|m| m.addr == id)
    }

    /// Dispatch one validated frame.
    pub fn process(&mut self, frame: &Frame) {
        let seq = frame.header.sequence;
        let method = frame.header.method();
        let property = frame.header.property();
        debug!(
            "rx [{}] {}::{}",
            seq,
            Method::name_of(method),
            Property::name_of(property)
        );

        match (Method::from_nibble(method), Property::from_nibble(property)) {
            (Some(Method::Get), Some(Property::FwInfo)) => {
                self.tx
                    .print_cstr(&mut self.link, seq, Method::Ack, Property::FwInfo, IDENTITY);
            }

            (Some(Method::Get), Some(Property::SysEna)) => {
                let state = SystemEnable {
                    enable: self.drv.is_enabled(),
                };
                self.tx
                    .send(&mut self.link, seq, Method::Ack, Property::SysEna, &state);
            }

            (Some(Method::Set), Some(Property::SysEna)) => {
                match parse_exact::<SystemEnable>(frame.payload()) {
                    Err(_) => {
                        self.tx
                            .print(&mut self.link, seq, Method::Rej, Property::SysEna, BAD_PAYLOAD);
                    }
                    Ok(cmd) => {
                        if cmd.enable {
                            self.drv.enable();
                        } else {
                            self.disable_all();
                        }
                        let state = SystemEnable {
                            enable: self.drv.is_enabled(),
                        };
                        self.tx
                            .send(&mut self.link, seq, Method::Ack, Property::SysEna, &state);
                    }
                }
            }

            (Some(Method::Get), Some(Property::MotEna)) => {
                match parse_exact::<MotorHeader>(frame.payload()) {
                    Err(_) => {
                        self.tx
                            .print(&mut self.link, seq, Method::Rej, Property::MotEna, BAD_PAYLOAD);
                    }
                    Ok(query) => match self.motor_index(query.id) {
                        None => {
                            self.tx.print(
                                &mut self.link,
                                seq,
                                Method::Rej,
                                Property::MotEna,
                                NO_SUCH_MOTOR,
                            );
                        }
                        Some(i) => {
                            let state = MotorEnable {
                                id: query.id,
                                enable: self.motors[i].enabled(),
                            };
                            self.tx
                                .send(&mut self.link, seq, Method::Ack, Property::MotEna, &state);
                        }
                    },
                }
            }

            (Some(Method::Set), Some(Property::MotEna)) => {
                match parse_exact::<MotorEnable>(frame.payload()) {
                    Err(_) => {
                        self.tx
                            .print(&mut self.link, seq, Method::Rej, Property::MotEna, BAD_PAYLOAD);
                    }
                    Ok(cmd) => match self.motor_index(cmd.id) {
                        None => {
                            self.tx.print(
                                &mut self.link,
                                seq,
                                Method::Rej,
                                Property::MotEna,
                                NO_SUCH_MOTOR,
                            );
                        }
                        Some(i) => {
                            let motor = &mut self.motors[i];
                            if cmd.enable != motor.enabled() {
                                if !motor.online() {
                                    self.tx.print(
                                        &mut self.link,
                                        seq,
                                        Method::Rej,
                                        Property::MotEna,
                                        MOTOR_OFFLINE,
                                    );
                                    return;
                                }
                                if cmd.enable {
                                    motor.enable(&self.clock);
                                } else {
                                    motor.disable(&mut self.tx, &mut self.link);
                                }
                            }
                            let state = MotorEnable {
                                id: cmd.id,
                                enable: self.motors[i].enabled(),
                            };
                            self.tx
                                .send(&mut self.link, seq, Method::Ack, Property::MotEna, &state);
                        }
                    },
                }
            }

            (Some(Method::Get), Some(Property::MotCfg)) => {
                match parse_exact::<MotorHeader>(frame.payload()) {
                    Err(_) => {
                        self.tx
                            .print(&mut self.link, seq, Method::Rej, Property::MotCfg, BAD_PAYLOAD);
                    }
                    Ok(query) => match self.motor_index(query.id) {
                        None => {
                            self.tx.print(
                                &mut self.link,
                                seq,
                                Method::Rej,
                                Property::MotCfg,
                                NO_SUCH_MOTOR,
                            );
                        }
                        Some(i) => {
                            let reply = MotorConfig {
                                id: self.motors[i].addr,
                                params: self.motors[i].config,
                            };
                            self.tx
                                .send(&mut self.link, seq, Method::Ack, Property::MotCfg, &reply);
                        }
                    },
                }
            }

            (Some(Method::Set), Some(Property::MotCfg)) => {
                match parse_exact::<MotorConfig>(frame.payload()) {
                    Err(_) => {
                        self.tx
                            .print(&mut self.link, seq, Method::Rej, Property::MotCfg, BAD_PAYLOAD);
                    }
                    Ok(cmd) => match self.motor_index(cmd.id) {
                        None => {
                            self.tx.print(
                                &mut self.link,
                                seq,
                                Method::Rej,
                                Property::MotCfg,
                                NO_SUCH_MOTOR,
                            );
                        }
                        Some(i) => {
                            let motor = &mut self.motors[i];
                            if motor.online() {
                                motor.update_config(cmd.params);
                                let reply = MotorConfig {
                                    id: self.motors[i].addr,
                                    params: self.motors[i].config,
                                };
                                self.tx
                                    .send(&mut self.link, seq, Method::Ack, Property::MotCfg, &reply);
                            } else {
                                self.tx.print(
                                    &mut self.link,
                                    seq,
                                    Method::Rej,
                                    Property::MotCfg,
                                    MOTOR_OFFLINE,
                                );
                            }
                        }
                    },
                }
            }

            (Some(Method::Set), Some(Property::MotMov)) => {
                match parse_exact::<MotorMove>(frame.payload()) {
                    Err(_) => {
                        self.tx
                            .print(&mut self.link, seq, Method::Rej, Property::MotMov, BAD_PAYLOAD);
                    }
                    Ok(mv) => match self.motor_index(mv.id) {
                        None => {
                            self.tx.print(
                                &mut self.link,
                                seq,
                                Method::Rej,
                                Property::MotMov,
                                NO_SUCH_MOTOR,
                            );
                        }
                        Some(i) => {
                            let motor = &self.motors[i];
                            if !motor.enabled() {
                                self.tx.print(
                                    &mut self.link,
                                    seq,
                                    Method::Rej,
                                    Property::MotMov,
                                    MOTOR_DISABLED,
                                );
                            } else if !motor.channel.pending.writable() {
                                self.tx.print(
                                    &mut self.link,
                                    seq,
                                    Method::Rej,
                                    Property::MotMov,
                                    MOTOR_QUEUE_FULL,
                                );
                            } else {
                                motor.channel.pending.push(Command {
                                    seq,
                                    steps: mv.steps,
                                    interval: mv.interval,
                                });
                                // ACK deferred until the interrupt reports
                                // completion through the done ring.
                            }
                        }
                    },
                }
            }

            (Some(Method::Get), Some(Property::MotStat)) => {
                match parse_exact::<MotorHeader>(frame.payload()) {
                    Err(_) => {
                        self.tx
                            .print(&mut self.link, seq, Method::Rej, Property::MotStat, BAD_PAYLOAD);
                    }
                    Ok(query) => match self.motor_index(query.id) {
                        None => {
                            self.tx.print(
                                &mut self.link,
                                seq,
                                Method::Rej,
                                Property::MotStat,
                                NO_SUCH_MOTOR,
                            );
                        }
                        Some(i) => {
                            let reply = MotorStatus {
                                id: query.id,
                                position: self.motors[i].channel.position(),
                            };
                            self.tx
                                .send(&mut self.link, seq, Method::Ack, Property::MotStat, &reply);
                        }
                    },
                }
            }

            _ => {
                let mut reason = String::<64>::new();
                let _ = write!(
                    reason,
                    "Unsupported command: {}::{}",
                    Method::name_of(method),
                    Property::name_of(property)
                );
                self.tx
                    .print(&mut self.link, seq, Method::Rej, Property::Na, &reason);
            }
        }
    }
}

impl<'a, T, K, D, P: Pin, const M: usize> PerfSink for System<'a, T, K, D, P, M> {
    fn perf(&mut self) -> &mut Perf {
        &mut self.perf
    }
}
