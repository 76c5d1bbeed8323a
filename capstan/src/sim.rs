//! Host-side stand-ins for the board collaborators, shared by the test
//! suite and the emulator binary. Everything here mirrors the trait
//! surfaces the real board provides; nothing here ships in firmware.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::clock::{Clock, Micros};
use crate::cobs;
use crate::pin::Pin;
use crate::protocol::{Cursor, Encode, Frame, Header, Method, Property, Sequence};
use crate::tmc::Tmc2209;
use crate::transport::Transport;

/// Real time since construction.
#[derive(Clone, Copy)]
pub struct WallClock {
    epoch: Instant,
}

impl WallClock {
    pub fn new() -> Self {
        WallClock {
            epoch: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for WallClock {
    fn monotonic_micros(&self) -> Micros {
        self.epoch.elapsed().as_micros() as Micros
    }
}

/// Hand-advanced clock for deterministic tests. Clones share the counter.
#[derive(Clone, Default)]
pub struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, us: Micros) {
        self.0.fetch_add(us, Ordering::Relaxed);
    }

    pub fn set(&self, us: Micros) {
        self.0.store(us, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn monotonic_micros(&self) -> Micros {
        self.0.load(Ordering::Relaxed)
    }
}

/// GPIO line backed by an atomic, with a toggle counter for step auditing.
#[derive(Default)]
pub struct SimPin {
    level: AtomicBool,
    toggles: AtomicU32,
}

impl SimPin {
    pub const fn new() -> Self {
        SimPin {
            level: AtomicBool::new(false),
            toggles: AtomicU32::new(0),
        }
    }

    /// Toggles seen since construction.
    pub fn toggles(&self) -> u32 {
        self.toggles.load(Ordering::Relaxed)
    }
}

impl Pin for SimPin {
    fn read(&self) -> bool {
        self.level.load(Ordering::Relaxed)
    }

    fn write(&self, level: bool) {
        self.level.store(level, Ordering::Relaxed);
    }

    fn toggle(&self) {
        self.level.fetch_xor(true, Ordering::Relaxed);
        self.toggles.fetch_add(1, Ordering::Relaxed);
    }
}

/// TMC2209 stand-in: records every register write in order and answers the
/// connection probe.
pub struct SimDriver {
    pub online: bool,
    pub writes: Vec<(&'static str, u32)>,
}

impl SimDriver {
    pub fn new(online: bool) -> Self {
        SimDriver {
            online,
            writes: Vec::new(),
        }
    }

    pub fn last(&self, register: &str) -> Option<u32> {
        self.writes
            .iter()
            .rev()
            .find(|(name, _)| *name == register)
            .map(|(_, value)| *value)
    }
}

impl Tmc2209 for SimDriver {
    fn test_connection(&mut self) -> u8 {
        if self.online {
            0
        } else {
            2
        }
    }

    fn rms_current(&mut self, ma: u16) {
        self.writes.push(("rms_current", ma as u32));
    }

    fn microsteps(&mut self, ms: u16) {
        self.writes.push(("microsteps", ms as u32));
    }

    fn sgthrs(&mut self, threshold: u8) {
        self.writes.push(("sgthrs", threshold as u32));
    }

    fn toff(&mut self, value: u8) {
        self.writes.push(("toff", value as u32));
    }

    fn blank_time(&mut self, value: u8) {
        self.writes.push(("blank_time", value as u32));
    }

    fn en_spread_cycle(&mut self, enable: bool) {
        self.writes.push(("en_spread_cycle", enable as u32));
    }

    fn pwm_autoscale(&mut self, enable: bool) {
        self.writes.push(("pwm_autoscale", enable as u32));
    }

    fn tcoolthrs(&mut self, value: u32) {
        self.writes.push(("tcoolthrs", value));
    }

    fn tpwmthrs(&mut self, value: u32) {
        self.writes.push(("tpwmthrs", value));
    }
}

/// In-memory serial link: the test feeds the inbound queue and inspects the
/// outbound buffer.
pub struct Loopback {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    pub connected: bool,
}

impl Loopback {
    pub fn new() -> Self {
        Loopback {
            inbound: VecDeque::new(),
            outbound: Vec::new(),
            connected: true,
        }
    }

    /// Queue bytes for the device to read.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes);
    }

    /// Everything the device wrote since the last call.
    pub fn take_written(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.outbound)
    }

    /// Route the device's own output back into its input.
    pub fn loop_back(&mut self) {
        let written = self.take_written();
        self.feed(&written);
    }
}

impl Transport for Loopback {
    fn available(&mut self) -> bool {
        !self.inbound.is_empty()
    }

    fn read(&mut self) -> u8 {
        self.inbound.pop_front().unwrap_or(0)
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        self.outbound.extend_from_slice(buf);
        buf.len()
    }

    fn connected(&mut self) -> bool {
        self.connected
    }
}

/// Host-side frame builder: what a driver library would put on the wire.
pub fn encode_frame<P: Encode>(
    seq: Sequence,
    method: Method,
    property: Property,
    payload: &P,
) -> Vec<u8> {
    let mut buf = [0u8; crate::protocol::MAX_PAYLOAD];
    let mut cursor = Cursor::new(&mut buf);
    payload.encode(&mut cursor);
    let len = cursor.len();
    encode_frame_raw(seq, method, property, &buf[..len])
}

pub fn encode_frame_raw(
    seq: Sequence,
    method: Method,
    property: Property,
    payload: &[u8],
) -> Vec<u8> {
    let mut frame = Frame::new();
    frame.header = Header::new(seq, method, property);
    frame.set_payload(payload);
    frame.seal();
    let mut raw = [0u8; cobs::MAX_CONTENT];
    let raw_len = frame.write_to(&mut raw);
    let mut wire = vec![0u8; cobs::MAX_ENCODED];
    let wire_len = cobs::encode(&raw[..raw_len], &mut wire).expect("frame within bounds");
    wire.truncate(wire_len);
    wire
}

/// Host-side stream splitter: unstuff a captured byte stream back into
/// frames, skipping idle delimiters.
pub fn decode_stream(bytes: &[u8]) -> Vec<Frame> {
    let mut frames = Vec::new();
    let mut decoder = cobs::Decoder::new();
    for &byte in bytes {
        match decoder.feed(byte) {
            Ok(Some(len)) => {
                let frame = Frame::parse(&decoder.data()[..len]).expect("frame-sized content");
                assert!(frame.validate(), "corrupt frame in captured stream");
                frames.push(frame);
                decoder.reset();
            }
            Ok(None) => {}
            Err(e) => panic!("stuffing error in captured stream: {}", e.message()),
        }
    }
    if let Some(len) = decoder.saturated() {
        let frame = Frame::parse(&decoder.data()[..len]).expect("frame-sized content");
        assert!(frame.validate());
        frames.push(frame);
    }
    frames
}
