//! Wire protocol: opcodes, frame header, and payload packets.
//!
//! Every frame is a 4-byte header followed by up to [`MAX_PAYLOAD`] payload
//! bytes, stuffed by the [`cobs`](crate::cobs) codec before hitting the
//! wire. The header carries an XOR checksum, a host-chosen 16-bit sequence
//! number echoed in every reply, and a packed method/property code byte.

use crate::cobs;

/// Host-chosen correlation number, echoed in replies.
pub type Sequence = u16;

pub const HEADER_SIZE: usize = 4;
pub const MAX_PAYLOAD: usize = cobs::MAX_CONTENT - HEADER_SIZE;

/// Operation class, high nibble of the code byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Method {
    Nop = 0x0,
    // host -> device
    Get = 0x1,
    Set = 0x2,
    // device -> host
    Ack = 0x3,
    Rej = 0x4,
    // device -> host, unsolicited
    Syn = 0x8,
    Log = 0xF,
}

impl Method {
    pub fn from_nibble(nibble: u8) -> Option<Self> {
        Some(match nibble {
            0x0 => Method::Nop,
            0x1 => Method::Get,
            0x2 => Method::Set,
            0x3 => Method::Ack,
            0x4 => Method::Rej,
            0x8 => Method::Syn,
            0xF => Method::Log,
            _ => return None,
        })
    }

    pub fn name_of(nibble: u8) -> &'static str {
        match Self::from_nibble(nibble) {
            Some(Method::Nop) => "NOP",
            Some(Method::Get) => "GET",
            Some(Method::Set) => "SET",
            Some(Method::Ack) => "ACK",
            Some(Method::Rej) => "REJ",
            Some(Method::Syn) => "SYN",
            Some(Method::Log) => "LOG",
            None => "UNKNOWN_METHOD",
        }
    }
}

/// Resource selector, low nibble of the code byte.
///
/// `MotHome` is reserved for sensor-less homing and currently has no
/// handler; `MotStat` exposes the live step position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Property {
    Na = 0x0,
    SysEna = 0x1,
    MotEna = 0x2,
    MotCfg = 0x3,
    MotMov = 0x4,
    MotHome = 0x5,
    MotStat = 0x6,
    FwInfo = 0xF,
}

impl Property {
    pub fn from_nibble(nibble: u8) -> Option<Self> {
        Some(match nibble {
            0x0 => Property::Na,
            0x1 => Property::SysEna,
            0x2 => Property::MotEna,
            0x3 => Property::MotCfg,
            0x4 => Property::MotMov,
            0x5 => Property::MotHome,
            0x6 => Property::MotStat,
            0xF => Property::FwInfo,
            _ => return None,
        })
    }

    pub fn name_of(nibble: u8) -> &'static str {
        match Self::from_nibble(nibble) {
            Some(Property::Na) => "NA",
            Some(Property::SysEna) => "SYS_ENA",
            Some(Property::MotEna) => "MOT_ENA",
            Some(Property::MotCfg) => "MOT_CFG",
            Some(Property::MotMov) => "MOT_MOV",
            Some(Property::MotHome) => "MOT_HOME",
            Some(Property::MotStat) => "MOT_STAT",
            Some(Property::FwInfo) => "FW_INFO",
            None => "UNKNOWN_PROPERTY",
        }
    }
}

/// Frame header: `checksum | seq_lo | seq_hi | code`.
///
/// The checksum is the XOR of every other header byte and every payload
/// byte, so a frame XORs to zero overall when intact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub checksum: u8,
    pub sequence: Sequence,
    pub code: u8,
}

impl Header {
    pub fn compose(method: Method, property: Property) -> u8 {
        ((method as u8) << 4) | (property as u8)
    }

    pub fn new(sequence: Sequence, method: Method, property: Property) -> Self {
        Header {
            checksum: 0,
            sequence,
            code: Self::compose(method, property),
        }
    }

    /// Method nibble, possibly outside the [`Method`] enum.
    pub fn method(&self) -> u8 {
        self.code >> 4
    }

    /// Property nibble, possibly outside the [`Property`] enum.
    pub fn property(&self) -> u8 {
        self.code & 0x0F
    }

    pub fn compute_checksum(&self, payload: &[u8]) -> u8 {
        let [lo, hi] = self.sequence.to_le_bytes();
        payload.iter().fold(lo ^ hi ^ self.code, |acc, b| acc ^ b)
    }
}

/// A complete protocol frame, header plus payload, before stuffing.
#[derive(Clone, Copy)]
pub struct Frame {
    pub header: Header,
    payload: [u8; MAX_PAYLOAD],
    payload_len: u8,
}

impl Frame {
    pub const fn new() -> Self {
        Frame {
            header: Header {
                checksum: 0,
                sequence: 0,
                code: 0,
            },
            payload: [0; MAX_PAYLOAD],
            payload_len: 0,
        }
    }

    /// Reassemble a frame from unstuffed wire bytes. `None` if shorter than
    /// a header.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_SIZE || bytes.len() > cobs::MAX_CONTENT {
            return None;
        }
        let mut frame = Frame::new();
        frame.header = Header {
            checksum: bytes[0],
            sequence: u16::from_le_bytes([bytes[1], bytes[2]]),
            code: bytes[3],
        };
        frame.set_payload(&bytes[HEADER_SIZE..]);
        Some(frame)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.payload_len as usize]
    }

    /// Replace the payload, truncating to [`MAX_PAYLOAD`].
    pub fn set_payload(&mut self, bytes: &[u8]) {
        let len = bytes.len().min(MAX_PAYLOAD);
        self.payload[..len].copy_from_slice(&bytes[..len]);
        self.payload_len = len as u8;
    }

    /// Header + payload length.
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload_len as usize
    }

    /// Stamp the checksum over the current contents.
    pub fn seal(&mut self) {
        self.header.checksum = self.header.compute_checksum(self.payload());
    }

    pub fn validate(&self) -> bool {
        self.header.checksum == self.header.compute_checksum(self.payload())
    }

    /// Serialize into `out`, returning the byte count. `out` must hold
    /// [`size`](Self::size) bytes.
    pub fn write_to(&self, out: &mut [u8]) -> usize {
        let [lo, hi] = self.header.sequence.to_le_bytes();
        out[0] = self.header.checksum;
        out[1] = lo;
        out[2] = hi;
        out[3] = self.header.code;
        out[HEADER_SIZE..self.size()].copy_from_slice(self.payload());
        self.size()
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

/// Failed payload read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DecodeError;

/// Types readable from a payload cursor. Multi-byte fields are
/// little-endian, matching the packed structs on the host side.
pub trait Decode: Sized {
    fn decode(data: &mut &[u8]) -> Result<Self, DecodeError>;
}

/// Types writable to a payload buffer.
pub trait Encode {
    fn encode(&self, out: &mut Cursor<'_>);
}

/// Append-only view over a payload buffer. Overruns truncate silently; the
/// fixed packet sizes below make that unreachable in practice.
pub struct Cursor<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Cursor { buf, len: 0 }
    }

    pub fn put(&mut self, bytes: &[u8]) {
        let space = self.buf.len() - self.len;
        let n = bytes.len().min(space);
        self.buf[self.len..self.len + n].copy_from_slice(&bytes[..n]);
        self.len += n;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

fn take<'de>(data: &mut &'de [u8], n: usize) -> Result<&'de [u8], DecodeError> {
    if data.len() < n {
        return Err(DecodeError);
    }
    let (head, rest) = data.split_at(n);
    *data = rest;
    Ok(head)
}

macro_rules! int_codec {
    ($ty:ty) => {
        impl Decode for $ty {
            fn decode(data: &mut &[u8]) -> Result<Self, DecodeError> {
                let bytes = take(data, core::mem::size_of::<$ty>())?;
                let bytes = bytes.try_into().map_err(|_| DecodeError)?;
                Ok(<$ty>::from_le_bytes(bytes))
            }
        }

        impl Encode for $ty {
            fn encode(&self, out: &mut Cursor<'_>) {
                out.put(&self.to_le_bytes());
            }
        }
    };
}

int_codec!(u8);
int_codec!(u16);
int_codec!(u32);
int_codec!(i32);

impl Decode for bool {
    fn decode(data: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(u8::decode(data)? != 0)
    }
}

impl Encode for bool {
    fn encode(&self, out: &mut Cursor<'_>) {
        out.put(&[*self as u8]);
    }
}

/// Decode a packet that must consume the payload exactly. Trailing bytes are
/// as invalid as missing ones.
pub fn parse_exact<P: Decode>(payload: &[u8]) -> Result<P, DecodeError> {
    let mut cursor = payload;
    let value = P::decode(&mut cursor)?;
    if cursor.is_empty() {
        Ok(value)
    } else {
        Err(DecodeError)
    }
}

/// `SYS_ENA` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemEnable {
    pub enable: bool,
}

impl Decode for SystemEnable {
    fn decode(data: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(SystemEnable {
            enable: bool::decode(data)?,
        })
    }
}

impl Encode for SystemEnable {
    fn encode(&self, out: &mut Cursor<'_>) {
        self.enable.encode(out);
    }
}

/// Motor selector, the GET payload for per-motor properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorHeader {
    pub id: u8,
}

impl Decode for MotorHeader {
    fn decode(data: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(MotorHeader {
            id: u8::decode(data)?,
        })
    }
}

impl Encode for MotorHeader {
    fn encode(&self, out: &mut Cursor<'_>) {
        self.id.encode(out);
    }
}

/// `MOT_ENA` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorEnable {
    pub id: u8,
    pub enable: bool,
}

impl Decode for MotorEnable {
    fn decode(data: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(MotorEnable {
            id: u8::decode(data)?,
            enable: bool::decode(data)?,
        })
    }
}

impl Encode for MotorEnable {
    fn encode(&self, out: &mut Cursor<'_>) {
        self.id.encode(out);
        self.enable.encode(out);
    }
}

/// Driver tuning snapshot carried by `MOT_CFG`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorParams {
    /// 1, 2, 4, ... 128; 0 selects the full 256 microstep resolution.
    pub micro_steps: u8,
    /// Stall-guard threshold, 0 disables stall detection.
    pub stall_sensitivity: u8,
    /// Coil current in mA.
    pub rms_current: u16,
}

impl Default for MotorParams {
    fn default() -> Self {
        MotorParams {
            micro_steps: 32,
            stall_sensitivity: 40,
            rms_current: 1000,
        }
    }
}

impl Decode for MotorParams {
    fn decode(data: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(MotorParams {
            micro_steps: u8::decode(data)?,
            stall_sensitivity: u8::decode(data)?,
            rms_current: u16::decode(data)?,
        })
    }
}

impl Encode for MotorParams {
    fn encode(&self, out: &mut Cursor<'_>) {
        self.micro_steps.encode(out);
        self.stall_sensitivity.encode(out);
        self.rms_current.encode(out);
    }
}

/// `MOT_CFG` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorConfig {
    pub id: u8,
    pub params: MotorParams,
}

impl Decode for MotorConfig {
    fn decode(data: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(MotorConfig {
            id: u8::decode(data)?,
            params: MotorParams::decode(data)?,
        })
    }
}

impl Encode for MotorConfig {
    fn encode(&self, out: &mut Cursor<'_>) {
        self.id.encode(out);
        self.params.encode(out);
    }
}

/// `MOT_MOV` payload. The sign of `steps` is the direction; `interval` is
/// the µs between step-pin toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorMove {
    pub id: u8,
    pub steps: i32,
    pub interval: u32,
}

impl Decode for MotorMove {
    fn decode(data: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(MotorMove {
            id: u8::decode(data)?,
            steps: i32::decode(data)?,
            interval: u32::decode(data)?,
        })
    }
}

impl Encode for MotorMove {
    fn encode(&self, out: &mut Cursor<'_>) {
        self.id.encode(out);
        self.steps.encode(out);
        self.interval.encode(out);
    }
}

/// `MOT_STAT` reply payload: live signed step position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorStatus {
    pub id: u8,
    pub position: i32,
}

impl Decode for MotorStatus {
    fn decode(data: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(MotorStatus {
            id: u8::decode(data)?,
            position: i32::decode(data)?,
        })
    }
}

impl Encode for MotorStatus {
    fn encode(&self, out: &mut Cursor<'_>) {
        self.id.encode(out);
        self.position.encode(out);
    }
}
