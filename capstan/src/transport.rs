//! Frame-level receive and transmit over a byte-serial link.
//!
//! [`Rx`] pulls bytes through the stuffing decoder and holds at most one
//! validated frame; a frame with a bad checksum is dropped without reply,
//! since there is nothing trustworthy to correlate a reject against, and
//! the host recovers by timeout. [`Tx`] packs, checksums, stuffs and
//! writes a frame in a single call.

use crate::cobs;
use crate::fmt::debug;
use crate::protocol::{Cursor, Encode, Frame, Header, Method, Property, Sequence, HEADER_SIZE};

/// The byte-serial link to the host.
///
/// `connected` reports link presence where the hardware can tell (USB CDC
/// ports can); the default suits transports with no such signal.
pub trait Transport {
    fn available(&mut self) -> bool;
    fn read(&mut self) -> u8;
    fn write(&mut self, buf: &[u8]) -> usize;
    fn connected(&mut self) -> bool {
        true
    }
}

/// Receive side: incremental unstuffing plus a one-frame holding slot.
pub struct Rx {
    decoder: cobs::Decoder,
    frame: Frame,
    valid: bool,
}

impl Rx {
    pub const fn new() -> Self {
        Rx {
            decoder: cobs::Decoder::new(),
            frame: Frame::new(),
            valid: false,
        }
    }

    /// Pump the link. Stops at the first completed frame, or when the link
    /// runs dry. Never overwrites a frame that has not been taken.
    pub fn recv<T: Transport>(&mut self, link: &mut T) {
        if self.valid {
            return;
        }
        while link.available() {
            match self.decoder.feed(link.read()) {
                Ok(None) => continue,
                Ok(Some(len)) => {
                    self.complete(len);
                    self.decoder.reset();
                    return;
                }
                Err(e) => {
                    debug!("rx stuffing error: {}", e.message());
                    self.decoder.reset();
                    return;
                }
            }
        }
        // A max-length frame is allowed to arrive with no delimiter; it
        // completes once the link goes quiet.
        if let Some(len) = self.decoder.saturated() {
            self.complete(len);
            self.decoder.reset();
        }
    }

    fn complete(&mut self, len: usize) {
        if len < HEADER_SIZE {
            debug!("rx frame too short: {} bytes", len);
            return;
        }
        if let Some(frame) = Frame::parse(&self.decoder.data()[..len]) {
            if frame.validate() {
                self.frame = frame;
                self.valid = true;
            } else {
                debug!(
                    "rx checksum mismatch on {}::{}, frame dropped",
                    Method::name_of(frame.header.method()),
                    Property::name_of(frame.header.property())
                );
            }
        }
    }

    pub fn valid(&self) -> bool {
        self.valid
    }

    /// Remove and return the held frame, freeing the slot.
    pub fn take(&mut self) -> Option<Frame> {
        if self.valid {
            self.valid = false;
            Some(self.frame)
        } else {
            None
        }
    }

    pub fn reset(&mut self) {
        self.valid = false;
        self.decoder.reset();
    }
}

impl Default for Rx {
    fn default() -> Self {
        Self::new()
    }
}

/// Transmit side. Owns the scratch buffers so sending never allocates.
pub struct Tx {
    frame: Frame,
    raw: [u8; cobs::MAX_CONTENT],
    wire: [u8; cobs::MAX_ENCODED],
}

impl Tx {
    pub const fn new() -> Self {
        Tx {
            frame: Frame::new(),
            raw: [0; cobs::MAX_CONTENT],
            wire: [0; cobs::MAX_ENCODED],
        }
    }

    /// Pack, checksum, stuff and write in one shot.
    pub fn send<T: Transport, P: Encode>(
        &mut self,
        link: &mut T,
        seq: Sequence,
        method: Method,
        property: Property,
        payload: &P,
    ) -> usize {
        let mut buf = [0u8; crate::protocol::MAX_PAYLOAD];
        let mut cursor = Cursor::new(&mut buf);
        payload.encode(&mut cursor);
        let len = cursor.len();
        self.transmit(link, seq, method, property, &buf[..len])
    }

    /// A reply that carries no payload.
    pub fn send_empty<T: Transport>(
        &mut self,
        link: &mut T,
        seq: Sequence,
        method: Method,
        property: Property,
    ) -> usize {
        self.transmit(link, seq, method, property, &[])
    }

    /// A human-readable ASCII payload (reject reasons, log lines).
    pub fn print<T: Transport>(
        &mut self,
        link: &mut T,
        seq: Sequence,
        method: Method,
        property: Property,
        text: &str,
    ) -> usize {
        self.transmit(link, seq, method, property, text.as_bytes())
    }

    /// NUL-terminated string payload (the firmware identity).
    pub fn print_cstr<T: Transport>(
        &mut self,
        link: &mut T,
        seq: Sequence,
        method: Method,
        property: Property,
        text: &str,
    ) -> usize {
        let mut buf = [0u8; crate::protocol::MAX_PAYLOAD];
        let mut cursor = Cursor::new(&mut buf);
        cursor.put(text.as_bytes());
        cursor.put(&[0]);
        let len = cursor.len();
        self.transmit(link, seq, method, property, &buf[..len])
    }

    /// Unsolicited trace line, `LOG::NA` with sequence 0.
    pub fn log<T: Transport>(&mut self, link: &mut T, text: &str) -> usize {
        self.print(link, 0, Method::Log, Property::Na, text)
    }

    /// Unsolicited event line, `SYN::NA` with sequence 0.
    pub fn syn<T: Transport>(&mut self, link: &mut T, text: &str) -> usize {
        self.print(link, 0, Method::Syn, Property::Na, text)
    }

    fn transmit<T: Transport>(
        &mut self,
        link: &mut T,
        seq: Sequence,
        method: Method,
        property: Property,
        payload: &[u8],
    ) -> usize {
        self.frame.header = Header::new(seq, method, property);
        self.frame.set_payload(payload);
        self.frame.seal();
        let raw_len = self.frame.write_to(&mut self.raw);
        match cobs::encode(&self.raw[..raw_len], &mut self.wire) {
            Ok(wire_len) => link.write(&self.wire[..wire_len]),
            Err(_) => 0, // unreachable: frame size is bounded by MAX_CONTENT
        }
    }
}

impl Default for Tx {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{parse_exact, MotorMove};
    use crate::sim::Loopback;

    #[test]
    fn tx_to_rx_roundtrip() {
        let mut link = Loopback::new();
        let mut tx = Tx::new();
        let mv = MotorMove {
            id: 0,
            steps: 1000,
            interval: 200,
        };
        tx.send(&mut link, 42, Method::Set, Property::MotMov, &mv);
        link.loop_back();

        let mut rx = Rx::new();
        rx.recv(&mut link);
        let frame = rx.take().expect("frame");
        assert_eq!(frame.header.sequence, 42);
        assert_eq!(frame.header.method(), Method::Set as u8);
        assert_eq!(frame.header.property(), Property::MotMov as u8);
        assert_eq!(parse_exact::<MotorMove>(frame.payload()).unwrap(), mv);
    }

    #[test]
    fn corrupt_frame_dropped_silently() {
        let mut link = Loopback::new();
        let mut tx = Tx::new();
        tx.send(
            &mut link,
            5,
            Method::Set,
            Property::SysEna,
            &crate::protocol::SystemEnable { enable: true },
        );
        let mut bytes = link.take_written();
        // Flip a bit in the stuffed region, avoiding creating a zero.
        let target = bytes.len() - 2;
        bytes[target] ^= if bytes[target] == 0x01 { 0x02 } else { 0x01 };
        link.feed(&bytes);

        let mut rx = Rx::new();
        rx.recv(&mut link);
        assert!(rx.take().is_none());

        // The next well-formed frame still gets through.
        tx.send(
            &mut link,
            6,
            Method::Get,
            Property::SysEna,
            &crate::protocol::SystemEnable { enable: false },
        );
        link.loop_back();
        rx.recv(&mut link);
        assert_eq!(rx.take().unwrap().header.sequence, 6);
    }

    #[test]
    fn held_frame_not_overwritten() {
        let mut link = Loopback::new();
        let mut tx = Tx::new();
        tx.send_empty(&mut link, 1, Method::Get, Property::FwInfo);
        tx.send_empty(&mut link, 2, Method::Get, Property::FwInfo);
        link.loop_back();

        let mut rx = Rx::new();
        rx.recv(&mut link);
        assert!(rx.valid());
        // Second recv with a frame already held must not consume input.
        rx.recv(&mut link);
        assert_eq!(rx.take().unwrap().header.sequence, 1);
        rx.recv(&mut link);
        assert_eq!(rx.take().unwrap().header.sequence, 2);
    }
}
