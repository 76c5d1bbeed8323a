//! Consistent-overhead byte stuffing.
//!
//! Frames on the wire contain no `0x00` byte; a single zero delimits them.
//! Encoding replaces every zero in the input with the distance to the next
//! zero, plus one leading distance byte, so the overhead is exactly one byte
//! per frame (for contents up to [`MAX_CONTENT`] bytes) plus the trailing
//! delimiter.

use crate::fmt::trace;

/// Largest frame content that fits a single stuffing run.
pub const MAX_CONTENT: usize = 254;
/// Worst-case on-wire size: content + distance byte + trailing delimiter.
pub const MAX_ENCODED: usize = MAX_CONTENT + 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CobsError {
    /// A zero byte arrived in the middle of a stuffing run.
    UnexpectedZero,
    /// A data byte arrived with no run open.
    UnexpectedEnd,
    /// Decoded content would exceed [`MAX_CONTENT`] bytes.
    Overflow,
}

impl CobsError {
    pub fn message(self) -> &'static str {
        match self {
            CobsError::UnexpectedZero => "Unexpected zero byte",
            CobsError::UnexpectedEnd => "Unexpected end of data",
            CobsError::Overflow => "Buffer overflow",
        }
    }
}

/// Stuff `input` into `out`, appending the frame delimiter.
///
/// Returns the number of bytes written, always `input.len() + 2`. The output
/// contains no `0x00` except the final delimiter.
pub fn encode(input: &[u8], out: &mut [u8]) -> Result<usize, CobsError> {
    if input.len() > MAX_CONTENT || out.len() < input.len() + 2 {
        return Err(CobsError::Overflow);
    }
    // out[mark] is the open run's distance slot, filled when the run closes.
    let mut mark = 0;
    let mut index = 0;
    let mut counter: u8 = 0;
    for &byte in input {
        index += 1;
        counter += 1;
        if byte == 0 {
            out[mark] = counter;
            mark = index;
            counter = 0;
        } else {
            out[index] = byte;
        }
    }
    out[mark] = counter + 1;
    out[index + 1] = 0;
    Ok(index + 2)
}

/// Incremental unstuffer fed one byte at a time.
///
/// `feed` returns `Ok(Some(len))` when a delimiter completes a frame of
/// `len` content bytes, `Ok(None)` while more input is needed. After any
/// completed frame or error the caller must [`reset`](Decoder::reset) before
/// feeding the next frame.
pub struct Decoder {
    data: [u8; MAX_CONTENT],
    index: usize,
    counter: u8,
}

impl Decoder {
    pub const fn new() -> Self {
        Decoder {
            data: [0; MAX_CONTENT],
            index: 0,
            counter: 0,
        }
    }

    pub fn reset(&mut self) {
        self.index = 0;
        self.counter = 0;
    }

    /// Content decoded so far.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.index]
    }

    pub fn feed(&mut self, byte: u8) -> Result<Option<usize>, CobsError> {
        if byte == 0 {
            return if self.counter == 0 {
                // Stray delimiter between frames.
                Ok(None)
            } else if self.counter == 1 {
                Ok(Some(self.index))
            } else {
                Err(CobsError::UnexpectedZero)
            };
        }
        if self.index == 0 && self.counter == 0 {
            self.counter = byte;
            return Ok(None);
        }
        if self.counter == 0 {
            return Err(CobsError::UnexpectedEnd);
        }
        if self.index >= MAX_CONTENT {
            return Err(CobsError::Overflow);
        }
        if self.counter == 1 {
            // Run boundary: the encoded byte is the next distance, and the
            // position it displaced was a literal zero.
            self.counter = byte;
            self.data[self.index] = 0;
        } else {
            self.data[self.index] = byte;
            self.counter -= 1;
        }
        self.index += 1;
        Ok(None)
    }

    /// A maximum-length frame may omit its trailing delimiter. Call when the
    /// input runs dry to check for that completion.
    pub fn saturated(&self) -> Option<usize> {
        if self.index == MAX_CONTENT && self.counter == 1 {
            trace!("cobs: max-length frame completed without delimiter");
            Some(MAX_CONTENT)
        } else {
            None
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
