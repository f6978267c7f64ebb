// ========================================================================================
//
//                      Bounds-checked byte and bit cursors
//
// ========================================================================================
//
// The decoder never trusts a length it has not checked. Every read returns a typed
// error instead of walking off the end of a payload.

use crate::error::{BgenError, Result};

/// A little-endian reader over a borrowed byte slice with an explicit position.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    /// Fails unless at least `needed` bytes remain.
    #[inline]
    pub fn require(&self, needed: usize, what: &str) -> Result<()> {
        if self.remaining() < needed {
            return Err(BgenError::variant(format!(
                "payload truncated while reading {what}: need {needed} bytes at offset {}, only {} remain",
                self.position,
                self.remaining()
            )));
        }
        Ok(())
    }

    pub fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        self.require(len, what)?;
        let slice = &self.bytes[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    #[inline]
    pub fn read_u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    #[inline]
    pub fn read_u16(&mut self, what: &str) -> Result<u16> {
        let raw = self.take(2, what)?;
        Ok(u16::from_le_bytes([raw[0], raw[1]]))
    }

    #[inline]
    pub fn read_u32(&mut self, what: &str) -> Result<u32> {
        let raw = self.take(4, what)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    /// Hands the unread tail to a bit reader. The cursor itself is left untouched.
    pub fn rest(&self) -> &'a [u8] {
        &self.bytes[self.position..]
    }
}

/// Pulls `b`-bit unsigned fields (1..=32) from a byte stream, least-significant bit
/// first. Up to 31 leftover bits plus one freshly loaded byte live in the carry
/// register between calls, so 64 bits of state is always enough.
#[derive(Debug)]
pub struct BitReader<'a> {
    bytes: &'a [u8],
    position: usize,
    pending_value: u64,
    pending_bits: u32,
}

pub const MAX_BIT_WIDTH: u32 = 32;

impl<'a> BitReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            position: 0,
            pending_value: 0,
            pending_bits: 0,
        }
    }

    /// Number of bits handed out so far.
    #[inline]
    pub fn bits_consumed(&self) -> u64 {
        self.position as u64 * 8 - u64::from(self.pending_bits)
    }

    #[inline]
    pub fn read(&mut self, width: u32) -> Result<u32> {
        if width == 0 || width > MAX_BIT_WIDTH {
            return Err(BgenError::variant(format!(
                "bit width {width} is outside 1..={MAX_BIT_WIDTH}"
            )));
        }
        while self.pending_bits < width {
            let Some(&byte) = self.bytes.get(self.position) else {
                return Err(BgenError::variant(format!(
                    "bit reader overrun: requested {width} bits with {} pending and no bytes left (payload is {} bytes)",
                    self.pending_bits,
                    self.bytes.len()
                )));
            };
            self.pending_value |= u64::from(byte) << self.pending_bits;
            self.pending_bits += 8;
            self.position += 1;
        }
        let mask = (1u64 << width) - 1;
        let value = (self.pending_value & mask) as u32;
        self.pending_value >>= width;
        self.pending_bits -= width;
        Ok(value)
    }

    /// Reads one field and scales it onto `[0, 1]` by `2^width - 1`.
    #[inline]
    pub fn read_probability(&mut self, width: u32) -> Result<f64> {
        let raw = self.read(width)?;
        Ok(f64::from(raw) / max_encoded_value(width))
    }
}

#[inline]
pub fn max_encoded_value(width: u32) -> f64 {
    ((1u64 << width) - 1) as f64
}
