//! Bounds-checked cursor for decoding packet fields.
//!
//! Every read checks the remaining length first and fails with
//! [`Error::TruncatedPacket`] instead of reading past the end.

use crate::{Error, Result};
use std::net::Ipv4Addr;

/// Read cursor over a byte slice
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buffer: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    /// Create a cursor positioned at the start of `buffer`
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, offset: 0 }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Current offset from the start of the buffer
    pub fn position(&self) -> usize {
        self.offset
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.remaining() < n {
            return Err(Error::TruncatedPacket {
                needed: self.offset + n,
                available: self.buffer.len(),
            });
        }
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8> {
        self.need(1)?;
        let value = self.buffer[self.offset];
        self.offset += 1;
        Ok(value)
    }

    pub fn u16(&mut self) -> Result<u16> {
        let bytes = self.bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn u32(&mut self) -> Result<u32> {
        let bytes = self.bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn ipv4(&mut self) -> Result<Ipv4Addr> {
        self.u32().map(Ipv4Addr::from)
    }

    /// Take the next `n` bytes
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.need(n)?;
        let slice = &self.buffer[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    /// Take a one-byte length prefix followed by that many bytes
    pub fn counted(&mut self) -> Result<&'a [u8]> {
        let len = self.u8()? as usize;
        self.bytes(len)
    }

    /// Take everything that is left
    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.buffer[self.offset..];
        self.offset = self.buffer.len();
        slice
    }
}
