use byteorder::{ByteOrder, LittleEndian};

use crate::ScdError;

/// Positioned reader over the bytes of a single instruction.
///
/// Context resolvers receive this cursor parked at the operand they are asked about.
/// They may read ahead or seek back to earlier operands, but if they decline they
/// must leave the position where they found it; [`InstructionCursor::transaction`]
/// does that bookkeeping for them.
#[derive(Debug, Clone)]
pub struct InstructionCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> InstructionCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.buf
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos.min(self.buf.len());
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn byte_at(&self, pos: usize) -> Option<u8> {
        self.buf.get(pos).copied()
    }

    pub fn read_u8(&mut self) -> Result<u8, ScdError> {
        if self.remaining() < 1 {
            return Err(ScdError::Eof);
        }
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn read_u16(&mut self) -> Result<u16, ScdError> {
        if self.remaining() < 2 {
            return Err(ScdError::Eof);
        }
        let v = LittleEndian::read_u16(&self.buf[self.pos..self.pos + 2]);
        self.pos += 2;
        Ok(v)
    }

    pub fn read_i16(&mut self) -> Result<i16, ScdError> {
        if self.remaining() < 2 {
            return Err(ScdError::Eof);
        }
        let v = LittleEndian::read_i16(&self.buf[self.pos..self.pos + 2]);
        self.pos += 2;
        Ok(v)
    }

    pub fn read_u32(&mut self) -> Result<u32, ScdError> {
        if self.remaining() < 4 {
            return Err(ScdError::Eof);
        }
        let v = LittleEndian::read_u32(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(v)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], ScdError> {
        if self.remaining() < n {
            return Err(ScdError::Eof);
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    /// Runs `f` and rewinds to the starting position unless it returns `Some`.
    pub fn transaction<T>(&mut self, f: impl FnOnce(&mut Self) -> Option<T>) -> Option<T> {
        let start = self.pos;
        let result = f(self);
        if result.is_none() {
            self.pos = start;
        }
        result
    }
}

/// MSB-first bit reader used for packed operands.
#[derive(Debug, Clone)]
pub struct BitCursor<'a> {
    buf: &'a [u8],
    bit: usize,
}

impl<'a> BitCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, bit: 0 }
    }

    pub fn bits_remaining(&self) -> usize {
        (self.buf.len() * 8).saturating_sub(self.bit)
    }

    pub fn read_bits(&mut self, count: usize) -> Result<u32, ScdError> {
        if count > 32 || self.bits_remaining() < count {
            return Err(ScdError::Eof);
        }
        let mut v: u32 = 0;
        for _ in 0..count {
            let byte = self.buf[self.bit / 8];
            let shift = 7 - (self.bit % 8);
            v = (v << 1) | ((byte >> shift) & 1) as u32;
            self.bit += 1;
        }
        Ok(v)
    }

    pub fn read_nibble(&mut self) -> Result<u8, ScdError> {
        Ok(self.read_bits(4)? as u8)
    }

    /// Reads a 12-bit two's complement value.
    pub fn read_int12(&mut self) -> Result<i16, ScdError> {
        let raw = self.read_bits(12)? as i16;
        Ok((raw << 4) >> 4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_words() {
        let bytes = hex::decode("09 0a 32 00 fe ff".replace(' ', "")).unwrap();
        let mut c = InstructionCursor::new(&bytes);
        assert_eq!(c.read_u8().unwrap(), 0x09);
        assert_eq!(c.read_u8().unwrap(), 10);
        assert_eq!(c.read_u16().unwrap(), 50);
        assert_eq!(c.read_i16().unwrap(), -2);
        assert!(matches!(c.read_u8(), Err(ScdError::Eof)));
    }

    #[test]
    fn reads_wide_offset_words() {
        let bytes = [0x08, 0x00, 0x00, 0x00, 0x0c, 0x00, 0x01];
        let mut c = InstructionCursor::new(&bytes);
        assert_eq!(c.read_u32().unwrap(), 8);
        assert!(matches!(c.read_u32(), Err(ScdError::Eof)));
        assert_eq!(c.position(), 4);
    }

    #[test]
    fn declined_transaction_restores_position() {
        let bytes = [0x2c, 0x01, 0x05, 0x00];
        let mut c = InstructionCursor::new(&bytes);
        c.seek(3);
        let declined: Option<u8> = c.transaction(|c| {
            c.seek(1);
            let _ = c.read_u8();
            None
        });
        assert!(declined.is_none());
        assert_eq!(c.position(), 3);

        let accepted = c.transaction(|c| c.read_u8().ok());
        assert_eq!(accepted, Some(0x00));
        assert_eq!(c.position(), 4);
    }

    #[test]
    fn seek_is_clamped() {
        let bytes = [1, 2, 3];
        let mut c = InstructionCursor::new(&bytes);
        c.seek(10);
        assert_eq!(c.position(), 3);
        assert_eq!(c.remaining(), 0);
        assert_eq!(c.byte_at(1), Some(2));
    }

    #[test]
    fn nibbles_are_high_first() {
        let bytes = [0xa5];
        let mut b = BitCursor::new(&bytes);
        assert_eq!(b.read_nibble().unwrap(), 0xa);
        assert_eq!(b.read_nibble().unwrap(), 0x5);
        assert!(matches!(b.read_nibble(), Err(ScdError::Eof)));
    }

    #[test]
    fn int12_sign_extends() {
        // 0x7ff and 0x801 packed back to back
        let bytes = [0x7f, 0xf8, 0x01];
        let mut b = BitCursor::new(&bytes);
        assert_eq!(b.read_int12().unwrap(), 2047);
        assert_eq!(b.read_int12().unwrap(), -2047);
        assert_eq!(b.bits_remaining(), 0);
        assert!(matches!(b.read_int12(), Err(ScdError::Eof)));
    }
}
