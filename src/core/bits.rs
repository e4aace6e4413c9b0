//! Bit-field extraction and insertion
//!
//! Two orderings are provided:
//! - [`Msb0`]: most-significant bit first inside each byte (RTCM, Asv payload fields)
//! - [`Lsb0`]: little-endian numeric ordering (UBX, SBF, ComNav binary)
//!
//! The free-standing trait functions never fail: bits past the end of the
//! buffer read as zero and writes past the end are dropped. Codecs go through
//! [`BitReader`] and [`BitWriter`], which check bounds with [`ensure_bits`].

use std::marker::PhantomData;

use super::error::CodecError;

/// Bit numbering inside a byte buffer
pub trait BitOrder {
    /// Read `len` (<= 64) bits starting at `*pos` and advance `*pos`
    fn get_u64(buf: &[u8], pos: &mut usize, len: usize) -> u64;

    /// Write the low `len` (<= 64) bits of `value` at `*pos` and advance `*pos`
    fn set_u64(buf: &mut [u8], pos: &mut usize, len: usize, value: u64);

    /// Unsigned read of up to 32 bits
    fn get_u(buf: &[u8], pos: &mut usize, len: usize) -> u32 {
        debug_assert!(len <= 32);
        Self::get_u64(buf, pos, len) as u32
    }

    /// Two's complement read of up to 32 bits, sign-extended from bit `len - 1`
    fn get_s(buf: &[u8], pos: &mut usize, len: usize) -> i32 {
        debug_assert!(len <= 32);
        Self::get_s64(buf, pos, len) as i32
    }

    /// Two's complement read of up to 64 bits
    fn get_s64(buf: &[u8], pos: &mut usize, len: usize) -> i64 {
        let raw = Self::get_u64(buf, pos, len);
        sign_extend(raw, len)
    }

    /// Sign-magnitude read: top bit is the sign, the remaining bits the magnitude
    fn get_sign_magnitude(buf: &[u8], pos: &mut usize, len: usize) -> f64 {
        if len == 0 {
            return 0.0;
        }
        let raw = Self::get_u64(buf, pos, len);
        let magnitude = raw & low_mask(len - 1);
        let value = magnitude as f64;
        if (raw >> (len - 1)) & 1 == 1 {
            -value
        } else {
            value
        }
    }

    /// Unsigned write of up to 32 bits
    fn set_u(buf: &mut [u8], pos: &mut usize, len: usize, value: u32) {
        debug_assert!(len <= 32);
        Self::set_u64(buf, pos, len, u64::from(value));
    }

    /// Two's complement write of up to 32 bits
    fn set_s(buf: &mut [u8], pos: &mut usize, len: usize, value: i32) {
        Self::set_s64(buf, pos, len, i64::from(value));
    }

    /// Two's complement write of up to 64 bits
    fn set_s64(buf: &mut [u8], pos: &mut usize, len: usize, value: i64) {
        Self::set_u64(buf, pos, len, (value as u64) & low_mask(len));
    }

    /// Sign-magnitude write; the magnitude is rounded to the nearest integer
    fn set_sign_magnitude(buf: &mut [u8], pos: &mut usize, len: usize, value: f64) {
        if len == 0 {
            return;
        }
        let magnitude = (value.abs().round() as u64) & low_mask(len - 1);
        let sign = u64::from(value.is_sign_negative() && magnitude != 0);
        Self::set_u64(buf, pos, len, (sign << (len - 1)) | magnitude);
    }
}

/// Most-significant bit first: bit `i` is `buf[i / 8] >> (7 - i % 8)`
#[derive(Debug, Clone, Copy)]
pub struct Msb0;

/// Least-significant bit first: bit `i` is `buf[i / 8] >> (i % 8)`
#[derive(Debug, Clone, Copy)]
pub struct Lsb0;

impl BitOrder for Msb0 {
    fn get_u64(buf: &[u8], pos: &mut usize, len: usize) -> u64 {
        debug_assert!(len <= 64);
        let mut value = 0u64;
        for i in *pos..*pos + len {
            let bit = buf.get(i / 8).map_or(0, |b| (b >> (7 - i % 8)) & 1);
            value = (value << 1) | u64::from(bit);
        }
        *pos += len;
        value
    }

    fn set_u64(buf: &mut [u8], pos: &mut usize, len: usize, value: u64) {
        debug_assert!(len <= 64);
        for k in 0..len {
            let i = *pos + k;
            let bit = ((value >> (len - 1 - k)) & 1) as u8;
            if let Some(byte) = buf.get_mut(i / 8) {
                let shift = 7 - i % 8;
                *byte = (*byte & !(1 << shift)) | (bit << shift);
            }
        }
        *pos += len;
    }
}

impl BitOrder for Lsb0 {
    fn get_u64(buf: &[u8], pos: &mut usize, len: usize) -> u64 {
        debug_assert!(len <= 64);
        let mut value = 0u64;
        for k in 0..len {
            let i = *pos + k;
            let bit = buf.get(i / 8).map_or(0, |b| (b >> (i % 8)) & 1);
            value |= u64::from(bit) << k;
        }
        *pos += len;
        value
    }

    fn set_u64(buf: &mut [u8], pos: &mut usize, len: usize, value: u64) {
        debug_assert!(len <= 64);
        for k in 0..len {
            let i = *pos + k;
            let bit = ((value >> k) & 1) as u8;
            if let Some(byte) = buf.get_mut(i / 8) {
                let shift = i % 8;
                *byte = (*byte & !(1 << shift)) | (bit << shift);
            }
        }
        *pos += len;
    }
}

/// Check that `len` bits starting at `pos` lie inside `buf`
pub fn ensure_bits(buf: &[u8], pos: usize, len: usize) -> Result<(), CodecError> {
    let available = buf.len() * 8;
    if pos + len > available {
        return Err(CodecError::OutOfBounds {
            position: pos,
            length: len,
            available,
        });
    }
    Ok(())
}

fn low_mask(len: usize) -> u64 {
    if len >= 64 {
        u64::MAX
    } else {
        (1u64 << len) - 1
    }
}

fn sign_extend(raw: u64, len: usize) -> i64 {
    if len == 0 || len >= 64 {
        return raw as i64;
    }
    if (raw >> (len - 1)) & 1 == 1 {
        (raw | !low_mask(len)) as i64
    } else {
        raw as i64
    }
}

/// Bounds-checked cursor over a byte slice
#[derive(Debug)]
pub struct BitReader<'a, O: BitOrder> {
    buf: &'a [u8],
    pos: usize,
    _order: PhantomData<O>,
}

impl<'a, O: BitOrder> BitReader<'a, O> {
    /// Start reading at bit 0
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            _order: PhantomData,
        }
    }

    /// Current bit position
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bits left before the end of the buffer
    pub fn remaining_bits(&self) -> usize {
        (self.buf.len() * 8).saturating_sub(self.pos)
    }

    /// Bytes consumed so far, rounding a partial byte up
    pub fn consumed_bytes(&self) -> usize {
        self.pos.div_ceil(8)
    }

    /// Unsigned field of up to 32 bits
    pub fn u(&mut self, len: usize) -> Result<u32, CodecError> {
        ensure_bits(self.buf, self.pos, len)?;
        Ok(O::get_u(self.buf, &mut self.pos, len))
    }

    /// Signed field of up to 32 bits
    pub fn s(&mut self, len: usize) -> Result<i32, CodecError> {
        ensure_bits(self.buf, self.pos, len)?;
        Ok(O::get_s(self.buf, &mut self.pos, len))
    }

    /// Unsigned field of up to 64 bits
    pub fn u64(&mut self, len: usize) -> Result<u64, CodecError> {
        ensure_bits(self.buf, self.pos, len)?;
        Ok(O::get_u64(self.buf, &mut self.pos, len))
    }

    /// Signed field of up to 64 bits
    pub fn s64(&mut self, len: usize) -> Result<i64, CodecError> {
        ensure_bits(self.buf, self.pos, len)?;
        Ok(O::get_s64(self.buf, &mut self.pos, len))
    }

    /// Sign-magnitude field
    pub fn sign_magnitude(&mut self, len: usize) -> Result<f64, CodecError> {
        ensure_bits(self.buf, self.pos, len)?;
        Ok(O::get_sign_magnitude(self.buf, &mut self.pos, len))
    }

    /// IEEE-754 single stored in 32 bits
    pub fn f32(&mut self) -> Result<f32, CodecError> {
        self.u(32).map(f32::from_bits)
    }

    /// IEEE-754 double stored in 64 bits
    pub fn f64(&mut self) -> Result<f64, CodecError> {
        self.u64(64).map(f64::from_bits)
    }

    /// Skip `len` bits
    pub fn skip(&mut self, len: usize) -> Result<(), CodecError> {
        ensure_bits(self.buf, self.pos, len)?;
        self.pos += len;
        Ok(())
    }

    /// Raw bytes; the cursor must be byte aligned
    pub fn bytes(&mut self, count: usize) -> Result<&'a [u8], CodecError> {
        if self.pos % 8 != 0 {
            return Err(CodecError::InvalidField {
                field: "bytes",
                reason: format!("unaligned read at bit {}", self.pos),
            });
        }
        ensure_bits(self.buf, self.pos, count * 8)?;
        let start = self.pos / 8;
        self.pos += count * 8;
        Ok(&self.buf[start..start + count])
    }

    /// Advance `input` past everything this reader consumed
    pub fn commit(self, input: &mut &'a [u8]) {
        let consumed = self.consumed_bytes().min(input.len());
        *input = &input[consumed..];
    }
}

/// Appending writer that grows its vector as fields are written
#[derive(Debug)]
pub struct BitWriter<'a, O: BitOrder> {
    out: &'a mut Vec<u8>,
    start: usize,
    pos: usize,
    _order: PhantomData<O>,
}

impl<'a, O: BitOrder> BitWriter<'a, O> {
    /// Start writing at the current end of `out`
    pub fn new(out: &'a mut Vec<u8>) -> Self {
        let start = out.len();
        Self {
            out,
            start,
            pos: 0,
            _order: PhantomData,
        }
    }

    fn reserve(&mut self, len: usize) {
        let needed = self.start + (self.pos + len).div_ceil(8);
        if self.out.len() < needed {
            self.out.resize(needed, 0);
        }
    }

    /// Bits written so far
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Unsigned field of up to 32 bits
    pub fn u(&mut self, len: usize, value: u32) {
        self.u64(len, u64::from(value));
    }

    /// Signed field of up to 32 bits
    pub fn s(&mut self, len: usize, value: i32) {
        self.s64(len, i64::from(value));
    }

    /// Unsigned field of up to 64 bits
    pub fn u64(&mut self, len: usize, value: u64) {
        self.reserve(len);
        O::set_u64(&mut self.out[self.start..], &mut self.pos, len, value);
    }

    /// Signed field of up to 64 bits
    pub fn s64(&mut self, len: usize, value: i64) {
        self.reserve(len);
        O::set_s64(&mut self.out[self.start..], &mut self.pos, len, value);
    }

    /// Sign-magnitude field
    pub fn sign_magnitude(&mut self, len: usize, value: f64) {
        self.reserve(len);
        O::set_sign_magnitude(&mut self.out[self.start..], &mut self.pos, len, value);
    }

    /// IEEE-754 single
    pub fn f32(&mut self, value: f32) {
        self.u(32, value.to_bits());
    }

    /// IEEE-754 double
    pub fn f64(&mut self, value: f64) {
        self.u64(64, value.to_bits());
    }

    /// Raw bytes; pads to the next byte boundary first
    pub fn bytes(&mut self, data: &[u8]) {
        self.pos = self.pos.div_ceil(8) * 8;
        self.reserve(data.len() * 8);
        let at = self.start + self.pos / 8;
        self.out[at..at + data.len()].copy_from_slice(data);
        self.pos += data.len() * 8;
    }

    /// Zero bits
    pub fn pad(&mut self, len: usize) {
        self.u64(len, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_msb0_reads_across_bytes() {
        let buf = [0b1010_1100, 0b0101_0011];
        let mut pos = 0;
        assert_eq!(Msb0::get_u(&buf, &mut pos, 4), 0b1010);
        assert_eq!(Msb0::get_u(&buf, &mut pos, 8), 0b1100_0101);
        assert_eq!(pos, 12);
    }

    #[test]
    fn test_lsb0_matches_little_endian() {
        let buf = 0x1234_5678u32.to_le_bytes();
        let mut pos = 0;
        assert_eq!(Lsb0::get_u(&buf, &mut pos, 32), 0x1234_5678);

        let mut pos = 0;
        assert_eq!(Lsb0::get_u(&buf, &mut pos, 16), 0x5678);
        assert_eq!(Lsb0::get_u(&buf, &mut pos, 16), 0x1234);
    }

    #[test]
    fn test_sign_extension() {
        let buf = [0xF0];
        let mut pos = 0;
        assert_eq!(Msb0::get_s(&buf, &mut pos, 4), -1);
        assert_eq!(Msb0::get_s(&buf, &mut pos, 4), 0);

        let mut buf = [0u8; 5];
        let mut pos = 0;
        Msb0::set_s64(&mut buf, &mut pos, 38, -123_456_789);
        let mut pos = 0;
        assert_eq!(Msb0::get_s64(&buf, &mut pos, 38), -123_456_789);
    }

    #[test]
    fn test_sign_magnitude() {
        let mut buf = [0u8; 2];
        let mut pos = 0;
        Msb0::set_sign_magnitude(&mut buf, &mut pos, 12, -37.0);
        assert_eq!(buf, [0x82, 0x50]);
        let mut pos = 0;
        assert_eq!(Msb0::get_sign_magnitude(&buf, &mut pos, 12), -37.0);

        let mut buf = [0u8; 2];
        let mut pos = 0;
        Lsb0::set_sign_magnitude(&mut buf, &mut pos, 16, -5.0);
        let mut pos = 0;
        assert_eq!(Lsb0::get_sign_magnitude(&buf, &mut pos, 16), -5.0);
    }

    #[test]
    fn test_out_of_range_reads_zero() {
        let buf = [0xFF];
        let mut pos = 4;
        assert_eq!(Msb0::get_u(&buf, &mut pos, 8), 0xF0);
        assert!(ensure_bits(&buf, 4, 8).is_err());
        assert!(ensure_bits(&buf, 0, 8).is_ok());
    }

    #[test]
    fn test_reader_and_writer() {
        let mut out = vec![0xAA];
        {
            let mut w = BitWriter::<Msb0>::new(&mut out);
            w.u(12, 1005);
            w.s(20, -2);
            w.bytes(b"ok");
        }
        assert_eq!(out.len(), 1 + 4 + 2);

        let mut input: &[u8] = &out[1..];
        let mut r = BitReader::<Msb0>::new(input);
        assert_eq!(r.u(12).unwrap(), 1005);
        assert_eq!(r.s(20).unwrap(), -2);
        assert_eq!(r.bytes(2).unwrap(), b"ok");
        assert!(r.u(1).is_err());
        r.commit(&mut input);
        assert!(input.is_empty());
    }
}
