//! Packed little-endian (de)serialization of protocol structures.
//!
//! The coprocessor exchanges `__packed` C structures.  Every [`Wire`] type encodes to
//! exactly [`Wire::SIZE`] bytes, with no padding other than what the firmware layout
//! spells out.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::vec::Vec;

use crate::{Error, Result};

/// A fixed-size structure exchanged with the coprocessor
pub trait Wire: Sized {
    /// Encoded size in bytes
    const SIZE: usize;

    fn write_to(&self, w: &mut WireWriter);

    fn read_from(r: &mut WireReader<'_>) -> Result<Self>;

    fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(Self::SIZE);
        self.write_to(&mut w);
        debug_assert_eq!(w.len(), Self::SIZE);
        w.into_inner()
    }

    fn from_bytes(buf: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(buf);
        Self::read_from(&mut r)
    }
}

/// Cursor writing packed little-endian fields
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    pub fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    pub fn zeros(&mut self, n: usize) {
        self.buf.resize(self.buf.len() + n, 0);
    }

    /// Write a NUL padded string field of exactly `n` bytes, truncating if needed
    pub fn str_field(&mut self, s: &str, n: usize) {
        let bytes = s.as_bytes();
        let len = bytes.len().min(n);
        self.buf.extend_from_slice(&bytes[..len]);
        self.zeros(n - len);
    }

    pub fn put<T: Wire>(&mut self, v: &T) {
        v.write_to(self);
    }
}

/// Cursor reading packed little-endian fields
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::Truncated);
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn bool(&mut self) -> Result<bool> {
        Ok(self.u8()? != 0)
    }

    pub fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut word = [0u8; 8];
        word.copy_from_slice(b);
        Ok(u64::from_le_bytes(word))
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    pub fn get<T: Wire>(&mut self) -> Result<T> {
        T::read_from(self)
    }
}

/// The part of a NUL padded string field before the first NUL
pub fn str_field(field: &[u8]) -> &[u8] {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    &field[..end]
}

impl Wire for () {
    const SIZE: usize = 0;

    fn write_to(&self, _w: &mut WireWriter) {}

    fn read_from(_r: &mut WireReader<'_>) -> Result<Self> {
        Ok(())
    }
}

impl Wire for u8 {
    const SIZE: usize = 1;

    fn write_to(&self, w: &mut WireWriter) {
        w.u8(*self);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        r.u8()
    }
}

impl Wire for bool {
    const SIZE: usize = 1;

    fn write_to(&self, w: &mut WireWriter) {
        w.bool(*self);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        r.bool()
    }
}

impl Wire for u32 {
    const SIZE: usize = 4;

    fn write_to(&self, w: &mut WireWriter) {
        w.u32(*self);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        r.u32()
    }
}

impl Wire for i32 {
    const SIZE: usize = 4;

    fn write_to(&self, w: &mut WireWriter) {
        w.u32(*self as u32);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(r.u32()? as i32)
    }
}

impl Wire for u64 {
    const SIZE: usize = 8;

    fn write_to(&self, w: &mut WireWriter) {
        w.u64(*self);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        r.u64()
    }
}
