#![forbid(unsafe_code)]
//! Encoding, varint, and buffer utilities shared by the archive and staging layers.
//!
//! Everything persisted by this crate is little-endian. Decoders never panic on
//! malformed input; truncation and overlong encodings surface as
//! [`RoadError::Corruption`](crate::types::RoadError::Corruption).

pub mod le {
    //! Little-endian appenders for fixed-width fields.

    /// Appends a `u8`.
    pub fn put_u8(dst: &mut Vec<u8>, v: u8) {
        dst.push(v);
    }

    /// Appends a `u16`.
    pub fn put_u16(dst: &mut Vec<u8>, v: u16) {
        dst.extend_from_slice(&v.to_le_bytes());
    }

    /// Appends a `u32`.
    pub fn put_u32(dst: &mut Vec<u8>, v: u32) {
        dst.extend_from_slice(&v.to_le_bytes());
    }

    /// Appends an `i32`.
    pub fn put_i32(dst: &mut Vec<u8>, v: i32) {
        dst.extend_from_slice(&v.to_le_bytes());
    }

    /// Appends a `u64`.
    pub fn put_u64(dst: &mut Vec<u8>, v: u64) {
        dst.extend_from_slice(&v.to_le_bytes());
    }

    /// Appends an `i64`.
    pub fn put_i64(dst: &mut Vec<u8>, v: i64) {
        dst.extend_from_slice(&v.to_le_bytes());
    }

    /// Appends a `u32` length prefix followed by the UTF-8 bytes of `s`.
    pub fn put_str(dst: &mut Vec<u8>, s: &str) {
        put_u32(dst, s.len() as u32);
        dst.extend_from_slice(s.as_bytes());
    }
}

pub mod var {
    //! Unsigned varints and ZigZag signed integers.

    use crate::types::{Result, RoadError};

    /// Encodes a u64 as an unsigned varint.
    pub fn encode_u64(mut v: u64, out: &mut Vec<u8>) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
    }

    /// Decodes a u64 varint from a slice, updating the offset.
    pub fn decode_u64(src: &[u8], off: &mut usize) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        for i in 0..10 {
            let byte = *src
                .get(*off)
                .ok_or_else(|| RoadError::corruption(format!("varint truncated at byte {i}")))?;
            *off += 1;
            let payload = (byte & 0x7f) as u64;
            if i == 9 && payload > 1 {
                return Err(RoadError::corruption("varint overflow (more than 64 bits)"));
            }
            result |= payload << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(RoadError::corruption("varint too long (exceeded 10 bytes)"))
    }

    /// Encodes an i64 as a ZigZag-encoded varint.
    pub fn encode_i64(v: i64, out: &mut Vec<u8>) {
        let zigzag = ((v << 1) ^ (v >> 63)) as u64;
        encode_u64(zigzag, out);
    }

    /// Decodes a ZigZag-encoded i64 varint from a slice, updating the offset.
    pub fn decode_i64(src: &[u8], off: &mut usize) -> Result<i64> {
        let zigzag = decode_u64(src, off)?;
        Ok(((zigzag >> 1) as i64) ^ (-((zigzag & 1) as i64)))
    }

    /// Appends a varint length prefix followed by the UTF-8 bytes of `s`.
    pub fn encode_str(s: &str, out: &mut Vec<u8>) {
        encode_u64(s.len() as u64, out);
        out.extend_from_slice(s.as_bytes());
    }
}

pub mod buf {
    //! A slice-backed cursor for fallible parsing.

    use core::fmt;

    use crate::types::{Result, RoadError};

    use super::var;

    /// A cursor for reading bytes from a slice with offset tracking.
    pub struct Cursor<'a> {
        /// The underlying byte slice.
        pub buf: &'a [u8],
        /// Current read offset.
        pub off: usize,
    }

    impl<'a> Cursor<'a> {
        /// Creates a new cursor starting at offset 0.
        pub fn new(buf: &'a [u8]) -> Self {
            Self { buf, off: 0 }
        }

        /// Takes the next `n` bytes from the cursor, advancing the offset.
        pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
            let end = self
                .off
                .checked_add(n)
                .ok_or_else(|| RoadError::corruption("cursor offset overflow"))?;
            if end > self.buf.len() {
                return Err(RoadError::corruption(format!(
                    "cursor take beyond buffer: need {}, remaining {}",
                    n,
                    self.remaining()
                )));
            }
            let slice = &self.buf[self.off..end];
            self.off = end;
            Ok(slice)
        }

        fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
            let mut out = [0u8; N];
            out.copy_from_slice(self.take(N)?);
            Ok(out)
        }

        /// Reads a `u8`.
        pub fn u8(&mut self) -> Result<u8> {
            Ok(self.array::<1>()?[0])
        }

        /// Reads a little-endian `u16`.
        pub fn u16(&mut self) -> Result<u16> {
            Ok(u16::from_le_bytes(self.array()?))
        }

        /// Reads a little-endian `u32`.
        pub fn u32(&mut self) -> Result<u32> {
            Ok(u32::from_le_bytes(self.array()?))
        }

        /// Reads a little-endian `i32`.
        pub fn i32(&mut self) -> Result<i32> {
            Ok(i32::from_le_bytes(self.array()?))
        }

        /// Reads a little-endian `u64`.
        pub fn u64(&mut self) -> Result<u64> {
            Ok(u64::from_le_bytes(self.array()?))
        }

        /// Reads a little-endian `i64`.
        pub fn i64(&mut self) -> Result<i64> {
            Ok(i64::from_le_bytes(self.array()?))
        }

        /// Reads an unsigned varint.
        pub fn var_u64(&mut self) -> Result<u64> {
            var::decode_u64(self.buf, &mut self.off)
        }

        /// Reads a ZigZag varint.
        pub fn var_i64(&mut self) -> Result<i64> {
            var::decode_i64(self.buf, &mut self.off)
        }

        /// Reads a string with a `u32` length prefix.
        pub fn str(&mut self) -> Result<&'a str> {
            let len = self.u32()? as usize;
            self.utf8(len)
        }

        /// Reads a string with a varint length prefix.
        pub fn var_str(&mut self) -> Result<&'a str> {
            let len = usize::try_from(self.var_u64()?)
                .map_err(|_| RoadError::corruption("string length overflow"))?;
            self.utf8(len)
        }

        fn utf8(&mut self, len: usize) -> Result<&'a str> {
            let body = self.take(len)?;
            core::str::from_utf8(body).map_err(|_| RoadError::corruption("string not valid UTF-8"))
        }

        /// Returns the number of bytes remaining in the buffer.
        pub fn remaining(&self) -> usize {
            self.buf.len().saturating_sub(self.off)
        }

        /// Returns true once every byte has been consumed.
        pub fn is_exhausted(&self) -> bool {
            self.remaining() == 0
        }
    }

    impl<'a> fmt::Debug for Cursor<'a> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Cursor")
                .field("off", &self.off)
                .field("remaining", &self.remaining())
                .finish()
        }
    }
}
