//! Fixed header and stream table of the archive file.
//!
//! ```text
//! 0        64             meta_off+meta_len                  table_off
//! | header | metadata+crc | stream payload | stream payload | stream table |
//! ```

use std::convert::TryFrom;
use std::ops::Range;

use crate::primitives::bytes::{buf::Cursor, le};
use crate::storage::column::ColumnKind;
use crate::types::{block_crc32, Result, RoadError};

/// File magic.
pub const ARCHIVE_MAGIC: [u8; 4] = *b"RDGA";
/// Format version written by this build; readers reject anything else.
pub const ARCHIVE_FORMAT_VERSION: u16 = 1;
/// Size of the fixed header.
pub const HEADER_LEN: usize = 64;

mod header {
    //! Byte offsets for fixed header fields.
    use core::ops::Range;

    pub const MAGIC: Range<usize> = 0..4;
    pub const FORMAT_VERSION: Range<usize> = 4..6;
    pub const FLAGS: Range<usize> = 6..8;
    pub const META_OFFSET: Range<usize> = 8..16;
    pub const META_LEN: Range<usize> = 16..20;
    pub const TABLE_OFFSET: Range<usize> = 20..28;
    pub const TABLE_LEN: Range<usize> = 28..32;
    pub const STREAM_COUNT: Range<usize> = 32..36;
    pub const RESERVED: Range<usize> = 36..60;
    pub const CRC32: Range<usize> = 60..64;
}

/// Decoded archive header.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
pub struct Header {
    /// Format version recorded in the file.
    pub format_version: u16,
    /// Reserved feature flags (currently always zero).
    pub flags: u16,
    /// Offset of the metadata block.
    pub meta_offset: u64,
    /// Length of the metadata block including its checksum.
    pub meta_len: u32,
    /// Offset of the stream table.
    pub table_offset: u64,
    /// Length of the stream table.
    pub table_len: u32,
    /// Number of entries in the stream table.
    pub stream_count: u32,
}

impl Header {
    /// Encodes the header, computing its checksum.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[header::MAGIC].copy_from_slice(&ARCHIVE_MAGIC);
        buf[header::FORMAT_VERSION].copy_from_slice(&self.format_version.to_le_bytes());
        buf[header::FLAGS].copy_from_slice(&self.flags.to_le_bytes());
        buf[header::META_OFFSET].copy_from_slice(&self.meta_offset.to_le_bytes());
        buf[header::META_LEN].copy_from_slice(&self.meta_len.to_le_bytes());
        buf[header::TABLE_OFFSET].copy_from_slice(&self.table_offset.to_le_bytes());
        buf[header::TABLE_LEN].copy_from_slice(&self.table_len.to_le_bytes());
        buf[header::STREAM_COUNT].copy_from_slice(&self.stream_count.to_le_bytes());
        buf[header::RESERVED].fill(0);
        let crc = block_crc32(&buf[..header::CRC32.start]);
        buf[header::CRC32].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes and verifies a header.
    ///
    /// The version is checked before the checksum so that a newer layout is
    /// reported as unsupported rather than corrupt.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(RoadError::corruption("archive header truncated"));
        }
        if buf[header::MAGIC] != ARCHIVE_MAGIC {
            return Err(RoadError::corruption("archive magic mismatch"));
        }
        let format_version = u16::from_le_bytes(field(buf, header::FORMAT_VERSION));
        if format_version != ARCHIVE_FORMAT_VERSION {
            return Err(RoadError::UnsupportedVersion {
                found: format_version,
                supported: ARCHIVE_FORMAT_VERSION,
            });
        }
        let stored = u32::from_le_bytes(field(buf, header::CRC32));
        if stored != block_crc32(&buf[..header::CRC32.start]) {
            return Err(RoadError::corruption("archive header checksum mismatch"));
        }
        Ok(Self {
            format_version,
            flags: u16::from_le_bytes(field(buf, header::FLAGS)),
            meta_offset: u64::from_le_bytes(field(buf, header::META_OFFSET)),
            meta_len: u32::from_le_bytes(field(buf, header::META_LEN)),
            table_offset: u64::from_le_bytes(field(buf, header::TABLE_OFFSET)),
            table_len: u32::from_le_bytes(field(buf, header::TABLE_LEN)),
            stream_count: u32::from_le_bytes(field(buf, header::STREAM_COUNT)),
        })
    }
}

fn field<const N: usize>(buf: &[u8], range: Range<usize>) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[range]);
    out
}

/// One row of the stream table.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
pub struct StreamEntry {
    /// Stream name, e.g. `edge.shape`.
    pub name: String,
    /// Column encoding of the payload.
    pub kind: ColumnKind,
    /// Number of entries encoded in the payload.
    pub element_count: u64,
    /// Absolute offset of the payload.
    pub offset: u64,
    /// Payload length in bytes.
    pub len: u64,
    /// CRC32 over name and payload.
    pub crc32: u32,
}

impl StreamEntry {
    /// Appends the table encoding of this entry.
    pub fn encode(&self, out: &mut Vec<u8>) {
        le::put_str(out, &self.name);
        le::put_u8(out, self.kind.as_u8());
        le::put_u64(out, self.element_count);
        le::put_u64(out, self.offset);
        le::put_u64(out, self.len);
        le::put_u32(out, self.crc32);
    }

    fn decode(cur: &mut Cursor<'_>) -> Result<Self> {
        let name = cur.str()?.to_owned();
        let kind = ColumnKind::try_from(cur.u8()?)?;
        Ok(Self {
            name,
            kind,
            element_count: cur.u64()?,
            offset: cur.u64()?,
            len: cur.u64()?,
            crc32: cur.u32()?,
        })
    }
}

/// Encodes a stream table followed by its checksum.
pub fn encode_table(entries: &[StreamEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    for entry in entries {
        entry.encode(&mut out);
    }
    let crc = block_crc32(&out);
    le::put_u32(&mut out, crc);
    out
}

/// Decodes a stream table and checks every payload lies inside the file.
pub fn decode_table(bytes: &[u8], count: u32, file_len: u64) -> Result<Vec<StreamEntry>> {
    if bytes.len() < 4 {
        return Err(RoadError::corruption("stream table truncated"));
    }
    let (body, crc) = bytes.split_at(bytes.len() - 4);
    let mut crc_cur = Cursor::new(crc);
    if crc_cur.u32()? != block_crc32(body) {
        return Err(RoadError::corruption("stream table checksum mismatch"));
    }
    let mut cur = Cursor::new(body);
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let entry = StreamEntry::decode(&mut cur)?;
        let end = entry.offset.checked_add(entry.len);
        if end.map_or(true, |end| end > file_len) || entry.offset < HEADER_LEN as u64 {
            return Err(RoadError::corruption(format!(
                "stream {} lies outside the archive",
                entry.name
            )));
        }
        entries.push(entry);
    }
    if !cur.is_exhausted() {
        return Err(RoadError::corruption("stream table has trailing bytes"));
    }
    Ok(entries)
}
