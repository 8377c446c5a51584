//! xdb binary format constants and low-level codec primitives.
//!
//! # File Structure
//!
//! ```text
//! +------------------+
//! |      HEADER      |  256 bytes (fixed)
//! +------------------+
//! |   VECTOR INDEX   |  512 KiB (fixed, 256 x 256 cells of 8 bytes)
//! +------------------+
//! |   DATA PAYLOAD   |  variable (deduplicated region strings)
//! +------------------+
//! |  SEGMENT INDEX   |  variable (14-byte records, sorted by start ip)
//! +------------------+
//! ```
//!
//! All multi-byte integers are little-endian regardless of host order.

use std::net::Ipv4Addr;

use crate::{Error, Result};

/// Current xdb format version.
pub const VERSION_NO: u16 = 2;

/// Header region length in bytes.
pub const HEADER_LEN: usize = 256;

/// Vector index rows (first byte of the IP).
pub const VECTOR_ROWS: usize = 256;

/// Vector index columns (second byte of the IP).
pub const VECTOR_COLS: usize = 256;

/// Bytes per vector index cell: two u32 pointers.
pub const VECTOR_CELL: usize = 8;

/// Total vector index length in bytes.
pub const VECTOR_LEN: usize = VECTOR_ROWS * VECTOR_COLS * VECTOR_CELL;

/// Bytes per segment index record: start ip, end ip, region len, region ptr.
pub const SEGMENT_INDEX_LEN: usize = 14;

/// Maximum region byte length representable by a record.
pub const MAX_REGION_LEN: usize = 0xFFFF;

/// Index policy stored in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum IndexPolicy {
    /// The 256x256 vector index over the top two IP bytes.
    Vector = 2,
}

impl IndexPolicy {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(code: u16) -> Result<Self> {
        match code {
            2 => Ok(IndexPolicy::Vector),
            other => Err(Error::UnsupportedIndexPolicy(other)),
        }
    }
}

/// Read a little-endian u16 at `offset`.
///
/// Callers must have bounds-checked `offset + 2` against the slice.
pub fn read_u16_le(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

/// Read a little-endian u32 at `offset`.
///
/// Callers must have bounds-checked `offset + 4` against the slice.
pub fn read_u32_le(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

/// Write a little-endian u16 at `offset`.
pub fn write_u16_le(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// Write a little-endian u32 at `offset`.
pub fn write_u32_le(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Convert dotted-quad IPv4 text to its u32 value.
///
/// Rejects anything that is not an IPv4 literal, including IPv6.
pub fn ip2u32(text: &str) -> Result<u32> {
    let addr: Ipv4Addr = text
        .trim()
        .parse()
        .map_err(|_| Error::InvalidIp(text.trim().to_string()))?;
    Ok(u32::from(addr))
}

/// Convert a u32 IP value back to dotted-quad text.
pub fn u32_to_ip(ip: u32) -> String {
    Ipv4Addr::from(ip).to_string()
}

/// Decoded xdb header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Format version, fixed to [`VERSION_NO`].
    pub version: u16,
    /// Index policy code.
    pub index_policy: u16,
    /// Unix build timestamp, seconds.
    pub created_at: u32,
    /// File-absolute offset of the first segment index record.
    pub start_index_ptr: u32,
    /// File-absolute offset of the last segment index record.
    pub end_index_ptr: u32,
}

impl Header {
    /// Decode the header from the first [`HEADER_LEN`] bytes of an xdb file.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(Error::TruncatedFile {
                expected: HEADER_LEN as u64,
                actual: buf.len() as u64,
            });
        }

        let header = Self {
            version: read_u16_le(buf, 0),
            index_policy: read_u16_le(buf, 2),
            created_at: read_u32_le(buf, 4),
            start_index_ptr: read_u32_le(buf, 8),
            end_index_ptr: read_u32_le(buf, 12),
        };
        header.validate()?;
        Ok(header)
    }

    /// Encode the header into a zero-padded [`HEADER_LEN`] byte block.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        write_u16_le(&mut buf, 0, self.version);
        write_u16_le(&mut buf, 2, self.index_policy);
        write_u32_le(&mut buf, 4, self.created_at);
        write_u32_le(&mut buf, 8, self.start_index_ptr);
        write_u32_le(&mut buf, 12, self.end_index_ptr);
        buf
    }

    /// Validate the version and index policy.
    pub fn validate(&self) -> Result<()> {
        if self.version != VERSION_NO {
            return Err(Error::UnsupportedVersion(self.version));
        }
        IndexPolicy::from_u16(self.index_policy)?;
        Ok(())
    }
}
