//! VBSP - Source engine level.
//!
//! Only the header is structured; everything else in the file is payload
//! located by the 64 lump descriptors embedded directly in the header (a
//! fixed sub-array, read eagerly).
//!
//! ## Layout
//! ```text
//! [0x000] Magic "VBSP"       (4 bytes)
//! [0x004] Version            (i32 LE; 19-22, or the legacy 0x00040014)
//! [0x008] Lumps              (64 × 0x10 bytes)
//! [0x408] MapRevision        (i32 LE)
//! ```
//!
//! ## Lump descriptor (0x10 bytes)
//! ```text
//! [0x00] Offset   (u32 LE, absolute)
//! [0x04] Length   (u32 LE)
//! [0x08] Version  (u32 LE)
//! [0x0C] FourCC   (4 bytes; non-zero when the lump is compressed)
//! ```
//!
//! Some header revisions are believed to store lump fields in a rotated
//! order; reordering is deliberately not applied here (it regressed on
//! v21 files that already store fields in the plain order), so descriptor
//! fields are always read as laid out above.

use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;

use crate::reader::BoundedReader;
use crate::{Error, Result};

/// Number of lump descriptors embedded in the header.
pub const LUMP_COUNT: usize = 64;
/// Legacy version value accepted alongside 19-22.
const LEGACY_VERSION: i32 = 0x0004_0014;

/// Parsed VBSP level header.
#[derive(Debug, Clone)]
pub struct Vbsp {
    /// Format version (19-22 or the legacy value).
    pub version: i32,
    /// The 64 lump descriptors, in header order.
    pub lumps: Vec<LumpDescriptor>,
    /// Map revision counter.
    pub map_revision: i32,
}

/// One lump descriptor from the header.
#[derive(Debug, Clone, Copy)]
pub struct LumpDescriptor {
    /// Absolute offset of the lump payload.
    pub offset: u32,
    /// Payload length in bytes.
    pub length: u32,
    /// Lump format version.
    pub version: u32,
    /// Compression identifier (zero when stored).
    pub fourcc: [u8; 4],
}

impl Vbsp {
    /// Parse a VBSP header from `r`.
    pub fn parse<R: Read + Seek>(r: &mut BoundedReader<R>) -> Result<Self> {
        r.magic(b"VBSP")?;

        let version = r.le_i32()?;
        if !(19..=22).contains(&version) && version != LEGACY_VERSION {
            return Err(Error::UnsupportedVersion(version as i64));
        }

        r.ensure_records(LUMP_COUNT as u64, 0x10)?;
        let mut lumps = Vec::with_capacity(LUMP_COUNT);
        for _ in 0..LUMP_COUNT {
            lumps.push(LumpDescriptor {
                offset: r.le_u32()?,
                length: r.le_u32()?,
                version: r.le_u32()?,
                fourcc: r.bytesa::<4>()?,
            });
        }

        let map_revision = r.le_i32()?;

        Ok(Self {
            version,
            lumps,
            map_revision,
        })
    }
}

/// A parsed VBSP level together with its backing source.
pub struct VbspReader<R> {
    reader: BoundedReader<R>,
    /// Parsed model.
    pub vbsp: Vbsp,
}

impl<R: Read + Seek> VbspReader<R> {
    /// Parse a VBSP level and wrap the provided source.
    pub fn new(reader: R) -> Result<Self> {
        Self::from_reader(BoundedReader::new(reader)?)
    }

    fn from_reader(mut reader: BoundedReader<R>) -> Result<Self> {
        let vbsp = Vbsp::parse(&mut reader)?;
        Ok(Self { reader, vbsp })
    }

    /// Human-readable format description.
    pub fn description(&self) -> &'static str {
        "Half-Life 2 Level (VBSP)"
    }

    /// Extract the raw payload bytes of lump `index`.
    ///
    /// Compressed lumps come back as stored; decompression is a caller
    /// concern.
    pub fn lump_data(&mut self, index: usize) -> Result<Vec<u8>> {
        let lump = self.vbsp.lumps.get(index).ok_or(Error::InvalidRange)?;
        if lump.length == 0 {
            return Ok(Vec::new());
        }
        let (offset, len) = (lump.offset as u64, lump.length as usize);
        self.reader.with_pos(offset, |r| r.bytesv(len))
    }

    /// Read `length` raw bytes at `offset` from the backing source.
    pub fn extract(&mut self, offset: u64, length: usize) -> Result<Vec<u8>> {
        self.reader.with_pos(offset, |r| r.bytesv(length))
    }

    /// Consume the wrapper, returning the underlying source.
    pub fn into_inner(self) -> R {
        self.reader.into_inner()
    }
}

impl<'a> VbspReader<Cursor<&'a [u8]>> {
    /// Parse a VBSP level embedded at `offset` in an in-memory buffer.
    pub fn from_bytes(data: &'a [u8], offset: usize) -> Result<Self> {
        Self::from_reader(BoundedReader::from_bytes(data, offset)?)
    }
}

impl VbspReader<BufReader<File>> {
    /// Open a file and parse it as a VBSP level.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Header (4 + 4 + 64×16 + 4 = 0x40C bytes) plus `extra` payload bytes.
    fn level(version: i32, extra: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"VBSP");
        buf.extend_from_slice(&version.to_le_bytes());
        for i in 0..LUMP_COUNT as u32 {
            buf.extend_from_slice(&0u32.to_le_bytes()); // offset
            buf.extend_from_slice(&0u32.to_le_bytes()); // length
            buf.extend_from_slice(&i.to_le_bytes()); // version
            buf.extend_from_slice(&[0u8; 4]); // fourcc
        }
        buf.extend_from_slice(&42i32.to_le_bytes());
        buf.extend_from_slice(extra);
        buf
    }

    #[test]
    fn parses_header() {
        let data = level(20, &[]);
        let rdr = VbspReader::from_bytes(&data, 0).unwrap();
        assert_eq!(rdr.vbsp.version, 20);
        assert_eq!(rdr.vbsp.lumps.len(), LUMP_COUNT);
        assert_eq!(rdr.vbsp.lumps[5].version, 5);
        assert_eq!(rdr.vbsp.map_revision, 42);
    }

    #[test]
    fn accepts_legacy_version() {
        let data = level(0x0004_0014, &[]);
        assert!(VbspReader::from_bytes(&data, 0).is_ok());
    }

    #[test]
    fn rejects_out_of_range_versions() {
        for v in [18, 23, 0] {
            let data = level(v, &[]);
            assert!(matches!(
                VbspReader::from_bytes(&data, 0),
                Err(Error::UnsupportedVersion(_))
            ));
        }
    }

    #[test]
    fn rejects_flipped_magic_byte() {
        let mut data = level(19, &[]);
        data[3] ^= 0x04;
        assert!(matches!(
            VbspReader::from_bytes(&data, 0),
            Err(Error::BadMagic)
        ));
    }

    #[test]
    fn rejects_truncated_lump_table() {
        let mut data = level(19, &[]);
        data.truncate(0x100);
        assert!(matches!(
            VbspReader::from_bytes(&data, 0),
            Err(Error::UnexpectedEof)
        ));
    }

    #[test]
    fn lump_data_extracts_payload() {
        let mut data = level(21, &[1, 2, 3, 4, 5]);
        let payload_offset = 0x40C_u32;
        // Point lump 3 at the trailing payload.
        let descriptor = 8 + 3 * 16;
        data[descriptor..descriptor + 4].copy_from_slice(&payload_offset.to_le_bytes());
        data[descriptor + 4..descriptor + 8].copy_from_slice(&5u32.to_le_bytes());

        let mut rdr = VbspReader::from_bytes(&data, 0).unwrap();
        assert_eq!(rdr.lump_data(3).unwrap(), [1, 2, 3, 4, 5]);
        assert_eq!(rdr.lump_data(0).unwrap(), Vec::<u8>::new());

        // A length past the end must fail, not read out of bounds.
        rdr.vbsp.lumps[3].length = 6;
        assert!(matches!(rdr.lump_data(3), Err(Error::UnexpectedEof)));
    }
}
