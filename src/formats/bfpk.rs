//! BFPK - simple file archive.
//!
//! ## Layout
//! ```text
//! [0x00] Magic "BFPK"        (4 bytes)
//! [0x04] Version             (i32 LE)
//! [0x08] FileCount           (i32 LE)
//! [0x0C] FileEntries         (variable size, see below)
//! [...]  File payloads
//! ```
//!
//! ## File entry
//! ```text
//! [0x00] NameSize            (i32 LE)
//! [0x04] Name                (NameSize bytes ASCII)
//! [....] UncompressedSize    (i32 LE)
//! [....] Offset              (i32 LE)
//! ```
//! When `Offset > 0` it points at an `i32 LE` compressed size stored
//! immediately before the payload; the size is offset-chased (cursor
//! restored) so entry records decode in sequence. The payload itself starts
//! 4 bytes past `Offset` and is returned as stored - decompression is a
//! caller concern.

use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;

use crate::reader::BoundedReader;
use crate::{Error, Result};

/// Parsed BFPK archive.
#[derive(Debug, Clone)]
pub struct Bfpk {
    /// Format version as stored.
    pub version: i32,
    /// All file entries, in directory order.
    pub files: Vec<FileEntry>,
}

/// One archive entry.
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Entry name.
    pub name: String,
    /// Uncompressed payload size in bytes.
    pub uncompressed_size: i32,
    /// Absolute offset of the stored compressed-size field; the payload
    /// follows it.
    pub offset: i32,
    /// Stored payload size, chased from `offset` (absent when the entry has
    /// no payload).
    pub compressed_size: Option<i32>,
}

impl Bfpk {
    /// Parse a BFPK archive from `r`.
    pub fn parse<R: Read + Seek>(r: &mut BoundedReader<R>) -> Result<Self> {
        r.magic(b"BFPK")?;
        let version = r.le_i32()?;
        let file_count = r.le_i32()?;
        if file_count < 0 {
            return Err(Error::Structure("negative file count"));
        }

        // Entries are variable-size, but each is at least 12 bytes; reject
        // counts that cannot possibly fit before decoding.
        r.ensure_records(file_count as u64, 12)?;

        let mut files = Vec::with_capacity(file_count as usize);
        for _ in 0..file_count {
            files.push(parse_file_entry(r)?);
        }

        Ok(Self { version, files })
    }
}

fn parse_file_entry<R: Read + Seek>(r: &mut BoundedReader<R>) -> Result<FileEntry> {
    let name_size = r.le_i32()?;
    if name_size < 0 {
        return Err(Error::Structure("negative name length"));
    }
    let name = String::from_utf8_lossy(&r.bytesv(name_size as usize)?).into_owned();

    let uncompressed_size = r.le_i32()?;
    let offset = r.le_i32()?;
    let compressed_size = if offset > 0 {
        Some(r.with_pos(offset as u64, |r| r.le_i32())?)
    } else {
        None
    };

    Ok(FileEntry {
        name,
        uncompressed_size,
        offset,
        compressed_size,
    })
}

/// A parsed BFPK archive together with its backing source.
pub struct BfpkReader<R> {
    reader: BoundedReader<R>,
    /// Parsed model.
    pub bfpk: Bfpk,
}

impl<R: Read + Seek> BfpkReader<R> {
    /// Parse a BFPK archive and wrap the provided source.
    pub fn new(reader: R) -> Result<Self> {
        Self::from_reader(BoundedReader::new(reader)?)
    }

    fn from_reader(mut reader: BoundedReader<R>) -> Result<Self> {
        let bfpk = Bfpk::parse(&mut reader)?;
        Ok(Self { reader, bfpk })
    }

    /// Human-readable format description.
    pub fn description(&self) -> &'static str {
        "BFPK Archive"
    }

    /// Extract the stored payload bytes of `entry` (compressed as written).
    pub fn file_data(&mut self, entry: &FileEntry) -> Result<Vec<u8>> {
        if entry.offset <= 0 {
            return Err(Error::InvalidRange);
        }
        let size = entry.compressed_size.unwrap_or(0);
        if size < 0 {
            return Err(Error::Structure("negative payload size"));
        }
        // Payload begins after the stored size field.
        let offset = entry.offset as u64 + 4;
        self.reader.with_pos(offset, |r| r.bytesv(size as usize))
    }

    /// Read `length` raw bytes at `offset` from the backing source.
    pub fn extract(&mut self, offset: u64, length: usize) -> Result<Vec<u8>> {
        self.reader.with_pos(offset, |r| r.bytesv(length))
    }

    /// Find an entry by name. Returns [`None`] if not found.
    pub fn get_file_by_name(&self, name: &str) -> Option<&FileEntry> {
        self.bfpk.files.iter().find(|f| f.name == name)
    }

    /// Consume the wrapper, returning the underlying source.
    pub fn into_inner(self) -> R {
        self.reader.into_inner()
    }
}

impl<'a> BfpkReader<Cursor<&'a [u8]>> {
    /// Parse a BFPK archive embedded at `offset` in an in-memory buffer.
    pub fn from_bytes(data: &'a [u8], offset: usize) -> Result<Self> {
        Self::from_reader(BoundedReader::from_bytes(data, offset)?)
    }
}

impl BfpkReader<BufReader<File>> {
    /// Open a file and parse it as a BFPK archive.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, uncompressed: i32, offset: i32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(name.len() as i32).to_le_bytes());
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(&uncompressed.to_le_bytes());
        buf.extend_from_slice(&offset.to_le_bytes());
        buf
    }

    /// Two entries whose payloads (size-prefixed) trail the directory.
    fn archive() -> Vec<u8> {
        // Directory: 12 + (12 + 1) + (12 + 1) = 38 bytes.
        let first_offset = 38;
        let second_offset = first_offset + 4 + 3;

        let mut buf = Vec::new();
        buf.extend_from_slice(b"BFPK");
        buf.extend_from_slice(&1i32.to_le_bytes());
        buf.extend_from_slice(&2i32.to_le_bytes());
        buf.extend_from_slice(&entry("a", 10, first_offset));
        buf.extend_from_slice(&entry("b", 20, second_offset));
        assert_eq!(buf.len(), first_offset as usize);
        buf.extend_from_slice(&3i32.to_le_bytes());
        buf.extend_from_slice(&[0x01, 0x02, 0x03]);
        buf.extend_from_slice(&2i32.to_le_bytes());
        buf.extend_from_slice(&[0x04, 0x05]);
        buf
    }

    #[test]
    fn parses_archive() {
        let data = archive();
        let rdr = BfpkReader::from_bytes(&data, 0).unwrap();
        let files = &rdr.bfpk.files;

        assert_eq!(rdr.bfpk.version, 1);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "a");
        assert_eq!(files[0].uncompressed_size, 10);
        assert_eq!(files[0].compressed_size, Some(3));
        assert_eq!(files[1].name, "b");
        assert_eq!(files[1].compressed_size, Some(2));
    }

    #[test]
    fn size_chase_restores_position() {
        // The first entry's chase jumps forward over the second entry's
        // record bytes; the second entry must still decode in sequence.
        let data = archive();
        let rdr = BfpkReader::from_bytes(&data, 0).unwrap();
        assert_eq!(rdr.bfpk.files[1].name, "b");
        assert_eq!(rdr.bfpk.files[1].uncompressed_size, 20);
    }

    #[test]
    fn rejects_flipped_magic_byte() {
        let mut data = archive();
        data[1] ^= 0x01;
        assert!(matches!(
            BfpkReader::from_bytes(&data, 0),
            Err(Error::BadMagic)
        ));
    }

    #[test]
    fn corrupt_count_is_truncation() {
        // Same bytes, count bumped to 3: the decoder must fail, not read
        // payload bytes as a third entry.
        let mut data = archive();
        data[8..12].copy_from_slice(&3i32.to_le_bytes());
        assert!(matches!(
            BfpkReader::from_bytes(&data, 0),
            Err(Error::UnexpectedEof) | Err(Error::Structure(_)) | Err(Error::InvalidRange)
        ));
    }

    #[test]
    fn zero_offset_has_no_chased_size() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"BFPK");
        buf.extend_from_slice(&1i32.to_le_bytes());
        buf.extend_from_slice(&1i32.to_le_bytes());
        buf.extend_from_slice(&entry("empty", 0, 0));

        let rdr = BfpkReader::from_bytes(&buf, 0).unwrap();
        assert_eq!(rdr.bfpk.files[0].compressed_size, None);
    }

    #[test]
    fn chase_offset_past_end_fails() {
        let mut data = archive();
        let bad = data.len() as i32 + 1;
        // First entry's offset field: 12 (header) + 4 + 1 + 4 = 21.
        data[21..25].copy_from_slice(&bad.to_le_bytes());
        assert!(matches!(
            BfpkReader::from_bytes(&data, 0),
            Err(Error::InvalidRange)
        ));
    }

    #[test]
    fn file_data_extracts_stored_bytes() {
        let data = archive();
        let mut rdr = BfpkReader::from_bytes(&data, 0).unwrap();
        let first = rdr.bfpk.files[0].clone();
        let second = rdr.bfpk.files[1].clone();
        assert_eq!(rdr.file_data(&first).unwrap(), [0x01, 0x02, 0x03]);
        assert_eq!(rdr.file_data(&second).unwrap(), [0x04, 0x05]);
        assert_eq!(rdr.get_file_by_name("b").unwrap().offset, second.offset);
        assert!(rdr.get_file_by_name("missing").is_none());
    }
}
