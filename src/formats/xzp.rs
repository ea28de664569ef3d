//! XZP - Valve Xbox package file.
//!
//! ## Layout
//! ```text
//! [0x00] Header                    (0x24 bytes)
//! [0x24] DirectoryEntries          (DirectoryEntryCount × 0x0C)
//! [...]  PreloadDirectoryEntries   (PreloadDirectoryEntryCount × 0x0C,
//!                                   present iff PreloadBytes > 0)
//! [...]  PreloadDirectoryMappings  (PreloadDirectoryEntryCount × 0x02,
//!                                   present iff PreloadBytes > 0)
//! [DirectoryItemOffset]
//!        DirectoryItems            (DirectoryItemCount × 0x0C + chased names)
//! [end-8]
//!        Footer                    (FileLength u32, magic "tFzX")
//! ```
//!
//! ## Header (0x24 bytes)
//! ```text
//! [0x00] Magic "piZx"                  (4 bytes)
//! [0x04] Version (must be 6)           (u32 LE)
//! [0x08] PreloadDirectoryEntryCount    (u32 LE)
//! [0x0C] DirectoryEntryCount           (u32 LE)
//! [0x10] PreloadBytes                  (u32 LE)
//! [0x14] HeaderLength                  (u32 LE)
//! [0x18] DirectoryItemCount            (u32 LE)
//! [0x1C] DirectoryItemOffset           (u32 LE)
//! [0x20] DirectoryItemLength           (u32 LE)
//! ```
//!
//! ## Records
//! Directory entries are `FileNameCrc u32, EntryLength u32, EntryOffset u32`;
//! preload mappings are a bare `u16` index. Directory items carry
//! `FileNameCrc u32, NameOffset u32, TimeCreated u32` and their name is
//! offset-chased: the cursor seeks to the absolute `NameOffset`, reads a
//! NUL-terminated ASCII string, and is restored before the next item.

use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;

use crate::reader::BoundedReader;
use crate::{Error, Result};

/// Directory entry record size.
const DIRECTORY_ENTRY_SIZE: u64 = 0x0C;
/// Directory item record size (without the chased name).
const DIRECTORY_ITEM_SIZE: u64 = 0x0C;
/// Footer size at end-of-stream.
const FOOTER_SIZE: u64 = 8;
/// The only supported header version.
const SUPPORTED_VERSION: u32 = 6;

/// Parsed XZP package.
#[derive(Debug, Clone)]
pub struct Xzp {
    /// Package header.
    pub header: XzpHeader,
    /// Directory entries locating payload data.
    pub directory_entries: Vec<DirectoryEntry>,
    /// Preload directory entries (empty when the package preloads nothing).
    pub preload_directory_entries: Vec<DirectoryEntry>,
    /// Preload directory mappings, parallel to the preload entries.
    pub preload_directory_mappings: Vec<u16>,
    /// Directory items with resolved names.
    pub directory_items: Vec<DirectoryItem>,
    /// Trailing footer.
    pub footer: Footer,
}

/// The fixed package header.
#[derive(Debug, Clone)]
pub struct XzpHeader {
    pub version: u32,
    pub preload_directory_entry_count: u32,
    pub directory_entry_count: u32,
    pub preload_bytes: u32,
    pub header_length: u32,
    pub directory_item_count: u32,
    pub directory_item_offset: u32,
    pub directory_item_length: u32,
}

/// A directory entry locating one payload.
#[derive(Debug, Clone, Copy)]
pub struct DirectoryEntry {
    /// CRC of the entry's file name.
    pub file_name_crc: u32,
    /// Payload length in bytes.
    pub entry_length: u32,
    /// Absolute payload offset.
    pub entry_offset: u32,
}

/// A directory item: file metadata plus its offset-chased name.
#[derive(Debug, Clone)]
pub struct DirectoryItem {
    /// CRC of the item's file name.
    pub file_name_crc: u32,
    /// Absolute offset the name was resolved from.
    pub name_offset: u32,
    /// Creation timestamp as stored.
    pub time_created: u32,
    /// Resolved NUL-terminated name.
    pub name: String,
}

/// The trailing footer.
#[derive(Debug, Clone, Copy)]
pub struct Footer {
    /// Total file length as recorded by the writer.
    pub file_length: u32,
}

impl Xzp {
    /// Parse an XZP package from `r`.
    ///
    /// The cursor must be positioned at the magic; internal offsets are
    /// absolute. The trailing footer is validated as part of the parse.
    pub fn parse<R: Read + Seek>(r: &mut BoundedReader<R>) -> Result<Self> {
        let header = parse_header(r)?;

        r.ensure_records(header.directory_entry_count as u64, DIRECTORY_ENTRY_SIZE)?;
        let mut directory_entries = Vec::with_capacity(header.directory_entry_count as usize);
        for _ in 0..header.directory_entry_count {
            directory_entries.push(parse_directory_entry(r)?);
        }

        let mut preload_directory_entries = Vec::new();
        let mut preload_directory_mappings = Vec::new();
        if header.preload_bytes > 0 {
            let count = header.preload_directory_entry_count;
            r.ensure_records(count as u64, DIRECTORY_ENTRY_SIZE)?;
            for _ in 0..count {
                preload_directory_entries.push(parse_directory_entry(r)?);
            }
            r.ensure_records(count as u64, 2)?;
            for _ in 0..count {
                preload_directory_mappings.push(r.le_u16()?);
            }
        }

        let mut directory_items = Vec::new();
        if header.directory_item_count > 0 {
            let item_offset = header.directory_item_offset as u64;
            r.check_offset(item_offset)?;
            r.seek_to(item_offset)?;
            r.ensure_records(header.directory_item_count as u64, DIRECTORY_ITEM_SIZE)?;
            for _ in 0..header.directory_item_count {
                directory_items.push(parse_directory_item(r)?);
            }
        }

        r.seek_back_from_end(FOOTER_SIZE)?;
        let footer = parse_footer(r)?;

        Ok(Self {
            header,
            directory_entries,
            preload_directory_entries,
            preload_directory_mappings,
            directory_items,
            footer,
        })
    }
}

fn parse_header<R: Read + Seek>(r: &mut BoundedReader<R>) -> Result<XzpHeader> {
    r.magic(b"piZx")?;
    let version = r.le_u32()?;
    if version != SUPPORTED_VERSION {
        return Err(Error::UnsupportedVersion(version as i64));
    }

    Ok(XzpHeader {
        version,
        preload_directory_entry_count: r.le_u32()?,
        directory_entry_count: r.le_u32()?,
        preload_bytes: r.le_u32()?,
        header_length: r.le_u32()?,
        directory_item_count: r.le_u32()?,
        directory_item_offset: r.le_u32()?,
        directory_item_length: r.le_u32()?,
    })
}

fn parse_directory_entry<R: Read + Seek>(r: &mut BoundedReader<R>) -> Result<DirectoryEntry> {
    Ok(DirectoryEntry {
        file_name_crc: r.le_u32()?,
        entry_length: r.le_u32()?,
        entry_offset: r.le_u32()?,
    })
}

fn parse_directory_item<R: Read + Seek>(r: &mut BoundedReader<R>) -> Result<DirectoryItem> {
    let file_name_crc = r.le_u32()?;
    let name_offset = r.le_u32()?;
    let time_created = r.le_u32()?;

    // The name lives elsewhere in the package; chase it and restore the
    // cursor so the next item decodes from the right position.
    let name = r.with_pos(name_offset as u64, |r| r.null_string())?;

    Ok(DirectoryItem {
        file_name_crc,
        name_offset,
        time_created,
        name,
    })
}

fn parse_footer<R: Read + Seek>(r: &mut BoundedReader<R>) -> Result<Footer> {
    let file_length = r.le_u32()?;
    r.magic(b"tFzX")?;
    Ok(Footer { file_length })
}

/// A parsed XZP package together with its backing source.
pub struct XzpReader<R> {
    reader: BoundedReader<R>,
    /// Parsed model.
    pub xzp: Xzp,
}

impl<R: Read + Seek> XzpReader<R> {
    /// Parse an XZP package and wrap the provided source.
    pub fn new(reader: R) -> Result<Self> {
        Self::from_reader(BoundedReader::new(reader)?)
    }

    fn from_reader(mut reader: BoundedReader<R>) -> Result<Self> {
        let xzp = Xzp::parse(&mut reader)?;
        Ok(Self { reader, xzp })
    }

    /// Human-readable format description.
    pub fn description(&self) -> &'static str {
        "XBox Package File (XZP)"
    }

    /// Extract the payload bytes of a directory entry.
    pub fn entry_data(&mut self, entry: &DirectoryEntry) -> Result<Vec<u8>> {
        let (offset, len) = (entry.entry_offset as u64, entry.entry_length as usize);
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

impl<'a> XzpReader<Cursor<&'a [u8]>> {
    /// Parse an XZP package embedded at `offset` in an in-memory buffer.
    pub fn from_bytes(data: &'a [u8], offset: usize) -> Result<Self> {
        Self::from_reader(BoundedReader::from_bytes(data, offset)?)
    }
}

impl XzpReader<BufReader<File>> {
    /// Open a file and parse it as an XZP package.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(BufReader::new(File::open(path)?))
    }
}
