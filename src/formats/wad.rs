//! WAD3 - Half-Life texture package.
//!
//! ## Layout
//! ```text
//! [0x00] Magic "WAD3"            (4 bytes)
//! [0x04] LumpCount               (u32 LE)
//! [0x08] LumpOffset              (u32 LE, absolute offset of the directory)
//! [...]  Lump payloads
//! [LumpOffset]
//!        Directory               (LumpCount × 0x20 bytes)
//! ```
//!
//! ## Directory entry (0x20 bytes)
//! ```text
//! [0x00] Offset      (u32 LE, absolute offset of the lump payload)
//! [0x04] DiskLength  (u32 LE, stored size)
//! [0x08] Length      (u32 LE, uncompressed size)
//! [0x0C] Kind        (u8; 0x42 = flat image, 0x43 = mip texture)
//! [0x0D] Compression (u8; 0 = stored)
//! [0x0E] Padding     (u16)
//! [0x10] Name        (16 bytes ASCII, NUL-padded)
//! ```
//!
//! ## Mip texture payload
//! Kind `0x42` is a bare image: `Width u32, Height u32`, `Width × Height`
//! pixel bytes, `PaletteSize u16`. Kind `0x43` is a full mip texture:
//! ```text
//! [0x00] Name        (16 bytes ASCII, NUL-padded)
//! [0x10] Width       (u32 LE)
//! [0x14] Height      (u32 LE)
//! [0x18] PixelOffset (u32 LE, relative to the texture start)
//! [0x1C] MipOffsets  (3 × u32 LE)
//! [0x28] Mip pixel chain, then PaletteSize u16, then PaletteSize × 3
//!        palette bytes
//! ```
//! The base pixel data is offset-chased: the cursor seeks to
//! `texture start + PixelOffset`, reads `Width × Height` bytes, and is
//! restored. For mip level `n` the decoded dimensions are scaled by `2^n`
//! and the pixel chain skip grows by the preceding levels' sizes
//! (`p`, `p + p/4`, `p + p/4 + p/16` for levels 1-3, `p = Width × Height`).

use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;

use crate::reader::BoundedReader;
use crate::utils::fixed_string;
use crate::{Error, Result};

/// Directory entry size in bytes.
const LUMP_SIZE: u64 = 0x20;

/// Lump kind byte for a flat image (no name, no mip chain).
pub const LUMP_KIND_FLAT: u8 = 0x42;
/// Lump kind byte for a full mip texture.
pub const LUMP_KIND_MIPTEX: u8 = 0x43;
/// Highest valid mip level.
pub const MAX_MIP_LEVEL: u8 = 3;

/// Parsed WAD3 texture package.
#[derive(Debug)]
pub struct Wad {
    /// All directory entries, in directory order.
    pub lumps: Vec<Lump>,
}

/// A single lump directory entry.
///
/// `texture` holds the decoded base-level payload for stored (uncompressed)
/// lumps whose offset is in bounds; compressed or unresolvable lumps carry
/// [`None`] and their raw bytes stay accessible via
/// [`WadReader::lump_data`].
#[derive(Debug, Clone)]
pub struct Lump {
    /// Lump name from the directory.
    pub name: String,
    /// Absolute offset of the payload.
    pub offset: u32,
    /// Stored payload size in bytes.
    pub disk_length: u32,
    /// Uncompressed payload size in bytes.
    pub length: u32,
    /// Kind tag (`0x42` or `0x43` for textures).
    pub kind: u8,
    /// Compression tag (0 = stored).
    pub compression: u8,
    /// Decoded base-level texture, where resolvable.
    pub texture: Option<MipTexture>,
}

/// A decoded texture payload at one mip level.
#[derive(Debug, Clone)]
pub struct MipTexture {
    /// Embedded texture name (mip textures only; flat images have none).
    pub name: Option<String>,
    /// Width in pixels, scaled to the decoded mip level.
    pub width: u32,
    /// Height in pixels, scaled to the decoded mip level.
    pub height: u32,
    /// Base-level pixel data (`Width × Height` bytes before scaling).
    pub pixel_data: Vec<u8>,
    /// Number of palette entries.
    pub palette_size: u16,
    /// Palette bytes, 3 per entry (mip textures only).
    pub palette: Option<Vec<u8>>,
}

impl Wad {
    /// Parse a WAD3 package from `r`.
    ///
    /// The cursor must be positioned at the magic. Directory offsets are
    /// absolute, so the container must start at position zero of its source
    /// (use [`BoundedReader::from_bytes`] with an offset for embedded
    /// containers).
    pub fn parse<R: Read + Seek>(r: &mut BoundedReader<R>) -> Result<Self> {
        r.magic(b"WAD3")?;
        let lump_count = r.le_u32()?;
        let lump_offset = r.le_u32()?;

        r.check_offset(lump_offset as u64)?;
        r.seek_to(lump_offset as u64)?;
        r.ensure_records(lump_count as u64, LUMP_SIZE)?;

        let mut lumps = Vec::with_capacity(lump_count as usize);
        for _ in 0..lump_count {
            lumps.push(parse_lump(r)?);
        }

        // Resolve texture payloads. Compressed lumps and lumps pointing
        // outside the source stay unresolved, matching the directory as
        // written; a lump that is chased must decode.
        for lump in &mut lumps {
            if lump.compression != 0 {
                continue;
            }
            let offset = lump.offset as u64;
            if r.check_offset(offset).is_err() {
                continue;
            }
            let kind = lump.kind;
            lump.texture = Some(r.with_pos(offset, |r| MipTexture::parse(r, kind, 0))?);
        }

        Ok(Self { lumps })
    }
}

fn parse_lump<R: Read + Seek>(r: &mut BoundedReader<R>) -> Result<Lump> {
    let offset = r.le_u32()?;
    let disk_length = r.le_u32()?;
    let length = r.le_u32()?;
    let kind = r.u8()?;
    let compression = r.u8()?;
    let _padding = r.le_u16()?;
    let name = fixed_string(&r.bytesa::<16>()?);

    Ok(Lump {
        name,
        offset,
        disk_length,
        length,
        kind,
        compression,
        texture: None,
    })
}

impl MipTexture {
    /// Decode a texture payload of the given lump `kind` at `level`.
    ///
    /// The cursor must be positioned at the start of the payload. Levels
    /// above [`MAX_MIP_LEVEL`] fail, as does any level above 0 for flat
    /// images, and any kind byte without a decode rule.
    pub fn parse<R: Read + Seek>(r: &mut BoundedReader<R>, kind: u8, level: u8) -> Result<Self> {
        if level > MAX_MIP_LEVEL {
            return Err(Error::Structure("mip level out of range"));
        }
        let start = r.position();

        match kind {
            LUMP_KIND_FLAT => {
                if level > 0 {
                    return Err(Error::Structure("flat image has no mip levels"));
                }
                let width = r.le_u32()?;
                let height = r.le_u32()?;
                let pixel_data = read_pixels(r, width, height)?;
                let palette_size = r.le_u16()?;
                Ok(Self {
                    name: None,
                    width,
                    height,
                    pixel_data,
                    palette_size,
                    palette: None,
                })
            }
            LUMP_KIND_MIPTEX => {
                let name = fixed_string(&r.bytesa::<16>()?);
                let width = r.le_u32()?;
                let height = r.le_u32()?;
                let pixel_offset = r.le_u32()?;
                let _mip_offsets = [r.le_u32()?, r.le_u32()?, r.le_u32()?];

                // Base pixel data lives at texture start + PixelOffset and is
                // offset-chased so the mip chain decode below continues from
                // the field after the header.
                let pixel_pos = start
                    .checked_add(pixel_offset as u64)
                    .ok_or(Error::InvalidRange)?;
                let pixel_data = r.with_pos(pixel_pos, |r| read_pixels(r, width, height))?;

                let p = width as u64 * height as u64;
                let level_skip = match level {
                    0 => 0,
                    1 => p,
                    2 => p + p / 4,
                    3 => p + p / 4 + p / 16,
                    _ => unreachable!(),
                };
                r.skip(level_skip)?;
                // Full mip chain precedes the palette.
                r.skip(p + p / 4 + p / 16 + p / 64)?;

                let palette_size = r.le_u16()?;
                let palette = r.bytesv(palette_size as usize * 3)?;

                let scale = 1u32 << level;
                Ok(Self {
                    name: Some(name),
                    width: width / scale,
                    height: height / scale,
                    pixel_data,
                    palette_size,
                    palette: Some(palette),
                })
            }
            _ => Err(Error::Structure("unknown lump kind")),
        }
    }
}

fn read_pixels<R: Read + Seek>(r: &mut BoundedReader<R>, width: u32, height: u32) -> Result<Vec<u8>> {
    let pixels = width as u64 * height as u64;
    if pixels > r.remaining() {
        return Err(Error::UnexpectedEof);
    }
    r.bytesv(pixels as usize)
}

/// A parsed WAD3 package together with its backing source.
///
/// Lump payloads are re-extracted on demand using the offsets already
/// recorded in the directory; nothing is re-parsed.
pub struct WadReader<R> {
    reader: BoundedReader<R>,
    /// Parsed model.
    pub wad: Wad,
}

impl<R: Read + Seek> WadReader<R> {
    /// Parse a WAD3 package and wrap the provided source.
    pub fn new(reader: R) -> Result<Self> {
        Self::from_reader(BoundedReader::new(reader)?)
    }

    fn from_reader(mut reader: BoundedReader<R>) -> Result<Self> {
        let wad = Wad::parse(&mut reader)?;
        Ok(Self { reader, wad })
    }

    /// Human-readable format description.
    pub fn description(&self) -> &'static str {
        "Half-Life Texture Package File (WAD)"
    }

    /// Extract the raw stored bytes of lump `index`.
    pub fn lump_data(&mut self, index: usize) -> Result<Vec<u8>> {
        let lump = self.wad.lumps.get(index).ok_or(Error::InvalidRange)?;
        let (offset, len) = (lump.offset as u64, lump.disk_length as usize);
        self.reader.with_pos(offset, |r| r.bytesv(len))
    }

    /// Read `length` raw bytes at `offset` from the backing source.
    pub fn extract(&mut self, offset: u64, length: usize) -> Result<Vec<u8>> {
        self.reader.with_pos(offset, |r| r.bytesv(length))
    }

    /// Re-decode the texture of lump `index` at the given mip level.
    ///
    /// Compressed lumps are not decoded; their stored bytes are available
    /// via [`WadReader::lump_data`].
    pub fn read_texture(&mut self, index: usize, level: u8) -> Result<MipTexture> {
        let lump = self.wad.lumps.get(index).ok_or(Error::InvalidRange)?;
        if lump.compression != 0 {
            return Err(Error::Structure("compressed lumps are not decoded"));
        }
        let (offset, kind) = (lump.offset as u64, lump.kind);
        self.reader
            .with_pos(offset, |r| MipTexture::parse(r, kind, level))
    }

    /// Consume the wrapper, returning the underlying source.
    pub fn into_inner(self) -> R {
        self.reader.into_inner()
    }
}

impl<'a> WadReader<Cursor<&'a [u8]>> {
    /// Parse a WAD3 package embedded at `offset` in an in-memory buffer.
    pub fn from_bytes(data: &'a [u8], offset: usize) -> Result<Self> {
        Self::from_reader(BoundedReader::from_bytes(data, offset)?)
    }
}

impl WadReader<BufReader<File>> {
    /// Open a file and parse it as a WAD3 package.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(count: u32, dir_offset: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"WAD3");
        buf.extend_from_slice(&count.to_le_bytes());
        buf.extend_from_slice(&dir_offset.to_le_bytes());
        buf
    }

    fn dir_entry(offset: u32, disk_len: u32, kind: u8, compression: u8, name: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&offset.to_le_bytes());
        buf.extend_from_slice(&disk_len.to_le_bytes());
        buf.extend_from_slice(&disk_len.to_le_bytes());
        buf.push(kind);
        buf.push(compression);
        buf.extend_from_slice(&[0, 0]);
        let mut n = [0u8; 16];
        n[..name.len()].copy_from_slice(name.as_bytes());
        buf.extend_from_slice(&n);
        buf
    }

    /// Flat image payload: 2×2 pixels, palette size 7.
    fn flat_payload() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&[9, 8, 7, 6]);
        buf.extend_from_slice(&7u16.to_le_bytes());
        buf
    }

    /// Mip texture payload with `w × h` base pixels. The pixel data is
    /// stored right after the 0x28-byte header, where the mip chain begins.
    fn miptex_payload(name: &str, w: u32, h: u32) -> Vec<u8> {
        let p = (w * h) as usize;
        let mut buf = Vec::new();
        let mut n = [0u8; 16];
        n[..name.len()].copy_from_slice(name.as_bytes());
        buf.extend_from_slice(&n);
        buf.extend_from_slice(&w.to_le_bytes());
        buf.extend_from_slice(&h.to_le_bytes());
        buf.extend_from_slice(&0x28u32.to_le_bytes()); // pixel offset
        buf.extend_from_slice(&[0u8; 12]); // mip offsets
        // Full mip chain: p + p/4 + p/16 + p/64 bytes.
        let chain = p + p / 4 + p / 16 + p / 64;
        buf.extend((0..chain).map(|i| i as u8));
        buf.extend_from_slice(&2u16.to_le_bytes());
        buf.extend_from_slice(&[1, 2, 3, 4, 5, 6]);
        buf
    }

    fn flat_container() -> Vec<u8> {
        let payload = flat_payload();
        let dir_offset = 12 + payload.len() as u32;
        let mut buf = header(1, dir_offset);
        buf.extend_from_slice(&payload);
        buf.extend_from_slice(&dir_entry(12, payload.len() as u32, LUMP_KIND_FLAT, 0, "flat"));
        buf
    }

    #[test]
    fn parses_flat_lump() {
        let data = flat_container();
        let rdr = WadReader::from_bytes(&data, 0).unwrap();
        assert_eq!(rdr.wad.lumps.len(), 1);

        let lump = &rdr.wad.lumps[0];
        assert_eq!(lump.name, "flat");
        let tex = lump.texture.as_ref().unwrap();
        assert_eq!((tex.width, tex.height), (2, 2));
        assert_eq!(tex.pixel_data, [9, 8, 7, 6]);
        assert_eq!(tex.palette_size, 7);
        assert!(tex.name.is_none());
        assert!(tex.palette.is_none());
    }

    #[test]
    fn rejects_flipped_magic_byte() {
        let mut data = flat_container();
        data[2] ^= 0x01;
        assert!(matches!(
            WadReader::from_bytes(&data, 0),
            Err(Error::BadMagic)
        ));
    }

    #[test]
    fn rejects_directory_offset_past_end() {
        let mut data = flat_container();
        let bad = data.len() as u32 + 1;
        data[8..12].copy_from_slice(&bad.to_le_bytes());
        assert!(matches!(
            WadReader::from_bytes(&data, 0),
            Err(Error::InvalidRange)
        ));
    }

    #[test]
    fn rejects_count_overrunning_input() {
        let mut data = flat_container();
        data[4..8].copy_from_slice(&2u32.to_le_bytes());
        assert!(matches!(
            WadReader::from_bytes(&data, 0),
            Err(Error::UnexpectedEof)
        ));
    }

    #[test]
    fn compressed_lump_is_left_unresolved() {
        let payload = flat_payload();
        let dir_offset = 12 + payload.len() as u32;
        let mut data = header(1, dir_offset);
        data.extend_from_slice(&payload);
        data.extend_from_slice(&dir_entry(12, payload.len() as u32, LUMP_KIND_FLAT, 1, "zip"));

        let rdr = WadReader::from_bytes(&data, 0).unwrap();
        assert!(rdr.wad.lumps[0].texture.is_none());
    }

    #[test]
    fn unknown_lump_kind_fails() {
        let payload = flat_payload();
        let dir_offset = 12 + payload.len() as u32;
        let mut data = header(1, dir_offset);
        data.extend_from_slice(&payload);
        data.extend_from_slice(&dir_entry(12, payload.len() as u32, 0x41, 0, "odd"));

        assert!(matches!(
            WadReader::from_bytes(&data, 0),
            Err(Error::Structure(_))
        ));
    }

    #[test]
    fn miptex_decodes_with_pixel_chase() {
        let payload = miptex_payload("BRICK", 8, 8);
        let dir_offset = 12 + payload.len() as u32;
        let mut data = header(1, dir_offset);
        data.extend_from_slice(&payload);
        data.extend_from_slice(&dir_entry(12, payload.len() as u32, LUMP_KIND_MIPTEX, 0, "BRICK"));

        let rdr = WadReader::from_bytes(&data, 0).unwrap();
        let tex = rdr.wad.lumps[0].texture.as_ref().unwrap();
        assert_eq!(tex.name.as_deref(), Some("BRICK"));
        assert_eq!((tex.width, tex.height), (8, 8));
        assert_eq!(tex.pixel_data.len(), 64);
        // Base pixels start at the chain head (pixel offset 0x28).
        assert_eq!(tex.pixel_data[0], 0);
        assert_eq!(tex.palette_size, 2);
        assert_eq!(tex.palette.as_deref(), Some(&[1, 2, 3, 4, 5, 6][..]));
    }

    #[test]
    fn mip_level_scales_dimensions_and_skip() {
        // 64×64 at level 2 decodes as 16×16 with a level skip of
        // 64*64 + 64*64/4 bytes before the full-chain skip.
        let p = 64 * 64usize;
        let chain = p + p / 4 + p / 16 + p / 64;
        let level_skip = p + p / 4;

        let mut buf = Vec::new();
        let mut n = [0u8; 16];
        n[..3].copy_from_slice(b"BIG");
        buf.extend_from_slice(&n);
        buf.extend_from_slice(&64u32.to_le_bytes());
        buf.extend_from_slice(&64u32.to_le_bytes());
        buf.extend_from_slice(&0x28u32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 12]);
        // Palette for the level-0 decode, right after the full chain …
        buf.extend(std::iter::repeat_n(0u8, chain));
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&[0x11, 0x12, 0x13]);
        // … and a marker palette where the level-2 decode lands.
        buf.resize(0x28 + level_skip + chain, 0);
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&[0xAA, 0xBB, 0xCC]);

        let dir_offset = 12 + buf.len() as u32;
        let mut data = header(1, dir_offset);
        data.extend_from_slice(&buf);
        data.extend_from_slice(&dir_entry(12, buf.len() as u32, LUMP_KIND_MIPTEX, 0, "BIG"));

        let mut rdr = WadReader::from_bytes(&data, 0).unwrap();
        let tex = rdr.read_texture(0, 2).unwrap();
        assert_eq!((tex.width, tex.height), (16, 16));
        assert_eq!(tex.palette.as_deref(), Some(&[0xAA, 0xBB, 0xCC][..]));
    }

    #[test]
    fn mip_level_out_of_range_fails() {
        let data = flat_container();
        let mut rdr = WadReader::from_bytes(&data, 0).unwrap();
        assert!(matches!(
            rdr.read_texture(0, 4),
            Err(Error::Structure("mip level out of range"))
        ));
        assert!(matches!(
            rdr.read_texture(0, 1),
            Err(Error::Structure("flat image has no mip levels"))
        ));
    }

    #[test]
    fn lump_data_extracts_stored_bytes() {
        let data = flat_container();
        let mut rdr = WadReader::from_bytes(&data, 0).unwrap();
        assert_eq!(rdr.lump_data(0).unwrap(), flat_payload());
        assert!(matches!(rdr.lump_data(1), Err(Error::InvalidRange)));
    }
}
