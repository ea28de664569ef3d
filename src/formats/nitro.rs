//! Nitro - Nintendo DS/DSi cart image.
//!
//! A cart image has no magic; identification rests on the fixed 0x180-byte
//! header at offset 0. The header's offset/length pairs locate the file name
//! table (FNT) and file allocation table (FAT) elsewhere in the image.
//!
//! ## Common header (0x180 bytes)
//! ```text
//! [0x000] GameTitle          (12 bytes ASCII)
//! [0x00C] GameCode           (4 bytes)
//! [0x010] MakerCode          (2 bytes)
//! [0x012] UnitCode           (u8; 0 = NDS, 2 = NDS+DSi, 3 = DSi)
//! [0x013] EncryptionSeedSelect (u8)   [0x014] DeviceCapacity (u8)
//! [0x015] Reserved           (7 bytes)
//! [0x01C] GameRevision (u16) [0x01E] RomVersion (u8) [0x01F] Flags (u8)
//! [0x020] ARM9 RomOffset/EntryAddress/LoadAddress/Size   (4 × u32 LE)
//! [0x030] ARM7 RomOffset/EntryAddress/LoadAddress/Size   (4 × u32 LE)
//! [0x040] FntOffset, FntLength, FatOffset, FatLength     (4 × u32 LE)
//! [0x050] ARM9/ARM7 overlay offset + length              (4 × u32 LE)
//! [0x060] Card control registers (normal, secure)        (2 × u32 LE)
//! [0x068] IconBannerOffset (u32), SecureAreaCRC (u16),
//!         SecureTransferTimeout (u16)
//! [0x070] ARM9Autoload, ARM7Autoload (u32), SecureDisable (u64)
//! [0x080] NTRRegionRomSize, HeaderSize (u32)
//! [0x088] Reserved (56 bytes)
//! [0x0C0] NintendoLogo (156 bytes), LogoCRC (u16), HeaderCRC (u16)
//! [0x160] DebuggerReserved (32 bytes)
//! ```
//!
//! ## Extended DSi header (0x80 bytes, present iff UnitCode is 2 or 3)
//! Memory bank settings, region/access flags, ARM9i/ARM7i code regions,
//! digest regions, and modcrypt areas - read eagerly right after the common
//! header.
//!
//! ## File name table
//! A folder allocation table whose total entry count is **self-describing**:
//! the root entry's parent slot holds the total count, so the decoder reads
//! the root, then `count - 1` more entries. It is followed by a
//! sentinel-terminated name list: each entry starts with a flag/length byte
//! (high bit = folder, low 7 bits = name length), `0xFF` ends the table, and
//! folder entries carry a trailing `u16` folder index.
//!
//! ## File allocation table
//! Fixed 8-byte records (`StartOffset u32, EndOffset u32`) filling
//! `FatLength` bytes.

use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;

use crate::reader::BoundedReader;
use crate::utils::fixed_string;
use crate::{Error, Result};

/// Absolute offset of the secure area.
const SECURE_AREA_OFFSET: u64 = 0x4000;
/// Secure area size in bytes.
const SECURE_AREA_SIZE: usize = 0x800;
/// Folder allocation table record size.
const FOLDER_ENTRY_SIZE: u64 = 8;
/// Name-list flag byte that terminates the table.
const NAME_LIST_SENTINEL: u8 = 0xFF;

/// Console family a cart targets, from the header's unit code byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitCode {
    /// NDS-only cartridge.
    Nds,
    /// Dual NDS/DSi cartridge.
    NdsPlusDsi,
    /// DSi-exclusive cartridge.
    Dsi,
}

impl UnitCode {
    fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(UnitCode::Nds),
            2 => Ok(UnitCode::NdsPlusDsi),
            3 => Ok(UnitCode::Dsi),
            _ => Err(Error::Structure("unknown unit code")),
        }
    }

    /// Whether carts with this unit code carry the extended DSi header.
    pub fn has_extended_header(self) -> bool {
        matches!(self, UnitCode::NdsPlusDsi | UnitCode::Dsi)
    }
}

/// One relocatable code region described by the header (ARM9, ARM7, and the
/// DSi-mode i-variants).
#[derive(Debug, Clone, Copy)]
pub struct CodeRegion {
    /// Absolute offset of the code in the image.
    pub rom_offset: u32,
    /// Execution entry address (RAM).
    pub entry_address: u32,
    /// RAM load address.
    pub load_address: u32,
    /// Code size in bytes.
    pub size: u32,
}

/// The fixed 0x180-byte cart header.
#[derive(Debug, Clone)]
pub struct CartHeader {
    /// Game title, NUL-padded ASCII.
    pub game_title: String,
    /// Four-character game code.
    pub game_code: [u8; 4],
    /// Two-character maker code.
    pub maker_code: [u8; 2],
    /// Console family.
    pub unit_code: UnitCode,
    pub encryption_seed_select: u8,
    pub device_capacity: u8,
    pub game_revision: u16,
    pub rom_version: u8,
    pub internal_flags: u8,
    /// ARM9 code region.
    pub arm9: CodeRegion,
    /// ARM7 code region.
    pub arm7: CodeRegion,
    /// File name table location.
    pub fnt_offset: u32,
    pub fnt_length: u32,
    /// File allocation table location.
    pub fat_offset: u32,
    pub fat_length: u32,
    pub arm9_overlay_offset: u32,
    pub arm9_overlay_length: u32,
    pub arm7_overlay_offset: u32,
    pub arm7_overlay_length: u32,
    pub normal_card_control: u32,
    pub secure_card_control: u32,
    pub icon_banner_offset: u32,
    pub secure_area_crc: u16,
    pub secure_transfer_timeout: u16,
    pub arm9_autoload: u32,
    pub arm7_autoload: u32,
    pub secure_disable: u64,
    pub ntr_region_rom_size: u32,
    pub header_size: u32,
    pub nintendo_logo_crc: u16,
    pub header_crc: u16,
}

/// Extended header carried by DSi-compatible carts.
#[derive(Debug, Clone)]
pub struct ExtendedDsiHeader {
    pub global_mbk: [u32; 5],
    pub arm9_mbk: [u32; 3],
    pub arm7_mbk: [u32; 3],
    pub mbk9_setting: u32,
    pub region_flags: u32,
    pub access_control: u32,
    pub scfg_ext_mask: u32,
    pub reserved_flags: u32,
    /// ARM9i code region (the entry slot holds a reserved word).
    pub arm9i: CodeRegion,
    /// ARM7i code region (the entry slot holds the device list RAM address).
    pub arm7i: CodeRegion,
    pub ntr_digest_offset: u32,
    pub ntr_digest_length: u32,
    pub twl_digest_offset: u32,
    pub twl_digest_length: u32,
    pub modcrypt1_offset: u32,
    pub modcrypt1_size: u32,
    pub modcrypt2_offset: u32,
    pub modcrypt2_size: u32,
}

/// A folder allocation table entry.
///
/// For the root entry, `parent_index` holds the total entry count of the
/// table instead of a parent reference.
#[derive(Debug, Clone, Copy)]
pub struct FolderEntry {
    /// Offset of this folder's name-list run, relative to the FNT start.
    pub start_offset: u32,
    /// Index of the folder's first file in the FAT.
    pub first_file_index: u16,
    /// Parent folder index (total entry count on the root entry).
    pub parent_index: u16,
}

/// A name list entry: a file or folder name.
#[derive(Debug, Clone)]
pub struct NameEntry {
    /// Decoded UTF-8 name.
    pub name: String,
    /// Whether this entry names a folder.
    pub folder: bool,
    /// Folder index (folder entries only).
    pub folder_index: Option<u16>,
}

/// The file name table: folder allocation entries plus the name list.
#[derive(Debug, Clone)]
pub struct NameTable {
    pub folders: Vec<FolderEntry>,
    pub names: Vec<NameEntry>,
}

/// A file allocation table entry.
#[derive(Debug, Clone, Copy)]
pub struct FatEntry {
    /// Absolute offset of the file's first byte.
    pub start_offset: u32,
    /// Absolute offset one past the file's last byte.
    pub end_offset: u32,
}

impl FatEntry {
    /// File size in bytes.
    pub fn size(&self) -> u32 {
        self.end_offset.saturating_sub(self.start_offset)
    }
}

/// Parsed cart image.
#[derive(Debug, Clone)]
pub struct Cart {
    /// Common header.
    pub header: CartHeader,
    /// Extended header, present on DSi-compatible carts.
    pub extended_header: Option<ExtendedDsiHeader>,
    /// Raw secure area bytes (0x800 bytes at offset 0x4000), unprocessed.
    pub secure_area: Vec<u8>,
    /// File name table.
    pub name_table: NameTable,
    /// File allocation table.
    pub file_allocation_table: Vec<FatEntry>,
}

impl Cart {
    /// Parse a cart image from `r`.
    ///
    /// The cursor must be positioned at the start of the header; table
    /// offsets are absolute within the image.
    pub fn parse<R: Read + Seek>(r: &mut BoundedReader<R>) -> Result<Self> {
        let header = parse_header(r)?;

        let extended_header = if header.unit_code.has_extended_header() {
            Some(parse_extended_header(r)?)
        } else {
            None
        };

        // Secure area: fixed location, read without processing.
        if SECURE_AREA_OFFSET > r.len() {
            return Err(Error::InvalidRange);
        }
        r.seek_to(SECURE_AREA_OFFSET)?;
        let secure_area = r.bytesv(SECURE_AREA_SIZE)?;

        // File name table.
        let fnt_offset = header.fnt_offset as u64;
        r.check_offset(fnt_offset)?;
        r.seek_to(fnt_offset)?;
        let name_table = parse_name_table(r)?;

        // File allocation table.
        let fat_offset = header.fat_offset as u64;
        r.check_offset(fat_offset)?;
        r.seek_to(fat_offset)?;
        if header.fat_length as u64 > r.remaining() {
            return Err(Error::UnexpectedEof);
        }
        let mut file_allocation_table = Vec::new();
        while r.position() - fat_offset < header.fat_length as u64 {
            file_allocation_table.push(FatEntry {
                start_offset: r.le_u32()?,
                end_offset: r.le_u32()?,
            });
        }

        Ok(Self {
            header,
            extended_header,
            secure_area,
            name_table,
            file_allocation_table,
        })
    }
}

fn parse_code_region<R: Read + Seek>(r: &mut BoundedReader<R>) -> Result<CodeRegion> {
    Ok(CodeRegion {
        rom_offset: r.le_u32()?,
        entry_address: r.le_u32()?,
        load_address: r.le_u32()?,
        size: r.le_u32()?,
    })
}

fn parse_header<R: Read + Seek>(r: &mut BoundedReader<R>) -> Result<CartHeader> {
    let game_title = fixed_string(&r.bytesa::<12>()?);
    let game_code = r.bytesa::<4>()?;
    let maker_code = r.bytesa::<2>()?;
    let unit_code = UnitCode::from_byte(r.u8()?)?;
    let encryption_seed_select = r.u8()?;
    let device_capacity = r.u8()?;
    let _reserved = r.bytesa::<7>()?;
    let game_revision = r.le_u16()?;
    let rom_version = r.u8()?;
    let internal_flags = r.u8()?;

    let arm9 = parse_code_region(r)?;
    let arm7 = parse_code_region(r)?;

    let fnt_offset = r.le_u32()?;
    let fnt_length = r.le_u32()?;
    let fat_offset = r.le_u32()?;
    let fat_length = r.le_u32()?;
    let arm9_overlay_offset = r.le_u32()?;
    let arm9_overlay_length = r.le_u32()?;
    let arm7_overlay_offset = r.le_u32()?;
    let arm7_overlay_length = r.le_u32()?;
    let normal_card_control = r.le_u32()?;
    let secure_card_control = r.le_u32()?;
    let icon_banner_offset = r.le_u32()?;
    let secure_area_crc = r.le_u16()?;
    let secure_transfer_timeout = r.le_u16()?;
    let arm9_autoload = r.le_u32()?;
    let arm7_autoload = r.le_u32()?;
    let secure_disable = r.le_u64()?;
    let ntr_region_rom_size = r.le_u32()?;
    let header_size = r.le_u32()?;
    r.skip(56)?; // reserved
    r.skip(156)?; // Nintendo logo
    let nintendo_logo_crc = r.le_u16()?;
    let header_crc = r.le_u16()?;
    r.skip(32)?; // debugger reserved

    Ok(CartHeader {
        game_title,
        game_code,
        maker_code,
        unit_code,
        encryption_seed_select,
        device_capacity,
        game_revision,
        rom_version,
        internal_flags,
        arm9,
        arm7,
        fnt_offset,
        fnt_length,
        fat_offset,
        fat_length,
        arm9_overlay_offset,
        arm9_overlay_length,
        arm7_overlay_offset,
        arm7_overlay_length,
        normal_card_control,
        secure_card_control,
        icon_banner_offset,
        secure_area_crc,
        secure_transfer_timeout,
        arm9_autoload,
        arm7_autoload,
        secure_disable,
        ntr_region_rom_size,
        header_size,
        nintendo_logo_crc,
        header_crc,
    })
}

fn parse_extended_header<R: Read + Seek>(r: &mut BoundedReader<R>) -> Result<ExtendedDsiHeader> {
    let mut global_mbk = [0u32; 5];
    for slot in &mut global_mbk {
        *slot = r.le_u32()?;
    }
    let mut arm9_mbk = [0u32; 3];
    for slot in &mut arm9_mbk {
        *slot = r.le_u32()?;
    }
    let mut arm7_mbk = [0u32; 3];
    for slot in &mut arm7_mbk {
        *slot = r.le_u32()?;
    }

    Ok(ExtendedDsiHeader {
        global_mbk,
        arm9_mbk,
        arm7_mbk,
        mbk9_setting: r.le_u32()?,
        region_flags: r.le_u32()?,
        access_control: r.le_u32()?,
        scfg_ext_mask: r.le_u32()?,
        reserved_flags: r.le_u32()?,
        arm9i: parse_code_region(r)?,
        arm7i: parse_code_region(r)?,
        ntr_digest_offset: r.le_u32()?,
        ntr_digest_length: r.le_u32()?,
        twl_digest_offset: r.le_u32()?,
        twl_digest_length: r.le_u32()?,
        modcrypt1_offset: r.le_u32()?,
        modcrypt1_size: r.le_u32()?,
        modcrypt2_offset: r.le_u32()?,
        modcrypt2_size: r.le_u32()?,
    })
}

fn parse_name_table<R: Read + Seek>(r: &mut BoundedReader<R>) -> Result<NameTable> {
    // The folder table's entry count comes from the root entry itself:
    // decode it first, take the count from its parent slot, then decode the
    // remaining `count - 1` entries.
    let root = parse_folder_entry(r)?;
    let total = root.parent_index as u64;

    // Defensive ceiling: the declared count must fit in the remaining input.
    if total > 0 {
        r.ensure_records(total - 1, FOLDER_ENTRY_SIZE)
            .map_err(|_| Error::InvalidRange)?;
    }

    let mut folders = Vec::with_capacity(total as usize);
    folders.push(root);
    for _ in 1..total {
        folders.push(parse_folder_entry(r)?);
    }

    // Name list: flag/length byte per entry, 0xFF terminates.
    let mut names = Vec::new();
    loop {
        let flag_and_size = r.u8()?;
        if flag_and_size == NAME_LIST_SENTINEL {
            break;
        }

        let folder = flag_and_size & 0x80 != 0;
        let size = (flag_and_size & 0x7F) as usize;
        let name = String::from_utf8_lossy(&r.bytesv(size)?).into_owned();
        let folder_index = if folder { Some(r.le_u16()?) } else { None };

        names.push(NameEntry {
            name,
            folder,
            folder_index,
        });
    }

    Ok(NameTable { folders, names })
}

fn parse_folder_entry<R: Read + Seek>(r: &mut BoundedReader<R>) -> Result<FolderEntry> {
    Ok(FolderEntry {
        start_offset: r.le_u32()?,
        first_file_index: r.le_u16()?,
        parent_index: r.le_u16()?,
    })
}

/// A parsed cart image together with its backing source.
pub struct CartReader<R> {
    reader: BoundedReader<R>,
    /// Parsed model.
    pub cart: Cart,
}

impl<R: Read + Seek> CartReader<R> {
    /// Parse a cart image and wrap the provided source.
    pub fn new(reader: R) -> Result<Self> {
        Self::from_reader(BoundedReader::new(reader)?)
    }

    fn from_reader(mut reader: BoundedReader<R>) -> Result<Self> {
        let cart = Cart::parse(&mut reader)?;
        Ok(Self { reader, cart })
    }

    /// Human-readable format description.
    pub fn description(&self) -> &'static str {
        "Nintendo DS/DSi Cart Image"
    }

    /// Extract the raw bytes of FAT entry `index`.
    pub fn file_data(&mut self, index: usize) -> Result<Vec<u8>> {
        let entry = self
            .cart
            .file_allocation_table
            .get(index)
            .ok_or(Error::InvalidRange)?;
        if entry.end_offset < entry.start_offset {
            return Err(Error::Structure("FAT entry ends before it starts"));
        }
        if entry.end_offset as u64 > self.reader.len() {
            return Err(Error::InvalidRange);
        }
        let (offset, size) = (entry.start_offset as u64, entry.size() as usize);
        self.reader.with_pos(offset, |r| r.bytesv(size))
    }

    /// Read `length` raw bytes at `offset` from the backing source.
    pub fn extract(&mut self, offset: u64, length: usize) -> Result<Vec<u8>> {
        self.reader.with_pos(offset, |r| r.bytesv(length))
    }

    /// Raw secure area bytes.
    pub fn secure_area(&self) -> &[u8] {
        &self.cart.secure_area
    }

    /// Consume the wrapper, returning the underlying source.
    pub fn into_inner(self) -> R {
        self.reader.into_inner()
    }
}

impl<'a> CartReader<Cursor<&'a [u8]>> {
    /// Parse a cart image embedded at `offset` in an in-memory buffer.
    pub fn from_bytes(data: &'a [u8], offset: usize) -> Result<Self> {
        Self::from_reader(BoundedReader::from_bytes(data, offset)?)
    }
}

impl CartReader<BufReader<File>> {
    /// Open a file and parse it as a cart image.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(BufReader::new(File::open(path)?))
    }
}
