//! Parsers for legacy game binary container formats.
//!
//! Each submodule targets one format family. All parsers follow the same
//! conventions:
//!
//! * **Bounded reads** - every parser works against a
//!   [`crate::reader::BoundedReader`], generic over [`std::io::Read`] +
//!   [`std::io::Seek`]. Counts and offsets are checked against the source
//!   length before they are followed.
//! * **All-or-nothing** - a parse either returns a complete, internally
//!   consistent model or fails at the first invalid field. No partial models
//!   are surfaced, and nothing is retried.
//! * **Reader wrappers** - each format has a matching `*Reader<R>` type that
//!   keeps the parsed model together with the backing source, so payload
//!   bytes can be re-extracted later using offsets already present in the
//!   model, without re-parsing.
//! * **Codecs are external** - compressed or encrypted payloads are returned
//!   as stored. Decompression and decryption are a caller concern.
//!
//! ## Format overview
//!
//! | Module    | Format | Description |
//! |-----------|--------|-------------|
//! | [`wad`]   | WAD3   | Half-Life texture package; lump directory plus mip textures |
//! | [`nitro`] | Nitro  | Nintendo DS/DSi cart image; name table and file allocation table |
//! | [`xzp`]   | XZP    | Valve Xbox package; directory tables plus trailing footer |
//! | [`vbsp`]  | VBSP   | Source engine level; header with 64 embedded lump descriptors |
//! | [`bfpk`]  | BFPK   | Simple archive; per-entry compressed size chased by offset |

pub mod bfpk;
pub mod nitro;
pub mod vbsp;
pub mod wad;
pub mod xzp;
