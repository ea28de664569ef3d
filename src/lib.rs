//! **retrokit** - a reusable Rust library for parsing legacy game container
//! formats.
//!
//! Each format is a self-describing binary layout: a fixed header carries
//! magic bytes, a version, and counts/offsets locating variable-length tables
//! elsewhere in the same byte stream. Parsers validate every count and offset
//! against the source length before following it, and a parse either yields a
//! complete model or fails at the first inconsistency - no partial models.
//!
//! # Supported formats
//! | Module | Format |
//! |--------|--------|
//! | [`formats::wad`]   | WAD3 - Half-Life texture package |
//! | [`formats::nitro`] | Nitro - Nintendo DS/DSi cart image |
//! | [`formats::xzp`]   | XZP - Valve Xbox package file |
//! | [`formats::vbsp`]  | VBSP - Source engine level |
//! | [`formats::bfpk`]  | BFPK - BFPK archive |

pub mod error;
pub mod formats;
pub mod reader;
pub mod utils;

pub use error::{Error, Result};
pub use reader::BoundedReader;
