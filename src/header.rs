//! Fixed-layout headers: the file header, the per-package preamble, and the
//! package header with its five stripe descriptors.
//!
//! # Coordinate spaces
//! `FileHeader` offsets are file-absolute.  Everything inside a package
//! (stripe offsets, the linker offset, allocation offsets) is relative to the
//! first byte of that package's preamble.  The outer package starts at
//! `FileHeader::package_offset`; the nested type-info package starts at the
//! TypeInfo stripe's first byte.
//!
//! # Endianness
//! Every field is little-endian.  The preamble carries an endian marker but
//! it is diagnostic only; no byte-swapping is ever performed.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{self, Cursor, Read, Write};
use std::ops::Range;
use thiserror::Error;

pub const MAGIC: &[u8; 6] = b"CIVBLP";
pub const VERSION: u16 = 1;

/// magic(6) + version(2) + 5 × u32.
pub const FILE_HEADER_SIZE: usize = 28;
pub const PREAMBLE_SIZE: usize = 16;
/// 5 stripes × 8 + linker offset + 7 reserved words.
pub const PACKAGE_HEADER_SIZE: usize = 72;
pub const STRIPE_COUNT: usize = 5;
pub const ENDIAN_MARKER: u32 = 0x1234_5678;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Invalid magic: expected \"CIVBLP\", found {found}")]
    BadMagic { found: String },
    #[error("File header truncated: {len} bytes available, {FILE_HEADER_SIZE} required")]
    Truncated { len: usize },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── FileHeader ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileHeader {
    #[serde(serialize_with = "serialize_magic")]
    pub magic:           [u8; 6],
    pub version:         u16,
    pub package_offset:  u32,
    pub package_size:    u32,
    pub big_data_offset: u32,
    pub big_data_count:  u32,
    pub file_size:       u32,
}

fn serialize_magic<S: serde::Serializer>(magic: &[u8; 6], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&String::from_utf8_lossy(magic))
}

impl FileHeader {
    pub fn new(package_offset: u32, package_size: u32, file_size: u32) -> Self {
        Self {
            magic: *MAGIC,
            version: VERSION,
            package_offset,
            package_size,
            big_data_offset: 0,
            big_data_count: 0,
            file_size,
        }
    }

    /// Parse the header at the start of `bytes`.
    ///
    /// This is the only hard-fail point of the whole pipeline: a wrong magic
    /// tag means the buffer is not a package file at all.
    pub fn read(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < MAGIC.len() || &bytes[..MAGIC.len()] != MAGIC {
            let end = bytes.len().min(MAGIC.len());
            return Err(ParseError::BadMagic { found: hex::encode(&bytes[..end]) });
        }
        if bytes.len() < FILE_HEADER_SIZE {
            return Err(ParseError::Truncated { len: bytes.len() });
        }

        let mut reader = Cursor::new(bytes);
        let mut magic = [0u8; 6];
        reader.read_exact(&mut magic)?;
        let header = Self {
            magic,
            version:         reader.read_u16::<LittleEndian>()?,
            package_offset:  reader.read_u32::<LittleEndian>()?,
            package_size:    reader.read_u32::<LittleEndian>()?,
            big_data_offset: reader.read_u32::<LittleEndian>()?,
            big_data_count:  reader.read_u32::<LittleEndian>()?,
            file_size:       reader.read_u32::<LittleEndian>()?,
        };
        if header.version != VERSION {
            log::warn!("unexpected file version {}, continuing", header.version);
        }
        Ok(header)
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.magic)?;
        writer.write_u16::<LittleEndian>(self.version)?;
        writer.write_u32::<LittleEndian>(self.package_offset)?;
        writer.write_u32::<LittleEndian>(self.package_size)?;
        writer.write_u32::<LittleEndian>(self.big_data_offset)?;
        writer.write_u32::<LittleEndian>(self.big_data_count)?;
        writer.write_u32::<LittleEndian>(self.file_size)?;
        Ok(())
    }

    /// File-absolute byte range of the package-data region, clamped to a
    /// buffer of `buffer_len` bytes.
    pub fn package_range(&self, buffer_len: usize) -> Range<usize> {
        let start = (self.package_offset as usize).min(buffer_len);
        let end = start.saturating_add(self.package_size as usize).min(buffer_len);
        start..end
    }
}

// ── Preamble ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Preamble {
    pub version:      u32,
    pub pointer_size: u16,
    pub alignment:    u16,
    pub header_size:  u32,
    pub endian:       u32,
}

impl Default for Preamble {
    fn default() -> Self {
        Self {
            version:      1,
            pointer_size: 8,
            alignment:    8,
            header_size:  (PREAMBLE_SIZE + PACKAGE_HEADER_SIZE) as u32,
            endian:       ENDIAN_MARKER,
        }
    }
}

impl Preamble {
    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        Ok(Self {
            version:      reader.read_u32::<LittleEndian>()?,
            pointer_size: reader.read_u16::<LittleEndian>()?,
            alignment:    reader.read_u16::<LittleEndian>()?,
            header_size:  reader.read_u32::<LittleEndian>()?,
            endian:       reader.read_u32::<LittleEndian>()?,
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.version)?;
        writer.write_u16::<LittleEndian>(self.pointer_size)?;
        writer.write_u16::<LittleEndian>(self.alignment)?;
        writer.write_u32::<LittleEndian>(self.header_size)?;
        writer.write_u32::<LittleEndian>(self.endian)?;
        Ok(())
    }

    /// Width of pointer-typed fields in object data.  Anything other than 4
    /// or 8 is treated as 8.
    pub fn pointer_width(&self) -> usize {
        match self.pointer_size {
            4 => 4,
            _ => 8,
        }
    }
}

// ── Stripes ──────────────────────────────────────────────────────────────────

/// The five stripes in on-disk order.  The discriminant is the stripe id
/// stored in allocation records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StripeKind {
    LinkerData   = 0,
    PackageBlock = 1,
    TempData     = 2,
    TypeInfo     = 3,
    RootTypeName = 4,
}

impl StripeKind {
    pub const ALL: [StripeKind; STRIPE_COUNT] = [
        StripeKind::LinkerData,
        StripeKind::PackageBlock,
        StripeKind::TempData,
        StripeKind::TypeInfo,
        StripeKind::RootTypeName,
    ];

    pub fn from_id(id: u64) -> Option<Self> {
        Self::ALL.get(usize::try_from(id).ok()?).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            StripeKind::LinkerData   => "LinkerData",
            StripeKind::PackageBlock => "PackageBlock",
            StripeKind::TempData     => "TempData",
            StripeKind::TypeInfo     => "TypeInfo",
            StripeKind::RootTypeName => "RootTypeName",
        }
    }
}

/// A named byte region, package-relative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stripe {
    pub offset: u32,
    pub size:   u32,
}

impl Stripe {
    pub fn end(&self) -> usize {
        self.offset as usize + self.size as usize
    }

    /// Package-relative range clamped to a region of `region_len` bytes.
    pub fn range(&self, region_len: usize) -> Range<usize> {
        let start = (self.offset as usize).min(region_len);
        start..self.end().min(region_len)
    }
}

// ── PackageHeader ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PackageHeader {
    pub stripes:            [Stripe; STRIPE_COUNT],
    pub linker_data_offset: u32,
    pub reserved:           [u32; 7],
}

impl PackageHeader {
    pub fn stripe(&self, kind: StripeKind) -> Stripe {
        self.stripes[kind as usize]
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut stripes = [Stripe::default(); STRIPE_COUNT];
        for stripe in stripes.iter_mut() {
            stripe.offset = reader.read_u32::<LittleEndian>()?;
            stripe.size   = reader.read_u32::<LittleEndian>()?;
        }
        let linker_data_offset = reader.read_u32::<LittleEndian>()?;
        let mut reserved = [0u32; 7];
        for word in reserved.iter_mut() {
            *word = reader.read_u32::<LittleEndian>()?;
        }
        Ok(Self { stripes, linker_data_offset, reserved })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        for stripe in &self.stripes {
            writer.write_u32::<LittleEndian>(stripe.offset)?;
            writer.write_u32::<LittleEndian>(stripe.size)?;
        }
        writer.write_u32::<LittleEndian>(self.linker_data_offset)?;
        for word in &self.reserved {
            writer.write_u32::<LittleEndian>(*word)?;
        }
        Ok(())
    }
}
