use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::{self, Cursor, Read, Write};

use crate::header::{PackageHeader, StripeKind};

/// stripe(8) + offset(4) + size(4) + count(4) + reserved(4) + user(8) + type name(8).
pub const ALLOCATION_RECORD_SIZE: usize = 40;

/// A 1-based reference into an allocation table.  Zero is null.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ptr(pub u64);

impl Ptr {
    pub const NULL: Ptr = Ptr(0);

    pub fn from_index(index: usize) -> Self {
        Ptr(index as u64 + 1)
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// 0-based table index, or `None` for null.  Range is checked by
    /// [`AllocationTable::resolve`], not here.
    pub fn index(self) -> Option<usize> {
        self.0.checked_sub(1).and_then(|i| usize::try_from(i).ok())
    }
}

/// One allocated object as recorded in the table.  `offset` is relative to
/// the owning stripe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Allocation {
    pub index:         usize,
    pub stripe:        u64,
    pub offset:        u32,
    pub size:          u32,
    pub element_count: u32,
    pub reserved:      u32,
    pub user_data:     u64,
    pub type_name:     Ptr,
}

impl Allocation {
    pub fn read<R: Read>(index: usize, mut reader: R) -> io::Result<Self> {
        Ok(Self {
            index,
            stripe:        reader.read_u64::<LittleEndian>()?,
            offset:        reader.read_u32::<LittleEndian>()?,
            size:          reader.read_u32::<LittleEndian>()?,
            element_count: reader.read_u32::<LittleEndian>()?,
            reserved:      reader.read_u32::<LittleEndian>()?,
            user_data:     reader.read_u64::<LittleEndian>()?,
            type_name:     Ptr(reader.read_u64::<LittleEndian>()?),
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u64::<LittleEndian>(self.stripe)?;
        writer.write_u32::<LittleEndian>(self.offset)?;
        writer.write_u32::<LittleEndian>(self.size)?;
        writer.write_u32::<LittleEndian>(self.element_count)?;
        writer.write_u32::<LittleEndian>(self.reserved)?;
        writer.write_u64::<LittleEndian>(self.user_data)?;
        writer.write_u64::<LittleEndian>(self.type_name.0)?;
        Ok(())
    }

    /// The pointer value other objects use to reference this allocation.
    pub fn ptr(&self) -> Ptr {
        Ptr::from_index(self.index)
    }

    pub fn stripe_kind(&self) -> Option<StripeKind> {
        StripeKind::from_id(self.stripe)
    }
}

/// The flat allocation table of one package instance.
#[derive(Debug, Clone, Default)]
pub struct AllocationTable {
    entries: Vec<Allocation>,
}

impl AllocationTable {
    pub fn new(entries: Vec<Allocation>) -> Self {
        Self { entries }
    }

    /// Read the table out of a package region (bytes starting at the
    /// package preamble).
    ///
    /// Records start at `temp_data.offset + linker_data_offset` and are read
    /// while a whole record fits before both the TempData stripe's end and
    /// the end of `region`.  A truncated table yields the records that fit.
    pub fn read(region: &[u8], header: &PackageHeader) -> Self {
        let temp = header.stripe(StripeKind::TempData);
        let start = temp.offset as usize + header.linker_data_offset as usize;
        let end = temp.end().min(region.len());

        let mut entries = Vec::new();
        let mut pos = start;
        while pos + ALLOCATION_RECORD_SIZE <= end {
            let record = &region[pos..pos + ALLOCATION_RECORD_SIZE];
            match Allocation::read(entries.len(), Cursor::new(record)) {
                Ok(alloc) => entries.push(alloc),
                Err(_) => break,
            }
            pos += ALLOCATION_RECORD_SIZE;
        }

        if temp.end() > region.len() {
            log::warn!(
                "allocation table runs past its region ({} > {} bytes); kept {} record(s)",
                temp.end(),
                region.len(),
                entries.len()
            );
        } else if end > pos && start <= end {
            log::debug!("{} trailing byte(s) after the allocation table", end - pos);
        }

        Self { entries }
    }

    /// `None` for null and for out-of-range pointers alike.
    pub fn resolve(&self, ptr: Ptr) -> Option<&Allocation> {
        self.entries.get(ptr.index()?)
    }

    pub fn get(&self, index: usize) -> Option<&Allocation> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Allocation> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[Allocation] {
        &self.entries
    }
}
