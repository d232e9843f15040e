//! Package writer — the inverse of the readers.
//!
//! [`RegionWriter`] lays out one package instance: preamble, package header,
//! the PackageBlock stripe holding every allocation's bytes (8-byte aligned),
//! the TempData stripe holding the allocation table, then the TypeInfo and
//! RootTypeName stripes.  [`TypeInfoWriter`] uses a `RegionWriter` to emit
//! the nested type-info package, and [`PackageWriter`] wraps both in a file
//! header.
//!
//! Allocation indices are assigned in call order, so the [`Ptr`] returned by
//! each `add_*` call is final and can be embedded in later objects.  Use
//! [`RegionWriter::reserve`] + [`RegionWriter::set_data`] for forward or
//! cyclic references.

use std::collections::HashMap;
use std::io;

use crate::allocation::{Allocation, Ptr};
use crate::header::{
    FileHeader, PackageHeader, Preamble, Stripe, StripeKind, FILE_HEADER_SIZE,
    PACKAGE_HEADER_SIZE, PREAMBLE_SIZE,
};
use crate::registry::builder::{
    ENUM_CONSTANT_NAME, ENUM_VERSION_NAME, FIELD_VERSION_NAME, TYPE_VERSION_NAME,
};

/// Alignment of every allocation inside the PackageBlock stripe.
const ALLOC_ALIGN: usize = 8;
/// Where the writer places the package region inside the file.
pub const DEFAULT_PACKAGE_OFFSET: usize = 32;

#[derive(Debug, Clone)]
struct PendingAlloc {
    data:          Vec<u8>,
    element_count: u32,
    user_data:     u64,
    type_name:     Ptr,
}

// ── RegionWriter ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct RegionWriter {
    allocs:         Vec<PendingAlloc>,
    type_names:     HashMap<String, Ptr>,
    pub preamble:   Preamble,
}

impl RegionWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.allocs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocs.is_empty()
    }

    fn push(&mut self, type_name: Ptr, data: Vec<u8>, element_count: u32) -> Ptr {
        self.allocs.push(PendingAlloc { data, element_count, user_data: 0, type_name });
        Ptr::from_index(self.allocs.len() - 1)
    }

    /// Pointer to the (deduplicated) string allocation holding `name`.
    pub fn type_name_ptr(&mut self, name: &str) -> Ptr {
        if let Some(&ptr) = self.type_names.get(name) {
            return ptr;
        }
        let ptr = self.add_string(name);
        self.type_names.insert(name.to_owned(), ptr);
        ptr
    }

    /// A NUL-terminated, untyped string allocation.
    pub fn add_string(&mut self, s: &str) -> Ptr {
        let mut data = s.as_bytes().to_vec();
        data.push(0);
        self.push(Ptr::NULL, data, 1)
    }

    /// A length-prefixed string allocation: `u32 capacity`, `u32 length`
    /// (capacity − 1), the bytes, then a NUL.
    pub fn add_prefixed_string(&mut self, s: &str) -> Ptr {
        let len = s.len() as u32;
        let mut data = Vec::with_capacity(s.len() + 9);
        data.extend_from_slice(&(len + 1).to_le_bytes());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(s.as_bytes());
        data.push(0);
        self.push(Ptr::NULL, data, 1)
    }

    pub fn add_object(&mut self, type_name: &str, data: Vec<u8>) -> Ptr {
        self.add_array(type_name, data, 1)
    }

    pub fn add_array(&mut self, type_name: &str, data: Vec<u8>, element_count: u32) -> Ptr {
        let name = self.type_name_ptr(type_name);
        self.push(name, data, element_count)
    }

    pub fn add_untyped(&mut self, data: Vec<u8>, element_count: u32) -> Ptr {
        self.push(Ptr::NULL, data, element_count)
    }

    /// Allocate an empty object now; fill it with [`set_data`](Self::set_data).
    pub fn reserve(&mut self, type_name: &str) -> Ptr {
        self.add_object(type_name, Vec::new())
    }

    /// Replace an allocation's bytes.  Returns `false` for an unknown pointer.
    pub fn set_data(&mut self, ptr: Ptr, data: Vec<u8>) -> bool {
        match ptr.index().and_then(|i| self.allocs.get_mut(i)) {
            Some(alloc) => {
                alloc.data = data;
                true
            }
            None => false,
        }
    }

    pub fn set_user_data(&mut self, ptr: Ptr, user_data: u64) -> bool {
        match ptr.index().and_then(|i| self.allocs.get_mut(i)) {
            Some(alloc) => {
                alloc.user_data = user_data;
                true
            }
            None => false,
        }
    }

    /// Serialize the region.  `type_info` becomes the TypeInfo stripe
    /// verbatim; `root_type_name` fills the RootTypeName stripe.
    pub fn finish(self, type_info: &[u8], root_type_name: Option<&str>) -> io::Result<Vec<u8>> {
        let header_len = PREAMBLE_SIZE + PACKAGE_HEADER_SIZE;

        let mut block = Vec::new();
        let mut records = Vec::with_capacity(self.allocs.len());
        for (index, pending) in self.allocs.iter().enumerate() {
            block.resize(align(block.len(), ALLOC_ALIGN), 0);
            records.push(Allocation {
                index,
                stripe:        StripeKind::PackageBlock as u64,
                offset:        block.len() as u32,
                size:          pending.data.len() as u32,
                element_count: pending.element_count,
                reserved:      0,
                user_data:     pending.user_data,
                type_name:     pending.type_name,
            });
            block.extend_from_slice(&pending.data);
        }

        let mut table = Vec::new();
        for record in &records {
            record.write(&mut table)?;
        }

        let mut root = Vec::new();
        if let Some(name) = root_type_name {
            root.extend_from_slice(name.as_bytes());
            root.push(0);
        }

        let mut header = PackageHeader::default();
        let mut pos = header_len;
        header.stripes[StripeKind::LinkerData as usize] = Stripe { offset: pos as u32, size: 0 };
        let sections: [(StripeKind, &[u8]); 4] = [
            (StripeKind::PackageBlock, block.as_slice()),
            (StripeKind::TempData, table.as_slice()),
            (StripeKind::TypeInfo, type_info),
            (StripeKind::RootTypeName, root.as_slice()),
        ];

        let mut out = vec![0u8; header_len];
        for (kind, bytes) in sections {
            pos = align(pos, ALLOC_ALIGN);
            out.resize(pos, 0);
            header.stripes[kind as usize] = Stripe { offset: pos as u32, size: bytes.len() as u32 };
            out.extend_from_slice(bytes);
            pos += bytes.len();
        }

        let mut head = Vec::with_capacity(header_len);
        let preamble = Preamble { header_size: header_len as u32, ..self.preamble };
        preamble.write(&mut head)?;
        header.write(&mut head)?;
        out[..header_len].copy_from_slice(&head);
        Ok(out)
    }
}

fn align(pos: usize, to: usize) -> usize {
    pos.div_ceil(to) * to
}

// ── TypeInfoWriter ───────────────────────────────────────────────────────────

/// One field descriptor: `(name, type name, byte offset)`.
pub type FieldSpec<'a> = (&'a str, &'a str, u32);

/// Builds the nested type-info package.
#[derive(Debug, Clone, Default)]
pub struct TypeInfoWriter {
    region: RegionWriter,
}

impl TypeInfoWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A plain struct: no underlying type, no trait flags, version 1.
    pub fn add_struct(&mut self, name: &str, size: u32, fields: &[FieldSpec<'_>]) -> Ptr {
        self.add_type(name, None, size, 0, 1, fields)
    }

    pub fn add_type(
        &mut self,
        name:        &str,
        underlying:  Option<&str>,
        size:        u32,
        trait_flags: u32,
        version:     u32,
        fields:      &[FieldSpec<'_>],
    ) -> Ptr {
        let name_ptr = self.region.add_string(name);
        let underlying_ptr = underlying.map_or(Ptr::NULL, |u| self.region.add_string(u));

        let fields_ptr = if fields.is_empty() {
            Ptr::NULL
        } else {
            let mut data = Vec::with_capacity(fields.len() * 24);
            for &(field_name, type_name, offset) in fields {
                let fname = self.region.add_string(field_name);
                let ftype = self.region.add_string(type_name);
                data.extend_from_slice(&fname.0.to_le_bytes());
                data.extend_from_slice(&ftype.0.to_le_bytes());
                data.extend_from_slice(&1u32.to_le_bytes());
                data.extend_from_slice(&offset.to_le_bytes());
            }
            self.region.add_array(FIELD_VERSION_NAME, data, fields.len() as u32)
        };

        let mut record = Vec::with_capacity(36);
        record.extend_from_slice(&name_ptr.0.to_le_bytes());
        record.extend_from_slice(&underlying_ptr.0.to_le_bytes());
        record.extend_from_slice(&fields_ptr.0.to_le_bytes());
        record.extend_from_slice(&version.to_le_bytes());
        record.extend_from_slice(&size.to_le_bytes());
        record.extend_from_slice(&trait_flags.to_le_bytes());
        self.region.add_object(TYPE_VERSION_NAME, record)
    }

    pub fn add_enum(&mut self, name: &str, constants: &[(&str, i32)]) -> Ptr {
        let name_ptr = self.region.add_string(name);
        let constants_ptr = if constants.is_empty() {
            Ptr::NULL
        } else {
            let mut data = Vec::with_capacity(constants.len() * 12);
            for &(constant, value) in constants {
                let cname = self.region.add_string(constant);
                data.extend_from_slice(&cname.0.to_le_bytes());
                data.extend_from_slice(&value.to_le_bytes());
            }
            self.region.add_array(ENUM_CONSTANT_NAME, data, constants.len() as u32)
        };

        let mut record = Vec::with_capacity(20);
        record.extend_from_slice(&name_ptr.0.to_le_bytes());
        record.extend_from_slice(&constants_ptr.0.to_le_bytes());
        record.extend_from_slice(&1u32.to_le_bytes());
        self.region.add_object(ENUM_VERSION_NAME, record)
    }

    pub fn finish(self) -> io::Result<Vec<u8>> {
        self.region.finish(&[], None)
    }
}

// ── PackageWriter ────────────────────────────────────────────────────────────

/// A whole file: file header, outer package, nested type-info package.
#[derive(Debug, Clone, Default)]
pub struct PackageWriter {
    pub objects:        RegionWriter,
    pub types:          TypeInfoWriter,
    pub root_type_name: Option<String>,
}

impl PackageWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> io::Result<Vec<u8>> {
        let type_info = self.types.finish()?;
        let region = self.objects.finish(&type_info, self.root_type_name.as_deref())?;

        let total = DEFAULT_PACKAGE_OFFSET + region.len();
        let header = FileHeader::new(
            DEFAULT_PACKAGE_OFFSET as u32,
            region.len() as u32,
            total as u32,
        );

        let mut out = Vec::with_capacity(total);
        header.write(&mut out)?;
        debug_assert_eq!(out.len(), FILE_HEADER_SIZE);
        out.resize(DEFAULT_PACKAGE_OFFSET, 0);
        out.extend_from_slice(&region);
        Ok(out)
    }
}
