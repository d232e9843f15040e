//! One package instance: preamble, package header, allocation table.
//!
//! A file holds two instances of the same format.  The outer one lives in the
//! package-data region; the second one is the byte content of the outer
//! TypeInfo stripe.  Both go through [`PackageLayout::parse`], and every
//! lookup afterwards goes through a [`PackageView`] that pairs a layout with
//! the bytes of its region.  The two pointer spaces never mix.

use std::cell::OnceCell;
use std::io::Cursor;

use crate::allocation::{Allocation, AllocationTable, Ptr};
use crate::header::{
    PackageHeader, Preamble, StripeKind, ENDIAN_MARKER, PACKAGE_HEADER_SIZE, PREAMBLE_SIZE,
};

#[derive(Debug, Clone, Default)]
pub struct PackageLayout {
    /// File-absolute offset of the region's first byte.
    pub origin:      usize,
    /// Region length in bytes.
    pub len:         usize,
    pub preamble:    Preamble,
    pub header:      PackageHeader,
    pub allocations: AllocationTable,
}

impl PackageLayout {
    /// Parse a package region.  `region` starts at the preamble; `origin` is
    /// where that is in the file and is only used for diagnostics.
    ///
    /// A region too short for its headers yields an empty package.
    pub fn parse(region: &[u8], origin: usize) -> Self {
        if region.len() < PREAMBLE_SIZE + PACKAGE_HEADER_SIZE {
            log::warn!(
                "package region at {origin:#x} is {} bytes, too short for its headers",
                region.len()
            );
            return Self { origin, len: region.len(), ..Self::default() };
        }

        // Length checked above; these reads cannot hit EOF.
        let (preamble, header) = match (
            Preamble::read(Cursor::new(region)),
            PackageHeader::read(Cursor::new(&region[PREAMBLE_SIZE..])),
        ) {
            (Ok(p), Ok(h)) => (p, h),
            _ => return Self { origin, len: region.len(), ..Self::default() },
        };

        if preamble.endian != ENDIAN_MARKER {
            log::warn!("package at {origin:#x}: endian marker {:#010x}", preamble.endian);
        }
        if preamble.pointer_size != 4 && preamble.pointer_size != 8 {
            log::warn!(
                "package at {origin:#x}: pointer size {} unsupported, using 8",
                preamble.pointer_size
            );
        }

        let allocations = AllocationTable::read(region, &header);
        log::debug!("package at {origin:#x}: {} allocation(s)", allocations.len());

        Self { origin, len: region.len(), preamble, header, allocations }
    }

    pub fn view<'a>(&'a self, region: &'a [u8]) -> PackageView<'a> {
        PackageView { bytes: region, layout: self }
    }
}

/// A layout paired with the bytes it was parsed from.  All pointer and
/// string primitives are scoped to this one package.
#[derive(Debug, Clone, Copy)]
pub struct PackageView<'a> {
    pub bytes:  &'a [u8],
    pub layout: &'a PackageLayout,
}

impl<'a> PackageView<'a> {
    pub fn allocations(&self) -> &'a AllocationTable {
        &self.layout.allocations
    }

    pub fn resolve(&self, ptr: Ptr) -> Option<&'a Allocation> {
        self.layout.allocations.resolve(ptr)
    }

    pub fn pointer_width(&self) -> usize {
        self.layout.preamble.pointer_width()
    }

    pub fn stripe_bytes(&self, kind: StripeKind) -> &'a [u8] {
        let range = self.layout.header.stripe(kind).range(self.bytes.len());
        &self.bytes[range]
    }

    /// Bytes of an allocation, clamped to its stripe.  Unknown stripe ids
    /// and offsets past the stripe yield an empty slice.
    pub fn alloc_bytes(&self, alloc: &Allocation) -> &'a [u8] {
        let Some(kind) = alloc.stripe_kind() else {
            return &[];
        };
        let stripe = self.stripe_bytes(kind);
        let start = (alloc.offset as usize).min(stripe.len());
        let end = start.saturating_add(alloc.size as usize).min(stripe.len());
        &stripe[start..end]
    }

    /// Whether the allocation's declared extent fits its stripe and region.
    pub fn alloc_in_bounds(&self, alloc: &Allocation) -> bool {
        match alloc.stripe_kind() {
            Some(kind) => {
                let stripe = self.layout.header.stripe(kind);
                alloc.offset as usize + alloc.size as usize <= stripe.size as usize
                    && stripe.end() <= self.bytes.len()
            }
            None => false,
        }
    }

    /// ASCII content of a string allocation, cut at the first NUL.
    pub fn read_string(&self, alloc: &Allocation) -> String {
        nul_terminated(self.alloc_bytes(alloc))
    }

    pub fn resolve_string(&self, ptr: Ptr) -> Option<String> {
        self.resolve(ptr).map(|alloc| self.read_string(alloc))
    }

    /// Content of the RootTypeName stripe, if any.
    pub fn root_type_name(&self) -> Option<String> {
        let name = nul_terminated(self.stripe_bytes(StripeKind::RootTypeName));
        (!name.is_empty()).then_some(name)
    }
}

/// Per-allocation memo of resolved type names.  Each slot is filled at most
/// once for the lifetime of the cache.
#[derive(Debug, Default)]
pub struct TypeNameCache {
    names: Vec<OnceCell<Option<String>>>,
}

impl TypeNameCache {
    pub fn new(len: usize) -> Self {
        Self { names: (0..len).map(|_| OnceCell::new()).collect() }
    }

    pub fn get<'c>(&'c self, view: PackageView<'_>, alloc: &Allocation) -> Option<&'c str> {
        let slot = self.names.get(alloc.index)?;
        slot.get_or_init(|| view.resolve_string(alloc.type_name)).as_deref()
    }
}

pub(crate) fn nul_terminated(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
