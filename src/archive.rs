//! High-level [`BlpFile`] API — the primary embedding surface.
//!
//! ```no_run
//! use civblp::archive::BlpFile;
//!
//! let file = BlpFile::open("GameData.blp")?;
//! for alloc in file.iter_entries_by_type("UnitDefinition") {
//!     let record = file.deserialize_alloc(alloc);
//!     println!("{}", record.to_json()?);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::collections::BTreeMap;
use std::ops::Range;
use std::path::Path;

use crate::allocation::{Allocation, Ptr};
use crate::deserialize::{Decoder, Record};
use crate::header::{FileHeader, PackageHeader, ParseError, Preamble, StripeKind};
use crate::package::{PackageLayout, PackageView, TypeNameCache};
use crate::registry::{base_name, builder::build_from_view, TypeRegistry};

// ── ParseOptions ──────────────────────────────────────────────────────────────

/// Configuration for [`BlpFile::parse_with_options`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOptions {
    /// Pointer hops followed before a pointer decodes as null.
    pub max_depth:     usize,
    /// Records one decode call builds beneath the object it starts from.
    /// Pointers and nested values past the budget decode as null.
    pub max_records:   usize,
    /// Raw-hex fallbacks longer than this are cut and suffixed with `...`.
    pub max_raw_bytes: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            max_depth:     32,
            max_records:   1 << 20,
            max_raw_bytes: 4096,
        }
    }
}

// ── BlpFile ───────────────────────────────────────────────────────────────────

/// A parsed package file.  Owns its bytes; every returned reference borrows
/// from it.
#[derive(Debug)]
pub struct BlpFile {
    data:            Vec<u8>,
    header:          FileHeader,
    package_range:   Range<usize>,
    package:         PackageLayout,
    type_info_range: Range<usize>,
    type_info:       PackageLayout,
    registry:        TypeRegistry,
    type_names:      TypeNameCache,
    options:         ParseOptions,
}

impl BlpFile {
    // ── Constructors ─────────────────────────────────────────────────────────

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ParseError> {
        Self::open_with_options(path, ParseOptions::default())
    }

    pub fn open_with_options<P: AsRef<Path>>(path: P, options: ParseOptions) -> Result<Self, ParseError> {
        let data = std::fs::read(path)?;
        Self::parse_with_options(data, options)
    }

    pub fn parse(data: Vec<u8>) -> Result<Self, ParseError> {
        Self::parse_with_options(data, ParseOptions::default())
    }

    /// Parse an in-memory file.  Fails only when the file header itself is
    /// unusable; every later inconsistency is logged and degraded.
    pub fn parse_with_options(data: Vec<u8>, options: ParseOptions) -> Result<Self, ParseError> {
        let header = FileHeader::read(&data)?;
        if header.file_size as usize != data.len() {
            log::warn!(
                "file header declares {} bytes, buffer holds {}",
                header.file_size,
                data.len()
            );
        }

        let package_range = header.package_range(data.len());
        if package_range.len() < header.package_size as usize {
            log::warn!(
                "package region truncated: {} of {} byte(s) present",
                package_range.len(),
                header.package_size
            );
        }
        let package = PackageLayout::parse(&data[package_range.clone()], package_range.start);

        let stripe = package.header.stripe(StripeKind::TypeInfo).range(package_range.len());
        let type_info_range = package_range.start + stripe.start..package_range.start + stripe.end;
        let (type_info, registry) = if type_info_range.is_empty() {
            log::warn!("no type info stripe; objects decode as raw bytes");
            (PackageLayout::default(), TypeRegistry::default())
        } else {
            let bytes = &data[type_info_range.clone()];
            let layout = PackageLayout::parse(bytes, type_info_range.start);
            let registry = build_from_view(layout.view(bytes));
            (layout, registry)
        };

        log::info!(
            "parsed {} allocation(s), {} type(s), {} enum(s)",
            package.allocations.len(),
            registry.types.len(),
            registry.enums.len()
        );

        let type_names = TypeNameCache::new(package.allocations.len());
        Ok(Self {
            data,
            header,
            package_range,
            package,
            type_info_range,
            type_info,
            registry,
            type_names,
            options,
        })
    }

    // ── Layout ───────────────────────────────────────────────────────────────

    pub fn header(&self) -> &FileHeader { &self.header }

    pub fn preamble(&self) -> &Preamble { &self.package.preamble }

    pub fn package_header(&self) -> &PackageHeader { &self.package.header }

    pub fn registry(&self) -> &TypeRegistry { &self.registry }

    pub fn options(&self) -> &ParseOptions { &self.options }

    pub fn len(&self) -> usize { self.data.len() }

    pub fn is_empty(&self) -> bool { self.data.is_empty() }

    /// File-absolute range of the package-data region.
    pub fn package_range(&self) -> Range<usize> { self.package_range.clone() }

    /// The nested package inside the TypeInfo stripe.
    pub fn type_info_package(&self) -> PackageView<'_> {
        self.type_info.view(&self.data[self.type_info_range.clone()])
    }

    pub fn view(&self) -> PackageView<'_> {
        self.package.view(&self.data[self.package_range.clone()])
    }

    // ── Allocations ──────────────────────────────────────────────────────────

    pub fn allocations(&self) -> &[Allocation] {
        self.package.allocations.as_slice()
    }

    pub fn allocation(&self, index: usize) -> Option<&Allocation> {
        self.package.allocations.get(index)
    }

    pub fn resolve_pointer(&self, ptr: Ptr) -> Option<&Allocation> {
        self.package.allocations.resolve(ptr)
    }

    /// The allocation's type name, resolved once and memoized.
    pub fn resolve_type_name(&self, alloc: &Allocation) -> Option<&str> {
        self.type_names.get(self.view(), alloc)
    }

    /// Allocations whose type name is `type_name`, either exactly or after
    /// dropping a namespace qualifier.  Lazy and restartable.
    pub fn iter_entries_by_type<'s, 'n>(
        &'s self,
        type_name: &'n str,
    ) -> impl Iterator<Item = &'s Allocation> + 'n
    where
        's: 'n,
    {
        self.allocations().iter().filter(move |alloc| {
            self.resolve_type_name(alloc)
                .is_some_and(|name| name == type_name || base_name(name) == type_name)
        })
    }

    /// Distinct resolved type names with their allocation counts, sorted.
    pub fn type_names(&self) -> Vec<(String, usize)> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for alloc in self.allocations() {
            if let Some(name) = self.resolve_type_name(alloc) {
                *counts.entry(name).or_insert(0) += 1;
            }
        }
        counts.into_iter().map(|(name, n)| (name.to_owned(), n)).collect()
    }

    pub fn alloc_bytes(&self, alloc: &Allocation) -> &[u8] {
        self.view().alloc_bytes(alloc)
    }

    pub fn root_type_name(&self) -> Option<String> {
        self.view().root_type_name()
    }

    // ── Decoding ─────────────────────────────────────────────────────────────

    pub fn decoder(&self) -> Decoder<'_> {
        Decoder::new(self.view(), &self.registry, &self.type_names, &self.options)
    }

    pub fn deserialize_alloc(&self, alloc: &Allocation) -> Record {
        self.decoder().deserialize(alloc)
    }

    pub fn deserialize_pointer(&self, ptr: Ptr) -> Option<Record> {
        self.resolve_pointer(ptr).map(|alloc| self.deserialize_alloc(alloc))
    }
}
