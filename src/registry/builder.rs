//! Builds a [`TypeRegistry`] from the TypeInfo stripe.
//!
//! The stripe is a complete package of its own.  It is parsed with the same
//! [`PackageLayout::parse`] as the outer package, and every pointer in the
//! records below resolves through the nested allocation table.
//!
//! ```text
//! TypeVersion   name*  underlying*  fields*   u32 version  u32 size  u32 traits   (36 B)
//! FieldVersion  name*  type_name*   u32 version  u32 byte_offset                   (24 B)
//! EnumVersion   name*  constants*   u32 version                                    (20 B)
//! EnumConstant  name*  i32 value                                                   (12 B)
//! ```
//!
//! Child arrays (`fields*`, `constants*`) take their length from the target
//! allocation's element count.

use byteorder::{ByteOrder, LittleEndian};

use super::{base_name, BlpEnum, BlpField, BlpType, EnumConstant, FieldKind, TypeRegistry};
use crate::allocation::{Allocation, Ptr};
use crate::package::{PackageLayout, PackageView};

pub const TYPE_VERSION_NAME:  &str = "TypeVersion";
pub const FIELD_VERSION_NAME: &str = "FieldVersion";
pub const ENUM_VERSION_NAME:  &str = "EnumVersion";
pub const ENUM_CONSTANT_NAME: &str = "EnumConstant";

pub const TYPE_VERSION_SIZE:  usize = 36;
pub const FIELD_VERSION_SIZE: usize = 24;
pub const ENUM_VERSION_SIZE:  usize = 20;
pub const ENUM_CONSTANT_SIZE: usize = 12;

/// Parse `type_info` (the TypeInfo stripe bytes) as a nested package and
/// build the registry from it.  `origin` is the stripe's file offset.
pub fn build_registry(type_info: &[u8], origin: usize) -> TypeRegistry {
    let layout = PackageLayout::parse(type_info, origin);
    build_from_view(layout.view(type_info))
}

pub fn build_from_view(view: PackageView<'_>) -> TypeRegistry {
    let mut registry = TypeRegistry::default();

    for alloc in view.allocations().iter() {
        let Some(record_kind) = view.resolve_string(alloc.type_name) else {
            continue;
        };
        match base_name(&record_kind) {
            TYPE_VERSION_NAME => {
                if let Some(ty) = read_type(view, alloc) {
                    registry.insert_type(ty);
                }
            }
            ENUM_VERSION_NAME => {
                if let Some(e) = read_enum(view, alloc) {
                    registry.insert_enum(e);
                }
            }
            _ => {}
        }
    }

    registry.classify_fields();
    log::debug!(
        "type registry: {} type(s), {} enum(s)",
        registry.types.len(),
        registry.enums.len()
    );
    registry
}

fn ptr_at(bytes: &[u8], offset: usize) -> Ptr {
    Ptr(LittleEndian::read_u64(&bytes[offset..offset + 8]))
}

fn u32_at(bytes: &[u8], offset: usize) -> u32 {
    LittleEndian::read_u32(&bytes[offset..offset + 4])
}

/// Fixed-size records of the array allocation behind `ptr`.  Stops at the
/// first record that does not fit.
fn records<'a>(view: PackageView<'a>, ptr: Ptr, record_size: usize) -> Vec<&'a [u8]> {
    let Some(alloc) = view.resolve(ptr) else {
        return Vec::new();
    };
    let count = alloc.element_count as usize;
    if count == 0 {
        return Vec::new();
    }
    let bytes = view.alloc_bytes(alloc);
    let stride = (alloc.size as usize / count).max(record_size);
    let out: Vec<&[u8]> = (0..count)
        .map_while(|i| bytes.get(i * stride..i * stride + record_size))
        .collect();
    if out.len() < count {
        log::debug!(
            "array allocation {} truncated: {} of {} record(s)",
            alloc.index,
            out.len(),
            count
        );
    }
    out
}

fn read_type(view: PackageView<'_>, alloc: &Allocation) -> Option<BlpType> {
    let bytes = view.alloc_bytes(alloc);
    if bytes.len() < TYPE_VERSION_SIZE {
        log::debug!("TypeVersion allocation {} truncated ({} bytes)", alloc.index, bytes.len());
        return None;
    }

    let Some(name) = view.resolve_string(ptr_at(bytes, 0)).filter(|n| !n.is_empty()) else {
        log::debug!("TypeVersion allocation {} has no name", alloc.index);
        return None;
    };
    let underlying = view.resolve_string(ptr_at(bytes, 8)).filter(|n| !n.is_empty());
    let fields = records(view, ptr_at(bytes, 16), FIELD_VERSION_SIZE)
        .into_iter()
        .filter_map(|record| read_field(view, record, &name))
        .collect();

    Some(BlpType::new(
        name,
        underlying,
        fields,
        u32_at(bytes, 24),
        u32_at(bytes, 28),
        u32_at(bytes, 32),
    ))
}

fn read_field(view: PackageView<'_>, record: &[u8], owner: &str) -> Option<BlpField> {
    let byte_offset = u32_at(record, 20);
    let Some(name) = view.resolve_string(ptr_at(record, 0)) else {
        log::debug!("{owner}: unnamed field at offset {byte_offset} skipped");
        return None;
    };
    Some(BlpField {
        name,
        type_name: view.resolve_string(ptr_at(record, 8)).unwrap_or_default(),
        version: u32_at(record, 16),
        byte_offset,
        kind: FieldKind::Unknown,
    })
}

fn read_enum(view: PackageView<'_>, alloc: &Allocation) -> Option<BlpEnum> {
    let bytes = view.alloc_bytes(alloc);
    if bytes.len() < ENUM_VERSION_SIZE {
        log::debug!("EnumVersion allocation {} truncated ({} bytes)", alloc.index, bytes.len());
        return None;
    }
    let name = view.resolve_string(ptr_at(bytes, 0)).filter(|n| !n.is_empty())?;
    let constants = records(view, ptr_at(bytes, 8), ENUM_CONSTANT_SIZE)
        .into_iter()
        .filter_map(|record| {
            Some(EnumConstant {
                name:  view.resolve_string(ptr_at(record, 0))?,
                value: LittleEndian::read_i32(&record[8..12]),
            })
        })
        .collect();
    Some(BlpEnum { name, constants, version: u32_at(bytes, 16) })
}
