//! Layout-driven object decoding.
//!
//! Fields are decoded in byte-offset order from the allocation's bytes.
//! Every read is bounds-checked against the slice it comes from; a field that
//! does not fit decodes to `Value::Null` and its siblings are unaffected.
//!
//! Three limits keep a walk finite on any object graph:
//! - a pointer back to an allocation already on the current path decodes to
//!   `Value::Null`;
//! - pointer hops, collection hops and by-value nesting count towards
//!   [`ParseOptions::max_depth`];
//! - each top-level call builds at most [`ParseOptions::max_records`] records
//!   beneath the root.

use byteorder::{ByteOrder, LittleEndian};

use super::{Record, Value};
use crate::allocation::{Allocation, Ptr};
use crate::archive::ParseOptions;
use crate::package::{nul_terminated, PackageView, TypeNameCache};
use crate::registry::{BlpType, FieldKind, Primitive, TypeRegistry};

pub struct Decoder<'a> {
    view:       PackageView<'a>,
    registry:   &'a TypeRegistry,
    type_names: &'a TypeNameCache,
    options:    &'a ParseOptions,
}

/// State of one top-level decode.
#[derive(Debug, Default)]
struct Walk {
    /// Allocation indices from the root down to the object being decoded.
    path:    Vec<usize>,
    /// Records built beneath the root so far.
    records: usize,
}

impl Walk {
    fn on_path(&self, index: usize) -> bool {
        self.path.contains(&index)
    }

    /// Claim one record from the budget; false once it is spent.
    fn admit(&mut self, budget: usize) -> bool {
        if self.records >= budget {
            return false;
        }
        self.records += 1;
        true
    }
}

impl<'a> Decoder<'a> {
    pub fn new(
        view:       PackageView<'a>,
        registry:   &'a TypeRegistry,
        type_names: &'a TypeNameCache,
        options:    &'a ParseOptions,
    ) -> Self {
        Self { view, registry, type_names, options }
    }

    pub fn deserialize(&self, alloc: &Allocation) -> Record {
        let mut walk = Walk::default();
        self.record_at(alloc, 0, &mut walk)
    }

    fn record_at(&self, alloc: &Allocation, depth: usize, walk: &mut Walk) -> Record {
        walk.path.push(alloc.index);
        let record = self.decode_record(alloc, depth, walk);
        walk.path.pop();
        record
    }

    fn decode_record(&self, alloc: &Allocation, depth: usize, walk: &mut Walk) -> Record {
        let type_name = self.type_names.get(self.view, alloc).map(str::to_owned);
        let bytes = self.view.alloc_bytes(alloc);
        if alloc.size == 0 || bytes.is_empty() {
            return Record::fallback(type_name, String::new());
        }

        let layout = type_name
            .as_deref()
            .and_then(|name| self.registry.lookup_type(name))
            .filter(|ty| ty.has_fields());
        let Some(ty) = layout else {
            log::debug!(
                "allocation {}: no layout for {:?}, raw fallback",
                alloc.index,
                type_name.as_deref().unwrap_or("<untyped>")
            );
            return Record::fallback(type_name, self.raw_hex(bytes));
        };

        let mut record = Record::new(type_name);
        self.walk_struct(ty, bytes, depth, walk, &mut record);
        record
    }

    /// Decode the fields of `ty` laid out from the start of `bytes`.
    fn walk_struct(&self, ty: &BlpType, bytes: &[u8], depth: usize, walk: &mut Walk, out: &mut Record) {
        if ty.is_polymorphic {
            log::debug!("{}: polymorphic type decoded with flat layout", ty.name);
        }
        for (i, field) in ty.fields.iter().enumerate() {
            let start = field.byte_offset as usize;
            let next = ty
                .fields
                .get(i + 1)
                .map_or(ty.size as usize, |f| f.byte_offset as usize)
                .max(start);
            let value = self.decode_slot(&field.kind, bytes, start, next, depth, walk);
            if value.is_null() {
                log::trace!("{}.{}: null", ty.name, field.name);
            }
            out.push(field.name.clone(), value);
        }
    }

    /// One value of kind `kind` at `offset`.  `unknown_end` bounds the raw
    /// dump of an unclassified field.
    fn decode_slot(
        &self,
        kind:        &FieldKind,
        bytes:       &[u8],
        offset:      usize,
        unknown_end: usize,
        depth:       usize,
        walk:        &mut Walk,
    ) -> Value {
        let pointer_width = self.view.pointer_width();
        let Some(width) = kind.slot_width(self.registry, pointer_width) else {
            return match bytes.get(offset..unknown_end.min(bytes.len())) {
                Some(slice) => Value::Raw(self.raw_hex(slice)),
                None => Value::Null,
            };
        };
        let Some(slot) = offset.checked_add(width).and_then(|end| bytes.get(offset..end)) else {
            log::debug!("field at {offset} (+{width}) overruns {} byte(s)", bytes.len());
            return Value::Null;
        };

        match kind {
            FieldKind::Fundamental(p) => decode_primitive(*p, slot),
            FieldKind::PointerToStruct => self.deref_struct(read_ptr(slot, pointer_width), depth, walk),
            FieldKind::PointerToString => self.deref_string(read_ptr(slot, pointer_width)),
            FieldKind::Collection(elem) => {
                let ptr = read_ptr(slot, pointer_width);
                let count = LittleEndian::read_u32(&slot[pointer_width..]);
                self.decode_collection(elem, ptr, count, depth, walk)
            }
            FieldKind::NestedStruct(name) => self.nested_struct(name, slot, depth, walk),
            FieldKind::Enum(name) => self.decode_enum(name, LittleEndian::read_i32(slot)),
            FieldKind::Unknown => Value::Null,
        }
    }

    /// A struct stored by value: its fields are read from `slot`, the
    /// `ty.size` bytes of the parent at the field's offset.
    fn nested_struct(&self, name: &str, slot: &[u8], depth: usize, walk: &mut Walk) -> Value {
        let Some(ty) = self.registry.lookup_type(name) else {
            return Value::Null;
        };
        if depth >= self.options.max_depth {
            log::debug!("{}: nested value not decoded: depth limit {}", ty.name, self.options.max_depth);
            return Value::Null;
        }
        if !walk.admit(self.options.max_records) {
            log::debug!("{}: nested value not decoded: record budget spent", ty.name);
            return Value::Null;
        }
        let mut nested = Record::new(Some(ty.name.clone()));
        self.walk_struct(ty, slot, depth + 1, walk, &mut nested);
        Value::Record(nested)
    }

    fn deref_struct(&self, ptr: Ptr, depth: usize, walk: &mut Walk) -> Value {
        if ptr.is_null() {
            return Value::Null;
        }
        if depth >= self.options.max_depth {
            log::debug!("pointer {} not followed: depth limit {}", ptr.0, self.options.max_depth);
            return Value::Null;
        }
        let Some(target) = self.view.resolve(ptr) else {
            log::debug!("pointer {} out of range", ptr.0);
            return Value::Null;
        };
        if walk.on_path(target.index) {
            log::debug!("pointer {} leads back to allocation {} on the current path", ptr.0, target.index);
            return Value::Null;
        }
        if !walk.admit(self.options.max_records) {
            log::debug!("pointer {} not followed: record budget spent", ptr.0);
            return Value::Null;
        }
        Value::Record(self.record_at(target, depth + 1, walk))
    }

    fn deref_string(&self, ptr: Ptr) -> Value {
        match self.view.resolve(ptr) {
            Some(target) => Value::String(read_string(self.view.alloc_bytes(target))),
            None => Value::Null,
        }
    }

    /// A null pointer or a zero count is an empty collection and decodes to
    /// an empty array.  A target that is not followed (out of range, past the
    /// depth limit, or already on the current path) decodes to `Value::Null`,
    /// like a struct pointer in the same state.
    fn decode_collection(&self, elem: &FieldKind, ptr: Ptr, count: u32, depth: usize, walk: &mut Walk) -> Value {
        if ptr.is_null() || count == 0 {
            return Value::Array(Vec::new());
        }
        if depth >= self.options.max_depth {
            log::debug!("collection {} not followed: depth limit {}", ptr.0, self.options.max_depth);
            return Value::Null;
        }
        let Some(target) = self.view.resolve(ptr) else {
            log::debug!("collection pointer {} out of range", ptr.0);
            return Value::Null;
        };
        if walk.on_path(target.index) {
            log::debug!("collection {} leads back to allocation {} on the current path", ptr.0, target.index);
            return Value::Null;
        }

        walk.path.push(target.index);
        let items = self.collection_items(elem, self.view.alloc_bytes(target), count as usize, depth + 1, walk);
        walk.path.pop();

        if items.len() < count as usize {
            log::debug!(
                "collection {}: {} of {} element(s) decoded",
                ptr.0,
                items.len(),
                count
            );
        }
        Value::Array(items)
    }

    fn collection_items(
        &self,
        elem:  &FieldKind,
        bytes: &[u8],
        count: usize,
        depth: usize,
        walk:  &mut Walk,
    ) -> Vec<Value> {
        let mut items = Vec::new();
        match elem {
            FieldKind::NestedStruct(name) => {
                let Some(ty) = self.registry.lookup_type(name) else {
                    return items;
                };
                let size = ty.size as usize;
                let stride = if size > 0 && size.saturating_mul(count) <= bytes.len() {
                    size
                } else {
                    bytes.len() / count
                };
                if stride == 0 {
                    return items;
                }
                for chunk in bytes.chunks_exact(stride).take(count) {
                    if !walk.admit(self.options.max_records) {
                        log::debug!("{}: collection cut short: record budget spent", ty.name);
                        break;
                    }
                    let mut rec = Record::new(Some(ty.name.clone()));
                    self.walk_struct(ty, chunk, depth, walk, &mut rec);
                    items.push(Value::Record(rec));
                }
            }
            _ => {
                let stride = elem
                    .slot_width(self.registry, self.view.pointer_width())
                    .unwrap_or(bytes.len() / count);
                if stride == 0 {
                    return items;
                }
                for chunk in bytes.chunks_exact(stride).take(count) {
                    items.push(self.decode_slot(elem, chunk, 0, chunk.len(), depth, walk));
                }
            }
        }
        items
    }

    fn decode_enum(&self, name: &str, raw: i32) -> Value {
        let constant = self
            .registry
            .lookup_enum(name)
            .and_then(|e| e.constant_name(raw))
            .map(str::to_owned);
        Value::Enum { value: raw as i64, name: constant }
    }

    fn raw_hex(&self, bytes: &[u8]) -> String {
        let cap = self.options.max_raw_bytes;
        if bytes.len() > cap {
            let mut s = hex::encode(&bytes[..cap]);
            s.push_str("...");
            s
        } else {
            hex::encode(bytes)
        }
    }
}

fn read_ptr(slot: &[u8], width: usize) -> Ptr {
    match width {
        4 => Ptr(LittleEndian::read_u32(slot) as u64),
        _ => Ptr(LittleEndian::read_u64(slot)),
    }
}

/// Length-prefixed (`u32 capacity`, `u32 length == capacity - 1`, bytes) when
/// the prefix matches, NUL-terminated otherwise.
pub(crate) fn read_string(bytes: &[u8]) -> String {
    if bytes.len() >= 8 {
        let cap = LittleEndian::read_u32(&bytes[0..4]) as usize;
        let len = LittleEndian::read_u32(&bytes[4..8]) as usize;
        if cap >= 1 && len == cap - 1 {
            if let Some(text) = bytes.get(8..8 + len) {
                return String::from_utf8_lossy(text).into_owned();
            }
        }
    }
    nul_terminated(bytes)
}

fn decode_primitive(p: Primitive, slot: &[u8]) -> Value {
    match p {
        Primitive::U8   => Value::UInt(slot[0] as u64),
        Primitive::I8   => Value::Int(slot[0] as i8 as i64),
        Primitive::U16  => Value::UInt(LittleEndian::read_u16(slot) as u64),
        Primitive::I16  => Value::Int(LittleEndian::read_i16(slot) as i64),
        Primitive::U32  => Value::UInt(LittleEndian::read_u32(slot) as u64),
        Primitive::I32  => Value::Int(LittleEndian::read_i32(slot) as i64),
        Primitive::U64  => Value::UInt(LittleEndian::read_u64(slot)),
        Primitive::I64  => Value::Int(LittleEndian::read_i64(slot)),
        Primitive::F32  => Value::Float(LittleEndian::read_f32(slot) as f64),
        Primitive::F64  => Value::Float(LittleEndian::read_f64(slot)),
        Primitive::Bool => Value::Bool(slot[0] != 0),
    }
}
