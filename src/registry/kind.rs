//! Field-kind classification.
//!
//! Type names in the registry follow a handful of shapes: fundamental names
//! (`uint32`, `float`, `bool`, ...), pointers (`T*`, `Ptr<T>`), strings
//! (`String`, `char*`), collections (`Array<T>`, `Vector<T>`), and names of
//! other registered types or enums.  Any of them may carry a `Namespace::`
//! qualifier.

use serde::{Deserialize, Serialize};

use super::TypeRegistry;

/// Typedef chains longer than this are treated as unknown.
const MAX_ALIAS_DEPTH: usize = 8;

const POINTER_TEMPLATES:    &[&str] = &["Ptr", "Pointer", "RelPtr"];
const COLLECTION_TEMPLATES: &[&str] = &["Array", "Vector", "vector", "List", "DynArray"];
const STRING_NAMES:         &[&str] = &["String", "string", "CString"];
const CHAR_NAMES:           &[&str] = &["char", "const char", "char8_t"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Primitive {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
    Bool,
}

impl Primitive {
    pub fn from_name(name: &str) -> Option<Self> {
        let p = match base_name(name).to_ascii_lowercase().as_str() {
            "uint8" | "u8" | "byte" | "uchar" | "unsigned char" => Primitive::U8,
            "int8" | "i8" | "char" | "sbyte" | "signed char" => Primitive::I8,
            "uint16" | "u16" | "ushort" | "unsigned short" => Primitive::U16,
            "int16" | "i16" | "short" => Primitive::I16,
            "uint32" | "u32" | "uint" | "unsigned" | "unsigned int" => Primitive::U32,
            "int32" | "i32" | "int" => Primitive::I32,
            "uint64" | "u64" | "ulong" | "size_t" | "unsigned long long" => Primitive::U64,
            "int64" | "i64" | "long long" => Primitive::I64,
            "float" | "float32" | "f32" => Primitive::F32,
            "double" | "float64" | "f64" => Primitive::F64,
            "bool" | "boolean" => Primitive::Bool,
            _ => return None,
        };
        Some(p)
    }

    /// Unsigned integer of the given byte width.
    pub fn from_size(size: u32) -> Option<Self> {
        match size {
            1 => Some(Primitive::U8),
            2 => Some(Primitive::U16),
            4 => Some(Primitive::U32),
            8 => Some(Primitive::U64),
            _ => None,
        }
    }

    pub fn width(self) -> usize {
        match self {
            Primitive::U8 | Primitive::I8 | Primitive::Bool => 1,
            Primitive::U16 | Primitive::I16 => 2,
            Primitive::U32 | Primitive::I32 | Primitive::F32 => 4,
            Primitive::U64 | Primitive::I64 | Primitive::F64 => 8,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    Fundamental(Primitive),
    /// The target allocation carries its own type name.
    PointerToStruct,
    PointerToString,
    /// Pointer + u32 element count.
    Collection(Box<FieldKind>),
    /// Registered struct stored by value.
    NestedStruct(String),
    /// 32-bit value of a registered enum.
    Enum(String),
    #[default]
    Unknown,
}

impl FieldKind {
    pub fn classify(type_name: &str, registry: &TypeRegistry) -> Self {
        classify_at(type_name, registry, 0)
    }

    /// Bytes the field occupies in its parent, or `None` when unknown.
    pub fn slot_width(&self, registry: &TypeRegistry, pointer_width: usize) -> Option<usize> {
        match self {
            FieldKind::Fundamental(p) => Some(p.width()),
            FieldKind::PointerToStruct | FieldKind::PointerToString => Some(pointer_width),
            FieldKind::Collection(_) => Some(pointer_width + 4),
            FieldKind::NestedStruct(name) => registry.lookup_type(name).map(|t| t.size as usize),
            FieldKind::Enum(_) => Some(4),
            FieldKind::Unknown => None,
        }
    }
}

/// `Game::Unit` → `Unit`; the qualifier inside template arguments is kept.
pub fn base_name(name: &str) -> &str {
    let head_end = name.find('<').unwrap_or(name.len());
    match name[..head_end].rfind("::") {
        Some(i) => &name[i + 2..],
        None => name,
    }
}

/// `Array<Foo>` → `("Array", "Foo")`.
fn split_template(name: &str) -> Option<(&str, &str)> {
    let inner_end = name.strip_suffix('>')?;
    let lt = inner_end.find('<')?;
    Some((base_name(inner_end[..lt].trim()), inner_end[lt + 1..].trim()))
}

fn pointer_to(target: &str) -> FieldKind {
    let target = target.trim();
    let base = base_name(target);
    if CHAR_NAMES.contains(&target) || CHAR_NAMES.contains(&base) || STRING_NAMES.contains(&base) {
        FieldKind::PointerToString
    } else {
        FieldKind::PointerToStruct
    }
}

fn classify_at(name: &str, registry: &TypeRegistry, depth: usize) -> FieldKind {
    let name = name.trim();
    if name.is_empty() || depth > MAX_ALIAS_DEPTH {
        return FieldKind::Unknown;
    }

    if let Some(target) = name.strip_suffix('*') {
        return pointer_to(target);
    }

    if let Some((outer, inner)) = split_template(name) {
        if POINTER_TEMPLATES.contains(&outer) {
            return pointer_to(inner);
        }
        if COLLECTION_TEMPLATES.contains(&outer) {
            return FieldKind::Collection(Box::new(classify_at(inner, registry, depth + 1)));
        }
    }

    let base = base_name(name);
    if STRING_NAMES.contains(&base) {
        return FieldKind::PointerToString;
    }
    if let Some(p) = Primitive::from_name(name) {
        return FieldKind::Fundamental(p);
    }

    if let Some(ty) = registry.lookup_type(name) {
        let underlying = ty
            .underlying_name
            .as_deref()
            .filter(|u| !u.is_empty() && *u != ty.name);

        if ty.is_pointer {
            return underlying.map_or(FieldKind::PointerToStruct, pointer_to);
        }
        if ty.is_array {
            let elem = underlying.map_or(FieldKind::Unknown, |u| classify_at(u, registry, depth + 1));
            return FieldKind::Collection(Box::new(elem));
        }
        if ty.is_fundamental {
            return underlying
                .and_then(Primitive::from_name)
                .or_else(|| Primitive::from_size(ty.size))
                .map_or(FieldKind::Unknown, FieldKind::Fundamental);
        }
        if ty.has_fields() {
            return FieldKind::NestedStruct(ty.name.clone());
        }
        if let Some(u) = underlying {
            return classify_at(u, registry, depth + 1);
        }
    }

    match registry.lookup_enum(name) {
        Some(e) => FieldKind::Enum(e.name.clone()),
        None => FieldKind::Unknown,
    }
}
