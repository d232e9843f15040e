//! Type registry built from the nested type-info package.
//!
//! Struct/class layouts come from `TypeVersion` records and enums from
//! `EnumVersion` records.  Every field's type name is classified into a
//! [`FieldKind`] once, when the registry is built; decoding never looks at
//! type-name strings again.

pub mod builder;
pub mod kind;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use builder::build_registry;
pub use kind::{base_name, FieldKind, Primitive};

pub const TRAIT_ARRAY:       u32 = 1 << 0;
pub const TRAIT_POINTER:     u32 = 1 << 1;
pub const TRAIT_FUNDAMENTAL: u32 = 1 << 2;
pub const TRAIT_POLYMORPHIC: u32 = 1 << 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlpField {
    pub name:        String,
    pub type_name:   String,
    pub version:     u32,
    pub byte_offset: u32,
    #[serde(default)]
    pub kind:        FieldKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlpType {
    pub name:            String,
    pub underlying_name: Option<String>,
    /// Sorted by `byte_offset`.
    pub fields:          Vec<BlpField>,
    pub version:         u32,
    pub size:            u32,
    pub trait_flags:     u32,
    pub is_fundamental:  bool,
    pub is_pointer:      bool,
    pub is_array:        bool,
    pub is_polymorphic:  bool,
}

impl BlpType {
    pub fn new(
        name:            String,
        underlying_name: Option<String>,
        mut fields:      Vec<BlpField>,
        version:         u32,
        size:            u32,
        trait_flags:     u32,
    ) -> Self {
        fields.sort_by_key(|f| f.byte_offset);
        Self {
            name,
            underlying_name,
            fields,
            version,
            size,
            trait_flags,
            is_fundamental: trait_flags & TRAIT_FUNDAMENTAL != 0,
            is_pointer:     trait_flags & TRAIT_POINTER != 0,
            is_array:       trait_flags & TRAIT_ARRAY != 0,
            is_polymorphic: trait_flags & TRAIT_POLYMORPHIC != 0,
        }
    }

    pub fn field(&self, name: &str) -> Option<&BlpField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_fields(&self) -> bool {
        !self.fields.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumConstant {
    pub name:  String,
    pub value: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlpEnum {
    pub name:      String,
    pub constants: Vec<EnumConstant>,
    pub version:   u32,
}

impl BlpEnum {
    pub fn constant_name(&self, value: i32) -> Option<&str> {
        self.constants.iter().find(|c| c.value == value).map(|c| c.name.as_str())
    }

    pub fn value_of(&self, name: &str) -> Option<i32> {
        self.constants.iter().find(|c| c.name == name).map(|c| c.value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRegistry {
    pub types: BTreeMap<String, BlpType>,
    pub enums: BTreeMap<String, BlpEnum>,
}

impl TypeRegistry {
    /// Exact name first, then the name without its namespace qualifier.
    pub fn lookup_type(&self, name: &str) -> Option<&BlpType> {
        self.types.get(name).or_else(|| {
            let base = base_name(name);
            (base != name).then(|| self.types.get(base)).flatten()
        })
    }

    pub fn lookup_enum(&self, name: &str) -> Option<&BlpEnum> {
        self.enums.get(name).or_else(|| {
            let base = base_name(name);
            (base != name).then(|| self.enums.get(base)).flatten()
        })
    }

    /// Keeps the higher version when a name is registered twice.
    pub fn insert_type(&mut self, ty: BlpType) {
        match self.types.get(&ty.name) {
            Some(existing) if existing.version >= ty.version => {
                log::debug!("duplicate type {} (v{}) ignored", ty.name, ty.version);
            }
            _ => {
                self.types.insert(ty.name.clone(), ty);
            }
        }
    }

    pub fn insert_enum(&mut self, e: BlpEnum) {
        match self.enums.get(&e.name) {
            Some(existing) if existing.version >= e.version => {
                log::debug!("duplicate enum {} (v{}) ignored", e.name, e.version);
            }
            _ => {
                self.enums.insert(e.name.clone(), e);
            }
        }
    }

    /// Assign every field its [`FieldKind`].  Runs after all types and enums
    /// are known, since classification looks names up in the registry.
    pub fn classify_fields(&mut self) {
        let kinds: Vec<(String, Vec<FieldKind>)> = self
            .types
            .values()
            .map(|ty| {
                let kinds = ty.fields.iter().map(|f| FieldKind::classify(&f.type_name, self));
                (ty.name.clone(), kinds.collect())
            })
            .collect();

        for (name, kinds) in kinds {
            if let Some(ty) = self.types.get_mut(&name) {
                for (field, kind) in ty.fields.iter_mut().zip(kinds) {
                    field.kind = kind;
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.types.len() + self.enums.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty() && self.enums.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
