//! Allocation health scanner.
//!
//! # How it works
//!
//! The scanner walks the outer allocation table of an already opened
//! [`BlpFile`] and checks each record independently.  It never decodes
//! object graphs and never fails: every problem becomes an
//! [`AllocationHealth`] variant in the report.
//!
//! ## Allocation health
//!
//! - `Healthy` — extent inside its stripe, type name resolves to a registered type
//! - `Untyped` — null type-name pointer (strings, raw buffers)
//! - `UnregisteredType` — type name resolves but has no layout; decodes as raw
//! - `UnresolvedTypeName` — type-name pointer is out of range
//! - `OutOfBounds` — `offset + size` runs past the stripe or the region
//! - `UnknownStripe` — stripe id is not one of the five stripes
//!
//! ## Quality
//!
//! | Quality | Meaning |
//! |---------|---------|
//! | `Full` | No structural damage |
//! | `Partial` | Some damaged records, at least half usable |
//! | `Schemaless` | No type registry; everything decodes as raw |
//! | `Catastrophic` | Empty table or fewer than 50% usable records |

use serde::Serialize;

use crate::allocation::{Allocation, Ptr};
use crate::archive::BlpFile;
use crate::header::{StripeKind, ENDIAN_MARKER};

// ── Types ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AllocationHealth {
    Healthy,
    Untyped,
    UnregisteredType { type_name: String },
    UnresolvedTypeName { ptr: Ptr },
    OutOfBounds { declared_end: u64, stripe_size: u32 },
    UnknownStripe { stripe: u64 },
}

impl AllocationHealth {
    /// Structurally sound: the bytes can be read even if not interpreted.
    pub fn is_usable(&self) -> bool {
        matches!(
            self,
            AllocationHealth::Healthy
                | AllocationHealth::Untyped
                | AllocationHealth::UnregisteredType { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScannedAllocation {
    pub index:     usize,
    pub type_name: Option<String>,
    pub health:    AllocationHealth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanQuality {
    Full,
    Partial,
    Schemaless,
    Catastrophic,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub total:            usize,
    pub healthy:          usize,
    pub untyped:          usize,
    pub unregistered:     usize,
    pub unresolved_names: usize,
    pub out_of_bounds:    usize,
    pub unknown_stripe:   usize,
    pub registry_types:   usize,
    pub registry_enums:   usize,
    /// File- and package-level inconsistencies.
    pub warnings:         Vec<String>,
    pub entries:          Vec<ScannedAllocation>,
    pub quality:          ScanQuality,
}

impl ScanReport {
    pub fn usable(&self) -> usize {
        self.healthy + self.untyped + self.unregistered
    }

    /// Percentage of usable allocations (0.0–100.0).
    pub fn health_pct(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.usable() as f64 / self.total as f64 * 100.0
    }

    pub fn summary(&self) -> String {
        format!(
            "{:?}: {}/{} allocation(s) usable ({:.1}%), {} out of bounds, \
             {} unknown stripe, {} unresolved name(s), {} type(s) registered",
            self.quality,
            self.usable(),
            self.total,
            self.health_pct(),
            self.out_of_bounds,
            self.unknown_stripe,
            self.unresolved_names,
            self.registry_types,
        )
    }

    pub fn damaged(&self) -> impl Iterator<Item = &ScannedAllocation> {
        self.entries.iter().filter(|e| !e.health.is_usable())
    }
}

// ── Scanner ───────────────────────────────────────────────────────────────────

fn check(file: &BlpFile, alloc: &Allocation) -> AllocationHealth {
    let view = file.view();
    let Some(kind) = alloc.stripe_kind() else {
        return AllocationHealth::UnknownStripe { stripe: alloc.stripe };
    };
    if !view.alloc_in_bounds(alloc) {
        return AllocationHealth::OutOfBounds {
            declared_end: alloc.offset as u64 + alloc.size as u64,
            stripe_size:  file.package_header().stripe(kind).size,
        };
    }
    if alloc.type_name.is_null() {
        return AllocationHealth::Untyped;
    }
    match file.resolve_type_name(alloc) {
        None => AllocationHealth::UnresolvedTypeName { ptr: alloc.type_name },
        Some(name) if file.registry().lookup_type(name).is_none() => {
            AllocationHealth::UnregisteredType { type_name: name.to_owned() }
        }
        Some(_) => AllocationHealth::Healthy,
    }
}

fn file_warnings(file: &BlpFile) -> Vec<String> {
    let mut warnings = Vec::new();
    let header = file.header();
    if header.file_size as usize != file.len() {
        warnings.push(format!(
            "declared file size {} differs from actual {}",
            header.file_size,
            file.len()
        ));
    }
    if file.package_range().len() < header.package_size as usize {
        warnings.push(format!(
            "package region truncated: {} of {} byte(s)",
            file.package_range().len(),
            header.package_size
        ));
    }
    if file.preamble().endian != ENDIAN_MARKER {
        warnings.push(format!("unexpected endian marker {:#010x}", file.preamble().endian));
    }
    let region_len = file.package_range().len();
    for kind in StripeKind::ALL {
        let stripe = file.package_header().stripe(kind);
        if stripe.end() > region_len {
            warnings.push(format!(
                "{} stripe ends at {} past region end {}",
                kind.name(),
                stripe.end(),
                region_len
            ));
        }
    }
    warnings
}

/// Classify every allocation of `file`.  Never fails on corrupt data.
pub fn scan(file: &BlpFile) -> ScanReport {
    let mut report = ScanReport {
        total:            file.allocations().len(),
        healthy:          0,
        untyped:          0,
        unregistered:     0,
        unresolved_names: 0,
        out_of_bounds:    0,
        unknown_stripe:   0,
        registry_types:   file.registry().types.len(),
        registry_enums:   file.registry().enums.len(),
        warnings:         file_warnings(file),
        entries:          Vec::with_capacity(file.allocations().len()),
        quality:          ScanQuality::Catastrophic,
    };

    for alloc in file.allocations() {
        let health = check(file, alloc);
        match &health {
            AllocationHealth::Healthy                   => report.healthy += 1,
            AllocationHealth::Untyped                   => report.untyped += 1,
            AllocationHealth::UnregisteredType { .. }   => report.unregistered += 1,
            AllocationHealth::UnresolvedTypeName { .. } => report.unresolved_names += 1,
            AllocationHealth::OutOfBounds { .. }        => report.out_of_bounds += 1,
            AllocationHealth::UnknownStripe { .. }      => report.unknown_stripe += 1,
        }
        if !health.is_usable() {
            log::debug!("allocation {}: {:?}", alloc.index, health);
        }
        report.entries.push(ScannedAllocation {
            index:     alloc.index,
            type_name: file.resolve_type_name(alloc).map(str::to_owned),
            health,
        });
    }

    let usable = report.usable();
    report.quality = if report.total == 0 || usable * 2 < report.total {
        ScanQuality::Catastrophic
    } else if report.registry_types == 0 {
        ScanQuality::Schemaless
    } else if usable == report.total {
        ScanQuality::Full
    } else {
        ScanQuality::Partial
    };
    report
}
