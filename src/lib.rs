pub mod header;
pub mod allocation;
pub mod package;
pub mod registry;
pub mod deserialize;
pub mod archive;
pub mod recovery;
pub mod writer;

pub use header::{FileHeader, PackageHeader, ParseError, Preamble, Stripe, StripeKind};
pub use allocation::{Allocation, AllocationTable, Ptr};
pub use package::{PackageLayout, PackageView};
pub use registry::{build_registry, BlpEnum, BlpField, BlpType, FieldKind, Primitive, TypeRegistry};
pub use deserialize::{Decoder, Record, Value};
pub use archive::{BlpFile, ParseOptions};
pub use writer::{PackageWriter, RegionWriter, TypeInfoWriter};
