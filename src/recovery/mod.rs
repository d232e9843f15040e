pub mod scanner;

pub use scanner::{scan, AllocationHealth, ScanQuality, ScanReport, ScannedAllocation};
