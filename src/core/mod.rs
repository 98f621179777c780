//! Core data model shared across transports, the registry, and consumers

pub mod adapter;
pub mod types;

pub use adapter::{SourceAdapter, Tareable};
pub use types::{
    monotonic_seconds, DeviceDescriptor, DeviceKind, LogicalAddress, Sample, StreamInfo,
    TransportRef,
};
