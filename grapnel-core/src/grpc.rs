//! # Dynamic gRPC Transport
//!
//! The low-level building blocks for performing gRPC calls with runtime-resolved
//! message types.
//!
//! Unlike standard `tonic` clients, which are strongly typed against generated
//! structs, the components here move [`prost_reflect::DynamicMessage`] values whose
//! shape is driven entirely by method descriptors.
pub mod codec;
pub mod stub;
