//! # Echo Service
//!
//! **INTERNAL USE ONLY**: a four-cardinality gRPC echo service backing the
//! `grapnel-core` integration tests, which route dynamic clients directly over the
//! server type without opening sockets.
//!
//! The schema is deliberately split across two proto files (`echo.proto` imports
//! its message types from `echo_types.proto`) so that tests exercising file
//! dependency closures and recursive reflection fetches have a real import edge
//! to follow.

/// Generated bindings for the `echo` package.
pub mod proto {
    include!(concat!(env!("OUT_DIR"), "/echo.rs"));
}

pub use proto::echo_service_server::{EchoService, EchoServiceServer};
pub use proto::{EchoRequest, EchoResponse};

/// Encoded `FileDescriptorSet` covering `echo.proto` and its import, as captured
/// by the build script. Feed it to a descriptor source or a reflection server.
pub const DESCRIPTOR_SET: &[u8] =
    include_bytes!(concat!(env!("OUT_DIR"), "/echo_descriptor_set.bin"));
