//! # Server Reflection
//!
//! This module contains the logic necessary to interact with the gRPC Server Reflection
//! Protocol (`grpc.reflection.v1alpha`).
//!
//! It enables a [`crate::source::ServerSource`] to query a server for its own Protobuf
//! schema at runtime, so RPCs can be invoked without pre-compiled descriptors.
pub mod client;

pub use client::{ReflectionClient, ReflectionResolveError};
