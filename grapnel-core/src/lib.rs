//! # Grapnel Core
//!
//! `grapnel-core` is a library for invoking arbitrary gRPC methods against servers
//! whose Protobuf schema is only known at runtime. It resolves type information from
//! compiled descriptor sets, `.proto` sources, or the server reflection service, and
//! drives all four RPC cardinalities over dynamically constructed messages.
//!
//! ## Key Components
//!
//! * **[`source::DescriptorSource`]:** A uniform interface over descriptor information,
//!   backed either by files ([`source::FileSource`]) or by a live server exposing the
//!   reflection API ([`source::ServerSource`]).
//! * **[`invoke::invoke_rpc`]:** The invocation engine. It resolves the method, fetches
//!   every applicable extension, dispatches the call, and reports progress through an
//!   [`invoke::InvocationEventHandler`].
//! * **[`metadata`]:** Conversion between `"Name: Value"` header strings and the gRPC
//!   metadata model, including base64-encoded binary headers.
//! * **[`tls`] & [`dial`]:** TLS credential builders and a dial helper that blocks until
//!   the connection is ready while surfacing handshake errors verbatim.
//!
//! ## Internal clients
//!
//! The reflection client used by [`source::ServerSource`] is exposed as
//! [`reflection::ReflectionClient`] for callers that want to talk to the reflection
//! service directly.
//!
//! ## Re-exports
//!
//! This crate re-exports `prost`, `prost-reflect`, and `tonic` to ensure that consumers
//! use compatible versions of these underlying dependencies.

pub mod convert;
pub mod dial;
pub mod extensions;
pub mod grpc;
pub mod invoke;
pub mod metadata;
pub mod reflection;
pub mod source;
pub mod text;
pub mod tls;

// Re-exports
pub use prost;
pub use prost_reflect;
pub use tonic;

/// Type alias for the standard boxed error used in generic bounds.
type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
