//! # Reflection-backed Descriptor Source
//!
//! [`ServerSource`] adapts a [`ReflectionClient`] to the [`DescriptorSource`] contract.
//! Symbols, files, and extensions are resolved lazily from the live peer and cached in
//! a local descriptor pool, so repeated lookups do not re-stream files the server has
//! already sent. The cache is only valid for the lifetime of the backing connection.
//!
//! Any reflection call the peer answers with `Unimplemented` is translated into the
//! [`SourceError::ReflectionNotSupported`] sentinel; all other failures pass through
//! unchanged.

use super::file::find_symbol_in_pool;
use super::{DescriptorSource, SourceError, SymbolDescriptor, not_found};
use crate::BoxError;
use crate::reflection::{ReflectionClient, ReflectionResolveError};
use async_trait::async_trait;
use http_body::Body as HttpBody;
use prost_reflect::{DescriptorPool, ExtensionDescriptor};
use prost_types::FileDescriptorProto;
use tokio::sync::Mutex;
use tonic::Code;
use tonic::client::GrpcService;
use tonic::transport::Channel;

/// A [`DescriptorSource`] that interrogates a live server through the gRPC
/// reflection API.
pub struct ServerSource<S = Channel> {
    inner: Mutex<Inner<S>>,
}

struct Inner<S> {
    client: ReflectionClient<S>,
    pool: DescriptorPool,
}

impl<S> ServerSource<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    /// Creates a source that resolves descriptors through the reflection service of
    /// the given gRPC service (e.g., a `Channel`).
    pub fn new(channel: S) -> Self {
        Self {
            inner: Mutex::new(Inner {
                client: ReflectionClient::new(channel),
                pool: DescriptorPool::new(),
            }),
        }
    }
}

#[async_trait]
impl<S> DescriptorSource for ServerSource<S>
where
    S: GrpcService<tonic::body::Body> + Send,
    S::Error: Into<BoxError>,
    S::Future: Send,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    async fn list_services(&self) -> Result<Vec<String>, SourceError> {
        let mut inner = self.inner.lock().await;
        inner
            .client
            .list_services()
            .await
            .map_err(reflection_support)
    }

    async fn find_symbol(
        &self,
        fully_qualified_name: &str,
    ) -> Result<SymbolDescriptor, SourceError> {
        let mut inner = self.inner.lock().await;
        if let Some(symbol) = find_symbol_in_pool(&inner.pool, fully_qualified_name) {
            return Ok(symbol);
        }

        let files = inner
            .client
            .file_containing_symbol(fully_qualified_name)
            .await
            .map_err(|err| match err.status() {
                Some(status) if status.code() == Code::NotFound => {
                    not_found("Symbol", fully_qualified_name)
                }
                _ => reflection_support(err),
            })?;
        add_files_to_pool(&mut inner.pool, files)?;

        find_symbol_in_pool(&inner.pool, fully_qualified_name)
            .ok_or_else(|| not_found("Symbol", fully_qualified_name))
    }

    async fn all_extensions_for_type(
        &self,
        type_name: &str,
    ) -> Result<Vec<ExtensionDescriptor>, SourceError> {
        let mut inner = self.inner.lock().await;
        let numbers = inner
            .client
            .all_extension_numbers_of_type(type_name)
            .await
            .map_err(reflection_support)?;

        // Resolve one extension at a time, preserving the server's order.
        let mut extensions = Vec::with_capacity(numbers.len());
        for number in numbers {
            if find_extension(&inner.pool, type_name, number).is_none() {
                let files = inner
                    .client
                    .file_containing_extension(type_name, number)
                    .await
                    .map_err(reflection_support)?;
                add_files_to_pool(&mut inner.pool, files)?;
            }
            let extension = find_extension(&inner.pool, type_name, number)
                .ok_or_else(|| not_found("Extension", format!("{type_name}({number})")))?;
            extensions.push(extension);
        }
        Ok(extensions)
    }
}

fn find_extension(
    pool: &DescriptorPool,
    type_name: &str,
    number: i32,
) -> Option<ExtensionDescriptor> {
    pool.all_extensions().find(|ext| {
        ext.containing_message().full_name() == type_name && ext.number() == number as u32
    })
}

/// Inserts the given files into the pool in dependency order, skipping files the
/// pool already holds. Reflection answers are self-contained, so every round must
/// place at least one file.
fn add_files_to_pool(
    pool: &mut DescriptorPool,
    files: Vec<FileDescriptorProto>,
) -> Result<(), SourceError> {
    let mut pending: Vec<FileDescriptorProto> = files
        .into_iter()
        .filter(|file| pool.get_file_by_name(file.name()).is_none())
        .collect();

    while !pending.is_empty() {
        let mut progressed = false;
        let mut rest = Vec::new();
        for proto in pending {
            let ready = proto
                .dependency
                .iter()
                .all(|dep| pool.get_file_by_name(dep).is_some());
            if ready {
                pool.add_file_descriptor_proto(proto)?;
                progressed = true;
            } else {
                rest.push(proto);
            }
        }
        if !progressed {
            // Nothing placeable: some import was never sent by the server.
            let file = rest.swap_remove(0);
            let dependency = file
                .dependency
                .iter()
                .find(|dep| pool.get_file_by_name(dep).is_none())
                .cloned()
                .unwrap_or_default();
            return Err(SourceError::MissingDependency {
                file: file.name().to_string(),
                dependency,
            });
        }
        pending = rest;
    }
    Ok(())
}

fn reflection_support(err: ReflectionResolveError) -> SourceError {
    match err.status() {
        Some(status) if status.code() == Code::Unimplemented => {
            SourceError::ReflectionNotSupported
        }
        _ => SourceError::Reflection(err),
    }
}
