//! # Descriptor Sources
//!
//! A [`DescriptorSource`] is a source of Protobuf descriptor information. It can be
//! backed by compiled descriptor files ([`FileSource`]) or by a remote server that
//! exposes the gRPC reflection API ([`ServerSource`]).
//!
//! Both implementations answer three questions:
//!
//! 1. **Which services exist?** ([`DescriptorSource::list_services`])
//! 2. **What is this symbol?** ([`DescriptorSource::find_symbol`])
//! 3. **Which extensions apply to this message type?**
//!    ([`DescriptorSource::all_extensions_for_type`])
//!
//! Sources that know their complete file set additionally expose it through the
//! [`FileEnumerator`] capability, which callers probe at runtime via
//! [`DescriptorSource::as_file_enumerator`]. The module-level collectors
//! ([`list_services`], [`get_all_files`], [`list_methods`]) work against any source and
//! return deterministically ordered results.

mod file;
mod server;

pub use file::FileSource;
pub use server::ServerSource;

use crate::reflection::ReflectionResolveError;
use async_trait::async_trait;
use prost_reflect::{
    EnumDescriptor, ExtensionDescriptor, FileDescriptor, MessageDescriptor, ServiceDescriptor,
};
use std::collections::HashMap;
use std::path::PathBuf;

/// Errors produced while constructing or querying a descriptor source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// The peer answered a reflection call with `Unimplemented`. An alternate
    /// source (like compiled descriptor sets) must be used.
    #[error("server does not support the reflection API")]
    ReflectionNotSupported,

    #[error("file {file} imports {dependency}, which is missing from the given descriptors")]
    MissingDependency { file: String, dependency: String },

    #[error("given files include multiple copies of {0}")]
    DuplicateFile(String),

    #[error("could not load descriptor set file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse contents of descriptor set file {path}: {source}")]
    ParseFile {
        path: PathBuf,
        #[source]
        source: prost::DecodeError,
    },

    #[error("could not decode file descriptor set: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("could not compile the given proto sources: {0}")]
    Compile(#[from] protox::Error),

    #[error("invalid descriptors: {0}")]
    Descriptor(#[from] prost_reflect::DescriptorError),

    #[error("reflection request failed: {0}")]
    Reflection(#[from] ReflectionResolveError),
}

pub(crate) fn not_found(kind: &'static str, name: impl Into<String>) -> SourceError {
    SourceError::NotFound {
        kind,
        name: name.into(),
    }
}

impl SourceError {
    /// Returns `true` for lookup failures, as opposed to construction or
    /// transport problems.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SourceError::NotFound { .. })
    }
}

/// A generic wrapper for the descriptor kinds a symbol lookup can produce.
///
/// This enum allows a source to return a single type when resolving symbols,
/// regardless of whether the symbol names a service, a message, an enum, or an
/// extension field.
#[derive(Debug, Clone)]
pub enum SymbolDescriptor {
    Service(ServiceDescriptor),
    Message(MessageDescriptor),
    Enum(EnumDescriptor),
    Extension(ExtensionDescriptor),
}

impl SymbolDescriptor {
    /// The fully qualified name of the wrapped symbol.
    pub fn full_name(&self) -> &str {
        match self {
            SymbolDescriptor::Service(d) => d.full_name(),
            SymbolDescriptor::Message(d) => d.full_name(),
            SymbolDescriptor::Enum(d) => d.full_name(),
            SymbolDescriptor::Extension(d) => d.full_name(),
        }
    }

    /// The file that declares the wrapped symbol.
    pub fn parent_file(&self) -> FileDescriptor {
        match self {
            SymbolDescriptor::Service(d) => d.parent_file(),
            SymbolDescriptor::Message(d) => d.parent_file(),
            SymbolDescriptor::Enum(d) => d.parent_file(),
            SymbolDescriptor::Extension(d) => d.parent_file(),
        }
    }

    /// Returns the inner [`ServiceDescriptor`] if this symbol is a service.
    pub fn as_service(&self) -> Option<&ServiceDescriptor> {
        match self {
            SymbolDescriptor::Service(d) => Some(d),
            _ => None,
        }
    }

    /// Returns the inner [`MessageDescriptor`] if this symbol is a message.
    pub fn as_message(&self) -> Option<&MessageDescriptor> {
        match self {
            SymbolDescriptor::Message(d) => Some(d),
            _ => None,
        }
    }

    /// Returns the inner [`EnumDescriptor`] if this symbol is an enum.
    pub fn as_enum(&self) -> Option<&EnumDescriptor> {
        match self {
            SymbolDescriptor::Enum(d) => Some(d),
            _ => None,
        }
    }

    /// Returns the inner [`ExtensionDescriptor`] if this symbol is an extension field.
    pub fn as_extension(&self) -> Option<&ExtensionDescriptor> {
        match self {
            SymbolDescriptor::Extension(d) => Some(d),
            _ => None,
        }
    }
}

/// A source of Protobuf descriptor information.
///
/// Implementations may resolve symbols locally or over the network; either way the
/// operations are async and the source is shareable across tasks.
#[async_trait]
pub trait DescriptorSource: Send + Sync {
    /// Returns the fully-qualified names of every known service, in no particular
    /// order. Use the [`list_services`] collector for sorted output.
    async fn list_services(&self) -> Result<Vec<String>, SourceError>;

    /// Returns a descriptor for the given fully-qualified symbol name.
    async fn find_symbol(
        &self,
        fully_qualified_name: &str,
    ) -> Result<SymbolDescriptor, SourceError>;

    /// Returns every known extension field that extends the given message type name.
    /// The result is empty when no extensions apply.
    async fn all_extensions_for_type(
        &self,
        type_name: &str,
    ) -> Result<Vec<ExtensionDescriptor>, SourceError>;

    /// Probes for the optional file-enumeration capability. Sources that know their
    /// complete file universe return `Some`; the default answer is `None`, in which
    /// case [`get_all_files`] falls back to walking the dependency closure of every
    /// service's file.
    fn as_file_enumerator(&self) -> Option<&dyn FileEnumerator> {
        None
    }
}

/// Optional capability of a [`DescriptorSource`]: direct enumeration of all
/// underlying file descriptors. This is more thorough and more efficient than the
/// fallback strategy used by [`get_all_files`].
pub trait FileEnumerator {
    fn all_files(&self) -> Vec<FileDescriptor>;
}

/// Uses the given descriptor source to return a sorted list of fully-qualified
/// service names.
pub async fn list_services<D>(source: &D) -> Result<Vec<String>, SourceError>
where
    D: DescriptorSource + ?Sized,
{
    let mut services = source.list_services().await?;
    services.sort();
    Ok(services)
}

/// Uses the given descriptor source to return a list of file descriptors, sorted
/// by file name.
///
/// If the source exposes the [`FileEnumerator`] capability the answer comes from
/// there; otherwise every service is looked up and the dependency closure of its
/// owning file is collected.
pub async fn get_all_files<D>(source: &D) -> Result<Vec<FileDescriptor>, SourceError>
where
    D: DescriptorSource + ?Sized,
{
    let mut files = match source.as_file_enumerator() {
        Some(enumerator) => enumerator.all_files(),
        None => {
            // Source does not enumerate files directly, so list the services and
            // grab the files from there.
            let mut all = HashMap::new();
            for name in source.list_services().await? {
                let symbol = source.find_symbol(&name).await?;
                add_file_and_dependencies(symbol.parent_file(), &mut all);
            }
            all.into_values().collect()
        }
    };
    files.sort_by(|a, b| a.name().cmp(b.name()));
    Ok(files)
}

fn add_file_and_dependencies(file: FileDescriptor, all: &mut HashMap<String, FileDescriptor>) {
    let mut pending = vec![file];
    while let Some(file) = pending.pop() {
        if all.contains_key(file.name()) {
            // already collected
            continue;
        }
        pending.extend(file.dependencies());
        all.insert(file.name().to_string(), file);
    }
}

/// Uses the given descriptor source to return a sorted list of method names for
/// the specified fully-qualified service name.
pub async fn list_methods<D>(source: &D, service_name: &str) -> Result<Vec<String>, SourceError>
where
    D: DescriptorSource + ?Sized,
{
    let symbol = source.find_symbol(service_name).await?;
    let service = symbol
        .as_service()
        .ok_or_else(|| not_found("Service", service_name))?;
    let mut methods: Vec<String> = service.methods().map(|m| m.name().to_string()).collect();
    methods.sort();
    Ok(methods)
}
