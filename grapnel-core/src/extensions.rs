//! # Extension Discovery
//!
//! Extension fields are declared outside the message they extend, so a dynamic caller
//! has to collect them before it can parse or render messages faithfully. This module
//! provides:
//!
//! * [`ExtensionRegistry`]: the per-invocation record of every extension applicable to
//!   a message type.
//! * [`fetch_all_extensions`]: the collector that walks a message type and every
//!   nested message-typed field (transitively, cycles included) and asks a
//!   [`DescriptorSource`] for the extensions of each type that admits them.
//! * [`MessageFactory`]: allocates dynamic messages from the pool the invocation
//!   resolved its descriptors from, which after a fetch is aware of every collected
//!   extension.

use crate::source::{DescriptorSource, SourceError};
use prost_reflect::{DescriptorPool, DynamicMessage, ExtensionDescriptor, Kind, MessageDescriptor};
use std::collections::{HashMap, HashSet};

/// A failure while collecting extensions, naming the type whose query failed.
#[derive(Debug, thiserror::Error)]
#[error("error resolving extensions for message {type_name}: {source}")]
pub struct ExtensionFetchError {
    pub type_name: String,
    #[source]
    pub source: SourceError,
}

/// A mapping from extended-type name to the extension fields that apply to it.
///
/// Owned by a single invocation. Adding the same extension twice is a no-op, so
/// repeated fetches never enlarge the registry.
#[derive(Debug, Clone, Default)]
pub struct ExtensionRegistry {
    by_type: HashMap<String, Vec<ExtensionDescriptor>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an extension under the type it extends. Returns `false` when an
    /// extension with the same field number was already registered for that type.
    pub fn add(&mut self, extension: ExtensionDescriptor) -> bool {
        let entries = self
            .by_type
            .entry(extension.containing_message().full_name().to_string())
            .or_default();
        if entries.iter().any(|e| e.number() == extension.number()) {
            return false;
        }
        entries.push(extension);
        true
    }

    /// The extensions registered for the given extended-type name.
    pub fn for_type(&self, type_name: &str) -> &[ExtensionDescriptor] {
        self.by_type
            .get(type_name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Total number of registered extensions.
    pub fn len(&self) -> usize {
        self.by_type.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

/// Collects, into `registry`, every extension applicable to `message` and to the
/// types of its message fields, transitively. `fetched` memoizes visited type names
/// so recursive type graphs terminate; failures from the source propagate wrapped
/// with the offending type name.
pub async fn fetch_all_extensions<D>(
    source: &D,
    registry: &mut ExtensionRegistry,
    message: &MessageDescriptor,
    fetched: &mut HashSet<String>,
) -> Result<(), ExtensionFetchError>
where
    D: DescriptorSource + ?Sized,
{
    let mut pending = vec![message.clone()];
    while let Some(message) = pending.pop() {
        let type_name = message.full_name().to_string();
        if !fetched.insert(type_name.clone()) {
            continue;
        }
        if !message.descriptor_proto().extension_range.is_empty() {
            let extensions = source.all_extensions_for_type(&type_name).await.map_err(
                |source| ExtensionFetchError {
                    type_name: type_name.clone(),
                    source,
                },
            )?;
            for extension in extensions {
                registry.add(extension);
            }
        }
        for field in message.fields() {
            if let Kind::Message(nested) = field.kind() {
                pending.push(nested);
            }
        }
    }
    Ok(())
}

/// Creates dynamic messages from the pool an invocation resolved its descriptors
/// from. After [`fetch_all_extensions`] ran against the same source, that pool
/// recognizes every collected extension, so messages created (and decoded) through
/// it parse extension data instead of leaving it unknown.
#[derive(Debug, Clone)]
pub struct MessageFactory {
    pool: DescriptorPool,
    registry: ExtensionRegistry,
}

impl MessageFactory {
    pub fn new(pool: DescriptorPool, registry: ExtensionRegistry) -> Self {
        Self { pool, registry }
    }

    /// A new, empty dynamic message of the named type, or `None` when the pool does
    /// not know the type.
    pub fn new_message(&self, full_name: &str) -> Option<DynamicMessage> {
        self.pool
            .get_message_by_name(full_name)
            .map(DynamicMessage::new)
    }

    /// The extensions collected for this invocation.
    pub fn registry(&self) -> &ExtensionRegistry {
        &self.registry
    }

    /// The descriptor pool backing this factory.
    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }
}
