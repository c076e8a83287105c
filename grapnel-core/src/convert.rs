//! # Dynamic Message Rehydration
//!
//! A message decoded before its extensions were known carries extension data as
//! unknown fields. Rebuilding it through an extension-aware [`MessageFactory`] makes
//! those fields visible again, which matters when rendering messages (custom options
//! in descriptors are the typical case).

use crate::extensions::{ExtensionRegistry, MessageFactory, fetch_all_extensions};
use crate::source::DescriptorSource;
use prost::Message;
use prost_reflect::{DynamicMessage, Kind, ReflectMessage, Value};
use std::collections::HashSet;

/// Uses the given descriptor source to download extensions for the given message
/// and returns a copy rebuilt through a factory that knows all of them. Best
/// effort: on any failure the original message is returned unchanged.
pub async fn ensure_extensions<D>(source: &D, message: &DynamicMessage) -> DynamicMessage
where
    D: DescriptorSource + ?Sized,
{
    let descriptor = message.descriptor();

    let mut registry = ExtensionRegistry::new();
    let mut fetched = HashSet::new();
    if fetch_all_extensions(source, &mut registry, &descriptor, &mut fetched)
        .await
        .is_err()
    {
        return message.clone();
    }

    // Bind the factory to the source's pool, which now holds every fetched
    // extension file.
    let pool = match source.find_symbol(descriptor.full_name()).await {
        Ok(symbol) => symbol.parent_file().parent_pool().clone(),
        Err(_) => return message.clone(),
    };
    let factory = MessageFactory::new(pool, registry);

    match fully_convert(&factory, message) {
        Ok(converted) => converted,
        Err(_) => message.clone(),
    }
}

/// Rebuilds `message` as a dynamic message of the factory's descriptor for the
/// same type, then recursively converts every message-typed field value (map
/// values, repeated elements, singular fields) so the whole tree is bound to the
/// factory's pool. Scalars, enums, and map keys are untouched. If the factory does
/// not know the root type the original is returned unchanged.
pub fn fully_convert(
    factory: &MessageFactory,
    message: &DynamicMessage,
) -> Result<DynamicMessage, prost::DecodeError> {
    let Some(mut converted) = factory.new_message(message.descriptor().full_name()) else {
        return Ok(message.clone());
    };
    converted.merge(message.encode_to_vec().as_slice())?;

    let descriptor = converted.descriptor();
    for field in descriptor.fields() {
        if !converted.has_field(&field) {
            continue;
        }
        if field.is_map() {
            let Kind::Message(entry) = field.kind() else {
                continue;
            };
            // Keys can't be messages; only map values need converting.
            if !matches!(entry.map_entry_value_field().kind(), Kind::Message(_)) {
                continue;
            }
            let mut value = converted.get_field(&field).into_owned();
            if let Value::Map(map) = &mut value {
                for entry_value in map.values_mut() {
                    if let Value::Message(nested) = entry_value {
                        *nested = fully_convert(factory, nested)?;
                    }
                }
            }
            converted.set_field(&field, value);
        } else if field.is_list() {
            if !matches!(field.kind(), Kind::Message(_)) {
                continue;
            }
            let mut value = converted.get_field(&field).into_owned();
            if let Value::List(elements) = &mut value {
                for element in elements {
                    if let Value::Message(nested) = element {
                        *nested = fully_convert(factory, nested)?;
                    }
                }
            }
            converted.set_field(&field, value);
        } else if matches!(field.kind(), Kind::Message(_)) {
            let mut value = converted.get_field(&field).into_owned();
            if let Value::Message(nested) = &mut value {
                *nested = fully_convert(factory, nested)?;
            }
            converted.set_field(&field, value);
        }
    }
    Ok(converted)
}
