//! # Metadata Codec
//!
//! Conversion between textual `"Name: Value"` headers and the gRPC metadata model.
//!
//! Header names are lowercased and trimmed; a missing colon yields an empty value.
//! Names ending in `-bin` carry binary values: on input they may be base64 encoded in
//! any common alphabet and are decoded leniently, on output they are re-encoded with
//! the padded standard alphabet.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use std::collections::BTreeSet;
use std::str::FromStr;
use tonic::metadata::errors::{InvalidMetadataKey, InvalidMetadataValue};
use tonic::metadata::{
    AsciiMetadataKey, BinaryMetadataKey, KeyRef, MetadataMap, MetadataValue,
};

#[derive(Debug, thiserror::Error)]
pub enum MetadataParseError {
    #[error("invalid metadata (header) key '{key}': '{source}'")]
    InvalidKey {
        key: String,
        #[source]
        source: InvalidMetadataKey,
    },
    #[error("invalid metadata (header) value for key '{key}': '{source}'")]
    InvalidValue {
        key: String,
        #[source]
        source: InvalidMetadataValue,
    },
}

/// Converts a list of header strings (each in `"Header-Name: Header-Value"` form)
/// into a metadata map. Empty strings are ignored; a name without a colon gets an
/// empty value. Binary headers (names ending in `-bin`) should be base64-encoded,
/// but values that cannot be decoded are used as-is.
pub fn metadata_from_headers(
    headers: &[impl AsRef<str>],
) -> Result<MetadataMap, MetadataParseError> {
    let mut metadata = MetadataMap::new();
    for header in headers {
        let header = header.as_ref();
        if header.is_empty() {
            continue;
        }
        let (name, value) = header.split_once(':').unwrap_or((header, ""));
        let name = name.trim().to_lowercase();
        let value = value.trim();

        if name.ends_with("-bin") {
            let bytes = decode_lenient(value).unwrap_or_else(|| value.as_bytes().to_vec());
            let key = BinaryMetadataKey::from_str(&name).map_err(|source| {
                MetadataParseError::InvalidKey {
                    key: name.clone(),
                    source,
                }
            })?;
            metadata.append_bin(key, MetadataValue::from_bytes(&bytes));
        } else {
            let key = AsciiMetadataKey::from_str(&name).map_err(|source| {
                MetadataParseError::InvalidKey {
                    key: name.clone(),
                    source,
                }
            })?;
            let value =
                MetadataValue::try_from(value).map_err(|source| MetadataParseError::InvalidValue {
                    key: name.clone(),
                    source,
                })?;
            metadata.append(key, value);
        }
    }
    Ok(metadata)
}

// We are lenient and accept any of the common flavors of base64 encoding.
fn decode_lenient(value: &str) -> Option<Vec<u8>> {
    for engine in [&STANDARD, &URL_SAFE, &STANDARD_NO_PAD, &URL_SAFE_NO_PAD] {
        if let Ok(bytes) = engine.decode(value) {
            return Some(bytes);
        }
    }
    None
}

/// Returns a string representation of the given metadata, for displaying to users.
///
/// Names are sorted ascending and each value is emitted on its own line as
/// `name: value`, preserving insertion order among values of the same name. Binary
/// values are base64-encoded. Empty metadata renders as `(empty)`.
pub fn metadata_to_string(metadata: &MetadataMap) -> String {
    if metadata.is_empty() {
        return "(empty)".to_string();
    }

    let names: BTreeSet<&str> = metadata
        .keys()
        .map(|key| match key {
            KeyRef::Ascii(key) => key.as_str(),
            KeyRef::Binary(key) => key.as_str(),
        })
        .collect();

    let mut lines = Vec::new();
    for name in names {
        if name.ends_with("-bin") {
            for value in metadata.get_all_bin(name).iter() {
                if let Ok(bytes) = value.to_bytes() {
                    lines.push(format!("{name}: {}", STANDARD.encode(&bytes)));
                }
            }
        } else {
            for value in metadata.get_all(name).iter() {
                lines.push(format!("{name}: {}", value.to_str().unwrap_or_default()));
            }
        }
    }
    lines.join("\n")
}
