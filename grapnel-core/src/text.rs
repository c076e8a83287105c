//! # Descriptor Text
//!
//! Proto-style rendering of resolved symbols, for displaying to users. The output is
//! a snippet resembling the source that would declare the element; it is not meant to
//! round-trip through a parser.

use crate::source::SymbolDescriptor;
use prost_reflect::{
    EnumDescriptor, ExtensionDescriptor, FieldDescriptor, Kind, MessageDescriptor,
    ServiceDescriptor,
};
use std::fmt::Write;

/// Returns a proto-style snippet describing the given symbol.
pub fn descriptor_text(symbol: &SymbolDescriptor) -> String {
    match symbol {
        SymbolDescriptor::Service(descriptor) => service_text(descriptor),
        SymbolDescriptor::Message(descriptor) => message_text(descriptor),
        SymbolDescriptor::Enum(descriptor) => enum_text(descriptor),
        SymbolDescriptor::Extension(descriptor) => extension_text(descriptor),
    }
}

fn service_text(service: &ServiceDescriptor) -> String {
    let mut out = format!("service {} {{\n", service.name());
    for method in service.methods() {
        let input_stream = if method.is_client_streaming() {
            "stream "
        } else {
            ""
        };
        let output_stream = if method.is_server_streaming() {
            "stream "
        } else {
            ""
        };
        let _ = writeln!(
            out,
            "  rpc {}({}{}) returns ({}{});",
            method.name(),
            input_stream,
            method.input().full_name(),
            output_stream,
            method.output().full_name()
        );
    }
    out.push('}');
    out
}

fn message_text(message: &MessageDescriptor) -> String {
    let mut out = format!("message {} {{\n", message.name());
    for field in message.fields() {
        let _ = writeln!(out, "  {}", field_text(&field));
    }
    out.push('}');
    out
}

fn field_text(field: &FieldDescriptor) -> String {
    if field.is_map() {
        if let Kind::Message(entry) = field.kind() {
            return format!(
                "map<{}, {}> {} = {};",
                kind_name(&entry.map_entry_key_field().kind()),
                kind_name(&entry.map_entry_value_field().kind()),
                field.name(),
                field.number()
            );
        }
    }
    let label = if field.is_list() { "repeated " } else { "" };
    format!(
        "{}{} {} = {};",
        label,
        kind_name(&field.kind()),
        field.name(),
        field.number()
    )
}

fn enum_text(descriptor: &EnumDescriptor) -> String {
    let mut out = format!("enum {} {{\n", descriptor.name());
    for value in descriptor.values() {
        let _ = writeln!(out, "  {} = {};", value.name(), value.number());
    }
    out.push('}');
    out
}

fn extension_text(extension: &ExtensionDescriptor) -> String {
    format!(
        "extend {} {{\n  {} {} = {};\n}}",
        extension.containing_message().full_name(),
        kind_name(&extension.kind()),
        extension.name(),
        extension.number()
    )
}

fn kind_name(kind: &Kind) -> String {
    match kind {
        Kind::Double => "double".to_string(),
        Kind::Float => "float".to_string(),
        Kind::Int32 => "int32".to_string(),
        Kind::Int64 => "int64".to_string(),
        Kind::Uint32 => "uint32".to_string(),
        Kind::Uint64 => "uint64".to_string(),
        Kind::Sint32 => "sint32".to_string(),
        Kind::Sint64 => "sint64".to_string(),
        Kind::Fixed32 => "fixed32".to_string(),
        Kind::Fixed64 => "fixed64".to_string(),
        Kind::Sfixed32 => "sfixed32".to_string(),
        Kind::Sfixed64 => "sfixed64".to_string(),
        Kind::Bool => "bool".to_string(),
        Kind::String => "string".to_string(),
        Kind::Bytes => "bytes".to_string(),
        Kind::Message(message) => message.full_name().to_string(),
        Kind::Enum(descriptor) => descriptor.full_name().to_string(),
    }
}
