//! # Dynamic Message Codec
//!
//! A `tonic::codec::Codec` for `prost-reflect` dynamic messages.
//!
//! Tonic's stock codec works with compile-time generated types; this one carries the
//! request and response [`MessageDescriptor`]s resolved at runtime, so a single codec
//! type serves every method the engine can invoke.
use prost::Message;
use prost_reflect::{DynamicMessage, MessageDescriptor, ReflectMessage};
use tonic::{
    Status,
    codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder},
};

/// A codec that moves [`DynamicMessage`] values over the wire, driven by the
/// descriptors of one method's input and output types.
pub struct DynamicCodec {
    input: MessageDescriptor,
    output: MessageDescriptor,
}

impl DynamicCodec {
    /// Creates a codec for one method.
    ///
    /// # Arguments
    /// * `input` - Descriptor for the request message type.
    /// * `output` - Descriptor for the response message type.
    pub fn new(input: MessageDescriptor, output: MessageDescriptor) -> Self {
        Self { input, output }
    }
}

impl Codec for DynamicCodec {
    type Encode = DynamicMessage;
    type Decode = DynamicMessage;

    type Encoder = DynamicEncoder;
    type Decoder = DynamicDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        DynamicEncoder(self.input.clone())
    }

    fn decoder(&mut self) -> Self::Decoder {
        DynamicDecoder(self.output.clone())
    }
}

/// Serializes a dynamic message into the Protobuf wire format.
pub struct DynamicEncoder(MessageDescriptor);

impl Encoder for DynamicEncoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        if item.descriptor() != self.0 {
            return Err(Status::internal(format!(
                "request message is a {}, method expects a {}",
                item.descriptor().full_name(),
                self.0.full_name()
            )));
        }
        item.encode(dst)
            .map_err(|e| Status::internal(format!("failed to encode request message: {e}")))
    }
}

/// Deserializes Protobuf wire bytes into a dynamic message of the response type.
pub struct DynamicDecoder(MessageDescriptor);

impl Decoder for DynamicDecoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let message = DynamicMessage::decode(self.0.clone(), src)
            .map_err(|e| Status::internal(format!("failed to decode response message: {e}")))?;
        Ok(Some(message))
    }
}
