//! # Reflection Client
//!
//! This module provides a client implementation for the gRPC Server Reflection Protocol
//! (`grpc.reflection.v1alpha`).
//!
//! The [`ReflectionClient`] is capable of:
//!
//! 1. **Listing Services**: Querying the server for all exposed service names.
//! 2. **Symbol Resolution**: Fetching the `FileDescriptorProto`s for a specific symbol
//!    (Service or Message) or file name.
//! 3. **Extension Discovery**: Querying the extension numbers registered for a message
//!    type and fetching the files that declare them.
//! 4. **Dependency Management**: Automatically identifying missing imports in a file
//!    descriptor and recursively fetching them from the server, so every answer is
//!    self-contained.
//!
//! ## References
//!
//! * [gRPC Server Reflection Protocol](https://github.com/grpc/grpc/blob/master/doc/server-reflection.md)
use crate::BoxError;
use futures_util::stream::once;
use http_body::Body as HttpBody;
use prost::Message;
use prost_types::FileDescriptorProto;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tonic::{Streaming, client::GrpcService};
use tonic_reflection::pb::v1alpha::{
    ExtensionRequest, ServerReflectionRequest, ServerReflectionResponse,
    server_reflection_client::ServerReflectionClient, server_reflection_request::MessageRequest,
    server_reflection_response::MessageResponse,
};

/// Errors that can occur during reflection resolution.
#[derive(Debug, thiserror::Error)]
pub enum ReflectionResolveError {
    #[error(
        "failed to start a stream request with the reflection server, reflection might not be supported: '{0}'"
    )]
    ServerStreamInitFailed(#[source] tonic::Status),

    #[error("the server stream returned an error status: '{0}'")]
    ServerStreamFailure(#[source] tonic::Status),

    #[error("reflection stream closed unexpectedly")]
    StreamClosed,

    #[error("internal error: failed to send request to stream")]
    SendFailed,

    #[error("server returned reflection error code {code}: {message}")]
    ServerError { code: i32, message: String },

    #[error("protocol error: received unexpected response type: {0}")]
    UnexpectedResponseType(String),

    #[error("failed to decode FileDescriptorProto: {0}")]
    DecodeError(#[from] prost::DecodeError),
}

impl ReflectionResolveError {
    /// The gRPC status carried by this error, when the failure came from the
    /// server rather than from the protocol layer.
    pub fn status(&self) -> Option<&tonic::Status> {
        match self {
            ReflectionResolveError::ServerStreamInitFailed(status)
            | ReflectionResolveError::ServerStreamFailure(status) => Some(status),
            _ => None,
        }
    }
}

// The host defined in the reflection requests doesn't seem to be a mandatory field
// and there is no documentation about what it is about.
// So we won't enforce it from the user.
const EMPTY_HOST: &str = "";

/// A client for interacting with the gRPC Server Reflection Service.
pub struct ReflectionClient<T = Channel> {
    client: ServerReflectionClient<T>,
}

impl<S> ReflectionClient<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    /// Creates a new `ReflectionClient` using the provided gRPC service (e.g., a `Channel`).
    pub fn new(channel: S) -> Self {
        let client = ServerReflectionClient::new(channel);
        Self { client }
    }

    /// Lists all services exposed by the server.
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<String>)` - Fully qualified service names (e.g. `helloworld.Greeter`).
    /// * `Err(ReflectionResolveError)` - If the server doesn't support reflection or a
    ///   protocol error occurs.
    pub async fn list_services(&mut self) -> Result<Vec<String>, ReflectionResolveError> {
        let response = self
            .single_request(MessageRequest::ListServices(String::new()))
            .await?;

        match response {
            MessageResponse::ListServicesResponse(resp) => {
                Ok(resp.service.into_iter().map(|s| s.name).collect())
            }
            other => Err(unexpected(other)),
        }
    }

    /// Fetches the file that defines the given symbol, together with every
    /// transitive dependency the server has not already supplied in the answer.
    ///
    /// # Arguments
    ///
    /// * `symbol` - The fully qualified symbol name to resolve
    ///   (e.g., `my.package.MyService`, `my.package.Message`).
    pub async fn file_containing_symbol(
        &mut self,
        symbol: &str,
    ) -> Result<Vec<FileDescriptorProto>, ReflectionResolveError> {
        tracing::debug!(symbol, "requesting file containing symbol");
        self.fetch_files(MessageRequest::FileContainingSymbol(symbol.to_string()))
            .await
    }

    /// Fetches the named file and its transitive dependencies.
    pub async fn file_by_filename(
        &mut self,
        filename: &str,
    ) -> Result<Vec<FileDescriptorProto>, ReflectionResolveError> {
        tracing::debug!(filename, "requesting file by name");
        self.fetch_files(MessageRequest::FileByFilename(filename.to_string()))
            .await
    }

    /// Fetches the file that declares the extension with the given field number on
    /// the given extended type, together with its transitive dependencies.
    pub async fn file_containing_extension(
        &mut self,
        type_name: &str,
        extension_number: i32,
    ) -> Result<Vec<FileDescriptorProto>, ReflectionResolveError> {
        tracing::debug!(
            type_name,
            extension_number,
            "requesting file containing extension"
        );
        self.fetch_files(MessageRequest::FileContainingExtension(ExtensionRequest {
            containing_type: type_name.to_string(),
            extension_number,
        }))
        .await
    }

    /// Returns the extension field numbers the server knows for the given extended
    /// message type, in the order the server reports them.
    pub async fn all_extension_numbers_of_type(
        &mut self,
        type_name: &str,
    ) -> Result<Vec<i32>, ReflectionResolveError> {
        let response = self
            .single_request(MessageRequest::AllExtensionNumbersOfType(
                type_name.to_string(),
            ))
            .await?;

        match response {
            MessageResponse::AllExtensionNumbersResponse(resp) => Ok(resp.extension_number),
            other => Err(unexpected(other)),
        }
    }

    /// Performs a one-shot reflection exchange: a single request, a single response.
    async fn single_request(
        &mut self,
        request: MessageRequest,
    ) -> Result<MessageResponse, ReflectionResolveError> {
        let req = ServerReflectionRequest {
            host: EMPTY_HOST.to_string(),
            message_request: Some(request),
        };

        let mut response_stream = self
            .client
            .server_reflection_info(once(async { req }))
            .await
            .map_err(ReflectionResolveError::ServerStreamInitFailed)?
            .into_inner();

        let response = response_stream
            .message()
            .await
            .map_err(ReflectionResolveError::ServerStreamFailure)?
            .ok_or(ReflectionResolveError::StreamClosed)?;

        match response.message_response {
            Some(MessageResponse::ErrorResponse(e)) => Err(ReflectionResolveError::ServerError {
                code: e.error_code,
                message: e.error_message,
            }),
            Some(other) => Ok(other),
            None => Err(ReflectionResolveError::UnexpectedResponseType(
                "Empty Message".into(),
            )),
        }
    }

    /// Opens a reflection stream, issues the initial request, and drains file
    /// descriptor responses until every discovered dependency has been fetched.
    async fn fetch_files(
        &mut self,
        initial: MessageRequest,
    ) -> Result<Vec<FileDescriptorProto>, ReflectionResolveError> {
        let (tx, rx) = mpsc::channel(100);

        let mut response_stream = self
            .client
            .server_reflection_info(ReceiverStream::new(rx))
            .await
            .map_err(ReflectionResolveError::ServerStreamInitFailed)?
            .into_inner();

        let req = ServerReflectionRequest {
            host: EMPTY_HOST.to_string(),
            message_request: Some(initial),
        };

        tx.send(req)
            .await
            .map_err(|_| ReflectionResolveError::SendFailed)?;

        let file_map = collect_descriptors(&mut response_stream, tx).await?;

        Ok(file_map.into_values().collect())
    }
}

/// Drains the reflection stream until the initial answer and every transitively
/// imported file has arrived. A batch may reference imports the server did not
/// include; those are requested through `requests` and counted as outstanding.
async fn collect_descriptors(
    responses: &mut Streaming<ServerReflectionResponse>,
    requests: mpsc::Sender<ServerReflectionRequest>,
) -> Result<HashMap<String, FileDescriptorProto>, ReflectionResolveError> {
    let mut outstanding = 1usize;
    let mut collected: HashMap<String, FileDescriptorProto> = HashMap::new();
    let mut requested: HashSet<String> = HashSet::new();

    while outstanding > 0 {
        let response = responses
            .message()
            .await
            .map_err(ReflectionResolveError::ServerStreamFailure)?
            .ok_or(ReflectionResolveError::StreamClosed)?;

        outstanding -= 1;

        let batch = match response.message_response {
            Some(MessageResponse::FileDescriptorResponse(res)) => res.file_descriptor_proto,
            Some(MessageResponse::ErrorResponse(e)) => {
                return Err(ReflectionResolveError::ServerError {
                    message: e.error_message,
                    code: e.error_code,
                });
            }
            Some(other) => return Err(unexpected(other)),
            None => {
                return Err(ReflectionResolveError::UnexpectedResponseType(
                    "Empty Message".into(),
                ));
            }
        };

        for raw in batch {
            let file = FileDescriptorProto::decode(raw.as_ref())?;
            let Some(name) = file.name.clone() else {
                continue;
            };
            if collected.contains_key(&name) {
                continue;
            }

            // Ask for any import the server has not already handed us.
            for import in &file.dependency {
                if collected.contains_key(import) || !requested.insert(import.clone()) {
                    continue;
                }
                let request = ServerReflectionRequest {
                    host: EMPTY_HOST.to_string(),
                    message_request: Some(MessageRequest::FileByFilename(import.clone())),
                };
                requests
                    .send(request)
                    .await
                    .map_err(|_| ReflectionResolveError::SendFailed)?;
                outstanding += 1;
            }

            collected.insert(name, file);
        }
    }

    Ok(collected)
}

fn unexpected(response: MessageResponse) -> ReflectionResolveError {
    ReflectionResolveError::UnexpectedResponseType(format!("{response:?}"))
}
