//! # Dynamic Stub
//!
//! A thin wrapper over `tonic::client::Grpc` that dispatches calls described by a
//! [`MethodDescriptor`] instead of generated client code.
//!
//! Only two primitives are exposed: single-request/streamed-response and
//! streamed-request/streamed-response. Both leave the response stream in the caller's
//! hands so headers, every message, and the trailers stay observable; unary-shaped
//! calls are the degenerate case of reading at most one message.
//!
//! # Error Handling
//!
//! The methods separate transport problems from RPC outcomes by returning
//! `Result<Result<T, Status>, StubError>`: the outer error means the request never
//! meaningfully left the client, the inner `Status` is the server's verdict.
use super::codec::DynamicCodec;
use crate::BoxError;
use futures_util::Stream;
use http_body::Body as HttpBody;
use prost_reflect::{DynamicMessage, MethodDescriptor};
use std::str::FromStr;
use tonic::client::{Grpc, GrpcService};
use tonic::metadata::MetadataMap;
use tonic::transport::Channel;
use tonic::{Extensions, Request, Response, Status, Streaming};

#[derive(Debug, thiserror::Error)]
pub enum StubError {
    #[error("the gRPC client was not ready: '{0}'")]
    NotReady(#[source] BoxError),
}

/// A dynamic gRPC stub over any tonic-compatible service.
pub struct DynamicStub<S = Channel> {
    inner: Grpc<S>,
}

impl<S> DynamicStub<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S) -> Self {
        Self {
            inner: Grpc::new(service),
        }
    }

    /// Sends a single request message and returns the response stream.
    pub async fn call_server_streaming(
        &mut self,
        method: &MethodDescriptor,
        request: DynamicMessage,
        metadata: MetadataMap,
    ) -> Result<Result<Response<Streaming<DynamicMessage>>, Status>, StubError> {
        self.inner
            .ready()
            .await
            .map_err(|e| StubError::NotReady(e.into()))?;

        let codec = DynamicCodec::new(method.input(), method.output());
        let request = Request::from_parts(metadata, Extensions::default(), request);
        Ok(self
            .inner
            .server_streaming(request, rpc_path(method), codec)
            .await)
    }

    /// Sends a stream of request messages and returns the response stream.
    pub async fn call_streaming(
        &mut self,
        method: &MethodDescriptor,
        requests: impl Stream<Item = DynamicMessage> + Send + 'static,
        metadata: MetadataMap,
    ) -> Result<Result<Response<Streaming<DynamicMessage>>, Status>, StubError> {
        self.inner
            .ready()
            .await
            .map_err(|e| StubError::NotReady(e.into()))?;

        let codec = DynamicCodec::new(method.input(), method.output());
        let request = Request::from_parts(metadata, Extensions::default(), requests);
        Ok(self.inner.streaming(request, rpc_path(method), codec).await)
    }
}

fn rpc_path(method: &MethodDescriptor) -> http::uri::PathAndQuery {
    let path = format!("/{}/{}", method.parent_service().full_name(), method.name());
    http::uri::PathAndQuery::from_str(&path).expect("valid gRPC path")
}
