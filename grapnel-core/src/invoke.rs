//! # Invocation Engine
//!
//! [`invoke_rpc`] executes one RPC of any cardinality against a dynamic stub, driven
//! entirely by runtime descriptors. The caller supplies request data through a
//! [`RequestSupplier`] and observes progress through an [`InvocationEventHandler`],
//! whose callbacks fire in a fixed order for every cardinality:
//!
//! 1. [`on_resolve_method`](InvocationEventHandler::on_resolve_method): right after lookup.
//! 2. [`on_send_headers`](InvocationEventHandler::on_send_headers): just before dispatch.
//! 3. [`on_receive_headers`](InvocationEventHandler::on_receive_headers): when response
//!    headers arrive (skipped if they never do).
//! 4. [`on_receive_response`](InvocationEventHandler::on_receive_response): once per
//!    received message; for single-response cardinalities at most once, and only on an
//!    OK outcome.
//! 5. [`on_receive_trailers`](InvocationEventHandler::on_receive_trailers): exactly once,
//!    terminal.
//!
//! Server verdicts, OK or not, always reach the handler through the trailers
//! callback and the invocation itself returns `Ok(())`. Failures that prevent a
//! verdict (local usage errors, transport breakdowns) are returned as [`InvokeError`]
//! and the handler sees no trailers.
//!
//! If the request supplier and the event handler coordinate or share any state, they
//! should be thread-safe: for bidirectional calls the supplier runs on a separate send
//! task while the handler stays on the calling task. The engine always joins that send
//! task before returning.

use crate::BoxError;
use crate::extensions::{
    ExtensionFetchError, ExtensionRegistry, MessageFactory, fetch_all_extensions,
};
use crate::grpc::stub::{DynamicStub, StubError};
use crate::metadata::{MetadataParseError, metadata_from_headers};
use crate::source::{DescriptorSource, SourceError};
use http_body::Body as HttpBody;
use prost_reflect::{DynamicMessage, MethodDescriptor};
use std::collections::HashSet;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::client::GrpcService;
use tonic::metadata::MetadataMap;
use tonic::{Code, Response, Status, Streaming};

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("given method name '{0}' is not in expected format: 'service/method' or 'service.method'")]
    MalformedMethodName(String),

    #[error("target server does not expose service '{0}'")]
    ServiceNotFound(String),

    #[error("failed to query for service descriptor '{service}': {source}")]
    ServiceLookupFailed {
        service: String,
        #[source]
        source: SourceError,
    },

    #[error("service '{service}' does not include a method named '{method}'")]
    MethodNotFound { service: String, method: String },

    #[error(transparent)]
    ExtensionResolution(#[from] ExtensionFetchError),

    #[error(transparent)]
    Metadata(#[from] MetadataParseError),

    #[error("method '{method}' accepts exactly one request message, but the supplier produced more than one")]
    TooManyRequestMessages { method: String },

    #[error("error getting request data: {0}")]
    RequestSupplierFailed(#[source] BoxError),

    #[error("gRPC call for '{method}' failed: {source}")]
    TransportFailure {
        method: String,
        #[source]
        source: BoxError,
    },
}

/// Outcome of one [`RequestSupplier`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Supply {
    /// The supplier populated the message.
    Message,
    /// The supplier has no more messages. It must not have touched the message.
    Eof,
}

/// Supplies request messages for an invocation.
///
/// The engine allocates each message from the invocation's extension-aware factory
/// and hands it to [`supply`](RequestSupplier::supply) to populate. Returning
/// [`Supply::Eof`] ends the request stream; any error is a hard local failure that
/// aborts the invocation.
pub trait RequestSupplier: Send {
    fn supply(&mut self, message: &mut DynamicMessage) -> Result<Supply, BoxError>;
}

impl<F> RequestSupplier for F
where
    F: FnMut(&mut DynamicMessage) -> Result<Supply, BoxError> + Send,
{
    fn supply(&mut self, message: &mut DynamicMessage) -> Result<Supply, BoxError> {
        self(message)
    }
}

/// A bag of callbacks for observing the course of one invocation. See the module
/// documentation for the event order contract.
pub trait InvocationEventHandler {
    /// Called with the descriptor of the method that is being invoked.
    fn on_resolve_method(&mut self, method: &MethodDescriptor);
    /// Called with the request metadata that is being sent.
    fn on_send_headers(&mut self, metadata: &MetadataMap);
    /// Called when response headers have been received.
    fn on_receive_headers(&mut self, metadata: &MetadataMap);
    /// Called for each response message received.
    fn on_receive_response(&mut self, response: &DynamicMessage);
    /// Called when response trailers and the final RPC status have been received.
    fn on_receive_trailers(&mut self, status: &Status, trailers: &MetadataMap);
}

/// Splits a method name into service and method halves.
///
/// The canonical form is `fully.qualified.Service/Method`; the legacy form uses a
/// dot. Either way the split happens at the *last* occurrence of the delimiter
/// (method names cannot contain dots, so the last dot is unambiguous in practice).
pub fn parse_method_name(name: &str) -> Result<(&str, &str), InvokeError> {
    let (service, method) = match name.rfind('/') {
        Some(pos) => (&name[..pos], &name[pos + 1..]),
        None => match name.rfind('.') {
            Some(pos) => (&name[..pos], &name[pos + 1..]),
            None => ("", ""),
        },
    };
    if service.is_empty() || method.is_empty() {
        return Err(InvokeError::MalformedMethodName(name.to_string()));
    }
    Ok((service, method))
}

/// Resolves `service`/`method` against the source, distinguishing an unknown
/// service, a symbol of the wrong kind, a lookup failure, and an unknown method.
pub async fn resolve_method<D>(
    source: &D,
    service: &str,
    method: &str,
) -> Result<MethodDescriptor, InvokeError>
where
    D: DescriptorSource + ?Sized,
{
    let symbol = source.find_symbol(service).await.map_err(|err| {
        if err.is_not_found() {
            InvokeError::ServiceNotFound(service.to_string())
        } else {
            InvokeError::ServiceLookupFailed {
                service: service.to_string(),
                source: err,
            }
        }
    })?;
    let descriptor = symbol
        .as_service()
        .ok_or_else(|| InvokeError::ServiceNotFound(service.to_string()))?;
    descriptor
        .methods()
        .find(|m| m.name() == method)
        .ok_or_else(|| InvokeError::MethodNotFound {
            service: service.to_string(),
            method: method.to_string(),
        })
}

/// Invokes the named method over the given channel.
///
/// The descriptor source determines the method's shape and supplies every
/// applicable extension before dispatch. `headers` are parsed into request
/// metadata ([`crate::metadata::metadata_from_headers`]). The handler and
/// supplier implement the contracts described at the module level.
pub async fn invoke_rpc<D, S, R>(
    source: &D,
    channel: S,
    method_name: &str,
    headers: &[impl AsRef<str>],
    handler: &mut dyn InvocationEventHandler,
    supplier: R,
) -> Result<(), InvokeError>
where
    D: DescriptorSource + ?Sized,
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
    R: RequestSupplier + 'static,
{
    let metadata = metadata_from_headers(headers)?;
    let (service, method_name) = parse_method_name(method_name)?;
    let method = resolve_method(source, service, method_name).await?;

    handler.on_resolve_method(&method);

    // Download any applicable extensions so request and response data parse fully.
    let mut registry = ExtensionRegistry::new();
    let mut fetched = HashSet::new();
    fetch_all_extensions(source, &mut registry, &method.input(), &mut fetched).await?;
    fetch_all_extensions(source, &mut registry, &method.output(), &mut fetched).await?;

    // Re-resolve: descriptors are snapshots of their pool, and for a lazy source the
    // fetch above may have grown it. The fresh descriptors see every extension file.
    let method = resolve_method(source, service, method_name).await?;
    let factory = MessageFactory::new(method.parent_pool().clone(), registry);

    tracing::debug!(method = method.full_name(), "invoking RPC");

    let mut stub = DynamicStub::new(channel);
    match (method.is_client_streaming(), method.is_server_streaming()) {
        (false, false) => invoke_unary(&mut stub, &method, &factory, handler, supplier, metadata).await,
        (false, true) => {
            invoke_server_streaming(&mut stub, &method, &factory, handler, supplier, metadata).await
        }
        (true, false) => {
            invoke_client_streaming(&mut stub, &method, &factory, handler, supplier, metadata).await
        }
        (true, true) => invoke_bidi(&mut stub, &method, &factory, handler, supplier, metadata).await,
    }
}

async fn invoke_unary<S, R>(
    stub: &mut DynamicStub<S>,
    method: &MethodDescriptor,
    factory: &MessageFactory,
    handler: &mut dyn InvocationEventHandler,
    mut supplier: R,
    metadata: MetadataMap,
) -> Result<(), InvokeError>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
    R: RequestSupplier,
{
    let request = take_single_request(&mut supplier, factory, method)?;
    handler.on_send_headers(&metadata);
    let outcome = stub
        .call_server_streaming(method, request, metadata)
        .await
        .map_err(|e| transport_failure(method, e))?;
    finish_single_response(outcome, handler).await
}

async fn invoke_server_streaming<S, R>(
    stub: &mut DynamicStub<S>,
    method: &MethodDescriptor,
    factory: &MessageFactory,
    handler: &mut dyn InvocationEventHandler,
    mut supplier: R,
    metadata: MetadataMap,
) -> Result<(), InvokeError>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
    R: RequestSupplier,
{
    let request = take_single_request(&mut supplier, factory, method)?;
    handler.on_send_headers(&metadata);
    let outcome = stub
        .call_server_streaming(method, request, metadata)
        .await
        .map_err(|e| transport_failure(method, e))?;

    match outcome {
        Err(status) => {
            handler.on_receive_trailers(&status, status.metadata());
            Ok(())
        }
        Ok(response) => {
            let (headers, mut stream, _) = response.into_parts();
            handler.on_receive_headers(&headers);
            let status = receive_all(&mut stream, handler).await;
            let trailers = final_trailers(&mut stream, &status).await;
            handler.on_receive_trailers(&status, &trailers);
            Ok(())
        }
    }
}

async fn invoke_client_streaming<S, R>(
    stub: &mut DynamicStub<S>,
    method: &MethodDescriptor,
    factory: &MessageFactory,
    handler: &mut dyn InvocationEventHandler,
    supplier: R,
    metadata: MetadataMap,
) -> Result<(), InvokeError>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
    R: RequestSupplier,
{
    handler.on_send_headers(&metadata);
    let (tx, rx) = mpsc::channel(1);
    let call = stub.call_streaming(method, ReceiverStream::new(rx), metadata);
    tokio::pin!(call);

    // Upload runs cooperatively with the call future on this task: the call only
    // makes progress while polled, and the channel send only succeeds while the
    // call is consuming.
    let feed = feed_requests(factory.clone(), method.clone(), supplier, tx);
    tokio::pin!(feed);

    enum First {
        Call(Result<Result<Response<Streaming<DynamicMessage>>, Status>, StubError>),
        Feed(Result<(), InvokeError>),
    }

    let first = tokio::select! {
        result = &mut call => First::Call(result),
        fed = &mut feed => First::Feed(fed),
    };
    let outcome = match first {
        // A hard supplier failure: dropping the call cancels the RPC; no trailers.
        First::Feed(Err(error)) => return Err(error),
        First::Feed(Ok(())) => call.await,
        First::Call(result) => result,
    }
    .map_err(|e| transport_failure(method, e))?;

    finish_single_response(outcome, handler).await
}

async fn invoke_bidi<S, R>(
    stub: &mut DynamicStub<S>,
    method: &MethodDescriptor,
    factory: &MessageFactory,
    handler: &mut dyn InvocationEventHandler,
    supplier: R,
    metadata: MetadataMap,
) -> Result<(), InvokeError>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
    R: RequestSupplier + 'static,
{
    handler.on_send_headers(&metadata);
    let (tx, rx) = mpsc::channel(1);

    // Upload concurrently on a dedicated task; the handler stays on this task.
    let send_task = tokio::spawn(feed_requests(factory.clone(), method.clone(), supplier, tx));

    let recv_outcome = match stub
        .call_streaming(method, ReceiverStream::new(rx), metadata)
        .await
    {
        Err(stub_error) => Err(transport_failure(method, stub_error)),
        Ok(Err(status)) => {
            let trailers = status.metadata().clone();
            Ok((status, trailers))
        }
        Ok(Ok(response)) => {
            let (headers, mut stream, _) = response.into_parts();
            handler.on_receive_headers(&headers);
            let status = receive_all(&mut stream, handler).await;
            let trailers = final_trailers(&mut stream, &status).await;
            Ok((status, trailers))
        }
    };

    // Join the send side before settling the outcome. Its error only stands in
    // when the receive side shut down cleanly.
    let send_result = match send_task.await {
        Ok(result) => result,
        Err(join_error) => Err(InvokeError::RequestSupplierFailed(Box::new(join_error))),
    };

    let (status, trailers) = recv_outcome?;
    if status.code() == Code::Ok
        && let Err(error) = send_result
    {
        return Err(error);
    }
    handler.on_receive_trailers(&status, &trailers);
    Ok(())
}

/// The supplier→send loop shared by client-streaming and bidi calls. Ends by
/// dropping the sender, which half-closes the request stream; a failed channel
/// send means the server went away, and the call result carries the
/// authoritative status.
async fn feed_requests<R>(
    factory: MessageFactory,
    method: MethodDescriptor,
    mut supplier: R,
    tx: mpsc::Sender<DynamicMessage>,
) -> Result<(), InvokeError>
where
    R: RequestSupplier,
{
    loop {
        let mut message = new_request(&factory, &method);
        match supplier
            .supply(&mut message)
            .map_err(InvokeError::RequestSupplierFailed)?
        {
            Supply::Eof => return Ok(()),
            Supply::Message => {
                if tx.send(message).await.is_err() {
                    return Ok(());
                }
            }
        }
    }
}

/// Pre-send discipline for single-request cardinalities: one supplier call, an
/// empty message when it reports immediate EOF, and a second call that must
/// report EOF (anything else is a usage error).
fn take_single_request<R>(
    supplier: &mut R,
    factory: &MessageFactory,
    method: &MethodDescriptor,
) -> Result<DynamicMessage, InvokeError>
where
    R: RequestSupplier,
{
    let mut request = new_request(factory, method);
    match supplier
        .supply(&mut request)
        .map_err(InvokeError::RequestSupplierFailed)?
    {
        Supply::Eof => Ok(request),
        Supply::Message => {
            let mut probe = new_request(factory, method);
            match supplier
                .supply(&mut probe)
                .map_err(InvokeError::RequestSupplierFailed)?
            {
                Supply::Eof => Ok(request),
                Supply::Message => Err(InvokeError::TooManyRequestMessages {
                    method: method.full_name().to_string(),
                }),
            }
        }
    }
}

fn new_request(factory: &MessageFactory, method: &MethodDescriptor) -> DynamicMessage {
    factory
        .new_message(method.input().full_name())
        .unwrap_or_else(|| DynamicMessage::new(method.input()))
}

/// Completes a call that yields at most one response message: headers, then the
/// message (only on an OK outcome), then trailers.
async fn finish_single_response(
    outcome: Result<Response<Streaming<DynamicMessage>>, Status>,
    handler: &mut dyn InvocationEventHandler,
) -> Result<(), InvokeError> {
    match outcome {
        Err(status) => {
            // Headers never arrived; the status carries the trailers.
            handler.on_receive_trailers(&status, status.metadata());
            Ok(())
        }
        Ok(response) => {
            let (headers, mut stream, _) = response.into_parts();
            handler.on_receive_headers(&headers);
            let mut reply = None;
            let status = loop {
                match stream.message().await {
                    Ok(Some(message)) => {
                        if reply.is_none() {
                            reply = Some(message);
                        }
                    }
                    Ok(None) => break Status::new(Code::Ok, ""),
                    Err(status) => break status,
                }
            };
            let trailers = final_trailers(&mut stream, &status).await;
            if status.code() == Code::Ok
                && let Some(reply) = &reply
            {
                handler.on_receive_response(reply);
            }
            handler.on_receive_trailers(&status, &trailers);
            Ok(())
        }
    }
}

/// Reads the stream to its end, reporting every message, and returns the final
/// status.
async fn receive_all(
    stream: &mut Streaming<DynamicMessage>,
    handler: &mut dyn InvocationEventHandler,
) -> Status {
    loop {
        match stream.message().await {
            Ok(Some(message)) => handler.on_receive_response(&message),
            Ok(None) => break Status::new(Code::Ok, ""),
            Err(status) => break status,
        }
    }
}

async fn final_trailers(stream: &mut Streaming<DynamicMessage>, status: &Status) -> MetadataMap {
    match stream.trailers().await {
        Ok(Some(trailers)) => trailers,
        _ => status.metadata().clone(),
    }
}

fn transport_failure(method: &MethodDescriptor, source: StubError) -> InvokeError {
    InvokeError::TransportFailure {
        method: method.full_name().to_string(),
        source: Box::new(source),
    }
}
