use echo_service::{DESCRIPTOR_SET, EchoServiceServer};
use echo_service_impl::EchoServiceImpl;
use futures_util::Stream;
use grapnel_core::extensions::{ExtensionRegistry, fetch_all_extensions};
use grapnel_core::source::{DescriptorSource, ServerSource, SourceError, SymbolDescriptor};
use prost::Message;
use prost_reflect::DescriptorPool;
use std::collections::HashSet;
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tonic::{Request, Response, Status, Streaming};
use tonic_reflection::pb::v1alpha::server_reflection_request::MessageRequest;
use tonic_reflection::pb::v1alpha::server_reflection_response::MessageResponse;
use tonic_reflection::pb::v1alpha::{
    ErrorResponse, ExtensionNumberResponse, FileDescriptorResponse, ListServiceResponse,
    ServerReflectionRequest, ServerReflectionResponse, ServiceResponse,
};
use tonic_reflection::server::v1alpha::{ServerReflection, ServerReflectionServer};


fn reflection_server()
-> ServerReflectionServer<impl tonic_reflection::server::v1alpha::ServerReflection> {
    tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(DESCRIPTOR_SET)
        .build_v1alpha()
        .expect("build reflection service")
}

#[tokio::test]
async fn lists_services_through_reflection() {
    let source = ServerSource::new(reflection_server());
    let services = grapnel_core::source::list_services(&source).await.unwrap();
    assert!(services.contains(&"echo.EchoService".to_string()));

    let mut sorted = services.clone();
    sorted.sort();
    assert_eq!(services, sorted);
}

#[tokio::test]
async fn finds_symbols_through_reflection() {
    let source = ServerSource::new(reflection_server());

    assert!(matches!(
        source.find_symbol("echo.EchoService").await.unwrap(),
        SymbolDescriptor::Service(_)
    ));
    assert!(matches!(
        source.find_symbol("echo.EchoRequest").await.unwrap(),
        SymbolDescriptor::Message(_)
    ));
}

#[tokio::test]
async fn unknown_symbols_are_not_found_through_reflection() {
    let source = ServerSource::new(reflection_server());
    let err = source.find_symbol("echo.Missing").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn file_listing_falls_back_to_the_dependency_closure() {
    // A reflection source has no file-enumeration capability, so the collector
    // walks every service's owning file instead. echo.proto imports its message
    // types, and the closure must pull that import in too.
    let source = ServerSource::new(reflection_server());
    let files = grapnel_core::source::get_all_files(&source).await.unwrap();
    assert!(files.iter().any(|f| f.name() == "echo.proto"));
    assert!(files.iter().any(|f| f.name() == "echo_types.proto"));
}

#[tokio::test]
async fn a_server_without_reflection_yields_the_sentinel() {
    // This server only hosts the echo service; the reflection endpoint answers
    // every call with UNIMPLEMENTED.
    let source = ServerSource::new(EchoServiceServer::new(EchoServiceImpl));

    let err = source.list_services().await.unwrap_err();
    assert!(matches!(err, SourceError::ReflectionNotSupported));

    let err = source.find_symbol("echo.EchoService").await.unwrap_err();
    assert!(matches!(err, SourceError::ReflectionNotSupported));
}

/// A reflection service that also answers the extension queries
/// `tonic-reflection`'s stock server does not implement, backed by a fixture
/// descriptor pool.
struct MockReflection {
    pool: DescriptorPool,
}

impl MockReflection {
    fn answer(&self, request: MessageRequest) -> MessageResponse {
        match request {
            MessageRequest::ListServices(_) => {
                MessageResponse::ListServicesResponse(ListServiceResponse {
                    service: self
                        .pool
                        .services()
                        .map(|s| ServiceResponse {
                            name: s.full_name().to_string(),
                        })
                        .collect(),
                })
            }
            MessageRequest::FileContainingSymbol(symbol) => match self.file_for_symbol(&symbol) {
                Some(file) => file_response(file),
                None => not_found(format!("symbol {symbol}")),
            },
            MessageRequest::FileByFilename(name) => match self.pool.get_file_by_name(&name) {
                Some(file) => file_response(file),
                None => not_found(format!("file {name}")),
            },
            MessageRequest::AllExtensionNumbersOfType(type_name) => {
                let mut numbers: Vec<i32> = self
                    .pool
                    .all_extensions()
                    .filter(|ext| ext.containing_message().full_name() == type_name)
                    .map(|ext| ext.number() as i32)
                    .collect();
                numbers.sort();
                MessageResponse::AllExtensionNumbersResponse(ExtensionNumberResponse {
                    base_type_name: type_name,
                    extension_number: numbers,
                })
            }
            MessageRequest::FileContainingExtension(req) => {
                let extension = self.pool.all_extensions().find(|ext| {
                    ext.containing_message().full_name() == req.containing_type
                        && ext.number() as i32 == req.extension_number
                });
                match extension {
                    Some(ext) => file_response(ext.parent_file()),
                    None => not_found(format!(
                        "extension {}({})",
                        req.containing_type, req.extension_number
                    )),
                }
            }
        }
    }

    fn file_for_symbol(&self, symbol: &str) -> Option<prost_reflect::FileDescriptor> {
        if let Some(service) = self.pool.get_service_by_name(symbol) {
            return Some(service.parent_file());
        }
        if let Some(message) = self.pool.get_message_by_name(symbol) {
            return Some(message.parent_file());
        }
        if let Some(descriptor) = self.pool.get_enum_by_name(symbol) {
            return Some(descriptor.parent_file());
        }
        self.pool
            .get_extension_by_name(symbol)
            .map(|ext| ext.parent_file())
    }
}

fn file_response(file: prost_reflect::FileDescriptor) -> MessageResponse {
    MessageResponse::FileDescriptorResponse(FileDescriptorResponse {
        file_descriptor_proto: vec![file.file_descriptor_proto().encode_to_vec()],
    })
}

fn not_found(message: String) -> MessageResponse {
    MessageResponse::ErrorResponse(ErrorResponse {
        error_code: tonic::Code::NotFound as i32,
        error_message: message,
    })
}

#[tonic::async_trait]
impl ServerReflection for MockReflection {
    type ServerReflectionInfoStream =
        Pin<Box<dyn Stream<Item = Result<ServerReflectionResponse, Status>> + Send>>;

    async fn server_reflection_info(
        &self,
        request: Request<Streaming<ServerReflectionRequest>>,
    ) -> Result<Response<Self::ServerReflectionInfoStream>, Status> {
        let pool = self.pool.clone();
        let mut requests = request.into_inner();
        let (tx, rx) = mpsc::channel(16);

        tokio::spawn(async move {
            let mock = MockReflection { pool };
            while let Some(Ok(request)) = requests.next().await {
                let message_response = request.message_request.clone().map(|r| mock.answer(r));
                let response = ServerReflectionResponse {
                    valid_host: request.host.clone(),
                    original_request: Some(request),
                    message_response,
                };
                if tx.send(Ok(response)).await.is_err() {
                    break;
                }
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }
}

fn mock_reflection_source() -> ServerSource<ServerReflectionServer<MockReflection>> {
    let pool = DescriptorPool::from_file_descriptor_set(fixtures::orchard_file_descriptor_set())
        .expect("build fixture pool");
    ServerSource::new(ServerReflectionServer::new(MockReflection { pool }))
}

#[tokio::test]
async fn resolves_extensions_one_by_one_in_server_order() {
    let source = mock_reflection_source();

    let extensions = source
        .all_extensions_for_type("orchard.Tree")
        .await
        .unwrap();
    let numbers: Vec<u32> = extensions.iter().map(|e| e.number()).collect();
    assert_eq!(numbers, vec![100, 101]);

    assert!(
        source
            .all_extensions_for_type("orchard.Fruit")
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn extension_fetch_recurses_through_a_reflection_source() {
    let source = mock_reflection_source();
    let tree = source
        .find_symbol("orchard.Tree")
        .await
        .unwrap()
        .as_message()
        .cloned()
        .unwrap();

    let mut registry = ExtensionRegistry::new();
    let mut fetched = HashSet::new();
    fetch_all_extensions(&source, &mut registry, &tree, &mut fetched)
        .await
        .unwrap();

    assert_eq!(registry.for_type("orchard.Tree").len(), 2);
    assert_eq!(registry.for_type("orchard.Branch").len(), 1);
}

#[tokio::test]
async fn dependencies_are_fetched_recursively() {
    let source = mock_reflection_source();

    // fruit.proto imports orchard.proto; resolving a symbol from the former must
    // pull in the latter.
    let symbol = source.find_symbol("orchard.Fruit").await.unwrap();
    assert!(matches!(symbol, SymbolDescriptor::Message(_)));

    // The import is satisfied in the same cache, so this resolves locally.
    let tree = source.find_symbol("orchard.Tree").await.unwrap();
    assert!(matches!(tree, SymbolDescriptor::Message(_)));
}
