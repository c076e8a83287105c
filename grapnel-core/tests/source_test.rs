use async_trait::async_trait;
use echo_service::DESCRIPTOR_SET;
use grapnel_core::extensions::{ExtensionRegistry, fetch_all_extensions};
use grapnel_core::source::{
    DescriptorSource, FileSource, SourceError, SymbolDescriptor, get_all_files, list_methods,
    list_services,
};
use grapnel_core::text::descriptor_text;
use prost_reflect::ExtensionDescriptor;
use std::collections::HashSet;


fn echo_source() -> FileSource {
    FileSource::from_encoded_file_descriptor_set(DESCRIPTOR_SET).expect("build file source")
}

fn orchard_source() -> FileSource {
    FileSource::from_file_descriptor_set(fixtures::orchard_file_descriptor_set())
        .expect("build orchard source")
}

/// Wraps a source while hiding its file-enumeration capability, to exercise the
/// dependency-closure fallback of `get_all_files`.
struct WithoutFileEnumeration<'a>(&'a FileSource);

#[async_trait]
impl DescriptorSource for WithoutFileEnumeration<'_> {
    async fn list_services(&self) -> Result<Vec<String>, SourceError> {
        self.0.list_services().await
    }

    async fn find_symbol(
        &self,
        fully_qualified_name: &str,
    ) -> Result<SymbolDescriptor, SourceError> {
        self.0.find_symbol(fully_qualified_name).await
    }

    async fn all_extensions_for_type(
        &self,
        type_name: &str,
    ) -> Result<Vec<ExtensionDescriptor>, SourceError> {
        self.0.all_extensions_for_type(type_name).await
    }
}

#[tokio::test]
async fn lists_every_service_in_the_set() {
    let source = echo_source();
    assert_eq!(
        list_services(&source).await.unwrap(),
        vec!["echo.EchoService".to_string()]
    );
}

#[tokio::test]
async fn the_echo_set_includes_its_imported_types_file() {
    let source = echo_source();
    let names: Vec<String> = get_all_files(&source)
        .await
        .unwrap()
        .iter()
        .map(|f| f.name().to_string())
        .collect();
    assert_eq!(names, vec!["echo.proto", "echo_types.proto"]);
}

#[tokio::test]
async fn service_list_is_sorted_ascending() {
    let source = orchard_source();
    let services = list_services(&source).await.unwrap();
    let mut sorted = services.clone();
    sorted.sort();
    assert_eq!(services, sorted);
    assert!(services.contains(&"orchard.Nursery".to_string()));
}

#[tokio::test]
async fn method_list_is_sorted_ascending() {
    let source = echo_source();
    assert_eq!(
        list_methods(&source, "echo.EchoService").await.unwrap(),
        vec![
            "BidirectionalEcho".to_string(),
            "ClientStreamingEcho".to_string(),
            "ServerStreamingEcho".to_string(),
            "UnaryEcho".to_string(),
        ]
    );
}

#[tokio::test]
async fn listing_methods_of_a_message_is_not_found() {
    let source = echo_source();
    let err = list_methods(&source, "echo.EchoRequest").await.unwrap_err();
    assert!(matches!(err, SourceError::NotFound { kind: "Service", .. }));
}

#[tokio::test]
async fn finds_symbols_of_every_kind() {
    let source = orchard_source();

    assert!(matches!(
        source.find_symbol("orchard.Nursery").await.unwrap(),
        SymbolDescriptor::Service(_)
    ));
    assert!(matches!(
        source.find_symbol("orchard.Tree").await.unwrap(),
        SymbolDescriptor::Message(_)
    ));
    assert!(matches!(
        source.find_symbol("orchard.Season").await.unwrap(),
        SymbolDescriptor::Enum(_)
    ));
    assert!(matches!(
        source.find_symbol("orchard.ring_count").await.unwrap(),
        SymbolDescriptor::Extension(_)
    ));
}

#[tokio::test]
async fn unknown_symbols_are_not_found() {
    let source = echo_source();
    let err = source.find_symbol("echo.Nope").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn all_files_come_back_sorted_and_closed_under_dependencies() {
    let source = orchard_source();
    let files = get_all_files(&source).await.unwrap();

    let names: Vec<&str> = files.iter().map(|f| f.name()).collect();
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);
    assert!(names.contains(&"orchard.proto"));
    assert!(names.contains(&"fruit.proto"));
}

#[tokio::test]
async fn file_enumeration_fallback_matches_the_capability_answer() {
    let source = orchard_source();
    let direct: Vec<String> = get_all_files(&source)
        .await
        .unwrap()
        .iter()
        .map(|f| f.name().to_string())
        .collect();
    let fallback: Vec<String> = get_all_files(&WithoutFileEnumeration(&source))
        .await
        .unwrap()
        .iter()
        .map(|f| f.name().to_string())
        .collect();
    assert_eq!(direct, fallback);
}

#[tokio::test]
async fn resolved_file_descriptors_build_an_equivalent_source() {
    let original = orchard_source();
    let files = get_all_files(&original).await.unwrap();
    let duplicates = files.clone();

    // Duplicates of identical files are fine; the closure is rebuilt from the
    // descriptors themselves.
    let rebuilt = FileSource::from_files(files.into_iter().chain(duplicates)).unwrap();

    assert_eq!(
        list_services(&original).await.unwrap(),
        list_services(&rebuilt).await.unwrap()
    );
}

#[tokio::test]
async fn proto_sources_compile_into_a_source() {
    let dir = fixtures::write_protos();
    let source = FileSource::from_proto_files(
        &[],
        &[dir.path().join("orchard.proto"), dir.path().join("fruit.proto")],
    )
    .expect("compile proto sources");

    assert!(
        list_services(&source)
            .await
            .unwrap()
            .contains(&"orchard.Nursery".to_string())
    );
}

#[tokio::test]
async fn extensions_are_indexed_by_extended_type() {
    let source = orchard_source();

    let tree_exts = source.all_extensions_for_type("orchard.Tree").await.unwrap();
    let mut numbers: Vec<u32> = tree_exts.iter().map(|e| e.number()).collect();
    numbers.sort();
    assert_eq!(numbers, vec![100, 101]);

    let branch_exts = source
        .all_extensions_for_type("orchard.Branch")
        .await
        .unwrap();
    assert_eq!(branch_exts.len(), 1);
    assert_eq!(branch_exts[0].name(), "gnarled");

    assert!(
        source
            .all_extensions_for_type("orchard.Fruit")
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn extension_fetch_walks_nested_and_recursive_types() {
    let source = orchard_source();
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

    // Tree carries two extensions, Branch (reached through the repeated field)
    // one; the self-recursive `parent` field must not loop.
    assert_eq!(registry.for_type("orchard.Tree").len(), 2);
    assert_eq!(registry.for_type("orchard.Branch").len(), 1);
    assert_eq!(registry.len(), 3);
}

#[tokio::test]
async fn repeated_extension_fetches_do_not_enlarge_the_registry() {
    let source = orchard_source();
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
    let len_after_first = registry.len();

    let mut fetched_again = HashSet::new();
    fetch_all_extensions(&source, &mut registry, &tree, &mut fetched_again)
        .await
        .unwrap();

    assert_eq!(registry.len(), len_after_first);
}

#[tokio::test]
async fn descriptor_text_renders_proto_style_snippets() {
    let source = echo_source();

    let service = source.find_symbol("echo.EchoService").await.unwrap();
    let text = descriptor_text(&service);
    assert!(text.starts_with("service EchoService {"));
    assert!(text.contains("rpc UnaryEcho(echo.EchoRequest) returns (echo.EchoResponse);"));
    assert!(
        text.contains(
            "rpc BidirectionalEcho(stream echo.EchoRequest) returns (stream echo.EchoResponse);"
        )
    );

    let message = source.find_symbol("echo.EchoRequest").await.unwrap();
    assert_eq!(
        descriptor_text(&message),
        "message EchoRequest {\n  string message = 1;\n}"
    );

    let orchard = orchard_source();
    let season = orchard.find_symbol("orchard.Season").await.unwrap();
    assert_eq!(
        descriptor_text(&season),
        "enum Season {\n  SEASON_UNKNOWN = 0;\n  SPRING = 1;\n  AUTUMN = 2;\n}"
    );

    let extension = orchard.find_symbol("orchard.ring_count").await.unwrap();
    assert_eq!(
        descriptor_text(&extension),
        "extend orchard.Tree {\n  int32 ring_count = 100;\n}"
    );
}
