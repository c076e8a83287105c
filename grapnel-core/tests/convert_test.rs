use grapnel_core::convert::{ensure_extensions, fully_convert};
use grapnel_core::extensions::{ExtensionRegistry, MessageFactory};
use grapnel_core::source::FileSource;
use prost::Message;
use prost_reflect::{DescriptorPool, DynamicMessage, ReflectMessage, Value};
use serde_json::json;


#[tokio::test]
async fn rehydration_reveals_extension_fields() {
    let full_set = fixtures::orchard_file_descriptor_set();
    let full_pool = DescriptorPool::from_file_descriptor_set(full_set.clone()).unwrap();
    let base_pool =
        DescriptorPool::from_file_descriptor_set(fixtures::orchard_base_file_descriptor_set())
            .unwrap();

    // Build a Tree with extension data and serialize it.
    let tree = full_pool.get_message_by_name("orchard.Tree").unwrap();
    let species = tree.get_field_by_name("species").unwrap();
    let ring_count = full_pool.get_extension_by_name("orchard.ring_count").unwrap();
    let mut message = DynamicMessage::new(tree);
    message.set_field(&species, Value::String("oak".to_string()));
    message.set_extension(&ring_count, Value::I32(7));
    let bytes = message.encode_to_vec();

    // Decoded against a pool that never saw fruit.proto, the extension data is
    // an unknown field.
    let bare_tree = base_pool.get_message_by_name("orchard.Tree").unwrap();
    let stripped = DynamicMessage::decode(bare_tree, bytes.as_slice()).unwrap();

    // Rehydrating through an extension-aware source makes it visible again.
    let source = FileSource::from_file_descriptor_set(full_set).unwrap();
    let rehydrated = ensure_extensions(&source, &stripped).await;

    let ring_count = source
        .pool()
        .get_extension_by_name("orchard.ring_count")
        .unwrap();
    assert_eq!(
        rehydrated.get_extension(&ring_count).as_ref(),
        &Value::I32(7)
    );
    let species = rehydrated
        .descriptor()
        .get_field_by_name("species")
        .unwrap();
    assert_eq!(
        rehydrated.get_field(&species).as_ref(),
        &Value::String("oak".to_string())
    );
}

#[test]
fn conversion_preserves_maps_repeated_and_nested_messages() {
    let pool =
        DescriptorPool::from_file_descriptor_set(fixtures::garden_file_descriptor_set()).unwrap();
    let plot = pool.get_message_by_name("garden.Plot").unwrap();

    let message = DynamicMessage::deserialize(
        plot,
        json!({
            "name": "north",
            "centerpiece": {"species": "maple"},
            "rows": [{"species": "fern"}, {"species": "ivy"}],
            "byLabel": {"front": {"species": "rose"}}
        }),
    )
    .unwrap();

    let factory = MessageFactory::new(pool, ExtensionRegistry::new());
    let converted = fully_convert(&factory, &message).unwrap();

    assert_eq!(
        serde_json::to_value(&converted).unwrap(),
        serde_json::to_value(&message).unwrap()
    );
}

#[test]
fn unknown_root_types_pass_through_unchanged() {
    let pool =
        DescriptorPool::from_file_descriptor_set(fixtures::garden_file_descriptor_set()).unwrap();
    let plot = pool.get_message_by_name("garden.Plot").unwrap();
    let message = DynamicMessage::deserialize(plot, json!({"name": "south"})).unwrap();

    // The factory's pool knows nothing about garden.Plot.
    let factory = MessageFactory::new(DescriptorPool::new(), ExtensionRegistry::new());
    let converted = fully_convert(&factory, &message).unwrap();

    assert_eq!(converted.descriptor(), message.descriptor());
    assert_eq!(
        serde_json::to_value(&converted).unwrap(),
        serde_json::to_value(&message).unwrap()
    );
}
