//! tagwire
//!
//! This crate provides the runtime surface for working with tagwire-encoded
//! messages. External collaborators consume four capabilities:
//!
//! - `decode(bytes) -> DynamicMessage`
//! - `encode(DynamicMessage) -> bytes`
//! - `verify(plainObject) -> Option<String>`
//! - `load_schema(json|text) -> Root`
//!
//! plus the [rpc] adapter for binding a schema's services to a transport.

pub mod rpc;

pub use tagwire_reflect::{
    BytesMode, ConvertOptions, DynamicMessage, Edition, EnumMode, Fetcher, FsFetcher, LongMode,
    MapKey, ParseOptions, Root, SchemaError, Value,
};
pub use tagwire_wire::{
    Reader, WireError, Writer, WIRE_END_GROUP, WIRE_FIXED32, WIRE_FIXED64, WIRE_LEN,
    WIRE_START_GROUP, WIRE_VARINT,
};

/// Build a [Root] from descriptor JSON or schema text. JSON is recognized by
/// a leading `{`; anything else parses as schema source.
pub fn load_schema(source: &str) -> Result<Root, SchemaError> {
    if source.trim_start().starts_with('{') {
        Root::from_json_text(source)
    } else {
        Root::from_text(source)
    }
}

/// Decode `buffer` as the named type.
pub fn decode(root: &Root, type_path: &str, buffer: &[u8]) -> Result<DynamicMessage, SchemaError> {
    root.decode(type_path, buffer)
}

/// Encode a message to its wire form.
pub fn encode(root: &Root, message: &DynamicMessage) -> Result<Vec<u8>, SchemaError> {
    root.encode(message)
}

/// Check a plain object against the named type. `None` means valid.
pub fn verify(root: &Root, type_path: &str, object: &serde_json::Value) -> Option<String> {
    root.verify(type_path, object)
}

/// Decode a buffer into a pretty-printed JSON string.
pub fn decode_to_json(root: &Root, type_path: &str, buffer: &[u8]) -> Result<String, SchemaError> {
    let message = root.decode(type_path, buffer)?;
    let object = root.to_object(&message, &ConvertOptions::default())?;
    Ok(serde_json::to_string_pretty(&object).unwrap())
}

pub mod error {
    pub use tagwire_reflect::SchemaError;
    pub use tagwire_wire::WireError;
}

pub mod schema {
    pub use tagwire_reflect::{DynamicMessage, MapKey, Node, NodeId, NodeKind, Root, Value};
}
