#![cfg(test)]

use std::collections::BTreeMap;

use serde_json::json;
use tagwire::{
    decode, decode_to_json, encode, load_schema, verify, ConvertOptions, MapKey, Root, Value,
    Writer, WIRE_LEN, WIRE_VARINT,
};

const FUNCTION_HOST: &str = r#"
    syntax = "proto3";
    package host;

    message HeaderFields {
      repeated string fields = 1;
    }

    message FDRequest {
      string method = 1;
      bytes body = 2;
      int64 content_length = 3;
      string host = 4;
      string remote_addr = 5;
      string request_uri = 6;
      map<string, HeaderFields> header = 7;
    }

    message FDResponse {
      bytes body = 1;
      int32 status_code = 2;
      int32 length = 3;
      map<string, HeaderFields> header = 4;
    }
"#;

fn request_root() -> Root {
    load_schema(FUNCTION_HOST).unwrap()
}

#[test]
fn request_response_round_trip() {
    let root = request_root();
    let object = json!({
        "method": "POST",
        "body": [104, 105],
        "contentLength": 2,
        "host": "svc.internal",
        "remoteAddr": "10.0.0.7:9000",
        "requestUri": "/run",
        "header": {
            "Accept": { "fields": ["application/json"] },
            "X-Trace": { "fields": ["a", "b"] }
        }
    });
    assert_eq!(verify(&root, "host.FDRequest", &object), None);

    let message = root.from_object("host.FDRequest", &object).unwrap();
    let bytes = encode(&root, &message).unwrap();
    let back = decode(&root, "host.FDRequest", &bytes).unwrap();
    assert_eq!(back, message);
    assert_eq!(
        root.to_object(&back, &ConvertOptions::default()).unwrap(),
        object
    );
}

#[test]
fn all_cardinalities_round_trip() {
    let root = load_schema(
        r#"
        syntax = "proto3";
        message Item { int32 n = 1; }
        message Everything {
          int32 single = 1;
          repeated int64 numbers = 2;
          repeated string names = 3;
          repeated Item items = 4;
          map<int32, Item> by_id = 5;
          map<string, bool> flags = 6;
        }
        "#,
    )
    .unwrap();

    let mut item = root.new_message("Item").unwrap();
    root.set_field(&mut item, "n", Value::I32(5)).unwrap();

    let mut msg = root.new_message("Everything").unwrap();
    root.set_field(&mut msg, "single", Value::I32(-1)).unwrap();
    root.set_field(
        &mut msg,
        "numbers",
        Value::List(vec![Value::I64(1), Value::I64(-1), Value::I64(i64::MAX)]),
    )
    .unwrap();
    root.set_field(
        &mut msg,
        "names",
        Value::List(vec![Value::String("a".to_owned())]),
    )
    .unwrap();
    root.set_field(
        &mut msg,
        "items",
        Value::List(vec![Value::Message(item.clone())]),
    )
    .unwrap();
    let mut by_id = BTreeMap::new();
    by_id.insert(MapKey::I32(9), Value::Message(item));
    root.set_field(&mut msg, "byId", Value::Map(by_id)).unwrap();
    let mut flags = BTreeMap::new();
    flags.insert(MapKey::String("on".to_owned()), Value::Bool(true));
    root.set_field(&mut msg, "flags", Value::Map(flags)).unwrap();

    let bytes = encode(&root, &msg).unwrap();
    assert_eq!(decode(&root, "Everything", &bytes).unwrap(), msg);
}

#[test]
fn empty_containers_normalize() {
    let root = load_schema(
        "syntax = \"proto3\"; message M { repeated int32 r = 1; map<string, int32> m = 2; }",
    )
    .unwrap();
    // Empty repeated and map fields write no bytes, so decode yields the
    // same shape an untouched message has.
    let mut msg = root.new_message("M").unwrap();
    root.set_field(&mut msg, "r", Value::List(Vec::new())).unwrap();
    root.set_field(&mut msg, "m", Value::Map(BTreeMap::new()))
        .unwrap();
    let bytes = encode(&root, &msg).unwrap();
    assert_eq!(bytes, Vec::<u8>::new());
    let back = decode(&root, "M", &bytes).unwrap();
    assert!(back.is_empty());
}

#[test]
fn varint_boundary_vectors() {
    let cases: [(u64, &[u8]); 4] = [
        (0, &[0x00]),
        (127, &[0x7F]),
        (128, &[0x80, 0x01]),
        (u32::MAX as u64, &[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]),
    ];
    for (value, expected) in cases {
        let mut writer = Writer::new();
        writer.uint64(value);
        assert_eq!(writer.finish(), expected, "value {}", value);
    }
    // sint32 -1 zigzags to 1, sint32 1 to 2.
    let mut writer = Writer::new();
    writer.sint32(-1);
    assert_eq!(writer.finish(), [0x01]);
    let mut writer = Writer::new();
    writer.sint32(1);
    assert_eq!(writer.finish(), [0x02]);
}

#[test]
fn verify_names_the_offending_field() {
    let root = request_root();
    let problem = verify(
        &root,
        "host.FDResponse",
        &json!({ "statusCode": "not a number" }),
    )
    .unwrap();
    assert!(problem.starts_with("statusCode:"), "got {:?}", problem);
}

#[test]
fn oneof_exclusivity_across_the_stack() {
    let root = load_schema(
        r#"
        syntax = "proto3";
        message M { oneof which { string a = 1; int32 b = 2; } }
        "#,
    )
    .unwrap();
    // verify rejects two populated members.
    assert!(verify(&root, "M", &json!({ "a": "x", "b": 1 })).is_some());
    // Setting one member clears the other.
    let mut msg = root.new_message("M").unwrap();
    root.set_field(&mut msg, "a", Value::String("x".to_owned()))
        .unwrap();
    root.set_field(&mut msg, "b", Value::I32(2)).unwrap();
    assert_eq!(root.which_oneof(&msg, "which"), Some("b"));
    assert_eq!(root.get_field(&msg, "a"), None);
}

#[test]
fn text_and_json_schemas_agree() {
    let source = "syntax = \"proto3\"; message M { int32 x = 1; }";
    let from_text = load_schema(source).unwrap();
    let descriptor = serde_json::to_string(&from_text.to_json()).unwrap();
    let from_json = load_schema(&descriptor).unwrap();

    let mut msg = from_text.new_message("M").unwrap();
    from_text.set_field(&mut msg, "x", Value::I32(99)).unwrap();
    let bytes = encode(&from_text, &msg).unwrap();
    // The JSON-built root decodes what the text-built root encoded.
    let back = decode(&from_json, "M", &bytes).unwrap();
    assert_eq!(from_json.get_field(&back, "x"), Some(&Value::I32(99)));
}

#[test]
fn duplicate_id_fails_before_any_codec_work() {
    let err = load_schema("syntax = \"proto3\"; message M { int32 a = 1; int32 b = 1; }")
        .unwrap_err();
    assert!(err.to_string().contains("duplicate id 1"));
}

#[test]
fn unknown_fields_skip_cleanly() {
    let full = load_schema(
        "syntax = \"proto3\"; message M { int32 x = 1; string extra = 7; }",
    )
    .unwrap();
    let mut msg = full.new_message("M").unwrap();
    full.set_field(&mut msg, "x", Value::I32(3)).unwrap();
    full.set_field(&mut msg, "extra", Value::String("dropped".to_owned()))
        .unwrap();
    let bytes = encode(&full, &msg).unwrap();

    let slim = load_schema("syntax = \"proto3\"; message M { int32 x = 1; }").unwrap();
    let back = decode(&slim, "M", &bytes).unwrap();
    assert_eq!(slim.get_field(&back, "x"), Some(&Value::I32(3)));
}

#[test]
fn writer_length_matches_finish() {
    let mut writer = Writer::new();
    writer.tag(1, WIRE_VARINT);
    writer.uint32(300);
    writer.tag(2, WIRE_LEN);
    writer.string("length accounting");
    let expected = writer.len();
    assert_eq!(writer.finish().len(), expected);
}

#[test]
fn decode_to_json_is_collaborator_friendly() {
    let root = request_root();
    let object = json!({ "statusCode": 200, "body": [111, 107], "length": 2 });
    let message = root.from_object("host.FDResponse", &object).unwrap();
    let bytes = encode(&root, &message).unwrap();
    let rendered = decode_to_json(&root, "host.FDResponse", &bytes).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();
    assert_eq!(parsed.get("statusCode"), Some(&json!(200)));
}
