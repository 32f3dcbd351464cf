//! Descriptor-JSON ingestion and emission.
//!
//! The JSON object tree mirrors the reflection model: `nested`, `fields`,
//! `oneofs`, `values`, `methods`, `options`, `reserved`, `extensions`. Text
//! parsing and JSON ingestion produce equivalent roots.

use serde_json::{json, Map, Value as Json};

use crate::error::SchemaError;
use crate::features::{Edition, FieldPresence};
use crate::model::{Node, NodeId, NodeKind, Reserved, Rule, ScalarKind};
use crate::root::Root;

impl Root {
    /// Serialize the tree to descriptor JSON.
    pub fn to_json(&self) -> Json {
        namespace_body(self, self.root_id())
    }

    /// Build a resolved root from descriptor JSON.
    pub fn from_json(value: &Json) -> Result<Root, SchemaError> {
        let mut root = Root::new();
        ingest_namespace_body(&mut root, root.root_id(), value, Edition::Proto2)?;
        root.resolve_all()?;
        Ok(root)
    }

    /// Build a resolved root from descriptor JSON text.
    pub fn from_json_text(text: &str) -> Result<Root, SchemaError> {
        let value: Json = serde_json::from_str(text)
            .map_err(|e| SchemaError::Descriptor(format!("invalid JSON: {}", e)))?;
        Root::from_json(&value)
    }
}

fn options_json(root: &Root, id: NodeId) -> Option<Json> {
    root.node(id)
        .common
        .options
        .as_ref()
        .filter(|o| !o.is_empty())
        .map(|o| Json::Object(o.clone()))
}

fn edition_json(root: &Root, id: NodeId, out: &mut Map<String, Json>) {
    let node = root.node(id);
    let parent_edition = node
        .common
        .parent
        .map(|p| root.node(p).common.edition)
        .unwrap_or(Edition::Proto2);
    if node.common.edition != parent_edition {
        out.insert(
            "edition".to_owned(),
            Json::String(node.common.edition.as_str().to_owned()),
        );
    }
}

fn reserved_json(reserved: &[Reserved]) -> Json {
    Json::Array(
        reserved
            .iter()
            .map(|entry| match entry {
                Reserved::Range(lo, hi) => json!([lo, hi]),
                Reserved::Name(name) => Json::String(name.clone()),
            })
            .collect(),
    )
}

fn node_json(root: &Root, id: NodeId) -> Json {
    match root.node(id).kind {
        NodeKind::Namespace(_) => {
            let mut out = Map::new();
            edition_json(root, id, &mut out);
            if let Some(options) = options_json(root, id) {
                out.insert("options".to_owned(), options);
            }
            if let Json::Object(body) = namespace_body(root, id) {
                out.extend(body);
            }
            Json::Object(out)
        }
        NodeKind::Type(ref data) => {
            let mut out = Map::new();
            edition_json(root, id, &mut out);
            if data.is_group {
                out.insert("group".to_owned(), Json::Bool(true));
            }
            if let Some(options) = options_json(root, id) {
                out.insert("options".to_owned(), options);
            }
            if !data.oneofs.is_empty() {
                let mut oneofs = Map::new();
                for &oneof_id in &data.oneofs {
                    let members: Vec<Json> = root
                        .node(oneof_id)
                        .as_oneof()
                        .map(|o| o.fields.clone())
                        .unwrap_or_default()
                        .iter()
                        .map(|&f| Json::String(root.node(f).name().to_owned()))
                        .collect();
                    let mut entry = Map::new();
                    entry.insert("oneof".to_owned(), Json::Array(members));
                    if let Some(options) = options_json(root, oneof_id) {
                        entry.insert("options".to_owned(), options);
                    }
                    oneofs.insert(root.node(oneof_id).name().to_owned(), Json::Object(entry));
                }
                out.insert("oneofs".to_owned(), Json::Object(oneofs));
            }
            let mut fields = Map::new();
            for &field_id in &data.fields {
                fields.insert(
                    root.node(field_id).name().to_owned(),
                    field_json(root, field_id),
                );
            }
            out.insert("fields".to_owned(), Json::Object(fields));
            if !data.reserved.is_empty() {
                out.insert("reserved".to_owned(), reserved_json(&data.reserved));
            }
            if !data.extension_ranges.is_empty() {
                out.insert(
                    "extensions".to_owned(),
                    Json::Array(
                        data.extension_ranges
                            .iter()
                            .map(|&(lo, hi)| json!([lo, hi]))
                            .collect(),
                    ),
                );
            }
            if !data.children.is_empty() {
                let mut nested = Map::new();
                for &child in &data.children {
                    nested.insert(root.node(child).name().to_owned(), node_json(root, child));
                }
                out.insert("nested".to_owned(), Json::Object(nested));
            }
            Json::Object(out)
        }
        NodeKind::Field(_) => field_json(root, id),
        NodeKind::Enum(ref data) => {
            let mut out = Map::new();
            edition_json(root, id, &mut out);
            if let Some(options) = options_json(root, id) {
                out.insert("options".to_owned(), options);
            }
            let mut values = Map::new();
            for (name, value) in &data.values {
                values.insert(name.clone(), Json::from(*value));
            }
            out.insert("values".to_owned(), Json::Object(values));
            if !data.reserved.is_empty() {
                out.insert("reserved".to_owned(), reserved_json(&data.reserved));
            }
            Json::Object(out)
        }
        NodeKind::Service(ref data) => {
            let mut out = Map::new();
            edition_json(root, id, &mut out);
            if let Some(options) = options_json(root, id) {
                out.insert("options".to_owned(), options);
            }
            let mut methods = Map::new();
            for &method_id in &data.methods {
                let method = match root.node(method_id).as_method() {
                    Some(m) => m,
                    None => continue,
                };
                let mut entry = Map::new();
                entry.insert(
                    "requestType".to_owned(),
                    Json::String(method.request_type.clone()),
                );
                entry.insert(
                    "responseType".to_owned(),
                    Json::String(method.response_type.clone()),
                );
                if method.request_stream {
                    entry.insert("requestStream".to_owned(), Json::Bool(true));
                }
                if method.response_stream {
                    entry.insert("responseStream".to_owned(), Json::Bool(true));
                }
                if let Some(options) = options_json(root, method_id) {
                    entry.insert("options".to_owned(), options);
                }
                methods.insert(root.node(method_id).name().to_owned(), Json::Object(entry));
            }
            out.insert("methods".to_owned(), Json::Object(methods));
            if !data.children.is_empty() {
                let mut nested = Map::new();
                for &child in &data.children {
                    nested.insert(root.node(child).name().to_owned(), node_json(root, child));
                }
                out.insert("nested".to_owned(), Json::Object(nested));
            }
            Json::Object(out)
        }
        NodeKind::OneOf(_) | NodeKind::Method(_) => Json::Object(Map::new()),
    }
}

fn field_json(root: &Root, id: NodeId) -> Json {
    let field = match root.node(id).as_field() {
        Some(f) => f,
        None => return Json::Object(Map::new()),
    };
    let mut out = Map::new();
    match field.rule {
        Rule::Repeated => {
            out.insert("rule".to_owned(), Json::String("repeated".to_owned()));
        }
        Rule::Singular
            if root.node(id).common.overrides.field_presence == Some(FieldPresence::LegacyRequired) =>
        {
            out.insert("rule".to_owned(), Json::String("required".to_owned()));
        }
        Rule::Singular
            if root.node(id).common.overrides.field_presence == Some(FieldPresence::Explicit)
                && root.node(id).common.edition == Edition::Proto3 =>
        {
            out.insert("rule".to_owned(), Json::String("optional".to_owned()));
        }
        _ => {}
    }
    if let Some(key) = field.key_kind {
        out.insert("keyType".to_owned(), Json::String(key.as_str().to_owned()));
    }
    out.insert("type".to_owned(), Json::String(field.type_name.clone()));
    out.insert("id".to_owned(), Json::from(field.id));
    if let Some(ref target) = field.extend {
        out.insert("extend".to_owned(), Json::String(target.clone()));
    }
    if field.delimited {
        out.insert("delimited".to_owned(), Json::Bool(true));
    }
    if let Some(options) = options_json(root, id) {
        out.insert("options".to_owned(), options);
    }
    Json::Object(out)
}

fn namespace_body(root: &Root, id: NodeId) -> Json {
    let mut out = Map::new();
    let children = match root.node(id).kind {
        NodeKind::Namespace(ref data) => data.children.clone(),
        _ => Vec::new(),
    };
    if id == root.root_id() {
        if let Some(options) = options_json(root, id) {
            out.insert("options".to_owned(), options);
        }
    }
    if !children.is_empty() {
        let mut nested = Map::new();
        for child in children {
            nested.insert(root.node(child).name().to_owned(), node_json(root, child));
        }
        out.insert("nested".to_owned(), Json::Object(nested));
    }
    Json::Object(out)
}

fn as_object<'v>(value: &'v Json, what: &str) -> Result<&'v Map<String, Json>, SchemaError> {
    value
        .as_object()
        .ok_or_else(|| SchemaError::Descriptor(format!("{} must be an object", what)))
}

fn ingest_options(root: &mut Root, id: NodeId, obj: &Map<String, Json>) {
    if let Some(Json::Object(options)) = obj.get("options") {
        for (key, value) in options {
            if key == "allow_alias" {
                if let NodeKind::Enum(ref mut data) = root.node_mut(id).kind {
                    data.allow_alias = value.as_bool().unwrap_or(false);
                }
            }
            root.node_mut(id).set_option(key, value.clone());
        }
    }
}

fn ingest_reserved(root: &mut Root, id: NodeId, obj: &Map<String, Json>) -> Result<(), SchemaError> {
    if let Some(Json::Array(entries)) = obj.get("reserved") {
        for entry in entries {
            match entry {
                Json::String(name) => root.add_reserved(id, Reserved::Name(name.clone())),
                Json::Array(range) if range.len() == 2 => {
                    let lo = range[0].as_i64().ok_or_else(|| {
                        SchemaError::Descriptor("reserved range bounds must be integers".to_owned())
                    })?;
                    let hi = range[1].as_i64().ok_or_else(|| {
                        SchemaError::Descriptor("reserved range bounds must be integers".to_owned())
                    })?;
                    root.add_reserved(id, Reserved::Range(lo, hi));
                }
                _ => {
                    return Err(SchemaError::Descriptor(
                        "reserved entries must be names or [lo, hi] ranges".to_owned(),
                    ))
                }
            }
        }
    }
    Ok(())
}

fn node_edition(obj: &Map<String, Json>, inherited: Edition) -> Edition {
    obj.get("edition")
        .or_else(|| obj.get("syntax"))
        .and_then(|v| v.as_str())
        .and_then(Edition::parse)
        .unwrap_or(inherited)
}

fn ingest_field(
    root: &mut Root,
    parent: NodeId,
    name: &str,
    obj: &Map<String, Json>,
    edition: Edition,
    oneof: Option<NodeId>,
) -> Result<NodeId, SchemaError> {
    let type_name = obj
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| SchemaError::Descriptor(format!("field {:?} is missing a type", name)))?;
    let id = obj
        .get("id")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| SchemaError::Descriptor(format!("field {:?} is missing an id", name)))?;
    let rule = match obj.get("rule").and_then(|v| v.as_str()) {
        Some("repeated") => Rule::Repeated,
        _ if obj.contains_key("keyType") => Rule::Map,
        _ => Rule::Singular,
    };
    let mut node = Node::field(name, id as u32, rule, type_name, edition);
    match obj.get("rule").and_then(|v| v.as_str()) {
        Some("required") => {
            node.common.overrides.field_presence = Some(FieldPresence::LegacyRequired)
        }
        Some("optional") if edition == Edition::Proto3 => {
            node.common.overrides.field_presence = Some(FieldPresence::Explicit)
        }
        _ => {}
    }
    if let NodeKind::Field(ref mut field) = node.kind {
        if let Some(key) = obj.get("keyType").and_then(|v| v.as_str()) {
            field.key_kind = Some(ScalarKind::parse(key).ok_or_else(|| {
                SchemaError::Descriptor(format!("invalid map key type {:?}", key))
            })?);
            if !field.key_kind.map(|k| k.valid_map_key()).unwrap_or(false) {
                return Err(SchemaError::Descriptor(format!(
                    "invalid map key type {:?}",
                    key
                )));
            }
        }
        field.extend = obj
            .get("extend")
            .and_then(|v| v.as_str())
            .map(|s| s.to_owned());
        field.delimited = obj
            .get("delimited")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        field.oneof = oneof;
        if let Some(Json::Object(options)) = obj.get("options") {
            field.default = options.get("default").cloned();
            field.packed = options.get("packed").and_then(|v| v.as_bool());
        }
    }
    let id = root.add(parent, node)?;
    ingest_options(root, id, obj);
    Ok(id)
}

fn ingest_node(
    root: &mut Root,
    parent: NodeId,
    name: &str,
    value: &Json,
    inherited: Edition,
) -> Result<(), SchemaError> {
    let obj = as_object(value, name)?;
    let edition = node_edition(obj, inherited);

    if obj.contains_key("fields") || obj.contains_key("oneofs") || obj.contains_key("group") {
        let mut node = Node::message(name, edition);
        if let NodeKind::Type(ref mut data) = node.kind {
            data.is_group = obj.get("group").and_then(|v| v.as_bool()).unwrap_or(false);
        }
        let type_id = root.add(parent, node)?;
        ingest_options(root, type_id, obj);
        ingest_reserved(root, type_id, obj)?;
        if let Some(Json::Array(ranges)) = obj.get("extensions") {
            for range in ranges {
                if let (Some(lo), Some(hi)) = (
                    range.get(0).and_then(|v| v.as_u64()),
                    range.get(1).and_then(|v| v.as_u64()),
                ) {
                    root.add_extension_range(type_id, lo as u32, hi as u32);
                }
            }
        }
        // Oneofs first so their member fields can link at add time.
        let mut oneof_of: std::collections::HashMap<String, NodeId> = Default::default();
        if let Some(Json::Object(oneofs)) = obj.get("oneofs") {
            for (oneof_name, entry) in oneofs {
                let oneof_id = root.add(type_id, Node::oneof(oneof_name, edition))?;
                if let Some(entry_obj) = entry.as_object() {
                    ingest_options(root, oneof_id, entry_obj);
                    if let Some(Json::Array(members)) = entry_obj.get("oneof") {
                        for member in members {
                            if let Some(member) = member.as_str() {
                                oneof_of.insert(member.to_owned(), oneof_id);
                            }
                        }
                    }
                }
            }
        }
        if let Some(Json::Object(fields)) = obj.get("fields") {
            for (field_name, entry) in fields {
                let field_obj = as_object(entry, field_name)?;
                let oneof = oneof_of.get(field_name.as_str()).copied();
                ingest_field(root, type_id, field_name, field_obj, edition, oneof)?;
            }
        }
        if let Some(Json::Object(nested)) = obj.get("nested") {
            for (child_name, child) in nested {
                ingest_node(root, type_id, child_name, child, edition)?;
            }
        }
        return Ok(());
    }

    if obj.contains_key("values") {
        let enum_id = root.add(parent, Node::enumeration(name, edition))?;
        ingest_options(root, enum_id, obj);
        ingest_reserved(root, enum_id, obj)?;
        if let Some(Json::Object(values)) = obj.get("values") {
            for (value_name, value) in values {
                let number = value.as_i64().ok_or_else(|| {
                    SchemaError::Descriptor(format!(
                        "enum value {:?} must be an integer",
                        value_name
                    ))
                })?;
                root.add_enum_value(enum_id, value_name, number as i32)?;
            }
        }
        return Ok(());
    }

    if obj.contains_key("methods") {
        let service_id = root.add(parent, Node::service(name, edition))?;
        ingest_options(root, service_id, obj);
        if let Some(Json::Object(methods)) = obj.get("methods") {
            for (method_name, entry) in methods {
                let method_obj = as_object(entry, method_name)?;
                let request_type = method_obj
                    .get("requestType")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        SchemaError::Descriptor(format!(
                            "method {:?} is missing requestType",
                            method_name
                        ))
                    })?;
                let response_type = method_obj
                    .get("responseType")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        SchemaError::Descriptor(format!(
                            "method {:?} is missing responseType",
                            method_name
                        ))
                    })?;
                let method_id = root.add(
                    service_id,
                    Node::method(
                        method_name,
                        request_type,
                        response_type,
                        method_obj
                            .get("requestStream")
                            .and_then(|v| v.as_bool())
                            .unwrap_or(false),
                        method_obj
                            .get("responseStream")
                            .and_then(|v| v.as_bool())
                            .unwrap_or(false),
                        edition,
                    ),
                )?;
                ingest_options(root, method_id, method_obj);
            }
        }
        if let Some(Json::Object(nested)) = obj.get("nested") {
            for (child_name, child) in nested {
                ingest_node(root, service_id, child_name, child, edition)?;
            }
        }
        return Ok(());
    }

    if obj.contains_key("id") {
        // An extension field declared loose in a namespace.
        ingest_field(root, parent, name, obj, edition, None)?;
        return Ok(());
    }

    let ns = root.add(parent, Node::namespace(name, edition))?;
    ingest_options(root, ns, obj);
    if let Some(Json::Object(nested)) = obj.get("nested") {
        for (child_name, child) in nested {
            ingest_node(root, ns, child_name, child, edition)?;
        }
    }
    Ok(())
}

fn ingest_namespace_body(
    root: &mut Root,
    parent: NodeId,
    value: &Json,
    edition: Edition,
) -> Result<(), SchemaError> {
    let obj = as_object(value, "descriptor root")?;
    if parent == root.root_id() {
        ingest_options(root, parent, obj);
    }
    let edition = node_edition(obj, edition);
    if let Some(Json::Object(nested)) = obj.get("nested") {
        for (name, child) in nested {
            ingest_node(root, parent, name, child, edition)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
        syntax = "proto3";
        package demo;
        enum Color { COLOR_UNSPECIFIED = 0; COLOR_RED = 1; }
        message Item {
          string name = 1;
          repeated int32 sizes = 2;
          map<string, Color> colors = 3;
          oneof extra {
            string note = 4;
            int64 serial = 5;
          }
        }
        service Store {
          rpc Get (Item) returns (Item);
        }
    "#;

    #[test]
    fn json_round_trip_preserves_fields() {
        let root = Root::from_text(SOURCE).unwrap();
        let json = root.to_json();
        let reparsed = Root::from_json(&json).unwrap();

        let original = root.get("demo.Item").unwrap();
        let round_tripped = reparsed.get("demo.Item").unwrap();
        let a = root.node(original).as_type().unwrap();
        let b = reparsed.node(round_tripped).as_type().unwrap();
        assert_eq!(a.fields.len(), b.fields.len());
        for (&fa, &fb) in a.fields.iter().zip(&b.fields) {
            assert_eq!(root.node(fa).name(), reparsed.node(fb).name());
            let da = root.node(fa).as_field().unwrap();
            let db = reparsed.node(fb).as_field().unwrap();
            assert_eq!(da.id, db.id);
            assert_eq!(da.type_name, db.type_name);
            assert_eq!(da.rule, db.rule);
            assert_eq!(da.key_kind, db.key_kind);
        }
        // Oneof membership survives.
        assert_eq!(a.oneofs.len(), b.oneofs.len());
        let oa = root.node(a.oneofs[0]).as_oneof().unwrap();
        let ob = reparsed.node(b.oneofs[0]).as_oneof().unwrap();
        assert_eq!(oa.fields.len(), ob.fields.len());
        // Service methods survive.
        let service = reparsed.get("demo.Store").unwrap();
        let methods = &reparsed.node(service).as_service().unwrap().methods;
        assert_eq!(methods.len(), 1);
    }

    #[test]
    fn json_minimal_message() {
        let json: Json = serde_json::from_str(
            r#"{
              "nested": {
                "M": {
                  "fields": { "x": { "type": "int32", "id": 1 } }
                }
              }
            }"#,
        )
        .unwrap();
        let root = Root::from_json(&json).unwrap();
        let msg = root.get("M").unwrap();
        let field_id = root.node(msg).as_type().unwrap().fields[0];
        let field = root.node(field_id).as_field().unwrap();
        assert_eq!(field.id, 1);
        assert_eq!(field.type_name, "int32");
    }

    #[test]
    fn json_duplicate_id_rejected() {
        // serde_json object keys dedupe, so express the collision across a
        // plain field and a bound extension instead.
        let json: Json = serde_json::from_str(
            r#"{
              "nested": {
                "M": {
                  "fields": { "x": { "type": "int32", "id": 1 } }
                },
                "ext": { "type": "int32", "id": 1, "extend": "M" }
              }
            }"#,
        )
        .unwrap();
        let err = Root::from_json(&json).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateId { id: 1, .. }));
    }

    #[test]
    fn json_reserved_and_options() {
        let root = Root::from_text(
            r#"
            syntax = "proto2";
            message M {
              reserved 5 to 10, "legacy";
              optional int32 x = 1 [default = 7];
            }
            "#,
        )
        .unwrap();
        let json = root.to_json();
        let reparsed = Root::from_json(&json).unwrap();
        let msg = reparsed.get("M").unwrap();
        let data = reparsed.node(msg).as_type().unwrap();
        assert!(data.reserved.iter().any(|r| r.covers_id(7)));
        assert!(data.reserved.iter().any(|r| r.covers_name("legacy")));
        let field = reparsed.node(data.fields[0]).as_field().unwrap();
        assert_eq!(field.default, Some(Json::from(7)));
    }

    #[test]
    fn json_groups_round_trip() {
        let root = Root::from_text(
            r#"
            syntax = "proto2";
            message M {
              optional group Result = 1 { required string url = 1; }
            }
            "#,
        )
        .unwrap();
        let json = root.to_json();
        let reparsed = Root::from_json(&json).unwrap();
        let group = reparsed.get("M.Result").unwrap();
        assert!(reparsed.node(group).as_type().unwrap().is_group);
        let msg = reparsed.get("M").unwrap();
        let field = reparsed
            .node(reparsed.node(msg).as_type().unwrap().fields[0])
            .as_field()
            .unwrap();
        assert!(field.delimited);
    }
}
