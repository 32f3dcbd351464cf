//! Conversion between dynamic messages and plain JSON objects.
//!
//! `to_object` and `from_object` bridge the wire message shape and the
//! key/value representation external callers work with: defaults
//! substitution, 64-bit normalization, enum name mapping and byte-field
//! base64 handling, all steered by [ConvertOptions]. A handful of well-known
//! `google.protobuf` types get hand-written conversions layered in front of
//! the generic path because their JSON forms are not field-by-field.

use serde_json::{Map, Number, Value as Json};

use tagwire_wire::base64;

use crate::codec::{FieldPlan, FieldType};
use crate::error::SchemaError;
use crate::model::{NodeId, Rule, ScalarKind};
use crate::root::Root;
use crate::value::{DynamicMessage, MapKey, Value};

/// How 64-bit values render in plain objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LongMode {
    /// JSON number when exactly representable, decimal string otherwise.
    #[default]
    Auto,
    Number,
    String,
}

/// How enum values render in plain objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumMode {
    #[default]
    Number,
    /// Symbolic name, falling back to the number for unknown values.
    Name,
}

/// How bytes fields render in plain objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BytesMode {
    /// An array of byte numbers.
    #[default]
    Array,
    /// A base64 string.
    Base64,
}

/// Flags consumed by [Root::to_object] and [Root::from_object].
#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    pub longs: LongMode,
    pub enums: EnumMode,
    pub bytes: BytesMode,
    /// Include fields carrying their default value.
    pub defaults: bool,
    /// Force-initialize absent repeated fields to `[]`.
    pub arrays: bool,
    /// Force-initialize absent map fields to `{}`.
    pub objects: bool,
    /// Add a virtual property per oneof naming the populated member.
    pub oneofs: bool,
}

const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

impl Root {
    /// Render a message as a plain JSON object.
    pub fn to_object(
        &self,
        message: &DynamicMessage,
        opts: &ConvertOptions,
    ) -> Result<Json, SchemaError> {
        if let Some(result) = self.well_known_to_object(message, opts) {
            return result;
        }
        let plan = self.plan(message.type_id())?;
        let mut out = Map::new();
        for field in &plan.fields {
            match message.get_id(field.id) {
                Some(value) => {
                    out.insert(field.name.clone(), self.value_json(field, value, opts)?);
                }
                None => match field.rule {
                    Rule::Repeated if opts.arrays || opts.defaults => {
                        out.insert(field.name.clone(), Json::Array(Vec::new()));
                    }
                    Rule::Map if opts.objects || opts.defaults => {
                        out.insert(field.name.clone(), Json::Object(Map::new()));
                    }
                    Rule::Singular if opts.defaults && field.oneof.is_none() => {
                        out.insert(
                            field.name.clone(),
                            self.value_json(field, &field.default, opts)?,
                        );
                    }
                    _ => {}
                },
            }
        }
        if opts.oneofs {
            for (index, (name, members)) in plan.oneofs.iter().enumerate() {
                let set = plan
                    .fields
                    .iter()
                    .find(|f| f.oneof == Some(index) && message.get_id(f.id).is_some());
                if let Some(set) = set {
                    debug_assert!(members.contains(&set.id));
                    out.insert(name.clone(), Json::String(set.name.clone()));
                }
            }
        }
        Ok(Json::Object(out))
    }

    /// Build a message of the named type from a plain JSON object.
    pub fn from_object(
        &self,
        type_path: &str,
        object: &Json,
    ) -> Result<DynamicMessage, SchemaError> {
        let type_id = self
            .lookup_type(self.root_id(), type_path)
            .ok_or_else(|| SchemaError::NoSuchType(type_path.to_owned()))?;
        self.from_object_id(type_id, object)
    }

    pub(crate) fn from_object_id(
        &self,
        type_id: NodeId,
        object: &Json,
    ) -> Result<DynamicMessage, SchemaError> {
        if let Some(result) = self.well_known_from_object(type_id, object) {
            return result;
        }
        let plan = self.plan(type_id)?;
        let object = object.as_object().ok_or_else(|| SchemaError::TypeMismatch {
            field: self.fqn(type_id),
            expected: "object".to_owned(),
        })?;
        let mut message = DynamicMessage::new(type_id);
        for field in &plan.fields {
            let value = match object.get(&field.name).filter(|v| !v.is_null()) {
                Some(value) => value,
                None => continue,
            };
            let converted = match field.rule {
                Rule::Repeated => {
                    let items = value.as_array().ok_or_else(|| SchemaError::TypeMismatch {
                        field: field.name.clone(),
                        expected: "array".to_owned(),
                    })?;
                    Value::List(
                        items
                            .iter()
                            .map(|item| self.json_element(field, item))
                            .collect::<Result<_, _>>()?,
                    )
                }
                Rule::Map => {
                    let entries = value.as_object().ok_or_else(|| SchemaError::TypeMismatch {
                        field: field.name.clone(),
                        expected: "object".to_owned(),
                    })?;
                    let key_kind = field.key_kind.unwrap_or(ScalarKind::String);
                    let mut map = std::collections::BTreeMap::new();
                    for (key, entry) in entries {
                        map.insert(
                            parse_map_key(key_kind, key, &field.name)?,
                            self.json_element(field, entry)?,
                        );
                    }
                    Value::Map(map)
                }
                Rule::Singular => self.json_element(field, value)?,
            };
            if let Some(oneof) = field.oneof {
                for &sibling in &plan.oneofs[oneof].1 {
                    if sibling != field.id {
                        message.clear_id(sibling);
                    }
                }
            }
            message.set_id(field.id, converted);
        }
        Ok(message)
    }

    fn value_json(
        &self,
        field: &FieldPlan,
        value: &Value,
        opts: &ConvertOptions,
    ) -> Result<Json, SchemaError> {
        match (field.rule, value) {
            (Rule::Repeated, Value::List(items)) => Ok(Json::Array(
                items
                    .iter()
                    .map(|item| self.element_json(field, item, opts))
                    .collect::<Result<_, _>>()?,
            )),
            (Rule::Map, Value::Map(entries)) => {
                let mut out = Map::new();
                for (key, entry) in entries {
                    out.insert(map_key_string(key), self.element_json(field, entry, opts)?);
                }
                Ok(Json::Object(out))
            }
            _ => self.element_json(field, value, opts),
        }
    }

    fn element_json(
        &self,
        field: &FieldPlan,
        value: &Value,
        opts: &ConvertOptions,
    ) -> Result<Json, SchemaError> {
        Ok(match (field.ftype, value) {
            (FieldType::Scalar(ScalarKind::Bytes), Value::Bytes(data)) => match opts.bytes {
                BytesMode::Base64 => Json::String(base64::encode(data)),
                BytesMode::Array => {
                    Json::Array(data.iter().map(|&b| Json::from(b)).collect())
                }
            },
            (FieldType::Scalar(_), _) => scalar_json(value, opts),
            (FieldType::Enum(enum_id), _) => {
                let number = value.as_i32();
                match opts.enums {
                    EnumMode::Name => self
                        .enum_data(enum_id)
                        .and_then(|e| e.name_of(number))
                        .map(|name| Json::String(name.to_owned()))
                        .unwrap_or_else(|| Json::from(number)),
                    EnumMode::Number => Json::from(number),
                }
            }
            (FieldType::Message(_), Value::Message(sub)) => self.to_object(sub, opts)?,
            _ => {
                return Err(SchemaError::TypeMismatch {
                    field: field.name.clone(),
                    expected: "matching value".to_owned(),
                })
            }
        })
    }

    fn json_element(&self, field: &FieldPlan, value: &Json) -> Result<Value, SchemaError> {
        let mismatch = |expected: &str| SchemaError::TypeMismatch {
            field: field.name.clone(),
            expected: expected.to_owned(),
        };
        match field.ftype {
            FieldType::Scalar(kind) => json_scalar(kind, value).ok_or_else(|| mismatch(kind.as_str())),
            FieldType::Enum(enum_id) => {
                if let Some(name) = value.as_str() {
                    if let Some(number) = self.enum_data(enum_id).and_then(|e| e.value_of(name)) {
                        return Ok(Value::Enum(number));
                    }
                    // A numeric string still maps for open enums.
                    if let Ok(number) = name.parse::<i32>() {
                        return Ok(Value::Enum(number));
                    }
                    return Err(mismatch("enum value"));
                }
                value
                    .as_i64()
                    .filter(|&n| n >= i32::MIN as i64 && n <= i32::MAX as i64)
                    .map(|n| Value::Enum(n as i32))
                    .ok_or_else(|| mismatch("enum value"))
            }
            FieldType::Message(type_id) => {
                Ok(Value::Message(self.from_object_id(type_id, value)?))
            }
        }
    }

    fn well_known_to_object(
        &self,
        message: &DynamicMessage,
        opts: &ConvertOptions,
    ) -> Option<Result<Json, SchemaError>> {
        match self.fqn(message.type_id()).as_str() {
            "google.protobuf.Timestamp" => {
                let seconds = message.get_id(1).map(|v| v.as_i64()).unwrap_or(0);
                let nanos = message.get_id(2).map(|v| v.as_i32()).unwrap_or(0);
                Some(Ok(Json::String(format_timestamp(seconds, nanos))))
            }
            "google.protobuf.Duration" => {
                let seconds = message.get_id(1).map(|v| v.as_i64()).unwrap_or(0);
                let nanos = message.get_id(2).map(|v| v.as_i32()).unwrap_or(0);
                Some(Ok(Json::String(format_duration(seconds, nanos))))
            }
            "google.protobuf.Struct" => Some(self.struct_to_json(message)),
            "google.protobuf.Value" => Some(self.value_to_json(message)),
            "google.protobuf.ListValue" => Some(self.list_value_to_json(message)),
            "google.protobuf.Any" => Some(self.any_to_object(message, opts)),
            "google.protobuf.DoubleValue"
            | "google.protobuf.FloatValue"
            | "google.protobuf.Int64Value"
            | "google.protobuf.UInt64Value"
            | "google.protobuf.Int32Value"
            | "google.protobuf.UInt32Value"
            | "google.protobuf.BoolValue"
            | "google.protobuf.StringValue"
            | "google.protobuf.BytesValue" => {
                let plan = match self.plan(message.type_id()) {
                    Ok(plan) => plan,
                    Err(e) => return Some(Err(e)),
                };
                let field = plan.fields.first()?;
                let value = message.get_id(field.id).unwrap_or(&field.default);
                Some(self.element_json(field, value, opts))
            }
            _ => None,
        }
    }

    fn well_known_from_object(
        &self,
        type_id: NodeId,
        object: &Json,
    ) -> Option<Result<DynamicMessage, SchemaError>> {
        let fqn = self.fqn(type_id);
        match fqn.as_str() {
            "google.protobuf.Timestamp" => Some(
                object
                    .as_str()
                    .and_then(parse_timestamp)
                    .map(|(seconds, nanos)| {
                        let mut m = DynamicMessage::new(type_id);
                        m.set_id(1, Value::I64(seconds));
                        m.set_id(2, Value::I32(nanos));
                        m
                    })
                    .ok_or_else(|| SchemaError::TypeMismatch {
                        field: fqn.clone(),
                        expected: "RFC 3339 timestamp string".to_owned(),
                    }),
            ),
            "google.protobuf.Duration" => Some(
                object
                    .as_str()
                    .and_then(parse_duration)
                    .map(|(seconds, nanos)| {
                        let mut m = DynamicMessage::new(type_id);
                        m.set_id(1, Value::I64(seconds));
                        m.set_id(2, Value::I32(nanos));
                        m
                    })
                    .ok_or_else(|| SchemaError::TypeMismatch {
                        field: fqn.clone(),
                        expected: "duration string".to_owned(),
                    }),
            ),
            "google.protobuf.Struct" => Some(self.struct_from_json(type_id, object)),
            "google.protobuf.Value" => Some(self.value_from_json(type_id, object)),
            "google.protobuf.ListValue" => Some(self.list_value_from_json(type_id, object)),
            "google.protobuf.Any" => Some(self.any_from_object(type_id, object)),
            "google.protobuf.DoubleValue"
            | "google.protobuf.FloatValue"
            | "google.protobuf.Int64Value"
            | "google.protobuf.UInt64Value"
            | "google.protobuf.Int32Value"
            | "google.protobuf.UInt32Value"
            | "google.protobuf.BoolValue"
            | "google.protobuf.StringValue"
            | "google.protobuf.BytesValue" => {
                let plan = match self.plan(type_id) {
                    Ok(plan) => plan,
                    Err(e) => return Some(Err(e)),
                };
                let field = plan.fields.first()?.clone();
                Some(self.json_element(&field, object).map(|value| {
                    let mut m = DynamicMessage::new(type_id);
                    m.set_id(field.id, value);
                    m
                }))
            }
            _ => None,
        }
    }

    fn struct_to_json(&self, message: &DynamicMessage) -> Result<Json, SchemaError> {
        let mut out = Map::new();
        if let Some(Value::Map(entries)) = message.get_id(1) {
            for (key, entry) in entries {
                let inner = entry.as_message().ok_or(SchemaError::NotResolved)?;
                out.insert(map_key_string(key), self.value_to_json(inner)?);
            }
        }
        Ok(Json::Object(out))
    }

    fn value_to_json(&self, message: &DynamicMessage) -> Result<Json, SchemaError> {
        // Fields per struct.proto: 1 null, 2 number, 3 string, 4 bool,
        // 5 struct, 6 list.
        if let Some(value) = message.get_id(2) {
            let number = match value {
                Value::F64(v) => Number::from_f64(*v),
                other => Number::from_f64(other.as_i64() as f64),
            };
            return Ok(number.map(Json::Number).unwrap_or(Json::Null));
        }
        if let Some(value) = message.get_id(3) {
            return Ok(Json::String(value.as_str().to_owned()));
        }
        if let Some(value) = message.get_id(4) {
            return Ok(Json::Bool(value.as_bool()));
        }
        if let Some(Value::Message(inner)) = message.get_id(5) {
            return self.struct_to_json(inner);
        }
        if let Some(Value::Message(inner)) = message.get_id(6) {
            return self.list_value_to_json(inner);
        }
        Ok(Json::Null)
    }

    fn list_value_to_json(&self, message: &DynamicMessage) -> Result<Json, SchemaError> {
        let mut out = Vec::new();
        if let Some(Value::List(items)) = message.get_id(1) {
            for item in items {
                let inner = item.as_message().ok_or(SchemaError::NotResolved)?;
                out.push(self.value_to_json(inner)?);
            }
        }
        Ok(Json::Array(out))
    }

    fn struct_from_json(&self, type_id: NodeId, object: &Json) -> Result<DynamicMessage, SchemaError> {
        let value_type = self
            .lookup_type(self.root_id(), "google.protobuf.Value")
            .ok_or_else(|| SchemaError::NoSuchType("google.protobuf.Value".to_owned()))?;
        let entries = object.as_object().ok_or_else(|| SchemaError::TypeMismatch {
            field: self.fqn(type_id),
            expected: "object".to_owned(),
        })?;
        let mut map = std::collections::BTreeMap::new();
        for (key, entry) in entries {
            map.insert(
                MapKey::String(key.clone()),
                Value::Message(self.value_from_json(value_type, entry)?),
            );
        }
        let mut message = DynamicMessage::new(type_id);
        message.set_id(1, Value::Map(map));
        Ok(message)
    }

    fn value_from_json(&self, type_id: NodeId, value: &Json) -> Result<DynamicMessage, SchemaError> {
        let mut message = DynamicMessage::new(type_id);
        match value {
            Json::Null => message.set_id(1, Value::Enum(0)),
            Json::Number(n) => message.set_id(2, Value::F64(n.as_f64().unwrap_or(0.0))),
            Json::String(s) => message.set_id(3, Value::String(s.clone())),
            Json::Bool(b) => message.set_id(4, Value::Bool(*b)),
            Json::Object(_) => {
                let struct_type = self
                    .lookup_type(self.root_id(), "google.protobuf.Struct")
                    .ok_or_else(|| SchemaError::NoSuchType("google.protobuf.Struct".to_owned()))?;
                message.set_id(5, Value::Message(self.struct_from_json(struct_type, value)?));
            }
            Json::Array(_) => {
                let list_type = self
                    .lookup_type(self.root_id(), "google.protobuf.ListValue")
                    .ok_or_else(|| {
                        SchemaError::NoSuchType("google.protobuf.ListValue".to_owned())
                    })?;
                message.set_id(6, Value::Message(self.list_value_from_json(list_type, value)?));
            }
        }
        Ok(message)
    }

    fn list_value_from_json(
        &self,
        type_id: NodeId,
        value: &Json,
    ) -> Result<DynamicMessage, SchemaError> {
        let value_type = self
            .lookup_type(self.root_id(), "google.protobuf.Value")
            .ok_or_else(|| SchemaError::NoSuchType("google.protobuf.Value".to_owned()))?;
        let items = value.as_array().ok_or_else(|| SchemaError::TypeMismatch {
            field: self.fqn(type_id),
            expected: "array".to_owned(),
        })?;
        let mut out = Vec::new();
        for item in items {
            out.push(Value::Message(self.value_from_json(value_type, item)?));
        }
        let mut message = DynamicMessage::new(type_id);
        message.set_id(1, Value::List(out));
        Ok(message)
    }

    fn any_to_object(
        &self,
        message: &DynamicMessage,
        opts: &ConvertOptions,
    ) -> Result<Json, SchemaError> {
        let type_url = message.get_id(1).map(|v| v.as_str().to_owned()).unwrap_or_default();
        let payload = message.get_id(2).map(|v| v.as_bytes().to_vec()).unwrap_or_default();
        let inner_name = type_url.rsplit('/').next().unwrap_or("");
        if let Some(inner_type) = self.lookup_type(self.root_id(), inner_name) {
            let inner = self.decode_id(inner_type, &payload)?;
            if let Json::Object(mut fields) = self.to_object(&inner, opts)? {
                fields.insert("@type".to_owned(), Json::String(type_url));
                return Ok(Json::Object(fields));
            }
        }
        // Unknown payload type: fall back to the raw representation.
        let mut out = Map::new();
        out.insert("type_url".to_owned(), Json::String(type_url));
        out.insert("value".to_owned(), Json::String(base64::encode(&payload)));
        Ok(Json::Object(out))
    }

    fn any_from_object(&self, type_id: NodeId, object: &Json) -> Result<DynamicMessage, SchemaError> {
        let fields = object.as_object().ok_or_else(|| SchemaError::TypeMismatch {
            field: self.fqn(type_id),
            expected: "object".to_owned(),
        })?;
        let mut message = DynamicMessage::new(type_id);
        if let Some(type_url) = fields.get("@type").and_then(|v| v.as_str()) {
            let inner_name = type_url.rsplit('/').next().unwrap_or("");
            let inner_type = self
                .lookup_type(self.root_id(), inner_name)
                .ok_or_else(|| SchemaError::NoSuchType(inner_name.to_owned()))?;
            let mut inner = fields.clone();
            inner.remove("@type");
            let decoded = self.from_object_id(inner_type, &Json::Object(inner))?;
            message.set_id(1, Value::String(type_url.to_owned()));
            message.set_id(2, Value::Bytes(self.encode(&decoded)?));
            return Ok(message);
        }
        if let Some(type_url) = fields.get("type_url").and_then(|v| v.as_str()) {
            message.set_id(1, Value::String(type_url.to_owned()));
        }
        if let Some(payload) = fields.get("value").and_then(|v| v.as_str()) {
            message.set_id(2, Value::Bytes(base64::decode(payload)?));
        }
        Ok(message)
    }
}

fn scalar_json(value: &Value, opts: &ConvertOptions) -> Json {
    match value {
        Value::Bool(v) => Json::Bool(*v),
        Value::I32(v) | Value::Enum(v) => Json::from(*v),
        Value::U32(v) => Json::from(*v),
        Value::I64(v) => match opts.longs {
            LongMode::String => Json::String(v.to_string()),
            LongMode::Number => Json::from(*v),
            LongMode::Auto => {
                if v.unsigned_abs() <= MAX_SAFE_INTEGER {
                    Json::from(*v)
                } else {
                    Json::String(v.to_string())
                }
            }
        },
        Value::U64(v) => match opts.longs {
            LongMode::String => Json::String(v.to_string()),
            LongMode::Number => Json::from(*v),
            LongMode::Auto => {
                if *v <= MAX_SAFE_INTEGER {
                    Json::from(*v)
                } else {
                    Json::String(v.to_string())
                }
            }
        },
        Value::F32(v) => float_json(*v as f64),
        Value::F64(v) => float_json(*v),
        Value::String(v) => Json::String(v.clone()),
        Value::Bytes(v) => Json::Array(v.iter().map(|&b| Json::from(b)).collect()),
        _ => Json::Null,
    }
}

fn float_json(value: f64) -> Json {
    if value.is_nan() {
        Json::String("NaN".to_owned())
    } else if value == f64::INFINITY {
        Json::String("Infinity".to_owned())
    } else if value == f64::NEG_INFINITY {
        Json::String("-Infinity".to_owned())
    } else {
        Number::from_f64(value).map(Json::Number).unwrap_or(Json::Null)
    }
}

fn json_f64(value: &Json) -> Option<f64> {
    match value {
        Json::Number(n) => n.as_f64(),
        Json::String(s) => match s.as_str() {
            "NaN" => Some(f64::NAN),
            "Infinity" => Some(f64::INFINITY),
            "-Infinity" => Some(f64::NEG_INFINITY),
            other => other.parse().ok(),
        },
        _ => None,
    }
}

fn json_i64(value: &Json) -> Option<i64> {
    match value {
        Json::Number(n) => n.as_i64(),
        Json::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn json_u64(value: &Json) -> Option<u64> {
    match value {
        Json::Number(n) => n.as_u64(),
        Json::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn json_scalar(kind: ScalarKind, value: &Json) -> Option<Value> {
    match kind {
        ScalarKind::Bool => value.as_bool().map(Value::Bool),
        ScalarKind::Int32 | ScalarKind::Sint32 | ScalarKind::Sfixed32 => value
            .as_i64()
            .filter(|&n| n >= i32::MIN as i64 && n <= i32::MAX as i64)
            .map(|n| Value::I32(n as i32)),
        ScalarKind::Uint32 | ScalarKind::Fixed32 => value
            .as_u64()
            .filter(|&n| n <= u32::MAX as u64)
            .map(|n| Value::U32(n as u32)),
        ScalarKind::Int64 | ScalarKind::Sint64 | ScalarKind::Sfixed64 => {
            json_i64(value).map(Value::I64)
        }
        ScalarKind::Uint64 | ScalarKind::Fixed64 => json_u64(value).map(Value::U64),
        ScalarKind::Float => json_f64(value).map(|v| Value::F32(v as f32)),
        ScalarKind::Double => json_f64(value).map(Value::F64),
        ScalarKind::String => value.as_str().map(|s| Value::String(s.to_owned())),
        ScalarKind::Bytes => match value {
            Json::String(s) => base64::decode(s).ok().map(Value::Bytes),
            Json::Array(items) => items
                .iter()
                .map(|item| item.as_u64().filter(|&b| b <= 255).map(|b| b as u8))
                .collect::<Option<Vec<u8>>>()
                .map(Value::Bytes),
            _ => None,
        },
    }
}

fn map_key_string(key: &MapKey) -> String {
    match key {
        MapKey::Bool(v) => v.to_string(),
        MapKey::I32(v) => v.to_string(),
        MapKey::U32(v) => v.to_string(),
        MapKey::I64(v) => v.to_string(),
        MapKey::U64(v) => v.to_string(),
        MapKey::String(v) => v.clone(),
    }
}

fn parse_map_key(kind: ScalarKind, key: &str, field: &str) -> Result<MapKey, SchemaError> {
    let mismatch = || SchemaError::TypeMismatch {
        field: field.to_owned(),
        expected: format!("{} map key", kind.as_str()),
    };
    match kind {
        ScalarKind::Bool => match key {
            "true" => Ok(MapKey::Bool(true)),
            "false" => Ok(MapKey::Bool(false)),
            _ => Err(mismatch()),
        },
        ScalarKind::Int32 | ScalarKind::Sint32 | ScalarKind::Sfixed32 => {
            key.parse().map(MapKey::I32).map_err(|_| mismatch())
        }
        ScalarKind::Uint32 | ScalarKind::Fixed32 => {
            key.parse().map(MapKey::U32).map_err(|_| mismatch())
        }
        ScalarKind::Int64 | ScalarKind::Sint64 | ScalarKind::Sfixed64 => {
            key.parse().map(MapKey::I64).map_err(|_| mismatch())
        }
        ScalarKind::Uint64 | ScalarKind::Fixed64 => {
            key.parse().map(MapKey::U64).map_err(|_| mismatch())
        }
        ScalarKind::String => Ok(MapKey::String(key.to_owned())),
        _ => Err(mismatch()),
    }
}

const SECONDS_PER_DAY: i64 = 86_400;

/// Days since 1970-01-01 for a proleptic Gregorian date.
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let year = if month <= 2 { year - 1 } else { year };
    let era = if year >= 0 { year } else { year - 399 } / 400;
    let yoe = year - era * 400;
    let month = month as i64;
    let doy = (153 * (if month > 2 { month - 3 } else { month + 9 }) + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let year = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    (if month <= 2 { year + 1 } else { year }, month, day)
}

fn format_nanos(nanos: u32) -> String {
    if nanos == 0 {
        return String::new();
    }
    let mut fraction = format!(".{:09}", nanos);
    while fraction.ends_with('0') {
        fraction.pop();
    }
    fraction
}

fn format_timestamp(seconds: i64, nanos: i32) -> String {
    let days = seconds.div_euclid(SECONDS_PER_DAY);
    let rem = seconds.rem_euclid(SECONDS_PER_DAY);
    let (year, month, day) = civil_from_days(days);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}{}Z",
        year,
        month,
        day,
        rem / 3600,
        rem / 60 % 60,
        rem % 60,
        format_nanos(nanos.max(0) as u32)
    )
}

fn parse_timestamp(text: &str) -> Option<(i64, i32)> {
    let text = text.strip_suffix('Z').unwrap_or(text);
    let (date, time) = text.split_once('T')?;
    let mut date_parts = date.splitn(3, '-');
    let year: i64 = date_parts.next()?.parse().ok()?;
    let month: u32 = date_parts.next()?.parse().ok()?;
    let day: u32 = date_parts.next()?.parse().ok()?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    let (clock, fraction) = match time.split_once('.') {
        Some((clock, fraction)) => (clock, Some(fraction)),
        None => (time, None),
    };
    let mut clock_parts = clock.splitn(3, ':');
    let hours: i64 = clock_parts.next()?.parse().ok()?;
    let minutes: i64 = clock_parts.next()?.parse().ok()?;
    let seconds: i64 = clock_parts.next()?.parse().ok()?;
    if hours > 23 || minutes > 59 || seconds > 59 {
        return None;
    }
    let nanos = match fraction {
        Some(fraction) if !fraction.is_empty() && fraction.len() <= 9 => {
            let digits: u32 = fraction.parse().ok()?;
            digits * 10u32.pow(9 - fraction.len() as u32)
        }
        Some(_) => return None,
        None => 0,
    };
    let total = days_from_civil(year, month, day) * SECONDS_PER_DAY
        + hours * 3600
        + minutes * 60
        + seconds;
    Some((total, nanos as i32))
}

fn format_duration(seconds: i64, nanos: i32) -> String {
    let negative = seconds < 0 || nanos < 0;
    let sign = if negative { "-" } else { "" };
    format!(
        "{}{}{}s",
        sign,
        seconds.unsigned_abs(),
        format_nanos(nanos.unsigned_abs())
    )
}

fn parse_duration(text: &str) -> Option<(i64, i32)> {
    let text = text.strip_suffix('s')?;
    let (negative, text) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (whole, fraction) = match text.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (text, None),
    };
    let seconds: i64 = whole.parse().ok()?;
    let nanos = match fraction {
        Some(fraction) if !fraction.is_empty() && fraction.len() <= 9 => {
            let digits: u32 = fraction.parse().ok()?;
            digits * 10u32.pow(9 - fraction.len() as u32)
        }
        Some(_) => return None,
        None => 0,
    };
    if negative {
        Some((-seconds, -(nanos as i32)))
    } else {
        Some((seconds, nanos as i32))
    }
}
