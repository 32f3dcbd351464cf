//! Per-type codec plans and the encode/decode interpreters.
//!
//! A [TypePlan] is compiled from a resolved `Type` on first use and cached
//! on the [Root]; any mutation of the tree drops the cache. The plan holds
//! everything the interpreters need — field order, wire types, packing,
//! presence, defaults and sub-type handles — so encoding and decoding never
//! consult the raw node graph.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use tagwire_wire::{
    Reader, Writer, WIRE_END_GROUP, WIRE_LEN, WIRE_START_GROUP, WIRE_VARINT,
};

use crate::error::SchemaError;
use crate::features::{Edition, FieldPresence};
use crate::model::{NodeId, NodeKind, Rule, ScalarKind};
use crate::root::Root;
use crate::value::{DynamicMessage, MapKey, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FieldType {
    Scalar(ScalarKind),
    Enum(NodeId),
    Message(NodeId),
}

impl FieldType {
    fn wire_type(self) -> u32 {
        match self {
            FieldType::Scalar(kind) => kind.wire_type(),
            FieldType::Enum(_) => WIRE_VARINT,
            FieldType::Message(_) => WIRE_LEN,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FieldPlan {
    pub id: u32,
    pub name: String,
    pub rule: Rule,
    pub ftype: FieldType,
    pub key_kind: Option<ScalarKind>,
    pub packed: bool,
    pub delimited: bool,
    pub presence: FieldPresence,
    pub oneof: Option<usize>,
    pub default: Value,
}

/// The compiled encode/decode layout of one message type.
#[derive(Debug)]
pub(crate) struct TypePlan {
    /// Ascending by field id.
    pub fields: Vec<FieldPlan>,
    pub by_id: HashMap<u32, usize>,
    /// (oneof name, member field ids), for exclusivity bookkeeping.
    pub oneofs: Vec<(String, Vec<u32>)>,
}

fn zero_value(kind: ScalarKind) -> Value {
    match kind {
        ScalarKind::Bool => Value::Bool(false),
        ScalarKind::Int32 | ScalarKind::Sint32 | ScalarKind::Sfixed32 => Value::I32(0),
        ScalarKind::Uint32 | ScalarKind::Fixed32 => Value::U32(0),
        ScalarKind::Int64 | ScalarKind::Sint64 | ScalarKind::Sfixed64 => Value::I64(0),
        ScalarKind::Uint64 | ScalarKind::Fixed64 => Value::U64(0),
        ScalarKind::Float => Value::F32(0.0),
        ScalarKind::Double => Value::F64(0.0),
        ScalarKind::String => Value::String(String::new()),
        ScalarKind::Bytes => Value::Bytes(Vec::new()),
    }
}

fn scalar_default(kind: ScalarKind, declared: Option<&serde_json::Value>) -> Value {
    let declared = match declared {
        Some(v) => v,
        None => return zero_value(kind),
    };
    match kind {
        ScalarKind::Bool => Value::Bool(declared.as_bool().unwrap_or(false)),
        ScalarKind::Int32 | ScalarKind::Sint32 | ScalarKind::Sfixed32 => {
            Value::I32(declared.as_i64().unwrap_or(0) as i32)
        }
        ScalarKind::Uint32 | ScalarKind::Fixed32 => {
            Value::U32(declared.as_u64().unwrap_or(0) as u32)
        }
        ScalarKind::Int64 | ScalarKind::Sint64 | ScalarKind::Sfixed64 => {
            Value::I64(declared.as_i64().unwrap_or(0))
        }
        ScalarKind::Uint64 | ScalarKind::Fixed64 => Value::U64(declared.as_u64().unwrap_or(0)),
        ScalarKind::Float => Value::F32(float_default(declared) as f32),
        ScalarKind::Double => Value::F64(float_default(declared)),
        ScalarKind::String => {
            Value::String(declared.as_str().unwrap_or_default().to_owned())
        }
        ScalarKind::Bytes => Value::Bytes(
            declared
                .as_str()
                .map(|s| s.as_bytes().to_vec())
                .unwrap_or_default(),
        ),
    }
}

fn float_default(declared: &serde_json::Value) -> f64 {
    match declared {
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        serde_json::Value::String(s) => match s.as_str() {
            "inf" => f64::INFINITY,
            "-inf" => f64::NEG_INFINITY,
            "nan" => f64::NAN,
            other => other.parse().unwrap_or(0.0),
        },
        _ => 0.0,
    }
}

impl Root {
    pub(crate) fn plan(&self, type_id: NodeId) -> Result<Rc<TypePlan>, SchemaError> {
        if let Some(plan) = self.plans.borrow().get(&type_id) {
            return Ok(plan.clone());
        }
        let plan = Rc::new(self.build_plan(type_id)?);
        self.plans.borrow_mut().insert(type_id, plan.clone());
        Ok(plan)
    }

    fn build_plan(&self, type_id: NodeId) -> Result<TypePlan, SchemaError> {
        let data = self
            .type_data(type_id)
            .ok_or_else(|| SchemaError::NoSuchType(self.fqn(type_id)))?;

        let mut oneofs: Vec<(String, Vec<u32>)> = Vec::new();
        let mut oneof_index: HashMap<NodeId, usize> = HashMap::new();
        for &oneof_id in &data.oneofs {
            oneof_index.insert(oneof_id, oneofs.len());
            oneofs.push((self.node(oneof_id).name().to_owned(), Vec::new()));
        }

        let mut fields = Vec::new();
        for &field_id in data.fields.iter().chain(&data.extension_fields) {
            let field = match self.node(field_id).as_field() {
                Some(f) => f,
                None => continue,
            };
            let ftype = match ScalarKind::parse(&field.type_name) {
                Some(kind) => FieldType::Scalar(kind),
                None => {
                    let target = field.resolved_type.ok_or(SchemaError::NotResolved)?;
                    match self.node(target).kind {
                        NodeKind::Enum(_) => FieldType::Enum(target),
                        NodeKind::Type(_) => FieldType::Message(target),
                        _ => {
                            return Err(SchemaError::UnresolvedType {
                                type_name: field.type_name.clone(),
                                owner: self.fqn(field_id),
                            })
                        }
                    }
                }
            };
            let features = self.features(field_id);
            let packed = field.rule == Rule::Repeated
                && matches!(ftype, FieldType::Scalar(k) if k.packable())
                || field.rule == Rule::Repeated && matches!(ftype, FieldType::Enum(_));
            let packed = packed
                && field.packed.unwrap_or(
                    features.repeated_encoding == crate::features::RepeatedEncoding::Packed,
                );
            let delimited = field.delimited
                || (matches!(ftype, FieldType::Message(_))
                    && features.message_encoding == crate::features::MessageEncoding::Delimited);
            let presence = match features.field_presence {
                FieldPresence::LegacyRequired => FieldPresence::LegacyRequired,
                // Message fields and oneof members always track presence.
                _ if matches!(ftype, FieldType::Message(_)) || field.oneof.is_some() => {
                    FieldPresence::Explicit
                }
                other => other,
            };
            let default = match ftype {
                FieldType::Scalar(kind) => scalar_default(kind, field.default.as_ref()),
                FieldType::Enum(enum_id) => {
                    Value::Enum(self.enum_default(enum_id, field.default.as_ref(), field_id))
                }
                FieldType::Message(target) => Value::Message(DynamicMessage::new(target)),
            };
            fields.push(FieldPlan {
                id: field.id,
                name: self.node(field_id).name().to_owned(),
                rule: field.rule,
                ftype,
                key_kind: field.key_kind,
                packed,
                delimited,
                presence,
                oneof: field.oneof.and_then(|o| oneof_index.get(&o).copied()),
                default,
            });
        }

        fields.sort_by_key(|f| f.id);
        let mut by_id = HashMap::new();
        for (index, field) in fields.iter().enumerate() {
            by_id.insert(field.id, index);
            if let Some(oneof) = field.oneof {
                oneofs[oneof].1.push(field.id);
            }
        }
        Ok(TypePlan {
            fields,
            by_id,
            oneofs,
        })
    }

    fn enum_default(
        &self,
        enum_id: NodeId,
        declared: Option<&serde_json::Value>,
        field_id: NodeId,
    ) -> i32 {
        if let Some(declared) = declared {
            if let Some(name) = declared.as_str() {
                if let Some(value) = self.enum_data(enum_id).and_then(|e| e.value_of(name)) {
                    return value;
                }
            }
            if let Some(number) = declared.as_i64() {
                return number as i32;
            }
        }
        if self.node(field_id).common.edition == Edition::Proto2 {
            self.enum_data(enum_id)
                .and_then(|e| e.values.first().map(|&(_, v)| v))
                .unwrap_or(0)
        } else {
            0
        }
    }

    /// Encode a message to its wire form.
    pub fn encode(&self, message: &DynamicMessage) -> Result<Vec<u8>, SchemaError> {
        let mut writer = Writer::new();
        self.encode_to(message, &mut writer)?;
        Ok(writer.finish())
    }

    /// Encode into an existing writer, e.g. inside a caller-managed fork.
    pub fn encode_to(
        &self,
        message: &DynamicMessage,
        writer: &mut Writer,
    ) -> Result<(), SchemaError> {
        let plan = self.plan(message.type_id())?;
        for field in &plan.fields {
            let value = match message.get_id(field.id) {
                Some(value) => value,
                None => continue,
            };
            match field.rule {
                Rule::Map => self.encode_map(field, value, writer)?,
                Rule::Repeated => self.encode_repeated(field, value, writer)?,
                Rule::Singular => {
                    if field.presence == FieldPresence::Implicit && *value == field.default {
                        continue;
                    }
                    self.encode_single(field, value, writer)?;
                }
            }
        }
        Ok(())
    }

    fn encode_map(
        &self,
        field: &FieldPlan,
        value: &Value,
        writer: &mut Writer,
    ) -> Result<(), SchemaError> {
        let entries = match value {
            Value::Map(entries) => entries,
            _ => {
                return Err(SchemaError::TypeMismatch {
                    field: field.name.clone(),
                    expected: "map".to_owned(),
                })
            }
        };
        let key_kind = field.key_kind.unwrap_or(ScalarKind::String);
        for (key, entry_value) in entries {
            writer.tag(field.id, WIRE_LEN);
            writer.fork();
            writer.tag(1, key_kind.wire_type());
            write_map_key(key_kind, key, writer, &field.name)?;
            self.encode_element(field, 2, entry_value, writer)?;
            writer.ldelim();
        }
        Ok(())
    }

    fn encode_repeated(
        &self,
        field: &FieldPlan,
        value: &Value,
        writer: &mut Writer,
    ) -> Result<(), SchemaError> {
        let items = match value {
            Value::List(items) => items,
            _ => {
                return Err(SchemaError::TypeMismatch {
                    field: field.name.clone(),
                    expected: "array".to_owned(),
                })
            }
        };
        if items.is_empty() {
            return Ok(());
        }
        if field.packed {
            // One length-delimited blob covering every element.
            writer.tag(field.id, WIRE_LEN);
            writer.fork();
            for item in items {
                match field.ftype {
                    FieldType::Scalar(kind) => write_scalar(kind, item, writer, &field.name)?,
                    FieldType::Enum(_) => writer.int32(enum_number(item, &field.name)?),
                    FieldType::Message(_) => {
                        return Err(SchemaError::TypeMismatch {
                            field: field.name.clone(),
                            expected: "packable scalar".to_owned(),
                        })
                    }
                }
            }
            writer.ldelim();
            return Ok(());
        }
        for item in items {
            self.encode_single(field, item, writer)?;
        }
        Ok(())
    }

    fn encode_single(
        &self,
        field: &FieldPlan,
        value: &Value,
        writer: &mut Writer,
    ) -> Result<(), SchemaError> {
        if field.delimited {
            if let FieldType::Message(_) = field.ftype {
                let sub = value.as_message().ok_or_else(|| SchemaError::TypeMismatch {
                    field: field.name.clone(),
                    expected: "message".to_owned(),
                })?;
                writer.tag(field.id, WIRE_START_GROUP);
                self.encode_to(sub, writer)?;
                writer.tag(field.id, WIRE_END_GROUP);
                return Ok(());
            }
        }
        self.encode_element(field, field.id, value, writer)
    }

    fn encode_element(
        &self,
        field: &FieldPlan,
        tag_id: u32,
        value: &Value,
        writer: &mut Writer,
    ) -> Result<(), SchemaError> {
        match field.ftype {
            FieldType::Scalar(kind) => {
                writer.tag(tag_id, kind.wire_type());
                write_scalar(kind, value, writer, &field.name)
            }
            FieldType::Enum(_) => {
                writer.tag(tag_id, WIRE_VARINT);
                writer.int32(enum_number(value, &field.name)?);
                Ok(())
            }
            FieldType::Message(_) => {
                let sub = value.as_message().ok_or_else(|| SchemaError::TypeMismatch {
                    field: field.name.clone(),
                    expected: "message".to_owned(),
                })?;
                writer.tag(tag_id, WIRE_LEN);
                writer.fork();
                self.encode_to(sub, writer)?;
                writer.ldelim();
                Ok(())
            }
        }
    }

    /// Decode the wire form of the named type.
    pub fn decode(&self, type_path: &str, buf: &[u8]) -> Result<DynamicMessage, SchemaError> {
        let type_id = self
            .lookup_type(self.root_id(), type_path)
            .ok_or_else(|| SchemaError::NoSuchType(type_path.to_owned()))?;
        self.decode_id(type_id, buf)
    }

    pub(crate) fn decode_id(&self, type_id: NodeId, buf: &[u8]) -> Result<DynamicMessage, SchemaError> {
        let mut reader = Reader::new(buf);
        self.decode_message(type_id, &mut reader, None)
    }

    fn decode_message(
        &self,
        type_id: NodeId,
        reader: &mut Reader,
        end_group: Option<u32>,
    ) -> Result<DynamicMessage, SchemaError> {
        let plan = self.plan(type_id)?;
        let mut message = DynamicMessage::new(type_id);
        loop {
            if end_group.is_none() && reader.is_empty() {
                break;
            }
            let tag = reader.uint32()?;
            let field_id = tag >> 3;
            let wire_type = tag & 7;
            if wire_type == WIRE_END_GROUP {
                match end_group {
                    Some(expected) if expected == field_id => break,
                    Some(expected) => {
                        return Err(SchemaError::GroupEnd {
                            expected,
                            found: field_id,
                        })
                    }
                    None => {
                        return Err(tagwire_wire::WireError::InvalidWireType(WIRE_END_GROUP).into())
                    }
                }
            }
            match plan.by_id.get(&field_id) {
                None => reader.skip_type(wire_type)?,
                Some(&index) => {
                    let field = &plan.fields[index];
                    self.decode_field(field, &plan, &mut message, reader, wire_type)?;
                }
            }
        }
        for field in plan.fields.iter() {
            if field.presence == FieldPresence::LegacyRequired
                && message.get_id(field.id).is_none()
            {
                return Err(SchemaError::MissingRequired {
                    field: field.name.clone(),
                    type_name: self.fqn(type_id),
                });
            }
        }
        Ok(message)
    }

    fn decode_field(
        &self,
        field: &FieldPlan,
        plan: &TypePlan,
        message: &mut DynamicMessage,
        reader: &mut Reader,
        wire_type: u32,
    ) -> Result<(), SchemaError> {
        match field.rule {
            Rule::Map => {
                let length = reader.uint32()? as usize;
                let mut entry = reader.sub(length)?;
                let key_kind = field.key_kind.unwrap_or(ScalarKind::String);
                let mut key = None;
                let mut value = None;
                while !entry.is_empty() {
                    let entry_tag = entry.uint32()?;
                    match entry_tag >> 3 {
                        1 => key = Some(read_scalar(key_kind, &mut entry)?),
                        2 => value = Some(self.read_element(field, &mut entry)?),
                        _ => entry.skip_type(entry_tag & 7)?,
                    }
                }
                let key = map_key(key.unwrap_or_else(|| zero_value(key_kind)), &field.name)?;
                let value = value.unwrap_or_else(|| self.element_default(field));
                if !matches!(message.get_id(field.id), Some(Value::Map(_))) {
                    message.set_id(field.id, Value::Map(BTreeMap::new()));
                }
                if let Some(Value::Map(ref mut entries)) = message_get_mut(message, field.id) {
                    entries.insert(key, value);
                }
                Ok(())
            }
            Rule::Repeated => {
                let packable = matches!(field.ftype, FieldType::Scalar(k) if k.packable() && k.wire_type() != WIRE_LEN)
                    || matches!(field.ftype, FieldType::Enum(_));
                let mut items = Vec::new();
                if wire_type == WIRE_LEN && packable {
                    let length = reader.uint32()? as usize;
                    let mut packed = reader.sub(length)?;
                    while !packed.is_empty() {
                        items.push(self.read_packed_element(field, &mut packed)?);
                    }
                } else {
                    items.push(self.read_single(field, reader)?);
                }
                match message_get_mut(message, field.id) {
                    Some(Value::List(ref mut existing)) => existing.extend(items),
                    _ => message.set_id(field.id, Value::List(items)),
                }
                Ok(())
            }
            Rule::Singular => {
                let value = self.read_single(field, reader)?;
                if let Some(oneof) = field.oneof {
                    for &sibling in &plan.oneofs[oneof].1 {
                        if sibling != field.id {
                            message.clear_id(sibling);
                        }
                    }
                }
                message.set_id(field.id, value);
                Ok(())
            }
        }
    }

    fn element_default(&self, field: &FieldPlan) -> Value {
        match field.ftype {
            FieldType::Scalar(kind) => zero_value(kind),
            FieldType::Enum(_) => Value::Enum(0),
            FieldType::Message(type_id) => Value::Message(DynamicMessage::new(type_id)),
        }
    }

    fn read_packed_element(
        &self,
        field: &FieldPlan,
        reader: &mut Reader,
    ) -> Result<Value, SchemaError> {
        match field.ftype {
            FieldType::Scalar(kind) => read_scalar(kind, reader),
            FieldType::Enum(_) => Ok(Value::Enum(reader.int32()?)),
            FieldType::Message(_) => Err(SchemaError::TypeMismatch {
                field: field.name.clone(),
                expected: "packable scalar".to_owned(),
            }),
        }
    }

    fn read_single(&self, field: &FieldPlan, reader: &mut Reader) -> Result<Value, SchemaError> {
        self.read_element(field, reader)
    }

    fn read_element(&self, field: &FieldPlan, reader: &mut Reader) -> Result<Value, SchemaError> {
        match field.ftype {
            FieldType::Scalar(kind) => read_scalar(kind, reader),
            FieldType::Enum(_) => Ok(Value::Enum(reader.int32()?)),
            FieldType::Message(type_id) => {
                if field.delimited {
                    let sub = self.decode_message(type_id, reader, Some(field.id))?;
                    Ok(Value::Message(sub))
                } else {
                    let length = reader.uint32()? as usize;
                    let mut sub = reader.sub(length)?;
                    Ok(Value::Message(self.decode_message(type_id, &mut sub, None)?))
                }
            }
        }
    }
}

fn message_get_mut(message: &mut DynamicMessage, id: u32) -> Option<&mut Value> {
    // DynamicMessage keeps its map private; route through a take/put pair.
    message.value_mut(id)
}

fn enum_number(value: &Value, field: &str) -> Result<i32, SchemaError> {
    match *value {
        Value::Enum(v) | Value::I32(v) => Ok(v),
        _ => Err(SchemaError::TypeMismatch {
            field: field.to_owned(),
            expected: "enum value".to_owned(),
        }),
    }
}

fn write_scalar(
    kind: ScalarKind,
    value: &Value,
    writer: &mut Writer,
    field: &str,
) -> Result<(), SchemaError> {
    let mismatch = || SchemaError::TypeMismatch {
        field: field.to_owned(),
        expected: kind.as_str().to_owned(),
    };
    match (kind, value) {
        (ScalarKind::Bool, Value::Bool(v)) => writer.bool(*v),
        (ScalarKind::Int32, Value::I32(v)) => writer.int32(*v),
        (ScalarKind::Sint32, Value::I32(v)) => writer.sint32(*v),
        (ScalarKind::Sfixed32, Value::I32(v)) => writer.sfixed32(*v),
        (ScalarKind::Uint32, Value::U32(v)) => writer.uint32(*v),
        (ScalarKind::Fixed32, Value::U32(v)) => writer.fixed32(*v),
        (ScalarKind::Int64, Value::I64(v)) => writer.int64(*v),
        (ScalarKind::Sint64, Value::I64(v)) => writer.sint64(*v),
        (ScalarKind::Sfixed64, Value::I64(v)) => writer.sfixed64(*v),
        (ScalarKind::Uint64, Value::U64(v)) => writer.uint64(*v),
        (ScalarKind::Fixed64, Value::U64(v)) => writer.fixed64(*v),
        (ScalarKind::Float, Value::F32(v)) => writer.float(*v),
        (ScalarKind::Double, Value::F64(v)) => writer.double(*v),
        (ScalarKind::String, Value::String(v)) => writer.string(v),
        (ScalarKind::Bytes, Value::Bytes(v)) => writer.bytes(v),
        _ => return Err(mismatch()),
    }
    Ok(())
}

fn write_map_key(
    kind: ScalarKind,
    key: &MapKey,
    writer: &mut Writer,
    field: &str,
) -> Result<(), SchemaError> {
    let mismatch = || SchemaError::TypeMismatch {
        field: field.to_owned(),
        expected: kind.as_str().to_owned(),
    };
    match (kind, key) {
        (ScalarKind::Bool, MapKey::Bool(v)) => writer.bool(*v),
        (ScalarKind::Int32, MapKey::I32(v)) => writer.int32(*v),
        (ScalarKind::Sint32, MapKey::I32(v)) => writer.sint32(*v),
        (ScalarKind::Sfixed32, MapKey::I32(v)) => writer.sfixed32(*v),
        (ScalarKind::Uint32, MapKey::U32(v)) => writer.uint32(*v),
        (ScalarKind::Fixed32, MapKey::U32(v)) => writer.fixed32(*v),
        (ScalarKind::Int64, MapKey::I64(v)) => writer.int64(*v),
        (ScalarKind::Sint64, MapKey::I64(v)) => writer.sint64(*v),
        (ScalarKind::Sfixed64, MapKey::I64(v)) => writer.sfixed64(*v),
        (ScalarKind::Uint64, MapKey::U64(v)) => writer.uint64(*v),
        (ScalarKind::Fixed64, MapKey::U64(v)) => writer.fixed64(*v),
        (ScalarKind::String, MapKey::String(v)) => writer.string(v),
        _ => return Err(mismatch()),
    }
    Ok(())
}

fn map_key(value: Value, field: &str) -> Result<MapKey, SchemaError> {
    match value {
        Value::Bool(v) => Ok(MapKey::Bool(v)),
        Value::I32(v) => Ok(MapKey::I32(v)),
        Value::U32(v) => Ok(MapKey::U32(v)),
        Value::I64(v) => Ok(MapKey::I64(v)),
        Value::U64(v) => Ok(MapKey::U64(v)),
        Value::String(v) => Ok(MapKey::String(v)),
        _ => Err(SchemaError::TypeMismatch {
            field: field.to_owned(),
            expected: "map key".to_owned(),
        }),
    }
}

fn read_scalar(kind: ScalarKind, reader: &mut Reader) -> Result<Value, SchemaError> {
    Ok(match kind {
        ScalarKind::Bool => Value::Bool(reader.bool()?),
        ScalarKind::Int32 => Value::I32(reader.int32()?),
        ScalarKind::Sint32 => Value::I32(reader.sint32()?),
        ScalarKind::Sfixed32 => Value::I32(reader.sfixed32()?),
        ScalarKind::Uint32 => Value::U32(reader.uint32()?),
        ScalarKind::Fixed32 => Value::U32(reader.fixed32()?),
        ScalarKind::Int64 => Value::I64(reader.int64()?),
        ScalarKind::Sint64 => Value::I64(reader.sint64()?),
        ScalarKind::Sfixed64 => Value::I64(reader.sfixed64()?),
        ScalarKind::Uint64 => Value::U64(reader.uint64()?),
        ScalarKind::Fixed64 => Value::U64(reader.fixed64()?),
        ScalarKind::Float => Value::F32(reader.float()?),
        ScalarKind::Double => Value::F64(reader.double()?),
        ScalarKind::String => Value::String(reader.string()?.into_owned()),
        ScalarKind::Bytes => Value::Bytes(reader.bytes()?.to_vec()),
    })
}
