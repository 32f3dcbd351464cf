//! Dynamic message values.
//!
//! A [DynamicMessage] holds decoded field values keyed by field id against a
//! [Type](crate::model::NodeKind::Type) in some [Root](crate::Root). Values
//! can represent every field kind in a schema; the message cannot outlive
//! the root that describes it, but carries no borrow — node ids are plain
//! handles.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::SchemaError;
use crate::model::{NodeId, NodeKind};
use crate::root::Root;
use crate::util::quote;

/// A single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    /// An enum value, stored numerically.
    Enum(i32),
    Message(DynamicMessage),
    List(Vec<Value>),
    Map(BTreeMap<MapKey, Value>),
}

/// Map keys are restricted to the integral, bool and string kinds.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum MapKey {
    Bool(bool),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    String(String),
}

impl Value {
    /// Extract a bool; `false` for other kinds.
    pub fn as_bool(&self) -> bool {
        matches!(*self, Value::Bool(true))
    }

    /// Extract a 32-bit signed integer; `0` for other kinds.
    pub fn as_i32(&self) -> i32 {
        match *self {
            Value::I32(v) | Value::Enum(v) => v,
            _ => 0,
        }
    }

    /// Extract a 64-bit signed integer; `0` for other kinds.
    pub fn as_i64(&self) -> i64 {
        match *self {
            Value::I64(v) => v,
            Value::I32(v) | Value::Enum(v) => v as i64,
            _ => 0,
        }
    }

    /// Extract a 64-bit unsigned integer; `0` for other kinds.
    pub fn as_u64(&self) -> u64 {
        match *self {
            Value::U64(v) => v,
            Value::U32(v) => v as u64,
            _ => 0,
        }
    }

    /// Extract a string slice; `""` for other kinds.
    pub fn as_str(&self) -> &str {
        match *self {
            Value::String(ref v) => v.as_str(),
            _ => "",
        }
    }

    /// Extract a byte slice; empty for other kinds.
    pub fn as_bytes(&self) -> &[u8] {
        match *self {
            Value::Bytes(ref v) => v.as_slice(),
            _ => &[],
        }
    }

    /// Extract list elements; empty for other kinds.
    pub fn as_list(&self) -> &[Value] {
        match *self {
            Value::List(ref v) => v.as_slice(),
            _ => &[],
        }
    }

    /// Extract a nested message, if this is one.
    pub fn as_message(&self) -> Option<&DynamicMessage> {
        match *self {
            Value::Message(ref m) => Some(m),
            _ => None,
        }
    }
}

/// A message instance described by a `Type` node.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicMessage {
    type_id: NodeId,
    fields: BTreeMap<u32, Value>,
}

impl DynamicMessage {
    pub fn new(type_id: NodeId) -> DynamicMessage {
        DynamicMessage {
            type_id,
            fields: BTreeMap::new(),
        }
    }

    pub fn type_id(&self) -> NodeId {
        self.type_id
    }

    pub fn get_id(&self, id: u32) -> Option<&Value> {
        self.fields.get(&id)
    }

    /// Raw insert by field id, bypassing oneof bookkeeping. Use
    /// [Root::set_field] for name-based, oneof-aware assignment.
    pub fn set_id(&mut self, id: u32, value: Value) {
        self.fields.insert(id, value);
    }

    pub fn clear_id(&mut self, id: u32) -> Option<Value> {
        self.fields.remove(&id)
    }

    pub(crate) fn value_mut(&mut self, id: u32) -> Option<&mut Value> {
        self.fields.get_mut(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Populated (id, value) pairs, ascending by id.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Value)> {
        self.fields.iter().map(|(&id, value)| (id, value))
    }
}

impl fmt::Display for DynamicMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "message({} fields)", self.fields.len())
    }
}

impl Root {
    /// Create an empty message of the named type.
    pub fn new_message(&self, type_path: &str) -> Result<DynamicMessage, SchemaError> {
        let type_id = self
            .lookup_type(self.root_id(), type_path)
            .ok_or_else(|| SchemaError::NoSuchType(type_path.to_owned()))?;
        Ok(DynamicMessage::new(type_id))
    }

    fn field_by_name(&self, type_id: NodeId, name: &str) -> Option<NodeId> {
        let data = self.node(type_id).as_type()?;
        data.fields
            .iter()
            .chain(&data.extension_fields)
            .copied()
            .find(|&f| self.node(f).name() == name)
    }

    /// Assign a field by name. Setting a member of a oneof clears every
    /// previously populated sibling.
    pub fn set_field(
        &self,
        message: &mut DynamicMessage,
        name: &str,
        value: Value,
    ) -> Result<(), SchemaError> {
        let field_id = self
            .field_by_name(message.type_id(), name)
            .ok_or_else(|| SchemaError::Descriptor(format!(
                "no field {} in {}",
                quote(name),
                self.fqn(message.type_id())
            )))?;
        let field = match self.node(field_id).as_field() {
            Some(f) => f,
            None => return Err(SchemaError::Descriptor(format!("{} is not a field", name))),
        };
        if let Some(oneof) = field.oneof {
            if let NodeKind::OneOf(ref data) = self.node(oneof).kind {
                for &sibling in &data.fields {
                    if sibling != field_id {
                        if let Some(sibling_field) = self.node(sibling).as_field() {
                            message.clear_id(sibling_field.id);
                        }
                    }
                }
            }
        }
        message.set_id(field.id, value);
        Ok(())
    }

    /// Read a field by name.
    pub fn get_field<'m>(&self, message: &'m DynamicMessage, name: &str) -> Option<&'m Value> {
        let field_id = self.field_by_name(message.type_id(), name)?;
        let field = self.node(field_id).as_field()?;
        message.get_id(field.id)
    }

    /// The name of the populated member of a oneof, if any. At most one
    /// member can be populated at a time.
    pub fn which_oneof<'r>(
        &'r self,
        message: &DynamicMessage,
        oneof_name: &str,
    ) -> Option<&'r str> {
        let data = self.node(message.type_id()).as_type()?;
        for &oneof_id in &data.oneofs {
            if self.node(oneof_id).name() != oneof_name {
                continue;
            }
            if let NodeKind::OneOf(ref oneof) = self.node(oneof_id).kind {
                for &member in &oneof.fields {
                    if let Some(field) = self.node(member).as_field() {
                        if message.get_id(field.id).is_some() {
                            return Some(self.node(member).name());
                        }
                    }
                }
            }
        }
        None
    }
}
