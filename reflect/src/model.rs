//! Schema node data: the closed set of reflective entities making up a
//! schema tree. The tree itself is arena-backed and owned by
//! [Root](crate::Root); nodes refer to each other through [NodeId].

use std::collections::HashMap;

use tagwire_wire::{WIRE_FIXED32, WIRE_FIXED64, WIRE_LEN, WIRE_VARINT};

use crate::features::{Edition, FeatureOverrides, FeatureSet};

pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Handle to a node in a [Root](crate::Root)'s arena. Ids are only
/// meaningful against the root that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

/// The built-in scalar wire kinds a field can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Double,
    Float,
    Int32,
    Uint32,
    Sint32,
    Fixed32,
    Sfixed32,
    Int64,
    Uint64,
    Sint64,
    Fixed64,
    Sfixed64,
    Bool,
    String,
    Bytes,
}

impl ScalarKind {
    pub fn parse(name: &str) -> Option<ScalarKind> {
        match name {
            "double" => Some(ScalarKind::Double),
            "float" => Some(ScalarKind::Float),
            "int32" => Some(ScalarKind::Int32),
            "uint32" => Some(ScalarKind::Uint32),
            "sint32" => Some(ScalarKind::Sint32),
            "fixed32" => Some(ScalarKind::Fixed32),
            "sfixed32" => Some(ScalarKind::Sfixed32),
            "int64" => Some(ScalarKind::Int64),
            "uint64" => Some(ScalarKind::Uint64),
            "sint64" => Some(ScalarKind::Sint64),
            "fixed64" => Some(ScalarKind::Fixed64),
            "sfixed64" => Some(ScalarKind::Sfixed64),
            "bool" => Some(ScalarKind::Bool),
            "string" => Some(ScalarKind::String),
            "bytes" => Some(ScalarKind::Bytes),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScalarKind::Double => "double",
            ScalarKind::Float => "float",
            ScalarKind::Int32 => "int32",
            ScalarKind::Uint32 => "uint32",
            ScalarKind::Sint32 => "sint32",
            ScalarKind::Fixed32 => "fixed32",
            ScalarKind::Sfixed32 => "sfixed32",
            ScalarKind::Int64 => "int64",
            ScalarKind::Uint64 => "uint64",
            ScalarKind::Sint64 => "sint64",
            ScalarKind::Fixed64 => "fixed64",
            ScalarKind::Sfixed64 => "sfixed64",
            ScalarKind::Bool => "bool",
            ScalarKind::String => "string",
            ScalarKind::Bytes => "bytes",
        }
    }

    pub fn wire_type(self) -> u32 {
        match self {
            ScalarKind::Int32
            | ScalarKind::Uint32
            | ScalarKind::Sint32
            | ScalarKind::Int64
            | ScalarKind::Uint64
            | ScalarKind::Sint64
            | ScalarKind::Bool => WIRE_VARINT,
            ScalarKind::Fixed64 | ScalarKind::Sfixed64 | ScalarKind::Double => WIRE_FIXED64,
            ScalarKind::Fixed32 | ScalarKind::Sfixed32 | ScalarKind::Float => WIRE_FIXED32,
            ScalarKind::String | ScalarKind::Bytes => WIRE_LEN,
        }
    }

    /// Whether repeated values of this kind may use packed encoding.
    pub fn packable(self) -> bool {
        !matches!(self, ScalarKind::String | ScalarKind::Bytes)
    }

    /// Whether this kind is legal as a map key.
    pub fn valid_map_key(self) -> bool {
        matches!(
            self,
            ScalarKind::Int32
                | ScalarKind::Uint32
                | ScalarKind::Sint32
                | ScalarKind::Fixed32
                | ScalarKind::Sfixed32
                | ScalarKind::Int64
                | ScalarKind::Uint64
                | ScalarKind::Sint64
                | ScalarKind::Fixed64
                | ScalarKind::Sfixed64
                | ScalarKind::Bool
                | ScalarKind::String
        )
    }
}

/// The largest valid field id (2^29 - 1).
pub const MAX_FIELD_ID: u32 = 536_870_911;

/// A reserved range or name inside a message or enum.
#[derive(Debug, Clone, PartialEq)]
pub enum Reserved {
    /// Inclusive id range.
    Range(i64, i64),
    Name(String),
}

impl Reserved {
    pub fn covers_id(&self, id: i64) -> bool {
        match *self {
            Reserved::Range(lo, hi) => lo <= id && id <= hi,
            Reserved::Name(_) => false,
        }
    }

    pub fn covers_name(&self, name: &str) -> bool {
        match *self {
            Reserved::Name(ref n) => n == name,
            Reserved::Range(..) => false,
        }
    }
}

/// Field cardinality. Presence semantics (explicit/implicit/required) live
/// in the resolved feature set, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Singular,
    Repeated,
    Map,
}

/// Data shared by every schema node.
#[derive(Debug, Clone)]
pub struct NodeCommon {
    pub name: String,
    pub parent: Option<NodeId>,
    pub options: Option<JsonMap>,
    pub comment: Option<String>,
    pub edition: Edition,
    pub resolved: bool,
    pub features: Option<FeatureSet>,
    pub overrides: FeatureOverrides,
}

impl NodeCommon {
    fn new(name: String, edition: Edition) -> NodeCommon {
        NodeCommon {
            name,
            parent: None,
            options: None,
            comment: None,
            edition,
            resolved: false,
            features: None,
            overrides: FeatureOverrides::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NamespaceData {
    pub children: Vec<NodeId>,
}

#[derive(Debug, Clone, Default)]
pub struct TypeData {
    /// Nested messages, enums and declared extension fields, in order.
    pub children: Vec<NodeId>,
    /// Own fields, in declaration order.
    pub fields: Vec<NodeId>,
    pub oneofs: Vec<NodeId>,
    pub reserved: Vec<Reserved>,
    pub extension_ranges: Vec<(u32, u32)>,
    /// Extension fields bound to this type by resolution.
    pub extension_fields: Vec<NodeId>,
    /// Declared with the legacy `group` syntax.
    pub is_group: bool,
}

#[derive(Debug, Clone)]
pub struct FieldData {
    pub id: u32,
    pub rule: Rule,
    /// Declared wire type name or (possibly dotted) type reference.
    pub type_name: String,
    /// Map key kind for map fields.
    pub key_kind: Option<ScalarKind>,
    /// Bound by `resolve_all` when `type_name` is not a scalar.
    pub resolved_type: Option<NodeId>,
    pub oneof: Option<NodeId>,
    /// Extension target type name; present only for `extend` fields.
    pub extend: Option<String>,
    /// Declared default, as parsed from the `default` option.
    pub default: Option<serde_json::Value>,
    /// `[packed = ...]` declared directly on the field.
    pub packed: Option<bool>,
    /// Group-encoded (start/end-group framing instead of length prefix).
    pub delimited: bool,
}

#[derive(Debug, Clone, Default)]
pub struct OneOfData {
    pub fields: Vec<NodeId>,
}

#[derive(Debug, Clone, Default)]
pub struct EnumData {
    /// Declaration-ordered (name, value) pairs; aliases repeat values.
    pub values: Vec<(String, i32)>,
    pub by_name: HashMap<String, i32>,
    pub reserved: Vec<Reserved>,
    pub allow_alias: bool,
}

impl EnumData {
    /// Symbolic name for a value; the first declared name wins for aliases.
    pub fn name_of(&self, value: i32) -> Option<&str> {
        self.values
            .iter()
            .find(|&&(_, v)| v == value)
            .map(|(n, _)| n.as_str())
    }

    pub fn value_of(&self, name: &str) -> Option<i32> {
        self.by_name.get(name).copied()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServiceData {
    pub methods: Vec<NodeId>,
    /// Nested types are legal inside services in the descriptor model.
    pub children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct MethodData {
    pub request_type: String,
    pub response_type: String,
    pub request_stream: bool,
    pub response_stream: bool,
    pub resolved_request: Option<NodeId>,
    pub resolved_response: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Namespace(NamespaceData),
    Type(TypeData),
    Field(FieldData),
    OneOf(OneOfData),
    Enum(EnumData),
    Service(ServiceData),
    Method(MethodData),
}

/// One schema node: common data plus its kind-specific payload.
#[derive(Debug, Clone)]
pub struct Node {
    pub common: NodeCommon,
    pub kind: NodeKind,
}

impl Node {
    pub fn namespace(name: &str, edition: Edition) -> Node {
        Node {
            common: NodeCommon::new(name.to_owned(), edition),
            kind: NodeKind::Namespace(NamespaceData::default()),
        }
    }

    pub fn message(name: &str, edition: Edition) -> Node {
        Node {
            common: NodeCommon::new(name.to_owned(), edition),
            kind: NodeKind::Type(TypeData::default()),
        }
    }

    pub fn field(name: &str, id: u32, rule: Rule, type_name: &str, edition: Edition) -> Node {
        Node {
            common: NodeCommon::new(name.to_owned(), edition),
            kind: NodeKind::Field(FieldData {
                id,
                rule,
                type_name: type_name.to_owned(),
                key_kind: None,
                resolved_type: None,
                oneof: None,
                extend: None,
                default: None,
                packed: None,
                delimited: false,
            }),
        }
    }

    pub fn oneof(name: &str, edition: Edition) -> Node {
        Node {
            common: NodeCommon::new(name.to_owned(), edition),
            kind: NodeKind::OneOf(OneOfData::default()),
        }
    }

    pub fn enumeration(name: &str, edition: Edition) -> Node {
        Node {
            common: NodeCommon::new(name.to_owned(), edition),
            kind: NodeKind::Enum(EnumData::default()),
        }
    }

    pub fn service(name: &str, edition: Edition) -> Node {
        Node {
            common: NodeCommon::new(name.to_owned(), edition),
            kind: NodeKind::Service(ServiceData::default()),
        }
    }

    pub fn method(
        name: &str,
        request_type: &str,
        response_type: &str,
        request_stream: bool,
        response_stream: bool,
        edition: Edition,
    ) -> Node {
        Node {
            common: NodeCommon::new(name.to_owned(), edition),
            kind: NodeKind::Method(MethodData {
                request_type: request_type.to_owned(),
                response_type: response_type.to_owned(),
                request_stream,
                response_stream,
                resolved_request: None,
                resolved_response: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.common.name
    }

    /// What kind of declaration this is, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            NodeKind::Namespace(_) => "namespace",
            NodeKind::Type(_) => "message",
            NodeKind::Field(_) => "field",
            NodeKind::OneOf(_) => "oneof",
            NodeKind::Enum(_) => "enum",
            NodeKind::Service(_) => "service",
            NodeKind::Method(_) => "method",
        }
    }

    pub fn as_type(&self) -> Option<&TypeData> {
        match self.kind {
            NodeKind::Type(ref data) => Some(data),
            _ => None,
        }
    }

    pub fn as_field(&self) -> Option<&FieldData> {
        match self.kind {
            NodeKind::Field(ref data) => Some(data),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&EnumData> {
        match self.kind {
            NodeKind::Enum(ref data) => Some(data),
            _ => None,
        }
    }

    pub fn as_oneof(&self) -> Option<&OneOfData> {
        match self.kind {
            NodeKind::OneOf(ref data) => Some(data),
            _ => None,
        }
    }

    pub fn as_service(&self) -> Option<&ServiceData> {
        match self.kind {
            NodeKind::Service(ref data) => Some(data),
            _ => None,
        }
    }

    pub fn as_method(&self) -> Option<&MethodData> {
        match self.kind {
            NodeKind::Method(ref data) => Some(data),
            _ => None,
        }
    }

    /// Set an option on this node's option bag. Dotted keys are stored
    /// verbatim; aggregate values arrive as JSON objects.
    pub fn set_option(&mut self, key: &str, value: serde_json::Value) {
        self.common
            .options
            .get_or_insert_with(JsonMap::new)
            .insert(key.to_owned(), value);
    }

    pub fn option(&self, key: &str) -> Option<&serde_json::Value> {
        self.common.options.as_ref().and_then(|o| o.get(key))
    }
}
