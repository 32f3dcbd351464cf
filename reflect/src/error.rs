use thiserror::Error;

use tagwire_wire::WireError;

/// Errors raised while building, resolving or using a schema.
///
/// Structural schema errors carry enough context to locate the offending
/// declaration (node path, or line/column for text-parsed schemas). Wire
/// errors from the codec layer convert via `From`.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error at line {line}, column {column}: {msg}")]
    Parse {
        msg: String,
        line: usize,
        column: usize,
    },

    #[error("duplicate name {name:?} in {scope}")]
    DuplicateName { name: String, scope: String },

    #[error("duplicate id {id} in {scope}")]
    DuplicateId { id: u32, scope: String },

    #[error("id {id} is reserved in {scope}")]
    ReservedId { id: u32, scope: String },

    #[error("name {name:?} is reserved in {scope}")]
    ReservedName { name: String, scope: String },

    #[error("unresolvable type {type_name:?} for {owner}")]
    UnresolvedType { type_name: String, owner: String },

    #[error("unresolvable extension field(s): {0}")]
    UnresolvedExtensions(String),

    #[error("no such type {0:?}")]
    NoSuchType(String),

    #[error("missing required field {field:?} in {type_name}")]
    MissingRequired { field: String, type_name: String },

    #[error("mismatched end-group tag: expected field {expected}, found field {found}")]
    GroupEnd { expected: u32, found: u32 },

    #[error("{field}: {expected} expected")]
    TypeMismatch { field: String, expected: String },

    #[error("invalid descriptor: {0}")]
    Descriptor(String),

    #[error("schema is not resolved; call resolve_all first")]
    NotResolved,

    #[error("import {0:?} could not be loaded")]
    Import(String),

    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}
