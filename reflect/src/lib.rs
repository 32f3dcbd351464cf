//! tagwire-reflect
//!
//! This crate implements:
//!  1) The reflective schema model (`Root` and its node tree: namespaces,
//!     messages, fields, oneofs, enums, services),
//!  2) A tokenizer + recursive-descent parser for `.proto` schema text,
//!  3) Descriptor-JSON ingestion and emission,
//!  4) Per-type codec plans driving `encode` / `decode` / `verify` /
//!     `from_object` / `to_object`,
//!  5) Schema loading with transitive imports (`Fetcher`), and error types
//!     (`SchemaError`).
//!
//! ```
//! use tagwire_reflect::{Root, Value};
//!
//! let root = Root::from_text(r#"
//!     syntax = "proto3";
//!     message Greeting { string text = 1; }
//! "#).unwrap();
//!
//! let mut msg = root.new_message("Greeting").unwrap();
//! root.set_field(&mut msg, "text", Value::String("hi".to_owned())).unwrap();
//! let bytes = root.encode(&msg).unwrap();
//! assert_eq!(root.decode("Greeting", &bytes).unwrap(), msg);
//! ```

pub mod codec;
pub mod convert;
pub mod error;
pub mod features;
pub mod json;
pub mod load;
pub mod model;
pub mod parser;
pub mod root;
pub mod tokenizer;
pub mod util;
pub mod value;
pub mod verify;

pub use convert::{BytesMode, ConvertOptions, EnumMode, LongMode};
pub use error::SchemaError;
pub use features::{Edition, FeatureSet, FieldPresence};
pub use load::{Fetcher, FsFetcher};
pub use model::{Node, NodeId, NodeKind, Reserved, Rule, ScalarKind, MAX_FIELD_ID};
pub use parser::{parse_into, ParseOptions, Parsed};
pub use root::{Filter, Root};
pub use value::{DynamicMessage, MapKey, Value};
