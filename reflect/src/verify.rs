//! Structural verification of plain objects against a message type.
//!
//! `verify` never fails hard: it returns `Some(description)` naming the
//! first offending field and the kind that was expected, or `None` when the
//! object would convert cleanly. The throw-or-continue decision stays with
//! the caller.

use serde_json::Value as Json;

use crate::codec::{FieldPlan, FieldType};
use crate::features::{EnumKind, FieldPresence};
use crate::model::{NodeId, Rule, ScalarKind};
use crate::root::Root;

impl Root {
    /// Check `value` against the named type. Returns a human-readable
    /// description of the first problem, or `None` if the object is valid.
    pub fn verify(&self, type_path: &str, value: &Json) -> Option<String> {
        let type_id = match self.lookup_type(self.root_id(), type_path) {
            Some(id) => id,
            None => return Some(format!("no such type {:?}", type_path)),
        };
        self.verify_type(type_id, value, "")
    }

    fn verify_type(&self, type_id: NodeId, value: &Json, prefix: &str) -> Option<String> {
        let object = match value {
            Json::Object(object) => object,
            _ => return Some(format!("{}object expected", path_prefix(prefix))),
        };
        let plan = match self.plan(type_id) {
            Ok(plan) => plan,
            Err(e) => return Some(e.to_string()),
        };

        let mut oneof_seen: Vec<Option<&str>> = vec![None; plan.oneofs.len()];
        for field in &plan.fields {
            let path = join_path(prefix, &field.name);
            let value = object.get(&field.name).filter(|v| !v.is_null());
            let value = match value {
                Some(value) => value,
                None => {
                    if field.presence == FieldPresence::LegacyRequired {
                        return Some(format!("{}: required field missing", path));
                    }
                    continue;
                }
            };
            if let Some(oneof) = field.oneof {
                match oneof_seen[oneof] {
                    Some(earlier) => {
                        return Some(format!(
                            "{}: multiple values for oneof (already set via {:?})",
                            plan.oneofs[oneof].0, earlier
                        ))
                    }
                    None => oneof_seen[oneof] = Some(&field.name),
                }
            }
            if let Some(problem) = self.verify_field(field, value, &path) {
                return Some(problem);
            }
        }
        None
    }

    fn verify_field(&self, field: &FieldPlan, value: &Json, path: &str) -> Option<String> {
        match field.rule {
            Rule::Repeated => {
                let items = match value.as_array() {
                    Some(items) => items,
                    None => return Some(format!("{}: array expected", path)),
                };
                for item in items {
                    if let Some(problem) = self.verify_element(field, item, path) {
                        return Some(problem);
                    }
                }
                None
            }
            Rule::Map => {
                let entries = match value.as_object() {
                    Some(entries) => entries,
                    None => return Some(format!("{}: object expected", path)),
                };
                let key_kind = field.key_kind.unwrap_or(ScalarKind::String);
                for (key, entry_value) in entries {
                    if let Some(problem) = verify_map_key(key_kind, key, path) {
                        return Some(problem);
                    }
                    if let Some(problem) = self.verify_element(field, entry_value, path) {
                        return Some(problem);
                    }
                }
                None
            }
            Rule::Singular => self.verify_element(field, value, path),
        }
    }

    fn verify_element(&self, field: &FieldPlan, value: &Json, path: &str) -> Option<String> {
        match field.ftype {
            FieldType::Scalar(kind) => verify_scalar(kind, value, path),
            FieldType::Enum(enum_id) => {
                let number = match value.as_i64() {
                    Some(n) if n >= i32::MIN as i64 && n <= i32::MAX as i64 => n as i32,
                    _ => return Some(format!("{}: enum value expected", path)),
                };
                let closed = self.features(enum_id).enum_kind == EnumKind::Closed;
                if closed {
                    let known = self
                        .enum_data(enum_id)
                        .map(|e| e.values.iter().any(|&(_, v)| v == number))
                        .unwrap_or(false);
                    if !known {
                        return Some(format!("{}: enum value expected", path));
                    }
                }
                None
            }
            FieldType::Message(type_id) => self.verify_type(type_id, value, path),
        }
    }
}

fn path_prefix(prefix: &str) -> String {
    if prefix.is_empty() {
        String::new()
    } else {
        format!("{}: ", prefix)
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_owned()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn is_integer(value: &Json) -> bool {
    value.as_i64().is_some() || value.as_u64().is_some()
}

fn integer_string(value: &Json) -> bool {
    value
        .as_str()
        .map(|s| s.parse::<i64>().is_ok() || s.parse::<u64>().is_ok())
        .unwrap_or(false)
}

fn verify_scalar(kind: ScalarKind, value: &Json, path: &str) -> Option<String> {
    match kind {
        ScalarKind::Int32 | ScalarKind::Sint32 | ScalarKind::Sfixed32 => {
            match value.as_i64() {
                Some(n) if n >= i32::MIN as i64 && n <= i32::MAX as i64 => None,
                _ => Some(format!("{}: integer expected", path)),
            }
        }
        ScalarKind::Uint32 | ScalarKind::Fixed32 => match value.as_u64() {
            Some(n) if n <= u32::MAX as u64 => None,
            _ => Some(format!("{}: integer expected", path)),
        },
        ScalarKind::Int64 | ScalarKind::Sint64 | ScalarKind::Sfixed64 | ScalarKind::Uint64
        | ScalarKind::Fixed64 => {
            if is_integer(value) || integer_string(value) {
                None
            } else {
                Some(format!("{}: integer or integer string expected", path))
            }
        }
        ScalarKind::Float | ScalarKind::Double => {
            let special = matches!(
                value.as_str(),
                Some("NaN") | Some("Infinity") | Some("-Infinity")
            );
            if value.is_number() || special {
                None
            } else {
                Some(format!("{}: number expected", path))
            }
        }
        ScalarKind::Bool => {
            if value.is_boolean() {
                None
            } else {
                Some(format!("{}: boolean expected", path))
            }
        }
        ScalarKind::String => {
            if value.is_string() {
                None
            } else {
                Some(format!("{}: string expected", path))
            }
        }
        ScalarKind::Bytes => match value {
            Json::String(_) => None,
            Json::Array(items) if items.iter().all(|i| i.as_u64().map(|n| n <= 255).unwrap_or(false)) => {
                None
            }
            _ => Some(format!("{}: buffer expected", path)),
        },
    }
}

fn verify_map_key(kind: ScalarKind, key: &str, path: &str) -> Option<String> {
    match kind {
        ScalarKind::Bool => {
            if key == "true" || key == "false" {
                None
            } else {
                Some(format!("{}: boolean map key expected", path))
            }
        }
        ScalarKind::String => None,
        _ => {
            if key.parse::<i64>().is_ok() || key.parse::<u64>().is_ok() {
                None
            } else {
                Some(format!("{}: integer map key expected", path))
            }
        }
    }
}
