//! Source editions and the feature sets derived from them.
//!
//! A node's effective behavior flags come from a precedence-ordered merge:
//! edition defaults, then the parent's resolved features, then the enclosing
//! oneof's overrides, then the node's own declared options.

use serde::{Deserialize, Serialize};

use crate::model::JsonMap;

/// The source edition a declaration was written under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Edition {
    Proto2,
    Proto3,
    E2023,
    E2024,
}

impl Edition {
    pub fn parse(text: &str) -> Option<Edition> {
        match text {
            "proto2" => Some(Edition::Proto2),
            "proto3" => Some(Edition::Proto3),
            "2023" => Some(Edition::E2023),
            "2024" => Some(Edition::E2024),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Edition::Proto2 => "proto2",
            Edition::Proto3 => "proto3",
            Edition::E2023 => "2023",
            Edition::E2024 => "2024",
        }
    }

    /// Editions-style features syntax is only legal from 2023 on.
    pub fn supports_features(self) -> bool {
        matches!(self, Edition::E2023 | Edition::E2024)
    }
}

impl Default for Edition {
    fn default() -> Edition {
        Edition::Proto2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldPresence {
    Explicit,
    Implicit,
    LegacyRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatedEncoding {
    Packed,
    Expanded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageEncoding {
    LengthPrefixed,
    Delimited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumKind {
    Open,
    Closed,
}

/// A node's resolved behavior flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureSet {
    pub field_presence: FieldPresence,
    pub repeated_encoding: RepeatedEncoding,
    pub message_encoding: MessageEncoding,
    pub enum_kind: EnumKind,
}

impl FeatureSet {
    /// The defaults each edition starts from.
    pub fn defaults(edition: Edition) -> FeatureSet {
        match edition {
            Edition::Proto2 => FeatureSet {
                field_presence: FieldPresence::Explicit,
                repeated_encoding: RepeatedEncoding::Expanded,
                message_encoding: MessageEncoding::LengthPrefixed,
                enum_kind: EnumKind::Closed,
            },
            Edition::Proto3 => FeatureSet {
                field_presence: FieldPresence::Implicit,
                repeated_encoding: RepeatedEncoding::Packed,
                message_encoding: MessageEncoding::LengthPrefixed,
                enum_kind: EnumKind::Open,
            },
            Edition::E2023 | Edition::E2024 => FeatureSet {
                field_presence: FieldPresence::Explicit,
                repeated_encoding: RepeatedEncoding::Packed,
                message_encoding: MessageEncoding::LengthPrefixed,
                enum_kind: EnumKind::Open,
            },
        }
    }

    /// Apply `overrides` on top of `self`, returning the merged set.
    pub fn merged(self, overrides: &FeatureOverrides) -> FeatureSet {
        FeatureSet {
            field_presence: overrides.field_presence.unwrap_or(self.field_presence),
            repeated_encoding: overrides.repeated_encoding.unwrap_or(self.repeated_encoding),
            message_encoding: overrides.message_encoding.unwrap_or(self.message_encoding),
            enum_kind: overrides.enum_kind.unwrap_or(self.enum_kind),
        }
    }
}

/// Node-level feature overrides, either declared directly (`required`,
/// `[packed = false]`, groups) or through a `features.*` option.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureOverrides {
    pub field_presence: Option<FieldPresence>,
    pub repeated_encoding: Option<RepeatedEncoding>,
    pub message_encoding: Option<MessageEncoding>,
    pub enum_kind: Option<EnumKind>,
}

impl FeatureOverrides {
    pub fn is_empty(&self) -> bool {
        *self == FeatureOverrides::default()
    }

    /// Extract `features.*` overrides from an option bag. Unknown feature
    /// names and values are ignored; they belong to extensions this runtime
    /// does not interpret.
    pub fn from_options(options: &JsonMap) -> FeatureOverrides {
        let mut out = FeatureOverrides::default();
        let lookup = |key: &str| -> Option<String> {
            options
                .get(&format!("features.{}", key))
                .or_else(|| options.get("features").and_then(|f| f.get(key)))
                .and_then(|v| v.as_str())
                .map(|s| s.to_owned())
        };
        if let Some(v) = lookup("field_presence") {
            out.field_presence = match v.as_str() {
                "EXPLICIT" => Some(FieldPresence::Explicit),
                "IMPLICIT" => Some(FieldPresence::Implicit),
                "LEGACY_REQUIRED" => Some(FieldPresence::LegacyRequired),
                _ => None,
            };
        }
        if let Some(v) = lookup("repeated_field_encoding") {
            out.repeated_encoding = match v.as_str() {
                "PACKED" => Some(RepeatedEncoding::Packed),
                "EXPANDED" => Some(RepeatedEncoding::Expanded),
                _ => None,
            };
        }
        if let Some(v) = lookup("message_encoding") {
            out.message_encoding = match v.as_str() {
                "LENGTH_PREFIXED" => Some(MessageEncoding::LengthPrefixed),
                "DELIMITED" => Some(MessageEncoding::Delimited),
                _ => None,
            };
        }
        if let Some(v) = lookup("enum_type") {
            out.enum_kind = match v.as_str() {
                "OPEN" => Some(EnumKind::Open),
                "CLOSED" => Some(EnumKind::Closed),
                _ => None,
            };
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edition_parse() {
        assert_eq!(Edition::parse("proto2"), Some(Edition::Proto2));
        assert_eq!(Edition::parse("proto3"), Some(Edition::Proto3));
        assert_eq!(Edition::parse("2023"), Some(Edition::E2023));
        assert_eq!(Edition::parse("2024"), Some(Edition::E2024));
        assert_eq!(Edition::parse("proto4"), None);
    }

    #[test]
    fn defaults_by_edition() {
        assert_eq!(
            FeatureSet::defaults(Edition::Proto2).field_presence,
            FieldPresence::Explicit
        );
        assert_eq!(
            FeatureSet::defaults(Edition::Proto3).field_presence,
            FieldPresence::Implicit
        );
        assert_eq!(
            FeatureSet::defaults(Edition::Proto3).repeated_encoding,
            RepeatedEncoding::Packed
        );
        assert_eq!(
            FeatureSet::defaults(Edition::E2023).field_presence,
            FieldPresence::Explicit
        );
    }

    #[test]
    fn override_precedence() {
        let base = FeatureSet::defaults(Edition::E2023);
        let overrides = FeatureOverrides {
            field_presence: Some(FieldPresence::Implicit),
            ..Default::default()
        };
        let merged = base.merged(&overrides);
        assert_eq!(merged.field_presence, FieldPresence::Implicit);
        assert_eq!(merged.repeated_encoding, base.repeated_encoding);
    }

    #[test]
    fn overrides_from_options() {
        let mut options = JsonMap::new();
        options.insert(
            "features.field_presence".to_owned(),
            serde_json::Value::String("IMPLICIT".to_owned()),
        );
        let overrides = FeatureOverrides::from_options(&options);
        assert_eq!(overrides.field_presence, Some(FieldPresence::Implicit));
        assert_eq!(overrides.repeated_encoding, None);
    }
}
