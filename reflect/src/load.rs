//! Schema loading with transitive import resolution.
//!
//! A [Fetcher] supplies source text for an import path; [FsFetcher] is the
//! filesystem implementation. Loading keeps an explicit pending queue of
//! imports and runs [Root::resolve_all] exactly once, when the queue drains.
//! A failing `weak` import logs and continues; a failing required import
//! aborts the load. Everything is synchronous; errors surface immediately
//! instead of being queued.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::SchemaError;
use crate::parser::{parse_into, ParseOptions};
use crate::root::Root;

/// Supplies schema source text for an import path.
pub trait Fetcher {
    fn fetch(&mut self, path: &str) -> Result<String, SchemaError>;
}

/// Resolves import paths against a list of include directories, first hit
/// wins.
pub struct FsFetcher {
    roots: Vec<PathBuf>,
}

impl FsFetcher {
    pub fn new<P: Into<PathBuf>>(roots: Vec<P>) -> FsFetcher {
        FsFetcher {
            roots: roots.into_iter().map(Into::into).collect(),
        }
    }
}

impl Fetcher for FsFetcher {
    fn fetch(&mut self, path: &str) -> Result<String, SchemaError> {
        for root in &self.roots {
            let candidate = root.join(path);
            if candidate.is_file() {
                return Ok(fs::read_to_string(candidate)?);
            }
        }
        Err(SchemaError::Import(path.to_owned()))
    }
}

/// Well-known type sources, resolved without touching the fetcher so
/// `import "google/protobuf/..."` always works.
fn builtin(path: &str) -> Option<&'static str> {
    match path {
        "google/protobuf/any.proto" => Some(
            r#"syntax = "proto3";
package google.protobuf;
message Any {
  string type_url = 1;
  bytes value = 2;
}
"#,
        ),
        "google/protobuf/duration.proto" => Some(
            r#"syntax = "proto3";
package google.protobuf;
message Duration {
  int64 seconds = 1;
  int32 nanos = 2;
}
"#,
        ),
        "google/protobuf/empty.proto" => Some(
            r#"syntax = "proto3";
package google.protobuf;
message Empty {}
"#,
        ),
        "google/protobuf/struct.proto" => Some(
            r#"syntax = "proto3";
package google.protobuf;
message Struct {
  map<string, Value> fields = 1;
}
message Value {
  oneof kind {
    NullValue null_value = 1;
    double number_value = 2;
    string string_value = 3;
    bool bool_value = 4;
    Struct struct_value = 5;
    ListValue list_value = 6;
  }
}
enum NullValue {
  NULL_VALUE = 0;
}
message ListValue {
  repeated Value values = 1;
}
"#,
        ),
        "google/protobuf/timestamp.proto" => Some(
            r#"syntax = "proto3";
package google.protobuf;
message Timestamp {
  int64 seconds = 1;
  int32 nanos = 2;
}
"#,
        ),
        "google/protobuf/wrappers.proto" => Some(
            r#"syntax = "proto3";
package google.protobuf;
message DoubleValue { double value = 1; }
message FloatValue { float value = 1; }
message Int64Value { int64 value = 1; }
message UInt64Value { uint64 value = 1; }
message Int32Value { int32 value = 1; }
message UInt32Value { uint32 value = 1; }
message BoolValue { bool value = 1; }
message StringValue { string value = 1; }
message BytesValue { bytes value = 1; }
"#,
        ),
        _ => None,
    }
}

impl Root {
    /// Load `files` and their transitive imports into this root, then
    /// resolve. Weak imports that cannot be fetched are skipped with a
    /// warning; any other fetch failure fails the load.
    pub fn load(
        &mut self,
        files: &[&str],
        fetcher: &mut dyn Fetcher,
        opts: &ParseOptions,
    ) -> Result<(), SchemaError> {
        let mut pending: Vec<(String, bool)> = files
            .iter()
            .rev()
            .map(|&f| (f.to_owned(), false))
            .collect();
        let mut visited: HashSet<String> = self.files.iter().cloned().collect();
        while let Some((name, weak)) = pending.pop() {
            if !visited.insert(name.clone()) {
                continue;
            }
            let source = match builtin(&name) {
                Some(source) => Ok(source.to_owned()),
                None => fetcher.fetch(&name),
            };
            let source = match source {
                Ok(source) => source,
                Err(e) => {
                    if weak {
                        log::warn!("skipping weak import {:?}: {}", name, e);
                        continue;
                    }
                    log::debug!("import {:?} failed: {}", name, e);
                    return Err(SchemaError::Import(name));
                }
            };
            let parsed = parse_into(self, &source, opts)?;
            self.files.push(name);
            for import in parsed.imports.into_iter().rev() {
                pending.push((import, false));
            }
            for import in parsed.weak_imports.into_iter().rev() {
                pending.push((import, true));
            }
        }
        self.resolve_all()
    }

    /// Load a single `.proto` file from disk; imports resolve against the
    /// file's directory.
    pub fn load_file<P: AsRef<Path>>(path: P, opts: &ParseOptions) -> Result<Root, SchemaError> {
        let path = path.as_ref();
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SchemaError::Import(path.display().to_string()))?;
        let mut fetcher = FsFetcher::new(vec![dir.to_path_buf()]);
        let mut root = Root::new();
        root.load(&[name], &mut fetcher, opts)?;
        Ok(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapFetcher {
        sources: HashMap<&'static str, &'static str>,
        fetched: Vec<String>,
    }

    impl MapFetcher {
        fn new(sources: &[(&'static str, &'static str)]) -> MapFetcher {
            MapFetcher {
                sources: sources.iter().copied().collect(),
                fetched: Vec::new(),
            }
        }
    }

    impl Fetcher for MapFetcher {
        fn fetch(&mut self, path: &str) -> Result<String, SchemaError> {
            self.fetched.push(path.to_owned());
            self.sources
                .get(path)
                .map(|&s| s.to_owned())
                .ok_or_else(|| SchemaError::Import(path.to_owned()))
        }
    }

    #[test]
    fn transitive_imports_load_in_order() {
        let mut fetcher = MapFetcher::new(&[
            (
                "main.proto",
                r#"syntax = "proto3";
                import "dep.proto";
                message Outer { Dep dep = 1; }"#,
            ),
            (
                "dep.proto",
                r#"syntax = "proto3";
                import "leaf.proto";
                message Dep { Leaf leaf = 1; }"#,
            ),
            ("leaf.proto", r#"syntax = "proto3"; message Leaf { int32 n = 1; }"#),
        ]);
        let mut root = Root::new();
        root.load(&["main.proto"], &mut fetcher, &ParseOptions::default())
            .unwrap();
        assert!(root.get("Outer").is_some());
        assert!(root.get("Leaf").is_some());
        assert_eq!(root.files, vec!["main.proto", "dep.proto", "leaf.proto"]);
        assert!(root.is_resolved());
    }

    #[test]
    fn diamond_imports_fetch_once() {
        let mut fetcher = MapFetcher::new(&[
            (
                "main.proto",
                r#"syntax = "proto3";
                import "a.proto";
                import "b.proto";
                message M { Shared s = 1; }"#,
            ),
            ("a.proto", r#"syntax = "proto3"; import "shared.proto";"#),
            ("b.proto", r#"syntax = "proto3"; import "shared.proto";"#),
            ("shared.proto", r#"syntax = "proto3"; message Shared { int32 n = 1; }"#),
        ]);
        let mut root = Root::new();
        root.load(&["main.proto"], &mut fetcher, &ParseOptions::default())
            .unwrap();
        let shared_fetches = fetcher
            .fetched
            .iter()
            .filter(|f| f.as_str() == "shared.proto")
            .count();
        assert_eq!(shared_fetches, 1);
    }

    #[test]
    fn weak_import_failure_tolerated() {
        let mut fetcher = MapFetcher::new(&[(
            "main.proto",
            r#"syntax = "proto3";
            import weak "gone.proto";
            message M { int32 x = 1; }"#,
        )]);
        let mut root = Root::new();
        root.load(&["main.proto"], &mut fetcher, &ParseOptions::default())
            .unwrap();
        assert!(root.get("M").is_some());
    }

    #[test]
    fn required_import_failure_fatal() {
        let mut fetcher = MapFetcher::new(&[(
            "main.proto",
            r#"syntax = "proto3";
            import "gone.proto";
            message M { int32 x = 1; }"#,
        )]);
        let mut root = Root::new();
        let err = root
            .load(&["main.proto"], &mut fetcher, &ParseOptions::default())
            .unwrap_err();
        match err {
            SchemaError::Import(name) => assert_eq!(name, "gone.proto"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn well_known_imports_are_builtin() {
        let mut fetcher = MapFetcher::new(&[(
            "main.proto",
            r#"syntax = "proto3";
            import "google/protobuf/timestamp.proto";
            import "google/protobuf/wrappers.proto";
            message Event {
              google.protobuf.Timestamp at = 1;
              google.protobuf.StringValue label = 2;
            }"#,
        )]);
        let mut root = Root::new();
        root.load(&["main.proto"], &mut fetcher, &ParseOptions::default())
            .unwrap();
        assert!(root.get("google.protobuf.Timestamp").is_some());
        assert!(root.get("Event").is_some());
        // The fetcher never sees builtin paths.
        assert_eq!(fetcher.fetched, vec!["main.proto"]);
    }

    #[test]
    fn builtin_struct_supports_conversion() {
        use crate::convert::ConvertOptions;
        use serde_json::json;

        let mut fetcher = MapFetcher::new(&[(
            "main.proto",
            r#"syntax = "proto3";
            import "google/protobuf/struct.proto";
            message Holder { google.protobuf.Struct data = 1; }"#,
        )]);
        let mut root = Root::new();
        root.load(&["main.proto"], &mut fetcher, &ParseOptions::default())
            .unwrap();
        let object = json!({ "data": { "k": [1.5, true, "s"] } });
        let message = root.from_object("Holder", &object).unwrap();
        let bytes = root.encode(&message).unwrap();
        let back = root.decode("Holder", &bytes).unwrap();
        assert_eq!(
            root.to_object(&back, &ConvertOptions::default()).unwrap(),
            object
        );
    }
}
