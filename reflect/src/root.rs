//! The schema tree owner: arena storage, mutation with structural
//! validation, dotted-path lookup with caching, and the two-pass
//! resolution that binds type references and feature sets.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::codec::TypePlan;
use crate::error::SchemaError;
use crate::features::{Edition, FeatureSet};
use crate::model::{
    EnumData, FieldData, Node, NodeCommon, NodeId, NodeKind, Reserved, ScalarKind, TypeData,
};
use crate::util::quote;

/// Lookup filters restrict which node kinds a path may resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    Any,
    Type,
    Enum,
    TypeOrEnum,
    Service,
}

impl Filter {
    fn accepts(self, node: &Node) -> bool {
        match self {
            Filter::Any => true,
            Filter::Type => matches!(node.kind, NodeKind::Type(_)),
            Filter::Enum => matches!(node.kind, NodeKind::Enum(_)),
            Filter::TypeOrEnum => matches!(node.kind, NodeKind::Type(_) | NodeKind::Enum(_)),
            Filter::Service => matches!(node.kind, NodeKind::Service(_)),
        }
    }
}

/// The unique owner of a schema tree.
///
/// Created empty, populated incrementally from descriptor JSON or parsed
/// text, and finalized by [resolve_all](#method.resolve_all). All caches
/// (path lookups, per-type codec plans) live here and are invalidated on
/// every mutation.
pub struct Root {
    nodes: Vec<Option<Node>>,
    root: NodeId,
    index: HashMap<String, NodeId>,
    pub(crate) deferred: Vec<NodeId>,
    /// Names of schema files loaded into this root, in load order.
    pub files: Vec<String>,
    lookup_cache: RefCell<HashMap<(NodeId, String, Filter), NodeId>>,
    pub(crate) plans: RefCell<HashMap<NodeId, Rc<TypePlan>>>,
}

impl Root {
    /// Create a root holding only the top-level namespace.
    pub fn new() -> Root {
        let root_node = Node {
            common: NodeCommon {
                name: String::new(),
                parent: None,
                options: None,
                comment: None,
                edition: Edition::Proto2,
                resolved: false,
                features: None,
                overrides: Default::default(),
            },
            kind: NodeKind::Namespace(Default::default()),
        };
        Root {
            nodes: vec![Some(root_node)],
            root: NodeId(0),
            index: HashMap::new(),
            deferred: Vec::new(),
            files: Vec::new(),
            lookup_cache: RefCell::new(HashMap::new()),
            plans: RefCell::new(HashMap::new()),
        }
    }

    /// The id of the top-level namespace.
    pub fn root_id(&self) -> NodeId {
        self.root
    }

    /// Borrow a node. Panics on a stale id; ids stay valid until the node
    /// is removed.
    pub fn node(&self, id: NodeId) -> &Node {
        match self.nodes.get(id.0 as usize).and_then(|slot| slot.as_ref()) {
            Some(node) => node,
            None => panic!("stale NodeId {:?}", id),
        }
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        match self.nodes.get_mut(id.0 as usize).and_then(|slot| slot.as_mut()) {
            Some(node) => node,
            None => panic!("stale NodeId {:?}", id),
        }
    }

    /// All live node ids, ascending. Parents always sort before children.
    pub fn ids(&self) -> Vec<NodeId> {
        (0..self.nodes.len() as u32)
            .map(NodeId)
            .filter(|id| self.nodes[id.0 as usize].is_some())
            .collect()
    }

    /// The fully qualified dotted name of a node; empty for the root.
    pub fn fqn(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        let mut current = Some(id);
        while let Some(cur) = current {
            let node = self.node(cur);
            if !node.common.name.is_empty() {
                parts.push(node.common.name.clone());
            }
            current = node.common.parent;
        }
        parts.reverse();
        parts.join(".")
    }

    /// Find a node by fully qualified name.
    pub fn get(&self, fqn: &str) -> Option<NodeId> {
        let fqn = fqn.strip_prefix('.').unwrap_or(fqn);
        if fqn.is_empty() {
            return Some(self.root);
        }
        self.index.get(fqn).copied()
    }

    fn invalidate(&mut self) {
        self.lookup_cache.borrow_mut().clear();
        self.plans.borrow_mut().clear();
    }

    /// Local name of a would-be sibling already claiming `name` under
    /// `parent`, across every name scope the parent kind has.
    fn name_taken(&self, parent: NodeId, name: &str) -> bool {
        let node = self.node(parent);
        let lists: Vec<&[NodeId]> = match node.kind {
            NodeKind::Namespace(ref data) => vec![&data.children],
            NodeKind::Type(ref data) => vec![&data.children, &data.fields, &data.oneofs],
            NodeKind::Service(ref data) => vec![&data.methods, &data.children],
            _ => vec![],
        };
        lists
            .into_iter()
            .flatten()
            .any(|&child| self.node(child).common.name == name)
    }

    fn child_by_name(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        let node = self.node(parent);
        let lists: Vec<&[NodeId]> = match node.kind {
            NodeKind::Namespace(ref data) => vec![&data.children],
            NodeKind::Type(ref data) => vec![&data.children],
            NodeKind::Service(ref data) => vec![&data.children],
            _ => vec![],
        };
        lists
            .into_iter()
            .flatten()
            .copied()
            .find(|&child| self.node(child).common.name == name)
    }

    /// Insert `node` under `parent`, validating uniqueness and reserved
    /// ranges. Adding a namespace where a same-named namespace already
    /// exists merges into the existing one and returns its id.
    pub fn add(&mut self, parent: NodeId, node: Node) -> Result<NodeId, SchemaError> {
        let scope = || {
            let fqn = self.fqn(parent);
            if fqn.is_empty() {
                "the root namespace".to_owned()
            } else {
                fqn
            }
        };
        if node.common.name.is_empty() {
            return Err(SchemaError::Descriptor(format!(
                "unnamed {} in {}",
                node.kind_name(),
                scope()
            )));
        }

        // Same-name namespaces merge instead of erroring.
        if matches!(node.kind, NodeKind::Namespace(_)) {
            if let Some(existing) = self.child_by_name(parent, &node.common.name) {
                if matches!(self.node(existing).kind, NodeKind::Namespace(_)) {
                    return Ok(existing);
                }
            }
        }

        if self.name_taken(parent, &node.common.name) {
            return Err(SchemaError::DuplicateName {
                name: node.common.name.clone(),
                scope: scope(),
            });
        }

        // Structural checks per (parent kind, node kind).
        let is_extension = node.as_field().map(|f| f.extend.is_some()).unwrap_or(false);
        match (&self.node(parent).kind, &node.kind) {
            (NodeKind::Namespace(_), NodeKind::Field(_)) if is_extension => {}
            (NodeKind::Namespace(_), NodeKind::Field(_)) => {
                return Err(SchemaError::Descriptor(format!(
                    "field {} declared outside a message",
                    quote(node.name())
                )))
            }
            (NodeKind::Namespace(_), _) => {}
            (NodeKind::Type(data), NodeKind::Field(field)) if !is_extension => {
                if field.id > crate::model::MAX_FIELD_ID {
                    return Err(SchemaError::Descriptor(format!(
                        "field id {} for {} exceeds the maximum of {}",
                        field.id,
                        quote(node.name()),
                        crate::model::MAX_FIELD_ID
                    )));
                }
                for &existing in data.fields.iter().chain(&data.extension_fields) {
                    if self.node(existing).as_field().map(|f| f.id) == Some(field.id) {
                        return Err(SchemaError::DuplicateId {
                            id: field.id,
                            scope: scope(),
                        });
                    }
                }
                if data.reserved.iter().any(|r| r.covers_id(field.id as i64)) {
                    return Err(SchemaError::ReservedId {
                        id: field.id,
                        scope: scope(),
                    });
                }
                if data.reserved.iter().any(|r| r.covers_name(node.name())) {
                    return Err(SchemaError::ReservedName {
                        name: node.common.name.clone(),
                        scope: scope(),
                    });
                }
                if let Some(oneof) = field.oneof {
                    if self.node(oneof).common.parent != Some(parent) {
                        return Err(SchemaError::Descriptor(format!(
                            "oneof for field {} belongs to another message",
                            quote(node.name())
                        )));
                    }
                }
            }
            (NodeKind::Type(_), NodeKind::Field(_)) => {}
            (NodeKind::Type(_), NodeKind::Type(_))
            | (NodeKind::Type(_), NodeKind::Enum(_))
            | (NodeKind::Type(_), NodeKind::OneOf(_)) => {}
            (NodeKind::Service(_), NodeKind::Method(_)) => {}
            (NodeKind::Service(_), NodeKind::Type(_))
            | (NodeKind::Service(_), NodeKind::Enum(_)) => {}
            (parent_kind, _) => {
                return Err(SchemaError::Descriptor(format!(
                    "cannot add a {} to a {}",
                    node.kind_name(),
                    match parent_kind {
                        NodeKind::Namespace(_) => "namespace",
                        NodeKind::Type(_) => "message",
                        NodeKind::Field(_) => "field",
                        NodeKind::OneOf(_) => "oneof",
                        NodeKind::Enum(_) => "enum",
                        NodeKind::Service(_) => "service",
                        NodeKind::Method(_) => "method",
                    }
                )))
            }
        }

        let id = NodeId(self.nodes.len() as u32);
        let oneof = node.as_field().and_then(|f| f.oneof);
        let is_plain_field = matches!(node.kind, NodeKind::Field(_)) && !is_extension;
        let is_oneof = matches!(node.kind, NodeKind::OneOf(_));
        let is_method = matches!(node.kind, NodeKind::Method(_));
        let mut node = node;
        node.common.parent = Some(parent);
        self.nodes.push(Some(node));

        // Register in the parent's ordered lists.
        match self.node_mut(parent).kind {
            NodeKind::Namespace(ref mut data) => data.children.push(id),
            NodeKind::Type(ref mut data) => {
                if is_plain_field {
                    data.fields.push(id);
                } else if is_oneof {
                    data.oneofs.push(id);
                } else {
                    data.children.push(id);
                }
            }
            NodeKind::Service(ref mut data) => {
                if is_method {
                    data.methods.push(id);
                } else {
                    data.children.push(id);
                }
            }
            _ => {}
        }
        if let Some(oneof) = oneof {
            if let NodeKind::OneOf(ref mut data) = self.node_mut(oneof).kind {
                data.fields.push(id);
            }
        }
        if is_extension {
            self.deferred.push(id);
        }

        self.index.insert(self.fqn(id), id);
        self.invalidate();
        Ok(id)
    }

    /// Remove a node and its subtree, leaving the tree exactly as it would
    /// have been had the node never been added.
    pub fn remove(&mut self, id: NodeId) -> Result<(), SchemaError> {
        if id == self.root {
            return Err(SchemaError::Descriptor(
                "cannot remove the root namespace".to_owned(),
            ));
        }

        // Collect the whole subtree before touching anything.
        let mut subtree = vec![id];
        let mut cursor = 0;
        while cursor < subtree.len() {
            let current = subtree[cursor];
            cursor += 1;
            match self.node(current).kind {
                NodeKind::Namespace(ref data) => subtree.extend(&data.children),
                NodeKind::Type(ref data) => {
                    subtree.extend(&data.children);
                    subtree.extend(&data.fields);
                    subtree.extend(&data.oneofs);
                }
                NodeKind::Service(ref data) => {
                    subtree.extend(&data.methods);
                    subtree.extend(&data.children);
                }
                _ => {}
            }
        }

        let parent = self.node(id).common.parent;
        let oneof = self.node(id).as_field().and_then(|f| f.oneof);

        if let Some(parent) = parent {
            match self.node_mut(parent).kind {
                NodeKind::Namespace(ref mut data) => data.children.retain(|&c| c != id),
                NodeKind::Type(ref mut data) => {
                    data.children.retain(|&c| c != id);
                    data.fields.retain(|&c| c != id);
                    data.oneofs.retain(|&c| c != id);
                }
                NodeKind::Service(ref mut data) => {
                    data.methods.retain(|&c| c != id);
                    data.children.retain(|&c| c != id);
                }
                _ => {}
            }
        }
        if let Some(oneof) = oneof {
            if let NodeKind::OneOf(ref mut data) = self.node_mut(oneof).kind {
                data.fields.retain(|&c| c != id);
            }
        }

        for &gone in &subtree {
            // Unbind removed extension fields everywhere they were spliced.
            for slot in self.nodes.iter_mut().flatten() {
                if let NodeKind::Type(ref mut data) = slot.kind {
                    data.extension_fields.retain(|&c| c != gone);
                }
            }
        }

        for &gone in &subtree {
            let fqn = self.fqn(gone);
            self.index.remove(&fqn);
            self.deferred.retain(|&d| d != gone);
        }
        for gone in subtree {
            self.nodes[gone.0 as usize] = None;
        }

        self.invalidate();
        Ok(())
    }

    /// Append a value to an enum, validating name/value uniqueness and
    /// reserved ranges. Duplicate values are only legal with `allow_alias`.
    pub fn add_enum_value(
        &mut self,
        enum_id: NodeId,
        name: &str,
        value: i32,
    ) -> Result<(), SchemaError> {
        let scope = self.fqn(enum_id);
        let data = match self.node(enum_id).kind {
            NodeKind::Enum(ref data) => data,
            _ => return Err(SchemaError::Descriptor(format!("{} is not an enum", scope))),
        };
        if data.by_name.contains_key(name) {
            return Err(SchemaError::DuplicateName {
                name: name.to_owned(),
                scope,
            });
        }
        if !data.allow_alias && data.values.iter().any(|&(_, v)| v == value) {
            return Err(SchemaError::DuplicateId {
                id: value as u32,
                scope,
            });
        }
        if data.reserved.iter().any(|r| r.covers_id(value as i64)) {
            return Err(SchemaError::ReservedId {
                id: value as u32,
                scope,
            });
        }
        if data.reserved.iter().any(|r| r.covers_name(name)) {
            return Err(SchemaError::ReservedName {
                name: name.to_owned(),
                scope,
            });
        }
        if let NodeKind::Enum(ref mut data) = self.node_mut(enum_id).kind {
            data.values.push((name.to_owned(), value));
            data.by_name.insert(name.to_owned(), value);
        }
        self.invalidate();
        Ok(())
    }

    /// Resolve a dotted path from `scope`. Absolute paths (leading dot)
    /// resolve from the root; relative paths search the scope and then its
    /// ancestors outward. The first hit per (scope, path, filter) is cached.
    pub fn lookup(&self, scope: NodeId, path: &str, filter: Filter) -> Option<NodeId> {
        let key = (scope, path.to_owned(), filter);
        if let Some(&hit) = self.lookup_cache.borrow().get(&key) {
            return Some(hit);
        }

        let found = if let Some(absolute) = path.strip_prefix('.') {
            self.descend(self.root, absolute, filter)
        } else {
            let mut current = Some(scope);
            let mut found = None;
            while let Some(ns) = current {
                if let Some(hit) = self.descend(ns, path, filter) {
                    found = Some(hit);
                    break;
                }
                current = self.node(ns).common.parent;
            }
            found
        };

        if let Some(hit) = found {
            self.lookup_cache.borrow_mut().insert(key, hit);
        }
        found
    }

    fn descend(&self, from: NodeId, path: &str, filter: Filter) -> Option<NodeId> {
        let mut current = from;
        for part in path.split('.') {
            current = self.child_by_name(current, part)?;
        }
        if filter.accepts(self.node(current)) {
            Some(current)
        } else {
            None
        }
    }

    pub fn lookup_type(&self, scope: NodeId, path: &str) -> Option<NodeId> {
        self.lookup(scope, path, Filter::Type)
    }

    pub fn lookup_enum(&self, scope: NodeId, path: &str) -> Option<NodeId> {
        self.lookup(scope, path, Filter::Enum)
    }

    pub fn lookup_type_or_enum(&self, scope: NodeId, path: &str) -> Option<NodeId> {
        self.lookup(scope, path, Filter::TypeOrEnum)
    }

    /// Whether the whole tree has been resolved since the last mutation.
    pub fn is_resolved(&self) -> bool {
        self.node(self.root).common.resolved
    }

    /// Resolve the whole tree: first features, then cross-references and
    /// deferred extensions. Fails listing every extension field whose target
    /// type never appeared.
    pub fn resolve_all(&mut self) -> Result<(), SchemaError> {
        // Pass 1: feature resolution, parents before children.
        for id in self.ids() {
            self.resolve_features(id);
        }

        // Pass 2: bind type references.
        for id in self.ids() {
            let (type_name, parent, is_field) = match self.node(id).kind {
                NodeKind::Field(ref field) => {
                    if ScalarKind::parse(&field.type_name).is_some() {
                        (None, self.node(id).common.parent, true)
                    } else {
                        (
                            Some(field.type_name.clone()),
                            self.node(id).common.parent,
                            true,
                        )
                    }
                }
                NodeKind::Method(_) => (None, self.node(id).common.parent, false),
                _ => continue,
            };
            let scope = match parent {
                Some(p) => p,
                None => continue,
            };
            if is_field {
                if let Some(type_name) = type_name {
                    let target = self
                        .lookup_type_or_enum(scope, &type_name)
                        .ok_or_else(|| SchemaError::UnresolvedType {
                            type_name: type_name.clone(),
                            owner: self.fqn(id),
                        })?;
                    if let NodeKind::Field(ref mut field) = self.node_mut(id).kind {
                        field.resolved_type = Some(target);
                    }
                }
            } else {
                let (request, response) = match self.node(id).kind {
                    NodeKind::Method(ref m) => (m.request_type.clone(), m.response_type.clone()),
                    _ => continue,
                };
                let service_scope = scope;
                let req = self.lookup_type(service_scope, &request).ok_or_else(|| {
                    SchemaError::UnresolvedType {
                        type_name: request.clone(),
                        owner: self.fqn(id),
                    }
                })?;
                let resp = self.lookup_type(service_scope, &response).ok_or_else(|| {
                    SchemaError::UnresolvedType {
                        type_name: response.clone(),
                        owner: self.fqn(id),
                    }
                })?;
                if let NodeKind::Method(ref mut m) = self.node_mut(id).kind {
                    m.resolved_request = Some(req);
                    m.resolved_response = Some(resp);
                }
            }
        }

        // Pass 3: bind extension fields collected during construction.
        let pending = std::mem::take(&mut self.deferred);
        let mut unresolved = Vec::new();
        for ext in pending {
            let (target_name, field_id) = match self.node(ext).kind {
                NodeKind::Field(ref field) => (
                    field.extend.clone().unwrap_or_default(),
                    field.id,
                ),
                _ => continue,
            };
            let scope = self.node(ext).common.parent.unwrap_or(self.root);
            match self.lookup_type(scope, &target_name) {
                Some(target) => {
                    self.bind_extension(ext, target, field_id)?;
                }
                None => unresolved.push(ext),
            }
        }
        if !unresolved.is_empty() {
            let names: Vec<String> = unresolved.iter().map(|&e| self.fqn(e)).collect();
            self.deferred = unresolved;
            return Err(SchemaError::UnresolvedExtensions(names.join(", ")));
        }

        for id in self.ids() {
            self.node_mut(id).common.resolved = true;
        }
        self.plans.borrow_mut().clear();
        Ok(())
    }

    fn bind_extension(
        &mut self,
        ext: NodeId,
        target: NodeId,
        field_id: u32,
    ) -> Result<(), SchemaError> {
        let scope = self.fqn(target);
        {
            let data = match self.node(target).kind {
                NodeKind::Type(ref data) => data,
                _ => {
                    return Err(SchemaError::Descriptor(format!(
                        "extension target {} is not a message",
                        scope
                    )))
                }
            };
            if !data.extension_ranges.is_empty()
                && !data
                    .extension_ranges
                    .iter()
                    .any(|&(lo, hi)| lo <= field_id && field_id <= hi)
            {
                return Err(SchemaError::Descriptor(format!(
                    "extension field id {} is outside the extension ranges of {}",
                    field_id, scope
                )));
            }
            for &existing in data.fields.iter().chain(&data.extension_fields) {
                if self.node(existing).as_field().map(|f| f.id) == Some(field_id) {
                    return Err(SchemaError::DuplicateId {
                        id: field_id,
                        scope: scope.clone(),
                    });
                }
            }
        }
        if let NodeKind::Type(ref mut data) = self.node_mut(target).kind {
            data.extension_fields.push(ext);
        }
        Ok(())
    }

    fn resolve_features(&mut self, id: NodeId) -> FeatureSet {
        if let Some(features) = self.node(id).common.features {
            return features;
        }
        let edition = self.node(id).common.edition;
        let parent = self.node(id).common.parent;
        let oneof = self.node(id).as_field().and_then(|f| f.oneof);

        let base = match oneof.or(parent) {
            None => FeatureSet::defaults(edition),
            Some(up) => {
                if self.node(up).common.edition == edition {
                    self.resolve_features(up)
                } else {
                    FeatureSet::defaults(edition)
                }
            }
        };

        let node = self.node(id);
        let mut merged = base;
        if let Some(ref options) = node.common.options {
            merged = merged.merged(&crate::features::FeatureOverrides::from_options(options));
        }
        merged = merged.merged(&node.common.overrides);

        self.node_mut(id).common.features = Some(merged);
        merged
    }

    /// The resolved feature set of a node; defaults if `resolve_all` has
    /// not run yet.
    pub fn features(&self, id: NodeId) -> FeatureSet {
        self.node(id)
            .common
            .features
            .unwrap_or_else(|| FeatureSet::defaults(self.node(id).common.edition))
    }

    /// Create or reuse the namespace chain for a dotted package name.
    pub fn get_or_create_namespace(
        &mut self,
        scope: NodeId,
        dotted: &str,
        edition: Edition,
    ) -> Result<NodeId, SchemaError> {
        let mut current = scope;
        for part in dotted.split('.') {
            if part.is_empty() {
                continue;
            }
            current = match self.child_by_name(current, part) {
                Some(existing) => existing,
                None => self.add(current, Node::namespace(part, edition))?,
            };
        }
        Ok(current)
    }

    pub(crate) fn enum_data(&self, id: NodeId) -> Option<&EnumData> {
        self.node(id).as_enum()
    }

    pub(crate) fn type_data(&self, id: NodeId) -> Option<&TypeData> {
        self.node(id).as_type()
    }

    pub(crate) fn field_data(&self, id: NodeId) -> Option<&FieldData> {
        self.node(id).as_field()
    }

    pub(crate) fn add_reserved(&mut self, id: NodeId, entry: Reserved) {
        match self.node_mut(id).kind {
            NodeKind::Type(ref mut data) => data.reserved.push(entry),
            NodeKind::Enum(ref mut data) => data.reserved.push(entry),
            _ => {}
        }
        self.invalidate();
    }

    pub(crate) fn add_extension_range(&mut self, id: NodeId, lo: u32, hi: u32) {
        if let NodeKind::Type(ref mut data) = self.node_mut(id).kind {
            data.extension_ranges.push((lo, hi));
        }
        self.invalidate();
    }
}

impl Default for Root {
    fn default() -> Root {
        Root::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Rule;

    fn build_basic() -> (Root, NodeId, NodeId) {
        let mut root = Root::new();
        let ns = root
            .add(root.root_id(), Node::namespace("pkg", Edition::Proto3))
            .unwrap();
        let msg = root.add(ns, Node::message("Msg", Edition::Proto3)).unwrap();
        root.add(
            msg,
            Node::field("x", 1, Rule::Singular, "int32", Edition::Proto3),
        )
        .unwrap();
        (root, ns, msg)
    }

    #[test]
    fn add_and_lookup() {
        let (root, ns, msg) = build_basic();
        assert_eq!(root.fqn(msg), "pkg.Msg");
        assert_eq!(root.lookup_type(ns, "Msg"), Some(msg));
        assert_eq!(root.lookup_type(root.root_id(), "pkg.Msg"), Some(msg));
        assert_eq!(root.lookup_type(msg, ".pkg.Msg"), Some(msg));
        assert_eq!(root.get("pkg.Msg"), Some(msg));
        assert_eq!(root.lookup_type(ns, "Other"), None);
    }

    #[test]
    fn lookup_walks_ancestors() {
        let mut root = Root::new();
        let a = root
            .add(root.root_id(), Node::namespace("a", Edition::Proto3))
            .unwrap();
        let b = root.add(a, Node::namespace("b", Edition::Proto3)).unwrap();
        let top = root.add(a, Node::message("Top", Edition::Proto3)).unwrap();
        // Relative lookup from the inner namespace climbs to the outer one.
        assert_eq!(root.lookup_type(b, "Top"), Some(top));
    }

    #[test]
    fn duplicate_name_rejected() {
        let (mut root, ns, _) = build_basic();
        let err = root
            .add(ns, Node::message("Msg", Edition::Proto3))
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateName { .. }));
    }

    #[test]
    fn duplicate_field_id_rejected() {
        let (mut root, _, msg) = build_basic();
        let err = root
            .add(
                msg,
                Node::field("y", 1, Rule::Singular, "int32", Edition::Proto3),
            )
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateId { id: 1, .. }));
    }

    #[test]
    fn reserved_ranges_reject_fields() {
        let (mut root, _, msg) = build_basic();
        root.add_reserved(msg, Reserved::Range(5, 10));
        root.add_reserved(msg, Reserved::Name("legacy".to_owned()));
        let err = root
            .add(
                msg,
                Node::field("y", 7, Rule::Singular, "int32", Edition::Proto3),
            )
            .unwrap_err();
        assert!(matches!(err, SchemaError::ReservedId { id: 7, .. }));
        let err = root
            .add(
                msg,
                Node::field("legacy", 2, Rule::Singular, "int32", Edition::Proto3),
            )
            .unwrap_err();
        assert!(matches!(err, SchemaError::ReservedName { .. }));
    }

    #[test]
    fn namespace_merge() {
        let (mut root, ns, _) = build_basic();
        // Re-adding the same namespace merges instead of erroring.
        let again = root
            .add(root.root_id(), Node::namespace("pkg", Edition::Proto3))
            .unwrap();
        assert_eq!(again, ns);
        let other = root
            .add(again, Node::message("Other", Edition::Proto3))
            .unwrap();
        assert_eq!(root.fqn(other), "pkg.Other");
    }

    #[test]
    fn remove_restores_pre_add_state() {
        let (mut root, ns, _) = build_basic();
        // Warm the lookup cache, then add and remove a node.
        assert_eq!(root.lookup_type(ns, "Late"), None);
        let late = root.add(ns, Node::message("Late", Edition::Proto3)).unwrap();
        assert_eq!(root.lookup_type(ns, "Late"), Some(late));
        root.remove(late).unwrap();
        assert_eq!(root.lookup_type(ns, "Late"), None);
        assert_eq!(root.get("pkg.Late"), None);
        // The parent's child list no longer mentions the node.
        let children = match root.node(ns).kind {
            NodeKind::Namespace(ref data) => data.children.clone(),
            _ => unreachable!(),
        };
        assert!(!children.contains(&late));
    }

    #[test]
    fn remove_subtree_unindexes_children() {
        let (mut root, ns, msg) = build_basic();
        root.remove(msg).unwrap();
        assert_eq!(root.get("pkg.Msg"), None);
        assert_eq!(root.get("pkg.Msg.x"), None);
        assert_eq!(root.lookup_type(ns, "Msg"), None);
    }

    #[test]
    fn resolve_binds_type_references() {
        let mut root = Root::new();
        let ns = root
            .add(root.root_id(), Node::namespace("pkg", Edition::Proto3))
            .unwrap();
        let inner = root
            .add(ns, Node::message("Inner", Edition::Proto3))
            .unwrap();
        let outer = root
            .add(ns, Node::message("Outer", Edition::Proto3))
            .unwrap();
        let field = root
            .add(
                outer,
                Node::field("inner", 1, Rule::Singular, "Inner", Edition::Proto3),
            )
            .unwrap();
        root.resolve_all().unwrap();
        assert_eq!(root.field_data(field).unwrap().resolved_type, Some(inner));
        assert!(root.is_resolved());
    }

    #[test]
    fn resolve_fails_on_unknown_type() {
        let mut root = Root::new();
        let msg = root
            .add(root.root_id(), Node::message("M", Edition::Proto3))
            .unwrap();
        root.add(
            msg,
            Node::field("x", 1, Rule::Singular, "Missing", Edition::Proto3),
        )
        .unwrap();
        let err = root.resolve_all().unwrap_err();
        assert!(matches!(err, SchemaError::UnresolvedType { .. }));
    }

    #[test]
    fn unresolved_extension_reported_by_name() {
        let mut root = Root::new();
        let mut ext = Node::field("extra", 100, Rule::Singular, "int32", Edition::Proto2);
        if let NodeKind::Field(ref mut f) = ext.kind {
            f.extend = Some("NeverDefined".to_owned());
        }
        root.add(root.root_id(), ext).unwrap();
        let err = root.resolve_all().unwrap_err();
        match err {
            SchemaError::UnresolvedExtensions(names) => assert!(names.contains("extra")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn extension_binds_to_target() {
        let mut root = Root::new();
        let target = root
            .add(root.root_id(), Node::message("Target", Edition::Proto2))
            .unwrap();
        root.add_extension_range(target, 100, 200);
        let mut ext = Node::field("extra", 150, Rule::Singular, "int32", Edition::Proto2);
        if let NodeKind::Field(ref mut f) = ext.kind {
            f.extend = Some("Target".to_owned());
        }
        let ext = root.add(root.root_id(), ext).unwrap();
        root.resolve_all().unwrap();
        assert!(root
            .type_data(target)
            .unwrap()
            .extension_fields
            .contains(&ext));
    }

    #[test]
    fn extension_outside_range_rejected() {
        let mut root = Root::new();
        let target = root
            .add(root.root_id(), Node::message("Target", Edition::Proto2))
            .unwrap();
        root.add_extension_range(target, 100, 200);
        let mut ext = Node::field("extra", 50, Rule::Singular, "int32", Edition::Proto2);
        if let NodeKind::Field(ref mut f) = ext.kind {
            f.extend = Some("Target".to_owned());
        }
        root.add(root.root_id(), ext).unwrap();
        assert!(root.resolve_all().is_err());
    }

    #[test]
    fn enum_value_validation() {
        let mut root = Root::new();
        let e = root
            .add(root.root_id(), Node::enumeration("E", Edition::Proto3))
            .unwrap();
        root.add_enum_value(e, "A", 0).unwrap();
        root.add_enum_value(e, "B", 1).unwrap();
        assert!(matches!(
            root.add_enum_value(e, "A", 2),
            Err(SchemaError::DuplicateName { .. })
        ));
        assert!(matches!(
            root.add_enum_value(e, "C", 1),
            Err(SchemaError::DuplicateId { .. })
        ));
        if let NodeKind::Enum(ref mut data) = root.node_mut(e).kind {
            data.allow_alias = true;
        }
        root.add_enum_value(e, "B_ALIAS", 1).unwrap();
        assert_eq!(root.enum_data(e).unwrap().name_of(1), Some("B"));
    }

    #[test]
    fn features_follow_edition() {
        let mut root = Root::new();
        let p3 = root
            .add(root.root_id(), Node::message("P3", Edition::Proto3))
            .unwrap();
        let f3 = root
            .add(
                p3,
                Node::field("x", 1, Rule::Singular, "int32", Edition::Proto3),
            )
            .unwrap();
        root.resolve_all().unwrap();
        assert_eq!(
            root.features(f3).field_presence,
            crate::features::FieldPresence::Implicit
        );
    }
}
