//! Recursive-descent parser for the schema definition language.
//!
//! Builds nodes directly into a [Root] as declarations are recognized; the
//! caller runs [Root::resolve_all] once every file is in. Errors carry the
//! line and column of the offending token.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value as Json;

use crate::error::SchemaError;
use crate::features::{Edition, FieldPresence};
use crate::model::{Node, NodeId, NodeKind, Reserved, Rule, ScalarKind, MAX_FIELD_ID};
use crate::root::Root;
use crate::tokenizer::{tokenize, Token, TokenKind, Tokenized};
use crate::util::{camel_case, quote};

lazy_static! {
    static ref NAME_RE: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
    static ref DECIMAL_RE: Regex = Regex::new(r"^[0-9]+$").unwrap();
    static ref HEX_RE: Regex = Regex::new(r"^0[xX][0-9a-fA-F]+$").unwrap();
    static ref OCTAL_RE: Regex = Regex::new(r"^0[0-7]+$").unwrap();
    static ref FLOAT_RE: Regex =
        Regex::new(r"^(?:[0-9]*\.[0-9]+(?:[eE][+-]?[0-9]+)?|[0-9]+(?:\.[0-9]*)?[eE][+-]?[0-9]+|[0-9]+\.)$")
            .unwrap();
}

/// Knobs for the text front end.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// Keep declared field names instead of converting to lowerCamelCase.
    pub keep_case: bool,
    /// Treat every comment as attachable documentation.
    pub alternate_comment_mode: bool,
}

/// What a single parsed file declared besides its nodes.
#[derive(Debug, Default)]
pub struct Parsed {
    pub package: Option<String>,
    pub imports: Vec<String>,
    pub weak_imports: Vec<String>,
}

/// Parse `source` into `root`. The tree is left unresolved; call
/// [Root::resolve_all] after all files are in.
pub fn parse_into(
    root: &mut Root,
    source: &str,
    opts: &ParseOptions,
) -> Result<Parsed, SchemaError> {
    let stream = tokenize(source, opts.alternate_comment_mode)?;
    let mut parser = Parser {
        root,
        stream,
        pos: 0,
        edition: Edition::Proto2,
        opts: opts.clone(),
    };
    parser.parse_file()
}

impl Root {
    /// Build a fully resolved root from schema text.
    pub fn from_text(source: &str) -> Result<Root, SchemaError> {
        let mut root = Root::new();
        parse_into(&mut root, source, &ParseOptions::default())?;
        root.resolve_all()?;
        Ok(root)
    }
}

struct Parser<'a> {
    root: &'a mut Root,
    stream: Tokenized,
    pos: usize,
    edition: Edition,
    opts: ParseOptions,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Token {
        &self.stream.tokens[self.pos.min(self.stream.tokens.len() - 1)]
    }

    fn next(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn at(&self, text: &str) -> bool {
        let token = self.peek();
        token.kind != TokenKind::Str && token.text == text
    }

    fn skip_if(&mut self, text: &str) -> bool {
        if self.at(text) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, text: &str) -> Result<(), SchemaError> {
        if self.skip_if(text) {
            Ok(())
        } else {
            let token = self.peek().clone();
            Err(self.err(
                &token,
                &format!("expected {} but found {}", quote(text), quote(&token.text)),
            ))
        }
    }

    fn err(&self, token: &Token, msg: &str) -> SchemaError {
        SchemaError::Parse {
            msg: msg.to_owned(),
            line: token.line,
            column: token.column,
        }
    }

    fn expect_name(&mut self) -> Result<Token, SchemaError> {
        let token = self.next();
        if token.kind == TokenKind::Ident && NAME_RE.is_match(&token.text) {
            Ok(token)
        } else {
            Err(self.err(
                &token,
                &format!("expected identifier but found {}", quote(&token.text)),
            ))
        }
    }

    fn expect_string(&mut self) -> Result<Token, SchemaError> {
        let token = self.next();
        if token.kind == TokenKind::Str {
            Ok(token)
        } else {
            Err(self.err(
                &token,
                &format!("expected string but found {}", quote(&token.text)),
            ))
        }
    }

    /// A dotted, possibly absolute type reference spanning several tokens.
    fn type_ref(&mut self) -> Result<(String, Token), SchemaError> {
        let mut name = String::new();
        if self.skip_if(".") {
            name.push('.');
        }
        let first = self.expect_name()?;
        name.push_str(&first.text);
        while self.skip_if(".") {
            let part = self.expect_name()?;
            name.push('.');
            name.push_str(&part.text);
        }
        Ok((name, first))
    }

    fn field_name(&self, declared: &str) -> String {
        if self.opts.keep_case {
            declared.to_owned()
        } else {
            camel_case(declared)
        }
    }

    fn comment_here(&self, token: &Token) -> Option<String> {
        self.stream.comment_for(token.line).map(|c| c.to_owned())
    }

    /// A non-negative integer literal in decimal, hex or octal; `max` maps
    /// to the largest valid field id when allowed.
    fn parse_id(&mut self, allow_max: bool) -> Result<u32, SchemaError> {
        let token = self.next();
        if allow_max && token.kind == TokenKind::Ident && (token.text == "max" || token.text == "MAX") {
            return Ok(MAX_FIELD_ID);
        }
        let value = if DECIMAL_RE.is_match(&token.text) {
            token.text.parse::<u64>().ok()
        } else if HEX_RE.is_match(&token.text) {
            u64::from_str_radix(&token.text[2..], 16).ok()
        } else if OCTAL_RE.is_match(&token.text) {
            u64::from_str_radix(&token.text[1..], 8).ok()
        } else {
            None
        };
        match value {
            Some(v) if v <= MAX_FIELD_ID as u64 => Ok(v as u32),
            _ => Err(self.err(
                &token,
                &format!("invalid id {}", quote(&token.text)),
            )),
        }
    }

    /// A signed 32-bit integer literal (enum values, reserved enum ranges).
    fn parse_int32(&mut self) -> Result<i32, SchemaError> {
        let negative = self.skip_if("-");
        let token = self.next();
        let value = if DECIMAL_RE.is_match(&token.text) {
            token.text.parse::<i64>().ok()
        } else if HEX_RE.is_match(&token.text) {
            i64::from_str_radix(&token.text[2..], 16).ok()
        } else if OCTAL_RE.is_match(&token.text) {
            i64::from_str_radix(&token.text[1..], 8).ok()
        } else {
            None
        };
        match value {
            Some(v) => {
                let signed = if negative { -v } else { v };
                if signed < i32::MIN as i64 || signed > i32::MAX as i64 {
                    Err(self.err(&token, &format!("integer {} out of range", signed)))
                } else {
                    Ok(signed as i32)
                }
            }
            None => Err(self.err(
                &token,
                &format!("expected integer but found {}", quote(&token.text)),
            )),
        }
    }

    fn parse_file(&mut self) -> Result<Parsed, SchemaError> {
        let mut parsed = Parsed::default();
        let mut scope = self.root.root_id();

        loop {
            let token = self.peek().clone();
            if token.kind == TokenKind::Eof {
                break;
            }
            match token.text.as_str() {
                "syntax" => {
                    self.next();
                    self.expect("=")?;
                    let value = self.expect_string()?;
                    self.edition = match value.text.as_str() {
                        "proto2" => Edition::Proto2,
                        "proto3" => Edition::Proto3,
                        other => {
                            return Err(self.err(
                                &value,
                                &format!("invalid syntax {}", quote(other)),
                            ))
                        }
                    };
                    self.expect(";")?;
                }
                "edition" => {
                    self.next();
                    self.expect("=")?;
                    let value = self.expect_string()?;
                    self.edition = match Edition::parse(&value.text) {
                        Some(e) if e.supports_features() => e,
                        _ => {
                            return Err(self.err(
                                &value,
                                &format!("invalid edition {}", quote(&value.text)),
                            ))
                        }
                    };
                    self.expect(";")?;
                }
                "package" => {
                    self.next();
                    if parsed.package.is_some() {
                        return Err(self.err(&token, "duplicate package declaration"));
                    }
                    let (name, _) = self.type_ref()?;
                    self.expect(";")?;
                    scope = self
                        .root
                        .get_or_create_namespace(self.root.root_id(), &name, self.edition)?;
                    parsed.package = Some(name);
                }
                "import" => {
                    self.next();
                    let weak = self.skip_if("weak");
                    if !weak {
                        // Public imports re-export; for loading purposes they
                        // are plain imports.
                        self.skip_if("public");
                    }
                    let target = self.expect_string()?;
                    self.expect(";")?;
                    if weak {
                        parsed.weak_imports.push(target.text);
                    } else {
                        parsed.imports.push(target.text);
                    }
                }
                ";" => {
                    self.next();
                }
                _ => self.parse_common(scope, &token)?,
            }
        }
        Ok(parsed)
    }

    /// The constructs shared by file scope and message scope.
    fn parse_common(&mut self, scope: NodeId, token: &Token) -> Result<(), SchemaError> {
        match token.text.as_str() {
            "option" => {
                self.next();
                self.parse_option_statement(scope)
            }
            "message" => {
                self.next();
                self.parse_type(scope)
            }
            "enum" => {
                self.next();
                self.parse_enum(scope)
            }
            "service" => {
                self.next();
                self.parse_service(scope)
            }
            "extend" => {
                self.next();
                self.parse_extend(scope)
            }
            other => Err(self.err(token, &format!("unexpected token {}", quote(other)))),
        }
    }

    fn parse_type(&mut self, scope: NodeId) -> Result<(), SchemaError> {
        let name = self.expect_name()?;
        let mut node = Node::message(&name.text, self.edition);
        node.common.comment = self.comment_here(&name);
        let id = self.root.add(scope, node)?;
        self.expect("{")?;
        self.parse_type_body(id)?;
        self.skip_if(";");
        Ok(())
    }

    fn parse_type_body(&mut self, id: NodeId) -> Result<(), SchemaError> {
        loop {
            let token = self.peek().clone();
            match token.text.as_str() {
                "}" if token.kind == TokenKind::Punct => {
                    self.next();
                    return Ok(());
                }
                "" => return Err(self.err(&token, "unexpected end of input in message body")),
                ";" => {
                    self.next();
                }
                "option" => {
                    self.next();
                    self.parse_option_statement(id)?;
                }
                "message" => {
                    self.next();
                    self.parse_type(id)?;
                }
                "enum" => {
                    self.next();
                    self.parse_enum(id)?;
                }
                "extend" => {
                    self.next();
                    self.parse_extend(id)?;
                }
                "oneof" => {
                    self.next();
                    self.parse_oneof(id)?;
                }
                "map" => {
                    self.next();
                    self.parse_map_field(id, None)?;
                }
                "reserved" => {
                    self.next();
                    self.parse_reserved(id)?;
                }
                "extensions" => {
                    self.next();
                    self.parse_extensions(id)?;
                }
                "required" | "optional" | "repeated" => {
                    self.next();
                    let (rule, presence) = self.cardinality(&token)?;
                    if self.at("group") {
                        self.next();
                        self.parse_group(id, rule, presence, &token)?;
                    } else {
                        self.parse_field(id, rule, presence, None, None)?;
                    }
                }
                _ => {
                    // Label-free field: proto3 and editions only.
                    if self.edition == Edition::Proto2 {
                        return Err(self.err(
                            &token,
                            "missing field cardinality (required, optional or repeated)",
                        ));
                    }
                    if token.text == "group" {
                        return Err(self.err(&token, "group fields require proto2"));
                    }
                    self.parse_field(id, Rule::Singular, None, None, None)?;
                }
            }
        }
    }

    fn cardinality(
        &self,
        token: &Token,
    ) -> Result<(Rule, Option<FieldPresence>), SchemaError> {
        match token.text.as_str() {
            "required" => {
                if self.edition != Edition::Proto2 {
                    return Err(self.err(token, "required fields require proto2"));
                }
                Ok((Rule::Singular, Some(FieldPresence::LegacyRequired)))
            }
            "optional" => {
                if self.edition.supports_features() {
                    return Err(self.err(
                        token,
                        "explicit field presence under editions uses features, not labels",
                    ));
                }
                Ok((Rule::Singular, Some(FieldPresence::Explicit)))
            }
            _ => Ok((Rule::Repeated, None)),
        }
    }

    fn parse_field(
        &mut self,
        type_id: NodeId,
        rule: Rule,
        presence: Option<FieldPresence>,
        oneof: Option<NodeId>,
        extend: Option<String>,
    ) -> Result<(), SchemaError> {
        if self.at("map") {
            self.next();
            return self.parse_map_field(type_id, oneof);
        }
        let (type_name, first) = self.type_ref()?;
        let declared = self.expect_name()?;
        self.expect("=")?;
        let id = self.parse_id(false)?;

        let mut node = Node::field(
            &self.field_name(&declared.text),
            id,
            rule,
            &type_name,
            self.edition,
        );
        node.common.comment = self.comment_here(&first);
        node.common.overrides.field_presence = presence;
        if let NodeKind::Field(ref mut field) = node.kind {
            field.oneof = oneof;
            field.extend = extend;
        }
        self.parse_inline_options(&mut node)?;
        self.expect(";")?;
        self.root.add(type_id, node)?;
        Ok(())
    }

    fn parse_map_field(
        &mut self,
        type_id: NodeId,
        oneof: Option<NodeId>,
    ) -> Result<(), SchemaError> {
        if oneof.is_some() {
            let token = self.peek().clone();
            return Err(self.err(&token, "map fields are not allowed in oneofs"));
        }
        self.expect("<")?;
        let key_token = self.expect_name()?;
        let key_kind = match ScalarKind::parse(&key_token.text) {
            Some(kind) if kind.valid_map_key() => kind,
            _ => {
                return Err(self.err(
                    &key_token,
                    &format!("invalid map key type {}", quote(&key_token.text)),
                ))
            }
        };
        self.expect(",")?;
        let (value_type, _) = self.type_ref()?;
        self.expect(">")?;
        let declared = self.expect_name()?;
        self.expect("=")?;
        let id = self.parse_id(false)?;

        let mut node = Node::field(
            &self.field_name(&declared.text),
            id,
            Rule::Map,
            &value_type,
            self.edition,
        );
        node.common.comment = self.comment_here(&key_token);
        if let NodeKind::Field(ref mut field) = node.kind {
            field.key_kind = Some(key_kind);
        }
        self.parse_inline_options(&mut node)?;
        self.expect(";")?;
        self.root.add(type_id, node)?;
        Ok(())
    }

    fn parse_group(
        &mut self,
        type_id: NodeId,
        rule: Rule,
        presence: Option<FieldPresence>,
        label: &Token,
    ) -> Result<(), SchemaError> {
        if self.edition != Edition::Proto2 {
            return Err(self.err(label, "group fields require proto2"));
        }
        let name = self.expect_name()?;
        self.expect("=")?;
        let id = self.parse_id(false)?;

        let mut group = Node::message(&name.text, self.edition);
        group.common.comment = self.comment_here(&name);
        if let NodeKind::Type(ref mut data) = group.kind {
            data.is_group = true;
        }
        let group_id = self.root.add(type_id, group)?;
        self.expect("{")?;
        self.parse_type_body(group_id)?;
        self.skip_if(";");

        let mut field = Node::field(
            &name.text.to_lowercase(),
            id,
            rule,
            &name.text,
            self.edition,
        );
        field.common.overrides.field_presence = presence;
        if let NodeKind::Field(ref mut data) = field.kind {
            data.delimited = true;
        }
        self.root.add(type_id, field)?;
        Ok(())
    }

    fn parse_oneof(&mut self, type_id: NodeId) -> Result<(), SchemaError> {
        let name = self.expect_name()?;
        let mut node = Node::oneof(&name.text, self.edition);
        node.common.comment = self.comment_here(&name);
        let oneof_id = self.root.add(type_id, node)?;
        self.expect("{")?;
        loop {
            let token = self.peek().clone();
            match token.text.as_str() {
                "}" if token.kind == TokenKind::Punct => {
                    self.next();
                    break;
                }
                "" => return Err(self.err(&token, "unexpected end of input in oneof body")),
                ";" => {
                    self.next();
                }
                "option" => {
                    self.next();
                    self.parse_option_statement(oneof_id)?;
                }
                "required" | "optional" | "repeated" | "map" => {
                    return Err(self.err(
                        &token,
                        &format!("{} is not allowed in a oneof", quote(&token.text)),
                    ))
                }
                _ => {
                    self.parse_field(type_id, Rule::Singular, None, Some(oneof_id), None)?;
                }
            }
        }
        self.skip_if(";");
        Ok(())
    }

    fn parse_enum(&mut self, scope: NodeId) -> Result<(), SchemaError> {
        let name = self.expect_name()?;
        let mut node = Node::enumeration(&name.text, self.edition);
        node.common.comment = self.comment_here(&name);
        let enum_id = self.root.add(scope, node)?;
        self.expect("{")?;
        let mut first = true;
        loop {
            let token = self.peek().clone();
            match token.text.as_str() {
                "}" if token.kind == TokenKind::Punct => {
                    self.next();
                    break;
                }
                "" => return Err(self.err(&token, "unexpected end of input in enum body")),
                ";" => {
                    self.next();
                }
                "option" => {
                    self.next();
                    self.parse_option_statement(enum_id)?;
                }
                "reserved" => {
                    self.next();
                    self.parse_reserved(enum_id)?;
                }
                _ => {
                    let value_name = self.expect_name()?;
                    self.expect("=")?;
                    let value = self.parse_int32()?;
                    if first && self.edition == Edition::Proto3 && value != 0 {
                        return Err(self.err(
                            &value_name,
                            "the first enum value must be zero in proto3",
                        ));
                    }
                    first = false;
                    // Per-value options (e.g. deprecated) are recognized and
                    // dropped; there is no node to attach them to.
                    let mut scratch = Node::enumeration("ignored", self.edition);
                    self.parse_inline_options(&mut scratch)?;
                    self.expect(";")?;
                    self.root.add_enum_value(enum_id, &value_name.text, value)?;
                }
            }
        }
        self.skip_if(";");
        Ok(())
    }

    fn parse_reserved(&mut self, id: NodeId) -> Result<(), SchemaError> {
        let is_enum = self.root.node(id).as_enum().is_some();
        loop {
            let token = self.peek().clone();
            match token.kind {
                TokenKind::Str => {
                    self.next();
                    if self.edition.supports_features() {
                        return Err(self.err(
                            &token,
                            "reserved names must be identifiers under editions",
                        ));
                    }
                    if !NAME_RE.is_match(&token.text) {
                        return Err(self.err(
                            &token,
                            &format!("invalid reserved name {}", quote(&token.text)),
                        ));
                    }
                    self.root.add_reserved(id, Reserved::Name(token.text));
                }
                TokenKind::Ident if self.edition.supports_features() => {
                    let name = self.expect_name()?;
                    self.root.add_reserved(id, Reserved::Name(name.text));
                }
                _ => {
                    let lo = if is_enum {
                        self.parse_int32()? as i64
                    } else {
                        self.parse_id(false)? as i64
                    };
                    let hi = if self.skip_if("to") {
                        if is_enum {
                            if self.at("max") || self.at("MAX") {
                                self.next();
                                i32::MAX as i64
                            } else {
                                self.parse_int32()? as i64
                            }
                        } else {
                            self.parse_id(true)? as i64
                        }
                    } else {
                        lo
                    };
                    self.root.add_reserved(id, Reserved::Range(lo, hi));
                }
            }
            if self.skip_if(",") {
                continue;
            }
            self.expect(";")?;
            return Ok(());
        }
    }

    fn parse_extensions(&mut self, id: NodeId) -> Result<(), SchemaError> {
        loop {
            let lo = self.parse_id(false)?;
            let hi = if self.skip_if("to") {
                self.parse_id(true)?
            } else {
                lo
            };
            self.root.add_extension_range(id, lo, hi);
            if self.skip_if(",") {
                continue;
            }
            self.expect(";")?;
            return Ok(());
        }
    }

    fn parse_extend(&mut self, scope: NodeId) -> Result<(), SchemaError> {
        let (target, _) = self.type_ref()?;
        self.expect("{")?;
        loop {
            let token = self.peek().clone();
            match token.text.as_str() {
                "}" if token.kind == TokenKind::Punct => {
                    self.next();
                    break;
                }
                "" => return Err(self.err(&token, "unexpected end of input in extend body")),
                ";" => {
                    self.next();
                }
                "required" | "optional" | "repeated" => {
                    self.next();
                    let (rule, presence) = self.cardinality(&token)?;
                    self.parse_field(scope, rule, presence, None, Some(target.clone()))?;
                }
                _ => {
                    if self.edition == Edition::Proto2 {
                        return Err(self.err(
                            &token,
                            "missing field cardinality (required, optional or repeated)",
                        ));
                    }
                    self.parse_field(scope, Rule::Singular, None, None, Some(target.clone()))?;
                }
            }
        }
        self.skip_if(";");
        Ok(())
    }

    fn parse_service(&mut self, scope: NodeId) -> Result<(), SchemaError> {
        let name = self.expect_name()?;
        let mut node = Node::service(&name.text, self.edition);
        node.common.comment = self.comment_here(&name);
        let service_id = self.root.add(scope, node)?;
        self.expect("{")?;
        loop {
            let token = self.peek().clone();
            match token.text.as_str() {
                "}" if token.kind == TokenKind::Punct => {
                    self.next();
                    break;
                }
                "" => return Err(self.err(&token, "unexpected end of input in service body")),
                ";" => {
                    self.next();
                }
                "option" => {
                    self.next();
                    self.parse_option_statement(service_id)?;
                }
                "rpc" => {
                    self.next();
                    self.parse_method(service_id)?;
                }
                other => {
                    return Err(self.err(&token, &format!("unexpected token {}", quote(other))))
                }
            }
        }
        self.skip_if(";");
        Ok(())
    }

    fn parse_method(&mut self, service_id: NodeId) -> Result<(), SchemaError> {
        let name = self.expect_name()?;
        self.expect("(")?;
        let request_stream = self.skip_if("stream");
        let (request_type, _) = self.type_ref()?;
        self.expect(")")?;
        let returns = self.next();
        if returns.text != "returns" {
            return Err(self.err(
                &returns,
                &format!("expected \"returns\" but found {}", quote(&returns.text)),
            ));
        }
        self.expect("(")?;
        let response_stream = self.skip_if("stream");
        let (response_type, _) = self.type_ref()?;
        self.expect(")")?;

        let mut node = Node::method(
            &name.text,
            &request_type,
            &response_type,
            request_stream,
            response_stream,
            self.edition,
        );
        node.common.comment = self.comment_here(&name);
        let method_id = self.root.add(service_id, node)?;

        if self.skip_if("{") {
            loop {
                let token = self.peek().clone();
                match token.text.as_str() {
                    "}" if token.kind == TokenKind::Punct => {
                        self.next();
                        break;
                    }
                    "" => {
                        return Err(self.err(&token, "unexpected end of input in method body"))
                    }
                    ";" => {
                        self.next();
                    }
                    "option" => {
                        self.next();
                        self.parse_option_statement(method_id)?;
                    }
                    other => {
                        return Err(
                            self.err(&token, &format!("unexpected token {}", quote(other)))
                        )
                    }
                }
            }
            self.skip_if(";");
        } else {
            self.expect(";")?;
        }
        Ok(())
    }

    /// Option names: `name`, `(fq.name)`, and mixed dotted segments like
    /// `(a.b).c.(d)`. Segments concatenate in source order into the stored
    /// key.
    fn parse_option_name(&mut self) -> Result<String, SchemaError> {
        let mut name = String::new();
        loop {
            if self.skip_if("(") {
                let (inner, _) = self.type_ref()?;
                self.expect(")")?;
                name.push('(');
                name.push_str(&inner);
                name.push(')');
            } else {
                let part = self.expect_name()?;
                name.push_str(&part.text);
            }
            if self.skip_if(".") {
                name.push('.');
                continue;
            }
            return Ok(name);
        }
    }

    fn parse_option_statement(&mut self, node_id: NodeId) -> Result<(), SchemaError> {
        let name = self.parse_option_name()?;
        self.expect("=")?;
        let value = self.parse_option_value()?;
        self.expect(";")?;
        self.apply_option(node_id, &name, value);
        Ok(())
    }

    fn apply_option(&mut self, node_id: NodeId, name: &str, value: Json) {
        if name == "allow_alias" {
            if let NodeKind::Enum(ref mut data) = self.root.node_mut(node_id).kind {
                data.allow_alias = value.as_bool().unwrap_or(false);
            }
        }
        self.root.node_mut(node_id).set_option(name, value);
    }

    fn parse_option_value(&mut self) -> Result<Json, SchemaError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Str => {
                self.next();
                Ok(Json::String(token.text))
            }
            TokenKind::Punct if token.text == "{" => {
                self.next();
                self.parse_aggregate()
            }
            TokenKind::Punct if token.text == "[" => {
                self.next();
                let mut values = Vec::new();
                if !self.at("]") {
                    loop {
                        values.push(self.parse_option_value()?);
                        if !self.skip_if(",") {
                            break;
                        }
                    }
                }
                self.expect("]")?;
                Ok(Json::Array(values))
            }
            TokenKind::Punct if token.text == "-" || token.text == "+" => {
                self.next();
                self.parse_number_value(token.text == "-")
            }
            TokenKind::Number => self.parse_number_value(false),
            TokenKind::Ident => {
                self.next();
                match token.text.as_str() {
                    "true" => Ok(Json::Bool(true)),
                    "false" => Ok(Json::Bool(false)),
                    "inf" | "nan" => Ok(Json::String(token.text)),
                    _ => Ok(Json::String(token.text)),
                }
            }
            _ => Err(self.err(
                &token,
                &format!("expected option value but found {}", quote(&token.text)),
            )),
        }
    }

    fn parse_number_value(&mut self, negative: bool) -> Result<Json, SchemaError> {
        let token = self.next();
        if token.kind == TokenKind::Ident && token.text == "inf" {
            return Ok(Json::String(if negative { "-inf".to_owned() } else { "inf".to_owned() }));
        }
        if token.kind == TokenKind::Ident && token.text == "nan" {
            return Ok(Json::String("nan".to_owned()));
        }
        if DECIMAL_RE.is_match(&token.text) {
            if let Ok(v) = token.text.parse::<i64>() {
                return Ok(Json::from(if negative { -v } else { v }));
            }
        }
        if HEX_RE.is_match(&token.text) {
            if let Ok(v) = i64::from_str_radix(&token.text[2..], 16) {
                return Ok(Json::from(if negative { -v } else { v }));
            }
        }
        if OCTAL_RE.is_match(&token.text) {
            if let Ok(v) = i64::from_str_radix(&token.text[1..], 8) {
                return Ok(Json::from(if negative { -v } else { v }));
            }
        }
        if FLOAT_RE.is_match(&token.text) || token.text.parse::<f64>().is_ok() {
            if let Ok(v) = token.text.parse::<f64>() {
                let v = if negative { -v } else { v };
                if let Some(number) = serde_json::Number::from_f64(v) {
                    return Ok(Json::Number(number));
                }
            }
        }
        Err(self.err(
            &token,
            &format!("expected number but found {}", quote(&token.text)),
        ))
    }

    /// `{ key: value ... }` aggregates. Repeated keys collect into arrays.
    fn parse_aggregate(&mut self) -> Result<Json, SchemaError> {
        let mut map = serde_json::Map::new();
        loop {
            let token = self.peek().clone();
            if token.kind == TokenKind::Punct && token.text == "}" {
                self.next();
                return Ok(Json::Object(map));
            }
            if token.kind == TokenKind::Eof {
                return Err(self.err(&token, "unexpected end of input in option aggregate"));
            }
            let key = self.parse_option_name()?;
            let value = if self.skip_if(":") {
                self.parse_option_value()?
            } else {
                // A nested aggregate may omit the colon.
                let open = self.peek().clone();
                if open.text == "{" {
                    self.next();
                    self.parse_aggregate()?
                } else {
                    return Err(self.err(
                        &open,
                        &format!("expected \":\" or \"{{\" but found {}", quote(&open.text)),
                    ));
                }
            };
            match map.remove(&key) {
                Some(Json::Array(mut existing)) => {
                    existing.push(value);
                    map.insert(key, Json::Array(existing));
                }
                Some(previous) => {
                    map.insert(key, Json::Array(vec![previous, value]));
                }
                None => {
                    map.insert(key, value);
                }
            }
            self.skip_if(",");
            self.skip_if(";");
        }
    }

    fn parse_inline_options(&mut self, node: &mut Node) -> Result<(), SchemaError> {
        if !self.skip_if("[") {
            return Ok(());
        }
        loop {
            let name = self.parse_option_name()?;
            self.expect("=")?;
            let value = self.parse_option_value()?;
            match name.as_str() {
                "packed" => {
                    if let NodeKind::Field(ref mut field) = node.kind {
                        field.packed = value.as_bool();
                    }
                    node.set_option(&name, value);
                }
                "default" => {
                    if let NodeKind::Field(ref mut field) = node.kind {
                        field.default = Some(value.clone());
                    }
                    node.set_option(&name, value);
                }
                _ => node.set_option(&name, value),
            }
            if !self.skip_if(",") {
                break;
            }
        }
        self.expect("]")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FieldPresence;
    use crate::model::NodeKind;

    fn parse(source: &str) -> Root {
        Root::from_text(source).expect("parse failed")
    }

    #[test]
    fn parse_simple_message() {
        let root = parse("syntax = \"proto3\"; message M { int32 x = 1; }");
        let msg = root.get("M").unwrap();
        let fields = &root.node(msg).as_type().unwrap().fields;
        assert_eq!(fields.len(), 1);
        let field = root.node(fields[0]).as_field().unwrap();
        assert_eq!(field.id, 1);
        assert_eq!(field.type_name, "int32");
        assert_eq!(root.node(fields[0]).name(), "x");
    }

    #[test]
    fn parse_package_and_nesting() {
        let root = parse(
            r#"
            syntax = "proto3";
            package acme.rpc;
            message Outer {
              message Inner { string id = 1; }
              Inner inner = 1;
              repeated int32 values = 2;
            }
            "#,
        );
        let inner = root.get("acme.rpc.Outer.Inner").unwrap();
        let outer = root.get("acme.rpc.Outer").unwrap();
        let fields = &root.node(outer).as_type().unwrap().fields;
        let inner_field = root.node(fields[0]).as_field().unwrap();
        assert_eq!(inner_field.resolved_type, Some(inner));
        let values = root.node(fields[1]).as_field().unwrap();
        assert_eq!(values.rule, Rule::Repeated);
    }

    #[test]
    fn field_names_convert_to_camel_case() {
        let root = parse("syntax = \"proto3\"; message M { int32 request_uri = 1; }");
        let msg = root.get("M").unwrap();
        let fields = &root.node(msg).as_type().unwrap().fields;
        assert_eq!(root.node(fields[0]).name(), "requestUri");

        let mut keep = Root::new();
        parse_into(
            &mut keep,
            "syntax = \"proto3\"; message M { int32 request_uri = 1; }",
            &ParseOptions {
                keep_case: true,
                ..Default::default()
            },
        )
        .unwrap();
        let msg = keep.get("M").unwrap();
        let fields = &keep.node(msg).as_type().unwrap().fields;
        assert_eq!(keep.node(fields[0]).name(), "request_uri");
    }

    #[test]
    fn required_rejected_outside_proto2() {
        let err = Root::from_text("syntax = \"proto3\"; message M { required int32 x = 1; }")
            .unwrap_err();
        assert!(matches!(err, SchemaError::Parse { .. }));
        // And accepted under proto2.
        let root = parse("syntax = \"proto2\"; message M { required int32 x = 1; }");
        let msg = root.get("M").unwrap();
        let field_id = root.node(msg).as_type().unwrap().fields[0];
        assert_eq!(
            root.features(field_id).field_presence,
            FieldPresence::LegacyRequired
        );
    }

    #[test]
    fn proto2_field_without_label_rejected() {
        let err = Root::from_text("syntax = \"proto2\"; message M { int32 x = 1; }").unwrap_err();
        assert!(matches!(err, SchemaError::Parse { .. }));
    }

    #[test]
    fn parse_oneof() {
        let root = parse(
            r#"
            syntax = "proto3";
            message M {
              oneof payload {
                string text = 1;
                bytes blob = 2;
              }
            }
            "#,
        );
        let msg = root.get("M").unwrap();
        let data = root.node(msg).as_type().unwrap();
        assert_eq!(data.oneofs.len(), 1);
        let oneof = root.node(data.oneofs[0]).as_oneof().unwrap();
        assert_eq!(oneof.fields.len(), 2);
        let first = root.node(oneof.fields[0]).as_field().unwrap();
        assert_eq!(first.oneof, Some(data.oneofs[0]));
    }

    #[test]
    fn parse_map_field() {
        let root = parse(
            "syntax = \"proto3\"; message M { map<string, int64> counts = 1; }",
        );
        let msg = root.get("M").unwrap();
        let field = root
            .node(root.node(msg).as_type().unwrap().fields[0])
            .as_field()
            .unwrap();
        assert_eq!(field.rule, Rule::Map);
        assert_eq!(field.key_kind, Some(ScalarKind::String));
        assert_eq!(field.type_name, "int64");
    }

    #[test]
    fn map_key_must_be_integral_bool_or_string() {
        let err = Root::from_text(
            "syntax = \"proto3\"; message M { map<double, int32> bad = 1; }",
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::Parse { .. }));
        let err = Root::from_text(
            "syntax = \"proto3\"; message M { map<bytes, int32> bad = 1; }",
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::Parse { .. }));
    }

    #[test]
    fn parse_groups_proto2_only() {
        let root = parse(
            r#"
            syntax = "proto2";
            message M {
              optional group Result = 1 {
                required string url = 1;
              }
            }
            "#,
        );
        let group = root.get("M.Result").unwrap();
        assert!(root.node(group).as_type().unwrap().is_group);
        let msg = root.get("M").unwrap();
        let field = root
            .node(root.node(msg).as_type().unwrap().fields[0])
            .as_field()
            .unwrap();
        assert!(field.delimited);
        assert_eq!(field.type_name, "Result");

        let err = Root::from_text(
            "syntax = \"proto3\"; message M { group Result = 1 { string url = 1; } }",
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::Parse { .. }));
    }

    #[test]
    fn parse_reserved_and_extensions() {
        let root = parse(
            r#"
            syntax = "proto2";
            message M {
              reserved 2, 15, 9 to 11;
              reserved "foo", "bar";
              extensions 100 to max;
              optional int32 x = 1;
            }
            "#,
        );
        let msg = root.get("M").unwrap();
        let data = root.node(msg).as_type().unwrap();
        assert_eq!(data.reserved.len(), 5);
        assert_eq!(data.extension_ranges, vec![(100, MAX_FIELD_ID)]);
        // A later field colliding with a reserved id fails at add time.
        let mut root = Root::from_text(
            r#"
            syntax = "proto2";
            message M {
              reserved 2;
              optional int32 x = 1;
            }
            "#,
        )
        .unwrap();
        let msg = root.get("M").unwrap();
        let err = root
            .add(
                msg,
                Node::field("y", 2, Rule::Singular, "int32", Edition::Proto2),
            )
            .unwrap_err();
        assert!(matches!(err, SchemaError::ReservedId { id: 2, .. }));
    }

    #[test]
    fn duplicate_field_id_fails_at_parse_time() {
        let err = Root::from_text(
            "syntax = \"proto3\"; message M { int32 a = 1; int32 b = 1; }",
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateId { id: 1, .. }));
    }

    #[test]
    fn parse_enum_with_aliases() {
        let root = parse(
            r#"
            syntax = "proto3";
            enum Status {
              option allow_alias = true;
              STATUS_UNKNOWN = 0;
              STATUS_OK = 1;
              STATUS_FINE = 1;
            }
            "#,
        );
        let e = root.get("Status").unwrap();
        let data = root.node(e).as_enum().unwrap();
        assert_eq!(data.value_of("STATUS_FINE"), Some(1));
        assert_eq!(data.name_of(1), Some("STATUS_OK"));
    }

    #[test]
    fn proto3_enum_must_start_at_zero() {
        let err =
            Root::from_text("syntax = \"proto3\"; enum E { FIRST = 1; }").unwrap_err();
        assert!(matches!(err, SchemaError::Parse { .. }));
    }

    #[test]
    fn parse_service() {
        let root = parse(
            r#"
            syntax = "proto3";
            message Ping {}
            message Pong {}
            service Echo {
              rpc Send (Ping) returns (Pong);
              rpc Watch (Ping) returns (stream Pong) {
                option deadline = "5s";
              }
            }
            "#,
        );
        let service = root.get("Echo").unwrap();
        let methods = &root.node(service).as_service().unwrap().methods;
        assert_eq!(methods.len(), 2);
        let watch = root.node(methods[1]).as_method().unwrap();
        assert!(!watch.request_stream);
        assert!(watch.response_stream);
        assert_eq!(watch.resolved_response, root.get("Pong").map(Some).unwrap());
    }

    #[test]
    fn parse_extend() {
        let root = parse(
            r#"
            syntax = "proto2";
            message Base {
              optional int32 x = 1;
              extensions 10 to 20;
            }
            extend Base {
              optional string note = 12;
            }
            "#,
        );
        let base = root.get("Base").unwrap();
        assert_eq!(root.node(base).as_type().unwrap().extension_fields.len(), 1);
    }

    #[test]
    fn parse_options_and_defaults() {
        let root = parse(
            r#"
            syntax = "proto2";
            option java_package = "com.acme";
            message M {
              optional int32 x = 1 [default = 42, deprecated = true];
              repeated int32 packed_values = 2 [packed = true];
            }
            "#,
        );
        let msg = root.get("M").unwrap();
        let data = root.node(msg).as_type().unwrap();
        let x = root.node(data.fields[0]).as_field().unwrap();
        assert_eq!(x.default, Some(Json::from(42)));
        let packed = root.node(data.fields[1]).as_field().unwrap();
        assert_eq!(packed.packed, Some(true));
    }

    #[test]
    fn parse_parenthesized_option_names() {
        let root = parse(
            r#"
            syntax = "proto3";
            message M {
              int32 x = 1 [(validate.rules).int32 = { gt: 0, lt: 100 }];
            }
            option (acme.file_opt).flag = true;
            "#,
        );
        let msg = root.get("M").unwrap();
        let field_id = root.node(msg).as_type().unwrap().fields[0];
        let value = root
            .node(field_id)
            .option("(validate.rules).int32")
            .unwrap();
        assert_eq!(value.get("gt"), Some(&Json::from(0)));
        assert_eq!(value.get("lt"), Some(&Json::from(100)));
        let file_opt = root.node(root.root_id()).option("(acme.file_opt).flag");
        assert_eq!(file_opt, Some(&Json::Bool(true)));
    }

    #[test]
    fn parse_aggregate_option_values() {
        let root = parse(
            r#"
            syntax = "proto3";
            option (acme.limits) = {
              name: "outer"
              nested { depth: 2 }
              tags: ["a", "b"]
              repeated_entry: 1
              repeated_entry: 2
            };
            "#,
        );
        let value = root.node(root.root_id()).option("(acme.limits)").unwrap();
        assert_eq!(value.get("name"), Some(&Json::String("outer".to_owned())));
        assert_eq!(
            value.get("nested").and_then(|n| n.get("depth")),
            Some(&Json::from(2))
        );
        assert_eq!(
            value.get("tags"),
            Some(&Json::Array(vec![
                Json::String("a".to_owned()),
                Json::String("b".to_owned())
            ]))
        );
        assert_eq!(
            value.get("repeated_entry"),
            Some(&Json::Array(vec![Json::from(1), Json::from(2)]))
        );
    }

    #[test]
    fn parse_numeric_literals() {
        let root = parse(
            r#"
            syntax = "proto2";
            message M {
              optional int32 hex = 1 [default = 0x1F];
              optional int32 oct = 2 [default = 017];
              optional double f = 3 [default = -1.5e3];
              optional double pos_inf = 4 [default = inf];
              optional double neg_inf = 5 [default = -inf];
              optional double not_a_number = 6 [default = nan];
            }
            "#,
        );
        let msg = root.get("M").unwrap();
        let data = root.node(msg).as_type().unwrap();
        let default_of = |i: usize| root.node(data.fields[i]).as_field().unwrap().default.clone();
        assert_eq!(default_of(0), Some(Json::from(31)));
        assert_eq!(default_of(1), Some(Json::from(15)));
        assert_eq!(default_of(2), Some(Json::from(-1500.0)));
        assert_eq!(default_of(3), Some(Json::String("inf".to_owned())));
        assert_eq!(default_of(4), Some(Json::String("-inf".to_owned())));
        assert_eq!(default_of(5), Some(Json::String("nan".to_owned())));
    }

    #[test]
    fn parse_imports() {
        let mut root = Root::new();
        let parsed = parse_into(
            &mut root,
            r#"
            syntax = "proto3";
            import "a.proto";
            import public "b.proto";
            import weak "c.proto";
            "#,
            &ParseOptions::default(),
        )
        .unwrap();
        assert_eq!(parsed.imports, vec!["a.proto", "b.proto"]);
        assert_eq!(parsed.weak_imports, vec!["c.proto"]);
    }

    #[test]
    fn parse_editions_source() {
        let root = parse(
            r#"
            edition = "2023";
            message M {
              int32 x = 1;
              int32 y = 2 [features.field_presence = IMPLICIT];
            }
            "#,
        );
        let msg = root.get("M").unwrap();
        let data = root.node(msg).as_type().unwrap();
        assert_eq!(
            root.features(data.fields[0]).field_presence,
            FieldPresence::Explicit
        );
        assert_eq!(
            root.features(data.fields[1]).field_presence,
            FieldPresence::Implicit
        );
    }

    #[test]
    fn doc_comments_attach() {
        let root = parse(
            "syntax = \"proto3\";\n/// The main message.\nmessage M {\n  /// A field.\n  int32 x = 1;\n}",
        );
        let msg = root.get("M").unwrap();
        assert_eq!(
            root.node(msg).common.comment.as_deref(),
            Some("The main message.")
        );
        let field_id = root.node(msg).as_type().unwrap().fields[0];
        assert_eq!(root.node(field_id).common.comment.as_deref(), Some("A field."));
    }

    #[test]
    fn syntax_error_carries_position() {
        match Root::from_text("message M { int32 x 1; }") {
            Err(SchemaError::Parse { line, .. }) => assert_eq!(line, 1),
            other => panic!("expected parse error, got {:?}", other),
        }
    }
}
