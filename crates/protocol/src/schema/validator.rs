//! Draft-07 subset validator over `serde_json::Value`.
//!
//! Supported assertions: `type`, `required`, `properties`,
//! `additionalProperties`, `pattern`, `minimum`, `maximum`,
//! `exclusiveMinimum`, `exclusiveMaximum`, `minLength`, `maxLength`, `enum`,
//! `const`, `items`, `minItems`, `maxItems`, `uniqueItems`, `if`/`then`/`else`,
//! `allOf`, `anyOf`, `oneOf`, `not` and local `$ref`. Every other keyword is
//! treated as an annotation.

use super::SchemaError;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Nesting limit for `$ref` chains and combinators. Stops a self-referencing
/// schema from recursing forever.
const MAX_DEPTH: usize = 64;

/// The keyword a document violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constraint {
    Type,
    Required,
    AdditionalProperties,
    Pattern,
    Minimum,
    Maximum,
    ExclusiveMinimum,
    ExclusiveMaximum,
    MinLength,
    MaxLength,
    Enum,
    Const,
    MinItems,
    MaxItems,
    UniqueItems,
    AnyOf,
    OneOf,
    Not,
    /// A `then` or `else` branch failed.
    Conditional,
    /// `$ref` could not be followed.
    Ref,
    /// The subschema was the literal `false`.
    FalseSchema,
}

impl Constraint {
    /// Keyword name as written in a schema.
    pub fn keyword(&self) -> &'static str {
        match self {
            Constraint::Type => "type",
            Constraint::Required => "required",
            Constraint::AdditionalProperties => "additionalProperties",
            Constraint::Pattern => "pattern",
            Constraint::Minimum => "minimum",
            Constraint::Maximum => "maximum",
            Constraint::ExclusiveMinimum => "exclusiveMinimum",
            Constraint::ExclusiveMaximum => "exclusiveMaximum",
            Constraint::MinLength => "minLength",
            Constraint::MaxLength => "maxLength",
            Constraint::Enum => "enum",
            Constraint::Const => "const",
            Constraint::MinItems => "minItems",
            Constraint::MaxItems => "maxItems",
            Constraint::UniqueItems => "uniqueItems",
            Constraint::AnyOf => "anyOf",
            Constraint::OneOf => "oneOf",
            Constraint::Not => "not",
            Constraint::Conditional => "if",
            Constraint::Ref => "$ref",
            Constraint::FalseSchema => "false",
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// A single violation: where, which keyword, and a readable explanation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}: {detail} [{constraint}]", display_pointer(.path))]
pub struct ValidationError {
    /// JSON pointer into the instance; empty for the root.
    pub path: String,
    pub constraint: Constraint,
    pub detail: String,
}

impl ValidationError {
    fn new(path: &str, constraint: Constraint, detail: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            constraint,
            detail: detail.into(),
        }
    }
}

fn display_pointer(path: &str) -> &str {
    if path.is_empty() {
        "/"
    } else {
        path
    }
}

fn child_pointer(parent: &str, token: &str) -> String {
    let escaped = token.replace('~', "~0").replace('/', "~1");
    format!("{}/{}", parent, escaped)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn matches_type(name: &str, value: &Value) -> bool {
    match name {
        "null" => value.is_null(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => match value {
            Value::Number(n) => {
                n.is_i64() || n.is_u64() || n.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false)
            }
            _ => false,
        },
        _ => false,
    }
}

/// A schema document prepared for repeated validation.
///
/// Compilation builds every `pattern` regex once and proves every `$ref`
/// resolves, so validation itself cannot fail for schema reasons.
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    root: Value,
    patterns: HashMap<String, Regex>,
}

impl CompiledSchema {
    /// Compile a schema document.
    pub fn compile(root: Value) -> Result<Self, SchemaError> {
        let mut patterns = HashMap::new();
        collect(&root, &root, "#", &mut patterns)?;
        Ok(Self { root, patterns })
    }

    /// The schema document.
    pub fn document(&self) -> &Value {
        &self.root
    }

    /// `title` annotation, when present.
    pub fn title(&self) -> Option<&str> {
        self.root.get("title").and_then(Value::as_str)
    }

    /// Validate and report the first violation.
    pub fn validate(&self, instance: &Value) -> Result<(), ValidationError> {
        let mut errors = Vec::new();
        Walk::new(self, true).check(&self.root, instance, "", 0, &mut errors);
        match errors.into_iter().next() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Validate and report every violation.
    pub fn validate_all(&self, instance: &Value) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        Walk::new(self, false).check(&self.root, instance, "", 0, &mut errors);
        errors
    }

    /// Shorthand for `validate(..).is_ok()`.
    pub fn is_valid(&self, instance: &Value) -> bool {
        self.validate(instance).is_ok()
    }

    fn resolve(&self, reference: &str) -> Option<&Value> {
        resolve_ref(&self.root, reference)
    }
}

fn resolve_ref<'a>(root: &'a Value, reference: &str) -> Option<&'a Value> {
    let pointer = reference.strip_prefix('#')?;
    if pointer.is_empty() {
        return Some(root);
    }
    root.pointer(pointer)
}

/// Walk the schema by keyword, compiling patterns and checking refs.
fn collect(
    root: &Value,
    schema: &Value,
    location: &str,
    patterns: &mut HashMap<String, Regex>,
) -> Result<(), SchemaError> {
    let object = match schema {
        Value::Object(object) => object,
        _ => return Ok(()),
    };

    if let Some(Value::String(reference)) = object.get("$ref") {
        if resolve_ref(root, reference).is_none() {
            return Err(SchemaError::UnresolvedRef {
                location: location.to_string(),
                reference: reference.clone(),
            });
        }
    }

    if let Some(Value::String(pattern)) = object.get("pattern") {
        if !patterns.contains_key(pattern) {
            let regex = Regex::new(pattern).map_err(|source| SchemaError::InvalidPattern {
                location: location.to_string(),
                pattern: pattern.clone(),
                source,
            })?;
            patterns.insert(pattern.clone(), regex);
        }
    }

    for keyword in ["properties", "definitions"] {
        if let Some(Value::Object(members)) = object.get(keyword) {
            for (name, sub) in members {
                let at = format!("{}/{}/{}", location, keyword, name);
                collect(root, sub, &at, patterns)?;
            }
        }
    }

    for keyword in ["additionalProperties", "items", "if", "then", "else", "not"] {
        if let Some(sub) = object.get(keyword) {
            collect(root, sub, &format!("{}/{}", location, keyword), patterns)?;
        }
    }

    for keyword in ["allOf", "anyOf", "oneOf"] {
        if let Some(Value::Array(subs)) = object.get(keyword) {
            for (i, sub) in subs.iter().enumerate() {
                collect(root, sub, &format!("{}/{}/{}", location, keyword, i), patterns)?;
            }
        }
    }

    Ok(())
}

struct Walk<'a> {
    schema: &'a CompiledSchema,
    fail_fast: bool,
}

impl<'a> Walk<'a> {
    fn new(schema: &'a CompiledSchema, fail_fast: bool) -> Self {
        Self { schema, fail_fast }
    }

    fn stop(&self, errors: &[ValidationError]) -> bool {
        self.fail_fast && !errors.is_empty()
    }

    /// First violation of `schema` by `instance`, without touching the
    /// caller's error list.
    fn first_error(
        &self,
        schema: &Value,
        instance: &Value,
        path: &str,
        depth: usize,
    ) -> Option<ValidationError> {
        let mut errors = Vec::new();
        Walk::new(self.schema, true).check(schema, instance, path, depth, &mut errors);
        errors.into_iter().next()
    }

    fn check(
        &self,
        schema: &Value,
        instance: &Value,
        path: &str,
        depth: usize,
        errors: &mut Vec<ValidationError>,
    ) {
        if depth > MAX_DEPTH {
            errors.push(ValidationError::new(
                path,
                Constraint::Ref,
                format!("schema nesting exceeds {} levels", MAX_DEPTH),
            ));
            return;
        }

        let keywords = match schema {
            Value::Bool(true) => return,
            Value::Bool(false) => {
                errors.push(ValidationError::new(
                    path,
                    Constraint::FalseSchema,
                    "no value is allowed here",
                ));
                return;
            }
            Value::Object(keywords) => keywords,
            _ => return,
        };

        // Draft-07: `$ref` replaces every sibling keyword.
        if let Some(Value::String(reference)) = keywords.get("$ref") {
            match self.schema.resolve(reference) {
                Some(target) => self.check(target, instance, path, depth + 1, errors),
                None => errors.push(ValidationError::new(
                    path,
                    Constraint::Ref,
                    format!("unresolved reference {}", reference),
                )),
            }
            return;
        }

        self.check_type(keywords, instance, path, errors);
        if self.stop(errors) {
            return;
        }
        self.check_enum_const(keywords, instance, path, errors);
        if self.stop(errors) {
            return;
        }

        match instance {
            Value::Number(_) => self.check_number(keywords, instance, path, errors),
            Value::String(s) => self.check_string(keywords, s, path, errors),
            Value::Array(items) => self.check_array(keywords, items, path, depth, errors),
            Value::Object(members) => self.check_object(keywords, members, path, depth, errors),
            _ => {}
        }
        if self.stop(errors) {
            return;
        }

        self.check_combinators(keywords, instance, path, depth, errors);
        if self.stop(errors) {
            return;
        }
        self.check_conditional(keywords, instance, path, depth, errors);
    }

    fn check_type(
        &self,
        keywords: &Map<String, Value>,
        instance: &Value,
        path: &str,
        errors: &mut Vec<ValidationError>,
    ) {
        let expected: Vec<&str> = match keywords.get("type") {
            Some(Value::String(name)) => vec![name.as_str()],
            Some(Value::Array(names)) => names.iter().filter_map(Value::as_str).collect(),
            _ => return,
        };
        if !expected.iter().any(|name| matches_type(name, instance)) {
            errors.push(ValidationError::new(
                path,
                Constraint::Type,
                format!(
                    "expected {}, found {}",
                    expected.join(" or "),
                    type_name(instance)
                ),
            ));
        }
    }

    fn check_enum_const(
        &self,
        keywords: &Map<String, Value>,
        instance: &Value,
        path: &str,
        errors: &mut Vec<ValidationError>,
    ) {
        if let Some(Value::Array(allowed)) = keywords.get("enum") {
            if !allowed.iter().any(|v| v == instance) {
                errors.push(ValidationError::new(
                    path,
                    Constraint::Enum,
                    format!("{} is not one of {}", instance, Value::Array(allowed.clone())),
                ));
            }
        }
        if let Some(expected) = keywords.get("const") {
            if expected != instance {
                errors.push(ValidationError::new(
                    path,
                    Constraint::Const,
                    format!("expected {}, found {}", expected, instance),
                ));
            }
        }
    }

    fn check_number(
        &self,
        keywords: &Map<String, Value>,
        instance: &Value,
        path: &str,
        errors: &mut Vec<ValidationError>,
    ) {
        let value = match instance.as_f64() {
            Some(v) => v,
            None => return,
        };
        let bound = |key: &str| keywords.get(key).and_then(Value::as_f64);

        if let Some(min) = bound("minimum") {
            if value < min {
                errors.push(ValidationError::new(
                    path,
                    Constraint::Minimum,
                    format!("{} is less than the minimum of {}", instance, min),
                ));
            }
        }
        if let Some(max) = bound("maximum") {
            if value > max {
                errors.push(ValidationError::new(
                    path,
                    Constraint::Maximum,
                    format!("{} is greater than the maximum of {}", instance, max),
                ));
            }
        }
        if let Some(min) = bound("exclusiveMinimum") {
            if value <= min {
                errors.push(ValidationError::new(
                    path,
                    Constraint::ExclusiveMinimum,
                    format!("{} must be greater than {}", instance, min),
                ));
            }
        }
        if let Some(max) = bound("exclusiveMaximum") {
            if value >= max {
                errors.push(ValidationError::new(
                    path,
                    Constraint::ExclusiveMaximum,
                    format!("{} must be less than {}", instance, max),
                ));
            }
        }
    }

    fn check_string(
        &self,
        keywords: &Map<String, Value>,
        value: &str,
        path: &str,
        errors: &mut Vec<ValidationError>,
    ) {
        let length = value.chars().count() as u64;
        if let Some(min) = keywords.get("minLength").and_then(Value::as_u64) {
            if length < min {
                errors.push(ValidationError::new(
                    path,
                    Constraint::MinLength,
                    format!("length {} is shorter than {}", length, min),
                ));
            }
        }
        if let Some(max) = keywords.get("maxLength").and_then(Value::as_u64) {
            if length > max {
                errors.push(ValidationError::new(
                    path,
                    Constraint::MaxLength,
                    format!("length {} is longer than {}", length, max),
                ));
            }
        }
        if let Some(Value::String(pattern)) = keywords.get("pattern") {
            let matched = match self.schema.patterns.get(pattern) {
                Some(regex) => regex.is_match(value),
                None => Regex::new(pattern)
                    .map(|regex| regex.is_match(value))
                    .unwrap_or(false),
            };
            if !matched {
                errors.push(ValidationError::new(
                    path,
                    Constraint::Pattern,
                    format!("{:?} does not match {:?}", value, pattern),
                ));
            }
        }
    }

    fn check_array(
        &self,
        keywords: &Map<String, Value>,
        items: &[Value],
        path: &str,
        depth: usize,
        errors: &mut Vec<ValidationError>,
    ) {
        let count = items.len() as u64;
        if let Some(min) = keywords.get("minItems").and_then(Value::as_u64) {
            if count < min {
                errors.push(ValidationError::new(
                    path,
                    Constraint::MinItems,
                    format!("{} items, at least {} required", count, min),
                ));
            }
        }
        if let Some(max) = keywords.get("maxItems").and_then(Value::as_u64) {
            if count > max {
                errors.push(ValidationError::new(
                    path,
                    Constraint::MaxItems,
                    format!("{} items, at most {} allowed", count, max),
                ));
            }
        }
        if keywords.get("uniqueItems") == Some(&Value::Bool(true)) {
            'outer: for (i, a) in items.iter().enumerate() {
                for b in &items[i + 1..] {
                    if a == b {
                        errors.push(ValidationError::new(
                            path,
                            Constraint::UniqueItems,
                            format!("{} appears more than once", a),
                        ));
                        break 'outer;
                    }
                }
            }
        }
        if self.stop(errors) {
            return;
        }
        if let Some(item_schema) = keywords.get("items") {
            for (i, item) in items.iter().enumerate() {
                let at = child_pointer(path, &i.to_string());
                self.check(item_schema, item, &at, depth + 1, errors);
                if self.stop(errors) {
                    return;
                }
            }
        }
    }

    fn check_object(
        &self,
        keywords: &Map<String, Value>,
        members: &Map<String, Value>,
        path: &str,
        depth: usize,
        errors: &mut Vec<ValidationError>,
    ) {
        if let Some(Value::Array(required)) = keywords.get("required") {
            for name in required.iter().filter_map(Value::as_str) {
                if !members.contains_key(name) {
                    errors.push(ValidationError::new(
                        path,
                        Constraint::Required,
                        format!("missing required property {:?}", name),
                    ));
                    if self.stop(errors) {
                        return;
                    }
                }
            }
        }

        let properties = keywords.get("properties").and_then(Value::as_object);
        if let Some(properties) = properties {
            for (name, sub) in properties {
                if let Some(member) = members.get(name) {
                    self.check(sub, member, &child_pointer(path, name), depth + 1, errors);
                    if self.stop(errors) {
                        return;
                    }
                }
            }
        }

        if let Some(additional) = keywords.get("additionalProperties") {
            let declared = |name: &str| properties.map(|p| p.contains_key(name)).unwrap_or(false);
            for (name, member) in members {
                if declared(name) {
                    continue;
                }
                match additional {
                    Value::Bool(false) => errors.push(ValidationError::new(
                        path,
                        Constraint::AdditionalProperties,
                        format!("unexpected property {:?}", name),
                    )),
                    other => {
                        self.check(other, member, &child_pointer(path, name), depth + 1, errors)
                    }
                }
                if self.stop(errors) {
                    return;
                }
            }
        }
    }

    fn check_combinators(
        &self,
        keywords: &Map<String, Value>,
        instance: &Value,
        path: &str,
        depth: usize,
        errors: &mut Vec<ValidationError>,
    ) {
        if let Some(Value::Array(subs)) = keywords.get("allOf") {
            for sub in subs {
                self.check(sub, instance, path, depth + 1, errors);
                if self.stop(errors) {
                    return;
                }
            }
        }

        if let Some(Value::Array(subs)) = keywords.get("anyOf") {
            let any = subs
                .iter()
                .any(|sub| self.first_error(sub, instance, path, depth + 1).is_none());
            if !any {
                errors.push(ValidationError::new(
                    path,
                    Constraint::AnyOf,
                    format!("matches none of the {} alternatives", subs.len()),
                ));
                if self.stop(errors) {
                    return;
                }
            }
        }

        if let Some(Value::Array(subs)) = keywords.get("oneOf") {
            let passing = subs
                .iter()
                .filter(|sub| self.first_error(sub, instance, path, depth + 1).is_none())
                .count();
            if passing != 1 {
                errors.push(ValidationError::new(
                    path,
                    Constraint::OneOf,
                    format!("matches {} alternatives, exactly one required", passing),
                ));
                if self.stop(errors) {
                    return;
                }
            }
        }

        if let Some(sub) = keywords.get("not") {
            if self.first_error(sub, instance, path, depth + 1).is_none() {
                errors.push(ValidationError::new(
                    path,
                    Constraint::Not,
                    "matches a schema it must not match",
                ));
            }
        }
    }

    fn check_conditional(
        &self,
        keywords: &Map<String, Value>,
        instance: &Value,
        path: &str,
        depth: usize,
        errors: &mut Vec<ValidationError>,
    ) {
        let condition = match keywords.get("if") {
            Some(condition) => condition,
            None => return,
        };
        let holds = self.first_error(condition, instance, path, depth + 1).is_none();
        let (branch, label) = if holds {
            (keywords.get("then"), "then")
        } else {
            (keywords.get("else"), "else")
        };
        if let Some(branch) = branch {
            if let Some(inner) = self.first_error(branch, instance, path, depth + 1) {
                errors.push(ValidationError::new(
                    path,
                    Constraint::Conditional,
                    format!("{} branch failed: {}", label, inner),
                ));
            }
        }
    }
}
