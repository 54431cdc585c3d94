//! Raw string → JSON value parsers inferred from schemas.
//!
//! Parsers only coerce; they never enforce constraints. Whatever they produce
//! is handed to the real schema validator afterwards.

use crate::error::{ContractError, Result};
use crate::resolver::DocumentStore;
use regex::Regex;
use serde_json::{Map, Number, Value};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

const MAX_COMBINATOR_DEPTH: usize = 16;

/// Shape of a schema as far as style resolution is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaShape {
    Primitive,
    Array,
    ObjectOrCombinator,
}

/// Separator of a delimited container value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    /// CSV, used by `form`, `simple` and `matrix`
    Comma,
    /// DSV, used by `label`
    Dot,
    /// SSV, used by `spaceDelimited`
    Space,
    /// PSV, used by `pipeDelimited`
    Pipe,
}

impl Separator {
    pub fn as_char(self) -> char {
        match self {
            Separator::Comma => ',',
            Separator::Dot => '.',
            Separator::Space => ' ',
            Separator::Pipe => '|',
        }
    }

    /// Splits a container value. In percent-encoded input a space or pipe
    /// delimiter usually arrives encoded itself (`%20`, `%7C`), so those forms
    /// split as well; an encoded comma or dot is data.
    pub fn split(self, raw: &str, encoded: bool) -> Vec<&str> {
        let encoded_form = match (self, encoded) {
            (Separator::Space, true) => Some("%20"),
            (Separator::Pipe, true) => Some("%7C"),
            _ => None,
        };
        let Some(encoded_form) = encoded_form else {
            return raw.split(self.as_char()).collect();
        };
        let mut parts = Vec::new();
        let mut start = 0;
        let mut idx = 0;
        let bytes = raw.as_bytes();
        while idx < bytes.len() {
            if bytes[idx] == self.as_char() as u8 {
                parts.push(&raw[start..idx]);
                idx += 1;
                start = idx;
            } else if bytes[idx..].len() >= 3 && bytes[idx..idx + 3].eq_ignore_ascii_case(encoded_form.as_bytes()) {
                parts.push(&raw[start..idx]);
                idx += 3;
                start = idx;
            } else {
                idx += 1;
            }
        }
        parts.push(&raw[start..]);
        parts
    }
}

#[derive(Debug, Clone)]
pub enum ValueParser {
    /// Keeps the raw string
    Noop,
    Boolean,
    Integer,
    Number,
    /// Embedded JSON document
    Json,
    Array {
        items: Box<ValueParser>,
        separator: Separator,
    },
    /// Alternating `key,value` pairs
    Object {
        fields: Arc<ObjectParsers>,
        separator: Separator,
    },
}

impl ValueParser {
    /// `Ok(None)` means the value counts as absent: an empty string given to
    /// anything but [`ValueParser::Noop`].
    pub fn parse(&self, raw: &str) -> std::result::Result<Option<Value>, String> {
        self.parse_as(raw, false)
    }

    /// Like [`ValueParser::parse`] for percent-encoded input. Container values
    /// are split first and every piece is decoded afterwards, so an encoded
    /// separator (`a%2Cb`) stays inside its item.
    pub fn parse_encoded(&self, raw: &str) -> std::result::Result<Option<Value>, String> {
        self.parse_as(raw, true)
    }

    fn parse_as(&self, raw: &str, encoded: bool) -> std::result::Result<Option<Value>, String> {
        if raw.is_empty() && !matches!(self, ValueParser::Noop) {
            return Ok(None);
        }
        let value = match self {
            ValueParser::Array { items, separator } => {
                let mut out = Vec::new();
                for item in separator.split(raw, encoded) {
                    match items.parse_as(item, encoded)? {
                        Some(value) => out.push(value),
                        None => return Err(format!("empty item in '{raw}'")),
                    }
                }
                Value::Array(out)
            }
            ValueParser::Object { fields, separator } => {
                let tokens = separator.split(raw, encoded);
                if tokens.len() % 2 != 0 {
                    return Err(format!("'{raw}' is not a list of key{0}value pairs", separator.as_char()));
                }
                let mut out = Map::new();
                for pair in tokens.chunks(2) {
                    let key = percent_decode(pair[0], encoded)?;
                    if key.is_empty() {
                        return Err(format!("empty key in '{raw}'"));
                    }
                    if let Some(value) = fields.parse_field_as(&key, pair[1], encoded)? {
                        out.insert(key.into_owned(), value);
                    }
                }
                Value::Object(out)
            }
            leaf => return leaf.parse_leaf(&percent_decode(raw, encoded)?),
        };
        Ok(Some(value))
    }

    fn parse_leaf(&self, raw: &str) -> std::result::Result<Option<Value>, String> {
        if raw.is_empty() && !matches!(self, ValueParser::Noop) {
            return Ok(None);
        }
        let value = match self {
            ValueParser::Boolean => match raw {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => return Err(format!("'{raw}' is not a boolean")),
            },
            ValueParser::Integer => parse_integer(raw)?,
            ValueParser::Number => parse_number(raw)?,
            ValueParser::Json => {
                serde_json::from_str(raw).map_err(|e| format!("invalid JSON: {e}"))?
            }
            ValueParser::Noop | ValueParser::Array { .. } | ValueParser::Object { .. } => {
                Value::String(raw.to_string())
            }
        };
        Ok(Some(value))
    }

    /// Short name used by the `routes` listing.
    pub fn describe(&self) -> String {
        match self {
            ValueParser::Noop => "string".to_string(),
            ValueParser::Boolean => "boolean".to_string(),
            ValueParser::Integer => "integer".to_string(),
            ValueParser::Number => "number".to_string(),
            ValueParser::Json => "json".to_string(),
            ValueParser::Array { items, separator } => {
                format!("array<{}> sep '{}'", items.describe(), separator.as_char())
            }
            ValueParser::Object { separator, .. } => format!("object sep '{}'", separator.as_char()),
        }
    }
}

/// Percent-decodes one piece of a query, path or cookie value.
pub fn percent_decode(raw: &str, encoded: bool) -> std::result::Result<Cow<'_, str>, String> {
    if !encoded {
        return Ok(Cow::Borrowed(raw));
    }
    urlencoding::decode(raw).map_err(|_| format!("'{raw}' is not valid percent-encoded UTF-8"))
}

fn parse_integer(raw: &str) -> std::result::Result<Value, String> {
    if let Ok(n) = raw.parse::<i64>() {
        return Ok(Value::Number(n.into()));
    }
    raw.parse::<u64>()
        .map(|n| Value::Number(n.into()))
        .map_err(|_| format!("'{raw}' is not an integer"))
}

fn parse_number(raw: &str) -> std::result::Result<Value, String> {
    if let Ok(n) = raw.parse::<i64>() {
        return Ok(Value::Number(n.into()));
    }
    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| format!("'{raw}' is not a number"))
}

/// Per-key parsers of an object value.
#[derive(Debug, Clone, Default)]
pub struct ObjectParsers {
    pub properties: HashMap<String, ValueParser>,
    pub patterns: Vec<(Regex, ValueParser)>,
    pub additional: Option<ValueParser>,
}

impl ObjectParsers {
    /// Declared property first, then the first matching pattern, then
    /// `additionalProperties`.
    pub fn parser_for(&self, key: &str) -> Option<&ValueParser> {
        self.properties
            .get(key)
            .or_else(|| {
                self.patterns
                    .iter()
                    .find(|(pattern, _)| pattern.is_match(key))
                    .map(|(_, parser)| parser)
            })
            .or(self.additional.as_ref())
    }

    /// Unknown keys are kept as strings; the schema decides whether they are allowed.
    pub fn parse_field(&self, key: &str, raw: &str) -> std::result::Result<Option<Value>, String> {
        self.parse_field_as(key, raw, false)
    }

    pub fn parse_field_as(&self, key: &str, raw: &str, encoded: bool) -> std::result::Result<Option<Value>, String> {
        self.parser_for(key)
            .unwrap_or(&ValueParser::Noop)
            .parse_as(raw, encoded)
            .map_err(|e| format!("property '{key}': {e}"))
    }
}

/// Infers parsers from (possibly `$ref`-ed) schemas.
pub struct ValueParserFactory<'s> {
    store: &'s DocumentStore,
}

impl<'s> ValueParserFactory<'s> {
    pub fn new(store: &'s DocumentStore) -> Self {
        Self { store }
    }

    pub fn resolve<'v>(&self, schema: &'v Value) -> Result<Cow<'v, Value>> {
        self.store.dereference(schema)
    }

    pub fn shape(&self, schema: &Value) -> Result<SchemaShape> {
        self.shape_within(schema, 0)
    }

    fn shape_within(&self, schema: &Value, depth: usize) -> Result<SchemaShape> {
        if depth > MAX_COMBINATOR_DEPTH {
            return Ok(SchemaShape::Primitive);
        }
        let schema = self.resolve(schema)?;
        match schema_type(&schema) {
            Some("array") => return Ok(SchemaShape::Array),
            Some("object") => return Ok(SchemaShape::ObjectOrCombinator),
            Some(_) => return Ok(SchemaShape::Primitive),
            None => {}
        }
        if schema.get("items").is_some() {
            return Ok(SchemaShape::Array);
        }
        if ["properties", "additionalProperties", "patternProperties"]
            .iter()
            .any(|k| schema.get(k).is_some())
        {
            return Ok(SchemaShape::ObjectOrCombinator);
        }
        let members = combinator_members(&schema);
        if members.is_empty() {
            return Ok(SchemaShape::Primitive);
        }
        let mut shapes = Vec::with_capacity(members.len());
        for member in members {
            shapes.push(self.shape_within(member, depth + 1)?);
        }
        if shapes.contains(&SchemaShape::ObjectOrCombinator) {
            Ok(SchemaShape::ObjectOrCombinator)
        } else if shapes.iter().all(|s| *s == SchemaShape::Array) {
            Ok(SchemaShape::Array)
        } else {
            Ok(SchemaShape::Primitive)
        }
    }

    /// Primitive coercion by `type`; anything structured is embedded JSON.
    pub fn primitive(&self, schema: &Value) -> Result<ValueParser> {
        let schema = self.resolve(schema)?;
        let parser = match schema_type(&schema) {
            Some("integer") => ValueParser::Integer,
            Some("number") => ValueParser::Number,
            Some("boolean") => ValueParser::Boolean,
            Some("object") | Some("array") => ValueParser::Json,
            _ => ValueParser::Noop,
        };
        Ok(parser)
    }

    /// Parser for a value nested inside a container (array item, property).
    pub fn nested(&self, schema: &Value) -> Result<ValueParser> {
        match self.shape(schema)? {
            SchemaShape::Primitive => self.primitive(schema),
            SchemaShape::Array | SchemaShape::ObjectOrCombinator => Ok(ValueParser::Json),
        }
    }

    pub fn items(&self, array_schema: &Value) -> Result<ValueParser> {
        let schema = self.resolve(array_schema)?;
        match schema.get("items") {
            Some(items) => self.nested(items),
            None => Ok(ValueParser::Noop),
        }
    }

    /// Parsers for each key of an object or combinator schema.
    pub fn object(&self, schema: &Value) -> Result<ObjectParsers> {
        let fake = self.fake_object_schema(schema)?;
        let mut parsers = ObjectParsers::default();

        if let Some(properties) = fake.get("properties").and_then(Value::as_object) {
            for (name, property) in properties {
                parsers.properties.insert(name.clone(), self.nested(property)?);
            }
        }
        if let Some(patterns) = fake.get("patternProperties").and_then(Value::as_object) {
            for (pattern, property) in patterns {
                let regex = Regex::new(pattern).map_err(|e| {
                    ContractError::unsupported(pattern.clone(), format!("invalid patternProperties regex: {e}"))
                })?;
                parsers.patterns.push((regex, self.nested(property)?));
            }
        }
        parsers.additional = match fake.get("additionalProperties") {
            Some(Value::Bool(true)) => Some(ValueParser::Noop),
            Some(extra @ Value::Object(_)) => Some(self.nested(extra)?),
            _ => None,
        };
        Ok(parsers)
    }

    pub fn array(&self, schema: &Value, separator: Separator) -> Result<ValueParser> {
        Ok(ValueParser::Array {
            items: Box::new(self.items(schema)?),
            separator,
        })
    }

    /// Parser used when no exploded strategy applies.
    pub fn delimited(&self, schema: &Value, separator: Separator) -> Result<ValueParser> {
        match self.shape(schema)? {
            SchemaShape::Primitive => self.primitive(schema),
            SchemaShape::Array => self.array(schema, separator),
            SchemaShape::ObjectOrCombinator => Ok(ValueParser::Object {
                fields: Arc::new(self.object(schema)?),
                separator,
            }),
        }
    }

    /// Union of the properties of an object schema and of every object member
    /// of its `allOf` / `anyOf` / `oneOf`. Only used to pick parsers; the real
    /// schema is what gets validated.
    pub fn fake_object_schema(&self, schema: &Value) -> Result<Value> {
        let mut merged = MergedObject::default();
        let mut visiting = Vec::new();
        self.merge_into(schema, &mut merged, &mut visiting)?;
        let mut out = Map::new();
        out.insert("type".to_string(), Value::String("object".to_string()));
        out.insert("properties".to_string(), Value::Object(merged.properties));
        out.insert("patternProperties".to_string(), Value::Object(merged.patterns));
        if let Some(additional) = merged.additional {
            out.insert("additionalProperties".to_string(), additional);
        }
        Ok(Value::Object(out))
    }

    fn merge_into(&self, schema: &Value, merged: &mut MergedObject, visiting: &mut Vec<String>) -> Result<()> {
        if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
            if visiting.iter().any(|seen| seen == reference) {
                return Ok(());
            }
            visiting.push(reference.to_string());
        }
        let resolved = self.resolve(schema)?;

        for (key, target) in [
            ("properties", &mut merged.properties),
            ("patternProperties", &mut merged.patterns),
        ] {
            if let Some(map) = resolved.get(key).and_then(Value::as_object) {
                for (name, property) in map {
                    target.entry(name.clone()).or_insert_with(|| property.clone());
                }
            }
        }
        if merged.additional.is_none() {
            merged.additional = resolved.get("additionalProperties").cloned();
        }
        for member in combinator_members(&resolved) {
            self.merge_into(member, merged, visiting)?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct MergedObject {
    properties: Map<String, Value>,
    patterns: Map<String, Value>,
    additional: Option<Value>,
}

/// `type` as a single string; the first non-null entry of a type array.
pub fn schema_type(schema: &Value) -> Option<&str> {
    match schema.get("type")? {
        Value::String(t) => Some(t.as_str()),
        Value::Array(types) => types.iter().filter_map(Value::as_str).find(|t| *t != "null"),
        _ => None,
    }
}

fn combinator_members(schema: &Value) -> Vec<&Value> {
    ["allOf", "anyOf", "oneOf"]
        .iter()
        .filter_map(|k| schema.get(k).and_then(Value::as_array))
        .flatten()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use url::Url;

    fn store() -> DocumentStore {
        let store = DocumentStore::new();
        store.insert(
            Url::parse("file:///api.json").unwrap(),
            json!({"components": {"schemas": {
                "Color": {"type": "object", "properties": {"R": {"type": "integer"}}},
                "Named": {"properties": {"name": {"type": "string"}}},
                "Loop": {"allOf": [{"$ref": "file:///api.json#/components/schemas/Loop"},
                                   {"properties": {"depth": {"type": "integer"}}}]}
            }}}),
        );
        store
    }

    #[test]
    fn test_integer_array_csv() {
        let store = store();
        let factory = ValueParserFactory::new(&store);
        let parser = factory
            .array(&json!({"type": "array", "items": {"type": "integer"}}), Separator::Comma)
            .unwrap();
        assert_eq!(parser.parse("1,2,3").unwrap(), Some(json!([1, 2, 3])));
        assert!(parser.parse("1,x,3").is_err());
    }

    #[test]
    fn test_encoded_input_splits_before_decoding() {
        let store = store();
        let factory = ValueParserFactory::new(&store);
        let strings = json!({"type": "array", "items": {"type": "string"}});
        let csv = factory.array(&strings, Separator::Comma).unwrap();
        assert_eq!(csv.parse_encoded("a%2Cb,c").unwrap(), Some(json!(["a,b", "c"])));
        assert_eq!(csv.parse("a%2Cb,c").unwrap(), Some(json!(["a%2Cb", "c"])));

        let ssv = factory.array(&strings, Separator::Space).unwrap();
        assert_eq!(ssv.parse_encoded("red%20green blue").unwrap(), Some(json!(["red", "green", "blue"])));
        let psv = factory.array(&strings, Separator::Pipe).unwrap();
        assert_eq!(psv.parse_encoded("x%7cy|z%2Bw").unwrap(), Some(json!(["x", "y", "z+w"])));

        assert!(ValueParser::Noop.parse_encoded("%FF").is_err());
    }

    #[test]
    fn test_empty_typed_value_is_absent() {
        assert_eq!(ValueParser::Integer.parse("").unwrap(), None);
        assert_eq!(ValueParser::Noop.parse("").unwrap(), Some(json!("")));
    }

    #[test]
    fn test_number_and_boolean() {
        assert_eq!(ValueParser::Number.parse("2.5").unwrap(), Some(json!(2.5)));
        assert_eq!(ValueParser::Number.parse("4").unwrap(), Some(json!(4)));
        assert!(ValueParser::Number.parse("NaN").is_err());
        assert_eq!(ValueParser::Boolean.parse("false").unwrap(), Some(json!(false)));
        assert!(ValueParser::Boolean.parse("yes").is_err());
    }

    #[test]
    fn test_object_pairs_use_property_parsers() {
        let store = store();
        let factory = ValueParserFactory::new(&store);
        let parser = factory
            .delimited(&json!({"$ref": "file:///api.json#/components/schemas/Color"}), Separator::Comma)
            .unwrap();
        assert_eq!(parser.parse("R,100,G,200").unwrap(), Some(json!({"R": 100, "G": "200"})));
        assert!(parser.parse("R,100,G").is_err());
    }

    #[test]
    fn test_combinators_merge_into_fake_object() {
        let store = store();
        let factory = ValueParserFactory::new(&store);
        let schema = json!({"allOf": [
            {"$ref": "file:///api.json#/components/schemas/Color"},
            {"$ref": "file:///api.json#/components/schemas/Named"}
        ]});
        assert_eq!(factory.shape(&schema).unwrap(), SchemaShape::ObjectOrCombinator);
        let parsers = factory.object(&schema).unwrap();
        assert!(matches!(parsers.properties["R"], ValueParser::Integer));
        assert!(matches!(parsers.properties["name"], ValueParser::Noop));
    }

    #[test]
    fn test_recursive_combinator_terminates() {
        let store = store();
        let factory = ValueParserFactory::new(&store);
        let parsers = factory
            .object(&json!({"$ref": "file:///api.json#/components/schemas/Loop"}))
            .unwrap();
        assert!(matches!(parsers.properties["depth"], ValueParser::Integer));
    }

    #[test]
    fn test_pattern_and_additional_properties() {
        let store = store();
        let factory = ValueParserFactory::new(&store);
        let parsers = factory
            .object(&json!({
                "type": "object",
                "patternProperties": {"^n_": {"type": "number"}},
                "additionalProperties": {"type": "boolean"}
            }))
            .unwrap();
        assert_eq!(parsers.parse_field("n_x", "1.5").unwrap(), Some(json!(1.5)));
        assert_eq!(parsers.parse_field("flag", "true").unwrap(), Some(json!(true)));
    }

    #[test]
    fn test_primitive_combinator_is_primitive() {
        let store = store();
        let factory = ValueParserFactory::new(&store);
        let shape = factory
            .shape(&json!({"oneOf": [{"type": "integer"}, {"type": "string"}]}))
            .unwrap();
        assert_eq!(shape, SchemaShape::Primitive);
    }
}
