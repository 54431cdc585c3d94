//! Request body processors, one per declared media type.
//!
//! - JSON family (`application/json`, `application/*+json`): the body is
//!   decoded and validated as is.
//! - `application/x-www-form-urlencoded` and `multipart/form-data`: fields are
//!   coerced into an object following the property schemas, arrays are taken
//!   from repeated fields.
//!
//! Multipart properties that are files (an `encoding` entry with a
//! `contentType`, or `format: binary|base64`) are cut out of the structural
//! schema and turned into [`RequestPredicate::FileUploadExists`] checks.

use super::parameter::LocationValues;
use super::pipeline::{BodyContent, RequestBody, RequestPredicate, DEFAULT_FILE_CONTENT_TYPE, MULTIPART_FORM_DATA};
use super::schema::{SchemaCompiler, SchemaValidator};
use super::value::{schema_type, ObjectParsers, SchemaShape, ValueParser, ValueParserFactory};
use super::{essence, is_json_media_type};
use crate::error::{ContractError, RequestError, RequestSource, Result};
use crate::resolver::Reference;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::debug;

pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormEncoding {
    UrlEncoded,
    Multipart,
}

/// Parser of one form field.
#[derive(Debug, Clone)]
pub enum FormField {
    /// First occurrence
    Single(ValueParser),
    /// Every occurrence, as an array
    Repeated(ValueParser),
}

#[derive(Debug, Clone, Default)]
pub struct FormFields {
    properties: HashMap<String, FormField>,
    /// Pattern and additional properties
    fallback: ObjectParsers,
}

impl FormFields {
    fn parse(&self, values: &LocationValues) -> std::result::Result<Value, String> {
        let mut out = Map::new();
        for (key, occurrences) in values {
            let parsed = match self.properties.get(key) {
                Some(FormField::Single(parser)) => match occurrences.first() {
                    Some(raw) => parser.parse(raw).map_err(|e| format!("field '{key}': {e}"))?,
                    None => None,
                },
                Some(FormField::Repeated(items)) => {
                    let mut array = Vec::with_capacity(occurrences.len());
                    for raw in occurrences {
                        if let Some(item) = items.parse(raw).map_err(|e| format!("field '{key}': {e}"))? {
                            array.push(item);
                        }
                    }
                    Some(Value::Array(array))
                }
                None => match occurrences.first() {
                    Some(raw) => self.fallback.parse_field(key, raw)?,
                    None => None,
                },
            };
            if let Some(value) = parsed {
                out.insert(key.clone(), value);
            }
        }
        Ok(Value::Object(out))
    }
}

#[derive(Debug, Clone)]
pub enum BodyProcessor {
    Json {
        validator: SchemaValidator,
    },
    Form {
        encoding: FormEncoding,
        fields: FormFields,
        validator: SchemaValidator,
    },
}

impl BodyProcessor {
    pub fn process(&self, body: &RequestBody) -> std::result::Result<Value, RequestError> {
        let at = || RequestSource::Body {
            content_type: body.content_type.clone(),
        };
        let (value, validator) = match (self, &body.content) {
            (BodyProcessor::Json { validator }, BodyContent::Raw(bytes)) => {
                let value: Value = serde_json::from_slice(bytes)
                    .map_err(|e| RequestError::parse(at(), format!("invalid JSON: {e}")))?;
                (value, validator)
            }
            (
                BodyProcessor::Form {
                    encoding: FormEncoding::UrlEncoded,
                    fields,
                    validator,
                },
                BodyContent::Raw(bytes),
            ) => {
                let mut values = LocationValues::new();
                for (key, value) in url::form_urlencoded::parse(bytes) {
                    values.entry(key.into_owned()).or_default().push(value.into_owned());
                }
                (fields.parse(&values).map_err(|e| RequestError::parse(at(), e))?, validator)
            }
            (
                BodyProcessor::Form {
                    encoding: FormEncoding::Multipart,
                    fields,
                    validator,
                },
                BodyContent::Multipart(form),
            ) => (fields.parse(&form.fields).map_err(|e| RequestError::parse(at(), e))?, validator),
            (_, BodyContent::Raw(_)) => {
                return Err(RequestError::parse(at(), "multipart body was not decoded"));
            }
            (_, BodyContent::Multipart(_)) => {
                return Err(RequestError::parse(at(), "multipart content sent for a non-multipart media type"));
            }
        };

        let violations = validator.violations(&value);
        if !violations.is_empty() {
            return Err(RequestError::SchemaViolation { at: at(), violations });
        }
        Ok(value)
    }
}

/// Turns `requestBody.content` entries into processors.
pub struct BodyPipelineBuilder<'c> {
    compiler: &'c SchemaCompiler,
}

impl<'c> BodyPipelineBuilder<'c> {
    pub fn new(compiler: &'c SchemaCompiler) -> Self {
        Self { compiler }
    }

    /// `at` designates the media type object. File predicates are appended
    /// to `predicates`.
    pub fn build(
        &self,
        media_type: &str,
        media: &Value,
        at: &Reference,
        predicates: &mut Vec<RequestPredicate>,
    ) -> Result<BodyProcessor> {
        let schema_at = at.append("schema");
        let empty = json!({});
        let schema = media.get("schema").unwrap_or(&empty);
        let kind = essence(media_type);

        if is_json_media_type(&kind) {
            debug!(media_type, "json body processor");
            return Ok(BodyProcessor::Json {
                validator: self.compile(schema, media, &schema_at)?,
            });
        }

        let encoding = match kind.as_str() {
            FORM_URLENCODED => FormEncoding::UrlEncoded,
            MULTIPART_FORM_DATA => FormEncoding::Multipart,
            _ => {
                return Err(ContractError::unsupported(
                    at.to_string(),
                    format!("no body processor for media type '{media_type}'"),
                ))
            }
        };

        let factory = ValueParserFactory::new(self.compiler.store());
        let fake = factory.fake_object_schema(schema)?;
        let mut fields = FormFields {
            properties: HashMap::new(),
            fallback: factory.object(&fake)?,
        };
        fields.fallback.properties.clear();

        let mut files = Vec::new();
        if let Some(properties) = fake.get("properties").and_then(Value::as_object) {
            for (name, property) in properties {
                if encoding == FormEncoding::Multipart {
                    if let Some(declared) = file_content_type(&factory, media, name, property)? {
                        let predicate = RequestPredicate::file_upload(name.clone(), &declared).map_err(|e| {
                            ContractError::unsupported(at.to_string(), format!("encoding of '{name}': {e}"))
                        })?;
                        debug!(property = %name, content_type = %declared, "multipart file part");
                        predicates.push(predicate);
                        files.push(name.clone());
                        continue;
                    }
                }
                fields.properties.insert(name.clone(), form_field(&factory, property)?);
            }
        }

        let validator = if files.is_empty() {
            self.compile(schema, media, &schema_at)?
        } else {
            let stripped = strip_properties(&factory, schema, &files)?;
            self.compiler.compile_detached(&stripped, &schema_at)?
        };

        Ok(BodyProcessor::Form {
            encoding,
            fields,
            validator,
        })
    }

    fn compile(&self, schema: &Value, media: &Value, at: &Reference) -> Result<SchemaValidator> {
        if media.get("schema").is_some() {
            self.compiler.compile(schema, at)
        } else {
            self.compiler.compile_detached(schema, at)
        }
    }
}

fn form_field(factory: &ValueParserFactory<'_>, property: &Value) -> Result<FormField> {
    Ok(match factory.shape(property)? {
        SchemaShape::Array => FormField::Repeated(factory.items(property)?),
        SchemaShape::ObjectOrCombinator => FormField::Single(ValueParser::Json),
        SchemaShape::Primitive => FormField::Single(factory.primitive(property)?),
    })
}

/// Declared content type pattern when `name` is uploaded as a file part.
fn file_content_type(
    factory: &ValueParserFactory<'_>,
    media: &Value,
    name: &str,
    property: &Value,
) -> Result<Option<String>> {
    if let Some(declared) = media
        .get("encoding")
        .and_then(|encoding| encoding.get(name))
        .and_then(|entry| entry.get("contentType"))
        .and_then(Value::as_str)
    {
        return Ok(Some(declared.to_string()));
    }
    let resolved = factory.resolve(property)?;
    let is_binary = schema_type(&resolved) == Some("string")
        && matches!(resolved.get("format").and_then(Value::as_str), Some("binary" | "base64"));
    Ok(is_binary.then(|| DEFAULT_FILE_CONTENT_TYPE.to_string()))
}

/// Copy of `schema` without `names` in `properties` / `required`, following
/// `$ref`s and combinator members.
fn strip_properties(factory: &ValueParserFactory<'_>, schema: &Value, names: &[String]) -> Result<Value> {
    let mut stripped = factory.resolve(schema)?.into_owned();
    let Some(object) = stripped.as_object_mut() else {
        return Ok(stripped);
    };
    if let Some(properties) = object.get_mut("properties").and_then(Value::as_object_mut) {
        for name in names {
            properties.remove(name);
        }
    }
    if let Some(required) = object.get_mut("required").and_then(Value::as_array_mut) {
        required.retain(|entry| !entry.as_str().is_some_and(|r| names.iter().any(|n| n == r)));
        if required.is_empty() {
            object.remove("required");
        }
    }
    for combinator in ["allOf", "anyOf", "oneOf"] {
        if let Some(members) = object.get_mut(combinator).and_then(Value::as_array_mut) {
            for member in members.iter_mut() {
                *member = strip_properties(factory, member, names)?;
            }
        }
    }
    Ok(stripped)
}
