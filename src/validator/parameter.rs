use super::schema::{SchemaCompiler, SchemaValidator};
use super::style::{Strategy, StyleQuery, StyleResolver};
use super::value::{percent_decode, ObjectParsers, ValueParser, ValueParserFactory};
use super::is_json_media_type;
use crate::error::{ContractError, RequestError, RequestSource, Result};
use crate::spec::{ParameterDeclaration, ParameterLocation, ParameterSchema, ParameterStyle};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Raw values of one location, keyed by name. Header names are lower-cased.
/// Path, query and cookie values are still percent-encoded; keys are decoded.
pub type LocationValues = HashMap<String, Vec<String>>;

/// How the raw value(s) of one parameter are located and split.
#[derive(Debug, Clone)]
pub enum ParameterParser {
    /// First occurrence, parsed whole
    Single(ValueParser),
    /// `;name=<inner>`
    Matrix(ValueParser),
    /// `.<inner>`
    Label(ValueParser),
    ExplodedArray(ValueParser),
    ExplodedMatrixArray(ValueParser),
    /// Keys gathered from the whole location (`form`)
    ExplodedObject(ObjectParsers),
    /// `;k=v;k=v` or `.k=v.k=v` inside a single path value
    PrefixedExplodedObject { fields: ObjectParsers, prefix: char },
    ExplodedSimpleObject(ObjectParsers),
    DeepObject(ObjectParsers),
}

type ParseResult = std::result::Result<Option<Value>, String>;

impl ParameterParser {
    /// `encoded` marks percent-encoded values, which are split along the
    /// style's delimiters before each piece is decoded.
    pub fn parse(&self, name: &str, values: &LocationValues, encoded: bool) -> ParseResult {
        let first = || values.get(name).and_then(|v| v.first()).map(String::as_str);
        let leaf = |parser: &ValueParser, raw: &str| {
            if encoded {
                parser.parse_encoded(raw)
            } else {
                parser.parse(raw)
            }
        };
        match self {
            ParameterParser::Single(parser) => match first() {
                Some(raw) => leaf(parser, raw),
                None => Ok(None),
            },
            ParameterParser::Matrix(parser) => match first() {
                Some(raw) => {
                    let prefix = format!(";{name}=");
                    let rest = raw
                        .strip_prefix(&prefix)
                        .or_else(|| (raw == format!(";{name}")).then_some(""))
                        .ok_or_else(|| format!("'{raw}' is not a matrix value for '{name}'"))?;
                    leaf(parser, rest)
                }
                None => Ok(None),
            },
            ParameterParser::Label(parser) => match first() {
                Some(raw) => {
                    let rest = raw
                        .strip_prefix('.')
                        .ok_or_else(|| format!("'{raw}' is not a label value"))?;
                    leaf(parser, rest)
                }
                None => Ok(None),
            },
            ParameterParser::ExplodedArray(items) => {
                let Some(occurrences) = values.get(name).filter(|v| !v.is_empty()) else {
                    return Ok(None);
                };
                let mut out = Vec::with_capacity(occurrences.len());
                for raw in occurrences {
                    match leaf(items, raw)? {
                        Some(value) => out.push(value),
                        None => return Err(format!("empty item for '{name}'")),
                    }
                }
                Ok(Some(Value::Array(out)))
            }
            ParameterParser::ExplodedMatrixArray(items) => {
                let Some(raw) = first() else {
                    return Ok(None);
                };
                let mut out = Vec::new();
                for (key, value) in matrix_segments(raw)? {
                    if key == name {
                        match leaf(items, value)? {
                            Some(value) => out.push(value),
                            None => return Err(format!("empty item for '{name}'")),
                        }
                    }
                }
                if out.is_empty() {
                    return Err(format!("'{raw}' has no ';{name}=' segment"));
                }
                Ok(Some(Value::Array(out)))
            }
            ParameterParser::ExplodedObject(fields) => {
                let mut out = Map::new();
                for (key, occurrences) in values {
                    let (Some(parser), Some(raw)) = (fields.parser_for(key), occurrences.first()) else {
                        continue;
                    };
                    if let Some(value) = leaf(parser, raw).map_err(|e| format!("property '{key}': {e}"))? {
                        out.insert(key.clone(), value);
                    }
                }
                Ok((!out.is_empty()).then_some(Value::Object(out)))
            }
            ParameterParser::PrefixedExplodedObject { fields, prefix } => {
                let Some(raw) = first() else {
                    return Ok(None);
                };
                let body = raw
                    .strip_prefix(*prefix)
                    .ok_or_else(|| format!("'{raw}' does not start with '{prefix}'"))?;
                pairs_to_object(body.split(*prefix), fields, encoded).map(Some)
            }
            ParameterParser::ExplodedSimpleObject(fields) => match first() {
                Some(raw) => pairs_to_object(raw.split(','), fields, encoded).map(Some),
                None => Ok(None),
            },
            ParameterParser::DeepObject(fields) => {
                let mut out = Map::new();
                for (key, occurrences) in values {
                    let Some(inner) = key
                        .strip_prefix(name)
                        .and_then(|k| k.strip_prefix('['))
                        .and_then(|k| k.strip_suffix(']'))
                    else {
                        continue;
                    };
                    if inner.is_empty() || inner.contains(['[', ']']) {
                        return Err(format!("'{key}' is not a supported deepObject key"));
                    }
                    if let Some(raw) = occurrences.first() {
                        if let Some(value) = fields.parse_field_as(inner, raw, encoded)? {
                            out.insert(inner.to_string(), value);
                        }
                    }
                }
                Ok((!out.is_empty()).then_some(Value::Object(out)))
            }
        }
    }
}

fn matrix_segments(raw: &str) -> std::result::Result<Vec<(&str, &str)>, String> {
    let body = raw
        .strip_prefix(';')
        .ok_or_else(|| format!("'{raw}' is not a matrix value"))?;
    body.split(';')
        .map(|segment| {
            segment
                .split_once('=')
                .ok_or_else(|| format!("malformed matrix segment '{segment}'"))
        })
        .collect()
}

fn pairs_to_object<'a>(
    pairs: impl Iterator<Item = &'a str>,
    fields: &ObjectParsers,
    encoded: bool,
) -> std::result::Result<Value, String> {
    let mut out = Map::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| format!("'{pair}' is not a key=value pair"))?;
        let key = percent_decode(key, encoded)?;
        if key.is_empty() {
            return Err(format!("empty key in '{pair}'"));
        }
        if let Some(value) = fields.parse_field_as(&key, raw, encoded)? {
            out.insert(key.into_owned(), value);
        }
    }
    Ok(Value::Object(out))
}

/// Parses, then validates, one declared parameter.
#[derive(Debug, Clone)]
pub struct ParameterProcessor {
    pub name: String,
    pub location: ParameterLocation,
    pub required: bool,
    pub style: ParameterStyle,
    pub explode: bool,
    pub strategy: Strategy,
    lookup_key: String,
    parser: ParameterParser,
    validator: SchemaValidator,
}

impl ParameterProcessor {
    /// `Ok(None)` for an absent optional parameter.
    pub fn process(&self, values: &LocationValues) -> std::result::Result<Option<Value>, RequestError> {
        let at = || RequestSource::Parameter {
            location: self.location,
            name: self.name.clone(),
        };
        let parsed = self
            .parser
            .parse(&self.lookup_key, values, self.location.is_percent_encoded())
            .map_err(|message| RequestError::parse(at(), message))?;
        let Some(value) = parsed else {
            if self.required {
                return Err(RequestError::MissingParameter {
                    location: self.location,
                    name: self.name.clone(),
                });
            }
            return Ok(None);
        };
        let violations = self.validator.violations(&value);
        if !violations.is_empty() {
            return Err(RequestError::SchemaViolation { at: at(), violations });
        }
        Ok(Some(value))
    }

    pub fn parser(&self) -> &ParameterParser {
        &self.parser
    }
}

/// Turns declarations into processors.
pub struct ParameterPipelineBuilder<'c> {
    compiler: &'c SchemaCompiler,
}

impl<'c> ParameterPipelineBuilder<'c> {
    pub fn new(compiler: &'c SchemaCompiler) -> Self {
        Self { compiler }
    }

    pub fn build(&self, decl: &ParameterDeclaration) -> Result<ParameterProcessor> {
        let unsupported = |message: String| ContractError::unsupported(decl.at.to_string(), message);
        let factory = ValueParserFactory::new(self.compiler.store());
        let schema = decl.schema.schema();

        let has_content = match &decl.schema {
            ParameterSchema::Content { media_type, .. } if !is_json_media_type(media_type) => {
                return Err(unsupported(format!(
                    "parameter '{}' declares unsupported content type '{media_type}'",
                    decl.name
                )));
            }
            ParameterSchema::Content { .. } => true,
            ParameterSchema::Schema { .. } => false,
        };

        let style = decl.effective_style();
        let explode = decl.effective_explode();
        let shape = factory.shape(schema)?;
        let strategy = StyleResolver::resolve(&StyleQuery {
            location: decl.location,
            style,
            explode,
            shape,
            has_content,
            allow_reserved: decl.allow_reserved,
        })
        .map_err(|reason| unsupported(format!("parameter '{}': {reason}", decl.name)))?;

        let parser = match strategy {
            Strategy::Content => ParameterParser::Single(ValueParser::Json),
            Strategy::DeepObject => ParameterParser::DeepObject(factory.object(schema)?),
            Strategy::ExplodedArray => ParameterParser::ExplodedArray(factory.items(schema)?),
            Strategy::ExplodedMatrixArray => ParameterParser::ExplodedMatrixArray(factory.items(schema)?),
            Strategy::ExplodedObject => {
                let fields = factory.object(schema)?;
                match style {
                    ParameterStyle::Matrix => ParameterParser::PrefixedExplodedObject { fields, prefix: ';' },
                    ParameterStyle::Label => ParameterParser::PrefixedExplodedObject { fields, prefix: '.' },
                    _ => ParameterParser::ExplodedObject(fields),
                }
            }
            Strategy::ExplodedSimpleObject => ParameterParser::ExplodedSimpleObject(factory.object(schema)?),
            Strategy::Delimited(separator) => {
                let inner = factory.delimited(schema, separator)?;
                match style {
                    ParameterStyle::Matrix => ParameterParser::Matrix(inner),
                    ParameterStyle::Label => ParameterParser::Label(inner),
                    _ => ParameterParser::Single(inner),
                }
            }
        };

        let validator = self.compiler.compile(schema, decl.schema.at())?;
        let lookup_key = match decl.location {
            ParameterLocation::Header => decl.name.to_ascii_lowercase(),
            _ => decl.name.clone(),
        };

        tracing::debug!(
            parameter = %decl.name,
            location = %decl.location,
            style = %style,
            explode,
            strategy = %strategy,
            "parameter processor built"
        );

        Ok(ParameterProcessor {
            name: decl.name.clone(),
            location: decl.location,
            required: decl.required,
            style,
            explode,
            strategy,
            lookup_key,
            parser,
            validator,
        })
    }
}
