use crate::error::{ContractError, Result};
use crate::resolver::Reference;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParameterLocation {
    Path,
    Cookie,
    Query,
    Header,
}

impl ParameterLocation {
    pub const ALL: [ParameterLocation; 4] = [
        ParameterLocation::Path,
        ParameterLocation::Cookie,
        ParameterLocation::Query,
        ParameterLocation::Header,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "path" => Some(ParameterLocation::Path),
            "query" => Some(ParameterLocation::Query),
            "header" => Some(ParameterLocation::Header),
            "cookie" => Some(ParameterLocation::Cookie),
            _ => None,
        }
    }

    /// Style applied when a declaration omits `style`.
    #[must_use]
    pub fn default_style(self) -> ParameterStyle {
        match self {
            ParameterLocation::Query | ParameterLocation::Cookie => ParameterStyle::Form,
            ParameterLocation::Path | ParameterLocation::Header => ParameterStyle::Simple,
        }
    }

    /// Whether raw values arrive percent-encoded. Headers never do.
    pub fn is_percent_encoded(self) -> bool {
        self != ParameterLocation::Header
    }
}

impl std::fmt::Display for ParameterLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParameterLocation::Path => write!(f, "path"),
            ParameterLocation::Query => write!(f, "query"),
            ParameterLocation::Header => write!(f, "header"),
            ParameterLocation::Cookie => write!(f, "cookie"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterStyle {
    Matrix,
    Label,
    Form,
    Simple,
    SpaceDelimited,
    PipeDelimited,
    DeepObject,
}

impl ParameterStyle {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "matrix" => Some(ParameterStyle::Matrix),
            "label" => Some(ParameterStyle::Label),
            "form" => Some(ParameterStyle::Form),
            "simple" => Some(ParameterStyle::Simple),
            "spaceDelimited" => Some(ParameterStyle::SpaceDelimited),
            "pipeDelimited" => Some(ParameterStyle::PipeDelimited),
            "deepObject" => Some(ParameterStyle::DeepObject),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParameterStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ParameterStyle::Matrix => "matrix",
            ParameterStyle::Label => "label",
            ParameterStyle::Form => "form",
            ParameterStyle::Simple => "simple",
            ParameterStyle::SpaceDelimited => "spaceDelimited",
            ParameterStyle::PipeDelimited => "pipeDelimited",
            ParameterStyle::DeepObject => "deepObject",
        };
        write!(f, "{s}")
    }
}

/// Schema carried by a parameter: either `schema` directly or a single
/// `content` media type entry.
#[derive(Debug, Clone)]
pub enum ParameterSchema {
    Schema { schema: Value, at: Reference },
    Content { media_type: String, schema: Value, at: Reference },
}

impl ParameterSchema {
    pub fn schema(&self) -> &Value {
        match self {
            ParameterSchema::Schema { schema, .. } | ParameterSchema::Content { schema, .. } => {
                schema
            }
        }
    }

    pub fn at(&self) -> &Reference {
        match self {
            ParameterSchema::Schema { at, .. } | ParameterSchema::Content { at, .. } => at,
        }
    }
}

/// A declared parameter after `$ref` resolution. Identity is `(name, location)`.
#[derive(Debug, Clone)]
pub struct ParameterDeclaration {
    pub name: String,
    pub location: ParameterLocation,
    pub required: bool,
    pub style: Option<ParameterStyle>,
    pub explode: Option<bool>,
    pub allow_reserved: bool,
    pub schema: ParameterSchema,
    /// Where the parameter object itself lives
    pub at: Reference,
}

impl ParameterDeclaration {
    /// Reads a parameter object that has already been dereferenced.
    pub fn from_value(value: &Value, at: Reference) -> Result<Self> {
        let invalid = |message: &str| ContractError::unsupported(at.to_string(), message);

        let name = value
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("parameter has no name"))?
            .to_string();
        let raw_location = value
            .get("in")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("parameter has no location"))?;
        let location = ParameterLocation::parse(raw_location)
            .ok_or_else(|| invalid(&format!("unknown parameter location '{raw_location}'")))?;
        let style = match value.get("style").and_then(Value::as_str) {
            Some(raw) => Some(
                ParameterStyle::parse(raw)
                    .ok_or_else(|| invalid(&format!("unknown parameter style '{raw}'")))?,
            ),
            None => None,
        };

        let schema = if let Some(schema) = value.get("schema") {
            ParameterSchema::Schema {
                schema: schema.clone(),
                at: at.append("schema"),
            }
        } else if let Some(content) = value.get("content").and_then(Value::as_object) {
            let mut entries = content.iter();
            let (media_type, media) = match (entries.next(), entries.next()) {
                (Some(entry), None) => entry,
                _ => return Err(invalid("parameter content must declare exactly one media type")),
            };
            ParameterSchema::Content {
                media_type: media_type.clone(),
                schema: media.get("schema").cloned().unwrap_or(Value::Object(Default::default())),
                at: at.append("content").append(media_type).append("schema"),
            }
        } else {
            return Err(invalid(&format!("parameter '{name}' declares neither schema nor content")));
        };

        Ok(ParameterDeclaration {
            name,
            location,
            required: value.get("required").and_then(Value::as_bool).unwrap_or(false)
                || location == ParameterLocation::Path,
            style,
            explode: value.get("explode").and_then(Value::as_bool),
            allow_reserved: value.get("allowReserved").and_then(Value::as_bool).unwrap_or(false),
            schema,
            at,
        })
    }

    #[must_use]
    pub fn effective_style(&self) -> ParameterStyle {
        self.style.unwrap_or_else(|| self.location.default_style())
    }

    #[must_use]
    pub fn effective_explode(&self) -> bool {
        self.explode
            .unwrap_or(self.effective_style() == ParameterStyle::Form)
    }

    pub fn identity(&self) -> (&str, ParameterLocation) {
        (&self.name, self.location)
    }
}

/// One entry of a `security` array: every scheme listed must be satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SecurityRequirement {
    pub schemes: BTreeMap<String, Vec<String>>,
}

impl SecurityRequirement {
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let schemes = map
            .iter()
            .map(|(name, scopes)| {
                let scopes = scopes
                    .as_array()
                    .map(|s| s.iter().filter_map(Value::as_str).map(str::to_string).collect())
                    .unwrap_or_default();
                (name.clone(), scopes)
            })
            .collect();
        Some(SecurityRequirement { schemes })
    }

    pub fn list_from_value(value: &Value) -> Vec<Self> {
        value
            .as_array()
            .map(|items| items.iter().filter_map(Self::from_value).collect())
            .unwrap_or_default()
    }
}
