//! Request validation pipelines compiled from contract operations.
//!
//! Bottom-up: [`value`] turns raw strings into JSON values, [`style`] picks how
//! a parameter is serialized, [`schema`] wraps the structural validator,
//! [`parameter`] and [`body`] combine them per parameter / media type, and
//! [`pipeline`] runs everything for one request.

pub mod body;
pub mod parameter;
pub mod pipeline;
pub mod schema;
pub mod style;
pub mod value;

pub use body::{BodyPipelineBuilder, BodyProcessor, FormEncoding};
pub use parameter::{LocationValues, ParameterParser, ParameterPipelineBuilder, ParameterProcessor};
pub use pipeline::{
    BodyContent, FileUpload, MultipartForm, RequestBody, RequestData, RequestPredicate, ValidatedRequest,
    ValidationPipeline,
};
pub use schema::{SchemaCompiler, SchemaValidator};
pub use style::{Strategy, StyleQuery, StyleResolver, RULES};
pub use value::{percent_decode, ObjectParsers, SchemaShape, Separator, ValueParser, ValueParserFactory};

/// One structural violation: instance location, violated keyword and text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub location: String,
    pub kind: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(location: impl Into<String>, kind: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationIssue {
            location: location.into(),
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.location, self.message)
    }
}

pub fn print_issues(issues: &[ValidationIssue]) {
    eprintln!("\n❌ OpenAPI contract validation failed. {} issue(s) found:\n", issues.len());
    for issue in issues {
        eprintln!("{issue}");
    }
    eprintln!("\nPlease fix the issues in your OpenAPI contract before loading it.\n");
}

/// Media type without parameters, lower-cased: `Application/JSON; charset=utf-8` → `application/json`.
pub fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// `application/json` and any `+json` structured suffix.
pub fn is_json_media_type(content_type: &str) -> bool {
    let essence = essence(content_type);
    essence == "application/json" || (essence.starts_with("application/") && essence.ends_with("+json"))
}
