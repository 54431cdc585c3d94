//! Per-operation request validation.
//!
//! A [`ValidationPipeline`] is built once when the contract is compiled and is
//! immutable afterwards; [`ValidationPipeline::validate`] takes `&self` and can
//! run from any number of request tasks at once.
//!
//! Execution order for one request:
//!
//! 1. parameters, by location: path, cookie, query, header
//! 2. request predicates (body required, multipart file parts)
//! 3. the body processor selected by the request `Content-Type`
//!
//! The first failure is returned.

use super::body::BodyProcessor;
use super::parameter::{LocationValues, ParameterProcessor};
use super::{essence, is_json_media_type};
use crate::error::RequestError;
use crate::spec::ParameterLocation;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

pub const MULTIPART_FORM_DATA: &str = "multipart/form-data";
pub const DEFAULT_FILE_CONTENT_TYPE: &str = "application/octet-stream";

/// One uploaded file part, as extracted by the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    /// Form field name
    pub name: String,
    pub file_name: Option<String>,
    pub content_type: String,
}

/// A decoded `multipart/form-data` body: text fields plus file parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultipartForm {
    pub fields: LocationValues,
    pub files: Vec<FileUpload>,
}

impl MultipartForm {
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.entry(name.into()).or_default().push(value.into());
        self
    }

    #[must_use]
    pub fn with_file(mut self, name: impl Into<String>, content_type: impl Into<String>) -> Self {
        self.files.push(FileUpload {
            name: name.into(),
            file_name: None,
            content_type: content_type.into(),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyContent {
    Raw(Vec<u8>),
    Multipart(MultipartForm),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBody {
    pub content_type: String,
    pub content: BodyContent,
}

impl RequestBody {
    /// An empty raw body counts as no body at all.
    pub fn is_empty(&self) -> bool {
        matches!(&self.content, BodyContent::Raw(bytes) if bytes.is_empty())
    }
}

/// Everything the pipeline reads from a request. The router fills it in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestData {
    pub path: LocationValues,
    pub query: LocationValues,
    /// Keys are lower-cased
    pub header: LocationValues,
    pub cookie: LocationValues,
    pub body: Option<RequestBody>,
}

impl RequestData {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_path_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path.insert(name.into(), vec![value.into()]);
        self
    }

    /// Appends the pairs of a raw query string (`a=1&b=x%20y`). Keys are
    /// decoded; values stay percent-encoded (`+` becomes `%20`) until the
    /// parameter parser has split them.
    #[must_use]
    pub fn with_query_string(mut self, query: &str) -> Self {
        for pair in query.trim_start_matches('?').split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = key.replace('+', " ");
            let decoded = urlencoding::decode(&key).ok().map(|k| k.into_owned());
            let key = decoded.unwrap_or(key);
            self.query.entry(key).or_default().push(value.replace('+', "%20"));
        }
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.header
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into());
        self
    }

    /// Splits a `Cookie` header value (`a=1; b=2`). Values stay
    /// percent-encoded, like query values.
    #[must_use]
    pub fn with_cookie_header(mut self, raw: &str) -> Self {
        for pair in raw.split(';') {
            if let Some((name, value)) = pair.trim().split_once('=') {
                self.cookie
                    .entry(name.to_string())
                    .or_default()
                    .push(value.to_string());
            }
        }
        self
    }

    #[must_use]
    pub fn with_body(mut self, content_type: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.body = Some(RequestBody {
            content_type: content_type.into(),
            content: BodyContent::Raw(bytes.into()),
        });
        self
    }

    #[must_use]
    pub fn with_json_body(self, body: &Value) -> Self {
        self.with_body("application/json", body.to_string())
    }

    #[must_use]
    pub fn with_multipart(mut self, form: MultipartForm) -> Self {
        self.body = Some(RequestBody {
            content_type: MULTIPART_FORM_DATA.to_string(),
            content: BodyContent::Multipart(form),
        });
        self
    }

    pub fn values(&self, location: ParameterLocation) -> &LocationValues {
        match location {
            ParameterLocation::Path => &self.path,
            ParameterLocation::Query => &self.query,
            ParameterLocation::Header => &self.header,
            ParameterLocation::Cookie => &self.cookie,
        }
    }

    /// The body unless it is absent or empty.
    pub fn present_body(&self) -> Option<&RequestBody> {
        self.body.as_ref().filter(|body| !body.is_empty())
    }

    fn is_multipart(&self) -> bool {
        self.present_body()
            .is_some_and(|body| essence(&body.content_type) == MULTIPART_FORM_DATA)
    }
}

/// Whole-request check evaluated before the body is parsed.
#[derive(Debug, Clone)]
pub enum RequestPredicate {
    BodyRequired,
    /// Only checked for `multipart/form-data` requests.
    FileUploadExists {
        property: String,
        /// Declared pattern, kept for diagnostics
        declared: String,
        content_type: Regex,
    },
}

impl RequestPredicate {
    /// `declared` is an `encoding.<prop>.contentType` value such as
    /// `image/png, image/*`. Each entry is matched literally except `*`.
    pub fn file_upload(property: impl Into<String>, declared: &str) -> Result<Self, regex::Error> {
        let alternatives: Vec<String> = declared
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| regex::escape(&entry.to_ascii_lowercase()).replace(r"\*", ".*"))
            .collect();
        let content_type = Regex::new(&format!("^(?:{})$", alternatives.join("|")))?;
        Ok(RequestPredicate::FileUploadExists {
            property: property.into(),
            declared: declared.to_string(),
            content_type,
        })
    }

    pub fn check(&self, request: &RequestData) -> Result<(), RequestError> {
        match self {
            RequestPredicate::BodyRequired => match request.present_body() {
                Some(_) => Ok(()),
                None => Err(RequestError::Predicate("request body is required".to_string())),
            },
            RequestPredicate::FileUploadExists {
                property,
                declared,
                content_type,
            } => {
                let Some(RequestBody {
                    content: BodyContent::Multipart(form),
                    ..
                }) = request.present_body().filter(|_| request.is_multipart())
                else {
                    return Ok(());
                };
                let found = form
                    .files
                    .iter()
                    .any(|file| file.name == *property && content_type.is_match(&essence(&file.content_type)));
                if found {
                    Ok(())
                } else {
                    Err(RequestError::Predicate(format!(
                        "file part '{property}' with content type matching '{declared}' is required"
                    )))
                }
            }
        }
    }
}

impl std::fmt::Display for RequestPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestPredicate::BodyRequired => write!(f, "body required"),
            RequestPredicate::FileUploadExists { property, declared, .. } => {
                write!(f, "file '{property}' ({declared})")
            }
        }
    }
}

/// Parsed and validated request values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedRequest {
    pub path: HashMap<String, Value>,
    pub query: HashMap<String, Value>,
    pub header: HashMap<String, Value>,
    pub cookie: HashMap<String, Value>,
    pub body: Option<Value>,
}

impl ValidatedRequest {
    pub fn parameter(&self, location: ParameterLocation, name: &str) -> Option<&Value> {
        self.location(location).get(name)
    }

    fn location(&self, location: ParameterLocation) -> &HashMap<String, Value> {
        match location {
            ParameterLocation::Path => &self.path,
            ParameterLocation::Query => &self.query,
            ParameterLocation::Header => &self.header,
            ParameterLocation::Cookie => &self.cookie,
        }
    }

    fn location_mut(&mut self, location: ParameterLocation) -> &mut HashMap<String, Value> {
        match location {
            ParameterLocation::Path => &mut self.path,
            ParameterLocation::Query => &mut self.query,
            ParameterLocation::Header => &mut self.header,
            ParameterLocation::Cookie => &mut self.cookie,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationPipeline {
    /// `ParameterLocation` orders as path, cookie, query, header
    parameters: BTreeMap<ParameterLocation, Vec<ParameterProcessor>>,
    bodies: Vec<(String, BodyProcessor)>,
    predicates: Vec<RequestPredicate>,
}

impl ValidationPipeline {
    pub fn new(
        parameters: Vec<ParameterProcessor>,
        bodies: Vec<(String, BodyProcessor)>,
        predicates: Vec<RequestPredicate>,
    ) -> Self {
        let mut by_location: BTreeMap<ParameterLocation, Vec<ParameterProcessor>> = BTreeMap::new();
        for processor in parameters {
            by_location.entry(processor.location).or_default().push(processor);
        }
        let bodies = bodies
            .into_iter()
            .map(|(media_type, processor)| (essence(&media_type), processor))
            .collect();
        Self {
            parameters: by_location,
            bodies,
            predicates,
        }
    }

    pub fn parameters(&self) -> impl Iterator<Item = &ParameterProcessor> {
        self.parameters.values().flatten()
    }

    pub fn media_types(&self) -> impl Iterator<Item = &str> {
        self.bodies.iter().map(|(media_type, _)| media_type.as_str())
    }

    pub fn predicates(&self) -> &[RequestPredicate] {
        &self.predicates
    }

    /// Exact media type first. A JSON-family request (`+json` suffixes
    /// included) falls back to the declared JSON-family processor.
    pub fn body_processor(&self, content_type: &str) -> Option<&BodyProcessor> {
        let wanted = essence(content_type);
        self.bodies
            .iter()
            .find(|(media_type, _)| *media_type == wanted)
            .or_else(|| {
                is_json_media_type(&wanted)
                    .then(|| self.bodies.iter().find(|(media_type, _)| is_json_media_type(media_type)))
                    .flatten()
            })
            .map(|(_, processor)| processor)
    }

    pub fn validate(&self, request: &RequestData) -> Result<ValidatedRequest, RequestError> {
        let mut validated = ValidatedRequest::default();

        for (location, processors) in &self.parameters {
            let values = request.values(*location);
            for processor in processors {
                if let Some(value) = processor.process(values)? {
                    validated.location_mut(*location).insert(processor.name.clone(), value);
                }
            }
        }

        for predicate in &self.predicates {
            predicate.check(request)?;
        }

        if let Some(body) = request.present_body() {
            if !self.bodies.is_empty() {
                let processor = self
                    .body_processor(&body.content_type)
                    .ok_or_else(|| RequestError::UnsupportedMediaType(body.content_type.clone()))?;
                validated.body = Some(processor.process(body)?);
            }
        }

        debug!(
            parameters = validated.path.len() + validated.query.len() + validated.header.len() + validated.cookie.len(),
            body = validated.body.is_some(),
            "request validated"
        );
        Ok(validated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RequestErrorKind;

    #[test]
    fn test_request_data_builders() {
        let request = RequestData::new()
            .with_query_string("?a=1&a=2&b=x%20y")
            .with_header("X-Trace", "abc")
            .with_cookie_header("session=s1; theme=dark");
        assert_eq!(request.query["a"], vec!["1", "2"]);
        assert_eq!(request.query["b"], vec!["x%20y"]);
        assert_eq!(request.header["x-trace"], vec!["abc"]);
        assert_eq!(request.cookie["theme"], vec!["dark"]);
    }

    #[test]
    fn test_body_required_predicate() {
        let predicate = RequestPredicate::BodyRequired;
        assert_eq!(
            predicate.check(&RequestData::new()).unwrap_err().kind(),
            RequestErrorKind::Predicate
        );
        assert!(predicate
            .check(&RequestData::new().with_body("application/json", ""))
            .is_err());
        assert!(predicate
            .check(&RequestData::new().with_body("application/json", "{}"))
            .is_ok());
    }

    #[test]
    fn test_file_upload_predicate_matches_content_type() {
        let predicate = RequestPredicate::file_upload("avatar", "image/png, image/jp*").unwrap();
        let with = |ct: &str| RequestData::new().with_multipart(MultipartForm::default().with_file("avatar", ct));
        assert!(predicate.check(&with("image/png")).is_ok());
        assert!(predicate.check(&with("image/jpeg; q=1")).is_ok());
        assert!(predicate.check(&with("text/plain")).is_err());
        assert!(predicate
            .check(&RequestData::new().with_multipart(MultipartForm::default().with_field("avatar", "x")))
            .is_err());
        // Not multipart: nothing to check
        assert!(predicate.check(&RequestData::new().with_body("application/json", "{}")).is_ok());
    }

    #[test]
    fn test_pattern_is_literal_apart_from_star() {
        let predicate = RequestPredicate::file_upload("doc", "application/vnd.a+json").unwrap();
        let RequestPredicate::FileUploadExists { content_type, .. } = predicate else {
            panic!("expected file predicate");
        };
        assert!(content_type.is_match("application/vnd.a+json"));
        assert!(!content_type.is_match("application/vndxa+json"));
    }

    #[test]
    fn test_empty_pipeline_accepts_anything() {
        let pipeline = ValidationPipeline::default();
        let validated = pipeline
            .validate(&RequestData::new().with_body("text/plain", "hi"))
            .unwrap();
        assert_eq!(validated, ValidatedRequest::default());
    }
}
