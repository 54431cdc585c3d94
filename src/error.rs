//! Error types for contract loading, pipeline compilation and request validation.
//!
//! Load-time and compile-time failures are reported through [`ContractError`] and
//! abort the whole contract. Request-time failures are reported through
//! [`RequestError`] and are scoped to a single request; the router decides which
//! status code to answer with.

use crate::spec::ParameterLocation;
use crate::validator::ValidationIssue;
use thiserror::Error;

/// Coarse classification of a [`ContractError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A document could not be read, downloaded or decoded
    Fetch,
    /// The flattened contract failed the OpenAPI meta-schema
    ContractInvalid,
    /// A recognised construct this crate refuses to compile
    UnsupportedContractFeature,
    /// A security requirement has no registered handler
    MissingSecurityHandler,
    /// Everything else (configuration, dangling references, lookups)
    Other,
}

/// Load-time and compile-time failure.
#[derive(Debug, Error)]
pub enum ContractError {
    #[error("cannot fetch {uri}: {message}")]
    Fetch { uri: String, message: String },

    #[error("cannot decode {uri} as JSON ({json}) or YAML ({yaml})")]
    Decode {
        uri: String,
        json: String,
        yaml: String,
    },

    #[error("contract is invalid: {} violation(s), first: {}", .violations.len(), first_violation(.violations))]
    ContractInvalid { violations: Vec<ValidationIssue> },

    #[error("unsupported contract feature at {pointer}: {message}")]
    UnsupportedContractFeature { pointer: String, message: String },

    #[error("missing handler for security requirement: {}", security_label(.scheme, .scope))]
    MissingSecurityHandler {
        scheme: String,
        scope: Option<String>,
    },

    #[error("{0} not found inside contract")]
    OperationIdNotFound(String),

    #[error("cannot resolve reference {reference}: {message}")]
    InvalidReference { reference: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn first_violation(violations: &[ValidationIssue]) -> String {
    violations
        .first()
        .map(|v| format!("[{}] {}: {}", v.kind, v.location, v.message))
        .unwrap_or_else(|| "<none>".to_string())
}

fn security_label(scheme: &str, scope: &Option<String>) -> String {
    match scope {
        Some(scope) => format!("{scheme}:{scope}"),
        None => scheme.to_string(),
    }
}

impl ContractError {
    pub fn fetch(uri: impl ToString, message: impl ToString) -> Self {
        ContractError::Fetch {
            uri: uri.to_string(),
            message: message.to_string(),
        }
    }

    pub fn unsupported(pointer: impl Into<String>, message: impl Into<String>) -> Self {
        ContractError::UnsupportedContractFeature {
            pointer: pointer.into(),
            message: message.into(),
        }
    }

    pub fn invalid_reference(reference: impl Into<String>, message: impl Into<String>) -> Self {
        ContractError::InvalidReference {
            reference: reference.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            ContractError::Fetch { .. } | ContractError::Decode { .. } | ContractError::Io(_) => {
                ErrorKind::Fetch
            }
            ContractError::ContractInvalid { .. } => ErrorKind::ContractInvalid,
            ContractError::UnsupportedContractFeature { .. } => {
                ErrorKind::UnsupportedContractFeature
            }
            ContractError::MissingSecurityHandler { .. } => ErrorKind::MissingSecurityHandler,
            ContractError::OperationIdNotFound(_)
            | ContractError::InvalidReference { .. }
            | ContractError::Config(_) => ErrorKind::Other,
        }
    }
}

/// Coarse classification of a [`RequestError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestErrorKind {
    Parse,
    SchemaViolation,
    MissingParameter,
    Predicate,
    UnsupportedMediaType,
}

/// Where in the request a failure was detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestSource {
    Parameter {
        location: ParameterLocation,
        name: String,
    },
    Body {
        content_type: String,
    },
}

impl std::fmt::Display for RequestSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestSource::Parameter { location, name } => write!(f, "{location} parameter '{name}'"),
            RequestSource::Body { content_type } => write!(f, "body ({content_type})"),
        }
    }
}

/// Request-time rejection produced by a [`ValidationPipeline`](crate::validator::ValidationPipeline).
#[derive(Debug, Clone, Error)]
pub enum RequestError {
    #[error("cannot parse {at}: {message}")]
    Parse {
        at: RequestSource,
        message: String,
    },

    #[error("{at} violates its schema: {}", first_violation(.violations))]
    SchemaViolation {
        at: RequestSource,
        violations: Vec<ValidationIssue>,
    },

    #[error("missing required {location} parameter '{name}'")]
    MissingParameter {
        location: ParameterLocation,
        name: String,
    },

    #[error("request predicate failed: {0}")]
    Predicate(String),

    #[error("no body processor accepts content type '{0}'")]
    UnsupportedMediaType(String),
}

impl RequestError {
    pub(crate) fn parse(at: RequestSource, message: impl Into<String>) -> Self {
        RequestError::Parse {
            at,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> RequestErrorKind {
        match self {
            RequestError::Parse { .. } => RequestErrorKind::Parse,
            RequestError::SchemaViolation { .. } => RequestErrorKind::SchemaViolation,
            RequestError::MissingParameter { .. } => RequestErrorKind::MissingParameter,
            RequestError::Predicate(_) => RequestErrorKind::Predicate,
            RequestError::UnsupportedMediaType(_) => RequestErrorKind::UnsupportedMediaType,
        }
    }
}

pub type Result<T, E = ContractError> = std::result::Result<T, E>;
