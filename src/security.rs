//! # Security handler registry
//!
//! The contract only names security requirements; checking credentials is the
//! job of [`SecurityProvider`]s registered by the application. Providers are
//! registered per scheme, optionally narrowed to one scope:
//!
//! - `(scheme, scope)` is looked up first
//! - `(scheme)` is the fallback for every scope of that scheme
//!
//! A `security` array is an OR of requirements, each requirement an AND of
//! schemes. [`SecurityHandlers::bind`] turns that into
//! [`SecurityAlternatives`], failing with `MissingSecurityHandler` when a
//! scheme (or scope) has no provider and handlers are mandatory.

use crate::error::{ContractError, Result};
use crate::spec::SecurityRequirement;
use crate::validator::{percent_decode, RequestData};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// Checks the credentials carried by a request.
pub trait SecurityProvider: Send + Sync {
    /// `scheme` is the `components.securitySchemes` entry (`Null` when the
    /// contract does not declare it), `scopes` the scopes the operation needs.
    fn validate(&self, scheme: &Value, scopes: &[String], request: &RequestData) -> bool;
}

impl<F> SecurityProvider for F
where
    F: Fn(&Value, &[String], &RequestData) -> bool + Send + Sync,
{
    fn validate(&self, scheme: &Value, scopes: &[String], request: &RequestData) -> bool {
        self(scheme, scopes, request)
    }
}

/// Static API key read from a header, query parameter or cookie, as declared
/// by an `apiKey` scheme.
pub struct ApiKeyProvider {
    key: String,
}

impl ApiKeyProvider {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl SecurityProvider for ApiKeyProvider {
    fn validate(&self, scheme: &Value, _scopes: &[String], request: &RequestData) -> bool {
        let (Some(name), Some(location)) = (
            scheme.get("name").and_then(Value::as_str),
            scheme.get("in").and_then(Value::as_str),
        ) else {
            return false;
        };
        let (values, encoded) = match location {
            "header" => (request.header.get(&name.to_ascii_lowercase()), false),
            "query" => (request.query.get(name), true),
            "cookie" => (request.cookie.get(name), true),
            _ => (None, false),
        };
        values
            .and_then(|v| v.first())
            .and_then(|raw| percent_decode(raw, encoded).ok())
            .is_some_and(|k| k == self.key)
    }
}

/// One provider bound to one scheme of one requirement.
#[derive(Clone)]
pub struct SecurityBinding {
    pub scheme: String,
    pub scopes: Vec<String>,
    pub definition: Value,
    pub provider: Arc<dyn SecurityProvider>,
}

impl std::fmt::Debug for SecurityBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityBinding")
            .field("scheme", &self.scheme)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// OR of requirements, each an AND of bindings. Empty means no security.
#[derive(Debug, Clone, Default)]
pub struct SecurityAlternatives {
    pub alternatives: Vec<Vec<SecurityBinding>>,
}

impl SecurityAlternatives {
    pub fn is_empty(&self) -> bool {
        self.alternatives.is_empty()
    }

    /// `true` when at least one alternative is fully satisfied.
    pub fn authorize(&self, request: &RequestData) -> bool {
        self.is_empty()
            || self.alternatives.iter().any(|requirement| {
                requirement
                    .iter()
                    .all(|binding| binding.provider.validate(&binding.definition, &binding.scopes, request))
            })
    }
}

#[derive(Clone, Default)]
pub struct SecurityHandlers {
    handlers: HashMap<(String, Option<String>), Arc<dyn SecurityProvider>>,
}

impl std::fmt::Debug for SecurityHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityHandlers")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SecurityHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider for every scope of `scheme`.
    pub fn register(&mut self, scheme: impl Into<String>, provider: Arc<dyn SecurityProvider>) -> &mut Self {
        self.handlers.insert((scheme.into(), None), provider);
        self
    }

    /// Provider for one scope of `scheme`; wins over the scheme-wide one.
    pub fn register_scoped(
        &mut self,
        scheme: impl Into<String>,
        scope: impl Into<String>,
        provider: Arc<dyn SecurityProvider>,
    ) -> &mut Self {
        self.handlers.insert((scheme.into(), Some(scope.into())), provider);
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn lookup(&self, scheme: &str, scope: Option<&str>) -> Option<&Arc<dyn SecurityProvider>> {
        scope
            .and_then(|scope| self.handlers.get(&(scheme.to_string(), Some(scope.to_string()))))
            .or_else(|| self.handlers.get(&(scheme.to_string(), None)))
    }

    /// Binds every scheme (and scope) of `requirements` to a provider.
    ///
    /// With `required == false` a requirement containing an unbound scheme is
    /// dropped instead of failing.
    pub fn bind(
        &self,
        requirements: &[SecurityRequirement],
        definitions: &BTreeMap<String, Value>,
        required: bool,
    ) -> Result<SecurityAlternatives> {
        let mut alternatives = Vec::with_capacity(requirements.len());
        'requirements: for requirement in requirements {
            let mut bindings = Vec::new();
            for (scheme, scopes) in &requirement.schemes {
                let definition = definitions.get(scheme).cloned().unwrap_or(Value::Null);
                let mut bind = |scope: Option<&String>, scopes: Vec<String>| -> Result<bool> {
                    match self.lookup(scheme, scope.map(String::as_str)) {
                        Some(provider) => {
                            bindings.push(SecurityBinding {
                                scheme: scheme.clone(),
                                scopes,
                                definition: definition.clone(),
                                provider: Arc::clone(provider),
                            });
                            Ok(true)
                        }
                        None if required => Err(ContractError::MissingSecurityHandler {
                            scheme: scheme.clone(),
                            scope: scope.cloned(),
                        }),
                        None => {
                            warn!(scheme = %scheme, scope = ?scope, "no security handler, requirement skipped");
                            Ok(false)
                        }
                    }
                };
                if scopes.is_empty() {
                    if !bind(None, Vec::new())? {
                        continue 'requirements;
                    }
                } else {
                    for scope in scopes {
                        if !bind(Some(scope), vec![scope.clone()])? {
                            continue 'requirements;
                        }
                    }
                }
            }
            debug!(schemes = bindings.len(), "security requirement bound");
            alternatives.push(bindings);
        }
        Ok(SecurityAlternatives { alternatives })
    }
}
