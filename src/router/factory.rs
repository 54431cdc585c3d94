use super::path::PathMatcher;
use crate::config::RouterFactoryOptions;
use crate::error::{ContractError, RequestError, RequestErrorKind, Result};
use crate::security::{SecurityAlternatives, SecurityHandlers, SecurityProvider};
use crate::spec::{Contract, Operation, ParameterLocation, ParameterStyle};
use crate::validator::{LocationValues, RequestData, ValidatedRequest, ValidationPipeline};
use http::{Method, StatusCode};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Stage of a route's handler chain, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChainStage {
    BodyExtraction,
    Global,
    Security,
    Validation,
    User,
    NotImplemented,
}

#[derive(Debug, Clone)]
pub enum ChainEntry<H> {
    /// The host decodes the body into [`RequestData`] here
    BodyExtraction,
    Global(H),
    Security(SecurityAlternatives),
    Validation(Arc<ValidationPipeline>),
    User(H),
    /// Answers 501
    NotImplemented,
}

impl<H> ChainEntry<H> {
    pub fn stage(&self) -> ChainStage {
        match self {
            ChainEntry::BodyExtraction => ChainStage::BodyExtraction,
            ChainEntry::Global(_) => ChainStage::Global,
            ChainEntry::Security(_) => ChainStage::Security,
            ChainEntry::Validation(_) => ChainStage::Validation,
            ChainEntry::User(_) => ChainStage::User,
            ChainEntry::NotImplemented => ChainStage::NotImplemented,
        }
    }
}

/// One mounted operation.
#[derive(Debug, Clone)]
pub struct Route<H> {
    pub operation_id: String,
    pub method: Method,
    pub matcher: PathMatcher,
    pub tags: Vec<String>,
    pub chain: Vec<ChainEntry<H>>,
    pub consumes: Vec<String>,
    pub produces: BTreeSet<String>,
    /// `false` when the contract marks the body as required
    pub allow_empty_body: bool,
    /// `(operation_model_key, operation object)` when the key is configured
    pub model: Option<(String, Value)>,
}

impl<H> Route<H> {
    pub fn stages(&self) -> Vec<ChainStage> {
        self.chain.iter().map(ChainEntry::stage).collect()
    }

    pub fn pipeline(&self) -> Option<&Arc<ValidationPipeline>> {
        self.chain.iter().find_map(|entry| match entry {
            ChainEntry::Validation(pipeline) => Some(pipeline),
            _ => None,
        })
    }

    pub fn security(&self) -> Option<&SecurityAlternatives> {
        self.chain.iter().find_map(|entry| match entry {
            ChainEntry::Security(security) => Some(security),
            _ => None,
        })
    }

    pub fn handler(&self) -> Option<&H> {
        self.chain.iter().find_map(|entry| match entry {
            ChainEntry::User(handler) => Some(handler),
            _ => None,
        })
    }

    pub fn global_handlers(&self) -> impl Iterator<Item = &H> {
        self.chain.iter().filter_map(|entry| match entry {
            ChainEntry::Global(handler) => Some(handler),
            _ => None,
        })
    }

    pub fn is_implemented(&self) -> bool {
        self.handler().is_some()
    }
}

/// Why a request did not reach its user handler.
#[derive(Debug, Clone)]
pub enum Rejection {
    NotFound,
    MethodNotAllowed(Vec<Method>),
    Unauthorized,
    Invalid(RequestError),
    NotImplemented,
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::NotFound => StatusCode::NOT_FOUND,
            Rejection::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Rejection::Unauthorized => StatusCode::UNAUTHORIZED,
            Rejection::Invalid(err) if err.kind() == RequestErrorKind::UnsupportedMediaType => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            Rejection::Invalid(_) => StatusCode::BAD_REQUEST,
            Rejection::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        }
    }
}

/// A request that went through security and validation.
#[derive(Debug)]
pub struct Dispatch<'r, H> {
    pub route: &'r Route<H>,
    pub request: ValidatedRequest,
}

pub enum RouteOutcome<'r, H> {
    Matched {
        route: &'r Route<H>,
        path: LocationValues,
    },
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

#[derive(Debug)]
pub struct Router<H> {
    routes: Vec<Route<H>>,
    method_not_allowed: bool,
}

impl<H> Router<H> {
    pub fn routes(&self) -> &[Route<H>] {
        &self.routes
    }

    /// First route (most specific template first) matching method and path.
    pub fn route(&self, method: &Method, path: &str) -> RouteOutcome<'_, H> {
        let mut allowed = Vec::new();
        for route in &self.routes {
            let Some(values) = route.matcher.matches(path) else {
                continue;
            };
            if route.method == *method {
                return RouteOutcome::Matched { route, path: values };
            }
            if !allowed.contains(&route.method) {
                allowed.push(route.method.clone());
            }
        }
        if allowed.is_empty() || !self.method_not_allowed {
            RouteOutcome::NotFound
        } else {
            RouteOutcome::MethodNotAllowed(allowed)
        }
    }

    /// Runs the chain up to the user handler: match, security, validation.
    /// Path parameters are filled in from the matched template.
    pub fn dispatch(
        &self,
        method: &Method,
        path: &str,
        mut request: RequestData,
    ) -> std::result::Result<Dispatch<'_, H>, Rejection> {
        let (route, values) = match self.route(method, path) {
            RouteOutcome::Matched { route, path } => (route, path),
            RouteOutcome::MethodNotAllowed(allowed) => return Err(Rejection::MethodNotAllowed(allowed)),
            RouteOutcome::NotFound => return Err(Rejection::NotFound),
        };
        request.path = values;

        let mut validated = ValidatedRequest::default();
        for entry in &route.chain {
            match entry {
                ChainEntry::Security(security) if !security.authorize(&request) => {
                    debug!(operation_id = %route.operation_id, "security rejected request");
                    return Err(Rejection::Unauthorized);
                }
                ChainEntry::Validation(pipeline) => {
                    validated = pipeline.validate(&request).map_err(|err| {
                        debug!(operation_id = %route.operation_id, error = %err, "request rejected");
                        Rejection::Invalid(err)
                    })?;
                }
                ChainEntry::NotImplemented => return Err(Rejection::NotImplemented),
                _ => {}
            }
        }
        Ok(Dispatch {
            route,
            request: validated,
        })
    }
}

/// Wires contract operations to handlers.
///
/// Handler chain of every mounted operation:
/// body extraction → global handlers → security → validation → user handler
/// (or the 501 fallback when none is registered).
#[derive(Debug)]
pub struct RouterFactory<H> {
    contract: Arc<Contract>,
    options: RouterFactoryOptions,
    global: Vec<H>,
    security: SecurityHandlers,
    handlers: HashMap<String, H>,
}

impl<H: Clone> RouterFactory<H> {
    pub fn new(contract: impl Into<Arc<Contract>>) -> Self {
        Self {
            contract: contract.into(),
            options: RouterFactoryOptions::default(),
            global: Vec::new(),
            security: SecurityHandlers::new(),
            handlers: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: RouterFactoryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &RouterFactoryOptions {
        &self.options
    }

    pub fn contract(&self) -> &Contract {
        &self.contract
    }

    pub fn add_global_handler(&mut self, handler: H) -> &mut Self {
        self.global.push(handler);
        self
    }

    pub fn security_handler(&mut self, scheme: impl Into<String>, provider: Arc<dyn SecurityProvider>) -> &mut Self {
        self.security.register(scheme, provider);
        self
    }

    pub fn scoped_security_handler(
        &mut self,
        scheme: impl Into<String>,
        scope: impl Into<String>,
        provider: Arc<dyn SecurityProvider>,
    ) -> &mut Self {
        self.security.register_scoped(scheme, scope, provider);
        self
    }

    /// Registers the user handler of one operation.
    pub fn operation(&mut self, operation_id: &str, handler: H) -> Result<&mut Self> {
        if self.contract.operation(operation_id).is_none() {
            return Err(ContractError::OperationIdNotFound(operation_id.to_string()));
        }
        self.handlers.insert(operation_id.to_string(), handler);
        Ok(self)
    }

    /// Registers a handler for every operation carrying `tag`; returns how many.
    pub fn operations_by_tag(&mut self, tag: &str, mut make: impl FnMut(&Operation) -> H) -> usize {
        let contract = Arc::clone(&self.contract);
        let mut count = 0;
        for operation in contract.operations_by_tag(tag) {
            self.handlers.insert(operation.operation_id.clone(), make(operation));
            count += 1;
        }
        count
    }

    /// Builds the router; fails as a whole on the first unbindable security
    /// requirement or uncompilable path.
    pub fn create_router(&self) -> Result<Router<H>> {
        let mut routes = Vec::with_capacity(self.contract.len());
        for operation in self.contract.operations() {
            let handler = self.handlers.get(&operation.operation_id);
            if handler.is_none() && !self.options.mount_not_implemented_handler {
                debug!(operation_id = %operation.operation_id, "unimplemented operation skipped");
                continue;
            }
            routes.push(self.mount(operation, handler)?);
        }
        routes.sort_by_key(|route: &Route<H>| route.matcher.specificity());

        let unimplemented = routes.iter().filter(|r| !r.is_implemented()).count();
        if unimplemented > 0 {
            warn!(operations = unimplemented, "operations without handler answer 501");
        }
        info!(
            routes = routes.len(),
            base_path = %self.contract.base_path,
            "router created"
        );
        Ok(Router {
            routes,
            method_not_allowed: self.options.mount_not_implemented_handler,
        })
    }

    fn mount(&self, operation: &Operation, handler: Option<&H>) -> Result<Route<H>> {
        let styles: HashMap<String, ParameterStyle> = operation
            .parameters
            .iter()
            .filter(|decl| decl.location == ParameterLocation::Path)
            .map(|decl| (decl.name.clone(), decl.effective_style()))
            .collect();
        let matcher = PathMatcher::compile(&self.contract.base_path, &operation.path_template, &styles)?;

        let mut chain = vec![ChainEntry::BodyExtraction];
        chain.extend(self.global.iter().cloned().map(ChainEntry::Global));
        let security = self.security.bind(
            &operation.security,
            &self.contract.security_schemes,
            self.options.require_security_handlers,
        )?;
        if !security.is_empty() {
            chain.push(ChainEntry::Security(security));
        }
        chain.push(ChainEntry::Validation(Arc::clone(&operation.pipeline)));
        chain.push(match handler {
            Some(handler) => ChainEntry::User(handler.clone()),
            None => ChainEntry::NotImplemented,
        });

        Ok(Route {
            operation_id: operation.operation_id.clone(),
            method: operation.method.clone(),
            matcher,
            tags: operation.tags.clone(),
            chain,
            consumes: operation.consumes.clone(),
            produces: operation.produces.clone(),
            allow_empty_body: !operation.body_required,
            model: self
                .options
                .operation_model_key
                .as_ref()
                .map(|key| (key.clone(), operation.definition.clone())),
        })
    }
}
