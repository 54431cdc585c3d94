use super::load::LoadedContract;
use super::types::{ParameterDeclaration, SecurityRequirement};
use crate::error::{ContractError, Result};
use crate::resolver::Reference;
use crate::validator::{
    BodyPipelineBuilder, ParameterPipelineBuilder, RequestPredicate, SchemaCompiler, ValidationPipeline,
};
use http::Method;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Path item keys that hold operations, in contract order.
pub const HTTP_METHODS: [&str; 8] = ["get", "put", "post", "delete", "options", "head", "patch", "trace"];

/// One compiled operation, ready to be mounted by a router.
#[derive(Debug, Clone)]
pub struct Operation {
    pub operation_id: String,
    pub method: Method,
    /// Path template exactly as declared (`/pets/{id}`)
    pub path_template: String,
    pub tags: Vec<String>,
    /// Path-level and operation-level parameters after merging
    pub parameters: Vec<ParameterDeclaration>,
    /// Operation-level requirements if declared (even `[]`), else the global ones
    pub security: Vec<SecurityRequirement>,
    /// Location of the operation object
    pub at: Reference,
    /// Request body media types, declaration order
    pub consumes: Vec<String>,
    /// Union of response media types
    pub produces: BTreeSet<String>,
    pub body_required: bool,
    /// The operation object as declared (references absolute, not inlined)
    pub definition: Value,
    pub pipeline: Arc<ValidationPipeline>,
}

impl Operation {
    pub fn is_tagged(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Every operation of a contract, indexed by id and by `(method, template)`.
#[derive(Debug, Clone, Default)]
pub struct Contract {
    /// Path of the first `servers` entry, without trailing `/`
    pub base_path: String,
    /// Global `security`
    pub security: Vec<SecurityRequirement>,
    /// `components.securitySchemes`, dereferenced
    pub security_schemes: BTreeMap<String, Value>,
    operations: Vec<Operation>,
    by_id: HashMap<String, usize>,
    by_route: HashMap<(Method, String), usize>,
}

impl Contract {
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn operation(&self, operation_id: &str) -> Option<&Operation> {
        self.by_id.get(operation_id).map(|&idx| &self.operations[idx])
    }

    pub fn find(&self, method: &Method, path_template: &str) -> Option<&Operation> {
        self.by_route
            .get(&(method.clone(), path_template.to_string()))
            .map(|&idx| &self.operations[idx])
    }

    pub fn operations_by_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Operation> + 'a {
        self.operations.iter().filter(move |op| op.is_tagged(tag))
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Builds a [`Contract`] from a loaded contract.
///
/// For every operation:
/// - merges path-level and operation-level parameters (operation wins on
///   `(name, in)`)
/// - compiles one [`ValidationPipeline`] (parameters, predicates, bodies)
/// - resolves the effective security requirements
///
/// Any unsupported construct aborts the whole build.
pub struct OperationAssembler<'c> {
    contract: &'c LoadedContract,
    compiler: SchemaCompiler,
}

impl<'c> OperationAssembler<'c> {
    pub fn new(contract: &'c LoadedContract) -> Self {
        Self {
            contract,
            compiler: SchemaCompiler::new(Arc::clone(contract.store())),
        }
    }

    /// Schema validators compiled so far.
    pub fn compiled_schemas(&self) -> usize {
        self.compiler.cached()
    }

    pub fn assemble(&self) -> Result<Contract> {
        let root = self.contract.raw();
        let root_at = self.contract.root_reference();

        let mut contract = Contract {
            base_path: base_path(root),
            security: root
                .get("security")
                .map(SecurityRequirement::list_from_value)
                .unwrap_or_default(),
            security_schemes: self.security_schemes(root)?,
            ..Contract::default()
        };

        let empty = Map::new();
        let paths = root.get("paths").and_then(Value::as_object).unwrap_or(&empty);
        let paths_at = root_at.append("paths");
        for (template, item) in paths {
            let (item, item_at) = self.solve(item, &paths_at.append(template))?;
            for method in HTTP_METHODS {
                let Some(definition) = item.get(method) else {
                    continue;
                };
                let operation = self.assemble_operation(
                    template,
                    method,
                    definition,
                    item_at.append(method),
                    &item,
                    &item_at,
                    &contract.security,
                )?;
                if contract.by_id.contains_key(&operation.operation_id) {
                    return Err(ContractError::unsupported(
                        operation.at.to_string(),
                        format!("duplicate operation id '{}'", operation.operation_id),
                    ));
                }
                let idx = contract.operations.len();
                contract.by_id.insert(operation.operation_id.clone(), idx);
                contract
                    .by_route
                    .insert((operation.method.clone(), template.clone()), idx);
                contract.operations.push(operation);
            }
        }

        info!(
            operations = contract.len(),
            schemas = self.compiler.cached(),
            "contract compiled"
        );
        Ok(contract)
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble_operation(
        &self,
        template: &str,
        method: &str,
        definition: &Value,
        at: Reference,
        item: &Value,
        item_at: &Reference,
        global_security: &[SecurityRequirement],
    ) -> Result<Operation> {
        let operation_id = operation_id(definition, method, template);
        let parameters = merge_parameters(
            self.parameters(item.get("parameters"), &item_at.append("parameters"))?,
            self.parameters(definition.get("parameters"), &at.append("parameters"))?,
        );

        let parameter_builder = ParameterPipelineBuilder::new(&self.compiler);
        let processors = parameters
            .iter()
            .map(|decl| parameter_builder.build(decl))
            .collect::<Result<Vec<_>>>()?;

        let mut predicates = Vec::new();
        let mut bodies = Vec::new();
        let mut consumes = Vec::new();
        let mut body_required = false;
        if let Some(body) = definition.get("requestBody") {
            let (body, body_at) = self.solve(body, &at.append("requestBody"))?;
            body_required = body.get("required").and_then(Value::as_bool).unwrap_or(false);
            if body_required {
                predicates.push(RequestPredicate::BodyRequired);
            }
            let body_builder = BodyPipelineBuilder::new(&self.compiler);
            let content_at = body_at.append("content");
            if let Some(content) = body.get("content").and_then(Value::as_object) {
                for (media_type, media) in content {
                    let processor =
                        body_builder.build(media_type, media, &content_at.append(media_type), &mut predicates)?;
                    consumes.push(media_type.clone());
                    bodies.push((media_type.clone(), processor));
                }
            }
        }

        let security = match definition.get("security") {
            Some(declared) => SecurityRequirement::list_from_value(declared),
            None => global_security.to_vec(),
        };

        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|e| ContractError::unsupported(at.to_string(), e.to_string()))?;

        debug!(
            operation_id = %operation_id,
            method = %method,
            path = %template,
            parameters = processors.len(),
            bodies = bodies.len(),
            predicates = predicates.len(),
            "operation assembled"
        );

        Ok(Operation {
            operation_id,
            method,
            path_template: template.to_string(),
            tags: definition
                .get("tags")
                .and_then(Value::as_array)
                .map(|tags| tags.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default(),
            parameters,
            security,
            consumes,
            produces: self.produces(definition, &at)?,
            body_required,
            definition: definition.clone(),
            pipeline: Arc::new(ValidationPipeline::new(processors, bodies, predicates)),
            at,
        })
    }

    /// Dereferenced parameter declarations of one `parameters` array.
    fn parameters(&self, list: Option<&Value>, at: &Reference) -> Result<Vec<ParameterDeclaration>> {
        let Some(list) = list.and_then(Value::as_array) else {
            return Ok(Vec::new());
        };
        list.iter()
            .enumerate()
            .map(|(idx, entry)| {
                let (parameter, parameter_at) = self.solve(entry, &at.append(&idx.to_string()))?;
                ParameterDeclaration::from_value(&parameter, parameter_at)
            })
            .collect()
    }

    fn produces(&self, definition: &Value, at: &Reference) -> Result<BTreeSet<String>> {
        let mut produces = BTreeSet::new();
        let Some(responses) = definition.get("responses").and_then(Value::as_object) else {
            return Ok(produces);
        };
        let responses_at = at.append("responses");
        for (status, response) in responses {
            let (response, _) = self.solve(response, &responses_at.append(status))?;
            if let Some(content) = response.get("content").and_then(Value::as_object) {
                produces.extend(content.keys().cloned());
            }
        }
        Ok(produces)
    }

    fn security_schemes(&self, root: &Value) -> Result<BTreeMap<String, Value>> {
        let mut schemes = BTreeMap::new();
        if let Some(declared) = root
            .pointer("/components/securitySchemes")
            .and_then(Value::as_object)
        {
            for (name, scheme) in declared {
                schemes.insert(name.clone(), self.contract.solve_if_needed(scheme)?.into_owned());
            }
        }
        Ok(schemes)
    }

    fn solve(&self, value: &Value, at: &Reference) -> Result<(Value, Reference)> {
        let (solved, location) = self.contract.store().solve(value, at)?;
        Ok((solved.into_owned(), location))
    }
}

/// Compiles every operation of a loaded contract.
pub fn build_contract(contract: &LoadedContract) -> Result<Contract> {
    OperationAssembler::new(contract).assemble()
}

/// Operation-level declarations replace path-level ones with the same
/// `(name, in)`; the rest keep their declaration order, path-level first.
pub fn merge_parameters(
    path_level: Vec<ParameterDeclaration>,
    operation_level: Vec<ParameterDeclaration>,
) -> Vec<ParameterDeclaration> {
    let mut merged = path_level;
    for declaration in operation_level {
        match merged
            .iter_mut()
            .find(|existing| existing.identity() == declaration.identity())
        {
            Some(existing) => *existing = declaration,
            None => merged.push(declaration),
        }
    }
    merged
}

/// `operationId`, else the first string `x-handler*` extension, else a name
/// made from the method and path.
fn operation_id(definition: &Value, method: &str, template: &str) -> String {
    if let Some(id) = definition.get("operationId").and_then(Value::as_str) {
        return id.to_string();
    }
    let handler = definition.as_object().and_then(|fields| {
        fields
            .iter()
            .filter(|(key, _)| key.starts_with("x-handler"))
            .find_map(|(_, value)| value.as_str())
    });
    if let Some(handler) = handler {
        return handler.to_string();
    }
    let slug: String = template
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect::<String>()
        .split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    let synthesized = if slug.is_empty() {
        method.to_string()
    } else {
        format!("{method}_{slug}")
    };
    warn!(
        method,
        path = template,
        operation_id = %synthesized,
        "operation has no operationId or x-handler extension, using a generated id"
    );
    synthesized
}

fn base_path(root: &Value) -> String {
    let Some(server) = root.pointer("/servers/0/url").and_then(Value::as_str) else {
        return String::new();
    };
    url::Url::parse(server)
        .or_else(|_| url::Url::parse(&format!("http://dummy{server}")))
        .map(|u| {
            let p = u.path().trim_end_matches('/');
            if p == "/" || p.is_empty() {
                String::new()
            } else {
                p.to_string()
            }
        })
        .unwrap_or_default()
}
