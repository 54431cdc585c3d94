//! # Compiled schema validators
//!
//! Parameter and body schemas are compiled with `jsonschema` (Draft 4, the
//! dialect OpenAPI 3.0 schemas are written in). Schemas may still contain
//! absolute `$ref`s into any cached contract document; those are served from
//! the [`DocumentStore`] by [`StoreRetriever`] so compilation never touches
//! the network.
//!
//! ## Cache
//!
//! Compiled validators are kept in an `RwLock<HashMap>` keyed by the absolute
//! schema pointer. Path-level parameters shared by several operations, and
//! request bodies pulled from `components`, compile once:
//!
//! - read lock fast path for hits
//! - write lock with a second lookup before inserting
//! - validators are `Arc`-wrapped so clones are cheap
//!
//! Schemas modified before compilation (multipart bodies with file parts
//! removed) bypass the cache via [`SchemaCompiler::compile_detached`].

use super::ValidationIssue;
use crate::error::{ContractError, Result};
use crate::resolver::{DocumentStore, Reference};
use jsonschema::{Draft, Retrieve, Uri, Validator};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;
use url::Url;

/// Serves `$ref` targets from the contract's document cache.
struct StoreRetriever {
    store: Arc<DocumentStore>,
}

impl Retrieve for StoreRetriever {
    fn retrieve(
        &self,
        uri: &Uri<String>,
    ) -> std::result::Result<Value, Box<dyn std::error::Error + Send + Sync>> {
        let mut url = Url::parse(uri.as_str())?;
        url.set_fragment(None);
        match self.store.get(&url) {
            Some(document) => Ok(document.as_ref().clone()),
            None => Err(format!("{url} is not part of the loaded contract").into()),
        }
    }
}

/// A compiled schema bound to the location it was declared at.
#[derive(Clone)]
pub struct SchemaValidator {
    validator: Arc<Validator>,
    at: Reference,
}

impl std::fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaValidator").field("at", &self.at).finish()
    }
}

impl SchemaValidator {
    pub fn at(&self) -> &Reference {
        &self.at
    }

    /// All violations of `instance`, empty when valid.
    pub fn violations(&self, instance: &Value) -> Vec<ValidationIssue> {
        self.validator
            .iter_errors(instance)
            .map(|err| {
                ValidationIssue::new(
                    err.instance_path.to_string(),
                    err.schema_path.to_string(),
                    err.to_string(),
                )
            })
            .collect()
    }

    pub fn is_valid(&self, instance: &Value) -> bool {
        self.validator.is_valid(instance)
    }
}

/// Compiles schemas against a contract's document store.
pub struct SchemaCompiler {
    store: Arc<DocumentStore>,
    cache: RwLock<HashMap<String, Arc<Validator>>>,
}

impl SchemaCompiler {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    /// Compile (or reuse) the validator for the schema declared at `at`.
    pub fn compile(&self, schema: &Value, at: &Reference) -> Result<SchemaValidator> {
        let key = at.to_string();
        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(validator) = cache.get(&key) {
                debug!(schema = %key, "schema cache hit");
                return Ok(SchemaValidator {
                    validator: Arc::clone(validator),
                    at: at.clone(),
                });
            }
        }

        let compiled = Arc::new(self.build(schema, at)?);
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        let validator = cache.entry(key).or_insert(compiled);
        Ok(SchemaValidator {
            validator: Arc::clone(validator),
            at: at.clone(),
        })
    }

    /// Compile a schema that differs from what is stored at `at`.
    pub fn compile_detached(&self, schema: &Value, at: &Reference) -> Result<SchemaValidator> {
        Ok(SchemaValidator {
            validator: Arc::new(self.build(schema, at)?),
            at: at.clone(),
        })
    }

    pub fn cached(&self) -> usize {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn build(&self, schema: &Value, at: &Reference) -> Result<Validator> {
        debug!(schema = %at, "compiling schema");
        jsonschema::options()
            .with_draft(Draft::Draft4)
            .with_retriever(StoreRetriever {
                store: Arc::clone(&self.store),
            })
            .build(schema)
            .map_err(|e| ContractError::unsupported(at.to_string(), format!("schema does not compile: {e}")))
    }
}
