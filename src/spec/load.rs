//! Contract loading: resolve, flatten, validate.
//!
//! [`ContractLoader::load`] either returns a fully resolved and validated
//! [`LoadedContract`] or fails as a whole. Nothing partially resolved is ever
//! handed out.

use super::meta::ContractValidator;
use crate::config::LoaderOptions;
use crate::error::{ContractError, Result};
use crate::resolver::{
    CircularSafeFlattener, DefaultFetcher, DocumentStore, Fetch, Reference, ReferenceResolver, RootLocation,
};
use serde_json::Value;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use url::Url;

/// Entry point for turning a contract URI into a [`LoadedContract`].
pub struct ContractLoader {
    options: LoaderOptions,
    fetcher: Arc<dyn Fetch>,
}

impl ContractLoader {
    /// Loader backed by [`DefaultFetcher`].
    pub fn new(options: LoaderOptions) -> Result<Self> {
        let fetcher = Arc::new(DefaultFetcher::new(options.clone())?);
        Ok(Self { options, fetcher })
    }

    /// Loader with a caller-supplied fetch capability.
    pub fn with_fetcher(options: LoaderOptions, fetcher: Arc<dyn Fetch>) -> Self {
        Self { options, fetcher }
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    /// Resolves every document reachable from `root`, flattens the root and
    /// checks it against the OpenAPI 3.0 meta-schema.
    pub async fn load(&self, root: &str) -> Result<LoadedContract> {
        let started = Instant::now();
        let resolver = ReferenceResolver::new(Arc::clone(&self.fetcher));
        let location = resolver.resolve(root).await?;
        let store = Arc::clone(resolver.store());

        let raw = store.get(&location.uri).ok_or_else(|| {
            ContractError::invalid_reference(location.uri.to_string(), "root document missing after resolution")
        })?;
        let flattened = CircularSafeFlattener::new(&store).flatten(&Reference::root(location.uri.clone()))?;
        ContractValidator::new().validate(&flattened)?;

        info!(
            root = %location.uri,
            documents = store.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "contract loaded"
        );
        Ok(LoadedContract {
            root: location,
            store,
            raw,
            flattened,
        })
    }
}

/// Result of a successful load. Immutable.
///
/// Two views of the same contract:
/// - [`raw`](Self::raw): the root document with every `$ref` rewritten to an
///   absolute URI, targets reachable through the [`DocumentStore`];
/// - [`flattened`](Self::flattened): the reference-inlined copy that passed
///   meta-schema validation.
#[derive(Debug, Clone)]
pub struct LoadedContract {
    root: RootLocation,
    store: Arc<DocumentStore>,
    raw: Arc<Value>,
    flattened: Value,
}

impl LoadedContract {
    pub fn root(&self) -> &RootLocation {
        &self.root
    }

    pub fn root_reference(&self) -> Reference {
        Reference::root(self.root.uri.clone())
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn flattened(&self) -> &Value {
        &self.flattened
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    /// Copy of the cached value a reference designates.
    pub fn get_cached(&self, reference: &Reference) -> Result<Value> {
        self.store.get_cached(reference)
    }

    /// Follows `value` to its target when it is a `$ref` node, else borrows it.
    pub fn solve_if_needed<'v>(&self, value: &'v Value) -> Result<Cow<'v, Value>> {
        self.store.dereference(value)
    }

    /// Every document the contract is made of, sorted.
    pub fn documents(&self) -> Vec<Url> {
        self.store.uris()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use serde_json::json;
    use std::collections::HashMap;

    struct MapFetcher(HashMap<String, Value>);

    impl Fetch for MapFetcher {
        fn fetch<'a>(&'a self, uri: &'a Url) -> BoxFuture<'a, Result<Vec<u8>>> {
            async move {
                self.0
                    .get(uri.as_str())
                    .map(|doc| doc.to_string().into_bytes())
                    .ok_or_else(|| ContractError::fetch(uri, "not found"))
            }
            .boxed()
        }
    }

    fn loader(docs: &[(&str, Value)]) -> ContractLoader {
        let docs = docs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        ContractLoader::with_fetcher(LoaderOptions::default(), Arc::new(MapFetcher(docs)))
    }

    fn contract(schema_ref: &str) -> Value {
        json!({
            "openapi": "3.0.0",
            "info": {"title": "t", "version": "1"},
            "paths": {"/pets": {"post": {
                "operationId": "addPet",
                "requestBody": {"content": {"application/json": {"schema": {"$ref": schema_ref}}}},
                "responses": {"201": {"description": "created"}}
            }}}
        })
    }

    #[tokio::test]
    async fn test_views_of_a_two_document_contract() {
        let loader = loader(&[
            ("file:///c/api.json", contract("pet.json#/Pet")),
            ("file:///c/pet.json", json!({"Pet": {"type": "object", "properties": {"name": {"type": "string"}}}})),
        ]);
        let loaded = loader.load("file:///c/api.json").await.unwrap();

        assert_eq!(loaded.documents().len(), 2);
        let raw_ref = &loaded.raw()["paths"]["/pets"]["post"]["requestBody"]["content"]["application/json"]["schema"];
        assert_eq!(raw_ref["$ref"], json!("file:///c/pet.json#/Pet"));
        assert_eq!(loaded.solve_if_needed(raw_ref).unwrap()["type"], json!("object"));

        let flat = &loaded.flattened()["paths"]["/pets"]["post"]["requestBody"]["content"]["application/json"]["schema"];
        assert_eq!(flat["properties"]["name"]["type"], json!("string"));
        assert_eq!(flat["x-ref"], json!("file:///c/pet.json#/Pet"));
    }

    #[tokio::test]
    async fn test_missing_document_fails_the_load() {
        let loader = loader(&[("file:///c/api.json", contract("missing.json#/Pet"))]);
        let err = loader.load("file:///c/api.json").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fetch);
    }

    #[tokio::test]
    async fn test_dangling_pointer_fails_the_load() {
        let loader = loader(&[
            ("file:///c/api.json", contract("pet.json#/Nope")),
            ("file:///c/pet.json", json!({"Pet": {}})),
        ]);
        let err = loader.load("file:///c/api.json").await.unwrap_err();
        assert!(matches!(err, ContractError::InvalidReference { .. }));
    }
}
