//! Multi-document `$ref` resolution.
//!
//! [`ReferenceResolver::resolve`] fetches the root document, rewrites every
//! `$ref` it contains into absolute form, and recursively fetches every
//! document those references name. Sibling documents are fetched
//! concurrently. A URI is fetched at most once: the [`DocumentStore`] claim
//! table doubles as the visited set, which is what makes `A → B → A` chains
//! terminate.

mod fetch;
mod flatten;
mod store;
mod uri;

pub use fetch::{decode_document, DefaultFetcher, Fetch};
pub use flatten::{CircularSafeFlattener, CIRCULAR_MARKER, ORIGIN_MARKER};
pub use store::{DocumentStore, Reference};
pub use uri::{classify, RootLocation, SourceKind};

use crate::error::{ContractError, Result};
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info};
use url::Url;

pub struct ReferenceResolver {
    fetcher: Arc<dyn Fetch>,
    store: Arc<DocumentStore>,
}

impl ReferenceResolver {
    pub fn new(fetcher: Arc<dyn Fetch>) -> Self {
        Self::with_store(fetcher, Arc::new(DocumentStore::new()))
    }

    pub fn with_store(fetcher: Arc<dyn Fetch>, store: Arc<DocumentStore>) -> Self {
        Self { fetcher, store }
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    /// Resolves the whole graph reachable from `root`.
    ///
    /// Completes once every transitively referenced document is cached. The
    /// first failing fetch aborts the resolution; documents fetched so far stay
    /// in the store but the caller gets the error.
    pub async fn resolve(&self, root: &str) -> Result<RootLocation> {
        let location = RootLocation::parse(root)?;
        info!(root = %location.uri, "resolving contract");
        self.store.claim(&location.uri);
        if let Err(err) = self.load(location.uri.clone(), &location).await {
            error!(root = %location.uri, error = %err, "contract resolution failed");
            return Err(err);
        }
        info!(root = %location.uri, documents = self.store.len(), "contract resolved");
        Ok(location)
    }

    fn load<'a>(&'a self, uri: Url, root: &'a RootLocation) -> BoxFuture<'a, Result<()>> {
        async move {
            let bytes = self.fetcher.fetch(&uri).await?;
            let mut document = decode_document(&uri, &bytes)?;
            let discovered = rewrite_references(&mut document, &uri, root)?;
            self.store.insert(uri.clone(), document);

            let pending: Vec<Url> = discovered
                .into_iter()
                .filter(|next| self.store.claim(next))
                .collect();
            debug!(uri = %uri, new_documents = pending.len(), "document walked");
            try_join_all(pending.into_iter().map(|next| self.load(next, root))).await?;
            Ok(())
        }
        .boxed()
    }
}

/// Rewrites every `$ref` under `value` to absolute form and returns the set of
/// documents they point at. `$ref` objects are not descended into.
pub fn rewrite_references(
    value: &mut Value,
    scope: &Url,
    root: &RootLocation,
) -> Result<BTreeSet<Url>> {
    let mut documents = BTreeSet::new();
    rewrite_walk(value, scope, root, &mut documents)?;
    Ok(documents)
}

fn rewrite_walk(
    value: &mut Value,
    scope: &Url,
    root: &RootLocation,
    documents: &mut BTreeSet<Url>,
) -> Result<()> {
    match value {
        Value::Object(map) => {
            if let Some(reference) = map.get_mut("$ref") {
                let raw = reference.as_str().ok_or_else(|| {
                    ContractError::invalid_reference(reference.to_string(), "$ref must be a string")
                })?;
                let absolute = root.absolutize(raw, scope)?;
                let mut document = absolute.clone();
                document.set_fragment(None);
                *reference = Value::String(absolute.to_string());
                documents.insert(document);
                return Ok(());
            }
            for child in map.values_mut() {
                rewrite_walk(child, scope, root, documents)?;
            }
        }
        Value::Array(items) => {
            for child in items {
                rewrite_walk(child, scope, root, documents)?;
            }
        }
        _ => {}
    }
    Ok(())
}
