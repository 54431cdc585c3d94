//! Document cache shared by every resolver task.
//!
//! Documents are keyed by their absolute URI with the fragment stripped. A
//! document is inserted exactly once, by the task that claimed its URI, and is
//! immutable afterwards. Cross-document links are plain [`Reference`] values,
//! never pointers into another tree.

use crate::error::{ContractError, Result};
use dashmap::DashMap;
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use url::Url;

const MAX_REFERENCE_HOPS: usize = 64;

/// `{absolute document URI, JSON pointer}` pair.
///
/// The pointer is kept decoded (`/paths/~1pets/get`); [`Reference::to_string`]
/// percent-encodes it back into a fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    document: Url,
    pointer: String,
}

impl Reference {
    pub fn new(document: Url, pointer: impl Into<String>) -> Self {
        let mut document = document;
        document.set_fragment(None);
        Reference {
            document,
            pointer: pointer.into(),
        }
    }

    /// Reference to the whole document.
    pub fn root(document: Url) -> Self {
        Reference::new(document, "")
    }

    /// Parses an absolute `$ref` value such as `file:///api.yaml#/components/schemas/Pet`.
    pub fn parse(absolute: &str) -> Result<Self> {
        let url = Url::parse(absolute)
            .map_err(|e| ContractError::invalid_reference(absolute, e.to_string()))?;
        let pointer = match url.fragment() {
            None | Some("") => String::new(),
            Some(fragment) => {
                let decoded = urlencoding::decode(fragment)
                    .map_err(|e| ContractError::invalid_reference(absolute, e.to_string()))?;
                if !decoded.starts_with('/') {
                    return Err(ContractError::invalid_reference(
                        absolute,
                        "only JSON pointer fragments are supported",
                    ));
                }
                decoded.into_owned()
            }
        };
        Ok(Reference::new(url, pointer))
    }

    pub fn document(&self) -> &Url {
        &self.document
    }

    pub fn pointer(&self) -> &str {
        &self.pointer
    }

    /// Child reference one token deeper.
    #[must_use]
    pub fn append(&self, token: &str) -> Reference {
        let escaped = token.replace('~', "~0").replace('/', "~1");
        Reference {
            document: self.document.clone(),
            pointer: format!("{}/{}", self.pointer, escaped),
        }
    }

    /// `true` when `self` designates `other` or one of its containers.
    pub fn is_ancestor_or_equal(&self, other: &Reference) -> bool {
        if self.document != other.document {
            return false;
        }
        other.pointer == self.pointer
            || (other.pointer.starts_with(&self.pointer)
                && other.pointer.as_bytes().get(self.pointer.len()) == Some(&b'/'))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.pointer.is_empty() {
            return write!(f, "{}", self.document);
        }
        let encoded: Vec<Cow<'_, str>> = self
            .pointer
            .split('/')
            .map(urlencoding::encode)
            .collect();
        write!(f, "{}#{}", self.document, encoded.join("/"))
    }
}

/// Cache of parsed documents plus the in-flight claim table.
#[derive(Debug, Default)]
pub struct DocumentStore {
    documents: DashMap<Url, Arc<Value>>,
    claims: DashMap<Url, ()>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claims `uri` for fetching. Only the first caller gets `true`;
    /// every later discovery of the same URI (diamond or circular) gets `false`.
    pub fn claim(&self, uri: &Url) -> bool {
        match self.claims.entry(uri.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                debug!(uri = %uri, "document already claimed");
                false
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
                true
            }
        }
    }

    pub fn insert(&self, uri: Url, document: Value) -> Arc<Value> {
        let document = Arc::new(document);
        self.documents.insert(uri, Arc::clone(&document));
        document
    }

    pub fn get(&self, uri: &Url) -> Option<Arc<Value>> {
        self.documents.get(uri).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, uri: &Url) -> bool {
        self.documents.contains_key(uri)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Cached document URIs, sorted.
    pub fn uris(&self) -> Vec<Url> {
        let mut uris: Vec<Url> = self.documents.iter().map(|e| e.key().clone()).collect();
        uris.sort();
        uris
    }

    /// Runs `f` against the value a reference designates, without cloning it.
    pub fn with_target<T>(&self, reference: &Reference, f: impl FnOnce(&Value) -> T) -> Result<T> {
        let document = self.get(reference.document()).ok_or_else(|| {
            ContractError::invalid_reference(reference.to_string(), "document is not cached")
        })?;
        let target = document.pointer(reference.pointer()).ok_or_else(|| {
            ContractError::invalid_reference(reference.to_string(), "pointer does not resolve")
        })?;
        Ok(f(target))
    }

    /// Deep copy of the value a reference designates.
    pub fn get_cached(&self, reference: &Reference) -> Result<Value> {
        self.with_target(reference, Value::clone)
    }

    /// [`solve`](Self::solve) without tracking the location.
    pub fn dereference<'v>(&self, value: &'v Value) -> Result<Cow<'v, Value>> {
        let mut current = Cow::Borrowed(value);
        let mut hops = 0usize;
        while let Some(raw) = current.get("$ref").and_then(Value::as_str) {
            hops += 1;
            if hops > MAX_REFERENCE_HOPS {
                return Err(ContractError::invalid_reference(raw, "reference chain loops"));
            }
            let resolved = self.get_cached(&Reference::parse(raw)?)?;
            current = Cow::Owned(resolved);
        }
        Ok(current)
    }

    /// Follows `$ref` nodes until a concrete value is reached. Returns the value
    /// together with the location it was found at.
    pub fn solve<'v>(&self, value: &'v Value, at: &Reference) -> Result<(Cow<'v, Value>, Reference)> {
        let mut current = Cow::Borrowed(value);
        let mut location = at.clone();
        let mut seen: Vec<Reference> = Vec::new();
        while let Some(raw) = current.get("$ref").and_then(Value::as_str) {
            let target = Reference::parse(raw)?;
            if seen.contains(&target) {
                return Err(ContractError::invalid_reference(raw, "reference chain loops"));
            }
            let resolved = self.get_cached(&target)?;
            seen.push(target.clone());
            location = target;
            current = Cow::Owned(resolved);
        }
        Ok((current, location))
    }
}
