//! Document retrieval.
//!
//! [`Fetch`] is the seam between the resolver and the outside world. The
//! default implementation reads local files with `tokio::fs`, archive members
//! with `tar`, and remote documents with `reqwest`. Tests substitute their own.

use super::uri::{classify, split_archive, SourceKind};
use crate::config::LoaderOptions;
use crate::error::{ContractError, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde_json::Value;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;
use url::Url;

const ACCEPT_DOCUMENTS: &str = "application/json, application/yaml, application/x-yaml";

/// Retrieves the raw bytes behind an absolute document URI.
pub trait Fetch: Send + Sync {
    fn fetch<'a>(&'a self, uri: &'a Url) -> BoxFuture<'a, Result<Vec<u8>>>;
}

/// Decodes a fetched document: JSON first, YAML as fallback.
pub fn decode_document(uri: &Url, bytes: &[u8]) -> Result<Value> {
    let json_err = match serde_json::from_slice::<Value>(bytes) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };
    serde_yaml::from_slice::<Value>(bytes).map_err(|yaml_err| ContractError::Decode {
        uri: uri.to_string(),
        json: json_err.to_string(),
        yaml: yaml_err.to_string(),
    })
}

/// Local files, `tar:` archive members and `http(s)` documents.
pub struct DefaultFetcher {
    client: reqwest::Client,
    options: LoaderOptions,
    permits: Arc<Semaphore>,
}

impl DefaultFetcher {
    pub fn new(options: LoaderOptions) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = options.http_timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ContractError::Config(format!("cannot build HTTP client: {e}")))?;
        let permits = Arc::new(Semaphore::new(options.max_concurrent_fetches.max(1)));
        Ok(Self {
            client,
            options,
            permits,
        })
    }

    async fn fetch_remote(&self, uri: &Url) -> Result<Vec<u8>> {
        let mut target = uri.clone();
        target.set_fragment(None);
        if !self.options.auth_query_params.is_empty() {
            let mut pairs = target.query_pairs_mut();
            for (name, value) in &self.options.auth_query_params {
                pairs.append_pair(name, value);
            }
        }

        let mut request = self.client.get(target).header(ACCEPT, ACCEPT_DOCUMENTS);
        for (name, value) in &self.options.auth_headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|e| ContractError::fetch(uri, e))?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(ContractError::fetch(
                uri,
                format!(
                    "wrong status code {} {} received while resolving remote ref",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown")
                ),
            ));
        }
        let body = response.bytes().await.map_err(|e| ContractError::fetch(uri, e))?;
        Ok(body.to_vec())
    }

    async fn fetch_local(&self, uri: &Url) -> Result<Vec<u8>> {
        let path = uri
            .to_file_path()
            .map_err(|()| ContractError::fetch(uri, "not a local file URI"))?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| ContractError::fetch(uri, format!("{}: {e}", path.display())))
    }

    async fn fetch_archive_member(&self, uri: &Url) -> Result<Vec<u8>> {
        let (archive, member) = split_archive(uri)?;
        let archive_path = archive
            .to_file_path()
            .map_err(|()| ContractError::fetch(uri, "archive must be a local file"))?;
        let owned = uri.clone();
        tokio::task::spawn_blocking(move || read_archive_member(&owned, archive_path, &member))
            .await
            .map_err(|e| ContractError::fetch(uri, e))?
    }
}

fn read_archive_member(uri: &Url, archive_path: PathBuf, member: &str) -> Result<Vec<u8>> {
    let file = std::fs::File::open(&archive_path)
        .map_err(|e| ContractError::fetch(uri, format!("{}: {e}", archive_path.display())))?;
    let wanted = member.trim_start_matches('/');
    let mut archive = tar::Archive::new(file);
    for entry in archive.entries().map_err(|e| ContractError::fetch(uri, e))? {
        let mut entry = entry.map_err(|e| ContractError::fetch(uri, e))?;
        let path = entry.path().map_err(|e| ContractError::fetch(uri, e))?;
        let path = path.to_string_lossy();
        if path.trim_start_matches("./") == wanted {
            let mut bytes = Vec::new();
            entry
                .read_to_end(&mut bytes)
                .map_err(|e| ContractError::fetch(uri, e))?;
            return Ok(bytes);
        }
    }
    Err(ContractError::fetch(uri, format!("{wanted} not found in archive")))
}

impl Fetch for DefaultFetcher {
    fn fetch<'a>(&'a self, uri: &'a Url) -> BoxFuture<'a, Result<Vec<u8>>> {
        async move {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|e| ContractError::fetch(uri, e))?;
            let kind = classify(uri);
            debug!(uri = %uri, ?kind, "fetching document");
            match kind {
                SourceKind::Remote => self.fetch_remote(uri).await,
                SourceKind::Local => self.fetch_local(uri).await,
                SourceKind::Archive => self.fetch_archive_member(uri).await,
            }
        }
        .boxed()
    }
}
