//! URI canonicalisation and scope computation.
//!
//! Every document is identified by an absolute URI without fragment. Local
//! paths become `file://` URLs, archive members use
//! `tar:file:///abs/bundle.tar!/member/path.yaml`, and remote documents keep
//! their `http(s)` URL.

use crate::error::{ContractError, Result};
use std::path::{Path, PathBuf};
use url::Url;

pub const ARCHIVE_SCHEME: &str = "tar";
const ARCHIVE_SEPARATOR: char = '!';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Remote,
    Local,
    Archive,
}

pub fn classify(uri: &Url) -> SourceKind {
    match uri.scheme() {
        "http" | "https" => SourceKind::Remote,
        ARCHIVE_SCHEME => SourceKind::Archive,
        _ => SourceKind::Local,
    }
}

/// Splits `tar:file:///b.tar!/dir/doc.yaml` into the archive URL and the member path.
pub fn split_archive(uri: &Url) -> Result<(Url, String)> {
    let body = uri.as_str().strip_prefix("tar:").unwrap_or(uri.as_str());
    let body = body.split('#').next().unwrap_or(body);
    let (archive, member) = body
        .split_once(ARCHIVE_SEPARATOR)
        .ok_or_else(|| ContractError::fetch(uri, "archive URI has no '!' member separator"))?;
    let archive = Url::parse(archive).map_err(|e| ContractError::fetch(uri, e))?;
    let member = urlencoding::decode(member)
        .map_err(|e| ContractError::fetch(uri, e))?
        .into_owned();
    Ok((archive, member))
}

fn archive_uri(archive: &Url, member: &str) -> Result<Url> {
    let raw = format!("{ARCHIVE_SCHEME}:{archive}{ARCHIVE_SEPARATOR}{member}");
    Url::parse(&raw).map_err(|e| ContractError::invalid_reference(raw, e.to_string()))
}

/// Resolves `relative` against `base`, which may be an archive URI.
pub fn join(base: &Url, relative: &str) -> Result<Url> {
    let joined = if classify(base) == SourceKind::Archive {
        let (archive, member) = split_archive(base)?;
        let member_base = Url::parse("member:///")
            .and_then(|root| root.join(&member))
            .map_err(|e| ContractError::invalid_reference(base.as_str(), e.to_string()))?;
        let target = member_base
            .join(relative)
            .map_err(|e| ContractError::invalid_reference(relative, e.to_string()))?;
        let mut uri = archive_uri(&archive, target.path())?;
        uri.set_fragment(target.fragment());
        uri
    } else {
        base.join(relative)
            .map_err(|e| ContractError::invalid_reference(relative, e.to_string()))?
    };
    Ok(joined)
}

/// The contract entry point, canonicalised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootLocation {
    /// Absolute URI of the root document, no fragment
    pub uri: Url,
    /// What the root was written relative to (the working directory for a
    /// relative local path, otherwise the root itself)
    pub base: Url,
    /// Directory portion of the root as the caller wrote it, with trailing `/`.
    /// Empty when the root sits directly in `base`.
    pub directory_prefix: String,
}

impl RootLocation {
    pub fn parse(input: &str) -> Result<Self> {
        let without_fragment = input.split('#').next().unwrap_or(input);

        if let Some(uri) = parse_absolute(without_fragment) {
            return Ok(RootLocation {
                base: uri.clone(),
                directory_prefix: String::new(),
                uri,
            });
        }

        let path = Path::new(without_fragment);
        let (base, written) = if path.is_absolute() {
            (
                Url::parse("file:///").map_err(|e| ContractError::Config(e.to_string()))?,
                without_fragment.to_string(),
            )
        } else {
            let cwd = std::env::current_dir()?;
            (directory_url(&cwd)?, without_fragment.replace('\\', "/"))
        };
        let uri = file_url(&base, &written)?;
        let directory_prefix = match written.rfind('/') {
            Some(idx) if !path.is_absolute() => written[..=idx].to_string(),
            _ => String::new(),
        };
        Ok(RootLocation {
            uri,
            base,
            directory_prefix,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        Self::parse(&path.to_string_lossy())
    }

    /// Computes the absolute form of a `$ref` found while walking `scope`.
    ///
    /// 1. an absolute reference is used as-is;
    /// 2. a fragment-only reference keeps `scope`;
    /// 3. a reference whose path already names `scope` keeps `scope`;
    /// 4. a path starting with the root's directory prefix resolves against
    ///    the root's base;
    /// 5. anything else resolves against `scope`.
    ///
    /// The original fragment is carried over unchanged.
    pub fn absolutize(&self, reference: &str, scope: &Url) -> Result<Url> {
        if let Some(absolute) = parse_absolute(reference) {
            return Ok(absolute);
        }
        let (path, fragment) = match reference.split_once('#') {
            Some((path, fragment)) => (path, Some(fragment)),
            None => (reference, None),
        };
        if path.is_empty() {
            let mut uri = scope.clone();
            uri.set_fragment(fragment);
            return Ok(uri);
        }

        let mut against_scope = join(scope, path)?;
        against_scope.set_fragment(None);
        let mut resolved = if &against_scope == scope {
            scope.clone()
        } else if !self.directory_prefix.is_empty() && path.starts_with(&self.directory_prefix) {
            join(&self.base, path)?
        } else {
            against_scope
        };
        resolved.set_fragment(fragment);
        Ok(resolved)
    }
}

/// `Some` for strings that already carry a scheme. Single-letter schemes are
/// treated as Windows drive letters.
fn parse_absolute(raw: &str) -> Option<Url> {
    let url = Url::parse(raw).ok()?;
    if url.scheme().len() < 2 {
        return None;
    }
    Some(url)
}

fn directory_url(dir: &Path) -> Result<Url> {
    Url::from_directory_path(dir).map_err(|()| {
        ContractError::Config(format!("{} is not an absolute directory", dir.display()))
    })
}

fn file_url(base: &Url, written: &str) -> Result<Url> {
    let joined = base
        .join(written)
        .map_err(|e| ContractError::Config(format!("invalid contract path {written}: {e}")))?;
    // Round-trip through the filesystem form so percent-encoding matches
    // what `Url::from_file_path` produces for the same file.
    let path: PathBuf = joined
        .to_file_path()
        .map_err(|()| ContractError::Config(format!("invalid contract path {written}")))?;
    Url::from_file_path(&path)
        .map_err(|()| ContractError::Config(format!("invalid contract path {}", path.display())))
}
