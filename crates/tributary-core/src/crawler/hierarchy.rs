//! URL hierarchy decomposition.
//!
//! Pure functions turning a page URL into its chain of logical ancestor
//! folders (every strict prefix of its path segments) with deterministic
//! identifiers, so re-crawls and concurrent workers converge on the same
//! folder graph without coordination.

use sha2::{Digest, Sha256};
use url::Url;

/// Node kind folded into a stable identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Folder,
    File,
}

impl NodeKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Folder => "folder",
            Self::File => "file",
        }
    }
}

/// Canonical form used for equality and deduplication: http(s) only, query
/// and fragment dropped, no trailing slash.
pub fn normalize(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.set_query(None);
    url.set_fragment(None);
    Some(url.as_str().trim_end_matches('/').to_string())
}

/// Every strict path prefix of `url`, ordered root first. Empty when the URL
/// is already top-level.
pub fn ancestor_folders(url: &str) -> Vec<String> {
    let Some(normalized) = normalize(url) else {
        return Vec::new();
    };
    let Ok(parsed) = Url::parse(&normalized) else {
        return Vec::new();
    };
    let origin = parsed.origin().ascii_serialization();
    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();
    if segments.is_empty() {
        return Vec::new();
    }

    let mut ancestors = vec![origin.clone()];
    let mut prefix = origin;
    for segment in &segments[..segments.len() - 1] {
        prefix = format!("{prefix}/{segment}");
        ancestors.push(prefix.clone());
    }
    ancestors
}

/// The immediate containing folder, or `None` for a top-level URL.
pub fn parent_folder(url: &str) -> Option<String> {
    ancestor_folders(url).pop()
}

/// Whether the URL has no containing folder.
pub fn is_top_level(url: &str) -> bool {
    ancestor_folders(url).is_empty()
}

/// Deterministic identifier for `(url, kind)`.
pub fn stable_id(url: &str, kind: NodeKind) -> String {
    let canonical = normalize(url).unwrap_or_else(|| url.to_string());
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hasher.update(b"\0");
    hasher.update(kind.as_str().as_bytes());
    format!("{}-{:x}", kind.as_str(), hasher.finalize())
}
