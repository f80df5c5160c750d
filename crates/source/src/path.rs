//! Local file naming for fetched sources.
//!
//! Remote sources are cached under a directory the user configures, with a
//! name taken from the URL. URLs come from project definitions nobody here
//! controls, so the name must never be able to point outside that directory.

use crate::error::{ErrorKind, Result};
use reqwest::Url;
use std::path::{Component, Path, PathBuf};

/// Normalize a relative path, refusing anything that would leave its root.
///
/// `..` components are resolved lexically; popping past the root, NUL bytes,
/// Windows prefixes and paths that normalize to nothing are all rejected with
/// [`InvalidPath`](ErrorKind::InvalidPath). Leading slashes are dropped, so
/// an absolute path is treated as relative to the root.
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let original = path.as_ref();
    let invalid = || ErrorKind::InvalidPath(original.to_path_buf());
    let mut components = Vec::new();
    for component in original.components() {
        match component {
            Component::Normal(s) => {
                // Path::components() lets NUL through on Unix; syscalls would truncate at it.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(invalid());
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(invalid()),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(invalid());
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(invalid()),
        false => Ok(components.into_iter().collect()),
    }
}

/// Relative cache location for the source at `url`: `<host>[:<port>]/<path>[?<query>]`.
///
/// Host, port and query keep sources that differ only in those apart;
/// `file://` URLs have no host and use the path alone. Segments are used
/// as they appear in the URL, still percent-encoded. The query is appended to
/// the file name with `%` and `/` escaped, so distinct queries never share a
/// name.
pub fn cache_path(url: &Url) -> Result<PathBuf> {
    let mut relative = PathBuf::new();
    if let Some(host) = url.host_str() {
        match url.port() {
            Some(port) => relative.push(format!("{host}:{port}")),
            None => relative.push(host),
        }
    }
    for segment in url.path_segments().into_iter().flatten() {
        relative.push(segment);
    }
    if let Some(query) = url.query() {
        let Some(name) = relative.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            exn::bail!(ErrorKind::InvalidPath(relative));
        };
        let query = query.replace('%', "%25").replace('/', "%2F");
        relative.set_file_name(format!("{name}?{query}"));
    }
    validate(relative)
}
