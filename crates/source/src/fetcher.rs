//! Fetching a URL into memory or onto disk.
//!
//! Used both for basemap source files and for the tiles themselves.

use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use reqwest::Url;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, trace, warn};

const DEFAULT_USER_AGENT: &str = concat!("tilesync/", env!("CARGO_PKG_VERSION"));

/// Settings for the HTTP client behind a [`Fetcher`].
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Total time allowed for one request, body included.
    pub timeout: Duration,
    pub user_agent: String,
}
impl Default for FetchOptions {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(30), user_agent: DEFAULT_USER_AGENT.to_string() }
    }
}

/// Fetches `http`, `https` and `file` URLs.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
}
impl Fetcher {
    pub fn new(options: &FetchOptions) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .user_agent(options.user_agent.as_str())
            .build()
            .or_raise(|| ErrorKind::Client)?;
        Ok(Self { client })
    }

    /// Fetch the whole body of `url`.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let parsed = Url::parse(url).or_raise(|| ErrorKind::Fetch(url.to_string()))?;
        match parsed.scheme() {
            "http" | "https" => self.fetch_http(parsed).await,
            "file" => {
                let path = parsed.to_file_path().ok().ok_or_raise(|| ErrorKind::Fetch(url.to_string()))?;
                trace!(path = %path.display(), "reading local source");
                fs::read(&path).await.or_raise(|| ErrorKind::Io(path))
            },
            scheme => {
                warn!(url, scheme, "unsupported URL scheme");
                exn::bail!(ErrorKind::Fetch(url.to_string()))
            },
        }
    }

    async fn fetch_http(&self, url: Url) -> Result<Vec<u8>> {
        let failed = || ErrorKind::Fetch(url.to_string());
        trace!(%url, "HTTP GET request starting");
        let response = match self.client.get(url.clone()).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(
                    %url,
                    error = %err,
                    is_connect = err.is_connect(),
                    is_timeout = err.is_timeout(),
                    "HTTP request failed"
                );
                return Err(err).or_raise(failed);
            },
        };
        let status = response.status();
        debug!(%url, status = status.as_u16(), "HTTP response received");
        if !status.is_success() {
            exn::bail!(failed());
        }
        let body = response.bytes().await.or_raise(failed)?;
        trace!(%url, bytes = body.len(), "HTTP response body read");
        Ok(body.to_vec())
    }

    /// Fetch `url` and store it at `dest`, replacing whatever is there.
    ///
    /// The body is written to a temporary sibling first and renamed into
    /// place, so `dest` never holds a partial file. Returns the number of
    /// bytes written.
    pub async fn fetch_to(&self, url: &str, dest: &Path) -> Result<u64> {
        let body = self.fetch(url).await?;
        write_atomically(dest, &body).await?;
        Ok(body.len() as u64)
    }
}

async fn write_atomically(dest: &Path, contents: &[u8]) -> Result<()> {
    let invalid = || ErrorKind::InvalidPath(dest.to_path_buf());
    let parent = dest.parent().ok_or_raise(invalid)?;
    let name = dest.file_name().ok_or_raise(invalid)?;
    fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Io(parent.to_path_buf()))?;

    let mut temp_name = std::ffi::OsString::from(".");
    temp_name.push(name);
    temp_name.push(format!(".{}.part", uuid::Uuid::new_v4().simple()));
    let temp: PathBuf = parent.join(temp_name);

    fs::write(&temp, contents).await.or_raise(|| ErrorKind::Io(temp.clone()))?;
    if let Err(err) = fs::rename(&temp, dest).await {
        _ = fs::remove_file(&temp).await;
        return Err(err).or_raise(|| ErrorKind::Io(dest.to_path_buf()));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_server {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve exactly one HTTP request with the given status line and body.
    pub(crate) async fn serve_once(status: &'static str, body: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            _ = socket.read(&mut request).await.unwrap();
            let head = format!("HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n", body.len());
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(body).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{addr}/basemap.geojson")
    }
}

#[cfg(test)]
mod tests {
    use super::test_server::serve_once;
    use super::*;
    use rstest::rstest;

    fn fetcher() -> Fetcher {
        Fetcher::new(&FetchOptions::default()).unwrap()
    }

    fn file_url(path: &Path) -> String {
        Url::from_file_path(path).unwrap().to_string()
    }

    #[tokio::test]
    async fn test_fetch_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("source.geojson");
        std::fs::write(&path, b"{}").unwrap();
        assert_eq!(fetcher().fetch(&file_url(&path)).await.unwrap(), b"{}");
    }

    #[tokio::test]
    async fn test_fetch_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = fetcher().fetch(&file_url(&dir.path().join("missing"))).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Io(_)));
    }

    #[rstest]
    #[case::not_a_url("not a url")]
    #[case::relative("/srv/tiles.geojson")]
    #[case::unsupported_scheme("ftp://maps.example.com/tiles.geojson")]
    #[tokio::test]
    async fn test_fetch_rejects_url(#[case] url: &str) {
        let err = fetcher().fetch(url).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Fetch(u) if u == url));
    }

    #[tokio::test]
    async fn test_fetch_http() {
        let url = serve_once("200 OK", b"tile-bytes").await;
        assert_eq!(fetcher().fetch(&url).await.unwrap(), b"tile-bytes");
    }

    #[tokio::test]
    async fn test_fetch_http_error_status() {
        let url = serve_once("404 Not Found", b"").await;
        let err = fetcher().fetch(&url).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Fetch(_)));
    }

    #[tokio::test]
    async fn test_fetch_to_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.geojson");
        let dest = dir.path().join("cache/nested/copy.geojson");

        std::fs::write(&source, b"first").unwrap();
        assert_eq!(fetcher().fetch_to(&file_url(&source), &dest).await.unwrap(), 5);
        assert_eq!(std::fs::read(&dest).unwrap(), b"first");

        std::fs::write(&source, b"second").unwrap();
        fetcher().fetch_to(&file_url(&source), &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"second");

        // No temporary files left behind.
        let entries = std::fs::read_dir(dest.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }
}
