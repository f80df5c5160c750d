//! Getting a project's basemap source files onto local disk.

use crate::error::{ErrorKind, Result};
use crate::fetcher::Fetcher;
use crate::models::{Project, SourceSelection};
use crate::path::cache_path;
use exn::ResultExt;
use reqwest::Url;
use std::path::PathBuf;
use tracing::instrument;

/// Downloads the basemap source files a project declares.
///
/// Every call fetches again and overwrites the local copy: there is no
/// freshness check, so the files on disk always reflect the last request.
#[derive(Debug, Clone)]
pub struct BaseMapSourceFetcher {
    fetcher: Fetcher,
    cache_dir: PathBuf,
    selection: SourceSelection,
}
impl BaseMapSourceFetcher {
    pub fn new(fetcher: Fetcher, cache_dir: impl Into<PathBuf>, selection: SourceSelection) -> Self {
        Self { fetcher, cache_dir: cache_dir.into(), selection }
    }

    /// Fetch the project's selected sources, returning their local paths in
    /// declaration order.
    ///
    /// Fails with [`NoBaseMapSource`](ErrorKind::NoBaseMapSource) if the
    /// project declares none. Stops at the first source that can't be
    /// fetched.
    #[instrument(skip_all, fields(project = %project.id, selection = %self.selection))]
    pub async fn fetch(&self, project: &Project) -> Result<Vec<PathBuf>> {
        let sources = self.selection.select(&project.basemap_sources);
        if sources.is_empty() {
            exn::bail!(ErrorKind::NoBaseMapSource);
        }
        let mut files = Vec::with_capacity(sources.len());
        for source in sources {
            let url = Url::parse(&source.url).or_raise(|| ErrorKind::Fetch(source.url.clone()))?;
            let dest = self.cache_dir.join(cache_path(&url)?);
            let bytes = self.fetcher.fetch_to(&source.url, &dest).await?;
            tracing::info!(url = %source.url, path = %dest.display(), bytes, "fetched basemap source");
            files.push(dest);
        }
        Ok(files)
    }
}
