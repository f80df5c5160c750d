//! Downloading the tiles the store says are still needed.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::path::PathBuf;
use tilesync_source::Fetcher;
use tilesync_source::path::validate as validate_path;
use tilesync_store::{Repository, Tile, TileState};
use tracing::instrument;

/// Used when a worker is built with a concurrency of zero.
const MIN_CONCURRENCY: usize = 1;

/// What happened to one tile during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Downloaded,
    Failed,
    /// Someone else got to the tile first.
    Skipped,
}

/// Totals for one [`TileDownloadWorker::run`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub downloaded: usize,
    pub failed: usize,
    pub skipped: usize,
}
impl RunSummary {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Downloaded => self.downloaded += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Skipped => self.skipped += 1,
        }
    }

    /// Number of tiles the run looked at.
    pub fn total(&self) -> usize {
        self.downloaded + self.failed + self.skipped
    }
}

/// Drives tiles from `PENDING` to `DOWNLOADED` (or `FAILED`).
///
/// All state lives in the store, so a worker can be stopped at any point and
/// a later run picks up where it left off: tiles still `IN_PROGRESS` from an
/// interrupted run are downloaded again.
#[derive(Debug, Clone)]
pub struct TileDownloadWorker {
    repo: Repository,
    fetcher: Fetcher,
    tiles_dir: PathBuf,
    concurrency: usize,
}
impl TileDownloadWorker {
    pub fn new(repo: Repository, fetcher: Fetcher, tiles_dir: impl Into<PathBuf>, concurrency: usize) -> Self {
        Self { repo, fetcher, tiles_dir: tiles_dir.into(), concurrency: concurrency.max(MIN_CONCURRENCY) }
    }

    /// Download every tile that is pending or was left in progress.
    ///
    /// Per-tile problems are logged and counted; only failing to list the
    /// work in the first place is an error.
    #[instrument("downloading tiles", skip(self), fields(concurrency = self.concurrency))]
    pub async fn run(&self) -> Result<RunSummary> {
        let tiles = self
            .repo
            .tiles_in_states(&[TileState::Pending, TileState::InProgress])
            .await
            .or_raise(|| ErrorKind::Store)?;
        tracing::info!(tiles = tiles.len(), "tile download run started");

        let mut summary = RunSummary::default();
        let mut queue = tiles.into_iter().map(|tile| self.process(tile));
        let mut processing = FuturesUnordered::new();
        processing.extend(queue.by_ref().take(self.concurrency));
        while let Some(result) = processing.next().await {
            match result {
                Ok(outcome) => summary.record(outcome),
                Err(err) => {
                    tracing::warn!(error = ?err, "tile state could not be updated");
                    summary.record(Outcome::Failed);
                },
            }
            if let Some(next) = queue.next() {
                processing.push(next);
            }
        }

        tracing::info!(
            downloaded = summary.downloaded,
            failed = summary.failed,
            skipped = summary.skipped,
            "tile download run finished"
        );
        Ok(summary)
    }

    /// Put every `FAILED` tile back to `PENDING` for the next run.
    ///
    /// Returns how many tiles were reset.
    pub async fn retry_failed(&self) -> Result<usize> {
        let failed = self.repo.tiles_in_states(&[TileState::Failed]).await.or_raise(|| ErrorKind::Store)?;
        let mut reset = 0;
        for tile in failed {
            if self
                .repo
                .compare_and_set_tile_state(tile.coord, TileState::Failed, TileState::Pending)
                .await
                .or_raise(|| ErrorKind::Store)?
            {
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn process(&self, tile: Tile) -> Result<Outcome> {
        // An IN_PROGRESS tile has no claim to take: another worker may be
        // fetching it right now and both will download it. Whichever finishes
        // first wins the final compare-and-set; the other counts as skipped.
        if tile.state == TileState::Pending
            && !self.transition(&tile, TileState::Pending, TileState::InProgress).await?
        {
            return Ok(Outcome::Skipped);
        }
        let outcome = match self.download(&tile).await {
            Ok(bytes) => {
                tracing::debug!(tile = %tile.coord, bytes, "tile downloaded");
                TileState::Downloaded
            },
            Err(err) => {
                tracing::warn!(tile = %tile.coord, url = %tile.url, error = ?err, "tile download failed");
                TileState::Failed
            },
        };
        match self.transition(&tile, TileState::InProgress, outcome).await? {
            true if outcome == TileState::Downloaded => Ok(Outcome::Downloaded),
            true => Ok(Outcome::Failed),
            // The tile was removed (or reset) while downloading.
            false => Ok(Outcome::Skipped),
        }
    }

    async fn download(&self, tile: &Tile) -> tilesync_source::error::Result<u64> {
        let dest = self.tiles_dir.join(validate_path(&tile.path)?);
        self.fetcher.fetch_to(&tile.url, &dest).await
    }

    async fn transition(&self, tile: &Tile, from: TileState, to: TileState) -> Result<bool> {
        self.repo.compare_and_set_tile_state(tile.coord, from, to).await.or_raise(|| ErrorKind::Store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tilesync_geo::TileCoord;
    use tilesync_source::FetchOptions;
    use tilesync_store::Database;

    fn file_url(path: &Path) -> String {
        format!("file://{}", path.display())
    }

    struct Fixture {
        upstream: tempfile::TempDir,
        tiles: tempfile::TempDir,
        repo: Repository,
        worker: TileDownloadWorker,
    }

    async fn fixture(concurrency: usize) -> Fixture {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = Repository::from(&db);
        let upstream = tempfile::tempdir().unwrap();
        let tiles = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(&FetchOptions::default()).unwrap();
        let worker = TileDownloadWorker::new(repo.clone(), fetcher, tiles.path(), concurrency);
        Fixture { upstream, tiles, repo, worker }
    }

    impl Fixture {
        /// A tile whose upstream file exists (when `available`).
        async fn tile(&self, x: u32, state: TileState, available: bool) -> Tile {
            let source = self.upstream.path().join(format!("{x}.png"));
            if available {
                std::fs::write(&source, format!("tile {x}")).unwrap();
            }
            let tile = Tile::new(TileCoord::new(10, x, 7), file_url(&source), state);
            self.repo.insert_or_update_tile(&tile).await.unwrap();
            tile
        }

        async fn state(&self, tile: &Tile) -> TileState {
            let tiles = self.repo.list_tiles().await.unwrap();
            tiles.get(tile).unwrap().state
        }
    }

    #[tokio::test]
    async fn test_downloads_pending_tiles() {
        let fx = fixture(2).await;
        let mut tiles = Vec::new();
        for x in 0..5 {
            tiles.push(fx.tile(x, TileState::Pending, true).await);
        }
        let summary = fx.worker.run().await.unwrap();
        assert_eq!(summary, RunSummary { downloaded: 5, failed: 0, skipped: 0 });
        for tile in &tiles {
            assert_eq!(fx.state(tile).await, TileState::Downloaded);
            let written = std::fs::read(fx.tiles.path().join(&tile.path)).unwrap();
            assert_eq!(written, format!("tile {}", tile.coord.x).into_bytes());
        }
    }

    #[tokio::test]
    async fn test_marks_unreachable_tiles_failed() {
        let fx = fixture(4).await;
        let good = fx.tile(1, TileState::Pending, true).await;
        let bad = fx.tile(2, TileState::Pending, false).await;
        let summary = fx.worker.run().await.unwrap();
        assert_eq!(summary.downloaded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(fx.state(&good).await, TileState::Downloaded);
        assert_eq!(fx.state(&bad).await, TileState::Failed);
        // Failed tiles are not picked up again on their own.
        assert_eq!(fx.worker.run().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_resumes_in_progress_tiles() {
        let fx = fixture(1).await;
        let interrupted = fx.tile(3, TileState::InProgress, true).await;
        let summary = fx.worker.run().await.unwrap();
        assert_eq!(summary.downloaded, 1);
        assert_eq!(fx.state(&interrupted).await, TileState::Downloaded);
    }

    #[tokio::test]
    async fn test_leaves_downloaded_tiles_alone() {
        let fx = fixture(1).await;
        let done = fx.tile(4, TileState::Downloaded, false).await;
        let summary = fx.worker.run().await.unwrap();
        assert_eq!(summary.total(), 0);
        assert_eq!(fx.state(&done).await, TileState::Downloaded);
    }

    #[tokio::test]
    async fn test_retry_failed() {
        let fx = fixture(1).await;
        let tile = fx.tile(5, TileState::Pending, false).await;
        fx.worker.run().await.unwrap();
        assert_eq!(fx.state(&tile).await, TileState::Failed);

        // The upstream file shows up later.
        std::fs::write(fx.upstream.path().join("5.png"), b"late").unwrap();
        assert_eq!(fx.worker.retry_failed().await.unwrap(), 1);
        assert_eq!(fx.worker.run().await.unwrap().downloaded, 1);
        assert_eq!(fx.state(&tile).await, TileState::Downloaded);
    }

    #[tokio::test]
    async fn test_zero_concurrency_still_makes_progress() {
        let fx = fixture(0).await;
        fx.tile(6, TileState::Pending, true).await;
        fx.tile(7, TileState::Pending, true).await;
        assert_eq!(fx.worker.run().await.unwrap().downloaded, 2);
    }
}
