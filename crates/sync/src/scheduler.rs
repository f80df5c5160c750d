//! Handing tile downloads off to the background.

use crate::error::{ErrorKind, Result};
use crate::worker::TileDownloadWorker;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

/// Something that makes sure pending tiles eventually get downloaded.
///
/// Enqueueing only asks for a download run; which tiles get downloaded is
/// decided by the store at the time the run starts. Asking several times
/// before a run starts results in one run.
#[async_trait]
pub trait TileDownloadScheduler: Send + Sync {
    async fn enqueue_tile_download_worker(&self) -> Result<()>;
}

/// Runs a [`TileDownloadWorker`] on a tokio task.
///
/// The task runs the worker once on start, to pick up whatever a previous
/// process left behind, and then once per coalesced enqueue request. It
/// finishes after the last clone of the scheduler is dropped and the queued
/// run (if any) is done.
#[derive(Debug, Clone)]
pub struct WorkerScheduler {
    requests: mpsc::Sender<()>,
}
impl WorkerScheduler {
    /// Spawn the worker task. Must be called from within a tokio runtime.
    pub fn spawn(worker: TileDownloadWorker) -> (Self, JoinHandle<()>) {
        // One slot: a full channel already means "run again after this one".
        let (requests, mut pending) = mpsc::channel(1);
        let handle = tokio::spawn(async move {
            tracing::debug!("resuming unfinished tile downloads");
            run_worker(&worker).await;
            while pending.recv().await.is_some() {
                run_worker(&worker).await;
            }
            tracing::debug!("tile download scheduler stopped");
        });
        (Self { requests }, handle)
    }
}
#[async_trait]
impl TileDownloadScheduler for WorkerScheduler {
    async fn enqueue_tile_download_worker(&self) -> Result<()> {
        match self.requests.try_send(()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(())) => {
                tracing::trace!("tile download run already queued");
                Ok(())
            },
            Err(TrySendError::Closed(())) => exn::bail!(ErrorKind::Scheduler),
        }
    }
}

async fn run_worker(worker: &TileDownloadWorker) {
    if let Err(err) = worker.run().await {
        tracing::error!(error = ?err, "tile download run failed");
    }
}

#[cfg(test)]
pub use self::mock::RecordingScheduler;

#[cfg(test)]
mod tests {
    use super::*;
    use tilesync_geo::TileCoord;
    use tilesync_source::{FetchOptions, Fetcher};
    use tilesync_store::{Database, Repository, Tile, TileState};

    async fn setup() -> (Repository, tempfile::TempDir, TileDownloadWorker) {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = Repository::from(&db);
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(&FetchOptions::default()).unwrap();
        let worker = TileDownloadWorker::new(repo.clone(), fetcher, dir.path().join("tiles"), 2);
        (repo, dir, worker)
    }

    async fn pending_tile(repo: &Repository, dir: &tempfile::TempDir, x: u32) -> Tile {
        let source = dir.path().join(format!("{x}.png"));
        std::fs::write(&source, b"png").unwrap();
        let tile = Tile::new(TileCoord::new(12, x, 1), format!("file://{}", source.display()), TileState::Pending);
        repo.insert_or_update_tile(&tile).await.unwrap();
        tile
    }

    async fn states(repo: &Repository) -> Vec<TileState> {
        repo.list_tiles().await.unwrap().into_iter().map(|t| t.state).collect()
    }

    #[tokio::test]
    async fn test_resumes_on_start() {
        let (repo, dir, worker) = setup().await;
        pending_tile(&repo, &dir, 1).await;
        let (scheduler, handle) = WorkerScheduler::spawn(worker);
        drop(scheduler);
        handle.await.unwrap();
        assert_eq!(states(&repo).await, vec![TileState::Downloaded]);
    }

    #[tokio::test]
    async fn test_enqueue_runs_worker() {
        let (repo, dir, worker) = setup().await;
        let (scheduler, handle) = WorkerScheduler::spawn(worker);
        pending_tile(&repo, &dir, 1).await;
        pending_tile(&repo, &dir, 2).await;
        // Coalesced: however many requests, the queued run covers them all.
        for _ in 0..3 {
            scheduler.enqueue_tile_download_worker().await.unwrap();
        }
        drop(scheduler);
        handle.await.unwrap();
        assert_eq!(states(&repo).await, vec![TileState::Downloaded, TileState::Downloaded]);
    }

    #[tokio::test]
    async fn test_enqueue_after_stop() {
        let (_repo, _dir, worker) = setup().await;
        let (scheduler, handle) = WorkerScheduler::spawn(worker);
        handle.abort();
        _ = handle.await;
        let err = scheduler.enqueue_tile_download_worker().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Scheduler));
    }

    #[tokio::test]
    async fn test_recording_scheduler() {
        let scheduler = RecordingScheduler::new();
        scheduler.enqueue_tile_download_worker().await.unwrap();
        scheduler.enqueue_tile_download_worker().await.unwrap();
        assert_eq!(scheduler.calls(), 2);

        let unavailable = RecordingScheduler::unavailable();
        assert!(unavailable.enqueue_tile_download_worker().await.is_err());
        assert_eq!(unavailable.calls(), 1);
    }
}
