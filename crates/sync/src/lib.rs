//! Offline area synchronization.
//!
//! [`OfflineAreaCoordinator`] accepts area requests and works out which tiles
//! they need; [`WorkerScheduler`] and [`TileDownloadWorker`] then download
//! those tiles in the background. The store is the only shared state between
//! the two halves, which is what lets downloads survive a restart.

mod coordinator;
pub mod error;
mod project;
mod recover;
mod scheduler;
mod worker;

pub use crate::coordinator::{AreaRequest, OfflineAreaCoordinator};
pub use crate::project::{ProjectSource, StaticProjectSource};
pub use crate::recover::{log_and_complete, recover_with};
pub use crate::scheduler::{TileDownloadScheduler, WorkerScheduler};
pub use crate::worker::{RunSummary, TileDownloadWorker};
