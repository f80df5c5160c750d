//! Where the active project comes from.

use crate::error::Result;
use async_stream::stream;
use futures::stream::BoxStream;
use tilesync_source::Project;
use tokio::sync::watch;

/// Supplies the project whose basemap is being synchronized.
///
/// The stream emits the current project as soon as one is loaded, then again
/// every time it changes. It never emits while no project is loaded.
pub trait ProjectSource: Send + Sync {
    fn active_project_stream(&self) -> BoxStream<'static, Result<Project>>;
}

/// A project held in memory, replaced by hand.
#[derive(Debug)]
pub struct StaticProjectSource {
    current: watch::Sender<Option<Project>>,
}
impl StaticProjectSource {
    pub fn new(project: Option<Project>) -> Self {
        let (current, _) = watch::channel(project);
        Self { current }
    }

    /// Make `project` the active project, notifying every open stream.
    pub fn set_active(&self, project: Project) {
        tracing::debug!(project = %project.id, "active project changed");
        self.current.send_replace(Some(project));
    }

    /// Unload the active project. Open streams stay quiet until the next
    /// [`set_active`](Self::set_active).
    pub fn clear(&self) {
        self.current.send_replace(None);
    }
}
impl ProjectSource for StaticProjectSource {
    fn active_project_stream(&self) -> BoxStream<'static, Result<Project>> {
        let mut current = self.current.subscribe();
        Box::pin(stream! {
            loop {
                let project = current.borrow_and_update().clone();
                if let Some(project) = project {
                    yield Ok(project);
                }
                if current.changed().await.is_err() {
                    return;
                }
            }
        })
    }
}
