//! Local store for offline areas and their map tiles.
//!
//! Tiles are tracked globally by their `z/x/y` key and linked to every area
//! that needs them. Reads come in two flavours: one-shot queries, and live
//! streams that re-emit after every committed write.

mod db;
pub mod error;
pub mod models;
mod repo;

pub use crate::db::Database;
pub use crate::models::{AreaState, OfflineArea, Tile, TileState};
pub use crate::repo::Repository;
