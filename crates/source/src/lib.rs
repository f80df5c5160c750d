//! Basemap sources: which ones a project uses, and getting them onto disk.
//!
//! Also home to [`Fetcher`], the small HTTP/file client shared with the tile
//! downloader.

mod basemap;
pub mod error;
mod fetcher;
pub mod models;
pub mod path;

pub use crate::basemap::BaseMapSourceFetcher;
pub use crate::fetcher::{FetchOptions, Fetcher};
pub use crate::models::{BaseMapSource, Project, SourceSelection};
