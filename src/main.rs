//! tilesync: keep basemap tiles for selected areas available offline.

mod error;

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand, ValueEnum};
use exn::{OptionExt, ResultExt};
use futures::StreamExt;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tilesync_config::Config;
use tilesync_geo::Bounds;
use tilesync_source::{BaseMapSourceFetcher, Fetcher, Project};
use tilesync_store::{Database, OfflineArea, Repository, Tile, TileState};
use tilesync_sync::{
    OfflineAreaCoordinator, StaticProjectSource, TileDownloadScheduler, TileDownloadWorker, WorkerScheduler,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tilesync", version, about = "Offline basemap tile synchronization", long_about = None)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Request an area for offline use and download its tiles
    Request(BoundsArgs),
    /// List offline areas
    Areas,
    /// Show one offline area
    Area {
        id: String,
        /// Keep reporting download progress until the area is complete
        #[arg(long)]
        watch: bool,
    },
    /// List tracked tiles
    Tiles {
        /// Only tiles needed by this area
        #[arg(long)]
        area: Option<String>,
        #[arg(long, value_enum)]
        state: Option<StateArg>,
    },
    /// Download every pending tile
    Download {
        /// Give failed tiles another go
        #[arg(long)]
        retry_failed: bool,
    },
    /// Remove an offline area, and the tiles no other area needs
    Remove { id: String },
}

#[derive(Args)]
struct BoundsArgs {
    /// Southern edge, in decimal degrees of latitude
    #[arg(long, allow_negative_numbers = true)]
    south: f64,
    /// Western edge, in decimal degrees of longitude
    #[arg(long, allow_negative_numbers = true)]
    west: f64,
    /// Northern edge, in decimal degrees of latitude
    #[arg(long, allow_negative_numbers = true)]
    north: f64,
    /// Eastern edge, in decimal degrees of longitude
    #[arg(long, allow_negative_numbers = true)]
    east: f64,
}
impl BoundsArgs {
    fn to_bounds(&self) -> Result<Bounds> {
        let latitude = -90.0..=90.0;
        let longitude = -180.0..=180.0;
        if !latitude.contains(&self.south) || !latitude.contains(&self.north) {
            exn::bail!(ErrorKind::InvalidBounds("latitude must be between -90 and 90"));
        }
        if !longitude.contains(&self.west) || !longitude.contains(&self.east) {
            exn::bail!(ErrorKind::InvalidBounds("longitude must be between -180 and 180"));
        }
        if self.south > self.north {
            exn::bail!(ErrorKind::InvalidBounds("south must not be north of north"));
        }
        if self.west > self.east {
            exn::bail!(ErrorKind::InvalidBounds("areas crossing the antimeridian are not supported"));
        }
        Ok(Bounds::from_edges(self.south, self.west, self.north, self.east))
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StateArg {
    Pending,
    InProgress,
    Downloaded,
    Failed,
}
impl From<StateArg> for TileState {
    fn from(state: StateArg) -> Self {
        match state {
            StateArg::Pending => TileState::Pending,
            StateArg::InProgress => TileState::InProgress,
            StateArg::Downloaded => TileState::Downloaded,
            StateArg::Failed => TileState::Failed,
        }
    }
}

/// Everything the commands share.
struct App {
    config: Config,
    db: Database,
    repo: Repository,
}
impl App {
    async fn open(config: Config) -> Result<Self> {
        let db = Database::connect(&config.database).await.or_raise(|| ErrorKind::Store)?;
        let repo = Repository::from(&db);
        Ok(Self { config, db, repo })
    }

    fn project(&self) -> Result<Project> {
        self.config.project.clone().ok_or_raise(|| ErrorKind::NoProject)
    }

    fn fetcher(&self) -> Result<Fetcher> {
        Fetcher::new(&self.config.fetch_options()).or_raise(|| ErrorKind::Source)
    }

    fn worker(&self) -> Result<TileDownloadWorker> {
        Ok(TileDownloadWorker::new(
            self.repo.clone(),
            self.fetcher()?,
            &self.config.tiles_dir,
            self.config.download.concurrency,
        ))
    }

    fn coordinator(&self, scheduler: Arc<dyn TileDownloadScheduler>) -> Result<OfflineAreaCoordinator> {
        let sources = BaseMapSourceFetcher::new(self.fetcher()?, &self.config.cache_dir, self.config.source_selection);
        let projects = Arc::new(StaticProjectSource::new(self.config.project.clone()));
        Ok(OfflineAreaCoordinator::new(self.repo.clone(), sources, projects, scheduler))
    }

    /// A coordinator for commands that never enqueue downloads.
    fn read_only_coordinator(&self) -> Result<OfflineAreaCoordinator> {
        self.coordinator(Arc::new(NoDownloads))
    }
}

/// Scheduler for commands that only read or remove areas.
struct NoDownloads;
#[async_trait]
impl TileDownloadScheduler for NoDownloads {
    async fn enqueue_tile_download_worker(&self) -> tilesync_sync::error::Result<()> {
        exn::bail!(tilesync_sync::error::ErrorKind::Scheduler)
    }
}

fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err:?}");
            return ExitCode::FAILURE;
        },
    };
    init_logging(&config.log_level);
    match run(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:?}");
            if err.is_retryable() {
                eprintln!("this may succeed if run again");
            }
            ExitCode::FAILURE
        },
    }
}

async fn run(command: Command, config: Config) -> Result<()> {
    let app = App::open(config).await?;
    let result = match command {
        Command::Request(bounds) => request(&app, &bounds).await,
        Command::Areas => areas(&app).await,
        Command::Area { id, watch } => area(&app, &id, watch).await,
        Command::Tiles { area, state } => tiles(&app, area.as_deref(), state.map(TileState::from)).await,
        Command::Download { retry_failed } => download(&app, retry_failed).await,
        Command::Remove { id } => remove(&app, &id).await,
    };
    app.db.close().await;
    result
}

async fn request(app: &App, bounds: &BoundsArgs) -> Result<()> {
    let bounds = bounds.to_bounds()?;
    let project = app.project()?;
    tracing::info!(project = %project.id, "requesting offline area");

    let (scheduler, downloads) = WorkerScheduler::spawn(app.worker()?);
    let coordinator = app.coordinator(Arc::new(scheduler))?;
    let request = coordinator.request_area(bounds);
    println!("{}", request.id);
    request.handle.await.or_raise(|| ErrorKind::Sync)?;
    // The coordinator holds the last scheduler handle; once it's gone the
    // worker finishes whatever is queued and stops.
    drop(coordinator);
    downloads.await.or_raise(|| ErrorKind::Sync)?;

    let area = app.repo.get_offline_area_by_id(&request.id).await.or_raise(|| ErrorKind::Store)?;
    let tiles = app.repo.tiles_for_area(&area.id).await.or_raise(|| ErrorKind::Store)?;
    print_area(&area, &tiles);
    Ok(())
}

async fn areas(app: &App) -> Result<()> {
    let coordinator = app.read_only_coordinator()?;
    let mut stream = Box::pin(coordinator.list_areas());
    let areas = stream.next().await.ok_or_raise(|| ErrorKind::Sync)?.or_raise(|| ErrorKind::Sync)?;
    if areas.is_empty() {
        println!("no offline areas");
    }
    for area in areas {
        let tiles = coordinator.area_tiles(&area.id).await.or_raise(|| ErrorKind::Sync)?;
        print_area(&area, &tiles);
    }
    Ok(())
}

async fn area(app: &App, id: &str, watch: bool) -> Result<()> {
    let coordinator = app.read_only_coordinator()?;
    let area = coordinator.get_area(id).await.or_raise(|| ErrorKind::Sync)?;
    let tiles = coordinator.area_tiles(id).await.or_raise(|| ErrorKind::Sync)?;
    print_area(&area, &tiles);
    if !watch {
        return Ok(());
    }

    app.project()?;
    if Progress::of(&tiles).is_settled() {
        return Ok(());
    }
    // Emissions only signal that something changed; progress is always
    // measured against the tiles linked to the area.
    let mut changes = Box::pin(coordinator.intersecting_downloaded_tiles(&area));
    loop {
        tokio::select! {
            changed = changes.next() => {
                if changed.is_none() {
                    break;
                }
                let tiles = coordinator.area_tiles(id).await.or_raise(|| ErrorKind::Sync)?;
                let progress = Progress::of(&tiles);
                println!("{progress}");
                if progress.is_settled() {
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

async fn tiles(app: &App, area: Option<&str>, state: Option<TileState>) -> Result<()> {
    let tiles = match area {
        Some(id) => {
            let coordinator = app.read_only_coordinator()?;
            coordinator.area_tiles(id).await.or_raise(|| ErrorKind::Sync)?
        },
        None => app.repo.list_tiles().await.or_raise(|| ErrorKind::Store)?,
    };
    for tile in tiles.iter().filter(|t| state.is_none_or(|s| t.state == s)) {
        println!("{}\t{}\t{}", tile.coord, tile.state, tile.url);
    }
    Ok(())
}

async fn download(app: &App, retry_failed: bool) -> Result<()> {
    let worker = app.worker()?;
    if retry_failed {
        let reset = worker.retry_failed().await.or_raise(|| ErrorKind::Sync)?;
        tracing::info!(tiles = reset, "failed tiles reset to pending");
    }
    let summary = worker.run().await.or_raise(|| ErrorKind::Sync)?;
    println!("downloaded {}, failed {}, skipped {}", summary.downloaded, summary.failed, summary.skipped);
    Ok(())
}

async fn remove(app: &App, id: &str) -> Result<()> {
    let coordinator = app.read_only_coordinator()?;
    let removed = coordinator.remove_area(id).await.or_raise(|| ErrorKind::Sync)?;
    for tile in &removed {
        if tile.state != TileState::Downloaded {
            continue;
        }
        let relative = tilesync_source::path::validate(&tile.path).or_raise(|| ErrorKind::Io(tile.path.clone()))?;
        let path = app.config.tiles_dir.join(relative);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {},
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {},
            Err(err) => return Err(err).or_raise(|| ErrorKind::Io(path)),
        }
    }
    println!("removed {id} and {} tiles", removed.len());
    Ok(())
}

/// Download state of the tiles linked to one area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Progress {
    downloaded: usize,
    failed: usize,
    total: usize,
}
impl Progress {
    fn of(tiles: &BTreeSet<Tile>) -> Self {
        Self {
            downloaded: tiles.iter().filter(|t| t.state == TileState::Downloaded).count(),
            failed: tiles.iter().filter(|t| t.state == TileState::Failed).count(),
            total: tiles.len(),
        }
    }

    /// Nothing left that a download run would pick up.
    fn is_settled(&self) -> bool {
        self.downloaded + self.failed >= self.total
    }
}
impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} downloaded, {} failed", self.downloaded, self.total, self.failed)
    }
}

fn print_area(area: &OfflineArea, tiles: &BTreeSet<Tile>) {
    let b = &area.bounds;
    println!(
        "{}\t{}\t[{}, {}, {}, {}]\t{}",
        area.id,
        area.state,
        b.south(),
        b.west(),
        b.north(),
        b.east(),
        Progress::of(tiles)
    );
}
