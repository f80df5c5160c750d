//! Configuration loading and validation.
//!
//! Values are layered, later layers winning:
//!
//! 1. Built-in defaults (platform directories from `directories`).
//! 2. A configuration file: the one passed explicitly, or `tilesync.toml` in
//!    the platform config directory if it exists. TOML, YAML and JSON are
//!    accepted, picked by extension.
//! 3. Environment variables prefixed with `TILESYNC_`; nested keys are
//!    separated by a double underscore (`TILESYNC_DOWNLOAD__CONCURRENCY=8`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tilesync_source::{FetchOptions, Project, SourceSelection};

const FILE_NAME: &str = "tilesync.toml";
const ENV_PREFIX: &str = "TILESYNC_";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "tilesync")
}

/// Tile download settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// How many tiles are downloaded at the same time.
    pub concurrency: usize,
    /// Per-request timeout, in seconds.
    pub timeout_secs: u64,
    pub user_agent: String,
}
impl Default for DownloadConfig {
    fn default() -> Self {
        let fetch = FetchOptions::default();
        Self { concurrency: 4, timeout_secs: fetch.timeout.as_secs(), user_agent: fetch.user_agent }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// SQLite database holding areas and tiles.
    pub database: PathBuf,
    /// Where fetched basemap source files are kept.
    pub cache_dir: PathBuf,
    /// Root of the downloaded tiles, laid out as `z/x/y`.
    pub tiles_dir: PathBuf,
    #[serde(default)]
    pub source_selection: SourceSelection,
    #[serde(default)]
    pub download: DownloadConfig,
    /// Default log filter, used when `RUST_LOG` is unset.
    pub log_level: String,
    /// The active project, if one is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<Project>,
}
impl Default for Config {
    fn default() -> Self {
        let (data, cache) = match project_dirs() {
            Some(dirs) => (dirs.data_dir().to_path_buf(), dirs.cache_dir().to_path_buf()),
            // No home directory: leave the paths empty and let validation
            // ask for them explicitly.
            None => (PathBuf::new(), PathBuf::new()),
        };
        Self {
            database: data.join("tilesync.sqlite"),
            cache_dir: cache.join("sources"),
            tiles_dir: data.join("tiles"),
            source_selection: SourceSelection::default(),
            download: DownloadConfig::default(),
            log_level: "info".to_string(),
            project: None,
        }
    }
}

impl Config {
    /// Load and validate configuration from every layer.
    ///
    /// `file` overrides the default file location; unlike the default
    /// location, it must exist.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::from_figment(Self::figment(file)?)
    }

    /// The layered providers, without extracting anything yet.
    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        match file {
            Some(path) => {
                if !path.is_file() {
                    exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
                }
                figment = merge_file(figment, path)?;
            },
            None => {
                if let Some(dirs) = project_dirs() {
                    let path = dirs.config_dir().join(FILE_NAME);
                    tracing::debug!(path = %path.display(), "looking for configuration file");
                    figment = figment.merge(Toml::file(path));
                }
            },
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Extract and validate a configuration from already-assembled providers.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.download.concurrency == 0 {
            exn::bail!(ErrorKind::Invalid("download.concurrency must be at least 1"));
        }
        if self.download.timeout_secs == 0 {
            exn::bail!(ErrorKind::Invalid("download.timeout_secs must be at least 1"));
        }
        if !self.database.is_absolute() {
            exn::bail!(ErrorKind::Invalid("database must be an absolute path"));
        }
        if !self.cache_dir.is_absolute() {
            exn::bail!(ErrorKind::Invalid("cache_dir must be an absolute path"));
        }
        if !self.tiles_dir.is_absolute() {
            exn::bail!(ErrorKind::Invalid("tiles_dir must be an absolute path"));
        }
        Ok(())
    }

    /// HTTP client settings for fetching sources and tiles.
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            timeout: Duration::from_secs(self.download.timeout_secs),
            user_agent: self.download.user_agent.clone(),
        }
    }
}

fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
    let extension = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
    Ok(match extension.as_deref() {
        Some("toml") => figment.merge(Toml::file_exact(path)),
        Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path)),
        Some("json") => figment.merge(Json::file_exact(path)),
        _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;

    fn absolute_paths(jail: &Jail) -> String {
        let root = jail.directory().display().to_string();
        format!("database = \"{root}/db.sqlite\"\ncache_dir = \"{root}/cache\"\ntiles_dir = \"{root}/tiles\"\n")
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.download.concurrency, 4);
        assert_eq!(config.source_selection, SourceSelection::FirstOnly);
        assert_eq!(config.log_level, "info");
        assert!(config.project.is_none());
    }

    #[test]
    fn test_file_then_env() {
        Jail::expect_with(|jail| {
            let mut contents = absolute_paths(jail);
            contents.push_str(
                r#"
source_selection = "all"
log_level = "debug"

[download]
concurrency = 2

[project]
id = "p1"
title = "Coastal survey"
basemap_sources = [{ url = "https://maps.example.com/coast.geojson" }]
"#,
            );
            jail.create_file("tilesync.toml", &contents)?;
            jail.set_env("TILESYNC_DOWNLOAD__CONCURRENCY", "8");
            jail.set_env("TILESYNC_LOG_LEVEL", "warn");

            let config = Config::load(Some(Path::new("tilesync.toml"))).unwrap();
            assert_eq!(config.source_selection, SourceSelection::All);
            assert_eq!(config.download.concurrency, 8);
            // Untouched nested keys keep their defaults.
            assert_eq!(config.download.timeout_secs, 30);
            assert_eq!(config.log_level, "warn");
            let project = config.project.unwrap();
            assert_eq!(project.title, "Coastal survey");
            assert_eq!(project.basemap_sources.len(), 1);
            Ok(())
        });
    }

    #[test]
    fn test_yaml_and_json_files() {
        Jail::expect_with(|jail| {
            let root = jail.directory().display().to_string();
            jail.create_file(
                "tilesync.yaml",
                &format!("database: {root}/db.sqlite\ncache_dir: {root}/cache\ntiles_dir: {root}/tiles\nlog_level: trace\n"),
            )?;
            jail.create_file(
                "tilesync.json",
                &format!(r#"{{"database":"{root}/db.sqlite","cache_dir":"{root}/c","tiles_dir":"{root}/t","log_level":"error"}}"#),
            )?;
            assert_eq!(Config::load(Some(Path::new("tilesync.yaml"))).unwrap().log_level, "trace");
            assert_eq!(Config::load(Some(Path::new("tilesync.json"))).unwrap().log_level, "error");
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[test]
    fn test_unsupported_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tilesync.ini");
        std::fs::write(&path, "").unwrap();
        let err = Config::load(Some(&path)).unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnsupportedFormat(_)));
    }

    #[rstest]
    #[case::zero_concurrency("TILESYNC_DOWNLOAD__CONCURRENCY", "0")]
    #[case::zero_timeout("TILESYNC_DOWNLOAD__TIMEOUT_SECS", "0")]
    #[case::relative_tiles_dir("TILESYNC_TILES_DIR", "tiles")]
    #[case::relative_database("TILESYNC_DATABASE", "db.sqlite")]
    fn test_validation(#[case] key: &str, #[case] value: &str) {
        Jail::expect_with(|jail| {
            jail.create_file("tilesync.toml", &absolute_paths(jail))?;
            jail.set_env(key, value);
            let err = Config::load(Some(Path::new("tilesync.toml"))).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Invalid(_)));
            Ok(())
        });
    }

    #[test]
    fn test_malformed_value() {
        Jail::expect_with(|jail| {
            let contents = format!("{}source_selection = \"sometimes\"\n", absolute_paths(jail));
            jail.create_file("tilesync.toml", &contents)?;
            let err = Config::load(Some(Path::new("tilesync.toml"))).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Load));
            Ok(())
        });
    }

    #[test]
    fn test_fetch_options() {
        let mut config = Config::default();
        config.download.timeout_secs = 5;
        config.download.user_agent = "survey-app/1.0".to_string();
        let options = config.fetch_options();
        assert_eq!(options.timeout, Duration::from_secs(5));
        assert_eq!(options.user_agent, "survey-app/1.0");
    }
}
