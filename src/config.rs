//! Application configuration.
//!
//! Settings are read from TOML at `$XDG_CONFIG_HOME/onceupon/config.toml`
//! (or the platform config dir), an explicit `--config` path overriding
//! both. A missing file means defaults.
//!
//! ```toml
//! data_dir = "/srv/onceupon"
//!
//! [catalogue]
//! input = "library_books_enriched.csv"
//! covers_dir = "covers"
//!
//! [embedder]
//! kind = "fastembed"
//! batch_size = 32
//!
//! [carousel]
//! sample_size = 50
//! interval_secs = 15
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::carousel::CarouselConfig;
use crate::indexer::semantic::DEFAULT_BATCH_SIZE;
use crate::search::embedder::EmbedderKind;
use crate::search::fastembed_embedder::FastEmbedder;
use crate::search::hash_embedder::DEFAULT_HASH_DIMENSION;
use crate::search::query::DEFAULT_TOP_K;

pub const DATA_DIR_ENV: &str = "ONCEUPON_DATA_DIR";
const APP_NAME: &str = "onceupon";
const CONFIG_FILE: &str = "config.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub data_dir: Option<PathBuf>,
    pub catalogue: CatalogueSection,
    pub embedder: EmbedderSection,
    pub search: SearchSection,
    pub carousel: CarouselSection,
    pub server: ServerSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogueSection {
    /// Enriched catalogue CSV consumed by `build`.
    pub input: PathBuf,
    /// Cover images, resolved relative to the data dir when not absolute.
    pub covers_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderSection {
    pub kind: EmbedderKind,
    pub model_dir: Option<PathBuf>,
    pub hash_dimension: usize,
    pub batch_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub top_k: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CarouselSection {
    pub sample_size: usize,
    pub interval_secs: u64,
    pub poll_millis: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub listen: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            catalogue: CatalogueSection::default(),
            embedder: EmbedderSection::default(),
            search: SearchSection::default(),
            carousel: CarouselSection::default(),
            server: ServerSection::default(),
        }
    }
}

impl Default for CatalogueSection {
    fn default() -> Self {
        Self {
            input: PathBuf::from("library_books_enriched.csv"),
            covers_dir: PathBuf::from("covers"),
        }
    }
}

impl Default for EmbedderSection {
    fn default() -> Self {
        Self {
            kind: EmbedderKind::default(),
            model_dir: None,
            hash_dimension: DEFAULT_HASH_DIMENSION,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
        }
    }
}

impl Default for CarouselSection {
    fn default() -> Self {
        let defaults = CarouselConfig::default();
        Self {
            sample_size: defaults.sample_size,
            interval_secs: defaults.interval.as_secs(),
            poll_millis: u64::try_from(defaults.poll.as_millis()).unwrap_or(250),
        }
    }
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:7878".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from `explicit` if given, else from the default location.
    ///
    /// An explicit path must exist; the default location may be absent.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::load_from(path)?,
            None => {
                let path = Self::config_path()?;
                if path.exists() {
                    Self::load_from(&path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// `$XDG_CONFIG_HOME/onceupon/config.toml`, else the platform config dir.
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            return Ok(PathBuf::from(xdg_config).join(APP_NAME).join(CONFIG_FILE));
        }
        dirs::config_dir()
            .map(|p| p.join(APP_NAME).join(CONFIG_FILE))
            .ok_or(ConfigError::NoConfigDir)
    }

    fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var(DATA_DIR_ENV)
            && !dir.trim().is_empty()
        {
            self.data_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("embedder.batch_size", self.embedder.batch_size as u64),
            ("embedder.hash_dimension", self.embedder.hash_dimension as u64),
            ("search.top_k", self.search.top_k as u64),
            ("carousel.sample_size", self.carousel.sample_size as u64),
            ("carousel.interval_secs", self.carousel.interval_secs),
            ("carousel.poll_millis", self.carousel.poll_millis),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Validation(format!("{field} must be > 0")));
            }
        }
        if self.server.listen.trim().is_empty() {
            return Err(ConfigError::Validation(
                "server.listen cannot be empty".into(),
            ));
        }
        Ok(())
    }

    /// Effective data directory.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    pub fn covers_dir(&self) -> PathBuf {
        let covers = &self.catalogue.covers_dir;
        if covers.is_absolute() {
            covers.clone()
        } else {
            self.data_dir().join(covers)
        }
    }

    /// MiniLM model directory; defaults to `<data_dir>/models/all-MiniLM-L6-v2`.
    pub fn model_dir(&self) -> PathBuf {
        self.embedder
            .model_dir
            .clone()
            .unwrap_or_else(|| FastEmbedder::default_model_dir(&self.data_dir()))
    }

    pub fn carousel_config(&self) -> CarouselConfig {
        CarouselConfig {
            sample_size: self.carousel.sample_size,
            interval: Duration::from_secs(self.carousel.interval_secs),
            poll: Duration::from_millis(self.carousel.poll_millis),
        }
    }
}

/// Platform data dir for the app, or `./data` when none can be determined.
pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("org", APP_NAME, APP_NAME)
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("data"))
}
