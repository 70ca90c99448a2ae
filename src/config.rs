use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tilestream_map::{ConfigError, StreamingConfig};

/// Settings shared by every scheduler of an application, usually read from a RON file.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Config {
    pub streaming: StreamingConfig,
    /// Each scheduler persists its RAM cache in a subdirectory named after it. No persistence if unset.
    pub cache_root: Option<PathBuf>,
    /// Threads for a [`ThreadPoolFetcher`](crate::ThreadPoolFetcher).
    pub fetch_workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            streaming: StreamingConfig::default(),
            cache_root: None,
            fetch_workers: 4,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("failed to read config file: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] ron::Error),
    #[error("invalid config: {0}")]
    Invalid(#[from] ConfigError),
}

impl Config {
    pub fn read_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let reader = std::fs::File::open(path)?;
        let config: Self = ron::de::from_reader(reader)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch_workers == 0 {
            return Err(ConfigError::Zero {
                field: "fetch_workers",
            });
        }
        self.streaming.validate()
    }

    pub fn cache_dir(&self, scheduler_name: &str) -> Option<PathBuf> {
        self.cache_root
            .as_ref()
            .map(|root| root.join(scheduler_name))
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
