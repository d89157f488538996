use crate::error::{Error, Result};
use crate::stream::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_READ_CHUNK, Mode, PipeOptions};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default output mode. Default: object.
    pub mode: Mode,

    /// Decoded items buffered ahead of the consumer. Default: 32.
    pub channel_capacity: usize,

    /// Bytes per read when decoding files or stdin. Default: 8192.
    pub read_chunk_size: usize,

    /// `tracing` filter used when `RUST_LOG` is unset. Default: "warn".
    pub log_filter: String,

    pub http: HttpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Object,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            read_chunk_size: DEFAULT_READ_CHUNK,
            log_filter: "warn".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    /// Overall request timeout. None leaves streams open as long as the server does.
    pub timeout_secs: Option<u64>,
    pub bearer_token: Option<String>,
    /// Extra headers sent with every request.
    pub headers: HashMap<String, String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            timeout_secs: None,
            bearer_token: None,
            headers: HashMap::new(),
        }
    }
}

impl Config {
    /// Default config file location.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("rill").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from(".rill/config.toml"))
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing default file yields defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::load_from(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Cannot read {}: {e}", path.display())))?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Pipe options derived from this config.
    pub fn pipe_options(&self) -> PipeOptions {
        PipeOptions::default().with_capacity(self.channel_capacity.max(1))
    }

    pub fn read_chunk_size(&self) -> usize {
        self.read_chunk_size.max(1)
    }
}
