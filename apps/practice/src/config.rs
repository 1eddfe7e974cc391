use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use rudiment_domain::InputType;
use rudiment_services::{api::websocket_base, Endpoints};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{field} must be an http(s) or ws(s) url, got {value:?}")]
    BadUrl { field: &'static str, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub api_base: String,
    /// Derived from `api_base` when unset.
    pub stream_base: Option<String>,
    pub session_path: String,
    pub drills_path: String,
    pub stream_path: String,
    pub client_latency_ms: Option<f64>,
    pub input_type: InputType,
    pub click_gain: f32,
    pub lead_in_beats: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:8000".into(),
            stream_base: None,
            session_path: "/api/v1/session".into(),
            drills_path: "/v1/drills".into(),
            stream_path: "/v1/stream".into(),
            client_latency_ms: None,
            input_type: InputType::Midi,
            click_gain: 0.6,
            lead_in_beats: 0,
        }
    }
}

impl ClientConfig {
    /// Reads `explicit` if given, else the per-user config file if it exists,
    /// else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => default_path().filter(|path| path.exists()),
        };
        let config = match path {
            Some(path) => Self::from_file(&path)?,
            None => {
                debug!("no config file; using defaults");
                Self::default()
            }
        };
        config.validated()
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn validated(mut self) -> Result<Self, ConfigError> {
        self.api_base = self.api_base.trim_end_matches('/').to_string();
        check_url("api_base", &self.api_base)?;
        if let Some(stream_base) = &self.stream_base {
            check_url("stream_base", stream_base)?;
        }
        self.click_gain = self.click_gain.clamp(0.0, 1.0);
        Ok(self)
    }

    pub fn endpoints(&self) -> Endpoints {
        Endpoints {
            api_base: self.api_base.clone(),
            stream_base: self
                .stream_base
                .clone()
                .unwrap_or_else(|| websocket_base(&self.api_base)),
            session_path: self.session_path.clone(),
            drills_path: self.drills_path.clone(),
            stream_path: self.stream_path.clone(),
        }
    }
}

pub fn default_path() -> Option<PathBuf> {
    Some(dirs::config_dir()?.join("rudiment").join("config.yaml"))
}

fn check_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    let ok = ["http://", "https://", "ws://", "wss://"]
        .iter()
        .any(|scheme| value.len() > scheme.len() && value.starts_with(scheme));
    if ok {
        Ok(())
    } else {
        Err(ConfigError::BadUrl {
            field,
            value: value.to_string(),
        })
    }
}
