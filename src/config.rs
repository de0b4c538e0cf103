//! softpack-frontend configuration
//!
//! Read from a TOML file, by default at:
//! - Linux: ~/.config/softpack/config.toml
//! - macOS: ~/Library/Application Support/softpack/config.toml
//!
//! ```toml
//! [artefacts]
//! repo = "https://gitlab.example.com/softpack/artefacts.git"
//! username = "softpack"
//! token = "..."
//! cache = "/var/cache/softpack/artefacts"
//! refresh_interval_secs = 60
//!
//! [server]
//! host = "0.0.0.0"
//! port = 8080
//! path_prefix = "/softpack"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, Result};
use crate::git::{CloneOptions, CommitIdentity, Credentials};

/// softpack-frontend configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub artefacts: ArtefactsConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Artefact repository settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtefactsConfig {
    /// Remote URL or local path of the artefact repo
    #[serde(default)]
    pub repo: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Takes precedence over username/password
    #[serde(default)]
    pub token: Option<String>,

    /// On-disk clone; a temporary directory is used when unset
    #[serde(default)]
    pub cache: Option<PathBuf>,

    #[serde(default = "default_committer_name")]
    pub committer_name: String,

    #[serde(default = "default_committer_email")]
    pub committer_email: String,

    /// Seconds between remote pulls; 0 disables
    #[serde(default)]
    pub refresh_interval_secs: u64,
}

fn default_committer_name() -> String {
    CommitIdentity::default().name
}

fn default_committer_email() -> String {
    CommitIdentity::default().email
}

impl Default for ArtefactsConfig {
    fn default() -> Self {
        Self {
            repo: String::new(),
            username: None,
            password: None,
            token: None,
            cache: None,
            committer_name: default_committer_name(),
            committer_email: default_committer_email(),
            refresh_interval_secs: 0,
        }
    }
}

impl ArtefactsConfig {
    pub fn credentials(&self) -> Option<Credentials> {
        if let Some(token) = self.token.as_ref().filter(|t| !t.is_empty()) {
            return Some(Credentials::Token(token.clone()));
        }

        self.username
            .as_ref()
            .filter(|u| !u.is_empty())
            .map(|username| Credentials::Basic {
                username: username.clone(),
                password: self.password.clone().unwrap_or_default(),
            })
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Mount every route under this prefix
    #[serde(default)]
    pub path_prefix: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path_prefix: String::new(),
        }
    }
}

/// Notification bus settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Per-connection send timeout in milliseconds
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

fn default_send_timeout_ms() -> u64 {
    crate::socket_server::DEFAULT_SEND_TIMEOUT.as_millis() as u64
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

impl BusConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("softpack").join("config.toml"))
    }

    /// Load from `path`, or the default location when None
    ///
    /// A missing file at the default location yields the defaults; an
    /// explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load_from(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| CatalogError::ConfigError {
            message: format!("Failed to read {}: {}", path.display(), e),
        })?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| CatalogError::ConfigError {
            message: format!("Failed to parse config: {}", e),
        })
    }

    /// How to clone or open the artefact repo
    pub fn clone_options(&self) -> Result<CloneOptions> {
        if self.artefacts.repo.is_empty() {
            return Err(CatalogError::ConfigError {
                message: "artefacts.repo is not set".to_string(),
            });
        }

        Ok(CloneOptions {
            remote: self.artefacts.repo.clone(),
            cache: self.artefacts.cache.clone(),
            credentials: self.artefacts.credentials(),
            identity: CommitIdentity {
                name: self.artefacts.committer_name.clone(),
                email: self.artefacts.committer_email.clone(),
            },
        })
    }
}
