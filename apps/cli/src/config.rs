//! CLI configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/chunkup/config.toml`
//! - Windows: `%APPDATA%/chunkup/config.toml`

use std::path::{Path, PathBuf};

use anyhow::Context;
use chunkup_uploader::UploadConfig;
use serde::{Deserialize, Serialize};

/// Environment variable that overrides the stored bearer token.
pub const TOKEN_ENV: &str = "CHUNKUP_TOKEN";

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the upload server.
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Bearer token sent with every request.
    #[serde(default)]
    pub token: String,

    /// Chunking, limits and retry tuning.
    #[serde(default)]
    pub upload: UploadConfig,
}

fn default_server_url() -> String {
    "http://127.0.0.1:8000".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            token: String::new(),
            upload: UploadConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or from the default location.
    ///
    /// A missing file at the default location is created with defaults; a
    /// missing explicit path is an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = path {
            return Self::read(path);
        }

        let path = config_path();
        if path.exists() {
            Self::read(&path)
        } else {
            let config = Config::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    fn read(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Saves the configuration to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // The file holds a bearer token.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Applies command-line and environment overrides.
    ///
    /// Token precedence: flag, then `CHUNKUP_TOKEN`, then the file.
    pub fn apply_overrides(
        &mut self,
        server_url: Option<String>,
        token: Option<String>,
        env_token: Option<String>,
    ) {
        if let Some(url) = server_url {
            self.server_url = url;
        }
        if let Some(token) = token.or(env_token).filter(|t| !t.is_empty()) {
            self.token = token;
        }
    }
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("chunkup").join("config.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("chunkup")
            .join("config.toml")
    }
}
