use crate::dispatch::{DispatchConfig, DEFAULT_INTER_SEND_DELAY_SECS};
use crate::session::bot_api::{DEFAULT_API_BASE_URL, DEFAULT_RETRY_AFTER_SECS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info};

pub const SETTINGS_ENV_VAR: &str = "GROUPCAST_SETTINGS";
pub const DEFAULT_SETTINGS_FILE: &str = "settings.toml";
pub const GROUPS_FILE: &str = "groups.csv";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid setting in {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ConfigError + '_ {
    move |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_base_url: String,
    pub bot_token: String,
    pub inter_send_delay_secs: u64,
    /// Wait applied when the provider rate-limits without saying for how long.
    pub default_rate_limit_secs: u64,
    pub data_dir: PathBuf,
    pub sessions_dir: PathBuf,
    pub database_file: PathBuf,
    #[serde(skip)]
    base_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            bot_token: String::new(),
            inter_send_delay_secs: DEFAULT_INTER_SEND_DELAY_SECS,
            default_rate_limit_secs: DEFAULT_RETRY_AFTER_SECS,
            data_dir: PathBuf::from("./data"),
            sessions_dir: PathBuf::from("./sessions"),
            database_file: PathBuf::from("analytics.db"),
            base_dir: PathBuf::from("."),
        }
    }
}

impl Settings {
    /// `$GROUPCAST_SETTINGS`, or `settings.toml` in the working directory.
    pub fn settings_path() -> PathBuf {
        std::env::var_os(SETTINGS_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE))
    }

    /// Read settings from `path`, writing the defaults first if the file is
    /// missing. A file that does not parse is moved aside to `<path>.bak`
    /// and replaced by the defaults.
    pub fn load_or_init(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut settings = match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Settings>(&contents) {
                Ok(settings) => settings,
                Err(e) => {
                    let backup = backup_path(path);
                    error!("Invalid settings file {}: {}; moving it to {}", path.display(), e, backup.display());
                    std::fs::rename(path, &backup).map_err(io_error(path))?;
                    Self::write_defaults(path)?
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No settings file at {}, writing defaults", path.display());
                Self::write_defaults(path)?
            }
            Err(e) => return Err(io_error(path)(e)),
        };

        settings.validate(path)?;
        settings.base_dir = base_dir;
        Ok(settings)
    }

    fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        if self.inter_send_delay_secs == 0 {
            return Err(ConfigError::Invalid {
                path: path.to_path_buf(),
                reason: "inter_send_delay_secs must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    fn write_defaults(path: &Path) -> Result<Self, ConfigError> {
        let settings = Self::default();
        settings.save(path)?;
        Ok(settings)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents).map_err(io_error(path))
    }

    /// Expand `~` and anchor relative paths at the settings file's directory.
    pub fn resolve_path(&self, p: &Path) -> PathBuf {
        if let Ok(rest) = p.strip_prefix("~") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.base_dir.join(p)
        }
    }

    pub fn data_path(&self) -> PathBuf {
        self.resolve_path(&self.data_dir)
    }

    pub fn sessions_path(&self) -> PathBuf {
        self.resolve_path(&self.sessions_dir)
    }

    pub fn groups_file(&self) -> PathBuf {
        self.data_path().join(GROUPS_FILE)
    }

    pub fn database_path(&self) -> PathBuf {
        if self.database_file.is_absolute() {
            self.database_file.clone()
        } else {
            self.data_path().join(&self.database_file)
        }
    }

    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        for dir in [self.data_path(), self.sessions_path()] {
            std::fs::create_dir_all(&dir).map_err(io_error(&dir))?;
        }
        Ok(())
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig::default().with_inter_send_delay(self.inter_send_delay_secs)
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".bak");
    path.with_file_name(name)
}
