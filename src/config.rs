//! TOML configuration for napy.
//!
//! The file is read once per invocation and turned into an immutable
//! [`AppConfig`]. Notification channels are resolved here, once, into
//! [`ChannelSetting::Enabled`] or [`ChannelSetting::Disabled`]; nothing
//! downstream re-checks individual fields.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::capture::DEFAULT_CAPTURE_LIMIT;

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DATABASE_FILE_NAME: &str = "napy.db";
pub const LOG_FILE_NAME: &str = "napy.log";
pub const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";
pub const DEFAULT_SMTP_PORT: u16 = 465;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("neither XDG_CONFIG_HOME nor HOME is set; pass --config")]
    NoHome,
}

/// Directory holding the config file, database and diagnostic log.
pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(xdg).join("napy"));
    }
    std::env::var_os("HOME")
        .filter(|v| !v.is_empty())
        .map(|home| PathBuf::from(home).join(".config").join("napy"))
        .ok_or(ConfigError::NoHome)
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(default_config_dir()?.join(CONFIG_FILE_NAME))
}

// ---------------------------------------------------------------------------
// On-disk shape
// ---------------------------------------------------------------------------

/// The config file exactly as written; every field optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub shell: Option<String>,
    pub interactive_shell: bool,
    pub capture_limit_bytes: Option<usize>,
    pub database: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub telegram: RawTelegram,
    pub email: RawEmail,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawTelegram {
    pub api_key: Option<String>,
    pub chat_id: Option<String>,
    pub api_base: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawEmail {
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_user: Option<String>,
    pub smtp_pass: Option<String>,
    pub sender: Option<String>,
    pub recipient: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Whether a notification channel is in use, decided at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSetting<T> {
    Disabled,
    Enabled(T),
}

impl<T> ChannelSetting<T> {
    pub fn is_enabled(&self) -> bool {
        matches!(self, ChannelSetting::Enabled(_))
    }

    pub fn enabled(&self) -> Option<&T> {
        match self {
            ChannelSetting::Enabled(t) => Some(t),
            ChannelSetting::Disabled => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramSettings {
    pub api_key: String,
    pub chat_id: String,
    pub api_base: String,
}

#[derive(Clone, PartialEq, Eq)]
pub struct EmailSettings {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    pub smtp_pass: String,
    pub sender: String,
    pub recipient: String,
}

impl std::fmt::Debug for EmailSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailSettings")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_user", &self.smtp_user)
            .field("smtp_pass", &"<redacted>")
            .field("sender", &self.sender)
            .field("recipient", &self.recipient)
            .finish()
    }
}

/// Read-once configuration handed to the runner and notifier.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub shell: Option<String>,
    pub interactive_shell: bool,
    pub capture_limit_bytes: usize,
    pub database: PathBuf,
    pub log_file: PathBuf,
    pub telegram: ChannelSetting<TelegramSettings>,
    pub email: ChannelSetting<EmailSettings>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl AppConfig {
    /// Config with no channels, storing everything under `dir`.
    pub fn with_base_dir(dir: &Path) -> Self {
        Self::from_raw(RawConfig::default(), dir)
    }

    /// Resolve a parsed file. Relative paths are taken from `base_dir`.
    pub fn from_raw(raw: RawConfig, base_dir: &Path) -> Self {
        let resolve = |p: Option<PathBuf>, default: &str| match p {
            Some(p) if p.is_absolute() => p,
            Some(p) => base_dir.join(p),
            None => base_dir.join(default),
        };

        let telegram = match (non_blank(raw.telegram.api_key), non_blank(raw.telegram.chat_id)) {
            (Some(api_key), Some(chat_id)) => ChannelSetting::Enabled(TelegramSettings {
                api_key,
                chat_id,
                api_base: non_blank(raw.telegram.api_base)
                    .unwrap_or_else(|| DEFAULT_TELEGRAM_API_BASE.to_string()),
            }),
            _ => ChannelSetting::Disabled,
        };

        let e = raw.email;
        let email = match (
            non_blank(e.smtp_host),
            non_blank(e.smtp_user),
            non_blank(e.smtp_pass),
            non_blank(e.sender),
            non_blank(e.recipient),
        ) {
            (Some(smtp_host), Some(smtp_user), Some(smtp_pass), Some(sender), Some(recipient)) => {
                ChannelSetting::Enabled(EmailSettings {
                    smtp_host,
                    smtp_port: e.smtp_port.unwrap_or(DEFAULT_SMTP_PORT),
                    smtp_user,
                    smtp_pass,
                    sender,
                    recipient,
                })
            }
            _ => ChannelSetting::Disabled,
        };

        Self {
            shell: non_blank(raw.shell),
            interactive_shell: raw.interactive_shell,
            capture_limit_bytes: raw.capture_limit_bytes.unwrap_or(DEFAULT_CAPTURE_LIMIT),
            database: resolve(raw.database, DATABASE_FILE_NAME),
            log_file: resolve(raw.log_file, LOG_FILE_NAME),
            telegram,
            email,
        }
    }

    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(Self::from_raw(raw, base_dir))
    }

    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::Missing(path.to_path_buf()))
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let config = Self::parse(&content, path)?;
        debug!(
            path = %path.display(),
            telegram = config.telegram.is_enabled(),
            email = config.email.is_enabled(),
            "loaded configuration"
        );
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

pub const CONFIG_TEMPLATE: &str = r#"# napy configuration
#
# Shell used to run commands. Defaults to $SHELL, then /bin/sh.
# shell = "/bin/zsh"

# Run the shell with -ic instead of -c so aliases and rc files are loaded.
# interactive_shell = false

# Bytes of stdout/stderr kept per run; anything beyond is dropped.
# capture_limit_bytes = 65536

# Run log database and diagnostic log, relative to this file's directory.
# database = "napy.db"
# log_file = "napy.log"

# Telegram notifications are sent when both fields are set.
[telegram]
api_key = ""
chat_id = ""

# Email notifications are sent when every field except smtp_port is set.
# Port 587 uses STARTTLS; any other port uses implicit TLS.
[email]
smtp_host = ""
smtp_port = 465
smtp_user = ""
smtp_pass = ""
sender = ""
recipient = ""
"#;

/// Write the commented template to `path`, creating parent directories.
pub fn write_template(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, CONFIG_TEMPLATE)?;
    info!(path = %path.display(), "wrote configuration template");
    Ok(())
}
