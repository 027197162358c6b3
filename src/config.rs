//! Configuration for the Kartavya server.
//!
//! Settings are read from `.kartavya/kartavya.toml` and layered:
//! file → environment → CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 4000
//! dev_mode = false
//!
//! [database]
//! path = ".kartavya/kartavya.db"
//!
//! [auth]
//! token_secret = "change-me-to-at-least-32-bytes-of-secret"
//! token_ttl_secs = 86400
//!
//! [logging]
//! filter = "kartavya=info,tower_http=info"
//! format = "compact"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_DIR: &str = ".kartavya";
pub const CONFIG_FILE: &str = "kartavya.toml";

/// Secrets shorter than this trigger a validation warning.
const MIN_SECRET_LEN: usize = 32;

/// Longest accepted session lifetime (ten years).
pub const MAX_TOKEN_TTL_SECS: u64 = 315_360_000;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Compact => write!(f, "compact"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: compact, json", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Permissive CORS for a local front-end dev server.
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4000
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("kartavya.db")
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSection {
    /// HMAC key for session tokens. A random per-process key is used when unset,
    /// which invalidates sessions on restart.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_secret: Option<String>,
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
}

fn default_token_ttl_secs() -> u64 {
    86_400
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            token_secret: None,
            token_ttl_secs: default_token_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_filter() -> String {
    "kartavya=info,tower_http=info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            format: LogFormat::default(),
        }
    }
}

/// On-disk representation of `kartavya.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KartavyaToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl KartavyaToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse kartavya.toml")
    }

    /// Load from `path`, or return defaults if the file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file, creating the parent directory.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content =
            toml::to_string_pretty(self).context("Failed to serialize kartavya.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Return human-readable warnings for suspicious settings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.server.port == 0 {
            warnings.push("server.port is 0; the OS will pick a random port".to_string());
        }
        match &self.auth.token_secret {
            Some(secret) if secret.len() < MIN_SECRET_LEN => warnings.push(format!(
                "auth.token_secret is {} bytes; use at least {}",
                secret.len(),
                MIN_SECRET_LEN
            )),
            Some(_) => {}
            None => warnings.push(
                "auth.token_secret is not set; sessions will not survive a restart".to_string(),
            ),
        }
        if self.auth.token_ttl_secs == 0 {
            warnings.push("auth.token_ttl_secs is 0; every session expires immediately".to_string());
        } else if self.auth.token_ttl_secs > MAX_TOKEN_TTL_SECS {
            warnings.push(format!(
                "auth.token_ttl_secs is {}; the maximum is {}",
                self.auth.token_ttl_secs, MAX_TOKEN_TTL_SECS
            ));
        }
        if tracing_subscriber::EnvFilter::try_new(&self.logging.filter).is_err() {
            warnings.push(format!(
                "logging.filter '{}' is not a valid filter directive",
                self.logging.filter
            ));
        }
        warnings
    }
}

/// Values supplied on the command line; `None` leaves the lower layers alone.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub db_path: Option<PathBuf>,
    pub dev_mode: bool,
    pub verbose: bool,
}

/// Effective runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub dev_mode: bool,
    pub db_path: PathBuf,
    pub token_secret: Option<String>,
    pub token_ttl_secs: u64,
    pub log_filter: String,
    pub log_format: LogFormat,
}

impl From<KartavyaToml> for Config {
    fn from(toml: KartavyaToml) -> Self {
        Self {
            host: toml.server.host,
            port: toml.server.port,
            dev_mode: toml.server.dev_mode,
            db_path: toml.database.path,
            token_secret: toml.auth.token_secret,
            token_ttl_secs: toml.auth.token_ttl_secs,
            log_filter: toml.logging.filter,
            log_format: toml.logging.format,
        }
    }
}

/// Effective values back in file form, for `config show` and validation.
impl From<&Config> for KartavyaToml {
    fn from(config: &Config) -> Self {
        Self {
            server: ServerSection {
                host: config.host.clone(),
                port: config.port,
                dev_mode: config.dev_mode,
            },
            database: DatabaseSection {
                path: config.db_path.clone(),
            },
            auth: AuthSection {
                token_secret: config.token_secret.clone(),
                token_ttl_secs: config.token_ttl_secs,
            },
            logging: LoggingSection {
                filter: config.log_filter.clone(),
                format: config.log_format,
            },
        }
    }
}

impl Config {
    /// Default location of the config file under `project_dir`.
    pub fn default_path(project_dir: &Path) -> PathBuf {
        project_dir.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Build the effective configuration: file, then process environment, then CLI.
    pub fn load(path: &Path, cli: &CliOverrides) -> Result<Self> {
        let toml = KartavyaToml::load_or_default(path)?;
        let mut config = Config::from(toml);
        config.apply_env_from(|key| std::env::var(key).ok())?;
        config.apply_cli(cli);
        config.check_limits()?;
        Ok(config)
    }

    /// Apply `KARTAVYA_*` overrides read through `lookup`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("KARTAVYA_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("KARTAVYA_PORT") {
            self.port = port
                .parse()
                .with_context(|| format!("Invalid KARTAVYA_PORT '{}'", port))?;
        }
        if let Some(path) = lookup("KARTAVYA_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        if let Some(secret) = lookup("KARTAVYA_TOKEN_SECRET") {
            self.token_secret = Some(secret);
        }
        if let Some(ttl) = lookup("KARTAVYA_TOKEN_TTL_SECS") {
            self.token_ttl_secs = ttl
                .parse()
                .with_context(|| format!("Invalid KARTAVYA_TOKEN_TTL_SECS '{}'", ttl))?;
            if self.token_ttl_secs > MAX_TOKEN_TTL_SECS {
                anyhow::bail!(
                    "KARTAVYA_TOKEN_TTL_SECS '{}' exceeds the maximum of {} seconds",
                    ttl,
                    MAX_TOKEN_TTL_SECS
                );
            }
        }
        if let Some(filter) = lookup("KARTAVYA_LOG") {
            self.log_filter = filter;
        }
        if let Some(format) = lookup("KARTAVYA_LOG_FORMAT") {
            self.log_format = format.parse()?;
        }
        Ok(())
    }

    /// Reject values the server cannot run with.
    pub fn check_limits(&self) -> Result<()> {
        if self.token_ttl_secs > MAX_TOKEN_TTL_SECS {
            anyhow::bail!(
                "token_ttl_secs {} exceeds the maximum of {} seconds",
                self.token_ttl_secs,
                MAX_TOKEN_TTL_SECS
            );
        }
        Ok(())
    }

    pub fn apply_cli(&mut self, cli: &CliOverrides) {
        if let Some(host) = &cli.host {
            self.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(path) = &cli.db_path {
            self.db_path = path.clone();
        }
        if cli.dev_mode {
            self.dev_mode = true;
        }
        if cli.verbose {
            self.log_filter = "kartavya=debug,tower_http=debug,info".to_string();
        }
    }
}
