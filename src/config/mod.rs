//! Configuration management.
//!
//! Layered like most of our tools: built-in defaults, then an optional TOML file, then
//! environment overrides.
//!
//! ```toml
//! command_timeout_secs = 30
//!
//! [http]
//! timeout_ms = 30000
//! connect_timeout_ms = 3000
//!
//! [native]
//! busy_timeout_ms = 5000
//!
//! [logging]
//! level = "sqlbridge=debug"
//! format = "json"
//! file = "/var/log/sqlbridge.log"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::http::HttpClientConfig;
use crate::native::OpenOptions;

/// Default command timeout.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment variable overriding the command timeout, in seconds.
pub const ENV_COMMAND_TIMEOUT_SECS: &str = "SQLBRIDGE_COMMAND_TIMEOUT_SECS";
/// Environment variable overriding the HTTP request timeout, in milliseconds.
pub const ENV_HTTP_TIMEOUT_MS: &str = "SQLBRIDGE_HTTP_TIMEOUT_MS";
/// Environment variable overriding the HTTP connect timeout, in milliseconds.
pub const ENV_HTTP_CONNECT_TIMEOUT_MS: &str = "SQLBRIDGE_HTTP_CONNECT_TIMEOUT_MS";
/// Environment variable overriding the native busy timeout, in milliseconds.
pub const ENV_BUSY_TIMEOUT_MS: &str = "SQLBRIDGE_BUSY_TIMEOUT_MS";
/// Environment variable overriding the log format (`json` or `pretty`).
pub const ENV_LOG_FORMAT: &str = "SQLBRIDGE_LOG_FORMAT";

/// Driver configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Default timeout for new commands. Advisory on the native transport, the request
    /// timeout on HTTP.
    pub command_timeout: Duration,
    /// HTTP client timeouts.
    pub http: HttpClientConfig,
    /// Native engine settings.
    pub native: NativeSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Native engine settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeSettings {
    /// How long a connection waits on a locked database, in milliseconds.
    pub busy_timeout_ms: u64,
}

impl Default for NativeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggingSettings {
    /// Filter directive, such as `sqlbridge=debug`.
    pub level: Option<String>,
    /// Output format: `json` or `pretty`.
    pub format: Option<String>,
    /// Log file; stderr when unset.
    pub file: Option<PathBuf>,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Command timeout in seconds.
    pub command_timeout_secs: Option<u64>,
    /// HTTP section.
    pub http: Option<ConfigFileHttp>,
    /// Native section.
    pub native: Option<ConfigFileNative>,
    /// Logging section.
    pub logging: Option<ConfigFileLogging>,
}

/// HTTP section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileHttp {
    /// Request timeout.
    pub timeout_ms: Option<u64>,
    /// Connect timeout.
    pub connect_timeout_ms: Option<u64>,
}

/// Native section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileNative {
    /// Busy timeout.
    pub busy_timeout_ms: Option<u64>,
}

/// Logging section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileLogging {
    /// Filter directive.
    pub level: Option<String>,
    /// Output format.
    pub format: Option<String>,
    /// Log file.
    pub file: Option<String>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            http: HttpClientConfig::default(),
            native: NativeSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl DriverConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> crate::Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| crate::Error::OperationFailed {
                operation: "read_config_file".to_string(),
                cause: format!("{}: {e}", path.display()),
            })?;

        Self::parse_toml(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid config file.
    pub fn parse_toml(contents: &str) -> crate::Result<Self> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| crate::Error::OperationFailed {
                operation: "parse_config_file".to_string(),
                cause: e.to_string(),
            })?;

        Ok(Self::from_config_file(file))
    }

    /// Loads configuration from the default location.
    ///
    /// Looks for `sqlbridge/config.toml` in the platform config dir, then in
    /// `~/.config/`. Returns defaults when neither exists or parses.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default();
        };

        let candidates = [
            base_dirs.config_dir().join("sqlbridge").join("config.toml"),
            base_dirs
                .home_dir()
                .join(".config")
                .join("sqlbridge")
                .join("config.toml"),
        ];
        for path in candidates {
            if !path.exists() {
                continue;
            }
            match Self::load_from_file(&path) {
                Ok(config) => return config,
                Err(e) => tracing::warn!(path = %path.display(), "Ignoring config file: {e}"),
            }
        }

        Self::default()
    }

    /// Converts a `ConfigFile` to `DriverConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(secs) = file.command_timeout_secs {
            config.command_timeout = Duration::from_secs(secs);
        }
        if let Some(http) = file.http {
            if let Some(v) = http.timeout_ms {
                config.http.timeout_ms = v;
            }
            if let Some(v) = http.connect_timeout_ms {
                config.http.connect_timeout_ms = v;
            }
        }
        if let Some(v) = file.native.and_then(|native| native.busy_timeout_ms) {
            config.native.busy_timeout_ms = v;
        }
        if let Some(logging) = file.logging {
            config.logging.level = logging.level;
            config.logging.format = logging.format;
            config.logging.file = logging.file.map(PathBuf::from);
        }

        config
    }

    /// Applies overrides from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Applies overrides from any variable lookup.
    ///
    /// Values that do not parse are ignored with a warning.
    #[must_use]
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |name: &str| -> Option<u64> {
            let raw = lookup(name)?;
            raw.trim().parse::<u64>().map_or_else(
                |e| {
                    tracing::warn!(name, value = %raw, "Ignoring invalid override: {e}");
                    None
                },
                Some,
            )
        };

        if let Some(secs) = number(ENV_COMMAND_TIMEOUT_SECS) {
            self.command_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = number(ENV_HTTP_TIMEOUT_MS) {
            self.http.timeout_ms = ms;
        }
        if let Some(ms) = number(ENV_HTTP_CONNECT_TIMEOUT_MS) {
            self.http.connect_timeout_ms = ms;
        }
        if let Some(ms) = number(ENV_BUSY_TIMEOUT_MS) {
            self.native.busy_timeout_ms = ms;
        }
        if let Some(format) = lookup(ENV_LOG_FORMAT) {
            self.logging.format = Some(format);
        }
        self
    }

    /// Sets the default command timeout.
    #[must_use]
    pub const fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Sets the HTTP client timeouts.
    #[must_use]
    pub const fn with_http(mut self, http: HttpClientConfig) -> Self {
        self.http = http;
        self
    }

    /// Options for opening native connections.
    #[must_use]
    pub const fn open_options(&self) -> OpenOptions {
        OpenOptions {
            busy_timeout: Duration::from_millis(self.native.busy_timeout_ms),
        }
    }
}
