//! Configuration management for the terminal bridge.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/termbridge/config.toml`.

use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use protocol::{Framing, TerminalSize};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Port the listener binds when nothing else is configured.
pub const DEFAULT_PORT: u16 = 3001;

/// Address the listener binds when nothing else is configured.
pub const DEFAULT_BIND: &str = "0.0.0.0";

/// Shell used on POSIX systems when `$SHELL` is not set.
pub const FALLBACK_SHELL: &str = "/bin/sh";

/// Shell used on Windows.
pub const WINDOWS_SHELL: &str = "powershell.exe";

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("port must be between 1 and 65535, got {0}")]
    InvalidPort(u16),

    #[error("bind must be an IP address, got {0}")]
    InvalidBindAddress(String),

    #[error("initial terminal size must be non-zero, got {0}")]
    InvalidTerminalSize(TerminalSize),

    #[error("shell path does not exist: {0}")]
    InvalidShellPath(String),

    #[error("log level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the bridge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Listener configuration.
    pub server: ServerConfig,

    /// Per-session process configuration.
    pub session: SessionConfig,

    /// Logging configuration.
    pub log: LogConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// IP address to bind.
    pub bind: String,

    /// TCP port to bind.
    pub port: u16,
}

/// Configuration applied to every spawned shell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Shell program. Platform default when unset.
    pub shell: Option<String>,

    /// Working directory. Home directory when unset.
    pub cwd: Option<PathBuf>,

    /// Initial terminal width.
    pub cols: u16,

    /// Initial terminal height.
    pub rows: u16,

    /// How inbound frames are split into control and data.
    pub framing: Framing,

    /// Value exported as `TERM` to the shell.
    pub term: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub level: String,

    /// Directory for rolling log files. Console only when unset.
    pub file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        let size = TerminalSize::default();
        Self {
            shell: None,
            cwd: None,
            cols: size.cols,
            rows: size.rows,
            framing: Framing::default(),
            term: "xterm-256color".to_string(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl SessionConfig {
    /// The shell to spawn: the configured one, else the platform default.
    pub fn resolved_shell(&self) -> String {
        match &self.shell {
            Some(shell) if !shell.is_empty() => shell.clone(),
            _ => default_shell(),
        }
    }

    /// The working directory for new shells.
    pub fn resolved_cwd(&self) -> Option<PathBuf> {
        self.cwd.clone().or_else(dirs::home_dir)
    }

    /// The geometry every PTY starts with.
    pub fn initial_size(&self) -> TerminalSize {
        TerminalSize::new(self.cols, self.rows)
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("termbridge")
        .join("config.toml")
}

/// Returns the default shell for the current platform.
///
/// Windows always gets PowerShell. Elsewhere `$SHELL` wins, falling back to
/// `/bin/sh`.
pub fn default_shell() -> String {
    if cfg!(windows) {
        return WINDOWS_SHELL.to_string();
    }

    match std::env::var("SHELL") {
        Ok(shell) if !shell.is_empty() => shell,
        _ => FALLBACK_SHELL.to_string(),
    }
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - TERMBRIDGE_PORT: Override the listening port
    /// - TERMBRIDGE_BIND: Override the bind address
    /// - TERMBRIDGE_SHELL: Override the shell program
    /// - TERMBRIDGE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Some(port) = non_empty_env("TERMBRIDGE_PORT") {
            match port.parse::<u16>() {
                Ok(port) => {
                    tracing::info!("Overriding port from environment: {}", port);
                    self.server.port = port;
                }
                Err(e) => {
                    tracing::warn!("Ignoring invalid TERMBRIDGE_PORT {:?}: {}", port, e);
                }
            }
        }

        if let Some(bind) = non_empty_env("TERMBRIDGE_BIND") {
            tracing::info!("Overriding bind address from environment: {}", bind);
            self.server.bind = bind;
        }

        if let Some(shell) = non_empty_env("TERMBRIDGE_SHELL") {
            tracing::info!("Overriding shell from environment: {}", shell);
            self.session.shell = Some(shell);
        }

        if let Some(level) = non_empty_env("TERMBRIDGE_LOG_LEVEL") {
            tracing::info!("Overriding log level from environment: {}", level);
            self.log.level = level;
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort(self.server.port));
        }

        self.socket_addr()?;

        let size = self.session.initial_size();
        if !size.is_valid() {
            return Err(ConfigError::InvalidTerminalSize(size));
        }

        // Only an explicitly configured shell is checked. A bad $SHELL fails
        // individual sessions instead of the whole listener.
        if let Some(shell) = &self.session.shell {
            let shell_path = Path::new(shell);
            let found = if shell_path.is_absolute() {
                shell_path.exists()
            } else {
                which::which(shell).is_ok()
            };
            if !found {
                return Err(ConfigError::InvalidShellPath(shell.clone()));
            }
        }

        let level = self.log.level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.log.level.clone()));
        }

        Ok(())
    }

    /// The socket address the listener binds.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .server
            .bind
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddress(self.server.bind.clone()))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    const ENV_KEYS: &[&str] = &[
        "TERMBRIDGE_PORT",
        "TERMBRIDGE_BIND",
        "TERMBRIDGE_SHELL",
        "TERMBRIDGE_LOG_LEVEL",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.session.cols, 80);
        assert_eq!(config.session.rows, 24);
        assert_eq!(config.session.framing, Framing::Legacy);
        assert_eq!(config.session.term, "xterm-256color");
        assert!(config.session.shell.is_none());
        assert_eq!(config.log.level, "info");
        assert!(config.log.file.is_none());
    }

    #[test]
    fn test_from_toml_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[server]
port = 8080

[session]
framing = "tagged"
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.session.framing, Framing::Tagged);
        assert_eq!(config.session.cols, 80);
    }

    #[test]
    fn test_from_toml_full() {
        let toml = r#"
[server]
bind = "127.0.0.1"
port = 9000

[session]
shell = "/bin/zsh"
cwd = "/srv/work"
cols = 132
rows = 43
framing = "legacy"
term = "xterm"

[log]
level = "trace"
file = "/var/log/termbridge"
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.session.shell.as_deref(), Some("/bin/zsh"));
        assert_eq!(config.session.cwd, Some(PathBuf::from("/srv/work")));
        assert_eq!(config.session.initial_size(), TerminalSize::new(132, 43));
        assert_eq!(config.session.term, "xterm");
        assert_eq!(config.log.level, "trace");
        assert_eq!(config.log.file, Some(PathBuf::from("/var/log/termbridge")));
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let result = Config::from_toml("[server\nport = 1");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_from_toml_unknown_framing() {
        let toml = r#"
[session]
framing = "sniffed"
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_roundtrip_custom() {
        let mut original = Config::default();
        original.server.port = 4242;
        original.session.shell = Some("/bin/sh".to_string());
        original.session.framing = Framing::Tagged;

        let loaded = Config::from_toml(&original.to_toml().unwrap()).unwrap();
        assert_eq!(original, loaded);
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.server.port = 5555;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.server.port, 5555);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load(temp_dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_socket_addr() {
        let mut config = Config::default();
        config.server.bind = "127.0.0.1".to_string();
        config.server.port = 3100;
        assert_eq!(config.socket_addr().unwrap(), "127.0.0.1:3100".parse().unwrap());

        config.server.bind = "not-an-ip".to_string();
        assert_eq!(
            config.socket_addr(),
            Err(ConfigError::InvalidBindAddress("not-an-ip".to_string()))
        );
    }

    #[test]
    fn test_validate_default() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_port_zero() {
        let mut config = Config::default();
        config.server.port = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidPort(0)));
    }

    #[test]
    fn test_validate_terminal_size() {
        let mut config = Config::default();
        config.session.rows = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidTerminalSize(TerminalSize::new(80, 0)))
        );
    }

    #[test]
    fn test_validate_missing_shell() {
        let mut config = Config::default();
        config.session.shell = Some("/nonexistent/shell".to_string());
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidShellPath("/nonexistent/shell".to_string()))
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_validate_shell_on_path() {
        let mut config = Config::default();
        config.session.shell = Some("sh".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = Config::default();
        config.log.level = "DEBUG".to_string();
        assert!(config.validate().is_ok());

        config.log.level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );
    }

    #[test]
    fn test_resolved_shell_prefers_configured() {
        let mut session = SessionConfig::default();
        session.shell = Some("/bin/dash".to_string());
        assert_eq!(session.resolved_shell(), "/bin/dash");
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn test_default_shell_from_env() {
        let saved = std::env::var("SHELL").ok();

        std::env::set_var("SHELL", "/usr/bin/fish");
        assert_eq!(default_shell(), "/usr/bin/fish");

        std::env::remove_var("SHELL");
        assert_eq!(default_shell(), FALLBACK_SHELL);

        std::env::set_var("SHELL", "");
        assert_eq!(SessionConfig::default().resolved_shell(), FALLBACK_SHELL);

        match saved {
            Some(shell) => std::env::set_var("SHELL", shell),
            None => std::env::remove_var("SHELL"),
        }
    }

    #[test]
    fn test_resolved_cwd() {
        let mut session = SessionConfig::default();
        assert_eq!(session.resolved_cwd(), dirs::home_dir());

        session.cwd = Some(PathBuf::from("/tmp"));
        assert_eq!(session.resolved_cwd(), Some(PathBuf::from("/tmp")));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        std::env::set_var("TERMBRIDGE_PORT", "4000");
        std::env::set_var("TERMBRIDGE_BIND", "127.0.0.1");
        std::env::set_var("TERMBRIDGE_SHELL", "/bin/sh");
        std::env::set_var("TERMBRIDGE_LOG_LEVEL", "debug");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.server.port, 4000);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.session.shell.as_deref(), Some("/bin/sh"));
        assert_eq!(config.log.level, "debug");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_invalid_port_ignored() {
        clear_env();
        std::env::set_var("TERMBRIDGE_PORT", "not-a-port");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.server.port, DEFAULT_PORT);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        clear_env();
        std::env::set_var("TERMBRIDGE_LOG_LEVEL", "");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.log.level, "info");

        clear_env();
    }
}
