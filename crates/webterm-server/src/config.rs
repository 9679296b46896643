//! Server configuration: TOML file + CLI overrides.

use crate::session::{ShellCommand, SessionSettings};
use crate::stream::StreamSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use webterm_core::{WebtermError, WebtermResult};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub shell: ShellSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub keepalive: KeepaliveSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// `[shell]` section: what a new session runs.
#[derive(Debug, Clone, Deserialize)]
pub struct ShellSection {
    /// Program to run; `$SHELL` (or `/bin/sh`) when unset.
    pub program: Option<String>,
    #[serde(default = "default_shell_args")]
    pub args: Vec<String>,
    #[serde(default = "default_term")]
    pub term: String,
    pub cwd: Option<String>,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            program: None,
            args: default_shell_args(),
            term: default_term(),
            cwd: None,
        }
    }
}

/// `[session]` section: per-session buffers.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_scrollback_bytes")]
    pub scrollback_bytes: usize,
    #[serde(default = "default_live_buffer")]
    pub live_buffer: usize,
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            scrollback_bytes: default_scrollback_bytes(),
            live_buffer: default_live_buffer(),
            read_chunk_size: default_read_chunk_size(),
        }
    }
}

/// `[keepalive]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct KeepaliveSection {
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_pong_wait")]
    pub pong_wait_secs: u64,
}

impl Default for KeepaliveSection {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval(),
            pong_wait_secs: default_pong_wait(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_shell_args() -> Vec<String> {
    vec!["-l".to_string()]
}
fn default_term() -> String {
    "xterm-256color".to_string()
}
fn default_scrollback_bytes() -> usize {
    crate::session::scrollback::DEFAULT_SCROLLBACK_BYTES
}
fn default_live_buffer() -> usize {
    crate::stream::DEFAULT_LIVE_BUFFER
}
fn default_read_chunk_size() -> usize {
    crate::session::pty::DEFAULT_READ_CHUNK
}
fn default_ping_interval() -> u64 {
    crate::stream::DEFAULT_PING_INTERVAL.as_secs()
}
fn default_pong_wait() -> u64 {
    crate::stream::DEFAULT_PONG_WAIT.as_secs()
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub shell: Option<String>,
    pub scrollback_bytes: Option<usize>,
    pub echo_shell: bool,
}

/// Resolved server configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shell: ShellCommand,
    /// Serve echo sessions instead of real shells.
    pub echo_shell: bool,
    pub session: SessionSettings,
    pub stream: StreamSettings,
}

impl ServerConfig {
    /// Load config from a TOML file (if it exists), then apply overrides.
    pub fn load(config_path: Option<&Path>, overrides: ConfigOverrides) -> WebtermResult<Self> {
        let file_config = match config_path.map(expand_tilde) {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "loading config file");
                let content = std::fs::read_to_string(&path)?;
                Self::parse_file(&content)?
            }
            Some(path) => {
                info!(path = %path.display(), "config file not found, using defaults");
                ConfigFile::default()
            }
            None => ConfigFile::default(),
        };
        Self::resolve(file_config, overrides)
    }

    pub fn parse_file(content: &str) -> WebtermResult<ConfigFile> {
        toml::from_str::<ConfigFile>(content)
            .map_err(|e| WebtermError::Config(format!("config parse error: {e}")))
    }

    /// Merge a parsed file with overrides and validate the result.
    pub fn resolve(file: ConfigFile, overrides: ConfigOverrides) -> WebtermResult<Self> {
        let session = SessionSettings {
            scrollback_bytes: overrides
                .scrollback_bytes
                .unwrap_or(file.session.scrollback_bytes),
            read_chunk: file.session.read_chunk_size,
        };
        let stream = StreamSettings {
            ping_interval: Duration::from_secs(file.keepalive.ping_interval_secs),
            pong_wait: Duration::from_secs(file.keepalive.pong_wait_secs),
            live_buffer: file.session.live_buffer,
        };

        if session.read_chunk == 0 {
            return Err(WebtermError::Config("session.read_chunk_size must be > 0".into()));
        }
        if stream.live_buffer == 0 {
            return Err(WebtermError::Config("session.live_buffer must be > 0".into()));
        }
        if stream.ping_interval.is_zero() || stream.pong_wait.is_zero() {
            return Err(WebtermError::Config("keepalive intervals must be > 0".into()));
        }
        if stream.pong_wait <= stream.ping_interval {
            return Err(WebtermError::Config(
                "keepalive.pong_wait_secs must exceed ping_interval_secs".into(),
            ));
        }

        let defaults = ShellCommand::default();
        let shell = ShellCommand {
            program: overrides
                .shell
                .or(file.shell.program)
                .unwrap_or(defaults.program),
            args: file.shell.args,
            term: file.shell.term,
            cwd: file.shell.cwd.as_deref().map(expand_tilde_str),
            ..defaults
        };

        Ok(Self {
            host: overrides.host.unwrap_or(file.server.host),
            port: overrides.port.unwrap_or(file.server.port),
            shell,
            echo_shell: overrides.echo_shell,
            session,
            stream,
        })
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let cfg = ServerConfig::resolve(ConfigFile::default(), ConfigOverrides::default()).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.session.scrollback_bytes, 1024 * 1024);
        assert_eq!(cfg.session.read_chunk, 4096);
        assert_eq!(cfg.stream.live_buffer, 256);
        assert_eq!(cfg.stream.ping_interval, Duration::from_secs(30));
        assert_eq!(cfg.stream.pong_wait, Duration::from_secs(60));
        assert_eq!(cfg.shell.term, "xterm-256color");
        assert_eq!(cfg.shell.args, vec!["-l"]);
    }

    #[test]
    fn parse_partial_toml() {
        let file = ServerConfig::parse_file(
            r#"
[server]
port = 9000

[shell]
program = "/bin/bash"
args = ["--login"]

[session]
scrollback_bytes = 4096
"#,
        )
        .unwrap();
        let cfg = ServerConfig::resolve(file, ConfigOverrides::default()).unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.shell.program, "/bin/bash");
        assert_eq!(cfg.shell.args, vec!["--login"]);
        assert_eq!(cfg.session.scrollback_bytes, 4096);
        assert_eq!(cfg.stream.live_buffer, 256);
    }

    #[test]
    fn overrides_win_over_file() {
        let file = ServerConfig::parse_file("[server]\nport = 9000\n").unwrap();
        let cfg = ServerConfig::resolve(
            file,
            ConfigOverrides {
                port: Some(7000),
                shell: Some("/bin/zsh".into()),
                scrollback_bytes: Some(10),
                ..ConfigOverrides::default()
            },
        )
        .unwrap();
        assert_eq!(cfg.port, 7000);
        assert_eq!(cfg.shell.program, "/bin/zsh");
        assert_eq!(cfg.session.scrollback_bytes, 10);
    }

    #[test]
    fn rejects_zero_live_buffer() {
        let file = ServerConfig::parse_file("[session]\nlive_buffer = 0\n").unwrap();
        let err = ServerConfig::resolve(file, ConfigOverrides::default()).unwrap_err();
        assert!(matches!(err, WebtermError::Config(_)));
    }

    #[test]
    fn rejects_pong_wait_shorter_than_ping() {
        let file =
            ServerConfig::parse_file("[keepalive]\nping_interval_secs = 30\npong_wait_secs = 10\n")
                .unwrap();
        assert!(ServerConfig::resolve(file, ConfigOverrides::default()).is_err());
    }

    #[test]
    fn bad_toml_is_config_error() {
        assert!(matches!(
            ServerConfig::parse_file("[server\nport = "),
            Err(WebtermError::Config(_))
        ));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let cfg = ServerConfig::load(
            Some(Path::new("/nonexistent/webterm/config.toml")),
            ConfigOverrides::default(),
        )
        .unwrap();
        assert_eq!(cfg.port, 8080);
    }
}
