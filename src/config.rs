//! Server configuration.
//!
//! Values come from defaults, then environment variables; the CLI applies its
//! own flags on top.

use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::gateway::ExecConfig;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 9212;

/// Directory name for scripts, both next to the executable and under `~/.opendesk`.
const SCRIPTS_DIR_NAME: &str = "scripts";
const HOME_DIR_NAME: &str = ".opendesk";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `127.0.0.1`).
    pub host: String,
    /// Bind port (default: `9212`).
    pub port: u16,
    /// Directory holding the scripts and `scripts.json`.
    pub scripts_dir: PathBuf,
    /// Interpreter and execution limits.
    pub exec: ExecConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            scripts_dir: default_scripts_dir(),
            exec: ExecConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default                       |
    /// |------------------------------|-------------------------------|
    /// | `OPENDESK_HOST`              | `127.0.0.1`                   |
    /// | `OPENDESK_PORT`              | `9212`                        |
    /// | `OPENDESK_SCRIPTS_DIR`       | `scripts/` next to the binary |
    /// | `OPENDESK_INTERPRETER`       | `bun run`                     |
    /// | `OPENDESK_EXEC_TIMEOUT_SECS` | unset (no timeout)            |
    /// | `OPENDESK_MAX_OUTPUT_BYTES`  | unset (no cap)                |
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(host) = var("OPENDESK_HOST") {
            config.host = host;
        }
        if let Some(port) = parse_var(&var, "OPENDESK_PORT") {
            config.port = port;
        }
        if let Some(dir) = var("OPENDESK_SCRIPTS_DIR") {
            config.scripts_dir = PathBuf::from(dir);
        }
        if let Some(interpreter) = var("OPENDESK_INTERPRETER") {
            match parse_interpreter(&interpreter) {
                Some((program, args)) => {
                    config.exec.program = program;
                    config.exec.args = args;
                }
                None => tracing::warn!("Ignoring empty OPENDESK_INTERPRETER"),
            }
        }
        if let Some(secs) = parse_var::<u64>(&var, "OPENDESK_EXEC_TIMEOUT_SECS") {
            config.exec.timeout = Some(Duration::from_secs(secs));
        }
        if let Some(max) = parse_var(&var, "OPENDESK_MAX_OUTPUT_BYTES") {
            config.exec.max_output_bytes = Some(max);
        }

        config
    }

    /// Whether the configured host only accepts local connections.
    pub fn is_loopback(&self) -> bool {
        is_loopback_host(&self.host)
    }
}

/// `localhost` or a loopback IP literal.
pub fn is_loopback_host(host: &str) -> bool {
    host == "localhost" || host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

/// `scripts/` next to the running executable, or relative to the working
/// directory if the executable path is unknown.
pub fn default_scripts_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|p| p.join(SCRIPTS_DIR_NAME)))
        .unwrap_or_else(|| PathBuf::from(SCRIPTS_DIR_NAME))
}

/// `~/.opendesk/scripts`, for installs where the binary directory is read-only.
pub fn home_scripts_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(HOME_DIR_NAME).join(SCRIPTS_DIR_NAME))
}

/// Split `"bun run"` into the program and its leading arguments.
pub fn parse_interpreter(value: &str) -> Option<(String, Vec<String>)> {
    let mut parts = value.split_whitespace().map(str::to_string);
    let program = parts.next()?;
    Some((program, parts.collect()))
}

fn parse_var<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = var(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring invalid configuration value");
            None
        }
    }
}
