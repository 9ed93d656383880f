//! Execution gateway: resolves a request identifier to a script inside the
//! scripts directory and runs it through the configured interpreter.
//!
//! Identifiers arrive percent-encoded from an unauthenticated network port.
//! They are decoded, checked to be a bare filename, and the canonical path is
//! checked to stay inside the canonical scripts directory before anything is
//! spawned.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::process::Command;

use crate::models::{is_plain_file_name, is_script_file, SCRIPT_EXTENSIONS};

/// Default interpreter and the arguments placed before the script path.
pub const DEFAULT_INTERPRETER: &str = "bun";
pub const DEFAULT_INTERPRETER_ARGS: &[&str] = &["run"];

/// How scripts are run.
///
/// `timeout` and `max_output_bytes` are off by default: scripts run to
/// completion and their whole output is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecConfig {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
    pub max_output_bytes: Option<usize>,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_INTERPRETER.to_string(),
            args: DEFAULT_INTERPRETER_ARGS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            timeout: None,
            max_output_bytes: None,
        }
    }
}

impl ExecConfig {
    /// Run scripts with `program` and no leading arguments.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("invalid script path: {0:?}")]
    InvalidPath(String),

    #[error("script not found: {0}")]
    NotFound(String),

    #[error("script process failed: {0}")]
    ProcessFailure(#[from] ProcessFailure),

    #[error("script timed out after {0:?}")]
    TimedOut(Duration),

    #[error("scripts directory unavailable: {0}")]
    Io(#[source] io::Error),
}

#[derive(Debug, Error)]
pub enum ProcessFailure {
    #[error("could not start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("exited with {status}")]
    Exit { status: ExitStatus, stderr: String },
}

#[derive(Debug, Clone)]
pub struct Gateway {
    dir: PathBuf,
    config: Arc<ExecConfig>,
}

impl Gateway {
    pub fn new(dir: impl Into<PathBuf>, config: ExecConfig) -> Self {
        Self {
            dir: dir.into(),
            config: Arc::new(config),
        }
    }

    /// Run the script named by `raw_id` and return its trimmed standard output.
    pub async fn execute(&self, raw_id: &str) -> Result<String, ExecError> {
        let path = self.resolve(raw_id)?;
        self.run(&path).await
    }

    /// Map a percent-encoded identifier to a canonical script path.
    ///
    /// The identifier is either a filename (`mute.ts`) or a display name
    /// (`mute`), in which case each script extension is tried in turn.
    pub fn resolve(&self, raw_id: &str) -> Result<PathBuf, ExecError> {
        let id = urlencoding::decode(raw_id)
            .map_err(|_| ExecError::InvalidPath(raw_id.to_string()))?;

        if !is_plain_file_name(&id) {
            tracing::warn!(id = %id, "Rejected script path outside scripts directory");
            return Err(ExecError::InvalidPath(id.into_owned()));
        }

        let dir = self.dir.canonicalize().map_err(ExecError::Io)?;

        let candidates: Vec<String> = if is_script_file(&id) {
            vec![id.to_string()]
        } else {
            SCRIPT_EXTENSIONS
                .iter()
                .map(|ext| format!("{id}.{ext}"))
                .collect()
        };

        let Some(found) = candidates
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.exists())
        else {
            // Names an existing entry that is not a script.
            if !is_script_file(&id) && dir.join(&*id).exists() {
                tracing::warn!(id = %id, "Rejected execution of non-script file");
                return Err(ExecError::InvalidPath(id.into_owned()));
            }
            return Err(ExecError::NotFound(id.into_owned()));
        };

        let canonical = found
            .canonicalize()
            .map_err(|_| ExecError::NotFound(id.to_string()))?;
        if !canonical.starts_with(&dir) || !canonical.is_file() {
            tracing::warn!(id = %id, "Rejected script resolving outside scripts directory");
            return Err(ExecError::InvalidPath(id.into_owned()));
        }

        Ok(canonical)
    }

    async fn run(&self, script: &Path) -> Result<String, ExecError> {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .arg(script)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        tracing::info!(
            program = %self.config.program,
            script = %script.display(),
            "Executing script"
        );
        let start = Instant::now();

        let output = match self.config.timeout {
            Some(limit) => tokio::time::timeout(limit, cmd.output())
                .await
                .map_err(|_| {
                    tracing::warn!(script = %script.display(), ?limit, "Script timed out");
                    ExecError::TimedOut(limit)
                })?,
            None => cmd.output().await,
        }
        .map_err(|source| ProcessFailure::Spawn {
            program: self.config.program.clone(),
            source,
        })?;

        let elapsed_ms = start.elapsed().as_millis() as u64;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::error!(
                script = %script.display(),
                status = %output.status,
                stderr = %stderr,
                elapsed_ms,
                "Script failed"
            );
            return Err(ProcessFailure::Exit {
                status: output.status,
                stderr,
            }
            .into());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut text = stdout.trim();
        if let Some(max) = self.config.max_output_bytes {
            if text.len() > max {
                tracing::warn!(
                    script = %script.display(),
                    len = text.len(),
                    max,
                    "Script output truncated"
                );
                text = truncate_at_char_boundary(text, max);
            }
        }

        tracing::info!(script = %script.display(), elapsed_ms, "Script finished");
        Ok(text.to_string())
    }
}

fn truncate_at_char_boundary(s: &str, max: usize) -> &str {
    let mut end = max.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn gateway(dir: &TempDir) -> Gateway {
        Gateway::new(dir.path(), ExecConfig::with_program("definitely-not-an-interpreter"))
    }

    #[test]
    fn default_config_runs_bun() {
        let config = ExecConfig::default();
        assert_eq!(config.program, "bun");
        assert_eq!(config.args, vec!["run".to_string()]);
        assert!(config.timeout.is_none());
        assert!(config.max_output_bytes.is_none());
    }

    #[test]
    fn resolves_filename_inside_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("mute.ts"), "").unwrap();

        let path = gateway(&dir).resolve("mute.ts").unwrap();
        assert_eq!(path, dir.path().canonicalize().unwrap().join("mute.ts"));
    }

    #[test]
    fn resolves_display_name_and_encoded_spaces() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("toggle mic.js"), "").unwrap();

        let gateway = gateway(&dir);
        let by_name = gateway.resolve("toggle%20mic").unwrap();
        let by_file = gateway.resolve("toggle%20mic.js").unwrap();
        assert_eq!(by_name, by_file);
    }

    #[test]
    fn rejects_traversal_before_touching_the_filesystem() {
        let dir = TempDir::new().unwrap();
        let gateway = gateway(&dir);

        for raw in [
            "../../etc/passwd",
            "..%2F..%2Fetc%2Fpasswd",
            "%2Fetc%2Fpasswd",
            "..",
            "",
            "a%00.ts",
        ] {
            assert!(
                matches!(gateway.resolve(raw), Err(ExecError::InvalidPath(_))),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_non_script_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("scripts.json"), "[]").unwrap();

        assert!(matches!(
            gateway(&dir).resolve("scripts.json"),
            Err(ExecError::InvalidPath(_))
        ));
    }

    #[test]
    fn display_name_wins_over_same_named_entries() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("notes"), "plain text").unwrap();
        fs::write(dir.path().join("notes.ts"), "").unwrap();
        fs::create_dir(dir.path().join("tools")).unwrap();
        fs::write(dir.path().join("tools.js"), "").unwrap();
        fs::write(dir.path().join("readme"), "").unwrap();

        let gateway = gateway(&dir);
        let canonical = dir.path().canonicalize().unwrap();
        assert_eq!(gateway.resolve("notes").unwrap(), canonical.join("notes.ts"));
        assert_eq!(gateway.resolve("tools").unwrap(), canonical.join("tools.js"));
        assert!(matches!(
            gateway.resolve("readme"),
            Err(ExecError::InvalidPath(_))
        ));
    }

    #[test]
    fn missing_script_is_not_found() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            gateway(&dir).resolve("nothing.ts"),
            Err(ExecError::NotFound(_))
        ));
        assert!(matches!(
            gateway(&dir).resolve("nothing"),
            Err(ExecError::NotFound(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_escaping_directory() {
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret.ts"), "").unwrap();
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret.ts"), dir.path().join("link.ts"))
            .unwrap();

        assert!(matches!(
            gateway(&dir).resolve("link.ts"),
            Err(ExecError::InvalidPath(_))
        ));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_at_char_boundary("héllo", 2), "h");
        assert_eq!(truncate_at_char_boundary("hello", 10), "hello");
    }

    #[cfg(unix)]
    mod process {
        use super::*;

        fn sh_gateway(dir: &TempDir, config: ExecConfig) -> Gateway {
            Gateway::new(dir.path(), config)
        }

        #[tokio::test]
        async fn returns_trimmed_stdout() {
            let dir = TempDir::new().unwrap();
            fs::write(dir.path().join("hello.js"), "echo '  Hello, World!  '\n").unwrap();

            let out = sh_gateway(&dir, ExecConfig::with_program("sh"))
                .execute("hello.js")
                .await
                .unwrap();
            assert_eq!(out, "Hello, World!");
        }

        #[tokio::test]
        async fn non_zero_exit_is_process_failure() {
            let dir = TempDir::new().unwrap();
            fs::write(dir.path().join("fail.ts"), "echo oops >&2\nexit 3\n").unwrap();

            let err = sh_gateway(&dir, ExecConfig::with_program("sh"))
                .execute("fail.ts")
                .await
                .unwrap_err();
            match err {
                ExecError::ProcessFailure(ProcessFailure::Exit { status, stderr }) => {
                    assert_eq!(status.code(), Some(3));
                    assert_eq!(stderr, "oops");
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }

        #[tokio::test]
        async fn missing_interpreter_is_process_failure() {
            let dir = TempDir::new().unwrap();
            fs::write(dir.path().join("task.ts"), "").unwrap();

            let err = gateway(&dir).execute("task.ts").await.unwrap_err();
            assert!(matches!(
                err,
                ExecError::ProcessFailure(ProcessFailure::Spawn { .. })
            ));
        }

        #[tokio::test]
        async fn timeout_kills_long_running_script() {
            let dir = TempDir::new().unwrap();
            fs::write(dir.path().join("slow.ts"), "sleep 5\n").unwrap();

            let config = ExecConfig {
                timeout: Some(Duration::from_millis(100)),
                ..ExecConfig::with_program("sh")
            };
            let err = sh_gateway(&dir, config).execute("slow.ts").await.unwrap_err();
            assert!(matches!(err, ExecError::TimedOut(_)));
        }

        #[tokio::test]
        async fn output_cap_truncates() {
            let dir = TempDir::new().unwrap();
            fs::write(dir.path().join("loud.ts"), "echo abcdefghij\n").unwrap();

            let config = ExecConfig {
                max_output_bytes: Some(4),
                ..ExecConfig::with_program("sh")
            };
            let out = sh_gateway(&dir, config).execute("loud.ts").await.unwrap();
            assert_eq!(out, "abcd");
        }

        #[tokio::test]
        async fn leading_args_precede_script_path() {
            let dir = TempDir::new().unwrap();
            fs::write(dir.path().join("flagged.ts"), "echo \"$-\" | grep -q e && echo strict\n")
                .unwrap();

            let config = ExecConfig {
                program: "sh".to_string(),
                args: vec!["-e".to_string()],
                ..ExecConfig::default()
            };
            let out = sh_gateway(&dir, config).execute("flagged").await.unwrap();
            assert_eq!(out, "strict");
        }
    }
}
