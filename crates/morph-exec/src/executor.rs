//! Scrubbed-environment subprocess execution (spec §4.5, component C5 half;
//! §4.7 "environment preparation").
//!
//! [`CommandExecutor`] never inherits the calling process's environment —
//! callers build the whitelist explicitly (morph-build owns that whitelist,
//! per spec §4.7) — and never attaches a stdin the child could block
//! reading from.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use morph_types::MorphError;
use tracing::debug;

/// Bytes of combined stdout+stderr kept for a `CommandFailed` error's
/// `log_tail` field. Enough to show the actual failure without dumping an
/// entire `make` run into the error message.
const LOG_TAIL_BYTES: usize = 4096;

#[derive(Debug, Clone)]
pub struct CommandExecutor {
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
    /// When set, commands run via `chroot` into this root; `cwd` is
    /// rewritten relative to it.
    pub chroot: Option<PathBuf>,
}

impl CommandExecutor {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            env: HashMap::new(),
            chroot: None,
        }
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_chroot(mut self, root: impl Into<PathBuf>) -> Self {
        self.chroot = Some(root.into());
        self
    }

    /// Run `shell_command` under `/bin/sh -c`, appending combined
    /// stdout/stderr to `log` as it's produced. Returns `CommandFailed` on a
    /// non-zero exit, with the tail of the log attached.
    pub fn run(&self, shell_command: &str, log: &mut dyn Write) -> Result<(), MorphError> {
        let mut command = self.build_command(shell_command);
        command.env_clear();
        command.envs(&self.env);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        debug!("running `{shell_command}` in {}", self.cwd.display());
        let output = command.output().map_err(MorphError::Io)?;

        log.write_all(&output.stdout).map_err(MorphError::Io)?;
        log.write_all(&output.stderr).map_err(MorphError::Io)?;

        if output.status.success() {
            return Ok(());
        }

        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);
        let tail_start = combined.len().saturating_sub(LOG_TAIL_BYTES);
        let log_tail = String::from_utf8_lossy(&combined[tail_start..]).into_owned();

        Err(MorphError::CommandFailed {
            cmd: shell_command.to_string(),
            status: format!("{}", output.status),
            log_tail,
        })
    }

    fn build_command(&self, shell_command: &str) -> Command {
        match &self.chroot {
            None => {
                let mut command = Command::new("/bin/sh");
                command.arg("-c").arg(shell_command).current_dir(&self.cwd);
                command
            }
            Some(root) => {
                let relative_cwd = self.cwd.strip_prefix(root).unwrap_or(&self.cwd);
                let mut command = Command::new("/usr/sbin/chroot");
                command
                    .arg(root)
                    .arg("sh")
                    .arg("-c")
                    .arg("cd \"$1\" && shift && eval \"$@\"")
                    .arg("--")
                    .arg(path_arg(relative_cwd))
                    .arg(shell_command);
                command
            }
        }
    }
}

fn path_arg(path: &Path) -> String {
    let mut s = path.to_string_lossy().into_owned();
    if !s.starts_with('/') {
        s.insert(0, '/');
    }
    s
}
