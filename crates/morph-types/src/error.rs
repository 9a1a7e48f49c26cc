use std::fmt;

/// The seven-way error taxonomy from the design (kinds, not wrapper types).
///
/// `CommandFailed`, `Archive`, `Cache` and `Unmount` all carry enough
/// context to be actionable without re-running the failing step.
#[derive(Debug, thiserror::Error)]
pub enum MorphError {
    /// Malformed morphology, unknown `kind`, cyclic dependency, missing field.
    /// Fatal before scheduling starts.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Repo unreachable, ref unresolved, submodule missing. Fails the owning
    /// artifact only.
    #[error("source error for {repo}@{git_ref}: {message}")]
    Source {
        repo: String,
        git_ref: String,
        message: String,
    },

    /// A child process exited non-zero. No retry.
    #[error("command `{cmd}` failed with {status}\n--- log tail ---\n{log_tail}")]
    CommandFailed {
        cmd: String,
        status: String,
        log_tail: String,
    },

    /// Tar read/write failure, or a pattern set that selected nothing.
    #[error("archive error: {0}")]
    Archive(String),

    /// Write collision, permissions, disk full. Fatal for the whole run.
    #[error("cache error: {0}")]
    Cache(String),

    /// Cleanup of a mount or device-mapper attachment failed. Never raised on
    /// its own — always chained onto (and logged alongside) the error that
    /// triggered the cleanup, so it never masks the original failure.
    #[error("failed to unmount/detach during cleanup: {0}")]
    Unmount(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MorphError {
    pub fn configuration(message: impl fmt::Display) -> Self {
        Self::Configuration(message.to_string())
    }

    pub fn source(repo: impl Into<String>, git_ref: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Source {
            repo: repo.into(),
            git_ref: git_ref.into(),
            message: message.to_string(),
        }
    }

    pub fn archive(message: impl fmt::Display) -> Self {
        Self::Archive(message.to_string())
    }

    pub fn cache(message: impl fmt::Display) -> Self {
        Self::Cache(message.to_string())
    }
}
