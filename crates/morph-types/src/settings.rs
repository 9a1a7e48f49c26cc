use std::path::PathBuf;

/// The engine's consumed configuration (spec §6). Constructed directly by
/// the caller (typically the CLI front-end, which owns parsing config files
/// and flags) and threaded by reference into every builder/executor — never
/// read from a process-global.
#[derive(Debug, Clone)]
pub struct Settings {
    pub cachedir: PathBuf,
    /// Inherit the host `PATH` and install into `/` rather than staging.
    pub bootstrap: bool,
    /// Inherit the host `PATH` even outside bootstrap mode.
    pub keep_path: bool,
    /// `None` means auto-detect from the host CPU count.
    pub max_jobs: Option<u32>,
    pub no_ccache: bool,
    pub no_distcc: bool,
    /// Run build commands via `chroot` into the staging root.
    pub staging_chroot: bool,
}

impl Settings {
    pub fn new(cachedir: impl Into<PathBuf>) -> Self {
        Self {
            cachedir: cachedir.into(),
            bootstrap: false,
            keep_path: false,
            max_jobs: None,
            no_ccache: false,
            no_distcc: false,
            staging_chroot: false,
        }
    }

    /// Resolve the job count to use: morphology override (caller passes it
    /// in), else this setting, else the detected CPU count.
    pub fn resolve_max_jobs(&self, morph_max_jobs: Option<u32>) -> u32 {
        morph_max_jobs
            .or(self.max_jobs)
            .unwrap_or_else(|| num_cpus::get() as u32)
    }
}
