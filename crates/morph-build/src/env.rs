//! Scrubbed environment preparation for a chunk build (spec §4.7 step 1,
//! "environment preparation").

use std::collections::HashMap;
use std::path::Path;

use morph_types::Settings;

/// Preserved from the host environment even though everything else is
/// cleared — these carry build-tooling state (fakeroot, preloaded shims)
/// that has nothing to do with the package being built.
const PRESERVED_WHITELIST: &[&str] = &["TMPDIR", "LD_PRELOAD", "LD_LIBRARY_PATH", "FAKEROOTKEY", "FAKED_MODE", "FAKEROOT_FD_BASE"];

/// Build the environment map a chunk's commands run under. `temp` is the
/// staging area's root (used for `HOME`/`WORKAREA`/ccache basedir), `destdir`
/// is this artifact's install destination, `max_jobs` has already been
/// resolved (morphology override, else setting, else CPU count), and
/// `dependency_prefixes` lists the install prefixes of this artifact's
/// dependencies that differ from `/usr`, in dependency order (spec:
/// "append each of the build dependencies' install prefixes that differ
/// from /usr to PATH").
pub fn chunk_environment(settings: &Settings, temp: &Path, destdir: &Path, max_jobs: u32, dependency_prefixes: &[String]) -> HashMap<String, String> {
    let mut env = HashMap::new();

    for name in PRESERVED_WHITELIST {
        if let Ok(value) = std::env::var(name) {
            env.insert((*name).to_string(), value);
        }
    }

    env.insert("TERM".to_string(), "dumb".to_string());
    env.insert("SHELL".to_string(), "/bin/sh".to_string());
    env.insert("USER".to_string(), "tomjon".to_string());
    env.insert("USERNAME".to_string(), "tomjon".to_string());
    env.insert("LOGNAME".to_string(), "tomjon".to_string());
    env.insert("LC_ALL".to_string(), "C".to_string());
    env.insert("HOME".to_string(), temp.display().to_string());

    let mut path = if settings.keep_path || settings.bootstrap {
        std::env::var("PATH").unwrap_or_default()
    } else {
        temp.join("bin").display().to_string()
    };

    if !settings.no_ccache {
        path = format!("/usr/lib/ccache:{path}");
        if !settings.no_distcc {
            env.insert("CCACHE_PREFIX".to_string(), "distcc".to_string());
            env.insert("CCACHE_BASEDIR".to_string(), temp.display().to_string());
        }
    }

    for prefix in dependency_prefixes {
        if prefix != "/usr" {
            path = format!("{path}:{prefix}/bin");
        }
    }
    env.insert("PATH".to_string(), path);

    env.insert("WORKAREA".to_string(), temp.display().to_string());
    env.insert("DESTDIR".to_string(), format!("{}/", destdir.display()));
    env.insert("TOOLCHAIN_TARGET".to_string(), format!("{}-baserock-linux-gnu", std::env::consts::ARCH));
    env.insert("BOOTSTRAP".to_string(), settings.bootstrap.to_string());
    env.insert("MAKEFLAGS".to_string(), format!("-j{max_jobs}"));

    env
}

/// `MAKEFLAGS` forced to `-j1` for the non-`build` stages (spec: "only the
/// `build` stage runs with the parallel MAKEFLAGS; configure, test, install
/// are forced -j1, restored afterwards").
pub fn with_serial_makeflags(env: &HashMap<String, String>) -> HashMap<String, String> {
    let mut env = env.clone();
    env.insert("MAKEFLAGS".to_string(), "-j1".to_string());
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings::new("/var/cache/morph")
    }

    #[test]
    fn default_path_is_scoped_to_the_staging_temp_bin() {
        let env = chunk_environment(&settings(), Path::new("/tmp/staging"), Path::new("/tmp/staging/foo.inst"), 4, &[]);
        assert!(env["PATH"].contains("/tmp/staging/bin"));
    }

    #[test]
    fn ccache_prefixes_the_path_and_distcc_sets_ccache_prefix() {
        let mut settings = settings();
        settings.no_ccache = false;
        settings.no_distcc = false;
        let env = chunk_environment(&settings, Path::new("/tmp/staging"), Path::new("/tmp/staging/foo.inst"), 4, &[]);
        assert!(env["PATH"].starts_with("/usr/lib/ccache:"));
        assert_eq!(env["CCACHE_PREFIX"], "distcc");
    }

    #[test]
    fn keep_path_inherits_the_host_path_instead_of_temp_bin() {
        std::env::set_var("PATH", "/usr/bin:/bin");
        let mut settings = settings();
        settings.keep_path = true;
        let env = chunk_environment(&settings, Path::new("/tmp/staging"), Path::new("/tmp/staging/foo.inst"), 4, &[]);
        assert!(env["PATH"].ends_with("/usr/bin:/bin"));
    }

    #[test]
    fn dependency_prefixes_other_than_usr_are_appended_to_path() {
        let env = chunk_environment(
            &settings(),
            Path::new("/tmp/staging"),
            Path::new("/tmp/staging/foo.inst"),
            4,
            &["/usr".to_string(), "/opt/toolchain".to_string()],
        );
        assert!(env["PATH"].ends_with("/opt/toolchain/bin"));
    }

    #[test]
    fn serial_makeflags_overrides_without_mutating_the_original() {
        let env = chunk_environment(&settings(), Path::new("/tmp/staging"), Path::new("/tmp/staging/foo.inst"), 8, &[]);
        let serial = with_serial_makeflags(&env);
        assert_eq!(serial["MAKEFLAGS"], "-j1");
        assert_eq!(env["MAKEFLAGS"], "-j8");
    }
}
