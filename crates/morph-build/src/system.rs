//! System builder (spec §4.9, component C9): assembles a bootable disk image
//! from a declared-order list of stratum archives.
//!
//! Every external tool this builder shells out to (`qemu-img`, `parted`,
//! `kpartx`, `mount`, `extlinux`, ...) is reached through the [`SystemTools`]
//! trait rather than `std::process::Command` directly, the same
//! caller-supplied-collaborator shape `morph-types` uses for `SourceManager`
//! and `MorphLoader` — it lets tests exercise the unmount-on-failure control
//! flow without root or a loop device.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fs_err as fs;
use morph_cache::CacheDir;
use morph_exec::StagingArea;
use morph_graph::{Artifact, ArtifactDetail};
use morph_types::MorphError;
use tracing::{debug, warn};

const FSTAB_CONTENTS: &str = "\
proc      /proc proc  defaults          0 0
sysfs     /sys  sysfs defaults          0 0
/dev/sda1 /     ext4  errors=remount-ro 0 1
";

const EXTLINUX_CONF_CONTENTS: &str = "\
default linux
timeout 1

label linux
kernel /vmlinuz
append root=/dev/sda1 init=/sbin/init quiet rw
";

/// The external commands a system build shells out to. Implemented for real
/// use by [`HostSystemTools`]; tests supply a recording fake.
pub trait SystemTools: Send + Sync {
    fn run(&self, cwd: &Path, program: &str, args: &[&str]) -> Result<(), MorphError>;
    /// Like `run`, but returns captured stdout (used only for `kpartx -av`,
    /// whose output names the device-mapper device it created).
    fn run_capturing(&self, cwd: &Path, program: &str, args: &[&str]) -> Result<String, MorphError>;
}

#[derive(Debug, Default)]
pub struct HostSystemTools;

impl SystemTools for HostSystemTools {
    fn run(&self, cwd: &Path, program: &str, args: &[&str]) -> Result<(), MorphError> {
        self.run_capturing(cwd, program, args).map(|_| ())
    }

    fn run_capturing(&self, cwd: &Path, program: &str, args: &[&str]) -> Result<String, MorphError> {
        debug!("running `{program} {}`", args.join(" "));
        let output = std::process::Command::new(program)
            .args(args)
            .current_dir(cwd)
            .output()
            .map_err(MorphError::Io)?;
        if !output.status.success() {
            return Err(MorphError::CommandFailed {
                cmd: format!("{program} {}", args.join(" ")),
                status: format!("{}", output.status),
                log_tail: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

pub struct SystemBuilder {
    cache: Arc<CacheDir>,
    tools: Arc<dyn SystemTools>,
}

impl SystemBuilder {
    pub fn new(cache: Arc<CacheDir>, tools: Arc<dyn SystemTools>) -> Self {
        Self { cache, tools }
    }

    pub fn plan(&self, artifact: &Artifact) -> PathBuf {
        self.cache.artifact_path(&artifact.cache_id, "system", &artifact.name)
    }

    pub fn build(&self, artifact: &Artifact, staging: &StagingArea, stage_items: &[(String, PathBuf)]) -> Result<PathBuf, MorphError> {
        let disk_size = match &artifact.detail {
            ArtifactDetail::System { disk_size } => disk_size.clone(),
            _ => return Err(MorphError::configuration(format!("{} is not a system artifact", artifact.name))),
        };

        let root = staging.root();
        let image_name = root.join(format!("{}.img", artifact.name));
        let image_name_str = image_name.to_string_lossy().into_owned();

        self.tools.run(root, "qemu-img", &["create", "-f", "raw", &image_name_str, &disk_size])?;

        self.tools.run(root, "parted", &["-s", &image_name_str, "mklabel", "msdos"])?;
        self.tools.run(root, "parted", &["-s", &image_name_str, "mkpart", "primary", "0%", "100%"])?;
        self.tools.run(root, "parted", &["-s", &image_name_str, "set", "1", "boot", "on"])?;

        self.tools.run(root, "install-mbr", &[&image_name_str])?;

        let kpartx_out = self.tools.run_capturing(root, "kpartx", &["-av", &image_name_str])?;
        let device = kpartx_out
            .lines()
            .find(|line| line.starts_with("add map "))
            .and_then(|line| line.split_whitespace().nth(2))
            .ok_or_else(|| MorphError::configuration(format!("kpartx -av {image_name_str} produced no `add map` line")))?
            .to_string();
        let partition = format!("/dev/mapper/{device}");

        let mount_point = root.join("mnt");

        let result = self.assemble(root, &mount_point, &partition, stage_items);

        match &result {
            Ok(()) => {
                self.tools.run(root, "kpartx", &["-d", &image_name_str])?;
            }
            Err(_) => {
                if let Err(e) = self.tools.run(root, "umount", &[&mount_point.to_string_lossy()]) {
                    warn!("cleanup: unmount of {} failed: {e}", mount_point.display());
                }
                if let Err(e) = self.tools.run(root, "kpartx", &["-d", &image_name_str]) {
                    warn!("cleanup: kpartx -d {image_name_str} failed: {e}");
                }
            }
        }
        result?;

        let archive_path = self.plan(artifact);
        fs::rename(&image_name, &archive_path)?;
        Ok(archive_path)
    }

    fn assemble(&self, root: &Path, mount_point: &Path, partition: &str, stage_items: &[(String, PathBuf)]) -> Result<(), MorphError> {
        self.tools.run(root, "mkfs", &["-t", "ext3", partition])?;

        fs::create_dir_all(mount_point)?;
        self.tools.run(root, "mount", &[partition, &mount_point.to_string_lossy()])?;

        for (name, archive_path) in stage_items {
            debug!("unpacking stratum {name} from {}", archive_path.display());
            let file = fs::File::open(archive_path).map_err(MorphError::Io)?;
            morph_archive::unpack(file, mount_point).map_err(|e| MorphError::archive(format!("unpacking stratum {name}: {e}")))?;
        }
        self.ldconfig(root, mount_point)?;

        fs::create_dir_all(mount_point.join("etc"))?;
        fs::write(mount_point.join("etc/fstab"), FSTAB_CONTENTS)?;
        fs::write(mount_point.join("extlinux.conf"), EXTLINUX_CONF_CONTENTS)?;

        self.tools.run(root, "extlinux", &["--install", &mount_point.to_string_lossy()])?;
        self.tools.run(root, "sync", &[])?;
        std::thread::sleep(Duration::from_secs(2));

        self.tools.run(root, "umount", &[&mount_point.to_string_lossy()])?;
        Ok(())
    }

    /// Mirrors `original_source/morphlib/builder.py::ldconfig`: skip quietly
    /// if the target has no `etc/ld.so.conf` (e.g. an empty or non-glibc
    /// rootfs) rather than letting `ldconfig` fail on it.
    fn ldconfig(&self, root: &Path, mount_point: &Path) -> Result<(), MorphError> {
        if !mount_point.join("etc/ld.so.conf").exists() {
            debug!("no etc/ld.so.conf under {}, not running ldconfig", mount_point.display());
            return Ok(());
        }
        self.tools.run(root, "ldconfig", &["-r", &mount_point.to_string_lossy()])
    }
}
