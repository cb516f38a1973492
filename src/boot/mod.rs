//! Early-boot bring-up.
//!
//! Runs only when this executable is invoked as `/init` from an
//! initramfs: mounts the kernel pseudo-filesystems, assembles the overlay
//! root from the device named on the kernel command line, moves the live
//! mounts into the new root, pivots into it and execs the real
//! supervisor.
//!
//! Individual steps are best-effort but collectively gated: failures are
//! collected and become fatal at the next stage boundary.

pub mod cmdline;

use std::ffi::CStr;
use std::fs;
use std::io::Write;
use std::path::Path;

use nix::mount::{mount, MsFlags};
use nix::unistd::{chdir, chroot, execve};

use cmdline::Cmdline;

const SUPERVISOR_PATH: &CStr = c"/cmd/init";
const MOUNT_TOOL: &str = "/cmd/busybox";

const OVERLAY_RO: &str = "/cache/runtime/overlay/ro";
const OVERLAY_DATA: &str =
    "lowerdir=/cache/runtime/overlay/ro,upperdir=/cache/runtime/overlay/rw,workdir=/cache/runtime/overlay/work";

/// Write to the kernel log; the journal does not exist this early.
fn kmsg(msg: &str) {
    if let Ok(mut f) = fs::OpenOptions::new().write(true).open("/dev/kmsg") {
        let _ = writeln!(f, "initd: {}", msg);
    }
    eprintln!("initd: {}", msg);
}

/// True when running as the initramfs `/init`.
pub fn is_initramfs() -> bool {
    std::env::args().next().as_deref() == Some("/init")
}

struct MountPoint {
    source: &'static str,
    target: &'static str,
    fstype: &'static str,
    flags: MsFlags,
    data: Option<&'static str>,
}

const PSEUDO_MOUNTS: &[MountPoint] = &[
    MountPoint {
        source: "devtmpfs",
        target: "/dev",
        fstype: "devtmpfs",
        flags: MsFlags::MS_NOSUID,
        data: Some("mode=0755"),
    },
    MountPoint {
        source: "proc",
        target: "/proc",
        fstype: "proc",
        flags: MsFlags::MS_NOSUID
            .union(MsFlags::MS_NOEXEC)
            .union(MsFlags::MS_NODEV),
        data: None,
    },
    MountPoint {
        source: "sysfs",
        target: "/sys",
        fstype: "sysfs",
        flags: MsFlags::MS_NOSUID
            .union(MsFlags::MS_NOEXEC)
            .union(MsFlags::MS_NODEV),
        data: None,
    },
    MountPoint {
        source: "tmpfs",
        target: "/cache/runtime",
        fstype: "tmpfs",
        flags: MsFlags::MS_NOSUID.union(MsFlags::MS_NODEV),
        data: Some("mode=0755"),
    },
    MountPoint {
        source: "devpts",
        target: "/dev/pts",
        fstype: "devpts",
        flags: MsFlags::MS_NOSUID.union(MsFlags::MS_NOEXEC),
        data: Some("mode=0620,gid=5"),
    },
    MountPoint {
        source: "tmpfs",
        target: "/dev/shm",
        fstype: "tmpfs",
        flags: MsFlags::MS_NOSUID.union(MsFlags::MS_NODEV),
        data: Some("mode=1777"),
    },
];

#[derive(Debug, thiserror::Error)]
#[error("failed to complete stage: {stage}")]
pub struct BootError {
    pub stage: &'static str,
    pub failures: Vec<String>,
}

/// Collects step failures between stage boundaries.
#[derive(Default)]
struct Bringup {
    failures: Vec<String>,
}

impl Bringup {
    fn safe<T, E: std::fmt::Display>(&mut self, label: &str, result: Result<T, E>) {
        if let Err(e) = result {
            self.fail(label, e);
        }
    }

    fn fail(&mut self, label: &str, error: impl std::fmt::Display) {
        self.failures.push(format!("{}: {}", label, error));
    }

    /// Stage boundary: every collected failure is printed, and a
    /// non-empty list fails the whole stage.
    fn ensure(&mut self, stage: &'static str) -> Result<(), BootError> {
        if self.failures.is_empty() {
            return Ok(());
        }
        for msg in &self.failures {
            kmsg(msg);
        }
        Err(BootError {
            stage,
            failures: std::mem::take(&mut self.failures),
        })
    }
}

/// Bring the system from the initramfs to the real root and exec the
/// supervisor there. Does not return on success.
pub fn switch_to_real_root() -> Result<std::convert::Infallible, BootError> {
    let mut bringup = Bringup::default();

    for mp in PSEUDO_MOUNTS {
        bringup.safe(&format!("mkdir({})", mp.target), fs::create_dir_all(mp.target));
        bringup.safe(
            &format!("mount({})", mp.target),
            mount(Some(mp.source), mp.target, Some(mp.fstype), mp.flags, mp.data),
        );
    }
    bringup.ensure("kernel pseudo filesystem mount")?;

    let opts = match Cmdline::from_proc() {
        Ok(opts) => opts,
        Err(e) => {
            bringup.fail("parse(/proc/cmdline)", e);
            Cmdline::default()
        }
    };
    bringup.ensure("parsing kernel args")?;

    let Some(root) = opts.root.as_deref() else {
        kmsg("no root device specified");
        return Err(BootError {
            stage: "locating root device",
            failures: vec!["no root device specified".into()],
        });
    };

    if !Path::new(root).exists() {
        if let Ok(entries) = fs::read_dir("/sys/block") {
            for entry in entries.flatten() {
                kmsg(&format!("block device: {}", entry.file_name().to_string_lossy()));
            }
        }
        let failure = format!("root device {} not present", root);
        kmsg(&failure);
        return Err(BootError {
            stage: "locating root device",
            failures: vec![failure],
        });
    }

    for dir in [
        "/cache/runtime/overlay",
        "/cache/runtime/overlay/ro",
        "/cache/runtime/overlay/rw",
        "/cache/runtime/overlay/work",
        "/rootfs",
    ] {
        bringup.safe(&format!("mkdir({})", dir), fs::create_dir_all(dir));
    }

    if opts.live {
        // Live media: the root device carries an ISO with the actual
        // system image inside it.
        let iso = "/cache/runtime/iso";
        bringup.safe(&format!("mkdir({})", iso), fs::create_dir_all(iso));
        bringup.safe(
            "mount(iso)",
            mount(
                Some(root),
                iso,
                opts.rootfstype.as_deref(),
                MsFlags::MS_RDONLY,
                None::<&str>,
            ),
        );
        bringup.safe(
            "mount(system.img)",
            loop_mount(&format!("{}/system.img", iso), OVERLAY_RO),
        );
    } else {
        bringup.safe(
            "mount(rootfs)",
            mount(
                Some(root),
                OVERLAY_RO,
                opts.rootfstype.as_deref(),
                MsFlags::MS_RDONLY,
                None::<&str>,
            ),
        );
    }

    bringup.safe(
        "mount(overlay)",
        mount(
            Some("overlay"),
            "/rootfs",
            Some("overlay"),
            MsFlags::empty(),
            Some(OVERLAY_DATA),
        ),
    );
    bringup.ensure("prepare real rootfs")?;

    // Move the live mounts into the new root so no open handles are lost.
    for name in ["proc", "sys", "dev", "cache/runtime"] {
        let source = format!("/{}", name);
        let target = format!("/rootfs/{}", name);
        bringup.safe(&format!("mkdir({})", target), fs::create_dir_all(&target));
        bringup.safe(
            &format!("move({})", name),
            mount(
                Some(source.as_str()),
                target.as_str(),
                None::<&str>,
                MsFlags::MS_MOVE,
                None::<&str>,
            ),
        );
    }

    bringup.safe("chdir(/rootfs)", chdir("/rootfs"));
    bringup.safe("chroot(/rootfs)", chroot("/rootfs"));
    bringup.ensure("switch to real rootfs")?;

    kmsg("switching to real rootfs");
    match execve::<&CStr, &CStr>(SUPERVISOR_PATH, &[SUPERVISOR_PATH], &[]) {
        Ok(never) => match never {},
        Err(e) => Err(BootError {
            stage: "exec supervisor",
            failures: vec![format!("exec {:?}: {}", SUPERVISOR_PATH, e)],
        }),
    }
}

/// Loop-mount an image file through the system mount tool.
fn loop_mount(source: &str, target: &str) -> std::io::Result<()> {
    let status = std::process::Command::new(MOUNT_TOOL)
        .args(["mount", source, target])
        .status()?;
    if !status.success() {
        return Err(std::io::Error::other(format!(
            "mount {} exited with {}",
            source, status
        )));
    }
    Ok(())
}
