//! Device node maintenance under /dev.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use nix::sys::stat::{makedev, mknod, Mode, SFlag};

use super::event::Uevent;

const DEV_DIR: &str = "/dev";
const NODE_PERMS: u32 = 0o660;

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("missing MAJOR/MINOR for {0}")]
    MissingDevNums(String),

    #[error("invalid device number {value}: {source}")]
    BadDevNum {
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("mkdir {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("mknod {path}: {source}")]
    Mknod {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("unlink {path}: {source}")]
    Unlink {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Apply one uevent: create or remove the matching device node. Actions
/// other than add/remove are ignored.
pub fn apply(event: &Uevent) -> Result<(), NodeError> {
    apply_in(Path::new(DEV_DIR), event)
}

/// Same as [`apply`] against an explicit device directory.
pub fn apply_in(dev_dir: &Path, event: &Uevent) -> Result<(), NodeError> {
    match event.action.as_str() {
        "add" => {
            try_load_module(event);
            create_node(dev_dir, event)
        }
        "remove" => remove_node(dev_dir, event),
        _ => Ok(()),
    }
}

/// Best-effort module load for events that carry a MODALIAS.
fn try_load_module(event: &Uevent) {
    let Some(alias) = event.get("MODALIAS").filter(|alias| !alias.is_empty()) else {
        return;
    };
    let _ = Command::new("modprobe").args(["-q", alias]).status();
}

fn create_node(dev_dir: &Path, event: &Uevent) -> Result<(), NodeError> {
    // Events without a device name need no node.
    let Some(devname) = event.get("DEVNAME") else {
        return Ok(());
    };
    let (major, minor) = parse_dev_nums(event)?;

    let path = dev_dir.join(devname);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| NodeError::CreateDir {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let _ = fs::remove_file(&path);

    let kind = device_kind(&event.subsystem);
    let perms = Mode::from_bits_truncate(NODE_PERMS);
    mknod(&path, kind, perms, makedev(major, minor)).map_err(|e| NodeError::Mknod {
        path,
        source: e,
    })?;
    Ok(())
}

fn remove_node(dev_dir: &Path, event: &Uevent) -> Result<(), NodeError> {
    let Some(devname) = event.get("DEVNAME") else {
        return Ok(());
    };
    let path = dev_dir.join(devname);
    fs::remove_file(&path).map_err(|e| NodeError::Unlink { path, source: e })?;
    Ok(())
}

/// The block subsystem gets block nodes, everything else character nodes.
fn device_kind(subsystem: &str) -> SFlag {
    if subsystem == "block" {
        SFlag::S_IFBLK
    } else {
        SFlag::S_IFCHR
    }
}

fn parse_dev_nums(event: &Uevent) -> Result<(u64, u64), NodeError> {
    let (Some(major), Some(minor)) = (event.get("MAJOR"), event.get("MINOR")) else {
        return Err(NodeError::MissingDevNums(event.device.clone()));
    };
    let major = major.parse().map_err(|e| NodeError::BadDevNum {
        value: major.to_string(),
        source: e,
    })?;
    let minor = minor.parse().map_err(|e| NodeError::BadDevNum {
        value: minor.to_string(),
        source: e,
    })?;
    Ok((major, minor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn other_actions_are_ignored() {
        let event = Uevent::parse(b"change@/devices/a\x00DEVNAME=x\x00");
        assert!(apply_in(Path::new("/nonexistent"), &event).is_ok());
    }

    #[test]
    fn add_without_devname_is_a_no_op() {
        let event = Uevent::parse(b"add@/devices/a\x00SUBSYSTEM=pci\x00");
        assert!(apply_in(Path::new("/nonexistent"), &event).is_ok());
    }

    #[test]
    fn add_without_dev_nums_fails() {
        let event = Uevent::parse(b"add@/devices/a\x00DEVNAME=x\x00");
        let dir = tempfile::tempdir().unwrap();
        let err = apply_in(dir.path(), &event).unwrap_err();
        assert!(matches!(err, NodeError::MissingDevNums(_)));
    }

    #[test]
    fn add_with_garbage_dev_nums_fails() {
        let event = Uevent::parse(b"add@/devices/a\x00DEVNAME=x\x00MAJOR=eight\x00MINOR=0\x00");
        let dir = tempfile::tempdir().unwrap();
        let err = apply_in(dir.path(), &event).unwrap_err();
        assert!(matches!(err, NodeError::BadDevNum { .. }));
    }

    #[test]
    fn remove_unlinks_the_node() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sda"), b"").unwrap();

        let event = Uevent::parse(b"remove@/devices/xyz\x00DEVNAME=sda\x00");
        apply_in(dir.path(), &event).unwrap();
        assert!(!dir.path().join("sda").exists());
    }

    #[test]
    fn remove_without_devname_is_a_no_op() {
        let event = Uevent::parse(b"remove@/devices/xyz\x00");
        assert!(apply_in(Path::new("/nonexistent"), &event).is_ok());
    }

    #[test]
    fn remove_of_a_missing_node_fails() {
        let dir = tempfile::tempdir().unwrap();
        let event = Uevent::parse(b"remove@/devices/xyz\x00DEVNAME=ghost\x00");
        assert!(matches!(
            apply_in(dir.path(), &event).unwrap_err(),
            NodeError::Unlink { .. }
        ));
    }

    #[test]
    fn block_subsystem_gets_block_nodes() {
        assert_eq!(device_kind("block"), SFlag::S_IFBLK);
        assert_eq!(device_kind("tty"), SFlag::S_IFCHR);
        assert_eq!(device_kind(""), SFlag::S_IFCHR);
    }

    #[test]
    fn dev_nums_parse_as_decimal() {
        let event = Uevent::parse(b"add@/d\x00MAJOR=8\x00MINOR=17\x00");
        assert_eq!(parse_dev_nums(&event).unwrap(), (8, 17));
    }
}
