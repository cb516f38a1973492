//! Kernel event replay.

use std::fs;
use std::path::Path;

/// Walk /sys and write `add` into every `uevent` file, making the kernel
/// replay events for devices that appeared before anyone was listening.
pub fn replay_sys_events() {
    walk(Path::new("/sys"));
}

fn walk(dir: &Path) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let path = entry.path();
        if file_type.is_dir() {
            walk(&path);
        } else if path.file_name().is_some_and(|name| name == "uevent") {
            let _ = fs::write(&path, "add\n");
        }
    }
}
