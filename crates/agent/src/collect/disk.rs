// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-mountpoint disk usage from `/proc/mounts` + statvfs.

use std::collections::HashSet;
use std::path::Path;

use tracing::trace;

use vigil_wire::types::DiskSample;

/// Mount table entries worth reporting: real block devices, one sample
/// per device even when bind mounts repeat it.
pub fn disk_samples(proc_root: &Path) -> Vec<DiskSample> {
    let contents = match std::fs::read_to_string(proc_root.join("mounts")) {
        Ok(c) => c,
        Err(_) => return Vec::new(),
    };

    let mut seen_devices = HashSet::new();
    let mut samples = Vec::new();

    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let (Some(device), Some(mountpoint)) = (fields.next(), fields.next()) else {
            continue;
        };
        if !device.starts_with("/dev/") || device.starts_with("/dev/loop") {
            continue;
        }
        if !seen_devices.insert(device.to_owned()) {
            continue;
        }

        // Octal escapes in mount paths (e.g. \040 for space).
        let mountpoint = unescape_mount(mountpoint);
        match statvfs_sample(device, &mountpoint) {
            Some(sample) => samples.push(sample),
            None => trace!(mountpoint = mountpoint.as_str(), "statvfs failed, skipping mount"),
        }
    }

    samples
}

fn statvfs_sample(device: &str, mountpoint: &str) -> Option<DiskSample> {
    let stat = rustix::fs::statvfs(mountpoint).ok()?;
    let block = stat.f_frsize;
    let total = stat.f_blocks * block;
    let free = stat.f_bavail * block;
    let used = (stat.f_blocks - stat.f_bfree) * block;
    if total == 0 {
        return None;
    }
    // Match df: percent is used over the space a non-root user can reach.
    let reachable = used + free;
    let percent = if reachable == 0 { 0.0 } else { used as f64 / reachable as f64 * 100.0 };

    Some(DiskSample {
        mountpoint: mountpoint.to_owned(),
        device: device.to_owned(),
        total,
        used,
        free,
        percent,
    })
}

fn unescape_mount(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            let digits: String = chars.clone().take(3).collect();
            if digits.len() == 3 {
                if let Ok(code) = u8::from_str_radix(&digits, 8) {
                    out.push(code as char);
                    for _ in 0..3 {
                        chars.next();
                    }
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}
