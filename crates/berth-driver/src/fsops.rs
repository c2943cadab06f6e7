//! Filesystem operations on block devices.
//!
//! The driver needs four kernel-facing operations: probe a device for
//! a filesystem signature, format it, mount it, and unmount it.
//! [`SysFsOps`] shells out to `blkid`, `mkfs.ext4`, `mount`, and
//! `umount`; [`MemFsOps`] simulates the same state for tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use berth_core::{CoreError, CoreResult};

/// Filesystem the driver formats bare devices with.
pub const FILESYSTEM: &str = "ext4";

/// Probe, format, mount, and unmount block devices.
#[async_trait]
pub trait FsOps: Send + Sync {
    /// Does the device carry a filesystem signature?
    async fn has_filesystem(&self, device: &str) -> CoreResult<bool>;

    async fn format(&self, device: &str) -> CoreResult<()>;

    async fn mount(&self, device: &str, path: &Path) -> CoreResult<()>;

    /// Kernel unmount; fails with `Busy` while files are open.
    async fn unmount(&self, path: &Path) -> CoreResult<()>;

    /// Is any device mounted at the path?
    async fn is_mounted(&self, path: &Path) -> CoreResult<bool>;
}

/// Real filesystem operations via the system tools.
pub struct SysFsOps;

impl SysFsOps {
    async fn run(program: &str, args: &[&str]) -> CoreResult<std::process::Output> {
        Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| CoreError::Internal(format!("exec {program}: {e}")))
    }
}

#[async_trait]
impl FsOps for SysFsOps {
    async fn has_filesystem(&self, device: &str) -> CoreResult<bool> {
        // blkid exits 0 with output when a signature is found and 2
        // when the probe comes back empty.
        let output = Self::run("blkid", &["-p", "-o", "export", device]).await?;
        if output.status.success() {
            return Ok(!output.stdout.is_empty());
        }
        match output.status.code() {
            Some(2) => Ok(false),
            _ => Err(CoreError::Internal(format!(
                "blkid {device}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }

    async fn format(&self, device: &str) -> CoreResult<()> {
        info!(%device, fs = FILESYSTEM, "formatting device");
        let output = Self::run(&format!("mkfs.{FILESYSTEM}"), &[device]).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(CoreError::Internal(format!(
                "mkfs.{FILESYSTEM} {device}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    async fn mount(&self, device: &str, path: &Path) -> CoreResult<()> {
        let path_str = path.to_string_lossy();
        let output = Self::run("mount", &[device, &path_str]).await?;
        if output.status.success() {
            debug!(%device, %path_str, "device mounted");
            Ok(())
        } else {
            Err(CoreError::Internal(format!(
                "mount {device} {path_str}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    async fn unmount(&self, path: &Path) -> CoreResult<()> {
        let path_str = path.to_string_lossy();
        let output = Self::run("umount", &[&path_str]).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("target is busy") || stderr.contains("device is busy") {
            return Err(CoreError::Busy(format!("{path_str} has open files")));
        }
        Err(CoreError::Internal(format!(
            "umount {path_str}: {}",
            stderr.trim()
        )))
    }

    async fn is_mounted(&self, path: &Path) -> CoreResult<bool> {
        let mounts = tokio::fs::read_to_string("/proc/self/mounts").await?;
        let path_str = path.to_string_lossy();
        Ok(mounts
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .any(|mount_point| mount_point == path_str))
    }
}

#[derive(Default)]
struct MemFsState {
    formatted: HashSet<String>,
    /// mount path -> device
    mounted: HashMap<PathBuf, String>,
    /// Paths that refuse to unmount, as if a container held files open.
    busy: HashSet<PathBuf>,
    format_count: u32,
    mount_count: u32,
}

/// In-memory filesystem double.
#[derive(Default)]
pub struct MemFsOps {
    state: Mutex<MemFsState>,
}

impl MemFsOps {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemFsState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark a path busy so unmount fails with `Busy`. Test hook.
    pub fn set_busy(&self, path: &Path, busy: bool) {
        let mut state = self.lock();
        if busy {
            state.busy.insert(path.to_path_buf());
        } else {
            state.busy.remove(path);
        }
    }

    pub fn format_count(&self) -> u32 {
        self.lock().format_count
    }

    pub fn mount_count(&self) -> u32 {
        self.lock().mount_count
    }

    pub fn mounted_device(&self, path: &Path) -> Option<String> {
        self.lock().mounted.get(path).cloned()
    }
}

#[async_trait]
impl FsOps for MemFsOps {
    async fn has_filesystem(&self, device: &str) -> CoreResult<bool> {
        Ok(self.lock().formatted.contains(device))
    }

    async fn format(&self, device: &str) -> CoreResult<()> {
        let mut state = self.lock();
        state.formatted.insert(device.to_string());
        state.format_count += 1;
        Ok(())
    }

    async fn mount(&self, device: &str, path: &Path) -> CoreResult<()> {
        let mut state = self.lock();
        if let Some(existing) = state.mounted.get(path) {
            if existing != device {
                return Err(CoreError::Internal(format!(
                    "{} already mounted at {}",
                    existing,
                    path.display()
                )));
            }
            return Ok(());
        }
        state.mounted.insert(path.to_path_buf(), device.to_string());
        state.mount_count += 1;
        Ok(())
    }

    async fn unmount(&self, path: &Path) -> CoreResult<()> {
        let mut state = self.lock();
        if state.busy.contains(path) {
            return Err(CoreError::Busy(format!("{} has open files", path.display())));
        }
        if state.mounted.remove(path).is_none() {
            return Err(CoreError::Internal(format!(
                "{} is not mounted",
                path.display()
            )));
        }
        Ok(())
    }

    async fn is_mounted(&self, path: &Path) -> CoreResult<bool> {
        Ok(self.lock().mounted.contains_key(path))
    }
}
