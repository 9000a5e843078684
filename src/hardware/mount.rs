//! Removable log medium detection from the kernel mount table.

use crate::config::StorageConfig;
use crate::hardware::capabilities::StorageProbe;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Default mount table on Linux.
pub const MOUNT_TABLE: &str = "/proc/mounts";

/// Reports whether `mount_point` appears as a target in a mount table.
#[derive(Debug, Clone)]
pub struct MountPointProbe {
    mount_point: PathBuf,
    mount_table: PathBuf,
}

impl MountPointProbe {
    /// Probe `mount_point` against [`MOUNT_TABLE`].
    pub fn new(mount_point: impl Into<PathBuf>) -> Self {
        Self {
            mount_point: mount_point.into(),
            mount_table: PathBuf::from(MOUNT_TABLE),
        }
    }

    /// Read a different mount table (tests, chroots).
    pub fn with_mount_table(mut self, table: impl Into<PathBuf>) -> Self {
        self.mount_table = table.into();
        self
    }

    /// A probe for the configured mount point, if one is set.
    pub fn from_config(config: &StorageConfig) -> Option<Self> {
        config.mount_point.as_ref().map(|path| Self::new(path.clone()))
    }

    /// Watched mount point.
    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }
}

/// `\040`-style octal escapes used for whitespace in mount table fields.
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            let parsed = std::str::from_utf8(digits)
                .ok()
                .and_then(|d| u8::from_str_radix(d, 8).ok());
            if let Some(value) = parsed {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

impl StorageProbe for MountPointProbe {
    fn is_mounted(&self) -> Result<bool> {
        let table = std::fs::read_to_string(&self.mount_table)
            .with_context(|| format!("reading {}", self.mount_table.display()))?;
        let target = self.mount_point.as_path();
        Ok(table
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .any(|field| Path::new(&unescape_mount_field(field)) == target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn table(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    const MOUNTS: &str = "\
/dev/root / ext4 rw,relatime 0 0
proc /proc proc rw,nosuid,nodev,noexec,relatime 0 0
/dev/sda1 /media/usb0 vfat rw,relatime,fmask=0022 0 0
/dev/sdb1 /media/LOG\\040STICK vfat rw 0 0
";

    #[test]
    fn finds_mounted_target() {
        let mounts = table(MOUNTS);
        let probe = MountPointProbe::new("/media/usb0").with_mount_table(mounts.path());
        assert!(probe.is_mounted().unwrap());
    }

    #[test]
    fn device_field_is_not_a_target() {
        let mounts = table(MOUNTS);
        let probe = MountPointProbe::new("/dev/sda1").with_mount_table(mounts.path());
        assert!(!probe.is_mounted().unwrap());
        let probe = MountPointProbe::new("/media/usb1").with_mount_table(mounts.path());
        assert!(!probe.is_mounted().unwrap());
    }

    #[test]
    fn escaped_whitespace_is_decoded() {
        let mounts = table(MOUNTS);
        let probe = MountPointProbe::new("/media/LOG STICK").with_mount_table(mounts.path());
        assert!(probe.is_mounted().unwrap());
    }

    #[test]
    fn unreadable_table_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let probe = MountPointProbe::new("/media/usb0").with_mount_table(dir.path().join("missing"));
        assert!(probe.is_mounted().is_err());
    }

    #[test]
    fn built_only_when_configured() {
        let mut config = StorageConfig::default();
        assert!(MountPointProbe::from_config(&config).is_none());
        config.mount_point = Some(PathBuf::from("/media/usb0"));
        let probe = MountPointProbe::from_config(&config).unwrap();
        assert_eq!(probe.mount_point(), Path::new("/media/usb0"));
    }
}
