//! Filesystem table records.
//!
//! The mount subsystem owns the table; this module only gives it a typed
//! shape and a reader for the five-column text format:
//!
//! ```text
//! <src> <mount_point> <type> <mount_flags> <fs_mgr_flags>
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// One mount-point record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FstabEntry {
    pub blk_device: String,
    pub mount_point: String,
    pub fs_type: String,
    /// Comma-separated kernel mount flags, split
    pub mount_flags: Vec<String>,
    /// Comma-separated manager flags (`wait`, `check`, `fileencryption=...`), split
    pub fs_mgr_flags: Vec<String>,
}

impl FstabEntry {
    /// Returns true if the manager flags contain `flag` (or `flag=...`)
    pub fn has_fs_mgr_flag(&self, flag: &str) -> bool {
        self.fs_mgr_flags
            .iter()
            .any(|f| f == flag || f.strip_prefix(flag).is_some_and(|rest| rest.starts_with('=')))
    }

    /// Protected by dm-verity, either the legacy `verify` flag or AVB
    pub fn is_verity_enabled(&self) -> bool {
        self.has_fs_mgr_flag("verify") || self.has_fs_mgr_flag("avb")
    }

    /// Partition name used in `partition.<name>.verified`.
    ///
    /// The root mount point is reported as `system` so system-as-root devices
    /// publish the same property as devices with a separate system mount.
    pub fn verity_partition(&self) -> &str {
        if self.mount_point == "/" {
            return "system";
        }
        Path::new(&self.mount_point)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(&self.mount_point)
    }
}

/// Ordered list of mount records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fstab {
    pub entries: Vec<FstabEntry>,
}

impl Fstab {
    /// Parse fstab text. Blank lines and `#` comments are skipped.
    pub fn parse(content: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 5 {
                bail!(
                    "fstab line {}: expected 5 fields, found {}",
                    idx + 1,
                    fields.len()
                );
            }
            entries.push(FstabEntry {
                blk_device: fields[0].to_string(),
                mount_point: fields[1].to_string(),
                fs_type: fields[2].to_string(),
                mount_flags: split_flags(fields[3]),
                fs_mgr_flags: split_flags(fields[4]),
            });
        }
        Ok(Self { entries })
    }

    /// Load an fstab file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read fstab {:?}", path.as_ref()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse fstab {:?}", path.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn split_flags(field: &str) -> Vec<String> {
    field
        .split(',')
        .filter(|f| !f.is_empty() && *f != "defaults")
        .map(str::to_string)
        .collect()
}
