//! Device profiles for simulated runs.
//!
//! A profile describes the device the builtins run against: process and
//! device flags, seed properties, declared services and the scripted
//! behaviour of the mount subsystem. Profiles are JSON files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;

use crate::builtins::props::is_legal_property_name;
use crate::mount::outcome::codes;
use crate::platform::DeviceFlags;
use crate::types::MountMode;

/// A service known to the supervisor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceDecl {
    pub name: String,
    pub classes: Vec<String>,
    /// Explicitly disabled: class starts skip it
    pub disabled: bool,
    pub interfaces: Vec<String>,
    /// Treat as started after `mark_post_data`
    pub post_data: bool,
    /// Starting fails with ENOENT
    pub missing_binary: bool,
}

/// Scripted results of the mount subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsManagerScript {
    pub default_fstab: String,
    /// `mount_all` return code per mode
    pub mount_all: HashMap<MountMode, i32>,
    pub remount_code: i32,
    pub umount_all_code: i32,
    pub swapon_ok: bool,
    pub keyring_ok: bool,
    /// Result of setting a directory encryption policy
    pub set_policy_ok: bool,
    /// Loaded verity mode; `None` makes loading fail
    pub verity_mode: Option<i32>,
}

impl Default for FsManagerScript {
    fn default() -> Self {
        Self {
            default_fstab: "/etc/fstab".to_string(),
            mount_all: HashMap::new(),
            remount_code: 0,
            umount_all_code: 0,
            swapon_ok: true,
            keyring_ok: true,
            set_policy_ok: true,
            verity_mode: Some(0),
        }
    }
}

impl FsManagerScript {
    /// Scripted code for `mode`; unscripted passes report "not encrypted"
    pub fn mount_all_code(&self, mode: MountMode) -> i32 {
        self.mount_all
            .get(&mode)
            .copied()
            .unwrap_or(codes::NOT_ENCRYPTED)
    }
}

/// A simulated device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceProfile {
    pub name: String,
    /// Run as the primary init process
    pub primary_process: bool,
    pub gsi_running: bool,
    pub apex_updatable: bool,
    pub fscrypt_native: bool,
    pub properties: BTreeMap<String, String>,
    pub services: Vec<ServiceDecl>,
    pub fs_mgr: FsManagerScript,
    /// Exit code of one-shot services, keyed by program path
    pub exec_exit_codes: BTreeMap<String, i32>,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            name: "generic".to_string(),
            primary_process: true,
            gsi_running: false,
            apex_updatable: false,
            fscrypt_native: true,
            properties: BTreeMap::new(),
            services: Vec::new(),
            fs_mgr: FsManagerScript::default(),
            exec_exit_codes: BTreeMap::new(),
        }
    }
}

impl DeviceProfile {
    /// Save profile to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize profile to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write profile to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load profile from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read profile from {:?}", path.as_ref()))?;

        let profile: Self =
            serde_json::from_str(&content).context("Failed to parse profile JSON")?;

        Ok(profile)
    }

    /// Validate the profile
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for service in &self.services {
            if service.name.trim().is_empty() {
                anyhow::bail!("Service names must not be empty");
            }
            if !seen.insert(service.name.as_str()) {
                anyhow::bail!("Service '{}' is declared twice", service.name);
            }
        }

        for name in self.properties.keys() {
            if !is_legal_property_name(name) {
                anyhow::bail!("Illegal property name '{}'", name);
            }
        }

        if self.fs_mgr.default_fstab.trim().is_empty() {
            anyhow::bail!("Default fstab path must be specified");
        }

        Ok(())
    }

    pub fn device_flags(&self) -> DeviceFlags {
        DeviceFlags {
            primary_process: self.primary_process,
            gsi_running: self.gsi_running,
            apex_updatable: self.apex_updatable,
            fscrypt_native: self.fscrypt_native,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile_is_valid() {
        DeviceProfile::default().validate().expect("default profile");
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("device.json");

        let mut profile = DeviceProfile::default();
        profile.gsi_running = true;
        profile.fs_mgr.mount_all.insert(MountMode::Late, codes::FILE_ENCRYPTED);
        profile.services.push(ServiceDecl {
            name: "vold".into(),
            classes: vec!["core".into()],
            ..ServiceDecl::default()
        });
        profile.save_to_file(&path).expect("save");

        let loaded = DeviceProfile::load_from_file(&path).expect("load");
        assert_eq!(loaded, profile);
        assert_eq!(loaded.fs_mgr.mount_all_code(MountMode::Late), codes::FILE_ENCRYPTED);
        assert_eq!(loaded.fs_mgr.mount_all_code(MountMode::Default), codes::NOT_ENCRYPTED);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let profile: DeviceProfile = serde_json::from_str(
            r#"{ "name": "walleye", "fs_mgr": { "mount_all": { "default": 4 } } }"#,
        )
        .expect("parse");
        assert!(profile.primary_process);
        assert!(profile.fs_mgr.keyring_ok);
        assert_eq!(profile.fs_mgr.mount_all_code(MountMode::Default), codes::NEEDS_RECOVERY);
    }

    #[test]
    fn test_duplicate_service_rejected() {
        let mut profile = DeviceProfile::default();
        let svc = ServiceDecl {
            name: "logd".into(),
            ..ServiceDecl::default()
        };
        profile.services = vec![svc.clone(), svc];
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_illegal_property_name_rejected() {
        let mut profile = DeviceProfile::default();
        profile.properties.insert("bad..name".into(), "1".into());
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(DeviceProfile::load_from_file("/nonexistent/profile.json").is_err());
    }
}
