//! Mount orchestration.
//!
//! Drives the mount subsystem over one boot pass and turns its return code
//! into crypto properties, boot events or a recovery reboot.
//!
//! # Pass Flow
//!
//! ```text
//! mount_all <fstab> [<rc path>]* [--early|--late]
//!     read fstab → mount_all(fstab, mode) → record timing
//!         ↓ (not --early)
//!     import deferred rc files
//!         ↓ (not --early)
//!     store primary outcome → classify → effect
//!
//! remount_userdata
//!     stored primary outcome? ──no──→ "too early"
//!         ↓
//!     remount into checkpointing ──fail──→ terminal shutdown
//!         ↓
//!     classify stored outcome (re-entry rules)
//! ```

pub mod outcome;

use crate::dispatch::Flow;
use crate::error::{BuiltinError, Result};
use crate::platform::Platform;
use crate::recovery::{RecoveryEscalation, RecoveryRequest};
use crate::types::{CryptoState, CryptoType, MountMode};
use outcome::MountOutcome;
use std::sync::OnceLock;
use std::time::Instant;

/// Reboot reason when a block-encryption outcome shows up on re-entry
pub const FDE_REMOUNT_SHUTDOWN: &str = "reboot,requested-userdata-remount-on-fde-device";

/// Reboot reason when userdata cannot be remounted into checkpointing
pub const REMOUNT_FAILED_SHUTDOWN: &str = "reboot,mount-userdata-failed";

pub const CRYPTO_STATE_PROPERTY: &str = "ro.crypto.state";
pub const CRYPTO_TYPE_PROPERTY: &str = "ro.crypto.type";

/// Recovery reason for a mount-all pass that asked for a wipe
pub const MOUNT_ALL_RECOVERY_REASON: &str = "fs_mgr_mount_all";

/// Parsed `mount_all` arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountAllArgs {
    pub fstab: String,
    /// Deferred rc files to import; empty means use the fallback list
    pub import_paths: Vec<String>,
    pub mode: MountMode,
}

impl MountAllArgs {
    /// Parse the arguments after the command name.
    ///
    /// Trailing `--early`/`--late` flags select the mode and end the path list.
    pub fn parse(params: &[String]) -> Result<Self> {
        let fstab = params
            .first()
            .ok_or_else(|| BuiltinError::invalid("mount_all requires an fstab"))?
            .clone();

        let mut mode = MountMode::Default;
        let mut path_end = params.len();
        for (idx, param) in params.iter().enumerate().skip(1).rev() {
            if let Some(flag_mode) = MountMode::from_flag(param) {
                mode = flag_mode;
                path_end = idx;
            }
        }

        Ok(Self {
            fstab,
            import_paths: params[1..path_end].to_vec(),
            mode,
        })
    }
}

/// Outcome code of the primary mount pass. Written once, read by every
/// later `remount_userdata`.
#[derive(Debug, Default)]
pub struct PrimaryMountOutcome(OnceLock<i32>);

impl PrimaryMountOutcome {
    /// Store the code. Returns false (and keeps the first value) on a second write.
    pub fn record(&self, code: i32) -> bool {
        self.0.set(code).is_ok()
    }

    /// The stored code
    ///
    /// # Errors
    ///
    /// `TooEarly` if no primary pass has completed
    pub fn code(&self) -> Result<i32> {
        self.0.get().copied().ok_or_else(|| BuiltinError::TooEarly {
            command: "remount_userdata".to_string(),
        })
    }

    pub fn outcome(&self) -> Option<MountOutcome> {
        self.0.get().copied().map(MountOutcome::from_code)
    }
}

/// State carried across mount passes within one boot
#[derive(Debug, Default)]
pub struct MountOrchestrator {
    primary: PrimaryMountOutcome,
    late_import_paths: Vec<String>,
}

impl MountOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an rc path for import by the next `mount_all` without explicit paths.
    ///
    /// Covers partitions on which early mount is not enabled.
    pub fn add_late_import_path(&mut self, path: impl Into<String>) {
        self.late_import_paths.push(path.into());
    }

    pub fn late_import_paths(&self) -> &[String] {
        &self.late_import_paths
    }

    pub fn primary(&self) -> &PrimaryMountOutcome {
        &self.primary
    }

    /// Run one mount-all pass.
    ///
    /// May return `Flow::Terminal` (recovery reboot); nothing else is done
    /// after that.
    pub fn mount_all(&mut self, platform: &Platform, args: &MountAllArgs) -> Result<Flow> {
        let fstab = platform
            .fs_mgr
            .read_fstab(&args.fstab)
            .map_err(|e| BuiltinError::external("Could not read fstab", e))?;

        let started = Instant::now();
        let code = platform.fs_mgr.mount_all(&fstab, args.mode);
        let elapsed_ms = started.elapsed().as_millis();
        set_property(platform, &args.mode.timing_property(), &elapsed_ms.to_string());
        log::info!(
            "mount_all {} ({}) returned {} after {}ms",
            args.fstab,
            args.mode,
            code,
            elapsed_ms
        );

        if args.mode == MountMode::Early {
            return Ok(Flow::Continue);
        }

        self.import_late(platform, &args.import_paths);

        if !self.primary.record(code) {
            log::warn!("Primary mount outcome already recorded; keeping the first one");
        }
        queue_fs_event(platform, code, false)
    }

    /// Re-enter classification after remounting userdata into checkpointing.
    ///
    /// Never runs the mount-all primitive again; the stored primary outcome
    /// is classified with the re-entry rules.
    pub fn remount_userdata(&self, platform: &Platform) -> Result<Flow> {
        let code = self.primary.code()?;

        let fstab = platform
            .fs_mgr
            .read_default_fstab()
            .map_err(|e| BuiltinError::external("Failed to read fstab", e))?;

        let rc = platform.fs_mgr.remount_userdata_into_checkpointing(&fstab);
        if rc < 0 {
            log::error!("Remounting userdata into checkpointing failed: {}", rc);
            return Ok(Flow::terminal(REMOUNT_FAILED_SHUTDOWN));
        }

        queue_fs_event(platform, code, true)
    }

    /// `umount_all <fstab>`
    pub fn umount_all(&self, platform: &Platform, fstab_path: &str) -> Result<Flow> {
        let fstab = platform
            .fs_mgr
            .read_fstab(fstab_path)
            .map_err(|e| BuiltinError::external("Could not read fstab", e))?;
        match platform.fs_mgr.umount_all(&fstab) {
            0 => Ok(Flow::Continue),
            rc => Err(BuiltinError::general(format!("umount_fstab() failed {}", rc))),
        }
    }

    /// `swapon_all <fstab>`
    pub fn swapon_all(&self, platform: &Platform, fstab_path: &str) -> Result<Flow> {
        let fstab = platform.fs_mgr.read_fstab(fstab_path).map_err(|e| {
            BuiltinError::external(format!("Could not read fstab '{}'", fstab_path), e)
        })?;
        if platform.fs_mgr.swapon_all(&fstab) {
            Ok(Flow::Continue)
        } else {
            Err(BuiltinError::general("swapon_all() failed"))
        }
    }

    fn import_late(&mut self, platform: &Platform, paths: &[String]) {
        if paths.is_empty() {
            for path in self.late_import_paths.drain(..) {
                if !platform.actions.parse_config(&path) {
                    log::warn!("Failed to import {}", path);
                }
            }
        } else {
            for path in paths {
                if !platform.actions.parse_config(path) {
                    log::warn!("Failed to import {}", path);
                }
            }
        }
    }
}

/// Apply the effect of a mount-all return code.
///
/// `userdata_remount` selects the re-entry rules: block-encryption outcomes
/// abort the boot and the keyring is not installed again.
pub fn queue_fs_event(platform: &Platform, code: i32, userdata_remount: bool) -> Result<Flow> {
    let outcome = MountOutcome::from_code(code);
    match outcome {
        MountOutcome::NeedsEncryption => {
            if userdata_remount {
                log::error!("Userdata remount is not supported on FDE devices");
                return Ok(Flow::terminal(FDE_REMOUNT_SHUTDOWN));
            }
            platform.actions.queue_event_trigger("encrypt");
            Ok(Flow::Continue)
        }
        MountOutcome::MightBeEncrypted => {
            if userdata_remount {
                log::error!("Userdata remount is not supported on FDE devices");
                return Ok(Flow::terminal(FDE_REMOUNT_SHUTDOWN));
            }
            set_crypto(platform, CryptoState::Encrypted, Some(CryptoType::Block));
            platform.actions.queue_event_trigger("defaultcrypto");
            Ok(Flow::Continue)
        }
        MountOutcome::NotEncrypted => {
            set_crypto(platform, CryptoState::Unencrypted, None);
            platform.actions.queue_event_trigger("nonencrypted");
            Ok(Flow::Continue)
        }
        MountOutcome::NotEncryptable => {
            set_crypto(platform, CryptoState::Unsupported, None);
            platform.actions.queue_event_trigger("nonencrypted");
            Ok(Flow::Continue)
        }
        MountOutcome::NeedsRecovery => {
            if platform.device.gsi_running {
                return Err(BuiltinError::general("cannot wipe within GSI"));
            }
            log::error!("mount_all suggested recovery, so wiping data via recovery");
            RecoveryEscalation::new(platform)
                .reboot_into_recovery(&RecoveryRequest::wipe_data(MOUNT_ALL_RECOVERY_REASON))
        }
        MountOutcome::FileEncrypted
        | MountOutcome::MetadataEncrypted
        | MountOutcome::NeedsMetadataEncryption => {
            if !userdata_remount && !platform.fs_mgr.install_keyring() {
                return Err(BuiltinError::general("FscryptInstallKeyring() failed"));
            }
            set_crypto(platform, CryptoState::Encrypted, Some(CryptoType::File));
            // The device key is already available, so boot continues as if unencrypted
            platform.actions.queue_event_trigger("nonencrypted");
            Ok(Flow::Continue)
        }
        MountOutcome::UnexpectedPositive(code) => {
            log::error!("mount_all returned unexpected error {}", code);
            Err(BuiltinError::UnexpectedPositive { code })
        }
        MountOutcome::ClassificationError(code) => Err(BuiltinError::Classification { code }),
    }
}

/// `verity_update_state`: publish `partition.<name>.verified=<mode>` for
/// every verity-protected entry of the default table.
pub fn update_verity_state(platform: &Platform) -> Result<Flow> {
    let mode = platform
        .fs_mgr
        .load_verity_state()
        .ok_or_else(|| BuiltinError::general("fs_mgr_load_verity_state() failed"))?;

    let fstab = platform
        .fs_mgr
        .read_default_fstab()
        .map_err(|e| BuiltinError::external("Failed to read default fstab", e))?;

    for entry in fstab.entries.iter().filter(|e| e.is_verity_enabled()) {
        let name = format!("partition.{}.verified", entry.verity_partition());
        set_property(platform, &name, &mode.to_string());
    }
    Ok(Flow::Continue)
}

fn set_crypto(platform: &Platform, state: CryptoState, kind: Option<CryptoType>) {
    set_property(platform, CRYPTO_STATE_PROPERTY, &state.to_string());
    if let Some(kind) = kind {
        set_property(platform, CRYPTO_TYPE_PROPERTY, &kind.to_string());
    }
}

fn set_property(platform: &Platform, name: &str, value: &str) {
    if let Err(e) = platform.properties.set(name, value) {
        log::warn!("Failed to set {} to {}: {}", name, value, e);
    }
}
