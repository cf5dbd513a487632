//! Reboot into recovery.
//!
//! A recovery request is persisted to the bootloader message area first. If
//! that fails nothing else happens and the caller gets an error it may
//! handle. Once the message is written, the primary process ends the boot
//! with a terminal [`Flow`]; a restricted context has no shutdown authority
//! and instead asks for the same transition through `sys.powerctl`.

use crate::dispatch::Flow;
use crate::error::{BuiltinError, Result};
use crate::platform::{BootloaderMessage, Platform, PowerControl, PropertyStore};
use std::sync::Arc;

/// Shutdown reason used for every recovery reboot
pub const RECOVERY_SHUTDOWN: &str = "reboot,recovery";

/// Property watched by the primary process for shutdown requests
pub const POWERCTL_PROPERTY: &str = "sys.powerctl";

/// Ordered recovery options with exactly one `--reason=` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryRequest {
    options: Vec<String>,
}

impl RecoveryRequest {
    /// Build a request from action flags and a reason.
    ///
    /// Any `--reason=` entries in `flags` are dropped so the reason is unique.
    pub fn new<I, S>(flags: I, reason: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut options: Vec<String> = flags
            .into_iter()
            .map(Into::into)
            .filter(|o| !o.starts_with("--reason="))
            .collect();
        options.push(format!("--reason={}", reason));
        Self { options }
    }

    /// Unconditional data wipe
    pub fn wipe_data(reason: &str) -> Self {
        Self::new(["--wipe_data"], reason)
    }

    /// Ask the user before wiping data
    pub fn prompt_and_wipe_data(reason: &str) -> Self {
        Self::new(["--prompt_and_wipe_data"], reason)
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    pub fn reason(&self) -> &str {
        self.options
            .iter()
            .find_map(|o| o.strip_prefix("--reason="))
            .unwrap_or("")
    }
}

/// Persists recovery requests and triggers the reboot
#[derive(Clone)]
pub struct RecoveryEscalation {
    bootloader: Arc<dyn BootloaderMessage>,
    properties: Arc<dyn PropertyStore>,
    primary_process: bool,
}

impl RecoveryEscalation {
    pub fn new(platform: &Platform) -> Self {
        Self {
            bootloader: Arc::clone(&platform.bootloader),
            properties: Arc::clone(&platform.properties),
            primary_process: platform.device.primary_process,
        }
    }

    /// Write the request and request the reboot.
    ///
    /// Returns `Flow::Terminal` in the primary process, `Flow::Continue` after
    /// relaying through `sys.powerctl` elsewhere.
    ///
    /// # Errors
    ///
    /// `External` if the bootloader message cannot be written; in that case
    /// no reboot is requested.
    pub fn reboot_into_recovery(&self, request: &RecoveryRequest) -> Result<Flow> {
        log::error!("Rebooting into recovery, reason: {}", request.reason());
        self.bootloader
            .write(request.options())
            .map_err(|e| BuiltinError::external("Failed to set bootloader message", e))?;

        if self.primary_process {
            return Ok(Flow::terminal(RECOVERY_SHUTDOWN));
        }

        self.properties
            .set(POWERCTL_PROPERTY, RECOVERY_SHUTDOWN)
            .map_err(|e| BuiltinError::external("Failed to request reboot", e))?;
        Ok(Flow::Continue)
    }

    /// Like [`reboot_into_recovery`](Self::reboot_into_recovery), but performs
    /// a terminal shutdown directly. Used from completion callbacks, which
    /// have no caller to hand a `Flow` back to.
    pub fn escalate(&self, power: &dyn PowerControl, request: &RecoveryRequest) -> Result<()> {
        if let Flow::Terminal { reason } = self.reboot_into_recovery(request)? {
            power.shutdown(&reason);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_file::DeviceProfile;
    use crate::platform::memory::SimulatedDevice;

    #[test]
    fn test_request_has_single_reason() {
        let req = RecoveryRequest::new(["--wipe_data", "--reason=old"], "fs_mgr_mount_all");
        assert_eq!(req.options(), ["--wipe_data", "--reason=fs_mgr_mount_all"]);
        assert_eq!(req.reason(), "fs_mgr_mount_all");
    }

    #[test]
    fn test_primary_process_returns_terminal() {
        let device = SimulatedDevice::new(&DeviceProfile::default());
        let recovery = RecoveryEscalation::new(&device.platform());

        let flow = recovery
            .reboot_into_recovery(&RecoveryRequest::wipe_data("test"))
            .expect("escalation");
        assert_eq!(flow, Flow::terminal(RECOVERY_SHUTDOWN));
        assert_eq!(device.bootloader.messages(), [["--wipe_data", "--reason=test"]]);
        assert_eq!(device.properties.get(POWERCTL_PROPERTY), None);
    }

    #[test]
    fn test_subcontext_relays_through_property() {
        let profile = DeviceProfile {
            primary_process: false,
            ..DeviceProfile::default()
        };
        let device = SimulatedDevice::new(&profile);
        let recovery = RecoveryEscalation::new(&device.platform());

        let flow = recovery
            .reboot_into_recovery(&RecoveryRequest::wipe_data("test"))
            .expect("escalation");
        assert_eq!(flow, Flow::Continue);
        assert_eq!(
            device.properties.get(POWERCTL_PROPERTY).as_deref(),
            Some(RECOVERY_SHUTDOWN)
        );
    }

    #[test]
    fn test_persistence_failure_has_no_side_effects() {
        let device = SimulatedDevice::new(&DeviceProfile::default());
        device.bootloader.fail_writes(true);
        let recovery = RecoveryEscalation::new(&device.platform());

        let err = recovery
            .escalate(&*device.power, &RecoveryRequest::wipe_data("test"))
            .unwrap_err();
        assert!(matches!(err, BuiltinError::External { .. }));
        assert!(device.power.requests().is_empty());
        assert!(device.bootloader.messages().is_empty());
    }

    #[test]
    fn test_escalate_shuts_down() {
        let device = SimulatedDevice::new(&DeviceProfile::default());
        let recovery = RecoveryEscalation::new(&device.platform());
        recovery
            .escalate(&*device.power, &RecoveryRequest::prompt_and_wipe_data("init_user0_failed"))
            .expect("escalation");
        assert_eq!(device.power.requests(), [RECOVERY_SHUTDOWN]);
    }
}
