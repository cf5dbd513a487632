//! One-shot helper processes.
//!
//! `exec` and `exec_background` run a temporary service built from their
//! argument vector. [`ExecEscalation`] wraps the same mechanism with a
//! completion observer that reports any unclean exit through a callback;
//! the storage-setup helpers use it to fall back to a recovery reboot.

use crate::error::{BuiltinError, Result};
use crate::platform::{Platform, PowerControl, ServiceList};
use crate::recovery::{RecoveryEscalation, RecoveryRequest};
use nix::sys::wait::WaitStatus;
use std::sync::Arc;

/// Storage helper binary
pub const VDC: &str = "/system/bin/vdc";

/// Failure callback; receives a human-readable description
pub type FailureFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Describe a terminated one-shot, or `None` for a clean exit
pub fn describe_failure(status: WaitStatus) -> Option<String> {
    match status {
        WaitStatus::Exited(_, 0) => None,
        WaitStatus::Exited(_, code) => Some(format!("Exec service failed, status {}", code)),
        WaitStatus::Signaled(_, signal, _) => {
            Some(format!("Exec service failed, status {}", signal as i32))
        }
        other => Some(format!("Exec service failed, status {:?}", other)),
    }
}

/// Runs helper processes and reports their failures
#[derive(Clone)]
pub struct ExecEscalation {
    services: Arc<dyn ServiceList>,
}

impl ExecEscalation {
    pub fn new(platform: &Platform) -> Self {
        Self {
            services: Arc::clone(&platform.services),
        }
    }

    /// `exec`: run in the foreground and block the queue until it exits
    pub fn exec(&self, argv: &[String]) -> Result<()> {
        let mut service = self
            .services
            .make_oneshot(argv)
            .map_err(|e| BuiltinError::external("Could not create exec service", e))?;
        service
            .exec_start()
            .map_err(|e| BuiltinError::external("Could not start exec service", e))?;
        self.services.add_service(service);
        Ok(())
    }

    /// `exec_background`: start without blocking
    pub fn exec_background(&self, argv: &[String]) -> Result<()> {
        let mut service = self
            .services
            .make_oneshot(argv)
            .map_err(|e| BuiltinError::external("Could not create exec background service", e))?;
        service
            .start()
            .map_err(|e| BuiltinError::external("Could not start exec background service", e))?;
        self.services.add_service(service);
        Ok(())
    }

    /// Run `argv` as a one-shot and invoke `on_failure` if it cannot be
    /// created, cannot be started, or exits with anything but status 0.
    ///
    /// Failures are reported only through the callback. The service is
    /// handed to the registry once created, whatever its start result.
    pub fn run_with_failure_callback(&self, argv: &[String], on_failure: FailureFn) -> Result<()> {
        let mut service = match self.services.make_oneshot(argv) {
            Ok(service) => service,
            Err(e) => {
                on_failure(&format!("MakeTemporaryOneshotService failed: {}", e));
                return Ok(());
            }
        };

        let observer = Arc::clone(&on_failure);
        service.add_reap_callback(Box::new(move |status| {
            if let Some(message) = describe_failure(status) {
                observer(&message);
            }
        }));

        if let Err(e) = service.exec_start() {
            on_failure(&format!("ExecStart failed: {}", e));
        }

        self.services.add_service(service);
        Ok(())
    }

    /// Run the storage helper with `op` and reboot into recovery on failure.
    ///
    /// The reboot only happens with native file encryption outside a GSI
    /// session; otherwise the failure is logged.
    pub fn exec_vdc_reboot_on_failure(&self, platform: &Platform, op: &str) -> Result<()> {
        let reason = format!("{}_failed", op);
        let may_wipe = platform.device.fscrypt_native && !platform.device.gsi_running;
        let recovery = RecoveryEscalation::new(platform);
        let power: Arc<dyn PowerControl> = Arc::clone(&platform.power);

        let on_failure: FailureFn = Arc::new(move |message: &str| {
            if !may_wipe {
                log::error!("Failure (reboot suppressed): {}", reason);
                return;
            }
            log::error!("{}: Rebooting into recovery, reason: {}", message, reason);
            let request = RecoveryRequest::prompt_and_wipe_data(&reason);
            if let Err(e) = recovery.escalate(power.as_ref(), &request) {
                log::error!("Could not reboot into recovery: {}", e);
            }
        });

        let argv: Vec<String> = ["exec", VDC, "--wait", "cryptfs", op]
            .iter()
            .map(|s| s.to_string())
            .collect();
        self.run_with_failure_callback(&argv, on_failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_file::DeviceProfile;
    use crate::platform::memory::SimulatedDevice;
    use crate::recovery::RECOVERY_SHUTDOWN;
    use nix::sys::signal::Signal;
    use nix::unistd::Pid;
    use std::sync::Mutex;

    fn argv(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn collecting() -> (FailureFn, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: FailureFn = Arc::new(move |msg: &str| {
            sink.lock().unwrap().push(msg.to_string());
        });
        (callback, seen)
    }

    #[test]
    fn test_describe_failure() {
        let pid = Pid::from_raw(42);
        assert_eq!(describe_failure(WaitStatus::Exited(pid, 0)), None);
        assert_eq!(
            describe_failure(WaitStatus::Exited(pid, 2)).as_deref(),
            Some("Exec service failed, status 2")
        );
        assert_eq!(
            describe_failure(WaitStatus::Signaled(pid, Signal::SIGKILL, false)).as_deref(),
            Some("Exec service failed, status 9")
        );
    }

    #[test]
    fn test_nonzero_exit_reports_status() {
        let device = SimulatedDevice::new(&DeviceProfile::default());
        device.services.set_exit_code("/system/bin/helper", 2);
        let exec = ExecEscalation::new(&device.platform());
        let (callback, seen) = collecting();

        exec.run_with_failure_callback(&argv(&["exec", "/system/bin/helper"]), callback)
            .expect("run");
        assert_eq!(*seen.lock().unwrap(), ["Exec service failed, status 2"]);
        assert_eq!(device.services.registered_oneshots().len(), 1);
    }

    #[test]
    fn test_clean_exit_is_silent() {
        let device = SimulatedDevice::new(&DeviceProfile::default());
        device.services.set_exit_code("/system/bin/helper", 0);
        let exec = ExecEscalation::new(&device.platform());
        let (callback, seen) = collecting();

        exec.run_with_failure_callback(&argv(&["exec", "/system/bin/helper"]), callback)
            .expect("run");
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_creation_failure_reports_and_stops() {
        let device = SimulatedDevice::new(&DeviceProfile::default());
        device.services.fail_make_oneshot(true);
        let exec = ExecEscalation::new(&device.platform());
        let (callback, seen) = collecting();

        exec.run_with_failure_callback(&argv(&["exec", "/system/bin/helper"]), callback)
            .expect("run");
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].starts_with("MakeTemporaryOneshotService failed"));
        assert!(device.services.registered_oneshots().is_empty());
    }

    #[test]
    fn test_start_failure_still_registers() {
        let device = SimulatedDevice::new(&DeviceProfile::default());
        device.services.fail_exec_start(true);
        let exec = ExecEscalation::new(&device.platform());
        let (callback, seen) = collecting();

        exec.run_with_failure_callback(&argv(&["exec", "/system/bin/helper"]), callback)
            .expect("run");
        assert!(seen.lock().unwrap()[0].starts_with("ExecStart failed"));
        assert_eq!(device.services.registered_oneshots().len(), 1);
    }

    #[test]
    fn test_late_reap_reports_signal() {
        let device = SimulatedDevice::new(&DeviceProfile::default());
        let exec = ExecEscalation::new(&device.platform());
        let (callback, seen) = collecting();

        exec.run_with_failure_callback(&argv(&["exec", "/system/bin/helper"]), callback)
            .expect("run");
        assert!(seen.lock().unwrap().is_empty());

        let name = device.services.registered_oneshots().remove(0);
        device.services.reap(
            &name,
            WaitStatus::Signaled(Pid::from_raw(1000), Signal::SIGABRT, true),
        );
        assert_eq!(*seen.lock().unwrap(), ["Exec service failed, status 6"]);
    }

    #[test]
    fn test_vdc_failure_reboots_into_recovery() {
        let device = SimulatedDevice::new(&DeviceProfile::default());
        device.services.set_exit_code(VDC, 2);
        let platform = device.platform();

        ExecEscalation::new(&platform)
            .exec_vdc_reboot_on_failure(&platform, "init_user0")
            .expect("run");
        assert_eq!(
            device.bootloader.messages(),
            [["--prompt_and_wipe_data", "--reason=init_user0_failed"]]
        );
        assert_eq!(device.power.requests(), [RECOVERY_SHUTDOWN]);
    }

    #[test]
    fn test_vdc_failure_under_gsi_only_logs() {
        let device = SimulatedDevice::new(&DeviceProfile {
            gsi_running: true,
            ..DeviceProfile::default()
        });
        device.services.set_exit_code(VDC, 2);
        let platform = device.platform();

        ExecEscalation::new(&platform)
            .exec_vdc_reboot_on_failure(&platform, "enablefilecrypto")
            .expect("run");
        assert!(device.bootloader.messages().is_empty());
        assert!(device.power.requests().is_empty());
    }

    #[test]
    fn test_plain_exec_errors() {
        let device = SimulatedDevice::new(&DeviceProfile::default());
        let exec = ExecEscalation::new(&device.platform());
        exec.exec(&argv(&["exec", "/system/bin/true"])).expect("exec");
        exec.exec_background(&argv(&["exec_background", "/system/bin/true"]))
            .expect("exec_background");
        assert_eq!(device.services.registered_oneshots().len(), 2);

        device.services.fail_exec_start(true);
        let err = exec.exec(&argv(&["exec", "/system/bin/true"])).unwrap_err();
        assert!(err.to_string().starts_with("Could not start exec service"));
    }
}
