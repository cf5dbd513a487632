//! Service lifecycle control.
//!
//! Bulk transitions over every service carrying a class tag, plus the
//! single-service and interface commands. Class starts honor the persisted
//! `persist.init.dont_start_class.<tag>` gate; explicit single-service starts
//! do not.

use crate::error::{BuiltinError, Result, ignore_enoent};
use crate::platform::{Platform, PropertyStore, ServiceList};
use crate::types::{ExecContext, Transition};
use std::sync::Arc;

/// Prefix of the per-class suppression gate
pub const DONT_START_CLASS_PREFIX: &str = "persist.init.dont_start_class.";

/// Applies lifecycle transitions through the service registry
#[derive(Clone)]
pub struct ServiceClassController {
    services: Arc<dyn ServiceList>,
    properties: Arc<dyn PropertyStore>,
    apex_updatable: bool,
}

impl ServiceClassController {
    pub fn new(platform: &Platform) -> Self {
        Self {
            services: Arc::clone(&platform.services),
            properties: Arc::clone(&platform.properties),
            apex_updatable: platform.device.apex_updatable,
        }
    }

    /// True if `persist.init.dont_start_class.<class>` is set
    pub fn is_suppressed(&self, class: &str) -> bool {
        self.properties
            .get_bool(&format!("{}{}", DONT_START_CLASS_PREFIX, class), false)
    }

    // ========================================================================
    // Class operations
    // ========================================================================

    /// Start every enabled member of `class`.
    ///
    /// Per-service failures are logged and the remaining members still start.
    pub fn start_class(&self, class: &str) -> Result<()> {
        if self.is_suppressed(class) {
            log::info!("Not starting class '{}': suppressed by property", class);
            return Ok(());
        }
        self.for_each_tolerant(class, Transition::StartIfNotDisabled);
        Ok(())
    }

    pub fn stop_class(&self, class: &str) -> Result<()> {
        self.for_each_tolerant(class, Transition::Stop);
        Ok(())
    }

    pub fn reset_class(&self, class: &str) -> Result<()> {
        self.for_each_tolerant(class, Transition::Reset);
        Ok(())
    }

    /// Restart every member of `class`; the start gate applies here too
    pub fn restart_class(&self, class: &str) -> Result<()> {
        if self.is_suppressed(class) {
            log::info!("Not restarting class '{}': suppressed by property", class);
            return Ok(());
        }
        self.for_each_tolerant(class, Transition::Restart);
        Ok(())
    }

    /// Restart members of `class` that `post_data_reset` stopped
    pub fn post_data_start(&self, class: &str, context: ExecContext) -> Result<()> {
        self.require_init("class_start_post_data", context)?;
        if !self.apex_updatable {
            // Nothing was stopped on devices without updatable modules
            return Ok(());
        }
        self.for_each_tolerant(class, Transition::StartIfPostData);
        Ok(())
    }

    /// Reset members of `class` started after the post-data mark
    pub fn post_data_reset(&self, class: &str, context: ExecContext) -> Result<()> {
        self.require_init("class_reset_post_data", context)?;
        if !self.apex_updatable {
            return Ok(());
        }
        self.for_each_tolerant(class, Transition::ResetIfPostData);
        Ok(())
    }

    pub fn mark_post_data(&self) {
        self.services.mark_post_data();
    }

    // ========================================================================
    // Single services
    // ========================================================================

    /// `start <service>`. A missing executable is ENOENT-suppressible.
    pub fn start(&self, name: &str) -> Result<()> {
        self.require_service(name)?;
        ignore_enoent(
            self.services
                .apply(name, Transition::Start)
                .map_err(|e| BuiltinError::external("Could not start service", e)),
        )
    }

    pub fn stop(&self, name: &str) -> Result<()> {
        self.require_service(name)?;
        self.apply_logged(name, Transition::Stop);
        Ok(())
    }

    pub fn restart(&self, name: &str) -> Result<()> {
        self.require_service(name)?;
        self.apply_logged(name, Transition::Restart);
        Ok(())
    }

    pub fn enable(&self, name: &str) -> Result<()> {
        if !self.services.contains(name) {
            return Err(BuiltinError::general("Could not find service"));
        }
        self.services
            .apply(name, Transition::Enable)
            .map_err(|e| BuiltinError::external("Could not enable service", e))
    }

    /// Start a declared service and hold the queue until it exits
    pub fn exec_start(&self, name: &str) -> Result<()> {
        if !self.services.contains(name) {
            return Err(BuiltinError::general("Service not found"));
        }
        self.services
            .apply(name, Transition::ExecStart)
            .map_err(|e| BuiltinError::external("Could not start exec service", e))
    }

    pub fn interface_start(&self, interface: &str) -> Result<()> {
        let name = self.require_interface(interface)?;
        self.services
            .apply(&name, Transition::Start)
            .map_err(|e| BuiltinError::external("Could not start interface", e))
    }

    pub fn interface_stop(&self, interface: &str) -> Result<()> {
        let name = self.require_interface(interface)?;
        self.apply_logged(&name, Transition::Stop);
        Ok(())
    }

    pub fn interface_restart(&self, interface: &str) -> Result<()> {
        let name = self.require_interface(interface)?;
        self.apply_logged(&name, Transition::Restart);
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn for_each_tolerant(&self, class: &str, transition: Transition) {
        for name in self.services.class_members(class) {
            if let Err(e) = self.services.apply(&name, transition) {
                log::error!(
                    "Could not {} service '{}' as part of class '{}': {}",
                    transition,
                    name,
                    class,
                    e
                );
            }
        }
    }

    fn apply_logged(&self, name: &str, transition: Transition) {
        if let Err(e) = self.services.apply(name, transition) {
            log::warn!("{} of service '{}' failed: {}", transition, name, e);
        }
    }

    fn require_service(&self, name: &str) -> Result<()> {
        if self.services.contains(name) {
            Ok(())
        } else {
            Err(BuiltinError::general(format!("service {} not found", name)))
        }
    }

    fn require_interface(&self, interface: &str) -> Result<String> {
        self.services
            .find_interface(interface)
            .ok_or_else(|| BuiltinError::general(format!("interface {} not found", interface)))
    }

    fn require_init(&self, command: &str, context: ExecContext) -> Result<()> {
        if context == ExecContext::Init {
            Ok(())
        } else {
            Err(BuiltinError::Context {
                name: command.to_string(),
            })
        }
    }
}
