//! Command invocations and the dispatcher.
//!
//! The dispatcher resolves an invocation against the [`CommandRegistry`],
//! checks arity and execution context, then hands the invocation to the
//! handler. It holds no state besides the registry; handlers mutate the
//! collaborators reachable through [`Builtins`].

use crate::builtins::Builtins;
use crate::error::{BuiltinError, Result};
use crate::registry::{CommandRegistry, CommandSpec, RegistryError};
use crate::types::ExecContext;
use std::ops::Index;

/// How control continues after a command
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Flow {
    /// Proceed with the next command
    #[default]
    Continue,
    /// The device is going down. Nothing may run after this.
    Terminal { reason: String },
}

impl Flow {
    pub fn terminal(reason: impl Into<String>) -> Self {
        Self::Terminal {
            reason: reason.into(),
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal { .. })
    }
}

/// A command name, its arguments and where it runs.
///
/// `args[0]` is the command name, as it appears in the boot script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub args: Vec<String>,
    pub context: ExecContext,
}

impl CommandInvocation {
    pub fn new(args: Vec<String>, context: ExecContext) -> Self {
        Self { args, context }
    }

    /// Build from string slices in the init context
    pub fn from_words(words: &[&str]) -> Self {
        Self::new(words.iter().map(|w| w.to_string()).collect(), ExecContext::Init)
    }

    pub fn in_context(mut self, context: ExecContext) -> Self {
        self.context = context;
        self
    }

    pub fn name(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or("")
    }

    /// Number of arguments, excluding the name
    pub fn arg_count(&self) -> usize {
        self.args.len().saturating_sub(1)
    }

    /// Arguments after the name
    pub fn params(&self) -> &[String] {
        self.args.get(1..).unwrap_or(&[])
    }
}

impl Index<usize> for CommandInvocation {
    type Output = str;

    fn index(&self, idx: usize) -> &str {
        &self.args[idx]
    }
}

impl std::fmt::Display for CommandInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.args.join(" "))
    }
}

/// Resolves and runs invocations
#[derive(Debug)]
pub struct Dispatcher {
    registry: CommandRegistry,
}

impl Dispatcher {
    pub fn new(registry: CommandRegistry) -> Self {
        Self { registry }
    }

    /// Dispatcher over the standard builtin table
    pub fn with_builtins() -> std::result::Result<Self, RegistryError> {
        Ok(Self::new(CommandRegistry::builtin()?))
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Validate an invocation without running it.
    ///
    /// # Errors
    ///
    /// - `UnknownCommand` if no spec matches the name exactly
    /// - `Arity` if the argument count is outside the spec's bounds
    /// - `Context` if the spec is init-only and the invocation is not
    pub fn check(&self, invocation: &CommandInvocation) -> Result<&CommandSpec> {
        let name = invocation.name();
        let spec = self
            .registry
            .get(name)
            .ok_or_else(|| BuiltinError::UnknownCommand {
                name: name.to_string(),
            })?;

        let got = invocation.arg_count();
        if !spec.accepts(got) {
            return Err(BuiltinError::Arity {
                name: spec.name.to_string(),
                min: spec.min_args,
                max: spec.max_args,
                got,
            });
        }

        if !spec.restriction.permits(invocation.context) {
            return Err(BuiltinError::Context {
                name: spec.name.to_string(),
            });
        }

        Ok(spec)
    }

    /// Validate and run an invocation, returning the handler's result unchanged
    pub fn dispatch(&self, builtins: &mut Builtins, invocation: &CommandInvocation) -> Result<Flow> {
        let spec = self.check(invocation)?;
        log::debug!("Running '{}' ({})", invocation, invocation.context);
        (spec.handler)(builtins, invocation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_file::DeviceProfile;
    use crate::platform::memory::SimulatedDevice;

    fn dispatcher() -> Dispatcher {
        Dispatcher::with_builtins().expect("builtin table is valid")
    }

    #[test]
    fn test_unknown_command() {
        let err = dispatcher()
            .check(&CommandInvocation::from_words(&["frobnicate", "x"]))
            .unwrap_err();
        assert!(matches!(err, BuiltinError::UnknownCommand { ref name } if name == "frobnicate"));
    }

    #[test]
    fn test_empty_invocation_is_unknown() {
        let err = dispatcher().check(&CommandInvocation::from_words(&[])).unwrap_err();
        assert!(matches!(err, BuiltinError::UnknownCommand { .. }));
    }

    #[test]
    fn test_class_start_without_arguments_is_arity_error() {
        let err = dispatcher()
            .check(&CommandInvocation::from_words(&["class_start"]))
            .unwrap_err();
        assert!(matches!(
            err,
            BuiltinError::Arity { min: 1, max: 1, got: 0, .. }
        ));
    }

    #[test]
    fn test_post_data_start_outside_init_is_context_error() {
        let invocation = CommandInvocation::from_words(&["class_start_post_data", "hal"])
            .in_context(ExecContext::Subcontext);
        let err = dispatcher().check(&invocation).unwrap_err();
        assert!(matches!(err, BuiltinError::Context { .. }));
    }

    #[test]
    fn test_dispatch_errors_have_no_side_effects() {
        let device = SimulatedDevice::new(&DeviceProfile::default());
        let mut builtins = Builtins::new(device.platform());
        let d = dispatcher();

        let _ = d.dispatch(&mut builtins, &CommandInvocation::from_words(&["trigger"]));
        let _ = d.dispatch(
            &mut builtins,
            &CommandInvocation::from_words(&["trigger", "a", "b"]),
        );
        assert!(device.actions.triggers().is_empty());

        d.dispatch(&mut builtins, &CommandInvocation::from_words(&["trigger", "boot"]))
            .expect("trigger");
        assert_eq!(device.actions.triggers(), ["boot"]);
    }

    #[test]
    fn test_invocation_accessors() {
        let inv = CommandInvocation::from_words(&["mount_all", "/vendor/etc/fstab", "--late"]);
        assert_eq!(inv.name(), "mount_all");
        assert_eq!(inv.arg_count(), 2);
        assert_eq!(&inv[1], "/vendor/etc/fstab");
        assert_eq!(inv.params().len(), 2);
        assert_eq!(inv.to_string(), "mount_all /vendor/etc/fstab --late");
    }
}
