//! bootinit library
//!
//! Boot-time command engine of a device init process: a validated builtin
//! registry and dispatcher, the mount-outcome state machine, service class
//! control, helper-process escalation and recovery reboots.

pub mod builtins;
pub mod cli;
pub mod config_file;
pub mod dispatch;
pub mod error;
pub mod exec;
pub mod fstab;
pub mod mount;
pub mod platform;
pub mod readahead;
pub mod recovery;
pub mod registry;
pub mod sequencer;
pub mod services;
pub mod types;

// Re-export main types for convenience
pub use builtins::Builtins;
pub use config_file::{DeviceProfile, FsManagerScript, ServiceDecl};
pub use dispatch::{CommandInvocation, Dispatcher, Flow};
pub use error::{BuiltinError, Result};
pub use exec::ExecEscalation;
pub use fstab::{Fstab, FstabEntry};
pub use mount::outcome::MountOutcome;
pub use mount::{MountAllArgs, MountOrchestrator, PrimaryMountOutcome};
pub use platform::{DeviceFlags, Platform};
pub use recovery::{RecoveryEscalation, RecoveryRequest};
pub use registry::{CommandRegistry, CommandSpec, RegistryError};
pub use sequencer::{BootSequencer, SequenceReport};
pub use services::ServiceClassController;
pub use types::{ContextRestriction, CryptoState, CryptoType, ExecContext, MountMode, Transition};
