//! Collaborator interfaces consumed by the builtins.
//!
//! The property store, action queue, service list, mount subsystem,
//! bootloader message area and power control are owned elsewhere in the
//! init process. The builtins only see them through these traits, bundled
//! into a [`Platform`] that is built once at boot start and shared for the
//! lifetime of the process.
//!
//! All methods take `&self`: each implementation provides its own per-key
//! atomicity, which is all the builtins rely on.

pub mod memory;

use crate::fstab::Fstab;
use crate::types::{FscryptAction, KeyRef, MountMode, Transition};
use nix::sys::wait::WaitStatus;
use std::io;
use std::sync::Arc;

/// Process-wide key/value property store
pub trait PropertyStore: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;

    fn set(&self, name: &str, value: &str) -> io::Result<()>;

    /// Block the action queue until `name` equals `value`.
    ///
    /// Returns false if a wait is already in progress.
    fn start_waiting(&self, name: &str, value: &str) -> bool;

    /// Ask the property service to load persistent properties from /data
    fn load_persistent(&self);

    /// Boolean view of a property. Unparseable or missing values yield `default`.
    fn get_bool(&self, name: &str, default: bool) -> bool {
        match self.get(name).as_deref() {
            Some("1" | "y" | "yes" | "on" | "true") => true,
            Some("0" | "n" | "no" | "off" | "false") => false,
            _ => default,
        }
    }
}

/// Action/trigger queue fed by the init-script parser
pub trait ActionQueue: Send + Sync {
    fn queue_event_trigger(&self, trigger: &str);

    /// Parse an init config file (or directory) into the queue.
    fn parse_config(&self, path: &str) -> bool;
}

/// Called once when a one-shot service is reaped
pub type ReapCallback = Box<dyn FnOnce(WaitStatus) + Send>;

/// A process entity expected to run once to completion
pub trait OneshotService: Send {
    fn name(&self) -> &str;

    fn add_reap_callback(&mut self, callback: ReapCallback);

    /// Start and hold further command execution until the process exits
    fn exec_start(&mut self) -> io::Result<()>;

    fn start(&mut self) -> io::Result<()>;
}

/// The service supervisor's registry
pub trait ServiceList: Send + Sync {
    /// Names of all services tagged with `class`, in registration order
    fn class_members(&self, class: &str) -> Vec<String>;

    fn contains(&self, name: &str) -> bool;

    /// Name of the service that provides `interface`
    fn find_interface(&self, interface: &str) -> Option<String>;

    fn apply(&self, name: &str, transition: Transition) -> io::Result<()>;

    fn make_oneshot(&self, argv: &[String]) -> io::Result<Box<dyn OneshotService>>;

    /// Hand a service over to supervision
    fn add_service(&self, service: Box<dyn OneshotService>);

    fn mark_post_data(&self);
}

/// The fs_mgr side of mounting
pub trait FsManager: Send + Sync {
    fn read_fstab(&self, path: &str) -> io::Result<Fstab>;

    fn read_default_fstab(&self) -> io::Result<Fstab>;

    /// Mount every applicable, not yet mounted entry. Returns an outcome code.
    fn mount_all(&self, fstab: &Fstab, mode: MountMode) -> i32;

    fn umount_all(&self, fstab: &Fstab) -> i32;

    fn swapon_all(&self, fstab: &Fstab) -> bool;

    fn remount_userdata_into_checkpointing(&self, fstab: &Fstab) -> i32;

    /// Install the file-encryption keyring
    fn install_keyring(&self) -> bool;

    /// Apply the file-encryption policy for `dir`. Returns false when the
    /// policy could not be set and the data is in an unknown state.
    fn set_directory_policy(&self, dir: &str, key: KeyRef, action: FscryptAction) -> bool;

    /// Verity mode of verified boot, or `None` if it cannot be loaded
    fn load_verity_state(&self) -> Option<i32>;
}

/// Persisted area used to pass a request across a reboot
pub trait BootloaderMessage: Send + Sync {
    fn write(&self, options: &[String]) -> io::Result<()>;
}

/// Shutdown authority of the primary process
pub trait PowerControl: Send + Sync {
    /// Begin a shutdown with `reason` (e.g. "reboot,recovery"). On a real
    /// device nothing runs afterwards.
    fn shutdown(&self, reason: &str);

    /// True once a shutdown has begun. Completion callbacks may request one
    /// outside the command flow; the sequencer checks this between commands.
    fn is_shutting_down(&self) -> bool {
        false
    }
}

/// Static facts about the device and the running process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFlags {
    /// Running as the primary init process (direct shutdown authority)
    pub primary_process: bool,
    /// A sandboxed generic system image is running; wiping is disallowed
    pub gsi_running: bool,
    /// Dynamically updatable modules are supported
    pub apex_updatable: bool,
    /// Native file-based encryption is in use
    pub fscrypt_native: bool,
}

/// Every collaborator the builtins touch
#[derive(Clone)]
pub struct Platform {
    pub properties: Arc<dyn PropertyStore>,
    pub actions: Arc<dyn ActionQueue>,
    pub services: Arc<dyn ServiceList>,
    pub fs_mgr: Arc<dyn FsManager>,
    pub bootloader: Arc<dyn BootloaderMessage>,
    pub power: Arc<dyn PowerControl>,
    pub device: DeviceFlags,
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform").field("device", &self.device).finish_non_exhaustive()
    }
}
