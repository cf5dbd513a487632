//! Type-safe enumerations shared by the dispatcher and the builtins
//!
//! Properties and flags that the boot scripts spell as strings are modelled
//! as enums so every match over them is exhaustive.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Which subset of the filesystem table a `mount_all` pass handles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MountMode {
    #[default]
    Default,
    /// `--early`: mount only, no classification and no event
    Early,
    /// `--late`
    Late,
}

impl MountMode {
    /// Boot-timing property recording how long this pass took
    pub fn timing_property(self) -> String {
        format!("ro.boottime.init.mount_all.{}", self)
    }

    /// Parse the trailing `--early` / `--late` flag of a `mount_all` invocation
    pub fn from_flag(flag: &str) -> Option<Self> {
        match flag {
            "--early" => Some(Self::Early),
            "--late" => Some(Self::Late),
            _ => None,
        }
    }
}

/// Value of `ro.crypto.state`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CryptoState {
    Unencrypted,
    Encrypted,
    Unsupported,
}

/// Value of `ro.crypto.type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CryptoType {
    /// Full-disk (block-level) encryption
    Block,
    /// File-based encryption
    File,
}

/// `encryption=` option of `mkdir`: what to do about the directory's
/// file-encryption policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
pub enum FscryptAction {
    #[default]
    None,
    Require,
    /// Set the policy if the directory is empty, otherwise leave it
    Attempt,
    /// Delete a non-empty unencrypted directory and recreate it encrypted
    DeleteIfNecessary,
}

/// `key=` option of `mkdir`: which installed key the policy refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum KeyRef {
    #[default]
    Ref,
    PerBootRef,
}

/// Where an invocation executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ExecContext {
    /// The primary init process
    #[default]
    Init,
    /// A restricted helper context (e.g. vendor init)
    Subcontext,
}

/// Which contexts may run a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ContextRestriction {
    #[default]
    Any,
    InitOnly,
}

impl ContextRestriction {
    /// Returns true if a command with this restriction may run in `context`
    pub fn permits(self, context: ExecContext) -> bool {
        match self {
            Self::Any => true,
            Self::InitOnly => context == ExecContext::Init,
        }
    }
}

/// Lifecycle transition applied to a single service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Start,
    /// Start unless the service is explicitly disabled
    StartIfNotDisabled,
    /// Restart a service that was stopped by `class_reset_post_data`
    StartIfPostData,
    Stop,
    Restart,
    Reset,
    /// Reset only services started after `mark_post_data`
    ResetIfPostData,
    Enable,
    /// Start and block further commands until it exits
    ExecStart,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_mount_mode_timing_property() {
        assert_eq!(
            MountMode::Default.timing_property(),
            "ro.boottime.init.mount_all.default"
        );
        assert_eq!(MountMode::Early.timing_property(), "ro.boottime.init.mount_all.early");
        assert_eq!(MountMode::Late.timing_property(), "ro.boottime.init.mount_all.late");
    }

    #[test]
    fn test_mount_mode_flags() {
        assert_eq!(MountMode::from_flag("--early"), Some(MountMode::Early));
        assert_eq!(MountMode::from_flag("--late"), Some(MountMode::Late));
        assert_eq!(MountMode::from_flag("/vendor/etc/init"), None);
    }

    #[test]
    fn test_crypto_values_match_property_vocabulary() {
        let states: Vec<String> = CryptoState::iter().map(|s| s.to_string()).collect();
        assert_eq!(states, ["unencrypted", "encrypted", "unsupported"]);
        assert_eq!(CryptoType::Block.to_string(), "block");
        assert_eq!(CryptoType::from_str("file").ok(), Some(CryptoType::File));
    }

    #[test]
    fn test_mkdir_option_vocabulary() {
        assert_eq!(
            FscryptAction::from_str("DeleteIfNecessary").ok(),
            Some(FscryptAction::DeleteIfNecessary)
        );
        assert!(FscryptAction::from_str("require").is_err());
        assert_eq!(KeyRef::from_str("per_boot_ref").ok(), Some(KeyRef::PerBootRef));
        assert_eq!(KeyRef::Ref.to_string(), "ref");
    }

    #[test]
    fn test_context_restriction() {
        assert!(ContextRestriction::Any.permits(ExecContext::Subcontext));
        assert!(ContextRestriction::InitOnly.permits(ExecContext::Init));
        assert!(!ContextRestriction::InitOnly.permits(ExecContext::Subcontext));
    }
}
