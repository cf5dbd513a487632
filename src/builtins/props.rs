//! Property and log-level builtins.

use crate::error::{BuiltinError, Result};
use crate::mount::{CRYPTO_STATE_PROPERTY, CRYPTO_TYPE_PROPERTY};
use crate::platform::PropertyStore;
use crate::types::{CryptoState, CryptoType};
use log::LevelFilter;

/// Maximum value length including the terminator
pub const PROP_VALUE_MAX: usize = 92;

/// Set by the property service once persistent properties are loaded
pub const PERSISTENT_READY_PROPERTY: &str = "ro.persistent_properties.ready";

const RESTORECON_PROPERTY: &str = "selinux.restorecon_recursive";

/// Property names are dot-separated segments of `[A-Za-z0-9_@:-]`
pub fn is_legal_property_name(name: &str) -> bool {
    if name.is_empty() || name.starts_with('.') || name.ends_with('.') || name.contains("..") {
        return false;
    }
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '@' | ':'))
}

/// `setprop <name> <value>`
pub fn setprop(properties: &dyn PropertyStore, name: &str, value: &str) -> Result<()> {
    if name.starts_with("ctl.") {
        return Err(BuiltinError::general(
            "Cannot set ctl. properties from init; call the Service functions directly",
        ));
    }
    if name == RESTORECON_PROPERTY {
        return Err(BuiltinError::general(format!(
            "Cannot set '{}' from init; use the restorecon builtin directly",
            RESTORECON_PROPERTY
        )));
    }
    properties
        .set(name, value)
        .map_err(|e| BuiltinError::external(format!("Failed to set property '{}'", name), e))
}

/// `wait_for_prop <name> <value>`: block the queue until the property matches
pub fn wait_for_prop(properties: &dyn PropertyStore, name: &str, value: &str) -> Result<()> {
    if !is_legal_property_name(name) {
        return Err(BuiltinError::invalid(format!(
            "IsLegalPropertyName({}) failed",
            name
        )));
    }
    if value.len() >= PROP_VALUE_MAX {
        return Err(BuiltinError::invalid("value too long"));
    }
    if !properties.start_waiting(name, value) {
        return Err(BuiltinError::general("already waiting for a property"));
    }
    Ok(())
}

/// Tracks `load_persist_props` calls across the boot.
///
/// Block-encrypted devices call it twice: first against the temporary /data,
/// then against the real one. The first call is skipped so nothing is read
/// from, or marked loaded by, the temporary partition.
#[derive(Debug, Default)]
pub struct PersistentProps {
    block_encrypted_calls: usize,
}

impl PersistentProps {
    /// Returns true if a load was requested
    pub fn load(&mut self, properties: &dyn PropertyStore) -> bool {
        let state = properties.get(CRYPTO_STATE_PROPERTY);
        let kind = properties.get(CRYPTO_TYPE_PROPERTY);
        let block_encrypted = state.as_deref() == Some(CryptoState::Encrypted.to_string().as_str())
            && kind.as_deref() == Some(CryptoType::Block.to_string().as_str());
        if block_encrypted {
            self.block_encrypted_calls += 1;
            if self.block_encrypted_calls == 1 {
                log::info!("Skipping load_persist_props on temporary /data");
                return false;
            }
        }

        properties.load_persistent();
        properties.start_waiting(PERSISTENT_READY_PROPERTY, "true");
        true
    }
}

/// Map a kernel-style level (0-7) to a log filter
pub fn kernel_level_filter(level: i32) -> Option<LevelFilter> {
    match level {
        7 => Some(LevelFilter::Debug),
        6 => Some(LevelFilter::Info),
        5 | 4 => Some(LevelFilter::Warn),
        // No fatal-only filter; errors are the closest
        3 | 2 | 1 | 0 => Some(LevelFilter::Error),
        _ => None,
    }
}

/// `loglevel <n>`
pub fn loglevel(arg: &str) -> Result<()> {
    let level = arg.parse::<i32>().unwrap_or(-1);
    let filter = kernel_level_filter(level)
        .ok_or_else(|| BuiltinError::invalid(format!("invalid log level {}", level)))?;
    log::set_max_level(filter);
    Ok(())
}
