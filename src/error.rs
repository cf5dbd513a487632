//! Error handling module for bootinit
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Dispatch-level errors (`UnknownCommand`, `Arity`, `Context`) are raised before
//! any handler runs; everything else comes out of a handler.

use std::io;
use thiserror::Error;

/// Main error type for builtin dispatch and execution
#[derive(Error, Debug)]
pub enum BuiltinError {
    /// No command with this name is registered
    #[error("Unknown command: '{name}'")]
    UnknownCommand { name: String },

    /// Argument count outside the registered bounds
    #[error("{name} expects {} argument(s), got {got}", describe_bounds(*min, *max))]
    Arity {
        name: String,
        min: usize,
        max: usize,
        got: usize,
    },

    /// Command restricted to the init context was invoked elsewhere
    #[error("command '{name}' only available in init context")]
    Context { name: String },

    /// Negative or otherwise invalid mount_all return code
    #[error("Invalid code: {code}")]
    Classification { code: i32 },

    /// Positive mount_all return code outside the known outcome set
    #[error("mount_all returned unexpected code {code}")]
    UnexpectedPositive { code: i32 },

    /// A command that depends on an earlier boot pass ran before it
    #[error("Calling {command} too early")]
    TooEarly { command: String },

    /// Failure reported by an external collaborator
    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Failure of a direct filesystem or syscall operation
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Argument could not be interpreted
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// General errors (catch-all for handler failures without an errno)
    #[error("{0}")]
    General(String),
}

/// Result type alias for builtin operations
pub type Result<T> = std::result::Result<T, BuiltinError>;

fn describe_bounds(min: usize, max: usize) -> String {
    if max == usize::MAX {
        format!("at least {}", min)
    } else if min == max {
        format!("exactly {}", min)
    } else {
        format!("between {} and {}", min, max)
    }
}

impl BuiltinError {
    /// Wrap a collaborator failure
    pub fn external(context: impl Into<String>, source: io::Error) -> Self {
        Self::External {
            context: context.into(),
            source,
        }
    }

    /// Wrap a direct filesystem/syscall failure
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Wrap a nix errno as an Io error
    pub fn errno(context: impl Into<String>, errno: nix::Error) -> Self {
        Self::Io {
            context: context.into(),
            source: io::Error::from(errno),
        }
    }

    /// Create an invalid argument error
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a general error
    pub fn general(msg: impl Into<String>) -> Self {
        Self::General(msg.into())
    }

    /// True when the underlying failure is "resource missing" (ENOENT)
    pub fn is_enoent(&self) -> bool {
        match self {
            Self::External { source, .. } | Self::Io { source, .. } => {
                source.kind() == io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}

/// Whether ENOENT failures are currently hidden.
///
/// Many legacy paths in boot scripts never exist on a given device. Those
/// failures are only reported when logging at debug verbosity or lower.
pub fn enoent_suppressed() -> bool {
    log::max_level() < log::LevelFilter::Debug
}

/// Downgrade a "resource missing" failure to success when verbosity is above debug.
///
/// Only errors whose `is_enoent()` holds are affected; dispatch and classification
/// errors always propagate.
pub fn ignore_enoent<T: Default>(result: Result<T>) -> Result<T> {
    match result {
        Err(e) if e.is_enoent() && enoent_suppressed() => Ok(T::default()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_arity_display() {
        let err = BuiltinError::Arity {
            name: "class_start".into(),
            min: 1,
            max: 1,
            got: 0,
        };
        assert_eq!(err.to_string(), "class_start expects exactly 1 argument(s), got 0");

        let err = BuiltinError::Arity {
            name: "mount_all".into(),
            min: 1,
            max: usize::MAX,
            got: 0,
        };
        assert_eq!(err.to_string(), "mount_all expects at least 1 argument(s), got 0");

        let err = BuiltinError::Arity {
            name: "chown".into(),
            min: 2,
            max: 3,
            got: 5,
        };
        assert_eq!(err.to_string(), "chown expects between 2 and 3 argument(s), got 5");
    }

    #[test]
    fn test_is_enoent() {
        let err = BuiltinError::io(
            "symlink() failed",
            io::Error::new(io::ErrorKind::NotFound, "missing"),
        );
        assert!(err.is_enoent());

        let err = BuiltinError::io(
            "symlink() failed",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(!err.is_enoent());
        assert!(!BuiltinError::Classification { code: -1 }.is_enoent());
    }

    #[test]
    #[serial]
    fn test_ignore_enoent_depends_on_verbosity() {
        let previous = log::max_level();
        let missing = || -> Result<()> {
            Err(BuiltinError::io(
                "write failed",
                io::Error::new(io::ErrorKind::NotFound, "missing"),
            ))
        };

        log::set_max_level(log::LevelFilter::Info);
        assert!(ignore_enoent(missing()).is_ok());

        log::set_max_level(log::LevelFilter::Debug);
        assert!(ignore_enoent(missing()).is_err());

        log::set_max_level(previous);
    }

    #[test]
    #[serial]
    fn test_ignore_enoent_never_hides_dispatch_errors() {
        let previous = log::max_level();
        log::set_max_level(log::LevelFilter::Error);
        let result: Result<()> = Err(BuiltinError::Context {
            name: "class_start_post_data".into(),
        });
        assert!(ignore_enoent(result).is_err());
        log::set_max_level(previous);
    }
}
