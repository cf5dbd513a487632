//! The builtin command table.
//!
//! Each entry binds a name to its argument-count bounds, the contexts it may
//! run in and its handler. The table is validated once when it is built:
//! duplicate names and inverted bounds are rejected up front instead of being
//! discovered at lookup time.

use crate::builtins::{self, Builtins};
use crate::dispatch::{CommandInvocation, Flow};
use crate::error::Result;
use crate::types::ContextRestriction;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Upper bound for commands taking any number of arguments
pub const UNBOUNDED: usize = usize::MAX;

/// Builtin handler. Receives the whole invocation (`args[0]` is the name).
pub type Handler = fn(&mut Builtins, &CommandInvocation) -> Result<Flow>;

/// One registry entry
#[derive(Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    pub min_args: usize,
    /// Inclusive; `UNBOUNDED` for no limit
    pub max_args: usize,
    pub restriction: ContextRestriction,
    pub handler: Handler,
}

impl CommandSpec {
    pub const fn new(name: &'static str, min_args: usize, max_args: usize, handler: Handler) -> Self {
        Self {
            name,
            min_args,
            max_args,
            restriction: ContextRestriction::Any,
            handler,
        }
    }

    /// Restrict to the primary init context
    pub const fn init_only(mut self) -> Self {
        self.restriction = ContextRestriction::InitOnly;
        self
    }

    /// Returns true if `count` arguments (excluding the name) are within bounds
    #[inline]
    pub const fn accepts(&self, count: usize) -> bool {
        count >= self.min_args && count <= self.max_args
    }

    /// Human-readable bounds, e.g. `1..=1` or `3..`
    pub fn bounds(&self) -> String {
        if self.max_args == UNBOUNDED {
            format!("{}..", self.min_args)
        } else {
            format!("{}..={}", self.min_args, self.max_args)
        }
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .field("restriction", &self.restriction)
            .finish_non_exhaustive()
    }
}

/// Errors raised while building a registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Command '{name}' is registered more than once")]
    DuplicateName { name: String },

    #[error("Command '{name}' has min_args {min} greater than max_args {max}")]
    InvalidBounds { name: String, min: usize, max: usize },
}

/// Validated name → spec table
#[derive(Debug, Clone)]
pub struct CommandRegistry {
    specs: BTreeMap<&'static str, CommandSpec>,
}

impl CommandRegistry {
    /// Build a registry, failing on the first duplicate or inverted entry
    pub fn new(specs: impl IntoIterator<Item = CommandSpec>) -> std::result::Result<Self, RegistryError> {
        let mut table = BTreeMap::new();
        for spec in specs {
            if spec.min_args > spec.max_args {
                return Err(RegistryError::InvalidBounds {
                    name: spec.name.to_string(),
                    min: spec.min_args,
                    max: spec.max_args,
                });
            }
            if table.insert(spec.name, spec).is_some() {
                return Err(RegistryError::DuplicateName {
                    name: spec.name.to_string(),
                });
            }
        }
        Ok(Self { specs: table })
    }

    /// The standard builtin table
    pub fn builtin() -> std::result::Result<Self, RegistryError> {
        Self::new(builtins::builtin_specs())
    }

    /// Exact-match lookup
    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.specs.get(name)
    }

    /// Entries in name order
    pub fn iter(&self) -> impl Iterator<Item = &CommandSpec> {
        self.specs.values()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
