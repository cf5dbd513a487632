//! Property-based tests for bootinit
//!
//! These tests verify:
//! - Registry invariants (unique names, ordered bounds)
//! - Arity and context checks against every registered builtin
//! - Mount outcome classification is total and deterministic
//! - Enum string round-trips

use proptest::prelude::*;

use bootinit::builtins;
use bootinit::mount::outcome::codes;
use bootinit::registry::UNBOUNDED;
use bootinit::{
    BuiltinError, CommandInvocation, ContextRestriction, Dispatcher, ExecContext, MountMode,
    MountOutcome,
};

fn dispatcher() -> Dispatcher {
    Dispatcher::with_builtins().expect("builtin table is valid")
}

fn builtin_names() -> Vec<&'static str> {
    dispatcher().registry().iter().map(|s| s.name).collect()
}

// =============================================================================
// Registry
// =============================================================================

#[test]
fn builtin_table_names_unique_and_bounds_ordered() {
    let specs = builtins::builtin_specs();
    let mut names: Vec<_> = specs.iter().map(|s| s.name).collect();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), specs.len());
    for spec in &specs {
        assert!(spec.min_args <= spec.max_args, "{}", spec.name);
    }
    // Every declared builtin survives registration
    assert_eq!(dispatcher().registry().iter().count(), specs.len());
}

fn invocation_strategy() -> impl Strategy<Value = (usize, usize, bool)> {
    let count = builtin_names().len();
    (0..count, 0usize..10, any::<bool>())
}

proptest! {
    /// Arity errors occur iff the count is outside [min, max]; context errors
    /// iff the spec is init-only and the invocation is not
    #[test]
    fn dispatch_check_matches_bounds((idx, argc, sub) in invocation_strategy()) {
        let d = dispatcher();
        let spec = *d.registry().iter().nth(idx).expect("index in range");
        let mut args = vec![spec.name.to_string()];
        args.extend((0..argc).map(|i| format!("arg{}", i)));
        let context = if sub { ExecContext::Subcontext } else { ExecContext::Init };
        let invocation = CommandInvocation::new(args, context);

        let in_bounds = argc >= spec.min_args && (spec.max_args == UNBOUNDED || argc <= spec.max_args);
        let context_ok = spec.restriction == ContextRestriction::Any || !sub;

        match d.check(&invocation) {
            Ok(_) => prop_assert!(in_bounds && context_ok),
            Err(BuiltinError::Arity { .. }) => prop_assert!(!in_bounds),
            Err(BuiltinError::Context { .. }) => prop_assert!(in_bounds && !context_ok),
            Err(e) => prop_assert!(false, "unexpected error {}", e),
        }
    }

    /// Names not in the table are always unknown
    #[test]
    fn unknown_names_rejected(name in "[a-z_]{1,20}") {
        prop_assume!(!builtin_names().iter().any(|n| *n == name));
        let err = dispatcher()
            .check(&CommandInvocation::new(vec![name], ExecContext::Init))
            .unwrap_err();
        prop_assert!(matches!(err, BuiltinError::UnknownCommand { .. }), "{}", err);
    }
}

// =============================================================================
// Mount outcome classification
// =============================================================================

proptest! {
    /// Classification is total: every code gets exactly one outcome
    #[test]
    fn classification_total(code in any::<i32>()) {
        let outcome = MountOutcome::from_code(code);
        prop_assert_eq!(outcome, MountOutcome::from_code(code));
        match outcome {
            MountOutcome::UnexpectedPositive(c) => {
                prop_assert_eq!(c, code);
                prop_assert!(code > codes::NEEDS_METADATA_ENCRYPTION);
            }
            MountOutcome::ClassificationError(c) => {
                prop_assert_eq!(c, code);
                prop_assert!(code < 0);
            }
            known => {
                prop_assert!(known.is_known());
                prop_assert!((codes::NOT_ENCRYPTABLE..=codes::NEEDS_METADATA_ENCRYPTION).contains(&code));
            }
        }
    }
}

#[test]
fn known_codes_map_one_to_one() {
    for (code, outcome) in MountOutcome::KNOWN {
        assert_eq!(MountOutcome::from_code(code), outcome);
    }
    assert_eq!(
        MountOutcome::from_code(codes::FAIL),
        MountOutcome::ClassificationError(codes::FAIL)
    );
}

// =============================================================================
// Enum round-trips
// =============================================================================

fn mount_mode_strategy() -> impl Strategy<Value = MountMode> {
    prop_oneof![
        Just(MountMode::Default),
        Just(MountMode::Early),
        Just(MountMode::Late),
    ]
}

proptest! {
    /// MountMode: to_string → parse round-trip is identity
    #[test]
    fn mount_mode_roundtrip(mode in mount_mode_strategy()) {
        let s = mode.to_string();
        let parsed: MountMode = s.parse().expect("Should parse");
        prop_assert_eq!(mode, parsed);
        prop_assert!(mode.timing_property().ends_with(&s));
    }
}
