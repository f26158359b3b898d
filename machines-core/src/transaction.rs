//! Transactional apply.
//!
//! An edit runs against a copy of the machine, followed by trigger evaluation
//! and validation. The copy replaces the machine only if all three succeed;
//! otherwise the machine is left as it was and the failure is recorded in its
//! retained error set.

use crate::dialect::Dialect;
use crate::error::CoreError;
use crate::machine::Machine;
use crate::trigger::{Change, TriggerSet};
use crate::validation::{Validator, Violation};

/// What a raw edit did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    /// The edit changed state or transition topology.
    pub structural: bool,
    pub change: Change,
}

impl Outcome {
    pub fn data(change: Change) -> Self {
        Self {
            structural: false,
            change,
        }
    }

    pub fn structural(change: Change) -> Self {
        Self {
            structural: true,
            change,
        }
    }
}

/// Applies `edit` atomically, returning whether it was structural.
pub fn apply<F>(
    machine: &mut Machine,
    dialect: Dialect,
    triggers: &TriggerSet,
    validator: &Validator,
    operation: &str,
    edit: F,
) -> Result<bool, CoreError>
where
    F: FnOnce(&mut Machine) -> Result<Outcome, CoreError>,
{
    if machine.dialect != dialect {
        let err = CoreError::DialectMismatch {
            expected: dialect,
            found: machine.dialect,
        };
        record(machine, &err);
        return Err(err);
    }

    // States are shared with the original until the edit touches them.
    let mut draft = machine.clone();
    let result = edit(&mut draft).and_then(|outcome| {
        triggers.apply(&mut draft, &outcome.change)?;
        validator.validate(&draft)?;
        Ok(outcome.structural)
    });

    match result {
        Ok(structural) => {
            draft.errors.clear();
            *machine = draft;
            tracing::debug!(operation, structural, machine = %machine.name(), "edit committed");
            Ok(structural)
        }
        Err(err) => {
            tracing::warn!(
                operation,
                machine = %machine.name(),
                code = err.error_code(),
                error = %err,
                "edit rolled back"
            );
            record(machine, &err);
            Err(err)
        }
    }
}

/// Replaces retained errors at or below each failing path with the new ones.
fn record(machine: &mut Machine, err: &CoreError) {
    let fresh: Vec<Violation> = err.violations();
    machine
        .errors
        .retain(|old| !fresh.iter().any(|v| v.path.is_ancestor_or_same(&old.path)));
    machine.errors.extend(fresh);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::State;
    use crate::path::{AttributePath, Path};
    use crate::trigger::NameSource;
    use crate::validation::{Check, Rule};
    use std::sync::Arc;

    fn validator() -> Validator {
        Validator::new(
            Dialect::Ucfsm,
            vec![Rule::at(
                &Path::machine().initial_state(),
                vec![Check::Exists(NameSource::StateNames)],
            )],
        )
    }

    fn machine() -> Machine {
        let mut m = Machine::new(Dialect::Ucfsm, "Tx.machine");
        m.states.push(Arc::new(State::new("Initial")));
        m.initial_state = "Initial".to_string();
        m
    }

    fn rename_initial(to: &'static str) -> impl FnOnce(&mut Machine) -> Result<Outcome, CoreError> {
        move |m| {
            m.initial_state = to.to_string();
            Ok(Outcome::data(Change::at(Path::machine().initial_state().into_untyped())))
        }
    }

    fn run<F>(m: &mut Machine, edit: F) -> Result<bool, CoreError>
    where
        F: FnOnce(&mut Machine) -> Result<Outcome, CoreError>,
    {
        apply(m, Dialect::Ucfsm, &TriggerSet::default(), &validator(), "test", edit)
    }

    #[test]
    fn test_commit() {
        let mut m = machine();
        m.states.push(Arc::new(State::new("Other")));
        let structural = run(&mut m, rename_initial("Other")).unwrap();
        assert!(!structural);
        assert_eq!(m.initial_state, "Other");
    }

    #[test]
    fn test_validation_failure_rolls_back() {
        let mut m = machine();
        let before = m.clone();
        let err = run(&mut m, rename_initial("Nowhere")).unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
        assert_eq!(m, before);
        assert_eq!(m.errors().len(), 1);
        assert_eq!(m.errors()[0].path.to_string(), "machine.initial_state");
    }

    #[test]
    fn test_edit_error_rolls_back_partial_change() {
        let mut m = machine();
        let before = m.clone();
        let err = run(&mut m, |m| {
            m.state_mut(0).unwrap().name = "Half".to_string();
            Err(CoreError::NotWritable {
                path: AttributePath::root(),
            })
        })
        .unwrap_err();
        assert_eq!(err.error_code(), "NOT_WRITABLE");
        assert_eq!(m, before);
        assert_eq!(m.states[0].name, "Initial");
    }

    #[test]
    fn test_errors_replaced_at_failing_path() {
        let mut m = machine();
        let initial = Path::machine().initial_state().into_untyped();
        let other = Path::machine().dependencies().into_untyped();
        m.errors = vec![
            Violation::new(initial.clone(), "stale"),
            Violation::new(other.clone(), "unrelated"),
        ];
        let _ = run(&mut m, rename_initial(""));
        let paths: Vec<&AttributePath> = m.errors().iter().map(|v| &v.path).collect();
        assert_eq!(paths, vec![&other, &initial]);
        assert_ne!(m.errors()[1].message, "stale");

        m.states.push(Arc::new(State::new("Other")));
        run(&mut m, rename_initial("Other")).unwrap();
        assert!(m.errors().is_empty());
    }

    #[test]
    fn test_dialect_mismatch() {
        let mut m = machine();
        let err = apply(
            &mut m,
            Dialect::Clfsm,
            &TriggerSet::default(),
            &validator(),
            "test",
            rename_initial("x"),
        )
        .unwrap_err();
        assert!(err.is_structural());
        assert_eq!(m.initial_state, "Initial");
        assert_eq!(m.errors().len(), 1);
    }

    #[test]
    fn test_untouched_states_stay_shared() {
        let mut m = machine();
        m.states.push(Arc::new(State::new("Other")));
        let kept = Arc::clone(&m.states[1]);
        run(&mut m, |m| {
            m.state_mut(0).unwrap().actions.clear();
            Ok(Outcome::data(Change::default()))
        })
        .unwrap();
        assert!(Arc::ptr_eq(&kept, &m.states[1]));
    }
}
