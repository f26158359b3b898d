//! Core error types.

use crate::dialect::Dialect;
use crate::path::AttributePath;
use crate::validation::Violation;
use thiserror::Error;

/// Errors from editing, validating or addressing a machine.
///
/// Every variant carries the path it concerns so a failed edit can be
/// recorded against the offending location.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("path not found: {path}")]
    PathNotFound { path: AttributePath },

    #[error("invalid path '{input}': {reason}")]
    InvalidPath { input: String, reason: String },

    #[error("type mismatch at {path}: expected {expected}, found {found}")]
    TypeMismatch {
        path: AttributePath,
        expected: String,
        found: String,
    },

    #[error("index {index} out of bounds at {path} (length {len})")]
    IndexOutOfBounds {
        path: AttributePath,
        index: usize,
        len: usize,
    },

    #[error("state not found: {name}")]
    StateNotFound { path: AttributePath, name: String },

    #[error("transition not found at {path}")]
    TransitionNotFound { path: AttributePath },

    #[error("duplicate state name: {name}")]
    DuplicateState { path: AttributePath, name: String },

    #[error("cannot delete the initial state '{name}'")]
    InitialStateDeletion { path: AttributePath, name: String },

    #[error("machine not found: {name}")]
    MachineNotFound { name: String },

    #[error("machine already exists: {name}")]
    MachineExists { name: String },

    #[error("unknown dialect: {name}")]
    UnknownDialect { name: String },

    #[error("dialect mismatch: expected {expected}, found {found}")]
    DialectMismatch { expected: Dialect, found: Dialect },

    #[error("path is not writable: {path}")]
    NotWritable { path: AttributePath },

    #[error("unsupported operation for {dialect}: {operation}")]
    Unsupported {
        dialect: Dialect,
        operation: String,
        path: AttributePath,
    },

    #[error("validation failed with {} violation(s): {}", .violations.len(), first_message(.violations))]
    Validation { violations: Vec<Violation> },

    #[error("triggers did not settle after {rounds} rounds")]
    TriggerCycle { rounds: usize },
}

fn first_message(violations: &[Violation]) -> String {
    violations
        .first()
        .map(|v| v.to_string())
        .unwrap_or_default()
}

impl CoreError {
    /// Path of the offending location.
    pub fn path(&self) -> AttributePath {
        match self {
            CoreError::PathNotFound { path }
            | CoreError::TypeMismatch { path, .. }
            | CoreError::IndexOutOfBounds { path, .. }
            | CoreError::StateNotFound { path, .. }
            | CoreError::TransitionNotFound { path }
            | CoreError::DuplicateState { path, .. }
            | CoreError::InitialStateDeletion { path, .. }
            | CoreError::NotWritable { path }
            | CoreError::Unsupported { path, .. } => path.clone(),
            CoreError::Validation { violations } => violations
                .first()
                .map(|v| v.path.clone())
                .unwrap_or_default(),
            CoreError::InvalidPath { .. }
            | CoreError::MachineNotFound { .. }
            | CoreError::MachineExists { .. }
            | CoreError::UnknownDialect { .. }
            | CoreError::DialectMismatch { .. }
            | CoreError::TriggerCycle { .. } => AttributePath::root(),
        }
    }

    /// Returns true for structural errors: rejected before any mutation is committed.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            CoreError::StateNotFound { .. }
                | CoreError::TransitionNotFound { .. }
                | CoreError::DuplicateState { .. }
                | CoreError::InitialStateDeletion { .. }
                | CoreError::DialectMismatch { .. }
                | CoreError::NotWritable { .. }
        )
    }

    /// Returns an error code suitable for tooling output.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::PathNotFound { .. } => "PATH_NOT_FOUND",
            CoreError::InvalidPath { .. } => "BAD_PATH",
            CoreError::TypeMismatch { .. } => "TYPE_MISMATCH",
            CoreError::IndexOutOfBounds { .. } => "INDEX_OUT_OF_BOUNDS",
            CoreError::StateNotFound { .. } => "STATE_NOT_FOUND",
            CoreError::TransitionNotFound { .. } => "TRANSITION_NOT_FOUND",
            CoreError::DuplicateState { .. } => "DUPLICATE_STATE",
            CoreError::InitialStateDeletion { .. } => "INITIAL_STATE",
            CoreError::MachineNotFound { .. } => "MACHINE_NOT_FOUND",
            CoreError::MachineExists { .. } => "MACHINE_EXISTS",
            CoreError::UnknownDialect { .. } => "UNKNOWN_DIALECT",
            CoreError::DialectMismatch { .. } => "DIALECT_MISMATCH",
            CoreError::NotWritable { .. } => "NOT_WRITABLE",
            CoreError::Unsupported { .. } => "UNSUPPORTED",
            CoreError::Validation { .. } => "INVALID",
            CoreError::TriggerCycle { .. } => "TRIGGER_CYCLE",
        }
    }

    /// Violations to retain on the machine after this error.
    pub fn violations(&self) -> Vec<Violation> {
        match self {
            CoreError::Validation { violations } => violations.clone(),
            other => vec![Violation::new(other.path(), other.to_string())],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::Path;

    #[test]
    fn test_path_and_code() {
        let path = Path::machine().states().index(0).into_untyped();
        let err = CoreError::InitialStateDeletion {
            path: path.clone(),
            name: "Initial".to_string(),
        };
        assert_eq!(err.path(), path);
        assert_eq!(err.error_code(), "INITIAL_STATE");
        assert!(err.is_structural());
        assert_eq!(err.violations().len(), 1);
        assert_eq!(err.violations()[0].path, path);
    }

    #[test]
    fn test_validation_keeps_every_violation() {
        let violations = vec![
            Violation::new(Path::machine().initial_state().into_untyped(), "a"),
            Violation::new(Path::machine().suspend_state().into_untyped(), "b"),
        ];
        let err = CoreError::Validation {
            violations: violations.clone(),
        };
        assert_eq!(err.violations(), violations);
        assert!(!err.is_structural());
        assert!(err.to_string().starts_with("validation failed with 2 violation(s)"));
    }
}
