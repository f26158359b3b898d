//! # machines-core
//!
//! Editing engine for finite-state-machine descriptions.
//!
//! This crate provides:
//! - The attribute value and type model
//! - Typed paths into a machine, with wildcard patterns
//! - Declarative validation rules
//! - Triggers that keep dependent attributes in sync
//! - Per-dialect mutators with transactional, all-or-nothing edits

pub mod attribute;
pub mod dialect;
pub mod error;
pub mod machine;
pub mod mutator;
pub mod path;
pub mod store;
pub mod transaction;
pub mod trigger;
pub mod validation;

pub use attribute::{AttributeType, AttributeValue, Field, Language};
pub use dialect::{mutator, Dialect, TransitionLayout};
pub use error::CoreError;
pub use machine::{Action, AttributeGroup, Dependency, Machine, State, Transition};
pub use mutator::{DialectMutator, Item};
pub use path::{AttributePath, Edit, Leaf, Path, Pattern, Step};
pub use store::MachineStore;
pub use trigger::{Trigger, TriggerSet};
pub use validation::{Rule, Validator, Violation};
