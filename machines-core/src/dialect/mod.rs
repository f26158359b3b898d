//! Supported machine dialects.
//!
//! Each dialect has a [`DialectMutator`] implementation carrying its schema,
//! validation rules, triggers and writable paths. [`mutator`] selects it.

mod common;
mod cxx;
mod swiftfsm;
mod vhdl;

pub use cxx::CxxMutator;
pub use swiftfsm::SwiftfsmMutator;
pub use vhdl::VhdlMutator;

use crate::attribute::Language;
use crate::error::CoreError;
use crate::mutator::DialectMutator;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A concrete FSM description language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Swiftfsm,
    Vhdl,
    Clfsm,
    Ucfsm,
    Spartanfsm,
}

/// Where a dialect keeps its transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionLayout {
    /// On their source state.
    StateOwned,
    /// In one machine-level list; each transition names its source.
    Flat,
}

impl Dialect {
    pub const ALL: [Dialect; 5] = [
        Dialect::Swiftfsm,
        Dialect::Vhdl,
        Dialect::Clfsm,
        Dialect::Ucfsm,
        Dialect::Spartanfsm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Swiftfsm => "swiftfsm",
            Dialect::Vhdl => "vhdl",
            Dialect::Clfsm => "clfsm",
            Dialect::Ucfsm => "ucfsm",
            Dialect::Spartanfsm => "spartanfsm",
        }
    }

    pub fn transition_layout(&self) -> TransitionLayout {
        match self {
            Dialect::Vhdl => TransitionLayout::Flat,
            _ => TransitionLayout::StateOwned,
        }
    }

    /// Returns true if machines of this dialect may have a suspend state.
    pub fn supports_suspension(&self) -> bool {
        !matches!(self, Dialect::Spartanfsm)
    }

    /// Language of action bodies and transition conditions.
    pub fn language(&self) -> Language {
        match self {
            Dialect::Swiftfsm => Language::Swift,
            Dialect::Vhdl => Language::Vhdl,
            Dialect::Clfsm | Dialect::Ucfsm => Language::Cxx,
            Dialect::Spartanfsm => Language::C,
        }
    }

    /// Actions every state carries, in display order.
    pub fn action_names(&self) -> &'static [&'static str] {
        match self {
            Dialect::Swiftfsm => &["onEntry", "onExit", "main", "onSuspend", "onResume"],
            Dialect::Vhdl => &["OnEntry", "OnExit", "OnResume", "OnSuspend", "Internal"],
            Dialect::Clfsm | Dialect::Ucfsm => {
                &["OnEntry", "OnExit", "Internal", "OnSuspend", "OnResume"]
            }
            Dialect::Spartanfsm => &["OnEntry", "OnExit", "Internal"],
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dialect::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoreError::UnknownDialect {
                name: s.to_string(),
            })
    }
}

/// Returns the mutator for `dialect`.
pub fn mutator(dialect: Dialect) -> Box<dyn DialectMutator> {
    match dialect {
        Dialect::Swiftfsm => Box::new(SwiftfsmMutator::new()),
        Dialect::Vhdl => Box::new(VhdlMutator::new()),
        Dialect::Clfsm | Dialect::Ucfsm | Dialect::Spartanfsm => Box::new(CxxMutator::new(dialect)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        for dialect in Dialect::ALL {
            assert_eq!(dialect.to_string().parse::<Dialect>().unwrap(), dialect);
        }
        assert_eq!("VHDL".parse::<Dialect>().unwrap(), Dialect::Vhdl);
        assert!(matches!(
            "scxml".parse::<Dialect>(),
            Err(CoreError::UnknownDialect { .. })
        ));
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&Dialect::Spartanfsm).unwrap();
        assert_eq!(json, "\"spartanfsm\"");
    }

    #[test]
    fn test_mutator_dispatch() {
        for dialect in Dialect::ALL {
            assert_eq!(mutator(dialect).dialect(), dialect);
        }
    }

    #[test]
    fn test_every_initial_machine_is_valid() {
        for dialect in Dialect::ALL {
            let mutator = mutator(dialect);
            let machine = mutator.initial_machine(std::path::Path::new("Test.machine")).unwrap();
            assert_eq!(mutator.validator().violations(&machine), vec![], "{dialect}");
            assert_eq!(machine.initial_state, "Initial");
            assert_eq!(machine.suspend_state.is_some(), dialect.supports_suspension());
            for state in &machine.states {
                let names: Vec<&str> = state.actions.iter().map(|a| a.name.as_str()).collect();
                assert_eq!(names, dialect.action_names());
            }
        }
    }
}
