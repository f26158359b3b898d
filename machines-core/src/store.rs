//! Concurrent machine store.
//!
//! Holds many machines keyed by name. Each machine sits behind its own lock,
//! so edits to one machine are serialised while different machines can be
//! edited in parallel.

use crate::dialect::{self, Dialect};
use crate::error::CoreError;
use crate::machine::Machine;
use crate::mutator::DialectMutator;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

/// Machines being edited, indexed by name.
pub struct MachineStore {
    machines: DashMap<String, Mutex<Machine>>,

    /// One mutator per dialect, built on first use.
    mutators: DashMap<Dialect, Arc<dyn DialectMutator>>,
}

impl MachineStore {
    pub fn new() -> Self {
        Self {
            machines: DashMap::new(),
            mutators: DashMap::new(),
        }
    }

    /// Returns the shared mutator for `dialect`.
    pub fn mutator(&self, dialect: Dialect) -> Arc<dyn DialectMutator> {
        self.mutators
            .entry(dialect)
            .or_insert_with(|| Arc::from(dialect::mutator(dialect)))
            .clone()
    }

    /// Creates the initial machine of `dialect` at `location` and stores it.
    pub fn create(&self, dialect: Dialect, location: &Path) -> Result<String, CoreError> {
        let machine = self.mutator(dialect).initial_machine(location)?;
        let name = machine.name();
        match self.machines.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(CoreError::MachineExists { name }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Mutex::new(machine));
                tracing::info!(machine = %name, %dialect, "machine created");
                Ok(name)
            }
        }
    }

    /// Stores a machine, replacing any machine with the same name.
    pub fn insert(&self, machine: Machine) -> Option<Machine> {
        let name = machine.name();
        tracing::info!(machine = %name, dialect = %machine.dialect, "machine stored");
        self.machines
            .insert(name, Mutex::new(machine))
            .map(Mutex::into_inner)
    }

    /// Returns a snapshot of a machine.
    pub fn get(&self, name: &str) -> Result<Machine, CoreError> {
        let entry = self.machines.get(name).ok_or_else(|| not_found(name))?;
        let machine = entry.lock().clone();
        Ok(machine)
    }

    /// Runs `edit` with exclusive access to a machine and its dialect's mutator.
    pub fn edit<F, T>(&self, name: &str, edit: F) -> Result<T, CoreError>
    where
        F: FnOnce(&dyn DialectMutator, &mut Machine) -> Result<T, CoreError>,
    {
        let entry = self.machines.get(name).ok_or_else(|| not_found(name))?;
        let mut machine = entry.lock();
        let mutator = self.mutator(machine.dialect);
        edit(mutator.as_ref(), &mut machine)
    }

    pub fn remove(&self, name: &str) -> Result<Machine, CoreError> {
        let (_, machine) = self.machines.remove(name).ok_or_else(|| not_found(name))?;
        tracing::info!(machine = %name, "machine removed");
        Ok(machine.into_inner())
    }

    /// Names of stored machines, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.machines.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }
}

impl Default for MachineStore {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(name: &str) -> CoreError {
    CoreError::MachineNotFound {
        name: name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_create_and_get() {
        let store = MachineStore::new();
        let name = store.create(Dialect::Clfsm, Path::new("Pump.machine")).unwrap();
        assert_eq!(name, "Pump");
        assert_eq!(store.get("Pump").unwrap().state_names(), vec!["Initial", "Suspended"]);

        let err = store.create(Dialect::Ucfsm, Path::new("other/Pump.machine")).unwrap_err();
        assert_eq!(err, CoreError::MachineExists { name: "Pump".to_string() });
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_missing_machine() {
        let store = MachineStore::new();
        assert!(matches!(store.get("Nope"), Err(CoreError::MachineNotFound { .. })));
        assert!(store.edit("Nope", |_, _| Ok(())).is_err());
        assert!(store.remove("Nope").is_err());
    }

    #[test]
    fn test_edit_uses_machine_dialect() {
        let store = MachineStore::new();
        store.create(Dialect::Vhdl, Path::new("Blink.machine")).unwrap();
        let structural = store
            .edit("Blink", |mutator, machine| {
                assert_eq!(mutator.dialect(), Dialect::Vhdl);
                mutator.new_transition(machine, "Initial", "Suspended", None)
            })
            .unwrap();
        assert!(structural);
        assert_eq!(store.get("Blink").unwrap().transitions.len(), 1);
    }

    #[test]
    fn test_concurrent_edits_serialised() {
        let store = MachineStore::new();
        store.create(Dialect::Swiftfsm, Path::new("Busy.machine")).unwrap();
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..4 {
                        store
                            .edit("Busy", |mutator, machine| mutator.new_state(machine))
                            .unwrap();
                    }
                });
            }
        });
        let machine = store.get("Busy").unwrap();
        let names: HashSet<String> = machine.state_names().into_iter().collect();
        assert_eq!(machine.states.len(), 2 + 32);
        assert_eq!(names.len(), machine.states.len());
    }

    #[test]
    fn test_insert_and_remove() {
        let store = MachineStore::new();
        let machine = dialect::mutator(Dialect::Spartanfsm)
            .initial_machine(Path::new("Tiny.machine"))
            .unwrap();
        assert!(store.insert(machine.clone()).is_none());
        assert_eq!(store.insert(machine.clone()), Some(machine.clone()));
        assert_eq!(store.names(), vec!["Tiny".to_string()]);
        assert_eq!(store.remove("Tiny").unwrap(), machine);
        assert!(store.is_empty());
    }
}
