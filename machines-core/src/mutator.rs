//! Dialect mutators.
//!
//! [`DialectMutator`] is the editing contract every dialect implements. A
//! dialect supplies its schema, rules, triggers and writable paths; the
//! editing operations themselves are provided methods shared by all
//! dialects. Every operation runs through [`transaction::apply`], so it
//! either commits completely or leaves the machine untouched.
//!
//! Each operation returns `true` when the edit was structural, meaning it
//! changed state or transition topology.
//!
//! The dependency list itself is fixed once a machine is built or decoded;
//! only each dependency's `location` is writable.

use crate::attribute::{row_conforms, AttributeValue};
use crate::dialect::{Dialect, TransitionLayout};
use crate::error::CoreError;
use crate::machine::{Action, AttributeGroup, Machine, State, Transition};
use crate::path::{AttributePath, Edit, Leaf, Path, Step};
use crate::transaction::{self, Outcome};
use crate::trigger::{Change, MirrorTarget, Rename, TriggerSet};
use crate::validation::Validator;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// Base name of generated states.
pub const NEW_STATE_NAME: &str = "State";

/// A new element for a collection or table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    /// An element of a collection.
    Value(AttributeValue),
    /// A row of a table.
    Row(Vec<AttributeValue>),
}

/// The editing contract of one dialect.
pub trait DialectMutator: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Machine-level attribute groups of a new machine.
    fn machine_groups(&self) -> Vec<AttributeGroup>;

    /// Attribute groups of a new state.
    fn state_groups(&self) -> Vec<AttributeGroup>;

    /// Attribute groups of a new transition.
    fn transition_groups(&self) -> Vec<AttributeGroup> {
        Vec::new()
    }

    fn validator(&self) -> &Validator;

    fn triggers(&self) -> &TriggerSet;

    /// Path patterns `modify` may write.
    fn whitelist(&self) -> &[AttributePath];

    /// Builds a state with this dialect's actions and attribute skeleton.
    fn state_skeleton(&self, name: &str) -> State {
        let dialect = self.dialect();
        let mut state = State::new(name);
        state.actions = dialect
            .action_names()
            .iter()
            .map(|action| Action::new(*action, dialect.language()))
            .collect();
        state.attributes = self.state_groups();
        state
    }

    /// Builds the default machine for a new bundle at `location`.
    fn initial_machine(&self, location: &std::path::Path) -> Result<Machine, CoreError> {
        let dialect = self.dialect();
        let mut machine = Machine::new(dialect, location);
        machine.states.push(Arc::new(self.state_skeleton("Initial")));
        machine.initial_state = "Initial".to_string();
        if dialect.supports_suspension() {
            machine.states.push(Arc::new(self.state_skeleton("Suspended")));
            machine.suspend_state = Some("Suspended".to_string());
        }
        machine.attributes = self.machine_groups();

        // Mirror the chosen states into the settings group, then derive the rest.
        let seed = Change::at(Path::machine().states().into_untyped())
            .with(MirrorTarget::InitialState.path())
            .with(MirrorTarget::SuspendState.path());
        self.triggers().apply(&mut machine, &seed)?;
        self.triggers().sync_all(&mut machine)?;
        self.validator().validate(&machine)?;
        tracing::debug!(%dialect, machine = %machine.name(), "initial machine built");
        Ok(machine)
    }

    fn add_item(&self, machine: &mut Machine, path: &AttributePath, item: Item) -> Result<bool, CoreError> {
        transact(self, machine, "add_item", |m| add_item(self, m, path, item))
    }

    /// Moves the elements at `from` so they start at offset `to` of the original list.
    fn move_items(
        &self,
        machine: &mut Machine,
        path: &AttributePath,
        from: &BTreeSet<usize>,
        to: usize,
    ) -> Result<bool, CoreError> {
        transact(self, machine, "move_items", |m| move_items(self, m, path, from, to))
    }

    fn delete_item(&self, machine: &mut Machine, path: &AttributePath, index: usize) -> Result<bool, CoreError> {
        self.delete_items(machine, path, &BTreeSet::from([index]))
    }

    fn delete_items(
        &self,
        machine: &mut Machine,
        path: &AttributePath,
        indices: &BTreeSet<usize>,
    ) -> Result<bool, CoreError> {
        transact(self, machine, "delete_items", |m| delete_items(self, m, path, indices))
    }

    /// Appends a state named `State`, `State0`, `State1`, ... whichever is unused first.
    fn new_state(&self, machine: &mut Machine) -> Result<bool, CoreError> {
        transact(self, machine, "new_state", |m| {
            let name = fresh_state_name(m);
            tracing::debug!(state = %name, "adding state");
            m.states.push(Arc::new(self.state_skeleton(&name)));
            Ok(Outcome::structural(Change::at(
                Path::machine().states().into_untyped(),
            )))
        })
    }

    fn new_transition(
        &self,
        machine: &mut Machine,
        source: &str,
        target: &str,
        condition: Option<&str>,
    ) -> Result<bool, CoreError> {
        transact(self, machine, "new_transition", |m| {
            new_transition(self, m, source, target, condition)
        })
    }

    fn delete_state(&self, machine: &mut Machine, index: usize) -> Result<bool, CoreError> {
        self.delete_states(machine, &BTreeSet::from([index]))
    }

    fn delete_states(&self, machine: &mut Machine, indices: &BTreeSet<usize>) -> Result<bool, CoreError> {
        transact(self, machine, "delete_states", |m| delete_states(m, indices))
    }

    /// Deletes transition `index` of those leaving state `state`.
    fn delete_transition(&self, machine: &mut Machine, state: usize, index: usize) -> Result<bool, CoreError> {
        self.delete_transitions(machine, state, &BTreeSet::from([index]))
    }

    fn delete_transitions(
        &self,
        machine: &mut Machine,
        state: usize,
        indices: &BTreeSet<usize>,
    ) -> Result<bool, CoreError> {
        transact(self, machine, "delete_transitions", |m| {
            delete_transitions(m, state, indices)
        })
    }

    /// Writes a leaf value; state renames cascade into every reference.
    fn modify(&self, machine: &mut Machine, edit: Edit) -> Result<bool, CoreError> {
        transact(self, machine, "modify", |m| modify(self, m, edit))
    }

    fn validate(&self, machine: &Machine) -> Result<(), CoreError> {
        self.validator().validate(machine)
    }
}

/// Runs `edit` as one transaction against the mutator's triggers and rules.
fn transact<D, F>(mutator: &D, machine: &mut Machine, operation: &str, edit: F) -> Result<bool, CoreError>
where
    D: DialectMutator + ?Sized,
    F: FnOnce(&mut Machine) -> Result<Outcome, CoreError>,
{
    transaction::apply(
        machine,
        mutator.dialect(),
        mutator.triggers(),
        mutator.validator(),
        operation,
        edit,
    )
}

fn fresh_state_name(machine: &Machine) -> String {
    let taken: HashSet<&str> = machine.states.iter().map(|s| s.name.as_str()).collect();
    if !taken.contains(NEW_STATE_NAME) {
        return NEW_STATE_NAME.to_string();
    }
    let mut suffix = 0usize;
    loop {
        let name = format!("{NEW_STATE_NAME}{suffix}");
        if !taken.contains(name.as_str()) {
            return name;
        }
        suffix += 1;
    }
}

fn ensure_writable<D: DialectMutator + ?Sized>(
    mutator: &D,
    path: &AttributePath,
    operation: &str,
) -> Result<(), CoreError> {
    if path.is_pattern() {
        return Err(CoreError::NotWritable { path: path.clone() });
    }
    if matches!(path.last(), Some(Step::States | Step::Transitions)) {
        return Err(CoreError::Unsupported {
            dialect: mutator.dialect(),
            operation: format!("{operation} on states or transitions"),
            path: path.clone(),
        });
    }
    if *path == MirrorTarget::SuspendState.path() && !mutator.dialect().supports_suspension() {
        return Err(CoreError::Unsupported {
            dialect: mutator.dialect(),
            operation: "suspension".to_string(),
            path: path.clone(),
        });
    }
    if mutator.whitelist().iter().any(|allowed| allowed.covers(path)) {
        Ok(())
    } else {
        Err(CoreError::NotWritable { path: path.clone() })
    }
}

fn block_mut<'a>(machine: &'a mut Machine, path: &AttributePath) -> Result<&'a mut AttributeValue, CoreError> {
    let node = path.resolve_mut(machine)?;
    let found = crate::path::kind_of(node);
    node.as_any_mut()
        .downcast_mut::<AttributeValue>()
        .ok_or_else(|| CoreError::TypeMismatch {
            path: path.clone(),
            expected: "collection or table".to_string(),
            found: found.to_string(),
        })
}

fn add_item<D: DialectMutator + ?Sized>(
    mutator: &D,
    machine: &mut Machine,
    path: &AttributePath,
    item: Item,
) -> Result<Outcome, CoreError> {
    ensure_writable(mutator, path, "add_item")?;
    let block = block_mut(machine, path)?;
    let mismatch = |expected: &str, found: &str| CoreError::TypeMismatch {
        path: path.clone(),
        expected: expected.to_string(),
        found: found.to_string(),
    };
    match (block, item) {
        (AttributeValue::Collection { values, element }, Item::Value(value)) => {
            if !value.conforms_to(element) {
                return Err(mismatch(element.kind(), value.kind()));
            }
            values.push(value);
        }
        (AttributeValue::Table { rows, columns }, Item::Row(row)) => {
            if !row_conforms(&row, columns) {
                return Err(mismatch("row matching the table columns", "row"));
            }
            rows.push(row);
        }
        (block, Item::Value(_)) => return Err(mismatch("collection", block.kind())),
        (block, Item::Row(_)) => return Err(mismatch("table", block.kind())),
    }
    Ok(Outcome::data(Change::at(path.clone())))
}

fn check_indices(path: &AttributePath, indices: &BTreeSet<usize>, len: usize) -> Result<(), CoreError> {
    match indices.iter().find(|&&index| index >= len) {
        Some(&index) => Err(CoreError::IndexOutOfBounds {
            path: path.clone(),
            index,
            len,
        }),
        None => Ok(()),
    }
}

fn remove_indices<T>(items: &mut Vec<T>, indices: &BTreeSet<usize>) {
    let mut position = 0;
    items.retain(|_| {
        let keep = !indices.contains(&position);
        position += 1;
        keep
    });
}

fn move_indices<T>(items: &mut Vec<T>, from: &BTreeSet<usize>, to: usize) {
    let mut moving = Vec::with_capacity(from.len());
    let mut staying = Vec::with_capacity(items.len());
    for (index, item) in items.drain(..).enumerate() {
        if from.contains(&index) {
            moving.push(item);
        } else {
            staying.push(item);
        }
    }
    let at = to - from.range(..to).count();
    let tail = staying.split_off(at);
    staying.extend(moving);
    staying.extend(tail);
    *items = staying;
}

fn move_items<D: DialectMutator + ?Sized>(
    mutator: &D,
    machine: &mut Machine,
    path: &AttributePath,
    from: &BTreeSet<usize>,
    to: usize,
) -> Result<Outcome, CoreError> {
    ensure_writable(mutator, path, "move_items")?;
    let block = block_mut(machine, path)?;
    let len = block.len().unwrap_or(0);
    check_indices(path, from, len)?;
    if to > len {
        return Err(CoreError::IndexOutOfBounds {
            path: path.clone(),
            index: to,
            len,
        });
    }
    match block {
        AttributeValue::Collection { values, .. } => move_indices(values, from, to),
        AttributeValue::Table { rows, .. } => move_indices(rows, from, to),
        other => {
            return Err(CoreError::TypeMismatch {
                path: path.clone(),
                expected: "collection or table".to_string(),
                found: other.kind().to_string(),
            })
        }
    }
    Ok(Outcome::data(Change::at(path.clone())))
}

fn delete_items<D: DialectMutator + ?Sized>(
    mutator: &D,
    machine: &mut Machine,
    path: &AttributePath,
    indices: &BTreeSet<usize>,
) -> Result<Outcome, CoreError> {
    ensure_writable(mutator, path, "delete_items")?;
    let block = block_mut(machine, path)?;
    check_indices(path, indices, block.len().unwrap_or(0))?;
    match block {
        AttributeValue::Collection { values, .. } => remove_indices(values, indices),
        AttributeValue::Table { rows, .. } => remove_indices(rows, indices),
        other => {
            return Err(CoreError::TypeMismatch {
                path: path.clone(),
                expected: "collection or table".to_string(),
                found: other.kind().to_string(),
            })
        }
    }
    Ok(Outcome::data(Change::at(path.clone())))
}

fn new_transition<D: DialectMutator + ?Sized>(
    mutator: &D,
    machine: &mut Machine,
    source: &str,
    target: &str,
    condition: Option<&str>,
) -> Result<Outcome, CoreError> {
    let states = Path::machine().states();
    let missing = |name: &str| CoreError::StateNotFound {
        path: states.untyped().clone(),
        name: name.to_string(),
    };
    let source_index = machine.state_index(source).ok_or_else(|| missing(source))?;
    if !machine.has_state(target) {
        return Err(missing(target));
    }

    let mut transition = Transition::new(target);
    transition.condition = condition.map(str::to_string);
    transition.attributes = mutator.transition_groups();
    let list = match machine.dialect.transition_layout() {
        TransitionLayout::StateOwned => {
            let state = machine
                .state_mut(source_index)
                .ok_or_else(|| missing(source))?;
            state.transitions.push(transition);
            states.index(source_index).transitions().into_untyped()
        }
        TransitionLayout::Flat => {
            transition.source = Some(source.to_string());
            machine.transitions.push(transition);
            Path::machine().transitions().into_untyped()
        }
    };
    Ok(Outcome::structural(Change::at(list)))
}

fn delete_states(machine: &mut Machine, indices: &BTreeSet<usize>) -> Result<Outcome, CoreError> {
    let states = Path::machine().states();
    check_indices(states.untyped(), indices, machine.states.len())?;
    if indices.is_empty() {
        return Ok(Outcome::data(Change::default()));
    }
    let removed: HashSet<String> = indices
        .iter()
        .map(|&index| machine.states[index].name.clone())
        .collect();
    if removed.contains(&machine.initial_state) {
        let index = machine.state_index(&machine.initial_state).unwrap_or_default();
        return Err(CoreError::InitialStateDeletion {
            path: states.index(index).into_untyped(),
            name: machine.initial_state.clone(),
        });
    }
    tracing::debug!(states = ?removed, "deleting states");

    remove_indices(&mut machine.states, indices);
    let dangling = |t: &Transition| {
        removed.contains(&t.target) || t.source.as_ref().is_some_and(|s| removed.contains(s))
    };
    for index in 0..machine.states.len() {
        if machine.states[index].transitions.iter().any(dangling) {
            if let Some(state) = machine.state_mut(index) {
                state.transitions.retain(|t| !dangling(t));
            }
        }
    }
    machine.transitions.retain(|t| !dangling(t));
    if machine.suspend_state.as_ref().is_some_and(|s| removed.contains(s)) {
        machine.suspend_state = None;
    }

    Ok(Outcome::structural(
        Change::at(states.into_untyped())
            .with(Path::machine().transitions().into_untyped())
            .with(MirrorTarget::SuspendState.path()),
    ))
}

fn delete_transitions(
    machine: &mut Machine,
    state: usize,
    indices: &BTreeSet<usize>,
) -> Result<Outcome, CoreError> {
    let states = Path::machine().states();
    let len = machine.states.len();
    if state >= len {
        return Err(CoreError::IndexOutOfBounds {
            path: states.into_untyped(),
            index: state,
            len,
        });
    }
    let owned = states.index(state).transitions();
    let not_found = |index: usize| CoreError::TransitionNotFound {
        path: owned.index(index).into_untyped(),
    };

    match machine.dialect.transition_layout() {
        TransitionLayout::StateOwned => {
            let count = machine.states[state].transitions.len();
            if let Some(&index) = indices.iter().find(|&&i| i >= count) {
                return Err(not_found(index));
            }
            if let Some(s) = machine.state_mut(state) {
                remove_indices(&mut s.transitions, indices);
            }
            Ok(Outcome::structural(Change::at(owned.into_untyped())))
        }
        TransitionLayout::Flat => {
            let name = machine.states[state].name.clone();
            let positions: Vec<usize> = machine
                .transitions
                .iter()
                .enumerate()
                .filter(|(_, t)| t.source.as_deref() == Some(name.as_str()))
                .map(|(position, _)| position)
                .collect();
            if let Some(&index) = indices.iter().find(|&&i| i >= positions.len()) {
                return Err(not_found(index));
            }
            let doomed: BTreeSet<usize> = indices.iter().map(|&i| positions[i]).collect();
            remove_indices(&mut machine.transitions, &doomed);
            Ok(Outcome::structural(Change::at(
                Path::machine().transitions().into_untyped(),
            )))
        }
    }
}

fn modify<D: DialectMutator + ?Sized>(
    mutator: &D,
    machine: &mut Machine,
    edit: Edit,
) -> Result<Outcome, CoreError> {
    let state_name = Path::machine().states().each().name().into_untyped();
    if state_name.matches(&edit.path) {
        if let Some(Step::Index(index)) = edit.path.steps().get(1) {
            return rename_state(machine, *index, edit);
        }
    }

    ensure_writable(mutator, &edit.path, "modify")?;
    let retargets = matches!(edit.path.last(), Some(Step::Source | Step::Target));
    let renamed = edit.value.as_text();
    let previous = edit.path.write(machine, edit.value)?;
    let mut change = Change::at(edit.path.clone());
    if let (Some(from), Some(to)) = (previous.as_text(), renamed) {
        if from != to && !from.is_empty() {
            change = change.with_rename(Rename {
                path: edit.path,
                from,
                to,
            });
        }
    }
    if retargets {
        Ok(Outcome::structural(change))
    } else {
        Ok(Outcome::data(change))
    }
}

fn rename_state(machine: &mut Machine, index: usize, edit: Edit) -> Result<Outcome, CoreError> {
    let path = edit.path;
    let to = match edit.value {
        Leaf::Text(name) => name,
        other => {
            return Err(CoreError::TypeMismatch {
                path,
                expected: "text".to_string(),
                found: match other {
                    Leaf::OptionalText(_) => "optional text".to_string(),
                    Leaf::Attribute(value) => value.kind().to_string(),
                    Leaf::Text(_) => "text".to_string(),
                },
            })
        }
    };
    let len = machine.states.len();
    let from = match machine.states.get(index) {
        Some(state) => state.name.clone(),
        None => {
            return Err(CoreError::IndexOutOfBounds {
                path: Path::machine().states().into_untyped(),
                index,
                len,
            })
        }
    };
    if from == to {
        return Ok(Outcome::data(Change::default()));
    }
    if machine.has_state(&to) {
        return Err(CoreError::DuplicateState { path, name: to });
    }
    tracing::debug!(%from, %to, "renaming state");

    if let Some(state) = machine.state_mut(index) {
        state.name = to.clone();
    }
    let rename = |name: &mut String| {
        if *name == from {
            *name = to.clone();
        }
    };
    for i in 0..machine.states.len() {
        if machine.states[i].transitions.iter().any(|t| t.target == from) {
            if let Some(state) = machine.state_mut(i) {
                state.transitions.iter_mut().for_each(|t| rename(&mut t.target));
            }
        }
    }
    for transition in &mut machine.transitions {
        rename(&mut transition.target);
        if let Some(source) = transition.source.as_mut() {
            rename(source);
        }
    }
    rename(&mut machine.initial_state);
    if let Some(suspend) = machine.suspend_state.as_mut() {
        rename(suspend);
    }

    Ok(Outcome::structural(
        Change::at(path.clone())
            .with(MirrorTarget::InitialState.path())
            .with(MirrorTarget::SuspendState.path())
            .with_rename(Rename { path, from, to }),
    ))
}
