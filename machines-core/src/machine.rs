//! Machine document model.
//!
//! A [`Machine`] owns its states, which own their actions and (for
//! state-owned layouts) their transitions. States are held behind [`Arc`] so
//! cloning a machine for a transaction copies pointers, and only the states an
//! edit touches are copied on write.

use crate::attribute::{AttributeValue, Field, Language};
use crate::dialect::{Dialect, TransitionLayout};
use crate::validation::Violation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Non-semantic data (layout, colours, ...) attached to a document node.
pub type Metadata = BTreeMap<String, AttributeValue>;

/// A named bundle of attributes with the schema they must follow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeGroup {
    pub name: String,
    pub fields: Vec<Field>,
    pub attributes: BTreeMap<String, AttributeValue>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl AttributeGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            attributes: BTreeMap::new(),
            metadata: Metadata::new(),
        }
    }

    /// Adds a field initialised to its type's default value.
    pub fn with_field(self, field: Field) -> Self {
        let value = field.ty.default_value();
        self.with(field, value)
    }

    /// Adds a field with an explicit value.
    pub fn with(mut self, field: Field, value: AttributeValue) -> Self {
        self.insert(field, value);
        self
    }

    /// Inserts or replaces a field and its value.
    pub fn insert(&mut self, field: Field, value: AttributeValue) {
        match self.fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => *existing = field.clone(),
            None => self.fields.push(field.clone()),
        }
        self.attributes.insert(field.name, value);
    }

    /// Removes a field and its value, returning the value.
    pub fn remove(&mut self, name: &str) -> Option<AttributeValue> {
        self.fields.retain(|f| f.name != name);
        self.attributes.remove(name)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    pub fn attribute_mut(&mut self, name: &str) -> Option<&mut AttributeValue> {
        self.attributes.get_mut(name)
    }
}

/// Looks up a group by name.
pub fn group<'a>(groups: &'a [AttributeGroup], name: &str) -> Option<&'a AttributeGroup> {
    groups.iter().find(|g| g.name == name)
}

/// A named block of code run by a state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    pub implementation: String,
    pub language: Language,
}

impl Action {
    pub fn new(name: impl Into<String>, language: Language) -> Self {
        Self {
            name: name.into(),
            implementation: String::new(),
            language,
        }
    }
}

/// An edge between two states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Source state; only set where transitions are held flat on the machine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub target: String,
    #[serde(default)]
    pub attributes: Vec<AttributeGroup>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl Transition {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            condition: None,
            source: None,
            target: target.into(),
            attributes: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// A state of the machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub name: String,
    pub actions: Vec<Action>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    #[serde(default)]
    pub attributes: Vec<AttributeGroup>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl State {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: Vec::new(),
            transitions: Vec::new(),
            attributes: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    pub fn action(&self, name: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.name == name)
    }

    pub fn group(&self, name: &str) -> Option<&AttributeGroup> {
        group(&self.attributes, name)
    }
}

/// A reference to another machine by relative location.
///
/// The referenced machine is never held inline; loading it is the codec's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub location: String,
    /// Attributes the depending machine supplies when parameterising the dependency.
    #[serde(default)]
    pub fields: Vec<Field>,
}

impl Dependency {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            fields: Vec::new(),
        }
    }

    /// Name of the referenced machine, taken from the final location component.
    pub fn name(&self) -> String {
        machine_name(Path::new(&self.location))
    }

    /// Resolves the location against the depending machine's own location.
    pub fn resolve(&self, machine_location: &Path) -> PathBuf {
        let base = machine_location.parent().unwrap_or_else(|| Path::new(""));
        base.join(&self.location)
    }
}

/// An editable finite-state-machine description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    pub dialect: Dialect,

    /// Bundle location; the machine's name is derived from it.
    #[serde(skip)]
    pub location: PathBuf,

    pub initial_state: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspend_state: Option<String>,

    pub states: Vec<Arc<State>>,

    /// Machine-level transitions, used by flat transition layouts.
    #[serde(default)]
    pub transitions: Vec<Transition>,

    #[serde(default)]
    pub dependencies: Vec<Dependency>,

    pub attributes: Vec<AttributeGroup>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,

    /// Violations recorded by the last failed edit.
    #[serde(skip)]
    pub errors: Vec<Violation>,
}

// The retained error set is bookkeeping, not content.
impl PartialEq for Machine {
    fn eq(&self, other: &Self) -> bool {
        self.dialect == other.dialect
            && self.location == other.location
            && self.initial_state == other.initial_state
            && self.suspend_state == other.suspend_state
            && self.states == other.states
            && self.transitions == other.transitions
            && self.dependencies == other.dependencies
            && self.attributes == other.attributes
            && self.metadata == other.metadata
    }
}

impl Eq for Machine {}

impl Machine {
    /// Creates an empty machine; dialects build populated ones via `initial_machine`.
    pub fn new(dialect: Dialect, location: impl Into<PathBuf>) -> Self {
        Self {
            dialect,
            location: location.into(),
            initial_state: String::new(),
            suspend_state: None,
            states: Vec::new(),
            transitions: Vec::new(),
            dependencies: Vec::new(),
            attributes: Vec::new(),
            metadata: Metadata::new(),
            errors: Vec::new(),
        }
    }

    /// Machine name, derived from the location (`Foo.machine` -> `Foo`).
    pub fn name(&self) -> String {
        machine_name(&self.location)
    }

    pub fn state(&self, name: &str) -> Option<&State> {
        self.states.iter().find(|s| s.name == name).map(|s| s.as_ref())
    }

    pub fn state_index(&self, name: &str) -> Option<usize> {
        self.states.iter().position(|s| s.name == name)
    }

    pub fn has_state(&self, name: &str) -> bool {
        self.state_index(name).is_some()
    }

    pub fn state_names(&self) -> Vec<String> {
        self.states.iter().map(|s| s.name.clone()).collect()
    }

    /// Mutable access to a state, copying it if it is shared with a snapshot.
    pub fn state_mut(&mut self, index: usize) -> Option<&mut State> {
        self.states.get_mut(index).map(Arc::make_mut)
    }

    pub fn group(&self, name: &str) -> Option<&AttributeGroup> {
        group(&self.attributes, name)
    }

    pub fn group_mut(&mut self, name: &str) -> Option<&mut AttributeGroup> {
        self.attributes.iter_mut().find(|g| g.name == name)
    }

    /// Every transition as `(source, transition)`, whichever layout holds it.
    pub fn all_transitions(&self) -> Vec<(&str, &Transition)> {
        match self.dialect.transition_layout() {
            TransitionLayout::StateOwned => self
                .states
                .iter()
                .flat_map(|s| s.transitions.iter().map(move |t| (s.name.as_str(), t)))
                .collect(),
            TransitionLayout::Flat => self
                .transitions
                .iter()
                .map(|t| (t.source.as_deref().unwrap_or_default(), t))
                .collect(),
        }
    }

    /// Number of transitions leaving `state`.
    pub fn transition_count(&self, state: &str) -> usize {
        self.all_transitions()
            .iter()
            .filter(|(source, _)| *source == state)
            .count()
    }

    /// Violations retained from the last failed edit.
    pub fn errors(&self) -> &[Violation] {
        &self.errors
    }

    /// Structural hash of the canonical JSON form.
    pub fn checksum(&self) -> String {
        // Serialising owned string-keyed maps cannot fail.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        format!("{:08x}", crc32c::crc32c(&bytes))
    }
}

fn machine_name(location: &Path) -> String {
    location
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeType;

    fn sample() -> Machine {
        let mut machine = Machine::new(Dialect::Clfsm, "/tmp/machines/PingPong.machine");
        let mut ping = State::new("Ping");
        ping.transitions.push(Transition::new("Pong").with_condition("after(1)"));
        machine.states.push(Arc::new(ping));
        machine.states.push(Arc::new(State::new("Pong")));
        machine.initial_state = "Ping".to_string();
        machine
    }

    #[test]
    fn test_name_from_location() {
        assert_eq!(sample().name(), "PingPong");
        assert_eq!(Machine::new(Dialect::Vhdl, "").name(), "");
    }

    #[test]
    fn test_structural_equality_ignores_errors() {
        let a = sample();
        let mut b = sample();
        b.errors.push(Violation::new(
            crate::path::AttributePath::root(),
            "stale".to_string(),
        ));
        assert_eq!(a, b);
        assert_eq!(a.checksum(), b.checksum());

        b.state_mut(1).unwrap().name = "Pang".to_string();
        assert_ne!(a, b);
        assert_ne!(a.checksum(), b.checksum());
    }

    #[test]
    fn test_clone_shares_untouched_states() {
        let a = sample();
        let mut b = a.clone();
        b.state_mut(0).unwrap().name = "Start".to_string();
        assert!(!Arc::ptr_eq(&a.states[0], &b.states[0]));
        assert!(Arc::ptr_eq(&a.states[1], &b.states[1]));
        assert_eq!(a.states[0].name, "Ping");
    }

    #[test]
    fn test_all_transitions_state_owned() {
        let machine = sample();
        let all = machine.all_transitions();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0, "Ping");
        assert_eq!(machine.transition_count("Ping"), 1);
        assert_eq!(machine.transition_count("Pong"), 0);
    }

    #[test]
    fn test_all_transitions_flat() {
        let mut machine = Machine::new(Dialect::Vhdl, "Blink.machine");
        machine.states.push(Arc::new(State::new("On")));
        machine.states.push(Arc::new(State::new("Off")));
        machine.transitions.push(Transition::new("Off").with_source("On"));
        machine.transitions.push(Transition::new("On").with_source("Off"));
        assert_eq!(machine.all_transitions().len(), 2);
        assert_eq!(machine.transition_count("Off"), 1);
    }

    #[test]
    fn test_group_insert_and_remove() {
        let mut group = AttributeGroup::new("ringlet")
            .with_field(Field::new("use_custom_ringlet", AttributeType::Bool));
        group.insert(Field::new("imports", AttributeType::Text), AttributeValue::text("import Foo"));
        assert_eq!(group.fields.len(), 2);
        assert_eq!(group.attribute("imports"), Some(&AttributeValue::text("import Foo")));

        assert!(group.remove("imports").is_some());
        assert!(group.field("imports").is_none());
        assert!(group.attribute("imports").is_none());
    }

    #[test]
    fn test_dependency_resolution() {
        let dep = Dependency::new("../Sub/Timer.machine");
        assert_eq!(dep.name(), "Timer");
        let resolved = dep.resolve(Path::new("/work/Main/Main.machine"));
        assert_eq!(resolved, PathBuf::from("/work/Main/../Sub/Timer.machine"));
    }
}
