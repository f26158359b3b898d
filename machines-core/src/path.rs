//! Path expressions into a machine.
//!
//! A path is a sequence of [`Step`]s from the machine root. [`Path<T, K>`]
//! wraps an [`AttributePath`] with the type `T` it addresses, so builder
//! methods only exist where the addressed value has that shape:
//!
//! ```
//! use machines_core::path::Path;
//!
//! let cell = Path::machine()
//!     .attributes()
//!     .group("variables")
//!     .attribute("external_variables")
//!     .cell(3, 1);
//! assert_eq!(
//!     cell.to_string(),
//!     r#"machine.attributes["variables"]["external_variables"][3][1]"#
//! );
//! ```
//!
//! Paths built with `each()` are patterns (`K = Wildcard`). Patterns cannot be
//! read or written; they expand against a machine into exact paths and are
//! used to declare validation rules, triggers and whitelists.

use crate::attribute::AttributeValue;
use crate::error::CoreError;
use crate::machine::{Action, AttributeGroup, Dependency, Machine, State, Transition};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;

/// One step of a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Step {
    States,
    Transitions,
    Dependencies,
    Attributes,
    InitialState,
    SuspendState,
    Name,
    Actions,
    Implementation,
    Condition,
    Source,
    Target,
    Location,
    /// Position in a list, collection or table (rows, then cells).
    Index(usize),
    /// Every position; only appears in patterns.
    Each,
    /// Element of a list looked up by its name (attribute groups).
    Named(String),
    /// Entry of a keyed map (group attributes, complex fields).
    Key(String),
}

impl Step {
    fn matches(&self, other: &Step) -> bool {
        self == other
            || matches!(
                (self, other),
                (Step::Each, Step::Index(_) | Step::Named(_) | Step::Each)
                    | (Step::Index(_) | Step::Named(_), Step::Each)
            )
    }
}

/// An untyped path from the machine root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct AttributePath {
    steps: Vec<Step>,
}

impl AttributePath {
    /// The machine itself.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_steps(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn last(&self) -> Option<&Step> {
        self.steps.last()
    }

    /// Returns this path extended by one step.
    pub fn child(&self, step: Step) -> Self {
        let mut steps = self.steps.clone();
        steps.push(step);
        Self { steps }
    }

    /// Returns this path extended by several steps.
    pub fn join(&self, rest: &AttributePath) -> Self {
        let mut steps = self.steps.clone();
        steps.extend(rest.steps.iter().cloned());
        Self { steps }
    }

    pub fn parent(&self) -> Option<Self> {
        if self.steps.is_empty() {
            return None;
        }
        Some(Self {
            steps: self.steps[..self.steps.len() - 1].to_vec(),
        })
    }

    /// Returns the first `len` steps.
    pub fn prefix(&self, len: usize) -> Self {
        Self {
            steps: self.steps[..len.min(self.steps.len())].to_vec(),
        }
    }

    /// Returns true if the path contains wildcard steps.
    pub fn is_pattern(&self) -> bool {
        self.steps.contains(&Step::Each)
    }

    pub fn is_same_as(&self, other: &AttributePath) -> bool {
        self == other
    }

    /// Returns true if `other` lies strictly below this path.
    pub fn is_ancestor_of(&self, other: &AttributePath) -> bool {
        self.steps.len() < other.steps.len() && other.steps.starts_with(&self.steps)
    }

    pub fn is_ancestor_or_same(&self, other: &AttributePath) -> bool {
        other.steps.starts_with(&self.steps)
    }

    /// Wildcard-aware [`Self::is_ancestor_or_same`]: `states[*]` covers `states[2].name`.
    pub fn covers(&self, other: &AttributePath) -> bool {
        self.steps.len() <= other.steps.len()
            && self.steps.iter().zip(&other.steps).all(|(a, b)| a.matches(b))
    }

    /// Wildcard-aware equality.
    pub fn matches(&self, other: &AttributePath) -> bool {
        self.steps.len() == other.steps.len() && self.covers(other)
    }

    /// Returns true if either path covers the other.
    pub fn overlaps(&self, other: &AttributePath) -> bool {
        self.steps.iter().zip(&other.steps).all(|(a, b)| a.matches(b))
    }

    /// Resolves the path to the node it addresses.
    pub fn resolve<'a>(&self, machine: &'a Machine) -> Result<&'a dyn Navigate, CoreError> {
        let mut node: &dyn Navigate = machine;
        for (depth, step) in self.steps.iter().enumerate() {
            node = node.child(step).ok_or_else(|| CoreError::PathNotFound {
                path: self.prefix(depth + 1),
            })?;
        }
        Ok(node)
    }

    /// Resolves the path for mutation, copying shared states on the way.
    pub fn resolve_mut<'a>(
        &self,
        machine: &'a mut Machine,
    ) -> Result<&'a mut dyn Navigate, CoreError> {
        let mut node: &mut dyn Navigate = machine;
        for (depth, step) in self.steps.iter().enumerate() {
            node = node.child_mut(step).ok_or_else(|| CoreError::PathNotFound {
                path: self.prefix(depth + 1),
            })?;
        }
        Ok(node)
    }

    /// Follows this path as a relative path starting at `node`.
    pub fn resolve_from<'a>(&self, node: &'a dyn Navigate) -> Option<&'a dyn Navigate> {
        self.steps
            .iter()
            .try_fold(node, |node, step| node.child(step))
    }

    /// Reads the leaf value at this path.
    pub fn read(&self, machine: &Machine) -> Result<Leaf, CoreError> {
        let node = self.resolve(machine)?;
        Leaf::from_node(node).ok_or_else(|| CoreError::TypeMismatch {
            path: self.clone(),
            expected: "a writable value".to_string(),
            found: kind_of(node).to_string(),
        })
    }

    /// Replaces the leaf value at this path, returning the previous value.
    ///
    /// Attribute values may only be replaced by values of the same shape.
    pub fn write(&self, machine: &mut Machine, value: Leaf) -> Result<Leaf, CoreError> {
        if self.is_pattern() {
            return Err(CoreError::PathNotFound { path: self.clone() });
        }
        let node = self.resolve_mut(machine)?;
        let found = kind_of(node);
        let mismatch = |expected: &str, supplied: &str| CoreError::TypeMismatch {
            path: self.clone(),
            expected: expected.to_string(),
            found: supplied.to_string(),
        };
        let any = node.as_any_mut();
        match value {
            Leaf::Text(text) => match any.downcast_mut::<String>() {
                Some(slot) => Ok(Leaf::Text(std::mem::replace(slot, text))),
                None => Err(mismatch(found, "text")),
            },
            Leaf::OptionalText(text) => match any.downcast_mut::<Option<String>>() {
                Some(slot) => Ok(Leaf::OptionalText(std::mem::replace(slot, text))),
                None => Err(mismatch(found, "optional text")),
            },
            Leaf::Attribute(attribute) => match any.downcast_mut::<AttributeValue>() {
                Some(slot) => {
                    if !slot.attribute_type().same_shape(&attribute.attribute_type()) {
                        return Err(mismatch(slot.kind(), attribute.kind()));
                    }
                    Ok(Leaf::Attribute(std::mem::replace(slot, attribute)))
                }
                None => Err(mismatch(found, attribute.kind())),
            },
        }
    }

    /// Expands a pattern into the exact paths present in `machine`.
    ///
    /// Steps that do not resolve are skipped, so a pattern over an optional
    /// attribute expands to nothing where the attribute is absent.
    pub fn expand(&self, machine: &Machine) -> Vec<AttributePath> {
        let mut out = Vec::new();
        expand_into(machine, &self.steps, AttributePath::root(), &mut out);
        out
    }
}

fn expand_into(
    node: &dyn Navigate,
    steps: &[Step],
    prefix: AttributePath,
    out: &mut Vec<AttributePath>,
) {
    match steps.split_first() {
        None => out.push(prefix),
        Some((Step::Each, rest)) => {
            for index in 0..node.len().unwrap_or(0) {
                let Some(child) = node.child(&Step::Index(index)) else {
                    continue;
                };
                // Groups are addressed by name so paths survive reordering.
                let step = match child.as_any().downcast_ref::<AttributeGroup>() {
                    Some(group) => Step::Named(group.name.clone()),
                    None => Step::Index(index),
                };
                expand_into(child, rest, prefix.child(step), out);
            }
        }
        Some((step, rest)) => {
            if let Some(child) = node.child(step) {
                expand_into(child, rest, prefix.child(step.clone()), out);
            }
        }
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("machine")?;
        for step in &self.steps {
            match step {
                Step::States => f.write_str(".states")?,
                Step::Transitions => f.write_str(".transitions")?,
                Step::Dependencies => f.write_str(".dependencies")?,
                Step::Attributes => f.write_str(".attributes")?,
                Step::InitialState => f.write_str(".initial_state")?,
                Step::SuspendState => f.write_str(".suspend_state")?,
                Step::Name => f.write_str(".name")?,
                Step::Actions => f.write_str(".actions")?,
                Step::Implementation => f.write_str(".implementation")?,
                Step::Condition => f.write_str(".condition")?,
                Step::Source => f.write_str(".source")?,
                Step::Target => f.write_str(".target")?,
                Step::Location => f.write_str(".location")?,
                Step::Index(i) => write!(f, "[{}]", i)?,
                Step::Each => f.write_str("[*]")?,
                Step::Named(name) | Step::Key(name) => write!(f, "[\"{}\"]", escape(name))?,
            }
        }
        Ok(())
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

impl From<AttributePath> for String {
    fn from(path: AttributePath) -> Self {
        path.to_string()
    }
}

impl TryFrom<String> for AttributePath {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl FromStr for AttributePath {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PathParser::new(s).parse()
    }
}

/// What the parser is currently positioned on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Machine,
    StateList,
    ActionList,
    TransitionList,
    DependencyList,
    GroupList,
    State,
    Action,
    Transition,
    Dependency,
    Group,
    Value,
    Leaf,
}

struct PathParser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> PathParser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input: input.trim(),
            pos: 0,
        }
    }

    fn error(&self, reason: impl Into<String>) -> CoreError {
        CoreError::InvalidPath {
            input: self.input.to_string(),
            reason: reason.into(),
        }
    }

    fn parse(mut self) -> Result<AttributePath, CoreError> {
        if self.peek_str("machine") {
            self.pos += "machine".len();
        }
        let mut steps = Vec::new();
        let mut position = Position::Machine;

        while let Some(c) = self.peek_char() {
            let step = match c {
                '.' => {
                    self.pos += 1;
                    let ident = self.parse_ident()?;
                    field_step(position, &ident)
                        .ok_or_else(|| self.error(format!("unexpected field '{}'", ident)))?
                }
                '[' => {
                    self.pos += 1;
                    let step = self.parse_subscript(position)?;
                    if self.peek_char() != Some(']') {
                        return Err(self.error("expected ']'"));
                    }
                    self.pos += 1;
                    step
                }
                other => return Err(self.error(format!("unexpected character '{}'", other))),
            };
            position = next_position(position, &step).ok_or_else(|| {
                self.error(format!("step {:?} not valid at {:?}", step, position))
            })?;
            steps.push(step);
        }

        Ok(AttributePath { steps })
    }

    fn parse_subscript(&mut self, position: Position) -> Result<Step, CoreError> {
        match self.peek_char() {
            Some('*') => {
                self.pos += 1;
                Ok(Step::Each)
            }
            Some('"') => {
                let name = self.parse_string()?;
                Ok(if position == Position::GroupList {
                    Step::Named(name)
                } else {
                    Step::Key(name)
                })
            }
            Some(c) if c.is_ascii_digit() => {
                let start = self.pos;
                while matches!(self.peek_char(), Some(c) if c.is_ascii_digit()) {
                    self.pos += 1;
                }
                let digits = &self.input[start..self.pos];
                digits
                    .parse()
                    .map(Step::Index)
                    .map_err(|_| self.error(format!("invalid index '{}'", digits)))
            }
            _ => Err(self.error("expected index, '*' or quoted name")),
        }
    }

    fn parse_ident(&mut self) -> Result<String, CoreError> {
        let start = self.pos;
        while matches!(self.peek_char(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.error("expected field name"));
        }
        Ok(self.input[start..self.pos].to_string())
    }

    fn parse_string(&mut self) -> Result<String, CoreError> {
        self.pos += 1;
        let mut out = String::new();
        while let Some(c) = self.peek_char() {
            self.pos += c.len_utf8();
            match c {
                '"' => return Ok(out),
                '\\' => {
                    let escaped = self
                        .peek_char()
                        .ok_or_else(|| self.error("unterminated escape"))?;
                    self.pos += escaped.len_utf8();
                    out.push(escaped);
                }
                c => out.push(c),
            }
        }
        Err(self.error("unterminated string"))
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_str(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }
}

fn field_step(position: Position, ident: &str) -> Option<Step> {
    use Position::*;
    let step = match (position, ident) {
        (Machine, "states") => Step::States,
        (Machine | State, "transitions") => Step::Transitions,
        (Machine, "dependencies") => Step::Dependencies,
        (Machine | State | Transition, "attributes") => Step::Attributes,
        (Machine, "initial_state") => Step::InitialState,
        (Machine, "suspend_state") => Step::SuspendState,
        (State | Action, "name") => Step::Name,
        (State, "actions") => Step::Actions,
        (Action, "implementation") => Step::Implementation,
        (Transition, "condition") => Step::Condition,
        (Transition, "source") => Step::Source,
        (Transition, "target") => Step::Target,
        (Dependency, "location") => Step::Location,
        _ => return None,
    };
    Some(step)
}

fn next_position(position: Position, step: &Step) -> Option<Position> {
    use Position::*;
    let next = match (position, step) {
        (Machine, Step::States) => StateList,
        (Machine | State, Step::Transitions) => TransitionList,
        (Machine, Step::Dependencies) => DependencyList,
        (Machine | State | Transition, Step::Attributes) => GroupList,
        (State, Step::Actions) => ActionList,
        (StateList, Step::Index(_) | Step::Each) => State,
        (ActionList, Step::Index(_) | Step::Each) => Action,
        (TransitionList, Step::Index(_) | Step::Each) => Transition,
        (DependencyList, Step::Index(_) | Step::Each) => Dependency,
        (GroupList, Step::Index(_) | Step::Each | Step::Named(_)) => Group,
        (Group, Step::Key(_)) => Value,
        (Value, Step::Index(_) | Step::Each | Step::Key(_)) => Value,
        (_, Step::Name | Step::Implementation | Step::Condition | Step::Source | Step::Target)
        | (_, Step::Location | Step::InitialState | Step::SuspendState) => Leaf,
        _ => return None,
    };
    Some(next)
}

/// A value that can be written through a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Leaf {
    Text(String),
    OptionalText(Option<String>),
    Attribute(AttributeValue),
}

impl Leaf {
    /// Copies the writable value held by `node`, if it is a leaf.
    pub fn from_node(node: &dyn Navigate) -> Option<Leaf> {
        let any = node.as_any();
        if let Some(s) = any.downcast_ref::<String>() {
            return Some(Leaf::Text(s.clone()));
        }
        if let Some(s) = any.downcast_ref::<Option<String>>() {
            return Some(Leaf::OptionalText(s.clone()));
        }
        any.downcast_ref::<AttributeValue>()
            .map(|v| Leaf::Attribute(v.clone()))
    }

    /// Single-line text of the leaf, used for rename detection.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Leaf::Text(s) => Some(s.clone()),
            Leaf::OptionalText(s) => s.clone(),
            Leaf::Attribute(v) => v.as_text(),
        }
    }
}

/// Describes the shape of a node for error messages.
pub fn kind_of(node: &dyn Navigate) -> &'static str {
    let any = node.as_any();
    if any.is::<String>() {
        "text"
    } else if any.is::<Option<String>>() {
        "optional text"
    } else if let Some(v) = any.downcast_ref::<AttributeValue>() {
        v.kind()
    } else if any.is::<AttributeGroup>() {
        "attribute group"
    } else if any.is::<State>() {
        "state"
    } else if any.is::<Transition>() {
        "transition"
    } else if node.len().is_some() {
        "list"
    } else {
        "node"
    }
}

/// A node of the machine tree that paths can step through.
pub trait Navigate: Any {
    fn child(&self, _step: &Step) -> Option<&dyn Navigate> {
        None
    }

    fn child_mut(&mut self, _step: &Step) -> Option<&mut dyn Navigate> {
        None
    }

    /// Number of children addressable by [`Step::Index`].
    fn len(&self) -> Option<usize> {
        None
    }

    /// Name used by [`Step::Named`] lookups.
    fn key(&self) -> Option<&str> {
        None
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

macro_rules! any_methods {
    () => {
        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    };
}

impl Navigate for String {
    any_methods!();
}

impl Navigate for Option<String> {
    any_methods!();
}

impl<T: Navigate> Navigate for Vec<T> {
    fn child(&self, step: &Step) -> Option<&dyn Navigate> {
        match step {
            Step::Index(i) => self.get(*i).map(|e| e as &dyn Navigate),
            Step::Named(name) => self
                .iter()
                .find(|e| e.key() == Some(name.as_str()))
                .map(|e| e as &dyn Navigate),
            _ => None,
        }
    }

    fn child_mut(&mut self, step: &Step) -> Option<&mut dyn Navigate> {
        match step {
            Step::Index(i) => self.get_mut(*i).map(|e| e as &mut dyn Navigate),
            Step::Named(name) => self
                .iter_mut()
                .find(|e| e.key() == Some(name.as_str()))
                .map(|e| e as &mut dyn Navigate),
            _ => None,
        }
    }

    fn len(&self) -> Option<usize> {
        Some(Vec::len(self))
    }

    any_methods!();
}

// Shared nodes are transparent: they downcast to the inner type and are
// copied on first mutable access.
impl<T: Navigate + Clone> Navigate for Arc<T> {
    fn child(&self, step: &Step) -> Option<&dyn Navigate> {
        (**self).child(step)
    }

    fn child_mut(&mut self, step: &Step) -> Option<&mut dyn Navigate> {
        Arc::make_mut(self).child_mut(step)
    }

    fn len(&self) -> Option<usize> {
        (**self).len()
    }

    fn key(&self) -> Option<&str> {
        (**self).key()
    }

    fn as_any(&self) -> &dyn Any {
        (**self).as_any()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        Arc::make_mut(self).as_any_mut()
    }
}

impl Navigate for Machine {
    fn child(&self, step: &Step) -> Option<&dyn Navigate> {
        let node: &dyn Navigate = match step {
            Step::States => &self.states,
            Step::Transitions => &self.transitions,
            Step::Dependencies => &self.dependencies,
            Step::Attributes => &self.attributes,
            Step::InitialState => &self.initial_state,
            Step::SuspendState => &self.suspend_state,
            _ => return None,
        };
        Some(node)
    }

    fn child_mut(&mut self, step: &Step) -> Option<&mut dyn Navigate> {
        let node: &mut dyn Navigate = match step {
            Step::States => &mut self.states,
            Step::Transitions => &mut self.transitions,
            Step::Dependencies => &mut self.dependencies,
            Step::Attributes => &mut self.attributes,
            Step::InitialState => &mut self.initial_state,
            Step::SuspendState => &mut self.suspend_state,
            _ => return None,
        };
        Some(node)
    }

    any_methods!();
}

impl Navigate for State {
    fn child(&self, step: &Step) -> Option<&dyn Navigate> {
        let node: &dyn Navigate = match step {
            Step::Name => &self.name,
            Step::Actions => &self.actions,
            Step::Transitions => &self.transitions,
            Step::Attributes => &self.attributes,
            _ => return None,
        };
        Some(node)
    }

    fn child_mut(&mut self, step: &Step) -> Option<&mut dyn Navigate> {
        let node: &mut dyn Navigate = match step {
            Step::Name => &mut self.name,
            Step::Actions => &mut self.actions,
            Step::Transitions => &mut self.transitions,
            Step::Attributes => &mut self.attributes,
            _ => return None,
        };
        Some(node)
    }

    fn key(&self) -> Option<&str> {
        Some(&self.name)
    }

    any_methods!();
}

impl Navigate for Action {
    fn child(&self, step: &Step) -> Option<&dyn Navigate> {
        let node: &dyn Navigate = match step {
            Step::Name => &self.name,
            Step::Implementation => &self.implementation,
            _ => return None,
        };
        Some(node)
    }

    fn child_mut(&mut self, step: &Step) -> Option<&mut dyn Navigate> {
        let node: &mut dyn Navigate = match step {
            Step::Name => &mut self.name,
            Step::Implementation => &mut self.implementation,
            _ => return None,
        };
        Some(node)
    }

    fn key(&self) -> Option<&str> {
        Some(&self.name)
    }

    any_methods!();
}

impl Navigate for Transition {
    fn child(&self, step: &Step) -> Option<&dyn Navigate> {
        let node: &dyn Navigate = match step {
            Step::Condition => &self.condition,
            Step::Source => &self.source,
            Step::Target => &self.target,
            Step::Attributes => &self.attributes,
            _ => return None,
        };
        Some(node)
    }

    fn child_mut(&mut self, step: &Step) -> Option<&mut dyn Navigate> {
        let node: &mut dyn Navigate = match step {
            Step::Condition => &mut self.condition,
            Step::Source => &mut self.source,
            Step::Target => &mut self.target,
            Step::Attributes => &mut self.attributes,
            _ => return None,
        };
        Some(node)
    }

    any_methods!();
}

impl Navigate for Dependency {
    fn child(&self, step: &Step) -> Option<&dyn Navigate> {
        match step {
            Step::Location => Some(&self.location),
            _ => None,
        }
    }

    fn child_mut(&mut self, step: &Step) -> Option<&mut dyn Navigate> {
        match step {
            Step::Location => Some(&mut self.location),
            _ => None,
        }
    }

    any_methods!();
}

impl Navigate for AttributeGroup {
    fn child(&self, step: &Step) -> Option<&dyn Navigate> {
        match step {
            Step::Key(key) => self.attributes.get(key).map(|v| v as &dyn Navigate),
            _ => None,
        }
    }

    fn child_mut(&mut self, step: &Step) -> Option<&mut dyn Navigate> {
        match step {
            Step::Key(key) => self.attributes.get_mut(key).map(|v| v as &mut dyn Navigate),
            _ => None,
        }
    }

    fn key(&self) -> Option<&str> {
        Some(&self.name)
    }

    any_methods!();
}

impl Navigate for AttributeValue {
    fn child(&self, step: &Step) -> Option<&dyn Navigate> {
        match (self, step) {
            (AttributeValue::Collection { values, .. }, Step::Index(i)) => {
                values.get(*i).map(|v| v as &dyn Navigate)
            }
            (AttributeValue::Table { rows, .. }, Step::Index(i)) => {
                rows.get(*i).map(|r| r as &dyn Navigate)
            }
            (AttributeValue::Complex { values, .. }, Step::Key(key)) => {
                values.get(key).map(|v| v as &dyn Navigate)
            }
            _ => None,
        }
    }

    fn child_mut(&mut self, step: &Step) -> Option<&mut dyn Navigate> {
        match (self, step) {
            (AttributeValue::Collection { values, .. }, Step::Index(i)) => {
                values.get_mut(*i).map(|v| v as &mut dyn Navigate)
            }
            (AttributeValue::Table { rows, .. }, Step::Index(i)) => {
                rows.get_mut(*i).map(|r| r as &mut dyn Navigate)
            }
            (AttributeValue::Complex { values, .. }, Step::Key(key)) => {
                values.get_mut(key).map(|v| v as &mut dyn Navigate)
            }
            _ => None,
        }
    }

    fn len(&self) -> Option<usize> {
        match self {
            AttributeValue::Collection { values, .. } => Some(values.len()),
            AttributeValue::Table { rows, .. } => Some(rows.len()),
            _ => None,
        }
    }

    any_methods!();
}

// ----------------------------------------------------------------------------
// Typed paths
// ----------------------------------------------------------------------------

mod sealed {
    pub trait Sealed {}
}

/// Whether a typed path is exact or a pattern.
pub trait PathKind: sealed::Sealed {}

/// Addresses exactly one location.
#[derive(Debug)]
pub enum Exact {}

/// May contain `each()` steps.
#[derive(Debug)]
pub enum Wildcard {}

impl sealed::Sealed for Exact {}
impl sealed::Sealed for Wildcard {}
impl PathKind for Exact {}
impl PathKind for Wildcard {}

/// Marker for a list of `T` (states, actions, groups, ...).
#[derive(Debug)]
pub enum List<T> {
    #[doc(hidden)]
    _Never(std::convert::Infallible, PhantomData<T>),
}

/// One table row.
pub type Row = Vec<AttributeValue>;

/// A typed path addressing a `T`.
pub struct Path<T, K: PathKind = Exact> {
    path: AttributePath,
    _marker: PhantomData<fn() -> (T, K)>,
}

/// A typed path that may contain wildcards.
pub type Pattern<T> = Path<T, Wildcard>;

impl<T, K: PathKind> Clone for Path<T, K> {
    fn clone(&self) -> Self {
        Self::wrap(self.path.clone())
    }
}

impl<T, K: PathKind> fmt::Debug for Path<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Path").field(&self.path.to_string()).finish()
    }
}

impl<T, K: PathKind> fmt::Display for Path<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.path.fmt(f)
    }
}

impl<T, K: PathKind> PartialEq for Path<T, K> {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl<T, K: PathKind> Eq for Path<T, K> {}

impl<T, K: PathKind> Path<T, K> {
    fn wrap(path: AttributePath) -> Self {
        Self {
            path,
            _marker: PhantomData,
        }
    }

    fn step<U, K2: PathKind>(&self, step: Step) -> Path<U, K2> {
        Path::wrap(self.path.child(step))
    }

    pub fn untyped(&self) -> &AttributePath {
        &self.path
    }

    pub fn into_untyped(self) -> AttributePath {
        self.path
    }

    /// Views the path as a pattern.
    pub fn pattern(&self) -> Pattern<T> {
        Path::wrap(self.path.clone())
    }
}

impl Path<Machine, Exact> {
    /// The machine root.
    pub fn machine() -> Self {
        Path::wrap(AttributePath::root())
    }
}

impl<K: PathKind> Path<Machine, K> {
    pub fn states(&self) -> Path<List<State>, K> {
        self.step(Step::States)
    }

    pub fn transitions(&self) -> Path<List<Transition>, K> {
        self.step(Step::Transitions)
    }

    pub fn dependencies(&self) -> Path<List<Dependency>, K> {
        self.step(Step::Dependencies)
    }

    pub fn attributes(&self) -> Path<List<AttributeGroup>, K> {
        self.step(Step::Attributes)
    }

    pub fn initial_state(&self) -> Path<String, K> {
        self.step(Step::InitialState)
    }

    pub fn suspend_state(&self) -> Path<Option<String>, K> {
        self.step(Step::SuspendState)
    }
}

impl<T, K: PathKind> Path<List<T>, K> {
    pub fn index(&self, index: usize) -> Path<T, K> {
        self.step(Step::Index(index))
    }

    pub fn each(&self) -> Pattern<T> {
        self.step(Step::Each)
    }

    /// Number of elements in the list.
    pub fn count(&self, machine: &Machine) -> Result<usize, CoreError> {
        self.path.resolve(machine)?.len().ok_or_else(|| CoreError::TypeMismatch {
            path: self.path.clone(),
            expected: "list".to_string(),
            found: "node".to_string(),
        })
    }
}

impl<K: PathKind> Path<List<AttributeGroup>, K> {
    /// The group with the given name.
    pub fn group(&self, name: impl Into<String>) -> Path<AttributeGroup, K> {
        self.step(Step::Named(name.into()))
    }
}

impl<K: PathKind> Path<State, K> {
    pub fn name(&self) -> Path<String, K> {
        self.step(Step::Name)
    }

    pub fn actions(&self) -> Path<List<Action>, K> {
        self.step(Step::Actions)
    }

    pub fn transitions(&self) -> Path<List<Transition>, K> {
        self.step(Step::Transitions)
    }

    pub fn attributes(&self) -> Path<List<AttributeGroup>, K> {
        self.step(Step::Attributes)
    }
}

impl<K: PathKind> Path<Action, K> {
    pub fn name(&self) -> Path<String, K> {
        self.step(Step::Name)
    }

    pub fn implementation(&self) -> Path<String, K> {
        self.step(Step::Implementation)
    }
}

impl<K: PathKind> Path<Transition, K> {
    pub fn condition(&self) -> Path<Option<String>, K> {
        self.step(Step::Condition)
    }

    pub fn source(&self) -> Path<Option<String>, K> {
        self.step(Step::Source)
    }

    pub fn target(&self) -> Path<String, K> {
        self.step(Step::Target)
    }

    pub fn attributes(&self) -> Path<List<AttributeGroup>, K> {
        self.step(Step::Attributes)
    }
}

impl<K: PathKind> Path<Dependency, K> {
    pub fn location(&self) -> Path<String, K> {
        self.step(Step::Location)
    }
}

impl<K: PathKind> Path<AttributeGroup, K> {
    pub fn attribute(&self, key: impl Into<String>) -> Path<AttributeValue, K> {
        self.step(Step::Key(key.into()))
    }
}

impl<K: PathKind> Path<AttributeValue, K> {
    /// Element of a collection.
    pub fn item(&self, index: usize) -> Path<AttributeValue, K> {
        self.step(Step::Index(index))
    }

    pub fn each_item(&self) -> Pattern<AttributeValue> {
        self.step(Step::Each)
    }

    /// Field of a complex value.
    pub fn field(&self, key: impl Into<String>) -> Path<AttributeValue, K> {
        self.step(Step::Key(key.into()))
    }

    /// Row of a table.
    pub fn row(&self, index: usize) -> Path<Row, K> {
        self.step(Step::Index(index))
    }

    pub fn each_row(&self) -> Pattern<Row> {
        self.step(Step::Each)
    }

    /// Cell of a table.
    pub fn cell(&self, row: usize, column: usize) -> Path<AttributeValue, K> {
        self.row(row).cell(column)
    }
}

impl<K: PathKind> Path<Row, K> {
    pub fn cell(&self, column: usize) -> Path<AttributeValue, K> {
        self.step(Step::Index(column))
    }
}

/// Types a typed path may read.
pub trait PathValue: Any {}

impl PathValue for Machine {}
impl PathValue for State {}
impl PathValue for Action {}
impl PathValue for Transition {}
impl PathValue for Dependency {}
impl PathValue for AttributeGroup {}
impl PathValue for AttributeValue {}
impl PathValue for String {}
impl PathValue for Option<String> {}
impl PathValue for Row {}

/// Types a typed path may write.
pub trait Writable: PathValue + Sized {
    fn into_leaf(self) -> Leaf;
}

impl Writable for String {
    fn into_leaf(self) -> Leaf {
        Leaf::Text(self)
    }
}

impl Writable for Option<String> {
    fn into_leaf(self) -> Leaf {
        Leaf::OptionalText(self)
    }
}

impl Writable for AttributeValue {
    fn into_leaf(self) -> Leaf {
        Leaf::Attribute(self)
    }
}

impl<T: PathValue> Path<T, Exact> {
    /// Reads the value at this path.
    pub fn read<'a>(&self, machine: &'a Machine) -> Result<&'a T, CoreError> {
        let node = self.path.resolve(machine)?;
        node.as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| CoreError::TypeMismatch {
                path: self.path.clone(),
                expected: std::any::type_name::<T>().to_string(),
                found: kind_of(node).to_string(),
            })
    }

    pub fn is_ancestor_of<U>(&self, other: &Path<U, Exact>) -> bool {
        self.path.is_ancestor_of(&other.path)
    }

    pub fn is_same_as<U>(&self, other: &Path<U, Exact>) -> bool {
        self.path.is_same_as(&other.path)
    }
}

impl<T: Writable> Path<T, Exact> {
    /// Writes `value`, returning the previous value.
    pub fn write(&self, machine: &mut Machine, value: T) -> Result<Leaf, CoreError> {
        self.path.write(machine, value.into_leaf())
    }
}

impl<T> Path<T, Wildcard> {
    /// Expands the pattern against `machine`.
    pub fn expand(&self, machine: &Machine) -> Vec<Path<T, Exact>> {
        self.path.expand(machine).into_iter().map(Path::wrap).collect()
    }
}

/// A requested write: a path and the value to store there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub path: AttributePath,
    pub value: Leaf,
}

impl Edit {
    pub fn new<T: Writable>(path: &Path<T, Exact>, value: T) -> Self {
        Self {
            path: path.untyped().clone(),
            value: value.into_leaf(),
        }
    }

    pub fn untyped(path: AttributePath, value: Leaf) -> Self {
        Self { path, value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AttributeType, Field, Language};
    use crate::dialect::Dialect;

    fn sample() -> Machine {
        let mut machine = Machine::new(Dialect::Swiftfsm, "Sample.machine");
        let mut initial = State::new("Initial");
        initial.transitions.push(Transition::new("Next"));
        machine.states.push(Arc::new(initial));
        machine.states.push(Arc::new(State::new("Next")));
        machine.initial_state = "Initial".to_string();
        let columns = vec![
            Field::new("label", AttributeType::Line),
            Field::new("type", AttributeType::expression(Language::Swift)),
        ];
        let table = AttributeValue::table(
            columns.clone(),
            vec![
                vec![AttributeValue::line("x"), AttributeValue::expression("Int", Language::Swift)],
                vec![AttributeValue::line("y"), AttributeValue::expression("Bool", Language::Swift)],
            ],
        );
        machine.attributes.push(
            AttributeGroup::new("variables").with(Field::new("vars", AttributeType::table(columns)), table),
        );
        machine
    }

    #[test]
    fn test_display_and_parse() {
        let path = Path::machine().states().index(2).attributes().group("settings").attribute("suspend_state");
        let text = path.to_string();
        assert_eq!(text, r#"machine.states[2].attributes["settings"]["suspend_state"]"#);
        let parsed: AttributePath = text.parse().unwrap();
        assert_eq!(&parsed, path.untyped());
    }

    #[test]
    fn test_parse_context_sensitive_names() {
        // A group attribute literally called "name" is a key, not the Name step.
        let parsed: AttributePath = r#"states[0].attributes["x"]["name"]"#.parse().unwrap();
        assert_eq!(parsed.last(), Some(&Step::Key("name".to_string())));

        let parsed: AttributePath = "machine.transitions[1].target".parse().unwrap();
        assert_eq!(parsed.steps(), &[Step::Transitions, Step::Index(1), Step::Target]);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("machine.states.name".parse::<AttributePath>().is_err());
        assert!("machine.bogus".parse::<AttributePath>().is_err());
        assert!("machine.states[".parse::<AttributePath>().is_err());
        assert!(r#"machine.attributes["unterminated]"#.parse::<AttributePath>().is_err());
        assert!("machine.initial_state.name".parse::<AttributePath>().is_err());
    }

    #[test]
    fn test_escaped_key_round_trip() {
        let path = Path::machine().attributes().group("we\"ird\\group");
        let parsed: AttributePath = path.to_string().parse().unwrap();
        assert_eq!(&parsed, path.untyped());
    }

    #[test]
    fn test_read_typed() {
        let machine = sample();
        let name = Path::machine().states().index(1).name().read(&machine).unwrap();
        assert_eq!(name, "Next");

        let cell = Path::machine()
            .attributes()
            .group("variables")
            .attribute("vars")
            .cell(1, 0)
            .read(&machine)
            .unwrap();
        assert_eq!(cell, &AttributeValue::line("y"));

        let state = Path::machine().states().index(0).read(&machine).unwrap();
        assert_eq!(state.name, "Initial");
    }

    #[test]
    fn test_read_missing() {
        let machine = sample();
        let err = Path::machine().states().index(5).name().read(&machine).unwrap_err();
        match err {
            CoreError::PathNotFound { path } => assert_eq!(path.to_string(), "machine.states[5]"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_write_returns_previous() {
        let mut machine = sample();
        let path = Path::machine().states().index(0).transitions().index(0).condition();
        let old = path.write(&mut machine, Some("true".to_string())).unwrap();
        assert_eq!(old, Leaf::OptionalText(None));
        assert_eq!(machine.states[0].transitions[0].condition.as_deref(), Some("true"));
    }

    #[test]
    fn test_write_type_mismatch() {
        let mut machine = sample();
        let cell = Path::machine().attributes().group("variables").attribute("vars").cell(0, 0);
        let err = cell.write(&mut machine, AttributeValue::Integer(3)).unwrap_err();
        assert!(matches!(err, CoreError::TypeMismatch { .. }));

        let untyped = Path::machine().initial_state().into_untyped();
        let err = untyped
            .write(&mut machine, Leaf::Attribute(AttributeValue::Bool(true)))
            .unwrap_err();
        assert!(matches!(err, CoreError::TypeMismatch { .. }));
        assert_eq!(machine, sample());
    }

    #[test]
    fn test_write_copies_shared_state() {
        let original = sample();
        let mut edited = original.clone();
        Path::machine().states().index(1).name().write(&mut edited, "Later".to_string()).unwrap();
        assert_eq!(original.states[1].name, "Next");
        assert_eq!(edited.states[1].name, "Later");
        assert!(Arc::ptr_eq(&original.states[0], &edited.states[0]));
    }

    #[test]
    fn test_expand_pattern() {
        let machine = sample();
        let names = Path::machine().states().each().name().expand(&machine);
        assert_eq!(names.len(), 2);
        assert_eq!(names[1].to_string(), "machine.states[1].name");

        let cells = Path::machine()
            .attributes()
            .group("variables")
            .attribute("vars")
            .each_row()
            .cell(0)
            .expand(&machine);
        let labels: Vec<_> = cells.iter().map(|p| p.read(&machine).unwrap().as_text().unwrap()).collect();
        assert_eq!(labels, vec!["x", "y"]);

        let missing = Path::machine().attributes().group("nothing").attribute("x").pattern();
        assert!(missing.expand(&machine).is_empty());

        let groups = Path::machine().attributes().each().expand(&machine);
        assert_eq!(groups[0].to_string(), r#"machine.attributes["variables"]"#);
        assert!(Path::machine().attributes().each().untyped().covers(groups[0].untyped()));
    }

    #[test]
    fn test_ancestry() {
        let states = Path::machine().states().into_untyped();
        let name = Path::machine().states().index(0).name().into_untyped();
        assert!(states.is_ancestor_of(&name));
        assert!(!name.is_ancestor_of(&states));
        assert!(!name.is_ancestor_of(&name));
        assert!(name.is_same_as(&name.clone()));
        assert!(name.is_ancestor_or_same(&name));

        let pattern = Path::machine().states().each().name().into_untyped();
        assert!(pattern.covers(&name));
        assert!(pattern.matches(&name));
        assert!(pattern.overlaps(&states));
        assert!(!pattern.covers(&states));
        let initial = Path::machine().initial_state().into_untyped();
        assert!(!pattern.overlaps(&initial));
    }

    #[test]
    fn test_list_count() {
        let machine = sample();
        assert_eq!(Path::machine().states().count(&machine).unwrap(), 2);
        assert_eq!(Path::machine().states().index(0).transitions().count(&machine).unwrap(), 1);
    }

    #[test]
    fn test_serde_as_string() {
        let path = Path::machine().states().index(0).name().into_untyped();
        let json = serde_json::to_value(&path).unwrap();
        assert_eq!(json, serde_json::json!("machine.states[0].name"));
        let back: AttributePath = serde_json::from_value(json).unwrap();
        assert_eq!(back, path);
    }
}
