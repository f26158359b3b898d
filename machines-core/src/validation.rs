//! Declarative validation.
//!
//! A [`Validator`] is a list of [`Rule`]s. Each rule applies [`Check`]s to
//! every node a path pattern addresses; [`Rule::When`] scopes rules to
//! optional sections of the document. Validation never stops at the first
//! failure: every violation found is reported with its path.

use crate::attribute::AttributeValue;
use crate::dialect::Dialect;
use crate::error::CoreError;
use crate::machine::{AttributeGroup, Machine};
use crate::path::{AttributePath, Navigate, Path, Step};
use crate::trigger::NameSource;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// A failed check at a specific location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub path: AttributePath,
    pub message: String,
}

impl Violation {
    pub fn new(path: AttributePath, message: impl Into<String>) -> Self {
        Self {
            path,
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// A single predicate over the node at a path.
#[derive(Debug, Clone, PartialEq)]
pub enum Check {
    /// Text is non-empty; lists and collections have at least one element.
    NotEmpty,
    /// Text has at most this many characters.
    MaxLength(usize),
    /// Numeric value (or text parsing as one) within `min..=max`.
    Between { min: f64, max: f64 },
    /// Number of elements within `min..=max`.
    Count { min: usize, max: usize },
    /// Text is one of the listed values.
    In(BTreeSet<String>),
    /// Text starts with an ASCII letter. Empty text passes.
    AlphaFirst,
    /// Text contains only ASCII letters, digits and underscores.
    AlphaUnderscore,
    /// Text is not one of the listed (reserved) words.
    Blacklist(BTreeSet<String>),
    /// Projection of each element, by relative path, is unique within the list.
    Unique(AttributePath),
    /// Text names a member of the source. `None` optional text passes.
    Exists(NameSource),
    /// An attribute group matches its declared fields and every enumerated
    /// value holds a valid choice.
    Conforms,
}

impl Check {
    pub fn one_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Check::In(values.into_iter().map(Into::into).collect())
    }

    pub fn blacklist<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Check::Blacklist(words.into_iter().map(Into::into).collect())
    }

    /// Uniqueness of each element's `steps` projection.
    pub fn unique_by(steps: Vec<Step>) -> Self {
        Check::Unique(AttributePath::from_steps(steps))
    }

    fn evaluate(
        &self,
        machine: &Machine,
        path: &AttributePath,
        node: &dyn Navigate,
        out: &mut Vec<Violation>,
    ) {
        let mut fail = |message: String| out.push(Violation::new(path.clone(), message));
        match self {
            Check::NotEmpty => {
                let empty = match subject_text(node) {
                    Subject::Text(text) => text.is_empty(),
                    Subject::Absent => true,
                    Subject::Other => element_count(node) == Some(0),
                };
                if empty {
                    fail("must not be empty".to_string());
                }
            }
            Check::MaxLength(max) => {
                if let Subject::Text(text) = subject_text(node) {
                    if text.chars().count() > *max {
                        fail(format!("must be at most {max} characters"));
                    }
                }
            }
            Check::Between { min, max } => {
                let number = node
                    .as_any()
                    .downcast_ref::<AttributeValue>()
                    .and_then(AttributeValue::as_number)
                    .or_else(|| match subject_text(node) {
                        Subject::Text(text) => text.trim().parse::<f64>().ok(),
                        _ => None,
                    });
                match number {
                    Some(n) if n >= *min && n <= *max => {}
                    _ => fail(format!("must be a number between {min} and {max}")),
                }
            }
            Check::Count { min, max } => {
                if let Some(count) = element_count(node) {
                    if count < *min || count > *max {
                        fail(format!("must have between {min} and {max} elements"));
                    }
                }
            }
            Check::In(allowed) => {
                if let Subject::Text(text) = subject_text(node) {
                    if !allowed.contains(&text) {
                        fail(format!("'{text}' is not an allowed value"));
                    }
                }
            }
            Check::AlphaFirst => {
                if let Subject::Text(text) = subject_text(node) {
                    if text.chars().next().is_some_and(|c| !c.is_ascii_alphabetic()) {
                        fail("must start with a letter".to_string());
                    }
                }
            }
            Check::AlphaUnderscore => {
                if let Subject::Text(text) = subject_text(node) {
                    if !text.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                        fail("must contain only letters, digits and underscores".to_string());
                    }
                }
            }
            Check::Blacklist(words) => {
                if let Subject::Text(text) = subject_text(node) {
                    if words.contains(&text) {
                        fail(format!("'{text}' is a reserved word"));
                    }
                }
            }
            Check::Unique(projection) => {
                let mut seen: HashMap<String, usize> = HashMap::new();
                for index in 0..element_count(node).unwrap_or(0) {
                    let element_path = path.child(Step::Index(index));
                    let Some(element) = node.child(&Step::Index(index)) else {
                        continue;
                    };
                    let Some(Subject::Text(key)) =
                        projection.resolve_from(element).map(subject_text)
                    else {
                        continue;
                    };
                    if let Some(first) = seen.get(&key) {
                        out.push(Violation::new(
                            element_path.join(projection),
                            format!("'{key}' duplicates element {first}"),
                        ));
                    } else {
                        seen.insert(key, index);
                    }
                }
            }
            Check::Exists(source) => {
                if let Subject::Text(text) = subject_text(node) {
                    if !source.names(machine).contains(&text) {
                        fail(format!("'{text}' does not exist"));
                    }
                }
            }
            Check::Conforms => {
                if let Some(group) = node.as_any().downcast_ref::<AttributeGroup>() {
                    conforms(group, path, out);
                }
            }
        }
    }
}

enum Subject {
    Text(String),
    /// Optional text that is `None`.
    Absent,
    Other,
}

fn subject_text(node: &dyn Navigate) -> Subject {
    let any = node.as_any();
    if let Some(text) = any.downcast_ref::<String>() {
        return Subject::Text(text.clone());
    }
    if let Some(text) = any.downcast_ref::<Option<String>>() {
        return text.clone().map_or(Subject::Absent, Subject::Text);
    }
    any.downcast_ref::<AttributeValue>()
        .and_then(AttributeValue::as_text)
        .map_or(Subject::Other, Subject::Text)
}

fn element_count(node: &dyn Navigate) -> Option<usize> {
    node.as_any()
        .downcast_ref::<AttributeValue>()
        .and_then(AttributeValue::len)
        .or_else(|| node.len())
}

fn conforms(group: &AttributeGroup, path: &AttributePath, out: &mut Vec<Violation>) {
    for field in &group.fields {
        let at = path.child(Step::Key(field.name.clone()));
        match group.attribute(&field.name) {
            None => out.push(Violation::new(at, "missing attribute")),
            Some(value) if !value.conforms_to(&field.ty) => out.push(Violation::new(
                at,
                format!("expected {}, found {}", field.ty.kind(), value.kind()),
            )),
            Some(value) if !value.has_valid_choices() => {
                out.push(Violation::new(at, "not a valid choice"))
            }
            Some(value) if !value.is_finite() => {
                out.push(Violation::new(at, "must be a finite number"))
            }
            Some(_) => {}
        }
    }
    for key in group.attributes.keys() {
        if group.field(key).is_none() {
            out.push(Violation::new(
                path.child(Step::Key(key.clone())),
                "attribute has no declared field",
            ));
        }
    }
}

/// A predicate deciding whether a scoped block of rules applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// A boolean attribute is present and true.
    IsTrue(AttributePath),
    /// The machine has a suspend state.
    Suspensible,
    Not(Box<Condition>),
}

impl Condition {
    pub fn is_true(flag: &Path<AttributeValue>) -> Self {
        Condition::IsTrue(flag.untyped().clone())
    }

    fn holds(&self, machine: &Machine) -> bool {
        match self {
            Condition::IsTrue(path) => path
                .resolve(machine)
                .ok()
                .and_then(|node| node.as_any().downcast_ref::<AttributeValue>())
                .and_then(AttributeValue::as_bool)
                .unwrap_or(false),
            Condition::Suspensible => machine.suspend_state.is_some(),
            Condition::Not(inner) => !inner.holds(machine),
        }
    }
}

/// One validation rule.
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    /// Applies `checks` to every node `at` addresses (a path or pattern).
    At { at: AttributePath, checks: Vec<Check> },
    When {
        condition: Condition,
        rules: Vec<Rule>,
    },
}

impl Rule {
    pub fn at<T, K: crate::path::PathKind>(path: &Path<T, K>, checks: Vec<Check>) -> Self {
        Rule::At {
            at: path.untyped().clone(),
            checks,
        }
    }

    pub fn when(condition: Condition, rules: Vec<Rule>) -> Self {
        Rule::When { condition, rules }
    }

    fn evaluate(&self, machine: &Machine, out: &mut Vec<Violation>) {
        match self {
            Rule::At { at, checks } => {
                for path in at.expand(machine) {
                    let Ok(node) = path.resolve(machine) else {
                        continue;
                    };
                    for check in checks {
                        check.evaluate(machine, &path, node, out);
                    }
                }
            }
            Rule::When { condition, rules } => {
                if condition.holds(machine) {
                    for rule in rules {
                        rule.evaluate(machine, out);
                    }
                }
            }
        }
    }
}

/// The full rule set of one dialect.
#[derive(Debug, Clone, PartialEq)]
pub struct Validator {
    dialect: Dialect,
    rules: Vec<Rule>,
}

impl Validator {
    pub fn new(dialect: Dialect, rules: Vec<Rule>) -> Self {
        Self { dialect, rules }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Every violation in `machine`, in rule order.
    pub fn violations(&self, machine: &Machine) -> Vec<Violation> {
        if machine.dialect != self.dialect {
            return vec![Violation::new(
                AttributePath::root(),
                format!(
                    "machine is a {} machine, expected {}",
                    machine.dialect, self.dialect
                ),
            )];
        }
        let mut out = Vec::new();
        for rule in &self.rules {
            rule.evaluate(machine, &mut out);
        }
        out
    }

    pub fn validate(&self, machine: &Machine) -> Result<(), CoreError> {
        if machine.dialect != self.dialect {
            return Err(CoreError::DialectMismatch {
                expected: self.dialect,
                found: machine.dialect,
            });
        }
        let violations = self.violations(machine);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Validation { violations })
        }
    }
}
