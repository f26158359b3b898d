//! Schema, rules and triggers shared by every dialect.

use super::{Dialect, TransitionLayout};
use crate::attribute::{AttributeType, AttributeValue, Field};
use crate::machine::AttributeGroup;
use crate::path::{AttributePath, Path, Step};
use crate::trigger::{MirrorTarget, NameSource, Trigger};
use crate::validation::{Check, Rule};
use std::collections::BTreeSet;

/// Longest identifier any dialect accepts.
pub(crate) const MAX_IDENTIFIER: usize = 64;

pub(crate) fn identifier(reserved: &[&str]) -> Vec<Check> {
    vec![
        Check::NotEmpty,
        Check::MaxLength(MAX_IDENTIFIER),
        Check::AlphaFirst,
        Check::AlphaUnderscore,
        Check::blacklist(reserved.iter().copied()),
    ]
}

pub(crate) fn table(name: &str, columns: &[(&str, AttributeType)]) -> Field {
    Field::new(name, AttributeType::table(columns_of(columns)))
}

pub(crate) fn columns_of(columns: &[(&str, AttributeType)]) -> Vec<Field> {
    columns
        .iter()
        .map(|(name, ty)| Field::new(*name, ty.clone()))
        .collect()
}

pub(crate) fn machine_group(name: &str) -> Path<AttributeGroup> {
    Path::machine().attributes().group(name)
}

/// `settings` group; choices are filled in by the settings triggers.
pub(crate) fn settings_group(dialect: Dialect) -> AttributeGroup {
    let group = AttributeGroup::new("settings").with_field(Field::new(
        "initial_state",
        AttributeType::Enumerated {
            valid_values: BTreeSet::new(),
        },
    ));
    if dialect.supports_suspension() {
        group.with_field(Field::new("suspend_state", AttributeType::enumerated([""])))
    } else {
        group
    }
}

/// Keeps the settings choices equal to the state names and mirrored onto the machine.
pub(crate) fn settings_triggers(dialect: Dialect) -> Vec<Trigger> {
    let settings = machine_group("settings");
    let initial = settings.attribute("initial_state");
    let mut triggers = vec![
        Trigger::sync_choices(NameSource::StateNames, &initial.pattern(), false),
        Trigger::mirror(&initial, MirrorTarget::InitialState),
    ];
    if dialect.supports_suspension() {
        let suspend = settings.attribute("suspend_state");
        triggers.push(Trigger::sync_choices(
            NameSource::StateNames,
            &suspend.pattern(),
            true,
        ));
        triggers.push(Trigger::mirror(&suspend, MirrorTarget::SuspendState));
    }
    triggers
}

/// Rules every dialect applies to states, transitions and attribute groups.
pub(crate) fn machine_rules(dialect: Dialect, reserved: &[&str]) -> Vec<Rule> {
    let m = Path::machine();
    let states = m.states().each();
    let actions = dialect.action_names();
    let mut rules = vec![
        Rule::at(
            &m.states(),
            vec![Check::NotEmpty, Check::unique_by(vec![Step::Name])],
        ),
        Rule::at(&states.name(), identifier(reserved)),
        Rule::at(&m.initial_state(), vec![Check::Exists(NameSource::StateNames)]),
        Rule::at(
            &states.actions(),
            vec![
                Check::Count {
                    min: actions.len(),
                    max: actions.len(),
                },
                Check::unique_by(vec![Step::Name]),
            ],
        ),
        Rule::at(
            &states.actions().each().name(),
            vec![Check::one_of(actions.iter().copied())],
        ),
        Rule::at(&m.attributes().each(), vec![Check::Conforms]),
        Rule::at(&states.attributes().each(), vec![Check::Conforms]),
        Rule::at(&m.dependencies().each().location(), vec![Check::NotEmpty]),
    ];
    if dialect.supports_suspension() {
        rules.push(Rule::at(
            &m.suspend_state(),
            vec![Check::Exists(NameSource::StateNames)],
        ));
    } else {
        // Only "no suspend state" is allowed.
        rules.push(Rule::at(&m.suspend_state(), vec![Check::In(BTreeSet::new())]));
    }
    match dialect.transition_layout() {
        TransitionLayout::StateOwned => {
            let transitions = states.transitions().each();
            rules.push(Rule::at(
                &transitions.target(),
                vec![Check::Exists(NameSource::StateNames)],
            ));
            rules.push(Rule::at(&transitions.attributes().each(), vec![Check::Conforms]));
        }
        TransitionLayout::Flat => {
            let transitions = m.transitions().each();
            rules.push(Rule::at(
                &transitions.source(),
                vec![Check::NotEmpty, Check::Exists(NameSource::StateNames)],
            ));
            rules.push(Rule::at(
                &transitions.target(),
                vec![Check::Exists(NameSource::StateNames)],
            ));
            rules.push(Rule::at(&transitions.attributes().each(), vec![Check::Conforms]));
        }
    }
    rules
}

/// Labels in column `column` of a variables table are unique identifiers.
pub(crate) fn variable_rules(
    table: &Path<AttributeValue, impl crate::path::PathKind>,
    column: usize,
    reserved: &[&str],
) -> Vec<Rule> {
    vec![
        Rule::at(table, vec![Check::unique_by(vec![Step::Index(column)])]),
        Rule::at(&table.each_row().cell(column), identifier(reserved)),
    ]
}

/// Paths `modify` may write directly.
pub(crate) fn whitelist(dialect: Dialect) -> Vec<AttributePath> {
    let m = Path::machine();
    let states = m.states().each();
    let mut paths = vec![
        m.initial_state().into_untyped(),
        m.attributes().each().into_untyped(),
        m.dependencies().each().location().into_untyped(),
        states.attributes().each().into_untyped(),
        states.actions().each().implementation().into_untyped(),
    ];
    if dialect.supports_suspension() {
        paths.push(m.suspend_state().into_untyped());
    }
    match dialect.transition_layout() {
        TransitionLayout::StateOwned => {
            let transitions = states.transitions().each();
            paths.push(transitions.condition().into_untyped());
            paths.push(transitions.target().into_untyped());
            paths.push(transitions.attributes().each().into_untyped());
        }
        TransitionLayout::Flat => {
            let transitions = m.transitions().each();
            paths.push(transitions.condition().into_untyped());
            paths.push(transitions.source().into_untyped());
            paths.push(transitions.target().into_untyped());
            paths.push(transitions.attributes().each().into_untyped());
        }
    }
    paths
}
