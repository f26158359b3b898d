//! The VHDL dialect.
//!
//! VHDL machines keep their transitions in one machine-level list, and are
//! clocked: the `driving_clock` setting chooses among the declared clocks.

use super::common::{self, machine_group};
use super::Dialect;
use crate::attribute::{AttributeType, AttributeValue, Field, Language};
use crate::machine::AttributeGroup;
use crate::mutator::DialectMutator;
use crate::path::{AttributePath, Path};
use crate::trigger::{NameSource, Trigger, TriggerSet};
use crate::validation::{Check, Condition, Rule, Validator};

pub(crate) const VHDL_KEYWORDS: &[&str] = &[
    "abs", "access", "after", "alias", "all", "and", "architecture", "array", "assert",
    "attribute", "begin", "block", "body", "buffer", "bus", "case", "component",
    "configuration", "constant", "disconnect", "downto", "else", "elsif", "end", "entity",
    "exit", "file", "for", "function", "generate", "generic", "group", "guarded", "if",
    "impure", "in", "inertial", "inout", "is", "label", "library", "linkage", "literal",
    "loop", "map", "mod", "nand", "new", "next", "nor", "not", "null", "of", "on", "open",
    "or", "others", "out", "package", "port", "postponed", "procedure", "process", "pure",
    "range", "record", "register", "reject", "rem", "report", "return", "rol", "ror",
    "select", "severity", "shared", "signal", "sla", "sll", "sra", "srl", "subtype", "then",
    "to", "transport", "type", "unaffected", "units", "until", "use", "variable", "wait",
    "when", "while", "with", "xnor", "xor",
];

/// Name column of signal and variable tables, after `type`.
const NAME: usize = 1;

/// Name column of the external signals table, after `mode` and `type`.
const EXTERNAL_NAME: usize = 2;

const DEFAULT_CLOCK: &str = "clk";
const DEFAULT_FREQUENCY: i64 = 50_000_000;

const DEFAULT_INCLUDES: &str = "library IEEE;\nuse IEEE.std_logic_1164.All;";

pub struct VhdlMutator {
    validator: Validator,
    triggers: TriggerSet,
    whitelist: Vec<AttributePath>,
}

fn expression() -> AttributeType {
    AttributeType::expression(Language::Vhdl)
}

fn code() -> AttributeType {
    AttributeType::code(Language::Vhdl)
}

fn signals_table() -> AttributeType {
    AttributeType::table(common::columns_of(&[
        ("type", expression()),
        ("name", AttributeType::Line),
        ("value", expression()),
        ("comment", AttributeType::Line),
    ]))
}

fn clock_columns() -> Vec<Field> {
    common::columns_of(&[("name", AttributeType::Line), ("frequency", AttributeType::Integer)])
}

fn parameter_fields() -> Vec<Field> {
    vec![
        Field::new("parameter_signals", signals_table()),
        common::table(
            "returnable_signals",
            &[
                ("type", expression()),
                ("name", AttributeType::Line),
                ("comment", AttributeType::Line),
            ],
        ),
    ]
}

impl VhdlMutator {
    pub fn new() -> Self {
        let dialect = Dialect::Vhdl;
        let reserved = VHDL_KEYWORDS;
        let variables = machine_group("variables");
        let parameters = machine_group("parameters");
        let is_parameterised = parameters.attribute("is_parameterised");
        let clocks = variables.attribute("clocks");
        let externals = variables.attribute("external_signals");
        let state = Path::machine().states().each().attributes().group("variables");

        let mut rules = common::machine_rules(dialect, reserved);
        rules.extend(common::variable_rules(&clocks, 0, reserved));
        rules.push(Rule::at(
            &clocks.each_row().cell(1),
            vec![Check::Between {
                min: 1.0,
                max: 1.0e12,
            }],
        ));
        rules.extend(common::variable_rules(&externals, EXTERNAL_NAME, reserved));
        rules.extend(common::variable_rules(&variables.attribute("machine_signals"), NAME, reserved));
        rules.extend(common::variable_rules(&state.attribute("state_signals"), NAME, reserved));
        rules.push(Rule::when(
            Condition::is_true(&is_parameterised),
            [
                common::variable_rules(&parameters.attribute("parameter_signals"), NAME, reserved),
                common::variable_rules(&parameters.attribute("returnable_signals"), NAME, reserved),
            ]
            .concat(),
        ));

        let mut triggers = common::settings_triggers(dialect);
        triggers.push(Trigger::sync_choices(
            NameSource::column(&clocks, 0),
            &variables.attribute("driving_clock").pattern(),
            false,
        ));
        triggers.push(Trigger::sync_choices(
            NameSource::column(&externals, EXTERNAL_NAME),
            &state.attribute("externals"),
            false,
        ));
        triggers.push(Trigger::availability(&is_parameterised, parameter_fields()));

        Self {
            validator: Validator::new(dialect, rules),
            triggers: TriggerSet::new(triggers),
            whitelist: common::whitelist(dialect),
        }
    }
}

impl Default for VhdlMutator {
    fn default() -> Self {
        Self::new()
    }
}

impl DialectMutator for VhdlMutator {
    fn dialect(&self) -> Dialect {
        Dialect::Vhdl
    }

    fn machine_groups(&self) -> Vec<AttributeGroup> {
        let clocks = AttributeValue::table(
            clock_columns(),
            vec![vec![
                AttributeValue::line(DEFAULT_CLOCK),
                AttributeValue::Integer(DEFAULT_FREQUENCY),
            ]],
        );
        vec![
            AttributeGroup::new("variables")
                .with(Field::new("clocks", AttributeType::table(clock_columns())), clocks)
                .with_field(common::table(
                    "external_signals",
                    &[
                        ("mode", AttributeType::enumerated(["in", "out", "inout", "buffer"])),
                        ("type", expression()),
                        ("name", AttributeType::Line),
                        ("value", expression()),
                        ("comment", AttributeType::Line),
                    ],
                ))
                .with_field(Field::new("machine_signals", signals_table()))
                .with(
                    Field::new("driving_clock", AttributeType::enumerated([DEFAULT_CLOCK])),
                    AttributeValue::enumerated(DEFAULT_CLOCK, [DEFAULT_CLOCK]),
                ),
            AttributeGroup::new("parameters")
                .with_field(Field::new("is_parameterised", AttributeType::Bool)),
            AttributeGroup::new("includes")
                .with(Field::new("includes", code()), AttributeValue::code(DEFAULT_INCLUDES, Language::Vhdl))
                .with_field(Field::new("architecture_head", code()))
                .with_field(Field::new("architecture_body", code())),
            common::settings_group(Dialect::Vhdl),
        ]
    }

    fn state_groups(&self) -> Vec<AttributeGroup> {
        vec![AttributeGroup::new("variables")
            .with_field(Field::new("state_signals", signals_table()))
            .with_field(Field::new(
                "externals",
                AttributeType::EnumerableCollection {
                    valid_values: Default::default(),
                },
            ))]
    }

    fn validator(&self) -> &Validator {
        &self.validator
    }

    fn triggers(&self) -> &TriggerSet {
        &self.triggers
    }

    fn whitelist(&self) -> &[AttributePath] {
        &self.whitelist
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::machine::Machine;
    use crate::mutator::Item;
    use crate::path::Edit;
    use std::collections::BTreeSet;

    fn machine() -> (VhdlMutator, Machine) {
        let mutator = VhdlMutator::new();
        let machine = mutator
            .initial_machine(std::path::Path::new("Blinker.machine"))
            .unwrap();
        (mutator, machine)
    }

    fn clock(name: &str, frequency: i64) -> Item {
        Item::Row(vec![AttributeValue::line(name), AttributeValue::Integer(frequency)])
    }

    fn driving_clock(m: &Machine) -> AttributeValue {
        machine_group("variables")
            .attribute("driving_clock")
            .read(m)
            .unwrap()
            .clone()
    }

    #[test]
    fn test_transitions_are_flat() {
        let (mutator, mut m) = machine();
        assert!(mutator.new_transition(&mut m, "Initial", "Suspended", Some("rising_edge(clk)")).unwrap());
        assert_eq!(m.transitions.len(), 1);
        assert_eq!(m.transitions[0].source.as_deref(), Some("Initial"));
        assert!(m.states.iter().all(|s| s.transitions.is_empty()));

        mutator.delete_state(&mut m, 1).unwrap();
        assert!(m.transitions.is_empty());
    }

    #[test]
    fn test_delete_flat_transition_by_source_position() {
        let (mutator, mut m) = machine();
        mutator.new_transition(&mut m, "Suspended", "Initial", None).unwrap();
        mutator.new_transition(&mut m, "Initial", "Suspended", Some("a")).unwrap();
        mutator.new_transition(&mut m, "Initial", "Initial", Some("b")).unwrap();

        mutator.delete_transition(&mut m, 0, 1).unwrap();
        let conditions: Vec<Option<&str>> = m.transitions.iter().map(|t| t.condition.as_deref()).collect();
        assert_eq!(conditions, vec![None, Some("a")]);

        let err = mutator.delete_transition(&mut m, 0, 1).unwrap_err();
        assert!(matches!(err, CoreError::TransitionNotFound { .. }));
    }

    #[test]
    fn test_driving_clock_follows_clocks() {
        let (mutator, mut m) = machine();
        assert_eq!(driving_clock(&m).choice(), Some(DEFAULT_CLOCK));

        let clocks = machine_group("variables").attribute("clocks");
        mutator.add_item(&mut m, clocks.untyped(), clock("fast", 100_000_000)).unwrap();
        mutator
            .modify(&mut m, Edit::new(&clocks.cell(0, 0), AttributeValue::line("slow")))
            .unwrap();
        assert_eq!(
            driving_clock(&m),
            AttributeValue::enumerated("slow", ["fast", "slow"])
        );

        // Deleting the chosen clock falls back to the first remaining one.
        mutator.delete_item(&mut m, clocks.untyped(), 0).unwrap();
        assert_eq!(driving_clock(&m), AttributeValue::enumerated("fast", ["fast"]));

        // The last clock cannot go: the setting would have no valid choice.
        let err = mutator.delete_item(&mut m, clocks.untyped(), 0).unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[test]
    fn test_clock_frequency_range() {
        let (mutator, mut m) = machine();
        let clocks = machine_group("variables").attribute("clocks");
        let err = mutator.add_item(&mut m, clocks.untyped(), clock("slow", 0)).unwrap_err();
        match err {
            CoreError::Validation { violations } => {
                assert_eq!(violations.len(), 1);
                assert_eq!(violations[0].path, clocks.cell(1, 1).into_untyped());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parameterised_toggle() {
        let (mutator, mut m) = machine();
        let flag = machine_group("parameters").attribute("is_parameterised");
        mutator.modify(&mut m, Edit::new(&flag, AttributeValue::Bool(true))).unwrap();
        let group = m.group("parameters").unwrap();
        assert!(group.attribute("parameter_signals").is_some());
        assert!(group.attribute("returnable_signals").is_some());

        mutator.modify(&mut m, Edit::new(&flag, AttributeValue::Bool(false))).unwrap();
        assert_eq!(m.group("parameters").unwrap().attributes.len(), 1);
    }

    #[test]
    fn test_state_externals_follow_signals() {
        let (mutator, mut m) = machine();
        let signals = machine_group("variables").attribute("external_signals");
        let row = Item::Row(vec![
            AttributeValue::enumerated("in", ["in", "out", "inout", "buffer"]),
            AttributeValue::expression("std_logic", Language::Vhdl),
            AttributeValue::line("button"),
            AttributeValue::expression("'0'", Language::Vhdl),
            AttributeValue::line(""),
        ]);
        mutator.add_item(&mut m, signals.untyped(), row).unwrap();
        let externals = Path::machine()
            .states()
            .index(1)
            .attributes()
            .group("variables")
            .attribute("externals");
        match externals.read(&m).unwrap() {
            AttributeValue::EnumerableCollection { valid_values, .. } => {
                assert_eq!(valid_values, &BTreeSet::from(["button".to_string()]))
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
