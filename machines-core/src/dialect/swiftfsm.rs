//! The swiftfsm dialect.

use super::common::{self, machine_group};
use super::Dialect;
use crate::attribute::{AttributeType, Field, Language};
use crate::machine::AttributeGroup;
use crate::mutator::DialectMutator;
use crate::path::{AttributePath, Path};
use crate::trigger::{NameSource, Trigger, TriggerSet};
use crate::validation::{Condition, Rule, Validator};

pub(crate) const SWIFT_KEYWORDS: &[&str] = &[
    "Any", "Self", "as", "associatedtype", "break", "case", "catch", "class", "continue",
    "default", "defer", "deinit", "do", "else", "enum", "extension", "fallthrough", "false",
    "fileprivate", "for", "func", "guard", "if", "import", "in", "init", "inout", "internal",
    "is", "let", "nil", "open", "operator", "private", "protocol", "public", "repeat",
    "rethrows", "return", "self", "static", "struct", "subscript", "super", "switch",
    "throw", "throws", "true", "try", "typealias", "var", "where", "while",
];

/// Label column of variables tables.
const LABEL: usize = 0;

/// Label column of the external variables table, after `access`.
const EXTERNAL_LABEL: usize = 1;

pub struct SwiftfsmMutator {
    validator: Validator,
    triggers: TriggerSet,
    whitelist: Vec<AttributePath>,
}

fn expression() -> AttributeType {
    AttributeType::expression(Language::Swift)
}

fn variables_table() -> AttributeType {
    AttributeType::table(common::columns_of(&[
        ("label", AttributeType::Line),
        ("type", expression()),
        ("value", expression()),
        ("comment", AttributeType::Line),
    ]))
}

fn external_variables_table() -> AttributeType {
    AttributeType::table(common::columns_of(&[
        ("access", AttributeType::enumerated(["sensor", "actuator", "external"])),
        ("label", AttributeType::Line),
        ("type", expression()),
        ("value", expression()),
        ("comment", AttributeType::Line),
    ]))
}

/// Fields present only while a custom ringlet is in use.
fn ringlet_fields() -> Vec<Field> {
    vec![
        Field::new("actions", AttributeType::collection(AttributeType::Line)),
        Field::new("imports", AttributeType::Text),
        Field::new("vars", variables_table()),
        Field::new("execute", AttributeType::code(Language::Swift)),
    ]
}

impl SwiftfsmMutator {
    pub fn new() -> Self {
        let dialect = Dialect::Swiftfsm;
        let reserved = SWIFT_KEYWORDS;
        let variables = machine_group("variables");
        let ringlet = machine_group("ringlet");
        let use_custom_ringlet = ringlet.attribute("use_custom_ringlet");
        let externals = variables.attribute("external_variables");
        let state = Path::machine().states().each().attributes();

        let mut rules = common::machine_rules(dialect, reserved);
        rules.extend(common::variable_rules(&externals, EXTERNAL_LABEL, reserved));
        rules.extend(common::variable_rules(&variables.attribute("machine_variables"), LABEL, reserved));
        rules.extend(common::variable_rules(&variables.attribute("parameters"), LABEL, reserved));
        rules.extend(common::variable_rules(
            &state.group("variables").attribute("state_variables"),
            LABEL,
            reserved,
        ));
        rules.push(Rule::when(
            Condition::is_true(&use_custom_ringlet),
            common::variable_rules(&ringlet.attribute("vars"), LABEL, reserved),
        ));

        let mut triggers = common::settings_triggers(dialect);
        triggers.push(Trigger::sync_choices(
            NameSource::column(&externals, EXTERNAL_LABEL),
            &state.group("settings").attribute("external_variables"),
            false,
        ));
        triggers.push(Trigger::availability(&use_custom_ringlet, ringlet_fields()));

        Self {
            validator: Validator::new(dialect, rules),
            triggers: TriggerSet::new(triggers),
            whitelist: common::whitelist(dialect),
        }
    }
}

impl Default for SwiftfsmMutator {
    fn default() -> Self {
        Self::new()
    }
}

impl DialectMutator for SwiftfsmMutator {
    fn dialect(&self) -> Dialect {
        Dialect::Swiftfsm
    }

    fn machine_groups(&self) -> Vec<AttributeGroup> {
        vec![
            AttributeGroup::new("variables")
                .with_field(Field::new("external_variables", external_variables_table()))
                .with_field(Field::new("machine_variables", variables_table()))
                .with_field(Field::new("parameters", variables_table()))
                .with_field(Field::new("result_type", expression())),
            AttributeGroup::new("ringlet")
                .with_field(Field::new("use_custom_ringlet", AttributeType::Bool)),
            common::settings_group(Dialect::Swiftfsm),
        ]
    }

    fn state_groups(&self) -> Vec<AttributeGroup> {
        vec![
            AttributeGroup::new("variables")
                .with_field(Field::new("state_variables", variables_table())),
            AttributeGroup::new("settings").with_field(Field::new(
                "external_variables",
                AttributeType::EnumerableCollection {
                    valid_values: Default::default(),
                },
            )),
        ]
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
    use crate::attribute::AttributeValue;
    use crate::machine::Machine;
    use crate::mutator::Item;
    use crate::path::Edit;
    use std::collections::BTreeSet;

    fn machine() -> (SwiftfsmMutator, Machine) {
        let mutator = SwiftfsmMutator::new();
        let machine = mutator
            .initial_machine(std::path::Path::new("Ping.machine"))
            .unwrap();
        (mutator, machine)
    }

    fn external(label: &str) -> Item {
        Item::Row(vec![
            AttributeValue::enumerated("sensor", ["sensor", "actuator", "external"]),
            AttributeValue::line(label),
            AttributeValue::expression("Bool", Language::Swift),
            AttributeValue::expression("false", Language::Swift),
            AttributeValue::line(""),
        ])
    }

    fn chosen(m: &Machine, state: usize) -> AttributeValue {
        Path::machine()
            .states()
            .index(state)
            .attributes()
            .group("settings")
            .attribute("external_variables")
            .read(m)
            .unwrap()
            .clone()
    }

    #[test]
    fn test_state_external_choices_follow_table() {
        let (mutator, mut m) = machine();
        let externals = machine_group("variables").attribute("external_variables");
        mutator.add_item(&mut m, externals.untyped(), external("button")).unwrap();
        mutator.add_item(&mut m, externals.untyped(), external("led")).unwrap();

        let choice = Path::machine()
            .states()
            .index(0)
            .attributes()
            .group("settings")
            .attribute("external_variables");
        mutator
            .modify(
                &mut m,
                Edit::new(&choice, AttributeValue::enumerable_collection(["button"], ["button", "led"])),
            )
            .unwrap();

        // Renaming the label carries the state's choice along.
        mutator
            .modify(&mut m, Edit::new(&externals.cell(0, EXTERNAL_LABEL), AttributeValue::line("bell")))
            .unwrap();
        assert_eq!(
            chosen(&m, 0),
            AttributeValue::enumerable_collection(["bell"], ["bell", "led"])
        );

        // Deleting the row drops the choice everywhere.
        mutator.delete_item(&mut m, externals.untyped(), 0).unwrap();
        let nothing = AttributeValue::EnumerableCollection {
            values: BTreeSet::new(),
            valid_values: BTreeSet::from(["led".to_string()]),
        };
        assert_eq!(chosen(&m, 0), nothing);
        assert_eq!(chosen(&m, 1), nothing);
    }

    #[test]
    fn test_new_state_sees_current_choices() {
        let (mutator, mut m) = machine();
        let externals = machine_group("variables").attribute("external_variables");
        mutator.add_item(&mut m, externals.untyped(), external("button")).unwrap();
        mutator.new_state(&mut m).unwrap();
        let valid = BTreeSet::from(["button".to_string()]);
        match chosen(&m, 2) {
            AttributeValue::EnumerableCollection { valid_values, .. } => assert_eq!(valid_values, valid),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_custom_ringlet_toggle() {
        let (mutator, mut m) = machine();
        let flag = machine_group("ringlet").attribute("use_custom_ringlet");
        mutator.modify(&mut m, Edit::new(&flag, AttributeValue::Bool(true))).unwrap();
        let ringlet = m.group("ringlet").unwrap();
        let names: Vec<&str> = ringlet.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["use_custom_ringlet", "actions", "imports", "vars", "execute"]);

        // Ringlet variables are only checked while the ringlet exists.
        let vars = machine_group("ringlet").attribute("vars");
        let bad = Item::Row(vec![
            AttributeValue::line("let"),
            expression().default_value(),
            expression().default_value(),
            AttributeValue::line(""),
        ]);
        assert!(mutator.add_item(&mut m, vars.untyped(), bad).is_err());

        mutator.modify(&mut m, Edit::new(&flag, AttributeValue::Bool(false))).unwrap();
        assert_eq!(m.group("ringlet").unwrap().fields.len(), 1);
        assert!(mutator.validate(&m).is_ok());
    }
}
