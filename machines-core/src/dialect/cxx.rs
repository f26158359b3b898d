//! The C-family dialects: clfsm, ucfsm and spartanfsm.
//!
//! All three share one schema. They differ in action sets, in whether
//! suspension is supported (spartanfsm has none), and in language: spartanfsm
//! machines are plain C.

use super::common::{self, machine_group};
use super::Dialect;
use crate::attribute::{AttributeType, Field, Language};
use crate::machine::AttributeGroup;
use crate::mutator::DialectMutator;
use crate::path::{AttributePath, Path};
use crate::trigger::TriggerSet;
use crate::validation::Validator;

pub(crate) const CXX_KEYWORDS: &[&str] = &[
    "alignas", "alignof", "and", "asm", "auto", "bool", "break", "case", "catch", "char",
    "class", "const", "constexpr", "continue", "decltype", "default", "delete", "do",
    "double", "else", "enum", "explicit", "export", "extern", "false", "float", "for",
    "friend", "goto", "if", "inline", "int", "long", "mutable", "namespace", "new",
    "noexcept", "not", "nullptr", "operator", "or", "private", "protected", "public",
    "register", "return", "short", "signed", "sizeof", "static", "struct", "switch",
    "template", "this", "throw", "true", "try", "typedef", "typeid", "typename", "union",
    "unsigned", "using", "virtual", "void", "volatile", "while", "xor",
];

pub(crate) const C_KEYWORDS: &[&str] = &[
    "auto", "break", "case", "char", "const", "continue", "default", "do", "double",
    "else", "enum", "extern", "float", "for", "goto", "if", "inline", "int", "long",
    "register", "restrict", "return", "short", "signed", "sizeof", "static", "struct",
    "switch", "typedef", "union", "unsigned", "void", "volatile", "while",
];

/// Label column of every variables table.
const LABEL: usize = 1;

pub struct CxxMutator {
    dialect: Dialect,
    validator: Validator,
    triggers: TriggerSet,
    whitelist: Vec<AttributePath>,
}

impl CxxMutator {
    /// Builds the mutator for `dialect`, which must be one of the C-family dialects.
    pub fn new(dialect: Dialect) -> Self {
        debug_assert!(matches!(
            dialect,
            Dialect::Clfsm | Dialect::Ucfsm | Dialect::Spartanfsm
        ));
        let reserved = reserved_words(dialect);
        let variables = machine_group("variables");
        let state_variables = Path::machine()
            .states()
            .each()
            .attributes()
            .group("variables")
            .attribute("state_variables");

        let mut rules = common::machine_rules(dialect, reserved);
        rules.extend(common::variable_rules(&variables.attribute("machine_variables"), LABEL, reserved));
        rules.extend(common::variable_rules(&variables.attribute("parameters"), LABEL, reserved));
        rules.extend(common::variable_rules(&state_variables, LABEL, reserved));

        Self {
            dialect,
            validator: Validator::new(dialect, rules),
            triggers: TriggerSet::new(common::settings_triggers(dialect)),
            whitelist: common::whitelist(dialect),
        }
    }

    fn variables_table(&self) -> AttributeType {
        let language = self.dialect.language();
        AttributeType::table(common::columns_of(&[
            ("type", AttributeType::expression(language)),
            ("label", AttributeType::Line),
            ("value", AttributeType::expression(language)),
            ("comment", AttributeType::Line),
        ]))
    }
}

fn reserved_words(dialect: Dialect) -> &'static [&'static str] {
    match dialect.language() {
        Language::C => C_KEYWORDS,
        _ => CXX_KEYWORDS,
    }
}

impl DialectMutator for CxxMutator {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn machine_groups(&self) -> Vec<AttributeGroup> {
        let language = self.dialect.language();
        vec![
            AttributeGroup::new("variables")
                .with_field(Field::new("machine_variables", self.variables_table()))
                .with_field(Field::new("parameters", self.variables_table())),
            AttributeGroup::new("funcRefs")
                .with_field(Field::new("func_refs", AttributeType::code(language))),
            AttributeGroup::new("includes")
                .with_field(Field::new("include_path", AttributeType::Text))
                .with_field(Field::new("includes", AttributeType::code(language))),
            common::settings_group(self.dialect),
        ]
    }

    fn state_groups(&self) -> Vec<AttributeGroup> {
        vec![AttributeGroup::new("variables")
            .with_field(Field::new("state_variables", self.variables_table()))]
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
