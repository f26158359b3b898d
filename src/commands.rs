//! Command execution.

use crate::config::Config;
use crate::Commands;
use colored::Colorize;
use machines_codec::{FormatCodec, JsonCodec};
use machines_core::machine::{Action, Dependency};
use machines_core::path::{Navigate, Row};
use machines_core::{
    mutator, AttributeGroup, AttributePath, AttributeValue, CoreError, Dialect, DialectMutator,
    Edit, Item, Leaf, Machine, Path, State, Transition,
};
use serde_json::Value;
use std::collections::BTreeSet;
use std::error::Error;
use std::path::Path as FsPath;

type CommandResult = Result<String, Box<dyn Error>>;

/// Executes a command and returns the formatted output.
pub fn execute(config: &Config, cmd: Commands) -> CommandResult {
    let codec = if config.pretty {
        JsonCodec::pretty()
    } else {
        JsonCodec::new()
    };

    match cmd {
        Commands::New { machine, dialect } => {
            let dialect = match dialect {
                Some(name) => name.parse::<Dialect>()?,
                None => config.default_dialect,
            };
            if machine.exists() {
                return Err(format!("{} already exists", machine.display()).into());
            }
            let created = mutator(dialect).initial_machine(&machine)?;
            codec.save(&created)?;
            tracing::info!("Created machine {} at {}", created.name(), machine.display());
            Ok(format!(
                "{} {} machine {} (states: {})",
                "Created".green(),
                dialect,
                created.name().cyan(),
                created.state_names().join(", ")
            ))
        }

        Commands::Show { machine, path } => {
            let loaded = codec.parse(&machine)?;
            let json = match path {
                Some(path) => {
                    let path: AttributePath = path.parse()?;
                    node_json(path.resolve(&loaded)?)
                        .ok_or_else(|| format!("{} cannot be shown on its own", path))?
                }
                None => serde_json::to_value(&loaded)?,
            };
            Ok(format_json(&json, config.pretty))
        }

        Commands::Validate { machine } => {
            let loaded = codec.parse(&machine)?;
            match mutator(loaded.dialect).validate(&loaded) {
                Ok(()) => Ok(format!("{} {}", loaded.name().cyan(), "is valid".green())),
                Err(CoreError::Validation { violations }) => {
                    let mut output = format!(
                        "{} has {} violation(s):",
                        loaded.name().cyan(),
                        violations.len().to_string().red()
                    );
                    for violation in &violations {
                        output.push_str(&format!(
                            "\n  {}: {}",
                            violation.path.to_string().yellow(),
                            violation.message
                        ));
                    }
                    Err(output.into())
                }
                Err(e) => Err(e.into()),
            }
        }

        Commands::NewState { machine } => {
            let edited = edit(&codec, &machine, |m, machine| m.new_state(machine))?;
            let name = edited.states.last().map(|s| s.name.clone()).unwrap_or_default();
            Ok(format!("{} state {}", "Added".green(), name.cyan()))
        }

        Commands::NewTransition {
            machine,
            source,
            target,
            condition,
        } => {
            edit(&codec, &machine, |m, machine| {
                m.new_transition(machine, &source, &target, condition.as_deref())
            })?;
            Ok(format!(
                "{} transition {} -> {}",
                "Added".green(),
                source.cyan(),
                target.cyan()
            ))
        }

        Commands::DeleteStates { machine, indices } => {
            let indices: BTreeSet<usize> = indices.into_iter().collect();
            edit(&codec, &machine, |m, machine| m.delete_states(machine, &indices))?;
            Ok(format!("{} {} state(s)", "Deleted".green(), indices.len()))
        }

        Commands::DeleteTransitions {
            machine,
            state,
            indices,
        } => {
            let indices: BTreeSet<usize> = indices.into_iter().collect();
            edit(&codec, &machine, |m, machine| {
                m.delete_transitions(machine, state, &indices)
            })?;
            Ok(format!("{} {} transition(s)", "Deleted".green(), indices.len()))
        }

        Commands::Set {
            machine,
            path,
            value,
        } => {
            let path: AttributePath = path.parse()?;
            let leaf = coerce(&path, &path.read(&codec.parse(&machine)?)?, &value)?;
            edit(&codec, &machine, |m, machine| {
                m.modify(machine, Edit::untyped(path.clone(), leaf))
            })?;
            Ok(format!("{} {}", "Set".green(), path.to_string().cyan()))
        }

        Commands::RenameState { machine, from, to } => {
            edit(&codec, &machine, |m, machine| {
                let index = machine
                    .state_index(&from)
                    .ok_or_else(|| CoreError::StateNotFound {
                        path: Path::machine().states().into_untyped(),
                        name: from.clone(),
                    })?;
                let name = Path::machine().states().index(index).name();
                m.modify(machine, Edit::new(&name, to.clone()))
            })?;
            Ok(format!(
                "{} state {} to {}",
                "Renamed".green(),
                from.cyan(),
                to.cyan()
            ))
        }

        Commands::AddRow {
            machine,
            path,
            item,
        } => {
            let path: AttributePath = path.parse()?;
            let item = parse_item(&item)?;
            edit(&codec, &machine, |m, machine| m.add_item(machine, &path, item))?;
            Ok(format!("{} item to {}", "Added".green(), path.to_string().cyan()))
        }

        Commands::DeleteRows {
            machine,
            path,
            indices,
        } => {
            let path: AttributePath = path.parse()?;
            let indices: BTreeSet<usize> = indices.into_iter().collect();
            edit(&codec, &machine, |m, machine| m.delete_items(machine, &path, &indices))?;
            Ok(format!(
                "{} {} item(s) from {}",
                "Deleted".green(),
                indices.len(),
                path.to_string().cyan()
            ))
        }

        Commands::MoveRows {
            machine,
            path,
            indices,
            to,
        } => {
            let path: AttributePath = path.parse()?;
            let indices: BTreeSet<usize> = indices.into_iter().collect();
            edit(&codec, &machine, |m, machine| {
                m.move_items(machine, &path, &indices, to)
            })?;
            Ok(format!(
                "{} {} item(s) of {} to {}",
                "Moved".green(),
                indices.len(),
                path.to_string().cyan(),
                to
            ))
        }
    }
}

/// Loads a bundle, applies one edit through its dialect's mutator and saves it.
fn edit<F>(codec: &JsonCodec, location: &FsPath, f: F) -> Result<Machine, Box<dyn Error>>
where
    F: FnOnce(&dyn DialectMutator, &mut Machine) -> Result<bool, CoreError>,
{
    let mut machine = codec.parse(location)?;
    let m = mutator(machine.dialect);
    let structural = f(m.as_ref(), &mut machine)?;
    codec.save(&machine)?;
    tracing::info!("Saved {} (structural: {})", machine.name(), structural);
    Ok(machine)
}

/// Interprets command-line text as a value for the leaf at `path`.
fn coerce(path: &AttributePath, current: &Leaf, text: &str) -> Result<Leaf, Box<dyn Error>> {
    let value = match current {
        Leaf::Text(_) => return Ok(Leaf::Text(text.to_string())),
        Leaf::OptionalText(_) => {
            return Ok(Leaf::OptionalText((!text.is_empty()).then(|| text.to_string())))
        }
        Leaf::Attribute(value) => value,
    };
    if text.trim_start().starts_with('{') {
        return Ok(Leaf::Attribute(serde_json::from_str(text)?));
    }
    let coerced = match value {
        AttributeValue::Bool(_) => AttributeValue::Bool(text.parse()?),
        AttributeValue::Integer(_) => AttributeValue::Integer(text.parse()?),
        AttributeValue::Float(_) => AttributeValue::Float(text.parse()?),
        AttributeValue::Expression { language, .. } => AttributeValue::expression(text, *language),
        AttributeValue::Line(_) => AttributeValue::line(text),
        AttributeValue::Code { language, .. } => AttributeValue::code(text, *language),
        AttributeValue::Text(_) => AttributeValue::text(text),
        AttributeValue::Enumerated { valid_values, .. } => AttributeValue::Enumerated {
            value: text.to_string(),
            valid_values: valid_values.clone(),
        },
        AttributeValue::EnumerableCollection { valid_values, .. } => {
            AttributeValue::EnumerableCollection {
                values: text
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
                valid_values: valid_values.clone(),
            }
        }
        other => {
            return Err(format!(
                "{} holds a {} value; pass it as {{\"kind\": ..., \"payload\": ...}} JSON",
                path,
                other.kind()
            )
            .into())
        }
    };
    Ok(Leaf::Attribute(coerced))
}

fn parse_item(item: &str) -> Result<Item, Box<dyn Error>> {
    let json: Value = serde_json::from_str(item)?;
    Ok(match json {
        Value::Array(_) => Item::Row(serde_json::from_value(json)?),
        _ => Item::Value(serde_json::from_value(json)?),
    })
}

fn node_json(node: &dyn Navigate) -> Option<Value> {
    if let Some(leaf) = Leaf::from_node(node) {
        return match leaf {
            Leaf::Text(s) => Some(Value::String(s)),
            Leaf::OptionalText(s) => serde_json::to_value(s).ok(),
            Leaf::Attribute(v) => serde_json::to_value(v).ok(),
        };
    }
    let any = node.as_any();
    if let Some(state) = any.downcast_ref::<State>() {
        return serde_json::to_value(state).ok();
    }
    if let Some(transition) = any.downcast_ref::<Transition>() {
        return serde_json::to_value(transition).ok();
    }
    if let Some(action) = any.downcast_ref::<Action>() {
        return serde_json::to_value(action).ok();
    }
    if let Some(group) = any.downcast_ref::<AttributeGroup>() {
        return serde_json::to_value(group).ok();
    }
    if let Some(dependency) = any.downcast_ref::<Dependency>() {
        return serde_json::to_value(dependency).ok();
    }
    if let Some(row) = any.downcast_ref::<Row>() {
        return serde_json::to_value(row).ok();
    }
    None
}

fn format_json(value: &Value, pretty: bool) -> String {
    let formatted = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    formatted.unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn config(dialect: Dialect) -> Config {
        Config {
            default_dialect: dialect,
            log_level: "warn".to_string(),
            pretty: false,
        }
    }

    fn run(config: &Config, cmd: Commands) -> String {
        execute(config, cmd).unwrap()
    }

    fn load(machine: &FsPath) -> Machine {
        JsonCodec::new().parse(machine).unwrap()
    }

    fn new_machine(dir: &FsPath, config: &Config) -> PathBuf {
        let machine = dir.join("Door.machine");
        run(
            config,
            Commands::New {
                machine: machine.clone(),
                dialect: None,
            },
        );
        machine
    }

    #[test]
    fn test_new_and_validate() {
        let dir = tempdir().unwrap();
        let config = config(Dialect::Ucfsm);
        let machine = new_machine(dir.path(), &config);
        assert_eq!(load(&machine).dialect, Dialect::Ucfsm);
        assert!(run(&config, Commands::Validate { machine: machine.clone() }).contains("is valid"));

        // A second `new` refuses to overwrite the bundle.
        assert!(execute(
            &config,
            Commands::New {
                machine,
                dialect: Some("vhdl".to_string()),
            }
        )
        .is_err());
    }

    #[test]
    fn test_state_editing() {
        let dir = tempdir().unwrap();
        let config = config(Dialect::Clfsm);
        let machine = new_machine(dir.path(), &config);

        assert!(run(&config, Commands::NewState { machine: machine.clone() }).contains("State"));
        run(
            &config,
            Commands::NewTransition {
                machine: machine.clone(),
                source: "Initial".to_string(),
                target: "State".to_string(),
                condition: Some("true".to_string()),
            },
        );
        run(
            &config,
            Commands::RenameState {
                machine: machine.clone(),
                from: "State".to_string(),
                to: "Open".to_string(),
            },
        );
        let loaded = load(&machine);
        assert_eq!(loaded.states[0].transitions[0].target, "Open");

        run(
            &config,
            Commands::DeleteStates {
                machine: machine.clone(),
                indices: vec![2],
            },
        );
        let loaded = load(&machine);
        assert_eq!(loaded.state_names(), vec!["Initial", "Suspended"]);
        assert!(loaded.states[0].transitions.is_empty());
    }

    #[test]
    fn test_set_coerces_text() {
        let dir = tempdir().unwrap();
        let config = config(Dialect::Clfsm);
        let machine = new_machine(dir.path(), &config);

        run(
            &config,
            Commands::Set {
                machine: machine.clone(),
                path: r#"machine.attributes["settings"]["suspend_state"]"#.to_string(),
                value: String::new(),
            },
        );
        assert_eq!(load(&machine).suspend_state, None);

        run(
            &config,
            Commands::Set {
                machine: machine.clone(),
                path: "machine.states[0].actions[0].implementation".to_string(),
                value: "count++;".to_string(),
            },
        );
        assert_eq!(load(&machine).states[0].actions[0].implementation, "count++;");
    }

    #[test]
    fn test_rejected_edit_leaves_bundle() {
        let dir = tempdir().unwrap();
        let config = config(Dialect::Clfsm);
        let machine = new_machine(dir.path(), &config);
        let before = load(&machine);

        let err = execute(
            &config,
            Commands::Set {
                machine: machine.clone(),
                path: r#"machine.attributes["settings"]["initial_state"]"#.to_string(),
                value: "Nowhere".to_string(),
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("validation failed"));
        assert_eq!(load(&machine), before);

        assert!(execute(
            &config,
            Commands::DeleteStates {
                machine: machine.clone(),
                indices: vec![0],
            }
        )
        .is_err());
        assert_eq!(load(&machine), before);
    }

    #[test]
    fn test_rows() {
        let dir = tempdir().unwrap();
        let config = config(Dialect::Ucfsm);
        let machine = new_machine(dir.path(), &config);
        let table = r#"machine.attributes["variables"]["machine_variables"]"#;
        for label in ["a", "b", "c"] {
            let row = format!(
                r#"[{{"kind":"expression","payload":{{"expression":"int","language":"cxx"}}}},
                    {{"kind":"line","payload":"{label}"}},
                    {{"kind":"expression","payload":{{"expression":"0","language":"cxx"}}}},
                    {{"kind":"line","payload":""}}]"#
            );
            run(
                &config,
                Commands::AddRow {
                    machine: machine.clone(),
                    path: table.to_string(),
                    item: row,
                },
            );
        }
        run(
            &config,
            Commands::MoveRows {
                machine: machine.clone(),
                path: table.to_string(),
                indices: vec![0],
                to: 3,
            },
        );
        run(
            &config,
            Commands::DeleteRows {
                machine: machine.clone(),
                path: table.to_string(),
                indices: vec![1],
            },
        );

        let shown = run(
            &config,
            Commands::Show {
                machine,
                path: Some(format!("{table}[1][1]")),
            },
        );
        let cell: AttributeValue = serde_json::from_str(&shown).unwrap();
        assert_eq!(cell, AttributeValue::line("a"));
    }
}
