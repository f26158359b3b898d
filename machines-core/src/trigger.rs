//! Trigger/sync evaluation.
//!
//! Triggers keep attributes that depend on other attributes coherent after
//! every edit:
//!
//! - [`Trigger::SyncChoices`] keeps the valid choices of enumerated
//!   attributes equal to a live set of names (state names, or the labels in a
//!   table column) and drops or renames choices that are no longer valid.
//! - [`Trigger::Availability`] adds a group's optional fields while a boolean
//!   flag is set and removes them when it is cleared.
//! - [`Trigger::Mirror`] keeps an enumerated choice and the machine's
//!   `initial_state` or `suspend_state` field equal, copying in whichever
//!   direction was edited.
//!
//! A trigger fires when a changed path overlaps a path it watches. Firing may
//! change further paths, so evaluation repeats until nothing changes.

use crate::attribute::{AttributeType, AttributeValue, Field};
use crate::error::CoreError;
use crate::machine::{AttributeGroup, Machine};
use crate::path::{AttributePath, Path, Pattern, Step};
use std::collections::BTreeSet;

/// Upper bound on evaluation rounds before the trigger set is considered cyclic.
pub const MAX_ROUNDS: usize = 32;

/// A live set of names that enumerated attributes may choose from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameSource {
    /// Names of every state.
    StateNames,
    /// Non-empty cells of one column of a table.
    Column { table: AttributePath, column: usize },
}

impl NameSource {
    pub fn column(table: &Path<AttributeValue>, column: usize) -> Self {
        NameSource::Column {
            table: table.untyped().clone(),
            column,
        }
    }

    /// Current names, in document order.
    pub fn names(&self, machine: &Machine) -> Vec<String> {
        match self {
            NameSource::StateNames => machine.state_names(),
            NameSource::Column { table, column } => {
                let rows = table
                    .resolve(machine)
                    .ok()
                    .and_then(|node| node.as_any().downcast_ref::<AttributeValue>())
                    .and_then(|value| value.rows());
                rows.map(|rows| {
                    rows.iter()
                        .filter_map(|row| row.get(*column).and_then(AttributeValue::as_text))
                        .filter(|name| !name.is_empty())
                        .collect()
                })
                .unwrap_or_default()
            }
        }
    }

    /// Path whose changes can alter the names.
    pub fn watched(&self) -> AttributePath {
        match self {
            NameSource::StateNames => Path::machine().states().into_untyped(),
            NameSource::Column { table, .. } => table.clone(),
        }
    }

    /// Returns true if `rename` renamed one of these names.
    pub fn is_renamed_by(&self, rename: &Rename) -> bool {
        match self {
            NameSource::StateNames => Path::machine()
                .states()
                .each()
                .name()
                .untyped()
                .matches(&rename.path),
            NameSource::Column { table, column } => {
                rename.path.len() == table.len() + 2
                    && table.is_ancestor_of(&rename.path)
                    && rename.path.last() == Some(&Step::Index(*column))
            }
        }
    }
}

/// A name changed in place by an edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub path: AttributePath,
    pub from: String,
    pub to: String,
}

/// Describes what an edit changed, as input to trigger evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Change {
    pub paths: Vec<AttributePath>,
    pub renames: Vec<Rename>,
}

impl Change {
    pub fn at(path: AttributePath) -> Self {
        Self {
            paths: vec![path],
            renames: Vec::new(),
        }
    }

    pub fn with(mut self, path: AttributePath) -> Self {
        self.paths.push(path);
        self
    }

    pub fn with_rename(mut self, rename: Rename) -> Self {
        self.renames.push(rename);
        self
    }
}

/// Which machine field a mirrored choice is copied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorTarget {
    InitialState,
    /// An empty choice clears the suspend state.
    SuspendState,
}

impl MirrorTarget {
    pub fn path(self) -> AttributePath {
        match self {
            MirrorTarget::InitialState => Path::machine().initial_state().into_untyped(),
            MirrorTarget::SuspendState => Path::machine().suspend_state().into_untyped(),
        }
    }
}

/// A declarative rule re-deriving dependent attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    SyncChoices {
        source: NameSource,
        /// Enumerated or enumerable-collection attributes; may be a pattern.
        targets: AttributePath,
        /// Adds `""` as a valid choice, meaning "none".
        allow_empty: bool,
    },
    Availability {
        /// Boolean attribute; its group receives the fields.
        flag: AttributePath,
        fields: Vec<Field>,
    },
    Mirror {
        from: AttributePath,
        to: MirrorTarget,
    },
}

impl Trigger {
    pub fn sync_choices(
        source: NameSource,
        targets: &Pattern<AttributeValue>,
        allow_empty: bool,
    ) -> Self {
        Trigger::SyncChoices {
            source,
            targets: targets.untyped().clone(),
            allow_empty,
        }
    }

    pub fn availability(flag: &Path<AttributeValue>, fields: Vec<Field>) -> Self {
        Trigger::Availability {
            flag: flag.untyped().clone(),
            fields,
        }
    }

    pub fn mirror(from: &Path<AttributeValue>, to: MirrorTarget) -> Self {
        Trigger::Mirror {
            from: from.untyped().clone(),
            to,
        }
    }

    /// Paths whose changes fire this trigger.
    fn watched(&self) -> Vec<AttributePath> {
        match self {
            Trigger::SyncChoices {
                source, targets, ..
            } => vec![source.watched(), targets.clone()],
            Trigger::Availability { flag, .. } => vec![flag.clone()],
            Trigger::Mirror { from, to } => vec![from.clone(), to.path()],
        }
    }

    fn is_fired_by(&self, change: &Change) -> bool {
        let watched = self.watched();
        change
            .paths
            .iter()
            .any(|changed| watched.iter().any(|w| w.overlaps(changed)))
    }

    /// Applies the trigger, returning the paths it actually changed.
    fn fire(&self, machine: &mut Machine, change: &Change) -> Result<Vec<AttributePath>, CoreError> {
        match self {
            Trigger::SyncChoices {
                source,
                targets,
                allow_empty,
            } => {
                let mut valid: BTreeSet<String> = source.names(machine).into_iter().collect();
                if *allow_empty {
                    valid.insert(String::new());
                }
                let renames: Vec<&Rename> = change
                    .renames
                    .iter()
                    .filter(|r| source.is_renamed_by(r))
                    .collect();
                let mut changed = Vec::new();
                for target in targets.expand(machine) {
                    // A choice written by this change stays as written so validation can reject it.
                    let written = change.paths.iter().any(|p| target.is_ancestor_or_same(p));
                    let reset = if written { None } else { Some(*allow_empty) };
                    if sync_target(machine, &target, &valid, &renames, reset)? {
                        changed.push(target);
                    }
                }
                Ok(changed)
            }
            Trigger::Availability { flag, fields } => {
                let enabled = flag
                    .read(machine)
                    .ok()
                    .and_then(|leaf| match leaf {
                        crate::path::Leaf::Attribute(v) => v.as_bool(),
                        _ => None,
                    })
                    .unwrap_or(false);
                let group_path = flag.parent().ok_or_else(|| CoreError::PathNotFound {
                    path: flag.clone(),
                })?;
                let group = group_path
                    .resolve_mut(machine)?
                    .as_any_mut()
                    .downcast_mut::<AttributeGroup>()
                    .ok_or_else(|| CoreError::TypeMismatch {
                        path: group_path.clone(),
                        expected: "attribute group".to_string(),
                        found: "node".to_string(),
                    })?;
                let mut changed = Vec::new();
                for field in fields {
                    let present = group.field(&field.name).is_some();
                    if enabled && !present {
                        group.insert(field.clone(), field.ty.default_value());
                    } else if !enabled && present {
                        group.remove(&field.name);
                    } else {
                        continue;
                    }
                    changed.push(group_path.child(Step::Key(field.name.clone())));
                }
                Ok(changed)
            }
            Trigger::Mirror { from, to } => {
                let target = to.path();
                let reverse = change.paths.iter().any(|p| p.overlaps(&target))
                    && !change.paths.iter().any(|p| p.overlaps(from));
                if reverse {
                    return mirror_back(machine, from, *to);
                }
                let choice = match from.read(machine) {
                    Ok(crate::path::Leaf::Attribute(AttributeValue::Enumerated { value, .. })) => value,
                    _ => return Ok(Vec::new()),
                };
                let (path, differs) = match to {
                    MirrorTarget::InitialState => {
                        let differs = machine.initial_state != choice;
                        if differs {
                            machine.initial_state = choice;
                        }
                        (Path::machine().initial_state().into_untyped(), differs)
                    }
                    MirrorTarget::SuspendState => {
                        let value = Some(choice).filter(|c| !c.is_empty());
                        let differs = machine.suspend_state != value;
                        if differs {
                            machine.suspend_state = value;
                        }
                        (Path::machine().suspend_state().into_untyped(), differs)
                    }
                };
                Ok(if differs { vec![path] } else { Vec::new() })
            }
        }
    }
}

/// Copies the machine field back into the enumerated attribute after a direct edit.
fn mirror_back(
    machine: &mut Machine,
    from: &AttributePath,
    to: MirrorTarget,
) -> Result<Vec<AttributePath>, CoreError> {
    let current = match to {
        MirrorTarget::InitialState => machine.initial_state.clone(),
        MirrorTarget::SuspendState => machine.suspend_state.clone().unwrap_or_default(),
    };
    let Ok(node) = from.resolve_mut(machine) else {
        return Ok(Vec::new());
    };
    match node.as_any_mut().downcast_mut::<AttributeValue>() {
        Some(AttributeValue::Enumerated { value, .. }) if *value != current => {
            *value = current;
            Ok(vec![from.clone()])
        }
        _ => Ok(Vec::new()),
    }
}

/// Re-derives one enumerated attribute; returns true if it changed.
///
/// Invalid choices are replaced only when `reset` is set; it carries `allow_empty`.
fn sync_target(
    machine: &mut Machine,
    target: &AttributePath,
    valid: &BTreeSet<String>,
    renames: &[&Rename],
    reset: Option<bool>,
) -> Result<bool, CoreError> {
    let node = target.resolve_mut(machine)?;
    let Some(value) = node.as_any_mut().downcast_mut::<AttributeValue>() else {
        return Ok(false);
    };
    let before = value.clone();
    match value {
        AttributeValue::Enumerated {
            value: choice,
            valid_values,
        } => {
            if let Some(rename) = renames.iter().find(|r| r.from == *choice) {
                *choice = rename.to.clone();
            }
            if let Some(allow_empty) = reset.filter(|_| !valid.contains(choice)) {
                *choice = if allow_empty {
                    String::new()
                } else {
                    valid.iter().next().cloned().unwrap_or_default()
                };
            }
            *valid_values = valid.clone();
        }
        AttributeValue::EnumerableCollection {
            values,
            valid_values,
        } => {
            let renamed: BTreeSet<String> = values
                .iter()
                .map(|v| {
                    renames
                        .iter()
                        .find(|r| r.from == *v)
                        .map(|r| r.to.clone())
                        .unwrap_or_else(|| v.clone())
                })
                .filter(|v| reset.is_none() || valid.contains(v))
                .collect();
            *values = renamed;
            *valid_values = valid.clone();
        }
        _ => return Ok(false),
    }
    let changed = *value != before;
    if changed {
        sync_field_type(machine, target, valid);
    }
    Ok(changed)
}

/// Keeps the declared field type's valid choices in step with the value.
fn sync_field_type(machine: &mut Machine, target: &AttributePath, valid: &BTreeSet<String>) {
    let (Some(group_path), Some(Step::Key(key))) = (target.parent(), target.last()) else {
        return;
    };
    let Ok(node) = group_path.resolve_mut(machine) else {
        return;
    };
    let Some(group) = node.as_any_mut().downcast_mut::<AttributeGroup>() else {
        return;
    };
    if let Some(field) = group.fields.iter_mut().find(|f| &f.name == key) {
        match &mut field.ty {
            AttributeType::Enumerated { valid_values }
            | AttributeType::EnumerableCollection { valid_values } => {
                *valid_values = valid.clone();
            }
            _ => {}
        }
    }
}

/// The triggers declared for one dialect.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriggerSet {
    triggers: Vec<Trigger>,
}

impl TriggerSet {
    pub fn new(triggers: Vec<Trigger>) -> Self {
        Self { triggers }
    }

    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    /// Evaluates the triggers fired by `change`, then those fired by their
    /// own changes, until nothing changes.
    pub fn apply(&self, machine: &mut Machine, change: &Change) -> Result<(), CoreError> {
        let mut pending = change.clone();
        for round in 0..MAX_ROUNDS {
            if pending.paths.is_empty() {
                tracing::trace!(round, "triggers settled");
                return Ok(());
            }
            let mut next = Change::default();
            for trigger in &self.triggers {
                if trigger.is_fired_by(&pending) {
                    next.paths.extend(trigger.fire(machine, &pending)?);
                }
            }
            pending = next;
        }
        Err(CoreError::TriggerCycle { rounds: MAX_ROUNDS })
    }

    /// Fires every trigger once, then settles; used for freshly built or decoded machines.
    pub fn sync_all(&self, machine: &mut Machine) -> Result<(), CoreError> {
        let mut change = Change::default();
        for trigger in &self.triggers {
            change.paths.extend(trigger.fire(machine, &Change::default())?);
        }
        self.apply(machine, &change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::Language;
    use crate::dialect::Dialect;
    use crate::machine::State;
    use std::sync::Arc;

    fn settings() -> Path<AttributeGroup> {
        Path::machine().attributes().group("settings")
    }

    fn machine() -> Machine {
        let mut machine = Machine::new(Dialect::Clfsm, "Test.machine");
        machine.states.push(Arc::new(State::new("Initial")));
        machine.states.push(Arc::new(State::new("Suspended")));
        machine.initial_state = "Initial".to_string();
        machine.suspend_state = Some("Suspended".to_string());
        machine.attributes.push(
            AttributeGroup::new("settings")
                .with(
                    Field::new("initial_state", AttributeType::enumerated(["Initial", "Suspended"])),
                    AttributeValue::enumerated("Initial", ["Initial", "Suspended"]),
                )
                .with(
                    Field::new("suspend_state", AttributeType::enumerated(["Initial", "Suspended", ""])),
                    AttributeValue::enumerated("Suspended", ["Initial", "Suspended", ""]),
                ),
        );
        machine.attributes.push(
            AttributeGroup::new("ringlet")
                .with_field(Field::new("use_custom_ringlet", AttributeType::Bool)),
        );
        machine
    }

    fn triggers() -> TriggerSet {
        TriggerSet::new(vec![
            Trigger::sync_choices(
                NameSource::StateNames,
                &settings().attribute("initial_state").pattern(),
                false,
            ),
            Trigger::sync_choices(
                NameSource::StateNames,
                &settings().attribute("suspend_state").pattern(),
                true,
            ),
            Trigger::mirror(&settings().attribute("initial_state"), MirrorTarget::InitialState),
            Trigger::mirror(&settings().attribute("suspend_state"), MirrorTarget::SuspendState),
            Trigger::availability(
                &Path::machine().attributes().group("ringlet").attribute("use_custom_ringlet"),
                vec![
                    Field::new("imports", AttributeType::Text),
                    Field::new("execute", AttributeType::code(Language::Cxx)),
                ],
            ),
        ])
    }

    #[test]
    fn test_deleted_state_resets_suspend_choice() {
        let mut m = machine();
        m.states.pop();
        triggers()
            .apply(&mut m, &Change::at(Path::machine().states().into_untyped()))
            .unwrap();

        let suspend = settings().attribute("suspend_state").read(&m).unwrap();
        assert_eq!(suspend, &AttributeValue::enumerated("", ["Initial", ""]));
        assert_eq!(m.suspend_state, None);
        let field = m.group("settings").unwrap().field("suspend_state").unwrap();
        assert_eq!(field.ty, AttributeType::enumerated(["Initial", ""]));
    }

    #[test]
    fn test_rename_carries_choice() {
        let mut m = machine();
        m.state_mut(0).unwrap().name = "Start".to_string();
        let name_path = Path::machine().states().index(0).name().into_untyped();
        let change = Change::at(name_path.clone()).with_rename(Rename {
            path: name_path,
            from: "Initial".to_string(),
            to: "Start".to_string(),
        });
        triggers().apply(&mut m, &change).unwrap();

        let initial = settings().attribute("initial_state").read(&m).unwrap();
        assert_eq!(initial.choice(), Some("Start"));
        assert_eq!(m.initial_state, "Start");
    }

    #[test]
    fn test_unrelated_change_fires_nothing() {
        let mut m = machine();
        m.states.pop();
        let before = m.clone();
        triggers()
            .apply(&mut m, &Change::at(Path::machine().dependencies().into_untyped()))
            .unwrap();
        assert_eq!(m, before);
    }

    #[test]
    fn test_availability_toggle() {
        let mut m = machine();
        let flag = Path::machine().attributes().group("ringlet").attribute("use_custom_ringlet");
        flag.write(&mut m, AttributeValue::Bool(true)).unwrap();
        triggers().apply(&mut m, &Change::at(flag.untyped().clone())).unwrap();
        let ringlet = m.group("ringlet").unwrap();
        assert_eq!(ringlet.fields.len(), 3);
        assert_eq!(ringlet.attribute("imports"), Some(&AttributeValue::text("")));

        flag.write(&mut m, AttributeValue::Bool(false)).unwrap();
        triggers().apply(&mut m, &Change::at(flag.untyped().clone())).unwrap();
        let ringlet = m.group("ringlet").unwrap();
        assert_eq!(ringlet.fields.len(), 1);
        assert!(ringlet.attribute("execute").is_none());
    }

    #[test]
    fn test_column_source() {
        let mut m = machine();
        let columns = vec![Field::new("label", AttributeType::Line)];
        let table = AttributeValue::table(
            columns.clone(),
            vec![vec![AttributeValue::line("speed")], vec![AttributeValue::line("")]],
        );
        m.attributes.push(
            AttributeGroup::new("variables")
                .with(Field::new("externals", AttributeType::table(columns)), table)
                .with(
                    Field::new("chosen", AttributeType::enumerable_collection(["speed", "gone"])),
                    AttributeValue::enumerable_collection(["speed", "gone"], ["speed", "gone"]),
                ),
        );
        let table_path = Path::machine().attributes().group("variables").attribute("externals");
        let source = NameSource::column(&table_path, 0);
        assert_eq!(source.names(&m), vec!["speed".to_string()]);

        let set = TriggerSet::new(vec![Trigger::sync_choices(
            source.clone(),
            &Path::machine().attributes().group("variables").attribute("chosen").pattern(),
            false,
        )]);
        set.sync_all(&mut m).unwrap();
        let chosen = m.group("variables").unwrap().attribute("chosen").unwrap();
        assert_eq!(chosen, &AttributeValue::enumerable_collection(["speed"], ["speed"]));

        let cell = table_path.cell(0, 0);
        cell.write(&mut m, AttributeValue::line("velocity")).unwrap();
        let rename = Rename {
            path: cell.untyped().clone(),
            from: "speed".to_string(),
            to: "velocity".to_string(),
        };
        assert!(source.is_renamed_by(&rename));
        set.apply(&mut m, &Change::at(cell.untyped().clone()).with_rename(rename)).unwrap();
        let chosen = m.group("variables").unwrap().attribute("chosen").unwrap();
        assert_eq!(chosen, &AttributeValue::enumerable_collection(["velocity"], ["velocity"]));
    }

    #[test]
    fn test_sync_all_idempotent() {
        let mut m = machine();
        m.states.pop();
        let set = triggers();
        set.sync_all(&mut m).unwrap();
        let once = m.clone();
        set.sync_all(&mut m).unwrap();
        assert_eq!(m, once);
    }

    #[test]
    fn test_mirror_back_from_machine_field() {
        let mut m = machine();
        m.suspend_state = None;
        triggers()
            .apply(&mut m, &Change::at(MirrorTarget::SuspendState.path()))
            .unwrap();
        let suspend = settings().attribute("suspend_state").read(&m).unwrap();
        assert_eq!(suspend.choice(), Some(""));
        assert_eq!(m.suspend_state, None);
    }

    #[test]
    fn test_cycle_detected() {
        // Two sources fighting over one attribute never settle.
        let mut m = machine();
        let columns = vec![Field::new("label", AttributeType::Line)];
        m.attributes.push(AttributeGroup::new("variables").with(
            Field::new("labels", AttributeType::table(columns.clone())),
            AttributeValue::table(columns, vec![vec![AttributeValue::line("x")]]),
        ));
        let target = settings().attribute("initial_state");
        let labels = Path::machine().attributes().group("variables").attribute("labels");
        let set = TriggerSet::new(vec![
            Trigger::sync_choices(NameSource::StateNames, &target.pattern(), false),
            Trigger::sync_choices(NameSource::column(&labels, 0), &target.pattern(), false),
        ]);
        let err = set.apply(&mut m, &Change::at(target.untyped().clone())).unwrap_err();
        assert_eq!(err, CoreError::TriggerCycle { rounds: MAX_ROUNDS });
    }
}
