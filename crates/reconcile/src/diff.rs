//! Diff computation between desired and remote entities

use std::fmt;

use indexmap::IndexMap;

use crate::types::{Desired, EntitySpec, FieldLayout, FieldSnapshot, LinkTarget, RemoteEntity};

/// What has to happen to an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Create,
    Update,
    Delete,
    NoOp,
}

impl Action {
    /// Check if the action changes remote state
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::NoOp)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::Delete => "-",
            Self::NoOp => "=",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::NoOp => "unchanged",
        })
    }
}

/// Entity-level attributes compared besides the fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Attribute {
    Title,
    Body,
    Color,
    Category,
    Tags,
    Version,
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Title => "title",
            Self::Body => "body",
            Self::Color => "color",
            Self::Category => "category",
            Self::Tags => "tags",
            Self::Version => "version",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChangeKey {
    Attribute(Attribute),
    Field(String),
}

impl fmt::Display for ChangeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attribute(attribute) => write!(f, "{attribute}"),
            Self::Field(name) => write!(f, "field '{name}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Text(String),
    Link(LinkTarget),
    Field(Box<FieldSnapshot>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub old: Value,
    pub new: Value,
}

/// Per-key differences for one entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub action: Action,
    pub added: IndexMap<ChangeKey, Value>,
    pub changed: IndexMap<ChangeKey, Change>,
    pub removed: IndexMap<ChangeKey, Value>,
}

impl ChangeSet {
    fn new(action: Action) -> Self {
        Self {
            action,
            added: IndexMap::new(),
            changed: IndexMap::new(),
            removed: IndexMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.changed.len() + self.removed.len()
    }

    /// Check if `attribute` is added, changed or removed
    pub fn touches(&self, attribute: Attribute) -> bool {
        let key = ChangeKey::Attribute(attribute);
        self.added.contains_key(&key)
            || self.changed.contains_key(&key)
            || self.removed.contains_key(&key)
    }

    fn compare(&mut self, old: IndexMap<ChangeKey, Value>, new: IndexMap<ChangeKey, Value>) {
        for (key, new_value) in &new {
            match old.get(key) {
                None => {
                    self.added.insert(key.clone(), new_value.clone());
                }
                Some(old_value) if old_value != new_value => {
                    self.changed.insert(
                        key.clone(),
                        Change {
                            old: old_value.clone(),
                            new: new_value.clone(),
                        },
                    );
                }
                Some(_) => {}
            }
        }
        for (key, old_value) in old {
            if !new.contains_key(&key) {
                self.removed.insert(key, old_value);
            }
        }
    }
}

/// Attributes and fields of an entity as comparable values
fn flatten(spec: &EntitySpec, version: Option<&str>, layout: &FieldLayout) -> IndexMap<ChangeKey, Value> {
    let mut values = IndexMap::new();
    values.insert(
        ChangeKey::Attribute(Attribute::Title),
        Value::Text(spec.title.clone()),
    );
    if let Some(body) = &spec.body {
        values.insert(ChangeKey::Attribute(Attribute::Body), Value::Text(body.clone()));
    }
    if let Some(color) = &spec.color {
        values.insert(ChangeKey::Attribute(Attribute::Color), Value::Text(color.clone()));
    }
    if let Some(category) = &spec.category {
        values.insert(
            ChangeKey::Attribute(Attribute::Category),
            Value::Link(category.clone()),
        );
    }
    if !spec.tags.is_empty() {
        values.insert(
            ChangeKey::Attribute(Attribute::Tags),
            Value::Text(spec.tags.join(", ")),
        );
    }
    if let Some(version) = version {
        values.insert(
            ChangeKey::Attribute(Attribute::Version),
            Value::Text(version.to_string()),
        );
    }
    for (name, snapshot) in layout {
        values.insert(
            ChangeKey::Field(name.clone()),
            Value::Field(Box::new(snapshot.clone())),
        );
    }
    values
}

/// Compare a desired entity with its remote counterpart, if any.
///
/// The desired layout is recomputed from declaration order; the remote side
/// uses positions and group ids as stored, so a pure reorder is an update.
pub fn diff_entity(desired: &Desired, remote: Option<&RemoteEntity>) -> ChangeSet {
    let new = flatten(&desired.spec, Some(&desired.version), &desired.spec.layout());

    let Some(remote) = remote else {
        let mut changes = ChangeSet::new(Action::Create);
        changes.compare(IndexMap::new(), new);
        return changes;
    };

    let old = flatten(
        &remote.spec,
        remote.bookkeeping.as_ref().map(|b| b.version.as_str()),
        &remote.layout,
    );
    let mut changes = ChangeSet::new(Action::Update);
    changes.compare(old, new);
    if changes.is_empty() {
        changes.action = Action::NoOp;
    }
    changes
}

/// Everything about a remote entity, marked for removal.
pub fn diff_removal(remote: &RemoteEntity) -> ChangeSet {
    let old = flatten(
        &remote.spec,
        remote.bookkeeping.as_ref().map(|b| b.version.as_str()),
        &remote.layout,
    );
    let mut changes = ChangeSet::new(Action::Delete);
    changes.compare(old, IndexMap::new());
    changes
}
