//! Core types for entity reconciliation

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Identifier assigned by the remote store
pub type RemoteId = u64;

/// User-assigned identifier of a manifest, unique within one run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestId(String);

impl ManifestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ManifestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ManifestId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ManifestId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ManifestId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The closed set of entity kinds the remote store knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    #[serde(rename = "item")]
    Item,
    #[serde(rename = "items_type", alias = "item_category")]
    ItemCategory,
    #[serde(rename = "experiment")]
    Experiment,
    #[serde(rename = "experiments_template", alias = "experiment_template")]
    ExperimentTemplate,
}

impl EntityKind {
    /// All kinds, categories first
    pub const ALL: [Self; 4] = [
        Self::ItemCategory,
        Self::ExperimentTemplate,
        Self::Item,
        Self::Experiment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Item => "item",
            Self::ItemCategory => "items_type",
            Self::Experiment => "experiment",
            Self::ExperimentTemplate => "experiments_template",
        }
    }

    /// Whether entities of this kind act as a category for other entities
    pub fn is_category(&self) -> bool {
        matches!(self, Self::ItemCategory | Self::ExperimentTemplate)
    }

    /// Kind of the entity that `category` may point at
    pub fn category_kind(&self) -> Option<Self> {
        match self {
            Self::Item => Some(Self::ItemCategory),
            Self::Experiment => Some(Self::ExperimentTemplate),
            Self::ItemCategory | Self::ExperimentTemplate => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "item" => Ok(Self::Item),
            "items_type" | "item_category" => Ok(Self::ItemCategory),
            "experiment" => Ok(Self::Experiment),
            "experiments_template" | "experiment_template" => Ok(Self::ExperimentTemplate),
            other => Err(Error::UnknownKind(other.to_string())),
        }
    }
}

/// Field type catalog
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Checkbox,
    Radio,
    Select,
    #[default]
    Text,
    Number,
    Email,
    Url,
    Date,
    #[serde(rename = "datetime-local")]
    DatetimeLocal,
    Time,
    Items,
    Experiments,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Checkbox => "checkbox",
            Self::Radio => "radio",
            Self::Select => "select",
            Self::Text => "text",
            Self::Number => "number",
            Self::Email => "email",
            Self::Url => "url",
            Self::Date => "date",
            Self::DatetimeLocal => "datetime-local",
            Self::Time => "time",
            Self::Items => "items",
            Self::Experiments => "experiments",
        }
    }

    /// Kind a link field points at, `None` for scalar types
    pub fn link_kind(&self) -> Option<EntityKind> {
        match self {
            Self::Items => Some(EntityKind::Item),
            Self::Experiments => Some(EntityKind::Experiment),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target of a link value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LinkTarget {
    /// Another manifest in the run (or a managed remote entity with that id)
    Manifest(ManifestId),
    /// A remote entity addressed by its remote id
    Remote(RemoteId),
    /// Not yet resolved; checked when the plan is built
    Unresolved(String),
}

impl LinkTarget {
    pub fn manifest_id(&self) -> Option<&ManifestId> {
        match self {
            Self::Manifest(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for LinkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manifest(id) => write!(f, "{id}"),
            Self::Remote(id) => write!(f, "#{id}"),
            Self::Unresolved(raw) => write!(f, "?{raw}"),
        }
    }
}

/// Value held by a field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    #[default]
    Empty,
    Text(String),
    Multi(Vec<String>),
    Link(LinkTarget),
}

impl FieldValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn as_link(&self) -> Option<&LinkTarget> {
        match self {
            Self::Link(target) => Some(target),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("(empty)"),
            Self::Text(text) => write!(f, "{text:?}"),
            Self::Multi(values) => write!(f, "[{}]", values.join(", ")),
            Self::Link(target) => write!(f, "-> {target}"),
        }
    }
}

/// A typed, named field of an entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub value: FieldValue,
    pub unit: Option<String>,
    pub units: Vec<String>,
    pub options: Vec<String>,
    pub description: Option<String>,
    pub readonly: bool,
    pub required: bool,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            value: FieldValue::Empty,
            unit: None,
            units: Vec::new(),
            options: Vec::new(),
            description: None,
            readonly: false,
            required: false,
        }
    }

    pub fn with_value(mut self, value: FieldValue) -> Self {
        self.value = value;
        self
    }
}

/// A named group of fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldGroup {
    pub name: String,
    pub fields: Vec<FieldSpec>,
}

/// Complete state of one field as laid out on an entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSnapshot {
    pub field: FieldSpec,
    pub position: Option<u32>,
    pub group: Option<String>,
    pub group_id: Option<u32>,
}

/// Fields keyed by name, in display order
pub type FieldLayout = IndexMap<String, FieldSnapshot>;

/// Desired or observed content of an entity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntitySpec {
    pub title: String,
    pub body: Option<String>,
    pub color: Option<String>,
    pub category: Option<LinkTarget>,
    /// Trimmed, sorted and free of duplicates
    pub tags: Vec<String>,
    pub main_fields: Vec<FieldSpec>,
    pub groups: Vec<FieldGroup>,
}

/// Trim, drop empty entries, sort and deduplicate.
pub fn normalize_tags<S: AsRef<str>>(tags: impl IntoIterator<Item = S>) -> Vec<String> {
    let mut tags: Vec<String> = tags
        .into_iter()
        .map(|tag| tag.as_ref().trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect();
    tags.sort_unstable();
    tags.dedup();
    tags
}

impl EntitySpec {
    /// All fields in layout order: main fields, then each group's fields
    pub fn fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.main_fields
            .iter()
            .chain(self.groups.iter().flat_map(|g| g.fields.iter()))
    }

    pub fn fields_mut(&mut self) -> impl Iterator<Item = &mut FieldSpec> {
        self.main_fields
            .iter_mut()
            .chain(self.groups.iter_mut().flat_map(|g| g.fields.iter_mut()))
    }

    /// Every link held by the entity; the category link has no field name
    pub fn links(&self) -> impl Iterator<Item = (Option<&str>, &LinkTarget)> {
        self.category.iter().map(|c| (None, c)).chain(
            self.fields()
                .filter_map(|f| f.value.as_link().map(|t| (Some(f.name.as_str()), t))),
        )
    }

    /// Layout computed from declaration order.
    ///
    /// Positions are 0-based over the flattened order, group ids are
    /// 1-based by group order.
    pub fn layout(&self) -> FieldLayout {
        let mut layout = FieldLayout::new();
        let mut position = 0u32;
        for field in &self.main_fields {
            layout.insert(
                field.name.clone(),
                FieldSnapshot {
                    field: field.clone(),
                    position: Some(position),
                    group: None,
                    group_id: None,
                },
            );
            position += 1;
        }
        for (group_id, group) in (1u32..).zip(&self.groups) {
            for field in &group.fields {
                layout.insert(
                    field.name.clone(),
                    FieldSnapshot {
                        field: field.clone(),
                        position: Some(position),
                        group: Some(group.name.clone()),
                        group_id: Some(group_id),
                    },
                );
                position += 1;
            }
        }
        layout
    }

    /// Rebuild field lists from a stored layout.
    ///
    /// Fields without a resolvable group land in `main_fields`; groups are
    /// ordered by group id.
    pub fn set_layout(&mut self, layout: &FieldLayout) {
        self.main_fields.clear();
        self.groups.clear();

        let mut grouped: Vec<(u32, FieldGroup)> = Vec::new();
        for snapshot in layout.values() {
            match (&snapshot.group, snapshot.group_id) {
                (Some(name), Some(id)) => {
                    if let Some((_, group)) = grouped.iter_mut().find(|(gid, _)| *gid == id) {
                        group.fields.push(snapshot.field.clone());
                    } else {
                        grouped.push((
                            id,
                            FieldGroup {
                                name: name.clone(),
                                fields: vec![snapshot.field.clone()],
                            },
                        ));
                    }
                }
                _ => self.main_fields.push(snapshot.field.clone()),
            }
        }
        grouped.sort_by_key(|(id, _)| *id);
        self.groups = grouped.into_iter().map(|(_, g)| g).collect();
    }
}

/// A validated manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub id: ManifestId,
    pub kind: EntityKind,
    pub spec: EntitySpec,
}

/// Bookkeeping written into every managed entity's metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookkeeping {
    pub manifest_id: ManifestId,
    #[serde(default)]
    pub version: String,
}

/// A decoded remote entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntity {
    pub remote_id: RemoteId,
    pub kind: EntityKind,
    pub spec: EntitySpec,
    /// Layout exactly as stored remotely
    pub layout: FieldLayout,
    /// `None` for entities not created by this tool
    pub bookkeeping: Option<Bookkeeping>,
}

impl RemoteEntity {
    pub fn manifest_id(&self) -> Option<&ManifestId> {
        self.bookkeeping.as_ref().map(|b| &b.manifest_id)
    }

    pub fn is_managed(&self) -> bool {
        self.bookkeeping.is_some()
    }
}

/// Record as returned by the remote store's list endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: RemoteId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub category_id: Option<RemoteId>,
    /// Metadata JSON document, as stored
    #[serde(default)]
    pub metadata: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Body of a create or update call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<RemoteId>,
    pub metadata: String,
    /// Written through the tag endpoints, not with the other attributes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Canonical desired state of one manifest, ready to diff and render
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Desired {
    pub kind: EntityKind,
    pub spec: EntitySpec,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(name: &str) -> FieldSpec {
        FieldSpec::new(name, FieldType::Text)
    }

    #[test]
    fn test_normalize_tags() {
        assert_eq!(
            normalize_tags([" buffer", "stock", "", "buffer ", "acid"]),
            ["acid", "buffer", "stock"]
        );
        assert!(normalize_tags(Vec::<String>::new()).is_empty());
    }

    #[test]
    fn test_kind_parse_accepts_aliases() {
        assert_eq!("item_category".parse::<EntityKind>().unwrap(), EntityKind::ItemCategory);
        assert_eq!(
            "experiments_template".parse::<EntityKind>().unwrap(),
            EntityKind::ExperimentTemplate
        );
        assert!(matches!(
            "sample".parse::<EntityKind>(),
            Err(Error::UnknownKind(kind)) if kind == "sample"
        ));
    }

    #[test]
    fn test_category_kind() {
        assert_eq!(EntityKind::Item.category_kind(), Some(EntityKind::ItemCategory));
        assert_eq!(
            EntityKind::Experiment.category_kind(),
            Some(EntityKind::ExperimentTemplate)
        );
        assert_eq!(EntityKind::ItemCategory.category_kind(), None);
    }

    #[test]
    fn test_layout_positions_and_groups() {
        let spec = EntitySpec {
            title: "t".into(),
            main_fields: vec![text("a"), text("b")],
            groups: vec![
                FieldGroup { name: "g1".into(), fields: vec![text("c")] },
                FieldGroup { name: "g2".into(), fields: vec![text("d"), text("e")] },
            ],
            ..Default::default()
        };

        let layout = spec.layout();
        let names: Vec<_> = layout.keys().cloned().collect();
        assert_eq!(names, ["a", "b", "c", "d", "e"]);
        assert_eq!(layout["a"].position, Some(0));
        assert_eq!(layout["a"].group_id, None);
        assert_eq!(layout["c"].position, Some(2));
        assert_eq!(layout["c"].group_id, Some(1));
        assert_eq!(layout["e"].position, Some(4));
        assert_eq!(layout["e"].group.as_deref(), Some("g2"));
        assert_eq!(layout["e"].group_id, Some(2));
    }

    #[test]
    fn test_set_layout_inverts_layout() {
        let spec = EntitySpec {
            title: "t".into(),
            main_fields: vec![text("a")],
            groups: vec![FieldGroup { name: "g".into(), fields: vec![text("b"), text("c")] }],
            ..Default::default()
        };

        let mut rebuilt = EntitySpec { title: "t".into(), ..Default::default() };
        rebuilt.set_layout(&spec.layout());
        assert_eq!(rebuilt, spec);
    }

    #[test]
    fn test_links_include_category() {
        let spec = EntitySpec {
            title: "t".into(),
            category: Some(LinkTarget::Manifest("type1".into())),
            main_fields: vec![
                FieldSpec::new("ref", FieldType::Items)
                    .with_value(FieldValue::Link(LinkTarget::Remote(7))),
                text("plain"),
            ],
            ..Default::default()
        };

        let links: Vec<_> = spec.links().collect();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0], (None, &LinkTarget::Manifest("type1".into())));
        assert_eq!(links[1], (Some("ref"), &LinkTarget::Remote(7)));
    }
}
