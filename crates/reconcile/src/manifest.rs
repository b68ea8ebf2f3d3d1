//! Manifest model: raw input, validation and the ordered manifest set.

use std::collections::HashSet;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{
    EntityKind, EntitySpec, FieldGroup, FieldSpec, FieldType, FieldValue, LinkTarget, Manifest,
    ManifestId, RemoteEntity, normalize_tags,
};

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid regex"));
static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://[^\s/$.?#][^\s]*$").expect("valid regex"));

/// A manifest as written by the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawManifest {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub spec: RawSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, alias = "template", skip_serializing_if = "Option::is_none")]
    pub category: Option<RawScalar>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<RawFieldEntry>,
    /// Values overlaid on the category's fields
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub field_values: IndexMap<String, RawFieldValue>,
}

/// Either a field or a named group of fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawFieldEntry {
    Group(RawGroup),
    Field(RawField),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawGroup {
    pub group: String,
    pub fields: Vec<RawField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawField {
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<RawScalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub units: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub readonly: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    /// Alternative to nesting the field under a group entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// A scalar as it appears in YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawScalar {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    List(Vec<String>),
}

/// Value given through `field_values`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawFieldValue {
    WithUnit {
        value: RawScalar,
        #[serde(default)]
        unit: Option<String>,
    },
    Plain(RawScalar),
}

/// Validated manifests in declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestSet {
    manifests: IndexMap<ManifestId, Manifest>,
}

impl ManifestSet {
    /// Validate raw manifests and build the set.
    ///
    /// Fails on the first error; no partial set is returned.
    pub fn from_raw(raw: Vec<RawManifest>) -> Result<Self> {
        let mut declared: IndexMap<ManifestId, (EntityKind, RawSpec)> = IndexMap::new();
        for manifest in raw {
            let kind: EntityKind = manifest.kind.parse()?;
            let id = ManifestId::new(manifest.id);
            if id.as_str().trim().is_empty() {
                return Err(Error::invalid(&id, "manifest id must not be empty"));
            }
            if declared.contains_key(&id) {
                return Err(Error::DuplicateId { id });
            }
            declared.insert(id, (kind, manifest.spec));
        }

        let ids: HashSet<&str> = declared.keys().map(ManifestId::as_str).collect();
        let mut manifests = IndexMap::new();
        for (id, (kind, raw_spec)) in &declared {
            let spec = build_spec(id, *kind, raw_spec, &declared, &ids)?;
            log::debug!("Validated {kind} manifest '{id}'");
            manifests.insert(
                id.clone(),
                Manifest {
                    id: id.clone(),
                    kind: *kind,
                    spec,
                },
            );
        }
        Ok(Self { manifests })
    }

    pub fn from_manifests(manifests: impl IntoIterator<Item = Manifest>) -> Result<Self> {
        let mut set = IndexMap::new();
        for manifest in manifests {
            if set.contains_key(&manifest.id) {
                return Err(Error::DuplicateId { id: manifest.id });
            }
            set.insert(manifest.id.clone(), manifest);
        }
        Ok(Self { manifests: set })
    }

    pub fn get(&self, id: &str) -> Option<&Manifest> {
        self.manifests.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.manifests.contains_key(id)
    }

    /// Position of a manifest in declaration order
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.manifests.get_index_of(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Manifest> {
        self.manifests.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ManifestId> {
        self.manifests.keys()
    }

    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }
}

fn build_spec(
    id: &ManifestId,
    kind: EntityKind,
    raw: &RawSpec,
    declared: &IndexMap<ManifestId, (EntityKind, RawSpec)>,
    ids: &HashSet<&str>,
) -> Result<EntitySpec> {
    let title = raw
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::invalid(id, "spec.title is required"))?
        .to_string();

    let color = match (&raw.color, kind.is_category()) {
        (Some(_), false) => {
            return Err(Error::invalid(id, format!("a {kind} cannot have a color")));
        }
        (Some(color), true) => Some(normalize_color(id, color)?),
        (None, _) => None,
    };

    let category = match (&raw.category, kind.category_kind()) {
        (Some(_), None) => {
            return Err(Error::invalid(id, format!("a {kind} cannot have a category")));
        }
        (Some(value), Some(_)) => Some(parse_link(id, None, value, ids)?),
        (None, _) if kind == EntityKind::Item => {
            return Err(Error::invalid(id, "an item requires a category"));
        }
        (None, _) => None,
    };

    let entries = if raw.field_values.is_empty() {
        raw.fields.clone()
    } else {
        if !raw.fields.is_empty() {
            return Err(Error::invalid(
                id,
                "use either fields or field_values, not both",
            ));
        }
        inherit_fields(id, kind, raw, declared)?
    };

    let (main_fields, groups) = build_fields(id, &entries, ids)?;

    Ok(EntitySpec {
        title,
        body: raw.body.clone().filter(|b| !b.is_empty()),
        color,
        category,
        tags: normalize_tags(&raw.tags),
        main_fields,
        groups,
    })
}

/// Copy the category's field layout and overlay `field_values`.
fn inherit_fields(
    id: &ManifestId,
    kind: EntityKind,
    raw: &RawSpec,
    declared: &IndexMap<ManifestId, (EntityKind, RawSpec)>,
) -> Result<Vec<RawFieldEntry>> {
    let Some(expected) = kind.category_kind() else {
        return Err(Error::invalid(
            id,
            format!("a {kind} has no category to inherit fields from"),
        ));
    };
    let category_id = match &raw.category {
        Some(RawScalar::Str(s)) => s.as_str(),
        _ => {
            return Err(Error::invalid(
                id,
                "field_values requires category to name a declared manifest",
            ));
        }
    };
    let Some((category_kind, category_spec)) = declared.get(category_id) else {
        return Err(Error::invalid(
            id,
            format!("field_values requires category '{category_id}' to be a declared manifest"),
        ));
    };
    if *category_kind != expected {
        return Err(Error::ReferenceKind {
            from: id.clone(),
            field: None,
            target: category_id.to_string(),
            expected,
            found: *category_kind,
        });
    }

    let mut entries = category_spec.fields.clone();
    for (name, value) in &raw.field_values {
        let field = entries
            .iter_mut()
            .flat_map(|entry| match entry {
                RawFieldEntry::Group(group) => group.fields.iter_mut().collect::<Vec<_>>(),
                RawFieldEntry::Field(field) => vec![field],
            })
            .find(|field| &field.name == name)
            .ok_or_else(|| {
                Error::invalid(
                    id,
                    format!("field_values names '{name}' which category '{category_id}' does not define"),
                )
            })?;
        match value {
            RawFieldValue::WithUnit { value, unit } => {
                field.value = Some(value.clone());
                if unit.is_some() {
                    field.unit.clone_from(unit);
                }
            }
            RawFieldValue::Plain(value) => field.value = Some(value.clone()),
        }
    }
    Ok(entries)
}

fn build_fields(
    id: &ManifestId,
    entries: &[RawFieldEntry],
    ids: &HashSet<&str>,
) -> Result<(Vec<FieldSpec>, Vec<FieldGroup>)> {
    let mut main_fields = Vec::new();
    let mut groups: Vec<FieldGroup> = Vec::new();
    let mut seen = HashSet::new();

    let mut place = |group: Option<&str>, field: FieldSpec| -> Result<()> {
        if !seen.insert(field.name.clone()) {
            return Err(Error::DuplicateField {
                id: id.clone(),
                field: field.name,
            });
        }
        match group {
            None => main_fields.push(field),
            Some(name) => match groups.iter_mut().find(|g| g.name == name) {
                Some(existing) => existing.fields.push(field),
                None => groups.push(FieldGroup {
                    name: name.to_string(),
                    fields: vec![field],
                }),
            },
        }
        Ok(())
    };

    for entry in entries {
        match entry {
            RawFieldEntry::Field(raw) => {
                place(raw.group.as_deref(), build_field(id, raw, ids)?)?;
            }
            RawFieldEntry::Group(group) => {
                if group.fields.is_empty() {
                    log::debug!("Ignoring empty group '{}' in '{id}'", group.group);
                }
                for raw in &group.fields {
                    let name = raw.group.as_deref().unwrap_or(&group.group);
                    place(Some(name), build_field(id, raw, ids)?)?;
                }
            }
        }
    }
    Ok((main_fields, groups))
}

fn build_field(id: &ManifestId, raw: &RawField, ids: &HashSet<&str>) -> Result<FieldSpec> {
    let name = raw.name.trim();
    if name.is_empty() {
        return Err(Error::invalid(id, "field name must not be empty"));
    }

    let value = match &raw.value {
        None => FieldValue::Empty,
        Some(value) if raw.field_type.link_kind().is_some() => {
            FieldValue::Link(parse_link(id, Some(name), value, ids)?)
        }
        Some(value) => scalar_value(id, name, raw.field_type, value)?,
    };

    let field = FieldSpec {
        name: name.to_string(),
        field_type: raw.field_type,
        value,
        unit: raw.unit.clone(),
        units: raw.units.clone(),
        options: raw.options.clone(),
        description: raw.description.clone(),
        readonly: raw.readonly,
        required: raw.required,
    };
    validate_field(id, &field)?;
    Ok(field)
}

fn scalar_value(
    id: &ManifestId,
    name: &str,
    field_type: FieldType,
    value: &RawScalar,
) -> Result<FieldValue> {
    let text = match value {
        RawScalar::Str(s) => s.clone(),
        RawScalar::Int(n) => n.to_string(),
        RawScalar::Float(x) => x.to_string(),
        RawScalar::Bool(true) if field_type == FieldType::Checkbox => "on".to_string(),
        RawScalar::Bool(false) if field_type == FieldType::Checkbox => "off".to_string(),
        RawScalar::Bool(b) => b.to_string(),
        RawScalar::List(values) => {
            if field_type != FieldType::Select {
                return Err(Error::invalid_field(
                    id,
                    name,
                    format!("a {field_type} field cannot hold several values"),
                ));
            }
            return Ok(FieldValue::Multi(values.clone()));
        }
    };
    Ok(if text.is_empty() {
        FieldValue::Empty
    } else {
        FieldValue::Text(text)
    })
}

/// Classify a link value against the declared manifest ids.
fn parse_link(
    id: &ManifestId,
    field: Option<&str>,
    value: &RawScalar,
    ids: &HashSet<&str>,
) -> Result<LinkTarget> {
    let raw = match value {
        RawScalar::Str(s) => s.trim().to_string(),
        RawScalar::Int(n) => n.to_string(),
        other => {
            let message = format!("expected a manifest id or remote id, got {other:?}");
            return Err(match field {
                Some(name) => Error::invalid_field(id, name, message),
                None => Error::invalid(id, format!("category: {message}")),
            });
        }
    };
    if ids.contains(raw.as_str()) {
        return Ok(LinkTarget::Manifest(ManifestId::new(raw)));
    }
    Ok(match raw.parse::<u64>() {
        Ok(remote_id) => LinkTarget::Remote(remote_id),
        Err(_) => LinkTarget::Unresolved(raw),
    })
}

fn validate_field(id: &ManifestId, field: &FieldSpec) -> Result<()> {
    let fail = |message: String| Err(Error::invalid_field(id, &field.name, message));

    if let Some(unit) = &field.unit {
        if field.units.is_empty() {
            return fail(format!("unit '{unit}' given without a units list"));
        }
        if !field.units.contains(unit) {
            return fail(format!("unit '{unit}' is not one of {:?}", field.units));
        }
    }

    if matches!(field.field_type, FieldType::Radio | FieldType::Select) && field.options.is_empty()
    {
        return fail(format!("a {} field needs options", field.field_type));
    }

    let text = match &field.value {
        FieldValue::Text(text) => text.as_str(),
        FieldValue::Multi(values) => {
            if let Some(bad) = values.iter().find(|v| !field.options.contains(v)) {
                return fail(format!("'{bad}' is not one of {:?}", field.options));
            }
            return Ok(());
        }
        FieldValue::Empty | FieldValue::Link(_) => return Ok(()),
    };

    let valid = match field.field_type {
        FieldType::Number => text.trim().parse::<f64>().is_ok(),
        FieldType::Date => chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok(),
        FieldType::DatetimeLocal => {
            chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M").is_ok()
        }
        FieldType::Time => chrono::NaiveTime::parse_from_str(text, "%H:%M").is_ok(),
        FieldType::Email => EMAIL_RE.is_match(text),
        FieldType::Url => URL_RE.is_match(text),
        FieldType::Checkbox => matches!(text, "on" | "off"),
        FieldType::Radio | FieldType::Select => field.options.iter().any(|o| o == text),
        FieldType::Text | FieldType::Items | FieldType::Experiments => true,
    };
    if valid {
        Ok(())
    } else {
        fail(format!("'{text}' is not a valid {} value", field.field_type))
    }
}

/// Colors are stored with a leading '#', six hex digits.
fn normalize_color(id: &ManifestId, color: &str) -> Result<String> {
    let hex = color.trim().trim_start_matches('#');
    if hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(format!("#{}", hex.to_ascii_lowercase()))
    } else {
        Err(Error::invalid(id, format!("'{color}' is not a hex color")))
    }
}

impl RawManifest {
    /// Express a remote entity as a manifest, using its bookkeeping id when
    /// it has one.
    pub fn from_remote(entity: &RemoteEntity) -> Self {
        let id = entity
            .manifest_id()
            .map_or_else(|| format!("{}-{}", entity.kind, entity.remote_id), ToString::to_string);
        let spec = &entity.spec;

        let mut fields: Vec<RawFieldEntry> = spec
            .main_fields
            .iter()
            .map(|f| RawFieldEntry::Field(raw_field(f)))
            .collect();
        fields.extend(spec.groups.iter().map(|g| {
            RawFieldEntry::Group(RawGroup {
                group: g.name.clone(),
                fields: g.fields.iter().map(raw_field).collect(),
            })
        }));

        Self {
            id,
            kind: entity.kind.as_str().to_string(),
            spec: RawSpec {
                title: Some(spec.title.clone()),
                body: spec.body.clone(),
                color: spec.color.clone(),
                category: spec.category.as_ref().map(raw_link),
                tags: spec.tags.clone(),
                fields,
                field_values: IndexMap::new(),
            },
        }
    }
}

fn raw_field(field: &FieldSpec) -> RawField {
    RawField {
        name: field.name.clone(),
        field_type: field.field_type,
        value: match &field.value {
            FieldValue::Empty => None,
            FieldValue::Text(text) => Some(RawScalar::Str(text.clone())),
            FieldValue::Multi(values) => Some(RawScalar::List(values.clone())),
            FieldValue::Link(target) => Some(raw_link(target)),
        },
        unit: field.unit.clone(),
        units: field.units.clone(),
        options: field.options.clone(),
        description: field.description.clone(),
        readonly: field.readonly,
        required: field.required,
        group: None,
    }
}

fn raw_link(target: &LinkTarget) -> RawScalar {
    match target {
        LinkTarget::Manifest(id) => RawScalar::Str(id.to_string()),
        LinkTarget::Remote(id) => {
            RawScalar::Int(i64::try_from(*id).unwrap_or(i64::MAX))
        }
        LinkTarget::Unresolved(raw) => RawScalar::Str(raw.clone()),
    }
}
