//! Metadata document codec.
//!
//! Every entity carries a JSON metadata document holding its extra fields,
//! their groups and, for entities this tool manages, a bookkeeping block:
//!
//! ```json
//! {
//!   "elabftw": {"extra_fields_groups": [{"id": 1, "name": "Sample"}]},
//!   "extra_fields": {"Mass": {"type": "number", "value": "12", "unit": "g",
//!                             "units": ["g", "kg"], "position": 0, "group_id": 1}},
//!   "elabctl": {"manifest_id": "sample-1", "version": "3f2a9c1"}
//! }
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{
    Bookkeeping, FieldLayout, FieldSnapshot, FieldSpec, FieldType, FieldValue, LinkTarget,
    ManifestId, RemoteId,
};

/// Key of the bookkeeping block inside the metadata document
pub const RESERVED_KEY: &str = "elabctl";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    elabftw: Settings,
    #[serde(default)]
    extra_fields: IndexMap<String, ExtraField>,
    #[serde(default, rename = "elabctl", skip_serializing_if = "Option::is_none")]
    reserved: Option<Reserved>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Settings {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    extra_fields_groups: Vec<GroupEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GroupEntry {
    #[serde(default, deserialize_with = "lenient_u32")]
    id: Option<u32>,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ExtraField {
    #[serde(rename = "type", default)]
    field_type: FieldType,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unit: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    units: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    readonly: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    required: bool,
    #[serde(default, deserialize_with = "lenient_u32", skip_serializing_if = "Option::is_none")]
    position: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32", skip_serializing_if = "Option::is_none")]
    group_id: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Reserved {
    manifest_id: ManifestId,
    #[serde(default)]
    version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    category: Option<Value>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

/// Accept integers, numeric strings and null.
fn lenient_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Result of decoding a metadata document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedMetadata {
    pub layout: FieldLayout,
    pub bookkeeping: Option<Bookkeeping>,
    /// Category link kept in the bookkeeping block
    pub category: Option<LinkTarget>,
}

/// Encode a field layout and optional bookkeeping into a metadata document.
///
/// `resolve` maps link targets to remote ids; links it cannot resolve are
/// written without a value.
pub fn encode(
    layout: &FieldLayout,
    bookkeeping: Option<&Bookkeeping>,
    category: Option<&LinkTarget>,
    resolve: &dyn Fn(&LinkTarget) -> Option<RemoteId>,
) -> serde_json::Result<String> {
    let mut document = Document::default();

    for snapshot in layout.values() {
        if let (Some(id), Some(name)) = (snapshot.group_id, &snapshot.group)
            && !document
                .elabftw
                .extra_fields_groups
                .iter()
                .any(|g| g.id == Some(id))
        {
            document.elabftw.extra_fields_groups.push(GroupEntry {
                id: Some(id),
                name: name.clone(),
            });
        }

        let field = &snapshot.field;
        document.extra_fields.insert(
            field.name.clone(),
            ExtraField {
                field_type: field.field_type,
                value: encode_value(&field.value, resolve),
                unit: field.unit.clone(),
                units: field.units.clone(),
                options: field.options.clone(),
                description: field.description.clone(),
                readonly: field.readonly,
                required: field.required,
                position: snapshot.position,
                group_id: snapshot.group_id,
            },
        );
    }

    document.reserved = bookkeeping.map(|b| Reserved {
        manifest_id: b.manifest_id.clone(),
        version: b.version.clone(),
        category: category.map(encode_link),
    });

    serde_json::to_string(&document)
}

fn encode_value(value: &FieldValue, resolve: &dyn Fn(&LinkTarget) -> Option<RemoteId>) -> Value {
    match value {
        FieldValue::Empty => Value::Null,
        FieldValue::Text(text) => Value::String(text.clone()),
        FieldValue::Multi(values) => {
            Value::Array(values.iter().cloned().map(Value::String).collect())
        }
        FieldValue::Link(target) => match resolve(target) {
            Some(id) => Value::String(id.to_string()),
            None => Value::Null,
        },
    }
}

fn encode_link(target: &LinkTarget) -> Value {
    match target {
        LinkTarget::Manifest(id) => Value::String(id.to_string()),
        LinkTarget::Remote(id) => Value::from(*id),
        LinkTarget::Unresolved(raw) => Value::String(raw.clone()),
    }
}

fn decode_link(value: &Value) -> Option<LinkTarget> {
    match value {
        Value::Number(n) => n.as_u64().map(LinkTarget::Remote),
        Value::String(s) if !s.is_empty() => Some(LinkTarget::Manifest(ManifestId::new(s.clone()))),
        _ => None,
    }
}

/// Decode a metadata document.
///
/// Fields are ordered by stored position; fields without a position follow,
/// by name. A group id missing from the group list decodes as ungrouped.
pub fn decode(raw: &str) -> Result<DecodedMetadata, serde_json::Error> {
    if raw.trim().is_empty() || raw.trim() == "null" {
        return Ok(DecodedMetadata::default());
    }
    let document: Document = serde_json::from_str(raw)?;

    let groups: IndexMap<u32, String> = document
        .elabftw
        .extra_fields_groups
        .into_iter()
        .filter_map(|g| g.id.map(|id| (id, g.name)))
        .collect();

    let mut entries: Vec<(String, ExtraField)> = document.extra_fields.into_iter().collect();
    entries.sort_by(|(a_name, a), (b_name, b)| match (a.position, b.position) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a_name.cmp(b_name),
    });

    let mut layout = FieldLayout::new();
    for (name, extra) in entries {
        let group = extra.group_id.and_then(|id| groups.get(&id).cloned());
        let group_id = if group.is_some() { extra.group_id } else { None };
        let field = FieldSpec {
            name: name.clone(),
            field_type: extra.field_type,
            value: decode_value(extra.field_type, &extra.value),
            unit: extra.unit,
            units: extra.units,
            options: extra.options,
            description: extra.description,
            readonly: extra.readonly,
            required: extra.required,
        };
        layout.insert(
            name,
            FieldSnapshot {
                field,
                position: extra.position,
                group,
                group_id,
            },
        );
    }

    let (bookkeeping, category) = match document.reserved {
        Some(reserved) => (
            Some(Bookkeeping {
                manifest_id: reserved.manifest_id,
                version: reserved.version,
            }),
            reserved.category.as_ref().and_then(decode_link),
        ),
        None => (None, None),
    };

    Ok(DecodedMetadata {
        layout,
        bookkeeping,
        category,
    })
}

fn decode_value(field_type: FieldType, value: &Value) -> FieldValue {
    let text = match value {
        Value::Null => return FieldValue::Empty,
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(true) => "on".to_string(),
        Value::Bool(false) => "off".to_string(),
        Value::Array(values) => {
            return FieldValue::Multi(
                values
                    .iter()
                    .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
                    .collect(),
            );
        }
        Value::Object(_) => value.to_string(),
    };
    if text.is_empty() {
        return FieldValue::Empty;
    }

    if field_type.link_kind().is_some() {
        // Values may be stored as "12" or "12 - Title"
        let head = text.split(" - ").next().unwrap_or_default().trim();
        return match head.parse::<RemoteId>() {
            Ok(id) => FieldValue::Link(LinkTarget::Remote(id)),
            Err(_) => FieldValue::Link(LinkTarget::Unresolved(text)),
        };
    }
    FieldValue::Text(text)
}
