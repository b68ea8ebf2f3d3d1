//! Remote state snapshot: decoded entities, indexed for matching.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::context::RemoteApi;
use crate::error::{Error, Result};
use crate::metadata;
use crate::types::{
    EntityKind, EntitySpec, FieldValue, LinkTarget, ManifestId, RawRecord, RemoteEntity, RemoteId,
    normalize_tags,
};

/// Point-in-time view of every entity in the remote store
#[derive(Debug, Clone, Default)]
pub struct RemoteSnapshot {
    entities: Vec<RemoteEntity>,
    by_remote: HashMap<(EntityKind, RemoteId), usize>,
    by_manifest: IndexMap<ManifestId, Vec<usize>>,
}

impl RemoteSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// List every kind through `api` and decode the result.
    pub fn fetch(api: &dyn RemoteApi) -> Result<Self> {
        let mut records = Vec::new();
        for kind in EntityKind::ALL {
            let listed = api.list(kind)?;
            log::debug!("Listed {} {kind} records", listed.len());
            records.extend(listed.into_iter().map(|r| (kind, r)));
        }
        Self::decode(records)
    }

    /// Decode raw records.
    ///
    /// Records without bookkeeping are kept as unmanaged. Links pointing at
    /// a managed entity of the right kind are rewritten to its manifest id.
    pub fn decode(records: impl IntoIterator<Item = (EntityKind, RawRecord)>) -> Result<Self> {
        let mut entities = Vec::new();
        for (kind, record) in records {
            entities.push(decode_record(kind, record)?);
        }

        let managed: HashMap<(EntityKind, RemoteId), ManifestId> = entities
            .iter()
            .filter_map(|e| e.manifest_id().map(|id| ((e.kind, e.remote_id), id.clone())))
            .collect();

        for entity in &mut entities {
            canonicalize(entity, &managed);
        }

        let mut by_remote = HashMap::new();
        let mut by_manifest: IndexMap<ManifestId, Vec<usize>> = IndexMap::new();
        for (index, entity) in entities.iter().enumerate() {
            by_remote.insert((entity.kind, entity.remote_id), index);
            if let Some(id) = entity.manifest_id() {
                by_manifest.entry(id.clone()).or_default().push(index);
            }
        }

        Ok(Self {
            entities,
            by_remote,
            by_manifest,
        })
    }

    /// All entities, managed or not, in listing order
    pub fn entities(&self) -> impl Iterator<Item = &RemoteEntity> {
        self.entities.iter()
    }

    /// Managed entities of one kind
    pub fn managed(&self, kind: EntityKind) -> impl Iterator<Item = &RemoteEntity> {
        self.entities
            .iter()
            .filter(move |e| e.kind == kind && e.is_managed())
    }

    pub fn unmanaged(&self) -> impl Iterator<Item = &RemoteEntity> {
        self.entities.iter().filter(|e| !e.is_managed())
    }

    /// Every managed entity carrying `id`; more than one means the remote
    /// state is ambiguous
    pub fn by_manifest_id(&self, id: &str) -> Vec<&RemoteEntity> {
        self.by_manifest
            .get(id)
            .map(|indices| indices.iter().map(|&i| &self.entities[i]).collect())
            .unwrap_or_default()
    }

    pub fn by_remote_id(&self, kind: EntityKind, remote_id: RemoteId) -> Option<&RemoteEntity> {
        self.by_remote.get(&(kind, remote_id)).map(|&i| &self.entities[i])
    }

    /// Manifest ids present remotely, in listing order
    pub fn manifest_ids(&self) -> impl Iterator<Item = &ManifestId> {
        self.by_manifest.keys()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

fn decode_record(kind: EntityKind, record: RawRecord) -> Result<RemoteEntity> {
    let raw = record.metadata.as_deref().unwrap_or_default();
    let decoded = match metadata::decode(raw) {
        Ok(decoded) => decoded,
        Err(err) if raw.contains(metadata::RESERVED_KEY) => {
            return Err(Error::Decode {
                kind,
                remote_id: record.id,
                message: err.to_string(),
            });
        }
        Err(err) => {
            log::warn!("Ignoring unreadable metadata on {kind} {}: {err}", record.id);
            metadata::DecodedMetadata::default()
        }
    };

    let category = match kind {
        EntityKind::Item => record.category_id.map(LinkTarget::Remote),
        EntityKind::Experiment => decoded.category,
        EntityKind::ItemCategory | EntityKind::ExperimentTemplate => None,
    };

    let mut spec = EntitySpec {
        title: record.title.trim().to_string(),
        body: record.body.filter(|b| !b.is_empty()),
        color: record.color.filter(|c| !c.is_empty()).map(|c| {
            let hex = c.trim_start_matches('#').to_ascii_lowercase();
            format!("#{hex}")
        }),
        category,
        tags: normalize_tags(&record.tags),
        ..Default::default()
    };
    spec.set_layout(&decoded.layout);

    Ok(RemoteEntity {
        remote_id: record.id,
        kind,
        spec,
        layout: decoded.layout,
        bookkeeping: decoded.bookkeeping,
    })
}

fn canonicalize(entity: &mut RemoteEntity, managed: &HashMap<(EntityKind, RemoteId), ManifestId>) {
    let rewrite = |target: &mut LinkTarget, kind: Option<EntityKind>| {
        let LinkTarget::Remote(remote_id) = *target else {
            return;
        };
        if let Some(id) = kind.and_then(|kind| managed.get(&(kind, remote_id))) {
            *target = LinkTarget::Manifest(id.clone());
        }
    };

    let category_kind = entity.kind.category_kind();
    if let Some(target) = entity.spec.category.as_mut() {
        rewrite(target, category_kind);
    }
    for snapshot in entity.layout.values_mut() {
        let link_kind = snapshot.field.field_type.link_kind();
        if let FieldValue::Link(target) = &mut snapshot.field.value {
            rewrite(target, link_kind);
        }
    }
    for field in entity.spec.fields_mut() {
        let link_kind = field.field_type.link_kind();
        if let FieldValue::Link(target) = &mut field.value {
            rewrite(target, link_kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bookkeeping, FieldSpec, FieldType};

    fn managed_record(id: RemoteId, manifest_id: &str, spec: &EntitySpec) -> RawRecord {
        let bookkeeping = Bookkeeping {
            manifest_id: manifest_id.into(),
            version: "v1".into(),
        };
        RawRecord {
            id,
            title: spec.title.clone(),
            metadata: Some(metadata::encode(
                &spec.layout(),
                Some(&bookkeeping),
                None,
                &|target| match target {
                    LinkTarget::Remote(id) => Some(*id),
                    _ => None,
                },
            )
            .unwrap()),
            ..Default::default()
        }
    }

    fn titled(title: &str) -> EntitySpec {
        EntitySpec {
            title: title.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_unmanaged_records_are_kept() {
        let snapshot = RemoteSnapshot::decode(vec![
            (EntityKind::Item, RawRecord { id: 1, title: "Foreign".into(), ..Default::default() }),
            (EntityKind::Item, managed_record(2, "mine", &titled("Mine"))),
        ])
        .unwrap();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.unmanaged().count(), 1);
        assert_eq!(snapshot.managed(EntityKind::Item).count(), 1);
        assert!(snapshot.by_remote_id(EntityKind::Item, 1).is_some());
        assert_eq!(snapshot.by_manifest_id("mine")[0].remote_id, 2);
        assert!(snapshot.by_manifest_id("nope").is_empty());
    }

    #[test]
    fn test_links_canonicalized_to_manifest_ids() {
        let mut linking = titled("Linking");
        linking.main_fields = vec![
            FieldSpec::new("managed", FieldType::Items)
                .with_value(FieldValue::Link(LinkTarget::Remote(10))),
            FieldSpec::new("foreign", FieldType::Items)
                .with_value(FieldValue::Link(LinkTarget::Remote(11))),
        ];

        let mut item = managed_record(12, "linking", &linking);
        item.category_id = Some(5);

        let snapshot = RemoteSnapshot::decode(vec![
            (EntityKind::ItemCategory, managed_record(5, "type1", &titled("Type"))),
            (EntityKind::Item, managed_record(10, "target", &titled("Target"))),
            (EntityKind::Item, RawRecord { id: 11, title: "Foreign".into(), ..Default::default() }),
            (EntityKind::Item, item),
        ])
        .unwrap();

        let entity = snapshot.by_manifest_id("linking")[0];
        assert_eq!(entity.spec.category, Some(LinkTarget::Manifest("type1".into())));
        assert_eq!(
            entity.layout["managed"].field.value,
            FieldValue::Link(LinkTarget::Manifest("target".into()))
        );
        assert_eq!(
            entity.layout["foreign"].field.value,
            FieldValue::Link(LinkTarget::Remote(11))
        );
        assert_eq!(
            entity.spec.main_fields[0].value,
            FieldValue::Link(LinkTarget::Manifest("target".into()))
        );
    }

    #[test]
    fn test_link_kind_must_match() {
        let mut linking = titled("Linking");
        linking.main_fields = vec![FieldSpec::new("exp", FieldType::Experiments)
            .with_value(FieldValue::Link(LinkTarget::Remote(10)))];

        let snapshot = RemoteSnapshot::decode(vec![
            (EntityKind::Item, managed_record(10, "an-item", &titled("Item"))),
            (EntityKind::Item, managed_record(11, "linking", &linking)),
        ])
        .unwrap();

        let entity = snapshot.by_manifest_id("linking")[0];
        assert_eq!(entity.layout["exp"].field.value, FieldValue::Link(LinkTarget::Remote(10)));
    }

    #[test]
    fn test_unreadable_managed_metadata_is_an_error() {
        let record = RawRecord {
            id: 3,
            title: "Broken".into(),
            metadata: Some(r#"{"elabctl": {"manifest_id": 5"#.into()),
            ..Default::default()
        };
        let err = RemoteSnapshot::decode(vec![(EntityKind::Item, record)]).unwrap_err();
        assert!(matches!(err, Error::Decode { remote_id: 3, .. }));
    }

    #[test]
    fn test_unreadable_foreign_metadata_is_ignored() {
        let record = RawRecord {
            id: 3,
            title: "Foreign".into(),
            metadata: Some("{oops".into()),
            ..Default::default()
        };
        let snapshot = RemoteSnapshot::decode(vec![(EntityKind::Item, record)]).unwrap();
        assert_eq!(snapshot.unmanaged().count(), 1);
    }

    #[test]
    fn test_color_normalized() {
        let record = RawRecord {
            id: 1,
            title: "Type".into(),
            color: Some("29AEB9".into()),
            ..Default::default()
        };
        let snapshot = RemoteSnapshot::decode(vec![(EntityKind::ItemCategory, record)]).unwrap();
        let entity = snapshot.by_remote_id(EntityKind::ItemCategory, 1).unwrap();
        assert_eq!(entity.spec.color.as_deref(), Some("#29aeb9"));
    }

    #[test]
    fn test_tags_normalized() {
        let record = RawRecord {
            id: 2,
            title: "Run".into(),
            tags: vec!["qc".into(), " assay".into(), "qc".into()],
            ..Default::default()
        };
        let snapshot = RemoteSnapshot::decode(vec![(EntityKind::Experiment, record)]).unwrap();
        let entity = snapshot.by_remote_id(EntityKind::Experiment, 2).unwrap();
        assert_eq!(entity.spec.tags, ["assay", "qc"]);
    }
}
