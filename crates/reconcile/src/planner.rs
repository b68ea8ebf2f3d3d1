//! Plan builder
//!
//! Turns a manifest set and a remote snapshot into an ordered list of
//! entries. Building a plan never touches the remote store.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::diff::{Action, ChangeSet, diff_entity, diff_removal};
use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::manifest::ManifestSet;
use crate::metadata;
use crate::remote::RemoteSnapshot;
use crate::summary::PlanSummary;
use crate::types::{
    Bookkeeping, Desired, EntityKind, EntitySpec, FieldValue, LinkTarget, Manifest, ManifestId,
    Payload, RemoteEntity, RemoteId,
};

/// Options for plan building
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// Version tag written into every created or updated entity
    pub version: String,
    /// Delete managed entities that no manifest declares
    pub prune: bool,
}

/// A reference that cannot be rendered until its target exists
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeferredRef {
    /// Field holding the reference, `None` for the category
    pub field: Option<String>,
    pub target: ManifestId,
}

/// One planned operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    pub target: ManifestId,
    pub kind: EntityKind,
    pub action: Action,
    pub changes: ChangeSet,
    /// Known for everything except creates
    pub remote_id: Option<RemoteId>,
    /// Canonical desired state, absent for deletes
    pub desired: Option<Desired>,
    /// Payload with deferred references left empty
    pub payload: Option<Payload>,
    pub deferred: Vec<DeferredRef>,
    /// Entries that must succeed before this one runs
    pub depends_on: Vec<ManifestId>,
    /// Dependency depth; entries of equal level are independent
    pub level: usize,
}

/// A managed remote entity no manifest declares
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Orphan {
    pub id: ManifestId,
    pub kind: EntityKind,
    pub remote_id: RemoteId,
}

/// Ordered, immutable set of changes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub entries: Vec<PlanEntry>,
    pub orphans: Vec<Orphan>,
    /// Entities spared from deletion because a surviving entity links to them
    pub retained: Vec<Orphan>,
    /// Owed references by manifest id
    pub deferred: IndexMap<ManifestId, Vec<DeferredRef>>,
    /// Remote ids of managed entities that already exist
    pub known_ids: IndexMap<ManifestId, RemoteId>,
}

impl Plan {
    /// Check if applying the plan would change anything
    pub fn has_changes(&self) -> bool {
        self.entries.iter().any(|e| e.action.is_change())
    }

    pub fn entry(&self, id: &str) -> Option<&PlanEntry> {
        self.entries.iter().find(|e| e.target.as_str() == id)
    }

    /// Entries that change remote state
    pub fn changes(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries.iter().filter(|e| e.action.is_change())
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary::from_plan(self)
    }
}

/// Build the plan converging remote state onto `manifests`.
///
/// Fails without a partial plan on unresolved or mistyped references,
/// dependency cycles and ambiguous remote matches.
pub fn build_plan(
    manifests: &ManifestSet,
    snapshot: &RemoteSnapshot,
    options: &PlanOptions,
) -> Result<Plan> {
    let mut canonical: IndexMap<&ManifestId, EntitySpec> = IndexMap::new();
    for manifest in manifests.iter() {
        canonical.insert(&manifest.id, resolve_links(manifest, manifests, snapshot)?);
    }

    let graph = DependencyGraph::from_manifests(manifests);
    let order = graph.topological_order()?;
    let levels = graph.levels()?;

    check_matches(manifests, snapshot)?;

    let known_ids: IndexMap<ManifestId, RemoteId> = snapshot
        .manifest_ids()
        .filter_map(|id| match snapshot.by_manifest_id(id.as_str()).as_slice() {
            [entity] => Some((id.clone(), entity.remote_id)),
            _ => None,
        })
        .collect();
    let resolve = |target: &LinkTarget| match target {
        LinkTarget::Manifest(id) => known_ids.get(id).copied(),
        LinkTarget::Remote(id) => Some(*id),
        LinkTarget::Unresolved(_) => None,
    };

    let mut plan = Plan::default();
    let mut max_level = 0;
    for id in &order {
        let Some(manifest) = manifests.get(id.as_str()) else {
            continue;
        };
        let remote = snapshot.by_manifest_id(id.as_str()).into_iter().next();
        let desired = Desired {
            kind: manifest.kind,
            spec: canonical.get(id).cloned().unwrap_or_default(),
            version: options.version.clone(),
        };
        let changes = diff_entity(&desired, remote);
        let action = changes.action;

        let (payload, deferred) = render(id, &desired, &resolve)?;
        let level = levels.get(id).copied().unwrap_or_default();
        max_level = max_level.max(level);

        log::debug!("Planned {action} for {} '{id}'", manifest.kind);
        if !deferred.is_empty() {
            plan.deferred.insert(id.clone(), deferred.clone());
        }
        plan.entries.push(PlanEntry {
            target: id.clone(),
            kind: manifest.kind,
            action,
            changes,
            remote_id: remote.map(|r| r.remote_id),
            desired: Some(desired),
            payload: action.is_change().then_some(payload),
            deferred,
            depends_on: graph.dependencies(id.as_str()).cloned().collect(),
            level,
        });
    }

    let orphans: Vec<&RemoteEntity> = snapshot
        .entities()
        .filter(|e| e.manifest_id().is_some_and(|id| !manifests.contains(id.as_str())))
        .collect();
    plan.orphans = orphans
        .iter()
        .filter_map(|e| {
            e.manifest_id().map(|id| Orphan {
                id: id.clone(),
                kind: e.kind,
                remote_id: e.remote_id,
            })
        })
        .collect();
    if !plan.orphans.is_empty() && !options.prune {
        log::info!("{} managed entities have no manifest", plan.orphans.len());
    }

    if options.prune {
        let survivors = canonical.values().chain(
            snapshot
                .entities()
                .filter(|e| !e.is_managed())
                .map(|e| &e.spec),
        );
        let (doomed, retained) = split_referenced(&orphans, survivors);
        plan.retained = retained;
        let base = if plan.entries.is_empty() { 0 } else { max_level + 1 };
        plan.entries.extend(delete_entries(&doomed, base)?);
    }

    plan.known_ids = known_ids;
    Ok(plan)
}

/// Plan deleting managed entities, dependents first.
///
/// With `scope`, only entities whose manifest id is in it are deleted;
/// otherwise every managed entity is.
pub fn build_destroy_plan(snapshot: &RemoteSnapshot, scope: Option<&ManifestSet>) -> Result<Plan> {
    for id in snapshot.manifest_ids() {
        let matches = snapshot.by_manifest_id(id.as_str());
        if matches.len() > 1 {
            return Err(ambiguous(id, &matches));
        }
    }

    let in_scope = |e: &RemoteEntity| {
        e.manifest_id()
            .is_some_and(|id| scope.is_none_or(|set| set.contains(id.as_str())))
    };
    let targets: Vec<&RemoteEntity> = snapshot.entities().filter(|&e| in_scope(e)).collect();
    let survivors = snapshot
        .entities()
        .filter(|&e| !in_scope(e))
        .map(|e| &e.spec);
    let (doomed, retained) = split_referenced(&targets, survivors);

    Ok(Plan {
        entries: delete_entries(&doomed, 0)?,
        retained,
        known_ids: targets
            .iter()
            .filter_map(|e| e.manifest_id().map(|id| (id.clone(), e.remote_id)))
            .collect(),
        ..Plan::default()
    })
}

/// Split deletion candidates into those safe to delete and those a
/// surviving spec still links to, directly or through another kept
/// candidate.
fn split_referenced<'a, 's>(
    candidates: &[&'a RemoteEntity],
    survivors: impl Iterator<Item = &'s EntitySpec>,
) -> (Vec<&'a RemoteEntity>, Vec<Orphan>) {
    let by_id: HashMap<&ManifestId, &RemoteEntity> = candidates
        .iter()
        .filter_map(|e| e.manifest_id().map(|id| (id, *e)))
        .collect();

    let mut kept: HashSet<ManifestId> = HashSet::new();
    let mut pending: Vec<ManifestId> = survivors
        .flat_map(|spec| spec.links().filter_map(|(_, target)| target.manifest_id().cloned()))
        .collect();
    while let Some(id) = pending.pop() {
        let Some(entity) = by_id.get(&id) else {
            continue;
        };
        if kept.insert(id) {
            pending.extend(
                entity
                    .spec
                    .links()
                    .filter_map(|(_, target)| target.manifest_id().cloned()),
            );
        }
    }

    let mut doomed = Vec::with_capacity(candidates.len());
    let mut retained = Vec::new();
    for entity in candidates {
        let Some(id) = entity.manifest_id() else {
            continue;
        };
        if kept.contains(id) {
            log::warn!(
                "Keeping {} '{id}' (#{}): still referenced",
                entity.kind,
                entity.remote_id
            );
            retained.push(Orphan {
                id: id.clone(),
                kind: entity.kind,
                remote_id: entity.remote_id,
            });
        } else {
            doomed.push(*entity);
        }
    }
    (doomed, retained)
}

fn delete_entries(entities: &[&RemoteEntity], base_level: usize) -> Result<Vec<PlanEntry>> {
    let graph = DependencyGraph::from_remote(entities);
    let mut order = graph.topological_order()?;
    order.reverse();

    // Level counted from the dependents' side: nothing depends on level 0
    let mut levels: IndexMap<&ManifestId, usize> = IndexMap::new();
    let mut entries = Vec::with_capacity(order.len());
    for id in &order {
        let Some(entity) = entities
            .iter()
            .find(|e| e.manifest_id() == Some(id))
        else {
            continue;
        };
        let dependents = graph.dependents(id.as_str());
        let level = dependents
            .iter()
            .filter_map(|d| levels.get(*d))
            .max()
            .map_or(0, |deepest| deepest + 1);
        levels.insert(id, level);

        log::debug!("Planned delete for {} '{id}'", entity.kind);
        entries.push(PlanEntry {
            target: id.clone(),
            kind: entity.kind,
            action: Action::Delete,
            changes: diff_removal(entity),
            remote_id: Some(entity.remote_id),
            desired: None,
            payload: None,
            deferred: Vec::new(),
            depends_on: dependents.into_iter().cloned().collect(),
            level: base_level + level,
        });
    }
    Ok(entries)
}

/// Render the payload for `desired`; references `resolve` cannot answer
/// are returned as deferred and left empty in the payload.
pub(crate) fn render(
    id: &ManifestId,
    desired: &Desired,
    resolve: &dyn Fn(&LinkTarget) -> Option<RemoteId>,
) -> Result<(Payload, Vec<DeferredRef>)> {
    let deferred: Vec<DeferredRef> = desired
        .spec
        .links()
        .filter(|(_, target)| resolve(target).is_none())
        .filter_map(|(field, target)| {
            target.manifest_id().map(|target| DeferredRef {
                field: field.map(str::to_string),
                target: target.clone(),
            })
        })
        .collect();

    let bookkeeping = Bookkeeping {
        manifest_id: id.clone(),
        version: desired.version.clone(),
    };
    let stored_category = match desired.kind {
        EntityKind::Experiment => desired.spec.category.as_ref(),
        _ => None,
    };
    let payload = Payload {
        title: desired.spec.title.clone(),
        body: desired.spec.body.clone(),
        color: desired.spec.color.clone(),
        category_id: desired.spec.category.as_ref().and_then(resolve),
        metadata: metadata::encode(
            &desired.spec.layout(),
            Some(&bookkeeping),
            stored_category,
            resolve,
        )
        .map_err(|e| Error::Encode {
            id: id.clone(),
            message: e.to_string(),
        })?,
        tags: desired.spec.tags.clone(),
    };
    Ok((payload, deferred))
}

/// Canonical copy of a manifest's spec: every link names a manifest id when
/// the target is managed, a remote id otherwise.
fn resolve_links(
    manifest: &Manifest,
    manifests: &ManifestSet,
    snapshot: &RemoteSnapshot,
) -> Result<EntitySpec> {
    let mut spec = manifest.spec.clone();
    if let (Some(expected), Some(target)) = (manifest.kind.category_kind(), spec.category.as_mut()) {
        *target = resolve_target(&manifest.id, None, target, expected, manifests, snapshot)?;
    }
    for field in spec.fields_mut() {
        let Some(expected) = field.field_type.link_kind() else {
            continue;
        };
        if let FieldValue::Link(target) = &mut field.value {
            *target = resolve_target(
                &manifest.id,
                Some(&field.name),
                target,
                expected,
                manifests,
                snapshot,
            )?;
        }
    }
    Ok(spec)
}

fn resolve_target(
    from: &ManifestId,
    field: Option<&str>,
    target: &LinkTarget,
    expected: EntityKind,
    manifests: &ManifestSet,
    snapshot: &RemoteSnapshot,
) -> Result<LinkTarget> {
    let unresolved = |raw: String| Error::UnresolvedReference {
        from: from.clone(),
        field: field.map(str::to_string),
        target: raw,
    };
    let mistyped = |raw: String, found: EntityKind| Error::ReferenceKind {
        from: from.clone(),
        field: field.map(str::to_string),
        target: raw,
        expected,
        found,
    };

    match target {
        LinkTarget::Manifest(id) => {
            let manifest = manifests
                .get(id.as_str())
                .ok_or_else(|| unresolved(id.to_string()))?;
            if manifest.kind != expected {
                return Err(mistyped(id.to_string(), manifest.kind));
            }
            Ok(target.clone())
        }
        LinkTarget::Remote(remote_id) => {
            let entity = snapshot
                .by_remote_id(expected, *remote_id)
                .ok_or_else(|| unresolved(remote_id.to_string()))?;
            Ok(entity
                .manifest_id()
                .map_or(LinkTarget::Remote(*remote_id), |id| {
                    LinkTarget::Manifest(id.clone())
                }))
        }
        LinkTarget::Unresolved(raw) => match snapshot.by_manifest_id(raw).as_slice() {
            [] => Err(unresolved(raw.clone())),
            [entity] if entity.kind == expected => {
                Ok(LinkTarget::Manifest(ManifestId::new(raw.clone())))
            }
            [entity] => Err(mistyped(raw.clone(), entity.kind)),
            many => Err(ambiguous(&ManifestId::new(raw.clone()), many)),
        },
    }
}

/// At most one remote entity may carry a manifest id, and it must be of the
/// manifest's kind.
fn check_matches(manifests: &ManifestSet, snapshot: &RemoteSnapshot) -> Result<()> {
    for id in snapshot.manifest_ids() {
        let matches = snapshot.by_manifest_id(id.as_str());
        if matches.len() > 1 {
            return Err(ambiguous(id, &matches));
        }
    }
    for manifest in manifests.iter() {
        if let [entity] = snapshot.by_manifest_id(manifest.id.as_str()).as_slice()
            && entity.kind != manifest.kind
        {
            return Err(Error::KindMismatch {
                id: manifest.id.clone(),
                expected: manifest.kind,
                found: entity.kind,
                remote_id: entity.remote_id,
            });
        }
    }
    Ok(())
}

fn ambiguous(id: &ManifestId, matches: &[&RemoteEntity]) -> Error {
    Error::AmbiguousMatch {
        id: id.clone(),
        remote: matches.iter().map(|e| (e.kind, e.remote_id)).collect(),
    }
}
