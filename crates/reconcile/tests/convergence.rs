//! Full plan/apply cycles against the in-memory remote.

use reconcile::{
    Action, Attribute, EntityKind, Error, ExecuteOptions, FieldValue, InMemoryRemote, LinkTarget,
    ManifestSet, NoProgress, Plan, PlanOptions, RawManifest, RemoteSnapshot, Value, apply,
    build_destroy_plan, build_plan, metadata,
};
use serde_json::json;

fn manifests(value: serde_json::Value) -> ManifestSet {
    let raw: Vec<RawManifest> = serde_json::from_value(value).unwrap();
    ManifestSet::from_raw(raw).unwrap()
}

fn options(version: &str) -> PlanOptions {
    PlanOptions {
        version: version.into(),
        prune: false,
    }
}

fn plan(set: &ManifestSet, remote: &InMemoryRemote, options: &PlanOptions) -> Plan {
    let snapshot = RemoteSnapshot::fetch(remote).unwrap();
    build_plan(set, &snapshot, options).unwrap()
}

fn run(plan: &Plan, remote: &InMemoryRemote) -> reconcile::ExecutionReport {
    apply(plan, remote, &ExecuteOptions::default(), &mut NoProgress)
}

fn order(plan: &Plan) -> Vec<&str> {
    plan.entries.iter().map(|e| e.target.as_str()).collect()
}

fn lab() -> ManifestSet {
    manifests(json!([
        {
            "id": "item1",
            "kind": "item",
            "spec": {
                "title": "Buffer A",
                "category": "type1",
                "fields": [{"name": "ref", "type": "items", "value": "item2"}]
            }
        },
        {
            "id": "type1",
            "kind": "items_type",
            "spec": {
                "title": "Reagent",
                "color": "#29aeb9",
                "fields": [
                    {"name": "Supplier"},
                    {"group": "Physical", "fields": [
                        {"name": "Mass", "type": "number", "unit": "g", "units": ["g", "kg"]},
                        {"name": "State", "type": "select", "options": ["solid", "liquid"], "value": "solid"}
                    ]}
                ]
            }
        },
        {
            "id": "item2",
            "kind": "item",
            "spec": {"title": "Buffer B", "category": "type1", "body": "<p>stock</p>"}
        },
        {
            "id": "tpl",
            "kind": "experiments_template",
            "spec": {"title": "Assay"}
        },
        {
            "id": "exp1",
            "kind": "experiment",
            "spec": {
                "title": "Run 1",
                "template": "tpl",
                "fields": [{"name": "sample", "type": "items", "value": "item1"}]
            }
        }
    ]))
}

#[test]
fn forward_reference_is_resolved_after_creation() {
    let remote = InMemoryRemote::new();
    let set = lab();
    let plan = plan(&set, &remote, &options("v1"));

    let position = |id: &str| order(&plan).iter().position(|t| *t == id).unwrap();
    assert!(position("type1") < position("item2"));
    assert!(position("item2") < position("item1"));
    assert!(plan.entries.iter().all(|e| e.action == Action::Create));
    assert!(
        plan.deferred["item1"]
            .iter()
            .any(|d| d.field.as_deref() == Some("ref") && d.target.as_str() == "item2")
    );

    let report = run(&plan, &remote);
    assert!(report.is_success(), "{report:?}");

    let item1 = remote
        .record(EntityKind::Item, report.created_ids["item1"])
        .unwrap();
    let stored = metadata::decode(item1.metadata.as_deref().unwrap()).unwrap();
    assert_eq!(
        stored.layout["ref"].field.value,
        FieldValue::Link(LinkTarget::Remote(report.created_ids["item2"]))
    );
    assert_eq!(item1.category_id, Some(report.created_ids["type1"]));
}

#[test]
fn second_apply_is_a_noop() {
    let remote = InMemoryRemote::new();
    let set = lab();
    let first = plan(&set, &remote, &options("v1"));
    let report = run(&first, &remote);
    assert!(report.is_success());

    let mutations = remote.mutations();
    let second = plan(&set, &remote, &options("v1"));
    assert!(!second.has_changes(), "{:#?}", second.summary());
    assert_eq!(second.summary().unchanged, set.len());

    let report = run(&second, &remote);
    assert_eq!(report.unchanged, set.len());
    assert_eq!(remote.mutations(), mutations);
}

#[test]
fn parallel_apply_converges_too() {
    let remote = InMemoryRemote::new();
    let set = lab();
    let options_v1 = options("v1");
    let report = apply(
        &plan(&set, &remote, &options_v1),
        &remote,
        &ExecuteOptions {
            jobs: 4,
            ..ExecuteOptions::default()
        },
        &mut NoProgress,
    );
    assert!(report.is_success());
    assert!(!plan(&set, &remote, &options_v1).has_changes());
}

#[test]
fn new_version_updates_everything() {
    let remote = InMemoryRemote::new();
    let set = lab();
    run(&plan(&set, &remote, &options("v1")), &remote);

    let next = plan(&set, &remote, &options("v2"));
    assert!(next.entries.iter().all(|e| e.action == Action::Update));
    assert!(next.entries.iter().all(|e| e.changes.len() == 1));
}

#[test]
fn plans_are_deterministic() {
    let remote = InMemoryRemote::new();
    let set = lab();
    let a = plan(&set, &remote, &options("v1"));
    let b = plan(&set, &remote, &options("v1"));
    assert_eq!(a, b);
    assert_eq!(format!("{a:?}"), format!("{b:?}"));
}

#[test]
fn every_dependency_precedes_its_dependent() {
    let remote = InMemoryRemote::new();
    let set = lab();
    let plan = plan(&set, &remote, &options("v1"));
    let order = order(&plan);
    for entry in &plan.entries {
        let own = order.iter().position(|t| *t == entry.target.as_str()).unwrap();
        for dependency in &entry.depends_on {
            let dep = order.iter().position(|t| *t == dependency.as_str()).unwrap();
            assert!(dep < own, "{dependency} must precede {}", entry.target);
        }
    }
}

#[test]
fn cycle_is_rejected_before_any_call() {
    let remote = InMemoryRemote::new();
    let set = manifests(json!([
        {"id": "t", "kind": "items_type", "spec": {"title": "T"}},
        {"id": "a", "kind": "item", "spec": {"title": "A", "category": "t", "fields": [{"name": "n", "type": "items", "value": "b"}]}},
        {"id": "b", "kind": "item", "spec": {"title": "B", "category": "t", "fields": [{"name": "n", "type": "items", "value": "a"}]}}
    ]));
    let snapshot = RemoteSnapshot::fetch(&remote).unwrap();
    let err = build_plan(&set, &snapshot, &options("v1")).unwrap_err();
    match err {
        Error::CyclicDependency { cycle } => {
            let names: Vec<_> = cycle.iter().map(|id| id.as_str()).collect();
            assert_eq!(names, ["a", "b", "a"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(remote.mutations(), 0);
}

#[test]
fn reorder_only_changes_positions() {
    let remote = InMemoryRemote::new();
    let before = manifests(json!([
        {"id": "t", "kind": "items_type", "spec": {"title": "T", "fields": [{"name": "a"}, {"name": "b"}]}}
    ]));
    run(&plan(&before, &remote, &options("v1")), &remote);

    let after = manifests(json!([
        {"id": "t", "kind": "items_type", "spec": {"title": "T", "fields": [{"name": "b"}, {"name": "a"}]}}
    ]));
    let plan = plan(&after, &remote, &options("v1"));
    let entry = plan.entry("t").unwrap();
    assert_eq!(entry.action, Action::Update);
    assert!(entry.changes.added.is_empty());
    assert!(entry.changes.removed.is_empty());
    assert_eq!(entry.changes.changed.len(), 2);
    for change in entry.changes.changed.values() {
        let (Value::Field(old), Value::Field(new)) = (&change.old, &change.new) else {
            panic!("expected field snapshots");
        };
        assert_eq!(old.field, new.field);
        assert_ne!(old.position, new.position);
    }
}

#[test]
fn metadata_round_trip_is_a_noop() {
    let remote = InMemoryRemote::new();
    let set = lab();
    run(&plan(&set, &remote, &options("v1")), &remote);

    // Re-seeding a fresh store from the stored records changes nothing
    let copy = InMemoryRemote::with_records(remote.snapshot());
    assert!(!plan(&set, &copy, &options("v1")).has_changes());
}

#[test]
fn destroy_deletes_dependents_first() {
    let remote = InMemoryRemote::new();
    let set = manifests(json!([
        {"id": "type1", "kind": "items_type", "spec": {"title": "T"}},
        {"id": "item1", "kind": "item", "spec": {"title": "I", "category": "type1"}}
    ]));
    run(&plan(&set, &remote, &options("v1")), &remote);

    let pruned = build_plan(
        &ManifestSet::default(),
        &RemoteSnapshot::fetch(&remote).unwrap(),
        &PlanOptions {
            version: "v1".into(),
            prune: true,
        },
    )
    .unwrap();
    assert_eq!(order(&pruned), ["item1", "type1"]);
    assert!(pruned.entries.iter().all(|e| e.action == Action::Delete));

    let destroy = build_destroy_plan(&RemoteSnapshot::fetch(&remote).unwrap(), None).unwrap();
    assert_eq!(order(&destroy), ["item1", "type1"]);

    let report = run(&destroy, &remote);
    assert!(report.is_success());
    assert!(remote.records(EntityKind::Item).is_empty());
    assert!(remote.records(EntityKind::ItemCategory).is_empty());
}

#[test]
fn unmanaged_entities_are_left_alone() {
    let remote = InMemoryRemote::with_records(vec![(
        EntityKind::ItemCategory,
        reconcile::RawRecord {
            id: 3,
            title: "Legacy".into(),
            ..Default::default()
        },
    )]);
    let set = manifests(json!([
        {"id": "item1", "kind": "item", "spec": {"title": "I", "category": 3}}
    ]));
    let prune = PlanOptions {
        version: "v1".into(),
        prune: true,
    };
    let plan = plan(&set, &remote, &prune);
    assert_eq!(order(&plan), ["item1"]);
    assert!(plan.orphans.is_empty());

    let report = run(&plan, &remote);
    let item = remote
        .record(EntityKind::Item, report.created_ids["item1"])
        .unwrap();
    assert_eq!(item.category_id, Some(3));
    assert!(remote.record(EntityKind::ItemCategory, 3).is_some());
}

#[test]
fn failed_entry_in_a_parallel_wave_only_blocks_its_dependents() {
    let remote = InMemoryRemote::new();
    remote.fail_on("Broken");
    let set = manifests(json!([
        {"id": "type1", "kind": "items_type", "spec": {"title": "Reagent"}},
        {"id": "item2", "kind": "item", "spec": {"title": "Broken", "category": "type1"}},
        {"id": "item3", "kind": "item", "spec": {"title": "Sibling", "category": "type1"}},
        {
            "id": "item1",
            "kind": "item",
            "spec": {
                "title": "Dependent",
                "category": "type1",
                "fields": [{"name": "ref", "type": "items", "value": "item2"}]
            }
        }
    ]));
    let plan = plan(&set, &remote, &options("v1"));
    let level = |id: &str| plan.entry(id).unwrap().level;
    assert_eq!(level("item2"), level("item3"));
    assert!(level("item1") > level("item2"));

    let report = apply(
        &plan,
        &remote,
        &ExecuteOptions {
            jobs: 4,
            ..ExecuteOptions::default()
        },
        &mut NoProgress,
    );

    let failed: Vec<_> = report.failed.iter().map(|f| f.target.as_str()).collect();
    assert_eq!(failed, ["item2"]);
    assert!(report.created_ids.contains_key("type1"));
    assert!(report.created_ids.contains_key("item3"));
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].target.as_str(), "item1");
    assert!(report.skipped[0].reason.contains("item2"));

    let titles: Vec<_> = remote
        .records(EntityKind::Item)
        .into_iter()
        .map(|r| r.title)
        .collect();
    assert_eq!(titles, ["Sibling"]);
}

#[test]
fn prune_keeps_orphans_that_are_still_referenced() {
    let remote = InMemoryRemote::new();
    let before = manifests(json!([
        {"id": "type_old", "kind": "items_type", "spec": {"title": "Old type"}},
        {"id": "item1", "kind": "item", "spec": {"title": "Kept", "category": "type_old"}},
        {"id": "old_item", "kind": "item", "spec": {"title": "Gone", "category": "type_old"}}
    ]));
    let first = run(&plan(&before, &remote, &options("v1")), &remote);
    assert!(first.is_success());
    let type_id = first.created_ids["type_old"];

    // item1 still points at the category, which no manifest declares anymore
    let after = manifests(json!([
        {"id": "item1", "kind": "item", "spec": {"title": "Kept", "category": "type_old"}}
    ]));
    let prune = PlanOptions {
        version: "v1".into(),
        prune: true,
    };
    let pruned = plan(&after, &remote, &prune);
    assert_eq!(pruned.orphans.len(), 2);
    let deleted: Vec<_> = pruned
        .changes()
        .filter(|e| e.action == Action::Delete)
        .map(|e| e.target.as_str())
        .collect();
    assert_eq!(deleted, ["old_item"]);
    assert_eq!(pruned.retained.len(), 1);
    assert_eq!(pruned.retained[0].id.as_str(), "type_old");
    assert_eq!(pruned.entry("item1").unwrap().action, Action::NoOp);

    let report = run(&pruned, &remote);
    assert!(report.is_success(), "{report:?}");
    assert!(remote.record(EntityKind::ItemCategory, type_id).is_some());
    assert!(remote.record(EntityKind::Item, first.created_ids["old_item"]).is_none());
    let item1 = remote
        .record(EntityKind::Item, first.created_ids["item1"])
        .unwrap();
    assert_eq!(item1.category_id, Some(type_id));

    let again = plan(&after, &remote, &prune);
    assert!(!again.has_changes());
    assert_eq!(again.retained.len(), 1);
}

#[test]
fn tags_converge_and_follow_edits() {
    let remote = InMemoryRemote::new();
    let tagged = |tags: serde_json::Value| {
        manifests(json!([
            {"id": "tpl", "kind": "experiments_template", "spec": {"title": "Assay", "tags": tags}}
        ]))
    };
    let tags_of = |id| {
        remote
            .record(EntityKind::ExperimentTemplate, id)
            .unwrap()
            .tags
    };

    let set = tagged(json!(["qc", "assay", "qc"]));
    let report = run(&plan(&set, &remote, &options("v1")), &remote);
    assert!(report.is_success());
    let id = report.created_ids["tpl"];
    assert_eq!(tags_of(id), ["assay", "qc"]);
    assert!(!plan(&set, &remote, &options("v1")).has_changes());

    let set = tagged(json!(["qc"]));
    let next = plan(&set, &remote, &options("v1"));
    let entry = next.entry("tpl").unwrap();
    assert_eq!(entry.action, Action::Update);
    assert!(entry.changes.touches(Attribute::Tags));
    assert!(run(&next, &remote).is_success());
    assert_eq!(tags_of(id), ["qc"]);
    assert!(!plan(&set, &remote, &options("v1")).has_changes());

    let set = tagged(json!([]));
    assert!(run(&plan(&set, &remote, &options("v1")), &remote).is_success());
    assert!(tags_of(id).is_empty());
    assert!(!plan(&set, &remote, &options("v1")).has_changes());
}
