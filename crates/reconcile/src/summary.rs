//! Human-readable plan summaries

use std::fmt;

use crate::diff::{Action, Value};
use crate::planner::{Plan, PlanEntry};
use crate::types::{EntityKind, FieldSnapshot, ManifestId};

/// Count of entries per action
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub unchanged: usize,
    /// Managed entities without a manifest
    pub orphans: usize,
    /// Entries owing references to entities created during the run
    pub deferred: usize,
}

impl PlanSummary {
    pub fn from_plan(plan: &Plan) -> Self {
        let mut summary = Self {
            orphans: plan.orphans.len(),
            deferred: plan.deferred.len(),
            ..Self::default()
        };
        for entry in &plan.entries {
            match entry.action {
                Action::Create => summary.create += 1,
                Action::Update => summary.update += 1,
                Action::Delete => summary.delete += 1,
                Action::NoOp => summary.unchanged += 1,
            }
        }
        summary
    }

    /// Total number of changes
    pub fn total_changes(&self) -> usize {
        self.create + self.update + self.delete
    }

    pub fn has_changes(&self) -> bool {
        self.total_changes() > 0
    }
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to delete, {} unchanged",
            self.create, self.update, self.delete, self.unchanged
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Added,
    Changed,
    Removed,
}

impl LineKind {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Added => "+",
            Self::Changed => "~",
            Self::Removed => "-",
        }
    }
}

/// One changed key with its before and after rendering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeLine {
    pub kind: LineKind,
    pub key: String,
    pub before: Option<String>,
    pub after: Option<String>,
}

/// Printable changeset of one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySummary {
    pub target: ManifestId,
    pub kind: EntityKind,
    pub action: Action,
    pub lines: Vec<ChangeLine>,
    /// References patched after the first pass
    pub deferred: Vec<String>,
}

impl EntrySummary {
    pub fn from_entry(entry: &PlanEntry) -> Self {
        let changes = &entry.changes;
        let mut lines = Vec::with_capacity(changes.len());
        for (key, value) in &changes.added {
            lines.push(ChangeLine {
                kind: LineKind::Added,
                key: key.to_string(),
                before: None,
                after: Some(render_value(value)),
            });
        }
        for (key, change) in &changes.changed {
            lines.push(ChangeLine {
                kind: LineKind::Changed,
                key: key.to_string(),
                before: Some(render_value(&change.old)),
                after: Some(render_value(&change.new)),
            });
        }
        for (key, value) in &changes.removed {
            lines.push(ChangeLine {
                kind: LineKind::Removed,
                key: key.to_string(),
                before: Some(render_value(value)),
                after: None,
            });
        }

        Self {
            target: entry.target.clone(),
            kind: entry.kind,
            action: entry.action,
            lines,
            deferred: entry
                .deferred
                .iter()
                .map(|d| match &d.field {
                    Some(field) => format!("field '{field}' -> {}", d.target),
                    None => format!("category -> {}", d.target),
                })
                .collect(),
        }
    }
}

/// Changesets of every entry that changes remote state, in plan order
pub fn describe(plan: &Plan) -> Vec<EntrySummary> {
    plan.changes().map(EntrySummary::from_entry).collect()
}

pub fn render_value(value: &Value) -> String {
    match value {
        Value::Text(text) => format!("{text:?}"),
        Value::Link(target) => format!("-> {target}"),
        Value::Field(snapshot) => render_field(snapshot),
    }
}

fn render_field(snapshot: &FieldSnapshot) -> String {
    let field = &snapshot.field;
    let mut out = format!("{} {}", field.field_type, field.value);
    if let Some(unit) = &field.unit {
        out.push_str(&format!(" {unit}"));
    }
    if let Some(position) = snapshot.position {
        out.push_str(&format!(" @{position}"));
    }
    if let Some(group) = &snapshot.group {
        out.push_str(&format!(" in '{group}'"));
    }
    if field.required {
        out.push_str(" required");
    }
    if field.readonly {
        out.push_str(" readonly");
    }
    out
}
