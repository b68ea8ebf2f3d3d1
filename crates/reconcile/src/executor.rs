//! Execution engine - applies a plan in two passes
//!
//! The first pass runs creates, updates and deletes in plan order, grouped
//! into waves of equal dependency level when more than one job is allowed.
//! The second pass patches references that could not be rendered during the
//! first one. Remote ids of entities created during the run are kept in a
//! map scoped to the run.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use indexmap::IndexMap;
use rayon::prelude::*;

use crate::context::{Pass, ProgressCallback, RemoteApi};
use crate::diff::{Action, Attribute};
use crate::error::RemoteError;
use crate::planner::{Plan, PlanEntry, render};
use crate::types::{EntityKind, LinkTarget, ManifestId, Payload, RemoteId};

/// Options for plan execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Report what would run without calling the remote store
    pub dry_run: bool,
    /// Maximum concurrent remote calls within one wave
    pub jobs: usize,
    /// Stop the pass at the first failure instead of only skipping dependents
    pub fail_fast: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            jobs: 1,
            fail_fast: false,
        }
    }
}

/// Result of visiting one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    Created(RemoteId),
    Updated,
    Deleted,
    /// Deferred references were written
    Patched,
    Failed(RemoteError),
    Skipped(String),
}

impl EntryOutcome {
    /// Check if the outcome represents success (no failure, not skipped)
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed(_) | Self::Skipped(_))
    }
}

impl fmt::Display for EntryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created(id) => write!(f, "created as {id}"),
            Self::Updated => f.write_str("updated"),
            Self::Deleted => f.write_str("deleted"),
            Self::Patched => f.write_str("references patched"),
            Self::Failed(err) => write!(f, "failed: {err}"),
            Self::Skipped(reason) => write!(f, "skipped: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Succeeded {
    pub target: ManifestId,
    pub kind: EntityKind,
    pub action: Action,
    pub pass: Pass,
    pub remote_id: Option<RemoteId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failed {
    pub target: ManifestId,
    pub kind: EntityKind,
    pub action: Action,
    pub pass: Pass,
    pub error: RemoteError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    pub target: ManifestId,
    pub kind: EntityKind,
    pub action: Action,
    pub reason: String,
}

/// Everything that happened during one apply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub succeeded: Vec<Succeeded>,
    pub failed: Vec<Failed>,
    pub skipped: Vec<Skipped>,
    pub unchanged: usize,
    /// Remote ids of entities created during the run
    pub created_ids: IndexMap<ManifestId, RemoteId>,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Entries changed during the first pass
    pub fn changed(&self) -> usize {
        self.succeeded
            .iter()
            .filter(|s| s.pass == Pass::Apply)
            .count()
    }
}

/// Apply `plan` through `api`.
///
/// Never returns early: failures are recorded in the report and the
/// dependents of a failed entry are skipped.
pub fn apply(
    plan: &Plan,
    api: &dyn RemoteApi,
    options: &ExecuteOptions,
    progress: &mut dyn ProgressCallback,
) -> ExecutionReport {
    let mut run = Run::new(plan, options);

    if options.dry_run {
        for entry in &plan.entries {
            if entry.action.is_change() {
                run.skip(entry, "dry run".to_string(), progress);
            } else {
                run.report.unchanged += 1;
            }
        }
        return run.report;
    }

    run.first_pass(api, progress);
    run.second_pass(api, progress);
    run.report
}

struct Run<'a> {
    plan: &'a Plan,
    options: &'a ExecuteOptions,
    pool: Option<rayon::ThreadPool>,
    /// Remote ids of entities created during this run
    ids: IndexMap<ManifestId, RemoteId>,
    /// Entries that failed or were skipped
    blocked: HashSet<&'a ManifestId>,
    /// Entries that still owe references after the first pass
    owed: Vec<&'a PlanEntry>,
    aborted: bool,
    report: ExecutionReport,
}

impl<'a> Run<'a> {
    fn new(plan: &'a Plan, options: &'a ExecuteOptions) -> Self {
        let pool = if options.jobs > 1 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(options.jobs)
                .build()
            {
                Ok(pool) => Some(pool),
                Err(e) => {
                    log::warn!("Failed to create thread pool, running sequentially: {e}");
                    None
                }
            }
        } else {
            None
        };

        Self {
            plan,
            options,
            pool,
            ids: IndexMap::new(),
            blocked: HashSet::new(),
            owed: Vec::new(),
            aborted: false,
            report: ExecutionReport::default(),
        }
    }

    fn resolve(&self, target: &LinkTarget) -> Option<RemoteId> {
        match target {
            LinkTarget::Manifest(id) => self
                .ids
                .get(id)
                .or_else(|| self.plan.known_ids.get(id))
                .copied(),
            LinkTarget::Remote(id) => Some(*id),
            LinkTarget::Unresolved(_) => None,
        }
    }

    /// Entries grouped into waves; each wave only depends on earlier ones
    fn waves(&self) -> Vec<Vec<&'a PlanEntry>> {
        let entries = self.plan.entries.iter();
        if self.pool.is_none() {
            return entries.map(|e| vec![e]).collect();
        }
        let mut by_level: BTreeMap<usize, Vec<&'a PlanEntry>> = BTreeMap::new();
        for entry in entries {
            by_level.entry(entry.level).or_default().push(entry);
        }
        by_level.into_values().collect()
    }

    fn blocked_reason(&self, entry: &PlanEntry) -> Option<String> {
        if self.aborted {
            return Some("not attempted after an earlier failure".to_string());
        }
        entry
            .depends_on
            .iter()
            .find(|dep| self.blocked.contains(dep))
            .map(|dep| format!("dependency '{dep}' did not complete"))
    }

    fn skip(&mut self, entry: &'a PlanEntry, reason: String, progress: &mut dyn ProgressCallback) {
        log::debug!("Skipping {} '{}': {reason}", entry.kind, entry.target);
        progress.on_entry_complete(&entry.target, &EntryOutcome::Skipped(reason.clone()));
        self.blocked.insert(&entry.target);
        self.report.skipped.push(Skipped {
            target: entry.target.clone(),
            kind: entry.kind,
            action: entry.action,
            reason,
        });
    }

    fn fail(
        &mut self,
        entry: &'a PlanEntry,
        pass: Pass,
        error: RemoteError,
        progress: &mut dyn ProgressCallback,
    ) {
        log::warn!("{} of {} '{}' failed: {error}", entry.action, entry.kind, entry.target);
        progress.on_entry_complete(&entry.target, &EntryOutcome::Failed(error.clone()));
        self.blocked.insert(&entry.target);
        if self.options.fail_fast {
            self.aborted = true;
        }
        self.report.failed.push(Failed {
            target: entry.target.clone(),
            kind: entry.kind,
            action: entry.action,
            pass,
            error,
        });
    }

    fn first_pass(&mut self, api: &dyn RemoteApi, progress: &mut dyn ProgressCallback) {
        progress.on_pass_start(Pass::Apply, self.plan.changes().count());

        for wave in self.waves() {
            let mut runnable: Vec<(&'a PlanEntry, Option<Payload>, bool)> = Vec::new();
            for entry in wave {
                if !entry.action.is_change() {
                    self.report.unchanged += 1;
                    continue;
                }
                if let Some(reason) = self.blocked_reason(entry) {
                    self.skip(entry, reason, progress);
                    continue;
                }

                let rendered = entry
                    .desired
                    .as_ref()
                    .map(|desired| render(&entry.target, desired, &|t| self.resolve(t)))
                    .transpose();
                let rendered = match rendered {
                    Ok(rendered) => rendered,
                    Err(e) => {
                        self.fail(entry, Pass::Apply, RemoteError::new(e.to_string()), progress);
                        continue;
                    }
                };
                let owes = rendered.as_ref().is_some_and(|(_, unresolved)| !unresolved.is_empty());
                progress.on_entry_start(entry);
                runnable.push((entry, rendered.map(|(payload, _)| payload), owes));
            }

            let results = self.run_wave(api, &runnable);
            for ((entry, _, owes), result) in runnable.into_iter().zip(results) {
                match result {
                    Ok(remote_id) => {
                        let outcome = match (entry.action, remote_id) {
                            (Action::Create, Some(id)) => {
                                self.ids.insert(entry.target.clone(), id);
                                self.report.created_ids.insert(entry.target.clone(), id);
                                EntryOutcome::Created(id)
                            }
                            (Action::Delete, _) => EntryOutcome::Deleted,
                            _ => EntryOutcome::Updated,
                        };
                        log::info!("{} '{}' {outcome}", entry.kind, entry.target);
                        progress.on_entry_complete(&entry.target, &outcome);
                        if owes {
                            self.owed.push(entry);
                        }
                        self.report.succeeded.push(Succeeded {
                            target: entry.target.clone(),
                            kind: entry.kind,
                            action: entry.action,
                            pass: Pass::Apply,
                            remote_id,
                        });
                    }
                    Err(error) => self.fail(entry, Pass::Apply, error, progress),
                }
            }
        }

        progress.on_pass_complete(Pass::Apply);
    }

    fn run_wave(
        &self,
        api: &dyn RemoteApi,
        runnable: &[(&'a PlanEntry, Option<Payload>, bool)],
    ) -> Vec<Result<Option<RemoteId>, RemoteError>> {
        let call = |(entry, payload, _): &(&'a PlanEntry, Option<Payload>, bool)| {
            execute_entry(api, entry, payload.as_ref())
        };
        match &self.pool {
            Some(pool) if runnable.len() > 1 => pool.install(|| runnable.par_iter().map(call).collect()),
            _ => runnable.iter().map(call).collect(),
        }
    }

    fn second_pass(&mut self, api: &dyn RemoteApi, progress: &mut dyn ProgressCallback) {
        if self.owed.is_empty() {
            return;
        }
        self.aborted = false;
        let owed = std::mem::take(&mut self.owed);
        progress.on_pass_start(Pass::Resolve, owed.len());

        for entry in owed {
            if let Some(reason) = self.blocked_reason(entry) {
                self.skip(entry, reason, progress);
                continue;
            }
            let Some(desired) = entry.desired.as_ref() else {
                continue;
            };
            let rendered = render(&entry.target, desired, &|t| self.resolve(t));
            let (payload, unresolved) = match rendered {
                Ok(rendered) => rendered,
                Err(e) => {
                    self.fail(entry, Pass::Resolve, RemoteError::new(e.to_string()), progress);
                    continue;
                }
            };
            if let Some(missing) = unresolved.first() {
                let reason = format!("reference to '{}' could not be resolved", missing.target);
                self.skip(entry, reason, progress);
                continue;
            }
            let Some(remote_id) = entry.remote_id.or_else(|| self.ids.get(&entry.target).copied())
            else {
                continue;
            };

            progress.on_entry_start(entry);
            match api.update(entry.kind, remote_id, &payload) {
                Ok(()) => {
                    log::info!("{} '{}' references patched", entry.kind, entry.target);
                    progress.on_entry_complete(&entry.target, &EntryOutcome::Patched);
                    self.report.succeeded.push(Succeeded {
                        target: entry.target.clone(),
                        kind: entry.kind,
                        action: Action::Update,
                        pass: Pass::Resolve,
                        remote_id: Some(remote_id),
                    });
                }
                Err(error) => self.fail(entry, Pass::Resolve, error, progress),
            }
        }

        progress.on_pass_complete(Pass::Resolve);
    }
}

fn execute_entry(
    api: &dyn RemoteApi,
    entry: &PlanEntry,
    payload: Option<&Payload>,
) -> Result<Option<RemoteId>, RemoteError> {
    match (entry.action, entry.remote_id, payload) {
        (Action::Create, _, Some(payload)) => {
            let id = api.create(entry.kind, payload)?;
            if !payload.tags.is_empty() {
                api.set_tags(entry.kind, id, &payload.tags).inspect_err(|e| {
                    log::warn!(
                        "Created {} '{}' as {id} but could not tag it: {e}",
                        entry.kind,
                        entry.target
                    );
                })?;
            }
            Ok(Some(id))
        }
        (Action::Update, Some(id), Some(payload)) => {
            api.update(entry.kind, id, payload)?;
            if entry.changes.touches(Attribute::Tags) {
                api.set_tags(entry.kind, id, &payload.tags)?;
            }
            Ok(Some(id))
        }
        (Action::Delete, Some(id), _) => api.delete(entry.kind, id).map(|()| Some(id)),
        (Action::NoOp, id, _) => Ok(id),
        (action, ..) => Err(RemoteError::new(format!(
            "{action} of '{}' has no remote id or payload",
            entry.target
        ))),
    }
}
