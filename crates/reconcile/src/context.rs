//! Collaborator traits
//!
//! These traits allow the engine to be used without depending on a specific
//! remote store client, progress display or prompt implementation.

use crate::error::RemoteError;
use crate::executor::EntryOutcome;
use crate::planner::PlanEntry;
use crate::types::{EntityKind, ManifestId, Payload, RawRecord, RemoteId};

/// Access to the remote store
///
/// Implementations are shared across the executor's worker threads.
pub trait RemoteApi: Send + Sync {
    /// List every entity of a kind
    fn list(&self, kind: EntityKind) -> Result<Vec<RawRecord>, RemoteError>;

    /// Create an entity and return its new remote id
    fn create(&self, kind: EntityKind, payload: &Payload) -> Result<RemoteId, RemoteError>;

    /// Overwrite an entity's attributes and metadata
    fn update(&self, kind: EntityKind, id: RemoteId, payload: &Payload) -> Result<(), RemoteError>;

    fn delete(&self, kind: EntityKind, id: RemoteId) -> Result<(), RemoteError>;

    /// Replace every tag of an entity with `tags`
    fn set_tags(&self, kind: EntityKind, id: RemoteId, tags: &[String]) -> Result<(), RemoteError>;
}

impl<T: RemoteApi + ?Sized> RemoteApi for &T {
    fn list(&self, kind: EntityKind) -> Result<Vec<RawRecord>, RemoteError> {
        (**self).list(kind)
    }

    fn create(&self, kind: EntityKind, payload: &Payload) -> Result<RemoteId, RemoteError> {
        (**self).create(kind, payload)
    }

    fn update(&self, kind: EntityKind, id: RemoteId, payload: &Payload) -> Result<(), RemoteError> {
        (**self).update(kind, id, payload)
    }

    fn delete(&self, kind: EntityKind, id: RemoteId) -> Result<(), RemoteError> {
        (**self).delete(kind, id)
    }

    fn set_tags(&self, kind: EntityKind, id: RemoteId, tags: &[String]) -> Result<(), RemoteError> {
        (**self).set_tags(kind, id, tags)
    }
}

/// Which of the two apply passes is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pass {
    /// Create, update and delete in plan order
    Apply,
    /// Patch references to entities created during the first pass
    Resolve,
}

impl std::fmt::Display for Pass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Apply => f.write_str("apply"),
            Self::Resolve => f.write_str("resolve references"),
        }
    }
}

/// Progress callback for execution operations
///
/// Implement this trait to receive progress updates during execution.
pub trait ProgressCallback: Send {
    /// Called when a pass starts with the number of entries it will visit
    fn on_pass_start(&mut self, pass: Pass, count: usize);

    /// Called before an entry's remote call
    fn on_entry_start(&mut self, entry: &PlanEntry);

    /// Called when an entry finished, failed or was skipped
    fn on_entry_complete(&mut self, id: &ManifestId, outcome: &EntryOutcome);

    /// Called when a pass completes
    fn on_pass_complete(&mut self, pass: Pass);
}

/// Confirmation callback for user interaction
pub trait ConfirmCallback {
    /// Ask the user to confirm an action
    ///
    /// # Returns
    /// `true` if the user confirmed, `false` otherwise
    fn confirm(&mut self, prompt: &str) -> std::io::Result<bool>;
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_pass_start(&mut self, _pass: Pass, _count: usize) {}
    fn on_entry_start(&mut self, _entry: &PlanEntry) {}
    fn on_entry_complete(&mut self, _id: &ManifestId, _outcome: &EntryOutcome) {}
    fn on_pass_complete(&mut self, _pass: Pass) {}
}

/// Auto-confirm callback (always returns true)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _prompt: &str) -> std::io::Result<bool> {
        Ok(true)
    }
}

/// Auto-decline callback (always returns false)
pub struct AutoDecline;

impl ConfirmCallback for AutoDecline {
    fn confirm(&mut self, _prompt: &str) -> std::io::Result<bool> {
        Ok(false)
    }
}
