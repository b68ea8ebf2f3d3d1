//! # Reconcile
//!
//! A reconciliation engine for remote lab entities.
//!
//! Desired state is a set of manifests; actual state is read from the remote
//! store. The engine diffs the two, orders the changes by dependency and
//! applies them, so that applying the same manifests twice is a no-op.
//! Entities this engine creates carry bookkeeping in their metadata; that
//! metadata is the only state it keeps.
//!
//! ## Core Concepts
//!
//! - **Manifest**: Declared state of one entity, identified by a [`ManifestId`]
//! - **RemoteSnapshot**: Decoded remote entities, matched by bookkeeping
//! - **Plan**: Ordered create/update/delete entries with owed references
//! - **Executor**: Applies a plan in two passes, creating before linking
//!
//! ## Example
//!
//! ```ignore
//! use reconcile::{
//!     ExecuteOptions, InMemoryRemote, ManifestSet, NoProgress, PlanOptions,
//!     RemoteSnapshot, apply, build_plan,
//! };
//!
//! let manifests = ManifestSet::from_raw(raw_manifests)?;
//! let remote = InMemoryRemote::new();
//! let snapshot = RemoteSnapshot::fetch(&remote)?;
//!
//! let options = PlanOptions { version: "3f2a9c1".into(), prune: false };
//! let plan = build_plan(&manifests, &snapshot, &options)?;
//! println!("{}", plan.summary());
//!
//! let report = apply(&plan, &remote, &ExecuteOptions::default(), &mut NoProgress);
//! assert!(report.is_success());
//! ```
//!
//! ## Provider Traits
//!
//! - [`RemoteApi`]: Lists and mutates entities in the remote store
//! - [`ProgressCallback`]: Receives progress updates
//! - [`ConfirmCallback`]: Handles user confirmations

pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod graph;
pub mod manifest;
pub mod memory;
pub mod metadata;
pub mod planner;
pub mod remote;
pub mod summary;
pub mod types;

// Re-export main types at crate root
pub use context::{
    AutoConfirm, AutoDecline, ConfirmCallback, NoProgress, Pass, ProgressCallback, RemoteApi,
};
pub use diff::{Action, Attribute, Change, ChangeKey, ChangeSet, Value, diff_entity, diff_removal};
pub use error::{Error, ErrorCategory, RemoteError, Result};
pub use executor::{EntryOutcome, ExecuteOptions, ExecutionReport, apply};
pub use graph::DependencyGraph;
pub use manifest::{ManifestSet, RawManifest};
pub use memory::InMemoryRemote;
pub use planner::{
    DeferredRef, Orphan, Plan, PlanEntry, PlanOptions, build_destroy_plan, build_plan,
};
pub use remote::RemoteSnapshot;
pub use summary::{EntrySummary, PlanSummary};
pub use types::{
    Bookkeeping, Desired, EntityKind, EntitySpec, FieldGroup, FieldLayout, FieldSnapshot,
    FieldSpec, FieldType, FieldValue, LinkTarget, Manifest, ManifestId, Payload, RawRecord,
    RemoteEntity, RemoteId,
};
