//! Error types for reconciliation.
//!
//! Validation and matching errors are detected before any remote call and
//! abort plan building. Remote failures during apply are collected in the
//! execution report instead of being returned.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{EntityKind, ManifestId, RemoteId};

/// Result type alias for reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Categories of reconciliation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The manifests themselves are invalid.
    Validation,
    /// Manifests cannot be matched unambiguously against remote state.
    Matching,
    /// Remote state could not be decoded.
    Decode,
    /// A remote call failed.
    Execution,
}

impl ErrorCategory {
    /// Get a user-friendly description of this error category.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Validation => "Invalid manifests",
            Self::Matching => "Ambiguous remote state",
            Self::Decode => "Unreadable remote state",
            Self::Execution => "Remote call failed",
        }
    }

    /// Get actionable advice for resolving this error category.
    #[must_use]
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Validation => "Fix the manifests and run again",
            Self::Matching => "Remove or retag the duplicate remote entities",
            Self::Decode => "Inspect the entity's metadata in the remote store",
            Self::Execution => "Check connectivity and permissions, then apply again",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors raised while loading, planning or decoding.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown entity kind '{0}'")]
    UnknownKind(String),

    #[error("duplicate manifest id '{id}'")]
    DuplicateId { id: ManifestId },

    #[error("manifest '{id}' declares field '{field}' more than once")]
    DuplicateField { id: ManifestId, field: String },

    #[error("invalid manifest '{id}': {message}")]
    InvalidManifest { id: ManifestId, message: String },

    #[error("invalid field '{field}' in manifest '{id}': {message}")]
    InvalidField {
        id: ManifestId,
        field: String,
        message: String,
    },

    #[error("manifest '{from}' references unknown entity '{target}'{}", location(.field))]
    UnresolvedReference {
        from: ManifestId,
        /// `None` for the category reference
        field: Option<String>,
        target: String,
    },

    #[error(
        "manifest '{from}' references '{target}'{} which is a {found}, expected a {expected}",
        location(.field)
    )]
    ReferenceKind {
        from: ManifestId,
        field: Option<String>,
        target: String,
        expected: EntityKind,
        found: EntityKind,
    },

    #[error("cyclic dependency: {}", join_cycle(.cycle))]
    CyclicDependency { cycle: Vec<ManifestId> },

    #[error("manifest id '{id}' is claimed by several remote entities: {}", join_remote(.remote))]
    AmbiguousMatch {
        id: ManifestId,
        remote: Vec<(EntityKind, RemoteId)>,
    },

    #[error("manifest '{id}' is a {expected} but remote {found} {remote_id} carries its id")]
    KindMismatch {
        id: ManifestId,
        expected: EntityKind,
        found: EntityKind,
        remote_id: RemoteId,
    },

    #[error("cannot decode {kind} {remote_id}: {message}")]
    Decode {
        kind: EntityKind,
        remote_id: RemoteId,
        message: String,
    },

    #[error("cannot encode metadata for manifest '{id}': {message}")]
    Encode { id: ManifestId, message: String },

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl Error {
    /// Get the category of this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnknownKind(_)
            | Self::DuplicateId { .. }
            | Self::DuplicateField { .. }
            | Self::InvalidManifest { .. }
            | Self::InvalidField { .. }
            | Self::UnresolvedReference { .. }
            | Self::ReferenceKind { .. }
            | Self::CyclicDependency { .. }
            | Self::Encode { .. } => ErrorCategory::Validation,
            Self::AmbiguousMatch { .. } | Self::KindMismatch { .. } => ErrorCategory::Matching,
            Self::Decode { .. } => ErrorCategory::Decode,
            Self::Remote(_) => ErrorCategory::Execution,
        }
    }

    pub(crate) fn invalid(id: &ManifestId, message: impl Into<String>) -> Self {
        Self::InvalidManifest {
            id: id.clone(),
            message: message.into(),
        }
    }

    pub(crate) fn invalid_field(
        id: &ManifestId,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidField {
            id: id.clone(),
            field: field.into(),
            message: message.into(),
        }
    }
}

fn location(field: &Option<String>) -> String {
    match field {
        Some(name) => format!(" in field '{name}'"),
        None => " as its category".to_string(),
    }
}

fn join_cycle(cycle: &[ManifestId]) -> String {
    cycle
        .iter()
        .map(ManifestId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn join_remote(remote: &[(EntityKind, RemoteId)]) -> String {
    remote
        .iter()
        .map(|(kind, id)| format!("{kind} {id}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failure reported by a [`RemoteApi`](crate::RemoteApi) call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{}", describe(.status, .message))]
pub struct RemoteError {
    /// HTTP status when the remote answered
    pub status: Option<u16>,
    pub message: String,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }
}

fn describe(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("{message} (HTTP {code})"),
        None => message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_names_nodes() {
        let err = Error::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "cyclic dependency: a -> b -> a");
        assert_eq!(err.category(), ErrorCategory::Validation);
    }

    #[test]
    fn test_unresolved_reference_message() {
        let err = Error::UnresolvedReference {
            from: "item1".into(),
            field: Some("ref".into()),
            target: "nope".into(),
        };
        assert_eq!(
            err.to_string(),
            "manifest 'item1' references unknown entity 'nope' in field 'ref'"
        );

        let err = Error::UnresolvedReference {
            from: "item1".into(),
            field: None,
            target: "nope".into(),
        };
        assert!(err.to_string().ends_with("as its category"));
    }

    #[test]
    fn test_ambiguous_match_is_matching_error() {
        let err = Error::AmbiguousMatch {
            id: "dup".into(),
            remote: vec![(EntityKind::Item, 1), (EntityKind::Item, 2)],
        };
        assert_eq!(err.category(), ErrorCategory::Matching);
        assert!(err.to_string().contains("item 1, item 2"));
    }

    #[test]
    fn test_encode_error_names_manifest() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = Error::Encode {
            id: "sample".into(),
            message: source.to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert!(err.to_string().starts_with("cannot encode metadata for manifest 'sample': "));
    }

    #[test]
    fn test_remote_error_display() {
        assert_eq!(RemoteError::new("boom").to_string(), "boom");
        assert_eq!(
            RemoteError::with_status(404, "not found").to_string(),
            "not found (HTTP 404)"
        );
    }

    #[test]
    fn test_category_advice_not_empty() {
        for category in [
            ErrorCategory::Validation,
            ErrorCategory::Matching,
            ErrorCategory::Decode,
            ErrorCategory::Execution,
        ] {
            assert!(!category.advice().is_empty());
        }
    }
}
