//! Common types used across Bordereau

use serde::{Deserialize, Serialize};

use crate::error::BordereauError;

/// Tenant recorded when a path carries no tenant segment.
pub const UNKNOWN_TENANT: &str = "unknown";

// ============================================================================
// Queue Status
// ============================================================================

/// Lifecycle status of a file processing queue entry.
///
/// ```text
/// PENDING --(claim)--> PROCESSING --(unit succeeds)--> SUCCESS
/// PROCESSING --(unit fails)--> FAILED
/// PROCESSING --(stale)--> PENDING
/// FAILED | SUCCESS --(reprocess)--> PENDING
/// PROCESSING | SUCCESS --(delete)--> DELETED
/// ```
///
/// Deleting a `PENDING` or `FAILED` entry removes the row instead of moving it
/// to `DELETED`, so those edges are not transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Deleted,
}

impl QueueStatus {
    pub const ALL: [QueueStatus; 5] = [
        QueueStatus::Pending,
        QueueStatus::Processing,
        QueueStatus::Success,
        QueueStatus::Failed,
        QueueStatus::Deleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "PENDING",
            QueueStatus::Processing => "PROCESSING",
            QueueStatus::Success => "SUCCESS",
            QueueStatus::Failed => "FAILED",
            QueueStatus::Deleted => "DELETED",
        }
    }

    /// Whether `self -> next` is an edge of the queue state machine.
    pub fn can_transition_to(self, next: QueueStatus) -> bool {
        use QueueStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Success)
                | (Processing, Failed)
                | (Processing, Pending)
                | (Failed, Pending)
                | (Success, Pending)
                | (Processing, Deleted)
                | (Success, Deleted)
        )
    }

    /// Check a transition, returning an error for edges outside the state machine.
    pub fn ensure_transition(self, next: QueueStatus) -> crate::Result<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(BordereauError::IllegalTransition {
                from: self.as_str().to_string(),
                to: next.as_str().to_string(),
            })
        }
    }

    /// Statuses a manual reprocess may start from.
    pub fn allows_reprocess(self) -> bool {
        matches!(self, QueueStatus::Failed | QueueStatus::Success)
    }

    /// Entries in these statuses were never successfully claimed to completion
    /// and are removed outright when their file is deleted.
    pub fn removed_on_delete(self) -> bool {
        matches!(self, QueueStatus::Pending | QueueStatus::Failed)
    }

    pub fn is_active(self) -> bool {
        self != QueueStatus::Deleted
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueueStatus {
    type Err = BordereauError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(QueueStatus::Pending),
            "PROCESSING" => Ok(QueueStatus::Processing),
            "SUCCESS" => Ok(QueueStatus::Success),
            "FAILED" => Ok(QueueStatus::Failed),
            "DELETED" => Ok(QueueStatus::Deleted),
            other => Err(BordereauError::UnknownStatus(other.to_string())),
        }
    }
}

// ============================================================================
// File Kind
// ============================================================================

/// Processing category of a file, inferred once from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FileKind {
    Csv,
    Excel,
    Unknown,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Csv => "CSV",
            FileKind::Excel => "EXCEL",
            FileKind::Unknown => "UNKNOWN",
        }
    }

    /// Infer the kind from a file name or path (`.csv`, `.xlsx`, `.xls`).
    pub fn from_path(path: &str) -> Self {
        let file_name = path.rsplit('/').next().unwrap_or(path);
        let extension = match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
            _ => return FileKind::Unknown,
        };

        match extension.as_str() {
            "csv" => FileKind::Csv,
            "xlsx" | "xls" => FileKind::Excel,
            _ => FileKind::Unknown,
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FileKind {
    type Err = BordereauError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CSV" => Ok(FileKind::Csv),
            "EXCEL" => Ok(FileKind::Excel),
            "UNKNOWN" => Ok(FileKind::Unknown),
            other => Err(BordereauError::UnknownKind(other.to_string())),
        }
    }
}

// ============================================================================
// Storage Paths
// ============================================================================

/// A storage-relative object path such as `src/<tenant>/<file>`.
///
/// The first segment is the storage location, the second the tenant and the
/// last the file name. A path with fewer than three segments has no tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePath<'a> {
    raw: &'a str,
    segments: Vec<&'a str>,
}

impl<'a> StoragePath<'a> {
    pub fn parse(raw: &'a str) -> Self {
        let segments = raw.split('/').filter(|s| !s.is_empty()).collect();
        Self { raw, segments }
    }

    pub fn as_str(&self) -> &'a str {
        self.raw
    }

    pub fn location(&self) -> Option<&'a str> {
        self.segments.first().copied()
    }

    pub fn tenant(&self) -> Option<&'a str> {
        if self.segments.len() >= 3 {
            self.segments.get(1).copied()
        } else {
            None
        }
    }

    /// Tenant, or [`UNKNOWN_TENANT`] when the path carries none.
    pub fn tenant_or_unknown(&self) -> &'a str {
        self.tenant().unwrap_or(UNKNOWN_TENANT)
    }

    pub fn file_name(&self) -> Option<&'a str> {
        if self.segments.len() >= 2 {
            self.segments.last().copied()
        } else {
            None
        }
    }

    pub fn kind(&self) -> FileKind {
        self.file_name().map(FileKind::from_path).unwrap_or(FileKind::Unknown)
    }

    /// Directory placeholders (`src/acme/`) are listed by some stores but are not files.
    pub fn is_directory_marker(&self) -> bool {
        self.raw.ends_with('/')
    }
}

/// Validate a tenant code used to build an upload destination.
pub fn validate_tenant(tenant: &str) -> crate::Result<()> {
    let trimmed = tenant.trim();
    if trimmed.is_empty() || trimmed != tenant || tenant.contains('/') || tenant == "." || tenant == ".." {
        return Err(BordereauError::InvalidPath(format!(
            "invalid tenant code '{}'",
            tenant
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in QueueStatus::ALL {
            assert_eq!(status.as_str().parse::<QueueStatus>().unwrap(), status);
        }
        assert_eq!("pending".parse::<QueueStatus>().unwrap(), QueueStatus::Pending);
        assert!("queued".parse::<QueueStatus>().is_err());
    }

    #[test]
    fn test_state_machine_edges() {
        use QueueStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Success));
        assert!(Processing.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Pending));
        assert!(Failed.can_transition_to(Pending));
        assert!(Success.can_transition_to(Pending));
        assert!(Success.can_transition_to(Deleted));

        assert!(!Pending.can_transition_to(Success));
        assert!(!Pending.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Success));
        assert!(!Deleted.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Deleted));
        assert!(Pending.ensure_transition(Success).is_err());
    }

    #[test]
    fn test_reprocess_and_delete_policies() {
        assert!(QueueStatus::Failed.allows_reprocess());
        assert!(QueueStatus::Success.allows_reprocess());
        assert!(!QueueStatus::Pending.allows_reprocess());
        assert!(!QueueStatus::Processing.allows_reprocess());
        assert!(!QueueStatus::Deleted.allows_reprocess());

        assert!(QueueStatus::Pending.removed_on_delete());
        assert!(QueueStatus::Failed.removed_on_delete());
        assert!(!QueueStatus::Success.removed_on_delete());
    }

    #[test]
    fn test_file_kind_from_extension() {
        assert_eq!(FileKind::from_path("src/acme/a.csv"), FileKind::Csv);
        assert_eq!(FileKind::from_path("src/acme/A.CSV"), FileKind::Csv);
        assert_eq!(FileKind::from_path("src/acme/b.xlsx"), FileKind::Excel);
        assert_eq!(FileKind::from_path("src/acme/b.xls"), FileKind::Excel);
        assert_eq!(FileKind::from_path("src/acme/notes.txt"), FileKind::Unknown);
        assert_eq!(FileKind::from_path("src/acme/.csv"), FileKind::Unknown);
        assert_eq!(FileKind::from_path("src/acme/README"), FileKind::Unknown);
        assert_eq!(FileKind::from_path("src/acme.d/README"), FileKind::Unknown);
    }

    #[test]
    fn test_storage_path_segments() {
        let path = StoragePath::parse("src/acme/claims/2024.csv");
        assert_eq!(path.location(), Some("src"));
        assert_eq!(path.tenant(), Some("acme"));
        assert_eq!(path.file_name(), Some("2024.csv"));
        assert_eq!(path.kind(), FileKind::Csv);

        let no_tenant = StoragePath::parse("src/a.csv");
        assert_eq!(no_tenant.tenant(), None);
        assert_eq!(no_tenant.tenant_or_unknown(), UNKNOWN_TENANT);
        assert_eq!(no_tenant.kind(), FileKind::Csv);

        assert!(StoragePath::parse("src/acme/").is_directory_marker());
    }

    #[test]
    fn test_validate_tenant() {
        assert!(validate_tenant("acme").is_ok());
        assert!(validate_tenant("").is_err());
        assert!(validate_tenant(" acme").is_err());
        assert!(validate_tenant("a/b").is_err());
        assert!(validate_tenant("..").is_err());
    }
}
