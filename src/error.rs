//! Error kinds and the fixed user-facing messages.
//!
//! Every failure inside the crate is a [`VaultError`].  Callers at the
//! request boundary only ever see its [`ErrorKind`] and one of the
//! [`messages`] strings; details stay in the log.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification handed back to collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Identifier unknown, or the unit / container is missing on disk.
    NotFound,
    /// The caller lacks the capability, the token is invalid, or the unit is active.
    PermissionDenied,
    /// Another archive or restore of the same unit holds the lock.
    Locked,
    /// The container could not be created.
    CreateFailed,
    /// The container could not be finalized or failed verification.
    CommitFailed,
    /// The container is committed but removing the originals failed.
    PartialDelete,
    /// Originals are gone but the placeholder could not be written.
    PlaceholderFailed,
    /// Wrong secret or corrupted container.
    DecryptFailed,
    /// A decrypted member could not be written to disk.
    ExtractFailed,
    /// Extraction succeeded but the placeholder or container could not be removed.
    CleanupFailed,
}

impl ErrorKind {
    /// Kinds that leave the filesystem half-transitioned and need a human.
    pub fn is_torn_state(self) -> bool {
        matches!(
            self,
            ErrorKind::PartialDelete | ErrorKind::PlaceholderFailed | ErrorKind::CleanupFailed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound          => "not_found",
            ErrorKind::PermissionDenied  => "permission_denied",
            ErrorKind::Locked            => "locked",
            ErrorKind::CreateFailed      => "create_failed",
            ErrorKind::CommitFailed      => "commit_failed",
            ErrorKind::PartialDelete     => "partial_delete",
            ErrorKind::PlaceholderFailed => "placeholder_failed",
            ErrorKind::DecryptFailed     => "decrypt_failed",
            ErrorKind::ExtractFailed     => "extract_failed",
            ErrorKind::CleanupFailed     => "cleanup_failed",
        }
    }

    /// The fixed message shown to the operator for this kind.
    pub fn message(self) -> &'static str {
        match self {
            ErrorKind::PermissionDenied => messages::NOT_ALLOWED,
            k if k.is_torn_state()      => messages::INSPECT,
            _                           => messages::FAILED,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The complete set of strings an entry point may display.
pub mod messages {
    pub const ARCHIVED:    &str = "Plugin archived successfully.";
    pub const RESTORED:    &str = "Plugin restored successfully.";
    pub const FAILED:      &str = "Something failed, check that the plugin files exist.";
    pub const NOT_ALLOWED: &str = "Action not allowed.";
    pub const INSPECT:     &str = "The operation stopped halfway, the plugin folder needs manual inspection.";
}

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Invalid unit identifier: {0:?}")]
    InvalidIdentifier(String),
    #[error("Unit is not registered: {0}")]
    NotRegistered(String),
    #[error("Unit root does not exist: {}", .0.display())]
    RootMissing(PathBuf),
    #[error("Container does not exist: {}", .0.display())]
    ContainerMissing(PathBuf),
    #[error("Not an unarchived unit: {0}")]
    NotUnarchived(String),
    #[error("Caller lacks the {0} capability")]
    Forbidden(&'static str),
    #[error("Action token rejected for {0}")]
    BadToken(&'static str),
    #[error("Unit is active: {0}")]
    UnitActive(String),
    #[error("Unit is locked by another operation: {}", .0.display())]
    Locked(PathBuf),
    #[error("Cannot create container {}: {source}", .path.display())]
    Create { path: PathBuf, #[source] source: io::Error },
    #[error("Cannot commit container: {0}")]
    Commit(String),
    #[error("Originals only partially deleted under {}: {source}", .path.display())]
    PartialDelete { path: PathBuf, #[source] source: io::Error },
    #[error("Cannot write placeholder {}: {source}", .path.display())]
    Placeholder { path: PathBuf, #[source] source: io::Error },
    #[error("Cannot decrypt member {member:?}: {reason}")]
    Decrypt { member: String, reason: String },
    #[error("Cannot write extracted member {}: {source}", .path.display())]
    Extract { path: PathBuf, #[source] source: io::Error },
    #[error("Cleanup after restore failed: {0}")]
    Cleanup(String),
}

impl VaultError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::InvalidIdentifier(_)
            | VaultError::NotRegistered(_)
            | VaultError::RootMissing(_)
            | VaultError::ContainerMissing(_)
            | VaultError::NotUnarchived(_)    => ErrorKind::NotFound,
            VaultError::Forbidden(_)
            | VaultError::BadToken(_)
            | VaultError::UnitActive(_)       => ErrorKind::PermissionDenied,
            VaultError::Locked(_)             => ErrorKind::Locked,
            VaultError::Create { .. }         => ErrorKind::CreateFailed,
            VaultError::Commit(_)             => ErrorKind::CommitFailed,
            VaultError::PartialDelete { .. }  => ErrorKind::PartialDelete,
            VaultError::Placeholder { .. }    => ErrorKind::PlaceholderFailed,
            VaultError::Decrypt { .. }        => ErrorKind::DecryptFailed,
            VaultError::Extract { .. }        => ErrorKind::ExtractFailed,
            VaultError::Cleanup(_)            => ErrorKind::CleanupFailed,
        }
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn torn_kinds_get_the_inspection_message() {
        for kind in [ErrorKind::PartialDelete, ErrorKind::PlaceholderFailed, ErrorKind::CleanupFailed] {
            assert!(kind.is_torn_state());
            assert_eq!(kind.message(), messages::INSPECT);
        }
        assert!(!ErrorKind::DecryptFailed.is_torn_state());
        assert_eq!(ErrorKind::NotFound.message(), messages::FAILED);
        assert_eq!(ErrorKind::PermissionDenied.message(), messages::NOT_ALLOWED);
    }

    #[test]
    fn messages_never_carry_paths() {
        let err = VaultError::RootMissing(PathBuf::from("/srv/plugins/demo"));
        assert!(err.to_string().contains("/srv/plugins/demo"));
        assert!(!err.kind().message().contains('/'));
    }
}
