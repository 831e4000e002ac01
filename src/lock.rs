//! Per-unit advisory lock.
//!
//! An archive or restore holds `<base>/.<root>.lock` for its whole duration.
//! The file is created with `create_new`, so a second operation on the same
//! unit fails fast instead of tearing the first one.  The lock is released
//! when the guard is dropped, on every exit path.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};

/// Contents of a lock file, for whoever finds a stale one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockRecord {
    pub pid:         u32,
    pub operation:   String,
    pub acquired_at: String,
}

#[derive(Debug)]
pub struct UnitLock {
    path: PathBuf,
}

pub fn lock_path(base_dir: &Path, root_name: &str) -> PathBuf {
    base_dir.join(format!(".{root_name}.lock"))
}

impl UnitLock {
    pub fn acquire(base_dir: &Path, root_name: &str, operation: &str) -> Result<Self> {
        let path = lock_path(base_dir, root_name);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f)                                       => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = Self::inspect(base_dir, root_name);
                warn!(
                    "event=lock_held module=lock unit={root_name} path={} holder={}",
                    path.display(),
                    describe_holder(holder.as_ref())
                );
                return Err(VaultError::Locked(path));
            }
            Err(e) => return Err(VaultError::Create { path, source: e }),
        };
        let record = LockRecord {
            pid:         std::process::id(),
            operation:   operation.to_owned(),
            acquired_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        };
        // The record is informational; an empty lock file still locks.
        let written = serde_json::to_vec(&record)
            .map_err(std::io::Error::from)
            .and_then(|bytes| file.write_all(&bytes));
        if let Err(e) = written {
            warn!("event=lock_record module=lock status=error path={} err={e}", path.display());
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record of a lock held by someone else.
    pub fn inspect(base_dir: &Path, root_name: &str) -> Option<LockRecord> {
        let bytes = fs::read(lock_path(base_dir, root_name)).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

/// `pid=.. operation=.. acquired_at=..`, or `unknown` for an unreadable
/// record.  Removing the lock file by hand is the only way past a stale one.
fn describe_holder(record: Option<&LockRecord>) -> String {
    match record {
        Some(r) => format!("pid={} operation={} acquired_at={}", r.pid, r.operation, r.acquired_at),
        None    => "unknown".to_owned(),
    }
}

impl Drop for UnitLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("event=lock_release module=lock status=error path={} err={e}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind as Kind;

    #[test]
    fn second_acquire_fails_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let first = UnitLock::acquire(dir.path(), "demo", "archive").unwrap();
        let err = UnitLock::acquire(dir.path(), "demo", "restore").unwrap_err();
        assert_eq!(err.kind(), Kind::Locked);

        let record = UnitLock::inspect(dir.path(), "demo").unwrap();
        assert_eq!(record.operation, "archive");
        assert_eq!(record.pid, std::process::id());

        // other units are independent
        let _other = UnitLock::acquire(dir.path(), "other", "archive").unwrap();

        drop(first);
        assert!(!lock_path(dir.path(), "demo").exists());
        UnitLock::acquire(dir.path(), "demo", "restore").unwrap();
    }

    #[test]
    fn stale_lock_still_locks_and_names_its_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(dir.path(), "demo");
        fs::write(&path, br#"{"pid":4242,"operation":"archive","acquired_at":"2026-01-02T03:04:05Z"}"#).unwrap();

        let err = UnitLock::acquire(dir.path(), "demo", "restore").unwrap_err();
        assert_eq!(err.kind(), Kind::Locked);
        let record = UnitLock::inspect(dir.path(), "demo");
        assert_eq!(
            describe_holder(record.as_ref()),
            "pid=4242 operation=archive acquired_at=2026-01-02T03:04:05Z"
        );
        assert!(path.exists());

        fs::write(&path, b"").unwrap();
        assert_eq!(UnitLock::acquire(dir.path(), "demo", "restore").unwrap_err().kind(), Kind::Locked);
        assert_eq!(describe_holder(UnitLock::inspect(dir.path(), "demo").as_ref()), "unknown");
    }
}
