//! Archive engine: the two state transitions of a unit.
//!
//! ```text
//!   Unarchived ──archive──▶ Archived ──restore──▶ Unarchived
//! ```
//!
//! Both transitions are checkpointed pipelines.  Nothing irreversible
//! happens before the step that makes it safe:
//!
//! | Step | Archive                                   | Restore                          |
//! |------|-------------------------------------------|----------------------------------|
//! | 1    | build container in a temp file            | decrypt + write every member     |
//! | 2    | commit: finish, verify, rename            | remove placeholder               |
//! | 3    | delete originals                          | remove container                 |
//! | 4    | write placeholder                         |                                  |
//!
//! A failure before the originals are touched leaves the filesystem as it
//! was.  A failure after that point is a torn state: it is logged with
//! `event=torn_state` and reported, never retried or rolled back.
//!
//! Each transition holds the unit's [`UnitLock`] for its whole duration.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{error, info, warn};
use walkdir::WalkDir;

use crate::container::{ContainerReader, ContainerWriter};
use crate::error::{Result, VaultError};
use crate::lock::UnitLock;
use crate::placeholder::{remove_placeholder, write_placeholder};
use crate::secret::Secret;
use crate::unit::{
    container_path, locate, placeholder_name, placeholder_path, split_identifier, Unit,
    UnitMetadata, UnitShape, ARCHIVED_SUFFIX,
};

/// On-disk condition of a unit, derived from which files exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    /// Original present; no container, no placeholder.
    Unarchived,
    /// Container and placeholder present; original gone.
    Archived,
    /// Any other combination; needs manual inspection.
    Inconsistent,
    /// Nothing on disk at all.
    Missing,
}

impl UnitState {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitState::Unarchived   => "unarchived",
            UnitState::Archived     => "archived",
            UnitState::Inconsistent => "inconsistent",
            UnitState::Missing      => "missing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedUnit {
    pub container:   PathBuf,
    pub placeholder: PathBuf,
    /// Member names in archive order.
    pub members:     Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredUnit {
    pub root_name: String,
    /// Directory the members were extracted into.
    pub target:    PathBuf,
    pub files:     Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ArchiveEngine {
    base_dir:  PathBuf,
    entry_ext: String,
}

impl ArchiveEngine {
    pub fn new(base_dir: impl Into<PathBuf>, entry_ext: impl Into<String>) -> Self {
        Self { base_dir: base_dir.into(), entry_ext: entry_ext.into() }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn entry_ext(&self) -> &str {
        &self.entry_ext
    }

    // ── Archive ──────────────────────────────────────────────────────────────

    /// Replace `unit` with an encrypted container plus a placeholder.
    ///
    /// The caller is expected to have checked permissions and that the unit
    /// is inactive; this only re-checks what it can see on disk.
    pub fn archive(&self, unit: &Unit, metadata: &UnitMetadata, secret: &Secret) -> Result<ArchivedUnit> {
        self.run_archive(unit, metadata, secret, collect_sources, delete_originals)
    }

    fn run_archive<C, D>(
        &self,
        unit: &Unit,
        metadata: &UnitMetadata,
        secret: &Secret,
        collect: C,
        delete: D,
    ) -> Result<ArchivedUnit>
    where
        C: FnOnce(&Unit) -> Result<Vec<(String, PathBuf)>>,
        D: FnOnce(&Unit) -> io::Result<()>,
    {
        self.check_restorable_shape(unit)?;
        let _lock = UnitLock::acquire(&self.base_dir, &unit.root_name, "archive")?;
        let container   = container_path(&self.base_dir, &unit.root_name);
        let placeholder = placeholder_path(&self.base_dir, &unit.root_name, &self.entry_ext);
        info!(
            "event=archive_start module=engine unit={} shape={:?}",
            unit.identifier, unit.shape
        );

        if !unit.root_path.exists() {
            return Err(VaultError::Create {
                path:   unit.root_path.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "unit root does not exist"),
            });
        }
        if placeholder.exists() {
            return Err(VaultError::Create {
                path:   placeholder,
                source: io::Error::new(io::ErrorKind::AlreadyExists, "placeholder already exists"),
            });
        }

        let sources = collect(unit)?;
        let mut writer = ContainerWriter::create(&container, secret)?;
        for (name, path) in &sources {
            writer.add_file(name, path)?;
        }
        writer.commit()?;

        // Point of no return: the container is verified, the originals go.
        if let Err(source) = delete(unit) {
            error!(
                "event=torn_state module=engine kind=partial_delete unit={} container={} err={source}",
                unit.identifier,
                container.display()
            );
            return Err(VaultError::PartialDelete { path: unit.root_path.clone(), source });
        }

        if let Err(source) = write_placeholder(&placeholder, metadata) {
            error!(
                "event=torn_state module=engine kind=placeholder_failed unit={} placeholder={} err={source}",
                unit.identifier,
                placeholder.display()
            );
            return Err(VaultError::Placeholder { path: placeholder, source });
        }

        info!(
            "event=archive_done module=engine status=ok unit={} members={}",
            unit.identifier,
            sources.len()
        );
        Ok(ArchivedUnit {
            container,
            placeholder,
            members: sources.into_iter().map(|(name, _)| name).collect(),
        })
    }

    /// Restore decides the shape from the root name: a root ending in
    /// `.<entry_ext>` is a single file, anything else a directory.  A unit
    /// that would be restored as the other shape is refused up front.
    fn check_restorable_shape(&self, unit: &Unit) -> Result<()> {
        let looks_single = unit.root_name.ends_with(&format!(".{}", self.entry_ext));
        let is_single = unit.shape == UnitShape::SingleFile;
        if looks_single == is_single {
            return Ok(());
        }
        let what = if is_single {
            "single-file unit does not carry the entry extension"
        } else {
            "directory unit is named like an entry file"
        };
        Err(VaultError::Create {
            path:   unit.root_path.clone(),
            source: io::Error::new(io::ErrorKind::InvalidInput, what),
        })
    }

    // ── Restore ──────────────────────────────────────────────────────────────

    /// Map a placeholder identifier to `(root name, extraction target)`.
    ///
    /// `demo_archived.php` restores into `<base>/demo/`; a single-file unit
    /// `hello.php_archived.php` restores into `<base>/` itself.
    pub fn restore_target(&self, identifier: &str) -> Result<(String, PathBuf)> {
        let invalid = || VaultError::InvalidIdentifier(identifier.to_owned());
        let (dir, _) = split_identifier(identifier)?;
        if dir.is_some() {
            return Err(invalid());
        }
        let suffix = format!("{ARCHIVED_SUFFIX}.{}", self.entry_ext);
        let root_name = identifier.strip_suffix(suffix.as_str()).ok_or_else(invalid)?;
        if root_name.is_empty() {
            return Err(invalid());
        }
        let single_file = root_name.ends_with(&format!(".{}", self.entry_ext));
        let target = if single_file {
            self.base_dir.clone()
        } else {
            self.base_dir.join(root_name)
        };
        Ok((root_name.to_owned(), target))
    }

    /// Decrypt the container behind placeholder `identifier` back into place,
    /// then remove the placeholder and the container.
    pub fn restore(&self, identifier: &str, secret: &Secret) -> Result<RestoredUnit> {
        let (root_name, target) = self.restore_target(identifier)?;
        let _lock = UnitLock::acquire(&self.base_dir, &root_name, "restore")?;
        let container   = container_path(&self.base_dir, &root_name);
        let placeholder = self.base_dir.join(identifier);
        info!("event=restore_start module=engine placeholder={identifier}");

        if !container.is_file() {
            return Err(VaultError::ContainerMissing(container));
        }

        let files = {
            let mut reader = ContainerReader::open(&container)?;
            reader.extract_all(&target, secret)?
        };

        // Both removals are attempted whatever happens to the other one.
        let mut failures = Vec::new();
        if let Err(e) = remove_placeholder(&placeholder) {
            failures.push(format!("placeholder: {e}"));
        }
        if let Err(e) = fs::remove_file(&container) {
            failures.push(format!("container: {e}"));
        }
        if !failures.is_empty() {
            let detail = failures.join("; ");
            error!(
                "event=torn_state module=engine kind=cleanup_failed unit={root_name} detail={detail}"
            );
            return Err(VaultError::Cleanup(detail));
        }

        info!(
            "event=restore_done module=engine status=ok unit={root_name} files={}",
            files.len()
        );
        Ok(RestoredUnit { root_name, target, files })
    }

    // ── State ────────────────────────────────────────────────────────────────

    /// Classify the unit rooted at `root_name` by what exists on disk.
    pub fn state(&self, root_name: &str) -> UnitState {
        let original    = self.base_dir.join(root_name).exists();
        let container   = container_path(&self.base_dir, root_name).exists();
        let placeholder = placeholder_path(&self.base_dir, root_name, &self.entry_ext).exists();
        match (original, container, placeholder) {
            (true,  false, false) => UnitState::Unarchived,
            (false, true,  true)  => UnitState::Archived,
            (false, false, false) => UnitState::Missing,
            _                     => UnitState::Inconsistent,
        }
    }

    /// Root name for either a unit identifier or a placeholder identifier.
    ///
    /// A placeholder-shaped name counts as a placeholder only while its
    /// container exists, so a unit that merely happens to be called
    /// `foo_archived.php` is still treated as a unit.
    pub fn root_name_of(&self, identifier: &str) -> Result<String> {
        if let Ok((root_name, _)) = self.restore_target(identifier) {
            if container_path(&self.base_dir, &root_name).exists() {
                return Ok(root_name);
            }
        }
        Ok(locate(identifier, &self.base_dir)?.root_name)
    }

    /// The placeholder identifier an archived unit will be listed under.
    pub fn placeholder_identifier(&self, root_name: &str) -> String {
        placeholder_name(root_name, &self.entry_ext)
    }
}

/// `(member name, source path)` for every file of the unit, in the order
/// they go into the container.
///
/// Directory units are walked depth-first with entries sorted by name, so
/// the member order is the same on every run.  Symlinks and other special
/// files are refused rather than silently dropped, because the delete step
/// would lose them.
fn collect_sources(unit: &Unit) -> Result<Vec<(String, PathBuf)>> {
    let unsupported = |path: &Path, what: &str| VaultError::Create {
        path:   path.to_owned(),
        source: io::Error::new(io::ErrorKind::Unsupported, what.to_owned()),
    };

    match unit.shape {
        UnitShape::SingleFile => {
            let meta = fs::symlink_metadata(&unit.root_path)
                .map_err(|e| VaultError::Create { path: unit.root_path.clone(), source: e })?;
            if !meta.is_file() {
                return Err(unsupported(&unit.root_path, "single-file unit is not a regular file"));
            }
            Ok(vec![(unit.identifier.clone(), unit.root_path.clone())])
        }
        UnitShape::Directory => {
            if !fs::symlink_metadata(&unit.root_path).map(|m| m.is_dir()).unwrap_or(false) {
                return Err(unsupported(&unit.root_path, "directory unit is not a directory"));
            }
            let mut out = Vec::new();
            for entry in WalkDir::new(&unit.root_path).follow_links(false).sort_by_file_name() {
                let entry = entry.map_err(|e| {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| unit.root_path.clone());
                    VaultError::Create { path, source: e.into() }
                })?;
                let kind = entry.file_type();
                if kind.is_dir() {
                    continue;
                }
                if !kind.is_file() {
                    return Err(unsupported(entry.path(), "not a regular file"));
                }
                let rel = entry.path().strip_prefix(&unit.root_path)
                    .map_err(|_| unsupported(entry.path(), "outside the unit root"))?;
                let name = rel
                    .components()
                    .map(|c| c.as_os_str().to_str())
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| unsupported(entry.path(), "file name is not UTF-8"))?
                    .join("/");
                out.push((name, entry.path().to_path_buf()));
            }
            Ok(out)
        }
    }
}

fn delete_originals(unit: &Unit) -> io::Result<()> {
    match unit.shape {
        UnitShape::SingleFile => fs::remove_file(&unit.root_path),
        UnitShape::Directory  => {
            let result = fs::remove_dir_all(&unit.root_path);
            if result.is_err() && !unit.root_path.exists() {
                warn!("event=delete_originals module=engine status=raced unit={}", unit.identifier);
                return Ok(());
            }
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::unit::locate;
    use tempfile::tempdir;

    fn engine(base: &Path) -> ArchiveEngine {
        ArchiveEngine::new(base, "php")
    }

    fn demo_unit(base: &Path) -> Unit {
        fs::create_dir_all(base.join("demo/assets/icons")).unwrap();
        fs::write(base.join("demo/demo.php"), b"<?php /* Plugin Name: Demo */").unwrap();
        fs::write(base.join("demo/assets/logo.png"), [0x89u8, b'P', b'N', b'G', 0, 1, 2]).unwrap();
        fs::write(base.join("demo/assets/icons/a.svg"), b"<svg/>").unwrap();
        fs::write(base.join("demo/zz.txt"), b"").unwrap();
        locate("demo/demo.php", base).unwrap()
    }

    #[test]
    fn members_are_relative_and_deterministically_ordered() {
        let dir = tempdir().unwrap();
        let unit = demo_unit(dir.path());
        let names: Vec<String> = collect_sources(&unit).unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["assets/icons/a.svg", "assets/logo.png", "demo.php", "zz.txt"]);
    }

    #[test]
    fn restore_target_for_both_shapes() {
        let e = engine(Path::new("/p"));
        assert_eq!(
            e.restore_target("demo_archived.php").unwrap(),
            ("demo".to_string(), PathBuf::from("/p/demo"))
        );
        assert_eq!(
            e.restore_target("hello.php_archived.php").unwrap(),
            ("hello.php".to_string(), PathBuf::from("/p"))
        );
        for bad in ["demo.php", "_archived.php", "demo/demo_archived.php", "demo_archived.zip"] {
            assert_eq!(e.restore_target(bad).unwrap_err().kind(), ErrorKind::NotFound, "{bad}");
        }
    }

    #[test]
    fn state_follows_files_on_disk() {
        let dir = tempdir().unwrap();
        let base = dir.path();
        let e = engine(base);
        assert_eq!(e.state("demo"), UnitState::Missing);

        let unit = demo_unit(base);
        assert_eq!(e.state("demo"), UnitState::Unarchived);

        e.archive(&unit, &UnitMetadata::default(), &Secret::new("k")).unwrap();
        assert_eq!(e.state("demo"), UnitState::Archived);
        assert_eq!(e.root_name_of("demo_archived.php").unwrap(), "demo");
        assert_eq!(e.root_name_of("demo/demo.php").unwrap(), "demo");

        fs::remove_file(base.join("demo_archived.php")).unwrap();
        assert_eq!(e.state("demo"), UnitState::Inconsistent);
    }

    #[test]
    fn symlinks_block_archiving_before_anything_is_written() {
        let dir = tempdir().unwrap();
        let base = dir.path();
        let unit = demo_unit(base);
        #[cfg(unix)]
        std::os::unix::fs::symlink(base.join("demo/demo.php"), base.join("demo/link.php")).unwrap();
        #[cfg(not(unix))]
        return;

        let err = engine(base).archive(&unit, &UnitMetadata::default(), &Secret::new("k")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CreateFailed);
        assert!(base.join("demo/demo.php").exists());
        assert!(!base.join("demo_archived.zip").exists());
        assert!(!base.join(".demo.lock").exists());
    }

    #[test]
    fn held_lock_refuses_both_transitions() {
        let dir = tempdir().unwrap();
        let base = dir.path();
        let unit = demo_unit(base);
        let _held = UnitLock::acquire(base, "demo", "test").unwrap();
        let e = engine(base);

        let err = e.archive(&unit, &UnitMetadata::default(), &Secret::new("k")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Locked);
        let err = e.restore("demo_archived.php", &Secret::new("k")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Locked);
        assert_eq!(e.state("demo"), UnitState::Unarchived);
    }

    #[test]
    fn existing_placeholder_blocks_archiving() {
        let dir = tempdir().unwrap();
        let base = dir.path();
        let unit = demo_unit(base);
        fs::write(base.join("demo_archived.php"), b"stale").unwrap();

        let err = engine(base).archive(&unit, &UnitMetadata::default(), &Secret::new("k")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CreateFailed);
        assert!(base.join("demo/demo.php").exists());
        assert_eq!(fs::read(base.join("demo_archived.php")).unwrap(), b"stale");
    }

    #[test]
    fn unit_whose_shape_restore_cannot_tell_is_refused() {
        let dir = tempdir().unwrap();
        let base = dir.path();
        fs::create_dir(base.join("tool.php")).unwrap();
        fs::write(base.join("tool.php/main.php"), b"<?php").unwrap();
        fs::write(base.join("notes.txt"), b"plain").unwrap();
        let e = engine(base);

        for id in ["tool.php/main.php", "notes.txt"] {
            let unit = locate(id, base).unwrap();
            let err = e.archive(&unit, &UnitMetadata::default(), &Secret::new("k")).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::CreateFailed, "{id}");
        }
        assert!(base.join("tool.php/main.php").is_file());
        assert!(base.join("notes.txt").is_file());
        assert!(!base.join("tool.php_archived.zip").exists());
        assert!(!base.join(".tool.php.lock").exists());
    }

    #[test]
    fn failed_commit_keeps_originals_and_leaves_no_debris() {
        let dir = tempdir().unwrap();
        let base = dir.path();
        let unit = demo_unit(base);
        let listing = || {
            let mut names: Vec<_> = fs::read_dir(base).unwrap().map(|e| e.unwrap().file_name()).collect();
            names.sort();
            names
        };
        let listing_before = listing();

        // A source that vanished between the walk and the read.
        let vanishing = |u: &Unit| -> Result<Vec<(String, PathBuf)>> {
            let mut sources = collect_sources(u)?;
            sources.push(("gone.txt".into(), u.root_path.join("gone.txt")));
            Ok(sources)
        };
        let err = engine(base)
            .run_archive(&unit, &UnitMetadata::default(), &Secret::new("k"), vanishing, delete_originals)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::CommitFailed);
        assert_eq!(fs::read(base.join("demo/assets/icons/a.svg")).unwrap(), b"<svg/>");
        assert_eq!(listing(), listing_before);
        assert_eq!(engine(base).state("demo"), UnitState::Unarchived);
    }

    #[test]
    fn partial_delete_is_a_torn_state_with_the_container_kept() {
        let dir = tempdir().unwrap();
        let base = dir.path();
        let unit = demo_unit(base);

        let stuck = |u: &Unit| -> io::Result<()> {
            fs::remove_file(u.root_path.join("zz.txt"))?;
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "assets is busy"))
        };
        let err = engine(base)
            .run_archive(&unit, &UnitMetadata::default(), &Secret::new("k"), collect_sources, stuck)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::PartialDelete);
        assert!(err.kind().is_torn_state());
        assert!(base.join("demo_archived.zip").is_file());
        assert!(!base.join("demo_archived.php").exists());
        assert!(!base.join(".demo.lock").exists());
        assert_eq!(engine(base).state("demo"), UnitState::Inconsistent);

        // The container is complete, so the unit can still be recovered from it.
        let mut reader = ContainerReader::open(&base.join("demo_archived.zip")).unwrap();
        assert_eq!(reader.len(), 4);
        let (name, data) = reader.read_member(3, &Secret::new("k")).unwrap();
        assert_eq!((name.as_str(), data.as_slice()), ("zz.txt", b"".as_slice()));
    }

    #[test]
    fn tampered_container_fails_to_restore_and_writes_nothing() {
        let dir = tempdir().unwrap();
        let base = dir.path();
        let unit = demo_unit(base);
        let e = engine(base);
        let archived = e.archive(&unit, &UnitMetadata::default(), &Secret::new("k")).unwrap();

        // Flip the first ciphertext byte of the first member: local header,
        // name, extra field, then 16 bytes of salt and 2 of password check.
        let mut bytes = fs::read(&archived.container).unwrap();
        let name_len  = u16::from_le_bytes([bytes[26], bytes[27]]) as usize;
        let extra_len = u16::from_le_bytes([bytes[28], bytes[29]]) as usize;
        let offset = 30 + name_len + extra_len + 16 + 2;
        bytes[offset] ^= 0xff;
        fs::write(&archived.container, &bytes).unwrap();

        let err = e.restore("demo_archived.php", &Secret::new("k")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DecryptFailed);
        assert!(!base.join("demo").exists());
        assert!(archived.container.is_file());
        assert!(archived.placeholder.is_file());
        assert_eq!(e.state("demo"), UnitState::Archived);
    }
}
