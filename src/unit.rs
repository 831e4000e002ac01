//! Unit resolution: identifier → root path and shape.
//!
//! An identifier is the entry file relative to the plugin directory, either
//! `"standalone.php"` (the file *is* the unit) or `"demo/demo.php"` (the
//! whole `demo/` directory is the unit).  Resolution is recomputed on every
//! operation and has no side effects.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};
use crate::host::UnitRegistry;

/// Suffix inserted between the unit root and the container/placeholder extension.
pub const ARCHIVED_SUFFIX: &str = "_archived";
/// Extension of the encrypted container.
pub const CONTAINER_EXT:   &str = "zip";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitShape {
    SingleFile,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub identifier: String,
    pub shape:      UnitShape,
    /// Directory name, or the identifier itself for single-file units.
    pub root_name:  String,
    pub root_path:  PathBuf,
}

/// Metadata restated in the placeholder.  Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitMetadata {
    pub name:        Option<String>,
    pub homepage:    Option<String>,
    pub description: Option<String>,
    pub version:     Option<String>,
    pub author:      Option<String>,
    pub author_uri:  Option<String>,
}

/// Split an identifier into `(directory, file)`.
///
/// Rejects absolute paths, `.`/`..` components, empty segments and anything
/// nested deeper than one directory; such identifiers would otherwise point
/// the delete step somewhere other than a top-level unit.
pub fn split_identifier(identifier: &str) -> Result<(Option<&str>, &str)> {
    let invalid = || VaultError::InvalidIdentifier(identifier.to_owned());
    if identifier.is_empty() || identifier.contains('\\') {
        return Err(invalid());
    }
    if !Path::new(identifier).components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(invalid());
    }
    let parts: Vec<&str> = identifier.split('/').collect();
    match parts.as_slice() {
        [file] if !file.is_empty()                      => Ok((None, file)),
        [dir, file] if !dir.is_empty() && !file.is_empty() => Ok((Some(dir), file)),
        _                                               => Err(invalid()),
    }
}

/// Determine shape and root for `identifier` under `base_dir`.
///
/// Fails with a not-found error when the registry does not list the
/// identifier or the root is absent on disk.
pub fn resolve<R: UnitRegistry + ?Sized>(
    identifier: &str,
    base_dir:   &Path,
    registry:   &R,
) -> Result<Unit> {
    let unit = locate(identifier, base_dir)?;
    if registry.lookup(identifier).is_none() {
        return Err(VaultError::NotRegistered(identifier.to_owned()));
    }
    if !unit.root_path.exists() {
        return Err(VaultError::RootMissing(unit.root_path));
    }
    Ok(unit)
}

/// Shape and root of `identifier` without consulting the registry or disk.
pub fn locate(identifier: &str, base_dir: &Path) -> Result<Unit> {
    let (shape, root_name) = match split_identifier(identifier)? {
        (None, _)      => (UnitShape::SingleFile, identifier.to_owned()),
        (Some(dir), _) => (UnitShape::Directory,  dir.to_owned()),
    };
    Ok(Unit {
        identifier: identifier.to_owned(),
        shape,
        root_path:  base_dir.join(&root_name),
        root_name,
    })
}

/// `<base>/<root>_archived.zip`
pub fn container_path(base_dir: &Path, root_name: &str) -> PathBuf {
    base_dir.join(format!("{root_name}{ARCHIVED_SUFFIX}.{CONTAINER_EXT}"))
}

/// `<base>/<root>_archived.<entry_ext>`
pub fn placeholder_path(base_dir: &Path, root_name: &str, entry_ext: &str) -> PathBuf {
    base_dir.join(placeholder_name(root_name, entry_ext))
}

pub fn placeholder_name(root_name: &str, entry_ext: &str) -> String {
    format!("{root_name}{ARCHIVED_SUFFIX}.{entry_ext}")
}
