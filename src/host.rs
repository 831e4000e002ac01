//! Capabilities supplied by the host application.
//!
//! The vault never talks to the host directly.  It asks three narrow
//! questions: which units exist ([`UnitRegistry`]), may the caller do this
//! ([`PermissionChecker`]), and is this request genuine ([`TokenVerifier`]).
//! The bundled implementations back a standalone deployment and the tests.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use uuid::Uuid;

use crate::header::read_header;
use crate::unit::UnitMetadata;

// ── Traits ───────────────────────────────────────────────────────────────────

/// Enumeration of installed units and their activation status.
pub trait UnitRegistry {
    /// Every known identifier with its metadata, sorted by identifier.
    fn units(&self) -> Vec<(String, UnitMetadata)>;

    fn lookup(&self, identifier: &str) -> Option<UnitMetadata> {
        self.units().into_iter().find(|(id, _)| id == identifier).map(|(_, m)| m)
    }

    fn is_active(&self, identifier: &str) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Required to archive (the originals get deleted).
    DeleteUnits,
    /// Required to restore (files get installed).
    InstallUnits,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::DeleteUnits  => "delete_units",
            Capability::InstallUnits => "install_units",
        }
    }
}

pub trait PermissionChecker {
    fn allows(&self, capability: Capability) -> bool;
}

/// The two actions a request can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Archive,
    Restore,
}

impl Action {
    /// Name the host scopes tokens and pages by.
    pub fn name(self) -> &'static str {
        match self {
            Action::Archive => "archive-plugin",
            Action::Restore => "unarchive-plugin",
        }
    }

    /// Link label for the host's listing.
    pub fn label(self) -> &'static str {
        match self {
            Action::Archive => "Archive & Delete",
            Action::Restore => "Unarchive",
        }
    }

    pub fn capability(self) -> Capability {
        match self {
            Action::Archive => Capability::DeleteUnits,
            Action::Restore => Capability::InstallUnits,
        }
    }
}

/// One-time request tokens, scoped per action.
pub trait TokenVerifier {
    fn issue(&self, action: Action) -> String;
    fn verify(&self, token: &str, action: Action) -> bool;
}

impl<T: UnitRegistry + ?Sized> UnitRegistry for &T {
    fn units(&self) -> Vec<(String, UnitMetadata)> {
        (**self).units()
    }

    fn lookup(&self, identifier: &str) -> Option<UnitMetadata> {
        (**self).lookup(identifier)
    }

    fn is_active(&self, identifier: &str) -> bool {
        (**self).is_active(identifier)
    }
}

impl<T: PermissionChecker + ?Sized> PermissionChecker for &T {
    fn allows(&self, capability: Capability) -> bool {
        (**self).allows(capability)
    }
}

impl<T: TokenVerifier + ?Sized> TokenVerifier for &T {
    fn issue(&self, action: Action) -> String {
        (**self).issue(action)
    }

    fn verify(&self, token: &str, action: Action) -> bool {
        (**self).verify(token, action)
    }
}

// ── HeaderRegistry ───────────────────────────────────────────────────────────

/// Registry built by scanning the plugin directory the way the host does.
///
/// Candidates are entry files directly under `base_dir` and entry files one
/// directory deep.  Hidden entries are skipped.  A candidate is a unit when
/// its header carries a name.
#[derive(Debug, Clone)]
pub struct HeaderRegistry {
    base_dir:  PathBuf,
    entry_ext: String,
    active:    BTreeSet<String>,
}

impl HeaderRegistry {
    pub fn new(base_dir: impl Into<PathBuf>, entry_ext: impl Into<String>) -> Self {
        Self { base_dir: base_dir.into(), entry_ext: entry_ext.into(), active: BTreeSet::new() }
    }

    pub fn with_active<I, S>(mut self, active: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.active = active.into_iter().map(Into::into).collect();
        self
    }

    fn is_entry(&self, path: &Path) -> bool {
        path.is_file()
            && path.extension().and_then(|e| e.to_str()) == Some(self.entry_ext.as_str())
    }

    fn scan(&self) -> BTreeMap<String, UnitMetadata> {
        let mut found = BTreeMap::new();
        for (name, path) in visible_entries(&self.base_dir) {
            if path.is_dir() {
                for (inner, inner_path) in visible_entries(&path) {
                    if self.is_entry(&inner_path) {
                        self.consider(&mut found, format!("{name}/{inner}"), &inner_path);
                    }
                }
            } else if self.is_entry(&path) {
                self.consider(&mut found, name, &path);
            }
        }
        found
    }

    fn consider(&self, found: &mut BTreeMap<String, UnitMetadata>, id: String, path: &Path) {
        match read_header(path) {
            Ok(Some(meta)) => { found.insert(id, meta); }
            Ok(None)       => {}
            Err(e)         => debug!("event=registry_skip module=host path={} err={e}", path.display()),
        }
    }
}

impl UnitRegistry for HeaderRegistry {
    fn units(&self) -> Vec<(String, UnitMetadata)> {
        self.scan().into_iter().collect()
    }

    fn is_active(&self, identifier: &str) -> bool {
        self.active.contains(identifier)
    }
}

fn visible_entries(dir: &Path) -> Vec<(String, PathBuf)> {
    let Ok(rd) = fs::read_dir(dir) else { return Vec::new() };
    let mut out: Vec<(String, PathBuf)> = rd
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().into_string().ok()?;
            (!name.starts_with('.')).then(|| (name, e.path()))
        })
        .collect();
    out.sort();
    out
}

// ── StaticPermissions ────────────────────────────────────────────────────────

/// Fixed answers, typically loaded from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaticPermissions {
    pub delete_units:  bool,
    pub install_units: bool,
}

impl StaticPermissions {
    pub fn all() -> Self {
        Self { delete_units: true, install_units: true }
    }
}

impl PermissionChecker for StaticPermissions {
    fn allows(&self, capability: Capability) -> bool {
        match capability {
            Capability::DeleteUnits  => self.delete_units,
            Capability::InstallUnits => self.install_units,
        }
    }
}

// ── SessionTokens ────────────────────────────────────────────────────────────

/// In-process one-time tokens.  A token verifies once, for the action it was
/// issued for; verifying it consumes it either way.
#[derive(Debug, Default)]
pub struct SessionTokens {
    issued: RefCell<HashMap<String, Action>>,
}

impl SessionTokens {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenVerifier for SessionTokens {
    fn issue(&self, action: Action) -> String {
        let token = Uuid::new_v4().simple().to_string();
        self.issued.borrow_mut().insert(token.clone(), action);
        token
    }

    fn verify(&self, token: &str, action: Action) -> bool {
        self.issued.borrow_mut().remove(token) == Some(action)
    }
}
