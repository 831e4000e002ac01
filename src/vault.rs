//! Request boundary between the host and the archive engine.
//!
//! [`Vault`] runs the checks the host would run before an action (token,
//! capability, activation, registration), then calls the engine.  Whatever
//! happens, the caller gets an [`Outcome`] back; no error or panic crosses
//! this boundary and the message is always one of [`crate::error::messages`].

use log::{error, info, warn};

use crate::engine::{ArchiveEngine, ArchivedUnit, RestoredUnit, UnitState};
use crate::error::{messages, ErrorKind, Result, VaultError};
use crate::host::{Action, PermissionChecker, TokenVerifier, UnitRegistry};
use crate::placeholder::is_archived_name;
use crate::secret::Secret;
use crate::unit::{resolve, UnitMetadata};

// ── Outcome ──────────────────────────────────────────────────────────────────

/// What an entry point reports to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub action:     Action,
    pub ok:         bool,
    pub error_kind: Option<ErrorKind>,
    pub message:    &'static str,
}

pub type ArchiveOutcome = Outcome;
pub type RestoreOutcome = Outcome;

impl Outcome {
    fn success(action: Action) -> Self {
        let message = match action {
            Action::Archive => messages::ARCHIVED,
            Action::Restore => messages::RESTORED,
        };
        Self { action, ok: true, error_kind: None, message }
    }

    fn failure(action: Action, kind: ErrorKind) -> Self {
        Self { action, ok: false, error_kind: Some(kind), message: kind.message() }
    }

    fn from_result<T>(action: Action, identifier: &str, result: Result<T>) -> Self {
        match result {
            Ok(_) => {
                info!("event=outcome module=vault action={} unit={identifier} status=ok", action.name());
                Self::success(action)
            }
            Err(e) => {
                let kind = e.kind();
                if kind.is_torn_state() {
                    error!(
                        "event=outcome module=vault action={} unit={identifier} status=torn kind={kind} err={e}",
                        action.name()
                    );
                } else {
                    warn!(
                        "event=outcome module=vault action={} unit={identifier} status=failed kind={kind} err={e}",
                        action.name()
                    );
                }
                Self::failure(action, kind)
            }
        }
    }
}

/// One row of the host's unit listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub identifier:      String,
    pub metadata:        UnitMetadata,
    pub active:          bool,
    pub state:           UnitState,
    /// Name carries the archived marker.  Display only.
    pub archived_marker: bool,
    pub action:          Option<Action>,
}

// ── Vault ────────────────────────────────────────────────────────────────────

pub struct Vault<R, P, T> {
    engine:      ArchiveEngine,
    registry:    R,
    permissions: P,
    tokens:      T,
}

impl<R, P, T> Vault<R, P, T>
where
    R: UnitRegistry,
    P: PermissionChecker,
    T: TokenVerifier,
{
    pub fn new(engine: ArchiveEngine, registry: R, permissions: P, tokens: T) -> Self {
        Self { engine, registry, permissions, tokens }
    }

    pub fn engine(&self) -> &ArchiveEngine {
        &self.engine
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Issue a token for `action`, as the host does when rendering a link.
    pub fn issue_token(&self, action: Action) -> String {
        self.tokens.issue(action)
    }

    /// Archive the unit whose entry file is `identifier`.
    pub fn archive(&self, identifier: &str, token: &str, secret: &Secret) -> ArchiveOutcome {
        Outcome::from_result(Action::Archive, identifier, self.try_archive(identifier, token, secret))
    }

    /// Restore the unit behind placeholder `identifier`.
    pub fn restore(&self, identifier: &str, token: &str, secret: &Secret) -> RestoreOutcome {
        Outcome::from_result(Action::Restore, identifier, self.try_restore(identifier, token, secret))
    }

    fn try_archive(&self, identifier: &str, token: &str, secret: &Secret) -> Result<ArchivedUnit> {
        self.admit(Action::Archive, token)?;
        if self.registry.is_active(identifier) {
            return Err(VaultError::UnitActive(identifier.to_owned()));
        }
        let metadata = self.registry.lookup(identifier)
            .ok_or_else(|| VaultError::NotRegistered(identifier.to_owned()))?;
        let unit = resolve(identifier, self.engine.base_dir(), &self.registry)?;
        // A live placeholder is listed like any unit; it is not one.
        if self.engine.root_name_of(identifier)? != unit.root_name
            || self.engine.state(&unit.root_name) != UnitState::Unarchived
        {
            return Err(VaultError::NotUnarchived(identifier.to_owned()));
        }
        self.engine.archive(&unit, &metadata, secret)
    }

    fn try_restore(&self, identifier: &str, token: &str, secret: &Secret) -> Result<RestoredUnit> {
        self.admit(Action::Restore, token)?;
        if self.registry.is_active(identifier) {
            return Err(VaultError::UnitActive(identifier.to_owned()));
        }
        self.engine.restore(identifier, secret)
    }

    fn admit(&self, action: Action, token: &str) -> Result<()> {
        let capability = action.capability();
        if !self.permissions.allows(capability) {
            return Err(VaultError::Forbidden(capability.as_str()));
        }
        if !self.tokens.verify(token, action) {
            return Err(VaultError::BadToken(action.name()));
        }
        Ok(())
    }

    // ── Listing ──────────────────────────────────────────────────────────────

    /// On-disk state of the unit behind `identifier` (unit or placeholder).
    pub fn status(&self, identifier: &str) -> Result<UnitState> {
        let root = self.engine.root_name_of(identifier)?;
        Ok(self.engine.state(&root))
    }

    /// The action link the host should offer for `identifier`, if any.
    ///
    /// Archive is offered for inactive, unarchived, registered units when the
    /// caller may delete; Restore for the placeholder of an archived unit when
    /// the caller may install.  Decided from disk, not from the name.
    pub fn actions_for(&self, identifier: &str) -> Option<Action> {
        if self.registry.is_active(identifier) {
            return None;
        }
        let root = self.engine.root_name_of(identifier).ok()?;
        match self.engine.state(&root) {
            UnitState::Archived
                if identifier == self.engine.placeholder_identifier(&root)
                    && self.permissions.allows(Action::Restore.capability()) =>
            {
                Some(Action::Restore)
            }
            UnitState::Unarchived
                if self.registry.lookup(identifier).is_some()
                    && self.permissions.allows(Action::Archive.capability()) =>
            {
                Some(Action::Archive)
            }
            _ => None,
        }
    }

    /// Every registered unit with its state and offered action.
    pub fn listing(&self) -> Vec<ListingEntry> {
        self.registry
            .units()
            .into_iter()
            .map(|(identifier, metadata)| {
                let state = self.status(&identifier).unwrap_or(UnitState::Inconsistent);
                ListingEntry {
                    active:          self.registry.is_active(&identifier),
                    archived_marker: metadata.name.as_deref().is_some_and(is_archived_name),
                    action:          self.actions_for(&identifier),
                    state,
                    identifier,
                    metadata,
                }
            })
            .collect()
    }
}
