//! Archive inactive plugins into password-protected containers and restore them.
//!
//! ```no_run
//! use plugvault::{ArchiveEngine, HeaderRegistry, SessionTokens, StaticPermissions, Vault};
//! use plugvault::host::Action;
//! use plugvault::Secret;
//!
//! let base = "/srv/www/wp-content/plugins";
//! let vault = Vault::new(
//!     ArchiveEngine::new(base, "php"),
//!     HeaderRegistry::new(base, "php"),
//!     StaticPermissions::all(),
//!     SessionTokens::new(),
//! );
//! let secret = Secret::new("s3cr3t");
//!
//! let token = vault.issue_token(Action::Archive);
//! let outcome = vault.archive("demo/demo.php", &token, &secret);
//! println!("{}", outcome.message);
//!
//! let token = vault.issue_token(Action::Restore);
//! let outcome = vault.restore("demo_archived.php", &token, &secret);
//! assert!(outcome.ok);
//! ```

pub mod config;
pub mod container;
pub mod engine;
pub mod error;
pub mod header;
pub mod host;
pub mod lock;
pub mod logging;
pub mod placeholder;
pub mod secret;
pub mod unit;
pub mod vault;

pub use container::{ContainerReader, ContainerWriter, MemberInfo};
pub use engine::{ArchiveEngine, ArchivedUnit, RestoredUnit, UnitState};
pub use error::{ErrorKind, VaultError};
pub use host::{HeaderRegistry, PermissionChecker, SessionTokens, StaticPermissions, TokenVerifier, UnitRegistry};
pub use secret::Secret;
pub use unit::{Unit, UnitMetadata, UnitShape};
pub use vault::{ArchiveOutcome, Outcome, RestoreOutcome, Vault};
