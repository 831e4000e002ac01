use clap::{Parser, Subcommand};
use plugvault::config::Config;
use plugvault::error::ErrorKind;
use plugvault::host::Action;
use plugvault::logging::init_logging;
use plugvault::{ArchiveEngine, ContainerReader, HeaderRegistry, Outcome, SessionTokens, StaticPermissions, Vault};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "plugvault", about = "Archive inactive plugins into password-protected containers")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, env = "PLUGVAULT_CONFIG")]
    config: Option<PathBuf>,
    /// Plugin directory (overrides the config file)
    #[arg(short, long)]
    base_dir: Option<PathBuf>,
    /// Entry file extension (overrides the config file)
    #[arg(long)]
    entry_ext: Option<String>,
    /// Container password
    #[arg(long, env = "PLUGVAULT_SECRET", hide_env_values = true, global = true)]
    secret: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Archive a plugin into an encrypted container and delete it
    Archive {
        /// Entry file relative to the plugin directory, e.g. demo/demo.php
        identifier: String,
    },
    /// Restore a plugin from its placeholder, e.g. demo_archived.php
    Restore {
        identifier: String,
    },
    /// Show the on-disk state of a plugin or placeholder
    Status {
        identifier: String,
    },
    /// List plugins with their state and available action
    List,
    /// Show a container's members; with --secret, also decrypt and hash them
    Inspect {
        input: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None       => Config::default(),
    };
    if let Some(dir) = cli.base_dir { config.base_dir = dir; }
    if let Some(ext) = cli.entry_ext { config.entry_extension = ext; }
    config.validate()?;

    let _logger = init_logging(&config.log_level, config.log_dir.as_deref())?;

    let vault = Vault::new(
        ArchiveEngine::new(&config.base_dir, &config.entry_extension),
        HeaderRegistry::new(&config.base_dir, &config.entry_extension)
            .with_active(config.active.iter().cloned()),
        StaticPermissions::from(config.permissions),
        SessionTokens::new(),
    );

    match cli.command {

        // ── Archive ──────────────────────────────────────────────────────────
        Commands::Archive { identifier } => {
            let secret = config.resolve_secret(cli.secret)?;
            let token  = vault.issue_token(Action::Archive);
            report(&vault.archive(&identifier, &token, &secret));
        }

        // ── Restore ──────────────────────────────────────────────────────────
        Commands::Restore { identifier } => {
            let secret = config.resolve_secret(cli.secret)?;
            let token  = vault.issue_token(Action::Restore);
            report(&vault.restore(&identifier, &token, &secret));
        }

        // ── Status ───────────────────────────────────────────────────────────
        Commands::Status { identifier } => {
            let state  = vault.status(&identifier)?;
            let action = vault.actions_for(&identifier).map(Action::label).unwrap_or("—");
            println!("{identifier}: {}  (action: {action})", state.as_str());
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List => {
            println!("Plugins in {}", config.base_dir.display());
            println!("{:<36} {:<13} {:<7} {:<17} Name", "Identifier", "State", "Active", "Action");
            for row in vault.listing() {
                println!(
                    "{:<36} {:<13} {:<7} {:<17} {}",
                    row.identifier,
                    row.state.as_str(),
                    if row.active { "yes" } else { "no" },
                    row.action.map(Action::label).unwrap_or("—"),
                    row.metadata.name.as_deref().unwrap_or(""),
                );
            }
        }

        // ── Inspect ──────────────────────────────────────────────────────────
        Commands::Inspect { input } => {
            let mut reader = ContainerReader::open(&input)?;
            let secret = cli.secret.map(plugvault::Secret::new);
            println!("Container: {}", input.display());
            println!("{:<40} {:>12} {:>12} {:>9}  Content hash", "Member", "Size", "Stored", "Encrypted");
            for member in reader.members()? {
                let hash = match &secret {
                    Some(s) if !member.is_dir => match reader.read_member(member.index, s) {
                        Ok((_, data)) => hex::encode(&blake3::hash(&data).as_bytes()[..8]),
                        Err(e)        => format!("({})", e.kind()),
                    },
                    _ => "—".into(),
                };
                println!(
                    "{:<40} {:>12} {:>12} {:>9}  {}",
                    member.name, member.size, member.compressed_size, member.encrypted, hash
                );
            }
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn report(outcome: &Outcome) {
    println!("{}", outcome.message);
    if let Some(kind) = outcome.error_kind {
        log::logger().flush();
        std::process::exit(exit_code(kind));
    }
}

fn exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::PermissionDenied | ErrorKind::Locked => 2,
        k if k.is_torn_state()                          => 3,
        _                                               => 1,
    }
}
