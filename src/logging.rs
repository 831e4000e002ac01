//! Logger bootstrap for the command-line tool.
//!
//! The library only uses the `log` facade.  Records are metadata-only
//! `event=... module=... status=...` lines; secrets and file contents are
//! never logged.  Torn-state conditions use `event=torn_state` at error level
//! so they can be picked out of the stream.

use std::path::Path;

use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};

const LOG_FILE_BASENAME:       &str  = "plugvault";
const MAX_LOG_FILE_SIZE_BYTES: u64   = 10 * 1024 * 1024;
const MAX_LOG_FILES:           usize = 5;

/// Start logging at `level` (a `RUST_LOG`-style spec; the environment wins).
///
/// Logs go to stderr, or to rotating files under `log_dir` when given.  The
/// returned handle must be kept alive for the life of the process.
pub fn init_logging(level: &str, log_dir: Option<&Path>) -> Result<LoggerHandle, String> {
    let logger = Logger::try_with_env_or_str(level)
        .map_err(|err| format!("invalid log level `{level}`: {err}"))?;

    let logger = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .map_err(|err| format!("failed to create log directory `{}`: {err}", dir.display()))?;
            logger
                .log_to_file(FileSpec::default().directory(dir).basename(LOG_FILE_BASENAME))
                .rotate(
                    Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
                    Naming::Numbers,
                    Cleanup::KeepLogFiles(MAX_LOG_FILES),
                )
                .write_mode(WriteMode::BufferAndFlush)
                .append()
                .format_for_files(flexi_logger::detailed_format)
        }
        None => logger.log_to_stderr().format_for_stderr(flexi_logger::default_format),
    };

    logger.start().map_err(|err| format!("failed to start logger: {err}"))
}
