use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Boxed error used where the underlying cause comes through an
/// injectable seam (probe attempts, seed stores).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("datastore not ready after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: BoxError,
    },
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration tool '{tool}' not found on PATH")]
    ToolNotFound { tool: String },

    #[error("failed to launch migration tool '{tool}': {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("migration tool '{tool}' reported failure ({status})")]
    ApplyFailed { tool: String, status: ExitStatus },

    #[error("empty migration command")]
    EmptyCommand,
}

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("seed catalog {}: {source}", .path.display())]
    Catalog {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("datastore connection for seeding failed: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("seeding '{key}' failed: {source}")]
    RecordFailed {
        key: String,
        #[source]
        source: BoxError,
    },
}

/// Union of the three stage errors; the orchestrator tags it with the
/// stage that produced it.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Seed(#[from] SeedError),
}
