//! Bootstrap orchestrator: `PROBING -> MIGRATING -> SEEDING -> READY`,
//! with a stage-tagged failure from any stage.
//!
//! Strictly linear and single-threaded: a stage runs only after the
//! previous one succeeded, and a failure halts the sequence with later
//! stages never attempted. Each stage opens and closes its own
//! datastore connection; nothing is shared across stages.

use std::fmt;

use thiserror::Error;

use crate::error::{MigrationError, ProbeError, SeedError, StageError};
use crate::migrate::Migrator;
use crate::probe;
use crate::seed::{self, PgSeedStore, SeedCatalog, SeedReport};
use crate::settings::Settings;

// ---------------------------------------------------------------------------
// Stage / BootstrapError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Probing,
    Migrating,
    Seeding,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Probing => "probing",
            Stage::Migrating => "migrating",
            Stage::Seeding => "seeding",
        }
    }

    /// Stage-specific process exit code, so supervisor logs can tell
    /// probe, migration, and seed failures apart. Chosen clear of the
    /// conventional usage-error code 2.
    pub fn exit_code(&self) -> i32 {
        match self {
            Stage::Probing => 10,
            Stage::Migrating => 11,
            Stage::Seeding => 12,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The terminal failure state: which stage gave up, and why.
#[derive(Debug, Error)]
#[error("bootstrap failed while {stage}: {source}")]
pub struct BootstrapError {
    pub stage: Stage,
    #[source]
    pub source: StageError,
}

// ---------------------------------------------------------------------------
// Steps / Report
// ---------------------------------------------------------------------------

/// The three stage operations, behind a seam so the transition rules are
/// testable without a datastore.
#[allow(async_fn_in_trait)]
pub trait Steps {
    /// Block until the datastore accepts a connection; returns the
    /// attempt number that got through.
    async fn wait_until_ready(&mut self) -> Result<u32, ProbeError>;

    /// Advance the schema to its latest revision.
    async fn apply_migrations(&mut self) -> Result<(), MigrationError>;

    /// Insert whichever baseline records are absent.
    async fn load_initial_data(&mut self) -> Result<SeedReport, SeedError>;
}

/// What a successful bootstrap did, for the final readiness log line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Report {
    pub probe_attempts: u32,
    pub seeds_inserted: u32,
    pub seeds_skipped: u32,
}

/// Drive the stages in order. Returns the report on `READY`; the error
/// carries the failing stage.
pub async fn run<S: Steps>(steps: &mut S) -> Result<Report, BootstrapError> {
    tracing::info!(stage = %Stage::Probing, "waiting for datastore");
    let probe_attempts = steps
        .wait_until_ready()
        .await
        .map_err(|e| BootstrapError {
            stage: Stage::Probing,
            source: e.into(),
        })?;

    tracing::info!(stage = %Stage::Migrating, "applying schema migrations");
    steps.apply_migrations().await.map_err(|e| BootstrapError {
        stage: Stage::Migrating,
        source: e.into(),
    })?;

    tracing::info!(stage = %Stage::Seeding, "loading initial data");
    let seeds = steps
        .load_initial_data()
        .await
        .map_err(|e| BootstrapError {
            stage: Stage::Seeding,
            source: e.into(),
        })?;

    let report = Report {
        probe_attempts,
        seeds_inserted: seeds.inserted,
        seeds_skipped: seeds.skipped,
    };
    tracing::info!(
        probe_attempts = report.probe_attempts,
        seeds_inserted = report.seeds_inserted,
        seeds_skipped = report.seeds_skipped,
        "bootstrap complete, ready to serve"
    );
    Ok(report)
}

// ---------------------------------------------------------------------------
// Bootstrap (production Steps)
// ---------------------------------------------------------------------------

/// Wires [`Settings`] into the real probe, migrator, and seed loader.
pub struct Bootstrap {
    settings: Settings,
}

impl Bootstrap {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

impl Steps for Bootstrap {
    async fn wait_until_ready(&mut self) -> Result<u32, ProbeError> {
        let target = self.settings.target.clone();
        probe::wait_until_ready(&self.settings.retry, move |_attempt| {
            let target = target.clone();
            async move { probe::connect_once(&target).await }
        })
        .await
    }

    async fn apply_migrations(&mut self) -> Result<(), MigrationError> {
        let migrator =
            Migrator::from_command_line(&self.settings.migrate_command, self.settings.target.url())?;
        migrator.apply().await
    }

    async fn load_initial_data(&mut self) -> Result<SeedReport, SeedError> {
        // Fail on an unreadable catalog before touching the datastore.
        let catalog = SeedCatalog::from_path(&self.settings.seed_catalog)?;
        let mut store = PgSeedStore::connect(&self.settings.target).await?;
        let report = seed::load(&mut store, &catalog).await?;
        if let Err(error) = store.close().await {
            tracing::warn!(error = %error, "seed connection did not close cleanly");
        }
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
