//! Migration runner: supervise the external schema-migration tool.
//!
//! The tool is any command that reads `DATABASE_URL` and advances the
//! schema to its latest revision, reporting the outcome through its exit
//! status. Running it against an already-current schema must be a no-op
//! success; that idempotence belongs to the tool, this runner only
//! observes pass/fail. A failed migration is surfaced immediately and
//! never retried here; replaying against a partially-migrated schema is
//! an operator decision.

use std::process::Stdio;

use tokio::process::Command;

use crate::error::MigrationError;

pub struct Migrator {
    program: String,
    args: Vec<String>,
    database_url: String,
}

impl Migrator {
    /// Split a whitespace-separated command line into program + args.
    pub fn from_command_line(line: &str, database_url: String) -> Result<Self, MigrationError> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or(MigrationError::EmptyCommand)?;
        Ok(Self {
            program,
            args: parts.collect(),
            database_url,
        })
    }

    pub fn tool(&self) -> &str {
        &self.program
    }

    /// Advance the schema to head.
    ///
    /// Tool stdout/stderr flow through to the parent so migration output
    /// lands in the container log.
    pub async fn apply(&self) -> Result<(), MigrationError> {
        let resolved = which::which(&self.program).map_err(|_| MigrationError::ToolNotFound {
            tool: self.program.clone(),
        })?;

        tracing::info!(tool = %self.program, "advancing schema to latest revision");

        let status = Command::new(resolved)
            .args(&self.args)
            .env("DATABASE_URL", &self.database_url)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|source| MigrationError::Spawn {
                tool: self.program.clone(),
                source,
            })?;

        if !status.success() {
            return Err(MigrationError::ApplyFailed {
                tool: self.program.clone(),
                status,
            });
        }

        tracing::info!(tool = %self.program, "schema is at latest revision");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
