//! Core of the `prestart` bootstrap orchestrator: bring a fresh
//! deployment from "dependencies installed" to "ready to serve traffic"
//! by probing the datastore, applying schema migrations, and loading
//! seed data, in that order.

pub mod error;
pub mod migrate;
pub mod orchestrator;
pub mod probe;
pub mod seed;
pub mod settings;

pub use error::{MigrationError, ProbeError, SeedError, StageError};
pub use orchestrator::{run, Bootstrap, BootstrapError, Report, Stage, Steps};
pub use settings::{ConnectionTarget, RetryPolicy, Settings};
