use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use prestart_core::orchestrator::{self, Bootstrap, BootstrapError, Stage, Steps};
use prestart_core::settings::{ConnectionTarget, RetryPolicy, Settings};

#[derive(Parser)]
#[command(
    name = "prestart",
    about = "Bring a fresh deployment to ready-to-serve: wait for the datastore, migrate the schema, load seed data",
    version,
    propagate_version = true
)]
struct Cli {
    /// Datastore host
    #[arg(long, global = true, env = "POSTGRES_SERVER", default_value = "localhost")]
    db_host: String,

    /// Datastore port
    #[arg(long, global = true, env = "POSTGRES_PORT", default_value_t = 5432)]
    db_port: u16,

    /// Database name
    #[arg(long, global = true, env = "POSTGRES_DB", default_value = "app")]
    db_name: String,

    /// Database user
    #[arg(long, global = true, env = "POSTGRES_USER", default_value = "postgres")]
    db_user: String,

    /// Database password
    #[arg(
        long,
        global = true,
        env = "POSTGRES_PASSWORD",
        default_value = "",
        hide_env_values = true
    )]
    db_password: String,

    /// Give up probing after this many connection attempts
    #[arg(
        long,
        global = true,
        env = "PRESTART_MAX_PROBE_ATTEMPTS",
        default_value_t = 60
    )]
    max_probe_attempts: u32,

    /// Delay after the first failed probe attempt, in milliseconds
    #[arg(
        long,
        global = true,
        env = "PRESTART_PROBE_BASE_DELAY_MS",
        default_value_t = 1000
    )]
    probe_base_delay_ms: u64,

    /// Ceiling on the backed-off probe delay, in milliseconds
    #[arg(
        long,
        global = true,
        env = "PRESTART_PROBE_MAX_DELAY_MS",
        default_value_t = 30_000
    )]
    probe_max_delay_ms: u64,

    /// Multiplier applied to the probe delay after each failure
    #[arg(
        long,
        global = true,
        env = "PRESTART_PROBE_BACKOFF",
        default_value_t = 2.0
    )]
    probe_backoff: f64,

    /// Migration tool command line; receives DATABASE_URL in its environment
    #[arg(
        long,
        global = true,
        env = "PRESTART_MIGRATE_COMMAND",
        default_value = "sqlx migrate run"
    )]
    migrate_command: String,

    /// Path to the application's seed catalog (JSON)
    #[arg(
        long,
        global = true,
        env = "PRESTART_SEED_CATALOG",
        default_value = "seeds.json"
    )]
    seed_catalog: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Only wait until the datastore accepts connections
    Probe,
    /// Only apply pending schema migrations
    Migrate,
    /// Only load seed data
    Seed,
}

impl Cli {
    fn settings(&self) -> Settings {
        Settings {
            target: ConnectionTarget {
                host: self.db_host.clone(),
                port: self.db_port,
                user: self.db_user.clone(),
                password: self.db_password.clone(),
                database: self.db_name.clone(),
            },
            retry: RetryPolicy {
                max_attempts: self.max_probe_attempts,
                base_delay: Duration::from_millis(self.probe_base_delay_ms),
                backoff_multiplier: self.probe_backoff,
                max_delay: Duration::from_millis(self.probe_max_delay_ms),
            },
            migrate_command: self.migrate_command.clone(),
            seed_catalog: self.seed_catalog.clone(),
        }
    }
}

async fn single_stage(bootstrap: &mut Bootstrap, command: Command) -> Result<(), BootstrapError> {
    match command {
        Command::Probe => bootstrap
            .wait_until_ready()
            .await
            .map(|_| ())
            .map_err(|e| BootstrapError {
                stage: Stage::Probing,
                source: e.into(),
            }),
        Command::Migrate => bootstrap
            .apply_migrations()
            .await
            .map_err(|e| BootstrapError {
                stage: Stage::Migrating,
                source: e.into(),
            }),
        Command::Seed => bootstrap
            .load_initial_data()
            .await
            .map(|_| ())
            .map_err(|e| BootstrapError {
                stage: Stage::Seeding,
                source: e.into(),
            }),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .init();

    let settings = cli.settings();
    tracing::info!(datastore = %settings.target, "starting bootstrap");

    let mut bootstrap = Bootstrap::new(settings);
    let result = match cli.command {
        None => orchestrator::run(&mut bootstrap).await.map(|_| ()),
        Some(command) => single_stage(&mut bootstrap, command).await,
    };

    if let Err(e) = result {
        let code = e.stage.exit_code();
        tracing::error!(stage = %e.stage, "bootstrap failed");
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {:#}", anyhow::Error::new(e));
        std::process::exit(code);
    }
}
