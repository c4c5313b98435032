use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use sqlx::postgres::PgConnectOptions;

// ---------------------------------------------------------------------------
// ConnectionTarget
// ---------------------------------------------------------------------------

/// Where the datastore lives. Built once at startup and immutable for the
/// process lifetime.
#[derive(Clone)]
pub struct ConnectionTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl ConnectionTarget {
    /// Options for opening a sqlx connection. Building options field by
    /// field avoids URL-escaping concerns for credentials.
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
    }

    /// `postgres://` URL handed to the migration subprocess as
    /// `DATABASE_URL`. Credentials here may need URL-escaping if they
    /// contain reserved characters; the migration tool receives them as-is.
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }
}

// Credentials must never reach logs; both renderings show the location only.
impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.host, self.port, self.database)
    }
}

impl fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

impl Default for ConnectionTarget {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: String::new(),
            database: default_database(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_user() -> String {
    "postgres".to_string()
}

fn default_database() -> String {
    "app".to_string()
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Retry budget for the readiness probe. No other stage retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
}

fn default_max_attempts() -> u32 {
    60
}

fn default_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay: default_max_delay(),
        }
    }
}

impl RetryPolicy {
    /// Delay to sleep after the given failed attempt (1-based): the base
    /// delay scaled by `backoff_multiplier^(attempt-1)`, capped at
    /// `max_delay`. Pure, so the schedule is testable without sleeping.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        // Cap in float space: large exponents overflow to infinity, and
        // Duration::from_secs_f64 panics outside its range.
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled.max(0.0))
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Everything the bootstrap sequence needs, assembled by the binary from
/// flags and environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub target: ConnectionTarget,
    pub retry: RetryPolicy,
    /// Whitespace-separated command line for the migration tool.
    pub migrate_command: String,
    /// Path to the application-supplied seed catalog (JSON).
    pub seed_catalog: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            target: ConnectionTarget::default(),
            retry: RetryPolicy::default(),
            migrate_command: "sqlx migrate run".to_string(),
            seed_catalog: PathBuf::from("seeds.json"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base_ms: u64, multiplier: f64, max_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(base_ms),
            backoff_multiplier: multiplier,
            max_delay: Duration::from_millis(max_ms),
        }
    }

    #[test]
    fn delay_schedule_is_geometric() {
        let p = policy(100, 2.0, 60_000);
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(400));
        assert_eq!(p.delay_for(4), Duration::from_millis(800));
    }

    #[test]
    fn delay_is_capped_at_max() {
        let p = policy(1000, 2.0, 5_000);
        assert_eq!(p.delay_for(3), Duration::from_millis(4_000));
        assert_eq!(p.delay_for(4), Duration::from_millis(5_000));
        assert_eq!(p.delay_for(20), Duration::from_millis(5_000));
    }

    #[test]
    fn delay_survives_huge_attempt_numbers() {
        let p = policy(1000, 2.0, 30_000);
        assert_eq!(p.delay_for(u32::MAX), Duration::from_millis(30_000));
    }

    #[test]
    fn multiplier_of_one_keeps_delay_constant() {
        let p = policy(250, 1.0, 30_000);
        assert_eq!(p.delay_for(1), Duration::from_millis(250));
        assert_eq!(p.delay_for(7), Duration::from_millis(250));
    }

    #[test]
    fn default_policy_is_patient() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_attempts, 60);
        assert_eq!(p.base_delay, Duration::from_secs(1));
        assert_eq!(p.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn display_and_debug_never_leak_credentials() {
        let target = ConnectionTarget {
            host: "db".into(),
            port: 5432,
            user: "svc".into(),
            password: "hunter2".into(),
            database: "app".into(),
        };
        assert_eq!(target.to_string(), "db:5432/app");
        let debugged = format!("{target:?}");
        assert!(!debugged.contains("hunter2"));
    }

    #[test]
    fn url_carries_all_parts() {
        let target = ConnectionTarget {
            host: "db".into(),
            port: 5433,
            user: "svc".into(),
            password: "pw".into(),
            database: "app".into(),
        };
        assert_eq!(target.url(), "postgres://svc:pw@db:5433/app");
    }
}
