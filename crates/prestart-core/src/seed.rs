//! Seed loader: insert baseline records if and only if they are absent.
//!
//! The catalog is supplied by the application layer as a JSON file of
//! natural-keyed rows. Seeding never overwrites an existing row: a record
//! already present under its natural key is left untouched even when its
//! other fields differ from the catalog. It also never deletes or
//! reconciles rows that have dropped out of the catalog, so it is safe to
//! run on every container start against a datastore seeded by any earlier
//! catalog version.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use sqlx::postgres::Postgres;
use sqlx::query_builder::Separated;
use sqlx::{Connection, PgConnection, QueryBuilder};

use crate::error::{BoxError, SeedError};
use crate::settings::ConnectionTarget;

// ---------------------------------------------------------------------------
// SeedRecord / SeedCatalog
// ---------------------------------------------------------------------------

/// One baseline row, identified by a natural key unique within its table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SeedRecord {
    pub table: String,
    /// Column holding the natural key.
    pub key_column: String,
    /// Natural key value.
    pub key: String,
    /// Remaining columns. JSON strings/numbers/bools/null map to their SQL
    /// counterparts; arrays and objects are stored as jsonb.
    #[serde(default)]
    pub columns: BTreeMap<String, Value>,
}

impl SeedRecord {
    /// `table/key`, used in logs and error payloads.
    pub fn qualified_key(&self) -> String {
        format!("{}/{}", self.table, self.key)
    }
}

/// The application's seed catalog, validated at load time. Table and
/// column names are checked against a strict identifier pattern so they
/// can safely parameterize SQL.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedCatalog {
    pub records: Vec<SeedRecord>,
}

static IDENT_RE: OnceLock<Regex> = OnceLock::new();

fn ident_re() -> &'static Regex {
    IDENT_RE.get_or_init(|| Regex::new(r"^[a-z_][a-z0-9_]*$").unwrap())
}

fn validate_identifier(what: &str, name: &str) -> Result<(), BoxError> {
    if name.len() > 63 || !ident_re().is_match(name) {
        return Err(format!(
            "invalid {what} '{name}': expected a lowercase identifier (letters, digits, underscores)"
        )
        .into());
    }
    Ok(())
}

impl SeedCatalog {
    pub fn from_path(path: &Path) -> Result<Self, SeedError> {
        let data = std::fs::read(path).map_err(|e| SeedError::Catalog {
            path: path.to_path_buf(),
            source: e.into(),
        })?;
        Self::from_slice(&data).map_err(|source| SeedError::Catalog {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, BoxError> {
        let records: Vec<SeedRecord> = serde_json::from_slice(data)?;
        let mut seen = BTreeSet::new();
        for record in &records {
            validate_identifier("table name", &record.table)?;
            validate_identifier("key column", &record.key_column)?;
            for name in record.columns.keys() {
                validate_identifier("column name", name)?;
            }
            if record.columns.contains_key(&record.key_column) {
                return Err(format!(
                    "record '{}' redefines its key column '{}'",
                    record.qualified_key(),
                    record.key_column
                )
                .into());
            }
            if !seen.insert((record.table.clone(), record.key.clone())) {
                return Err(
                    format!("duplicate natural key '{}'", record.qualified_key()).into(),
                );
            }
        }
        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ---------------------------------------------------------------------------
// SeedStore
// ---------------------------------------------------------------------------

/// Presence check and insert for one record. The loader owns the
/// insert-if-absent law; implementations own the storage dialect.
#[allow(async_fn_in_trait)]
pub trait SeedStore {
    async fn exists(&mut self, record: &SeedRecord) -> Result<bool, BoxError>;
    async fn insert(&mut self, record: &SeedRecord) -> Result<(), BoxError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub inserted: u32,
    pub skipped: u32,
}

/// Apply the catalog: records are processed in catalog order, each checked
/// by natural key and inserted only when absent. The first record failure
/// aborts the run; a partial baseline must not be masked by continuing.
pub async fn load<S: SeedStore>(
    store: &mut S,
    catalog: &SeedCatalog,
) -> Result<SeedReport, SeedError> {
    let mut report = SeedReport::default();

    for record in &catalog.records {
        let key = record.qualified_key();
        let present = store
            .exists(record)
            .await
            .map_err(|source| SeedError::RecordFailed {
                key: key.clone(),
                source,
            })?;
        if present {
            tracing::debug!(key = %key, "seed record already present, leaving untouched");
            report.skipped += 1;
            continue;
        }
        store
            .insert(record)
            .await
            .map_err(|source| SeedError::RecordFailed {
                key: key.clone(),
                source,
            })?;
        tracing::info!(key = %key, "seed record inserted");
        report.inserted += 1;
    }

    tracing::info!(
        inserted = report.inserted,
        skipped = report.skipped,
        "seed catalog applied"
    );
    Ok(report)
}

// ---------------------------------------------------------------------------
// PgSeedStore
// ---------------------------------------------------------------------------

/// Postgres-backed store. Opens its own connection; the catalog's
/// validated identifiers are interpolated, values are always bound.
pub struct PgSeedStore {
    conn: PgConnection,
}

impl PgSeedStore {
    pub async fn connect(target: &ConnectionTarget) -> Result<Self, SeedError> {
        let conn = PgConnection::connect_with(&target.connect_options())
            .await
            .map_err(SeedError::Connect)?;
        Ok(Self { conn })
    }

    pub async fn close(self) -> Result<(), sqlx::Error> {
        self.conn.close().await
    }
}

fn push_bind_value<'args>(
    values: &mut Separated<'_, 'args, Postgres, &'static str>,
    value: &'args Value,
) {
    match value {
        Value::Null => {
            values.push("null");
        }
        Value::Bool(b) => {
            values.push_bind(*b);
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                values.push_bind(i);
            } else {
                values.push_bind(n.as_f64().unwrap_or_default());
            }
        }
        Value::String(s) => {
            values.push_bind(s.as_str());
        }
        other => {
            values.push_bind(sqlx::types::Json(other.clone()));
        }
    }
}

impl SeedStore for PgSeedStore {
    async fn exists(&mut self, record: &SeedRecord) -> Result<bool, BoxError> {
        let sql = format!(
            "select exists(select 1 from {} where {} = $1)",
            record.table, record.key_column
        );
        let present: bool = sqlx::query_scalar(&sql)
            .bind(&record.key)
            .fetch_one(&mut self.conn)
            .await?;
        Ok(present)
    }

    async fn insert(&mut self, record: &SeedRecord) -> Result<(), BoxError> {
        let mut qb = QueryBuilder::<Postgres>::new("insert into ");
        qb.push(&record.table);
        qb.push(" (");
        {
            let mut columns = qb.separated(", ");
            columns.push(&record.key_column);
            for name in record.columns.keys() {
                columns.push(name);
            }
        }
        qb.push(") values (");
        {
            let mut values = qb.separated(", ");
            values.push_bind(record.key.as_str());
            for value in record.columns.values() {
                push_bind_value(&mut values, value);
            }
        }
        qb.push(")");

        qb.build().execute(&mut self.conn).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
