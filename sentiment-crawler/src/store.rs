use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::types::{Predicate, Record, RecordStore, Scope, StoredRecord};

fn ensure_admits(scope: &Scope, record: &Record) -> Result<()> {
    if !scope.admits(record) {
        bail!("{} record cannot be written under scope {}", record.kind(), scope);
    }
    Ok(())
}

/// Postgres-backed record store. All kinds share one table, partitioned by
/// `(instrument_code, kind)`; the record body lives in a JSONB payload.
#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> crate::types::Result<Self> {
        let db = PgPool::connect(database_url).await?;
        Ok(Self { db })
    }

    pub async fn setup_schema(&self) -> crate::types::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.db)
            .await
            .map_err(sqlx::Error::from)?;
        info!("Record store schema ready");
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn insert(&self, scope: &Scope, record: &Record) -> Result<Uuid> {
        ensure_admits(scope, record)?;
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO crawl_records (id, instrument_code, kind, payload, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            "#,
        )
        .bind(id)
        .bind(&scope.instrument)
        .bind(scope.kind.as_str())
        .bind(Json(record.payload()?))
        .execute(&self.db)
        .await?;

        debug!(%scope, %id, "Inserted record");
        Ok(id)
    }

    async fn query(&self, scope: &Scope, predicate: &Predicate) -> Result<Vec<StoredRecord>> {
        let rows = match predicate {
            Predicate::All => {
                sqlx::query(
                    r#"
                    SELECT id, payload FROM crawl_records
                    WHERE instrument_code = $1 AND kind = $2
                    ORDER BY created_at
                    "#,
                )
                .bind(&scope.instrument)
                .bind(scope.kind.as_str())
                .fetch_all(&self.db)
                .await?
            }
            // ISO dates compare correctly as text.
            Predicate::DateRange { field, start, end } => {
                sqlx::query(
                    r#"
                    SELECT id, payload FROM crawl_records
                    WHERE instrument_code = $1 AND kind = $2
                      AND payload->>$3 BETWEEN $4 AND $5
                    ORDER BY created_at
                    "#,
                )
                .bind(&scope.instrument)
                .bind(scope.kind.as_str())
                .bind(field)
                .bind(start.format("%Y-%m-%d").to_string())
                .bind(end.format("%Y-%m-%d").to_string())
                .fetch_all(&self.db)
                .await?
            }
        };

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = row.try_get("id")?;
            let Json(payload): Json<serde_json::Value> = row.try_get("payload")?;
            records.push(StoredRecord {
                id,
                record: Record::from_payload(scope.kind, payload)?,
            });
        }
        debug!(%scope, matched = records.len(), "Queried records");
        Ok(records)
    }
}

#[derive(Default)]
struct MemoryState {
    records: HashMap<Scope, Vec<StoredRecord>>,
    queries: Vec<(Scope, Predicate)>,
}

/// In-process record store. Used when no database is configured and in
/// tests, where it also counts inserts and logs every query.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self, scope: &Scope) -> Vec<StoredRecord> {
        self.state
            .read()
            .await
            .records
            .get(scope)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn count(&self, scope: &Scope) -> usize {
        self.state
            .read()
            .await
            .records
            .get(scope)
            .map_or(0, Vec::len)
    }

    pub async fn queries(&self) -> Vec<(Scope, Predicate)> {
        self.state.read().await.queries.clone()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert(&self, scope: &Scope, record: &Record) -> Result<Uuid> {
        ensure_admits(scope, record)?;
        let id = Uuid::new_v4();
        self.state
            .write()
            .await
            .records
            .entry(scope.clone())
            .or_default()
            .push(StoredRecord {
                id,
                record: record.clone(),
            });
        Ok(id)
    }

    async fn query(&self, scope: &Scope, predicate: &Predicate) -> Result<Vec<StoredRecord>> {
        let mut state = self.state.write().await;
        state.queries.push((scope.clone(), predicate.clone()));

        let mut matched = Vec::new();
        for stored in state.records.get(scope).into_iter().flatten() {
            if predicate.matches(&stored.record.payload()?) {
                matched.push(stored.clone());
            }
        }
        Ok(matched)
    }
}
