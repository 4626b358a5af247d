use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::fmt;
use std::path::Path;
use uuid::Uuid;

use crate::defs::{Record, RecordKind};

/// Partition a record is written under: one instrument, one record kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    pub instrument: String,
    pub kind: RecordKind,
}

impl Scope {
    pub fn new(instrument: impl Into<String>, kind: RecordKind) -> Self {
        Self {
            instrument: instrument.into(),
            kind,
        }
    }

    /// Whether `record` may be written under this scope.
    pub fn admits(&self, record: &Record) -> bool {
        record.kind() == self.kind
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.kind, self.instrument)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    All,
    /// Closed range `[start, end]` on a date-valued payload field.
    DateRange {
        field: String,
        start: NaiveDate,
        end: NaiveDate,
    },
}

impl Predicate {
    pub fn date_range(field: impl Into<String>, start: NaiveDate, end: NaiveDate) -> Self {
        Predicate::DateRange {
            field: field.into(),
            start,
            end,
        }
    }

    /// Evaluate against a record payload as produced by [`Record::payload`].
    pub fn matches(&self, payload: &serde_json::Value) -> bool {
        match self {
            Predicate::All => true,
            Predicate::DateRange { field, start, end } => payload
                .get(field)
                .and_then(|v| v.as_str())
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
                .is_some_and(|d| *start <= d && d <= *end),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub id: Uuid,
    pub record: Record,
}

/// Append/query persistence, partitioned by [`Scope`].
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert(&self, scope: &Scope, record: &Record) -> Result<Uuid>;

    async fn query(&self, scope: &Scope, predicate: &Predicate) -> Result<Vec<StoredRecord>>;
}

/// Durable storage for downloaded binary artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// All-or-nothing from the caller's point of view.
    async fn write(&self, path: &Path, bytes: &[u8]) -> Result<()>;
}
