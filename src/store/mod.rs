//! The patient/test-result store: a two-table SQLite database (via `sqlx`) with
//! crash-safe snapshotting and historical CSV backfill on cold start.

use std::path::Path;

use chrono::NaiveDateTime;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::error::StoreError;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS patients (
        mrn TEXT PRIMARY KEY,
        age INTEGER NOT NULL,
        sex TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS test_results (
        mrn TEXT NOT NULL,
        observed_at TEXT NOT NULL,
        result REAL NOT NULL,
        PRIMARY KEY (mrn, observed_at)
    )",
];

#[derive(Debug, Clone, PartialEq)]
pub struct PatientRecord {
    pub mrn: String,
    pub age: i32,
    pub sex: char,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub observed_at: NaiveDateTime,
    pub result: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatientHistory {
    pub patient: PatientRecord,
    pub results: Vec<HistoryEntry>,
}

/// Owns the live connection pool to the canonical on-disk SQLite file. Every insert
/// commits synchronously to that file; `persist()` additionally produces a second,
/// independently valid snapshot via `VACUUM INTO` + atomic rename, for crash recovery.
pub struct PatientStore {
    pool: SqlitePool,
    canonical_path: String,
}

impl PatientStore {
    /// Opens (creating if absent) the canonical database file, applies the schema,
    /// and backfills from `history_csv_path` if this is a cold start (no file existed
    /// before this call). Returns the store plus whether a backfill occurred, so the
    /// caller can log the two-phase startup decision (SPEC_FULL.md §4.3/§9).
    pub async fn open(canonical_path: &str, history_csv_path: &str) -> Result<Self, StoreError> {
        let existed = Path::new(canonical_path).exists();
        if let Some(parent) = Path::new(canonical_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(canonical_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        let store = Self {
            pool,
            canonical_path: canonical_path.to_string(),
        };

        if existed {
            log::info!("loaded existing patient store snapshot from {}", canonical_path);
        } else {
            log::info!(
                "no snapshot found at {}, backfilling historical results from {}",
                canonical_path,
                history_csv_path
            );
            store.backfill_csv(history_csv_path).await?;
            store.persist().await?;
        }

        Ok(store)
    }

    async fn backfill_csv(&self, path: &str) -> Result<(), StoreError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(err) => {
                log::warn!("historical CSV {} unreadable ({}), skipping backfill", path, err);
                return Ok(());
            }
        };

        let mut inserted = 0usize;
        for (i, line) in contents.lines().enumerate() {
            if i == 0 {
                continue; // header row
            }
            if line.trim().is_empty() {
                continue;
            }
            let mut cells: Vec<&str> = line.split(',').collect();
            while cells.last().map(|c| c.is_empty()).unwrap_or(false) {
                cells.pop();
            }
            if cells.is_empty() {
                continue;
            }
            let mrn = cells[0];
            let mut j = 1;
            while j + 1 < cells.len() {
                let date = cells[j];
                let result_raw = cells[j + 1];
                match result_raw.parse::<f64>() {
                    Ok(result) => match crate::hl7::parse_hl7_datetime(date) {
                        Some(observed_at) => {
                            self.insert_result(mrn, observed_at, result).await?;
                            inserted += 1;
                        }
                        None => {
                            return Err(StoreError::MalformedHistory(format!(
                                "unparseable date '{}' for mrn {}",
                                date, mrn
                            )))
                        }
                    },
                    Err(_) => {
                        return Err(StoreError::MalformedHistory(format!(
                            "unparseable result '{}' for mrn {}",
                            result_raw, mrn
                        )))
                    }
                }
                j += 2;
            }
        }
        log::info!("backfilled {} historical test results from {}", inserted, path);
        Ok(())
    }

    pub async fn insert_patient(&self, mrn: &str, age: i32, sex: char) -> Result<(), StoreError> {
        let res = sqlx::query("INSERT OR IGNORE INTO patients (mrn, age, sex) VALUES (?, ?, ?)")
            .bind(mrn)
            .bind(age)
            .bind(sex.to_string())
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            log::debug!("patient {} already present, admit ignored", mrn);
        }
        Ok(())
    }

    pub async fn discharge(&self, mrn: &str) -> Result<(), StoreError> {
        let res = sqlx::query("DELETE FROM patients WHERE mrn = ?")
            .bind(mrn)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            log::debug!("discharge for unknown/already-discharged patient {}", mrn);
        }
        Ok(())
    }

    pub async fn insert_result(
        &self,
        mrn: &str,
        observed_at: NaiveDateTime,
        result: f64,
    ) -> Result<(), StoreError> {
        let res = sqlx::query(
            "INSERT OR IGNORE INTO test_results (mrn, observed_at, result) VALUES (?, ?, ?)",
        )
        .bind(mrn)
        .bind(observed_at.format("%Y-%m-%d %H:%M:%S").to_string())
        .bind(result)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            log::debug!(
                "result for {} at {} already present, insert ignored",
                mrn,
                observed_at
            );
        }
        Ok(())
    }

    pub async fn get_patient(&self, mrn: &str) -> Result<Option<PatientRecord>, StoreError> {
        let row = sqlx::query("SELECT mrn, age, sex FROM patients WHERE mrn = ?")
            .bind(mrn)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| PatientRecord {
            mrn: r.get("mrn"),
            age: r.get("age"),
            sex: r.get::<String, _>("sex").chars().next().unwrap_or('U'),
        }))
    }

    pub async fn result_exists(
        &self,
        mrn: &str,
        observed_at: NaiveDateTime,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT 1 FROM test_results WHERE mrn = ? AND observed_at = ?",
        )
        .bind(mrn)
        .bind(observed_at.format("%Y-%m-%d %H:%M:%S").to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Full history for an admitted patient, ordered by observation time ascending.
    /// Returns `Ok(None)` for unknown or discharged patients (SPEC_FULL.md §3).
    pub async fn get_history(&self, mrn: &str) -> Result<Option<PatientHistory>, StoreError> {
        let patient = match self.get_patient(mrn).await? {
            Some(p) => p,
            None => return Ok(None),
        };

        let rows = sqlx::query(
            "SELECT observed_at, result FROM test_results WHERE mrn = ? ORDER BY observed_at ASC",
        )
        .bind(mrn)
        .fetch_all(&self.pool)
        .await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: String = row.get("observed_at");
            let observed_at = crate::hl7::parse_hl7_datetime(&raw).ok_or_else(|| {
                StoreError::MalformedHistory(format!("unparseable stored date '{}'", raw))
            })?;
            results.push(HistoryEntry {
                observed_at,
                result: row.get("result"),
            });
        }

        Ok(Some(PatientHistory { patient, results }))
    }

    /// Produces a crash-safe snapshot at the canonical path: `VACUUM INTO` a temporary
    /// file beside it, then atomically rename over the canonical path. A reader of the
    /// canonical path never observes a partially-written snapshot (SPEC_FULL.md §6).
    pub async fn persist(&self) -> Result<(), StoreError> {
        let tmp_path = format!("{}.tmp-{}", self.canonical_path, uuid::Uuid::new_v4());
        sqlx::query("VACUUM INTO ?")
            .bind(&tmp_path)
            .execute(&self.pool)
            .await?;
        std::fs::rename(&tmp_path, &self.canonical_path)?;
        log::info!("persisted patient store snapshot to {}", self.canonical_path);
        Ok(())
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
