//! SQLite-backed [`Storage`].
//!
//! One table, `crawl_records`, with a partial unique index on
//! `normalized_url` over non-deleted rows. The dedup engine's lookup is
//! best-effort; this index is what finally rejects a duplicate inserted by a
//! concurrent source.

use super::{RelevanceCounts, Storage, StorageError};
use crate::models::{NormalizedRecord, RecordStatus, Relevance, RiskLevel};
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, ErrorCode, Row, ffi, params, params_from_iter};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// SQLite limits bound parameters per statement; stay well below it.
const LOOKUP_CHUNK: usize = 500;

const RECORD_COLUMNS: &str = "id, source_name, title, url, normalized_url, raw_date_text, \
     canonical_date, effective_date, summary, body_text, country, product_tags, standard, \
     item_type, crawl_time, status, is_processed, related, matched_keywords, risk_level";

const INSERT_SQL: &str = "INSERT INTO crawl_records (id, source_name, title, url, normalized_url, \
     raw_date_text, canonical_date, effective_date, summary, body_text, country, product_tags, \
     standard, item_type, crawl_time, status, is_processed, related, matched_keywords, risk_level) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)";

pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open (or create) a database file and make sure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path.as_ref())?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        info!(path = %path.as_ref().display(), "Opened record database");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }
}

fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS crawl_records (
            id               TEXT PRIMARY KEY,
            source_name      TEXT NOT NULL,
            title            TEXT NOT NULL,
            url              TEXT NOT NULL,
            normalized_url   TEXT NOT NULL,
            raw_date_text    TEXT,
            canonical_date   TEXT,
            effective_date   TEXT NOT NULL,
            summary          TEXT,
            body_text        TEXT,
            country          TEXT,
            product_tags     TEXT,
            standard         TEXT,
            item_type        TEXT,
            crawl_time       TEXT NOT NULL,
            status           TEXT NOT NULL DEFAULT 'NEW',
            is_processed     BOOLEAN NOT NULL DEFAULT 0,
            related          BOOLEAN,
            matched_keywords TEXT,
            risk_level       TEXT NOT NULL DEFAULT 'MEDIUM',
            processed_time   TEXT,
            deleted          BOOLEAN NOT NULL DEFAULT 0,
            created_at       TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_records_url
            ON crawl_records(normalized_url) WHERE deleted = 0;
        CREATE INDEX IF NOT EXISTS idx_records_source ON crawl_records(source_name);
        CREATE INDEX IF NOT EXISTS idx_records_status ON crawl_records(status);
        CREATE INDEX IF NOT EXISTS idx_records_processed ON crawl_records(is_processed);
        ",
    )?;
    Ok(())
}

fn map_insert_error(err: rusqlite::Error, url: &str) -> StorageError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::ConstraintViolation
                && matches!(
                    e.extended_code,
                    ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                ) =>
        {
            StorageError::Conflict(url.to_string())
        }
        _ => StorageError::Database(err),
    }
}

fn insert_record(conn: &Connection, r: &NormalizedRecord) -> Result<(), StorageError> {
    let mut stmt = conn.prepare_cached(INSERT_SQL)?;
    stmt.execute(params![
        r.id,
        r.source_name,
        r.title,
        r.url,
        r.normalized_url,
        r.raw_date_text,
        r.canonical_date,
        r.effective_date,
        r.summary,
        r.body_text,
        r.country,
        r.product_tags,
        r.standard,
        r.item_type,
        r.crawl_time.to_rfc3339(),
        r.status.as_str(),
        r.is_processed,
        r.relevance.as_flag(),
        r.relevance.matched_keywords(),
        r.risk_level.as_str(),
    ])
    .map_err(|e| map_insert_error(e, &r.url))?;
    Ok(())
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<NormalizedRecord> {
    let crawl_time: String = row.get(14)?;
    let crawl_time = DateTime::parse_from_rfc3339(&crawl_time)
        .map_err(|e| conversion_error(14, e.to_string()))?
        .with_timezone(&Utc);
    let status: String = row.get(15)?;
    let status = status
        .parse::<RecordStatus>()
        .map_err(|e| conversion_error(15, e))?;
    let risk: String = row.get(19)?;
    let risk_level = risk.parse::<RiskLevel>().map_err(|e| conversion_error(19, e))?;

    Ok(NormalizedRecord {
        id: row.get(0)?,
        source_name: row.get(1)?,
        title: row.get(2)?,
        url: row.get(3)?,
        normalized_url: row.get(4)?,
        raw_date_text: row.get(5)?,
        canonical_date: row.get(6)?,
        effective_date: row.get(7)?,
        summary: row.get(8)?,
        body_text: row.get(9)?,
        country: row.get(10)?,
        product_tags: row.get(11)?,
        standard: row.get(12)?,
        item_type: row.get(13)?,
        crawl_time,
        status,
        is_processed: row.get(16)?,
        relevance: Relevance::from_columns(row.get(17)?, row.get(18)?),
        risk_level,
    })
}

impl Storage for SqliteStorage {
    fn find_existing_urls(
        &self,
        normalized_urls: &[String],
        source: Option<&str>,
    ) -> Result<HashSet<String>, StorageError> {
        let conn = self.lock()?;
        let mut existing = HashSet::new();
        for chunk in normalized_urls.chunks(LOOKUP_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let mut sql = format!(
                "SELECT normalized_url FROM crawl_records WHERE deleted = 0 AND normalized_url IN ({placeholders})"
            );
            let mut values: Vec<Value> = chunk.iter().map(|u| Value::Text(u.clone())).collect();
            if let Some(source) = source {
                sql.push_str(" AND source_name = ?");
                values.push(Value::Text(source.to_string()));
            }
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values), |row| row.get::<_, String>(0))?;
            for url in rows {
                existing.insert(url?);
            }
        }
        debug!(
            candidates = normalized_urls.len(),
            existing = existing.len(),
            "Looked up existing URLs"
        );
        Ok(existing)
    }

    #[instrument(level = "debug", skip_all, fields(count = records.len()))]
    fn insert_batch(&self, records: &[NormalizedRecord]) -> Result<usize, StorageError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for record in records {
            insert_record(&tx, record)?;
        }
        tx.commit()?;
        Ok(records.len())
    }

    fn insert_one(&self, record: &NormalizedRecord) -> Result<(), StorageError> {
        let conn = self.lock()?;
        insert_record(&conn, record)
    }

    fn update_relevance(
        &self,
        id: &str,
        relevance: &Relevance,
        status: RecordStatus,
    ) -> Result<(), StorageError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE crawl_records
                SET related = ?1, matched_keywords = ?2, is_processed = ?3, status = ?4,
                    processed_time = ?5
              WHERE id = ?6 AND deleted = 0",
            params![
                relevance.as_flag(),
                relevance.matched_keywords(),
                relevance.is_determined(),
                status.as_str(),
                Utc::now().to_rfc3339(),
                id,
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn find_for_classification(
        &self,
        source: Option<&str>,
        include_processed: bool,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<NormalizedRecord>, StorageError> {
        let conn = self.lock()?;
        let mut sql = format!("SELECT {RECORD_COLUMNS} FROM crawl_records WHERE deleted = 0");
        let mut values: Vec<Value> = Vec::new();
        if !include_processed {
            sql.push_str(" AND is_processed = 0");
        }
        if let Some(source) = source {
            sql.push_str(" AND source_name = ?");
            values.push(Value::Text(source.to_string()));
        }
        sql.push_str(" ORDER BY crawl_time, id LIMIT ? OFFSET ?");
        values.push(Value::Integer(limit as i64));
        values.push(Value::Integer(offset as i64));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), row_to_record)?;
        let mut records = Vec::new();
        for record in rows {
            records.push(record?);
        }
        Ok(records)
    }

    fn count_by_source(&self) -> Result<BTreeMap<String, u64>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT source_name, COUNT(*) FROM crawl_records WHERE deleted = 0 GROUP BY source_name",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        let mut counts = BTreeMap::new();
        for row in rows {
            let (source, count) = row?;
            counts.insert(source, count as u64);
        }
        Ok(counts)
    }

    fn count_by_status(&self, source: Option<&str>) -> Result<BTreeMap<RecordStatus, u64>, StorageError> {
        let conn = self.lock()?;
        let mut sql = String::from("SELECT status, COUNT(*) FROM crawl_records WHERE deleted = 0");
        let mut values: Vec<Value> = Vec::new();
        if let Some(source) = source {
            sql.push_str(" AND source_name = ?");
            values.push(Value::Text(source.to_string()));
        }
        sql.push_str(" GROUP BY status");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut counts = BTreeMap::new();
        for row in rows {
            let (status, count) = row?;
            let status = status
                .parse::<RecordStatus>()
                .map_err(|e| StorageError::Database(conversion_error(0, e)))?;
            counts.insert(status, count as u64);
        }
        Ok(counts)
    }

    fn count_by_relevance(&self, source: Option<&str>) -> Result<RelevanceCounts, StorageError> {
        let conn = self.lock()?;
        let mut sql = String::from(
            "SELECT COALESCE(SUM(CASE WHEN related = 1 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN related = 0 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN related IS NULL THEN 1 ELSE 0 END), 0)
               FROM crawl_records WHERE deleted = 0",
        );
        let mut values: Vec<Value> = Vec::new();
        if let Some(source) = source {
            sql.push_str(" AND source_name = ?");
            values.push(Value::Text(source.to_string()));
        }
        let counts = conn.query_row(&sql, params_from_iter(values), |row| {
            Ok(RelevanceCounts {
                related: row.get::<_, i64>(0)? as u64,
                unrelated: row.get::<_, i64>(1)? as u64,
                undetermined: row.get::<_, i64>(2)? as u64,
            })
        })?;
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fixtures::record;

    #[test]
    fn test_insert_and_lookup() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let a = record("SGS", "RoHS update", "https://www.sgs.com/en/news/a");
        let b = record("SGS", "EN 18031", "https://www.sgs.com/en/news/b");
        assert_eq!(storage.insert_batch(&[a.clone(), b.clone()]).unwrap(), 2);

        let existing = storage
            .find_existing_urls(
                &[a.normalized_url.clone(), "https://nowhere.example/x".to_string()],
                None,
            )
            .unwrap();
        assert_eq!(existing.len(), 1);
        assert!(existing.contains(&a.normalized_url));
    }

    #[test]
    fn test_source_scoped_lookup() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let a = record("SGS", "RoHS update", "https://shared.example/a");
        storage.insert_one(&a).unwrap();

        let urls = vec![a.normalized_url.clone()];
        assert_eq!(storage.find_existing_urls(&urls, Some("SGS")).unwrap().len(), 1);
        assert!(storage.find_existing_urls(&urls, Some("UL")).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_insert_is_conflict() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let a = record("SGS", "RoHS update", "https://www.sgs.com/en/news/a");
        storage.insert_one(&a).unwrap();

        let mut again = record("UL", "RoHS update", "HTTP://WWW.SGS.COM/en/news/a/");
        again.id = "other-id".to_string();
        let err = storage.insert_one(&again).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_only_key_violations_are_conflicts() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id TEXT PRIMARY KEY, url TEXT NOT NULL UNIQUE);")
            .unwrap();
        conn.execute("INSERT INTO t VALUES ('a', 'https://x.com/a')", []).unwrap();

        let same_id = conn
            .execute("INSERT INTO t VALUES ('a', 'https://x.com/b')", [])
            .unwrap_err();
        assert!(map_insert_error(same_id, "https://x.com/b").is_conflict());

        let same_url = conn
            .execute("INSERT INTO t VALUES ('b', 'https://x.com/a')", [])
            .unwrap_err();
        assert!(map_insert_error(same_url, "https://x.com/a").is_conflict());

        let missing_url = conn
            .execute("INSERT INTO t (id) VALUES ('c')", [])
            .unwrap_err();
        assert!(matches!(
            map_insert_error(missing_url, "https://x.com/c"),
            StorageError::Database(_)
        ));
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let a = record("SGS", "A", "https://x.example/a");
        storage.insert_one(&a).unwrap();

        let b = record("SGS", "B", "https://x.example/b");
        let mut dup = record("SGS", "A again", "https://x.example/a");
        dup.id = "dup".to_string();
        assert!(storage.insert_batch(&[b.clone(), dup]).is_err());
        assert_eq!(storage.count_for_source("SGS").unwrap(), 1);
    }

    #[test]
    fn test_update_relevance_and_sweep_queries() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let a = record("BEICE", "RoHS 2.0 notice", "https://www.ntek.org.cn/a.html");
        let b = record("BEICE", "Company picnic", "https://www.ntek.org.cn/b.html");
        storage.insert_batch(&[a.clone(), b.clone()]).unwrap();

        let pending = storage.find_for_classification(None, false, 10, 0).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].relevance, Relevance::Undetermined);

        storage
            .update_relevance(
                &a.id,
                &Relevance::Related(vec!["rohs 2.0".to_string()]),
                RecordStatus::Processed,
            )
            .unwrap();

        let pending = storage.find_for_classification(Some("BEICE"), false, 10, 0).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b.id);

        let all = storage.find_for_classification(None, true, 10, 0).unwrap();
        let stored_a = all.iter().find(|r| r.id == a.id).unwrap();
        assert!(stored_a.is_processed);
        assert_eq!(stored_a.status, RecordStatus::Processed);
        assert_eq!(
            stored_a.relevance,
            Relevance::Related(vec!["rohs 2.0".to_string()])
        );

        let counts = storage.count_by_relevance(None).unwrap();
        assert_eq!(counts.related, 1);
        assert_eq!(counts.undetermined, 1);

        assert!(matches!(
            storage.update_relevance("missing", &Relevance::Unrelated, RecordStatus::Processed),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_counts() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage
            .insert_batch(&[
                record("SGS", "A", "https://x.example/a"),
                record("SGS", "B", "https://x.example/b"),
                record("UL", "C", "https://y.example/c"),
            ])
            .unwrap();

        let by_source = storage.count_by_source().unwrap();
        assert_eq!(by_source.get("SGS"), Some(&2));
        assert_eq!(by_source.get("UL"), Some(&1));

        let by_status = storage.count_by_status(Some("SGS")).unwrap();
        assert_eq!(by_status.get(&RecordStatus::New), Some(&2));
    }

    #[test]
    fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.sqlite");
        {
            let storage = SqliteStorage::open(&path).unwrap();
            storage.insert_one(&record("UL", "A", "https://y.example/a")).unwrap();
        }
        let reopened = SqliteStorage::open(&path).unwrap();
        assert_eq!(reopened.count_for_source("UL").unwrap(), 1);
    }
}
