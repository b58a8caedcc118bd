use std::path::Path;
use std::str::FromStr;

use log::{debug, error, trace, warn};
use serde_json::{Map, Value};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Sqlite,
};

use crate::error_handling::types::StorageError;
use crate::model::context::Deadline;
use crate::model::record::CapturedRecord;
use crate::query::predicate::{checked_identifier, ScalarValue};
use crate::storage::storage_trait::NodeBackend;
use crate::storage::types::{format_create_date, parse_create_date, ScanRequest};

// Internal row mapping for record tables to avoid manual try_get
#[derive(Debug, sqlx::FromRow)]
struct RecordRow {
    id: i64,
    sid: String,
    create_date: String,
    protocol_header: Option<String>,
    data_header: Option<String>,
    raw: Option<String>,
}

fn header_map(id: i64, column: &str, text: Option<String>) -> Map<String, Value> {
    match text.as_deref().map(str::trim) {
        None | Some("") => Map::new(),
        Some(body) => match serde_json::from_str::<Map<String, Value>>(body) {
            Ok(map) => map,
            Err(e) => {
                warn!("Row {} has an unreadable {}: {}", id, column, e);
                Map::new()
            }
        },
    }
}

impl RecordRow {
    fn into_record(self) -> Result<CapturedRecord, StorageError> {
        let created_at = parse_create_date(&self.create_date).ok_or(StorageError::ReadFailed)?;
        let mut record = CapturedRecord::new(self.id, self.sid, created_at);
        record.protocol_header = header_map(self.id, "protocol_header", self.protocol_header);
        record.data_header = header_map(self.id, "data_header", self.data_header);
        record.raw = self.raw.unwrap_or_default();
        Ok(record)
    }
}

/// One capture node's SQLite database.
pub struct SqliteNodeStorage {
    rt: tokio::runtime::Runtime,
    pool: Pool<Sqlite>,
}

impl SqliteNodeStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|_| StorageError::ConnectionFailed)?;
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|_| StorageError::WriteFailed)?;
            }
        }
        let pool = rt.block_on(async {
            let opts = SqliteConnectOptions::from_str("sqlite://")
                .map_err(|_| StorageError::ConnectionFailed)?
                .filename(path_ref)
                .create_if_missing(true)
                // LIKE keeps case; ILIKE lowers both sides explicitly.
                .pragma("case_sensitive_like", "ON");
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(opts)
                .await
                .map_err(|e| {
                    error!("Cannot open node database {}: {}", path_ref.display(), e);
                    StorageError::ConnectionFailed
                })
        })?;
        Ok(Self { rt, pool })
    }

    async fn table_exists(&self, table: &str) -> Result<bool, StorageError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await
        .map_err(|_| StorageError::ReadFailed)?;
        Ok(count > 0)
    }
}

impl NodeBackend for SqliteNodeStorage {
    fn scan(&self, request: &ScanRequest, deadline: &Deadline) -> Result<Vec<CapturedRecord>, StorageError> {
        if deadline.is_expired() {
            return Err(StorageError::Timeout);
        }
        let table = checked_identifier(&request.table)?;
        let filter = request.predicate.to_sql()?;
        let sql = format!(
            "SELECT id, sid, create_date, protocol_header, data_header, raw FROM {} \
             WHERE create_date BETWEEN ? AND ? AND {} ORDER BY create_date ASC, id ASC LIMIT ?",
            table, filter.sql
        );
        debug!("scan {}: {} {:?}", table, filter.sql, filter.binds);

        self.rt.block_on(async {
            if !self.table_exists(table).await? {
                trace!("Table {} does not exist, nothing to scan", table);
                return Ok(Vec::new());
            }
            let mut q = sqlx::query_as::<_, RecordRow>(&sql)
                .bind(format_create_date(&request.time_range.start()))
                .bind(format_create_date(&request.time_range.end()));
            for value in &filter.binds {
                q = match value {
                    ScalarValue::Text(s) => q.bind(s.clone()),
                    ScalarValue::Integer(i) => q.bind(*i),
                };
            }
            q = q.bind(i64::try_from(request.limit).unwrap_or(i64::MAX));

            let fetch = q.fetch_all(&self.pool);
            let rows = match deadline.remaining() {
                Some(left) => tokio::time::timeout(left, fetch)
                    .await
                    .map_err(|_| StorageError::Timeout)?,
                None => fetch.await,
            }
            .map_err(|e| {
                error!("Scan of {} failed: {}", table, e);
                StorageError::ReadFailed
            })?;

            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                out.push(row.into_record()?);
            }
            Ok(out)
        })
    }

    fn insert(&self, table: &str, record: &CapturedRecord) -> Result<i64, StorageError> {
        let table = checked_identifier(table)?;
        let protocol_header = serde_json::to_string(&record.protocol_header).map_err(|_| StorageError::WriteFailed)?;
        let data_header = serde_json::to_string(&record.data_header).map_err(|_| StorageError::WriteFailed)?;
        let sql = format!(
            "INSERT INTO {} (id, sid, create_date, protocol_header, data_header, raw) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            table
        );
        self.rt.block_on(async {
            let result = sqlx::query(&sql)
                .bind((record.id > 0).then_some(record.id))
                .bind(&record.sid)
                .bind(format_create_date(&record.created_at))
                .bind(protocol_header)
                .bind(data_header)
                .bind(&record.raw)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    error!("Insert into {} failed: {}", table, e);
                    StorageError::WriteFailed
                })?;
            Ok(result.last_insert_rowid())
        })
    }

    fn ensure_table(&self, table: &str) -> Result<(), StorageError> {
        let table = checked_identifier(table)?;
        self.rt.block_on(async {
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    sid TEXT NOT NULL,
                    create_date TEXT NOT NULL,
                    protocol_header TEXT NOT NULL DEFAULT '{{}}',
                    data_header TEXT NOT NULL DEFAULT '{{}}',
                    raw TEXT NOT NULL DEFAULT ''
                );",
                table
            ))
            .execute(&self.pool)
            .await
            .map_err(|_| StorageError::WriteFailed)?;
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS {0}_create_date ON {0} (create_date);",
                table
            ))
            .execute(&self.pool)
            .await
            .map_err(|_| StorageError::WriteFailed)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::filter::TimeRange;
    use crate::model::record::FieldPath;
    use crate::query::predicate::{CompareOp, Predicate};
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const TABLE: &str = "hep_proto_1_call";

    fn temp_db() -> SqliteNodeStorage {
        let dir = TempDir::new().unwrap();
        let path: PathBuf = dir.path().join("node.sqlite3");
        // Keep TempDir alive by leaking it for the test duration
        Box::leak(Box::new(dir));
        SqliteNodeStorage::open(path).unwrap()
    }

    fn seed(storage: &SqliteNodeStorage) -> TimeRange {
        storage.ensure_table(TABLE).unwrap();
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        for (i, (sid, port, raw)) in [
            ("call-a", 5060, "INVITE sip:100@x SIP/2.0"),
            ("call-b", 5080, "BYE sip:200@x SIP/2.0"),
            ("call-a", 5060, "SIP/2.0 200 OK"),
        ]
        .iter()
        .enumerate()
        {
            let mut r = CapturedRecord::new(0, *sid, base + Duration::seconds(i as i64));
            r.protocol_header.insert("srcPort".into(), json!(port));
            r.data_header.insert("callid".into(), json!(sid));
            r.raw = raw.to_string();
            storage.insert(TABLE, &r).unwrap();
        }
        TimeRange::from_datetimes(base - Duration::minutes(5), base + Duration::minutes(5))
    }

    #[test]
    fn scan_applies_predicate_and_time_range() {
        let storage = temp_db();
        let range = seed(&storage);
        let p = Predicate::compare(FieldPath::parse("raw"), CompareOp::ILike, ScalarValue::Text("%invite%".into()));
        let rows = storage
            .scan(&ScanRequest::new(TABLE, range, p, 200), &Deadline::none())
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sid, "call-a");
        assert_eq!(rows[0].protocol_header.get("srcPort"), Some(&json!(5060)));

        let outside = TimeRange::new(range.to + 1, range.to + 1_000_000);
        let rows = storage
            .scan(&ScanRequest::new(TABLE, outside, Predicate::All(vec![]), 200), &Deadline::none())
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn scan_reads_json_integers_and_limits() {
        let storage = temp_db();
        let range = seed(&storage);
        let p = Predicate::compare(FieldPath::parse("protocol_header.srcPort"), CompareOp::Eq, ScalarValue::Integer(5060));
        let rows = storage
            .scan(&ScanRequest::new(TABLE, range, p.clone(), 200), &Deadline::none())
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].created_at < rows[1].created_at);
        let rows = storage
            .scan(&ScanRequest::new(TABLE, range, p, 1), &Deadline::none())
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn like_is_case_sensitive_and_ilike_is_not() {
        let storage = temp_db();
        let range = seed(&storage);
        let callid = || FieldPath::parse("data_header.callid");
        let count = |p: Predicate| {
            storage
                .scan(&ScanRequest::new(TABLE, range, p, 200), &Deadline::none())
                .unwrap()
                .len()
        };

        assert_eq!(count(Predicate::compare(callid(), CompareOp::Like, ScalarValue::Text("CALL-%".into()))), 0);
        assert_eq!(count(Predicate::compare(callid(), CompareOp::Like, ScalarValue::Text("call-a%".into()))), 2);
        assert_eq!(count(Predicate::compare(callid(), CompareOp::ILike, ScalarValue::Text("CALL-%".into()))), 3);
        let any = Predicate::LikeAny {
            field: callid(),
            patterns: vec!["CALL-A".into(), "call-b".into()],
            negated: false,
        };
        assert_eq!(count(any), 1);
    }

    #[test]
    fn missing_table_scans_empty() {
        let storage = temp_db();
        let rows = storage
            .scan(
                &ScanRequest::new("hep_proto_5_default", TimeRange::new(0, 4_102_444_800_000_000), Predicate::All(vec![]), 10),
                &Deadline::none(),
            )
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn expired_deadline_times_out() {
        let storage = temp_db();
        let range = seed(&storage);
        let expired = Deadline::after(std::time::Duration::ZERO);
        let res = storage.scan(&ScanRequest::new(TABLE, range, Predicate::All(vec![]), 10), &expired);
        assert!(matches!(res, Err(StorageError::Timeout)));
    }

    #[test]
    fn insert_keeps_explicit_id() {
        let storage = temp_db();
        storage.ensure_table(TABLE).unwrap();
        let r = CapturedRecord::new(77, "x", Utc::now());
        assert_eq!(storage.insert(TABLE, &r).unwrap(), 77);
        assert!(storage.insert("bad table", &r).is_err());
    }
}
