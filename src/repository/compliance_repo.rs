// ==========================================
// 无人机机队维护调度系统 - 完工履历数据仓储
// ==========================================
// 红线: 只追加，不提供 UPDATE / DELETE
// ==========================================

use crate::domain::compliance::ComplianceRecord;
use crate::domain::types::CompletionSource;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{format_date, format_timestamp, parse_date, parse_timestamp};
use rusqlite::{params, Connection, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

const RECORD_COLUMNS: &str = r#"
    record_id, schedule_id, aircraft_id, trigger_id, work_order_id, source,
    completed_at, completed_at_value,
    previous_due_date, previous_due_value, new_due_date, new_due_value,
    created_at
"#;

// ==========================================
// ComplianceRecordRepository - 完工履历仓储
// ==========================================
pub struct ComplianceRecordRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ComplianceRecordRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 追加一条完工履历
    pub fn insert(&self, record: &ComplianceRecord) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        insert_record_tx(&conn, record)
    }

    /// 按计划查询履历（按完工时间倒序）
    pub fn find_by_schedule(&self, schedule_id: &str) -> RepositoryResult<Vec<ComplianceRecord>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM compliance_record WHERE schedule_id = ?1 ORDER BY completed_at DESC, created_at DESC",
            RECORD_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![schedule_id], map_record_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(records)
    }

    /// 按机体查询履历（按完工时间倒序）
    ///
    /// # 参数
    /// - limit: 最大返回条数
    pub fn find_by_aircraft(
        &self,
        aircraft_id: &str,
        limit: usize,
    ) -> RepositoryResult<Vec<ComplianceRecord>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM compliance_record WHERE aircraft_id = ?1 ORDER BY completed_at DESC, created_at DESC LIMIT ?2",
            RECORD_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![aircraft_id, limit as i64], map_record_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(records)
    }
}

/// 在给定连接/事务上插入履历（供计划仓储在同一事务内调用）
pub(crate) fn insert_record_tx(conn: &Connection, record: &ComplianceRecord) -> RepositoryResult<()> {
    conn.execute(
        r#"
        INSERT INTO compliance_record (
            record_id, schedule_id, aircraft_id, trigger_id, work_order_id, source,
            completed_at, completed_at_value,
            previous_due_date, previous_due_value, new_due_date, new_due_value,
            created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        "#,
        params![
            record.record_id,
            record.schedule_id,
            record.aircraft_id,
            record.trigger_id,
            record.work_order_id,
            record.source.to_db_str(),
            format_timestamp(record.completed_at),
            record.completed_at_value,
            record.previous_due_date.map(format_date),
            record.previous_due_value,
            record.new_due_date.map(format_date),
            record.new_due_value,
            format_timestamp(record.created_at),
        ],
    )?;
    Ok(())
}

fn parse_optional_date(idx: usize, raw: Option<String>) -> SqliteResult<Option<chrono::NaiveDate>> {
    raw.map(|s| parse_date(idx, &s)).transpose()
}

fn map_record_row(row: &Row<'_>) -> SqliteResult<ComplianceRecord> {
    Ok(ComplianceRecord {
        record_id: row.get(0)?,
        schedule_id: row.get(1)?,
        aircraft_id: row.get(2)?,
        trigger_id: row.get(3)?,
        work_order_id: row.get(4)?,
        source: CompletionSource::from_str(&row.get::<_, String>(5)?),
        completed_at: parse_timestamp(6, &row.get::<_, String>(6)?)?,
        completed_at_value: row.get(7)?,
        previous_due_date: parse_optional_date(8, row.get(8)?)?,
        previous_due_value: row.get(9)?,
        new_due_date: parse_optional_date(10, row.get(10)?)?,
        new_due_value: row.get(11)?,
        created_at: parse_timestamp(12, &row.get::<_, String>(12)?)?,
    })
}
