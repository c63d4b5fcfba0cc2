// ==========================================
// 无人机机队维护调度系统 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为，避免“部分模块外键开启/部分不开启”
// - 统一 busy_timeout，减少调度循环与完工回调并发写入时的偶发 busy 错误
// - 建表幂等（CREATE TABLE IF NOT EXISTS），启动即可用
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 打开连接、建表，并包装为仓储层共享的 `Arc<Mutex<Connection>>`
pub fn open_shared_connection(db_path: &str) -> rusqlite::Result<Arc<Mutex<Connection>>> {
    let conn = open_sqlite_connection(db_path)?;
    ensure_schema(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 确保全部业务表存在（幂等）
///
/// 表清单:
/// - config_scope / config_kv: 配置
/// - maintenance_program / maintenance_trigger: 维护大纲与触发条件
/// - maintenance_schedule: 每架机 × 每个触发条件一条维护计划
/// - compliance_record: 完工履历（只追加）
/// - aircraft / work_order: 机队与工单适配器使用的本地表
pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_scope (
            scope_id TEXT PRIMARY KEY,
            scope_type TEXT NOT NULL,
            scope_key TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(scope_type, scope_key)
        );

        INSERT OR IGNORE INTO config_scope (scope_id, scope_type, scope_key)
        VALUES ('global', 'GLOBAL', 'global');

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL REFERENCES config_scope(scope_id) ON DELETE CASCADE,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        CREATE TABLE IF NOT EXISTS maintenance_program (
            program_id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            aircraft_model TEXT NOT NULL DEFAULT '*',
            is_default INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS maintenance_trigger (
            trigger_id TEXT PRIMARY KEY,
            program_id TEXT NOT NULL REFERENCES maintenance_program(program_id),
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            description TEXT,
            trigger_type TEXT NOT NULL,
            interval_value REAL NOT NULL CHECK (interval_value > 0),
            warning_threshold REAL NOT NULL CHECK (warning_threshold > 0),
            recurring INTEGER NOT NULL DEFAULT 1,
            task_template TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            CHECK (warning_threshold < interval_value)
        );

        CREATE INDEX IF NOT EXISTS idx_trigger_program
          ON maintenance_trigger(program_id, is_active);

        CREATE TABLE IF NOT EXISTS maintenance_schedule (
            schedule_id TEXT PRIMARY KEY,
            aircraft_id TEXT NOT NULL,
            trigger_id TEXT NOT NULL REFERENCES maintenance_trigger(trigger_id),
            status TEXT NOT NULL DEFAULT 'PENDING',
            last_completed_at TEXT,
            last_completed_at_value REAL,
            due_at_date TEXT,
            due_at_value REAL,
            linked_work_order_id TEXT,
            work_order_claim TEXT,
            work_order_claimed_at TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            revision INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            CHECK ((due_at_date IS NULL) <> (due_at_value IS NULL))
        );

        CREATE UNIQUE INDEX IF NOT EXISTS uq_schedule_active_pair
          ON maintenance_schedule(aircraft_id, trigger_id) WHERE is_active = 1;

        CREATE INDEX IF NOT EXISTS idx_schedule_status
          ON maintenance_schedule(is_active, status);

        CREATE INDEX IF NOT EXISTS idx_schedule_work_order
          ON maintenance_schedule(linked_work_order_id);

        CREATE TABLE IF NOT EXISTS compliance_record (
            record_id TEXT PRIMARY KEY,
            schedule_id TEXT NOT NULL REFERENCES maintenance_schedule(schedule_id),
            aircraft_id TEXT NOT NULL,
            trigger_id TEXT NOT NULL,
            work_order_id TEXT,
            source TEXT NOT NULL,
            completed_at TEXT NOT NULL,
            completed_at_value REAL,
            previous_due_date TEXT,
            previous_due_value REAL,
            new_due_date TEXT,
            new_due_value REAL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_compliance_schedule
          ON compliance_record(schedule_id, completed_at);

        CREATE TABLE IF NOT EXISTS aircraft (
            aircraft_id TEXT PRIMARY KEY,
            model TEXT NOT NULL,
            commissioned_on TEXT,
            flight_hours REAL NOT NULL DEFAULT 0,
            flight_cycles REAL NOT NULL DEFAULT 0,
            battery_cycles REAL NOT NULL DEFAULT 0,
            metrics_as_of TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS work_order (
            work_order_id TEXT PRIMARY KEY,
            aircraft_id TEXT NOT NULL,
            schedule_id TEXT,
            title TEXT NOT NULL,
            task_json TEXT NOT NULL,
            auto_assign INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'OPEN',
            created_at TEXT NOT NULL,
            closed_at TEXT,
            -- 关闭时机体读数（下一周期基准）
            closed_flight_hours REAL,
            closed_flight_cycles REAL,
            closed_battery_cycles REAL
        );

        CREATE INDEX IF NOT EXISTS idx_work_order_schedule
          ON work_order(schedule_id, status);
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();

        ensure_schema(&conn).unwrap();
        ensure_schema(&conn).unwrap();

        let version = read_schema_version(&conn).unwrap();
        assert_eq!(version, Some(CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn test_schema_version_absent_before_init() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), None);
    }
}
