// ==========================================
// 无人机机队维护调度系统 - 维护大纲数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 职责: maintenance_program / maintenance_trigger 表的 CRUD
// 适配: 实现 TriggerCatalog
// ==========================================

use crate::domain::catalog::{MaintenanceProgram, MaintenanceTrigger, WILDCARD_MODEL};
use crate::domain::types::TriggerType;
use crate::engine::collaborators::{CollaboratorError, CollaboratorResult, TriggerCatalog};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{format_timestamp, int_to_bool, parse_enum, parse_timestamp};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

const PROGRAM_COLUMNS: &str = r#"
    program_id, code, name, aircraft_model, is_default, is_active, created_at, updated_at
"#;

const TRIGGER_COLUMNS: &str = r#"
    t.trigger_id, t.program_id, t.code, t.name, t.description,
    t.trigger_type, t.interval_value, t.warning_threshold, t.recurring,
    t.task_template, t.is_active, t.created_at, t.updated_at
"#;

// ==========================================
// MaintenanceCatalogRepository - 维护大纲仓储
// ==========================================
pub struct MaintenanceCatalogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl MaintenanceCatalogRepository {
    /// 从已有连接创建仓储实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 维护大纲
    // ==========================================

    /// 创建维护大纲
    pub fn insert_program(&self, program: &MaintenanceProgram) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO maintenance_program (
                program_id, code, name, aircraft_model, is_default, is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                program.program_id,
                program.code,
                program.name,
                program.aircraft_model,
                program.is_default,
                program.is_active,
                format_timestamp(program.created_at),
                format_timestamp(program.updated_at),
            ],
        )?;
        Ok(())
    }

    /// 按ID查询维护大纲
    pub fn find_program_by_id(&self, program_id: &str) -> RepositoryResult<Option<MaintenanceProgram>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM maintenance_program WHERE program_id = ?1",
            PROGRAM_COLUMNS
        );
        let program = conn
            .query_row(&sql, params![program_id], map_program_row)
            .optional()?;
        Ok(program)
    }

    /// 查询维护大纲列表
    ///
    /// # 参数
    /// - `include_inactive`: 是否包含已停用的大纲
    pub fn list_programs(&self, include_inactive: bool) -> RepositoryResult<Vec<MaintenanceProgram>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM maintenance_program WHERE (?1 = 1 OR is_active = 1) ORDER BY code ASC",
            PROGRAM_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let programs = stmt
            .query_map(params![include_inactive], map_program_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(programs)
    }

    /// 启用/停用维护大纲
    ///
    /// # 返回
    /// - Ok(()): 成功
    /// - Err(NotFound): 大纲不存在
    pub fn set_program_active(&self, program_id: &str, active: bool) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "UPDATE maintenance_program SET is_active = ?1, updated_at = ?2 WHERE program_id = ?3",
            params![active, format_timestamp(Utc::now()), program_id],
        )?;
        if rows == 0 {
            return Err(RepositoryError::not_found("MaintenanceProgram", program_id));
        }
        Ok(())
    }

    // ==========================================
    // 触发条件
    // ==========================================

    /// 创建触发条件
    pub fn insert_trigger(&self, trigger: &MaintenanceTrigger) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO maintenance_trigger (
                trigger_id, program_id, code, name, description,
                trigger_type, interval_value, warning_threshold, recurring,
                task_template, is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                trigger.trigger_id,
                trigger.program_id,
                trigger.code,
                trigger.name,
                trigger.description,
                trigger.trigger_type.to_db_str(),
                trigger.interval_value,
                trigger.warning_threshold,
                trigger.recurring,
                trigger.task_template,
                trigger.is_active,
                format_timestamp(trigger.created_at),
                format_timestamp(trigger.updated_at),
            ],
        )?;
        Ok(())
    }

    /// 按ID查询触发条件（含已停用）
    pub fn find_trigger_by_id(&self, trigger_id: &str) -> RepositoryResult<Option<MaintenanceTrigger>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM maintenance_trigger t WHERE t.trigger_id = ?1",
            TRIGGER_COLUMNS
        );
        let trigger = conn
            .query_row(&sql, params![trigger_id], map_trigger_row)
            .optional()?;
        Ok(trigger)
    }

    /// 查询大纲下的触发条件
    pub fn list_triggers_by_program(&self, program_id: &str) -> RepositoryResult<Vec<MaintenanceTrigger>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM maintenance_trigger t WHERE t.program_id = ?1 ORDER BY t.code ASC",
            TRIGGER_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let triggers = stmt
            .query_map(params![program_id], map_trigger_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(triggers)
    }

    /// 查询全部触发条件（含已停用，调度循环用于按ID查找）
    pub fn list_all_triggers(&self) -> RepositoryResult<Vec<MaintenanceTrigger>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM maintenance_trigger t ORDER BY t.code ASC",
            TRIGGER_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let triggers = stmt
            .query_map([], map_trigger_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(triggers)
    }

    /// 查询适用于指定机型的有效触发条件
    ///
    /// 条件: 触发条件有效 + 所属大纲有效 + 大纲机型为通配符或与机型一致（不区分大小写）
    pub fn find_active_triggers_for_model(&self, model: &str) -> RepositoryResult<Vec<MaintenanceTrigger>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"
            SELECT {}
            FROM maintenance_trigger t
            JOIN maintenance_program p ON p.program_id = t.program_id
            WHERE t.is_active = 1
              AND p.is_active = 1
              AND (p.aircraft_model = ?1 OR p.aircraft_model = ?2 COLLATE NOCASE)
            ORDER BY p.is_default DESC, p.code ASC, t.code ASC
            "#,
            TRIGGER_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let triggers = stmt
            .query_map(params![WILDCARD_MODEL, model], map_trigger_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(triggers)
    }

    /// 启用/停用触发条件
    pub fn set_trigger_active(&self, trigger_id: &str, active: bool) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "UPDATE maintenance_trigger SET is_active = ?1, updated_at = ?2 WHERE trigger_id = ?3",
            params![active, format_timestamp(Utc::now()), trigger_id],
        )?;
        if rows == 0 {
            return Err(RepositoryError::not_found("MaintenanceTrigger", trigger_id));
        }
        Ok(())
    }
}

#[async_trait]
impl TriggerCatalog for MaintenanceCatalogRepository {
    async fn get_active_triggers(&self, aircraft_model: &str) -> CollaboratorResult<Vec<MaintenanceTrigger>> {
        self.find_active_triggers_for_model(aircraft_model)
            .map_err(|e| CollaboratorError::Unavailable(e.to_string()))
    }

    async fn get_trigger(&self, trigger_id: &str) -> CollaboratorResult<MaintenanceTrigger> {
        match self.find_trigger_by_id(trigger_id) {
            Ok(Some(trigger)) => Ok(trigger),
            Ok(None) => Err(CollaboratorError::not_found("MaintenanceTrigger", trigger_id)),
            Err(e) => Err(CollaboratorError::Unavailable(e.to_string())),
        }
    }

    async fn get_program(&self, program_id: &str) -> CollaboratorResult<MaintenanceProgram> {
        match self.find_program_by_id(program_id) {
            Ok(Some(program)) => Ok(program),
            Ok(None) => Err(CollaboratorError::not_found("MaintenanceProgram", program_id)),
            Err(e) => Err(CollaboratorError::Unavailable(e.to_string())),
        }
    }
}

fn map_program_row(row: &Row<'_>) -> SqliteResult<MaintenanceProgram> {
    Ok(MaintenanceProgram {
        program_id: row.get(0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        aircraft_model: row.get(3)?,
        is_default: int_to_bool(row.get(4)?),
        is_active: int_to_bool(row.get(5)?),
        created_at: parse_timestamp(6, &row.get::<_, String>(6)?)?,
        updated_at: parse_timestamp(7, &row.get::<_, String>(7)?)?,
    })
}

fn map_trigger_row(row: &Row<'_>) -> SqliteResult<MaintenanceTrigger> {
    Ok(MaintenanceTrigger {
        trigger_id: row.get(0)?,
        program_id: row.get(1)?,
        code: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        trigger_type: parse_enum(5, &row.get::<_, String>(5)?, TriggerType::from_str)?,
        interval_value: row.get(6)?,
        warning_threshold: row.get(7)?,
        recurring: int_to_bool(row.get(8)?),
        task_template: row.get(9)?,
        is_active: int_to_bool(row.get(10)?),
        created_at: parse_timestamp(11, &row.get::<_, String>(11)?)?,
        updated_at: parse_timestamp(12, &row.get::<_, String>(12)?)?,
    })
}
