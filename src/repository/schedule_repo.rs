// ==========================================
// 无人机机队维护调度系统 - 维护计划数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 并发: 所有更新走 revision 乐观锁（单行 compare-and-swap）
// ==========================================

use crate::domain::compliance::ComplianceRecord;
use crate::domain::schedule::MaintenanceSchedule;
use crate::domain::types::ScheduleStatus;
use crate::repository::compliance_repo::insert_record_tx;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{
    format_date, format_timestamp, int_to_bool, parse_date, parse_enum, parse_timestamp,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

const SCHEDULE_COLUMNS: &str = r#"
    schedule_id, aircraft_id, trigger_id, status,
    last_completed_at, last_completed_at_value,
    due_at_date, due_at_value,
    linked_work_order_id, work_order_claim, work_order_claimed_at,
    is_active, revision, created_at, updated_at
"#;

// ==========================================
// MaintenanceScheduleRepository - 维护计划仓储
// ==========================================
/// 维护计划仓储
/// 职责: 管理 maintenance_schedule 表的读写
pub struct MaintenanceScheduleRepository {
    conn: Arc<Mutex<Connection>>,
}

impl MaintenanceScheduleRepository {
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
    // 写入操作
    // ==========================================

    /// 批量创建维护计划（单事务，全部成功或全部回滚）
    ///
    /// # 返回
    /// - Ok(count): 插入条数
    /// - Err(UniqueConstraintViolation): (机体, 触发条件) 已存在有效计划
    pub fn insert_batch(&self, schedules: &[MaintenanceSchedule]) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let mut count = 0;
        for schedule in schedules {
            insert_schedule(&tx, schedule)?;
            count += 1;
        }

        tx.commit()?;
        Ok(count)
    }

    /// 带乐观锁更新维护计划
    ///
    /// 使用 revision 字段防止并发覆盖；成功后 revision + 1
    ///
    /// # 返回
    /// - Ok(new_revision): 更新成功
    /// - Err(OptimisticLockFailure): revision 不匹配 (其他写入方已更新)
    /// - Err(NotFound): 计划不存在
    pub fn update_with_revision(&self, schedule: &MaintenanceSchedule) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        compare_and_swap(&conn, schedule)
    }

    /// 带乐观锁更新维护计划并追加完工履历（单事务）
    pub fn update_with_compliance_record(
        &self,
        schedule: &MaintenanceSchedule,
        record: &ComplianceRecord,
    ) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let new_revision = compare_and_swap(&tx, schedule)?;
        insert_record_tx(&tx, record)?;

        tx.commit()?;
        Ok(new_revision)
    }

    /// 停用机体的全部维护计划（机体退役）
    ///
    /// # 返回
    /// - Ok(rows): 被停用的计划数
    pub fn deactivate_by_aircraft(&self, aircraft_id: &str) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"
            UPDATE maintenance_schedule
               SET is_active = 0, revision = revision + 1, updated_at = ?1
             WHERE aircraft_id = ?2 AND is_active = 1
            "#,
            params![format_timestamp(Utc::now()), aircraft_id],
        )?;
        Ok(rows)
    }

    /// 停用触发条件的全部维护计划（触发条件停用）
    pub fn deactivate_by_trigger(&self, trigger_id: &str) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"
            UPDATE maintenance_schedule
               SET is_active = 0, revision = revision + 1, updated_at = ?1
             WHERE trigger_id = ?2 AND is_active = 1
            "#,
            params![format_timestamp(Utc::now()), trigger_id],
        )?;
        Ok(rows)
    }

    /// 停用大纲下全部触发条件的维护计划
    pub fn deactivate_by_program(&self, program_id: &str) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"
            UPDATE maintenance_schedule
               SET is_active = 0, revision = revision + 1, updated_at = ?1
             WHERE is_active = 1
               AND trigger_id IN (SELECT trigger_id FROM maintenance_trigger WHERE program_id = ?2)
            "#,
            params![format_timestamp(Utc::now()), program_id],
        )?;
        Ok(rows)
    }

    // ==========================================
    // 查询操作
    // ==========================================

    /// 按ID查询
    pub fn find_by_id(&self, schedule_id: &str) -> RepositoryResult<Option<MaintenanceSchedule>> {
        let conn = self.get_conn()?;
        find_by_id_conn(&conn, schedule_id)
    }

    /// 查询全部有效计划
    pub fn find_active(&self) -> RepositoryResult<Vec<MaintenanceSchedule>> {
        self.query_list(
            "WHERE is_active = 1 ORDER BY aircraft_id ASC, schedule_id ASC",
            params![],
        )
    }

    /// 查询机体的有效计划
    pub fn find_active_by_aircraft(&self, aircraft_id: &str) -> RepositoryResult<Vec<MaintenanceSchedule>> {
        self.query_list(
            "WHERE is_active = 1 AND aircraft_id = ?1 ORDER BY schedule_id ASC",
            params![aircraft_id],
        )
    }

    /// 查询机体的全部计划（含已停用）
    pub fn find_by_aircraft(&self, aircraft_id: &str) -> RepositoryResult<Vec<MaintenanceSchedule>> {
        self.query_list(
            "WHERE aircraft_id = ?1 ORDER BY is_active DESC, created_at ASC",
            params![aircraft_id],
        )
    }

    /// 按关联工单查询
    pub fn find_by_linked_work_order(
        &self,
        work_order_id: &str,
    ) -> RepositoryResult<Option<MaintenanceSchedule>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM maintenance_schedule WHERE linked_work_order_id = ?1 LIMIT 1",
            SCHEDULE_COLUMNS
        );
        let schedule = conn
            .query_row(&sql, params![work_order_id], map_schedule_row)
            .optional()?;
        Ok(schedule)
    }

    /// 查询工单生成候选
    ///
    /// 条件: 有效 + DUE/OVERDUE + 未关联工单
    /// 占位令牌是否过期由调用方按配置判断
    pub fn find_work_order_candidates(&self) -> RepositoryResult<Vec<MaintenanceSchedule>> {
        self.query_list(
            r#"
            WHERE is_active = 1
              AND status IN ('DUE', 'OVERDUE')
              AND linked_work_order_id IS NULL
            ORDER BY CASE status WHEN 'OVERDUE' THEN 0 ELSE 1 END ASC, schedule_id ASC
            "#,
            params![],
        )
    }

    /// 查询已关联工单的有效计划（用于补处理漏掉的工单关闭）
    pub fn find_linked_active(&self) -> RepositoryResult<Vec<MaintenanceSchedule>> {
        self.query_list(
            r#"
            WHERE is_active = 1
              AND linked_work_order_id IS NOT NULL
            ORDER BY schedule_id ASC
            "#,
            params![],
        )
    }

    /// 查询机体已有有效计划的触发条件ID集合
    pub fn find_active_trigger_ids(&self, aircraft_id: &str) -> RepositoryResult<HashSet<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT trigger_id FROM maintenance_schedule WHERE aircraft_id = ?1 AND is_active = 1",
        )?;
        let ids = stmt
            .query_map(params![aircraft_id], |row| row.get::<_, String>(0))?
            .collect::<SqliteResult<HashSet<_>>>()?;
        Ok(ids)
    }

    /// 按持久化状态统计有效计划数量（四种状态都有键，缺省为 0）
    pub fn count_by_status(&self) -> RepositoryResult<HashMap<ScheduleStatus, i64>> {
        let conn = self.get_conn()?;
        let mut counts: HashMap<ScheduleStatus, i64> =
            ScheduleStatus::all().into_iter().map(|s| (s, 0)).collect();

        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM maintenance_schedule WHERE is_active = 1 GROUP BY status",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        for row in rows {
            let (status, count) = row?;
            match ScheduleStatus::from_str(&status) {
                Some(s) => {
                    counts.insert(s, count);
                }
                None => tracing::warn!("maintenance_schedule 存在未知状态: {}", status),
            }
        }

        Ok(counts)
    }

    fn query_list(
        &self,
        where_clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> RepositoryResult<Vec<MaintenanceSchedule>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM maintenance_schedule {}",
            SCHEDULE_COLUMNS, where_clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let schedules = stmt
            .query_map(params, map_schedule_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(schedules)
    }
}

// ==========================================
// 事务内辅助函数
// ==========================================

fn insert_schedule(conn: &Connection, schedule: &MaintenanceSchedule) -> RepositoryResult<()> {
    conn.execute(
        r#"
        INSERT INTO maintenance_schedule (
            schedule_id, aircraft_id, trigger_id, status,
            last_completed_at, last_completed_at_value,
            due_at_date, due_at_value,
            linked_work_order_id, work_order_claim, work_order_claimed_at,
            is_active, revision, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        "#,
        params![
            schedule.schedule_id,
            schedule.aircraft_id,
            schedule.trigger_id,
            schedule.status.to_db_str(),
            schedule.last_completed_at.map(format_timestamp),
            schedule.last_completed_at_value,
            schedule.due_at_date.map(format_date),
            schedule.due_at_value,
            schedule.linked_work_order_id,
            schedule.work_order_claim,
            schedule.work_order_claimed_at.map(format_timestamp),
            schedule.is_active,
            schedule.revision,
            format_timestamp(schedule.created_at),
            format_timestamp(schedule.updated_at),
        ],
    )?;
    Ok(())
}

/// 单行 compare-and-swap：仅当库中 revision 等于实体 revision 时写入
fn compare_and_swap(conn: &Connection, schedule: &MaintenanceSchedule) -> RepositoryResult<i64> {
    let rows = conn.execute(
        r#"
        UPDATE maintenance_schedule
           SET status = ?1,
               last_completed_at = ?2,
               last_completed_at_value = ?3,
               due_at_date = ?4,
               due_at_value = ?5,
               linked_work_order_id = ?6,
               work_order_claim = ?7,
               work_order_claimed_at = ?8,
               is_active = ?9,
               updated_at = ?10,
               revision = revision + 1
         WHERE schedule_id = ?11 AND revision = ?12
        "#,
        params![
            schedule.status.to_db_str(),
            schedule.last_completed_at.map(format_timestamp),
            schedule.last_completed_at_value,
            schedule.due_at_date.map(format_date),
            schedule.due_at_value,
            schedule.linked_work_order_id,
            schedule.work_order_claim,
            schedule.work_order_claimed_at.map(format_timestamp),
            schedule.is_active,
            format_timestamp(schedule.updated_at),
            schedule.schedule_id,
            schedule.revision,
        ],
    )?;

    if rows == 0 {
        // 判断是记录不存在还是 revision 冲突
        let actual: Option<i64> = conn
            .query_row(
                "SELECT revision FROM maintenance_schedule WHERE schedule_id = ?1",
                params![schedule.schedule_id],
                |row| row.get(0),
            )
            .optional()?;

        return match actual {
            Some(actual) => Err(RepositoryError::OptimisticLockFailure {
                entity: "MaintenanceSchedule".to_string(),
                id: schedule.schedule_id.clone(),
                expected: schedule.revision,
                actual,
            }),
            None => Err(RepositoryError::not_found(
                "MaintenanceSchedule",
                &schedule.schedule_id,
            )),
        };
    }

    Ok(schedule.revision + 1)
}

fn find_by_id_conn(
    conn: &Connection,
    schedule_id: &str,
) -> RepositoryResult<Option<MaintenanceSchedule>> {
    let sql = format!(
        "SELECT {} FROM maintenance_schedule WHERE schedule_id = ?1",
        SCHEDULE_COLUMNS
    );
    let schedule = conn
        .query_row(&sql, params![schedule_id], map_schedule_row)
        .optional()?;
    Ok(schedule)
}

fn parse_optional_timestamp(idx: usize, raw: Option<String>) -> SqliteResult<Option<DateTime<Utc>>> {
    raw.map(|s| parse_timestamp(idx, &s)).transpose()
}

fn map_schedule_row(row: &Row<'_>) -> SqliteResult<MaintenanceSchedule> {
    Ok(MaintenanceSchedule {
        schedule_id: row.get(0)?,
        aircraft_id: row.get(1)?,
        trigger_id: row.get(2)?,
        status: parse_enum(3, &row.get::<_, String>(3)?, ScheduleStatus::from_str)?,
        last_completed_at: parse_optional_timestamp(4, row.get(4)?)?,
        last_completed_at_value: row.get(5)?,
        due_at_date: row
            .get::<_, Option<String>>(6)?
            .map(|s| parse_date(6, &s))
            .transpose()?,
        due_at_value: row.get(7)?,
        linked_work_order_id: row.get(8)?,
        work_order_claim: row.get(9)?,
        work_order_claimed_at: parse_optional_timestamp(10, row.get(10)?)?,
        is_active: int_to_bool(row.get(11)?),
        revision: row.get(12)?,
        created_at: parse_timestamp(13, &row.get::<_, String>(13)?)?,
        updated_at: parse_timestamp(14, &row.get::<_, String>(14)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, ensure_schema};
    use crate::domain::catalog::{MaintenanceProgram, MaintenanceTrigger};
    use crate::domain::metrics::Baseline;
    use crate::domain::types::TriggerType;
    use crate::repository::catalog_repo::MaintenanceCatalogRepository;

    fn setup() -> (MaintenanceScheduleRepository, MaintenanceTrigger) {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        ensure_schema(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));

        let catalog = MaintenanceCatalogRepository::new(conn.clone());
        let program = MaintenanceProgram::new("STD".into(), "通用".into(), None, true);
        catalog.insert_program(&program).unwrap();
        let trigger = MaintenanceTrigger::new(
            program.program_id.clone(),
            "FH-50".into(),
            "50小时检".into(),
            TriggerType::FlightHours,
            50.0,
            5.0,
            true,
            None,
        );
        catalog.insert_trigger(&trigger).unwrap();

        (MaintenanceScheduleRepository::new(conn), trigger)
    }

    fn schedule(trigger: &MaintenanceTrigger, aircraft: &str) -> MaintenanceSchedule {
        MaintenanceSchedule::initialize(aircraft, trigger, Baseline::Value { value: 0.0 }, Utc::now())
            .unwrap()
    }

    #[test]
    fn test_insert_and_find_round_trip() {
        let (repo, trigger) = setup();
        let s = schedule(&trigger, "UAV-1");
        repo.insert_batch(&[s.clone()]).unwrap();

        let loaded = repo.find_by_id(&s.schedule_id).unwrap().unwrap();
        assert_eq!(loaded.due_at_value, Some(50.0));
        assert_eq!(loaded.status, ScheduleStatus::Pending);
        assert_eq!(loaded.revision, 0);
    }

    #[test]
    fn test_unique_active_pair() {
        let (repo, trigger) = setup();
        repo.insert_batch(&[schedule(&trigger, "UAV-1")]).unwrap();

        let dup = repo.insert_batch(&[schedule(&trigger, "UAV-1")]);
        assert!(matches!(dup, Err(RepositoryError::UniqueConstraintViolation(_))));

        // 停用后可重新建立
        repo.deactivate_by_aircraft("UAV-1").unwrap();
        repo.insert_batch(&[schedule(&trigger, "UAV-1")]).unwrap();
    }

    #[test]
    fn test_batch_insert_is_atomic() {
        let (repo, trigger) = setup();
        let a = schedule(&trigger, "UAV-1");
        let b = schedule(&trigger, "UAV-1");
        assert!(repo.insert_batch(&[a, b]).is_err());
        assert!(repo.find_active_by_aircraft("UAV-1").unwrap().is_empty());
    }

    #[test]
    fn test_stale_revision_is_rejected() {
        let (repo, trigger) = setup();
        let s = schedule(&trigger, "UAV-1");
        repo.insert_batch(&[s.clone()]).unwrap();

        let mut first = s.clone();
        first.status = ScheduleStatus::Due;
        assert_eq!(repo.update_with_revision(&first).unwrap(), 1);

        let mut stale = s.clone();
        stale.status = ScheduleStatus::Overdue;
        match repo.update_with_revision(&stale) {
            Err(RepositoryError::OptimisticLockFailure { expected, actual, .. }) => {
                assert_eq!(expected, 0);
                assert_eq!(actual, 1);
            }
            other => panic!("expected optimistic lock failure, got {:?}", other),
        }

        let loaded = repo.find_by_id(&s.schedule_id).unwrap().unwrap();
        assert_eq!(loaded.status, ScheduleStatus::Due);
    }

    #[test]
    fn test_count_by_status_has_all_keys() {
        let (repo, trigger) = setup();
        repo.insert_batch(&[schedule(&trigger, "UAV-1"), schedule(&trigger, "UAV-2")])
            .unwrap();

        let counts = repo.count_by_status().unwrap();
        assert_eq!(counts[&ScheduleStatus::Pending], 2);
        assert_eq!(counts[&ScheduleStatus::Due], 0);
        assert_eq!(counts[&ScheduleStatus::Overdue], 0);
        assert_eq!(counts[&ScheduleStatus::Completed], 0);
    }

    #[test]
    fn test_work_order_candidates_exclude_linked() {
        let (repo, trigger) = setup();
        let mut a = schedule(&trigger, "UAV-1");
        a.status = ScheduleStatus::Due;
        let mut b = schedule(&trigger, "UAV-2");
        b.status = ScheduleStatus::Overdue;
        b.linked_work_order_id = Some("WO-9".into());
        let mut c = schedule(&trigger, "UAV-3");
        c.status = ScheduleStatus::Overdue;
        repo.insert_batch(&[a.clone(), b, c.clone()]).unwrap();

        let ids: Vec<String> = repo
            .find_work_order_candidates()
            .unwrap()
            .into_iter()
            .map(|s| s.schedule_id)
            .collect();
        assert_eq!(ids, vec![c.schedule_id, a.schedule_id]);
    }
}
