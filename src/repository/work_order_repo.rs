// ==========================================
// 无人机机队维护调度系统 - 工单数据仓储
// ==========================================
// 职责: work_order 表的读写
// 适配: 实现 WorkOrderService；工单关闭时通知已订阅的监听者
// ==========================================

use crate::domain::metrics::AircraftMetrics;
use crate::domain::work_order::{WorkOrder, WorkOrderClosed, WorkOrderStatus, WorkOrderTask};
use crate::engine::collaborators::{
    CollaboratorError, CollaboratorResult, WorkOrderClosedListener, WorkOrderService,
};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{format_timestamp, int_to_bool, parse_enum, parse_timestamp};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const WORK_ORDER_COLUMNS: &str = r#"
    work_order_id, aircraft_id, schedule_id, title, task_json,
    auto_assign, status, created_at, closed_at
"#;

// ==========================================
// WorkOrderRepository - 工单仓储
// ==========================================
pub struct WorkOrderRepository {
    conn: Arc<Mutex<Connection>>,
    listeners: Mutex<Vec<Arc<dyn WorkOrderClosedListener>>>,
}

impl WorkOrderRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            conn,
            listeners: Mutex::new(Vec::new()),
        }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 写入一张新工单
    pub fn insert(
        &self,
        aircraft_id: &str,
        schedule_id: Option<&str>,
        task: &WorkOrderTask,
    ) -> RepositoryResult<String> {
        let work_order_id = format!("WO-{}", Uuid::new_v4());
        let task_json = serde_json::to_string(task).map_err(|e| RepositoryError::FieldValueError {
            field: "task_json".to_string(),
            message: e.to_string(),
        })?;

        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO work_order (
                work_order_id, aircraft_id, schedule_id, title, task_json,
                auto_assign, status, created_at, closed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL)
            "#,
            params![
                work_order_id,
                aircraft_id,
                schedule_id,
                task.title,
                task_json,
                task.auto_assign,
                WorkOrderStatus::Open.to_db_str(),
                format_timestamp(Utc::now()),
            ],
        )?;

        Ok(work_order_id)
    }

    /// 关闭/放行工单并通知监听者
    ///
    /// # 参数
    /// - closed_at_metrics: 关闭时机体的使用量（作为下一周期基准）
    ///
    /// # 返回
    /// - Err(NotFound): 工单不存在
    /// - Err(FieldValueError): 工单已关闭
    pub async fn close(
        &self,
        work_order_id: &str,
        closed_at_metrics: AircraftMetrics,
    ) -> RepositoryResult<WorkOrderClosed> {
        let aircraft_id = {
            let conn = self.get_conn()?;
            let rows = conn.execute(
                r#"
                UPDATE work_order
                   SET status = ?1, closed_at = ?2,
                       closed_flight_hours = ?3, closed_flight_cycles = ?4, closed_battery_cycles = ?5
                 WHERE work_order_id = ?6 AND status = ?7
                "#,
                params![
                    WorkOrderStatus::Closed.to_db_str(),
                    format_timestamp(closed_at_metrics.as_of),
                    closed_at_metrics.flight_hours,
                    closed_at_metrics.flight_cycles,
                    closed_at_metrics.battery_cycles,
                    work_order_id,
                    WorkOrderStatus::Open.to_db_str(),
                ],
            )?;

            let aircraft_id: Option<String> = conn
                .query_row(
                    "SELECT aircraft_id FROM work_order WHERE work_order_id = ?1",
                    params![work_order_id],
                    |row| row.get(0),
                )
                .optional()?;

            match (rows, aircraft_id) {
                (_, None) => return Err(RepositoryError::not_found("WorkOrder", work_order_id)),
                (0, Some(_)) => {
                    return Err(RepositoryError::FieldValueError {
                        field: "status".to_string(),
                        message: format!("工单 {} 已关闭", work_order_id),
                    })
                }
                (_, Some(id)) => id,
            }
        };

        let event = WorkOrderClosed {
            work_order_id: work_order_id.to_string(),
            aircraft_id,
            closed_at_metrics,
        };

        let listeners: Vec<Arc<dyn WorkOrderClosedListener>> = self
            .listeners
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?
            .clone();

        tracing::info!(
            work_order_id = %event.work_order_id,
            aircraft_id = %event.aircraft_id,
            listeners = listeners.len(),
            "工单已关闭"
        );

        for listener in listeners {
            listener.on_work_order_closed(event.clone()).await;
        }

        Ok(event)
    }

    /// 按ID查询工单
    pub fn find_by_id(&self, work_order_id: &str) -> RepositoryResult<Option<WorkOrder>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM work_order WHERE work_order_id = ?1",
            WORK_ORDER_COLUMNS
        );
        let wo = conn
            .query_row(&sql, params![work_order_id], map_work_order_row)
            .optional()?;
        Ok(wo)
    }

    /// 读取已关闭工单的关闭事件（按关闭时写入的读数重建）
    ///
    /// # 返回
    /// - Ok(None): 工单仍未关闭
    /// - Err(NotFound): 工单不存在
    pub fn find_closed_event(&self, work_order_id: &str) -> RepositoryResult<Option<WorkOrderClosed>> {
        let conn = self.get_conn()?;
        let row = conn
            .query_row(
                r#"
                SELECT aircraft_id, status, closed_at,
                       closed_flight_hours, closed_flight_cycles, closed_battery_cycles
                  FROM work_order
                 WHERE work_order_id = ?1
                "#,
                params![work_order_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<f64>>(3)?,
                        row.get::<_, Option<f64>>(4)?,
                        row.get::<_, Option<f64>>(5)?,
                    ))
                },
            )
            .optional()?;

        let (aircraft_id, status, closed_at, hours, cycles, battery) =
            row.ok_or_else(|| RepositoryError::not_found("WorkOrder", work_order_id))?;
        if status != WorkOrderStatus::Closed.to_db_str() {
            return Ok(None);
        }

        match (closed_at, hours, cycles, battery) {
            (Some(closed_at), Some(flight_hours), Some(flight_cycles), Some(battery_cycles)) => {
                Ok(Some(WorkOrderClosed {
                    work_order_id: work_order_id.to_string(),
                    aircraft_id: aircraft_id.clone(),
                    closed_at_metrics: AircraftMetrics {
                        aircraft_id,
                        flight_hours,
                        flight_cycles,
                        battery_cycles,
                        as_of: parse_timestamp(2, &closed_at)?,
                    },
                }))
            }
            _ => Err(RepositoryError::FieldValueError {
                field: "closed_flight_hours".to_string(),
                message: format!("工单 {} 已关闭但缺少关闭读数", work_order_id),
            }),
        }
    }

    /// 查询计划名下最早创建的未关闭工单
    pub fn find_open_by_schedule(&self, schedule_id: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let id = conn
            .query_row(
                r#"
                SELECT work_order_id FROM work_order
                 WHERE schedule_id = ?1 AND status = ?2
                 ORDER BY created_at ASC, work_order_id ASC
                 LIMIT 1
                "#,
                params![schedule_id, WorkOrderStatus::Open.to_db_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// 查询计划关联的全部工单
    pub fn list_by_schedule(&self, schedule_id: &str) -> RepositoryResult<Vec<WorkOrder>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM work_order WHERE schedule_id = ?1 ORDER BY created_at ASC",
            WORK_ORDER_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let list = stmt
            .query_map(params![schedule_id], map_work_order_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(list)
    }

    /// 统计工单数量
    pub fn count_all(&self) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row("SELECT COUNT(*) FROM work_order", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[async_trait]
impl WorkOrderService for WorkOrderRepository {
    async fn create(
        &self,
        aircraft_id: &str,
        schedule_id: &str,
        task: &WorkOrderTask,
    ) -> CollaboratorResult<String> {
        self.insert(aircraft_id, Some(schedule_id), task)
            .map_err(|e| CollaboratorError::Unavailable(e.to_string()))
    }

    async fn get_closed(&self, work_order_id: &str) -> CollaboratorResult<Option<WorkOrderClosed>> {
        self.find_closed_event(work_order_id).map_err(|e| match e {
            RepositoryError::NotFound { entity, id } => CollaboratorError::NotFound { entity, id },
            other => CollaboratorError::Unavailable(other.to_string()),
        })
    }

    async fn find_open(&self, schedule_id: &str) -> CollaboratorResult<Option<String>> {
        self.find_open_by_schedule(schedule_id)
            .map_err(|e| CollaboratorError::Unavailable(e.to_string()))
    }

    fn subscribe_closed(&self, listener: Arc<dyn WorkOrderClosedListener>) {
        match self.listeners.lock() {
            Ok(mut guard) => guard.push(listener),
            Err(e) => tracing::error!("工单监听者注册失败: {}", e),
        }
    }
}

fn map_work_order_row(row: &Row<'_>) -> SqliteResult<WorkOrder> {
    let task_json: String = row.get(4)?;
    let task: WorkOrderTask = serde_json::from_str(&task_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(WorkOrder {
        work_order_id: row.get(0)?,
        aircraft_id: row.get(1)?,
        schedule_id: row.get(2)?,
        title: row.get(3)?,
        task,
        auto_assign: int_to_bool(row.get(5)?),
        status: parse_enum(6, &row.get::<_, String>(6)?, WorkOrderStatus::from_str)?,
        created_at: parse_timestamp(7, &row.get::<_, String>(7)?)?,
        closed_at: row
            .get::<_, Option<String>>(8)?
            .map(|s| parse_timestamp(8, &s))
            .transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ensure_schema;
    use crate::domain::types::{ScheduleStatus, TriggerType};

    struct Recorder(Mutex<Vec<String>>);

    #[async_trait]
    impl WorkOrderClosedListener for Recorder {
        async fn on_work_order_closed(&self, event: WorkOrderClosed) {
            self.0.lock().unwrap().push(event.work_order_id);
        }
    }

    fn task() -> WorkOrderTask {
        WorkOrderTask {
            title: "[DUE] FH-50 - 50小时检".into(),
            trigger_id: "T1".into(),
            trigger_code: "FH-50".into(),
            trigger_name: "50小时检".into(),
            trigger_type: TriggerType::FlightHours,
            program_code: Some("STD".into()),
            interval_value: 50.0,
            due_at_date: None,
            due_at_value: Some(50.0),
            schedule_status: ScheduleStatus::Due,
            tasks: vec!["检查桨叶".into()],
            auto_assign: false,
        }
    }

    fn metrics() -> AircraftMetrics {
        AircraftMetrics {
            aircraft_id: "UAV-1".into(),
            flight_hours: 53.0,
            flight_cycles: 0.0,
            battery_cycles: 0.0,
            as_of: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_then_close_notifies_listener() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        let repo = WorkOrderRepository::new(Arc::new(Mutex::new(conn)));
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        repo.subscribe_closed(recorder.clone());

        let id = repo.create("UAV-1", "S1", &task()).await.unwrap();
        let wo = repo.find_by_id(&id).unwrap().unwrap();
        assert_eq!(wo.status, WorkOrderStatus::Open);
        assert!(repo.get_closed(&id).await.unwrap().is_none());
        assert_eq!(repo.find_open("S1").await.unwrap(), Some(id.clone()));
        assert_eq!(wo.task.tasks, vec!["检查桨叶"]);

        let event = repo.close(&id, metrics()).await.unwrap();
        assert_eq!(event.aircraft_id, "UAV-1");
        assert_eq!(recorder.0.lock().unwrap().as_slice(), &[id.clone()]);

        let replay = repo.get_closed(&id).await.unwrap().expect("closed event kept");
        assert_eq!(replay.closed_at_metrics.flight_hours, 53.0);
        assert_eq!(replay.aircraft_id, "UAV-1");

        // 重复关闭被拒绝，且不再通知
        assert!(repo.close(&id, metrics()).await.is_err());
        assert_eq!(recorder.0.lock().unwrap().len(), 1);
        assert!(matches!(
            repo.close("WO-404", metrics()).await,
            Err(RepositoryError::NotFound { .. })
        ));
        assert!(repo.find_open("S1").await.unwrap().is_none());
        assert!(matches!(
            repo.get_closed("WO-404").await,
            Err(CollaboratorError::NotFound { .. })
        ));
    }
}
