// ==========================================
// 无人机机队维护调度系统 - 机队数据仓储
// ==========================================
// 职责: aircraft 表的读写
// 适配: 实现 MetricProvider / AircraftRegistry，供本地部署与测试使用
// ==========================================

use crate::domain::metrics::{Aircraft, AircraftMetrics};
use crate::engine::collaborators::{
    AircraftRegistry, CollaboratorError, CollaboratorResult, MetricProvider,
};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{format_date, format_timestamp, int_to_bool, parse_date, parse_timestamp};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

const AIRCRAFT_COLUMNS: &str = r#"
    aircraft_id, model, commissioned_on, is_active,
    flight_hours, flight_cycles, battery_cycles, metrics_as_of
"#;

// ==========================================
// FleetRepository - 机队仓储
// ==========================================
pub struct FleetRepository {
    conn: Arc<Mutex<Connection>>,
}

impl FleetRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 登记机体（已存在则覆盖机型、投运日期与指标）
    pub fn upsert_aircraft(
        &self,
        aircraft: &Aircraft,
        metrics: &AircraftMetrics,
    ) -> RepositoryResult<()> {
        if aircraft.aircraft_id != metrics.aircraft_id {
            return Err(RepositoryError::FieldValueError {
                field: "aircraft_id".to_string(),
                message: format!(
                    "机体与指标不一致: {} vs {}",
                    aircraft.aircraft_id, metrics.aircraft_id
                ),
            });
        }

        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO aircraft (
                aircraft_id, model, commissioned_on, is_active,
                flight_hours, flight_cycles, battery_cycles, metrics_as_of
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(aircraft_id) DO UPDATE SET
                model = excluded.model,
                commissioned_on = excluded.commissioned_on,
                is_active = excluded.is_active,
                flight_hours = excluded.flight_hours,
                flight_cycles = excluded.flight_cycles,
                battery_cycles = excluded.battery_cycles,
                metrics_as_of = excluded.metrics_as_of
            "#,
            params![
                aircraft.aircraft_id,
                aircraft.model,
                aircraft.commissioned_on.map(format_date),
                aircraft.is_active,
                metrics.flight_hours,
                metrics.flight_cycles,
                metrics.battery_cycles,
                format_timestamp(metrics.as_of),
            ],
        )?;
        Ok(())
    }

    /// 写入最新使用量（飞行日志回传）
    pub fn record_metrics(&self, metrics: &AircraftMetrics) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"
            UPDATE aircraft
               SET flight_hours = ?1, flight_cycles = ?2, battery_cycles = ?3, metrics_as_of = ?4
             WHERE aircraft_id = ?5
            "#,
            params![
                metrics.flight_hours,
                metrics.flight_cycles,
                metrics.battery_cycles,
                format_timestamp(metrics.as_of),
                metrics.aircraft_id,
            ],
        )?;
        if rows == 0 {
            return Err(RepositoryError::not_found("Aircraft", &metrics.aircraft_id));
        }
        Ok(())
    }

    /// 设置机体在役状态
    pub fn set_active(&self, aircraft_id: &str, active: bool) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "UPDATE aircraft SET is_active = ?1 WHERE aircraft_id = ?2",
            params![active, aircraft_id],
        )?;
        if rows == 0 {
            return Err(RepositoryError::not_found("Aircraft", aircraft_id));
        }
        Ok(())
    }

    /// 按ID查询机体与指标
    pub fn find_by_id(
        &self,
        aircraft_id: &str,
    ) -> RepositoryResult<Option<(Aircraft, AircraftMetrics)>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM aircraft WHERE aircraft_id = ?1", AIRCRAFT_COLUMNS);
        let found = conn
            .query_row(&sql, params![aircraft_id], map_aircraft_row)
            .optional()?;
        Ok(found)
    }

    /// 查询在役机体
    pub fn list_active(&self) -> RepositoryResult<Vec<Aircraft>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM aircraft WHERE is_active = 1 ORDER BY aircraft_id",
            AIRCRAFT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let list = stmt
            .query_map([], map_aircraft_row)?
            .map(|r| r.map(|(aircraft, _)| aircraft))
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(list)
    }

    /// 读取在役机体，退役或不存在时返回 NotFound
    fn find_in_service(&self, aircraft_id: &str) -> CollaboratorResult<(Aircraft, AircraftMetrics)> {
        match self.find_by_id(aircraft_id) {
            Ok(Some((aircraft, metrics))) if aircraft.is_active => Ok((aircraft, metrics)),
            Ok(_) => Err(CollaboratorError::not_found("Aircraft", aircraft_id)),
            Err(e) => Err(CollaboratorError::Unavailable(e.to_string())),
        }
    }
}

#[async_trait]
impl MetricProvider for FleetRepository {
    async fn get_current_metrics(&self, aircraft_id: &str) -> CollaboratorResult<AircraftMetrics> {
        self.find_in_service(aircraft_id).map(|(_, metrics)| metrics)
    }
}

#[async_trait]
impl AircraftRegistry for FleetRepository {
    async fn get_aircraft(&self, aircraft_id: &str) -> CollaboratorResult<Aircraft> {
        self.find_in_service(aircraft_id).map(|(aircraft, _)| aircraft)
    }
}

fn map_aircraft_row(row: &Row<'_>) -> SqliteResult<(Aircraft, AircraftMetrics)> {
    let aircraft_id: String = row.get(0)?;
    let aircraft = Aircraft {
        aircraft_id: aircraft_id.clone(),
        model: row.get(1)?,
        commissioned_on: row
            .get::<_, Option<String>>(2)?
            .map(|s| parse_date(2, &s))
            .transpose()?,
        is_active: int_to_bool(row.get(3)?),
    };
    let metrics = AircraftMetrics {
        aircraft_id,
        flight_hours: row.get(4)?,
        flight_cycles: row.get(5)?,
        battery_cycles: row.get(6)?,
        as_of: parse_timestamp(7, &row.get::<_, String>(7)?)?,
    };
    Ok((aircraft, metrics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ensure_schema;
    use chrono::{NaiveDate, Utc};

    fn repo() -> FleetRepository {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        FleetRepository::new(Arc::new(Mutex::new(conn)))
    }

    fn aircraft(id: &str) -> (Aircraft, AircraftMetrics) {
        (
            Aircraft {
                aircraft_id: id.to_string(),
                model: "M300".to_string(),
                commissioned_on: NaiveDate::from_ymd_opt(2025, 1, 1),
                is_active: true,
            },
            AircraftMetrics {
                aircraft_id: id.to_string(),
                flight_hours: 10.0,
                flight_cycles: 20.0,
                battery_cycles: 30.0,
                as_of: Utc::now(),
            },
        )
    }

    #[tokio::test]
    async fn test_metric_provider_reads_latest() {
        let repo = repo();
        let (a, mut m) = aircraft("UAV-1");
        repo.upsert_aircraft(&a, &m).unwrap();

        m.flight_hours = 46.0;
        repo.record_metrics(&m).unwrap();

        let current = repo.get_current_metrics("UAV-1").await.unwrap();
        assert_eq!(current.flight_hours, 46.0);
        assert_eq!(repo.get_aircraft("UAV-1").await.unwrap().model, "M300");
    }

    #[tokio::test]
    async fn test_retired_aircraft_is_not_found() {
        let repo = repo();
        let (a, m) = aircraft("UAV-2");
        repo.upsert_aircraft(&a, &m).unwrap();
        repo.set_active("UAV-2", false).unwrap();

        assert!(matches!(
            repo.get_current_metrics("UAV-2").await,
            Err(CollaboratorError::NotFound { .. })
        ));
        assert!(matches!(
            repo.get_aircraft("UAV-404").await,
            Err(CollaboratorError::NotFound { .. })
        ));
        assert!(repo.list_active().unwrap().is_empty());
    }

    #[test]
    fn test_record_metrics_unknown_aircraft() {
        let (_, m) = aircraft("UAV-404");
        assert!(matches!(
            repo().record_metrics(&m),
            Err(RepositoryError::NotFound { .. })
        ));
    }
}
