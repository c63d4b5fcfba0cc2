// ==========================================
// 无人机机队维护调度系统 - 维护计划初始化
// ==========================================
// 职责: 为机体按适用的触发条件创建维护计划（每个触发条件一条）
// 基准:
// - 使用量类: 初始化时刻的当前读数
// - 日历类: 投运日期；未登记投运日期时取指标快照日期
// 红线: 单机原子（全部创建或全部回滚）；重复调用只补齐缺失的计划
// ==========================================

use crate::domain::metrics::Baseline;
use crate::domain::schedule::MaintenanceSchedule;
use crate::engine::collaborators::{
    call_with_timeout, AircraftRegistry, MetricProvider, TriggerCatalog,
};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::schedule_store::ScheduleStore;
use crate::repository::error::RepositoryError;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// 初始化结果
#[derive(Debug, Clone, Serialize)]
pub struct InitializeResult {
    pub created: usize,
    pub schedules: Vec<MaintenanceSchedule>,
}

// ==========================================
// ScheduleInitializer - 计划初始化器
// ==========================================
pub struct ScheduleInitializer {
    store: Arc<ScheduleStore>,
    registry: Arc<dyn AircraftRegistry>,
    catalog: Arc<dyn TriggerCatalog>,
    metrics: Arc<dyn MetricProvider>,
    collaborator_timeout: Duration,
}

impl ScheduleInitializer {
    pub fn new(
        store: Arc<ScheduleStore>,
        registry: Arc<dyn AircraftRegistry>,
        catalog: Arc<dyn TriggerCatalog>,
        metrics: Arc<dyn MetricProvider>,
        collaborator_timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            catalog,
            metrics,
            collaborator_timeout,
        }
    }

    /// 初始化机体的维护计划
    ///
    /// # 返回
    /// - Err(NotFound): 机体未知或已退役
    /// - Err(InvalidState): 触发条件配置错误
    /// - Err(ConcurrencyConflict): 并发初始化同一机体
    #[instrument(skip(self))]
    pub async fn initialize_aircraft(&self, aircraft_id: &str) -> EngineResult<InitializeResult> {
        let timeout = self.collaborator_timeout;

        let aircraft = call_with_timeout(
            &format!("GetAircraft({})", aircraft_id),
            timeout,
            self.registry.get_aircraft(aircraft_id),
        )
        .await?;

        let triggers = call_with_timeout(
            &format!("GetActiveTriggers({})", aircraft.model),
            timeout,
            self.catalog.get_active_triggers(&aircraft.model),
        )
        .await?;

        let existing = self.store.active_trigger_ids(aircraft_id)?;
        let mut seen: HashSet<&str> = HashSet::new();
        let pending: Vec<_> = triggers
            .iter()
            .filter(|t| !existing.contains(&t.trigger_id))
            .filter(|t| seen.insert(t.trigger_id.as_str()))
            .collect();

        if pending.is_empty() {
            tracing::debug!(aircraft_id = aircraft_id, "维护计划已齐全");
            return Ok(InitializeResult {
                created: 0,
                schedules: Vec::new(),
            });
        }

        let metrics = call_with_timeout(
            &format!("GetCurrentMetrics({})", aircraft_id),
            timeout,
            self.metrics.get_current_metrics(aircraft_id),
        )
        .await?;

        let now = Utc::now();
        let mut schedules = Vec::with_capacity(pending.len());
        for trigger in pending {
            trigger.validate().map_err(EngineError::InvalidState)?;

            let baseline = match trigger.trigger_type.metric_kind() {
                Some(kind) => Baseline::Value {
                    value: metrics.value_of(kind),
                },
                None => Baseline::Date {
                    date: aircraft.commissioned_on.unwrap_or_else(|| metrics.as_of_date()),
                },
            };

            let schedule = MaintenanceSchedule::initialize(aircraft_id, trigger, baseline, now)
                .map_err(EngineError::InvalidState)?;
            schedules.push(schedule);
        }

        match self.store.create_all(&schedules) {
            Ok(_) => {}
            Err(EngineError::Repository(RepositoryError::UniqueConstraintViolation(msg))) => {
                tracing::warn!(aircraft_id = aircraft_id, "并发初始化冲突: {}", msg);
                return Err(EngineError::ConcurrencyConflict {
                    entity: "MaintenanceSchedule".to_string(),
                    id: aircraft_id.to_string(),
                });
            }
            Err(e) => return Err(e),
        }

        tracing::info!(
            aircraft_id = aircraft_id,
            model = %aircraft.model,
            created = schedules.len(),
            "维护计划初始化完成"
        );

        Ok(InitializeResult {
            created: schedules.len(),
            schedules,
        })
    }
}
