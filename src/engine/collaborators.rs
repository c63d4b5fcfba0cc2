// ==========================================
// 无人机机队维护调度系统 - 外部协作方接口
// ==========================================
// 职责: 定义引擎消费的协作方 trait，实现依赖倒置
// 说明: Engine 层定义 trait，Repository 层提供 SQLite 适配器，测试提供替身
// 红线: 所有协作方调用都经 call_with_timeout 限时
// ==========================================

use crate::domain::catalog::{MaintenanceProgram, MaintenanceTrigger};
use crate::domain::metrics::{Aircraft, AircraftMetrics};
use crate::domain::schedule::MaintenanceSchedule;
use crate::domain::work_order::{WorkOrderClosed, WorkOrderTask};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// 单轮中并发拉取指标的上限
pub const METRIC_FETCH_CONCURRENCY: usize = 8;

// ==========================================
// CollaboratorError - 协作方错误
// ==========================================
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollaboratorError {
    #[error("未找到: {entity} id={id}")]
    NotFound { entity: String, id: String },

    #[error("协作方不可用: {0}")]
    Unavailable(String),

    #[error("协作方调用超时: {0}")]
    Timeout(String),
}

impl CollaboratorError {
    pub fn not_found(entity: &str, id: &str) -> Self {
        CollaboratorError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }
}

pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

// ==========================================
// 协作方 Trait
// ==========================================

/// 使用量指标提供方
#[async_trait]
pub trait MetricProvider: Send + Sync {
    /// 读取机体当前指标
    ///
    /// # 返回
    /// - Err(NotFound): 机体未知或已退役
    async fn get_current_metrics(&self, aircraft_id: &str) -> CollaboratorResult<AircraftMetrics>;
}

/// 机体登记簿
#[async_trait]
pub trait AircraftRegistry: Send + Sync {
    async fn get_aircraft(&self, aircraft_id: &str) -> CollaboratorResult<Aircraft>;
}

/// 维护大纲目录
#[async_trait]
pub trait TriggerCatalog: Send + Sync {
    /// 读取适用于机型的有效触发条件
    async fn get_active_triggers(&self, aircraft_model: &str) -> CollaboratorResult<Vec<MaintenanceTrigger>>;

    /// 按ID读取触发条件（含已停用）
    async fn get_trigger(&self, trigger_id: &str) -> CollaboratorResult<MaintenanceTrigger>;

    /// 按ID读取维护大纲（含已停用）
    async fn get_program(&self, program_id: &str) -> CollaboratorResult<MaintenanceProgram>;
}

/// 工单关闭监听者
#[async_trait]
pub trait WorkOrderClosedListener: Send + Sync {
    async fn on_work_order_closed(&self, event: WorkOrderClosed);
}

/// 工单服务
#[async_trait]
pub trait WorkOrderService: Send + Sync {
    /// 创建工单，返回工单ID
    async fn create(
        &self,
        aircraft_id: &str,
        schedule_id: &str,
        task: &WorkOrderTask,
    ) -> CollaboratorResult<String>;

    /// 查询工单关闭事件
    ///
    /// # 返回
    /// - Ok(None): 工单仍未关闭
    /// - Err(NotFound): 工单不存在
    async fn get_closed(&self, work_order_id: &str) -> CollaboratorResult<Option<WorkOrderClosed>>;

    /// 查询计划名下未关闭的工单（创建成功但未能关联时复用）
    async fn find_open(&self, schedule_id: &str) -> CollaboratorResult<Option<String>>;

    /// 订阅工单关闭/放行事件
    fn subscribe_closed(&self, listener: Arc<dyn WorkOrderClosedListener>);
}

// ==========================================
// 调用辅助
// ==========================================

/// 限时调用协作方，超时转为 CollaboratorError::Timeout
pub async fn call_with_timeout<T, F>(label: &str, limit: Duration, fut: F) -> CollaboratorResult<T>
where
    F: Future<Output = CollaboratorResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::Timeout(format!(
            "{} 超过 {}ms",
            label,
            limit.as_millis()
        ))),
    }
}

/// 并发拉取一组机体的指标（每架机一次调用，逐个限时）
pub async fn fetch_metrics_batch<I>(
    provider: &Arc<dyn MetricProvider>,
    aircraft_ids: I,
    limit: Duration,
) -> HashMap<String, CollaboratorResult<AircraftMetrics>>
where
    I: IntoIterator<Item = String>,
{
    stream::iter(aircraft_ids.into_iter().map(|aircraft_id| {
        let provider = Arc::clone(provider);
        async move {
            let label = format!("GetCurrentMetrics({})", aircraft_id);
            let result =
                call_with_timeout(&label, limit, provider.get_current_metrics(&aircraft_id)).await;
            (aircraft_id, result)
        }
    }))
    .buffer_unordered(METRIC_FETCH_CONCURRENCY)
    .collect()
    .await
}

/// 收集计划引用的触发条件ID（去重，保持首次出现顺序）
pub fn trigger_ids(schedules: &[MaintenanceSchedule]) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for schedule in schedules {
        if !ids.contains(&schedule.trigger_id) {
            ids.push(schedule.trigger_id.clone());
        }
    }
    ids
}

/// 逐个读取一组触发条件（每个ID一次，逐个限时）
///
/// 参数取自有ID列表，返回的 future 不借用调用方数据，可在 tokio::spawn 中使用
pub async fn fetch_triggers_batch(
    catalog: &Arc<dyn TriggerCatalog>,
    trigger_ids: Vec<String>,
    limit: Duration,
) -> HashMap<String, CollaboratorResult<MaintenanceTrigger>> {
    let mut triggers = HashMap::new();
    for trigger_id in trigger_ids {
        if triggers.contains_key(&trigger_id) {
            continue;
        }
        let label = format!("GetTrigger({})", trigger_id);
        let result = call_with_timeout(&label, limit, catalog.get_trigger(&trigger_id)).await;
        triggers.insert(trigger_id, result);
    }
    triggers
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    struct SlowProvider;

    #[async_trait]
    impl MetricProvider for SlowProvider {
        async fn get_current_metrics(&self, aircraft_id: &str) -> CollaboratorResult<AircraftMetrics> {
            if aircraft_id == "SLOW" {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            if aircraft_id == "GONE" {
                return Err(CollaboratorError::not_found("Aircraft", aircraft_id));
            }
            Ok(AircraftMetrics {
                aircraft_id: aircraft_id.to_string(),
                flight_hours: 1.0,
                flight_cycles: 1.0,
                battery_cycles: 1.0,
                as_of: Utc::now(),
            })
        }
    }

    #[tokio::test]
    async fn test_fetch_metrics_batch_isolates_failures() {
        let provider: Arc<dyn MetricProvider> = Arc::new(SlowProvider);
        let ids = vec!["UAV-1".to_string(), "SLOW".to_string(), "GONE".to_string()];

        let results = fetch_metrics_batch(&provider, ids, Duration::from_millis(50)).await;

        assert_eq!(results.len(), 3);
        assert!(results["UAV-1"].is_ok());
        assert!(matches!(results["SLOW"], Err(CollaboratorError::Timeout(_))));
        assert!(matches!(results["GONE"], Err(CollaboratorError::NotFound { .. })));
    }
}
