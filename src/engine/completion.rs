// ==========================================
// 无人机机队维护调度系统 - 完工处理
// ==========================================
// 职责: 工单关闭 / 人工登记 → 以完工时读数为新基准推进到下一周期
// 说明: 这是把计划从 DUE/OVERDUE 带回 PENDING（或终态 COMPLETED）的唯一路径
// 红线: 未关联计划的工单直接忽略；每次完工追加一条完工履历
// 补偿: 关闭回调失败时计划仍关联该工单，由调度运行开头的对账补登
// ==========================================

use crate::domain::schedule::CompletionInput;
use crate::domain::types::CompletionSource;
use crate::domain::work_order::WorkOrderClosed;
use crate::engine::collaborators::{
    call_with_timeout, MetricProvider, TriggerCatalog, WorkOrderClosedListener, WorkOrderService,
};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::schedule_store::{CompletedSchedule, ScheduleStore};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

// ==========================================
// CompletionHandler - 完工处理器
// ==========================================
pub struct CompletionHandler {
    store: Arc<ScheduleStore>,
    catalog: Arc<dyn TriggerCatalog>,
    metrics: Arc<dyn MetricProvider>,
    work_orders: Arc<dyn WorkOrderService>,
    collaborator_timeout: Duration,
}

impl CompletionHandler {
    pub fn new(
        store: Arc<ScheduleStore>,
        catalog: Arc<dyn TriggerCatalog>,
        metrics: Arc<dyn MetricProvider>,
        work_orders: Arc<dyn WorkOrderService>,
        collaborator_timeout: Duration,
    ) -> Self {
        Self {
            store,
            catalog,
            metrics,
            work_orders,
            collaborator_timeout,
        }
    }

    /// 处理工单关闭事件
    ///
    /// # 返回
    /// - Ok(None): 工单未关联任何计划，或已由其他路径登记（忽略）
    /// - Ok(Some(_)): 计划已推进到下一周期
    #[instrument(skip(self, event), fields(work_order_id = %event.work_order_id))]
    pub async fn handle_work_order_closed(
        &self,
        event: &WorkOrderClosed,
    ) -> EngineResult<Option<CompletedSchedule>> {
        let schedule = match self.store.find_by_linked_work_order(&event.work_order_id)? {
            Some(s) => s,
            None => {
                tracing::debug!("工单未关联维护计划，忽略");
                return Ok(None);
            }
        };

        if schedule.aircraft_id != event.aircraft_id {
            return Err(EngineError::InvalidState(format!(
                "工单 {} 的机体 {} 与计划 {} 的机体 {} 不一致",
                event.work_order_id, event.aircraft_id, schedule.schedule_id, schedule.aircraft_id
            )));
        }

        let trigger = self.load_trigger(&schedule.trigger_id).await?;
        let input = CompletionInput {
            completed_at: event.closed_at_metrics.as_of,
            completed_at_value: trigger
                .trigger_type
                .metric_kind()
                .map(|kind| event.closed_at_metrics.value_of(kind)),
        };

        let completed = match self.store.complete_linked(
            &schedule.schedule_id,
            &event.work_order_id,
            &trigger,
            input,
        )? {
            Some(c) => c,
            None => {
                tracing::debug!(schedule_id = %schedule.schedule_id, "计划已不再关联该工单，忽略");
                return Ok(None);
            }
        };

        tracing::info!(
            schedule_id = %completed.schedule.schedule_id,
            aircraft_id = %completed.schedule.aircraft_id,
            new_status = %completed.outcome.new_status,
            "工单关闭，计划进入下一周期"
        );
        Ok(Some(completed))
    }

    /// 补登已关闭但未完工的工单
    ///
    /// 扫描仍关联工单的有效计划，向工单服务查询关闭事件后重放。
    /// 单条失败只记日志，留待下一轮。
    ///
    /// # 返回
    /// - 本轮补登成功的计划数
    #[instrument(skip(self, cancel))]
    pub async fn reconcile_closed_work_orders(&self, cancel: &CancellationToken) -> EngineResult<usize> {
        let linked = self.store.linked_active()?;
        let mut reconciled = 0;

        for schedule in linked {
            if cancel.is_cancelled() {
                break;
            }
            let Some(work_order_id) = schedule.linked_work_order_id.clone() else {
                continue;
            };

            let label = format!("GetClosed({})", work_order_id);
            let event = match call_with_timeout(
                &label,
                self.collaborator_timeout,
                self.work_orders.get_closed(&work_order_id),
            )
            .await
            {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(
                        schedule_id = %schedule.schedule_id,
                        work_order_id = %work_order_id,
                        "工单状态查询失败: {}",
                        e
                    );
                    continue;
                }
            };

            match self.handle_work_order_closed(&event).await {
                Ok(Some(_)) => reconciled += 1,
                Ok(None) => {}
                Err(e) => tracing::warn!(
                    schedule_id = %schedule.schedule_id,
                    work_order_id = %work_order_id,
                    "补登工单完工失败: {}",
                    e
                ),
            }
        }

        if reconciled > 0 {
            tracing::info!(reconciled, "已补登关闭工单的完工");
        }
        Ok(reconciled)
    }

    /// 人工登记完工
    ///
    /// # 参数
    /// - completed_at_value: 使用量类读数；为空时读取机体当前指标
    #[instrument(skip(self))]
    pub async fn complete_manually(
        &self,
        schedule_id: &str,
        completed_at_value: Option<f64>,
    ) -> EngineResult<CompletedSchedule> {
        let schedule = self.store.get(schedule_id)?;
        if !schedule.is_active {
            return Err(EngineError::InvalidState(format!(
                "维护计划 {} 已停用，不能登记完工",
                schedule_id
            )));
        }
        if schedule.is_terminal() {
            return Err(EngineError::InvalidState(format!(
                "维护计划 {} 已是终态 COMPLETED",
                schedule_id
            )));
        }

        let trigger = self.load_trigger(&schedule.trigger_id).await?;
        let completed_at = Utc::now();

        let completed_at_value = match (trigger.trigger_type.metric_kind(), completed_at_value) {
            (None, _) => None,
            (Some(_), Some(value)) => Some(value),
            (Some(kind), None) => {
                let label = format!("GetCurrentMetrics({})", schedule.aircraft_id);
                let metrics = call_with_timeout(
                    &label,
                    self.collaborator_timeout,
                    self.metrics.get_current_metrics(&schedule.aircraft_id),
                )
                .await?;
                Some(metrics.value_of(kind))
            }
        };

        let input = CompletionInput {
            completed_at,
            completed_at_value,
        };
        let completed = self
            .store
            .complete(schedule_id, &trigger, input, CompletionSource::Manual)?;

        tracing::info!(
            schedule_id = schedule_id,
            new_status = %completed.outcome.new_status,
            "人工登记完工"
        );
        Ok(completed)
    }

    async fn load_trigger(
        &self,
        trigger_id: &str,
    ) -> EngineResult<crate::domain::catalog::MaintenanceTrigger> {
        let label = format!("GetTrigger({})", trigger_id);
        Ok(call_with_timeout(&label, self.collaborator_timeout, self.catalog.get_trigger(trigger_id)).await?)
    }
}

#[async_trait]
impl WorkOrderClosedListener for CompletionHandler {
    async fn on_work_order_closed(&self, event: WorkOrderClosed) {
        if let Err(e) = self.handle_work_order_closed(&event).await {
            tracing::error!(
                work_order_id = %event.work_order_id,
                aircraft_id = %event.aircraft_id,
                "工单关闭回调处理失败: {}",
                e
            );
        }
    }
}
