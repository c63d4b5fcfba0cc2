// ==========================================
// 无人机机队维护调度系统 - 调度运行引擎
// ==========================================
// 职责: 重新评估全部有效计划，推进状态，输出运行摘要
// 流程:
// 1. 补登已关闭工单的完工（关闭回调失败时的补偿）
// 2. 读取有效计划（跳过非循环项终态）
// 3. 每架机拉取一次指标（并发 + 限时）
// 4. 逐条评估；状态前进时 CAS 写入
// 5. 计划之间检查取消信号
// 红线: 单条失败不影响整批；协作方超时的计划本轮跳过、不写入
// ==========================================

use crate::domain::catalog::MaintenanceTrigger;
use crate::domain::metrics::AircraftMetrics;
use crate::domain::schedule::MaintenanceSchedule;
use crate::domain::types::AlertType;
use crate::engine::collaborators::{
    fetch_metrics_batch, fetch_triggers_batch, trigger_ids, CollaboratorError, CollaboratorResult,
    MetricProvider, TriggerCatalog,
};
use crate::engine::completion::CompletionHandler;
use crate::engine::error::EngineResult;
use crate::engine::evaluator::{Evaluation, MaintenanceEvaluator};
use crate::engine::schedule_store::{ScheduleStore, StatusUpdate};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

// ==========================================
// RunSummary - 运行摘要
// ==========================================
#[derive(Debug, Clone, Default, Serialize)]
pub struct ItemFailure {
    pub schedule_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub processed: usize, // 完成评估的计划数
    pub updated: usize,   // 实际写入的状态变更数
    pub warnings: usize,  // 告警层级计数（按评估结果，与是否写入无关）
    pub due: usize,
    pub overdue: usize,
    pub skipped: usize, // 本轮未评估（协作方失败、机体不存在、取消）
    pub reconciled: usize, // 补登完工的已关闭工单数
    pub failures: Vec<ItemFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
}

impl RunSummary {
    fn start(started_at: DateTime<Utc>) -> Self {
        Self {
            processed: 0,
            updated: 0,
            warnings: 0,
            due: 0,
            overdue: 0,
            skipped: 0,
            reconciled: 0,
            failures: Vec::new(),
            started_at,
            finished_at: started_at,
            cancelled: false,
        }
    }

    fn count_tier(&mut self, tier: Option<AlertType>) {
        match tier {
            Some(AlertType::Warning) => self.warnings += 1,
            Some(AlertType::Due) => self.due += 1,
            Some(AlertType::Overdue) => self.overdue += 1,
            None => {}
        }
    }

    fn skip(&mut self, schedule_id: &str, reason: String) {
        self.skipped += 1;
        self.failures.push(ItemFailure {
            schedule_id: schedule_id.to_string(),
            reason,
        });
    }
}

// ==========================================
// SchedulerRunner - 调度运行引擎
// ==========================================
pub struct SchedulerRunner {
    store: Arc<ScheduleStore>,
    catalog: Arc<dyn TriggerCatalog>,
    metrics: Arc<dyn MetricProvider>,
    completion: Arc<CompletionHandler>,
    evaluator: MaintenanceEvaluator,
    collaborator_timeout: Duration,
}

impl SchedulerRunner {
    pub fn new(
        store: Arc<ScheduleStore>,
        catalog: Arc<dyn TriggerCatalog>,
        metrics: Arc<dyn MetricProvider>,
        completion: Arc<CompletionHandler>,
        collaborator_timeout: Duration,
    ) -> Self {
        Self {
            store,
            catalog,
            metrics,
            completion,
            evaluator: MaintenanceEvaluator::new(),
            collaborator_timeout,
        }
    }

    /// 执行一轮调度
    ///
    /// 可随时重复执行；输入不变时第二轮 updated = 0
    #[instrument(skip(self, cancel))]
    pub async fn run(&self, cancel: &CancellationToken) -> EngineResult<RunSummary> {
        let now = Utc::now();
        let mut summary = RunSummary::start(now);

        summary.reconciled = self.completion.reconcile_closed_work_orders(cancel).await?;

        let schedules: Vec<MaintenanceSchedule> = self
            .store
            .list_active()?
            .into_iter()
            .filter(|s| !s.is_terminal())
            .collect();

        if cancel.is_cancelled() {
            summary.skipped = schedules.len();
            summary.cancelled = true;
            summary.finished_at = Utc::now();
            tracing::info!(skipped = summary.skipped, "调度运行开始前已取消");
            return Ok(summary);
        }

        let aircraft_ids: BTreeSet<String> =
            schedules.iter().map(|s| s.aircraft_id.clone()).collect();
        let metrics = fetch_metrics_batch(&self.metrics, aircraft_ids, self.collaborator_timeout).await;
        let triggers = fetch_triggers_batch(
            &self.catalog,
            trigger_ids(&schedules),
            self.collaborator_timeout,
        )
        .await;

        let total = schedules.len();
        for (index, schedule) in schedules.into_iter().enumerate() {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                summary.skipped += total - index;
                tracing::info!(remaining = total - index, "调度运行已取消");
                break;
            }
            self.process_one(schedule, &metrics, &triggers, &mut summary);
        }

        summary.finished_at = Utc::now();
        tracing::info!(
            processed = summary.processed,
            updated = summary.updated,
            warnings = summary.warnings,
            due = summary.due,
            overdue = summary.overdue,
            skipped = summary.skipped,
            reconciled = summary.reconciled,
            cancelled = summary.cancelled,
            "调度运行完成"
        );
        Ok(summary)
    }

    fn process_one(
        &self,
        schedule: MaintenanceSchedule,
        metrics: &HashMap<String, CollaboratorResult<AircraftMetrics>>,
        triggers: &HashMap<String, CollaboratorResult<MaintenanceTrigger>>,
        summary: &mut RunSummary,
    ) {
        let schedule_id = schedule.schedule_id.clone();

        let aircraft_metrics = match metrics.get(&schedule.aircraft_id) {
            Some(Ok(m)) => m,
            Some(Err(CollaboratorError::NotFound { .. })) => {
                tracing::debug!(
                    schedule_id = %schedule_id,
                    aircraft_id = %schedule.aircraft_id,
                    "机体不存在或已退役，跳过"
                );
                summary.skip(&schedule_id, format!("机体 {} 不存在或已退役", schedule.aircraft_id));
                return;
            }
            Some(Err(e)) => {
                tracing::warn!(schedule_id = %schedule_id, aircraft_id = %schedule.aircraft_id, "指标获取失败，本轮跳过: {}", e);
                summary.skip(&schedule_id, e.to_string());
                return;
            }
            None => {
                summary.skip(&schedule_id, "指标缺失".to_string());
                return;
            }
        };

        let trigger = match triggers.get(&schedule.trigger_id) {
            Some(Ok(t)) => t,
            Some(Err(e)) => {
                tracing::warn!(schedule_id = %schedule_id, trigger_id = %schedule.trigger_id, "触发条件读取失败，本轮跳过: {}", e);
                summary.skip(&schedule_id, e.to_string());
                return;
            }
            None => {
                summary.skip(&schedule_id, "触发条件缺失".to_string());
                return;
            }
        };

        let evaluation: Evaluation = match self.evaluator.evaluate(&schedule, trigger, aircraft_metrics) {
            Ok(e) => e,
            Err(reason) => {
                tracing::warn!(schedule_id = %schedule_id, "评估失败: {}", reason);
                summary.skip(&schedule_id, reason);
                return;
            }
        };

        summary.processed += 1;
        summary.count_tier(evaluation.alert_tier);
        tracing::debug!(schedule_id = %schedule_id, reason = %evaluation.reason, "计划评估完成");

        if !schedule.status.can_advance_to(evaluation.status) {
            return;
        }

        match self
            .store
            .update_status(schedule, trigger.trigger_type, evaluation.status, Utc::now())
        {
            Ok(StatusUpdate::Updated { from, to }) => {
                summary.updated += 1;
                tracing::info!(schedule_id = %schedule_id, from = %from, to = %to, "计划状态已推进");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(schedule_id = %schedule_id, "状态写入失败: {}", e);
                summary.failures.push(ItemFailure {
                    schedule_id,
                    reason: e.to_string(),
                });
            }
        }
    }
}
