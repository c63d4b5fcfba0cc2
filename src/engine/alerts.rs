// ==========================================
// 无人机机队维护调度系统 - 维护告警聚合
// ==========================================
// 职责: 把评估结果投影为可筛选、可排序的告警列表
// 排序: OVERDUE（最负在前）→ DUE → WARNING（余量最小在前），同余量按计划ID
// 红线: 告警等级取自评估层级，不取持久化状态；告警不落库
// ==========================================

use crate::domain::alert::{Alert, AlertFilter};
use crate::domain::catalog::MaintenanceTrigger;
use crate::domain::schedule::MaintenanceSchedule;
use crate::domain::types::AlertType;
use crate::engine::collaborators::{
    fetch_metrics_batch, fetch_triggers_batch, trigger_ids, CollaboratorError, MetricProvider,
    TriggerCatalog,
};
use crate::engine::error::EngineResult;
use crate::engine::evaluator::{Evaluation, MaintenanceEvaluator};
use crate::engine::schedule_store::ScheduleStore;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

// ==========================================
// AlertAggregator - 告警聚合器
// ==========================================
pub struct AlertAggregator {
    store: Arc<ScheduleStore>,
    catalog: Arc<dyn TriggerCatalog>,
    metrics: Arc<dyn MetricProvider>,
    evaluator: MaintenanceEvaluator,
    collaborator_timeout: Duration,
    default_limit: usize,
}

impl AlertAggregator {
    pub fn new(
        store: Arc<ScheduleStore>,
        catalog: Arc<dyn TriggerCatalog>,
        metrics: Arc<dyn MetricProvider>,
        collaborator_timeout: Duration,
        default_limit: usize,
    ) -> Self {
        Self {
            store,
            catalog,
            metrics,
            evaluator: MaintenanceEvaluator::new(),
            collaborator_timeout,
            default_limit,
        }
    }

    /// 查询告警
    ///
    /// # 参数
    /// - filter.aircraft_id: 仅该机体
    /// - filter.types: 仅这些等级（None/空表示全部）
    /// - filter.limit: 排序后截断（None 使用默认上限）
    #[instrument(skip(self), fields(aircraft_id = ?filter.aircraft_id))]
    pub async fn get_alerts(&self, filter: &AlertFilter) -> EngineResult<Vec<Alert>> {
        let schedules: Vec<MaintenanceSchedule> = match &filter.aircraft_id {
            Some(aircraft_id) => self.store.list_active_by_aircraft(aircraft_id)?,
            None => self.store.list_active()?,
        }
        .into_iter()
        .filter(|s| !s.is_terminal())
        .collect();

        let aircraft_ids: BTreeSet<String> =
            schedules.iter().map(|s| s.aircraft_id.clone()).collect();
        let metrics = fetch_metrics_batch(&self.metrics, aircraft_ids, self.collaborator_timeout).await;
        let triggers = fetch_triggers_batch(
            &self.catalog,
            trigger_ids(&schedules),
            self.collaborator_timeout,
        )
        .await;

        let mut alerts = Vec::new();
        for schedule in &schedules {
            let aircraft_metrics = match metrics.get(&schedule.aircraft_id) {
                Some(Ok(m)) => m,
                // 已删除/退役机体静默排除
                Some(Err(CollaboratorError::NotFound { .. })) | None => continue,
                Some(Err(e)) => {
                    tracing::warn!(aircraft_id = %schedule.aircraft_id, "指标获取失败，告警中排除: {}", e);
                    continue;
                }
            };
            let trigger = match triggers.get(&schedule.trigger_id) {
                Some(Ok(t)) => t,
                Some(Err(e)) => {
                    tracing::warn!(trigger_id = %schedule.trigger_id, "触发条件读取失败，告警中排除: {}", e);
                    continue;
                }
                None => continue,
            };

            let evaluation = match self.evaluator.evaluate(schedule, trigger, aircraft_metrics) {
                Ok(e) => e,
                Err(reason) => {
                    tracing::warn!(schedule_id = %schedule.schedule_id, "评估失败: {}", reason);
                    continue;
                }
            };

            if let Some(tier) = evaluation.alert_tier {
                if filter.accepts(tier) {
                    alerts.push(build_alert(schedule, trigger, tier, &evaluation));
                }
            }
        }

        sort_alerts(&mut alerts);
        alerts.truncate(filter.limit.unwrap_or(self.default_limit));

        tracing::debug!(count = alerts.len(), "告警查询完成");
        Ok(alerts)
    }
}

/// 告警排序：等级优先级 → 余量升序 → 计划ID
pub fn sort_alerts(alerts: &mut [Alert]) {
    alerts.sort_by(|a, b| {
        a.alert_type
            .priority()
            .cmp(&b.alert_type.priority())
            .then_with(|| {
                a.remaining_magnitude()
                    .partial_cmp(&b.remaining_magnitude())
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.schedule_id.cmp(&b.schedule_id))
    });
}

fn build_alert(
    schedule: &MaintenanceSchedule,
    trigger: &MaintenanceTrigger,
    alert_type: AlertType,
    evaluation: &Evaluation,
) -> Alert {
    let (due_at_date, due_at_value) = evaluation.due.into_columns();
    let is_calendar = trigger.trigger_type.is_calendar();

    Alert {
        schedule_id: schedule.schedule_id.clone(),
        trigger_id: trigger.trigger_id.clone(),
        aircraft_id: schedule.aircraft_id.clone(),
        alert_type,
        trigger_code: trigger.code.clone(),
        trigger_name: trigger.name.clone(),
        trigger_type: trigger.trigger_type,
        remaining_value: evaluation.remaining.metric_value(),
        remaining_days: evaluation.remaining.days(),
        current_value: evaluation.current_value.map(|v| v.value),
        current_date: is_calendar.then_some(evaluation.current_date),
        due_at_value,
        due_at_date,
        linked_work_order_id: schedule.linked_work_order_id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::TriggerType;

    fn alert(id: &str, alert_type: AlertType, remaining: f64) -> Alert {
        Alert {
            schedule_id: id.to_string(),
            trigger_id: "T".into(),
            aircraft_id: "UAV-1".into(),
            alert_type,
            trigger_code: "T".into(),
            trigger_name: "T".into(),
            trigger_type: TriggerType::FlightHours,
            remaining_value: Some(remaining),
            remaining_days: None,
            current_value: None,
            current_date: None,
            due_at_value: Some(50.0),
            due_at_date: None,
            linked_work_order_id: None,
        }
    }

    #[test]
    fn test_sort_order() {
        let mut alerts = vec![
            alert("w2", AlertType::Warning, 4.0),
            alert("o1", AlertType::Overdue, -1.0),
            alert("d1", AlertType::Due, 0.0),
            alert("w1", AlertType::Warning, 1.0),
            alert("o2", AlertType::Overdue, -30.0),
            alert("d0", AlertType::Due, 0.0),
        ];
        sort_alerts(&mut alerts);
        let ids: Vec<&str> = alerts.iter().map(|a| a.schedule_id.as_str()).collect();
        assert_eq!(ids, vec!["o2", "o1", "d0", "d1", "w1", "w2"]);
    }
}
