// ==========================================
// 无人机机队维护调度系统 - 维护计划评估引擎
// ==========================================
// 职责: 计划 + 指标快照 → 剩余余量 + 状态 + 告警层级
// 输入: 维护计划 + 触发条件 + 使用量快照（显式传入，不读取当前时间）
// 输出: Evaluation（含可解释 reason JSON）
// 红线: 纯函数，无副作用；只在触发条件声明的单位内比较
// ==========================================

use crate::domain::catalog::MaintenanceTrigger;
use crate::domain::metrics::{AircraftMetrics, DuePoint, MetricValue, Remaining};
use crate::domain::schedule::MaintenanceSchedule;
use crate::domain::types::{AlertType, ScheduleStatus};
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::json;

// ==========================================
// Evaluation - 评估结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub schedule_id: String,
    pub remaining: Remaining,
    pub status: ScheduleStatus,         // 由余量推导的持久化状态
    pub alert_tier: Option<AlertType>,  // 告警投影（不落库）
    pub due: DuePoint,
    pub current_value: Option<MetricValue>, // 使用量类: 当前读数
    pub current_date: NaiveDate,            // 快照日期
    pub reason: String,
}

// ==========================================
// MaintenanceEvaluator - 评估引擎
// ==========================================
/// 无状态引擎，持久化由调用方处理
#[derive(Debug, Default, Clone, Copy)]
pub struct MaintenanceEvaluator;

impl MaintenanceEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// 评估单条计划
    ///
    /// # 规则（先匹配先生效）
    /// - remaining < 0 → OVERDUE / 告警 OVERDUE
    /// - remaining == 0 → DUE / 告警 DUE
    /// - 0 < remaining <= warning_threshold → PENDING / 告警 WARNING
    /// - 否则 → PENDING / 无告警
    ///
    /// # 返回
    /// - Err: 计划与触发条件不匹配或到期点不变量被破坏
    pub fn evaluate(
        &self,
        schedule: &MaintenanceSchedule,
        trigger: &MaintenanceTrigger,
        metrics: &AircraftMetrics,
    ) -> Result<Evaluation, String> {
        if schedule.trigger_id != trigger.trigger_id {
            return Err(format!(
                "触发条件不匹配: schedule={} trigger={}",
                schedule.trigger_id, trigger.trigger_id
            ));
        }
        if schedule.aircraft_id != metrics.aircraft_id {
            return Err(format!(
                "指标快照不属于该机体: schedule.aircraft_id={} metrics.aircraft_id={}",
                schedule.aircraft_id, metrics.aircraft_id
            ));
        }

        let due = schedule.due_point(trigger.trigger_type)?;
        let current_date = metrics.as_of_date();

        let (remaining, current_value) = match due {
            DuePoint::Calendar { date } => {
                let days = (date - current_date).num_days();
                (Remaining::Days { days }, None)
            }
            DuePoint::Metric { metric } => {
                let current = metrics.metric(metric.kind);
                let remaining = Remaining::Metric {
                    metric: MetricValue::new(metric.kind, metric.value - current.value),
                };
                (remaining, Some(current))
            }
        };

        let (status, alert_tier) = classify(remaining.magnitude(), trigger.warning_threshold);
        let reason = build_reason(trigger, &remaining, status, alert_tier);

        Ok(Evaluation {
            schedule_id: schedule.schedule_id.clone(),
            remaining,
            status,
            alert_tier,
            due,
            current_value,
            current_date,
            reason,
        })
    }
}

/// 按余量与预警阈值分类
pub fn classify(remaining: f64, warning_threshold: f64) -> (ScheduleStatus, Option<AlertType>) {
    if remaining < 0.0 {
        (ScheduleStatus::Overdue, Some(AlertType::Overdue))
    } else if remaining == 0.0 {
        (ScheduleStatus::Due, Some(AlertType::Due))
    } else if remaining <= warning_threshold {
        (ScheduleStatus::Pending, Some(AlertType::Warning))
    } else {
        (ScheduleStatus::Pending, None)
    }
}

fn build_reason(
    trigger: &MaintenanceTrigger,
    remaining: &Remaining,
    status: ScheduleStatus,
    alert_tier: Option<AlertType>,
) -> String {
    let unit = trigger
        .trigger_type
        .metric_kind()
        .map(|k| k.unit_label())
        .unwrap_or("天");

    json!({
        "trigger_code": trigger.code,
        "trigger_type": trigger.trigger_type.to_db_str(),
        "remaining": remaining.magnitude(),
        "unit": unit,
        "warning_threshold": trigger.warning_threshold,
        "status": status.to_db_str(),
        "alert_tier": alert_tier.map(|t| t.to_string()),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::metrics::Baseline;
    use crate::domain::types::{MetricKind, TriggerType};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn trigger(trigger_type: TriggerType, interval: f64, warning: f64) -> MaintenanceTrigger {
        MaintenanceTrigger::new(
            "P1".into(),
            "T-1".into(),
            "测试项".into(),
            trigger_type,
            interval,
            warning,
            true,
            None,
        )
    }

    fn metrics(hours: f64, as_of: DateTime<Utc>) -> AircraftMetrics {
        AircraftMetrics {
            aircraft_id: "UAV-1".into(),
            flight_hours: hours,
            flight_cycles: 0.0,
            battery_cycles: 0.0,
            as_of,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_flight_hours_progression() {
        let t = trigger(TriggerType::FlightHours, 50.0, 5.0);
        let s = MaintenanceSchedule::initialize("UAV-1", &t, Baseline::Value { value: 0.0 }, now())
            .unwrap();
        let engine = MaintenanceEvaluator::new();

        let cases = [
            (44.0, 6.0, ScheduleStatus::Pending, None),
            (45.0, 5.0, ScheduleStatus::Pending, Some(AlertType::Warning)),
            (46.0, 4.0, ScheduleStatus::Pending, Some(AlertType::Warning)),
            (50.0, 0.0, ScheduleStatus::Due, Some(AlertType::Due)),
            (52.0, -2.0, ScheduleStatus::Overdue, Some(AlertType::Overdue)),
        ];

        for (hours, remaining, status, tier) in cases {
            let e = engine.evaluate(&s, &t, &metrics(hours, now())).unwrap();
            assert_eq!(e.remaining.metric_value(), Some(remaining), "hours={}", hours);
            assert_eq!(e.status, status, "hours={}", hours);
            assert_eq!(e.alert_tier, tier, "hours={}", hours);
            assert_eq!(e.current_value.map(|v| v.kind), Some(MetricKind::FlightHours));
        }
    }

    #[test]
    fn test_calendar_overdue_from_commissioning() {
        let t = trigger(TriggerType::CalendarDays, 180.0, 14.0);
        let commissioned = now().date_naive() - Duration::days(200);
        let s = MaintenanceSchedule::initialize(
            "UAV-1",
            &t,
            Baseline::Date { date: commissioned },
            now(),
        )
        .unwrap();

        let e = MaintenanceEvaluator::new()
            .evaluate(&s, &t, &metrics(0.0, now()))
            .unwrap();
        assert_eq!(e.remaining.days(), Some(-20));
        assert_eq!(e.status, ScheduleStatus::Overdue);
        assert_eq!(e.alert_tier, Some(AlertType::Overdue));
        assert!(e.current_value.is_none());
    }

    #[test]
    fn test_calendar_due_today_is_due_not_overdue() {
        let t = trigger(TriggerType::CalendarDays, 30.0, 7.0);
        let s = MaintenanceSchedule::initialize(
            "UAV-1",
            &t,
            Baseline::Date {
                date: now().date_naive() - Duration::days(30),
            },
            now(),
        )
        .unwrap();

        // 当天任意时刻都按整天计算
        let late = Utc.with_ymd_and_hms(2026, 5, 1, 23, 59, 0).unwrap();
        let e = MaintenanceEvaluator::new()
            .evaluate(&s, &t, &metrics(0.0, late))
            .unwrap();
        assert_eq!(e.remaining.days(), Some(0));
        assert_eq!(e.status, ScheduleStatus::Due);
    }

    #[test]
    fn test_evaluate_is_deterministic() {
        let t = trigger(TriggerType::FlightHours, 50.0, 5.0);
        let s = MaintenanceSchedule::initialize("UAV-1", &t, Baseline::Value { value: 0.0 }, now())
            .unwrap();
        let m = metrics(47.5, now());
        let engine = MaintenanceEvaluator::new();
        assert_eq!(engine.evaluate(&s, &t, &m), engine.evaluate(&s, &t, &m));
        assert!(engine.evaluate(&s, &t, &m).unwrap().reason.contains("WARNING"));
    }

    #[test]
    fn test_mismatched_inputs_rejected() {
        let t = trigger(TriggerType::FlightHours, 50.0, 5.0);
        let s = MaintenanceSchedule::initialize("UAV-1", &t, Baseline::Value { value: 0.0 }, now())
            .unwrap();
        let mut other = t.clone();
        other.trigger_id = "other".into();
        let engine = MaintenanceEvaluator::new();
        assert!(engine.evaluate(&s, &other, &metrics(1.0, now())).is_err());

        let mut m = metrics(1.0, now());
        m.aircraft_id = "UAV-2".into();
        assert!(engine.evaluate(&s, &t, &m).is_err());
    }
}
