// ==========================================
// 无人机机队维护调度系统 - 机队指标领域模型
// ==========================================
// 职责: 使用量快照、带单位的数值、到期点、剩余余量
// 红线: 数值永远携带单位标签，不存在“裸 f64”的跨单位比较
// ==========================================

use crate::domain::types::MetricKind;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// Aircraft - 机体（协作方视图）
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aircraft {
    pub aircraft_id: String,
    pub model: String,                      // 机型
    pub commissioned_on: Option<NaiveDate>, // 投入使用日期
    pub is_active: bool,
}

// ==========================================
// AircraftMetrics - 使用量快照
// ==========================================
// 由 MetricProvider 提供；评估时显式传入，不读取任何全局状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AircraftMetrics {
    pub aircraft_id: String,
    pub flight_hours: f64,
    pub flight_cycles: f64,
    pub battery_cycles: f64,
    pub as_of: DateTime<Utc>, // 快照时间（同时作为日历评估的“今天”）
}

impl AircraftMetrics {
    /// 读取指定指标
    pub fn value_of(&self, kind: MetricKind) -> f64 {
        match kind {
            MetricKind::FlightHours => self.flight_hours,
            MetricKind::FlightCycles => self.flight_cycles,
            MetricKind::BatteryCycles => self.battery_cycles,
        }
    }

    /// 读取指定指标（带单位）
    pub fn metric(&self, kind: MetricKind) -> MetricValue {
        MetricValue::new(kind, self.value_of(kind))
    }

    /// 快照日期
    pub fn as_of_date(&self) -> NaiveDate {
        self.as_of.date_naive()
    }
}

// ==========================================
// MetricValue - 带单位的数值
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    pub kind: MetricKind,
    pub value: f64,
}

impl MetricValue {
    pub fn new(kind: MetricKind, value: f64) -> Self {
        Self { kind, value }
    }
}

// ==========================================
// DuePoint - 到期点
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DuePoint {
    Calendar { date: NaiveDate },
    Metric { metric: MetricValue },
}

impl DuePoint {
    /// 拆成落库的 (due_at_date, due_at_value)，两者恰有一个为 Some
    pub fn into_columns(self) -> (Option<NaiveDate>, Option<f64>) {
        match self {
            DuePoint::Calendar { date } => (Some(date), None),
            DuePoint::Metric { metric } => (None, Some(metric.value)),
        }
    }

    /// 判断 self 是否严格晚于 other（单位不一致时返回 false）
    pub fn is_later_than(&self, other: &DuePoint) -> bool {
        match (self, other) {
            (DuePoint::Calendar { date: a }, DuePoint::Calendar { date: b }) => a > b,
            (DuePoint::Metric { metric: a }, DuePoint::Metric { metric: b }) => {
                a.kind == b.kind && a.value > b.value
            }
            _ => false,
        }
    }
}

// ==========================================
// Remaining - 剩余余量
// ==========================================
// 日历: 整天数（可为负）；使用量: 触发条件原生单位（可为负）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Remaining {
    Days { days: i64 },
    Metric { metric: MetricValue },
}

impl Remaining {
    /// 与同单位阈值比较时使用的数值
    pub fn magnitude(&self) -> f64 {
        match self {
            Remaining::Days { days } => *days as f64,
            Remaining::Metric { metric } => metric.value,
        }
    }

    pub fn days(&self) -> Option<i64> {
        match self {
            Remaining::Days { days } => Some(*days),
            Remaining::Metric { .. } => None,
        }
    }

    pub fn metric_value(&self) -> Option<f64> {
        match self {
            Remaining::Days { .. } => None,
            Remaining::Metric { metric } => Some(metric.value),
        }
    }
}

// ==========================================
// Baseline - 计算到期点的基准
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Baseline {
    Date { date: NaiveDate },
    Value { value: f64 },
}
