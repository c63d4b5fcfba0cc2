// ==========================================
// 无人机机队维护调度系统 - 领域类型定义
// ==========================================
// 红线: 不同计量单位（小时/起落/电池循环/天）之间不做换算
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 计量类型 (Metric Kind)
// ==========================================
// 机队使用量指标，由 MetricProvider 提供
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricKind {
    FlightHours,   // 飞行小时
    FlightCycles,  // 起落循环
    BatteryCycles, // 电池循环
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl MetricKind {
    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            MetricKind::FlightHours => "FLIGHT_HOURS",
            MetricKind::FlightCycles => "FLIGHT_CYCLES",
            MetricKind::BatteryCycles => "BATTERY_CYCLES",
        }
    }

    /// 单位标签（用于可解释性输出）
    pub fn unit_label(&self) -> &'static str {
        match self {
            MetricKind::FlightHours => "h",
            MetricKind::FlightCycles => "cycles",
            MetricKind::BatteryCycles => "battery_cycles",
        }
    }
}

// ==========================================
// 触发类型 (Trigger Type)
// ==========================================
// 日历天数 或 三种使用量指标之一
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    CalendarDays,  // 日历天数
    FlightHours,   // 飞行小时
    FlightCycles,  // 起落循环
    BatteryCycles, // 电池循环
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl TriggerType {
    /// 从字符串解析触发类型
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "CALENDAR_DAYS" => Some(TriggerType::CalendarDays),
            "FLIGHT_HOURS" => Some(TriggerType::FlightHours),
            "FLIGHT_CYCLES" => Some(TriggerType::FlightCycles),
            "BATTERY_CYCLES" => Some(TriggerType::BatteryCycles),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            TriggerType::CalendarDays => "CALENDAR_DAYS",
            TriggerType::FlightHours => "FLIGHT_HOURS",
            TriggerType::FlightCycles => "FLIGHT_CYCLES",
            TriggerType::BatteryCycles => "BATTERY_CYCLES",
        }
    }

    /// 对应的使用量指标（日历类返回 None）
    pub fn metric_kind(&self) -> Option<MetricKind> {
        match self {
            TriggerType::CalendarDays => None,
            TriggerType::FlightHours => Some(MetricKind::FlightHours),
            TriggerType::FlightCycles => Some(MetricKind::FlightCycles),
            TriggerType::BatteryCycles => Some(MetricKind::BatteryCycles),
        }
    }

    /// 是否为日历类触发
    pub fn is_calendar(&self) -> bool {
        matches!(self, TriggerType::CalendarDays)
    }
}

// ==========================================
// 维护计划状态 (Schedule Status)
// ==========================================
// 状态机: PENDING → DUE → OVERDUE (未处理期间单调前进)
// COMPLETED 只能由完工处理进入
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleStatus {
    Pending,   // 未到期
    Due,       // 到期
    Overdue,   // 超期
    Completed, // 已完成（非循环项终态）
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl ScheduleStatus {
    /// 从字符串解析状态
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(ScheduleStatus::Pending),
            "DUE" => Some(ScheduleStatus::Due),
            "OVERDUE" => Some(ScheduleStatus::Overdue),
            "COMPLETED" => Some(ScheduleStatus::Completed),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Pending => "PENDING",
            ScheduleStatus::Due => "DUE",
            ScheduleStatus::Overdue => "OVERDUE",
            ScheduleStatus::Completed => "COMPLETED",
        }
    }

    /// 未处理期间的推进等级（COMPLETED 不参与）
    fn urgency_rank(&self) -> Option<u8> {
        match self {
            ScheduleStatus::Pending => Some(0),
            ScheduleStatus::Due => Some(1),
            ScheduleStatus::Overdue => Some(2),
            ScheduleStatus::Completed => None,
        }
    }

    /// 重新评估能否把状态从 self 推进到 next
    ///
    /// 只允许前进 (PENDING → DUE → OVERDUE)；保持与回退均返回 false，
    /// 进出 COMPLETED 不属于评估的职责。
    pub fn can_advance_to(&self, next: ScheduleStatus) -> bool {
        match (self.urgency_rank(), next.urgency_rank()) {
            (Some(current), Some(target)) => target > current,
            _ => false,
        }
    }

    /// 是否需要生成工单
    pub fn needs_work_order(&self) -> bool {
        matches!(self, ScheduleStatus::Due | ScheduleStatus::Overdue)
    }

    /// 全部状态（用于统计）
    pub fn all() -> [ScheduleStatus; 4] {
        [
            ScheduleStatus::Pending,
            ScheduleStatus::Due,
            ScheduleStatus::Overdue,
            ScheduleStatus::Completed,
        ]
    }
}

// ==========================================
// 告警等级 (Alert Type)
// ==========================================
// 只存在于告警投影中，不落库
// WARNING 比持久化状态多出的一档
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    Warning, // 预警
    Due,     // 到期
    Overdue, // 超期
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertType::Warning => write!(f, "WARNING"),
            AlertType::Due => write!(f, "DUE"),
            AlertType::Overdue => write!(f, "OVERDUE"),
        }
    }
}

impl AlertType {
    /// 从字符串解析告警等级
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "WARNING" => Some(AlertType::Warning),
            "DUE" => Some(AlertType::Due),
            "OVERDUE" => Some(AlertType::Overdue),
            _ => None,
        }
    }

    /// 排序优先级（越小越紧急）
    pub fn priority(&self) -> u8 {
        match self {
            AlertType::Overdue => 0,
            AlertType::Due => 1,
            AlertType::Warning => 2,
        }
    }
}

// ==========================================
// 完工来源 (Completion Source)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionSource {
    WorkOrder, // 工单关闭回调
    Manual,    // 人工登记完工
}

impl CompletionSource {
    pub fn from_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "WORK_ORDER" => CompletionSource::WorkOrder,
            _ => CompletionSource::Manual,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            CompletionSource::WorkOrder => "WORK_ORDER",
            CompletionSource::Manual => "MANUAL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_only_advances_forward() {
        assert!(ScheduleStatus::Pending.can_advance_to(ScheduleStatus::Due));
        assert!(ScheduleStatus::Pending.can_advance_to(ScheduleStatus::Overdue));
        assert!(ScheduleStatus::Due.can_advance_to(ScheduleStatus::Overdue));

        assert!(!ScheduleStatus::Due.can_advance_to(ScheduleStatus::Due));
        assert!(!ScheduleStatus::Overdue.can_advance_to(ScheduleStatus::Pending));
        assert!(!ScheduleStatus::Due.can_advance_to(ScheduleStatus::Pending));
        assert!(!ScheduleStatus::Completed.can_advance_to(ScheduleStatus::Due));
        assert!(!ScheduleStatus::Pending.can_advance_to(ScheduleStatus::Completed));
    }

    #[test]
    fn test_trigger_type_round_trip_db_str() {
        for t in [
            TriggerType::CalendarDays,
            TriggerType::FlightHours,
            TriggerType::FlightCycles,
            TriggerType::BatteryCycles,
        ] {
            assert_eq!(TriggerType::from_str(t.to_db_str()), Some(t));
        }
        assert_eq!(TriggerType::from_str("ENGINE_STARTS"), None);
    }

    #[test]
    fn test_trigger_metric_kind() {
        assert_eq!(TriggerType::CalendarDays.metric_kind(), None);
        assert_eq!(
            TriggerType::BatteryCycles.metric_kind(),
            Some(MetricKind::BatteryCycles)
        );
    }

    #[test]
    fn test_alert_priority_order() {
        assert!(AlertType::Overdue.priority() < AlertType::Due.priority());
        assert!(AlertType::Due.priority() < AlertType::Warning.priority());
    }
}
