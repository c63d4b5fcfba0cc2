// ==========================================
// 无人机机队维护调度系统 - 工单领域模型
// ==========================================
// 工单本身由 WorkOrderService 管理，这里只定义交互载荷
// ==========================================

use crate::domain::catalog::MaintenanceTrigger;
use crate::domain::metrics::AircraftMetrics;
use crate::domain::schedule::MaintenanceSchedule;
use crate::domain::types::{ScheduleStatus, TriggerType};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// WorkOrderTask - 工单作业模板
// ==========================================
// 由触发条件派生，发送给 WorkOrderService.create
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkOrderTask {
    pub title: String,
    pub trigger_id: String,
    pub trigger_code: String,
    pub trigger_name: String,
    pub trigger_type: TriggerType,
    pub program_code: Option<String>,
    pub interval_value: f64,
    pub due_at_date: Option<NaiveDate>,
    pub due_at_value: Option<f64>,
    pub schedule_status: ScheduleStatus,
    pub tasks: Vec<String>, // 作业步骤
    pub auto_assign: bool,
}

impl WorkOrderTask {
    /// 由计划与触发条件生成作业模板
    ///
    /// 作业步骤取自 task_template（按行拆分），为空时使用触发条件名称
    pub fn from_schedule(
        schedule: &MaintenanceSchedule,
        trigger: &MaintenanceTrigger,
        auto_assign: bool,
    ) -> Self {
        let tasks: Vec<String> = trigger
            .task_template
            .as_deref()
            .map(|t| {
                t.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let tasks = if tasks.is_empty() {
            vec![trigger.name.clone()]
        } else {
            tasks
        };

        Self {
            title: format!("[{}] {} - {}", schedule.status, trigger.code, trigger.name),
            trigger_id: trigger.trigger_id.clone(),
            trigger_code: trigger.code.clone(),
            trigger_name: trigger.name.clone(),
            trigger_type: trigger.trigger_type,
            program_code: None,
            interval_value: trigger.interval_value,
            due_at_date: schedule.due_at_date,
            due_at_value: schedule.due_at_value,
            schedule_status: schedule.status,
            tasks,
            auto_assign,
        }
    }

    /// 附加所属大纲代码
    pub fn with_program_code(mut self, program_code: impl Into<String>) -> Self {
        self.program_code = Some(program_code.into());
        self
    }
}

// ==========================================
// WorkOrder - 本地工单记录
// ==========================================
// 对齐: work_order 表（SQLite 工单适配器）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkOrderStatus {
    Open,
    Closed,
}

impl WorkOrderStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "OPEN" => Some(WorkOrderStatus::Open),
            "CLOSED" => Some(WorkOrderStatus::Closed),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            WorkOrderStatus::Open => "OPEN",
            WorkOrderStatus::Closed => "CLOSED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkOrder {
    pub work_order_id: String,
    pub aircraft_id: String,
    pub schedule_id: Option<String>,
    pub title: String,
    pub task: WorkOrderTask,
    pub auto_assign: bool,
    pub status: WorkOrderStatus,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

// ==========================================
// WorkOrderClosed - 工单关闭通知
// ==========================================
// 由 WorkOrderService 在工单关闭/放行时发出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkOrderClosed {
    pub work_order_id: String,
    pub aircraft_id: String,
    pub closed_at_metrics: AircraftMetrics,
}
