// ==========================================
// 无人机机队维护调度系统 - 完工履历领域模型
// ==========================================
// 红线: 只追加，不修改；每次完工一条
// 用途: 计划基准被重置后仍可追溯历次完工
// ==========================================

use crate::domain::schedule::{CompletionOutcome, MaintenanceSchedule};
use crate::domain::types::CompletionSource;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==========================================
// ComplianceRecord - 完工履历
// ==========================================
// 对齐: compliance_record 表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceRecord {
    pub record_id: String,
    pub schedule_id: String,
    pub aircraft_id: String,
    pub trigger_id: String,
    pub work_order_id: Option<String>,
    pub source: CompletionSource,

    pub completed_at: DateTime<Utc>,
    pub completed_at_value: Option<f64>,

    // ===== 到期点变化 =====
    pub previous_due_date: Option<NaiveDate>,
    pub previous_due_value: Option<f64>,
    pub new_due_date: Option<NaiveDate>,
    pub new_due_value: Option<f64>,

    pub created_at: DateTime<Utc>,
}

impl ComplianceRecord {
    /// 由完工后的计划与完工结果生成履历
    pub fn from_completion(
        schedule: &MaintenanceSchedule,
        outcome: &CompletionOutcome,
        source: CompletionSource,
    ) -> Self {
        let (previous_due_date, previous_due_value) = outcome.previous_due.into_columns();
        let (new_due_date, new_due_value) = outcome.new_due.into_columns();

        Self {
            record_id: Uuid::new_v4().to_string(),
            schedule_id: schedule.schedule_id.clone(),
            aircraft_id: schedule.aircraft_id.clone(),
            trigger_id: schedule.trigger_id.clone(),
            work_order_id: outcome.released_work_order_id.clone(),
            source,
            completed_at: schedule.last_completed_at.unwrap_or_else(Utc::now),
            completed_at_value: schedule.last_completed_at_value,
            previous_due_date,
            previous_due_value,
            new_due_date,
            new_due_value,
            created_at: Utc::now(),
        }
    }
}
