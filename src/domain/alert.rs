// ==========================================
// 无人机机队维护调度系统 - 维护告警领域模型
// ==========================================
// 告警是评估结果的投影，不落库
// ==========================================

use crate::domain::types::{AlertType, TriggerType};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ==========================================
// Alert - 维护告警
// ==========================================
// 剩余量与到期点按触发类型二选一填写
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub schedule_id: String,
    pub trigger_id: String,
    pub aircraft_id: String,
    pub alert_type: AlertType,

    // ===== 触发条件信息 =====
    pub trigger_code: String,
    pub trigger_name: String,
    pub trigger_type: TriggerType,

    // ===== 余量 (二选一) =====
    pub remaining_value: Option<f64>,
    pub remaining_days: Option<i64>,

    // ===== 当前值 =====
    pub current_value: Option<f64>,      // 使用量类: 当前读数
    pub current_date: Option<NaiveDate>, // 日历类: 评估日期

    // ===== 到期点 (二选一) =====
    pub due_at_value: Option<f64>,
    pub due_at_date: Option<NaiveDate>,

    pub linked_work_order_id: Option<String>,
}

impl Alert {
    /// 排序用的剩余量（同一告警等级内比较）
    pub fn remaining_magnitude(&self) -> f64 {
        self.remaining_days
            .map(|d| d as f64)
            .or(self.remaining_value)
            .unwrap_or(0.0)
    }
}

// ==========================================
// AlertFilter - 告警查询条件
// ==========================================
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertFilter {
    pub aircraft_id: Option<String>,
    pub types: Option<Vec<AlertType>>, // None 表示全部
    pub limit: Option<usize>,          // None 表示使用配置默认值
}

impl AlertFilter {
    /// 判断告警等级是否在筛选范围内
    pub fn accepts(&self, alert_type: AlertType) -> bool {
        match &self.types {
            Some(types) if !types.is_empty() => types.contains(&alert_type),
            _ => true,
        }
    }
}
