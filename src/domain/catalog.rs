// ==========================================
// 无人机机队维护调度系统 - 维护大纲领域模型
// ==========================================
// 职责: MaintenanceProgram / MaintenanceTrigger 定义与校验
// 红线: warning_threshold < interval_value，创建时拒绝，不做截断
// ==========================================

use crate::domain::metrics::{Baseline, DuePoint, MetricValue};
use crate::domain::types::TriggerType;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 适用全部机型的通配符
pub const WILDCARD_MODEL: &str = "*";

// ==========================================
// MaintenanceProgram - 维护大纲
// ==========================================
// 停用而不删除
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceProgram {
    pub program_id: String,
    pub code: String,           // 唯一编码
    pub name: String,
    pub aircraft_model: String, // 适用机型 ("*" 表示全部)
    pub is_default: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MaintenanceProgram {
    pub fn new(code: String, name: String, aircraft_model: Option<String>, is_default: bool) -> Self {
        let now = Utc::now();
        Self {
            program_id: Uuid::new_v4().to_string(),
            code,
            name,
            aircraft_model: aircraft_model
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| WILDCARD_MODEL.to_string()),
            is_default,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// 判断大纲是否适用于指定机型
    pub fn applies_to(&self, model: &str) -> bool {
        self.aircraft_model == WILDCARD_MODEL || self.aircraft_model.eq_ignore_ascii_case(model)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.code.trim().is_empty() {
            return Err("维护大纲编码不能为空".to_string());
        }
        if self.name.trim().is_empty() {
            return Err("维护大纲名称不能为空".to_string());
        }
        Ok(())
    }
}

// ==========================================
// MaintenanceTrigger - 触发条件
// ==========================================
// 对齐: maintenance_trigger 表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceTrigger {
    pub trigger_id: String,
    pub program_id: String,
    pub code: String,
    pub name: String,
    pub description: Option<String>,

    // ===== 间隔定义 (同一单位) =====
    pub trigger_type: TriggerType,
    pub interval_value: f64,    // 间隔 (天 或 指标单位)
    pub warning_threshold: f64, // 预警余量 (同单位)
    pub recurring: bool,        // 完工后是否进入下一周期

    pub task_template: Option<String>, // 工单作业内容
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MaintenanceTrigger {
    /// 创建新的触发条件（未校验，调用方需执行 validate）
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        program_id: String,
        code: String,
        name: String,
        trigger_type: TriggerType,
        interval_value: f64,
        warning_threshold: f64,
        recurring: bool,
        task_template: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            trigger_id: Uuid::new_v4().to_string(),
            program_id,
            code,
            name,
            description: None,
            trigger_type,
            interval_value,
            warning_threshold,
            recurring,
            task_template,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// 校验触发条件配置
    ///
    /// # 规则
    /// - interval_value > 0, warning_threshold > 0
    /// - warning_threshold < interval_value
    /// - 日历类的间隔与阈值必须是整天
    pub fn validate(&self) -> Result<(), String> {
        if self.code.trim().is_empty() {
            return Err("触发条件编码不能为空".to_string());
        }
        if !self.interval_value.is_finite() || self.interval_value <= 0.0 {
            return Err(format!(
                "触发条件 {} 的间隔必须为正数: interval_value={}",
                self.code, self.interval_value
            ));
        }
        if !self.warning_threshold.is_finite() || self.warning_threshold <= 0.0 {
            return Err(format!(
                "触发条件 {} 的预警余量必须为正数: warning_threshold={}",
                self.code, self.warning_threshold
            ));
        }
        if self.warning_threshold >= self.interval_value {
            return Err(format!(
                "触发条件 {} 的预警余量必须小于间隔: warning_threshold={} interval_value={}",
                self.code, self.warning_threshold, self.interval_value
            ));
        }
        if self.trigger_type.is_calendar()
            && (self.interval_value.fract() != 0.0 || self.warning_threshold.fract() != 0.0)
        {
            return Err(format!(
                "日历类触发条件 {} 的间隔与预警余量必须为整天",
                self.code
            ));
        }
        Ok(())
    }

    /// 由基准计算到期点
    ///
    /// # 规则
    /// - 日历: due_at_date = baseline_date + interval_value 天
    /// - 使用量: due_at_value = baseline_value + interval_value
    ///
    /// 基准类型与触发类型不匹配时返回 Err
    pub fn due_point_from(&self, baseline: Baseline) -> Result<DuePoint, String> {
        match (self.trigger_type.metric_kind(), baseline) {
            (None, Baseline::Date { date }) => {
                let due = date
                    .checked_add_signed(Duration::days(self.interval_value as i64))
                    .ok_or_else(|| format!("到期日期溢出: baseline={}", date))?;
                Ok(DuePoint::Calendar { date: due })
            }
            (Some(kind), Baseline::Value { value }) => Ok(DuePoint::Metric {
                metric: MetricValue::new(kind, value + self.interval_value),
            }),
            (_, baseline) => Err(format!(
                "基准类型与触发类型不匹配: trigger={} type={} baseline={:?}",
                self.code, self.trigger_type, baseline
            )),
        }
    }
}
