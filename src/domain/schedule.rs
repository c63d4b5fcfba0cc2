// ==========================================
// 无人机机队维护调度系统 - 维护计划领域模型
// ==========================================
// 职责: MaintenanceSchedule 实体 + 状态机
// 红线:
// - due_at_date / due_at_value 恰有一个非空，且与触发类型一致
// - 评估只能推进状态，不能回退；回到 PENDING 只能经由完工
// - 每条计划同一时刻最多关联一个未关闭工单
// ==========================================

use crate::domain::catalog::MaintenanceTrigger;
use crate::domain::metrics::{Baseline, DuePoint, MetricValue};
use crate::domain::types::{ScheduleStatus, TriggerType};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==========================================
// MaintenanceSchedule - 维护计划
// ==========================================
// 对齐: maintenance_schedule 表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceSchedule {
    pub schedule_id: String,
    pub aircraft_id: String,
    pub trigger_id: String,
    pub status: ScheduleStatus,

    // ===== 完工履历 (仅完工处理可写) =====
    pub last_completed_at: Option<DateTime<Utc>>,
    pub last_completed_at_value: Option<f64>, // None 表示基准为投运值/投运日期

    // ===== 到期点 (二选一) =====
    pub due_at_date: Option<NaiveDate>,
    pub due_at_value: Option<f64>,

    // ===== 工单关联 =====
    pub linked_work_order_id: Option<String>,
    pub work_order_claim: Option<String>, // 工单生成占位令牌
    pub work_order_claimed_at: Option<DateTime<Utc>>,

    pub is_active: bool,
    pub revision: i64, // 乐观锁版本
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 完工输入
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionInput {
    pub completed_at: DateTime<Utc>,
    pub completed_at_value: Option<f64>, // 使用量类触发必填
}

/// 完工结果（用于履历与日志）
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOutcome {
    pub previous_due: DuePoint,
    pub new_due: DuePoint,
    pub previous_status: ScheduleStatus,
    pub new_status: ScheduleStatus,
    pub released_work_order_id: Option<String>,
}

impl MaintenanceSchedule {
    /// 为 (机体, 触发条件) 创建首个周期的维护计划
    ///
    /// 基准由调用方给出（使用量: 当前指标值；日历: 投运日期或当天）
    pub fn initialize(
        aircraft_id: &str,
        trigger: &MaintenanceTrigger,
        baseline: Baseline,
        now: DateTime<Utc>,
    ) -> Result<Self, String> {
        let due = trigger.due_point_from(baseline)?;
        let (due_at_date, due_at_value) = due.into_columns();

        let schedule = Self {
            schedule_id: Uuid::new_v4().to_string(),
            aircraft_id: aircraft_id.to_string(),
            trigger_id: trigger.trigger_id.clone(),
            status: ScheduleStatus::Pending,
            last_completed_at: None,
            last_completed_at_value: None,
            due_at_date,
            due_at_value,
            linked_work_order_id: None,
            work_order_claim: None,
            work_order_claimed_at: None,
            is_active: true,
            revision: 0,
            created_at: now,
            updated_at: now,
        };
        schedule.check_invariant(trigger.trigger_type)?;
        Ok(schedule)
    }

    /// 校验到期点不变量
    pub fn check_invariant(&self, trigger_type: TriggerType) -> Result<(), String> {
        match (trigger_type.is_calendar(), self.due_at_date, self.due_at_value) {
            (true, Some(_), None) | (false, None, Some(_)) => Ok(()),
            _ => Err(format!(
                "维护计划 {} 到期点与触发类型不一致: type={} due_at_date={:?} due_at_value={:?}",
                self.schedule_id, trigger_type, self.due_at_date, self.due_at_value
            )),
        }
    }

    /// 读取到期点
    pub fn due_point(&self, trigger_type: TriggerType) -> Result<DuePoint, String> {
        self.check_invariant(trigger_type)?;
        match (trigger_type.metric_kind(), self.due_at_date, self.due_at_value) {
            (None, Some(date), _) => Ok(DuePoint::Calendar { date }),
            (Some(kind), _, Some(value)) => Ok(DuePoint::Metric {
                metric: MetricValue::new(kind, value),
            }),
            _ => Err(format!("维护计划 {} 缺少到期点", self.schedule_id)),
        }
    }

    /// 两份记录是否处于同一维护周期（到期点与上次完工均未变化）
    pub fn same_cycle(&self, other: &MaintenanceSchedule) -> bool {
        self.due_at_date == other.due_at_date
            && self.due_at_value == other.due_at_value
            && self.last_completed_at == other.last_completed_at
    }

    /// 是否为终态（非循环项完工后）
    pub fn is_terminal(&self) -> bool {
        self.status == ScheduleStatus::Completed
    }

    /// 评估驱动的状态推进
    ///
    /// # 返回
    /// - `true`: 状态已前进
    /// - `false`: 保持不变（相同状态、回退或涉及 COMPLETED）
    pub fn advance_status(&mut self, next: ScheduleStatus, now: DateTime<Utc>) -> bool {
        if !self.is_active || !self.status.can_advance_to(next) {
            return false;
        }
        self.status = next;
        self.updated_at = now;
        true
    }

    /// 工单占位令牌是否仍然有效
    pub fn has_live_claim(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match (&self.work_order_claim, self.work_order_claimed_at) {
            (Some(_), Some(claimed_at)) => now - claimed_at < ttl,
            _ => false,
        }
    }

    /// 是否需要生成工单
    ///
    /// 条件: 激活 + DUE/OVERDUE + 无关联工单 + 无有效占位
    pub fn needs_work_order(&self, now: DateTime<Utc>, claim_ttl: Duration) -> bool {
        self.is_active
            && self.status.needs_work_order()
            && self.linked_work_order_id.is_none()
            && !self.has_live_claim(now, claim_ttl)
    }

    /// 登记完工并进入下一周期
    ///
    /// # 规则
    /// - 停用的计划、已终态的计划拒绝完工
    /// - 新基准 = 完工时的指标值 / 完工日期，重新计算到期点
    /// - 新到期点必须严格晚于原到期点
    /// - 清空工单关联与占位
    /// - 循环项回到 PENDING，非循环项进入 COMPLETED
    pub fn complete(
        &mut self,
        trigger: &MaintenanceTrigger,
        input: CompletionInput,
    ) -> Result<CompletionOutcome, String> {
        if !self.is_active {
            return Err(format!("维护计划 {} 已停用，不能登记完工", self.schedule_id));
        }
        if self.is_terminal() {
            return Err(format!(
                "维护计划 {} 已是终态 COMPLETED，不能重复完工",
                self.schedule_id
            ));
        }
        if trigger.trigger_id != self.trigger_id {
            return Err(format!(
                "触发条件不匹配: schedule.trigger_id={} trigger.trigger_id={}",
                self.trigger_id, trigger.trigger_id
            ));
        }

        let previous_due = self.due_point(trigger.trigger_type)?;

        let baseline = match trigger.trigger_type.metric_kind() {
            None => Baseline::Date {
                date: input.completed_at.date_naive(),
            },
            Some(kind) => {
                let value = input.completed_at_value.ok_or_else(|| {
                    format!(
                        "使用量类维护计划 {} 完工时必须提供 {} 读数",
                        self.schedule_id, kind
                    )
                })?;
                if !value.is_finite() || value < 0.0 {
                    return Err(format!("完工读数无效: {}", value));
                }
                Baseline::Value { value }
            }
        };

        let new_due = trigger.due_point_from(baseline)?;
        if !new_due.is_later_than(&previous_due) {
            return Err(format!(
                "维护计划 {} 完工后到期点必须晚于原到期点: previous={:?} new={:?}",
                self.schedule_id, previous_due, new_due
            ));
        }
        let (due_at_date, due_at_value) = new_due.into_columns();

        let previous_status = self.status;
        let new_status = if trigger.recurring {
            ScheduleStatus::Pending
        } else {
            ScheduleStatus::Completed
        };

        self.last_completed_at = Some(input.completed_at);
        self.last_completed_at_value = match baseline {
            Baseline::Value { value } => Some(value),
            Baseline::Date { .. } => None,
        };
        self.due_at_date = due_at_date;
        self.due_at_value = due_at_value;
        let released_work_order_id = self.linked_work_order_id.take();
        self.work_order_claim = None;
        self.work_order_claimed_at = None;
        self.status = new_status;
        self.updated_at = Utc::now();

        self.check_invariant(trigger.trigger_type)?;

        Ok(CompletionOutcome {
            previous_due,
            new_due,
            previous_status,
            new_status,
            released_work_order_id,
        })
    }
}
