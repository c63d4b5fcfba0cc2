// ==========================================
// 无人机机队维护调度系统 - 维护调度 API
// ==========================================
// 职责: 调度运行、告警查询、计划初始化、完工登记、工单生成、计划查询
// ==========================================

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::api::error::{ApiError, ApiResult};
use crate::config::scheduler_config::SchedulerConfigReader;
use crate::domain::alert::{Alert, AlertFilter};
use crate::domain::compliance::ComplianceRecord;
use crate::domain::schedule::MaintenanceSchedule;
use crate::domain::types::{AlertType, ScheduleStatus};
use crate::engine::alerts::AlertAggregator;
use crate::engine::completion::CompletionHandler;
use crate::engine::initializer::{InitializeResult, ScheduleInitializer};
use crate::engine::schedule_store::ScheduleStore;
use crate::engine::scheduler::{RunSummary, SchedulerRunner};
use crate::engine::work_orders::{WorkOrderBatchResult, WorkOrderGenerator};
use crate::repository::compliance_repo::ComplianceRecordRepository;
use crate::repository::fleet_repo::FleetRepository;

/// 按持久化状态统计的计划数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ScheduleCounts {
    pub pending: i64,
    pub due: i64,
    pub overdue: i64,
    pub completed: i64,
}

impl From<HashMap<ScheduleStatus, i64>> for ScheduleCounts {
    fn from(counts: HashMap<ScheduleStatus, i64>) -> Self {
        let get = |status| counts.get(&status).copied().unwrap_or(0);
        Self {
            pending: get(ScheduleStatus::Pending),
            due: get(ScheduleStatus::Due),
            overdue: get(ScheduleStatus::Overdue),
            completed: get(ScheduleStatus::Completed),
        }
    }
}

/// 机体退役结果
#[derive(Debug, Clone, Serialize)]
pub struct RetireResult {
    pub aircraft_id: String,
    pub deactivated_schedules: usize,
}

// ==========================================
// MaintenanceApi - 维护调度 API
// ==========================================

/// 维护调度API
///
/// 职责：
/// 1. 调度运行（按需）
/// 2. 告警查询（排序、筛选、截断）
/// 3. 计划初始化 / 机体退役
/// 4. 完工登记、工单生成
/// 5. 计划与完工履历查询
pub struct MaintenanceApi {
    store: Arc<ScheduleStore>,
    runner: Arc<SchedulerRunner>,
    alerts: Arc<AlertAggregator>,
    initializer: Arc<ScheduleInitializer>,
    completion: Arc<CompletionHandler>,
    generator: Arc<WorkOrderGenerator>,
    compliance_repo: Arc<ComplianceRecordRepository>,
    fleet_repo: Arc<FleetRepository>,
    config: Arc<dyn SchedulerConfigReader>,
    shutdown: CancellationToken,
}

impl MaintenanceApi {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<ScheduleStore>,
        runner: Arc<SchedulerRunner>,
        alerts: Arc<AlertAggregator>,
        initializer: Arc<ScheduleInitializer>,
        completion: Arc<CompletionHandler>,
        generator: Arc<WorkOrderGenerator>,
        compliance_repo: Arc<ComplianceRecordRepository>,
        fleet_repo: Arc<FleetRepository>,
        config: Arc<dyn SchedulerConfigReader>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            runner,
            alerts,
            initializer,
            completion,
            generator,
            compliance_repo,
            fleet_repo,
            config,
            shutdown,
        }
    }

    // ==========================================
    // 调度与告警
    // ==========================================

    /// 按需执行一次调度运行
    ///
    /// 应用关闭时运行在两条计划之间停止，summary.cancelled = true
    pub async fn run_scheduler(&self) -> ApiResult<RunSummary> {
        let cancel = self.shutdown.child_token();
        Ok(self.runner.run(&cancel).await?)
    }

    /// 查询告警
    ///
    /// # 参数
    /// - aircraft_id: 仅该机体（None 表示全机队）
    /// - types: 告警等级筛选（None/空表示全部）
    /// - limit: 返回上限（None 使用配置默认值）
    pub async fn get_alerts(
        &self,
        aircraft_id: Option<&str>,
        types: Option<Vec<AlertType>>,
        limit: Option<usize>,
    ) -> ApiResult<Vec<Alert>> {
        if let Some(id) = aircraft_id {
            if id.trim().is_empty() {
                return Err(ApiError::InvalidInput("机体ID不能为空".to_string()));
            }
        }
        if limit == Some(0) {
            return Err(ApiError::InvalidInput("limit 必须大于0".to_string()));
        }

        let filter = AlertFilter {
            aircraft_id: aircraft_id.map(str::to_string),
            types,
            limit,
        };
        Ok(self.alerts.get_alerts(&filter).await?)
    }

    /// 按持久化状态统计计划数
    pub fn get_schedule_counts(&self) -> ApiResult<ScheduleCounts> {
        Ok(ScheduleCounts::from(self.store.counts_by_status()?))
    }

    // ==========================================
    // 计划生命周期
    // ==========================================

    /// 为机体初始化维护计划（幂等，仅补齐缺失的计划）
    pub async fn initialize_aircraft_schedules(&self, aircraft_id: &str) -> ApiResult<InitializeResult> {
        if aircraft_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("机体ID不能为空".to_string()));
        }
        Ok(self.initializer.initialize_aircraft(aircraft_id).await?)
    }

    /// 机体退役：机体停用并停用其全部计划
    pub fn retire_aircraft(&self, aircraft_id: &str) -> ApiResult<RetireResult> {
        if aircraft_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("机体ID不能为空".to_string()));
        }

        self.fleet_repo.set_active(aircraft_id, false)?;
        let deactivated = self.store.deactivate_for_aircraft(aircraft_id)?;

        tracing::info!(
            aircraft_id = aircraft_id,
            deactivated = deactivated,
            "机体退役，计划已停用"
        );
        Ok(RetireResult {
            aircraft_id: aircraft_id.to_string(),
            deactivated_schedules: deactivated,
        })
    }

    /// 人工登记完工
    ///
    /// # 参数
    /// - completed_at_value: 使用量类读数；为空时读取机体当前指标
    pub async fn complete_schedule(
        &self,
        schedule_id: &str,
        completed_at_value: Option<f64>,
    ) -> ApiResult<MaintenanceSchedule> {
        if schedule_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("计划ID不能为空".to_string()));
        }
        if let Some(value) = completed_at_value {
            if !value.is_finite() || value < 0.0 {
                return Err(ApiError::InvalidInput(format!(
                    "完工读数必须为非负数: {}",
                    value
                )));
            }
        }

        let completed = self
            .completion
            .complete_manually(schedule_id, completed_at_value)
            .await?;
        Ok(completed.schedule)
    }

    /// 为到期/超期计划生成工单
    ///
    /// # 参数
    /// - auto_assign: None 时使用配置 work_order/auto_assign
    pub async fn create_work_orders(&self, auto_assign: Option<bool>) -> ApiResult<WorkOrderBatchResult> {
        let auto_assign = match auto_assign {
            Some(v) => v,
            None => self
                .config
                .get_auto_assign()
                .await
                .map_err(|e| ApiError::ConfigError(e.to_string()))?,
        };

        let cancel = self.shutdown.child_token();
        Ok(self.generator.create_work_orders(auto_assign, &cancel).await?)
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn get_schedule(&self, schedule_id: &str) -> ApiResult<MaintenanceSchedule> {
        if schedule_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("计划ID不能为空".to_string()));
        }
        Ok(self.store.get(schedule_id)?)
    }

    /// 查询机体的全部计划（含已停用）
    pub fn list_schedules(&self, aircraft_id: &str) -> ApiResult<Vec<MaintenanceSchedule>> {
        if aircraft_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("机体ID不能为空".to_string()));
        }
        Ok(self.store.list_by_aircraft(aircraft_id)?)
    }

    /// 查询计划的完工履历（最近一次在前）
    pub fn list_compliance_history(&self, schedule_id: &str) -> ApiResult<Vec<ComplianceRecord>> {
        // 计划不存在时返回 NotFound，而不是空列表
        self.get_schedule(schedule_id)?;
        Ok(self.compliance_repo.find_by_schedule(schedule_id)?)
    }

    /// 查询机体最近的完工履历
    pub fn list_aircraft_compliance(&self, aircraft_id: &str, limit: usize) -> ApiResult<Vec<ComplianceRecord>> {
        if aircraft_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("机体ID不能为空".to_string()));
        }
        Ok(self.compliance_repo.find_by_aircraft(aircraft_id, limit.max(1))?)
    }
}
