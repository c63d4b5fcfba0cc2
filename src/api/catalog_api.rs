// ==========================================
// 无人机机队维护调度系统 - 维护大纲管理 API
// ==========================================
// 职责: 大纲/触发条件的创建、停用、查询
// 红线: 配置错误在创建时拒绝 (InvalidState)，不做截断；停用而不删除
// ==========================================

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::domain::catalog::{MaintenanceProgram, MaintenanceTrigger};
use crate::domain::types::TriggerType;
use crate::engine::schedule_store::ScheduleStore;
use crate::repository::catalog_repo::MaintenanceCatalogRepository;

/// 创建大纲请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProgramRequest {
    pub code: String,
    pub name: String,
    pub aircraft_model: Option<String>, // None 表示全部机型
    #[serde(default)]
    pub is_default: bool,
}

/// 创建触发条件请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTriggerRequest {
    pub program_id: String,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub trigger_type: TriggerType,
    pub interval_value: f64,
    pub warning_threshold: f64,
    pub recurring: bool,
    pub task_template: Option<String>,
}

/// 停用结果
#[derive(Debug, Clone, Serialize)]
pub struct DeactivateResult {
    pub id: String,
    pub deactivated_triggers: usize,
    pub deactivated_schedules: usize,
}

// ==========================================
// CatalogApi - 维护大纲管理 API
// ==========================================
pub struct CatalogApi {
    catalog_repo: Arc<MaintenanceCatalogRepository>,
    store: Arc<ScheduleStore>,
}

impl CatalogApi {
    pub fn new(catalog_repo: Arc<MaintenanceCatalogRepository>, store: Arc<ScheduleStore>) -> Self {
        Self {
            catalog_repo,
            store,
        }
    }

    /// 创建维护大纲
    ///
    /// # 返回
    /// - Err(InvalidInput): 编码/名称为空
    /// - Err(BusinessRuleViolation): 编码重复
    pub fn create_program(&self, request: CreateProgramRequest) -> ApiResult<MaintenanceProgram> {
        let program = MaintenanceProgram::new(
            request.code.trim().to_string(),
            request.name.trim().to_string(),
            request.aircraft_model.map(|m| m.trim().to_string()),
            request.is_default,
        );
        program.validate().map_err(ApiError::InvalidInput)?;

        self.catalog_repo.insert_program(&program)?;
        tracing::info!(program_id = %program.program_id, code = %program.code, "维护大纲已创建");
        Ok(program)
    }

    /// 创建触发条件
    ///
    /// # 返回
    /// - Err(NotFound): 大纲不存在
    /// - Err(InvalidState): 大纲已停用，或间隔/预警余量配置错误
    pub fn create_trigger(&self, request: CreateTriggerRequest) -> ApiResult<MaintenanceTrigger> {
        if request.code.trim().is_empty() {
            return Err(ApiError::InvalidInput("触发条件编码不能为空".to_string()));
        }
        if request.name.trim().is_empty() {
            return Err(ApiError::InvalidInput("触发条件名称不能为空".to_string()));
        }

        let program = self
            .catalog_repo
            .find_program_by_id(&request.program_id)?
            .ok_or_else(|| {
                ApiError::NotFound(format!("MaintenanceProgram(id={})不存在", request.program_id))
            })?;
        if !program.is_active {
            return Err(ApiError::InvalidState(format!(
                "维护大纲 {} 已停用，不能新增触发条件",
                program.code
            )));
        }

        let mut trigger = MaintenanceTrigger::new(
            program.program_id.clone(),
            request.code.trim().to_string(),
            request.name.trim().to_string(),
            request.trigger_type,
            request.interval_value,
            request.warning_threshold,
            request.recurring,
            request.task_template,
        );
        trigger.description = request.description;
        trigger.validate().map_err(ApiError::InvalidState)?;

        self.catalog_repo.insert_trigger(&trigger)?;
        tracing::info!(
            trigger_id = %trigger.trigger_id,
            program_id = %program.program_id,
            trigger_type = %trigger.trigger_type,
            "触发条件已创建"
        );
        Ok(trigger)
    }

    /// 停用大纲：连带停用其触发条件与对应计划
    pub fn deactivate_program(&self, program_id: &str) -> ApiResult<DeactivateResult> {
        self.catalog_repo.set_program_active(program_id, false)?;

        let mut deactivated_triggers = 0;
        for trigger in self.catalog_repo.list_triggers_by_program(program_id)? {
            if trigger.is_active {
                self.catalog_repo.set_trigger_active(&trigger.trigger_id, false)?;
                deactivated_triggers += 1;
            }
        }
        let deactivated_schedules = self.store.deactivate_for_program(program_id)?;

        tracing::info!(
            program_id = program_id,
            deactivated_triggers = deactivated_triggers,
            deactivated_schedules = deactivated_schedules,
            "维护大纲已停用"
        );
        Ok(DeactivateResult {
            id: program_id.to_string(),
            deactivated_triggers,
            deactivated_schedules,
        })
    }

    /// 停用触发条件及其计划
    pub fn deactivate_trigger(&self, trigger_id: &str) -> ApiResult<DeactivateResult> {
        self.catalog_repo.set_trigger_active(trigger_id, false)?;
        let deactivated_schedules = self.store.deactivate_for_trigger(trigger_id)?;

        tracing::info!(
            trigger_id = trigger_id,
            deactivated_schedules = deactivated_schedules,
            "触发条件已停用"
        );
        Ok(DeactivateResult {
            id: trigger_id.to_string(),
            deactivated_triggers: 1,
            deactivated_schedules,
        })
    }

    pub fn list_programs(&self, include_inactive: bool) -> ApiResult<Vec<MaintenanceProgram>> {
        Ok(self.catalog_repo.list_programs(include_inactive)?)
    }

    pub fn list_triggers(&self, program_id: &str) -> ApiResult<Vec<MaintenanceTrigger>> {
        if self.catalog_repo.find_program_by_id(program_id)?.is_none() {
            return Err(ApiError::NotFound(format!(
                "MaintenanceProgram(id={})不存在",
                program_id
            )));
        }
        Ok(self.catalog_repo.list_triggers_by_program(program_id)?)
    }
}
