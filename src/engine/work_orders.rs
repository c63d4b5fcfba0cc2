// ==========================================
// 无人机机队维护调度系统 - 工单生成引擎
// ==========================================
// 职责: 为 DUE/OVERDUE 且未关联工单的计划各生成一张工单并关联
// 流程: 占位(CAS) → 复用未关闭工单或调用 WorkOrderService.create（限时）→ 关联(CAS)
// 幂等: 由 linked_work_order_id + 占位令牌保证，不锁整表
// 补偿: 创建后未能关联的工单留在工单服务中，下一次生成时按计划ID找回并关联
// 红线: 单条失败只记录到结果中，继续处理后续计划
// ==========================================

use crate::domain::types::TriggerType;
use crate::domain::work_order::WorkOrderTask;
use crate::engine::collaborators::{
    call_with_timeout, fetch_triggers_batch, trigger_ids, TriggerCatalog, WorkOrderService,
};
use crate::engine::error::EngineResult;
use crate::engine::schedule_store::ScheduleStore;
use crate::engine::scheduler::ItemFailure;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// 工单批量生成结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkOrderBatchResult {
    pub created: usize,
    pub adopted: usize, // 复用此前已创建但未关联的工单
    pub work_orders: Vec<String>,
    pub skipped: usize, // 已被其他生成器占位或状态已变化
    pub failures: Vec<ItemFailure>,
    pub cancelled: bool,
}

// ==========================================
// WorkOrderGenerator - 工单生成引擎
// ==========================================
pub struct WorkOrderGenerator {
    store: Arc<ScheduleStore>,
    catalog: Arc<dyn TriggerCatalog>,
    service: Arc<dyn WorkOrderService>,
    collaborator_timeout: Duration,
    claim_ttl: chrono::Duration,
}

impl WorkOrderGenerator {
    pub fn new(
        store: Arc<ScheduleStore>,
        catalog: Arc<dyn TriggerCatalog>,
        service: Arc<dyn WorkOrderService>,
        collaborator_timeout: Duration,
        claim_ttl: chrono::Duration,
    ) -> Self {
        Self {
            store,
            catalog,
            service,
            collaborator_timeout,
            claim_ttl,
        }
    }

    /// 批量生成工单
    ///
    /// 可重复调用、可与调度运行并发；未关闭的工单不会重复生成
    #[instrument(skip(self, cancel))]
    pub async fn create_work_orders(
        &self,
        auto_assign: bool,
        cancel: &CancellationToken,
    ) -> EngineResult<WorkOrderBatchResult> {
        let mut result = WorkOrderBatchResult::default();
        let candidates = self.store.work_order_candidates()?;
        if candidates.is_empty() {
            tracing::debug!("无待生成工单的计划");
            return Ok(result);
        }

        let triggers = fetch_triggers_batch(
            &self.catalog,
            trigger_ids(&candidates),
            self.collaborator_timeout,
        )
        .await;
        let mut program_ids: Vec<String> = triggers
            .values()
            .filter_map(|t| t.as_ref().ok())
            .map(|t| t.program_id.clone())
            .collect();
        program_ids.sort();
        program_ids.dedup();
        let program_codes = self.load_program_codes(program_ids).await;

        let total = candidates.len();
        for (index, candidate) in candidates.into_iter().enumerate() {
            if cancel.is_cancelled() {
                result.cancelled = true;
                result.skipped += total - index;
                tracing::info!(remaining = total - index, "工单生成已取消");
                break;
            }

            let schedule_id = candidate.schedule_id.clone();
            let trigger = match triggers.get(&candidate.trigger_id) {
                Some(Ok(t)) => t,
                Some(Err(e)) => {
                    tracing::warn!(schedule_id = %schedule_id, "触发条件读取失败: {}", e);
                    result.failures.push(failure(&schedule_id, e.to_string()));
                    continue;
                }
                None => {
                    result.failures.push(failure(&schedule_id, "触发条件缺失".to_string()));
                    continue;
                }
            };

            // 1. 占位
            let claimed = match self.store.claim_for_work_order(
                candidate,
                trigger.trigger_type,
                Utc::now(),
                self.claim_ttl,
            ) {
                Ok(Some(s)) => s,
                Ok(None) => {
                    result.skipped += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(schedule_id = %schedule_id, "工单占位失败: {}", e);
                    result.failures.push(failure(&schedule_id, e.to_string()));
                    continue;
                }
            };
            let claim = claimed.work_order_claim.clone().unwrap_or_default();

            // 2. 复用未关闭工单，否则创建
            let lookup = call_with_timeout(
                &format!("WorkOrderService.FindOpen({})", schedule_id),
                self.collaborator_timeout,
                self.service.find_open(&schedule_id),
            )
            .await;
            let existing = match lookup {
                Ok(existing) => existing,
                Err(e) => {
                    tracing::warn!(schedule_id = %schedule_id, "未关闭工单查询失败，释放占位: {}", e);
                    self.release(&schedule_id, trigger.trigger_type, &claim);
                    result.failures.push(failure(&schedule_id, e.to_string()));
                    continue;
                }
            };

            let (work_order_id, adopted) = match existing {
                Some(id) => {
                    tracing::info!(schedule_id = %schedule_id, work_order_id = %id, "发现未关联的工单，直接关联");
                    (id, true)
                }
                None => {
                    let mut task = WorkOrderTask::from_schedule(&claimed, trigger, auto_assign);
                    if let Some(code) = program_codes.get(&trigger.program_id) {
                        task = task.with_program_code(code.clone());
                    }
                    let created = call_with_timeout(
                        &format!("WorkOrderService.Create({})", schedule_id),
                        self.collaborator_timeout,
                        self.service.create(&claimed.aircraft_id, &schedule_id, &task),
                    )
                    .await;

                    match created {
                        Ok(id) => (id, false),
                        Err(e) => {
                            tracing::warn!(schedule_id = %schedule_id, "工单创建失败，释放占位: {}", e);
                            self.release(&schedule_id, trigger.trigger_type, &claim);
                            result.failures.push(failure(&schedule_id, e.to_string()));
                            continue;
                        }
                    }
                }
            };

            // 3. 关联
            match self
                .store
                .link_work_order(claimed, trigger.trigger_type, &work_order_id, Utc::now())
            {
                Ok(_) => {
                    tracing::info!(
                        schedule_id = %schedule_id,
                        work_order_id = %work_order_id,
                        auto_assign = auto_assign,
                        adopted = adopted,
                        "工单已关联"
                    );
                    if adopted {
                        result.adopted += 1;
                    } else {
                        result.created += 1;
                    }
                    result.work_orders.push(work_order_id);
                }
                Err(e) => {
                    tracing::error!(
                        schedule_id = %schedule_id,
                        work_order_id = %work_order_id,
                        "工单关联失败，释放占位待下次复用: {}",
                        e
                    );
                    self.release(&schedule_id, trigger.trigger_type, &claim);
                    result.failures.push(failure(
                        &schedule_id,
                        format!("工单 {} 未关联: {}", work_order_id, e),
                    ));
                }
            }
        }

        tracing::info!(
            created = result.created,
            adopted = result.adopted,
            skipped = result.skipped,
            failures = result.failures.len(),
            "工单生成完成"
        );
        Ok(result)
    }

    /// 释放占位；失败时占位按有效期过期
    fn release(&self, schedule_id: &str, trigger_type: TriggerType, claim: &str) {
        if let Err(e) = self
            .store
            .release_claim(schedule_id, trigger_type, claim, Utc::now())
        {
            tracing::warn!(schedule_id = %schedule_id, "占位释放失败（将按有效期过期）: {}", e);
        }
    }

    /// 读取大纲代码（读取失败时不附加）
    async fn load_program_codes(&self, program_ids: Vec<String>) -> HashMap<String, String> {
        let mut codes = HashMap::new();
        for program_id in program_ids {
            let label = format!("GetProgram({})", program_id);
            match call_with_timeout(&label, self.collaborator_timeout, self.catalog.get_program(&program_id))
                .await
            {
                Ok(program) => {
                    codes.insert(program_id, program.code);
                }
                Err(e) => tracing::debug!(program_id = %program_id, "大纲读取失败: {}", e),
            }
        }
        codes
    }
}

fn failure(schedule_id: &str, reason: String) -> ItemFailure {
    ItemFailure {
        schedule_id: schedule_id.to_string(),
        reason,
    }
}
