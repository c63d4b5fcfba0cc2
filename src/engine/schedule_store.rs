// ==========================================
// 无人机机队维护调度系统 - 维护计划状态存储
// ==========================================
// 职责: 维护计划的原子更新原语（状态推进、完工、工单占位与关联）
// 并发: 单行 revision compare-and-swap；冲突时重读一次后重试，仍冲突则上抛
// 红线:
// - 每次写入前重新校验到期点不变量
// - 状态只能前进；回到 PENDING 只能经由完工
// ==========================================

use crate::domain::catalog::MaintenanceTrigger;
use crate::domain::compliance::ComplianceRecord;
use crate::domain::schedule::{CompletionInput, CompletionOutcome, MaintenanceSchedule};
use crate::domain::types::{CompletionSource, ScheduleStatus, TriggerType};
use crate::engine::error::{EngineError, EngineResult};
use crate::repository::schedule_repo::MaintenanceScheduleRepository;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// 状态更新结果
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    /// 已写入
    Updated {
        from: ScheduleStatus,
        to: ScheduleStatus,
    },
    /// 状态相同，未写入
    Unchanged,
    /// 回退、涉及 COMPLETED 或已进入新周期，保持原状态
    Held { current: ScheduleStatus },
}

impl StatusUpdate {
    pub fn is_write(&self) -> bool {
        matches!(self, StatusUpdate::Updated { .. })
    }
}

/// 完工结果
#[derive(Debug, Clone)]
pub struct CompletedSchedule {
    pub schedule: MaintenanceSchedule,
    pub outcome: CompletionOutcome,
    pub record: ComplianceRecord,
}

// ==========================================
// ScheduleStore - 维护计划状态存储
// ==========================================
pub struct ScheduleStore {
    repo: Arc<MaintenanceScheduleRepository>,
}

impl ScheduleStore {
    pub fn new(repo: Arc<MaintenanceScheduleRepository>) -> Self {
        Self { repo }
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 按ID读取计划，不存在返回 NotFound
    pub fn get(&self, schedule_id: &str) -> EngineResult<MaintenanceSchedule> {
        self.repo
            .find_by_id(schedule_id)?
            .ok_or_else(|| EngineError::not_found("MaintenanceSchedule", schedule_id))
    }

    pub fn list_active(&self) -> EngineResult<Vec<MaintenanceSchedule>> {
        Ok(self.repo.find_active()?)
    }

    pub fn list_active_by_aircraft(&self, aircraft_id: &str) -> EngineResult<Vec<MaintenanceSchedule>> {
        Ok(self.repo.find_active_by_aircraft(aircraft_id)?)
    }

    pub fn list_by_aircraft(&self, aircraft_id: &str) -> EngineResult<Vec<MaintenanceSchedule>> {
        Ok(self.repo.find_by_aircraft(aircraft_id)?)
    }

    pub fn find_by_linked_work_order(
        &self,
        work_order_id: &str,
    ) -> EngineResult<Option<MaintenanceSchedule>> {
        Ok(self.repo.find_by_linked_work_order(work_order_id)?)
    }

    pub fn linked_active(&self) -> EngineResult<Vec<MaintenanceSchedule>> {
        Ok(self.repo.find_linked_active()?)
    }

    pub fn work_order_candidates(&self) -> EngineResult<Vec<MaintenanceSchedule>> {
        Ok(self.repo.find_work_order_candidates()?)
    }

    pub fn active_trigger_ids(&self, aircraft_id: &str) -> EngineResult<HashSet<String>> {
        Ok(self.repo.find_active_trigger_ids(aircraft_id)?)
    }

    /// 按持久化状态统计
    pub fn counts_by_status(&self) -> EngineResult<HashMap<ScheduleStatus, i64>> {
        Ok(self.repo.count_by_status()?)
    }

    // ==========================================
    // 创建与停用
    // ==========================================

    /// 批量创建（单事务）
    pub fn create_all(&self, schedules: &[MaintenanceSchedule]) -> EngineResult<usize> {
        Ok(self.repo.insert_batch(schedules)?)
    }

    pub fn deactivate_for_aircraft(&self, aircraft_id: &str) -> EngineResult<usize> {
        Ok(self.repo.deactivate_by_aircraft(aircraft_id)?)
    }

    pub fn deactivate_for_trigger(&self, trigger_id: &str) -> EngineResult<usize> {
        Ok(self.repo.deactivate_by_trigger(trigger_id)?)
    }

    pub fn deactivate_for_program(&self, program_id: &str) -> EngineResult<usize> {
        Ok(self.repo.deactivate_by_program(program_id)?)
    }

    // ==========================================
    // 原子更新原语
    // ==========================================

    /// 评估驱动的状态更新
    ///
    /// # 规则
    /// - 状态相同: 不写入 (Unchanged)
    /// - 回退或进出 COMPLETED: 不写入 (Held)
    /// - 前进: CAS 写入 (Updated)
    /// - 重读后发现已进入新周期（期间有完工）: 不写入 (Held)，下一轮按新到期点重新评估
    pub fn update_status(
        &self,
        snapshot: MaintenanceSchedule,
        trigger_type: TriggerType,
        next: ScheduleStatus,
        now: DateTime<Utc>,
    ) -> EngineResult<StatusUpdate> {
        let evaluated = snapshot.clone();
        self.retry_on_conflict(snapshot, |mut schedule| {
            let from = schedule.status;
            if !schedule.same_cycle(&evaluated) {
                tracing::debug!(
                    schedule_id = %schedule.schedule_id,
                    "评估期间计划已完工，放弃本次状态推进"
                );
                return Ok(StatusUpdate::Held { current: from });
            }
            if from == next {
                return Ok(StatusUpdate::Unchanged);
            }
            if !schedule.advance_status(next, now) {
                return Ok(StatusUpdate::Held { current: from });
            }
            self.write(&schedule, trigger_type)?;
            Ok(StatusUpdate::Updated { from, to: next })
        })
    }

    /// 登记完工并追加完工履历（单事务）
    ///
    /// # 返回
    /// - Err(InvalidState): 计划已停用、已终态、缺少读数等
    pub fn complete(
        &self,
        schedule_id: &str,
        trigger: &MaintenanceTrigger,
        input: CompletionInput,
        source: CompletionSource,
    ) -> EngineResult<CompletedSchedule> {
        let snapshot = self.get(schedule_id)?;
        self.retry_on_conflict(snapshot, |schedule| {
            self.apply_completion(schedule, trigger, input, source)
        })
    }

    /// 按工单关闭登记完工，仅当计划仍关联该工单时写入
    ///
    /// # 返回
    /// - Ok(None): 计划已不再关联该工单（人工完工或另一条关闭路径已处理）
    pub fn complete_linked(
        &self,
        schedule_id: &str,
        work_order_id: &str,
        trigger: &MaintenanceTrigger,
        input: CompletionInput,
    ) -> EngineResult<Option<CompletedSchedule>> {
        let snapshot = self.get(schedule_id)?;
        self.retry_on_conflict(snapshot, |schedule| {
            if schedule.linked_work_order_id.as_deref() != Some(work_order_id) {
                return Ok(None);
            }
            self.apply_completion(schedule, trigger, input, CompletionSource::WorkOrder)
                .map(Some)
        })
    }

    /// 为生成工单占位
    ///
    /// # 返回
    /// - Ok(Some(schedule)): 占位成功（返回带令牌的最新计划）
    /// - Ok(None): 无需生成（已关联、已被他人占位、状态已变化）
    pub fn claim_for_work_order(
        &self,
        snapshot: MaintenanceSchedule,
        trigger_type: TriggerType,
        now: DateTime<Utc>,
        claim_ttl: Duration,
    ) -> EngineResult<Option<MaintenanceSchedule>> {
        self.retry_on_conflict(snapshot, |mut schedule| {
            if !schedule.needs_work_order(now, claim_ttl) {
                return Ok(None);
            }
            schedule.work_order_claim = Some(Uuid::new_v4().to_string());
            schedule.work_order_claimed_at = Some(now);
            schedule.updated_at = now;
            self.write(&schedule, trigger_type)?;
            Ok(Some(schedule))
        })
    }

    /// 关联工单并清除占位
    ///
    /// # 返回
    /// - Err(InvalidState): 计划已关联其他工单、已停用或不再需要工单
    pub fn link_work_order(
        &self,
        claimed: MaintenanceSchedule,
        trigger_type: TriggerType,
        work_order_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<MaintenanceSchedule> {
        let claim = claimed.work_order_claim.clone();
        self.retry_on_conflict(claimed, |mut schedule| {
            if let Some(existing) = &schedule.linked_work_order_id {
                return Err(EngineError::InvalidState(format!(
                    "计划 {} 已关联工单 {}，工单 {} 未关联",
                    schedule.schedule_id, existing, work_order_id
                )));
            }
            if !schedule.is_active || !schedule.status.needs_work_order() {
                return Err(EngineError::InvalidState(format!(
                    "计划 {} 已不需要工单 (status={}, active={})，工单 {} 未关联",
                    schedule.schedule_id, schedule.status, schedule.is_active, work_order_id
                )));
            }
            if schedule.work_order_claim != claim {
                tracing::warn!(
                    schedule_id = %schedule.schedule_id,
                    work_order_id = work_order_id,
                    "占位令牌已被替换，仍按未关联状态写入工单"
                );
            }

            schedule.linked_work_order_id = Some(work_order_id.to_string());
            schedule.work_order_claim = None;
            schedule.work_order_claimed_at = None;
            schedule.updated_at = now;
            self.write(&schedule, trigger_type)?;
            Ok(schedule)
        })
    }

    /// 释放占位（工单创建失败时调用；令牌不匹配时不做任何事）
    pub fn release_claim(
        &self,
        schedule_id: &str,
        trigger_type: TriggerType,
        claim: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let snapshot = self.get(schedule_id)?;
        self.retry_on_conflict(snapshot, |mut schedule| {
            if schedule.work_order_claim.as_deref() != Some(claim) {
                return Ok(());
            }
            schedule.work_order_claim = None;
            schedule.work_order_claimed_at = None;
            schedule.updated_at = now;
            self.write(&schedule, trigger_type)?;
            Ok(())
        })
    }

    // ==========================================
    // 内部辅助
    // ==========================================

    fn apply_completion(
        &self,
        mut schedule: MaintenanceSchedule,
        trigger: &MaintenanceTrigger,
        input: CompletionInput,
        source: CompletionSource,
    ) -> EngineResult<CompletedSchedule> {
        let outcome = schedule
            .complete(trigger, input)
            .map_err(EngineError::InvalidState)?;
        let record = ComplianceRecord::from_completion(&schedule, &outcome, source);

        let revision = self.repo.update_with_compliance_record(&schedule, &record)?;
        schedule.revision = revision;

        Ok(CompletedSchedule {
            schedule,
            outcome,
            record,
        })
    }

    /// 校验不变量后 CAS 写入，返回新 revision
    fn write(&self, schedule: &MaintenanceSchedule, trigger_type: TriggerType) -> EngineResult<i64> {
        schedule
            .check_invariant(trigger_type)
            .map_err(EngineError::InvalidState)?;
        Ok(self.repo.update_with_revision(schedule)?)
    }

    /// 先用快照执行；乐观锁冲突时重读一次再执行，仍冲突则上抛 ConcurrencyConflict
    fn retry_on_conflict<T>(
        &self,
        snapshot: MaintenanceSchedule,
        mut op: impl FnMut(MaintenanceSchedule) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let schedule_id = snapshot.schedule_id.clone();
        match op(snapshot) {
            Err(EngineError::ConcurrencyConflict { .. }) => {
                tracing::debug!(schedule_id = %schedule_id, "乐观锁冲突，重读后重试");
                let fresh = self.get(&schedule_id)?;
                op(fresh)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ensure_schema;
    use crate::domain::catalog::MaintenanceProgram;
    use crate::domain::metrics::Baseline;
    use crate::repository::catalog_repo::MaintenanceCatalogRepository;
    use rusqlite::Connection;
    use std::sync::Mutex;

    fn setup() -> (ScheduleStore, Arc<MaintenanceScheduleRepository>, MaintenanceTrigger, MaintenanceSchedule) {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));

        let catalog = MaintenanceCatalogRepository::new(conn.clone());
        let program = MaintenanceProgram::new("STD".into(), "通用".into(), None, true);
        catalog.insert_program(&program).unwrap();
        let trigger = MaintenanceTrigger::new(
            program.program_id.clone(),
            "FH-50".into(),
            "50小时检".into(),
            TriggerType::FlightHours,
            50.0,
            5.0,
            true,
            None,
        );
        catalog.insert_trigger(&trigger).unwrap();

        let repo = Arc::new(MaintenanceScheduleRepository::new(conn));
        let schedule =
            MaintenanceSchedule::initialize("UAV-1", &trigger, Baseline::Value { value: 0.0 }, Utc::now())
                .unwrap();
        repo.insert_batch(&[schedule.clone()]).unwrap();

        (ScheduleStore::new(repo.clone()), repo, trigger, schedule)
    }

    #[test]
    fn test_update_status_is_idempotent_and_monotonic() {
        let (store, _, trigger, schedule) = setup();
        let tt = trigger.trigger_type;

        let r = store
            .update_status(schedule.clone(), tt, ScheduleStatus::Due, Utc::now())
            .unwrap();
        assert_eq!(
            r,
            StatusUpdate::Updated {
                from: ScheduleStatus::Pending,
                to: ScheduleStatus::Due
            }
        );

        let fresh = store.get(&schedule.schedule_id).unwrap();
        assert_eq!(
            store.update_status(fresh.clone(), tt, ScheduleStatus::Due, Utc::now()).unwrap(),
            StatusUpdate::Unchanged
        );
        assert_eq!(
            store.update_status(fresh, tt, ScheduleStatus::Pending, Utc::now()).unwrap(),
            StatusUpdate::Held {
                current: ScheduleStatus::Due
            }
        );
    }

    #[test]
    fn test_stale_snapshot_succeeds_after_single_retry() {
        let (store, _, trigger, schedule) = setup();
        let tt = trigger.trigger_type;

        // 另一写入方先推进了 revision
        store
            .update_status(schedule.clone(), tt, ScheduleStatus::Due, Utc::now())
            .unwrap();

        // 旧快照 (revision=0) 冲突后重读，再推进到 OVERDUE
        let r = store
            .update_status(schedule.clone(), tt, ScheduleStatus::Overdue, Utc::now())
            .unwrap();
        assert!(r.is_write());
        let loaded = store.get(&schedule.schedule_id).unwrap();
        assert_eq!(loaded.status, ScheduleStatus::Overdue);
        assert_eq!(loaded.revision, 2);
    }

    #[test]
    fn test_status_from_previous_cycle_not_applied_after_completion() {
        let (store, _, trigger, schedule) = setup();
        let tt = trigger.trigger_type;

        store
            .update_status(schedule.clone(), tt, ScheduleStatus::Due, Utc::now())
            .unwrap();
        // 调度运行读取的快照：DUE，到期点 50
        let evaluated = store.get(&schedule.schedule_id).unwrap();

        // 评估与写入之间完工落地，进入新周期
        let input = CompletionInput {
            completed_at: Utc::now(),
            completed_at_value: Some(53.0),
        };
        store
            .complete(&schedule.schedule_id, &trigger, input, CompletionSource::WorkOrder)
            .unwrap();

        // 按旧到期点得出的 OVERDUE 不能落到新周期上
        let r = store
            .update_status(evaluated, tt, ScheduleStatus::Overdue, Utc::now())
            .unwrap();
        assert_eq!(
            r,
            StatusUpdate::Held {
                current: ScheduleStatus::Pending
            }
        );

        let loaded = store.get(&schedule.schedule_id).unwrap();
        assert_eq!(loaded.status, ScheduleStatus::Pending);
        assert_eq!(loaded.due_at_value, Some(103.0));
    }

    #[test]
    fn test_complete_linked_requires_matching_work_order() {
        let (store, _, trigger, schedule) = setup();
        let tt = trigger.trigger_type;
        let now = Utc::now();

        store.update_status(schedule.clone(), tt, ScheduleStatus::Due, now).unwrap();
        let due = store.get(&schedule.schedule_id).unwrap();
        let claimed = store
            .claim_for_work_order(due, tt, now, Duration::minutes(10))
            .unwrap()
            .unwrap();
        store.link_work_order(claimed, tt, "WO-1", now).unwrap();

        let input = CompletionInput {
            completed_at: now,
            completed_at_value: Some(53.0),
        };
        assert!(store
            .complete_linked(&schedule.schedule_id, "WO-OTHER", &trigger, input)
            .unwrap()
            .is_none());

        let done = store
            .complete_linked(&schedule.schedule_id, "WO-1", &trigger, input)
            .unwrap()
            .expect("linked work order completes the cycle");
        assert_eq!(done.schedule.due_at_value, Some(103.0));

        // 同一工单的第二次关闭处理不再重复完工
        assert!(store
            .complete_linked(&schedule.schedule_id, "WO-1", &trigger, input)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_conflict_surfaces_when_retry_also_conflicts() {
        let (store, repo, _, schedule) = setup();

        let result: EngineResult<()> = store.retry_on_conflict(schedule.clone(), |mut s| {
            // 每次写入前都有并发写入抢先
            let mut other = repo.find_by_id(&s.schedule_id).unwrap().unwrap();
            other.updated_at = Utc::now();
            repo.update_with_revision(&other).unwrap();

            s.status = ScheduleStatus::Due;
            repo.update_with_revision(&s)?;
            Ok(())
        });

        assert!(matches!(result, Err(EngineError::ConcurrencyConflict { .. })));
    }

    #[test]
    fn test_complete_writes_record_and_rejects_terminal() {
        let (store, _, mut trigger, schedule) = setup();
        trigger.recurring = false;

        let input = CompletionInput {
            completed_at: Utc::now(),
            completed_at_value: Some(53.0),
        };
        let done = store
            .complete(&schedule.schedule_id, &trigger, input, CompletionSource::Manual)
            .unwrap();
        assert_eq!(done.schedule.status, ScheduleStatus::Completed);
        assert_eq!(done.record.new_due_value, Some(103.0));
        assert_eq!(done.record.previous_due_value, Some(50.0));

        let again = store.complete(&schedule.schedule_id, &trigger, input, CompletionSource::Manual);
        assert!(matches!(again, Err(EngineError::InvalidState(_))));
    }

    #[test]
    fn test_claim_then_link_blocks_second_claim() {
        let (store, _, trigger, schedule) = setup();
        let tt = trigger.trigger_type;
        let now = Utc::now();
        let ttl = Duration::minutes(10);

        store.update_status(schedule.clone(), tt, ScheduleStatus::Due, now).unwrap();
        let due = store.get(&schedule.schedule_id).unwrap();

        let claimed = store
            .claim_for_work_order(due.clone(), tt, now, ttl)
            .unwrap()
            .expect("first claim succeeds");
        // 另一生成器持有旧快照，冲突重读后看到有效占位
        assert!(store.claim_for_work_order(due, tt, now, ttl).unwrap().is_none());

        let linked = store.link_work_order(claimed, tt, "WO-1", now).unwrap();
        assert_eq!(linked.linked_work_order_id.as_deref(), Some("WO-1"));
        assert!(linked.work_order_claim.is_none());

        let fresh = store.get(&schedule.schedule_id).unwrap();
        assert!(store.claim_for_work_order(fresh, tt, now, ttl).unwrap().is_none());
    }

    #[test]
    fn test_release_claim_only_with_matching_token() {
        let (store, _, trigger, schedule) = setup();
        let tt = trigger.trigger_type;
        let now = Utc::now();

        store.update_status(schedule.clone(), tt, ScheduleStatus::Due, now).unwrap();
        let due = store.get(&schedule.schedule_id).unwrap();
        let claimed = store
            .claim_for_work_order(due, tt, now, Duration::minutes(10))
            .unwrap()
            .unwrap();
        let token = claimed.work_order_claim.clone().unwrap();

        store.release_claim(&schedule.schedule_id, tt, "other", now).unwrap();
        assert!(store.get(&schedule.schedule_id).unwrap().work_order_claim.is_some());

        store.release_claim(&schedule.schedule_id, tt, &token, now).unwrap();
        assert!(store.get(&schedule.schedule_id).unwrap().work_order_claim.is_none());
    }
}
