// ==========================================
// 无人机机队维护调度系统 - 引擎层
// ==========================================
// 职责: 实现维护调度规则,不拼 SQL
// 红线: Engine 不拼 SQL, 评估结果必须输出 reason
// ==========================================

pub mod alerts;
pub mod collaborators;
pub mod completion;
pub mod error;
pub mod evaluator;
pub mod initializer;
pub mod schedule_store;
pub mod scheduler;
pub mod work_orders;
pub mod worker;

// 重导出核心引擎
pub use alerts::AlertAggregator;
pub use collaborators::{
    AircraftRegistry, CollaboratorError, CollaboratorResult, MetricProvider, TriggerCatalog,
    WorkOrderClosedListener, WorkOrderService,
};
pub use completion::CompletionHandler;
pub use error::{EngineError, EngineResult};
pub use evaluator::{Evaluation, MaintenanceEvaluator};
pub use initializer::{InitializeResult, ScheduleInitializer};
pub use schedule_store::{CompletedSchedule, ScheduleStore, StatusUpdate};
pub use scheduler::{ItemFailure, RunSummary, SchedulerRunner};
pub use work_orders::{WorkOrderBatchResult, WorkOrderGenerator};
pub use worker::{SchedulerWorker, TickReport};
