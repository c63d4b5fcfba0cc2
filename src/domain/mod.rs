// ==========================================
// 无人机机队维护调度系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、状态机
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod alert;
pub mod catalog;
pub mod compliance;
pub mod metrics;
pub mod schedule;
pub mod types;
pub mod work_order;

// 重导出核心类型
pub use alert::{Alert, AlertFilter};
pub use catalog::{MaintenanceProgram, MaintenanceTrigger, WILDCARD_MODEL};
pub use compliance::ComplianceRecord;
pub use metrics::{Aircraft, AircraftMetrics, Baseline, DuePoint, MetricValue, Remaining};
pub use schedule::{CompletionInput, CompletionOutcome, MaintenanceSchedule};
pub use types::{AlertType, CompletionSource, MetricKind, ScheduleStatus, TriggerType};
pub use work_order::{WorkOrder, WorkOrderClosed, WorkOrderStatus, WorkOrderTask};
