// ==========================================
// 无人机机队维护调度系统 - 核心库
// ==========================================
// 技术栈: Rust + Tokio + SQLite
// 系统定位: 维护调度引擎（到期评估、告警、工单生成、完工闭环）
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 调度规则
pub mod engine;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一/建表）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// 应用层 - 组件装配
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{AlertType, CompletionSource, MetricKind, ScheduleStatus, TriggerType};

// 领域实体
pub use domain::{
    Aircraft, AircraftMetrics, Alert, ComplianceRecord, MaintenanceProgram, MaintenanceSchedule,
    MaintenanceTrigger, WorkOrderClosed, WorkOrderTask,
};

// 引擎
pub use engine::{
    AlertAggregator, CompletionHandler, MaintenanceEvaluator, ScheduleInitializer, ScheduleStore,
    SchedulerRunner, SchedulerWorker, WorkOrderGenerator,
};

// API
pub use api::{ApiError, ApiResult, CatalogApi, MaintenanceApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "无人机机队维护调度系统";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
