// ==========================================
// 无人机机队维护调度系统 - API 层
// ==========================================
// 职责: 对外暴露的业务操作，供二进制与集成方调用
// ==========================================

pub mod catalog_api;
pub mod error;
pub mod maintenance_api;

// 重导出核心类型
pub use catalog_api::{CatalogApi, CreateProgramRequest, CreateTriggerRequest, DeactivateResult};
pub use error::{ApiError, ApiResult};
pub use maintenance_api::{MaintenanceApi, RetireResult, ScheduleCounts};
