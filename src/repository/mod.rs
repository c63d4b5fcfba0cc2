// ==========================================
// 无人机机队维护调度系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod catalog_repo;
pub mod compliance_repo;
pub mod error;
pub mod fleet_repo;
pub mod row_utils;
pub mod schedule_repo;
pub mod work_order_repo;

// 重导出核心仓储
pub use catalog_repo::MaintenanceCatalogRepository;
pub use compliance_repo::ComplianceRecordRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use fleet_repo::FleetRepository;
pub use schedule_repo::MaintenanceScheduleRepository;
pub use work_order_repo::WorkOrderRepository;
