// ==========================================
// 无人机机队维护调度系统 - 应用层
// ==========================================
// 职责: 装配各层组件，供二进制入口使用
// ==========================================

pub mod state;

// 重导出
pub use state::{get_default_db_path, AppState};
