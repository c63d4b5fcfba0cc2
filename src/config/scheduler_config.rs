// ==========================================
// 无人机机队维护调度系统 - 调度配置读取 Trait
// ==========================================
// 职责: 定义调度引擎所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::time::Duration;

/// 配置层 Result 类型别名
pub type ConfigResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

// ==========================================
// SchedulerConfig - 调度配置快照
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub interval_secs: u64,            // 后台调度间隔
    pub collaborator_timeout_ms: u64,  // 单次协作方调用超时
    pub alert_default_limit: usize,    // 告警默认条数上限
    pub claim_ttl_secs: i64,           // 工单占位令牌有效期
    pub auto_assign: bool,             // 生成工单时是否自动派工
    pub auto_create_work_orders: bool, // 后台调度后是否自动生成工单
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            collaborator_timeout_ms: 5000,
            alert_default_limit: 50,
            claim_ttl_secs: 600,
            auto_assign: false,
            auto_create_work_orders: true,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborator_timeout_ms.max(1))
    }

    pub fn claim_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.claim_ttl_secs.max(1))
    }
}

// ==========================================
// SchedulerConfigReader Trait
// ==========================================
// 实现者: ConfigManager（从 config_kv 表读取）
#[async_trait]
pub trait SchedulerConfigReader: Send + Sync {
    /// 后台调度间隔（秒），默认 300
    async fn get_interval_secs(&self) -> ConfigResult<u64>;

    /// 协作方调用超时（毫秒），默认 5000
    async fn get_collaborator_timeout_ms(&self) -> ConfigResult<u64>;

    /// 告警默认条数上限，默认 50
    async fn get_alert_default_limit(&self) -> ConfigResult<usize>;

    /// 工单占位令牌有效期（秒），默认 600
    async fn get_claim_ttl_secs(&self) -> ConfigResult<i64>;

    /// 是否自动派工，默认 false
    async fn get_auto_assign(&self) -> ConfigResult<bool>;

    /// 后台调度后是否自动生成工单，默认 true
    async fn get_auto_create_work_orders(&self) -> ConfigResult<bool>;

    /// 一次读取完整配置
    async fn load_scheduler_config(&self) -> ConfigResult<SchedulerConfig> {
        Ok(SchedulerConfig {
            interval_secs: self.get_interval_secs().await?,
            collaborator_timeout_ms: self.get_collaborator_timeout_ms().await?,
            alert_default_limit: self.get_alert_default_limit().await?,
            claim_ttl_secs: self.get_claim_ttl_secs().await?,
            auto_assign: self.get_auto_assign().await?,
            auto_create_work_orders: self.get_auto_create_work_orders().await?,
        })
    }
}
