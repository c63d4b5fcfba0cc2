// ==========================================
// 无人机机队维护调度系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::scheduler_config::{ConfigResult, SchedulerConfigReader};
use crate::db::open_sqlite_connection;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> ConfigResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        crate::db::ensure_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ConfigResult<Self> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    fn get_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        Ok(value)
    }

    /// 读取 global scope 的配置值（公开方法，供其他模块复用）
    pub fn get_global_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        self.get_config_value(key)
    }

    /// 写入 global scope 的配置值（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> ConfigResult<()> {
        let key = key.trim();
        if key.is_empty() {
            return Err("配置键不能为空".into());
        }

        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value, updated_at) VALUES ('global', ?1, ?2, datetime('now'))
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;

        tracing::info!(config_key = key, value = value, "配置已更新");
        Ok(())
    }

    /// 读取并解析配置，缺失或格式错误时返回默认值
    fn get_parsed_or_default<T>(&self, key: &str, default: T) -> ConfigResult<T>
    where
        T: FromStr + Copy,
    {
        let raw = match self.get_config_value(key)? {
            Some(v) => v,
            None => return Ok(default),
        };

        match raw.trim().parse::<T>() {
            Ok(v) => Ok(v),
            Err(_) => {
                tracing::warn!(
                    config_key = key,
                    raw_value = %raw,
                    "配置格式错误，使用默认值"
                );
                Ok(default)
            }
        }
    }

    /// 获取所有配置的快照（JSON格式，按键排序）
    pub fn get_config_snapshot(&self) -> ConfigResult<String> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;

        let mut config_map: BTreeMap<String, String> = BTreeMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        Ok(serde_json::to_string(&json!(config_map))?)
    }

    /// 从配置快照恢复配置（覆盖同名键）
    ///
    /// # 返回
    /// - Ok(usize): 恢复的配置项数量
    pub fn restore_config_from_snapshot(&self, snapshot_json: &str) -> ConfigResult<usize> {
        let config_map: BTreeMap<String, String> = serde_json::from_str(snapshot_json)?;

        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        let tx = conn.unchecked_transaction()?;

        let mut count = 0;
        for (key, value) in config_map.iter() {
            count += tx.execute(
                "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
                 ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2",
                params![key, value],
            )?;
        }

        tx.commit()?;
        Ok(count)
    }
}

// ==========================================
// SchedulerConfigReader Trait 实现
// ==========================================
#[async_trait]
impl SchedulerConfigReader for ConfigManager {
    async fn get_interval_secs(&self) -> ConfigResult<u64> {
        self.get_parsed_or_default(config_keys::SCHEDULER_INTERVAL_SECS, 300)
    }

    async fn get_collaborator_timeout_ms(&self) -> ConfigResult<u64> {
        self.get_parsed_or_default(config_keys::COLLABORATOR_TIMEOUT_MS, 5000)
    }

    async fn get_alert_default_limit(&self) -> ConfigResult<usize> {
        self.get_parsed_or_default(config_keys::ALERT_DEFAULT_LIMIT, 50)
    }

    async fn get_claim_ttl_secs(&self) -> ConfigResult<i64> {
        self.get_parsed_or_default(config_keys::WORK_ORDER_CLAIM_TTL_SECS, 600)
    }

    async fn get_auto_assign(&self) -> ConfigResult<bool> {
        self.get_parsed_or_default(config_keys::WORK_ORDER_AUTO_ASSIGN, false)
    }

    async fn get_auto_create_work_orders(&self) -> ConfigResult<bool> {
        self.get_parsed_or_default(config_keys::WORK_ORDER_AUTO_CREATE, true)
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 调度
    pub const SCHEDULER_INTERVAL_SECS: &str = "scheduler/interval_secs";
    pub const COLLABORATOR_TIMEOUT_MS: &str = "scheduler/collaborator_timeout_ms";

    // 告警
    pub const ALERT_DEFAULT_LIMIT: &str = "alerts/default_limit";

    // 工单
    pub const WORK_ORDER_CLAIM_TTL_SECS: &str = "work_order/claim_ttl_secs";
    pub const WORK_ORDER_AUTO_ASSIGN: &str = "work_order/auto_assign";
    pub const WORK_ORDER_AUTO_CREATE: &str = "work_order/auto_create";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::scheduler_config::SchedulerConfig;

    fn manager() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::ensure_schema(&conn).unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[tokio::test]
    async fn test_defaults_when_table_empty() {
        let config = manager().load_scheduler_config().await.unwrap();
        assert_eq!(config, SchedulerConfig::default());
    }

    #[tokio::test]
    async fn test_override_and_bad_value_fallback() {
        let cm = manager();
        cm.set_global_config_value(config_keys::SCHEDULER_INTERVAL_SECS, "60")
            .unwrap();
        cm.set_global_config_value(config_keys::ALERT_DEFAULT_LIMIT, "abc")
            .unwrap();
        cm.set_global_config_value(config_keys::WORK_ORDER_AUTO_ASSIGN, "true")
            .unwrap();

        let config = cm.load_scheduler_config().await.unwrap();
        assert_eq!(config.interval_secs, 60);
        assert_eq!(config.alert_default_limit, 50);
        assert!(config.auto_assign);
    }

    #[test]
    fn test_snapshot_restore() {
        let cm = manager();
        cm.set_global_config_value(config_keys::WORK_ORDER_CLAIM_TTL_SECS, "120")
            .unwrap();
        let snapshot = cm.get_config_snapshot().unwrap();
        assert!(snapshot.contains("work_order/claim_ttl_secs"));

        cm.set_global_config_value(config_keys::WORK_ORDER_CLAIM_TTL_SECS, "900")
            .unwrap();
        assert_eq!(cm.restore_config_from_snapshot(&snapshot).unwrap(), 1);
        assert_eq!(
            cm.get_global_config_value(config_keys::WORK_ORDER_CLAIM_TTL_SECS)
                .unwrap()
                .as_deref(),
            Some("120")
        );
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(manager().set_global_config_value("  ", "1").is_err());
    }
}
