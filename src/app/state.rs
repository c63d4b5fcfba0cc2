// ==========================================
// 无人机机队维护调度系统 - 应用状态
// ==========================================
// 职责: 装配仓储、引擎、API 与后台调度 Worker，管理共享资源
// ==========================================

use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{CatalogApi, MaintenanceApi};
use crate::config::config_manager::ConfigManager;
use crate::config::scheduler_config::{SchedulerConfig, SchedulerConfigReader};
use crate::engine::collaborators::{
    AircraftRegistry, MetricProvider, TriggerCatalog, WorkOrderClosedListener, WorkOrderService,
};
use crate::engine::{
    AlertAggregator, CompletionHandler, ScheduleInitializer, ScheduleStore, SchedulerRunner,
    SchedulerWorker, WorkOrderGenerator,
};
use crate::repository::{
    ComplianceRecordRepository, FleetRepository, MaintenanceCatalogRepository,
    MaintenanceScheduleRepository, WorkOrderRepository,
};

/// 应用状态
///
/// 包含所有API实例和共享资源
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 共享连接
    pub conn: Arc<Mutex<Connection>>,

    /// 启动时加载的配置
    pub config: SchedulerConfig,

    /// 配置管理器
    pub config_manager: Arc<ConfigManager>,

    /// 维护调度API
    pub maintenance_api: Arc<MaintenanceApi>,

    /// 维护大纲管理API
    pub catalog_api: Arc<CatalogApi>,

    /// 机队仓储（本地指标源）
    pub fleet_repo: Arc<FleetRepository>,

    /// 工单仓储（本地工单服务）
    pub work_order_repo: Arc<WorkOrderRepository>,

    /// 后台调度
    pub worker: Arc<SchedulerWorker>,

    /// 关闭信号
    pub shutdown: CancellationToken,
}

impl AppState {
    /// 创建新的AppState实例
    ///
    /// # 说明
    /// 该方法会：
    /// 1. 打开数据库并建表
    /// 2. 加载调度配置
    /// 3. 初始化所有Repository与Engine
    /// 4. 注册工单关闭回调
    /// 5. 创建API实例
    pub async fn new(db_path: String) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let conn = crate::db::open_shared_connection(&db_path)
            .map_err(|e| format!("无法打开数据库: {}", e))?;

        // ==========================================
        // 配置
        // ==========================================
        let config_manager = Arc::new(
            ConfigManager::from_connection(conn.clone())
                .map_err(|e| format!("无法创建ConfigManager: {}", e))?,
        );
        let config = config_manager
            .load_scheduler_config()
            .await
            .map_err(|e| format!("配置加载失败: {}", e))?;
        tracing::info!(
            interval_secs = config.interval_secs,
            collaborator_timeout_ms = config.collaborator_timeout_ms,
            auto_create_work_orders = config.auto_create_work_orders,
            "调度配置已加载"
        );

        // ==========================================
        // 初始化Repository层
        // ==========================================
        let catalog_repo = Arc::new(MaintenanceCatalogRepository::new(conn.clone()));
        let schedule_repo = Arc::new(MaintenanceScheduleRepository::new(conn.clone()));
        let compliance_repo = Arc::new(ComplianceRecordRepository::new(conn.clone()));
        let fleet_repo = Arc::new(FleetRepository::new(conn.clone()));
        let work_order_repo = Arc::new(WorkOrderRepository::new(conn.clone()));

        // 协作方接口（本地 SQLite 适配器）
        let catalog: Arc<dyn TriggerCatalog> = catalog_repo.clone();
        let metrics: Arc<dyn MetricProvider> = fleet_repo.clone();
        let registry: Arc<dyn AircraftRegistry> = fleet_repo.clone();
        let work_orders: Arc<dyn WorkOrderService> = work_order_repo.clone();

        // ==========================================
        // 初始化Engine层
        // ==========================================
        let timeout = config.collaborator_timeout();
        let store = Arc::new(ScheduleStore::new(schedule_repo));
        let completion = Arc::new(CompletionHandler::new(
            store.clone(),
            catalog.clone(),
            metrics.clone(),
            work_orders.clone(),
            timeout,
        ));
        let runner = Arc::new(SchedulerRunner::new(
            store.clone(),
            catalog.clone(),
            metrics.clone(),
            completion.clone(),
            timeout,
        ));
        let alerts = Arc::new(AlertAggregator::new(
            store.clone(),
            catalog.clone(),
            metrics.clone(),
            timeout,
            config.alert_default_limit,
        ));
        let generator = Arc::new(WorkOrderGenerator::new(
            store.clone(),
            catalog.clone(),
            work_orders.clone(),
            timeout,
            config.claim_ttl(),
        ));
        let initializer = Arc::new(ScheduleInitializer::new(
            store.clone(),
            registry,
            catalog,
            metrics,
            timeout,
        ));

        // 工单关闭 → 完工处理
        let listener: Arc<dyn WorkOrderClosedListener> = completion.clone();
        work_orders.subscribe_closed(listener);

        let config_reader: Arc<dyn SchedulerConfigReader> = config_manager.clone();
        let shutdown = CancellationToken::new();

        let worker = Arc::new(SchedulerWorker::new(
            runner.clone(),
            generator.clone(),
            config_reader.clone(),
        ));

        // ==========================================
        // 创建API实例
        // ==========================================
        let maintenance_api = Arc::new(MaintenanceApi::new(
            store.clone(),
            runner,
            alerts,
            initializer,
            completion,
            generator,
            compliance_repo,
            fleet_repo.clone(),
            config_reader,
            shutdown.clone(),
        ));
        let catalog_api = Arc::new(CatalogApi::new(catalog_repo, store));

        tracing::info!("AppState初始化完成");

        Ok(Self {
            db_path,
            conn,
            config,
            config_manager,
            maintenance_api,
            catalog_api,
            fleet_repo,
            work_order_repo,
            worker,
            shutdown,
        })
    }

    /// 启动后台调度
    pub fn start_worker(&self) -> JoinHandle<()> {
        self.worker.clone().spawn(self.shutdown.clone())
    }

    /// 发出关闭信号（后台调度与进行中的按需运行在两条计划之间停止）
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// 获取默认数据库路径
///
/// 优先级: 环境变量 DRONE_MX_DB_PATH → 用户数据目录 → 当前目录
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var("DRONE_MX_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./drone_mx.db");

    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("drone-mx");
        match std::fs::create_dir_all(&dir) {
            Ok(()) => path = dir.join("drone_mx.db"),
            Err(e) => tracing::warn!("数据目录创建失败，使用当前目录: {}", e),
        }
    }

    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_default_db_path() {
        let path = get_default_db_path();
        assert!(!path.is_empty());
        assert!(path.ends_with(".db"));
    }

    #[tokio::test]
    async fn test_app_state_wires_on_fresh_database() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state.db").to_string_lossy().to_string();

        let state = AppState::new(db_path).await.unwrap();
        assert_eq!(state.config.interval_secs, 300);

        let counts = state.maintenance_api.get_schedule_counts().unwrap();
        assert_eq!(counts.pending + counts.due + counts.overdue + counts.completed, 0);

        state.shutdown();
        assert!(state.shutdown.is_cancelled());
    }
}
