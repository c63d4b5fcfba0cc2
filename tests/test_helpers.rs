// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 临时数据库、组件装配、测试数据登记、协作方替身
// ==========================================

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use drone_mx::api::{CatalogApi, CreateProgramRequest, CreateTriggerRequest, MaintenanceApi};
use drone_mx::config::{ConfigManager, SchedulerConfigReader};
use drone_mx::domain::{
    Aircraft, AircraftMetrics, MaintenanceProgram, MaintenanceTrigger, TriggerType, WorkOrderClosed,
    WorkOrderTask,
};
use drone_mx::engine::collaborators::{
    AircraftRegistry, CollaboratorError, CollaboratorResult, MetricProvider, TriggerCatalog,
    WorkOrderClosedListener, WorkOrderService,
};
use drone_mx::engine::{
    AlertAggregator, CompletionHandler, ScheduleInitializer, ScheduleStore, SchedulerRunner,
    WorkOrderGenerator,
};
use drone_mx::repository::{
    ComplianceRecordRepository, FleetRepository, MaintenanceCatalogRepository,
    MaintenanceScheduleRepository, WorkOrderRepository,
};
use rusqlite::Connection;
use std::collections::HashSet;
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;

/// 测试默认的协作方超时
pub const TEST_TIMEOUT: Duration = Duration::from_millis(200);

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file
        .path()
        .to_str()
        .ok_or("临时文件路径非 UTF-8")?
        .to_string();

    let conn = Connection::open(&db_path)?;
    drone_mx::db::configure_sqlite_connection(&conn)?;
    drone_mx::db::ensure_schema(&conn)?;

    Ok((temp_file, db_path))
}

// ==========================================
// TestEnv - 装配好的测试环境
// ==========================================
pub struct TestEnv {
    pub _temp_file: NamedTempFile,
    pub db_path: String,
    pub conn: Arc<Mutex<Connection>>,

    pub catalog_repo: Arc<MaintenanceCatalogRepository>,
    pub schedule_repo: Arc<MaintenanceScheduleRepository>,
    pub compliance_repo: Arc<ComplianceRecordRepository>,
    pub fleet_repo: Arc<FleetRepository>,
    pub work_order_repo: Arc<WorkOrderRepository>,
    pub config_manager: Arc<ConfigManager>,

    pub store: Arc<ScheduleStore>,
    pub runner: Arc<SchedulerRunner>,
    pub alerts: Arc<AlertAggregator>,
    pub generator: Arc<WorkOrderGenerator>,
    pub completion: Arc<CompletionHandler>,
    pub initializer: Arc<ScheduleInitializer>,

    pub maintenance_api: MaintenanceApi,
    pub catalog_api: CatalogApi,
    pub shutdown: CancellationToken,
}

/// 环境构建选项
#[derive(Default)]
pub struct EnvOptions {
    pub catalog: Option<Arc<dyn TriggerCatalog>>,
    pub metrics: Option<Arc<dyn MetricProvider>>,
    pub work_orders: Option<Arc<dyn WorkOrderService>>,
    pub timeout: Option<Duration>,
}

impl TestEnv {
    /// 使用本地 SQLite 适配器作为全部协作方
    pub fn new() -> Self {
        Self::with_options(EnvOptions::default())
    }

    pub fn with_options(options: EnvOptions) -> Self {
        let (temp_file, db_path) = create_test_db().unwrap();
        let conn = drone_mx::db::open_shared_connection(&db_path).unwrap();

        let catalog_repo = Arc::new(MaintenanceCatalogRepository::new(conn.clone()));
        let schedule_repo = Arc::new(MaintenanceScheduleRepository::new(conn.clone()));
        let compliance_repo = Arc::new(ComplianceRecordRepository::new(conn.clone()));
        let fleet_repo = Arc::new(FleetRepository::new(conn.clone()));
        let work_order_repo = Arc::new(WorkOrderRepository::new(conn.clone()));
        let config_manager = Arc::new(ConfigManager::from_connection(conn.clone()).unwrap());

        let timeout = options.timeout.unwrap_or(TEST_TIMEOUT);
        let catalog: Arc<dyn TriggerCatalog> =
            options.catalog.unwrap_or_else(|| catalog_repo.clone());
        let registry: Arc<dyn AircraftRegistry> = fleet_repo.clone();
        let metrics: Arc<dyn MetricProvider> =
            options.metrics.unwrap_or_else(|| fleet_repo.clone());
        let work_orders: Arc<dyn WorkOrderService> =
            options.work_orders.unwrap_or_else(|| work_order_repo.clone());

        let store = Arc::new(ScheduleStore::new(schedule_repo.clone()));
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
            50,
        ));
        let generator = Arc::new(WorkOrderGenerator::new(
            store.clone(),
            catalog.clone(),
            work_orders.clone(),
            timeout,
            chrono::Duration::minutes(10),
        ));
        let initializer = Arc::new(ScheduleInitializer::new(
            store.clone(),
            registry,
            catalog,
            metrics,
            timeout,
        ));

        // 本地工单仓储的关闭事件总是接到完工处理
        let listener: Arc<dyn WorkOrderClosedListener> = completion.clone();
        work_order_repo.subscribe_closed(listener);

        let shutdown = CancellationToken::new();
        let config_reader: Arc<dyn SchedulerConfigReader> = config_manager.clone();
        let maintenance_api = MaintenanceApi::new(
            store.clone(),
            runner.clone(),
            alerts.clone(),
            initializer.clone(),
            completion.clone(),
            generator.clone(),
            compliance_repo.clone(),
            fleet_repo.clone(),
            config_reader,
            shutdown.clone(),
        );
        let catalog_api = CatalogApi::new(catalog_repo.clone(), store.clone());

        Self {
            _temp_file: temp_file,
            db_path,
            conn,
            catalog_repo,
            schedule_repo,
            compliance_repo,
            fleet_repo,
            work_order_repo,
            config_manager,
            store,
            runner,
            alerts,
            generator,
            completion,
            initializer,
            maintenance_api,
            catalog_api,
            shutdown,
        }
    }

    // ==========================================
    // 测试数据登记
    // ==========================================

    /// 登记大纲（适用全部机型）
    pub fn seed_program(&self, code: &str) -> MaintenanceProgram {
        self.catalog_api
            .create_program(CreateProgramRequest {
                code: code.to_string(),
                name: format!("{} 维护大纲", code),
                aircraft_model: None,
                is_default: true,
            })
            .unwrap()
    }

    /// 登记触发条件
    pub fn seed_trigger(
        &self,
        program_id: &str,
        code: &str,
        trigger_type: TriggerType,
        interval_value: f64,
        warning_threshold: f64,
        recurring: bool,
    ) -> MaintenanceTrigger {
        self.catalog_api
            .create_trigger(CreateTriggerRequest {
                program_id: program_id.to_string(),
                code: code.to_string(),
                name: format!("{} 检查", code),
                description: None,
                trigger_type,
                interval_value,
                warning_threshold,
                recurring,
                task_template: Some(format!("{} 作业卡", code)),
            })
            .unwrap()
    }

    /// 登记机体与初始飞行小时
    pub fn register_aircraft(
        &self,
        aircraft_id: &str,
        model: &str,
        commissioned_on: Option<NaiveDate>,
        flight_hours: f64,
    ) {
        let aircraft = Aircraft {
            aircraft_id: aircraft_id.to_string(),
            model: model.to_string(),
            commissioned_on,
            is_active: true,
        };
        self.fleet_repo
            .upsert_aircraft(&aircraft, &metrics(aircraft_id, flight_hours, Utc::now()))
            .unwrap();
    }

    /// 回传飞行小时
    pub fn set_flight_hours(&self, aircraft_id: &str, flight_hours: f64) {
        self.fleet_repo
            .record_metrics(&metrics(aircraft_id, flight_hours, Utc::now()))
            .unwrap();
    }

    /// 当前工单总数
    pub fn work_order_count(&self) -> i64 {
        self.work_order_repo.count_all().unwrap()
    }
}

/// 构造指标快照（循环数与小时数同步）
pub fn metrics(aircraft_id: &str, flight_hours: f64, as_of: DateTime<Utc>) -> AircraftMetrics {
    AircraftMetrics {
        aircraft_id: aircraft_id.to_string(),
        flight_hours,
        flight_cycles: flight_hours,
        battery_cycles: flight_hours,
        as_of,
    }
}

// ==========================================
// 协作方替身
// ==========================================

/// 对指定机体延迟响应的指标源（其余透传到本地机队仓储）
pub struct ScriptedMetricProvider {
    inner: Mutex<Option<Arc<dyn MetricProvider>>>,
    slow: Mutex<HashSet<String>>,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl ScriptedMetricProvider {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: Mutex::new(None),
            slow: Mutex::new(HashSet::new()),
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    /// 环境建好后接入真实指标源
    pub fn attach(&self, inner: Arc<dyn MetricProvider>) {
        *self.inner.lock().unwrap() = Some(inner);
    }

    pub fn set_slow(&self, aircraft_id: &str, slow: bool) {
        let mut guard = self.slow.lock().unwrap();
        if slow {
            guard.insert(aircraft_id.to_string());
        } else {
            guard.remove(aircraft_id);
        }
    }
}

#[async_trait]
impl MetricProvider for ScriptedMetricProvider {
    async fn get_current_metrics(&self, aircraft_id: &str) -> CollaboratorResult<AircraftMetrics> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let is_slow = self.slow.lock().unwrap().contains(aircraft_id);
        if is_slow {
            tokio::time::sleep(self.delay).await;
        }

        let inner = self.inner.lock().unwrap().clone();
        match inner {
            Some(provider) => provider.get_current_metrics(aircraft_id).await,
            None => Err(CollaboratorError::Unavailable("指标源未接入".to_string())),
        }
    }
}

/// 对指定触发条件延迟响应的大纲目录（其余透传到本地大纲仓储）
pub struct ScriptedCatalog {
    inner: Mutex<Option<Arc<dyn TriggerCatalog>>>,
    slow: Mutex<HashSet<String>>,
    delay: Duration,
}

impl ScriptedCatalog {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: Mutex::new(None),
            slow: Mutex::new(HashSet::new()),
            delay,
        }
    }

    pub fn attach(&self, inner: Arc<dyn TriggerCatalog>) {
        *self.inner.lock().unwrap() = Some(inner);
    }

    pub fn set_slow(&self, trigger_id: &str, slow: bool) {
        let mut guard = self.slow.lock().unwrap();
        if slow {
            guard.insert(trigger_id.to_string());
        } else {
            guard.remove(trigger_id);
        }
    }

    fn inner(&self) -> CollaboratorResult<Arc<dyn TriggerCatalog>> {
        self.inner
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| CollaboratorError::Unavailable("大纲目录未接入".to_string()))
    }
}

#[async_trait]
impl TriggerCatalog for ScriptedCatalog {
    async fn get_active_triggers(&self, aircraft_model: &str) -> CollaboratorResult<Vec<MaintenanceTrigger>> {
        self.inner()?.get_active_triggers(aircraft_model).await
    }

    async fn get_trigger(&self, trigger_id: &str) -> CollaboratorResult<MaintenanceTrigger> {
        let is_slow = self.slow.lock().unwrap().contains(trigger_id);
        if is_slow {
            tokio::time::sleep(self.delay).await;
        }
        self.inner()?.get_trigger(trigger_id).await
    }

    async fn get_program(&self, program_id: &str) -> CollaboratorResult<MaintenanceProgram> {
        self.inner()?.get_program(program_id).await
    }
}

/// 前 N 次创建失败的工单服务（之后透传到本地工单仓储）
///
/// lost_replies: 工单已写入、但应答丢失（调用方只看到超时）的次数
pub struct FlakyWorkOrderService {
    inner: Mutex<Option<Arc<WorkOrderRepository>>>,
    failures_left: AtomicUsize,
    lost_replies_left: AtomicUsize,
    pub attempts: AtomicUsize,
}

impl FlakyWorkOrderService {
    pub fn new(failures: usize) -> Self {
        Self {
            inner: Mutex::new(None),
            failures_left: AtomicUsize::new(failures),
            lost_replies_left: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn with_lost_replies(self, lost_replies: usize) -> Self {
        self.lost_replies_left.store(lost_replies, Ordering::SeqCst);
        self
    }

    fn inner(&self) -> CollaboratorResult<Arc<WorkOrderRepository>> {
        self.inner
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| CollaboratorError::Unavailable("工单服务未接入".to_string()))
    }

    pub fn attach(&self, inner: Arc<WorkOrderRepository>) {
        *self.inner.lock().unwrap() = Some(inner);
    }
}

#[async_trait]
impl WorkOrderService for FlakyWorkOrderService {
    async fn create(
        &self,
        aircraft_id: &str,
        schedule_id: &str,
        task: &WorkOrderTask,
    ) -> CollaboratorResult<String> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(CollaboratorError::Unavailable("工单服务维护中".to_string()));
        }

        let work_order_id = self.inner()?.create(aircraft_id, schedule_id, task).await?;

        let lost = self
            .lost_replies_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lost {
            return Err(CollaboratorError::Timeout(format!("Create({}) 应答丢失", schedule_id)));
        }
        Ok(work_order_id)
    }

    async fn get_closed(&self, work_order_id: &str) -> CollaboratorResult<Option<WorkOrderClosed>> {
        self.inner()?.get_closed(work_order_id).await
    }

    async fn find_open(&self, schedule_id: &str) -> CollaboratorResult<Option<String>> {
        self.inner()?.find_open(schedule_id).await
    }

    fn subscribe_closed(&self, listener: Arc<dyn WorkOrderClosedListener>) {
        if let Some(repo) = self.inner.lock().unwrap().as_ref() {
            repo.subscribe_closed(listener);
        }
    }
}
