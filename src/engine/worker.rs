// ==========================================
// 无人机机队维护调度系统 - 后台调度 Worker
// ==========================================
// 职责: 按配置间隔循环执行「调度运行 → 工单生成」，直到收到取消信号
// 说明: 每轮开始时重新读取配置；单轮失败只记录日志，不退出循环
// ==========================================

use crate::config::scheduler_config::{SchedulerConfig, SchedulerConfigReader};
use crate::engine::scheduler::{RunSummary, SchedulerRunner};
use crate::engine::work_orders::{WorkOrderBatchResult, WorkOrderGenerator};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 单轮执行结果
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub run: Option<RunSummary>,
    pub work_orders: Option<WorkOrderBatchResult>,
}

// ==========================================
// SchedulerWorker
// ==========================================
pub struct SchedulerWorker {
    runner: Arc<SchedulerRunner>,
    generator: Arc<WorkOrderGenerator>,
    config: Arc<dyn SchedulerConfigReader>,
}

impl SchedulerWorker {
    pub fn new(
        runner: Arc<SchedulerRunner>,
        generator: Arc<WorkOrderGenerator>,
        config: Arc<dyn SchedulerConfigReader>,
    ) -> Self {
        Self {
            runner,
            generator,
            config,
        }
    }

    /// 在后台任务中启动循环
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// 循环执行直到取消
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!("后台调度启动");

        loop {
            let config = self.load_config().await;
            self.tick(&config, &cancel).await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(config.interval()) => {}
            }
        }

        tracing::info!("后台调度已停止");
    }

    /// 执行一轮
    pub async fn tick(&self, config: &SchedulerConfig, cancel: &CancellationToken) -> TickReport {
        let mut report = TickReport::default();

        match self.runner.run(cancel).await {
            Ok(summary) => report.run = Some(summary),
            Err(e) => {
                tracing::error!("调度运行失败: {}", e);
                return report;
            }
        }

        if config.auto_create_work_orders && !cancel.is_cancelled() {
            match self
                .generator
                .create_work_orders(config.auto_assign, cancel)
                .await
            {
                Ok(result) => report.work_orders = Some(result),
                Err(e) => tracing::error!("工单生成失败: {}", e),
            }
        }

        report
    }

    async fn load_config(&self) -> SchedulerConfig {
        match self.config.load_scheduler_config().await {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("配置读取失败，使用默认值: {}", e);
                SchedulerConfig::default()
            }
        }
    }
}
