// ==========================================
// 无人机机队维护调度系统 - 主入口
// ==========================================
// 用法:
//   drone-mx            启动后台调度，Ctrl-C 退出
//   drone-mx run-once   执行一次调度运行 + 工单生成，输出 JSON 后退出
// 数据库: 环境变量 DRONE_MX_DB_PATH，缺省为用户数据目录
// ==========================================

use anyhow::Context;
use drone_mx::app::{get_default_db_path, AppState};
use drone_mx::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("{}", drone_mx::APP_NAME);
    tracing::info!("系统版本: {}", drone_mx::VERSION);
    tracing::info!("==================================================");

    let db_path = get_default_db_path();
    tracing::info!("使用数据库: {}", db_path);

    let state = AppState::new(db_path)
        .await
        .map_err(anyhow::Error::msg)
        .context("无法初始化AppState")?;

    let mode = std::env::args().nth(1);
    if mode.as_deref() == Some("run-once") {
        return run_once(&state).await;
    }

    let handle = state.start_worker();

    tokio::signal::ctrl_c().await.context("信号监听失败")?;
    tracing::info!("收到 Ctrl-C，正在停止后台调度...");

    state.shutdown();
    handle.await.context("后台调度任务异常退出")?;

    tracing::info!("已退出");
    Ok(())
}

/// 单次执行
async fn run_once(state: &AppState) -> anyhow::Result<()> {
    let summary = state.maintenance_api.run_scheduler().await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if state.config.auto_create_work_orders {
        let result = state.maintenance_api.create_work_orders(None).await?;
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    let counts = state.maintenance_api.get_schedule_counts()?;
    println!("{}", serde_json::to_string_pretty(&counts)?);
    Ok(())
}
