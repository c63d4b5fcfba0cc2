// ==========================================
// 无人机机队维护调度系统 - 日志输出
// ==========================================
// 调度运行、工单生成、完工补登都以结构化字段记录
// （schedule_id / aircraft_id / work_order_id），便于按机体或工单检索
// ==========================================

use tracing_subscriber::{fmt, EnvFilter};

/// 未设置 RUST_LOG 时的过滤规则
/// 引擎层保留 info（状态推进、工单关联），其余依赖库只看 warn
const DEFAULT_DIRECTIVES: &str = "warn,drone_mx=info";

/// 输出格式选择
const FORMAT_ENV: &str = "DRONE_MX_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json, // 交给日志采集
}

impl LogFormat {
    fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// 进程启动时安装全局订阅者
///
/// RUST_LOG 优先，例如 `RUST_LOG=drone_mx::engine::work_orders=debug`；
/// DRONE_MX_LOG_FORMAT=json 切换为单行 JSON。
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));
    let format = LogFormat::parse(std::env::var(FORMAT_ENV).ok().as_deref());

    match format {
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init(),
        LogFormat::Text => fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_line_number(true)
            .init(),
    }
}

/// 测试用：debug 级别写入测试输出，可重复调用
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("drone_mx=debug"))
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse(Some("json")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some(" JSON ")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("pretty")), LogFormat::Text);
        assert_eq!(LogFormat::parse(None), LogFormat::Text);
    }

    #[test]
    fn test_default_directives_parse() {
        assert!(EnvFilter::try_new(DEFAULT_DIRECTIVES).is_ok());
    }
}
