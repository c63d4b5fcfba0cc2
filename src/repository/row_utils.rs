// ==========================================
// 无人机机队维护调度系统 - 仓储层行映射辅助
// ==========================================
// 日期/时间/枚举列解析失败时转换为 rusqlite 的 FromSqlConversionFailure，
// 避免在仓储层静默写入默认值
// ==========================================

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

/// 解析 "%Y-%m-%d" 日期列
pub fn parse_date(idx: usize, raw: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| conversion_error(idx, format!("日期格式错误 '{}': {}", raw, e)))
}

/// 解析 RFC3339 时间列
pub fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, format!("时间格式错误 '{}': {}", raw, e)))
}

/// 解析枚举列
pub fn parse_enum<T>(
    idx: usize,
    raw: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    parse(raw).ok_or_else(|| conversion_error(idx, format!("未知枚举值 '{}'", raw)))
}

/// 日期列写入格式
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// 时间列写入格式
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

/// bool 列读取（SQLite 以 INTEGER 存储）
pub fn int_to_bool(v: i64) -> bool {
    v != 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::ScheduleStatus;
    use chrono::TimeZone;

    #[test]
    fn test_parse_round_trip() {
        let d = NaiveDate::from_ymd_opt(2026, 2, 28).unwrap();
        assert_eq!(parse_date(0, &format_date(d)).unwrap(), d);

        let ts = Utc.with_ymd_and_hms(2026, 2, 28, 23, 59, 1).unwrap();
        assert_eq!(parse_timestamp(0, &format_timestamp(ts)).unwrap(), ts);
    }

    #[test]
    fn test_parse_errors_are_conversion_failures() {
        assert!(matches!(
            parse_date(3, "2026/02/28"),
            Err(rusqlite::Error::FromSqlConversionFailure(3, _, _))
        ));
        assert!(parse_enum(1, "HALF_DONE", ScheduleStatus::from_str).is_err());
    }
}
