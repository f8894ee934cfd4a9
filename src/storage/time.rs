use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};

use crate::error::AppError;

/// Storage format: RFC3339 UTC with millisecond precision and a `Z` suffix, so
/// string order matches time order and the first ten chars are the UTC date.
pub fn to_db_string(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// 解析时间字符串为 UTC：优先 RFC3339，兼容 SQLite `datetime('now')` 的 `YYYY-MM-DD HH:MM:SS`
pub fn parse_datetime_string(s: &str) -> Result<DateTime<Utc>, AppError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| AppError::TimeParse(format!("{s:?}: {e}")))
}

/// Reads a timestamp column inside a rusqlite row mapper.
pub(crate) fn column_datetime(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_datetime_string(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
