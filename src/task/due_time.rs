//! 截止时间解析
//!
//! 模型通常已把自然语言转换成标准格式，这里兜底支持常见的相对说法：
//! 今天 / 明天 / 后天（today / tomorrow）加可选的时刻（15:30、3点、下午4点）。
//! 不带时刻的日期视为当天 23:59:59（本地时间）。

use std::sync::OnceLock;

use chrono::{DateTime, Days, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use regex::Regex;

use crate::core::AgentError;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

static CLOCK_RE: OnceLock<Regex> = OnceLock::new();
static PM_RE: OnceLock<Regex> = OnceLock::new();
static AM_RE: OnceLock<Regex> = OnceLock::new();
static CN_HOUR_RE: OnceLock<Regex> = OnceLock::new();

pub fn parse_due_time(input: &str) -> Result<DateTime<Utc>, AgentError> {
    parse_due_time_at(input, Local::now())
}

/// 以 now 为基准解析（便于测试）
pub fn parse_due_time_at(input: &str, now: DateTime<Local>) -> Result<DateTime<Utc>, AgentError> {
    let text = input.trim();
    if text.is_empty() {
        return Err(AgentError::Validation("empty due time".into()));
    }
    let lower = text.to_lowercase();

    let offset_days = if lower.contains("后天") || lower.contains("day after tomorrow") {
        Some(2)
    } else if lower.contains("明天") || lower.contains("tomorrow") {
        Some(1)
    } else if lower.contains("今天") || lower.contains("today") {
        Some(0)
    } else {
        None
    };
    if let Some(days) = offset_days {
        let date = now
            .date_naive()
            .checked_add_days(Days::new(days))
            .ok_or_else(|| AgentError::Validation(format!("due time out of range: {text}")))?;
        let time = match extract_time_of_day(text)? {
            Some(t) => t,
            None => end_of_day(),
        };
        return to_utc(date.and_time(time), text);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return to_utc(naive, text);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, fmt) {
            return to_utc(date.and_time(end_of_day()), text);
        }
    }

    Err(AgentError::Validation(format!("unrecognised due time: {text}")))
}

fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN)
}

fn to_utc(naive: NaiveDateTime, original: &str) -> Result<DateTime<Utc>, AgentError> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| AgentError::Validation(format!("nonexistent local time: {original}")))
}

fn hms(hour: u32, minute: u32, second: u32, original: &str) -> Result<NaiveTime, AgentError> {
    NaiveTime::from_hms_opt(hour, minute, second)
        .ok_or_else(|| AgentError::Validation(format!("invalid time of day in: {original}")))
}

fn capture_u32(caps: &regex::Captures<'_>, idx: usize) -> u32 {
    caps.get(idx)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// 提取时刻：15:30[:00]、下午4点、上午9点、3点[20分]
fn extract_time_of_day(text: &str) -> Result<Option<NaiveTime>, AgentError> {
    let clock = CLOCK_RE.get_or_init(|| Regex::new(r"(\d{1,2}):(\d{2})(?::(\d{2}))?").unwrap());
    if let Some(caps) = clock.captures(text) {
        let (h, m, s) = (capture_u32(&caps, 1), capture_u32(&caps, 2), capture_u32(&caps, 3));
        return hms(h, m, s, text).map(Some);
    }

    let pm = PM_RE.get_or_init(|| Regex::new(r"(?:下午|晚上)(\d{1,2})(?:点|时)(?:(\d{1,2})分?)?").unwrap());
    if let Some(caps) = pm.captures(text) {
        let mut h = capture_u32(&caps, 1);
        if h < 12 {
            h += 12;
        }
        return hms(h, capture_u32(&caps, 2), 0, text).map(Some);
    }

    let am = AM_RE.get_or_init(|| Regex::new(r"(?:上午|早上)(\d{1,2})(?:点|时)(?:(\d{1,2})分?)?").unwrap());
    if let Some(caps) = am.captures(text) {
        return hms(capture_u32(&caps, 1), capture_u32(&caps, 2), 0, text).map(Some);
    }

    let cn = CN_HOUR_RE.get_or_init(|| Regex::new(r"(\d{1,2})(?:点|时)(?:(\d{1,2})分?)?").unwrap());
    if let Some(caps) = cn.captures(text) {
        return hms(capture_u32(&caps, 1), capture_u32(&caps, 2), 0, text).map(Some);
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn base() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap()
    }

    fn local(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.with_timezone(&Local).naive_local()
    }

    #[test]
    fn test_absolute_formats() {
        let dt = parse_due_time_at("2025-03-12 18:30", base()).unwrap();
        assert_eq!(local(dt).to_string(), "2025-03-12 18:30:00");
        let dt = parse_due_time_at("2025/03/12", base()).unwrap();
        assert_eq!(local(dt).to_string(), "2025-03-12 23:59:59");
        assert!(parse_due_time_at("2025-03-12T10:00:00Z", base()).is_ok());
    }

    #[test]
    fn test_relative_days_with_time_of_day() {
        let dt = local(parse_due_time_at("明天下午3点", base()).unwrap());
        assert_eq!(dt.date().to_string(), "2025-03-11");
        assert_eq!(dt.hour(), 15);

        let dt = local(parse_due_time_at("后天 12:00", base()).unwrap());
        assert_eq!(dt.to_string(), "2025-03-12 12:00:00");

        let dt = local(parse_due_time_at("today", base()).unwrap());
        assert_eq!(dt.to_string(), "2025-03-10 23:59:59");
    }

    #[test]
    fn test_unparseable_is_validation_error() {
        assert!(matches!(
            parse_due_time_at("下周找个时间", base()),
            Err(AgentError::Validation(_))
        ));
        assert!(parse_due_time_at("明天 25:00", base()).is_err());
    }
}
