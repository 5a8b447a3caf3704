//! 触发器解析与触发时刻计算
//!
//! 任务表里触发器以 (trigger_type, trigger_value) 两个字符串存储：
//! - interval: JSON，如 `{"unit": "hours", "value": 2}`
//! - cron: 标准5字段crontab表达式（也接受带秒的6/7字段）
//! - date: ISO 8601时间点，一次性触发
//! - immediate: 只在创建时立即执行一次，不登记周期job

use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use cron::Schedule;
use kumo_core::{SchedulerError, SchedulerResult};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl IntervalUnit {
    pub fn to_duration(self, amount: i64) -> Duration {
        match self {
            IntervalUnit::Seconds => Duration::seconds(amount),
            IntervalUnit::Minutes => Duration::minutes(amount),
            IntervalUnit::Hours => Duration::hours(amount),
            IntervalUnit::Days => Duration::days(amount),
            IntervalUnit::Weeks => Duration::weeks(amount),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IntervalValue {
    unit: IntervalUnit,
    value: i64,
}

/// 解析后的触发器
#[derive(Debug, Clone)]
pub enum Trigger {
    Interval { unit: IntervalUnit, amount: i64 },
    Cron(Box<Schedule>),
    Date(DateTime<Utc>),
    Immediate,
}

impl Trigger {
    pub fn parse(trigger_type: &str, trigger_value: &str) -> SchedulerResult<Self> {
        match trigger_type {
            "interval" => {
                let parsed: IntervalValue =
                    serde_json::from_str(trigger_value).map_err(|e| invalid("interval", e))?;
                if parsed.value <= 0 {
                    return Err(SchedulerError::InvalidTrigger {
                        kind: "interval".to_string(),
                        message: "间隔必须为正数".to_string(),
                    });
                }
                Ok(Trigger::Interval {
                    unit: parsed.unit,
                    amount: parsed.value,
                })
            }
            "cron" => parse_cron(trigger_value).map(|s| Trigger::Cron(Box::new(s))),
            "date" => parse_date(trigger_value).map(Trigger::Date),
            "immediate" => Ok(Trigger::Immediate),
            other => Err(SchedulerError::InvalidTrigger {
                kind: other.to_string(),
                message: "未知的触发器类型".to_string(),
            }),
        }
    }

    /// 计算now之后的下一次触发时刻。
    ///
    /// date触发器到期后仍返回该时刻（补触发一次），由job循环在触发
    /// 后自行退出；immediate没有触发时刻。
    pub fn next_fire(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Interval { unit, amount } => Some(now + unit.to_duration(*amount)),
            Trigger::Cron(schedule) => schedule.after(&now).next(),
            Trigger::Date(at) => Some((*at).max(now)),
            Trigger::Immediate => None,
        }
    }

    /// 是否只触发一次（触发后job循环退出）
    pub fn fires_once(&self) -> bool {
        matches!(self, Trigger::Date(_))
    }
}

fn invalid(kind: &str, err: impl std::fmt::Display) -> SchedulerError {
    SchedulerError::InvalidTrigger {
        kind: kind.to_string(),
        message: err.to_string(),
    }
}

/// cron crate要求带秒字段的表达式，标准5字段crontab前置"0 "。
fn parse_cron(expr: &str) -> SchedulerResult<Schedule> {
    let trimmed = expr.trim();
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    };
    Schedule::from_str(&normalized).map_err(|e| invalid("cron", e))
}

fn parse_date(value: &str) -> SchedulerResult<DateTime<Utc>> {
    let trimmed = value.trim();
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(with_offset.with_timezone(&Utc));
    }
    // 无时区的本地格式按UTC处理
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S"))
        .map(|naive| naive.and_utc())
        .map_err(|e| invalid("date", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_interval() {
        let trigger = Trigger::parse("interval", r#"{"unit": "hours", "value": 2}"#).unwrap();
        let now = Utc::now();
        assert_eq!(trigger.next_fire(now), Some(now + Duration::hours(2)));
        assert!(!trigger.fires_once());
    }

    #[test]
    fn test_parse_interval_rejects_non_positive() {
        assert!(Trigger::parse("interval", r#"{"unit": "seconds", "value": 0}"#).is_err());
        assert!(Trigger::parse("interval", r#"{"unit": "seconds", "value": -5}"#).is_err());
    }

    #[test]
    fn test_parse_interval_rejects_malformed_json() {
        let err = Trigger::parse("interval", "every 5 minutes").unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTrigger { .. }));
    }

    #[test]
    fn test_parse_five_field_cron() {
        // 每天凌晨3点
        let trigger = Trigger::parse("cron", "0 3 * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let next = trigger.next_fire(now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 2, 3, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_cron_with_seconds_field() {
        assert!(Trigger::parse("cron", "30 0 3 * * *").is_ok());
    }

    #[test]
    fn test_parse_invalid_cron() {
        assert!(Trigger::parse("cron", "no es un cron").is_err());
        assert!(Trigger::parse("cron", "61 * * * *").is_err());
    }

    #[test]
    fn test_parse_date_variants() {
        for value in [
            "2025-12-07T12:00:00Z",
            "2025-12-07T12:00:00",
            "2025-12-07 12:00:00",
        ] {
            let trigger = Trigger::parse("date", value).unwrap();
            match trigger {
                Trigger::Date(at) => {
                    assert_eq!(at, Utc.with_ymd_and_hms(2025, 12, 7, 12, 0, 0).unwrap())
                }
                other => panic!("expected date trigger, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_expired_date_fires_immediately() {
        let past = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let trigger = Trigger::Date(past);
        let now = Utc::now();
        assert_eq!(trigger.next_fire(now), Some(now));
        assert!(trigger.fires_once());
    }

    #[test]
    fn test_immediate_has_no_fire_time() {
        let trigger = Trigger::parse("immediate", "").unwrap();
        assert_eq!(trigger.next_fire(Utc::now()), None);
    }

    #[test]
    fn test_unknown_trigger_type() {
        let err = Trigger::parse("hourly", "").unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTrigger { kind, .. } if kind == "hourly"));
    }
}
