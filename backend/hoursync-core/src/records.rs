// src/records.rs
//
// Raw PSA records arrive as loosely-shaped JSON objects whose key casing
// varies between endpoints and tenants. Everything downstream works on the
// typed records produced here.

use chrono::NaiveDate;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::str::FromStr;

pub type AgentId = String;

/// Upper bound for a single event or daily summary (a full leap year of
/// around-the-clock work). Larger values are malformed source data.
pub const MAX_PLAUSIBLE_HOURS: i64 = 24 * 366;

pub fn is_plausible_hours(hours: Decimal) -> bool {
    hours <= Decimal::from(MAX_PLAUSIBLE_HOURS)
}

// --- Field Resolution Table ---
// Aliases are matched against lowercased keys, first alias wins.

pub const AGENT_ID_ALIASES: &[&str] = &["agent_id", "agentid", "user_id", "userid"];
pub const AGENT_NAME_ALIASES: &[&str] = &["agent_name", "agentname", "user_name", "username", "name"];
pub const DAY_ALIASES: &[&str] = &["day", "date", "worked_date", "workeddate", "entry_date"];
pub const START_ALIASES: &[&str] = &["start", "start_date", "startdate", "start_time", "starttime"];
pub const END_ALIASES: &[&str] = &["end", "end_date", "enddate", "end_time", "endtime"];
pub const RAW_HOURS_ALIASES: &[&str] = &["raw_hours", "rawhours", "hours", "time_taken", "timetaken"];
pub const CHARGE_TYPE_ALIASES: &[&str] = &[
    "charge_type_name",
    "chargetypename",
    "chargetype_name",
    "charge_type",
    "chargetype",
];
pub const BREAK_TYPE_ALIASES: &[&str] = &["break_type", "breaktype"];
pub const BREAK_LABEL_ALIASES: &[&str] = &["break_type_name", "breaktypename", "break_name", "breakname"];
pub const HOLIDAY_ID_ALIASES: &[&str] = &["holiday_id", "holidayid"];
pub const HOLIDAY_LABEL_ALIASES: &[&str] = &["holiday_name", "holidayname", "holiday"];
pub const WORK_HOURS_ALIASES: &[&str] = &["work_hours", "workhours", "worked_hours", "workedhours"];

/// One logged time entry, normalized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimesheetEvent {
    pub agent_id: Option<AgentId>,
    pub agent_name: Option<String>,
    pub date: Option<NaiveDate>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub raw_hours: Decimal,
    pub charge_type_name: Option<String>,
    pub break_code: Option<i64>,
    pub break_label: Option<String>,
    pub holiday_id: Option<i64>,
    pub holiday_label: Option<String>,
}

/// One daily summary row (authoritative worked hours for an agent/day).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimesheetDay {
    pub agent_id: Option<AgentId>,
    pub date: Option<NaiveDate>,
    pub work_hours: Decimal,
}

impl TimesheetEvent {
    pub fn from_value(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self::default();
        };
        let fields = lowercase_fields(object);

        let start = lookup(&fields, START_ALIASES).and_then(as_text);
        let date = lookup(&fields, DAY_ALIASES)
            .and_then(as_date)
            .or_else(|| start.as_deref().and_then(parse_date_prefix));

        // break_type carries either a numeric code or a free-text label
        let (mut break_code, mut break_label) = (None, None);
        if let Some(raw) = lookup(&fields, BREAK_TYPE_ALIASES) {
            match as_i64(raw) {
                Some(code) => break_code = Some(code),
                None => break_label = as_text(raw),
            }
        }
        if break_label.is_none() {
            break_label = lookup(&fields, BREAK_LABEL_ALIASES).and_then(as_text);
        }

        Self {
            agent_id: lookup(&fields, AGENT_ID_ALIASES).and_then(normalize_agent_id),
            agent_name: lookup(&fields, AGENT_NAME_ALIASES).and_then(as_text),
            date,
            start,
            end: lookup(&fields, END_ALIASES).and_then(as_text),
            raw_hours: lookup(&fields, RAW_HOURS_ALIASES)
                .and_then(as_hours)
                .unwrap_or(Decimal::ZERO),
            charge_type_name: lookup(&fields, CHARGE_TYPE_ALIASES).and_then(as_text),
            break_code,
            break_label,
            holiday_id: lookup(&fields, HOLIDAY_ID_ALIASES).and_then(as_i64),
            holiday_label: lookup(&fields, HOLIDAY_LABEL_ALIASES).and_then(as_text),
        }
    }
}

impl TimesheetDay {
    pub fn from_value(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self::default();
        };
        let fields = lowercase_fields(object);

        let date = lookup(&fields, DAY_ALIASES).and_then(as_date).or_else(|| {
            lookup(&fields, START_ALIASES)
                .and_then(as_text)
                .as_deref()
                .and_then(parse_date_prefix)
        });

        Self {
            agent_id: lookup(&fields, AGENT_ID_ALIASES).and_then(normalize_agent_id),
            date,
            work_hours: lookup(&fields, WORK_HOURS_ALIASES)
                .and_then(as_hours)
                .unwrap_or(Decimal::ZERO),
        }
    }
}

pub fn normalize_events(values: &[Value]) -> Vec<TimesheetEvent> {
    values.iter().map(TimesheetEvent::from_value).collect()
}

pub fn normalize_days(values: &[Value]) -> Vec<TimesheetDay> {
    values.iter().map(TimesheetDay::from_value).collect()
}

// --- Value Helpers ---

fn lowercase_fields(object: &Map<String, Value>) -> HashMap<String, &Value> {
    let mut fields = HashMap::with_capacity(object.len());
    for (key, value) in object {
        fields.entry(key.to_lowercase()).or_insert(value);
    }
    fields
}

/// First alias whose value is a non-null scalar.
fn lookup<'a>(fields: &HashMap<String, &'a Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases.iter().find_map(|alias| {
        fields
            .get(*alias)
            .copied()
            .filter(|v| v.is_string() || v.is_number())
    })
}

fn as_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| integral_f64(n.as_f64()?)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| integral_f64(s.parse::<f64>().ok()?))
        }
        _ => None,
    }
}

fn integral_f64(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn parse_decimal(text: &str) -> Option<Decimal> {
    let text = text.trim();
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
        .or_else(|| text.parse::<f64>().ok().and_then(Decimal::from_f64))
}

/// Hours are never negative; anything unparseable is treated as absent.
fn as_hours(value: &Value) -> Option<Decimal> {
    let hours = match value {
        Value::Number(n) => parse_decimal(&n.to_string()),
        Value::String(s) => parse_decimal(s),
        _ => None,
    }?;
    Some(hours.max(Decimal::ZERO))
}

fn as_date(value: &Value) -> Option<NaiveDate> {
    value.as_str().and_then(parse_date_prefix)
}

/// Accepts "2024-09-15" as well as timestamps such as "2024-09-15T08:00:00Z".
pub fn parse_date_prefix(text: &str) -> Option<NaiveDate> {
    let prefix = text.trim().get(..10)?;
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

/// Agent ids are compared as canonical integer strings when numeric ("12", 12
/// and "12.0" are the same agent).
pub fn normalize_agent_id(value: &Value) -> Option<AgentId> {
    if let Some(id) = as_i64(value) {
        return Some(id.to_string());
    }
    as_text(value)
}

pub fn canonical_agent_id(text: &str) -> Option<AgentId> {
    normalize_agent_id(&Value::String(text.to_string()))
}
