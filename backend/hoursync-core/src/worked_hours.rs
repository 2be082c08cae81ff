// src/worked_hours.rs
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::records::{is_plausible_hours, AgentId, TimesheetDay};

/// Authoritative worked hours per agent and calendar day, taken from the
/// daily summary rows. The only source of the `worked` aggregate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailyWorkedHours {
    hours: HashMap<(AgentId, NaiveDate), Decimal>,
    skipped: usize,
}

impl DailyWorkedHours {
    /// Rows for the same agent and day are summed (multi-shift days).
    /// Rows missing an agent or a date, or carrying an implausible hour
    /// count, are skipped and counted.
    pub fn from_days<'a, I>(days: I) -> Self
    where
        I: IntoIterator<Item = &'a TimesheetDay>,
    {
        let mut map = Self::default();
        for day in days {
            let (Some(agent_id), Some(date)) = (day.agent_id.as_ref(), day.date) else {
                map.skipped += 1;
                continue;
            };
            if !is_plausible_hours(day.work_hours) {
                warn!(
                    "Ignoring daily summary for agent {} on {}: {} work hours is not plausible",
                    agent_id, date, day.work_hours
                );
                map.skipped += 1;
                continue;
            }
            let total = map
                .hours
                .entry((agent_id.clone(), date))
                .or_insert(Decimal::ZERO);
            *total = total.saturating_add(day.work_hours);
        }
        debug!(
            "Daily worked hours: {} agent/day keys, {} rows skipped",
            map.hours.len(),
            map.skipped
        );
        map
    }

    /// Zero when there is no summary for the agent/day.
    pub fn get(&self, agent_id: &str, date: NaiveDate) -> Decimal {
        self.hours
            .get(&(agent_id.to_string(), date))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn len(&self) -> usize {
        self.hours.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hours.is_empty()
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn day(agent: Option<&str>, date: Option<&str>, hours: Decimal) -> TimesheetDay {
        TimesheetDay {
            agent_id: agent.map(str::to_string),
            date: date.map(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").unwrap()),
            work_hours: hours,
        }
    }

    #[test]
    fn duplicate_rows_for_same_agent_and_day_are_summed() {
        let days = vec![
            day(Some("12"), Some("2024-09-15"), dec!(4)),
            day(Some("12"), Some("2024-09-15"), dec!(3.5)),
            day(Some("12"), Some("2024-09-16"), dec!(8)),
        ];
        let worked = DailyWorkedHours::from_days(&days);
        let sep15 = NaiveDate::from_ymd_opt(2024, 9, 15).unwrap();
        assert_eq!(worked.get("12", sep15), dec!(7.5));
        assert_eq!(worked.len(), 2);
    }

    #[test]
    fn missing_key_contributes_zero() {
        let worked = DailyWorkedHours::from_days(&[day(Some("12"), Some("2024-09-15"), dec!(8))]);
        let sep15 = NaiveDate::from_ymd_opt(2024, 9, 15).unwrap();
        let sep16 = NaiveDate::from_ymd_opt(2024, 9, 16).unwrap();
        assert_eq!(worked.get("13", sep15), Decimal::ZERO);
        assert_eq!(worked.get("12", sep16), Decimal::ZERO);
    }

    #[test]
    fn rows_without_agent_or_date_are_counted_as_skipped() {
        let worked = DailyWorkedHours::from_days(&[
            day(None, Some("2024-09-15"), dec!(8)),
            day(Some("12"), None, dec!(8)),
            day(Some("12"), Some("2024-09-15"), dec!(6)),
        ]);
        assert_eq!(worked.skipped(), 2);
        assert_eq!(worked.len(), 1);
        assert!(!worked.is_empty());
    }

    #[test]
    fn oversized_work_hours_are_skipped_instead_of_summed() {
        let huge = Decimal::from_scientific("5e28").unwrap();
        let days: Vec<_> = (0..10)
            .map(|_| day(Some("12"), Some("2024-09-15"), huge))
            .chain([day(Some("12"), Some("2024-09-15"), dec!(8))])
            .collect();
        let worked = DailyWorkedHours::from_days(&days);
        let sep15 = NaiveDate::from_ymd_opt(2024, 9, 15).unwrap();
        assert_eq!(worked.get("12", sep15), dec!(8));
        assert_eq!(worked.skipped(), 10);
    }
}
