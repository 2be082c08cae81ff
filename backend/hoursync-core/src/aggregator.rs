// src/aggregator.rs
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::agents::AgentResolver;
use crate::classification::ClassificationRules;
use crate::fiscal::{fiscal_month_index, FiscalWindow};
use crate::models::{EmployeeId, MonthIndex};
use crate::records::{is_plausible_hours, AgentId, TimesheetEvent};
use crate::worked_hours::DailyWorkedHours;

pub type MonthKey = (EmployeeId, MonthIndex);
pub type TypeKey = (EmployeeId, MonthIndex, String);

/// Unrounded running totals for one employee/fiscal month.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MonthTotals {
    pub worked: Decimal,
    pub logged: Decimal,
    pub billed: Decimal,
}

/// What happened to the events of one run. `read` always equals
/// `matched + skipped_unmatched + skipped_undated + skipped_out_of_window +
/// skipped_implausible`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregateStats {
    pub read: usize,
    pub matched: usize,
    pub skipped_unmatched: usize,
    pub skipped_undated: usize,
    pub skipped_out_of_window: usize,
    pub skipped_implausible: usize,
    /// Agent/days whose events resolved to more than one employee; their
    /// worked hours go to nobody.
    pub ambiguous_worked_days: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateResult {
    pub month_totals: BTreeMap<MonthKey, MonthTotals>,
    pub type_totals: BTreeMap<TypeKey, Decimal>,
    pub stats: AggregateStats,
}

impl AggregateResult {
    pub fn is_empty(&self) -> bool {
        self.month_totals.is_empty() && self.type_totals.is_empty()
    }
}

/// Folds raw events into per-employee, per-fiscal-month totals.
///
/// Events that resolve to no employee, carry no usable date, fall outside
/// `window` or report an implausible hour count are skipped and counted.
/// Worked hours come from `worked` and are added once per distinct agent/day
/// no matter how many events share it, provided all of that agent/day's
/// events resolved to the same employee. Totals are exact; rounding is left
/// to whoever persists them.
pub fn aggregate(
    events: &[TimesheetEvent],
    worked: &DailyWorkedHours,
    resolver: &AgentResolver,
    rules: &ClassificationRules,
    window: &FiscalWindow,
) -> AggregateResult {
    let mut result = AggregateResult::default();
    // Employees claiming each agent/day; settled after every event is seen
    let mut worked_claims: BTreeMap<(AgentId, NaiveDate), BTreeSet<EmployeeId>> = BTreeMap::new();

    for event in events {
        result.stats.read += 1;

        let Some(employee_id) = resolver.resolve(event) else {
            debug!(
                "Skipping event: no employee for agent {:?} / {:?}",
                event.agent_id, event.agent_name
            );
            result.stats.skipped_unmatched += 1;
            continue;
        };

        let Some(date) = event.date else {
            debug!("Skipping event for {}: no usable date", employee_id);
            result.stats.skipped_undated += 1;
            continue;
        };

        if !window.contains(date) {
            debug!(
                "Skipping event for {} on {}: outside fiscal window {}",
                employee_id, date, window
            );
            result.stats.skipped_out_of_window += 1;
            continue;
        }

        let hours = event.raw_hours.max(Decimal::ZERO);
        if !is_plausible_hours(hours) {
            warn!(
                "Skipping event for {} on {}: {} hours is not plausible",
                employee_id, date, hours
            );
            result.stats.skipped_implausible += 1;
            continue;
        }

        result.stats.matched += 1;
        let month_index = fiscal_month_index(date);
        let totals = result
            .month_totals
            .entry((employee_id.to_string(), month_index))
            .or_default();

        // Billed, with a per-charge-type breakdown
        if hours > Decimal::ZERO {
            if let Some(charge_type) = event.charge_type_name.as_deref() {
                if rules.is_billable(charge_type) {
                    totals.billed = totals.billed.saturating_add(hours);
                    let type_total = result
                        .type_totals
                        .entry((
                            employee_id.to_string(),
                            month_index,
                            charge_type.trim().to_lowercase(),
                        ))
                        .or_insert(Decimal::ZERO);
                    *type_total = type_total.saturating_add(hours);
                }
            }
        }

        // Logged
        if hours > Decimal::ZERO && !rules.is_excluded_from_logged(event) {
            totals.logged = totals.logged.saturating_add(hours);
        }

        if let Some(agent_id) = event.agent_id.as_ref() {
            worked_claims
                .entry((agent_id.clone(), date))
                .or_default()
                .insert(employee_id.to_string());
        }
    }

    // Worked, once per agent/day
    for ((agent_id, date), employees) in worked_claims {
        let mut claimants = employees.into_iter();
        let (Some(employee_id), None) = (claimants.next(), claimants.next()) else {
            warn!(
                "Agent {} on {} resolved to more than one employee; worked hours not attributed",
                agent_id, date
            );
            result.stats.ambiguous_worked_days += 1;
            continue;
        };
        let totals = result
            .month_totals
            .entry((employee_id, fiscal_month_index(date)))
            .or_default();
        totals.worked = totals.worked.saturating_add(worked.get(&agent_id, date));
    }

    info!(
        "Aggregated {} events: {} matched, {} unmatched, {} undated, {} out of window, {} implausible -> {} month buckets, {} charge-type buckets",
        result.stats.read,
        result.stats.matched,
        result.stats.skipped_unmatched,
        result.stats.skipped_undated,
        result.stats.skipped_out_of_window,
        result.stats.skipped_implausible,
        result.month_totals.len(),
        result.type_totals.len()
    );

    result
}
