// src/models.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::records::AgentId;

pub type EmployeeId = String;
pub type FiscalYearId = String;
pub type MonthIndex = u8; // 0 = September .. 11 = August

// --- Directory & Mapping ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub name: String,
}

/// Links an internal employee to the PSA agent that logs their time.
/// At most one agent per employee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMapping {
    pub employee_id: EmployeeId,
    pub agent_id: AgentId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleSetKind {
    BillableChargeTypes,
    ExcludedLoggedChargeTypes,
    ExcludedBreakTypes,
    ExcludedHolidayTypes,
}

impl RuleSetKind {
    pub const ALL: [RuleSetKind; 4] = [
        RuleSetKind::BillableChargeTypes,
        RuleSetKind::ExcludedLoggedChargeTypes,
        RuleSetKind::ExcludedBreakTypes,
        RuleSetKind::ExcludedHolidayTypes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleSetKind::BillableChargeTypes => "billableChargeTypes",
            RuleSetKind::ExcludedLoggedChargeTypes => "excludedLoggedChargeTypes",
            RuleSetKind::ExcludedBreakTypes => "excludedBreakTypes",
            RuleSetKind::ExcludedHolidayTypes => "excludedHolidayTypes",
        }
    }
}

// --- Aggregate Output ---

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MonthEntryKey {
    pub employee_id: EmployeeId,
    pub fiscal_year_id: FiscalYearId,
    pub month_index: MonthIndex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthEntry {
    pub id: Uuid,
    pub employee_id: EmployeeId,
    pub fiscal_year_id: FiscalYearId,
    pub month_index: MonthIndex,
    pub worked: Decimal,
    pub logged: Decimal,
    pub billed: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl MonthEntry {
    pub fn key(&self) -> MonthEntryKey {
        MonthEntryKey {
            employee_id: self.employee_id.clone(),
            fiscal_year_id: self.fiscal_year_id.clone(),
            month_index: self.month_index,
        }
    }
}

/// A month row before the store has assigned (or reused) its identity.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthEntryDraft {
    pub employee_id: EmployeeId,
    pub fiscal_year_id: FiscalYearId,
    pub month_index: MonthIndex,
    pub worked: Decimal,
    pub logged: Decimal,
    pub billed: Decimal,
}

impl MonthEntryDraft {
    pub fn key(&self) -> MonthEntryKey {
        MonthEntryKey {
            employee_id: self.employee_id.clone(),
            fiscal_year_id: self.fiscal_year_id.clone(),
            month_index: self.month_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BilledTypeKey {
    pub employee_id: EmployeeId,
    pub fiscal_year_id: FiscalYearId,
    pub month_index: MonthIndex,
    pub charge_type_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthEntryBilledType {
    pub id: Uuid,
    pub employee_id: EmployeeId,
    pub fiscal_year_id: FiscalYearId,
    pub month_index: MonthIndex,
    /// Always lowercase.
    pub charge_type_name: String,
    pub hours: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl MonthEntryBilledType {
    pub fn key(&self) -> BilledTypeKey {
        BilledTypeKey {
            employee_id: self.employee_id.clone(),
            fiscal_year_id: self.fiscal_year_id.clone(),
            month_index: self.month_index,
            charge_type_name: self.charge_type_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BilledTypeDraft {
    pub employee_id: EmployeeId,
    pub fiscal_year_id: FiscalYearId,
    pub month_index: MonthIndex,
    pub charge_type_name: String,
    pub hours: Decimal,
}

impl BilledTypeDraft {
    pub fn key(&self) -> BilledTypeKey {
        BilledTypeKey {
            employee_id: self.employee_id.clone(),
            fiscal_year_id: self.fiscal_year_id.clone(),
            month_index: self.month_index,
            charge_type_name: self.charge_type_name.to_lowercase(),
        }
    }
}

/// Rows touched by one upsert batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertCounts {
    pub inserted: usize,
    pub updated: usize,
}

impl UpsertCounts {
    pub fn written(&self) -> usize {
        self.inserted + self.updated
    }
}
