// src/fiscal.rs
use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// --- Fiscal Calendar ---

/// Calendar month (1-based) the fiscal year starts in.
pub const FISCAL_START_MONTH: u32 = 9;

/// Display names indexed by fiscal month index.
pub const FISCAL_MONTH_NAMES: [&str; 12] = [
    "September",
    "October",
    "November",
    "December",
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
];

static FISCAL_LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\d{4})\s*/\s*(\d{4})\s*$").expect("fiscal year label pattern is valid")
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FiscalError {
    #[error("Fiscal year label '{0}' is not of the form 'YYYY/YYYY'")]
    InvalidLabel(String),
    #[error("Fiscal year '{id}' has start date {start} after end date {end}")]
    InvertedWindow {
        id: String,
        start: NaiveDate,
        end: NaiveDate,
    },
}

/// Maps a calendar date to its bucket in a September-start fiscal year.
/// September is 0, August is 11.
pub fn fiscal_month_index(date: NaiveDate) -> u8 {
    let month0 = date.month0(); // January = 0
    ((month0 + 12 - (FISCAL_START_MONTH - 1)) % 12) as u8
}

pub fn fiscal_month_name(month_index: u8) -> &'static str {
    FISCAL_MONTH_NAMES
        .get(usize::from(month_index))
        .copied()
        .unwrap_or("Unknown")
}

/// Inclusive date range covered by one fiscal year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl FiscalWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    pub fn start_param(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }

    pub fn end_param(&self) -> String {
        self.end.format("%Y-%m-%d").to_string()
    }
}

impl fmt::Display for FiscalWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalYear {
    pub id: String,
    /// "startYear/endYear", e.g. "2024/2025"
    pub label: String,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

impl FiscalYear {
    /// Resolves the date window. Explicit bounds win; any bound that is
    /// missing is derived from the label (Sep 1 of the first year through
    /// Aug 31 of the second).
    pub fn window(&self) -> Result<FiscalWindow, FiscalError> {
        let (start, end) = match (self.start_date, self.end_date) {
            (Some(start), Some(end)) => (start, end),
            (start, end) => {
                let derived = derive_window_from_label(&self.label)?;
                (start.unwrap_or(derived.start), end.unwrap_or(derived.end))
            }
        };

        if start > end {
            return Err(FiscalError::InvertedWindow {
                id: self.id.clone(),
                start,
                end,
            });
        }
        Ok(FiscalWindow { start, end })
    }

    /// Effective start used to order fiscal years; falls back to the label.
    pub fn effective_start(&self) -> Option<NaiveDate> {
        self.start_date
            .or_else(|| derive_window_from_label(&self.label).ok().map(|w| w.start))
    }
}

pub fn derive_window_from_label(label: &str) -> Result<FiscalWindow, FiscalError> {
    let invalid = || FiscalError::InvalidLabel(label.to_string());
    let captures = FISCAL_LABEL_RE.captures(label).ok_or_else(invalid)?;
    let start_year: i32 = captures[1].parse().map_err(|_| invalid())?;
    let end_year: i32 = captures[2].parse().map_err(|_| invalid())?;

    let start = NaiveDate::from_ymd_opt(start_year, FISCAL_START_MONTH, 1).ok_or_else(invalid)?;
    let end = NaiveDate::from_ymd_opt(end_year, FISCAL_START_MONTH - 1, 31).ok_or_else(invalid)?;
    Ok(FiscalWindow { start, end })
}
