// src/export.rs
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;
use thiserror::Error;
use tracing::info;

use crate::fiscal::{fiscal_month_name, FiscalYear};
use crate::store::{StoreError, TimeStore};

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Storage error")]
    Store(#[from] StoreError),

    #[error("CSV writing error")]
    Csv(#[from] csv::Error),

    #[error("I/O error while flushing export")]
    Io(#[from] std::io::Error),

    #[error("Fiscal year '{0}' not found")]
    FiscalYearNotFound(String),
}

#[derive(Debug, Serialize)]
struct MonthRow<'a> {
    employee_id: &'a str,
    fiscal_year: &'a str,
    month_index: u8,
    month: &'static str,
    worked: Decimal,
    logged: Decimal,
    billed: Decimal,
}

#[derive(Debug, Serialize)]
struct BilledTypeRow<'a> {
    employee_id: &'a str,
    fiscal_year: &'a str,
    month_index: u8,
    month: &'static str,
    charge_type: &'a str,
    hours: Decimal,
}

async fn require_fiscal_year(
    store: &dyn TimeStore,
    fiscal_year_id: &str,
) -> Result<FiscalYear, ExportError> {
    store
        .fiscal_year(fiscal_year_id)
        .await?
        .ok_or_else(|| ExportError::FiscalYearNotFound(fiscal_year_id.to_string()))
}

/// Writes the stored month rows of one fiscal year as CSV, ordered by
/// employee then fiscal month. Returns the number of data rows.
pub async fn export_month_entries<W: Write>(
    store: &dyn TimeStore,
    fiscal_year_id: &str,
    writer: W,
) -> Result<usize, ExportError> {
    let fiscal_year = require_fiscal_year(store, fiscal_year_id).await?;
    let mut rows = store.month_entries(&fiscal_year.id).await?;
    rows.sort_by(|a, b| {
        (a.employee_id.as_str(), a.month_index).cmp(&(b.employee_id.as_str(), b.month_index))
    });

    let mut csv_writer = csv::Writer::from_writer(writer);
    for row in &rows {
        csv_writer.serialize(MonthRow {
            employee_id: &row.employee_id,
            fiscal_year: &fiscal_year.label,
            month_index: row.month_index,
            month: fiscal_month_name(row.month_index),
            worked: row.worked,
            logged: row.logged,
            billed: row.billed,
        })?;
    }
    csv_writer.flush()?;

    info!(
        "Exported {} month rows for fiscal year {}",
        rows.len(),
        fiscal_year.label
    );
    Ok(rows.len())
}

/// Same as [`export_month_entries`] for the per-charge-type breakdown.
pub async fn export_billed_types<W: Write>(
    store: &dyn TimeStore,
    fiscal_year_id: &str,
    writer: W,
) -> Result<usize, ExportError> {
    let fiscal_year = require_fiscal_year(store, fiscal_year_id).await?;
    let mut rows = store.billed_types(&fiscal_year.id).await?;
    rows.sort_by(|a, b| {
        (a.employee_id.as_str(), a.month_index, a.charge_type_name.as_str()).cmp(&(
            b.employee_id.as_str(),
            b.month_index,
            b.charge_type_name.as_str(),
        ))
    });

    let mut csv_writer = csv::Writer::from_writer(writer);
    for row in &rows {
        csv_writer.serialize(BilledTypeRow {
            employee_id: &row.employee_id,
            fiscal_year: &fiscal_year.label,
            month_index: row.month_index,
            month: fiscal_month_name(row.month_index),
            charge_type: &row.charge_type_name,
            hours: row.hours,
        })?;
    }
    csv_writer.flush()?;

    info!(
        "Exported {} charge-type rows for fiscal year {}",
        rows.len(),
        fiscal_year.label
    );
    Ok(rows.len())
}
