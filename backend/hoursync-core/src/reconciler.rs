// src/reconciler.rs
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use tracing::info;

use crate::aggregator::AggregateResult;
use crate::models::{BilledTypeDraft, MonthEntryDraft};
use crate::store::{StoreError, TimeStore};

/// Persisted hours carry two decimals, half away from zero.
pub fn round_hours(hours: Decimal) -> Decimal {
    hours.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileCounts {
    /// MonthEntry rows written (inserted or updated).
    pub month_rows: usize,
    /// MonthEntryBilledType rows written.
    pub type_rows: usize,
    pub inserted: usize,
    pub updated: usize,
}

pub fn month_rows(result: &AggregateResult, fiscal_year_id: &str) -> Vec<MonthEntryDraft> {
    result
        .month_totals
        .iter()
        .map(|((employee_id, month_index), totals)| MonthEntryDraft {
            employee_id: employee_id.clone(),
            fiscal_year_id: fiscal_year_id.to_string(),
            month_index: *month_index,
            worked: round_hours(totals.worked),
            logged: round_hours(totals.logged),
            billed: round_hours(totals.billed),
        })
        .collect()
}

pub fn billed_type_rows(result: &AggregateResult, fiscal_year_id: &str) -> Vec<BilledTypeDraft> {
    result
        .type_totals
        .iter()
        .map(|((employee_id, month_index, charge_type), hours)| BilledTypeDraft {
            employee_id: employee_id.clone(),
            fiscal_year_id: fiscal_year_id.to_string(),
            month_index: *month_index,
            charge_type_name: charge_type.to_lowercase(),
            hours: round_hours(*hours),
        })
        .collect()
}

/// Writes the aggregate for one fiscal year through the store's keyed upsert.
///
/// Month rows go first, then the charge-type rows, as two separate batches.
/// If the second batch fails the month rows stay written; re-running the sync
/// rewrites both. Buckets that no longer appear in `result` are left as they
/// are.
pub async fn reconcile(
    store: &dyn TimeStore,
    result: &AggregateResult,
    fiscal_year_id: &str,
) -> Result<ReconcileCounts, StoreError> {
    let mut counts = ReconcileCounts::default();

    let months = month_rows(result, fiscal_year_id);
    if !months.is_empty() {
        let written = store.upsert_month_entries(months).await?;
        counts.month_rows = written.written();
        counts.inserted += written.inserted;
        counts.updated += written.updated;
    }

    let types = billed_type_rows(result, fiscal_year_id);
    if !types.is_empty() {
        let written = store.upsert_billed_types(types).await?;
        counts.type_rows = written.written();
        counts.inserted += written.inserted;
        counts.updated += written.updated;
    }

    info!(
        "Reconciled fiscal year {}: {} month rows, {} charge-type rows ({} inserted, {} updated)",
        fiscal_year_id, counts.month_rows, counts.type_rows, counts.inserted, counts.updated
    );
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::MonthTotals;
    use crate::fiscal::FiscalYear;
    use crate::models::{
        AgentMapping, Employee, MonthEntry, MonthEntryBilledType, RuleSetKind, UpsertCounts,
    };
    use crate::store::{FileStore, StoreData};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    fn sample_result() -> AggregateResult {
        let mut result = AggregateResult::default();
        result.month_totals.insert(
            ("anna".to_string(), 0),
            MonthTotals {
                worked: dec!(7.5),
                logged: dec!(4.005),
                billed: dec!(2.344),
            },
        );
        result
            .type_totals
            .insert(("anna".to_string(), 0, "Project".to_string()), dec!(2.344));
        result
    }

    #[test]
    fn rounding_is_half_away_from_zero_at_two_places() {
        assert_eq!(round_hours(dec!(2.345)), dec!(2.35));
        assert_eq!(round_hours(dec!(2.344)), dec!(2.34));
        assert_eq!(round_hours(dec!(0.125)), dec!(0.13));
        assert_eq!(round_hours(dec!(7.5)), dec!(7.50));
    }

    #[test]
    fn rows_are_rounded_and_charge_types_lowercased() {
        let months = month_rows(&sample_result(), "fy-2024");
        assert_eq!(months.len(), 1);
        assert_eq!(months[0].logged, dec!(4.01));
        assert_eq!(months[0].billed, dec!(2.34));

        let types = billed_type_rows(&sample_result(), "fy-2024");
        assert_eq!(types[0].charge_type_name, "project");
        assert_eq!(types[0].hours, dec!(2.34));
    }

    #[tokio::test]
    async fn reconciling_twice_keeps_row_identities() {
        let store = FileStore::in_memory(StoreData::default());

        let first = reconcile(&store, &sample_result(), "fy-2024").await.unwrap();
        assert_eq!(
            first,
            ReconcileCounts {
                month_rows: 1,
                type_rows: 1,
                inserted: 2,
                updated: 0
            }
        );
        let months_before = store.month_entries("fy-2024").await.unwrap();
        let types_before = store.billed_types("fy-2024").await.unwrap();

        let second = reconcile(&store, &sample_result(), "fy-2024").await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, 2);

        let months_after = store.month_entries("fy-2024").await.unwrap();
        let types_after = store.billed_types("fy-2024").await.unwrap();
        assert_eq!(months_after.len(), 1);
        assert_eq!(months_after[0].id, months_before[0].id);
        assert_eq!(months_after[0].logged, months_before[0].logged);
        assert_eq!(types_after[0].id, types_before[0].id);
    }

    #[tokio::test]
    async fn empty_aggregate_writes_nothing() {
        let store = FileStore::in_memory(StoreData::default());
        let counts = reconcile(&store, &AggregateResult::default(), "fy-2024")
            .await
            .unwrap();
        assert_eq!(counts, ReconcileCounts::default());
        assert!(store.month_entries("fy-2024").await.unwrap().is_empty());
    }

    // Delegates to a FileStore but refuses charge-type writes
    struct BilledTypesDown(FileStore);

    #[async_trait]
    impl TimeStore for BilledTypesDown {
        async fn fiscal_year(&self, id: &str) -> Result<Option<FiscalYear>, StoreError> {
            self.0.fiscal_year(id).await
        }
        async fn fiscal_years(&self) -> Result<Vec<FiscalYear>, StoreError> {
            self.0.fiscal_years().await
        }
        async fn employees(&self) -> Result<Vec<Employee>, StoreError> {
            self.0.employees().await
        }
        async fn agent_mappings(&self) -> Result<Vec<AgentMapping>, StoreError> {
            self.0.agent_mappings().await
        }
        async fn upsert_agent_mapping(&self, mapping: AgentMapping) -> Result<(), StoreError> {
            self.0.upsert_agent_mapping(mapping).await
        }
        async fn rule_set(&self, kind: RuleSetKind) -> Result<Option<Vec<String>>, StoreError> {
            self.0.rule_set(kind).await
        }
        async fn month_entries(&self, id: &str) -> Result<Vec<MonthEntry>, StoreError> {
            self.0.month_entries(id).await
        }
        async fn upsert_month_entries(
            &self,
            rows: Vec<MonthEntryDraft>,
        ) -> Result<UpsertCounts, StoreError> {
            self.0.upsert_month_entries(rows).await
        }
        async fn billed_types(&self, id: &str) -> Result<Vec<MonthEntryBilledType>, StoreError> {
            self.0.billed_types(id).await
        }
        async fn upsert_billed_types(
            &self,
            _rows: Vec<BilledTypeDraft>,
        ) -> Result<UpsertCounts, StoreError> {
            Err(StoreError::Unavailable("billed types table offline".to_string()))
        }
    }

    #[tokio::test]
    async fn failed_charge_type_batch_leaves_month_rows_written() {
        let store = BilledTypesDown(FileStore::in_memory(StoreData::default()));
        let err = reconcile(&store, &sample_result(), "fy-2024")
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Unavailable(_)));
        assert_eq!(store.month_entries("fy-2024").await.unwrap().len(), 1);
        assert!(store.billed_types("fy-2024").await.unwrap().is_empty());
    }
}
