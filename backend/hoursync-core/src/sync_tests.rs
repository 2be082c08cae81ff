// src/sync_tests.rs

#[cfg(test)]
mod tests {
    use crate::agents::AgentOverrides;
    use crate::fiscal::{FiscalWindow, FiscalYear};
    use crate::models::{AgentMapping, Employee};
    use crate::psa_client::{PsaError, TimeSource};
    use crate::store::{FileStore, StoreData, TimeStore};
    use crate::sync::*;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use rust_decimal_macros::dec;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    // In-memory source returning fixed records, or failing on demand
    struct FakeSource {
        events: Vec<Value>,
        days: Vec<Value>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn new(events: Vec<Value>, days: Vec<Value>) -> Self {
            Self {
                events,
                days,
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(Vec::new(), Vec::new())
            }
        }
    }

    #[async_trait]
    impl TimeSource for FakeSource {
        async fn fetch_timesheet_events(
            &self,
            _window: &FiscalWindow,
        ) -> Result<Vec<Value>, PsaError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(PsaError::ApiError {
                    status: StatusCode::BAD_GATEWAY,
                    message: "upstream down".to_string(),
                });
            }
            Ok(self.events.clone())
        }

        async fn fetch_timesheet_days(
            &self,
            _window: &FiscalWindow,
        ) -> Result<Vec<Value>, PsaError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.days.clone())
        }
    }

    fn seeded_store(with_mapping: bool) -> Arc<FileStore> {
        let mut data = StoreData {
            fiscal_years: vec![
                FiscalYear {
                    id: "fy-2023".to_string(),
                    label: "2023/2024".to_string(),
                    start_date: None,
                    end_date: None,
                },
                FiscalYear {
                    id: "fy-2024".to_string(),
                    label: "2024/2025".to_string(),
                    start_date: None,
                    end_date: None,
                },
            ],
            employees: vec![
                Employee {
                    id: "anna".to_string(),
                    name: "Anna".to_string(),
                },
                Employee {
                    id: "bo".to_string(),
                    name: "Bo Ek".to_string(),
                },
            ],
            ..Default::default()
        };
        if with_mapping {
            data.agent_mappings.push(AgentMapping {
                employee_id: "anna".to_string(),
                agent_id: "12".to_string(),
            });
        }
        Arc::new(FileStore::in_memory(data))
    }

    fn scenario_source() -> FakeSource {
        FakeSource::new(
            vec![json!({
                "agent_id": "12",
                "day": "2024-09-15",
                "raw_hours": 4,
                "charge_type_name": "project"
            })],
            vec![json!({ "agent_id": "12", "date": "2024-09-15", "work_hours": 7.5 })],
        )
    }

    fn orchestrator(store: &Arc<FileStore>, source: FakeSource) -> SyncOrchestrator {
        SyncOrchestrator::new(store.clone(), Arc::new(source))
    }

    #[tokio::test]
    async fn end_to_end_scenario_produces_expected_rows() {
        let store = seeded_store(true);
        let report = orchestrator(&store, scenario_source())
            .run(
                SyncTarget::FiscalYear("fy-2024".to_string()),
                SyncOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(report.fiscal_year_label, "2024/2025");
        assert_eq!(report.read_rows, 1);
        assert_eq!(report.imported_rows, 1);
        assert_eq!(report.imported_type_rows, 1);

        let months = store.month_entries("fy-2024").await.unwrap();
        assert_eq!(months.len(), 1);
        assert_eq!(months[0].employee_id, "anna");
        assert_eq!(months[0].month_index, 0);
        assert_eq!(months[0].worked, dec!(7.5));
        assert_eq!(months[0].logged, dec!(4));
        assert_eq!(months[0].billed, dec!(4));

        let types = store.billed_types("fy-2024").await.unwrap();
        assert_eq!(types.len(), 1);
        assert_eq!(types[0].employee_id, "anna");
        assert_eq!(types[0].month_index, 0);
        assert_eq!(types[0].charge_type_name, "project");
        assert_eq!(types[0].hours, dec!(4));
    }

    #[tokio::test]
    async fn oversized_source_hours_are_reported_not_fatal() {
        let store = seeded_store(true);
        let mut events = vec![
            json!({
                "agent_id": 12,
                "day": "2024-09-15",
                "raw_hours": "5e28",
                "charge_type_name": "project"
            });
            10
        ];
        events.push(json!({
            "agent_id": "12",
            "day": "2024-09-15",
            "raw_hours": 4,
            "charge_type_name": "project"
        }));
        let source = FakeSource::new(
            events,
            vec![
                json!({ "agent_id": "12", "date": "2024-09-15", "work_hours": "5e28" }),
                json!({ "agent_id": "12", "date": "2024-09-15", "work_hours": 7.5 }),
            ],
        );

        let report = orchestrator(&store, source)
            .run(
                SyncTarget::FiscalYear("fy-2024".to_string()),
                SyncOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(report.read_rows, 11);
        assert_eq!(report.matched_rows, 1);
        assert_eq!(report.skipped_implausible, 10);

        let months = store.month_entries("fy-2024").await.unwrap();
        assert_eq!(months.len(), 1);
        assert_eq!(months[0].worked, dec!(7.5));
        assert_eq!(months[0].billed, dec!(4));
    }

    #[tokio::test]
    async fn running_twice_is_idempotent() {
        let store = seeded_store(true);
        let sync = orchestrator(&store, scenario_source());
        let target = SyncTarget::FiscalYear("fy-2024".to_string());

        sync.run(target.clone(), SyncOptions::default()).await.unwrap();
        let months_first = store.month_entries("fy-2024").await.unwrap();
        let types_first = store.billed_types("fy-2024").await.unwrap();

        let second = sync.run(target, SyncOptions::default()).await.unwrap();
        let months_second = store.month_entries("fy-2024").await.unwrap();
        let types_second = store.billed_types("fy-2024").await.unwrap();

        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, 2);
        assert_eq!(months_first.len(), months_second.len());
        for (a, b) in months_first.iter().zip(&months_second) {
            assert_eq!(a.id, b.id);
            assert_eq!((a.worked, a.logged, a.billed), (b.worked, b.logged, b.billed));
        }
        assert_eq!(types_first.len(), types_second.len());
        assert_eq!(types_first[0].id, types_second[0].id);
        assert_eq!(types_first[0].hours, types_second[0].hours);
    }

    #[tokio::test]
    async fn unmatched_agents_are_reported_not_fatal() {
        let store = seeded_store(true);
        let source = FakeSource::new(
            vec![
                json!({ "agentId": 12, "Day": "2024-09-15", "RawHours": 4, "ChargeTypeName": "project" }),
                json!({ "agentId": 77, "agentName": "Stranger", "Day": "2024-09-15", "RawHours": 6 }),
                json!({ "agentId": 78, "Day": "2024-09-16", "RawHours": 1 }),
            ],
            Vec::new(),
        );

        let report = orchestrator(&store, source)
            .run(SyncTarget::Latest, SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(report.read_rows, 3);
        assert_eq!(report.matched_rows, 1);
        assert_eq!(report.skipped_unmatched, 2);
        assert!(report.read_rows > report.imported_rows);
    }

    #[tokio::test]
    async fn source_failure_aborts_without_writing() {
        let store = seeded_store(true);
        let failure = orchestrator(&store, FakeSource::failing())
            .run(SyncTarget::Latest, SyncOptions::default())
            .await
            .unwrap_err();

        assert_eq!(failure.stage, SyncStage::FetchingSource);
        assert_eq!(failure.fiscal_year_id.as_deref(), Some("fy-2024"));
        assert!(matches!(failure.error, SyncError::Source(_)));
        assert!(failure.message().contains("upstream down"));
        assert!(store.month_entries("fy-2024").await.unwrap().is_empty());
        assert!(store.billed_types("fy-2024").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_fiscal_year_fails_before_fetching() {
        let store = seeded_store(true);
        let source = Arc::new(scenario_source());
        let sync = SyncOrchestrator::new(store.clone(), source.clone());

        let failure = sync
            .run(
                SyncTarget::FiscalYear("fy-1999".to_string()),
                SyncOptions::default(),
            )
            .await
            .unwrap_err();

        assert_eq!(failure.stage, SyncStage::ResolvingWindow);
        assert!(matches!(failure.error, SyncError::FiscalYearNotFound(ref id) if id == "fy-1999"));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn latest_target_without_fiscal_years_fails() {
        let store = Arc::new(FileStore::in_memory(StoreData::default()));
        let failure = orchestrator(&store, scenario_source())
            .run(SyncTarget::Latest, SyncOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(failure.error, SyncError::NoFiscalYears));
    }

    #[tokio::test]
    async fn latest_target_picks_the_newest_fiscal_year() {
        let store = seeded_store(true);
        let report = orchestrator(&store, scenario_source())
            .run(SyncTarget::Latest, SyncOptions::default())
            .await
            .unwrap();
        assert_eq!(report.fiscal_year_id, "fy-2024");
        assert!(store.month_entries("fy-2023").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn no_mappings_is_a_successful_no_op() {
        let store = seeded_store(false);
        let report = orchestrator(&store, scenario_source())
            .run(SyncTarget::Latest, SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(report.read_rows, 1);
        assert_eq!(report.imported_rows, 0);
        assert_eq!(report.imported_type_rows, 0);
        let outcome = SyncOutcome::from(&report);
        assert!(outcome.ok);
        assert_eq!(outcome.imported_rows, Some(0));
    }

    #[tokio::test]
    async fn agent_overrides_apply_for_one_run_only() {
        let store = seeded_store(false);
        let sync = orchestrator(&store, scenario_source());
        let options = SyncOptions {
            agent_overrides: [("12", "bo")].into_iter().collect::<AgentOverrides>(),
            dry_run: false,
        };

        let report = sync.run(SyncTarget::Latest, options).await.unwrap();
        assert_eq!(report.imported_rows, 1);
        assert_eq!(store.month_entries("fy-2024").await.unwrap()[0].employee_id, "bo");
        assert!(store.agent_mappings().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dry_run_computes_but_writes_nothing() {
        let store = seeded_store(true);
        let report = orchestrator(&store, scenario_source())
            .run(
                SyncTarget::Latest,
                SyncOptions {
                    dry_run: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(report.dry_run);
        assert_eq!(report.month_buckets, 1);
        assert_eq!(report.type_buckets, 1);
        assert_eq!(report.imported_rows, 0);
        assert!(store.month_entries("fy-2024").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_runs_never_duplicate_rows() {
        let store = seeded_store(true);
        let a = orchestrator(&store, scenario_source());
        let b = orchestrator(&store, scenario_source());
        let target = SyncTarget::FiscalYear("fy-2024".to_string());

        let (first, second) = tokio::join!(
            a.run(target.clone(), SyncOptions::default()),
            b.run(target.clone(), SyncOptions::default())
        );
        first.unwrap();
        second.unwrap();

        assert_eq!(store.month_entries("fy-2024").await.unwrap().len(), 1);
        assert_eq!(store.billed_types("fy-2024").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn persisted_rule_override_changes_billing() {
        let store = seeded_store(true);
        let mut snapshot = store.snapshot().await;
        snapshot.rule_sets.insert(
            crate::models::RuleSetKind::BillableChargeTypes,
            vec!["Consulting".to_string()],
        );
        store
            .seed(snapshot.fiscal_years, snapshot.employees, snapshot.rule_sets)
            .await
            .unwrap();

        let report = orchestrator(&store, scenario_source())
            .run(SyncTarget::Latest, SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(report.imported_type_rows, 0);
        let months = store.month_entries("fy-2024").await.unwrap();
        assert_eq!(months[0].billed, dec!(0));
        assert_eq!(months[0].logged, dec!(4));
    }
}
