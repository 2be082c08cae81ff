// src/sync.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agents::{AgentOverrides, AgentResolver};
use crate::aggregator::{aggregate, AggregateResult};
use crate::classification::ClassificationRules;
use crate::fiscal::{FiscalError, FiscalWindow, FiscalYear};
use crate::psa_client::{PsaError, TimeSource};
use crate::reconciler::{reconcile, ReconcileCounts};
use crate::records::{normalize_days, normalize_events};
use crate::store::{StoreError, TimeStore};
use crate::worked_hours::DailyWorkedHours;

// --- Run States ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    Idle,
    ResolvingWindow,
    FetchingSource,
    Aggregating,
    Reconciling,
    Done,
    Failed,
}

impl SyncStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, SyncStage::Done | SyncStage::Failed)
    }

    /// The happy path is strictly linear; a dry run may finish straight
    /// after aggregating. Any non-terminal stage may fail.
    pub fn can_transition_to(self, next: SyncStage) -> bool {
        use SyncStage::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Idle, ResolvingWindow)
            | (ResolvingWindow, FetchingSource)
            | (FetchingSource, Aggregating)
            | (Aggregating, Reconciling)
            | (Aggregating, Done)
            | (Reconciling, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStage::Idle => "idle",
            SyncStage::ResolvingWindow => "resolving window",
            SyncStage::FetchingSource => "fetching source data",
            SyncStage::Aggregating => "aggregating",
            SyncStage::Reconciling => "reconciling",
            SyncStage::Done => "done",
            SyncStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

// --- Errors ---

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Source fetch failed")]
    Source(#[from] PsaError),

    #[error("Storage error")]
    Storage(#[from] StoreError),

    #[error("Fiscal year '{0}' not found")]
    FiscalYearNotFound(String),

    #[error("No fiscal year with a usable start date is configured")]
    NoFiscalYears,

    #[error("Invalid fiscal year")]
    Fiscal(#[from] FiscalError),

    #[error("Invalid sync transition: {from} -> {to}")]
    InvalidTransition { from: SyncStage, to: SyncStage },
}

/// Renders an error with every `source()` in its chain, `outer: inner: ...`.
pub fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut current = err.source();
    while let Some(source) = current {
        message.push_str(": ");
        message.push_str(&source.to_string());
        current = source.source();
    }
    message
}

// --- Requests & Results ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncTarget {
    /// The fiscal year with the latest start date.
    Latest,
    FiscalYear(String),
}

impl fmt::Display for SyncTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncTarget::Latest => f.write_str("latest fiscal year"),
            SyncTarget::FiscalYear(id) => write!(f, "fiscal year '{}'", id),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOptions {
    #[serde(default)]
    pub agent_overrides: AgentOverrides,
    /// Stop after aggregating; nothing is written.
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub fiscal_year_id: String,
    pub fiscal_year_label: String,
    pub window: FiscalWindow,
    pub dry_run: bool,
    /// Raw events fetched.
    pub read_rows: usize,
    pub day_rows: usize,
    pub matched_rows: usize,
    pub skipped_unmatched: usize,
    pub skipped_undated: usize,
    pub skipped_out_of_window: usize,
    pub skipped_implausible: usize,
    pub ambiguous_worked_days: usize,
    pub month_buckets: usize,
    pub type_buckets: usize,
    /// MonthEntry rows written.
    pub imported_rows: usize,
    /// MonthEntryBilledType rows written.
    pub imported_type_rows: usize,
    pub inserted: usize,
    pub updated: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct SyncFailure {
    pub run_id: Uuid,
    /// Stage that was running when the error occurred.
    pub stage: SyncStage,
    pub fiscal_year_id: Option<String>,
    pub error: SyncError,
}

impl SyncFailure {
    pub fn message(&self) -> String {
        error_chain(&self.error)
    }
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sync failed while {}: {}", self.stage, self.message())
    }
}

/// Wire shape returned by both triggers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_rows: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imported_rows: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imported_type_rows: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fiscal_year_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fiscal_year_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_rows: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_unmatched: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<SyncStage>,
}

impl From<&SyncReport> for SyncOutcome {
    fn from(report: &SyncReport) -> Self {
        Self {
            ok: true,
            read_rows: Some(report.read_rows),
            imported_rows: Some(report.imported_rows),
            imported_type_rows: Some(report.imported_type_rows),
            fiscal_year_label: Some(report.fiscal_year_label.clone()),
            fiscal_year_id: Some(report.fiscal_year_id.clone()),
            matched_rows: Some(report.matched_rows),
            skipped_unmatched: Some(report.skipped_unmatched),
            dry_run: Some(report.dry_run),
            ..Default::default()
        }
    }
}

impl From<&SyncFailure> for SyncOutcome {
    fn from(failure: &SyncFailure) -> Self {
        Self {
            ok: false,
            error: Some(failure.message()),
            fiscal_year_id: failure.fiscal_year_id.clone(),
            stage: Some(failure.stage),
            ..Default::default()
        }
    }
}

// --- State Tracking ---

struct SyncRun {
    id: Uuid,
    stage: SyncStage,
    fiscal_year_id: Option<String>,
    started_at: DateTime<Utc>,
}

impl SyncRun {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            stage: SyncStage::Idle,
            fiscal_year_id: None,
            started_at: Utc::now(),
        }
    }

    fn advance(&mut self, next: SyncStage) -> Result<(), SyncError> {
        if !self.stage.can_transition_to(next) {
            return Err(SyncError::InvalidTransition {
                from: self.stage,
                to: next,
            });
        }
        info!("Sync {}: {} -> {}", self.id, self.stage, next);
        self.stage = next;
        Ok(())
    }

    fn fail(mut self, error: SyncError) -> SyncFailure {
        let stage = self.stage;
        error!(
            "Sync {} failed while {}: {}",
            self.id,
            stage,
            error_chain(&error)
        );
        if self.stage.can_transition_to(SyncStage::Failed) {
            self.stage = SyncStage::Failed;
        }
        SyncFailure {
            run_id: self.id,
            stage,
            fiscal_year_id: self.fiscal_year_id,
            error,
        }
    }
}

/// Picks the fiscal year with the latest start date. Years whose start
/// cannot be determined are ignored.
pub fn latest_fiscal_year(years: &[FiscalYear]) -> Option<&FiscalYear> {
    years
        .iter()
        .filter_map(|fy| fy.effective_start().map(|start| (start, fy)))
        .max_by(|(a_start, a), (b_start, b)| a_start.cmp(b_start).then_with(|| a.id.cmp(&b.id)))
        .map(|(_, fy)| fy)
}

// --- Orchestrator ---

/// Everything a run needs before it touches the source.
struct RunPlan {
    fiscal_year: FiscalYear,
    window: FiscalWindow,
    rules: ClassificationRules,
    resolver: AgentResolver,
}

#[derive(Clone)]
pub struct SyncOrchestrator {
    store: Arc<dyn TimeStore>,
    source: Arc<dyn TimeSource>,
}

impl SyncOrchestrator {
    pub fn new(store: Arc<dyn TimeStore>, source: Arc<dyn TimeSource>) -> Self {
        Self { store, source }
    }

    pub fn store(&self) -> &Arc<dyn TimeStore> {
        &self.store
    }

    /// Runs one sync to completion. Nothing is written unless every stage
    /// up to and including aggregation succeeded.
    pub async fn run(
        &self,
        target: SyncTarget,
        options: SyncOptions,
    ) -> Result<SyncReport, SyncFailure> {
        let mut run = SyncRun::new();
        info!(
            "Sync {} started for {} (dry_run={}, {} agent overrides)",
            run.id,
            target,
            options.dry_run,
            options.agent_overrides.0.len()
        );

        macro_rules! step {
            ($expr:expr) => {
                match $expr {
                    Ok(value) => value,
                    Err(err) => return Err(run.fail(err.into())),
                }
            };
        }

        step!(run.advance(SyncStage::ResolvingWindow));
        let plan = step!(self.plan(&target, &options).await);
        run.fiscal_year_id = Some(plan.fiscal_year.id.clone());

        step!(run.advance(SyncStage::FetchingSource));
        let raw_events = step!(self.source.fetch_timesheet_events(&plan.window).await);
        let raw_days = step!(self.source.fetch_timesheet_days(&plan.window).await);
        debug!(
            "Sync {}: fetched {} events and {} daily summaries",
            run.id,
            raw_events.len(),
            raw_days.len()
        );

        step!(run.advance(SyncStage::Aggregating));
        let events = normalize_events(&raw_events);
        let days = normalize_days(&raw_days);
        let worked = DailyWorkedHours::from_days(&days);
        let result = aggregate(&events, &worked, &plan.resolver, &plan.rules, &plan.window);
        if result.stats.read > 0 && result.stats.matched == 0 {
            warn!(
                "Sync {}: none of {} events matched an employee; check agent mappings",
                run.id, result.stats.read
            );
        }

        let counts = if options.dry_run {
            info!("Sync {}: dry run, skipping reconciliation", run.id);
            ReconcileCounts::default()
        } else {
            step!(run.advance(SyncStage::Reconciling));
            step!(reconcile(self.store.as_ref(), &result, &plan.fiscal_year.id).await)
        };

        step!(run.advance(SyncStage::Done));
        let report = build_report(&run, &plan, &options, raw_days.len(), &result, counts);
        info!(
            "Sync {} done for {} ({}): read {}, matched {}, imported {} month rows and {} charge-type rows",
            report.run_id,
            report.fiscal_year_label,
            report.fiscal_year_id,
            report.read_rows,
            report.matched_rows,
            report.imported_rows,
            report.imported_type_rows
        );
        Ok(report)
    }

    async fn plan(&self, target: &SyncTarget, options: &SyncOptions) -> Result<RunPlan, SyncError> {
        let fiscal_year = match target {
            SyncTarget::FiscalYear(id) => self
                .store
                .fiscal_year(id)
                .await?
                .ok_or_else(|| SyncError::FiscalYearNotFound(id.clone()))?,
            SyncTarget::Latest => {
                let years = self.store.fiscal_years().await?;
                latest_fiscal_year(&years)
                    .cloned()
                    .ok_or(SyncError::NoFiscalYears)?
            }
        };
        let window = fiscal_year.window()?;
        info!(
            "Resolved fiscal year {} ({}) to window {}",
            fiscal_year.label, fiscal_year.id, window
        );

        let rules = ClassificationRules::load(self.store.as_ref()).await?;
        let resolver = AgentResolver::load(self.store.as_ref(), &options.agent_overrides).await?;

        Ok(RunPlan {
            fiscal_year,
            window,
            rules,
            resolver,
        })
    }
}

fn build_report(
    run: &SyncRun,
    plan: &RunPlan,
    options: &SyncOptions,
    day_rows: usize,
    result: &AggregateResult,
    counts: ReconcileCounts,
) -> SyncReport {
    SyncReport {
        run_id: run.id,
        fiscal_year_id: plan.fiscal_year.id.clone(),
        fiscal_year_label: plan.fiscal_year.label.clone(),
        window: plan.window,
        dry_run: options.dry_run,
        read_rows: result.stats.read,
        day_rows,
        matched_rows: result.stats.matched,
        skipped_unmatched: result.stats.skipped_unmatched,
        skipped_undated: result.stats.skipped_undated,
        skipped_out_of_window: result.stats.skipped_out_of_window,
        skipped_implausible: result.stats.skipped_implausible,
        ambiguous_worked_days: result.stats.ambiguous_worked_days,
        month_buckets: result.month_totals.len(),
        type_buckets: result.type_totals.len(),
        imported_rows: counts.month_rows,
        imported_type_rows: counts.type_rows,
        inserted: counts.inserted,
        updated: counts.updated,
        started_at: run.started_at,
        finished_at: Utc::now(),
    }
}
