// src/store.rs
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::fiscal::FiscalYear;
use crate::models::{
    AgentMapping, BilledTypeDraft, BilledTypeKey, Employee, EmployeeId, MonthEntry,
    MonthEntryBilledType, MonthEntryDraft, MonthEntryKey, RuleSetKind, UpsertCounts,
};

// --- Storage Error ---

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("File I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    #[error("JSON processing error")]
    Json(#[from] serde_json::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

fn io_context<S: Into<String>>(source: std::io::Error, context: S) -> StoreError {
    StoreError::Io {
        source,
        context: context.into(),
    }
}

// --- Storage Surface ---

/// Everything the sync pipeline reads from or writes to persistent storage.
///
/// The two `upsert_*` batches resolve row identity against the natural key
/// inside the store: an existing row keeps its id, a new key gets a fresh one.
/// A batch is applied entirely or not at all.
#[async_trait]
pub trait TimeStore: Send + Sync {
    async fn fiscal_year(&self, id: &str) -> Result<Option<FiscalYear>, StoreError>;
    async fn fiscal_years(&self) -> Result<Vec<FiscalYear>, StoreError>;
    async fn employees(&self) -> Result<Vec<Employee>, StoreError>;

    async fn agent_mappings(&self) -> Result<Vec<AgentMapping>, StoreError>;
    /// Inserts or replaces the mapping for `mapping.employee_id`.
    async fn upsert_agent_mapping(&self, mapping: AgentMapping) -> Result<(), StoreError>;

    /// `None` when the set has never been configured.
    async fn rule_set(&self, kind: RuleSetKind) -> Result<Option<Vec<String>>, StoreError>;

    async fn month_entries(&self, fiscal_year_id: &str) -> Result<Vec<MonthEntry>, StoreError>;
    async fn upsert_month_entries(
        &self,
        rows: Vec<MonthEntryDraft>,
    ) -> Result<UpsertCounts, StoreError>;

    async fn billed_types(
        &self,
        fiscal_year_id: &str,
    ) -> Result<Vec<MonthEntryBilledType>, StoreError>;
    async fn upsert_billed_types(
        &self,
        rows: Vec<BilledTypeDraft>,
    ) -> Result<UpsertCounts, StoreError>;
}

// --- On-disk Layout ---

/// Serialized form of the whole store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default)]
    pub fiscal_years: Vec<FiscalYear>,
    #[serde(default)]
    pub employees: Vec<Employee>,
    #[serde(default)]
    pub agent_mappings: Vec<AgentMapping>,
    #[serde(default)]
    pub rule_sets: BTreeMap<RuleSetKind, Vec<String>>,
    #[serde(default)]
    pub month_entries: Vec<MonthEntry>,
    #[serde(default)]
    pub billed_types: Vec<MonthEntryBilledType>,
}

/// In-memory state, indexed by natural key so uniqueness holds structurally.
#[derive(Debug, Clone, Default)]
struct StoreState {
    fiscal_years: Vec<FiscalYear>,
    employees: Vec<Employee>,
    agent_mappings: BTreeMap<EmployeeId, AgentMapping>,
    rule_sets: BTreeMap<RuleSetKind, Vec<String>>,
    month_entries: BTreeMap<MonthEntryKey, MonthEntry>,
    billed_types: BTreeMap<BilledTypeKey, MonthEntryBilledType>,
}

impl From<StoreData> for StoreState {
    // Duplicate keys in a hand-edited file collapse to the last occurrence.
    fn from(data: StoreData) -> Self {
        Self {
            fiscal_years: data.fiscal_years,
            employees: data.employees,
            agent_mappings: data
                .agent_mappings
                .into_iter()
                .map(|m| (m.employee_id.clone(), m))
                .collect(),
            rule_sets: data.rule_sets,
            month_entries: data
                .month_entries
                .into_iter()
                .map(|row| (row.key(), row))
                .collect(),
            billed_types: data
                .billed_types
                .into_iter()
                .map(|row| (row.key(), row))
                .collect(),
        }
    }
}

impl StoreState {
    fn to_data(&self) -> StoreData {
        StoreData {
            fiscal_years: self.fiscal_years.clone(),
            employees: self.employees.clone(),
            agent_mappings: self.agent_mappings.values().cloned().collect(),
            rule_sets: self.rule_sets.clone(),
            month_entries: self.month_entries.values().cloned().collect(),
            billed_types: self.billed_types.values().cloned().collect(),
        }
    }
}

// --- File Store ---

/// A [`TimeStore`] held in memory behind one lock and, when opened from a
/// path, rewritten to that JSON file after every successful write.
pub struct FileStore {
    state: Mutex<StoreState>,
    path: Option<PathBuf>,
}

impl FileStore {
    pub fn in_memory(data: StoreData) -> Self {
        Self {
            state: Mutex::new(data.into()),
            path: None,
        }
    }

    /// Opens the store at `path`, starting empty when the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let data = Self::load_data(&path)?.unwrap_or_default();
        info!(
            "Opened data file {:?} ({} fiscal years, {} employees, {} month entries)",
            path,
            data.fiscal_years.len(),
            data.employees.len(),
            data.month_entries.len()
        );
        Ok(Self {
            state: Mutex::new(data.into()),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn load_data(path: &Path) -> Result<Option<StoreData>, StoreError> {
        if !path.exists() {
            return Ok(None);
        }
        let json_string = fs::read_to_string(path)
            .map_err(|e| io_context(e, format!("Failed to read data file: {:?}", path)))?;
        let data: StoreData = serde_json::from_str(&json_string)?;
        Ok(Some(data))
    }

    /// Snapshot of everything currently held.
    pub async fn snapshot(&self) -> StoreData {
        self.state.lock().await.to_data()
    }

    /// Replaces the directory data (fiscal years, employees, rule sets) while
    /// keeping mappings and computed rows.
    pub async fn seed(
        &self,
        fiscal_years: Vec<FiscalYear>,
        employees: Vec<Employee>,
        rule_sets: BTreeMap<RuleSetKind, Vec<String>>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        next.fiscal_years = fiscal_years;
        next.employees = employees;
        next.rule_sets = rule_sets;
        self.persist(&next)?;
        *state = next;
        Ok(())
    }

    // Written to a sibling temp file first so a crash never leaves a torn file.
    fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json_string = serde_json::to_string_pretty(&state.to_data())?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                io_context(e, format!("Failed to create directory for data file: {:?}", parent))
            })?;
        }

        let tmp_path = path.with_extension("json.tmp");
        let mut file = File::create(&tmp_path)
            .map_err(|e| io_context(e, format!("Failed to create data file: {:?}", tmp_path)))?;
        file.write_all(json_string.as_bytes())
            .map_err(|e| io_context(e, format!("Failed to write data file: {:?}", tmp_path)))?;
        file.sync_all()
            .map_err(|e| io_context(e, format!("Failed to flush data file: {:?}", tmp_path)))?;
        fs::rename(&tmp_path, path)
            .map_err(|e| io_context(e, format!("Failed to replace data file: {:?}", path)))?;

        debug!("Persisted store to {:?}", path);
        Ok(())
    }
}

#[async_trait]
impl TimeStore for FileStore {
    async fn fiscal_year(&self, id: &str) -> Result<Option<FiscalYear>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.fiscal_years.iter().find(|fy| fy.id == id).cloned())
    }

    async fn fiscal_years(&self) -> Result<Vec<FiscalYear>, StoreError> {
        Ok(self.state.lock().await.fiscal_years.clone())
    }

    async fn employees(&self) -> Result<Vec<Employee>, StoreError> {
        Ok(self.state.lock().await.employees.clone())
    }

    async fn agent_mappings(&self) -> Result<Vec<AgentMapping>, StoreError> {
        Ok(self.state.lock().await.agent_mappings.values().cloned().collect())
    }

    async fn upsert_agent_mapping(&self, mapping: AgentMapping) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        next.agent_mappings.insert(mapping.employee_id.clone(), mapping);
        self.persist(&next)?;
        *state = next;
        Ok(())
    }

    async fn rule_set(&self, kind: RuleSetKind) -> Result<Option<Vec<String>>, StoreError> {
        Ok(self.state.lock().await.rule_sets.get(&kind).cloned())
    }

    async fn month_entries(&self, fiscal_year_id: &str) -> Result<Vec<MonthEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .month_entries
            .values()
            .filter(|row| row.fiscal_year_id == fiscal_year_id)
            .cloned()
            .collect())
    }

    async fn upsert_month_entries(
        &self,
        rows: Vec<MonthEntryDraft>,
    ) -> Result<UpsertCounts, StoreError> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let now = Utc::now();
        let mut counts = UpsertCounts::default();

        for draft in rows {
            let key = draft.key();
            match next.month_entries.get_mut(&key) {
                Some(existing) => {
                    existing.worked = draft.worked;
                    existing.logged = draft.logged;
                    existing.billed = draft.billed;
                    existing.updated_at = now;
                    counts.updated += 1;
                }
                None => {
                    next.month_entries.insert(
                        key,
                        MonthEntry {
                            id: Uuid::new_v4(),
                            employee_id: draft.employee_id,
                            fiscal_year_id: draft.fiscal_year_id,
                            month_index: draft.month_index,
                            worked: draft.worked,
                            logged: draft.logged,
                            billed: draft.billed,
                            updated_at: now,
                        },
                    );
                    counts.inserted += 1;
                }
            }
        }

        self.persist(&next)?;
        *state = next;
        Ok(counts)
    }

    async fn billed_types(
        &self,
        fiscal_year_id: &str,
    ) -> Result<Vec<MonthEntryBilledType>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .billed_types
            .values()
            .filter(|row| row.fiscal_year_id == fiscal_year_id)
            .cloned()
            .collect())
    }

    async fn upsert_billed_types(
        &self,
        rows: Vec<BilledTypeDraft>,
    ) -> Result<UpsertCounts, StoreError> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let now = Utc::now();
        let mut counts = UpsertCounts::default();

        for draft in rows {
            let key = draft.key();
            match next.billed_types.get_mut(&key) {
                Some(existing) => {
                    existing.hours = draft.hours;
                    existing.updated_at = now;
                    counts.updated += 1;
                }
                None => {
                    next.billed_types.insert(
                        key.clone(),
                        MonthEntryBilledType {
                            id: Uuid::new_v4(),
                            employee_id: key.employee_id,
                            fiscal_year_id: key.fiscal_year_id,
                            month_index: key.month_index,
                            charge_type_name: key.charge_type_name,
                            hours: draft.hours,
                            updated_at: now,
                        },
                    );
                    counts.inserted += 1;
                }
            }
        }

        self.persist(&next)?;
        *state = next;
        Ok(counts)
    }
}
