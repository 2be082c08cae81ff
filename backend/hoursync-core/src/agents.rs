// src/agents.rs
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

use crate::models::{AgentMapping, Employee, EmployeeId};
use crate::records::{canonical_agent_id, AgentId, TimesheetEvent};
use crate::store::{StoreError, TimeStore};

/// Caller-supplied overrides for one run, keyed by agent id (numeric string)
/// or by agent display name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentOverrides(pub BTreeMap<String, EmployeeId>);

impl AgentOverrides {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<EmployeeId>> FromIterator<(K, V)> for AgentOverrides {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Which rule produced a match. Useful in debug logs when a bucket looks off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    Mapping,
    OverrideById,
    OverrideByName,
    EmployeeName,
}

fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Builds a lookup that drops keys claimed by more than one distinct employee.
fn unambiguous<I>(pairs: I, what: &str) -> HashMap<String, EmployeeId>
where
    I: IntoIterator<Item = (String, EmployeeId)>,
{
    let mut seen: HashMap<String, EmployeeId> = HashMap::new();
    let mut ambiguous: HashSet<String> = HashSet::new();
    for (key, employee_id) in pairs {
        if key.is_empty() {
            continue;
        }
        match seen.get(&key) {
            Some(existing) if *existing != employee_id => {
                ambiguous.insert(key);
            }
            Some(_) => {}
            None => {
                seen.insert(key, employee_id);
            }
        }
    }
    for key in &ambiguous {
        warn!("{} '{}' matches more than one employee; it will not resolve", what, key);
        seen.remove(key);
    }
    seen
}

// --- Resolver ---

#[derive(Debug, Clone, Default)]
pub struct AgentResolver {
    mapped: HashMap<AgentId, EmployeeId>,
    override_by_id: HashMap<AgentId, EmployeeId>,
    override_by_name: HashMap<String, EmployeeId>,
    employee_names: HashMap<String, EmployeeId>,
}

impl AgentResolver {
    pub fn new(
        mappings: &[AgentMapping],
        employees: &[Employee],
        overrides: &AgentOverrides,
    ) -> Self {
        let mapped = unambiguous(
            mappings.iter().filter_map(|m| {
                canonical_agent_id(&m.agent_id).map(|agent| (agent, m.employee_id.clone()))
            }),
            "Agent id",
        );

        let mut override_by_id = HashMap::new();
        let mut override_by_name = HashMap::new();
        for (key, employee_id) in &overrides.0 {
            let trimmed = key.trim();
            if trimmed.parse::<i64>().is_ok() {
                if let Some(agent) = canonical_agent_id(trimmed) {
                    override_by_id.insert(agent, employee_id.clone());
                }
            } else if !trimmed.is_empty() {
                override_by_name.insert(name_key(trimmed), employee_id.clone());
            }
        }

        let employee_names = unambiguous(
            employees.iter().map(|e| (name_key(&e.name), e.id.clone())),
            "Employee name",
        );

        debug!(
            "Agent resolver: {} mappings, {} id overrides, {} name overrides, {} employee names",
            mapped.len(),
            override_by_id.len(),
            override_by_name.len(),
            employee_names.len()
        );

        Self {
            mapped,
            override_by_id,
            override_by_name,
            employee_names,
        }
    }

    /// Reads the persisted mappings and the employee directory.
    pub async fn load(
        store: &dyn TimeStore,
        overrides: &AgentOverrides,
    ) -> Result<Self, StoreError> {
        let mappings = store.agent_mappings().await?;
        let employees = store.employees().await?;
        Ok(Self::new(&mappings, &employees, overrides))
    }

    pub fn resolve(&self, event: &TimesheetEvent) -> Option<&str> {
        self.resolve_with_source(event).map(|(id, _)| id)
    }

    /// First match wins: persisted mapping, override by id, override by name,
    /// then the employee directory by name.
    pub fn resolve_with_source(&self, event: &TimesheetEvent) -> Option<(&str, MatchSource)> {
        let agent_id = event.agent_id.as_deref();
        let agent_name = event.agent_name.as_deref().map(name_key);

        if let Some(id) = agent_id.and_then(|a| self.mapped.get(a)) {
            return Some((id.as_str(), MatchSource::Mapping));
        }
        if let Some(id) = agent_id.and_then(|a| self.override_by_id.get(a)) {
            return Some((id.as_str(), MatchSource::OverrideById));
        }
        if let Some(name) = agent_name.as_deref() {
            if let Some(id) = self.override_by_name.get(name) {
                return Some((id.as_str(), MatchSource::OverrideByName));
            }
            if let Some(id) = self.employee_names.get(name) {
                return Some((id.as_str(), MatchSource::EmployeeName));
            }
        }
        None
    }
}
