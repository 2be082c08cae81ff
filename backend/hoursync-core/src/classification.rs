// src/classification.rs
use std::collections::HashSet;
use tracing::debug;

use crate::models::RuleSetKind;
use crate::records::TimesheetEvent;
use crate::store::{StoreError, TimeStore};

// --- Default Rule Sets ---

pub const DEFAULT_BILLABLE_CHARGE_TYPES: &[&str] = &[
    "project",
    "project management",
    "remote support",
    "onsite support",
    "on-site support",
    "support",
    "consulting",
    "development",
    "implementation",
    "installation",
    "configuration",
    "migration",
    "maintenance",
    "training",
    "billable",
];

pub const DEFAULT_EXCLUDED_LOGGED_CHARGE_TYPES: &[&str] = &["holiday", "vacation", "break"];

pub const DEFAULT_EXCLUDED_BREAK_TYPES: &[&str] = &[
    "break",
    "lunch",
    "lunch break",
    "coffee break",
    "rest break",
    "pause",
];

pub const DEFAULT_EXCLUDED_HOLIDAY_TYPES: &[&str] = &[
    "holiday",
    "public holiday",
    "bank holiday",
    "vacation",
    "annual leave",
    "sick leave",
    "leave",
];

fn defaults_for(kind: RuleSetKind) -> &'static [&'static str] {
    match kind {
        RuleSetKind::BillableChargeTypes => DEFAULT_BILLABLE_CHARGE_TYPES,
        RuleSetKind::ExcludedLoggedChargeTypes => DEFAULT_EXCLUDED_LOGGED_CHARGE_TYPES,
        RuleSetKind::ExcludedBreakTypes => DEFAULT_EXCLUDED_BREAK_TYPES,
        RuleSetKind::ExcludedHolidayTypes => DEFAULT_EXCLUDED_HOLIDAY_TYPES,
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

fn normalized_set<I, S>(values: I) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values
        .into_iter()
        .map(|v| normalize(v.as_ref()))
        .filter(|v| !v.is_empty())
        .collect()
}

// --- Rules ---

/// The effective classification sets for one sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationRules {
    billable_charge_types: HashSet<String>,
    excluded_logged_charge_types: HashSet<String>,
    excluded_break_types: HashSet<String>,
    excluded_holiday_types: HashSet<String>,
}

impl Default for ClassificationRules {
    fn default() -> Self {
        Self {
            billable_charge_types: normalized_set(DEFAULT_BILLABLE_CHARGE_TYPES),
            excluded_logged_charge_types: normalized_set(DEFAULT_EXCLUDED_LOGGED_CHARGE_TYPES),
            excluded_break_types: normalized_set(DEFAULT_EXCLUDED_BREAK_TYPES),
            excluded_holiday_types: normalized_set(DEFAULT_EXCLUDED_HOLIDAY_TYPES),
        }
    }
}

impl ClassificationRules {
    /// Reads all four sets from storage. A set that is missing, or empty once
    /// blanks are dropped, falls back to its default.
    pub async fn load(store: &dyn TimeStore) -> Result<Self, StoreError> {
        let mut rules = Self::default();
        for kind in RuleSetKind::ALL {
            match store.rule_set(kind).await? {
                Some(values) => rules = rules.with_set(kind, values),
                None => debug!("Rule set {} not configured, using defaults", kind.as_str()),
            }
        }
        Ok(rules)
    }

    /// Replaces one set; an effectively empty override keeps the default.
    pub fn with_set<I, S>(mut self, kind: RuleSetKind, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = normalized_set(values);
        if set.is_empty() {
            debug!("Rule set {} is empty, using defaults", kind.as_str());
            set = normalized_set(defaults_for(kind));
        }
        *self.set_mut(kind) = set;
        self
    }

    pub fn set(&self, kind: RuleSetKind) -> &HashSet<String> {
        match kind {
            RuleSetKind::BillableChargeTypes => &self.billable_charge_types,
            RuleSetKind::ExcludedLoggedChargeTypes => &self.excluded_logged_charge_types,
            RuleSetKind::ExcludedBreakTypes => &self.excluded_break_types,
            RuleSetKind::ExcludedHolidayTypes => &self.excluded_holiday_types,
        }
    }

    fn set_mut(&mut self, kind: RuleSetKind) -> &mut HashSet<String> {
        match kind {
            RuleSetKind::BillableChargeTypes => &mut self.billable_charge_types,
            RuleSetKind::ExcludedLoggedChargeTypes => &mut self.excluded_logged_charge_types,
            RuleSetKind::ExcludedBreakTypes => &mut self.excluded_break_types,
            RuleSetKind::ExcludedHolidayTypes => &mut self.excluded_holiday_types,
        }
    }

    pub fn is_billable(&self, charge_type_name: &str) -> bool {
        self.billable_charge_types
            .contains(&normalize(charge_type_name))
    }

    /// Breaks, holidays and explicitly excluded charge types do not count as
    /// logged time.
    pub fn is_excluded_from_logged(&self, event: &TimesheetEvent) -> bool {
        let in_set = |set: &HashSet<String>, value: Option<&str>| {
            value.is_some_and(|v| set.contains(&normalize(v)))
        };

        let charge_type = event.charge_type_name.as_deref();
        let break_label = event.break_label.as_deref();
        let break_code_text = event.break_code.map(|code| code.to_string());

        let excluded_charge = in_set(&self.excluded_logged_charge_types, charge_type);

        let excluded_break = event.break_code.is_some_and(|code| code > 0)
            || in_set(&self.excluded_break_types, break_label)
            || in_set(&self.excluded_break_types, break_code_text.as_deref());

        let excluded_holiday = event.holiday_id.is_some_and(|id| id > 0)
            || in_set(&self.excluded_holiday_types, break_label)
            || in_set(&self.excluded_holiday_types, event.holiday_label.as_deref());

        excluded_charge || excluded_break || excluded_holiday
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileStore, StoreData};

    fn event() -> TimesheetEvent {
        TimesheetEvent {
            agent_id: Some("12".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn default_billable_set_matches_case_and_whitespace_insensitively() {
        let rules = ClassificationRules::default();
        assert!(rules.is_billable("Remote Support"));
        assert!(rules.is_billable("  PROJECT "));
        assert!(!rules.is_billable("Internal Meeting"));
        assert!(!rules.is_billable(""));
        assert_eq!(rules.set(RuleSetKind::BillableChargeTypes).len(), 15);
    }

    #[test]
    fn plain_event_is_logged() {
        let rules = ClassificationRules::default();
        let mut e = event();
        e.charge_type_name = Some("Internal Meeting".to_string());
        assert!(!rules.is_excluded_from_logged(&e));
    }

    #[test]
    fn excluded_charge_type_is_not_logged() {
        let rules = ClassificationRules::default();
        let mut e = event();
        e.charge_type_name = Some("Vacation".to_string());
        assert!(rules.is_excluded_from_logged(&e));
    }

    #[test]
    fn positive_break_code_is_not_logged() {
        let rules = ClassificationRules::default();
        let mut e = event();
        e.break_code = Some(2);
        assert!(rules.is_excluded_from_logged(&e));

        e.break_code = Some(0);
        assert!(!rules.is_excluded_from_logged(&e));
    }

    #[test]
    fn break_label_is_matched_against_break_set() {
        let rules = ClassificationRules::default();
        let mut e = event();
        e.break_label = Some("Lunch Break".to_string());
        assert!(rules.is_excluded_from_logged(&e));
    }

    #[test]
    fn any_positive_holiday_id_excludes_regardless_of_charge_type() {
        let rules = ClassificationRules::default();
        let mut e = event();
        e.charge_type_name = Some("project".to_string());
        e.holiday_id = Some(3);
        assert!(rules.is_excluded_from_logged(&e));
        assert!(rules.is_billable("project"));
    }

    #[test]
    fn holiday_label_is_matched_against_holiday_set() {
        let rules = ClassificationRules::default();
        let mut e = event();
        e.holiday_label = Some("Public Holiday".to_string());
        assert!(rules.is_excluded_from_logged(&e));

        let mut as_break = event();
        as_break.break_label = Some("annual leave".to_string());
        assert!(rules.is_excluded_from_logged(&as_break));
    }

    #[test]
    fn override_replaces_default_set() {
        let rules = ClassificationRules::default()
            .with_set(RuleSetKind::BillableChargeTypes, ["Consulting Plus"]);
        assert!(rules.is_billable("consulting plus"));
        assert!(!rules.is_billable("project"));
    }

    #[test]
    fn blank_override_keeps_default() {
        let rules = ClassificationRules::default()
            .with_set(RuleSetKind::ExcludedBreakTypes, ["", "   "]);
        assert_eq!(rules, ClassificationRules::default());
    }

    #[tokio::test]
    async fn load_falls_back_per_set() {
        let mut data = StoreData::default();
        data.rule_sets.insert(
            RuleSetKind::BillableChargeTypes,
            vec!["Internal Meeting".to_string()],
        );
        data.rule_sets
            .insert(RuleSetKind::ExcludedHolidayTypes, Vec::new());
        let store = FileStore::in_memory(data);

        let rules = ClassificationRules::load(&store).await.unwrap();
        assert!(rules.is_billable("internal meeting"));
        assert!(!rules.is_billable("project"));
        assert_eq!(
            rules.set(RuleSetKind::ExcludedHolidayTypes),
            ClassificationRules::default().set(RuleSetKind::ExcludedHolidayTypes)
        );
    }
}
