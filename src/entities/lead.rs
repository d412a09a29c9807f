// Lead entity, reduced to what the stage report attributes
//
// Owner and team are denormalised display names: a lead without an owner
// (or whose owner was removed) simply has `owner_name = None`.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    pub id: i64,
    pub name: String,

    /// Display name of the salesperson the lead is assigned to
    pub owner_name: Option<String>,

    /// Display name of the sales team the lead belongs to
    pub team_name: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// Read access to lead records
pub trait LeadStore {
    /// Leads for the given ids; ids without a record are skipped
    fn fetch_by_ids(&self, ids: &[i64]) -> Result<Vec<Lead>>;

    /// Creation time of the oldest lead, `None` when there are no leads
    fn earliest_created_at(&self) -> Result<Option<DateTime<Utc>>>;
}

/// Sorted distinct owner names across `leads`
pub fn owner_names(leads: &[Lead]) -> BTreeSet<String> {
    distinct_names(leads.iter().map(|lead| lead.owner_name.as_deref()))
}

/// Sorted distinct team names across `leads`
pub fn team_names(leads: &[Lead]) -> BTreeSet<String> {
    distinct_names(leads.iter().map(|lead| lead.team_name.as_deref()))
}

fn distinct_names<'a>(names: impl Iterator<Item = Option<&'a str>>) -> BTreeSet<String> {
    names
        .flatten()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
