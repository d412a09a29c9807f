// Change-log model: one immutable row per tracked field mutation.
//
// Rows are written by the audit subsystem and only ever read here.

use crate::error::Result;
use crate::schema::FieldId;
use crate::temporal::TimeWindow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recorded field mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub id: i64,
    pub field_id: FieldId,

    /// Model of the owning message (e.g., "crm.lead")
    pub entity_type: String,

    /// Record the owning message is attached to; `None` for orphaned rows
    pub entity_id: Option<i64>,

    pub new_value_integer: Option<i64>,
    pub new_value_char: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// How a change event refers to its new categorical value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueRef<'a> {
    Id(i64),
    Name(&'a str),
}

impl ChangeEvent {
    /// Integer value when present and non-zero, else the non-empty label
    pub fn value_ref(&self) -> Option<ValueRef<'_>> {
        match self.new_value_integer {
            Some(id) if id != 0 => Some(ValueRef::Id(id)),
            _ => self
                .new_value_char
                .as_deref()
                .filter(|label| !label.is_empty())
                .map(ValueRef::Name),
        }
    }

    /// Linked entity id; zero counts as unlinked
    pub fn linked_entity(&self) -> Option<i64> {
        self.entity_id.filter(|id| *id != 0)
    }
}

/// Read access to the change-log
pub trait ChangeLog {
    /// Events for `field_id` whose owning message belongs to `entity_type`,
    /// bounded inclusively by `window`
    fn search(
        &self,
        field_id: FieldId,
        entity_type: &str,
        window: TimeWindow,
    ) -> Result<Vec<ChangeEvent>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(integer: Option<i64>, label: Option<&str>, entity: Option<i64>) -> ChangeEvent {
        ChangeEvent {
            id: 1,
            field_id: FieldId(1),
            entity_type: "crm.lead".to_string(),
            entity_id: entity,
            new_value_integer: integer,
            new_value_char: label.map(str::to_string),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn test_value_ref_prefers_integer() {
        let ev = event(Some(4), Some("Proposal"), Some(7));
        assert_eq!(ev.value_ref(), Some(ValueRef::Id(4)));
    }

    #[test]
    fn test_value_ref_falls_back_to_label_on_zero() {
        let ev = event(Some(0), Some("Proposal"), Some(7));
        assert_eq!(ev.value_ref(), Some(ValueRef::Name("Proposal")));

        let ev = event(None, Some("Won"), Some(7));
        assert_eq!(ev.value_ref(), Some(ValueRef::Name("Won")));
    }

    #[test]
    fn test_value_ref_none_when_nothing_usable() {
        assert_eq!(event(None, None, Some(7)).value_ref(), None);
        assert_eq!(event(Some(0), Some(""), Some(7)).value_ref(), None);
    }

    #[test]
    fn test_linked_entity_rejects_zero() {
        assert_eq!(event(Some(1), None, Some(0)).linked_entity(), None);
        assert_eq!(event(Some(1), None, None).linked_entity(), None);
        assert_eq!(event(Some(1), None, Some(9)).linked_entity(), Some(9));
    }
}
