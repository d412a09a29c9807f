// Stage-Visit Extractor
//
// Rebuilds, from the change-log of one categorical field, which distinct
// records held which stage inside a time window. A record that entered the
// same stage several times counts once.

use crate::entities::StageTable;
use crate::error::Result;
use crate::schema::FieldRegistry;
use crate::temporal::TimeWindow;
use crate::tracking::{ChangeEvent, ChangeLog, ValueRef};
use std::collections::{btree_map, BTreeMap, BTreeSet, HashMap};
use tracing::debug;

// ============================================================================
// STAGE VISIT SET
// ============================================================================

/// `stage_id -> distinct entity ids` that visited the stage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageVisitSet {
    visits: BTreeMap<i64, BTreeSet<i64>>,
}

impl StageVisitSet {
    pub fn new() -> Self {
        StageVisitSet::default()
    }

    /// Set-union insert; returns false when the pair was already present
    pub fn insert(&mut self, stage_id: i64, entity_id: i64) -> bool {
        self.visits.entry(stage_id).or_default().insert(entity_id)
    }

    pub fn get(&self, stage_id: i64) -> Option<&BTreeSet<i64>> {
        self.visits.get(&stage_id)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, i64, BTreeSet<i64>> {
        self.visits.iter()
    }

    /// Number of stages with at least one visit
    pub fn stage_count(&self) -> usize {
        self.visits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visits.is_empty()
    }
}

impl<'a> IntoIterator for &'a StageVisitSet {
    type Item = (&'a i64, &'a BTreeSet<i64>);
    type IntoIter = btree_map::Iter<'a, i64, BTreeSet<i64>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// ============================================================================
// EXTRACTION
// ============================================================================

/// Collect stage visits of `entity_type.field_name` inside `window`.
///
/// An unregistered field yields an empty set. Events whose stage or entity
/// cannot be resolved are dropped.
pub fn extract_stage_visits<R>(
    repo: &R,
    fields: &FieldRegistry,
    entity_type: &str,
    field_name: &str,
    window: TimeWindow,
) -> Result<StageVisitSet>
where
    R: ChangeLog + StageTable + ?Sized,
{
    let Some(field_id) = fields.lookup(entity_type, field_name) else {
        debug!(entity_type, field_name, "field not tracked, no stage visits");
        return Ok(StageVisitSet::new());
    };

    let events = repo.search(field_id, entity_type, window)?;
    let mut resolver = StageResolver::new(repo);
    let mut visits = StageVisitSet::new();
    let mut dropped = 0usize;

    for event in &events {
        match (resolver.resolve(event)?, event.linked_entity()) {
            (Some(stage_id), Some(entity_id)) => {
                visits.insert(stage_id, entity_id);
            }
            _ => dropped += 1,
        }
    }

    debug!(
        entity_type,
        field_name,
        events = events.len(),
        dropped,
        stages = visits.stage_count(),
        "extracted stage visits"
    );

    Ok(visits)
}

/// Resolves event values to stage ids, memoising name lookups
struct StageResolver<'r, R: ?Sized> {
    stages: &'r R,
    by_name: HashMap<String, Option<i64>>,
}

impl<'r, R: StageTable + ?Sized> StageResolver<'r, R> {
    fn new(stages: &'r R) -> Self {
        StageResolver {
            stages,
            by_name: HashMap::new(),
        }
    }

    fn resolve(&mut self, event: &ChangeEvent) -> Result<Option<i64>> {
        match event.value_ref() {
            Some(ValueRef::Id(id)) => Ok(Some(id)),
            Some(ValueRef::Name(name)) => {
                if let Some(cached) = self.by_name.get(name) {
                    return Ok(*cached);
                }
                let id = self.stages.lookup_by_name(name)?.map(|stage| stage.id);
                self.by_name.insert(name.to_string(), id);
                Ok(id)
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        insert_message, insert_stage, insert_tracking_value, record_stage_change, setup_database,
        NewTrackingValue, SqliteStore, StageValue,
    };
    use crate::schema::{FieldDefinition, FieldId};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use rusqlite::Connection;

    const STAGE_FIELD: FieldId = FieldId(1);

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn registry() -> FieldRegistry {
        let mut fields = FieldRegistry::empty();
        fields.register(FieldDefinition::new(1, "crm.lead", "stage_id"));
        fields
    }

    fn move_to(conn: &Connection, lead: i64, value: StageValue<'_>, when: DateTime<Utc>) {
        record_stage_change(conn, STAGE_FIELD, "crm.lead", lead, value, when).unwrap();
    }

    fn extract(conn: &Connection, window: TimeWindow) -> StageVisitSet {
        let store = SqliteStore::new(conn);
        extract_stage_visits(&store, &registry(), "crm.lead", "stage_id", window).unwrap()
    }

    #[test]
    fn test_duplicate_visits_count_once() {
        let conn = test_db();
        let proposal = insert_stage(&conn, "Proposal", 20).unwrap();

        move_to(&conn, 7, StageValue::Id(proposal), at(2024, 3, 2, 9, 0, 0));
        move_to(&conn, 7, StageValue::Id(proposal), at(2024, 3, 20, 9, 0, 0));
        move_to(&conn, 9, StageValue::Name("Proposal"), at(2024, 3, 21, 9, 0, 0));

        let visits = extract(&conn, TimeWindow::month(2024, 3).unwrap());

        assert_eq!(visits.stage_count(), 1);
        let leads: Vec<i64> = visits.get(proposal).unwrap().iter().copied().collect();
        assert_eq!(leads, vec![7, 9]);
    }

    #[test]
    fn test_unresolvable_name_is_dropped() {
        let conn = test_db();
        insert_stage(&conn, "Qualified", 10).unwrap();

        move_to(&conn, 7, StageValue::Name("Ghost"), at(2024, 3, 2, 9, 0, 0));

        assert!(extract(&conn, TimeWindow::unbounded()).is_empty());
    }

    #[test]
    fn test_orphaned_and_zero_entity_events_are_dropped() {
        let conn = test_db();
        let stage = insert_stage(&conn, "New", 1).unwrap();

        let unlinked = insert_message(&conn, "crm.lead", None).unwrap();
        let zero = insert_message(&conn, "crm.lead", Some(0)).unwrap();
        for message_id in [unlinked, zero] {
            insert_tracking_value(
                &conn,
                &NewTrackingValue {
                    field_id: STAGE_FIELD,
                    message_id: Some(message_id),
                    new_value_integer: Some(stage),
                    new_value_char: None,
                    occurred_at: at(2024, 3, 2, 9, 0, 0),
                },
            )
            .unwrap();
        }

        assert!(extract(&conn, TimeWindow::unbounded()).is_empty());
    }

    #[test]
    fn test_zero_integer_falls_back_to_label() {
        let conn = test_db();
        let won = insert_stage(&conn, "Won", 70).unwrap();
        let message_id = insert_message(&conn, "crm.lead", Some(11)).unwrap();

        insert_tracking_value(
            &conn,
            &NewTrackingValue {
                field_id: STAGE_FIELD,
                message_id: Some(message_id),
                new_value_integer: Some(0),
                new_value_char: Some("Won"),
                occurred_at: at(2024, 5, 1, 0, 0, 0),
            },
        )
        .unwrap();

        let visits = extract(&conn, TimeWindow::unbounded());
        assert!(visits.get(won).unwrap().contains(&11));
    }

    #[test]
    fn test_unregistered_field_yields_empty() {
        let conn = test_db();
        let stage = insert_stage(&conn, "New", 1).unwrap();
        move_to(&conn, 7, StageValue::Id(stage), at(2024, 3, 2, 9, 0, 0));

        let store = SqliteStore::new(&conn);
        let visits = extract_stage_visits(
            &store,
            &FieldRegistry::empty(),
            "crm.lead",
            "stage_id",
            TimeWindow::unbounded(),
        )
        .unwrap();

        assert!(visits.is_empty());
    }

    #[test]
    fn test_window_edges_inclusive() {
        let conn = test_db();
        let stage = insert_stage(&conn, "New", 1).unwrap();
        let first = at(2024, 3, 1, 0, 0, 0);
        let last = at(2024, 3, 31, 23, 59, 59);

        move_to(&conn, 1, StageValue::Id(stage), first);
        move_to(&conn, 2, StageValue::Id(stage), last);
        move_to(&conn, 3, StageValue::Id(stage), first - Duration::seconds(1));
        move_to(&conn, 4, StageValue::Id(stage), last + Duration::seconds(1));

        let visits = extract(&conn, TimeWindow::month(2024, 3).unwrap());
        let leads: Vec<i64> = visits.get(stage).unwrap().iter().copied().collect();

        assert_eq!(leads, vec![1, 2]);
    }

    #[test]
    fn test_window_edges_inclusive_for_whole_second_rows() {
        let conn = test_db();
        let stage = insert_stage(&conn, "New", 1).unwrap();

        for (lead, create_date) in [
            (1, "2024-03-01 00:00:00"),
            (2, "2024-03-31 23:59:59"),
            (3, "2024-02-29 23:59:59"),
            (4, "2024-04-01 00:00:00"),
        ] {
            let message_id = insert_message(&conn, "crm.lead", Some(lead)).unwrap();
            conn.execute(
                "INSERT INTO tracking_values (field_id, message_id, new_value_integer, create_date)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![STAGE_FIELD.0, message_id, stage, create_date],
            )
            .unwrap();
        }

        let visits = extract(&conn, TimeWindow::month(2024, 3).unwrap());
        let leads: Vec<i64> = visits.get(stage).unwrap().iter().copied().collect();

        assert_eq!(leads, vec![1, 2]);
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let conn = test_db();
        let a = insert_stage(&conn, "A", 1).unwrap();
        let b = insert_stage(&conn, "B", 2).unwrap();
        move_to(&conn, 1, StageValue::Id(a), at(2024, 3, 2, 9, 0, 0));
        move_to(&conn, 1, StageValue::Id(b), at(2024, 3, 3, 9, 0, 0));
        move_to(&conn, 2, StageValue::Name("B"), at(2024, 3, 4, 9, 0, 0));

        let first = extract(&conn, TimeWindow::unbounded());
        let second = extract(&conn, TimeWindow::unbounded());

        assert_eq!(first, second);
        assert_eq!(first.stage_count(), 2);
    }

    #[test]
    fn test_stage_visit_set_insert_is_union() {
        let mut visits = StageVisitSet::new();
        assert!(visits.insert(1, 7));
        assert!(!visits.insert(1, 7));
        assert!(visits.insert(1, 9));

        assert_eq!(visits.get(1).unwrap().len(), 2);
    }
}
