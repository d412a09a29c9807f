// Monthly Aggregator
//
// Turns stage visits into one summary row per stage per month, with the
// salespeople and teams of the leads involved.
//
// Ordering contract:
//   - within a month: lead_count descending, then stage_name ascending
//   - across a year: month-major (January rows first), never re-sorted

use crate::entities::{display_name, owner_names, team_names, LeadStore, StageTable};
use crate::error::Result;
use crate::extractor::extract_stage_visits;
use crate::schema::FieldRegistry;
use crate::temporal::{month_name, MonthSelection, TimeWindow};
use crate::tracking::ChangeLog;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// Placeholder written when no lead of a stage has an owner (or a team)
pub const NOT_AVAILABLE: &str = "N/A";

/// Everything the aggregator reads: change-log, stage table and leads
pub trait CrmRepository: ChangeLog + StageTable + LeadStore {}

impl<T: ChangeLog + StageTable + LeadStore + ?Sized> CrmRepository for T {}

/// Which entity type and field carry the pipeline stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFieldRef {
    pub model: String,
    pub field: String,
}

impl StageFieldRef {
    pub fn new(model: impl Into<String>, field: impl Into<String>) -> Self {
        StageFieldRef {
            model: model.into(),
            field: field.into(),
        }
    }
}

impl Default for StageFieldRef {
    fn default() -> Self {
        StageFieldRef::new(
            crate::config::DEFAULT_LEAD_MODEL,
            crate::config::DEFAULT_STAGE_FIELD,
        )
    }
}

// ============================================================================
// SUMMARY ROW
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub year: i32,

    /// Source month; `None` marks an all-months row
    pub month: Option<u32>,
    pub month_name: Option<String>,

    pub stage_id: i64,
    pub stage_name: String,

    /// Distinct leads that visited the stage
    pub lead_count: usize,

    /// Sorted distinct owner names joined with ", " (or "N/A")
    pub sales_persons: String,

    /// Sorted distinct team names joined with ", " (or "N/A")
    pub sales_teams: String,
}

impl SummaryRow {
    /// Month label for the report ("March", or "All")
    pub fn month_label(&self) -> &str {
        self.month_name.as_deref().unwrap_or("All")
    }

    fn stamp_month(mut self, month: u32) -> Self {
        self.month = Some(month);
        self.month_name = month_name(month).map(str::to_string);
        self
    }
}

fn join_names(names: BTreeSet<String>) -> String {
    if names.is_empty() {
        NOT_AVAILABLE.to_string()
    } else {
        names.into_iter().collect::<Vec<_>>().join(", ")
    }
}

// ============================================================================
// AGGREGATION
// ============================================================================

/// Summary rows for the stage visits of one calendar month
pub fn rows_for_month<R>(
    repo: &R,
    fields: &FieldRegistry,
    stage_field: &StageFieldRef,
    year: i32,
    month: u32,
) -> Result<Vec<SummaryRow>>
where
    R: CrmRepository + ?Sized,
{
    let window = TimeWindow::month(year, month)?;
    let visits =
        extract_stage_visits(repo, fields, &stage_field.model, &stage_field.field, window)?;

    let mut rows = Vec::with_capacity(visits.stage_count());
    for (&stage_id, lead_ids) in &visits {
        if lead_ids.is_empty() {
            continue;
        }

        let stage = repo.fetch_by_id(stage_id)?;
        let ids: Vec<i64> = lead_ids.iter().copied().collect();
        let leads = repo.fetch_by_ids(&ids)?;

        rows.push(SummaryRow {
            year,
            month: None,
            month_name: None,
            stage_id,
            stage_name: display_name(stage.as_ref()),
            lead_count: lead_ids.len(),
            sales_persons: join_names(owner_names(&leads)),
            sales_teams: join_names(team_names(&leads)),
        }
        .stamp_month(month));
    }

    sort_rows(&mut rows);
    debug!(year, month, rows = rows.len(), "aggregated month");
    Ok(rows)
}

/// Summary rows for all twelve months of `year`, month-major
pub fn rows_for_year<R>(
    repo: &R,
    fields: &FieldRegistry,
    stage_field: &StageFieldRef,
    year: i32,
) -> Result<Vec<SummaryRow>>
where
    R: CrmRepository + ?Sized,
{
    let mut rows = Vec::new();
    for month in 1..=12 {
        rows.extend(rows_for_month(repo, fields, stage_field, year, month)?);
    }
    Ok(rows)
}

/// Dispatch on the report form's month selection
pub fn rows_for_period<R>(
    repo: &R,
    fields: &FieldRegistry,
    stage_field: &StageFieldRef,
    year: i32,
    month: MonthSelection,
) -> Result<Vec<SummaryRow>>
where
    R: CrmRepository + ?Sized,
{
    match month {
        MonthSelection::All => rows_for_year(repo, fields, stage_field, year),
        MonthSelection::Month(m) => rows_for_month(repo, fields, stage_field, year, m),
    }
}

/// lead_count descending, ties by stage_name ascending
pub fn sort_rows(rows: &mut [SummaryRow]) {
    rows.sort_by(|a, b| {
        b.lead_count
            .cmp(&a.lead_count)
            .then_with(|| a.stage_name.cmp(&b.stage_name))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        delete_stage, insert_lead, insert_stage, insert_team, insert_user, record_stage_change,
        setup_database, NewLead, SqliteStore, StageValue,
    };
    use crate::error::ReportError;
    use crate::schema::{FieldDefinition, FieldId};
    use chrono::{DateTime, TimeZone, Utc};
    use rusqlite::Connection;

    const STAGE_FIELD: FieldId = FieldId(1);

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
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

    fn lead(conn: &Connection, name: &str, user: Option<i64>, team: Option<i64>) -> i64 {
        insert_lead(
            conn,
            &NewLead {
                name,
                user_id: user,
                team_id: team,
                created_at: at(2023, 1, 1, 0),
            },
        )
        .unwrap()
    }

    fn move_to(conn: &Connection, lead_id: i64, value: StageValue<'_>, when: DateTime<Utc>) {
        record_stage_change(conn, STAGE_FIELD, "crm.lead", lead_id, value, when).unwrap();
    }

    fn month(conn: &Connection, year: i32, m: u32) -> Vec<SummaryRow> {
        let store = SqliteStore::new(conn);
        rows_for_month(&store, &registry(), &StageFieldRef::default(), year, m).unwrap()
    }

    #[test]
    fn test_proposal_scenario_counts_distinct_leads() {
        let conn = test_db();
        let proposal = insert_stage(&conn, "Proposal", 20).unwrap();
        let alice = insert_user(&conn, "Alice").unwrap();
        let north = insert_team(&conn, "North").unwrap();
        let e7 = lead(&conn, "E7", Some(alice), Some(north));
        let e9 = lead(&conn, "E9", None, Some(north));

        move_to(&conn, e7, StageValue::Id(proposal), at(2024, 3, 4, 10));
        move_to(&conn, e7, StageValue::Id(proposal), at(2024, 3, 18, 10));
        move_to(&conn, e9, StageValue::Name("Proposal"), at(2024, 3, 25, 10));

        let rows = month(&conn, 2024, 3);

        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.stage_name, "Proposal");
        assert_eq!(row.lead_count, 2);
        assert_eq!(row.sales_persons, "Alice");
        assert_eq!(row.sales_teams, "North");
        assert_eq!(row.year, 2024);
        assert_eq!(row.month, Some(3));
        assert_eq!(row.month_label(), "March");
    }

    #[test]
    fn test_rows_sorted_by_count_then_name() {
        let conn = test_db();
        let won = insert_stage(&conn, "Won", 70).unwrap();
        let new = insert_stage(&conn, "New", 1).unwrap();
        let lost = insert_stage(&conn, "Lost", 80).unwrap();

        let leads: Vec<i64> = (0..3).map(|i| lead(&conn, &format!("L{}", i), None, None)).collect();
        for (i, &id) in leads.iter().enumerate() {
            move_to(&conn, id, StageValue::Id(new), at(2024, 3, 1 + i as u32, 9));
        }
        move_to(&conn, leads[0], StageValue::Id(won), at(2024, 3, 10, 9));
        move_to(&conn, leads[1], StageValue::Id(lost), at(2024, 3, 11, 9));

        let rows = month(&conn, 2024, 3);
        let order: Vec<(&str, usize)> = rows
            .iter()
            .map(|r| (r.stage_name.as_str(), r.lead_count))
            .collect();

        assert_eq!(order, vec![("New", 3), ("Lost", 1), ("Won", 1)]);
        for pair in rows.windows(2) {
            assert!(pair[0].lead_count >= pair[1].lead_count);
            if pair[0].lead_count == pair[1].lead_count {
                assert!(pair[0].stage_name <= pair[1].stage_name);
            }
        }
    }

    #[test]
    fn test_missing_owner_and_team_give_na() {
        let conn = test_db();
        let stage = insert_stage(&conn, "New", 1).unwrap();
        let orphan = lead(&conn, "Orphan", None, None);
        move_to(&conn, orphan, StageValue::Id(stage), at(2024, 3, 2, 9));

        let rows = month(&conn, 2024, 3);
        assert_eq!(rows[0].sales_persons, NOT_AVAILABLE);
        assert_eq!(rows[0].sales_teams, NOT_AVAILABLE);
    }

    #[test]
    fn test_owners_joined_sorted() {
        let conn = test_db();
        let stage = insert_stage(&conn, "New", 1).unwrap();
        let zoe = insert_user(&conn, "Zoe").unwrap();
        let bob = insert_user(&conn, "Bob").unwrap();
        let south = insert_team(&conn, "South").unwrap();
        let north = insert_team(&conn, "North").unwrap();

        for (user, team) in [(zoe, south), (bob, north), (zoe, north)] {
            let id = lead(&conn, "L", Some(user), Some(team));
            move_to(&conn, id, StageValue::Id(stage), at(2024, 3, 2, 9));
        }

        let rows = month(&conn, 2024, 3);
        assert_eq!(rows[0].sales_persons, "Bob, Zoe");
        assert_eq!(rows[0].sales_teams, "North, South");
    }

    #[test]
    fn test_deleted_stage_is_undefined() {
        let conn = test_db();
        let gone = insert_stage(&conn, "Negotiation", 40).unwrap();
        let id = lead(&conn, "L", None, None);
        move_to(&conn, id, StageValue::Id(gone), at(2024, 3, 2, 9));
        delete_stage(&conn, gone).unwrap();

        let rows = month(&conn, 2024, 3);
        assert_eq!(rows[0].stage_name, crate::entities::UNDEFINED_STAGE);
        assert_eq!(rows[0].lead_count, 1);
    }

    #[test]
    fn test_deleted_lead_still_counted_without_attribution() {
        let conn = test_db();
        let stage = insert_stage(&conn, "New", 1).unwrap();
        move_to(&conn, 4242, StageValue::Id(stage), at(2024, 3, 2, 9));

        let rows = month(&conn, 2024, 3);
        assert_eq!(rows[0].lead_count, 1);
        assert_eq!(rows[0].sales_persons, NOT_AVAILABLE);
    }

    #[test]
    fn test_missing_field_registration_yields_no_rows() {
        let conn = test_db();
        let stage = insert_stage(&conn, "New", 1).unwrap();
        let id = lead(&conn, "L", None, None);
        move_to(&conn, id, StageValue::Id(stage), at(2024, 3, 2, 9));

        let store = SqliteStore::new(&conn);
        let empty = FieldRegistry::empty();
        let field = StageFieldRef::default();

        assert!(rows_for_month(&store, &empty, &field, 2024, 3).unwrap().is_empty());
        assert!(rows_for_year(&store, &empty, &field, 2024).unwrap().is_empty());
    }

    #[test]
    fn test_year_rows_are_month_major() {
        let conn = test_db();
        let a = insert_stage(&conn, "Alpha", 1).unwrap();
        let b = insert_stage(&conn, "Beta", 2).unwrap();
        let l1 = lead(&conn, "L1", None, None);
        let l2 = lead(&conn, "L2", None, None);

        // November has a bigger block than February; order must stay by month
        move_to(&conn, l1, StageValue::Id(a), at(2024, 2, 3, 9));
        move_to(&conn, l1, StageValue::Id(b), at(2024, 11, 3, 9));
        move_to(&conn, l2, StageValue::Id(b), at(2024, 11, 4, 9));
        move_to(&conn, l2, StageValue::Id(a), at(2024, 11, 5, 9));
        move_to(&conn, l2, StageValue::Id(a), at(2025, 1, 5, 9));

        let store = SqliteStore::new(&conn);
        let rows = rows_for_year(&store, &registry(), &StageFieldRef::default(), 2024).unwrap();
        let stamped: Vec<(Option<u32>, &str, usize)> = rows
            .iter()
            .map(|r| (r.month, r.stage_name.as_str(), r.lead_count))
            .collect();

        assert_eq!(
            stamped,
            vec![(Some(2), "Alpha", 1), (Some(11), "Beta", 2), (Some(11), "Alpha", 1)]
        );
        assert_eq!(rows[0].month_name.as_deref(), Some("February"));
        for row in &rows {
            assert_eq!(row.month_name.as_deref(), row.month.and_then(month_name));
        }
        for pair in rows.windows(2) {
            assert!(pair[0].month <= pair[1].month);
        }
    }

    #[test]
    fn test_rows_for_period_dispatch() {
        let conn = test_db();
        let stage = insert_stage(&conn, "New", 1).unwrap();
        let id = lead(&conn, "L", None, None);
        move_to(&conn, id, StageValue::Id(stage), at(2024, 6, 2, 9));

        let store = SqliteStore::new(&conn);
        let field = StageFieldRef::default();
        let fields = registry();
        let period = |month| rows_for_period(&store, &fields, &field, 2024, month).unwrap();
        let june = period(MonthSelection::Month(6));
        let may = period(MonthSelection::Month(5));
        let year = period(MonthSelection::All);

        assert_eq!(june.len(), 1);
        assert!(may.is_empty());
        assert_eq!(year, june);
    }

    #[test]
    fn test_invalid_month_is_error() {
        let conn = test_db();
        let store = SqliteStore::new(&conn);
        let err = rows_for_month(&store, &registry(), &StageFieldRef::default(), 2024, 13)
            .unwrap_err();
        assert!(matches!(err, ReportError::InvalidPeriod { .. }));
    }
}
