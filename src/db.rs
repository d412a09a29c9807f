use crate::entities::{Lead, LeadStore, Stage, StageTable};
use crate::error::Result;
use crate::schema::FieldId;
use crate::temporal::{format_second, format_timestamp, parse_timestamp, TimeWindow};
use crate::tracking::{ChangeEvent, ChangeLog};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

/// Upper bound on ids bound into one `IN (...)` clause
const ID_CHUNK: usize = 500;

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;

    // ==========================================================================
    // Pipeline and ownership tables
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS crm_stages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            sequence INTEGER NOT NULL DEFAULT 10
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS res_users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS crm_teams (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS crm_leads (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            user_id INTEGER REFERENCES res_users(id) ON DELETE SET NULL,
            team_id INTEGER REFERENCES crm_teams(id) ON DELETE SET NULL,
            create_date TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Change-log (messages + tracked value rows)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS mail_messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            model TEXT NOT NULL,
            res_id INTEGER
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tracking_values (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            field_id INTEGER NOT NULL,
            message_id INTEGER REFERENCES mail_messages(id) ON DELETE CASCADE,
            new_value_integer INTEGER,
            new_value_char TEXT,
            create_date TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Attachments (generated report files)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attachments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            uuid TEXT UNIQUE NOT NULL,
            name TEXT NOT NULL,
            mimetype TEXT NOT NULL,
            checksum TEXT NOT NULL,
            file_size INTEGER NOT NULL,
            res_model TEXT,
            datas BLOB NOT NULL,
            create_date TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tracking_field_date
            ON tracking_values(field_id, create_date)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_messages_model ON mail_messages(model, res_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_stages_name ON crm_stages(name)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_leads_create_date ON crm_leads(create_date)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// INSERT HELPERS (seeding, imports, tests)
// ============================================================================

pub fn insert_stage(conn: &Connection, name: &str, sequence: i64) -> Result<i64> {
    conn.execute(
        "INSERT INTO crm_stages (name, sequence) VALUES (?1, ?2)",
        params![name, sequence],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn delete_stage(conn: &Connection, id: i64) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM crm_stages WHERE id = ?1", [id])?;
    Ok(deleted > 0)
}

pub fn insert_user(conn: &Connection, name: &str) -> Result<i64> {
    conn.execute("INSERT INTO res_users (name) VALUES (?1)", [name])?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_team(conn: &Connection, name: &str) -> Result<i64> {
    conn.execute("INSERT INTO crm_teams (name) VALUES (?1)", [name])?;
    Ok(conn.last_insert_rowid())
}

/// Lead row to insert; owner and team are optional foreign keys
#[derive(Debug, Clone)]
pub struct NewLead<'a> {
    pub name: &'a str,
    pub user_id: Option<i64>,
    pub team_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

pub fn insert_lead(conn: &Connection, lead: &NewLead<'_>) -> Result<i64> {
    conn.execute(
        "INSERT INTO crm_leads (name, user_id, team_id, create_date) VALUES (?1, ?2, ?3, ?4)",
        params![
            lead.name,
            lead.user_id,
            lead.team_id,
            format_timestamp(lead.created_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_message(conn: &Connection, model: &str, res_id: Option<i64>) -> Result<i64> {
    conn.execute(
        "INSERT INTO mail_messages (model, res_id) VALUES (?1, ?2)",
        params![model, res_id],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Tracked value row to insert
#[derive(Debug, Clone)]
pub struct NewTrackingValue<'a> {
    pub field_id: FieldId,
    pub message_id: Option<i64>,
    pub new_value_integer: Option<i64>,
    pub new_value_char: Option<&'a str>,
    pub occurred_at: DateTime<Utc>,
}

pub fn insert_tracking_value(conn: &Connection, value: &NewTrackingValue<'_>) -> Result<i64> {
    conn.execute(
        "INSERT INTO tracking_values (
            field_id, message_id, new_value_integer, new_value_char, create_date
        ) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            value.field_id.0,
            value.message_id,
            value.new_value_integer,
            value.new_value_char,
            format_timestamp(value.occurred_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// New value of a logged stage change
#[derive(Debug, Clone, Copy)]
pub enum StageValue<'a> {
    Id(i64),
    Name(&'a str),
}

/// Log one stage change of a record: a message on `model`/`res_id` carrying
/// one tracked value. Returns the tracking value id.
pub fn record_stage_change(
    conn: &Connection,
    field_id: FieldId,
    model: &str,
    res_id: i64,
    value: StageValue<'_>,
    occurred_at: DateTime<Utc>,
) -> Result<i64> {
    let message_id = insert_message(conn, model, Some(res_id))?;
    let (new_value_integer, new_value_char) = match value {
        StageValue::Id(id) => (Some(id), None),
        StageValue::Name(name) => (None, Some(name)),
    };

    insert_tracking_value(
        conn,
        &NewTrackingValue {
            field_id,
            message_id: Some(message_id),
            new_value_integer,
            new_value_char,
            occurred_at,
        },
    )
}

// ============================================================================
// SQLITE STORE
// ============================================================================

/// Change-log, stage table and lead store over one SQLite connection
pub struct SqliteStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        SqliteStore { conn }
    }

    pub fn connection(&self) -> &'c Connection {
        self.conn
    }
}

struct RawEvent {
    id: i64,
    field_id: i64,
    entity_type: String,
    entity_id: Option<i64>,
    new_value_integer: Option<i64>,
    new_value_char: Option<String>,
    occurred_at: String,
}

impl ChangeLog for SqliteStore<'_> {
    fn search(
        &self,
        field_id: FieldId,
        entity_type: &str,
        window: TimeWindow,
    ) -> Result<Vec<ChangeEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.id, t.field_id, m.model, m.res_id,
                    t.new_value_integer, t.new_value_char, t.create_date
             FROM tracking_values t
             JOIN mail_messages m ON m.id = t.message_id
             WHERE t.field_id = ?1
               AND m.model = ?2
               AND (?3 IS NULL OR t.create_date >= ?3)
               AND (?4 IS NULL OR substr(t.create_date, 1, 19) <= ?4)
             ORDER BY t.create_date, t.id",
        )?;

        // Rows written elsewhere may carry no fractional seconds, so the
        // SQL bounds only compare whole seconds
        let from = window.from.map(format_second);
        let to = window.to.map(format_second);

        let raw = stmt
            .query_map(params![field_id.0, entity_type, from, to], |row| {
                Ok(RawEvent {
                    id: row.get(0)?,
                    field_id: row.get(1)?,
                    entity_type: row.get(2)?,
                    entity_id: row.get(3)?,
                    new_value_integer: row.get(4)?,
                    new_value_char: row.get(5)?,
                    occurred_at: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut events = Vec::with_capacity(raw.len());
        for ev in raw {
            let occurred_at = parse_timestamp(&ev.occurred_at)?;
            if !window.contains(occurred_at) {
                continue;
            }
            events.push(ChangeEvent {
                id: ev.id,
                field_id: FieldId(ev.field_id),
                entity_type: ev.entity_type,
                entity_id: ev.entity_id,
                new_value_integer: ev.new_value_integer,
                new_value_char: ev.new_value_char,
                occurred_at,
            });
        }
        Ok(events)
    }
}

impl StageTable for SqliteStore<'_> {
    fn lookup_by_name(&self, name: &str) -> Result<Option<Stage>> {
        let stage = self
            .conn
            .query_row(
                "SELECT id, name, sequence FROM crm_stages
                 WHERE name = ?1
                 ORDER BY sequence, id
                 LIMIT 1",
                [name],
                |row| Ok(Stage::new(row.get(0)?, row.get::<_, String>(1)?, row.get(2)?)),
            )
            .optional()?;
        Ok(stage)
    }

    fn fetch_by_id(&self, id: i64) -> Result<Option<Stage>> {
        let stage = self
            .conn
            .query_row(
                "SELECT id, name, sequence FROM crm_stages WHERE id = ?1",
                [id],
                |row| Ok(Stage::new(row.get(0)?, row.get::<_, String>(1)?, row.get(2)?)),
            )
            .optional()?;
        Ok(stage)
    }
}

impl LeadStore for SqliteStore<'_> {
    fn fetch_by_ids(&self, ids: &[i64]) -> Result<Vec<Lead>> {
        let mut leads = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(ID_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT l.id, l.name, u.name, t.name, l.create_date
                 FROM crm_leads l
                 LEFT JOIN res_users u ON u.id = l.user_id
                 LEFT JOIN crm_teams t ON t.id = l.team_id
                 WHERE l.id IN ({})
                 ORDER BY l.id",
                placeholders
            );

            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(chunk.iter()), |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            for (id, name, owner_name, team_name, created_at) in rows {
                leads.push(Lead {
                    id,
                    name,
                    owner_name,
                    team_name,
                    created_at: parse_timestamp(&created_at)?,
                });
            }
        }

        Ok(leads)
    }

    fn earliest_created_at(&self) -> Result<Option<DateTime<Utc>>> {
        let earliest: Option<String> =
            self.conn
                .query_row("SELECT MIN(create_date) FROM crm_leads", [], |row| row.get(0))?;

        earliest.as_deref().map(parse_timestamp).transpose()
    }
}
