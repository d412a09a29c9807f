// Attachment storage for generated report files
//
// Every stored file gets a stable UUID, a SHA-256 checksum and a download
// URL of the form `/web/content/<id>?download=true`.

use crate::error::{ReportError, Result};
use crate::temporal::{format_timestamp, parse_timestamp};
use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAttachment {
    pub id: i64,
    pub uuid: String,
    pub file_name: String,
    pub mimetype: String,

    /// SHA-256 of the payload, lowercase hex
    pub checksum: String,
    pub file_size: u64,

    /// Entity type the file is filed under (e.g., "crm.lead")
    pub res_model: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StoredAttachment {
    pub fn download_url(&self) -> String {
        download_url(self.id)
    }
}

pub fn download_url(id: i64) -> String {
    format!("/web/content/{}?download=true", id)
}

pub fn checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Durable storage for report files
pub trait AttachmentStore {
    fn store(
        &self,
        data: &[u8],
        file_name: &str,
        mimetype: &str,
        res_model: Option<&str>,
    ) -> Result<StoredAttachment>;

    /// Metadata and payload; `None` for an unknown id
    fn fetch(&self, id: i64) -> Result<Option<(StoredAttachment, Vec<u8>)>>;
}

/// Attachments kept as BLOBs in the `attachments` table
pub struct SqliteAttachmentStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteAttachmentStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        SqliteAttachmentStore { conn }
    }
}

impl AttachmentStore for SqliteAttachmentStore<'_> {
    fn store(
        &self,
        data: &[u8],
        file_name: &str,
        mimetype: &str,
        res_model: Option<&str>,
    ) -> Result<StoredAttachment> {
        if file_name.trim().is_empty() {
            return Err(ReportError::Storage("attachment needs a file name".to_string()));
        }

        let uuid = uuid::Uuid::new_v4().to_string();
        let checksum = checksum(data);
        let created_at = Utc::now().trunc_subsecs(6);

        self.conn.execute(
            "INSERT INTO attachments (
                uuid, name, mimetype, checksum, file_size, res_model, datas, create_date
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                uuid,
                file_name,
                mimetype,
                checksum,
                data.len() as i64,
                res_model,
                data,
                format_timestamp(created_at),
            ],
        )?;

        Ok(StoredAttachment {
            id: self.conn.last_insert_rowid(),
            uuid,
            file_name: file_name.to_string(),
            mimetype: mimetype.to_string(),
            checksum,
            file_size: data.len() as u64,
            res_model: res_model.map(str::to_string),
            created_at,
        })
    }

    fn fetch(&self, id: i64) -> Result<Option<(StoredAttachment, Vec<u8>)>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, uuid, name, mimetype, checksum, file_size, res_model, datas, create_date
                 FROM attachments WHERE id = ?1",
                [id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, Vec<u8>>(7)?,
                        row.get::<_, String>(8)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, uuid, file_name, mimetype, checksum, file_size, res_model, data, created)) =
            row
        else {
            return Ok(None);
        };

        let attachment = StoredAttachment {
            id,
            uuid,
            file_name,
            mimetype,
            checksum,
            file_size: u64::try_from(file_size).unwrap_or_default(),
            res_model,
            created_at: parse_timestamp(&created)?,
        };
        Ok(Some((attachment, data)))
    }
}
