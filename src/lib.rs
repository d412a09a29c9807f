// CRM Stage Report - Core Library
// Exposes all modules for use in the CLI, the API server, and tests

pub mod error;
pub mod config;
pub mod schema;     // Field registry (entity_type.field -> FieldId)
pub mod temporal;   // Month boundaries and month selection
pub mod tracking;   // Change-log model
pub mod entities;   // Stages and leads
pub mod db;         // SQLite schema and store
pub mod extractor;  // Stage-Visit Extractor
pub mod aggregator; // Monthly Aggregator
pub mod report;     // Report Assembler + encoders
pub mod storage;    // Attachment storage
pub mod wizard;     // Report form and generation action

#[cfg(feature = "tui")]
pub mod ui;

// Re-export commonly used types
pub use error::{ReportError, Result};
pub use config::{FieldBinding, ReportConfig, ServerConfig};
pub use schema::{FieldDefinition, FieldId, FieldRegistry};
pub use temporal::{month_bounds, month_name, MonthSelection, TimeWindow};
pub use tracking::{ChangeEvent, ChangeLog, ValueRef};
pub use entities::{Lead, LeadStore, Stage, StageTable, UNDEFINED_STAGE};
pub use db::{
    setup_database, insert_stage, insert_user, insert_team, insert_lead,
    insert_message, insert_tracking_value, record_stage_change,
    NewLead, NewTrackingValue, SqliteStore, StageValue,
};
pub use extractor::{extract_stage_visits, StageVisitSet};
pub use aggregator::{
    rows_for_month, rows_for_year, rows_for_period,
    CrmRepository, StageFieldRef, SummaryRow, NOT_AVAILABLE,
};
pub use report::{
    build_sheet, report_file_name, sheet_title,
    CellValue, CsvEncoder, ReportFormat, SheetArtifact, SpreadsheetEncoder, XlsxEncoder,
    SHEET_TITLE_MAX,
};
pub use storage::{AttachmentStore, SqliteAttachmentStore, StoredAttachment};
pub use wizard::{year_selection, ReportAction, ReportGenerator, ReportWizard};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
