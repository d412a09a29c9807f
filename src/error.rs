// Error type shared by every library module.
//
// Missing configuration, malformed log entries and deleted records are NOT
// errors here: they degrade to empty results or fallback labels. Only the
// store, the encoder and the attachment storage can fail a report.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    /// Record store, change-log or attachment table failure
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Year/month pair that has no calendar representation
    #[error("invalid report period: year {year}, month {month}")]
    InvalidPeriod { year: i32, month: u32 },

    /// Year outside the selectable range of the report form
    #[error("year {year} is outside the selectable range {first}..={last}")]
    InvalidYear { year: i32, first: i32, last: i32 },

    /// Year form value that is not a number
    #[error("invalid year selection: {0:?}")]
    InvalidYearValue(String),

    /// Month form value that is neither 0 (all months) nor 1..=12
    #[error("invalid month selection: {0:?}")]
    InvalidMonth(String),

    /// Spreadsheet encoder could not produce the file
    #[error("spreadsheet encoding failed: {0}")]
    Encoding(String),

    /// Attachment storage could not persist or read the file
    #[error("attachment storage failed: {0}")]
    Storage(String),

    /// Unreadable or malformed configuration file
    #[error("configuration error: {0}")]
    Config(String),

    /// Timestamp column that does not parse back into a datetime
    #[error("invalid timestamp {value:?}: {reason}")]
    Timestamp { value: String, reason: String },
}

impl From<csv::Error> for ReportError {
    fn from(err: csv::Error) -> Self {
        ReportError::Encoding(err.to_string())
    }
}

impl From<rust_xlsxwriter::XlsxError> for ReportError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        ReportError::Encoding(err.to_string())
    }
}

impl From<toml::de::Error> for ReportError {
    fn from(err: toml::de::Error) -> Self {
        ReportError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ReportError>;
