// Report form and generation action
//
// The form offers a year (earliest lead creation year up to the current
// year) and a month (0 = all months, 1..=12). Generating runs the
// aggregator, encodes the sheet, stores it as an attachment and answers
// with a download URL.

use crate::aggregator::{rows_for_period, CrmRepository, StageFieldRef};
use crate::entities::LeadStore;
use crate::error::{ReportError, Result};
use crate::report::{build_sheet, report_file_name, SpreadsheetEncoder};
use crate::schema::FieldRegistry;
use crate::storage::{AttachmentStore, StoredAttachment};
use crate::temporal::MonthSelection;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::info;

// ============================================================================
// YEAR SELECTION
// ============================================================================

/// Selectable years: oldest lead's creation year through `today`'s year
pub fn year_selection<S: LeadStore + ?Sized>(leads: &S, today: NaiveDate) -> Result<Vec<i32>> {
    let current = today.year();
    let start = leads
        .earliest_created_at()?
        .map(|at| at.year())
        .filter(|year| *year <= current)
        .unwrap_or(current);
    Ok((start..=current).collect())
}

// ============================================================================
// REPORT WIZARD (form input)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportWizard {
    pub year: i32,
    pub month: MonthSelection,
}

impl ReportWizard {
    pub fn new(year: i32, month: MonthSelection) -> Self {
        ReportWizard { year, month }
    }

    /// Form defaults: current year, all months
    pub fn default_for(today: NaiveDate) -> Self {
        ReportWizard::new(today.year(), MonthSelection::All)
    }

    /// Parse the raw form values
    pub fn from_form(year: &str, month: &str) -> Result<Self> {
        let year: i32 = year
            .trim()
            .parse()
            .map_err(|_| ReportError::InvalidYearValue(year.to_string()))?;
        Ok(ReportWizard::new(year, MonthSelection::from_form_value(month)?))
    }

    /// Year must be one of the selectable years
    pub fn validate(&self, years: &[i32]) -> Result<()> {
        let (Some(&first), Some(&last)) = (years.first(), years.last()) else {
            return Err(ReportError::InvalidYear { year: self.year, first: 0, last: 0 });
        };
        if self.year < first || self.year > last {
            return Err(ReportError::InvalidYear { year: self.year, first, last });
        }
        Ok(())
    }

    /// Validate against the selectable years, then generate
    pub fn generate_report<R, A, E>(
        &self,
        generator: &ReportGenerator<'_, R, A, E>,
        now: NaiveDateTime,
    ) -> Result<ReportAction>
    where
        R: CrmRepository + ?Sized,
        A: AttachmentStore + ?Sized,
        E: SpreadsheetEncoder + ?Sized,
    {
        let years = year_selection(generator.repo, now.date())?;
        self.validate(&years)?;
        generator.generate(self.year, self.month, now)
    }
}

// ============================================================================
// GENERATION
// ============================================================================

/// Download response of a generated report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportAction {
    pub url: String,
    pub attachment: StoredAttachment,
    pub row_count: usize,
}

/// Collaborators needed to produce and store one report
pub struct ReportGenerator<'a, R: ?Sized, A: ?Sized, E: ?Sized> {
    pub repo: &'a R,
    pub attachments: &'a A,
    pub encoder: &'a E,
    pub fields: &'a FieldRegistry,
    pub stage_field: StageFieldRef,
}

impl<'a, R, A, E> ReportGenerator<'a, R, A, E>
where
    R: CrmRepository + ?Sized,
    A: AttachmentStore + ?Sized,
    E: SpreadsheetEncoder + ?Sized,
{
    pub fn new(repo: &'a R, attachments: &'a A, encoder: &'a E, fields: &'a FieldRegistry) -> Self {
        ReportGenerator {
            repo,
            attachments,
            encoder,
            fields,
            stage_field: StageFieldRef::default(),
        }
    }

    pub fn with_stage_field(mut self, stage_field: StageFieldRef) -> Self {
        self.stage_field = stage_field;
        self
    }

    /// Aggregate, encode and store the report for `year`/`month`
    pub fn generate(
        &self,
        year: i32,
        month: MonthSelection,
        now: NaiveDateTime,
    ) -> Result<ReportAction> {
        let rows = rows_for_period(self.repo, self.fields, &self.stage_field, year, month)?;
        let sheet = build_sheet(&rows, year, month.as_option());
        let bytes = self.encoder.encode(&sheet)?;

        let file_name = report_file_name(year, month.as_option(), now, self.encoder.extension());
        let attachment = self.attachments.store(
            &bytes,
            &file_name,
            self.encoder.mimetype(),
            Some(self.stage_field.model.as_str()),
        )?;

        info!(
            year,
            month = %month,
            rows = rows.len(),
            attachment_id = attachment.id,
            file_name = %attachment.file_name,
            "stage report generated"
        );

        Ok(ReportAction {
            url: attachment.download_url(),
            row_count: rows.len(),
            attachment,
        })
    }
}
