// Report Assembler
//
// Lays summary rows out as a single sheet with a fixed column schema and
// hands it to a spreadsheet encoder. The xlsx encoder applies the header
// styling, column widths and autofilter range; CSV has no place for them.

use crate::aggregator::SummaryRow;
use crate::error::{ReportError, Result};
use crate::temporal::month_name;
use chrono::NaiveDateTime;
use rust_xlsxwriter::{Color, Format, Workbook};
use serde::{Deserialize, Serialize};

/// Longest sheet title spreadsheet formats accept
pub const SHEET_TITLE_MAX: usize = 31;

pub const HEADERS: [&str; 6] = [
    "Year",
    "Month",
    "Stage Name",
    "Lead Count",
    "Sales Persons (Active)",
    "Sales Teams (Active)",
];

pub const COLUMN_WIDTHS: [u16; 6] = [8, 12, 30, 12, 40, 40];

// ============================================================================
// SHEET ARTIFACT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CellValue {
    Number(i64),
    Text(String),
}

impl CellValue {
    pub fn to_text(&self) -> String {
        match self {
            CellValue::Number(n) => n.to_string(),
            CellValue::Text(s) => s.clone(),
        }
    }
}

/// Header presentation hint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderStyle {
    pub bold: bool,
    pub background: &'static str,
    pub font_color: &'static str,
}

impl Default for HeaderStyle {
    fn default() -> Self {
        HeaderStyle {
            bold: true,
            background: "#4472C4",
            font_color: "#FFFFFF",
        }
    }
}

/// Inclusive cell range for interactive column filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CellRange {
    pub first_row: u32,
    pub first_col: u16,
    pub last_row: u32,
    pub last_col: u16,
}

/// In-memory sheet ready for encoding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SheetArtifact {
    pub title: String,
    pub headers: [&'static str; 6],
    pub header_style: HeaderStyle,
    pub rows: Vec<[CellValue; 6]>,
    pub column_widths: [u16; 6],
    pub autofilter: CellRange,
}

impl SheetArtifact {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Sheet title: "Stage Summary March 2024" or "Stage Summary 2024"
pub fn sheet_title(year: i32, month: Option<u32>) -> String {
    let title = match month.and_then(month_name) {
        Some(name) => format!("Stage Summary {} {}", name, year),
        None => format!("Stage Summary {}", year),
    };
    truncate_chars(&title, SHEET_TITLE_MAX)
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Arrange rows under the fixed header, in the order received
pub fn build_sheet(rows: &[SummaryRow], year: i32, month: Option<u32>) -> SheetArtifact {
    let data: Vec<[CellValue; 6]> = rows
        .iter()
        .map(|row| {
            [
                CellValue::Number(i64::from(row.year)),
                CellValue::Text(row.month_label().to_string()),
                CellValue::Text(row.stage_name.clone()),
                CellValue::Number(i64::try_from(row.lead_count).unwrap_or(i64::MAX)),
                CellValue::Text(row.sales_persons.clone()),
                CellValue::Text(row.sales_teams.clone()),
            ]
        })
        .collect();

    let last_row = u32::try_from(data.len()).unwrap_or(u32::MAX);

    SheetArtifact {
        title: sheet_title(year, month),
        headers: HEADERS,
        header_style: HeaderStyle::default(),
        rows: data,
        column_widths: COLUMN_WIDTHS,
        autofilter: CellRange {
            first_row: 0,
            first_col: 0,
            last_row,
            last_col: (HEADERS.len() - 1) as u16,
        },
    }
}

/// `stage_summary_report_<year>[_<MM>]_<YYYYMMDD_HHMMSS>.<ext>`
pub fn report_file_name(
    year: i32,
    month: Option<u32>,
    generated_at: NaiveDateTime,
    extension: &str,
) -> String {
    let stamp = generated_at.format("%Y%m%d_%H%M%S");
    match month {
        Some(m) => format!("stage_summary_report_{}_{:02}_{}.{}", year, m, stamp, extension),
        None => format!("stage_summary_report_{}_{}.{}", year, stamp, extension),
    }
}

// ============================================================================
// ENCODERS
// ============================================================================

/// Turns a sheet into file bytes
pub trait SpreadsheetEncoder {
    fn encode(&self, sheet: &SheetArtifact) -> Result<Vec<u8>>;

    /// File extension without the dot
    fn extension(&self) -> &'static str;

    fn mimetype(&self) -> &'static str;
}

/// Output format of generated reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Xlsx,
    Csv,
}

impl ReportFormat {
    pub fn encoder(self) -> &'static dyn SpreadsheetEncoder {
        match self {
            ReportFormat::Xlsx => &XlsxEncoder,
            ReportFormat::Csv => &CsvEncoder,
        }
    }
}

/// Excel workbook with one worksheet named after the sheet title
#[derive(Debug, Clone, Copy, Default)]
pub struct XlsxEncoder;

impl SpreadsheetEncoder for XlsxEncoder {
    fn encode(&self, sheet: &SheetArtifact) -> Result<Vec<u8>> {
        let style = &sheet.header_style;
        let mut header = Format::new()
            .set_background_color(rgb(style.background)?)
            .set_font_color(rgb(style.font_color)?);
        if style.bold {
            header = header.set_bold();
        }

        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(&sheet.title)?;

        for (col, title) in (0u16..).zip(sheet.headers) {
            worksheet.write_string_with_format(0, col, title, &header)?;
        }

        for (row, cells) in (1u32..).zip(&sheet.rows) {
            for (col, cell) in (0u16..).zip(cells) {
                match cell {
                    CellValue::Number(n) => worksheet.write_number(row, col, *n as f64)?,
                    CellValue::Text(text) => worksheet.write_string(row, col, text)?,
                };
            }
        }

        for (col, width) in (0u16..).zip(sheet.column_widths) {
            worksheet.set_column_width(col, width)?;
        }

        let range = sheet.autofilter;
        worksheet.autofilter(range.first_row, range.first_col, range.last_row, range.last_col)?;

        Ok(workbook.save_to_buffer()?)
    }

    fn extension(&self) -> &'static str {
        "xlsx"
    }

    fn mimetype(&self) -> &'static str {
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
    }
}

/// "#RRGGBB" to a workbook color
fn rgb(hex: &str) -> Result<Color> {
    u32::from_str_radix(hex.trim_start_matches('#'), 16)
        .map(Color::RGB)
        .map_err(|_| ReportError::Encoding(format!("invalid color {:?}", hex)))
}

/// Comma-separated output; one header line then one line per row
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvEncoder;

impl SpreadsheetEncoder for CsvEncoder {
    fn encode(&self, sheet: &SheetArtifact) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(sheet.headers)?;
        for row in &sheet.rows {
            writer.write_record(row.iter().map(CellValue::to_text))?;
        }
        writer
            .into_inner()
            .map_err(|e| ReportError::Encoding(e.to_string()))
    }

    fn extension(&self) -> &'static str {
        "csv"
    }

    fn mimetype(&self) -> &'static str {
        "text/csv"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn row(month: Option<u32>, stage: &str, count: usize) -> SummaryRow {
        SummaryRow {
            year: 2024,
            month,
            month_name: month.and_then(month_name).map(str::to_string),
            stage_id: 1,
            stage_name: stage.to_string(),
            lead_count: count,
            sales_persons: "Alice, Bob".to_string(),
            sales_teams: "North".to_string(),
        }
    }

    #[test]
    fn test_sheet_title_month_and_year() {
        assert_eq!(sheet_title(2024, Some(3)), "Stage Summary March 2024");
        assert_eq!(sheet_title(2024, None), "Stage Summary 2024");
    }

    #[test]
    fn test_sheet_title_truncated_to_limit() {
        let title = sheet_title(2024, Some(9));
        assert_eq!(title, "Stage Summary September 2024");
        assert!(title.chars().count() <= SHEET_TITLE_MAX);

        let long = truncate_chars(&"x".repeat(50), SHEET_TITLE_MAX);
        assert_eq!(long.len(), SHEET_TITLE_MAX);
        assert_eq!(truncate_chars("Résumé", 2), "Ré");
    }

    #[test]
    fn test_build_sheet_layout() {
        let rows = vec![row(Some(3), "Proposal", 2), row(Some(3), "New", 5)];
        let sheet = build_sheet(&rows, 2024, Some(3));

        assert_eq!(sheet.headers, HEADERS);
        assert_eq!(sheet.row_count(), 2);
        // order as received
        assert_eq!(sheet.rows[0][2], CellValue::Text("Proposal".to_string()));
        assert_eq!(sheet.rows[0][0], CellValue::Number(2024));
        assert_eq!(sheet.rows[0][1], CellValue::Text("March".to_string()));
        assert_eq!(sheet.rows[0][3], CellValue::Number(2));
        assert_eq!(sheet.column_widths, [8, 12, 30, 12, 40, 40]);
        assert_eq!(
            sheet.autofilter,
            CellRange { first_row: 0, first_col: 0, last_row: 2, last_col: 5 }
        );
        assert!(sheet.header_style.bold);
    }

    #[test]
    fn test_build_sheet_all_months_label() {
        let sheet = build_sheet(&[row(None, "New", 1)], 2024, None);
        assert_eq!(sheet.rows[0][1], CellValue::Text("All".to_string()));
    }

    #[test]
    fn test_build_sheet_empty() {
        let sheet = build_sheet(&[], 2024, None);
        assert_eq!(sheet.row_count(), 0);
        assert_eq!(sheet.autofilter.last_row, 0);
    }

    #[test]
    fn test_report_file_name_patterns() {
        let at = NaiveDate::from_ymd_opt(2024, 4, 2)
            .unwrap()
            .and_hms_opt(13, 5, 9)
            .unwrap();

        assert_eq!(
            report_file_name(2024, Some(3), at, "csv"),
            "stage_summary_report_2024_03_20240402_130509.csv"
        );
        assert_eq!(
            report_file_name(2024, None, at, "xlsx"),
            "stage_summary_report_2024_20240402_130509.xlsx"
        );
    }

    fn xlsx_part(bytes: &[u8], name: &str) -> String {
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        let mut part = archive.by_name(name).unwrap();
        let mut xml = String::new();
        std::io::Read::read_to_string(&mut part, &mut xml).unwrap();
        xml
    }

    #[test]
    fn test_xlsx_encoder_applies_presentation() {
        let rows = vec![row(Some(3), "Proposal", 2), row(Some(3), "New", 1)];
        let sheet = build_sheet(&rows, 2024, Some(3));
        let bytes = XlsxEncoder.encode(&sheet).unwrap();

        assert!(bytes.starts_with(b"PK"));

        let worksheet = xlsx_part(&bytes, "xl/worksheets/sheet1.xml");
        assert!(worksheet.contains(r#"<autoFilter ref="A1:F3"/>"#));
        assert!(worksheet.contains("customWidth=\"1\""));
        assert!(worksheet.contains("<v>2024</v>"));

        let styles = xlsx_part(&bytes, "xl/styles.xml");
        assert!(styles.contains("<b/>"));
        assert!(styles.contains("FF4472C4"));

        let workbook = xlsx_part(&bytes, "xl/workbook.xml");
        assert!(workbook.contains(r#"name="Stage Summary March 2024""#));
    }

    #[test]
    fn test_xlsx_encoder_empty_sheet_keeps_header() {
        let sheet = build_sheet(&[], 2024, None);
        let bytes = XlsxEncoder.encode(&sheet).unwrap();

        let worksheet = xlsx_part(&bytes, "xl/worksheets/sheet1.xml");
        assert!(worksheet.contains(r#"<autoFilter ref="A1:F1"/>"#));
        assert_eq!(XlsxEncoder.extension(), "xlsx");
    }

    #[test]
    fn test_report_format_selects_encoder() {
        assert_eq!(ReportFormat::default(), ReportFormat::Xlsx);
        assert_eq!(ReportFormat::Xlsx.encoder().extension(), "xlsx");
        assert_eq!(ReportFormat::Csv.encoder().mimetype(), "text/csv");
        assert!(rgb("#4472C4").is_ok());
        assert!(rgb("blue").is_err());
    }

    #[test]
    fn test_csv_encoder_output() {
        let sheet = build_sheet(&[row(Some(3), "Proposal", 2)], 2024, Some(3));
        let bytes = CsvEncoder.encode(&sheet).unwrap();
        let text = String::from_utf8(bytes).unwrap();

        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("Year,Month,Stage Name,Lead Count,Sales Persons (Active),Sales Teams (Active)")
        );
        assert_eq!(lines.next(), Some("2024,March,Proposal,2,\"Alice, Bob\",North"));
        assert_eq!(lines.next(), None);
        assert_eq!(CsvEncoder.extension(), "csv");
    }
}
