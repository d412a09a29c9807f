use anyhow::{Context, Result};
use chrono::{Datelike, Duration, TimeZone, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use rusqlite::Connection;
use std::env;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crm_stage_report::{
    insert_lead, insert_stage, insert_team, insert_user, record_stage_change, rows_for_period,
    setup_database, year_selection, FieldId, MonthSelection, NewLead, ReportConfig, ReportFormat,
    ReportGenerator, ReportWizard, SqliteAttachmentStore, SqliteStore, StageFieldRef, StageValue,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Per-stage lead visit reports for a CRM pipeline",
    long_about = None
)]
struct Cli {
    /// Config file (defaults to <config dir>/crm-stage-report/config.toml)
    #[arg(long, global = true, env = "STAGE_REPORT_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database, overrides the config file
    #[arg(long, global = true, env = "STAGE_REPORT_DB")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database schema
    Init,

    /// Load a small sample pipeline with stage history
    Demo,

    /// List the selectable report years
    Years,

    /// Print summary rows without storing a file
    Rows {
        #[arg(long)]
        year: Option<i32>,

        /// 0 = all months, 1-12 = one month
        #[arg(long, default_value_t = 0)]
        month: u32,
    },

    /// Generate the report file and store it as an attachment
    Generate {
        #[arg(long)]
        year: Option<i32>,

        /// 0 = all months, 1-12 = one month
        #[arg(long, default_value_t = 0)]
        month: u32,

        /// File format, overrides the config file
        #[arg(long, value_enum)]
        format: Option<FormatArg>,
    },

    /// Interactive report form
    #[cfg(feature = "tui")]
    Ui,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Xlsx,
    Csv,
}

impl From<FormatArg> for ReportFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Xlsx => ReportFormat::Xlsx,
            FormatArg::Csv => ReportFormat::Csv,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("STAGE_REPORT_LOG")
        .unwrap_or_else(|_| EnvFilter::new("crm_stage_report=info,warn"));

    let format = env::var("STAGE_REPORT_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry.with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr)).init();
        }
        _ => {
            registry.with(fmt::layer().compact().with_writer(std::io::stderr)).init();
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = ReportConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(database) = cli.database {
        config.database = database;
    }

    match cli.command {
        Command::Init => run_init(&config),
        Command::Demo => run_demo(&config),
        Command::Years => run_years(&config),
        Command::Rows { year, month } => run_rows(&config, year, month),
        Command::Generate { year, month, format } => {
            if let Some(format) = format {
                config.format = format.into();
            }
            run_generate(&config, year, month)
        }
        #[cfg(feature = "tui")]
        Command::Ui => run_ui_mode(&config),
    }
}

fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    setup_database(&conn)?;
    Ok(conn)
}

fn stage_field(config: &ReportConfig) -> StageFieldRef {
    StageFieldRef::new(&config.lead_model, &config.stage_field)
}

fn default_year(year: Option<i32>) -> i32 {
    year.unwrap_or_else(|| Utc::now().year())
}

fn run_init(config: &ReportConfig) -> Result<()> {
    open_database(&config.database)?;
    println!("✓ Database ready: {}", config.database.display());
    Ok(())
}

fn run_years(config: &ReportConfig) -> Result<()> {
    let conn = open_database(&config.database)?;
    let store = SqliteStore::new(&conn);
    let years = year_selection(&store, Utc::now().date_naive())?;

    for year in years {
        println!("{}", year);
    }
    Ok(())
}

fn run_rows(config: &ReportConfig, year: Option<i32>, month: u32) -> Result<()> {
    let conn = open_database(&config.database)?;
    let store = SqliteStore::new(&conn);
    let fields = config.field_registry();
    let year = default_year(year);
    let month = MonthSelection::from_number(month)?;

    let rows = rows_for_period(&store, &fields, &stage_field(config), year, month)?;

    println!(
        "{:<6} {:<10} {:<30} {:>6}  {:<30} {}",
        "Year", "Month", "Stage", "Leads", "Sales Persons", "Sales Teams"
    );
    for row in &rows {
        println!(
            "{:<6} {:<10} {:<30} {:>6}  {:<30} {}",
            row.year,
            row.month_label(),
            row.stage_name,
            row.lead_count,
            row.sales_persons,
            row.sales_teams
        );
    }
    println!("\n{} rows", rows.len());
    Ok(())
}

fn run_generate(config: &ReportConfig, year: Option<i32>, month: u32) -> Result<()> {
    let conn = open_database(&config.database)?;
    let store = SqliteStore::new(&conn);
    let attachments = SqliteAttachmentStore::new(&conn);
    let fields = config.field_registry();
    let generator = ReportGenerator::new(&store, &attachments, config.format.encoder(), &fields)
        .with_stage_field(stage_field(config));

    let wizard = ReportWizard::new(default_year(year), MonthSelection::from_number(month)?);
    let action = wizard
        .generate_report(&generator, Utc::now().naive_utc())
        .context("Report generation failed")?;

    println!("✓ {} ({} rows)", action.attachment.file_name, action.row_count);
    println!("  attachment #{} sha256 {}", action.attachment.id, action.attachment.checksum);
    println!("  download: {}", action.url);
    Ok(())
}

fn run_demo(config: &ReportConfig) -> Result<()> {
    let conn = open_database(&config.database)?;
    let field_id = config
        .field_registry()
        .lookup(&config.lead_model, &config.stage_field)
        .unwrap_or(FieldId(crm_stage_report::config::DEFAULT_STAGE_FIELD_ID));

    let stages: Vec<i64> = ["New", "Qualified", "Proposal", "Won"]
        .iter()
        .enumerate()
        .map(|(i, name)| insert_stage(&conn, name, (i as i64 + 1) * 10))
        .collect::<crm_stage_report::Result<_>>()?;

    let alice = insert_user(&conn, "Alice")?;
    let bob = insert_user(&conn, "Bob")?;
    let north = insert_team(&conn, "North")?;
    let south = insert_team(&conn, "South")?;

    let year = Utc::now().year();
    let start = Utc
        .with_ymd_and_hms(year, 1, 6, 9, 0, 0)
        .single()
        .context("Invalid demo start date")?;

    let owners = [(Some(alice), Some(north)), (Some(bob), Some(south)), (None, Some(north))];
    let mut logged = 0;
    for (n, (user_id, team_id)) in owners.iter().cycle().take(9).enumerate() {
        let created_at = start + Duration::days(n as i64 * 9);
        let lead = insert_lead(
            &conn,
            &NewLead {
                name: &format!("Demo lead {}", n + 1),
                user_id: *user_id,
                team_id: *team_id,
                created_at,
            },
        )?;

        // Each lead walks part of the pipeline, one step every two weeks
        for (step, stage) in stages.iter().take(1 + n % stages.len()).enumerate() {
            let at = created_at + Duration::days(step as i64 * 14);
            let value = if step == 2 {
                StageValue::Name("Proposal")
            } else {
                StageValue::Id(*stage)
            };
            record_stage_change(&conn, field_id, &config.lead_model, lead, value, at)?;
            logged += 1;
        }
    }

    println!("✓ Demo data loaded: 9 leads, {} stage changes", logged);
    Ok(())
}

#[cfg(feature = "tui")]
struct SqliteBackend<'a> {
    conn: &'a Connection,
    config: &'a ReportConfig,
    fields: crm_stage_report::FieldRegistry,
}

#[cfg(feature = "tui")]
impl crm_stage_report::ui::ReportBackend for SqliteBackend<'_> {
    fn preview(
        &self,
        wizard: &ReportWizard,
    ) -> crm_stage_report::Result<Vec<crm_stage_report::SummaryRow>> {
        let store = SqliteStore::new(self.conn);
        rows_for_period(&store, &self.fields, &stage_field(self.config), wizard.year, wizard.month)
    }

    fn generate(
        &self,
        wizard: &ReportWizard,
    ) -> crm_stage_report::Result<crm_stage_report::ReportAction> {
        let store = SqliteStore::new(self.conn);
        let attachments = SqliteAttachmentStore::new(self.conn);
        let encoder = self.config.format.encoder();
        let generator = ReportGenerator::new(&store, &attachments, encoder, &self.fields)
            .with_stage_field(stage_field(self.config));
        wizard.generate_report(&generator, Utc::now().naive_utc())
    }
}

#[cfg(feature = "tui")]
fn run_ui_mode(config: &ReportConfig) -> Result<()> {
    let conn = open_database(&config.database)?;
    let today = Utc::now().date_naive();
    let years = year_selection(&SqliteStore::new(&conn), today)?;

    let backend = SqliteBackend {
        conn: &conn,
        config,
        fields: config.field_registry(),
    };
    let mut app = crm_stage_report::ui::App::new(years, ReportWizard::default_for(today));
    crm_stage_report::ui::run_ui(&mut app, &backend)?;

    println!("\n✅ Report form closed");
    Ok(())
}
