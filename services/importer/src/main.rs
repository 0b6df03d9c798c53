//! Importer Service - Bulk spreadsheet import of employee records
//!
//! Responsibilities:
//! - Read an uploaded spreadsheet (XLSX/XLS/CSV) into rows of named cells
//! - Validate the header row against the selected import profile
//! - Normalize cell values into typed fields (trimmed strings, integers,
//!   calendar dates from spreadsheet serials)
//! - Apply each employee row to the seven sub-record tables, one transaction
//!   per row, insert-or-update keyed by the employee id
//! - Aggregate per-row outcomes into a single structured report
//!
//! CRITICAL: one malformed row must never abort the batch. A failing row
//! rolls back its own transaction and is reported; the next row proceeds.
//!
//! Usage:
//!   # Validate a file without writing (dry run):
//!   cargo run --bin importer -- --file employees.xlsx --profile active --dry-run
//!
//!   # Commit, overwriting existing employees:
//!   cargo run --bin importer -- --file employees.xlsx --on-duplicate update
//!
//!   # Commit, flat tabular report for spreadsheet review:
//!   cargo run --bin importer -- --file employees.csv --report table

use anyhow::{anyhow, bail, Context, Result};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::{Duration, NaiveDate};
use clap::Parser;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "importer", about = "Imports employee records from a spreadsheet")]
struct Args {
    /// Path to the spreadsheet file (xlsx, xls, xlsb, ods or csv)
    #[arg(long)]
    file: PathBuf,

    /// Import profile selecting the expected column set: active | expatriate
    #[arg(long, default_value = "active")]
    profile: String,

    /// Policy when an employee id already exists: update | skip | error
    #[arg(long, default_value = "update")]
    on_duplicate: String,

    /// Dry run - validate every row, don't write to the database
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Report encoding printed to stdout: json | table
    #[arg(long, default_value = "json")]
    report: String,
}

#[derive(Debug, Clone)]
struct Config {
    db_url: String,
    max_file_bytes: u64,
}

impl Config {
    fn from_env() -> Result<Self> {
        Ok(Self {
            db_url: std::env::var("DB_URL").context("DB_URL env var missing")?,
            max_file_bytes: std::env::var("MAX_FILE_BYTES")
                .unwrap_or_else(|_| "10485760".to_string())
                .parse()
                .unwrap_or(10 * 1024 * 1024),
        })
    }
}

// =============================================================================
// TEMPLATE COLUMNS & IMPORT PROFILES
// =============================================================================

// Spreadsheet template column labels. The mapper resolves columns by name
// (case-insensitive), so the order in the uploaded file does not matter.
const COL_EMPLOYEE_ID: &str = "Employee ID";

const COL_FULL_NAME: &str = "Full Name";
const COL_GENDER: &str = "Gender";
const COL_BIRTH_PLACE: &str = "Birth Place";
const COL_BIRTH_DATE: &str = "Birth Date";
const COL_KTP_NUMBER: &str = "KTP Number";
const COL_NPWP_NUMBER: &str = "NPWP Number";
const COL_MARITAL_STATUS: &str = "Marital Status";
const COL_RELIGION: &str = "Religion";

const COL_DEPARTMENT: &str = "Department";
const COL_DIVISION: &str = "Division";
const COL_JOB_TITLE: &str = "Job Title";
const COL_GRADE: &str = "Grade";
const COL_TERMINATION_DATE: &str = "Termination Date";
const COL_TERMINATION_REASON: &str = "Termination Reason";

const COL_BANK_NAME: &str = "Bank Name";
const COL_BANK_ACCOUNT_NUMBER: &str = "Bank Account Number";
const COL_BANK_ACCOUNT_NAME: &str = "Bank Account Name";

const COL_ENDORSEMENT: &str = "Endorsement";
const COL_OWLEXA: &str = "Owlexa";
const COL_FPG: &str = "FPG";
const COL_BPJS_HEALTH: &str = "BPJS Health Number";
const COL_BPJS_EMPLOYMENT: &str = "BPJS Employment Number";

const COL_PHONE_NUMBER: &str = "Phone Number";
const COL_EMAIL: &str = "Email";
const COL_ADDRESS: &str = "Address";
const COL_CITY: &str = "City";
const COL_EMERGENCY_NAME: &str = "Emergency Contact Name";
const COL_EMERGENCY_PHONE: &str = "Emergency Contact Phone";
const COL_DEPENDENTS: &str = "Dependents";

const COL_HIRE_DATE: &str = "Hire Date";
const COL_PERMANENT_DATE: &str = "Permanent Date";
const COL_EMPLOYMENT_STATUS: &str = "Employment Status";
const COL_YEARS_IN_SERVICE: &str = "Years In Service";

const COL_PASSPORT_NUMBER: &str = "Passport Number";
const COL_PASSPORT_EXPIRY: &str = "Passport Expiry";
const COL_KITAS_NUMBER: &str = "KITAS Number";
const COL_TRAVEL_START: &str = "Travel Start";
const COL_TRAVEL_END: &str = "Travel End";

/// Columns every profile expects, in template order.
const BASE_HEADERS: &[&str] = &[
    COL_EMPLOYEE_ID,
    COL_FULL_NAME,
    COL_GENDER,
    COL_BIRTH_PLACE,
    COL_BIRTH_DATE,
    COL_KTP_NUMBER,
    COL_NPWP_NUMBER,
    COL_MARITAL_STATUS,
    COL_RELIGION,
    COL_DEPARTMENT,
    COL_DIVISION,
    COL_JOB_TITLE,
    COL_GRADE,
    COL_TERMINATION_DATE,
    COL_TERMINATION_REASON,
    COL_BANK_NAME,
    COL_BANK_ACCOUNT_NUMBER,
    COL_BANK_ACCOUNT_NAME,
    COL_ENDORSEMENT,
    COL_OWLEXA,
    COL_FPG,
    COL_BPJS_HEALTH,
    COL_BPJS_EMPLOYMENT,
    COL_PHONE_NUMBER,
    COL_EMAIL,
    COL_ADDRESS,
    COL_CITY,
    COL_EMERGENCY_NAME,
    COL_EMERGENCY_PHONE,
    COL_DEPENDENTS,
    COL_HIRE_DATE,
    COL_PERMANENT_DATE,
    COL_EMPLOYMENT_STATUS,
    COL_YEARS_IN_SERVICE,
];

/// Mobility-document columns, expected only in the expatriate template.
const TRAVEL_HEADERS: &[&str] = &[
    COL_PASSPORT_NUMBER,
    COL_PASSPORT_EXPIRY,
    COL_KITAS_NUMBER,
    COL_TRAVEL_START,
    COL_TRAVEL_END,
];

#[derive(Debug, Clone, Copy, PartialEq)]
enum Profile {
    Active,
    Expatriate,
}

impl Profile {
    fn from_arg(value: &str) -> Result<Self> {
        match value {
            "active" => Ok(Self::Active),
            "expatriate" => Ok(Self::Expatriate),
            other => bail!("unknown profile '{}' (expected 'active' or 'expatriate')", other),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expatriate => "expatriate",
        }
    }

    /// Expected header set for this profile, in template order.
    fn expected_headers(&self) -> Vec<&'static str> {
        let mut headers = BASE_HEADERS.to_vec();
        if let Self::Expatriate = self {
            headers.extend_from_slice(TRAVEL_HEADERS);
        }
        headers
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DuplicatePolicy {
    Update,
    Skip,
    Error,
}

impl DuplicatePolicy {
    fn from_arg(value: &str) -> Result<Self> {
        match value {
            "update" => Ok(Self::Update),
            "skip" => Ok(Self::Skip),
            "error" => Ok(Self::Error),
            other => bail!(
                "unknown duplicate policy '{}' (expected 'update', 'skip' or 'error')",
                other
            ),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Skip => "skip",
            Self::Error => "error",
        }
    }
}

// =============================================================================
// CELL NORMALIZER
// =============================================================================
// Pure conversions from a raw spreadsheet cell to a typed value or an explicit
// absence. A blank cell and an omitted column both normalize to None.

/// Date formats accepted for string cells, tried in order.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d-%m-%Y"];

/// Convert a spreadsheet date serial (days since 1899-12-30, which absorbs
/// the 1900 leap-year quirk) into a calendar date. Serials below 1 are
/// treated as absent, never as the epoch itself.
fn serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    base.checked_add_signed(Duration::days(serial.floor() as i64))
}

fn parse_date_str(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date);
        }
    }
    // CSV exports of spreadsheets sometimes leave raw serials in date columns
    trimmed.parse::<f64>().ok().and_then(serial_to_date)
}

fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Data::Int(i) => Some(i.to_string()),
        Data::Float(f) => {
            if !f.is_finite() {
                return None;
            }
            if f.fract() == 0.0 {
                Some(format!("{}", *f as i64))
            } else {
                Some(f.to_string())
            }
        }
        Data::Bool(b) => Some(b.to_string()),
        Data::DateTime(dt) => serial_to_date(dt.as_f64()).map(|d| d.format("%Y-%m-%d").to_string()),
        Data::DateTimeIso(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        _ => None,
    }
}

fn cell_date(cell: &Data) -> Option<NaiveDate> {
    match cell {
        Data::Float(f) => serial_to_date(*f),
        Data::Int(i) => serial_to_date(*i as f64),
        Data::DateTime(dt) => serial_to_date(dt.as_f64()),
        Data::DateTimeIso(s) => s
            .get(..10)
            .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()),
        Data::String(s) => parse_date_str(s),
        _ => None,
    }
}

fn cell_int(cell: &Data) -> Option<i64> {
    match cell {
        Data::Int(i) => Some(*i),
        Data::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(*f as i64),
        Data::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Single-character enumerated codes (gender, benefit flags). The first
/// character of the trimmed value is taken and uppercased, so "y", "Yes"
/// and "Y" all normalize to "Y".
fn cell_flag(cell: &Data) -> Option<String> {
    cell_text(cell)
        .and_then(|text| text.chars().next())
        .map(|c| c.to_ascii_uppercase().to_string())
}

fn is_empty_cell(cell: &Data) -> bool {
    match cell {
        Data::Empty => true,
        Data::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

// =============================================================================
// HEADER VALIDATOR
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderMismatch {
    expected_index: usize,
    expected_header: String,
    actual_index: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct HeaderValidation {
    ok: bool,
    missing: Vec<String>,
    extra: Vec<String>,
    order_mismatch: Vec<OrderMismatch>,
}

fn normalize_header(header: &str) -> String {
    header.trim().to_lowercase()
}

/// Compare the file's header row against the profile's expected list.
/// Missing columns are hard errors; extra and reordered columns are tolerated
/// because the mapper resolves columns by name, not position.
fn validate_headers(found: &[String], expected: &[&str]) -> HeaderValidation {
    let found_norm: Vec<String> = found.iter().map(|h| normalize_header(h)).collect();

    let mut missing = Vec::new();
    let mut order_mismatch = Vec::new();
    for (expected_index, expected_header) in expected.iter().enumerate() {
        match found_norm
            .iter()
            .position(|h| h == &normalize_header(expected_header))
        {
            None => missing.push(expected_header.to_string()),
            Some(actual_index) if actual_index != expected_index => {
                order_mismatch.push(OrderMismatch {
                    expected_index,
                    expected_header: expected_header.to_string(),
                    actual_index,
                });
            }
            Some(_) => {}
        }
    }

    let expected_norm: HashSet<String> =
        expected.iter().map(|h| normalize_header(h)).collect();
    let extra: Vec<String> = found
        .iter()
        .filter(|h| !h.trim().is_empty() && !expected_norm.contains(&normalize_header(h)))
        .map(|h| h.trim().to_string())
        .collect();

    HeaderValidation {
        ok: missing.is_empty(),
        missing,
        extra,
        order_mismatch,
    }
}

// =============================================================================
// ROW MAPPER
// =============================================================================
// Maps one normalized row into the seven sub-entity payloads. The employee id
// is the only mandatory field; every other absence becomes NULL downstream so
// an update never silently replaces existing data with zeroes.

/// Name-indexed column lookup, built once per file.
struct ColumnIndex {
    by_name: HashMap<String, usize>,
}

impl ColumnIndex {
    fn new(headers: &[String]) -> Self {
        let mut by_name = HashMap::new();
        for (index, header) in headers.iter().enumerate() {
            let key = normalize_header(header);
            if !key.is_empty() {
                // First occurrence wins when a header is duplicated
                by_name.entry(key).or_insert(index);
            }
        }
        Self { by_name }
    }

    fn get(&self, header: &str) -> Option<usize> {
        self.by_name.get(&normalize_header(header)).copied()
    }
}

/// One row of cells with name-based typed accessors.
struct RowCells<'a> {
    cells: &'a [Data],
    columns: &'a ColumnIndex,
}

impl<'a> RowCells<'a> {
    fn raw(&self, header: &str) -> Option<&Data> {
        self.columns.get(header).and_then(|index| self.cells.get(index))
    }

    fn text(&self, header: &str) -> Option<String> {
        self.raw(header).and_then(cell_text)
    }

    fn date(&self, header: &str) -> Option<NaiveDate> {
        self.raw(header).and_then(cell_date)
    }

    fn int(&self, header: &str) -> Option<i64> {
        self.raw(header).and_then(cell_int)
    }

    fn flag(&self, header: &str) -> Option<String> {
        self.raw(header).and_then(cell_flag)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct CoreRecord {
    full_name: Option<String>,
    gender: Option<String>,
    birth_place: Option<String>,
    birth_date: Option<NaiveDate>,
    ktp_number: Option<String>,
    npwp_number: Option<String>,
    marital_status: Option<String>,
    religion: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct EmploymentRecord {
    department: Option<String>,
    division: Option<String>,
    job_title: Option<String>,
    grade: Option<String>,
    termination_date: Option<NaiveDate>,
    termination_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct BankRecord {
    bank_name: Option<String>,
    account_number: Option<String>,
    account_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct InsuranceRecord {
    endorsement: Option<String>,
    owlexa: Option<String>,
    fpg: Option<String>,
    bpjs_health_number: Option<String>,
    bpjs_employment_number: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct ContactRecord {
    phone_number: Option<String>,
    email: Option<String>,
    address: Option<String>,
    city: Option<String>,
    emergency_contact_name: Option<String>,
    emergency_contact_phone: Option<String>,
    dependents: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct OnboardRecord {
    hire_date: Option<NaiveDate>,
    permanent_date: Option<NaiveDate>,
    employment_status: Option<String>,
    years_in_service: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct TravelRecord {
    passport_number: Option<String>,
    passport_expiry: Option<NaiveDate>,
    kitas_number: Option<String>,
    travel_start: Option<NaiveDate>,
    travel_end: Option<NaiveDate>,
}

/// The full employee aggregate mapped from one spreadsheet row.
#[derive(Debug, Clone, PartialEq)]
struct EmployeeRecord {
    employee_id: String,
    row_number: i64,
    core: CoreRecord,
    employment: EmploymentRecord,
    bank: BankRecord,
    insurance: InsuranceRecord,
    contact: ContactRecord,
    onboard: OnboardRecord,
    travel: TravelRecord,
}

fn map_row(row: &SheetRow, columns: &ColumnIndex) -> Result<EmployeeRecord, String> {
    let cells = RowCells {
        cells: &row.cells,
        columns,
    };

    let employee_id = match cells.text(COL_EMPLOYEE_ID) {
        Some(id) => id,
        None => return Err("employee id is required".to_string()),
    };

    Ok(EmployeeRecord {
        employee_id,
        row_number: row.row_number,
        core: CoreRecord {
            full_name: cells.text(COL_FULL_NAME),
            gender: cells.flag(COL_GENDER),
            birth_place: cells.text(COL_BIRTH_PLACE),
            birth_date: cells.date(COL_BIRTH_DATE),
            ktp_number: cells.text(COL_KTP_NUMBER),
            npwp_number: cells.text(COL_NPWP_NUMBER),
            marital_status: cells.text(COL_MARITAL_STATUS),
            religion: cells.text(COL_RELIGION),
        },
        employment: EmploymentRecord {
            department: cells.text(COL_DEPARTMENT),
            division: cells.text(COL_DIVISION),
            job_title: cells.text(COL_JOB_TITLE),
            grade: cells.text(COL_GRADE),
            termination_date: cells.date(COL_TERMINATION_DATE),
            termination_reason: cells.text(COL_TERMINATION_REASON),
        },
        bank: BankRecord {
            bank_name: cells.text(COL_BANK_NAME),
            account_number: cells.text(COL_BANK_ACCOUNT_NUMBER),
            account_name: cells.text(COL_BANK_ACCOUNT_NAME),
        },
        insurance: InsuranceRecord {
            endorsement: cells.flag(COL_ENDORSEMENT),
            owlexa: cells.flag(COL_OWLEXA),
            fpg: cells.flag(COL_FPG),
            bpjs_health_number: cells.text(COL_BPJS_HEALTH),
            bpjs_employment_number: cells.text(COL_BPJS_EMPLOYMENT),
        },
        contact: ContactRecord {
            phone_number: cells.text(COL_PHONE_NUMBER),
            email: cells.text(COL_EMAIL),
            address: cells.text(COL_ADDRESS),
            city: cells.text(COL_CITY),
            emergency_contact_name: cells.text(COL_EMERGENCY_NAME),
            emergency_contact_phone: cells.text(COL_EMERGENCY_PHONE),
            dependents: cells.int(COL_DEPENDENTS),
        },
        onboard: OnboardRecord {
            hire_date: cells.date(COL_HIRE_DATE),
            permanent_date: cells.date(COL_PERMANENT_DATE),
            employment_status: cells.text(COL_EMPLOYMENT_STATUS),
            years_in_service: cells.int(COL_YEARS_IN_SERVICE),
        },
        travel: TravelRecord {
            passport_number: cells.text(COL_PASSPORT_NUMBER),
            passport_expiry: cells.date(COL_PASSPORT_EXPIRY),
            kitas_number: cells.text(COL_KITAS_NUMBER),
            travel_start: cells.date(COL_TRAVEL_START),
            travel_end: cells.date(COL_TRAVEL_END),
        },
    })
}

// =============================================================================
// DUPLICATE RESOLVER
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Disposition {
    Write,
    Skip,
    Reject,
}

fn resolve_disposition(policy: DuplicatePolicy, exists: bool) -> Disposition {
    match (policy, exists) {
        (DuplicatePolicy::Update, _) => Disposition::Write,
        (DuplicatePolicy::Skip, true) => Disposition::Skip,
        (DuplicatePolicy::Error, true) => Disposition::Reject,
        (_, false) => Disposition::Write,
    }
}

async fn employee_exists(pool: &PgPool, employee_id: &str) -> Result<bool, sqlx::Error> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT employee_id FROM employee_core WHERE employee_id = $1")
            .bind(employee_id)
            .fetch_optional(pool)
            .await?;
    Ok(row.is_some())
}

// =============================================================================
// REPORT BUILDER
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

/// One reportable fact. The flat tabular rendering emits exactly one line
/// per finding.
#[derive(Debug, Clone)]
struct Finding {
    section: &'static str,
    severity: Severity,
    row: Option<i64>,
    column: Option<String>,
    message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct RowError {
    row_number: i64,
    column: Option<String>,
    message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Summary {
    rows: usize,
    processed_rows: usize,
    errors: usize,
    warnings: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImportReport {
    success: bool,
    message: String,
    processed_rows: usize,
    errors: Vec<String>,
    warnings: Vec<String>,
    summary: Summary,
    header_validation: HeaderValidation,
    row_errors: Vec<RowError>,
    #[serde(skip)]
    findings: Vec<Finding>,
}

fn format_finding(finding: &Finding) -> String {
    match (finding.row, &finding.column) {
        (Some(row), Some(column)) => format!("row {} [{}]: {}", row, column, finding.message),
        (Some(row), None) => format!("row {}: {}", row, finding.message),
        _ => finding.message.clone(),
    }
}

#[derive(Debug, Default)]
struct ReportBuilder {
    rows: usize,
    processed: usize,
    findings: Vec<Finding>,
}

impl ReportBuilder {
    fn new(rows: usize) -> Self {
        Self {
            rows,
            processed: 0,
            findings: Vec::new(),
        }
    }

    fn file_error(&mut self, message: String) {
        self.findings.push(Finding {
            section: "file",
            severity: Severity::Error,
            row: None,
            column: None,
            message,
        });
    }

    fn header_missing(&mut self, header: &str) {
        self.findings.push(Finding {
            section: "header",
            severity: Severity::Error,
            row: None,
            column: Some(header.to_string()),
            message: format!("missing required column '{}'", header),
        });
    }

    fn header_extra(&mut self, header: &str) {
        self.findings.push(Finding {
            section: "header",
            severity: Severity::Warning,
            row: None,
            column: Some(header.to_string()),
            message: format!("unexpected column '{}' ignored", header),
        });
    }

    fn header_order(&mut self, mismatch: &OrderMismatch) {
        self.findings.push(Finding {
            section: "header",
            severity: Severity::Warning,
            row: None,
            column: Some(mismatch.expected_header.clone()),
            message: format!(
                "column '{}' expected at position {}, found at position {}",
                mismatch.expected_header,
                mismatch.expected_index + 1,
                mismatch.actual_index + 1
            ),
        });
    }

    fn row_error(&mut self, row: i64, column: Option<&str>, message: String) {
        self.findings.push(Finding {
            section: "row",
            severity: Severity::Error,
            row: Some(row),
            column: column.map(|c| c.to_string()),
            message,
        });
    }

    fn row_warning(&mut self, row: i64, message: String) {
        self.findings.push(Finding {
            section: "row",
            severity: Severity::Warning,
            row: Some(row),
            column: None,
            message,
        });
    }

    fn finish(mut self, header_validation: HeaderValidation, committed: bool) -> ImportReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut row_errors = Vec::new();

        for finding in &self.findings {
            match finding.severity {
                Severity::Error => {
                    errors.push(format_finding(finding));
                    if let Some(row_number) = finding.row {
                        row_errors.push(RowError {
                            row_number,
                            column: finding.column.clone(),
                            message: finding.message.clone(),
                        });
                    }
                }
                Severity::Warning => warnings.push(format_finding(finding)),
                Severity::Info => {}
            }
        }

        let success = errors.is_empty();
        let message = if committed {
            format!("import committed: {} of {} rows written", self.processed, self.rows)
        } else {
            format!("dry run: {} of {} rows valid", self.processed, self.rows)
        };
        let summary = Summary {
            rows: self.rows,
            processed_rows: self.processed,
            errors: errors.len(),
            warnings: warnings.len(),
        };

        self.findings.push(Finding {
            section: "summary",
            severity: Severity::Info,
            row: None,
            column: None,
            message: format!(
                "rows={} processed={} errors={} warnings={}",
                summary.rows, summary.processed_rows, summary.errors, summary.warnings
            ),
        });

        ImportReport {
            success,
            message,
            processed_rows: summary.processed_rows,
            errors,
            warnings,
            summary,
            header_validation,
            row_errors,
            findings: self.findings,
        }
    }
}

impl ImportReport {
    /// Structured machine-readable encoding.
    fn render_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Flat tabular encoding, one CSV line per finding, for spreadsheet-style
    /// review and filtering by severity.
    fn render_table(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(["section", "severity", "row", "column", "message"])?;
        for finding in &self.findings {
            let row = finding.row.map(|r| r.to_string()).unwrap_or_default();
            writer.write_record([
                finding.section,
                finding.severity.as_str(),
                row.as_str(),
                finding.column.as_deref().unwrap_or(""),
                finding.message.as_str(),
            ])?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| anyhow!("failed to flush report table: {}", e))?;
        Ok(String::from_utf8(bytes)?)
    }
}

// =============================================================================
// FILE READER - XLSX/XLS via calamine, CSV via csv + encoding_rs
// =============================================================================

/// One data row with its original 1-based file position (header = row 1).
#[derive(Debug, Clone)]
struct SheetRow {
    row_number: i64,
    cells: Vec<Data>,
}

#[derive(Debug, Clone)]
struct SheetTable {
    headers: Vec<String>,
    rows: Vec<SheetRow>,
}

fn is_excel_file(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .as_deref(),
        Some("xlsx") | Some("xls") | Some("xlsb") | Some("ods")
    )
}

/// Decode raw CSV bytes: UTF-8 with optional BOM, falling back to
/// Windows-1252 for legacy HR exports.
fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.strip_prefix('\u{feff}').unwrap_or(s).to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

fn parse_table(path: &Path, bytes: Vec<u8>) -> Result<SheetTable> {
    if is_excel_file(path) {
        parse_excel(bytes)
    } else {
        let content = decode_text(&bytes);
        parse_csv_table(&content)
    }
}

fn parse_excel(bytes: Vec<u8>) -> Result<SheetTable> {
    let mut workbook =
        open_workbook_auto_from_rs(Cursor::new(bytes)).context("failed to open spreadsheet")?;

    let sheet_names = workbook.sheet_names().to_vec();
    if sheet_names.is_empty() {
        bail!("spreadsheet has no sheets");
    }

    let sheet_name = &sheet_names[0];
    let range = workbook
        .worksheet_range(sheet_name)
        .context("failed to read sheet")?;

    let (row_count, col_count) = range.get_size();
    println!("Sheet '{}': {} rows x {} columns", sheet_name, row_count, col_count);

    let headers: Vec<String> = range
        .rows()
        .next()
        .context("spreadsheet has no header row")?
        .iter()
        .map(|cell| match cell {
            Data::String(s) => s.trim().to_string(),
            Data::Empty => String::new(),
            other => format!("{}", other),
        })
        .collect();

    if headers.iter().all(|h| h.is_empty()) {
        bail!("spreadsheet header row is empty");
    }

    let mut rows = Vec::new();
    for (index, row) in range.rows().enumerate().skip(1) {
        if row.iter().all(is_empty_cell) {
            continue;
        }
        rows.push(SheetRow {
            row_number: (index + 1) as i64,
            cells: row.to_vec(),
        });
    }

    Ok(SheetTable { headers, rows })
}

fn parse_csv_table(content: &str) -> Result<SheetTable> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .context("failed to read csv header row")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    if headers.iter().all(|h| h.is_empty()) {
        bail!("file has no header row");
    }

    let mut rows = Vec::new();
    for (index, result) in reader.records().enumerate() {
        let line_number = (index + 2) as i64;
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                eprintln!("Warning: skipping line {} due to error: {}", line_number, e);
                continue;
            }
        };
        let cells: Vec<Data> = record
            .iter()
            .map(|field| {
                let trimmed = field.trim();
                if trimmed.is_empty() {
                    Data::Empty
                } else {
                    Data::String(trimmed.to_string())
                }
            })
            .collect();
        if cells.iter().all(is_empty_cell) {
            continue;
        }
        rows.push(SheetRow {
            row_number: line_number,
            cells,
        });
    }

    Ok(SheetTable { headers, rows })
}

// =============================================================================
// UPSERT TRANSACTION ENGINE
// =============================================================================
// One transaction per row, spanning all seven sub-record tables. Core is
// written first so no sub-record can outlive an absent core row. A failure
// rolls back this row only; the batch continues.

#[derive(Debug)]
struct RowFailure {
    section: &'static str,
    message: String,
}

impl RowFailure {
    fn new(section: &'static str, err: impl std::fmt::Display) -> Self {
        Self {
            section,
            message: err.to_string(),
        }
    }
}

async fn upsert_core(
    tx: &mut Transaction<'_, Postgres>,
    rec: &EmployeeRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO employee_core
        (employee_id, full_name, gender, birth_place, birth_date, ktp_number, npwp_number, marital_status, religion)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (employee_id) DO UPDATE SET
            full_name = EXCLUDED.full_name,
            gender = EXCLUDED.gender,
            birth_place = EXCLUDED.birth_place,
            birth_date = EXCLUDED.birth_date,
            ktp_number = EXCLUDED.ktp_number,
            npwp_number = EXCLUDED.npwp_number,
            marital_status = EXCLUDED.marital_status,
            religion = EXCLUDED.religion
        "#,
    )
    .bind(&rec.employee_id)
    .bind(&rec.core.full_name)
    .bind(&rec.core.gender)
    .bind(&rec.core.birth_place)
    .bind(rec.core.birth_date)
    .bind(&rec.core.ktp_number)
    .bind(&rec.core.npwp_number)
    .bind(&rec.core.marital_status)
    .bind(&rec.core.religion)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_employment(
    tx: &mut Transaction<'_, Postgres>,
    rec: &EmployeeRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO employee_employment
        (employee_id, department, division, job_title, grade, termination_date, termination_reason)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (employee_id) DO UPDATE SET
            department = EXCLUDED.department,
            division = EXCLUDED.division,
            job_title = EXCLUDED.job_title,
            grade = EXCLUDED.grade,
            termination_date = EXCLUDED.termination_date,
            termination_reason = EXCLUDED.termination_reason
        "#,
    )
    .bind(&rec.employee_id)
    .bind(&rec.employment.department)
    .bind(&rec.employment.division)
    .bind(&rec.employment.job_title)
    .bind(&rec.employment.grade)
    .bind(rec.employment.termination_date)
    .bind(&rec.employment.termination_reason)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_bank(
    tx: &mut Transaction<'_, Postgres>,
    rec: &EmployeeRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO employee_bank
        (employee_id, bank_name, account_number, account_name)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (employee_id) DO UPDATE SET
            bank_name = EXCLUDED.bank_name,
            account_number = EXCLUDED.account_number,
            account_name = EXCLUDED.account_name
        "#,
    )
    .bind(&rec.employee_id)
    .bind(&rec.bank.bank_name)
    .bind(&rec.bank.account_number)
    .bind(&rec.bank.account_name)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_insurance(
    tx: &mut Transaction<'_, Postgres>,
    rec: &EmployeeRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO employee_insurance
        (employee_id, endorsement, owlexa, fpg, bpjs_health_number, bpjs_employment_number)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (employee_id) DO UPDATE SET
            endorsement = EXCLUDED.endorsement,
            owlexa = EXCLUDED.owlexa,
            fpg = EXCLUDED.fpg,
            bpjs_health_number = EXCLUDED.bpjs_health_number,
            bpjs_employment_number = EXCLUDED.bpjs_employment_number
        "#,
    )
    .bind(&rec.employee_id)
    .bind(&rec.insurance.endorsement)
    .bind(&rec.insurance.owlexa)
    .bind(&rec.insurance.fpg)
    .bind(&rec.insurance.bpjs_health_number)
    .bind(&rec.insurance.bpjs_employment_number)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_contact(
    tx: &mut Transaction<'_, Postgres>,
    rec: &EmployeeRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO employee_contact
        (employee_id, phone_number, email, address, city, emergency_contact_name, emergency_contact_phone, dependents)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (employee_id) DO UPDATE SET
            phone_number = EXCLUDED.phone_number,
            email = EXCLUDED.email,
            address = EXCLUDED.address,
            city = EXCLUDED.city,
            emergency_contact_name = EXCLUDED.emergency_contact_name,
            emergency_contact_phone = EXCLUDED.emergency_contact_phone,
            dependents = EXCLUDED.dependents
        "#,
    )
    .bind(&rec.employee_id)
    .bind(&rec.contact.phone_number)
    .bind(&rec.contact.email)
    .bind(&rec.contact.address)
    .bind(&rec.contact.city)
    .bind(&rec.contact.emergency_contact_name)
    .bind(&rec.contact.emergency_contact_phone)
    .bind(rec.contact.dependents)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_onboard(
    tx: &mut Transaction<'_, Postgres>,
    rec: &EmployeeRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO employee_onboard
        (employee_id, hire_date, permanent_date, employment_status, years_in_service)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (employee_id) DO UPDATE SET
            hire_date = EXCLUDED.hire_date,
            permanent_date = EXCLUDED.permanent_date,
            employment_status = EXCLUDED.employment_status,
            years_in_service = EXCLUDED.years_in_service
        "#,
    )
    .bind(&rec.employee_id)
    .bind(rec.onboard.hire_date)
    .bind(rec.onboard.permanent_date)
    .bind(&rec.onboard.employment_status)
    .bind(rec.onboard.years_in_service)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_travel(
    tx: &mut Transaction<'_, Postgres>,
    rec: &EmployeeRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO employee_travel
        (employee_id, passport_number, passport_expiry, kitas_number, travel_start, travel_end)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (employee_id) DO UPDATE SET
            passport_number = EXCLUDED.passport_number,
            passport_expiry = EXCLUDED.passport_expiry,
            kitas_number = EXCLUDED.kitas_number,
            travel_start = EXCLUDED.travel_start,
            travel_end = EXCLUDED.travel_end
        "#,
    )
    .bind(&rec.employee_id)
    .bind(&rec.travel.passport_number)
    .bind(rec.travel.passport_expiry)
    .bind(&rec.travel.kitas_number)
    .bind(rec.travel.travel_start)
    .bind(rec.travel.travel_end)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Write one employee aggregate inside a single transaction. On failure the
/// transaction is rolled back and the failing sub-entity is reported.
async fn write_employee(pool: &PgPool, rec: &EmployeeRecord) -> Result<(), RowFailure> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| RowFailure::new("transaction", e))?;

    let result = async {
        upsert_core(&mut tx, rec).await.map_err(|e| ("core", e))?;
        upsert_employment(&mut tx, rec).await.map_err(|e| ("employment", e))?;
        upsert_bank(&mut tx, rec).await.map_err(|e| ("bank", e))?;
        upsert_insurance(&mut tx, rec).await.map_err(|e| ("insurance", e))?;
        upsert_contact(&mut tx, rec).await.map_err(|e| ("contact", e))?;
        upsert_onboard(&mut tx, rec).await.map_err(|e| ("onboard", e))?;
        upsert_travel(&mut tx, rec).await.map_err(|e| ("travel", e))?;
        Ok::<(), (&'static str, sqlx::Error)>(())
    }
    .await;

    match result {
        Ok(()) => tx
            .commit()
            .await
            .map_err(|e| RowFailure::new("transaction", e)),
        Err((section, e)) => {
            let _ = tx.rollback().await;
            Err(RowFailure::new(section, e))
        }
    }
}

// =============================================================================
// IMPORT PIPELINE - shared by dry-run and commit
// =============================================================================

/// Run the full pipeline over every row. Dry-run and commit share this path;
/// only `commit = true` touches the sub-record tables. Rows are processed
/// strictly in order, one transaction at a time, so every report line maps to
/// exactly one file row.
async fn run_import(
    pool: &PgPool,
    table: &SheetTable,
    profile: Profile,
    policy: DuplicatePolicy,
    commit: bool,
) -> ImportReport {
    let expected = profile.expected_headers();
    let header_validation = validate_headers(&table.headers, &expected);
    let columns = ColumnIndex::new(&table.headers);
    let mut builder = ReportBuilder::new(table.rows.len());

    for header in &header_validation.missing {
        builder.header_missing(header);
    }
    for header in &header_validation.extra {
        builder.header_extra(header);
    }
    for mismatch in &header_validation.order_mismatch {
        builder.header_order(mismatch);
    }

    // Without the identifier column no row can be keyed; nothing is attempted.
    if columns.get(COL_EMPLOYEE_ID).is_none() {
        builder.file_error(format!(
            "missing employee identifier column '{}'",
            COL_EMPLOYEE_ID
        ));
        return builder.finish(header_validation, commit);
    }

    for row in &table.rows {
        let record = match map_row(row, &columns) {
            Ok(record) => record,
            Err(message) => {
                builder.row_error(row.row_number, Some(COL_EMPLOYEE_ID), message);
                continue;
            }
        };

        // The update policy upserts unconditionally; only skip/error need the
        // existence check to short-circuit.
        let disposition = if policy == DuplicatePolicy::Update {
            Disposition::Write
        } else {
            match employee_exists(pool, &record.employee_id).await {
                Ok(exists) => resolve_disposition(policy, exists),
                Err(e) => {
                    builder.row_error(
                        record.row_number,
                        None,
                        format!("duplicate check failed: {}", e),
                    );
                    continue;
                }
            }
        };

        match disposition {
            Disposition::Skip => builder.row_warning(
                record.row_number,
                format!("skipped duplicate employee '{}'", record.employee_id),
            ),
            Disposition::Reject => builder.row_error(
                record.row_number,
                Some(COL_EMPLOYEE_ID),
                format!("employee '{}' already exists", record.employee_id),
            ),
            Disposition::Write => {
                if commit {
                    match write_employee(pool, &record).await {
                        Ok(()) => builder.processed += 1,
                        Err(failure) => builder.row_error(
                            record.row_number,
                            Some(failure.section),
                            failure.message,
                        ),
                    }
                } else {
                    builder.processed += 1;
                }
            }
        }
    }

    builder.finish(header_validation, commit)
}

// =============================================================================
// IMPORT RUN AUDIT TRAIL
// =============================================================================

async fn create_import_run(
    pool: &PgPool,
    profile: Profile,
    policy: DuplicatePolicy,
    file_name: &str,
    content_hash: &str,
) -> Result<Uuid> {
    let import_run_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO import_runs (import_run_id, profile, file_name, content_hash, status, detail)
        VALUES ($1, $2, $3, $4, 'running', $5)
        "#,
    )
    .bind(import_run_id)
    .bind(profile.as_str())
    .bind(file_name)
    .bind(content_hash)
    .bind(serde_json::json!({ "onDuplicate": policy.as_str() }))
    .execute(pool)
    .await?;
    Ok(import_run_id)
}

async fn finish_import_run(
    pool: &PgPool,
    import_run_id: Uuid,
    report: &ImportReport,
) -> Result<()> {
    let status = if report.success { "ok" } else { "partial" };
    let error = report.errors.first().map(|e| e.as_str());
    sqlx::query(
        r#"
        UPDATE import_runs
        SET finished_at = now(), status = $2, error = $3, detail = detail || $4
        WHERE import_run_id = $1
        "#,
    )
    .bind(import_run_id)
    .bind(status)
    .bind(error)
    .bind(serde_json::json!({
        "rows": report.summary.rows,
        "processedRows": report.summary.processed_rows,
        "errors": report.summary.errors,
        "warnings": report.summary.warnings,
    }))
    .execute(pool)
    .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let config = Config::from_env()?;

    let profile = Profile::from_arg(&args.profile)?;
    let policy = DuplicatePolicy::from_arg(&args.on_duplicate)?;
    if args.report != "json" && args.report != "table" {
        bail!("unknown report format '{}' (expected 'json' or 'table')", args.report);
    }

    println!("=== Employee Records Importer ===");
    println!("File: {}", args.file.display());
    println!("Profile: {}", profile.as_str());
    println!("Duplicate policy: {}", policy.as_str());
    println!("Mode: {}", if args.dry_run { "dry-run" } else { "commit" });

    let bytes = fs::read(&args.file)
        .await
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    if bytes.is_empty() {
        bail!("file is empty: {}", args.file.display());
    }
    if bytes.len() as u64 > config.max_file_bytes {
        bail!(
            "file exceeds size limit ({} > {} bytes)",
            bytes.len(),
            config.max_file_bytes
        );
    }

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let content_hash = format!("sha256:{:x}", hasher.finalize());
    println!("Size: {} bytes", bytes.len());
    println!("Hash: {}", content_hash);

    let table = parse_table(&args.file, bytes)?;
    println!("Data rows: {}", table.rows.len());

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.db_url)
        .await
        .context("Failed to connect to database")?;

    let file_name = args
        .file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| args.file.display().to_string());

    let import_run_id = if !args.dry_run {
        Some(create_import_run(&pool, profile, policy, &file_name, &content_hash).await?)
    } else {
        None
    };

    let report = run_import(&pool, &table, profile, policy, !args.dry_run).await;

    if let Some(run_id) = import_run_id {
        finish_import_run(&pool, run_id, &report).await?;
    }

    println!("\n=== Import Summary ===");
    println!("Rows: {}", report.summary.rows);
    println!("Processed: {}", report.summary.processed_rows);
    println!("Errors: {}", report.summary.errors);
    println!("Warnings: {}", report.summary.warnings);
    println!();

    match args.report.as_str() {
        "table" => print!("{}", report.render_table()?),
        _ => println!("{}", report.render_json()?),
    }

    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn text(value: &str) -> Data {
        Data::String(value.to_string())
    }

    fn headers_of(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    // -------------------------------------------------------------------------
    // CELL NORMALIZER - DATE SERIALS
    // -------------------------------------------------------------------------

    #[test]
    fn test_serial_45000() {
        assert_eq!(serial_to_date(45000.0), Some(ymd(2023, 3, 15)));
    }

    #[test]
    fn test_serial_first_day() {
        assert_eq!(serial_to_date(1.0), Some(ymd(1899, 12, 31)));
    }

    #[test]
    fn test_serial_after_leap_quirk() {
        // Serial 61 is 1900-03-01 in the spreadsheet convention; the
        // 1899-12-30 epoch absorbs the phantom 1900-02-29.
        assert_eq!(serial_to_date(61.0), Some(ymd(1900, 3, 1)));
    }

    #[test]
    fn test_serial_below_one_is_absent() {
        assert_eq!(serial_to_date(0.0), None);
        assert_eq!(serial_to_date(-5.0), None);
    }

    #[test]
    fn test_serial_nan_is_absent() {
        assert_eq!(serial_to_date(f64::NAN), None);
        assert_eq!(serial_to_date(f64::INFINITY), None);
    }

    #[test]
    fn test_cell_date_from_float_serial() {
        assert_eq!(cell_date(&Data::Float(45000.0)), Some(ymd(2023, 3, 15)));
        assert_eq!(cell_date(&Data::Int(45000)), Some(ymd(2023, 3, 15)));
    }

    #[test]
    fn test_cell_date_blank_is_absent_not_epoch() {
        assert_eq!(cell_date(&Data::Empty), None);
        assert_eq!(cell_date(&text("")), None);
        assert_eq!(cell_date(&text("   ")), None);
    }

    #[test]
    fn test_cell_date_iso_string() {
        assert_eq!(cell_date(&text("2024-05-01")), Some(ymd(2024, 5, 1)));
        assert_eq!(cell_date(&text("2024/05/01")), Some(ymd(2024, 5, 1)));
    }

    #[test]
    fn test_cell_date_day_first_formats() {
        assert_eq!(cell_date(&text("01/05/2024")), Some(ymd(2024, 5, 1)));
        assert_eq!(cell_date(&text("15-08-2023")), Some(ymd(2023, 8, 15)));
    }

    #[test]
    fn test_cell_date_numeric_string_is_serial() {
        assert_eq!(cell_date(&text("45000")), Some(ymd(2023, 3, 15)));
    }

    #[test]
    fn test_cell_date_unparseable_is_absent() {
        assert_eq!(cell_date(&text("not a date")), None);
    }

    // -------------------------------------------------------------------------
    // CELL NORMALIZER - TEXT, INTEGERS, FLAGS
    // -------------------------------------------------------------------------

    #[test]
    fn test_cell_text_trims() {
        assert_eq!(cell_text(&text("  Budi Santoso  ")), Some("Budi Santoso".to_string()));
    }

    #[test]
    fn test_cell_text_blank_and_empty_are_absent() {
        assert_eq!(cell_text(&text("   ")), None);
        assert_eq!(cell_text(&Data::Empty), None);
    }

    #[test]
    fn test_cell_text_integral_float_has_no_decimal_point() {
        // Account and national id numbers often arrive as numeric cells
        assert_eq!(cell_text(&Data::Float(1234567890.0)), Some("1234567890".to_string()));
    }

    #[test]
    fn test_cell_int() {
        assert_eq!(cell_int(&Data::Int(3)), Some(3));
        assert_eq!(cell_int(&Data::Float(3.0)), Some(3));
        assert_eq!(cell_int(&Data::Float(3.5)), None);
        assert_eq!(cell_int(&text(" 42 ")), Some(42));
        assert_eq!(cell_int(&text("many")), None);
        assert_eq!(cell_int(&Data::Empty), None);
    }

    #[test]
    fn test_cell_flag_first_char_uppercased() {
        assert_eq!(cell_flag(&text("male")), Some("M".to_string()));
        assert_eq!(cell_flag(&text(" y ")), Some("Y".to_string()));
        assert_eq!(cell_flag(&text("N")), Some("N".to_string()));
        assert_eq!(cell_flag(&Data::Empty), None);
    }

    // -------------------------------------------------------------------------
    // HEADER VALIDATOR
    // -------------------------------------------------------------------------

    #[test]
    fn test_headers_exact_match() {
        let found = headers_of(&["Employee ID", "Full Name", "Gender"]);
        let result = validate_headers(&found, &["Employee ID", "Full Name", "Gender"]);
        assert!(result.ok);
        assert!(result.missing.is_empty());
        assert!(result.extra.is_empty());
        assert!(result.order_mismatch.is_empty());
    }

    #[test]
    fn test_headers_reordered_still_ok() {
        let found = headers_of(&["Gender", "Employee ID", "Full Name"]);
        let result = validate_headers(&found, &["Employee ID", "Full Name", "Gender"]);
        assert!(result.ok);
        assert!(result.missing.is_empty());
        assert_eq!(result.order_mismatch.len(), 3);
    }

    #[test]
    fn test_headers_order_mismatch_indices() {
        let found = headers_of(&["Full Name", "Employee ID"]);
        let result = validate_headers(&found, &["Employee ID", "Full Name"]);
        let first = &result.order_mismatch[0];
        assert_eq!(first.expected_header, "Employee ID");
        assert_eq!(first.expected_index, 0);
        assert_eq!(first.actual_index, 1);
    }

    #[test]
    fn test_headers_missing_is_error() {
        let found = headers_of(&["Employee ID"]);
        let result = validate_headers(&found, &["Employee ID", "Full Name"]);
        assert!(!result.ok);
        assert_eq!(result.missing, vec!["Full Name".to_string()]);
    }

    #[test]
    fn test_headers_extra_is_tolerated() {
        let found = headers_of(&["Employee ID", "Full Name", "Shoe Size"]);
        let result = validate_headers(&found, &["Employee ID", "Full Name"]);
        assert!(result.ok);
        assert_eq!(result.extra, vec!["Shoe Size".to_string()]);
    }

    #[test]
    fn test_headers_case_insensitive() {
        let found = headers_of(&["employee id", "FULL NAME"]);
        let result = validate_headers(&found, &["Employee ID", "Full Name"]);
        assert!(result.ok);
        assert!(result.missing.is_empty());
    }

    // -------------------------------------------------------------------------
    // ROW MAPPER
    // -------------------------------------------------------------------------

    #[test]
    fn test_column_index_first_occurrence_wins() {
        let headers = headers_of(&["Employee ID", "Email", "Email"]);
        let columns = ColumnIndex::new(&headers);
        assert_eq!(columns.get("Email"), Some(1));
        assert_eq!(columns.get("email"), Some(1));
        assert_eq!(columns.get("Missing"), None);
    }

    #[test]
    fn test_map_row_resolves_by_name_not_position() {
        // Columns deliberately out of template order
        let headers = headers_of(&["Department", "Employee ID", "Full Name"]);
        let columns = ColumnIndex::new(&headers);
        let row = SheetRow {
            row_number: 2,
            cells: vec![text("Engineering"), text("EMP-001"), text("Budi Santoso")],
        };

        let record = map_row(&row, &columns).unwrap();
        assert_eq!(record.employee_id, "EMP-001");
        assert_eq!(record.row_number, 2);
        assert_eq!(record.core.full_name, Some("Budi Santoso".to_string()));
        assert_eq!(record.employment.department, Some("Engineering".to_string()));
    }

    #[test]
    fn test_map_row_missing_id_is_rejected() {
        let headers = headers_of(&["Employee ID", "Full Name"]);
        let columns = ColumnIndex::new(&headers);
        let row = SheetRow {
            row_number: 5,
            cells: vec![Data::Empty, text("No Id Here")],
        };

        let result = map_row(&row, &columns);
        assert_eq!(result.unwrap_err(), "employee id is required");
    }

    #[test]
    fn test_map_row_blank_id_is_rejected() {
        let headers = headers_of(&["Employee ID"]);
        let columns = ColumnIndex::new(&headers);
        let row = SheetRow {
            row_number: 3,
            cells: vec![text("   ")],
        };
        assert!(map_row(&row, &columns).is_err());
    }

    #[test]
    fn test_map_row_blank_fields_are_none_not_zero() {
        let headers = headers_of(&["Employee ID", "Dependents", "Hire Date", "Bank Name"]);
        let columns = ColumnIndex::new(&headers);
        let row = SheetRow {
            row_number: 2,
            cells: vec![text("EMP-002"), Data::Empty, text(""), Data::Empty],
        };

        let record = map_row(&row, &columns).unwrap();
        assert_eq!(record.contact.dependents, None);
        assert_eq!(record.onboard.hire_date, None);
        assert_eq!(record.bank.bank_name, None);
    }

    #[test]
    fn test_map_row_typed_fields() {
        let headers = headers_of(&[
            "Employee ID",
            "Gender",
            "Birth Date",
            "Dependents",
            "Hire Date",
        ]);
        let columns = ColumnIndex::new(&headers);
        let row = SheetRow {
            row_number: 2,
            cells: vec![
                text("EMP-003"),
                text("female"),
                Data::Float(33000.0),
                text("2"),
                text("2020-01-15"),
            ],
        };

        let record = map_row(&row, &columns).unwrap();
        assert_eq!(record.core.gender, Some("F".to_string()));
        assert_eq!(record.core.birth_date, serial_to_date(33000.0));
        assert_eq!(record.contact.dependents, Some(2));
        assert_eq!(record.onboard.hire_date, Some(ymd(2020, 1, 15)));
    }

    #[test]
    fn test_map_row_ignores_unrecognized_columns() {
        let headers = headers_of(&["Employee ID", "Shoe Size"]);
        let columns = ColumnIndex::new(&headers);
        let row = SheetRow {
            row_number: 2,
            cells: vec![text("EMP-004"), text("43")],
        };

        let record = map_row(&row, &columns).unwrap();
        assert_eq!(record.employee_id, "EMP-004");
        assert_eq!(record.core, CoreRecord::default());
    }

    // -------------------------------------------------------------------------
    // PROFILES & DUPLICATE POLICY
    // -------------------------------------------------------------------------

    #[test]
    fn test_profile_parsing() {
        assert_eq!(Profile::from_arg("active").unwrap(), Profile::Active);
        assert_eq!(Profile::from_arg("expatriate").unwrap(), Profile::Expatriate);
        assert!(Profile::from_arg("contractor").is_err());
    }

    #[test]
    fn test_profile_expected_headers() {
        let active = Profile::Active.expected_headers();
        let expatriate = Profile::Expatriate.expected_headers();
        assert!(active.contains(&COL_EMPLOYEE_ID));
        assert!(!active.contains(&COL_PASSPORT_NUMBER));
        assert!(expatriate.contains(&COL_PASSPORT_NUMBER));
        assert!(expatriate.contains(&COL_KITAS_NUMBER));
        assert_eq!(expatriate.len(), active.len() + TRAVEL_HEADERS.len());
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!(DuplicatePolicy::from_arg("update").unwrap(), DuplicatePolicy::Update);
        assert_eq!(DuplicatePolicy::from_arg("skip").unwrap(), DuplicatePolicy::Skip);
        assert_eq!(DuplicatePolicy::from_arg("error").unwrap(), DuplicatePolicy::Error);
        assert!(DuplicatePolicy::from_arg("merge").is_err());
    }

    #[test]
    fn test_disposition_table() {
        assert_eq!(resolve_disposition(DuplicatePolicy::Update, true), Disposition::Write);
        assert_eq!(resolve_disposition(DuplicatePolicy::Update, false), Disposition::Write);
        assert_eq!(resolve_disposition(DuplicatePolicy::Skip, true), Disposition::Skip);
        assert_eq!(resolve_disposition(DuplicatePolicy::Skip, false), Disposition::Write);
        assert_eq!(resolve_disposition(DuplicatePolicy::Error, true), Disposition::Reject);
        assert_eq!(resolve_disposition(DuplicatePolicy::Error, false), Disposition::Write);
    }

    // -------------------------------------------------------------------------
    // FILE READER - ROW NUMBERING
    // -------------------------------------------------------------------------

    #[test]
    fn test_csv_first_data_row_is_row_two() {
        let csv = "Employee ID,Full Name\nEMP-001,Budi\nEMP-002,Sari\n";
        let table = parse_csv_table(csv).unwrap();
        assert_eq!(table.headers, headers_of(&["Employee ID", "Full Name"]));
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].row_number, 2);
        assert_eq!(table.rows[1].row_number, 3);
    }

    #[test]
    fn test_csv_blank_rows_skipped_without_renumbering() {
        let csv = "Employee ID,Full Name\nEMP-001,Budi\n,\nEMP-003,Rina\n";
        let table = parse_csv_table(csv).unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].row_number, 2);
        assert_eq!(table.rows[1].row_number, 4);
    }

    #[test]
    fn test_csv_blank_cells_become_empty() {
        let csv = "Employee ID,Email\nEMP-001,\n";
        let table = parse_csv_table(csv).unwrap();
        assert_eq!(table.rows[0].cells[1], Data::Empty);
    }

    #[test]
    fn test_csv_without_header_fails() {
        assert!(parse_csv_table("").is_err());
    }

    #[test]
    fn test_decode_text_strips_bom() {
        let bytes = b"\xef\xbb\xbfEmployee ID\nEMP-001\n";
        let content = decode_text(bytes);
        assert!(content.starts_with("Employee ID"));
    }

    #[test]
    fn test_decode_text_windows_1252_fallback() {
        // 0xE9 is 'é' in Windows-1252 and invalid as a UTF-8 start byte here
        let bytes = b"Employee ID\nR\xe9n\xe9\n";
        let content = decode_text(bytes);
        assert!(content.contains("Réné"));
    }

    #[test]
    fn test_excel_extension_detection() {
        assert!(is_excel_file(Path::new("employees.xlsx")));
        assert!(is_excel_file(Path::new("employees.XLS")));
        assert!(!is_excel_file(Path::new("employees.csv")));
        assert!(!is_excel_file(Path::new("employees")));
    }

    // -------------------------------------------------------------------------
    // REPORT BUILDER
    // -------------------------------------------------------------------------

    fn clean_headers() -> HeaderValidation {
        HeaderValidation {
            ok: true,
            missing: Vec::new(),
            extra: Vec::new(),
            order_mismatch: Vec::new(),
        }
    }

    #[test]
    fn test_report_empty_file_is_success() {
        let builder = ReportBuilder::new(0);
        let report = builder.finish(clean_headers(), true);
        assert!(report.success);
        assert_eq!(report.processed_rows, 0);
        assert!(report.errors.is_empty());
        assert!(report.warnings.is_empty());
        assert_eq!(report.message, "import committed: 0 of 0 rows written");
    }

    #[test]
    fn test_report_success_flips_on_row_error() {
        let mut builder = ReportBuilder::new(3);
        builder.processed += 2;
        builder.row_error(3, Some("bank"), "value too long".to_string());
        let report = builder.finish(clean_headers(), true);

        assert!(!report.success);
        assert_eq!(report.processed_rows, 2);
        assert_eq!(report.row_errors.len(), 1);
        assert_eq!(report.row_errors[0].row_number, 3);
        assert_eq!(report.row_errors[0].column, Some("bank".to_string()));
        assert_eq!(report.errors, vec!["row 3 [bank]: value too long".to_string()]);
    }

    #[test]
    fn test_report_warnings_never_flip_success() {
        let mut builder = ReportBuilder::new(2);
        builder.processed += 1;
        builder.header_extra("Shoe Size");
        builder.row_warning(3, "skipped duplicate employee 'EMP-001'".to_string());
        let report = builder.finish(clean_headers(), false);

        assert!(report.success);
        assert_eq!(report.warnings.len(), 2);
        assert!(report.warnings[1].starts_with("row 3:"));
    }

    #[test]
    fn test_report_summary_counts_match_lists() {
        let mut builder = ReportBuilder::new(4);
        builder.processed += 2;
        builder.header_missing("Full Name");
        builder.row_error(2, None, "employee id is required".to_string());
        builder.row_warning(4, "skipped duplicate employee 'EMP-009'".to_string());
        let report = builder.finish(clean_headers(), true);

        assert_eq!(report.summary.rows, 4);
        assert_eq!(report.summary.processed_rows, 2);
        assert_eq!(report.summary.errors, report.errors.len());
        assert_eq!(report.summary.warnings, report.warnings.len());
        // The header error has no row, so it is not a row error
        assert_eq!(report.row_errors.len(), 1);
    }

    #[test]
    fn test_report_file_error_keeps_row_errors_empty() {
        let mut builder = ReportBuilder::new(5);
        builder.file_error("missing employee identifier column 'Employee ID'".to_string());
        let report = builder.finish(clean_headers(), false);

        assert!(!report.success);
        assert_eq!(report.processed_rows, 0);
        assert_eq!(report.errors.len(), 1);
        assert!(report.row_errors.is_empty());
    }

    #[test]
    fn test_render_json_uses_camel_case() {
        let builder = ReportBuilder::new(0);
        let report = builder.finish(clean_headers(), false);
        let json = report.render_json().unwrap();

        assert!(json.contains("\"processedRows\""));
        assert!(json.contains("\"headerValidation\""));
        assert!(json.contains("\"rowErrors\""));
        assert!(json.contains("\"orderMismatch\""));
    }

    #[test]
    fn test_render_table_one_line_per_finding() {
        let mut builder = ReportBuilder::new(2);
        builder.processed += 1;
        builder.header_extra("Shoe Size");
        builder.row_error(3, Some("insurance"), "constraint violation".to_string());
        let report = builder.finish(clean_headers(), true);
        let table = report.render_table().unwrap();

        let lines: Vec<&str> = table.lines().collect();
        // Column header + extra warning + row error + summary line
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "section,severity,row,column,message");
        assert!(lines[1].starts_with("header,warning"));
        assert!(lines[2].starts_with("row,error,3,insurance"));
        assert!(lines[3].starts_with("summary,info"));
    }

    #[test]
    fn test_render_table_row_numbers_rendered() {
        let mut builder = ReportBuilder::new(1);
        builder.row_error(7, Some("Employee ID"), "employee 'EMP-001' already exists".to_string());
        let report = builder.finish(clean_headers(), true);
        let table = report.render_table().unwrap();
        assert!(table.contains("row,error,7,Employee ID,"));
    }
}
