use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

// ============================================================================
// Row Types
// ============================================================================

/// Gap-closure measurement for one insurer in one month.
/// `percentage` is derived from numerator/denominator by the database and
/// rounded to 2 decimal places on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapClosureRow {
    pub id: i64,
    pub date: NaiveDate,
    pub percentage: f64,
    pub insurance: String,
}

/// New gap-closure entry as submitted from the data-entry form
/// (numerator/denominator, not a precomputed percentage).
#[derive(Debug, Clone, Deserialize)]
pub struct NewGapClosure {
    pub date: NaiveDate,
    pub numerator: i64,
    pub denominator: i64,
    pub insurance: String,
}

/// Risk-score closure percentage (entered directly, no ratio).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskScoreRow {
    pub id: i64,
    pub date: NaiveDate,
    pub percentage: f64,
    pub insurance: String,
}

/// Patient-outreach measurement, same shape as gap closure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutreachRow {
    pub id: i64,
    pub date: NaiveDate,
    pub percentage: f64,
    pub insurance: String,
}

/// Monthly priority-gap counts extracted from an uploaded workbook.
/// Counts are nullable: an extraction run may not cover every measure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityGapRow {
    pub id: i64,
    pub date: NaiveDate,
    pub diabetes: Option<i64>,
    pub blood_pressure: Option<i64>,
    pub breast_cancer: Option<i64>,
    pub colo_cancer: Option<i64>,
}

/// New priority-gap entry (id assigned by the database).
#[derive(Debug, Clone, Deserialize)]
pub struct NewPriorityGap {
    pub date: NaiveDate,
    pub diabetes: Option<i64>,
    pub blood_pressure: Option<i64>,
    pub breast_cancer: Option<i64>,
    pub colo_cancer: Option<i64>,
}

/// Earnings per insurer (pie chart data).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarningsRow {
    pub id: i64,
    pub insurance: String,
    pub earnings: f64,
}

// ============================================================================
// Schema
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // Percentage columns on the ratio tables are generated from
    // numerator/denominator so a stored row can never disagree with its parts.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS closure_percentage (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            numerator INTEGER NOT NULL,
            denominator INTEGER NOT NULL CHECK (denominator != 0),
            percentage REAL GENERATED ALWAYS AS
                (CAST(numerator AS REAL) * 100.0 / denominator),
            date TEXT NOT NULL,
            insurance TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS risk_closure (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            percentage REAL NOT NULL,
            date TEXT NOT NULL,
            insurance TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS pt_outreach (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            numerator INTEGER NOT NULL,
            denominator INTEGER NOT NULL CHECK (denominator != 0),
            percentage REAL GENERATED ALWAYS AS
                (CAST(numerator AS REAL) * 100.0 / denominator),
            date TEXT NOT NULL,
            insurance TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS priority_gaps (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            date TEXT NOT NULL,
            diabetes INTEGER,
            blood_pressure INTEGER,
            breast_cancer INTEGER,
            colo_cancer INTEGER,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS closure_earnings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            insurance TEXT NOT NULL,
            earnings REAL NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes - every chart query filters or orders by date
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_closure_date ON closure_percentage(date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_risk_date ON risk_closure(date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_outreach_date ON pt_outreach(date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_priority_date ON priority_gaps(date)",
        [],
    )?;

    Ok(())
}

fn parse_date(s: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn date_str(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

// ============================================================================
// Gap Closure (closure_percentage)
// ============================================================================

pub fn insert_gap_closure(conn: &Connection, entry: &NewGapClosure) -> Result<GapClosureRow> {
    conn.execute(
        "INSERT INTO closure_percentage (numerator, denominator, date, insurance)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            entry.numerator,
            entry.denominator,
            date_str(entry.date),
            entry.insurance
        ],
    )
    .context("Failed to insert gap closure row")?;

    let id = conn.last_insert_rowid();
    let row = conn.query_row(
        "SELECT id, date, ROUND(percentage, 2), insurance
         FROM closure_percentage WHERE id = ?1",
        params![id],
        map_percentage_row(|id, date, percentage, insurance| GapClosureRow {
            id,
            date,
            percentage,
            insurance,
        }),
    )?;

    Ok(row)
}

pub fn get_gap_closures(conn: &Connection) -> Result<Vec<GapClosureRow>> {
    percentage_rows(
        conn,
        "SELECT id, date, ROUND(percentage, 2), insurance
         FROM closure_percentage ORDER BY date ASC",
        [],
        |id, date, percentage, insurance| GapClosureRow {
            id,
            date,
            percentage,
            insurance,
        },
    )
}

/// Rows with date in `[start, end)`, newest first.
pub fn gap_closures_in_interval(
    conn: &Connection,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<GapClosureRow>> {
    percentage_rows(
        conn,
        "SELECT id, date, ROUND(percentage, 2), insurance
         FROM closure_percentage
         WHERE date >= ?1 AND date < ?2
         ORDER BY date DESC",
        params![date_str(start), date_str(end)],
        |id, date, percentage, insurance| GapClosureRow {
            id,
            date,
            percentage,
            insurance,
        },
    )
}

// ============================================================================
// Risk Score (risk_closure)
// ============================================================================

pub fn insert_risk_score(
    conn: &Connection,
    date: NaiveDate,
    percentage: f64,
    insurance: &str,
) -> Result<RiskScoreRow> {
    conn.execute(
        "INSERT INTO risk_closure (percentage, date, insurance) VALUES (?1, ?2, ?3)",
        params![percentage, date_str(date), insurance],
    )
    .context("Failed to insert risk score row")?;

    let id = conn.last_insert_rowid();
    let row = conn.query_row(
        "SELECT id, date, ROUND(percentage, 2), insurance FROM risk_closure WHERE id = ?1",
        params![id],
        map_percentage_row(|id, date, percentage, insurance| RiskScoreRow {
            id,
            date,
            percentage,
            insurance,
        }),
    )?;

    Ok(row)
}

pub fn get_risk_scores(conn: &Connection) -> Result<Vec<RiskScoreRow>> {
    percentage_rows(
        conn,
        "SELECT id, date, ROUND(percentage, 2), insurance
         FROM risk_closure ORDER BY date ASC",
        [],
        |id, date, percentage, insurance| RiskScoreRow {
            id,
            date,
            percentage,
            insurance,
        },
    )
}

pub fn risk_scores_in_interval(
    conn: &Connection,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<RiskScoreRow>> {
    percentage_rows(
        conn,
        "SELECT id, date, ROUND(percentage, 2), insurance
         FROM risk_closure
         WHERE date >= ?1 AND date < ?2
         ORDER BY date DESC",
        params![date_str(start), date_str(end)],
        |id, date, percentage, insurance| RiskScoreRow {
            id,
            date,
            percentage,
            insurance,
        },
    )
}

// ============================================================================
// Outreach (pt_outreach)
// ============================================================================

pub fn insert_outreach(conn: &Connection, entry: &NewGapClosure) -> Result<OutreachRow> {
    conn.execute(
        "INSERT INTO pt_outreach (numerator, denominator, date, insurance)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            entry.numerator,
            entry.denominator,
            date_str(entry.date),
            entry.insurance
        ],
    )
    .context("Failed to insert outreach row")?;

    let id = conn.last_insert_rowid();
    let row = conn.query_row(
        "SELECT id, date, ROUND(percentage, 2), insurance FROM pt_outreach WHERE id = ?1",
        params![id],
        map_percentage_row(|id, date, percentage, insurance| OutreachRow {
            id,
            date,
            percentage,
            insurance,
        }),
    )?;

    Ok(row)
}

pub fn get_outreach(conn: &Connection) -> Result<Vec<OutreachRow>> {
    percentage_rows(
        conn,
        "SELECT id, date, ROUND(percentage, 2), insurance
         FROM pt_outreach ORDER BY date ASC",
        [],
        |id, date, percentage, insurance| OutreachRow {
            id,
            date,
            percentage,
            insurance,
        },
    )
}

pub fn outreach_in_interval(
    conn: &Connection,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<OutreachRow>> {
    percentage_rows(
        conn,
        "SELECT id, date, ROUND(percentage, 2), insurance
         FROM pt_outreach
         WHERE date >= ?1 AND date < ?2
         ORDER BY date DESC",
        params![date_str(start), date_str(end)],
        |id, date, percentage, insurance| OutreachRow {
            id,
            date,
            percentage,
            insurance,
        },
    )
}

/// Shared row-mapper for the three percentage-series tables. All of them
/// project (id, date, percentage, insurance).
fn map_percentage_row<T>(
    build: impl Fn(i64, NaiveDate, f64, String) -> T,
) -> impl Fn(&rusqlite::Row<'_>) -> rusqlite::Result<T> {
    move |row| {
        let date_text: String = row.get(1)?;
        Ok(build(
            row.get(0)?,
            parse_date(&date_text)?,
            row.get(2)?,
            row.get(3)?,
        ))
    }
}

fn percentage_rows<T, P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    build: impl Fn(i64, NaiveDate, f64, String) -> T,
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, map_percentage_row(build))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============================================================================
// Priority Gaps
// ============================================================================

pub fn insert_priority_gap(conn: &Connection, entry: &NewPriorityGap) -> Result<PriorityGapRow> {
    conn.execute(
        "INSERT INTO priority_gaps (date, diabetes, blood_pressure, breast_cancer, colo_cancer)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            date_str(entry.date),
            entry.diabetes,
            entry.blood_pressure,
            entry.breast_cancer,
            entry.colo_cancer,
        ],
    )
    .context("Failed to insert priority gaps row")?;

    let id = conn.last_insert_rowid();
    let row = conn.query_row(
        "SELECT id, date, diabetes, blood_pressure, breast_cancer, colo_cancer
         FROM priority_gaps WHERE id = ?1",
        params![id],
        map_priority_row,
    )?;

    Ok(row)
}

pub fn get_priority_gaps(conn: &Connection) -> Result<Vec<PriorityGapRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, date, diabetes, blood_pressure, breast_cancer, colo_cancer
         FROM priority_gaps ORDER BY date ASC",
    )?;
    let rows = stmt
        .query_map([], map_priority_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn priority_gaps_in_interval(
    conn: &Connection,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<PriorityGapRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, date, diabetes, blood_pressure, breast_cancer, colo_cancer
         FROM priority_gaps
         WHERE date >= ?1 AND date < ?2
         ORDER BY date DESC",
    )?;
    let rows = stmt
        .query_map(params![date_str(start), date_str(end)], map_priority_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn map_priority_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PriorityGapRow> {
    let date_text: String = row.get(1)?;
    Ok(PriorityGapRow {
        id: row.get(0)?,
        date: parse_date(&date_text)?,
        diabetes: row.get(2)?,
        blood_pressure: row.get(3)?,
        breast_cancer: row.get(4)?,
        colo_cancer: row.get(5)?,
    })
}

// ============================================================================
// Earnings
// ============================================================================

pub fn get_earnings(conn: &Connection) -> Result<Vec<EarningsRow>> {
    let mut stmt = conn.prepare("SELECT id, insurance, earnings FROM closure_earnings")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(EarningsRow {
                id: row.get(0)?,
                insurance: row.get(1)?,
                earnings: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn insert_earnings(conn: &Connection, insurance: &str, earnings: f64) -> Result<EarningsRow> {
    conn.execute(
        "INSERT INTO closure_earnings (insurance, earnings) VALUES (?1, ?2)",
        params![insurance, earnings],
    )
    .context("Failed to insert earnings row")?;

    Ok(EarningsRow {
        id: conn.last_insert_rowid(),
        insurance: insurance.to_string(),
        earnings,
    })
}

// ============================================================================
// Administrative Table View
// ============================================================================

/// Whitelist of tables exposed through the admin table view. Path parameters
/// are matched against this enum and never spliced into SQL as raw strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableName {
    ClosurePercentage,
    RiskClosure,
    PtOutreach,
    PriorityGaps,
    ClosureEarnings,
}

impl TableName {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableName::ClosurePercentage => "closure_percentage",
            TableName::RiskClosure => "risk_closure",
            TableName::PtOutreach => "pt_outreach",
            TableName::PriorityGaps => "priority_gaps",
            TableName::ClosureEarnings => "closure_earnings",
        }
    }
}

impl FromStr for TableName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "closure_percentage" => Ok(TableName::ClosurePercentage),
            "risk_closure" => Ok(TableName::RiskClosure),
            "pt_outreach" => Ok(TableName::PtOutreach),
            "priority_gaps" => Ok(TableName::PriorityGaps),
            "closure_earnings" => Ok(TableName::ClosureEarnings),
            other => Err(anyhow::anyhow!("Unknown table: {}", other)),
        }
    }
}

/// All rows of one table as JSON objects for the admin view. The two
/// date-series tables edited most are ordered newest-date first; the rest
/// fall back to insertion order, newest first.
pub fn fetch_table(conn: &Connection, table: TableName) -> Result<Vec<serde_json::Value>> {
    fn to_json<T: Serialize>(rows: Vec<T>) -> Result<Vec<serde_json::Value>> {
        rows.into_iter()
            .map(|r| serde_json::to_value(r).map_err(anyhow::Error::from))
            .collect()
    }

    match table {
        TableName::ClosurePercentage => {
            let mut rows = get_gap_closures(conn)?;
            rows.sort_by(|a, b| b.date.cmp(&a.date));
            to_json(rows)
        }
        TableName::RiskClosure => {
            let mut rows = get_risk_scores(conn)?;
            rows.sort_by(|a, b| b.date.cmp(&a.date));
            to_json(rows)
        }
        TableName::PtOutreach => {
            let mut rows = get_outreach(conn)?;
            rows.sort_by(|a, b| b.id.cmp(&a.id));
            to_json(rows)
        }
        TableName::PriorityGaps => {
            let mut rows = get_priority_gaps(conn)?;
            rows.sort_by(|a, b| b.id.cmp(&a.id));
            to_json(rows)
        }
        TableName::ClosureEarnings => {
            let mut rows = get_earnings(conn)?;
            rows.sort_by(|a, b| b.id.cmp(&a.id));
            to_json(rows)
        }
    }
}

/// Delete one row by primary key. Returns false when the id does not exist.
pub fn delete_row(conn: &Connection, table: TableName, id: i64) -> Result<bool> {
    let sql = format!("DELETE FROM {} WHERE id = ?1", table.as_str());
    let affected = conn.execute(&sql, params![id])?;
    Ok(affected > 0)
}

pub fn count_rows(conn: &Connection, table: TableName) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", table.as_str());
    let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
    Ok(count)
}

// ============================================================================
// CSV Bulk Import
// ============================================================================

/// Load gap-closure entries from a CSV with columns:
/// date,numerator,denominator,insurance
pub fn load_gap_closure_csv(csv_path: &Path) -> Result<Vec<NewGapClosure>> {
    let mut rdr = csv::Reader::from_path(csv_path).context("Failed to open CSV file")?;

    let mut entries = Vec::new();
    for result in rdr.deserialize() {
        let entry: NewGapClosure = result.context("Failed to deserialize gap closure row")?;
        entries.push(entry);
    }

    Ok(entries)
}

pub fn insert_gap_closures(conn: &Connection, entries: &[NewGapClosure]) -> Result<usize> {
    let mut inserted = 0;
    for entry in entries {
        insert_gap_closure(conn, entry)?;
        inserted += 1;
    }
    Ok(inserted)
}
