use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Reader};
use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{Config, SourceKind, SourceSpec};
use crate::error::{LoadError, PipelineError};
use crate::models::{parse_number, RecordTable, Value};

static EMPTY_TABLE: RecordTable = RecordTable::EMPTY;

/// Outcome of loading one source.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadEvent {
    Loaded { source: SourceKind, rows: usize },
    Unavailable { source: SourceKind, reason: String },
}

/// Immutable set of tables for one load epoch. Every pipeline stage borrows
/// it; nothing mutates it after construction.
#[derive(Debug, Clone)]
pub struct DataSnapshot {
    pub epoch: Uuid,
    pub loaded_at: NaiveDateTime,
    pub data_dir: PathBuf,
    tables: BTreeMap<SourceKind, RecordTable>,
    events: Vec<LoadEvent>,
}

impl DataSnapshot {
    /// Loads every configured source. A source that fails yields an empty
    /// table and an `Unavailable` event; the rest keep loading.
    pub fn load(config: &Config, data_dir: &Path) -> Self {
        let epoch = Uuid::new_v4();
        let mut tables = BTreeMap::new();
        let mut events = Vec::new();

        for spec in &config.sources {
            let path = spec.resolve(data_dir);
            match load_source(spec, &path) {
                Ok(table) => {
                    info!(%epoch, source = spec.kind.name(), rows = table.len(), "loaded source");
                    events.push(LoadEvent::Loaded {
                        source: spec.kind,
                        rows: table.len(),
                    });
                    tables.insert(spec.kind, table);
                }
                Err(err) => {
                    warn!(%epoch, source = spec.kind.name(), path = %path.display(), error = %err, "source unavailable");
                    events.push(LoadEvent::Unavailable {
                        source: spec.kind,
                        reason: err.to_string(),
                    });
                    tables.insert(spec.kind, RecordTable::empty(spec.kind.name()));
                }
            }
        }

        Self {
            epoch,
            loaded_at: Local::now().naive_local(),
            data_dir: data_dir.to_path_buf(),
            tables,
            events,
        }
    }

    /// Builds a snapshot from tables that are already in memory.
    #[cfg(test)]
    pub fn from_tables(tables: impl IntoIterator<Item = (SourceKind, RecordTable)>) -> Self {
        let tables: BTreeMap<SourceKind, RecordTable> = tables.into_iter().collect();
        let events = tables
            .iter()
            .map(|(kind, table)| LoadEvent::Loaded {
                source: *kind,
                rows: table.len(),
            })
            .collect();
        Self {
            epoch: Uuid::new_v4(),
            loaded_at: Local::now().naive_local(),
            data_dir: PathBuf::new(),
            tables,
            events,
        }
    }

    /// The table for a source, or an empty table if it was never configured.
    pub fn table(&self, kind: SourceKind) -> &RecordTable {
        self.tables.get(&kind).unwrap_or(&EMPTY_TABLE)
    }

    /// Primary absence export, falling back to the absence-rate export when
    /// the primary one is empty.
    pub fn absence_table(&self) -> &RecordTable {
        let primary = self.table(SourceKind::Absence);
        if primary.is_empty() {
            self.table(SourceKind::AbsenceRate)
        } else {
            primary
        }
    }

    pub fn events(&self) -> &[LoadEvent] {
        &self.events
    }

    pub fn has_data(&self) -> bool {
        self.tables.values().any(|table| !table.is_empty())
    }

    /// The only blocking condition: every source came back empty.
    pub fn ensure_any_data(&self) -> Result<(), PipelineError> {
        if self.has_data() {
            Ok(())
        } else {
            Err(PipelineError::NoData(self.data_dir.clone()))
        }
    }

    /// Distinct company names across every table that carries the column.
    pub fn companies(&self, columns: &[&str]) -> Vec<String> {
        let mut names = std::collections::BTreeSet::new();
        for table in self.tables.values() {
            for column in columns.iter().filter_map(|name| table.column(name)) {
                names.extend(column.values().filter_map(Value::key));
            }
        }
        names.into_iter().collect()
    }
}

pub fn load_source(spec: &SourceSpec, path: &Path) -> Result<RecordTable, LoadError> {
    if !path.exists() {
        return Err(LoadError::NotFound(path.to_path_buf()));
    }
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let grid = match extension.as_str() {
        "csv" | "txt" => read_csv_grid(path)?,
        "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => read_sheet_grid(path, spec.sheet.as_deref())?,
        _ => return Err(LoadError::UnsupportedFormat(path.to_path_buf())),
    };

    let mut table = grid_to_table(spec, grid);
    for column in spec.kind.date_columns() {
        table.map_column(column, coerce_date);
    }
    debug!(source = spec.kind.name(), columns = table.columns().len(), "normalized source");
    Ok(table)
}

/// Raw cells before header handling: the header row keeps its exact text.
struct Grid {
    raw_rows: Vec<Vec<String>>,
    values: Vec<Vec<Value>>,
}

fn grid_to_table(spec: &SourceSpec, grid: Grid) -> RecordTable {
    let Grid { raw_rows, values } = grid;
    let width = raw_rows.iter().map(Vec::len).max().unwrap_or(0);

    let (columns, skip) = if spec.header {
        let header = raw_rows.first().cloned().unwrap_or_default();
        let columns = (0..width)
            .map(|i| match header.get(i) {
                Some(name) if !name.trim().is_empty() => name.clone(),
                _ => format!("column_{}", i + 1),
            })
            .collect();
        (columns, 1)
    } else if let Some(fixed) = spec.kind.fixed_columns() {
        (fixed.iter().map(|name| name.to_string()).collect(), 0)
    } else {
        ((0..width).map(|i| format!("column_{}", i + 1)).collect(), 0)
    };

    let mut table = RecordTable::new(spec.kind.name(), columns);
    for row in values.into_iter().skip(skip) {
        if row.iter().all(Value::is_null) {
            continue;
        }
        table.push_row(row);
    }
    table
}

fn read_csv_grid(path: &Path) -> Result<Grid, LoadError> {
    let delimiter = sniff_delimiter(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_path(path)?;

    let mut raw_rows = Vec::new();
    let mut values = Vec::new();
    for record in reader.byte_records() {
        let record = record?;
        let cells: Vec<String> = record.iter().map(decode_field).collect();
        values.push(cells.iter().map(|cell| Value::from_text(cell)).collect());
        raw_rows.push(cells);
    }
    Ok(Grid { raw_rows, values })
}

/// `;` when the first line has more semicolons than commas, `,` otherwise.
fn sniff_delimiter(path: &Path) -> Result<u8, LoadError> {
    let mut first_line = Vec::new();
    BufReader::new(File::open(path)?).read_until(b'\n', &mut first_line)?;
    let count = |byte: u8| first_line.iter().filter(|&&b| b == byte).count();
    Ok(if count(b';') > count(b',') { b';' } else { b',' })
}

/// UTF-8 when the bytes are valid, Latin-1 otherwise (legacy Windows exports).
fn decode_field(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.strip_prefix('\u{feff}').unwrap_or(text).to_string(),
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

fn read_sheet_grid(path: &Path, sheet: Option<&str>) -> Result<Grid, LoadError> {
    let mut workbook = open_workbook_auto(path)?;
    let names = workbook.sheet_names().to_vec();
    let name = match sheet {
        Some(wanted) => names
            .iter()
            .find(|name| name.as_str() == wanted)
            .cloned()
            .ok_or_else(|| LoadError::SheetNotFound(wanted.to_string()))?,
        None => names
            .first()
            .cloned()
            .ok_or_else(|| LoadError::SheetNotFound("<first sheet>".to_string()))?,
    };
    let range = workbook.worksheet_range(&name)?;

    let mut raw_rows = Vec::new();
    let mut values = Vec::new();
    for row in range.rows() {
        raw_rows.push(row.iter().map(cell_text).collect());
        values.push(row.iter().map(cell_value).collect());
    }
    Ok(Grid { raw_rows, values })
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.clone(),
        other => cell_value(other).to_string(),
    }
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Null,
        Data::String(s) => Value::from_text(s),
        Data::Int(n) => Value::Number(*n as f64),
        Data::Float(f) => Value::Number(*f),
        Data::Bool(b) => Value::Text(b.to_string()),
        Data::Error(_) => Value::Null,
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(Value::Date)
            .unwrap_or(Value::Number(dt.as_f64())),
        Data::DateTimeIso(s) => parse_date_text(s)
            .map(Value::Date)
            .unwrap_or_else(|| Value::from_text(s)),
        Data::DurationIso(s) => Value::Text(s.clone()),
    }
}

/// Date coercion used for every profiled column: anything that does not
/// parse becomes `Null`.
pub fn coerce_date(value: &Value) -> Value {
    let parsed = match value {
        Value::Date(d) => Some(*d),
        Value::Text(text) => {
            parse_date_text(text).or_else(|| parse_number(text).and_then(from_serial))
        }
        Value::Number(serial) => from_serial(*serial),
        Value::Null => None,
    };
    parsed.map(Value::Date).unwrap_or(Value::Null)
}

const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"];

pub fn parse_date_text(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_local());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    parse_month_year(text)
}

/// `jan/25` style month labels (Portuguese abbreviations), first of month.
fn parse_month_year(text: &str) -> Option<NaiveDateTime> {
    let (month, year) = text.split_once('/')?;
    let month: String = month.trim().to_lowercase().chars().take(3).collect();
    let month = match month.as_str() {
        "jan" => 1,
        "fev" => 2,
        "mar" => 3,
        "abr" => 4,
        "mai" => 5,
        "jun" => 6,
        "jul" => 7,
        "ago" => 8,
        "set" => 9,
        "out" => 10,
        "nov" => 11,
        "dez" => 12,
        _ => return None,
    };
    let year = year.trim();
    let year: i32 = match year.len() {
        2 => 2000 + year.parse::<i32>().ok()?,
        4 => year.parse().ok()?,
        _ => return None,
    };
    NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}

/// Spreadsheet serial day number (1900 date system).
fn from_serial(serial: f64) -> Option<NaiveDateTime> {
    if !(1.0..=2_958_465.0).contains(&serial) {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let seconds = (serial * 86_400.0).round() as i64;
    base.checked_add_signed(Duration::seconds(seconds))
}
