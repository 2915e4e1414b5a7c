use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::info;

use crate::config::{Schema, SourceKind};
use crate::error::PipelineError;
use crate::filter::{filter_by_company, filter_by_window, filter_table};
use crate::loader::DataSnapshot;
use crate::models::{CompanySelection, RecordTable};

pub fn write_table(table: &RecordTable, path: &Path) -> Result<(), PipelineError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(table.columns())?;
    for row in table.rows() {
        writer.write_record(row.iter().map(|value| value.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes the filtered health tables as CSV files into `out_dir`.
pub fn export_tables(
    snapshot: &DataSnapshot,
    schema: &Schema,
    selection: &CompanySelection,
    window_days: i64,
    now: NaiveDateTime,
    out_dir: &Path,
) -> Result<Vec<PathBuf>, PipelineError> {
    std::fs::create_dir_all(out_dir)?;

    let tables = [
        (
            "absences",
            filter_table(
                snapshot.absence_table(),
                &schema.company_column,
                selection,
                &schema.absence_start_column,
                window_days,
                now,
            ),
        ),
        (
            "exams",
            filter_table(
                snapshot.table(SourceKind::Exams),
                &schema.company_column,
                selection,
                &schema.exam_date_column,
                window_days,
                now,
            ),
        ),
        (
            "certificates",
            filter_by_company(
                snapshot.table(SourceKind::Certificates),
                &schema.company_column,
                selection,
            ),
        ),
        (
            "consultations",
            filter_by_window(
                snapshot.table(SourceKind::Consultations),
                &schema.consultation_date_column,
                window_days,
                now,
            ),
        ),
    ];

    let mut written = Vec::new();
    for (name, table) in tables {
        if table.columns().is_empty() {
            continue;
        }
        let path = out_dir.join(format!("{name}.csv"));
        write_table(&table, &path)?;
        info!(table = name, rows = table.len(), path = %path.display(), "exported table");
        written.push(path);
    }
    Ok(written)
}
