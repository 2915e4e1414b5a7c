use chrono::{Duration, NaiveDateTime};

use crate::models::{CompanySelection, RecordTable};

/// Window sizes offered to users, in days.
pub const WINDOW_OPTIONS: [i64; 5] = [30, 60, 90, 180, 365];

pub const DEFAULT_WINDOW_DAYS: i64 = 90;

pub fn cutoff(now: NaiveDateTime, window_days: i64) -> NaiveDateTime {
    now - Duration::days(window_days)
}

/// Keeps rows whose `date_column` lies in `[now - window_days, now]`.
/// Rows without a date are dropped. A table lacking the column is returned
/// as is.
pub fn filter_by_window(
    table: &RecordTable,
    date_column: &str,
    window_days: i64,
    now: NaiveDateTime,
) -> RecordTable {
    let Some(column) = table.column(date_column) else {
        return table.clone();
    };
    let index = column.index();
    let start = cutoff(now, window_days);

    table.filter_rows(|row| match row[index].as_date() {
        Some(date) => date >= start && date <= now,
        None => false,
    })
}

/// Keeps rows whose company is in the selection. With a concrete selection a
/// table lacking the company column has no matching rows.
pub fn filter_by_company(
    table: &RecordTable,
    company_column: &str,
    selection: &CompanySelection,
) -> RecordTable {
    if matches!(selection, CompanySelection::All) {
        return table.clone();
    }
    let Some(column) = table.column(company_column) else {
        return table.filter_rows(|_| false);
    };
    let index = column.index();

    table.filter_rows(|row| {
        row[index]
            .key()
            .is_some_and(|company| selection.contains(&company))
    })
}

/// Both filters, company first. The predicates are conjunctive so the order
/// does not change the result.
pub fn filter_table(
    table: &RecordTable,
    company_column: &str,
    selection: &CompanySelection,
    date_column: &str,
    window_days: i64,
    now: NaiveDateTime,
) -> RecordTable {
    let by_company = filter_by_company(table, company_column, selection);
    filter_by_window(&by_company, date_column, window_days, now)
}
