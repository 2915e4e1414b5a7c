use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::{Datelike, NaiveDateTime};
use serde::Serialize;

use crate::config::{Schema, SourceKind};
use crate::filter::{cutoff, filter_by_company, filter_table};
use crate::loader::DataSnapshot;
use crate::models::{Alert, CompanySelection, Insights, KpiSet, Metric, RecordTable, SafetyKpis};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyTrend {
    pub month: String,
    pub cases: usize,
    pub lost_days: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryMonth {
    pub month: String,
    pub category: &'static str,
    pub lost_days: f64,
}

/// Chart-ready series for one (selection, window) pair.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Summaries {
    pub top_diagnoses: Vec<(String, usize)>,
    pub specialties: Vec<(String, usize)>,
    pub monthly_trend: Vec<MonthlyTrend>,
    pub lost_days_by_category: Vec<CategoryMonth>,
    pub exams_normal: usize,
    pub exams_altered: usize,
    pub exam_types: Vec<(String, usize)>,
    pub certificate_status: Vec<(String, usize)>,
    pub certificates_by_unit: Vec<(String, usize)>,
}

/// Pathology group from the first letter of a diagnosis code.
pub fn categorize_cid(code: Option<&str>) -> &'static str {
    match code.and_then(|code| code.trim().chars().next()) {
        Some('F') => "Mental disorders",
        Some('A') => "Infectious diseases",
        Some('K') => "Digestive diseases",
        _ => "Other",
    }
}

fn month_key(date: NaiveDateTime) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

fn value_counts(table: &RecordTable, column: &str, limit: Option<usize>) -> Vec<(String, usize)> {
    let mut counts = table
        .column(column)
        .map(|column| column.value_counts())
        .unwrap_or_default();
    if let Some(limit) = limit {
        counts.truncate(limit);
    }
    counts
}

pub fn monthly_trend(absences: &RecordTable, schema: &Schema) -> Vec<MonthlyTrend> {
    let Some(start) = absences.column(&schema.absence_start_column) else {
        return Vec::new();
    };
    let days_index = absences
        .column(&schema.days_absent_column)
        .map(|column| column.index());

    let mut months: BTreeMap<String, (usize, f64)> = BTreeMap::new();
    for row in absences.rows() {
        let Some(date) = row[start.index()].as_date() else {
            continue;
        };
        let entry = months.entry(month_key(date)).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += days_index
            .and_then(|index| row[index].as_number())
            .unwrap_or(0.0);
    }

    months
        .into_iter()
        .map(|(month, (cases, lost_days))| MonthlyTrend {
            month,
            cases,
            lost_days,
        })
        .collect()
}

pub fn lost_days_by_category(absences: &RecordTable, schema: &Schema) -> Vec<CategoryMonth> {
    let (Some(start), Some(days)) = (
        absences.column(&schema.absence_start_column),
        absences.column(&schema.days_absent_column),
    ) else {
        return Vec::new();
    };
    let code_index = absences
        .column(&schema.diagnosis_code_column)
        .map(|column| column.index());

    let mut totals: BTreeMap<(String, &'static str), f64> = BTreeMap::new();
    for row in absences.rows() {
        let Some(date) = row[start.index()].as_date() else {
            continue;
        };
        let code = code_index.and_then(|index| row[index].key());
        let category = categorize_cid(code.as_deref());
        *totals.entry((month_key(date), category)).or_insert(0.0) +=
            row[days.index()].as_number().unwrap_or(0.0);
    }

    totals
        .into_iter()
        .map(|((month, category), lost_days)| CategoryMonth {
            month,
            category,
            lost_days,
        })
        .collect()
}

pub fn summarize(
    snapshot: &DataSnapshot,
    schema: &Schema,
    selection: &CompanySelection,
    window_days: i64,
    now: NaiveDateTime,
) -> Summaries {
    let absences = filter_table(
        snapshot.absence_table(),
        &schema.company_column,
        selection,
        &schema.absence_start_column,
        window_days,
        now,
    );
    let exams = filter_table(
        snapshot.table(SourceKind::Exams),
        &schema.company_column,
        selection,
        &schema.exam_date_column,
        window_days,
        now,
    );
    let certificates = filter_by_company(
        snapshot.table(SourceKind::Certificates),
        &schema.company_column,
        selection,
    );

    let exams_altered = exams
        .column(&schema.exam_altered_column)
        .map(|column| column.count_eq(&schema.yes_value))
        .unwrap_or(0);

    Summaries {
        top_diagnoses: value_counts(&absences, &schema.diagnosis_column, Some(10)),
        specialties: value_counts(&absences, &schema.specialty_column, None),
        monthly_trend: monthly_trend(&absences, schema),
        lost_days_by_category: lost_days_by_category(&absences, schema),
        exams_normal: exams.len() - exams_altered,
        exams_altered,
        exam_types: value_counts(&exams, &schema.exam_type_column, None),
        certificate_status: value_counts(&certificates, &schema.certificate_status_column, None),
        certificates_by_unit: value_counts(&certificates, &schema.certificate_unit_column, Some(10)),
    }
}

fn format_metric(metric: Metric, value: f64) -> String {
    if metric.is_percentage() {
        format!("{value:.1}%")
    } else if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.1}")
    }
}

fn write_alerts(output: &mut String, title: &str, alerts: &[Alert]) {
    let _ = writeln!(output, "### {title}");
    if alerts.is_empty() {
        let _ = writeln!(output, "None.");
    } else {
        for alert in alerts {
            let _ = writeln!(output, "- {}", alert.message);
        }
    }
    let _ = writeln!(output);
}

fn write_counts(output: &mut String, title: &str, counts: &[(String, usize)], empty: &str) {
    let _ = writeln!(output, "## {title}");
    if counts.is_empty() {
        let _ = writeln!(output, "{empty}");
    } else {
        for (label, count) in counts {
            let _ = writeln!(output, "- {label}: {count}");
        }
    }
    let _ = writeln!(output);
}

pub fn build_report(
    selection: &CompanySelection,
    window_days: i64,
    now: NaiveDateTime,
    kpis: &KpiSet,
    insights: &Insights,
    summaries: &Summaries,
    safety: &SafetyKpis,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Occupational Health Report");
    let _ = writeln!(
        output,
        "Generated for {} (last {} days, {} to {})",
        selection.label(),
        window_days,
        cutoff(now, window_days).date(),
        now.date()
    );
    let _ = writeln!(output);

    let _ = writeln!(output, "## Key Indicators");
    let _ = writeln!(output, "| Metric | Value |");
    let _ = writeln!(output, "| --- | --- |");
    for metric in Metric::KPIS {
        let _ = writeln!(
            output,
            "| {} | {} |",
            metric.name(),
            format_metric(metric, kpis.value(metric))
        );
    }
    let _ = writeln!(output);

    let _ = writeln!(output, "## Alerts");
    write_alerts(&mut output, "Critical", &insights.critical);
    write_alerts(&mut output, "Warning", &insights.warning);
    write_alerts(&mut output, "Info", &insights.info);

    write_counts(
        &mut output,
        "Top Diagnoses",
        &summaries.top_diagnoses,
        "No diagnosis data for this window.",
    );
    write_counts(
        &mut output,
        "Specialties",
        &summaries.specialties,
        "No specialty data for this window.",
    );

    let _ = writeln!(output, "## Monthly Absence Trend");
    if summaries.monthly_trend.is_empty() {
        let _ = writeln!(output, "No absences recorded for this window.");
    } else {
        for month in &summaries.monthly_trend {
            let _ = writeln!(
                output,
                "- {}: {} cases, {:.1} lost days",
                month.month, month.cases, month.lost_days
            );
        }
    }
    let _ = writeln!(output);

    let _ = writeln!(output, "## Lost Days by Pathology Group");
    if summaries.lost_days_by_category.is_empty() {
        let _ = writeln!(output, "No absences recorded for this window.");
    } else {
        for entry in &summaries.lost_days_by_category {
            let _ = writeln!(
                output,
                "- {} {}: {:.1} days",
                entry.month, entry.category, entry.lost_days
            );
        }
    }
    let _ = writeln!(output);

    let _ = writeln!(output, "## Exams");
    let _ = writeln!(
        output,
        "- Normal: {}, altered: {}",
        summaries.exams_normal, summaries.exams_altered
    );
    for (kind, count) in &summaries.exam_types {
        let _ = writeln!(output, "- {kind}: {count}");
    }
    let _ = writeln!(output);

    write_counts(
        &mut output,
        "Certificate Status",
        &summaries.certificate_status,
        "No certificate data.",
    );
    write_counts(
        &mut output,
        "Certificates by Unit",
        &summaries.certificates_by_unit,
        "No certificate data.",
    );

    let _ = writeln!(output, "## Workplace Safety");
    let _ = writeln!(
        output,
        "- Visits: {:.0} realized of {:.0} planned",
        safety.visits_realized, safety.visits_planned
    );
    let _ = writeln!(
        output,
        "- Documents: {} compliant of {} ({:.1}%)",
        safety.documents_compliant, safety.documents_required, safety.document_compliance_pct
    );
    for unit in &safety.documents_by_unit {
        let _ = writeln!(
            output,
            "  - {}: {} valid, {} expiring, {} expired",
            unit.unit, unit.valid, unit.expiring, unit.expired
        );
    }
    let _ = writeln!(
        output,
        "- PPP: {} delivered of {} requested",
        safety.ppp_delivered, safety.ppp_requests
    );
    let _ = writeln!(
        output,
        "- Environmental measurements: {:.0} realized of {:.0} planned",
        safety.measurements_realized, safety.measurements_planned
    );
    let _ = writeln!(
        output,
        "- Certificates: {} compliant, {} non-compliant",
        safety.certificates_compliant, safety.certificates_non_compliant
    );
    let _ = writeln!(
        output,
        "- Annualised absence rate: {:.1}%",
        safety.annual_absence_rate_pct
    );
    let _ = writeln!(output, "- Technical consultations: {}", safety.consultations);

    output
}
