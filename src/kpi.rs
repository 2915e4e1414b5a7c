use chrono::NaiveDateTime;
use tracing::debug;

use crate::config::{Schema, SourceKind};
use crate::filter::{filter_by_company, filter_by_window};
use crate::loader::DataSnapshot;
use crate::models::{ratio_pct, CompanySelection, DiagnosisMix, KpiSet, RecordTable, Value};

/// Working days assumed per 30-day month.
pub const WORKING_DAYS_PER_MONTH: f64 = 22.0;

pub const MENTAL_HEALTH_TERMS: [&str; 4] = ["depressivo", "ansiedade", "stress", "psiquiátric"];

pub const MUSCULOSKELETAL_TERMS: [&str; 5] = ["coluna", "lombar", "cervical", "articular", "muscular"];

pub fn working_days_in_window(window_days: i64) -> f64 {
    window_days as f64 * WORKING_DAYS_PER_MONTH / 30.0
}

/// Computes the KPI set for one (selection, window) pair. Pure over its
/// inputs given a fixed `now`.
pub fn calculate_kpis(
    snapshot: &DataSnapshot,
    schema: &Schema,
    selection: &CompanySelection,
    window_days: i64,
    now: NaiveDateTime,
) -> KpiSet {
    let mut kpis = KpiSet::default();

    add_absence_kpis(&mut kpis, snapshot.absence_table(), schema, selection, window_days, now);
    add_exam_kpis(
        &mut kpis,
        snapshot.table(SourceKind::Exams),
        schema,
        selection,
        window_days,
        now,
    );
    add_certificate_kpis(
        &mut kpis,
        snapshot.table(SourceKind::Certificates),
        schema,
        selection,
    );
    kpis.diagnosis_mix = diagnosis_mix(snapshot.absence_table(), &schema.diagnosis_column);

    debug!(
        window_days,
        absence_events = kpis.total_absence_events,
        exams = kpis.total_exams,
        certificates = kpis.total_certificates,
        "computed kpis"
    );
    kpis
}

fn add_absence_kpis(
    kpis: &mut KpiSet,
    absences: &RecordTable,
    schema: &Schema,
    selection: &CompanySelection,
    window_days: i64,
    now: NaiveDateTime,
) {
    if absences.is_empty() {
        return;
    }
    let by_company = filter_by_company(absences, &schema.company_column, selection);
    let in_window = filter_by_window(&by_company, &schema.absence_start_column, window_days, now);

    kpis.total_employees = by_company
        .column(&schema.employee_column)
        .map(|column| column.distinct())
        .unwrap_or(0);
    kpis.total_absence_events = in_window.len();

    if let Some(days) = in_window.column(&schema.days_absent_column) {
        let values: Vec<f64> = days.numbers().collect();
        kpis.lost_days = values.iter().sum();
        kpis.mean_absence_duration = if values.is_empty() {
            0.0
        } else {
            kpis.lost_days / values.len() as f64
        };
    }

    kpis.absence_rate_pct = if kpis.total_employees > 0 {
        let available = kpis.total_employees as f64 * working_days_in_window(window_days);
        kpis.lost_days / available * 100.0
    } else {
        0.0
    };
}

fn add_exam_kpis(
    kpis: &mut KpiSet,
    exams: &RecordTable,
    schema: &Schema,
    selection: &CompanySelection,
    window_days: i64,
    now: NaiveDateTime,
) {
    if exams.is_empty() {
        return;
    }
    let by_company = filter_by_company(exams, &schema.company_column, selection);
    let in_window = filter_by_window(&by_company, &schema.exam_date_column, window_days, now);

    kpis.total_exams = in_window.len();
    kpis.altered_exams = in_window
        .column(&schema.exam_altered_column)
        .map(|column| column.count_eq(&schema.yes_value))
        .unwrap_or(0);
    kpis.altered_occupational_exams = in_window
        .column(&schema.exam_altered_occupational_column)
        .map(|column| column.count_eq(&schema.yes_value))
        .unwrap_or(0);

    let total = kpis.total_exams as f64;
    kpis.altered_exam_rate_pct = ratio_pct(kpis.altered_exams as f64, total);
    kpis.altered_occupational_rate_pct = ratio_pct(kpis.altered_occupational_exams as f64, total);
}

fn add_certificate_kpis(
    kpis: &mut KpiSet,
    certificates: &RecordTable,
    schema: &Schema,
    selection: &CompanySelection,
) {
    if certificates.is_empty() {
        return;
    }
    let by_company = filter_by_company(certificates, &schema.company_column, selection);

    kpis.total_certificates = by_company.len();
    if let Some(status) = by_company.column(&schema.certificate_status_column) {
        kpis.expired_certificates = status.count_eq(&schema.expired_status);
        kpis.pending_certificates = status.count_eq(&schema.pending_status);
    }
    kpis.expired_certificate_rate_pct = ratio_pct(
        kpis.expired_certificates as f64,
        kpis.total_certificates as f64,
    );
}

pub fn is_mental_health(description: &str) -> bool {
    contains_any(description, &MENTAL_HEALTH_TERMS)
}

pub fn is_musculoskeletal(description: &str) -> bool {
    contains_any(description, &MUSCULOSKELETAL_TERMS)
}

fn contains_any(description: &str, terms: &[&str]) -> bool {
    let lowered = description.to_lowercase();
    terms.iter().any(|term| lowered.contains(term))
}

/// Keyword-category counts over every record of the absence table. `None`
/// when the description column is missing or the table is empty.
pub fn diagnosis_mix(absences: &RecordTable, diagnosis_column: &str) -> Option<DiagnosisMix> {
    if absences.is_empty() {
        return None;
    }
    let column = absences.column(diagnosis_column)?;
    let descriptions: Vec<String> = column.values().filter_map(Value::key).collect();

    Some(DiagnosisMix {
        records: absences.len(),
        mental_health: descriptions.iter().filter(|d| is_mental_health(d)).count(),
        musculoskeletal: descriptions.iter().filter(|d| is_musculoskeletal(d)).count(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    pub(crate) fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 7, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    fn days_ago(days: i64) -> Value {
        Value::Date(now() - Duration::days(days))
    }

    /// Ten employees at Acme; three absences inside a 90-day window lasting
    /// 5, 15 and 40 days, plus older and undated rows.
    pub(crate) fn absence_table() -> RecordTable {
        let mut table = RecordTable::new(
            "absence",
            vec![
                "Empresa".into(),
                "Funcionário".into(),
                "Início".into(),
                "Dias Afastados".into(),
                "Descrição do Cid Principal".into(),
            ],
        );
        let recent = [
            (1, 10, 5.0, "Transtorno depressivo recorrente"),
            (2, 20, 15.0, "Dor lombar crônica"),
            (3, 45, 40.0, "Fratura do punho"),
        ];
        for (employee, ago, days, diagnosis) in recent {
            table.push_row(vec![
                text("Acme"),
                Value::Number(employee as f64),
                days_ago(ago),
                Value::Number(days),
                text(diagnosis),
            ]);
        }
        for employee in 4..=10 {
            table.push_row(vec![
                text("Acme"),
                Value::Number(employee as f64),
                days_ago(200),
                Value::Number(2.0),
                text("Gripe"),
            ]);
        }
        table.push_row(vec![
            text("Acme"),
            Value::Number(1.0),
            Value::Null,
            Value::Number(99.0),
            Value::Null,
        ]);
        table
    }

    pub(crate) fn exam_table() -> RecordTable {
        let mut table = RecordTable::new(
            "exams",
            vec![
                "Empresa".into(),
                "Data do Exame".into(),
                "Alterados".into(),
                "Alterados Ocupacionais".into(),
            ],
        );
        let rows = [
            ("Acme", 5, "Sim", "Sim"),
            ("Acme", 6, "Sim", "Não"),
            ("Acme", 7, "Não", "Não"),
            ("Acme", 8, "Não", "Não"),
            ("Beta", 9, "Sim", "Sim"),
            ("Acme", 400, "Sim", "Sim"),
        ];
        for (company, ago, altered, occupational) in rows {
            table.push_row(vec![text(company), days_ago(ago), text(altered), text(occupational)]);
        }
        table
    }

    pub(crate) fn certificate_table() -> RecordTable {
        let mut table = RecordTable::new("certificates", vec!["Empresa".into(), "Status".into()]);
        for status in ["Válido", "Válido", "Vencido", "Pendente", "Vencido"] {
            table.push_row(vec![text("Acme"), text(status)]);
        }
        table
    }

    pub(crate) fn snapshot() -> DataSnapshot {
        DataSnapshot::from_tables([
            (SourceKind::Absence, absence_table()),
            (SourceKind::Exams, exam_table()),
            (SourceKind::Certificates, certificate_table()),
        ])
    }

    #[test]
    fn absence_scenario_matches_expected_values() {
        let kpis = calculate_kpis(&snapshot(), &Schema::default(), &CompanySelection::All, 90, now());

        assert_eq!(kpis.total_employees, 10);
        assert_eq!(kpis.total_absence_events, 3);
        assert!((kpis.lost_days - 60.0).abs() < 1e-9);
        assert!((kpis.mean_absence_duration - 20.0).abs() < 1e-9);
        assert!((working_days_in_window(90) - 66.0).abs() < 1e-9);
        assert!((kpis.absence_rate_pct - 60.0 / 660.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn exam_rates_follow_counts() {
        let schema = Schema::default();
        let kpis = calculate_kpis(&snapshot(), &schema, &CompanySelection::All, 90, now());
        assert_eq!(kpis.total_exams, 5);
        assert_eq!(kpis.altered_exams, 3);
        assert_eq!(kpis.altered_occupational_exams, 2);
        assert!((kpis.altered_exam_rate_pct - 60.0).abs() < 1e-9);
        assert!((kpis.altered_occupational_rate_pct - 40.0).abs() < 1e-9);

        let acme = calculate_kpis(
            &snapshot(),
            &schema,
            &CompanySelection::from_names(["Acme"]),
            90,
            now(),
        );
        assert_eq!(acme.total_exams, 4);
        assert!((acme.altered_exam_rate_pct - 50.0).abs() < 1e-9);
    }

    #[test]
    fn certificates_ignore_the_window() {
        let kpis = calculate_kpis(&snapshot(), &Schema::default(), &CompanySelection::All, 30, now());
        assert_eq!(kpis.total_certificates, 5);
        assert_eq!(kpis.expired_certificates, 2);
        assert_eq!(kpis.pending_certificates, 1);
        assert!((kpis.expired_certificate_rate_pct - 40.0).abs() < 1e-9);
    }

    #[test]
    fn zero_denominators_yield_zero() {
        let empty = DataSnapshot::from_tables(Vec::<(SourceKind, RecordTable)>::new());
        let kpis = calculate_kpis(&empty, &Schema::default(), &CompanySelection::All, 90, now());
        assert_eq!(kpis, KpiSet::default());

        let mut exams = exam_table();
        exams = filter_by_window(&exams, "Data do Exame", 1, now());
        let snapshot = DataSnapshot::from_tables([(SourceKind::Exams, exams)]);
        let kpis = calculate_kpis(&snapshot, &Schema::default(), &CompanySelection::All, 90, now());
        assert_eq!(kpis.total_exams, 0);
        assert_eq!(kpis.altered_exam_rate_pct, 0.0);
    }

    #[test]
    fn missing_columns_default_to_zero() {
        let mut absences = RecordTable::new("absence", vec!["Empresa".into(), "Início".into()]);
        absences.push_row(vec![text("Acme"), days_ago(1)]);
        let snapshot = DataSnapshot::from_tables([(SourceKind::Absence, absences)]);
        let kpis = calculate_kpis(&snapshot, &Schema::default(), &CompanySelection::All, 30, now());

        assert_eq!(kpis.total_employees, 0);
        assert_eq!(kpis.total_absence_events, 1);
        assert_eq!(kpis.lost_days, 0.0);
        assert_eq!(kpis.absence_rate_pct, 0.0);
        assert!(kpis.diagnosis_mix.is_none());
    }

    #[test]
    fn missing_exam_source_leaves_absence_kpis_intact() {
        let full = calculate_kpis(&snapshot(), &Schema::default(), &CompanySelection::All, 90, now());
        let partial_snapshot = DataSnapshot::from_tables([
            (SourceKind::Absence, absence_table()),
            (SourceKind::Exams, RecordTable::empty("exams")),
            (SourceKind::Certificates, certificate_table()),
        ]);
        let partial =
            calculate_kpis(&partial_snapshot, &Schema::default(), &CompanySelection::All, 90, now());

        assert_eq!(partial.total_absence_events, full.total_absence_events);
        assert_eq!(partial.absence_rate_pct, full.absence_rate_pct);
        assert_eq!(partial.total_exams, 0);
        assert_eq!(partial.altered_exams, 0);
        assert_eq!(partial.altered_occupational_rate_pct, 0.0);
    }

    #[test]
    fn keyword_classification() {
        assert!(is_mental_health("Transtorno depressivo recorrente"));
        assert!(is_mental_health("TRANSTORNO PSIQUIÁTRICO"));
        assert!(!is_musculoskeletal("Transtorno depressivo recorrente"));
        assert!(is_musculoskeletal("Dor lombar crônica"));
        assert!(is_mental_health("Stress com dor muscular"));
        assert!(is_musculoskeletal("Stress com dor muscular"));
        assert!(!is_mental_health("Gripe") && !is_musculoskeletal("Gripe"));
    }

    #[test]
    fn diagnosis_mix_counts_whole_table() {
        let mix = diagnosis_mix(&absence_table(), "Descrição do Cid Principal").unwrap();
        assert_eq!(mix.records, 11);
        assert_eq!(mix.mental_health, 1);
        assert_eq!(mix.musculoskeletal, 1);
    }

    #[test]
    fn recomputation_is_idempotent() {
        let snapshot = snapshot();
        let schema = Schema::default();
        let first = calculate_kpis(&snapshot, &schema, &CompanySelection::All, 90, now());
        let second = calculate_kpis(&snapshot, &schema, &CompanySelection::All, 90, now());
        assert_eq!(first, second);
    }
}
