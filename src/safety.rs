use std::collections::BTreeMap;

use chrono::NaiveDateTime;

use crate::config::{Schema, SourceKind};
use crate::filter::{filter_by_company, filter_by_window};
use crate::loader::DataSnapshot;
use crate::models::{
    ratio_pct, CompanySelection, DocumentStatus, DocumentStatusCount, RecordTable, SafetyKpis,
    Value,
};

/// Working days per employee per year used for the annualised absence rate.
pub const WORKING_DAYS_PER_YEAR: f64 = 252.0;

/// Program document cells hold a validity score: 2+ valid, 1 expiring.
pub fn document_status(score: f64) -> DocumentStatus {
    if score >= 2.0 {
        DocumentStatus::Valid
    } else if score == 1.0 {
        DocumentStatus::Expiring
    } else {
        DocumentStatus::Expired
    }
}

pub fn calculate_safety(
    snapshot: &DataSnapshot,
    schema: &Schema,
    selection: &CompanySelection,
    window_days: i64,
    now: NaiveDateTime,
) -> SafetyKpis {
    let safety_table =
        |kind| filter_by_company(snapshot.table(kind), &schema.safety_company_column, selection);

    let visits = safety_table(SourceKind::Visits);
    let programs = safety_table(SourceKind::Programs);
    let measurements = safety_table(SourceKind::Measurements);
    let certificates = filter_by_company(
        snapshot.table(SourceKind::Certificates),
        &schema.company_column,
        selection,
    );
    let absences = filter_by_window(
        &filter_by_company(snapshot.absence_table(), &schema.company_column, selection),
        &schema.absence_start_column,
        window_days,
        now,
    );
    let consultations = filter_by_window(
        snapshot.table(SourceKind::Consultations),
        &schema.consultation_date_column,
        window_days,
        now,
    );

    let mut kpis = SafetyKpis {
        visits_planned: column_sum(&visits, &schema.visits_planned_column),
        visits_realized: column_sum(&visits, &schema.visits_realized_column),
        measurements_planned: column_sum(&measurements, &schema.measurements_planned_column),
        measurements_realized: column_sum(&measurements, &schema.measurements_realized_column),
        consultations: consultations.len(),
        ..SafetyKpis::default()
    };

    add_document_kpis(&mut kpis, &programs, schema);
    add_ppp_kpis(&mut kpis, snapshot.table(SourceKind::Ppp), schema);
    add_certificate_compliance(&mut kpis, &certificates, schema);

    let lost_days = column_sum(&absences, &schema.days_absent_column);
    kpis.annual_absence_rate_pct =
        ratio_pct(lost_days, certificates.len() as f64 * WORKING_DAYS_PER_YEAR);

    kpis
}

fn column_sum(table: &RecordTable, column: &str) -> f64 {
    table.column(column).map(|c| c.sum()).unwrap_or(0.0)
}

fn add_document_kpis(kpis: &mut SafetyKpis, programs: &RecordTable, schema: &Schema) {
    let unit_index = programs
        .column(&schema.safety_company_column)
        .map(|column| column.index());
    let document_indexes: Vec<usize> = schema
        .document_columns
        .iter()
        .filter_map(|name| programs.column(name))
        .map(|column| column.index())
        .collect();

    let mut by_unit: BTreeMap<String, DocumentStatusCount> = BTreeMap::new();
    for row in programs.rows() {
        let unit = unit_index
            .and_then(|index| row[index].key())
            .unwrap_or_default();
        for &index in &document_indexes {
            let cell = &row[index];
            if cell.is_null() {
                continue;
            }
            kpis.documents_required += 1;
            let score = cell.as_number();
            if score == Some(0.0) {
                kpis.documents_missing += 1;
            }
            let entry = by_unit
                .entry(unit.clone())
                .or_insert_with(|| DocumentStatusCount {
                    unit: unit.clone(),
                    ..DocumentStatusCount::default()
                });
            match document_status(score.unwrap_or(0.0)) {
                DocumentStatus::Valid => entry.valid += 1,
                DocumentStatus::Expiring => entry.expiring += 1,
                DocumentStatus::Expired => entry.expired += 1,
            }
        }
    }

    kpis.documents_compliant = kpis.documents_required - kpis.documents_missing;
    kpis.document_compliance_pct = ratio_pct(
        kpis.documents_compliant as f64,
        kpis.documents_required as f64,
    );
    kpis.documents_by_unit = by_unit.into_values().collect();
}

fn add_ppp_kpis(kpis: &mut SafetyKpis, ppp: &RecordTable, schema: &Schema) {
    kpis.ppp_requests = ppp.len();
    kpis.ppp_delivered = ppp
        .column(&schema.ppp_status_column)
        .map(|status| {
            status
                .values()
                .filter_map(Value::key)
                .filter(|value| {
                    let lowered = value.to_lowercase();
                    schema
                        .ppp_delivered_values
                        .iter()
                        .any(|delivered| delivered.to_lowercase() == lowered)
                })
                .count()
        })
        .unwrap_or(0);
}

fn add_certificate_compliance(kpis: &mut SafetyKpis, certificates: &RecordTable, schema: &Schema) {
    let (expired, pending) = certificates
        .column(&schema.certificate_status_column)
        .map(|status| {
            let contains = |needle: &str| {
                let needle = needle.to_lowercase();
                status
                    .values()
                    .filter_map(Value::key)
                    .filter(|value| value.to_lowercase().contains(&needle))
                    .count()
            };
            (contains(&schema.expired_status), contains(&schema.pending_status))
        })
        .unwrap_or((0, 0));

    kpis.certificates_non_compliant = expired + pending;
    kpis.certificates_compliant = certificates.len().saturating_sub(expired + pending);
}
