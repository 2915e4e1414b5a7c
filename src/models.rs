use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A single normalized spreadsheet cell.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Text(String),
    Number(f64),
    Date(NaiveDateTime),
}

impl Value {
    /// Normalizes a raw text cell: blanks become `Null`, anything else stays
    /// `Text` as written. Numeric readings happen in [`Value::as_number`].
    pub fn from_text(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Value::Null;
        }
        Value::Text(trimmed.to_string())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) if n.is_finite() => Some(*n),
            Value::Text(text) => parse_number(text),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// Grouping key used for distinct counts and value counts. `Null` has none.
    pub fn key(&self) -> Option<String> {
        match self {
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Text(s) => write!(f, "{s}"),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{n}"),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%dT%H:%M:%S")),
        }
    }
}

/// Reads numeric text; a lone `,` is accepted as decimal separator.
pub fn parse_number(text: &str) -> Option<f64> {
    let text = text.trim();
    if let Ok(n) = text.parse::<f64>() {
        return n.is_finite().then_some(n);
    }
    if text.matches(',').count() == 1 && !text.contains('.') {
        if let Ok(n) = text.replace(',', ".").parse::<f64>() {
            return n.is_finite().then_some(n);
        }
    }
    None
}

/// Named, ordered table of rows. Column presence varies per source, so every
/// lookup goes through [`RecordTable::column`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordTable {
    pub name: String,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

/// Handle to a column that is known to exist in a given table.
#[derive(Debug, Clone, Copy)]
pub struct Column<'a> {
    table: &'a RecordTable,
    index: usize,
}

impl<'a> Column<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn values(&self) -> impl Iterator<Item = &'a Value> + 'a {
        let index = self.index;
        self.table.rows.iter().map(move |row| &row[index])
    }

    pub fn numbers(&self) -> impl Iterator<Item = f64> + 'a {
        self.values().filter_map(Value::as_number)
    }

    pub fn sum(&self) -> f64 {
        self.numbers().sum()
    }

    pub fn count_eq(&self, expected: &str) -> usize {
        self.values()
            .filter(|value| value.key().as_deref() == Some(expected))
            .count()
    }

    pub fn distinct(&self) -> usize {
        self.values()
            .filter_map(Value::key)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Occurrences per distinct non-null value, most frequent first, ties by
    /// value so the ordering is stable.
    pub fn value_counts(&self) -> Vec<(String, usize)> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for key in self.values().filter_map(Value::key) {
            *counts.entry(key).or_insert(0) += 1;
        }
        let mut pairs: Vec<(String, usize)> = counts.into_iter().collect();
        pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        pairs
    }
}

impl RecordTable {
    pub const EMPTY: RecordTable = RecordTable {
        name: String::new(),
        columns: Vec::new(),
        rows: Vec::new(),
    };

    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }

    /// Appends a row, padding with `Null` or truncating to the column count.
    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<Column<'_>> {
        self.columns
            .iter()
            .position(|column| column == name)
            .map(|index| Column { table: self, index })
    }

    /// Returns a copy containing only the rows the predicate accepts.
    pub fn filter_rows(&self, keep: impl Fn(&[Value]) -> bool) -> RecordTable {
        RecordTable {
            name: self.name.clone(),
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .filter(|row| keep(row.as_slice()))
                .cloned()
                .collect(),
        }
    }

    /// Rewrites every cell of a column in place; no-op if the column is absent.
    pub fn map_column(&mut self, name: &str, f: impl Fn(&Value) -> Value) {
        let Some(index) = self.columns.iter().position(|column| column == name) else {
            return;
        };
        for row in self.rows.iter_mut() {
            row[index] = f(&row[index]);
        }
    }
}

/// Company filter parameter. `All` disables company filtering.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CompanySelection {
    #[default]
    All,
    Only(BTreeSet<String>),
}

impl CompanySelection {
    /// Builds a selection from user input. No names, `all`, or `Todas`
    /// anywhere in the list means every company.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = names
            .into_iter()
            .map(|name| {
                let name: String = name.into();
                name.trim().to_string()
            })
            .filter(|name| !name.is_empty())
            .collect();
        if set.is_empty()
            || set
                .iter()
                .any(|name| name.eq_ignore_ascii_case("all") || name == "Todas")
        {
            CompanySelection::All
        } else {
            CompanySelection::Only(set)
        }
    }

    pub fn contains(&self, company: &str) -> bool {
        match self {
            CompanySelection::All => true,
            CompanySelection::Only(set) => set.contains(company),
        }
    }

    pub fn label(&self) -> String {
        match self {
            CompanySelection::All => "all companies".to_string(),
            CompanySelection::Only(set) => set.iter().cloned().collect::<Vec<_>>().join(", "),
        }
    }
}

/// KPI names, in presentation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    TotalEmployees,
    TotalAbsenceEvents,
    LostDays,
    MeanAbsenceDuration,
    AbsenceRatePct,
    TotalExams,
    AlteredExams,
    AlteredOccupationalExams,
    AlteredExamRatePct,
    AlteredOccupationalRatePct,
    TotalCertificates,
    ExpiredCertificates,
    PendingCertificates,
    ExpiredCertificateRatePct,
    MentalHealthSharePct,
    MusculoskeletalSharePct,
}

impl Metric {
    pub const KPIS: [Metric; 14] = [
        Metric::TotalEmployees,
        Metric::TotalAbsenceEvents,
        Metric::LostDays,
        Metric::MeanAbsenceDuration,
        Metric::AbsenceRatePct,
        Metric::TotalExams,
        Metric::AlteredExams,
        Metric::AlteredOccupationalExams,
        Metric::AlteredExamRatePct,
        Metric::AlteredOccupationalRatePct,
        Metric::TotalCertificates,
        Metric::ExpiredCertificates,
        Metric::PendingCertificates,
        Metric::ExpiredCertificateRatePct,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Metric::TotalEmployees => "total_employees",
            Metric::TotalAbsenceEvents => "total_absence_events",
            Metric::LostDays => "lost_days",
            Metric::MeanAbsenceDuration => "mean_absence_duration",
            Metric::AbsenceRatePct => "absence_rate_pct",
            Metric::TotalExams => "total_exams",
            Metric::AlteredExams => "altered_exams",
            Metric::AlteredOccupationalExams => "altered_occupational_exams",
            Metric::AlteredExamRatePct => "altered_exam_rate_pct",
            Metric::AlteredOccupationalRatePct => "altered_occupational_rate_pct",
            Metric::TotalCertificates => "total_certificates",
            Metric::ExpiredCertificates => "expired_certificates",
            Metric::PendingCertificates => "pending_certificates",
            Metric::ExpiredCertificateRatePct => "expired_certificate_rate_pct",
            Metric::MentalHealthSharePct => "mental_health_share_pct",
            Metric::MusculoskeletalSharePct => "musculoskeletal_share_pct",
        }
    }

    pub fn is_percentage(&self) -> bool {
        self.name().ends_with("_pct")
    }
}

/// Keyword-category counts over the absence records' diagnosis descriptions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DiagnosisMix {
    pub records: usize,
    pub mental_health: usize,
    pub musculoskeletal: usize,
}

impl DiagnosisMix {
    pub fn mental_health_share_pct(&self) -> f64 {
        ratio_pct(self.mental_health as f64, self.records as f64)
    }

    pub fn musculoskeletal_share_pct(&self) -> f64 {
        ratio_pct(self.musculoskeletal as f64, self.records as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct KpiSet {
    pub total_employees: usize,
    pub total_absence_events: usize,
    pub lost_days: f64,
    pub mean_absence_duration: f64,
    pub absence_rate_pct: f64,
    pub total_exams: usize,
    pub altered_exams: usize,
    pub altered_occupational_exams: usize,
    pub altered_exam_rate_pct: f64,
    pub altered_occupational_rate_pct: f64,
    pub total_certificates: usize,
    pub expired_certificates: usize,
    pub pending_certificates: usize,
    pub expired_certificate_rate_pct: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnosis_mix: Option<DiagnosisMix>,
}

impl KpiSet {
    /// Metric lookup by name. Diagnosis shares read 0 when the mix is absent.
    pub fn value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::TotalEmployees => self.total_employees as f64,
            Metric::TotalAbsenceEvents => self.total_absence_events as f64,
            Metric::LostDays => self.lost_days,
            Metric::MeanAbsenceDuration => self.mean_absence_duration,
            Metric::AbsenceRatePct => self.absence_rate_pct,
            Metric::TotalExams => self.total_exams as f64,
            Metric::AlteredExams => self.altered_exams as f64,
            Metric::AlteredOccupationalExams => self.altered_occupational_exams as f64,
            Metric::AlteredExamRatePct => self.altered_exam_rate_pct,
            Metric::AlteredOccupationalRatePct => self.altered_occupational_rate_pct,
            Metric::TotalCertificates => self.total_certificates as f64,
            Metric::ExpiredCertificates => self.expired_certificates as f64,
            Metric::PendingCertificates => self.pending_certificates as f64,
            Metric::ExpiredCertificateRatePct => self.expired_certificate_rate_pct,
            Metric::MentalHealthSharePct => self
                .diagnosis_mix
                .map(|mix| mix.mental_health_share_pct())
                .unwrap_or(0.0),
            Metric::MusculoskeletalSharePct => self
                .diagnosis_mix
                .map(|mix| mix.musculoskeletal_share_pct())
                .unwrap_or(0.0),
        }
    }

    /// `(name, value)` pairs for the fourteen headline KPIs.
    pub fn entries(&self) -> Vec<(&'static str, f64)> {
        Metric::KPIS
            .iter()
            .map(|metric| (metric.name(), self.value(*metric)))
            .collect()
    }
}

/// Alert severity
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub severity: Severity,
    pub metric: Metric,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Insights {
    pub critical: Vec<Alert>,
    pub warning: Vec<Alert>,
    pub info: Vec<Alert>,
}

impl Insights {
    pub fn push(&mut self, alert: Alert) {
        match alert.severity {
            Severity::Critical => self.critical.push(alert),
            Severity::Warning => self.warning.push(alert),
            Severity::Info => self.info.push(alert),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.critical.is_empty() && self.warning.is_empty() && self.info.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Alert> {
        self.critical
            .iter()
            .chain(self.warning.iter())
            .chain(self.info.iter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Valid,
    Expiring,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DocumentStatusCount {
    pub unit: String,
    pub valid: usize,
    pub expiring: usize,
    pub expired: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SafetyKpis {
    pub visits_planned: f64,
    pub visits_realized: f64,
    pub documents_required: usize,
    pub documents_missing: usize,
    pub documents_compliant: usize,
    pub document_compliance_pct: f64,
    pub documents_by_unit: Vec<DocumentStatusCount>,
    pub ppp_requests: usize,
    pub ppp_delivered: usize,
    pub measurements_planned: f64,
    pub measurements_realized: f64,
    pub certificates_compliant: usize,
    pub certificates_non_compliant: usize,
    pub annual_absence_rate_pct: f64,
    pub consultations: usize,
}

/// `numerator / denominator * 100`, or 0 when the denominator is not positive.
pub fn ratio_pct(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator * 100.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RecordTable {
        let mut table = RecordTable::new("t", vec!["Empresa".into(), "Dias".into()]);
        table.push_row(vec![Value::from_text("Acme"), Value::from_text("5")]);
        table.push_row(vec![Value::from_text("Acme"), Value::from_text("2,5")]);
        table.push_row(vec![Value::from_text("Beta")]);
        table
    }

    #[test]
    fn text_cells_normalize() {
        assert_eq!(Value::from_text("  "), Value::Null);
        assert_eq!(Value::from_text(" Sim "), Value::Text("Sim".into()));
        assert_eq!(Value::from_text("12").as_number(), Some(12.0));
        assert_eq!(Value::from_text("1,5").as_number(), Some(1.5));
        assert_eq!(Value::from_text("1,234.5").as_number(), None);
        assert_eq!(Value::from_text("Sim").as_number(), None);
    }

    #[test]
    fn numeric_looking_text_keeps_its_spelling() {
        let mut table = RecordTable::new("t", vec!["Funcionário".into()]);
        for raw in ["000123", "1e3", "007", "7"] {
            table.push_row(vec![Value::from_text(raw)]);
        }
        let rendered: Vec<String> = table.rows().iter().map(|row| row[0].to_string()).collect();
        assert_eq!(rendered, ["000123", "1e3", "007", "7"]);

        let employees = table.column("Funcionário").unwrap();
        assert_eq!(employees.distinct(), 4);
        assert!((employees.sum() - 1137.0).abs() < 1e-9);
    }

    #[test]
    fn short_rows_are_padded() {
        let table = table();
        assert_eq!(table.rows()[2], vec![Value::Text("Beta".into()), Value::Null]);
    }

    #[test]
    fn column_aggregates_skip_nulls() {
        let table = table();
        let days = table.column("Dias").unwrap();
        assert!((days.sum() - 7.5).abs() < 1e-9);
        assert_eq!(days.numbers().count(), 2);
        let company = table.column("Empresa").unwrap();
        assert_eq!(company.distinct(), 2);
        assert_eq!(company.count_eq("Acme"), 2);
        assert_eq!(
            company.value_counts(),
            vec![("Acme".to_string(), 2), ("Beta".to_string(), 1)]
        );
        assert!(table.column("Missing").is_none());
    }

    #[test]
    fn selection_sentinels_mean_all() {
        assert_eq!(CompanySelection::from_names(Vec::<String>::new()), CompanySelection::All);
        assert_eq!(CompanySelection::from_names(["Todas", "Acme"]), CompanySelection::All);
        assert_eq!(CompanySelection::from_names(["ALL"]), CompanySelection::All);
        let only = CompanySelection::from_names(["Acme"]);
        assert!(only.contains("Acme"));
        assert!(!only.contains("Beta"));
    }

    #[test]
    fn ratio_pct_defaults_to_zero() {
        assert_eq!(ratio_pct(3.0, 0.0), 0.0);
        assert!((ratio_pct(1.0, 4.0) - 25.0).abs() < 1e-9);
    }

    #[test]
    fn integral_numbers_display_without_fraction() {
        assert_eq!(Value::Number(42.0).to_string(), "42");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
    }
}
