//! Rule table turning a KPI set into severity-bucketed alerts.
//!
//! Each metric owns an ordered list of tiers; the first tier whose condition
//! holds produces the metric's alert and the remaining tiers are skipped.
//! Metrics are evaluated independently, in table order.

use crate::models::{Alert, Insights, KpiSet, Metric, Severity};

pub const ABSENCE_RATE_CRITICAL: f64 = 5.0;
pub const ABSENCE_RATE_WARNING: f64 = 3.0;
pub const MEAN_DURATION_CRITICAL: f64 = 20.0;
pub const MEAN_DURATION_WARNING: f64 = 10.0;
pub const OCCUPATIONAL_RATE_CRITICAL: f64 = 10.0;
pub const OCCUPATIONAL_RATE_WARNING: f64 = 5.0;
pub const EXPIRED_CERTIFICATE_CRITICAL: f64 = 20.0;
pub const EXPIRED_CERTIFICATE_WARNING: f64 = 10.0;
/// Share of absence records above which a diagnosis category is flagged.
pub const MENTAL_HEALTH_SHARE_WARNING: f64 = 30.0;
pub const MUSCULOSKELETAL_SHARE_WARNING: f64 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Condition {
    AtLeast(f64),
    Exceeds(f64),
    Always,
}

impl Condition {
    pub fn check(&self, value: f64) -> bool {
        match self {
            Condition::AtLeast(threshold) => value >= *threshold,
            Condition::Exceeds(threshold) => value > *threshold,
            Condition::Always => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Tier {
    pub condition: Condition,
    pub severity: Severity,
    /// `{value}` renders the metric with one decimal, `{count}` the raw count.
    pub template: &'static str,
}

impl Tier {
    fn new(condition: Condition, severity: Severity, template: &'static str) -> Self {
        Self {
            condition,
            severity,
            template,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricRule {
    pub metric: Metric,
    pub tiers: Vec<Tier>,
}

impl MetricRule {
    /// First matching tier, or `None` when the metric stays silent.
    pub fn evaluate(&self, kpis: &KpiSet) -> Option<Alert> {
        if needs_diagnosis_mix(self.metric) && kpis.diagnosis_mix.is_none() {
            return None;
        }
        let value = kpis.value(self.metric);
        let tier = self.tiers.iter().find(|tier| tier.condition.check(value))?;
        Some(Alert {
            severity: tier.severity,
            metric: self.metric,
            message: render(tier.template, value, count_for(self.metric, kpis)),
        })
    }
}

#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<MetricRule>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::standard()
    }
}

impl RuleSet {
    pub fn new(rules: Vec<MetricRule>) -> Self {
        Self { rules }
    }

    pub fn standard() -> Self {
        use Condition::{AtLeast, Always, Exceeds};
        use Severity::{Critical, Info, Warning};

        Self::new(vec![
            MetricRule {
                metric: Metric::AbsenceRatePct,
                tiers: vec![
                    Tier::new(
                        AtLeast(ABSENCE_RATE_CRITICAL),
                        Critical,
                        "Critical absenteeism rate: {value}% (target: below 3%)",
                    ),
                    Tier::new(
                        AtLeast(ABSENCE_RATE_WARNING),
                        Warning,
                        "High absenteeism rate: {value}% (target: below 3%)",
                    ),
                    Tier::new(Always, Info, "Absenteeism rate controlled: {value}%"),
                ],
            },
            MetricRule {
                metric: Metric::MeanAbsenceDuration,
                tiers: vec![
                    Tier::new(
                        AtLeast(MEAN_DURATION_CRITICAL),
                        Critical,
                        "Critical mean absence duration: {value} days",
                    ),
                    Tier::new(
                        AtLeast(MEAN_DURATION_WARNING),
                        Warning,
                        "High mean absence duration: {value} days",
                    ),
                ],
            },
            MetricRule {
                metric: Metric::AlteredOccupationalRatePct,
                tiers: vec![
                    Tier::new(
                        AtLeast(OCCUPATIONAL_RATE_CRITICAL),
                        Critical,
                        "Critical rate of altered occupational exams: {value}% ({count} exams)",
                    ),
                    Tier::new(
                        AtLeast(OCCUPATIONAL_RATE_WARNING),
                        Warning,
                        "Altered occupational exams: {value}% ({count} exams)",
                    ),
                ],
            },
            MetricRule {
                metric: Metric::ExpiredCertificateRatePct,
                tiers: vec![
                    Tier::new(
                        AtLeast(EXPIRED_CERTIFICATE_CRITICAL),
                        Critical,
                        "Critical rate of expired health certificates: {value}% ({count} expired)",
                    ),
                    Tier::new(
                        AtLeast(EXPIRED_CERTIFICATE_WARNING),
                        Warning,
                        "Expired health certificates: {value}% ({count} expired)",
                    ),
                ],
            },
            MetricRule {
                metric: Metric::MentalHealthSharePct,
                tiers: vec![Tier::new(
                    Exceeds(MENTAL_HEALTH_SHARE_WARNING),
                    Warning,
                    "High share of mental-health absences: {count} cases ({value}%)",
                )],
            },
            MetricRule {
                metric: Metric::MusculoskeletalSharePct,
                tiers: vec![Tier::new(
                    Exceeds(MUSCULOSKELETAL_SHARE_WARNING),
                    Warning,
                    "High share of musculoskeletal absences: {count} cases ({value}%)",
                )],
            },
        ])
    }

    pub fn classify(&self, kpis: &KpiSet) -> Insights {
        let mut insights = Insights::default();
        for alert in self.rules.iter().filter_map(|rule| rule.evaluate(kpis)) {
            insights.push(alert);
        }
        insights
    }
}

/// Classifies with the standard thresholds.
pub fn generate_insights(kpis: &KpiSet) -> Insights {
    RuleSet::standard().classify(kpis)
}

fn needs_diagnosis_mix(metric: Metric) -> bool {
    matches!(
        metric,
        Metric::MentalHealthSharePct | Metric::MusculoskeletalSharePct
    )
}

fn count_for(metric: Metric, kpis: &KpiSet) -> Option<usize> {
    match metric {
        Metric::AlteredOccupationalRatePct => Some(kpis.altered_occupational_exams),
        Metric::ExpiredCertificateRatePct => Some(kpis.expired_certificates),
        Metric::AbsenceRatePct | Metric::MeanAbsenceDuration => Some(kpis.total_absence_events),
        Metric::MentalHealthSharePct => kpis.diagnosis_mix.map(|mix| mix.mental_health),
        Metric::MusculoskeletalSharePct => kpis.diagnosis_mix.map(|mix| mix.musculoskeletal),
        _ => None,
    }
}

fn render(template: &str, value: f64, count: Option<usize>) -> String {
    let message = template.replace("{value}", &format!("{value:.1}"));
    match count {
        Some(count) => message.replace("{count}", &count.to_string()),
        None => message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Schema;
    use crate::kpi::calculate_kpis;
    use crate::kpi::tests::{now, snapshot};
    use crate::models::{CompanySelection, DiagnosisMix};

    fn with_absence_rate(rate: f64) -> KpiSet {
        KpiSet {
            absence_rate_pct: rate,
            ..KpiSet::default()
        }
    }

    fn severities(insights: &Insights, metric: Metric) -> Vec<Severity> {
        insights
            .iter()
            .filter(|alert| alert.metric == metric)
            .map(|alert| alert.severity)
            .collect()
    }

    #[test]
    fn absence_rate_buckets() {
        let cases = [
            (5.0, Severity::Critical),
            (4.9, Severity::Warning),
            (3.0, Severity::Warning),
            (2.9, Severity::Info),
            (0.0, Severity::Info),
        ];
        for (rate, expected) in cases {
            let insights = generate_insights(&with_absence_rate(rate));
            assert_eq!(severities(&insights, Metric::AbsenceRatePct), vec![expected], "rate {rate}");
        }
        let info = generate_insights(&with_absence_rate(2.9));
        assert!(info.info[0].message.contains("controlled"));
        assert!(info.info[0].message.contains("2.9"));
    }

    #[test]
    fn silent_metrics_produce_no_info() {
        let kpis = KpiSet {
            mean_absence_duration: 9.9,
            altered_occupational_rate_pct: 4.9,
            expired_certificate_rate_pct: 9.9,
            ..KpiSet::default()
        };
        let insights = generate_insights(&kpis);
        assert!(insights.critical.is_empty());
        assert!(insights.warning.is_empty());
        assert_eq!(insights.info.len(), 1);
        assert_eq!(insights.info[0].metric, Metric::AbsenceRatePct);
    }

    #[test]
    fn thresholds_are_inclusive() {
        let kpis = KpiSet {
            mean_absence_duration: 10.0,
            altered_occupational_rate_pct: 10.0,
            altered_occupational_exams: 4,
            expired_certificate_rate_pct: 20.0,
            expired_certificates: 7,
            ..KpiSet::default()
        };
        let insights = generate_insights(&kpis);
        assert_eq!(severities(&insights, Metric::MeanAbsenceDuration), vec![Severity::Warning]);
        assert_eq!(
            severities(&insights, Metric::AlteredOccupationalRatePct),
            vec![Severity::Critical]
        );
        assert_eq!(
            severities(&insights, Metric::ExpiredCertificateRatePct),
            vec![Severity::Critical]
        );
        let certificate = insights
            .critical
            .iter()
            .find(|alert| alert.metric == Metric::ExpiredCertificateRatePct)
            .unwrap();
        assert!(certificate.message.contains("20.0%"));
        assert!(certificate.message.contains("7 expired"));
    }

    #[test]
    fn warning_tiers_start_at_their_threshold() {
        let kpis = KpiSet {
            altered_occupational_rate_pct: 5.0,
            altered_occupational_exams: 2,
            expired_certificate_rate_pct: 10.0,
            expired_certificates: 3,
            ..KpiSet::default()
        };
        let insights = generate_insights(&kpis);
        assert_eq!(
            severities(&insights, Metric::AlteredOccupationalRatePct),
            vec![Severity::Warning]
        );
        assert_eq!(
            severities(&insights, Metric::ExpiredCertificateRatePct),
            vec![Severity::Warning]
        );
        assert!(insights.warning.iter().any(|alert| alert.message.contains("5.0% (2 exams)")));
        assert!(insights.warning.iter().any(|alert| alert.message.contains("10.0% (3 expired)")));
    }

    #[test]
    fn diagnosis_shares_must_exceed_threshold() {
        let at_limit = KpiSet {
            diagnosis_mix: Some(DiagnosisMix {
                records: 10,
                mental_health: 3,
                musculoskeletal: 4,
            }),
            ..KpiSet::default()
        };
        assert!(generate_insights(&at_limit).warning.is_empty());

        let above = KpiSet {
            diagnosis_mix: Some(DiagnosisMix {
                records: 10,
                mental_health: 4,
                musculoskeletal: 5,
            }),
            ..KpiSet::default()
        };
        let insights = generate_insights(&above);
        assert_eq!(insights.warning.len(), 2);
        assert!(insights.warning[0].message.contains("4 cases (40.0%)"));
        assert!(insights.warning[1].message.contains("5 cases (50.0%)"));
    }

    #[test]
    fn missing_diagnosis_column_skips_keyword_rules() {
        let insights = generate_insights(&KpiSet::default());
        assert!(insights
            .iter()
            .all(|alert| !needs_diagnosis_mix(alert.metric)));
    }

    #[test]
    fn end_to_end_scenario_is_critical_twice() {
        let kpis = calculate_kpis(&snapshot(), &Schema::default(), &CompanySelection::All, 90, now());
        let insights = generate_insights(&kpis);

        assert_eq!(severities(&insights, Metric::AbsenceRatePct), vec![Severity::Critical]);
        assert_eq!(
            severities(&insights, Metric::MeanAbsenceDuration),
            vec![Severity::Critical]
        );
        assert!(insights.critical[0].message.contains("9.1%"));
        assert!(insights.critical[1].message.contains("20.0 days"));
    }

    #[test]
    fn classification_is_deterministic() {
        let kpis = calculate_kpis(&snapshot(), &Schema::default(), &CompanySelection::All, 90, now());
        assert_eq!(generate_insights(&kpis), generate_insights(&kpis));
    }
}
