use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::PipelineError;

/// Logical table a source feeds. Each kind carries its own date profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Absence,
    AbsenceByDisease,
    AbsenceRate,
    Exams,
    Certificates,
    Epidemiology,
    MedicalVisits,
    Consultations,
    Documents,
    Visits,
    Programs,
    Measurements,
    Ppp,
}

impl SourceKind {
    pub fn name(&self) -> &'static str {
        match self {
            SourceKind::Absence => "absence",
            SourceKind::AbsenceByDisease => "absence_by_disease",
            SourceKind::AbsenceRate => "absence_rate",
            SourceKind::Exams => "exams",
            SourceKind::Certificates => "certificates",
            SourceKind::Epidemiology => "epidemiology",
            SourceKind::MedicalVisits => "medical_visits",
            SourceKind::Consultations => "consultations",
            SourceKind::Documents => "documents",
            SourceKind::Visits => "visits",
            SourceKind::Programs => "programs",
            SourceKind::Measurements => "measurements",
            SourceKind::Ppp => "ppp",
        }
    }

    /// Columns coerced to dates on load (coerce-or-null).
    pub fn date_columns(&self) -> &'static [&'static str] {
        match self {
            SourceKind::Absence | SourceKind::AbsenceByDisease | SourceKind::AbsenceRate => &[
                "Data de Nascimento",
                "Data de Criação",
                "Data da Ficha",
                "Início",
                "Fim",
                "Retorno",
            ],
            SourceKind::Exams => &["Data do Exame"],
            SourceKind::Certificates => {
                &["Dt.Nascimento", "Data Último Exame", "Dt.Demissão", "Validade"]
            }
            SourceKind::Epidemiology => &[
                "Data de Nascimento",
                "Data de Admissão",
                "Data de Demissão",
                "Data Ficha Clínica",
            ],
            SourceKind::MedicalVisits | SourceKind::Consultations => &["DATA"],
            SourceKind::Documents => &["Vencimento PCMSO "],
            SourceKind::Visits | SourceKind::Programs | SourceKind::Measurements => &[],
            SourceKind::Ppp => &[],
        }
    }

    /// Column names for exports that ship without a header row.
    pub fn fixed_columns(&self) -> Option<&'static [&'static str]> {
        match self {
            SourceKind::Ppp => Some(&["ID", "Descrição", "Status"]),
            _ => None,
        }
    }
}

/// Where one logical table is read from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub kind: SourceKind,
    /// Relative paths resolve against the data directory.
    pub path: PathBuf,
    #[serde(default)]
    pub sheet: Option<String>,
    #[serde(default = "default_true")]
    pub header: bool,
}

fn default_true() -> bool {
    true
}

impl SourceSpec {
    pub fn new(kind: SourceKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            sheet: None,
            header: kind.fixed_columns().is_none(),
        }
    }

    pub fn with_sheet(mut self, sheet: impl Into<String>) -> Self {
        self.sheet = Some(sheet.into());
        self
    }

    pub fn resolve(&self, data_dir: &Path) -> PathBuf {
        if self.path.is_absolute() {
            self.path.clone()
        } else {
            data_dir.join(&self.path)
        }
    }
}

/// Column names and literal values the formulas read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Schema {
    pub company_column: String,
    pub employee_column: String,
    pub absence_start_column: String,
    pub days_absent_column: String,
    pub diagnosis_column: String,
    pub diagnosis_code_column: String,
    pub specialty_column: String,
    pub exam_date_column: String,
    pub exam_altered_column: String,
    pub exam_altered_occupational_column: String,
    pub exam_type_column: String,
    pub exam_unit_column: String,
    pub certificate_status_column: String,
    pub certificate_unit_column: String,
    pub yes_value: String,
    pub expired_status: String,
    pub pending_status: String,
    pub safety_company_column: String,
    pub consultation_date_column: String,
    pub visits_planned_column: String,
    pub visits_realized_column: String,
    pub measurements_planned_column: String,
    pub measurements_realized_column: String,
    pub document_columns: Vec<String>,
    pub ppp_status_column: String,
    pub ppp_delivered_values: Vec<String>,
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            company_column: "Empresa".into(),
            employee_column: "Funcionário".into(),
            absence_start_column: "Início".into(),
            days_absent_column: "Dias Afastados".into(),
            diagnosis_column: "Descrição do Cid Principal".into(),
            diagnosis_code_column: "Cid Principal".into(),
            specialty_column: "Especialidade".into(),
            exam_date_column: "Data do Exame".into(),
            exam_altered_column: "Alterados".into(),
            exam_altered_occupational_column: "Alterados Ocupacionais".into(),
            exam_type_column: "Tipo".into(),
            exam_unit_column: "Unidade do Funcionário".into(),
            certificate_status_column: "Status".into(),
            certificate_unit_column: "Unidade".into(),
            yes_value: "Sim".into(),
            expired_status: "Vencido".into(),
            pending_status: "Pendente".into(),
            safety_company_column: "EMPRESA".into(),
            consultation_date_column: "DATA".into(),
            visits_planned_column: "PREVISTA".into(),
            visits_realized_column: "REALIZADA".into(),
            measurements_planned_column: "PREVISTAS".into(),
            measurements_realized_column: "REALIZADAS".into(),
            document_columns: ["PGR", "MAPA DE RISCO", "PPRS", "LTCAT", "L.I", "L.P"]
                .into_iter()
                .map(String::from)
                .collect(),
            ppp_status_column: "Status".into(),
            ppp_delivered_values: vec!["entregue".into(), "concluído".into()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sources: Vec<SourceSpec>,
    pub schema: Schema,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            schema: Schema::default(),
        }
    }
}

fn default_sources() -> Vec<SourceSpec> {
    let safety_workbook = "Dashboard Segurança.xlsx";
    vec![
        SourceSpec::new(SourceKind::Absence, "Absenteísmo 2025.xlsx"),
        SourceSpec::new(SourceKind::AbsenceByDisease, "Absenteísmo por Doença.xlsx"),
        SourceSpec::new(SourceKind::AbsenceRate, "Taxa Absenteismo.xlsx"),
        SourceSpec::new(SourceKind::Exams, "Exames Alterados 2025.xlsx"),
        SourceSpec::new(SourceKind::Certificates, "ASO Válidos.xlsx"),
        SourceSpec::new(SourceKind::Epidemiology, "Perfil Epidemiológico 2025.xlsx"),
        SourceSpec::new(SourceKind::MedicalVisits, "Visitas Médicas 2025.xlsx"),
        SourceSpec::new(SourceKind::Consultations, "Consultas Técnicas.xlsx"),
        SourceSpec::new(SourceKind::Documents, "Controle Documentos.xlsx"),
        SourceSpec::new(SourceKind::Visits, safety_workbook).with_sheet("VISITAS"),
        SourceSpec::new(SourceKind::Programs, safety_workbook).with_sheet("PROGRAMAS"),
        SourceSpec::new(SourceKind::Measurements, safety_workbook).with_sheet("MEDIÇÕES"),
        SourceSpec::new(SourceKind::Ppp, "PPP.xlsx"),
    ]
}

impl Config {
    /// Reads a JSON config, falling back to defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, PipelineError> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                let config: Config = serde_json::from_str(&raw)?;
                info!(path = %path.display(), "loaded configuration");
                config
            }
            None => Config::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let mut seen = BTreeSet::new();
        for source in &self.sources {
            if !seen.insert(source.kind) {
                return Err(PipelineError::Config(format!(
                    "source '{}' is declared more than once",
                    source.kind.name()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_kind_once() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sources.len(), 13);
        let ppp = config
            .sources
            .iter()
            .find(|source| source.kind == SourceKind::Ppp)
            .unwrap();
        assert!(!ppp.header);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let raw = r#"{ "schema": { "days_absent_column": "Dias", "yes_value": "Yes" } }"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(config.schema.days_absent_column, "Dias");
        assert_eq!(config.schema.yes_value, "Yes");
        assert_eq!(config.schema.company_column, "Empresa");
        assert_eq!(config.sources.len(), 13);
    }

    #[test]
    fn duplicate_sources_are_rejected() {
        let config = Config {
            sources: vec![
                SourceSpec::new(SourceKind::Exams, "a.csv"),
                SourceSpec::new(SourceKind::Exams, "b.csv"),
            ],
            schema: Schema::default(),
        };
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn relative_paths_resolve_against_data_dir() {
        let spec = SourceSpec::new(SourceKind::Exams, "exams.csv");
        assert_eq!(spec.resolve(Path::new("/data")), PathBuf::from("/data/exams.csv"));
    }
}
