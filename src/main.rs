use std::path::PathBuf;

use anyhow::Context;
use chrono::{Local, NaiveDateTime};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod error;
mod export;
mod filter;
mod insights;
mod kpi;
mod loader;
mod models;
mod report;
mod safety;

use config::Config;
use loader::{DataSnapshot, LoadEvent};
use models::{Alert, CompanySelection, Insights};

#[derive(Parser)]
#[command(name = "ohs-insights")]
#[command(about = "Occupational health and safety KPIs from spreadsheet exports", long_about = None)]
struct Cli {
    /// Directory holding the spreadsheet exports
    #[arg(long, global = true, env = "OHS_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,
    /// JSON file overriding sources and column names
    #[arg(long, global = true, env = "OHS_CONFIG")]
    config: Option<PathBuf>,
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct Scope {
    /// Restrict to these companies (repeatable); omit for all
    #[arg(long = "company")]
    companies: Vec<String>,
    /// Analysis window in days
    #[arg(
        long,
        default_value_t = filter::DEFAULT_WINDOW_DAYS,
        value_parser = parse_window
    )]
    days: i64,
}

impl Scope {
    fn selection(&self) -> CompanySelection {
        CompanySelection::from_names(self.companies.iter().cloned())
    }
}

fn parse_window(raw: &str) -> Result<i64, String> {
    let days: i64 = raw.parse().map_err(|_| format!("'{raw}' is not a number"))?;
    if filter::WINDOW_OPTIONS.contains(&days) {
        Ok(days)
    } else {
        Err(format!("window must be one of {:?}", filter::WINDOW_OPTIONS))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show every configured source and whether it loaded
    Sources,
    /// Print the health KPI set
    Kpis {
        #[command(flatten)]
        scope: Scope,
        #[arg(long)]
        json: bool,
    },
    /// Print critical, warning and info alerts
    Insights {
        #[command(flatten)]
        scope: Scope,
        #[arg(long)]
        json: bool,
    },
    /// Print workplace safety and compliance KPIs
    Safety {
        #[command(flatten)]
        scope: Scope,
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        scope: Scope,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Export the filtered tables as CSV
    Export {
        #[command(flatten)]
        scope: Scope,
        #[arg(long)]
        out: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn print_alerts(title: &str, alerts: &[Alert]) {
    if alerts.is_empty() {
        return;
    }
    println!("{title}:");
    for alert in alerts {
        println!("- {}", alert.message);
    }
}

fn print_insights(insights: &Insights) {
    if insights.is_empty() {
        println!("No alerts for this selection.");
        return;
    }
    println!("{} alerts", insights.iter().count());
    print_alerts("Critical", &insights.critical);
    print_alerts("Warning", &insights.warning);
    print_alerts("Info", &insights.info);
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    let snapshot = DataSnapshot::load(&config, &cli.data_dir);
    let schema = &config.schema;
    let now: NaiveDateTime = Local::now().naive_local();

    if let Commands::Sources = cli.command {
        println!(
            "Snapshot {} loaded at {} from {}",
            snapshot.epoch,
            snapshot.loaded_at.format("%Y-%m-%d %H:%M:%S"),
            snapshot.data_dir.display()
        );
        for event in snapshot.events() {
            match event {
                LoadEvent::Loaded { source, rows } => {
                    println!("- {}: {rows} rows", source.name());
                }
                LoadEvent::Unavailable { source, reason } => {
                    println!("- {}: unavailable ({reason})", source.name());
                }
            }
        }
        let companies = snapshot.companies(&[
            schema.company_column.as_str(),
            schema.safety_company_column.as_str(),
        ]);
        if !companies.is_empty() {
            println!("Companies: {}", companies.join(", "));
        }
        return Ok(());
    }

    snapshot.ensure_any_data().with_context(|| {
        format!(
            "place the spreadsheet exports in {} or pass --data-dir",
            cli.data_dir.display()
        )
    })?;

    match cli.command {
        Commands::Sources => {}
        Commands::Kpis { scope, json } => {
            let kpis = kpi::calculate_kpis(&snapshot, schema, &scope.selection(), scope.days, now);
            if json {
                println!("{}", serde_json::to_string_pretty(&kpis)?);
            } else {
                println!(
                    "KPIs for {} (last {} days):",
                    scope.selection().label(),
                    scope.days
                );
                for (name, value) in kpis.entries() {
                    println!("- {name}: {value:.2}");
                }
            }
        }
        Commands::Insights { scope, json } => {
            let kpis = kpi::calculate_kpis(&snapshot, schema, &scope.selection(), scope.days, now);
            let insights = insights::generate_insights(&kpis);
            if json {
                println!("{}", serde_json::to_string_pretty(&insights)?);
            } else {
                print_insights(&insights);
            }
        }
        Commands::Safety { scope, json } => {
            let safety =
                safety::calculate_safety(&snapshot, schema, &scope.selection(), scope.days, now);
            if json {
                println!("{}", serde_json::to_string_pretty(&safety)?);
            } else {
                println!(
                    "Visits: {:.0}/{:.0} | Documents compliant: {}/{} ({:.1}%) | PPP delivered: {}/{}",
                    safety.visits_realized,
                    safety.visits_planned,
                    safety.documents_compliant,
                    safety.documents_required,
                    safety.document_compliance_pct,
                    safety.ppp_delivered,
                    safety.ppp_requests
                );
                println!(
                    "Measurements: {:.0}/{:.0} | Certificates compliant: {} (non-compliant {}) | Annual absence rate: {:.1}% | Consultations: {}",
                    safety.measurements_realized,
                    safety.measurements_planned,
                    safety.certificates_compliant,
                    safety.certificates_non_compliant,
                    safety.annual_absence_rate_pct,
                    safety.consultations
                );
            }
        }
        Commands::Report { scope, out } => {
            let selection = scope.selection();
            let kpis = kpi::calculate_kpis(&snapshot, schema, &selection, scope.days, now);
            let insights = insights::generate_insights(&kpis);
            let summaries = report::summarize(&snapshot, schema, &selection, scope.days, now);
            let safety = safety::calculate_safety(&snapshot, schema, &selection, scope.days, now);
            let report = report::build_report(
                &selection,
                scope.days,
                now,
                &kpis,
                &insights,
                &summaries,
                &safety,
            );
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Export { scope, out } => {
            let written =
                export::export_tables(&snapshot, schema, &scope.selection(), scope.days, now, &out)
                    .with_context(|| format!("failed to export into {}", out.display()))?;
            println!("Exported {} tables to {}.", written.len(), out.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn window_must_be_an_offered_option() {
        assert_eq!(parse_window("180"), Ok(180));
        assert!(parse_window("45").is_err());
        assert!(parse_window("ninety").is_err());
    }

    #[test]
    fn repeated_company_flags_build_a_selection() {
        let cli = Cli::try_parse_from([
            "ohs-insights",
            "kpis",
            "--company",
            "Acme",
            "--company",
            "Beta",
            "--days",
            "30",
        ])
        .unwrap();
        let Commands::Kpis { scope, json } = cli.command else {
            panic!("expected kpis command");
        };
        assert!(!json);
        assert_eq!(scope.days, 30);
        assert_eq!(scope.selection(), CompanySelection::from_names(["Acme", "Beta"]));
    }
}
