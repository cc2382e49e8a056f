//! azscan: Azure compliance scanner.
//!
//! Lists resources of many Azure service types across subscriptions,
//! evaluates declarative recommendations against each one and emits a
//! uniform finding per resource.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use azscan::{scan, ScanOptions};
//! use azscan::upstream::MemoryArmClient;
//!
//! # async fn run() -> azscan::error::Result<()> {
//! let client = MemoryArmClient::from_fixture(Path::new("tests/fixtures/contoso.json"))?;
//! let report = scan(Arc::new(client), ScanOptions::default()).await?;
//! println!("Resources: {}", report.results.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod filters;
pub mod orchestrator;
pub mod output;
pub mod resource_id;
pub mod rules;
pub mod scanners;
pub mod upstream;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use config::Config;
use error::Result;
use filters::Filters;
use orchestrator::{Orchestrator, OrchestratorSettings, ScanSummary};
use output::{CollectingSink, OutputFormat, RenderOptions};
use rules::ServiceResult;
use upstream::ArmClient;

/// Options for a scan invocation.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub config: Config,
    pub filters: Filters,
    /// Subscriptions to scan; empty scans every visible subscription.
    pub subscriptions: Vec<String>,
    /// Scanner keys; empty falls back to the config, then to every key.
    pub scanners: Vec<String>,
    pub cancel: CancellationToken,
}

/// Complete scan report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summary: ScanSummary,
    pub results: Vec<ServiceResult>,
}

/// Run a complete scan against `client` and collect every result.
pub async fn scan(client: Arc<dyn ArmClient>, options: ScanOptions) -> Result<ScanReport> {
    let ScanOptions {
        config,
        mut filters,
        subscriptions,
        scanners: requested,
        cancel,
    } = options;

    for subscription in &subscriptions {
        filters.include_subscription(subscription);
    }
    let selected = if requested.is_empty() {
        config.scan.scanners.clone()
    } else {
        requested
    };

    let run_id = uuid::Uuid::new_v4().to_string();
    let started_at = Utc::now();
    tracing::debug!(run_id = %run_id, "scan run started");

    let registry = Arc::new(scanners::build_registry());
    let orchestrator = Orchestrator::new(
        registry,
        client,
        OrchestratorSettings::from(&config.scan),
        cancel,
    );
    let mut sink = CollectingSink::default();
    let summary = orchestrator.run(filters, &selected, &mut sink).await?;

    Ok(ScanReport {
        run_id,
        started_at,
        finished_at: Utc::now(),
        summary,
        results: sink.into_results(),
    })
}

/// Render a scan report in the specified format.
pub fn render_report(report: &ScanReport, format: OutputFormat, config: &Config) -> Result<String> {
    let options = RenderOptions {
        mask_subscriptions: config.scan.mask_subscriptions,
        include_compliant: config.output.include_compliant,
    };
    output::render(report, format, &options)
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::path::Path;
    use upstream::MemoryArmClient;

    const PROD: &str = "00000000-0000-0000-0000-000000000001";

    fn fixture() -> Arc<dyn ArmClient> {
        Arc::new(MemoryArmClient::from_fixture(Path::new("tests/fixtures/contoso.json")).unwrap())
    }

    fn find<'a>(report: &'a ScanReport, name: &str) -> &'a ServiceResult {
        report
            .results
            .iter()
            .find(|r| r.service_name == name)
            .unwrap_or_else(|| panic!("no result for {name}"))
    }

    #[tokio::test]
    async fn fixture_scan_covers_every_service() {
        let report = scan(fixture(), ScanOptions::default()).await.unwrap();

        let mut names: Vec<&str> = report.results.iter().map(|r| r.service_name.as_str()).collect();
        names.sort_unstable();
        assert_eq!(
            names,
            vec![
                "app-orders",
                "asp-orders",
                "kv-orders",
                "pep-kv-orders",
                "sql-orders",
                "sqldb-orders",
                "stordersdata",
                "vault-legacy",
            ]
        );
        assert_eq!(report.summary.subscriptions.len(), 1);
        assert_eq!(report.summary.subscriptions[0].subscription_id, PROD);
        assert_eq!(report.summary.subscriptions[0].plugins_skipped, 1);
        assert!(!report.summary.cancelled);
    }

    #[tokio::test]
    async fn enrichment_indexes_reach_the_rules() {
        let report = scan(fixture(), ScanOptions::default()).await.unwrap();

        let vault = find(&report, "kv-orders");
        assert!(!vault.recommendations["kv-001"].not_compliant);
        assert!(!vault.recommendations["kv-007"].not_compliant);

        let legacy = find(&report, "vault-legacy");
        assert!(legacy.recommendations["kv-001"].not_compliant);
        assert!(legacy.recommendations["kv-006"].not_compliant);

        let storage = find(&report, "stordersdata");
        assert_eq!(storage.recommendations["st-003"].result, "99.99%");
        assert!(!storage.recommendations["st-011"].not_compliant);

        let app = find(&report, "app-orders");
        assert!(!app.recommendations["app-011"].not_compliant);
        assert!(app.recommendations["app-004"].not_compliant);
    }

    #[tokio::test]
    async fn scanner_subset_and_filters() {
        let mut filters = Filters::default();
        filters
            .exclude_resource_group(&format!("/subscriptions/{PROD}/resourceGroups/rg-legacy"))
            .exclude_recommendation("kv-006");
        let options = ScanOptions {
            filters,
            scanners: vec!["kv".into()],
            ..ScanOptions::default()
        };
        let report = scan(fixture(), options).await.unwrap();
        assert_eq!(report.results.len(), 1);
        let vault = &report.results[0];
        assert_eq!(vault.service_name, "kv-orders");
        assert!(!vault.recommendations.contains_key("kv-006"));
    }

    #[tokio::test]
    async fn unknown_subscription_yields_empty_report() {
        let options = ScanOptions {
            subscriptions: vec!["ffffffff-0000-0000-0000-000000000000".into()],
            ..ScanOptions::default()
        };
        let report = scan(fixture(), options).await.unwrap();
        assert!(report.results.is_empty());
        assert!(report.summary.subscriptions.is_empty());
    }

    #[tokio::test]
    async fn rendered_report_masks_subscriptions() {
        let report = scan(fixture(), ScanOptions::default()).await.unwrap();
        let json = render_report(&report, OutputFormat::Json, &Config::default()).unwrap();
        assert!(!json.contains(PROD));
        let sarif = render_report(&report, OutputFormat::Sarif, &Config::default()).unwrap();
        assert!(sarif.contains("\"ruleId\": \"kv-001\""));
    }
}
