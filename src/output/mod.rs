pub mod console;
pub mod json;
pub mod sarif;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::resource_id;
use crate::rules::ServiceResult;
use crate::ScanReport;

/// Receives results as the orchestrator produces them.
pub trait ResultSink: Send {
    fn accept(&mut self, result: ServiceResult) -> Result<()>;
}

/// Keeps every result in arrival order.
#[derive(Debug, Default)]
pub struct CollectingSink {
    results: Vec<ServiceResult>,
}

impl CollectingSink {
    pub fn results(&self) -> &[ServiceResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<ServiceResult> {
        self.results
    }
}

impl ResultSink for CollectingSink {
    fn accept(&mut self, result: ServiceResult) -> Result<()> {
        self.results.push(result);
        Ok(())
    }
}

/// Output format selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Console,
    Json,
    Sarif,
}

impl OutputFormat {
    pub fn from_str_lenient(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "console" | "text" => Some(Self::Console),
            "json" => Some(Self::Json),
            "sarif" => Some(Self::Sarif),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    pub mask_subscriptions: bool,
    /// Console only: list compliant recommendations too.
    pub include_compliant: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            mask_subscriptions: true,
            include_compliant: false,
        }
    }
}

/// Render a scan report in the specified format.
pub fn render(report: &ScanReport, format: OutputFormat, options: &RenderOptions) -> Result<String> {
    let report = if options.mask_subscriptions {
        masked(report)
    } else {
        report.clone()
    };
    match format {
        OutputFormat::Console => Ok(console::render(&report, options.include_compliant)),
        OutputFormat::Json => json::render(&report),
        OutputFormat::Sarif => sarif::render(&report),
    }
}

fn masked(report: &ScanReport) -> ScanReport {
    let mut report = report.clone();
    for result in &mut report.results {
        result.subscription_id = resource_id::mask_subscription(&result.subscription_id);
    }
    for subscription in &mut report.summary.subscriptions {
        subscription.subscription_id = resource_id::mask_subscription(&subscription.subscription_id);
    }
    report
}
