//! Drives the selected scanners across subscriptions.
//!
//! Subscriptions run concurrently up to `workers`. Inside one subscription
//! the shared indexes are built first, every plugin is initialised, and only
//! then do plugin scans start, at most `plugin_workers` at a time. Results
//! flow to the sink through a bounded channel as each plugin finishes.

pub mod subscriptions;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::ScanSettings;
use crate::context::{ScanContext, ScannerConfig};
use crate::error::{Result, ScanError};
use crate::filters::Filters;
use crate::output::ResultSink;
use crate::rules::ServiceResult;
use crate::scanners::{ScannerRegistry, ServiceScanner};
use crate::upstream::{acquire, ArmClient};

pub use subscriptions::{list_subscriptions, Subscription};

const RESULT_BUFFER: usize = 256;

type Plugin = (String, Arc<dyn ServiceScanner>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub workers: usize,
    pub plugin_workers: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&ScanSettings::default())
    }
}

impl From<&ScanSettings> for OrchestratorSettings {
    fn from(settings: &ScanSettings) -> Self {
        Self {
            workers: settings.workers.max(1),
            plugin_workers: settings.plugin_workers.max(1),
        }
    }
}

/// Outcome of one subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSummary {
    pub subscription_id: String,
    pub subscription_name: String,
    pub plugins_run: usize,
    pub plugins_skipped: usize,
    pub plugins_failed: usize,
    pub results: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubscriptionSummary {
    fn new(subscription: &Subscription) -> Self {
        Self {
            subscription_id: subscription.subscription_id.clone(),
            subscription_name: subscription.display_name.clone(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub subscriptions: Vec<SubscriptionSummary>,
    pub cancelled: bool,
}

impl ScanSummary {
    pub fn total_results(&self) -> usize {
        self.subscriptions.iter().map(|s| s.results).sum()
    }

    pub fn failed_subscriptions(&self) -> usize {
        self.subscriptions.iter().filter(|s| s.error.is_some()).count()
    }

    pub fn skipped_plugins(&self) -> usize {
        self.subscriptions.iter().map(|s| s.plugins_skipped).sum()
    }
}

pub struct Orchestrator {
    registry: Arc<ScannerRegistry>,
    client: Arc<dyn ArmClient>,
    settings: OrchestratorSettings,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ScannerRegistry>,
        client: Arc<dyn ArmClient>,
        settings: OrchestratorSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            client,
            settings,
            cancel,
        }
    }

    /// Scan every target subscription with the `selected` scanner keys (all
    /// keys when empty) and forward surviving results to `sink`.
    ///
    /// A failing subscription is recorded in the summary and does not stop
    /// the others. Cancellation stops new work; results already produced
    /// are still forwarded and the summary is marked cancelled.
    pub async fn run(
        &self,
        mut filters: Filters,
        selected: &[String],
        sink: &mut dyn ResultSink,
    ) -> Result<ScanSummary> {
        self.registry.validate()?;
        let plugins = self.registry.resolve(selected)?;
        if !selected.is_empty() {
            filters.restrict_resource_types(
                plugins
                    .iter()
                    .flat_map(|(_, p)| p.resource_types().iter().copied()),
            );
        }
        let filters = Arc::new(filters);
        let plugins: Arc<[Plugin]> = plugins.into();

        let targets =
            list_subscriptions(Arc::clone(&self.client), &filters, &self.cancel).await?;
        tracing::info!(
            subscriptions = targets.len(),
            scanners = plugins.len(),
            workers = self.settings.workers,
            "starting scan"
        );

        let (tx, mut rx) = mpsc::channel::<ServiceResult>(RESULT_BUFFER);
        let workers = Arc::new(Semaphore::new(self.settings.workers));
        let mut tasks = JoinSet::new();
        for subscription in targets {
            let job = SubscriptionJob {
                summary: SubscriptionSummary::new(&subscription),
                config: ScannerConfig::new(
                    Arc::clone(&self.client),
                    self.cancel.clone(),
                    subscription.subscription_id,
                    subscription.display_name,
                ),
                filters: Arc::clone(&filters),
                plugins: Arc::clone(&plugins),
                plugin_workers: self.settings.plugin_workers,
                results: tx.clone(),
            };
            let workers = Arc::clone(&workers);
            let cancel = self.cancel.clone();
            tasks.spawn(async move {
                match acquire(workers, &cancel).await {
                    Some(_permit) => job.run().await,
                    None => job.cancelled(),
                }
            });
        }
        drop(tx);

        while let Some(result) = rx.recv().await {
            sink.accept(result)?;
        }

        let mut summary = ScanSummary::default();
        while let Some(joined) = tasks.join_next().await {
            let subscription = joined
                .map_err(|e| ScanError::Internal(format!("subscription task failed: {e}")))?;
            summary.subscriptions.push(subscription);
        }
        summary
            .subscriptions
            .sort_by(|a, b| a.subscription_id.cmp(&b.subscription_id));
        summary.cancelled = self.cancel.is_cancelled();

        tracing::info!(
            results = summary.total_results(),
            failed_subscriptions = summary.failed_subscriptions(),
            skipped_plugins = summary.skipped_plugins(),
            cancelled = summary.cancelled,
            "scan finished"
        );
        Ok(summary)
    }
}

/// Post-filter one result. `None` when the resource is filtered out.
pub fn apply_filters(filters: &Filters, mut result: ServiceResult) -> Option<ServiceResult> {
    if !filters.is_resource_type_included(&result.resource_type) {
        return None;
    }
    if filters.is_resource_group_excluded(&result.resource_group_id())
        || filters.is_service_excluded(&result.resource_id())
    {
        return None;
    }
    result
        .recommendations
        .retain(|id, _| !filters.is_recommendation_excluded(id));
    Some(result)
}

struct SubscriptionJob {
    summary: SubscriptionSummary,
    config: ScannerConfig,
    filters: Arc<Filters>,
    plugins: Arc<[Plugin]>,
    plugin_workers: usize,
    results: mpsc::Sender<ServiceResult>,
}

impl SubscriptionJob {
    async fn run(mut self) -> SubscriptionSummary {
        let scope = self.config.masked_scope();
        tracing::info!(subscription = %scope, "scanning subscription");
        match self.scan().await {
            Ok(()) => {}
            Err(ScanError::Cancelled) => {
                tracing::info!(subscription = %scope, "subscription scan cancelled");
                self.summary.error = Some(ScanError::Cancelled.to_string());
            }
            Err(e) => {
                tracing::error!(
                    subscription = %scope,
                    error = %e,
                    "subscription scan failed, moving on"
                );
                self.summary.error = Some(e.to_string());
            }
        }
        self.summary
    }

    fn cancelled(mut self) -> SubscriptionSummary {
        self.summary.error = Some(ScanError::Cancelled.to_string());
        self.summary
    }

    async fn scan(&mut self) -> Result<()> {
        let ctx = Arc::new(ScanContext::build(&self.config, Arc::clone(&self.filters)).await?);

        let mut sessions = Vec::with_capacity(self.plugins.len());
        for (key, plugin) in self.plugins.iter() {
            sessions.push((key.clone(), plugin.name(), plugin.init(&self.config)?));
        }

        let limit = Arc::new(Semaphore::new(self.plugin_workers));
        let mut scans = JoinSet::new();
        for (key, name, session) in sessions {
            let ctx = Arc::clone(&ctx);
            let limit = Arc::clone(&limit);
            let cancel = self.config.cancel.clone();
            scans.spawn(async move {
                let outcome = match acquire(limit, &cancel).await {
                    Some(_permit) => session.scan(&ctx).await,
                    None => Err(ScanError::Cancelled),
                };
                (key, name, outcome)
            });
        }

        while let Some(joined) = scans.join_next().await {
            let (key, name, outcome) = joined
                .map_err(|e| ScanError::Internal(format!("scanner task failed: {e}")))?;
            match outcome {
                Ok(results) => {
                    self.summary.plugins_run += 1;
                    self.forward(results).await?;
                }
                Err(e) if e.should_skip() => {
                    self.summary.plugins_skipped += 1;
                    tracing::warn!(
                        subscription = %self.config.masked_scope(),
                        scanner = %key,
                        service = name,
                        error = %e,
                        "skipping scanner"
                    );
                }
                Err(e) => {
                    if !e.is_cancelled() {
                        self.summary.plugins_failed += 1;
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    async fn forward(&mut self, results: Vec<ServiceResult>) -> Result<()> {
        for result in results {
            let Some(result) = apply_filters(&self.filters, result) else {
                continue;
            };
            self.results
                .send(result)
                .await
                .map_err(|_| ScanError::Internal("result sink closed".into()))?;
            self.summary.results += 1;
        }
        tracing::debug!(
            subscription = %self.config.masked_scope(),
            forwarded = self.summary.results,
            "results forwarded"
        );
        Ok(())
    }
}
