pub mod diagnostics;
pub mod endpoints;
pub mod public_ips;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ScanError};
use crate::filters::Filters;
use crate::resource_id;
use crate::upstream::ArmClient;

/// Per-subscription bootstrap handed to every scanner's `init`.
#[derive(Clone)]
pub struct ScannerConfig {
    pub cancel: CancellationToken,
    pub client: Arc<dyn ArmClient>,
    pub subscription_id: String,
    pub subscription_name: String,
}

impl ScannerConfig {
    pub fn new(
        client: Arc<dyn ArmClient>,
        cancel: CancellationToken,
        subscription_id: impl Into<String>,
        subscription_name: impl Into<String>,
    ) -> Self {
        Self {
            cancel,
            client,
            subscription_id: subscription_id.into(),
            subscription_name: subscription_name.into(),
        }
    }

    /// `subscriptions/...abcdef0`, for log lines.
    pub fn masked_scope(&self) -> String {
        format!(
            "subscriptions/{}",
            resource_id::mask_subscription(&self.subscription_id)
        )
    }

    /// `/subscriptions/{id}/providers/{resource_type}`
    pub fn provider_path(&self, resource_type: &str) -> String {
        format!(
            "/subscriptions/{}/providers/{resource_type}",
            self.subscription_id
        )
    }
}

impl std::fmt::Debug for ScannerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScannerConfig")
            .field("subscription", &self.masked_scope())
            .field("subscription_name", &self.subscription_name)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Whether an index reflects a full listing.
///
/// A degraded index is empty or partial; lookups on it give the same
/// answer as "not found".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum IndexStatus {
    #[default]
    Complete,
    Degraded { reason: String },
}

/// Lower-cased resource id -> value.
#[derive(Debug, Clone)]
pub struct ResourceIndex<T> {
    entries: HashMap<String, T>,
    status: IndexStatus,
}

impl<T> Default for ResourceIndex<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            status: IndexStatus::Complete,
        }
    }
}

impl<T> ResourceIndex<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn degraded(reason: impl Into<String>) -> Self {
        Self {
            entries: HashMap::new(),
            status: IndexStatus::Degraded {
                reason: reason.into(),
            },
        }
    }

    /// Keep the entries gathered so far but flag the index as partial.
    pub fn mark_degraded(&mut self, reason: impl Into<String>) {
        self.status = IndexStatus::Degraded {
            reason: reason.into(),
        };
    }

    pub fn insert(&mut self, resource_id: &str, value: T) {
        self.entries.insert(resource_id::normalize(resource_id), value);
    }

    pub fn contains(&self, resource_id: &str) -> bool {
        self.entries.contains_key(&resource_id::normalize(resource_id))
    }

    pub fn get(&self, resource_id: &str) -> Option<&T> {
        self.entries.get(&resource_id::normalize(resource_id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn status(&self) -> &IndexStatus {
        &self.status
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.status, IndexStatus::Degraded { .. })
    }
}

impl<'a, T> Extend<(&'a str, T)> for ResourceIndex<T> {
    fn extend<I: IntoIterator<Item = (&'a str, T)>>(&mut self, iter: I) {
        for (id, value) in iter {
            self.insert(id, value);
        }
    }
}

/// Public IP record kept by the public-IP index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PublicIp {
    pub id: String,
    pub name: String,
    pub address: Option<String>,
    pub sku: Option<String>,
    pub zones: Vec<String>,
}

impl PublicIp {
    pub fn is_zone_redundant(&self) -> bool {
        self.zones.len() > 1
    }
}

/// Read-only enrichment shared by every scanner of one subscription.
#[derive(Debug, Clone, Default)]
pub struct ScanContext {
    pub filters: Arc<Filters>,
    pub diagnostic_settings: ResourceIndex<()>,
    pub private_endpoints: ResourceIndex<()>,
    pub public_ips: ResourceIndex<PublicIp>,
}

impl ScanContext {
    pub fn new(filters: Arc<Filters>) -> Self {
        Self {
            filters,
            ..Self::default()
        }
    }

    /// Run the three indexers concurrently and freeze the result.
    pub async fn build(config: &ScannerConfig, filters: Arc<Filters>) -> Result<Self> {
        let (diagnostic_settings, private_endpoints, public_ips) = tokio::join!(
            diagnostics::build(config),
            endpoints::build(config),
            public_ips::build(config),
        );
        let ctx = Self {
            filters,
            diagnostic_settings: diagnostic_settings?,
            private_endpoints: private_endpoints?,
            public_ips: public_ips?,
        };
        tracing::debug!(
            subscription = %config.masked_scope(),
            diagnostic_settings = ctx.diagnostic_settings.len(),
            private_endpoints = ctx.private_endpoints.len(),
            public_ips = ctx.public_ips.len(),
            "scan context ready"
        );
        Ok(ctx)
    }

    pub fn has_diagnostics(&self, resource_id: &str) -> bool {
        self.diagnostic_settings.contains(resource_id)
    }

    pub fn has_private_endpoint(&self, resource_id: &str) -> bool {
        self.private_endpoints.contains(resource_id)
    }

    pub fn public_ip(&self, resource_id: &str) -> Option<&PublicIp> {
        self.public_ips.get(resource_id)
    }
}

/// Turn an indexer failure into a degraded index. Cancellation still
/// propagates.
pub(crate) fn degrade<T>(
    config: &ScannerConfig,
    index: &'static str,
    outcome: Result<ResourceIndex<T>>,
) -> Result<ResourceIndex<T>> {
    match outcome {
        Ok(index) => Ok(index),
        Err(ScanError::Cancelled) => Err(ScanError::Cancelled),
        Err(e) => {
            tracing::warn!(
                subscription = %config.masked_scope(),
                index,
                error = %e,
                "index unavailable, continuing without it"
            );
            Ok(ResourceIndex::degraded(e.to_string()))
        }
    }
}
