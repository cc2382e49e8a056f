//! Diagnostic-settings index.
//!
//! Diagnostic settings are extension resources and are not returned by
//! Resource Graph, so the index is built in two steps: one Graph query for
//! the subscription's resources, then a `diagnosticSettings` listing for
//! every resource whose type supports them, at most [`WORKERS`] in flight.

use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::{degrade, ResourceIndex, ScannerConfig};
use crate::error::{Result, ScanError};
use crate::upstream::{acquire, collect_all, ArmClient, ArmPager, PageRequest};

pub const API_VERSION: &str = "2021-05-01-preview";
const WORKERS: usize = 20;
const INDEX: &str = "diagnostic settings";

const QUERY: &str = "resources | project id, type";

/// Lower-cased resource types that accept diagnostic settings.
const SUPPORTED_TYPES: &[&str] = &[
    "microsoft.analysisservices/servers",
    "microsoft.app/containerapps",
    "microsoft.app/managedenvironments",
    "microsoft.appconfiguration/configurationstores",
    "microsoft.automation/automationaccounts",
    "microsoft.batch/batchaccounts",
    "microsoft.cache/redis",
    "microsoft.cdn/profiles",
    "microsoft.cognitiveservices/accounts",
    "microsoft.compute/availabilitysets",
    "microsoft.compute/disks",
    "microsoft.compute/galleries",
    "microsoft.compute/virtualmachines",
    "microsoft.compute/virtualmachinescalesets",
    "microsoft.containerinstance/containergroups",
    "microsoft.containerregistry/registries",
    "microsoft.containerservice/managedclusters",
    "microsoft.dashboard/grafana",
    "microsoft.databricks/workspaces",
    "microsoft.datafactory/factories",
    "microsoft.dbformysql/flexibleservers",
    "microsoft.dbformysql/servers",
    "microsoft.dbforpostgresql/flexibleservers",
    "microsoft.dbforpostgresql/servers",
    "microsoft.devices/iothubs",
    "microsoft.documentdb/databaseaccounts",
    "microsoft.eventgrid/domains",
    "microsoft.eventhub/namespaces",
    "microsoft.insights/components",
    "microsoft.keyvault/vaults",
    "microsoft.kusto/clusters",
    "microsoft.logic/workflows",
    "microsoft.machinelearningservices/workspaces",
    "microsoft.network/applicationgateways",
    "microsoft.network/azurefirewalls",
    "microsoft.network/connections",
    "microsoft.network/frontdoorwebapplicationfirewallpolicies",
    "microsoft.network/ipgroups",
    "microsoft.network/loadbalancers",
    "microsoft.network/natgateways",
    "microsoft.network/networkinterfaces",
    "microsoft.network/networksecuritygroups",
    "microsoft.network/networkwatchers",
    "microsoft.network/privatednszones",
    "microsoft.network/privateendpoints",
    "microsoft.network/publicipaddresses",
    "microsoft.network/routetables",
    "microsoft.network/trafficmanagerprofiles",
    "microsoft.network/virtualnetworkgateways",
    "microsoft.network/virtualnetworks",
    "microsoft.network/virtualwans",
    "microsoft.operationalinsights/workspaces",
    "microsoft.recoveryservices/vaults",
    "microsoft.search/searchservices",
    "microsoft.servicebus/namespaces",
    "microsoft.signalrservice/signalr",
    "microsoft.signalrservice/webpubsub",
    "microsoft.sql/servers",
    "microsoft.sql/servers/databases",
    "microsoft.sql/servers/elasticpools",
    "microsoft.storage/storageaccounts",
    "microsoft.virtualmachineimages/imagetemplates",
    "microsoft.web/certificates",
    "microsoft.web/connections",
    "microsoft.web/serverfarms",
    "microsoft.web/sites",
];

#[derive(Debug, Deserialize)]
struct ResourceRow {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default)]
    resource_type: String,
}

#[derive(Debug, Deserialize)]
struct SettingRow {
    #[serde(default)]
    id: String,
}

pub fn supports_diagnostics(resource_type: &str) -> bool {
    SUPPORTED_TYPES.contains(&resource_type.to_lowercase().as_str())
}

/// Resource ids with at least one diagnostic setting.
///
/// A failed resource listing degrades the whole index. A failed
/// per-resource listing keeps what was read and marks the index partial.
pub async fn build(config: &ScannerConfig) -> Result<ResourceIndex<()>> {
    let targets = match list_targets(config).await {
        Ok(targets) => targets,
        Err(e) => return degrade(config, INDEX, Err(e)),
    };
    tracing::debug!(
        subscription = %config.masked_scope(),
        resources = targets.len(),
        "reading diagnostic settings"
    );
    read_settings(config, targets).await
}

async fn list_targets(config: &ScannerConfig) -> Result<Vec<String>> {
    let mut pager = ArmPager::<ResourceRow>::new(
        Arc::clone(&config.client),
        PageRequest::graph(&config.subscription_id, QUERY),
    );
    let rows = collect_all(&mut pager, &config.cancel).await?;
    Ok(rows
        .into_iter()
        .filter(|row| !row.id.is_empty() && supports_diagnostics(&row.resource_type))
        .map(|row| row.id)
        .collect())
}

async fn read_settings(config: &ScannerConfig, targets: Vec<String>) -> Result<ResourceIndex<()>> {
    let limit = Arc::new(Semaphore::new(WORKERS));
    let mut tasks = JoinSet::new();
    for target in targets {
        let client = Arc::clone(&config.client);
        let cancel = config.cancel.clone();
        let limit = Arc::clone(&limit);
        tasks.spawn(async move {
            let outcome = match acquire(limit, &cancel).await {
                Some(_permit) => settings_of(client, &target, &cancel).await,
                None => Err(ScanError::Cancelled),
            };
            (target, outcome)
        });
    }

    let mut index = ResourceIndex::new();
    let mut unreadable = 0usize;
    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        let (target, outcome) = joined
            .map_err(|e| ScanError::Internal(format!("diagnostic settings task failed: {e}")))?;
        match outcome {
            Ok(settings) => {
                if settings.iter().any(|s| !s.id.is_empty()) {
                    index.insert(&target, ());
                }
            }
            Err(ScanError::Cancelled) => return Err(ScanError::Cancelled),
            Err(e) => {
                tracing::debug!(resource = %target, error = %e, "diagnostic settings unreadable");
                unreadable += 1;
                first_error.get_or_insert_with(|| e.to_string());
            }
        }
    }

    if let Some(reason) = first_error {
        tracing::warn!(
            subscription = %config.masked_scope(),
            index = INDEX,
            unreadable,
            error = %reason,
            "index is partial, continuing with what was read"
        );
        index.mark_degraded(format!("{unreadable} resource(s) unreadable: {reason}"));
    }
    Ok(index)
}

async fn settings_of(
    client: Arc<dyn ArmClient>,
    resource_id: &str,
    cancel: &CancellationToken,
) -> Result<Vec<SettingRow>> {
    let path = format!("{resource_id}/providers/microsoft.insights/diagnosticSettings");
    let mut pager = ArmPager::<SettingRow>::list(client, &path, API_VERSION);
    collect_all(&mut pager, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::config;
    use crate::error::UpstreamError;
    use crate::upstream::MemoryArmClient;
    use serde_json::{json, Value};

    const VAULT: &str = "/subscriptions/s/resourceGroups/r/providers/Microsoft.KeyVault/vaults/kv-logged";
    const QUIET: &str = "/subscriptions/s/resourceGroups/r/providers/Microsoft.KeyVault/vaults/kv-quiet";
    const PLAN: &str = "/subscriptions/s/resourceGroups/r/providers/Microsoft.Web/serverfarms/asp-1";
    const DNS: &str = "/subscriptions/s/resourceGroups/r/providers/Microsoft.Network/dnszones/contoso.com";

    fn row(id: &str, resource_type: &str) -> Value {
        json!({"id": id, "type": resource_type})
    }

    fn settings_path(id: &str) -> String {
        format!("{id}/providers/microsoft.insights/diagnosticSettings")
    }

    fn setting(id: &str) -> Vec<Vec<Value>> {
        vec![vec![json!({
            "id": format!("{id}/providers/microsoft.insights/diagnosticSettings/to-law"),
            "name": "to-law"
        })]]
    }

    fn client() -> MemoryArmClient {
        MemoryArmClient::new()
            .with_graph(
                "s",
                vec![
                    row(VAULT, "Microsoft.KeyVault/vaults"),
                    row(QUIET, "Microsoft.KeyVault/vaults"),
                    row(PLAN, "Microsoft.Web/serverFarms"),
                    row(DNS, "Microsoft.Network/dnszones"),
                ],
            )
            .with_pages(&settings_path(VAULT), setting(VAULT))
            .with_pages(&settings_path(DNS), setting(DNS))
    }

    #[test]
    fn supported_types_ignore_case() {
        assert!(supports_diagnostics("Microsoft.KeyVault/vaults"));
        assert!(supports_diagnostics("Microsoft.Web/serverFarms"));
        assert!(!supports_diagnostics("Microsoft.Network/dnszones"));
    }

    #[tokio::test]
    async fn reads_settings_per_supported_resource() {
        let config = config(client());
        let index = build(&config).await.unwrap();

        assert!(!index.is_degraded());
        assert!(index.contains(VAULT));
        assert!(!index.contains(QUIET));
        assert!(!index.contains(PLAN));
        // Unsupported types are never queried.
        assert!(!index.contains(DNS));
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn unsupported_types_cost_no_requests() {
        let client = Arc::new(client());
        let config = ScannerConfig::new(
            Arc::clone(&client) as Arc<dyn ArmClient>,
            CancellationToken::new(),
            "s",
            "Contoso",
        );
        build(&config).await.unwrap();
        // One graph page plus one listing for each of the three supported resources.
        assert_eq!(client.request_count(), 4);
    }

    #[tokio::test]
    async fn unreadable_resource_marks_index_partial() {
        let client = client().with_error(
            &settings_path(QUIET),
            UpstreamError::response(403, "AuthorizationFailed", "diagnosticSettings"),
        );
        let index = build(&config(client)).await.unwrap();
        assert!(index.is_degraded());
        assert!(index.contains(VAULT));
    }

    #[tokio::test]
    async fn failed_resource_listing_degrades() {
        let client = MemoryArmClient::new().with_error(
            "graph:s",
            UpstreamError::response(403, "AuthorizationFailed", "graph"),
        );
        let index = build(&config(client)).await.unwrap();
        assert!(index.is_degraded());
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn cancellation_propagates() {
        let config = config(client());
        config.cancel.cancel();
        assert!(build(&config).await.unwrap_err().is_cancelled());
    }
}
