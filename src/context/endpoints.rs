use serde::Deserialize;

use super::{degrade, ResourceIndex, ScannerConfig};
use crate::error::{Result, ScanError};
use crate::upstream::{collect_all, ArmPager};

const RESOURCE_TYPE: &str = "Microsoft.Network/privateEndpoints";
const API_VERSION: &str = "2023-11-01";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrivateEndpoint {
    #[serde(default)]
    properties: Option<EndpointProperties>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndpointProperties {
    #[serde(default)]
    private_link_service_connections: Vec<LinkConnection>,
    #[serde(default)]
    manual_private_link_service_connections: Vec<LinkConnection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkConnection {
    #[serde(default)]
    properties: Option<LinkProperties>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkProperties {
    #[serde(default)]
    private_link_service_id: Option<String>,
}

/// Resources targeted by at least one private endpoint in the subscription.
pub async fn build(config: &ScannerConfig) -> Result<ResourceIndex<()>> {
    let outcome = async {
        let mut pager = ArmPager::<PrivateEndpoint>::list(
            config.client.clone(),
            &config.provider_path(RESOURCE_TYPE),
            API_VERSION,
        );
        let endpoints = collect_all(&mut pager, &config.cancel).await?;
        let mut index = ResourceIndex::new();
        index.extend(
            endpoints
                .iter()
                .filter_map(|pe| pe.properties.as_ref())
                .flat_map(|p| {
                    p.private_link_service_connections
                        .iter()
                        .chain(&p.manual_private_link_service_connections)
                })
                .filter_map(|c| c.properties.as_ref()?.private_link_service_id.as_deref())
                .map(|id| (id, ())),
        );
        Ok::<_, ScanError>(index)
    }
    .await;
    degrade(config, "private endpoints", outcome)
}
