use serde::Deserialize;

use super::{degrade, PublicIp, ResourceIndex, ScannerConfig};
use crate::error::{Result, ScanError};
use crate::upstream::{collect_all, ArmPager};

const RESOURCE_TYPE: &str = "Microsoft.Network/publicIPAddresses";
const API_VERSION: &str = "2023-11-01";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublicIpAddress {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    sku: Option<Sku>,
    #[serde(default)]
    zones: Vec<String>,
    #[serde(default)]
    properties: Option<AddressProperties>,
}

#[derive(Debug, Default, Deserialize)]
struct Sku {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddressProperties {
    #[serde(default)]
    ip_address: Option<String>,
}

pub async fn build(config: &ScannerConfig) -> Result<ResourceIndex<PublicIp>> {
    let outcome = async {
        let mut pager = ArmPager::<PublicIpAddress>::list(
            config.client.clone(),
            &config.provider_path(RESOURCE_TYPE),
            API_VERSION,
        );
        let addresses = collect_all(&mut pager, &config.cancel).await?;
        let mut index = ResourceIndex::new();
        for pip in addresses {
            let Some(id) = pip.id else { continue };
            let record = PublicIp {
                name: pip.name.unwrap_or_default(),
                address: pip.properties.and_then(|p| p.ip_address),
                sku: pip.sku.and_then(|s| s.name),
                zones: pip.zones,
                id: id.clone(),
            };
            index.insert(&id, record);
        }
        Ok::<_, ScanError>(index)
    }
    .await;
    degrade(config, "public ips", outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::config;
    use crate::upstream::MemoryArmClient;
    use serde_json::json;

    #[tokio::test]
    async fn skips_rows_without_id() {
        let client = MemoryArmClient::new().with_pages(
            "/subscriptions/s/providers/Microsoft.Network/publicIPAddresses",
            vec![vec![
                json!({"name": "orphan"}),
                json!({"id": "/subscriptions/s/resourceGroups/r/providers/Microsoft.Network/publicIPAddresses/pip-1", "name": "pip-1"}),
            ]],
        );
        let index = build(&config(client)).await.unwrap();
        assert_eq!(index.len(), 1);
        let pip = index
            .get("/subscriptions/s/resourcegroups/r/providers/microsoft.network/publicipaddresses/pip-1")
            .unwrap();
        assert_eq!(pip.name, "pip-1");
        assert!(pip.zones.is_empty());
        assert!(!pip.is_zone_redundant());
    }
}
