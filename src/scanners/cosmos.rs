use serde::Deserialize;

use super::{
    missing_diagnostics, missing_tags, ArmResource, GenericScanner, PrivateEndpointConnection,
    ResourceMeta,
};
use crate::rules::{
    caf_compliant, recommendation_set, Category, Impact, Recommendation, RecommendationSet,
    RecommendationType, CAF_URL, TAGS_URL,
};

pub const RESOURCE_TYPE: &str = "Microsoft.DocumentDB/databaseAccounts";
pub const API_VERSION: &str = "2024-05-15";

#[derive(Debug, Default, Deserialize)]
pub struct DatabaseAccount {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    #[serde(default)]
    pub properties: Option<AccountProperties>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountProperties {
    #[serde(default)]
    pub locations: Vec<Location>,
    #[serde(default)]
    pub private_endpoint_connections: Vec<PrivateEndpointConnection>,
    #[serde(default)]
    pub disable_local_auth: Option<bool>,
    #[serde(default)]
    pub disable_key_based_metadata_write_access: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(default)]
    pub location_name: Option<String>,
    #[serde(default)]
    pub is_zone_redundant: Option<bool>,
}

impl ArmResource for DatabaseAccount {
    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }
}

impl DatabaseAccount {
    fn locations(&self) -> &[Location] {
        self.properties
            .as_ref()
            .map(|p| p.locations.as_slice())
            .unwrap_or_default()
    }
}

/// Zone coverage across the account's write/read locations.
struct Zones {
    any_redundant: bool,
    any_not_redundant: bool,
    locations: usize,
}

impl Zones {
    fn of(account: &DatabaseAccount) -> Self {
        let locations = account.locations();
        Self {
            any_redundant: locations.iter().any(|l| l.is_zone_redundant == Some(true)),
            any_not_redundant: locations.iter().any(|l| l.is_zone_redundant != Some(true)),
            locations: locations.len(),
        }
    }

    /// Zone redundant everywhere, in at least two locations.
    fn enabled(&self) -> bool {
        self.any_redundant && self.locations >= 2 && !self.any_not_redundant
    }
}

/// 99.999% when every location of a multi-region account is zone redundant,
/// 99.995% when at least one location is, 99.99% otherwise.
fn sla(account: &DatabaseAccount) -> &'static str {
    let zones = Zones::of(account);
    if zones.enabled() {
        "99.999%"
    } else if zones.any_redundant {
        "99.995%"
    } else {
        "99.99%"
    }
}

pub fn scanner() -> GenericScanner<DatabaseAccount> {
    GenericScanner::new("Cosmos DB", &["cosmos"], &[RESOURCE_TYPE], API_VERSION, rules)
}

pub fn rules() -> RecommendationSet<DatabaseAccount> {
    recommendation_set::<DatabaseAccount>([
        Recommendation {
            id: "cosmos-001",
            resource_type: RESOURCE_TYPE,
            category: Category::MonitoringAndAlerting,
            impact: Impact::Low,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "CosmosDB should have diagnostic settings enabled",
            learn_more_url: "https://learn.microsoft.com/en-us/azure/cosmos-db/monitor-resource-logs",
            eval: missing_diagnostics,
        },
        Recommendation {
            id: "cosmos-002",
            resource_type: RESOURCE_TYPE,
            category: Category::HighAvailability,
            impact: Impact::High,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "CosmosDB should have availability zones enabled",
            learn_more_url: "https://learn.microsoft.com/en-us/azure/cosmos-db/high-availability",
            eval: |a, _| (!Zones::of(a).enabled(), String::new()),
        },
        Recommendation {
            id: "cosmos-003",
            resource_type: RESOURCE_TYPE,
            category: Category::HighAvailability,
            impact: Impact::High,
            recommendation_type: RecommendationType::Sla,
            recommendation: "CosmosDB should have a SLA",
            learn_more_url: "https://learn.microsoft.com/en-us/azure/cosmos-db/high-availability#slas",
            eval: |a, _| (false, sla(a).to_string()),
        },
        Recommendation {
            id: "cosmos-004",
            resource_type: RESOURCE_TYPE,
            category: Category::Security,
            impact: Impact::High,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "CosmosDB should have private endpoints enabled",
            learn_more_url: "https://learn.microsoft.com/en-us/azure/cosmos-db/how-to-configure-private-endpoints",
            eval: |a, _| {
                let pe = a
                    .properties
                    .as_ref()
                    .map(|p| !p.private_endpoint_connections.is_empty())
                    .unwrap_or(false);
                (!pe, String::new())
            },
        },
        Recommendation {
            id: "cosmos-006",
            resource_type: RESOURCE_TYPE,
            category: Category::Governance,
            impact: Impact::Low,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "CosmosDB Name should comply with naming conventions",
            learn_more_url: CAF_URL,
            eval: |a, _| (!caf_compliant(a.meta.name.as_deref(), "cosmos"), String::new()),
        },
        Recommendation {
            id: "cosmos-007",
            resource_type: RESOURCE_TYPE,
            category: Category::Governance,
            impact: Impact::Low,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "CosmosDB should have tags",
            learn_more_url: TAGS_URL,
            eval: missing_tags,
        },
        Recommendation {
            id: "cosmos-008",
            resource_type: RESOURCE_TYPE,
            category: Category::Security,
            impact: Impact::High,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "CosmosDB should have local authentication disabled",
            learn_more_url: "https://learn.microsoft.com/en-us/azure/cosmos-db/how-to-setup-rbac#disable-local-auth",
            eval: |a, _| {
                let disabled = a.properties.as_ref().and_then(|p| p.disable_local_auth);
                (disabled != Some(true), String::new())
            },
        },
        Recommendation {
            id: "cosmos-009",
            resource_type: RESOURCE_TYPE,
            category: Category::Security,
            impact: Impact::High,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "CosmosDB: disable write operations on metadata resources (databases, containers, throughput) via account keys",
            learn_more_url: "https://learn.microsoft.com/en-us/azure/cosmos-db/role-based-access-control#set-via-arm-template",
            eval: |a, _| {
                let disabled = a
                    .properties
                    .as_ref()
                    .and_then(|p| p.disable_key_based_metadata_write_access);
                (disabled != Some(true), String::new())
            },
        },
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ScanContext;
    use crate::rules::evaluate;
    use crate::scanners::test_support::parse;
    use serde_json::json;

    fn account(zones: &[bool]) -> DatabaseAccount {
        let locations: Vec<_> = zones
            .iter()
            .enumerate()
            .map(|(i, z)| json!({"locationName": format!("region-{i}"), "isZoneRedundant": z}))
            .collect();
        parse(json!({
            "id": "/subscriptions/s/resourceGroups/r/providers/Microsoft.DocumentDB/databaseAccounts/cosmos-1",
            "name": "cosmos-1",
            "properties": {"locations": locations}
        }))
    }

    #[test]
    fn single_region_without_zones() {
        let a = account(&[false]);
        assert_eq!(sla(&a), "99.99%");
        assert!(!Zones::of(&a).enabled());
    }

    #[test]
    fn single_zone_redundant_region() {
        let a = account(&[true]);
        assert_eq!(sla(&a), "99.995%");
        assert!(!Zones::of(&a).enabled());
    }

    #[test]
    fn multi_region_all_zone_redundant() {
        let a = account(&[true, true]);
        assert_eq!(sla(&a), "99.999%");
        assert!(Zones::of(&a).enabled());
    }

    #[test]
    fn mixed_regions_keep_the_intermediate_sla() {
        let a = account(&[true, false]);
        assert_eq!(sla(&a), "99.995%");
        assert!(!Zones::of(&a).enabled());
    }

    #[test]
    fn security_flags() {
        let a: DatabaseAccount = parse(json!({
            "name": "cosmos-1",
            "properties": {
                "disableLocalAuth": true,
                "disableKeyBasedMetadataWriteAccess": false,
                "privateEndpointConnections": [{"id": "pec-1"}]
            }
        }));
        let results = evaluate(&rules(), &a, &ScanContext::default());
        assert!(!results["cosmos-008"].not_compliant);
        assert!(results["cosmos-009"].not_compliant);
        assert!(!results["cosmos-004"].not_compliant);
        assert!(!results["cosmos-006"].not_compliant);
    }

    #[test]
    fn bare_account_is_conservative() {
        let results = evaluate(&rules(), &DatabaseAccount::default(), &ScanContext::default());
        assert_eq!(results.len(), 8);
        assert!(results["cosmos-002"].not_compliant);
        assert_eq!(results["cosmos-003"].result, "99.99%");
        assert!(results["cosmos-004"].not_compliant);
        assert!(results["cosmos-008"].not_compliant);
    }
}
