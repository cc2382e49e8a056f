use serde::Deserialize;

use super::{
    missing_diagnostics, missing_tags, ArmResource, GenericScanner, PrivateEndpointConnection,
    ResourceMeta,
};
use crate::rules::{
    caf_compliant, recommendation_set, Category, Impact, Recommendation, RecommendationSet,
    RecommendationType, CAF_URL, TAGS_URL,
};

pub const RESOURCE_TYPE: &str = "Microsoft.ContainerRegistry/registries";
pub const API_VERSION: &str = "2023-07-01";

#[derive(Debug, Default, Deserialize)]
pub struct Registry {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    #[serde(default)]
    pub properties: Option<RegistryProperties>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryProperties {
    #[serde(default)]
    pub admin_user_enabled: Option<bool>,
    #[serde(default)]
    pub private_endpoint_connections: Vec<PrivateEndpointConnection>,
    #[serde(default)]
    pub policies: Option<Policies>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policies {
    #[serde(default)]
    pub retention_policy: Option<RetentionPolicy>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RetentionPolicy {
    #[serde(default)]
    pub days: Option<u32>,
    /// `enabled` or `disabled`.
    #[serde(default)]
    pub status: Option<String>,
}

impl ArmResource for Registry {
    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }
}

fn retention_enabled(registry: &Registry) -> bool {
    registry
        .properties
        .as_ref()
        .and_then(|p| p.policies.as_ref())
        .and_then(|p| p.retention_policy.as_ref())
        .and_then(|r| r.status.as_deref())
        .map(|s| !s.eq_ignore_ascii_case("disabled"))
        .unwrap_or(false)
}

pub fn scanner() -> GenericScanner<Registry> {
    GenericScanner::new("Container Registry", &["cr"], &[RESOURCE_TYPE], API_VERSION, rules)
}

pub fn rules() -> RecommendationSet<Registry> {
    recommendation_set::<Registry>([
        Recommendation {
            id: "cr-001",
            resource_type: RESOURCE_TYPE,
            category: Category::MonitoringAndAlerting,
            impact: Impact::Low,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "ContainerRegistry should have diagnostic settings enabled",
            learn_more_url: "https://learn.microsoft.com/en-us/azure/container-registry/monitor-service",
            eval: missing_diagnostics,
        },
        Recommendation {
            id: "cr-003",
            resource_type: RESOURCE_TYPE,
            category: Category::HighAvailability,
            impact: Impact::High,
            recommendation_type: RecommendationType::Sla,
            recommendation: "ContainerRegistry should have a SLA",
            learn_more_url: "https://www.azure.cn/en-us/support/sla/container-registry/",
            eval: |_, _| (false, "99.95%".to_string()),
        },
        Recommendation {
            id: "cr-004",
            resource_type: RESOURCE_TYPE,
            category: Category::Security,
            impact: Impact::High,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "ContainerRegistry should have private endpoints enabled",
            learn_more_url: "https://learn.microsoft.com/en-us/azure/container-registry/container-registry-private-link",
            eval: |r: &Registry, _| {
                let pe = r
                    .properties
                    .as_ref()
                    .map(|p| !p.private_endpoint_connections.is_empty())
                    .unwrap_or(false);
                (!pe, String::new())
            },
        },
        Recommendation {
            id: "cr-006",
            resource_type: RESOURCE_TYPE,
            category: Category::Governance,
            impact: Impact::Low,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "ContainerRegistry Name should comply with naming conventions",
            learn_more_url: CAF_URL,
            eval: |r, _| (!caf_compliant(r.meta.name.as_deref(), "cr"), String::new()),
        },
        Recommendation {
            id: "cr-008",
            resource_type: RESOURCE_TYPE,
            category: Category::Security,
            impact: Impact::Medium,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "ContainerRegistry should have the Administrator account disabled",
            learn_more_url: "https://learn.microsoft.com/azure/container-registry/container-registry-authentication-managed-identity",
            eval: |r, _| {
                let admin = r
                    .properties
                    .as_ref()
                    .and_then(|p| p.admin_user_enabled)
                    .unwrap_or(false);
                (admin, String::new())
            },
        },
        Recommendation {
            id: "cr-009",
            resource_type: RESOURCE_TYPE,
            category: Category::Governance,
            impact: Impact::Low,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "ContainerRegistry should have tags",
            learn_more_url: TAGS_URL,
            eval: missing_tags,
        },
        Recommendation {
            id: "cr-010",
            resource_type: RESOURCE_TYPE,
            category: Category::Governance,
            impact: Impact::Medium,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "ContainerRegistry should use retention policies",
            learn_more_url: "https://learn.microsoft.com/en-us/azure/container-registry/container-registry-retention-policy",
            eval: |r, _| (!retention_enabled(r), String::new()),
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

    #[test]
    fn admin_user_and_retention() {
        let registry: Registry = parse(json!({
            "name": "crshared",
            "properties": {
                "adminUserEnabled": true,
                "policies": {"retentionPolicy": {"days": 7, "status": "enabled"}}
            }
        }));
        let results = evaluate(&rules(), &registry, &ScanContext::default());
        assert!(results["cr-008"].not_compliant);
        assert!(!results["cr-010"].not_compliant);
        assert!(!results["cr-006"].not_compliant);
    }

    #[test]
    fn disabled_or_missing_retention_is_flagged() {
        let disabled: Registry = parse(json!({
            "properties": {"policies": {"retentionPolicy": {"status": "disabled"}}}
        }));
        let ctx = ScanContext::default();
        assert!(evaluate(&rules(), &disabled, &ctx)["cr-010"].not_compliant);
        assert!(evaluate(&rules(), &Registry::default(), &ctx)["cr-010"].not_compliant);
        assert!(!evaluate(&rules(), &Registry::default(), &ctx)["cr-008"].not_compliant);
    }
}
