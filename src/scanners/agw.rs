use serde::Deserialize;

use super::{missing_diagnostics, missing_tags, ArmResource, GenericScanner, ResourceMeta};
use crate::context::ScanContext;
use crate::rules::{
    caf_compliant, recommendation_set, Category, Impact, Recommendation, RecommendationSet,
    RecommendationType, CAF_URL, TAGS_URL,
};

pub const RESOURCE_TYPE: &str = "Microsoft.Network/applicationGateways";
pub const API_VERSION: &str = "2023-11-01";

#[derive(Debug, Default, Deserialize)]
pub struct ApplicationGateway {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    #[serde(default)]
    pub zones: Vec<String>,
    #[serde(default)]
    pub properties: Option<GatewayProperties>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GatewayProperties {
    #[serde(rename = "frontendIPConfigurations", default)]
    pub frontend_ip_configurations: Vec<FrontendIpConfiguration>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FrontendIpConfiguration {
    #[serde(default)]
    pub properties: Option<FrontendProperties>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FrontendProperties {
    #[serde(rename = "publicIPAddress", default)]
    pub public_ip_address: Option<SubResource>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubResource {
    #[serde(default)]
    pub id: Option<String>,
}

impl ArmResource for ApplicationGateway {
    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }
}

impl ApplicationGateway {
    fn public_ip_ids(&self) -> impl Iterator<Item = &str> {
        self.properties
            .iter()
            .flat_map(|p| &p.frontend_ip_configurations)
            .filter_map(|f| f.properties.as_ref()?.public_ip_address.as_ref()?.id.as_deref())
    }
}

/// Frontend public IPs that are not zone redundant. An address missing from
/// the index counts as not zone redundant.
fn non_redundant_frontends(gateway: &ApplicationGateway, ctx: &ScanContext) -> Vec<String> {
    gateway
        .public_ip_ids()
        .filter(|id| !ctx.public_ip(id).map(|p| p.is_zone_redundant()).unwrap_or(false))
        .map(|id| {
            ctx.public_ip(id)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| id.rsplit('/').next().unwrap_or(id).to_string())
        })
        .collect()
}

pub fn scanner() -> GenericScanner<ApplicationGateway> {
    GenericScanner::new("Application Gateway", &["agw"], &[RESOURCE_TYPE], API_VERSION, rules)
}

pub fn rules() -> RecommendationSet<ApplicationGateway> {
    recommendation_set::<ApplicationGateway>([
        Recommendation {
            id: "agw-005",
            resource_type: RESOURCE_TYPE,
            category: Category::MonitoringAndAlerting,
            impact: Impact::Low,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "Application Gateway: Monitor and Log the configurations and traffic",
            learn_more_url: "https://learn.microsoft.com/en-us/azure/application-gateway/application-gateway-diagnostics#diagnostic-logging",
            eval: missing_diagnostics,
        },
        Recommendation {
            id: "agw-103",
            resource_type: RESOURCE_TYPE,
            category: Category::HighAvailability,
            impact: Impact::High,
            recommendation_type: RecommendationType::Sla,
            recommendation: "Application Gateway SLA",
            learn_more_url: "https://www.azure.cn/en-us/support/sla/application-gateway/",
            eval: |_, _| (false, "99.95%".to_string()),
        },
        Recommendation {
            id: "agw-105",
            resource_type: RESOURCE_TYPE,
            category: Category::Governance,
            impact: Impact::Low,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "Application Gateway Name should comply with naming conventions",
            learn_more_url: CAF_URL,
            eval: |g: &ApplicationGateway, _| (!caf_compliant(g.meta.name.as_deref(), "agw"), String::new()),
        },
        Recommendation {
            id: "agw-106",
            resource_type: RESOURCE_TYPE,
            category: Category::Governance,
            impact: Impact::Low,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "Application Gateway should have tags",
            learn_more_url: TAGS_URL,
            eval: missing_tags,
        },
        Recommendation {
            id: "agw-107",
            resource_type: RESOURCE_TYPE,
            category: Category::HighAvailability,
            impact: Impact::High,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "Application Gateway should be deployed across availability zones",
            learn_more_url: "https://learn.microsoft.com/en-us/azure/reliability/reliability-application-gateway-v2",
            eval: |g, _| (g.zones.len() < 2, g.zones.join(",")),
        },
        Recommendation {
            id: "agw-108",
            resource_type: RESOURCE_TYPE,
            category: Category::HighAvailability,
            impact: Impact::Medium,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "Application Gateway frontend public IPs should be zone redundant",
            learn_more_url: "https://learn.microsoft.com/en-us/azure/virtual-network/ip-services/public-ip-addresses#availability-zone",
            eval: |g, ctx| {
                let offenders = non_redundant_frontends(g, ctx);
                (!offenders.is_empty(), offenders.join(","))
            },
        },
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PublicIp;
    use crate::rules::evaluate;
    use crate::scanners::test_support::parse;
    use serde_json::json;

    const PIP: &str = "/subscriptions/s/resourceGroups/r/providers/Microsoft.Network/publicIPAddresses/pip-agw";

    fn gateway() -> ApplicationGateway {
        parse(json!({
            "id": "/subscriptions/s/resourceGroups/r/providers/Microsoft.Network/applicationGateways/agw-edge",
            "name": "agw-edge",
            "zones": ["1", "2", "3"],
            "properties": {"frontendIPConfigurations": [
                {"properties": {"publicIPAddress": {"id": PIP}}},
                {"properties": {"privateIPAddress": "10.0.0.4"}}
            ]}
        }))
    }

    #[test]
    fn zone_redundant_frontend() {
        let mut ctx = ScanContext::default();
        ctx.public_ips.insert(
            PIP,
            PublicIp {
                id: PIP.into(),
                name: "pip-agw".into(),
                zones: vec!["1".into(), "2".into(), "3".into()],
                ..PublicIp::default()
            },
        );
        let results = evaluate(&rules(), &gateway(), &ctx);
        assert!(!results["agw-107"].not_compliant);
        assert!(!results["agw-108"].not_compliant);
    }

    #[test]
    fn unknown_frontend_ip_is_not_redundant() {
        let results = evaluate(&rules(), &gateway(), &ScanContext::default());
        assert!(results["agw-108"].not_compliant);
        assert_eq!(results["agw-108"].result, "pip-agw");
    }

    #[test]
    fn gateway_without_public_frontends() {
        let results = evaluate(&rules(), &ApplicationGateway::default(), &ScanContext::default());
        assert!(!results["agw-108"].not_compliant);
        assert!(results["agw-107"].not_compliant);
        assert_eq!(results["agw-103"].result, "99.95%");
    }
}
