use serde::Deserialize;

use super::{missing_tags, ArmResource, GenericScanner, ResourceMeta};
use crate::rules::{
    caf_compliant, recommendation_set, Category, Impact, Recommendation, RecommendationSet,
    RecommendationType, CAF_URL, TAGS_URL,
};

pub const RESOURCE_TYPE: &str = "Microsoft.Network/privateEndpoints";
pub const API_VERSION: &str = "2023-11-01";

#[derive(Debug, Default, Deserialize)]
pub struct PrivateEndpoint {
    #[serde(flatten)]
    pub meta: ResourceMeta,
}

impl ArmResource for PrivateEndpoint {
    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }
}

pub fn scanner() -> GenericScanner<PrivateEndpoint> {
    GenericScanner::new("Private Endpoint", &["pep"], &[RESOURCE_TYPE], API_VERSION, rules)
}

pub fn rules() -> RecommendationSet<PrivateEndpoint> {
    recommendation_set::<PrivateEndpoint>([
        Recommendation {
            id: "pep-003",
            resource_type: RESOURCE_TYPE,
            category: Category::HighAvailability,
            impact: Impact::High,
            recommendation_type: RecommendationType::Sla,
            recommendation: "Private Endpoint SLA",
            learn_more_url: "https://www.microsoft.com/licensing/docs/view/Service-Level-Agreements-SLA-for-Online-Services",
            eval: |_, _| (false, "99.99%".to_string()),
        },
        Recommendation {
            id: "pep-006",
            resource_type: RESOURCE_TYPE,
            category: Category::Governance,
            impact: Impact::Low,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "Private Endpoint Name should comply with naming conventions",
            learn_more_url: CAF_URL,
            eval: |p: &PrivateEndpoint, _| (!caf_compliant(p.meta.name.as_deref(), "pep"), String::new()),
        },
        Recommendation {
            id: "pep-007",
            resource_type: RESOURCE_TYPE,
            category: Category::Governance,
            impact: Impact::Low,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "Private Endpoint should have tags",
            learn_more_url: TAGS_URL,
            eval: missing_tags,
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
    fn named_and_tagged_endpoint_passes() {
        let endpoint: PrivateEndpoint = parse(json!({
            "id": "/subscriptions/s/resourceGroups/r/providers/Microsoft.Network/privateEndpoints/pep-kv",
            "name": "pep-kv",
            "tags": {"env": "prod"}
        }));

        let results = evaluate(&rules(), &endpoint, &ScanContext::default());
        assert!(results.values().all(|r| !r.not_compliant));
        assert_eq!(results["pep-003"].result, "99.99%");
    }

    #[test]
    fn unnamed_untagged_endpoint_is_flagged() {
        let endpoint: PrivateEndpoint = parse(json!({"name": "kv-endpoint", "tags": {}}));

        let results = evaluate(&rules(), &endpoint, &ScanContext::default());
        assert!(results["pep-006"].not_compliant);
        assert!(results["pep-007"].not_compliant);
        assert!(!results["pep-003"].not_compliant);
    }

    #[test]
    fn bare_endpoint_is_flagged() {
        let results = evaluate(&rules(), &PrivateEndpoint::default(), &ScanContext::default());
        assert_eq!(results.len(), 3);
        assert!(results["pep-006"].not_compliant);
        assert!(results["pep-007"].not_compliant);
    }
}
