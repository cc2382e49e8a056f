use serde::Deserialize;

use super::{missing_tags, ArmResource, GenericScanner, ResourceMeta};
use crate::rules::{
    caf_compliant, recommendation_set, Category, Impact, Recommendation, RecommendationSet,
    RecommendationType, CAF_URL, TAGS_URL,
};

pub const RESOURCE_TYPE: &str = "Microsoft.Network/publicIPAddresses";
pub const API_VERSION: &str = "2023-11-01";

#[derive(Debug, Default, Deserialize)]
pub struct PublicIpAddress {
    #[serde(flatten)]
    pub meta: ResourceMeta,
}

impl ArmResource for PublicIpAddress {
    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }
}

pub fn scanner() -> GenericScanner<PublicIpAddress> {
    GenericScanner::new("Public IP", &["pip"], &[RESOURCE_TYPE], API_VERSION, rules)
}

pub fn rules() -> RecommendationSet<PublicIpAddress> {
    recommendation_set::<PublicIpAddress>([
        Recommendation {
            id: "pip-003",
            resource_type: RESOURCE_TYPE,
            category: Category::HighAvailability,
            impact: Impact::High,
            recommendation_type: RecommendationType::Sla,
            recommendation: "Public IP SLA",
            learn_more_url: "https://www.microsoft.com/licensing/docs/view/Service-Level-Agreements-SLA-for-Online-Services",
            eval: |_, _| (false, "99.99%".to_string()),
        },
        Recommendation {
            id: "pip-006",
            resource_type: RESOURCE_TYPE,
            category: Category::Governance,
            impact: Impact::Low,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "Public IP Name should comply with naming conventions",
            learn_more_url: CAF_URL,
            eval: |p: &PublicIpAddress, _| (!caf_compliant(p.meta.name.as_deref(), "pip"), String::new()),
        },
        Recommendation {
            id: "pip-007",
            resource_type: RESOURCE_TYPE,
            category: Category::Governance,
            impact: Impact::Low,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "Public IP should have tags",
            learn_more_url: TAGS_URL,
            eval: missing_tags,
        },
    ])
}
