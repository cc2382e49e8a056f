use serde::Deserialize;

use super::{missing_diagnostics, missing_tags, ArmResource, GenericScanner, ResourceMeta};
use crate::rules::{
    caf_compliant, recommendation_set, Category, Impact, Recommendation, RecommendationSet,
    RecommendationType, CAF_URL, TAGS_URL,
};

pub const RESOURCE_TYPE: &str = "Microsoft.KeyVault/vaults";
pub const API_VERSION: &str = "2023-07-01";

#[derive(Debug, Default, Deserialize)]
pub struct Vault {
    #[serde(flatten)]
    pub meta: ResourceMeta,
}

impl ArmResource for Vault {
    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }
}

pub fn scanner() -> GenericScanner<Vault> {
    GenericScanner::new("Key Vault", &["kv"], &[RESOURCE_TYPE], API_VERSION, rules)
}

pub fn rules() -> RecommendationSet<Vault> {
    recommendation_set::<Vault>([
        Recommendation {
            id: "kv-001",
            resource_type: RESOURCE_TYPE,
            category: Category::MonitoringAndAlerting,
            impact: Impact::Low,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "Key Vault should have diagnostic settings enabled",
            learn_more_url: "https://learn.microsoft.com/en-us/azure/key-vault/general/monitor-key-vault",
            eval: missing_diagnostics,
        },
        Recommendation {
            id: "kv-003",
            resource_type: RESOURCE_TYPE,
            category: Category::HighAvailability,
            impact: Impact::High,
            recommendation_type: RecommendationType::Sla,
            recommendation: "Key Vault should have a SLA",
            learn_more_url: "https://www.azure.cn/en-us/support/sla/key-vault/",
            eval: |_, _| (false, "99.99%".to_string()),
        },
        Recommendation {
            id: "kv-006",
            resource_type: RESOURCE_TYPE,
            category: Category::Governance,
            impact: Impact::Low,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "Key Vault Name should comply with naming conventions",
            learn_more_url: CAF_URL,
            eval: |v: &Vault, _| (!caf_compliant(v.meta.name.as_deref(), "kv"), String::new()),
        },
        Recommendation {
            id: "kv-007",
            resource_type: RESOURCE_TYPE,
            category: Category::Governance,
            impact: Impact::Low,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "Key Vault should have tags",
            learn_more_url: TAGS_URL,
            eval: missing_tags,
        },
    ])
}
