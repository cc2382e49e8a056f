use serde::Deserialize;

use super::{
    missing_diagnostics, missing_private_endpoint, missing_tags, ArmResource, GenericScanner,
    ResourceMeta,
};
use crate::rules::{
    caf_compliant, recommendation_set, Category, Impact, Recommendation, RecommendationSet,
    RecommendationType, CAF_URL, TAGS_URL,
};

pub const RESOURCE_TYPE: &str = "Microsoft.DataFactory/factories";
pub const API_VERSION: &str = "2018-06-01";

#[derive(Debug, Default, Deserialize)]
pub struct Factory {
    #[serde(flatten)]
    pub meta: ResourceMeta,
}

impl ArmResource for Factory {
    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }
}

pub fn scanner() -> GenericScanner<Factory> {
    GenericScanner::new("Data Factory", &["adf"], &[RESOURCE_TYPE], API_VERSION, rules)
}

pub fn rules() -> RecommendationSet<Factory> {
    recommendation_set::<Factory>([
        Recommendation {
            id: "adf-001",
            resource_type: RESOURCE_TYPE,
            category: Category::MonitoringAndAlerting,
            impact: Impact::Low,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "Azure Data Factory should have diagnostic settings enabled",
            learn_more_url: "https://learn.microsoft.com/en-us/azure/data-factory/monitor-configure-diagnostics",
            eval: missing_diagnostics,
        },
        Recommendation {
            id: "adf-002",
            resource_type: RESOURCE_TYPE,
            category: Category::Security,
            impact: Impact::High,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "Azure Data Factory should have private endpoints enabled",
            learn_more_url: "https://learn.microsoft.com/en-us/azure/data-factory/data-factory-private-link",
            eval: missing_private_endpoint,
        },
        Recommendation {
            id: "adf-003",
            resource_type: RESOURCE_TYPE,
            category: Category::HighAvailability,
            impact: Impact::High,
            recommendation_type: RecommendationType::Sla,
            recommendation: "Azure Data Factory SLA",
            learn_more_url: "https://www.microsoft.com/licensing/docs/view/Service-Level-Agreements-SLA-for-Online-Services",
            eval: |_, _| (false, "99.99%".to_string()),
        },
        Recommendation {
            id: "adf-004",
            resource_type: RESOURCE_TYPE,
            category: Category::Governance,
            impact: Impact::Low,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "Azure Data Factory Name should comply with naming conventions",
            learn_more_url: CAF_URL,
            eval: |f: &Factory, _| (!caf_compliant(f.meta.name.as_deref(), "adf"), String::new()),
        },
        Recommendation {
            id: "adf-005",
            resource_type: RESOURCE_TYPE,
            category: Category::Governance,
            impact: Impact::Low,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "Azure Data Factory should have tags",
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
    fn private_endpoint_comes_from_the_index() {
        let factory: Factory = parse(json!({
            "id": "/subscriptions/s/resourceGroups/r/providers/Microsoft.DataFactory/factories/ADF-Main",
            "name": "ADF-Main"
        }));
        let mut ctx = ScanContext::default();
        ctx.private_endpoints
            .insert("/subscriptions/s/resourcegroups/r/providers/microsoft.datafactory/factories/adf-main", ());

        let results = evaluate(&rules(), &factory, &ctx);
        assert!(!results["adf-002"].not_compliant);
        // CAF abbreviations are case-sensitive
        assert!(results["adf-004"].not_compliant);
        assert_eq!(results["adf-003"].result, "99.99%");
    }
}
