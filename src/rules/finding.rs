use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::resource_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    HighAvailability,
    MonitoringAndAlerting,
    Scalability,
    DisasterRecovery,
    Security,
    Governance,
    OtherBestPractices,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HighAvailability => write!(f, "High Availability"),
            Self::MonitoringAndAlerting => write!(f, "Monitoring and Alerting"),
            Self::Scalability => write!(f, "Scalability"),
            Self::DisasterRecovery => write!(f, "Disaster Recovery"),
            Self::Security => write!(f, "Security"),
            Self::Governance => write!(f, "Governance"),
            Self::OtherBestPractices => write!(f, "Other Best Practices"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Impact {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Impact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "Low"),
            Self::Medium => write!(f, "Medium"),
            Self::High => write!(f, "High"),
        }
    }
}

/// SLA recommendations report an observed value and are never non-compliant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecommendationType {
    #[default]
    Recommendation,
    #[serde(rename = "SLA")]
    Sla,
}

impl std::fmt::Display for RecommendationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Recommendation => write!(f, "Recommendation"),
            Self::Sla => write!(f, "SLA"),
        }
    }
}

/// Declarative part of a recommendation, used for `list-rules` output and
/// SARIF rule metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationInfo {
    pub id: String,
    pub resource_type: String,
    pub category: Category,
    pub impact: Impact,
    pub recommendation_type: RecommendationType,
    pub recommendation: String,
    pub learn_more_url: String,
}

/// Outcome of one recommendation on one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationResult {
    pub id: String,
    pub resource_type: String,
    pub category: Category,
    pub impact: Impact,
    pub recommendation_type: RecommendationType,
    pub recommendation: String,
    pub learn_more_url: String,
    pub not_compliant: bool,
    /// Observed value (e.g. `"99.95%"`) or empty.
    pub result: String,
}

impl RecommendationResult {
    pub fn from_info(info: RecommendationInfo, not_compliant: bool, result: String) -> Self {
        Self {
            id: info.id,
            resource_type: info.resource_type,
            category: info.category,
            impact: info.impact,
            recommendation_type: info.recommendation_type,
            recommendation: info.recommendation,
            learn_more_url: info.learn_more_url,
            not_compliant,
            result,
        }
    }
}

/// All recommendation outcomes for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceResult {
    pub subscription_id: String,
    pub subscription_name: String,
    pub resource_group: String,
    pub location: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub service_name: String,
    pub recommendations: BTreeMap<String, RecommendationResult>,
}

impl ServiceResult {
    /// Canonical lower-cased resource id rebuilt from the identity fields.
    pub fn resource_id(&self) -> String {
        resource_id::canonical(
            &self.subscription_id,
            &self.resource_group,
            &self.resource_type,
            &self.service_name,
        )
    }

    /// `/subscriptions/{sub}/resourcegroups/{rg}`, lower-cased.
    pub fn resource_group_id(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}",
            self.subscription_id, self.resource_group
        )
        .to_lowercase()
    }

    pub fn non_compliant(&self) -> impl Iterator<Item = &RecommendationResult> {
        self.recommendations.values().filter(|r| r.not_compliant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ServiceResult {
        ServiceResult {
            subscription_id: "SUB".into(),
            subscription_name: "Contoso".into(),
            resource_group: "RG-App".into(),
            location: "westeurope".into(),
            resource_type: "Microsoft.KeyVault/vaults".into(),
            service_name: "KV-One".into(),
            recommendations: BTreeMap::new(),
        }
    }

    #[test]
    fn canonical_resource_id() {
        let result = sample();
        assert_eq!(
            result.resource_id(),
            "/subscriptions/sub/resourcegroups/rg-app/providers/microsoft.keyvault/vaults/kv-one"
        );
        assert_eq!(result.resource_group_id(), "/subscriptions/sub/resourcegroups/rg-app");
    }

    #[test]
    fn serializes_with_wire_names() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["type"], "Microsoft.KeyVault/vaults");
        assert_eq!(json["subscriptionId"], "SUB");
        assert_eq!(json["serviceName"], "KV-One");
    }

    #[test]
    fn sla_type_serializes_upper_case() {
        assert_eq!(serde_json::to_string(&RecommendationType::Sla).unwrap(), "\"SLA\"");
        assert_eq!(RecommendationType::Sla.to_string(), "SLA");
        assert_eq!(Category::MonitoringAndAlerting.to_string(), "Monitoring and Alerting");
    }
}
