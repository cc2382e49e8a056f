use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};
use crate::resource_id;

/// On-disk filter file, YAML:
///
/// ```yaml
/// azqr:
///   include: { subscriptions: [...], resourceGroups: [...] }
///   exclude: { subscriptions: [...], resourceGroups: [...], services: [...], recommendations: [...] }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterFile {
    #[serde(default)]
    pub azqr: FilterSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(default)]
    pub include: IncludeFilter,
    #[serde(default)]
    pub exclude: ExcludeFilter,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncludeFilter {
    #[serde(default)]
    pub subscriptions: Vec<String>,
    #[serde(default)]
    pub resource_groups: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExcludeFilter {
    #[serde(default)]
    pub subscriptions: Vec<String>,
    #[serde(default)]
    pub resource_groups: Vec<String>,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// Compiled include/exclude sets. Every entry is stored lower-cased and
/// every lookup lower-cases its input.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    include_subscriptions: HashSet<String>,
    include_resource_groups: HashSet<String>,
    exclude_subscriptions: HashSet<String>,
    exclude_resource_groups: HashSet<String>,
    exclude_services: HashSet<String>,
    exclude_recommendations: HashSet<String>,
    /// `None` means every resource type is in scope.
    resource_types: Option<HashSet<String>>,
}

impl Filters {
    /// Load a filter file. Returns empty filters if no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path).map_err(|e| {
            ScanError::Filter(format!("failed reading {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        // An empty document deserializes to unit, not to the struct.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let file: FilterFile = serde_yaml::from_str(content)?;
        Self::compile(&file)
    }

    pub fn compile(file: &FilterFile) -> Result<Self> {
        let spec = &file.azqr;
        for id in spec
            .include
            .resource_groups
            .iter()
            .chain(&spec.exclude.resource_groups)
        {
            resource_id::validate_resource_group_id(id).map_err(ScanError::Filter)?;
        }

        let mut filters = Self::default();
        for id in &spec.include.subscriptions {
            filters.include_subscription(id);
        }
        for id in &spec.include.resource_groups {
            filters.include_resource_group(id);
        }
        filters.exclude_subscriptions = lowered(&spec.exclude.subscriptions);
        filters.exclude_resource_groups = lowered(&spec.exclude.resource_groups);
        filters.exclude_services = lowered(&spec.exclude.services);
        filters.exclude_recommendations = lowered(&spec.exclude.recommendations);

        tracing::debug!(
            include_subscriptions = filters.include_subscriptions.len(),
            include_resource_groups = filters.include_resource_groups.len(),
            exclude_subscriptions = filters.exclude_subscriptions.len(),
            exclude_resource_groups = filters.exclude_resource_groups.len(),
            exclude_services = filters.exclude_services.len(),
            exclude_recommendations = filters.exclude_recommendations.len(),
            "filters loaded"
        );
        Ok(filters)
    }

    pub fn include_subscription(&mut self, subscription_id: &str) -> &mut Self {
        self.include_subscriptions
            .insert(resource_id::normalize(subscription_id));
        self
    }

    pub fn include_resource_group(&mut self, resource_group_id: &str) -> &mut Self {
        self.include_resource_groups
            .insert(resource_id::normalize(resource_group_id));
        self
    }

    pub fn exclude_subscription(&mut self, subscription_id: &str) -> &mut Self {
        self.exclude_subscriptions
            .insert(resource_id::normalize(subscription_id));
        self
    }

    pub fn exclude_resource_group(&mut self, resource_group_id: &str) -> &mut Self {
        self.exclude_resource_groups
            .insert(resource_id::normalize(resource_group_id));
        self
    }

    pub fn exclude_service(&mut self, resource_id: &str) -> &mut Self {
        self.exclude_services
            .insert(resource_id::normalize(resource_id));
        self
    }

    pub fn exclude_recommendation(&mut self, recommendation_id: &str) -> &mut Self {
        self.exclude_recommendations
            .insert(resource_id::normalize(recommendation_id));
        self
    }

    /// Limit results to the resource types credited to the selected scanners.
    pub fn restrict_resource_types<'a>(&mut self, types: impl IntoIterator<Item = &'a str>) {
        self.resource_types = Some(types.into_iter().map(resource_id::normalize).collect());
    }

    /// Explicitly included subscriptions, lower-cased.
    pub fn included_subscriptions(&self) -> &HashSet<String> {
        &self.include_subscriptions
    }

    /// Excluded only when listed in `exclude` and not listed in `include`.
    pub fn is_subscription_excluded(&self, subscription_id: &str) -> bool {
        let id = resource_id::normalize(subscription_id);
        self.exclude_subscriptions.contains(&id) && !self.include_subscriptions.contains(&id)
    }

    /// Include wins; a non-empty include set is an implicit whitelist;
    /// otherwise membership in the exclude set decides.
    pub fn is_resource_group_excluded(&self, resource_group_id: &str) -> bool {
        let id = resource_id::normalize(resource_group_id);
        if self.include_resource_groups.contains(&id) {
            return false;
        }
        if !self.include_resource_groups.is_empty() {
            return true;
        }
        self.exclude_resource_groups.contains(&id)
    }

    pub fn is_service_excluded(&self, resource_id: &str) -> bool {
        let rg_id = resource_id::resource_group_id_of(resource_id);
        let excluded = self.is_resource_group_excluded(&rg_id)
            || self
                .exclude_services
                .contains(&resource_id::normalize(resource_id));
        if excluded {
            tracing::debug!(resource = resource_id, "service is excluded");
        }
        excluded
    }

    pub fn is_recommendation_excluded(&self, recommendation_id: &str) -> bool {
        self.exclude_recommendations
            .contains(&resource_id::normalize(recommendation_id))
    }

    pub fn is_resource_type_included(&self, resource_type: &str) -> bool {
        match &self.resource_types {
            Some(types) => types.contains(&resource_id::normalize(resource_type)),
            None => true,
        }
    }
}

fn lowered(ids: &[String]) -> HashSet<String> {
    ids.iter().map(|id| resource_id::normalize(id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;

    const YAML: &str = r#"
azqr:
  include:
    subscriptions: ["AAAA-1111"]
    resourceGroups: ["/subscriptions/aaaa-1111/resourceGroups/Kept"]
  exclude:
    subscriptions: ["bbbb-2222", "aaaa-1111"]
    resourceGroups: ["/subscriptions/aaaa-1111/resourceGroups/kept"]
    services: ["/subscriptions/aaaa-1111/resourceGroups/kept/providers/Microsoft.KeyVault/vaults/KV-Noisy"]
    recommendations: ["KV-003"]
"#;

    #[test]
    fn parses_yaml_filter_file() {
        let filters = Filters::from_yaml_str(YAML).unwrap();
        assert!(filters.is_recommendation_excluded("kv-003"));
        assert!(filters.is_subscription_excluded("BBBB-2222"));
        assert!(filters
            .is_service_excluded("/subscriptions/aaaa-1111/resourceGroups/kept/providers/Microsoft.KeyVault/vaults/kv-noisy"));
    }

    #[test]
    fn include_wins_for_subscriptions() {
        let filters = Filters::from_yaml_str(YAML).unwrap();
        assert!(!filters.is_subscription_excluded("aaaa-1111"));
    }

    #[test]
    fn include_wins_for_resource_groups() {
        let mut filters = Filters::default();
        filters
            .include_resource_group("/subscriptions/s/resourcegroups/kept")
            .exclude_resource_group("/subscriptions/s/resourcegroups/kept");
        assert!(!filters.is_resource_group_excluded("/subscriptions/s/resourcegroups/kept"));
    }

    #[test]
    fn include_set_is_an_implicit_whitelist() {
        let mut filters = Filters::default();
        filters.include_resource_group("/subscriptions/s/resourceGroups/kept");
        assert!(filters.is_resource_group_excluded("/subscriptions/s/resourceGroups/other"));
        assert!(!filters.is_resource_group_excluded("/SUBSCRIPTIONS/S/RESOURCEGROUPS/KEPT"));
    }

    #[test]
    fn exclude_set_applies_without_includes() {
        let mut filters = Filters::default();
        filters.exclude_resource_group("/subscriptions/s/resourceGroups/drop");
        assert!(filters.is_resource_group_excluded("/subscriptions/s/resourcegroups/DROP"));
        assert!(!filters.is_resource_group_excluded("/subscriptions/s/resourcegroups/keep"));
    }

    #[test]
    fn service_excluded_by_its_resource_group() {
        let mut filters = Filters::default();
        filters.exclude_resource_group("/subscriptions/s/resourceGroups/drop");
        assert!(filters.is_service_excluded(
            "/subscriptions/s/resourceGroups/drop/providers/Microsoft.Web/sites/app-1"
        ));
    }

    #[test]
    fn rejects_malformed_resource_group_ids() {
        let yaml = "azqr:\n  exclude:\n    resourceGroups: [\"rg-without-prefix\"]\n";
        let err = Filters::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, ScanError::Filter(_)));
    }

    #[test]
    fn rejects_malformed_yaml() {
        let err = Filters::from_yaml_str("azqr: [unterminated").unwrap_err();
        assert!(matches!(err, ScanError::Yaml(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn empty_file_means_no_filters() {
        let filters = Filters::from_yaml_str("").unwrap();
        assert!(!filters.is_resource_group_excluded("/subscriptions/s/resourceGroups/any"));
        assert!(filters.is_resource_type_included("Microsoft.Web/sites"));
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(YAML.as_bytes()).unwrap();
        let filters = Filters::load(Some(file.path())).unwrap();
        assert!(filters.included_subscriptions().contains("aaaa-1111"));
    }

    #[test]
    fn missing_file_is_a_filter_error() {
        let err = Filters::load(Some(Path::new("/nonexistent/filters.yaml"))).unwrap_err();
        assert!(matches!(err, ScanError::Filter(_)));
    }

    #[test]
    fn resource_type_restriction() {
        let mut filters = Filters::default();
        filters.restrict_resource_types(["Microsoft.KeyVault/vaults"]);
        assert!(filters.is_resource_type_included("microsoft.keyvault/VAULTS"));
        assert!(!filters.is_resource_type_included("Microsoft.Web/sites"));
    }

    proptest! {
        #[test]
        fn include_always_beats_exclude(rg in "[a-z0-9-]{1,20}", upper in any::<bool>()) {
            let id = format!("/subscriptions/s/resourcegroups/{rg}");
            let mut filters = Filters::default();
            filters.include_resource_group(&id).exclude_resource_group(&id);
            let candidate = if upper { id.to_uppercase() } else { id.clone() };
            prop_assert!(!filters.is_resource_group_excluded(&candidate));

            let mut subs = Filters::default();
            subs.include_subscription(&rg).exclude_subscription(&rg);
            prop_assert!(!subs.is_subscription_excluded(&rg));
        }

        #[test]
        fn service_exclusion_decomposes(rg in "[a-z0-9]{1,12}", name in "[a-z0-9]{1,12}", drop_rg in any::<bool>(), drop_svc in any::<bool>()) {
            let rg_id = format!("/subscriptions/s/resourceGroups/{rg}");
            let id = format!("{rg_id}/providers/Microsoft.KeyVault/vaults/{name}");
            let mut filters = Filters::default();
            if drop_rg {
                filters.exclude_resource_group(&rg_id);
            }
            if drop_svc {
                filters.exclude_service(&id);
            }
            let expected = filters.is_resource_group_excluded(&resource_id::resource_group_id_of(&id))
                || drop_svc;
            prop_assert_eq!(filters.is_service_excluded(&id), expected);
        }
    }
}
