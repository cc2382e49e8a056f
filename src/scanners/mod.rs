//! Scanner plugins.
//!
//! A plugin is split in two: [`ServiceScanner`] is the declarative,
//! registry-held half (types, recommendations, factory), and
//! [`ResourceScanner`] is the per-subscription session returned by
//! [`ServiceScanner::init`]. A session only exists after `init`, so `scan`
//! cannot run on an uninitialised plugin.

pub mod adf;
pub mod agw;
pub mod asp;
pub mod cosmos;
pub mod cr;
pub mod generic;
pub mod kv;
pub mod pep;
pub mod pip;
pub mod registry;
pub mod sql;
pub mod st;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::context::{ScanContext, ScannerConfig};
use crate::error::Result;
use crate::resource_id;
use crate::rules::{self, RecommendationInfo, RecommendationSet, ServiceResult};

pub use generic::GenericScanner;
pub use registry::ScannerRegistry;

pub trait ServiceScanner: Send + Sync {
    /// Human-readable name, e.g. "Key Vault".
    fn name(&self) -> &'static str;

    /// Recommendation id prefixes owned by this plugin.
    fn prefixes(&self) -> &'static [&'static str];

    fn resource_types(&self) -> &'static [&'static str];

    fn recommendations(&self) -> BTreeMap<String, RecommendationInfo>;

    /// Build a session for one subscription. No I/O.
    fn init(&self, config: &ScannerConfig) -> Result<Box<dyn ResourceScanner>>;
}

#[async_trait]
pub trait ResourceScanner: Send + Sync {
    /// List every resource of the plugin's types in the subscription and
    /// evaluate the recommendations on each. All or nothing: an upstream
    /// error discards the results gathered so far.
    async fn scan(&self, ctx: &ScanContext) -> Result<Vec<ServiceResult>>;
}

/// Envelope fields every ARM resource carries.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceMeta {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(rename = "type", default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub tags: Option<HashMap<String, String>>,
}

impl ResourceMeta {
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    pub fn location(&self) -> &str {
        self.location.as_deref().unwrap_or_default()
    }

    pub fn has_tags(&self) -> bool {
        self.tags.as_ref().map(|t| !t.is_empty()).unwrap_or(false)
    }
}

pub trait ArmResource: Send + Sync {
    fn meta(&self) -> &ResourceMeta;
}

/// `sku: { name, tier }` as used by most resource providers.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Sku {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tier: Option<String>,
}

impl Sku {
    pub fn name_of(sku: &Option<Sku>) -> &str {
        sku.as_ref().and_then(|s| s.name.as_deref()).unwrap_or_default()
    }

    pub fn tier_of(sku: &Option<Sku>) -> &str {
        sku.as_ref().and_then(|s| s.tier.as_deref()).unwrap_or_default()
    }
}

/// Entry of a `privateEndpointConnections` array; only presence matters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrivateEndpointConnection {
    #[serde(default)]
    pub id: Option<String>,
}

pub fn missing_diagnostics<T: ArmResource>(resource: &T, ctx: &ScanContext) -> (bool, String) {
    (!ctx.has_diagnostics(resource.meta().id()), String::new())
}

pub fn missing_tags<T: ArmResource>(resource: &T, _ctx: &ScanContext) -> (bool, String) {
    (!resource.meta().has_tags(), String::new())
}

/// Private endpoint check against the subscription-wide index.
pub fn missing_private_endpoint<T: ArmResource>(resource: &T, ctx: &ScanContext) -> (bool, String) {
    (!ctx.has_private_endpoint(resource.meta().id()), String::new())
}

/// Evaluate `rules` on `resource` and wrap the outcome with its identity.
pub fn service_result<T: ArmResource>(
    config: &ScannerConfig,
    resource: &T,
    resource_type: &str,
    rules: &RecommendationSet<T>,
    ctx: &ScanContext,
) -> ServiceResult {
    let meta = resource.meta();
    ServiceResult {
        subscription_id: config.subscription_id.clone(),
        subscription_name: config.subscription_name.clone(),
        resource_group: resource_id::resource_group_of(meta.id()).to_string(),
        location: meta.location().to_string(),
        resource_type: resource_type.to_string(),
        service_name: meta.name().to_string(),
        recommendations: rules::evaluate(rules, resource, ctx),
    }
}

pub(crate) fn log_scan_start(config: &ScannerConfig, scanner: &str) {
    tracing::info!(
        subscription = %config.masked_scope(),
        scanner,
        "scanning"
    );
}

/// Every built-in plugin, keyed the way the CLI selects them.
pub fn build_registry() -> ScannerRegistry {
    let mut registry = ScannerRegistry::new();
    registry.register("adf", Arc::new(adf::scanner()));
    registry.register("agw", Arc::new(agw::scanner()));
    registry.register("asp", Arc::new(asp::plan_scanner()));
    registry.register("asp", Arc::new(asp::SiteScanner));
    registry.register("cosmos", Arc::new(cosmos::scanner()));
    registry.register("cr", Arc::new(cr::scanner()));
    registry.register("kv", Arc::new(kv::scanner()));
    registry.register("pep", Arc::new(pep::scanner()));
    registry.register("pip", Arc::new(pip::scanner()));
    registry.register("sql", Arc::new(sql::SqlScanner));
    registry.register("st", Arc::new(st::StorageScanner));
    registry
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Bare {
        #[serde(flatten)]
        meta: ResourceMeta,
    }

    impl ArmResource for Bare {
        fn meta(&self) -> &ResourceMeta {
            &self.meta
        }
    }

    #[test]
    fn empty_shell_has_no_identity() {
        let bare: Bare = serde_json::from_value(json!({})).unwrap();
        assert_eq!(bare.meta().id(), "");
        assert!(!bare.meta().has_tags());
        let (missing, _) = missing_diagnostics(&bare, &ScanContext::default());
        assert!(missing);
    }

    #[test]
    fn empty_tag_map_counts_as_untagged() {
        let bare: Bare = serde_json::from_value(json!({"tags": {}})).unwrap();
        assert!(missing_tags(&bare, &ScanContext::default()).0);
        let tagged: Bare = serde_json::from_value(json!({"tags": {"env": "prod"}})).unwrap();
        assert!(!missing_tags(&tagged, &ScanContext::default()).0);
    }

    #[test]
    fn registry_holds_every_key() {
        let registry = build_registry();
        assert_eq!(
            registry.keys(),
            vec!["adf", "agw", "asp", "cosmos", "cr", "kv", "pep", "pip", "sql", "st"]
        );
        assert_eq!(registry.lookup("asp").len(), 2);
    }

    #[test]
    fn recommendation_ids_are_unique_and_prefixed() {
        build_registry().validate().unwrap();
    }

    fn on_empty<T: serde::de::DeserializeOwned>(
        rules: RecommendationSet<T>,
        results: &mut BTreeMap<String, rules::RecommendationResult>,
    ) {
        let shell: T = test_support::parse(json!({}));
        results.extend(rules::evaluate(&rules, &shell, &ScanContext::default()));
    }

    #[test]
    fn every_recommendation_survives_an_empty_resource() {
        let ctx = ScanContext::default();
        let mut results = BTreeMap::new();
        on_empty(adf::rules(), &mut results);
        on_empty(agw::rules(), &mut results);
        on_empty(asp::plan_rules(), &mut results);
        on_empty(cosmos::rules(), &mut results);
        on_empty(cr::rules(), &mut results);
        on_empty(kv::rules(), &mut results);
        on_empty(pep::rules(), &mut results);
        on_empty(pip::rules(), &mut results);
        on_empty(sql::server_rules(), &mut results);
        on_empty(sql::database_rules(), &mut results);

        let site = asp::SiteTarget {
            site: test_support::parse(json!({})),
            config: None,
        };
        for set in [asp::app_rules(), asp::function_rules(), asp::logic_rules()] {
            results.extend(rules::evaluate(&set, &site, &ctx));
        }
        let storage = st::StorageTarget {
            account: test_support::parse(json!({})),
            blob: None,
        };
        results.extend(rules::evaluate(&st::rules(), &storage, &ctx));

        let declared: Vec<String> = build_registry().recommendations().into_keys().collect();
        let evaluated: Vec<String> = results.keys().cloned().collect();
        assert_eq!(evaluated, declared);
        for (id, result) in &results {
            assert_ne!(result.result, rules::EVAL_FAILED, "{id} panicked on an empty resource");
        }
    }

    #[test]
    fn every_scanner_declares_types_and_rules() {
        let registry = build_registry();
        for key in registry.keys() {
            for scanner in registry.lookup(&key) {
                assert!(!scanner.resource_types().is_empty(), "{key}");
                assert!(!scanner.recommendations().is_empty(), "{key}");
            }
        }
    }
}
