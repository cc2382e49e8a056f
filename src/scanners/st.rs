//! Storage accounts.
//!
//! The account's blob service properties are read with one extra GET per
//! account. A failed read leaves them unknown and soft-delete is then not
//! reported.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;

use super::{
    log_scan_start, missing_diagnostics, missing_tags, service_result, ArmResource, ResourceMeta,
    ResourceScanner, ServiceScanner, Sku,
};
use crate::context::{ScanContext, ScannerConfig};
use crate::error::{Result, ScanError};
use crate::rules::{
    self, caf_compliant, recommendation_set, Category, Impact, Recommendation,
    RecommendationInfo, RecommendationSet, RecommendationType, ServiceResult, CAF_URL, TAGS_URL,
};
use crate::upstream::{collect_all, get_typed, ArmPager};

pub const RESOURCE_TYPE: &str = "Microsoft.Storage/storageAccounts";
pub const API_VERSION: &str = "2023-05-01";

#[derive(Debug, Default, Deserialize)]
pub struct StorageAccount {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    #[serde(default)]
    pub sku: Option<Sku>,
    #[serde(default)]
    pub properties: Option<AccountProperties>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountProperties {
    #[serde(default)]
    pub access_tier: Option<String>,
    #[serde(default)]
    pub supports_https_traffic_only: Option<bool>,
    #[serde(rename = "minimumTlsVersion", default)]
    pub minimum_tls_version: Option<String>,
    #[serde(default)]
    pub immutable_storage_with_versioning: Option<Enabled>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Enabled {
    #[serde(default)]
    pub enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BlobServiceProperties {
    #[serde(default)]
    pub properties: Option<BlobServiceSettings>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobServiceSettings {
    #[serde(default)]
    pub container_delete_retention_policy: Option<Enabled>,
}

/// An account and, when readable, its default blob service.
#[derive(Debug, Default)]
pub struct StorageTarget {
    pub account: StorageAccount,
    pub blob: Option<BlobServiceProperties>,
}

impl ArmResource for StorageTarget {
    fn meta(&self) -> &ResourceMeta {
        &self.account.meta
    }
}

impl StorageTarget {
    fn properties(&self) -> Option<&AccountProperties> {
        self.account.properties.as_ref()
    }
}

fn storage_sla(target: &StorageTarget) -> &'static str {
    let sku = Sku::name_of(&target.account.sku);
    let hot = target
        .properties()
        .and_then(|p| p.access_tier.as_deref())
        .map(|t| t.contains("Hot"))
        .unwrap_or(false);
    let redundant = ["LRS", "ZRS", "GRS"].iter().any(|r| sku.contains(r));
    match (sku.contains("RAGRS"), hot) {
        (true, true) => "99.99%",
        (true, false) => "99.9%",
        (false, true) if redundant => "99.9%",
        _ => "99%",
    }
}

fn soft_delete_disabled(target: &StorageTarget) -> bool {
    match &target.blob {
        None => false,
        Some(blob) => {
            let enabled = blob
                .properties
                .as_ref()
                .and_then(|p| p.container_delete_retention_policy.as_ref())
                .and_then(|p| p.enabled);
            enabled != Some(true)
        }
    }
}

pub fn rules() -> RecommendationSet<StorageTarget> {
    recommendation_set::<StorageTarget>([
        Recommendation {
            id: "st-001",
            resource_type: RESOURCE_TYPE,
            category: Category::MonitoringAndAlerting,
            impact: Impact::Low,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "Storage should have diagnostic settings enabled",
            learn_more_url: "https://learn.microsoft.com/en-us/azure/storage/blobs/monitor-blob-storage",
            eval: missing_diagnostics,
        },
        Recommendation {
            id: "st-003",
            resource_type: RESOURCE_TYPE,
            category: Category::HighAvailability,
            impact: Impact::High,
            recommendation_type: RecommendationType::Sla,
            recommendation: "Storage should have a SLA",
            learn_more_url: "https://www.azure.cn/en-us/support/sla/storage/",
            eval: |s, _| (false, storage_sla(s).to_string()),
        },
        Recommendation {
            id: "st-005",
            resource_type: RESOURCE_TYPE,
            category: Category::HighAvailability,
            impact: Impact::High,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "Storage SKU",
            learn_more_url: "https://learn.microsoft.com/en-us/rest/api/storagerp/srp_sku_types",
            eval: |s, _| (false, Sku::name_of(&s.account.sku).to_string()),
        },
        Recommendation {
            id: "st-006",
            resource_type: RESOURCE_TYPE,
            category: Category::Governance,
            impact: Impact::Low,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "Storage Name should comply with naming conventions",
            learn_more_url: CAF_URL,
            eval: |s, _| (!caf_compliant(s.account.meta.name.as_deref(), "st"), String::new()),
        },
        Recommendation {
            id: "st-007",
            resource_type: RESOURCE_TYPE,
            category: Category::Security,
            impact: Impact::High,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "Storage Account should use HTTPS only",
            learn_more_url: "https://learn.microsoft.com/en-us/azure/storage/common/storage-require-secure-transfer",
            eval: |s, _| {
                let https = s.properties().and_then(|p| p.supports_https_traffic_only);
                (https != Some(true), String::new())
            },
        },
        Recommendation {
            id: "st-008",
            resource_type: RESOURCE_TYPE,
            category: Category::Governance,
            impact: Impact::Low,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "Storage Account should have tags",
            learn_more_url: TAGS_URL,
            eval: missing_tags,
        },
        Recommendation {
            id: "st-009",
            resource_type: RESOURCE_TYPE,
            category: Category::Security,
            impact: Impact::Low,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "Storage Account should enforce TLS >= 1.2",
            learn_more_url: "https://learn.microsoft.com/en-us/azure/storage/common/transport-layer-security-configure-minimum-version?tabs=portal",
            eval: |s, _| {
                let tls = s.properties().and_then(|p| p.minimum_tls_version.as_deref());
                (tls != Some("TLS1_2"), String::new())
            },
        },
        Recommendation {
            id: "st-010",
            resource_type: RESOURCE_TYPE,
            category: Category::DisasterRecovery,
            impact: Impact::Low,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "Storage Account should have inmutable storage versioning enabled",
            learn_more_url: "https://learn.microsoft.com/en-us/azure/well-architected/service-guides/storage-accounts/reliability",
            eval: |s, _| {
                let enabled = s
                    .properties()
                    .and_then(|p| p.immutable_storage_with_versioning.as_ref())
                    .and_then(|v| v.enabled);
                (enabled != Some(true), String::new())
            },
        },
        Recommendation {
            id: "st-011",
            resource_type: RESOURCE_TYPE,
            category: Category::DisasterRecovery,
            impact: Impact::Medium,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "Storage Account should have soft delete enabled",
            learn_more_url: "https://learn.microsoft.com/en-us/azure/well-architected/service-guides/storage-accounts/reliability",
            eval: |s, _| (soft_delete_disabled(s), String::new()),
        },
    ])
}

pub struct StorageScanner;

impl ServiceScanner for StorageScanner {
    fn name(&self) -> &'static str {
        "Storage Account"
    }

    fn prefixes(&self) -> &'static [&'static str] {
        &["st"]
    }

    fn resource_types(&self) -> &'static [&'static str] {
        &[RESOURCE_TYPE]
    }

    fn recommendations(&self) -> BTreeMap<String, RecommendationInfo> {
        rules::describe(&rules())
    }

    fn init(&self, config: &ScannerConfig) -> Result<Box<dyn ResourceScanner>> {
        Ok(Box::new(StorageSession {
            config: config.clone(),
            rules: rules(),
        }))
    }
}

struct StorageSession {
    config: ScannerConfig,
    rules: RecommendationSet<StorageTarget>,
}

impl StorageSession {
    async fn blob_properties(&self, account: &StorageAccount) -> Result<Option<BlobServiceProperties>> {
        let id = account.meta.id();
        if id.is_empty() {
            return Ok(None);
        }
        let path = format!("{id}/blobServices/default");
        match get_typed(self.config.client.as_ref(), &path, API_VERSION, &self.config.cancel).await {
            Ok(blob) => Ok(Some(blob)),
            Err(ScanError::Cancelled) => Err(ScanError::Cancelled),
            Err(e) => {
                tracing::debug!(account = account.meta.name(), error = %e, "blob service properties unavailable");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl ResourceScanner for StorageSession {
    async fn scan(&self, ctx: &ScanContext) -> Result<Vec<ServiceResult>> {
        log_scan_start(&self.config, "Storage Account");

        let mut pager = ArmPager::<StorageAccount>::list(
            self.config.client.clone(),
            &self.config.provider_path(RESOURCE_TYPE),
            API_VERSION,
        );
        let accounts = collect_all(&mut pager, &self.config.cancel).await?;

        let mut results = Vec::with_capacity(accounts.len());
        for account in accounts {
            let blob = self.blob_properties(&account).await?;
            let target = StorageTarget { account, blob };
            results.push(service_result(&self.config, &target, RESOURCE_TYPE, &self.rules, ctx));
        }
        Ok(results)
    }
}
