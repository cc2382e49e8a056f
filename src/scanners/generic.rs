use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use super::{log_scan_start, service_result, ArmResource, ResourceScanner, ServiceScanner};
use crate::context::{ScanContext, ScannerConfig};
use crate::error::Result;
use crate::rules::{self, RecommendationInfo, RecommendationSet, ServiceResult};
use crate::upstream::{collect_all, ArmPager};

/// Plugin for a single top-level resource type listed subscription-wide.
pub struct GenericScanner<T> {
    name: &'static str,
    prefixes: &'static [&'static str],
    resource_types: &'static [&'static str],
    api_version: &'static str,
    rules: fn() -> RecommendationSet<T>,
}

impl<T> GenericScanner<T> {
    /// `resource_types[0]` is the listed type.
    pub fn new(
        name: &'static str,
        prefixes: &'static [&'static str],
        resource_types: &'static [&'static str],
        api_version: &'static str,
        rules: fn() -> RecommendationSet<T>,
    ) -> Self {
        Self {
            name,
            prefixes,
            resource_types,
            api_version,
            rules,
        }
    }
}

impl<T> ServiceScanner for GenericScanner<T>
where
    T: ArmResource + DeserializeOwned + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn prefixes(&self) -> &'static [&'static str] {
        self.prefixes
    }

    fn resource_types(&self) -> &'static [&'static str] {
        self.resource_types
    }

    fn recommendations(&self) -> BTreeMap<String, RecommendationInfo> {
        rules::describe(&(self.rules)())
    }

    fn init(&self, config: &ScannerConfig) -> Result<Box<dyn ResourceScanner>> {
        Ok(Box::new(GenericSession {
            config: config.clone(),
            name: self.name,
            resource_type: self.resource_types.first().copied().unwrap_or_default(),
            api_version: self.api_version,
            rules: (self.rules)(),
        }))
    }
}

struct GenericSession<T> {
    config: ScannerConfig,
    name: &'static str,
    resource_type: &'static str,
    api_version: &'static str,
    rules: RecommendationSet<T>,
}

#[async_trait]
impl<T> ResourceScanner for GenericSession<T>
where
    T: ArmResource + DeserializeOwned + 'static,
{
    async fn scan(&self, ctx: &ScanContext) -> Result<Vec<ServiceResult>> {
        log_scan_start(&self.config, self.name);

        let mut pager = ArmPager::<T>::list(
            self.config.client.clone(),
            &self.config.provider_path(self.resource_type),
            self.api_version,
        );
        let resources = collect_all(&mut pager, &self.config.cancel).await?;

        Ok(resources
            .iter()
            .map(|r| service_result(&self.config, r, self.resource_type, &self.rules, ctx))
            .collect())
    }
}
