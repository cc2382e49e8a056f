//! App Service: plans, plus web, function and logic apps.
//!
//! Sites share one resource type and are told apart by `kind`. Their
//! `config/web` document is fetched per site by the site session and
//! evaluated together with the site; it never enters the shared context.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;

use super::{
    log_scan_start, missing_diagnostics, missing_private_endpoint, missing_tags, service_result,
    ArmResource, GenericScanner, ResourceMeta, ResourceScanner, ServiceScanner, Sku,
};
use crate::context::{ScanContext, ScannerConfig};
use crate::error::Result;
use crate::rules::{
    self, caf_compliant, recommendation_set, Category, EvalFn, Impact, Recommendation,
    RecommendationInfo, RecommendationSet, RecommendationType, ServiceResult, CAF_URL, TAGS_URL,
};
use crate::upstream::{collect_all, get_typed, ArmPager};

pub const PLAN_TYPE: &str = "Microsoft.Web/serverfarms";
pub const SITE_TYPE: &str = "Microsoft.Web/sites";
pub const API_VERSION: &str = "2023-12-01";

#[derive(Debug, Default, Deserialize)]
pub struct Plan {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    #[serde(default)]
    pub sku: Option<Sku>,
}

impl ArmResource for Plan {
    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }
}

/// Free and Shared plans carry no SLA. A plan without a tier is treated the
/// same way.
fn plan_sla(plan: &Plan) -> &'static str {
    match Sku::tier_of(&plan.sku) {
        "" | "Free" | "Shared" => "None",
        _ => "99.95%",
    }
}

pub fn plan_scanner() -> GenericScanner<Plan> {
    GenericScanner::new("App Service Plan", &["asp"], &[PLAN_TYPE], API_VERSION, plan_rules)
}

pub fn plan_rules() -> RecommendationSet<Plan> {
    recommendation_set::<Plan>([
        Recommendation {
            id: "asp-001",
            resource_type: PLAN_TYPE,
            category: Category::MonitoringAndAlerting,
            impact: Impact::Low,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "Plan should have diagnostic settings enabled",
            learn_more_url: "https://learn.microsoft.com/en-us/azure/app-service/troubleshoot-diagnostic-logs",
            eval: missing_diagnostics,
        },
        Recommendation {
            id: "asp-003",
            resource_type: PLAN_TYPE,
            category: Category::HighAvailability,
            impact: Impact::High,
            recommendation_type: RecommendationType::Sla,
            recommendation: "Plan should have a SLA",
            learn_more_url: "https://www.azure.cn/en-us/support/sla/app-service/",
            eval: |p, _| {
                let sla = plan_sla(p);
                (sla == "None", sla.to_string())
            },
        },
        Recommendation {
            id: "asp-005",
            resource_type: PLAN_TYPE,
            category: Category::HighAvailability,
            impact: Impact::High,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "Plan SKU",
            learn_more_url: "https://learn.microsoft.com/en-us/azure/app-service/overview-hosting-plans",
            eval: |p, _| (false, Sku::name_of(&p.sku).to_string()),
        },
        Recommendation {
            id: "asp-006",
            resource_type: PLAN_TYPE,
            category: Category::Governance,
            impact: Impact::Low,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "Plan Name should comply with naming conventions",
            learn_more_url: CAF_URL,
            eval: |p, _| (!caf_compliant(p.meta.name.as_deref(), "asp"), String::new()),
        },
        Recommendation {
            id: "asp-007",
            resource_type: PLAN_TYPE,
            category: Category::Governance,
            impact: Impact::Low,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "Plan should have tags",
            learn_more_url: TAGS_URL,
            eval: missing_tags,
        },
    ])
}

#[derive(Debug, Default, Deserialize)]
pub struct Site {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub properties: Option<SiteProperties>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteProperties {
    #[serde(default)]
    pub https_only: Option<bool>,
    #[serde(default)]
    pub virtual_network_subnet_id: Option<String>,
    #[serde(default)]
    pub client_affinity_enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteConfig {
    #[serde(default)]
    pub vnet_route_all_enabled: Option<bool>,
    #[serde(default)]
    pub min_tls_version: Option<String>,
    #[serde(default)]
    pub remote_debugging_enabled: Option<bool>,
    #[serde(default)]
    pub ftps_state: Option<String>,
    #[serde(default)]
    pub always_on: Option<bool>,
    #[serde(default)]
    pub managed_service_identity_id: Option<i64>,
    #[serde(default)]
    pub x_managed_service_identity_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct SiteConfigResource {
    #[serde(default)]
    properties: Option<SiteConfig>,
}

/// A site together with its `config/web` document.
#[derive(Debug, Default)]
pub struct SiteTarget {
    pub site: Site,
    pub config: Option<SiteConfig>,
}

impl ArmResource for SiteTarget {
    fn meta(&self) -> &ResourceMeta {
        &self.site.meta
    }
}

impl SiteTarget {
    fn properties(&self) -> Option<&SiteProperties> {
        self.site.properties.as_ref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteKind {
    WebApp,
    FunctionApp,
    LogicApp,
}

impl SiteKind {
    pub fn of(kind: Option<&str>) -> Self {
        match kind.map(str::to_lowercase).as_deref() {
            Some("functionapp") | Some("functionapp,linux") => Self::FunctionApp,
            Some("functionapp,workflowapp") => Self::LogicApp,
            _ => Self::WebApp,
        }
    }
}

fn https_not_enforced(s: &SiteTarget, _: &ScanContext) -> (bool, String) {
    let https = s.properties().and_then(|p| p.https_only).unwrap_or(false);
    (!https, String::new())
}

fn no_vnet_integration(s: &SiteTarget, _: &ScanContext) -> (bool, String) {
    let subnet = s
        .properties()
        .and_then(|p| p.virtual_network_subnet_id.as_deref())
        .map(|id| !id.is_empty())
        .unwrap_or(false);
    (!subnet, String::new())
}

fn route_all_disabled(s: &SiteTarget, _: &ScanContext) -> (bool, String) {
    let enabled = s.config.as_ref().and_then(|c| c.vnet_route_all_enabled);
    (enabled != Some(true), String::new())
}

fn tls_below_1_2(s: &SiteTarget, _: &ScanContext) -> (bool, String) {
    let version = s.config.as_ref().and_then(|c| c.min_tls_version.as_deref());
    (version != Some("1.2"), version.unwrap_or_default().to_string())
}

fn remote_debugging_on(s: &SiteTarget, _: &ScanContext) -> (bool, String) {
    let enabled = s.config.as_ref().and_then(|c| c.remote_debugging_enabled);
    (enabled == Some(true), String::new())
}

fn insecure_ftp(s: &SiteTarget, _: &ScanContext) -> (bool, String) {
    let state = s.config.as_ref().and_then(|c| c.ftps_state.as_deref());
    (
        matches!(state, None | Some("AllAllowed")),
        state.unwrap_or_default().to_string(),
    )
}

fn always_off(s: &SiteTarget, _: &ScanContext) -> (bool, String) {
    let on = s.config.as_ref().and_then(|c| c.always_on);
    (on != Some(true), String::new())
}

fn client_affinity_on(s: &SiteTarget, _: &ScanContext) -> (bool, String) {
    let affinity = s.properties().and_then(|p| p.client_affinity_enabled);
    (affinity == Some(true), String::new())
}

fn no_managed_identity(s: &SiteTarget, _: &ScanContext) -> (bool, String) {
    let identity = s
        .config
        .as_ref()
        .map(|c| c.managed_service_identity_id.is_some() || c.x_managed_service_identity_id.is_some())
        .unwrap_or(false);
    (!identity, String::new())
}

fn site_rec(
    id: &'static str,
    category: Category,
    impact: Impact,
    recommendation: &'static str,
    learn_more_url: &'static str,
    eval: EvalFn<SiteTarget>,
) -> Recommendation<SiteTarget> {
    Recommendation {
        id,
        resource_type: SITE_TYPE,
        category,
        impact,
        recommendation_type: RecommendationType::Recommendation,
        recommendation,
        learn_more_url,
        eval,
    }
}

const PE_URL: &str = "https://learn.microsoft.com/en-us/azure/app-service/networking/private-endpoint";
const HTTPS_URL: &str = "https://learn.microsoft.com/azure/app-service/configure-ssl-bindings#enforce-https";
const VNET_URL: &str = "https://learn.microsoft.com/en-us/azure/app-service/overview-vnet-integration";
const TLS_URL: &str = "https://learn.microsoft.com/en-us/azure/app-service/overview-tls";
const DEBUG_URL: &str = "https://learn.microsoft.com/en-us/visualstudio/debugger/remote-debugging-azure-app-service?view=vs-2022#enable-remote-debugging";
const AFFINITY_URL: &str = "https://learn.microsoft.com/en-us/azure/well-architected/service-guides/azure-app-service/reliability#checklist";
const IDENTITY_URL: &str = "https://learn.microsoft.com/en-us/azure/app-service/overview-managed-identity?tabs=portal%2Chttp";

pub fn app_rules() -> RecommendationSet<SiteTarget> {
    use Category::*;
    use Impact::*;
    recommendation_set::<SiteTarget>([
        site_rec("app-001", MonitoringAndAlerting, Low, "App Service should have diagnostic settings enabled", "https://learn.microsoft.com/en-us/azure/app-service/troubleshoot-diagnostic-logs#send-logs-to-azure-monitor", missing_diagnostics),
        site_rec("app-004", Security, High, "App Service should have private endpoints enabled", PE_URL, missing_private_endpoint),
        site_rec("app-006", Governance, Low, "App Service Name should comply with naming conventions", CAF_URL, |s, _| (!caf_compliant(s.site.meta.name.as_deref(), "app"), String::new())),
        site_rec("app-007", Security, High, "App Service should use HTTPS only", HTTPS_URL, https_not_enforced),
        site_rec("app-008", Governance, Low, "App Service should have tags", TAGS_URL, missing_tags),
        site_rec("app-009", Security, Medium, "App Service should use VNET integration", VNET_URL, no_vnet_integration),
        site_rec("app-010", Security, Medium, "App Service should have VNET Route all enabled for VNET integration", VNET_URL, route_all_disabled),
        site_rec("app-011", Security, High, "App Service should use TLS 1.2", TLS_URL, tls_below_1_2),
        site_rec("app-012", Security, High, "App Service remote debugging should be disabled", DEBUG_URL, remote_debugging_on),
        site_rec("app-013", Security, High, "App Service should not allow insecure FTP", "https://learn.microsoft.com/en-us/azure/app-service/deploy-ftp?tabs=portal", insecure_ftp),
        site_rec("app-014", Scalability, High, "App Service should have Always On enabled", "https://learn.microsoft.com/en-us/azure/app-service/configure-common?tabs=portal", always_off),
        site_rec("app-015", HighAvailability, Medium, "App Service should avoid using Client Affinity", AFFINITY_URL, client_affinity_on),
        site_rec("app-016", Security, Medium, "App Service should use Managed Identities", IDENTITY_URL, no_managed_identity),
    ])
}

pub fn function_rules() -> RecommendationSet<SiteTarget> {
    use Category::*;
    use Impact::*;
    recommendation_set::<SiteTarget>([
        site_rec("func-001", MonitoringAndAlerting, Low, "Function should have diagnostic settings enabled", "https://learn.microsoft.com/en-us/azure/azure-functions/functions-monitor-log-analytics?tabs=csharp", missing_diagnostics),
        site_rec("func-004", Security, High, "Function should have private endpoints enabled", "https://learn.microsoft.com/en-us/azure/azure-functions/functions-create-vnet", missing_private_endpoint),
        site_rec("func-006", Governance, Low, "Function Name should comply with naming conventions", CAF_URL, |s, _| (!caf_compliant(s.site.meta.name.as_deref(), "func"), String::new())),
        site_rec("func-007", Security, High, "Function should use HTTPS only", HTTPS_URL, https_not_enforced),
        site_rec("func-008", Governance, Low, "Function should have tags", TAGS_URL, missing_tags),
        site_rec("func-009", Security, Medium, "Function should use VNET integration", VNET_URL, no_vnet_integration),
        site_rec("func-010", Security, Medium, "Function should have VNET Route all enabled for VNET integration", VNET_URL, route_all_disabled),
        site_rec("func-011", Security, Medium, "Function should use TLS 1.2", TLS_URL, tls_below_1_2),
        site_rec("func-012", Security, Medium, "Function remote debugging should be disabled", DEBUG_URL, remote_debugging_on),
        site_rec("func-013", HighAvailability, Medium, "Function should avoid using Client Affinity", AFFINITY_URL, client_affinity_on),
        site_rec("func-014", Security, Medium, "Function should use Managed Identities", IDENTITY_URL, no_managed_identity),
    ])
}

pub fn logic_rules() -> RecommendationSet<SiteTarget> {
    use Category::*;
    use Impact::*;
    recommendation_set::<SiteTarget>([
        site_rec("logics-001", MonitoringAndAlerting, Low, "Logic App should have diagnostic settings enabled", "https://learn.microsoft.com/en-us/azure/logic-apps/monitor-workflows-collect-diagnostic-data", missing_diagnostics),
        site_rec("logics-004", Security, High, "Logic App should have private endpoints enabled", "https://learn.microsoft.com/en-us/azure/logic-apps/secure-single-tenant-workflow-virtual-network-private-endpoint", missing_private_endpoint),
        site_rec("logics-006", Governance, Low, "Logic App Name should comply with naming conventions", CAF_URL, |s, _| (!caf_compliant(s.site.meta.name.as_deref(), "logic"), String::new())),
        site_rec("logics-007", Security, High, "Logic App should use HTTPS only", HTTPS_URL, https_not_enforced),
        site_rec("logics-008", Governance, Low, "Logic App should have tags", TAGS_URL, missing_tags),
        site_rec("logics-009", Security, Medium, "Logic App should use VNET integration", VNET_URL, no_vnet_integration),
        site_rec("logics-010", Security, Medium, "Logic App should have VNET Route all enabled for VNET integration", VNET_URL, route_all_disabled),
        site_rec("logics-011", Security, Medium, "Logic App should use TLS 1.2", TLS_URL, tls_below_1_2),
        site_rec("logics-012", Security, Medium, "Logic App remote debugging should be disabled", DEBUG_URL, remote_debugging_on),
        site_rec("logics-013", HighAvailability, Medium, "Logic App should avoid using Client Affinity", AFFINITY_URL, client_affinity_on),
        site_rec("logics-014", Security, Medium, "Logic App should use Managed Identities", IDENTITY_URL, no_managed_identity),
    ])
}

/// Web, function and logic apps.
pub struct SiteScanner;

impl ServiceScanner for SiteScanner {
    fn name(&self) -> &'static str {
        "App Service"
    }

    fn prefixes(&self) -> &'static [&'static str] {
        &["app", "func", "logics"]
    }

    fn resource_types(&self) -> &'static [&'static str] {
        &[SITE_TYPE]
    }

    fn recommendations(&self) -> BTreeMap<String, RecommendationInfo> {
        let mut all = rules::describe(&app_rules());
        all.extend(rules::describe(&function_rules()));
        all.extend(rules::describe(&logic_rules()));
        all
    }

    fn init(&self, config: &ScannerConfig) -> Result<Box<dyn ResourceScanner>> {
        Ok(Box::new(SiteSession {
            config: config.clone(),
            app: app_rules(),
            function: function_rules(),
            logic: logic_rules(),
        }))
    }
}

struct SiteSession {
    config: ScannerConfig,
    app: RecommendationSet<SiteTarget>,
    function: RecommendationSet<SiteTarget>,
    logic: RecommendationSet<SiteTarget>,
}

impl SiteSession {
    async fn site_config(&self, site: &Site) -> Result<Option<SiteConfig>> {
        let id = site.meta.id();
        if id.is_empty() {
            return Ok(None);
        }
        let resource: SiteConfigResource = get_typed(
            self.config.client.as_ref(),
            &format!("{id}/config/web"),
            API_VERSION,
            &self.config.cancel,
        )
        .await?;
        Ok(resource.properties)
    }

    fn rules_for(&self, kind: SiteKind) -> &RecommendationSet<SiteTarget> {
        match kind {
            SiteKind::WebApp => &self.app,
            SiteKind::FunctionApp => &self.function,
            SiteKind::LogicApp => &self.logic,
        }
    }
}

#[async_trait]
impl ResourceScanner for SiteSession {
    async fn scan(&self, ctx: &ScanContext) -> Result<Vec<ServiceResult>> {
        log_scan_start(&self.config, "App Service");

        let mut pager = ArmPager::<Site>::list(
            self.config.client.clone(),
            &self.config.provider_path(SITE_TYPE),
            API_VERSION,
        );
        let sites = collect_all(&mut pager, &self.config.cancel).await?;

        let mut results = Vec::with_capacity(sites.len());
        for site in sites {
            let config = self.site_config(&site).await?;
            let kind = SiteKind::of(site.kind.as_deref());
            let target = SiteTarget { site, config };
            results.push(service_result(
                &self.config,
                &target,
                SITE_TYPE,
                self.rules_for(kind),
                ctx,
            ));
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpstreamError;
    use crate::rules::evaluate;
    use crate::scanners::test_support::{config, parse};
    use crate::upstream::MemoryArmClient;
    use serde_json::json;

    const APP: &str = "/subscriptions/s/resourceGroups/r/providers/Microsoft.Web/sites/app-portal";
    const FUNC: &str = "/subscriptions/s/resourceGroups/r/providers/Microsoft.Web/sites/func-orders";

    fn client() -> MemoryArmClient {
        MemoryArmClient::new()
            .with_pages(
                "/subscriptions/s/providers/Microsoft.Web/sites",
                vec![vec![
                    json!({"id": APP, "name": "app-portal", "kind": "app", "location": "westeurope",
                           "properties": {"httpsOnly": true, "clientAffinityEnabled": true}}),
                    json!({"id": FUNC, "name": "func-orders", "kind": "functionapp,linux", "location": "westeurope"}),
                ]],
            )
            .with_resource(
                &format!("{APP}/config/web"),
                json!({"properties": {"minTlsVersion": "1.2", "ftpsState": "FtpsOnly", "alwaysOn": true}}),
            )
            .with_resource(&format!("{FUNC}/config/web"), json!({"properties": {}}))
    }

    #[test]
    fn routes_by_kind() {
        assert_eq!(SiteKind::of(Some("functionapp")), SiteKind::FunctionApp);
        assert_eq!(SiteKind::of(Some("FunctionApp,Linux")), SiteKind::FunctionApp);
        assert_eq!(SiteKind::of(Some("functionapp,workflowapp")), SiteKind::LogicApp);
        assert_eq!(SiteKind::of(Some("app,linux")), SiteKind::WebApp);
        assert_eq!(SiteKind::of(None), SiteKind::WebApp);
    }

    #[test]
    fn plan_sla_by_tier() {
        let free: Plan = parse(json!({"sku": {"name": "F1", "tier": "Free"}}));
        let premium: Plan = parse(json!({"sku": {"name": "P1v3", "tier": "PremiumV3"}}));
        let ctx = ScanContext::default();

        let r = evaluate(&plan_rules(), &free, &ctx);
        assert!(r["asp-003"].not_compliant);
        assert_eq!(r["asp-003"].result, "None");

        let r = evaluate(&plan_rules(), &premium, &ctx);
        assert!(!r["asp-003"].not_compliant);
        assert_eq!(r["asp-003"].result, "99.95%");
        assert_eq!(r["asp-005"].result, "P1v3");
    }

    #[tokio::test]
    async fn scans_sites_with_their_config() {
        let session = SiteScanner.init(&config(client())).unwrap();
        let results = session.scan(&ScanContext::default()).await.unwrap();
        assert_eq!(results.len(), 2);

        let app = &results[0];
        assert_eq!(app.service_name, "app-portal");
        assert_eq!(app.resource_group, "r");
        assert!(app.recommendations.keys().all(|k| k.starts_with("app-")));
        assert!(!app.recommendations["app-007"].not_compliant);
        assert!(!app.recommendations["app-011"].not_compliant);
        assert!(!app.recommendations["app-013"].not_compliant);
        assert!(!app.recommendations["app-014"].not_compliant);
        assert!(app.recommendations["app-015"].not_compliant);

        let func = &results[1];
        assert!(func.recommendations.keys().all(|k| k.starts_with("func-")));
        assert!(func.recommendations["func-011"].not_compliant);
        assert!(func.recommendations["func-007"].not_compliant);
    }

    #[tokio::test]
    async fn config_failure_fails_the_whole_scan() {
        let client = client().with_error(
            &format!("{FUNC}/config/web"),
            UpstreamError::response(403, "AuthorizationFailed", FUNC),
        );
        let session = SiteScanner.init(&config(client)).unwrap();
        let err = session.scan(&ScanContext::default()).await.unwrap_err();
        assert!(!err.should_skip());
    }

    #[test]
    fn site_without_config_is_conservative() {
        let r = evaluate(&logic_rules(), &SiteTarget::default(), &ScanContext::default());
        assert!(r["logics-010"].not_compliant);
        assert!(r["logics-011"].not_compliant);
        assert!(r["logics-014"].not_compliant);
        assert!(!r["logics-012"].not_compliant);
    }
}
