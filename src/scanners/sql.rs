//! SQL servers and their databases.
//!
//! Each server is followed in the output by its databases, listed from
//! `{serverId}/databases`. The `master` system database is skipped.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;

use super::{
    log_scan_start, missing_diagnostics, missing_tags, service_result, ArmResource,
    PrivateEndpointConnection, ResourceMeta, ResourceScanner, ServiceScanner, Sku,
};
use crate::context::{ScanContext, ScannerConfig};
use crate::error::Result;
use crate::rules::{
    self, caf_compliant, recommendation_set, Category, Impact, Recommendation,
    RecommendationInfo, RecommendationSet, RecommendationType, ServiceResult, CAF_URL, TAGS_URL,
};
use crate::upstream::{collect_all, ArmPager};

pub const SERVER_TYPE: &str = "Microsoft.Sql/servers";
pub const DATABASE_TYPE: &str = "Microsoft.Sql/servers/databases";
pub const API_VERSION: &str = "2021-11-01";

const SYSTEM_DATABASE: &str = "master";

#[derive(Debug, Default, Deserialize)]
pub struct Server {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    #[serde(default)]
    pub properties: Option<ServerProperties>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerProperties {
    #[serde(default)]
    pub minimal_tls_version: Option<String>,
    #[serde(default)]
    pub private_endpoint_connections: Vec<PrivateEndpointConnection>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Database {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    #[serde(default)]
    pub sku: Option<Sku>,
    #[serde(default)]
    pub properties: Option<DatabaseProperties>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseProperties {
    #[serde(default)]
    pub zone_redundant: Option<bool>,
}

impl ArmResource for Server {
    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }
}

impl ArmResource for Database {
    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }
}

impl Database {
    fn zone_redundant(&self) -> bool {
        self.properties
            .as_ref()
            .and_then(|p| p.zone_redundant)
            .unwrap_or(false)
    }
}

pub fn server_rules() -> RecommendationSet<Server> {
    recommendation_set::<Server>([
        Recommendation {
            id: "sql-001",
            resource_type: SERVER_TYPE,
            category: Category::MonitoringAndAlerting,
            impact: Impact::Low,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "SQL should have diagnostic settings enabled",
            learn_more_url: "https://learn.microsoft.com/en-us/azure/azure-sql/database/metrics-diagnostic-telemetry-logging-streaming-export-configure?view=azuresql&tabs=azure-portal",
            eval: missing_diagnostics,
        },
        Recommendation {
            id: "sql-004",
            resource_type: SERVER_TYPE,
            category: Category::Security,
            impact: Impact::High,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "SQL should have private endpoints enabled",
            learn_more_url: "https://learn.microsoft.com/en-us/azure/azure-sql/database/private-endpoint-overview?view=azuresql",
            eval: |s: &Server, _| {
                let pe = s
                    .properties
                    .as_ref()
                    .map(|p| !p.private_endpoint_connections.is_empty())
                    .unwrap_or(false);
                (!pe, String::new())
            },
        },
        Recommendation {
            id: "sql-006",
            resource_type: SERVER_TYPE,
            category: Category::Governance,
            impact: Impact::Low,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "SQL Name should comply with naming conventions",
            learn_more_url: CAF_URL,
            eval: |s, _| (!caf_compliant(s.meta.name.as_deref(), "sql"), String::new()),
        },
        Recommendation {
            id: "sql-007",
            resource_type: SERVER_TYPE,
            category: Category::Governance,
            impact: Impact::Low,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "SQL should have tags",
            learn_more_url: TAGS_URL,
            eval: missing_tags,
        },
        Recommendation {
            id: "sql-008",
            resource_type: SERVER_TYPE,
            category: Category::Security,
            impact: Impact::Low,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "SQL should enforce TLS >= 1.2",
            learn_more_url: "https://learn.microsoft.com/en-us/azure/azure-sql/database/connectivity-settings?view=azuresql&tabs=azure-portal#minimal-tls-version",
            eval: |s, _| {
                let tls = s.properties.as_ref().and_then(|p| p.minimal_tls_version.as_deref());
                (tls != Some("1.2"), tls.unwrap_or_default().to_string())
            },
        },
    ])
}

pub fn database_rules() -> RecommendationSet<Database> {
    recommendation_set::<Database>([
        Recommendation {
            id: "sqldb-001",
            resource_type: DATABASE_TYPE,
            category: Category::MonitoringAndAlerting,
            impact: Impact::Low,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "SQL Database should have diagnostic settings enabled",
            learn_more_url: "https://learn.microsoft.com/en-us/azure/azure-sql/database/metrics-diagnostic-telemetry-logging-streaming-export-configure?view=azuresql&tabs=azure-portal",
            eval: missing_diagnostics,
        },
        Recommendation {
            id: "sqldb-002",
            resource_type: DATABASE_TYPE,
            category: Category::HighAvailability,
            impact: Impact::High,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "SQL Database should have availability zones enabled",
            learn_more_url: "https://learn.microsoft.com/en-us/azure/azure-sql/database/high-availability-sla?view=azuresql&tabs=azure-powershell#zone-redundant-availability",
            eval: |d: &Database, _| (!d.zone_redundant(), String::new()),
        },
        Recommendation {
            id: "sqldb-003",
            resource_type: DATABASE_TYPE,
            category: Category::HighAvailability,
            impact: Impact::High,
            recommendation_type: RecommendationType::Sla,
            recommendation: "SQL Database should have a SLA",
            learn_more_url: "https://www.azure.cn/en-us/support/sla/azure-sql-database/",
            eval: |d, _| {
                let sla = if d.zone_redundant() && Sku::tier_of(&d.sku) == "Premium" {
                    "99.995%"
                } else {
                    "99.99%"
                };
                (false, sla.to_string())
            },
        },
        Recommendation {
            id: "sqldb-005",
            resource_type: DATABASE_TYPE,
            category: Category::HighAvailability,
            impact: Impact::High,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "SQL Database SKU",
            learn_more_url: "https://docs.microsoft.com/en-us/azure/azure-sql/database/service-tiers-vcore?tabs=azure-portal",
            eval: |d, _| (false, Sku::name_of(&d.sku).to_string()),
        },
        Recommendation {
            id: "sqldb-006",
            resource_type: DATABASE_TYPE,
            category: Category::Governance,
            impact: Impact::Low,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "SQL Database Name should comply with naming conventions",
            learn_more_url: CAF_URL,
            eval: |d, _| (!caf_compliant(d.meta.name.as_deref(), "sqldb"), String::new()),
        },
        Recommendation {
            id: "sqldb-007",
            resource_type: DATABASE_TYPE,
            category: Category::Governance,
            impact: Impact::Low,
            recommendation_type: RecommendationType::Recommendation,
            recommendation: "SQL Database should have tags",
            learn_more_url: TAGS_URL,
            eval: missing_tags,
        },
    ])
}

pub struct SqlScanner;

impl ServiceScanner for SqlScanner {
    fn name(&self) -> &'static str {
        "SQL"
    }

    fn prefixes(&self) -> &'static [&'static str] {
        &["sql", "sqldb"]
    }

    fn resource_types(&self) -> &'static [&'static str] {
        &[SERVER_TYPE, DATABASE_TYPE]
    }

    fn recommendations(&self) -> BTreeMap<String, RecommendationInfo> {
        let mut all = rules::describe(&server_rules());
        all.extend(rules::describe(&database_rules()));
        all
    }

    fn init(&self, config: &ScannerConfig) -> Result<Box<dyn ResourceScanner>> {
        Ok(Box::new(SqlSession {
            config: config.clone(),
            servers: server_rules(),
            databases: database_rules(),
        }))
    }
}

struct SqlSession {
    config: ScannerConfig,
    servers: RecommendationSet<Server>,
    databases: RecommendationSet<Database>,
}

impl SqlSession {
    async fn list_databases(&self, server: &Server) -> Result<Vec<Database>> {
        let id = server.meta.id();
        if id.is_empty() {
            return Ok(Vec::new());
        }
        let mut pager = ArmPager::<Database>::list(
            self.config.client.clone(),
            &format!("{id}/databases"),
            API_VERSION,
        );
        collect_all(&mut pager, &self.config.cancel).await
    }
}

#[async_trait]
impl ResourceScanner for SqlSession {
    async fn scan(&self, ctx: &ScanContext) -> Result<Vec<ServiceResult>> {
        log_scan_start(&self.config, "SQL");

        let mut pager = ArmPager::<Server>::list(
            self.config.client.clone(),
            &self.config.provider_path(SERVER_TYPE),
            API_VERSION,
        );
        let servers = collect_all(&mut pager, &self.config.cancel).await?;

        let mut results = Vec::new();
        for server in servers {
            let databases = self.list_databases(&server).await?;
            results.push(service_result(&self.config, &server, SERVER_TYPE, &self.servers, ctx));
            for database in databases
                .iter()
                .filter(|d| !d.meta.name().eq_ignore_ascii_case(SYSTEM_DATABASE))
            {
                results.push(service_result(
                    &self.config,
                    database,
                    DATABASE_TYPE,
                    &self.databases,
                    ctx,
                ));
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::evaluate;
    use crate::scanners::test_support::{config, parse};
    use crate::upstream::MemoryArmClient;
    use serde_json::json;

    const SERVER: &str = "/subscriptions/s/resourceGroups/data/providers/Microsoft.Sql/servers/sql-orders";

    #[tokio::test]
    async fn servers_are_followed_by_their_databases() {
        let client = MemoryArmClient::new()
            .with_pages(
                "/subscriptions/s/providers/Microsoft.Sql/servers",
                vec![vec![json!({
                    "id": SERVER, "name": "sql-orders", "location": "westeurope",
                    "properties": {"minimalTlsVersion": "1.2"}
                })]],
            )
            .with_pages(
                &format!("{SERVER}/databases"),
                vec![
                    vec![json!({"id": format!("{SERVER}/databases/master"), "name": "master"})],
                    vec![json!({
                        "id": format!("{SERVER}/databases/sqldb-orders"), "name": "sqldb-orders",
                        "sku": {"name": "P1", "tier": "Premium"},
                        "properties": {"zoneRedundant": true}
                    })],
                ],
            );

        let session = SqlScanner.init(&config(client)).unwrap();
        let results = session.scan(&ScanContext::default()).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].resource_type, SERVER_TYPE);
        assert!(!results[0].recommendations["sql-008"].not_compliant);

        let db = &results[1];
        assert_eq!(db.service_name, "sqldb-orders");
        assert_eq!(db.resource_type, DATABASE_TYPE);
        assert_eq!(db.resource_group, "data");
        assert_eq!(db.recommendations["sqldb-003"].result, "99.995%");
        assert!(!db.recommendations["sqldb-002"].not_compliant);
        assert_eq!(db.recommendations["sqldb-005"].result, "P1");
    }

    #[test]
    fn standard_database_sla() {
        let db: Database = parse(json!({"sku": {"name": "S0", "tier": "Standard"}, "properties": {"zoneRedundant": true}}));
        let results = evaluate(&database_rules(), &db, &ScanContext::default());
        assert_eq!(results["sqldb-003"].result, "99.99%");
        assert!(!results["sqldb-003"].not_compliant);
    }

    #[test]
    fn tls_other_than_1_2_is_flagged() {
        let old: Server = parse(json!({"properties": {"minimalTlsVersion": "1.0"}}));
        let results = evaluate(&server_rules(), &old, &ScanContext::default());
        assert!(results["sql-008"].not_compliant);
        assert_eq!(results["sql-008"].result, "1.0");
        assert!(results["sql-004"].not_compliant);
        assert!(evaluate(&server_rules(), &Server::default(), &ScanContext::default())["sql-008"].not_compliant);
    }
}
