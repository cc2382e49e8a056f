use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::error::Result;
use crate::rules::{Impact, RecommendationResult};
use crate::ScanReport;

/// Render non-compliant recommendations as SARIF 2.1.0.
///
/// Each recommendation id that produced a finding becomes a rule; each
/// finding is located by the resource id it was raised on.
pub fn render(report: &ScanReport) -> Result<String> {
    let mut rules: BTreeMap<&str, &RecommendationResult> = BTreeMap::new();
    let mut results: Vec<Value> = Vec::new();

    for service in &report.results {
        let resource_id = service.resource_id();
        for rec in service.non_compliant() {
            rules.entry(rec.id.as_str()).or_insert(rec);

            let mut message = format!("{}: {}", service.service_name, rec.recommendation);
            if !rec.result.is_empty() {
                message.push_str(&format!(" ({})", rec.result));
            }
            results.push(json!({
                "ruleId": rec.id,
                "level": impact_to_sarif_level(rec.impact),
                "message": { "text": message },
                "locations": [{
                    "logicalLocations": [{
                        "fullyQualifiedName": resource_id,
                        "name": service.service_name,
                        "kind": "resource",
                    }],
                }],
                "properties": {
                    "subscriptionId": service.subscription_id,
                    "subscriptionName": service.subscription_name,
                    "resourceGroup": service.resource_group,
                    "location": service.location,
                },
            }));
        }
    }

    let rules: Vec<Value> = rules
        .values()
        .map(|rec| {
            json!({
                "id": rec.id,
                "name": rec.id,
                "shortDescription": { "text": rec.recommendation },
                "helpUri": rec.learn_more_url,
                "defaultConfiguration": {
                    "level": impact_to_sarif_level(rec.impact),
                },
                "properties": {
                    "category": rec.category.to_string(),
                    "resourceType": rec.resource_type,
                    "tags": [rec.category.to_string()],
                },
            })
        })
        .collect();

    let sarif = json!({
        "$schema": "https://docs.oasis-open.org/sarif/sarif/v2.1.0/errata01/os/schemas/sarif-schema-2.1.0.json",
        "version": "2.1.0",
        "runs": [{
            "tool": {
                "driver": {
                    "name": "azscan",
                    "version": env!("CARGO_PKG_VERSION"),
                    "semanticVersion": env!("CARGO_PKG_VERSION"),
                    "rules": rules,
                },
            },
            "results": results,
            "automationDetails": {
                "id": format!("azscan/{}", report.run_id),
            },
            "invocations": [{
                "executionSuccessful": !report.summary.cancelled,
                "startTimeUtc": report.started_at.to_rfc3339(),
                "endTimeUtc": report.finished_at.to_rfc3339(),
            }],
        }],
    });

    let output = serde_json::to_string_pretty(&sarif)?;
    Ok(output)
}

fn impact_to_sarif_level(impact: Impact) -> &'static str {
    match impact {
        Impact::High => "error",
        Impact::Medium => "warning",
        Impact::Low => "note",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::test_support::report;

    #[test]
    fn only_non_compliant_findings_are_results() {
        let value: Value = serde_json::from_str(&render(&report()).unwrap()).unwrap();
        let run = &value["runs"][0];
        assert_eq!(value["version"], "2.1.0");

        let results = run["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["ruleId"], "kv-001");
        assert_eq!(results[0]["level"], "note");
        assert_eq!(
            results[0]["locations"][0]["logicalLocations"][0]["name"],
            "kv-orders"
        );

        let rules = run["tool"]["driver"]["rules"].as_array().unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0]["helpUri"], "https://learn.microsoft.com/azure/key-vault");
    }
}
