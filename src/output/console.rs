use std::collections::BTreeMap;

use crate::rules::{Impact, RecommendationResult, ServiceResult};
use crate::ScanReport;

/// Render results grouped by subscription then resource. Only non-compliant
/// recommendations are listed unless `include_compliant` is set.
pub fn render(report: &ScanReport, include_compliant: bool) -> String {
    let mut output = String::new();

    let mut by_subscription: BTreeMap<(&str, &str), Vec<&ServiceResult>> = BTreeMap::new();
    for result in &report.results {
        by_subscription
            .entry((result.subscription_name.as_str(), result.subscription_id.as_str()))
            .or_default()
            .push(result);
    }

    let mut findings = 0;
    for ((name, id), results) in &by_subscription {
        output.push_str(&format!("\n  Subscription {name} ({id})\n"));
        for result in results {
            let mut shown: Vec<&RecommendationResult> = result
                .recommendations
                .values()
                .filter(|r| include_compliant || r.not_compliant)
                .collect();
            if shown.is_empty() {
                continue;
            }
            // Highest impact first, then by id.
            shown.sort_by(|a, b| b.impact.cmp(&a.impact).then_with(|| a.id.cmp(&b.id)));

            output.push_str(&format!(
                "\n    {}  {}  {}  {}\n",
                result.service_name, result.resource_type, result.resource_group, result.location
            ));
            for rec in shown {
                if rec.not_compliant {
                    findings += 1;
                }
                let status = if rec.not_compliant { "x" } else { "ok" };
                output.push_str(&format!(
                    "      {:<2} {} {:<11} {}",
                    status,
                    impact_tag(rec.impact),
                    rec.id,
                    rec.recommendation
                ));
                if !rec.result.is_empty() {
                    output.push_str(&format!(" ({})", rec.result));
                }
                output.push('\n');
            }
        }
    }

    if report.results.is_empty() {
        output.push_str("\n  No resources found.\n");
    } else if findings == 0 && !include_compliant {
        output.push_str("\n  No non-compliant recommendations.\n");
    }

    let summary = &report.summary;
    output.push_str(&format!(
        "\n  {} resource(s), {} non-compliant finding(s) across {} subscription(s)\n",
        report.results.len(),
        report
            .results
            .iter()
            .map(|r| r.non_compliant().count())
            .sum::<usize>(),
        summary.subscriptions.len(),
    ));
    for subscription in summary.subscriptions.iter().filter(|s| s.error.is_some()) {
        output.push_str(&format!(
            "  failed: {} ({}): {}\n",
            subscription.subscription_name,
            subscription.subscription_id,
            subscription.error.as_deref().unwrap_or_default()
        ));
    }
    if summary.skipped_plugins() > 0 {
        output.push_str(&format!(
            "  {} scanner(s) skipped on unregistered providers\n",
            summary.skipped_plugins()
        ));
    }
    if summary.cancelled {
        output.push_str("  Scan was cancelled; results are partial.\n");
    }
    output.push('\n');

    output
}

fn impact_tag(impact: Impact) -> &'static str {
    match impact {
        Impact::High => "[HIGH]  ",
        Impact::Medium => "[MEDIUM]",
        Impact::Low => "[LOW]   ",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::test_support::report;

    #[test]
    fn lists_only_non_compliant_by_default() {
        let text = render(&report(), false);
        assert!(text.contains("Subscription Contoso"));
        assert!(text.contains("kv-orders"));
        assert!(text.contains("kv-001"));
        assert!(!text.contains("kv-003"));
        assert!(text.contains("1 resource(s), 1 non-compliant finding(s) across 1 subscription(s)"));
    }

    #[test]
    fn compliant_results_on_request() {
        let text = render(&report(), true);
        assert!(text.contains("kv-003"));
        assert!(text.contains("(99.99%)"));
    }

    #[test]
    fn failed_subscriptions_are_listed() {
        let mut report = report();
        report.summary.subscriptions[0].error = Some("Upstream error: boom".into());
        report.summary.cancelled = true;
        let text = render(&report, false);
        assert!(text.contains("failed: Contoso"));
        assert!(text.contains("results are partial"));
    }
}
