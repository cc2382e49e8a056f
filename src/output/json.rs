use crate::error::Result;
use crate::ScanReport;

/// Render the full report: run metadata, summary and every result.
pub fn render(report: &ScanReport) -> Result<String> {
    let json = serde_json::to_string_pretty(report)?;
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::test_support::report;
    use serde_json::Value;

    #[test]
    fn uses_camel_case_result_schema() {
        let value: Value = serde_json::from_str(&render(&report()).unwrap()).unwrap();
        let result = &value["results"][0];
        assert_eq!(result["serviceName"], "kv-orders");
        assert_eq!(result["type"], "Microsoft.KeyVault/vaults");
        assert_eq!(result["recommendations"]["kv-001"]["notCompliant"], true);
        assert_eq!(value["summary"]["subscriptions"][0]["pluginsRun"], 1);
        assert_eq!(value["runId"], "run-1");
    }
}
