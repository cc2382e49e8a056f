//! ARM resource-id parsing.
//!
//! Ids look like `/subscriptions/{SUB}/resourceGroups/{RG}/providers/{NS}/{TYPE}/{NAME}`.
//! Routing is case-insensitive; index keys are stored lower-cased.

/// Lower-cased form used for every index key and filter comparison.
pub fn normalize(id: &str) -> String {
    id.to_lowercase()
}

/// Segment 2 of the id, or `""` when the id is too short.
pub fn subscription_of(resource_id: &str) -> &str {
    resource_id.split('/').nth(2).unwrap_or("")
}

/// Segment 4 of the id, or `""` when the id has fewer than 5 segments.
pub fn resource_group_of(resource_id: &str) -> &str {
    let parts: Vec<&str> = resource_id.split('/').collect();
    if parts.len() < 5 {
        return "";
    }
    parts[4]
}

/// `/subscriptions/{SUB}/resourceGroups/{RG}` prefix of the id, or `""`.
pub fn resource_group_id_of(resource_id: &str) -> String {
    let parts: Vec<&str> = resource_id.split('/').collect();
    if parts.len() < 5 {
        return String::new();
    }
    parts[..5].join("/")
}

/// `{NS}/{TYPE}` of a top-level resource id, or `""`.
pub fn resource_type_of(resource_id: &str) -> String {
    let parts: Vec<&str> = resource_id.split('/').collect();
    if parts.len() < 8 {
        return String::new();
    }
    format!("{}/{}", parts[6], parts[7])
}

/// Canonical lower-cased id rebuilt from identity fields.
pub fn canonical(subscription_id: &str, resource_group: &str, resource_type: &str, name: &str) -> String {
    format!(
        "/subscriptions/{subscription_id}/resourceGroups/{resource_group}/providers/{resource_type}/{name}"
    )
    .to_lowercase()
}

/// Checks the `/subscriptions/{id}/resourceGroups/{name}` shape.
pub fn validate_resource_group_id(resource_group_id: &str) -> Result<(), String> {
    let expected = "Expected format: /subscriptions/{subscription-id}/resourceGroups/{resource-group-name}";
    let parts: Vec<&str> = resource_group_id.split('/').collect();

    if parts.len() != 5
        || !parts[0].is_empty()
        || !parts[1].eq_ignore_ascii_case("subscriptions")
        || !parts[3].eq_ignore_ascii_case("resourceGroups")
    {
        return Err(format!(
            "resource group ID '{resource_group_id}' has incorrect format. {expected}"
        ));
    }
    if parts[2].is_empty() {
        return Err(format!(
            "resource group ID '{resource_group_id}' has empty subscription ID. {expected}"
        ));
    }
    if parts[4].is_empty() {
        return Err(format!(
            "resource group ID '{resource_group_id}' has empty resource group name. {expected}"
        ));
    }
    Ok(())
}

/// Log-friendly subscription id: only the trailing characters survive.
pub fn mask_subscription(subscription_id: &str) -> String {
    let tail: String = subscription_id
        .chars()
        .rev()
        .take(7)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const VAULT: &str = "/subscriptions/sub-1/resourceGroups/rg-app/providers/Microsoft.KeyVault/vaults/kv-one";

    #[test]
    fn extracts_segments() {
        assert_eq!(subscription_of(VAULT), "sub-1");
        assert_eq!(resource_group_of(VAULT), "rg-app");
        assert_eq!(resource_group_id_of(VAULT), "/subscriptions/sub-1/resourceGroups/rg-app");
        assert_eq!(resource_type_of(VAULT), "Microsoft.KeyVault/vaults");
    }

    #[test]
    fn short_ids_yield_empty_segments() {
        assert_eq!(resource_group_of("/subscriptions/sub-1"), "");
        assert_eq!(resource_group_id_of("/subscriptions/sub-1"), "");
        assert_eq!(resource_type_of("/subscriptions/sub-1/resourceGroups/rg"), "");
        assert_eq!(subscription_of(""), "");
    }

    #[test]
    fn canonical_is_lower_cased() {
        assert_eq!(
            canonical("S", "R", "Microsoft.KeyVault/vaults", "V"),
            "/subscriptions/s/resourcegroups/r/providers/microsoft.keyvault/vaults/v"
        );
    }

    #[test]
    fn validates_resource_group_ids() {
        assert!(validate_resource_group_id("/subscriptions/s/resourceGroups/rg").is_ok());
        assert!(validate_resource_group_id("/subscriptions/s/resourcegroups/rg").is_ok());
        assert!(validate_resource_group_id("subscriptions/s/resourceGroups/rg").is_err());
        assert!(validate_resource_group_id("/subscriptions//resourceGroups/rg").is_err());
        assert!(validate_resource_group_id("/subscriptions/s/resourceGroups/").is_err());
        assert!(validate_resource_group_id("/subscriptions/s/resourceGroups/rg/extra").is_err());
    }

    #[test]
    fn masks_all_but_tail() {
        assert_eq!(
            mask_subscription("00000000-0000-0000-0000-000000abcdef"),
            "...0abcdef"
        );
        assert_eq!(mask_subscription("abc"), "...abc");
    }

    proptest! {
        #[test]
        fn resource_group_round_trips(sub in "[a-z0-9-]{1,36}", rg in "[A-Za-z0-9_.-]{1,40}", name in "[a-z0-9-]{1,24}") {
            let id = format!("/subscriptions/{sub}/resourceGroups/{rg}/providers/Microsoft.Web/sites/{name}");
            prop_assert_eq!(resource_group_of(&id), rg.as_str());
            prop_assert_eq!(subscription_of(&id), sub.as_str());
            let rg_id = format!("/subscriptions/{sub}/resourceGroups/{rg}");
            prop_assert!(validate_resource_group_id(&resource_group_id_of(&id)).is_ok());
            prop_assert_eq!(resource_group_id_of(&id), rg_id);
        }
    }
}
