use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::filters::Filters;
use crate::resource_id;
use crate::upstream::{collect_all, ArmClient, ArmPager};

pub const API_VERSION: &str = "2022-12-01";

const INACTIVE_STATES: &[&str] = &["Disabled", "Deleted"];

/// One entry of the tenant's `/subscriptions` listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    #[serde(default)]
    pub subscription_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub state: Option<String>,
}

impl Subscription {
    pub fn new(subscription_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            display_name: display_name.into(),
            state: Some("Enabled".into()),
        }
    }

    pub fn is_active(&self) -> bool {
        !self
            .state
            .as_deref()
            .map(|s| INACTIVE_STATES.contains(&s))
            .unwrap_or(false)
    }
}

/// Subscriptions to scan: every active subscription visible to the
/// credential, narrowed to the include set when one is given, minus the
/// excluded ones.
pub async fn list_subscriptions(
    client: Arc<dyn ArmClient>,
    filters: &Filters,
    cancel: &CancellationToken,
) -> Result<Vec<Subscription>> {
    let mut pager = ArmPager::<Subscription>::list(client, "/subscriptions", API_VERSION);
    let listed = collect_all(&mut pager, cancel).await?;

    let included = filters.included_subscriptions();
    let mut selected: Vec<Subscription> = Vec::new();
    for subscription in listed {
        let id = resource_id::normalize(&subscription.subscription_id);
        if id.is_empty() || !subscription.is_active() {
            continue;
        }
        if !included.is_empty() && !included.contains(&id) {
            continue;
        }
        if filters.is_subscription_excluded(&id) {
            tracing::info!(
                subscription = %resource_id::mask_subscription(&id),
                "subscription excluded"
            );
            continue;
        }
        selected.push(subscription);
    }

    for id in included {
        let visible = selected
            .iter()
            .any(|s| resource_id::normalize(&s.subscription_id) == *id);
        if !visible {
            tracing::warn!(
                subscription = %resource_id::mask_subscription(id),
                "included subscription is not visible or not active"
            );
        }
    }

    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::MemoryArmClient;
    use serde_json::json;

    fn client() -> Arc<dyn ArmClient> {
        Arc::new(MemoryArmClient::new().with_pages(
            "/subscriptions",
            vec![vec![
                json!({"subscriptionId": "aaa", "displayName": "Prod", "state": "Enabled"}),
                json!({"subscriptionId": "bbb", "displayName": "Dev", "state": "Enabled"}),
                json!({"subscriptionId": "ccc", "displayName": "Old", "state": "Disabled"}),
            ]],
        ))
    }

    fn ids(subscriptions: &[Subscription]) -> Vec<&str> {
        subscriptions.iter().map(|s| s.subscription_id.as_str()).collect()
    }

    #[tokio::test]
    async fn skips_inactive_subscriptions() {
        let listed = list_subscriptions(client(), &Filters::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(ids(&listed), vec!["aaa", "bbb"]);
    }

    #[tokio::test]
    async fn include_set_narrows_and_wins_over_exclude() {
        let mut filters = Filters::default();
        filters.include_subscription("AAA").exclude_subscription("aaa").exclude_subscription("bbb");
        let listed = list_subscriptions(client(), &filters, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(ids(&listed), vec!["aaa"]);
    }

    #[tokio::test]
    async fn excluded_subscription_is_dropped() {
        let mut filters = Filters::default();
        filters.exclude_subscription("bbb");
        let listed = list_subscriptions(client(), &filters, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(ids(&listed), vec!["aaa"]);
    }
}
