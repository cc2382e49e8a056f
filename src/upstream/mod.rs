//! Upstream listing abstraction.
//!
//! Every resource listing the scanners consume goes through [`Pager`], so
//! plugins are not coupled to a particular client. [`ArmClient`] is the one
//! transport seam: a real HTTP client in production, an in-memory fake in
//! tests and `--fixture` runs.

pub mod http;
pub mod memory;

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ScanError, UpstreamError};

pub use http::{BearerToken, HttpArmClient};
pub use memory::MemoryArmClient;

/// One page worth of request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRequest {
    /// First page of a collection, e.g. `/subscriptions/{id}/providers/Microsoft.KeyVault/vaults`.
    List { path: String, api_version: String },
    /// Continuation link returned by the previous page.
    Next { link: String },
    /// Resource Graph query scoped to one subscription.
    Graph {
        subscription_id: String,
        query: String,
        skip_token: Option<String>,
    },
}

impl PageRequest {
    pub fn list(path: impl Into<String>, api_version: impl Into<String>) -> Self {
        Self::List {
            path: path.into(),
            api_version: api_version.into(),
        }
    }

    pub fn graph(subscription_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self::Graph {
            subscription_id: subscription_id.into(),
            query: query.into(),
            skip_token: None,
        }
    }

    /// Short description used in error messages.
    pub fn target(&self) -> String {
        match self {
            Self::List { path, .. } => path.clone(),
            Self::Next { link } => link.clone(),
            Self::Graph {
                subscription_id, ..
            } => format!("resource graph ({subscription_id})"),
        }
    }
}

/// Raw page: the `value` array and the request for the following page.
#[derive(Debug, Clone, Default)]
pub struct RawPage {
    pub value: Vec<Value>,
    pub next: Option<PageRequest>,
}

#[async_trait]
pub trait ArmClient: Send + Sync {
    async fn fetch_page(&self, request: &PageRequest) -> std::result::Result<RawPage, UpstreamError>;

    /// Single-resource read, e.g. `{siteId}/config/web`.
    async fn get(&self, path: &str, api_version: &str) -> std::result::Result<Value, UpstreamError>;
}

#[async_trait]
pub trait Pager<T: Send>: Send {
    fn more(&self) -> bool;

    /// Fetch the next page. Returns [`ScanError::Cancelled`] if `cancel`
    /// fires before the page arrives.
    async fn next_page(&mut self, cancel: &CancellationToken) -> Result<Vec<T>>;
}

/// Typed pager over an [`ArmClient`].
pub struct ArmPager<T> {
    client: Arc<dyn ArmClient>,
    next: Option<PageRequest>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ArmPager<T> {
    pub fn new(client: Arc<dyn ArmClient>, first: PageRequest) -> Self {
        Self {
            client,
            next: Some(first),
            _marker: PhantomData,
        }
    }

    pub fn list(client: Arc<dyn ArmClient>, path: &str, api_version: &str) -> Self {
        Self::new(client, PageRequest::list(path, api_version))
    }
}

#[async_trait]
impl<T: DeserializeOwned + Send> Pager<T> for ArmPager<T> {
    fn more(&self) -> bool {
        self.next.is_some()
    }

    async fn next_page(&mut self, cancel: &CancellationToken) -> Result<Vec<T>> {
        let Some(request) = self.next.take() else {
            return Ok(Vec::new());
        };
        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        let page = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ScanError::Cancelled),
            page = self.client.fetch_page(&request) => page?,
        };
        self.next = page.next;

        page.value
            .into_iter()
            .map(|value| {
                serde_json::from_value(value).map_err(|e| {
                    ScanError::from(UpstreamError::Decode {
                        target: request.target(),
                        message: e.to_string(),
                    })
                })
            })
            .collect()
    }
}

/// Drain `pager` to exhaustion, preserving upstream order.
pub async fn collect_all<T, P>(pager: &mut P, cancel: &CancellationToken) -> Result<Vec<T>>
where
    T: Send,
    P: Pager<T> + ?Sized,
{
    let mut items = Vec::new();
    while pager.more() {
        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }
        items.extend(pager.next_page(cancel).await?);
    }
    Ok(items)
}

/// Wait for a slot in `limit`. `None` once `cancel` fires.
pub async fn acquire(limit: Arc<Semaphore>, cancel: &CancellationToken) -> Option<OwnedSemaphorePermit> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        permit = limit.acquire_owned() => permit.ok(),
    }
}

/// Single typed GET, racing the cancellation token.
pub async fn get_typed<T: DeserializeOwned>(
    client: &dyn ArmClient,
    path: &str,
    api_version: &str,
    cancel: &CancellationToken,
) -> Result<T> {
    let value = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(ScanError::Cancelled),
        value = client.get(path, api_version) => value?,
    };
    serde_json::from_value(value).map_err(|e| {
        UpstreamError::Decode {
            target: path.to_string(),
            message: e.to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        name: String,
    }

    const PATH: &str = "/subscriptions/s/providers/Microsoft.KeyVault/vaults";

    fn paged_client() -> Arc<dyn ArmClient> {
        Arc::new(MemoryArmClient::new().with_pages(
            PATH,
            vec![
                vec![json!({"name": "A"}), json!({"name": "B"})],
                vec![json!({"name": "C"})],
            ],
        ))
    }

    #[tokio::test]
    async fn drains_all_pages_in_order() {
        let mut pager = ArmPager::<Item>::list(paged_client(), PATH, "2023-07-01");
        let items = collect_all(&mut pager, &CancellationToken::new()).await.unwrap();
        let names: Vec<_> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
        assert!(!pager.more());
    }

    #[tokio::test]
    async fn cancelled_token_stops_pagination() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut pager = ArmPager::<Item>::list(paged_client(), PATH, "2023-07-01");
        let err = collect_all(&mut pager, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn cancellation_between_pages() {
        let cancel = CancellationToken::new();
        let mut pager = ArmPager::<Item>::list(paged_client(), PATH, "2023-07-01");
        let first = pager.next_page(&cancel).await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(pager.more());
        cancel.cancel();
        let err = pager.next_page(&cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn undecodable_value_is_an_upstream_error() {
        let client: Arc<dyn ArmClient> = Arc::new(
            MemoryArmClient::new().with_pages(PATH, vec![vec![json!({"name": 42})]]),
        );
        let mut pager = ArmPager::<Item>::list(client, PATH, "2023-07-01");
        let err = collect_all(&mut pager, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ScanError::Upstream(UpstreamError::Decode { .. })));
    }

    #[tokio::test]
    async fn upstream_error_surfaces_raw() {
        let client: Arc<dyn ArmClient> = Arc::new(MemoryArmClient::new().with_error(
            PATH,
            UpstreamError::response(409, "MissingSubscriptionRegistration", PATH),
        ));
        let mut pager = ArmPager::<Item>::list(client, PATH, "2023-07-01");
        let err = collect_all(&mut pager, &CancellationToken::new()).await.unwrap_err();
        assert!(err.should_skip());
    }

    #[tokio::test]
    async fn typed_get() {
        let client = MemoryArmClient::new().with_resource("/x/config/web", json!({"name": "web"}));
        let item: Item = get_typed(&client, "/x/config/web", "2023-12-01", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(item, Item { name: "web".into() });
    }
}
