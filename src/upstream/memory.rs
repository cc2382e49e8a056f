use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{ArmClient, PageRequest, RawPage};
use crate::error::{Result, ScanError, UpstreamError};
use crate::resource_id;

/// Deterministic in-memory [`ArmClient`].
///
/// Listings, graph results, single resources and errors are keyed by the
/// lower-cased request path. An unknown listing path yields one empty page;
/// an unknown single resource yields `404 ResourceNotFound`.
#[derive(Debug, Default)]
pub struct MemoryArmClient {
    lists: HashMap<String, Vec<Vec<Value>>>,
    graph: HashMap<String, Vec<Value>>,
    resources: HashMap<String, Value>,
    errors: HashMap<String, UpstreamError>,
    requests: AtomicUsize,
}

/// JSON fixture layout accepted by `azscan scan --fixture`.
#[derive(Debug, Default, Deserialize)]
struct Fixture {
    #[serde(default)]
    subscriptions: Vec<Value>,
    /// Listing path -> pages.
    #[serde(default)]
    lists: HashMap<String, Vec<Vec<Value>>>,
    /// Subscription id -> Resource Graph rows (`id`, `type`).
    #[serde(default)]
    graph: HashMap<String, Vec<Value>>,
    #[serde(default)]
    resources: HashMap<String, Value>,
    #[serde(default)]
    errors: HashMap<String, FixtureError>,
}

#[derive(Debug, Deserialize)]
struct FixtureError {
    status: u16,
    code: String,
}

impl MemoryArmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ScanError::Config(format!("failed reading fixture {}: {e}", path.display()))
        })?;
        let fixture: Fixture = serde_json::from_str(&content)?;

        let mut client = Self::new();
        if !fixture.subscriptions.is_empty() {
            client = client.with_pages("/subscriptions", vec![fixture.subscriptions]);
        }
        for (path, pages) in fixture.lists {
            client = client.with_pages(&path, pages);
        }
        for (subscription, rows) in fixture.graph {
            client = client.with_graph(&subscription, rows);
        }
        for (path, value) in fixture.resources {
            client = client.with_resource(&path, value);
        }
        for (path, err) in fixture.errors {
            let error = UpstreamError::response(err.status, err.code, path.clone());
            client = client.with_error(&path, error);
        }
        Ok(client)
    }

    pub fn with_pages(mut self, path: &str, pages: Vec<Vec<Value>>) -> Self {
        self.lists.insert(resource_id::normalize(path), pages);
        self
    }

    pub fn with_graph(mut self, subscription_id: &str, rows: Vec<Value>) -> Self {
        self.graph.insert(graph_key(subscription_id), rows);
        self
    }

    pub fn with_resource(mut self, path: &str, value: Value) -> Self {
        self.resources.insert(resource_id::normalize(path), value);
        self
    }

    /// Fail listings, graph queries (`graph:{subscription}`) or GETs at `path`.
    pub fn with_error(mut self, path: &str, error: UpstreamError) -> Self {
        self.errors.insert(resource_id::normalize(path), error);
        self
    }

    /// Number of requests served so far.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }

    fn page(&self, key: &str, index: usize) -> RawPage {
        let Some(pages) = self.lists.get(key) else {
            return RawPage::default();
        };
        let value = pages.get(index).cloned().unwrap_or_default();
        let next = (index + 1 < pages.len()).then(|| PageRequest::Next {
            link: format!("{key}#{}", index + 1),
        });
        RawPage { value, next }
    }

    fn check(&self, key: &str) -> std::result::Result<(), UpstreamError> {
        match self.errors.get(key) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

fn graph_key(subscription_id: &str) -> String {
    format!("graph:{}", resource_id::normalize(subscription_id))
}

#[async_trait]
impl ArmClient for MemoryArmClient {
    async fn fetch_page(&self, request: &PageRequest) -> std::result::Result<RawPage, UpstreamError> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        match request {
            PageRequest::List { path, .. } => {
                let key = resource_id::normalize(path);
                self.check(&key)?;
                Ok(self.page(&key, 0))
            }
            PageRequest::Next { link } => {
                let (key, index) = link
                    .rsplit_once('#')
                    .and_then(|(key, n)| n.parse::<usize>().ok().map(|n| (key, n)))
                    .ok_or_else(|| UpstreamError::Transport {
                        target: link.clone(),
                        message: "malformed continuation link".into(),
                    })?;
                Ok(self.page(key, index))
            }
            PageRequest::Graph {
                subscription_id, ..
            } => {
                let key = graph_key(subscription_id);
                self.check(&key)?;
                Ok(RawPage {
                    value: self.graph.get(&key).cloned().unwrap_or_default(),
                    next: None,
                })
            }
        }
    }

    async fn get(&self, path: &str, _api_version: &str) -> std::result::Result<Value, UpstreamError> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let key = resource_id::normalize(path);
        self.check(&key)?;
        self.resources
            .get(&key)
            .cloned()
            .ok_or_else(|| UpstreamError::response(404, "ResourceNotFound", path))
    }
}
