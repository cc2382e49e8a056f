use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use super::{ArmClient, PageRequest, RawPage};
use crate::config::UpstreamSettings;
use crate::error::{Result, ScanError, UpstreamError};

pub const TOKEN_ENV: &str = "AZURE_ACCESS_TOKEN";

const GRAPH_PATH: &str = "/providers/Microsoft.ResourceGraph/resources";
const GRAPH_API_VERSION: &str = "2022-10-01";
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(2);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Bearer token for the Resource Manager audience.
#[derive(Clone)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn from_env() -> Result<Self> {
        match std::env::var(TOKEN_ENV) {
            Ok(token) if !token.trim().is_empty() => Ok(Self(token.trim().to_string())),
            _ => Err(ScanError::Credential(format!(
                "{TOKEN_ENV} is not set; obtain one with `az account get-access-token --query accessToken -o tsv`"
            ))),
        }
    }

    fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken(***)")
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    value: Vec<Value>,
    #[serde(default)]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphResponse {
    #[serde(default)]
    data: Vec<Value>,
    #[serde(rename = "$skipToken", default)]
    skip_token: Option<String>,
}

/// Azure Resource Manager client over HTTPS.
#[derive(Debug)]
pub struct HttpArmClient {
    http: reqwest::Client,
    endpoint: Url,
    token: BearerToken,
    max_retries: u32,
}

impl HttpArmClient {
    pub fn new(settings: &UpstreamSettings, token: BearerToken) -> Result<Self> {
        let endpoint = Url::parse(&settings.endpoint).map_err(|e| {
            ScanError::Config(format!("invalid endpoint '{}': {e}", settings.endpoint))
        })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(concat!("azscan/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ScanError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint,
            token,
            max_retries: settings.max_retries,
        })
    }

    fn url(&self, path: &str, api_version: &str) -> std::result::Result<Url, UpstreamError> {
        let mut url = self.endpoint.join(path).map_err(|e| UpstreamError::Transport {
            target: path.to_string(),
            message: e.to_string(),
        })?;
        url.query_pairs_mut().append_pair("api-version", api_version);
        Ok(url)
    }

    async fn send(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder + Send + Sync,
        target: &str,
    ) -> std::result::Result<Value, UpstreamError> {
        let mut attempt = 0;
        let mut delay = INITIAL_RETRY_DELAY;
        loop {
            let outcome = build().bearer_auth(self.token.secret()).send().await;
            let wait = match outcome {
                Ok(response) if response.status().is_success() => {
                    return response.json::<Value>().await.map_err(|e| UpstreamError::Decode {
                        target: target.to_string(),
                        message: e.to_string(),
                    });
                }
                Ok(response) => {
                    let status = response.status();
                    if !is_retryable(status) || attempt >= self.max_retries {
                        let body = response.text().await.unwrap_or_default();
                        return Err(parse_error(status.as_u16(), &body, target));
                    }
                    retry_after(&response).unwrap_or(delay)
                }
                Err(e) => {
                    if !(e.is_timeout() || e.is_connect()) || attempt >= self.max_retries {
                        return Err(UpstreamError::Transport {
                            target: target.to_string(),
                            message: e.to_string(),
                        });
                    }
                    delay
                }
            };

            attempt += 1;
            let wait = wait.min(MAX_RETRY_DELAY);
            tracing::debug!(request = target, attempt, wait_ms = wait.as_millis() as u64, "retrying request");
            tokio::time::sleep(wait).await;
            delay = (delay * 2).min(MAX_RETRY_DELAY);
        }
    }
}

#[async_trait]
impl ArmClient for HttpArmClient {
    async fn fetch_page(&self, request: &PageRequest) -> std::result::Result<RawPage, UpstreamError> {
        let target = request.target();
        match request {
            PageRequest::List { path, api_version } => {
                let url = self.url(path, api_version)?;
                let body = self.send(|| self.http.get(url.clone()), &target).await?;
                list_page(body, &target)
            }
            PageRequest::Next { link } => {
                let url = Url::parse(link).map_err(|e| UpstreamError::Transport {
                    target: target.clone(),
                    message: e.to_string(),
                })?;
                let body = self.send(|| self.http.get(url.clone()), &target).await?;
                list_page(body, &target)
            }
            PageRequest::Graph {
                subscription_id,
                query,
                skip_token,
            } => {
                let url = self.url(GRAPH_PATH, GRAPH_API_VERSION)?;
                let mut options = json!({ "resultFormat": "objectArray" });
                if let Some(token) = skip_token {
                    options["$skipToken"] = json!(token);
                }
                let payload = json!({
                    "subscriptions": [subscription_id],
                    "query": query,
                    "options": options,
                });
                let body = self
                    .send(|| self.http.post(url.clone()).json(&payload), &target)
                    .await?;
                let page: GraphResponse =
                    serde_json::from_value(body).map_err(|e| UpstreamError::Decode {
                        target: target.clone(),
                        message: e.to_string(),
                    })?;
                Ok(RawPage {
                    value: page.data,
                    next: page.skip_token.map(|token| PageRequest::Graph {
                        subscription_id: subscription_id.clone(),
                        query: query.clone(),
                        skip_token: Some(token),
                    }),
                })
            }
        }
    }

    async fn get(&self, path: &str, api_version: &str) -> std::result::Result<Value, UpstreamError> {
        let url = self.url(path, api_version)?;
        self.send(|| self.http.get(url.clone()), path).await
    }
}

fn list_page(body: Value, target: &str) -> std::result::Result<RawPage, UpstreamError> {
    let page: ListResponse = serde_json::from_value(body).map_err(|e| UpstreamError::Decode {
        target: target.to_string(),
        message: e.to_string(),
    })?;
    Ok(RawPage {
        value: page.value,
        next: page
            .next_link
            .filter(|l| !l.is_empty())
            .map(|link| PageRequest::Next { link }),
    })
}

fn is_retryable(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 429 | 500 | 502 | 503 | 504)
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Decode the ARM error envelope, falling back to the HTTP reason phrase.
fn parse_error(status: u16, body: &str, target: &str) -> UpstreamError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) if !envelope.error.code.is_empty() => UpstreamError::Response {
            status,
            message: if envelope.error.message.is_empty() {
                envelope.error.code.clone()
            } else {
                envelope.error.message
            },
            code: envelope.error.code,
            target: target.to_string(),
        },
        _ => {
            let reason = StatusCode::from_u16(status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("Unknown");
            UpstreamError::response(status, reason, target)
        }
    }
}
