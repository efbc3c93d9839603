//! HTTP client for the Talk2M Data Mailbox API.
//!
//! Every endpoint is a form-encoded POST to `<base_url>/<endpoint>`
//! carrying the account token and developer id. The server answers with
//! JSON; a body containing `"success": false` is an API error even when the
//! HTTP status is 200.
//!
//! # Example
//!
//! ```no_run
//! use ewon_core::datamailbox::{Credentials, DataMailboxClient};
//! use ewon_core::DataExchange;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = DataMailboxClient::new(Credentials::new("token", "developer-id"))?;
//!
//! for device in client.list_devices().await? {
//!     println!("{} ({})", device.name, device.id);
//! }
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;

use ewon_types::{DeviceList, DevicePayload, DeviceSummary, MailboxStatus, SyncPayload, TransactionId};

use crate::error::Result;
use crate::history::HistoryQuery;
use crate::traits::DataExchange;

/// Production endpoint of the Data Mailbox.
pub const DEFAULT_BASE_URL: &str = "https://data.talk2m.com";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Error type for Data Mailbox client operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ClientError {
    /// The service is not reachable.
    #[error("Data Mailbox not reachable at {url}: {source}")]
    NotReachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Non-success HTTP status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The API answered with `"success": false`.
    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    /// The body could not be decoded into the expected shape.
    #[error("Failed to decode {endpoint} response: {source}")]
    Decode {
        endpoint: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// A history bound could not be turned into an ISO-8601 string.
    #[error("Invalid time bound '{0}': expected an instant, epoch seconds or ISO-8601 string")]
    InvalidTimeBound(String),
}

/// Account credentials sent with every request.
#[derive(Clone)]
pub struct Credentials {
    token: String,
    developer_id: String,
    account: Option<String>,
}

impl Credentials {
    pub fn new(token: impl Into<String>, developer_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            developer_id: developer_id.into(),
            account: None,
        }
    }

    /// Attach a Talk2M account name.
    ///
    /// Most tokens are bound to an account already; the parameter is only
    /// sent when set here.
    #[must_use]
    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("t2mtoken", self.token.clone()),
            ("t2mdevid", self.developer_id.clone()),
        ];
        if let Some(account) = &self.account {
            params.push(("t2maccount", account.clone()));
        }
        params
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .field("developer_id", &self.developer_id)
            .field("account", &self.account)
            .finish()
    }
}

/// HTTP client for the Data Mailbox.
#[derive(Debug, Clone)]
pub struct DataMailboxClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
}

impl DataMailboxClient {
    /// Create a client for the production endpoint.
    pub fn new(credentials: Credentials) -> std::result::Result<Self, ClientError> {
        Self::with_base_url(DEFAULT_BASE_URL, credentials, DEFAULT_TIMEOUT)
    }

    /// Create a client for a custom endpoint.
    pub fn with_base_url(
        base_url: &str,
        credentials: Credentials,
        timeout: Duration,
    ) -> std::result::Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ClientError::Request)?;
        Self::with_client(base_url, credentials, client)
    }

    /// Create a client with a custom reqwest Client.
    pub fn with_client(
        base_url: &str,
        credentials: Credentials,
        client: Client,
    ) -> std::result::Result<Self, ClientError> {
        let base_url = normalize_base_url(base_url)?;
        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        params: Vec<(&'static str, String)>,
    ) -> std::result::Result<T, ClientError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let mut form = self.credentials.params();
        form.extend(params);

        debug!("POST {}", url);
        let response = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| ClientError::NotReachable {
                url: url.clone(),
                source: e,
            })?;

        let status = response.status();
        let body = response.json::<serde_json::Value>().await;

        if !status.is_success() {
            let message = body
                .ok()
                .as_ref()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
                .unwrap_or_else(|| status.to_string());
            return Err(ClientError::Http {
                status: status.as_u16(),
                message,
            });
        }

        decode_body(endpoint, body?)
    }
}

fn normalize_base_url(base_url: &str) -> std::result::Result<String, ClientError> {
    let base_url = base_url.trim_end_matches('/').to_string();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ClientError::InvalidUrl(format!(
            "URL must start with http:// or https://, got: {}",
            base_url
        )));
    }
    Ok(base_url)
}

/// Decode a JSON body, turning `"success": false` into an API error.
fn decode_body<T: DeserializeOwned>(
    endpoint: &'static str,
    body: serde_json::Value,
) -> std::result::Result<T, ClientError> {
    if body.get("success").and_then(|s| s.as_bool()) == Some(false) {
        let code = body.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
        let message = body
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error")
            .to_string();
        return Err(ClientError::Api { code, message });
    }
    serde_json::from_value(body).map_err(|source| ClientError::Decode { endpoint, source })
}

/// Form parameters of a `syncdata` request.
fn sync_params(
    last_transaction_id: Option<&TransactionId>,
    create_transaction: bool,
    device_ids: &[i64],
) -> Vec<(&'static str, String)> {
    let mut params = vec![("createTransaction", create_transaction.to_string())];
    if let Some(id) = last_transaction_id {
        params.push(("lastTransactionId", id.as_param()));
    }
    if !device_ids.is_empty() {
        let ids = device_ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        params.push(("ewonIds", ids));
    }
    params
}

#[async_trait]
impl DataExchange for DataMailboxClient {
    async fn get_status(&self) -> Result<MailboxStatus> {
        Ok(self.call("getstatus", Vec::new()).await?)
    }

    async fn list_devices(&self) -> Result<Vec<DeviceSummary>> {
        let list: DeviceList = self.call("getewons", Vec::new()).await?;
        Ok(list.ewons)
    }

    async fn get_device(&self, id: i64, name: Option<&str>) -> Result<DevicePayload> {
        let mut params = vec![("id", id.to_string())];
        if let Some(name) = name {
            params.push(("name", name.to_string()));
        }
        Ok(self.call("getewon", params).await?)
    }

    async fn get_data(&self, query: &HistoryQuery) -> Result<DevicePayload> {
        let params = query.to_params()?;
        Ok(self.call("getdata", params).await?)
    }

    async fn sync(
        &self,
        last_transaction_id: Option<&TransactionId>,
        create_transaction: bool,
        device_ids: &[i64],
    ) -> Result<SyncPayload> {
        let params = sync_params(last_transaction_id, create_transaction, device_ids);
        Ok(self.call("syncdata", params).await?)
    }
}
