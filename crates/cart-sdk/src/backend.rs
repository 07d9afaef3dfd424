use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::time::Instant;
use url::Url;

use crate::model::{
    Ack, AddByNameRequest, CartSnapshot, LineId, PromptSignal, QuantityAction, SearchHit,
    UpdateQuantityRequest,
};
use crate::transport::{fetch_with_timeout, Timeouts, TransportError};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid backend configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("unexpected http status {0}")]
    HttpStatus(StatusCode),
    #[error("server rejected request: {0}")]
    Rejected(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    /// Transport-level failures (timeouts, connection errors) as opposed to the
    /// server answering and saying no.
    pub fn is_transport(&self) -> bool {
        matches!(self, BackendError::Transport(_))
    }
}

/// The REST surface a cart session depends on.
#[async_trait]
pub trait CartBackend: Send + Sync {
    async fn start_capture(&self) -> Result<Ack, BackendError>;

    async fn stop_capture(&self) -> Result<Ack, BackendError>;

    /// Pops the next scan-detection signal.
    async fn poll_signal(&self) -> Result<PromptSignal, BackendError>;

    async fn fetch_cart(&self) -> Result<CartSnapshot, BackendError>;

    async fn update_quantity(
        &self,
        id: LineId,
        action: QuantityAction,
    ) -> Result<Ack, BackendError>;

    async fn remove_line(&self, id: LineId) -> Result<Ack, BackendError>;

    async fn clear_cart(&self) -> Result<Ack, BackendError>;

    async fn add_by_name(&self, name: &str) -> Result<Ack, BackendError>;

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, BackendError>;

    async fn checkout(&self) -> Result<Ack, BackendError>;
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    base_url: Url,
    timeouts: Timeouts,
}

impl ServerConfig {
    pub fn new(server_base_url: impl AsRef<str>) -> Result<Self, BackendError> {
        let mut base = server_base_url.as_ref().trim().to_string();
        if base.is_empty() {
            return Err(BackendError::InvalidConfig(
                "server base url cannot be empty".into(),
            ));
        }
        if !base.contains("://") {
            let inferred_scheme = infer_scheme(&base);
            base = format!("{inferred_scheme}{base}");
        }
        let mut parsed = Url::parse(&base)
            .map_err(|err| BackendError::InvalidConfig(format!("invalid server url: {err}")))?;
        if parsed.cannot_be_a_base() {
            return Err(BackendError::InvalidConfig(format!(
                "server url '{parsed}' cannot be used as a base"
            )));
        }
        // Endpoint paths are joined relative to the base, which needs a trailing slash.
        if !parsed.path().ends_with('/') {
            let path = format!("{}/", parsed.path());
            parsed.set_path(&path);
        }
        Ok(Self {
            base_url: parsed,
            timeouts: Timeouts::default(),
        })
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        self.base_url.join(path).map_err(|err| {
            BackendError::InvalidConfig(format!("invalid endpoint '{path}': {err}"))
        })
    }

    /// Url of the opaque camera stream. Front ends embed it; nothing here parses it.
    pub fn video_feed_url(&self) -> Result<Url, BackendError> {
        self.endpoint("video_feed")
    }
}

fn infer_scheme(base: &str) -> &'static str {
    let host_part = base
        .split('/')
        .next()
        .unwrap_or(base)
        .trim_start_matches('[')
        .split(']')
        .next()
        .unwrap_or(base);
    let host_lower = host_part.to_ascii_lowercase();
    if host_lower.starts_with("localhost")
        || host_lower.starts_with("0.0.0.0")
        || host_lower.starts_with("127.")
        || host_lower == "::1"
        || host_lower.starts_with("10.")
        || host_lower.starts_with("192.168.")
    {
        "http://"
    } else {
        "https://"
    }
}

/// [`CartBackend`] over HTTP.
#[derive(Clone, Debug)]
pub struct ReqwestCartBackend {
    client: Client,
    config: ServerConfig,
}

impl ReqwestCartBackend {
    pub fn new(config: ServerConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .no_proxy()
            .build()
            .map_err(|err| BackendError::InvalidConfig(format!("http client: {err}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, BackendError> {
        let endpoint = self.config.endpoint(path)?;
        Ok(self.client.request(method, endpoint))
    }

    /// Runs one exchange under a single deadline covering both the response
    /// head and the body.
    async fn call_json<T>(
        &self,
        builder: RequestBuilder,
        timeout: Duration,
    ) -> Result<T, BackendError>
    where
        T: DeserializeOwned,
    {
        let deadline = Instant::now() + timeout;
        let request = builder
            .build()
            .map_err(|err| BackendError::InvalidConfig(format!("unable to build request: {err}")))?;
        let response = fetch_with_timeout(&self.client, request, timeout).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::HttpStatus(status));
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        let body = tokio::time::timeout(remaining, response.bytes())
            .await
            .map_err(|_| TransportError::Timeout { after: timeout })?
            .map_err(TransportError::Network)?;
        serde_json::from_slice(&body).map_err(|err| BackendError::InvalidResponse(err.to_string()))
    }

    async fn call_ack(
        &self,
        builder: RequestBuilder,
        timeout: Duration,
    ) -> Result<Ack, BackendError> {
        let ack: Ack = self.call_json(builder, timeout).await?;
        ensure_success(ack)
    }
}

/// Turns a `success: false` envelope into [`BackendError::Rejected`].
pub fn ensure_success(ack: Ack) -> Result<Ack, BackendError> {
    if ack.success {
        Ok(ack)
    } else {
        let reason = ack.reason().unwrap_or("Unknown error").to_string();
        Err(BackendError::Rejected(reason))
    }
}

#[async_trait]
impl CartBackend for ReqwestCartBackend {
    async fn start_capture(&self) -> Result<Ack, BackendError> {
        let builder = self.request(Method::POST, "camera/start")?;
        self.call_ack(builder, self.config.timeouts.camera_start).await
    }

    async fn stop_capture(&self) -> Result<Ack, BackendError> {
        let builder = self.request(Method::POST, "camera/stop")?;
        self.call_ack(builder, self.config.timeouts.camera_stop).await
    }

    async fn poll_signal(&self) -> Result<PromptSignal, BackendError> {
        let builder = self.request(Method::GET, "prompt")?;
        self.call_json(builder, self.config.timeouts.prompt).await
    }

    async fn fetch_cart(&self) -> Result<CartSnapshot, BackendError> {
        let builder = self.request(Method::GET, "cart")?;
        self.call_json(builder, self.config.timeouts.default).await
    }

    async fn update_quantity(
        &self,
        id: LineId,
        action: QuantityAction,
    ) -> Result<Ack, BackendError> {
        let builder = self
            .request(Method::POST, &format!("cart/update/{id}"))?
            .json(&UpdateQuantityRequest { action });
        self.call_ack(builder, self.config.timeouts.default).await
    }

    async fn remove_line(&self, id: LineId) -> Result<Ack, BackendError> {
        let builder = self.request(Method::POST, &format!("cart/remove/{id}"))?;
        self.call_ack(builder, self.config.timeouts.default).await
    }

    async fn clear_cart(&self) -> Result<Ack, BackendError> {
        let builder = self.request(Method::POST, "cart/clear")?;
        self.call_ack(builder, self.config.timeouts.default).await
    }

    async fn add_by_name(&self, name: &str) -> Result<Ack, BackendError> {
        let builder = self
            .request(Method::POST, "cart/add")?
            .json(&AddByNameRequest { name });
        self.call_ack(builder, self.config.timeouts.default).await
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, BackendError> {
        let mut endpoint = self.config.endpoint("search")?;
        endpoint.query_pairs_mut().append_pair("query", query);
        let builder = self.client.get(endpoint);
        self.call_json(builder, self.config.timeouts.default).await
    }

    async fn checkout(&self) -> Result<Ack, BackendError> {
        let builder = self.request(Method::POST, "checkout")?;
        self.call_ack(builder, self.config.timeouts.default).await
    }
}
