use std::time::{Duration, Instant};

use async_trait::async_trait;

use airbase_types::prelude::ServiceDescriptor;

use crate::errors::ClientError;
use crate::metrics::NetMetrics;
use crate::types::{Body, NetRequest, NetResponse};

#[async_trait]
pub trait NetClient: Send + Sync {
    /// Perform exactly one HTTP call against `service`. No retries: retry
    /// policy, if any exists, belongs to the caller.
    async fn call(
        &self,
        service: &ServiceDescriptor,
        request: NetRequest,
    ) -> Result<NetResponse, ClientError>;
}

#[derive(Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
    metrics: NetMetrics,
}

impl ReqwestClient {
    pub fn metrics(&self) -> &NetMetrics {
        &self.metrics
    }

    fn classify_send_error(
        &self,
        service: &ServiceDescriptor,
        err: reqwest::Error,
    ) -> ClientError {
        if err.is_timeout() {
            self.metrics.record_timeout();
            return ClientError::Timeout {
                service: service.name.0.clone(),
                timeout_ms: service.timeout_ms,
            };
        }
        self.metrics.record_failure();
        ClientError::ConnectionRefused {
            service: service.name.0.clone(),
            detail: err.to_string(),
        }
    }
}

#[async_trait]
impl NetClient for ReqwestClient {
    async fn call(
        &self,
        service: &ServiceDescriptor,
        request: NetRequest,
    ) -> Result<NetResponse, ClientError> {
        if request.path.is_empty() {
            return Err(ClientError::Invalid("path cannot be empty".into()));
        }
        if service.timeout_ms == 0 {
            return Err(ClientError::Invalid(format!(
                "service `{}` timeout_ms must be positive",
                service.name
            )));
        }

        let url = service.base_url.join(&request.path).map_err(|err| {
            ClientError::Invalid(format!(
                "cannot join `{}` onto `{}`: {err}",
                request.path, service.base_url
            ))
        })?;

        self.metrics.record_request();

        let mut req_builder = self
            .client
            .request(request.method.clone(), url)
            .headers(request.headers.clone())
            .timeout(Duration::from_millis(service.timeout_ms));

        match &request.body {
            Body::Empty => {}
            Body::Bytes(bytes) => {
                req_builder = req_builder.body(bytes.clone());
            }
            Body::Json(value) => {
                req_builder = req_builder.json(value);
            }
        }

        let start = Instant::now();
        let resp = req_builder
            .send()
            .await
            .map_err(|err| self.classify_send_error(service, err))?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp
            .bytes()
            .await
            .map_err(|err| self.classify_send_error(service, err))?;
        let elapsed = start.elapsed();

        if status.is_server_error() {
            self.metrics.record_failure();
            return Err(ClientError::UpstreamError {
                service: service.name.0.clone(),
                status,
                headers,
                body,
            });
        }

        // 2xx-4xx relay verbatim; a downstream 4xx is the caller's business,
        // not a transport failure.
        Ok(NetResponse::new(status, headers, body, elapsed))
    }
}

#[derive(Default)]
pub struct ClientBuilder {
    metrics: NetMetrics,
    client: Option<reqwest::Client>,
    connect_timeout: Option<Duration>,
}

impl ClientBuilder {
    pub fn with_metrics(mut self, metrics: NetMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_reqwest_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<ReqwestClient, ClientError> {
        let client = match self.client {
            Some(client) => client,
            None => build_reqwest_client(self.connect_timeout)?,
        };
        Ok(ReqwestClient {
            client,
            metrics: self.metrics,
        })
    }
}

fn build_reqwest_client(connect_timeout: Option<Duration>) -> Result<reqwest::Client, ClientError> {
    reqwest::Client::builder()
        .use_rustls_tls()
        .tcp_keepalive(Some(Duration::from_secs(30)))
        .connect_timeout(connect_timeout.unwrap_or(Duration::from_secs(10)))
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|err| ClientError::Invalid(format!("failed to build reqwest client: {err}")))
}
