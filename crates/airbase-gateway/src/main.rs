use std::{
    collections::HashMap,
    env, fs,
    net::SocketAddr,
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, Request, StatusCode},
    middleware::{from_fn_with_state, Next},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use config::Config;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use airbase_errors::prelude::{codes, ErrorBuilder, ErrorObj};
use airbase_health::prelude::{HealthAggregator, HealthOptions, HealthStatus, OverallHealth};
use airbase_net::prelude::{
    Body as NetBody, ClientBuilder, ClientError, NetClient, NetMetrics, NetMetricsSnapshot,
    NetRequest, NetResponse,
};
use airbase_session::prelude::{SessionRegistry, WebSocketStats};
use airbase_types::prelude::{ServiceDescriptor, ServiceName};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = GatewayConfig::load()?;
    let state = AppState::new(config.clone()).await?;

    let routes = Router::new()
        .route("/api/health", get(health))
        .route("/api/websocket/stats", get(websocket_stats))
        .route("/ws", get(ws_handler))
        .route("/version", get(version))
        .route("/metrics", get(metrics))
        .route("/routes", get(list_routes))
        .route("/*path", any(dynamic_dispatch));

    let app = routes
        .with_state(state.clone())
        .layer(from_fn_with_state(state.clone(), metrics_middleware));

    let addr: SocketAddr = format!("{}:{}", config.server.address, config.server.port)
        .parse()
        .context("invalid server address/port")?;

    info!(%addr, "gateway listening");
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server failure")?;

    Ok(())
}

fn init_tracing() {
    if tracing::subscriber::set_global_default(
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .finish(),
    )
    .is_err()
    {
        // Subscriber already set by tests or external runtime.
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(%err, "ctrl-c handler failed; shutting down only on SIGTERM");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(%err, "SIGTERM handler failed; shutting down only on ctrl-c");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
struct GatewayConfig {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    health: HealthSettings,
    #[serde(default)]
    auth: AuthBootstrap,
    #[serde(default)]
    services: Vec<ServiceEntry>,
    #[serde(default)]
    routes: Vec<RouteEntry>,
}

impl GatewayConfig {
    fn load() -> anyhow::Result<Self> {
        let config_file = env::var("GATEWAY_CONFIG_FILE")
            .unwrap_or_else(|_| "config/gateway.local.toml".to_string());

        let mut builder = Config::builder()
            .set_default("server.address", ServerConfig::default_address())?
            .set_default("server.port", ServerConfig::default_port())?;

        if Path::new(&config_file).exists() {
            builder = builder.add_source(config::File::from(Path::new(&config_file)));
        }

        builder = builder.add_source(config::Environment::with_prefix("GATEWAY").separator("__"));

        let config: GatewayConfig = builder
            .build()
            .context("failed to build configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        Ok(config)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct ServerConfig {
    #[serde(default = "ServerConfig::default_address")]
    address: String,
    #[serde(default = "ServerConfig::default_port")]
    port: u16,
    #[serde(default = "ServerConfig::default_ws_idle_timeout_ms")]
    ws_idle_timeout_ms: u64,
    #[serde(default = "ServerConfig::default_max_body_bytes")]
    max_body_bytes: usize,
}

impl ServerConfig {
    fn default_address() -> String {
        "127.0.0.1".to_string()
    }

    fn default_port() -> u16 {
        8080
    }

    fn default_ws_idle_timeout_ms() -> u64 {
        60_000
    }

    fn default_max_body_bytes() -> usize {
        10 * 1024 * 1024
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: Self::default_address(),
            port: Self::default_port(),
            ws_idle_timeout_ms: Self::default_ws_idle_timeout_ms(),
            max_body_bytes: Self::default_max_body_bytes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct HealthSettings {
    #[serde(default = "HealthSettings::default_probe_timeout_ms")]
    probe_timeout_ms: u64,
    /// 0 keeps probing synchronous per /api/health request.
    #[serde(default)]
    check_interval_ms: u64,
}

impl HealthSettings {
    fn default_probe_timeout_ms() -> u64 {
        3_000
    }

    fn options(&self) -> HealthOptions {
        HealthOptions {
            probe_timeout_ms: self.probe_timeout_ms,
            check_interval_ms: self.check_interval_ms,
        }
    }
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            probe_timeout_ms: Self::default_probe_timeout_ms(),
            check_interval_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
struct AuthBootstrap {
    #[serde(default)]
    api_keys: Vec<ApiKeyConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct ApiKeyConfig {
    name: String,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    key_env: Option<String>,
    #[serde(default)]
    key_file: Option<String>,
}

impl ApiKeyConfig {
    fn resolve(&self) -> anyhow::Result<String> {
        resolve_secret_source(
            &self.key,
            &self.key_env,
            &self.key_file,
            &format!("auth.api_keys[{}].key", self.name),
        )
    }
}

fn resolve_secret_source(
    literal: &Option<String>,
    env_key: &Option<String>,
    file_path: &Option<String>,
    field: &str,
) -> anyhow::Result<String> {
    if let Some(env_var) = env_key.as_ref() {
        let value = env::var(env_var)
            .with_context(|| format!("environment variable {env_var} for {field} not set"))?;
        return Ok(value);
    }
    if let Some(path) = file_path.as_ref() {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read secret file {path} for {field}"))?;
        return Ok(contents.trim().to_string());
    }
    if let Some(value) = literal.as_ref() {
        if value.is_empty() {
            return Err(anyhow!("{field} literal secret cannot be empty"));
        }
        return Ok(value.clone());
    }
    Err(anyhow!("{field} secret must be provided via literal/env/file"))
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct ServiceEntry {
    name: String,
    base_url: String,
    #[serde(default = "ServiceDescriptor::default_health_path")]
    health_path: String,
    #[serde(default = "ServiceDescriptor::default_timeout_ms")]
    timeout_ms: u64,
    #[serde(default)]
    forward_api_key: Option<String>,
    #[serde(default)]
    forward_api_key_env: Option<String>,
    #[serde(default)]
    forward_api_key_file: Option<String>,
}

impl ServiceEntry {
    fn descriptor(&self) -> anyhow::Result<ServiceDescriptor> {
        let base_url = url::Url::parse(&self.base_url)
            .with_context(|| format!("service `{}` base_url `{}`", self.name, self.base_url))?;
        let descriptor = ServiceDescriptor {
            name: ServiceName(self.name.clone()),
            base_url,
            health_path: self.health_path.clone(),
            timeout_ms: self.timeout_ms,
        };
        descriptor
            .validate()
            .with_context(|| format!("service `{}`", self.name))?;
        Ok(descriptor)
    }

    fn resolve_forward_key(&self) -> anyhow::Result<Option<String>> {
        if self.forward_api_key.is_none()
            && self.forward_api_key_env.is_none()
            && self.forward_api_key_file.is_none()
        {
            return Ok(None);
        }
        resolve_secret_source(
            &self.forward_api_key,
            &self.forward_api_key_env,
            &self.forward_api_key_file,
            &format!("services[{}].forward_api_key", self.name),
        )
        .map(Some)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct RouteEntry {
    prefix: String,
    service: String,
    #[serde(default)]
    strip_prefix: bool,
    #[serde(default = "RouteEntry::default_require_auth")]
    require_auth: bool,
}

impl RouteEntry {
    fn default_require_auth() -> bool {
        true
    }
}

/// Path-prefix dispatch table. Resolved once at startup; entries are kept
/// longest-prefix-first so the first match wins.
#[derive(Debug, Clone)]
struct RouteTable {
    entries: Vec<RouteBinding>,
}

#[derive(Debug, Clone)]
struct RouteBinding {
    prefix: String,
    service: String,
    strip_prefix: bool,
    require_auth: bool,
}

impl RouteTable {
    fn build(
        routes: &[RouteEntry],
        services: &HashMap<String, ServiceHandle>,
    ) -> anyhow::Result<Self> {
        let mut entries = Vec::with_capacity(routes.len());
        for route in routes {
            if !route.prefix.starts_with('/') {
                return Err(anyhow!(
                    "route prefix `{}` must start with `/`",
                    route.prefix
                ));
            }
            if !services.contains_key(&route.service) {
                return Err(anyhow!(
                    "route `{}` targets unknown service `{}`",
                    route.prefix,
                    route.service
                ));
            }
            entries.push(RouteBinding {
                prefix: route.prefix.trim_end_matches('/').to_string(),
                service: route.service.clone(),
                strip_prefix: route.strip_prefix,
                require_auth: route.require_auth,
            });
        }
        entries.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Ok(Self { entries })
    }

    fn resolve(&self, path: &str) -> Option<&RouteBinding> {
        self.entries.iter().find(|entry| {
            path == entry.prefix
                || (path.starts_with(&entry.prefix)
                    && path.as_bytes().get(entry.prefix.len()) == Some(&b'/'))
        })
    }
}

#[derive(Clone)]
struct ServiceHandle {
    descriptor: ServiceDescriptor,
    forward_api_key: Option<String>,
}

#[derive(Clone)]
struct AppState {
    config: Arc<GatewayConfig>,
    version: VersionInfo,
    services: Arc<HashMap<String, ServiceHandle>>,
    routes: Arc<RouteTable>,
    net: Arc<dyn NetClient>,
    net_metrics: NetMetrics,
    health: Arc<HealthAggregator>,
    sessions: Arc<SessionRegistry>,
    metrics: GatewayMetrics,
    auth: Arc<AuthKeys>,
}

impl AppState {
    async fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let mut services = HashMap::new();
        let mut descriptors = Vec::new();
        for entry in &config.services {
            let descriptor = entry.descriptor()?;
            descriptors.push(descriptor.clone());
            let handle = ServiceHandle {
                descriptor,
                forward_api_key: entry.resolve_forward_key()?,
            };
            if services.insert(entry.name.clone(), handle).is_some() {
                return Err(anyhow!("duplicate service name `{}`", entry.name));
            }
        }
        let services = Arc::new(services);
        let routes = Arc::new(RouteTable::build(&config.routes, &services)?);

        let net_metrics = NetMetrics::default();
        let net: Arc<dyn NetClient> = Arc::new(
            ClientBuilder::default()
                .with_metrics(net_metrics.clone())
                .build()
                .map_err(anyhow::Error::new)?,
        );

        let health = Arc::new(HealthAggregator::new(
            descriptors,
            net.clone(),
            config.health.options(),
        ));
        if health.spawn_refresher().is_some() {
            info!(
                interval_ms = config.health.check_interval_ms,
                "background health refresher started"
            );
        }

        let auth = Arc::new(AuthKeys::from_bootstrap(&config.auth)?);

        Ok(Self {
            config: Arc::new(config),
            version: VersionInfo::from_env(),
            services,
            routes,
            net,
            net_metrics,
            health,
            sessions: Arc::new(SessionRegistry::new()),
            metrics: GatewayMetrics::default(),
            auth,
        })
    }
}

#[derive(Clone)]
struct VersionInfo {
    version: String,
    commit: Option<String>,
}

impl VersionInfo {
    fn from_env() -> Self {
        Self {
            version: env::var("GATEWAY_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            commit: env::var("GIT_COMMIT_HASH").ok(),
        }
    }
}

/// Per-request authentication context, rebuilt from headers on every call and
/// discarded when the request completes. Only key fingerprints may appear in
/// logs; raw keys never do.
#[derive(Clone, Debug)]
struct AuthContext {
    key_name: Option<String>,
    key_fingerprint: Option<String>,
    validated: bool,
}

impl AuthContext {
    fn anonymous() -> Self {
        Self {
            key_name: None,
            key_fingerprint: None,
            validated: false,
        }
    }
}

struct AuthKeys {
    keys: HashMap<String, String>,
}

impl AuthKeys {
    fn from_bootstrap(auth: &AuthBootstrap) -> anyhow::Result<Self> {
        let mut keys = HashMap::new();
        for cfg in &auth.api_keys {
            let key = cfg.resolve()?;
            if keys.insert(key, cfg.name.clone()).is_some() {
                return Err(anyhow!(
                    "auth.api_keys[{}] duplicates another configured key",
                    cfg.name
                ));
            }
        }
        if keys.is_empty() {
            warn!("no API keys configured; protected routes accept anonymous requests");
        }
        Ok(Self { keys })
    }

    fn authenticate(&self, headers: &HeaderMap) -> Result<AuthContext, ErrorObj> {
        if self.keys.is_empty() {
            return Ok(AuthContext::anonymous());
        }

        let candidate = headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .or_else(|| {
                headers
                    .get(header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.strip_prefix("Bearer "))
            });

        match candidate {
            Some(key) => match self.keys.get(key) {
                Some(name) => Ok(AuthContext {
                    key_name: Some(name.clone()),
                    key_fingerprint: Some(key_fingerprint(key)),
                    validated: true,
                }),
                None => Err(unauthenticated("Invalid API key.")),
            },
            None => Err(unauthenticated("API key required.")),
        }
    }
}

fn key_fingerprint(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(&digest[..6])
}

fn unauthenticated(msg: &str) -> ErrorObj {
    ErrorBuilder::new(codes::AUTH_UNAUTHENTICATED)
        .user_msg(msg)
        .build()
}

fn error_response(obj: &ErrorObj) -> Response {
    let status = StatusCode::from_u16(obj.http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(obj.to_public())).into_response()
}

#[derive(Serialize)]
struct GatewayHealthReport {
    status: OverallHealth,
    gateway: &'static str,
    services: Vec<HealthStatus>,
    websocket_stats: WebSocketStats,
}

/// Reports state, never gates on it: a reachable gateway answers 200 even
/// when every downstream is dark.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.health.report().await;
    Json(GatewayHealthReport {
        status: report.overall,
        gateway: env!("CARGO_PKG_NAME"),
        services: report.services,
        websocket_stats: state.sessions.stats(),
    })
}

async fn websocket_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.sessions.stats())
}

#[derive(Serialize)]
struct VersionResponse {
    version: String,
    commit: Option<String>,
}

async fn version(State(state): State<AppState>) -> impl IntoResponse {
    Json(VersionResponse {
        version: state.version.version.clone(),
        commit: state.version.commit.clone(),
    })
}

#[derive(Serialize)]
struct RouteInfo {
    prefix: String,
    service: String,
    strip_prefix: bool,
    require_auth: bool,
}

async fn list_routes(State(state): State<AppState>) -> impl IntoResponse {
    let routes: Vec<_> = state
        .routes
        .entries
        .iter()
        .map(|entry| RouteInfo {
            prefix: entry.prefix.clone(),
            service: entry.service.clone(),
            strip_prefix: entry.strip_prefix,
            require_auth: entry.require_auth,
        })
        .collect();
    Json(routes)
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.metrics.snapshot(state.net_metrics.snapshot()).await;
    Json(snapshot)
}

async fn dynamic_dispatch(State(state): State<AppState>, req: Request<Body>) -> Response {
    let path = req.uri().path().to_string();
    let Some(binding) = state.routes.resolve(&path) else {
        return error_response(
            &ErrorBuilder::new(codes::ROUTE_NOT_FOUND)
                .user_msg(format!("No route matches `{path}`."))
                .build(),
        );
    };

    if binding.require_auth {
        match state.auth.authenticate(req.headers()) {
            Ok(cx) => {
                if cx.validated {
                    debug!(
                        key = cx.key_name.as_deref().unwrap_or("?"),
                        fingerprint = cx.key_fingerprint.as_deref().unwrap_or("?"),
                        %path,
                        "request authenticated"
                    );
                }
            }
            Err(obj) => return error_response(&obj),
        }
    }

    let Some(service) = state.services.get(&binding.service) else {
        // Route table construction verifies targets; reaching this is a bug.
        return error_response(
            &ErrorBuilder::new(codes::INTERNAL)
                .user_msg("Gateway routing failure.")
                .dev_msg(format!("route `{}` lost its service", binding.prefix))
                .build(),
        );
    };

    let forward_path = derive_forward_path(binding, &path, req.uri().query());
    let method = req.method().clone();
    let mut headers = proxy_request_headers(req.headers());
    if let Some(key) = service.forward_api_key.as_deref() {
        match HeaderValue::from_str(key) {
            Ok(value) => {
                headers.insert(HeaderName::from_static("x-api-key"), value);
            }
            Err(err) => {
                return error_response(
                    &ErrorBuilder::new(codes::INTERNAL)
                        .user_msg("Gateway configuration failure.")
                        .dev_msg(format!(
                            "forward key for `{}` is not a valid header value: {err}",
                            binding.service
                        ))
                        .build(),
                );
            }
        }
    }

    let body = match axum::body::to_bytes(req.into_body(), state.config.server.max_body_bytes).await
    {
        Ok(bytes) => bytes,
        Err(err) => {
            return error_response(
                &ErrorBuilder::new(codes::SCHEMA_VALIDATION)
                    .user_msg("Request body could not be read.")
                    .dev_msg(err.to_string())
                    .build(),
            );
        }
    };

    let net_request = NetRequest::new(method, forward_path)
        .with_headers(headers)
        .with_body(if body.is_empty() {
            NetBody::Empty
        } else {
            NetBody::Bytes(body)
        });

    match state.net.call(&service.descriptor, net_request).await {
        Ok(resp) => relay_response(resp),
        Err(err) => relay_error(&binding.service, err),
    }
}

/// Path handed to the downstream: prefix optionally stripped, query always
/// preserved.
fn derive_forward_path(binding: &RouteBinding, path: &str, query: Option<&str>) -> String {
    let forwarded = if binding.strip_prefix {
        match path.strip_prefix(&binding.prefix) {
            Some("") | None => "/",
            Some(rest) => rest,
        }
    } else {
        path
    };
    match query {
        Some(query) => format!("{forwarded}?{query}"),
        None => forwarded.to_string(),
    }
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

fn proxy_request_headers(src: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in src {
        if is_hop_by_hop(name) || name == header::HOST || name == header::CONTENT_LENGTH {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

fn relay_response(resp: NetResponse) -> Response {
    let mut out = Response::new(Body::from(resp.body));
    *out.status_mut() = resp.status;
    let headers = out.headers_mut();
    for (name, value) in resp.headers.iter() {
        if is_hop_by_hop(name) || name == header::CONTENT_LENGTH {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    out
}

fn relay_error(service: &str, err: ClientError) -> Response {
    match err {
        // The downstream produced a real (5xx) answer: pass its status and
        // body through so the caller keeps the diagnostic detail.
        ClientError::UpstreamError {
            status,
            headers,
            body,
            ..
        } => {
            warn!(%service, %status, "downstream error relayed");
            relay_response(NetResponse::new(status, headers, body, Duration::ZERO))
        }
        other => {
            warn!(
                %service,
                error = %other,
                retry = other.code().retry.as_str(),
                "downstream call failed"
            );
            error_response(&other.to_obj())
        }
    }
}

async fn metrics_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let path = req.uri().path().to_string();
    let start = Instant::now();
    let response = next.run(req).await;
    let status = response.status();
    state.metrics.record(&path, status, start.elapsed()).await;
    Ok(response)
}

#[derive(Clone, Default)]
struct GatewayMetrics {
    inner: Arc<tokio::sync::Mutex<MetricsInner>>,
}

#[derive(Default)]
struct MetricsInner {
    total_requests: u64,
    total_errors: u64,
    paths: HashMap<String, PathStats>,
}

#[derive(Default)]
struct PathStats {
    request_count: u64,
    error_count: u64,
    total_latency_ms: u64,
}

impl GatewayMetrics {
    async fn record(&self, path: &str, status: StatusCode, latency: Duration) {
        let mut inner = self.inner.lock().await;
        let errored = status.is_client_error() || status.is_server_error();
        inner.total_requests += 1;
        if errored {
            inner.total_errors += 1;
        }
        let stats = inner.paths.entry(path.to_string()).or_default();
        stats.request_count += 1;
        if errored {
            stats.error_count += 1;
        }
        stats.total_latency_ms += latency.as_millis() as u64;
    }

    async fn snapshot(&self, upstream: NetMetricsSnapshot) -> MetricsSnapshot {
        let inner = self.inner.lock().await;
        let paths = inner
            .paths
            .iter()
            .map(|(path, stats)| PathMetrics {
                path: path.clone(),
                requests: stats.request_count,
                errors: stats.error_count,
                avg_latency_ms: if stats.request_count > 0 {
                    Some(stats.total_latency_ms as f64 / stats.request_count as f64)
                } else {
                    None
                },
            })
            .collect();
        MetricsSnapshot {
            total_requests: inner.total_requests,
            total_errors: inner.total_errors,
            paths,
            upstream,
        }
    }
}

#[derive(Serialize)]
struct MetricsSnapshot {
    total_requests: u64,
    total_errors: u64,
    paths: Vec<PathMetrics>,
    upstream: NetMetricsSnapshot,
}

#[derive(Serialize)]
struct PathMetrics {
    path: String,
    requests: u64,
    errors: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    avg_latency_ms: Option<f64>,
}

async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let connection_id = state.sessions.register();
    info!(connection = %connection_id, "websocket connected");

    let idle = Duration::from_millis(state.config.server.ws_idle_timeout_ms);
    loop {
        let frame = match tokio::time::timeout(idle, socket.recv()).await {
            Err(_) => {
                debug!(connection = %connection_id, "websocket idle timeout");
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(err))) => {
                debug!(connection = %connection_id, %err, "websocket read failed");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => {
                let reply = ws_reply(&state.sessions, &text);
                if socket.send(Message::Text(reply)).await.is_err() {
                    break;
                }
                state.sessions.record_message_sent(&connection_id);
            }
            Message::Close(_) => break,
            // Pings are answered by the protocol layer; binary frames are not
            // part of the message protocol.
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }

    state.sessions.unregister(&connection_id);
    info!(connection = %connection_id, "websocket disconnected");
}

fn ws_reply(sessions: &SessionRegistry, text: &str) -> String {
    let reply = match serde_json::from_str::<Value>(text) {
        Ok(value) => match value.get("type").and_then(Value::as_str) {
            Some("ping") => json!({ "type": "pong" }),
            Some("echo") => json!({
                "type": "echo",
                "payload": value.get("payload").cloned().unwrap_or(Value::Null),
            }),
            Some("stats") => json!({ "type": "stats", "stats": sessions.stats() }),
            _ => json!({ "type": "error", "message": "unsupported message type" }),
        },
        Err(_) => json!({ "type": "error", "message": "messages must be JSON objects" }),
    };
    reply.to_string()
}
