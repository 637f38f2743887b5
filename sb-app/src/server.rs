//! SkillBridge server: builds the relay state and mounts the HTTP surface.

use crate::claims::CallerPolicy;
use crate::config::BridgeConfig;
use crate::delivery::{ActivitySink, ConnectorDelivery};
use crate::routes;
use anyhow::Result;
use axum::Extension;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::Response;
use sb_relay::{
    ConversationStore, HttpSkillTransport, HttpTokenExchanger, InMemoryConversationStore,
    TokenExchangeInterceptor,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

const HTTP_MAX_IN_FLIGHT: usize = 256;
const HTTP_TIMEOUT_SECONDS: u64 = 30;

pub struct BridgeState {
    pub started_at: Instant,
    pub interceptor: TokenExchangeInterceptor,
    pub store: Arc<dyn ConversationStore>,
    pub sink: Arc<dyn ActivitySink>,
    pub caller_policy: CallerPolicy,
    pub skill_count: usize,
    pub shutdown: CancellationToken,
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, path) = BridgeConfig::load_with_path(config_path).await?;
    let registry = cfg.registry()?;
    tracing::info!(
        host_app_id = %cfg.host.app_id,
        host_endpoint = %cfg.host.host_endpoint,
        connection_name = %cfg.host.connection_name,
        token_endpoint = %cfg.token_service.endpoint,
        registered_skills = registry.len(),
        allowed_callers = ?cfg.effective_allowed_callers(),
        config_path = %path.display(),
        "config ok"
    );
    Ok(())
}

pub fn build_state(cfg: &BridgeConfig, shutdown: CancellationToken) -> Result<Arc<BridgeState>> {
    let registry = Arc::new(cfg.registry()?);
    let store: Arc<dyn ConversationStore> = Arc::new(InMemoryConversationStore::new());
    let token_timeout = Duration::from_secs(cfg.token_service.timeout_seconds);
    let exchanger = Arc::new(HttpTokenExchanger::new(cfg.token_endpoint()?, token_timeout)?);
    let transport = Arc::new(HttpSkillTransport::new(token_timeout)?);
    let sink: Arc<dyn ActivitySink> = Arc::new(ConnectorDelivery::new(token_timeout)?);

    let interceptor = TokenExchangeInterceptor::new(
        cfg.relay_settings()?,
        registry.clone(),
        store.clone(),
        exchanger,
        transport,
    );

    Ok(Arc::new(BridgeState {
        started_at: Instant::now(),
        interceptor,
        store,
        sink,
        caller_policy: CallerPolicy::new(cfg.effective_allowed_callers()),
        skill_count: registry.len(),
        shutdown,
    }))
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, cfg_path) = BridgeConfig::load_with_path(config_path).await?;
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.host.port));
    tracing::info!(
        host_app_id = %cfg.host.app_id,
        host_endpoint = %cfg.host.host_endpoint,
        connection_name = %cfg.host.connection_name,
        token_endpoint = %cfg.token_service.endpoint,
        registered_skills = cfg.skills.len(),
        allowed_callers = ?cfg.effective_allowed_callers(),
        bind_addr = %addr,
        config_path = %cfg_path.display(),
        "server configuration loaded"
    );
    let listener = preflight_bind_listener(addr).await?;

    let shutdown = CancellationToken::new();
    let state = build_state(&cfg, shutdown.clone())?;

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id_from_headers(request.headers())
            )
        })
        .on_response(
            |response: &Response, latency: Duration, _span: &tracing::Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "http request completed"
                );
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &tracing::Span| {
                tracing::error!(
                    error_class = %error,
                    latency_ms = latency.as_millis() as u64,
                    "http request failed"
                );
            },
        );

    let app = routes::router()
        .layer(Extension(state))
        .layer(GlobalConcurrencyLimitLayer::new(HTTP_MAX_IN_FLIGHT))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(HTTP_TIMEOUT_SECONDS),
        ))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    tracing::info!(%addr, "skillbridge serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;
    tracing::info!("http server shutdown completed");

    shutdown.cancel();
    Ok(())
}

async fn preflight_bind_listener(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("preflight bind failed for {addr}: {e}"))?;
    tracing::info!(%addr, "preflight bind check passed");
    Ok(listener)
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "missing".to_string())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to await ctrl-c signal");
        } else {
            tracing::warn!("received ctrl-c; beginning graceful shutdown");
        }
    }
    shutdown.cancel();
}
