use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::Router;
use axum::extract::{MatchedPath, Request};
use axum::middleware::{Next, from_fn};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{any, get};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::signal;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::instrument;

use crate::api::handler::*;
use crate::constants::{STATUS_FAILURE, STATUS_OK};
use crate::util::env::{Env, Var};
use crate::util::helix::{Helix, HelixErr};
use crate::util::ratelimit::ResetWaiter;
use crate::util::tmi::{Tmi, TmiErr};

pub type JsonResult<T> = core::result::Result<Json<T>, RouteError>;

#[derive(Debug, Clone)]
pub struct AppState {
    pub tmi: Tmi,
    pub helix: Helix,
}

impl AppState {
    pub fn from_env(env: &Env) -> Result<Self, StartupError> {
        let client_id = env.get(Var::ClientId)?;
        let tmi = Tmi::new(env.get(Var::TmiBaseUrl)?, client_id)?;
        let helix = Helix::new(
            env.get(Var::HelixBaseUrl)?,
            client_id,
            env.get(Var::HelixAppToken).ok(),
            Arc::new(ResetWaiter),
        )?;

        Ok(Self { tmi, helix })
    }
}

/// Envelope returned in place of a payload.
///
/// The relay reports failures through this envelope rather than the HTTP status line, which stays
/// at `200 OK` either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEnvelope {
    pub status: u16,
}

impl StatusEnvelope {
    pub fn ok() -> Self {
        Self { status: STATUS_OK }
    }

    pub fn failure() -> Self {
        Self {
            status: STATUS_FAILURE,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/join/{channel}", any(join_request))
        .route("/channel/{channel}/audience", any(audience_request))
        //
        // proxied helix requests
        .route("/helix/by-login/{login}", get(helix_user_by_login))
        .fallback(unknown_request)
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                let method = req.method();
                let uri = req.uri();

                let matched_path = req
                    .extensions()
                    .get::<MatchedPath>()
                    .map(|matched| matched.as_str());

                tracing::debug_span!("api_request", ?method, ?uri, ?matched_path)
            }),
        )
        .layer(from_fn(log_route_errors))
        .with_state(state)
}

#[instrument(skip(state, tx))]
pub async fn serve(
    state: Arc<AppState>,
    port: u16,
    tx: UnboundedSender<SocketAddr>,
) -> Result<(), StartupError> {
    let socket_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    let listener = tokio::net::TcpListener::bind(socket_addr).await?;

    // receiver only exists for logging; nothing to do if it's gone
    _ = tx.send(listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shut down");
    Ok(())
}

/// Custom error trace handler for `RouteError`-type responses
///
/// Route errors render as an ordinary `200 OK` envelope, so this is the only place they surface.
#[instrument(skip(request, next), fields(uri = request.uri().to_string()))]
async fn log_route_errors(request: Request, next: Next) -> Response {
    let res = next.run(request).await;
    if let Some(err) = res.extensions().get::<Arc<RouteError>>() {
        tracing::error!(error = ?err, "error occurred inside route handler");
    }

    res
}

#[instrument(skip(env, rx))]
pub async fn start_server(
    env: &'static Env,
    tx: UnboundedSender<SocketAddr>,
    mut rx: UnboundedReceiver<SocketAddr>,
) -> Result<Vec<JoinHandle<()>>, StartupError> {
    tracing::info!("starting server");
    let state = Arc::new(AppState::from_env(env)?);
    let port = env.server_api_port;

    let server_handle = tokio::task::spawn(async move {
        if let Err(e) = serve(state, port, tx).await {
            tracing::error!(error = ?e, "server exited with error");
        }
    });

    let logging_handle = tokio::task::spawn(async move {
        if let Some(addr) = rx.recv().await {
            tracing::info!(
                server_url = &format!("http://127.0.0.1:{}", addr.port()),
                "server ready"
            );
        }
    });

    Ok(vec![server_handle, logging_handle])
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = ?e, "failed to install ctrl+c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = ?e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl+c, shutting down"),
        _ = terminate => tracing::info!("received terminate signal, shutting down"),
    }
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    TmiError(#[from] TmiErr),

    #[error(transparent)]
    HelixError(#[from] HelixErr),
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        let mut response = (StatusCode::OK, Json(StatusEnvelope::failure())).into_response();
        response.extensions_mut().insert(Arc::new(self));

        response
    }
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Env(#[from] crate::util::env::EnvErr),

    #[error(transparent)]
    Tmi(#[from] TmiErr),

    #[error(transparent)]
    Helix(#[from] HelixErr),
}
