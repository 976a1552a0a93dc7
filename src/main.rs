use std::net::SocketAddr;

use futures::future::join_all;
use thiserror::Error;

use crate::api::server::StartupError;
use crate::util::env::{EnvErr, get_env};
use crate::util::telemetry;

mod api;
mod constants;
mod util;

#[derive(Debug, Error)]
enum RunnerErr {
    #[error(transparent)]
    Env(#[from] EnvErr),

    #[error(transparent)]
    Startup(#[from] StartupError),

    #[error(transparent)]
    Std(#[from] Box<dyn std::error::Error>),
}

type Result<T> = core::result::Result<T, RunnerErr>;

#[tokio::main]
async fn main() -> Result<()> {
    let env = get_env().await?;
    let telemetry_registry = telemetry::Telemetry::new().await?.register();

    tracing::info!("starting main application");

    let (tx_server_ready, rx_server_ready) = tokio::sync::mpsc::unbounded_channel::<SocketAddr>();
    let handles = api::server::start_server(env, tx_server_ready, rx_server_ready).await?;

    _ = join_all(handles).await;

    telemetry_registry.shutdown();
    Ok(())
}
