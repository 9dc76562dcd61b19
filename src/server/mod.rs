//! JSON-over-HTTP API for the archive and subscription services.

mod handlers;
mod routes;

pub use routes::create_router;

use std::future::Future;

use tokio::net::TcpListener;
use tracing::info;

use crate::service::{SiteArchiveService, SubscriptionService};

/// Shared state for the API server.
#[derive(Clone)]
pub struct AppState {
    pub archive: SiteArchiveService,
    pub subscriptions: SubscriptionService,
}

/// Turn a bare `:8080` listen address into a bindable one.
fn listen_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}

/// Serve the API until the shutdown future resolves, then drain connections.
pub async fn serve(
    state: AppState,
    addr: &str,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let listener = TcpListener::bind(listen_addr(addr)).await?;
    info!(listen_addr = %listener.local_addr()?, "start listening...");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
