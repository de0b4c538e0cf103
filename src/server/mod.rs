//! HTTP and WebSocket server
//!
//! One axum router carries the artefact routes, the cached index document
//! and the bus socket, optionally nested under a path prefix.

pub mod error;
pub mod routes;

pub use error::ApiError;
pub use routes::routes;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;

use crate::catalog::Catalog;

/// Normalise a mount point: `"softpack/"` -> `"/softpack"`, `"/"` -> `""`
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

/// The full application, mounted under `path_prefix`
pub fn app(catalog: Arc<Catalog>, path_prefix: &str) -> Router {
    let prefix = normalize_prefix(path_prefix);
    let routes = routes(catalog);

    if prefix.is_empty() {
        routes
    } else {
        Router::new().nest(&prefix, routes)
    }
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(
    catalog: Arc<Catalog>,
    listener: TcpListener,
    path_prefix: &str,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    let app = app(catalog, path_prefix);

    tracing::info!(
        "Listening on http://{}{}",
        addr,
        normalize_prefix(path_prefix)
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}
