//! HTTP routes
//!
//! | Method | Path | |
//! |---|---|---|
//! | GET | `/environments/environments.json` | cached index document |
//! | GET | `/environments/socket` | WebSocket bus |
//! | POST | `/environments/reindex` | rebuild and publish the index |
//! | GET | `/artefacts/list[/*path]` | child names |
//! | GET | `/artefacts/env/:ns/:owner/:name` | file listing |
//! | GET | `/artefacts/env/:ns/:owner/:name/:file` | raw file |
//! | POST | `/artefacts/env/:ns/:owner/:name` | multipart upload |
//! | DELETE | `/artefacts/env/:ns/:owner/:name` | remove environment |

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Multipart, Path, State};
use axum::http::header::{CONTENT_TYPE, LAST_MODIFIED};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::ApiError;
use crate::artefacts::EnvironmentPath;
use crate::catalog::Catalog;
use crate::compressed::content_type_for;
use crate::socket_server::handle_connection;

/// Largest accepted upload body
pub const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

type AppState = State<Arc<Catalog>>;

/// Every route, unprefixed
pub fn routes(catalog: Arc<Catalog>) -> Router {
    Router::new()
        .route("/environments/environments.json", get(environments_json))
        .route("/environments/socket", get(socket))
        .route("/environments/reindex", axum::routing::post(reindex))
        .route("/artefacts/list", get(list_root))
        .route("/artefacts/list/*path", get(list))
        .route(
            "/artefacts/env/:ns/:owner/:name",
            get(environment_files)
                .post(upload)
                .delete(remove_environment),
        )
        .route("/artefacts/env/:ns/:owner/:name/:file", get(environment_file))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(catalog)
}

#[derive(Debug, Serialize)]
struct IndexSummary {
    environments: usize,
}

#[derive(Debug, Serialize)]
struct FileInfo {
    size: u64,
    modified: DateTime<Utc>,
}

/// Run blocking catalog work off the async runtime
async fn blocking<T, F>(catalog: &Arc<Catalog>, work: F) -> Result<crate::error::Result<T>, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Catalog) -> crate::error::Result<T> + Send + 'static,
{
    let catalog = Arc::clone(catalog);
    tokio::task::spawn_blocking(move || work(&catalog))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))
}

fn environment_path(ns: &str, owner: &str, name: &str) -> Result<EnvironmentPath, ApiError> {
    Ok(EnvironmentPath::new(ns.parse()?, owner, name)?)
}

async fn environments_json(State(catalog): AppState, headers: HeaderMap) -> Response {
    catalog.environments_json().respond(&headers)
}

async fn socket(
    ws: WebSocketUpgrade,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    State(catalog): AppState,
) -> Response {
    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    ws.on_upgrade(move |socket| handle_connection(socket, peer, catalog))
}

async fn reindex(State(catalog): AppState) -> Result<Json<IndexSummary>, ApiError> {
    let index = blocking(&catalog, Catalog::reindex).await??;
    Ok(Json(IndexSummary {
        environments: index.len(),
    }))
}

async fn list_root(State(catalog): AppState) -> Result<Json<Vec<String>>, ApiError> {
    let names = blocking(&catalog, |catalog| catalog.store().list(&[])).await??;
    Ok(Json(names))
}

async fn list(
    State(catalog): AppState,
    Path(path): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    let names = blocking(&catalog, move |catalog| {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        catalog.store().list(&segments)
    })
    .await??;

    Ok(Json(names))
}

async fn environment_files(
    State(catalog): AppState,
    Path((ns, owner, name)): Path<(String, String, String)>,
) -> Result<Json<BTreeMap<String, FileInfo>>, ApiError> {
    let path = environment_path(&ns, &owner, &name)?;
    let files = blocking(&catalog, move |catalog| catalog.store().get_environment(&path)).await??;

    let listing = files
        .iter()
        .map(|(name, file)| {
            (
                name.clone(),
                FileInfo {
                    size: file.size(),
                    modified: file.modified(),
                },
            )
        })
        .collect();

    Ok(Json(listing))
}

async fn environment_file(
    State(catalog): AppState,
    Path((ns, owner, name, file)): Path<(String, String, String, String)>,
) -> Result<Response, ApiError> {
    let path = environment_path(&ns, &owner, &name)?;
    let file = blocking(&catalog, move |catalog| catalog.store().get_file(&path, &file)).await??;

    let headers = [
        (CONTENT_TYPE, content_type_for(file.name()).to_string()),
        (
            LAST_MODIFIED,
            file.modified()
                .format("%a, %d %b %Y %H:%M:%S GMT")
                .to_string(),
        ),
    ];

    Ok((StatusCode::OK, headers, file.into_bytes()).into_response())
}

async fn upload(
    State(catalog): AppState,
    Path((ns, owner, name)): Path<(String, String, String)>,
    mut multipart: Multipart,
) -> Result<Json<IndexSummary>, ApiError> {
    let path = environment_path(&ns, &owner, &name)?;
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        let filename = field
            .name()
            .filter(|name| !name.is_empty())
            .or_else(|| field.file_name())
            .map(str::to_string)
            .ok_or_else(|| ApiError::BadRequest("unnamed upload part".to_string()))?;

        let contents = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;

        files.push((filename, std::io::Cursor::new(contents)));
    }

    if files.is_empty() {
        return Err(ApiError::BadRequest("no files uploaded".to_string()));
    }

    tracing::info!("Uploading {} files to {}", files.len(), path);

    let index = blocking(&catalog, move |catalog| catalog.write_environment(&path, files))
        .await?
        .map_err(ApiError::from_write)?;

    Ok(Json(IndexSummary {
        environments: index.len(),
    }))
}

async fn remove_environment(
    State(catalog): AppState,
    Path((ns, owner, name)): Path<(String, String, String)>,
) -> Result<Json<IndexSummary>, ApiError> {
    let path = environment_path(&ns, &owner, &name)?;

    let index = blocking(&catalog, move |catalog| catalog.remove_environment(&path))
        .await?
        .map_err(ApiError::from_write)?;

    Ok(Json(IndexSummary {
        environments: index.len(),
    }))
}
