use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    routing::post,
};
use std::sync::Arc;

use super::TableStore;
use super::protocol::*;
use super::types::StoreError;

type HandlerError = (StatusCode, Json<ErrorResponse>);

/// Builds the table server router over any `TableStore`.
pub fn router(store: Arc<dyn TableStore>) -> Router {
    Router::new()
        .route(
            &format!("{}/:table", ENDPOINT_TABLES),
            post(handle_create_table).delete(handle_delete_table),
        )
        .route(
            &format!("{}/:table{}", ENDPOINT_TABLES, ENDPOINT_SCAN),
            post(handle_scan),
        )
        .route(
            &format!("{}/:table{}", ENDPOINT_TABLES, ENDPOINT_INSERT),
            post(handle_insert),
        )
        .route(
            &format!("{}/:table{}", ENDPOINT_TABLES, ENDPOINT_REPLACE),
            post(handle_replace),
        )
        .layer(Extension(store))
}

fn error_response(error: StoreError) -> HandlerError {
    let (status, key) = match &error {
        StoreError::PreconditionFailed(key) => (StatusCode::PRECONDITION_FAILED, Some(key.clone())),
        StoreError::TableNotFound(_) => (StatusCode::NOT_FOUND, None),
        StoreError::Protocol(_) => (StatusCode::BAD_REQUEST, None),
        StoreError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, None),
    };

    if status.is_server_error() {
        tracing::error!("Table store request failed: {}", error);
    } else {
        tracing::debug!("Table store request rejected: {}", error);
    }

    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            key,
        }),
    )
}

pub async fn handle_create_table(
    Extension(store): Extension<Arc<dyn TableStore>>,
    Path(table): Path<String>,
) -> Result<Json<CreateTableResponse>, HandlerError> {
    let created = store
        .create_table_if_absent(&table)
        .await
        .map_err(error_response)?;
    Ok(Json(CreateTableResponse { created }))
}

pub async fn handle_delete_table(
    Extension(store): Extension<Arc<dyn TableStore>>,
    Path(table): Path<String>,
) -> Result<Json<DeleteTableResponse>, HandlerError> {
    let deleted = store.delete_table(&table).await.map_err(error_response)?;
    Ok(Json(DeleteTableResponse { deleted }))
}

pub async fn handle_scan(
    Extension(store): Extension<Arc<dyn TableStore>>,
    Path(table): Path<String>,
    Json(req): Json<ScanRequest>,
) -> Result<Json<ScanResponse>, HandlerError> {
    let page = store
        .scan(&table, &req.filter, req.continuation.as_ref())
        .await
        .map_err(error_response)?;

    tracing::trace!("Scan of {} returned {} rows", table, page.rows.len());

    Ok(Json(ScanResponse {
        rows: page.rows,
        continuation: page.continuation,
    }))
}

pub async fn handle_insert(
    Extension(store): Extension<Arc<dyn TableStore>>,
    Path(table): Path<String>,
    Json(req): Json<InsertRowRequest>,
) -> Result<Json<InsertRowResponse>, HandlerError> {
    let token = store
        .insert_if_absent(&table, &req.key, req.properties)
        .await
        .map_err(error_response)?;
    Ok(Json(InsertRowResponse { token }))
}

pub async fn handle_replace(
    Extension(store): Extension<Arc<dyn TableStore>>,
    Path(table): Path<String>,
    Json(req): Json<ReplaceRowRequest>,
) -> Result<Json<ReplaceRowResponse>, HandlerError> {
    let token = store
        .conditional_replace(&table, &req.key, &req.token, req.properties)
        .await
        .map_err(error_response)?;
    Ok(Json(ReplaceRowResponse { token }))
}
