//! Route handlers for the `/api` endpoints.

use super::error::ApiError;
use crate::app::App;
use crate::backup::{self, run_backup};
use crate::health::health as check_health;
use crate::model::BackupWithFiles;
use crate::Error;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct BackupList {
    results: Vec<BackupWithFiles>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct MessageBody {
    message: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct DownloadUrl {
    url: String,
}

pub(super) async fn ping() -> Json<serde_json::Value> {
    Json(json!({ "message": "pong" }))
}

pub(super) async fn list_backups(
    State(app): State<Arc<App>>,
) -> Result<Json<BackupList>, ApiError> {
    let results = backup::list_backups(&app).await?;
    Ok(Json(BackupList { results }))
}

pub(super) async fn start_backup(State(app): State<Arc<App>>) -> Json<MessageBody> {
    tokio::spawn(async move {
        match run_backup(&app).await {
            Ok(ids) => info!("Manual backup created {} backup(s): {:?}", ids.len(), ids),
            Err(e) => error!("Manual backup failed: {}", e),
        }
    });
    Json(MessageBody {
        message: "Backup started",
    })
}

pub(super) async fn generate_download_url(
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
) -> Result<Json<DownloadUrl>, ApiError> {
    let url = backup::generate_download_url(&app, parse_id(&id)?).await?;
    Ok(Json(DownloadUrl { url }))
}

pub(super) async fn download(
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let download = backup::download(&app, parse_id(&id)?).await?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        header_safe_filename(&download.filename)
    );
    Ok((
        [
            (header::CONTENT_TYPE, download.mime_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        download.content,
    )
        .into_response())
}

pub(super) async fn health(State(app): State<Arc<App>>) -> Response {
    let report = check_health(&app).await;
    let status = if report.is_up() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

fn parse_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|_| {
        ApiError(Error::InvalidRequest {
            reason: format!("invalid id: {}", id),
        })
    })
}

fn header_safe_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_safe_filename() {
        assert_eq!(
            header_safe_filename("app db-2025-01-01_02-00-00.sql"),
            "app_db-2025-01-01_02-00-00.sql"
        );
        assert_eq!(header_safe_filename("a\"b\r\n.sql"), "a_b__.sql");
    }

    #[test]
    fn test_parse_id_rejects_garbage() {
        let err = parse_id("not-a-uuid").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
