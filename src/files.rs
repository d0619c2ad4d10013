//! 文件列表与下载处理器。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Path};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use httpdate::fmt_http_date;
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::storage::{FileSummary, Storage};

/// 列出已上传文件及其标题、描述。
pub async fn list_files(
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<JsonResponse<Vec<FileSummary>>, ApiError> {
    let summaries = storage.list_summaries().await.map_err(|err| {
        warn!(error = ?err, root = ?storage.root_path(), "failed to list files");
        ApiError::Internal("Failed to list files".into())
    })?;
    info!(count = summaries.len(), "list files");
    Ok(JsonResponse(summaries))
}

/// 下载已上传的文件（列表中 `file_path` 指向此处）。
pub async fn download_file(
    Path(name): Path<String>,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<Response, ApiError> {
    let target = storage.resolve_file_name(&name).await?;
    let metadata = fs::metadata(&target).await?;
    if !metadata.is_file() {
        return Err(ApiError::NotFound("file not found".into()));
    }
    let file = File::open(&target).await?;
    let mime = mime_guess::from_path(&target).first_or_octet_stream();

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str())
            .map_err(|_| ApiError::Internal("invalid mime type".into()))?,
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    if let Ok(modified) = metadata.modified()
        && let Ok(value) = HeaderValue::from_str(&fmt_http_date(modified))
    {
        headers.insert(header::LAST_MODIFIED, value);
    }

    info!(file_name = name, size = metadata.len(), "download file");
    Ok((
        StatusCode::OK,
        headers,
        AxumBody::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}
