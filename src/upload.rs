//! 多部分表单上传：内容与元数据旁路文件均经临时文件原子落盘。

use axum::extract::multipart::{Field, MultipartError, MultipartRejection};
use axum::extract::{Extension, Multipart};
use axum::response::Json as JsonResponse;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::atomic::{AtomicFile, write_atomic};
use crate::error::ApiError;
use crate::locking::{LockManager, NameGuard};
use crate::storage::{MetadataRecord, Storage, display_path, sidecar_path};

#[derive(Serialize, Debug)]
pub struct UploadResponse {
    message: &'static str,
    file_name: String,
    file_path: String,
    metadata_path: String,
    title: String,
    description: String,
}

/// A file part that has been streamed to a temp file but not yet published.
struct PendingFile<'a> {
    name: String,
    target: PathBuf,
    atomic: AtomicFile,
    bytes: u64,
    guard: NameGuard<'a>,
}

impl PendingFile<'_> {
    async fn discard(self) {
        self.atomic.cleanup().await;
        self.guard.release().await;
    }
}

/// 处理 `POST /upload`：`file` 必填，`title`、`description` 可选，顺序任意。
pub async fn upload_file(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(lock_manager): Extension<Arc<LockManager>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<JsonResponse<UploadResponse>, ApiError> {
    let mut multipart = multipart.map_err(|err| {
        warn!(error = %err, "upload request is not multipart");
        retrieve_failed()
    })?;

    let mut pending: Option<PendingFile<'_>> = None;
    let mut title = String::new();
    let mut description = String::new();

    let parsed: Result<(), ApiError> = async {
        while let Some(field) = multipart.next_field().await.map_err(malformed)? {
            let field_name = field.name().map(str::to_string);
            match field_name.as_deref() {
                Some("file") => {
                    if pending.is_some() {
                        return Err(ApiError::BadRequest("multiple file parts".into()));
                    }
                    pending = Some(receive_file(&storage, &lock_manager, field).await?);
                }
                Some("title") => title = field.text().await.map_err(malformed)?,
                Some("description") => description = field.text().await.map_err(malformed)?,
                other => {
                    debug!(field = other.unwrap_or(""), "ignoring multipart field");
                    drain(field).await?;
                }
            }
        }
        Ok(())
    }
    .await;

    if let Err(err) = parsed {
        if let Some(file) = pending {
            file.discard().await;
        }
        return Err(err);
    }
    let Some(file) = pending else {
        warn!("upload request has no file part");
        return Err(retrieve_failed());
    };

    let PendingFile {
        name,
        target,
        atomic,
        bytes,
        guard,
    } = file;
    let result = publish(name, target, atomic, bytes, title, description).await;
    guard.release().await;
    result.map(JsonResponse)
}

/// Streams one `file` part into a temp file next to its destination.
async fn receive_file<'a>(
    storage: &Storage,
    lock_manager: &'a LockManager,
    mut field: Field<'_>,
) -> Result<PendingFile<'a>, ApiError> {
    let name = field
        .file_name()
        .map(str::to_string)
        .ok_or_else(retrieve_failed)?;
    let target = storage.resolve_file_name(&name).await.map_err(|err| {
        warn!(file_name = name, "rejected upload file name");
        ApiError::from(err)
    })?;

    let guard = lock_manager.lock_name(&name).await.map_err(|_| {
        warn!(file_name = name, "upload of the same file still in progress");
        ApiError::Conflict("file is busy".into())
    })?;
    info!(file_name = name, path = ?target, "receiving upload");

    let mut atomic = match AtomicFile::new(&target).await {
        Ok(atomic) => atomic,
        Err(err) => {
            warn!(path = ?target, error = %err, "failed to create temp file");
            guard.release().await;
            return Err(save_failed());
        }
    };

    let mut bytes: u64 = 0;
    let streamed: Result<(), ApiError> = async {
        while let Some(chunk) = field.chunk().await.map_err(malformed)? {
            if chunk.is_empty() {
                continue;
            }
            bytes += chunk.len() as u64;
            atomic.write_all(&chunk).await.map_err(|err| {
                warn!(path = ?target, error = %err, "failed to write upload");
                save_failed()
            })?;
        }
        Ok(())
    }
    .await;

    if let Err(err) = streamed {
        atomic.cleanup().await;
        guard.release().await;
        return Err(err);
    }

    Ok(PendingFile {
        name,
        target,
        atomic,
        bytes,
        guard,
    })
}

/// 发布内容文件，再写入元数据；元数据失败时内容文件保留。
async fn publish(
    name: String,
    target: PathBuf,
    atomic: AtomicFile,
    bytes: u64,
    title: String,
    description: String,
) -> Result<UploadResponse, ApiError> {
    if let Err(err) = atomic.finalize().await {
        warn!(path = ?target, error = %err, "failed to save file");
        return Err(save_failed());
    }
    info!(file_name = name, bytes, "file saved");

    let record = MetadataRecord {
        title,
        description,
        filename: name,
    };
    let metadata_path = sidecar_path(&target);
    let mut encoded = serde_json::to_vec(&record).map_err(|err| {
        warn!(error = %err, "failed to encode metadata");
        ApiError::Internal("Failed to write metadata".into())
    })?;
    encoded.push(b'\n');
    if let Err(err) = write_atomic(&metadata_path, &encoded).await {
        warn!(path = ?metadata_path, error = %err, "failed to save metadata");
        return Err(ApiError::Internal("Failed to save metadata".into()));
    }
    info!(file_name = record.filename, "metadata saved");

    Ok(UploadResponse {
        message: "File uploaded successfully",
        file_name: record.filename,
        file_path: display_path(&target),
        metadata_path: display_path(&metadata_path),
        title: record.title,
        description: record.description,
    })
}

async fn drain(mut field: Field<'_>) -> Result<(), ApiError> {
    while field.chunk().await.map_err(malformed)?.is_some() {}
    Ok(())
}

fn malformed(err: MultipartError) -> ApiError {
    warn!(error = %err, "malformed multipart body");
    retrieve_failed()
}

fn retrieve_failed() -> ApiError {
    ApiError::BadRequest("Failed to retrieve file".into())
}

fn save_failed() -> ApiError {
    ApiError::Internal("Failed to save file".into())
}
