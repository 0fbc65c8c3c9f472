//! 上传处理器：校验 multipart 文件字段、按日期分区落盘并登记元数据。

use axum::body::Bytes;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Extension, Multipart};
use axum::response::Json as JsonResponse;
use chrono::Local;
use futures_util::stream::{Stream, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::atomic::AtomicFile;
use crate::config::ALLOWED_EXTENSIONS;
use crate::error::ApiError;
use crate::metadata::{FileRecord, MetadataStore, format_size};
use crate::storage::{Storage, sanitize_filename, split_extension, unique_filename};

const FILE_FIELD: &str = "file";
const UPLOAD_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

#[derive(Serialize)]
pub(crate) struct UploadResponse {
    success: bool,
    message: &'static str,
    file: FileRecord,
}

/// 接收 `file` 字段；首个文件字段即被处理，其余字段忽略。
pub async fn upload_file(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(store): Extension<Arc<MetadataStore>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<JsonResponse<UploadResponse>, ApiError> {
    // 非 multipart 请求体同样视为缺少文件字段
    let mut multipart = multipart.map_err(|rejection| {
        debug!(error = %rejection, "upload body is not multipart");
        ApiError::BadRequest("No file part".into())
    })?;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        // A `file` part without a filename is a plain form value.
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };

        let extension = validate_filename(&filename)?;
        let record = persist_upload(&storage, &store, &filename, &extension, field).await?;
        return Ok(JsonResponse(UploadResponse {
            success: true,
            message: "File uploaded successfully",
            file: record,
        }));
    }

    Err(ApiError::BadRequest("No file part".into()))
}

/// 校验客户端文件名，返回小写扩展名。
fn validate_filename(filename: &str) -> Result<String, ApiError> {
    if filename.is_empty() {
        return Err(ApiError::BadRequest("No selected file".into()));
    }
    allowed_extension(filename).ok_or_else(|| {
        ApiError::BadRequest(format!(
            "File type not allowed. Allowed: {}",
            ALLOWED_EXTENSIONS.join(", ")
        ))
    })
}

fn allowed_extension(filename: &str) -> Option<String> {
    let (_, extension) = filename.rsplit_once('.')?;
    let extension = extension.to_ascii_lowercase();
    ALLOWED_EXTENSIONS
        .contains(&extension.as_str())
        .then_some(extension)
}

/// 清洗后的原始文件名；清洗后丢失扩展名时补回，为空时退化为 `file.<ext>`。
fn stored_original_name(filename: &str, extension: &str) -> String {
    let sanitized = sanitize_filename(filename);
    let (_, current_ext) = split_extension(&sanitized);
    if !current_ext.is_empty() {
        return sanitized;
    }
    if sanitized.is_empty() || sanitized.eq_ignore_ascii_case(extension) {
        format!("file.{extension}")
    } else {
        format!("{sanitized}.{extension}")
    }
}

/// 将 `body` 流式写入 `YYYY/MM/DD/<unique name>` 并登记元数据。
///
/// 文件完整落盘后才写入元数据；元数据保存失败时文件保留在磁盘上。
async fn persist_upload<S, E>(
    storage: &Storage,
    store: &MetadataStore,
    filename: &str,
    extension: &str,
    body: S,
) -> Result<FileRecord, ApiError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<ApiError>,
{
    let now = Local::now();
    let original_name = stored_original_name(filename, extension);
    let unique_name = unique_filename(&original_name, &now);
    let (subdir, dir) = storage.date_subdir(&now).await?;
    let target = dir.join(&unique_name);

    let mut body = std::pin::pin!(body);
    let mut atomic = AtomicFile::new(&target).await?;
    let write_result: Result<u64, ApiError> = async {
        let mut received: u64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(Into::into)?;
            if chunk.is_empty() {
                continue;
            }
            received += chunk.len() as u64;
            atomic.file_mut().write_all(&chunk).await?;
        }
        Ok(received)
    }
    .await;
    let received = match write_result {
        Ok(received) => received,
        Err(err) => {
            atomic.cleanup().await;
            return Err(err);
        }
    };
    atomic.finalize().await?;

    let size = fs::metadata(&target).await?.len();
    debug!(unique_name, received, size, "upload written");

    let record = FileRecord {
        original_name,
        unique_name: unique_name.clone(),
        size,
        size_human: format_size(size),
        upload_date: now.format(UPLOAD_DATE_FORMAT).to_string(),
        path: format!("{subdir}/{unique_name}"),
        subdir,
    };

    let mut txn = store.begin().await?;
    txn.records_mut().insert(unique_name.clone(), record.clone());
    txn.commit().await?;

    info!(
        unique_name,
        original_name = record.original_name,
        size,
        "file uploaded"
    );
    Ok(record)
}
