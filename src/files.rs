//! 文件列表、下载与删除处理器。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Path};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use httpdate::fmt_http_date;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::etag::{etag_from_metadata, is_not_modified};
use crate::metadata::{FileRecord, MetadataStore, sorted_records};
use crate::storage::{Storage, remove_file_if_exists};

#[derive(Serialize)]
pub(crate) struct FileListResponse {
    total_files: usize,
    files: Vec<FileRecord>,
}

#[derive(Serialize)]
pub(crate) struct DeleteResponse {
    success: bool,
    message: &'static str,
}

/// 列出全部记录，按上传时间倒序。
pub async fn list_files(
    Extension(store): Extension<Arc<MetadataStore>>,
) -> Result<JsonResponse<FileListResponse>, ApiError> {
    let metadata = store.load().await?;
    let files = sorted_records(&metadata);
    info!(count = files.len(), "list files");
    Ok(JsonResponse(FileListResponse {
        total_files: files.len(),
        files,
    }))
}

/// 按 unique_name 下载。
///
/// 优先查元数据，并以记录中的原始文件名提供下载；
/// 标识未知或记录路径已失效时，遍历整棵存储树查找同名文件，
/// 以扫描到的文件名提供下载。扫描开销与文件总数成正比。
pub async fn download_file(
    Path(filename): Path<String>,
    request_headers: HeaderMap,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(store): Extension<Arc<MetadataStore>>,
) -> Result<Response, ApiError> {
    let metadata = store.load().await?;
    if let Some(record) = metadata.get(&filename)
        && let Some(path) = storage.existing_file(&record.path).await?
    {
        info!(name = filename, "download via metadata");
        return send_attachment(path, &record.original_name, &request_headers).await;
    }

    if let Some(path) = storage.find_by_name(&filename).await? {
        info!(name = filename, path = ?path, "download via directory scan");
        return send_attachment(path, &filename, &request_headers).await;
    }

    debug!(name = filename, "download target not found");
    Err(ApiError::NotFound("File not found".into()))
}

/// 删除文件与其元数据；磁盘文件已缺失不视为错误。
pub async fn delete_file(
    Path(filename): Path<String>,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(store): Extension<Arc<MetadataStore>>,
) -> Result<JsonResponse<DeleteResponse>, ApiError> {
    let mut txn = store.begin().await?;
    let Some(record) = txn.records().get(&filename).cloned() else {
        return Err(ApiError::NotFound("File not found".into()));
    };

    let removed = match storage.existing_file(&record.path).await? {
        Some(path) => remove_file_if_exists(&path).await?,
        None => false,
    };
    txn.records_mut().remove(&filename);
    txn.commit().await?;

    info!(unique_name = filename, removed, "delete file");
    Ok(JsonResponse(DeleteResponse {
        success: true,
        message: "File deleted successfully",
    }))
}

async fn send_attachment(
    path: PathBuf,
    download_name: &str,
    request_headers: &HeaderMap,
) -> Result<Response, ApiError> {
    let metadata = fs::metadata(&path).await?;
    let file_size = metadata.len();
    let etag = etag_from_metadata(&metadata);

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::ETAG, header_value(&etag)?);
    if let Ok(modified) = metadata.modified() {
        response_headers.insert(header::LAST_MODIFIED, header_value(&fmt_http_date(modified))?);
    }
    if is_not_modified(request_headers, &etag) {
        return Ok((StatusCode::NOT_MODIFIED, response_headers).into_response());
    }

    let mime = mime_guess::from_path(download_name).first_or_octet_stream();
    response_headers.insert(header::CONTENT_TYPE, header_value(mime.essence_str())?);
    response_headers.insert(
        header::CONTENT_DISPOSITION,
        header_value(&content_disposition(download_name))?,
    );
    response_headers.insert(header::CONTENT_LENGTH, header_value(&file_size.to_string())?);

    let file = File::open(&path).await?;
    info!(name = download_name, size = file_size, "download full file");
    Ok((
        StatusCode::OK,
        response_headers,
        AxumBody::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

fn header_value(value: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(value).map_err(|_| ApiError::Internal("响应头构建失败".into()))
}

/// 构建 `attachment` 头；非 ASCII 文件名额外附带 RFC 5987 的 `filename*` 参数。
fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| {
            if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if fallback == name {
        format!("attachment; filename=\"{name}\"")
    } else {
        format!(
            "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
            urlencoding::encode(name)
        )
    }
}
