//! 首页渲染与嵌入式静态资源。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Path};
use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::{Html, IntoResponse, Response};
use maud::{DOCTYPE, Markup, html};
use rust_embed::RustEmbed;
use std::sync::Arc;
use tracing::warn;

use crate::config::{ALLOWED_EXTENSIONS, DEFAULT_MAX_UPLOAD_SIZE};
use crate::error::ApiError;
use crate::metadata::{FileRecord, MetadataStore, sorted_records};

#[derive(RustEmbed)]
#[folder = "assets"]
/// 嵌入式静态资源（样式与脚本）。
pub struct FrontendAssets;

/// 首页：元数据读取失败时按空列表渲染。
pub async fn index(Extension(store): Extension<Arc<MetadataStore>>) -> Html<String> {
    let files = match store.load().await {
        Ok(metadata) => sorted_records(&metadata),
        Err(err) => {
            warn!(error = %err, "metadata unavailable, rendering empty listing");
            Vec::new()
        }
    };
    Html(render_index(&files).into_string())
}

/// `/static/{*path}` 资源。
pub async fn serve_static(Path(path): Path<String>) -> Result<Response, ApiError> {
    load_embedded_asset(&path)?.ok_or_else(|| ApiError::NotFound("Not found".into()))
}

fn render_index(files: &[FileRecord]) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                title { "File Depot" }
                link rel="stylesheet" href="/static/style.css";
            }
            body {
                main {
                    h1 { "File Depot" }
                    form id="upload-form" enctype="multipart/form-data" {
                        input type="file" name="file" id="file-input" required;
                        button type="submit" { "Upload" }
                        span id="upload-status" {}
                    }
                    p class="hint" {
                        "Allowed: " (ALLOWED_EXTENSIONS.join(", "))
                        " (max " (DEFAULT_MAX_UPLOAD_SIZE / (1024 * 1024)) " MB)"
                    }
                    h2 { "Files (" span id="total-files" { (files.len()) } ")" }
                    table {
                        thead {
                            tr { th { "Name" } th { "Size" } th { "Uploaded" } th {} }
                        }
                        tbody {
                            @if files.is_empty() {
                                tr class="empty" { td colspan="4" { "No files uploaded yet" } }
                            }
                            @for record in files {
                                (render_row(record))
                            }
                        }
                    }
                }
                script src="/static/app.js" {}
            }
        }
    }
}

fn render_row(record: &FileRecord) -> Markup {
    html! {
        tr {
            td {
                a href={ "/files/" (urlencoding::encode(&record.unique_name)) } {
                    (record.original_name)
                }
                div class="unique" { (record.unique_name) }
            }
            td { (record.size_human) }
            td { (record.upload_date) }
            td {
                button class="delete" data-name=(record.unique_name) { "Delete" }
            }
        }
    }
}

/// 加载指定路径的嵌入式资源。
fn load_embedded_asset(path: &str) -> Result<Option<Response>, ApiError> {
    let Some(asset) = FrontendAssets::get(path) else {
        return Ok(None);
    };
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str())
            .map_err(|_| ApiError::Internal("无效的 MIME 类型".into()))?,
    );
    Ok(Some(
        (headers, AxumBody::from(asset.data.into_owned())).into_response(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::format_size;

    fn record(original_name: &str) -> FileRecord {
        FileRecord {
            original_name: original_name.to_string(),
            unique_name: "x_20240101_000000_abcdef01.txt".to_string(),
            size: 2048,
            size_human: format_size(2048),
            upload_date: "2024-01-01T00:00:00.000000".to_string(),
            path: "2024/01/01/x_20240101_000000_abcdef01.txt".to_string(),
            subdir: "2024/01/01".to_string(),
        }
    }

    #[test]
    fn render_escapes_names() {
        let html = render_index(&[record("<script>.txt")]).into_string();
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains(r#"<span id="total-files">1</span>"#));
        assert!(html.contains("&lt;script&gt;.txt"));
        assert!(!html.contains("<script>.txt"));
        assert!(html.contains("2.0 KB"));
        assert!(html.contains(r#"href="/files/x_20240101_000000_abcdef01.txt""#));
        assert!(!html.contains("No files uploaded yet"));
    }

    #[test]
    fn render_empty_listing() {
        let html = render_index(&[]).into_string();
        assert!(html.contains(r#"<span id="total-files">0</span>"#));
        assert!(html.contains("No files uploaded yet"));
        assert!(html.contains("Allowed: txt, pdf"));
    }

    #[test]
    fn only_static_files_are_embedded() {
        assert!(FrontendAssets::get("style.css").is_some());
        assert!(FrontendAssets::get("app.js").is_some());
        assert!(FrontendAssets::get("index.html").is_none());
    }
}
