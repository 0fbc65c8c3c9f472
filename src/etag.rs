//! 下载用的弱 ETag 与 If-None-Match 判定。

use axum::http::{HeaderMap, header};
use std::fs::Metadata;
use std::time::UNIX_EPOCH;

/// 根据文件大小与修改时间生成弱 ETag。
pub fn etag_from_metadata(metadata: &Metadata) -> String {
    let size = metadata.len();
    if let Ok(modified) = metadata.modified()
        && let Ok(duration) = modified.duration_since(UNIX_EPOCH)
    {
        return format!(
            "W/\"{}-{}-{}\"",
            size,
            duration.as_secs(),
            duration.subsec_nanos()
        );
    }
    format!("W/\"{}\"", size)
}

/// 请求携带的 If-None-Match 命中当前 ETag 时返回 true（应答 304）。
pub fn is_not_modified(headers: &HeaderMap, current_etag: &str) -> bool {
    let Some(value) = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    if value.trim() == "*" {
        return true;
    }
    value
        .split(',')
        .map(|item| item.trim())
        .any(|item| item == current_etag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn if_none_match_accepts_lists_and_wildcard() {
        let etag = "W/\"3-10-0\"";
        let mut headers = HeaderMap::new();
        assert!(!is_not_modified(&headers, etag));

        headers.insert(
            header::IF_NONE_MATCH,
            HeaderValue::from_static("W/\"1-1-1\", W/\"3-10-0\""),
        );
        assert!(is_not_modified(&headers, etag));

        headers.insert(header::IF_NONE_MATCH, HeaderValue::from_static("W/\"9\""));
        assert!(!is_not_modified(&headers, etag));

        headers.insert(header::IF_NONE_MATCH, HeaderValue::from_static("*"));
        assert!(is_not_modified(&headers, etag));
    }

    #[test]
    fn etag_reflects_size() {
        let temp = tempfile::NamedTempFile::new().expect("temp file");
        std::fs::write(temp.path(), b"abcd").expect("write");
        let metadata = std::fs::metadata(temp.path()).expect("metadata");
        assert!(etag_from_metadata(&metadata).starts_with("W/\"4-"));
    }
}
