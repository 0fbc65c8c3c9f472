//! 存储统计：总数、总大小与按日期分组。

use axum::extract::Extension;
use axum::response::Json as JsonResponse;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::error::ApiError;
use crate::metadata::{Metadata, MetadataStore, format_size};

#[derive(Debug, Default, PartialEq, Serialize)]
pub(crate) struct DailyStats {
    count: usize,
    total_size: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct StatsResponse {
    total_files: usize,
    total_size: u64,
    total_size_human: String,
    stats_by_date: BTreeMap<String, DailyStats>,
}

pub async fn get_stats(
    Extension(store): Extension<Arc<MetadataStore>>,
) -> Result<JsonResponse<StatsResponse>, ApiError> {
    let metadata = store.load().await?;
    let stats = summarize(&metadata);
    info!(
        total_files = stats.total_files,
        total_size = stats.total_size,
        "stats"
    );
    Ok(JsonResponse(stats))
}

fn summarize(metadata: &Metadata) -> StatsResponse {
    let mut stats_by_date: BTreeMap<String, DailyStats> = BTreeMap::new();
    let mut total_size: u64 = 0;
    for record in metadata.values() {
        total_size += record.size;
        // YYYY-MM-DD prefix of the ISO timestamp
        let date = record
            .upload_date
            .get(..10)
            .unwrap_or(record.upload_date.as_str())
            .to_string();
        let day = stats_by_date.entry(date).or_default();
        day.count += 1;
        day.total_size += record.size;
    }

    StatsResponse {
        total_files: metadata.len(),
        total_size,
        total_size_human: format_size(total_size),
        stats_by_date,
    }
}
