//! 元数据存储：storage 根目录下的单个 metadata.json（unique_name → FileRecord）。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::{Mutex, MutexGuard};
use tracing::info;

use crate::atomic::write_atomic;

const SIZE_UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

/// 单个已存文件的元数据记录，创建后不再修改。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub original_name: String,
    pub unique_name: String,
    pub size: u64,
    pub size_human: String,
    pub upload_date: String,
    pub path: String,
    pub subdir: String,
}

pub type Metadata = BTreeMap<String, FileRecord>;

#[derive(Debug)]
pub enum MetadataError {
    Io(io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for MetadataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "{err}"),
            MetadataError::Json(err) => write!(f, "{err}"),
        }
    }
}

impl From<io::Error> for MetadataError {
    fn from(err: io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<serde_json::Error> for MetadataError {
    fn from(err: serde_json::Error) -> Self {
        MetadataError::Json(err)
    }
}

/// 基于单个 JSON 文件的元数据存储。每次调用都从磁盘重新读取；
/// 读-改-写须经由 [`MetadataStore::begin`]。
#[derive(Debug)]
pub struct MetadataStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl MetadataStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 若文件不存在则写入空映射 `{}`，已有内容保持不变。
    pub async fn init(&self) -> Result<(), MetadataError> {
        let _guard = self.write_lock.lock().await;
        if fs::try_exists(&self.path).await? {
            return Ok(());
        }
        write_atomic(&self.path, b"{}").await?;
        info!(path = ?self.path, "initialized empty metadata store");
        Ok(())
    }

    /// 读取并解析完整的元数据文档；缺失或损坏时返回错误。
    pub async fn load(&self) -> Result<Metadata, MetadataError> {
        let bytes = fs::read(&self.path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// 以 2 空格缩进整体覆盖写入（临时文件 + rename）。
    pub async fn save(&self, metadata: &Metadata) -> Result<(), MetadataError> {
        let content = serde_json::to_vec_pretty(metadata)?;
        write_atomic(&self.path, &content).await?;
        Ok(())
    }

    /// 对其他写者加锁并加载当前文档，修改在 [`MetadataTxn::commit`] 之后才可见。
    pub async fn begin(&self) -> Result<MetadataTxn<'_>, MetadataError> {
        let guard = self.write_lock.lock().await;
        let records = self.load().await?;
        Ok(MetadataTxn {
            _guard: guard,
            store: self,
            records,
        })
    }
}

pub struct MetadataTxn<'a> {
    _guard: MutexGuard<'a, ()>,
    store: &'a MetadataStore,
    records: Metadata,
}

impl MetadataTxn<'_> {
    pub fn records(&self) -> &Metadata {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut Metadata {
        &mut self.records
    }

    pub async fn commit(self) -> Result<(), MetadataError> {
        self.store.save(&self.records).await
    }
}

/// 全部记录，按 `upload_date` 从新到旧排列。
pub fn sorted_records(metadata: &Metadata) -> Vec<FileRecord> {
    let mut records: Vec<FileRecord> = metadata.values().cloned().collect();
    records.sort_by(|a, b| b.upload_date.cmp(&a.upload_date));
    records
}

/// 以 1024 进制、保留一位小数格式化大小：`1536` → `1.5 KB`。
pub fn format_size(size: u64) -> String {
    let mut value = size as f64;
    for unit in SIZE_UNITS {
        if value < 1024.0 {
            return format!("{value:.1} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.1} TB")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(unique_name: &str, upload_date: &str, size: u64) -> FileRecord {
        FileRecord {
            original_name: "a.txt".to_string(),
            unique_name: unique_name.to_string(),
            size,
            size_human: format_size(size),
            upload_date: upload_date.to_string(),
            path: format!("2024/01/01/{unique_name}"),
            subdir: "2024/01/01".to_string(),
        }
    }

    #[test]
    fn format_size_uses_binary_units() {
        assert_eq!(format_size(0), "0.0 B");
        assert_eq!(format_size(1023), "1023.0 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_size(1_073_741_824), "1.0 GB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024 * 1024), "3.0 TB");
        assert_eq!(format_size(2048 * 1024 * 1024 * 1024 * 1024), "2048.0 TB");
    }

    #[test]
    fn sorted_records_newest_first() {
        let mut metadata = Metadata::new();
        for (name, date) in [
            ("b", "2024-01-02T10:00:00.000000"),
            ("a", "2024-01-03T09:00:00.000000"),
            ("c", "2023-12-31T23:59:59.000000"),
        ] {
            metadata.insert(name.to_string(), record(name, date, 1));
        }

        let names: Vec<_> = sorted_records(&metadata)
            .into_iter()
            .map(|record| record.unique_name)
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn init_creates_empty_document_once() {
        let temp = tempdir().expect("tempdir");
        let store = MetadataStore::new(temp.path().join("metadata.json"));

        store.init().await.expect("init");
        assert!(store.load().await.expect("load").is_empty());

        let mut metadata = Metadata::new();
        metadata.insert("x".into(), record("x", "2024-01-01T00:00:00", 3));
        store.save(&metadata).await.expect("save");
        store.init().await.expect("init again");
        assert_eq!(store.load().await.expect("load"), metadata);
    }

    #[tokio::test]
    async fn load_surfaces_missing_and_malformed_documents() {
        let temp = tempdir().expect("tempdir");
        let store = MetadataStore::new(temp.path().join("metadata.json"));
        assert!(matches!(store.load().await, Err(MetadataError::Io(_))));

        std::fs::write(store.path(), b"{not json").expect("write");
        assert!(matches!(store.load().await, Err(MetadataError::Json(_))));
    }

    #[tokio::test]
    async fn save_of_load_is_idempotent() {
        let temp = tempdir().expect("tempdir");
        let store = MetadataStore::new(temp.path().join("metadata.json"));
        let mut metadata = Metadata::new();
        metadata.insert("a".into(), record("a", "2024-01-01T00:00:00", 10));
        metadata.insert("b".into(), record("b", "2024-01-02T00:00:00", 20));
        store.save(&metadata).await.expect("save");
        let first = std::fs::read(store.path()).expect("read");

        let loaded = store.load().await.expect("load");
        store.save(&loaded).await.expect("save again");
        let second = std::fs::read(store.path()).expect("read");

        assert_eq!(first, second);
        let text = String::from_utf8(second).expect("utf8");
        assert!(text.contains("\n  \"a\": {"));
    }

    #[tokio::test]
    async fn txn_changes_persist_only_on_commit() {
        let temp = tempdir().expect("tempdir");
        let store = MetadataStore::new(temp.path().join("metadata.json"));
        store.init().await.expect("init");

        let mut txn = store.begin().await.expect("begin");
        txn.records_mut()
            .insert("a".into(), record("a", "2024-01-01T00:00:00", 1));
        drop(txn);
        assert!(store.load().await.expect("load").is_empty());

        let mut txn = store.begin().await.expect("begin");
        txn.records_mut()
            .insert("a".into(), record("a", "2024-01-01T00:00:00", 1));
        assert_eq!(txn.records().len(), 1);
        txn.commit().await.expect("commit");
        assert_eq!(store.load().await.expect("load").len(), 1);
    }

    #[tokio::test]
    async fn concurrent_txns_do_not_lose_updates() {
        let temp = tempdir().expect("tempdir");
        let store = std::sync::Arc::new(MetadataStore::new(temp.path().join("metadata.json")));
        store.init().await.expect("init");

        let mut tasks = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let mut txn = store.begin().await.expect("begin");
                let key = format!("file-{i}");
                txn.records_mut()
                    .insert(key.clone(), record(&key, "2024-01-01T00:00:00", 1));
                txn.commit().await.expect("commit");
            }));
        }
        for task in tasks {
            task.await.expect("join");
        }

        assert_eq!(store.load().await.expect("load").len(), 16);
    }
}
