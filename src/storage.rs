use chrono::{DateTime, Datelike, Local};
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::ErrorKind;
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use crate::atomic::is_temp_name;
use crate::config::METADATA_FILE;

const SUFFIX_LEN: usize = 8;

/// 存储根目录：按日期分区存放上传文件，根下另有元数据文档。
#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.root.join(METADATA_FILE)
    }

    /// 确保 `now` 对应的 `YYYY/MM/DD` 分区存在，返回相对路径字符串与绝对路径。
    pub async fn date_subdir(&self, now: &DateTime<Local>) -> io::Result<(String, PathBuf)> {
        let year = format!("{:04}", now.year());
        let month = format!("{:02}", now.month());
        let day = format!("{:02}", now.day());
        let full_path = self.root.join(&year).join(&month).join(&day);
        fs::create_dir_all(&full_path).await?;
        Ok((format!("{year}/{month}/{day}"), full_path))
    }

    async fn resolve_path_checked(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let target = self.resolve(relative)?;
        self.ensure_no_symlink_components(&target).await?;
        Ok(target)
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let mut normalized = PathBuf::new();
        let trimmed = relative.trim_start_matches(['/', '\\']);
        for component in Path::new(trimmed).components() {
            match component {
                Component::Normal(segment) => normalized.push(segment),
                Component::CurDir => continue,
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(StorageError::InvalidPath);
                }
            }
        }
        if normalized.as_os_str().is_empty() {
            return Err(StorageError::InvalidPath);
        }

        Ok(self.root.join(normalized))
    }

    async fn ensure_no_symlink_components(&self, target: &Path) -> Result<(), StorageError> {
        let relative = target
            .strip_prefix(&self.root)
            .map_err(|_| StorageError::InvalidPath)?;
        let mut current = PathBuf::from(&self.root);
        let mut components = relative.components().peekable();

        while let Some(component) = components.next() {
            current.push(component.as_os_str());
            match fs::symlink_metadata(&current).await {
                Ok(metadata) => {
                    if metadata.file_type().is_symlink() {
                        return Err(StorageError::InvalidPath);
                    }
                    if components.peek().is_some() && !metadata.is_dir() {
                        return Err(StorageError::InvalidPath);
                    }
                }
                Err(err) => return Err(StorageError::Io(err)),
            }
        }

        Ok(())
    }

    /// 将记录中的相对路径解析为根目录下的普通文件。
    ///
    /// 越界、经过符号链接或不存在的路径返回 `Ok(None)`，仅意外的 I/O 失败视为错误。
    pub async fn existing_file(&self, relative: &str) -> Result<Option<PathBuf>, StorageError> {
        let target = match self.resolve_path_checked(relative).await {
            Ok(target) => target,
            Err(StorageError::InvalidPath) => return Ok(None),
            Err(StorageError::Io(err)) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        let metadata = fs::metadata(&target).await?;
        Ok(metadata.is_file().then_some(target))
    }

    /// 遍历整棵存储树，查找名称恰为 `name` 的普通文件。
    ///
    /// 深度优先、按字典序访问，同一目录内先看文件再进子目录，
    /// 因此同名文件出现多次时最早的日期分区胜出。
    /// 符号链接、临时文件与根目录的元数据文档永不匹配。
    pub async fn find_by_name(&self, name: &str) -> Result<Option<PathBuf>, StorageError> {
        if name.is_empty() || is_temp_name(name) {
            return Ok(None);
        }

        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut reader = match fs::read_dir(&dir).await {
                Ok(reader) => reader,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(StorageError::Io(err)),
            };

            let mut files = Vec::new();
            let mut subdirs = Vec::new();
            while let Some(entry) = reader.next_entry().await? {
                let file_type = entry.file_type().await?;
                let entry_name = entry.file_name().to_string_lossy().to_string();
                if file_type.is_dir() {
                    subdirs.push((entry_name, entry.path()));
                } else if file_type.is_file() {
                    files.push((entry_name, entry.path()));
                }
            }

            files.sort_by(|a, b| a.0.cmp(&b.0));
            for (entry_name, path) in files {
                if entry_name != name {
                    continue;
                }
                if dir == self.root && entry_name == METADATA_FILE {
                    continue;
                }
                return Ok(Some(path));
            }

            subdirs.sort_by(|a, b| b.0.cmp(&a.0));
            pending.extend(subdirs.into_iter().map(|(_, path)| path));
        }

        Ok(None)
    }
}

/// 删除文件；文件已不存在不视为错误，返回是否实际删除。
pub async fn remove_file_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// 将客户端文件名收敛到 `[A-Za-z0-9_.-]`。
///
/// 先做 NFKD 分解以保留带重音字母的基字母，再丢弃非 ASCII 字符；
/// 路径分隔符视为空白，连续空白以 `_` 连接，其余不安全字符丢弃，
/// 最后去掉首尾的 `.` 与 `_`。结果可能为空。
pub fn sanitize_filename(name: &str) -> String {
    let ascii: String = name.nfkd().filter(char::is_ascii).collect();
    let spaced = ascii.replace(['/', '\\'], " ");
    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let filtered: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    filtered.trim_matches(|c: char| c == '.' || c == '_').to_string()
}

/// 拆分主名与扩展名（扩展名带点），开头的点不算扩展名。
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(index) if index > 0 => name.split_at(index),
        _ => (name, ""),
    }
}

/// 由清洗后的文件名生成 `{stem}_{YYYYMMDD_HHMMSS}_{8 位十六进制}{ext}`。
pub fn unique_filename(sanitized: &str, now: &DateTime<Local>) -> String {
    let (stem, ext) = split_extension(sanitized);
    let timestamp = now.format("%Y%m%d_%H%M%S");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{stem}_{timestamp}_{}{ext}", &suffix[..SUFFIX_LEN])
}

#[derive(Debug)]
pub enum StorageError {
    InvalidPath,
    Io(io::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::InvalidPath => f.write_str("invalid path"),
            StorageError::Io(err) => write!(f, "{err}"),
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}
