//! 下载目录管理模块
//!
//! # 设计思路
//!
//! 统一管理变换结果的落地目录，支持用户自定义目录，
//! 并在目录不存在时自动创建。
//!
//! # 实现思路
//!
//! - 优先使用命令行或设置文件中配置的目录。
//! - 未设置时回退到当前工作目录下的 `downloads` 子目录。
//! - 目录不存在时自动 `create_dir_all`，避免上层判断。
//! - 所有可能失败的操作均返回 `Result`，不使用 `expect()` / `unwrap()`。

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::AppError;

pub const DEFAULT_DOWNLOAD_DIR: &str = "downloads";

/// 下载目录信息
#[derive(Debug, Clone, Serialize)]
pub struct DownloadDirInfo {
    pub path: String,
    pub total_size: u64,
    pub file_count: u64,
}

/// 获取下载目录
///
/// # 参数
/// * `custom_dir` - 用户自定义目录（可选）
///
/// # 返回
/// - `Ok(PathBuf)`：可用的下载目录
/// - `Err(AppError::Storage)`：无法获取或创建目录
pub fn resolve_download_dir(custom_dir: Option<&str>) -> Result<PathBuf, AppError> {
    let dir = match custom_dir.map(str::trim).filter(|dir| !dir.is_empty()) {
        Some(dir) => PathBuf::from(dir),
        None => std::env::current_dir()
            .map_err(|e| AppError::Storage(format!("获取当前目录失败: {}", e)))?
            .join(DEFAULT_DOWNLOAD_DIR),
    };

    if !dir.exists() {
        fs::create_dir_all(&dir)
            .map_err(|e| AppError::Storage(format!("创建下载目录 '{}' 失败: {}", dir.display(), e)))?;
    }
    Ok(dir)
}

/// 获取下载目录信息（路径 + 占用大小 + 文件数）
pub fn download_dir_info(dir: &Path) -> Result<DownloadDirInfo, AppError> {
    let mut total_size: u64 = 0;
    let mut file_count: u64 = 0;

    if dir.exists() {
        for entry in fs::read_dir(dir)?.flatten() {
            if let Ok(metadata) = entry.metadata() {
                if metadata.is_file() {
                    total_size += metadata.len();
                    file_count += 1;
                }
            }
        }
    }

    Ok(DownloadDirInfo {
        path: dir.to_string_lossy().to_string(),
        total_size,
        file_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn custom_dir_is_created() {
        let root = TempDir::new().expect("create temp dir");
        let target = root.path().join("out").join("images");
        let target_str = target.to_string_lossy().to_string();

        let resolved = resolve_download_dir(Some(&target_str)).expect("resolve");

        assert_eq!(resolved, target);
        assert!(target.is_dir());
    }

    #[test]
    fn dir_info_counts_files_only() {
        let root = TempDir::new().expect("create temp dir");
        fs::write(root.path().join("a.png"), [0u8; 10]).expect("write a");
        fs::write(root.path().join("b.webp"), [0u8; 5]).expect("write b");
        fs::create_dir(root.path().join("nested")).expect("mkdir");

        let info = download_dir_info(root.path()).expect("info");

        assert_eq!(info.file_count, 2);
        assert_eq!(info.total_size, 15);
    }
}
