//! 用户设置文件读写
//!
//! 设置以 JSON 存放（默认 `settings.json`），只包含 `TransformSettings` 中允许持久化的字段。
//! 文件不存在视为“未配置”，格式错误则报错而不是静默回退。

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::AppError;
use crate::transform::TransformSettings;

pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// 默认设置文件位置（当前工作目录下）。
pub fn default_settings_path() -> PathBuf {
    PathBuf::from(SETTINGS_FILE_NAME)
}

pub fn load_settings(path: &Path) -> Result<Option<TransformSettings>, AppError> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path)?;
    let parsed = serde_json::from_str::<TransformSettings>(&content)
        .map_err(|e| AppError::Settings(format!("解析设置文件 '{}' 失败: {}", path.display(), e)))?;

    log::debug!("⚙️ 已读取设置文件 {}", path.display());
    Ok(Some(parsed))
}

pub fn save_settings(path: &Path, settings: &TransformSettings) -> Result<(), AppError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::Storage(format!("创建设置目录失败: {}", e)))?;
    }

    let content = serde_json::to_string_pretty(settings)
        .map_err(|e| AppError::Settings(format!("序列化设置失败: {}", e)))?;

    fs::write(path, content)?;
    Ok(())
}
