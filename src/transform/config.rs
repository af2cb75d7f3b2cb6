//! # 配置模块
//!
//! ## 设计思路
//!
//! 将所有“可调策略”集中到 `TransformConfig`：服务地址、超时、下载宽限期与体积上限。
//! 用户可持久化的部分抽成 `TransformSettings`（JSON），应用时统一做范围校验。
//!
//! ## 实现思路
//!
//! - `Default` 提供本地开发可用的配置（服务在 `localhost:5000`）。
//! - `apply_settings` 先整体校验再写入，校验失败时配置保持不变。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::TransformError;

/// 变换客户端配置。
#[derive(Debug, Clone)]
pub struct TransformConfig {
    /// 远程变换服务根地址（以 `/` 结尾，端点按相对路径拼接）。
    pub base_url: String,
    /// 单次请求总超时（秒）。
    pub request_timeout_secs: u64,
    /// 建立连接超时（秒）。
    pub connect_timeout_secs: u64,
    /// 触发下载后延迟释放下载句柄的宽限期（毫秒）。
    pub download_grace_ms: u64,
    /// 允许选择的源文件最大体积（字节）。
    pub max_file_size: u64,
    /// 读取错误响应体的上限（字节），超出部分丢弃。
    pub max_error_body_bytes: usize,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/".to_string(),
            request_timeout_secs: 60,
            connect_timeout_secs: 8,
            download_grace_ms: 100,
            max_file_size: 50 * 1024 * 1024,
            max_error_body_bytes: 64 * 1024,
        }
    }
}

/// 可持久化的用户设置。
///
/// 所有字段可缺省，缺省项沿用当前配置。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_grace_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<String>,
}

impl TransformConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn download_grace(&self) -> Duration {
        Duration::from_millis(self.download_grace_ms)
    }

    /// 校验并应用用户设置。
    ///
    /// # 示例
    /// ```rust
    /// use transform_client::transform::{TransformConfig, TransformSettings};
    ///
    /// let mut config = TransformConfig::default();
    /// config.apply_settings(&TransformSettings {
    ///     base_url: Some("http://127.0.0.1:9000".into()),
    ///     ..Default::default()
    /// })?;
    /// assert_eq!(config.base_url, "http://127.0.0.1:9000/");
    /// # Ok::<(), transform_client::transform::TransformError>(())
    /// ```
    pub fn apply_settings(&mut self, settings: &TransformSettings) -> Result<(), TransformError> {
        let base_url = match &settings.base_url {
            Some(url) => Some(normalize_base_url(url)?),
            None => None,
        };

        if let Some(timeout) = settings.request_timeout_secs {
            if !(1..=600).contains(&timeout) {
                return Err(TransformError::validation("request_timeout_secs 必须在 1~600 秒之间"));
            }
        }
        if let Some(timeout) = settings.connect_timeout_secs {
            if !(1..=120).contains(&timeout) {
                return Err(TransformError::validation("connect_timeout_secs 必须在 1~120 秒之间"));
            }
        }
        if let Some(grace) = settings.download_grace_ms {
            if grace > 10_000 {
                return Err(TransformError::validation("download_grace_ms 不能超过 10000 毫秒"));
            }
        }

        if let Some(url) = base_url {
            self.base_url = url;
        }
        if let Some(timeout) = settings.request_timeout_secs {
            self.request_timeout_secs = timeout;
        }
        if let Some(timeout) = settings.connect_timeout_secs {
            self.connect_timeout_secs = timeout;
        }
        if let Some(grace) = settings.download_grace_ms {
            self.download_grace_ms = grace;
        }

        log::debug!(
            "⚙️ 已应用变换设置：base_url={} timeout={}s connect={}s grace={}ms",
            self.base_url,
            self.request_timeout_secs,
            self.connect_timeout_secs,
            self.download_grace_ms
        );

        Ok(())
    }
}

/// 校验服务地址并补齐结尾 `/`，保证端点按相对路径拼接时不丢最后一段。
pub(crate) fn normalize_base_url(raw: &str) -> Result<String, TransformError> {
    let trimmed = raw.trim();
    let parsed = reqwest::Url::parse(trimmed)
        .map_err(|e| TransformError::validation(format!("服务地址格式错误：{}", e)))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(TransformError::validation("服务地址仅支持 HTTP/HTTPS"));
    }

    let mut normalized = parsed.to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    Ok(normalized)
}
