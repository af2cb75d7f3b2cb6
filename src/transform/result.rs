//! # 变换结果模型
//!
//! 远程服务的两种响应形态（直接返回图片 / JSON 内嵌 base64）在网关归一成
//! `TransformResult`，其余模块不需要再按操作类型分支。

use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use serde::Serialize;

use super::TransformError;

/// 归一后的变换结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformResult {
    /// 服务直接返回结果图片。
    Blob {
        data: Bytes,
        mime: String,
        suggested_name: String,
        original_size: u64,
    },
    /// 服务返回预览图 + 下载引用（压缩）。
    PreviewPlusDownload {
        preview_bytes: Bytes,
        download_ref: DownloadRef,
        original_size: u64,
        result_size: u64,
    },
}

impl TransformResult {
    /// 结果预览图字节与 MIME。
    pub fn preview(&self) -> (Bytes, &str) {
        match self {
            Self::Blob { data, mime, .. } => (data.clone(), mime.as_str()),
            Self::PreviewPlusDownload { preview_bytes, .. } => (preview_bytes.clone(), "image/jpeg"),
        }
    }

    /// 下载时建议的文件名。
    pub fn suggested_filename(&self) -> String {
        match self {
            Self::Blob { suggested_name, .. } => suggested_name.clone(),
            Self::PreviewPlusDownload { download_ref, .. } => {
                format!("compressed.{}", download_ref.extension())
            }
        }
    }

    pub fn stats(&self) -> TransformStats {
        match self {
            Self::Blob { data, original_size, .. } => TransformStats {
                original_size: *original_size,
                result_size: data.len() as u64,
            },
            Self::PreviewPlusDownload {
                original_size,
                result_size,
                ..
            } => TransformStats {
                original_size: *original_size,
                result_size: *result_size,
            },
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Blob { .. } => "blob",
            Self::PreviewPlusDownload { .. } => "previewPlusDownload",
        }
    }
}

/// 压缩结果的下载引用。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadRef {
    /// `data:<mime>;base64,<payload>`，本地即可解析。
    DataUrl(String),
    /// 需要再请求一次的绝对地址。
    Url(String),
}

impl DownloadRef {
    pub fn parse(raw: &str) -> Result<Self, TransformError> {
        let trimmed = raw.trim();
        if trimmed.starts_with("data:") {
            if !trimmed.contains(";base64,") {
                return Err(TransformError::decode("download_url 缺少 base64 标记"));
            }
            return Ok(Self::DataUrl(trimmed.to_string()));
        }

        let parsed = reqwest::Url::parse(trimmed)
            .map_err(|e| TransformError::Decode(format!("download_url 不是合法地址：{}", e)))?;
        Ok(Self::Url(parsed.to_string()))
    }

    /// 引用声明的 MIME（仅 data URL 可知）。
    pub fn mime(&self) -> Option<&str> {
        match self {
            Self::DataUrl(url) => url
                .strip_prefix("data:")
                .and_then(|rest| rest.split(';').next())
                .filter(|mime| !mime.is_empty()),
            Self::Url(_) => None,
        }
    }

    /// 由 MIME 推出的扩展名，例如 `image/png` → `png`。
    ///
    /// 绝对地址取路径最后一段的扩展名，查询串与片段不参与。
    pub fn extension(&self) -> String {
        self.mime()
            .and_then(extension_for_mime)
            .or_else(|| match self {
                Self::Url(url) => url_path_extension(url),
                Self::DataUrl(_) => None,
            })
            .unwrap_or_else(|| "bin".to_string())
    }

    /// 解码 data URL 负载；绝对地址返回 `None`，交由网关下载。
    pub fn decode_inline(&self) -> Option<Result<Bytes, TransformError>> {
        let Self::DataUrl(url) = self else {
            return None;
        };

        let payload = url.split_once(";base64,").map(|(_, data)| data).unwrap_or_default();
        Some(
            general_purpose::STANDARD
                .decode(payload)
                .map(Bytes::from)
                .map_err(|e| TransformError::Decode(format!("下载数据 base64 解码失败：{}", e))),
        )
    }
}

fn url_path_extension(raw: &str) -> Option<String> {
    let url = reqwest::Url::parse(raw).ok()?;
    let last = url.path_segments()?.next_back()?;
    let (_, ext) = last.rsplit_once('.')?;
    if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// MIME → 文件扩展名，取 `image/` 后的子类型。
pub(crate) fn extension_for_mime(mime: &str) -> Option<String> {
    let base = mime.split(';').next()?.trim().to_ascii_lowercase();
    let subtype = base.strip_prefix("image/")?;
    if subtype.is_empty() {
        return None;
    }
    Some(match subtype {
        "svg+xml" => "svg".to_string(),
        other => other.to_string(),
    })
}

/// 结果体积统计（派生值，不单独存储）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransformStats {
    pub original_size: u64,
    pub result_size: u64,
}

impl TransformStats {
    /// 结果体积占原始体积的百分比，保留一位小数。
    pub fn reduction_ratio(&self) -> f64 {
        if self.original_size == 0 {
            return 0.0;
        }
        let ratio = self.result_size as f64 / self.original_size as f64 * 100.0;
        (ratio * 10.0).round() / 10.0
    }

    /// 原始体积（KB，两位小数）。
    pub fn original_kb(&self) -> String {
        format!("{:.2}", self.original_size as f64 / 1024.0)
    }

    pub fn result_kb(&self) -> String {
        format!("{:.2}", self.result_size as f64 / 1024.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduction_ratio_rounds_to_one_decimal() {
        let stats = TransformStats {
            original_size: 500_000,
            result_size: 123_456,
        };

        assert_eq!(stats.reduction_ratio(), 24.7);
        assert_eq!(stats.original_kb(), "488.28");
    }

    #[test]
    fn data_url_reports_mime_and_extension() {
        let download = DownloadRef::parse("data:image/webp;base64,AAAA").expect("valid data url");

        assert_eq!(download.mime(), Some("image/webp"));
        assert_eq!(download.extension(), "webp");
        assert_eq!(
            TransformResult::PreviewPlusDownload {
                preview_bytes: Bytes::new(),
                download_ref: download,
                original_size: 10,
                result_size: 5,
            }
            .suggested_filename(),
            "compressed.webp"
        );
    }

    #[test]
    fn data_url_payload_decodes_inline() {
        let download = DownloadRef::parse("data:image/png;base64,aGVsbG8=").expect("valid data url");
        let bytes = download.decode_inline().expect("inline").expect("valid base64");

        assert_eq!(&bytes[..], b"hello");
    }

    #[test]
    fn absolute_url_is_not_inline() {
        let download = DownloadRef::parse("https://cdn.example.com/out/a.png").expect("valid url");

        assert!(download.decode_inline().is_none());
        assert_eq!(download.extension(), "png");
    }

    #[test]
    fn absolute_url_extension_ignores_query_and_fragment() {
        let signed = DownloadRef::parse("https://cdn.example.com/out/a.png?sig=abc").expect("valid url");
        let anchored = DownloadRef::parse("https://cdn.example.com/out/B.WEBP#frag").expect("valid url");
        let bare = DownloadRef::parse("https://cdn.example.com/download?id=7.png").expect("valid url");

        assert_eq!(signed.extension(), "png");
        assert_eq!(anchored.extension(), "webp");
        assert_eq!(bare.extension(), "bin");
    }

    #[test]
    fn malformed_download_ref_is_decode_error() {
        assert!(matches!(DownloadRef::parse("data:image/png,raw"), Err(TransformError::Decode(_))));
        assert!(matches!(DownloadRef::parse("relative/path.png"), Err(TransformError::Decode(_))));
    }

    #[test]
    fn mime_extension_mapping() {
        assert_eq!(extension_for_mime("image/jpeg").as_deref(), Some("jpeg"));
        assert_eq!(extension_for_mime("image/png; charset=binary").as_deref(), Some("png"));
        assert_eq!(extension_for_mime("text/html"), None);
    }
}
