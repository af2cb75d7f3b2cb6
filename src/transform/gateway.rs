//! # 远程变换网关
//!
//! ## 设计思路
//!
//! 网关是会话与远程服务之间唯一的边界：
//! - 按操作类型拼出 multipart 请求（参数全部以字符串形式作为文本字段，外加原始文件）
//! - 把两种响应形态（直接返回图片 / JSON 内嵌 base64）归一为 `TransformResult`
//! - 把所有网络、状态码、解析失败收敛为 `TransformError` 的四类语义
//!
//! ## 实现思路
//!
//! - `TransformGateway` trait 作为会话控制器的注入点，`HttpGateway` 是基于 reqwest 的实现。
//! - 不做自动重试，重试策略属于调用方（用户重新提交）。
//! - 二进制响应必须带图片签名（`infer`），否则视为契约错误。
//! - 响应体分块读取：成功响应超过 `max_file_size` 报资源限制，
//!   错误响应只读前 `max_error_body_bytes` 字节。

use std::future::Future;
use std::time::Instant;

use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, HeaderMap};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use super::params::{OperationKind, OperationParameters};
use super::result::extension_for_mime;
use super::source::{PreviewBytes, SourceFile};
use super::{DownloadRef, TransformConfig, TransformError, TransformResult};

/// 预览通道端点。
pub const PREVIEW_ENDPOINT: &str = "preview";

const MAX_PLAIN_ERROR_CHARS: usize = 200;
const BUFFER_INITIAL_CAPACITY: usize = 64 * 1024;

/// 远程变换服务契约。
pub trait TransformGateway: Send + Sync {
    /// 提交通道：产出最终可下载结果。
    fn submit(
        &self,
        kind: OperationKind,
        source: &SourceFile,
        parameters: &OperationParameters,
    ) -> impl Future<Output = Result<TransformResult, TransformError>> + Send;

    /// 预览通道：参数变化时的尽力而为预览。
    fn request_preview(
        &self,
        source: &SourceFile,
        parameters: &OperationParameters,
    ) -> impl Future<Output = Result<PreviewBytes, TransformError>> + Send;

    /// 解析下载引用为字节。
    fn resolve_download(
        &self,
        download: &DownloadRef,
    ) -> impl Future<Output = Result<Bytes, TransformError>> + Send;
}

/// 压缩端点返回的 JSON 信封。
#[derive(Debug, Deserialize)]
struct CompressEnvelope {
    preview: String,
    download_url: String,
    original_size: u64,
    compressed_size: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// 基于 reqwest 的网关实现。
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: reqwest::Url,
    max_body_bytes: u64,
    max_error_body_bytes: usize,
}

impl HttpGateway {
    /// 根据配置创建网关，HTTP 客户端在实例内复用。
    ///
    /// # 示例
    /// ```rust,no_run
    /// use transform_client::transform::{HttpGateway, TransformConfig};
    ///
    /// let gateway = HttpGateway::new(&TransformConfig::default())?;
    /// # Ok::<(), transform_client::transform::TransformError>(())
    /// ```
    pub fn new(config: &TransformConfig) -> Result<Self, TransformError> {
        let base_url = reqwest::Url::parse(&super::config::normalize_base_url(&config.base_url)?)
            .map_err(|e| TransformError::Validation(format!("服务地址格式错误：{}", e)))?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| TransformError::Network(format!("无法创建 HTTP 客户端：{}", e)))?;

        Ok(Self {
            client,
            base_url,
            max_body_bytes: config.max_file_size,
            max_error_body_bytes: config.max_error_body_bytes,
        })
    }

    pub fn base_url(&self) -> &reqwest::Url {
        &self.base_url
    }

    fn endpoint_url(&self, endpoint: &str) -> Result<reqwest::Url, TransformError> {
        self.base_url
            .join(endpoint)
            .map_err(|e| TransformError::Validation(format!("端点地址拼接失败：{}", e)))
    }

    fn build_form(
        source: &SourceFile,
        fields: Vec<(&'static str, String)>,
    ) -> Result<Form, TransformError> {
        let file_part = Part::bytes(source.bytes().to_vec())
            .file_name(source.name().to_string())
            .mime_str(source.mime())
            .map_err(|e| TransformError::Validation(format!("文件 MIME 无效：{}", e)))?;

        let form = fields
            .into_iter()
            .fold(Form::new(), |form, (name, value)| form.text(name, value));

        Ok(form.part("file", file_part))
    }

    /// 发出 POST 并完成状态码检查，返回响应头与完整响应体。
    async fn post_form(&self, endpoint: &str, form: Form) -> Result<(HeaderMap, Bytes), TransformError> {
        let url = self.endpoint_url(endpoint)?;
        let started = Instant::now();
        log::info!("🌐 请求变换服务 - {}", redact_url_for_log(&url));

        let response = self
            .client
            .post(url.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, &url))?;

        let result = self.read_success_body(response, &url).await;
        log::info!(
            "📬 变换服务响应 - {} {}ms ({})",
            redact_url_for_log(&url),
            started.elapsed().as_millis(),
            if result.is_ok() { "ok" } else { "error" }
        );
        result
    }

    async fn read_success_body(
        &self,
        response: reqwest::Response,
        url: &reqwest::Url,
    ) -> Result<(HeaderMap, Bytes), TransformError> {
        let status = response.status();
        let headers = response.headers().clone();

        if !status.is_success() {
            let body = read_body_prefix(response, self.max_error_body_bytes, url).await?;
            return Err(self.remote_error(status.as_u16(), &headers, &body));
        }

        if let Some(size) = content_length(&headers) {
            if size > self.max_body_bytes {
                return Err(TransformError::ResourceLimit(format!(
                    "响应过大：{:.2} MB（限制：{:.2} MB）",
                    size as f64 / 1024.0 / 1024.0,
                    self.max_body_bytes as f64 / 1024.0 / 1024.0
                )));
            }
        }

        let body = read_body_limited(response, self.max_body_bytes, url).await?;
        Ok((headers, body))
    }

    /// 非 2xx 响应：优先取 JSON `error` 字段，其次是简短纯文本，最后通用文案。
    fn remote_error(&self, status: u16, headers: &HeaderMap, body: &[u8]) -> TransformError {
        let body = &body[..body.len().min(self.max_error_body_bytes)];

        if let Ok(parsed) = serde_json::from_slice::<ErrorBody>(body) {
            if !parsed.error.trim().is_empty() {
                return TransformError::Remote {
                    status,
                    message: parsed.error,
                };
            }
        }

        let is_plain_text = header_str(headers, CONTENT_TYPE.as_str())
            .map(|ct| ct.to_ascii_lowercase().starts_with("text/plain"))
            .unwrap_or(false);

        if is_plain_text {
            if let Ok(text) = std::str::from_utf8(body) {
                let text = text.trim();
                if !text.is_empty() && text.chars().count() <= MAX_PLAIN_ERROR_CHARS {
                    return TransformError::Remote {
                        status,
                        message: text.to_string(),
                    };
                }
            }
        }

        TransformError::Remote {
            status,
            message: format!("图片处理失败（HTTP {}）", status),
        }
    }

    fn normalize_compress(body: &[u8], source: &SourceFile) -> Result<TransformResult, TransformError> {
        let envelope: CompressEnvelope = serde_json::from_slice(body)
            .map_err(|e| TransformError::Decode(format!("压缩响应不是预期的 JSON：{}", e)))?;

        let preview_bytes = general_purpose::STANDARD
            .decode(envelope.preview.trim())
            .map_err(|e| TransformError::Decode(format!("预览 base64 解码失败：{}", e)))?;
        let download_ref = DownloadRef::parse(&envelope.download_url)?;

        log::debug!(
            "🗜️ 压缩完成 - {}: {} → {} bytes",
            source.name(),
            envelope.original_size,
            envelope.compressed_size
        );

        Ok(TransformResult::PreviewPlusDownload {
            preview_bytes: Bytes::from(preview_bytes),
            download_ref,
            original_size: envelope.original_size,
            result_size: envelope.compressed_size,
        })
    }

    fn normalize_binary(
        kind: OperationKind,
        source: &SourceFile,
        parameters: &OperationParameters,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<TransformResult, TransformError> {
        let mime = image_mime(headers, &body)?;
        let extension = extension_for_mime(&mime).unwrap_or_else(|| "png".to_string());

        let suggested_name = match (kind, parameters) {
            (OperationKind::Convert, OperationParameters::Convert(params)) => {
                format!("{}.{}", source.stem(), params.target_format.extension())
            }
            (OperationKind::Crop, _) => {
                format!("cropped_{}.{}", chrono::Utc::now().timestamp_millis(), extension)
            }
            (OperationKind::Rotate, _) => content_disposition_filename(headers).unwrap_or_else(|| {
                format!("rotated_{}_{}", parameters.angle().unwrap_or(0), source.name())
            }),
            (OperationKind::Resize, _) => format!("resized-image.{}", extension),
            _ => content_disposition_filename(headers)
                .unwrap_or_else(|| format!("{}_{}.{}", kind, source.stem(), extension)),
        };

        Ok(TransformResult::Blob {
            data: body,
            mime,
            suggested_name,
            original_size: source.len(),
        })
    }
}

impl TransformGateway for HttpGateway {
    async fn submit(
        &self,
        kind: OperationKind,
        source: &SourceFile,
        parameters: &OperationParameters,
    ) -> Result<TransformResult, TransformError> {
        let form = Self::build_form(source, parameters.form_fields())?;
        let (headers, body) = self.post_form(kind.endpoint(), form).await?;

        match kind {
            OperationKind::Compress => Self::normalize_compress(&body, source),
            _ => Self::normalize_binary(kind, source, parameters, &headers, body),
        }
    }

    async fn request_preview(
        &self,
        source: &SourceFile,
        parameters: &OperationParameters,
    ) -> Result<PreviewBytes, TransformError> {
        let form = Self::build_form(source, parameters.form_fields())?;
        let (headers, body) = self.post_form(PREVIEW_ENDPOINT, form).await?;
        let mime = image_mime(&headers, &body)?;

        Ok(PreviewBytes { bytes: body, mime })
    }

    async fn resolve_download(&self, download: &DownloadRef) -> Result<Bytes, TransformError> {
        if let Some(inline) = download.decode_inline() {
            return inline;
        }

        let DownloadRef::Url(raw) = download else {
            return Err(TransformError::decode("下载引用无法解析"));
        };
        let url = reqwest::Url::parse(raw)
            .map_err(|e| TransformError::Decode(format!("下载地址无效：{}", e)))?;

        log::info!("⬇️ 获取下载内容 - {}", redact_url_for_log(&url));
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, &url))?;
        let (_, body) = self.read_success_body(response, &url).await?;

        if body.is_empty() {
            return Err(TransformError::decode("下载内容为空"));
        }
        Ok(body)
    }
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    header_str(headers, CONTENT_LENGTH.as_str()).and_then(|value| value.trim().parse::<u64>().ok())
}

fn initial_capacity(headers_len: Option<u64>, limit: u64) -> usize {
    headers_len
        .map(|len| len.min(limit).min(BUFFER_INITIAL_CAPACITY as u64) as usize)
        .filter(|len| *len > 0)
        .unwrap_or(BUFFER_INITIAL_CAPACITY)
}

/// 分块读取成功响应体，累计超过 `limit` 立即中止。
async fn read_body_limited(
    mut response: reqwest::Response,
    limit: u64,
    url: &reqwest::Url,
) -> Result<Bytes, TransformError> {
    let mut buffer = Vec::with_capacity(initial_capacity(response.content_length(), limit));
    let mut total: u64 = 0;

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| TransformError::Network(format!("读取响应失败：{}", sanitize(&e.to_string(), url))))?
    {
        total = total.saturating_add(chunk.len() as u64);
        if total > limit {
            return Err(TransformError::ResourceLimit("响应体超过大小限制".to_string()));
        }
        buffer.extend_from_slice(&chunk);
    }

    Ok(Bytes::from(buffer))
}

/// 只读取错误响应体的前 `limit` 字节，其余内容直接丢弃。
async fn read_body_prefix(
    mut response: reqwest::Response,
    limit: usize,
    url: &reqwest::Url,
) -> Result<Bytes, TransformError> {
    let mut buffer = Vec::with_capacity(initial_capacity(response.content_length(), limit as u64));

    while buffer.len() < limit {
        let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| TransformError::Network(format!("读取响应失败：{}", sanitize(&e.to_string(), url))))?
        else {
            break;
        };
        let take = chunk.len().min(limit - buffer.len());
        buffer.extend_from_slice(&chunk[..take]);
    }

    Ok(Bytes::from(buffer))
}

/// 响应体必须是图片，返回其 MIME（优先用响应头，缺失时用签名推断）。
fn image_mime(headers: &HeaderMap, body: &[u8]) -> Result<String, TransformError> {
    if body.is_empty() {
        return Err(TransformError::decode("响应体为空"));
    }

    let kind = infer::get(body).ok_or_else(|| TransformError::decode("无法识别响应内容类型"))?;
    if kind.matcher_type() != infer::MatcherType::Image {
        return Err(TransformError::Decode(format!(
            "响应内容不是图片：{}",
            kind.mime_type()
        )));
    }

    let declared = header_str(headers, CONTENT_TYPE.as_str())
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase())
        .filter(|ct| ct.starts_with("image/"));

    Ok(declared.unwrap_or_else(|| kind.mime_type().to_string()))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// 从 `Content-Disposition` 中取文件名（只取普通 `filename=`）。
fn content_disposition_filename(headers: &HeaderMap) -> Option<String> {
    let value = header_str(headers, CONTENT_DISPOSITION.as_str())?;
    value
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))
        .map(|name| name.trim_matches('"').to_string())
        .filter(|name| !name.is_empty())
}

fn map_reqwest_error(e: reqwest::Error, url: &reqwest::Url) -> TransformError {
    let err_msg = sanitize(&e.to_string(), url);

    if e.is_timeout() {
        TransformError::Network(format!("请求超时：{}", err_msg))
    } else if e.is_connect() {
        TransformError::Network(format!("无法连接：{}", err_msg))
    } else {
        TransformError::Network(format!("请求失败：{}", err_msg))
    }
}

fn redact_url_for_log(url: &reqwest::Url) -> String {
    let host = url.host_str().unwrap_or("<unknown-host>");
    let port = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
    format!("{}://{}{}{}", url.scheme(), host, port, url.path())
}

fn sanitize(error_msg: &str, url: &reqwest::Url) -> String {
    error_msg.replace(url.as_str(), &redact_url_for_log(url))
}
