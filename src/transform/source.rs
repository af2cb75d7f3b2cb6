//! # 数据源与中间模型
//!
//! ## 设计思路
//!
//! 将“用户选择的文件”和“远程返回的预览字节”解耦：
//! - `SourceFile` 表示会话独占的源文件（字节 + 文件名 + MIME + 像素尺寸）
//! - `PreviewBytes` 表示预览通道返回的一帧预览图
//!
//! 字节统一使用 `bytes::Bytes`，在会话、网关与句柄之间共享时只增加引用计数。

use std::io::Cursor;
use std::path::Path;

use bytes::Bytes;

use super::{TransformConfig, TransformError};

/// 会话源文件。
#[derive(Debug, Clone)]
pub struct SourceFile {
    name: String,
    mime: String,
    bytes: Bytes,
    dimensions: Option<(u32, u32)>,
}

impl SourceFile {
    /// 从内存字节构建源文件。
    ///
    /// 通过文件签名（magic bytes）识别 MIME，非图片直接拒绝；
    /// 像素尺寸只读取文件头，读取失败时记为未知。
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Bytes>) -> Result<Self, TransformError> {
        let name = name.into();
        let bytes = bytes.into();

        if bytes.is_empty() {
            return Err(TransformError::Validation(format!("文件内容为空：{}", name)));
        }

        let kind = infer::get(&bytes)
            .ok_or_else(|| TransformError::Validation(format!("无法识别文件类型：{}", name)))?;

        if kind.matcher_type() != infer::MatcherType::Image {
            return Err(TransformError::Validation(format!(
                "文件签名不是图片类型：{}",
                kind.mime_type()
            )));
        }

        let dimensions = read_dimensions(&bytes);
        if dimensions.is_none() {
            log::debug!("🔍 无法从文件头读取尺寸 - {}", name);
        }

        Ok(Self {
            name,
            mime: kind.mime_type().to_string(),
            bytes,
            dimensions,
        })
    }

    /// 从本地路径读取源文件，先按 metadata 做体积限制。
    pub async fn from_path(path: impl AsRef<Path>, config: &TransformConfig) -> Result<Self, TransformError> {
        let path = path.as_ref();
        log::info!("📁 读取源文件 - 路径: {}", path.display());

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| TransformError::FileSystem(format!("无法读取文件信息：{}", e)))?;

        if metadata.len() > config.max_file_size {
            return Err(TransformError::ResourceLimit(format!(
                "文件过大：{:.2} MB（限制：{:.2} MB）",
                metadata.len() as f64 / 1024.0 / 1024.0,
                config.max_file_size as f64 / 1024.0 / 1024.0
            )));
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| TransformError::FileSystem(format!("无法读取图片文件：{}", e)))?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "image".to_string());

        Self::from_bytes(name, bytes)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 去掉最后一个扩展名后的文件名。
    pub fn stem(&self) -> &str {
        match self.name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => &self.name,
        }
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// 像素尺寸 `(width, height)`，未知时为 `None`。
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.dimensions
    }
}

/// 预览通道返回的预览图。
#[derive(Debug, Clone)]
pub struct PreviewBytes {
    pub bytes: Bytes,
    pub mime: String,
}

fn read_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgba};

    fn create_png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |x, y| Rgba([(x % 255) as u8, (y % 255) as u8, 0, 255]));
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut cursor, ImageFormat::Png)
            .expect("failed to encode test image");
        cursor.into_inner()
    }

    #[test]
    fn from_bytes_reads_mime_and_dimensions() {
        let file = SourceFile::from_bytes("cat.png", create_png_bytes(64, 32)).expect("valid png");

        assert_eq!(file.mime(), "image/png");
        assert_eq!(file.dimensions(), Some((64, 32)));
        assert_eq!(file.stem(), "cat");
    }

    #[test]
    fn from_bytes_rejects_non_image_payload() {
        let result = SourceFile::from_bytes("notes.txt", b"hello world".to_vec());

        assert!(matches!(result, Err(TransformError::Validation(_))));
    }

    #[test]
    fn truncated_jpeg_keeps_unknown_dimensions() {
        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];
        bytes.resize(1024, 0);
        let file = SourceFile::from_bytes("photo.jpg", bytes).expect("jpeg signature accepted");

        assert_eq!(file.mime(), "image/jpeg");
        assert_eq!(file.dimensions(), None);
    }

    #[test]
    fn stem_handles_names_without_extension() {
        let file = SourceFile::from_bytes("archive.tar.png", create_png_bytes(2, 2)).expect("valid png");
        assert_eq!(file.stem(), "archive.tar");

        let bare = SourceFile::from_bytes("snapshot", create_png_bytes(2, 2)).expect("valid png");
        assert_eq!(bare.stem(), "snapshot");
    }

    #[tokio::test]
    async fn from_path_enforces_size_limit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("big.png");
        std::fs::write(&path, create_png_bytes(16, 16)).expect("write test file");

        let mut config = TransformConfig::default();
        config.max_file_size = 8;

        let result = SourceFile::from_path(&path, &config).await;
        assert!(matches!(result, Err(TransformError::ResourceLimit(_))));
    }
}
