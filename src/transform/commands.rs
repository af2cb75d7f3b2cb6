//! # 命令层
//!
//! ## 设计思路
//!
//! 命令层只做参数解析与结果投影，不承载业务逻辑：
//! - `key=value` 字符串 → `ParameterEdit`
//! - 控制器一次完整流程（选择 → 编辑 → 提交 → 下载）→ 可序列化的 `CommandReport`
//! - 任意失败 → 带稳定错误码的 `CommandError`

use std::path::Path;

use serde::Serialize;

use super::controller::TransformController;
use super::download::EmittedDownload;
use super::gateway::TransformGateway;
use super::params::{ChromaSubsampling, CropRect, OperationKind, ParameterEdit, ResizePreset, TargetFormat};
use super::session::StatsView;
use super::{SessionError, TransformError};

#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct CommandError {
    pub code: &'static str,
    pub stage: &'static str,
    pub message: String,
}

impl From<TransformError> for CommandError {
    fn from(error: TransformError) -> Self {
        Self {
            code: error.code(),
            stage: error.stage(),
            message: error.user_message(),
        }
    }
}

impl From<SessionError> for CommandError {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::Transform(inner) => inner.into(),
            other => Self {
                code: other.code(),
                stage: other.stage(),
                message: other.to_string(),
            },
        }
    }
}

/// 一次命令执行的结果摘要。
#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub operation: OperationKind,
    pub source: String,
    pub result_kind: Option<&'static str>,
    pub stats: Option<StatsView>,
    pub download: EmittedDownload,
}

/// 解析一条 `key=value` 参数为编辑动作。
///
/// 可用的 key 取决于操作：
/// - convert: `format`
/// - compress: `quality` `lossless` `optimize` `progressive` `dither` `strip_metadata` `subsampling`
/// - crop: `rect`（`x,y,width,height`）
/// - rotate: `angle` `rotate`（增量）
/// - resize: `preset`（`none` 取消）`width` `height`
pub fn parse_edit(kind: OperationKind, raw: &str) -> Result<ParameterEdit, TransformError> {
    let (key, value) = raw
        .split_once('=')
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim()))
        .ok_or_else(|| TransformError::Validation(format!("参数格式应为 key=value：{}", raw)))?;

    let edit = match (kind, key.as_str()) {
        (OperationKind::Convert, "format") => ParameterEdit::SetFormat(value.parse::<TargetFormat>()?),

        (OperationKind::Compress, "quality") => ParameterEdit::SetQuality(parse_number(&key, value)?),
        (OperationKind::Compress, "lossless") => ParameterEdit::SetLossless(parse_flag(&key, value)?),
        (OperationKind::Compress, "optimize") => ParameterEdit::SetOptimize(parse_flag(&key, value)?),
        (OperationKind::Compress, "progressive") => ParameterEdit::SetProgressive(parse_flag(&key, value)?),
        (OperationKind::Compress, "dither") => ParameterEdit::SetDither(parse_flag(&key, value)?),
        (OperationKind::Compress, "strip_metadata") => {
            ParameterEdit::SetStripMetadata(parse_flag(&key, value)?)
        }
        (OperationKind::Compress, "subsampling") => {
            let raw: i64 = parse_number(&key, value)?;
            let level = u8::try_from(raw)
                .map_err(|_| TransformError::Validation(format!("subsampling 超出范围：{}", raw)))?;
            ParameterEdit::SetSubsampling(ChromaSubsampling::from_u8(level)?)
        }

        (OperationKind::Crop, "rect") => ParameterEdit::SetCrop(value.parse::<CropRect>()?),

        (OperationKind::Rotate, "angle") => ParameterEdit::SetAngle(parse_number(&key, value)?),
        (OperationKind::Rotate, "rotate") => ParameterEdit::RotateBy(parse_number(&key, value)?),

        (OperationKind::Resize, "preset") => match value.to_ascii_lowercase().as_str() {
            "" | "none" => ParameterEdit::SelectPreset(None),
            _ => ParameterEdit::SelectPreset(Some(value.parse::<ResizePreset>()?)),
        },
        (OperationKind::Resize, "width") => ParameterEdit::SetWidth(parse_number(&key, value)?),
        (OperationKind::Resize, "height") => ParameterEdit::SetHeight(parse_number(&key, value)?),

        _ => {
            return Err(TransformError::Validation(format!(
                "操作 {} 不支持参数 {}",
                kind, key
            )));
        }
    };

    Ok(edit)
}

pub fn parse_edits<S: AsRef<str>>(kind: OperationKind, raws: &[S]) -> Result<Vec<ParameterEdit>, TransformError> {
    raws.iter().map(|raw| parse_edit(kind, raw.as_ref())).collect()
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, TransformError> {
    value
        .parse::<T>()
        .map_err(|_| TransformError::Validation(format!("{} 需要整数，实际为 '{}'", key, value)))
}

fn parse_flag(key: &str, value: &str) -> Result<bool, TransformError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(TransformError::Validation(format!(
            "{} 需要布尔值，实际为 '{}'",
            key, value
        ))),
    }
}

/// 完整执行一次变换：选择文件 → 依次编辑 → 提交 → 下载。
pub async fn run_once<G: TransformGateway>(
    controller: &TransformController<G>,
    kind: OperationKind,
    path: impl AsRef<Path>,
    edits: &[ParameterEdit],
) -> Result<CommandReport, CommandError> {
    let path = path.as_ref();
    let selected = controller.open_file(kind, path).await?;

    for edit in edits {
        controller.edit(*edit).await?;
    }

    let submitted = controller.submit().await?;
    let download = controller.download().await?;

    Ok(CommandReport {
        operation: kind,
        source: selected.file_name.unwrap_or_else(|| path.display().to_string()),
        result_kind: submitted.result_kind,
        stats: submitted.stats,
        download,
    })
}
