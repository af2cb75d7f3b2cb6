//! # 参数模型模块
//!
//! ## 设计思路
//!
//! 每种操作一组强类型参数，非法值尽量在类型与 setter 层面就无法出现：
//! - 压缩质量在 setter 中夹紧到 `1..=100`，滑杆拖动不会被“拒绝”
//! - 旋转角始终按 `rem_euclid(360)` 归一
//! - 缩放的预设与显式尺寸互斥，由 setter 维护
//!
//! 剩余需要上下文（源图尺寸）的约束放在 `validate` 中检查。
//! `form_fields` 负责把参数扁平化为 multipart 文本字段。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::TransformError;

/// 校验结果：`Ok(())` 表示允许提交。
pub type ValidationResult = Result<(), TransformError>;

/// 操作类型，决定参数形状与远程端点。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Convert,
    Compress,
    Crop,
    Rotate,
    Resize,
}

impl OperationKind {
    pub const ALL: [OperationKind; 5] = [
        OperationKind::Convert,
        OperationKind::Compress,
        OperationKind::Crop,
        OperationKind::Rotate,
        OperationKind::Resize,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Convert => "convert",
            Self::Compress => "compress",
            Self::Crop => "crop",
            Self::Rotate => "rotate",
            Self::Resize => "resize",
        }
    }

    /// 提交通道端点（相对服务根地址）。
    pub fn endpoint(self) -> &'static str {
        self.as_str()
    }

    /// 是否在参数变化时走远程实时预览。
    pub fn supports_live_preview(self) -> bool {
        matches!(self, Self::Rotate)
    }

    /// 该操作的默认参数。
    pub fn default_parameters(self) -> OperationParameters {
        match self {
            Self::Convert => OperationParameters::Convert(ConvertParams::default()),
            Self::Compress => OperationParameters::Compress(CompressParams::default()),
            Self::Crop => OperationParameters::Crop(None),
            Self::Rotate => OperationParameters::Rotate(RotateParams::default()),
            Self::Resize => OperationParameters::Resize(ResizeParams::default()),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| {
                TransformError::Validation(format!(
                    "未知操作：{}（可选：convert / compress / crop / rotate / resize）",
                    s
                ))
            })
    }
}

// ============================================================================
// Convert
// ============================================================================

/// 格式转换的目标格式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    #[default]
    Png,
    Jpg,
    Webp,
    Gif,
}

impl TargetFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpg => "jpg",
            Self::Webp => "webp",
            Self::Gif => "gif",
        }
    }

    pub fn extension(self) -> &'static str {
        self.as_str()
    }

    pub fn mime(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpg => "image/jpeg",
            Self::Webp => "image/webp",
            Self::Gif => "image/gif",
        }
    }
}

impl FromStr for TargetFormat {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpg),
            "webp" => Ok(Self::Webp),
            "gif" => Ok(Self::Gif),
            other => Err(TransformError::Validation(format!(
                "不支持的目标格式：{}（可选：png / jpg / webp / gif）",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConvertParams {
    pub target_format: TargetFormat,
}

// ============================================================================
// Compress
// ============================================================================

/// JPEG 色度采样：0 = 4:4:4，1 = 4:2:2，2 = 4:2:0。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChromaSubsampling {
    Full,
    #[default]
    Half,
    Quarter,
}

impl ChromaSubsampling {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Full => 0,
            Self::Half => 1,
            Self::Quarter => 2,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self, TransformError> {
        match value {
            0 => Ok(Self::Full),
            1 => Ok(Self::Half),
            2 => Ok(Self::Quarter),
            other => Err(TransformError::Validation(format!("色度采样只能是 0 / 1 / 2，收到 {}", other))),
        }
    }
}

pub const MIN_QUALITY: u8 = 1;
pub const MAX_QUALITY: u8 = 100;

/// 压缩参数。
///
/// `quality` 只能通过 setter 修改，保证始终落在 `1..=100`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressParams {
    quality: u8,
    pub lossless: bool,
    pub optimize: bool,
    pub progressive: bool,
    pub dither: bool,
    pub strip_metadata: bool,
    pub subsampling: ChromaSubsampling,
}

impl Default for CompressParams {
    fn default() -> Self {
        Self {
            quality: 85,
            lossless: false,
            optimize: true,
            progressive: false,
            dither: false,
            strip_metadata: true,
            subsampling: ChromaSubsampling::Half,
        }
    }
}

impl CompressParams {
    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// 设置质量，越界值夹紧而不是报错。
    pub fn set_quality(&mut self, quality: i64) {
        self.quality = clamp_quality(quality);
    }

    pub fn with_quality(mut self, quality: i64) -> Self {
        self.set_quality(quality);
        self
    }
}

pub fn clamp_quality(quality: i64) -> u8 {
    quality.clamp(MIN_QUALITY as i64, MAX_QUALITY as i64) as u8
}

// ============================================================================
// Crop
// ============================================================================

/// 裁剪矩形的来源。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CropOrigin {
    /// 用户手工输入，需要校验是否落在源图内。
    #[default]
    Manual,
    /// 交互式裁剪面板算出的矩形，视为已在边界内，只校验宽高为正。
    Interactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub origin: CropOrigin,
}

impl CropRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            origin: CropOrigin::Manual,
        }
    }

    pub fn interactive(mut self) -> Self {
        self.origin = CropOrigin::Interactive;
        self
    }

    /// multipart 字段值：`x,y,width,height`。
    pub fn to_form_value(&self) -> String {
        format!("{},{},{},{}", self.x, self.y, self.width, self.height)
    }

    fn fits_within(&self, (src_width, src_height): (u32, u32)) -> bool {
        let right = self.x as u64 + self.width as u64;
        let bottom = self.y as u64 + self.height as u64;
        right <= src_width as u64 && bottom <= src_height as u64
    }
}

impl FromStr for CropRect {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(TransformError::validation("裁剪格式应为 x,y,width,height"));
        }

        let mut values = [0u32; 4];
        for (slot, part) in values.iter_mut().zip(&parts) {
            *slot = part
                .parse::<u32>()
                .map_err(|_| TransformError::Validation(format!("裁剪参数不是非负整数：{}", part)))?;
        }

        Ok(Self::new(values[0], values[1], values[2], values[3]))
    }
}

// ============================================================================
// Rotate
// ============================================================================

/// 旋转参数，角度恒在 `[0, 360)`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RotateParams {
    angle: u16,
}

impl RotateParams {
    pub fn new(angle: i32) -> Self {
        Self {
            angle: normalize_angle(angle),
        }
    }

    pub fn angle(&self) -> u16 {
        self.angle
    }

    pub fn set_angle(&mut self, angle: i32) {
        self.angle = normalize_angle(angle);
    }

    /// 在当前角度上叠加（可为负），结果取模 360。
    pub fn rotate_by(&mut self, delta: i32) {
        self.angle = normalize_angle(self.angle as i32 + delta.rem_euclid(360));
    }
}

pub fn normalize_angle(angle: i32) -> u16 {
    angle.rem_euclid(360) as u16
}

// ============================================================================
// Resize
// ============================================================================

/// 社交平台尺寸预设。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizePreset {
    InstagramPost,
    InstagramStory,
    LinkedinPost,
    TwitterPost,
    FacebookPost,
    YoutubeThumbnail,
}

impl ResizePreset {
    pub const ALL: [ResizePreset; 6] = [
        ResizePreset::InstagramPost,
        ResizePreset::InstagramStory,
        ResizePreset::LinkedinPost,
        ResizePreset::TwitterPost,
        ResizePreset::FacebookPost,
        ResizePreset::YoutubeThumbnail,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InstagramPost => "instagram_post",
            Self::InstagramStory => "instagram_story",
            Self::LinkedinPost => "linkedin_post",
            Self::TwitterPost => "twitter_post",
            Self::FacebookPost => "facebook_post",
            Self::YoutubeThumbnail => "youtube_thumbnail",
        }
    }

    /// 预设对应的固定像素尺寸 `(width, height)`。
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Self::InstagramPost => (1080, 1080),
            Self::InstagramStory => (1080, 1920),
            Self::LinkedinPost => (1200, 627),
            Self::TwitterPost => (1600, 900),
            Self::FacebookPost => (1200, 630),
            Self::YoutubeThumbnail => (1280, 720),
        }
    }
}

impl FromStr for ResizePreset {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|preset| preset.as_str() == normalized)
            .ok_or_else(|| TransformError::Validation(format!("未知尺寸预设：{}", s)))
    }
}

/// 缩放参数。
///
/// 选中预设时宽高被预设覆盖且不可编辑；编辑宽或高会清除预设。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResizeParams {
    preset: Option<ResizePreset>,
    width: u32,
    height: u32,
}

impl ResizeParams {
    pub fn from_preset(preset: ResizePreset) -> Self {
        let mut params = Self::default();
        params.select_preset(Some(preset));
        params
    }

    pub fn explicit(width: u32, height: u32) -> Self {
        Self {
            preset: None,
            width,
            height,
        }
    }

    pub fn preset(&self) -> Option<ResizePreset> {
        self.preset
    }

    /// 当前生效的目标尺寸。
    pub fn dimensions(&self) -> (u32, u32) {
        match self.preset {
            Some(preset) => preset.dimensions(),
            None => (self.width, self.height),
        }
    }

    /// 显式宽高输入框是否可编辑。
    pub fn explicit_editable(&self) -> bool {
        self.preset.is_none()
    }

    /// 选择（或取消）预设；选中时覆盖显式宽高。
    pub fn select_preset(&mut self, preset: Option<ResizePreset>) {
        if let Some(preset) = preset {
            let (width, height) = preset.dimensions();
            self.width = width;
            self.height = height;
        }
        self.preset = preset;
    }

    pub fn set_width(&mut self, width: u32) {
        self.preset = None;
        self.width = width;
    }

    pub fn set_height(&mut self, height: u32) {
        self.preset = None;
        self.height = height;
    }
}

// ============================================================================
// 参数联合体与编辑动作
// ============================================================================

/// 按操作类型区分的参数集合。
///
/// 裁剪在用户画出矩形之前为 `None`，此时不能提交。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationParameters {
    Convert(ConvertParams),
    Compress(CompressParams),
    Crop(Option<CropRect>),
    Rotate(RotateParams),
    Resize(ResizeParams),
}

impl OperationParameters {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Convert(_) => OperationKind::Convert,
            Self::Compress(_) => OperationKind::Compress,
            Self::Crop(_) => OperationKind::Crop,
            Self::Rotate(_) => OperationKind::Rotate,
            Self::Resize(_) => OperationKind::Resize,
        }
    }

    /// 旋转角度（非旋转操作为 `None`）。
    pub fn angle(&self) -> Option<u16> {
        match self {
            Self::Rotate(params) => Some(params.angle()),
            _ => None,
        }
    }

    /// 扁平化为 multipart 文本字段，每个值都是其字符串形式。
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Convert(params) => vec![("format", params.target_format.as_str().to_string())],
            Self::Compress(params) => vec![
                ("quality", params.quality().to_string()),
                ("lossless", params.lossless.to_string()),
                ("optimize", params.optimize.to_string()),
                ("progressive", params.progressive.to_string()),
                ("dither", params.dither.to_string()),
                ("strip_metadata", params.strip_metadata.to_string()),
                ("subsampling", params.subsampling.as_u8().to_string()),
            ],
            Self::Crop(Some(rect)) => vec![("crop", rect.to_form_value())],
            Self::Crop(None) => Vec::new(),
            Self::Rotate(params) => vec![("angle", params.angle().to_string())],
            Self::Resize(params) => match params.preset() {
                Some(preset) => vec![("preset", preset.as_str().to_string())],
                None => {
                    let (width, height) = params.dimensions();
                    vec![("width", width.to_string()), ("height", height.to_string())]
                }
            },
        }
    }

    /// 应用一次用户编辑。编辑与参数类型不匹配时报校验错误。
    pub fn apply(&mut self, edit: ParameterEdit) -> ValidationResult {
        match (self, edit) {
            (Self::Convert(params), ParameterEdit::SetFormat(format)) => params.target_format = format,
            (Self::Compress(params), ParameterEdit::SetQuality(quality)) => params.set_quality(quality),
            (Self::Compress(params), ParameterEdit::SetLossless(value)) => params.lossless = value,
            (Self::Compress(params), ParameterEdit::SetOptimize(value)) => params.optimize = value,
            (Self::Compress(params), ParameterEdit::SetProgressive(value)) => params.progressive = value,
            (Self::Compress(params), ParameterEdit::SetDither(value)) => params.dither = value,
            (Self::Compress(params), ParameterEdit::SetStripMetadata(value)) => params.strip_metadata = value,
            (Self::Compress(params), ParameterEdit::SetSubsampling(value)) => params.subsampling = value,
            (Self::Crop(rect), ParameterEdit::SetCrop(new_rect)) => *rect = Some(new_rect),
            (Self::Rotate(params), ParameterEdit::RotateBy(delta)) => params.rotate_by(delta),
            (Self::Rotate(params), ParameterEdit::SetAngle(angle)) => params.set_angle(angle),
            (Self::Resize(params), ParameterEdit::SelectPreset(preset)) => params.select_preset(preset),
            (Self::Resize(params), ParameterEdit::SetWidth(width)) => params.set_width(width),
            (Self::Resize(params), ParameterEdit::SetHeight(height)) => params.set_height(height),
            (params, edit) => {
                return Err(TransformError::Validation(format!(
                    "{} 操作不支持该参数：{:?}",
                    params.kind(),
                    edit
                )));
            }
        }
        Ok(())
    }
}

/// 用户界面上的一次参数编辑动作。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterEdit {
    SetFormat(TargetFormat),
    SetQuality(i64),
    SetLossless(bool),
    SetOptimize(bool),
    SetProgressive(bool),
    SetDither(bool),
    SetStripMetadata(bool),
    SetSubsampling(ChromaSubsampling),
    SetCrop(CropRect),
    RotateBy(i32),
    SetAngle(i32),
    SelectPreset(Option<ResizePreset>),
    SetWidth(u32),
    SetHeight(u32),
}

/// 提交前的参数校验。
///
/// `source_dims` 为源图像素尺寸，仅手工裁剪矩形需要它。
pub fn validate(
    kind: OperationKind,
    parameters: &OperationParameters,
    source_dims: Option<(u32, u32)>,
) -> ValidationResult {
    if parameters.kind() != kind {
        return Err(TransformError::Validation(format!(
            "参数类型 {} 与操作 {} 不匹配",
            parameters.kind(),
            kind
        )));
    }

    match parameters {
        OperationParameters::Convert(_) => Ok(()),
        OperationParameters::Compress(params) => {
            if (MIN_QUALITY..=MAX_QUALITY).contains(&params.quality()) {
                Ok(())
            } else {
                Err(TransformError::validation("压缩质量必须在 1~100 之间"))
            }
        }
        OperationParameters::Crop(None) => Err(TransformError::validation("请先选择裁剪区域")),
        OperationParameters::Crop(Some(rect)) => validate_crop(rect, source_dims),
        OperationParameters::Rotate(params) => {
            if params.angle() % 90 == 0 {
                Ok(())
            } else {
                Err(TransformError::Validation(format!("旋转角度必须是 90 的倍数：{}", params.angle())))
            }
        }
        OperationParameters::Resize(params) => {
            let (width, height) = params.dimensions();
            if width == 0 || height == 0 {
                Err(TransformError::validation("请选择尺寸预设或填写大于 0 的宽高"))
            } else {
                Ok(())
            }
        }
    }
}

fn validate_crop(rect: &CropRect, source_dims: Option<(u32, u32)>) -> ValidationResult {
    if rect.width == 0 || rect.height == 0 {
        return Err(TransformError::validation("裁剪区域的宽高必须大于 0"));
    }

    if rect.origin == CropOrigin::Interactive {
        return Ok(());
    }

    let dims = source_dims.ok_or_else(|| TransformError::validation("无法确定原图尺寸，不能校验裁剪区域"))?;
    if !rect.fits_within(dims) {
        return Err(TransformError::Validation(format!(
            "裁剪区域 {} 超出原图范围 {}x{}",
            rect.to_form_value(),
            dims.0,
            dims.1
        )));
    }

    Ok(())
}
