//! # 图片变换模块（transform）
//!
//! ## 设计思路
//!
//! 该模块实现“选择文件 → 调整参数 → 远程变换 → 下载结果”的客户端会话控制，
//! 图片算法本身全部在远程服务完成，这里只负责状态、参数与资源生命周期。
//!
//! - `commands`：参数字符串解析与一次性流程（薄封装）
//! - `controller`：会话持有者，串联预览通道与提交通道
//! - `session`：纯状态机，不做 IO
//! - `gateway`：远程服务契约与 HTTP 实现，统一响应形态与错误分类
//! - `download`：下载落地与句柄延迟释放
//! - `registry`：临时资源句柄的所有权登记
//! - `params`：五种操作的参数模型与校验
//! - `config/error/source/result`：配置、错误、源文件、结果模型
//!
//! ## 新同事快速上手
//!
//! ```text
//! main.rs / 调用方
//!    ↓
//! commands.rs（key=value 解析 + run_once）
//!    ↓
//! controller.rs（加锁取票据 → 锁外 await → 加锁应用）
//!    ├─ session.rs（状态流转 + 预览序号规则）
//!    ├─ gateway.rs（multipart 请求 + 响应归一）
//!    └─ download.rs（写出文件 + 宽限期后释放句柄）
//!          ↓
//!       registry.rs（acquire / release / release_all）
//! ```
//!
//! ## 分层职责建议
//!
//! - 新增操作或参数：先改 `params.rs`，再补 `gateway.rs` 的文件名规则
//! - 状态约束变更只改 `session.rs`
//! - 服务地址、超时等策略改 `config.rs`

pub mod commands;
pub mod controller;
pub mod download;
pub mod gateway;
pub mod params;
pub mod registry;
pub mod session;

mod config;
mod error;
mod result;
mod source;

pub use commands::{CommandError, CommandReport, parse_edit, parse_edits, run_once};
pub use config::{TransformConfig, TransformSettings};
pub use controller::TransformController;
pub use download::{DownloadEmitter, DownloadSink, EmittedDownload, FsDownloadSink};
pub use error::{SessionError, TransformError};
pub use gateway::{HttpGateway, TransformGateway};
pub use params::{
    ChromaSubsampling, CompressParams, ConvertParams, CropOrigin, CropRect, OperationKind, OperationParameters,
    ParameterEdit, ResizeParams, ResizePreset, RotateParams, TargetFormat,
};
pub use registry::{
    HandleRole, HandleStats, MemoryUrlPlatform, ObjectUrlPlatform, ResourceRegistry, SessionId, SharedRegistry,
    TransientHandle,
};
pub use result::{DownloadRef, TransformResult, TransformStats};
pub use session::{PreviewOutcome, SessionState, SessionView, StatsView, TransformSession};
pub use source::{PreviewBytes, SourceFile};
