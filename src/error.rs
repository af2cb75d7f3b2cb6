//! 统一错误类型模块
//!
//! # 设计思路
//!
//! 命令边界之外的调用（设置文件、下载目录、启动参数）统一返回 `AppError`，
//! 变换链路内部的错误保持各自的细粒度类型，在这里只做 `From` 汇总。
//!
//! # 实现思路
//!
//! - 使用 `thiserror` 派生可读错误消息。
//! - 为 `TransformError` / `SessionError` 提供 `From` 转换，无需手动 map。
//! - 实现 `Serialize` 将错误序列化为字符串，便于 `--json` 输出。

use serde::Serialize;

use crate::transform::{SessionError, TransformError};

/// 应用级统一错误类型
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// 图片变换链路错误（校验 / 网络 / 服务端 / 响应格式）
    #[error("{0}")]
    Transform(#[from] TransformError),

    /// 会话状态或下载错误
    #[error("{0}")]
    Session(#[from] SessionError),

    /// 文件系统 I/O 错误
    #[error("文件系统错误: {0}")]
    Io(#[from] std::io::Error),

    /// 存储目录不可用
    #[error("存储目录不可用: {0}")]
    Storage(String),

    /// 设置文件无法解析或保存
    #[error("设置错误: {0}")]
    Settings(String),
}

impl AppError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transform(inner) => inner.code(),
            Self::Session(inner) => inner.code(),
            Self::Io(_) => "E_FILE",
            Self::Storage(_) => "E_STORAGE",
            Self::Settings(_) => "E_SETTINGS",
        }
    }
}

/// 将错误序列化为人类可读的字符串。
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
