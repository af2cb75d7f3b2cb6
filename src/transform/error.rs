//! # 错误模型模块
//!
//! ## 设计思路
//!
//! 远程变换链路的所有失败在网关边界统一收敛为 `TransformError`，
//! 会话层只看到四类语义：本地参数非法、服务不可达、服务端报错、响应格式不符。
//! 会话层自身的状态约束错误单独放在 `SessionError`，两者都不会越过命令层。

/// 变换链路统一错误类型。
///
/// 会话进入 `Failed` 状态时携带的就是该类型。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    /// 本地参数校验失败，不会触达网络。
    #[error("参数错误：{0}")]
    Validation(String),

    /// 请求未能发出或没有收到响应。
    #[error("无法连接变换服务：{0}")]
    Network(String),

    /// 服务端返回非 2xx，消息尽量原样透传。
    #[error("{message}")]
    Remote { status: u16, message: String },

    /// 响应体与该操作约定的格式不符（客户端/服务端契约问题）。
    #[error("响应格式错误：{0}")]
    Decode(String),

    #[error("文件错误：{0}")]
    FileSystem(String),

    #[error("资源限制：{0}")]
    ResourceLimit(String),
}

impl TransformError {
    /// 稳定错误码，供命令层与前端做分支。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "E_VALIDATION",
            Self::Network(_) => "E_UNREACHABLE",
            Self::Remote { .. } => "E_REMOTE",
            Self::Decode(_) => "E_MALFORMED_RESPONSE",
            Self::FileSystem(_) => "E_FILE",
            Self::ResourceLimit(_) => "E_RESOURCE_LIMIT",
        }
    }

    /// 出错阶段。
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validate",
            Self::Network(_) => "network",
            Self::Remote { .. } => "remote",
            Self::Decode(_) => "decode",
            Self::FileSystem(_) | Self::ResourceLimit(_) => "local",
        }
    }

    /// 面向用户的提示文案。
    ///
    /// 解码错误属于契约问题，用户无法处理，只给通用提示。
    pub fn user_message(&self) -> String {
        match self {
            Self::Decode(_) => "处理失败，请稍后重试".to_string(),
            Self::Network(_) => "无法连接图片处理服务，请稍后重试".to_string(),
            other => other.to_string(),
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub(crate) fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }
}

/// 会话与控制器层错误。
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("当前没有进行中的会话")]
    NoActiveSession,

    /// 当前状态不允许该操作。
    #[error("状态 {state} 下不能执行 {action}")]
    InvalidState { state: &'static str, action: &'static str },

    /// 已有提交请求在途，新的提交被忽略。
    #[error("已有变换请求正在处理")]
    SubmitInFlight,

    #[error("资源句柄已释放：{0}")]
    HandleReleased(String),

    #[error("下载失败：{0}")]
    Download(String),

    #[error("内部锁已中毒：{0}")]
    LockPoisoned(&'static str),
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transform(inner) => inner.code(),
            Self::NoActiveSession => "E_NO_SESSION",
            Self::InvalidState { .. } => "E_INVALID_STATE",
            Self::SubmitInFlight => "E_SUBMIT_IN_FLIGHT",
            Self::HandleReleased(_) => "E_HANDLE_RELEASED",
            Self::Download(_) => "E_DOWNLOAD",
            Self::LockPoisoned(_) => "E_INTERNAL",
        }
    }

    pub fn stage(&self) -> &'static str {
        match self {
            Self::Transform(inner) => inner.stage(),
            Self::Download(_) | Self::HandleReleased(_) => "download",
            _ => "session",
        }
    }
}
