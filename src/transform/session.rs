//! # 变换会话状态机
//!
//! ## 设计思路
//!
//! 一个 `TransformSession` 对应“一个源文件的一次变换尝试”，状态流转：
//!
//! ```text
//! Idle → PreviewPending → PreviewReady ⇄ SubmitPending → Ready / Failed
//!                              ↑                           │
//!                              └──── 重新提交 / 编辑参数 ───┘
//! Ready ── 下载或重置 ──→ Idle（release_all）
//! ```
//!
//! 状态机本身不做 IO：网络调用由控制器在锁外执行，
//! 会话只负责“发票据”（`begin_*`）和“收结果”（`apply_preview` / `complete_submit`）。
//!
//! ## 实现思路
//!
//! - 结果与错误只存在于 `Ready` / `Failed` 变体内部，类型上杜绝状态漂移。
//! - 预览通道使用单调递增序号，只接受最新一次发出的请求的响应，
//!   先发后到的旧响应一律丢弃（不做网络层取消）。
//! - 提交通道同一时刻最多一个在途请求。
//! - 句柄全部登记在 `ResourceRegistry`，`close` / `Drop` 同步释放。

use serde::Serialize;

use super::params::{self, OperationKind, OperationParameters, ParameterEdit};
use super::registry::{HandleRole, SessionId, SharedRegistry, TransientHandle, lock_registry};
use super::source::{PreviewBytes, SourceFile};
use super::{SessionError, TransformError, TransformResult};

/// 会话状态。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    PreviewPending,
    PreviewReady,
    SubmitPending,
    Ready(TransformResult),
    Failed(TransformError),
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::PreviewPending => "PreviewPending",
            Self::PreviewReady => "PreviewReady",
            Self::SubmitPending => "SubmitPending",
            Self::Ready(_) => "Ready",
            Self::Failed(_) => "Failed",
        }
    }
}

/// 预览请求票据。
#[derive(Debug, Clone)]
pub struct PreviewTicket {
    pub session: SessionId,
    pub seq: u64,
    pub source: SourceFile,
    pub parameters: OperationParameters,
}

/// 提交请求票据（参数快照）。
#[derive(Debug, Clone)]
pub struct SubmitTicket {
    pub session: SessionId,
    pub kind: OperationKind,
    pub source: SourceFile,
    pub parameters: OperationParameters,
}

/// 预览响应的处理结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewOutcome {
    /// 已替换当前展示的预览。
    Applied,
    /// 不是最新请求（或会话已变化），已丢弃。
    Stale,
    /// 预览失败，状态不变。
    Failed(TransformError),
}

/// 单个源文件的变换会话。
pub struct TransformSession {
    id: SessionId,
    kind: OperationKind,
    source: SourceFile,
    parameters: OperationParameters,
    state: SessionState,
    registry: SharedRegistry,
    issued_preview_seq: u64,
    settled_preview_seq: u64,
}

impl TransformSession {
    /// 创建会话并直接从文件字节生成本地预览（不访问远程服务）。
    pub fn start(
        id: SessionId,
        kind: OperationKind,
        source: SourceFile,
        registry: SharedRegistry,
    ) -> Result<Self, SessionError> {
        let mut session = Self {
            id,
            kind,
            parameters: kind.default_parameters(),
            source,
            state: SessionState::Idle,
            registry,
            issued_preview_seq: 0,
            settled_preview_seq: 0,
        };

        session.transition(SessionState::PreviewPending);
        {
            let mut registry = lock_registry(&session.registry)?;
            registry.acquire(
                session.id,
                HandleRole::Preview,
                session.source.bytes().clone(),
                session.source.mime(),
            );
        }
        session.transition(SessionState::PreviewReady);

        log::info!(
            "🖼️ {} 已选择文件 {}（{} bytes，操作 {}）",
            session.id,
            session.source.name(),
            session.source.len(),
            kind
        );

        Ok(session)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn source(&self) -> &SourceFile {
        &self.source
    }

    pub fn parameters(&self) -> &OperationParameters {
        &self.parameters
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn result(&self) -> Option<&TransformResult> {
        match &self.state {
            SessionState::Ready(result) => Some(result),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&TransformError> {
        match &self.state {
            SessionState::Failed(error) => Some(error),
            _ => None,
        }
    }

    /// 当前展示的预览句柄。
    pub fn preview_handle(&self) -> Option<TransientHandle> {
        lock_registry(&self.registry)
            .ok()?
            .current(self.id, HandleRole::Preview)
    }

    /// 应用一次参数编辑。
    ///
    /// `Failed` / `Ready` 下编辑会回到 `PreviewReady`；提交在途时拒绝编辑。
    pub fn apply_edit(&mut self, edit: ParameterEdit) -> Result<(), SessionError> {
        match self.state {
            SessionState::PreviewReady | SessionState::Failed(_) | SessionState::Ready(_) => {}
            ref other => {
                return Err(SessionError::InvalidState {
                    state: other.name(),
                    action: "编辑参数",
                });
            }
        }

        let mut next = self.parameters;
        next.apply(edit)?;
        self.parameters = next;

        if matches!(self.state, SessionState::Ready(_)) {
            // 结果作废，预览退回源文件
            let mut registry = lock_registry(&self.registry)?;
            registry.acquire(
                self.id,
                HandleRole::Preview,
                self.source.bytes().clone(),
                self.source.mime(),
            );
        }

        if !matches!(self.state, SessionState::PreviewReady) {
            self.transition(SessionState::PreviewReady);
        }

        Ok(())
    }

    /// 为实时预览发出一张新票据。
    ///
    /// 不支持实时预览的操作、参数未通过校验时返回 `None`，不会发出请求。
    pub fn begin_preview(&mut self) -> Option<PreviewTicket> {
        if !self.kind.supports_live_preview() || !matches!(self.state, SessionState::PreviewReady) {
            return None;
        }

        if let Err(err) = params::validate(self.kind, &self.parameters, self.source.dimensions()) {
            log::debug!("⏸️ {} 参数未通过校验，跳过预览：{}", self.id, err);
            return None;
        }

        self.issued_preview_seq += 1;

        Some(PreviewTicket {
            session: self.id,
            seq: self.issued_preview_seq,
            source: self.source.clone(),
            parameters: self.parameters,
        })
    }

    /// 处理预览响应：只有最新发出的请求才会替换预览。
    pub fn apply_preview(
        &mut self,
        session: SessionId,
        seq: u64,
        outcome: Result<PreviewBytes, TransformError>,
    ) -> Result<PreviewOutcome, SessionError> {
        if session != self.id {
            log::debug!("⏭️ 丢弃其他会话 {} 的预览响应", session);
            return Ok(PreviewOutcome::Stale);
        }

        self.settle_preview(seq);

        if seq != self.issued_preview_seq {
            log::debug!(
                "⏭️ {} 丢弃过期预览 #{}（最新 #{}）",
                self.id,
                seq,
                self.issued_preview_seq
            );
            return Ok(PreviewOutcome::Stale);
        }

        if !matches!(
            self.state,
            SessionState::PreviewReady | SessionState::SubmitPending | SessionState::Failed(_)
        ) {
            return Ok(PreviewOutcome::Stale);
        }

        match outcome {
            Ok(preview) => {
                let mut registry = lock_registry(&self.registry)?;
                registry.acquire(self.id, HandleRole::Preview, preview.bytes, &preview.mime);
                log::debug!("🔄 {} 已应用预览 #{}", self.id, seq);
                Ok(PreviewOutcome::Applied)
            }
            Err(err) => {
                log::warn!("⚠️ {} 预览 #{} 失败：{}", self.id, seq, err);
                Ok(PreviewOutcome::Failed(err))
            }
        }
    }

    /// 预览请求未完成就被放弃（调用方取消、超时）。
    ///
    /// 只推进已结束序号，不改动预览。
    pub fn abandon_preview(&mut self, session: SessionId, seq: u64) {
        if session == self.id {
            self.settle_preview(seq);
        }
    }

    /// 最新发出的预览是否仍在等待响应。
    pub fn preview_in_flight(&self) -> bool {
        self.issued_preview_seq > self.settled_preview_seq
    }

    fn settle_preview(&mut self, seq: u64) {
        self.settled_preview_seq = self.settled_preview_seq.max(seq);
    }

    /// 校验参数并进入 `SubmitPending`。
    ///
    /// 校验失败时状态不变，请求不会发出。
    pub fn begin_submit(&mut self) -> Result<SubmitTicket, SessionError> {
        match self.state {
            SessionState::PreviewReady | SessionState::Failed(_) => {}
            SessionState::SubmitPending => return Err(SessionError::SubmitInFlight),
            ref other => {
                return Err(SessionError::InvalidState {
                    state: other.name(),
                    action: "提交",
                });
            }
        }

        params::validate(self.kind, &self.parameters, self.source.dimensions())?;

        if matches!(self.state, SessionState::Failed(_)) {
            self.transition(SessionState::PreviewReady);
        }
        self.transition(SessionState::SubmitPending);

        Ok(SubmitTicket {
            session: self.id,
            kind: self.kind,
            source: self.source.clone(),
            parameters: self.parameters,
        })
    }

    /// 处理提交响应。返回是否被接受（会话不匹配或不在 `SubmitPending` 时忽略）。
    pub fn complete_submit(
        &mut self,
        session: SessionId,
        outcome: Result<TransformResult, TransformError>,
    ) -> Result<bool, SessionError> {
        if session != self.id || !matches!(self.state, SessionState::SubmitPending) {
            log::debug!("⏭️ {} 忽略不匹配的提交响应（来自 {}）", self.id, session);
            return Ok(false);
        }

        match outcome {
            Ok(result) => {
                {
                    let (preview, mime) = result.preview();
                    let mut registry = lock_registry(&self.registry)?;
                    registry.acquire(self.id, HandleRole::Preview, preview, mime);
                }
                self.transition(SessionState::Ready(result));
            }
            Err(err) => {
                log::warn!("⚠️ {} 变换失败：{}", self.id, err);
                self.transition(SessionState::Failed(err));
            }
        }

        Ok(true)
    }

    /// 结束会话：释放全部句柄并回到 `Idle`。可重复调用。
    pub fn close(&mut self) -> Result<usize, SessionError> {
        let released = lock_registry(&self.registry)?.release_all(self.id);
        if !matches!(self.state, SessionState::Idle) {
            self.transition(SessionState::Idle);
        }
        Ok(released)
    }

    /// 视图投影：界面上的加载标志、文件名等都从这里派生。
    pub fn view(&self) -> SessionView {
        let stats = self.result().map(|result| StatsView::from(result.stats()));
        let error = self.error();

        SessionView {
            session_id: Some(self.id.0),
            operation: Some(self.kind),
            file_name: Some(self.source.name().to_string()),
            file_size: Some(self.source.len()),
            status: self.state.name(),
            is_loading: matches!(self.state, SessionState::SubmitPending) || self.preview_in_flight(),
            preview_url: self.preview_handle().map(|handle| handle.url().to_string()),
            angle: self.parameters.angle(),
            resize_editable: match &self.parameters {
                OperationParameters::Resize(resize) => Some(resize.explicit_editable()),
                _ => None,
            },
            can_submit: matches!(self.state, SessionState::PreviewReady | SessionState::Failed(_))
                && params::validate(self.kind, &self.parameters, self.source.dimensions()).is_ok(),
            result_kind: self.result().map(TransformResult::kind_name),
            stats,
            error_code: error.map(TransformError::code),
            error_message: error.map(TransformError::user_message),
        }
    }

    fn transition(&mut self, next: SessionState) {
        log::debug!("🔀 {} {} → {}", self.id, self.state.name(), next.name());
        self.state = next;
    }
}

impl Drop for TransformSession {
    fn drop(&mut self) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.release_all(self.id);
        }
    }
}

/// 会话的只读视图。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub session_id: Option<u64>,
    pub operation: Option<OperationKind>,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    pub status: &'static str,
    pub is_loading: bool,
    pub preview_url: Option<String>,
    pub angle: Option<u16>,
    pub resize_editable: Option<bool>,
    pub can_submit: bool,
    pub result_kind: Option<&'static str>,
    pub stats: Option<StatsView>,
    pub error_code: Option<&'static str>,
    pub error_message: Option<String>,
}

impl SessionView {
    /// 没有会话时的视图。
    pub fn idle() -> Self {
        Self {
            session_id: None,
            operation: None,
            file_name: None,
            file_size: None,
            status: SessionState::Idle.name(),
            is_loading: false,
            preview_url: None,
            angle: None,
            resize_editable: None,
            can_submit: false,
            result_kind: None,
            stats: None,
            error_code: None,
            error_message: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsView {
    pub original_size: u64,
    pub result_size: u64,
    pub original_kb: String,
    pub result_kb: String,
    pub reduction_ratio: f64,
}

impl From<super::TransformStats> for StatsView {
    fn from(stats: super::TransformStats) -> Self {
        Self {
            original_size: stats.original_size,
            result_size: stats.result_size,
            original_kb: stats.original_kb(),
            result_kb: stats.result_kb(),
            reduction_ratio: stats.reduction_ratio(),
        }
    }
}
