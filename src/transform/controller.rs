//! # 会话控制器
//!
//! ## 设计思路
//!
//! 控制器是界面层看到的唯一入口，组合：
//! - 当前会话（至多一个，选择新文件时同步丢弃旧会话）
//! - 网关（预览通道 + 提交通道）
//! - 资源登记表与下载触发器
//!
//! ## 实现思路
//!
//! - 每个操作分三段：加锁取票据 → 释放锁后 await 网络 → 重新加锁应用结果。
//!   会话锁从不跨 await 持有。
//! - 预览响应是否生效完全由会话的序号规则决定，控制器不做额外判断。
//! - `Drop` 视为“离开页面”：释放当前会话和所有延迟释放中的下载句柄。

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;

use super::download::{DownloadEmitter, DownloadSink, EmittedDownload};
use super::gateway::TransformGateway;
use super::params::{OperationKind, ParameterEdit};
use super::registry::{HandleStats, ObjectUrlPlatform, ResourceRegistry, SessionId, SharedRegistry, lock_registry};
use super::session::{SessionState, SessionView, TransformSession};
use super::source::SourceFile;
use super::{SessionError, TransformConfig, TransformError, TransformResult};

/// 单会话变换控制器。
pub struct TransformController<G: TransformGateway> {
    config: TransformConfig,
    gateway: G,
    registry: SharedRegistry,
    emitter: DownloadEmitter,
    session: Mutex<Option<TransformSession>>,
    next_session_id: AtomicU64,
}

impl<G: TransformGateway> TransformController<G> {
    pub fn new(
        config: TransformConfig,
        gateway: G,
        platform: Arc<dyn ObjectUrlPlatform>,
        sink: Arc<dyn DownloadSink>,
    ) -> Self {
        let registry = ResourceRegistry::shared(platform);
        let emitter = DownloadEmitter::new(registry.clone(), sink, config.download_grace());

        Self {
            config,
            gateway,
            registry,
            emitter,
            session: Mutex::new(None),
            next_session_id: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &TransformConfig {
        &self.config
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn handle_stats(&self) -> Result<HandleStats, SessionError> {
        Ok(lock_registry(&self.registry)?.stats())
    }

    fn lock_session(&self) -> Result<MutexGuard<'_, Option<TransformSession>>, SessionError> {
        self.session.lock().map_err(|_| SessionError::LockPoisoned("会话"))
    }

    /// 读取本地文件并开始新会话。
    pub async fn open_file(&self, kind: OperationKind, path: impl AsRef<Path>) -> Result<SessionView, SessionError> {
        let source = SourceFile::from_path(path, &self.config).await?;
        self.select_file(kind, source)
    }

    /// 选择文件：丢弃旧会话（同步释放其句柄），开始新会话。
    pub fn select_file(&self, kind: OperationKind, source: SourceFile) -> Result<SessionView, SessionError> {
        if source.len() > self.config.max_file_size {
            return Err(TransformError::ResourceLimit(format!(
                "文件过大：{} bytes（限制：{} bytes）",
                source.len(),
                self.config.max_file_size
            ))
            .into());
        }

        let mut guard = self.lock_session()?;
        if let Some(mut previous) = guard.take() {
            previous.close()?;
        }

        let id = SessionId(self.next_session_id.fetch_add(1, Ordering::SeqCst) + 1);
        let session = TransformSession::start(id, kind, source, self.registry.clone())?;
        let view = session.view();
        *guard = Some(session);

        Ok(view)
    }

    /// 应用参数编辑；支持实时预览的操作随后发起预览请求。
    ///
    /// 可并发调用，只有最后发出的预览会生效。
    pub async fn edit(&self, edit: ParameterEdit) -> Result<SessionView, SessionError> {
        let ticket = {
            let mut guard = self.lock_session()?;
            let session = guard.as_mut().ok_or(SessionError::NoActiveSession)?;
            session.apply_edit(edit)?;
            session.begin_preview()
        };

        if let Some(ticket) = ticket {
            let pending = PendingPreview {
                slot: &self.session,
                session: ticket.session,
                seq: ticket.seq,
            };
            let outcome = self
                .gateway
                .request_preview(&ticket.source, &ticket.parameters)
                .await;
            std::mem::forget(pending);

            let mut guard = self.lock_session()?;
            if let Some(session) = guard.as_mut() {
                session.apply_preview(ticket.session, ticket.seq, outcome)?;
            }
        }

        self.view()
    }

    /// 提交当前参数。远程失败体现在视图的 `Failed` 状态上，不作为 `Err` 返回。
    pub async fn submit(&self) -> Result<SessionView, SessionError> {
        let ticket = {
            let mut guard = self.lock_session()?;
            let session = guard.as_mut().ok_or(SessionError::NoActiveSession)?;
            session.begin_submit()?
        };

        log::info!("🚀 {} 提交 {}", ticket.session, ticket.kind);
        let outcome = self
            .gateway
            .submit(ticket.kind, &ticket.source, &ticket.parameters)
            .await;

        {
            let mut guard = self.lock_session()?;
            if let Some(session) = guard.as_mut() {
                session.complete_submit(ticket.session, outcome)?;
            }
        }

        self.view()
    }

    /// 下载结果并结束会话。
    ///
    /// 旋转没有单独的提交动作，在 `PreviewReady` 下先提交再下载。
    pub async fn download(&self) -> Result<EmittedDownload, SessionError> {
        let needs_submit = {
            let guard = self.lock_session()?;
            let session = guard.as_ref().ok_or(SessionError::NoActiveSession)?;
            session.kind() == OperationKind::Rotate
                && matches!(session.state(), SessionState::PreviewReady | SessionState::Failed(_))
        };
        if needs_submit {
            self.submit().await?;
        }

        let (session_id, result) = {
            let guard = self.lock_session()?;
            let session = guard.as_ref().ok_or(SessionError::NoActiveSession)?;
            match session.state() {
                SessionState::Ready(result) => (session.id(), result.clone()),
                SessionState::Failed(err) => return Err(err.clone().into()),
                other => {
                    return Err(SessionError::InvalidState {
                        state: other.name(),
                        action: "下载",
                    });
                }
            }
        };

        let (bytes, mime) = self.download_payload(&result).await?;
        let emitter = self.emitter.clone();
        let file_name = result.suggested_filename();
        let emitted = tokio::task::spawn_blocking(move || emitter.emit(session_id, bytes, &mime, &file_name))
            .await
            .map_err(|e| SessionError::Download(format!("下载任务异常结束：{}", e)))??;

        let mut guard = self.lock_session()?;
        if guard.as_ref().map(TransformSession::id) == Some(session_id) {
            if let Some(mut session) = guard.take() {
                session.close()?;
            }
        }

        Ok(emitted)
    }

    async fn download_payload(&self, result: &TransformResult) -> Result<(Bytes, String), SessionError> {
        match result {
            TransformResult::Blob { data, mime, .. } => Ok((data.clone(), mime.clone())),
            TransformResult::PreviewPlusDownload { download_ref, .. } => {
                let bytes = self.gateway.resolve_download(download_ref).await?;
                let mime = download_ref
                    .mime()
                    .map(str::to_string)
                    .or_else(|| infer::get(&bytes).map(|kind| kind.mime_type().to_string()))
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                Ok((bytes, mime))
            }
        }
    }

    /// 放弃当前会话，返回释放的句柄数量。
    pub fn reset(&self) -> Result<usize, SessionError> {
        let mut guard = self.lock_session()?;
        match guard.take() {
            Some(mut session) => session.close(),
            None => Ok(0),
        }
    }

    pub fn view(&self) -> Result<SessionView, SessionError> {
        let guard = self.lock_session()?;
        Ok(guard
            .as_ref()
            .map(TransformSession::view)
            .unwrap_or_else(SessionView::idle))
    }
}

impl<G: TransformGateway> Drop for TransformController<G> {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.session.lock() {
            if let Some(mut session) = guard.take() {
                if let Err(err) = session.close() {
                    log::warn!("⚠️ 退出时关闭会话失败: {}", err);
                }
            }
        }
        if let Ok(mut registry) = self.registry.lock() {
            let flushed = registry.flush_detached();
            if flushed > 0 {
                log::debug!("🧹 退出前释放 {} 个下载句柄", flushed);
            }
        }
    }
}

/// 在途预览：`edit` 的 future 在响应到达前被丢弃时，通知会话该序号已结束。
struct PendingPreview<'a> {
    slot: &'a Mutex<Option<TransformSession>>,
    session: SessionId,
    seq: u64,
}

impl Drop for PendingPreview<'_> {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.slot.lock() {
            if let Some(session) = guard.as_mut() {
                session.abandon_preview(self.session, self.seq);
                log::debug!("🛑 {} 预览 #{} 已被调用方放弃", self.session, self.seq);
            }
        }
    }
}
