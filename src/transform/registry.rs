//! # 临时资源句柄登记表
//!
//! ## 设计思路
//!
//! 会话期间产生的每个临时二进制引用（object URL 一类）都在这里登记所有权：
//! 句柄属于哪个会话、承担哪个角色。由登记表统一负责释放，避免各处零散地创建/回收。
//!
//! ## 实现思路
//!
//! - 同一会话同一角色只保留一个存活句柄，新句柄安装前先释放旧句柄。
//! - `release` 幂等：卸载与用户下载等清理路径可能先后各跑一次。
//! - 下载句柄需要在会话销毁后仍存活一小段时间，通过 `detach` 从会话名下移出，
//!   之后由延迟任务释放；`flush_detached` 用于进程退出前兜底。
//! - 底层平台能力抽象为 `ObjectUrlPlatform`，内存实现 `MemoryUrlPlatform` 供 CLI 与测试使用。

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;

use super::SessionError;

/// 会话标识。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

/// 句柄角色。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleRole {
    /// 当前展示的预览图。
    Preview,
    /// 触发下载用的结果引用。
    Download,
}

impl HandleRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preview => "preview",
            Self::Download => "download",
        }
    }
}

/// 指向客户端本地二进制数据的短生命周期引用。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransientHandle {
    id: HandleId,
    session: SessionId,
    role: HandleRole,
    url: String,
}

impl TransientHandle {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn role(&self) -> HandleRole {
        self.role
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// 平台 object URL 能力。
pub trait ObjectUrlPlatform: Send + Sync {
    /// 为字节创建一个可供展示/下载的引用。
    fn create(&self, bytes: Bytes, mime: &str) -> String;
    /// 回收引用，之后该 URL 不可再解析。
    fn revoke(&self, url: &str);
    /// 解析引用对应的字节。
    fn resolve(&self, url: &str) -> Option<Bytes>;
}

/// 进程内 object URL 实现，URL 形如 `blob:transform/<n>`。
#[derive(Default)]
pub struct MemoryUrlPlatform {
    next: AtomicU64,
    live: Mutex<HashMap<String, Bytes>>,
}

impl MemoryUrlPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前未回收的 URL 数量。
    pub fn live_count(&self) -> usize {
        self.live.lock().map(|live| live.len()).unwrap_or(0)
    }
}

impl ObjectUrlPlatform for MemoryUrlPlatform {
    fn create(&self, bytes: Bytes, mime: &str) -> String {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        let url = format!("blob:transform/{}", n);
        if let Ok(mut live) = self.live.lock() {
            live.insert(url.clone(), bytes);
        }
        log::debug!("🔗 创建 object URL {}（{}）", url, mime);
        url
    }

    fn revoke(&self, url: &str) {
        if let Ok(mut live) = self.live.lock() {
            live.remove(url);
        }
        log::debug!("🧹 回收 object URL {}", url);
    }

    fn resolve(&self, url: &str) -> Option<Bytes> {
        self.live.lock().ok()?.get(url).cloned()
    }
}

/// 按角色统计的创建/释放次数。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandleStats {
    pub preview_acquired: u64,
    pub preview_released: u64,
    pub download_acquired: u64,
    pub download_released: u64,
}

impl HandleStats {
    fn record_acquire(&mut self, role: HandleRole) {
        match role {
            HandleRole::Preview => self.preview_acquired += 1,
            HandleRole::Download => self.download_acquired += 1,
        }
    }

    fn record_release(&mut self, role: HandleRole) {
        match role {
            HandleRole::Preview => self.preview_released += 1,
            HandleRole::Download => self.download_released += 1,
        }
    }

    /// 所有已创建句柄都已释放。
    pub fn is_balanced(&self) -> bool {
        self.preview_acquired == self.preview_released && self.download_acquired == self.download_released
    }
}

struct LiveHandle {
    session: SessionId,
    role: HandleRole,
    url: String,
}

/// 资源句柄登记表。
pub struct ResourceRegistry {
    platform: Arc<dyn ObjectUrlPlatform>,
    next_id: u64,
    live: HashMap<HandleId, LiveHandle>,
    slots: HashMap<(SessionId, HandleRole), HandleId>,
    detached: HashSet<HandleId>,
    stats: HandleStats,
}

/// 跨任务共享的登记表。
pub type SharedRegistry = Arc<Mutex<ResourceRegistry>>;

/// 获取登记表锁，锁中毒时映射为业务错误。
pub(crate) fn lock_registry(registry: &SharedRegistry) -> Result<MutexGuard<'_, ResourceRegistry>, SessionError> {
    registry
        .lock()
        .map_err(|_| SessionError::LockPoisoned("资源登记表"))
}

impl ResourceRegistry {
    pub fn new(platform: Arc<dyn ObjectUrlPlatform>) -> Self {
        Self {
            platform,
            next_id: 0,
            live: HashMap::new(),
            slots: HashMap::new(),
            detached: HashSet::new(),
            stats: HandleStats::default(),
        }
    }

    pub fn shared(platform: Arc<dyn ObjectUrlPlatform>) -> SharedRegistry {
        Arc::new(Mutex::new(Self::new(platform)))
    }

    /// 为会话创建指定角色的句柄；同角色旧句柄先释放。
    pub fn acquire(&mut self, session: SessionId, role: HandleRole, bytes: Bytes, mime: &str) -> TransientHandle {
        if let Some(previous) = self.slots.remove(&(session, role)) {
            self.release_id(previous);
        }

        self.next_id += 1;
        let id = HandleId(self.next_id);
        let url = self.platform.create(bytes, mime);

        self.live.insert(
            id,
            LiveHandle {
                session,
                role,
                url: url.clone(),
            },
        );
        self.slots.insert((session, role), id);
        self.stats.record_acquire(role);

        TransientHandle { id, session, role, url }
    }

    /// 释放句柄。已释放的句柄再次释放是空操作，返回 `false`。
    pub fn release(&mut self, handle: &TransientHandle) -> bool {
        if self.slots.get(&(handle.session, handle.role)) == Some(&handle.id) {
            self.slots.remove(&(handle.session, handle.role));
        }
        self.release_id(handle.id)
    }

    /// 释放会话名下的全部句柄（已 `detach` 的除外），返回释放数量。
    pub fn release_all(&mut self, session: SessionId) -> usize {
        let owned: Vec<HandleId> = self
            .slots
            .iter()
            .filter(|((owner, _), _)| *owner == session)
            .map(|(_, id)| *id)
            .collect();

        self.slots.retain(|(owner, _), _| *owner != session);

        let released = owned.into_iter().filter(|id| self.release_id(*id)).count();
        if released > 0 {
            log::debug!("🧹 {} 释放 {} 个句柄", session, released);
        }
        released
    }

    /// 将句柄移出会话所有权，之后只能通过 `release` 或 `flush_detached` 释放。
    pub fn detach(&mut self, handle: &TransientHandle) {
        if !self.live.contains_key(&handle.id) {
            return;
        }
        if self.slots.get(&(handle.session, handle.role)) == Some(&handle.id) {
            self.slots.remove(&(handle.session, handle.role));
        }
        self.detached.insert(handle.id);
    }

    /// 立即释放所有已移出会话的句柄。
    pub fn flush_detached(&mut self) -> usize {
        let pending: Vec<HandleId> = self.detached.drain().collect();
        pending.into_iter().filter(|id| self.release_id(*id)).count()
    }

    /// 读取句柄背后的字节；已释放返回 `None`。
    pub fn read(&self, handle: &TransientHandle) -> Option<Bytes> {
        let live = self.live.get(&handle.id)?;
        self.platform.resolve(&live.url)
    }

    pub fn is_live(&self, handle: &TransientHandle) -> bool {
        self.live.contains_key(&handle.id)
    }

    /// 会话名下某角色当前的存活句柄。
    pub fn current(&self, session: SessionId, role: HandleRole) -> Option<TransientHandle> {
        let id = *self.slots.get(&(session, role))?;
        let live = self.live.get(&id)?;
        Some(TransientHandle {
            id,
            session: live.session,
            role: live.role,
            url: live.url.clone(),
        })
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn stats(&self) -> HandleStats {
        self.stats
    }

    fn release_id(&mut self, id: HandleId) -> bool {
        let Some(handle) = self.live.remove(&id) else {
            return false;
        };

        self.detached.remove(&id);
        self.platform.revoke(&handle.url);
        self.stats.record_release(handle.role);
        true
    }
}

impl Drop for ResourceRegistry {
    fn drop(&mut self) {
        let ids: Vec<HandleId> = self.live.keys().copied().collect();
        for id in ids {
            self.release_id(id);
        }
    }
}
