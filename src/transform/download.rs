//! # 下载触发
//!
//! ## 设计思路
//!
//! 下载分两步：先把结果字节登记为 `Download` 句柄交给平台（这里是 `DownloadSink`），
//! 再在一个短暂的宽限期后释放该句柄。宽限期保证平台已经开始消费引用，
//! 不会出现“引用先被回收、下载后开始”的情况。
//!
//! ## 实现思路
//!
//! - 写入方读取的是句柄背后的字节，而不是直接拿调用方的 `Bytes`，
//!   句柄释放后不会再被访问。
//! - 句柄在保存后立即 `detach`，会话随后的 `release_all` 不会提前回收它。
//! - 有 tokio 运行时时用 `tokio::spawn` + `sleep` 延迟释放；没有运行时则立即释放。

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;

use super::SessionError;
use super::registry::{HandleRole, SessionId, SharedRegistry, TransientHandle, lock_registry};

/// 下载落地方式（浏览器下载、写文件……）。
///
/// 同步接口，允许阻塞；控制器在 `spawn_blocking` 线程上调用它。
pub trait DownloadSink: Send + Sync {
    /// 保存字节，返回最终位置。
    fn save(&self, file_name: &str, bytes: &[u8], mime: &str) -> Result<PathBuf, SessionError>;
}

/// 写入本地目录的下载实现。
#[derive(Debug, Clone)]
pub struct FsDownloadSink {
    dir: PathBuf,
}

impl FsDownloadSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 目标目录下不冲突的路径：`name.ext`、`name (1).ext`、`name (2).ext` ...
    fn unique_path(&self, file_name: &str) -> PathBuf {
        let candidate = self.dir.join(file_name);
        if !candidate.exists() {
            return candidate;
        }

        let (stem, ext) = match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
            _ => (file_name, None),
        };

        (1u32..)
            .map(|n| match ext {
                Some(ext) => self.dir.join(format!("{} ({}).{}", stem, n, ext)),
                None => self.dir.join(format!("{} ({})", stem, n)),
            })
            .find(|path| !path.exists())
            .unwrap_or(candidate)
    }
}

impl DownloadSink for FsDownloadSink {
    fn save(&self, file_name: &str, bytes: &[u8], _mime: &str) -> Result<PathBuf, SessionError> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).map_err(|e| {
                SessionError::Download(format!("创建下载目录 '{}' 失败: {}", self.dir.display(), e))
            })?;
        }

        let path = self.unique_path(&sanitize_file_name(file_name));
        fs::write(&path, bytes)
            .map_err(|e| SessionError::Download(format!("写入 '{}' 失败: {}", path.display(), e)))?;

        Ok(path)
    }
}

/// 去掉路径分隔符与控制字符，空名回退为 `download`。
pub fn sanitize_file_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = cleaned.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        "download".to_string()
    } else {
        trimmed.to_string()
    }
}

/// 一次已触发的下载。
#[derive(Debug, Clone, Serialize)]
pub struct EmittedDownload {
    pub path: PathBuf,
    pub file_name: String,
    pub size: u64,
    pub mime: String,
}

/// 下载触发器。
#[derive(Clone)]
pub struct DownloadEmitter {
    registry: SharedRegistry,
    sink: Arc<dyn DownloadSink>,
    grace: Duration,
}

impl DownloadEmitter {
    pub fn new(registry: SharedRegistry, sink: Arc<dyn DownloadSink>, grace: Duration) -> Self {
        Self { registry, sink, grace }
    }

    /// 触发下载并安排句柄延迟释放。
    ///
    /// 保存失败时句柄同样会被释放。
    pub fn emit(
        &self,
        session: SessionId,
        bytes: Bytes,
        mime: &str,
        suggested_name: &str,
    ) -> Result<EmittedDownload, SessionError> {
        let handle = lock_registry(&self.registry)?.acquire(session, HandleRole::Download, bytes, mime);

        let saved = self.save_from_handle(&handle, mime, suggested_name);

        lock_registry(&self.registry)?.detach(&handle);
        self.schedule_release(handle);

        let (path, size) = saved?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| suggested_name.to_string());

        log::info!("💾 {} 已下载 {}（{} bytes）", session, path.display(), size);

        Ok(EmittedDownload {
            path,
            file_name,
            size,
            mime: mime.to_string(),
        })
    }

    fn save_from_handle(
        &self,
        handle: &TransientHandle,
        mime: &str,
        suggested_name: &str,
    ) -> Result<(PathBuf, u64), SessionError> {
        let data = lock_registry(&self.registry)?
            .read(handle)
            .ok_or_else(|| SessionError::HandleReleased(handle.url().to_string()))?;

        let path = self.sink.save(suggested_name, &data, mime)?;
        Ok((path, data.len() as u64))
    }

    fn schedule_release(&self, handle: TransientHandle) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let registry = self.registry.clone();
                let grace = self.grace;
                runtime.spawn(async move {
                    tokio::time::sleep(grace).await;
                    if let Ok(mut registry) = lock_registry(&registry) {
                        registry.release(&handle);
                    }
                });
            }
            Err(_) => {
                if let Ok(mut registry) = lock_registry(&self.registry) {
                    registry.release(&handle);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::registry::{MemoryUrlPlatform, ResourceRegistry};
    use tempfile::TempDir;

    fn emitter(dir: &Path, grace_ms: u64) -> (SharedRegistry, DownloadEmitter) {
        let registry = ResourceRegistry::shared(Arc::new(MemoryUrlPlatform::new()));
        let emitter = DownloadEmitter::new(
            registry.clone(),
            Arc::new(FsDownloadSink::new(dir)),
            Duration::from_millis(grace_ms),
        );
        (registry, emitter)
    }

    #[test]
    fn sanitize_strips_separators() {
        assert_eq!(sanitize_file_name("../etc/passwd"), "_etc_passwd");
        assert_eq!(sanitize_file_name("a:b?.png"), "a_b_.png");
        assert_eq!(sanitize_file_name("..."), "download");
        assert_eq!(sanitize_file_name("holiday.webp"), "holiday.webp");
    }

    #[test]
    fn repeated_names_get_numbered() {
        let dir = TempDir::new().expect("create temp dir");
        let sink = FsDownloadSink::new(dir.path());

        let first = sink.save("out.png", b"1", "image/png").expect("first save");
        let second = sink.save("out.png", b"2", "image/png").expect("second save");
        let third = sink.save("out.png", b"3", "image/png").expect("third save");

        assert_eq!(first.file_name().and_then(|n| n.to_str()), Some("out.png"));
        assert_eq!(second.file_name().and_then(|n| n.to_str()), Some("out (1).png"));
        assert_eq!(third.file_name().and_then(|n| n.to_str()), Some("out (2).png"));
        assert_eq!(fs::read(second).expect("read back"), b"2");
    }

    #[test]
    fn emit_without_runtime_releases_immediately() {
        let dir = TempDir::new().expect("create temp dir");
        let (registry, emitter) = emitter(dir.path(), 100);

        let emitted = emitter
            .emit(SessionId(1), Bytes::from_static(b"payload"), "image/png", "result.png")
            .expect("emit");

        assert_eq!(emitted.size, 7);
        assert_eq!(fs::read(&emitted.path).expect("read back"), b"payload");

        let registry = registry.lock().expect("registry lock");
        assert_eq!(registry.live_count(), 0);
        assert!(registry.stats().is_balanced());
    }

    #[tokio::test]
    async fn emit_defers_release_past_session_teardown() {
        let dir = TempDir::new().expect("create temp dir");
        let (registry, emitter) = emitter(dir.path(), 20);

        emitter
            .emit(SessionId(7), Bytes::from_static(b"payload"), "image/png", "result.png")
            .expect("emit");

        {
            let mut registry = registry.lock().expect("registry lock");
            assert_eq!(registry.release_all(SessionId(7)), 0);
            assert_eq!(registry.live_count(), 1);
        }

        tokio::time::sleep(Duration::from_millis(200)).await;

        let registry = registry.lock().expect("registry lock");
        assert_eq!(registry.live_count(), 0);
        assert_eq!(registry.stats().download_released, 1);
    }
}
