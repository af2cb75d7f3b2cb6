//! # 图片变换客户端：库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 调用方 (CLI / 界面层)                     │
//! │                                                          │
//! │   select_file ── edit ── submit ── download ── reset     │
//! │        │  (Result<T, CommandError> / SessionView)        │
//! └────────┼─────────────────────────────────────────────────┘
//!          ↕
//! ┌────────┼─────────────────────────────────────────────────┐
//! │        ↕             客户端 (Rust)                        │
//! │                                                          │
//! │  ┌─ error ────── AppError (统一错误类型)                  │
//! │  │                                                       │
//! │  ├─ transform ── 会话控制器                               │
//! │  │   ├─ session    状态机 + 预览序号规则                  │
//! │  │   ├─ gateway    multipart 请求 (reqwest)              │
//! │  │   ├─ registry   临时句柄所有权                         │
//! │  │   └─ download   写出文件 + 延迟释放                    │
//! │  │                                                       │
//! │  ├─ settings       settings.json 读写                     │
//! │  └─ storage        下载目录 (返回 Result)                 │
//! └────────┼─────────────────────────────────────────────────┘
//!          ↕ HTTP multipart/form-data
//!     远程图片变换服务 (convert / compress / crop / preview / rotate / resize)
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | 统一错误类型 `AppError`，命令边界的返回类型 |
//! | [`transform`] | 会话状态机、参数模型、远程网关、资源句柄与下载 |
//! | [`settings`] | 用户设置文件的读取与保存 |
//! | [`storage`] | 下载目录的解析、自动创建与占用统计 |

pub mod error;
pub mod settings;
pub mod storage;
pub mod transform;
