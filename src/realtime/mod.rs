//! 实时推送通道
//!
//! 维护持久 WebSocket 连接，向在线用户直推可投递的通知。
//! 该路径独立于持久化渠道路径（弹性封装 + 渠道发送器），
//! 不替代它：在线用户的 in-app 通知仍然创建并追踪
//! NotificationHistory 记录，只是跳过渠道发送器一跳，
//! 直推成功后立即记 SENT。

pub mod messages;
pub mod registry;
pub mod session;

pub use messages::{ClientMessage, ServerMessage};
pub use registry::{ClientConnection, RegistryStatsSnapshot, SessionRegistry};
pub use session::{SessionRole, WsSession};
