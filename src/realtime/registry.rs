//! 实时会话注册表（SessionRegistry）
//!
//! 职责：
//! 1. 维护两张并发表：用户ID → 活跃连接（普通用户），
//!    连接ID → 活跃连接（管理观察者）
//! 2. 向在线用户直推通知（失败即摘除损坏连接）
//! 3. 向观察者尽力广播（单个失败不中断，错误连接摘除）
//!
//! 注册表不做认证——握手校验在 WebSocket 路由完成之后
//! 才会注册连接。

use super::messages::ServerMessage;
use crossbeam::channel::Sender;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// 活跃连接句柄
#[derive(Debug, Clone)]
pub struct ClientConnection {
    /// 会话ID
    pub session_id: Arc<str>,

    /// 用户ID
    pub user_id: Arc<str>,

    /// 发往 WebSocket 会话的通道
    pub sender: Sender<ServerMessage>,

    /// 连接时间
    pub connected_at: i64,
}

/// 注册表统计信息
#[derive(Debug, Default)]
pub struct RegistryStats {
    /// 直推成功数
    pub messages_sent: AtomicU64,

    /// 直推失败数（连接损坏）
    pub messages_failed: AtomicU64,

    /// 广播消息数
    pub broadcasts: AtomicU64,
}

/// 统计信息快照
#[derive(Debug, Clone)]
pub struct RegistryStatsSnapshot {
    pub messages_sent: u64,
    pub messages_failed: u64,
    pub broadcasts: u64,
    pub connected_users: usize,
    pub connected_observers: usize,
}

/// 实时会话注册表
#[derive(Default)]
pub struct SessionRegistry {
    /// 用户会话：user_id -> connection（每用户一条活跃连接，后连顶替先连）
    user_sessions: DashMap<Arc<str>, ClientConnection>,

    /// 观察者会话：session_id -> connection
    observer_sessions: DashMap<Arc<str>, ClientConnection>,

    /// 统计信息
    stats: Arc<RegistryStats>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册用户会话
    pub fn register_user(
        &self,
        user_id: impl Into<Arc<str>>,
        session_id: impl Into<Arc<str>>,
        sender: Sender<ServerMessage>,
    ) {
        let user_id = user_id.into();
        let session_id = session_id.into();

        let connection = ClientConnection {
            session_id: session_id.clone(),
            user_id: user_id.clone(),
            sender,
            connected_at: chrono::Utc::now().timestamp(),
        };

        if let Some(previous) = self.user_sessions.insert(user_id.clone(), connection) {
            log::info!(
                "User {} reconnected, replacing session {}",
                user_id,
                previous.session_id
            );
        } else {
            log::info!("User session registered: {} for user {}", session_id, user_id);
        }
    }

    /// 注册观察者会话（管理端）
    pub fn register_observer(
        &self,
        session_id: impl Into<Arc<str>>,
        user_id: impl Into<Arc<str>>,
        sender: Sender<ServerMessage>,
    ) {
        let session_id = session_id.into();
        let user_id = user_id.into();

        self.observer_sessions.insert(
            session_id.clone(),
            ClientConnection {
                session_id: session_id.clone(),
                user_id,
                sender,
                connected_at: chrono::Utc::now().timestamp(),
            },
        );

        log::info!("Observer session registered: {}", session_id);
    }

    /// 注销会话（断开或心跳超时）
    pub fn unregister(&self, session_id: &str) {
        self.observer_sessions.remove(session_id);
        // 用户表按 session_id 匹配摘除，避免误删重连后的新会话
        self.user_sessions
            .retain(|_, conn| conn.session_id.as_ref() != session_id);
    }

    /// 用户是否在线
    pub fn is_connected(&self, user_id: &str) -> bool {
        self.user_sessions.contains_key(user_id)
    }

    /// 向在线用户直推
    ///
    /// 用户不在线或发送失败返回 false；发送失败时损坏连接
    /// 作为副作用被摘除
    pub fn send_to_user(&self, user_id: &str, message: ServerMessage) -> bool {
        let connection = match self.user_sessions.get(user_id) {
            Some(c) => c.clone(),
            None => return false,
        };

        match connection.sender.send(message) {
            Ok(()) => {
                self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.stats.messages_failed.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "Realtime send failed for user {}, evicting session {}",
                    user_id,
                    connection.session_id
                );
                self.unregister(&connection.session_id);
                false
            }
        }
    }

    /// 向所有观察者尽力广播，返回成功数
    ///
    /// 单个连接失败不中断广播，错误连接被摘除
    pub fn broadcast_to_observers(&self, message: ServerMessage) -> usize {
        let mut delivered = 0;
        let mut broken: Vec<Arc<str>> = Vec::new();

        for entry in self.observer_sessions.iter() {
            if entry.value().sender.send(message.clone()).is_ok() {
                delivered += 1;
            } else {
                broken.push(entry.key().clone());
            }
        }

        for session_id in broken {
            log::warn!("Observer session {} broken, evicting", session_id);
            self.observer_sessions.remove(&session_id);
        }

        self.stats.broadcasts.fetch_add(1, Ordering::Relaxed);
        delivered
    }

    /// 在线用户数
    pub fn connected_users(&self) -> usize {
        self.user_sessions.len()
    }

    /// 在线观察者数
    pub fn connected_observers(&self) -> usize {
        self.observer_sessions.len()
    }

    /// 获取统计信息
    pub fn get_stats(&self) -> RegistryStatsSnapshot {
        RegistryStatsSnapshot {
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            messages_failed: self.stats.messages_failed.load(Ordering::Relaxed),
            broadcasts: self.stats.broadcasts.load(Ordering::Relaxed),
            connected_users: self.user_sessions.len(),
            connected_observers: self.observer_sessions.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;

    #[test]
    fn test_register_and_is_connected() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = unbounded();

        assert!(!registry.is_connected("user_01"));
        registry.register_user("user_01", "session_01", tx);
        assert!(registry.is_connected("user_01"));
        assert_eq!(registry.connected_users(), 1);

        registry.unregister("session_01");
        assert!(!registry.is_connected("user_01"));
    }

    #[test]
    fn test_send_to_user() {
        let registry = SessionRegistry::new();
        let (tx, rx) = unbounded();
        registry.register_user("user_01", "session_01", tx);

        assert!(registry.send_to_user("user_01", ServerMessage::pong()));
        assert!(matches!(rx.recv().unwrap(), ServerMessage::Pong { .. }));

        // 不在线返回 false
        assert!(!registry.send_to_user("user_02", ServerMessage::pong()));
    }

    #[test]
    fn test_broken_connection_evicted_on_send() {
        let registry = SessionRegistry::new();
        let (tx, rx) = unbounded();
        registry.register_user("user_01", "session_01", tx);

        // 接收端关闭后发送失败，连接被摘除
        drop(rx);
        assert!(!registry.send_to_user("user_01", ServerMessage::pong()));
        assert!(!registry.is_connected("user_01"));
    }

    #[test]
    fn test_reconnect_replaces_previous_session() {
        let registry = SessionRegistry::new();
        let (tx1, _rx1) = unbounded();
        let (tx2, rx2) = unbounded();

        registry.register_user("user_01", "session_01", tx1);
        registry.register_user("user_01", "session_02", tx2);
        assert_eq!(registry.connected_users(), 1);

        // 旧会话的注销不影响新会话
        registry.unregister("session_01");
        assert!(registry.is_connected("user_01"));

        assert!(registry.send_to_user("user_01", ServerMessage::pong()));
        assert!(rx2.recv().is_ok());
    }

    #[test]
    fn test_broadcast_continues_past_failures() {
        let registry = SessionRegistry::new();
        let (tx1, rx1) = unbounded();
        let (tx2, rx2) = unbounded();
        let (tx3, rx3) = unbounded();

        registry.register_observer("obs_01", "admin_01", tx1);
        registry.register_observer("obs_02", "admin_02", tx2);
        registry.register_observer("obs_03", "admin_03", tx3);

        // 中间一个连接损坏
        drop(rx2);

        let delivered =
            registry.broadcast_to_observers(ServerMessage::admin_notification(serde_json::json!({})));
        assert_eq!(delivered, 2);
        assert!(rx1.recv().is_ok());
        assert!(rx3.recv().is_ok());

        // 损坏连接被摘除
        assert_eq!(registry.connected_observers(), 2);
    }
}
