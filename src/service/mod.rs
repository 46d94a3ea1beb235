//! 对外服务层 (WebSocket + HTTP)

pub mod http;
pub mod websocket;
