//! HTTP 服务模块
//!
//! REST 接口：发送/批量发送/状态查询/事件注入/健康/指标

pub mod handlers;
pub mod models;
pub mod routes;

pub use handlers::AppState;
