//! QANotify 通知分发服务
//!
//! 集成功能：
//! 1. 通知分发管线（偏好网关、模板渲染、弹性投递、状态追踪）
//! 2. 事件接入器（订单生命周期事件 → 通知）
//! 3. HTTP API（发送/批量/状态查询/事件注入）
//! 4. WebSocket API（实时推送）
//!
//! 运行: cargo run --bin qanotify-server

use actix_web::{middleware, web, App, HttpServer as ActixHttpServer};
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;

use qanotify::capability::{CapabilityHealth, CapabilityRegistry};
use qanotify::channel::{ChannelSender, EmailSender, InAppInboxSender, PushSender, SmsSender};
use qanotify::dispatch::{EventIngestor, IngestorConfig, NotificationDispatcher, OrderEvent};
use qanotify::notification::{
    ChannelType, DeliveryTracker, MemoryHistoryRepository, NotificationCategory, Priority,
};
use qanotify::observability::metrics;
use qanotify::preference::{MemoryPreferenceStore, PreferenceGate, PreferenceStore};
use qanotify::realtime::SessionRegistry;
use qanotify::resilience::{CircuitBreaker, CircuitState, ResilientSender};
use qanotify::service::http::{routes, AppState};
use qanotify::service::websocket::{ws_route, WebSocketServer};
use qanotify::template::{MemoryTemplateStore, Template, TemplateRenderer, TemplateStore};
use qanotify::utils::config::{ChannelConfig, NotifyConfig};

/// 通知服务
struct NotifyServer {
    /// 配置
    config: NotifyConfig,

    /// 分发器
    dispatcher: Arc<NotificationDispatcher>,

    /// 事件接入器
    ingestor: Arc<EventIngestor>,

    /// 实时会话注册表
    registry: Arc<SessionRegistry>,

    /// 投递追踪器
    tracker: Arc<DeliveryTracker>,

    /// 偏好仓储
    preferences: Arc<dyn PreferenceStore>,

    /// 模板仓储
    templates: Arc<MemoryTemplateStore>,

    /// 能力注册表
    capabilities: Arc<CapabilityRegistry>,

    /// 事件队列写入端
    event_tx: mpsc::UnboundedSender<OrderEvent>,
}

impl NotifyServer {
    /// 创建通知服务（组装根：显式构造器装配，无容器）
    fn new(config: NotifyConfig) -> Self {
        log::info!("Initializing QANotify Server...");

        // 1. 指标注册
        metrics::register_metrics();

        // 2. 仓储（内存参考实现；持久化实现通过同名 trait 接入）
        let preferences: Arc<dyn PreferenceStore> = Arc::new(MemoryPreferenceStore::new());
        let templates = Arc::new(MemoryTemplateStore::new());
        let history = Arc::new(MemoryHistoryRepository::new());
        log::info!("✅ In-memory repositories initialized");

        // 3. 核心组件
        let tracker = Arc::new(DeliveryTracker::new(history));
        let registry = Arc::new(SessionRegistry::new());
        let gate = PreferenceGate::new(preferences.clone());
        let renderer = TemplateRenderer::new(templates.clone());

        // 4. 渠道弹性封装（每渠道独立熔断/重试/超时）
        let channels = Self::build_channels(&config);
        log::info!("✅ {} channel senders wired", channels.len());

        // 5. 分发器
        let dispatcher = Arc::new(NotificationDispatcher::new(
            gate,
            renderer,
            tracker.clone(),
            registry.clone(),
            preferences.clone(),
            channels,
            config.dispatch.max_concurrent,
        ));

        // 6. 事件接入器
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let ingestor = Arc::new(EventIngestor::new(
            dispatcher.clone(),
            preferences.clone(),
            registry.clone(),
            IngestorConfig {
                domain: config.ingest.domain.clone(),
                max_consumer_retries: config.ingest.max_consumer_retries,
            },
            event_rx,
        ));

        // 7. 能力注册表（启动时静态构建）
        let capabilities = Arc::new(Self::build_capabilities(&config, &dispatcher, &registry));
        log::info!("✅ {} capabilities registered", capabilities.len());

        Self {
            config,
            dispatcher,
            ingestor,
            registry,
            tracker,
            preferences,
            templates,
            capabilities,
            event_tx,
        }
    }

    /// 装配各渠道发送器与弹性封装
    fn build_channels(config: &NotifyConfig) -> HashMap<ChannelType, Arc<ResilientSender>> {
        let mut channels = HashMap::new();

        let entries: [(ChannelType, &ChannelConfig, Arc<dyn ChannelSender>); 4] = [
            (ChannelType::Email, &config.channels.email, Arc::new(EmailSender::new())),
            (ChannelType::Sms, &config.channels.sms, Arc::new(SmsSender::new())),
            (ChannelType::Push, &config.channels.push, Arc::new(PushSender::new())),
            (ChannelType::InApp, &config.channels.in_app, Arc::new(InAppInboxSender::new())),
        ];

        for (channel, channel_config, sender) in entries {
            if !channel_config.enabled {
                log::warn!("Channel {} disabled by config", channel);
                continue;
            }

            let breaker = Arc::new(CircuitBreaker::new(
                channel.as_str(),
                channel_config.breaker_config(),
            ));
            channels.insert(
                channel,
                Arc::new(ResilientSender::new(
                    sender,
                    breaker,
                    channel_config.retry_policy(),
                    channel_config.call_timeout(),
                )),
            );

            log::info!(
                "  ✓ {} (timeout={}ms, retries={}, breaker: {:.0}% over {} calls)",
                channel,
                channel_config.call_timeout_ms,
                channel_config.retry_max_attempts,
                channel_config.failure_rate_threshold * 100.0,
                channel_config.sliding_window_size
            );
        }

        channels
    }

    /// 静态构建能力/健康注册表
    ///
    /// 处理器为一等函数值：渠道能力探测读取对应熔断器状态
    fn build_capabilities(
        config: &NotifyConfig,
        dispatcher: &Arc<NotificationDispatcher>,
        registry: &Arc<SessionRegistry>,
    ) -> CapabilityRegistry {
        let mut capabilities = CapabilityRegistry::new();

        let channel_entries: [(ChannelType, &'static str, f64, &ChannelConfig); 4] = [
            (ChannelType::Email, "channel.email", 0.9, &config.channels.email),
            (ChannelType::Sms, "channel.sms", 0.7, &config.channels.sms),
            (ChannelType::Push, "channel.push", 0.8, &config.channels.push),
            (ChannelType::InApp, "channel.in_app", 0.95, &config.channels.in_app),
        ];

        for (channel, name, proficiency, channel_config) in channel_entries {
            let probe: qanotify::capability::CapabilityProbe =
                match dispatcher.channel_sender(channel) {
                    Some(sender) => {
                        let breaker = sender.breaker().clone();
                        Arc::new(move || match breaker.state() {
                            CircuitState::Closed => CapabilityHealth::up("breaker CLOSED"),
                            CircuitState::HalfOpen => {
                                CapabilityHealth::degraded("breaker HALF_OPEN")
                            }
                            CircuitState::Open => CapabilityHealth::down("breaker OPEN"),
                        })
                    }
                    None => Arc::new(|| CapabilityHealth::down("channel disabled")),
                };

            capabilities.register(name, proficiency, channel_config.call_timeout(), probe);
        }

        let registry_probe = registry.clone();
        capabilities.register(
            "realtime.sessions",
            1.0,
            std::time::Duration::from_millis(100),
            Arc::new(move || {
                CapabilityHealth::up(format!(
                    "{} users, {} observers connected",
                    registry_probe.connected_users(),
                    registry_probe.connected_observers()
                ))
            }),
        );

        let dispatcher_probe = dispatcher.clone();
        capabilities.register(
            "dispatch.pipeline",
            1.0,
            std::time::Duration::from_millis(100),
            Arc::new(move || {
                let stats = dispatcher_probe.get_stats();
                CapabilityHealth::up(format!(
                    "dispatched={} sent={} failed={}",
                    stats.dispatched, stats.sent, stats.failed
                ))
            }),
        );

        capabilities
    }

    /// 预置交易事件模板
    fn seed_templates(&self) {
        log::info!("Seeding trading templates...");

        let templates = vec![
            Template::new(
                "trading-order-placed",
                "Order {{orderId}} placed",
                "Your {{direction}} order for {{instrumentId}} has been placed at {{price}}.",
                NotificationCategory::Trading,
            )
            .with_required_variables(vec!["orderId".into(), "instrumentId".into()])
            .with_default_priority(Priority::Low),
            Template::new(
                "trading-order-filled",
                "Order {{orderId}} filled",
                "Your order for {{instrumentId}} filled: {{volume}} @ {{price}}.",
                NotificationCategory::Trading,
            )
            .with_required_variables(vec!["orderId".into(), "price".into()]),
            Template::new(
                "trading-order-partially-filled",
                "Order {{orderId}} partially filled",
                "Filled {{filledVolume}} of {{volume}} for {{instrumentId}}.",
                NotificationCategory::Trading,
            ),
            Template::new(
                "trading-order-rejected",
                "Order {{orderId}} rejected",
                "Your order for {{instrumentId}} was rejected: {{reason}}.",
                NotificationCategory::Trading,
            )
            .with_required_variables(vec!["orderId".into(), "reason".into()])
            .with_default_priority(Priority::High),
            Template::new(
                "trading-order-cancelled",
                "Order {{orderId}} cancelled",
                "Your order for {{instrumentId}} has been cancelled.",
                NotificationCategory::Trading,
            )
            .with_default_priority(Priority::High),
        ];

        let count = templates.len();
        for template in templates {
            log::info!("  ✓ {}", template.name);
            self.templates.upsert(template);
        }

        log::info!("✅ {} templates seeded", count);
    }

    /// 启动 HTTP 服务器
    async fn start_http_server(self: &Arc<Self>) -> io::Result<actix_web::dev::Server> {
        let bind_address = self.config.http.bind_address();
        log::info!("Starting HTTP server at {}...", bind_address);

        let app_state = Arc::new(AppState {
            dispatcher: self.dispatcher.clone(),
            ingestor: self.ingestor.clone(),
            registry: self.registry.clone(),
            capabilities: self.capabilities.clone(),
            event_tx: self.event_tx.clone(),
        });

        let server = ActixHttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(app_state.clone()))
                .wrap(middleware::Logger::default())
                .wrap(middleware::Compress::default())
                .wrap(
                    actix_cors::Cors::default()
                        .allow_any_origin()
                        .allow_any_method()
                        .allow_any_header()
                        .max_age(3600),
                )
                .configure(routes::configure)
        })
        .bind(&bind_address)?
        .run();

        log::info!("✅ HTTP server started at http://{}", bind_address);
        log::info!("   Health: http://{}/health", bind_address);
        log::info!("   Send API: http://{}/api/notification/send", bind_address);

        Ok(server)
    }

    /// 启动 WebSocket 服务器
    async fn start_websocket_server(self: &Arc<Self>) -> io::Result<actix_web::dev::Server> {
        let bind_address = self.config.websocket.bind_address();
        log::info!("Starting WebSocket server at {}...", bind_address);

        let ws_server = Arc::new(WebSocketServer::new(
            self.registry.clone(),
            self.tracker.clone(),
            self.preferences.clone(),
        ));

        let server = ActixHttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(ws_server.clone()))
                .wrap(middleware::Logger::default())
                .route("/ws", web::get().to(ws_route))
                .route("/health", web::get().to(|| async { "OK" }))
        })
        .bind(&bind_address)?
        .run();

        log::info!("✅ WebSocket server started at ws://{}", bind_address);
        log::info!(
            "   Connect: ws://{}/ws?user_id=<USER_ID>&token=<JWT>",
            bind_address
        );

        Ok(server)
    }

    /// 启动定期统计报告
    fn start_periodic_reporting(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let server = self.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(300));

            loop {
                interval.tick().await;

                let dispatch = server.dispatcher.get_stats();
                let ingest = server.ingestor.get_stats();
                let tracker = server.tracker.get_stats();

                log::info!("━━━━━━━━━━━━━━━━━━━ Periodic Report ━━━━━━━━━━━━━━━━━━━");
                log::info!(
                    "📮 Dispatch: {} total, {} sent ({} realtime), {} suppressed, {} failed",
                    dispatch.dispatched,
                    dispatch.sent,
                    dispatch.realtime_deliveries,
                    dispatch.suppressed,
                    dispatch.failed
                );
                log::info!(
                    "📥 Ingest: {} consumed, {} dead-lettered",
                    ingest.consumed,
                    ingest.dead_lettered
                );
                log::info!(
                    "🗂  History: {} admitted, {} readmitted for retry",
                    tracker.admitted,
                    tracker.readmitted
                );
                log::info!(
                    "🔌 Realtime: {} users, {} observers connected",
                    server.registry.connected_users(),
                    server.registry.connected_observers()
                );
                log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            }
        })
    }

    /// 运行服务器
    async fn run(self) -> io::Result<()> {
        // 1. 预置模板
        self.seed_templates();

        let server = Arc::new(self);

        // 2. 启动事件消费
        let _consumer_handle = server.ingestor.clone().start_event_consumer();
        log::info!("✅ Event consumer started");

        // 3. 启动定期报告
        let _report_handle = server.start_periodic_reporting();

        // 4. 启动 HTTP / WebSocket 服务器
        let http_server = server.start_http_server().await?;
        let ws_server = server.start_websocket_server().await?;

        print_startup_banner(&server.config);

        tokio::try_join!(async { http_server.await }, async { ws_server.await })?;

        Ok(())
    }
}

/// 打印启动横幅
fn print_startup_banner(config: &NotifyConfig) {
    println!("\n╔═══════════════════════════════════════════════════════════════════════╗");
    println!("║                     🔔 QANotify Server Started                        ║");
    println!("╚═══════════════════════════════════════════════════════════════════════╝\n");

    println!("📡 Service Endpoints:");
    println!("   • HTTP API:    http://{}", config.http.bind_address());
    println!("   • WebSocket:   ws://{}/ws", config.websocket.bind_address());
    println!("   • Health:      http://{}/health", config.http.bind_address());
    println!("   • Metrics:     http://{}/metrics", config.http.bind_address());

    println!("\n📋 Available APIs:");
    println!("   ┌─────────────────────────────────────────────────────────────────┐");
    println!("   │ POST   /api/notification/send       - 发送通知                  │");
    println!("   │ POST   /api/notification/batch      - 批量发送                  │");
    println!("   │ GET    /api/notification/status/:id - 投递状态查询              │");
    println!("   │ POST   /api/events                  - 注入订单事件              │");
    println!("   │ GET    /api/stats                   - 运行统计                  │");
    println!("   └─────────────────────────────────────────────────────────────────┘");

    println!("\n   WebSocket API:");
    println!("   ┌─────────────────────────────────────────────────────────────────┐");
    println!("   │ ping               - 心跳                                       │");
    println!("   │ mark_read          - 标记已读                                   │");
    println!("   │ preference_update  - 偏好更新                                   │");
    println!("   └─────────────────────────────────────────────────────────────────┘");

    println!("\n💡 Quick Start:");
    println!(
        "   curl -X POST http://{}/api/notification/send \\",
        config.http.bind_address()
    );
    println!("     -H 'Content-Type: application/json' \\");
    println!("     -d '{{\"user_id\":\"demo\",\"channel\":\"EMAIL\",\"category\":\"TRADING\",\"subject\":\"hi\",\"content\":\"hello\",\"email\":\"demo@example.com\"}}'");

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("🟢 Server is running. Press Ctrl+C to stop.\n");
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    // 初始化日志
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // 1. 加载配置文件
    let mut config = match NotifyConfig::load_default() {
        Ok(cfg) => {
            log::info!("✅ Config loaded from config/notify.toml");
            cfg
        }
        Err(e) => {
            log::warn!("Failed to load config file: {}, using defaults", e);
            NotifyConfig::default()
        }
    };

    // 2. 命令行覆盖
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        match args[i].as_str() {
            "--http" | "-h" => {
                if i + 1 < args.len() {
                    if let Some((host, port)) = parse_bind(&args[i + 1]) {
                        config.http.host = host;
                        config.http.port = port;
                    }
                }
            }
            "--ws" | "-w" => {
                if i + 1 < args.len() {
                    if let Some((host, port)) = parse_bind(&args[i + 1]) {
                        config.websocket.host = host;
                        config.websocket.port = port;
                    }
                }
            }
            _ => {}
        }
    }

    log::info!("Configuration loaded");
    log::info!("  HTTP: {}", config.http.bind_address());
    log::info!("  WebSocket: {}", config.websocket.bind_address());

    // 创建并运行服务器
    let server = NotifyServer::new(config);
    server.run().await
}

/// 解析 host:port
fn parse_bind(address: &str) -> Option<(String, u16)> {
    let (host, port) = address.rsplit_once(':')?;
    let port = port.parse().ok()?;
    Some((host.to_string(), port))
}
