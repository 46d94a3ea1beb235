//! 通知分发管线端到端集成测试
//!
//! 覆盖三个关键场景：
//! A. 在线用户 + SMS 关闭：实时直推，SMS 发送器零调用
//! B. 无偏好记录 + email 熔断打开：受理后以 CIRCUIT_OPEN 落 FAILED
//! C. 5 接收人批量：1 个被拦截，4 个尝试，单个失败不影响其他

use async_trait::async_trait;
use crossbeam::channel::unbounded;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use qanotify::channel::{
    ChannelSender, InAppInboxSender, OutboundMessage, SendError, SendReceipt,
};
use qanotify::dispatch::{
    DeliveryPath, DispatchOutcome, EventIngestor, IngestorConfig, NotificationDispatcher,
    OrderEvent,
};
use qanotify::notification::{
    ChannelType, DeliveryTracker, MemoryHistoryRepository, NotificationCategory,
    NotificationRequest, NotificationStatus, Priority,
};
use qanotify::preference::{
    MemoryPreferenceStore, PreferenceGate, PreferenceStore, UserPreference,
};
use qanotify::realtime::{ServerMessage, SessionRegistry};
use qanotify::resilience::{CircuitBreaker, CircuitBreakerConfig, ResilientSender, RetryPolicy};
use qanotify::template::{MemoryTemplateStore, TemplateRenderer};

/// 脚本化发送器：记录调用次数，指定地址瞬时失败
struct TestSender {
    channel: ChannelType,
    calls: Arc<AtomicUsize>,
    failing_addresses: Vec<String>,
}

#[async_trait]
impl ChannelSender for TestSender {
    fn channel(&self) -> ChannelType {
        self.channel
    }

    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt, SendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_addresses.contains(&message.to) {
            return Err(SendError::Transient("provider 503".to_string()));
        }
        Ok(SendReceipt {
            external_id: format!("ext-{}", message.notification_id),
        })
    }
}

/// 组装好的测试管线
struct Pipeline {
    dispatcher: Arc<NotificationDispatcher>,
    ingestor: Arc<EventIngestor>,
    registry: Arc<SessionRegistry>,
    tracker: Arc<DeliveryTracker>,
    preferences: Arc<MemoryPreferenceStore>,
    history: Arc<MemoryHistoryRepository>,
    email_breaker: Arc<CircuitBreaker>,
    email_calls: Arc<AtomicUsize>,
    sms_calls: Arc<AtomicUsize>,
    _event_tx: mpsc::UnboundedSender<OrderEvent>,
}

fn build_pipeline(email_failing_addresses: Vec<String>) -> Pipeline {
    let preferences = Arc::new(MemoryPreferenceStore::new());
    let templates = Arc::new(MemoryTemplateStore::new());
    let history = Arc::new(MemoryHistoryRepository::new());

    let tracker = Arc::new(DeliveryTracker::new(history.clone()));
    let registry = Arc::new(SessionRegistry::new());

    let email_calls = Arc::new(AtomicUsize::new(0));
    let sms_calls = Arc::new(AtomicUsize::new(0));

    let email_breaker = Arc::new(CircuitBreaker::new("EMAIL", CircuitBreakerConfig::default()));

    let mut channels: HashMap<ChannelType, Arc<ResilientSender>> = HashMap::new();
    channels.insert(
        ChannelType::Email,
        Arc::new(ResilientSender::new(
            Arc::new(TestSender {
                channel: ChannelType::Email,
                calls: email_calls.clone(),
                failing_addresses: email_failing_addresses,
            }),
            email_breaker.clone(),
            RetryPolicy::new(2, Duration::from_millis(1)),
            Duration::from_millis(100),
        )),
    );
    channels.insert(
        ChannelType::Sms,
        Arc::new(ResilientSender::new(
            Arc::new(TestSender {
                channel: ChannelType::Sms,
                calls: sms_calls.clone(),
                failing_addresses: Vec::new(),
            }),
            Arc::new(CircuitBreaker::new("SMS", CircuitBreakerConfig::default())),
            RetryPolicy::new(2, Duration::from_millis(1)),
            Duration::from_millis(100),
        )),
    );
    channels.insert(
        ChannelType::InApp,
        Arc::new(ResilientSender::new(
            Arc::new(InAppInboxSender::new()),
            Arc::new(CircuitBreaker::new("IN_APP", CircuitBreakerConfig::default())),
            RetryPolicy::no_retry(),
            Duration::from_millis(100),
        )),
    );

    let prefs_dyn: Arc<dyn PreferenceStore> = preferences.clone();
    let dispatcher = Arc::new(NotificationDispatcher::new(
        PreferenceGate::new(prefs_dyn.clone()),
        TemplateRenderer::new(templates),
        tracker.clone(),
        registry.clone(),
        prefs_dyn.clone(),
        channels,
        16,
    ));

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let ingestor = Arc::new(EventIngestor::new(
        dispatcher.clone(),
        prefs_dyn,
        registry.clone(),
        IngestorConfig::default(),
        event_rx,
    ));

    Pipeline {
        dispatcher,
        ingestor,
        registry,
        tracker,
        preferences,
        history,
        email_breaker,
        email_calls,
        sms_calls,
        _event_tx: event_tx,
    }
}

fn order_event(user_id: &str, event_type: &str) -> OrderEvent {
    let mut data = HashMap::new();
    data.insert("orderId".to_string(), serde_json::json!("O123"));
    data.insert("correlationId".to_string(), serde_json::json!("corr-e2e"));

    OrderEvent {
        notification_id: None,
        user_id: user_id.to_string(),
        event_type: event_type.to_string(),
        title: format!("{} notice", event_type),
        content: format!("{} for order O123", event_type),
        data,
        timestamp: 1728123456789,
    }
}

/// 场景 A：SMS 关闭、in-app 启用、用户在线
///
/// ORDER_PLACED 事件产生恰好一条 SENT 历史记录，
/// 经实时注册表直推，SMS 发送器零调用
#[tokio::test]
async fn test_scenario_a_connected_user_realtime_path() {
    let pipeline = build_pipeline(Vec::new());

    // 偏好：SMS 关闭（默认集合不含 SMS），in-app 启用
    let mut pref = UserPreference::default_for("user_01");
    pref.preferred_channel = ChannelType::InApp;
    pipeline.preferences.upsert(pref);

    // 用户在线
    let (session_tx, session_rx) = unbounded();
    pipeline.registry.register_user("user_01", "session_01", session_tx);

    let result = pipeline
        .ingestor
        .handle_event(&order_event("user_01", "ORDER_PLACED"))
        .await
        .unwrap();

    // 实时路径投递
    match &result.outcome {
        DispatchOutcome::Sent { path } => assert_eq!(*path, DeliveryPath::Realtime),
        other => panic!("expected realtime delivery, got {:?}", other),
    }

    // 恰好一条 SENT 历史记录
    assert_eq!(pipeline.history.len(), 1);
    let notification_id = result.notification_id.clone().unwrap();
    let record = pipeline.tracker.status_of(&notification_id).unwrap();
    assert_eq!(record.status, NotificationStatus::Sent);
    assert_eq!(record.priority, Priority::Low); // PLACE → LOW
    assert_eq!(record.correlation_id.as_ref(), "corr-e2e");
    assert!(record.sent_at.is_some());

    // 客户端收到通知帧
    let message = session_rx.recv_timeout(Duration::from_secs(1)).unwrap();
    match message {
        ServerMessage::Notification { data, .. } => {
            assert_eq!(data["notification_id"], notification_id.as_ref());
        }
        other => panic!("expected notification frame, got {:?}", other),
    }

    // SMS 渠道零调用
    assert_eq!(pipeline.sms_calls.load(Ordering::SeqCst), 0);
    // 实时路径不触达渠道发送器
    assert_eq!(pipeline.email_calls.load(Ordering::SeqCst), 0);
}

/// 场景 B：无偏好记录，email 熔断强制打开
///
/// ORDER_REJECTED 事件被受理（HIGH 优先级、无模板回退），
/// 以 CIRCUIT_OPEN 原因落 FAILED，发送器零调用
#[tokio::test]
async fn test_scenario_b_circuit_open_records_failed() {
    let pipeline = build_pipeline(Vec::new());

    // 管理观察者在线，应收到失败通报
    let (observer_tx, observer_rx) = unbounded();
    pipeline.registry.register_observer("obs_01", "admin_01", observer_tx);

    // 无偏好记录、不在线 → 渠道回退 email；熔断强制打开
    pipeline.email_breaker.force_open();

    let event = order_event("user_02", "ORDER_REJECTED");
    let result = pipeline.ingestor.handle_event(&event).await.unwrap();

    match &result.outcome {
        DispatchOutcome::Failed { reason_code, .. } => {
            assert_eq!(reason_code, "CIRCUIT_OPEN");
        }
        other => panic!("expected CIRCUIT_OPEN failure, got {:?}", other),
    }

    let notification_id = result.notification_id.clone().unwrap();
    let record = pipeline.tracker.status_of(&notification_id).unwrap();

    assert_eq!(record.status, NotificationStatus::Failed);
    assert_eq!(record.priority, Priority::High); // REJECT → HIGH
    assert_eq!(record.channel, ChannelType::Email);
    assert!(record.error_message.as_deref().unwrap().starts_with("CIRCUIT_OPEN"));
    // 无模板配置：渲染回退为事件原始内容
    assert_eq!(record.subject, event.title);
    assert!(record.template_name.is_none());
    // 熔断短路：发送器零调用
    assert_eq!(pipeline.email_calls.load(Ordering::SeqCst), 0);
    // 失败但可重试（外部调度器可重新提交）
    assert!(pipeline.tracker.is_retry_eligible(&notification_id));

    // 观察者收到失败通报
    let frame = observer_rx.recv_timeout(Duration::from_secs(1)).unwrap();
    match frame {
        ServerMessage::AdminNotification { data, .. } => {
            assert_eq!(data["notification_id"], notification_id.as_ref());
            assert_eq!(data["channel"], "EMAIL");
        }
        other => panic!("expected admin notification, got {:?}", other),
    }
}

/// 场景 C：5 接收人批量，1 个关闭通知，1 个投递失败
///
/// 结果：4 次尝试 + 1 次拦截；单个失败不影响其余 3 个
#[tokio::test]
async fn test_scenario_c_batch_isolation() {
    // user_d 的地址瞬时失败（重试耗尽）
    let pipeline = build_pipeline(vec!["user_d@example.com".to_string()]);

    for (user, disabled) in [
        ("user_a", false),
        ("user_b", false),
        ("user_c", true), // 通知关闭
        ("user_d", false),
        ("user_e", false),
    ] {
        let mut pref = UserPreference::default_for(user);
        pref.email = Some(format!("{}@example.com", user));
        pref.notifications_enabled = !disabled;
        pipeline.preferences.upsert(pref);
    }

    let requests: Vec<NotificationRequest> = ["user_a", "user_b", "user_c", "user_d", "user_e"]
        .iter()
        .map(|user| {
            NotificationRequest::new(
                ChannelType::Email,
                user.to_string(),
                NotificationCategory::Trading,
                "Settlement report",
                "Your daily settlement report is ready",
            )
        })
        .collect();

    let batch = pipeline.dispatcher.dispatch_batch(requests).await;

    assert_eq!(batch.total, 5);
    assert_eq!(batch.suppressed, 1);
    assert_eq!(batch.attempted, 4);
    assert_eq!(batch.sent, 3);
    assert_eq!(batch.failed, 1);

    // 被拦截的接收人没有历史记录
    assert_eq!(pipeline.history.len(), 4);

    // 单个失败不影响其他接收人：3 条 SENT
    let mut sent = 0;
    let mut failed = 0;
    for result in &batch.results {
        if let Some(id) = &result.notification_id {
            match pipeline.tracker.status_of(id).unwrap().status {
                NotificationStatus::Sent => sent += 1,
                NotificationStatus::Failed => failed += 1,
                other => panic!("unexpected terminal status {:?}", other),
            }
        }
    }
    assert_eq!(sent, 3);
    assert_eq!(failed, 1);

    // user_d 重试耗尽：2 次尝试；其余各 1 次 = 5
    assert_eq!(pipeline.email_calls.load(Ordering::SeqCst), 5);
}

/// 实时直推失败回落标准渠道路径
///
/// 损坏连接被摘除后，in-app 通知落入收件箱而不是被丢弃
#[tokio::test]
async fn test_realtime_failure_falls_back_to_channel_path() {
    let pipeline = build_pipeline(Vec::new());

    let mut pref = UserPreference::default_for("user_09");
    pref.preferred_channel = ChannelType::InApp;
    pipeline.preferences.upsert(pref);

    // 注册后立刻丢弃接收端，模拟损坏连接
    let (session_tx, session_rx) = unbounded();
    pipeline.registry.register_user("user_09", "session_09", session_tx);
    drop(session_rx);

    let request = NotificationRequest::new(
        ChannelType::InApp,
        "user_09",
        NotificationCategory::Account,
        "Balance update",
        "Your balance changed",
    );

    let result = pipeline.dispatcher.dispatch(request).await;

    // 回落到渠道路径（in-app 落盘），不丢弃
    match &result.outcome {
        DispatchOutcome::Sent { path } => {
            assert_eq!(*path, DeliveryPath::Channel(ChannelType::InApp));
        }
        other => panic!("expected channel fallback, got {:?}", other),
    }

    // 损坏连接被摘除
    assert!(!pipeline.registry.is_connected("user_09"));

    let record = pipeline
        .tracker
        .status_of(result.notification_id.as_ref().unwrap())
        .unwrap();
    assert_eq!(record.status, NotificationStatus::Sent);
}

/// 已读回执经追踪器推进到 READ
#[tokio::test]
async fn test_mark_read_transition_after_realtime_delivery() {
    let pipeline = build_pipeline(Vec::new());

    let pref = UserPreference::default_for("user_10");
    pipeline.preferences.upsert(pref);

    let (session_tx, _session_rx) = unbounded();
    pipeline.registry.register_user("user_10", "session_10", session_tx);

    let result = pipeline
        .ingestor
        .handle_event(&order_event("user_10", "ORDER_FILLED"))
        .await
        .unwrap();
    let notification_id = result.notification_id.unwrap();

    // 客户端 mark_read → READ 迁移
    pipeline
        .tracker
        .record_outcome(&notification_id, qanotify::notification::DeliveryOutcome::Read)
        .unwrap();

    let record = pipeline.tracker.status_of(&notification_id).unwrap();
    assert_eq!(record.status, NotificationStatus::Read);
    assert!(record.read_at.is_some());
}
