use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;

use msgbus::{
    BusConfig, ConcurrencyPolicy, ConfigurationError, ERROR_CHANNEL_NAME,
    FAILED_MESSAGE_ATTRIBUTE, HandlerFn, Lifecycle, Message, MessageBus, MessageChannel,
    MessageEndpoint, MessagingError, PollingSourceAdapter, RuntimeError, Schedule, SourceAdapter,
    SourceFn, Subscription, TargetFn, TargetRef,
};

const WAIT: Duration = Duration::from_secs(2);

/// Target counting the messages it sees; fails every one when `fail` is set.
fn counter(hits: Arc<AtomicUsize>, fail: bool) -> TargetRef {
    TargetFn::arc(move |_msg: Message| {
        let hits = Arc::clone(&hits);
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
            if fail {
                return Err(MessagingError::handler("sink down"));
            }
            Ok(())
        }
    })
}

async fn wait_until(hits: &AtomicUsize, n: usize) {
    timeout(WAIT, async {
        while hits.load(Ordering::SeqCst) < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

/// Target forwarding every payload it sees to the returned receiver.
fn recorder() -> (TargetRef, mpsc::UnboundedReceiver<serde_json::Value>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let target: TargetRef = TargetFn::arc(move |msg: Message| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(msg.into_payload());
            Ok::<_, MessagingError>(())
        }
    });
    (target, rx)
}

#[tokio::test]
async fn launch_starts_the_bus_and_stop_is_idempotent() {
    let (target, mut seen) = recorder();
    let bus = MessageBus::builder(BusConfig::default())
        .with_channel("in", Arc::new(MessageChannel::queue(8)))
        .with_endpoint(
            "sink",
            MessageEndpoint::target(target).with_subscription(Subscription::to_name("in")),
        )
        .launch()
        .await
        .unwrap();
    assert!(bus.is_running());
    assert!(bus.error_channel().await.is_some());

    bus.send("in", Message::new("a")).await.unwrap();
    assert_eq!(timeout(WAIT, seen.recv()).await.unwrap(), Some(json!("a")));

    bus.stop().await.unwrap();
    assert!(!bus.is_running());
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn restarted_bus_keeps_its_subscriptions() {
    let (target, mut seen) = recorder();
    let bus = MessageBus::new(BusConfig::default());
    bus.register_channel("in", Arc::new(MessageChannel::queue(8)))
        .await
        .unwrap();
    let endpoint = bus
        .register_target("sink", target, Subscription::to_name("in"))
        .await
        .unwrap();

    bus.start().await.unwrap();
    bus.stop().await.unwrap();
    bus.send("in", Message::new(1)).await.unwrap();
    bus.start().await.unwrap();

    assert!(endpoint.is_activated());
    assert_eq!(timeout(WAIT, seen.recv()).await.unwrap(), Some(json!(1)));
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn channels_are_auto_created_when_enabled() {
    let cfg = BusConfig {
        auto_create_channels: true,
        ..BusConfig::default()
    };
    let bus = MessageBus::new(cfg);
    let doubler = HandlerFn::arc(|msg: Message| async move {
        let n = msg.payload().as_i64().unwrap_or_default();
        Ok::<_, MessagingError>(Some(msg.reply(n * 2)))
    });
    let endpoint = MessageEndpoint::handler(doubler)
        .with_subscription(Subscription::to_name("numbers"))
        .with_default_output("doubled");
    bus.register_endpoint("doubler", Arc::new(endpoint))
        .await
        .unwrap();
    bus.start().await.unwrap();

    let names = bus.channel_names().await;
    assert!(names.contains(&"numbers".to_string()));
    assert!(names.contains(&"doubled".to_string()));

    bus.send("numbers", Message::new(21)).await.unwrap();
    let out = bus.lookup_channel("doubled").await.unwrap();
    let reply = timeout(WAIT, out.receive()).await.unwrap().unwrap();
    assert_eq!(reply.payload(), &json!(42));
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn unknown_subscription_channel_fails_start() {
    let bus = MessageBus::new(BusConfig::default());
    let (target, _seen) = recorder();
    bus.register_target("sink", target, Subscription::to_name("nowhere"))
        .await
        .unwrap();

    let err = bus.start().await.unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Configuration(ConfigurationError::UnknownChannel { ref channel })
            if channel == "nowhere"
    ));
    assert!(!bus.is_running());
}

#[tokio::test]
async fn unknown_output_channel_fails_start() {
    let bus = MessageBus::new(BusConfig::default());
    bus.register_channel("in", Arc::new(MessageChannel::queue(8)))
        .await
        .unwrap();
    let echo = HandlerFn::arc(|msg: Message| async move {
        Ok::<_, MessagingError>(Some(msg.reply("echo")))
    });
    let endpoint = MessageEndpoint::handler(echo)
        .with_subscription(Subscription::to_name("in"))
        .with_default_output("missing");
    bus.register_endpoint("echo", Arc::new(endpoint))
        .await
        .unwrap();

    let err = bus.start().await.unwrap_err();
    assert_eq!(err.as_label(), "config_unknown_output_channel");
}

#[tokio::test]
async fn sending_to_an_unknown_channel_fails() {
    let bus = MessageBus::new(BusConfig::default());
    let err = bus.send("ghost", Message::new(1)).await.unwrap_err();
    assert_eq!(
        err,
        MessagingError::UnknownChannel {
            channel: "ghost".to_string()
        }
    );
}

#[tokio::test]
async fn unregistered_endpoint_stops_receiving() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let target = TargetFn::arc(move |_msg: Message| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, MessagingError>(())
        }
    });

    let bus = MessageBus::new(BusConfig::default());
    bus.register_channel("in", Arc::new(MessageChannel::queue(8)))
        .await
        .unwrap();
    bus.register_target("counter", target, Subscription::to_name("in"))
        .await
        .unwrap();
    bus.start().await.unwrap();

    bus.send("in", Message::new(1)).await.unwrap();
    timeout(WAIT, async {
        while hits.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let removed = bus.unregister_endpoint("counter").await.unwrap();
    assert!(!removed.is_activated());
    assert!(bus.lookup_endpoint("counter").await.is_none());
    assert_eq!(bus.dispatcher("in").await.unwrap().target_count().await, 0);

    bus.send("in", Message::new(2)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn polling_source_adapter_feeds_a_channel() {
    let remaining = Arc::new(AtomicUsize::new(3));
    let left = Arc::clone(&remaining);
    let source = SourceFn::arc(move || {
        let left = Arc::clone(&left);
        async move {
            let taken = left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .ok();
            Ok::<_, MessagingError>(taken.map(Message::new))
        }
    });

    let (target, mut seen) = recorder();
    let bus = MessageBus::new(BusConfig::default());
    let feed = Arc::new(MessageChannel::queue(8));
    bus.register_channel("feed", feed.clone()).await.unwrap();
    bus.register_target("sink", target, Subscription::to_name("feed"))
        .await
        .unwrap();
    let adapter = PollingSourceAdapter::new(
        source,
        feed,
        Schedule::fixed_delay(Duration::from_millis(10)).with_max_messages_per_poll(2),
    );
    bus.register_source_adapter("counter-source", Arc::new(adapter))
        .await;
    bus.start().await.unwrap();

    let mut payloads = Vec::new();
    for _ in 0..3 {
        payloads.push(timeout(WAIT, seen.recv()).await.unwrap().unwrap());
    }
    assert_eq!(payloads, vec![json!(3), json!(2), json!(1)]);
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn handler_failures_land_on_the_error_channel() {
    let bus = MessageBus::new(BusConfig::default());
    bus.register_channel("in", Arc::new(MessageChannel::queue(8)))
        .await
        .unwrap();
    let failing = HandlerFn::arc(|_msg: Message| async move {
        Err::<Option<Message>, _>(MessagingError::handler("boom"))
    });
    bus.register_handler("failing", failing, Subscription::to_name("in"))
        .await
        .unwrap();
    bus.start().await.unwrap();

    let request = Message::new("payload");
    let request_id = request.id();
    bus.send("in", request).await.unwrap();

    let errors = bus.lookup_channel(ERROR_CHANNEL_NAME).await.unwrap();
    let error = timeout(WAIT, errors.receive()).await.unwrap().unwrap();
    assert!(error.is_error());
    assert_eq!(error.correlation_id(), Some(request_id));
    assert_eq!(
        error.headers().attribute(FAILED_MESSAGE_ATTRIBUTE),
        Some(&json!(request_id))
    );
    assert_eq!(error.payload()["error"], json!("handler_failed"));
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn direct_channel_failures_reach_the_sender() {
    let bus = MessageBus::new(BusConfig::default());
    bus.register_channel("sync", Arc::new(MessageChannel::direct()))
        .await
        .unwrap();
    let failing = TargetFn::arc(|_msg: Message| async move {
        Err::<(), _>(MessagingError::handler("rejected inline"))
    });
    bus.register_target("failing", failing, Subscription::to_name("sync"))
        .await
        .unwrap();
    bus.start().await.unwrap();

    let err = bus.send("sync", Message::new(1)).await.unwrap_err();
    assert_eq!(err, MessagingError::handler("rejected inline"));
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn polling_a_direct_channel_is_rejected() {
    let bus = MessageBus::new(BusConfig::default());
    bus.register_channel("sync", Arc::new(MessageChannel::direct()))
        .await
        .unwrap();
    let (target, _seen) = recorder();
    let subscription = Subscription::to_name("sync")
        .with_schedule(Schedule::fixed_delay(Duration::from_millis(10)));
    bus.register_target("poller", target, subscription)
        .await
        .unwrap();

    let err = bus.start().await.unwrap_err();
    assert_eq!(err.as_label(), "config_polled_direct_channel");
}

#[tokio::test]
async fn failing_error_channel_consumer_sees_each_message_once() {
    let bus = MessageBus::new(BusConfig::default());
    bus.register_channel("in", Arc::new(MessageChannel::queue(8)))
        .await
        .unwrap();
    let failing = HandlerFn::arc(|_msg: Message| async move {
        Err::<Option<Message>, _>(MessagingError::handler("boom"))
    });
    bus.register_handler("failing", failing, Subscription::to_name("in"))
        .await
        .unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    bus.register_target(
        "error-sink",
        counter(hits.clone(), true),
        Subscription::to_name(ERROR_CHANNEL_NAME),
    )
    .await
    .unwrap();
    bus.start().await.unwrap();

    bus.send("in", Message::new("payload")).await.unwrap();
    wait_until(&hits, 1).await;
    bus.send(ERROR_CHANNEL_NAME, Message::new("plain")).await.unwrap();
    wait_until(&hits, 2).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert!(bus.error_channel().await.unwrap().is_empty());
    bus.stop().await.unwrap();
}

/// Lifecycle-only source adapter recording its transitions.
#[derive(Default)]
struct Listener {
    running: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

#[async_trait]
impl Lifecycle for Listener {
    async fn start(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl SourceAdapter for Listener {
    fn lifecycle(self: Arc<Self>) -> Option<Arc<dyn Lifecycle>> {
        Some(self)
    }
}

#[tokio::test]
async fn lifecycle_adapters_follow_the_bus() {
    let bus = MessageBus::new(BusConfig::default());
    let listener = Arc::new(Listener::default());
    bus.register_source_adapter("listener", listener.clone()).await;
    assert!(!listener.is_running());

    bus.start().await.unwrap();
    assert!(listener.is_running());
    bus.stop().await.unwrap();
    assert!(!listener.is_running());

    bus.start().await.unwrap();
    assert!(listener.is_running());
    bus.stop().await.unwrap();
    assert_eq!(listener.starts.load(Ordering::SeqCst), 2);
    assert_eq!(listener.stops.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn lifecycle_adapter_registered_on_a_running_bus_starts_at_once() {
    let bus = MessageBus::new(BusConfig::default());
    bus.start().await.unwrap();

    let listener = Arc::new(Listener::default());
    bus.register_source_adapter("listener", listener.clone()).await;
    assert!(listener.is_running());

    bus.stop().await.unwrap();
    assert!(!listener.is_running());
}

/// Highest number of deliveries seen running at once across two channels.
async fn peak_concurrent_deliveries(dispatcher_pool_size: usize) -> usize {
    let cfg = BusConfig {
        dispatcher_pool_size,
        ..BusConfig::default()
    };
    let bus = MessageBus::new(cfg);
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));

    for name in ["a", "b"] {
        bus.register_channel(name, Arc::new(MessageChannel::queue(8)))
            .await
            .unwrap();
        let (active, peak, done) = (active.clone(), peak.clone(), done.clone());
        let blocking = TargetFn::arc(move |_msg: Message| {
            let (active, peak, done) = (active.clone(), peak.clone(), done.clone());
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
                Ok::<_, MessagingError>(())
            }
        });
        bus.register_target(&format!("{name}-sink"), blocking, Subscription::to_name(name))
            .await
            .unwrap();
    }
    bus.start().await.unwrap();

    for n in 0..2 {
        bus.send("a", Message::new(n)).await.unwrap();
        bus.send("b", Message::new(n)).await.unwrap();
    }
    wait_until(&done, 4).await;
    bus.stop().await.unwrap();
    peak.load(Ordering::SeqCst)
}

#[tokio::test]
async fn dispatcher_pool_caps_deliveries_across_channels() {
    assert_eq!(peak_concurrent_deliveries(1).await, 1);
    assert_eq!(peak_concurrent_deliveries(0).await, 2);
}

#[tokio::test]
async fn unregistered_channel_stops_its_running_dispatcher() {
    let hits = Arc::new(AtomicUsize::new(0));
    let bus = MessageBus::new(BusConfig::default());
    bus.register_channel("in", Arc::new(MessageChannel::queue(8)))
        .await
        .unwrap();
    bus.register_target("counter", counter(hits.clone(), false), Subscription::to_name("in"))
        .await
        .unwrap();
    bus.start().await.unwrap();

    bus.send("in", Message::new(1)).await.unwrap();
    wait_until(&hits, 1).await;

    let dispatcher = bus.dispatcher("in").await.unwrap();
    assert!(dispatcher.is_running());
    let channel = bus.unregister_channel("in").await.unwrap();
    assert!(!dispatcher.is_running());
    assert!(bus.dispatcher("in").await.is_none());

    channel.send(Message::new(2)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(channel.len(), 1);
    bus.stop().await.unwrap();
}

/// Target sleeping for `nap` per message; counts starts and finishes.
fn napper(nap: Duration, started: Arc<AtomicUsize>, finished: Arc<AtomicUsize>) -> TargetRef {
    TargetFn::arc(move |_msg: Message| {
        let (started, finished) = (started.clone(), finished.clone());
        async move {
            started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(nap).await;
            finished.fetch_add(1, Ordering::SeqCst);
            Ok::<_, MessagingError>(())
        }
    })
}

async fn bus_with_napper(
    grace: Duration,
    nap: Duration,
) -> (MessageBus, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let cfg = BusConfig {
        grace,
        ..BusConfig::default()
    };
    let bus = MessageBus::new(cfg);
    bus.register_channel("in", Arc::new(MessageChannel::queue(8)))
        .await
        .unwrap();
    let (started, finished) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
    let endpoint = MessageEndpoint::target(napper(nap, started.clone(), finished.clone()))
        .with_subscription(Subscription::to_name("in"))
        .with_concurrency(ConcurrencyPolicy::new(2, 2));
    bus.register_endpoint("napper", Arc::new(endpoint))
        .await
        .unwrap();
    bus.start().await.unwrap();
    (bus, started, finished)
}

#[tokio::test]
async fn stop_waits_for_messages_handled_on_spawned_tasks() {
    let (bus, started, finished) =
        bus_with_napper(Duration::from_secs(2), Duration::from_millis(100)).await;

    bus.send("in", Message::new(1)).await.unwrap();
    wait_until(&started, 1).await;
    bus.stop().await.unwrap();
    assert_eq!(finished.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stop_aborts_spawned_handling_after_grace() {
    let (bus, started, finished) =
        bus_with_napper(Duration::from_millis(50), Duration::from_secs(10)).await;

    bus.send("in", Message::new(1)).await.unwrap();
    wait_until(&started, 1).await;
    match bus.stop().await.unwrap_err() {
        RuntimeError::GraceExceeded { stuck, .. } => assert_eq!(stuck, vec!["napper".to_string()]),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!bus.is_running());
    assert_eq!(finished.load(Ordering::SeqCst), 0);
}
