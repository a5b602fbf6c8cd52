//! Poll loop: query, observe, then hand the events to storage and notification.
//!
//! The loop itself only waits on the query deadline. Session writes and
//! notification delivery run on a separate [`Dispatcher`] task, each call
//! bounded by [`DELIVERY_TIMEOUT`], so a stalled database or Redis never
//! delays the next observation.

use crate::error::AppResult;
use crate::models::event::EventBatch;
use crate::models::presence::PresenceState;
use crate::services::notifier::clear_color_tags;
use crate::services::presence::PresenceTracker;
use crate::services::query::QueryClient;
use crate::services::store::{record_event, EventSink, SessionStore};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tracing::{info, instrument, warn};

/// Request id of scheduled polls.
pub const POLL_REQUEST_ID: u32 = 1;
/// Request id of user-triggered status checks.
pub const ON_DEMAND_REQUEST_ID: u32 = 2;
/// Request id of the startup query.
pub const BOOTSTRAP_REQUEST_ID: u32 = 3;

/// Deadline of one store or notification call.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);
/// Batches waiting for the dispatcher before new ones are dropped.
const DISPATCH_QUEUE: usize = 64;

/// Unix seconds now.
pub fn now_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Awaits a collaborator call for at most `limit`; failures are logged and become `None`.
async fn bounded<T>(
    limit: Duration,
    what: &'static str,
    call: impl Future<Output = AppResult<T>>,
) -> Option<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            warn!(error = %e, "{} failed", what);
            None
        }
        Err(_) => {
            warn!(timeout_ms = limit.as_millis() as u64, "{} timed out", what);
            None
        }
    }
}

/// Drives the tracker. Owns it exclusively, so the tracker has a single writer.
pub struct Poller {
    client: QueryClient,
    tracker: PresenceTracker,
    store: Arc<dyn SessionStore>,
    outbox: mpsc::Sender<EventBatch>,
    interval: Duration,
    server_name: String,
}

impl Poller {
    /// Builds the poller and the dispatcher that consumes its batches. The
    /// dispatcher must be spawned; it stops once the poller is dropped and
    /// its queue is drained.
    pub fn new(
        client: QueryClient,
        store: Arc<dyn SessionStore>,
        sink: Arc<dyn EventSink>,
        interval: Duration,
    ) -> (Self, Dispatcher) {
        let (outbox, inbox) = mpsc::channel(DISPATCH_QUEUE);
        let dispatcher = Dispatcher {
            store: Arc::clone(&store),
            sink,
            inbox,
            timeout: DELIVERY_TIMEOUT,
        };
        let poller = Self {
            client,
            tracker: PresenceTracker::new(),
            store,
            outbox,
            interval,
            server_name: String::new(),
        };
        (poller, dispatcher)
    }

    pub fn tracker(&self) -> &PresenceTracker {
        &self.tracker
    }

    /// Seeds the tracker before the first cycle. When the server answers, the
    /// sessions still open in storage are taken as the current roster so a
    /// restart neither re-announces the server nor re-opens sessions.
    #[instrument(skip(self))]
    pub async fn bootstrap(&mut self) {
        let Some(snapshot) = self.client.query(BOOTSTRAP_REQUEST_ID).await else {
            info!("server unreachable at startup");
            return;
        };
        self.server_name = clear_color_tags(&snapshot.hostname);

        let open_players = bounded(
            DELIVERY_TIMEOUT,
            "loading open sessions",
            self.store.last_known_open_players(),
        )
        .await
        .unwrap_or_default();
        let up_since = bounded(
            DELIVERY_TIMEOUT,
            "loading last server session",
            self.store.last_server_up(),
        )
        .await
        .flatten();
        info!(
            server = %self.server_name,
            players = open_players.len(),
            "server up at startup, restored open sessions"
        );
        self.tracker = PresenceTracker::with_state(PresenceState::up(open_players, up_since));
    }

    /// One query + observe cycle at `now`. Returns the batch handed to the dispatcher, if any.
    pub async fn poll_once(&mut self, now: i64) -> Option<EventBatch> {
        let latest = self.client.query(POLL_REQUEST_ID).await;
        if let Some(snapshot) = &latest {
            self.server_name = clear_color_tags(&snapshot.hostname);
        }

        let events = self.tracker.observe(now, latest.as_ref());
        if events.is_empty() {
            return None;
        }

        let batch = EventBatch {
            time: now,
            server_name: self.server_name.clone(),
            events,
            players: self.tracker.online_players(),
        };
        info!(server = %batch.server_name, events = batch.events.len(), "presence changed");
        match self.outbox.try_send(batch.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!(time = now, "dispatch queue full, batch dropped"),
            Err(TrySendError::Closed(_)) => warn!(time = now, "dispatcher stopped, batch dropped"),
        }
        Some(batch)
    }

    /// Polls every `interval` until `shutdown` turns true. The cycle in flight finishes first.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = self.interval.as_millis() as u64, "poll loop started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            self.poll_once(now_seconds()).await;
        }
        info!("poll loop stopped");
    }
}

/// Applies batches to the [`SessionStore`] in order, then publishes them to the [`EventSink`].
pub struct Dispatcher {
    store: Arc<dyn SessionStore>,
    sink: Arc<dyn EventSink>,
    inbox: mpsc::Receiver<EventBatch>,
    timeout: Duration,
}

impl Dispatcher {
    /// Overrides [`DELIVERY_TIMEOUT`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn run(mut self) {
        while let Some(batch) = self.inbox.recv().await {
            self.dispatch(batch).await;
        }
        info!("dispatcher stopped");
    }

    async fn dispatch(&self, batch: EventBatch) {
        for event in &batch.events {
            let write = record_event(self.store.as_ref(), batch.time, event);
            if bounded(self.timeout, "session write", write).await.is_none() {
                warn!(?event, "event not recorded");
            }
        }

        // A panicking sink only loses its own batch.
        let sink = Arc::clone(&self.sink);
        let limit = self.timeout;
        let delivery =
            tokio::spawn(async move { bounded(limit, "notification", sink.publish(&batch)).await });
        if let Err(e) = delivery.await {
            warn!(error = %e, "notification delivery aborted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::DomainEvent;
    use crate::models::snapshot::Snapshot;
    use crate::protocol::codec::{
        decode_handshake_request, decode_status_request, encode_handshake_response,
        encode_status_response,
    };
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Instant;
    use tokio::net::UdpSocket;
    use tokio::task::JoinHandle;

    #[derive(Default)]
    struct MemoryStore {
        calls: Mutex<Vec<String>>,
        open: HashMap<String, i64>,
        last_up: Option<i64>,
        stalled: bool,
    }

    impl MemoryStore {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        async fn record(&self, call: String) -> AppResult<()> {
            if self.stalled {
                std::future::pending::<()>().await;
            }
            self.calls.lock().unwrap().push(call);
            Ok(())
        }
    }

    #[async_trait]
    impl SessionStore for MemoryStore {
        async fn open_player_session(&self, name: &str, time: i64) -> AppResult<()> {
            self.record(format!("open {} {}", name, time)).await
        }
        async fn close_player_session(&self, name: &str, time: i64) -> AppResult<()> {
            self.record(format!("close {} {}", name, time)).await
        }
        async fn open_server_session(&self, time: i64) -> AppResult<()> {
            self.record(format!("server up {}", time)).await
        }
        async fn close_server_session(&self, time: i64) -> AppResult<()> {
            self.record(format!("server down {}", time)).await
        }
        async fn last_known_open_players(&self) -> AppResult<HashMap<String, i64>> {
            Ok(self.open.clone())
        }
        async fn last_server_up(&self) -> AppResult<Option<i64>> {
            Ok(self.last_up)
        }
    }

    #[derive(Default)]
    struct MemorySink {
        batches: Mutex<Vec<EventBatch>>,
    }

    impl MemorySink {
        fn batches(&self) -> Vec<EventBatch> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventSink for MemorySink {
        async fn publish(&self, batch: &EventBatch) -> AppResult<()> {
            self.batches.lock().unwrap().push(batch.clone());
            Ok(())
        }
    }

    /// Hangs on the first batch and panics on the second; records the rest.
    #[derive(Default)]
    struct FlakySink {
        seen: Mutex<usize>,
        delivered: MemorySink,
    }

    #[async_trait]
    impl EventSink for FlakySink {
        async fn publish(&self, batch: &EventBatch) -> AppResult<()> {
            let nth = {
                let mut seen = self.seen.lock().unwrap();
                *seen += 1;
                *seen
            };
            match nth {
                1 => std::future::pending().await,
                2 => panic!("sink connection driver died"),
                _ => self.delivered.publish(batch).await,
            }
        }
    }

    type Roster = Arc<Mutex<Option<Vec<String>>>>;

    fn roster(players: &[&str]) -> Roster {
        Arc::new(Mutex::new(Some(
            players.iter().map(|p| p.to_string()).collect(),
        )))
    }

    /// Answers every exchange with the roster currently in `roster`; silent while it is `None`.
    async fn fake_server(roster: Roster) -> u16 {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            loop {
                let Ok((n, peer)) = socket.recv_from(&mut buf).await else {
                    return;
                };
                let Some(players) = roster.lock().unwrap().clone() else {
                    continue;
                };
                let reply = if let Ok(id) = decode_handshake_request(&buf[..n]) {
                    encode_handshake_response(id, "42")
                } else if let Ok((id, 42)) = decode_status_request(&buf[..n]) {
                    let mut snap = Snapshot::with_players(players);
                    snap.hostname = "§aApple".to_string();
                    encode_status_response(id, &snap)
                } else {
                    continue;
                };
                let _ = socket.send_to(&reply, peer).await;
            }
        });
        port
    }

    fn spawn_poller(
        port: u16,
        store: Arc<dyn SessionStore>,
        sink: Arc<dyn EventSink>,
        delivery_timeout: Duration,
    ) -> (Poller, JoinHandle<()>) {
        let client = QueryClient::new("127.0.0.1", port, Duration::from_millis(500));
        let (poller, dispatcher) = Poller::new(client, store, sink, Duration::from_millis(10));
        let dispatch = tokio::spawn(dispatcher.with_timeout(delivery_timeout).run());
        (poller, dispatch)
    }

    fn poller(port: u16, store: Arc<MemoryStore>, sink: Arc<MemorySink>) -> (Poller, JoinHandle<()>) {
        spawn_poller(port, store, sink, DELIVERY_TIMEOUT)
    }

    /// Drops the poller and waits until the dispatcher has applied every batch.
    async fn drain(poller: Poller, dispatch: JoinHandle<()>) {
        drop(poller);
        tokio::time::timeout(Duration::from_secs(5), dispatch)
            .await
            .expect("dispatcher did not drain")
            .unwrap();
    }

    async fn dead_port() -> u16 {
        // bound but never answered
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _keep = socket;
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        port
    }

    fn left(name: &str, online_seconds: i64) -> DomainEvent {
        DomainEvent::PlayerLeft {
            name: name.to_string(),
            online_seconds,
        }
    }

    #[tokio::test]
    async fn poll_cycle_records_and_publishes() {
        let roster = roster(&["alice"]);
        let port = fake_server(roster.clone()).await;
        let store = Arc::new(MemoryStore::default());
        let sink = Arc::new(MemorySink::default());
        let (mut poller, dispatch) = poller(port, store.clone(), sink.clone());

        let batch = poller.poll_once(100).await.unwrap();
        assert_eq!(batch.server_name, "Apple");
        assert_eq!(batch.players, vec!["alice"]);
        assert_eq!(
            batch.events,
            vec![
                DomainEvent::ServerCameUp,
                DomainEvent::PlayerJoined {
                    name: "alice".to_string()
                }
            ]
        );

        assert!(poller.poll_once(105).await.is_none());

        *roster.lock().unwrap() = Some(Vec::new());
        poller.poll_once(160).await.unwrap();
        drain(poller, dispatch).await;

        assert_eq!(
            store.calls(),
            vec!["server up 100", "open alice 100", "close alice 160"]
        );
        assert_eq!(sink.batches().len(), 2);
    }

    #[tokio::test]
    async fn server_going_down_closes_every_session() {
        let roster = roster(&["bob", "alice"]);
        let port = fake_server(roster.clone()).await;
        let store = Arc::new(MemoryStore::default());
        let sink = Arc::new(MemorySink::default());
        let (mut poller, dispatch) = poller(port, store.clone(), sink.clone());

        poller.poll_once(100).await.unwrap();
        *roster.lock().unwrap() = None;
        let batch = poller.poll_once(250).await.unwrap();
        assert_eq!(
            batch.events,
            vec![
                DomainEvent::ServerWentDown {
                    preceding_uptime_seconds: Some(150)
                },
                left("alice", 150),
                left("bob", 150),
            ]
        );
        assert!(batch.players.is_empty());
        drain(poller, dispatch).await;

        assert_eq!(
            store.calls(),
            vec![
                "server up 100",
                "open alice 100",
                "open bob 100",
                "server down 250",
                "close alice 250",
                "close bob 250",
            ]
        );
        let batches = sink.batches();
        assert_eq!(batches.len(), 2);
        assert!(batches[1].players.is_empty());
    }

    #[tokio::test]
    async fn stalled_store_does_not_delay_polling() {
        let port = fake_server(roster(&["alice"])).await;
        let store = Arc::new(MemoryStore {
            stalled: true,
            ..Default::default()
        });
        let sink = Arc::new(MemorySink::default());
        let (mut poller, dispatch) =
            spawn_poller(port, store.clone(), sink.clone(), Duration::from_millis(50));

        let started = Instant::now();
        poller.poll_once(100).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(400));
        assert!(poller.tracker().state().server_up);

        drain(poller, dispatch).await;
        assert!(store.calls().is_empty());
        assert_eq!(sink.batches().len(), 1);
    }

    #[tokio::test]
    async fn hanging_or_panicking_sink_loses_only_its_batch() {
        let roster = roster(&["alice"]);
        let port = fake_server(roster.clone()).await;
        let store = Arc::new(MemoryStore::default());
        let sink = Arc::new(FlakySink::default());
        let (mut poller, dispatch) =
            spawn_poller(port, store.clone(), sink.clone(), Duration::from_millis(50));

        poller.poll_once(100).await.unwrap();
        *roster.lock().unwrap() = Some(Vec::new());
        poller.poll_once(110).await.unwrap();
        *roster.lock().unwrap() = Some(vec!["bob".to_string()]);
        poller.poll_once(120).await.unwrap();
        drain(poller, dispatch).await;

        assert_eq!(
            store.calls(),
            vec![
                "server up 100",
                "open alice 100",
                "close alice 110",
                "open bob 120",
            ]
        );
        let delivered = sink.delivered.batches();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].players, vec!["bob"]);
    }

    #[tokio::test]
    async fn unreachable_server_produces_nothing() {
        let port = dead_port().await;
        let store = Arc::new(MemoryStore::default());
        let sink = Arc::new(MemorySink::default());
        let (mut poller, dispatch) = poller(port, store.clone(), sink.clone());

        assert!(poller.poll_once(1).await.is_none());
        assert!(!poller.tracker().state().server_up);
        drain(poller, dispatch).await;
        assert!(store.calls().is_empty());
        assert!(sink.batches().is_empty());
    }

    #[tokio::test]
    async fn bootstrap_restores_open_sessions() {
        let port = fake_server(roster(&["alice", "bob"])).await;
        let store = Arc::new(MemoryStore {
            open: HashMap::from([("alice".to_string(), 20)]),
            last_up: Some(10),
            ..Default::default()
        });
        let sink = Arc::new(MemorySink::default());
        let (mut poller, dispatch) = poller(port, store.clone(), sink);

        poller.bootstrap().await;
        assert!(poller.tracker().state().server_up);

        let batch = poller.poll_once(50).await.unwrap();
        assert_eq!(
            batch.events,
            vec![DomainEvent::PlayerJoined {
                name: "bob".to_string()
            }]
        );
        drain(poller, dispatch).await;
        assert_eq!(store.calls(), vec!["open bob 50"]);
    }

    #[tokio::test]
    async fn bootstrap_with_server_down_keeps_default_state() {
        let port = dead_port().await;
        let store = Arc::new(MemoryStore {
            open: HashMap::from([("alice".to_string(), 20)]),
            ..Default::default()
        });
        let (mut poller, _dispatch) = poller(port, store, Arc::new(MemorySink::default()));

        poller.bootstrap().await;
        assert_eq!(poller.tracker().state(), &PresenceState::default());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let port = dead_port().await;
        let (poller, dispatch) = poller(
            port,
            Arc::new(MemoryStore::default()),
            Arc::new(MemorySink::default()),
        );
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(poller.run(rx));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(3), handle)
            .await
            .expect("poll loop did not stop")
            .unwrap();
        // the poller is gone, so the dispatcher stops too
        tokio::time::timeout(Duration::from_secs(3), dispatch)
            .await
            .expect("dispatcher did not stop")
            .unwrap();
    }
}
