use std::sync::Arc;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use crate::server::model::feed::ChangeEvent;
use crate::server::model::BillId;
use crate::server::presence::backoff::Backoff;
use crate::server::presence::routing::{self, RecentChanges, Route};
use crate::server::presence::transport::{ChangeFeedTransport, FeedChannel, TransportError};

const RECENT_WINDOW: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
}

/// Callbacks of one bill subscription. Every method defaults to doing nothing.
pub(crate) trait FeedHandler: Send + 'static {
    /// a PAID claim appeared, changed or went away
    fn on_selection_change(&mut self, _event: &ChangeEvent) {}
    /// a SELECTING claim appeared, changed or went away
    fn on_active_selection_change(&mut self, _event: &ChangeEvent) {}
    fn on_item_change(&mut self, _event: &ChangeEvent) {}
    fn on_connection_status_change(&mut self, _status: ConnectionStatus) {}
    fn on_error(&mut self, _error: &TransportError) {}
    /// fired after every successful (re)connect; state must be re-read from the store
    fn on_initial_fetch(&mut self) {}
}

/// Handler callbacks as values, for consumers that prefer a channel.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BridgeEvent {
    Selection(ChangeEvent),
    ActiveSelection(ChangeEvent),
    Item(ChangeEvent),
    Status(ConnectionStatus),
    Error(TransportError),
    InitialFetch,
}

impl FeedHandler for mpsc::UnboundedSender<BridgeEvent> {
    fn on_selection_change(&mut self, event: &ChangeEvent) {
        let _ = self.send(BridgeEvent::Selection(event.clone()));
    }

    fn on_active_selection_change(&mut self, event: &ChangeEvent) {
        let _ = self.send(BridgeEvent::ActiveSelection(event.clone()));
    }

    fn on_item_change(&mut self, event: &ChangeEvent) {
        let _ = self.send(BridgeEvent::Item(event.clone()));
    }

    fn on_connection_status_change(&mut self, status: ConnectionStatus) {
        let _ = self.send(BridgeEvent::Status(status));
    }

    fn on_error(&mut self, error: &TransportError) {
        let _ = self.send(BridgeEvent::Error(error.clone()));
    }

    fn on_initial_fetch(&mut self) {
        let _ = self.send(BridgeEvent::InitialFetch);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Reconnect,
    Visible,
    Close,
}

/// Hands out bill subscriptions over one shared transport.
pub(crate) struct PresenceBridge<T> {
    transport: Arc<T>,
}

impl<T> Clone for PresenceBridge<T> {
    fn clone(&self) -> Self {
        Self { transport: self.transport.clone() }
    }
}

impl<T: ChangeFeedTransport> PresenceBridge<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    /// Start following a bill. The subscription connects in the background and keeps
    /// reconnecting until it is closed or dropped.
    pub fn subscribe<H: FeedHandler>(&self, bill_id: BillId, handler: H) -> Subscription {
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let worker = Worker {
            bill_id,
            transport: self.transport.clone(),
            handler,
            status: status_tx,
            control: control_rx,
            backoff: Backoff::new(),
            recent: RecentChanges::new(RECENT_WINDOW),
            restart_pending: false,
        };
        let task = tokio::spawn(worker.run());
        Subscription {
            bill_id,
            status: status_rx,
            control: control_tx,
            task,
        }
    }
}

/// Live subscription to one bill. Dropping it closes the underlying channel.
pub(crate) struct Subscription {
    bill_id: BillId,
    status: watch::Receiver<ConnectionStatus>,
    control: mpsc::UnboundedSender<Control>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn bill_id(&self) -> BillId {
        self.bill_id
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_status() == ConnectionStatus::Connected
    }

    /// Tear down and reopen now, starting the backoff over.
    pub fn reconnect(&self) {
        let _ = self.control.send(Control::Reconnect);
    }

    /// The viewer came back to the foreground. A channel that looks connected may have
    /// died silently meanwhile, so it is reopened.
    pub fn notify_visible(&self) {
        let _ = self.control.send(Control::Visible);
    }

    pub async fn close(mut self) {
        let _ = self.control.send(Control::Close);
        if let Err(e) = (&mut self.task).await {
            warn!("subscription of bill={} ended abnormally, {}", self.bill_id, e);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.control.send(Control::Close);
    }
}

enum Ended {
    Lost,
    Restart,
    Close,
}

struct Worker<T, H> {
    bill_id: BillId,
    transport: Arc<T>,
    handler: H,
    status: watch::Sender<ConnectionStatus>,
    control: mpsc::UnboundedReceiver<Control>,
    backoff: Backoff,
    recent: RecentChanges,
    /// reconnect or visibility signal received while a subscribe was in flight
    restart_pending: bool,
}

impl<T: ChangeFeedTransport, H: FeedHandler> Worker<T, H> {
    async fn run(mut self) {
        // first attempt, and forced reconnects, go out without delay
        let mut wait = false;
        let mut first = true;
        loop {
            if !first {
                self.set_status(ConnectionStatus::Reconnecting);
                if wait && !self.sleep_backoff().await {
                    break;
                }
            }
            first = false;

            self.set_status(ConnectionStatus::Connecting);
            let Some(opened) = self.open().await else {
                break;
            };
            let restart = std::mem::take(&mut self.restart_pending);
            let channel = match opened {
                Ok(channel) => channel,
                Err(e) => {
                    warn!("bill={} failed to subscribe to changes, {}", self.bill_id, e);
                    self.handler.on_error(&e);
                    self.set_status(ConnectionStatus::Disconnected);
                    if restart {
                        self.backoff.reset();
                    }
                    wait = !restart;
                    continue;
                }
            };
            if restart {
                debug!("bill={} restarting the subscribe it just opened", self.bill_id);
                drop(channel);
                self.set_status(ConnectionStatus::Disconnected);
                self.backoff.reset();
                wait = false;
                continue;
            }

            self.backoff.reset();
            self.set_status(ConnectionStatus::Connected);
            self.handler.on_initial_fetch();

            let ended = self.pump(channel).await;
            self.set_status(ConnectionStatus::Disconnected);
            match ended {
                Ended::Lost => wait = true,
                Ended::Restart => {
                    self.backoff.reset();
                    wait = false;
                }
                Ended::Close => break,
            }
        }
        debug!("bill={} subscription stopped", self.bill_id);
    }

    /// Open a channel. Reconnect and visibility signals arriving meanwhile are folded into
    /// one restart taken once this open finishes, so only one subscribe is ever in flight.
    /// `None` means the subscription was closed.
    async fn open(&mut self) -> Option<Result<FeedChannel, TransportError>> {
        let transport = self.transport.clone();
        let open = transport.open(self.bill_id);
        tokio::pin!(open);
        loop {
            tokio::select! {
                opened = &mut open => return Some(opened),
                control = self.control.recv() => match control {
                    None | Some(Control::Close) => return None,
                    Some(other) => {
                        debug!("bill={} deferring {:?}, subscribe in progress", self.bill_id, other);
                        self.restart_pending = true;
                    }
                },
            }
        }
    }

    /// Wait out the next backoff delay. A manual reconnect cuts it short and restarts the
    /// backoff. Returns false when the subscription was closed.
    async fn sleep_backoff(&mut self) -> bool {
        let delay = self.backoff.next_delay();
        debug!("bill={} reconnecting in {:?} (attempt {})", self.bill_id, delay, self.backoff.attempt());
        let sleep = time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                control = self.control.recv() => match control {
                    None | Some(Control::Close) => return false,
                    Some(Control::Reconnect) => {
                        self.backoff.reset();
                        return true;
                    }
                    Some(Control::Visible) => {}
                },
            }
        }
    }

    async fn pump(&mut self, mut channel: FeedChannel) -> Ended {
        loop {
            tokio::select! {
                message = channel.recv() => match message {
                    Some(Ok(payload)) => self.dispatch(payload),
                    Some(Err(e @ TransportError::Lagged(_))) => {
                        self.handler.on_error(&e);
                        self.handler.on_initial_fetch();
                    }
                    Some(Err(e)) => {
                        info!("bill={} change channel lost, {}", self.bill_id, e);
                        self.handler.on_error(&e);
                        return Ended::Lost;
                    }
                    None => {
                        info!("bill={} change channel closed", self.bill_id);
                        return Ended::Lost;
                    }
                },
                control = self.control.recv() => match control {
                    None | Some(Control::Close) => return Ended::Close,
                    Some(Control::Reconnect | Control::Visible) => return Ended::Restart,
                },
            }
        }
    }

    fn dispatch(&mut self, payload: Value) {
        let event = match routing::decode(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("bill={} dropping malformed change event, {}", self.bill_id, e);
                return;
            }
        };
        if event.bill_id != self.bill_id {
            return;
        }
        if !self.recent.first_sighting(&event) {
            debug!("bill={} dropping replayed change event", self.bill_id);
            return;
        }
        match routing::route(&event) {
            Route::Finalized => self.handler.on_selection_change(&event),
            Route::LiveSelecting => self.handler.on_active_selection_change(&event),
            Route::Item => self.handler.on_item_change(&event),
            Route::Unroutable => warn!("bill={} dropping unroutable change event {:?}", self.bill_id, event),
        }
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        self.status.send_replace(status);
        self.handler.on_connection_status_change(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use serde_json::json;
    use tokio::sync::{broadcast, Notify};
    use tokio::time::Instant;
    use uuid::Uuid;
    use crate::server::presence::transport::MemoryChangeFeed;

    /// Fails a set number of opens, then hands out channels the test can feed.
    #[derive(Default)]
    struct Scripted {
        failures: Mutex<u32>,
        opens: Mutex<Vec<Instant>>,
        senders: Mutex<Vec<mpsc::Sender<Result<Value, TransportError>>>>,
        hold_first: AtomicBool,
        gate: Notify,
    }

    impl Scripted {
        fn failing(failures: u32) -> Self {
            Self { failures: Mutex::new(failures), ..Default::default() }
        }

        fn opens(&self) -> Vec<Instant> {
            self.opens.lock().unwrap().clone()
        }

        fn gaps(&self) -> Vec<u128> {
            self.opens().windows(2).map(|w| (w[1] - w[0]).as_millis()).collect()
        }

        fn last_sender(&self) -> mpsc::Sender<Result<Value, TransportError>> {
            self.senders.lock().unwrap().last().cloned().unwrap()
        }
    }

    impl ChangeFeedTransport for Scripted {
        async fn open(&self, _bill_id: BillId) -> Result<FeedChannel, TransportError> {
            self.opens.lock().unwrap().push(Instant::now());
            if self.hold_first.swap(false, Ordering::SeqCst) {
                self.gate.notified().await;
            }
            {
                let mut failures = self.failures.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(TransportError::Connect("scripted".to_string()));
                }
            }
            let (tx, rx) = mpsc::channel(8);
            self.senders.lock().unwrap().push(tx);
            Ok(rx)
        }
    }

    async fn next_matching(rx: &mut mpsc::UnboundedReceiver<BridgeEvent>, wanted: fn(&BridgeEvent) -> bool) -> Vec<BridgeEvent> {
        let mut seen = Vec::new();
        loop {
            let event = rx.recv().await.expect("bridge stopped");
            let done = wanted(&event);
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    fn is_fetch(event: &BridgeEvent) -> bool {
        matches!(event, BridgeEvent::InitialFetch)
    }

    fn is_error(event: &BridgeEvent) -> bool {
        matches!(event, BridgeEvent::Error(_))
    }

    fn claim_change(bill_id: BillId, op: &str, old: Option<&str>, new: Option<&str>) -> Value {
        let row = |status: &str| json!({ "id": Uuid::nil().to_string(), "status": status });
        json!({
            "table": "claims",
            "op": op,
            "bill_id": bill_id.to_string(),
            "old": old.map(row),
            "new": new.map(row),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn failed_opens_back_off_exponentially() {
        let transport = Arc::new(Scripted::failing(3));
        let bridge = PresenceBridge::new(transport.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = bridge.subscribe(Uuid::new_v4(), tx);

        let seen = next_matching(&mut rx, is_fetch).await;
        assert_eq!(transport.gaps(), vec![1000, 2000, 4000]);
        assert!(sub.is_connected());
        assert_eq!(seen.iter().filter(|e| is_error(e)).count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn status_walks_through_lifecycle() {
        let transport = Arc::new(Scripted::failing(1));
        let bridge = PresenceBridge::new(transport.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = bridge.subscribe(Uuid::new_v4(), tx);

        let statuses = next_matching(&mut rx, is_fetch)
            .await
            .into_iter()
            .filter_map(|e| match e {
                BridgeEvent::Status(status) => Some(status),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(
            statuses,
            vec![
                ConnectionStatus::Connecting,
                ConnectionStatus::Disconnected,
                ConnectionStatus::Reconnecting,
                ConnectionStatus::Connecting,
                ConnectionStatus::Connected,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn manual_reconnect_resets_backoff() {
        let transport = Arc::new(Scripted::failing(u32::MAX));
        let bridge = PresenceBridge::new(transport.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = bridge.subscribe(Uuid::new_v4(), tx);

        for _ in 0..3 {
            next_matching(&mut rx, is_error).await;
        }
        sub.reconnect();
        for _ in 0..2 {
            next_matching(&mut rx, is_error).await;
        }
        assert_eq!(transport.gaps(), vec![1000, 2000, 0, 1000]);
        sub.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn every_reconnect_refetches() {
        let transport = Arc::new(Scripted::default());
        let bridge = PresenceBridge::new(transport.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = bridge.subscribe(Uuid::new_v4(), tx);
        next_matching(&mut rx, is_fetch).await;

        // transport drops the channel
        transport.senders.lock().unwrap().clear();
        next_matching(&mut rx, is_fetch).await;
        assert_eq!(transport.gaps(), vec![1000]);

        // foregrounding while connected reopens right away
        sub.notify_visible();
        next_matching(&mut rx, is_fetch).await;
        assert_eq!(transport.gaps(), vec![1000, 0]);
        assert_eq!(transport.opens().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn requests_during_subscribe_restart_once() {
        let transport = Arc::new(Scripted::default());
        transport.hold_first.store(true, Ordering::SeqCst);
        let bridge = PresenceBridge::new(transport.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = bridge.subscribe(Uuid::new_v4(), tx);

        while transport.opens().is_empty() {
            tokio::task::yield_now().await;
        }
        sub.reconnect();
        sub.notify_visible();
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(sub.connection_status(), ConnectionStatus::Connecting);
        transport.gate.notify_one();

        let seen = next_matching(&mut rx, is_fetch).await;
        let fetches = seen.iter().filter(|e| is_fetch(e)).count();
        assert_eq!(fetches, 1);
        time::sleep(Duration::from_secs(60)).await;
        // both signals fold into a single immediate restart
        let gaps = transport.gaps();
        assert_eq!(gaps, vec![0]);
        assert!(sub.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn paid_transition_fires_paid_handler_once() {
        let transport = Arc::new(Scripted::default());
        let bridge = PresenceBridge::new(transport.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let bill_id = Uuid::new_v4();
        let _sub = bridge.subscribe(bill_id, tx);
        next_matching(&mut rx, is_fetch).await;

        let feed = transport.last_sender();
        let paid = claim_change(bill_id, "UPDATE", Some("SELECTING"), Some("PAID"));
        feed.send(Ok(paid.clone())).await.unwrap();
        feed.send(Ok(paid)).await.unwrap();
        feed.send(Ok(json!({ "table": "claims", "op": "UPSERT" }))).await.unwrap();
        feed.send(Ok(claim_change(bill_id, "INSERT", None, Some("SELECTING")))).await.unwrap();

        let seen = next_matching(&mut rx, |e| matches!(e, BridgeEvent::ActiveSelection(_))).await;
        let finalized = seen.iter().filter(|e| matches!(e, BridgeEvent::Selection(_))).count();
        assert_eq!(finalized, 1);
        assert_eq!(seen.len(), 2);
    }

    #[tokio::test]
    async fn follows_memory_feed() {
        let (changes, _) = broadcast::channel(16);
        let bridge = PresenceBridge::new(Arc::new(MemoryChangeFeed::new(changes.clone())));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let bill_id = Uuid::new_v4();
        let sub = bridge.subscribe(bill_id, tx);
        next_matching(&mut rx, is_fetch).await;

        changes.send(claim_change(Uuid::new_v4(), "INSERT", None, Some("PAID"))).unwrap();
        changes.send(json!({ "table": "line_items", "op": "DELETE", "bill_id": bill_id.to_string(), "old": { "id": "x" } })).unwrap();
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, BridgeEvent::Item(e) if e.bill_id == bill_id));

        sub.close().await;
        assert!(matches!(rx.recv().await, Some(BridgeEvent::Status(ConnectionStatus::Disconnected))));
        assert!(rx.recv().await.is_none());
    }
}
