//! Sources of raw change payloads. A transport opens one channel per subscriber; the
//! channel ends (`None`) or yields `Err(Closed)` when the underlying feed goes away.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use derive_more::{Display, Error};
use futures_util::StreamExt;
use log::{error, info, warn};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_postgres::{AsyncMessage, Client, NoTls};
use uuid::Uuid;
use crate::server::model::feed::LEDGER_CHANGES_CHANNEL;
use crate::server::model::BillId;

const CHANNEL_DEPTH: usize = 64;
const LISTENER_BUFFER: usize = 256;

pub(crate) type FeedChannel = mpsc::Receiver<Result<Value, TransportError>>;

#[derive(Debug, Display, Error, Clone, PartialEq)]
pub(crate) enum TransportError {
    #[display("could not open change feed: {_0}")]
    Connect(#[error(not(source))] String),
    #[display("change feed closed")]
    Closed,
    #[display("change feed lagged, {_0} events skipped")]
    Lagged(#[error(not(source))] u64),
}

pub(crate) trait ChangeFeedTransport: Send + Sync + 'static {
    /// Open a channel carrying the change payloads of one bill.
    fn open(&self, bill_id: BillId) -> impl Future<Output = Result<FeedChannel, TransportError>> + Send;
}

fn concerns(payload: &Value, bill_id: BillId) -> bool {
    payload
        .get("bill_id")
        .and_then(Value::as_str)
        .and_then(|id| id.parse::<Uuid>().ok())
        == Some(bill_id)
}

/// Pump one bill's payloads from a broadcast source into a fresh channel. The pump stops
/// as soon as the receiving side is dropped.
fn forward(bill_id: BillId, mut source: broadcast::Receiver<Value>) -> FeedChannel {
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                _ = tx.closed() => return,
                received = source.recv() => received,
            };
            let outcome = match received {
                Ok(payload) if concerns(&payload, bill_id) => Ok(payload),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("change feed of bill={} lagged by {} events", bill_id, skipped);
                    Err(TransportError::Lagged(skipped))
                }
                Err(RecvError::Closed) => {
                    let _ = tx.send(Err(TransportError::Closed)).await;
                    return;
                }
            };
            if tx.send(outcome).await.is_err() {
                return;
            }
        }
    });
    rx
}

/// Feed over the in-process ledger's broadcast of changes.
pub(crate) struct MemoryChangeFeed {
    changes: broadcast::Sender<Value>,
}

impl MemoryChangeFeed {
    pub fn new(changes: broadcast::Sender<Value>) -> Self {
        Self { changes }
    }
}

impl ChangeFeedTransport for MemoryChangeFeed {
    async fn open(&self, bill_id: BillId) -> Result<FeedChannel, TransportError> {
        Ok(forward(bill_id, self.changes.subscribe()))
    }
}

struct Listener {
    client: Client,
    /// never read; handed out through `resubscribe`
    template: broadcast::Receiver<Value>,
    task: JoinHandle<()>,
}

impl Listener {
    fn is_alive(&self) -> bool {
        !self.client.is_closed() && !self.task.is_finished()
    }
}

/// Feed over Postgres LISTEN/NOTIFY. One dedicated connection is shared by every
/// subscriber; it is opened on `connect` or lazily on the first `open`, and reopened
/// when it dies.
pub(crate) struct PgChangeFeed {
    conn_str: String,
    listener: Mutex<Option<Listener>>,
    closed: AtomicBool,
}

impl PgChangeFeed {
    pub fn new(conn_str: &str) -> Self {
        Self {
            conn_str: conn_str.to_string(),
            listener: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Make sure a live LISTEN connection exists.
    pub async fn connect(&self) -> Result<(), TransportError> {
        self.subscribe().await.map(drop)
    }

    async fn subscribe(&self) -> Result<broadcast::Receiver<Value>, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Connect("feed is shut down".to_string()));
        }
        let mut listener = self.listener.lock().await;
        if let Some(current) = listener.as_ref() {
            if current.is_alive() {
                return Ok(current.template.resubscribe());
            }
            warn!("change feed listener died, reconnecting");
        }
        let fresh = self.listen().await?;
        let receiver = fresh.template.resubscribe();
        *listener = Some(fresh);
        Ok(receiver)
    }

    async fn listen(&self) -> Result<Listener, TransportError> {
        let (client, mut connection) = tokio_postgres::connect(&self.conn_str, NoTls)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (changes, template) = broadcast::channel(LISTENER_BUFFER);

        // the sender lives in the task only, so subscribers see `Closed` once it ends
        let task = tokio::spawn(async move {
            let mut messages = std::pin::pin!(futures_util::stream::poll_fn(move |cx| connection.poll_message(cx)));
            while let Some(message) = messages.next().await {
                match message {
                    Ok(AsyncMessage::Notification(note)) => match serde_json::from_str::<Value>(note.payload()) {
                        Ok(payload) => {
                            let _ = changes.send(payload);
                        }
                        Err(e) => warn!("undecodable notification on {}, {}", note.channel(), e),
                    },
                    Ok(AsyncMessage::Notice(notice)) => info!("change feed notice: {}", notice),
                    Ok(_) => {}
                    Err(e) => {
                        error!("change feed connection returned error and aborted, {}", e);
                        break;
                    }
                }
            }
            info!("change feed listener stopped");
        });

        if let Err(e) = client.batch_execute(&format!("LISTEN {}", LEDGER_CHANGES_CHANNEL)).await {
            task.abort();
            return Err(TransportError::Connect(e.to_string()));
        }
        info!("change feed listening on {}", LEDGER_CHANGES_CHANNEL);
        Ok(Listener { client, template, task })
    }

    /// Drop the LISTEN connection; later opens fail.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(listener) = self.listener.lock().await.take() {
            listener.task.abort();
            info!("change feed closed");
        }
    }
}

impl ChangeFeedTransport for PgChangeFeed {
    async fn open(&self, bill_id: BillId) -> Result<FeedChannel, TransportError> {
        Ok(forward(bill_id, self.subscribe().await?))
    }
}

pub(crate) enum Feed {
    Postgres(PgChangeFeed),
    Memory(MemoryChangeFeed),
}

impl Feed {
    pub async fn close(&self) {
        if let Feed::Postgres(feed) = self {
            feed.close().await;
        }
    }
}

impl ChangeFeedTransport for Feed {
    async fn open(&self, bill_id: BillId) -> Result<FeedChannel, TransportError> {
        match self {
            Feed::Postgres(feed) => feed.open(bill_id).await,
            Feed::Memory(feed) => feed.open(bill_id).await,
        }
    }
}
