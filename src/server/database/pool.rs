use std::collections::VecDeque;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use anyhow::Error;
use log::{error, info, warn};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio::time;
use tokio_postgres::Client;
use crate::server::presence::backoff::Backoff;

pub(crate) const DB_TIMEOUT_SECONDS: u64 = 3;

/// Anything a pool can hand out.
pub(crate) trait PooledClient: Send + Sized + 'static {
    fn is_closed(&self) -> bool;

    /// Open a fresh client for `target`.
    fn open(target: &str) -> impl Future<Output = Result<Self, Error>> + Send;
}

impl PooledClient for Client {
    fn is_closed(&self) -> bool {
        Client::is_closed(self)
    }

    async fn open(target: &str) -> Result<Self, Error> {
        connect_util::connect(target).await
    }
}

pub(crate) struct CommonPool<C> {
    /// pool name
    name: String,
    /// what every client of this pool connects to
    target: String,
    /// connections in the pool, accessed in a FIFO manner
    connections: Mutex<VecDeque<C>>,
    available: Notify,
}

pub(crate) struct Pool<C: PooledClient>(Arc<CommonPool<C>>);

impl<C: PooledClient> Clone for Pool<C> {
    fn clone(&self) -> Pool<C> {
        Pool(self.0.clone())
    }
}

/// A checked-out client, returned to its pool on drop.
pub(crate) struct Connection<C: PooledClient> {
    client: Option<C>,
    pool: Pool<C>,
}

impl<C: PooledClient> Deref for Connection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.client.as_ref().expect("connection used after release")
    }
}

impl<C: PooledClient> DerefMut for Connection<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.client.as_mut().expect("connection used after release")
    }
}

impl<C: PooledClient> Drop for Connection<C> {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.pool.release(client);
        }
    }
}

pub(crate) mod connect_util {
    use anyhow::Context;
    use log::error;
    use tokio_postgres::{Client, NoTls};

    pub async fn connect(conn_str: &str) -> Result<Client, anyhow::Error> {
        let (client, conn) = tokio_postgres::connect(conn_str, NoTls)
            .await
            .context("failed to create connection")?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                error!("connection returned error and aborted, {}", e);
            }
        });
        Ok(client)
    }
}

impl<C: PooledClient> Pool<C> {
    /// Open `size` connections concurrently. Fails if none could be opened.
    pub async fn init(&self, size: usize) -> Result<(), Error> {
        let mut set = JoinSet::new();
        for _ in 0..size {
            let target = self.0.target.clone();
            set.spawn(async move { C::open(&target).await });
        }
        let mut opened = 0;
        while let Some(res) = set.join_next().await {
            match res {
                Ok(Ok(client)) => {
                    opened += 1;
                    self.add(client);
                }
                Ok(Err(e)) => error!("pool {} failed to open a connection, {:#}", self.0.name, e),
                Err(e) => error!("join_next failed when joining, {}", e),
            };
        }
        if opened == 0 {
            anyhow::bail!("pool {} could not open any connection", self.0.name);
        }
        info!("pool {} initialized with {}/{} connections", self.0.name, opened, size);
        Ok(())
    }
}

impl<C: PooledClient> Pool<C> {
    pub fn new(name: &str, target: &str) -> Self {
        Self(Arc::new(CommonPool {
            name: name.to_string(),
            target: target.to_string(),
            connections: Mutex::new(VecDeque::new()),
            available: Notify::new(),
        }))
    }

    pub fn add(&self, client: C) {
        self.connections().push_back(client);
        self.0.available.notify_one();
    }

    /// acquire a connection, bail out with `None` once the timeout passes.
    pub async fn acquire(&self, timeout: Duration) -> Option<Connection<C>> {
        let wait = async {
            loop {
                if let Some(client) = self.pop() {
                    return client;
                }
                self.0.available.notified().await;
            }
        };
        match time::timeout(timeout, wait).await {
            Ok(client) => Some(Connection { client: Some(client), pool: self.clone() }),
            Err(_) => {
                error!("pool {} timed out to acquire a connection after {:?}", self.0.name, timeout);
                None
            }
        }
    }

    pub fn release(&self, client: C) {
        if client.is_closed() {
            warn!("pool {} discarding a closed connection", self.0.name);
            self.replace_discarded();
            return;
        }
        self.add(client);
    }

    pub fn idle(&self) -> usize {
        self.connections().len()
    }

    fn pop(&self) -> Option<C> {
        let mut discarded = 0;
        let popped = {
            let mut connections = self.connections();
            loop {
                match connections.pop_front() {
                    Some(client) if client.is_closed() => {
                        warn!("pool {} discarding a closed connection", self.0.name);
                        discarded += 1;
                    }
                    other => break other,
                }
            }
        };
        for _ in 0..discarded {
            self.replace_discarded();
        }
        popped
    }

    /// Open a client in the background to take a discarded one's place, retrying with
    /// backoff until it succeeds or the pool is gone.
    fn replace_discarded(&self) {
        let Ok(runtime) = Handle::try_current() else {
            error!("pool {} cannot replace a connection outside a runtime", self.0.name);
            return;
        };
        let pool: Weak<CommonPool<C>> = Arc::downgrade(&self.0);
        runtime.spawn(async move {
            let mut backoff = Backoff::new();
            loop {
                let Some(target) = pool.upgrade().map(|p| p.target.clone()) else {
                    return;
                };
                match C::open(&target).await {
                    Ok(client) => {
                        if let Some(pool) = pool.upgrade() {
                            info!("pool {} replaced a discarded connection", pool.name);
                            Pool(pool).add(client);
                        }
                        return;
                    }
                    Err(e) => {
                        let delay = backoff.next_delay();
                        warn!("pool connection to reopen failed, retrying in {:?}, {:#}", delay, e);
                        time::sleep(delay).await;
                    }
                }
            }
        });
    }

    fn connections(&self) -> MutexGuard<'_, VecDeque<C>> {
        self.0.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
