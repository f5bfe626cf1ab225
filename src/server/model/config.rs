use std::net::SocketAddrV4;
use std::str::FromStr;
use std::time::Duration;
use derive_more::Display;

/// Server configs
#[derive(Debug, Clone)]
pub(crate) struct ServerConfig {
    pub addr: SocketAddrV4,
    pub backend: LedgerBackend,
    pub db_read_conn_str: String,
    pub db_write_conn_str: String,
    pub change_feed_conn_str: String,
    pub pool_size: usize,
    pub sweep_interval: Duration,
    pub policy: ClaimPolicy,
}

impl ServerConfig {
    pub fn new(addr: SocketAddrV4, db_read_conn_str: String, db_write_conn_str: String) -> Self {
        Self {
            addr,
            backend: LedgerBackend::Postgres,
            change_feed_conn_str: db_write_conn_str.clone(),
            db_read_conn_str,
            db_write_conn_str,
            pool_size: 10,
            sweep_interval: Duration::from_secs(60),
            policy: ClaimPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub(crate) enum LedgerBackend {
    #[display("postgres")]
    Postgres,
    #[display("memory")]
    Memory,
}

impl FromStr for LedgerBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgres" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            s => Err(format!("Invalid LedgerBackend: {s}")),
        }
    }
}

/// Whether payers may edit or delete items that guests already claimed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum ItemEditPolicy {
    /// edits always go through; claims on a deleted item count for nothing
    #[default]
    Permissive,
    /// edits of an item referenced by a PAID or live claim fail with a conflict
    Strict,
}

impl FromStr for ItemEditPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "permissive" => Ok(Self::Permissive),
            "strict" => Ok(Self::Strict),
            s => Err(format!("Invalid ItemEditPolicy: {s}")),
        }
    }
}

/// Which claim statuses the payer may toggle the received flag on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum ReceiptGate {
    #[default]
    Selecting,
    Any,
}

impl FromStr for ReceiptGate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "selecting" => Ok(Self::Selecting),
            "any" => Ok(Self::Any),
            s => Err(format!("Invalid ReceiptGate: {s}")),
        }
    }
}

/// Knobs of the claim lifecycle shared by every service.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ClaimPolicy {
    /// expiry applied by an item quantity write
    pub item_ttl: Duration,
    /// expiry applied by a tip write
    pub tip_ttl: Duration,
    pub edit_policy: ItemEditPolicy,
    pub receipt_gate: ReceiptGate,
}

impl Default for ClaimPolicy {
    fn default() -> Self {
        Self {
            item_ttl: Duration::from_secs(30 * 60),
            tip_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            edit_policy: ItemEditPolicy::default(),
            receipt_gate: ReceiptGate::default(),
        }
    }
}
