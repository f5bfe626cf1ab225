//! main file for the server

pub(crate) mod controller;
pub(crate) mod database;
pub(crate) mod model;
pub(crate) mod presence;
pub(crate) mod scheduler;
pub(crate) mod service;
pub(crate) mod state;
pub(crate) mod util;

use std::io;
use std::sync::Arc;
use actix_web::{middleware::Logger, web, App, HttpServer};
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;
use crate::server::controller::configure;
use crate::server::database::memory::MemoryLedger;
use crate::server::database::pool::Pool;
use crate::server::database::postgres::PgLedger;
use crate::server::database::Ledger;
use crate::server::model::config::{LedgerBackend, ServerConfig};
use crate::server::presence::transport::{Feed, MemoryChangeFeed, PgChangeFeed};
use crate::server::scheduler::sweeper::expired_claim_sweeper;
use crate::server::state::AppState;

async fn open_backend(config: &ServerConfig) -> anyhow::Result<(Ledger, Feed)> {
    match config.backend {
        LedgerBackend::Memory => {
            let ledger = MemoryLedger::new();
            let feed = Feed::Memory(MemoryChangeFeed::new(ledger.changes()));
            Ok((Ledger::Memory(ledger), feed))
        }
        LedgerBackend::Postgres => {
            let read_pool = Pool::new("read", &config.db_read_conn_str);
            let write_pool = Pool::new("write", &config.db_write_conn_str);
            read_pool.init(config.pool_size).await?;
            write_pool.init(config.pool_size).await?;
            let feed = PgChangeFeed::new(&config.change_feed_conn_str);
            if let Err(e) = feed.connect().await {
                warn!("change feed not connected yet, retrying on first subscriber, {}", e);
            }
            Ok((Ledger::Postgres(PgLedger::new(read_pool, write_pool)), Feed::Postgres(feed)))
        }
    }
}

/// Run the server
pub async fn run(config: ServerConfig) -> io::Result<()> {
    let (ledger, feed) = open_backend(&config).await.map_err(|e| {
        error!("failed to open the {} ledger, {:#}", config.backend, e);
        io::Error::other(e.to_string())
    })?;
    let (ledger, feed) = (Arc::new(ledger), Arc::new(feed));

    let cancel_token = CancellationToken::new();
    let sweeper = tokio::spawn(expired_claim_sweeper(ledger.clone(), config.sweep_interval, cancel_token.clone()));

    let state = AppState::new(ledger, feed.clone(), config.policy);
    info!("serving on {} with the {} ledger", config.addr, config.backend);
    let served = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(Logger::default())
            .configure(configure)
    })
        .bind(config.addr)?
        .run()
        .await;

    cancel_token.cancel();
    if let Err(e) = sweeper.await {
        error!("sweeper ended abnormally, {}", e);
    }
    feed.close().await;
    info!("server stopped");
    served
}
