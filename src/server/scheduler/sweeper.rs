use std::sync::Arc;
use std::time::Duration;
use log::{error, info};
use tokio::time::MissedTickBehavior;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use crate::server::database::LedgerStore;
use crate::server::util::time::helper;

const SWEEP_BATCH: i64 = 100;

/// Delete every SELECTING claim whose expiry has passed, a batch at a time.
pub(crate) async fn sweep_once<S: LedgerStore>(store: &S) -> usize {
    let mut swept = 0;
    loop {
        match store.delete_expired_claims(helper::get_utc_now(), SWEEP_BATCH).await {
            Ok(ids) => {
                swept += ids.len();
                if (ids.len() as i64) < SWEEP_BATCH {
                    break;
                }
            }
            Err(e) => {
                error!("failed to sweep expired claims, {}", e);
                break;
            }
        }
    }
    if swept > 0 {
        info!("swept {} expired claim(s)", swept);
    }
    swept
}

async fn worker<S: LedgerStore>(store: Arc<S>, every: Duration, cancel_token: CancellationToken) {
    let mut interval = time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        select! {
            _ = interval.tick() => {},
            _ = cancel_token.cancelled() => {
                info!("received cancel signal, returning gracefully");
                return;
            }
        }
        sweep_once(store.as_ref()).await;
    }
}

/// Run the expired-claim sweeper until `cancel_token` fires.
pub async fn expired_claim_sweeper<S: LedgerStore>(store: Arc<S>, every: Duration, cancel_token: CancellationToken) {
    let tracker = TaskTracker::new();
    tracker.spawn(worker(store, every, cancel_token));
    if tracker.close() {
        tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use uuid::Uuid;
    use crate::server::database::memory::MemoryLedger;
    use crate::server::model::claim::{PostItemClaimRequest, PostSubmitRequest};
    use crate::server::model::config::ClaimPolicy;
    use crate::server::service::session::tests::seed_bill;
    use crate::server::service::session::ClaimSessionManager;

    #[tokio::test]
    async fn sweeps_only_expired_selecting_claims() {
        let store = Arc::new(MemoryLedger::new());
        let (bill, item) = seed_bill(&store, 4.0, 3.0).await;
        let sessions = ClaimSessionManager::new(store.clone(), ClaimPolicy::default());
        let mut claims = Vec::new();
        for _ in 0..3 {
            let claim = sessions
                .upsert_item_quantity(&PostItemClaimRequest {
                    bill_id: Some(bill.id.to_string()),
                    item_id: Some(item.id.to_string()),
                    session_id: Some(Uuid::new_v4().to_string()),
                    guest_name: Some("guest".to_string()),
                    quantity: Some(1.0),
                })
                .await
                .unwrap();
            claims.push(claim);
        }
        sessions.submit(&claims[0].id.to_string(), &PostSubmitRequest::default()).await.unwrap();

        assert_eq!(sweep_once(store.as_ref()).await, 0);

        helper::set_utc_now(helper::get_utc_now() + ChronoDuration::minutes(31));
        assert_eq!(sweep_once(store.as_ref()).await, 2);
        let left = store.list_claims(bill.id).await.unwrap();
        assert_eq!(left.len(), 1);
        assert!(left[0].is_paid());
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_cancel() {
        let store = Arc::new(MemoryLedger::new());
        let cancel_token = CancellationToken::new();
        let sweeper = tokio::spawn(expired_claim_sweeper(store, Duration::from_secs(60), cancel_token.clone()));

        time::sleep(Duration::from_secs(150)).await;
        assert!(!sweeper.is_finished());
        cancel_token.cancel();
        sweeper.await.unwrap();
    }
}
