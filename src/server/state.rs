use std::sync::Arc;
use crate::server::database::Ledger;
use crate::server::model::config::ClaimPolicy;
use crate::server::presence::bridge::PresenceBridge;
use crate::server::presence::transport::Feed;
use crate::server::service::catalog::BillCatalog;
use crate::server::service::console::PayerConsole;
use crate::server::service::session::ClaimSessionManager;

/// Long-lived handles shared by every worker. Services are thin views over them.
#[derive(Clone)]
pub(crate) struct AppState {
    ledger: Arc<Ledger>,
    feed: Arc<Feed>,
    policy: ClaimPolicy,
}

impl AppState {
    pub fn new(ledger: Arc<Ledger>, feed: Arc<Feed>, policy: ClaimPolicy) -> Self {
        Self { ledger, feed, policy }
    }

    pub fn ledger(&self) -> Arc<Ledger> {
        self.ledger.clone()
    }

    pub fn catalog(&self) -> BillCatalog<Ledger> {
        BillCatalog::new(self.ledger.clone(), self.policy)
    }

    pub fn sessions(&self) -> ClaimSessionManager<Ledger> {
        ClaimSessionManager::new(self.ledger.clone(), self.policy)
    }

    pub fn console(&self) -> PayerConsole<Ledger> {
        PayerConsole::new(self.ledger.clone())
    }

    pub fn bridge(&self) -> PresenceBridge<Feed> {
        PresenceBridge::new(self.feed.clone())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::server::database::memory::MemoryLedger;
    use crate::server::presence::transport::MemoryChangeFeed;

    /// State over an in-memory ledger whose changes feed the bridge.
    pub(crate) fn memory_state(policy: ClaimPolicy) -> AppState {
        let ledger = MemoryLedger::new();
        let feed = Feed::Memory(MemoryChangeFeed::new(ledger.changes()));
        AppState::new(Arc::new(Ledger::Memory(ledger)), Arc::new(feed), policy)
    }

    #[actix_web::test]
    async fn services_share_one_ledger() {
        let state = memory_state(ClaimPolicy::default()).clone();
        let created = state
            .catalog()
            .create_bill(&serde_json::from_value(serde_json::json!({
                "payer_name": "Mia",
                "payment_handle": "mia-pays",
                "image_ref": "receipts/1.jpg",
                "items": [{ "name": "dumplings", "quantity": 2, "price_per_unit": 6.5 }],
            })).unwrap())
            .await
            .unwrap();
        let summary = state.console().summary(&created.bill.id.to_string()).await.unwrap();
        assert_eq!(summary.total_amount, 13.0);
        assert!(Arc::ptr_eq(&state.ledger(), &state.clone().ledger()));
    }
}
