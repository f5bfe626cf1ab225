use uuid::Uuid;

pub(crate) mod bill;
pub(crate) mod claim;
pub(crate) mod config;
pub(crate) mod feed;
pub(crate) mod item;

pub(crate) type BillId = Uuid;
pub(crate) type ItemId = Uuid;
pub(crate) type ClaimId = Uuid;
pub(crate) type SessionId = Uuid;

/// Round a currency amount to whole cents.
pub(crate) fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}
