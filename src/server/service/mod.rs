//! Claim reconciliation, guest claim sessions, bill intake and the payer console.

pub(crate) mod catalog;
pub(crate) mod console;
pub(crate) mod reconciler;
pub(crate) mod session;

use derive_more::{Display, Error, From};
use crate::server::database::StoreError;
use crate::server::util::validate::ValidationError;

#[derive(Debug, Display, Error, From)]
pub(crate) enum ServiceError {
    #[from]
    #[display("{_0}")]
    Validation(ValidationError),
    #[display("{_0} not found")]
    NotFound(#[error(not(source))] &'static str),
    #[display("{_0}")]
    InvalidState(#[error(not(source))] &'static str),
    #[display("{_0}")]
    Conflict(#[error(not(source))] &'static str),
    #[from]
    #[display("{_0}")]
    Store(StoreError),
}
