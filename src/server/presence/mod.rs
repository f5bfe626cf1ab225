//! Change-feed bridge: one subscription per bill, re-established with backoff, routing
//! row changes to handlers by claim status.

pub(crate) mod backoff;
pub(crate) mod bridge;
pub(crate) mod routing;
pub(crate) mod transport;
