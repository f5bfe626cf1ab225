//! HTTP handlers. Each one parses the request, calls a service and maps its error.

pub(crate) mod bill;
pub(crate) mod claim;
pub(crate) mod console;
pub(crate) mod error;
pub(crate) mod events;

use actix_web::web;
use crate::server::controller::error::CustomError;

/// Register every route, with malformed JSON bodies answered like any other bad request.
pub(crate) fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default().error_handler(|e, _| CustomError::BadRequest(e.to_string()).into()),
    )
    .service(bill::post_bills)
    .service(bill::get_bill)
    .service(bill::get_shared_bill)
    .service(bill::patch_bill)
    .service(bill::post_bill_item)
    .service(bill::patch_bill_item)
    .service(bill::delete_bill_item)
    .service(claim::post_item_claim)
    .service(claim::post_tip)
    .service(claim::post_submit)
    .service(claim::post_confirm)
    .service(claim::post_unconfirm)
    .service(claim::delete_session)
    .service(console::get_summary)
    .service(console::get_live)
    .service(events::get_bill_events);
}
