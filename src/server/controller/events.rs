use actix_web::{get, web, HttpResponse};
use actix_web::http::header;
use actix_web::web::Bytes;
use futures_util::stream;
use log::{debug, warn};
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use crate::server::controller::error::CustomError;
use crate::server::database::{Ledger, LedgerStore};
use crate::server::model::BillId;
use crate::server::presence::bridge::{BridgeEvent, Subscription};
use crate::server::service::console::PayerConsole;
use crate::server::service::ServiceError;
use crate::server::state::AppState;
use crate::server::util::validate::parse_identifier;

/// Server-sent event frame.
fn frame(name: &str, data: &impl Serialize) -> Bytes {
    match serde_json::to_string(data) {
        Ok(data) => Bytes::from(format!("event: {name}\ndata: {data}\n\n")),
        Err(e) => {
            warn!("could not encode {} event, {}", name, e);
            Bytes::from(format!("event: error\ndata: {}\n\n", json!({ "message": "unencodable event" })))
        }
    }
}

async fn render(event: BridgeEvent, bill_id: BillId, console: &PayerConsole<Ledger>) -> Bytes {
    match event {
        BridgeEvent::Selection(change) => frame("selection", &change),
        BridgeEvent::ActiveSelection(change) => frame("active_selection", &change),
        BridgeEvent::Item(change) => frame("item", &change),
        BridgeEvent::Status(status) => frame("status", &json!({ "status": status })),
        BridgeEvent::Error(e) => frame("error", &json!({ "message": e.to_string() })),
        // missed changes are reconciled by a fresh read, not by replay
        BridgeEvent::InitialFetch => match console.live_view(&bill_id.to_string()).await {
            Ok(view) => frame("snapshot", &view),
            Err(e) => {
                warn!("snapshot of bill={} failed, {}", bill_id, e);
                frame("error", &json!({ "message": e.to_string() }))
            }
        },
    }
}

struct EventStream {
    bill_id: BillId,
    events: mpsc::UnboundedReceiver<BridgeEvent>,
    console: PayerConsole<Ledger>,
    /// closed when the client goes away and the stream is dropped
    _subscription: Subscription,
}

#[get("/v1/bills/{id}/events")]
/// Follow a bill's claims and items as they change
pub(crate) async fn get_bill_events(id: web::Path<String>, data: web::Data<AppState>) -> Result<HttpResponse, CustomError> {
    let bill_id = parse_identifier(&id, "bill_id").map_err(ServiceError::from)?;
    data.ledger()
        .get_bill(bill_id)
        .await
        .map_err(ServiceError::from)?
        .ok_or(ServiceError::NotFound("bill"))?;

    let (tx, events) = mpsc::unbounded_channel();
    let state = EventStream {
        bill_id,
        events,
        console: data.console(),
        _subscription: data.bridge().subscribe(bill_id, tx),
    };
    debug!("bill={} event stream opened", bill_id);

    let body = stream::unfold(state, |mut state| async move {
        let event = state.events.recv().await?;
        let bytes = render(event, state.bill_id, &state.console).await;
        Some((Ok::<_, actix_web::Error>(bytes), state))
    });
    Ok(HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(body))
}
