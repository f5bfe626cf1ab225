use actix_web::{delete, post, web, Responder};
use serde::Serialize;
use crate::server::controller::error::CustomError;
use crate::server::model::claim::{PostItemClaimRequest, PostSubmitRequest, PostTipRequest};
use crate::server::state::AppState;

#[derive(Serialize)]
struct CleanupResponse {
    deleted: u64,
}

#[post("/v1/claims/items")]
/// Set how much of one item a guest takes
pub(crate) async fn post_item_claim(body: web::Json<PostItemClaimRequest>, data: web::Data<AppState>) -> Result<impl Responder, CustomError> {
    Ok(web::Json(data.sessions().upsert_item_quantity(&body).await?))
}

#[post("/v1/claims/tip")]
pub(crate) async fn post_tip(body: web::Json<PostTipRequest>, data: web::Data<AppState>) -> Result<impl Responder, CustomError> {
    Ok(web::Json(data.sessions().upsert_tip(&body).await?))
}

#[post("/v1/claims/{id}/submit")]
/// Freeze a guest's claim as PAID. An empty body means no settlement method; anything
/// else must parse before the claim is touched.
pub(crate) async fn post_submit(
    id: web::Path<String>,
    body: web::Bytes,
    data: web::Data<AppState>,
) -> Result<impl Responder, CustomError> {
    let req = match body.iter().all(u8::is_ascii_whitespace) {
        true => PostSubmitRequest::default(),
        false => serde_json::from_slice(&body).map_err(|e| CustomError::BadRequest(e.to_string()))?,
    };
    Ok(web::Json(data.sessions().submit(&id, &req).await?))
}

#[post("/v1/claims/{id}/confirm")]
pub(crate) async fn post_confirm(id: web::Path<String>, data: web::Data<AppState>) -> Result<impl Responder, CustomError> {
    Ok(web::Json(data.sessions().confirm_received(&id).await?))
}

#[post("/v1/claims/{id}/unconfirm")]
pub(crate) async fn post_unconfirm(id: web::Path<String>, data: web::Data<AppState>) -> Result<impl Responder, CustomError> {
    Ok(web::Json(data.sessions().unconfirm_received(&id).await?))
}

#[delete("/v1/bills/{id}/sessions/{session_id}")]
/// Best-effort removal of a closed tab's SELECTING claim
pub(crate) async fn delete_session(path: web::Path<(String, String)>, data: web::Data<AppState>) -> Result<impl Responder, CustomError> {
    let (id, session_id) = path.into_inner();
    let deleted = data.sessions().cleanup_session(&id, &session_id).await?;
    Ok(web::Json(CleanupResponse { deleted }))
}

#[cfg(test)]
mod tests {
    use actix_web::{test, App};
    use actix_web::http::StatusCode;
    use serde_json::{json, Value};
    use uuid::Uuid;
    use crate::server::controller::configure;
    use crate::server::model::config::ClaimPolicy;
    use crate::server::state::tests::memory_state;
    use super::*;

    const SESSION: &str = "0b5a1f0e-8c33-4b43-9a0e-1c6f7d1e2a10";

    #[actix_web::test]
    async fn guest_claims_and_pays() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(memory_state(ClaimPolicy::default())))
                .configure(configure),
        )
        .await;
        let req = test::TestRequest::post()
            .uri("/v1/bills")
            .set_json(json!({
                "payer_name": "Mia",
                "payment_handle": "@mia",
                "image_ref": "receipts/7.jpg",
                "items": [{ "name": "pizza", "quantity": 1, "price_per_unit": 24 }],
            }))
            .to_request();
        let created: Value = test::call_and_read_body_json(&app, req).await;
        let bill_id = created["bill"]["id"].as_str().unwrap().to_string();
        let item_id = created["items"][0]["id"].as_str().unwrap().to_string();

        let req = test::TestRequest::post()
            .uri("/v1/claims/items")
            .set_json(json!({
                "bill_id": bill_id,
                "item_id": item_id,
                "session_id": SESSION,
                "guest_name": "  Leo ",
                "quantity": 0.5,
            }))
            .to_request();
        let claim: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(claim["status"], "SELECTING");
        assert_eq!(claim["guest_name"], "Leo");
        assert_eq!(claim["item_quantities"][&item_id], 0.5);
        let claim_id = claim["id"].as_str().unwrap().to_string();

        let req = test::TestRequest::post()
            .uri("/v1/claims/tip")
            .set_json(json!({ "bill_id": bill_id, "session_id": SESSION, "guest_name": "Leo", "tip_amount": 3 }))
            .to_request();
        let tipped: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(tipped["id"], claim_id.as_str());
        assert_eq!(tipped["tip_amount"], 3.0);

        let req = test::TestRequest::post().uri(&format!("/v1/claims/{claim_id}/confirm")).to_request();
        let confirmed: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(confirmed["received_confirmed"], true);

        let req = test::TestRequest::post()
            .uri(&format!("/v1/claims/{claim_id}/submit"))
            .set_json(json!({ "settlement_method": "venmo" }))
            .to_request();
        let paid: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(paid["status"], "PAID");
        assert_eq!(paid["settlement_method"], "VENMO");

        // once PAID, receipt can no longer be toggled by default
        let req = test::TestRequest::post().uri(&format!("/v1/claims/{claim_id}/unconfirm")).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        // submitting again is a no-op, even without a body
        let req = test::TestRequest::post().uri(&format!("/v1/claims/{claim_id}/submit")).to_request();
        let again: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(again["status"], "PAID");

        let req = test::TestRequest::get().uri(&format!("/v1/bills/{bill_id}")).to_request();
        let bill: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(bill["items"][0]["remaining_quantity"], 0.5);
    }

    #[actix_web::test]
    async fn malformed_submit_body_is_rejected() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(memory_state(ClaimPolicy::default())))
                .configure(configure),
        )
        .await;
        let req = test::TestRequest::post()
            .uri("/v1/bills")
            .set_json(json!({
                "payer_name": "Mia",
                "payment_handle": "@mia",
                "image_ref": "receipts/8.jpg",
                "items": [{ "name": "ramen", "quantity": 2, "price_per_unit": 14 }],
            }))
            .to_request();
        let created: Value = test::call_and_read_body_json(&app, req).await;
        let req = test::TestRequest::post()
            .uri("/v1/claims/items")
            .set_json(json!({
                "bill_id": created["bill"]["id"],
                "item_id": created["items"][0]["id"],
                "session_id": SESSION,
                "guest_name": "Leo",
                "quantity": 1,
            }))
            .to_request();
        let claim: Value = test::call_and_read_body_json(&app, req).await;
        let claim_id = claim["id"].as_str().unwrap().to_string();

        for body in [r#"{"settlement_method": 5}"#, "not json"] {
            let req = test::TestRequest::post()
                .uri(&format!("/v1/claims/{claim_id}/submit"))
                .insert_header(("content-type", "application/json"))
                .set_payload(body)
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
        }

        // still SELECTING, so the method of the first good submit sticks
        let req = test::TestRequest::post()
            .uri(&format!("/v1/claims/{claim_id}/submit"))
            .set_json(json!({ "settlement_method": "cash" }))
            .to_request();
        let paid: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(paid["status"], "PAID");
        assert_eq!(paid["settlement_method"], "CASH");
    }

    #[actix_web::test]
    async fn validation_order_is_stable() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(memory_state(ClaimPolicy::default())))
                .configure(configure),
        )
        .await;
        // missing fields win over malformed identifiers
        let req = test::TestRequest::post()
            .uri("/v1/claims/items")
            .set_json(json!({ "bill_id": "nope", "item_id": "nope", "session_id": SESSION, "quantity": 1 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["message"], "guest_name is required");

        let req = test::TestRequest::post()
            .uri("/v1/claims/tip")
            .set_json(json!({ "bill_id": Uuid::new_v4(), "session_id": SESSION, "guest_name": "Leo", "tip_amount": 10001 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn leaving_is_best_effort() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(memory_state(ClaimPolicy::default())))
                .configure(configure),
        )
        .await;
        let req = test::TestRequest::delete()
            .uri(&format!("/v1/bills/{}/sessions/{SESSION}", Uuid::new_v4()))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["deleted"], 0);

        let req = test::TestRequest::post().uri(&format!("/v1/claims/{}/confirm", Uuid::new_v4())).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }
}
