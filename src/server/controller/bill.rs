use actix_web::{delete, get, patch, post, web, HttpResponse, Responder};
use crate::server::controller::error::CustomError;
use crate::server::model::bill::{PatchBillRequest, PostBillsRequest};
use crate::server::model::item::{LineItemPatch, NewLineItem};
use crate::server::state::AppState;

#[post("/v1/bills")]
/// Record an itemized receipt
pub(crate) async fn post_bills(body: web::Json<PostBillsRequest>, data: web::Data<AppState>) -> Result<impl Responder, CustomError> {
    let created = data.catalog().create_bill(&body).await?;
    Ok(HttpResponse::Created().json(created))
}

#[get("/v1/bills/{id}")]
pub(crate) async fn get_bill(id: web::Path<String>, data: web::Data<AppState>) -> Result<impl Responder, CustomError> {
    Ok(web::Json(data.catalog().get_bill(&id).await?))
}

#[get("/v1/share/{token}")]
/// What a guest opening the share link sees
pub(crate) async fn get_shared_bill(token: web::Path<String>, data: web::Data<AppState>) -> Result<impl Responder, CustomError> {
    Ok(web::Json(data.catalog().get_bill_by_share_token(&token).await?))
}

#[patch("/v1/bills/{id}")]
pub(crate) async fn patch_bill(id: web::Path<String>, body: web::Json<PatchBillRequest>, data: web::Data<AppState>) -> Result<impl Responder, CustomError> {
    Ok(web::Json(data.catalog().rename_bill(&id, &body).await?))
}

#[post("/v1/bills/{id}/items")]
pub(crate) async fn post_bill_item(id: web::Path<String>, body: web::Json<NewLineItem>, data: web::Data<AppState>) -> Result<impl Responder, CustomError> {
    let item = data.catalog().add_item(&id, &body).await?;
    Ok(HttpResponse::Created().json(item))
}

#[patch("/v1/bills/{id}/items/{item_id}")]
pub(crate) async fn patch_bill_item(
    path: web::Path<(String, String)>,
    body: web::Json<LineItemPatch>,
    data: web::Data<AppState>,
) -> Result<impl Responder, CustomError> {
    let (id, item_id) = path.into_inner();
    Ok(web::Json(data.catalog().update_item(&id, &item_id, &body).await?))
}

#[delete("/v1/bills/{id}/items/{item_id}")]
/// Remove one line item; claims naming it stop counting it
pub(crate) async fn delete_bill_item(path: web::Path<(String, String)>, data: web::Data<AppState>) -> Result<impl Responder, CustomError> {
    let (id, item_id) = path.into_inner();
    data.catalog().delete_item(&id, &item_id).await?;
    Ok(HttpResponse::NoContent().finish())
}
