use actix_web::{get, web, Responder};
use crate::server::controller::error::CustomError;
use crate::server::state::AppState;

#[get("/v1/bills/{id}/summary")]
/// Payer's collected vs. received totals
pub(crate) async fn get_summary(id: web::Path<String>, data: web::Data<AppState>) -> Result<impl Responder, CustomError> {
    Ok(web::Json(data.console().summary(&id).await?))
}

#[get("/v1/bills/{id}/live")]
pub(crate) async fn get_live(id: web::Path<String>, data: web::Data<AppState>) -> Result<impl Responder, CustomError> {
    Ok(web::Json(data.console().live_view(&id).await?))
}
