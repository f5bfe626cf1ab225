use actix_web::{error, HttpResponse};
use actix_web::http::StatusCode;
use derive_more::{Display, Error};
use log::error;
use serde::Serialize;
use crate::server::database::StoreError;
use crate::server::service::ServiceError;

#[derive(Debug, Display, Error)]
pub(crate) enum CustomError {
    #[display("server is busy")]
    ServerIsBusy,
    #[display("{_0}")]
    BadRequest(#[error(not(source))] String),
    #[display("{_0} not found")]
    ResourceNotFound(#[error(not(source))] &'static str),
    #[display("{_0}")]
    Conflict(#[error(not(source))] &'static str),
    #[display("database error")]
    DbError,
    #[display("timeout occurred")]
    Timeout,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

impl CustomError {
    fn code(&self) -> &'static str {
        match self {
            CustomError::ServerIsBusy => "server_busy",
            CustomError::BadRequest(_) => "invalid_request",
            CustomError::ResourceNotFound(_) => "not_found",
            CustomError::Conflict(_) => "conflict",
            CustomError::DbError => "database_error",
            CustomError::Timeout => "timeout",
        }
    }
}

impl error::ResponseError for CustomError {
    fn status_code(&self) -> StatusCode {
        match *self {
            CustomError::ServerIsBusy => StatusCode::SERVICE_UNAVAILABLE,
            CustomError::BadRequest(_) => StatusCode::BAD_REQUEST,
            CustomError::ResourceNotFound(_) => StatusCode::NOT_FOUND,
            CustomError::Conflict(_) => StatusCode::CONFLICT,
            CustomError::DbError => StatusCode::INTERNAL_SERVER_ERROR,
            CustomError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.code(),
            message: self.to_string(),
        })
    }
}

impl From<ServiceError> for CustomError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::Validation(e) => CustomError::BadRequest(e.to_string()),
            ServiceError::NotFound(what) => CustomError::ResourceNotFound(what),
            ServiceError::InvalidState(why) | ServiceError::Conflict(why) => CustomError::Conflict(why),
            ServiceError::Store(StoreError::Busy) => CustomError::ServerIsBusy,
            ServiceError::Store(StoreError::Timeout) => CustomError::Timeout,
            ServiceError::Store(e) => {
                error!("request failed on the store, {}", e);
                CustomError::DbError
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;
    use actix_web::ResponseError;
    use crate::server::util::validate::ValidationError;

    #[actix_web::test]
    async fn service_errors_map_to_statuses() {
        let cases = [
            (ServiceError::from(ValidationError::MissingField { field: "guest_name" }), StatusCode::BAD_REQUEST),
            (ServiceError::NotFound("claim"), StatusCode::NOT_FOUND),
            (ServiceError::InvalidState("claim is not SELECTING"), StatusCode::CONFLICT),
            (ServiceError::Conflict("item is claimed"), StatusCode::CONFLICT),
            (ServiceError::from(StoreError::Busy), StatusCode::SERVICE_UNAVAILABLE),
            (ServiceError::from(StoreError::Timeout), StatusCode::GATEWAY_TIMEOUT),
            (ServiceError::from(StoreError::Decode("bad row".to_string())), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (e, status) in cases {
            assert_eq!(CustomError::from(e).status_code(), status);
        }
    }

    #[actix_web::test]
    async fn body_is_json() {
        let resp = CustomError::from(ServiceError::from(ValidationError::MissingField { field: "bill_id" })).error_response();
        let body = to_bytes(resp.into_body()).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "invalid_request");
        assert_eq!(body["message"], "bill_id is required");
    }
}
