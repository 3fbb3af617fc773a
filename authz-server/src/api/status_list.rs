use crate::errors::ApiError;
use crate::openapi::STATUS_LIST_TAG;
use crate::state::AppState;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use http::header::{CACHE_CONTROL, CONTENT_TYPE};
use http::StatusCode;
use log::error;
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;

const STATUS_LIST_CONTENT_TYPE: &str = "application/statuslist+jwt";

pub(super) fn router() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(routes!(status_list_handler))
}

#[utoipa::path(
    get,
    path = "/status_list",
    tag = STATUS_LIST_TAG,
    responses(
        (status = 200, description = "Signed status list token", body = String, content_type = "application/statuslist+jwt"),
        (status = 404, description = "The status list is disabled"),
        (status = 500, description = "Internal server error")
    )
)]
pub(super) async fn status_list_handler(State(state): State<AppState>) -> Response {
    let Some(list) = &state.status_list else {
        return ApiError::not_found("The status list is disabled").into_response();
    };
    match list.token(state.registry.factory()).await {
        Ok(token) => (
            StatusCode::OK,
            [
                (CONTENT_TYPE, STATUS_LIST_CONTENT_TYPE),
                (CACHE_CONTROL, "no-cache"),
            ],
            token,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to build the status list token: {}", e);
            ApiError::internal("Failed to build the status list").into_response()
        }
    }
}
