//! User lookup and discovery handlers.

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use ripple_types::api::{Claims, SuggestedUsersRequest, SuggestedUsersResponse};

use crate::error::ApiError;
use crate::friends::user_summary;
use crate::suggestions;
use crate::{AppState, with_db};

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let row = {
        let uid = user_id.to_string();
        with_db(&state, move |db| db.get_user_by_id(&uid))
            .await?
            .ok_or_else(|| ApiError::not_found("User not found"))?
    };
    Ok(Json(user_summary(&row)))
}

pub async fn suggested(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SuggestedUsersRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let users = suggestions::suggested_users(&state, claims.sub, req.limit, req.seen).await?;
    Ok(Json(SuggestedUsersResponse { users }))
}
