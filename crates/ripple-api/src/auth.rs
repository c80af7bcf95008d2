use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::json;
use uuid::Uuid;

use ripple_db::models::UserRow;
use ripple_types::api::{AuthResponse, Claims, LoginRequest, SignupRequest};

use crate::error::ApiError;
use crate::{AppState, now_rfc3339, with_db};

pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.name.trim().is_empty() || req.name.len() > 255 {
        return Err(ApiError::validation("Name must be 1-255 characters"));
    }
    if req.password.len() < 6 {
        return Err(ApiError::validation("Password must be at least 6 characters"));
    }
    let email = req.email.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let phone = req.phone.as_deref().map(str::trim).filter(|s| !s.is_empty());
    if email.is_none() && phone.is_none() {
        return Err(ApiError::validation("Either email or phone is required"));
    }

    // Uniqueness is checked here; the schema backs it with UNIQUE columns.
    if let Some(email) = email {
        let email = email.to_string();
        if with_db(&state, move |db| db.get_user_by_email(&email)).await?.is_some() {
            return Err(ApiError::conflict("This email is already registered"));
        }
    }
    if let Some(phone) = phone {
        let phone = phone.to_string();
        if with_db(&state, move |db| db.get_user_by_phone(&phone)).await?.is_some() {
            return Err(ApiError::conflict("This phone is already registered"));
        }
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| ApiError::Upstream(anyhow::anyhow!("password hash failed: {e}")))?
        .to_string();

    let user_id = Uuid::new_v4();
    let name = req.name.trim().to_string();
    {
        let (id, name) = (user_id.to_string(), name.clone());
        let (email, phone) = (email.map(String::from), phone.map(String::from));
        with_db(&state, move |db| {
            db.create_user(
                &id,
                &name,
                email.as_deref(),
                phone.as_deref(),
                &password_hash,
                &now_rfc3339(),
            )
        })
        .await?;
    }

    let token = create_token(&state.jwt_secret, user_id, &name)?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user_id,
            name,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user: Option<UserRow> = match (req.email, req.phone) {
        (Some(email), _) if !email.trim().is_empty() => {
            let email = email.trim().to_string();
            with_db(&state, move |db| db.get_user_by_email(&email)).await?
        }
        (_, Some(phone)) if !phone.trim().is_empty() => {
            let phone = phone.trim().to_string();
            with_db(&state, move |db| db.get_user_by_phone(&phone)).await?
        }
        _ => return Err(ApiError::validation("Either email or phone is required")),
    };

    let user = user.ok_or_else(|| ApiError::unauthenticated("Invalid credentials"))?;

    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| ApiError::Upstream(anyhow::anyhow!("corrupt password hash: {e}")))?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::unauthenticated("Invalid credentials"))?;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| ApiError::Upstream(anyhow::anyhow!("corrupt user id: {e}")))?;

    let token = create_token(&state.jwt_secret, user_id, &user.name)?;

    Ok(Json(AuthResponse {
        user_id,
        name: user.name,
        token,
    }))
}

pub async fn check(Extension(claims): Extension<Claims>) -> impl IntoResponse {
    Json(json!({
        "authenticated": true,
        "user_id": claims.sub,
        "name": claims.name,
    }))
}

fn create_token(secret: &str, user_id: Uuid, name: &str) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user_id,
        name: name.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Upstream(anyhow::anyhow!("token encode failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::test_state;

    fn signup_req(name: &str, email: &str, password: &str) -> SignupRequest {
        SignupRequest {
            name: name.into(),
            email: Some(email.into()),
            phone: None,
            password: password.into(),
        }
    }

    fn login_req(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: Some(email.into()),
            phone: None,
            password: password.into(),
        }
    }

    #[tokio::test]
    async fn signup_then_login_round_trips() {
        let (_dir, state) = test_state().await;

        let resp = signup(
            State(state.clone()),
            Json(signup_req("ann", "ann@example.com", "hunter22")),
        )
        .await
        .unwrap()
        .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);

        login(State(state.clone()), Json(login_req("ann@example.com", "hunter22")))
            .await
            .unwrap();

        let denied = login(State(state.clone()), Json(login_req("ann@example.com", "wrong"))).await;
        assert!(matches!(denied, Err(ApiError::Unauthenticated(_))));
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let (_dir, state) = test_state().await;

        signup(
            State(state.clone()),
            Json(signup_req("ann", "ann@example.com", "hunter22")),
        )
        .await
        .unwrap();
        let repeat = signup(
            State(state.clone()),
            Json(signup_req("imposter", "ann@example.com", "hunter22")),
        )
        .await;
        assert!(matches!(repeat, Err(ApiError::Conflict(_))));
    }
}
