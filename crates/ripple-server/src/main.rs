use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use ripple_api::middleware::require_auth;
use ripple_api::{
    AppState, AppStateInner, auth, chat, feed, friends, group_chats, group_messages, messages,
    posts, users,
};
use ripple_media::DiskStore;
use ripple_mirror::MirrorStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ripple=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("RIPPLE_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("RIPPLE_DB_PATH").unwrap_or_else(|_| "ripple.db".into());
    let media_dir = std::env::var("RIPPLE_MEDIA_DIR").unwrap_or_else(|_| "storage".into());
    let host = std::env::var("RIPPLE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("RIPPLE_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let repair_interval: u64 = std::env::var("RIPPLE_REPAIR_INTERVAL_SECS")
        .unwrap_or_else(|_| "60".into())
        .parse()?;

    // Stores
    let db = ripple_db::Database::open(&PathBuf::from(&db_path))?;
    let media = DiskStore::open(PathBuf::from(&media_dir), "/storage").await?;
    let mirror = MirrorStore::new();

    let state: AppState = Arc::new(AppStateInner {
        db,
        mirror,
        media,
        jwt_secret,
    });

    // Replays relational rows whose mirror write never landed.
    tokio::spawn(chat::run_repair_loop(state.clone(), repair_interval));

    // Routes
    let public_routes = Router::new()
        .route("/auth/signup", post(auth::signup))
        .route("/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/auth/check", get(auth::check))
        .route("/users/{user_id}", get(users::get_user))
        .route("/users/suggested", post(users::suggested))
        .route("/friends", get(friends::list_friends))
        .route("/friends/requests", post(friends::send_friend_request))
        .route("/friends/requests", get(friends::list_pending))
        .route("/friends/requests/{friend_id}/accept", post(friends::accept_friend_request))
        .route("/friends/requests/{friend_id}/reject", post(friends::reject_friend_request))
        .route("/messages", post(messages::send_message))
        .route("/messages/image", post(messages::send_image))
        .route("/messages/file", post(messages::send_file))
        .route("/messages/voice", post(messages::send_voice))
        .route("/messages/share-post", post(messages::share_post))
        .route("/messages/mark-read", post(messages::mark_read))
        .route("/messages/clear-chat", post(messages::clear_chat))
        .route("/messages/{friend_id}", get(messages::conversation))
        .route("/groups", post(group_chats::create_group))
        .route("/groups", get(group_chats::list_my_groups))
        .route("/groups/{group_id}", put(group_chats::update_group))
        .route("/groups/{group_id}/members", get(group_chats::get_group_members))
        .route("/groups/members", post(group_chats::add_group_members))
        .route("/groups/members/remove", post(group_chats::remove_group_member))
        .route("/groups/messages", post(group_messages::send_message))
        .route("/groups/messages/image", post(group_messages::send_image))
        .route("/groups/messages/file", post(group_messages::send_file))
        .route("/groups/messages/voice", post(group_messages::send_voice))
        .route("/groups/messages/share-post", post(group_messages::share_post))
        .route("/groups/messages/mark-read", post(group_messages::mark_read))
        .route("/groups/messages/clear-chat", post(group_messages::clear_chat))
        .route("/groups/{group_id}/messages", get(group_messages::conversation))
        .route("/posts", post(posts::create_post))
        .route("/posts/{post_id}/react", post(posts::react_to_post))
        .route("/feed", post(feed::get_feed))
        .layer(middleware::from_fn(require_auth))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .nest_service("/storage", ServeDir::new(&media_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Ripple server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
