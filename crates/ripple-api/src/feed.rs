//! Discovery feed. Each page is the caller's own just-published posts
//! (so a fresh post shows up immediately) plus a few random posts from
//! other authors, with reactions aggregated in one query per batch. The
//! client echoes back `fetched_ids` so pages never repeat a post.

use std::collections::{BTreeMap, HashMap};

use axum::{Extension, Json, extract::State, response::IntoResponse};
use chrono::{Duration, SecondsFormat, Utc};
use uuid::Uuid;

use ripple_db::models::PostRow;
use ripple_types::api::{Claims, FeedPost, FeedRequest, FeedResponse};

use crate::error::ApiError;
use crate::{AppState, parse_timestamp, parse_uuid, with_db};

/// Own posts newer than this many seconds ride along with every page.
pub const OWN_POST_WINDOW_SECS: i64 = 30;
/// Random other-author posts per page.
pub const RANDOM_POSTS_PER_PAGE: u32 = 3;

pub async fn fetch(
    state: &AppState,
    caller: Uuid,
    already_fetched: Vec<Uuid>,
) -> Result<FeedResponse, ApiError> {
    let caller_str = caller.to_string();
    let exclude: Vec<String> = already_fetched.iter().map(Uuid::to_string).collect();

    // Freshness fast path: the caller's own posts from the last window.
    let since = (Utc::now() - Duration::seconds(OWN_POST_WINDOW_SECS))
        .to_rfc3339_opts(SecondsFormat::Micros, true);
    let mut chosen = {
        let (uid, exclude) = (caller_str.clone(), exclude.clone());
        with_db(state, move |db| db.recent_own_posts(&uid, &since, &exclude)).await?
    };

    // Random fill from everyone else, minus what this page already holds.
    let mut fill_exclude = exclude.clone();
    fill_exclude.extend(chosen.iter().map(|p| p.id.clone()));
    let random = {
        let uid = caller_str.clone();
        with_db(state, move |db| {
            db.random_posts_excluding(&uid, &fill_exclude, RANDOM_POSTS_PER_PAGE)
        })
        .await?
    };
    chosen.extend(random);

    let post_ids: Vec<String> = chosen.iter().map(|p| p.id.clone()).collect();
    let counts = {
        let ids = post_ids.clone();
        with_db(state, move |db| db.reaction_counts(&ids)).await?
    };
    let mine = {
        let (uid, ids) = (caller_str.clone(), post_ids.clone());
        with_db(state, move |db| db.user_reactions(&uid, &ids)).await?
    };

    let mut counts_by_post: HashMap<String, BTreeMap<String, i64>> = HashMap::new();
    for row in counts {
        counts_by_post
            .entry(row.post_id)
            .or_default()
            .insert(row.kind, row.count);
    }
    let mine_by_post: HashMap<String, String> =
        mine.into_iter().map(|r| (r.post_id, r.kind)).collect();

    let posts: Vec<FeedPost> = chosen
        .iter()
        .map(|row| feed_post(row, &caller_str, &counts_by_post, &mine_by_post))
        .collect();

    let mut fetched_ids = already_fetched;
    fetched_ids.extend(posts.iter().map(|p| p.id));

    Ok(FeedResponse { posts, fetched_ids })
}

fn feed_post(
    row: &PostRow,
    caller: &str,
    counts_by_post: &HashMap<String, BTreeMap<String, i64>>,
    mine_by_post: &HashMap<String, String>,
) -> FeedPost {
    let reactions_count = counts_by_post.get(&row.id).cloned().unwrap_or_default();
    let total_reactions = reactions_count.values().sum();
    FeedPost {
        id: parse_uuid(&row.id, "posts.id"),
        author_id: parse_uuid(&row.author_id, "posts.author_id"),
        content: row.content.clone(),
        created_at: parse_timestamp(&row.created_at, "posts.created_at"),
        is_own: row.author_id == caller,
        reactions_count,
        total_reactions,
        current_user_reaction: mine_by_post.get(&row.id).cloned(),
    }
}

pub async fn get_feed(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<FeedRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(fetch(&state, claims.sub, req.already_fetched_ids).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posts;
    use crate::test_util::{seed_user, test_state};

    #[tokio::test]
    async fn own_fresh_post_leads_the_page() {
        let (_dir, state) = test_state().await;
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");

        posts::create(&state, bob, "from bob".into()).await.unwrap();
        let own = posts::create(&state, alice, "just now".into()).await.unwrap();

        let page = fetch(&state, alice, vec![]).await.unwrap();
        assert_eq!(page.posts[0].id, own.id);
        assert!(page.posts[0].is_own);
        assert!(page.fetched_ids.contains(&own.id));
    }

    #[tokio::test]
    async fn fetched_ids_are_never_served_twice() {
        let (_dir, state) = test_state().await;
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");

        for i in 0..5 {
            posts::create(&state, bob, format!("post {i}")).await.unwrap();
        }

        let first = fetch(&state, alice, vec![]).await.unwrap();
        let second = fetch(&state, alice, first.fetched_ids.clone()).await.unwrap();

        for post in &second.posts {
            assert!(!first.fetched_ids.contains(&post.id));
        }
        // The cursor accumulates across pages.
        assert_eq!(
            second.fetched_ids.len(),
            first.fetched_ids.len() + second.posts.len()
        );
    }

    #[tokio::test]
    async fn reactions_are_aggregated_per_post() {
        let (_dir, state) = test_state().await;
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");
        let carol = seed_user(&state, "carol");

        let post = posts::create(&state, bob, "popular".into()).await.unwrap();
        posts::react(&state, alice, post.id, "like".into()).await.unwrap();
        posts::react(&state, carol, post.id, "love".into()).await.unwrap();

        let page = fetch(&state, alice, vec![]).await.unwrap();
        let seen = page.posts.iter().find(|p| p.id == post.id).unwrap();
        assert_eq!(seen.total_reactions, 2);
        assert_eq!(seen.reactions_count.get("like"), Some(&1));
        assert_eq!(seen.reactions_count.get("love"), Some(&1));
        assert_eq!(seen.current_user_reaction.as_deref(), Some("like"));
    }

    #[tokio::test]
    async fn page_holds_at_most_the_random_quota_of_other_posts() {
        let (_dir, state) = test_state().await;
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");

        for i in 0..10 {
            posts::create(&state, bob, format!("post {i}")).await.unwrap();
        }

        let page = fetch(&state, alice, vec![]).await.unwrap();
        assert_eq!(page.posts.len(), RANDOM_POSTS_PER_PAGE as usize);
        assert!(page.posts.iter().all(|p| !p.is_own));
    }
}
