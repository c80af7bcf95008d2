//! People-you-may-know: friends-of-friends first, random backfill when
//! the graph around the caller is too thin. The caller, their direct
//! friends and anything the client already saw are never suggested.

use std::collections::{BTreeSet, HashMap};

use rand::seq::SliceRandom;
use uuid::Uuid;

use ripple_db::models::UserRow;
use ripple_types::api::UserSummary;

use crate::error::ApiError;
use crate::friends::{friend_ids_of, user_summary};
use crate::{AppState, with_db};

pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 50;

pub async fn suggested_users(
    state: &AppState,
    caller: Uuid,
    limit: Option<usize>,
    seen: Vec<Uuid>,
) -> Result<Vec<UserSummary>, ApiError> {
    let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let caller_str = caller.to_string();
    let direct = friend_ids_of(state, &caller_str).await?;

    let mut excluded: BTreeSet<String> = seen.iter().map(Uuid::to_string).collect();
    excluded.insert(caller_str);
    excluded.extend(direct.iter().cloned());

    // Second hop of the graph: accepted edges touching any direct friend.
    let mut candidates: Vec<String> = Vec::new();
    if !direct.is_empty() {
        let hop = direct.clone();
        let edges = with_db(state, move |db| db.accepted_edges_touching(&hop)).await?;
        let mut dedup = BTreeSet::new();
        for (requester, target) in edges {
            for id in [requester, target] {
                if !excluded.contains(&id) && dedup.insert(id.clone()) {
                    candidates.push(id);
                }
            }
        }
    }

    candidates.shuffle(&mut rand::rng());
    candidates.truncate(limit);

    if candidates.len() < limit {
        let need = (limit - candidates.len()) as u32;
        let mut exclude_all: Vec<String> = excluded.into_iter().collect();
        exclude_all.extend(candidates.iter().cloned());
        let fill =
            with_db(state, move |db| db.random_user_ids_excluding(&exclude_all, need)).await?;
        candidates.extend(fill);
    }

    // Fetch in one query, then restore the chosen order.
    let ids = candidates.clone();
    let users = with_db(state, move |db| db.get_users_by_ids(&ids)).await?;
    let by_id: HashMap<&str, &UserRow> = users.iter().map(|u| (u.id.as_str(), u)).collect();
    Ok(candidates
        .iter()
        .filter_map(|id| by_id.get(id.as_str()))
        .map(|row| user_summary(row))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::friends;
    use crate::test_util::{seed_user, test_state};
    use ripple_types::models::FriendStatus;

    async fn befriend(state: &AppState, a: Uuid, b: Uuid) {
        let edge = friends::send_request(state, a, b).await.unwrap();
        friends::respond(state, b, edge.id, FriendStatus::Accepted)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn second_hop_is_suggested_but_not_direct_friends() {
        let (_dir, state) = test_state().await;
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");
        let carol = seed_user(&state, "carol");

        befriend(&state, alice, bob).await;
        befriend(&state, bob, carol).await;

        let suggested = suggested_users(&state, alice, Some(10), vec![]).await.unwrap();
        let ids: Vec<Uuid> = suggested.iter().map(|u| u.id).collect();
        assert!(ids.contains(&carol), "friend-of-friend is suggested");
        assert!(!ids.contains(&bob), "direct friend is not");
        assert!(!ids.contains(&alice), "nor the caller");
    }

    #[tokio::test]
    async fn seen_ids_are_never_repeated() {
        let (_dir, state) = test_state().await;
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");
        let carol = seed_user(&state, "carol");

        befriend(&state, alice, bob).await;
        befriend(&state, bob, carol).await;

        let suggested = suggested_users(&state, alice, Some(10), vec![carol])
            .await
            .unwrap();
        assert!(suggested.iter().all(|u| u.id != carol));
    }

    #[tokio::test]
    async fn random_backfill_covers_a_thin_graph() {
        let (_dir, state) = test_state().await;
        let alice = seed_user(&state, "alice");
        let dave = seed_user(&state, "dave");

        // No edges at all: suggestions still arrive via backfill.
        let suggested = suggested_users(&state, alice, Some(10), vec![]).await.unwrap();
        assert_eq!(suggested.len(), 1);
        assert_eq!(suggested[0].id, dave);
    }

    #[tokio::test]
    async fn limit_caps_the_result() {
        let (_dir, state) = test_state().await;
        let alice = seed_user(&state, "alice");
        for i in 0..8 {
            seed_user(&state, &format!("user{i}"));
        }

        let suggested = suggested_users(&state, alice, Some(3), vec![]).await.unwrap();
        assert_eq!(suggested.len(), 3);
    }
}
