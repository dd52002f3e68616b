/// Intent tests: REST results written through the cache rules
mod common;

use agora_sync::cache::{EntryStatus, ListStatus, WriteOrigin};
use agora_sync::{ApiError, SyncError};
use common::{conversation, event, eventually, notification, post, Harness};
use std::sync::Arc;

#[tokio::test]
async fn test_failed_fetch_keeps_entries_and_sets_error() {
    let h = Harness::new();
    *h.api.events.lock().unwrap() = Ok(vec![event("e1"), event("e2")]);
    h.client.fetch_events().await.unwrap();

    *h.api.events.lock().unwrap() = Err(ApiError::with_status("Service unavailable", 503));
    let result = h.client.fetch_events().await;
    assert!(matches!(result, Err(SyncError::Api(ref e)) if e.status == Some(503)));

    let snapshot = h.client.store().events_snapshot().await;
    assert_eq!(snapshot.status, ListStatus::Error);
    assert_eq!(snapshot.error.as_deref(), Some("Service unavailable"));
    let ids: Vec<&str> = snapshot.items.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["e1", "e2"]);
}

#[tokio::test]
async fn test_fetch_clears_previous_error() {
    let h = Harness::new();
    *h.api.events.lock().unwrap() = Err(ApiError::new("offline"));
    assert!(h.client.fetch_events().await.is_err());

    *h.api.events.lock().unwrap() = Ok(vec![event("e1")]);
    h.client.fetch_events().await.unwrap();

    let snapshot = h.client.store().events_snapshot().await;
    assert_eq!(snapshot.status, ListStatus::Idle);
    assert!(snapshot.error.is_none());
    assert_eq!(snapshot.items.len(), 1);
}

#[tokio::test]
async fn test_optimistic_post_replaced_by_confirmed_id() {
    let h = Harness::new();
    let client = Arc::new(h.client);
    *h.api.create_post.lock().unwrap() = Ok(post("42", "hello"));
    let gate = h.api.gate_create_post();

    let task = {
        let client = client.clone();
        tokio::spawn(async move { client.create_post("hello").await })
    };

    eventually("placeholder visible", || async {
        let posts = client.store().posts().await;
        let first = posts.ids().next().map(str::to_string);
        first.is_some_and(|id| {
            id.starts_with("tmp-")
                && posts.entry(&id).is_some_and(|e| e.origin == WriteOrigin::Optimistic)
        })
    })
    .await;

    gate.notify_one();
    let confirmed = task.await.unwrap().unwrap();
    assert_eq!(confirmed.id, "42");

    let posts = client.store().posts().await;
    let ids: Vec<&str> = posts.ids().collect();
    assert_eq!(ids, vec!["42"]);
    assert!(!posts.ids().any(|id| id.starts_with("tmp-")));
    assert_eq!(posts.entry("42").unwrap().origin, WriteOrigin::Confirmed);
}

#[tokio::test]
async fn test_rejected_post_removes_placeholder() {
    let h = Harness::new();
    *h.api.posts.lock().unwrap() = Ok(vec![post("1", "older")]);
    h.client.fetch_posts().await.unwrap();
    *h.api.create_post.lock().unwrap() = Err(ApiError::with_status("Content required", 400));

    let result = h.client.create_post("   ").await;
    assert!(result.is_err());

    let posts = h.client.store().posts_snapshot().await;
    let ids: Vec<&str> = posts.items.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["1"]);
}

#[tokio::test]
async fn test_dropped_caller_still_confirms_post() {
    let h = Harness::new();
    let client = Arc::new(h.client);
    *h.api.create_post.lock().unwrap() = Ok(post("77", "draft"));
    let gate = h.api.gate_create_post();

    let caller = {
        let client = client.clone();
        tokio::spawn(async move { client.create_post("draft").await })
    };
    eventually("placeholder visible", || async {
        client.store().posts().await.len() == 1
    })
    .await;

    caller.abort();
    gate.notify_one();

    eventually("confirmed copy", || async {
        let posts = client.store().posts().await;
        posts.contains("77") && posts.len() == 1
    })
    .await;
}

#[tokio::test]
async fn test_refetch_keeps_pending_placeholder() {
    let h = Harness::new();
    let client = Arc::new(h.client);
    *h.api.create_post.lock().unwrap() = Ok(post("42", "new"));
    let gate = h.api.gate_create_post();

    let task = {
        let client = client.clone();
        tokio::spawn(async move { client.create_post("new").await })
    };
    eventually("placeholder visible", || async {
        client.store().posts().await.len() == 1
    })
    .await;

    *h.api.posts.lock().unwrap() = Ok(vec![post("1", "older")]);
    client.fetch_posts().await.unwrap();
    {
        let posts = client.store().posts().await;
        let ids: Vec<&str> = posts.ids().collect();
        assert_eq!(ids.len(), 2);
        assert!(ids[0].starts_with("tmp-"));
        assert_eq!(ids[1], "1");
    }

    gate.notify_one();
    task.await.unwrap().unwrap();
    let posts = client.store().posts().await;
    assert_eq!(posts.ids().collect::<Vec<_>>(), vec!["42", "1"]);
}

#[tokio::test]
async fn test_unread_count_tracks_reads() {
    let h = Harness::new();
    *h.api.notifications.lock().unwrap() = Ok(vec![
        notification("a", false),
        notification("b", false),
        notification("c", true),
    ]);
    h.client.fetch_notifications().await.unwrap();
    assert_eq!(h.client.store().unread_count().await, 2);

    assert_eq!(h.client.refresh_unread_count().await.unwrap(), 2);

    h.client.mark_all_notifications_read().await.unwrap();
    assert_eq!(h.client.store().unread_count().await, 0);
}

#[tokio::test]
async fn test_post_message_appends_confirmed() {
    let h = Harness::new();
    let sent = h.client.post_message("c1", "see you there").await.unwrap();
    assert_eq!(sent.content, "see you there");

    let messages = h.client.store().messages().await;
    let thread = messages.thread("c1").unwrap();
    assert_eq!(thread.entry("sent-1").unwrap().origin, WriteOrigin::Confirmed);
}

#[tokio::test]
async fn test_validate_session_rejects_bad_credential() {
    let mut h = Harness::new();
    *h.api.current_user.lock().unwrap() = Err(ApiError::with_status("Unauthorized", 401));

    h.session.login("expired");
    let _server = h.next_server().await;
    let result = h.client.validate_session().await;

    assert!(matches!(result, Err(SyncError::Api(ref e)) if e.is_unauthorized()));
    assert!(h.session.current().is_none());
    eventually("link released", || async { h.transport.live() == 0 }).await;
}

#[tokio::test]
async fn test_validate_session_caches_user() {
    let h = Harness::new();
    assert!(h.client.validate_session().await.unwrap().is_none());

    h.session.login("good");
    let user = h.client.validate_session().await.unwrap().unwrap();
    assert_eq!(user.id, "u1");
    assert_eq!(h.client.store().user().await.get().map(|u| u.id.clone()), Some("u1".to_string()));
}

#[tokio::test]
async fn test_switching_user_clears_caches() {
    let mut h = Harness::new();
    h.session.login("alice");
    let _a = h.next_server().await;
    *h.api.events.lock().unwrap() = Ok(vec![event("e1")]);
    h.client.fetch_events().await.unwrap();

    h.session.login("bob");
    let _b = h.next_server().await;
    eventually("caches cleared", || async {
        h.client.store().events().await.is_empty()
    })
    .await;
}

#[tokio::test]
async fn test_refresh_keeps_caches() {
    let mut h = Harness::new();
    h.session.login("alice");
    let _a = h.next_server().await;
    *h.api.events.lock().unwrap() = Ok(vec![event("e1")]);
    h.client.fetch_events().await.unwrap();

    h.session.refresh("alice-2");
    let renewed = h.next_server().await;
    assert_eq!(renewed.token, "alice-2");
    assert!(h.client.store().events().await.contains("e1"));
}

#[tokio::test]
async fn test_late_validation_failure_keeps_next_login() {
    let h = Harness::new();
    *h.api.current_user.lock().unwrap() = Err(ApiError::with_status("Unauthorized", 401));
    let gate = h.api.gate_current_user();
    h.session.login("token-a");

    let switch_user = async {
        h.session.logout();
        h.session.login("token-b");
        gate.notify_one();
    };
    let (result, ()) = tokio::join!(h.client.validate_session(), switch_user);

    assert!(matches!(result, Err(SyncError::Api(ref e)) if e.is_unauthorized()));
    let current = h.session.current().map(|c| c.token().to_string());
    assert_eq!(current, Some("token-b".to_string()));
}

#[tokio::test]
async fn test_response_after_logout_is_discarded() {
    let mut h = Harness::new();
    h.session.login("token-a");
    let _server = h.next_server().await;
    *h.api.events.lock().unwrap() = Ok(vec![event("e-private")]);
    let gate = h.api.gate_events();
    let client = Arc::new(h.client);

    let fetch = {
        let client = client.clone();
        tokio::spawn(async move { client.fetch_events().await })
    };
    eventually("fetch started", || async {
        client.store().events().await.is_loading()
    })
    .await;

    let epoch = client.store().epoch();
    h.session.logout();
    eventually("caches reset", || async { client.store().epoch() != epoch }).await;
    gate.notify_one();

    let result = fetch.await.unwrap();
    assert!(matches!(result, Err(SyncError::SessionChanged)));
    assert!(client.store().events().await.is_empty());
}

#[tokio::test]
async fn test_failed_single_fetch_flags_cached_entry() {
    let h = Harness::new();
    *h.api.events.lock().unwrap() = Ok(vec![event("e1")]);
    h.client.fetch_events().await.unwrap();

    *h.api.event.lock().unwrap() = Err(ApiError::with_status("Service unavailable", 503));
    assert!(h.client.fetch_event("e1").await.is_err());
    {
        let events = h.client.store().events().await;
        let entry = events.entry("e1").unwrap();
        assert_eq!(entry.status, EntryStatus::Error);
        assert_eq!(entry.error.as_deref(), Some("Service unavailable"));
        assert_eq!(entry.data.id, "e1");
    }

    *h.api.event.lock().unwrap() = Ok(event("e1"));
    h.client.fetch_event("e1").await.unwrap();
    let events = h.client.store().events().await;
    assert_eq!(events.entry("e1").unwrap().status, EntryStatus::Idle);
}

#[tokio::test]
async fn test_select_conversation_exposes_selection() {
    let h = Harness::new();
    *h.api.conversations.lock().unwrap() = Ok(vec![conversation("c1"), conversation("c2")]);
    h.client.fetch_conversations().await.unwrap();

    assert!(h.client.select_conversation(Some("c2")).await);
    assert_eq!(
        h.client.store().messages().await.selected().map(|c| c.id.clone()),
        Some("c2".to_string())
    );

    assert!(!h.client.select_conversation(Some("missing")).await);
    assert!(h.client.select_conversation(None).await);
    assert!(h.client.store().messages().await.selected().is_none());
}
