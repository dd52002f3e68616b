/// Search dispatcher tests: debounce and out-of-order responses
mod common;

use agora_sync::cache::SearchPhase;
use agora_sync::model::SearchFilter;
use agora_sync::Config;
use common::{eventually, Harness};
use std::time::Duration;
use tokio::time::sleep;

#[tokio::test(start_paused = true)]
async fn test_keystrokes_within_window_dispatch_once_with_last_input() {
    let h = Harness::new();

    for text in ["r", "ru", "rus"] {
        h.client.on_query_changed(text, SearchFilter::All).await;
        sleep(Duration::from_millis(100)).await;
    }
    h.client.on_query_changed("rust", SearchFilter::Events).await;

    sleep(Duration::from_millis(250)).await;
    assert!(h.api.searches().is_empty());
    assert_eq!(h.client.store().search().await.phase(), SearchPhase::Debouncing);

    sleep(Duration::from_millis(100)).await;
    eventually("settled", || async {
        h.client.store().search().await.phase() == SearchPhase::Settled
    })
    .await;
    assert_eq!(h.api.searches(), vec![("rust".to_string(), SearchFilter::Events)]);
}

#[tokio::test(start_paused = true)]
async fn test_out_of_order_responses_settle_on_newest() {
    let h = Harness::new();
    let gates: Vec<_> = ["q1", "q2", "q3"]
        .iter()
        .map(|q| h.api.gate_search(q))
        .collect();

    for q in ["q1", "q2", "q3"] {
        h.client.on_query_changed(q, SearchFilter::All).await;
        sleep(Duration::from_millis(350)).await;
    }
    assert_eq!(h.api.searches().len(), 3);

    // responses arrive 2, 1, 3
    gates[1].notify_one();
    sleep(Duration::from_millis(20)).await;
    gates[0].notify_one();
    sleep(Duration::from_millis(20)).await;
    {
        let search = h.client.store().search().await;
        assert!(search.results().results.is_empty());
        assert_eq!(search.phase(), SearchPhase::InFlight);
    }

    gates[2].notify_one();
    eventually("q3 answered", || async {
        h.client.store().search().await.phase() == SearchPhase::Settled
    })
    .await;

    let search = h.client.store().search().await;
    assert_eq!(search.results().seq, search.highest_seq());
    assert_eq!(search.results().results.users[0].id, "q3");
}

#[tokio::test(start_paused = true)]
async fn test_blank_query_clears_immediately() {
    let h = Harness::new();
    let gate = h.api.gate_search("rust");

    h.client.on_query_changed("rust", SearchFilter::All).await;
    sleep(Duration::from_millis(350)).await;
    assert_eq!(h.client.store().search().await.phase(), SearchPhase::InFlight);

    h.client.on_query_changed("   ", SearchFilter::All).await;
    {
        let search = h.client.store().search().await;
        assert_eq!(search.phase(), SearchPhase::Idle);
        assert!(search.query().is_empty());
    }

    // the earlier response is now stale
    gate.notify_one();
    sleep(Duration::from_millis(50)).await;
    let search = h.client.store().search().await;
    assert_eq!(search.phase(), SearchPhase::Idle);
    assert!(search.results().results.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_clear_cancels_pending_debounce() {
    let h = Harness::new();
    h.client.on_query_changed("rust", SearchFilter::All).await;
    sleep(Duration::from_millis(100)).await;
    h.client.on_query_changed("", SearchFilter::All).await;

    sleep(Duration::from_secs(1)).await;
    assert!(h.api.searches().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_filter_toggle_alone_dispatches_again() {
    let h = Harness::new();
    h.client.on_query_changed("ana", SearchFilter::All).await;
    sleep(Duration::from_millis(350)).await;
    h.client.on_query_changed("ana", SearchFilter::Users).await;
    sleep(Duration::from_millis(350)).await;

    eventually("settled", || async {
        h.client.store().search().await.phase() == SearchPhase::Settled
    })
    .await;
    assert_eq!(
        h.api.searches(),
        vec![
            ("ana".to_string(), SearchFilter::All),
            ("ana".to_string(), SearchFilter::Users)
        ]
    );
    assert_eq!(h.client.store().search().await.highest_seq(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_custom_debounce_window() {
    let config = Config {
        search_debounce: Duration::from_millis(50),
        ..Config::default()
    };
    let h = Harness::with_config(config);
    h.client.on_query_changed("go", SearchFilter::All).await;
    sleep(Duration::from_millis(60)).await;
    eventually("dispatched", || async { h.api.searches().len() == 1 }).await;
}

#[tokio::test(start_paused = true)]
async fn test_cancel_superseded_keeps_newest_result() {
    let config = Config {
        search_cancel_superseded: true,
        ..Config::default()
    };
    let h = Harness::with_config(config);
    let slow = h.api.gate_search("slow");

    h.client.on_query_changed("slow", SearchFilter::All).await;
    sleep(Duration::from_millis(350)).await;
    h.client.on_query_changed("fast", SearchFilter::All).await;
    sleep(Duration::from_millis(350)).await;

    eventually("fast settled", || async {
        h.client.store().search().await.phase() == SearchPhase::Settled
    })
    .await;
    slow.notify_one();
    sleep(Duration::from_millis(50)).await;

    let search = h.client.store().search().await;
    assert_eq!(search.results().results.users[0].id, "fast");
}
