//! Hub integration tests over the in-memory store and bus: sequencing
//! under concurrent publishers, fan-out ordering, reconnect sync,
//! backpressure drops, and draft normalization.

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code

use gridcast_core::event::{EventBody, EventDraft};
use gridcast_core::stream::{StreamId, StreamKind};
use gridcast_hub::{HubConfig, HubError, StreamHub};
use gridcast_testing::mocks::{test_clock, InMemoryEventBus, InMemoryEventStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn hub_with(store: InMemoryEventStore, config: HubConfig) -> StreamHub {
    StreamHub::new(Arc::new(store), None, Arc::new(test_clock()), config)
}

fn fill_draft(row: usize, col: usize, value: &str) -> EventDraft {
    EventDraft {
        body: json!({
            "type": "cell_fill",
            "payload": { "row": row, "col": col, "value": value },
        }),
        user_id: Some("u-1".to_string()),
    }
}

async fn recv_timeout(sub: &mut gridcast_hub::Subscription) -> Option<gridcast_core::event::EventRecord> {
    tokio::time::timeout(Duration::from_secs(1), sub.recv())
        .await
        .expect("timed out waiting for event")
}

#[tokio::test]
async fn concurrent_publishers_get_contiguous_seqs() {
    // 100 tasks each append one cell_fill; expect seq 1..=100, no gaps, no
    // duplicates.
    let hub = Arc::new(hub_with(InMemoryEventStore::new(), HubConfig::default()));

    let mut handles = Vec::new();
    for i in 0..100_usize {
        let hub = Arc::clone(&hub);
        handles.push(tokio::spawn(async move {
            hub.publish(
                StreamKind::Game,
                StreamId::new("g2"),
                fill_draft(i / 10, i % 10, "X"),
            )
            .await
            .expect("publish succeeds")
        }));
    }
    for handle in handles {
        handle.await.expect("task completes");
    }

    let events = hub
        .sync(StreamKind::Game, StreamId::new("g2"))
        .await
        .expect("sync");
    let mut seqs: Vec<i64> = events.iter().map(|e| e.seq.value()).collect();
    seqs.sort_unstable();
    assert_eq!(seqs, (1..=100).collect::<Vec<i64>>());
}

#[tokio::test]
async fn every_subscriber_receives_every_event_in_order() {
    let hub = hub_with(InMemoryEventStore::new(), HubConfig::default());
    let gid = StreamId::new("g-fanout");

    let mut subs = Vec::new();
    for _ in 0..3 {
        subs.push(hub.subscribe(StreamKind::Game, gid.clone()).expect("subscribe"));
    }

    for i in 0..5_usize {
        hub.publish(StreamKind::Game, gid.clone(), fill_draft(0, i, "A"))
            .await
            .expect("publish");
    }

    for sub in &mut subs {
        for expected_seq in 1..=5_i64 {
            let event = recv_timeout(sub).await.expect("event delivered");
            assert_eq!(event.seq.value(), expected_seq);
        }
    }
}

#[tokio::test]
async fn reconnect_sync_then_live_push() {
    // Scenario: 5 events exist; a new client syncs, gets exactly those 5
    // in order, then receives the 6th by push.
    let hub = hub_with(InMemoryEventStore::new(), HubConfig::default());
    let gid = StreamId::new("g-sync");

    for i in 0..5_usize {
        hub.publish(StreamKind::Game, gid.clone(), fill_draft(0, i, "A"))
            .await
            .expect("publish");
    }

    let mut sub = hub.subscribe(StreamKind::Game, gid.clone()).expect("subscribe");
    let synced = hub.sync(StreamKind::Game, gid.clone()).await.expect("sync");
    let seqs: Vec<i64> = synced.iter().map(|e| e.seq.value()).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5]);

    hub.publish(StreamKind::Game, gid.clone(), fill_draft(1, 0, "B"))
        .await
        .expect("publish 6th");
    let pushed = recv_timeout(&mut sub).await.expect("push");
    assert_eq!(pushed.seq.value(), 6);
}

#[tokio::test]
async fn slow_subscriber_is_dropped_without_stalling_others() {
    let hub = Arc::new(hub_with(
        InMemoryEventStore::new(),
        HubConfig {
            subscriber_queue_capacity: 2,
            ..HubConfig::default()
        },
    ));
    let gid = StreamId::new("g-slow");

    let mut active = hub.subscribe(StreamKind::Game, gid.clone()).expect("subscribe");
    let _stalled = hub.subscribe(StreamKind::Game, gid.clone()).expect("subscribe");
    assert_eq!(hub.subscriber_count(StreamKind::Game, &gid), 2);

    // The active subscriber consumes each event before the next publish;
    // the stalled one never reads and overflows its 2-slot queue.
    for i in 0..5_usize {
        hub.publish(StreamKind::Game, gid.clone(), fill_draft(0, i, "A"))
            .await
            .expect("publish");
        let event = recv_timeout(&mut active).await.expect("active keeps receiving");
        assert_eq!(event.seq.value(), i64::try_from(i).unwrap() + 1);
    }

    // Only the backpressured subscriber was dropped.
    assert_eq!(hub.subscriber_count(StreamKind::Game, &gid), 1);
}

#[tokio::test]
async fn timestamp_sentinels_resolve_before_persistence() {
    let clock = test_clock();
    let now_ms = gridcast_core::clock::Clock::now_ms(&clock);
    let store = InMemoryEventStore::new();
    let hub = StreamHub::new(
        Arc::new(store),
        None,
        Arc::new(clock),
        HubConfig::default(),
    );

    let draft = EventDraft {
        body: json!({
            "type": "room_settings_update",
            "payload": { "settings": { "last_active": { ".sv": "timestamp" } } },
        }),
        user_id: Some("u-1".to_string()),
    };
    let record = hub
        .publish(StreamKind::Room, StreamId::new("r-1"), draft)
        .await
        .expect("publish");

    assert_eq!(record.ts, now_ms);
    match &record.body {
        EventBody::Room(gridcast_core::event::RoomEventBody::RoomSettingsUpdate { settings }) => {
            assert_eq!(settings["last_active"], json!(now_ms));
        }
        other => panic!("unexpected body: {other:?}"),
    }
}

#[tokio::test]
async fn invalid_draft_is_rejected_and_not_persisted() {
    let hub = hub_with(InMemoryEventStore::new(), HubConfig::default());
    let gid = StreamId::new("g-bad");

    let err = hub
        .publish(
            StreamKind::Game,
            gid.clone(),
            EventDraft {
                body: json!({ "type": "cell_sparkle", "payload": {} }),
                user_id: None,
            },
        )
        .await
        .expect_err("unknown tag rejected");
    assert!(matches!(err, HubError::Validation(_)));

    let err = hub
        .publish(
            StreamKind::Game,
            gid.clone(),
            EventDraft {
                body: json!({ "type": "cell_fill", "payload": { "row": "zero" } }),
                user_id: None,
            },
        )
        .await
        .expect_err("bad shape rejected");
    assert!(matches!(err, HubError::Validation(_)));

    let events = hub.sync(StreamKind::Game, gid).await.expect("sync");
    assert!(events.is_empty(), "nothing persisted on validation failure");
}

#[tokio::test]
async fn room_events_do_not_decode_on_game_streams() {
    let hub = hub_with(InMemoryEventStore::new(), HubConfig::default());
    let err = hub
        .publish(
            StreamKind::Game,
            StreamId::new("g-kind"),
            EventDraft {
                body: json!({ "type": "user_join", "payload": { "display_name": "ada" } }),
                user_id: None,
            },
        )
        .await
        .expect_err("room tag on game stream rejected");
    assert!(matches!(err, HubError::Validation(_)));
}

#[tokio::test]
async fn closed_hub_rejects_publish_and_subscribe() {
    let hub = hub_with(InMemoryEventStore::new(), HubConfig::default());
    let gid = StreamId::new("g-closed");
    let mut sub = hub.subscribe(StreamKind::Game, gid.clone()).expect("subscribe");

    hub.close();

    assert!(matches!(
        hub.subscribe(StreamKind::Game, gid.clone()),
        Err(HubError::Closed)
    ));
    let err = hub
        .publish(StreamKind::Game, gid, fill_draft(0, 0, "A"))
        .await
        .expect_err("publish after close");
    assert!(matches!(err, HubError::Closed));

    // Detached subscriber sees end of stream.
    assert!(sub.recv().await.is_none());
}

#[tokio::test]
async fn committed_order_fully_determines_projected_state() {
    // Delivery order of the append calls is scheduler-shuffled; the
    // committed sequence order is the only input to projection, so two
    // projections of the same stream are byte-identical.
    let hub = Arc::new(hub_with(InMemoryEventStore::new(), HubConfig::default()));
    let rid = StreamId::new("r-det");

    let mut handles = Vec::new();
    for i in 0..20_usize {
        let hub = Arc::clone(&hub);
        let rid = rid.clone();
        handles.push(tokio::spawn(async move {
            hub.publish(
                StreamKind::Room,
                rid,
                EventDraft {
                    body: json!({
                        "type": "chat_message",
                        "payload": { "display_name": format!("u{i}"), "message": format!("m{i}") },
                    }),
                    user_id: Some(format!("u{i}")),
                },
            )
            .await
            .expect("publish")
        }));
    }
    for handle in handles {
        handle.await.expect("task completes");
    }

    let events = hub.sync(StreamKind::Room, rid).await.expect("sync");
    let a = serde_json::to_vec(&gridcast_core::projection::project_room(&events))
        .expect("serialize a");
    let b = serde_json::to_vec(&gridcast_core::projection::project_room(&events))
        .expect("serialize b");
    assert_eq!(a, b);
}

#[tokio::test]
async fn bus_publish_failure_does_not_fail_local_publish() {
    // A hub with a bus but no remote subscribers: publish still succeeds
    // locally and the event persists.
    let store = InMemoryEventStore::new();
    let bus = InMemoryEventBus::new();
    let hub = StreamHub::new(
        Arc::new(store),
        Some(Arc::new(bus)),
        Arc::new(test_clock()),
        HubConfig::default(),
    );
    let gid = StreamId::new("g-busless");

    let record = hub
        .publish(StreamKind::Game, gid.clone(), fill_draft(0, 0, "A"))
        .await
        .expect("publish");
    assert_eq!(record.seq.value(), 1);

    let events = hub.sync(StreamKind::Game, gid).await.expect("sync");
    assert_eq!(events.len(), 1);
}
