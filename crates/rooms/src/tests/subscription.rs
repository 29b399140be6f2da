use futures::StreamExt;

use crate::error::DirectoryError;
use crate::tests::support::{directory, eventually, next_update, room_ids, text_message, TestStore};

fn pair(a: &str, b: &str) -> Vec<String> {
    vec![a.to_string(), b.to_string()]
}

#[tokio::test]
async fn starts_with_current_rooms() {
    let _ = tracing_subscriber::fmt::try_init();
    let store = TestStore::new();
    let directory = directory(&store);
    directory.ensure_room_exists("ab", pair("alice", "bob")).await.unwrap();
    directory
        .open_message_feed("ab")
        .unwrap()
        .insert(&text_message("m1", 1, "bob", "hi"))
        .await
        .unwrap();

    let mut subscription = directory.subscribe_to_rooms_for_user("alice").await.unwrap();
    let rooms = next_update(&mut subscription).await;

    assert_eq!(room_ids(&rooms), vec!["ab"]);
    assert_eq!(rooms[0].latest_message.as_ref().unwrap().id, "m1");
    assert_eq!(rooms[0].other_user.as_ref().unwrap().user_id, "bob");
}

#[tokio::test]
async fn follows_room_creation_and_deletion() {
    let store = TestStore::new();
    let directory = directory(&store);
    let mut subscription = directory.subscribe_to_rooms_for_user("alice").await.unwrap();
    assert!(next_update(&mut subscription).await.is_empty());

    directory.ensure_room_exists("ab", pair("alice", "bob")).await.unwrap();
    assert_eq!(room_ids(&next_update(&mut subscription).await), vec!["ab"]);

    // rooms without alice do not change her list
    directory.ensure_room_exists("bc", pair("bob", "carol")).await.unwrap();
    directory.ensure_room_exists("ac", pair("alice", "carol")).await.unwrap();
    assert_eq!(room_ids(&next_update(&mut subscription).await), vec!["ab", "ac"]);

    directory.delete_room_and_messages("ab").await.unwrap();
    assert_eq!(room_ids(&next_update(&mut subscription).await), vec!["ac"]);
}

#[tokio::test]
async fn new_message_refreshes_latest() {
    let store = TestStore::new();
    let directory = directory(&store);
    directory.ensure_room_exists("ab", pair("alice", "bob")).await.unwrap();
    let mut subscription = directory.subscribe_to_rooms_for_user("alice").await.unwrap();
    let rooms = next_update(&mut subscription).await;
    assert!(rooms[0].latest_message.is_none());

    let feed = directory.open_message_feed("ab").unwrap();
    feed.insert(&text_message("m1", 100, "bob", "first")).await.unwrap();
    let rooms = next_update(&mut subscription).await;
    assert_eq!(rooms[0].latest_message.as_ref().unwrap().id, "m1");

    // an older message leaves the newest one in place, so the next update is m2
    feed.insert(&text_message("m0", 50, "bob", "older")).await.unwrap();
    feed.insert(&text_message("m2", 200, "alice", "second")).await.unwrap();
    let rooms = next_update(&mut subscription).await;
    assert_eq!(rooms[0].latest_message.as_ref().unwrap().id, "m2");
}

#[tokio::test]
async fn nested_feeds_are_replaced_not_leaked() {
    let store = TestStore::new();
    let directory = directory(&store);
    directory.ensure_room_exists("ab", pair("alice", "bob")).await.unwrap();
    directory.ensure_room_exists("ac", pair("alice", "carol")).await.unwrap();

    let mut subscription = directory.subscribe_to_rooms_for_user("alice").await.unwrap();
    next_update(&mut subscription).await;
    // the room query plus one feed per room
    eventually(|| store.memory.watcher_count() == 3).await;

    for round in 0..3 {
        directory
            .ensure_room_exists(&format!("ad{round}"), pair("alice", "dave"))
            .await
            .unwrap();
        next_update(&mut subscription).await;
        let expected = 1 + 3 + round;
        eventually(|| store.memory.watcher_count() == expected).await;
    }

    drop(subscription);
    eventually(|| store.memory.watcher_count() == 0).await;
}

#[tokio::test]
async fn cancel_ends_the_stream() {
    let store = TestStore::new();
    let directory = directory(&store);
    directory.ensure_room_exists("ab", pair("alice", "bob")).await.unwrap();
    let mut subscription = directory.subscribe_to_rooms_for_user("alice").await.unwrap();
    next_update(&mut subscription).await;

    let token = subscription.cancellation_token();
    subscription.cancel();
    assert!(token.is_cancelled());
    assert!(subscription.is_cancelled());
    assert_eq!(
        format!("{subscription:?}"),
        "RoomSubscription { cancelled: true, .. }"
    );

    let remaining = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        subscription.by_ref().collect::<Vec<_>>(),
    )
    .await
    .expect("stream should end after cancellation");
    assert!(remaining.is_empty());
    eventually(|| store.memory.watcher_count() == 0).await;
}

#[tokio::test]
async fn rejects_empty_user() {
    let store = TestStore::new();
    let directory = directory(&store);

    let err = directory.subscribe_to_rooms_for_user(" ").await.unwrap_err();
    assert!(matches!(err, DirectoryError::Validation(_)));
    assert_eq!(store.reads(), 0);
}

#[tokio::test]
async fn failing_refresh_is_reported() {
    let store = TestStore::new();
    let directory = directory(&store);
    directory.ensure_room_exists("ab", pair("alice", "bob")).await.unwrap();
    let mut subscription = directory.subscribe_to_rooms_for_user("alice").await.unwrap();
    next_update(&mut subscription).await;

    store.fail_queries_on("rooms/ac/messages");
    directory.ensure_room_exists("ac", pair("alice", "carol")).await.unwrap();
    let update = tokio::time::timeout(std::time::Duration::from_secs(5), subscription.next())
        .await
        .unwrap()
        .unwrap();
    assert!(update.is_err());
}
