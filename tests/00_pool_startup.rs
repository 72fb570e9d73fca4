mod support;

use std::time::Duration;

use tgbin::GatewayError;
use tgbin::store::ObjectRef;
use tgbin::store::memory::MemoryStore;

#[tokio::test]
async fn pool_recovers_from_flood_wait_at_startup() {
    let store = MemoryStore::new(support::TOKEN, support::CHANNEL);
    // Two sessions hit a (tiny) mandated wait on their first sign-in.
    store.flood_next_sign_in(Duration::from_millis(5));
    store.flood_next_sign_in(Duration::from_millis(5));

    let h = support::harness_over(store, 4).await;
    assert_eq!(h.pool.status().connected, 4);
}

#[tokio::test]
async fn partial_startup_leaves_pool_usable() {
    let store = MemoryStore::new(support::TOKEN, support::CHANNEL);
    // One session burns its whole retry budget.
    store.fail_sign_ins(3);

    let h = support::harness_over(store, 4).await;
    assert_eq!(h.pool.status().connected, 3);

    let id = h.store.put_object("song.mp3", support::patterned(4096));
    let info = h.streamer.get_info(id).await.expect("degraded pool still serves");
    assert_eq!(info.size, 4096);
}

#[tokio::test]
async fn zero_connected_sessions_error_instead_of_hanging() {
    // Wrong token everywhere: nothing connects.
    let store = MemoryStore::new("other:token", support::CHANNEL);
    let h = support::harness_over(store, 2).await;
    assert_eq!(h.pool.status().connected, 0);

    let id = h.store.put_object("song.mp3", vec![0u8; 16]);

    let info = h.streamer.get_info(id).await;
    assert!(matches!(
        info,
        Err(GatewayError::AuthFailure(_)) | Err(GatewayError::NotFound)
    ));

    let open = h.streamer.open(id, 0, 0).await;
    assert!(open.is_err());

    let missing = h.streamer.get_info(ObjectRef(9999)).await;
    assert!(missing.is_err());
}

#[tokio::test]
async fn stop_disconnects_every_session() {
    let h = support::harness(3).await;
    assert_eq!(h.pool.status().connected, 3);

    h.pool.stop().await;
    assert_eq!(h.pool.status().connected, 0);
}
