mod support;

use futures_util::StreamExt;
use tgbin::GatewayError;
use tgbin::store::ObjectRef;

const MIB: usize = 1 << 20;

#[tokio::test]
async fn metadata_failover_when_one_session_can_see_the_object() {
    let h = support::harness(4).await;
    let id = h.store.put_object("track.mp3", support::patterned(256 * 1024));

    // Only session 3 can see the object.
    h.store.hide_from(0, id);
    h.store.hide_from(1, id);
    h.store.hide_from(2, id);

    // Whatever random offset the round-robin starts at, lookup must land on
    // the one sighted session.
    for _ in 0..10 {
        let info = h.streamer.get_info(id).await.expect("failover finds the object");
        assert_eq!(info.size, 256 * 1024);
    }
}

#[tokio::test]
async fn stale_channel_caches_recover_via_reresolution() {
    let h = support::harness(3).await;
    let id = h.store.put_object("track.mp3", support::patterned(64 * 1024));

    // Every session's entity cache has gone stale.
    h.store.mark_stale(0);
    h.store.mark_stale(1);
    h.store.mark_stale(2);

    let info = h.streamer.get_info(id).await.expect("refresh recovers");
    assert_eq!(info.size, 64 * 1024);
}

#[tokio::test]
async fn object_absent_everywhere_is_not_found() {
    let h = support::harness(3).await;
    let out = h.streamer.get_info(ObjectRef(424242)).await;
    assert!(matches!(out, Err(GatewayError::NotFound)));
}

#[tokio::test]
async fn mid_stream_failure_propagates_instead_of_resuming() {
    let h = support::harness(2).await;
    let content = support::patterned(4 * MIB);
    let id = h.store.put_object("track.mp3", content.clone());

    // Reads past 2 MiB fail on every session: the stream must emit the
    // leading chunks and then surface the error, never silently resume.
    h.store.fail_reads_at(id, (2 * MIB) as u64);

    let mut object = h.streamer.open(id, 0, 0).await.unwrap();
    let mut received = 0usize;
    let mut failed = false;
    while let Some(item) = object.chunks.next().await {
        match item {
            Ok(chunk) => {
                assert_eq!(&content[received..received + chunk.len()], &chunk[..]);
                received += chunk.len();
            }
            Err(err) => {
                assert!(matches!(err, GatewayError::TransferFailure(_)));
                failed = true;
                break;
            }
        }
    }
    assert!(failed, "stream ended without surfacing the fault");
    assert_eq!(received, 2 * MIB);
}

#[tokio::test]
async fn failure_before_first_chunk_is_a_clean_error() {
    let h = support::harness(2).await;
    let content = support::patterned(MIB);
    let id = h.store.put_object("track.mp3", content);

    // Every read fails from byte zero; no chunk is ever produced.
    h.store.fail_reads_at(id, 0);

    let object = h.streamer.open(id, 0, 0).await.unwrap();
    let out = support::collect(object).await;
    assert!(matches!(out, Err(GatewayError::TransferFailure(_))));
}

#[tokio::test]
async fn dropped_stream_releases_without_draining() {
    let h = support::harness(2).await;
    let id = h.store.put_object("big.mp4", support::patterned(8 * MIB));

    let mut object = h.streamer.open(id, 0, 0).await.unwrap();
    let first = object.chunks.next().await.unwrap().unwrap();
    assert_eq!(first.len(), MIB);

    // Consumer walks away; dropping the stream must not wedge the pool.
    drop(object);

    let info = h.streamer.get_info(id).await.unwrap();
    assert_eq!(info.size, (8 * MIB) as u64);
}
