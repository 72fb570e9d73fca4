use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use secrecy::SecretString;

use tgbin::GatewayResult;
use tgbin::gateway::{ObjectStream, SessionPool, Streamer, Uploader};
use tgbin::retry::RetryPolicy;
use tgbin::store::memory::MemoryStore;

#[allow(dead_code)]
pub const TOKEN: &str = "7001:test-token";
pub const CHANNEL: i64 = -1001_2345;

// -----------------------------------------------------------------------------
// ----- Harness ---------------------------------------------------------------

#[allow(dead_code)]
pub struct Harness {
    pub store: MemoryStore,
    pub pool: Arc<SessionPool>,
    pub streamer: Streamer,
    pub uploader: Uploader,
}

/// A started gateway over the in-memory store, with test-speed backoffs.
pub async fn harness(pool_size: usize) -> Harness {
    let store = MemoryStore::new(TOKEN, CHANNEL);
    harness_over(store, pool_size).await
}

pub async fn harness_over(store: MemoryStore, pool_size: usize) -> Harness {
    let pool = Arc::new(
        SessionPool::new(
            &store.connector(),
            pool_size,
            CHANNEL,
            SecretString::new(TOKEN.into()),
            None,
        )
        .with_policy(fast_policy()),
    );
    pool.start().await;

    Harness {
        store,
        streamer: Streamer::new(pool.clone()),
        uploader: Uploader::new(pool.clone()),
        pool,
    }
}

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_backoff: Duration::from_millis(1),
        flood_margin: Duration::from_millis(1),
    }
}

// -----------------------------------------------------------------------------
// ----- Helpers ---------------------------------------------------------------

/// Deterministic non-repeating-ish byte pattern for round-trip checks.
pub fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31) ^ (i >> 8)) as u8).collect()
}

/// Drain a chunk stream into one buffer.
#[allow(dead_code)]
pub async fn collect(mut object: ObjectStream) -> GatewayResult<Vec<u8>> {
    let mut out = Vec::with_capacity(object.window.length as usize);
    while let Some(chunk) = object.chunks.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}

/// Write `data` to a file inside `dir` and return its path.
#[allow(dead_code)]
pub async fn write_file(dir: &tempfile::TempDir, name: &str, data: &[u8]) -> std::path::PathBuf {
    let path = dir.path().join(name);
    tokio::fs::write(&path, data).await.expect("write test file");
    path
}
