use std::pin::Pin;
use std::sync::Arc;

use async_stream::try_stream;
use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use tracing::{debug, warn};

use crate::errors::{GatewayError, GatewayResult};
use crate::store::{FileInfo, ObjectRef, RemoteObject};

use super::pool::SessionPool;
use super::session::Session;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

/// Nominal size of chunks emitted to the caller.
pub const CHUNK_SIZE: usize = 1 << 20; // 1 MiB

/// Granularity of the backing store's chunked-fetch primitive.
pub const REQUEST_SIZE: usize = 512 * 1024;

// -----------------------------------------------------------------------------
// ----- ByteWindow ------------------------------------------------------------

/// The exact byte range a stream call will produce, clamped to the object.
/// Invariant: `offset + length <= size`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteWindow {
    pub offset: u64,
    pub length: u64,
}

impl ByteWindow {
    /// `limit <= 0` means "remainder of the file from `offset`".
    pub fn new(offset: u64, limit: i64, size: u64) -> Self {
        let offset = offset.min(size);
        let remainder = size - offset;
        let length = if limit <= 0 {
            remainder
        } else {
            (limit as u64).min(remainder)
        };
        Self { offset, length }
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Inclusive end offset, for `Content-Range` style reporting.
    pub fn end(&self) -> u64 {
        (self.offset + self.length).saturating_sub(1)
    }
}

// -----------------------------------------------------------------------------
// ----- ObjectStream ----------------------------------------------------------

/// A resolved, ready-to-consume range request: metadata for the HTTP layer
/// plus a lazy, finite, non-restartable chunk sequence.
pub struct ObjectStream {
    pub info: FileInfo,
    pub window: ByteWindow,
    pub chunks: Pin<Box<dyn Stream<Item = GatewayResult<Bytes>> + Send>>,
}

// -----------------------------------------------------------------------------
// ----- Streamer --------------------------------------------------------------

pub struct Streamer {
    pool: Arc<SessionPool>,
}

impl Streamer {
    pub fn new(pool: Arc<SessionPool>) -> Self {
        Self { pool }
    }

    /// Metadata for one object. Re-resolved on every call; per-session
    /// entity caches may be stale and the object itself never changes.
    pub async fn get_info(&self, id: ObjectRef) -> GatewayResult<FileInfo> {
        self.resolve(id).await.map(|obj| obj.info)
    }

    /// Open a byte-range stream. Resolution and session selection failures
    /// fail over across sessions; once chunks start flowing, a failure
    /// surfaces as a stream error and the caller re-issues the range.
    pub async fn open(&self, id: ObjectRef, offset: u64, limit: i64) -> GatewayResult<ObjectStream> {
        let info = self.resolve(id).await?.info;
        let window = ByteWindow::new(offset, limit, info.size);

        // First entry is the uniformly-random pick; the rest is the failover
        // order for errors that happen before the first chunk is emitted.
        let sessions = self.pool.read_order();
        if sessions.is_empty() {
            return Err(GatewayError::auth("no connected sessions"));
        }
        debug!(
            "streaming {id}: offset={} length={} via session {}",
            window.offset,
            window.length,
            sessions[0].id()
        );

        Ok(ObjectStream {
            info,
            window,
            chunks: Box::pin(chunk_stream(sessions, id, window)),
        })
    }
}

// -----------------------------------------------------------------------------
// ----- Streamer: Private -----------------------------------------------------

impl Streamer {
    /// Try each session in round-robin order (random start). A session that
    /// reports the object absent gets one cache-refresh retry before we move
    /// on; only when every session missed do we surface `NotFound`.
    async fn resolve(&self, id: ObjectRef) -> GatewayResult<RemoteObject> {
        let order = self.pool.read_order();
        if order.is_empty() {
            return Err(GatewayError::auth("no connected sessions"));
        }

        for session in order {
            match session.get_message_with_refresh(id).await {
                Ok(Some(obj)) => return Ok(obj),
                Ok(None) => debug!("session {} cannot see object {id}", session.id()),
                Err(err) => warn!("session {} metadata lookup failed: {err}", session.id()),
            }
        }
        Err(GatewayError::NotFound)
    }
}

// -----------------------------------------------------------------------------
// ----- Chunk stream ----------------------------------------------------------

/// Emit the window as ~`CHUNK_SIZE` chunks assembled from `REQUEST_SIZE`
/// underlying fetches. Offsets are monotonically increasing with no gaps or
/// overlaps; the stream ends at window exhaustion or a short/empty read.
fn chunk_stream(
    sessions: Vec<Arc<Session>>,
    id: ObjectRef,
    window: ByteWindow,
) -> impl Stream<Item = GatewayResult<Bytes>> + Send {
    try_stream! {
        let mut pos = window.offset;
        let mut remaining = window.length;
        let mut idx = 0usize;
        let mut emitted = false;

        'chunks: while remaining > 0 {
            let target = CHUNK_SIZE.min(remaining as usize);
            let mut buf = BytesMut::with_capacity(target);

            while buf.len() < target {
                let want = REQUEST_SIZE.min(target - buf.len());
                let piece = match sessions[idx].fetch_chunk(id, pos, want).await {
                    Ok(piece) => piece,
                    Err(err) if !emitted && idx + 1 < sessions.len() => {
                        idx += 1;
                        warn!(
                            "stream {id} failing over to session {} before first chunk: {err}",
                            sessions[idx].id()
                        );
                        continue;
                    }
                    Err(err) => Err(err)?,
                };

                let short = piece.len() < want;
                pos += piece.len() as u64;
                remaining -= piece.len() as u64;
                buf.extend_from_slice(&piece);

                if short {
                    // End of data underneath us.
                    if !buf.is_empty() {
                        yield buf.freeze();
                    }
                    break 'chunks;
                }
            }

            if !buf.is_empty() {
                emitted = true;
                yield buf.freeze();
            }
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1 << 20;

    #[test]
    fn window_defaults_to_remainder_when_limit_nonpositive() {
        let w = ByteWindow::new(100, 0, 1000);
        assert_eq!(w, ByteWindow { offset: 100, length: 900 });
        let w = ByteWindow::new(100, -1, 1000);
        assert_eq!(w.length, 900);
    }

    #[test]
    fn window_clamps_to_object_size() {
        // Last 10 bytes of a 10 MiB object, asked with a 100-byte limit.
        let size = 10 * MIB;
        let w = ByteWindow::new(size - 10, 100, size);
        assert_eq!(w.offset, size - 10);
        assert_eq!(w.length, 10);
        assert_eq!(w.offset + w.length, size);
    }

    #[test]
    fn window_past_the_end_is_empty() {
        let w = ByteWindow::new(2000, 10, 1000);
        assert_eq!(w.offset, 1000);
        assert!(w.is_empty());
    }

    #[test]
    fn window_on_empty_object_is_empty() {
        assert!(ByteWindow::new(0, 0, 0).is_empty());
    }

    #[test]
    fn window_end_is_inclusive() {
        let w = ByteWindow::new(0, 1024, 4096);
        assert_eq!(w.end(), 1023);
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
