//! In-memory implementation of the store capability.
//!
//! The wire protocol behind the real backing store is out of scope, so this
//! is what the binary runs against in dev mode and what the integration
//! tests drive the gateway with. One [`MemoryStore`] plays the remote side;
//! every client minted by its connector is an independent "connection" with
//! its own auth state, the way real sessions are.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::errors::{GatewayError, GatewayResult};
use crate::proxy::ProxyCandidate;

use super::{
    ChannelHandle, FileInfo, MediaAttributes, ObjectRef, RawProgressFn, RemoteObject, StoreClient,
    StoreConnector, guess_mime,
};

// -----------------------------------------------------------------------------
// ----- MemoryStore -----------------------------------------------------------

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    token: String,
    channel_id: i64,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    next_msg_id: i64,
    next_client_id: usize,
    objects: HashMap<i64, StoredObject>,

    // Fault injection, consumed by tests.
    flood_on_sign_in: VecDeque<Duration>,
    failing_sign_ins: u32,
    blind: HashMap<usize, HashSet<i64>>,
    stale_handles: HashSet<usize>,
    read_faults: HashMap<i64, u64>,
}

#[derive(Clone)]
pub struct StoredObject {
    pub name: String,
    pub mime_type: String,
    pub data: Bytes,
    pub attrs: MediaAttributes,
    pub thumbnail: Option<Bytes>,
}

// -----------------------------------------------------------------------------
// ----- MemoryStore: Public ---------------------------------------------------

impl MemoryStore {
    pub fn new(token: impl Into<String>, channel_id: i64) -> Self {
        Self {
            inner: Arc::new(Inner {
                token: token.into(),
                channel_id,
                state: Mutex::new(State {
                    next_msg_id: 1,
                    ..State::default()
                }),
            }),
        }
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            inner: self.inner.clone(),
        }
    }

    /// Seed an object without going through the upload pipeline.
    pub fn put_object(&self, name: &str, data: impl Into<Bytes>) -> ObjectRef {
        let mut state = self.inner.state.lock();
        let id = state.next_msg_id;
        state.next_msg_id += 1;
        state.objects.insert(
            id,
            StoredObject {
                name: name.to_owned(),
                mime_type: guess_mime(name).to_owned(),
                data: data.into(),
                attrs: MediaAttributes::Plain,
                thumbnail: None,
            },
        );
        ObjectRef(id)
    }

    pub fn object(&self, id: ObjectRef) -> Option<StoredObject> {
        self.inner.state.lock().objects.get(&id.0).cloned()
    }

    /// The next `sign_in` on any client reports a flood wait of `wait`.
    pub fn flood_next_sign_in(&self, wait: Duration) {
        self.inner.state.lock().flood_on_sign_in.push_back(wait);
    }

    /// Fail the next `n` sign-ins outright, regardless of token.
    pub fn fail_sign_ins(&self, n: u32) {
        self.inner.state.lock().failing_sign_ins = n;
    }

    /// Make `client_id` unable to see `id` (simulates divergent session
    /// state). Client ids are assigned in creation order, starting at 0.
    pub fn hide_from(&self, client_id: usize, id: ObjectRef) {
        let mut state = self.inner.state.lock();
        state.blind.entry(client_id).or_default().insert(id.0);
    }

    /// Make `client_id` see nothing until it re-resolves the channel.
    pub fn mark_stale(&self, client_id: usize) {
        self.inner.state.lock().stale_handles.insert(client_id);
    }

    /// Reads on `id` fail once they reach `offset`.
    pub fn fail_reads_at(&self, id: ObjectRef, offset: u64) {
        self.inner.state.lock().read_faults.insert(id.0, offset);
    }
}

// -----------------------------------------------------------------------------
// ----- MemoryConnector -------------------------------------------------------

#[derive(Clone)]
pub struct MemoryConnector {
    inner: Arc<Inner>,
}

impl StoreConnector for MemoryConnector {
    fn create(&self) -> Box<dyn StoreClient> {
        let id = {
            let mut state = self.inner.state.lock();
            let id = state.next_client_id;
            state.next_client_id += 1;
            id
        };
        Box::new(MemoryStoreClient {
            inner: self.inner.clone(),
            id,
            connected: AtomicBool::new(false),
            signed_in: AtomicBool::new(false),
        })
    }
}

// -----------------------------------------------------------------------------
// ----- MemoryStoreClient -----------------------------------------------------

pub struct MemoryStoreClient {
    inner: Arc<Inner>,
    id: usize,
    connected: AtomicBool,
    signed_in: AtomicBool,
}

impl MemoryStoreClient {
    fn ensure_usable(&self) -> GatewayResult<()> {
        if !self.connected.load(Ordering::SeqCst) || !self.signed_in.load(Ordering::SeqCst) {
            return Err(GatewayError::auth("client not signed in"));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreClient for MemoryStoreClient {
    async fn connect(&self, _proxy: Option<&ProxyCandidate>) -> GatewayResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn sign_in(&self, token: &str) -> GatewayResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(GatewayError::auth("sign_in before connect"));
        }
        {
            let mut state = self.inner.state.lock();
            if let Some(wait) = state.flood_on_sign_in.pop_front() {
                return Err(GatewayError::RateLimited { wait });
            }
            if state.failing_sign_ins > 0 {
                state.failing_sign_ins -= 1;
                return Err(GatewayError::transfer("injected sign-in failure"));
            }
        }
        if token != self.inner.token {
            return Err(GatewayError::auth("bad token"));
        }
        self.signed_in.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn resolve_channel(&self, channel_id: i64) -> GatewayResult<ChannelHandle> {
        self.ensure_usable()?;
        if channel_id != self.inner.channel_id {
            return Err(GatewayError::NotFound);
        }
        self.inner.state.lock().stale_handles.remove(&self.id);
        Ok(ChannelHandle {
            channel_id,
            // The memory store has no real access hashes; derive one so
            // handles compare meaningfully in tests.
            access_hash: channel_id.wrapping_mul(31),
        })
    }

    async fn get_message(
        &self,
        channel: &ChannelHandle,
        id: ObjectRef,
    ) -> GatewayResult<Option<RemoteObject>> {
        self.ensure_usable()?;
        if channel.channel_id != self.inner.channel_id {
            return Ok(None);
        }
        let state = self.inner.state.lock();
        if state.stale_handles.contains(&self.id) {
            return Ok(None);
        }
        if let Some(blind) = state.blind.get(&self.id) {
            if blind.contains(&id.0) {
                return Ok(None);
            }
        }
        Ok(state.objects.get(&id.0).map(|obj| RemoteObject {
            id,
            info: FileInfo {
                name: obj.name.clone(),
                mime_type: obj.mime_type.clone(),
                size: obj.data.len() as u64,
            },
        }))
    }

    async fn send_file(
        &self,
        channel: &ChannelHandle,
        path: &Path,
        filename: &str,
        attrs: &MediaAttributes,
        thumbnail: Option<&Path>,
        progress: Option<RawProgressFn>,
    ) -> GatewayResult<ObjectRef> {
        self.ensure_usable()?;
        if channel.channel_id != self.inner.channel_id {
            return Err(GatewayError::NotFound);
        }

        let data = tokio::fs::read(path).await?;
        let total = data.len() as u64;
        if let Some(progress) = &progress {
            // Report in two halves so wrappers see intermediate progress.
            progress(total / 2, total);
            progress(total, total);
        }

        let thumb = match thumbnail {
            Some(p) => Some(Bytes::from(tokio::fs::read(p).await?)),
            None => None,
        };

        let mut state = self.inner.state.lock();
        let id = state.next_msg_id;
        state.next_msg_id += 1;
        state.objects.insert(
            id,
            StoredObject {
                name: filename.to_owned(),
                mime_type: guess_mime(filename).to_owned(),
                data: Bytes::from(data),
                attrs: attrs.clone(),
                thumbnail: thumb,
            },
        );
        Ok(ObjectRef(id))
    }

    async fn fetch_chunk(
        &self,
        channel: &ChannelHandle,
        id: ObjectRef,
        offset: u64,
        len: usize,
    ) -> GatewayResult<Bytes> {
        self.ensure_usable()?;
        if channel.channel_id != self.inner.channel_id {
            return Err(GatewayError::NotFound);
        }
        let state = self.inner.state.lock();
        if let Some(fault_at) = state.read_faults.get(&id.0) {
            if offset >= *fault_at {
                return Err(GatewayError::transfer("injected read failure"));
            }
        }
        let obj = state.objects.get(&id.0).ok_or(GatewayError::NotFound)?;
        let size = obj.data.len() as u64;
        if offset >= size {
            return Ok(Bytes::new());
        }
        let end = (offset + len as u64).min(size);
        Ok(obj.data.slice(offset as usize..end as usize))
    }

    async fn disconnect(&self) {
        self.signed_in.store(false, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "123:abc";
    const CHANNEL: i64 = -100_1234;

    async fn signed_in_client(store: &MemoryStore) -> Box<dyn StoreClient> {
        let client = store.connector().create();
        client.connect(None).await.unwrap();
        client.sign_in(TOKEN).await.unwrap();
        client
    }

    #[tokio::test]
    async fn sign_in_requires_connect_and_token() {
        let store = MemoryStore::new(TOKEN, CHANNEL);
        let client = store.connector().create();

        assert!(client.sign_in(TOKEN).await.is_err());
        client.connect(None).await.unwrap();
        assert!(matches!(
            client.sign_in("wrong").await,
            Err(GatewayError::AuthFailure(_))
        ));
        client.sign_in(TOKEN).await.unwrap();
    }

    #[tokio::test]
    async fn fetch_chunk_clamps_and_signals_eof() {
        let store = MemoryStore::new(TOKEN, CHANNEL);
        let id = store.put_object("track.mp3", vec![7u8; 100]);
        let client = signed_in_client(&store).await;
        let handle = client.resolve_channel(CHANNEL).await.unwrap();

        let chunk = client.fetch_chunk(&handle, id, 90, 64).await.unwrap();
        assert_eq!(chunk.len(), 10);
        let eof = client.fetch_chunk(&handle, id, 100, 64).await.unwrap();
        assert!(eof.is_empty());
    }

    #[tokio::test]
    async fn stale_handle_hides_objects_until_reresolve() {
        let store = MemoryStore::new(TOKEN, CHANNEL);
        let id = store.put_object("track.mp3", vec![1u8; 8]);
        let client = signed_in_client(&store).await;
        let handle = client.resolve_channel(CHANNEL).await.unwrap();

        store.mark_stale(0);
        assert!(client.get_message(&handle, id).await.unwrap().is_none());

        let handle = client.resolve_channel(CHANNEL).await.unwrap();
        assert!(client.get_message(&handle, id).await.unwrap().is_some());
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
