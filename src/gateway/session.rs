use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};

use crate::errors::{GatewayError, GatewayResult};
use crate::proxy::ProxyCandidate;
use crate::retry::RetryPolicy;
use crate::store::{
    ChannelHandle, MediaAttributes, ObjectRef, RawProgressFn, RemoteObject, StoreClient,
};

// -----------------------------------------------------------------------------
// ----- Session ---------------------------------------------------------------

/// One authenticated, independently-connected handle to the backing store.
/// Sessions are shared behind `Arc` and borrowed per-operation; the only
/// state a session mutates is its own channel-handle cache.
pub struct Session {
    id: usize,
    client: Box<dyn StoreClient>,
    bin_channel: i64,
    connected: AtomicBool,
    channel: RwLock<Option<ChannelHandle>>,
}

impl Session {
    pub fn new(id: usize, client: Box<dyn StoreClient>, bin_channel: i64) -> Self {
        Self {
            id,
            client,
            bin_channel,
            connected: AtomicBool::new(false),
            channel: RwLock::new(None),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// -----------------------------------------------------------------------------
// ----- Session: Lifecycle ----------------------------------------------------

impl Session {
    /// Connect and sign in under `policy`. A `RateLimited` failure sleeps the
    /// mandated wait (plus margin) inside the policy before the retry.
    pub async fn start(
        &self,
        token: &SecretString,
        proxy: Option<&ProxyCandidate>,
        policy: &RetryPolicy,
    ) -> GatewayResult<()> {
        let what = format!("session {} startup", self.id);
        policy
            .run(&what, || async {
                self.client.connect(proxy).await?;
                self.client.sign_in(token.expose_secret()).await
            })
            .await
            .map_err(|err| match err {
                err @ GatewayError::AuthFailure(_) => err,
                // Whatever the transport said, the outcome is a session that
                // could not authenticate within its budget.
                other => GatewayError::auth(other),
            })?;

        self.connected.store(true, Ordering::SeqCst);
        info!("session {} connected", self.id);
        Ok(())
    }

    pub async fn stop(&self) {
        self.client.disconnect().await;
        self.connected.store(false, Ordering::SeqCst);
    }
}

// -----------------------------------------------------------------------------
// ----- Session: Channel cache ------------------------------------------------

impl Session {
    /// Cached bin-channel handle, resolving lazily on first use.
    pub async fn channel(&self) -> GatewayResult<ChannelHandle> {
        if let Some(handle) = *self.channel.read() {
            return Ok(handle);
        }
        self.resolve_channel().await
    }

    /// Force a fresh resolution, replacing the cache.
    pub async fn resolve_channel(&self) -> GatewayResult<ChannelHandle> {
        let handle = self.client.resolve_channel(self.bin_channel).await?;
        *self.channel.write() = Some(handle);
        Ok(handle)
    }

    /// Drop the cached handle; the next use re-resolves.
    pub fn invalidate_channel(&self) {
        *self.channel.write() = None;
    }

    /// Eagerly warm the cache at startup. Failure is non-fatal; first use
    /// will try again.
    pub async fn warm_channel(&self) {
        if let Err(err) = self.resolve_channel().await {
            warn!("session {} could not resolve bin channel: {err}", self.id);
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Session: Store operations ---------------------------------------------

impl Session {
    pub async fn get_message(&self, id: ObjectRef) -> GatewayResult<Option<RemoteObject>> {
        let handle = self.channel().await?;
        self.client.get_message(&handle, id).await
    }

    pub async fn send_file(
        &self,
        path: &Path,
        filename: &str,
        attrs: &MediaAttributes,
        thumbnail: Option<&Path>,
        progress: Option<RawProgressFn>,
    ) -> GatewayResult<ObjectRef> {
        let handle = self.channel().await?;
        self.client
            .send_file(&handle, path, filename, attrs, thumbnail, progress)
            .await
    }

    pub async fn fetch_chunk(
        &self,
        id: ObjectRef,
        offset: u64,
        len: usize,
    ) -> GatewayResult<Bytes> {
        let handle = self.channel().await?;
        self.client.fetch_chunk(&handle, id, offset, len).await
    }

    /// Disambiguate an absent message from a stale per-session entity cache:
    /// re-resolve once and retry before giving up on this session.
    pub async fn get_message_with_refresh(
        &self,
        id: ObjectRef,
    ) -> GatewayResult<Option<RemoteObject>> {
        match self.get_message(id).await {
            Ok(Some(obj)) => Ok(Some(obj)),
            Ok(None) => {
                self.invalidate_channel();
                self.resolve_channel().await?;
                self.get_message(id).await
            }
            Err(err) => Err(err),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("connected", &self.is_connected())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
