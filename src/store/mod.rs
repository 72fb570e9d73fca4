pub mod memory;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::GatewayResult;
use crate::proxy::ProxyCandidate;

// -----------------------------------------------------------------------------
// ----- ObjectRef -------------------------------------------------------------

/// Opaque reference to an uploaded object: the backing store's message id.
/// Handed to the external catalog, handed back to fetch metadata or bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectRef(pub i64);

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// -----------------------------------------------------------------------------
// ----- ChannelHandle ---------------------------------------------------------

/// A resolved entity for the bin channel. Resolution may go stale on a
/// per-session basis; sessions cache and re-resolve their own handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelHandle {
    pub channel_id: i64,
    pub access_hash: i64,
}

// -----------------------------------------------------------------------------
// ----- FileInfo --------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub mime_type: String,
    pub size: u64,
}

/// One message fetched by id, carrying its media metadata.
#[derive(Clone, Debug)]
pub struct RemoteObject {
    pub id: ObjectRef,
    pub info: FileInfo,
}

// -----------------------------------------------------------------------------
// ----- MediaAttributes -------------------------------------------------------

/// Protocol-level attributes derived from the file being uploaded. The
/// filename attribute is always sent alongside, whatever the variant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MediaAttributes {
    Audio {
        duration_secs: u32,
        title: Option<String>,
        performer: Option<String>,
    },
    Video {
        duration_secs: u32,
        supports_streaming: bool,
    },
    Plain,
}

// -----------------------------------------------------------------------------
// ----- Progress --------------------------------------------------------------

/// Raw transfer progress as reported by the store: (bytes sent, total bytes).
pub type RawProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

// -----------------------------------------------------------------------------
// ----- StoreClient -----------------------------------------------------------

/// The backing store as a capability. One implementor instance is one
/// independent network connection with its own auth state; the gateway never
/// sees the wire protocol behind it.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Open the network connection, optionally through a relay.
    async fn connect(&self, proxy: Option<&ProxyCandidate>) -> GatewayResult<()>;

    /// Authenticate with the shared service token. May fail `RateLimited`
    /// with a mandatory wait the caller must honor before retrying.
    async fn sign_in(&self, token: &str) -> GatewayResult<()>;

    async fn resolve_channel(&self, channel_id: i64) -> GatewayResult<ChannelHandle>;

    /// Fetch one message by id. `None` means absent (possibly a stale
    /// channel handle on this session, not necessarily a missing object).
    async fn get_message(
        &self,
        channel: &ChannelHandle,
        id: ObjectRef,
    ) -> GatewayResult<Option<RemoteObject>>;

    async fn send_file(
        &self,
        channel: &ChannelHandle,
        path: &Path,
        filename: &str,
        attrs: &MediaAttributes,
        thumbnail: Option<&Path>,
        progress: Option<RawProgressFn>,
    ) -> GatewayResult<ObjectRef>;

    /// Read up to `len` media bytes at `offset`. A short or empty result
    /// signals end-of-data.
    async fn fetch_chunk(
        &self,
        channel: &ChannelHandle,
        id: ObjectRef,
        offset: u64,
        len: usize,
    ) -> GatewayResult<Bytes>;

    /// Best-effort teardown; errors are swallowed by implementors.
    async fn disconnect(&self);
}

// -----------------------------------------------------------------------------
// ----- Mime guessing ---------------------------------------------------------

/// Extension-based MIME lookup covering the formats the gateway actually
/// serves. Unknown extensions fall back to a generic binary type.
pub fn guess_mime(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
    match ext.to_ascii_lowercase().as_str() {
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "flac" => "audio/flac",
        "ogg" | "opus" => "audio/ogg",
        "wav" => "audio/wav",
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

// -----------------------------------------------------------------------------
// ----- StoreConnector --------------------------------------------------------

/// Creates store clients. The pool asks for one per session; the proxy
/// health-tester asks for short-lived throwaway clients.
pub trait StoreConnector: Send + Sync {
    fn create(&self) -> Box<dyn StoreClient>;
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
