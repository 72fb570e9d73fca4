//! Relay discovery for censorship circumvention.
//!
//! Candidates are fetched fresh at process start from public directory
//! endpoints, ranked by reported ping, and health-tested in small concurrent
//! batches. Nothing here is persisted; a process that finds no working relay
//! simply connects direct.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::store::StoreConnector;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const DEFAULT_PRIMARY_SOURCE: &str = "https://mtpro.xyz/api";
const DEFAULT_FALLBACK_SOURCE: &str = "https://mtproto.xyz/api";

/// Ping reported for candidates that don't carry one: worst-case, so
/// well-described candidates sort first.
const PING_SENTINEL_MS: u32 = u32::MAX;

const PROBE_TIMEOUT: Duration = Duration::from_secs(15);
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_BATCH_SIZE: usize = 8;

// -----------------------------------------------------------------------------
// ----- ProxyCandidate --------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProxyKind {
    Socks5,
    Mtproto,
}

impl ProxyKind {
    fn query_value(self) -> &'static str {
        match self {
            ProxyKind::Socks5 => "socks",
            ProxyKind::Mtproto => "mtproto",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyCandidate {
    pub kind: ProxyKind,
    pub host: String,
    pub port: u16,
    pub secret: Option<String>,
    pub ping_ms: u32,
}

// -----------------------------------------------------------------------------
// ----- ProxyProber -----------------------------------------------------------

/// Health test for one candidate. Seam so tests can stub connectivity.
#[async_trait]
pub trait ProxyProber: Send + Sync {
    async fn probe(&self, candidate: &ProxyCandidate) -> bool;
}

/// Probes by opening a short-lived, isolated session through the candidate
/// and authenticating with the shared token.
pub struct ConnectorProber {
    connector: Arc<dyn StoreConnector>,
    token: SecretString,
}

impl ConnectorProber {
    pub fn new(connector: Arc<dyn StoreConnector>, token: SecretString) -> Self {
        Self { connector, token }
    }
}

#[async_trait]
impl ProxyProber for ConnectorProber {
    async fn probe(&self, candidate: &ProxyCandidate) -> bool {
        let client = self.connector.create();
        let ok = client.connect(Some(candidate)).await.is_ok()
            && client.sign_in(self.token.expose_secret()).await.is_ok();
        client.disconnect().await;
        ok
    }
}

// -----------------------------------------------------------------------------
// ----- ProxyDirectory --------------------------------------------------------

pub struct ProxyDirectory {
    http: reqwest::Client,
    primary: String,
    fallback: String,
}

impl ProxyDirectory {
    pub fn new(primary_override: Option<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .build()
                .unwrap_or_default(),
            primary: primary_override.unwrap_or_else(|| DEFAULT_PRIMARY_SOURCE.to_owned()),
            fallback: DEFAULT_FALLBACK_SOURCE.to_owned(),
        }
    }

    /// Fetch both relay kinds concurrently, rank best-ping-first. Source or
    /// parse failures yield fewer candidates, never an error.
    pub async fn fetch(&self) -> Vec<ProxyCandidate> {
        let (socks, mtproto) = tokio::join!(
            self.fetch_kind(ProxyKind::Socks5),
            self.fetch_kind(ProxyKind::Mtproto),
        );

        let mut all = socks;
        all.extend(mtproto);
        // Stable, so equally-pinged candidates keep source order.
        all.sort_by_key(|c| c.ping_ms);
        info!("proxy directory: {} candidates fetched", all.len());
        all
    }

    /// Probe `candidates` in fixed-size concurrent batches; the first one in
    /// a batch that authenticates wins and the rest of the batch is aborted.
    pub async fn test_batch(
        &self,
        candidates: &[ProxyCandidate],
        batch_size: usize,
        prober: &Arc<dyn ProxyProber>,
    ) -> Option<ProxyCandidate> {
        let batch_size = batch_size.max(1);

        for batch in candidates.chunks(batch_size) {
            let mut probes = JoinSet::new();
            for candidate in batch {
                let candidate = candidate.clone();
                let prober = prober.clone();
                probes.spawn(async move {
                    let ok = tokio::time::timeout(PROBE_TIMEOUT, prober.probe(&candidate))
                        .await
                        .unwrap_or(false);
                    (candidate, ok)
                });
            }

            while let Some(joined) = probes.join_next().await {
                match joined {
                    Ok((candidate, true)) => {
                        info!(
                            "proxy {}:{} passed health test ({}ms)",
                            candidate.host, candidate.port, candidate.ping_ms
                        );
                        // Best-effort cancellation of the rest of the batch.
                        probes.abort_all();
                        return Some(candidate);
                    }
                    Ok((candidate, false)) => {
                        debug!("proxy {}:{} failed health test", candidate.host, candidate.port);
                    }
                    Err(_) => {}
                }
            }
        }

        None
    }

    /// Full discovery: fetch, rank, probe. `None` means "connect direct".
    pub async fn find_working(&self, prober: &Arc<dyn ProxyProber>) -> Option<ProxyCandidate> {
        let candidates = self.fetch().await;
        if candidates.is_empty() {
            warn!("proxy directory returned no candidates");
            return None;
        }
        self.test_batch(&candidates, DEFAULT_BATCH_SIZE, prober).await
    }
}

// -----------------------------------------------------------------------------
// ----- ProxyDirectory: Private -----------------------------------------------

impl ProxyDirectory {
    async fn fetch_kind(&self, kind: ProxyKind) -> Vec<ProxyCandidate> {
        for base in [&self.primary, &self.fallback] {
            let url = format!("{}/?type={}", base, kind.query_value());
            match self.http.get(&url).send().await {
                Ok(resp) => match resp.text().await {
                    Ok(body) => {
                        let parsed = parse_candidates(kind, &body);
                        if !parsed.is_empty() {
                            return parsed;
                        }
                        warn!("proxy source {url} returned no usable entries");
                    }
                    Err(err) => warn!("proxy source {url} body read failed: {err}"),
                },
                Err(err) => warn!("proxy source {url} fetch failed: {err}"),
            }
        }
        Vec::new()
    }
}

/// One raw directory entry. Field names vary between sources; anything
/// missing or mistyped makes that entry unusable, not the whole response.
#[derive(Debug, serde::Deserialize)]
struct RawEntry {
    host: Option<String>,
    ip: Option<String>,
    port: Option<u16>,
    secret: Option<String>,
    ping: Option<f64>,
}

/// Lenient JSON parse: anything that isn't an array of objects with a usable
/// host and port is skipped entry-by-entry, never fatal.
fn parse_candidates(kind: ProxyKind, raw: &str) -> Vec<ProxyCandidate> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
        return Vec::new();
    };
    let Some(entries) = value.as_array() else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let entry: RawEntry = serde_json::from_value(entry.clone()).ok()?;
            let host = entry.host.or(entry.ip)?;
            let port = entry.port?;
            let ping_ms = entry
                .ping
                .map(|p| p.max(0.0) as u32)
                .unwrap_or(PING_SENTINEL_MS);

            if matches!(kind, ProxyKind::Mtproto) && entry.secret.is_none() {
                return None;
            }

            Some(ProxyCandidate {
                kind,
                host,
                port,
                secret: entry.secret,
                ping_ms,
            })
        })
        .collect()
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
