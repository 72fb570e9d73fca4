use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::Rng;
use rand::seq::IteratorRandom;
use secrecy::SecretString;
use tracing::{error, info, warn};

use crate::errors::{GatewayError, GatewayResult};
use crate::proxy::ProxyCandidate;
use crate::retry::RetryPolicy;
use crate::store::StoreConnector;

use super::session::Session;

// -----------------------------------------------------------------------------
// ----- SessionPool -----------------------------------------------------------

/// Owns the ordered, fixed-size list of sessions. Many concurrent callers
/// share the pool; nobody owns a session exclusively — they are borrowed for
/// the duration of one operation.
pub struct SessionPool {
    sessions: Vec<Arc<Session>>,
    token: SecretString,
    proxy: Option<ProxyCandidate>,
    policy: RetryPolicy,
    started: AtomicBool,
}

#[derive(Clone, Debug)]
pub struct PoolStatus {
    pub size: usize,
    pub connected: usize,
}

// -----------------------------------------------------------------------------
// ----- SessionPool: Construction ---------------------------------------------

impl SessionPool {
    pub fn new(
        connector: &dyn StoreConnector,
        size: usize,
        bin_channel: i64,
        token: SecretString,
        proxy: Option<ProxyCandidate>,
    ) -> Self {
        let sessions = (0..size.max(1))
            .map(|id| Arc::new(Session::new(id, connector.create(), bin_channel)))
            .collect();

        Self {
            sessions,
            token,
            proxy,
            policy: RetryPolicy::default(),
            started: AtomicBool::new(false),
        }
    }

    /// Override the startup retry policy (tests shrink the backoffs).
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

// -----------------------------------------------------------------------------
// ----- SessionPool: Lifecycle ------------------------------------------------

impl SessionPool {
    /// Start every session with independent retry state. Idempotent; a second
    /// call is a no-op. One session failing does not abort the others, and a
    /// pool with zero connected sessions stays up — callers get errors, the
    /// process keeps running.
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("starting {} store sessions", self.sessions.len());
        for session in &self.sessions {
            match session.start(&self.token, self.proxy.as_ref(), &self.policy).await {
                Ok(()) => session.warm_channel().await,
                Err(err) => warn!("session {} failed to start: {err}", session.id()),
            }
        }

        let connected = self.connected_count();
        if connected == 0 {
            error!("no session could connect; gateway is degraded to error-only responses");
        } else {
            info!("{connected}/{} sessions connected", self.sessions.len());
        }
    }

    /// Best-effort teardown of every session.
    pub async fn stop(&self) {
        for session in &self.sessions {
            session.stop().await;
        }
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            size: self.sessions.len(),
            connected: self.connected_count(),
        }
    }

    fn connected_count(&self) -> usize {
        self.sessions.iter().filter(|s| s.is_connected()).count()
    }
}

// -----------------------------------------------------------------------------
// ----- SessionPool: Selection ------------------------------------------------

impl SessionPool {
    /// Uniform-random connected session; spreads streaming load across
    /// independent network connections.
    pub fn pick_for_read(&self) -> GatewayResult<Arc<Session>> {
        let mut rng = rand::rng();
        self.sessions
            .iter()
            .filter(|s| s.is_connected())
            .choose(&mut rng)
            .cloned()
            .ok_or_else(|| GatewayError::auth("no connected sessions"))
    }

    /// Uploads go to the first connected session.
    pub fn pick_for_write(&self) -> GatewayResult<Arc<Session>> {
        self.sessions
            .iter()
            .find(|s| s.is_connected())
            .cloned()
            .ok_or_else(|| GatewayError::auth("no connected sessions"))
    }

    /// Connected sessions in round-robin order starting from a random
    /// offset: metadata lookups and failover walk this so repeated requests
    /// don't hammer one session.
    pub fn read_order(&self) -> Vec<Arc<Session>> {
        let connected: Vec<_> = self
            .sessions
            .iter()
            .filter(|s| s.is_connected())
            .cloned()
            .collect();
        if connected.is_empty() {
            return connected;
        }

        let start = rand::rng().random_range(0..connected.len());
        let mut order = Vec::with_capacity(connected.len());
        for i in 0..connected.len() {
            order.push(connected[(start + i) % connected.len()].clone());
        }
        order
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use super::*;
    use crate::store::memory::MemoryStore;

    const TOKEN: &str = "42:token";
    const CHANNEL: i64 = -100_55;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
            flood_margin: Duration::from_millis(1),
        }
    }

    fn pool(store: &MemoryStore, size: usize) -> SessionPool {
        SessionPool::new(
            &store.connector(),
            size,
            CHANNEL,
            SecretString::new(TOKEN.into()),
            None,
        )
        .with_policy(fast_policy())
    }

    #[tokio::test]
    async fn one_bad_session_does_not_abort_the_rest() {
        let store = MemoryStore::new(TOKEN, CHANNEL);
        // First session burns its whole budget, the other three connect.
        store.fail_sign_ins(3);

        let pool = pool(&store, 4);
        pool.start().await;

        let status = pool.status();
        assert_eq!(status.size, 4);
        assert_eq!(status.connected, 3);
        assert!(!pool.read_order().iter().any(|s| s.id() == 0));
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let store = MemoryStore::new(TOKEN, CHANNEL);
        let pool = pool(&store, 2);
        pool.start().await;
        pool.start().await;
        assert_eq!(pool.status().connected, 2);
    }

    #[tokio::test]
    async fn selection_fails_cleanly_with_zero_connected() {
        let store = MemoryStore::new("other-token", CHANNEL);
        let pool = pool(&store, 2);
        pool.start().await;

        assert_eq!(pool.status().connected, 0);
        assert!(matches!(
            pool.pick_for_read(),
            Err(GatewayError::AuthFailure(_))
        ));
        assert!(matches!(
            pool.pick_for_write(),
            Err(GatewayError::AuthFailure(_))
        ));
        assert!(pool.read_order().is_empty());
    }

    #[tokio::test]
    async fn read_order_is_a_rotation_of_all_connected() {
        let store = MemoryStore::new(TOKEN, CHANNEL);
        let pool = pool(&store, 4);
        pool.start().await;

        let order = pool.read_order();
        assert_eq!(order.len(), 4);
        let ids: HashSet<_> = order.iter().map(|s| s.id()).collect();
        assert_eq!(ids.len(), 4);
        // Rotation, not shuffle: successor ids wrap around.
        for pair in order.windows(2) {
            assert_eq!((pair[0].id() + 1) % 4, pair[1].id());
        }
    }

    #[tokio::test]
    async fn writes_go_to_the_first_connected_session() {
        let store = MemoryStore::new(TOKEN, CHANNEL);
        store.fail_sign_ins(3);

        let pool = pool(&store, 3);
        pool.start().await;
        assert_eq!(pool.pick_for_write().unwrap().id(), 1);
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
