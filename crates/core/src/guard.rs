//! Access policy: one completed session per client fingerprint, forever.

use crate::store::SessionStore;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{info, warn};

/// Decides whether a new connection may proceed.
///
/// Blocking is keyed on the client fingerprint only; the network identity
/// is diagnostic. Addresses are shared and rotated, so an IP alone never
/// blocks anyone.
#[derive(Clone)]
pub struct AccessGuard {
    store: Arc<dyn SessionStore>,
}

impl AccessGuard {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Returns whether the connection is allowed.
    ///
    /// With no fingerprint this is the coarse pre-handshake check and is
    /// permissive. With a fingerprint it is authoritative: any prior
    /// completed session under that fingerprint blocks, regardless of
    /// persona, elapsed time or network identity. A storage failure fails
    /// open — availability over strict enforcement.
    pub async fn may_proceed(
        &self,
        network_identity: Option<IpAddr>,
        fingerprint: Option<&str>,
    ) -> bool {
        let Some(fingerprint) = fingerprint else {
            info!(ip = ?network_identity, "no fingerprint yet, coarse check passes");
            return true;
        };

        match self.store.has_ever_completed(fingerprint).await {
            Ok(true) => {
                info!(
                    ip = ?network_identity,
                    fingerprint = %redact(fingerprint),
                    "fingerprint already completed a session, blocking"
                );
                false
            }
            Ok(false) => {
                info!(
                    ip = ?network_identity,
                    fingerprint = %redact(fingerprint),
                    "first session for fingerprint, allowing"
                );
                true
            }
            Err(err) => {
                warn!(error = ?err, "block lookup failed, failing open");
                true
            }
        }
    }
}

/// Shortens a fingerprint for logging.
fn redact(fingerprint: &str) -> &str {
    let end = fingerprint
        .char_indices()
        .nth(16)
        .map_or(fingerprint.len(), |(i, _)| i);
    &fingerprint[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockSessionStore;
    use anyhow::anyhow;

    fn guard_with(store: MockSessionStore) -> AccessGuard {
        AccessGuard::new(Arc::new(store))
    }

    #[tokio::test]
    async fn missing_fingerprint_is_always_admitted() {
        let mut store = MockSessionStore::new();
        store.expect_has_ever_completed().never();
        let guard = guard_with(store);
        assert!(guard.may_proceed(Some("10.0.0.1".parse().unwrap()), None).await);
    }

    #[tokio::test]
    async fn completed_fingerprint_is_blocked() {
        let mut store = MockSessionStore::new();
        store
            .expect_has_ever_completed()
            .returning(|_| Ok(true));
        let guard = guard_with(store);
        assert!(!guard.may_proceed(None, Some("fp-1")).await);
    }

    #[tokio::test]
    async fn fresh_fingerprint_is_admitted() {
        let mut store = MockSessionStore::new();
        store
            .expect_has_ever_completed()
            .returning(|_| Ok(false));
        let guard = guard_with(store);
        assert!(guard.may_proceed(None, Some("fp-2")).await);
    }

    #[tokio::test]
    async fn lookup_failure_fails_open() {
        let mut store = MockSessionStore::new();
        store
            .expect_has_ever_completed()
            .returning(|_| Err(anyhow!("store down")));
        let guard = guard_with(store);
        assert!(guard.may_proceed(None, Some("fp-3")).await);
    }

    #[tokio::test]
    async fn network_identity_never_blocks_on_its_own() {
        let mut store = MockSessionStore::new();
        // Same IP as a previously completed session, different fingerprint.
        store
            .expect_has_ever_completed()
            .returning(|_| Ok(false));
        let guard = guard_with(store);
        let shared_ip: IpAddr = "203.0.113.7".parse().unwrap();
        assert!(guard.may_proceed(Some(shared_ip), Some("fp-new")).await);
        assert!(guard.may_proceed(Some(shared_ip), None).await);
    }

    #[test]
    fn redaction_truncates_long_fingerprints() {
        assert_eq!(redact("abcdefghijklmnopqrstuvwxyz"), "abcdefghijklmnop");
        assert_eq!(redact("short"), "short");
    }
}
