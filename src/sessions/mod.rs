//! Session store
//!
//! One [`DeliverySession`] per conversation, keyed by an opaque
//! [`SessionToken`]. A session holds the most recent [`MediaResolution`]
//! and the in-flight flag that keeps two deliveries for the same
//! conversation from overlapping. The flag is owned by a [`DeliveryClaim`]
//! and cleared when the claim is dropped, even while unwinding.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::delivery::DeliveryOutcome;
use crate::media::MediaResolution;

/// Default idle time before a session is evicted.
pub const DEFAULT_SESSION_IDLE_SECS: u64 = 6 * 60 * 60;

/// Opaque per-conversation key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for SessionToken {
    fn from(chat_id: i64) -> Self {
        Self(chat_id.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverySession {
    pub token: SessionToken,
    pub resolution: MediaResolution,
    pub in_flight: bool,
    /// Successful deliveries only; link fallbacks do not count.
    pub delivered_count: u64,
    /// Last lookup, claim or release.
    pub last_active: DateTime<Utc>,
}

/// Thread-safe map of sessions. Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<SessionToken, DeliverySession>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the session, if any.
    pub fn resolve(&self, token: &SessionToken) -> Option<DeliverySession> {
        self.inner.lock().get(token).cloned()
    }

    /// Replace the session's resolution.
    ///
    /// The in-flight flag and counter survive, so a new lookup during a
    /// running delivery does not open the gate for a second one.
    pub fn store(&self, token: &SessionToken, resolution: MediaResolution) {
        let mut sessions = self.inner.lock();
        match sessions.get_mut(token) {
            Some(session) => {
                session.resolution = resolution;
                session.last_active = Utc::now();
            }
            None => {
                sessions.insert(
                    token.clone(),
                    DeliverySession {
                        token: token.clone(),
                        resolution,
                        in_flight: false,
                        delivered_count: 0,
                        last_active: Utc::now(),
                    },
                );
            }
        }
    }

    /// Atomically claim the session for one delivery.
    ///
    /// `None` when there is no session or a delivery is already running.
    pub fn try_begin_delivery(&self, token: &SessionToken) -> Option<DeliveryClaim> {
        let mut sessions = self.inner.lock();
        match sessions.get_mut(token) {
            Some(session) if !session.in_flight => {
                session.in_flight = true;
                session.last_active = Utc::now();
                Some(DeliveryClaim {
                    store: self.clone(),
                    token: token.clone(),
                    ended: false,
                })
            }
            Some(_) => {
                debug!(session = %token, "delivery already in flight");
                None
            }
            None => None,
        }
    }

    fn release(&self, token: &SessionToken, delivered: bool) {
        let mut sessions = self.inner.lock();
        if let Some(session) = sessions.get_mut(token) {
            session.in_flight = false;
            session.last_active = Utc::now();
            if delivered {
                session.delivered_count += 1;
            }
        }
    }

    /// Drop idle sessions with no delivery running. Returns how many went.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let max_idle = chrono::Duration::from_std(max_idle).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now().checked_sub_signed(max_idle).unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.evict_inactive_since(cutoff)
    }

    /// Drop sessions last active before `cutoff`, keeping in-flight ones.
    pub fn evict_inactive_since(&self, cutoff: DateTime<Utc>) -> usize {
        let mut sessions = self.inner.lock();
        let before = sessions.len();
        sessions.retain(|_, session| session.in_flight || session.last_active >= cutoff);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Sessions with a delivery currently running.
    pub fn in_flight_count(&self) -> usize {
        self.inner.lock().values().filter(|s| s.in_flight).count()
    }
}

/// Exclusive right to deliver for one session.
///
/// [`DeliveryClaim::end_delivery`] records the outcome. Dropping the claim
/// without it (panic, cancelled task) still clears the in-flight flag.
#[must_use = "dropping the claim releases the session at once"]
#[derive(Debug)]
pub struct DeliveryClaim {
    store: SessionStore,
    token: SessionToken,
    ended: bool,
}

impl DeliveryClaim {
    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    /// Release the session, counting the delivery when it succeeded.
    pub fn end_delivery(mut self, outcome: &DeliveryOutcome) {
        self.ended = true;
        self.store.release(&self.token, outcome.is_success());
    }
}

impl Drop for DeliveryClaim {
    fn drop(&mut self) {
        if !self.ended {
            warn!(session = %self.token, "delivery claim dropped without an outcome");
            self.store.release(&self.token, false);
        }
    }
}
