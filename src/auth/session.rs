//! Session lifecycle: current token, its expiry, and durable storage
//!
//! The `Session` is the single owner of token state for the process. It is
//! constructed once at the composition root with an injected store and
//! clock, loads the persisted record exactly once, and evaluates expiry
//! lazily on every read.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::StorageError;

/// Warn the user when less than this much session time remains.
pub const DEFAULT_EXPIRY_WARNING: Duration = Duration::from_secs(24 * 60 * 60);

/// Time source, injectable so expiry logic is testable with a fixed clock.
pub trait Clock: Send {
    fn now(&self) -> DateTime<Utc>;
}

/// System clock used outside tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Durable storage for the session credential.
///
/// `load` never fails: unreadable state is treated as absent, and the
/// implementation clears it so the next load is absent too. `save` may
/// fail (e.g. quota); the caller decides what to do with the in-memory
/// state in that case.
pub trait SessionStore: Send {
    fn load(&mut self) -> Option<(String, DateTime<Utc>)>;
    fn save(&mut self, token: &str, expires_at: DateTime<Utc>) -> Result<(), StorageError>;
    fn clear(&mut self);
}

/// In-memory owner of the current access token and its validity window.
pub struct Session {
    token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    store: Box<dyn SessionStore>,
    clock: Box<dyn Clock>,
}

impl Session {
    /// Load the persisted session. A record whose expiry is not strictly
    /// in the future is discarded and eagerly cleared from the store, so a
    /// past-due token is never observable.
    pub fn initialize(mut store: Box<dyn SessionStore>, clock: Box<dyn Clock>) -> Self {
        let (token, expires_at) = match store.load() {
            Some((token, expires_at)) if expires_at > clock.now() => {
                (Some(token), Some(expires_at))
            }
            Some(_) => {
                tracing::info!("Stored session has expired, clearing");
                store.clear();
                (None, None)
            }
            None => (None, None),
        };

        Self {
            token,
            expires_at,
            store,
            clock,
        }
    }

    /// Current time as seen by the session's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn is_authenticated(&self) -> bool {
        match (&self.token, self.expires_at) {
            (Some(_), Some(expires_at)) => expires_at > self.clock.now(),
            _ => false,
        }
    }

    /// The token, only while it is still valid. Expiry is evaluated here
    /// on read; state is not cleared as a side effect.
    pub fn token(&self) -> Option<&str> {
        if self.is_authenticated() {
            self.token.as_deref()
        } else {
            None
        }
    }

    /// Replace the session. In-memory state is updated even when
    /// persistence fails, so the session stays usable for the rest of the
    /// process; the storage error is returned for the caller to report.
    pub fn set_token(
        &mut self,
        token: String,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let persisted = self.store.save(&token, expires_at);
        self.token = Some(token);
        self.expires_at = Some(expires_at);
        persisted
    }

    /// Drop the session everywhere. Idempotent.
    pub fn clear(&mut self) {
        self.token = None;
        self.expires_at = None;
        self.store.clear();
    }

    /// Remaining validity; zero when absent or past due.
    pub fn time_until_expiry(&self) -> Duration {
        match (&self.token, self.expires_at) {
            (Some(_), Some(expires_at)) => (expires_at - self.clock.now())
                .to_std()
                .unwrap_or_default(),
            _ => Duration::ZERO,
        }
    }

    /// True while some validity remains but no more than `window`.
    pub fn is_expiring_soon(&self, window: Duration) -> bool {
        let remaining = self.time_until_expiry();
        remaining > Duration::ZERO && remaining <= window
    }

    /// Remaining time as user-facing copy, bucketed into the largest
    /// nonzero unit only (never "1 day 1 hour").
    pub fn expiry_message(&self) -> String {
        let remaining = self.time_until_expiry();
        if remaining.is_zero() {
            return "No active session".to_string();
        }

        let secs = remaining.as_secs();
        let days = secs / 86_400;
        let hours = secs / 3_600;
        let minutes = secs / 60;
        if days >= 1 {
            format!("Session expires in {} day{}", days, plural(days))
        } else if hours >= 1 {
            format!("Session expires in {} hour{}", hours, plural(hours))
        } else if minutes >= 1 {
            format!("Session expires in {} minute{}", minutes, plural(minutes))
        } else {
            "Session expires in less than a minute".to_string()
        }
    }
}

fn plural(n: u64) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}


#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::test_support::{session_at, t0, MemoryStore};
    use super::*;

    #[test]
    fn test_expired_record_cleared_at_load() {
        let store = MemoryStore::default();
        *store.record.lock().unwrap() =
            Some(("old".to_string(), t0() - chrono::Duration::hours(1)));

        let (session, _clock) = session_at(t0(), store.clone());
        assert!(!session.is_authenticated());
        assert!(store.record.lock().unwrap().is_none());
        assert_eq!(*store.clears.lock().unwrap(), 1);

        // Second load is also absent (idempotent).
        let (session, _clock) = session_at(t0(), store.clone());
        assert!(!session.is_authenticated());
        assert!(session.token().is_none());
    }

    #[test]
    fn test_record_expiring_exactly_now_is_discarded() {
        let store = MemoryStore::default();
        *store.record.lock().unwrap() = Some(("edge".to_string(), t0()));

        let (session, _clock) = session_at(t0(), store);
        assert!(!session.is_authenticated());
    }

    #[test]
    fn test_set_then_get_roundtrip() {
        let store = MemoryStore::default();
        let (mut session, _clock) = session_at(t0(), store);

        let expires_at = t0() + chrono::Duration::seconds(3600);
        session.set_token("abc123".to_string(), expires_at).unwrap();

        assert_eq!(session.token(), Some("abc123"));
        assert_eq!(session.time_until_expiry(), Duration::from_secs(3600));
    }

    #[test]
    fn test_restart_roundtrip() {
        let store = MemoryStore::default();
        let (mut session, _clock) = session_at(t0(), store.clone());
        let expires_at = t0() + chrono::Duration::days(7);
        session.set_token("abc123".to_string(), expires_at).unwrap();
        drop(session);

        // Reload while the token is still in the future.
        let (session, _clock) = session_at(t0() + chrono::Duration::days(1), store.clone());
        assert_eq!(session.token(), Some("abc123"));
        drop(session);

        // Reload after expiry: record discarded.
        let (session, _clock) = session_at(t0() + chrono::Duration::days(8), store.clone());
        assert!(session.token().is_none());
        assert!(store.record.lock().unwrap().is_none());
    }

    #[test]
    fn test_expiry_is_lazy_on_read() {
        let store = MemoryStore::default();
        let (mut session, clock) = session_at(t0(), store.clone());
        session
            .set_token("abc123".to_string(), t0() + chrono::Duration::seconds(60))
            .unwrap();
        let clears_before = *store.clears.lock().unwrap();

        clock.advance_secs(61);
        assert!(!session.is_authenticated());
        assert!(session.token().is_none());
        assert_eq!(session.time_until_expiry(), Duration::ZERO);

        // Reads must not clear the store behind the caller's back.
        assert_eq!(*store.clears.lock().unwrap(), clears_before);
        assert!(store.record.lock().unwrap().is_some());
    }

    #[test]
    fn test_set_token_survives_persistence_failure() {
        let store = MemoryStore {
            fail_saves: true,
            ..MemoryStore::default()
        };
        let (mut session, _clock) = session_at(t0(), store);

        let result = session.set_token("abc123".to_string(), t0() + chrono::Duration::hours(1));
        assert!(result.is_err());
        // Session remains usable for this process lifetime.
        assert!(session.is_authenticated());
        assert_eq!(session.token(), Some("abc123"));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let store = MemoryStore::default();
        let (mut session, _clock) = session_at(t0(), store);
        session
            .set_token("abc123".to_string(), t0() + chrono::Duration::hours(1))
            .unwrap();

        session.clear();
        assert!(!session.is_authenticated());
        session.clear();
        assert!(!session.is_authenticated());
        assert_eq!(session.time_until_expiry(), Duration::ZERO);
    }

    #[test]
    fn test_expiring_soon_window() {
        let store = MemoryStore::default();
        let (mut session, _clock) = session_at(t0(), store);

        session
            .set_token("abc123".to_string(), t0() + chrono::Duration::hours(2))
            .unwrap();
        assert!(session.is_expiring_soon(DEFAULT_EXPIRY_WARNING));

        session
            .set_token("abc123".to_string(), t0() + chrono::Duration::hours(25))
            .unwrap();
        assert!(!session.is_expiring_soon(DEFAULT_EXPIRY_WARNING));

        session.clear();
        assert!(!session.is_expiring_soon(DEFAULT_EXPIRY_WARNING));
    }

    #[test]
    fn test_expiry_message_uses_largest_unit_only() {
        let store = MemoryStore::default();
        let (mut session, _clock) = session_at(t0(), store);

        // 1 day, 1 hour, 1 minute, 1 second remaining: report days only.
        session
            .set_token("abc123".to_string(), t0() + chrono::Duration::seconds(90_061))
            .unwrap();
        let message = session.expiry_message();
        assert_eq!(message, "Session expires in 1 day");
        assert!(!message.contains("hour"));

        session
            .set_token("abc123".to_string(), t0() + chrono::Duration::days(3))
            .unwrap();
        assert_eq!(session.expiry_message(), "Session expires in 3 days");

        session
            .set_token("abc123".to_string(), t0() + chrono::Duration::hours(2))
            .unwrap();
        assert_eq!(session.expiry_message(), "Session expires in 2 hours");

        session
            .set_token("abc123".to_string(), t0() + chrono::Duration::seconds(90))
            .unwrap();
        assert_eq!(session.expiry_message(), "Session expires in 1 minute");

        session
            .set_token("abc123".to_string(), t0() + chrono::Duration::seconds(30))
            .unwrap();
        assert_eq!(session.expiry_message(), "Session expires in less than a minute");
    }

    #[test]
    fn test_expiry_message_without_session() {
        let store = MemoryStore::default();
        let (session, _clock) = session_at(t0(), store);
        assert_eq!(session.expiry_message(), "No active session");
    }
}
