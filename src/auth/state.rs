// Credential state machine
// Holds the active credential, evaluates validity and applies refresh results

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

use super::clock::{Clock, SystemClock};
use super::observer::{Observers, Subscription};
use super::types::{Token, DEFAULT_TOKEN_TYPE};
use crate::error::{CredentialError, Result};

/// Lookahead applied to expiration checks so a token judged valid does not
/// expire while the request that carries it is in flight
pub const SAFETY_MARGIN_SECS: i64 = 15;

/// The credential currently held by a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Nothing configured yet
    None,
    /// Non-expiring, non-refreshable token
    Permanent(String),
    /// OAuth token that expires and may be refreshed
    Refreshable(Arc<Token>),
}

/// Authoritative source of the credential attached to outgoing requests
///
/// Reads are safe from any number of threads. `update` swaps the held token
/// atomically; callers are expected to run at most one refresh at a time
/// (see `SessionManager`).
pub struct CredentialState {
    credential: RwLock<Credential>,
    observers: Observers,
    clock: Arc<dyn Clock>,
}

impl CredentialState {
    /// State with no credential; the first `update` installs one
    pub fn empty() -> Self {
        Self {
            credential: RwLock::new(Credential::None),
            observers: Observers::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// State seeded with a previously obtained OAuth token
    pub fn from_token(token: impl Into<Arc<Token>>) -> Result<Self> {
        let token = token.into();
        if token.access_token().is_empty() {
            return Err(CredentialError::EmptyAccessToken);
        }

        let state = Self::empty();
        *state.credential.write() = Credential::Refreshable(token);
        Ok(state)
    }

    /// State using a permanent token, which never expires and never refreshes
    pub fn from_permanent_token(permanent_token: impl Into<String>) -> Result<Self> {
        let permanent_token = permanent_token.into();
        if permanent_token.is_empty() {
            return Err(CredentialError::EmptyPermanentToken);
        }

        let state = Self::empty();
        *state.credential.write() = Credential::Permanent(permanent_token);
        Ok(state)
    }

    /// Replace the time source used for validity checks
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Time source used for validity checks and token issuance
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Snapshot of the held credential
    pub fn credential(&self) -> Credential {
        self.credential.read().clone()
    }

    /// The held OAuth token, if any
    pub fn current_token(&self) -> Option<Arc<Token>> {
        match &*self.credential.read() {
            Credential::Refreshable(token) => Some(Arc::clone(token)),
            _ => None,
        }
    }

    /// Whether a permanent token is configured
    pub fn is_permanent(&self) -> bool {
        matches!(*self.credential.read(), Credential::Permanent(_))
    }

    /// Access token to attach to a request: the permanent token, else the held
    /// token's access token
    pub fn effective_access_token(&self) -> Option<String> {
        match &*self.credential.read() {
            Credential::Permanent(token) => Some(token.clone()),
            Credential::Refreshable(token) => Some(token.access_token().to_string()),
            Credential::None => None,
        }
    }

    /// Refresh token of the held OAuth token; permanent tokens have none
    pub fn effective_refresh_token(&self) -> Option<String> {
        match &*self.credential.read() {
            Credential::Refreshable(token) => token.refresh_token().map(str::to_string),
            _ => None,
        }
    }

    /// Whether the held credential carries a refresh token
    pub fn can_refresh(&self) -> bool {
        self.effective_refresh_token().is_some()
    }

    /// Authentication scheme, `Bearer` unless the held token names another
    pub fn token_type(&self) -> String {
        match &*self.credential.read() {
            Credential::Refreshable(token) => token.token_type().to_string(),
            _ => DEFAULT_TOKEN_TYPE.to_string(),
        }
    }

    /// Expiration of the held OAuth token; `None` for permanent or no credential
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.current_token()
            .map(|token| token.access_token_expiration())
    }

    /// Whether the credential can be used for a request starting now
    pub fn is_valid(&self) -> bool {
        match &*self.credential.read() {
            Credential::Permanent(_) => true,
            Credential::Refreshable(token) if !token.access_token().is_empty() => {
                let limit = self.clock.now() + Duration::seconds(SAFETY_MARGIN_SECS);
                limit <= token.access_token_expiration()
            }
            _ => false,
        }
    }

    /// Whether the held OAuth token is past its expiration, ignoring the
    /// safety margin. Permanent tokens never expire; no credential counts as
    /// expired.
    pub fn is_expired(&self) -> bool {
        match &*self.credential.read() {
            Credential::Permanent(_) => false,
            Credential::Refreshable(token) => {
                self.clock.now() >= token.access_token_expiration()
            }
            Credential::None => true,
        }
    }

    /// Install a freshly issued token
    ///
    /// When a token is already held its refresh token (or lack of one) is
    /// carried onto the new one, since refresh responses are not guaranteed to
    /// echo it. Listeners
    /// are notified with the installed token unless it is the very instance
    /// already held.
    pub fn update(&self, token: impl Into<Arc<Token>>) -> Result<()> {
        let token = token.into();
        if token.access_token().is_empty() {
            tracing::warn!("Rejecting credential update without an access token");
            return Err(CredentialError::EmptyAccessToken);
        }

        let installed = {
            let mut credential = self.credential.write();

            let next = match &*credential {
                Credential::Permanent(_) => {
                    tracing::warn!("Ignoring refreshed token: permanent credential configured");
                    return Err(CredentialError::PermanentCredential);
                }
                Credential::Refreshable(current) if Arc::ptr_eq(current, &token) => {
                    tracing::debug!("Credential update with the held token, nothing to do");
                    return Ok(());
                }
                Credential::Refreshable(current) => carry_refresh_token(current, token),
                Credential::None => token,
            };

            *credential = Credential::Refreshable(Arc::clone(&next));
            next
        };

        tracing::info!(
            expires_at = %installed.access_token_expiration().to_rfc3339(),
            refreshable = installed.refresh_token().is_some(),
            "Credentials updated"
        );

        self.observers.notify(&installed);
        Ok(())
    }

    /// Register a listener called with every newly installed token
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Arc<Token>) + Send + Sync + 'static,
    {
        self.observers.subscribe(listener)
    }

    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.observers.unsubscribe(subscription)
    }
}

impl std::fmt::Debug for CredentialState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &*self.credential.read() {
            Credential::None => "none",
            Credential::Permanent(_) => "permanent",
            Credential::Refreshable(_) => "refreshable",
        };
        f.debug_struct("CredentialState")
            .field("credential", &kind)
            .field("observers", &self.observers)
            .finish()
    }
}

/// Put the held refresh token (or its absence) onto the incoming token
fn carry_refresh_token(current: &Token, incoming: Arc<Token>) -> Arc<Token> {
    if incoming.refresh_token() == current.refresh_token() {
        return incoming;
    }

    let previous = current.refresh_token().map(str::to_string);
    Arc::new(Arc::unwrap_or_clone(incoming).carrying_refresh_token(previous))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;
    use parking_lot::Mutex;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc::now()))
    }

    #[test]
    fn test_empty_state() {
        let state = CredentialState::empty();
        assert_eq!(state.credential(), Credential::None);
        assert_eq!(state.effective_access_token(), None);
        assert_eq!(state.effective_refresh_token(), None);
        assert!(!state.can_refresh());
        assert!(!state.is_valid());
        assert!(state.is_expired());
        assert_eq!(state.token_type(), "Bearer");
    }

    #[test]
    fn test_safety_margin_boundary() {
        let clock = clock();
        let token = Token::issued("access", 3600, &*clock).unwrap();
        let state = CredentialState::from_token(token)
            .unwrap()
            .with_clock(clock.clone());

        clock.advance(Duration::seconds(3600 - 16));
        assert!(state.is_valid());

        clock.advance(Duration::seconds(1));
        assert!(state.is_valid(), "exactly at the margin is still valid");

        clock.advance(Duration::seconds(1));
        assert!(!state.is_valid());
        assert!(!state.is_expired());

        clock.advance(Duration::seconds(14));
        assert!(state.is_expired());
    }

    #[test]
    fn test_permanent_token_never_expires() {
        let clock = clock();
        let state = CredentialState::from_permanent_token("permanent")
            .unwrap()
            .with_clock(clock.clone());

        clock.advance(Duration::days(365 * 10));
        assert!(state.is_valid());
        assert!(!state.is_expired());
        assert!(!state.can_refresh());
        assert!(state.is_permanent());
        assert_eq!(state.effective_access_token().as_deref(), Some("permanent"));
        assert_eq!(state.token_type(), "Bearer");
        assert_eq!(state.expires_at(), None);
    }

    #[test]
    fn test_empty_permanent_token_rejected() {
        assert_eq!(
            CredentialState::from_permanent_token("").unwrap_err(),
            CredentialError::EmptyPermanentToken
        );
    }

    #[test]
    fn test_update_carries_refresh_token_forward() {
        let clock = clock();
        let state = CredentialState::empty().with_clock(clock.clone());

        let first = Token::issued("a1", 3600, &*clock)
            .unwrap()
            .with_refresh_token("r1");
        state.update(first).unwrap();
        assert_eq!(state.effective_access_token().as_deref(), Some("a1"));
        assert_eq!(state.effective_refresh_token().as_deref(), Some("r1"));

        let second = Token::issued("a2", 3600, &*clock).unwrap();
        state.update(second).unwrap();
        assert_eq!(state.effective_access_token().as_deref(), Some("a2"));
        assert_eq!(state.effective_refresh_token().as_deref(), Some("r1"));
        assert!(state.can_refresh());
    }

    #[test]
    fn test_previous_refresh_token_wins() {
        let state = CredentialState::empty();
        let first = Token::with_expiration("a1", Utc::now())
            .unwrap()
            .with_refresh_token("r1");
        state.update(first).unwrap();

        let second = Token::with_expiration("a2", Utc::now())
            .unwrap()
            .with_refresh_token("r2");
        state.update(second).unwrap();
        assert_eq!(state.effective_refresh_token().as_deref(), Some("r1"));
    }

    #[test]
    fn test_non_refreshable_session_stays_non_refreshable() {
        let state =
            CredentialState::from_token(Token::with_expiration("a1", Utc::now()).unwrap())
                .unwrap();
        assert!(!state.can_refresh());

        let next = Token::with_expiration("a2", Utc::now())
            .unwrap()
            .with_refresh_token("r2");
        state.update(next).unwrap();
        assert_eq!(state.effective_access_token().as_deref(), Some("a2"));
        assert_eq!(state.effective_refresh_token(), None);
        assert!(!state.can_refresh());
    }

    #[test]
    fn test_notifications() {
        let state = CredentialState::empty();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        state.subscribe(move |token| sink.lock().push(token.access_token().to_string()));

        let first = Arc::new(
            Token::with_expiration("a1", Utc::now())
                .unwrap()
                .with_refresh_token("r1"),
        );
        state.update(Arc::clone(&first)).unwrap();
        state.update(Token::with_expiration("a2", Utc::now()).unwrap()).unwrap();
        assert_eq!(*seen.lock(), vec!["a1", "a2"]);

        // Re-installing the held instance is a no-op
        let held = state.current_token().unwrap();
        state.update(held).unwrap();
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn test_same_instance_on_first_update_not_renotified() {
        let state = CredentialState::empty();
        let count = Arc::new(Mutex::new(0));

        let counter = Arc::clone(&count);
        state.subscribe(move |_| *counter.lock() += 1);

        let token = Arc::new(Token::with_expiration("a1", Utc::now()).unwrap());
        state.update(Arc::clone(&token)).unwrap();
        state.update(Arc::clone(&token)).unwrap();
        assert_eq!(*count.lock(), 1);
    }

    #[test]
    fn test_listener_receives_carried_token() {
        let state = CredentialState::empty();
        state
            .update(
                Token::with_expiration("a1", Utc::now())
                    .unwrap()
                    .with_refresh_token("r1"),
            )
            .unwrap();

        let received = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&received);
        state.subscribe(move |token| *sink.lock() = Some(Arc::clone(token)));

        state.update(Token::with_expiration("a2", Utc::now()).unwrap()).unwrap();

        let token = received.lock().clone().unwrap();
        assert_eq!(token.access_token(), "a2");
        assert_eq!(token.refresh_token(), Some("r1"));
        assert!(Arc::ptr_eq(&token, &state.current_token().unwrap()));
    }

    #[test]
    fn test_listener_can_read_state() {
        let state = Arc::new(CredentialState::empty());
        let observed = Arc::new(Mutex::new(None));

        let reader = Arc::clone(&state);
        let sink = Arc::clone(&observed);
        state.subscribe(move |_| *sink.lock() = reader.effective_access_token());

        state.update(Token::with_expiration("a1", Utc::now()).unwrap()).unwrap();
        assert_eq!(observed.lock().as_deref(), Some("a1"));
    }

    #[test]
    fn test_update_rejected_for_permanent_credential() {
        let state = CredentialState::from_permanent_token("permanent").unwrap();
        let err = state
            .update(Token::with_expiration("a1", Utc::now()).unwrap())
            .unwrap_err();
        assert_eq!(err, CredentialError::PermanentCredential);
        assert_eq!(state.effective_access_token().as_deref(), Some("permanent"));
    }

    #[test]
    fn test_loaded_token_with_empty_fields() {
        let loaded: Token = serde_json::from_str(
            r#"{"access_token":"a","refresh_token":"","token_type":"","expires_at":"2099-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        let state = CredentialState::from_token(loaded).unwrap();

        assert!(!state.can_refresh());
        assert_eq!(state.effective_refresh_token(), None);
        assert_eq!(state.token_type(), "Bearer");
    }

    #[test]
    fn test_explicit_token_type() {
        let token = Token::with_expiration("a1", Utc::now())
            .unwrap()
            .with_token_type("MAC");
        let state = CredentialState::from_token(token).unwrap();
        assert_eq!(state.token_type(), "MAC");
    }

    #[test]
    fn test_concurrent_readers_see_whole_tokens() {
        let state = Arc::new(CredentialState::empty());
        state
            .update(
                Token::with_expiration("a0", Utc::now())
                    .unwrap()
                    .with_token_type("t0"),
            )
            .unwrap();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let token = state.current_token().unwrap();
                        let suffix = &token.access_token()[1..];
                        assert_eq!(&token.token_type()[1..], suffix);
                    }
                })
            })
            .collect();

        for i in 1..200 {
            let token = Token::with_expiration(format!("a{}", i), Utc::now())
                .unwrap()
                .with_token_type(format!("t{}", i));
            state.update(token).unwrap();
        }

        for reader in readers {
            reader.join().unwrap();
        }
    }
}
