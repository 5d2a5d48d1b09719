//! Session management
//!
//! [`SessionManager`] owns the login flow against an [`AuthApi`]:
//! password or token authentication, the two-factor challenge loop, and
//! reloading/persisting sessions through the encrypted [`SessionStore`].
//! Harvest pipelines only ever receive clones of an authenticated session.

pub mod store;

use anyhow::Result;

use crate::api::{AuthApi, Challenge, LoginOutcome};
use crate::error::AuthError;
use crate::models::{Identity, Session, SessionState, SessionToken, TokenKind};

pub use store::{PersistedSession, SessionStore};

/// Default number of two-factor codes tried by [`SessionManager::establish`]
pub const DEFAULT_MAX_CHALLENGE_ATTEMPTS: u32 = 5;

/// Supplies two-factor codes during [`SessionManager::establish`]
pub trait ChallengeResponder {
    /// Code for `attempt` (1-based), or `None` to give up
    fn code(&mut self, challenge: &Challenge, attempt: u32) -> Option<String>;
}

impl<F> ChallengeResponder for F
where
    F: FnMut(&Challenge, u32) -> Option<String>,
{
    fn code(&mut self, challenge: &Challenge, attempt: u32) -> Option<String> {
        self(challenge, attempt)
    }
}

/// Drives authentication and owns the persisted sessions
pub struct SessionManager<A> {
    api: A,
    store: SessionStore,
    session: Option<Session>,
    pending: Option<Challenge>,
    max_challenge_attempts: u32,
}

impl<A: AuthApi> SessionManager<A> {
    /// Create a manager persisting to `store`
    pub const fn new(api: A, store: SessionStore) -> Self {
        Self {
            api,
            store,
            session: None,
            pending: None,
            max_challenge_attempts: DEFAULT_MAX_CHALLENGE_ATTEMPTS,
        }
    }

    /// Bound the challenge loop in [`establish`](Self::establish)
    pub fn with_max_challenge_attempts(mut self, attempts: u32) -> Self {
        self.max_challenge_attempts = attempts.max(1);
        self
    }

    /// Session being established, in its current state
    pub const fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Outstanding two-factor challenge, if any
    pub const fn pending_challenge(&self) -> Option<&Challenge> {
        self.pending.as_ref()
    }

    /// Backing store
    pub const fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Authenticate from scratch.
    ///
    /// A password login that needs a second factor returns
    /// [`AuthError::ChallengeRequired`] and keeps the challenge pending for
    /// [`submit_challenge`](Self::submit_challenge); [`session`](Self::session)
    /// is then in state `PendingChallenge`.
    pub async fn authenticate(&mut self, identity: &Identity) -> Result<Session, AuthError> {
        self.pending = None;
        self.session = Some(Session::new(identity.username()));

        let session = match identity {
            Identity::Token { username, token } => {
                let token = SessionToken::access(token);
                if !self.api.validate(&token).await? {
                    return Err(AuthError::InvalidCredentials);
                }
                tracing::info!(user = %username, "access token accepted");
                Session::authenticated(username, token)
            }
            Identity::Password { username, password } => {
                match self.api.login(username, password).await? {
                    LoginOutcome::Authenticated(token) => {
                        tracing::info!(user = %username, "logged in");
                        Session::authenticated(username, token)
                    }
                    LoginOutcome::ChallengeRequired(challenge) => {
                        tracing::info!(user = %username, "two-factor challenge required");
                        self.session = Some(Session::challenged(username));
                        self.pending = Some(challenge);
                        return Err(AuthError::ChallengeRequired);
                    }
                }
            }
        };

        self.session = Some(session.clone());
        Ok(session)
    }

    /// Answer the pending challenge. A rejected code leaves the challenge
    /// pending so the caller can try again.
    pub async fn submit_challenge(&mut self, code: &str) -> Result<Session, AuthError> {
        let challenge = self.pending.as_ref().ok_or(AuthError::NoPendingChallenge)?;
        let token = self.api.two_factor_login(challenge, code.trim()).await?;
        let username = challenge.username.clone();
        self.pending = None;
        tracing::info!(user = %username, "two-factor challenge passed");

        let session = self.session.get_or_insert_with(|| Session::new(&username));
        session.grant(token);
        Ok(session.clone())
    }

    /// Drop the pending challenge, returning the session to
    /// `Unauthenticated`; returns whether there was one
    pub fn abandon_challenge(&mut self) -> bool {
        let Some(challenge) = self.pending.take() else {
            return false;
        };
        self.session = Some(Session::new(&challenge.username));
        true
    }

    /// Reload the persisted session for `identity` and check it is still
    /// accepted.
    ///
    /// The returned session is `Authenticated` when usable, `Expired` when
    /// the service rejected it (the stored handle is then deleted) and
    /// `Unauthenticated` when nothing was stored. Never starts a challenge.
    pub async fn restore(&self, identity: &Identity) -> Result<Session, AuthError> {
        let username = identity.username();
        let stored = match self.store.load(username, identity.token_kind()) {
            Ok(stored) => stored,
            Err(err) => {
                tracing::warn!(user = %username, error = %err, "could not read stored session");
                None
            }
        };

        // A token given explicitly wins over a different stored one
        let stored = stored.filter(|s| match identity {
            Identity::Token { token, .. } => &s.token.value == token,
            Identity::Password { .. } => true,
        });

        let Some(stored) = stored else {
            return Ok(Session::new(username));
        };

        let mut session = stored.into_session();
        let Some(token) = session.token.clone() else {
            return Ok(Session::new(username));
        };

        if self.api.validate(&token).await? {
            tracing::info!(user = %username, "restored stored session");
            return Ok(session);
        }

        tracing::info!(user = %username, "stored session expired");
        session.expire();
        if let Err(err) = self.store.remove(username, token.kind) {
            tracing::warn!(user = %username, error = %err, "could not delete expired session");
        }
        Ok(session)
    }

    /// Get a usable session: reload if possible, otherwise log in and
    /// answer challenges through `responder`. Persists the result.
    pub async fn establish<R>(
        &mut self,
        identity: &Identity,
        responder: &mut R,
    ) -> Result<Session, AuthError>
    where
        R: ChallengeResponder + ?Sized,
    {
        let restored = self.restore(identity).await?;
        if restored.is_authenticated() {
            self.session = Some(restored.clone());
            return Ok(restored);
        }
        self.sign_in(identity, responder).await
    }

    /// Log in without looking at the store, answering challenges through
    /// `responder`. Persists the result.
    pub async fn sign_in<R>(
        &mut self,
        identity: &Identity,
        responder: &mut R,
    ) -> Result<Session, AuthError>
    where
        R: ChallengeResponder + ?Sized,
    {
        let session = match self.authenticate(identity).await {
            Ok(session) => session,
            Err(AuthError::ChallengeRequired) => self.answer_challenges(responder).await?,
            Err(err) => return Err(err),
        };

        if let Err(err) = self.persist(&session) {
            tracing::warn!(user = %session.username, error = %err, "could not persist session");
        }
        Ok(session)
    }

    async fn answer_challenges<R>(&mut self, responder: &mut R) -> Result<Session, AuthError>
    where
        R: ChallengeResponder + ?Sized,
    {
        for attempt in 1..=self.max_challenge_attempts {
            let Some(challenge) = self.pending.clone() else {
                return Err(AuthError::NoPendingChallenge);
            };
            let Some(code) = responder.code(&challenge, attempt) else {
                self.abandon_challenge();
                return Err(AuthError::Abandoned);
            };

            match self.submit_challenge(&code).await {
                Ok(session) => return Ok(session),
                Err(AuthError::InvalidCredentials) => {
                    tracing::warn!(attempt, "two-factor code rejected");
                }
                Err(err) => {
                    self.abandon_challenge();
                    return Err(err);
                }
            }
        }

        self.abandon_challenge();
        Err(AuthError::InvalidCredentials)
    }

    /// Write an authenticated session to the store
    pub fn persist(&self, session: &Session) -> Result<()> {
        if session.state != SessionState::Authenticated {
            return Ok(());
        }
        self.store.save(session)
    }

    /// Expire `session` and delete its stored handle. A session without a
    /// token removes every handle stored for the account.
    pub fn logout(&self, session: &mut Session) -> Result<()> {
        let kinds = match &session.token {
            Some(token) => vec![token.kind],
            None => vec![TokenKind::SessionCookie, TokenKind::AccessToken],
        };
        session.expire();
        for kind in kinds {
            self.store.remove(&session.username, kind)?;
        }
        tracing::info!(user = %session.username, "logged out");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeAuth;
    use std::sync::atomic::Ordering;
    use tempfile::{TempDir, tempdir};

    fn manager(api: &FakeAuth) -> (SessionManager<&FakeAuth>, TempDir) {
        let dir = tempdir().unwrap();
        let store = SessionStore::at(dir.path().join("sessions.enc"));
        (SessionManager::new(api, store), dir)
    }

    fn codes(list: &[&str]) -> impl FnMut(&Challenge, u32) -> Option<String> {
        let mut list: Vec<String> = list.iter().rev().map(ToString::to_string).collect();
        move |_, _| list.pop()
    }

    #[tokio::test]
    async fn test_password_login_without_challenge() {
        let api = FakeAuth::new("pw");
        let (mut mgr, _dir) = manager(&api);

        let session = mgr.authenticate(&Identity::password("alice", "pw")).await.unwrap();

        assert!(session.is_authenticated());
        assert_eq!(session.token.unwrap().kind, TokenKind::SessionCookie);
    }

    #[tokio::test]
    async fn test_wrong_password() {
        let api = FakeAuth::new("pw");
        let (mut mgr, _dir) = manager(&api);

        let err = mgr.authenticate(&Identity::password("alice", "nope")).await.unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials);
    }

    #[tokio::test]
    async fn test_wrong_code_keeps_challenge_pending() {
        let api = FakeAuth::new("pw").with_two_factor("123456");
        let (mut mgr, _dir) = manager(&api);

        let err = mgr.authenticate(&Identity::password("alice", "pw")).await.unwrap_err();
        assert_eq!(err, AuthError::ChallengeRequired);

        assert_eq!(mgr.session().unwrap().state, SessionState::PendingChallenge);

        let err = mgr.submit_challenge("999999").await.unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials);
        assert!(mgr.pending_challenge().is_some());
        assert_eq!(mgr.session().unwrap().state, SessionState::PendingChallenge);

        let session = mgr.submit_challenge(" 123456 ").await.unwrap();
        assert_eq!(session.username, "alice");
        assert!(session.is_authenticated());
        assert!(mgr.pending_challenge().is_none());
        assert_eq!(mgr.session(), Some(&session));
    }

    #[tokio::test]
    async fn test_abandon_resets_to_unauthenticated() {
        let api = FakeAuth::new("pw").with_two_factor("123456");
        let (mut mgr, _dir) = manager(&api);
        assert!(!mgr.abandon_challenge());

        let _ = mgr.authenticate(&Identity::password("alice", "pw")).await;
        assert!(mgr.abandon_challenge());

        let session = mgr.session().unwrap();
        assert_eq!(session.state, SessionState::Unauthenticated);
        assert_eq!(session.username, "alice");
        assert!(mgr.pending_challenge().is_none());
        assert_eq!(
            mgr.submit_challenge("123456").await.unwrap_err(),
            AuthError::NoPendingChallenge
        );
    }

    #[tokio::test]
    async fn test_sign_in_after_restore_validates_once() {
        let api = FakeAuth::new("pw");
        let (mut mgr, _dir) = manager(&api);
        let identity = Identity::password("alice", "pw");
        mgr.store()
            .save(&Session::authenticated("alice", SessionToken::cookie("stale")))
            .unwrap();

        let restored = mgr.restore(&identity).await.unwrap();
        assert_eq!(restored.state, SessionState::Expired);

        let session = mgr.sign_in(&identity, &mut codes(&[])).await.unwrap();
        assert!(session.is_authenticated());
        assert_eq!(api.validations.load(Ordering::SeqCst), 1);
        assert_eq!(api.logins.load(Ordering::SeqCst), 1);
        assert!(mgr.store().load("alice", TokenKind::SessionCookie).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_submit_without_challenge() {
        let api = FakeAuth::new("pw");
        let (mut mgr, _dir) = manager(&api);

        let err = mgr.submit_challenge("123456").await.unwrap_err();
        assert_eq!(err, AuthError::NoPendingChallenge);
    }

    #[tokio::test]
    async fn test_token_identity_is_validated() {
        let api = FakeAuth::new("pw").accepting("tok-1");
        let (mut mgr, _dir) = manager(&api);

        let session = mgr.authenticate(&Identity::token("alice", "tok-1")).await.unwrap();
        assert_eq!(session.token.unwrap().kind, TokenKind::AccessToken);

        let err = mgr.authenticate(&Identity::token("alice", "tok-2")).await.unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials);
        assert_eq!(api.logins.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_reload_reauthenticates_without_challenge() {
        let api = FakeAuth::new("pw").with_two_factor("123456");
        let (mut mgr, _dir) = manager(&api);
        let identity = Identity::password("alice", "pw");
        mgr.store()
            .save(&Session::authenticated("alice", SessionToken::cookie("stale")))
            .unwrap();

        let restored = mgr.restore(&identity).await.unwrap();
        assert_eq!(restored.state, SessionState::Expired);
        assert!(mgr.store().load("alice", TokenKind::SessionCookie).unwrap().is_none());
        assert!(mgr.pending_challenge().is_none());
        assert_eq!(api.logins.load(Ordering::SeqCst), 0);

        let session = mgr.establish(&identity, &mut codes(&["123456"])).await.unwrap();
        assert!(session.is_authenticated());
        assert_eq!(api.logins.load(Ordering::SeqCst), 1);
        let stored = mgr.store().load("alice", TokenKind::SessionCookie).unwrap().unwrap();
        assert_eq!(Some(stored.token), session.token);
    }

    #[tokio::test]
    async fn test_valid_stored_session_skips_login() {
        let api = FakeAuth::new("pw").accepting("sid-ok");
        let (mut mgr, _dir) = manager(&api);
        mgr.store()
            .save(&Session::authenticated("alice", SessionToken::cookie("sid-ok")))
            .unwrap();

        let session = mgr
            .establish(&Identity::password("alice", "pw"), &mut codes(&[]))
            .await
            .unwrap();

        assert_eq!(session.token.unwrap().value, "sid-ok");
        assert_eq!(api.logins.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_establish_retries_codes() {
        let api = FakeAuth::new("pw").with_two_factor("123456");
        let (mut mgr, _dir) = manager(&api);

        let session = mgr
            .establish(&Identity::password("alice", "pw"), &mut codes(&["000001", "123456"]))
            .await
            .unwrap();
        assert!(session.is_authenticated());
    }

    #[tokio::test]
    async fn test_establish_gives_up() {
        let api = FakeAuth::new("pw").with_two_factor("123456");
        let (mut mgr, _dir) = manager(&api);
        let identity = Identity::password("alice", "pw");

        let err = mgr.establish(&identity, &mut codes(&[])).await.unwrap_err();
        assert_eq!(err, AuthError::Abandoned);
        assert!(mgr.pending_challenge().is_none());

        let mut mgr = mgr.with_max_challenge_attempts(2);
        let err = mgr
            .establish(&identity, &mut codes(&["1", "2", "3"]))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials);
    }

    #[tokio::test]
    async fn test_logout_removes_stored_session() {
        let api = FakeAuth::new("pw");
        let (mut mgr, _dir) = manager(&api);
        let mut session = mgr
            .establish(&Identity::password("alice", "pw"), &mut codes(&[]))
            .await
            .unwrap();
        assert_eq!(mgr.store().usernames(), ["alice"]);

        mgr.logout(&mut session).unwrap();

        assert_eq!(session.state, SessionState::Expired);
        assert!(mgr.store().usernames().is_empty());
    }
}
