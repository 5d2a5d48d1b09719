//! Session and identity models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No login attempted yet
    #[default]
    Unauthenticated,
    /// Password accepted, two-factor code outstanding
    PendingChallenge,
    /// Usable for requests
    Authenticated,
    /// Rejected by the service or logged out
    Expired,
}

impl SessionState {
    /// Get state as string
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::PendingChallenge => "pending_challenge",
            Self::Authenticated => "authenticated",
            Self::Expired => "expired",
        }
    }
}

/// How a token is presented to the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// API access token, sent as the `access_token` query parameter
    AccessToken,
    /// Web session id, sent as the `sessionid` cookie
    SessionCookie,
}

impl TokenKind {
    /// Get kind as string
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AccessToken => "access_token",
            Self::SessionCookie => "session_cookie",
        }
    }
}

/// Opaque token granting access to the service
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    /// Presentation
    pub kind: TokenKind,
    /// Raw token value
    pub value: String,
}

impl SessionToken {
    /// Web session cookie token
    pub fn cookie(value: &str) -> Self {
        Self {
            kind: TokenKind::SessionCookie,
            value: value.to_string(),
        }
    }

    /// API access token
    pub fn access(value: &str) -> Self {
        Self {
            kind: TokenKind::AccessToken,
            value: value.to_string(),
        }
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionToken")
            .field("kind", &self.kind)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// Identity material supplied by the user
#[derive(Clone, PartialEq, Eq)]
pub enum Identity {
    /// Username and password login (may trigger two-factor)
    Password {
        /// Login name
        username: String,
        /// Password
        password: String,
    },
    /// Pre-issued API access token
    Token {
        /// Account the token belongs to (used as the persistence key)
        username: String,
        /// Access token
        token: String,
    },
}

impl Identity {
    /// Username/password identity
    pub fn password(username: &str, password: &str) -> Self {
        Self::Password {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    /// Access-token identity
    pub fn token(username: &str, token: &str) -> Self {
        Self::Token {
            username: username.to_string(),
            token: token.to_string(),
        }
    }

    /// Account name
    pub fn username(&self) -> &str {
        match self {
            Self::Password { username, .. } | Self::Token { username, .. } => username,
        }
    }

    /// Token kind a session for this identity will carry
    pub const fn token_kind(&self) -> TokenKind {
        match self {
            Self::Password { .. } => TokenKind::SessionCookie,
            Self::Token { .. } => TokenKind::AccessToken,
        }
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .finish_non_exhaustive(),
            Self::Token { username, .. } => f
                .debug_struct("Token")
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

/// An authentication context for one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Account name
    pub username: String,
    /// Current lifecycle state
    pub state: SessionState,
    /// Token, present once authenticated
    pub token: Option<SessionToken>,
    /// When the session was authenticated
    pub established_at: Option<DateTime<Utc>>,
}

impl Session {
    /// New unauthenticated session
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            state: SessionState::Unauthenticated,
            token: None,
            established_at: None,
        }
    }

    /// Authenticated session carrying a token
    pub fn authenticated(username: &str, token: SessionToken) -> Self {
        let mut session = Self::new(username);
        session.grant(token);
        session
    }

    /// Session whose password was accepted but still owes a two-factor code
    pub fn challenged(username: &str) -> Self {
        Self {
            state: SessionState::PendingChallenge,
            ..Self::new(username)
        }
    }

    /// Attach a token and mark the session usable
    pub fn grant(&mut self, token: SessionToken) {
        self.state = SessionState::Authenticated;
        self.token = Some(token);
        self.established_at = Some(Utc::now());
    }

    /// Whether requests can be made with this session
    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated && self.token.is_some()
    }

    /// Mark the session unusable and drop its token
    pub fn expire(&mut self) {
        self.state = SessionState::Expired;
        self.token = None;
    }

    /// Key under which this session is persisted
    pub fn store_key(username: &str, kind: TokenKind) -> String {
        format!("{}:{}", kind.as_str(), username.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_debug_redacts_secrets() {
        let identity = Identity::password("alice", "hunter2");
        let printed = format!("{identity:?}");
        assert!(printed.contains("alice"));
        assert!(!printed.contains("hunter2"));

        let token = SessionToken::cookie("abc123");
        assert!(!format!("{token:?}").contains("abc123"));
    }

    #[test]
    fn test_expire() {
        let mut session = Session::authenticated("alice", SessionToken::cookie("abc"));
        assert!(session.is_authenticated());
        session.expire();
        assert_eq!(session.state, SessionState::Expired);
        assert!(session.token.is_none());
        assert!(!session.is_authenticated());
    }

    #[test]
    fn test_challenged_then_granted() {
        let mut session = Session::challenged("alice");
        assert_eq!(session.state, SessionState::PendingChallenge);
        assert!(!session.is_authenticated());

        session.grant(SessionToken::cookie("sid"));
        assert!(session.is_authenticated());
        assert!(session.established_at.is_some());
    }

    #[test]
    fn test_store_key() {
        assert_eq!(
            Session::store_key("Alice", TokenKind::SessionCookie),
            "session_cookie:alice"
        );
    }
}
