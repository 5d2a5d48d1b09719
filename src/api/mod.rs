//! Remote collaborators
//!
//! The harvester core only talks to three capabilities:
//!
//! - [`AuthApi`]: password login, two-factor challenge, token validation
//! - [`PostSource`]: profile lookup and paged post listing
//! - [`LocationLookup`]: per-post location metadata
//!
//! [`instagram::InstagramClient`] implements all three over HTTP;
//! [`browser::BrowserSource`] implements [`PostSource`] on top of a browser
//! automation driver.

pub mod browser;
pub mod instagram;

use crate::error::{AuthError, FetchError};
use crate::models::{EmbeddedLocation, Post, ProfileTarget, Session, SessionToken};

/// Outcome of a password login
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Logged in, no further steps
    Authenticated(SessionToken),
    /// A two-factor code must be submitted
    ChallengeRequired(Challenge),
}

/// An outstanding two-factor challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Account being logged in
    pub username: String,
    /// Service-issued identifier tying the code to the login attempt
    pub identifier: String,
}

/// Authentication capability
#[allow(async_fn_in_trait)]
pub trait AuthApi {
    /// Log in with a username and password
    async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome, AuthError>;

    /// Answer a two-factor challenge
    async fn two_factor_login(
        &self,
        challenge: &Challenge,
        code: &str,
    ) -> Result<SessionToken, AuthError>;

    /// Check whether the service still accepts a token.
    /// `Ok(false)` means the token was rejected.
    async fn validate(&self, token: &SessionToken) -> Result<bool, AuthError>;
}

/// A profile resolved to the id used for listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileHandle {
    /// Numeric account id
    pub user_id: String,
    /// Username, if known
    pub username: Option<String>,
}

/// Reference to a post whose details need a separate fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRef {
    /// Public identifier
    pub shortcode: String,
    /// Permalink
    pub url: String,
}

/// One entry of a listing page
#[derive(Debug, Clone, PartialEq)]
pub enum PageItem {
    /// Fully described post
    Ready(Post),
    /// Post known only by reference
    Deferred(PostRef),
    /// Entry that could not be decoded
    Malformed {
        /// Id, if one could be read
        id: Option<String>,
        /// What was wrong
        reason: String,
    },
}

/// One page of a profile's posts, newest first
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Page {
    /// Entries in native order
    pub items: Vec<PageItem>,
    /// Cursor for the next page; `None` on the last page
    pub next_cursor: Option<String>,
}

/// Post listing capability
#[allow(async_fn_in_trait)]
pub trait PostSource {
    /// Resolve a username/id to a listable profile
    async fn resolve_profile(
        &self,
        target: &ProfileTarget,
        session: &Session,
    ) -> Result<ProfileHandle, FetchError>;

    /// Fetch one page of posts
    async fn fetch_page(
        &self,
        profile: &ProfileHandle,
        session: &Session,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Page, FetchError>;

    /// Fetch the details of a deferred post
    async fn fetch_post(&self, post: &PostRef, session: &Session) -> Result<Post, FetchError>;
}

/// Location metadata capability, keyed by a post's public identifier
#[allow(async_fn_in_trait)]
pub trait LocationLookup {
    /// Location attached to a post, `Ok(None)` when the post has none
    async fn lookup(
        &self,
        shortcode: &str,
        session: &Session,
    ) -> Result<Option<EmbeddedLocation>, FetchError>;
}

impl<T: AuthApi> AuthApi for &T {
    async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome, AuthError> {
        (**self).login(username, password).await
    }

    async fn two_factor_login(
        &self,
        challenge: &Challenge,
        code: &str,
    ) -> Result<SessionToken, AuthError> {
        (**self).two_factor_login(challenge, code).await
    }

    async fn validate(&self, token: &SessionToken) -> Result<bool, AuthError> {
        (**self).validate(token).await
    }
}

impl<T: PostSource> PostSource for &T {
    async fn resolve_profile(
        &self,
        target: &ProfileTarget,
        session: &Session,
    ) -> Result<ProfileHandle, FetchError> {
        (**self).resolve_profile(target, session).await
    }

    async fn fetch_page(
        &self,
        profile: &ProfileHandle,
        session: &Session,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Page, FetchError> {
        (**self).fetch_page(profile, session, cursor, page_size).await
    }

    async fn fetch_post(&self, post: &PostRef, session: &Session) -> Result<Post, FetchError> {
        (**self).fetch_post(post, session).await
    }
}

impl<T: LocationLookup> LocationLookup for &T {
    async fn lookup(
        &self,
        shortcode: &str,
        session: &Session,
    ) -> Result<Option<EmbeddedLocation>, FetchError> {
        (**self).lookup(shortcode, session).await
    }
}
