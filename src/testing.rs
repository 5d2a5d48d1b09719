//! In-memory collaborators for unit tests

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::api::{
    AuthApi, Challenge, LocationLookup, LoginOutcome, Page, PageItem, PostRef, PostSource,
    ProfileHandle,
};
use crate::error::{AuthError, FetchError};
use crate::governor::GovernorSettings;
use crate::models::{
    EmbeddedLocation, POST_URL_BASE, Post, ProfileTarget, Session, SessionToken,
};

/// Governor settings that never sleep
pub fn fast_governor() -> GovernorSettings {
    GovernorSettings {
        floor: Duration::ZERO,
        base_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        max_retries: 3,
        jitter: false,
    }
}

/// Start of the synthetic timeline
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// `n` posts, newest first, one hour apart, shortcodes `p0..`
pub fn posts(n: usize) -> Vec<Post> {
    (0..n)
        .map(|i| {
            let age = (n - i) as i64;
            Post::new(
                &format!("id{i}"),
                &format!("p{i}"),
                epoch() + ChronoDuration::hours(age),
            )
        })
        .collect()
}

/// Authenticated session for tests
pub fn session() -> Session {
    Session::authenticated("tester", SessionToken::access("token"))
}

/// Post source serving a fixed list in pages
#[derive(Default)]
pub struct FakeSource {
    posts: Vec<Post>,
    deferred: bool,
    profile_error: Option<FetchError>,
    page_failures: Mutex<VecDeque<FetchError>>,
    post_failures: Mutex<HashMap<String, VecDeque<FetchError>>>,
    pub page_calls: AtomicUsize,
    pub post_calls: AtomicUsize,
}

impl FakeSource {
    pub fn new(posts: Vec<Post>) -> Self {
        Self {
            posts,
            ..Self::default()
        }
    }

    /// Serve posts as references that need `fetch_post`
    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }

    /// Fail profile resolution
    pub fn profile_error(mut self, err: FetchError) -> Self {
        self.profile_error = Some(err);
        self
    }

    /// Fail the next page fetches with these errors, in order
    pub fn fail_pages(self, errors: Vec<FetchError>) -> Self {
        self.page_failures_push(errors);
        self
    }

    /// Queue page failures on a source already in use
    pub fn page_failures_push(&self, errors: Vec<FetchError>) {
        self.page_failures.lock().unwrap().extend(errors);
    }

    /// Fail `fetch_post` for one shortcode with these errors, in order
    pub fn fail_post(self, shortcode: &str, errors: Vec<FetchError>) -> Self {
        self.post_failures
            .lock()
            .unwrap()
            .insert(shortcode.to_string(), errors.into());
        self
    }
}

impl PostSource for FakeSource {
    async fn resolve_profile(
        &self,
        target: &ProfileTarget,
        _session: &Session,
    ) -> Result<ProfileHandle, FetchError> {
        if let Some(err) = &self.profile_error {
            return Err(err.clone());
        }
        Ok(ProfileHandle {
            user_id: target.name().to_string(),
            username: Some(target.name().to_string()),
        })
    }

    async fn fetch_page(
        &self,
        _profile: &ProfileHandle,
        _session: &Session,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Page, FetchError> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.page_failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        let offset: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let items: Vec<PageItem> = self
            .posts
            .iter()
            .skip(offset)
            .take(page_size)
            .map(|p| {
                if self.deferred {
                    PageItem::Deferred(PostRef {
                        shortcode: p.shortcode.clone(),
                        url: format!("{POST_URL_BASE}{}/", p.shortcode),
                    })
                } else {
                    PageItem::Ready(p.clone())
                }
            })
            .collect();
        let end = offset + items.len();
        let next_cursor = (end < self.posts.len()).then(|| end.to_string());
        Ok(Page { items, next_cursor })
    }

    async fn fetch_post(&self, post: &PostRef, _session: &Session) -> Result<Post, FetchError> {
        self.post_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(queue) = self.post_failures.lock().unwrap().get_mut(&post.shortcode) {
            if let Some(err) = queue.pop_front() {
                return Err(err);
            }
        }
        self.posts
            .iter()
            .find(|p| p.shortcode == post.shortcode)
            .cloned()
            .ok_or(FetchError::NotFound)
    }
}

/// Location lookup answering from a map; unknown shortcodes fail
#[derive(Default)]
pub struct FakeLookup {
    locations: HashMap<String, Result<Option<EmbeddedLocation>, FetchError>>,
    pub calls: AtomicUsize,
    starts: Mutex<Vec<Instant>>,
    delay: Option<Duration>,
}

impl FakeLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, shortcode: &str, result: Result<Option<EmbeddedLocation>, FetchError>) -> Self {
        self.locations.insert(shortcode.to_string(), result);
        self
    }

    /// Sleep this long on every lookup
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// When each lookup started, in call order
    pub fn starts(&self) -> Vec<Instant> {
        self.starts.lock().unwrap().clone()
    }
}

impl LocationLookup for FakeLookup {
    async fn lookup(
        &self,
        shortcode: &str,
        _session: &Session,
    ) -> Result<Option<EmbeddedLocation>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.starts.lock().unwrap().push(Instant::now());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.locations
            .get(shortcode)
            .cloned()
            .unwrap_or_else(|| Err(FetchError::transient("connection reset")))
    }
}

/// Scripted authentication service
pub struct FakeAuth {
    pub password: String,
    pub two_factor: bool,
    pub code: String,
    pub valid_tokens: Mutex<Vec<String>>,
    pub logins: AtomicUsize,
    pub validations: AtomicUsize,
    pub issued: AtomicUsize,
}

impl FakeAuth {
    pub fn new(password: &str) -> Self {
        Self {
            password: password.to_string(),
            two_factor: false,
            code: "000000".to_string(),
            valid_tokens: Mutex::new(Vec::new()),
            logins: AtomicUsize::new(0),
            validations: AtomicUsize::new(0),
            issued: AtomicUsize::new(0),
        }
    }

    pub fn with_two_factor(mut self, code: &str) -> Self {
        self.two_factor = true;
        self.code = code.to_string();
        self
    }

    /// Accept an existing token as valid
    pub fn accepting(self, token: &str) -> Self {
        self.valid_tokens.lock().unwrap().push(token.to_string());
        self
    }

    fn issue(&self) -> SessionToken {
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        let value = format!("fresh-{n}");
        self.valid_tokens.lock().unwrap().push(value.clone());
        SessionToken::cookie(&value)
    }
}

impl AuthApi for FakeAuth {
    async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome, AuthError> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        if password != self.password {
            return Err(AuthError::InvalidCredentials);
        }
        if self.two_factor {
            return Ok(LoginOutcome::ChallengeRequired(Challenge {
                username: username.to_string(),
                identifier: "challenge-1".to_string(),
            }));
        }
        Ok(LoginOutcome::Authenticated(self.issue()))
    }

    async fn two_factor_login(
        &self,
        challenge: &Challenge,
        code: &str,
    ) -> Result<SessionToken, AuthError> {
        if challenge.identifier != "challenge-1" || code != self.code {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(self.issue())
    }

    async fn validate(&self, token: &SessionToken) -> Result<bool, AuthError> {
        self.validations.fetch_add(1, Ordering::SeqCst);
        Ok(self.valid_tokens.lock().unwrap().contains(&token.value))
    }
}
